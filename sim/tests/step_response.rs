use common::LockStatus;
use sw_pll::{FrequencyMapper, SwPll};
use sw_pll_sim::{Driver, Profile, ReferenceStep, Scenario, Trajectory};

fn run(profile: &Profile, scenario: Scenario) -> Trajectory {
    let pll = profile.app_pll().unwrap();
    let lut = profile.build_lut(&pll).unwrap();
    let sw_pll = SwPll::new(profile.loop_config(), FrequencyMapper::new(pll, &lut)).unwrap();
    Driver::new(sw_pll, profile, scenario).run()
}

#[test]
fn locks_and_tracks_reference_steps() {
    let profile = Profile::default();

    for seed in 0..20 {
        let trajectory = run(&profile, Scenario { seed, ..Scenario::default() });
        assert_eq!(trajectory.len(), 150);

        let first = trajectory.first_locked_tick().unwrap();
        assert!(first <= 50, "seed {seed}: locked at {first}");
        assert!(trajectory.locked_since(first), "seed {seed}: lost lock");

        // last ten ticks before each reference step, and the tail
        for window in [15..26, 41..51, 71..81, 121..131, 140..150] {
            let mean = trajectory.mean_ppm_error(window.clone()).unwrap();
            assert!(mean.abs() < 10.0, "seed {seed}: {mean} ppm over {window:?}");
        }
    }
}

#[test]
fn saturates_beyond_table_range_and_recovers() {
    let profile = Profile::default();
    let scenario = Scenario {
        ticks: 200,
        jitter: 0.0,
        steps: vec![
            ReferenceStep { tick: 10, ppm: 1500.0 },
            ReferenceStep { tick: 60, ppm: 0.0 },
        ],
        ..Scenario::default()
    };
    let trajectory = run(&profile, scenario);

    for record in trajectory.iter() {
        match record.tick {
            0..=10 => assert_eq!(record.lock_status, LockStatus::Locked),
            15..=55 => {
                assert_eq!(record.lock_status, LockStatus::UnlockedHigh);
                assert_eq!(record.index, 415);
                assert_eq!(record.register, 0x0d18);
            }
            tick if tick >= 70 => assert_eq!(record.lock_status, LockStatus::Locked),
            _ => {}
        }
    }
}

#[test]
fn slow_reference_saturates_low() {
    let profile = Profile::default();
    let scenario = Scenario {
        ticks: 40,
        jitter: 0.0,
        steps: vec![ReferenceStep { tick: 5, ppm: -1500.0 }],
        ..Scenario::default()
    };
    let trajectory = run(&profile, scenario);

    let tail: Vec<_> = trajectory.iter().filter(|r| r.tick >= 20).collect();
    assert!(tail
        .iter()
        .all(|r| r.lock_status == LockStatus::UnlockedLow && r.index == 0));
}
