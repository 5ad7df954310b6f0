//! Closed loop simulation of the PLL against a drifting reference clock.

use common::{types::SampleFraction, LockStatus, Stimulus};
use log::{debug, info, warn};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use ringbuffer::{AllocRingBuffer, RingBuffer};
use serde::{Deserialize, Serialize};
use sw_pll::{PeriodFraction, SwPll};

use crate::profile::Profile;

/// Reference clock offset applied once `tick` has been simulated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferenceStep {
    pub tick: usize,
    pub ppm: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    pub ticks: usize,
    /// Output clock offset before the first correction.
    pub initial_offset_ppm: f64,
    /// Peak to peak sampling jitter, in output clock counts.
    pub jitter: f64,
    pub seed: u64,
    pub steps: Vec<ReferenceStep>,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            ticks: 150,
            initial_offset_ppm: -200.0,
            jitter: 100.0,
            seed: 0,
            steps: vec![
                ReferenceStep { tick: 25, ppm: 300.0 },
                ReferenceStep { tick: 50, ppm: 150.0 },
                ReferenceStep { tick: 80, ppm: -300.0 },
                ReferenceStep { tick: 130, ppm: 0.0 },
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TickRecord {
    pub tick: usize,
    pub mclk_count: u32,
    pub period_fraction: f64,
    pub error: i64,
    pub lock_status: LockStatus,
    pub index: usize,
    pub register: u16,
    pub frequency: f64,
    pub target_frequency: f64,
}

impl TickRecord {
    pub fn ppm_error(&self) -> f64 {
        (self.frequency / self.target_frequency - 1.0) * 1e6
    }
}

/// The most recent ticks of a run.
pub struct Trajectory {
    records: AllocRingBuffer<TickRecord>,
}

impl Trajectory {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: AllocRingBuffer::new(capacity.max(1)),
        }
    }

    pub fn push(&mut self, record: TickRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TickRecord> {
        self.records.iter()
    }

    pub fn to_vec(&self) -> Vec<TickRecord> {
        self.records.to_vec()
    }

    pub fn first_locked_tick(&self) -> Option<usize> {
        self.iter()
            .find(|record| record.lock_status.is_locked())
            .map(|record| record.tick)
    }

    /// True if every tick from `tick` onwards was locked.
    pub fn locked_since(&self, tick: usize) -> bool {
        self.iter()
            .filter(|record| record.tick >= tick)
            .all(|record| record.lock_status.is_locked())
    }

    fn window(&self, ticks: std::ops::Range<usize>) -> impl Iterator<Item = &TickRecord> {
        self.iter().filter(move |record| ticks.contains(&record.tick))
    }

    pub fn mean_ppm_error(&self, ticks: std::ops::Range<usize>) -> Option<f64> {
        let (sum, count) = self
            .window(ticks)
            .fold((0.0, 0usize), |(sum, count), record| (sum + record.ppm_error(), count + 1));
        (count > 0).then(|| sum / count as f64)
    }

    pub fn max_abs_ppm_error(&self, ticks: std::ops::Range<usize>) -> Option<f64> {
        self.window(ticks)
            .map(|record| record.ppm_error().abs())
            .fold(None, |max, err| Some(err.max(max.unwrap_or(0.0))))
    }
}

/// Feeds a [`SwPll`] with the counts a real output clock would produce
/// while the reference drifts according to a [`Scenario`].
pub struct Driver<'a> {
    sw_pll: SwPll<'a>,
    scenario: Scenario,
    rng: ChaCha8Rng,
    nominal_reference: f64,
    ratio: f64,
    ticks_per_call: f64,
    modulus: f64,
    reference_frequency: f64,
    actual_frequency: f64,
    mclk: f64,
    tick: usize,
    trajectory: Trajectory,
}

impl<'a> Driver<'a> {
    pub fn new(sw_pll: SwPll<'a>, profile: &Profile, scenario: Scenario) -> Self {
        let ratio = profile.ratio();
        let actual_frequency =
            profile.reference_frequency * ratio * (1.0 + scenario.initial_offset_ppm * 1e-6);

        info!(
            "Simulating {} ticks, start offset {} ppm, jitter {}, seed {}",
            scenario.ticks, scenario.initial_offset_ppm, scenario.jitter, scenario.seed
        );

        Self {
            sw_pll,
            rng: ChaCha8Rng::seed_from_u64(scenario.seed),
            trajectory: Trajectory::new(scenario.ticks),
            scenario,
            nominal_reference: profile.reference_frequency,
            ratio,
            ticks_per_call: profile.ticks_per_call as f64,
            modulus: (1u64 << profile.counter_bits.min(32)) as f64,
            reference_frequency: profile.reference_frequency,
            actual_frequency,
            mclk: 0.0,
            tick: 0,
        }
    }

    pub fn is_done(&self) -> bool {
        self.tick >= self.scenario.ticks
    }

    /// Counts for the next control call, with jitter applied. The period
    /// fraction never drops to zero, however large the jitter.
    pub fn next_stimulus(&mut self) -> Stimulus {
        let increment = self.actual_frequency / self.reference_frequency * self.ticks_per_call;
        let jitter = self.scenario.jitter * (self.rng.gen::<f64>() - 0.5);
        self.mclk += increment + jitter;

        let fraction = (increment + jitter) / increment;

        Stimulus {
            mclk_count: (self.mclk as u64 % self.modulus as u64) as u32,
            period_fraction: SampleFraction::saturating_from_num(fraction).max(SampleFraction::DELTA),
        }
    }

    /// Runs the loop on `stimulus` and moves the simulated clocks on.
    pub fn apply(&mut self, stimulus: Stimulus) -> TickRecord {
        let fraction = PeriodFraction::from_fixed(stimulus.period_fraction).unwrap_or_else(|| {
            warn!("Tick {}: zero period fraction, using nominal", self.tick);
            PeriodFraction::NOMINAL
        });

        let res = self.sw_pll.tick_with_fraction(stimulus.mclk_count, fraction);

        let record = TickRecord {
            tick: self.tick,
            mclk_count: stimulus.mclk_count,
            period_fraction: stimulus.period_fraction.to_num(),
            error: self.sw_pll.error(),
            lock_status: res.lock_status,
            index: res.index,
            register: res.register,
            frequency: res.frequency,
            target_frequency: self.reference_frequency * self.ratio,
        };
        debug!(
            "Tick {}: {} index {} register {:#06x} {:.3} Hz ({:+.2} ppm)",
            record.tick,
            record.lock_status,
            record.index,
            record.register,
            record.frequency,
            record.ppm_error()
        );

        self.actual_frequency = res.frequency;
        self.trajectory.push(record);

        if let Some(step) = self.scenario.steps.iter().find(|step| step.tick == self.tick) {
            self.reference_frequency = self.nominal_reference * (1.0 + step.ppm * 1e-6);
            info!("Tick {}: reference now {:+} ppm", self.tick, step.ppm);
        }
        self.tick += 1;

        record
    }

    pub fn step(&mut self) -> TickRecord {
        let stimulus = self.next_stimulus();
        self.apply(stimulus)
    }

    pub fn run(mut self) -> Trajectory {
        while !self.is_done() {
            self.step();
        }

        match self.trajectory.first_locked_tick() {
            Some(tick) => info!("First locked at tick {}", tick),
            None => warn!("Never locked"),
        }
        self.trajectory
    }

    pub fn sw_pll(&self) -> &SwPll<'a> {
        &self.sw_pll
    }

    pub fn trajectory(&self) -> &Trajectory {
        &self.trajectory
    }
}
