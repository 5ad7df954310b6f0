//! `sw-pll-sim`: simulate, inspect and cross validate the software PLL.
//!
//! ```bash
//! # Step response of the default 24 MHz -> 12.288 MHz loop
//! sw-pll-sim simulate --plot pll_step_response.svg
//!
//! # Range of the fractional table
//! sw-pll-sim --profile my_profile.json range --plot sw_pll_range.svg
//!
//! # Compare against another implementation speaking the frame protocol
//! sw-pll-sim validate --reference ./reference_app -- --some-flag
//! ```

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use log::info;
use sw_pll::{FrequencyMapper, SwPll};
use sw_pll_sim::{
    header, plot,
    reference::{self, ReferenceProcess},
    Driver, Profile, Scenario, SimError,
};

#[derive(Parser)]
#[command(name = "sw-pll-sim")]
#[command(about = "Software PLL simulator and reference harness")]
#[command(version)]
struct Cli {
    /// Loop profile (JSON). The built in 24 MHz -> 12.288 MHz profile is
    /// used when omitted.
    #[arg(short, long, global = true)]
    profile: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct ScenarioArgs {
    /// Scenario file (JSON), overridden by the flags below.
    #[arg(long)]
    scenario: Option<PathBuf>,

    /// Number of control calls to simulate.
    #[arg(long)]
    ticks: Option<usize>,

    /// Peak to peak sampling jitter in output clock counts.
    #[arg(long)]
    jitter: Option<f64>,

    /// Seed for the jitter generator.
    #[arg(long)]
    seed: Option<u64>,

    /// Output clock offset before the first correction, in ppm.
    #[arg(long, allow_hyphen_values = true)]
    offset_ppm: Option<f64>,
}

impl ScenarioArgs {
    fn load(&self) -> Result<Scenario, SimError> {
        let mut scenario = match &self.scenario {
            Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
            None => Scenario::default(),
        };
        if let Some(ticks) = self.ticks {
            scenario.ticks = ticks;
        }
        if let Some(jitter) = self.jitter {
            scenario.jitter = jitter;
        }
        if let Some(seed) = self.seed {
            scenario.seed = seed;
        }
        if let Some(offset) = self.offset_ppm {
            scenario.initial_offset_ppm = offset;
        }
        Ok(scenario)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the loop against a drifting reference clock.
    Simulate {
        #[command(flatten)]
        scenario: ScenarioArgs,

        /// Write the step response as SVG.
        #[arg(long)]
        plot: Option<PathBuf>,

        /// Write every tick as JSON.
        #[arg(long)]
        trace: Option<PathBuf>,
    },

    /// Print the frequency range covered by the fractional table.
    Range {
        /// Write frequency over table index as SVG.
        #[arg(long)]
        plot: Option<PathBuf>,
    },

    /// Write fractions.h and register_setup.h for the profile.
    Header {
        /// Output directory.
        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,

        /// Name of the table array.
        #[arg(long, default_value = "frac_values")]
        name: String,
    },

    /// Write the active profile as JSON.
    Init {
        /// Output file.
        out: PathBuf,
    },

    /// Act as a reference loop on stdin and stdout.
    Serve,

    /// Cross validate against a reference process.
    Validate {
        #[command(flatten)]
        scenario: ScenarioArgs,

        /// Reference executable, this binary's own `serve` mode by default.
        #[arg(long)]
        reference: Option<PathBuf>,

        /// Arguments passed to the reference.
        #[arg(last = true)]
        args: Vec<String>,
    },
}

fn load_profile(path: Option<&Path>) -> Result<Profile, SimError> {
    match path {
        Some(path) => {
            info!("Using profile {}", path.display());
            Ok(Profile::load(path)?)
        }
        None => Ok(Profile::default()),
    }
}

fn simulate(
    profile: &Profile,
    scenario: Scenario,
    plot_path: Option<&Path>,
    trace: Option<&Path>,
) -> Result<(), SimError> {
    let pll = profile.app_pll()?;
    let lut = profile.build_lut(&pll)?;
    let sw_pll = SwPll::new(profile.loop_config(), FrequencyMapper::new(pll, &lut))?;

    let trajectory = Driver::new(sw_pll, profile, scenario).run();

    for record in trajectory.iter() {
        println!(
            "Loop: count: {}, actual_mclk_frequency: {:.3}, lock_status: {}",
            record.tick, record.frequency, record.lock_status
        );
    }

    if let Some(path) = trace {
        std::fs::write(path, serde_json::to_string_pretty(&trajectory.to_vec())?)?;
    }
    if let Some(path) = plot_path {
        plot::step_response(path, &trajectory)?;
        info!("Step response written to {}", path.display());
    }

    match trajectory.first_locked_tick() {
        Some(tick) => {
            println!("First locked at tick {}", tick);
            Ok(())
        }
        None => Err(SimError::NeverLocked),
    }
}

fn range(profile: &Profile, plot_path: Option<&Path>) -> Result<(), SimError> {
    let pll = profile.app_pll()?;
    let lut = profile.build_lut(&pll)?;
    let stats = lut.stats(&pll);

    println!("min_freq: {}Hz", stats.min_frequency);
    println!("mid_freq: {}Hz", stats.mid_frequency);
    println!("max_freq: {}Hz", stats.max_frequency);
    println!("average step size: {:.6}Hz", stats.average_step);
    println!("LUT entries: {}", stats.steps);
    println!("PPM range: +-{}", stats.ppm_range);

    if let Some(path) = plot_path {
        plot::frequency_range(path, &lut, &pll)?;
        info!("Range plot written to {}", path.display());
    }
    Ok(())
}

fn write_headers(profile: &Profile, out_dir: &Path, name: &str) -> Result<(), SimError> {
    let pll = profile.app_pll()?;
    let lut = profile.build_lut(&pll)?;

    std::fs::create_dir_all(out_dir)?;
    std::fs::write(out_dir.join("fractions.h"), header::emit_fractions(&lut, name))?;
    std::fs::write(
        out_dir.join("register_setup.h"),
        header::emit_register_setup(&pll, &lut),
    )?;
    info!("Headers written to {}", out_dir.display());
    Ok(())
}

async fn validate(
    profile: &Profile,
    scenario: Scenario,
    program: Option<PathBuf>,
    args: Vec<String>,
) -> Result<(), SimError> {
    let mut process = match program {
        Some(program) => ReferenceProcess::spawn(program, args)?,
        None => ReferenceProcess::spawn(std::env::current_exe()?, ["serve"])?,
    };

    let result = reference::cross_validate(profile, scenario, process.client()).await?;
    process.shutdown().await?;

    println!(
        "{} ticks compared, {} mismatches",
        result.ticks,
        result.mismatches.len()
    );
    if result.is_equivalent() {
        Ok(())
    } else {
        Err(SimError::NotEquivalent(result.mismatches.len()))
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), SimError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let profile = load_profile(cli.profile.as_deref())?;

    match cli.command {
        Commands::Simulate {
            scenario,
            plot,
            trace,
        } => simulate(&profile, scenario.load()?, plot.as_deref(), trace.as_deref()),
        Commands::Range { plot } => range(&profile, plot.as_deref()),
        Commands::Header { out_dir, name } => write_headers(&profile, &out_dir, &name),
        Commands::Init { out } => Ok(profile.save(out)?),
        Commands::Serve => Ok(reference::serve(tokio::io::stdin(), tokio::io::stdout()).await?),
        Commands::Validate {
            scenario,
            reference,
            args,
        } => validate(&profile, scenario.load()?, reference, args).await,
    }
}
