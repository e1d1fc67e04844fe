//! quadsim CLI
//!
//! Run deterministic quadrotor scenario suites and report a validation
//! summary.

use clap::Parser;
use quadsim_env::{RunControl, TimeStep};
use quadsim_sim::exporter::{to_json, TrajectoryExport};
use quadsim_sim::{
    DeterminismConfig, DeterminismTier, ScenarioKind, ScenarioManifest, ScenarioSuite, SubsystemSchedule,
    SuiteRunResult, SuiteRunner, SuiteRunnerConfig,
};
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// quadsim deterministic scenario harness
#[derive(Parser, Debug)]
#[command(name = "quadsim")]
#[command(about = "Run deterministic quadrotor simulation scenarios", long_about = None)]
struct Args {
    /// Master seed (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Scenario to run (hover-start, impulse-torque-shock, sustained-wind-torque,
    /// sensor-drift-stress, actuator-degradation, lift-hover-start,
    /// lift-hover-degraded, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Generate this many randomized scenarios instead of the standard suite
    #[arg(long)]
    randomized: Option<usize>,

    /// Simulated duration per scenario in seconds
    #[arg(short, long, default_value = "20")]
    duration: f64,

    /// Physics timestep in seconds
    #[arg(long, default_value = "0.001")]
    timestep: f64,

    /// Control and nerve period in physics steps
    #[arg(long, default_value = "2")]
    control_period: u32,

    /// Sensor period in physics steps
    #[arg(long, default_value = "1")]
    sensor_period: u32,

    /// Determinism tier recorded in logs (tier0, tier1, tier2)
    #[arg(long, default_value = "tier0")]
    tier: DeterminismTier,

    /// Run every scenario twice and check replay at the declared tier
    #[arg(long)]
    replay: bool,

    /// Scenarios to run concurrently
    #[arg(short, long, default_value = "1")]
    jobs: usize,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON summary on stdout for CI parsing
    #[arg(long)]
    json: bool,

    /// Write the full simulation log of a single scenario to this file
    #[arg(long)]
    export: Option<String>,

    /// Write a down-sampled trajectory of a single scenario to this file
    #[arg(long)]
    trajectory: Option<String>,

    /// Write the validation summary to this file
    #[arg(long)]
    summary: Option<String>,

    /// Write the scenario manifest to this file
    #[arg(long)]
    manifest: Option<String>,
}

fn write_file(path: &str, contents: &str, what: &str) -> bool {
    match std::fs::write(path, contents) {
        Ok(()) => {
            info!("Wrote {} to {}", what, path);
            true
        }
        Err(e) => {
            error!("Failed to write {} to {}: {}", what, path, e);
            false
        }
    }
}

fn build_suite(args: &Args, seed: u64) -> Result<ScenarioSuite, String> {
    let timestep = TimeStep::new(args.timestep).map_err(|e| e.to_string())?;
    let suite = match args.randomized {
        Some(count) => ScenarioSuite::randomized(seed, count, args.duration, timestep),
        None => ScenarioSuite::standard(seed, args.duration, timestep),
    }
    .map_err(|e| e.to_string())?;

    if args.scenario == "all" {
        return Ok(suite);
    }
    let kind: ScenarioKind = args.scenario.parse()?;
    Ok(suite.filter_kind(kind))
}

fn write_manifest(path: &str, manifest: &ScenarioManifest) -> bool {
    match to_json(manifest) {
        Ok(json) => write_file(path, &json, "manifest"),
        Err(e) => {
            error!("Failed to encode manifest: {}", e);
            false
        }
    }
}

/// Writes the per-scenario artifacts requested on the command line.
fn write_artifacts(args: &Args, result: &SuiteRunResult) -> bool {
    let mut ok = true;
    if args.export.is_none() && args.trajectory.is_none() {
        return ok;
    }
    let Some(report) = result.reports.first() else {
        return ok;
    };
    let Some(log) = report.log.as_ref() else {
        warn!("No log recorded for {}; nothing to export", report.scenario_id);
        return ok;
    };

    if let Some(path) = &args.export {
        ok &= match to_json(log) {
            Ok(json) => write_file(path, &json, "simulation log"),
            Err(e) => {
                error!("Failed to encode log: {}", e);
                false
            }
        };
    }
    if let Some(path) = &args.trajectory {
        let export = TrajectoryExport::from_log(log, report.evaluation.as_ref(), 10);
        ok &= match to_json(&export) {
            Ok(json) => write_file(path, &json, "trajectory"),
            Err(e) => {
                error!("Failed to encode trajectory: {}", e);
                false
            }
        };
    }
    ok
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { "debug" } else { "info" };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    if !args.json {
        info!("quadsim v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    // Determine base seed
    let seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(1)
    } else {
        args.seed
    };

    let suite = match build_suite(&args, seed) {
        Ok(suite) => suite,
        Err(e) => {
            eprintln!("Error: {}", e);
            let names: Vec<_> = ScenarioKind::all().iter().map(|k| k.name()).collect();
            eprintln!("Available scenarios: {}, all", names.join(", "));
            return ExitCode::FAILURE;
        }
    };
    if suite.is_empty() {
        eprintln!("Error: no scenarios selected");
        return ExitCode::FAILURE;
    }

    let wants_log = args.export.is_some() || args.trajectory.is_some();
    if wants_log && suite.len() > 1 {
        eprintln!("Error: --export and --trajectory only support a single scenario");
        return ExitCode::FAILURE;
    }

    let schedule = match SubsystemSchedule::new(args.sensor_period, 1, args.control_period, args.control_period) {
        Ok(schedule) => schedule,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let config = SuiteRunnerConfig::default()
        .with_schedule(schedule)
        .with_determinism(DeterminismConfig::tier0().with_tier(args.tier))
        .with_replay_verification(args.replay)
        .with_max_concurrency(args.jobs)
        .with_logs(wants_log);

    let manifest_ok = match &args.manifest {
        Some(path) => write_manifest(path, &ScenarioManifest::new(seed, &suite, &config)),
        None => true,
    };

    // Ctrl-C stops the suite between steps
    let control = RunControl::new();
    let stopper = control.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping");
            stopper.stop();
        }
    });

    let runner = SuiteRunner::new(config).with_run_control(control);
    let result = if args.jobs > 1 {
        runner.run_concurrent(&suite).await
    } else {
        runner.run(&suite)
    };
    let summary = result.summary();

    if !args.json {
        for report in &result.reports {
            if report.passed() {
                info!("✓ {} (seed={}) PASSED", report.scenario_id, report.seed);
            } else {
                error!(
                    "✗ {} (seed={}) FAILED: {}",
                    report.scenario_id,
                    report.seed,
                    report.failure_summary().unwrap_or_else(|| "unknown".to_string())
                );
            }
        }

        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        if let Some(t) = summary.mean_recovery_time {
            info!("  Mean recovery time:   {:.3}s", t);
        }
        if let Some(o) = summary.worst_overshoot_degrees {
            info!("  Worst overshoot:      {:.2}°", o);
        }
        if let Some(h) = summary.mean_hf_stability {
            info!("  Mean HF stability:    {:.4}", h);
        }
        if summary.suite_passed {
            info!("✅ All {} scenario runs passed!", summary.total);
        } else {
            error!(
                "❌ {}/{} scenario runs failed ({} errored)",
                summary.failed + summary.errored,
                summary.total,
                summary.errored
            );
        }
    }

    let mut artifacts_ok = manifest_ok;
    artifacts_ok &= write_artifacts(&args, &result);

    match to_json(&summary) {
        Ok(json) => {
            if args.json {
                println!("{}", json);
            }
            if let Some(path) = &args.summary {
                artifacts_ok &= write_file(path, &json, "summary");
            }
        }
        Err(e) => {
            error!("Failed to encode summary: {}", e);
            artifacts_ok = false;
        }
    }

    // Exit with proper code for CI
    if summary.suite_passed && artifacts_ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> ScenarioManifest {
        let suite = ScenarioSuite::hover(3, 1.0, TimeStep::new(0.001).unwrap()).unwrap();
        ScenarioManifest::new(3, &suite, &SuiteRunnerConfig::default())
    }

    #[test]
    fn test_manifest_write_reports_success() {
        let path = std::env::temp_dir().join(format!("quadsim-manifest-{}.json", std::process::id()));
        let path = path.to_string_lossy().into_owned();
        assert!(write_manifest(&path, &manifest()));
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("hover-start"));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_manifest_write_failure_is_reported() {
        let path = std::env::temp_dir().join("quadsim-missing-dir").join("nested").join("manifest.json");
        assert!(!write_manifest(&path.to_string_lossy(), &manifest()));
    }
}
