//! Command-line interface definition and command handlers

use clap::{Parser, Subcommand};
use perfwatch::probe::default_suite;
use perfwatch::{
    DeviceCapability, InMemorySettingsStore, MemoryHost, RunEvent, SettingsStore,
    TelemetryContext, Toggle,
};
use perfwatch::{Config, FileSettingsStore, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Command-line interface definition for perfwatch
#[derive(Parser)]
#[command(name = "perfwatch")]
#[command(about = "Performance telemetry, probes and adaptive tuning")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// TOML configuration file (defaults to $PERFWATCH_CONFIG, then built-in defaults)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// JSON file holding persisted feature toggles
    #[arg(short, long, global = true)]
    pub settings: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands for the perfwatch CLI
#[derive(Subcommand)]
pub enum Commands {
    /// Sample memory and print a telemetry snapshot as JSON
    Snapshot,

    /// Run the built-in probe suite
    RunProbes {
        /// Print the finished session as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Print optimization suggestions for the current state
    Suggest {
        /// Run the probe suite first so score-based rules apply
        #[arg(long)]
        with_probes: bool,
    },

    /// Reset feature toggles to the detected device profile
    Adjust,

    /// Set a single feature toggle
    Toggle {
        /// Toggle name, e.g. preloading or animationOptimization
        name: String,
        #[arg(action = clap::ArgAction::Set)]
        value: bool,
    },
}

impl Cli {
    pub fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => {
                let config = Config::load_from_file(path)?;
                config.validate()?;
                config
            }
            None => Config::load()?,
        };

        if self.verbose {
            config.logging.level = "debug".to_string();
        }
        Ok(config)
    }

    pub fn settings_store(&self) -> Arc<dyn SettingsStore> {
        match &self.settings {
            Some(path) => Arc::new(FileSettingsStore::new(path.clone())),
            None => Arc::new(InMemorySettingsStore::new()),
        }
    }
}

#[cfg(feature = "monitoring")]
pub fn host_probes() -> (Arc<dyn MemoryHost>, Arc<dyn DeviceCapability>) {
    (
        Arc::new(perfwatch::memory::SysinfoHost::new()),
        Arc::new(perfwatch::adaptive::SysinfoDevice),
    )
}

#[cfg(not(feature = "monitoring"))]
pub fn host_probes() -> (Arc<dyn MemoryHost>, Arc<dyn DeviceCapability>) {
    let host = perfwatch::StaticHost::new(0, 0);
    host.set_unavailable("built without the monitoring feature");
    (
        Arc::new(host),
        Arc::new(perfwatch::StaticDevice::unknown()),
    )
}

pub fn build_context(cli: &Cli, config: Config) -> Result<TelemetryContext> {
    let (host, device) = host_probes();
    let probes = default_suite(&config.probes);
    TelemetryContext::new(config, host, device, cli.settings_store(), probes)
}

pub async fn run(cli: &Cli, ctx: &TelemetryContext) -> Result<()> {
    match &cli.command {
        Commands::Snapshot => {
            ctx.memory().sample();
            let snapshot = ctx.broker().current_snapshot();
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }

        Commands::RunProbes { json } => {
            run_probes(ctx, *json).await?;
        }

        Commands::Suggest { with_probes } => {
            ctx.memory().sample();
            if *with_probes {
                ctx.orchestrator().run_to_completion().await?;
            }

            let suggestions = ctx.adaptive().optimization_suggestions();
            if suggestions.is_empty() {
                println!("No suggestions: everything looks healthy");
            }
            for suggestion in suggestions {
                println!("- {}", suggestion);
            }
        }

        Commands::Adjust => {
            let tier = ctx.adaptive().adjust_for_device();
            println!("Device tier: {:?}", tier);
            print_toggles(ctx);
        }

        Commands::Toggle { name, value } => {
            let toggle: Toggle = name.parse()?;
            if ctx.adaptive().set_toggle(toggle, *value) {
                info!("{} set to {}", toggle, value);
            } else {
                println!("{} already {}", toggle, value);
            }
            print_toggles(ctx);
        }
    }

    Ok(())
}

async fn run_probes(ctx: &TelemetryContext, json: bool) -> Result<()> {
    let mut events = ctx.orchestrator().run_all()?;

    while let Some(event) = events.next().await {
        match event {
            RunEvent::Started { session_id, total } => {
                if !json {
                    println!("Session {} ({} probes)", session_id, total);
                }
            }
            RunEvent::ProbeStarted { .. } => {}
            RunEvent::ProbeFinished { result, progress } => {
                if !json {
                    let status = if result.success { "ok" } else { "FAILED" };
                    println!(
                        "[{:>3.0}%] {:<20} {:<6} {:.3}s {}",
                        progress * 100.0,
                        result.test_name,
                        status,
                        result.duration,
                        result.failure_detail.as_deref().unwrap_or("")
                    );
                }
            }
            RunEvent::Finished(session) => {
                if json {
                    println!("{}", serde_json::to_string_pretty(&session)?);
                } else if let Some(error) = &session.error_message {
                    println!("Run failed: {}", error);
                } else {
                    println!(
                        "Score: {:.1}  average duration: {:.3}s",
                        session.overall_score(),
                        session.average_duration()
                    );
                }
                break;
            }
        }
    }

    Ok(())
}

fn print_toggles(ctx: &TelemetryContext) {
    for (toggle, value) in ctx.adaptive().state().entries() {
        println!("  {:<24} {}", toggle, if value { "on" } else { "off" });
    }
}
