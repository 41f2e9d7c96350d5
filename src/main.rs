use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use trailguard::config::{ConfigNumber, LoggingConfig, TrailguardConfig};
use trailguard::replay::{read_trace, Replayer};

/// Sliding-window rate limiter tooling.
#[derive(Debug, Parser)]
#[command(name = "trailguard", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a recorded request trace through the limiter
    Replay {
        /// Trace file of `<timestamp_ms> <client_key>` lines
        trace: PathBuf,

        /// Configuration file (YAML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the window length in milliseconds
        #[arg(long)]
        window_ms: Option<u64>,

        /// Override the per-window request budget
        #[arg(long)]
        max_requests: Option<u64>,

        /// Print one JSON object per decision
        #[arg(long)]
        json: bool,
    },
    /// Load and validate a configuration file
    Validate {
        /// Configuration file (YAML)
        config: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Replay {
            trace,
            config,
            window_ms,
            max_requests,
            json,
        } => {
            let config_path = config;
            let mut config = load_config(config_path.as_deref())?;

            if let Some(window_ms) = window_ms {
                config.limiter.window_ms = ConfigNumber::from(window_ms);
            }
            if let Some(max_requests) = max_requests {
                config.limiter.max_requests = ConfigNumber::from(max_requests);
            }

            let entries = read_trace(&trace)
                .with_context(|| format!("failed to read trace {}", trace.display()))?;
            let replayer = Replayer::new(&config.limiter)?;
            let (outcomes, summary) = replayer.run(&entries);

            for outcome in &outcomes {
                if json {
                    println!("{}", serde_json::to_string(outcome)?);
                } else {
                    let verdict = if outcome.decision.allowed { "admit" } else { "deny" };
                    println!(
                        "{:>13} {:<24} {:<5} count={} remaining={}",
                        outcome.timestamp_ms,
                        outcome.key,
                        verdict,
                        outcome.decision.count,
                        outcome.decision.remaining
                    );
                }
            }

            if json {
                println!("{}", serde_json::to_string(&summary)?);
            } else {
                println!(
                    "admitted={} denied={} keys={}",
                    summary.admitted, summary.denied, summary.distinct_keys
                );
            }
        }
        Command::Validate { config } => {
            let loaded = load_config(Some(&config))?;

            let window = loaded.limiter.validate()?;
            info!(
                window_ms = window.window_ms(),
                max_requests = window.max_requests(),
                "Configuration is valid"
            );
            println!(
                "ok: {} requests per {} ms",
                window.max_requests(),
                window.window_ms()
            );
        }
    }

    Ok(())
}

/// Load layered configuration and initialize tracing from it.
///
/// The final subscriber depends on the logging section, so the load runs
/// under a scoped bootstrap subscriber that honours `RUST_LOG` only.
fn load_config(path: Option<&Path>) -> anyhow::Result<TrailguardConfig> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let bootstrap = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    let config = tracing::subscriber::with_default(bootstrap, || read_config(path))?;

    init_tracing(&config.logging);
    match path {
        Some(path) => info!(path = %path.display(), "Configuration loaded"),
        None => info!("Configuration loaded from defaults and environment"),
    }
    Ok(config)
}

/// Layered load (file, then `TRAILGUARD__*` environment) shared by every
/// subcommand.
fn read_config(path: Option<&Path>) -> anyhow::Result<TrailguardConfig> {
    TrailguardConfig::load(path).with_context(|| match path {
        Some(path) => format!("failed to load {}", path.display()),
        None => "failed to load configuration".to_string(),
    })
}

/// Initialize tracing from `RUST_LOG`, falling back to the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.with_thread_ids(true).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_and_replay_share_layered_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trailguard.yaml");
        std::fs::write(&path, "limiter:\n  window_ms: 2000\n  max_requests: 10\n").unwrap();

        std::env::set_var("TRAILGUARD__LIMITER__MAX_REQUESTS", "7");
        let from_path = read_config(Some(&path));
        let from_env = read_config(None);
        std::env::remove_var("TRAILGUARD__LIMITER__MAX_REQUESTS");

        // The environment override applies whether or not a file is given
        let window = from_path.unwrap().limiter.validate().unwrap();
        assert_eq!(window.window_ms(), 2000);
        assert_eq!(window.max_requests(), 7);

        let window = from_env.unwrap().limiter.validate().unwrap();
        assert_eq!(window.window_ms(), 60_000);
        assert_eq!(window.max_requests(), 7);
    }

    #[test]
    fn test_missing_config_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yaml");

        let err = read_config(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("absent.yaml"));
    }

    #[test]
    fn test_load_events_reach_bootstrap_subscriber() {
        use std::io;
        use std::sync::{Arc, Mutex};

        #[derive(Clone, Default)]
        struct Captured(Arc<Mutex<Vec<u8>>>);

        impl io::Write for Captured {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }

            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trailguard.yaml");
        std::fs::write(&path, "limiter:\n  max_requests: 3\n").unwrap();

        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new("info"))
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, || read_config(Some(&path))).unwrap();

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("Loading layered configuration"));
    }
}
