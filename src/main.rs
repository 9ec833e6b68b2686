mod advertising;
mod config;
mod connection;
mod device_scanner;
mod error;
mod filter;
mod history;
mod loopback;
mod monitor;
mod peaks;
mod pipeline;
mod plx;
mod server;
mod source;
mod transport;
mod vitals;

use clap::{Parser, Subcommand};
use config::Config;
use connection::ConnectionManager;
use loopback::LoopbackTransport;
use monitor::Monitor;
use pipeline::AcquisitionLoop;
use plx::Characteristic;
use server::PlxServer;
use source::{ReplaySource, SampleSource, SyntheticSource};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Peer handle of the central that `simulate` and `replay` connect
const SIMULATED_CENTRAL: transport::PeerId = 1;

/// SpO2 and pulse rate estimator with a PLX characteristic server
#[derive(Parser, Debug)]
#[command(name = "pulse-ox")]
#[command(author, version, about)]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Run mode; `simulate` when omitted
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
enum Command {
    /// Estimate from a synthetic PPG signal and publish to a loopback central
    Simulate {
        /// Stop after this many acquisition windows
        #[arg(long)]
        cycles: Option<u64>,
    },
    /// Estimate from a recorded `ir,red` file
    Replay {
        /// Recording to replay
        file: PathBuf,
        /// Stop after this many acquisition windows
        #[arg(long)]
        cycles: Option<u64>,
    },
    /// Connect to a pulse oximeter as a central and log its readings
    Monitor,
}

impl Cli {
    fn mode(&self) -> Command {
        self.command
            .clone()
            .unwrap_or(Command::Simulate { cycles: None })
    }
}

/// Raise `stop` on Ctrl-C.
fn watch_interrupt(stop: Arc<AtomicBool>) {
    std::thread::spawn(move || {
        let rt = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                log::warn!("Ctrl-C handling unavailable: {}", e);
                return;
            }
        };
        if rt.block_on(tokio::signal::ctrl_c()).is_ok() {
            log::info!("Interrupted, finishing current window");
            stop.store(true, Ordering::Relaxed);
        }
    });
}

/// Run the acquisition loop against a loopback server with one connected central.
fn run_server(
    config: &Config,
    source: &mut dyn SampleSource,
    cycles: Option<u64>,
    stop: &AtomicBool,
) -> ExitCode {
    let (event_sender, event_receiver) = crossbeam_channel::unbounded();
    let transport = Arc::new(LoopbackTransport::new(event_sender));

    let server = match PlxServer::new(transport.clone(), &config.transport) {
        Ok(server) => Arc::new(server),
        Err(e) => {
            log::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = server.start() {
        log::error!("Failed to start advertising: {}", e);
        return ExitCode::FAILURE;
    }

    let manager = ConnectionManager::new(server.clone(), event_receiver);
    std::thread::spawn(move || {
        manager.run();
    });
    transport.connect(SIMULATED_CENTRAL);

    let mut acquisition = AcquisitionLoop::new(config, server);
    acquisition.run(source, stop, cycles);

    let received = transport.notified(SIMULATED_CENTRAL).len();
    log::info!("Simulated central received {} notifications", received);
    if let Some(reading) = transport
        .local_value(Characteristic::Continuous)
        .and_then(|value| plx::decode_measurement(&value))
    {
        log::info!(
            "Last published: SpO2 {:.2}%, Pulse {:.2} bpm",
            reading.spo2,
            reading.bpm
        );
    }

    transport.disconnect(SIMULATED_CENTRAL);
    ExitCode::SUCCESS
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let stop = Arc::new(AtomicBool::new(false));
    watch_interrupt(stop.clone());

    let interval = config.acquisition.sample_interval();
    match cli.mode() {
        Command::Simulate { cycles } => {
            log::info!(
                "Simulating {} Hz sensor, {} samples per window",
                config.acquisition.sample_rate_hz,
                config.acquisition.window_len()
            );
            // 60 bpm at 100 Hz, R = 0.5
            let mut source =
                SyntheticSource::new(10_000, 500, 20_000, 400, 100).with_pacing(interval);
            run_server(&config, &mut source, cycles, &stop)
        }
        Command::Replay { file, cycles } => {
            let mut source = match ReplaySource::open(&file) {
                Ok(source) => source.with_pacing(interval),
                Err(e) => {
                    log::error!("{}: {}", file.display(), e);
                    return ExitCode::FAILURE;
                }
            };
            log::info!("Replaying {}", file.display());
            run_server(&config, &mut source, cycles, &stop)
        }
        Command::Monitor => {
            let monitor = Monitor::new(config.transport.device_name.clone(), stop);
            match monitor.run() {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    log::error!("{}", e);
                    ExitCode::FAILURE
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults_to_simulate() {
        let cli = Cli::try_parse_from(["pulse-ox"]).unwrap();
        assert_eq!(cli.mode(), Command::Simulate { cycles: None });
        assert_eq!(cli.config, None);
    }

    #[test]
    fn test_replay_with_options() {
        let cli = Cli::try_parse_from([
            "pulse-ox", "--config", "/tmp/p.toml", "replay", "rec.csv", "--cycles", "3",
        ])
        .unwrap();
        assert_eq!(
            cli.mode(),
            Command::Replay {
                file: PathBuf::from("rec.csv"),
                cycles: Some(3)
            }
        );
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/p.toml")));
    }

    #[test]
    fn test_simulate_cycles() {
        let cli = Cli::try_parse_from(["pulse-ox", "simulate", "--cycles", "8"]).unwrap();
        assert_eq!(cli.mode(), Command::Simulate { cycles: Some(8) });
    }

    #[test]
    fn test_rejects_bad_arguments() {
        assert!(Cli::try_parse_from(["pulse-ox", "replay"]).is_err());
        assert!(Cli::try_parse_from(["pulse-ox", "simulate", "--cycles", "many"]).is_err());
        assert!(Cli::try_parse_from(["pulse-ox", "simulate", "monitor"]).is_err());
        assert!(Cli::try_parse_from(["pulse-ox", "monitor", "--cycles", "2"]).is_err());
        assert!(Cli::try_parse_from(["pulse-ox", "--verbose"]).is_err());
    }
}
