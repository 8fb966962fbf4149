//! FlowIO CLI - Command-line interface
//!
//! Connects to a FlowIO device, runs one command and disconnects.

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand, ValueEnum};
use flowio_core::cli::{exit_code_description, ExitCodes};
use flowio_core::core::simulator::{SimulatedDevice, SimulatedTransport};
use flowio_core::{
    AppConfig, BluetoothTransport, ConfigMode, DomainEvent, DriverError, LoggingSettings, PidGoals, PortSet,
    PowerOffStatus, Session, Topic, Transport,
};
use serde::Serialize;
use std::fmt::Display;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// CLI output format
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON format for scripting
    Json,
}

/// FlowIO CLI
#[derive(Parser, Debug)]
#[command(
    name = "flowio-cli",
    version,
    about = "Control a FlowIO pneumatic actuator over Bluetooth LE",
    long_about = None
)]
struct Cli {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Device name prefix (overrides the config file)
    #[arg(short = 'n', long, env = "FLOWIO_NAME_PREFIX")]
    name_prefix: Option<String>,

    /// Config file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Use an in-memory simulated device instead of Bluetooth
    #[arg(long)]
    simulate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Read the hardware status
    Status,

    /// Read the battery level
    Battery,

    /// Inflate ports (e.g. "1,2" or "all")
    Inflate {
        /// Ports to drive
        ports: PortSet,

        /// Pump PWM (0-255)
        #[arg(long)]
        pwm: Option<u8>,

        /// Stop after this many milliseconds
        #[arg(short, long)]
        duration: Option<u64>,
    },

    /// Vacuum ports
    Vacuum {
        /// Ports to drive
        ports: PortSet,

        /// Pump PWM (0-255)
        #[arg(long)]
        pwm: Option<u8>,

        /// Stop after this many milliseconds
        #[arg(short, long)]
        duration: Option<u64>,
    },

    /// Vent ports to atmosphere
    Release {
        /// Ports to vent
        ports: PortSet,
    },

    /// Stop ports, or everything when none are given
    Stop {
        /// Ports to stop
        ports: Option<PortSet>,
    },

    /// Pneumatic configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Auto power-off timer
    PowerOff {
        #[command(subcommand)]
        action: PowerOffAction,
    },

    /// PID settings
    Pid {
        #[command(subcommand)]
        action: PidAction,
    },

    /// PID goals
    Goals {
        #[command(subcommand)]
        action: GoalsAction,
    },

    /// Stream analog sample frames
    Analog {
        /// Frames to print before stopping
        #[arg(short, long, default_value = "10")]
        frames: usize,

        /// Averaging window
        #[arg(short, long)]
        window: Option<u8>,

        /// Give up after this many seconds without a frame
        #[arg(long, default_value = "5")]
        timeout: u64,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Show the current mode
    Get,
    /// Switch mode (general, inflation-series, inflation-parallel, vacuum-series, vacuum-parallel)
    Set { mode: ConfigMode },
}

#[derive(Subcommand, Debug)]
enum PowerOffAction {
    /// Show the remaining time
    Get,
    /// Set minutes (1-254), "off" or "disabled"
    Set {
        #[arg(value_parser = parse_power_off)]
        value: PowerOffStatus,
    },
}

#[derive(Subcommand, Debug)]
enum PidAction {
    /// Show the settings record
    Get,
}

#[derive(Subcommand, Debug)]
enum GoalsAction {
    /// Show the goals
    Get,
    /// Set all five goals
    Set {
        #[arg(num_args = 5, required = true)]
        goals: Vec<u16>,
    },
}

fn parse_power_off(value: &str) -> Result<PowerOffStatus, String> {
    match value.to_ascii_lowercase().as_str() {
        "off" => Ok(PowerOffStatus::Off),
        "disabled" | "disable" => Ok(PowerOffStatus::Disabled),
        minutes => match minutes.parse::<u8>() {
            Ok(m @ 1..=254) => Ok(PowerOffStatus::Remaining { minutes: m }),
            _ => Err(format!("expected 1-254, \"off\" or \"disabled\", got '{}'", value)),
        },
    }
}

fn init_logging(settings: &LoggingSettings, verbose: bool) {
    let default = if verbose { "debug" } else { settings.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if settings.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn emit<T: Serialize>(format: OutputFormat, value: &T, text: impl Display) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(value)?),
        OutputFormat::Text => println!("{}", text),
    }
    Ok(())
}

fn exit_code(error: &anyhow::Error) -> u8 {
    error
        .downcast_ref::<DriverError>()
        .map_or(ExitCodes::ERROR, ExitCodes::for_driver_error)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: failed to load configuration: {}", e);
            return ExitCode::from(ExitCodes::CONFIG_ERROR);
        }
    };
    init_logging(&config.logging, cli.verbose);

    match run(&cli, &config).await {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(e) => {
            let code = exit_code(&e);
            eprintln!("Error: {:#}", e);
            tracing::debug!(code, kind = exit_code_description(code), "exiting");
            ExitCode::from(code)
        }
    }
}

async fn run(cli: &Cli, config: &AppConfig) -> anyhow::Result<()> {
    let transport: Arc<dyn Transport> = if cli.simulate {
        Arc::new(SimulatedTransport::single(SimulatedDevice::new("FlowIO Simulator")))
    } else {
        Arc::new(BluetoothTransport::new(config.device.bluetooth_config()))
    };

    let mut session_config = config.device.session_config();
    if let Some(prefix) = &cli.name_prefix {
        session_config.name_prefix = prefix.clone();
    }
    let name_prefix = session_config.name_prefix.clone();
    let mut session = Session::new(transport, session_config);

    session.bus().subscribe(Topic::ConnectionState, |event| {
        if let DomainEvent::ConnectionStateChanged(change) = event {
            tracing::info!(kind = ?change.kind, reason = %change.reason, "connection state changed");
        }
    });

    session
        .connect(&name_prefix, None)
        .await
        .with_context(|| format!("connecting to a device named '{}*'", name_prefix))?;
    if matches!(cli.format, OutputFormat::Text) {
        eprintln!("Connected to {} ({})", session.name(), session.id());
    }

    let result = execute(cli, &session).await;
    session.disconnect().await?;
    result
}

async fn execute(cli: &Cli, session: &Session) -> anyhow::Result<()> {
    let capabilities = session.capabilities();
    let format = cli.format;

    match &cli.command {
        Commands::Status => {
            let status = capabilities.control().check_hardware_status().await?;
            let text = format!(
                "active={} pump1={} pump2={} inlet={} outlet={} ports=0x{:02x}",
                status.active,
                status.pump1,
                status.pump2,
                status.inlet,
                status.outlet,
                status.ports().bits()
            );
            emit(format, &status, text)?;
        }
        Commands::Battery => {
            let level = capabilities.battery().get_battery_level().await?;
            emit(format, &level, format!("{}%", level))?;
        }
        Commands::Inflate { ports, pwm, duration } => {
            let control = capabilities.control();
            control.start_inflation(*ports, *pwm).await?;
            if let Some(ms) = duration {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
                control.stop_action(*ports).await?;
            }
        }
        Commands::Vacuum { ports, pwm, duration } => {
            let control = capabilities.control();
            control.start_vacuum(*ports, *pwm).await?;
            if let Some(ms) = duration {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
                control.stop_action(*ports).await?;
            }
        }
        Commands::Release { ports } => {
            capabilities.control().start_release(*ports).await?;
        }
        Commands::Stop { ports } => match ports {
            Some(ports) => capabilities.control().stop_action(*ports).await?,
            None => capabilities.control().stop_all_actions().await?,
        },
        Commands::Config { action } => match action {
            ConfigAction::Get => {
                let mode = capabilities.config().get_configuration().await?;
                emit(format, &mode, mode)?;
            }
            ConfigAction::Set { mode } => capabilities.config().set_configuration(*mode).await?,
        },
        Commands::PowerOff { action } => match action {
            PowerOffAction::Get => {
                let status = capabilities.power_off().get_remaining_time().await?;
                emit(format, &status, status)?;
            }
            PowerOffAction::Set { value } => capabilities.power_off().set_timer(*value).await?,
        },
        Commands::Pid { action } => match action {
            PidAction::Get => {
                let settings = capabilities.pid().get_settings().await?;
                let mut text = format!(
                    "positive={} negative={}",
                    settings.positive_command, settings.negative_command
                );
                for (i, c) in settings.controls.iter().enumerate() {
                    text.push_str(&format!(
                        "\n  [{}] in={} out=0x{:02x} p={} i={} d={}",
                        i + 1,
                        c.input_channel,
                        c.output_port.code(),
                        c.proportional,
                        c.integrative,
                        c.differential
                    ));
                }
                emit(format, &settings, text)?;
            }
        },
        Commands::Goals { action } => match action {
            GoalsAction::Get => {
                let goals = capabilities.pid().get_goals().await?;
                emit(format, &goals, format!("{:?}", goals.0))?;
            }
            GoalsAction::Set { goals } => {
                let goals: [u16; 5] = goals
                    .as_slice()
                    .try_into()
                    .map_err(|_| anyhow!("expected exactly 5 goals"))?;
                capabilities.pid().set_goals(&PidGoals(goals)).await?;
            }
        },
        Commands::Analog { frames, window, timeout } => {
            let analog = capabilities.analog();
            let mut samples = session.bus().subscribe_channel(Topic::AnalogSamples);
            analog.request_continuous(*window).await?;

            let mut received = 0;
            while received < *frames {
                let event = tokio::time::timeout(Duration::from_secs(*timeout), samples.recv())
                    .await
                    .context("waiting for analog samples")?;
                let Some(DomainEvent::AnalogSamplesReceived(frame)) = event else {
                    break;
                };
                let text = frame
                    .values()
                    .iter()
                    .map(u16::to_string)
                    .collect::<Vec<_>>()
                    .join(" ");
                emit(format, &frame, text)?;
                received += 1;
            }
            analog.stop().await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowio_core::TransportError;

    #[test]
    fn test_parse_power_off() {
        assert_eq!(parse_power_off("off"), Ok(PowerOffStatus::Off));
        assert_eq!(parse_power_off("Disabled"), Ok(PowerOffStatus::Disabled));
        assert_eq!(parse_power_off("30"), Ok(PowerOffStatus::Remaining { minutes: 30 }));
        assert!(parse_power_off("0").is_err());
        assert!(parse_power_off("255").is_err());
        assert!(parse_power_off("soon").is_err());
    }

    #[test]
    fn test_cli_parses_commands() {
        let cli = Cli::try_parse_from(["flowio-cli", "--simulate", "inflate", "1,2", "--pwm", "200"]).unwrap();
        match cli.command {
            Commands::Inflate { ports, pwm, duration } => {
                assert_eq!(ports, PortSet::ports(&[1, 2]));
                assert_eq!(pwm, Some(200));
                assert_eq!(duration, None);
            }
            other => panic!("unexpected command {:?}", other),
        }

        let cli = Cli::try_parse_from(["flowio-cli", "goals", "set", "1", "2", "3", "4", "5"]).unwrap();
        assert!(matches!(cli.command, Commands::Goals { action: GoalsAction::Set { .. } }));
        assert!(Cli::try_parse_from(["flowio-cli", "goals", "set", "1", "2"]).is_err());
    }

    #[test]
    fn test_exit_codes() {
        let err = anyhow::Error::new(DriverError::TransportAcquisition(TransportError::DeviceNotFound(
            "FlowIO".into(),
        )));
        assert_eq!(exit_code(&err), ExitCodes::DEVICE_NOT_FOUND);

        let err = anyhow::Error::new(DriverError::Write(TransportError::Busy)).context("inflate");
        assert_eq!(exit_code(&err), ExitCodes::DEVICE_BUSY);

        assert_eq!(exit_code(&anyhow!("other")), ExitCodes::ERROR);
    }

    #[tokio::test]
    async fn test_simulated_run() {
        let cli = Cli::try_parse_from(["flowio-cli", "--simulate", "-f", "json", "battery"]).unwrap();
        run(&cli, &AppConfig::default()).await.unwrap();

        let cli = Cli::try_parse_from(["flowio-cli", "--simulate", "stop"]).unwrap();
        run(&cli, &AppConfig::default()).await.unwrap();
    }
}
