//! mcu-panel command line
//!
//! Drives a microcontroller running the LED-blink firmware over a serial port, or a
//! simulated one with `--simulate`.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use mcu_panel::protocol::{self, Event, BLINK_COUNT_RANGE};
use mcu_panel::{
    enumerate_available_ports, Interrupt, MockAdapter, PanelConfig, PanelResult, SerialSession,
    SessionEvent, SessionWorker,
};
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Delay per blink of the simulated firmware.
const SIMULATED_BLINK_STEP: Duration = Duration::from_millis(150);

/// How often the console checks on the session while waiting for input.
const CONSOLE_POLL: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(name = "mcu-panel", version, about = "Serial control panel for microcontrollers")]
struct Cli {
    /// Configuration file (defaults to mcu-panel.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Serial port name, overrides the configuration
    #[arg(long, global = true)]
    port: Option<String>,

    /// Baud rate, overrides the configuration
    #[arg(long, global = true)]
    baud: Option<u32>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Talk to a simulated device instead of a real port
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List serial ports reported by the OS
    Ports,
    /// Blink the LED and wait for the firmware to finish
    Blink {
        /// Number of blinks
        #[arg(long, default_value_t = 1)]
        times: u32,
    },
    /// Send a raw command line
    Send {
        /// Line to send, e.g. "*BLINK_LED,3"
        line: String,
        /// Wait for a reply containing this text
        #[arg(long)]
        expect: Option<String>,
    },
    /// Print device events for a while
    Monitor {
        /// How long to listen
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },
    /// Interactive console: `blink N`, `quit`
    Console,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_tracing(&config);

    match cli.command {
        Commands::Ports => list_ports(),
        Commands::Blink { times } => blink(&config, cli.simulate, times),
        Commands::Send { line, expect } => send(&config, cli.simulate, &line, expect.as_deref()),
        Commands::Monitor { seconds } => {
            monitor(&config, cli.simulate, Duration::from_secs(seconds))
        }
        Commands::Console => console(&config, cli.simulate),
    }
}

fn load_config(cli: &Cli) -> Result<PanelConfig> {
    let mut config = match &cli.config {
        Some(path) => PanelConfig::load_from(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => PanelConfig::load().context("Failed to load configuration")?,
    };

    if let Some(port) = &cli.port {
        config.serial.port = port.clone();
    }
    if let Some(baud) = cli.baud {
        config.serial.baud_rate = baud;
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.to_lowercase();
    }
    config.validate().context("Invalid command line override")?;
    Ok(config)
}

fn init_tracing(config: &PanelConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("mcu_panel={}", config.logging.level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn open_session(config: &PanelConfig, simulate: bool) -> PanelResult<SerialSession> {
    let session = if simulate {
        let adapter = MockAdapter::new(config.serial.port.clone(), config.serial.baud_rate);
        adapter.device().emulate_blink_firmware(SIMULATED_BLINK_STEP);
        info!(port = %config.serial.port, "using simulated device");
        SerialSession::with_port(Box::new(adapter))?
    } else {
        connect_hardware(config)?
    };
    Ok(session.with_poll_interval(config.poll_interval()))
}

#[cfg(feature = "instrument_serial")]
fn connect_hardware(config: &PanelConfig) -> PanelResult<SerialSession> {
    let adapter = mcu_panel::SerialAdapter::resolve(&config.serial.port, config.serial.baud_rate)?
        .with_read_timeout(config.read_timeout());
    SerialSession::with_port(Box::new(adapter))
}

#[cfg(not(feature = "instrument_serial"))]
fn connect_hardware(_config: &PanelConfig) -> PanelResult<SerialSession> {
    Err(mcu_panel::PanelError::SerialFeatureDisabled)
}

/// Open the session and wait for `@STARTED`.
fn start_session(config: &PanelConfig, simulate: bool) -> Result<SerialSession> {
    let session = open_session(config, simulate)?;
    if !protocol::await_startup(&session, config.startup_timeout()) {
        session.terminate();
        bail!(
            "Device on {} did not report {} within {:?}",
            config.serial.port,
            protocol::STARTED,
            config.startup_timeout()
        );
    }
    Ok(session)
}

fn list_ports() -> Result<()> {
    let ports = enumerate_available_ports();
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{port}");
    }
    Ok(())
}

fn blink(config: &PanelConfig, simulate: bool, times: u32) -> Result<()> {
    let session = start_session(config, simulate)?;
    let result = protocol::blink_led(&session, times, config.command_timeout());
    session.terminate();
    result?;
    println!("Blinked {times} time(s)");
    Ok(())
}

fn send(config: &PanelConfig, simulate: bool, line: &str, expect: Option<&str>) -> Result<()> {
    let session = start_session(config, simulate)?;
    let mut command = line.trim_end().to_string();
    command.push('\n');

    let result = match expect {
        Some(expected) => session
            .exchange(&command, config.command_timeout(), |reply| {
                reply.contains(expected).then(|| reply.to_string())
            })
            .map(|reply| println!("{reply}"))
            .map_err(anyhow::Error::from),
        None if session.send_command(true, &command) => Ok(()),
        None => Err(anyhow::anyhow!("Failed to write '{}'", command.trim_end())),
    };
    session.terminate();
    result
}

fn monitor(config: &PanelConfig, simulate: bool, duration: Duration) -> Result<()> {
    let session = open_session(config, simulate)?;
    let interrupt = Interrupt::new();
    session.process_messages(&interrupt, duration, |line| match Event::parse(line) {
        Some(event) if event.fields.is_empty() => println!("{}", event.name),
        Some(event) => println!("{} {}", event.name, event.fields.join(" ")),
        None => println!("{line}"),
    });
    if !session.is_ready() {
        warn!(port = %session.port_name(), "device disconnected while monitoring");
    }
    session.terminate();
    Ok(())
}

fn console(config: &PanelConfig, simulate: bool) -> Result<()> {
    let connector = {
        let config = config.clone();
        move || open_session(&config, simulate)
    };
    let worker = SessionWorker::spawn(
        &config.serial.port,
        config.worker_settings(),
        connector,
        print_event,
    )?;

    println!(
        "Commands: blink N ({}-{}), quit",
        BLINK_COUNT_RANGE.start(),
        BLINK_COUNT_RANGE.end()
    );
    let result = run_console(&worker, &spawn_stdin_reader()?);
    worker.join();
    result
}

/// Forward stdin lines over a channel so the console can notice a dead session
/// without waiting for the next keystroke. The thread is left blocked on stdin at exit.
fn spawn_stdin_reader() -> Result<mpsc::Receiver<io::Result<String>>> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("console-stdin".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                if tx.send(line).is_err() {
                    break;
                }
            }
        })
        .context("Failed to spawn stdin reader")?;
    Ok(rx)
}

/// Relay console input to the worker until `quit`, end of input, or the session ends.
fn run_console(
    worker: &SessionWorker,
    input: &mpsc::Receiver<io::Result<String>>,
) -> Result<()> {
    while worker.is_running() {
        let line = match input.recv_timeout(CONSOLE_POLL) {
            Ok(line) => line.context("Failed to read from stdin")?,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        if !handle_console_line(worker, &line) {
            break;
        }
    }
    Ok(())
}

/// Returns false when the user asked to quit.
fn handle_console_line(worker: &SessionWorker, line: &str) -> bool {
    let mut words = line.split_whitespace();
    match (words.next(), words.next()) {
        (Some("quit" | "exit"), _) => return false,
        (Some("blink"), Some(count)) => match count.parse::<u32>() {
            Ok(times) if worker.request_blink(times) => {}
            Ok(_) => println!("Device not ready"),
            Err(_) => println!("Not a number: {count}"),
        },
        (None, _) => {}
        _ => println!("Unknown command: {line}"),
    }
    true
}

fn print_event(event: SessionEvent) {
    match event {
        SessionEvent::Connecting { port } => println!("Connecting to {port}..."),
        SessionEvent::ConnectFailed { port, reason } => {
            println!("Could not connect to {port}: {reason}");
        }
        SessionEvent::StartupTimeout { port, waited } => {
            println!("No startup message from {port} after {waited:?}");
        }
        SessionEvent::Ready { port } => println!("{port} ready"),
        SessionEvent::CommandStarted { command } => println!("{command} ..."),
        SessionEvent::CommandSucceeded { command } => println!("{command} done"),
        SessionEvent::CommandFailed { command, reason } => {
            println!("{command} failed: {reason}");
        }
        SessionEvent::ConnectionLost { port } => println!("Lost connection to {port}"),
        SessionEvent::Terminated { port } => println!("Disconnected from {port}"),
    }
}
