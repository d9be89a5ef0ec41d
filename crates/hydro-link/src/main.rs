//! hydroctl - operate the hydroponics controller from a terminal.
//!
//! # Usage
//!
//! ```bash
//! # List serial ports
//! hydroctl ports
//!
//! # Take three readings, five seconds apart
//! hydroctl --port /dev/ttyACM0 read --count 3 --interval-ms 5000
//!
//! # Switch lamp channel 1 on
//! hydroctl lamp lamp on 1
//!
//! # Send any command line as typed
//! hydroctl send GET_SENSORS
//!
//! # Print readings until Ctrl-C, reconnecting when the board is unplugged
//! hydroctl monitor
//!
//! # Try any of the above without hardware
//! hydroctl --simulate read
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hydro_link::{
    Command, DeviceInterface, LinkConfig, PortProvider, SensorReading, SimulatedController,
    SystemPorts, WorkerStats, SIM_PORT,
};

/// How long `lamp` and `send` wait for the worker to write the command.
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Hydroponics controller tool
#[derive(Parser)]
#[command(name = "hydroctl")]
#[command(version)]
#[command(about = "Read sensors and switch lamps on the hydroponics controller")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// YAML link configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Serial port (overrides the configuration file)
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Baud rate (overrides the configuration file)
    #[arg(short, long, global = true)]
    baud: Option<u32>,

    /// Talk to an in-process simulated controller instead of hardware
    #[arg(long, global = true)]
    simulate: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Serve Prometheus metrics on this address
    #[cfg(feature = "prometheus")]
    #[arg(long, global = true)]
    metrics_addr: Option<std::net::SocketAddr>,
}

#[derive(Subcommand)]
enum Commands {
    /// List available serial ports
    Ports,

    /// Connect and print sensor readings
    Read {
        /// Number of readings
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,

        /// Pause between readings
        #[arg(short, long, default_value_t = 2000)]
        interval_ms: u64,
    },

    /// Send a lamp command and wait for it to be delivered
    Lamp {
        /// Device identifier (e.g. lamp)
        device: String,

        /// Action (e.g. on, off)
        action: String,

        /// Channel (e.g. 1)
        channel: String,
    },

    /// Send a command line as typed
    Send {
        /// Command text (e.g. GET_SENSORS, lampoff2)
        text: String,
    },

    /// Print readings until Ctrl-C, reconnecting as needed
    Monitor {
        /// Pause between readings
        #[arg(short, long, default_value_t = 5000)]
        interval_ms: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    #[cfg(feature = "prometheus")]
    if let Some(addr) = cli.metrics_addr {
        hydro_metrics::install_prometheus(addr).context("failed to start Prometheus exporter")?;
        info!("Serving metrics on http://{}/metrics", addr);
    }

    let config = build_config(&cli)?;
    let provider: Arc<dyn PortProvider> = if cli.simulate {
        Arc::new(SimulatedController::new())
    } else {
        Arc::new(SystemPorts)
    };
    let device = DeviceInterface::with_provider(config, provider);

    match cli.command {
        Commands::Ports => list_ports(&device),
        Commands::Read { count, interval_ms } => {
            read(&device, count, Duration::from_millis(interval_ms))
        }
        Commands::Lamp { device: id, action, channel } => lamp(&device, &id, &action, &channel),
        Commands::Send { text } => send(&device, &text),
        Commands::Monitor { interval_ms } => monitor(&device, Duration::from_millis(interval_ms)),
    }
}

fn build_config(cli: &Cli) -> Result<LinkConfig> {
    let mut config = match &cli.config {
        Some(path) => LinkConfig::load(path)?,
        None => LinkConfig::default(),
    };
    if cli.simulate {
        config.port = SIM_PORT.to_string();
    }
    if let Some(port) = &cli.port {
        config.port = port.clone();
    }
    if let Some(baud) = cli.baud {
        config.baud_rate = baud;
    }
    Ok(config)
}

fn list_ports(device: &DeviceInterface) -> Result<()> {
    let ports = device.available_ports().context("failed to list serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{}", port);
    }
    Ok(())
}

fn connect(device: &DeviceInterface) -> Result<()> {
    if !device.connect(None) {
        bail!("could not connect to {}", device.connection_info().port);
    }
    Ok(())
}

/// Queue a query and wait for the worker to either publish or give up on it.
fn fresh_reading(device: &DeviceInterface) -> Option<SensorReading> {
    let before = device.worker_stats();
    device.request_sensor_reading();
    await_reading(device, before)
}

fn await_reading(device: &DeviceInterface, before: WorkerStats) -> Option<SensorReading> {
    let config = device.config();
    let deadline = Instant::now()
        + config.response_deadline()
        + config.fault_backoff()
        + Duration::from_secs(1);
    while Instant::now() < deadline {
        let now = device.worker_stats();
        if now.readings_published > before.readings_published {
            return device.latest_reading();
        }
        if now.query_timeouts > before.query_timeouts || now.link_faults > before.link_faults {
            return None;
        }
        thread::sleep(Duration::from_millis(20));
    }
    None
}

/// Wait until the worker has written something and the queue is empty.
fn await_delivery(device: &DeviceInterface, before: WorkerStats) -> Result<()> {
    let deadline = Instant::now() + DELIVERY_TIMEOUT;
    while Instant::now() < deadline {
        let stats = device.worker_stats();
        if device.pending_commands() == 0 && stats.commands_written > before.commands_written {
            return Ok(());
        }
        thread::sleep(Duration::from_millis(20));
    }
    bail!(
        "command still queued after {:?} ({} pending)",
        DELIVERY_TIMEOUT,
        device.pending_commands()
    )
}

fn read(device: &DeviceInterface, count: u32, interval: Duration) -> Result<()> {
    connect(device)?;
    for i in 0..count {
        if i > 0 {
            thread::sleep(interval);
        }
        match fresh_reading(device) {
            Some(reading) => println!("{}", reading),
            None => warn!("No reading from the controller"),
        }
    }
    device.disconnect();
    Ok(())
}

fn lamp(device: &DeviceInterface, id: &str, action: &str, channel: &str) -> Result<()> {
    let command = Command::control(id, action, channel)?;
    connect(device)?;
    let before = device.worker_stats();
    device.control_lamp(id, action, channel);

    let delivered = await_delivery(device, before);
    device.disconnect();
    delivered?;
    println!("Sent {}", command);
    Ok(())
}

fn send(device: &DeviceInterface, text: &str) -> Result<()> {
    let command = Command::raw(text)?;
    connect(device)?;
    let before = device.worker_stats();
    let expects_reading = command.expects_reading();
    device.send_command(command.clone());

    if expects_reading {
        match await_reading(device, before) {
            Some(reading) => println!("{}", reading),
            None => warn!("No reading from the controller"),
        }
        device.disconnect();
        return Ok(());
    }

    let delivered = await_delivery(device, before);
    device.disconnect();
    delivered?;
    println!("Sent {}", command);
    Ok(())
}

fn monitor(device: &DeviceInterface, interval: Duration) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("failed to install Ctrl-C handler")?;

    info!("Monitoring {} (Ctrl-C to stop)", device.connection_info().port);
    while running.load(Ordering::SeqCst) {
        if !device.try_reconnect() {
            warn!("Controller not connected; retrying");
        } else if let Some(reading) = fresh_reading(device) {
            println!("{}", reading);
        }

        let wake = Instant::now() + interval;
        while running.load(Ordering::SeqCst) && Instant::now() < wake {
            thread::sleep(Duration::from_millis(100));
        }
    }

    let stats = device.worker_stats();
    device.disconnect();
    info!(
        "Stopped: {} readings, {} timeouts, {} faults, {} dropped",
        stats.readings_published, stats.query_timeouts, stats.link_faults, stats.dead_lettered
    );
    Ok(())
}
