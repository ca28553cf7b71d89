use anyhow::{Context, Result};
use clap::Parser;
use mt_sim::config::Args;
use mt_sim::console::Console;
use mt_sim::{
    ConnectionState, EventKind, LoopbackHandle, LoopbackTransport, SerialTransport, Simulator,
    Transport,
};
use std::fs::File;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

// The main entry point for the command-line simulator application.
fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args)?;

    if args.list_ports {
        return list_ports();
    }

    let settings = args.port_settings();
    let profile = args.instrument_profile().context("loading instrument profile")?;
    info!(
        address = %settings.address,
        baud = settings.baud_rate,
        model = %profile.model,
        "starting simulator"
    );

    if args.loopback {
        let (transport, remote) = LoopbackTransport::pair();
        let sim = Simulator::new(transport, settings, profile);
        run(sim, Some(remote), args.headless)
    } else {
        let sim = Simulator::new(SerialTransport::new(), settings, profile);
        run(sim, None, args.headless)
    }
}

fn init_logging(args: &Args) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match &args.log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("creating log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        // The console owns the terminal; without a log file it stays quiet.
        None if !args.headless && !args.list_ports => {}
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

fn list_ports() -> Result<()> {
    let ports = serialport::available_ports().context("enumerating serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found.");
    }
    for port in ports {
        println!("{}", port.port_name);
    }
    Ok(())
}

fn run<T: Transport>(
    sim: Simulator<T>,
    remote: Option<LoopbackHandle>,
    headless: bool,
) -> Result<()> {
    if headless {
        run_headless(sim)
    } else {
        Console::new(sim, remote)
            .run()
            .context("running interactive console")
    }
}

// Opens the port and serves requests until the connection closes.
fn run_headless<T: Transport>(mut sim: Simulator<T>) -> Result<()> {
    let bus = sim.events().clone();
    bus.subscribe(EventKind::State, |event| info!(event = %event, "state"))
        .context("starting state event handler")?;
    bus.subscribe(EventKind::Error, |event| error!(event = %event, "error"))
        .context("starting error event handler")?;

    sim.open()?;
    while sim.state().accepts_traffic() || sim.state() == ConnectionState::Closing {
        sim.wait_and_process(Duration::from_millis(100));
    }
    // Let the handler threads flush their last events.
    std::thread::sleep(Duration::from_millis(50));
    info!(state = %sim.state(), "simulator stopped");
    Ok(())
}
