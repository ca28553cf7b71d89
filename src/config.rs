//! Process-level configuration for the simulator binary.

use crate::error::ConfigError;
use crate::profile::InstrumentProfile;
use crate::transport::PortSettings;
use clap::Parser;
use std::path::PathBuf;

/// Baud rates offered by MT-SICS balances.
pub const BAUD_RATES: [u32; 6] = [2400, 4800, 9600, 19200, 38400, 57600];

#[derive(Debug, Clone, Parser)]
#[command(name = "simulator_cli", version, about = "MT-SICS laboratory balance simulator")]
pub struct Args {
    /// Serial device to listen on.
    #[arg(long, env = "TTY", default_value = "/dev/ttyUSB1")]
    pub tty: String,

    /// Line speed. Framing is fixed at 8N1.
    #[arg(long, env = "BAUD", default_value_t = 38400, value_parser = parse_baud)]
    pub baud: u32,

    /// TOML file overriding the built-in instrument profile.
    #[arg(long)]
    pub profile: Option<PathBuf>,

    /// Use an in-memory port instead of a serial device.
    #[arg(long)]
    pub loopback: bool,

    /// Run without the interactive console.
    #[arg(long)]
    pub headless: bool,

    /// Write logs to this file.
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Print the serial ports found on this machine and exit.
    #[arg(long)]
    pub list_ports: bool,
}

fn parse_baud(value: &str) -> Result<u32, String> {
    let rate: u32 = value
        .parse()
        .map_err(|_| format!("'{value}' is not a number"))?;
    if BAUD_RATES.contains(&rate) {
        Ok(rate)
    } else {
        Err(format!("unsupported baud rate {rate}, expected one of {BAUD_RATES:?}"))
    }
}

impl Args {
    pub fn port_settings(&self) -> PortSettings {
        let address = if self.loopback { "loopback" } else { self.tty.as_str() };
        PortSettings::new(address, self.baud)
    }

    /// The profile file if one was given, the built-in profile otherwise.
    pub fn instrument_profile(&self) -> Result<InstrumentProfile, ConfigError> {
        match &self.profile {
            Some(path) => InstrumentProfile::load(path),
            None => Ok(InstrumentProfile::default()),
        }
    }
}
