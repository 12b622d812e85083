use std::path::PathBuf;

use canpipe_driver::DeviceConfig;
use canpipe_hw::{Register, RX_SLOT_COUNT};
use clap::{Args, Subcommand};

use crate::exit::{driver_error, CliResult};
use crate::output::OutputFormat;

pub mod registers;
pub mod replay;
pub mod simulate;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Drive a simulated controller with readers, traffic and writes.
    Simulate(SimulateArgs),
    /// Feed a capture of 20-byte records through the receive path.
    Replay(ReplayArgs),
    /// Read controller registers through the client control surface.
    Registers(RegistersArgs),
    /// Show version information.
    Version(VersionArgs),
}

/// Device settings shared by commands that start a device.
#[derive(Args, Debug, Default, Clone)]
pub struct DeviceArgs {
    /// JSON device config file.
    #[arg(long, value_name = "FILE", env = "CANPIPE_CONFIG", global = true)]
    pub config: Option<PathBuf>,
    /// Override the message pool capacity.
    #[arg(long, value_name = "SLOTS", global = true)]
    pub pool_capacity: Option<usize>,
    /// Override the device name.
    #[arg(long, value_name = "NAME", global = true)]
    pub device_name: Option<String>,
}

impl DeviceArgs {
    /// Defaults, then the config file, then flags.
    pub fn resolve(&self) -> CliResult<DeviceConfig> {
        let mut config = match &self.config {
            Some(path) => DeviceConfig::from_json_file(path)
                .map_err(|err| driver_error("config load failed", err))?,
            None => DeviceConfig::default(),
        };
        if let Some(capacity) = self.pool_capacity {
            config.pool_capacity = capacity;
        }
        if let Some(name) = &self.device_name {
            config.name = name.clone();
        }
        config
            .validate()
            .map_err(|err| driver_error("invalid config", err))?;
        Ok(config)
    }
}

pub fn run(command: Command, device: &DeviceArgs, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Simulate(args) => simulate::run(args, device, format),
        Command::Replay(args) => replay::run(args, device, format),
        Command::Registers(args) => registers::run(args, device, format),
        Command::Version(args) => version::run(args),
    }
}

/// At most one record per receive slot fits in one interrupt.
const MAX_BATCH: u64 = RX_SLOT_COUNT as u64;

fn parse_timer(raw: &str) -> Result<u16, String> {
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => raw.parse(),
    };
    parsed.map_err(|_| format!("not a 16-bit timer value: {raw}"))
}

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Number of reading clients.
    #[arg(long, default_value = "2")]
    pub clients: usize,
    /// Frames to inject.
    #[arg(long, default_value = "32")]
    pub frames: u32,
    /// Frames latched per interrupt (at most one per receive slot).
    #[arg(long, default_value = "8", value_parser = clap::value_parser!(u64).range(1..=MAX_BATCH))]
    pub burst: u64,
    /// Frames written by the first client.
    #[arg(long, default_value = "4")]
    pub writes: u32,
    /// Timer value for the first injected frame (decimal or 0x-hex).
    #[arg(long, default_value = "0xffc0", value_parser = parse_timer)]
    pub start_timer: u16,
    /// Timer ticks between consecutive frames.
    #[arg(long, default_value = "16")]
    pub tick: u16,
    /// Raise these error/status register bits before the first burst (0x-hex).
    #[arg(long, value_name = "BITS", value_parser = parse_esr1)]
    pub raise_errors: Option<u32>,
    /// Echo written frames back through the receive path.
    #[arg(long)]
    pub loopback: bool,
    /// Print only the summary.
    #[arg(long)]
    pub quiet: bool,
}

fn parse_esr1(raw: &str) -> Result<u32, String> {
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw);
    u32::from_str_radix(digits, 16).map_err(|_| format!("not a hex register value: {raw}"))
}

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Capture file of back-to-back 20-byte records.
    pub capture: PathBuf,
    /// Records latched per interrupt.
    #[arg(long, default_value = "16", value_parser = clap::value_parser!(u64).range(1..=MAX_BATCH))]
    pub batch: u64,
    /// Write every delivered record to this file.
    #[arg(long, value_name = "FILE")]
    pub out: Option<PathBuf>,
    /// Print only the summary.
    #[arg(long)]
    pub quiet: bool,
}

#[derive(Args, Debug)]
pub struct RegistersArgs {
    /// Registers to read; all of them when omitted.
    #[arg(value_enum)]
    pub registers: Vec<Register>,
    /// Enable loopback before reading.
    #[arg(long)]
    pub loopback: bool,
    /// Disable self-reception before reading.
    #[arg(long)]
    pub no_self_reception: bool,
    /// Raise these error/status register bits before reading (0x-hex).
    #[arg(long, value_name = "BITS", value_parser = parse_esr1)]
    pub raise_errors: Option<u32>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(clap::Parser)]
    struct SimulateHarness {
        #[command(flatten)]
        args: SimulateArgs,
    }

    #[test]
    fn burst_bounds() {
        let parse = |burst: &str| SimulateHarness::try_parse_from(["simulate", "--burst", burst]);
        assert_eq!(parse("1").unwrap().args.burst, 1);
        assert_eq!(parse("62").unwrap().args.burst, 62);
        assert!(parse("0").is_err());
        assert!(parse("63").is_err());
        assert!(parse("many").is_err());
    }

    #[test]
    fn timer_accepts_hex_and_decimal() {
        assert_eq!(parse_timer("0xffc0"), Ok(0xFFC0));
        assert_eq!(parse_timer("100"), Ok(100));
        assert!(parse_timer("0x10000").is_err());
    }

    #[test]
    fn esr1_is_hex() {
        assert_eq!(parse_esr1("0x2002"), Ok(0x2002));
        assert_eq!(parse_esr1("20000"), Ok(0x20000));
    }

    #[test]
    fn flags_override_config() {
        let args = DeviceArgs {
            config: None,
            pool_capacity: Some(32),
            device_name: Some("vcan".to_string()),
        };
        let config = args.resolve().unwrap();
        assert_eq!(config.pool_capacity, 32);
        assert_eq!(config.name, "vcan");
    }

    #[test]
    fn zero_capacity_is_config_error() {
        let args = DeviceArgs {
            pool_capacity: Some(0),
            ..DeviceArgs::default()
        };
        let err = args.resolve().unwrap_err();
        assert_eq!(err.code, crate::exit::CONFIG_INVALID);
    }
}
