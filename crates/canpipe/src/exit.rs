use std::fmt;
use std::io;

use canpipe_driver::DriverError;
use canpipe_frame::FrameError;
use canpipe_hw::HwError;

// Exit code constants aligned with sysexits-style semantics.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const DEVICE_ERROR: i32 = 3;
pub const CONFIG_INVALID: i32 = 40;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const INTERNAL: i32 = 125;
pub const INTERRUPTED: i32 = 130;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::NotFound => USAGE,
        io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => DATA_INVALID,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn hw_error(context: &str, err: HwError) -> CliError {
    CliError::new(DEVICE_ERROR, format!("{context}: {err}"))
}

pub fn driver_error(context: &str, err: DriverError) -> CliError {
    match err {
        DriverError::Protocol(err) => frame_error(context, err),
        DriverError::Config(_) => CliError::new(CONFIG_INVALID, format!("{context}: {err}")),
        DriverError::Interrupted => CliError::new(INTERRUPTED, format!("{context}: {err}")),
        DriverError::PoolExhausted | DriverError::Pool(_) => {
            CliError::new(DEVICE_ERROR, format!("{context}: {err}"))
        }
        DriverError::Closed => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}
