use canpipe_frame::FrameError;

/// Errors raised by the message pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// No free slot left.
    #[error("message pool exhausted")]
    Exhausted,

    /// A slot failed its integrity check and has been taken out of service.
    #[error("message slot {index} failed its integrity check")]
    Corrupt { index: usize },

    /// The handle was not issued by this pool, or was already returned.
    #[error("handle does not belong to this pool")]
    ForeignHandle,
}

/// Errors that can occur in driver operations.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// A written record was rejected.
    #[error("protocol error: {0}")]
    Protocol(#[from] FrameError),

    /// No message slot was available. Retry later.
    #[error("no message slot available")]
    PoolExhausted,

    /// Message pool integrity error.
    #[error("pool error: {0}")]
    Pool(PoolError),

    /// The client has not enabled message acceptance.
    #[error("client is not accepting messages")]
    NotAccepting,

    /// Read buffer cannot hold one record.
    #[error("buffer of {len} bytes is smaller than one record ({needed} bytes)")]
    BufferTooSmall { len: usize, needed: usize },

    /// A blocked read was cancelled.
    #[error("read interrupted")]
    Interrupted,

    /// The device was shut down or the client closed.
    #[error("device closed")]
    Closed,

    /// Invalid device configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl DriverError {
    /// True when the same call may succeed if repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PoolExhausted | Self::Interrupted)
    }
}

impl From<PoolError> for DriverError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Exhausted => Self::PoolExhausted,
            other => Self::Pool(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, DriverError>;
