/// Errors reported by controller tooling.
///
/// The accessor trait itself is infallible, like register access; these
/// cover the simulator's injection API.
#[derive(Debug, thiserror::Error)]
pub enum HwError {
    /// The slot index is not a receive mailbox.
    #[error("slot {0} is not a receive slot")]
    InvalidSlot(usize),

    /// Every receive mailbox already holds an undrained frame.
    #[error("no free receive slot")]
    NoFreeSlot,

    /// The slot already holds an undrained frame.
    #[error("receive slot {0} is occupied")]
    SlotOccupied(usize),
}

pub type Result<T> = std::result::Result<T, HwError>;
