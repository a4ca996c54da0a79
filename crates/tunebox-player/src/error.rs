use thiserror::Error;

/// Validation failures reported back to the client that issued a command.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlayerError {
    /// The playlist changed since the client's snapshot in a way that moves `index`.
    #[error("index has been altered")]
    StaleIndex,
    #[error("index {index} is out of range (playlist has {len} songs)")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("song {0} is already playing")]
    AlreadyCurrent(usize),
    #[error("no songs given")]
    NothingToAdd,
}
