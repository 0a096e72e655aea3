use std::fmt;

/// Error returned when acquiring a keyed lock fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireError {
    /// The wait was cancelled before the permit was granted.
    Cancelled,
    /// The key was rejected by the lock's key policy (e.g. an empty string).
    /// No table state is touched for an invalid key.
    InvalidKey,
    /// The keyed lock was closed before or while waiting.
    Closed,
}

impl fmt::Display for AcquireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => write!(f, "keyed lock acquire cancelled"),
            Self::InvalidKey => write!(f, "invalid key for keyed lock"),
            Self::Closed => write!(f, "keyed lock closed"),
        }
    }
}

impl std::error::Error for AcquireError {}
