use core::fmt;

/// Errors returned by the driver
///
/// An error is either returned immediately, or delivered as the result
/// of a [`Completion`](crate::Completion).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Error {
    /// The endpoint, or the device, is already open
    AlreadyConfigured,
    /// The endpoint, or the device, isn't open
    NotConfigured,
    /// The endpoint already has a transfer in flight
    InProgress,
    /// The request names something that doesn't exist, or carries
    /// arguments that the driver can't accept
    InvalidParams,
    /// The transfer was cancelled by a flush, close, or bus reset
    IoCancelled,
    /// The hardware didn't acknowledge a handshake in time
    Hardware,
    /// The controller can't do what was asked
    NotSupported,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::AlreadyConfigured => write!(f, "already configured"),
            Error::NotConfigured => write!(f, "not configured"),
            Error::InProgress => write!(f, "transfer in progress"),
            Error::InvalidParams => write!(f, "invalid parameters"),
            Error::IoCancelled => write!(f, "I/O cancelled"),
            Error::Hardware => write!(f, "hardware handshake timed out"),
            Error::NotSupported => write!(f, "not supported"),
        }
    }
}
