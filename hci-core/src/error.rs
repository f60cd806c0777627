//! Host, buffer and driver error types.

/// Error returned by buffer framing operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BufError {
    /// `push` asked for more bytes than the headroom holds.
    NoHeadroom,
    /// `add` asked for more bytes than the tailroom holds.
    NoTailroom,
    /// `pull` asked for more bytes than the buffer contains.
    Underflow,
}

impl core::fmt::Display for BufError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            BufError::NoHeadroom => f.write_str("not enough headroom"),
            BufError::NoTailroom => f.write_str("not enough tailroom"),
            BufError::Underflow => f.write_str("buffer underflow"),
        }
    }
}

impl core::error::Error for BufError {}

/// Error reported by a transport driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriverError {
    /// The underlying link could not be opened.
    Open,
    /// I/O error on the underlying link.
    Io(embedded_io::ErrorKind),
}

impl core::fmt::Display for DriverError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DriverError::Open => f.write_str("driver open failed"),
            DriverError::Io(kind) => write!(f, "driver I/O error: {:?}", kind),
        }
    }
}

impl core::error::Error for DriverError {}

impl embedded_io::Error for DriverError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            Self::Open => embedded_io::ErrorKind::NotConnected,
            Self::Io(kind) => *kind,
        }
    }
}

/// Error returned by the HCI host API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The buffer pool is exhausted. Retryable.
    NoBufs,
    /// No driver is registered.
    NoDevice,
    /// A driver is already registered.
    AlreadyRegistered,
    /// The driver lacks a required capability or reserves too much headroom.
    InvalidDriver,
    /// The controller lacks a capability the host requires (LE).
    NotSupported,
    /// `start()` already ran.
    AlreadyStarted,
    /// The host has not been started.
    NotStarted,
    /// The transport driver failed.
    Driver(DriverError),
    /// A bounded wait elapsed.
    Timeout,
    /// The in-flight command was retired by a completion for another opcode.
    UnexpectedOpcode {
        /// Opcode of the command that was in flight.
        expected: u16,
        /// Opcode carried by the completion event.
        got: u16,
    },
    /// Framing error while building a command.
    Buf(BufError),
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::NoBufs => f.write_str("no free buffers"),
            Error::NoDevice => f.write_str("no HCI driver registered"),
            Error::AlreadyRegistered => f.write_str("HCI driver already registered"),
            Error::InvalidDriver => f.write_str("invalid HCI driver"),
            Error::NotSupported => f.write_str("controller has no supported capability"),
            Error::AlreadyStarted => f.write_str("HCI host already started"),
            Error::NotStarted => f.write_str("HCI host not started"),
            Error::Driver(e) => write!(f, "{}", e),
            Error::Timeout => f.write_str("command timed out"),
            Error::UnexpectedOpcode { expected, got } => write!(
                f,
                "unexpected completion of opcode 0x{:04X} (expected 0x{:04X})",
                got, expected
            ),
            Error::Buf(e) => write!(f, "{}", e),
        }
    }
}

impl core::error::Error for Error {}

impl From<DriverError> for Error {
    fn from(e: DriverError) -> Self {
        Self::Driver(e)
    }
}

impl From<BufError> for Error {
    fn from(e: BufError) -> Self {
        Self::Buf(e)
    }
}
