//! Error types for the AMC100 client.
//!
//! Every operation of the controller reports one of a fixed set of integer
//! result codes. This module keeps that taxonomy intact ([`NcbCode`]) and
//! builds the library error type, [`AmcError`], on top of it with the
//! `thiserror` crate.
//!
//! ## Error Hierarchy
//!
//! - **Controller kinds** (`Unspecified`, `NotConnected`, `DriverError`,
//!   `NetworkError`, `BadAddress`, `ConnectionTimeout`, `NoDeviceFound`,
//!   `InvalidParam`, `FeatureNotAvailable`): one variant per result code.
//! - **`AccessDenied`**: the device is locked and this session has not been
//!   granted access. On the integer surface it collapses to `NCB_Error`.
//! - **`Io`** / **`Protocol`**: transport failures that have not yet been
//!   classified. Both report as driver or network errors.
//! - **`Config`**: configuration loading or validation problems.
//!
//! Use [`AmcError::code`] to obtain the integer code and
//! [`AmcError::recovery`] to find out whether the session is known to survive
//! the failure.

use std::fmt;
use thiserror::Error;

/// Convenience alias for results using the client error type.
pub type AmcResult<T> = std::result::Result<T, AmcError>;

/// Integer result codes of the controller interface.
///
/// Values are fixed and must not change: they are what C callers and the
/// wire protocol exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum NcbCode {
    /// No error.
    Ok = 0,
    /// Unspecified error.
    Error = -1,
    /// No active connection to the device.
    NotConnected = -2,
    /// Error in communication with the driver.
    DriverError = -3,
    /// Network error when connecting to the device.
    NetworkError = -4,
    /// Malformed device address.
    BadIpAddress = -5,
    /// Connection attempt or reply timed out.
    ConnectionTimeout = -6,
    /// No device answered at the given address.
    NoDeviceFound = -7,
    /// Parameter out of range.
    InvalidParam = -9,
    /// Feature only available in the pro edition.
    FeatureNotAvailable = 10,
}

impl NcbCode {
    /// Every defined code, in header order.
    pub const ALL: [NcbCode; 10] = [
        NcbCode::Ok,
        NcbCode::Error,
        NcbCode::NotConnected,
        NcbCode::DriverError,
        NcbCode::NetworkError,
        NcbCode::BadIpAddress,
        NcbCode::ConnectionTimeout,
        NcbCode::NoDeviceFound,
        NcbCode::InvalidParam,
        NcbCode::FeatureNotAvailable,
    ];

    /// Raw integer value.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Look up a code by its integer value.
    pub fn from_i32(raw: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|code| code.as_i32() == raw)
    }

    /// Symbolic name as written in the original header.
    pub fn name(self) -> &'static str {
        match self {
            NcbCode::Ok => "NCB_Ok",
            NcbCode::Error => "NCB_Error",
            NcbCode::NotConnected => "NCB_NotConnected",
            NcbCode::DriverError => "NCB_DriverError",
            NcbCode::NetworkError => "NCB_NetworkError",
            NcbCode::BadIpAddress => "BAD_IP_ADDRESS",
            NcbCode::ConnectionTimeout => "CONNECTION_TIMEOUT",
            NcbCode::NoDeviceFound => "NO_DEVICE_FOUND_ERR",
            NcbCode::InvalidParam => "NCB_InvalidParam",
            NcbCode::FeatureNotAvailable => "NCB_FeatureNotAvailable",
        }
    }
}

impl fmt::Display for NcbCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.as_i32())
    }
}

/// What a caller can assume about the session after an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// The request was rejected; the session is unaffected.
    None,
    /// The request may succeed if repeated on the same session.
    Retry,
    /// The session is gone; connect again.
    Reconnect,
    /// Not known without checking the real driver. Treat the session as
    /// suspect: probe it with a cheap query before trusting it again.
    Unknown,
}

/// Primary error type for the client.
#[derive(Error, Debug)]
pub enum AmcError {
    /// Unspecified controller error.
    #[error("Unspecified error: {0}")]
    Unspecified(String),

    /// The handle was never connected or has been closed.
    #[error("No active connection to device")]
    NotConnected,

    /// The driver reported a failure or answered with something unusable.
    #[error("Driver error: {0}")]
    DriverError(String),

    /// The network link to the controller failed.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The device address could not be parsed.
    #[error("Bad device address '{0}'")]
    BadAddress(String),

    /// Connecting or waiting for a reply took too long.
    #[error("Connection timeout: {0}")]
    ConnectionTimeout(String),

    /// Nothing answered at the address.
    #[error("No device found at '{0}'")]
    NoDeviceFound(String),

    /// A parameter is out of range or not applicable.
    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    /// The feature is not part of the installed edition.
    #[error("Feature not available: {0}")]
    FeatureNotAvailable(String),

    /// The device is locked and this session has not been granted access.
    #[error("Access denied: device is locked")]
    AccessDenied,

    /// Raw transport I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed exchange on the wire.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Configuration could not be loaded or is inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AmcError {
    /// Integer result code as defined by the controller interface.
    pub fn code(&self) -> NcbCode {
        match self {
            AmcError::Unspecified(_) | AmcError::AccessDenied | AmcError::Config(_) => {
                NcbCode::Error
            }
            AmcError::NotConnected => NcbCode::NotConnected,
            AmcError::DriverError(_) | AmcError::Protocol(_) => NcbCode::DriverError,
            AmcError::NetworkError(_) | AmcError::Io(_) => NcbCode::NetworkError,
            AmcError::BadAddress(_) => NcbCode::BadIpAddress,
            AmcError::ConnectionTimeout(_) => NcbCode::ConnectionTimeout,
            AmcError::NoDeviceFound(_) => NcbCode::NoDeviceFound,
            AmcError::InvalidParam(_) => NcbCode::InvalidParam,
            AmcError::FeatureNotAvailable(_) => NcbCode::FeatureNotAvailable,
        }
    }

    /// Rebuild an error from a code received from the controller.
    ///
    /// Returns `None` for [`NcbCode::Ok`]. Unknown integers map to
    /// [`AmcError::Unspecified`].
    pub fn from_code(raw: i32, message: impl Into<String>) -> Option<Self> {
        let message = message.into();
        let err = match NcbCode::from_i32(raw) {
            Some(NcbCode::Ok) => return None,
            Some(NcbCode::Error) => AmcError::Unspecified(message),
            Some(NcbCode::NotConnected) => AmcError::NotConnected,
            Some(NcbCode::DriverError) => AmcError::DriverError(message),
            Some(NcbCode::NetworkError) => AmcError::NetworkError(message),
            Some(NcbCode::BadIpAddress) => AmcError::BadAddress(message),
            Some(NcbCode::ConnectionTimeout) => AmcError::ConnectionTimeout(message),
            Some(NcbCode::NoDeviceFound) => AmcError::NoDeviceFound(message),
            Some(NcbCode::InvalidParam) => AmcError::InvalidParam(message),
            Some(NcbCode::FeatureNotAvailable) => AmcError::FeatureNotAvailable(message),
            None => AmcError::Unspecified(format!("unknown result code {raw}: {message}")),
        };
        Some(err)
    }

    /// Whether the session is known to survive this error.
    ///
    /// Network and driver failures return [`Recovery::Unknown`]: the
    /// vendor interface does not say whether a handle stays usable after
    /// them, so this layer does not guess.
    pub fn recovery(&self) -> Recovery {
        match self {
            AmcError::InvalidParam(_)
            | AmcError::FeatureNotAvailable(_)
            | AmcError::AccessDenied
            | AmcError::Config(_) => Recovery::None,
            AmcError::ConnectionTimeout(_) => Recovery::Retry,
            AmcError::NotConnected
            | AmcError::BadAddress(_)
            | AmcError::NoDeviceFound(_) => Recovery::Reconnect,
            AmcError::Unspecified(_)
            | AmcError::DriverError(_)
            | AmcError::NetworkError(_)
            | AmcError::Io(_)
            | AmcError::Protocol(_) => Recovery::Unknown,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        AmcError::InvalidParam(message.into())
    }
}
