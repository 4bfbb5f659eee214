//! Error types for the connection multiplexer
//!
//! `NetError` is the status taxonomy every client-facing command reports.
//! `StackError` is what the external protocol engine reports back from its own
//! commands and error callbacks; it is folded into `NetError` at the command
//! surface so clients only ever see one set of codes.

use alloc::string::String;

// ----------------------------------------------------------------------------
// Status Codes
// ----------------------------------------------------------------------------

/// Numeric status of a successful operation
pub const SUCCESS: i32 = 0;

// ----------------------------------------------------------------------------
// Client-facing Errors
// ----------------------------------------------------------------------------

cfg_if::cfg_if! {
    if #[cfg(feature = "std")] {
        /// Status taxonomy reported to clients
        #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
        pub enum NetError {
            /// Bad argument, unknown socket, wrong owner or wrong state
            #[error("Invalid argument or unknown connection")]
            Invalid,
            /// Registry full, event queue full, or the stack is out of buffers
            #[error("Out of memory")]
            NoMemory,
            /// Nothing is buffered on the connection yet
            #[error("Resource temporarily unavailable")]
            Again,
            /// Operation does not apply to the socket's protocol
            #[error("Protocol not supported for this operation")]
            ProtocolNotSupported,
            /// Local address or port already bound
            #[error("Address already in use")]
            InUse,
            /// The stack task is no longer running
            #[error("Stack task shut down")]
            Shutdown,
            /// Configuration rejected at startup
            #[error("Configuration error: {reason}")]
            Config { reason: String },
        }
    } else {
        /// Status taxonomy reported to clients (no_std version)
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub enum NetError {
            Invalid,
            NoMemory,
            Again,
            ProtocolNotSupported,
            InUse,
            Shutdown,
            Config { reason: String },
        }

        impl core::fmt::Display for NetError {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                match self {
                    NetError::Invalid => write!(f, "Invalid argument or unknown connection"),
                    NetError::NoMemory => write!(f, "Out of memory"),
                    NetError::Again => write!(f, "Resource temporarily unavailable"),
                    NetError::ProtocolNotSupported => {
                        write!(f, "Protocol not supported for this operation")
                    }
                    NetError::InUse => write!(f, "Address already in use"),
                    NetError::Shutdown => write!(f, "Stack task shut down"),
                    NetError::Config { reason } => write!(f, "Configuration error: {}", reason),
                }
            }
        }
    }
}

impl NetError {
    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        NetError::Config {
            reason: reason.into(),
        }
    }

    /// Stable numeric status, as carried in DNS result events
    pub fn code(&self) -> i32 {
        match self {
            NetError::Invalid => -1,
            NetError::NoMemory => -2,
            NetError::Again => -3,
            NetError::ProtocolNotSupported => -4,
            NetError::InUse => -5,
            NetError::Shutdown => -6,
            NetError::Config { .. } => -7,
        }
    }

    /// Inverse of [`NetError::code`] for the codes a client can receive.
    ///
    /// `Config` carries a reason string and is never encoded into an event,
    /// so its code does not map back.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -1 => Some(NetError::Invalid),
            -2 => Some(NetError::NoMemory),
            -3 => Some(NetError::Again),
            -4 => Some(NetError::ProtocolNotSupported),
            -5 => Some(NetError::InUse),
            -6 => Some(NetError::Shutdown),
            _ => None,
        }
    }
}

/// Result alias for client-facing operations
pub type NetResult<T> = core::result::Result<T, NetError>;

/// Encode an operation outcome as a numeric status
pub fn status_code<T>(result: &NetResult<T>) -> i32 {
    match result {
        Ok(_) => SUCCESS,
        Err(e) => e.code(),
    }
}

// ----------------------------------------------------------------------------
// Stack Errors
// ----------------------------------------------------------------------------

cfg_if::cfg_if! {
    if #[cfg(feature = "std")] {
        /// Error codes produced by the external protocol engine
        #[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
        pub enum StackError {
            #[error("Out of stack memory")]
            NoMemory,
            #[error("Address in use")]
            InUse,
            #[error("No route to host")]
            Route,
            #[error("Illegal value")]
            InvalidArgument,
            #[error("Operation in progress")]
            InProgress,
            #[error("Connection aborted")]
            Aborted,
            #[error("Connection reset")]
            Reset,
            #[error("Connection closed")]
            Closed,
            #[error("Timeout")]
            Timeout,
        }
    } else {
        /// Error codes produced by the external protocol engine (no_std version)
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum StackError {
            NoMemory,
            InUse,
            Route,
            InvalidArgument,
            InProgress,
            Aborted,
            Reset,
            Closed,
            Timeout,
        }

        impl core::fmt::Display for StackError {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                let text = match self {
                    StackError::NoMemory => "Out of stack memory",
                    StackError::InUse => "Address in use",
                    StackError::Route => "No route to host",
                    StackError::InvalidArgument => "Illegal value",
                    StackError::InProgress => "Operation in progress",
                    StackError::Aborted => "Connection aborted",
                    StackError::Reset => "Connection reset",
                    StackError::Closed => "Connection closed",
                    StackError::Timeout => "Timeout",
                };
                f.write_str(text)
            }
        }
    }
}

impl From<StackError> for NetError {
    fn from(err: StackError) -> Self {
        match err {
            StackError::NoMemory => NetError::NoMemory,
            StackError::InUse => NetError::InUse,
            _ => NetError::Invalid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip_for_client_errors() {
        for err in [
            NetError::Invalid,
            NetError::NoMemory,
            NetError::Again,
            NetError::ProtocolNotSupported,
            NetError::InUse,
            NetError::Shutdown,
        ] {
            assert!(err.code() < SUCCESS);
            assert_eq!(NetError::from_code(err.code()), Some(err));
        }
        assert_eq!(NetError::from_code(SUCCESS), None);
    }

    #[test]
    fn test_stack_error_mapping() {
        assert_eq!(NetError::from(StackError::NoMemory), NetError::NoMemory);
        assert_eq!(NetError::from(StackError::InUse), NetError::InUse);
        assert_eq!(NetError::from(StackError::Route), NetError::Invalid);
        assert_eq!(NetError::from(StackError::InvalidArgument), NetError::Invalid);
    }

    #[test]
    fn test_status_code() {
        let ok: NetResult<()> = Ok(());
        let full: NetResult<()> = Err(NetError::NoMemory);
        assert_eq!(status_code(&ok), SUCCESS);
        assert_eq!(status_code(&full), NetError::NoMemory.code());
    }
}
