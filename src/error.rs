use thiserror::Error;

/// Status codes observable at the stub interface.
///
/// These are the error values exchanged with the host capabilities; the
/// successful outcome is an `Ok(())` and has no variant here. Each carries a
/// small numeric code which is what ends up in an `E nn` wire reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// A parameter to an internal routine or capability call was invalid.
    #[error("invalid parameter")]
    InvalidParameter,

    /// Growing a buffer failed or would exceed the configured maximum.
    #[error("out of memory")]
    NoMemory,

    /// No data is available right now; retry later.
    ///
    /// Surfaces from `Io::read` when the transport momentarily has nothing
    /// despite a positive peek.
    #[error("no data available, try again")]
    TryAgain,

    /// A bug in the protocol engine itself.
    #[error("internal error")]
    InternalError,

    /// The debugger closed the connection.
    #[error("peer disconnected")]
    PeerDisconnected,

    /// The target does not implement the requested operation.
    ///
    /// For optional target hooks this collapses into an empty reply, telling
    /// GDB to fall back to another mechanism.
    #[error("not supported")]
    NotSupported,

    /// The remote end violated the remote serial protocol.
    #[error("protocol violation")]
    ProtocolViolation,

    /// A fixed-size buffer was too small for the request.
    #[error("buffer overflow")]
    BufferOverflow,

    /// A named entity (eg. a monitor command) was not found.
    #[error("not found")]
    NotFound,
}

impl Error {
    /// The numeric status code of this error.
    ///
    /// Matches the values a host sees at the interface boundary: negative for
    /// errors, positive for the informational `TryAgain`.
    pub fn code(self) -> i32 {
        match self {
            Error::InvalidParameter => -1,
            Error::NoMemory => -2,
            Error::TryAgain => 3,
            Error::InternalError => -4,
            Error::PeerDisconnected => -5,
            Error::NotSupported => -6,
            Error::ProtocolViolation => -7,
            Error::BufferOverflow => -8,
            Error::NotFound => -9,
        }
    }

    /// The two-digit code sent in an `E nn` reply: `(-code) & 0xff`.
    pub(crate) fn wire_code(self) -> u8 {
        (-self.code() & 0xff) as u8
    }
}
