//! All possible non-I/O protocol errors.
//!
use core::{
    error,
    fmt::{Display, Formatter},
};
use std::io::{self, ErrorKind};

/// Enumeration of all possible non-I/O protocol errors.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum Error {
    /// The peer sent bytes that cannot be decoded into frames.
    ///
    /// This covers a frame length prefix that promises more bytes than ever
    /// arrive, and masked input that yields no valid decode. The session
    /// cannot continue and must be closed.
    MalformedInput(MalformedInput),

    /// A cryptographic operation failed or would be unsafe to perform.
    ///
    /// On decryption failure the output region has already been zeroed;
    /// no plaintext state leaks. The session must be closed.
    CryptoFailure(CryptoFailure),

    /// The underlying transport failed (upstream I/O error, client
    /// disconnect). The session must be closed.
    TransportFailure,

    /// A resource bound was hit: the session registry is full, or a mask
    /// call would exceed its output ceiling.
    ResourceExhausted(ResourceExhausted),

    /// An operation referenced an unknown or already-closed session token.
    ///
    /// The transport boundary should answer not-found; the session state is
    /// unaffected.
    ProtocolState(ProtocolState),
}

/// Undecodable input from the peer.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum MalformedInput {
    /// A frame length prefix promised more bytes than the transport
    /// delivered before the connection ended.
    TruncatedFrame {
        /// Declared body length.
        declared: usize,
        /// Bytes actually buffered when the stream ended.
        buffered: usize,
    },

    /// An upload body line was not valid base64.
    BadLineEncoding,
}

/// Failures in the AEAD path.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum CryptoFailure {
    /// The authentication tag did not verify.
    TagMismatch,

    /// A key or nonce of the wrong length was supplied.
    BadKeyOrNonceLength {
        /// The offending length.
        received: usize,
    },

    /// The frame body is too short to contain the cipher's fixed overhead.
    BodyTooShort {
        /// The received body length.
        received: usize,
    },

    /// The send-nonce counter is about to wrap; no further frames may be
    /// sealed under this key.
    NonceExhausted,
}

/// Resource bounds.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum ResourceExhausted {
    /// The session registry reached its configured capacity.
    RegistryFull,

    /// A single mask call would exceed the output ceiling.
    MaskOutputCeiling {
        /// Bytes the call would have produced.
        needed: usize,
    },
}

/// Operations on sessions that do not exist (any more).
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum ProtocolState {
    /// No session is registered under the presented token.
    UnknownToken,

    /// The session exists but has already been closed.
    SessionClosed,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::MalformedInput(err) => write!(f, "MalformedInput: {}", err),
            Error::CryptoFailure(err) => write!(f, "CryptoFailure: {}", err),
            Error::TransportFailure => write!(f, "TransportFailure"),
            Error::ResourceExhausted(err) => write!(f, "ResourceExhausted: {}", err),
            Error::ProtocolState(err) => write!(f, "ProtocolState: {}", err),
        }
    }
}

impl Display for MalformedInput {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            MalformedInput::TruncatedFrame { declared, buffered } => {
                write!(
                    f,
                    "TruncatedFrame: declared {} bytes, got {}",
                    declared, buffered
                )
            }
            MalformedInput::BadLineEncoding => write!(f, "BadLineEncoding"),
        }
    }
}

impl Display for CryptoFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            CryptoFailure::TagMismatch => write!(f, "TagMismatch"),
            CryptoFailure::BadKeyOrNonceLength { received } => {
                write!(f, "BadKeyOrNonceLength: received {}", received)
            }
            CryptoFailure::BodyTooShort { received } => {
                write!(f, "BodyTooShort: received {}", received)
            }
            CryptoFailure::NonceExhausted => write!(f, "NonceExhausted"),
        }
    }
}

impl Display for ResourceExhausted {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            ResourceExhausted::RegistryFull => write!(f, "RegistryFull"),
            ResourceExhausted::MaskOutputCeiling { needed } => {
                write!(f, "MaskOutputCeiling: needed {}", needed)
            }
        }
    }
}

impl Display for ProtocolState {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            ProtocolState::UnknownToken => write!(f, "UnknownToken"),
            ProtocolState::SessionClosed => write!(f, "SessionClosed"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::MalformedInput(err) => Some(err),
            Error::CryptoFailure(err) => Some(err),
            Error::TransportFailure => None,
            Error::ResourceExhausted(err) => Some(err),
            Error::ProtocolState(err) => Some(err),
        }
    }
}

impl error::Error for MalformedInput {}

impl error::Error for CryptoFailure {}

impl error::Error for ResourceExhausted {}

impl error::Error for ProtocolState {}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        io::Error::new(ErrorKind::Other, e)
    }
}

impl From<MalformedInput> for io::Error {
    fn from(e: MalformedInput) -> Self {
        io::Error::new(ErrorKind::Other, Error::MalformedInput(e))
    }
}

impl From<CryptoFailure> for io::Error {
    fn from(e: CryptoFailure) -> Self {
        io::Error::new(ErrorKind::Other, Error::CryptoFailure(e))
    }
}

impl From<MalformedInput> for Error {
    fn from(e: MalformedInput) -> Self {
        Error::MalformedInput(e)
    }
}

impl From<CryptoFailure> for Error {
    fn from(e: CryptoFailure) -> Self {
        Error::CryptoFailure(e)
    }
}

impl From<ResourceExhausted> for Error {
    fn from(e: ResourceExhausted) -> Self {
        Error::ResourceExhausted(e)
    }
}

impl From<ProtocolState> for Error {
    fn from(e: ProtocolState) -> Self {
        Error::ProtocolState(e)
    }
}
