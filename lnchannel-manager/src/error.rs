//! #Error
use std::fmt;

use lightning::ln::msgs::DecodeError;

/// An error code.
#[derive(Debug)]
pub enum Error {
    /// The local available balance cannot cover the requested amount.
    InsufficientBalance {
        /// The amount that was requested.
        requested: u64,
        /// The amount that was available.
        available: u64,
    },
    /// The maximum number of pending HTLCs was reached.
    TooManyPendingHtlcs(usize),
    /// No pending HTLC matches the provided preimage or id.
    HtlcNotFound,
    /// The in-flight amount would reach the reserve of the proposer.
    ReserveExceeded,
    /// Some invalid parameters were provided.
    InvalidParameters(String),
    /// A commitment update is in flight and new updates cannot be staged.
    UpdateInProgress,
    /// The signature received for the local commitment is not valid.
    InvalidCommitmentSignature,
    /// The revocation secret received does not match the expected hash.
    RevocationMismatch(String),
    /// Revocation was requested before the new commitment was fully signed.
    PrematureRevocation,
    /// The channel is closed and cannot be updated anymore.
    ChannelClosed,
    /// The channel encountered a protocol violation and only accepts closing.
    Faulted,
    /// The channel was shut down.
    Cancelled,
    /// The channel was not started.
    NotStarted,
    /// The storage component encountered an error.
    StorageError(String),
    /// The key store component encountered an error.
    KeyStoreError(String),
    /// An error occurred in the blockchain component.
    BlockchainError(String),
    /// An IO error.
    IOError(lightning::io::Error),
    /// Deserialize error
    Deserialize(DecodeError),
    /// An error occurred in the channel transaction library.
    ChannelError(lnchannel::Error),
    /// An error occurred in the Secp library.
    SecpError(secp256k1_zkp::Error),
    /// An invalid state was encounter, likely to indicate a bug.
    InvalidState(String),
}

/// Broad category of an [`Error`], used by callers to decide how to react.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// The operation was refused and the channel state is unchanged.
    Validation,
    /// The counterparty violated the protocol.
    Protocol,
    /// The channel cannot be updated anymore.
    Fatal,
    /// The channel is not running.
    Lifecycle,
    /// An external component failed.
    Collaborator,
}

impl Error {
    /// Returns the category of the error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::InsufficientBalance { .. }
            | Error::TooManyPendingHtlcs(_)
            | Error::HtlcNotFound
            | Error::ReserveExceeded
            | Error::InvalidParameters(_)
            | Error::UpdateInProgress => ErrorClass::Validation,
            Error::InvalidCommitmentSignature
            | Error::RevocationMismatch(_)
            | Error::PrematureRevocation => ErrorClass::Protocol,
            Error::ChannelClosed
            | Error::Faulted
            | Error::ChannelError(_)
            | Error::SecpError(_)
            | Error::InvalidState(_) => ErrorClass::Fatal,
            Error::Cancelled | Error::NotStarted => ErrorClass::Lifecycle,
            Error::StorageError(_)
            | Error::KeyStoreError(_)
            | Error::BlockchainError(_)
            | Error::IOError(_)
            | Error::Deserialize(_) => ErrorClass::Collaborator,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::InsufficientBalance {
                requested,
                available,
            } => write!(
                f,
                "Insufficient balance: requested {} but only {} available",
                requested, available
            ),
            Error::TooManyPendingHtlcs(max) => {
                write!(f, "Too many pending htlcs, maximum is {}", max)
            }
            Error::HtlcNotFound => write!(f, "Htlc not found"),
            Error::ReserveExceeded => write!(f, "Reserve exceeded"),
            Error::InvalidParameters(ref s) => write!(f, "Invalid parameters were provided: {}", s),
            Error::UpdateInProgress => write!(f, "A commitment update is in progress"),
            Error::InvalidCommitmentSignature => write!(f, "Invalid commitment signature"),
            Error::RevocationMismatch(ref s) => write!(f, "Revocation mismatch: {}", s),
            Error::PrematureRevocation => write!(f, "Premature revocation"),
            Error::ChannelClosed => write!(f, "Channel is closed"),
            Error::Faulted => write!(f, "Channel is faulted"),
            Error::Cancelled => write!(f, "Channel was shut down"),
            Error::NotStarted => write!(f, "Channel was not started"),
            Error::StorageError(ref s) => write!(f, "Storage error {}", s),
            Error::KeyStoreError(ref s) => write!(f, "Key store error {}", s),
            Error::BlockchainError(ref s) => write!(f, "Blockchain error {}", s),
            Error::IOError(_) => write!(f, "IO error"),
            Error::Deserialize(ref e) => write!(f, "Deserialize error: {}", e),
            Error::ChannelError(ref e) => write!(f, "Channel error {}", e),
            Error::SecpError(_) => write!(f, "Secp error"),
            Error::InvalidState(ref s) => write!(f, "Invalid state: {}", s),
        }
    }
}

impl From<lightning::io::Error> for Error {
    fn from(e: lightning::io::Error) -> Error {
        Error::IOError(e)
    }
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Error {
        Error::Deserialize(e)
    }
}

impl From<lnchannel::Error> for Error {
    fn from(e: lnchannel::Error) -> Error {
        Error::ChannelError(e)
    }
}

impl From<secp256k1_zkp::Error> for Error {
    fn from(e: secp256k1_zkp::Error) -> Error {
        Error::SecpError(e)
    }
}

impl From<secp256k1_zkp::UpstreamError> for Error {
    fn from(e: secp256k1_zkp::UpstreamError) -> Error {
        Error::SecpError(secp256k1_zkp::Error::Upstream(e))
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IOError(e) => Some(e),
            Error::ChannelError(e) => Some(e),
            Error::SecpError(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_class_test() {
        assert_eq!(
            Error::InsufficientBalance {
                requested: 2,
                available: 1
            }
            .class(),
            ErrorClass::Validation
        );
        assert_eq!(Error::PrematureRevocation.class(), ErrorClass::Protocol);
        assert_eq!(Error::Faulted.class(), ErrorClass::Fatal);
        assert_eq!(Error::Cancelled.class(), ErrorClass::Lifecycle);
        assert_eq!(
            Error::StorageError("disk full".to_string()).class(),
            ErrorClass::Collaborator
        );
    }
}
