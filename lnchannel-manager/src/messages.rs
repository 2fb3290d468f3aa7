//! Payloads exchanged by the two parties of a channel while updating it.
//! Framing and transport are left to the caller.

use lightning::ln::msgs::DecodeError;
use lightning::util::ser::{Readable, Writeable, Writer};
use secp256k1_zkp::ecdsa::Signature;

use crate::ChannelId;

/// Carries the signature of the sender for the new commitment transaction held
/// by the receiver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitmentSigned {
    /// The id of the channel being updated.
    pub channel_id: ChannelId,
    /// The signature for the receiver commitment transaction.
    pub signature: Signature,
}

impl_writeable!(CommitmentSigned, {
    (channel_id, writeable),
    (signature, writeable)
});

/// Revokes the previous commitment of the sender and announces the hash
/// protecting its commitment after next.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RevokeAndAck {
    /// The id of the channel being updated.
    pub channel_id: ChannelId,
    /// The secret revoking the superseded commitment of the sender.
    pub per_commitment_secret: [u8; 32],
    /// The hash that will protect the next commitment of the sender.
    pub next_revocation_hash: [u8; 32],
}

impl_writeable!(RevokeAndAck, {
    (channel_id, writeable),
    (per_commitment_secret, writeable),
    (next_revocation_hash, writeable)
});

/// Carries the signature of the sender for the cooperative close transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClosingSigned {
    /// The id of the channel being closed.
    pub channel_id: ChannelId,
    /// The signature for the close transaction.
    pub signature: Signature,
}

impl_writeable!(ClosingSigned, {
    (channel_id, writeable),
    (signature, writeable)
});
