//! # Module containing the model of a payment channel, the possible states in
//! which it can be as well as methods to work with it.

use bitcoin::hashes::Hash;
use bitcoin::{OutPoint, Script, Transaction, Txid};
use lnchannel::CommitmentScheme;
use secp256k1_zkp::{ecdsa::Signature, PublicKey, SecretKey};

use crate::config::ChannelConfig;
use crate::revocation::{RemoteRevocationStore, ShaChainProducer};
use crate::{ChannelId, NodeId};

pub mod ser;

macro_rules! typed_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident
        {
            $( $(#[$inner:meta])*
                $vname:ident $({
                    $(
                        $(#[$inner_block:meta])*
                        $field_name:ident : $field_type_name:ident$(<$param:ident>)?,
                    )*
                })?,
            )*
        },
        $(#[$type_meta:meta])*
        $type_name:ident,
    ) => {
        $(#[$meta])*
        pub enum $name {
            $( $(#[$inner])*
                $vname $({
                    $(
                        $(#[$inner_block])*
                        $field_name : $field_type_name$(<$param>)?,
                    )*
                })?,
            )*
        }

        impl $name {
            /// Returns whether the variant is of the given type.
            pub fn is_of_type(&self, t: &$type_name) -> bool {
                self.get_type() == *t
            }

            /// Returns the type associated with the variant.
            pub fn get_type(&self) -> $type_name {
                match self {
                    $(
                        $name::$vname {..} => $type_name::$vname,
                    )*
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
                match self {
                    $(
                        $name::$vname {..} => f.write_str(stringify!($vname)),
                    )*
                }
            }
        }

        $(#[$type_meta])*
        pub enum $type_name {
            $(
                ///Type for [$name::$vname].
                $vname,
            )*
        }
    }
}

typed_enum!(
    #[derive(Eq, PartialEq, Clone, Debug)]
    /// Contains the possible states in which a channel can be.
    pub enum ChannelStatus {
        /// Both parties hold a fully signed commitment and every superseded
        /// commitment was revoked. New updates can be staged.
        Open,
        /// The local party built and signed a new commitment pair and waits for
        /// the counterparty signature.
        PendingCommit {
            /// The new commitment transaction held by the local party.
            local_commit_tx: Transaction,
            /// The new commitment transaction held by the counterparty.
            remote_commit_tx: Transaction,
        },
        /// The new commitment pair is fully signed and the previous commitments
        /// of both parties are being revoked.
        Committed {
            /// Whether the local party disclosed the secret revoking its
            /// previous commitment.
            local_revoked: bool,
            /// Whether the counterparty secret revoking its previous commitment
            /// was received.
            remote_revoked: bool,
        },
        /// A cooperative close transaction was signed, no further update is
        /// accepted.
        CooperativelyClosing {
            /// The close transaction, without witness.
            close_tx: Transaction,
        },
        /// A transaction spending the funding output was broadcast.
        ForceClosed {
            /// The id of the transaction that spent the funding output.
            closing_txid: Txid,
        },
        /// A protocol violation was detected. Only close operations are
        /// accepted.
        Faulted,
    },
    /// Enumeration of the possible [`ChannelStatus`] variants.
    #[derive(Eq, PartialEq, Clone, Copy, Debug)]
    ChannelStatusType,
);

impl ChannelStatus {
    /// Whether the channel is in a terminal state.
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            ChannelStatus::CooperativelyClosing { .. } | ChannelStatus::ForceClosed { .. }
        )
    }
}

/// Which party proposed an HTLC.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HtlcDirection {
    /// Proposed by the local party, paying the counterparty on settlement.
    Offered,
    /// Proposed by the counterparty, paying the local party on settlement.
    Received,
}

/// A conditional payment pending in the channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Htlc {
    /// Identifier of the HTLC, unique within the channel.
    pub id: u64,
    /// The amount locked in the HTLC.
    pub amount: u64,
    /// The SHA256 hash of the preimage releasing the payment.
    pub payment_hash: [u8; 32],
    /// The block height after which the HTLC can be failed.
    pub timeout_height: u32,
    /// Which party proposed the HTLC.
    pub direction: HtlcDirection,
}

/// The balances of the channel at the latest committed state, used to
/// discard staged updates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RollbackState {
    /// The balance of the local party.
    pub local_balance: u64,
    /// The balance of the counterparty.
    pub remote_balance: u64,
    /// The HTLCs pending in the channel.
    pub pending_htlcs: Vec<Htlc>,
    /// The id to use for the next staged HTLC.
    pub next_htlc_id: u64,
    /// Total amount sent through the channel.
    pub total_sent: u64,
    /// Total amount received through the channel.
    pub total_received: u64,
}

/// The parameters agreed upon by both parties when opening a channel.
#[derive(Clone)]
pub struct ChannelParams {
    /// The id of the counterparty node.
    pub counterparty_id: NodeId,
    /// The commitment scheme of the channel.
    pub scheme: CommitmentScheme,
    /// Whether the local party funded the channel.
    pub is_initiator: bool,
    /// The confirmed funding transaction.
    pub funding_tx: Transaction,
    /// The outpoint of the funding output.
    pub funding_outpoint: OutPoint,
    /// The initial balance of the local party.
    pub local_balance: u64,
    /// The initial balance of the counterparty.
    pub remote_balance: u64,
    /// The key used by the local party to sign commitment transactions.
    pub local_commit_key: SecretKey,
    /// The key used by the counterparty to sign commitment transactions.
    pub remote_commit_key: PublicKey,
    /// The public part of the local funding key held by the [`crate::KeyStore`].
    pub multi_sig_key: PublicKey,
    /// The public part of the counterparty funding key.
    pub remote_multi_sig_key: PublicKey,
    /// The seed from which the local revocation secrets are derived.
    pub revocation_seed: [u8; 32],
    /// The revocation hash protecting the first commitment of the counterparty.
    pub remote_first_revocation_hash: [u8; 32],
    /// The revocation hash protecting the second commitment of the counterparty.
    pub remote_second_revocation_hash: [u8; 32],
    /// The script to which the local party is paid on cooperative close.
    pub local_delivery_script: Script,
    /// The script to which the counterparty is paid on cooperative close.
    pub remote_delivery_script: Script,
}

/// A channel for which the initial commitment of the local party was not
/// signed by the counterparty yet.
#[derive(Clone)]
pub struct PendingChannel {
    /// The parameters of the channel.
    pub params: ChannelParams,
    /// The configuration of the channel.
    pub config: ChannelConfig,
    /// The witness script of the funding output.
    pub funding_redeem_script: Script,
    /// The initial commitment transaction held by the local party.
    pub local_commit_tx: Transaction,
    /// The initial commitment transaction held by the counterparty.
    pub remote_commit_tx: Transaction,
    /// The local revocation chain, with the secrets of the first two
    /// commitments handed out.
    pub local_revocation_chain: ShaChainProducer,
}

/// The full state of an open channel.
#[derive(Clone)]
pub struct ChannelState {
    /// The [`ChannelId`] of the channel.
    pub channel_id: ChannelId,
    /// The id of the counterparty node.
    pub counterparty_id: NodeId,
    /// The commitment scheme selected at open.
    pub scheme: CommitmentScheme,
    /// Whether the local party funded the channel.
    pub is_initiator: bool,
    /// The value of the funding output.
    pub capacity: u64,
    /// The balance of the local party, net of the HTLCs it offered.
    pub local_balance: u64,
    /// The balance of the counterparty, net of the HTLCs it offered.
    pub remote_balance: u64,
    /// The HTLCs pending in the channel.
    pub pending_htlcs: Vec<Htlc>,
    /// The id to use for the next staged HTLC.
    pub next_htlc_id: u64,
    /// The key used by the local party to sign commitment transactions.
    pub local_commit_key: SecretKey,
    /// The key used by the counterparty to sign commitment transactions.
    pub remote_commit_key: PublicKey,
    /// The current commitment transaction held by the local party.
    pub local_commit_tx: Transaction,
    /// The current commitment transaction held by the counterparty.
    pub remote_commit_tx: Transaction,
    /// The counterparty signature for `local_commit_tx`.
    pub remote_commit_signature: Signature,
    /// The funding transaction of the channel.
    pub funding_tx: Transaction,
    /// The outpoint of the funding output.
    pub funding_outpoint: OutPoint,
    /// The witness script of the funding output.
    pub funding_redeem_script: Script,
    /// The public part of the local funding key. The secret is held by the
    /// [`crate::KeyStore`].
    pub multi_sig_key: PublicKey,
    /// The hash protecting the current commitment of the counterparty.
    pub remote_current_revocation_hash: [u8; 32],
    /// The hash protecting the next commitment of the counterparty.
    pub remote_next_revocation_hash: [u8; 32],
    /// The producer of local revocation secrets.
    pub local_revocation_chain: ShaChainProducer,
    /// The revocation hashes and secrets received from the counterparty.
    pub remote_revocation_chain: RemoteRevocationStore,
    /// The script to which the local party is paid on cooperative close.
    pub local_delivery_script: Script,
    /// The script to which the counterparty is paid on cooperative close.
    pub remote_delivery_script: Script,
    /// The configuration of the channel.
    pub config: ChannelConfig,
    /// The number of committed updates.
    pub update_count: u64,
    /// Total amount sent through the channel.
    pub total_sent: u64,
    /// Total amount received through the channel.
    pub total_received: u64,
    /// The unix time at which the channel was opened.
    pub opened_at: u64,
    /// The current status of the channel.
    pub status: ChannelStatus,
    /// The balances at the latest committed state if updates are staged.
    pub rollback: Option<RollbackState>,
}

impl ChannelState {
    /// Returns the total amount of the HTLCs pending in the given direction.
    pub fn in_flight(&self, direction: HtlcDirection) -> u64 {
        self.pending_htlcs
            .iter()
            .filter(|h| h.direction == direction)
            .map(|h| h.amount)
            .sum()
    }

    /// Returns the total amount of the HTLCs pending in the channel.
    pub fn pending_htlc_total(&self) -> u64 {
        self.pending_htlcs.iter().map(|h| h.amount).sum()
    }

    /// Whether the balances and pending HTLCs add up to the channel capacity.
    pub fn is_balanced(&self) -> bool {
        self.local_balance
            .checked_add(self.remote_balance)
            .and_then(|s| s.checked_add(self.pending_htlc_total()))
            == Some(self.capacity)
    }

    /// Returns the balance of each party as encoded in the commitment
    /// transactions, pending HTLCs being attributed to their proposer.
    pub fn commitment_amounts(&self) -> (u64, u64) {
        (
            self.local_balance + self.in_flight(HtlcDirection::Offered),
            self.remote_balance + self.in_flight(HtlcDirection::Received),
        )
    }

    /// Whether some updates were staged since the latest committed state.
    pub fn has_staged_updates(&self) -> bool {
        self.rollback.is_some()
    }

    /// Returns the balances at the latest committed state.
    pub fn committed_balances(&self) -> RollbackState {
        match &self.rollback {
            Some(r) => r.clone(),
            None => RollbackState {
                local_balance: self.local_balance,
                remote_balance: self.remote_balance,
                pending_htlcs: self.pending_htlcs.clone(),
                next_htlc_id: self.next_htlc_id,
                total_sent: self.total_sent,
                total_received: self.total_received,
            },
        }
    }

    /// Restores the balances of the latest committed state.
    pub fn discard_staged_updates(&mut self) {
        if let Some(r) = self.rollback.take() {
            self.local_balance = r.local_balance;
            self.remote_balance = r.remote_balance;
            self.pending_htlcs = r.pending_htlcs;
            self.next_htlc_id = r.next_htlc_id;
            self.total_sent = r.total_sent;
            self.total_received = r.total_received;
        }
    }
}

/// Derives the id of a channel from its funding outpoint, the same way
/// lightning channel ids are computed.
pub fn channel_id_from_funding_outpoint(outpoint: &OutPoint) -> ChannelId {
    let mut res = outpoint.txid.into_inner();
    res[30] ^= ((outpoint.vout >> 8) & 0xff) as u8;
    res[31] ^= (outpoint.vout & 0xff) as u8;
    res
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_id_depends_on_output_index() {
        let txid = Txid::from_inner([5u8; 32]);
        let first = channel_id_from_funding_outpoint(&OutPoint { txid, vout: 0 });
        let second = channel_id_from_funding_outpoint(&OutPoint { txid, vout: 1 });
        let large = channel_id_from_funding_outpoint(&OutPoint { txid, vout: 0x0102 });

        assert_eq!(first, [5u8; 32]);
        assert_eq!(second[31], 4);
        assert_eq!(large[30], 5 ^ 1);
        assert_eq!(large[31], 5 ^ 2);
    }

    #[test]
    fn status_type_test() {
        let status = ChannelStatus::Committed {
            local_revoked: true,
            remote_revoked: false,
        };
        assert!(status.is_of_type(&ChannelStatusType::Committed));
        assert!(!status.is_closed());
        assert_eq!(status.to_string(), "Committed");
        assert!(ChannelStatus::ForceClosed {
            closing_txid: Txid::from_inner([0u8; 32])
        }
        .is_closed());
    }
}
