//! # Serialization implementation for channel related structures.
use super::{ChannelState, ChannelStatus, Htlc, HtlcDirection, RollbackState};
use crate::config::ChannelConfig;
use crate::ser_impls::{
    read_commitment_scheme, read_outpoint, read_script, read_transaction, read_txid,
    write_commitment_scheme, write_outpoint, write_script, write_transaction, write_txid,
};

use lightning::io::Read;
use lightning::ln::msgs::DecodeError;
use lightning::util::ser::{Readable, Writeable, Writer};

/// Trait used to de/serialize an object to/from a vector of bytes.
pub trait Serializable
where
    Self: Sized,
{
    /// Serialize the object.
    fn serialize(&self) -> Result<Vec<u8>, lightning::io::Error>;
    /// Deserialize the object.
    fn deserialize<R: Read>(reader: &mut R) -> Result<Self, DecodeError>;
}

impl<T> Serializable for T
where
    T: Writeable + Readable,
{
    fn serialize(&self) -> Result<Vec<u8>, lightning::io::Error> {
        let mut buffer = Vec::new();
        self.write(&mut buffer)?;
        Ok(buffer)
    }

    fn deserialize<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        Readable::read(reader)
    }
}

impl_writeable_enum!(HtlcDirection,;
    (0, Offered),
    (1, Received)
);

impl_writeable!(Htlc, {
    (id, writeable),
    (amount, writeable),
    (payment_hash, writeable),
    (timeout_height, writeable),
    (direction, writeable)
});

impl_writeable!(RollbackState, {
    (local_balance, writeable),
    (remote_balance, writeable),
    (pending_htlcs, vec),
    (next_htlc_id, writeable),
    (total_sent, writeable),
    (total_received, writeable)
});

impl_writeable!(ChannelConfig, {
    (max_pending_htlcs, usize),
    (csv_delay_blocks, writeable),
    (htlc_timeout_blocks, writeable),
    (min_htlc_amount, writeable),
    (fee_rate_per_vb, writeable)
});

impl_writeable_enum!(ChannelStatus,
    (1, PendingCommit, {(local_commit_tx, {cb_writeable, write_transaction, read_transaction}), (remote_commit_tx, {cb_writeable, write_transaction, read_transaction})}),
    (2, Committed, {(local_revoked, writeable), (remote_revoked, writeable)}),
    (3, CooperativelyClosing, {(close_tx, {cb_writeable, write_transaction, read_transaction})}),
    (4, ForceClosed, {(closing_txid, {cb_writeable, write_txid, read_txid})});
    (0, Open),
    (5, Faulted)
);

impl_writeable!(ChannelState, {
    (channel_id, writeable),
    (counterparty_id, writeable),
    (scheme, {cb_writeable, write_commitment_scheme, read_commitment_scheme}),
    (is_initiator, writeable),
    (capacity, writeable),
    (local_balance, writeable),
    (remote_balance, writeable),
    (pending_htlcs, vec),
    (next_htlc_id, writeable),
    (local_commit_key, writeable),
    (remote_commit_key, writeable),
    (local_commit_tx, {cb_writeable, write_transaction, read_transaction}),
    (remote_commit_tx, {cb_writeable, write_transaction, read_transaction}),
    (remote_commit_signature, writeable),
    (funding_tx, {cb_writeable, write_transaction, read_transaction}),
    (funding_outpoint, {cb_writeable, write_outpoint, read_outpoint}),
    (funding_redeem_script, {cb_writeable, write_script, read_script}),
    (multi_sig_key, writeable),
    (remote_current_revocation_hash, writeable),
    (remote_next_revocation_hash, writeable),
    (local_revocation_chain, writeable),
    (remote_revocation_chain, writeable),
    (local_delivery_script, {cb_writeable, write_script, read_script}),
    (remote_delivery_script, {cb_writeable, write_script, read_script}),
    (config, writeable),
    (update_count, writeable),
    (total_sent, writeable),
    (total_received, writeable),
    (opened_at, writeable),
    (status, writeable),
    (rollback, option)
});
