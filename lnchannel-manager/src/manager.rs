//! #LightningChannel a component owning the state of a single channel and
//! serializing the updates applied to it.

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use bitcoin::hashes::hex::ToHex;
use bitcoin::Transaction;
use log::{debug, error, info, warn};
use secp256k1_zkp::{All, Secp256k1};
use tokio_util::sync::CancellationToken;

use crate::channel::{ChannelState, ChannelStatus, Htlc, PendingChannel};
use crate::channel_updater;
use crate::error::{Error, ErrorClass};
use crate::messages::{ClosingSigned, CommitmentSigned, RevokeAndAck};
use crate::{ChainNotifier, ChannelId, KeyStore, Storage, Time};

/// The number of confirmations of the funding transaction to be notified of.
pub const NB_CONFIRMATIONS: u32 = 6;

/// Facts about the blockchain relevant to a channel, delivered by the
/// [`ChainNotifier`] collaborator.
#[derive(Clone, Debug)]
pub enum ChainEvent {
    /// The funding transaction reached the given number of confirmations.
    FundingConfirmed {
        /// The number of confirmations.
        confirmations: u32,
    },
    /// The funding output was spent by the given transaction.
    FundingSpent {
        /// The transaction spending the funding output.
        spending_tx: Transaction,
    },
}

/// Owns the state of a channel. Every update is applied under a single write
/// lock and persisted before its result is returned.
pub struct LightningChannel<S: Deref, K: Deref, N: Deref>
where
    S::Target: Storage,
    K::Target: KeyStore,
    N::Target: ChainNotifier,
{
    channel_id: ChannelId,
    state: RwLock<ChannelState>,
    persist_lock: Mutex<()>,
    started: AtomicBool,
    cancel: CancellationToken,
    store: S,
    key_store: K,
    chain_notifier: N,
    secp: Secp256k1<All>,
}

impl<S: Deref, K: Deref, N: Deref> LightningChannel<S, K, N>
where
    S::Target: Storage,
    K::Target: KeyStore,
    N::Target: ChainNotifier,
{
    /// Create a new LightningChannel wrapping an existing channel state.
    pub fn new(
        channel: ChannelState,
        store: S,
        key_store: K,
        chain_notifier: N,
    ) -> Self {
        LightningChannel {
            channel_id: channel.channel_id,
            state: RwLock::new(channel),
            persist_lock: Mutex::new(()),
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            store,
            key_store,
            chain_notifier,
            secp: Secp256k1::new(),
        }
    }

    /// Completes the opening of a channel with the counterparty signature for
    /// the initial local commitment.
    pub fn open<T: Deref>(
        pending: PendingChannel,
        msg: &CommitmentSigned,
        store: S,
        key_store: K,
        chain_notifier: N,
        time: T,
    ) -> Result<Self, Error>
    where
        T::Target: Time,
    {
        let secp = Secp256k1::verification_only();
        let channel =
            channel_updater::finalize_channel(&secp, pending, msg, time.unix_time_now())?;
        info!(
            "Opened channel {} with capacity {}",
            channel.channel_id.to_hex(),
            channel.capacity
        );
        Ok(Self::new(channel, store, key_store, chain_notifier))
    }

    /// Restores the channel with the given id from the storage.
    pub fn load(
        channel_id: &ChannelId,
        store: S,
        key_store: K,
        chain_notifier: N,
    ) -> Result<Self, Error> {
        let channel = store.get_channel(channel_id)?.ok_or_else(|| {
            Error::StorageError(format!("Unknown channel {}", channel_id.to_hex()))
        })?;
        Ok(Self::new(channel, store, key_store, chain_notifier))
    }

    /// Checks that the funding key is available, registers for the chain
    /// events affecting the channel and begins accepting operations. Starting
    /// an already started channel does nothing.
    pub fn start(&self) -> Result<(), Error> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let _persist_guard = self.persist_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.started.load(Ordering::SeqCst) {
            debug!("Channel {} is already started", self.channel_id.to_hex());
            return Ok(());
        }

        let snapshot = self.snapshot();
        self.key_store
            .get_secret_key_for_pubkey(&snapshot.multi_sig_key)?;
        self.chain_notifier
            .register_spend(&snapshot.funding_outpoint)?;
        self.chain_notifier
            .register_confirmations(&snapshot.funding_outpoint.txid, NB_CONFIRMATIONS)?;
        self.store.upsert_channel(&snapshot)?;

        self.started.store(true, Ordering::SeqCst);
        info!(
            "Started channel {} at update {} ({})",
            self.channel_id.to_hex(),
            snapshot.update_count,
            snapshot.status
        );
        Ok(())
    }

    /// Stops accepting operations. Operations in progress fail with
    /// [`Error::Cancelled`] without committing.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        info!("Shut down channel {}", self.channel_id.to_hex());
    }

    /// Returns a token cancelled when the channel is shut down.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The id of the channel.
    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    /// The balance of the local party, net of the HTLCs it offered.
    pub fn local_balance(&self) -> u64 {
        self.read_state().local_balance
    }

    /// The balance of the counterparty, net of the HTLCs it offered.
    pub fn remote_balance(&self) -> u64 {
        self.read_state().remote_balance
    }

    /// The latest fully signed commitment transaction of the local party.
    pub fn current_commit_tx(&self) -> Transaction {
        self.read_state().local_commit_tx.clone()
    }

    /// The status of the channel.
    pub fn status(&self) -> ChannelStatus {
        self.read_state().status.clone()
    }

    /// A copy of the whole channel state.
    pub fn snapshot(&self) -> ChannelState {
        self.read_state().clone()
    }

    /// Stages an HTLC paying the counterparty and returns its id.
    pub fn add_htlc(
        &self,
        amount: u64,
        payment_hash: [u8; 32],
        timeout_height: u32,
    ) -> Result<u64, Error> {
        let id = self.update("add_htlc", |c, _| {
            channel_updater::add_htlc(c, amount, payment_hash, timeout_height)
        })?;
        debug!(
            "Staged offered htlc {} of {} on channel {}",
            id,
            amount,
            self.channel_id.to_hex()
        );
        Ok(id)
    }

    /// Stages an HTLC proposed by the counterparty and returns its id.
    pub fn receive_htlc(
        &self,
        amount: u64,
        payment_hash: [u8; 32],
        timeout_height: u32,
    ) -> Result<u64, Error> {
        let id = self.update("receive_htlc", |c, _| {
            channel_updater::receive_htlc(c, amount, payment_hash, timeout_height)
        })?;
        debug!(
            "Staged received htlc {} of {} on channel {}",
            id,
            amount,
            self.channel_id.to_hex()
        );
        Ok(id)
    }

    /// Stages the settlement of the HTLC locked to the hash of the preimage.
    pub fn settle_htlc(&self, payment_preimage: &[u8; 32]) -> Result<Htlc, Error> {
        let htlc = self.update("settle_htlc", |c, _| {
            channel_updater::settle_htlc(c, payment_preimage)
        })?;
        debug!(
            "Staged settlement of htlc {} on channel {}",
            htlc.id,
            self.channel_id.to_hex()
        );
        Ok(htlc)
    }

    /// Stages the failure of the HTLC with the given id.
    pub fn fail_htlc(&self, htlc_id: u64) -> Result<Htlc, Error> {
        let htlc = self.update("fail_htlc", |c, _| channel_updater::fail_htlc(c, htlc_id))?;
        debug!(
            "Staged failure of htlc {} on channel {}",
            htlc.id,
            self.channel_id.to_hex()
        );
        Ok(htlc)
    }

    /// Builds and signs the commitment for the staged state.
    pub fn advance_commitment(&self) -> Result<CommitmentSigned, Error> {
        let msg = self.update("advance_commitment", |c, secp| {
            channel_updater::advance_commitment(secp, c)
        })?;
        debug!(
            "Signed new commitment for channel {}",
            self.channel_id.to_hex()
        );
        Ok(msg)
    }

    /// Verifies the counterparty signature for the staged local commitment and
    /// commits the staged state.
    pub fn receive_commitment_signature(&self, msg: &CommitmentSigned) -> Result<(), Error> {
        self.update("receive_commitment_signature", |c, secp| {
            channel_updater::receive_commitment_signature(secp, c, msg)?;
            info!(
                "Committed update {} on channel {}: local balance {} remote balance {}",
                c.update_count,
                c.channel_id.to_hex(),
                c.local_balance,
                c.remote_balance
            );
            Ok(())
        })
    }

    /// Discloses the secret revoking the superseded local commitment. The
    /// message is only returned once the new state is durably stored.
    pub fn reveal_revocation(&self) -> Result<RevokeAndAck, Error> {
        let msg = self.update("reveal_revocation", |c, _| {
            channel_updater::reveal_revocation(c)
        })?;
        debug!(
            "Revealed revocation secret on channel {}",
            self.channel_id.to_hex()
        );
        Ok(msg)
    }

    /// Checks and records the counterparty revocation secret.
    pub fn accept_revocation(&self, msg: &RevokeAndAck) -> Result<(), Error> {
        self.update("accept_revocation", |c, _| {
            channel_updater::accept_revocation(c, msg)
        })?;
        debug!(
            "Accepted revocation secret on channel {}",
            self.channel_id.to_hex()
        );
        Ok(())
    }

    /// Signs a cooperative close transaction paying each party its balance.
    pub fn offer_cooperative_close(&self) -> Result<ClosingSigned, Error> {
        let msg = self.update("offer_cooperative_close", |c, secp| {
            channel_updater::offer_cooperative_close(secp, c)
        })?;
        info!(
            "Offered cooperative close of channel {}",
            self.channel_id.to_hex()
        );
        Ok(msg)
    }

    /// Returns the cooperative close transaction signed by both parties.
    pub fn accept_cooperative_close(&self, msg: &ClosingSigned) -> Result<Transaction, Error> {
        let tx = self.update("accept_cooperative_close", |c, secp| {
            channel_updater::accept_cooperative_close(secp, c, msg)
        })?;
        info!(
            "Cooperatively closed channel {} with transaction {}",
            self.channel_id.to_hex(),
            tx.txid()
        );
        Ok(tx)
    }

    /// Returns the latest local commitment, ready to be broadcast.
    pub fn force_close(&self) -> Result<Transaction, Error> {
        let tx = self.update("force_close", |c, secp| channel_updater::force_close(secp, c))?;
        info!(
            "Force closed channel {} with commitment {}",
            self.channel_id.to_hex(),
            tx.txid()
        );
        Ok(tx)
    }

    /// Returns a transaction reclaiming the funding output through its refund
    /// branch.
    pub fn refund_funding(&self) -> Result<Transaction, Error> {
        self.check_running()?;
        let multi_sig_key = self.read_state().multi_sig_key;
        let refund_sk = self.key_store.get_secret_key_for_pubkey(&multi_sig_key)?;
        let tx = self.update("refund_funding", |c, secp| {
            channel_updater::refund_funding(secp, c, &refund_sk)
        })?;
        info!(
            "Refunded channel {} with transaction {}",
            self.channel_id.to_hex(),
            tx.txid()
        );
        Ok(tx)
    }

    /// Processes a chain event. If the counterparty broadcast a revoked
    /// commitment, returns a transaction claiming its output.
    pub fn handle_chain_event(&self, event: &ChainEvent) -> Result<Option<Transaction>, Error> {
        match event {
            ChainEvent::FundingConfirmed { confirmations } => {
                self.check_running()?;
                info!(
                    "Funding of channel {} has {} confirmations",
                    self.channel_id.to_hex(),
                    confirmations
                );
                Ok(None)
            }
            ChainEvent::FundingSpent { spending_tx } => {
                let punish_tx = self.update("handle_chain_event", |c, secp| {
                    channel_updater::on_funding_spent(secp, c, spending_tx)
                })?;
                match &punish_tx {
                    Some(tx) => error!(
                        "Revoked commitment {} broadcast on channel {}, claiming with {}",
                        spending_tx.txid(),
                        self.channel_id.to_hex(),
                        tx.txid()
                    ),
                    None => info!(
                        "Funding of channel {} spent by {}",
                        self.channel_id.to_hex(),
                        spending_tx.txid()
                    ),
                }
                Ok(punish_tx)
            }
        }
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, ChannelState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_running(&self) -> Result<(), Error> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if !self.started.load(Ordering::SeqCst) {
            return Err(Error::NotStarted);
        }
        Ok(())
    }

    /// Applies `f` to a copy of the state under the write lock. The copy is
    /// kept if `f` succeeded or faulted the channel. It is persisted after the
    /// write lock is released and replaces the state only once stored, so a
    /// storage failure leaves the previous state in place.
    fn update<R, F>(&self, op: &str, f: F) -> Result<R, Error>
    where
        F: FnOnce(&mut ChannelState, &Secp256k1<All>) -> Result<R, Error>,
    {
        self.check_running()?;

        let _persist_guard = self.persist_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (res, next, was_faulted) = {
            let state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            let mut next = state.clone();
            let res = f(&mut next, &self.secp);
            (res, next, state.status == ChannelStatus::Faulted)
        };

        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let faulted = res.is_err() && next.status == ChannelStatus::Faulted && !was_faulted;
        if res.is_ok() || faulted {
            if let Err(e) = self.store.upsert_channel(&next) {
                error!(
                    "Could not persist channel {} after {}, state left unchanged: {}",
                    self.channel_id.to_hex(),
                    op,
                    e
                );
                return Err(e);
            }
            *self.state.write().unwrap_or_else(PoisonError::into_inner) = next;
        }

        res.map_err(|e| {
            self.log_refused(op, &e);
            e
        })
    }

    fn log_refused(&self, op: &str, e: &Error) {
        let channel_id = self.channel_id.to_hex();
        match (e, e.class()) {
            (_, ErrorClass::Protocol) => {
                error!("{} failed on channel {}: {}", op, channel_id, e)
            }
            (Error::ChannelClosed, _) | (Error::Faulted, _) => {
                warn!("{} refused on channel {}: {}", op, channel_id, e)
            }
            _ => debug!("{} refused on channel {}: {}", op, channel_id, e),
        }
    }
}
