//! # Functions computing the transitions of a channel. They operate on a
//! [`ChannelState`] owned by the caller, which is responsible for
//! serializing calls and persisting the result. On error the state is left
//! unchanged unless documented otherwise.

use bitcoin::hashes::{sha256, Hash};
use bitcoin::{OutPoint, PublicKey as BitcoinPublicKey, Transaction};
use lnchannel::commitment::{
    create_and_sign_punish_transaction, create_and_sign_refund_transaction,
    create_commitment_transaction, create_cooperative_close_transaction, satisfy_commitment_input,
    satisfy_funding_input, sign_commitment, verify_commitment_signature,
};
use lnchannel::CommitmentScheme;
use secp256k1_zkp::{PublicKey, Secp256k1, SecretKey, Signing, Verification};

use crate::channel::{
    channel_id_from_funding_outpoint, ChannelParams, ChannelState, ChannelStatus,
    ChannelStatusType, Htlc, HtlcDirection, PendingChannel,
};
use crate::config::ChannelConfig;
use crate::error::Error;
use crate::messages::{ClosingSigned, CommitmentSigned, RevokeAndAck};
use crate::revocation::{
    revocation_hash, RemoteRevocationStore, RevocationChain, ShaChainProducer,
};
use crate::ChannelId;

/// Approximated size of a cooperative close transaction spending a 2-of-2
/// funding output to two P2WPKH outputs.
pub const APPROXIMATE_CLOSING_VBYTES: u64 = 168;

/// Creates the initial commitment transactions for a new channel and signs the
/// one held by the counterparty. The returned [`PendingChannel`] becomes a
/// [`ChannelState`] once the counterparty signature is received through
/// [`finalize_channel`].
pub fn new_channel<C: Signing>(
    secp: &Secp256k1<C>,
    params: ChannelParams,
    config: ChannelConfig,
) -> Result<(PendingChannel, CommitmentSigned), Error> {
    config.validate()?;

    if let CommitmentScheme::RevocableTimeout { csv_delay } = params.scheme {
        if csv_delay != config.csv_delay_blocks {
            return Err(Error::InvalidParameters(format!(
                "Scheme delay {} does not match configured delay {}",
                csv_delay, config.csv_delay_blocks
            )));
        }
    }

    if params.funding_outpoint.txid != params.funding_tx.txid() {
        return Err(Error::InvalidParameters(
            "Funding outpoint does not refer to the funding transaction".to_string(),
        ));
    }

    let capacity = params
        .funding_tx
        .output
        .get(params.funding_outpoint.vout as usize)
        .map(|o| o.value)
        .ok_or_else(|| Error::InvalidParameters("Invalid funding output index".to_string()))?;

    if params.local_balance.checked_add(params.remote_balance) != Some(capacity) {
        return Err(Error::InvalidParameters(format!(
            "Balances do not add up to the channel capacity {}",
            capacity
        )));
    }

    if params.remote_first_revocation_hash == params.remote_second_revocation_hash {
        return Err(Error::InvalidParameters(
            "Revocation hashes must be distinct".to_string(),
        ));
    }

    let local_commit_pk = PublicKey::from_secret_key(secp, &params.local_commit_key);
    let refund_pk = if params.is_initiator {
        params.multi_sig_key
    } else {
        params.remote_multi_sig_key
    };
    let funding_redeem_script = params.scheme.funding_redeemscript(
        &local_commit_pk,
        &params.remote_commit_key,
        &refund_pk,
    )?;

    let funding_script_pubkey = &params.funding_tx.output[params.funding_outpoint.vout as usize]
        .script_pubkey;
    if *funding_script_pubkey != funding_redeem_script.to_v0_p2wsh() {
        return Err(Error::InvalidParameters(
            "Funding output does not match the channel keys".to_string(),
        ));
    }

    let mut local_revocation_chain = ShaChainProducer::new(params.revocation_seed);
    let first_secret = local_revocation_chain.next_secret()?;
    local_revocation_chain.next_secret()?;

    let (local_commit_tx, remote_commit_tx) = build_commitment_pair(
        secp,
        &params.scheme,
        &params.funding_outpoint,
        &params.local_commit_key,
        &params.remote_commit_key,
        &revocation_hash(&first_secret),
        &params.remote_first_revocation_hash,
        params.local_balance,
        params.remote_balance,
    )?;

    let signature = sign_commitment(
        secp,
        &remote_commit_tx,
        &funding_redeem_script,
        capacity,
        &params.local_commit_key,
    )?;

    let msg = CommitmentSigned {
        channel_id: channel_id_from_funding_outpoint(&params.funding_outpoint),
        signature,
    };

    let pending = PendingChannel {
        params,
        config,
        funding_redeem_script,
        local_commit_tx,
        remote_commit_tx,
        local_revocation_chain,
    };

    Ok((pending, msg))
}

/// Verifies the counterparty signature for the initial local commitment and
/// returns the state of the now open channel.
pub fn finalize_channel<C: Verification>(
    secp: &Secp256k1<C>,
    pending: PendingChannel,
    msg: &CommitmentSigned,
    opened_at: u64,
) -> Result<ChannelState, Error> {
    let params = pending.params;
    let channel_id = channel_id_from_funding_outpoint(&params.funding_outpoint);
    check_channel_id(&channel_id, &msg.channel_id)?;

    let capacity = params.local_balance + params.remote_balance;

    verify_commitment_signature(
        secp,
        &pending.local_commit_tx,
        &pending.funding_redeem_script,
        capacity,
        &msg.signature,
        &params.remote_commit_key,
    )
    .map_err(|_| Error::InvalidCommitmentSignature)?;

    let remote_revocation_chain = RemoteRevocationStore::new(
        params.remote_first_revocation_hash,
        params.remote_second_revocation_hash,
    )?;

    Ok(ChannelState {
        channel_id,
        counterparty_id: params.counterparty_id,
        scheme: params.scheme,
        is_initiator: params.is_initiator,
        capacity,
        local_balance: params.local_balance,
        remote_balance: params.remote_balance,
        pending_htlcs: Vec::new(),
        next_htlc_id: 0,
        local_commit_key: params.local_commit_key,
        remote_commit_key: params.remote_commit_key,
        local_commit_tx: pending.local_commit_tx,
        remote_commit_tx: pending.remote_commit_tx,
        remote_commit_signature: msg.signature,
        funding_tx: params.funding_tx,
        funding_outpoint: params.funding_outpoint,
        funding_redeem_script: pending.funding_redeem_script,
        multi_sig_key: params.multi_sig_key,
        remote_current_revocation_hash: params.remote_first_revocation_hash,
        remote_next_revocation_hash: params.remote_second_revocation_hash,
        local_revocation_chain: pending.local_revocation_chain,
        remote_revocation_chain,
        local_delivery_script: params.local_delivery_script,
        remote_delivery_script: params.remote_delivery_script,
        config: pending.config,
        update_count: 0,
        total_sent: 0,
        total_received: 0,
        opened_at,
        status: ChannelStatus::Open,
        rollback: None,
    })
}

/// Stages a new HTLC offered by the local party and returns its id.
pub fn add_htlc(
    channel: &mut ChannelState,
    amount: u64,
    payment_hash: [u8; 32],
    timeout_height: u32,
) -> Result<u64, Error> {
    check_can_stage(channel)?;
    check_htlc(
        channel,
        HtlcDirection::Offered,
        amount,
        channel.local_balance,
        timeout_height,
    )?;

    let id = stage_htlc(
        channel,
        HtlcDirection::Offered,
        amount,
        payment_hash,
        timeout_height,
    );
    channel.local_balance -= amount;
    Ok(id)
}

/// Stages a new HTLC offered by the counterparty and returns its id.
pub fn receive_htlc(
    channel: &mut ChannelState,
    amount: u64,
    payment_hash: [u8; 32],
    timeout_height: u32,
) -> Result<u64, Error> {
    check_can_stage(channel)?;
    check_htlc(
        channel,
        HtlcDirection::Received,
        amount,
        channel.remote_balance,
        timeout_height,
    )?;

    let id = stage_htlc(
        channel,
        HtlcDirection::Received,
        amount,
        payment_hash,
        timeout_height,
    );
    channel.remote_balance -= amount;
    Ok(id)
}

/// Stages the settlement of the pending HTLC locked to the hash of
/// `payment_preimage`, crediting its amount to the payee.
pub fn settle_htlc(channel: &mut ChannelState, payment_preimage: &[u8; 32]) -> Result<Htlc, Error> {
    check_can_stage(channel)?;

    let payment_hash = sha256::Hash::hash(payment_preimage).into_inner();
    let index = channel
        .pending_htlcs
        .iter()
        .position(|h| h.payment_hash == payment_hash)
        .ok_or(Error::HtlcNotFound)?;

    begin_staging(channel);
    let htlc = channel.pending_htlcs.remove(index);
    match htlc.direction {
        HtlcDirection::Offered => {
            channel.remote_balance += htlc.amount;
            channel.total_sent += htlc.amount;
        }
        HtlcDirection::Received => {
            channel.local_balance += htlc.amount;
            channel.total_received += htlc.amount;
        }
    }

    Ok(htlc)
}

/// Stages the removal of the pending HTLC with the given id, refunding its
/// amount to the party that proposed it.
pub fn fail_htlc(channel: &mut ChannelState, htlc_id: u64) -> Result<Htlc, Error> {
    check_can_stage(channel)?;

    let index = channel
        .pending_htlcs
        .iter()
        .position(|h| h.id == htlc_id)
        .ok_or(Error::HtlcNotFound)?;

    begin_staging(channel);
    let htlc = channel.pending_htlcs.remove(index);
    match htlc.direction {
        HtlcDirection::Offered => channel.local_balance += htlc.amount,
        HtlcDirection::Received => channel.remote_balance += htlc.amount,
    }

    Ok(htlc)
}

/// Builds the commitment pair for the staged state, signs the counterparty
/// commitment and moves the channel to [`ChannelStatus::PendingCommit`]. While
/// the channel is already pending, the signature for the pending counterparty
/// commitment is returned again.
pub fn advance_commitment<C: Signing>(
    secp: &Secp256k1<C>,
    channel: &mut ChannelState,
) -> Result<CommitmentSigned, Error> {
    if let ChannelStatus::PendingCommit {
        remote_commit_tx, ..
    } = &channel.status
    {
        let signature = sign_commitment(
            secp,
            remote_commit_tx,
            &channel.funding_redeem_script,
            channel.capacity,
            &channel.local_commit_key,
        )?;
        return Ok(CommitmentSigned {
            channel_id: channel.channel_id,
            signature,
        });
    }

    check_can_stage(channel)?;

    if !channel.is_balanced() {
        return Err(Error::InvalidState(
            "Staged balances do not add up to the channel capacity".to_string(),
        ));
    }

    let local_secret = channel
        .local_revocation_chain
        .secret_for_commitment(channel.update_count + 1)?;
    let (local_amount, remote_amount) = channel.commitment_amounts();

    let (local_commit_tx, remote_commit_tx) = build_commitment_pair(
        secp,
        &channel.scheme,
        &channel.funding_outpoint,
        &channel.local_commit_key,
        &channel.remote_commit_key,
        &revocation_hash(&local_secret),
        &channel.remote_next_revocation_hash,
        local_amount,
        remote_amount,
    )?;

    let signature = sign_commitment(
        secp,
        &remote_commit_tx,
        &channel.funding_redeem_script,
        channel.capacity,
        &channel.local_commit_key,
    )?;

    channel.status = ChannelStatus::PendingCommit {
        local_commit_tx,
        remote_commit_tx,
    };

    Ok(CommitmentSigned {
        channel_id: channel.channel_id,
        signature,
    })
}

/// Verifies the counterparty signature for the staged local commitment. On
/// success the staged state becomes the committed one. On failure the staged
/// updates are discarded and the channel is faulted.
pub fn receive_commitment_signature<C: Verification>(
    secp: &Secp256k1<C>,
    channel: &mut ChannelState,
    msg: &CommitmentSigned,
) -> Result<(), Error> {
    check_channel_id(&channel.channel_id, &msg.channel_id)?;
    check_not_closed(channel)?;

    let (local_commit_tx, remote_commit_tx) = match &channel.status {
        ChannelStatus::PendingCommit {
            local_commit_tx,
            remote_commit_tx,
        } => (local_commit_tx.clone(), remote_commit_tx.clone()),
        _ => {
            return Err(Error::InvalidState(
                "No commitment is pending a signature".to_string(),
            ))
        }
    };

    if verify_commitment_signature(
        secp,
        &local_commit_tx,
        &channel.funding_redeem_script,
        channel.capacity,
        &msg.signature,
        &channel.remote_commit_key,
    )
    .is_err()
    {
        channel.discard_staged_updates();
        channel.status = ChannelStatus::Faulted;
        return Err(Error::InvalidCommitmentSignature);
    }

    channel.local_commit_tx = local_commit_tx;
    channel.remote_commit_tx = remote_commit_tx;
    channel.remote_commit_signature = msg.signature;
    channel.update_count += 1;
    channel.rollback = None;
    channel.status = ChannelStatus::Committed {
        local_revoked: false,
        remote_revoked: false,
    };

    Ok(())
}

/// Discloses the secret revoking the superseded local commitment together with
/// the hash protecting the commitment after next. Calling it again before the
/// channel is back to [`ChannelStatus::Open`] returns the same message.
pub fn reveal_revocation(channel: &mut ChannelState) -> Result<RevokeAndAck, Error> {
    check_not_closed(channel)?;

    let remote_revoked = match channel.status {
        ChannelStatus::Committed { remote_revoked, .. } => remote_revoked,
        _ => return Err(Error::PrematureRevocation),
    };

    let revoked_number = channel
        .update_count
        .checked_sub(1)
        .ok_or(Error::PrematureRevocation)?;
    let per_commitment_secret = channel
        .local_revocation_chain
        .secret_for_commitment(revoked_number)?;

    let next_number = channel.update_count + 1;
    while channel.local_revocation_chain.produced() <= next_number {
        channel.local_revocation_chain.next_secret()?;
    }
    let next_revocation_hash = revocation_hash(
        &channel
            .local_revocation_chain
            .secret_for_commitment(next_number)?,
    );

    channel.status = if remote_revoked {
        ChannelStatus::Open
    } else {
        ChannelStatus::Committed {
            local_revoked: true,
            remote_revoked: false,
        }
    };

    Ok(RevokeAndAck {
        channel_id: channel.channel_id,
        per_commitment_secret,
        next_revocation_hash,
    })
}

/// Checks and records the secret revoking the previous commitment of the
/// counterparty. A secret that does not match the expected hash, or a next
/// hash that was already used, faults the channel.
pub fn accept_revocation(channel: &mut ChannelState, msg: &RevokeAndAck) -> Result<(), Error> {
    check_channel_id(&channel.channel_id, &msg.channel_id)?;
    check_not_closed(channel)?;

    let local_revoked = match channel.status {
        ChannelStatus::Committed {
            local_revoked,
            remote_revoked: false,
        } => local_revoked,
        ChannelStatus::Committed {
            remote_revoked: true,
            ..
        } => {
            let last = channel.remote_revocation_chain.revoked_count() - 1;
            return if channel.remote_revocation_chain.get_secret(last)
                == Some(msg.per_commitment_secret)
            {
                Ok(())
            } else {
                Err(Error::RevocationMismatch(
                    "Previous commitment was already revoked with another secret".to_string(),
                ))
            };
        }
        _ => return Err(Error::PrematureRevocation),
    };

    if revocation_hash(&msg.per_commitment_secret) != channel.remote_current_revocation_hash {
        channel.status = ChannelStatus::Faulted;
        return Err(Error::RevocationMismatch(
            "Secret does not match the revocation hash".to_string(),
        ));
    }

    let mut store = channel.remote_revocation_chain.clone();
    if let Err(e) = store
        .provide_secret(msg.per_commitment_secret)
        .and_then(|_| store.add_hash(msg.next_revocation_hash))
    {
        channel.status = ChannelStatus::Faulted;
        return Err(e);
    }

    channel.remote_revocation_chain = store;
    channel.remote_current_revocation_hash = channel.remote_next_revocation_hash;
    channel.remote_next_revocation_hash = msg.next_revocation_hash;
    channel.status = if local_revoked {
        ChannelStatus::Open
    } else {
        ChannelStatus::Committed {
            local_revoked: false,
            remote_revoked: true,
        }
    };

    Ok(())
}

/// Builds and signs a transaction paying each party its balance, the
/// initiator paying the fee.
pub fn offer_cooperative_close<C: Signing>(
    secp: &Secp256k1<C>,
    channel: &mut ChannelState,
) -> Result<ClosingSigned, Error> {
    check_can_close(channel)?;

    let close_tx = get_close_tx(channel)?;
    let signature = sign_commitment(
        secp,
        &close_tx,
        &channel.funding_redeem_script,
        channel.capacity,
        &channel.local_commit_key,
    )?;

    channel.status = ChannelStatus::CooperativelyClosing { close_tx };

    Ok(ClosingSigned {
        channel_id: channel.channel_id,
        signature,
    })
}

/// Verifies the counterparty signature for the cooperative close transaction
/// and returns it fully witnessed, ready to be broadcast.
pub fn accept_cooperative_close<C: Signing + Verification>(
    secp: &Secp256k1<C>,
    channel: &mut ChannelState,
    msg: &ClosingSigned,
) -> Result<Transaction, Error> {
    check_channel_id(&channel.channel_id, &msg.channel_id)?;

    let close_tx = match &channel.status {
        ChannelStatus::CooperativelyClosing { close_tx } => close_tx.clone(),
        _ => {
            check_can_close(channel)?;
            get_close_tx(channel)?
        }
    };

    verify_commitment_signature(
        secp,
        &close_tx,
        &channel.funding_redeem_script,
        channel.capacity,
        &msg.signature,
        &channel.remote_commit_key,
    )
    .map_err(|_| Error::InvalidCommitmentSignature)?;

    let mut signed_tx = close_tx.clone();
    satisfy_funding_input(
        secp,
        &mut signed_tx,
        &channel.funding_redeem_script,
        channel.capacity,
        &channel.local_commit_key,
        &msg.signature,
        &channel.remote_commit_key,
    )?;

    channel.status = ChannelStatus::CooperativelyClosing { close_tx };

    Ok(signed_tx)
}

/// Returns the current local commitment with a complete witness. Staged
/// updates are discarded and the channel is considered closed.
pub fn force_close<C: Signing>(
    secp: &Secp256k1<C>,
    channel: &mut ChannelState,
) -> Result<Transaction, Error> {
    if channel.status.is_of_type(&ChannelStatusType::ForceClosed) {
        return Err(Error::ChannelClosed);
    }

    let signed_tx = satisfy_commitment_input(
        secp,
        &channel.local_commit_tx,
        &channel.funding_redeem_script,
        channel.capacity,
        &channel.local_commit_key,
        &channel.remote_commit_signature,
        &channel.remote_commit_key,
    )?;

    channel.discard_staged_updates();
    channel.status = ChannelStatus::ForceClosed {
        closing_txid: signed_tx.txid(),
    };

    Ok(signed_tx)
}

/// Processes a transaction spending the funding output. If it is a revoked
/// commitment of the counterparty, returns a transaction sweeping its output
/// to the local delivery script.
pub fn on_funding_spent<C: Signing>(
    secp: &Secp256k1<C>,
    channel: &mut ChannelState,
    spending_tx: &Transaction,
) -> Result<Option<Transaction>, Error> {
    let closing_txid = spending_tx.txid();
    let is_known = closing_txid == channel.local_commit_tx.txid()
        || closing_txid == channel.remote_commit_tx.txid()
        || match &channel.status {
            ChannelStatus::PendingCommit {
                local_commit_tx,
                remote_commit_tx,
            } => {
                closing_txid == local_commit_tx.txid() || closing_txid == remote_commit_tx.txid()
            }
            ChannelStatus::CooperativelyClosing { close_tx } => closing_txid == close_tx.txid(),
            _ => false,
        };

    if let ChannelStatus::CooperativelyClosing { close_tx } = &channel.status {
        if closing_txid == close_tx.txid() {
            return Ok(None);
        }
    }

    let punish_tx = if is_known {
        None
    } else {
        find_and_punish_revoked(secp, channel, spending_tx)?
    };

    channel.discard_staged_updates();
    channel.status = ChannelStatus::ForceClosed { closing_txid };

    Ok(punish_tx)
}

fn find_and_punish_revoked<C: Signing>(
    secp: &Secp256k1<C>,
    channel: &ChannelState,
    spending_tx: &Transaction,
) -> Result<Option<Transaction>, Error> {
    let owner_pk = BitcoinPublicKey::new(channel.remote_commit_key);
    let store = &channel.remote_revocation_chain;

    for commitment_number in (0..store.revoked_count()).rev() {
        let secret = match store.get_secret(commitment_number) {
            Some(s) => s,
            None => continue,
        };

        match create_and_sign_punish_transaction(
            secp,
            &channel.scheme,
            spending_tx,
            &owner_pk,
            &channel.local_commit_key,
            &secret,
            &channel.local_delivery_script,
            channel.config.fee_rate_per_vb,
        ) {
            Ok(tx) => return Ok(Some(tx)),
            Err(lnchannel::Error::InvalidArgument) => continue,
            Err(e) => return Err(e.into()),
        }
    }

    Ok(None)
}

/// Reclaims the funding output through the refund branch of the absolute
/// timeout funding script. Only available to the initiator, once the refund
/// height is reached.
pub fn refund_funding<C: Signing>(
    secp: &Secp256k1<C>,
    channel: &mut ChannelState,
    refund_sk: &SecretKey,
) -> Result<Transaction, Error> {
    if channel.status.is_of_type(&ChannelStatusType::ForceClosed) {
        return Err(Error::ChannelClosed);
    }

    let refund_height = match channel.scheme {
        CommitmentScheme::AbsoluteTimeout { refund_height, .. } if channel.is_initiator => {
            refund_height
        }
        _ => {
            return Err(Error::InvalidParameters(
                "Only the initiator of an absolute timeout channel can refund".to_string(),
            ))
        }
    };

    let refund_tx = create_and_sign_refund_transaction(
        secp,
        &channel.funding_outpoint,
        &channel.funding_redeem_script,
        channel.capacity,
        refund_height,
        refund_sk,
        &channel.local_delivery_script,
        channel.config.fee_rate_per_vb,
    )?;

    channel.discard_staged_updates();
    channel.status = ChannelStatus::ForceClosed {
        closing_txid: refund_tx.txid(),
    };

    Ok(refund_tx)
}

fn build_commitment_pair<C: Signing>(
    secp: &Secp256k1<C>,
    scheme: &CommitmentScheme,
    funding_outpoint: &OutPoint,
    local_commit_key: &SecretKey,
    remote_commit_key: &PublicKey,
    local_revocation_hash: &[u8; 32],
    remote_revocation_hash: &[u8; 32],
    local_amount: u64,
    remote_amount: u64,
) -> Result<(Transaction, Transaction), Error> {
    let local_pk = BitcoinPublicKey::new(PublicKey::from_secret_key(secp, local_commit_key));
    let remote_pk = BitcoinPublicKey::new(*remote_commit_key);

    let local_commit_tx = create_commitment_transaction(
        scheme,
        funding_outpoint,
        &local_pk,
        &remote_pk,
        &sha256::Hash::from_inner(*local_revocation_hash),
        local_amount,
        remote_amount,
    )?;

    let remote_commit_tx = create_commitment_transaction(
        scheme,
        funding_outpoint,
        &remote_pk,
        &local_pk,
        &sha256::Hash::from_inner(*remote_revocation_hash),
        remote_amount,
        local_amount,
    )?;

    Ok((local_commit_tx, remote_commit_tx))
}

fn get_close_tx(channel: &ChannelState) -> Result<Transaction, Error> {
    if !channel.pending_htlcs.is_empty() {
        return Err(Error::InvalidParameters(
            "Cannot close a channel with pending htlcs".to_string(),
        ));
    }

    let fee = APPROXIMATE_CLOSING_VBYTES * channel.config.fee_rate_per_vb;
    let (local_payout, remote_payout) = if channel.is_initiator {
        (
            channel
                .local_balance
                .checked_sub(fee)
                .ok_or(Error::InsufficientBalance {
                    requested: fee,
                    available: channel.local_balance,
                })?,
            channel.remote_balance,
        )
    } else {
        (
            channel.local_balance,
            channel
                .remote_balance
                .checked_sub(fee)
                .ok_or(Error::InsufficientBalance {
                    requested: fee,
                    available: channel.remote_balance,
                })?,
        )
    };

    Ok(create_cooperative_close_transaction(
        &channel.funding_outpoint,
        &channel.local_delivery_script,
        local_payout,
        &channel.remote_delivery_script,
        remote_payout,
    ))
}

fn check_channel_id(expected: &ChannelId, received: &ChannelId) -> Result<(), Error> {
    if expected != received {
        return Err(Error::InvalidParameters(
            "Message is for another channel".to_string(),
        ));
    }
    Ok(())
}

fn check_not_closed(channel: &ChannelState) -> Result<(), Error> {
    if channel.status.is_closed() {
        return Err(Error::ChannelClosed);
    }
    if channel.status == ChannelStatus::Faulted {
        return Err(Error::Faulted);
    }
    Ok(())
}

fn check_can_stage(channel: &ChannelState) -> Result<(), Error> {
    check_not_closed(channel)?;
    if channel.status != ChannelStatus::Open {
        return Err(Error::UpdateInProgress);
    }
    Ok(())
}

fn check_can_close(channel: &ChannelState) -> Result<(), Error> {
    match channel.status {
        ChannelStatus::Open | ChannelStatus::Faulted => Ok(()),
        ChannelStatus::CooperativelyClosing { .. } | ChannelStatus::ForceClosed { .. } => {
            Err(Error::ChannelClosed)
        }
        _ => Err(Error::UpdateInProgress),
    }
}

fn check_htlc(
    channel: &ChannelState,
    direction: HtlcDirection,
    amount: u64,
    proposer_balance: u64,
    timeout_height: u32,
) -> Result<(), Error> {
    if amount < channel.config.min_htlc_amount {
        return Err(Error::InvalidParameters(format!(
            "Htlc amount {} is below the minimum of {}",
            amount, channel.config.min_htlc_amount
        )));
    }

    if channel.pending_htlcs.len() >= channel.config.max_pending_htlcs {
        return Err(Error::TooManyPendingHtlcs(channel.config.max_pending_htlcs));
    }

    let reserve = channel.scheme.reserve();
    let available = proposer_balance.saturating_sub(reserve);
    if amount > available {
        return Err(Error::InsufficientBalance {
            requested: amount,
            available,
        });
    }

    if let CommitmentScheme::AbsoluteTimeout { refund_height, .. } = channel.scheme {
        if channel.in_flight(direction) + amount >= reserve {
            return Err(Error::ReserveExceeded);
        }

        // The htlc must resolve before the funder can reclaim the funding output.
        if timeout_height.saturating_add(channel.config.htlc_timeout_blocks) > refund_height {
            return Err(Error::InvalidParameters(format!(
                "Htlc timeout {} is too close to the refund height {}",
                timeout_height, refund_height
            )));
        }
    }

    Ok(())
}

fn begin_staging(channel: &mut ChannelState) {
    if channel.rollback.is_none() {
        channel.rollback = Some(channel.committed_balances());
    }
}

fn stage_htlc(
    channel: &mut ChannelState,
    direction: HtlcDirection,
    amount: u64,
    payment_hash: [u8; 32],
    timeout_height: u32,
) -> u64 {
    begin_staging(channel);
    let id = channel.next_htlc_id;
    channel.next_htlc_id += 1;
    channel.pending_htlcs.push(Htlc {
        id,
        amount,
        payment_hash,
        timeout_height,
        direction,
    });
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::revocation::initial_revocation_hashes;
    use bitcoin::{PackedLockTime, Script, TxOut};
    use secp256k1_zkp::{rand::thread_rng, SECP256K1};

    struct Party {
        commit_sk: SecretKey,
        multi_sig_sk: SecretKey,
        seed: [u8; 32],
        delivery_script: Script,
    }

    impl Party {
        fn new(seed: u8) -> Self {
            let delivery_sk = SecretKey::new(&mut thread_rng());
            Party {
                commit_sk: SecretKey::new(&mut thread_rng()),
                multi_sig_sk: SecretKey::new(&mut thread_rng()),
                seed: [seed; 32],
                delivery_script: Script::new_v0_p2wpkh(
                    &BitcoinPublicKey::new(PublicKey::from_secret_key(SECP256K1, &delivery_sk))
                        .wpubkey_hash()
                        .unwrap(),
                ),
            }
        }

        fn commit_pk(&self) -> PublicKey {
            PublicKey::from_secret_key(SECP256K1, &self.commit_sk)
        }

        fn multi_sig_pk(&self) -> PublicKey {
            PublicKey::from_secret_key(SECP256K1, &self.multi_sig_sk)
        }
    }

    fn params(
        scheme: CommitmentScheme,
        own: &Party,
        counter: &Party,
        is_initiator: bool,
        funding_tx: &Transaction,
        own_balance: u64,
        counter_balance: u64,
    ) -> ChannelParams {
        let (first, second) = initial_revocation_hashes(&counter.seed);
        ChannelParams {
            counterparty_id: counter.multi_sig_pk(),
            scheme,
            is_initiator,
            funding_tx: funding_tx.clone(),
            funding_outpoint: OutPoint {
                txid: funding_tx.txid(),
                vout: 0,
            },
            local_balance: own_balance,
            remote_balance: counter_balance,
            local_commit_key: own.commit_sk,
            remote_commit_key: counter.commit_pk(),
            multi_sig_key: own.multi_sig_pk(),
            remote_multi_sig_key: counter.multi_sig_pk(),
            revocation_seed: own.seed,
            remote_first_revocation_hash: first,
            remote_second_revocation_hash: second,
            local_delivery_script: own.delivery_script.clone(),
            remote_delivery_script: counter.delivery_script.clone(),
        }
    }

    fn open_pair(
        scheme: CommitmentScheme,
        alice_balance: u64,
        bob_balance: u64,
    ) -> (ChannelState, ChannelState, Party, Party) {
        let alice = Party::new(1);
        let bob = Party::new(2);
        let funding_script = scheme
            .funding_redeemscript(&alice.commit_pk(), &bob.commit_pk(), &alice.multi_sig_pk())
            .unwrap();
        let funding_tx = Transaction {
            version: 2,
            lock_time: PackedLockTime::ZERO,
            input: Vec::new(),
            output: vec![TxOut {
                value: alice_balance + bob_balance,
                script_pubkey: funding_script.to_v0_p2wsh(),
            }],
        };
        let config = ChannelConfig::default();

        let (alice_pending, alice_msg) = new_channel(
            SECP256K1,
            params(
                scheme,
                &alice,
                &bob,
                true,
                &funding_tx,
                alice_balance,
                bob_balance,
            ),
            config.clone(),
        )
        .unwrap();
        let (bob_pending, bob_msg) = new_channel(
            SECP256K1,
            params(
                scheme,
                &bob,
                &alice,
                false,
                &funding_tx,
                bob_balance,
                alice_balance,
            ),
            config,
        )
        .unwrap();

        let alice_channel = finalize_channel(SECP256K1, alice_pending, &bob_msg, 0).unwrap();
        let bob_channel = finalize_channel(SECP256K1, bob_pending, &alice_msg, 0).unwrap();
        (alice_channel, bob_channel, alice, bob)
    }

    fn exchange_commitments(alice: &mut ChannelState, bob: &mut ChannelState) {
        let alice_sig = advance_commitment(SECP256K1, alice).unwrap();
        let bob_sig = advance_commitment(SECP256K1, bob).unwrap();
        receive_commitment_signature(SECP256K1, alice, &bob_sig).unwrap();
        receive_commitment_signature(SECP256K1, bob, &alice_sig).unwrap();
        let alice_rev = reveal_revocation(alice).unwrap();
        let bob_rev = reveal_revocation(bob).unwrap();
        accept_revocation(alice, &bob_rev).unwrap();
        accept_revocation(bob, &alice_rev).unwrap();
    }

    fn revocable() -> CommitmentScheme {
        CommitmentScheme::RevocableTimeout { csv_delay: 144 }
    }

    #[test]
    fn open_channel_test() {
        let (alice, bob, _, _) = open_pair(revocable(), 600_000, 400_000);

        assert_eq!(alice.status, ChannelStatus::Open);
        assert_eq!(alice.update_count, 0);
        assert_eq!(alice.channel_id, bob.channel_id);
        assert_eq!(alice.local_commit_tx, bob.remote_commit_tx);
        assert_eq!(alice.remote_commit_tx, bob.local_commit_tx);
        assert!(alice.is_balanced() && bob.is_balanced());
    }

    #[test]
    fn open_channel_with_mismatched_balances_fails() {
        let alice = Party::new(1);
        let bob = Party::new(2);
        let funding_tx = Transaction {
            version: 2,
            lock_time: PackedLockTime::ZERO,
            input: Vec::new(),
            output: vec![TxOut {
                value: 1_000_000,
                script_pubkey: Script::new(),
            }],
        };

        let res = new_channel(
            SECP256K1,
            params(revocable(), &alice, &bob, true, &funding_tx, 600_000, 300_000),
            ChannelConfig::default(),
        );
        assert!(matches!(res, Err(Error::InvalidParameters(_))));

        let res = new_channel(
            SECP256K1,
            params(revocable(), &alice, &bob, true, &funding_tx, 600_000, 400_000),
            ChannelConfig::default(),
        );
        assert!(matches!(res, Err(Error::InvalidParameters(_))));
    }

    #[test]
    fn htlc_add_and_settle_test() {
        let (mut alice, mut bob, _, _) = open_pair(revocable(), 600_000, 400_000);
        let preimage = [7u8; 32];
        let payment_hash = sha256::Hash::hash(&preimage).into_inner();

        let id = add_htlc(&mut alice, 50_000, payment_hash, 100).unwrap();
        assert_eq!(receive_htlc(&mut bob, 50_000, payment_hash, 100).unwrap(), id);
        assert_eq!(alice.local_balance, 550_000);
        assert!(alice.is_balanced());
        exchange_commitments(&mut alice, &mut bob);
        assert_eq!(alice.commitment_amounts(), (600_000, 400_000));

        settle_htlc(&mut alice, &preimage).unwrap();
        settle_htlc(&mut bob, &preimage).unwrap();
        exchange_commitments(&mut alice, &mut bob);

        assert_eq!(alice.local_balance, 550_000);
        assert_eq!(alice.remote_balance, 450_000);
        assert_eq!(bob.local_balance, 450_000);
        assert_eq!(alice.total_sent, 50_000);
        assert_eq!(bob.total_received, 50_000);
        assert_eq!(alice.update_count, 2);
        assert_eq!(alice.local_commit_tx, bob.remote_commit_tx);
    }

    #[test]
    fn fail_htlc_refunds_proposer() {
        let (mut alice, _, _, _) = open_pair(revocable(), 600_000, 400_000);
        let id = add_htlc(&mut alice, 10_000, [1u8; 32], 100).unwrap();
        let htlc = fail_htlc(&mut alice, id).unwrap();
        assert_eq!(htlc.amount, 10_000);
        assert_eq!(alice.local_balance, 600_000);
        assert!(matches!(fail_htlc(&mut alice, id), Err(Error::HtlcNotFound)));
    }

    #[test]
    fn too_many_pending_htlcs_test() {
        let (mut alice, _, _, _) = open_pair(revocable(), 600_000, 400_000);
        for i in 0..10 {
            add_htlc(&mut alice, 1_000, [i as u8; 32], 100).unwrap();
        }
        assert!(matches!(
            add_htlc(&mut alice, 1_000, [11u8; 32], 100),
            Err(Error::TooManyPendingHtlcs(10))
        ));
        assert_eq!(alice.pending_htlcs.len(), 10);
    }

    #[test]
    fn staging_refused_while_commit_pending() {
        let (mut alice, _, _, _) = open_pair(revocable(), 600_000, 400_000);
        add_htlc(&mut alice, 1_000, [1u8; 32], 100).unwrap();
        advance_commitment(SECP256K1, &mut alice).unwrap();
        assert!(matches!(
            add_htlc(&mut alice, 1_000, [2u8; 32], 100),
            Err(Error::UpdateInProgress)
        ));
        assert!(matches!(
            reveal_revocation(&mut alice),
            Err(Error::PrematureRevocation)
        ));
    }

    #[test]
    fn advance_commitment_is_repeatable_while_pending() {
        let (mut alice, mut bob, _, _) = open_pair(revocable(), 600_000, 400_000);
        add_htlc(&mut alice, 1_000, [1u8; 32], 100).unwrap();
        receive_htlc(&mut bob, 1_000, [1u8; 32], 100).unwrap();

        let first = advance_commitment(SECP256K1, &mut alice).unwrap();
        let second = advance_commitment(SECP256K1, &mut alice).unwrap();
        assert_eq!(first, second);
        assert_eq!(alice.pending_htlcs.len(), 1);

        advance_commitment(SECP256K1, &mut bob).unwrap();
        receive_commitment_signature(SECP256K1, &mut bob, &second).unwrap();
        assert_eq!(bob.update_count, 1);
    }

    #[test]
    fn reserve_is_enforced_under_absolute_scheme() {
        let scheme = CommitmentScheme::AbsoluteTimeout {
            refund_height: 1_000,
            reserve: 20_000,
        };
        let (mut alice, _, _, _) = open_pair(scheme, 600_000, 400_000);

        assert!(matches!(
            add_htlc(&mut alice, 590_000, [1u8; 32], 100),
            Err(Error::InsufficientBalance {
                requested: 590_000,
                available: 580_000
            })
        ));
        assert!(matches!(
            add_htlc(&mut alice, 20_000, [1u8; 32], 100),
            Err(Error::ReserveExceeded)
        ));
        assert!(matches!(
            add_htlc(&mut alice, 1_000, [1u8; 32], 990),
            Err(Error::InvalidParameters(_))
        ));
        add_htlc(&mut alice, 19_000, [1u8; 32], 100).unwrap();
    }

    #[test]
    fn revoked_commitment_is_punished() {
        let (mut alice, mut bob, _, _) = open_pair(revocable(), 600_000, 400_000);
        let old_bob_commit = bob.local_commit_tx.clone();

        let preimage = [3u8; 32];
        let payment_hash = sha256::Hash::hash(&preimage).into_inner();
        add_htlc(&mut alice, 50_000, payment_hash, 100).unwrap();
        receive_htlc(&mut bob, 50_000, payment_hash, 100).unwrap();
        exchange_commitments(&mut alice, &mut bob);

        let punish_tx = on_funding_spent(SECP256K1, &mut alice, &old_bob_commit)
            .unwrap()
            .expect("a punish transaction");
        assert_eq!(punish_tx.input[0].previous_output.txid, old_bob_commit.txid());
        assert_eq!(punish_tx.output[0].script_pubkey, alice.local_delivery_script);
        assert!(matches!(alice.status, ChannelStatus::ForceClosed { .. }));
    }

    #[test]
    fn current_commitment_spend_is_not_punished() {
        let (mut alice, bob, _, _) = open_pair(revocable(), 600_000, 400_000);
        let res = on_funding_spent(SECP256K1, &mut alice, &bob.local_commit_tx).unwrap();
        assert!(res.is_none());
        assert_eq!(
            alice.status,
            ChannelStatus::ForceClosed {
                closing_txid: bob.local_commit_tx.txid()
            }
        );
    }

    #[test]
    fn cooperative_close_test() {
        let (mut alice, mut bob, _, _) = open_pair(revocable(), 600_000, 400_000);
        let msg = offer_cooperative_close(SECP256K1, &mut alice).unwrap();
        let close_tx = accept_cooperative_close(SECP256K1, &mut bob, &msg).unwrap();

        assert_eq!(close_tx.input[0].witness.len(), 4);
        let fee = APPROXIMATE_CLOSING_VBYTES * 2;
        let total: u64 = close_tx.output.iter().map(|o| o.value).sum();
        assert_eq!(total, 1_000_000 - fee);
        assert!(bob.status.is_closed());
        assert!(matches!(
            add_htlc(&mut alice, 1_000, [1u8; 32], 100),
            Err(Error::ChannelClosed)
        ));
    }

    #[test]
    fn cooperative_close_spend_keeps_closing_status() {
        let (mut alice, mut bob, _, _) = open_pair(revocable(), 600_000, 400_000);
        let msg = offer_cooperative_close(SECP256K1, &mut alice).unwrap();
        let close_tx = accept_cooperative_close(SECP256K1, &mut bob, &msg).unwrap();

        let res = on_funding_spent(SECP256K1, &mut alice, &close_tx).unwrap();
        assert!(res.is_none());
        assert!(matches!(
            alice.status,
            ChannelStatus::CooperativelyClosing { .. }
        ));

        let res = on_funding_spent(SECP256K1, &mut bob, &close_tx).unwrap();
        assert!(res.is_none());
        assert!(bob.status.is_of_type(&ChannelStatusType::CooperativelyClosing));
    }

    #[test]
    fn refund_requires_initiator_of_absolute_channel() {
        let scheme = CommitmentScheme::AbsoluteTimeout {
            refund_height: 1_000,
            reserve: 20_000,
        };
        let (mut alice, mut bob, alice_party, bob_party) = open_pair(scheme, 600_000, 400_000);

        assert!(refund_funding(SECP256K1, &mut bob, &bob_party.multi_sig_sk).is_err());
        let refund_tx = refund_funding(SECP256K1, &mut alice, &alice_party.multi_sig_sk).unwrap();
        assert_eq!(refund_tx.lock_time, PackedLockTime(1_000));
        assert!(matches!(alice.status, ChannelStatus::ForceClosed { .. }));
    }
}
