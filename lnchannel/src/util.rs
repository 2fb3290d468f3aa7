//! Utility functions not uniquely related to commitment transactions

use bitcoin::hashes::Hash;
use bitcoin::util::sighash::SighashCache;
use bitcoin::{EcdsaSighashType, Script, Sequence, Transaction, TxIn, TxOut, Witness};
use secp256k1_zkp::{ecdsa::Signature, Message, PublicKey, Secp256k1, SecretKey, Signing};

use crate::Error;

// Setting the nSequence for every input of a transaction to this value disables
// both RBF and nLockTime usage.
pub(crate) const DISABLE_LOCKTIME: Sequence = Sequence(0xffffffff);
// Setting the nSequence for every input of a transaction to this value disables
// RBF but enables nLockTime usage.
pub(crate) const ENABLE_LOCKTIME: Sequence = Sequence(0xfffffffe);

/// Get a BIP143 (https://github.com/bitcoin/bips/blob/master/bip-0143.mediawiki)
/// signature hash with sighash all flag for a segwit transaction input as
/// a Message instance
pub(crate) fn get_sig_hash_msg(
    tx: &Transaction,
    input_index: usize,
    script_pubkey: &Script,
    value: u64,
) -> Result<Message, Error> {
    let sig_hash = SighashCache::new(tx).segwit_signature_hash(
        input_index,
        script_pubkey,
        value,
        EcdsaSighashType::All,
    )?;
    Ok(Message::from_slice(&sig_hash)?)
}

/// Convert a raw signature to DER encoded and append the sighash type, to use
/// a signature in a signature script
pub(crate) fn finalize_sig(sig: &Signature, sig_hash_type: EcdsaSighashType) -> Vec<u8> {
    [
        sig.serialize_der().as_ref(),
        &[sig_hash_type.to_u32() as u8],
    ]
    .concat()
}

/// Generate a signature for a given transaction input using the given secret key.
pub fn get_raw_sig_for_tx_input<C: Signing>(
    secp: &Secp256k1<C>,
    tx: &Transaction,
    input_index: usize,
    script_pubkey: &Script,
    value: u64,
    sk: &SecretKey,
) -> Result<Signature, Error> {
    let sig_hash_msg = get_sig_hash_msg(tx, input_index, script_pubkey, value)?;
    Ok(secp.sign_ecdsa_low_r(&sig_hash_msg, sk))
}

/// Returns the two keys ordered by their compressed serialization.
pub(crate) fn order_keys<'a>(a: &'a PublicKey, b: &'a PublicKey) -> (&'a PublicKey, &'a PublicKey) {
    if a.serialize() <= b.serialize() {
        (a, b)
    } else {
        (b, a)
    }
}

/// Generates a signature for a given p2wsh 2-of-2 transaction input using the
/// given secret key, and places the generated and provided signatures on the
/// input's witness stack, ordering the signatures based on the ordering of the
/// associated public keys.
pub fn sign_multi_sig_input<C: Signing>(
    secp: &Secp256k1<C>,
    transaction: &mut Transaction,
    other_sig: &Signature,
    other_pk: &PublicKey,
    sk: &SecretKey,
    script_pubkey: &Script,
    input_value: u64,
    input_index: usize,
) -> Result<(), Error> {
    let own_sig = get_raw_sig_for_tx_input(
        secp,
        transaction,
        input_index,
        script_pubkey,
        input_value,
        sk,
    )?;
    let own_pk = PublicKey::from_secret_key(secp, sk);

    transaction.input[input_index].witness =
        get_multi_sig_witness(&own_sig, &own_pk, other_sig, other_pk, script_pubkey);

    Ok(())
}

/// Builds the witness spending a 2-of-2 multisig with the provided signatures.
pub(crate) fn get_multi_sig_witness(
    sig_a: &Signature,
    pk_a: &PublicKey,
    sig_b: &Signature,
    pk_b: &PublicKey,
    script_pubkey: &Script,
) -> Witness {
    let finalized_a = finalize_sig(sig_a, EcdsaSighashType::All);
    let finalized_b = finalize_sig(sig_b, EcdsaSighashType::All);

    if pk_a.serialize() <= pk_b.serialize() {
        Witness::from_vec(vec![
            Vec::new(),
            finalized_a,
            finalized_b,
            script_pubkey.to_bytes(),
        ])
    } else {
        Witness::from_vec(vec![
            Vec::new(),
            finalized_b,
            finalized_a,
            script_pubkey.to_bytes(),
        ])
    }
}

/// Get the vout and TxOut of the first output with a matching `script_pubkey`
/// if any.
pub fn get_output_for_script_pubkey<'a>(
    tx: &'a Transaction,
    script_pubkey: &Script,
) -> Option<(usize, &'a TxOut)> {
    tx.output
        .iter()
        .enumerate()
        .find(|(_, x)| &x.script_pubkey == script_pubkey)
}

/// Filters the outputs that have a value lower than the given `dust_limit`.
pub(crate) fn discard_dust(txs: Vec<TxOut>, dust_limit: u64) -> Vec<TxOut> {
    txs.into_iter().filter(|x| x.value >= dust_limit).collect()
}

pub(crate) fn weight_to_fee(weight: usize, fee_rate: u64) -> Result<u64, Error> {
    (f64::ceil((weight as f64) / 4.0) as u64)
        .checked_mul(fee_rate)
        .ok_or(Error::InvalidArgument)
}

pub(crate) fn compute_var_int_prefix_size(len: usize) -> usize {
    bitcoin::VarInt(len as u64).len()
}

/// Validate that the fee rate is not too high
pub fn validate_fee_rate(fee_rate_per_vb: u64) -> Result<(), Error> {
    if fee_rate_per_vb > 25 * 250 {
        return Err(Error::InvalidArgument);
    }

    Ok(())
}

fn compare_inputs(a: &TxIn, b: &TxIn) -> std::cmp::Ordering {
    // Txids are compared in their displayed (byte reversed) form.
    let a_txid = a.previous_output.txid.into_inner();
    let b_txid = b.previous_output.txid.into_inner();
    a_txid
        .iter()
        .rev()
        .cmp(b_txid.iter().rev())
        .then(a.previous_output.vout.cmp(&b.previous_output.vout))
}

fn compare_outputs(a: &TxOut, b: &TxOut) -> std::cmp::Ordering {
    a.value
        .cmp(&b.value)
        .then_with(|| a.script_pubkey.as_bytes().cmp(b.script_pubkey.as_bytes()))
}

/// Sorts the inputs and outputs of the transaction following BIP69, so that
/// both parties building the same transaction obtain the same serialization.
pub fn sort_transaction(tx: &mut Transaction) {
    tx.input.sort_by(compare_inputs);
    tx.output.sort_by(compare_outputs);
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::{OutPoint, PackedLockTime, Txid};

    fn input(txid_byte: u8, vout: u32) -> TxIn {
        TxIn {
            previous_output: OutPoint {
                txid: Txid::from_inner([txid_byte; 32]),
                vout,
            },
            ..Default::default()
        }
    }

    fn output(value: u64, script: &[u8]) -> TxOut {
        TxOut {
            value,
            script_pubkey: Script::from(script.to_vec()),
        }
    }

    #[test]
    fn sort_transaction_is_independent_of_insertion_order() {
        let mut tx_a = Transaction {
            version: 2,
            lock_time: PackedLockTime::ZERO,
            input: vec![input(2, 0), input(1, 1), input(1, 0)],
            output: vec![output(500, &[2]), output(100, &[3]), output(500, &[1])],
        };
        let mut tx_b = Transaction {
            version: 2,
            lock_time: PackedLockTime::ZERO,
            input: vec![input(1, 0), input(2, 0), input(1, 1)],
            output: vec![output(500, &[1]), output(500, &[2]), output(100, &[3])],
        };

        sort_transaction(&mut tx_a);
        sort_transaction(&mut tx_b);

        assert_eq!(tx_a, tx_b);
        assert_eq!(tx_a.input[0].previous_output.vout, 0);
        assert_eq!(tx_a.input[1].previous_output.vout, 1);
        assert_eq!(tx_a.output[0].value, 100);
        assert_eq!(tx_a.output[1].script_pubkey, Script::from(vec![1]));
    }

    #[test]
    fn discard_dust_removes_small_outputs() {
        let outputs = vec![output(999, &[1]), output(1000, &[2])];

        let kept = discard_dust(outputs, crate::DUST_LIMIT);

        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].value, 1000);
    }

    #[test]
    fn validate_fee_rate_rejects_excessive_rate() {
        assert!(validate_fee_rate(2).is_ok());
        assert!(validate_fee_rate(25 * 250 + 1).is_err());
    }
}
