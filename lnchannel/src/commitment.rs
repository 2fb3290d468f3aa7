//! Module for creating, signing and spending commitment transactions.

use bitcoin::hashes::{sha256, Hash};
use bitcoin::{
    EcdsaSig, EcdsaSighashType, OutPoint, PackedLockTime, PublicKey, Script, Sequence,
    Transaction, TxIn, TxOut, Witness,
};
use miniscript::{Preimage32, Satisfier};
use secp256k1_zkp::{
    ecdsa::Signature, PublicKey as SecpPublicKey, Secp256k1, SecretKey, Signing, Verification,
};

use crate::util::{self, get_raw_sig_for_tx_input};
use crate::{CommitmentScheme, Error};

/**
 * In the worst case the witness input is (+1 is added to each witness for size
 * parameter):
 *
 * Witness item count -> 1
 * Counterparty signature -> 73
 * Revocation secret -> 32
 * Empty input to fail the first `OP_CHECKSIG` -> 0
 * Script -> 116
 * TOTAL: 226
 *
 * Non witness input data (outpoint, scriptSig length, nSequence) -> 41 * 4
 * Transaction overhead -> 10.5 * 4
 */
const PUNISH_INPUT_WEIGHT: usize = 432;

/**
 * Witness of the refund branch of the absolute timeout funding script:
 *
 * Witness item count -> 1
 * Refund signature -> 73
 * Empty inputs to fail the `OP_CHECKMULTISIG` -> 3
 * Script -> 118
 * TOTAL: 199
 */
const REFUND_INPUT_WEIGHT: usize = 405;

const N_VALUE_WEIGHT: usize = 8 * 4;

/// Builds a commitment transaction for the relative timeout scheme.
///
/// The transaction spends `funding_outpoint` and has exactly two outputs: one
/// paying `owner_amount` to the owner that can be revoked using the preimage of
/// `revocation_hash`, and one paying `counterparty_amount` directly to the
/// counterparty. Inputs and outputs are sorted canonically.
pub fn build_commitment(
    funding_outpoint: &OutPoint,
    owner_pk: &PublicKey,
    counterparty_pk: &PublicKey,
    revocation_hash: &sha256::Hash,
    relative_timeout: u32,
    owner_amount: u64,
    counterparty_amount: u64,
) -> Result<Transaction, Error> {
    create_commitment_transaction(
        &CommitmentScheme::RevocableTimeout {
            csv_delay: relative_timeout,
        },
        funding_outpoint,
        owner_pk,
        counterparty_pk,
        revocation_hash,
        owner_amount,
        counterparty_amount,
    )
}

/// Builds a commitment transaction locking the owner output according to the
/// given scheme.
pub fn create_commitment_transaction(
    scheme: &CommitmentScheme,
    funding_outpoint: &OutPoint,
    owner_pk: &PublicKey,
    counterparty_pk: &PublicKey,
    revocation_hash: &sha256::Hash,
    owner_amount: u64,
    counterparty_amount: u64,
) -> Result<Transaction, Error> {
    let owner_descriptor =
        scheme.owner_output_descriptor(owner_pk, counterparty_pk, revocation_hash)?;
    let counterparty_descriptor = crate::script::pay_to_key_descriptor(counterparty_pk)?;

    let mut tx = Transaction {
        version: crate::TX_VERSION,
        lock_time: PackedLockTime::ZERO,
        input: vec![TxIn {
            previous_output: *funding_outpoint,
            script_sig: Script::default(),
            sequence: util::DISABLE_LOCKTIME,
            witness: Witness::default(),
        }],
        output: vec![
            TxOut {
                value: owner_amount,
                script_pubkey: owner_descriptor.script_pubkey(),
            },
            TxOut {
                value: counterparty_amount,
                script_pubkey: counterparty_descriptor.script_pubkey(),
            },
        ],
    };

    util::sort_transaction(&mut tx);

    Ok(tx)
}

/// Signs the funding input of a commitment transaction.
pub fn sign_commitment<C: Signing>(
    secp: &Secp256k1<C>,
    commit_tx: &Transaction,
    funding_script_pubkey: &Script,
    fund_output_value: u64,
    sk: &SecretKey,
) -> Result<Signature, Error> {
    get_raw_sig_for_tx_input(secp, commit_tx, 0, funding_script_pubkey, fund_output_value, sk)
}

/// Verifies a counterparty signature for the funding input of a commitment
/// transaction.
pub fn verify_commitment_signature<C: Verification>(
    secp: &Secp256k1<C>,
    commit_tx: &Transaction,
    funding_script_pubkey: &Script,
    fund_output_value: u64,
    signature: &Signature,
    pk: &SecpPublicKey,
) -> Result<(), Error> {
    crate::verify_tx_input_sig(
        secp,
        signature,
        commit_tx,
        0,
        funding_script_pubkey,
        fund_output_value,
        pk,
    )
}

/// Adds the witness spending the funding output to the given transaction, using
/// the provided secret key to generate the local signature. Used both for
/// broadcasting the local commitment and for cooperative close transactions.
pub fn satisfy_funding_input<C: Signing>(
    secp: &Secp256k1<C>,
    tx: &mut Transaction,
    funding_script_pubkey: &Script,
    fund_output_value: u64,
    own_sk: &SecretKey,
    counter_signature: &Signature,
    counter_pk: &SecpPublicKey,
) -> Result<(), Error> {
    util::sign_multi_sig_input(
        secp,
        tx,
        counter_signature,
        counter_pk,
        own_sk,
        funding_script_pubkey,
        fund_output_value,
        0,
    )
}

/// Returns a copy of the local commitment transaction with a witness making it
/// valid for broadcast.
pub fn satisfy_commitment_input<C: Signing>(
    secp: &Secp256k1<C>,
    commit_tx: &Transaction,
    funding_script_pubkey: &Script,
    fund_output_value: u64,
    own_sk: &SecretKey,
    counter_signature: &Signature,
    counter_pk: &SecpPublicKey,
) -> Result<Transaction, Error> {
    let mut tx = commit_tx.clone();
    satisfy_funding_input(
        secp,
        &mut tx,
        funding_script_pubkey,
        fund_output_value,
        own_sk,
        counter_signature,
        counter_pk,
    )?;
    Ok(tx)
}

struct RevocationSatisfier {
    pk: PublicKey,
    sig: EcdsaSig,
    revocation_hash: sha256::Hash,
    revocation_secret: Preimage32,
}

impl Satisfier<PublicKey> for RevocationSatisfier {
    fn lookup_ecdsa_sig(&self, pk: &PublicKey) -> Option<EcdsaSig> {
        if *pk == self.pk {
            Some(self.sig)
        } else {
            None
        }
    }

    fn lookup_sha256(&self, hash: &sha256::Hash) -> Option<Preimage32> {
        if *hash == self.revocation_hash {
            Some(self.revocation_secret)
        } else {
            None
        }
    }
}

/// Returns a signed transaction sweeping the owner output of a revoked
/// commitment transaction broadcast by the counterparty, using the revocation
/// secret they disclosed.
pub fn create_and_sign_punish_transaction<C: Signing>(
    secp: &Secp256k1<C>,
    scheme: &CommitmentScheme,
    revoked_commit_tx: &Transaction,
    owner_pk: &PublicKey,
    own_sk: &SecretKey,
    revocation_secret: &[u8; 32],
    dest_script_pubkey: &Script,
    fee_rate_per_vb: u64,
) -> Result<Transaction, Error> {
    let own_pk = PublicKey::new(SecpPublicKey::from_secret_key(secp, own_sk));
    let revocation_hash = sha256::Hash::hash(revocation_secret);
    let descriptor = scheme.owner_output_descriptor(owner_pk, &own_pk, &revocation_hash)?;

    let (vout, prev_out) =
        util::get_output_for_script_pubkey(revoked_commit_tx, &descriptor.script_pubkey())
            .ok_or(Error::InvalidArgument)?;
    let input_value = prev_out.value;

    let dest_script_pk_len = dest_script_pubkey.len();
    let var_int_prefix_len = util::compute_var_int_prefix_size(dest_script_pk_len);
    let output_weight = N_VALUE_WEIGHT + var_int_prefix_len + dest_script_pk_len * 4;
    let tx_fee = util::weight_to_fee(PUNISH_INPUT_WEIGHT + output_weight, fee_rate_per_vb)?;

    let output_value = input_value
        .checked_sub(tx_fee)
        .ok_or(Error::InvalidArgument)?;

    let mut tx = Transaction {
        version: crate::TX_VERSION,
        lock_time: PackedLockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint {
                txid: revoked_commit_tx.txid(),
                vout: vout as u32,
            },
            sequence: Sequence::ZERO,
            script_sig: Script::default(),
            witness: Witness::default(),
        }],
        output: vec![TxOut {
            value: output_value,
            script_pubkey: dest_script_pubkey.clone(),
        }],
    };

    let sig = get_raw_sig_for_tx_input(
        secp,
        &tx,
        0,
        &descriptor.script_code()?,
        input_value,
        own_sk,
    )?;

    let satisfier = RevocationSatisfier {
        pk: own_pk,
        sig: EcdsaSig::sighash_all(sig),
        revocation_hash,
        revocation_secret: *revocation_secret,
    };

    descriptor.satisfy(&mut tx.input[0], satisfier)?;

    Ok(tx)
}

/// Create a transaction for cooperatively closing a channel. Outputs under
/// the dust limit are discarded.
pub fn create_cooperative_close_transaction(
    fund_outpoint: &OutPoint,
    local_script_pubkey: &Script,
    local_payout: u64,
    remote_script_pubkey: &Script,
    remote_payout: u64,
) -> Transaction {
    let input = TxIn {
        previous_output: *fund_outpoint,
        witness: Witness::default(),
        script_sig: Script::default(),
        sequence: util::DISABLE_LOCKTIME,
    };

    let output = util::discard_dust(
        vec![
            TxOut {
                value: local_payout,
                script_pubkey: local_script_pubkey.clone(),
            },
            TxOut {
                value: remote_payout,
                script_pubkey: remote_script_pubkey.clone(),
            },
        ],
        crate::DUST_LIMIT,
    );

    let mut tx = Transaction {
        version: crate::TX_VERSION,
        lock_time: PackedLockTime::ZERO,
        input: vec![input],
        output,
    };

    util::sort_transaction(&mut tx);

    tx
}

/// Returns a signed transaction returning the whole funding output to the
/// holder of `refund_sk` through the timeout branch of an absolute timeout
/// funding script. The transaction is only valid once `refund_height` is
/// reached.
pub fn create_and_sign_refund_transaction<C: Signing>(
    secp: &Secp256k1<C>,
    fund_outpoint: &OutPoint,
    funding_script_pubkey: &Script,
    fund_output_value: u64,
    refund_height: u32,
    refund_sk: &SecretKey,
    dest_script_pubkey: &Script,
    fee_rate_per_vb: u64,
) -> Result<Transaction, Error> {
    let dest_script_pk_len = dest_script_pubkey.len();
    let var_int_prefix_len = util::compute_var_int_prefix_size(dest_script_pk_len);
    let output_weight = N_VALUE_WEIGHT + var_int_prefix_len + dest_script_pk_len * 4;
    let tx_fee = util::weight_to_fee(REFUND_INPUT_WEIGHT + output_weight, fee_rate_per_vb)?;

    let output_value = fund_output_value
        .checked_sub(tx_fee)
        .ok_or(Error::InvalidArgument)?;

    let mut tx = Transaction {
        version: crate::TX_VERSION,
        lock_time: PackedLockTime(refund_height),
        input: vec![TxIn {
            previous_output: *fund_outpoint,
            sequence: util::ENABLE_LOCKTIME,
            script_sig: Script::default(),
            witness: Witness::default(),
        }],
        output: vec![TxOut {
            value: output_value,
            script_pubkey: dest_script_pubkey.clone(),
        }],
    };

    let sig = get_raw_sig_for_tx_input(
        secp,
        &tx,
        0,
        funding_script_pubkey,
        fund_output_value,
        refund_sk,
    )?;

    // The multisig branch is dissatisfied with a dummy element and two empty
    // signatures.
    tx.input[0].witness = Witness::from_vec(vec![
        util::finalize_sig(&sig, EcdsaSighashType::All),
        Vec::new(),
        Vec::new(),
        Vec::new(),
        funding_script_pubkey.to_bytes(),
    ]);

    Ok(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::consensus::encode::serialize;
    use bitcoin::{Address, Network, Txid};
    use secp256k1_zkp::{rand::thread_rng, SECP256K1};

    const FEE_RATE_PER_VB: u64 = 2;

    struct CommitKeys {
        sk: SecretKey,
        secp_pk: SecpPublicKey,
        pk: PublicKey,
    }

    impl CommitKeys {
        fn new() -> Self {
            let sk = SecretKey::new(&mut thread_rng());
            let secp_pk = SecpPublicKey::from_secret_key(SECP256K1, &sk);
            Self {
                sk,
                secp_pk,
                pk: PublicKey::new(secp_pk),
            }
        }
    }

    fn funding_outpoint() -> OutPoint {
        OutPoint {
            txid: Txid::from_inner([7u8; 32]),
            vout: 1,
        }
    }

    #[test]
    fn build_commitment_is_deterministic_test() {
        let owner = CommitKeys::new();
        let counter = CommitKeys::new();
        let hash = sha256::Hash::hash(&[3u8; 32]);

        let build = || {
            build_commitment(
                &funding_outpoint(),
                &owner.pk,
                &counter.pk,
                &hash,
                144,
                600_000,
                400_000,
            )
            .expect("a valid commitment")
        };

        let first = build();
        let second = build();

        assert_eq!(serialize(&first), serialize(&second));
        assert_eq!(first.input.len(), 1);
        assert_eq!(first.output.len(), 2);
        assert_eq!(first.version, 2);
        assert_eq!(first.lock_time, PackedLockTime::ZERO);
        assert_eq!(first.input[0].previous_output, funding_outpoint());
        assert_eq!(first.output[0].value, 400_000);
        assert_eq!(first.output[1].value, 600_000);
    }

    #[test]
    fn commitment_keeps_zero_valued_output_test() {
        let owner = CommitKeys::new();
        let counter = CommitKeys::new();
        let hash = sha256::Hash::hash(&[3u8; 32]);

        let tx = build_commitment(
            &funding_outpoint(),
            &owner.pk,
            &counter.pk,
            &hash,
            144,
            1_000_000,
            0,
        )
        .unwrap();

        assert_eq!(tx.output.len(), 2);
        assert_eq!(tx.output[0].value, 0);
    }

    #[test]
    fn commitment_signature_verifies_only_with_signing_key_test() {
        let owner = CommitKeys::new();
        let counter = CommitKeys::new();
        let hash = sha256::Hash::hash(&[3u8; 32]);
        let funding_script = crate::make_funding_redeemscript(&owner.secp_pk, &counter.secp_pk);

        let tx = build_commitment(
            &funding_outpoint(),
            &owner.pk,
            &counter.pk,
            &hash,
            144,
            600_000,
            400_000,
        )
        .unwrap();

        let sig = sign_commitment(SECP256K1, &tx, &funding_script, 1_000_000, &counter.sk).unwrap();

        verify_commitment_signature(
            SECP256K1,
            &tx,
            &funding_script,
            1_000_000,
            &sig,
            &counter.secp_pk,
        )
        .expect("a valid signature");
        assert!(verify_commitment_signature(
            SECP256K1,
            &tx,
            &funding_script,
            1_000_000,
            &sig,
            &owner.secp_pk,
        )
        .is_err());
        assert!(verify_commitment_signature(
            SECP256K1,
            &tx,
            &funding_script,
            999_999,
            &sig,
            &counter.secp_pk,
        )
        .is_err());
    }

    #[test]
    fn satisfy_commitment_input_adds_multisig_witness_test() {
        let owner = CommitKeys::new();
        let counter = CommitKeys::new();
        let hash = sha256::Hash::hash(&[3u8; 32]);
        let funding_script = crate::make_funding_redeemscript(&owner.secp_pk, &counter.secp_pk);

        let tx = build_commitment(
            &funding_outpoint(),
            &owner.pk,
            &counter.pk,
            &hash,
            144,
            600_000,
            400_000,
        )
        .unwrap();
        let counter_sig =
            sign_commitment(SECP256K1, &tx, &funding_script, 1_000_000, &counter.sk).unwrap();

        let signed = satisfy_commitment_input(
            SECP256K1,
            &tx,
            &funding_script,
            1_000_000,
            &owner.sk,
            &counter_sig,
            &counter.secp_pk,
        )
        .unwrap();

        assert_eq!(signed.txid(), tx.txid());
        assert_eq!(signed.input[0].witness.len(), 4);
        assert_eq!(
            signed.input[0].witness.last(),
            Some(funding_script.as_bytes())
        );
    }

    #[test]
    fn create_and_sign_punish_transaction_test() {
        let owner = CommitKeys::new();
        let counter = CommitKeys::new();
        let secret = [9u8; 32];
        let hash = sha256::Hash::hash(&secret);
        let scheme = CommitmentScheme::RevocableTimeout { csv_delay: 144 };
        let dest_address = Address::p2wpkh(&counter.pk, Network::Regtest).unwrap();

        let revoked = create_commitment_transaction(
            &scheme,
            &funding_outpoint(),
            &owner.pk,
            &counter.pk,
            &hash,
            600_000,
            400_000,
        )
        .unwrap();

        let punish = create_and_sign_punish_transaction(
            SECP256K1,
            &scheme,
            &revoked,
            &owner.pk,
            &counter.sk,
            &secret,
            &dest_address.script_pubkey(),
            FEE_RATE_PER_VB,
        )
        .expect("to be able to punish");

        assert_eq!(punish.input[0].previous_output.txid, revoked.txid());
        assert_eq!(punish.input[0].previous_output.vout, 1);
        assert!(punish.output[0].value < 600_000);
        assert!(punish.input[0]
            .witness
            .iter()
            .any(|item| item == &secret[..]));

        assert!(create_and_sign_punish_transaction(
            SECP256K1,
            &scheme,
            &revoked,
            &owner.pk,
            &counter.sk,
            &[8u8; 32],
            &dest_address.script_pubkey(),
            FEE_RATE_PER_VB,
        )
        .is_err());
    }

    #[test]
    fn cooperative_close_discards_dust_test() {
        let local = Script::from(vec![0u8; 22]);
        let remote = Script::from(vec![1u8; 22]);

        let tx =
            create_cooperative_close_transaction(&funding_outpoint(), &local, 999_500, &remote, 500);

        assert_eq!(tx.output.len(), 1);
        assert_eq!(tx.output[0].script_pubkey, local);
    }

    #[test]
    fn refund_transaction_is_time_locked_test() {
        let a = CommitKeys::new();
        let b = CommitKeys::new();
        let refund = CommitKeys::new();
        let scheme = CommitmentScheme::AbsoluteTimeout {
            refund_height: 750_000,
            reserve: 10_000,
        };
        let funding_script = scheme
            .funding_redeemscript(&a.secp_pk, &b.secp_pk, &refund.secp_pk)
            .unwrap();
        let dest = Address::p2wpkh(&refund.pk, Network::Regtest)
            .unwrap()
            .script_pubkey();

        let tx = create_and_sign_refund_transaction(
            SECP256K1,
            &funding_outpoint(),
            &funding_script,
            1_000_000,
            750_000,
            &refund.sk,
            &dest,
            FEE_RATE_PER_VB,
        )
        .unwrap();

        assert_eq!(tx.lock_time, PackedLockTime(750_000));
        assert_eq!(tx.input[0].witness.len(), 5);
        assert!(tx.output[0].value < 1_000_000);
    }
}
