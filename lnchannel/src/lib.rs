//! # Rust Lightning Channel Library
//! Library for creating, signing and verifying the funding and commitment
//! transactions of a revocable bidirectional payment channel.
//!

#![crate_name = "lnchannel"]
// Coding conventions
#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(missing_docs)]

extern crate bitcoin;
extern crate core;
extern crate miniscript;
extern crate secp256k1_zkp;
#[cfg(feature = "use-serde")]
extern crate serde;

use bitcoin::blockdata::{
    opcodes,
    script::{Builder, Script},
};
use bitcoin::hashes::sha256;
use bitcoin::Transaction;
use secp256k1_zkp::{ecdsa::Signature, PublicKey, Secp256k1, Verification};
use std::fmt;

pub mod commitment;
pub mod script;
pub mod util;

/// The transaction version
/// Version 2 is required for the relative timelocks used by the commitment
/// outputs to be enforced.
const TX_VERSION: i32 = 2;

/// Maximum size of a witness script that is still relayed by standard nodes.
pub const MAX_STANDARD_P2WSH_SCRIPT_SIZE: usize = 3600;

/// Minimum value that can be included in a transaction output. Under this value,
/// outputs are discarded from cooperative close transactions.
pub const DUST_LIMIT: u64 = 1000;

/// An error code.
#[derive(Debug)]
pub enum Error {
    /// Secp256k1 error
    Secp256k1(secp256k1_zkp::UpstreamError),
    /// An error occurred while assembling or satisfying a script.
    Miniscript(miniscript::Error),
    /// An error occurred while computing a signature hash.
    Sighash(bitcoin::util::sighash::Error),
    /// A public key that cannot be used in a segwit script was provided.
    InvalidKey,
    /// The assembled script exceeds the standard size limit.
    ScriptTooLarge(usize),
    /// An invalid argument was provided
    InvalidArgument,
}

impl From<secp256k1_zkp::UpstreamError> for Error {
    fn from(error: secp256k1_zkp::UpstreamError) -> Error {
        Error::Secp256k1(error)
    }
}

impl From<miniscript::Error> for Error {
    fn from(error: miniscript::Error) -> Error {
        Error::Miniscript(error)
    }
}

impl From<bitcoin::util::sighash::Error> for Error {
    fn from(error: bitcoin::util::sighash::Error) -> Error {
        Error::Sighash(error)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Secp256k1(ref e) => write!(f, "Secp256k1 error {}", e),
            Error::Miniscript(ref e) => write!(f, "Miniscript error {}", e),
            Error::Sighash(ref e) => write!(f, "Sighash error {}", e),
            Error::InvalidKey => write!(f, "Invalid public key"),
            Error::ScriptTooLarge(len) => write!(f, "Script too large: {} bytes", len),
            Error::InvalidArgument => write!(f, "Invalid argument"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Secp256k1(e) => Some(e),
            Error::Miniscript(e) => Some(e),
            Error::Sighash(e) => Some(e),
            Error::InvalidKey => None,
            Error::ScriptTooLarge(_) => None,
            Error::InvalidArgument => None,
        }
    }
}

/// The way the outputs of a channel are locked, selected when the channel is
/// opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(
    feature = "use-serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "camelCase")
)]
pub enum CommitmentScheme {
    /// The funding output is a plain 2-of-2 and the owner output of each
    /// commitment can be claimed by its owner `csv_delay` blocks after the
    /// commitment confirmed.
    RevocableTimeout {
        /// Relative timeout in blocks.
        csv_delay: u32,
    },
    /// For chains without relative timelocks. The funding output can be
    /// refunded to the funder after `refund_height`, and each party keeps
    /// `reserve` satoshis in the channel that are forfeited on a stale
    /// broadcast.
    AbsoluteTimeout {
        /// Absolute block height after which the funder can reclaim the funds.
        refund_height: u32,
        /// The amount each party must keep in the channel.
        reserve: u64,
    },
}

impl CommitmentScheme {
    /// Returns the descriptor of the output paying the owner of a commitment
    /// transaction.
    pub fn owner_output_descriptor(
        &self,
        owner_pk: &bitcoin::PublicKey,
        counterparty_pk: &bitcoin::PublicKey,
        revocation_hash: &sha256::Hash,
    ) -> Result<miniscript::Descriptor<bitcoin::PublicKey>, Error> {
        match self {
            CommitmentScheme::RevocableTimeout { csv_delay } => script::revocable_output_descriptor(
                owner_pk,
                counterparty_pk,
                revocation_hash,
                *csv_delay,
            ),
            CommitmentScheme::AbsoluteTimeout { refund_height, .. } => {
                script::absolute_output_descriptor(
                    owner_pk,
                    counterparty_pk,
                    revocation_hash,
                    *refund_height,
                )
            }
        }
    }

    /// Returns the witness script locking the funding output.
    pub fn funding_redeemscript(
        &self,
        a: &PublicKey,
        b: &PublicKey,
        refund_pk: &PublicKey,
    ) -> Result<Script, Error> {
        match self {
            CommitmentScheme::RevocableTimeout { .. } => Ok(make_funding_redeemscript(a, b)),
            CommitmentScheme::AbsoluteTimeout { refund_height, .. } => {
                let descriptor = script::cltv_funding_descriptor(
                    &bitcoin::PublicKey::new(*a),
                    &bitcoin::PublicKey::new(*b),
                    &bitcoin::PublicKey::new(*refund_pk),
                    *refund_height,
                )?;
                Ok(descriptor.script_code()?)
            }
        }
    }

    /// The amount that each party has to keep in the channel.
    pub fn reserve(&self) -> u64 {
        match self {
            CommitmentScheme::RevocableTimeout { .. } => 0,
            CommitmentScheme::AbsoluteTimeout { reserve, .. } => *reserve,
        }
    }
}

/// Create the multisig redeem script for the funding output
pub fn make_funding_redeemscript(a: &PublicKey, b: &PublicKey) -> Script {
    let (first, second) = util::order_keys(a, b);

    Builder::new()
        .push_opcode(opcodes::all::OP_PUSHNUM_2)
        .push_slice(&first.serialize())
        .push_slice(&second.serialize())
        .push_opcode(opcodes::all::OP_PUSHNUM_2)
        .push_opcode(opcodes::all::OP_CHECKMULTISIG)
        .into_script()
}

/// Verify a signature for a given transaction input.
pub fn verify_tx_input_sig<V: Verification>(
    secp: &Secp256k1<V>,
    signature: &Signature,
    tx: &Transaction,
    input_index: usize,
    script_pubkey: &Script,
    value: u64,
    pk: &PublicKey,
) -> Result<(), Error> {
    let sig_hash_msg = util::get_sig_hash_msg(tx, input_index, script_pubkey, value)?;
    secp.verify_ecdsa(&sig_hash_msg, signature, pk)?;
    Ok(())
}
