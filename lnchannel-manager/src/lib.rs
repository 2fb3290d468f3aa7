//! # Library providing data structures and functions supporting the execution
//! and management of revocable bidirectional payment channels.

#![crate_name = "lnchannel_manager"]
// Coding conventions
#![forbid(unsafe_code)]
#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(missing_docs)]

extern crate bitcoin;
extern crate core;
extern crate lightning;
extern crate lnchannel;
extern crate log;
extern crate secp256k1_zkp;
#[cfg(feature = "use-serde")]
extern crate serde;
extern crate tokio_util;

#[macro_use]
pub mod ser_macros;
pub mod ser_impls;

pub mod channel;
pub mod channel_updater;
pub mod config;
pub mod error;
pub mod manager;
pub mod messages;
pub mod revocation;

use bitcoin::{OutPoint, Txid};
use channel::ChannelState;
use error::Error;
use secp256k1_zkp::{PublicKey, SecretKey};

/// Type alias for a channel id.
pub type ChannelId = [u8; 32];

/// Identifier of a node on the network, its compressed public key.
pub type NodeId = PublicKey;

/// Time trait to provide current unix time. Mainly defined to facilitate testing.
pub trait Time {
    /// Must return the unix epoch corresponding to the current time.
    fn unix_time_now(&self) -> u64;
}

/// Provide current time through `SystemTime`.
pub struct SystemTimeProvider {}

impl Time for SystemTimeProvider {
    fn unix_time_now(&self) -> u64 {
        let now = std::time::SystemTime::now();
        now.duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default()
    }
}

/// Provides custody of the keys used to fund channels.
pub trait KeyStore {
    /// Get the secret key associated with the provided public key.
    fn get_secret_key_for_pubkey(&self, pubkey: &PublicKey) -> Result<SecretKey, Error>;
    /// Generate a new secret key and store it so that it can later be retrieved.
    fn get_new_secret_key(&self) -> Result<SecretKey, Error>;
}

/// Provides notifications about events happening on the blockchain. Events
/// are delivered back through [`crate::manager::LightningChannel::handle_chain_event`].
pub trait ChainNotifier {
    /// Request to be notified when the given outpoint is spent.
    fn register_spend(&self, outpoint: &OutPoint) -> Result<(), Error>;
    /// Request to be notified once the given transaction reaches `num_confs`
    /// confirmations.
    fn register_confirmations(&self, txid: &Txid, num_confs: u32) -> Result<(), Error>;
}

/// Storage trait provides functionalities to store and retrieve channels.
pub trait Storage {
    /// Create or update the record for the given channel.
    fn upsert_channel(&self, channel: &ChannelState) -> Result<(), Error>;
    /// Returns the channel with given [`ChannelId`] if any.
    fn get_channel(&self, channel_id: &ChannelId) -> Result<Option<ChannelState>, Error>;
    /// Returns all the channels in the store.
    fn get_channels(&self) -> Result<Vec<ChannelState>, Error>;
    /// Delete the channel with given [`ChannelId`] if any.
    fn delete_channel(&self, channel_id: &ChannelId) -> Result<(), Error>;
}
