//! Generation and verification of the secrets used to revoke superseded
//! commitment transactions.
//!
//! Secrets are derived from a seed following the shachain construction used by
//! lightning (BOLT 3), so that the counterparty can store every secret it
//! received in logarithmic space.

use std::collections::BTreeSet;

use bitcoin::hashes::{sha256, Hash};
use lightning::ln::chan_utils::{build_commitment_secret, CounterpartyCommitmentSecrets};
use lightning::ln::msgs::DecodeError;
use lightning::util::ser::{Readable, Writeable, Writer};

use crate::error::Error;
use crate::ser_impls::{read_hash_set, write_hash_set};

/// Index used for the secret of the first commitment, following indexes are
/// decreasing.
pub const INITIAL_COMMITMENT_NUMBER: u64 = (1 << 48) - 1;

/// Returns the hash committing to the given revocation secret.
pub fn revocation_hash(secret: &[u8; 32]) -> [u8; 32] {
    sha256::Hash::hash(secret).into_inner()
}

/// Returns the hashes protecting the first two commitments derived from the
/// given seed, to be handed to the counterparty when opening a channel.
pub fn initial_revocation_hashes(seed: &[u8; 32]) -> ([u8; 32], [u8; 32]) {
    let first = build_commitment_secret(seed, INITIAL_COMMITMENT_NUMBER);
    let second = build_commitment_secret(seed, INITIAL_COMMITMENT_NUMBER - 1);
    (revocation_hash(&first), revocation_hash(&second))
}

/// A source of revocation secrets.
pub trait RevocationChain {
    /// Returns the secret for the next commitment and advances the chain.
    fn next_secret(&mut self) -> Result<[u8; 32], Error>;

    /// Returns whether `secret` is the preimage of `hash`.
    fn verify(&self, secret: &[u8; 32], hash: &[u8; 32]) -> bool {
        revocation_hash(secret) == *hash
    }
}

/// Produces the local revocation secrets from a seed that never leaves the
/// local party.
#[derive(Clone)]
pub struct ShaChainProducer {
    seed: [u8; 32],
    /// Number of secrets handed out so far.
    produced: u64,
}

impl ShaChainProducer {
    /// Creates a new producer for the given seed.
    pub fn new(seed: [u8; 32]) -> Self {
        ShaChainProducer { seed, produced: 0 }
    }

    /// Returns the secret associated with the given commitment number, which
    /// must already have been handed out by [`RevocationChain::next_secret`].
    pub fn secret_for_commitment(&self, commitment_number: u64) -> Result<[u8; 32], Error> {
        if commitment_number >= self.produced {
            return Err(Error::InvalidState(format!(
                "Secret for commitment {} was not produced yet",
                commitment_number
            )));
        }

        Ok(build_commitment_secret(
            &self.seed,
            INITIAL_COMMITMENT_NUMBER - commitment_number,
        ))
    }

    /// Returns the number of secrets handed out so far.
    pub fn produced(&self) -> u64 {
        self.produced
    }
}

impl RevocationChain for ShaChainProducer {
    fn next_secret(&mut self) -> Result<[u8; 32], Error> {
        if self.produced > INITIAL_COMMITMENT_NUMBER {
            return Err(Error::InvalidState(
                "Revocation chain exhausted".to_string(),
            ));
        }

        let secret = build_commitment_secret(&self.seed, INITIAL_COMMITMENT_NUMBER - self.produced);
        self.produced += 1;
        Ok(secret)
    }
}

impl_writeable!(ShaChainProducer, { (seed, writeable), (produced, writeable) });

/// Keeps track of the revocation hashes announced by the counterparty and of
/// the secrets it disclosed. Every announced hash is kept so that a repeated
/// hash is detected in logarithmic time.
#[derive(Clone)]
pub struct RemoteRevocationStore {
    secrets: CounterpartyCommitmentSecrets,
    hashes: BTreeSet<[u8; 32]>,
    revoked: u64,
}

impl RemoteRevocationStore {
    /// Creates a new store from the hashes protecting the first two commitments
    /// of the counterparty.
    pub fn new(current_hash: [u8; 32], next_hash: [u8; 32]) -> Result<Self, Error> {
        if current_hash == next_hash {
            return Err(Error::InvalidParameters(
                "Revocation hashes must be distinct".to_string(),
            ));
        }

        Ok(RemoteRevocationStore {
            secrets: CounterpartyCommitmentSecrets::new(),
            hashes: vec![current_hash, next_hash].into_iter().collect(),
            revoked: 0,
        })
    }

    /// Records a new hash announced by the counterparty, rejecting any hash
    /// that was already used.
    pub fn add_hash(&mut self, hash: [u8; 32]) -> Result<(), Error> {
        if !self.hashes.insert(hash) {
            return Err(Error::RevocationMismatch(
                "Revocation hash was already used".to_string(),
            ));
        }
        Ok(())
    }

    /// Stores the secret revoking the oldest unrevoked commitment of the
    /// counterparty. Fails if the secret is not consistent with the ones
    /// previously received.
    pub fn provide_secret(&mut self, secret: [u8; 32]) -> Result<(), Error> {
        self.secrets
            .provide_secret(INITIAL_COMMITMENT_NUMBER - self.revoked, secret)
            .map_err(|_| {
                Error::RevocationMismatch(
                    "Secret is inconsistent with previously received secrets".to_string(),
                )
            })?;
        self.revoked += 1;
        Ok(())
    }

    /// Returns the secret revoking the given commitment of the counterparty if
    /// it was received.
    pub fn get_secret(&self, commitment_number: u64) -> Option<[u8; 32]> {
        if commitment_number >= self.revoked {
            return None;
        }
        self.secrets
            .get_secret(INITIAL_COMMITMENT_NUMBER - commitment_number)
    }

    /// Returns the number of commitments revoked by the counterparty.
    pub fn revoked_count(&self) -> u64 {
        self.revoked
    }
}

impl_writeable!(RemoteRevocationStore, {
    (secrets, writeable),
    (hashes, {cb_writeable, write_hash_set, read_hash_set}),
    (revoked, writeable)
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produced_secrets_are_distinct_and_verifiable() {
        let mut chain = ShaChainProducer::new([1u8; 32]);
        let mut hashes = Vec::new();

        for i in 0..20 {
            let secret = chain.next_secret().unwrap();
            let hash = revocation_hash(&secret);
            assert!(chain.verify(&secret, &hash));
            assert_eq!(chain.secret_for_commitment(i).unwrap(), secret);
            assert!(!hashes.contains(&hash));
            hashes.push(hash);
        }

        assert!(chain.secret_for_commitment(20).is_err());
    }

    #[test]
    fn remote_store_accepts_consistent_secrets() {
        let mut chain = ShaChainProducer::new([2u8; 32]);
        let first = chain.next_secret().unwrap();
        let second = chain.next_secret().unwrap();
        let mut store =
            RemoteRevocationStore::new(revocation_hash(&first), revocation_hash(&second)).unwrap();

        for _ in 0..10 {
            let next = chain.next_secret().unwrap();
            let revoked = store.revoked_count();
            let secret = chain.secret_for_commitment(revoked).unwrap();
            store.provide_secret(secret).unwrap();
            store.add_hash(revocation_hash(&next)).unwrap();
        }

        assert_eq!(store.revoked_count(), 10);
        assert_eq!(store.get_secret(0), Some(first));
        assert_eq!(store.get_secret(1), Some(second));
        assert_eq!(store.get_secret(10), None);
    }

    #[test]
    fn remote_store_rejects_inconsistent_secret() {
        let mut chain = ShaChainProducer::new([3u8; 32]);
        let first = chain.next_secret().unwrap();
        let second = chain.next_secret().unwrap();
        let mut store =
            RemoteRevocationStore::new(revocation_hash(&first), revocation_hash(&second)).unwrap();

        store.provide_secret(first).unwrap();
        // Secret that does not derive from the same seed.
        assert!(store.provide_secret([9u8; 32]).is_err());
        assert_eq!(store.revoked_count(), 1);
    }

    #[test]
    fn remote_store_with_many_updates_is_read_back() {
        let mut chain = ShaChainProducer::new([4u8; 32]);
        let first = chain.next_secret().unwrap();
        let second = chain.next_secret().unwrap();
        let mut store =
            RemoteRevocationStore::new(revocation_hash(&first), revocation_hash(&second)).unwrap();

        for _ in 0..2_000 {
            let next = chain.next_secret().unwrap();
            let secret = chain.secret_for_commitment(store.revoked_count()).unwrap();
            store.provide_secret(secret).unwrap();
            store.add_hash(revocation_hash(&next)).unwrap();
        }

        let buf = store.encode();
        let mut read =
            RemoteRevocationStore::read(&mut lightning::io::Cursor::new(&buf)).unwrap();
        assert_eq!(read.revoked_count(), 2_000);
        assert_eq!(read.get_secret(1_999), store.get_secret(1_999));
        assert!(read.add_hash(revocation_hash(&first)).is_err());
        let unseen = chain.clone().next_secret().unwrap();
        assert!(read.add_hash(revocation_hash(&unseen)).is_ok());
    }

    #[test]
    fn remote_store_rejects_repeated_hash() {
        let mut store = RemoteRevocationStore::new([1u8; 32], [2u8; 32]).unwrap();
        assert!(store.add_hash([1u8; 32]).is_err());
        assert!(store.add_hash([3u8; 32]).is_ok());
        assert!(RemoteRevocationStore::new([4u8; 32], [4u8; 32]).is_err());
    }
}
