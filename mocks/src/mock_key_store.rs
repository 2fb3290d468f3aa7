use lnchannel_manager::error::Error;
use lnchannel_manager::KeyStore;
use secp256k1_zkp::{rand::thread_rng, PublicKey, SecretKey, SECP256K1};
use std::collections::HashMap;
use std::sync::RwLock;

pub struct MemoryKeyStore {
    key_pairs: RwLock<HashMap<PublicKey, SecretKey>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        MemoryKeyStore {
            key_pairs: RwLock::new(HashMap::new()),
        }
    }

    pub fn add_key(&self, sk: SecretKey) -> PublicKey {
        let pk = PublicKey::from_secret_key(SECP256K1, &sk);
        self.key_pairs
            .write()
            .expect("Could not get write lock")
            .insert(pk, sk);
        pk
    }

    pub fn remove_key(&self, pk: &PublicKey) {
        self.key_pairs
            .write()
            .expect("Could not get write lock")
            .remove(pk);
    }
}

impl Default for MemoryKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyStore for MemoryKeyStore {
    fn get_secret_key_for_pubkey(&self, pubkey: &PublicKey) -> Result<SecretKey, Error> {
        self.key_pairs
            .read()
            .expect("Could not get read lock")
            .get(pubkey)
            .cloned()
            .ok_or_else(|| Error::KeyStoreError("Unknown public key".to_string()))
    }

    fn get_new_secret_key(&self) -> Result<SecretKey, Error> {
        let sk = SecretKey::new(&mut thread_rng());
        self.add_key(sk);
        Ok(sk)
    }
}
