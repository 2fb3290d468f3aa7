use bitcoin::{OutPoint, Txid};
use lnchannel_manager::error::Error;
use lnchannel_manager::ChainNotifier;
use std::sync::Mutex;

pub struct MockChainNotifier {
    spends: Mutex<Vec<OutPoint>>,
    confirmations: Mutex<Vec<(Txid, u32)>>,
    fail: Mutex<bool>,
}

impl MockChainNotifier {
    pub fn new() -> Self {
        MockChainNotifier {
            spends: Mutex::new(Vec::new()),
            confirmations: Mutex::new(Vec::new()),
            fail: Mutex::new(false),
        }
    }

    pub fn set_fail(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    pub fn registered_spends(&self) -> Vec<OutPoint> {
        self.spends.lock().unwrap().clone()
    }

    pub fn registered_confirmations(&self) -> Vec<(Txid, u32)> {
        self.confirmations.lock().unwrap().clone()
    }

    fn check_fail(&self) -> Result<(), Error> {
        if *self.fail.lock().unwrap() {
            return Err(Error::BlockchainError("Notifier unavailable".to_string()));
        }
        Ok(())
    }
}

impl Default for MockChainNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainNotifier for MockChainNotifier {
    fn register_spend(&self, outpoint: &OutPoint) -> Result<(), Error> {
        self.check_fail()?;
        self.spends.lock().unwrap().push(*outpoint);
        Ok(())
    }

    fn register_confirmations(&self, txid: &Txid, num_confs: u32) -> Result<(), Error> {
        self.check_fail()?;
        self.confirmations.lock().unwrap().push((*txid, num_confs));
        Ok(())
    }
}
