use lnchannel_manager::channel::ChannelState;
use lnchannel_manager::error::Error;
use lnchannel_manager::{ChannelId, Storage};
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

pub struct MemoryStorage {
    channels: RwLock<HashMap<ChannelId, ChannelState>>,
    fail_writes: Mutex<bool>,
    write_count: Mutex<usize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        MemoryStorage {
            channels: RwLock::new(HashMap::new()),
            fail_writes: Mutex::new(false),
            write_count: Mutex::new(0),
        }
    }

    pub fn set_fail_writes(&self, fail: bool) {
        *self.fail_writes.lock().unwrap() = fail;
    }

    pub fn write_count(&self) -> usize {
        *self.write_count.lock().unwrap()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemoryStorage {
    fn upsert_channel(&self, channel: &ChannelState) -> Result<(), Error> {
        if *self.fail_writes.lock().unwrap() {
            return Err(Error::StorageError("Write failure".to_string()));
        }
        let mut map = self.channels.write().expect("Could not get write lock");
        map.insert(channel.channel_id, channel.clone());
        *self.write_count.lock().unwrap() += 1;
        Ok(())
    }

    fn get_channel(&self, channel_id: &ChannelId) -> Result<Option<ChannelState>, Error> {
        let map = self.channels.read().expect("Could not get read lock");
        Ok(map.get(channel_id).cloned())
    }

    fn get_channels(&self) -> Result<Vec<ChannelState>, Error> {
        let map = self.channels.read().expect("Could not get read lock");
        Ok(map.values().cloned().collect())
    }

    fn delete_channel(&self, channel_id: &ChannelId) -> Result<(), Error> {
        let mut map = self.channels.write().expect("Could not get write lock");
        map.remove(channel_id);
        Ok(())
    }
}
