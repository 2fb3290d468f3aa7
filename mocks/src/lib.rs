pub mod memory_storage_provider;
pub mod mock_chain_notifier;
pub mod mock_key_store;
pub mod mock_time;

pub use lnchannel_manager;
