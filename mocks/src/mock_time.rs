use lnchannel_manager::Time;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct MockTime {
    time: AtomicU64,
}

impl MockTime {
    pub fn new(time: u64) -> Self {
        MockTime {
            time: AtomicU64::new(time),
        }
    }

    pub fn set_time(&self, time: u64) {
        self.time.store(time, Ordering::SeqCst);
    }
}

impl Time for MockTime {
    fn unix_time_now(&self) -> u64 {
        self.time.load(Ordering::SeqCst)
    }
}
