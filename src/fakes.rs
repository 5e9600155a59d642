//! Do-nothing bus and tracker for driving caches in isolation.

use crate::msi::{Addr, Bus, CacheId};
use crate::stats::{Access, Tracker};

/// A bus with nobody else on it.
pub struct NoBus;

impl Bus for NoBus {
    fn read_miss(&self, _: CacheId, _: Addr) -> bool {
        false
    }
    fn write_miss(&self, _: CacheId, _: Addr) {}
}

pub struct NoTracker;

impl Tracker for NoTracker {
    fn read_hit(&mut self, _: &Access) {}
    fn read_miss(&mut self, _: &Access, _: bool) {}
    fn write_hit(&mut self, _: &Access) {}
    fn write_miss(&mut self, _: &Access, _: bool) {}
    fn record_write(&mut self, _: CacheId, _: u64) {}
    fn drain_write_buffer(&mut self, _: CacheId, _: usize) {}
    fn snoop_write_buffer(&mut self, _: CacheId, _: Addr) {}
}
