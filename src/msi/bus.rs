use std::cell::RefCell;
use std::rc::Rc;

use log::trace;

use super::cache::CacheController;
use super::common::*;

/// What a cache needs from the interconnect on a miss.
pub trait Bus {
    /// Broadcasts a read miss to every other cache. Returns whether one of
    /// them can supply the line, saving the trip to main memory.
    fn read_miss(&self, origin: CacheId, addr: Addr) -> bool;
    /// Broadcasts a write miss (or upgrade) to every other cache.
    fn write_miss(&self, origin: CacheId, addr: Addr);
}

pub type CacheRef = Rc<RefCell<CacheController>>;

/// The system bus. Holds no state of its own besides the attached caches,
/// which are signalled in the order they were attached.
#[derive(Default)]
pub struct SharedBus {
    caches: Vec<(CacheId, CacheRef)>,
}

impl SharedBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_cache(&mut self, cache: CacheRef) {
        let id = cache.borrow().id;
        self.caches.push((id, cache));
    }

    pub fn len(&self) -> usize {
        self.caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }

    // the origin is mutably borrowed by the caller while it signals the bus,
    // so it has to be skipped by id, never borrowed
    fn peers(&self, origin: CacheId) -> impl Iterator<Item = &CacheRef> {
        self.caches
            .iter()
            .filter(move |(id, _)| *id != origin)
            .map(|(_, c)| c)
    }
}

impl Bus for SharedBus {
    fn read_miss(&self, origin: CacheId, addr: Addr) -> bool {
        trace!("bus: read miss on {} from cache {}", addr, origin);
        let mut supplied = false;
        for cache in self.peers(origin) {
            // every peer must see the signal, no short-circuiting
            supplied |= cache.borrow_mut().notify_read_miss(addr);
        }
        supplied
    }

    fn write_miss(&self, origin: CacheId, addr: Addr) {
        trace!("bus: write miss on {} from cache {}", addr, origin);
        for cache in self.peers(origin) {
            cache.borrow_mut().notify_write_miss(addr);
        }
    }
}
