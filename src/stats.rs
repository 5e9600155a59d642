//! Access statistics: hit/miss accounting, dynamic and static sharing
//! classification, address-sharing histogram and latency aggregates.

use std::cell::OnceCell;
use std::collections::{BTreeSet, HashMap, HashSet};

use log::warn;

use crate::msi::{Addr, Block, CacheId, CacheLine, CacheRef};

/// One access as reported by a cache, before it updates its own line.
#[derive(Clone, Copy, Debug)]
pub struct Access {
    pub cache: CacheId,
    pub addr: Addr,
    pub block: Block,
    /// The reporting cache's line at `block.slot` as it was before the access.
    pub local: CacheLine,
}

/// What a cache reports to. Misses must be reported before the bus is told,
/// so implementations see every peer in its pre-miss state.
pub trait Tracker {
    fn read_hit(&mut self, access: &Access);
    fn read_miss(&mut self, access: &Access, coherence_miss: bool);
    fn write_hit(&mut self, access: &Access);
    fn write_miss(&mut self, access: &Access, coherence_miss: bool);
    /// A processor issued a write at `latency` (TSO only).
    fn record_write(&mut self, cache: CacheId, latency: u64);
    fn drain_write_buffer(&mut self, cache: CacheId, drained: usize);
    fn snoop_write_buffer(&mut self, cache: CacheId, addr: Addr);
}

/// `numerator / denominator`, NaN when there is nothing to divide by.
pub fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        f64::NAN
    } else {
        numerator as f64 / denominator as f64
    }
}

pub fn mean(values: &[u64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<u64>() as f64 / values.len() as f64
}

pub fn median(values: &[u64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) as f64 / 2.0
    } else {
        sorted[mid] as f64
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AccessClasses {
    pub private: u64,
    pub shared_read_only: u64,
    pub shared_read_write: u64,
}

impl AccessClasses {
    pub fn total(&self) -> u64 {
        self.private + self.shared_read_only + self.shared_read_write
    }
}

impl std::ops::AddAssign for AccessClasses {
    fn add_assign(&mut self, rhs: Self) {
        self.private += rhs.private;
        self.shared_read_only += rhs.shared_read_only;
        self.shared_read_write += rhs.shared_read_write;
    }
}

/// Statistics for a single cache.
pub struct CacheStatistics {
    pub id: CacheId,
    cache: CacheRef,

    pub read_hits: u64,
    pub read_misses: u64,
    pub write_hits: u64,
    pub write_misses: u64,
    /// misses caused by another cache invalidating or downgrading a line
    pub coherence_misses: u64,

    pub accessed_addresses: HashSet<Addr>,
    pub read_lines: HashSet<Block>,
    pub written_lines: HashSet<Block>,
    pub access_counts: HashMap<Block, u64>,

    pub dynamic: AccessClasses,
    // computed on first request, then frozen
    static_classes: OnceCell<AccessClasses>,

    pub write_buffer_drains: u64,
    pub total_writes_drained: u64,
    pub write_buffer_snoops: u64,

    last_write_latency: u64,
    pub latencies_between_writes: Vec<u64>,
}

impl CacheStatistics {
    fn new(id: CacheId, cache: CacheRef) -> Self {
        Self {
            id,
            cache,
            read_hits: 0,
            read_misses: 0,
            write_hits: 0,
            write_misses: 0,
            coherence_misses: 0,
            accessed_addresses: HashSet::new(),
            read_lines: HashSet::new(),
            written_lines: HashSet::new(),
            access_counts: HashMap::new(),
            dynamic: AccessClasses::default(),
            static_classes: OnceCell::new(),
            write_buffer_drains: 0,
            total_writes_drained: 0,
            write_buffer_snoops: 0,
            last_write_latency: 0,
            latencies_between_writes: Vec::new(),
        }
    }

    pub fn reads(&self) -> u64 {
        self.read_hits + self.read_misses
    }
    pub fn writes(&self) -> u64 {
        self.write_hits + self.write_misses
    }
    pub fn hits(&self) -> u64 {
        self.read_hits + self.write_hits
    }
    pub fn misses(&self) -> u64 {
        self.read_misses + self.write_misses
    }
    pub fn accesses(&self) -> u64 {
        self.hits() + self.misses()
    }

    pub fn accessed_lines(&self) -> HashSet<Block> {
        self.read_lines.union(&self.written_lines).copied().collect()
    }

    /// Lines this cache read but never wrote.
    pub fn read_only_lines(&self) -> HashSet<Block> {
        self.read_lines.difference(&self.written_lines).copied().collect()
    }

    fn accesses_to<'a>(&self, lines: impl IntoIterator<Item = &'a Block>) -> u64 {
        lines
            .into_iter()
            .map(|l| self.access_counts.get(l).copied().unwrap_or(0))
            .sum()
    }
}

/// Per-cache figures handed to the reporting layer.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheReport {
    pub id: CacheId,
    pub accesses: u64,
    pub reads: u64,
    pub writes: u64,
    pub misses: u64,
    pub read_misses: u64,
    pub write_misses: u64,
    pub coherence_misses: u64,
    pub dynamic: AccessClasses,
    pub static_: AccessClasses,
    pub latency: u64,
}

impl CacheReport {
    pub fn miss_rate(&self) -> f64 {
        ratio(self.misses, self.accesses)
    }
    pub fn read_miss_rate(&self) -> f64 {
        ratio(self.read_misses, self.reads)
    }
    pub fn write_miss_rate(&self) -> f64 {
        ratio(self.write_misses, self.writes)
    }
    pub fn coherence_miss_rate(&self) -> f64 {
        ratio(self.coherence_misses, self.misses)
    }
}

/// How many distinct caches touched each literal address.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AddressSharing {
    pub addresses: u64,
    pub by_one_processor: u64,
    pub by_two_processors: u64,
    pub by_more_than_two_processors: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LatencyReport {
    pub max_latency: u64,
    /// first cache to reach `max_latency`; the write-buffer figures are its own
    pub bottleneck_cache: Option<CacheId>,
    pub write_buffer_drains: u64,
    pub average_writes_drained: f64,
    pub mean_latency_between_writes: f64,
    pub median_latency_between_writes: f64,
    pub write_buffer_snoops: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GeneralReport {
    pub accesses: u64,
    pub reads: u64,
    pub writes: u64,
    pub misses: u64,
    pub coherence_misses: u64,
    pub dynamic: AccessClasses,
    pub static_: AccessClasses,
    pub sharing: AddressSharing,
    pub latency: LatencyReport,
}

/// Tracks statistics for the whole simulation.
///
/// The tracker keeps a handle on every registered cache so it can look at
/// peer lines when classifying an access. The reporting cache itself is
/// usually borrowed by its caller at that point and is never touched.
#[derive(Default)]
pub struct StatisticsTracker {
    records: Vec<CacheStatistics>,
}

impl StatisticsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_cache(&mut self, cache: CacheRef) {
        let id = cache.borrow().id;
        self.records.push(CacheStatistics::new(id, cache));
    }

    pub fn record(&self, id: CacheId) -> Option<&CacheStatistics> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn records(&self) -> &[CacheStatistics] {
        &self.records
    }

    fn record_mut(&mut self, id: CacheId) -> Option<&mut CacheStatistics> {
        let r = self.records.iter_mut().find(|r| r.id == id);
        if r.is_none() {
            warn!("statistics reported for unregistered cache {}", id);
        }
        r
    }

    fn position(&self, id: CacheId) -> Option<usize> {
        self.records.iter().position(|r| r.id == id)
    }

    // access classification

    /// Classifies an access by looking at the peers' current lines. Must run
    /// before the bus lets them react to it.
    fn classify(&self, access: &Access) -> AccessClasses {
        let Block { tag, slot } = access.block;
        let mut sharers = 0;
        let mut remote_written = false;
        for other in self.records.iter().filter(|r| r.id != access.cache) {
            let cache = other.cache.borrow();
            let Some(line) = cache.line(slot) else { continue };
            if line.holds(tag) {
                sharers += 1;
                remote_written |= line.written_to;
            }
        }

        let mut class = AccessClasses::default();
        if sharers == 0 {
            class.private = 1;
        } else if remote_written || access.local.written_to {
            class.shared_read_write = 1;
        } else {
            class.shared_read_only = 1;
        }
        class
    }

    fn handle_access(&mut self, access: &Access, write: bool) {
        let class = self.classify(access);
        let Some(stats) = self.record_mut(access.cache) else { return };
        if write {
            stats.written_lines.insert(access.block);
        } else {
            stats.read_lines.insert(access.block);
        }
        stats.accessed_addresses.insert(access.addr);
        *stats.access_counts.entry(access.block).or_insert(0) += 1;
        stats.dynamic += class;
    }

    /// Static classes for the cache at `idx`, computed once.
    fn static_classes(&self, idx: usize) -> AccessClasses {
        *self.records[idx]
            .static_classes
            .get_or_init(|| self.compute_static_classes(idx))
    }

    fn compute_static_classes(&self, idx: usize) -> AccessClasses {
        let stats = &self.records[idx];
        let others = self
            .records
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != idx)
            .map(|(_, r)| r);

        let mut other_accessed = HashSet::new();
        let mut other_read_only = HashSet::new();
        for other in others {
            other_accessed.extend(other.accessed_lines());
            other_read_only.extend(other.read_only_lines());
        }

        let accessed = stats.accessed_lines();
        let private = stats.accesses_to(accessed.difference(&other_accessed));
        let shared_read_only =
            stats.accesses_to(stats.read_only_lines().intersection(&other_read_only));
        // every shared read-only line is also in the shared set
        let shared = stats.accesses_to(accessed.intersection(&other_accessed));

        AccessClasses {
            private,
            shared_read_only,
            shared_read_write: shared - shared_read_only,
        }
    }

    // reports

    pub fn cache_report(&self, id: CacheId) -> Option<CacheReport> {
        let idx = self.position(id)?;
        let stats = &self.records[idx];
        Some(CacheReport {
            id,
            accesses: stats.accesses(),
            reads: stats.reads(),
            writes: stats.writes(),
            misses: stats.misses(),
            read_misses: stats.read_misses,
            write_misses: stats.write_misses,
            coherence_misses: stats.coherence_misses,
            dynamic: stats.dynamic,
            static_: self.static_classes(idx),
            latency: stats.cache.borrow().latency(),
        })
    }

    pub fn address_sharing(&self) -> AddressSharing {
        let all: BTreeSet<&Addr> = self
            .records
            .iter()
            .flat_map(|r| r.accessed_addresses.iter())
            .collect();

        let mut sharing = AddressSharing { addresses: all.len() as u64, ..Default::default() };
        for addr in all {
            let n = self
                .records
                .iter()
                .filter(|r| r.accessed_addresses.contains(addr))
                .count();
            match n {
                1 => sharing.by_one_processor += 1,
                2 => sharing.by_two_processors += 1,
                _ => sharing.by_more_than_two_processors += 1,
            }
        }
        sharing
    }

    pub fn latency_report(&self) -> LatencyReport {
        let latencies: Vec<u64> = self.records.iter().map(|r| r.cache.borrow().latency()).collect();
        let max_latency = latencies.iter().copied().max().unwrap_or(0);
        let bottleneck = latencies.iter().position(|&l| l == max_latency);

        match bottleneck.map(|i| &self.records[i]) {
            Some(stats) => LatencyReport {
                max_latency,
                bottleneck_cache: Some(stats.id),
                write_buffer_drains: stats.write_buffer_drains,
                average_writes_drained: ratio(stats.total_writes_drained, stats.write_buffer_drains),
                mean_latency_between_writes: mean(&stats.latencies_between_writes),
                median_latency_between_writes: median(&stats.latencies_between_writes),
                write_buffer_snoops: stats.write_buffer_snoops,
            },
            None => LatencyReport {
                max_latency,
                bottleneck_cache: None,
                write_buffer_drains: 0,
                average_writes_drained: f64::NAN,
                mean_latency_between_writes: f64::NAN,
                median_latency_between_writes: f64::NAN,
                write_buffer_snoops: 0,
            },
        }
    }

    pub fn general_report(&self) -> GeneralReport {
        let mut report = GeneralReport {
            accesses: 0,
            reads: 0,
            writes: 0,
            misses: 0,
            coherence_misses: 0,
            dynamic: AccessClasses::default(),
            static_: AccessClasses::default(),
            sharing: self.address_sharing(),
            latency: self.latency_report(),
        };
        for (idx, stats) in self.records.iter().enumerate() {
            report.accesses += stats.accesses();
            report.reads += stats.reads();
            report.writes += stats.writes();
            report.misses += stats.misses();
            report.coherence_misses += stats.coherence_misses;
            report.dynamic += stats.dynamic;
            report.static_ += self.static_classes(idx);
        }
        report
    }
}

impl Tracker for StatisticsTracker {
    fn read_hit(&mut self, access: &Access) {
        if let Some(stats) = self.record_mut(access.cache) {
            stats.read_hits += 1;
        }
        self.handle_access(access, false);
    }

    fn read_miss(&mut self, access: &Access, coherence_miss: bool) {
        if let Some(stats) = self.record_mut(access.cache) {
            stats.read_misses += 1;
            stats.coherence_misses += coherence_miss as u64;
        }
        self.handle_access(access, false);
    }

    fn write_hit(&mut self, access: &Access) {
        if let Some(stats) = self.record_mut(access.cache) {
            stats.write_hits += 1;
        }
        self.handle_access(access, true);
    }

    fn write_miss(&mut self, access: &Access, coherence_miss: bool) {
        if let Some(stats) = self.record_mut(access.cache) {
            stats.write_misses += 1;
            stats.coherence_misses += coherence_miss as u64;
        }
        self.handle_access(access, true);
    }

    fn record_write(&mut self, cache: CacheId, latency: u64) {
        if let Some(stats) = self.record_mut(cache) {
            stats.latencies_between_writes.push(latency.saturating_sub(stats.last_write_latency));
            stats.last_write_latency = latency;
        }
    }

    fn drain_write_buffer(&mut self, cache: CacheId, drained: usize) {
        if let Some(stats) = self.record_mut(cache) {
            stats.write_buffer_drains += 1;
            stats.total_writes_drained += drained as u64;
        }
    }

    fn snoop_write_buffer(&mut self, cache: CacheId, _addr: Addr) {
        if let Some(stats) = self.record_mut(cache) {
            stats.write_buffer_snoops += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::msi::{CacheController, ConsistencyModel, SharedBus};

    struct Rig {
        bus: SharedBus,
        tracker: StatisticsTracker,
        caches: Vec<CacheRef>,
    }

    impl Rig {
        fn new(n: usize) -> Self {
            let mut rig = Rig { bus: SharedBus::new(), tracker: StatisticsTracker::new(), caches: vec![] };
            for i in 0..n {
                let c = CacheController::new(i, 128, 4, ConsistencyModel::SequentialConsistency).unwrap();
                let c = Rc::new(RefCell::new(c));
                rig.bus.add_cache(c.clone());
                rig.tracker.add_cache(c.clone());
                rig.caches.push(c);
            }
            rig
        }
        fn read(&mut self, id: usize, raw: u64) {
            self.caches[id].borrow_mut().read(Addr::new(raw), &self.bus, &mut self.tracker);
        }
        fn write(&mut self, id: usize, raw: u64) {
            self.caches[id].borrow_mut().write(Addr::new(raw), &self.bus, &mut self.tracker);
        }
    }

    #[test]
    fn test_ratio_nan_on_zero() {
        assert!(ratio(0, 0).is_nan());
        assert_eq!(ratio(1, 4), 0.25);
    }

    #[test]
    fn test_mean_and_median() {
        assert!(mean(&[]).is_nan());
        assert!(median(&[]).is_nan());
        assert_eq!(mean(&[1, 2, 3, 6]), 3.0);
        assert_eq!(median(&[7, 1, 3]), 3.0);
        assert_eq!(median(&[4, 1, 3, 10]), 3.5);
    }

    #[test]
    fn test_hit_miss_counts() {
        let mut rig = Rig::new(2);
        rig.read(0, 5);
        rig.read(0, 5);
        rig.write(0, 5);
        rig.write(0, 5);
        let r = rig.tracker.cache_report(0).unwrap();
        assert_eq!((r.reads, r.read_misses), (2, 1));
        assert_eq!((r.writes, r.write_misses), (2, 1));
        assert_eq!(r.accesses, 4);
        assert_eq!(r.miss_rate(), 0.5);
        assert!(rig.tracker.cache_report(1).unwrap().miss_rate().is_nan());
        assert!(rig.tracker.cache_report(7).is_none());
    }

    #[test]
    fn test_coherence_misses_counted() {
        let mut rig = Rig::new(2);
        rig.read(0, 5);
        rig.write(1, 5); // invalidates cache 0
        rig.read(0, 5); // coherence miss, downgrades cache 1
        rig.write(1, 5); // coherence miss: cache 1 owned the line before
        assert_eq!(rig.tracker.cache_report(0).unwrap().coherence_misses, 1);
        assert_eq!(rig.tracker.cache_report(1).unwrap().coherence_misses, 1);
    }

    #[test]
    fn test_dynamic_classification_sees_pre_miss_state() {
        let mut rig = Rig::new(3);
        rig.read(0, 5); // private
        rig.read(1, 5); // cache 0 holds it clean: shared read-only
        rig.write(2, 5); // both peers still hold it clean: shared read-only
        rig.read(0, 5); // only cache 2 holds it, written: shared read-write
        let r0 = rig.tracker.cache_report(0).unwrap();
        let r1 = rig.tracker.cache_report(1).unwrap();
        let r2 = rig.tracker.cache_report(2).unwrap();
        assert_eq!(r0.dynamic, AccessClasses { private: 1, shared_read_only: 0, shared_read_write: 1 });
        assert_eq!(r1.dynamic, AccessClasses { private: 0, shared_read_only: 1, shared_read_write: 0 });
        assert_eq!(r2.dynamic, AccessClasses { private: 0, shared_read_only: 1, shared_read_write: 0 });
    }

    #[test]
    fn test_local_written_flag_marks_read_write() {
        let mut rig = Rig::new(2);
        rig.write(0, 5);
        rig.read(1, 5); // cache 0 still modified-and-written
        rig.read(0, 5); // local line written, cache 1 shares it
        assert_eq!(rig.tracker.cache_report(1).unwrap().dynamic.shared_read_write, 1);
        assert_eq!(rig.tracker.cache_report(0).unwrap().dynamic.shared_read_write, 1);
        assert_eq!(rig.tracker.cache_report(0).unwrap().dynamic.private, 1);
    }

    #[test]
    fn test_static_classes_partition_accesses() {
        let mut rig = Rig::new(3);
        // private to 0
        rig.read(0, 0);
        rig.write(0, 0);
        // read-only for 0 and 1
        rig.read(0, 100);
        rig.read(0, 100);
        rig.read(1, 100);
        // read by 0, written by 2
        rig.read(0, 200);
        rig.write(2, 200);
        // read by 0 and 2, written by 1
        rig.read(0, 300);
        rig.write(1, 300);
        rig.read(2, 300);

        let r0 = rig.tracker.cache_report(0).unwrap();
        // 300 is read-only for 2 as well, so it counts as shared read-only
        assert_eq!(r0.static_, AccessClasses { private: 2, shared_read_only: 3, shared_read_write: 1 });
        assert_eq!(r0.static_.total(), r0.accesses);

        for id in 1..3 {
            let r = rig.tracker.cache_report(id).unwrap();
            assert_eq!(r.static_.total(), r.accesses);
        }
        let r2 = rig.tracker.cache_report(2).unwrap();
        assert_eq!(r2.static_, AccessClasses { private: 0, shared_read_only: 1, shared_read_write: 1 });
    }

    #[test]
    fn test_static_classes_are_memoized() {
        let mut rig = Rig::new(2);
        rig.read(0, 5);
        let before = rig.tracker.cache_report(0).unwrap().static_;
        assert_eq!(before.private, 1);
        rig.read(1, 5);
        rig.read(0, 5);
        let after = rig.tracker.cache_report(0).unwrap();
        assert_eq!(after.static_, before);
        assert_eq!(after.accesses, 2);
    }

    #[test]
    fn test_address_sharing_histogram() {
        let mut rig = Rig::new(4);
        for (id, addr) in [(0, 0), (1, 1), (2, 2), (3, 3)] {
            rig.read(id, addr);
        }
        for id in 0..4 {
            rig.read(id, 8);
        }
        rig.write(0, 12);
        rig.read(1, 12);

        let s = rig.tracker.address_sharing();
        assert_eq!(s.addresses, 6);
        assert_eq!(s.by_one_processor, 4);
        assert_eq!(s.by_two_processors, 1);
        assert_eq!(s.by_more_than_two_processors, 1);
    }

    #[test]
    fn test_latency_from_first_bottleneck() {
        let mut rig = Rig::new(3);
        rig.write(1, 0);
        rig.write(2, 64);
        let l = rig.tracker.latency_report();
        assert_eq!(l.max_latency, 222);
        assert_eq!(l.bottleneck_cache, Some(1));
        assert!(l.average_writes_drained.is_nan());
        assert!(l.mean_latency_between_writes.is_nan());
    }

    #[test]
    fn test_write_buffer_stats() {
        let mut tracker = StatisticsTracker::new();
        let c = CacheController::new(0, 4, 4, ConsistencyModel::SequentialConsistency).unwrap();
        tracker.add_cache(Rc::new(RefCell::new(c)));
        tracker.record_write(0, 0);
        tracker.record_write(0, 10);
        tracker.record_write(0, 40);
        tracker.drain_write_buffer(0, 3);
        tracker.drain_write_buffer(0, 0);
        tracker.snoop_write_buffer(0, Addr::new(1));

        let s = tracker.record(0).unwrap();
        assert_eq!(s.latencies_between_writes, vec![0, 10, 30]);
        let l = tracker.latency_report();
        assert_eq!(l.write_buffer_drains, 2);
        assert_eq!(l.average_writes_drained, 1.5);
        assert_eq!(l.mean_latency_between_writes, 40.0 / 3.0);
        assert_eq!(l.median_latency_between_writes, 10.0);
        assert_eq!(l.write_buffer_snoops, 1);
        // snoops are not accesses
        assert_eq!(s.accesses(), 0);
    }

    #[test]
    fn test_empty_tracker_reports() {
        let tracker = StatisticsTracker::new();
        let g = tracker.general_report();
        assert_eq!(g.accesses, 0);
        assert_eq!(g.latency.bottleneck_cache, None);
        assert_eq!(g.sharing, AddressSharing::default());
    }
}
