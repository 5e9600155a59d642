use std::cell::RefCell;
use std::rc::Rc;

use log::{debug, info};

use crate::error::{Result, SimError};
use crate::msi::*;
use crate::stats::{CacheReport, GeneralReport, StatisticsTracker};

/// A set of caches on one bus, fed from a trace one access at a time.
pub struct Simulation {
    spec: SystemSpec,
    caches: Vec<CacheRef>,
    bus: SharedBus,
    tracker: StatisticsTracker,
}

impl Simulation {
    pub fn new(spec: SystemSpec) -> Result<Self> {
        if spec.number_processors == 0 {
            return Err(SimError::NoProcessors);
        }
        let mut bus = SharedBus::new();
        let mut tracker = StatisticsTracker::new();

        // create caches and attach them to bus and tracker
        let caches = (0..spec.number_processors)
            .map(|id| {
                let cache = CacheController::new(id, spec.number_lines, spec.line_size, spec.consistency)?;
                let cache = Rc::new(RefCell::new(cache));
                bus.add_cache(cache.clone());
                tracker.add_cache(cache.clone());
                Ok(cache)
            })
            .collect::<Result<Vec<_>>>()?;

        info!(
            "{} processors, {} lines of {} words, {}",
            spec.number_processors, spec.number_lines, spec.line_size, spec.consistency
        );
        Ok(Self { spec, caches, bus, tracker })
    }

    pub fn spec(&self) -> &SystemSpec {
        &self.spec
    }
    pub fn caches(&self) -> &[CacheRef] {
        &self.caches
    }
    pub fn tracker(&self) -> &StatisticsTracker {
        &self.tracker
    }

    /// Runs a single access to completion, including every bus signal it
    /// causes.
    pub fn access(&mut self, event: &TraceEvent) -> Result<AccessOutcome> {
        let cache = self.caches.get(event.processor).ok_or(SimError::UnknownProcessor {
            line: event.line,
            processor: event.processor,
        })?;
        let mut cache = cache.borrow_mut();
        let outcome = match event.op {
            Op::Read => cache.read(event.addr, &self.bus, &mut self.tracker),
            Op::Write => cache.write(event.addr, &self.bus, &mut self.tracker),
        };
        debug!("P{} {:?} {} -> {:?}", event.processor, event.op, event.addr, outcome);
        Ok(outcome)
    }

    /// Replays a whole trace and then signals the end of the program. The
    /// first bad event aborts the run; the caches are not drained in that case.
    /// In debug mode every event is followed by a consistency check.
    pub fn replay<I>(&mut self, events: I) -> Result<usize>
    where
        I: IntoIterator<Item = Result<TraceEvent>>,
    {
        let mut count = 0;
        for event in events {
            let event = event?;
            self.access(&event)?;
            count += 1;

            if self.spec.debug {
                let found = self.check_consistency();
                if !found.is_empty() {
                    return Err(SimError::Inconsistent { line: event.line, found });
                }
            }
        }
        self.finish();
        info!("replayed {} accesses", count);
        Ok(count)
    }

    /// Program-end hook: lets every cache flush what it still holds back.
    pub fn finish(&mut self) {
        for cache in &self.caches {
            cache.borrow_mut().finish(&self.bus, &mut self.tracker);
        }
    }

    pub fn check_consistency(&self) -> Vec<Inconsistency> {
        check_consistency(&self.caches)
    }

    pub fn cache_report(&self, id: CacheId) -> Option<CacheReport> {
        self.tracker.cache_report(id)
    }

    pub fn cache_reports(&self) -> Vec<CacheReport> {
        (0..self.caches.len())
            .filter_map(|id| self.tracker.cache_report(id))
            .collect()
    }

    pub fn general_report(&self) -> GeneralReport {
        self.tracker.general_report()
    }
}
