use std::collections::VecDeque;
use std::fmt;

use log::{debug, trace};

use super::bus::Bus;
use super::common::*;
use crate::error::{Result, SimError};
use crate::stats::{Access, Tracker};

// cache lines

#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineState {
    #[default]
    Invalid,
    Shared,
    Modified,
}

impl fmt::Display for LineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LineState::Invalid => "INVALID",
            LineState::Shared => "SHARED",
            LineState::Modified => "MODIFIED",
        };
        f.write_str(s)
    }
}

/// One slot of a direct-mapped cache. Holds no data, only a tag and the
/// coherence state.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheLine {
    pub tag: Option<u64>,
    pub state: LineState,
    pub previous_state: Option<LineState>,
    pub written_to: bool,
}

impl CacheLine {
    /// Moves the line to `new` and returns the state it held before. A
    /// reassignment to the current state still counts.
    pub fn transition(&mut self, new: LineState) -> LineState {
        let old = self.state;
        self.previous_state = Some(old);
        self.state = new;
        old
    }

    /// True when the line holds `tag` in a valid state.
    pub fn holds(&self, tag: u64) -> bool {
        self.state != LineState::Invalid && self.tag == Some(tag)
    }

    fn install(&mut self, tag: u64, state: LineState, written_to: bool) {
        self.transition(state);
        self.tag = Some(tag);
        self.written_to = written_to;
    }
}

impl fmt::Display for CacheLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheLine[state={}, previous_state=", self.state)?;
        match self.previous_state {
            Some(s) => write!(f, "{}", s)?,
            None => f.write_str("None")?,
        }
        match self.tag {
            Some(t) => write!(f, ", tag={}", t)?,
            None => f.write_str(", tag=None")?,
        }
        write!(f, ", written_to={}]", self.written_to)
    }
}

// write buffer

#[derive(Debug)]
struct WriteBuffer {
    entries: VecDeque<Addr>,
    capacity: usize,
    retire_at: usize,
    // completion time of the write currently retiring in the background
    write_finishes_at: Option<u64>,
}

impl WriteBuffer {
    fn new(capacity: usize, retire_at: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(SimError::InvalidWriteBuffer { name: "write_buffer_size" });
        }
        if retire_at == 0 {
            return Err(SimError::InvalidWriteBuffer { name: "retire_at_count" });
        }
        Ok(WriteBuffer {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            retire_at,
            write_finishes_at: None,
        })
    }

    fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    fn contains(&self, addr: &Addr) -> bool {
        self.entries.contains(addr)
    }

    fn busy_at(&self, latency: u64) -> bool {
        self.write_finishes_at.is_some_and(|t| t > latency)
    }
}

#[derive(Debug)]
enum Consistency {
    Sequential,
    TotalStore(WriteBuffer),
}

// cache controller

/// A private, direct-mapped, write-through cache running MSI.
///
/// The controller never owns its peers: the bus and tracker are handed in per
/// access, so the same controller can be driven against fakes.
#[derive(Debug)]
pub struct CacheController {
    pub id: CacheId,
    geometry: Geometry,
    lines: Vec<CacheLine>,
    latency: u64,
    consistency: Consistency,
}

impl CacheController {
    pub fn new(
        id: CacheId,
        number_lines: usize,
        line_size: usize,
        model: ConsistencyModel,
    ) -> Result<Self> {
        let geometry = Geometry::new(number_lines, line_size)?;
        let consistency = match model {
            ConsistencyModel::SequentialConsistency => Consistency::Sequential,
            ConsistencyModel::TotalStoreOrder { buffer_capacity, retire_at } => {
                Consistency::TotalStore(WriteBuffer::new(buffer_capacity, retire_at)?)
            }
        };
        Ok(Self {
            id,
            geometry,
            lines: vec![CacheLine::default(); geometry.number_lines()],
            latency: 0,
            consistency,
        })
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }
    pub fn latency(&self) -> u64 {
        self.latency
    }
    pub fn line(&self, slot: usize) -> Option<&CacheLine> {
        self.lines.get(slot)
    }
    pub fn lines(&self) -> &[CacheLine] {
        &self.lines
    }
    pub fn line_for(&self, addr: Addr) -> &CacheLine {
        &self.lines[self.geometry.locate(addr).slot]
    }
    pub fn buffered_writes(&self) -> usize {
        match &self.consistency {
            Consistency::Sequential => 0,
            Consistency::TotalStore(wb) => wb.entries.len(),
        }
    }

    // processor requests

    pub fn read<B, T>(&mut self, addr: Addr, bus: &B, tracker: &mut T) -> AccessOutcome
    where
        B: Bus + ?Sized,
        T: Tracker + ?Sized,
    {
        if matches!(self.consistency, Consistency::Sequential) {
            let (cost, hit) = self.process_read(addr, bus, tracker);
            self.latency += cost;
            return AccessOutcome::from_hit(hit);
        }

        self.latency += timing::WRITE_BUFFER_SNOOP;
        trace!("cache {}: read {}, snooping write buffer (latency now {})", self.id, addr, self.latency);

        let hit = if self.write_buffer_holds(&addr) {
            debug!("cache {}: found {} in write buffer", self.id, addr);
            tracker.snoop_write_buffer(self.id, addr);
            true
        } else {
            let (cost, hit) = self.process_read(addr, bus, tracker);
            self.latency += cost;
            hit
        };

        // reads are atomic, so a write only gets a chance to retire afterwards
        self.retire_write(bus, tracker);
        AccessOutcome::from_hit(hit)
    }

    pub fn write<B, T>(&mut self, addr: Addr, bus: &B, tracker: &mut T) -> AccessOutcome
    where
        B: Bus + ?Sized,
        T: Tracker + ?Sized,
    {
        debug!("cache {}: write to {}", self.id, addr);
        if matches!(self.consistency, Consistency::Sequential) {
            // SC puts every write on the critical path
            let (cost, hit) = self.process_write(addr, bus, tracker);
            self.latency += cost;
            return AccessOutcome::from_hit(hit);
        }

        tracker.record_write(self.id, self.latency);
        let full = match &self.consistency {
            Consistency::TotalStore(wb) => wb.is_full(),
            Consistency::Sequential => false,
        };
        if full {
            self.drain_write_buffer(bus, tracker);
        }
        if let Consistency::TotalStore(wb) = &mut self.consistency {
            wb.entries.push_back(addr);
        }
        self.retire_write(bus, tracker);
        AccessOutcome::Buffered
    }

    /// Program-end hook. Flushes whatever is still buffered onto the critical
    /// path; a no-op under SC.
    pub fn finish<B, T>(&mut self, bus: &B, tracker: &mut T)
    where
        B: Bus + ?Sized,
        T: Tracker + ?Sized,
    {
        if matches!(self.consistency, Consistency::TotalStore(_)) {
            self.drain_write_buffer(bus, tracker);
        }
    }

    // bus signals from peers

    /// Another cache missed reading `addr`. A Modified copy is downgraded.
    /// Returns whether this cache could supply the line.
    pub fn notify_read_miss(&mut self, addr: Addr) -> bool {
        let loc = self.geometry.locate(addr);
        let line = &mut self.lines[loc.slot];
        if line.state == LineState::Modified && line.tag == Some(loc.tag) {
            debug!(
                "cache {}: {} [tag={}, slot={}] MODIFIED -> SHARED",
                self.id, addr, loc.tag, loc.slot
            );
            line.transition(LineState::Shared);
        }
        line.tag == Some(loc.tag) && line.state == LineState::Shared
    }

    /// Another cache missed writing `addr`. Any valid copy is invalidated; the
    /// tag and written flag stay behind.
    pub fn notify_write_miss(&mut self, addr: Addr) {
        let loc = self.geometry.locate(addr);
        let line = &mut self.lines[loc.slot];
        if line.holds(loc.tag) {
            debug!(
                "cache {}: {} [tag={}, slot={}] {} -> INVALID",
                self.id, addr, loc.tag, loc.slot, line.state
            );
            line.transition(LineState::Invalid);
        }
    }

    // internals

    fn write_buffer_holds(&self, addr: &Addr) -> bool {
        match &self.consistency {
            Consistency::TotalStore(wb) => wb.contains(addr),
            Consistency::Sequential => false,
        }
    }

    /// Applies a write to the cache line. Returns the cost and whether it hit.
    fn process_write<B, T>(&mut self, addr: Addr, bus: &B, tracker: &mut T) -> (u64, bool)
    where
        B: Bus + ?Sized,
        T: Tracker + ?Sized,
    {
        let loc = self.geometry.locate(addr);
        let line = self.lines[loc.slot];
        let access = Access { cache: self.id, addr, block: loc.block(), local: line };

        let hit = match line.state {
            LineState::Modified if line.tag == Some(loc.tag) => {
                debug!("cache {}: local write hit [tag={}, slot={}]", self.id, loc.tag, loc.slot);
                tracker.write_hit(&access);
                self.lines[loc.slot].transition(LineState::Modified);
                true
            }
            _ => {
                let coherence_miss = match line.state {
                    // invalidated by a peer rather than never loaded
                    LineState::Invalid => line.tag == Some(loc.tag),
                    _ if line.tag != Some(loc.tag) => false,
                    // we owned it and a peer's read downgraded us
                    _ => line.previous_state == Some(LineState::Modified),
                };
                debug!(
                    "cache {}: write miss [tag={}, slot={}] from {}{}",
                    self.id,
                    loc.tag,
                    loc.slot,
                    line.state,
                    if coherence_miss { " (coherence)" } else { "" }
                );
                // the tracker has to see peers before they are invalidated
                tracker.write_miss(&access, coherence_miss);
                bus.write_miss(self.id, addr);
                self.lines[loc.slot].install(loc.tag, LineState::Modified, true);
                false
            }
        };
        (timing::write_through(), hit)
    }

    /// Applies a read to the cache line. Returns the cost and whether it hit.
    fn process_read<B, T>(&mut self, addr: Addr, bus: &B, tracker: &mut T) -> (u64, bool)
    where
        B: Bus + ?Sized,
        T: Tracker + ?Sized,
    {
        let loc = self.geometry.locate(addr);
        let line = self.lines[loc.slot];
        let access = Access { cache: self.id, addr, block: loc.block(), local: line };

        if line.holds(loc.tag) {
            debug!("cache {}: local read hit [tag={}, slot={}] in {}", self.id, loc.tag, loc.slot, line.state);
            tracker.read_hit(&access);
            self.lines[loc.slot].transition(line.state);
            return (timing::read(false, false), true);
        }

        let coherence_miss = line.state == LineState::Invalid && line.tag == Some(loc.tag);
        debug!(
            "cache {}: read miss [tag={}, slot={}] from {}{}",
            self.id,
            loc.tag,
            loc.slot,
            line.state,
            if coherence_miss { " (coherence)" } else { "" }
        );
        tracker.read_miss(&access, coherence_miss);
        let supplied = bus.read_miss(self.id, addr);
        self.lines[loc.slot].install(loc.tag, LineState::Shared, false);
        (timing::read(true, supplied), false)
    }

    /// Retire-at-N: starts the oldest buffered write in the background when the
    /// previous one has completed and enough writes are queued.
    fn retire_write<B, T>(&mut self, bus: &B, tracker: &mut T)
    where
        B: Bus + ?Sized,
        T: Tracker + ?Sized,
    {
        let latency = self.latency;
        let next = match &mut self.consistency {
            Consistency::Sequential => return,
            Consistency::TotalStore(wb) => {
                if wb.busy_at(latency) {
                    trace!("cache {}: write still in flight", self.id);
                    return;
                }
                wb.write_finishes_at = None;
                if wb.entries.len() < wb.retire_at {
                    return;
                }
                wb.entries.pop_front()
            }
        };
        let Some(addr) = next else { return };

        // off the critical path, only the completion time matters
        let (cost, _) = self.process_write(addr, bus, tracker);
        let finishes_at = self.latency + cost;
        if let Consistency::TotalStore(wb) = &mut self.consistency {
            wb.write_finishes_at = Some(finishes_at);
        }
        trace!("cache {}: retiring write to {}, finishes at {}", self.id, addr, finishes_at);
    }

    /// Flushes the whole write buffer synchronously. An in-flight write has to
    /// complete first.
    fn drain_write_buffer<B, T>(&mut self, bus: &B, tracker: &mut T)
    where
        B: Bus + ?Sized,
        T: Tracker + ?Sized,
    {
        let Consistency::TotalStore(wb) = &mut self.consistency else { return };
        tracker.drain_write_buffer(self.id, wb.entries.len());
        debug!("cache {}: draining write buffer ({} writes)", self.id, wb.entries.len());

        if let Some(t) = wb.write_finishes_at.filter(|&t| t > self.latency) {
            trace!("cache {}: waiting for in-flight write, latency {} -> {}", self.id, self.latency, t);
            self.latency = t;
            wb.write_finishes_at = None;
        }

        let pending = std::mem::take(&mut wb.entries);
        for addr in pending {
            let (cost, _) = self.process_write(addr, bus, tracker);
            self.latency += cost;
        }
    }
}
