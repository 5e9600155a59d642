use std::fmt;
use std::str::FromStr;

use crate::error::{Result, SimError};

pub type CacheId = usize;

/// Run configuration.
#[derive(Clone, Debug)]
pub struct SystemSpec {                 // unit         reasonable defaults
    pub number_processors: usize,       // caches       4
    pub number_lines: usize,            // lines        128
    pub line_size: usize,               // words        4
    pub consistency: ConsistencyModel,  //              SC
    pub debug: bool,                    //              false
}

impl Default for SystemSpec {
    fn default() -> Self {
        SystemSpec {
            number_processors: 4,
            number_lines: 128,
            line_size: 4,
            consistency: ConsistencyModel::SequentialConsistency,
            debug: false,
        }
    }
}

pub mod timing {
    // cycle costs
    pub const L1_CACHE: u64 = 2;
    pub const BUS: u64 = 20;
    pub const MAIN_MEMORY: u64 = 200;
    pub const WRITE_BUFFER_SNOOP: u64 = 1;

    /// Writes are write-through: every one of them goes to the L1, over the
    /// bus and into main memory, hit or miss.
    pub const fn write_through() -> u64 {
        L1_CACHE + BUS + MAIN_MEMORY
    }

    pub const fn read(missed: bool, supplied_by_peer: bool) -> u64 {
        match (missed, supplied_by_peer) {
            (false, _) => L1_CACHE,
            (true, true) => L1_CACHE + BUS,
            (true, false) => L1_CACHE + BUS + MAIN_MEMORY,
        }
    }
}

// consistency models

pub const DEFAULT_WRITE_BUFFER_SIZE: usize = 32;
pub const DEFAULT_RETIRE_AT_COUNT: usize = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelKind {
    Sc,
    Tso,
}

impl FromStr for ModelKind {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "SC" => Ok(ModelKind::Sc),
            "TSO" => Ok(ModelKind::Tso),
            _ => Err(SimError::UnknownConsistencyModel(s.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsistencyModel {
    SequentialConsistency,
    TotalStoreOrder {
        buffer_capacity: usize,
        retire_at: usize,
    },
}

impl ConsistencyModel {
    /// Builds a model from its command-line name. The write-buffer options only
    /// apply to TSO and fall back to the defaults when omitted.
    pub fn from_name(
        name: &str,
        write_buffer_size: Option<usize>,
        retire_at_count: Option<usize>,
    ) -> Result<Self> {
        Ok(match name.parse::<ModelKind>()? {
            ModelKind::Sc => ConsistencyModel::SequentialConsistency,
            ModelKind::Tso => ConsistencyModel::TotalStoreOrder {
                buffer_capacity: write_buffer_size.unwrap_or(DEFAULT_WRITE_BUFFER_SIZE),
                retire_at: retire_at_count.unwrap_or(DEFAULT_RETIRE_AT_COUNT),
            },
        })
    }

    pub fn kind(&self) -> ModelKind {
        match self {
            ConsistencyModel::SequentialConsistency => ModelKind::Sc,
            ConsistencyModel::TotalStoreOrder { .. } => ModelKind::Tso,
        }
    }
}

impl fmt::Display for ConsistencyModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsistencyModel::SequentialConsistency => write!(f, "SC"),
            ConsistencyModel::TotalStoreOrder { buffer_capacity, retire_at } => {
                write!(f, "TSO [{}, {}]", buffer_capacity, retire_at)
            }
        }
    }
}

// addresses and blocks

/// A word address. Only non-negative addresses can be built.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Addr(u64);

impl Addr {
    pub fn new(raw: u64) -> Self {
        Addr(raw)
    }
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl TryFrom<i64> for Addr {
    type Error = SimError;

    fn try_from(raw: i64) -> Result<Self> {
        u64::try_from(raw)
            .map(Addr)
            .map_err(|_| SimError::NegativeAddress(raw))
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A memory line, identified by the pair the cache indexes it with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Block {
    pub tag: u64,
    pub slot: usize,
}

/// Where an address lands in a cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Location {
    pub tag: u64,
    pub slot: usize,
    pub offset: u64,
}

impl Location {
    pub fn block(&self) -> Block {
        Block { tag: self.tag, slot: self.slot }
    }
}

/// Direct-mapped cache geometry: `2^slot_bits` lines of `2^offset_bits` words.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Geometry {
    slot_bits: u32,
    offset_bits: u32,
}

impl Geometry {
    pub fn new(number_lines: usize, line_size: usize) -> Result<Self> {
        Ok(Geometry {
            slot_bits: log2_exact("number_lines", number_lines)?,
            offset_bits: log2_exact("line_size", line_size)?,
        })
    }

    pub fn slot_bits(&self) -> u32 {
        self.slot_bits
    }
    pub fn offset_bits(&self) -> u32 {
        self.offset_bits
    }
    pub fn number_lines(&self) -> usize {
        1 << self.slot_bits
    }

    /// Splits an already validated address into tag, slot and offset.
    pub fn locate(&self, addr: Addr) -> Location {
        let a = addr.value();
        let offset = a & mask(self.offset_bits);
        let slot = (a >> self.offset_bits) & mask(self.slot_bits);
        let tag = a.checked_shr(self.slot_bits + self.offset_bits).unwrap_or(0);
        Location { tag, slot: slot as usize, offset }
    }

    /// Splits a raw address, rejecting negative ones.
    pub fn decode(&self, raw: i64) -> Result<Location> {
        Ok(self.locate(Addr::try_from(raw)?))
    }

    /// Inverse of `locate`.
    pub fn address_of(&self, loc: &Location) -> Addr {
        Addr(
            (loc.tag << (self.slot_bits + self.offset_bits))
                | ((loc.slot as u64) << self.offset_bits)
                | loc.offset,
        )
    }
}

fn mask(bits: u32) -> u64 {
    if bits >= u64::BITS {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

fn log2_exact(name: &'static str, value: usize) -> Result<u32> {
    if value.is_power_of_two() {
        Ok(value.trailing_zeros())
    } else {
        Err(SimError::NotPowerOfTwo { name, value })
    }
}

// instructions

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Read,
    Write,
}

/// One access from a trace, tagged with the line it came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TraceEvent {
    pub line: usize,
    pub processor: CacheId,
    pub op: Op,
    pub addr: Addr,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessOutcome {
    Hit,
    Miss,
    /// TSO writes are queued; whether they hit is only known once they retire.
    Buffered,
}

impl AccessOutcome {
    pub fn from_hit(hit: bool) -> Self {
        if hit { AccessOutcome::Hit } else { AccessOutcome::Miss }
    }
    pub fn is_hit(&self) -> bool {
        matches!(self, AccessOutcome::Hit)
    }
}
