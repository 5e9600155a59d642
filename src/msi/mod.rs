mod bus;
mod cache;
mod common;
mod consistency;

pub use bus::{Bus, CacheRef, SharedBus};
pub use cache::{CacheController, CacheLine, LineState};
pub use common::*;
pub use consistency::{check_consistency, Inconsistency};
