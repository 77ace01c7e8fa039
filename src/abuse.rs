//! IP abuse mitigation: sliding-window counting, a violation ledger, and escalating blocks.
//!
//! [`AbuseControl`] composes the three components into one admission decision:
//!
//! 1. an active block denies immediately without counting;
//! 2. otherwise the request is counted, and exceeding the threshold registers a violation that
//!    may escalate into a block written before the denial is returned;
//! 3. everything else is allowed.

pub mod block;
pub mod control;
pub mod counter;
pub mod ledger;
pub mod record;

pub use block::*;
pub use control::*;
pub use counter::*;
pub use ledger::*;
pub use record::*;
