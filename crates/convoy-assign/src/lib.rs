//! Convoy Assign - who handles which session.
//!
//! Three pieces cooperate here:
//!
//! - the **online operator index**: an in-memory map from operator id
//!   to a compact availability/load/skills snapshot, rebuilt from
//!   storage at startup and mutated by availability and slot events;
//! - the **waiting queue**: sessions that asked for a human while no
//!   eligible operator had a free slot, ordered by priority then age,
//!   drained on slot release, availability changes, and a periodic tick;
//! - the **transfer state machine**: `ai-handled → waiting →
//!   operator-handled → ended` (with the direct and
//!   operator-to-operator shortcuts), every transition serialized by a
//!   per-session lock.
//!
//! Load invariants live in the index: `claim_slot` and `release_slot`
//! are the only mutations of `current_load` anywhere in the runtime.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod engine;
mod error;
mod index;
mod queue;

pub use engine::{AssignmentEngine, TransferOutcome, run_drain_loop};
pub use error::{AssignError, AssignResult};
pub use index::{OnlineIndex, OperatorSnapshot};
pub use queue::{WaitingEntry, WaitingQueue};
