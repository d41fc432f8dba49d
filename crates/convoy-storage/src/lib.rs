//! Convoy Storage - persistence traits and reference stores.
//!
//! The core does not mandate a storage engine. Each entity family gets
//! an async repository trait; engines hold `Arc<dyn Trait>` handles and
//! never touch a concrete backend. [`MemoryStore`] implements every
//! trait over in-process maps and is the reference implementation the
//! test suites run against.
//!
//! Writes that must survive transient backend failures go through
//! [`retry::with_retry`], which retries `Unavailable` errors with
//! exponential backoff before surfacing them.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod error;
pub mod memory;
pub mod retry;
pub mod stores;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use retry::{RetryPolicy, with_retry};
pub use stores::{
    AutomationStore, ConversationStore, DirectoryStore, KnowledgeStore, QueueStore, SlaStore,
    TicketStore,
};
