//! Convoy Core - Shared domain model for the Convoy support runtime.
//!
//! This crate defines the entities every other Convoy crate speaks in:
//! principals and operator profiles, sessions and messages, tickets,
//! waiting-queue and transfer records, SLA configs and violations,
//! automation triggers and runs, knowledge documents, and the socket
//! frame model exchanged with connected clients.
//!
//! It deliberately contains no IO: persistence lives in `convoy-storage`,
//! live connections in `convoy-hub`, and policy in the engine crates.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod automation;
pub mod error;
pub mod frame;
pub mod id;
pub mod knowledge;
pub mod prelude;
pub mod principal;
pub mod session;
pub mod sla;
pub mod ticket;
pub mod transfer;

pub use automation::{
    AutomationRun, AutomationTrigger, CondOp, Condition, EventTag, PlatformEvent, TriggerAction,
};
pub use error::{CoreError, CoreResult, ErrorKind};
pub use frame::{AnswerSource, Frame, FrameError, RawFrame, parse_raw};
pub use id::{ClientId, MessageId, PrincipalId, SessionId, TicketId};
pub use knowledge::KnowledgeDoc;
pub use principal::{Availability, OperatorProfile, Principal, PrincipalRole, PrincipalStatus};
pub use session::{Message, MessageKind, Platform, SenderRole, Session, SessionStatus};
pub use sla::{SlaConfig, SlaKind, SlaViolation};
pub use ticket::{Priority, Ticket, TicketComment, TicketStatus};
pub use transfer::{TransferParty, TransferRecord, WaitingRecord, WaitingStatus};
