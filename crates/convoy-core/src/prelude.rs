//! Convenience re-exports for downstream crates.

pub use crate::automation::{
    AutomationRun, AutomationTrigger, CondOp, Condition, EventTag, PlatformEvent, TriggerAction,
};
pub use crate::error::{CoreError, CoreResult, ErrorKind};
pub use crate::frame::{AnswerSource, Frame, FrameError, RawFrame, parse_raw};
pub use crate::id::{ClientId, MessageId, PrincipalId, SessionId, TicketId};
pub use crate::knowledge::KnowledgeDoc;
pub use crate::principal::{
    Availability, OperatorProfile, Principal, PrincipalRole, PrincipalStatus,
};
pub use crate::session::{Message, MessageKind, Platform, SenderRole, Session, SessionStatus};
pub use crate::sla::{SlaConfig, SlaKind, SlaViolation};
pub use crate::ticket::{Priority, Ticket, TicketComment, TicketStatus};
pub use crate::transfer::{TransferParty, TransferRecord, WaitingRecord, WaitingStatus};
