mod entity_action;
mod message_id;
mod outgoing;

pub use entity_action::{EntityActionMsg, ExecType};
pub use message_id::MessageId;
pub use outgoing::OutgoingMessage;
