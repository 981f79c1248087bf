use crate::messages::MessageId;

/// A framed message handed to the transport. The transport owns framing,
/// per-packet ids and channel ordering; the core only chooses reliability.
#[derive(Clone, Debug)]
pub struct OutgoingMessage {
    pub message_id: MessageId,
    pub reliable: bool,
    pub payload: Vec<u8>,
}
