use thiserror::Error;

/// Errors raised while decoding a bit stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SerdeErr {
    /// The reader ran past the end of the buffer.
    #[error("bit stream exhausted: needed {needed} more bits, {left} left")]
    Exhausted { needed: usize, left: usize },
    /// A length-prefixed string did not contain valid UTF-8.
    #[error("string payload is not valid UTF-8")]
    BadUtf8,
    /// A variable-length integer carried more than its 30 value bits allow.
    #[error("variable-length integer out of range")]
    VleOutOfRange,
}
