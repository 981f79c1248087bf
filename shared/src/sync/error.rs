use thiserror::Error;

use lattice_serde::SerdeErr;

/// Protocol-level failures surfaced by message handling. A malformed frame
/// is fatal for its connection; everything recoverable is logged and
/// skipped instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] SerdeErr),
}
