//! Typed processors, one per job kind.

mod categorize;
mod email;
mod esg;
mod property;
mod snapshot;
mod sync;

pub use categorize::CategorizeProcessor;
pub use email::EmailProcessor;
pub use esg::EsgProcessor;
pub use property::PropertyValuationProcessor;
pub use snapshot::SnapshotProcessor;
pub use sync::SyncProcessor;

use crate::error::JobError;
use crate::job::JobKind;

/// Kind/payload mismatch guard shared by every processor.
fn payload_mismatch(expected: JobKind, got: JobKind) -> JobError {
    JobError::Validation(format!("expected {expected} payload, got {got}"))
}
