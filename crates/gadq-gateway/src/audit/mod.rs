//! Audit trail (NDJSON, masked, size-rotated).
//!
//! - `event`: closed set of audit records under a common envelope
//! - `mask`: credential masking applied before anything reaches disk
//! - `log`: the append/rotate sink shared by every component
//! - `rotator`: optional periodic size check on a background task

pub mod event;
pub mod log;
pub mod mask;
pub mod rotator;

pub use event::{AuditEvent, Component, EventKind, ProcessMeta, TraceId};
pub use log::{AuditLog, AuditLogConfig};
pub use mask::{mask_token, ORIGIN_PLACEHOLDER, SECRET_PLACEHOLDER};
pub use rotator::RotatorHandle;
