//! Identity types for hostgrid records.
//!
//! Every identifier is an opaque string; hosts, executions, payments and server
//! definitions are minted as UUIDv4 strings by the repository layer.

/// Identifies a registered compute host.
pub type HostId = String;

/// Identifies one dispatch attempt.
pub type ExecutionId = String;

/// Identifies a settlement record owed to a host.
pub type PaymentId = String;

/// Identifies the caller on whose behalf a dispatch runs (authenticated upstream).
pub type RequesterId = String;

/// Identifies a logical server definition.
pub type ServerId = String;

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
