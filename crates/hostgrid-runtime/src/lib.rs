//! Compute dispatch core: host registry, selection, execution ledger,
//! remote invocation and settlement.

pub mod catalog;
pub mod config;
pub mod credits;
pub mod detector;
pub mod dispatcher;
pub mod error;
pub mod identity;
pub mod invoker;
pub mod ledger;
pub mod memory_repository;
pub mod models;
pub mod registry;
pub mod repository;
pub mod selector;
pub mod settlement;
#[cfg(feature = "sqlite-persistence")]
pub mod sqlite_repository;

#[cfg(test)]
mod testing;

pub use catalog::{resolve_visible_server, NewServer, ServerCatalog};
pub use config::{HostgridConfig, StorageBackend};
pub use credits::{split_earnings, Credits, EarningsSplit, MINOR_UNITS_PER_CREDIT};
pub use detector::{
    classify_info, DetectError, HttpProtocolDetector, ProtocolDetector, StaticProtocolDetector,
};
pub use dispatcher::{DispatchOutcome, DispatchRequest, DispatchSummary, Dispatcher};
pub use error::{DispatchError, RegistryError, StoreError};
pub use identity::{ExecutionId, HostId, PaymentId, RequesterId, ServerId};
pub use invoker::{HttpInvoker, InvocationError, InvocationRequest, InvokerConfig, RemoteInvoker};
pub use ledger::ExecutionLedger;
pub use memory_repository::InMemoryComputeRepository;
pub use models::{
    ExecutionOutcome, ExecutionRecord, ExecutionStatus, Host, HostStatus, NewExecution, NewHost,
    PaymentRecord, PaymentStatus, ProtocolType, ServerDefinition, ServerVisibility,
    StatisticsDelta,
};
pub use registry::{HostRegistry, DEFAULT_PROFIT_SHARE_PERCENTAGE};
pub use repository::{ComputeRepository, DEFAULT_EXECUTION_LIST_LIMIT};
pub use selector::{is_eligible, select_host, HostSelector, SelectionCriteria, SelectionDecision};
pub use settlement::{earnings_for, SettlementEngine, SettlementReceipt};
#[cfg(feature = "sqlite-persistence")]
pub use sqlite_repository::SqliteComputeRepository;
