// Domain Layer - Pure decision logic

pub mod decision;
pub mod error;
pub mod specification;

// Re-exports
pub use decision::{evaluate, SignalSnapshot, Thresholds, TriggerReason};
pub use error::DomainError;
pub use specification::{QueryKind, ShutdownSpecification, ThresholdPair, TimeWindow, WorkSlot};
