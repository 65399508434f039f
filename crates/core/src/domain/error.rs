// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// The rule string does not follow the threshold grammar
    #[error("Cannot parse shutdown specification part '{part}': {reason} (expected e.g. idlePreWork:123+10,idlePostWork:22+10)")]
    SpecificationFormat { part: String, reason: String },
}

impl DomainError {
    pub(crate) fn format(part: impl Into<String>, reason: impl Into<String>) -> Self {
        DomainError::SpecificationFormat {
            part: part.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DomainError>;
