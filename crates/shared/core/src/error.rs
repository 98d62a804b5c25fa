use thiserror::Error;

use crate::domain::Uid;

/// Error taxonomy shared by the bus, the unit of work and the store adapter
#[derive(Error, Debug)]
pub enum HermesError {
    /// Wiring defect detected at startup, fatal and never retried
    #[error("configuration error: {0}")]
    Config(String),

    /// Store unreachable or a stored document that can't be mapped to its entity
    #[error("adapter error: {0}")]
    Adapter(String),

    /// Lost update detected by the optimistic version check
    #[error("version conflict for {collection}.{uid}")]
    VersionConflict { collection: String, uid: Uid },

    /// Handler programming defect (identity map misuse, message type
    /// confusion) - unrecoverable for the invocation
    #[error("consistency error: {0}")]
    Consistency(String),

    /// Request dispatched with no registered handler
    #[error("no handler registered for {0}")]
    NoHandler(&'static str),
}

impl HermesError {
    /// Recoverable errors are logged as warnings and offered to the retry
    /// policy; everything else stops the dispatch.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Adapter(_) | Self::VersionConflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, HermesError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_kinds() {
        assert!(HermesError::Adapter("store down".into()).is_recoverable());
        assert!(
            HermesError::VersionConflict {
                collection: "quote".into(),
                uid: "GAZP".into(),
            }
            .is_recoverable()
        );

        assert!(!HermesError::Config("dup".into()).is_recoverable());
        assert!(!HermesError::Consistency("double load".into()).is_recoverable());
        assert!(!HermesError::NoHandler("GetPortfolio").is_recoverable());
    }

    #[test]
    fn test_version_conflict_message_names_the_document() {
        let err = HermesError::VersionConflict {
            collection: "quote".into(),
            uid: "GAZP".into(),
        };
        assert_eq!(err.to_string(), "version conflict for quote.GAZP");
    }
}
