use async_trait::async_trait;
use hermes_core::{HermesError, Uid, Version};
use serde_json::{Map, Value};
use thiserror::Error;

/// Stored document shape: a flat JSON object
pub type Document = Map<String, Value>;

/// Reserved document field holding the uid
pub const FIELD_ID: &str = "_id";

/// Reserved document field holding the version
pub const FIELD_VER: &str = "ver";

/// Store-level errors, translated into [`HermesError`] by the repository
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("document {collection}.{uid} already exists")]
    DuplicateKey { collection: String, uid: Uid },

    #[error("version mismatch for {collection}.{uid}: expected {expected}")]
    VersionConflict {
        collection: String,
        uid: Uid,
        expected: Version,
    },

    #[error("backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for HermesError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::VersionConflict {
                collection, uid, ..
            } => HermesError::VersionConflict { collection, uid },
            other => HermesError::Adapter(other.to_string()),
        }
    }
}

/// One conditional update inside a [`DocStore::update`] transaction
#[derive(Debug, Clone)]
pub struct CondUpdate {
    pub collection: String,
    pub uid: Uid,
    /// Version observed when the entity was loaded
    pub ver: Version,
    /// Domain fields to set; `_id` and `ver` are managed by the store
    pub fields: Document,
}

/// Port for a document-oriented transactional store.
///
/// The store is the only resource shared across concurrent scopes: all
/// cross-scope coordination happens through [`DocStore::update`]'s atomic
/// conditional writes, never through in-process locks.
#[async_trait]
pub trait DocStore: Send + Sync {
    /// Current document for `(collection, uid)`, if any
    async fn find(
        &self,
        db: &str,
        collection: &str,
        uid: &str,
    ) -> Result<Option<Document>, StoreError>;

    /// Atomic insert-if-absent keyed on the document's `_id`.
    ///
    /// Fails with [`StoreError::DuplicateKey`] when a document with the same
    /// uid already exists - the caller lost a first-access race.
    async fn insert(&self, db: &str, collection: &str, doc: Document) -> Result<(), StoreError>;

    /// One multi-document transaction of conditional updates.
    ///
    /// Each item matches on `(_id, ver)`, replaces the domain fields and
    /// increments `ver` by 1. Any unmatched item aborts the whole batch with
    /// [`StoreError::VersionConflict`] - no partial commit.
    async fn update(&self, db: &str, updates: &[CondUpdate]) -> Result<(), StoreError>;

    /// Remove a document; `true` if one existed
    async fn delete(&self, db: &str, collection: &str, uid: &str) -> Result<bool, StoreError>;

    async fn count(&self, db: &str, collection: &str) -> Result<usize, StoreError>;

    /// Up to `n` documents drawn at random
    async fn sample(
        &self,
        db: &str,
        collection: &str,
        n: usize,
    ) -> Result<Vec<Document>, StoreError>;

    async fn all(&self, db: &str, collection: &str) -> Result<Vec<Document>, StoreError>;

    async fn delete_all(&self, db: &str, collection: &str) -> Result<(), StoreError>;
}
