use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use hermes_ports::{CondUpdate, DocStore, Document, FIELD_ID, FIELD_VER, StoreError};
use rand::seq::IteratorRandom;
use serde_json::Value;
use tokio::sync::RwLock;

type Collection = HashMap<String, Document>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CollectionKey {
    db: String,
    collection: String,
}

impl CollectionKey {
    fn new(db: &str, collection: &str) -> Self {
        Self {
            db: db.to_string(),
            collection: collection.to_string(),
        }
    }
}

/// In-process document store with transactional conditional updates.
///
/// Collections live under one `RwLock` so a batch update can validate every
/// optimistic version check before applying any of them - the same
/// all-or-nothing contract a server-side multi-document transaction gives.
#[derive(Default)]
pub struct MemStore {
    collections: RwLock<HashMap<CollectionKey, Collection>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocStore for MemStore {
    async fn find(
        &self,
        db: &str,
        collection: &str,
        uid: &str,
    ) -> Result<Option<Document>, StoreError> {
        let collections = self.collections.read().await;

        Ok(collections
            .get(&CollectionKey::new(db, collection))
            .and_then(|coll| coll.get(uid))
            .cloned())
    }

    async fn insert(&self, db: &str, collection: &str, doc: Document) -> Result<(), StoreError> {
        let uid = doc_uid(&doc)?;
        let mut collections = self.collections.write().await;
        let coll = collections
            .entry(CollectionKey::new(db, collection))
            .or_default();

        if coll.contains_key(&uid) {
            return Err(StoreError::DuplicateKey {
                collection: collection.to_string(),
                uid,
            });
        }

        coll.insert(uid, doc);

        Ok(())
    }

    async fn update(&self, db: &str, updates: &[CondUpdate]) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;

        // Validate every conditional match before mutating anything. A
        // second update for the same document would run against the first
        // one's incremented version, so it can never match.
        let mut seen = HashSet::new();
        for update in updates {
            let matched = seen.insert((update.collection.as_str(), update.uid.as_str()))
                && collections
                    .get(&CollectionKey::new(db, &update.collection))
                    .and_then(|coll| coll.get(&update.uid))
                    .and_then(doc_ver)
                    .is_some_and(|ver| ver == update.ver);

            if !matched {
                return Err(StoreError::VersionConflict {
                    collection: update.collection.clone(),
                    uid: update.uid.clone(),
                    expected: update.ver,
                });
            }
        }

        for update in updates {
            let mut doc = update.fields.clone();
            doc.insert(FIELD_ID.to_string(), Value::String(update.uid.clone()));
            doc.insert(FIELD_VER.to_string(), Value::from(update.ver + 1));

            let coll = collections
                .entry(CollectionKey::new(db, &update.collection))
                .or_default();
            coll.insert(update.uid.clone(), doc);
        }

        Ok(())
    }

    async fn delete(&self, db: &str, collection: &str, uid: &str) -> Result<bool, StoreError> {
        let mut collections = self.collections.write().await;

        Ok(collections
            .get_mut(&CollectionKey::new(db, collection))
            .and_then(|coll| coll.remove(uid))
            .is_some())
    }

    async fn count(&self, db: &str, collection: &str) -> Result<usize, StoreError> {
        let collections = self.collections.read().await;

        Ok(collections
            .get(&CollectionKey::new(db, collection))
            .map_or(0, Collection::len))
    }

    async fn sample(
        &self,
        db: &str,
        collection: &str,
        n: usize,
    ) -> Result<Vec<Document>, StoreError> {
        let collections = self.collections.read().await;
        let mut rng = rand::thread_rng();

        Ok(collections
            .get(&CollectionKey::new(db, collection))
            .map(|coll| coll.values().choose_multiple(&mut rng, n))
            .unwrap_or_default()
            .into_iter()
            .cloned()
            .collect())
    }

    async fn all(&self, db: &str, collection: &str) -> Result<Vec<Document>, StoreError> {
        let collections = self.collections.read().await;

        Ok(collections
            .get(&CollectionKey::new(db, collection))
            .map(|coll| coll.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_all(&self, db: &str, collection: &str) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        collections.remove(&CollectionKey::new(db, collection));

        Ok(())
    }
}

fn doc_uid(doc: &Document) -> Result<String, StoreError> {
    match doc.get(FIELD_ID) {
        Some(Value::String(uid)) => Ok(uid.clone()),
        _ => Err(StoreError::Backend(
            "document without a string _id".to_string(),
        )),
    }
}

fn doc_ver(doc: &Document) -> Option<i64> {
    doc.get(FIELD_VER)?.as_i64()
}
