use std::sync::Arc;

use hermes_core::{Entity, HermesError, Result, START_DAY, Subdomain};
use hermes_ports::{CondUpdate, DocStore, Document, FIELD_ID, FIELD_VER, StoreError};
use log::debug;
use serde_json::{Value, json};

/// Document field holding the embedded revision on the entity side
const FIELD_REV: &str = "rev";

/// Document field holding the day of a placeholder entity
const FIELD_DAY: &str = "day";

/// Entity repository bound to one subdomain (one logical database).
///
/// Cheap to clone; every unit of work gets its own handle over the shared
/// store.
#[derive(Clone)]
pub struct Repo {
    store: Arc<dyn DocStore>,
    db: Subdomain,
}

impl Repo {
    pub fn new(store: Arc<dyn DocStore>, db: Subdomain) -> Self {
        Self { store, db }
    }

    pub fn subdomain(&self) -> Subdomain {
        self.db
    }

    /// Load the current state of `(E, uid)`.
    ///
    /// First access to an unknown uid materializes a version-0 placeholder
    /// document rather than erroring; losing the insert race to a concurrent
    /// first access means another scope created it, so the winner's document
    /// is re-read and used.
    pub async fn get<E: Entity>(&self, uid: &str) -> Result<E> {
        let collection = E::kind();

        let doc = match self.store.find(self.db.as_str(), collection, uid).await? {
            Some(doc) => doc,
            None => self.create_placeholder(collection, uid).await?,
        };

        entity_from_doc(doc)
    }

    async fn create_placeholder(&self, collection: &str, uid: &str) -> Result<Document> {
        let mut doc = Document::new();
        doc.insert(FIELD_ID.to_string(), Value::String(uid.to_string()));
        doc.insert(FIELD_VER.to_string(), Value::from(0));
        doc.insert(FIELD_DAY.to_string(), day_value()?);

        match self
            .store
            .insert(self.db.as_str(), collection, doc.clone())
            .await
        {
            Ok(()) => {
                debug!("created placeholder {collection}.{uid}");

                Ok(doc)
            }
            Err(StoreError::DuplicateKey { .. }) => self
                .store
                .find(self.db.as_str(), collection, uid)
                .await?
                .ok_or_else(|| HermesError::Adapter(format!("can't load {collection}.{uid}"))),
            Err(err) => Err(err.into()),
        }
    }

    /// Save a batch of entity snapshots as one transaction.
    ///
    /// Every item is a conditional update keyed on its observed version; a
    /// single mismatch aborts the whole batch with a version conflict.
    pub async fn save(&self, batch: Vec<CondUpdate>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        self.store
            .update(self.db.as_str(), &batch)
            .await
            .map_err(Into::into)
    }

    /// Remove the entity's document immediately
    pub async fn delete<E: Entity>(&self, uid: &str) -> Result<()> {
        match self.store.delete(self.db.as_str(), E::kind(), uid).await? {
            true => Ok(()),
            false => Err(HermesError::Adapter(format!(
                "can't delete missing {}.{uid}",
                E::kind()
            ))),
        }
    }

    pub async fn count<E: Entity>(&self) -> Result<usize> {
        Ok(self.store.count(self.db.as_str(), E::kind()).await?)
    }

    pub async fn sample<E: Entity>(&self, n: usize) -> Result<Vec<E>> {
        let docs = self.store.sample(self.db.as_str(), E::kind(), n).await?;

        docs.into_iter().map(entity_from_doc).collect()
    }

    pub async fn all<E: Entity>(&self) -> Result<Vec<E>> {
        let docs = self.store.all(self.db.as_str(), E::kind()).await?;

        docs.into_iter().map(entity_from_doc).collect()
    }

    pub async fn delete_all<E: Entity>(&self) -> Result<()> {
        Ok(self.store.delete_all(self.db.as_str(), E::kind()).await?)
    }
}

fn day_value() -> Result<Value> {
    serde_json::to_value(START_DAY)
        .map_err(|err| HermesError::Adapter(format!("can't serialize start day: {err}")))
}

/// Rebuild an entity from its stored document, re-deriving the [`hermes_core::Revision`]
/// from the `_id`/`ver` fields.
fn entity_from_doc<E: Entity>(mut doc: Document) -> Result<E> {
    let collection = E::kind();

    let uid = match doc.remove(FIELD_ID) {
        Some(Value::String(uid)) => uid,
        _ => {
            return Err(HermesError::Adapter(format!(
                "document in {collection} without a string id"
            )));
        }
    };
    let ver = match doc.remove(FIELD_VER).as_ref().and_then(Value::as_i64) {
        Some(ver) => ver,
        None => {
            return Err(HermesError::Adapter(format!(
                "document {collection}.{uid} without an integer version"
            )));
        }
    };

    doc.insert(
        FIELD_REV.to_string(),
        json!({ "uid": uid.clone(), "ver": ver }),
    );

    serde_json::from_value(Value::Object(doc))
        .map_err(|err| HermesError::Adapter(format!("malformed document {collection}.{uid}: {err}")))
}

/// Snapshot an entity into the conditional update submitted at commit:
/// current fields with the revision stripped, keyed on the observed version.
pub fn doc_update<E: Entity>(entity: &E) -> Result<CondUpdate> {
    let value = serde_json::to_value(entity)
        .map_err(|err| HermesError::Adapter(format!("can't serialize {}: {err}", E::kind())))?;

    let Value::Object(mut fields) = value else {
        return Err(HermesError::Adapter(format!(
            "{} does not serialize to a document",
            E::kind()
        )));
    };
    fields.remove(FIELD_REV);

    Ok(CondUpdate {
        collection: E::kind().to_string(),
        uid: entity.uid().to_string(),
        ver: entity.ver(),
        fields,
    })
}

#[cfg(test)]
mod tests {
    use hermes_core::{Day, Revision};
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, Serialize, Deserialize)]
    struct Quote {
        rev: Revision,
        day: Day,
        #[serde(default)]
        price: f64,
    }

    impl Entity for Quote {
        fn kind() -> &'static str {
            "quote"
        }

        fn revision(&self) -> &Revision {
            &self.rev
        }

        fn revision_mut(&mut self) -> &mut Revision {
            &mut self.rev
        }
    }

    fn stored_doc() -> Document {
        let Value::Object(doc) = json!({
            "_id": "GAZP",
            "ver": 4,
            "day": "2024-03-14",
            "price": 163.5,
        }) else {
            unreachable!()
        };

        doc
    }

    #[test]
    fn test_entity_from_doc_rederives_revision() {
        let quote: Quote = entity_from_doc(stored_doc()).expect("valid document");

        assert_eq!(quote.uid(), "GAZP");
        assert_eq!(quote.ver(), 4);
        assert_eq!(quote.price, 163.5);
    }

    #[test]
    fn test_entity_from_doc_rejects_missing_id() {
        let mut doc = stored_doc();
        doc.remove(FIELD_ID);

        let err = entity_from_doc::<Quote>(doc).expect_err("must fail");
        assert!(matches!(err, HermesError::Adapter(_)));
    }

    #[test]
    fn test_entity_from_doc_rejects_malformed_fields() {
        let mut doc = stored_doc();
        doc.insert("price".to_string(), Value::String("not a number".into()));

        let err = entity_from_doc::<Quote>(doc).expect_err("must fail");
        assert!(matches!(err, HermesError::Adapter(_)));
    }

    #[test]
    fn test_doc_update_strips_revision() {
        let quote: Quote = entity_from_doc(stored_doc()).expect("valid document");
        let update = doc_update(&quote).expect("serializable");

        assert_eq!(update.collection, "quote");
        assert_eq!(update.uid, "GAZP");
        assert_eq!(update.ver, 4);
        assert!(!update.fields.contains_key(FIELD_REV));
        assert!(update.fields.contains_key("price"));
    }
}
