use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use hermes_core::{Entity, HermesError, Result, Uid};
use hermes_ports::CondUpdate;
use hermes_store::{Repo, doc_update};
use tokio::sync::{Mutex, RwLock};

/// Commit-time view of an identity-map slot; reads the typed cell without
/// knowing the entity type.
#[async_trait]
trait Snapshot: Send + Sync {
    async fn snapshot(&self) -> Result<CondUpdate>;
}

struct Cell<E: Entity>(Arc<RwLock<E>>);

#[async_trait]
impl<E: Entity> Snapshot for Cell<E> {
    async fn snapshot(&self) -> Result<CondUpdate> {
        let entity = self.0.read().await;

        doc_update(&*entity)
    }
}

struct Slot {
    kind: &'static str,
    uid: Uid,
    // Arc<RwLock<E>> behind type erasure
    cell: Arc<dyn Any + Send + Sync>,
    snapshot: Arc<dyn Snapshot>,
    for_update: bool,
}

/// Per-scope cache of loaded entities, in insertion order.
///
/// One in-memory instance per `(kind, uid)` within the scope; the for-update
/// flag is promoted on read-for-update access and never demoted.
#[derive(Default)]
struct IdentityMap {
    slots: Vec<Slot>,
}

impl IdentityMap {
    fn position(&self, kind: &str, uid: &str) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.kind == kind && slot.uid == uid)
    }

    /// Cached handle for `(E, uid)`, promoting the for-update flag when
    /// requested. A cached uid of this kind holding an incompatible type is
    /// a handler defect.
    fn get<E: Entity>(&mut self, uid: &str, for_update: bool) -> Result<Option<Arc<RwLock<E>>>> {
        let Some(pos) = self.position(E::kind(), uid) else {
            return Ok(None);
        };

        let slot = &mut self.slots[pos];
        let cell = slot.cell.clone().downcast::<RwLock<E>>().map_err(|_| {
            HermesError::Consistency(format!(
                "type mismatch in identity map for {}.{uid}",
                E::kind()
            ))
        })?;
        slot.for_update = slot.for_update || for_update;

        Ok(Some(cell))
    }

    /// Register a freshly loaded entity. Loading the same `(kind, uid)`
    /// through two different paths is a handler defect.
    fn insert<E: Entity>(
        &mut self,
        uid: Uid,
        entity: E,
        for_update: bool,
    ) -> Result<Arc<RwLock<E>>> {
        if self.position(E::kind(), &uid).is_some() {
            return Err(HermesError::Consistency(format!(
                "{}.{uid} already in identity map",
                E::kind()
            )));
        }

        let cell = Arc::new(RwLock::new(entity));
        self.slots.push(Slot {
            kind: E::kind(),
            uid,
            cell: cell.clone(),
            snapshot: Arc::new(Cell(cell.clone())),
            for_update,
        });

        Ok(cell)
    }

    fn remove(&mut self, kind: &'static str, uid: &str) -> Result<()> {
        match self.position(kind, uid) {
            Some(pos) => {
                self.slots.remove(pos);

                Ok(())
            }
            None => Err(HermesError::Consistency(format!(
                "no {kind}.{uid} in identity map"
            ))),
        }
    }

    /// The commit set: slots flagged for update, in insertion order
    fn commit_set(&self) -> Vec<Arc<dyn Snapshot>> {
        self.slots
            .iter()
            .filter(|slot| slot.for_update)
            .map(|slot| slot.snapshot.clone())
            .collect()
    }
}

/// One transactional scope: an identity-mapped, read-your-writes view of
/// entities over a shared repository.
///
/// The scope is open until [`UnitOfWork::commit`] consumes it; a scope
/// dropped without committing discards every pending mutation. Retrying a
/// failed scope is the bus's responsibility, one layer up, with a fresh
/// scope.
pub struct UnitOfWork {
    repo: Repo,
    map: Mutex<IdentityMap>,
}

impl UnitOfWork {
    pub fn new(repo: Repo) -> Self {
        Self {
            repo,
            map: Mutex::new(IdentityMap::default()),
        }
    }

    /// Read access to `(E, uid)`.
    ///
    /// `uid` defaults to `E::kind()` for singleton entities keyed by type.
    pub async fn get<E: Entity>(&self, uid: Option<&str>) -> Result<Arc<RwLock<E>>> {
        self.load(uid, false).await
    }

    /// Read access that marks the entity for the commit batch
    pub async fn get_for_update<E: Entity>(&self, uid: Option<&str>) -> Result<Arc<RwLock<E>>> {
        self.load(uid, true).await
    }

    async fn load<E: Entity>(&self, uid: Option<&str>, for_update: bool) -> Result<Arc<RwLock<E>>> {
        let uid = uid.unwrap_or_else(|| E::kind());

        let mut map = self.map.lock().await;
        if let Some(cell) = map.get::<E>(uid, for_update)? {
            return Ok(cell);
        }

        let entity = self.repo.get::<E>(uid).await?;

        map.insert(uid.to_string(), entity, for_update)
    }

    /// Remove the entity from the scope and the store immediately.
    ///
    /// Deletions are not part of the optimistic commit batch: a delete
    /// already performed is not rolled back if the scope later fails.
    pub async fn delete<E: Entity>(&self, entity: &E) -> Result<()> {
        let mut map = self.map.lock().await;
        map.remove(E::kind(), entity.uid())?;

        self.repo.delete::<E>(entity.uid()).await
    }

    /// Uncached collection size
    pub async fn count<E: Entity>(&self) -> Result<usize> {
        self.repo.count::<E>().await
    }

    /// Uncached random sample of up to `n` entities
    pub async fn sample<E: Entity>(&self, n: usize) -> Result<Vec<E>> {
        self.repo.sample::<E>(n).await
    }

    /// Uncached read of the whole collection
    pub async fn all<E: Entity>(&self) -> Result<Vec<E>> {
        self.repo.all::<E>().await
    }

    pub async fn delete_all<E: Entity>(&self) -> Result<()> {
        self.repo.delete_all::<E>().await
    }

    /// Close the scope, saving every entity flagged for update as one
    /// optimistic batch. A single failed version check fails the whole
    /// commit.
    pub async fn commit(self) -> Result<()> {
        let Self { repo, map } = self;
        let map = map.into_inner();

        let mut batch = Vec::new();
        for snapshot in map.commit_set() {
            batch.push(snapshot.snapshot().await?);
        }

        repo.save(batch).await
    }
}
