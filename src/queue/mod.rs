mod mutations;
mod queries;
mod rules;
mod state;

pub use state::{canonical_cmp, ClinicQueue, Staged};

pub(crate) use rules::now_ms;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use tracing::{info, warn};
use ulid::Ulid;

use crate::error::EngineError;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::{Wal, WalHandle};

use rules::{claim_vet, release_vet};

pub type SharedClinicQueue = Arc<RwLock<ClinicQueue>>;

/// Waiting-room queues for every clinic, durable through one WAL.
///
/// Mutations on a clinic are serialized by that clinic's write lock; reads
/// take the read lock and always see a fully applied state.
pub struct QueueEngine {
    pub(super) clinics: DashMap<Ulid, SharedClinicQueue>,
    pub(super) wal: WalHandle,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: entry id → clinic id
    pub(super) entry_to_clinic: Arc<DashMap<Ulid, Ulid>>,
    /// vet id → the in-progress entry they are seeing, in any clinic
    pub(super) active_vets: Arc<DashMap<Ulid, Ulid>>,
    /// Shared by `add` while it creates and locks a clinic, exclusive during
    /// compaction, so a clinic born mid-compaction cannot miss the snapshot.
    pub(super) clinic_gate: RwLock<()>,
}

impl QueueEngine {
    /// Replay the WAL at `wal_path` and start its writer task. Needs a Tokio runtime.
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let (wal, events) = Wal::open(&wal_path)?;

        let engine = Self {
            clinics: DashMap::new(),
            wal: WalHandle::spawn(wal),
            notify,
            entry_to_clinic: Arc::new(DashMap::new()),
            active_vets: Arc::new(DashMap::new()),
            clinic_gate: RwLock::new(()),
        };

        // Sole owner of these Arcs during replay, so try_write never contends.
        // blocking_write would panic inside an async context.
        for event in &events {
            let clinic = engine.clinic_or_insert(event.clinic_id());
            let Ok(mut guard) = clinic.try_write() else {
                return Err(io::Error::other("replay: clinic queue locked"));
            };
            guard.apply(event);
            engine.entry_to_clinic.insert(event.entry_id(), event.clinic_id());
        }

        for clinic in engine.clinics.iter() {
            let Ok(guard) = clinic.value().try_read() else {
                return Err(io::Error::other("replay: clinic queue locked"));
            };
            guard
                .verify()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
            for entry in guard.in_progress() {
                let Some(vet_id) = entry.called_by else { continue };
                if let Err(e) = claim_vet(&engine.active_vets, vet_id, entry.id) {
                    warn!(entry = %entry.id, "replayed visit overlaps another one: {e}");
                }
            }
        }

        info!(
            events = events.len(),
            clinics = engine.clinics.len(),
            "queue WAL replayed from {}",
            wal_path.display()
        );
        Ok(engine)
    }

    pub(super) fn clinic(&self, clinic_id: &Ulid) -> Option<SharedClinicQueue> {
        self.clinics.get(clinic_id).map(|e| e.value().clone())
    }

    pub(super) fn clinic_or_insert(&self, clinic_id: Ulid) -> SharedClinicQueue {
        self.clinics
            .entry(clinic_id)
            .or_insert_with(|| Arc::new(RwLock::new(ClinicQueue::new(clinic_id))))
            .value()
            .clone()
    }

    pub fn clinic_for_entry(&self, entry_id: &Ulid) -> Option<Ulid> {
        self.entry_to_clinic.get(entry_id).map(|e| *e.value())
    }

    /// Stage `event` on a scratch copy, then hand the WAL append and the swap
    /// to a spawned task that owns the clinic's write lock. Once staged, the
    /// mutation completes or fails as a unit whether or not the caller is
    /// still waiting, so memory and the log never disagree.
    pub(super) async fn commit(
        &self,
        mut guard: OwnedRwLockWriteGuard<ClinicQueue>,
        event: QueueEvent,
    ) -> Result<QueueEntry, EngineError> {
        let claim = match &event {
            QueueEvent::Called { id, vet_id, .. } => {
                claim_vet(&self.active_vets, *vet_id, *id)?;
                Some((*vet_id, *id))
            }
            _ => None,
        };
        let staged = match guard.stage(&event) {
            Ok(staged) => staged,
            Err(e) => {
                if let Some((vet_id, id)) = claim {
                    release_vet(&self.active_vets, &vet_id, &id);
                }
                return Err(e);
            }
        };

        let wal = self.wal.clone();
        let notify = self.notify.clone();
        let entry_to_clinic = self.entry_to_clinic.clone();
        let active_vets = self.active_vets.clone();

        let task = tokio::spawn(async move {
            if let Err(e) = wal.append(&event).await {
                if let Some((vet_id, id)) = claim {
                    release_vet(&active_vets, &vet_id, &id);
                }
                return Err(e);
            }

            let entry = staged.entry.clone();
            guard.install(staged);
            entry_to_clinic.insert(entry.id, guard.clinic_id);
            if let QueueEvent::Dismissed { .. } = event
                && let Some(vet_id) = entry.called_by
            {
                release_vet(&active_vets, &vet_id, &entry.id);
            }
            let clinic = guard.clinic_id.to_string();
            metrics::gauge!(crate::observability::QUEUE_WAITING, "clinic" => clinic)
                .set(guard.waiting().len() as f64);
            notify.send(guard.clinic_id, &event);
            Ok(entry)
        });

        task.await
            .map_err(|e| EngineError::WalError(format!("commit task failed: {e}")))?
    }

    /// Lookup entry → clinic, acquire that clinic's write lock.
    pub(super) async fn resolve_entry_write(
        &self,
        entry_id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<ClinicQueue>, EngineError> {
        let clinic_id = self
            .clinic_for_entry(entry_id)
            .ok_or(EngineError::NotFound(*entry_id))?;
        let queue = self.clinic(&clinic_id).ok_or(EngineError::NotFound(clinic_id))?;
        Ok(queue.write_owned().await)
    }
}
