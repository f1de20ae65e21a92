use std::cmp::Ordering;
use std::collections::HashMap;

use ulid::Ulid;

use crate::error::EngineError;
use crate::model::*;

/// Canonical order for waiting entries: urgent first, then by position.
pub fn canonical_cmp(a: &QueueEntry, b: &QueueEntry) -> Ordering {
    b.is_urgent
        .cmp(&a.is_urgent)
        .then(a.position.cmp(&b.position))
        .then(a.arrived_at.cmp(&b.arrived_at))
}

/// Live part of a clinic queue: waiting and in-progress entries only.
///
/// Bounded by the per-clinic active limit, so cloning it as a scratch copy is
/// cheap no matter how long the clinic's history gets.
#[derive(Debug, Clone)]
pub struct WaitingRoom {
    clinic_id: Ulid,
    entries: Vec<QueueEntry>,
}

impl WaitingRoom {
    fn new(clinic_id: Ulid) -> Self {
        Self {
            clinic_id,
            entries: Vec::new(),
        }
    }

    pub fn get(&self, id: &Ulid) -> Option<&QueueEntry> {
        self.entries.iter().find(|e| e.id == *id)
    }

    fn get_mut(&mut self, id: &Ulid) -> Option<&mut QueueEntry> {
        self.entries.iter_mut().find(|e| e.id == *id)
    }

    /// Waiting entries in canonical order. Recomputed from stored state on every call.
    pub fn waiting(&self) -> Vec<&QueueEntry> {
        let mut waiting: Vec<&QueueEntry> = self
            .entries
            .iter()
            .filter(|e| e.status == QueueStatus::Waiting)
            .collect();
        waiting.sort_by(|a, b| canonical_cmp(a, b));
        waiting
    }

    /// In-progress entries, earliest call first.
    pub fn in_progress(&self) -> Vec<&QueueEntry> {
        let mut active: Vec<&QueueEntry> = self
            .entries
            .iter()
            .filter(|e| e.status == QueueStatus::InProgress)
            .collect();
        active.sort_by_key(|e| (e.called_at, e.id));
        active
    }

    /// Rewrite positions of waiting entries as 0..n in canonical order.
    fn densify(&mut self) {
        let order: Vec<Ulid> = self.waiting().iter().map(|e| e.id).collect();
        for (pos, id) in order.iter().enumerate() {
            if let Some(entry) = self.get_mut(id) {
                entry.position = pos as u32;
            }
        }
    }

    fn upsert(&mut self, entry: QueueEntry) {
        match self.get_mut(&entry.id) {
            Some(slot) => *slot = entry,
            None => self.entries.push(entry),
        }
    }

    /// Take `id` out of the room with its final status.
    fn retire(&mut self, id: &Ulid, status: QueueStatus, at: Ms) -> Option<QueueEntry> {
        let i = self.entries.iter().position(|e| e.id == *id)?;
        let mut entry = self.entries.remove(i);
        entry.status = status;
        entry.finished_at = Some(at);
        self.densify();
        Some(entry)
    }

    /// Apply a validated event. Deterministic, so WAL replay rebuilds the same
    /// positions. Returns the entry the event finished, if any. Events naming
    /// unknown entries are ignored.
    pub fn apply(&mut self, event: &QueueEvent) -> Option<QueueEntry> {
        match event {
            QueueEvent::Added {
                id,
                clinic_id,
                patient_id,
                chief_complaint,
                is_urgent,
                arrived_at,
            } => {
                // Urgent: after the last urgent, ahead of every non-urgent.
                let waiting = self.waiting();
                let position = if *is_urgent {
                    waiting.iter().filter(|e| e.is_urgent).count()
                } else {
                    waiting.len()
                } as u32;
                for entry in self.entries.iter_mut() {
                    if entry.status == QueueStatus::Waiting && entry.position >= position {
                        entry.position += 1;
                    }
                }
                self.upsert(QueueEntry {
                    id: *id,
                    patient_id: *patient_id,
                    clinic_id: *clinic_id,
                    chief_complaint: chief_complaint.clone(),
                    is_urgent: *is_urgent,
                    status: QueueStatus::Waiting,
                    position,
                    arrived_at: *arrived_at,
                    called_by: None,
                    called_at: None,
                    finished_at: None,
                });
                self.densify();
                None
            }
            QueueEvent::Moved { id, direction, .. } => {
                let order: Vec<Ulid> = self.waiting().iter().map(|e| e.id).collect();
                let i = order.iter().position(|e| e == id)?;
                let j = match direction {
                    Direction::Up if i > 0 => i - 1,
                    Direction::Down if i + 1 < order.len() => i + 1,
                    _ => return None,
                };
                let pa = self.get(&order[i])?.position;
                let pb = self.get(&order[j])?.position;
                if let Some(a) = self.get_mut(&order[i]) {
                    a.position = pb;
                }
                if let Some(b) = self.get_mut(&order[j]) {
                    b.position = pa;
                }
                self.densify();
                None
            }
            QueueEvent::Called { id, vet_id, at, .. } => {
                if let Some(entry) = self.get_mut(id) {
                    entry.status = QueueStatus::InProgress;
                    entry.called_by = Some(*vet_id);
                    entry.called_at = Some(*at);
                }
                self.densify();
                None
            }
            QueueEvent::Dismissed { id, at, .. } => self.retire(id, QueueStatus::Done, *at),
            QueueEvent::Removed { id, at, .. } => self.retire(id, QueueStatus::Removed, *at),
            QueueEvent::Restored { entry } if entry.status.is_terminal() => {
                self.entries.retain(|e| e.id != entry.id);
                Some(entry.clone())
            }
            QueueEvent::Restored { entry } => {
                self.upsert(entry.clone());
                None
            }
        }
    }

    /// Check the queue invariants. A failure is a bug in a transition, never
    /// something to repair here.
    pub fn verify(&self) -> Result<(), EngineError> {
        let waiting = self.waiting();
        for (expected, entry) in waiting.iter().enumerate() {
            if entry.position != expected as u32 {
                return Err(EngineError::Corrupted(format!(
                    "clinic {}: entry {} has position {} but ranks {expected}",
                    self.clinic_id, entry.id, entry.position
                )));
            }
        }
        if let Some(pair) = waiting.windows(2).find(|w| !w[0].is_urgent && w[1].is_urgent) {
            return Err(EngineError::Corrupted(format!(
                "clinic {}: non-urgent {} ahead of urgent {}",
                self.clinic_id, pair[0].id, pair[1].id
            )));
        }
        let mut vets: HashMap<Ulid, Ulid> = HashMap::new();
        for entry in self.in_progress() {
            let Some(vet) = entry.called_by else {
                return Err(EngineError::Corrupted(format!(
                    "entry {} in progress without a vet",
                    entry.id
                )));
            };
            if let Some(other) = vets.insert(vet, entry.id) {
                return Err(EngineError::Corrupted(format!(
                    "vet {vet} has two active visits: {other}, {}",
                    entry.id
                )));
            }
        }
        Ok(())
    }
}

/// A transition checked against a scratch copy of the room, ready to install.
pub struct Staged {
    room: WaitingRoom,
    finished: Option<QueueEntry>,
    /// The entry as it looks after the transition.
    pub entry: QueueEntry,
}

/// One clinic's queue: the live room plus finished entries kept for audit.
#[derive(Debug)]
pub struct ClinicQueue {
    pub clinic_id: Ulid,
    room: WaitingRoom,
    /// Done and removed entries, oldest first.
    history: Vec<QueueEntry>,
    history_index: HashMap<Ulid, usize>,
}

impl ClinicQueue {
    pub fn new(clinic_id: Ulid) -> Self {
        Self {
            clinic_id,
            room: WaitingRoom::new(clinic_id),
            history: Vec::new(),
            history_index: HashMap::new(),
        }
    }

    pub fn get(&self, id: &Ulid) -> Option<&QueueEntry> {
        self.room
            .get(id)
            .or_else(|| self.history_index.get(id).map(|&i| &self.history[i]))
    }

    pub fn waiting(&self) -> Vec<&QueueEntry> {
        self.room.waiting()
    }

    pub fn in_progress(&self) -> Vec<&QueueEntry> {
        self.room.in_progress()
    }

    /// Waiting (canonical) followed by in-progress entries.
    pub fn active(&self) -> Vec<QueueEntry> {
        self.waiting()
            .into_iter()
            .chain(self.in_progress())
            .cloned()
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.room.entries.len()
    }

    pub fn terminal(&self) -> Vec<QueueEntry> {
        self.history.clone()
    }

    /// Every stored entry, live ones first.
    pub fn entries(&self) -> impl Iterator<Item = &QueueEntry> {
        self.room.entries.iter().chain(self.history.iter())
    }

    fn archive(&mut self, entry: QueueEntry) {
        match self.history_index.get(&entry.id) {
            Some(&i) => self.history[i] = entry,
            None => {
                self.history_index.insert(entry.id, self.history.len());
                self.history.push(entry);
            }
        }
    }

    /// Run `event` against a copy of the live room and check the result.
    /// `self` is not touched.
    pub fn stage(&self, event: &QueueEvent) -> Result<Staged, EngineError> {
        let mut room = self.room.clone();
        let finished = room.apply(event);
        room.verify()?;

        let id = event.entry_id();
        let entry = room
            .get(&id)
            .or(finished.as_ref())
            .cloned()
            .ok_or_else(|| EngineError::Corrupted(format!("entry {id} missing after apply")))?;
        Ok(Staged { room, finished, entry })
    }

    pub fn install(&mut self, staged: Staged) {
        self.room = staged.room;
        if let Some(entry) = staged.finished {
            self.archive(entry);
        }
    }

    /// Apply without checking. Used by replay, which verifies once at the end.
    pub fn apply(&mut self, event: &QueueEvent) {
        if let Some(entry) = self.room.apply(event) {
            self.archive(entry);
        }
    }

    pub fn verify(&self) -> Result<(), EngineError> {
        self.room.verify()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn added(q: &ClinicQueue, urgent: bool, at: Ms) -> QueueEvent {
        QueueEvent::Added {
            id: Ulid::new(),
            clinic_id: q.clinic_id,
            patient_id: Ulid::new(),
            chief_complaint: "limping".into(),
            is_urgent: urgent,
            arrived_at: at,
        }
    }

    fn order(q: &ClinicQueue) -> Vec<Ulid> {
        q.waiting().iter().map(|e| e.id).collect()
    }

    #[test]
    fn add_appends_non_urgent() {
        let mut q = ClinicQueue::new(Ulid::new());
        let events: Vec<QueueEvent> = (0..3).map(|i| added(&q, false, i)).collect();
        for e in &events {
            q.apply(e);
        }
        let ids: Vec<Ulid> = events.iter().map(|e| e.entry_id()).collect();
        assert_eq!(order(&q), ids);
        let positions: Vec<u32> = q.waiting().iter().map(|e| e.position).collect();
        assert_eq!(positions, vec![0, 1, 2]);
        q.verify().unwrap();
    }

    #[test]
    fn urgent_goes_after_last_urgent() {
        let mut q = ClinicQueue::new(Ulid::new());
        let n1 = added(&q, false, 1);
        let u1 = added(&q, true, 2);
        let n2 = added(&q, false, 3);
        let u2 = added(&q, true, 4);
        for e in [&n1, &u1, &n2, &u2] {
            q.apply(e);
        }
        assert_eq!(
            order(&q),
            vec![u1.entry_id(), u2.entry_id(), n1.entry_id(), n2.entry_id()]
        );
        q.verify().unwrap();
    }

    #[test]
    fn call_removes_from_waiting_and_densifies() {
        let mut q = ClinicQueue::new(Ulid::new());
        let a = added(&q, false, 1);
        let b = added(&q, false, 2);
        q.apply(&a);
        q.apply(&b);
        q.apply(&QueueEvent::Called {
            id: a.entry_id(),
            clinic_id: q.clinic_id,
            vet_id: Ulid::new(),
            at: 10,
        });
        assert_eq!(order(&q), vec![b.entry_id()]);
        assert_eq!(q.get(&b.entry_id()).unwrap().position, 0);
        assert_eq!(q.in_progress().len(), 1);
        q.verify().unwrap();
    }

    #[test]
    fn moved_swaps_neighbours() {
        let mut q = ClinicQueue::new(Ulid::new());
        let a = added(&q, false, 1);
        let b = added(&q, false, 2);
        q.apply(&a);
        q.apply(&b);
        q.apply(&QueueEvent::Moved {
            id: b.entry_id(),
            clinic_id: q.clinic_id,
            direction: Direction::Up,
        });
        assert_eq!(order(&q), vec![b.entry_id(), a.entry_id()]);
        q.verify().unwrap();
    }

    #[test]
    fn active_lists_waiting_then_in_progress() {
        let mut q = ClinicQueue::new(Ulid::new());
        let a = added(&q, false, 1);
        let b = added(&q, false, 2);
        let c = added(&q, false, 3);
        for e in [&a, &b, &c] {
            q.apply(e);
        }
        q.apply(&QueueEvent::Called {
            id: a.entry_id(),
            clinic_id: q.clinic_id,
            vet_id: Ulid::new(),
            at: 10,
        });
        q.apply(&QueueEvent::Removed {
            id: c.entry_id(),
            clinic_id: q.clinic_id,
            at: 11,
        });
        let ids: Vec<Ulid> = q.active().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![b.entry_id(), a.entry_id()]);
        assert_eq!(q.terminal().len(), 1);
        assert_eq!(q.active_count(), 2);
    }

    #[test]
    fn verify_detects_gap() {
        let mut q = ClinicQueue::new(Ulid::new());
        let a = added(&q, false, 1);
        q.apply(&a);
        let mut broken = q.get(&a.entry_id()).unwrap().clone();
        broken.position = 3;
        q.apply(&QueueEvent::Restored { entry: broken });
        assert!(matches!(q.verify(), Err(EngineError::Corrupted(_))));
    }

    #[test]
    fn verify_detects_double_visit() {
        let mut q = ClinicQueue::new(Ulid::new());
        let vet = Ulid::new();
        for at in 0..2 {
            let e = added(&q, false, at);
            q.apply(&e);
            let mut entry = q.get(&e.entry_id()).unwrap().clone();
            entry.status = QueueStatus::InProgress;
            entry.called_by = Some(vet);
            entry.called_at = Some(at);
            q.apply(&QueueEvent::Restored { entry });
        }
        assert!(matches!(q.verify(), Err(EngineError::Corrupted(_))));
    }

    #[test]
    fn stage_leaves_queue_untouched_until_installed() {
        let mut q = ClinicQueue::new(Ulid::new());
        let a = added(&q, false, 1);
        q.apply(&a);
        let removed = QueueEvent::Removed {
            id: a.entry_id(),
            clinic_id: q.clinic_id,
            at: 5,
        };

        let staged = q.stage(&removed).unwrap();
        assert_eq!(staged.entry.status, QueueStatus::Removed);
        assert_eq!(q.get(&a.entry_id()).unwrap().status, QueueStatus::Waiting);
        assert!(q.terminal().is_empty());

        q.install(staged);
        assert_eq!(q.active_count(), 0);
        assert_eq!(q.terminal().len(), 1);
        assert_eq!(q.get(&a.entry_id()).unwrap().finished_at, Some(5));
        assert_eq!(q.entries().count(), 1);
    }

    #[test]
    fn restored_terminal_entry_goes_to_history() {
        let mut q = ClinicQueue::new(Ulid::new());
        let a = added(&q, false, 1);
        q.apply(&a);
        let mut done = q.get(&a.entry_id()).unwrap().clone();
        done.status = QueueStatus::Done;
        done.finished_at = Some(9);

        q.apply(&QueueEvent::Restored { entry: done.clone() });
        q.apply(&QueueEvent::Restored { entry: done });
        assert_eq!(q.active_count(), 0);
        assert_eq!(q.terminal().len(), 1);
        q.verify().unwrap();
    }
}
