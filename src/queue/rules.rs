use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::state::ClinicQueue;
use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or_default()
}

pub(crate) fn validate_complaint(complaint: &str) -> Result<(), EngineError> {
    if complaint.len() > MAX_COMPLAINT_LEN {
        return Err(EngineError::LimitExceeded("chief complaint too long"));
    }
    Ok(())
}

pub(crate) fn require_status<'a>(
    queue: &'a ClinicQueue,
    id: &Ulid,
    required: QueueStatus,
) -> Result<&'a QueueEntry, EngineError> {
    let entry = queue.get(id).ok_or(EngineError::NotFound(*id))?;
    if entry.status != required {
        return Err(EngineError::InvalidState {
            id: *id,
            required,
            actual: entry.status,
        });
    }
    Ok(entry)
}

/// Reserve `vet_id` for `entry_id`. A vet holds at most one in-progress entry
/// across all clinics; the reservation lives until that visit is dismissed.
pub(crate) fn claim_vet(
    active_vets: &DashMap<Ulid, Ulid>,
    vet_id: Ulid,
    entry_id: Ulid,
) -> Result<(), EngineError> {
    match active_vets.entry(vet_id) {
        Entry::Occupied(held) if *held.get() != entry_id => Err(EngineError::Conflict {
            vet_id,
            active_entry: *held.get(),
        }),
        Entry::Occupied(_) => Ok(()),
        Entry::Vacant(slot) => {
            slot.insert(entry_id);
            Ok(())
        }
    }
}

pub(crate) fn release_vet(active_vets: &DashMap<Ulid, Ulid>, vet_id: &Ulid, entry_id: &Ulid) {
    active_vets.remove_if(vet_id, |_, held| held == entry_id);
}

/// Validate a manual move. `Ok(false)` means the entry is already at that end
/// of the queue and the move is a no-op.
pub(crate) fn check_move(
    queue: &ClinicQueue,
    id: &Ulid,
    direction: Direction,
) -> Result<bool, EngineError> {
    let entry = require_status(queue, id, QueueStatus::Waiting)?;
    let order = queue.waiting();
    let Some(i) = order.iter().position(|e| e.id == *id) else {
        return Err(EngineError::Corrupted(format!("waiting entry {id} missing from order")));
    };
    let neighbour = match direction {
        Direction::Up if i > 0 => order[i - 1],
        Direction::Down if i + 1 < order.len() => order[i + 1],
        _ => return Ok(false),
    };
    if neighbour.is_urgent != entry.is_urgent {
        return Err(EngineError::OrderingViolation(*id));
    }
    Ok(true)
}
