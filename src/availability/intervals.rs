use crate::model::*;

// ── Interval algebra ──────────────────────────────────────────────

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// `base` minus `to_remove`. Both inputs sorted by start; `to_remove` may overlap itself.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}

/// Split a workday into `(free, busy)` runs.
///
/// Busy runs are the booked spans clamped to the workday and merged;
/// free runs are their complement. Together they cover `workday` exactly.
pub fn partition(workday: &Span, booked: &[Span]) -> (Vec<Span>, Vec<Span>) {
    let mut clamped: Vec<Span> = booked.iter().filter_map(|s| s.clamp_to(workday)).collect();
    clamped.sort_by_key(|s| s.start);
    let busy = merge_overlapping(&clamped);
    let free = subtract_intervals(std::slice::from_ref(workday), &busy);
    (free, busy)
}

/// Carve fixed-length slots out of free runs. Slot starts sit on the grid
/// `anchor + k * slot_ms`; a slot is emitted only if it fits inside its run.
pub fn split_into_slots(free: &[Span], slot_ms: Ms, anchor: Ms) -> Vec<Span> {
    debug_assert!(slot_ms > 0);
    let mut out = Vec::new();
    for run in free {
        let offset = (run.start - anchor).rem_euclid(slot_ms);
        let mut start = if offset == 0 { run.start } else { run.start + (slot_ms - offset) };
        while start + slot_ms <= run.end {
            out.push(Span::new(start, start + slot_ms));
            start += slot_ms;
        }
    }
    out
}

/// A candidate is bookable iff it lies entirely inside one free run.
pub fn is_available(free: &[Span], candidate: &Span) -> bool {
    let idx = free.partition_point(|run| run.end <= candidate.start);
    free.get(idx).is_some_and(|run| run.contains_span(candidate))
}
