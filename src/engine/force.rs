use tracing::info;
use ulid::Ulid;

use crate::model::*;

use super::conflict::{SlotReport, SlotState};
use super::EngineError;

/// Decide what happens to slots already held by active rows.
///
/// With `force` on a Blocked request every holder is cancelled (with an audit
/// note naming `actor`) and the returned ops carry those cancellations.
/// Otherwise any holder fails the request with every conflicting date listed.
pub(super) fn resolve_conflicts(
    rs: &RoomState,
    reports: &[SlotReport],
    target: AllocationStatus,
    force: bool,
    actor: &str,
    now: Ms,
) -> Result<Vec<AllocationOp>, EngineError> {
    let held: Vec<(Day, Ulid)> = reports
        .iter()
        .filter_map(|r| match r.state {
            SlotState::Conflict { existing, .. } => Some((r.date, existing)),
            _ => None,
        })
        .collect();

    if held.is_empty() {
        return Ok(Vec::new());
    }
    if !(force && target == AllocationStatus::Blocked) {
        return Err(EngineError::Conflict {
            room_id: rs.id(),
            dates: held.into_iter().map(|(d, _)| d).collect(),
        });
    }

    let mut ops = Vec::with_capacity(held.len());
    for (date, id) in held {
        let Some(existing) = rs.get(id) else { continue };
        let mut cancelled = existing.clone();
        cancelled.status = AllocationStatus::Cancelled;
        cancelled.updated_at = now;
        cancelled.append_note(&format!(
            "Cancelled by {actor}: room blocked for {date} (was {})",
            existing.status
        ));
        info!(
            "force block on room {}: cancelling {} allocation {id} for {date}",
            rs.id(),
            existing.status
        );
        ops.push(AllocationOp::Replace(cancelled));
    }
    Ok(ops)
}
