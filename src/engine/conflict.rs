use ulid::Ulid;

use crate::model::*;

/// How a (room, date) slot looks to a new booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotState {
    Free,
    /// Only cancelled rows remain; they are deleted when the slot is rebooked.
    Recyclable(Vec<Ulid>),
    /// An active row (Confirmed, Checked-in, Checked-out or Blocked) holds the slot.
    Conflict {
        existing: Ulid,
        status: AllocationStatus,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotReport {
    pub date: Day,
    pub state: SlotState,
}

impl SlotReport {
    pub fn is_conflict(&self) -> bool {
        matches!(self.state, SlotState::Conflict { .. })
    }
}

/// Classify every target date. Pure: nothing is changed.
///
/// `exclude` skips one allocation (the row being updated).
pub fn detect_conflicts(rs: &RoomState, dates: &[Day], exclude: Option<Ulid>) -> Vec<SlotReport> {
    dates
        .iter()
        .map(|&date| {
            let mut cancelled = Vec::new();
            let mut active = None;
            for a in rs.on_date(date) {
                if Some(a.id) == exclude {
                    continue;
                }
                if a.status.is_active() {
                    active = Some((a.id, a.status));
                } else {
                    cancelled.push(a.id);
                }
            }
            let state = match active {
                Some((existing, status)) => SlotState::Conflict { existing, status },
                None if cancelled.is_empty() => SlotState::Free,
                None => SlotState::Recyclable(cancelled),
            };
            SlotReport { date, state }
        })
        .collect()
}

/// Cancelled rows to physically delete, across every report.
pub(super) fn recyclable_ids(reports: &[SlotReport]) -> Vec<Ulid> {
    reports
        .iter()
        .filter_map(|r| match &r.state {
            SlotState::Recyclable(ids) => Some(ids.iter().copied()),
            _ => None,
        })
        .flatten()
        .collect()
}
