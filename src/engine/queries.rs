use chrono::{Datelike, NaiveDate};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{expand_dates, Engine, EngineError};

/// First and last day of the requested month. Missing or out-of-range parts
/// fall back to `today`'s.
pub(crate) fn month_window(year: Option<i32>, month: Option<u32>, today: Day) -> (Day, Day) {
    let year = year
        .filter(|y| (MIN_QUERY_YEAR..=MAX_QUERY_YEAR).contains(y))
        .unwrap_or_else(|| today.year());
    let month = month
        .filter(|m| (1..=12).contains(m))
        .unwrap_or_else(|| today.month());
    let first = NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(today);
    let last = first
        .checked_add_months(chrono::Months::new(1))
        .and_then(|next| next.pred_opt())
        .unwrap_or(first);
    (first, last)
}

fn today() -> Day {
    chrono::Utc::now().date_naive()
}

impl Engine {
    pub async fn get_booking(&self, id: Ulid) -> Option<Allocation> {
        let room_id = self.get_room_for_allocation(&id)?;
        let rs = self.get_room(&room_id)?;
        let guard = rs.read().await;
        guard.get(id).cloned()
    }

    /// Every allocation in the month matching the filters, enriched with
    /// room/house/occupant display data and sorted by date.
    ///
    /// Filters naming rooms or houses that don't exist yield an empty list.
    pub async fn list_bookings(&self, filter: &BookingFilter) -> Vec<AllocationView> {
        let (first, last) = month_window(filter.year, filter.month, today());

        let room_ids = match (filter.room_id, filter.staff_house_id) {
            (Some(room), _) => vec![room],
            (None, Some(house)) => self.rooms_in_house(&house),
            (None, None) => self.room_ids(),
        };

        let mut views = Vec::new();
        for room_id in room_ids {
            let Some(rs) = self.get_room(&room_id) else { continue };
            let guard = rs.read().await;
            if filter.staff_house_id.is_some_and(|h| h != guard.room.house_id) {
                continue;
            }
            for a in guard.between(first, last) {
                if filter.occupant_id.is_some() && a.occupant_id != filter.occupant_id {
                    continue;
                }
                views.push(self.view(&guard.room, a));
            }
        }

        views.sort_by(|a, b| {
            a.date
                .cmp(&b.date)
                .then_with(|| a.room_name.cmp(&b.room_name))
                .then_with(|| a.id.cmp(&b.id))
        });
        views
    }

    fn view(&self, room: &Room, a: &Allocation) -> AllocationView {
        let house = self.houses.get(&a.house_id);
        let occupant = a.occupant_id.and_then(|id| self.occupants.get(&id));
        AllocationView {
            id: a.id,
            date: a.date,
            status: a.status,
            room_id: room.id,
            room_name: room.name.clone(),
            room_type: room.room_type,
            house_id: a.house_id,
            house_name: house.as_ref().map(|h| h.name.clone()),
            location: house.as_ref().map(|h| h.location),
            occupant_id: a.occupant_id,
            occupant_name: occupant.as_ref().map(|o| o.name.clone()),
            occupant_gender: occupant.as_ref().and_then(|o| o.gender),
            notes: a.notes.clone(),
            block_reason: a.block_reason.clone(),
            trf_id: a.trf_id.clone(),
        }
    }

    /// Rooms of a house that are open for business and unbooked on every night
    /// of the range. An unknown house has no rooms.
    pub async fn available_rooms(
        &self,
        house_id: Ulid,
        check_in: Day,
        check_out: Day,
    ) -> Result<Vec<Room>, EngineError> {
        let dates = expand_dates(None, Some(check_in), Some(check_out))?;
        let mut free = Vec::new();
        for room_id in self.rooms_in_house(&house_id) {
            let Some(rs) = self.get_room(&room_id) else { continue };
            let guard = rs.read().await;
            if guard.room.status != RoomStatus::Available {
                continue;
            }
            if dates.iter().all(|d| !guard.active.contains_key(d)) {
                free.push(guard.room.clone());
            }
        }
        free.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(free)
    }
}
