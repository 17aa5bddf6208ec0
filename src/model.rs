use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::MAX_NOTES_LEN;

/// Unix milliseconds, used for audit timestamps only.
pub type Ms = i64;

/// A calendar date without time component. The atomic booking grain.
pub type Day = NaiveDate;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: {:?}", self.kind, self.value)
    }
}

impl std::error::Error for ParseEnumError {}

/// Generates `as_str`, `Display` and case-insensitive `FromStr` from one wire table.
macro_rules! wire_enum {
    ($ty:ident, $kind:literal, { $($variant:ident => $wire:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $wire,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let s = s.trim();
                $(if s.eq_ignore_ascii_case($wire) {
                    return Ok($ty::$variant);
                })+
                Err(ParseEnumError { kind: $kind, value: s.to_string() })
            }
        }
    };
}

// ── Reference data ───────────────────────────────────────────────

/// Physical sites a staff house can sit on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Location {
    HeadOffice,
    FieldCamp,
    PlantSite,
    PortSite,
}

wire_enum!(Location, "location", {
    HeadOffice => "Head Office",
    FieldCamp => "Field Camp",
    PlantSite => "Plant Site",
    PortSite => "Port Site",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomType {
    Single,
    Double,
    Suite,
    Tent,
}

wire_enum!(RoomType, "room type", {
    Single => "Single",
    Double => "Double",
    Suite => "Suite",
    Tent => "Tent",
});

/// Operational state of a room, independent of what is booked in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomStatus {
    Available,
    Maintenance,
    Reserved,
}

wire_enum!(RoomStatus, "room status", {
    Available => "Available",
    Maintenance => "Maintenance",
    Reserved => "Reserved",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
}

wire_enum!(Gender, "gender", {
    Male => "Male",
    Female => "Female",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OccupantKind {
    Staff,
    Guest,
}

wire_enum!(OccupantKind, "occupant kind", {
    Staff => "Staff",
    Guest => "Guest",
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffHouse {
    pub id: Ulid,
    pub name: String,
    pub location: Location,
    pub address: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub house_id: Ulid,
    pub name: String,
    pub room_type: RoomType,
    pub capacity: u32,
    pub status: RoomStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occupant {
    pub id: Ulid,
    pub kind: OccupantKind,
    pub name: String,
    pub staff_number: Option<String>,
    /// `None` means segregation checks are skipped for this person.
    pub gender: Option<Gender>,
}

// ── Allocations ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AllocationStatus {
    Confirmed,
    CheckedIn,
    CheckedOut,
    Cancelled,
    Blocked,
}

wire_enum!(AllocationStatus, "allocation status", {
    Confirmed => "Confirmed",
    CheckedIn => "Checked-in",
    CheckedOut => "Checked-out",
    Cancelled => "Cancelled",
    Blocked => "Blocked",
});

impl AllocationStatus {
    /// Active rows hold their (room, date) slot exclusively.
    pub fn is_active(&self) -> bool {
        !matches!(self, AllocationStatus::Cancelled)
    }

    /// Forward-only stay progression; any active state may be cancelled.
    pub fn can_transition_to(&self, next: AllocationStatus) -> bool {
        use AllocationStatus::*;
        if *self == next {
            return true;
        }
        matches!(
            (self, next),
            (Confirmed, CheckedIn)
                | (CheckedIn, CheckedOut)
                | (Confirmed | CheckedIn | CheckedOut | Blocked, Cancelled)
        )
    }
}

/// One room, one date. A multi-night stay is one row per night.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub id: Ulid,
    pub room_id: Ulid,
    pub house_id: Ulid,
    pub occupant_id: Option<Ulid>,
    pub date: Day,
    pub status: AllocationStatus,
    pub notes: Option<String>,
    pub block_reason: Option<String>,
    pub trf_id: Option<String>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Allocation {
    /// Append a line to the notes, keeping earlier text. When the result
    /// would exceed `MAX_NOTES_LEN` bytes the oldest text is dropped first.
    pub fn append_note(&mut self, line: &str) {
        let mut notes = match self.notes.take() {
            Some(mut n) if !n.is_empty() => {
                n.push('\n');
                n.push_str(line);
                n
            }
            _ => line.to_string(),
        };
        if notes.len() > MAX_NOTES_LEN {
            let mut cut = notes.len() - MAX_NOTES_LEN;
            while !notes.is_char_boundary(cut) {
                cut += 1;
            }
            notes.drain(..cut);
        }
        self.notes = Some(notes);
    }
}

/// One step of a unit of work. A committed batch is a list of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationOp {
    Insert(Allocation),
    /// Overwrite an existing row in place (same room). Used for cancels and edits.
    Replace(Allocation),
    Delete { id: Ulid, room_id: Ulid },
}

impl AllocationOp {
    pub fn room_id(&self) -> Ulid {
        match self {
            AllocationOp::Insert(a) | AllocationOp::Replace(a) => a.room_id,
            AllocationOp::Delete { room_id, .. } => *room_id,
        }
    }
}

/// Bookings and directory for a single room, guarded by one lock.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    /// Every allocation row, sorted by date.
    pub allocations: Vec<Allocation>,
    /// Active-slot index: at most one active allocation per date.
    pub active: BTreeMap<Day, Ulid>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            allocations: Vec::new(),
            active: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> Ulid {
        self.room.id
    }

    /// Insert keeping date order. Caller has already staged against the index.
    pub fn insert_allocation(&mut self, allocation: Allocation) {
        if allocation.status.is_active() {
            self.active.insert(allocation.date, allocation.id);
        }
        let pos = self
            .allocations
            .partition_point(|a| a.date <= allocation.date);
        self.allocations.insert(pos, allocation);
    }

    pub fn remove_allocation(&mut self, id: Ulid) -> Option<Allocation> {
        let pos = self.allocations.iter().position(|a| a.id == id)?;
        let removed = self.allocations.remove(pos);
        if self.active.get(&removed.date) == Some(&id) {
            self.active.remove(&removed.date);
        }
        Some(removed)
    }

    pub fn get(&self, id: Ulid) -> Option<&Allocation> {
        self.allocations.iter().find(|a| a.id == id)
    }

    /// All rows (any status) on `date`.
    pub fn on_date(&self, date: Day) -> impl Iterator<Item = &Allocation> {
        let lo = self.allocations.partition_point(|a| a.date < date);
        let hi = self.allocations.partition_point(|a| a.date <= date);
        self.allocations[lo..hi].iter()
    }

    /// All rows with `from <= date <= to`.
    pub fn between(&self, from: Day, to: Day) -> impl Iterator<Item = &Allocation> {
        let lo = self.allocations.partition_point(|a| a.date < from);
        let hi = self.allocations.partition_point(|a| a.date <= to);
        self.allocations[lo..hi.max(lo)].iter()
    }

    pub fn active_on(&self, date: Day) -> Option<&Allocation> {
        let id = self.active.get(&date)?;
        self.on_date(date).find(|a| a.id == *id)
    }

    /// Dry-run `ops` against the active-slot index. Returns every date that
    /// would end up with two active rows.
    pub fn stage(&self, ops: &[AllocationOp]) -> Result<(), Vec<Day>> {
        let mut slots: BTreeMap<Day, Option<Ulid>> = BTreeMap::new();

        // Release slots held by rows the batch deletes or rewrites.
        for op in ops {
            let id = match op {
                AllocationOp::Replace(a) => a.id,
                AllocationOp::Delete { id, .. } => *id,
                AllocationOp::Insert(_) => continue,
            };
            if let Some(existing) = self.get(id)
                && self.active.get(&existing.date) == Some(&id)
            {
                slots.insert(existing.date, None);
            }
        }

        let mut conflicts = Vec::new();
        for op in ops {
            let row = match op {
                AllocationOp::Insert(a) | AllocationOp::Replace(a) => a,
                AllocationOp::Delete { .. } => continue,
            };
            if !row.status.is_active() {
                continue;
            }
            let holder = *slots
                .entry(row.date)
                .or_insert_with(|| self.active.get(&row.date).copied());
            match holder {
                Some(h) if h != row.id => conflicts.push(row.date),
                _ => {
                    slots.insert(row.date, Some(row.id));
                }
            }
        }

        if conflicts.is_empty() {
            Ok(())
        } else {
            conflicts.sort();
            conflicts.dedup();
            Err(conflicts)
        }
    }

    /// Apply one op. Infallible: `stage` has already vetted the batch.
    pub fn apply(&mut self, op: &AllocationOp) {
        match op {
            AllocationOp::Insert(a) => self.insert_allocation(a.clone()),
            AllocationOp::Replace(a) => {
                self.remove_allocation(a.id);
                self.insert_allocation(a.clone());
            }
            AllocationOp::Delete { id, .. } => {
                self.remove_allocation(*id);
            }
        }
    }
}

/// WAL record format. One `Committed` record is one atomic unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    HouseRegistered(StaffHouse),
    RoomRegistered(Room),
    RoomStatusChanged { id: Ulid, status: RoomStatus },
    OccupantRegistered(Occupant),
    Committed {
        actor: Option<String>,
        ops: Vec<AllocationOp>,
    },
}

// ── Request types ────────────────────────────────────────────────

/// A booking intent: one date, or an inclusive check-in/check-out range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub room_id: Ulid,
    pub staff_house_id: Option<Ulid>,
    pub occupant_id: Option<Ulid>,
    pub date: Option<Day>,
    pub check_in: Option<Day>,
    pub check_out: Option<Day>,
    pub status: AllocationStatus,
    pub notes: Option<String>,
    pub block_reason: Option<String>,
    pub trf_id: Option<String>,
    pub force_block: bool,
}

impl BookingRequest {
    pub fn new(room_id: Ulid) -> Self {
        Self {
            room_id,
            staff_house_id: None,
            occupant_id: None,
            date: None,
            check_in: None,
            check_out: None,
            status: AllocationStatus::Confirmed,
            notes: None,
            block_reason: None,
            trf_id: None,
            force_block: false,
        }
    }
}

/// Fields an update may change. `None` leaves the field as it is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingUpdate {
    pub room_id: Option<Ulid>,
    pub occupant_id: Option<Ulid>,
    pub date: Option<Day>,
    pub status: Option<AllocationStatus>,
    /// `Some(None)` clears the notes.
    pub notes: Option<Option<String>>,
}

impl BookingUpdate {
    pub fn is_empty(&self) -> bool {
        self == &BookingUpdate::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingFilter {
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub staff_house_id: Option<Ulid>,
    pub room_id: Option<Ulid>,
    pub occupant_id: Option<Ulid>,
}

// ── Query result types ───────────────────────────────────────────

/// An allocation joined with its room, house and occupant display data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationView {
    pub id: Ulid,
    pub date: Day,
    pub status: AllocationStatus,
    pub room_id: Ulid,
    pub room_name: String,
    pub room_type: RoomType,
    pub house_id: Ulid,
    pub house_name: Option<String>,
    pub location: Option<Location>,
    pub occupant_id: Option<Ulid>,
    pub occupant_name: Option<String>,
    pub occupant_gender: Option<Gender>,
    pub notes: Option<String>,
    pub block_reason: Option<String>,
    pub trf_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingReceipt {
    pub created: Vec<(Ulid, Day)>,
    /// Rows cancelled by a force block.
    pub cancelled: Vec<Ulid>,
}

impl BookingReceipt {
    pub fn dates_booked(&self) -> usize {
        self.created.len()
    }

    pub fn created_ids(&self) -> Vec<Ulid> {
        self.created.iter().map(|(id, _)| *id).collect()
    }
}
