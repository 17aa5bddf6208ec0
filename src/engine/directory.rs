use tracing::info;
use ulid::Ulid;

use crate::collab::Capability;
use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

fn check_name(field: &'static str, name: &str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::invalid(field, "must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

impl Engine {
    pub async fn register_house(&self, actor: &str, house: StaffHouse) -> Result<(), EngineError> {
        self.require(actor, Capability::ManageAccommodation)?;
        check_name("name", &house.name)?;
        let _gate = self.gate.read().await;
        let _registry = self.registry.lock().await;
        if self.houses.contains_key(&house.id) {
            return Err(EngineError::AlreadyExists(house.id));
        }
        self.wal_append(&Event::HouseRegistered(house.clone())).await?;
        info!("registered staff house {} ({}, {})", house.id, house.name, house.location);
        self.houses.insert(house.id, house);
        Ok(())
    }

    pub async fn register_room(&self, actor: &str, room: Room) -> Result<(), EngineError> {
        self.require(actor, Capability::ManageAccommodation)?;
        check_name("name", &room.name)?;
        if room.capacity == 0 {
            return Err(EngineError::invalid("capacity", "must be positive"));
        }
        let _gate = self.gate.read().await;
        let _registry = self.registry.lock().await;
        if self.rooms.len() >= MAX_ROOMS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        if self.rooms.contains_key(&room.id) {
            return Err(EngineError::AlreadyExists(room.id));
        }
        if !self.houses.contains_key(&room.house_id) {
            return Err(EngineError::NotFound(room.house_id));
        }
        self.wal_append(&Event::RoomRegistered(room.clone())).await?;
        info!("registered room {} ({}) in house {}", room.id, room.name, room.house_id);
        self.install_room(room);
        Ok(())
    }

    pub async fn register_occupant(&self, actor: &str, occupant: Occupant) -> Result<(), EngineError> {
        self.require(actor, Capability::ManageAccommodation)?;
        check_name("name", &occupant.name)?;
        let _gate = self.gate.read().await;
        let _registry = self.registry.lock().await;
        if self.occupants.contains_key(&occupant.id) {
            return Err(EngineError::AlreadyExists(occupant.id));
        }
        self.wal_append(&Event::OccupantRegistered(occupant.clone())).await?;
        self.occupants.insert(occupant.id, occupant);
        Ok(())
    }

    pub async fn set_room_status(
        &self,
        actor: &str,
        room_id: Ulid,
        status: RoomStatus,
    ) -> Result<(), EngineError> {
        self.require(actor, Capability::ManageAccommodation)?;
        let _gate = self.gate.read().await;
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let mut guard = rs.write().await;
        let event = Event::RoomStatusChanged { id: room_id, status };
        self.wal_append(&event).await?;
        guard.room.status = status;
        self.notify.send(room_id, &event);
        Ok(())
    }

    pub fn house(&self, id: &Ulid) -> Option<StaffHouse> {
        self.houses.get(id).map(|e| e.value().clone())
    }

    pub fn occupant(&self, id: &Ulid) -> Option<Occupant> {
        self.occupants.get(id).map(|e| e.value().clone())
    }

    pub async fn room(&self, id: &Ulid) -> Option<Room> {
        let rs = self.get_room(id)?;
        let guard = rs.read().await;
        Some(guard.room.clone())
    }

    pub fn rooms_in_house(&self, house_id: &Ulid) -> Vec<Ulid> {
        self.house_rooms
            .get(house_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    pub fn room_ids(&self) -> Vec<Ulid> {
        self.rooms.iter().map(|e| *e.key()).collect()
    }

    /// The house a booking lands in: the room's own, which an explicit id must match.
    pub(super) fn resolve_house(&self, room: &Room, requested: Option<Ulid>) -> Result<Ulid, EngineError> {
        if !self.houses.contains_key(&room.house_id) {
            return Err(EngineError::invalid(
                "staff_house_id",
                format!("room {} does not belong to a known staff house", room.id),
            ));
        }
        match requested {
            Some(h) if h != room.house_id => Err(EngineError::invalid(
                "staff_house_id",
                format!("room {} belongs to house {}, not {h}", room.id, room.house_id),
            )),
            _ => Ok(room.house_id),
        }
    }
}
