use tracing::{debug, info};
use ulid::Ulid;

use crate::collab::Capability;
use crate::limits::*;
use crate::model::*;

use super::conflict::{detect_conflicts, recyclable_ids};
use super::force::resolve_conflicts;
use super::gender::check_gender;
use super::{expand_dates, now_ms, Engine, EngineError, RoomGuard};

fn check_text(field: &'static str, value: Option<&str>, max: usize) -> Result<(), EngineError> {
    match value {
        Some(v) if v.len() > max => Err(EngineError::invalid(field, format!("longer than {max} bytes"))),
        _ => Ok(()),
    }
}

impl Engine {
    /// Book one room for a date or an inclusive range, all nights or none.
    pub async fn create_booking(
        &self,
        actor: &str,
        req: BookingRequest,
    ) -> Result<BookingReceipt, EngineError> {
        // Shape checks come first: a bad request never touches state.
        let dates = expand_dates(req.date, req.check_in, req.check_out)?;
        if req.status == AllocationStatus::Cancelled {
            return Err(EngineError::invalid("status", "cannot create a cancelled booking"));
        }
        check_text("notes", req.notes.as_deref(), MAX_NOTES_LEN)?;
        check_text("block_reason", req.block_reason.as_deref(), MAX_NOTES_LEN)?;
        check_text("trf_id", req.trf_id.as_deref(), MAX_TRF_ID_LEN)?;

        let blocking = req.status == AllocationStatus::Blocked;
        let force = blocking && req.force_block;
        if blocking {
            self.require(actor, Capability::ManageAccommodation)?;
        }
        if force {
            self.require(actor, Capability::OverrideBookings)?;
        }
        if req.force_block && !blocking {
            debug!("force_block ignored for {} booking", req.status);
        }

        let trf = match req.trf_id.as_deref() {
            Some(id) => self.travel.lookup(id).await,
            None => None,
        };
        if let Some(request) = &trf
            && !request.approval.permits_booking()
        {
            return Err(EngineError::invalid(
                "trf_id",
                format!("travel request {} is {:?}", request.id, request.approval),
            ));
        }
        let occupant = self.resolve_occupant(req.occupant_id, req.trf_id.as_deref(), trf.as_ref())?;

        let _gate = self.gate.read().await;
        let rs = self.get_room(&req.room_id).ok_or_else(|| {
            EngineError::invalid("room_id", format!("unknown room {}", req.room_id))
        })?;
        let mut guard = rs.write_owned().await;
        let house_id = self.resolve_house(&guard.room, req.staff_house_id)?;
        if guard.room.status == RoomStatus::Maintenance && !blocking {
            return Err(EngineError::invalid(
                "room_id",
                format!("room {} is under maintenance", guard.room.name),
            ));
        }
        if guard.allocations.len() + dates.len() > MAX_ALLOCATIONS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many allocations on room"));
        }

        // Blocks are gender-neutral; everything else must keep the room single-gender.
        if !blocking {
            check_gender(&guard, &dates, occupant.gender, None, |id| self.gender_of(id)).inspect_err(
                |_| {
                    metrics::counter!(crate::observability::CONFLICTS_TOTAL, "kind" => "gender")
                        .increment(1);
                },
            )?;
        }

        let reports = detect_conflicts(&guard, &dates, None);
        let now = now_ms();
        let mut ops = resolve_conflicts(&guard, &reports, req.status, force, actor, now)
            .inspect_err(|_| {
                metrics::counter!(crate::observability::CONFLICTS_TOTAL, "kind" => "slot").increment(1);
            })?;
        let cancelled: Vec<Ulid> = ops
            .iter()
            .filter_map(|op| match op {
                AllocationOp::Replace(a) => Some(a.id),
                _ => None,
            })
            .collect();

        let recycled = recyclable_ids(&reports);
        if !recycled.is_empty() {
            debug!("recycling {} cancelled rows in room {}", recycled.len(), req.room_id);
        }
        ops.extend(recycled.into_iter().map(|id| AllocationOp::Delete {
            id,
            room_id: req.room_id,
        }));

        let mut created = Vec::with_capacity(dates.len());
        for &date in &dates {
            let id = Ulid::new();
            created.push((id, date));
            ops.push(AllocationOp::Insert(Allocation {
                id,
                room_id: req.room_id,
                house_id,
                occupant_id: occupant.occupant_id,
                date,
                status: req.status,
                notes: req.notes.clone(),
                block_reason: if blocking { req.block_reason.clone() } else { None },
                trf_id: req.trf_id.clone(),
                created_at: now,
                updated_at: now,
            }));
        }

        self.commit(std::slice::from_mut(&mut guard), actor, ops).await?;
        drop(guard);

        metrics::counter!(crate::observability::ALLOCATIONS_CREATED_TOTAL).increment(created.len() as u64);
        if !cancelled.is_empty() {
            metrics::counter!(crate::observability::OVERRIDES_TOTAL).increment(cancelled.len() as u64);
        }
        info!(
            "{actor} booked room {} for {} night(s) from {} as {}",
            req.room_id,
            created.len(),
            dates[0],
            req.status
        );

        if let Some(trf_id) = &req.trf_id {
            let last = dates[dates.len() - 1];
            self.travel
                .append_log(
                    trf_id,
                    format!(
                        "Accommodation {} by {actor}: room {} from {} to {last}",
                        req.status, req.room_id, dates[0]
                    ),
                )
                .await;
        }

        Ok(BookingReceipt { created, cancelled })
    }

    /// Edit one allocation. The new slot is re-checked with the row itself excluded.
    pub async fn update_booking(
        &self,
        actor: &str,
        id: Ulid,
        update: BookingUpdate,
    ) -> Result<Allocation, EngineError> {
        check_text("notes", update.notes.as_ref().and_then(|n| n.as_deref()), MAX_NOTES_LEN)?;
        let _gate = self.gate.read().await;

        // A concurrent move may relocate the row while we wait for the locks.
        let (source_room, target_room, mut guards) = loop {
            let source_room = self
                .get_room_for_allocation(&id)
                .ok_or(EngineError::NotFound(id))?;
            let target_room = update.room_id.unwrap_or(source_room);
            let guards = self.lock_rooms(source_room, target_room).await?;
            if self.get_room_for_allocation(&id) == Some(source_room) {
                break (source_room, target_room, guards);
            }
        };

        let source_idx = guards.iter().position(|g| g.id() == source_room).unwrap_or(0);
        let existing = guards[source_idx]
            .get(id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;

        let status = update.status.unwrap_or(existing.status);
        if !existing.status.can_transition_to(status) {
            return Err(EngineError::InvalidTransition {
                from: existing.status,
                to: status,
            });
        }
        if existing.status == AllocationStatus::Cancelled
            && (update.room_id.is_some() || update.date.is_some() || update.occupant_id.is_some())
        {
            return Err(EngineError::invalid("status", "cancelled bookings cannot be moved"));
        }

        let occupant_id = match update.occupant_id {
            Some(o) if !self.occupants.contains_key(&o) => return Err(EngineError::NotFound(o)),
            Some(o) => Some(o),
            None => existing.occupant_id,
        };

        let target_idx = guards.iter().position(|g| g.id() == target_room).unwrap_or(0);
        let house_id = self.resolve_house(&guards[target_idx].room, None)?;
        if target_room != source_room
            && guards[target_idx].room.status == RoomStatus::Maintenance
            && status != AllocationStatus::Blocked
        {
            return Err(EngineError::invalid(
                "room_id",
                format!("room {} is under maintenance", guards[target_idx].room.name),
            ));
        }
        let mut row = existing.clone();
        row.room_id = target_room;
        row.house_id = house_id;
        row.date = update.date.unwrap_or(existing.date);
        row.occupant_id = occupant_id;
        row.status = status;
        row.updated_at = now_ms();
        if let Some(n) = &update.notes {
            row.notes = n.clone();
        }
        if status == AllocationStatus::Cancelled && existing.status != AllocationStatus::Cancelled {
            row.append_note(&format!("Cancelled by {actor}"));
        }

        let moved = row.room_id != existing.room_id || row.date != existing.date;
        let mut ops = Vec::new();
        if row.status.is_active() {
            let target = &guards[target_idx];
            let dates = [row.date];
            if row.status != AllocationStatus::Blocked {
                let gender = row.occupant_id.and_then(|o| self.gender_of(o));
                check_gender(target, &dates, gender, Some(id), |o| self.gender_of(o))?;
            }
            let reports = detect_conflicts(target, &dates, Some(id));
            resolve_conflicts(target, &reports, row.status, false, actor, row.updated_at)?;
            if moved {
                ops.extend(recyclable_ids(&reports).into_iter().map(|rid| AllocationOp::Delete {
                    id: rid,
                    room_id: target_room,
                }));
            }
        }

        if target_room == source_room {
            ops.push(AllocationOp::Replace(row.clone()));
        } else {
            ops.push(AllocationOp::Delete { id, room_id: source_room });
            ops.push(AllocationOp::Insert(row.clone()));
        }

        self.commit(&mut guards, actor, ops).await?;
        info!("{actor} updated allocation {id}: {} on {} in room {}", row.status, row.date, row.room_id);
        Ok(row)
    }

    pub async fn cancel_booking(&self, actor: &str, id: Ulid) -> Result<Allocation, EngineError> {
        self.set_status(actor, id, AllocationStatus::Cancelled).await
    }

    pub async fn check_in(&self, actor: &str, id: Ulid) -> Result<Allocation, EngineError> {
        self.set_status(actor, id, AllocationStatus::CheckedIn).await
    }

    pub async fn check_out(&self, actor: &str, id: Ulid) -> Result<Allocation, EngineError> {
        self.set_status(actor, id, AllocationStatus::CheckedOut).await
    }

    async fn set_status(
        &self,
        actor: &str,
        id: Ulid,
        status: AllocationStatus,
    ) -> Result<Allocation, EngineError> {
        let update = BookingUpdate {
            status: Some(status),
            ..BookingUpdate::default()
        };
        self.update_booking(actor, id, update).await
    }

    /// Remove an allocation row outright. Unknown ids are `NotFound`.
    pub async fn delete_booking(&self, actor: &str, id: Ulid) -> Result<Allocation, EngineError> {
        self.require(actor, Capability::ManageAccommodation)?;
        self.delete_where(actor, id, |_| Ok(())).await
    }

    /// Lift a block. Only Blocked rows may be removed this way.
    pub async fn unblock(&self, actor: &str, id: Ulid) -> Result<Allocation, EngineError> {
        self.require(actor, Capability::ManageAccommodation)?;
        self.delete_where(actor, id, |a| {
            if a.status == AllocationStatus::Blocked {
                Ok(())
            } else {
                Err(EngineError::invalid(
                    "id",
                    format!("allocation {} is {}, not Blocked", a.id, a.status),
                ))
            }
        })
        .await
    }

    async fn delete_where<F>(&self, actor: &str, id: Ulid, check: F) -> Result<Allocation, EngineError>
    where
        F: FnOnce(&Allocation) -> Result<(), EngineError>,
    {
        let _gate = self.gate.read().await;
        let mut guard = self.resolve_allocation_write(&id).await?;
        let existing = guard.get(id).cloned().ok_or(EngineError::NotFound(id))?;
        check(&existing)?;
        let ops = vec![AllocationOp::Delete {
            id,
            room_id: existing.room_id,
        }];
        self.commit(std::slice::from_mut(&mut guard), actor, ops).await?;
        info!("{actor} deleted {} allocation {id} on {}", existing.status, existing.date);
        Ok(existing)
    }

    /// Write-lock one or two rooms, always in id order.
    async fn lock_rooms(&self, a: Ulid, b: Ulid) -> Result<Vec<RoomGuard>, EngineError> {
        let mut ids = vec![a, b];
        ids.sort();
        ids.dedup();
        let mut guards = Vec::with_capacity(ids.len());
        for rid in ids {
            let rs = self.get_room(&rid).ok_or_else(|| {
                EngineError::invalid("room_id", format!("unknown room {rid}"))
            })?;
            guards.push(rs.write_owned().await);
        }
        Ok(guards)
    }
}
