use tracing::{debug, warn};
use ulid::Ulid;

use crate::collab::TravelRequest;
use crate::model::Gender;

use super::{Engine, EngineError};

/// Who the booking is for, as far as the directory can tell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolvedOccupant {
    pub occupant_id: Option<Ulid>,
    /// `None` disables the segregation check for this request.
    pub gender: Option<Gender>,
}

impl Engine {
    /// Resolve the occupant from an explicit id, else from the travel request's requestor.
    ///
    /// An explicit id must exist. A requestor that cannot be resolved is not an
    /// error: the booking proceeds without an occupant and the miss is logged.
    pub(super) fn resolve_occupant(
        &self,
        explicit: Option<Ulid>,
        trf_id: Option<&str>,
        trf: Option<&TravelRequest>,
    ) -> Result<ResolvedOccupant, EngineError> {
        if let Some(id) = explicit {
            let occupant = self.occupants.get(&id).ok_or(EngineError::NotFound(id))?;
            if occupant.gender.is_none() {
                debug!("occupant {id} has no recorded gender; segregation check skipped");
            }
            return Ok(ResolvedOccupant {
                occupant_id: Some(id),
                gender: occupant.gender,
            });
        }

        let Some(trf_id) = trf_id else {
            return Ok(ResolvedOccupant::default());
        };
        let Some(request) = trf else {
            warn!("travel request {trf_id} not found; booking without occupant");
            return Ok(ResolvedOccupant::default());
        };
        let Some(requestor) = request.requestor else {
            warn!("travel request {trf_id} has no requestor; booking without occupant");
            return Ok(ResolvedOccupant::default());
        };
        match self.occupants.get(&requestor) {
            Some(occupant) => {
                if occupant.gender.is_none() {
                    debug!("requestor {requestor} of {trf_id} has no recorded gender; segregation check skipped");
                }
                Ok(ResolvedOccupant {
                    occupant_id: Some(requestor),
                    gender: occupant.gender,
                })
            }
            None => {
                warn!("requestor {requestor} of {trf_id} is not in the directory; booking without occupant");
                Ok(ResolvedOccupant::default())
            }
        }
    }

    pub(super) fn gender_of(&self, occupant_id: Ulid) -> Option<Gender> {
        self.occupants.get(&occupant_id).and_then(|o| o.gender)
    }
}
