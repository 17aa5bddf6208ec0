use ulid::Ulid;

use crate::model::*;

use super::EngineError;

/// Reject the booking if any target date already houses an active occupant of
/// the other gender. Blocked rows carry no occupant and never trip this.
///
/// `gender_of` resolves an occupant id to its recorded gender. With no known
/// gender for the newcomer there is nothing to compare, and the check passes.
pub fn check_gender<F>(
    rs: &RoomState,
    dates: &[Day],
    gender: Option<Gender>,
    exclude: Option<Ulid>,
    gender_of: F,
) -> Result<(), EngineError>
where
    F: Fn(Ulid) -> Option<Gender>,
{
    let Some(gender) = gender else {
        return Ok(());
    };
    for &date in dates {
        let clash = rs
            .on_date(date)
            .filter(|a| a.status.is_active() && Some(a.id) != exclude)
            .filter_map(|a| a.occupant_id)
            .filter_map(&gender_of)
            .find(|existing| *existing != gender);
        if let Some(existing) = clash {
            return Err(EngineError::GenderConflict { date, existing });
        }
    }
    Ok(())
}
