use crate::limits::MAX_STAY_DAYS;
use crate::model::Day;

use super::EngineError;

/// Expand a booking intent into the ordered, inclusive list of nights to book.
///
/// A complete `check_in`/`check_out` pair wins over `date`. Anything else
/// without a `date` is rejected before any state is touched.
pub fn expand_dates(
    date: Option<Day>,
    check_in: Option<Day>,
    check_out: Option<Day>,
) -> Result<Vec<Day>, EngineError> {
    let (from, to) = match (check_in, check_out, date) {
        (Some(from), Some(to), _) => (from, to),
        (_, _, Some(d)) => (d, d),
        (Some(_), None, None) | (None, Some(_), None) => {
            return Err(EngineError::invalid(
                "check_in",
                "check_in and check_out must be supplied together",
            ));
        }
        (None, None, None) => {
            return Err(EngineError::invalid(
                "date",
                "either date or check_in/check_out is required",
            ));
        }
    };

    if to < from {
        return Err(EngineError::invalid(
            "check_out",
            format!("check_out {to} is before check_in {from}"),
        ));
    }
    if (to - from).num_days() + 1 > MAX_STAY_DAYS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }

    Ok(from.iter_days().take_while(|d| *d <= to).collect())
}
