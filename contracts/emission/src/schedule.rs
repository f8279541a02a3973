use soroban_sdk::{contracttype, Vec};

use crate::EmissionError;

/// Rate that takes over `start_offset` seconds after start.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EmissionPoint {
    pub start_offset: u64,
    pub rate: i128,
}

/// Append `offsets`/`rates` to the installed schedule.
///
/// Offsets must strictly increase, also relative to the last installed point.
pub fn extend(
    installed: &Vec<EmissionPoint>,
    offsets: &Vec<u128>,
    rates: &Vec<u128>,
) -> Result<Vec<EmissionPoint>, EmissionError> {
    if offsets.len() != rates.len() {
        return Err(EmissionError::ArrayLengthMismatch);
    }
    if offsets.is_empty() {
        return Err(EmissionError::InvalidSchedule);
    }

    let mut schedule = installed.clone();
    let mut last = installed.last().map(|p| p.start_offset);
    for (offset, rate) in offsets.iter().zip(rates.iter()) {
        let start_offset = u64::try_from(offset).map_err(|_| EmissionError::ExceedsMaxInt)?;
        let rate = i128::try_from(rate).map_err(|_| EmissionError::ExceedsMaxInt)?;
        if last.is_some_and(|l| start_offset <= l) {
            return Err(EmissionError::DuplicateSchedule);
        }
        schedule.push_back(EmissionPoint { start_offset, rate });
        last = Some(start_offset);
    }
    Ok(schedule)
}

/// Index past every point reached `elapsed` seconds after start, with the rate
/// of the last point crossed. `None` when no new point was reached.
pub fn crossed(schedule: &Vec<EmissionPoint>, index: u32, elapsed: u64) -> (u32, Option<i128>) {
    let mut next = index;
    let mut rate = None;
    while let Some(point) = schedule.get(next) {
        if point.start_offset > elapsed {
            break;
        }
        rate = Some(point.rate);
        next += 1;
    }
    (next, rate)
}
