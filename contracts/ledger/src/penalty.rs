use incentives_shared::{mul_div, mul_div_ceil, HALF, QUART, WHOLE};

/// Gross/net/penalty split of a (partial) early exit from one earning entry.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ExitQuote {
    pub gross: i128,
    pub net: i128,
    pub penalty: i128,
}

/// Early-exit penalty factor in `WHOLE` units.
///
/// `QUART + HALF * remaining / vest_duration` while the entry is still vesting,
/// which keeps the factor in (25%, 90%]. Zero once `unlock_time <= now`.
pub fn penalty_factor(unlock_time: u64, now: u64, vest_duration: u64) -> i128 {
    if unlock_time <= now || vest_duration == 0 {
        return 0;
    }
    let remaining = (unlock_time - now).min(vest_duration);
    QUART + mul_div(HALF, remaining as i128, vest_duration as i128)
}

/// Exit the whole `amount` at `factor`.
pub fn quote_full(amount: i128, factor: i128) -> ExitQuote {
    let penalty = mul_div(amount, factor, WHOLE);
    ExitQuote {
        gross: amount,
        net: amount - penalty,
        penalty,
    }
}

/// Solve the gross amount whose net after `factor` equals `net`.
///
/// Callers only use this for a net strictly below the entry's full net,
/// which bounds the rounded-up gross by the entry amount.
pub fn quote_for_net(net: i128, factor: i128) -> ExitQuote {
    let gross = mul_div_ceil(net, WHOLE, WHOLE - factor);
    ExitQuote {
        gross,
        net,
        penalty: gross - net,
    }
}

/// Share of a penalty routed to the burn reserve.
pub fn burn_share(penalty: i128, burn_ratio: i128) -> i128 {
    mul_div(penalty, burn_ratio, WHOLE)
}
