use incentives_shared::{mul_div, ACC_PRECISION};
use soroban_sdk::contracttype;

/// Emission state of one secondary reward token, spread over locked weight.
///
/// `rate_per_second` is scaled by `ACC_PRECISION`; `accumulated_per_weight`
/// is reward per unit of locked weight, also scaled by `ACC_PRECISION`.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RewardStream {
    pub rate_per_second: i128,
    pub period_finish: u64,
    pub accumulated_per_weight: i128,
    pub last_update: u64,
    pub balance: i128,
    pub queued: i128,
    pub generation: u32,
}

/// A user's checkpoint against one reward stream.
#[contracttype]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct UserRewardState {
    pub generation: u32,
    pub paid_per_weight: i128,
    pub earned: i128,
}

impl RewardStream {
    pub fn fresh(now: u64, generation: u32) -> Self {
        Self {
            rate_per_second: 0,
            period_finish: now,
            accumulated_per_weight: 0,
            last_update: now,
            balance: 0,
            queued: 0,
            generation,
        }
    }

    pub fn last_time_applicable(&self, now: u64) -> u64 {
        now.min(self.period_finish)
    }

    /// Accumulator value at `now` without mutating the stream.
    pub fn current_per_weight(&self, now: u64, total_weight: i128) -> i128 {
        if total_weight == 0 {
            return self.accumulated_per_weight;
        }
        let elapsed = self.last_time_applicable(now).saturating_sub(self.last_update);
        self.accumulated_per_weight + mul_div(elapsed as i128, self.rate_per_second, total_weight)
    }

    /// Bring the accumulator current. Must run before total weight changes.
    pub fn checkpoint(&mut self, now: u64, total_weight: i128) {
        self.accumulated_per_weight = self.current_per_weight(now, total_weight);
        self.last_update = self.last_time_applicable(now);
    }

    /// Start a new `duration`-long period carrying `amount` plus whatever
    /// the running period has not emitted yet.
    pub fn notify(&mut self, amount: i128, now: u64, duration: u64) {
        let leftover = if now >= self.period_finish {
            0
        } else {
            mul_div((self.period_finish - now) as i128, self.rate_per_second, ACC_PRECISION)
        };
        self.rate_per_second = mul_div(amount + leftover, ACC_PRECISION, duration as i128);
        self.last_update = now;
        self.period_finish = now + duration;
    }

    /// Queued rewards are folded in only once the running period has less
    /// than `duration - lookback` left.
    pub fn accepts_notification(&self, now: u64, duration: u64, lookback: u64) -> bool {
        self.period_finish < (now + duration).saturating_sub(lookback)
    }
}

impl UserRewardState {
    /// Credit everything `weight` earned since the last checkpoint.
    pub fn settle(&mut self, stream_per_weight: i128, generation: u32, weight: i128) {
        if self.generation != generation {
            *self = Self {
                generation,
                paid_per_weight: 0,
                earned: 0,
            };
        }
        self.earned += mul_div(
            weight,
            stream_per_weight - self.paid_per_weight,
            ACC_PRECISION,
        );
        self.paid_per_weight = stream_per_weight;
    }
}
