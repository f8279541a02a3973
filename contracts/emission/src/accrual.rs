use incentives_shared::{mul_div, ACC_PRECISION};
use soroban_sdk::{contracttype, Address};

/// Per-pool emission accounting. `acc_reward_per_share` is scaled by `ACC_PRECISION`.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PoolInfo {
    pub total_staked: i128,
    pub acc_reward_per_share: i128,
    pub last_accrual_time: u64,
    pub alloc_points: i128,
}

/// A user's position in one pool.
///
/// `balance` is the last balance the pool reported. `amount` is what is
/// registered for rewards: the balance while eligible, zero otherwise.
/// `last_checkpoint` is when the stake was last settled.
#[contracttype]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct UserStake {
    pub balance: i128,
    pub amount: i128,
    pub reward_debt: i128,
    pub last_checkpoint: u64,
}

/// Pool and stake after a checkpoint, held in memory until committed.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PoolCheckpoint {
    pub asset: Address,
    pub pool: PoolInfo,
    pub stake: UserStake,
}

/// Emission parameters in force for one accrual pass.
pub struct Accrual {
    pub now: u64,
    pub rate: i128,
    pub total_alloc: i128,
    pub started: bool,
}

impl Accrual {
    /// Bring `pool` current. Nothing accrues before start or for an empty pool.
    pub fn accrue(&self, pool: &mut PoolInfo) {
        if !self.started || self.now <= pool.last_accrual_time {
            return;
        }
        if pool.total_staked > 0 && self.total_alloc > 0 {
            let elapsed = (self.now - pool.last_accrual_time) as i128;
            let reward = mul_div(elapsed * self.rate, pool.alloc_points, self.total_alloc);
            pool.acc_reward_per_share += mul_div(reward, ACC_PRECISION, pool.total_staked);
        }
        pool.last_accrual_time = self.now;
    }
}

pub fn pending_reward(acc_reward_per_share: i128, stake: &UserStake) -> i128 {
    mul_div(stake.amount, acc_reward_per_share, ACC_PRECISION) - stake.reward_debt
}

/// Part of `pending` earned over `covered` of the `elapsed` seconds it accrued in.
pub fn eligible_share(pending: i128, covered: u64, elapsed: u64) -> i128 {
    if covered >= elapsed {
        return pending;
    }
    mul_div(pending, covered as i128, elapsed as i128)
}

/// Take the stake's pending reward and re-register it at its current balance,
/// or at zero when the user is not eligible. Returns the pending amount.
pub fn settle_stake(pool: &mut PoolInfo, stake: &mut UserStake, eligible: bool, now: u64) -> i128 {
    let pending = pending_reward(pool.acc_reward_per_share, stake);
    let registered = if eligible { stake.balance } else { 0 };

    pool.total_staked = pool.total_staked - stake.amount + registered;
    stake.amount = registered;
    stake.reward_debt = mul_div(registered, pool.acc_reward_per_share, ACC_PRECISION);
    stake.last_checkpoint = now;

    pending
}
