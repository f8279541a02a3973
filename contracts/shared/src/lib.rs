//! Shared data types used across the incentive contracts.
//! This keeps the ledger, the controller and the gate agreeing on one layout.
#![no_std]
use soroban_sdk::{contractclient, contracttype, Address, Env, Vec};

#[cfg(any(test, feature = "testutils"))]
pub mod testutils;

// ============================================================================
// Core Business Types
// ============================================================================

/// Operating state checked at every mutating entry point.
#[contracttype]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContractState {
    Active,
    Paused,
}

/// One row of the admin-configured lock table.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LockType {
    pub duration: u64,
    pub multiplier: i128,
}

/// Principal committed until `unlock_time` for a reward-weight multiplier.
///
/// `lock_time` is when the latest amount merged into the entry was locked.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LockEntry {
    pub amount: i128,
    pub multiplier: i128,
    pub lock_time: u64,
    pub unlock_time: u64,
}

/// Vesting reward that pays an early-exit penalty until `unlock_time`.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EarningEntry {
    pub amount: i128,
    pub unlock_time: u64,
}

/// Aggregate view of a user's locks.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LockedBalances {
    pub total: i128,
    pub unlockable: i128,
    pub locked: i128,
    pub locked_with_multiplier: i128,
    pub entries: Vec<LockEntry>,
}

/// Aggregate view of a user's vesting earnings.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EarnedBalances {
    pub total: i128,
    pub unlocked: i128,
    pub entries: Vec<EarningEntry>,
}

// ============================================================================
// Cross-Contract Interfaces
// ============================================================================

/// USD prices for stake and reward assets.
#[contractclient(name = "PriceOracleClient")]
pub trait PriceOracleInterface {
    fn asset_price_usd(env: Env, asset: Address) -> i128;
    fn lp_token_price_usd(env: Env) -> i128;
}

/// Per-user position values reported by the lending market.
#[contractclient(name = "LendingMarketClient")]
pub trait LendingMarketInterface {
    fn collateral_value_usd(env: Env, user: Address) -> i128;
    fn debt_value_usd(env: Env, user: Address) -> i128;
}

/// The parts of the lock/vest ledger its collaborators call.
#[contractclient(name = "LedgerClient")]
pub trait LedgerInterface {
    fn vest(env: Env, minter: Address, user: Address, amount: i128, with_penalty: bool);
    fn locked_balance(env: Env, user: Address) -> i128;
    fn lock_entries(env: Env, user: Address) -> Vec<LockEntry>;
}

/// Eligibility verdicts consumed by the emission controller.
#[contractclient(name = "EligibilityClient")]
pub trait EligibilityInterface {
    fn is_eligible_for_rewards(env: Env, user: Address) -> bool;
    fn eligible_duration(env: Env, user: Address, from: u64, to: u64) -> u64;
}

// ============================================================================
// Utility Functions for Fixed-Point Math and Validation
// ============================================================================

/// `amount * numerator / denominator`, rounding down. Zero denominator yields zero.
pub fn mul_div(amount: i128, numerator: i128, denominator: i128) -> i128 {
    if denominator == 0 {
        return 0;
    }
    amount * numerator / denominator
}

/// `amount * numerator / denominator`, rounding up for positive operands.
pub fn mul_div_ceil(amount: i128, numerator: i128, denominator: i128) -> i128 {
    if denominator == 0 {
        return 0;
    }
    let product = amount * numerator;
    let quotient = product / denominator;
    if product % denominator != 0 {
        quotient + 1
    } else {
        quotient
    }
}

/// Validate that an amount is positive
pub fn validate_positive_amount(amount: i128) -> bool {
    amount > 0
}

/// Validate that a ratio is within [0, WHOLE]
pub fn validate_ratio(ratio: i128) -> bool {
    (0..=WHOLE).contains(&ratio)
}

/// Aggregation bucket a timestamp falls into.
pub fn aggregation_bucket(timestamp: u64) -> u64 {
    timestamp / AGGREGATION_EPOCH
}

// ============================================================================
// Constants
// ============================================================================

/// Fixed-point representation of 100% for every ratio, penalty and percentage
pub const WHOLE: i128 = 100_000;

/// Minimum early-exit penalty (25%)
pub const QUART: i128 = 25_000;

/// Decaying share of the early-exit penalty (65%)
pub const HALF: i128 = 65_000;

/// Oracle price precision (8 decimals)
pub const PRICE_SCALE: i128 = 100_000_000;

/// Precision factor for per-share and per-weight accumulators
pub const ACC_PRECISION: i128 = 1_000_000_000_000;

/// Seconds in a day
pub const SECONDS_PER_DAY: u64 = 86400;

/// Width of the window in which same-type lock or earning entries merge
pub const AGGREGATION_EPOCH: u64 = 6 * SECONDS_PER_DAY;

/// Storage layout version written at initialization
pub const STATE_VERSION: u32 = 1;
