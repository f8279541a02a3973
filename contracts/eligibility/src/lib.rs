#![no_std]
use incentives_shared::{
    mul_div, validate_ratio, LedgerClient, LendingMarketClient, PriceOracleClient, PRICE_SCALE,
    STATE_VERSION, WHOLE,
};
use soroban_sdk::{contract, contracterror, contractimpl, contracttype, log, vec, Address, Env, Vec};

// Data Types
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GateConfig {
    pub admin: Address,
    pub ledger: Address,
    pub oracle: Address,
    pub market: Address,
    pub required_ratio: i128, // Locked value required per unit of collateral, WHOLE = 100%
}

/// Everything the verdict is computed from, read in one call.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EligibilitySnapshot {
    pub collateral_usd: i128,
    pub debt_usd: i128,
    pub required_usd: i128,
    pub locked_usd: i128,
    pub eligible: bool,
}

// Storage Keys
#[contracttype]
pub enum DataKey {
    Config,
    Version,
}

// Error Types
#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum EligibilityError {
    NotInitialized = 1,
    AlreadyInitialized = 2,
    Unauthorized = 3,
    InvalidRatio = 4,
}

#[contract]
pub struct EligibilityGate;

#[contractimpl]
impl EligibilityGate {
    /// Initialize the gate
    pub fn initialize(
        env: Env,
        admin: Address,
        ledger: Address,
        oracle: Address,
        market: Address,
        required_ratio: i128,
    ) -> Result<(), EligibilityError> {
        if env.storage().instance().has(&DataKey::Config) {
            return Err(EligibilityError::AlreadyInitialized);
        }
        if !validate_ratio(required_ratio) {
            return Err(EligibilityError::InvalidRatio);
        }

        admin.require_auth();

        let config = GateConfig {
            admin: admin.clone(),
            ledger,
            oracle,
            market,
            required_ratio,
        };
        env.storage().instance().set(&DataKey::Config, &config);
        env.storage().instance().set(&DataKey::Version, &STATE_VERSION);

        log!(&env, "Eligibility gate initialized, required ratio: {}", required_ratio);

        Ok(())
    }

    pub fn set_required_ratio(
        env: Env,
        admin: Address,
        required_ratio: i128,
    ) -> Result<(), EligibilityError> {
        let mut config = Self::require_admin(&env, &admin)?;
        if !validate_ratio(required_ratio) {
            return Err(EligibilityError::InvalidRatio);
        }

        config.required_ratio = required_ratio;
        env.storage().instance().set(&DataKey::Config, &config);

        log!(&env, "Required ratio set to: {}", required_ratio);

        Ok(())
    }

    /// Repoint the gate at a new ledger, oracle and market
    pub fn set_sources(
        env: Env,
        admin: Address,
        ledger: Address,
        oracle: Address,
        market: Address,
    ) -> Result<(), EligibilityError> {
        let mut config = Self::require_admin(&env, &admin)?;

        config.ledger = ledger;
        config.oracle = oracle;
        config.market = market;
        env.storage().instance().set(&DataKey::Config, &config);

        Ok(())
    }

    /// USD value of locked LP the user needs to stay eligible
    pub fn required_usd_value(env: Env, user: Address) -> Result<i128, EligibilityError> {
        let config = Self::load_config(&env)?;
        let collateral = LendingMarketClient::new(&env, &config.market).collateral_value_usd(&user);
        Ok(mul_div(collateral, config.required_ratio, WHOLE))
    }

    /// USD value of the user's unexpired locks
    pub fn locked_usd_value(env: Env, user: Address) -> Result<i128, EligibilityError> {
        let config = Self::load_config(&env)?;
        let locked = LedgerClient::new(&env, &config.ledger).locked_balance(&user);
        Ok(mul_div(locked, Self::lp_price(&env, &config), PRICE_SCALE))
    }

    pub fn is_eligible_for_rewards(env: Env, user: Address) -> Result<bool, EligibilityError> {
        let required = Self::required_usd_value(env.clone(), user.clone())?;
        if required == 0 {
            return Ok(true);
        }
        Ok(Self::locked_usd_value(env, user)? >= required)
    }

    /// Unlock time at which the user stops covering the requirement.
    ///
    /// Locks are summed newest-first; the entry that first brings the sum up to
    /// the requirement is the one whose expiry breaks eligibility. Returns 0 when
    /// the locks never cover it and `u64::MAX` when nothing is required.
    pub fn last_eligible_time(env: Env, user: Address) -> Result<u64, EligibilityError> {
        let config = Self::load_config(&env)?;
        let required = Self::required_usd_value(env.clone(), user.clone())?;
        if required == 0 {
            return Ok(u64::MAX);
        }

        let price = Self::lp_price(&env, &config);
        let now = env.ledger().timestamp();
        let entries = LedgerClient::new(&env, &config.ledger).lock_entries(&user);

        let mut covered = 0i128;
        for entry in entries.iter().rev() {
            if entry.unlock_time <= now {
                break;
            }
            covered += mul_div(entry.amount, price, PRICE_SCALE);
            if covered >= required {
                return Ok(entry.unlock_time);
            }
        }
        Ok(0)
    }

    /// Seconds within `[from, to)` during which the user's locks covered the
    /// current requirement.
    ///
    /// An entry counts from its `lock_time` until its `unlock_time`. Entries
    /// already withdrawn from the ledger no longer count, so the result never
    /// overstates coverage.
    pub fn eligible_duration(
        env: Env,
        user: Address,
        from: u64,
        to: u64,
    ) -> Result<u64, EligibilityError> {
        let config = Self::load_config(&env)?;
        if to <= from {
            return Ok(0);
        }
        let required = Self::required_usd_value(env.clone(), user.clone())?;
        if required == 0 {
            return Ok(to - from);
        }

        let price = Self::lp_price(&env, &config);
        let entries = LedgerClient::new(&env, &config.ledger).lock_entries(&user);

        // Coverage only changes where an entry starts or ends.
        let mut points = vec![&env, from];
        for entry in entries.iter() {
            insert_point(&mut points, entry.lock_time, from, to);
            insert_point(&mut points, entry.unlock_time, from, to);
        }
        points.push_back(to);

        let mut covered = 0u64;
        for i in 1..points.len() {
            let (Some(start), Some(end)) = (points.get(i - 1), points.get(i)) else {
                break;
            };
            let value: i128 = entries
                .iter()
                .filter(|e| e.lock_time <= start && start < e.unlock_time)
                .map(|e| mul_div(e.amount, price, PRICE_SCALE))
                .sum();
            if value >= required {
                covered += end - start;
            }
        }
        Ok(covered)
    }

    pub fn eligibility_snapshot(
        env: Env,
        user: Address,
    ) -> Result<EligibilitySnapshot, EligibilityError> {
        let config = Self::load_config(&env)?;
        let market = LendingMarketClient::new(&env, &config.market);
        let collateral_usd = market.collateral_value_usd(&user);
        let debt_usd = market.debt_value_usd(&user);
        let required_usd = mul_div(collateral_usd, config.required_ratio, WHOLE);
        let locked_usd = Self::locked_usd_value(env.clone(), user)?;

        Ok(EligibilitySnapshot {
            collateral_usd,
            debt_usd,
            required_usd,
            locked_usd,
            eligible: required_usd == 0 || locked_usd >= required_usd,
        })
    }

    /// Get contract configuration
    pub fn get_config(env: Env) -> Result<GateConfig, EligibilityError> {
        Self::load_config(&env)
    }

    pub fn version(env: Env) -> u32 {
        env.storage().instance().get(&DataKey::Version).unwrap_or(0)
    }

    // Internal helper functions
    fn load_config(env: &Env) -> Result<GateConfig, EligibilityError> {
        env.storage()
            .instance()
            .get(&DataKey::Config)
            .ok_or(EligibilityError::NotInitialized)
    }

    fn require_admin(env: &Env, admin: &Address) -> Result<GateConfig, EligibilityError> {
        admin.require_auth();
        let config = Self::load_config(env)?;
        if config.admin != *admin {
            return Err(EligibilityError::Unauthorized);
        }
        Ok(config)
    }

    fn lp_price(env: &Env, config: &GateConfig) -> i128 {
        PriceOracleClient::new(env, &config.oracle).lp_token_price_usd()
    }
}

/// Keep `points` sorted and unique, ignoring times outside `(from, to)`.
fn insert_point(points: &mut Vec<u64>, time: u64, from: u64, to: u64) {
    if time <= from || time >= to {
        return;
    }
    let mut index = points.len();
    for (i, point) in points.iter().enumerate() {
        if point == time {
            return;
        }
        if point > time {
            index = i as u32;
            break;
        }
    }
    points.insert(index, time);
}
