#![no_std]
use incentives_shared::{
    validate_positive_amount, ContractState, EligibilityClient, LedgerClient, STATE_VERSION,
};
use soroban_sdk::{
    contract, contracterror, contractimpl, contracttype, log, symbol_short, token, vec, Address,
    Env, Vec,
};

mod accrual;
mod schedule;

use accrual::{eligible_share, pending_reward, settle_stake, Accrual, PoolCheckpoint};
pub use accrual::{PoolInfo, UserStake};
pub use schedule::EmissionPoint;

// Data Types
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EmissionConfig {
    pub admin: Address,
    pub ledger: Address,
    pub eligibility_gate: Address,
    pub reward_token: Address,
}

/// Whether schedule crossings may replace the live rate.
#[contracttype]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RateMode {
    Scheduled,
    Manual,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EmissionState {
    pub rate: i128,           // Reward tokens per second across all pools
    pub mode: RateMode,
    pub schedule_index: u32,  // Next schedule point not yet crossed
    pub exhausted: bool,      // Reserve ran dry; `rate` is parked in `resume_rate`
    pub resume_rate: i128,
}

// Storage Keys
#[contracttype]
pub enum DataKey {
    Config,
    State,
    Version,
    Emission,
    Schedule,
    StartTime,
    Reserve,
    Pools,
    TotalAllocPoints,
    Pool(Address),
    UserStake(Address, Address),
    BaseClaimable(Address),
    Eligible(Address),
    Delegate(Address),
}

// Error Types
#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum EmissionError {
    NotInitialized = 1,
    AlreadyInitialized = 2,
    Unauthorized = 3,
    ContractPaused = 4,
    InvalidAmount = 5,
    PoolAlreadyRegistered = 6,
    UnknownPool = 7,
    ArrayLengthMismatch = 8,
    InvalidSchedule = 9,
    DuplicateSchedule = 10,
    ExceedsMaxInt = 11,
    NotStarted = 12,
    AlreadyStarted = 13,
    OutOfRewards = 14,
}

// Events
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClaimEvent {
    pub user: Address,
    pub caller: Address,
    pub amount: i128,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StakeChangedEvent {
    pub asset: Address,
    pub user: Address,
    pub balance: i128,
    pub total_supply: i128,
    pub eligible: bool,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RateChangedEvent {
    pub rate: i128,
    pub mode: RateMode,
    pub schedule_index: u32,
}

#[contract]
pub struct EmissionController;

#[contractimpl]
impl EmissionController {
    /// Initialize the controller with its collaborators and the pre-schedule rate
    pub fn initialize(
        env: Env,
        admin: Address,
        ledger: Address,
        eligibility_gate: Address,
        reward_token: Address,
        initial_rate: i128,
    ) -> Result<(), EmissionError> {
        if env.storage().instance().has(&DataKey::Config) {
            return Err(EmissionError::AlreadyInitialized);
        }
        if initial_rate < 0 {
            return Err(EmissionError::InvalidAmount);
        }

        admin.require_auth();

        let config = EmissionConfig {
            admin: admin.clone(),
            ledger,
            eligibility_gate,
            reward_token,
        };
        let state = EmissionState {
            rate: initial_rate,
            mode: RateMode::Scheduled,
            schedule_index: 0,
            exhausted: false,
            resume_rate: 0,
        };

        env.storage().instance().set(&DataKey::Config, &config);
        env.storage().instance().set(&DataKey::State, &ContractState::Active);
        env.storage().instance().set(&DataKey::Version, &STATE_VERSION);
        env.storage().instance().set(&DataKey::Emission, &state);
        env.storage().instance().set(&DataKey::Schedule, &Vec::<EmissionPoint>::new(&env));
        env.storage().instance().set(&DataKey::Pools, &Vec::<Address>::new(&env));
        env.storage().instance().set(&DataKey::TotalAllocPoints, &0i128);
        env.storage().instance().set(&DataKey::Reserve, &0i128);

        log!(&env, "Emission controller initialized by admin: {}", admin);

        Ok(())
    }

    // ------------------------------------------------------------------
    // Admin
    // ------------------------------------------------------------------

    pub fn register_pool(
        env: Env,
        admin: Address,
        asset: Address,
        alloc_points: i128,
    ) -> Result<(), EmissionError> {
        Self::require_admin(&env, &admin)?;

        if alloc_points < 0 {
            return Err(EmissionError::InvalidAmount);
        }
        let mut pools = Self::pools(env.clone());
        if pools.contains(&asset) {
            return Err(EmissionError::PoolAlreadyRegistered);
        }

        Self::mass_update(&env)?;

        let pool = PoolInfo {
            total_staked: 0,
            acc_reward_per_share: 0,
            last_accrual_time: env.ledger().timestamp(),
            alloc_points,
        };
        pools.push_back(asset.clone());
        env.storage().instance().set(&DataKey::Pools, &pools);
        Self::save_pool(&env, &asset, &pool);
        Self::set_total_alloc(&env, Self::total_alloc_points(env.clone()) + alloc_points);

        env.events()
            .publish((symbol_short!("pool_add"), asset.clone()), alloc_points);
        log!(&env, "Pool {} registered with {} alloc points", asset, alloc_points);

        Ok(())
    }

    pub fn set_alloc_points(
        env: Env,
        admin: Address,
        assets: Vec<Address>,
        points: Vec<i128>,
    ) -> Result<(), EmissionError> {
        Self::require_admin(&env, &admin)?;

        if assets.len() != points.len() {
            return Err(EmissionError::ArrayLengthMismatch);
        }
        for (asset, alloc_points) in assets.iter().zip(points.iter()) {
            if alloc_points < 0 {
                return Err(EmissionError::InvalidAmount);
            }
            if Self::load_pool(&env, &asset).is_none() {
                return Err(EmissionError::UnknownPool);
            }
        }

        Self::mass_update(&env)?;

        let mut total_alloc = Self::total_alloc_points(env.clone());
        for (asset, alloc_points) in assets.iter().zip(points.iter()) {
            let mut pool = Self::load_pool(&env, &asset).ok_or(EmissionError::UnknownPool)?;
            total_alloc = total_alloc - pool.alloc_points + alloc_points;
            pool.alloc_points = alloc_points;
            Self::save_pool(&env, &asset, &pool);
        }
        Self::set_total_alloc(&env, total_alloc);

        log!(&env, "Alloc points updated for {} pools, total {}", assets.len(), total_alloc);

        Ok(())
    }

    /// Install `rate` now. `persist` pins it against later schedule crossings.
    pub fn set_emission_rate(
        env: Env,
        admin: Address,
        rate: i128,
        persist: bool,
    ) -> Result<(), EmissionError> {
        Self::require_admin(&env, &admin)?;

        if rate < 0 {
            return Err(EmissionError::InvalidAmount);
        }

        Self::mass_update(&env)?;

        let mut state = Self::emission_state(env.clone())?;
        if state.exhausted {
            state.resume_rate = rate;
        } else {
            state.rate = rate;
        }
        state.mode = if persist {
            RateMode::Manual
        } else {
            RateMode::Scheduled
        };
        Self::save_emission(&env, &state);

        Self::publish_rate(&env, &state);
        log!(&env, "Emission rate set to {} (persist: {})", rate, persist);

        Ok(())
    }

    /// Append points to the schedule. Only allowed before start.
    pub fn set_emission_schedule(
        env: Env,
        admin: Address,
        offsets: Vec<u128>,
        rates: Vec<u128>,
    ) -> Result<(), EmissionError> {
        Self::require_admin(&env, &admin)?;

        if Self::is_started(env.clone()) {
            return Err(EmissionError::AlreadyStarted);
        }

        let schedule = schedule::extend(&Self::emission_schedule(env.clone()), &offsets, &rates)?;
        env.storage().instance().set(&DataKey::Schedule, &schedule);

        log!(&env, "Emission schedule now has {} points", schedule.len());

        Ok(())
    }

    /// Begin emissions. Every pool's accrual clock restarts at the start time.
    pub fn start(env: Env, admin: Address) -> Result<(), EmissionError> {
        Self::require_admin(&env, &admin)?;

        if Self::is_started(env.clone()) {
            return Err(EmissionError::AlreadyStarted);
        }

        let now = env.ledger().timestamp();
        for asset in Self::pools(env.clone()).iter() {
            if let Some(mut pool) = Self::load_pool(&env, &asset) {
                pool.last_accrual_time = now;
                Self::save_pool(&env, &asset, &pool);
            }
        }
        env.storage().instance().set(&DataKey::StartTime, &now);

        env.events().publish((symbol_short!("started"),), now);
        log!(&env, "Emissions started at {}", now);

        Ok(())
    }

    /// Pull reward tokens from the admin into the reserve
    pub fn register_reward_deposit(
        env: Env,
        admin: Address,
        amount: i128,
    ) -> Result<(), EmissionError> {
        let config = Self::require_admin(&env, &admin)?;

        if !validate_positive_amount(amount) {
            return Err(EmissionError::InvalidAmount);
        }

        let reserve = Self::reserve(env.clone()) + amount;
        env.storage().instance().set(&DataKey::Reserve, &reserve);

        let mut state = Self::emission_state(env.clone())?;
        if state.exhausted {
            Self::mass_update(&env)?;
            state.rate = state.resume_rate;
            state.resume_rate = 0;
            state.exhausted = false;
            Self::save_emission(&env, &state);
            Self::publish_rate(&env, &state);
            log!(&env, "Reserve refilled, emission resumes at {}", state.rate);
        }

        token::Client::new(&env, &config.reward_token).transfer(
            &admin,
            &env.current_contract_address(),
            &amount,
        );

        env.events().publish((symbol_short!("deposit"),), amount);

        Ok(())
    }

    /// Admin function to pause/unpause the controller
    pub fn set_paused(env: Env, admin: Address, paused: bool) -> Result<(), EmissionError> {
        Self::require_admin(&env, &admin)?;

        let state = if paused {
            ContractState::Paused
        } else {
            ContractState::Active
        };
        env.storage().instance().set(&DataKey::State, &state);

        log!(&env, "Controller pause set to: {}", paused);

        Ok(())
    }

    // ------------------------------------------------------------------
    // Pool hook
    // ------------------------------------------------------------------

    /// Called by a pool asset after any balance change of `user`
    pub fn handle_action_after(
        env: Env,
        asset: Address,
        user: Address,
        balance: i128,
        total_supply: i128,
    ) -> Result<(), EmissionError> {
        asset.require_auth();
        Self::load_config(&env)?;

        if balance < 0 {
            return Err(EmissionError::InvalidAmount);
        }
        if Self::load_pool(&env, &asset).is_none() {
            return Err(EmissionError::UnknownPool);
        }

        let eligible = Self::query_eligibility(&env, &user)?;
        let assets = if eligible != Self::stored_eligibility(&env, &user) {
            Self::pools(env.clone())
        } else {
            vec![&env, asset.clone()]
        };

        let (plan, credited) =
            Self::checkpoint_pools(&env, &user, &assets, eligible, Some((&asset, balance)))?;
        Self::commit(&env, &user, &plan, eligible);
        Self::credit_base(&env, &user, credited);

        let event = StakeChangedEvent {
            asset,
            user,
            balance,
            total_supply,
            eligible,
        };
        env.events().publish((symbol_short!("stake_chg"),), event);

        Ok(())
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    /// Re-read the gate and settle an eligibility change for `user`. Anyone may call it.
    pub fn refresh_eligibility(env: Env, user: Address) -> Result<bool, EmissionError> {
        Self::require_active(&env)?;

        let eligible = Self::query_eligibility(&env, &user)?;
        if eligible == Self::stored_eligibility(&env, &user) {
            return Ok(eligible);
        }

        let (plan, credited) =
            Self::checkpoint_pools(&env, &user, &Self::pools(env.clone()), eligible, None)?;
        Self::commit(&env, &user, &plan, eligible);
        Self::credit_base(&env, &user, credited);

        env.events()
            .publish((symbol_short!("eligible"), user.clone()), eligible);
        log!(&env, "User {} eligibility is now {}", user, eligible);

        Ok(eligible)
    }

    pub fn set_claim_delegate(env: Env, user: Address, delegate: Address) -> Result<(), EmissionError> {
        user.require_auth();
        Self::require_active(&env)?;

        env.storage()
            .persistent()
            .set(&DataKey::Delegate(user.clone()), &delegate);

        log!(&env, "User {} approved claim delegate {}", user, delegate);

        Ok(())
    }

    pub fn clear_claim_delegate(env: Env, user: Address) -> Result<(), EmissionError> {
        user.require_auth();
        env.storage().persistent().remove(&DataKey::Delegate(user));
        Ok(())
    }

    /// Claim the listed pools plus base claimable and vest the sum in the ledger
    pub fn claim(
        env: Env,
        caller: Address,
        user: Address,
        assets: Vec<Address>,
    ) -> Result<i128, EmissionError> {
        caller.require_auth();
        Self::claim_for(&env, &caller, &user, assets)
    }

    pub fn claim_all(env: Env, caller: Address, user: Address) -> Result<i128, EmissionError> {
        caller.require_auth();
        Self::claim_for(&env, &caller, &user, Self::pools(env.clone()))
    }

    // ------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------

    /// Pending reward per listed pool, zero while the user is not eligible
    pub fn pending_rewards(
        env: Env,
        user: Address,
        assets: Vec<Address>,
    ) -> Result<Vec<i128>, EmissionError> {
        if !Self::query_eligibility(&env, &user)? {
            let mut out = Vec::new(&env);
            for asset in assets.iter() {
                Self::load_pool(&env, &asset).ok_or(EmissionError::UnknownPool)?;
                out.push_back(0);
            }
            return Ok(out);
        }
        Self::earned_per_pool(&env, &user, &assets)
    }

    /// Base claimable plus what a claim over every pool would realize now
    pub fn all_pending_rewards(env: Env, user: Address) -> Result<i128, EmissionError> {
        let earned = Self::earned_per_pool(&env, &user, &Self::pools(env.clone()))?;
        let pools_total: i128 = earned.iter().sum();
        Ok(Self::base_claimable(env, user) + pools_total)
    }

    pub fn pool_info(env: Env, asset: Address) -> Result<PoolInfo, EmissionError> {
        Self::load_pool(&env, &asset).ok_or(EmissionError::UnknownPool)
    }

    pub fn pools(env: Env) -> Vec<Address> {
        env.storage()
            .instance()
            .get(&DataKey::Pools)
            .unwrap_or(Vec::new(&env))
    }

    pub fn user_stake(env: Env, asset: Address, user: Address) -> UserStake {
        env.storage()
            .persistent()
            .get(&DataKey::UserStake(asset, user))
            .unwrap_or_default()
    }

    pub fn emission_state(env: Env) -> Result<EmissionState, EmissionError> {
        env.storage()
            .instance()
            .get(&DataKey::Emission)
            .ok_or(EmissionError::NotInitialized)
    }

    pub fn emission_schedule(env: Env) -> Vec<EmissionPoint> {
        env.storage()
            .instance()
            .get(&DataKey::Schedule)
            .unwrap_or(Vec::new(&env))
    }

    pub fn reserve(env: Env) -> i128 {
        env.storage().instance().get(&DataKey::Reserve).unwrap_or(0)
    }

    pub fn start_time(env: Env) -> Option<u64> {
        env.storage().instance().get(&DataKey::StartTime)
    }

    pub fn is_started(env: Env) -> bool {
        env.storage().instance().has(&DataKey::StartTime)
    }

    pub fn base_claimable(env: Env, user: Address) -> i128 {
        env.storage()
            .persistent()
            .get(&DataKey::BaseClaimable(user))
            .unwrap_or(0)
    }

    pub fn claim_delegate(env: Env, user: Address) -> Option<Address> {
        env.storage().persistent().get(&DataKey::Delegate(user))
    }

    pub fn total_alloc_points(env: Env) -> i128 {
        env.storage()
            .instance()
            .get(&DataKey::TotalAllocPoints)
            .unwrap_or(0)
    }

    pub fn version(env: Env) -> u32 {
        env.storage().instance().get(&DataKey::Version).unwrap_or(0)
    }

    /// Get contract configuration
    pub fn get_config(env: Env) -> Result<EmissionConfig, EmissionError> {
        Self::load_config(&env)
    }

    // Internal helper functions
    fn load_config(env: &Env) -> Result<EmissionConfig, EmissionError> {
        env.storage()
            .instance()
            .get(&DataKey::Config)
            .ok_or(EmissionError::NotInitialized)
    }

    fn require_admin(env: &Env, admin: &Address) -> Result<EmissionConfig, EmissionError> {
        admin.require_auth();
        let config = Self::load_config(env)?;
        if config.admin != *admin {
            return Err(EmissionError::Unauthorized);
        }
        Ok(config)
    }

    fn require_active(env: &Env) -> Result<(), EmissionError> {
        let state: ContractState = env
            .storage()
            .instance()
            .get(&DataKey::State)
            .ok_or(EmissionError::NotInitialized)?;
        if state == ContractState::Paused {
            return Err(EmissionError::ContractPaused);
        }
        Ok(())
    }

    fn load_pool(env: &Env, asset: &Address) -> Option<PoolInfo> {
        env.storage()
            .persistent()
            .get(&DataKey::Pool(asset.clone()))
    }

    fn save_pool(env: &Env, asset: &Address, pool: &PoolInfo) {
        env.storage()
            .persistent()
            .set(&DataKey::Pool(asset.clone()), pool);
    }

    fn save_emission(env: &Env, state: &EmissionState) {
        env.storage().instance().set(&DataKey::Emission, state);
    }

    fn set_total_alloc(env: &Env, total: i128) {
        env.storage().instance().set(&DataKey::TotalAllocPoints, &total);
    }

    fn set_base_claimable(env: &Env, user: &Address, amount: i128) {
        let key = DataKey::BaseClaimable(user.clone());
        if amount == 0 {
            env.storage().persistent().remove(&key);
        } else {
            env.storage().persistent().set(&key, &amount);
        }
    }

    fn credit_base(env: &Env, user: &Address, amount: i128) {
        if amount > 0 {
            let base = Self::base_claimable(env.clone(), user.clone());
            Self::set_base_claimable(env, user, base + amount);
        }
    }

    fn stored_eligibility(env: &Env, user: &Address) -> bool {
        env.storage()
            .persistent()
            .get(&DataKey::Eligible(user.clone()))
            .unwrap_or(true)
    }

    fn query_eligibility(env: &Env, user: &Address) -> Result<bool, EmissionError> {
        let config = Self::load_config(env)?;
        Ok(EligibilityClient::new(env, &config.eligibility_gate).is_eligible_for_rewards(user))
    }

    fn accrual_params(env: &Env) -> Result<Accrual, EmissionError> {
        Ok(Accrual {
            now: env.ledger().timestamp(),
            rate: Self::emission_state(env.clone())?.rate,
            total_alloc: Self::total_alloc_points(env.clone()),
            started: Self::is_started(env.clone()),
        })
    }

    /// Bring every pool current at the rate in force. Runs before any rate or allocation change.
    fn mass_update(env: &Env) -> Result<(), EmissionError> {
        let accrual = Self::accrual_params(env)?;
        for asset in Self::pools(env.clone()).iter() {
            if let Some(mut pool) = Self::load_pool(env, &asset) {
                accrual.accrue(&mut pool);
                Self::save_pool(env, &asset, &pool);
            }
        }
        Ok(())
    }

    /// Share of `pending` the user earned while eligible.
    ///
    /// The stake accrued from its last checkpoint (or start) until `now`; only
    /// the seconds the gate reports as covered by locks are paid.
    fn eligible_portion(
        env: &Env,
        user: &Address,
        pending: i128,
        last_checkpoint: u64,
        now: u64,
    ) -> Result<i128, EmissionError> {
        let Some(start) = Self::start_time(env.clone()) else {
            return Ok(pending);
        };
        let since = last_checkpoint.max(start);
        if pending <= 0 || now <= since {
            return Ok(pending);
        }

        let config = Self::load_config(env)?;
        let covered = EligibilityClient::new(env, &config.eligibility_gate)
            .eligible_duration(user, &since, &now);
        Ok(eligible_share(pending, covered, now - since))
    }

    /// What settling each listed pool would realize for `user` right now.
    fn earned_per_pool(
        env: &Env,
        user: &Address,
        assets: &Vec<Address>,
    ) -> Result<Vec<i128>, EmissionError> {
        let accrual = Self::accrual_params(env)?;
        let mut out = Vec::new(env);
        for asset in assets.iter() {
            let mut pool = Self::load_pool(env, &asset).ok_or(EmissionError::UnknownPool)?;
            accrual.accrue(&mut pool);
            let stake = Self::user_stake(env.clone(), asset, user.clone());
            let pending = pending_reward(pool.acc_reward_per_share, &stake);
            out.push_back(Self::eligible_portion(
                env,
                user,
                pending,
                stake.last_checkpoint,
                accrual.now,
            )?);
        }
        Ok(out)
    }

    /// Accrue and settle `user` in each listed pool without writing anything.
    ///
    /// `balance_update` records a new pool balance before settling. Repeated
    /// assets are settled once. Returns the plan and the total realized; pending
    /// reward from seconds the user was not eligible is forfeited.
    fn checkpoint_pools(
        env: &Env,
        user: &Address,
        assets: &Vec<Address>,
        eligible: bool,
        balance_update: Option<(&Address, i128)>,
    ) -> Result<(Vec<PoolCheckpoint>, i128), EmissionError> {
        let accrual = Self::accrual_params(env)?;
        let mut plan: Vec<PoolCheckpoint> = Vec::new(env);
        let mut credited = 0i128;

        for asset in assets.iter() {
            if plan.iter().any(|c| c.asset == asset) {
                continue;
            }
            let mut pool = Self::load_pool(env, &asset).ok_or(EmissionError::UnknownPool)?;
            let mut stake = Self::user_stake(env.clone(), asset.clone(), user.clone());

            accrual.accrue(&mut pool);
            if let Some((updated, balance)) = balance_update {
                if *updated == asset {
                    stake.balance = balance;
                }
            }
            let last_checkpoint = stake.last_checkpoint;
            let pending = settle_stake(&mut pool, &mut stake, eligible, accrual.now);
            credited += Self::eligible_portion(env, user, pending, last_checkpoint, accrual.now)?;

            plan.push_back(PoolCheckpoint { asset, pool, stake });
        }
        Ok((plan, credited))
    }

    fn commit(env: &Env, user: &Address, plan: &Vec<PoolCheckpoint>, eligible: bool) {
        for checkpoint in plan.iter() {
            Self::save_pool(env, &checkpoint.asset, &checkpoint.pool);
            env.storage().persistent().set(
                &DataKey::UserStake(checkpoint.asset.clone(), user.clone()),
                &checkpoint.stake,
            );
        }
        let key = DataKey::Eligible(user.clone());
        if eligible {
            env.storage().persistent().remove(&key);
        } else {
            env.storage().persistent().set(&key, &false);
        }
    }

    fn claim_for(
        env: &Env,
        caller: &Address,
        user: &Address,
        assets: Vec<Address>,
    ) -> Result<i128, EmissionError> {
        Self::require_active(env)?;
        let config = Self::load_config(env)?;
        if !Self::is_started(env.clone()) {
            return Err(EmissionError::NotStarted);
        }
        if caller != user && Self::claim_delegate(env.clone(), user.clone()).as_ref() != Some(caller) {
            return Err(EmissionError::Unauthorized);
        }

        let eligible = Self::query_eligibility(env, user)?;
        let assets = if eligible != Self::stored_eligibility(env, user) {
            Self::pools(env.clone())
        } else {
            assets
        };

        let (plan, credited) = Self::checkpoint_pools(env, user, &assets, eligible, None)?;
        let amount = Self::base_claimable(env.clone(), user.clone()) + credited;
        let reserve = Self::reserve(env.clone());
        if amount > reserve {
            return Err(EmissionError::OutOfRewards);
        }

        Self::commit(env, user, &plan, eligible);
        Self::set_base_claimable(env, user, 0);
        let remaining = reserve - amount;
        env.storage().instance().set(&DataKey::Reserve, &remaining);

        Self::advance_schedule(env)?;
        if amount > 0 && remaining == 0 {
            Self::park_emission(env)?;
        }

        if amount > 0 {
            let controller = env.current_contract_address();
            token::Client::new(env, &config.reward_token).transfer(
                &controller,
                &config.ledger,
                &amount,
            );
            LedgerClient::new(env, &config.ledger).vest(&controller, user, &amount, &true);
        }

        let event = ClaimEvent {
            user: user.clone(),
            caller: caller.clone(),
            amount,
        };
        env.events().publish((symbol_short!("claim"),), event);
        log!(env, "Claimed {} for user {}", amount, user);

        Ok(amount)
    }

    /// Move past every schedule point reached since start.
    fn advance_schedule(env: &Env) -> Result<(), EmissionError> {
        let Some(start) = Self::start_time(env.clone()) else {
            return Ok(());
        };
        let mut state = Self::emission_state(env.clone())?;
        let elapsed = env.ledger().timestamp().saturating_sub(start);
        let (index, rate) =
            schedule::crossed(&Self::emission_schedule(env.clone()), state.schedule_index, elapsed);
        if index == state.schedule_index {
            return Ok(());
        }

        Self::mass_update(env)?;
        state.schedule_index = index;
        if let (Some(rate), RateMode::Scheduled) = (rate, state.mode) {
            if state.exhausted {
                state.resume_rate = rate;
            } else {
                state.rate = rate;
            }
        }
        Self::save_emission(env, &state);

        Self::publish_rate(env, &state);
        log!(env, "Emission schedule advanced to index {}", index);

        Ok(())
    }

    /// Stop emitting once the reserve is empty; the rate comes back on the next deposit.
    fn park_emission(env: &Env) -> Result<(), EmissionError> {
        let mut state = Self::emission_state(env.clone())?;
        if state.exhausted {
            return Ok(());
        }

        Self::mass_update(env)?;
        state.resume_rate = state.rate;
        state.rate = 0;
        state.exhausted = true;
        Self::save_emission(env, &state);

        Self::publish_rate(env, &state);
        log!(env, "Reward reserve exhausted, emission parked");

        Ok(())
    }

    fn publish_rate(env: &Env, state: &EmissionState) {
        let event = RateChangedEvent {
            rate: state.rate,
            mode: state.mode,
            schedule_index: state.schedule_index,
        };
        env.events().publish((symbol_short!("rate"),), event);
    }
}

#[cfg(test)]
mod test;
