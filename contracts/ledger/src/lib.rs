#![no_std]
use incentives_shared::{
    validate_positive_amount, validate_ratio, ContractState, EarnedBalances, EarningEntry,
    LockEntry, LockType, LockedBalances, STATE_VERSION,
};
use soroban_sdk::{
    contract, contracterror, contractimpl, contracttype, log, symbol_short, token, Address, Env,
    Vec,
};

mod distribution;
mod locks;
mod penalty;

pub use distribution::{RewardStream, UserRewardState};

// Data Types
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LedgerSettings {
    pub burn_ratio: i128,       // Share of penalties sent to the burn reserve, WHOLE = 100%
    pub vest_duration: u64,     // Seconds until an earning entry vests penalty-free
    pub rewards_duration: u64,  // Seconds a notified secondary reward is spread over
    pub rewards_lookback: u64,  // Seconds before period end in which queued rewards fold in
    pub min_stake_amount: i128,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LedgerConfig {
    pub admin: Address,
    pub stake_token: Address,
    pub reward_token: Address,
    pub treasury: Address,
    pub burn_reserve: Address,
    pub burn_ratio: i128,
    pub vest_duration: u64,
    pub rewards_duration: u64,
    pub rewards_lookback: u64,
    pub min_stake_amount: i128,
}

#[contracttype]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Balances {
    pub total: i128,
    pub unlocked: i128,
    pub locked: i128,
    pub locked_with_multiplier: i128,
    pub earned: i128,
}

/// Net paid out, penalty levied and the burn share of that penalty.
#[contracttype]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PenaltyBreakdown {
    pub amount: i128,
    pub penalty: i128,
    pub burn: i128,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExitReceipt {
    pub earnings: PenaltyBreakdown,
    pub principal: i128,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RewardAmount {
    pub token: Address,
    pub amount: i128,
}

// Storage Keys
#[contracttype]
pub enum DataKey {
    Config,
    State,
    Version,
    LockTypes,
    Minters,
    RewardTokens,
    LockedSupply,
    LockedSupplyWithMultiplier,
    RewardStream(Address),
    UserReward(Address, Address),
    Balances(Address),
    Locks(Address),
    Earnings(Address),
    RelockDisabled(Address),
    DefaultLockIndex(Address),
}

// Error Types
#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum LedgerError {
    NotInitialized = 1,
    AlreadyInitialized = 2,
    Unauthorized = 3,
    ContractPaused = 4,
    InvalidAmount = 5,
    AmountBelowMinimum = 6,
    InvalidLockType = 7,
    InvalidConfiguration = 8,
    InvalidRatio = 9,
    ArrayLengthMismatch = 10,
    InsufficientBalance = 11,
    UnlockTimeNotFound = 12,
    RewardTokenExists = 13,
    RewardTokenNotFound = 14,
}

// Events
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StakeEvent {
    pub user: Address,
    pub amount: i128,
    pub multiplier: i128,
    pub unlock_time: u64,
    pub relock: bool,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VestEvent {
    pub user: Address,
    pub amount: i128,
    pub with_penalty: bool,
    pub unlock_time: u64,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WithdrawEvent {
    pub user: Address,
    pub amount: i128,
    pub penalty: i128,
    pub burn: i128,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RewardNotifiedEvent {
    pub token: Address,
    pub amount: i128,
    pub rate_per_second: i128,
    pub period_finish: u64,
}

#[contract]
pub struct LockVestLedger;

#[contractimpl]
impl LockVestLedger {
    /// Initialize the ledger
    pub fn initialize(
        env: Env,
        admin: Address,
        stake_token: Address,
        reward_token: Address,
        treasury: Address,
        burn_reserve: Address,
        settings: LedgerSettings,
    ) -> Result<(), LedgerError> {
        if env.storage().instance().has(&DataKey::Config) {
            return Err(LedgerError::AlreadyInitialized);
        }

        if !validate_ratio(settings.burn_ratio) {
            return Err(LedgerError::InvalidRatio);
        }
        if settings.vest_duration == 0
            || settings.rewards_duration == 0
            || settings.rewards_lookback > settings.rewards_duration
            || settings.min_stake_amount < 0
            || stake_token == reward_token
        {
            return Err(LedgerError::InvalidConfiguration);
        }

        admin.require_auth();

        let config = LedgerConfig {
            admin: admin.clone(),
            stake_token,
            reward_token,
            treasury,
            burn_reserve,
            burn_ratio: settings.burn_ratio,
            vest_duration: settings.vest_duration,
            rewards_duration: settings.rewards_duration,
            rewards_lookback: settings.rewards_lookback,
            min_stake_amount: settings.min_stake_amount,
        };

        env.storage().instance().set(&DataKey::Config, &config);
        env.storage().instance().set(&DataKey::State, &ContractState::Active);
        env.storage().instance().set(&DataKey::Version, &STATE_VERSION);
        env.storage().instance().set(&DataKey::LockTypes, &Vec::<LockType>::new(&env));
        env.storage().instance().set(&DataKey::Minters, &Vec::<Address>::new(&env));
        env.storage().instance().set(&DataKey::RewardTokens, &Vec::<Address>::new(&env));
        env.storage().instance().set(&DataKey::LockedSupply, &0i128);
        env.storage().instance().set(&DataKey::LockedSupplyWithMultiplier, &0i128);

        log!(&env, "Lock/vest ledger initialized by admin: {}", admin);

        Ok(())
    }

    // ------------------------------------------------------------------
    // Admin
    // ------------------------------------------------------------------

    /// Replace the lock table; index i pairs durations[i] with multipliers[i]
    ///
    /// Locks aggregate by multiplier, so each row must carry its own.
    pub fn set_lock_type_table(
        env: Env,
        admin: Address,
        durations: Vec<u64>,
        multipliers: Vec<i128>,
    ) -> Result<(), LedgerError> {
        Self::require_admin(&env, &admin)?;

        if durations.len() != multipliers.len() {
            return Err(LedgerError::ArrayLengthMismatch);
        }
        if durations.is_empty() {
            return Err(LedgerError::InvalidConfiguration);
        }

        let mut table: Vec<LockType> = Vec::new(&env);
        for (duration, multiplier) in durations.iter().zip(multipliers.iter()) {
            if duration == 0 || multiplier <= 0 {
                return Err(LedgerError::InvalidConfiguration);
            }
            if table.iter().any(|t| t.multiplier == multiplier) {
                return Err(LedgerError::InvalidConfiguration);
            }
            table.push_back(LockType {
                duration,
                multiplier,
            });
        }
        env.storage().instance().set(&DataKey::LockTypes, &table);

        log!(&env, "Lock table updated with {} lock types", table.len());

        Ok(())
    }

    /// Set the contracts allowed to vest rewards into the ledger
    pub fn set_minters(env: Env, admin: Address, minters: Vec<Address>) -> Result<(), LedgerError> {
        Self::require_admin(&env, &admin)?;
        env.storage().instance().set(&DataKey::Minters, &minters);

        log!(&env, "Minters updated: {}", minters.len());

        Ok(())
    }

    pub fn set_burn_ratio(env: Env, admin: Address, burn_ratio: i128) -> Result<(), LedgerError> {
        let mut config = Self::require_admin(&env, &admin)?;
        if !validate_ratio(burn_ratio) {
            return Err(LedgerError::InvalidRatio);
        }

        config.burn_ratio = burn_ratio;
        env.storage().instance().set(&DataKey::Config, &config);

        log!(&env, "Burn ratio set to: {}", burn_ratio);

        Ok(())
    }

    pub fn set_penalty_receivers(
        env: Env,
        admin: Address,
        treasury: Address,
        burn_reserve: Address,
    ) -> Result<(), LedgerError> {
        let mut config = Self::require_admin(&env, &admin)?;

        config.treasury = treasury;
        config.burn_reserve = burn_reserve;
        env.storage().instance().set(&DataKey::Config, &config);

        Ok(())
    }

    /// Admin function to pause/unpause the ledger
    pub fn set_paused(env: Env, admin: Address, paused: bool) -> Result<(), LedgerError> {
        Self::require_admin(&env, &admin)?;

        let state = if paused {
            ContractState::Paused
        } else {
            ContractState::Active
        };
        env.storage().instance().set(&DataKey::State, &state);

        log!(&env, "Ledger pause set to: {}", paused);

        Ok(())
    }

    pub fn add_reward_token(env: Env, admin: Address, reward_token: Address) -> Result<(), LedgerError> {
        let config = Self::require_admin(&env, &admin)?;
        if reward_token == config.stake_token {
            return Err(LedgerError::InvalidConfiguration);
        }

        let mut tokens = Self::reward_tokens(env.clone());
        if tokens.contains(&reward_token) {
            return Err(LedgerError::RewardTokenExists);
        }

        // A re-added token starts over at zero under a new generation.
        let generation = Self::load_stream(&env, &reward_token)
            .map(|s| s.generation + 1)
            .unwrap_or(1);
        let stream = RewardStream::fresh(env.ledger().timestamp(), generation);

        tokens.push_back(reward_token.clone());
        env.storage().instance().set(&DataKey::RewardTokens, &tokens);
        Self::save_stream(&env, &reward_token, &stream);

        env.events()
            .publish((symbol_short!("rwd_add"), reward_token.clone()), generation);
        log!(&env, "Reward token {} added, generation {}", reward_token, generation);

        Ok(())
    }

    pub fn remove_reward_token(
        env: Env,
        admin: Address,
        reward_token: Address,
    ) -> Result<(), LedgerError> {
        let config = Self::require_admin(&env, &admin)?;

        let mut tokens = Self::reward_tokens(env.clone());
        let index = tokens
            .first_index_of(&reward_token)
            .ok_or(LedgerError::RewardTokenNotFound)?;
        tokens.remove(index);

        let now = env.ledger().timestamp();
        let stream =
            Self::load_stream(&env, &reward_token).unwrap_or(RewardStream::fresh(now, 0));
        let sweep = stream.balance + stream.queued;

        env.storage().instance().set(&DataKey::RewardTokens, &tokens);
        Self::save_stream(&env, &reward_token, &RewardStream::fresh(now, stream.generation));

        if sweep > 0 {
            token::Client::new(&env, &reward_token).transfer(
                &env.current_contract_address(),
                &config.admin,
                &sweep,
            );
        }

        env.events()
            .publish((symbol_short!("rwd_rm"), reward_token.clone()), sweep);
        log!(&env, "Reward token {} removed, swept {}", reward_token, sweep);

        Ok(())
    }

    // ------------------------------------------------------------------
    // User preferences
    // ------------------------------------------------------------------

    /// Opt in or out of relocking matured principal
    pub fn set_relock(env: Env, user: Address, enabled: bool) -> Result<(), LedgerError> {
        user.require_auth();
        Self::load_config(&env)?;

        let key = DataKey::RelockDisabled(user.clone());
        if enabled {
            env.storage().persistent().remove(&key);
        } else {
            env.storage().persistent().set(&key, &true);
        }

        log!(&env, "User {} relock enabled: {}", user, enabled);

        Ok(())
    }

    /// Lock type used when matured principal is relocked
    pub fn set_default_relock_type_index(
        env: Env,
        user: Address,
        lock_type_index: u32,
    ) -> Result<(), LedgerError> {
        user.require_auth();

        if lock_type_index >= Self::lock_types(env.clone()).len() {
            return Err(LedgerError::InvalidLockType);
        }
        env.storage()
            .persistent()
            .set(&DataKey::DefaultLockIndex(user), &lock_type_index);

        Ok(())
    }

    // ------------------------------------------------------------------
    // Locks
    // ------------------------------------------------------------------

    /// Lock `amount` stake tokens paid by `caller` for `on_behalf_of`
    pub fn stake(
        env: Env,
        caller: Address,
        amount: i128,
        on_behalf_of: Address,
        lock_type_index: u32,
    ) -> Result<(), LedgerError> {
        caller.require_auth();
        Self::require_active(&env)?;
        let config = Self::load_config(&env)?;

        if !validate_positive_amount(amount) {
            return Err(LedgerError::InvalidAmount);
        }
        if amount < config.min_stake_amount {
            return Err(LedgerError::AmountBelowMinimum);
        }
        let lock_type = Self::lock_types(env.clone())
            .get(lock_type_index)
            .ok_or(LedgerError::InvalidLockType)?;

        Self::update_reward(&env, Some(&on_behalf_of));

        let mut balances = Self::load_balances(&env, &on_behalf_of);
        let mut user_locks = Self::lock_entries(env.clone(), on_behalf_of.clone());
        let was_locked = balances.locked;

        let unlock_time =
            Self::lock_into(&env, &mut balances, &mut user_locks, amount, &lock_type);

        Self::save_balances(&env, &on_behalf_of, &balances);
        Self::save_locks(&env, &on_behalf_of, &user_locks);

        if was_locked == 0 {
            env.events()
                .publish((symbol_short!("lockr_add"),), on_behalf_of.clone());
        }

        token::Client::new(&env, &config.stake_token).transfer(
            &caller,
            &env.current_contract_address(),
            &amount,
        );

        let event = StakeEvent {
            user: on_behalf_of.clone(),
            amount,
            multiplier: lock_type.multiplier,
            unlock_time,
            relock: false,
        };
        env.events().publish((symbol_short!("stake"),), event);

        log!(&env, "User {} locked {} until {}", on_behalf_of, amount, unlock_time);

        Ok(())
    }

    /// Withdraw matured locks of `user`, relocking them when the user's own preference says so
    pub fn withdraw_expired_locks_for(
        env: Env,
        caller: Address,
        user: Address,
        limit: u32,
        relock: bool,
    ) -> Result<i128, LedgerError> {
        caller.require_auth();
        Self::require_active(&env)?;
        let config = Self::load_config(&env)?;

        let preference = Self::relock_enabled(env.clone(), user.clone());
        let relock = if caller == user {
            relock && preference
        } else {
            preference
        };

        let relock_type = if relock {
            let table = Self::lock_types(env.clone());
            let index = env
                .storage()
                .persistent()
                .get(&DataKey::DefaultLockIndex(user.clone()))
                .unwrap_or(0u32);
            Some(
                table
                    .get(index)
                    .or(table.get(0))
                    .ok_or(LedgerError::InvalidLockType)?,
            )
        } else {
            None
        };

        Self::update_reward(&env, Some(&user));

        let now = env.ledger().timestamp();
        let mut balances = Self::load_balances(&env, &user);
        let mut user_locks = Self::lock_entries(env.clone(), user.clone());

        let (amount, weight) = locks::take_expired(&mut user_locks, now, limit);
        if amount == 0 {
            return Ok(0);
        }

        balances.locked -= amount;
        balances.locked_with_multiplier -= weight;
        balances.total -= amount;
        Self::adjust_supply(&env, -amount, -weight);

        if let Some(lock_type) = relock_type {
            let unlock_time =
                Self::lock_into(&env, &mut balances, &mut user_locks, amount, &lock_type);
            Self::save_balances(&env, &user, &balances);
            Self::save_locks(&env, &user, &user_locks);

            let event = StakeEvent {
                user: user.clone(),
                amount,
                multiplier: lock_type.multiplier,
                unlock_time,
                relock: true,
            };
            env.events().publish((symbol_short!("stake"),), event);
            log!(&env, "Relocked {} for user {} until {}", amount, user, unlock_time);
        } else {
            Self::save_balances(&env, &user, &balances);
            Self::save_locks(&env, &user, &user_locks);
            if balances.locked == 0 {
                env.events().publish((symbol_short!("lockr_rm"),), user.clone());
            }

            token::Client::new(&env, &config.stake_token).transfer(
                &env.current_contract_address(),
                &user,
                &amount,
            );
            env.events()
                .publish((symbol_short!("unlock"), user.clone()), amount);
            log!(&env, "Released {} matured principal to user {}", amount, user);
        }

        Ok(amount)
    }

    // ------------------------------------------------------------------
    // Vesting
    // ------------------------------------------------------------------

    /// Credit `amount` of reward tokens already transferred in by a minter
    pub fn vest(
        env: Env,
        minter: Address,
        user: Address,
        amount: i128,
        with_penalty: bool,
    ) -> Result<(), LedgerError> {
        minter.require_auth();
        Self::require_active(&env)?;
        let config = Self::load_config(&env)?;

        if !Self::minters(env.clone()).contains(&minter) {
            return Err(LedgerError::Unauthorized);
        }
        if !validate_positive_amount(amount) {
            return Err(LedgerError::InvalidAmount);
        }

        let now = env.ledger().timestamp();
        let mut balances = Self::load_balances(&env, &user);
        let unlock_time = if with_penalty {
            let unlock_time = now + config.vest_duration;
            let mut earnings = Self::load_earnings(&env, &user);
            locks::add_earning(&mut earnings, amount, unlock_time);
            Self::save_earnings(&env, &user, &earnings);
            balances.earned += amount;
            unlock_time
        } else {
            balances.unlocked += amount;
            now
        };
        balances.total += amount;
        Self::save_balances(&env, &user, &balances);

        let event = VestEvent {
            user: user.clone(),
            amount,
            with_penalty,
            unlock_time,
        };
        env.events().publish((symbol_short!("vest"),), event);

        log!(&env, "Vested {} for user {} (penalty: {})", amount, user, with_penalty);

        Ok(())
    }

    /// What `exit` would pay right now
    pub fn withdrawable_balance(env: Env, user: Address) -> Result<PenaltyBreakdown, LedgerError> {
        let config = Self::load_config(&env)?;
        let now = env.ledger().timestamp();
        let balances = Self::load_balances(&env, &user);

        let mut amount = balances.unlocked;
        let mut penalty = 0i128;
        for entry in Self::load_earnings(&env, &user).iter() {
            let factor = penalty::penalty_factor(entry.unlock_time, now, config.vest_duration);
            let quote = penalty::quote_full(entry.amount, factor);
            amount += quote.net;
            penalty += quote.penalty;
        }

        Ok(PenaltyBreakdown {
            amount,
            penalty,
            burn: penalty::burn_share(penalty, config.burn_ratio),
        })
    }

    /// Withdraw exactly `amount` net, from unlocked balance first then the oldest earnings
    pub fn withdraw(env: Env, user: Address, amount: i128) -> Result<PenaltyBreakdown, LedgerError> {
        user.require_auth();
        Self::require_active(&env)?;
        let config = Self::load_config(&env)?;

        if !validate_positive_amount(amount) {
            return Err(LedgerError::InvalidAmount);
        }

        let now = env.ledger().timestamp();
        let mut balances = Self::load_balances(&env, &user);
        let mut earnings = Self::load_earnings(&env, &user);

        let from_unlocked = amount.min(balances.unlocked);
        let mut remaining = amount - from_unlocked;
        let mut consumed = 0i128;
        let mut penalty = 0i128;

        while remaining > 0 {
            let Some(mut entry) = earnings.first() else {
                break;
            };
            let factor = penalty::penalty_factor(entry.unlock_time, now, config.vest_duration);
            let full = penalty::quote_full(entry.amount, factor);

            if full.net <= remaining {
                remaining -= full.net;
                penalty += full.penalty;
                consumed += full.gross;
                earnings.pop_front();
            } else {
                let partial = penalty::quote_for_net(remaining, factor);
                penalty += partial.penalty;
                consumed += partial.gross;
                entry.amount -= partial.gross;
                if entry.amount == 0 {
                    earnings.pop_front();
                } else {
                    earnings.set(0, entry);
                }
                remaining = 0;
            }
        }

        if remaining > 0 {
            return Err(LedgerError::InsufficientBalance);
        }

        balances.unlocked -= from_unlocked;
        balances.earned -= consumed;
        balances.total -= from_unlocked + consumed;
        Self::save_balances(&env, &user, &balances);
        Self::save_earnings(&env, &user, &earnings);

        let breakdown = PenaltyBreakdown {
            amount,
            penalty,
            burn: penalty::burn_share(penalty, config.burn_ratio),
        };
        Self::pay_out(&env, &config, &user, &breakdown);

        let event = WithdrawEvent {
            user: user.clone(),
            amount,
            penalty,
            burn: breakdown.burn,
        };
        env.events().publish((symbol_short!("withdraw"),), event);

        log!(&env, "User {} withdrew {} paying penalty {}", user, amount, penalty);

        Ok(breakdown)
    }

    /// Withdraw everything withdrawable: matured principal, unlocked balance and all earnings
    pub fn exit(env: Env, user: Address, claim_rewards: bool) -> Result<ExitReceipt, LedgerError> {
        user.require_auth();
        Self::require_active(&env)?;
        let config = Self::load_config(&env)?;

        Self::update_reward(&env, Some(&user));

        let now = env.ledger().timestamp();
        let mut balances = Self::load_balances(&env, &user);
        let mut user_locks = Self::lock_entries(env.clone(), user.clone());

        let mut net = balances.unlocked;
        let mut penalty = 0i128;
        for entry in Self::load_earnings(&env, &user).iter() {
            let factor = penalty::penalty_factor(entry.unlock_time, now, config.vest_duration);
            let quote = penalty::quote_full(entry.amount, factor);
            net += quote.net;
            penalty += quote.penalty;
        }

        let (principal, weight) = locks::take_expired(&mut user_locks, now, 0);

        balances.total -= balances.unlocked + balances.earned + principal;
        balances.unlocked = 0;
        balances.earned = 0;
        balances.locked -= principal;
        balances.locked_with_multiplier -= weight;
        Self::adjust_supply(&env, -principal, -weight);

        Self::save_balances(&env, &user, &balances);
        Self::save_locks(&env, &user, &user_locks);
        env.storage().persistent().remove(&DataKey::Earnings(user.clone()));
        if principal > 0 && balances.locked == 0 {
            env.events().publish((symbol_short!("lockr_rm"),), user.clone());
        }

        let claimed = if claim_rewards {
            Self::settle_rewards(&env, &user)
        } else {
            Vec::new(&env)
        };

        let breakdown = PenaltyBreakdown {
            amount: net,
            penalty,
            burn: penalty::burn_share(penalty, config.burn_ratio),
        };
        Self::pay_out(&env, &config, &user, &breakdown);
        if principal > 0 {
            token::Client::new(&env, &config.stake_token).transfer(
                &env.current_contract_address(),
                &user,
                &principal,
            );
        }
        Self::pay_rewards(&env, &user, &claimed);

        let event = WithdrawEvent {
            user: user.clone(),
            amount: net,
            penalty,
            burn: breakdown.burn,
        };
        env.events().publish((symbol_short!("exit"),), event);

        log!(&env, "User {} exited: net {}, penalty {}, principal {}", user, net, penalty, principal);

        Ok(ExitReceipt {
            earnings: breakdown,
            principal,
        })
    }

    /// Exit the single earning entry unlocking exactly at `unlock_time`
    pub fn individual_early_exit(
        env: Env,
        user: Address,
        claim_rewards: bool,
        unlock_time: u64,
    ) -> Result<PenaltyBreakdown, LedgerError> {
        user.require_auth();
        Self::require_active(&env)?;
        let config = Self::load_config(&env)?;

        let now = env.ledger().timestamp();
        if unlock_time > now + config.vest_duration {
            return Err(LedgerError::UnlockTimeNotFound);
        }

        let mut earnings = Self::load_earnings(&env, &user);
        let index = locks::find_earning(&earnings, unlock_time)
            .ok_or(LedgerError::UnlockTimeNotFound)?;
        let entry = earnings.get(index).ok_or(LedgerError::UnlockTimeNotFound)?;
        earnings.remove(index);

        let factor = penalty::penalty_factor(entry.unlock_time, now, config.vest_duration);
        let quote = penalty::quote_full(entry.amount, factor);

        let mut balances = Self::load_balances(&env, &user);
        balances.earned -= entry.amount;
        balances.total -= entry.amount;
        Self::save_balances(&env, &user, &balances);
        Self::save_earnings(&env, &user, &earnings);

        let claimed = if claim_rewards {
            Self::settle_rewards(&env, &user)
        } else {
            Vec::new(&env)
        };

        let breakdown = PenaltyBreakdown {
            amount: quote.net,
            penalty: quote.penalty,
            burn: penalty::burn_share(quote.penalty, config.burn_ratio),
        };
        Self::pay_out(&env, &config, &user, &breakdown);
        Self::pay_rewards(&env, &user, &claimed);

        let event = WithdrawEvent {
            user: user.clone(),
            amount: quote.net,
            penalty: quote.penalty,
            burn: breakdown.burn,
        };
        env.events().publish((symbol_short!("iee"),), event);

        log!(&env, "User {} early-exited entry {} paying penalty {}", user, unlock_time, quote.penalty);

        Ok(breakdown)
    }

    // ------------------------------------------------------------------
    // Secondary rewards
    // ------------------------------------------------------------------

    /// Pull `amount` of a registered reward token and queue it for distribution
    pub fn notify_reward(
        env: Env,
        distributor: Address,
        reward_token: Address,
        amount: i128,
    ) -> Result<(), LedgerError> {
        distributor.require_auth();
        Self::require_active(&env)?;
        let config = Self::load_config(&env)?;

        if distributor != config.admin && !Self::minters(env.clone()).contains(&distributor) {
            return Err(LedgerError::Unauthorized);
        }
        if !validate_positive_amount(amount) {
            return Err(LedgerError::InvalidAmount);
        }
        if !Self::reward_tokens(env.clone()).contains(&reward_token) {
            return Err(LedgerError::RewardTokenNotFound);
        }

        let mut stream = Self::load_stream(&env, &reward_token)
            .ok_or(LedgerError::RewardTokenNotFound)?;
        stream.queued += amount;
        Self::save_stream(&env, &reward_token, &stream);
        Self::notify_unseen(&env, &config, &reward_token);

        token::Client::new(&env, &reward_token).transfer(
            &distributor,
            &env.current_contract_address(),
            &amount,
        );

        log!(&env, "Queued {} of reward token {}", amount, reward_token);

        Ok(())
    }

    /// Pay every secondary reward the user has earned
    pub fn claim_rewards(env: Env, user: Address) -> Result<Vec<RewardAmount>, LedgerError> {
        user.require_auth();
        Self::require_active(&env)?;
        Self::load_config(&env)?;

        let claimed = Self::settle_rewards(&env, &user);
        Self::pay_rewards(&env, &user, &claimed);

        log!(&env, "User {} claimed {} reward tokens", user, claimed.len());

        Ok(claimed)
    }

    pub fn claimable_rewards(env: Env, user: Address) -> Vec<RewardAmount> {
        let now = env.ledger().timestamp();
        let total_weight = Self::locked_supply_with_multiplier(env.clone());
        let weight = Self::load_balances(&env, &user).locked_with_multiplier;

        let mut out = Vec::new(&env);
        for reward_token in Self::reward_tokens(env.clone()).iter() {
            let Some(stream) = Self::load_stream(&env, &reward_token) else {
                continue;
            };
            let mut state = Self::load_user_reward(&env, &user, &reward_token);
            state.settle(
                stream.current_per_weight(now, total_weight),
                stream.generation,
                weight,
            );
            out.push_back(RewardAmount {
                token: reward_token,
                amount: state.earned,
            });
        }
        out
    }

    pub fn reward_per_weight(env: Env, reward_token: Address) -> i128 {
        let total_weight = Self::locked_supply_with_multiplier(env.clone());
        Self::load_stream(&env, &reward_token)
            .map(|s| s.current_per_weight(env.ledger().timestamp(), total_weight))
            .unwrap_or(0)
    }

    // ------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------

    /// Principal in locks that have not matured yet
    pub fn locked_balance(env: Env, user: Address) -> i128 {
        let user_locks = Self::lock_entries(env.clone(), user);
        locks::unexpired_amount(&user_locks, env.ledger().timestamp())
    }

    pub fn locked_balances(env: Env, user: Address) -> LockedBalances {
        let now = env.ledger().timestamp();
        let balances = Self::load_balances(&env, &user);
        let entries = Self::lock_entries(env.clone(), user);
        LockedBalances {
            total: balances.locked,
            unlockable: locks::matured_amount(&entries, now),
            locked: locks::unexpired_amount(&entries, now),
            locked_with_multiplier: balances.locked_with_multiplier,
            entries,
        }
    }

    pub fn lock_entries(env: Env, user: Address) -> Vec<LockEntry> {
        env.storage()
            .persistent()
            .get(&DataKey::Locks(user))
            .unwrap_or(Vec::new(&env))
    }

    pub fn earned_balances(env: Env, user: Address) -> EarnedBalances {
        let now = env.ledger().timestamp();
        let entries = Self::load_earnings(&env, &user);
        let unlocked = entries
            .iter()
            .filter(|e| e.unlock_time <= now)
            .map(|e| e.amount)
            .sum();
        EarnedBalances {
            total: Self::load_balances(&env, &user).earned,
            unlocked,
            entries,
        }
    }

    pub fn balances(env: Env, user: Address) -> Balances {
        Self::load_balances(&env, &user)
    }

    pub fn total_balance(env: Env, user: Address) -> i128 {
        Self::load_balances(&env, &user).total
    }

    pub fn locked_supply(env: Env) -> i128 {
        env.storage().instance().get(&DataKey::LockedSupply).unwrap_or(0)
    }

    pub fn locked_supply_with_multiplier(env: Env) -> i128 {
        env.storage()
            .instance()
            .get(&DataKey::LockedSupplyWithMultiplier)
            .unwrap_or(0)
    }

    pub fn reward_stream(env: Env, reward_token: Address) -> Option<RewardStream> {
        Self::load_stream(&env, &reward_token)
    }

    pub fn reward_tokens(env: Env) -> Vec<Address> {
        env.storage()
            .instance()
            .get(&DataKey::RewardTokens)
            .unwrap_or(Vec::new(&env))
    }

    pub fn relock_enabled(env: Env, user: Address) -> bool {
        !env.storage()
            .persistent()
            .get(&DataKey::RelockDisabled(user))
            .unwrap_or(false)
    }

    pub fn lock_types(env: Env) -> Vec<LockType> {
        env.storage()
            .instance()
            .get(&DataKey::LockTypes)
            .unwrap_or(Vec::new(&env))
    }

    pub fn minters(env: Env) -> Vec<Address> {
        env.storage()
            .instance()
            .get(&DataKey::Minters)
            .unwrap_or(Vec::new(&env))
    }

    pub fn is_paused(env: Env) -> bool {
        env.storage().instance().get(&DataKey::State) == Some(ContractState::Paused)
    }

    pub fn version(env: Env) -> u32 {
        env.storage().instance().get(&DataKey::Version).unwrap_or(0)
    }

    /// Get contract configuration
    pub fn get_config(env: Env) -> Result<LedgerConfig, LedgerError> {
        Self::load_config(&env)
    }

    // Internal helper functions
    fn load_config(env: &Env) -> Result<LedgerConfig, LedgerError> {
        env.storage()
            .instance()
            .get(&DataKey::Config)
            .ok_or(LedgerError::NotInitialized)
    }

    fn require_admin(env: &Env, admin: &Address) -> Result<LedgerConfig, LedgerError> {
        admin.require_auth();
        let config = Self::load_config(env)?;
        if config.admin != *admin {
            return Err(LedgerError::Unauthorized);
        }
        Ok(config)
    }

    fn require_active(env: &Env) -> Result<(), LedgerError> {
        let state: ContractState = env
            .storage()
            .instance()
            .get(&DataKey::State)
            .ok_or(LedgerError::NotInitialized)?;
        if state == ContractState::Paused {
            return Err(LedgerError::ContractPaused);
        }
        Ok(())
    }

    fn load_balances(env: &Env, user: &Address) -> Balances {
        env.storage()
            .persistent()
            .get(&DataKey::Balances(user.clone()))
            .unwrap_or_default()
    }

    fn save_balances(env: &Env, user: &Address, balances: &Balances) {
        env.storage()
            .persistent()
            .set(&DataKey::Balances(user.clone()), balances);
    }

    fn save_locks(env: &Env, user: &Address, user_locks: &Vec<LockEntry>) {
        let key = DataKey::Locks(user.clone());
        if user_locks.is_empty() {
            env.storage().persistent().remove(&key);
        } else {
            env.storage().persistent().set(&key, user_locks);
        }
    }

    fn load_earnings(env: &Env, user: &Address) -> Vec<EarningEntry> {
        env.storage()
            .persistent()
            .get(&DataKey::Earnings(user.clone()))
            .unwrap_or(Vec::new(env))
    }

    fn save_earnings(env: &Env, user: &Address, earnings: &Vec<EarningEntry>) {
        let key = DataKey::Earnings(user.clone());
        if earnings.is_empty() {
            env.storage().persistent().remove(&key);
        } else {
            env.storage().persistent().set(&key, earnings);
        }
    }

    fn load_stream(env: &Env, reward_token: &Address) -> Option<RewardStream> {
        env.storage()
            .persistent()
            .get(&DataKey::RewardStream(reward_token.clone()))
    }

    fn save_stream(env: &Env, reward_token: &Address, stream: &RewardStream) {
        env.storage()
            .persistent()
            .set(&DataKey::RewardStream(reward_token.clone()), stream);
    }

    fn load_user_reward(env: &Env, user: &Address, reward_token: &Address) -> UserRewardState {
        env.storage()
            .persistent()
            .get(&DataKey::UserReward(user.clone(), reward_token.clone()))
            .unwrap_or_default()
    }

    fn adjust_supply(env: &Env, locked: i128, weight: i128) {
        let supply = Self::locked_supply(env.clone()) + locked;
        let weighted = Self::locked_supply_with_multiplier(env.clone()) + weight;
        env.storage().instance().set(&DataKey::LockedSupply, &supply);
        env.storage()
            .instance()
            .set(&DataKey::LockedSupplyWithMultiplier, &weighted);
    }

    /// Append a lock and book it in the balances and supplies. Caller checkpoints rewards first.
    fn lock_into(
        env: &Env,
        balances: &mut Balances,
        user_locks: &mut Vec<LockEntry>,
        amount: i128,
        lock_type: &LockType,
    ) -> u64 {
        let now = env.ledger().timestamp();
        let unlock_time = now + lock_type.duration;
        locks::add_lock(user_locks, amount, lock_type.multiplier, now, unlock_time);

        let weight = amount * lock_type.multiplier;
        balances.locked += amount;
        balances.locked_with_multiplier += weight;
        balances.total += amount;
        Self::adjust_supply(env, amount, weight);

        unlock_time
    }

    /// Bring every stream current and, when given, settle `user` against it.
    fn update_reward(env: &Env, user: Option<&Address>) {
        let now = env.ledger().timestamp();
        let total_weight = Self::locked_supply_with_multiplier(env.clone());
        let weight = user
            .map(|u| Self::load_balances(env, u).locked_with_multiplier)
            .unwrap_or(0);

        for reward_token in Self::reward_tokens(env.clone()).iter() {
            let Some(mut stream) = Self::load_stream(env, &reward_token) else {
                continue;
            };
            stream.checkpoint(now, total_weight);
            Self::save_stream(env, &reward_token, &stream);

            if let Some(user) = user {
                let mut state = Self::load_user_reward(env, user, &reward_token);
                state.settle(stream.accumulated_per_weight, stream.generation, weight);
                env.storage().persistent().set(
                    &DataKey::UserReward(user.clone(), reward_token.clone()),
                    &state,
                );
            }
        }
    }

    /// Fold queued rewards into the stream once the lookback window allows it.
    fn notify_unseen(env: &Env, config: &LedgerConfig, reward_token: &Address) {
        let Some(mut stream) = Self::load_stream(env, reward_token) else {
            return;
        };
        let now = env.ledger().timestamp();
        if stream.queued <= 0
            || !stream.accepts_notification(now, config.rewards_duration, config.rewards_lookback)
        {
            return;
        }

        let total_weight = Self::locked_supply_with_multiplier(env.clone());
        let amount = stream.queued;
        stream.checkpoint(now, total_weight);
        stream.notify(amount, now, config.rewards_duration);
        stream.balance += amount;
        stream.queued = 0;
        Self::save_stream(env, reward_token, &stream);

        let event = RewardNotifiedEvent {
            token: reward_token.clone(),
            amount,
            rate_per_second: stream.rate_per_second,
            period_finish: stream.period_finish,
        };
        env.events().publish((symbol_short!("notified"),), event);
    }

    /// Zero the user's earned amounts and return what is owed, before any transfer.
    fn settle_rewards(env: &Env, user: &Address) -> Vec<RewardAmount> {
        Self::update_reward(env, Some(user));
        let config = Self::load_config(env).ok();

        let mut claimed = Vec::new(env);
        for reward_token in Self::reward_tokens(env.clone()).iter() {
            let key = DataKey::UserReward(user.clone(), reward_token.clone());
            let mut state = Self::load_user_reward(env, user, &reward_token);
            if state.earned > 0 {
                if let Some(mut stream) = Self::load_stream(env, &reward_token) {
                    stream.balance -= state.earned;
                    Self::save_stream(env, &reward_token, &stream);
                }
                claimed.push_back(RewardAmount {
                    token: reward_token.clone(),
                    amount: state.earned,
                });
                state.earned = 0;
                env.storage().persistent().set(&key, &state);
            }
            if let Some(config) = config.as_ref() {
                Self::notify_unseen(env, config, &reward_token);
            }
        }
        claimed
    }

    fn pay_rewards(env: &Env, user: &Address, claimed: &Vec<RewardAmount>) {
        for reward in claimed.iter() {
            token::Client::new(env, &reward.token).transfer(
                &env.current_contract_address(),
                user,
                &reward.amount,
            );
            env.events()
                .publish((symbol_short!("rwd_paid"), user.clone()), reward);
        }
    }

    /// Send the net to the user and split the penalty between burn reserve and treasury.
    fn pay_out(env: &Env, config: &LedgerConfig, user: &Address, breakdown: &PenaltyBreakdown) {
        let reward_token = token::Client::new(env, &config.reward_token);
        let this = env.current_contract_address();
        if breakdown.amount > 0 {
            reward_token.transfer(&this, user, &breakdown.amount);
        }
        if breakdown.burn > 0 {
            reward_token.transfer(&this, &config.burn_reserve, &breakdown.burn);
        }
        let to_treasury = breakdown.penalty - breakdown.burn;
        if to_treasury > 0 {
            reward_token.transfer(&this, &config.treasury, &to_treasury);
        }
    }
}
