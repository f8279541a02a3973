//! Stand-ins for the price oracle and the lending market, for tests only.

use soroban_sdk::{contract, contractimpl, contracttype, Address, Env};

use crate::{LendingMarketInterface, PriceOracleInterface, PRICE_SCALE};

#[contracttype]
enum MockKey {
    LpPrice,
    AssetPrice(Address),
    Collateral(Address),
    Debt(Address),
}

#[contract]
pub struct MockPriceOracle;

#[contractimpl]
impl MockPriceOracle {
    pub fn set_lp_token_price(env: Env, price: i128) {
        env.storage().instance().set(&MockKey::LpPrice, &price);
    }

    pub fn set_asset_price(env: Env, asset: Address, price: i128) {
        env.storage().instance().set(&MockKey::AssetPrice(asset), &price);
    }
}

#[contractimpl]
impl PriceOracleInterface for MockPriceOracle {
    fn asset_price_usd(env: Env, asset: Address) -> i128 {
        env.storage()
            .instance()
            .get(&MockKey::AssetPrice(asset))
            .unwrap_or(PRICE_SCALE)
    }

    fn lp_token_price_usd(env: Env) -> i128 {
        env.storage()
            .instance()
            .get(&MockKey::LpPrice)
            .unwrap_or(PRICE_SCALE)
    }
}

#[contract]
pub struct MockLendingMarket;

#[contractimpl]
impl MockLendingMarket {
    pub fn set_collateral_value(env: Env, user: Address, value: i128) {
        env.storage().instance().set(&MockKey::Collateral(user), &value);
    }

    pub fn set_debt_value(env: Env, user: Address, value: i128) {
        env.storage().instance().set(&MockKey::Debt(user), &value);
    }
}

#[contractimpl]
impl LendingMarketInterface for MockLendingMarket {
    fn collateral_value_usd(env: Env, user: Address) -> i128 {
        env.storage()
            .instance()
            .get(&MockKey::Collateral(user))
            .unwrap_or(0)
    }

    fn debt_value_usd(env: Env, user: Address) -> i128 {
        env.storage().instance().get(&MockKey::Debt(user)).unwrap_or(0)
    }
}
