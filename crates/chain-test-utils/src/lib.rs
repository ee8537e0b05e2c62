//! A disposable, in-memory [`Controller`] fixture for integration tests,
//! modeled on the `Fixture`/`with_*` builder pattern used throughout this
//! workspace's own test suites.

use std::time::{
    Duration,
    Instant,
};

use chain_controller::Controller;
use chain_resource_limits::{
    ElasticLimitConfig,
    ResourceLimitsManager,
    WindowConfig,
};
use chain_types::{
    account::AccountName,
    block::{
        BlockHeader,
        BlockState,
        BlockStatus,
    },
    resource::ElasticLimitParameters,
    transaction::SignedTransaction,
};

/// Default elastic-limit parameters generous enough that ordinary test
/// transactions never trip a resource ceiling.
#[must_use]
pub fn generous_elastic_limits() -> ElasticLimitParameters {
    ElasticLimitParameters {
        target: 10_000,
        max: 100_000,
        periods: 1,
        max_multiplier: 1_000,
        contract_rate: (99, 100),
        expand_rate: (1_000, 999),
    }
}

#[must_use]
pub fn generous_resource_limits() -> ResourceLimitsManager {
    let params = generous_elastic_limits();
    ResourceLimitsManager::new(
        WindowConfig {
            cpu_window: 86_400,
            net_window: 86_400,
        },
        ElasticLimitConfig {
            cpu: params,
            net: params,
        },
    )
}

#[must_use]
pub fn genesis_state() -> BlockState {
    let header = BlockHeader {
        timestamp: 0,
        producer: "eosio".parse().expect("`eosio` is a valid account name"),
        confirmed: 0,
        previous: [0; 32],
        transaction_mroot: [0; 32],
        action_mroot: [0; 32],
        schedule_version: 0,
        block_num: 0,
    };
    let block_id = header.id();
    BlockState {
        header,
        block_id,
        block_num: 0,
        active_schedule_version: 0,
        pending_schedule_version: None,
        dpos_irreversible_blocknum: 0,
        bft_irreversible_blocknum: 0,
        trxs: Vec::new(),
        validated: true,
        in_current_chain: true,
    }
}

/// Wraps a fresh [`Controller`] with a genesis block and generous
/// resource limits, and carries the handful of test accounts callers
/// register through [`Fixture::create_account`].
pub struct Fixture {
    pub controller: Controller,
    next_timestamp: u32,
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}

impl Fixture {
    #[must_use]
    pub fn new() -> Self {
        Self {
            controller: Controller::new(genesis_state(), generous_resource_limits()),
            next_timestamp: 1,
        }
    }

    pub fn create_account(&mut self, name: &str) -> AccountName {
        let account = name.parse().expect("test account name must be a valid AccountName");
        self.controller.accounts_mut().create_account(account);
        account
    }

    /// Runs `start_block` / `finalize_block` / `sign_block` / `commit_block`
    /// back to back with a test producer and no peer signature, returning
    /// the committed block id. Callers push transactions from within
    /// `build` before this returns.
    pub fn produce_block(&mut self, build: impl FnOnce(&mut Controller)) -> [u8; 32] {
        let when = self.next_timestamp;
        self.next_timestamp += 1;
        self.controller
            .start_block(when, 0, BlockStatus::Complete, "eosio".parse().unwrap())
            .expect("start_block should succeed against a fresh fixture");
        build(&mut self.controller);
        self.controller.finalize_block().expect("finalize_block should succeed");
        self.controller
            .sign_block(|_id| "SIG_K1_fixture".to_string())
            .expect("sign_block should succeed");
        self.controller.commit_block(true).expect("commit_block should succeed")
    }

    #[must_use]
    pub fn default_deadline() -> Instant {
        Instant::now() + Duration::from_secs(1)
    }
}

/// A minimal, zero-authorization transfer-shaped transaction builder for
/// tests that only care about dispatch mechanics, not a real contract's
/// wire format.
#[must_use]
pub fn sample_transaction(account: &str, name: &str, data: Vec<u8>) -> SignedTransaction {
    SignedTransaction {
        expiration: u32::MAX,
        ref_block_num: 0,
        ref_block_prefix: 0,
        max_net_usage_words: 1_000,
        max_cpu_usage_ms: 0,
        delay_sec: 0,
        context_free_actions: Vec::new(),
        actions: vec![chain_types::action::Action::new(
            account.parse().expect("valid account name"),
            name.parse().expect("valid action name"),
            data,
        )],
        extensions: bytes::Bytes::new(),
        signatures: Vec::new(),
        context_free_data: bytes::Bytes::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produce_block_advances_from_genesis() {
        let mut fixture = Fixture::new();
        let block_id = fixture.produce_block(|_controller| {});
        assert_eq!(fixture.controller.head().block_id, block_id);
        assert_eq!(fixture.controller.head().block_num, 1);
    }

    #[test]
    fn create_account_registers_it_with_the_controller() {
        let mut fixture = Fixture::new();
        let alice = fixture.create_account("alice");
        assert!(fixture.controller.accounts_mut().account_exists(alice));
    }
}
