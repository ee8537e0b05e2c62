//! The billing engine that charges RAM bytes, CPU microseconds, and NET
//! bytes against per-account allotments computed from staked weights over
//! sliding windows.
//!
//! `ResourceLimitsManager` owns the committed and pending limits maps, the
//! per-account usage maps, and the elastic block-limit state. It has no
//! knowledge of transactions or actions; `chain-txcontext` calls into it at
//! the boundaries the spec names (`add_transaction_usage`,
//! `process_block_usage`, `add_pending_ram_usage`).

use std::collections::HashMap;

use chain_types::{
    account::AccountName,
    resource::{
        ElasticLimitParameters,
        ExponentialAverage,
        ResourceLimitsObject,
        ResourceUsageObject,
        RATE_LIMITING_PRECISION,
        UNLIMITED,
    },
};
use tracing::instrument;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ResourceLimitsError {
    #[error("account `{0}` exceeded its CPU allotment")]
    TxCpuUsageExceed(AccountName),
    #[error("account `{0}` exceeded its NET allotment")]
    TxNetUsageExceed(AccountName),
    #[error("RAM usage for `{account}` would exceed its quota of {quota} bytes (usage {usage})")]
    RamUsageExceeded {
        account: AccountName,
        usage: u64,
        quota: u64,
    },
    #[error("RAM usage for `{0}` underflowed below zero")]
    RamUsageUnderflow(AccountName),
}

/// `{target, max, periods, max_multiplier, contract_rate, expand_rate}` for
/// both the CPU and NET block resources.
#[derive(Debug, Clone, Copy)]
pub struct ElasticLimitConfig {
    pub cpu: ElasticLimitParameters,
    pub net: ElasticLimitParameters,
}

/// Per-account window sizes (in time slots) used by the exponential moving
/// average. Configured once, shared by every account.
#[derive(Debug, Clone, Copy)]
pub struct WindowConfig {
    pub cpu_window: u32,
    pub net_window: u32,
}

#[derive(Debug, Default, Clone, Copy)]
struct BlockUsageAccumulator {
    cpu_us: u64,
    net_bytes: u64,
}

/// The billing engine. One instance per node; long-lived across blocks.
pub struct ResourceLimitsManager {
    committed_limits: HashMap<AccountName, ResourceLimitsObject>,
    pending_limits: HashMap<AccountName, ResourceLimitsObject>,
    usage: HashMap<AccountName, ResourceUsageObject>,
    windows: WindowConfig,
    elastic: ElasticLimitConfig,
    virtual_cpu_limit: u64,
    virtual_net_limit: u64,
    pending_block_usage: BlockUsageAccumulator,
    total_cpu_weight: i64,
    total_net_weight: i64,
}

impl ResourceLimitsManager {
    #[must_use]
    pub fn new(windows: WindowConfig, elastic: ElasticLimitConfig) -> Self {
        Self {
            committed_limits: HashMap::new(),
            pending_limits: HashMap::new(),
            usage: HashMap::new(),
            windows,
            virtual_cpu_limit: elastic.cpu.max,
            virtual_net_limit: elastic.net.max,
            elastic,
            pending_block_usage: BlockUsageAccumulator::default(),
            total_cpu_weight: 0,
            total_net_weight: 0,
        }
    }

    fn committed_or_default(&self, account: AccountName) -> ResourceLimitsObject {
        self.committed_limits
            .get(&account)
            .copied()
            .unwrap_or_else(|| ResourceLimitsObject::committed(account))
    }

    /// Mutates the pending copy of `account`'s limits, creating it from the
    /// committed copy if absent. Returns whether RAM was decreased, so the
    /// caller can immediately re-verify current usage against the new
    /// quota.
    #[instrument(skip(self))]
    pub fn set_account_limits(
        &mut self,
        account: AccountName,
        ram_bytes: i64,
        net_weight: i64,
        cpu_weight: i64,
    ) -> bool {
        let before = self
            .pending_limits
            .get(&account)
            .copied()
            .unwrap_or_else(|| self.committed_or_default(account));
        let decreased_ram = before.ram_bytes != UNLIMITED
            && (ram_bytes == UNLIMITED || ram_bytes < before.ram_bytes);
        let mut next = before;
        next.pending = true;
        next.ram_bytes = ram_bytes;
        next.net_weight = net_weight;
        next.cpu_weight = cpu_weight;
        self.pending_limits.insert(account, next);
        decreased_ram
    }

    /// Folds every pending limit change into the committed map, updating
    /// `total_cpu_weight`/`total_net_weight` for the accounts whose weight
    /// changed. Called once per block.
    #[instrument(skip(self))]
    pub fn process_account_limit_updates(&mut self) {
        for (account, pending) in self.pending_limits.drain() {
            let before = self
                .committed_limits
                .get(&account)
                .copied()
                .unwrap_or_else(|| ResourceLimitsObject::committed(account));
            self.total_cpu_weight -= before.cpu_weight.max(0);
            self.total_cpu_weight += pending.cpu_weight.max(0);
            self.total_net_weight -= before.net_weight.max(0);
            self.total_net_weight += pending.net_weight.max(0);
            let mut committed = pending;
            committed.pending = false;
            self.committed_limits.insert(account, committed);
        }
    }

    fn usage_mut(&mut self, account: AccountName) -> &mut ResourceUsageObject {
        self.usage
            .entry(account)
            .or_insert_with(|| ResourceUsageObject::new(account))
    }

    /// Charges `cpu_us` CPU and `net_bytes` NET against every account in
    /// `accounts`, failing the first account whose share of the virtual
    /// capacity (proportional to its staked weight) is exceeded.
    ///
    /// # Errors
    /// Returns [`ResourceLimitsError::TxCpuUsageExceed`] or
    /// [`ResourceLimitsError::TxNetUsageExceed`] naming the offending
    /// account.
    #[instrument(skip(self, accounts))]
    pub fn add_transaction_usage(
        &mut self,
        accounts: &[AccountName],
        cpu_us: u64,
        net_bytes: u64,
        block_time_slot: u32,
    ) -> Result<(), ResourceLimitsError> {
        for &account in accounts {
            let limits = self.committed_or_default(account);
            let cpu_window = self.windows.cpu_window;
            let net_window = self.windows.net_window;
            let usage = self.usage_mut(account);
            usage.cpu_usage.add(cpu_us, block_time_slot, cpu_window);
            usage.net_usage.add(net_bytes, block_time_slot, net_window);

            if limits.cpu_weight >= 0 && self.total_cpu_weight > 0 {
                let virtual_capacity = self.virtual_cpu_limit * u64::from(cpu_window);
                let used = usage.cpu_usage.value_ex * u64::from(cpu_window) / RATE_LIMITING_PRECISION;
                let max_for_user =
                    virtual_capacity * limits.cpu_weight as u64 / self.total_cpu_weight as u64;
                if used > max_for_user {
                    return Err(ResourceLimitsError::TxCpuUsageExceed(account));
                }
            }
            if limits.net_weight >= 0 && self.total_net_weight > 0 {
                let virtual_capacity = self.virtual_net_limit * u64::from(net_window);
                let used = usage.net_usage.value_ex * u64::from(net_window) / RATE_LIMITING_PRECISION;
                let max_for_user =
                    virtual_capacity * limits.net_weight as u64 / self.total_net_weight as u64;
                if used > max_for_user {
                    return Err(ResourceLimitsError::TxNetUsageExceed(account));
                }
            }
        }
        self.pending_block_usage.cpu_us += cpu_us;
        self.pending_block_usage.net_bytes += net_bytes;
        Ok(())
    }

    /// Folds this block's accumulated usage into the elastic virtual
    /// limits: expands toward `max` when usage is at or above target,
    /// contracts toward `target` otherwise.
    #[instrument(skip(self))]
    pub fn process_block_usage(&mut self) {
        self.virtual_cpu_limit = self
            .elastic
            .cpu
            .update(self.virtual_cpu_limit, self.pending_block_usage.cpu_us);
        self.virtual_net_limit = self
            .elastic
            .net
            .update(self.virtual_net_limit, self.pending_block_usage.net_bytes);
        self.pending_block_usage = BlockUsageAccumulator::default();
    }

    #[must_use]
    pub fn virtual_cpu_limit(&self) -> u64 {
        self.virtual_cpu_limit
    }

    #[must_use]
    pub fn virtual_net_limit(&self) -> u64 {
        self.virtual_net_limit
    }

    /// Adjusts `account`'s RAM usage by `delta` and verifies the result
    /// against its quota.
    ///
    /// # Errors
    /// Returns [`ResourceLimitsError::RamUsageUnderflow`] if `delta` would
    /// drive usage below zero, or
    /// [`ResourceLimitsError::RamUsageExceeded`] if the result exceeds a
    /// finite quota.
    #[instrument(skip(self))]
    pub fn add_pending_ram_usage(&mut self, account: AccountName, delta: i64) -> Result<(), ResourceLimitsError> {
        let usage = self.usage_mut(account);
        let new_usage = i64::try_from(usage.ram_usage)
            .expect("ram usage fits in i64 for any realistic account")
            .checked_add(delta)
            .ok_or(ResourceLimitsError::RamUsageUnderflow(account))?;
        if new_usage < 0 {
            return Err(ResourceLimitsError::RamUsageUnderflow(account));
        }
        usage.ram_usage = new_usage as u64;
        self.verify_account_ram_usage(account)?;
        Ok(())
    }

    /// Asserts `account`'s usage does not exceed its quota, when the quota
    /// is finite.
    ///
    /// # Errors
    /// Returns [`ResourceLimitsError::RamUsageExceeded`] if usage exceeds a
    /// finite quota.
    pub fn verify_account_ram_usage(&self, account: AccountName) -> Result<(), ResourceLimitsError> {
        let limits = self.committed_or_default(account);
        if limits.ram_bytes == UNLIMITED {
            return Ok(());
        }
        let usage = self.usage.get(&account).map_or(0, |u| u.ram_usage);
        let quota = limits.ram_bytes as u64;
        if usage > quota {
            return Err(ResourceLimitsError::RamUsageExceeded {
                account,
                usage,
                quota,
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn usage_of(&self, account: AccountName) -> ResourceUsageObject {
        self.usage
            .get(&account)
            .copied()
            .unwrap_or_else(|| ResourceUsageObject::new(account))
    }

    #[must_use]
    pub fn limits_of(&self, account: AccountName) -> ResourceLimitsObject {
        self.pending_limits
            .get(&account)
            .copied()
            .unwrap_or_else(|| self.committed_or_default(account))
    }
}
