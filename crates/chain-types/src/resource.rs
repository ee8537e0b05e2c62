//! Resource-billing objects shared between the types crate and the
//! resource-limits manager: account limits/usage records, the
//! fixed-point exponential moving average, and elastic block-limit
//! parameters.

use serde::{
    Deserialize,
    Serialize,
};

use crate::account::AccountName;

/// Sentinel value meaning "unlimited" wherever a limit field uses it
/// (`ram_bytes`, `net_weight`, `cpu_weight`).
pub const UNLIMITED: i64 = -1;

/// Fixed-point precision used by [`ExponentialAverage::value_ex`] and by
/// every computation that reads it (`RATE_LIMITING_PRECISION` in spec
/// §4.5).
pub const RATE_LIMITING_PRECISION: u64 = 1_000_000;

/// Per-account configured limits. `-1` in any `i64` field means
/// unlimited. The `pending` copy shadows the committed one until
/// `process_account_limit_updates` folds it in (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimitsObject {
    pub owner: AccountName,
    pub pending: bool,
    pub ram_bytes: i64,
    pub net_weight: i64,
    pub cpu_weight: i64,
}

impl ResourceLimitsObject {
    #[must_use]
    pub fn committed(owner: AccountName) -> Self {
        Self {
            owner,
            pending: false,
            ram_bytes: UNLIMITED,
            net_weight: UNLIMITED,
            cpu_weight: UNLIMITED,
        }
    }

    #[must_use]
    pub fn as_pending(mut self) -> Self {
        self.pending = true;
        self
    }
}

/// A windowed, fixed-point exponential moving average of a resource's
/// usage. `value_ex` is the accumulator scaled by
/// [`RATE_LIMITING_PRECISION`]; `consumed_value` is the last whole-unit
/// amount added for `add`'s decay computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExponentialAverage {
    pub last_ordinal: u32,
    pub value_ex: u64,
    pub consumed: u64,
}

impl ExponentialAverage {
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_ordinal: 0,
            value_ex: 0,
            consumed: 0,
        }
    }

    /// Folds `units` of new usage observed at time-slot `ordinal` into the
    /// average, decaying the prior value across `1 / window_size` of its
    /// weight per elapsed slot.
    pub fn add(&mut self, units: u64, ordinal: u32, window_size: u32) {
        let window_size = u64::from(window_size.max(1));
        if self.last_ordinal != ordinal {
            let elapsed = u64::from(ordinal.saturating_sub(self.last_ordinal));
            let decay = elapsed.min(window_size);
            self.value_ex = self
                .value_ex
                .saturating_mul(window_size.saturating_sub(decay))
                / window_size;
            self.last_ordinal = ordinal;
        }
        self.value_ex = self
            .value_ex
            .saturating_add(units.saturating_mul(RATE_LIMITING_PRECISION) / window_size);
        self.consumed = units;
    }

    /// The average's current value in whole units (undoes the
    /// [`RATE_LIMITING_PRECISION`] scaling).
    #[must_use]
    pub fn value(&self, window_size: u32) -> u64 {
        self.value_ex * u64::from(window_size.max(1)) / RATE_LIMITING_PRECISION
    }
}

impl Default for ExponentialAverage {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-account recorded consumption: the windowed CPU/NET averages plus
/// RAM usage in absolute bytes (not windowed; RAM has no decay).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsageObject {
    pub owner: AccountName,
    pub net_usage: ExponentialAverage,
    pub cpu_usage: ExponentialAverage,
    pub ram_usage: u64,
}

impl ResourceUsageObject {
    #[must_use]
    pub fn new(owner: AccountName) -> Self {
        Self {
            owner,
            net_usage: ExponentialAverage::new(),
            cpu_usage: ExponentialAverage::new(),
            ram_usage: 0,
        }
    }
}

/// Configuration for a block resource's elastic limit: it expands toward
/// `max` when recent usage is above `target` and contracts toward `target`
/// when usage is below it, clamped to `[target, max * max_multiplier]`
/// (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElasticLimitParameters {
    pub target: u64,
    pub max: u64,
    pub periods: u32,
    pub max_multiplier: u32,
    /// Irreducible numerator/denominator pair applied when usage is below
    /// target.
    pub contract_rate: (u64, u64),
    /// Irreducible numerator/denominator pair applied when usage is above
    /// target.
    pub expand_rate: (u64, u64),
}

/// Raised when an [`ElasticLimitParameters`] value fails validation.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ElasticLimitParametersError {
    #[error("target ({target}) must not exceed max ({max})")]
    TargetExceedsMax { target: u64, max: u64 },
    #[error("periods must be nonzero")]
    ZeroPeriods,
    #[error("rate denominator must be nonzero")]
    ZeroRateDenominator,
}

impl ElasticLimitParameters {
    /// Checks the structural invariants the spec requires of these
    /// parameters before they are accepted into configuration: a
    /// non-degenerate target/max ordering, a nonzero averaging window, and
    /// well-formed (non-zero-denominator) rate ratios.
    ///
    /// # Errors
    /// Returns the first [`ElasticLimitParametersError`] found.
    pub fn validate(&self) -> Result<(), ElasticLimitParametersError> {
        if self.target > self.max {
            return Err(ElasticLimitParametersError::TargetExceedsMax {
                target: self.target,
                max: self.max,
            });
        }
        if self.periods == 0 {
            return Err(ElasticLimitParametersError::ZeroPeriods);
        }
        if self.contract_rate.1 == 0 || self.expand_rate.1 == 0 {
            return Err(ElasticLimitParametersError::ZeroRateDenominator);
        }
        Ok(())
    }

    /// Applies one step of elastic adjustment to `current`: contracts
    /// toward `max` when `usage >= target` (the block is congested), else
    /// expands toward `max * max_multiplier`. Arithmetic widens to `u128`
    /// to avoid overflow on the multiply before dividing back down, per
    /// spec §4.5.
    #[must_use]
    pub fn update(&self, current: u64, usage: u64) -> u64 {
        let (num, den) = if usage >= self.target {
            self.contract_rate
        } else {
            self.expand_rate
        };
        let adjusted = (u128::from(current) * u128::from(num) / u128::from(den.max(1))) as u64;
        let floor = self.max;
        let ceiling = self.max.saturating_mul(u64::from(self.max_multiplier.max(1)));
        adjusted.clamp(floor, ceiling)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acct(name: &str) -> AccountName {
        name.parse().unwrap()
    }

    #[test]
    fn exponential_average_accumulates_within_a_single_slot() {
        let mut avg = ExponentialAverage::new();
        avg.add(100, 1, 10);
        assert_eq!(avg.value(10), 100);
    }

    #[test]
    fn exponential_average_decays_across_elapsed_slots() {
        let mut avg = ExponentialAverage::new();
        avg.add(100, 1, 10);
        avg.add(0, 11, 10);
        assert_eq!(avg.value(10), 0);
    }

    #[test]
    fn resource_usage_object_starts_at_zero() {
        let usage = ResourceUsageObject::new(acct("alice"));
        assert_eq!(usage.ram_usage, 0);
        assert_eq!(usage.cpu_usage.value_ex, 0);
    }

    #[test]
    fn elastic_limit_parameters_reject_target_above_max() {
        let params = ElasticLimitParameters {
            target: 100,
            max: 50,
            periods: 1,
            max_multiplier: 1,
            contract_rate: (99, 100),
            expand_rate: (1_000, 999),
        };
        assert_eq!(
            params.validate(),
            Err(ElasticLimitParametersError::TargetExceedsMax {
                target: 100,
                max: 50
            })
        );
    }

    #[test]
    fn elastic_limit_parameters_reject_zero_rate_denominator() {
        let params = ElasticLimitParameters {
            target: 10,
            max: 50,
            periods: 1,
            max_multiplier: 1,
            contract_rate: (99, 0),
            expand_rate: (1_000, 999),
        };
        assert_eq!(params.validate(), Err(ElasticLimitParametersError::ZeroRateDenominator));
    }

    #[test]
    fn elastic_limit_update_contracts_when_usage_meets_target() {
        let params = ElasticLimitParameters {
            target: 100,
            max: 1_000,
            periods: 1,
            max_multiplier: 4,
            contract_rate: (99, 100),
            expand_rate: (1_000, 999),
        };
        let next = params.update(2_000, 200);
        assert!(next < 2_000);
        assert!(next >= params.max);
    }

    #[test]
    fn elastic_limit_update_expands_when_usage_is_below_target() {
        let params = ElasticLimitParameters {
            target: 100,
            max: 1_000,
            periods: 1,
            max_multiplier: 100,
            contract_rate: (99, 100),
            expand_rate: (1_000, 999),
        };
        let next = params.update(10_000, 50);
        assert!(next > 10_000);
    }

    #[test]
    fn elastic_limit_update_never_drops_below_max() {
        let params = ElasticLimitParameters {
            target: 100,
            max: 1_000,
            periods: 1,
            max_multiplier: 4,
            contract_rate: (1, 1_000_000),
            expand_rate: (1_000, 999),
        };
        let next = params.update(0, 0);
        assert_eq!(next, params.max);
    }
}
