//! Proposed-producer-schedule hand-off. The scheduling algorithm itself
//! (which producer signs which slot) is explicitly out of scope; this
//! only validates and versions a proposed producer list.

use std::collections::HashSet;

use chain_types::account::AccountName;
use thiserror::Error;

pub const MAX_PRODUCERS: usize = 21;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerAuthority {
    pub account: AccountName,
    /// Legacy-format EOS public key text. Signature verification and key
    /// recovery are the external cryptographic collaborator's job; this
    /// crate only checks the key is well-formed.
    pub key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProducerSchedule {
    pub version: u32,
    pub producers: Vec<ProducerAuthority>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("proposed schedule has {0} producers, exceeding the maximum of {MAX_PRODUCERS}")]
    TooManyProducers(usize),
    #[error("account `{0}` does not exist")]
    UnknownAccount(AccountName),
    #[error("`{0}` is not a well-formed producer key")]
    InvalidKey(String),
    #[error("proposed schedule contains a duplicate producer `{0}`")]
    DuplicateProducer(AccountName),
    #[error("proposed schedule is identical to the current pending or active schedule")]
    Unchanged,
}

impl ProducerSchedule {
    /// Validates `producers` against `self` (the active schedule) and
    /// `pending`, returning the next schedule version on success.
    ///
    /// # Errors
    /// See [`ScheduleError`] variants.
    pub fn propose(
        &self,
        pending: Option<&ProducerSchedule>,
        producers: Vec<ProducerAuthority>,
        account_exists: impl Fn(AccountName) -> bool,
    ) -> Result<ProducerSchedule, ScheduleError> {
        if producers.len() > MAX_PRODUCERS {
            return Err(ScheduleError::TooManyProducers(producers.len()));
        }
        let mut seen = HashSet::new();
        for producer in &producers {
            if !account_exists(producer.account) {
                return Err(ScheduleError::UnknownAccount(producer.account));
            }
            if !is_well_formed_key(&producer.key) {
                return Err(ScheduleError::InvalidKey(producer.key.clone()));
            }
            if !seen.insert(producer.account) {
                return Err(ScheduleError::DuplicateProducer(producer.account));
            }
        }
        if producers == self.producers || pending.is_some_and(|p| p.producers == producers) {
            return Err(ScheduleError::Unchanged);
        }
        Ok(ProducerSchedule {
            version: self.version + 1,
            producers,
        })
    }
}

fn is_well_formed_key(key: &str) -> bool {
    key.starts_with("EOS") && (50..=53).contains(&key.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acct(name: &str) -> AccountName {
        name.parse().unwrap()
    }

    fn authority(account: &str) -> ProducerAuthority {
        ProducerAuthority {
            account: acct(account),
            key: format!("EOS{}", "A".repeat(50)),
        }
    }

    #[test]
    fn propose_rejects_more_than_max_producers() {
        let schedule = ProducerSchedule::default();
        let producers = (0..MAX_PRODUCERS + 1).map(|i| authority(&format!("p{i}"))).collect();
        assert_eq!(
            schedule.propose(None, producers, |_| true),
            Err(ScheduleError::TooManyProducers(MAX_PRODUCERS + 1))
        );
    }

    #[test]
    fn propose_rejects_an_unknown_account() {
        let schedule = ProducerSchedule::default();
        let result = schedule.propose(None, vec![authority("alice")], |_| false);
        assert_eq!(result, Err(ScheduleError::UnknownAccount(acct("alice"))));
    }

    #[test]
    fn propose_rejects_duplicates() {
        let schedule = ProducerSchedule::default();
        let result = schedule.propose(None, vec![authority("alice"), authority("alice")], |_| true);
        assert_eq!(result, Err(ScheduleError::DuplicateProducer(acct("alice"))));
    }

    #[test]
    fn propose_rejects_a_schedule_identical_to_the_active_one() {
        let schedule = ProducerSchedule {
            version: 3,
            producers: vec![authority("alice")],
        };
        let result = schedule.propose(None, vec![authority("alice")], |_| true);
        assert_eq!(result, Err(ScheduleError::Unchanged));
    }

    #[test]
    fn propose_accepts_and_bumps_the_version() {
        let schedule = ProducerSchedule {
            version: 3,
            producers: vec![authority("alice")],
        };
        let result = schedule.propose(None, vec![authority("bob")], |_| true).unwrap();
        assert_eq!(result.version, 4);
    }
}
