//! Account and permission names.
//!
//! Names are packed into a `u64` the same way as the rest of the account
//! graph (payers, receivers, table scopes): a base-32 alphabet of 32
//! symbols, up to 12 five-bit symbols followed by one four-bit symbol,
//! left-aligned into the 64-bit word. This keeps every name comparison and
//! hash a single integer operation instead of a string compare.

use std::{
    fmt,
    str::FromStr,
};

use bytes::{
    Buf,
    BufMut,
};
use serde::{
    Deserialize,
    Serialize,
};

use crate::wire::{
    Decode,
    Encode,
    WireError,
};

const CHARMAP: &[u8; 32] = b".12345abcdefghijklmnopqrstuvwxyz";
const MAX_NAME_LENGTH: usize = 13;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("account name `{0}` is longer than 13 characters")]
    TooLong(String),
    #[error("account name `{0}` contains a character outside `.12345a-z`")]
    InvalidCharacter(String),
    #[error(
        "the 13th character of account name `{0}` must be one of the first 16 symbols of the \
         name charmap (`.12345abcdefghij`)"
    )]
    InvalidThirteenthCharacter(String),
}

/// A validated account, permission, or table-scope name.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountName(u64);

impl AccountName {
    /// Constructs an `AccountName` from an already-packed `u64` without
    /// validating that it round-trips through the base-32 charmap.
    ///
    /// Used when the value is known-good, e.g. read back from state.
    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    fn char_to_symbol(c: u8) -> Option<u64> {
        CHARMAP.iter().position(|&x| x == c).map(|pos| pos as u64)
    }

    fn symbol_to_char(symbol: u64) -> u8 {
        CHARMAP[symbol as usize]
    }
}

impl FromStr for AccountName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() > MAX_NAME_LENGTH {
            return Err(Error::TooLong(s.to_string()));
        }
        let bytes = s.as_bytes();
        let mut value: u64 = 0;
        for i in 0..MAX_NAME_LENGTH {
            let mut symbol = 0_u64;
            if i < bytes.len() {
                symbol = Self::char_to_symbol(bytes[i])
                    .ok_or_else(|| Error::InvalidCharacter(s.to_string()))?;
            }
            if i < 12 {
                value |= (symbol & 0x1f) << (64 - 5 * (i + 1));
            } else {
                if symbol > 0x0f {
                    return Err(Error::InvalidThirteenthCharacter(s.to_string()));
                }
                value |= symbol & 0x0f;
            }
        }
        Ok(Self(value))
    }
}

impl fmt::Display for AccountName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut chars = [b'.'; MAX_NAME_LENGTH];
        let mut value = self.0;
        // The 13th (least significant) character holds 4 bits, all others 5.
        chars[12] = Self::symbol_to_char(value & 0x0f);
        value >>= 4;
        for slot in chars.iter_mut().take(12).rev() {
            *slot = Self::symbol_to_char(value & 0x1f);
            value >>= 5;
        }
        let s = std::str::from_utf8(&chars).expect("charmap is ascii");
        f.write_str(s.trim_end_matches('.'))
    }
}

impl fmt::Debug for AccountName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountName({self})")
    }
}

impl Encode for AccountName {
    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u64_le(self.0);
    }
}

impl Decode for AccountName {
    fn decode(buf: &mut impl Buf) -> crate::wire::Result<Self> {
        if buf.remaining() < 8 {
            return Err(WireError::UnexpectedEof("AccountName"));
        }
        Ok(Self(buf.get_u64_le()))
    }
}

/// A permission attached to an action's authorization list, e.g. `(alice,
/// active)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionLevel {
    pub actor: AccountName,
    pub permission: AccountName,
}

impl PermissionLevel {
    #[must_use]
    pub fn new(actor: AccountName, permission: AccountName) -> Self {
        Self {
            actor,
            permission,
        }
    }

    /// The implicit permission granted to a contract over its own inline
    /// actions: `(receiver, eosio.code)`.
    #[must_use]
    pub fn code_permission(receiver: AccountName) -> Self {
        Self {
            actor: receiver,
            permission: "eosio.code".parse().expect("eosio.code is a valid name"),
        }
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.actor, self.permission)
    }
}

impl Encode for PermissionLevel {
    fn encode(&self, buf: &mut impl BufMut) {
        self.actor.encode(buf);
        self.permission.encode(buf);
    }
}

impl Decode for PermissionLevel {
    fn decode(buf: &mut impl Buf) -> crate::wire::Result<Self> {
        Ok(Self {
            actor: AccountName::decode(buf)?,
            permission: AccountName::decode(buf)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_display() {
        for name in ["alice", "eosio", "eosio.code", "a", "12345abcdefj"] {
            let parsed: AccountName = name.parse().unwrap();
            assert_eq!(parsed.to_string(), name, "{name} did not round-trip");
        }
    }

    #[test]
    fn rejects_names_over_thirteen_characters() {
        assert_eq!(
            "toolongtoolongtoolong".parse::<AccountName>(),
            Err(Error::TooLong("toolongtoolongtoolong".to_string()))
        );
    }

    #[test]
    fn rejects_invalid_characters() {
        assert!(matches!(
            "ALICE".parse::<AccountName>(),
            Err(Error::InvalidCharacter(_))
        ));
    }

    #[test]
    fn rejects_thirteenth_character_outside_low_range() {
        // 'z' (symbol 31) is not allowed in the 13th position (max 0x0f = 15).
        assert!(matches!(
            "123456789012z".parse::<AccountName>(),
            Err(Error::InvalidThirteenthCharacter(_))
        ));
    }

    #[test]
    fn distinct_names_pack_to_distinct_values() {
        let a: AccountName = "alice".parse().unwrap();
        let b: AccountName = "bob".parse().unwrap();
        assert_ne!(a.as_u64(), b.as_u64());
    }

    #[test]
    fn account_name_encode_decode_round_trips() {
        let name: AccountName = "alice".parse().unwrap();
        let mut buf = Vec::new();
        name.encode(&mut buf);
        let mut slice = buf.as_slice();
        assert_eq!(AccountName::decode(&mut slice).unwrap(), name);
    }

    #[test]
    fn code_permission_is_eosio_code() {
        let receiver: AccountName = "token".parse().unwrap();
        let level = PermissionLevel::code_permission(receiver);
        assert_eq!(level.actor, receiver);
        assert_eq!(level.permission.to_string(), "eosio.code");
    }
}
