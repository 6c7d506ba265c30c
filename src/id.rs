//! Newtypes around Discord IDs.
//!
//! Discord transmits snowflakes as decimal strings; these types serialize
//! the same way, and accept either strings or raw integers when parsing.

use serde::{
    de::{Deserializer, Error as DeError},
    Deserialize,
    Serialize,
    Serializer,
};
use std::fmt::{Display, Formatter, Result as FmtResult};

macro_rules! impl_id {
    ($Id:ident) => {
        impl $Id {
            /// Returns the u64 representation of this Id.
            #[must_use]
            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl Display for $Id {
            fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
                Display::fmt(&self.0, f)
            }
        }

        impl From<u64> for $Id {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }

        impl From<$Id> for u64 {
            fn from(id: $Id) -> Self {
                id.0
            }
        }

        impl Serialize for $Id {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $Id {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                match RawId::deserialize(deserializer)? {
                    RawId::Num(n) => Ok(Self(n)),
                    RawId::Str(s) => s.parse().map(Self).map_err(D::Error::custom),
                }
            }
        }
    };
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Num(u64),
    Str(String),
}

/// ID of a Discord guild (colloquially, "server").
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct GuildId(pub u64);

/// ID of a Discord user.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct UserId(pub u64);

impl_id!(GuildId);
impl_id!(UserId);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ids_serialize_as_strings() {
        let json = serde_json::to_string(&GuildId(81_384_788_765_712_384)).unwrap();
        assert_eq!(json, "\"81384788765712384\"");
    }

    #[test]
    fn ids_parse_from_strings_or_numbers() {
        let a: UserId = serde_json::from_str("\"1234\"").unwrap();
        let b: UserId = serde_json::from_str("1234").unwrap();

        assert_eq!(a, b);
        assert!(serde_json::from_str::<UserId>("\"12ab\"").is_err());
    }
}
