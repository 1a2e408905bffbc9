//! Identifiers for chat groups, chat users and billing accounts.
//!
//! Chat platforms report ids as numbers in some payloads and strings in others,
//! so every id is stored as a string and compared textually.

use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(CompactString);

        impl $name {
            pub fn new(id: impl AsRef<str>) -> Self {
                Self(CompactString::new(id.as_ref().trim()))
            }

            #[inline]
            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }

            #[inline]
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self::new(id)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self::new(id)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(CompactString::new(id.to_string()))
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                self.as_str()
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }
    };
}

string_id!(
    /// Chat group identifier. One persisted document exists per group.
    GroupId
);

string_id!(
    /// Chat user identifier, unique within the chat platform.
    UserId
);

string_id!(
    /// External billing-system account identifier (the `openId`).
    AccountId
);
