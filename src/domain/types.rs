//! Identifiers and small value types shared across layers.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use super::error::DomainError;

/// Identifier of a registered user (an actor or a follow target).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(i64);

/// Identifier of a note, the subject of likes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoteId(i64);

macro_rules! positive_id {
    ($ty:ident, $entity:literal, $field:literal) => {
        impl $ty {
            pub fn new(value: i64) -> Result<Self, DomainError> {
                if value <= 0 {
                    return Err(DomainError::invalid(
                        $field,
                        format!("{} id must be positive, got {value}", $entity),
                    ));
                }
                Ok(Self(value))
            }

            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $ty {
            type Err = DomainError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                let parsed = value.trim().parse::<i64>().map_err(|err| {
                    DomainError::invalid($field, format!("`{value}` is not a {} id: {err}", $entity))
                })?;
                Self::new(parsed)
            }
        }
    };
}

positive_id!(UserId, "user", "user_id");
positive_id!(NoteId, "note", "note_id");

/// Result of toggling a like, reported back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LikeOutcome {
    Liked,
    Unliked,
}

impl LikeOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            LikeOutcome::Liked => "liked",
            LikeOutcome::Unliked => "unliked",
        }
    }
}
