//! Cancellation reason type.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Errors that can occur when parsing a [`CancelReason`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ReasonError {
    /// The input is empty or whitespace only.
    #[error("cancellation reason cannot be empty")]
    Empty,
    /// The input is too long for the gateway's `cancelReason` field.
    #[error("cancellation reason must be at most {max} characters")]
    TooLong {
        /// Maximum allowed length in characters.
        max: usize,
    },
}

/// A non-empty, trimmed cancellation reason.
///
/// The reason is forwarded verbatim to the payment gateway, which caps the
/// field at 200 characters.
///
/// ## Examples
///
/// ```
/// use dosirak_core::CancelReason;
///
/// assert!(CancelReason::parse("단순 변심").is_ok());
/// assert!(CancelReason::parse("   ").is_err());
/// assert_eq!(CancelReason::parse("  sold out ").map(|r| r.into_inner()).ok(), Some("sold out".to_string()));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct CancelReason(String);

impl CancelReason {
    /// Maximum length of a reason in characters.
    pub const MAX_LENGTH: usize = 200;

    /// Parse a `CancelReason` from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the trimmed input is empty or longer than
    /// [`Self::MAX_LENGTH`] characters.
    pub fn parse(s: &str) -> Result<Self, ReasonError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(ReasonError::Empty);
        }

        if trimmed.chars().count() > Self::MAX_LENGTH {
            return Err(ReasonError::TooLong {
                max: Self::MAX_LENGTH,
            });
        }

        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the reason as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the reason and returns its inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CancelReason {
    type Error = ReasonError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CancelReason> for String {
    fn from(reason: CancelReason) -> Self {
        reason.0
    }
}

impl std::str::FromStr for CancelReason {
    type Err = ReasonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
