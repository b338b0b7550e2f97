use std::num::NonZeroU64;
use std::str::FromStr;

use thiserror::Error;

use crate::limiter::RateLimiter;

/// Parsed maximum transmission rate in bits per second.
///
/// `0` disables throttling. Decimal suffixes `K`, `M`, and `G` scale by
/// 1000, so `"500K"` is 500 000 bits per second.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MaxRate {
    bits_per_second: Option<NonZeroU64>,
}

impl MaxRate {
    /// Returns a rate that disables throttling.
    #[must_use]
    pub const fn unlimited() -> Self {
        Self {
            bits_per_second: None,
        }
    }

    /// Returns the configured bits-per-second rate, if any.
    #[must_use]
    pub const fn bits_per_second(&self) -> Option<NonZeroU64> {
        self.bits_per_second
    }

    /// Indicates whether throttling is disabled.
    #[must_use]
    pub const fn is_unlimited(&self) -> bool {
        self.bits_per_second.is_none()
    }

    /// Converts the parsed rate into a session limiter, if throttling is
    /// enabled.
    #[must_use]
    pub fn to_limiter(self) -> Option<RateLimiter> {
        self.bits_per_second.map(RateLimiter::new)
    }
}

impl FromStr for MaxRate {
    type Err = RateParseError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let text = text.trim();
        if text.is_empty() {
            return Err(RateParseError::Empty);
        }

        let (digits, multiplier) = match text.as_bytes().last() {
            Some(b'k' | b'K') => (&text[..text.len() - 1], 1_000u64),
            Some(b'm' | b'M') => (&text[..text.len() - 1], 1_000_000),
            Some(b'g' | b'G') => (&text[..text.len() - 1], 1_000_000_000),
            _ => (text, 1),
        };

        let value: u64 = digits
            .parse()
            .map_err(|_| RateParseError::InvalidNumber(text.to_owned()))?;
        let bits = value
            .checked_mul(multiplier)
            .ok_or_else(|| RateParseError::Overflow(text.to_owned()))?;

        Ok(Self {
            bits_per_second: NonZeroU64::new(bits),
        })
    }
}

/// Error produced when a rate argument cannot be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RateParseError {
    /// The argument was empty.
    #[error("max rate value is empty")]
    Empty,

    /// The numeric portion was not a base-10 integer.
    #[error("invalid max rate '{0}': expected digits with an optional K/M/G suffix")]
    InvalidNumber(String),

    /// The scaled value does not fit in 64 bits.
    #[error("max rate '{0}' is out of range")]
    Overflow(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn plain_number_is_bits_per_second() {
        let rate: MaxRate = "4096".parse().expect("parse");
        assert_eq!(rate.bits_per_second().map(NonZeroU64::get), Some(4096));
    }

    #[test]
    fn suffixes_scale_decimally() {
        for (text, expected) in [
            ("1K", 1_000u64),
            ("500k", 500_000),
            ("2M", 2_000_000),
            ("1g", 1_000_000_000),
        ] {
            let rate: MaxRate = text.parse().expect("parse");
            assert_eq!(
                rate.bits_per_second().map(NonZeroU64::get),
                Some(expected),
                "{text}"
            );
        }
    }

    #[test]
    fn zero_means_unlimited() {
        let rate: MaxRate = "0".parse().expect("parse");
        assert!(rate.is_unlimited());
        assert!(rate.to_limiter().is_none());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!("".parse::<MaxRate>().is_err());
        assert!("fast".parse::<MaxRate>().is_err());
        assert!("1.5M".parse::<MaxRate>().is_err());
        assert!("K".parse::<MaxRate>().is_err());
    }

    #[test]
    fn overflow_is_rejected() {
        assert_eq!(
            format!("{}G", u64::MAX / 2).parse::<MaxRate>(),
            Err(RateParseError::Overflow(format!("{}G", u64::MAX / 2)))
        );
    }

    proptest! {
        #[test]
        fn any_plain_u64_parses_back(value in 1u64..=u64::MAX) {
            let rate: MaxRate = value.to_string().parse().expect("parse");
            prop_assert_eq!(rate.bits_per_second().map(NonZeroU64::get), Some(value));
        }
    }
}
