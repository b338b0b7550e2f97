#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! `bandwidth` provides the optional transmission throttle: parsing of the
//! `--max-rate` option and the limiter that paces sends so the cumulative
//! average bitrate over the whole session never exceeds the configured
//! maximum. The limiter smooths bursts only through that lifetime average; it
//! is deliberately not a windowed or token-bucket scheme.

mod limiter;
mod parse;

pub use limiter::{interruptible_sleep, RateLimiter};
pub use parse::{MaxRate, RateParseError};
