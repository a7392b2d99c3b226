#![forbid(unsafe_code, clippy::unwrap_used)]
#![allow(clippy::needless_return)]
#![warn(clippy::await_holding_lock, clippy::inefficient_to_string)]

mod filter;
mod op;
mod value;

pub use filter::{ParseError, ParsedFilter, parse_filter};
pub use op::Op;
pub use value::{FilterValue, Scalar};
