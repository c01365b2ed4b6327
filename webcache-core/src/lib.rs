#![forbid(unsafe_code, future_incompatible)]
#![deny(missing_debug_implementations, nonstandard_style, unused_extern_crates)]
//! The caching intermediary itself: the reservation protocol (§4.E), the
//! freshness engine (§4.F), response assembly (§4.G), and the request
//! handler that ties them together behind a [`tower::Service`] (§4.H).

mod assemble;
mod config;
mod fetch;
mod freshness;
mod handler;
mod reservation;

#[cfg(test)]
mod test_support;

pub use assemble::{status, AssembledResponse, STATUS_HEADER};
pub use config::Config;
pub use fetch::{FetchError, FetchedResponse, OriginFetcher};
pub use freshness::is_conditional_match;
pub use handler::{CacheHandler, ClientAddr};
