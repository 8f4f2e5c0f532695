//! Network boundary for the offline controller.
//!
//! Requests and responses are modelled as plain values. A response body can be
//! read once by whoever owns the `Response`; anything that needs its own copy
//! takes an explicit [`Snapshot`] first.

mod client;
mod error;
mod request;

pub use client::{HttpNetwork, Network};
pub use error::FetchError;
pub use request::{Request, Response, Snapshot};
