//! REST access to the exchange API.
//!
//! [`RequestSigner`] turns endpoint parameters into fully described
//! requests (public, key-authenticated or HMAC-signed) and
//! [`ExchangeClient`] executes them.

pub mod client;
pub mod error;
pub mod signer;
pub mod types;

pub use client::ExchangeClient;
pub use error::{RestError, RestResult};
pub use signer::{encode_component, Credentials, RequestDescriptor, RequestSigner, API_KEY_HEADER};
pub use types::{AccountBalance, AccountInfo, ListenKeyResponse, Ticker24hr};
