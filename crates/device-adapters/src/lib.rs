//! # Device Adapters
//!
//! Outbound side of the fleet: the HTTP client speaking to relay boxes and
//! the signer producing download links for the artifacts they fetch.

pub mod http_box;
pub mod links;

pub use http_box::{BoxClientConfig, HttpBoxClient};
pub use links::HmacLinkSigner;
