//! Core traits for the alternative routing system
//!
//! The core only talks to the network and to disk through these seams.
//!
//! - [`DohProvider`]: one DNS-over-HTTPS resolver endpoint
//! - [`ProxyStore`]: persistence for the known-working proxy records
//! - [`TransportConnector`] / [`TransportClient`]: pinned HTTPS clients bound to one domain

pub mod doh_provider;
pub mod proxy_store;
pub mod transport;

pub use doh_provider::{DohProvider, DohProviderFactory};
pub use proxy_store::{ProxyRecord, ProxyStore};
pub use transport::{ApiRequest, ApiResponse, HttpMethod, TransportClient, TransportConnector};
