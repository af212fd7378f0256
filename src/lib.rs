//! MITM Crab
//!
//! A small DNS + HTTP(S) toolkit for intercepting the traffic of devices you own.
//!
//! The [DNS responder][dns] answers `A` queries with addresses of your choosing, steering a
//! device's lookups toward MITM Crab. The [HTTP listeners][http] then answer on ports 80 and 443
//! with canned [per-host content][content], presenting TLS certificates minted on the spot by a
//! [local root CA][tls] the device has been made to trust.
//!
//! Useful for studying or replacing the cloud services an IoT gadget talks to, pinning its
//! clock with a local NTP server, and similar [man-in-the-middle] work on your own network.
//!
//! [man-in-the-middle]: https://en.wikipedia.org/wiki/Man-in-the-middle_attack
//!
#![warn(clippy::pedantic)]

pub mod config;
pub mod content;
#[doc(hidden)]
pub mod crab;
pub mod dns;
pub mod error;
pub mod http;
pub mod tls;

pub use config::{Config, Shared};
pub use content::{FileContentStore, InMemoryContentStore};
pub use dns::new as new_dns;
pub use http::{router as new_http_router, DualListenerServer};
pub use tls::{CertificateAuthority, CertificateIssuer};
