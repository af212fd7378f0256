//! DNS responder.
//!
//! MITM Crab answers `A` queries over UDP with addresses of the operator's choosing, steering
//! clients toward the [HTTP/TLS listeners][crate::http]. Every other query type gets an empty
//! `NOERROR` response.
//!
//! # Answer Selection
//!
//! A query name is looked up, case-insensitively, in
//! [`DnsConfig::records`][`crate::config::DnsConfig::records`]. When it isn't there the fallback
//! rules are tried in order, and the first match supplies the address:
//!
//! 1. [`DnsConfig::ntp`][`crate::config::DnsConfig::ntp`]: any name containing `ntp`.
//! 2. each entry of
//!    [`DnsConfig::keyword_fallbacks`][`crate::config::DnsConfig::keyword_fallbacks`], in order.
//! 3. [`DnsConfig::wildcard`][`crate::config::DnsConfig::wildcard`]: any name at all.
//!
//! When nothing matches the response carries no answers. The responder never returns
//! `NXDOMAIN`.
//!
//! E.g. with config:
//! ```json
//! {
//!   "dns": {
//!     "records": { "google.com.": "1.2.3.4" },
//!     "ntp": "10.0.0.5",
//!     "wildcard": "9.9.9.9"
//!   },
//!   ...
//! }
//! ```
//!
//! ```bash
//! ❯ dig @127.0.0.1 +short google.com A
//! 1.2.3.4
//! ❯ dig @127.0.0.1 +short time.ntp.org A
//! 10.0.0.5
//! ❯ dig @127.0.0.1 +short unknown.example A
//! 9.9.9.9
//! ```
//!
//! All answers are authoritative with a TTL of 60 seconds.
//!
//! # Malformed Queries
//!
//! A query without exactly one question never reaches the [`Handler`]: trust-dns rejects it while
//! parsing and answers `FORMERR` itself. The rejection, with the client address, is logged under
//! the `trust_dns_server` target (e.g. `RUST_LOG=mitmcrab=info,trust_dns_server=debug`). The
//! server keeps serving other clients.

mod handlers;
pub mod server;
pub mod zone;

pub use handlers::{Handler, ANSWER_TTL};
pub use server::new;
pub use zone::{AnswerSource, Fallback, Resolution, Zone};
