//! Wire types for the Edgeward gateway.
//!
//! Every body the gateway itself produces (as opposed to bodies relayed
//! verbatim from the upstream API) is defined here, so clients and the
//! conformance suite can deserialize them without depending on the server
//! crate.
//!
//! # Bodies covered
//!
//! | Produced by | Type |
//! |-------------|------|
//! | Any rejection (401/403/429/500) | [`Envelope`] |
//! | Upstream HTTP error relay | [`Envelope`] with `data` |
//! | `GET /health` | [`HealthResponse`] |
//! | `GET /admin/blocklist` | [`BlocklistResponse`] |
//! | `POST /admin/blocklist` | [`BlockRequest`] → [`BlockResult`] |
//! | `DELETE /admin/blocklist/{address}` | → [`BlockResult`] |
//! | `GET /admin/violations/{address}` | → [`ViolationView`] |
//! | `DELETE /admin/cache` | [`CacheClearQuery`] → [`CacheClearResponse`] |

pub mod admin;
pub mod error;

pub use admin::{
    BlockRequest, BlockResult, BlocklistResponse, CacheClearQuery, CacheClearResponse,
    HealthResponse, ViolationView,
};
pub use error::Envelope;
