//! Request middleware, outermost first.
//!
//! | Layer | Module | Rejects with |
//! |-------|--------|--------------|
//! | Client address | [`client`] | never |
//! | Origin gate (mutations) | [`gate`] | 403 under `enforce` |
//! | Blocklist guard | [`blocklist`] | 403 |
//! | Route-class rate limiter | [`rate_limit`] | 429 |
//! | API-key gate (admin routes only) | [`gate`] | 401 |

pub mod blocklist;
pub mod client;
pub mod gate;
pub mod rate_limit;
