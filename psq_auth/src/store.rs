//! Client-side persistence for tokens and authorization state
//!
//! The store plays the role a cookie jar plays in a browser deployment:
//! an expiring key/value surface that survives reloads and is the single
//! source of truth when the auth machine (re)hydrates.

use async_trait::async_trait;
use psq_clock::{DurationSecs, UnixTime};
use serde::{Deserialize, Serialize};
use std::error;

#[cfg(feature = "file")]
pub mod file;
pub mod memory;

#[cfg(feature = "file")]
pub use file::FileStore;
pub use memory::MemoryStore;

/// Keys under which the auth machine persists its state
pub mod keys {
    /// The short-lived bearer credential for music-service calls
    pub const ACCESS_TOKEN: &str = "access_token";

    /// The long-lived credential obtained during authorization
    pub const REFRESH_TOKEN: &str = "refresh_token";

    /// The server-side session identifier used by the refresh flow
    pub const SESSION_TOKEN: &str = "psq_token";

    /// The anti-CSRF state round-tripped through the authorization redirect
    pub const STATE: &str = "state";
}

/// A persisted value together with the instant it lapses
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExpiryRecord {
    /// The stored value
    pub value: String,

    /// The instant at which the value must start reading as absent
    pub expires_at: UnixTime,
}

/// An asynchronous expiring key/value store for client credentials
///
/// Every write carries an explicit time to live; unbounded persistence of
/// credentials is not expressible through this interface. Reading a key
/// whose time to live has elapsed behaves identically to the key never
/// having existed.
#[async_trait]
pub trait AsyncClientStore: Send + Sync {
    /// The error type returned when the underlying store fails
    type Error: error::Error + Send + Sync + 'static;

    /// Reads the live value for `key`, if any
    async fn get(&mut self, key: &str) -> Result<Option<String>, Self::Error>;

    /// Writes `value` under `key`, lapsing after `ttl`
    async fn set(&mut self, key: &str, value: &str, ttl: DurationSecs)
        -> Result<(), Self::Error>;

    /// Removes `key` if present
    async fn remove(&mut self, key: &str) -> Result<(), Self::Error>;
}
