//! Client-side token lifecycle management for the PSQ player
//!
//! This library owns the OAuth2 token lifecycle of a client that
//! authenticates against a third-party music service through a server-side
//! token exchange: acquiring tokens from the exchange endpoints, persisting
//! them with correct expiry semantics, detecting staleness, refreshing
//! proactively, and coordinating in-flight application calls against
//! refresh cycles.
//!
//! The moving parts are deliberately small:
//!
//! * an [`AuthMachine`][machine::AuthMachine] that evaluates one explicit
//!   transition per mount and tells the embedding application what to do
//!   next (render, navigate, or redirect to authorization),
//! * an [`AsyncClientStore`][store::AsyncClientStore] it persists through,
//!   where every credential carries an explicit time to live,
//! * a [`TokenExchange`][exchange::TokenExchange] client for the two
//!   network calls the lifecycle needs, and
//! * a [`RequestGate`][gate::RequestGate] that collapses a thundering herd
//!   of expired-token calls into a single refresh round-trip.
//!
//! # Mounting
//!
//! On start-up (or after an authorization redirect lands), hand the machine
//! whatever callback parameters were observed and act on the effect:
//!
//! ```no_run
//! use psq_auth::exchange::HttpExchangeClient;
//! use psq_auth::lifetime::TokenLifetimeConfig;
//! use psq_auth::store::FileStore;
//! use psq_auth::{AuthConfig, AuthMachine, CallbackParams, ClientId, Effect};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = FileStore::new(".psq-credentials.json".into());
//! let exchange = HttpExchangeClient::new(
//!     reqwest::Client::new(),
//!     reqwest::Url::parse("https://psq.example.com/api/token")?,
//!     reqwest::Url::parse("https://psq.example.com/api/refresh")?,
//! );
//! let config = AuthConfig {
//!     client_id: ClientId::from_static("acd0f18a3e124101af31f9b3582130c6"),
//!     authorize_url: reqwest::Url::parse("https://accounts.spotify.com/authorize")?,
//!     app_url: reqwest::Url::parse("https://psq.example.com/")?,
//!     lifetime: TokenLifetimeConfig::default(),
//! };
//!
//! let mut machine = AuthMachine::new(store, exchange, config);
//! match machine.mount(CallbackParams::none()).await {
//!     Effect::Stay => { /* render from machine.status() */ }
//!     Effect::Navigate(_url) => { /* replace the current location */ }
//!     Effect::Authorize(_url) => { /* send the user to the prompt */ }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Once the machine reports `Ready`, application calls go through the gate,
//! which refreshes on demand instead of letting stale calls fire.
//!
//! # Features
//!
//! The following features are supported by this crate, all of which are
//! enabled by default:
//!
//! * `http`: Provides the reqwest-backed implementation of the token
//!   exchange client.
//! * `file`: Provides a persistent client store using the local
//!   filesystem.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod braids;
pub mod exchange;
pub mod gate;
pub mod lifetime;
pub mod machine;
pub mod store;

pub use braids::*;
pub use exchange::TokenExchange;
pub use gate::{GateError, RefreshStrategy, RequestGate};
pub use machine::{
    AuthConfig, AuthError, AuthMachine, AuthStatus, CallbackParams, Effect, TokenSet, SCOPES,
};
