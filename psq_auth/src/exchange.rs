//! The token exchange client
//!
//! Issues the two network calls the auth machine depends on (authorization
//! code exchange and access token refresh) and normalizes their responses.
//! Neither operation touches the persistent store; the machine persists
//! results itself.

use async_trait::async_trait;
use std::error;
use thiserror::Error;

use crate::{AuthorizationCodeRef, SessionTokenRef};

pub mod dto;
#[cfg(feature = "http")]
pub mod http;

pub use dto::{ExchangedTokens, RefreshedTokens};
#[cfg(feature = "http")]
pub use http::{HttpExchangeClient, TokenRequestError};

/// An asynchronous client for the token exchange service
#[async_trait]
pub trait TokenExchange: Send + Sync {
    /// Trades an authorization code for a full token set
    async fn exchange_code(
        &self,
        code: &AuthorizationCodeRef,
    ) -> Result<ExchangedTokens, ExchangeError>;

    /// Mints a fresh access token for the session identified by `session`
    ///
    /// The response carries no refresh token; the server-side session is
    /// the handle to the refresh credential.
    async fn refresh(&self, session: &SessionTokenRef)
        -> Result<RefreshedTokens, RefreshError>;
}

/// A failed authorization code exchange
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// The authorization callback did not include a code to exchange
    #[error("no authorization code accompanied the authorization callback")]
    MissingCode,

    /// The exchange request itself failed
    #[error("token exchange request failed")]
    Request(#[source] Box<dyn error::Error + Send + Sync + 'static>),

    /// The exchanged tokens could not be persisted
    #[error("unable to persist exchanged tokens")]
    Persist(#[source] Box<dyn error::Error + Send + Sync + 'static>),
}

/// A failed access token refresh
#[derive(Debug, Error)]
pub enum RefreshError {
    /// No session token is held, so there is nothing to refresh against
    #[error("no session token available to refresh with")]
    MissingSession,

    /// The refresh request itself failed
    #[error("token refresh request failed")]
    Request(#[source] Box<dyn error::Error + Send + Sync + 'static>),

    /// The refreshed tokens could not be persisted
    #[error("unable to persist refreshed tokens")]
    Persist(#[source] Box<dyn error::Error + Send + Sync + 'static>),
}

#[cfg(feature = "http")]
impl From<TokenRequestError> for ExchangeError {
    fn from(err: TokenRequestError) -> Self {
        ExchangeError::Request(Box::new(err))
    }
}

#[cfg(feature = "http")]
impl From<TokenRequestError> for RefreshError {
    fn from(err: TokenRequestError) -> Self {
        RefreshError::Request(Box::new(err))
    }
}

/// Maps well-known music-service response codes to operator-facing text
pub fn status_message(status: u16) -> &'static str {
    match status {
        400 => "[400] A bad request was made, check the request again",
        401 => "[401] You need to authorize the application first",
        403 => "[403] Request was denied",
        404 => "[404] Unknown request",
        429 => "[429] Too many requests, try again in a moment",
        500 => "[500] Internal server error, report to the service",
        503 => "[503] The service wasn't available, but you can try again",
        _ => "Unknown error code",
    }
}
