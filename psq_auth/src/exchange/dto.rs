//! DTOs for the token exchange service's wire format

use psq_clock::DurationSecs;
use serde::{Deserialize, Serialize};

use crate::{
    AccessToken, AccessTokenRef, RefreshToken, RefreshTokenRef, SessionToken, SessionTokenRef,
};

/// The normalized result of a successful authorization code exchange
#[derive(Clone, Debug)]
pub struct ExchangedTokens {
    /// The short-lived bearer credential
    pub access: AccessToken,

    /// The long-lived refresh credential
    pub refresh: RefreshToken,

    /// The server-side session identifier
    pub session: SessionToken,

    /// Service-reported validity of the access token
    pub expires_in: DurationSecs,
}

/// The normalized result of a successful refresh
///
/// No refresh token is re-issued on this path; the session token remains
/// the handle to the server-side refresh credential.
#[derive(Clone, Debug)]
pub struct RefreshedTokens {
    /// The short-lived bearer credential
    pub access: AccessToken,

    /// The server-side session identifier
    pub session: SessionToken,

    /// Service-reported validity of the access token
    pub expires_in: DurationSecs,
}

#[derive(Debug, Deserialize, Serialize)]
pub(crate) struct ExchangeResponse<'a> {
    #[serde(borrow)]
    pub access_token: &'a AccessTokenRef,
    #[serde(borrow)]
    pub refresh_token: &'a RefreshTokenRef,
    #[serde(borrow)]
    pub psq_token: &'a SessionTokenRef,
    pub expires_in: DurationSecs,
}

#[derive(Debug, Deserialize, Serialize)]
pub(crate) struct RefreshResponse<'a> {
    #[serde(borrow)]
    pub access_token: &'a AccessTokenRef,
    #[serde(borrow)]
    pub psq_token: &'a SessionTokenRef,
    pub expires_in: DurationSecs,
}

impl From<ExchangeResponse<'_>> for ExchangedTokens {
    fn from(resp: ExchangeResponse<'_>) -> Self {
        Self {
            access: resp.access_token.to_owned(),
            refresh: resp.refresh_token.to_owned(),
            session: resp.psq_token.to_owned(),
            expires_in: resp.expires_in,
        }
    }
}

impl From<RefreshResponse<'_>> for RefreshedTokens {
    fn from(resp: RefreshResponse<'_>) -> Self {
        Self {
            access: resp.access_token.to_owned(),
            session: resp.psq_token.to_owned(),
            expires_in: resp.expires_in,
        }
    }
}

#[cfg(all(test, feature = "http"))]
mod tests {
    use super::*;

    #[test]
    fn exchange_response_normalizes() {
        let body = r#"{
            "access_token": "a1",
            "refresh_token": "r1",
            "psq_token": "p1",
            "expires_in": 3600
        }"#;

        let resp: ExchangeResponse = serde_json::from_str(body).unwrap();
        let tokens = ExchangedTokens::from(resp);

        assert_eq!(tokens.access.as_str(), "a1");
        assert_eq!(tokens.refresh.as_str(), "r1");
        assert_eq!(tokens.session.as_str(), "p1");
        assert_eq!(tokens.expires_in, DurationSecs(3600));
    }

    #[test]
    fn refresh_response_carries_no_refresh_token() {
        let body = r#"{
            "access_token": "a2",
            "psq_token": "p2",
            "expires_in": 1800
        }"#;

        let resp: RefreshResponse = serde_json::from_str(body).unwrap();
        let tokens = RefreshedTokens::from(resp);

        assert_eq!(tokens.access.as_str(), "a2");
        assert_eq!(tokens.session.as_str(), "p2");
        assert_eq!(tokens.expires_in, DurationSecs(1800));
    }

    #[test]
    fn exchange_response_requires_all_tokens() {
        let body = r#"{ "access_token": "a1", "expires_in": 3600 }"#;
        assert!(serde_json::from_str::<ExchangeResponse>(body).is_err());
    }
}
