//! An exchange client backed by HTTP calls to the server-side endpoints

use thiserror::Error;

use super::dto;
use super::{ExchangeError, ExchangedTokens, RefreshError, RefreshedTokens, TokenExchange};
use crate::{AuthorizationCodeRef, SessionTokenRef};
use async_trait::async_trait;

/// A client for the server-side token exchange endpoints
#[derive(Clone, Debug)]
pub struct HttpExchangeClient {
    client: reqwest::Client,
    token_url: reqwest::Url,
    refresh_url: reqwest::Url,
}

impl HttpExchangeClient {
    /// Constructs a new client over the two exchange endpoints
    pub fn new(
        client: reqwest::Client,
        token_url: reqwest::Url,
        refresh_url: reqwest::Url,
    ) -> Self {
        Self {
            client,
            token_url,
            refresh_url,
        }
    }
}

/// An error while attempting to request tokens from the exchange service
#[derive(Debug, Error)]
pub enum TokenRequestError {
    /// An error from the exchange service with an error body
    #[error("error requesting tokens from exchange service: {body}")]
    ErrorWithBody {
        /// The underlying request error
        source: reqwest::Error,
        /// The body of the error
        body: String,
    },
    /// Unable to deserialize the token body
    #[error("error deserializing token body from exchange service")]
    TokenBodyError(#[from] serde_json::Error),
    /// Unable to read the response
    #[error("error reading response body")]
    BodyReadError(reqwest::Error),
    /// Unable to send a token request to the exchange service
    #[error("error sending request to exchange service")]
    RequestSend(reqwest::Error),
}

#[tracing::instrument(err, skip(client, url, parse), fields(endpoint = url.path()))]
async fn post_and_parse<R>(
    client: &reqwest::Client,
    url: reqwest::Url,
    parse: impl FnOnce(&[u8]) -> Result<R, serde_json::Error>,
) -> Result<R, TokenRequestError> {
    tracing::trace!("requesting tokens from exchange service");

    let resp = client
        .post(url)
        .send()
        .await
        .map_err(TokenRequestError::RequestSend)?;

    tracing::debug!(
        response.status = resp.status().as_u16(),
        "received response from exchange service"
    );

    if let Err(error) = resp.error_for_status_ref() {
        let body = resp
            .text()
            .await
            .map_err(TokenRequestError::BodyReadError)?;
        return Err(TokenRequestError::ErrorWithBody {
            source: error,
            body,
        });
    }

    let body = resp
        .bytes()
        .await
        .map_err(TokenRequestError::BodyReadError)?;
    Ok(parse(&body)?)
}

#[async_trait]
impl TokenExchange for HttpExchangeClient {
    async fn exchange_code(
        &self,
        code: &AuthorizationCodeRef,
    ) -> Result<ExchangedTokens, ExchangeError> {
        let mut url = self.token_url.clone();
        url.query_pairs_mut().append_pair("code", code.as_str());

        let tokens: ExchangedTokens = post_and_parse(&self.client, url, |body| {
            serde_json::from_slice::<dto::ExchangeResponse>(body).map(Into::into)
        })
        .await
        .map_err(ExchangeError::from)?;

        tracing::info!(
            lifetime = tokens.expires_in.0,
            "exchanged authorization code with the exchange service"
        );

        Ok(tokens)
    }

    async fn refresh(
        &self,
        session: &SessionTokenRef,
    ) -> Result<RefreshedTokens, RefreshError> {
        let mut url = self.refresh_url.clone();
        url.query_pairs_mut()
            .append_pair("psq_token", session.as_str());

        let tokens: RefreshedTokens = post_and_parse(&self.client, url, |body| {
            serde_json::from_slice::<dto::RefreshResponse>(body).map(Into::into)
        })
        .await
        .map_err(RefreshError::from)?;

        tracing::info!(
            lifetime = tokens.expires_in.0,
            "refreshed access token with the exchange service"
        );

        Ok(tokens)
    }
}
