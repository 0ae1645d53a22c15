//! The auth state machine
//!
//! Owns the current token set and status, decides transitions, drives the
//! token exchange client, and persists results through the client store.
//! The machine does no scheduling of its own: the embedding application
//! invokes [`AuthMachine::mount`] with whatever redirect parameters it
//! observed and acts on the returned [`Effect`], and the request gate
//! drives [`AuthMachine::refresh_once`] when staleness trips mid-session.

use std::error;
use std::sync::Arc;

use thiserror::Error;
use url::Url;

use crate::exchange::{ExchangeError, RefreshError, TokenExchange};
use crate::lifetime::TokenLifetimeConfig;
use crate::store::{keys, AsyncClientStore};
use crate::{
    AccessToken, AccessTokenRef, AuthorizationCode, ClientId, RefreshToken, SessionToken,
    StateToken, StateTokenRef,
};

/// Scopes requested from the music service during authorization
pub const SCOPES: &[&str] = &[
    "streaming",
    "user-modify-playback-state",
    "user-read-currently-playing",
    "user-read-playback-state",
    "user-read-birthdate",
    "user-read-email",
    "user-read-private",
];

/// The in-memory token set as of the last transition
///
/// `access` absent means no music-service call may be attempted; `refresh`
/// absent means full authorization is required, as the code exchange is the
/// only path that populates it.
#[derive(Clone, Debug, Default)]
pub struct TokenSet {
    /// The short-lived bearer credential
    pub access: Option<AccessToken>,

    /// The long-lived refresh credential
    pub refresh: Option<RefreshToken>,

    /// The server-side session identifier paired with the refresh flow
    pub session: Option<SessionToken>,
}

/// Inbound parameters from an authorization redirect
#[derive(Clone, Debug, Default)]
pub struct CallbackParams {
    /// The authorization code, when the service granted one
    pub code: Option<AuthorizationCode>,

    /// The echoed anti-CSRF state
    pub state: Option<StateToken>,

    /// The service's error description, when authorization was refused
    pub error: Option<String>,
}

impl CallbackParams {
    /// Parameters for a mount with no redirect context
    pub fn none() -> Self {
        Self::default()
    }
}

/// A terminal authorization failure
///
/// Sources are shared so a single failure can be handed to every caller
/// that depended on the same cycle.
#[derive(Clone, Debug, Error)]
pub enum AuthError {
    /// The state echoed by the redirect did not match the persisted one
    #[error("authorization state did not match the expected value")]
    BadState,

    /// The music service refused authorization
    #[error("authorization failed: {0}")]
    FailedAuth(String),

    /// The authorization code could not be exchanged for tokens
    #[error("token exchange failed")]
    FailedTokens(#[source] Arc<ExchangeError>),

    /// The access token could not be refreshed
    #[error("token refresh failed")]
    FailedRefresh(#[source] Arc<RefreshError>),
}

/// The machine's current position in the token lifecycle
#[derive(Clone, Debug)]
pub enum AuthStatus {
    /// Mounted, not yet committed to a transition
    Idle,

    /// An authorization redirect is pending
    Authorizing,

    /// An authorization code is being exchanged for tokens
    ExchangingCode,

    /// A refresh cycle is in flight
    Refreshing,

    /// A valid access token is held; application calls may proceed
    Ready,

    /// A terminal failure for this mount; recover via [`AuthMachine::reset`]
    Error(AuthError),
}

impl AuthStatus {
    /// Whether application calls are currently permitted
    pub fn is_ready(&self) -> bool {
        matches!(self, AuthStatus::Ready)
    }

    /// Whether the machine has reached a terminal failure
    pub fn is_error(&self) -> bool {
        matches!(self, AuthStatus::Error(_))
    }
}

/// What the embedding application must do after a transition
#[derive(Clone, Debug)]
pub enum Effect {
    /// Keep rendering from the current status
    Stay,

    /// Replace the current location with the canonical application URL,
    /// shedding any redirect parameters
    Navigate(Url),

    /// Send the user to the music service's authorization prompt
    Authorize(Url),
}

/// Static configuration for the auth machine
#[derive(Clone, Debug)]
pub struct AuthConfig {
    /// The application's OAuth2 client ID
    pub client_id: ClientId,

    /// The music service's authorization endpoint
    pub authorize_url: Url,

    /// The canonical application URL; doubles as the OAuth2 redirect URI
    pub app_url: Url,

    /// Time-to-live policy for persisted credentials
    pub lifetime: TokenLifetimeConfig,
}

/// The token lifecycle state machine
#[derive(Debug)]
pub struct AuthMachine<S, X> {
    store: S,
    exchange: X,
    config: AuthConfig,
    tokens: TokenSet,
    status: AuthStatus,
}

impl<S, X> AuthMachine<S, X>
where
    S: AsyncClientStore,
    X: TokenExchange,
{
    /// Constructs a machine over the given collaborators, starting at
    /// `Idle` with an empty token set
    pub fn new(store: S, exchange: X, config: AuthConfig) -> Self {
        Self {
            store,
            exchange,
            config,
            tokens: TokenSet::default(),
            status: AuthStatus::Idle,
        }
    }

    /// The current status
    pub fn status(&self) -> &AuthStatus {
        &self.status
    }

    /// The in-memory token set as of the last transition
    pub fn tokens(&self) -> &TokenSet {
        &self.tokens
    }

    /// The access token, when one is held
    pub fn access_token(&self) -> Option<&AccessTokenRef> {
        self.tokens.access.as_deref()
    }

    /// Direct access to the underlying store
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Evaluates one mount transition against the given redirect parameters
    ///
    /// Rehydrates the token set from the store first; the store is the
    /// source of truth across reloads and lapsed records hydrate as absent.
    pub async fn mount(&mut self, callback: CallbackParams) -> Effect {
        self.hydrate().await;

        if let Some(echoed) = callback.state {
            return self
                .consume_callback(echoed, callback.code, callback.error)
                .await;
        }

        if self.tokens.access.is_none() && self.tokens.refresh.is_some() {
            return match self.refresh_once().await {
                Ok(()) => Effect::Navigate(self.config.app_url.clone()),
                Err(_) => Effect::Stay,
            };
        }

        if self.tokens.refresh.is_none() {
            return self.begin_authorization().await;
        }

        self.status = AuthStatus::Ready;
        Effect::Stay
    }

    /// Runs one refresh cycle: mints a fresh access token for the current
    /// session and persists it before the in-memory set updates
    ///
    /// The persisted refresh token is left untouched; the refresh response
    /// never re-issues one. On failure the machine lands in a terminal
    /// `Error` status and the shared fault is returned to the caller.
    pub async fn refresh_once(&mut self) -> Result<(), Arc<RefreshError>> {
        self.status = AuthStatus::Refreshing;

        match self.run_refresh().await {
            Ok(()) => {
                self.status = AuthStatus::Ready;
                Ok(())
            }
            Err(error) => {
                tracing::warn!(
                    error = (&error as &dyn error::Error),
                    "token refresh failed"
                );
                let shared = Arc::new(error);
                self.status = AuthStatus::Error(AuthError::FailedRefresh(shared.clone()));
                Err(shared)
            }
        }
    }

    /// Whether the persisted tokens required for application calls are
    /// currently absent or expired
    pub async fn is_stale(&mut self) -> bool {
        self.read_key(keys::ACCESS_TOKEN).await.is_none()
            || self.read_key(keys::SESSION_TOKEN).await.is_none()
    }

    /// Clears every persisted credential and returns the machine to `Idle`
    ///
    /// This is the recovery path from a terminal `Error` status; the next
    /// mount restarts authorization from scratch.
    pub async fn reset(&mut self) -> Result<(), S::Error> {
        self.store.remove(keys::ACCESS_TOKEN).await?;
        self.store.remove(keys::REFRESH_TOKEN).await?;
        self.store.remove(keys::SESSION_TOKEN).await?;
        self.store.remove(keys::STATE).await?;
        self.tokens = TokenSet::default();
        self.status = AuthStatus::Idle;
        tracing::info!("cleared persisted credentials");
        Ok(())
    }

    /// Builds the authorization prompt URL for the given anti-CSRF state
    pub fn authorize_url(&self, state: &StateTokenRef) -> Url {
        let mut url = self.config.authorize_url.clone();
        url.query_pairs_mut()
            .append_pair("client_id", self.config.client_id.as_str())
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", self.config.app_url.as_str())
            .append_pair("scope", &SCOPES.join(" "))
            .append_pair("state", state.as_str());
        url
    }

    async fn hydrate(&mut self) {
        self.tokens = TokenSet {
            access: self.read_key(keys::ACCESS_TOKEN).await.map(AccessToken::from),
            refresh: self
                .read_key(keys::REFRESH_TOKEN)
                .await
                .map(RefreshToken::from),
            session: self
                .read_key(keys::SESSION_TOKEN)
                .await
                .map(SessionToken::from),
        };
    }

    async fn read_key(&mut self, key: &str) -> Option<String> {
        match self.store.get(key).await {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!(
                    key,
                    error = (&error as &dyn error::Error),
                    "client store read failed, treating key as absent"
                );
                None
            }
        }
    }

    async fn clear_state(&mut self) {
        if let Err(error) = self.store.remove(keys::STATE).await {
            tracing::warn!(
                error = (&error as &dyn error::Error),
                "unable to clear authorization state"
            );
        }
    }

    async fn consume_callback(
        &mut self,
        echoed: StateToken,
        code: Option<AuthorizationCode>,
        error: Option<String>,
    ) -> Effect {
        let expected = self.read_key(keys::STATE).await.map(StateToken::from);

        if let Some(expected) = &expected {
            if *expected != echoed {
                tracing::warn!("authorization state mismatch, rejecting callback");
                self.status = AuthStatus::Error(AuthError::BadState);
                return Effect::Stay;
            }
        }

        if let Some(description) = error {
            tracing::warn!(%description, "music service refused authorization");
            self.status = AuthStatus::Error(AuthError::FailedAuth(description));
            return Effect::Stay;
        }

        if self.tokens.access.is_some() && self.tokens.refresh.is_some() {
            // leftover redirect context with nothing left to exchange
            self.clear_state().await;
            self.status = AuthStatus::Ready;
            return Effect::Navigate(self.config.app_url.clone());
        }

        self.exchange_code(code).await
    }

    async fn exchange_code(&mut self, code: Option<AuthorizationCode>) -> Effect {
        self.status = AuthStatus::ExchangingCode;
        self.clear_state().await;

        match self.run_exchange(code).await {
            Ok(()) => {
                self.status = AuthStatus::Ready;
                Effect::Navigate(self.config.app_url.clone())
            }
            Err(error) => {
                tracing::warn!(
                    error = (&error as &dyn error::Error),
                    "authorization code exchange failed"
                );
                self.status = AuthStatus::Error(AuthError::FailedTokens(Arc::new(error)));
                Effect::Stay
            }
        }
    }

    async fn run_exchange(&mut self, code: Option<AuthorizationCode>) -> Result<(), ExchangeError> {
        let code = code.ok_or(ExchangeError::MissingCode)?;
        let exchanged = self.exchange.exchange_code(&code).await?;

        let lifetime = self.config.lifetime.clone();
        // store writes settle before the in-memory set may change
        self.store
            .set(
                keys::REFRESH_TOKEN,
                exchanged.refresh.as_str(),
                lifetime.session_validity(),
            )
            .await
            .map_err(|e| ExchangeError::Persist(e.into()))?;
        self.store
            .set(
                keys::ACCESS_TOKEN,
                exchanged.access.as_str(),
                lifetime.exchanged_access_ttl(exchanged.expires_in),
            )
            .await
            .map_err(|e| ExchangeError::Persist(e.into()))?;
        self.store
            .set(
                keys::SESSION_TOKEN,
                exchanged.session.as_str(),
                lifetime.session_validity(),
            )
            .await
            .map_err(|e| ExchangeError::Persist(e.into()))?;

        tracing::info!(
            lifetime = exchanged.expires_in.0,
            "exchanged authorization code for tokens"
        );

        self.tokens = TokenSet {
            access: Some(exchanged.access),
            refresh: Some(exchanged.refresh),
            session: Some(exchanged.session),
        };
        Ok(())
    }

    async fn run_refresh(&mut self) -> Result<(), RefreshError> {
        let session = self
            .tokens
            .session
            .clone()
            .ok_or(RefreshError::MissingSession)?;
        let refreshed = self.exchange.refresh(&session).await?;

        let lifetime = self.config.lifetime.clone();
        // store writes settle before the in-memory set may change
        self.store
            .set(
                keys::ACCESS_TOKEN,
                refreshed.access.as_str(),
                lifetime.refreshed_access_ttl(refreshed.expires_in),
            )
            .await
            .map_err(|e| RefreshError::Persist(e.into()))?;
        self.store
            .set(
                keys::SESSION_TOKEN,
                refreshed.session.as_str(),
                lifetime.session_validity(),
            )
            .await
            .map_err(|e| RefreshError::Persist(e.into()))?;

        tracing::info!(lifetime = refreshed.expires_in.0, "refreshed access token");

        self.tokens.access = Some(refreshed.access);
        self.tokens.session = Some(refreshed.session);
        Ok(())
    }

    async fn begin_authorization(&mut self) -> Effect {
        let state = match self.read_key(keys::STATE).await {
            Some(existing) => StateToken::from(existing),
            None => {
                let fresh = random_state();
                if let Err(error) = self
                    .store
                    .set(
                        keys::STATE,
                        fresh.as_str(),
                        self.config.lifetime.state_validity(),
                    )
                    .await
                {
                    tracing::warn!(
                        error = (&error as &dyn error::Error),
                        "unable to persist authorization state"
                    );
                }
                fresh
            }
        };

        self.status = AuthStatus::Authorizing;
        tracing::debug!("redirecting to the authorization prompt");
        Effect::Authorize(self.authorize_url(&state))
    }
}

fn random_state() -> StateToken {
    use rand::distributions::Alphanumeric;
    use rand::Rng;

    let value: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect();
    StateToken::from(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{ExchangedTokens, RefreshedTokens};
    use crate::gate::RequestGate;
    use crate::store::MemoryStore;
    use crate::{AuthorizationCodeRef, SessionTokenRef};
    use async_trait::async_trait;
    use psq_clock::{DurationSecs, TestClock, UnixTime};
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct StubExchange {
        exchanged: Option<ExchangedTokens>,
        refreshed: Option<RefreshedTokens>,
        exchange_calls: AtomicUsize,
        refresh_calls: AtomicUsize,
    }

    impl StubExchange {
        fn exchanging() -> Self {
            Self {
                exchanged: Some(ExchangedTokens {
                    access: AccessToken::from_static("a1"),
                    refresh: RefreshToken::from_static("r1"),
                    session: SessionToken::from_static("p1"),
                    expires_in: DurationSecs(3600),
                }),
                ..Self::default()
            }
        }

        fn refreshing() -> Self {
            Self {
                refreshed: Some(RefreshedTokens {
                    access: AccessToken::from_static("a2"),
                    session: SessionToken::from_static("p2"),
                    expires_in: DurationSecs(3600),
                }),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl TokenExchange for StubExchange {
        async fn exchange_code(
            &self,
            _code: &AuthorizationCodeRef,
        ) -> Result<ExchangedTokens, ExchangeError> {
            self.exchange_calls.fetch_add(1, Ordering::SeqCst);
            self.exchanged.clone().ok_or_else(|| {
                ExchangeError::Request(Box::new(io::Error::new(
                    io::ErrorKind::Other,
                    "exchange refused",
                )))
            })
        }

        async fn refresh(
            &self,
            _session: &SessionTokenRef,
        ) -> Result<RefreshedTokens, RefreshError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            self.refreshed.clone().ok_or_else(|| {
                RefreshError::Request(Box::new(io::Error::new(
                    io::ErrorKind::Other,
                    "refresh refused",
                )))
            })
        }
    }

    type TestMachine = AuthMachine<MemoryStore<TestClock>, StubExchange>;

    fn config() -> AuthConfig {
        AuthConfig {
            client_id: ClientId::from_static("client-1"),
            authorize_url: Url::parse("https://accounts.example.com/authorize").unwrap(),
            app_url: Url::parse("https://psq.example.com/").unwrap(),
            lifetime: TokenLifetimeConfig::default(),
        }
    }

    fn machine_with(exchange: StubExchange) -> (TestMachine, TestClock) {
        let clock = TestClock::new(UnixTime(1_000));
        let store = MemoryStore::new().with_clock(clock.clone());
        (AuthMachine::new(store, exchange, config()), clock)
    }

    async fn seed(machine: &mut TestMachine, key: &str, value: &str, ttl: DurationSecs) {
        machine.store_mut().set(key, value, ttl).await.unwrap();
    }

    async fn stored(machine: &mut TestMachine, key: &str) -> Option<String> {
        machine.store_mut().get(key).await.unwrap()
    }

    fn query_param(url: &Url, name: &str) -> Option<String> {
        url.query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    fn callback(code: Option<&str>, state: Option<&str>, error: Option<&str>) -> CallbackParams {
        CallbackParams {
            code: code.map(AuthorizationCode::from),
            state: state.map(StateToken::from),
            error: error.map(str::to_owned),
        }
    }

    #[tokio::test]
    async fn settled_tokens_mount_ready() {
        let (mut machine, _clock) = machine_with(StubExchange::default());
        seed(&mut machine, keys::ACCESS_TOKEN, "a0", DurationSecs(60)).await;
        seed(&mut machine, keys::REFRESH_TOKEN, "r0", DurationSecs::days(365)).await;
        seed(&mut machine, keys::SESSION_TOKEN, "p0", DurationSecs::days(365)).await;

        let effect = machine.mount(CallbackParams::none()).await;

        assert!(matches!(effect, Effect::Stay));
        assert!(machine.status().is_ready());
        assert_eq!(machine.access_token().map(|t| t.as_str()), Some("a0"));
        assert_eq!(machine.exchange.exchange_calls.load(Ordering::SeqCst), 0);
        assert_eq!(machine.exchange.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn a_refreshable_mount_issues_exactly_one_refresh() {
        let (mut machine, clock) = machine_with(StubExchange::refreshing());
        seed(&mut machine, keys::REFRESH_TOKEN, "r0", DurationSecs::days(365)).await;
        seed(&mut machine, keys::SESSION_TOKEN, "p0", DurationSecs::days(365)).await;

        let effect = machine.mount(CallbackParams::none()).await;

        assert_eq!(machine.exchange.refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(machine.exchange.exchange_calls.load(Ordering::SeqCst), 0);
        assert!(machine.status().is_ready());
        match effect {
            Effect::Navigate(url) => assert_eq!(url.as_str(), "https://psq.example.com/"),
            other => panic!("expected navigation, got {:?}", other),
        }

        // the refresh credential is never rewritten by a refresh
        assert_eq!(stored(&mut machine, keys::REFRESH_TOKEN).await.as_deref(), Some("r0"));
        assert_eq!(stored(&mut machine, keys::SESSION_TOKEN).await.as_deref(), Some("p2"));

        // refreshed access tokens lapse 120 seconds ahead of the report
        clock.inc(3479);
        assert!(!machine.is_stale().await);
        clock.inc(1);
        assert!(machine.is_stale().await);
    }

    #[tokio::test]
    async fn a_failed_refresh_is_terminal() {
        let (mut machine, _clock) = machine_with(StubExchange::default());
        seed(&mut machine, keys::REFRESH_TOKEN, "r0", DurationSecs::days(365)).await;
        seed(&mut machine, keys::SESSION_TOKEN, "p0", DurationSecs::days(365)).await;

        let effect = machine.mount(CallbackParams::none()).await;

        assert!(matches!(effect, Effect::Stay));
        assert!(matches!(
            machine.status(),
            AuthStatus::Error(AuthError::FailedRefresh(_))
        ));
    }

    #[tokio::test]
    async fn a_missing_session_fails_the_refresh_without_a_network_call() {
        let (mut machine, _clock) = machine_with(StubExchange::refreshing());
        seed(&mut machine, keys::REFRESH_TOKEN, "r0", DurationSecs::days(365)).await;

        let effect = machine.mount(CallbackParams::none()).await;

        assert!(matches!(effect, Effect::Stay));
        assert_eq!(machine.exchange.refresh_calls.load(Ordering::SeqCst), 0);
        match machine.status() {
            AuthStatus::Error(AuthError::FailedRefresh(fault)) => {
                assert!(matches!(**fault, RefreshError::MissingSession))
            }
            other => panic!("unexpected status: {:?}", other),
        }
    }

    #[tokio::test]
    async fn an_unauthorized_mount_redirects_with_a_fresh_state() {
        let (mut machine, clock) = machine_with(StubExchange::default());

        let effect = machine.mount(CallbackParams::none()).await;

        let url = match effect {
            Effect::Authorize(url) => url,
            other => panic!("expected authorization, got {:?}", other),
        };
        assert!(matches!(machine.status(), AuthStatus::Authorizing));
        assert_eq!(machine.exchange.exchange_calls.load(Ordering::SeqCst), 0);
        assert_eq!(machine.exchange.refresh_calls.load(Ordering::SeqCst), 0);

        assert_eq!(query_param(&url, "client_id").as_deref(), Some("client-1"));
        assert_eq!(query_param(&url, "response_type").as_deref(), Some("code"));
        let scope = query_param(&url, "scope").unwrap();
        assert!(scope.contains("streaming"));
        assert!(scope.contains("user-read-private"));

        let state = query_param(&url, "state").unwrap();
        assert_eq!(stored(&mut machine, keys::STATE).await.as_deref(), Some(state.as_str()));

        // the state lapses after five minutes
        clock.inc(299);
        assert!(stored(&mut machine, keys::STATE).await.is_some());
        clock.inc(1);
        assert!(stored(&mut machine, keys::STATE).await.is_none());
    }

    #[tokio::test]
    async fn an_unexpired_state_is_reused_for_authorization() {
        let (mut machine, _clock) = machine_with(StubExchange::default());
        seed(&mut machine, keys::STATE, "s9", DurationSecs::minutes(5)).await;

        let effect = machine.mount(CallbackParams::none()).await;

        match effect {
            Effect::Authorize(url) => {
                assert_eq!(query_param(&url, "state").as_deref(), Some("s9"))
            }
            other => panic!("expected authorization, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn a_state_mismatch_is_rejected_before_any_network_call() {
        let (mut machine, _clock) = machine_with(StubExchange::exchanging());
        seed(&mut machine, keys::STATE, "s2", DurationSecs::minutes(5)).await;

        let effect = machine.mount(callback(Some("abc"), Some("s1"), None)).await;

        assert!(matches!(effect, Effect::Stay));
        assert!(matches!(
            machine.status(),
            AuthStatus::Error(AuthError::BadState)
        ));
        assert_eq!(machine.exchange.exchange_calls.load(Ordering::SeqCst), 0);
        assert!(stored(&mut machine, keys::ACCESS_TOKEN).await.is_none());
        assert!(stored(&mut machine, keys::REFRESH_TOKEN).await.is_none());
    }

    #[tokio::test]
    async fn a_service_refusal_is_terminal() {
        let (mut machine, _clock) = machine_with(StubExchange::exchanging());
        seed(&mut machine, keys::STATE, "s1", DurationSecs::minutes(5)).await;

        let effect = machine
            .mount(callback(None, Some("s1"), Some("access_denied")))
            .await;

        assert!(matches!(effect, Effect::Stay));
        match machine.status() {
            AuthStatus::Error(AuthError::FailedAuth(description)) => {
                assert_eq!(description, "access_denied")
            }
            other => panic!("unexpected status: {:?}", other),
        }
        assert_eq!(machine.exchange.exchange_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn a_matching_callback_exchanges_the_code() {
        let (mut machine, clock) = machine_with(StubExchange::exchanging());
        seed(&mut machine, keys::STATE, "s1", DurationSecs::minutes(5)).await;

        let effect = machine.mount(callback(Some("abc"), Some("s1"), None)).await;

        assert_eq!(machine.exchange.exchange_calls.load(Ordering::SeqCst), 1);
        assert!(machine.status().is_ready());
        match effect {
            Effect::Navigate(url) => assert_eq!(url.as_str(), "https://psq.example.com/"),
            other => panic!("expected navigation, got {:?}", other),
        }

        assert!(stored(&mut machine, keys::STATE).await.is_none());
        assert_eq!(stored(&mut machine, keys::REFRESH_TOKEN).await.as_deref(), Some("r1"));
        assert_eq!(stored(&mut machine, keys::SESSION_TOKEN).await.as_deref(), Some("p1"));

        // exchanged access tokens lapse 240 seconds ahead of the report
        clock.inc(3359);
        assert!(stored(&mut machine, keys::ACCESS_TOKEN).await.is_some());
        clock.inc(1);
        assert!(stored(&mut machine, keys::ACCESS_TOKEN).await.is_none());
        assert!(stored(&mut machine, keys::REFRESH_TOKEN).await.is_some());
    }

    #[tokio::test]
    async fn a_callback_without_a_stored_state_still_exchanges() {
        let (mut machine, _clock) = machine_with(StubExchange::exchanging());

        let effect = machine.mount(callback(Some("abc"), Some("s1"), None)).await;

        assert_eq!(machine.exchange.exchange_calls.load(Ordering::SeqCst), 1);
        assert!(machine.status().is_ready());
        assert!(matches!(effect, Effect::Navigate(_)));
    }

    #[tokio::test]
    async fn a_callback_without_a_code_fails_without_a_network_call() {
        let (mut machine, _clock) = machine_with(StubExchange::exchanging());
        seed(&mut machine, keys::STATE, "s1", DurationSecs::minutes(5)).await;

        let effect = machine.mount(callback(None, Some("s1"), None)).await;

        assert!(matches!(effect, Effect::Stay));
        assert_eq!(machine.exchange.exchange_calls.load(Ordering::SeqCst), 0);
        match machine.status() {
            AuthStatus::Error(AuthError::FailedTokens(fault)) => {
                assert!(matches!(**fault, ExchangeError::MissingCode))
            }
            other => panic!("unexpected status: {:?}", other),
        }
    }

    #[tokio::test]
    async fn a_failed_exchange_is_terminal() {
        let (mut machine, _clock) = machine_with(StubExchange::default());
        seed(&mut machine, keys::STATE, "s1", DurationSecs::minutes(5)).await;

        let effect = machine.mount(callback(Some("abc"), Some("s1"), None)).await;

        assert!(matches!(effect, Effect::Stay));
        assert!(matches!(
            machine.status(),
            AuthStatus::Error(AuthError::FailedTokens(_))
        ));
        assert!(stored(&mut machine, keys::ACCESS_TOKEN).await.is_none());
    }

    #[tokio::test]
    async fn a_callback_with_settled_tokens_sheds_the_redirect_context() {
        let (mut machine, _clock) = machine_with(StubExchange::exchanging());
        seed(&mut machine, keys::ACCESS_TOKEN, "a0", DurationSecs(60)).await;
        seed(&mut machine, keys::REFRESH_TOKEN, "r0", DurationSecs::days(365)).await;
        seed(&mut machine, keys::SESSION_TOKEN, "p0", DurationSecs::days(365)).await;
        seed(&mut machine, keys::STATE, "s1", DurationSecs::minutes(5)).await;

        let effect = machine.mount(callback(None, Some("s1"), None)).await;

        assert!(machine.status().is_ready());
        assert!(matches!(effect, Effect::Navigate(_)));
        assert_eq!(machine.exchange.exchange_calls.load(Ordering::SeqCst), 0);
        assert!(stored(&mut machine, keys::STATE).await.is_none());
    }

    #[tokio::test]
    async fn reset_clears_everything() {
        let (mut machine, _clock) = machine_with(StubExchange::default());
        seed(&mut machine, keys::ACCESS_TOKEN, "a0", DurationSecs(60)).await;
        seed(&mut machine, keys::REFRESH_TOKEN, "r0", DurationSecs::days(365)).await;
        seed(&mut machine, keys::SESSION_TOKEN, "p0", DurationSecs::days(365)).await;
        seed(&mut machine, keys::STATE, "s1", DurationSecs::minutes(5)).await;
        machine.mount(CallbackParams::none()).await;

        machine.reset().await.unwrap();

        assert!(matches!(machine.status(), AuthStatus::Idle));
        assert!(machine.tokens().access.is_none());
        assert!(machine.tokens().refresh.is_none());
        assert!(stored(&mut machine, keys::ACCESS_TOKEN).await.is_none());
        assert!(stored(&mut machine, keys::REFRESH_TOKEN).await.is_none());
        assert!(stored(&mut machine, keys::SESSION_TOKEN).await.is_none());
        assert!(stored(&mut machine, keys::STATE).await.is_none());
    }

    #[tokio::test]
    async fn the_gate_refreshes_through_a_shared_machine() {
        let (mut machine, clock) = machine_with(StubExchange::refreshing());
        seed(&mut machine, keys::ACCESS_TOKEN, "a0", DurationSecs(10)).await;
        seed(&mut machine, keys::REFRESH_TOKEN, "r0", DurationSecs::days(365)).await;
        seed(&mut machine, keys::SESSION_TOKEN, "p0", DurationSecs::days(365)).await;
        machine.mount(CallbackParams::none()).await;
        assert!(machine.status().is_ready());

        let shared = Arc::new(tokio::sync::Mutex::new(machine));
        let gate = RequestGate::new(shared.clone());

        // nothing stale yet, so the call passes straight through
        assert_eq!(gate.guard(|| async { 1 }).await.unwrap(), 1);

        clock.inc(10);
        assert_eq!(gate.guard(|| async { 2 }).await.unwrap(), 2);

        let mut machine = shared.lock().await;
        assert_eq!(machine.exchange.refresh_calls.load(Ordering::SeqCst), 1);
        assert!(machine.status().is_ready());
        assert!(!machine.is_stale().await);
    }
}

