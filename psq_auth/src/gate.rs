//! Gating of application calls behind token freshness
//!
//! Application calls that require a valid access token pass through a
//! [`RequestGate`]. When the staleness predicate trips, the gate collapses
//! a thundering herd of expired-token calls into a single refresh
//! round-trip: the first arrival runs the refresh, later arrivals queue
//! behind it, and everyone is released in arrival order once the cycle
//! completes.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::exchange::RefreshError;
use crate::machine::AuthMachine;
use crate::store::AsyncClientStore;
use crate::TokenExchange;

/// Supplies the gate's staleness predicate and refresh action
#[async_trait]
pub trait RefreshStrategy: Send + Sync {
    /// The error produced when a refresh cycle fails
    ///
    /// One failure is handed to every caller queued behind the same cycle,
    /// so this is typically an `Arc` around the underlying fault.
    type Error: Clone + fmt::Debug + fmt::Display + Send + Sync + 'static;

    /// Whether the tokens required for application calls are currently
    /// absent or expired
    async fn is_stale(&self) -> bool;

    /// Runs one refresh cycle
    async fn refresh(&self) -> Result<(), Self::Error>;
}

/// A guarded call that could not proceed
#[derive(Clone, Debug, Error)]
pub enum GateError<E> {
    /// The refresh cycle this call depended on failed
    #[error("token refresh failed: {0}")]
    Refresh(E),

    /// The refresh cycle this call was queued behind was torn down before
    /// completing
    #[error("token refresh was abandoned before completing")]
    Abandoned,
}

type Waiter<E> = oneshot::Sender<Result<(), E>>;

enum GateState<E> {
    Idle,
    Refreshing { waiters: VecDeque<Waiter<E>> },
}

/// Intercepts operations that require a valid access token
///
/// At most one refresh cycle is in flight at any instant; calls arriving
/// while one is outstanding queue behind it rather than starting their own.
pub struct RequestGate<R: RefreshStrategy> {
    strategy: R,
    state: Mutex<GateState<R::Error>>,
}

impl<R: RefreshStrategy> fmt::Debug for RequestGate<R> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let in_flight = matches!(*self.lock_state(), GateState::Refreshing { .. });
        f.debug_struct("RequestGate")
            .field("refresh_in_flight", &in_flight)
            .finish()
    }
}

impl<R: RefreshStrategy> RequestGate<R> {
    /// Constructs a gate over the given strategy
    pub fn new(strategy: R) -> Self {
        Self {
            strategy,
            state: Mutex::new(GateState::Idle),
        }
    }

    /// Runs `operation` once the required tokens are known to be fresh
    ///
    /// If the tokens are stale this either starts the one permitted refresh
    /// cycle or waits for the cycle already in flight; the operation runs
    /// only after that cycle succeeds.
    pub async fn guard<T, F, Fut>(&self, operation: F) -> Result<T, GateError<R::Error>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if !self.strategy.is_stale().await {
            return Ok(operation().await);
        }

        let waiter = {
            let mut state = self.lock_state();
            match &mut *state {
                GateState::Idle => {
                    *state = GateState::Refreshing {
                        waiters: VecDeque::new(),
                    };
                    None
                }
                GateState::Refreshing { waiters } => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push_back(tx);
                    Some(rx)
                }
            }
        };

        match waiter {
            None => self.run_refresh_cycle(operation).await,
            Some(rx) => {
                tracing::trace!("queueing behind an in-flight token refresh");
                match rx.await {
                    Ok(Ok(())) => Ok(operation().await),
                    Ok(Err(error)) => Err(GateError::Refresh(error)),
                    Err(_) => Err(GateError::Abandoned),
                }
            }
        }
    }

    async fn run_refresh_cycle<T, F, Fut>(&self, operation: F) -> Result<T, GateError<R::Error>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        tracing::debug!("tokens stale, starting refresh cycle");

        // if this future is dropped mid-refresh, the guard flips the gate
        // back to idle and fails the queued waiters rather than wedging them
        let mut reset = ResetOnDrop {
            state: &self.state,
            armed: true,
        };
        let outcome = self.strategy.refresh().await;
        reset.armed = false;

        let waiters = match std::mem::replace(&mut *self.lock_state(), GateState::Idle) {
            GateState::Refreshing { waiters } => waiters,
            GateState::Idle => VecDeque::new(),
        };

        match outcome {
            Ok(()) => {
                tracing::debug!(released = waiters.len(), "refresh succeeded, releasing queued calls");
                for waiter in waiters {
                    // a waiter dropped while queued is no longer interested
                    let _ = waiter.send(Ok(()));
                }
                Ok(operation().await)
            }
            Err(error) => {
                tracing::warn!(
                    failed = waiters.len(),
                    error = %error,
                    "refresh failed, failing queued calls"
                );
                for waiter in waiters {
                    let _ = waiter.send(Err(error.clone()));
                }
                Err(GateError::Refresh(error))
            }
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, GateState<R::Error>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

struct ResetOnDrop<'a, E> {
    state: &'a Mutex<GateState<E>>,
    armed: bool,
}

impl<'a, E> Drop for ResetOnDrop<'a, E> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // dropping the queued senders wakes their receivers as abandoned
        *state = GateState::Idle;
    }
}

/// Wires the gate to an auth machine shared behind a `tokio` mutex
///
/// Staleness mirrors the check the machine itself uses: stale when either
/// the persisted access token or the persisted session token has lapsed.
#[async_trait]
impl<S, X> RefreshStrategy for Arc<tokio::sync::Mutex<AuthMachine<S, X>>>
where
    S: AsyncClientStore,
    X: TokenExchange,
{
    type Error = Arc<RefreshError>;

    async fn is_stale(&self) -> bool {
        self.lock().await.is_stale().await
    }

    async fn refresh(&self) -> Result<(), Self::Error> {
        self.lock().await.refresh_once().await
    }
}
