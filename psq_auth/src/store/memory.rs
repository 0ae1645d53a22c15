//! An in-memory client store

use super::{AsyncClientStore, ExpiryRecord};
use crate::lifetime;
use async_trait::async_trait;
use psq_clock::{Clock, DurationSecs, System};
use std::collections::HashMap;
use std::convert::Infallible;

/// An in-memory store for tests and ephemeral sessions
///
/// Nothing survives the process; production deployments want a persistent
/// implementation such as the file store.
#[derive(Debug, Default)]
pub struct MemoryStore<C = System> {
    entries: HashMap<String, ExpiryRecord>,
    clock: C,
}

impl MemoryStore {
    /// Constructs a new empty store backed by the system clock
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            clock: System,
        }
    }
}

impl<C> MemoryStore<C> {
    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> MemoryStore<D> {
        MemoryStore {
            entries: self.entries,
            clock,
        }
    }
}

#[async_trait]
impl<C: Clock + Send + Sync> AsyncClientStore for MemoryStore<C> {
    type Error = Infallible;

    async fn get(&mut self, key: &str) -> Result<Option<String>, Self::Error> {
        match self.entries.get(key) {
            Some(record) if !lifetime::is_expired(&self.clock, record.expires_at) => {
                Ok(Some(record.value.clone()))
            }
            Some(_) => {
                // a lapsed record reads as never having existed
                self.entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(
        &mut self,
        key: &str,
        value: &str,
        ttl: DurationSecs,
    ) -> Result<(), Self::Error> {
        let record = ExpiryRecord {
            value: value.to_owned(),
            expires_at: self.clock.now() + ttl,
        };
        self.entries.insert(key.to_owned(), record);
        Ok(())
    }

    async fn remove(&mut self, key: &str) -> Result<(), Self::Error> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use psq_clock::{TestClock, UnixTime};

    fn store() -> (MemoryStore<TestClock>, TestClock) {
        let clock = TestClock::new(UnixTime(1_000));
        (MemoryStore::new().with_clock(clock.clone()), clock)
    }

    #[tokio::test]
    async fn round_trips_before_the_ttl_elapses() {
        let (mut store, clock) = store();

        store.set("access_token", "tok", DurationSecs(60)).await.unwrap();
        assert_eq!(store.get("access_token").await.unwrap().as_deref(), Some("tok"));

        clock.inc(59);
        assert_eq!(store.get("access_token").await.unwrap().as_deref(), Some("tok"));
    }

    #[tokio::test]
    async fn reads_as_absent_once_the_ttl_elapses() {
        let (mut store, clock) = store();

        store.set("access_token", "tok", DurationSecs(60)).await.unwrap();
        clock.inc(60);
        assert_eq!(store.get("access_token").await.unwrap(), None);
    }

    #[tokio::test]
    async fn missing_keys_read_as_absent() {
        let (mut store, _clock) = store();
        assert_eq!(store.get("refresh_token").await.unwrap(), None);
    }

    #[tokio::test]
    async fn overwrites_refresh_the_ttl() {
        let (mut store, clock) = store();

        store.set("state", "first", DurationSecs(10)).await.unwrap();
        clock.inc(5);
        store.set("state", "second", DurationSecs(10)).await.unwrap();
        clock.inc(9);
        assert_eq!(store.get("state").await.unwrap().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn removed_keys_read_as_absent() {
        let (mut store, _clock) = store();

        store.set("psq_token", "tok", DurationSecs(60)).await.unwrap();
        store.remove("psq_token").await.unwrap();
        assert_eq!(store.get("psq_token").await.unwrap(), None);
    }
}
