//! A file-backed client store

use std::{collections::HashMap, io, path::PathBuf};

use async_trait::async_trait;
use psq_clock::{Clock, DurationSecs, System};
use tokio::fs::OpenOptions;

use super::{AsyncClientStore, ExpiryRecord};
use crate::lifetime;

/// A client store persisted as a JSON document on the local filesystem
///
/// The document maps keys to expiry records. A missing file reads as an
/// empty store; lapsed records are filtered on read and pruned on write.
#[derive(Debug)]
pub struct FileStore<C = System> {
    path: PathBuf,
    clock: C,
}

impl FileStore {
    /// Constructs a new file store at the given path
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            clock: System,
        }
    }
}

impl<C> FileStore<C> {
    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> FileStore<D> {
        FileStore {
            path: self.path,
            clock,
        }
    }
}

impl<C: Clock> FileStore<C> {
    async fn read_records(&self) -> Result<HashMap<String, ExpiryRecord>, io::Error> {
        use tokio::io::AsyncReadExt;

        let mut file = match OpenOptions::new().read(true).open(&self.path).await {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(err) => return Err(err),
        };
        let mut data = String::new();
        file.read_to_string(&mut data).await?;
        let records = serde_json::from_str(&data)?;
        Ok(records)
    }

    async fn write_records(
        &self,
        records: &HashMap<String, ExpiryRecord>,
    ) -> Result<(), io::Error> {
        use tokio::io::AsyncWriteExt;

        let mut file_opts = OpenOptions::new();

        file_opts.create(true).truncate(true).write(true);

        // credentials are written owner-readable only
        #[cfg(unix)]
        file_opts.mode(0o600);

        let mut file = file_opts.open(&self.path).await?;
        let data = serde_json::to_string_pretty(records)?;
        file.write_all(data.as_bytes()).await?;
        Ok(())
    }
}

#[async_trait]
impl<C: Clock + Send + Sync> AsyncClientStore for FileStore<C> {
    type Error = io::Error;

    async fn get(&mut self, key: &str) -> Result<Option<String>, Self::Error> {
        let records = self.read_records().await?;
        Ok(records
            .get(key)
            .filter(|record| !lifetime::is_expired(&self.clock, record.expires_at))
            .map(|record| record.value.clone()))
    }

    async fn set(
        &mut self,
        key: &str,
        value: &str,
        ttl: DurationSecs,
    ) -> Result<(), Self::Error> {
        let mut records = self.read_records().await?;
        records.retain(|_, record| !lifetime::is_expired(&self.clock, record.expires_at));
        records.insert(
            key.to_owned(),
            ExpiryRecord {
                value: value.to_owned(),
                expires_at: self.clock.now() + ttl,
            },
        );
        self.write_records(&records).await
    }

    async fn remove(&mut self, key: &str) -> Result<(), Self::Error> {
        let mut records = self.read_records().await?;
        if records.remove(key).is_some() {
            self.write_records(&records).await?;
        }
        Ok(())
    }
}
