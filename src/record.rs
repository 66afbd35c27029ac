use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{NotepadError, Result};
use crate::session::Session;

/// One script's settings: a flat JSON object.
pub type Record = Map<String, Value>;

/// Settings of a single script for a single user.
///
/// Three copies exist: the in-memory map (authoritative while this value is
/// alive), the local cache (rewritten on every change), and the host file
/// (written only by [`persist`](Self::persist)).
pub struct ConfigRecord {
    session: Session,
    script: String,
    values: Option<Record>,
}

impl ConfigRecord {
    /// A record that still has to be [`load`](Self::load)ed.
    pub fn new(session: Session, script: impl Into<String>) -> Self {
        Self {
            session,
            script: script.into(),
            values: None,
        }
    }

    /// Create and load in one step.
    pub async fn open(session: Session, script: impl Into<String>) -> Result<Self> {
        let mut record = Self::new(session, script);
        record.load().await?;
        Ok(record)
    }

    pub fn script(&self) -> &str {
        &self.script
    }

    pub fn is_ready(&self) -> bool {
        self.values.is_some()
    }

    /// Fill the record from local cache, falling back to the host.
    pub async fn load(&mut self) -> Result<()> {
        let key = self.cache_key();
        let values = match self.session.store().get_json::<Record>(&key) {
            Some(cached) => {
                tracing::debug!(script = %self.script, "settings from local cache");
                cached
            }
            None => {
                let remote = self.fetch_remote().await?;
                self.session.store().set_json(&key, &remote)?;
                remote
            }
        };
        self.values = Some(values);
        Ok(())
    }

    /// Value stored under `key`, or `default` when there is none.
    pub fn get(&self, key: &str, default: impl Into<Value>) -> Result<Value> {
        Ok(self
            .values()?
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.into()))
    }

    /// Typed variant of [`get`](Self::get).
    pub fn get_as<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T> {
        match self.values()?.get(key) {
            Some(value) => Ok(serde_json::from_value(value.clone())?),
            None => Ok(default),
        }
    }

    /// Change a value. Written through to the local cache, not to the host.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> Result<()> {
        let values = self.values_mut()?;
        values.insert(key.to_string(), value.into());
        self.write_cache()
    }

    /// Drop a value, with the same write-through rules as [`set`](Self::set).
    pub fn remove(&mut self, key: &str) -> Result<Option<Value>> {
        let previous = self.values_mut()?.remove(key);
        self.write_cache()?;
        Ok(previous)
    }

    /// Copy of the in-memory map.
    pub fn snapshot(&self) -> Result<Record> {
        self.values().cloned()
    }

    /// Upload the in-memory map to the host file.
    ///
    /// The local cache is refreshed first so nothing is lost if the upload
    /// fails. A vanished directory or file is re-resolved and the upload
    /// tried once more.
    pub async fn persist(&self) -> Result<()> {
        self.write_cache()?;
        let body = serde_json::to_string_pretty(self.values()?)?;

        match self.save_remote(&body).await {
            Err(NotepadError::DirectoryNotFound) => {
                tracing::warn!(script = %self.script, "settings directory vanished during save");
                self.session.forget_directory().await?;
                self.save_remote(&body).await
            }
            Err(NotepadError::FileNotFound) => {
                tracing::warn!(script = %self.script, "settings file vanished during save");
                self.session.invalidate_file_index().await?;
                self.save_remote(&body).await
            }
            other => other,
        }?;

        tracing::info!(script = %self.script, "settings saved");
        Ok(())
    }

    /// Replace local state with the host's copy. No merging: remote wins.
    ///
    /// If the host cannot be read, the in-memory values are kept and written
    /// back to the local cache.
    pub async fn sync(&mut self) -> Result<()> {
        let key = self.cache_key();
        self.session.store().remove(&key)?;
        let remote = match self.fetch_remote().await {
            Ok(remote) => remote,
            Err(e) => {
                if self.is_ready() {
                    self.write_cache()?;
                }
                return Err(e);
            }
        };
        self.session.store().set_json(&key, &remote)?;
        self.values = Some(remote);
        Ok(())
    }

    fn cache_key(&self) -> String {
        format!("userscript-config.{}", self.script)
    }

    fn values(&self) -> Result<&Record> {
        self.values
            .as_ref()
            .ok_or_else(|| NotepadError::NotReady(self.script.clone()))
    }

    fn values_mut(&mut self) -> Result<&mut Record> {
        match self.values.as_mut() {
            Some(values) => Ok(values),
            None => Err(NotepadError::NotReady(self.script.clone())),
        }
    }

    fn write_cache(&self) -> Result<()> {
        self.session.store().set_json(&self.cache_key(), self.values()?)
    }

    async fn fetch_remote(&self) -> Result<Record> {
        match self.read_remote().await {
            Err(NotepadError::FileNotFound) => {
                tracing::warn!(script = %self.script, "settings file vanished, re-creating");
                self.session.invalidate_file_index().await?;
                self.read_remote().await
            }
            Err(NotepadError::DirectoryNotFound) => {
                tracing::warn!(script = %self.script, "settings directory vanished, re-creating");
                self.session.forget_directory().await?;
                self.read_remote().await
            }
            other => other,
        }
    }

    async fn read_remote(&self) -> Result<Record> {
        let file = self.session.file_id(&self.script).await?;
        let dir = self.session.directory_id().await?;
        let content = self.session.backend().read_file(dir, file).await?;
        parse_record(&content)
    }

    async fn save_remote(&self, body: &str) -> Result<()> {
        let file = self.session.file_id(&self.script).await?;
        let dir = self.session.directory_id().await?;
        self.session
            .backend()
            .save_file(dir, file, &self.script, body)
            .await
    }
}

/// An empty file is an empty record; anything else must be a JSON object.
fn parse_record(content: &str) -> Result<Record> {
    if content.trim().is_empty() {
        return Ok(Record::new());
    }
    Ok(serde_json::from_str(content)?)
}
