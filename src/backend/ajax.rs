use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{DirEntry, DirectoryId, FileEntry, FileId, NotepadBackend};
use crate::error::{NotepadError, Result};

const USER_AGENT: &str = concat!("notecfg/", env!("CARGO_PKG_VERSION"));

/// Talks to the host's AJAX endpoint: `POST <base>/ajax/notepad/<action>`
/// with a JSON payload, answered by a JSON envelope.
#[derive(Clone, Debug)]
pub struct AjaxBackend {
    client: reqwest::Client,
    base_url: String,
    session: Option<String>,
}

/// `{ "ok": bool, "error"?: string, "data"?: any }`
#[derive(Debug, Deserialize)]
struct Envelope {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct Created {
    id: u64,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    content: String,
}

impl AjaxBackend {
    /// `session` is forwarded untouched as the `Cookie` header.
    pub fn new(base_url: impl Into<String>, session: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session,
        }
    }

    async fn call<T: DeserializeOwned>(&self, action: &str, payload: Value) -> Result<T> {
        let url = format!("{}/ajax/notepad/{action}", self.base_url);
        tracing::debug!(%url, "notepad request");

        let mut request = self
            .client
            .post(&url)
            .header("User-Agent", USER_AGENT)
            .json(&payload);
        if let Some(ref session) = self.session {
            request = request.header("Cookie", session);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        decode_envelope(status, &body)
    }
}

/// Unwrap the host envelope, mapping failure reasons onto typed errors.
fn decode_envelope<T: DeserializeOwned>(status: reqwest::StatusCode, body: &str) -> Result<T> {
    let envelope: Envelope = match serde_json::from_str(body) {
        Ok(env) => env,
        Err(_) if !status.is_success() => {
            return Err(NotepadError::Remote(format!("HTTP {status}")));
        }
        Err(e) => return Err(e.into()),
    };

    if !envelope.ok {
        let reason = envelope
            .error
            .unwrap_or_else(|| format!("request failed (HTTP {status})"));
        return Err(NotepadError::from_reason(&reason));
    }

    Ok(serde_json::from_value(envelope.data)?)
}

impl NotepadBackend for AjaxBackend {
    fn list_root(&self) -> BoxFuture<'_, Result<Vec<DirEntry>>> {
        self.call("list_root", json!({})).boxed()
    }

    fn create_directory<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<DirectoryId>> {
        async move {
            let created: Created = self.call("create_directory", json!({ "name": name })).await?;
            Ok(DirectoryId(created.id))
        }
        .boxed()
    }

    fn list_directory(&self, dir: DirectoryId) -> BoxFuture<'_, Result<Vec<FileEntry>>> {
        self.call("list_directory", json!({ "dir": dir })).boxed()
    }

    fn create_file<'a>(
        &'a self,
        dir: DirectoryId,
        name: &'a str,
        content: &'a str,
    ) -> BoxFuture<'a, Result<FileId>> {
        async move {
            let created: Created = self
                .call(
                    "create_file",
                    json!({ "dir": dir, "name": name, "content": content }),
                )
                .await?;
            Ok(FileId(created.id))
        }
        .boxed()
    }

    fn read_file(&self, dir: DirectoryId, file: FileId) -> BoxFuture<'_, Result<String>> {
        async move {
            let body: Content = self
                .call("read_file", json!({ "dir": dir, "file": file }))
                .await?;
            Ok(body.content)
        }
        .boxed()
    }

    fn save_file<'a>(
        &'a self,
        dir: DirectoryId,
        file: FileId,
        name: &'a str,
        content: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let _: Value = self
                .call(
                    "save_file",
                    json!({ "dir": dir, "file": file, "name": name, "content": content }),
                )
                .await?;
            Ok(())
        }
        .boxed()
    }
}
