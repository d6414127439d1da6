//! Firebase Realtime Database over its REST API.
//!
//! `get` is `GET {base}/{path}.json`, `update` is a multi-location
//! `PATCH {base}/{path}.json` whose body keys are slash paths relative to
//! `path`. Both go through one pooled `reqwest` client.

use std::time::Duration;

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{Client, Response, Url};
use serde_json::{Map, Value};
use smartbin_common::paths::segments;

use super::{checked_path, StateStore, StoreError};

/// Path segments keep `-` and `_` readable; everything else non-alphanumeric
/// is escaped.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_');

pub struct FirebaseStore {
    client: Client,
    base: Url,
    auth: Option<String>,
    timeout: Duration,
}

impl std::fmt::Debug for FirebaseStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirebaseStore")
            .field("base", &self.base.as_str())
            .field("auth", &self.auth.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl FirebaseStore {
    /// `base` is the database URL, e.g. `https://<db>.firebaseio.com`.
    /// `auth` is a database secret or ID token sent as the `auth` query
    /// parameter.
    pub fn new(base: &str, auth: Option<String>, timeout: Duration) -> Result<Self, StoreError> {
        let base = Url::parse(base)
            .map_err(|e| StoreError::Unavailable(format!("invalid Firebase URL '{base}': {e}")))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(StoreError::Unavailable(format!(
                "Firebase URL must be http(s), got '{}'",
                base.scheme()
            )));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            base,
            auth,
            timeout,
        })
    }

    fn url(&self, path: &str) -> Result<Url, StoreError> {
        resource_url(&self.base, path, self.auth.as_deref())
    }

    /// The URL carries the auth token, so it is stripped from error text.
    fn transport_error(&self, err: reqwest::Error) -> StoreError {
        if err.is_timeout() {
            StoreError::Timeout(self.timeout)
        } else {
            StoreError::Unavailable(err.without_url().to_string())
        }
    }
}

/// `{base}/{escaped path}.json[?auth=...]`
pub(crate) fn resource_url(base: &Url, path: &str, auth: Option<&str>) -> Result<Url, StoreError> {
    checked_path(path)?;

    let escaped = segments(path)
        .map(|s| utf8_percent_encode(s, SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/");
    let raw = format!("{}/{}.json", base.as_str().trim_end_matches('/'), escaped);

    let mut url = Url::parse(&raw).map_err(|_| StoreError::InvalidPath {
        path: path.to_string(),
        reason: "path does not form a valid URL",
    })?;
    if let Some(token) = auth {
        url.query_pairs_mut().append_pair("auth", token);
    }
    Ok(url)
}

async fn check_status(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Rejected {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl StateStore for FirebaseStore {
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        let response = self
            .client
            .get(self.url(path)?)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let response = check_status(response).await?;

        let value: Value = response
            .json()
            .await
            .map_err(|e| StoreError::Malformed(e.without_url().to_string()))?;
        Ok(match value {
            Value::Null => None,
            other => Some(other),
        })
    }

    async fn update(&self, path: &str, fields: &Map<String, Value>) -> Result<(), StoreError> {
        for field in fields.keys() {
            checked_path(field)?;
        }
        let response = self
            .client
            .patch(self.url(path)?)
            .json(fields)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        check_status(response).await?;

        tracing::debug!(path, fields = fields.len(), "firebase update applied");
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "firebase"
    }
}
