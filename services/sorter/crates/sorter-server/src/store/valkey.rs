//! Valkey (Redis-compatible) backend using a Fred client, optionally with
//! mTLS via rustls.
//!
//! The first path segment names a hash key; deeper segments are flattened
//! into slash-joined hash fields holding JSON-encoded leaves. An update runs
//! as one Lua script: every named field is cleared together with its
//! descendants and any scalar ancestor, then the new leaves are written.
//! One update is applied atomically, and concurrent updates resolve
//! last-write-wins per named field.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use fred::prelude::*;
use fred::types::config::{TlsConfig, TlsConnector, TlsHostMapping};
use serde_json::{Map, Value};
use smartbin_common::paths::{join, segments};
use smartbin_common::StoreSettings;

use super::{checked_path, set_at, StateStore, StoreError};

/// `KEYS[1]` is the hash. `ARGV[1]` is the number of replaced paths that
/// follow it; the remaining arguments are field/value pairs to set.
const REPLACE_SCRIPT: &str = r"
local existing = redis.call('HKEYS', KEYS[1])
local replaced = tonumber(ARGV[1])
local removed = 0
for i = 2, replaced + 1 do
  local path = ARGV[i]
  for _, field in ipairs(existing) do
    if field == path
      or string.sub(field, 1, #path + 1) == path .. '/'
      or string.sub(path, 1, #field + 1) == field .. '/' then
      removed = removed + redis.call('HDEL', KEYS[1], field)
    end
  end
end
for i = replaced + 2, #ARGV, 2 do
  redis.call('HSET', KEYS[1], ARGV[i], ARGV[i + 1])
end
return removed
";

pub struct ValkeyStore {
    client: Client,
    timeout: Duration,
}

impl ValkeyStore {
    /// Connect, authenticate and verify connectivity with PING.
    ///
    /// TLS is enabled when `valkey_ca` is set; client cert and key add
    /// mutual TLS.
    pub async fn connect(
        settings: &StoreSettings,
        password: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let mut config = Config::from_url(&settings.valkey_url)
            .with_context(|| format!("invalid Valkey URL: {}", settings.valkey_url))?;

        if let Some(ca_path) = settings.valkey_ca.as_deref() {
            crate::install_crypto_provider();
            let tls_config = build_tls_config(
                ca_path,
                settings.valkey_client_cert.as_deref(),
                settings.valkey_client_key.as_deref(),
            )?;
            config.tls = Some(TlsConfig {
                connector: TlsConnector::Rustls(Arc::new(tls_config).into()),
                hostnames: TlsHostMapping::None,
            });
        }
        if let Some(user) = settings.valkey_user.clone() {
            config.username = Some(user);
        }
        if password.is_some() {
            config.password = password;
        }

        let client = Builder::from_config(config)
            .with_connection_config(|conn_config| {
                conn_config.connection_timeout = timeout;
                conn_config.internal_command_timeout = timeout;
            })
            .set_policy(ReconnectPolicy::new_exponential(0, 100, 5000, 5))
            .build()?;

        client.init().await?;

        client
            .ping::<String>(None)
            .await
            .context("Valkey startup PING failed")?;

        tracing::info!(
            url = %settings.valkey_url,
            tls = settings.valkey_ca.is_some(),
            "Valkey connection ready"
        );

        Ok(Self { client, timeout })
    }

    fn command_error(&self, err: &Error) -> StoreError {
        match err.kind() {
            ErrorKind::Timeout => StoreError::Timeout(self.timeout),
            _ => StoreError::Unavailable(err.to_string()),
        }
    }
}

fn build_tls_config(
    ca_path: &str,
    cert_path: Option<&str>,
    key_path: Option<&str>,
) -> Result<rustls::ClientConfig> {
    let ca_file =
        File::open(ca_path).with_context(|| format!("failed to open CA cert: {ca_path}"))?;
    let ca_certs = rustls_pemfile::certs(&mut BufReader::new(ca_file))
        .collect::<Result<Vec<_>, _>>()
        .context("failed to parse CA cert")?;

    let mut root_store = rustls::RootCertStore::empty();
    for cert in ca_certs {
        root_store
            .add(cert)
            .context("failed to add CA cert to root store")?;
    }
    let builder = rustls::ClientConfig::builder().with_root_certificates(root_store);

    let (Some(cert_path), Some(key_path)) = (cert_path, key_path) else {
        return Ok(builder.with_no_client_auth());
    };

    let cert_file = File::open(cert_path)
        .with_context(|| format!("failed to open client cert: {cert_path}"))?;
    let client_certs = rustls_pemfile::certs(&mut BufReader::new(cert_file))
        .collect::<Result<Vec<_>, _>>()
        .context("failed to parse client cert")?;

    let key_file =
        File::open(key_path).with_context(|| format!("failed to open client key: {key_path}"))?;
    let client_key = rustls_pemfile::private_key(&mut BufReader::new(key_file))
        .context("failed to parse client key")?
        .context("no private key found in file")?;

    builder
        .with_client_auth_cert(client_certs, client_key)
        .context("failed to build TLS config with client auth")
}

/// Split a store path into the hash key and the field prefix inside it.
fn split_key(path: &str) -> Result<(String, String), StoreError> {
    checked_path(path)?;
    let mut parts = segments(path);
    let key = parts.next().unwrap_or_default().to_string();
    let prefix = parts.collect::<Vec<_>>().join("/");
    Ok((key, prefix))
}

/// Hash writes for one update: the paths it replaces and the leaves it
/// writes under them.
#[derive(Debug, Default, PartialEq)]
struct WritePlan {
    replace: Vec<String>,
    set: Vec<(String, String)>,
}

impl WritePlan {
    /// Nested objects become slash-joined leaves; `null` and `{}` only
    /// clear.
    fn new(prefix: &str, fields: &Map<String, Value>) -> Self {
        let mut plan = Self::default();
        for (field, value) in fields {
            let path = join(prefix, field);
            flatten_into(&path, value, &mut plan.set);
            plan.replace.push(path);
        }
        plan
    }

    fn script_args(self) -> Vec<String> {
        let mut args = Vec::with_capacity(1 + self.replace.len() + self.set.len() * 2);
        args.push(self.replace.len().to_string());
        args.extend(self.replace);
        for (field, value) in self.set {
            args.push(field);
            args.push(value);
        }
        args
    }
}

fn flatten_into(path: &str, value: &Value, set: &mut Vec<(String, String)>) {
    match value {
        Value::Null => {}
        Value::Object(map) => {
            for (child, nested) in map {
                flatten_into(&join(path, child), nested, set);
            }
        }
        leaf => set.push((path.to_string(), leaf.to_string())),
    }
}

/// Rebuild the subtree under `prefix` from flattened hash fields.
fn unflatten(prefix: &str, entries: HashMap<String, String>) -> Result<Option<Value>, StoreError> {
    let mut root = Value::Object(Map::new());
    let mut found = false;

    for (field, raw) in entries {
        let relative = if prefix.is_empty() {
            field.as_str()
        } else if field == prefix {
            ""
        } else if let Some(rest) = field
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('/'))
        {
            rest
        } else {
            continue;
        };

        let value: Value = serde_json::from_str(&raw)
            .map_err(|e| StoreError::Malformed(format!("field '{field}': {e}")))?;
        found = true;

        if relative.is_empty() {
            return Ok(Some(value));
        }
        set_at(&mut root, relative, value);
    }

    Ok(found.then_some(root))
}

#[async_trait]
impl StateStore for ValkeyStore {
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        let (key, prefix) = split_key(path)?;
        let entries: HashMap<String, String> = self
            .client
            .hgetall(&key)
            .await
            .map_err(|e| self.command_error(&e))?;
        unflatten(&prefix, entries)
    }

    async fn update(&self, path: &str, fields: &Map<String, Value>) -> Result<(), StoreError> {
        let (key, prefix) = split_key(path)?;
        for field in fields.keys() {
            checked_path(field)?;
        }
        if fields.is_empty() {
            return Ok(());
        }
        let args = WritePlan::new(&prefix, fields).script_args();

        let removed: i64 = self
            .client
            .eval(REPLACE_SCRIPT, key.as_str(), args)
            .await
            .map_err(|e| self.command_error(&e))?;

        tracing::debug!(key = %key, fields = fields.len(), removed, "valkey update applied");
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "valkey"
    }
}
