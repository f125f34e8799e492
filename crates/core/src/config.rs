//! Connection and engine configuration
//!
//! [`ConnectionConfig`] is the structured record passed to `connect`. Its
//! shape (which of `local_path`, `remote_uri`, `auth_token` are present)
//! decides the [`ConnectionMode`]; [`ConnectionConfig::validate`] rejects
//! invalid combinations before any network attempt.
//!
//! Both records load from TOML:
//!
//! ```toml
//! local_path = "replica.db"
//! remote_uri = "libsql://example.turso.io"
//! auth_token = "secret"
//! sync_enabled = true
//! busy_timeout_ms = 5000
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Default bound on connect, in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;
/// Default bound on sync, sync_until and flush, in milliseconds.
pub const DEFAULT_SYNC_TIMEOUT_MS: u64 = 30_000;

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_sync_timeout_ms() -> u64 {
    DEFAULT_SYNC_TIMEOUT_MS
}

// ============================================================================
// Connection Mode
// ============================================================================

/// Topology of a connection, derived from its configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    /// A local database file (or `:memory:`)
    Local,
    /// A remote server reached over the network
    Remote,
    /// A local file kept in sync with a remote primary
    Replica,
}

impl ConnectionMode {
    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionMode::Local => "local",
            ConnectionMode::Remote => "remote",
            ConnectionMode::Replica => "replica",
        }
    }
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Connection Config
// ============================================================================

/// Options recognized by `connect`
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Path of the local database file; `:memory:` for an in-memory database
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
    /// URI of the remote primary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_uri: Option<String>,
    /// Credential for the remote primary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    /// Pull from the primary automatically (replica mode only)
    #[serde(default)]
    pub sync_enabled: bool,
    /// At-rest encryption key for the local file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_key: Option<String>,
    /// Encryption key sent to an encrypted remote database
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_encryption_key: Option<String>,
    /// How long a statement waits on a locked database
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub busy_timeout_ms: Option<u64>,
    /// Size hint for a pooling layer; carried, not interpreted here
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_size: Option<u32>,
    /// Bound on establishing the session
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Bound on sync, sync_until and flush
    #[serde(default = "default_sync_timeout_ms")]
    pub sync_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            local_path: None,
            remote_uri: None,
            auth_token: None,
            sync_enabled: false,
            encryption_key: None,
            remote_encryption_key: None,
            busy_timeout_ms: None,
            pool_size: None,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            sync_timeout_ms: DEFAULT_SYNC_TIMEOUT_MS,
        }
    }
}

// Secrets stay out of logs.
impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |o: &Option<String>| o.as_ref().map(|_| "<redacted>");
        f.debug_struct("ConnectionConfig")
            .field("local_path", &self.local_path)
            .field("remote_uri", &self.remote_uri)
            .field("auth_token", &redact(&self.auth_token))
            .field("sync_enabled", &self.sync_enabled)
            .field("encryption_key", &redact(&self.encryption_key))
            .field("remote_encryption_key", &redact(&self.remote_encryption_key))
            .field("busy_timeout_ms", &self.busy_timeout_ms)
            .field("pool_size", &self.pool_size)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("sync_timeout_ms", &self.sync_timeout_ms)
            .finish()
    }
}

impl ConnectionConfig {
    /// A local database file
    pub fn local(path: impl Into<String>) -> Self {
        Self {
            local_path: Some(path.into()),
            ..Self::default()
        }
    }

    /// A remote primary
    pub fn remote(uri: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            remote_uri: Some(uri.into()),
            auth_token: Some(auth_token.into()),
            ..Self::default()
        }
    }

    /// A local replica of a remote primary
    pub fn replica(
        path: impl Into<String>,
        uri: impl Into<String>,
        auth_token: impl Into<String>,
    ) -> Self {
        Self {
            local_path: Some(path.into()),
            remote_uri: Some(uri.into()),
            auth_token: Some(auth_token.into()),
            ..Self::default()
        }
    }

    /// Set `sync_enabled`
    pub fn with_sync(mut self, enabled: bool) -> Self {
        self.sync_enabled = enabled;
        self
    }

    /// Set the local encryption key
    pub fn with_encryption_key(mut self, key: impl Into<String>) -> Self {
        self.encryption_key = Some(key.into());
        self
    }

    /// Set the remote encryption key
    pub fn with_remote_encryption_key(mut self, key: impl Into<String>) -> Self {
        self.remote_encryption_key = Some(key.into());
        self
    }

    /// Set the busy timeout
    pub fn with_busy_timeout_ms(mut self, ms: u64) -> Self {
        self.busy_timeout_ms = Some(ms);
        self
    }

    /// Set the pool size hint
    pub fn with_pool_size(mut self, size: u32) -> Self {
        self.pool_size = Some(size);
        self
    }

    /// Set the connect timeout
    pub fn with_connect_timeout_ms(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = ms;
        self
    }

    /// Set the sync timeout
    pub fn with_sync_timeout_ms(mut self, ms: u64) -> Self {
        self.sync_timeout_ms = ms;
        self
    }

    /// Connect bound as a [`Duration`]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Sync bound as a [`Duration`]
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }

    /// Derive the topology from which targets are present.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the shape matches no mode.
    pub fn mode(&self) -> Result<ConnectionMode> {
        match (
            self.local_path.is_some(),
            self.remote_uri.is_some(),
            self.auth_token.is_some(),
        ) {
            (true, false, false) => Ok(ConnectionMode::Local),
            (false, true, true) => Ok(ConnectionMode::Remote),
            (true, true, true) => Ok(ConnectionMode::Replica),
            (false, false, false) => Err(Error::invalid_config(
                "one of local_path or remote_uri is required",
            )),
            (_, true, false) => Err(Error::invalid_config("remote_uri requires auth_token")),
            (_, false, true) => Err(Error::invalid_config("auth_token requires remote_uri")),
        }
    }

    /// Check the whole record and return its mode.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` describing the first problem found.
    pub fn validate(&self) -> Result<ConnectionMode> {
        for (name, value) in [
            ("local_path", &self.local_path),
            ("remote_uri", &self.remote_uri),
            ("auth_token", &self.auth_token),
            ("encryption_key", &self.encryption_key),
            ("remote_encryption_key", &self.remote_encryption_key),
        ] {
            if matches!(value, Some(v) if v.trim().is_empty()) {
                return Err(Error::invalid_config(format!("{} must not be empty", name)));
            }
        }

        let mode = self.mode()?;

        if self.sync_enabled && mode != ConnectionMode::Replica {
            return Err(Error::invalid_config(format!(
                "sync_enabled requires replica mode, got {}",
                mode
            )));
        }
        if self.encryption_key.is_some() && mode == ConnectionMode::Remote {
            return Err(Error::invalid_config(
                "encryption_key applies to a local file; use remote_encryption_key",
            ));
        }
        if self.remote_encryption_key.is_some() && mode == ConnectionMode::Local {
            return Err(Error::invalid_config(
                "remote_encryption_key requires a remote_uri",
            ));
        }
        if self.pool_size == Some(0) {
            return Err(Error::invalid_config("pool_size must be at least 1"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(Error::invalid_config("connect_timeout_ms must be positive"));
        }
        if self.sync_timeout_ms == 0 {
            return Err(Error::invalid_config("sync_timeout_ms must be positive"));
        }

        Ok(mode)
    }

    /// Parse a TOML document.
    ///
    /// Parsing does not validate; `connect` does.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s)
            .map_err(|e| Error::invalid_config(format!("failed to parse connection config: {}", e)))
    }

    /// Read and parse a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::invalid_config(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }
}

// ============================================================================
// Engine Config
// ============================================================================

/// How cursors hold their rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorMode {
    /// Materialize every row at declare time
    #[default]
    Buffered,
    /// Hold a live row stream and pull on fetch
    Streaming,
}

/// Process-wide engine settings
///
/// Defaults: `worker_threads = 4`, `cursor_mode = buffered`,
/// `statement_cache_capacity = 128`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Worker threads of the bridge runtime
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Cursor row holding strategy
    #[serde(default)]
    pub cursor_mode: CursorMode,
    /// Ad-hoc statements cached per session by the driver. Prepared
    /// statement handles are held for their own lifetime and never count
    /// against it.
    #[serde(default = "default_statement_cache_capacity")]
    pub statement_cache_capacity: usize,
}

fn default_worker_threads() -> usize {
    4
}

fn default_statement_cache_capacity() -> usize {
    128
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            cursor_mode: CursorMode::default(),
            statement_cache_capacity: default_statement_cache_capacity(),
        }
    }
}

impl EngineConfig {
    /// Set the cursor mode
    pub fn with_cursor_mode(mut self, mode: CursorMode) -> Self {
        self.cursor_mode = mode;
        self
    }

    /// Set the worker thread count
    pub fn with_worker_threads(mut self, n: usize) -> Self {
        self.worker_threads = n;
        self
    }

    /// Set the driver statement cache size
    pub fn with_statement_cache_capacity(mut self, capacity: usize) -> Self {
        self.statement_cache_capacity = capacity;
        self
    }

    /// Reject zero worker threads.
    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 {
            return Err(Error::invalid_config("worker_threads must be at least 1"));
        }
        Ok(())
    }

    /// Parse a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(s)
            .map_err(|e| Error::invalid_config(format!("failed to parse engine config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }
}
