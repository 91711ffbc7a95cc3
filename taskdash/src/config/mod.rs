//! Configuration system for the `TaskDash` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/taskdash/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use taskdash_proto::task::{TaskFilter, TaskId, UserId};

use crate::dashboard::{
    DEFAULT_NOTIFICATION_POLL_INTERVAL, DEFAULT_TASK_POLL_INTERVAL, SyncConfig,
};
use crate::transport::Session;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// A setting needed to talk to the server is missing.
    #[error("missing setting: {0} (set it on the command line, in the environment, or under [server])")]
    Missing(&'static str),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    server: ServerFileConfig,
    sync: SyncFileConfig,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    base_url: Option<String>,
    user_id: Option<i64>,
    token: Option<String>,
    request_timeout_secs: Option<u64>,
}

/// `[sync]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SyncFileConfig {
    task_poll_interval_secs: Option<u64>,
    notification_poll_interval_secs: Option<u64>,
    event_buffer: Option<usize>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Clone)]
pub struct ClientConfig {
    // -- Server --
    /// Base URL of the task server's API.
    pub base_url: Option<String>,
    /// The logged-in user.
    pub user_id: Option<UserId>,
    /// Bearer token issued at login.
    pub token: Option<String>,
    /// Per-request timeout.
    pub request_timeout: Duration,

    // -- Sync --
    pub task_poll_interval: Duration,
    pub notification_poll_interval: Duration,
    /// Capacity of the event channel.
    pub event_buffer: usize,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("user_id", &self.user_id)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("request_timeout", &self.request_timeout)
            .field("task_poll_interval", &self.task_poll_interval)
            .field("notification_poll_interval", &self.notification_poll_interval)
            .field("event_buffer", &self.event_buffer)
            .finish()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        let sync = SyncConfig::default();
        Self {
            base_url: None,
            user_id: None,
            token: None,
            request_timeout: Duration::from_secs(30),
            task_poll_interval: sync.task_poll_interval,
            notification_poll_interval: sync.notification_poll_interval,
            event_buffer: sync.event_buffer,
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// Otherwise the default path (`~/.config/taskdash/config.toml`) is
    /// tried and silently ignored if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Priority: CLI > file > default. Kept apart from `load()` so it can be
    /// tested without touching the filesystem.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            base_url: cli
                .server_url
                .clone()
                .or_else(|| file.server.base_url.clone()),
            user_id: cli.user_id.or(file.server.user_id).map(UserId::new),
            token: cli.token.clone().or_else(|| file.server.token.clone()),
            request_timeout: file
                .server
                .request_timeout_secs
                .map_or(defaults.request_timeout, Duration::from_secs),
            task_poll_interval: file
                .sync
                .task_poll_interval_secs
                .map_or(DEFAULT_TASK_POLL_INTERVAL, Duration::from_secs),
            notification_poll_interval: file
                .sync
                .notification_poll_interval_secs
                .map_or(DEFAULT_NOTIFICATION_POLL_INTERVAL, Duration::from_secs),
            event_buffer: file.sync.event_buffer.unwrap_or(defaults.event_buffer),
        }
    }

    /// Build the [`Session`] the transport authenticates with.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Missing`] if the user id or token is not configured.
    pub fn to_session(&self) -> Result<Session, ConfigError> {
        let user_id = self.user_id.ok_or(ConfigError::Missing("user id"))?;
        let token = self
            .token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or(ConfigError::Missing("token"))?;
        Ok(Session::new(user_id, token))
    }

    /// The server base URL.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Missing`] if no URL is configured.
    pub fn server_url(&self) -> Result<&str, ConfigError> {
        self.base_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or(ConfigError::Missing("server url"))
    }

    /// Poll timing and buffering for a [`Dashboard`](crate::dashboard::Dashboard).
    #[must_use]
    pub const fn to_sync_config(&self) -> SyncConfig {
        SyncConfig {
            task_poll_interval: self.task_poll_interval,
            notification_poll_interval: self.notification_poll_interval,
            event_buffer: self.event_buffer,
        }
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Task-assignment dashboard client")]
pub struct CliArgs {
    /// Base URL of the task server's API.
    #[arg(long, env = "TASKDASH_URL")]
    pub server_url: Option<String>,

    /// Id of the logged-in user.
    #[arg(long, env = "TASKDASH_USER")]
    pub user_id: Option<i64>,

    /// Bearer token issued at login.
    #[arg(long, env = "TASKDASH_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Path to config file (default: `~/.config/taskdash/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "TASKDASH_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/taskdash.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Run against a built-in demo server instead of the network.
    #[arg(long)]
    pub offline: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// What to do once connected.
#[derive(clap::Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Keep both lists in sync and print changes until Ctrl-C.
    Watch,
    /// List tasks.
    Tasks {
        /// Which tasks to list: received, sent or all.
        #[arg(long, default_value = "received")]
        filter: TaskFilter,
        /// Only tasks in this status.
        #[arg(long)]
        status: Option<taskdash_proto::task::TaskStatus>,
        /// Case-insensitive search on title and counterpart name.
        #[arg(long)]
        search: Option<String>,
    },
    /// List assignable users.
    Users,
    /// Show one user's received and sent tasks.
    UserTasks { id: i64 },
    /// Remove a user account.
    DeleteUser { id: i64 },
    /// Assign a new task.
    Create {
        /// Receiver's user id.
        #[arg(long)]
        to: i64,
        /// Task title.
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Deadline as `YYYY-MM-DD`.
        #[arg(long)]
        due: Option<chrono::NaiveDate>,
        /// Initial subtask (repeatable).
        #[arg(long = "subtask")]
        subtasks: Vec<String>,
    },
    /// Move a received task to its next status.
    Advance { id: TaskId },
    /// Cancel a sent task.
    Cancel { id: TaskId },
    /// Cycle one subtask's status.
    SubtaskAdvance {
        id: TaskId,
        subtask: String,
    },
    /// Add a subtask to a received task.
    SubtaskAdd {
        id: TaskId,
        title: String,
    },
    /// List notifications.
    Notifications,
    /// Mark one notification read.
    Read { id: String },
    /// Mark every notification read.
    ReadAll,
    /// Delete every task (asks the server to re-check credentials).
    DeleteAll {
        #[arg(long)]
        username: String,
        #[arg(long, env = "TASKDASH_PASSWORD", hide_env_values = true)]
        password: String,
    },
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&Path>) -> Result<ConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let Some(config_dir) = dirs::config_dir() else {
        return Ok(ConfigFile::default());
    };
    let path = config_dir.join("taskdash").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
