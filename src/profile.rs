//! Runtime profile detection.
//!
//! A [`RuntimeProfile`] describes the execution model the process runs under.
//! It is computed once from environment signals and never changes afterwards.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Environment variable that forces a profile.
pub const RUNTIME_ENV: &str = "APP_RUNTIME";
/// Set by worker-pool supervisors in every worker they spawn.
pub const WORKER_POOL_ENV: &str = "RR_MODE";
/// Enables the coroutine worker when truthy.
pub const COROUTINE_ENV: &str = "APP_COROUTINE";
/// Enables the event loop when truthy.
pub const EVENT_LOOP_ENV: &str = "APP_EVENT_LOOP";

/// Extension marker advertised by a worker-pool host.
pub const WORKER_POOL_MARKER: &str = "worker-pool";
/// Extension marker advertised by a coroutine host.
pub const COROUTINE_MARKER: &str = "coroutine";
/// Extension marker advertised by an event-loop host.
pub const EVENT_LOOP_MARKER: &str = "event-loop";

/// Execution model governing process lifetime and concurrency.
///
/// # Examples
///
/// ```rust
/// use ferrous_lifecycle::RuntimeProfile;
///
/// assert!(!RuntimeProfile::Traditional.is_long_running());
/// assert!(RuntimeProfile::WorkerPoolSync.is_long_running());
/// assert!(!RuntimeProfile::WorkerPoolSync.is_concurrent());
/// assert!(RuntimeProfile::CoroutineWorker.is_concurrent());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuntimeProfile {
    /// One process per request; everything is discarded afterwards
    Traditional,
    /// Long-running workers, each handling requests strictly one at a time
    WorkerPoolSync,
    /// Long-running, single-threaded cooperative concurrency
    EventLoop,
    /// Long-running, many in-flight requests per worker
    CoroutineWorker,
}

impl RuntimeProfile {
    /// All profiles, in detection priority order of the long-running ones.
    pub const ALL: [RuntimeProfile; 4] = [
        RuntimeProfile::Traditional,
        RuntimeProfile::WorkerPoolSync,
        RuntimeProfile::EventLoop,
        RuntimeProfile::CoroutineWorker,
    ];

    /// Whether one process serves many requests without restarting.
    pub const fn is_long_running(self) -> bool {
        !matches!(self, RuntimeProfile::Traditional)
    }

    /// Whether several requests may be in flight in the same process at once.
    pub const fn is_concurrent(self) -> bool {
        matches!(self, RuntimeProfile::EventLoop | RuntimeProfile::CoroutineWorker)
    }

    /// Stable lowercase name, also accepted by [`FromStr`].
    pub const fn as_str(self) -> &'static str {
        match self {
            RuntimeProfile::Traditional => "traditional",
            RuntimeProfile::WorkerPoolSync => "worker-pool",
            RuntimeProfile::EventLoop => "event-loop",
            RuntimeProfile::CoroutineWorker => "coroutine",
        }
    }

    /// Detects the profile of the running process.
    ///
    /// Shorthand for `detect(&Signals::from_process())`.
    pub fn detect() -> RuntimeProfile {
        detect(&Signals::from_process())
    }
}

impl fmt::Display for RuntimeProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for an unrecognised profile name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown runtime profile {0:?}")]
pub struct UnknownProfile(pub String);

impl FromStr for RuntimeProfile {
    type Err = UnknownProfile;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "traditional" | "cgi" | "fpm" => Ok(RuntimeProfile::Traditional),
            "worker-pool" | "worker_pool" | "workerpool" => Ok(RuntimeProfile::WorkerPoolSync),
            "event-loop" | "event_loop" | "eventloop" => Ok(RuntimeProfile::EventLoop),
            "coroutine" | "coroutine-worker" | "coroutine_worker" => {
                Ok(RuntimeProfile::CoroutineWorker)
            }
            _ => Err(UnknownProfile(s.to_string())),
        }
    }
}

/// Snapshot of the signals profile detection looks at.
///
/// Built from the live process with [`Signals::from_process`], or assembled by
/// hand in tests so detection can be exercised without touching the real
/// environment.
#[derive(Debug, Clone, Default)]
pub struct Signals {
    env: HashMap<String, String>,
    markers: HashSet<String>,
    args: Vec<String>,
}

impl Signals {
    /// Creates an empty signal set (detects as `Traditional`).
    pub fn new() -> Self {
        Self::default()
    }

    /// Captures environment variables and command-line arguments of this process.
    ///
    /// Extension markers are read from the comma separated `APP_EXTENSIONS`
    /// variable, which hosts set to advertise their capabilities.
    pub fn from_process() -> Self {
        let env: HashMap<String, String> = std::env::vars().collect();
        let markers = env
            .get("APP_EXTENSIONS")
            .map(|list| {
                list.split(',')
                    .map(|m| m.trim().to_ascii_lowercase())
                    .filter(|m| !m.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        Self {
            env,
            markers,
            args: std::env::args().skip(1).collect(),
        }
    }

    /// Adds an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Adds an extension marker.
    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.markers.insert(marker.into().to_ascii_lowercase());
        self
    }

    /// Adds a command-line argument.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn env_present(&self, key: &str) -> bool {
        self.env.contains_key(key)
    }

    fn env_truthy(&self, key: &str) -> bool {
        self.env
            .get(key)
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false)
    }

    fn has_marker(&self, marker: &str) -> bool {
        self.markers.contains(marker)
    }

    /// Profile forced on the command line, if any.
    fn cli_override(&self) -> Option<RuntimeProfile> {
        let mut args = self.args.iter();
        while let Some(arg) = args.next() {
            let forced = match arg.as_str() {
                "--traditional" => Some(RuntimeProfile::Traditional),
                "--worker-pool" => Some(RuntimeProfile::WorkerPoolSync),
                "--event-loop" => Some(RuntimeProfile::EventLoop),
                "--coroutine" => Some(RuntimeProfile::CoroutineWorker),
                "--runtime" => args.next().and_then(|v| parse_forced("--runtime", v)),
                other => other
                    .strip_prefix("--runtime=")
                    .and_then(|v| parse_forced("--runtime", v)),
            };
            if forced.is_some() {
                return forced;
            }
        }
        None
    }
}

fn parse_forced(source: &str, value: &str) -> Option<RuntimeProfile> {
    match value.parse() {
        Ok(profile) => Some(profile),
        Err(err) => {
            tracing::warn!(source, %err, "ignoring forced runtime profile");
            None
        }
    }
}

/// Detects the runtime profile from a set of signals.
///
/// Explicit overrides win over auto-detection, and the worker-pool marker wins
/// over the coroutine and event-loop markers because the operator opted into it.
/// Falls back to [`RuntimeProfile::Traditional`]; never fails.
///
/// # Examples
///
/// ```rust
/// use ferrous_lifecycle::{detect, RuntimeProfile, Signals};
///
/// let signals = Signals::new()
///     .with_env("RR_MODE", "http")
///     .with_marker("coroutine");
/// assert_eq!(detect(&signals), RuntimeProfile::WorkerPoolSync);
///
/// let forced = signals.with_arg("--runtime=event-loop");
/// assert_eq!(detect(&forced), RuntimeProfile::EventLoop);
/// ```
pub fn detect(signals: &Signals) -> RuntimeProfile {
    if let Some(profile) = signals.cli_override() {
        return profile;
    }
    if let Some(profile) = signals.env.get(RUNTIME_ENV).and_then(|v| parse_forced(RUNTIME_ENV, v)) {
        return profile;
    }
    if signals.env_present(WORKER_POOL_ENV) || signals.has_marker(WORKER_POOL_MARKER) {
        return RuntimeProfile::WorkerPoolSync;
    }
    if signals.env_truthy(COROUTINE_ENV) || signals.has_marker(COROUTINE_MARKER) {
        return RuntimeProfile::CoroutineWorker;
    }
    if signals.env_truthy(EVENT_LOOP_ENV) || signals.has_marker(EVENT_LOOP_MARKER) {
        return RuntimeProfile::EventLoop;
    }
    RuntimeProfile::Traditional
}
