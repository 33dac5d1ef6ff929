use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use std::sync::{Arc, PoisonError, RwLock};

/// Target used for diagnostics about webhook deliveries.
pub const DIAGNOSTIC_TARGET: &str = "webhook_notifier::delivery";

// Records from these targets are never handed to hooks, otherwise a failing
// webhook would log its own failure and try to deliver it again.
const QUIET_TARGETS: &[&str] = &[DIAGNOSTIC_TARGET, "reqwest", "hyper", "h2", "rustls"];

/// One emitted log line, as seen by a hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub level: Level,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }

    fn from_record(record: &Record<'_>) -> Self {
        Self::new(record.level(), record.args().to_string())
    }
}

/// A listener attached to [`HookedLogger`].
pub trait LogHook: Send + Sync {
    /// Severities this hook wants to receive.
    fn levels(&self) -> &[Level];

    /// Called for every record whose level is in [`LogHook::levels`].
    /// Must not block and must not fail.
    fn fire(&self, entry: LogEntry);
}

/// Returns every level at least as severe as `min`, most severe first.
#[must_use]
pub fn levels_at_or_above(min: Level) -> Vec<Level> {
    Level::iter().filter(|level| *level <= min).collect()
}

/// `log` backend that writes to the console through `env_logger` and
/// forwards records to registered hooks.
pub struct HookedLogger {
    console: env_logger::Logger,
    hooks: RwLock<Vec<Arc<dyn LogHook>>>,
}

impl HookedLogger {
    #[must_use]
    pub fn new(console: env_logger::Logger) -> Self {
        Self {
            console,
            hooks: RwLock::new(Vec::new()),
        }
    }

    /// Builds the console logger from `RUST_LOG`, falling back to `info`.
    #[must_use]
    pub fn from_env() -> Self {
        let console =
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
                .build();
        Self::new(console)
    }

    /// Installs the logger as the global `log` backend.
    ///
    /// The logger lives for the rest of the process, the returned reference
    /// is used to register hooks afterwards.
    ///
    /// # Errors
    ///
    /// Fails if a global logger was already set.
    pub fn install(self) -> Result<&'static HookedLogger, SetLoggerError> {
        let logger: &'static HookedLogger = Box::leak(Box::new(self));
        log::set_logger(logger)?;
        log::set_max_level(logger.max_level());
        Ok(logger)
    }

    /// Registers a hook. Every record emitted from now on whose level the
    /// hook accepts is passed to [`LogHook::fire`].
    pub fn add_hook(&self, hook: Arc<dyn LogHook>) {
        self.hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(hook);

        // The global filter short-circuits the macros, it has to cover the new hook.
        log::set_max_level(log::max_level().max(self.max_level()));
    }

    /// The most verbose level either the console or any hook wants.
    pub fn max_level(&self) -> LevelFilter {
        let hooks = self.hooks.read().unwrap_or_else(PoisonError::into_inner);
        hooks
            .iter()
            .flat_map(|hook| hook.levels().iter())
            .map(Level::to_level_filter)
            .fold(self.console.filter(), Ord::max)
    }

    fn is_quiet(target: &str) -> bool {
        QUIET_TARGETS.iter().any(|quiet| {
            target
                .strip_prefix(quiet)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
        })
    }
}

impl Log for HookedLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        if self.console.enabled(metadata) {
            return true;
        }
        if Self::is_quiet(metadata.target()) {
            return false;
        }
        let hooks = self.hooks.read().unwrap_or_else(PoisonError::into_inner);
        hooks
            .iter()
            .any(|hook| hook.levels().contains(&metadata.level()))
    }

    fn log(&self, record: &Record<'_>) {
        if self.console.matches(record) {
            self.console.log(record);
        }
        if Self::is_quiet(record.target()) {
            return;
        }

        let hooks = self.hooks.read().unwrap_or_else(PoisonError::into_inner);
        let mut entry = None;
        for hook in hooks.iter() {
            if hook.levels().contains(&record.level()) {
                let owned = entry.get_or_insert_with(|| LogEntry::from_record(record));
                hook.fire(owned.clone());
            }
        }
    }

    fn flush(&self) {
        self.console.flush();
    }
}
