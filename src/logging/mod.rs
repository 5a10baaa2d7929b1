//! Logging infrastructure - structured tracing throughout the bridge
//!
//! Design: Uses `tracing` for structured, contextual logging with:
//! - Configurable level, format and destination
//! - Zero-cost when disabled
//! - Span-based performance tracking
//! - Console or rolling file output through `tracing-appender`
//!
//! Bridge events use fixed targets so they can be filtered separately:
//! `gcbridge::identity`, `gcbridge::marshal`, `gcbridge::redirect` and
//! `gcbridge::foreign`.

use once_cell::sync::OnceCell;
use std::io;
use std::path::PathBuf;
use tracing::Level;
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// Global logging state
static LOGGER_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, multi-line
    Pretty,
    /// Single line per event
    Compact,
    /// Structured JSON
    Json,
}

/// Log output destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    Stderr,
    /// Daily rolling file
    File { directory: PathBuf, prefix: String },
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default log level
    pub level: Level,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Show span events (enter/exit)
    pub show_spans: bool,
    /// Enable `perf::track` timing events
    pub track_performance: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Compact,
            output: LogOutput::Stdout,
            show_spans: false,
            track_performance: cfg!(debug_assertions),
        }
    }
}

impl LogConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // GCBRIDGE_LOG_LEVEL: trace, debug, info, warn, error
        if let Ok(level_str) = std::env::var("GCBRIDGE_LOG_LEVEL") {
            config.level = match level_str.to_lowercase().as_str() {
                "trace" => Level::TRACE,
                "debug" => Level::DEBUG,
                "info" => Level::INFO,
                "warn" => Level::WARN,
                "error" => Level::ERROR,
                _ => Level::INFO,
            };
        }

        // GCBRIDGE_LOG_FILE: directory for rolling log files
        if let Ok(path) = std::env::var("GCBRIDGE_LOG_FILE") {
            config.output = LogOutput::File {
                directory: PathBuf::from(path),
                prefix: "gcbridge.log".to_string(),
            };
        }

        if std::env::var("GCBRIDGE_LOG_JSON").is_ok() {
            config.format = LogFormat::Json;
        }

        config.show_spans = std::env::var("GCBRIDGE_LOG_SPANS").is_ok();

        if let Ok(val) = std::env::var("GCBRIDGE_LOG_PERF") {
            config.track_performance = val == "1" || val.to_lowercase() == "true";
        }

        config
    }

    /// Errors only
    pub fn performance() -> Self {
        Self {
            level: Level::ERROR,
            format: LogFormat::Compact,
            output: LogOutput::Stderr,
            show_spans: false,
            track_performance: false,
        }
    }

    /// Everything, with spans
    pub fn debug() -> Self {
        Self {
            level: Level::TRACE,
            format: LogFormat::Pretty,
            output: LogOutput::Stderr,
            show_spans: true,
            track_performance: true,
        }
    }
}

/// Initialize logging from the environment
pub fn init() -> Option<WorkerGuard> {
    init_with_config(LogConfig::from_env())
}

/// Initialize logging; returns the appender guard on first call only
///
/// The guard flushes buffered events when dropped, so keep it alive for
/// the life of the process.
pub fn init_with_config(config: LogConfig) -> Option<WorkerGuard> {
    if LOGGER_INITIALIZED.set(()).is_err() {
        return None;
    }

    let filter = build_filter(&config);
    let span_events = if config.show_spans {
        FmtSpan::ENTER | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let (writer, guard) = match &config.output {
        LogOutput::Stdout => tracing_appender::non_blocking(io::stdout()),
        LogOutput::Stderr => tracing_appender::non_blocking(io::stderr()),
        LogOutput::File { directory, prefix } => {
            tracing_appender::non_blocking(rolling::daily(directory, prefix))
        }
    };

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(writer)
            .pretty()
            .with_span_events(span_events)
            .with_filter(filter)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .with_writer(writer)
            .compact()
            .with_span_events(span_events)
            .with_target(true)
            .with_filter(filter)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .with_writer(writer)
            .json()
            .with_span_events(span_events)
            .with_filter(filter)
            .boxed(),
    };

    // Another subscriber may already be installed by the embedding host
    let _ = tracing_subscriber::registry().with(layer).try_init();

    Some(guard)
}

/// Check if logging is initialized
pub fn is_initialized() -> bool {
    LOGGER_INITIALIZED.get().is_some()
}

fn build_filter(config: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("gcbridge={}", config.level.as_str().to_lowercase()))
    })
}

// ============================================================================
// Bridge-specific logging functions
// ============================================================================

/// Log bridge context creation
pub fn log_bridge_init(engine_assembly: &str) {
    use tracing::info;
    info!(
        target: "gcbridge::foreign",
        event = "bridge_init",
        assembly = engine_assembly,
        "Bridge context bound to engine library"
    );
}

/// Log bridge shutdown
pub fn log_bridge_shutdown(live_proxies: usize) {
    use tracing::info;
    info!(
        target: "gcbridge::identity",
        event = "bridge_shutdown",
        live_proxies = live_proxies,
        "Bridge context shutting down"
    );
}

/// Log proxy creation for a host object
#[inline]
pub fn log_proxy_created(host_address: usize, class: &str) {
    use tracing::trace;
    trace!(
        target: "gcbridge::identity",
        event = "proxy_created",
        host = host_address,
        class = class,
        "Foreign proxy created"
    );
}

/// Log proxy disconnection
#[inline]
pub fn log_proxy_severed(host_address: usize, reason: &'static str) {
    use tracing::trace;
    trace!(
        target: "gcbridge::identity",
        event = "proxy_severed",
        host = host_address,
        reason = reason,
        "Foreign proxy disconnected"
    );
}

/// Log proxy class resolution
pub fn log_proxy_class_resolved(class: &str, proxy_class: &str) {
    use tracing::debug;
    debug!(
        target: "gcbridge::identity",
        event = "proxy_class_resolved",
        class = class,
        proxy_class = proxy_class,
        "Proxy constructor bound"
    );
}

/// Log handle strength change
pub fn log_handle_strength(host_address: usize, weak: bool) {
    use tracing::debug;
    debug!(
        target: "gcbridge::identity",
        event = "handle_strength",
        host = host_address,
        weak = weak,
        "Proxy handle strength changed"
    );
}

/// Log reachability sweep completion
pub fn log_sweep_complete(severed: usize, remaining: usize, duration_us: u64) {
    use tracing::info;
    info!(
        target: "gcbridge::identity",
        event = "sweep_complete",
        severed = severed,
        remaining = remaining,
        duration_us = duration_us,
        "Reachability sweep complete"
    );
}

/// Log scope teardown
pub fn log_scope_teardown(scope_root: usize, severed: usize) {
    use tracing::debug;
    debug!(
        target: "gcbridge::identity",
        event = "scope_teardown",
        scope = scope_root,
        severed = severed,
        "Scope torn down"
    );
}

/// Log a foreign collection cycle
pub fn log_foreign_collection(full: bool, duration_us: u64) {
    use tracing::debug;
    debug!(
        target: "gcbridge::foreign",
        event = "foreign_gc",
        full = full,
        duration_us = duration_us,
        "Foreign garbage collection finished"
    );
}

/// Log a completed function link
pub fn log_function_linked(function: &str, method: &str, arguments: usize, scratch_bytes: usize) {
    use tracing::debug;
    debug!(
        target: "gcbridge::redirect",
        event = "function_linked",
        function = function,
        method = method,
        arguments = arguments,
        scratch_bytes = scratch_bytes,
        "Function linked to foreign method"
    );
}

/// Log a link failure
pub fn log_link_failure(function: &str, error: &str) {
    use tracing::error;
    error!(
        target: "gcbridge::redirect",
        event = "link_failure",
        function = function,
        error = error,
        "Failed to link function"
    );
}

/// Log a redirected call entering the foreign runtime
#[inline]
pub fn log_redirect_call(function: &str, depth: usize) {
    use tracing::trace;
    trace!(
        target: "gcbridge::redirect",
        event = "redirect_call",
        function = function,
        depth = depth,
        "Redirected call"
    );
}

/// Log an exception thrown by a foreign method
pub fn log_foreign_exception(function: &str, message: &str, stack_trace: &str) {
    use tracing::error;
    error!(
        target: "gcbridge::foreign",
        event = "foreign_exception",
        function = function,
        message = message,
        stack_trace = stack_trace,
        "Foreign method threw"
    );
}

/// Log a failed boundary helper call
pub fn log_boundary_error(helper: &str, error: &str) {
    use tracing::warn;
    warn!(
        target: "gcbridge::foreign",
        event = "boundary_error",
        helper = helper,
        error = error,
        "Boundary helper failed"
    );
}

/// Log struct factory resolution
pub fn log_struct_factory(struct_name: &str) {
    use tracing::debug;
    debug!(
        target: "gcbridge::marshal",
        event = "struct_factory",
        name = struct_name,
        "Struct boxing factory bound"
    );
}

/// Performance tracking utilities
pub mod perf {
    use std::time::{Duration, Instant};
    use tracing::debug;

    /// Track operation duration (returns guard that logs on drop)
    #[must_use]
    pub fn track(operation: &'static str) -> PerformanceGuard {
        PerformanceGuard {
            operation,
            start: Instant::now(),
        }
    }

    pub struct PerformanceGuard {
        operation: &'static str,
        start: Instant,
    }

    impl PerformanceGuard {
        pub fn elapsed(&self) -> Duration {
            self.start.elapsed()
        }
    }

    impl Drop for PerformanceGuard {
        fn drop(&mut self) {
            let elapsed = self.start.elapsed();
            debug!(
                operation = self.operation,
                duration_us = elapsed.as_micros() as u64,
                "operation completed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_creation() {
        let config = LogConfig::default();
        assert_eq!(config.level, Level::INFO);
        assert_eq!(config.output, LogOutput::Stdout);

        let perf_config = LogConfig::performance();
        assert_eq!(perf_config.level, Level::ERROR);

        let debug_config = LogConfig::debug();
        assert_eq!(debug_config.level, Level::TRACE);
        assert!(debug_config.show_spans);
    }

    #[test]
    fn test_init_idempotent() {
        let _guard = init_with_config(LogConfig::performance());
        assert!(init_with_config(LogConfig::performance()).is_none());
        assert!(is_initialized());
    }

    #[test]
    fn test_perf_guard_measures() {
        let guard = perf::track("noop");
        assert!(guard.elapsed() >= std::time::Duration::ZERO);
    }
}
