// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Global `tracing` subscriber setup.
//!
//! Layers installed by [`init_global_logging`]:
//!
//! - stdout, text or JSON (if `append_stdout`)
//! - hourly rolling log files (if `dir` is set)
//! - hourly rolling error-only files (if `dir` is set)
//!
//! All writers are non-blocking; keep the returned [`WorkerGuard`]s alive
//! for as long as logs should be flushed.

use std::{env, io::IsTerminal, sync::Once};

use bon::Builder;
use once_cell::sync::{Lazy, OnceCell};
use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize, de};
use smart_default::SmartDefault;
use snafu::{ResultExt, Snafu};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, filter,
    layer::{Layered, SubscriberExt},
    reload,
};

/// Directory for log files when none is configured explicitly.
pub const DEFAULT_LOGGING_DIR: &str = "logs";

/// Filter used when neither the options nor `RUST_LOG` name one.
const DEFAULT_LOG_TARGETS: &str = "info";

/// Filter for unit tests unless `UNITTEST_LOG_LEVEL` is set.
const DEFAULT_UT_LOG_TARGETS: &str = "debug,ackq_common_storage_kv=info";

/// Handle for changing the level filter after initialization.
pub static RELOAD_HANDLE: OnceCell<reload::Handle<filter::Targets, Registry>> = OnceCell::new();

static GLOBAL_UT_LOG_GUARD: Lazy<Mutex<Option<Vec<WorkerGuard>>>> = Lazy::new(|| Mutex::new(None));

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum LoggingError {
    #[snafu(display("Invalid log filter '{filter}'"))]
    InvalidFilter {
        filter: String,
        source: filter::ParseError,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Failed to create rolling log file in {dir}"))]
    RollingFile {
        dir:    String,
        source: tracing_appender::rolling::InitError,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Failed to install global subscriber"))]
    SetGlobalDefault {
        source: tracing::subscriber::SetGlobalDefaultError,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Logging is already initialized"))]
    AlreadyInitialized,
}

/// Treat an empty string as the type's default value.
pub fn empty_string_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    let s = String::deserialize(deserializer)?;
    if s.is_empty() {
        return Ok(T::default());
    }
    T::deserialize(de::value::StrDeserializer::new(&s))
        .map_err(|e: de::value::Error| de::Error::custom(format!("invalid value '{s}': {e}")))
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, SmartDefault, Builder)]
#[serde(default)]
pub struct LoggingOptions {
    /// Directory for rolling log files. Empty disables file output.
    #[default = ""]
    #[builder(default, into)]
    pub dir: String,

    /// Filter such as `"info,ackq_common_storage_queue=debug"`. Falls back
    /// to `RUST_LOG`, then `info`.
    #[builder(into)]
    pub level: Option<String>,

    #[serde(default, deserialize_with = "empty_string_as_default")]
    #[builder(default)]
    pub log_format: LogFormat,

    /// Rotated files kept per log kind (720 hourly files is 30 days).
    #[default = 720]
    #[builder(default = 720)]
    pub max_log_files: usize,

    #[default = true]
    #[builder(default = true)]
    pub append_stdout: bool,
}

#[derive(Clone, Debug, Copy, PartialEq, Eq, Serialize, Deserialize, Default, derive_more::Display)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// One JSON object per event, for log pipelines.
    Json,
    /// Human-readable lines.
    #[default]
    Text,
}

/// The registry with the reloadable level filter applied first.
type FilteredRegistry = Layered<reload::Layer<filter::Targets, Registry>, Registry>;

type BoxedLayer = Box<dyn Layer<FilteredRegistry> + Send + Sync>;

fn fmt_layer<W>(writer: W, format: LogFormat, ansi: bool) -> BoxedLayer
where
    W: for<'w> tracing_subscriber::fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        LogFormat::Json => tracing_subscriber::fmt::Layer::new()
            .json()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_current_span(true)
            .with_span_list(true)
            .boxed(),
        LogFormat::Text => tracing_subscriber::fmt::Layer::new()
            .with_writer(writer)
            .with_ansi(ansi)
            .boxed(),
    }
}

fn rolling_appender(opts: &LoggingOptions, prefix: &str) -> Result<RollingFileAppender, LoggingError> {
    RollingFileAppender::builder()
        .rotation(Rotation::HOURLY)
        .filename_prefix(prefix)
        .max_log_files(opts.max_log_files)
        .build(&opts.dir)
        .context(RollingFileSnafu { dir: opts.dir.clone() })
}

/// Install the global subscriber. Only the first call takes effect; later
/// calls fail with [`LoggingError::AlreadyInitialized`].
pub fn init_global_logging(app_name: &str, opts: &LoggingOptions) -> Result<Vec<WorkerGuard>, LoggingError> {
    static START: Once = Once::new();

    let mut result = Err(LoggingError::AlreadyInitialized);
    START.call_once(|| result = install(app_name, opts));
    result
}

fn install(app_name: &str, opts: &LoggingOptions) -> Result<Vec<WorkerGuard>, LoggingError> {
    let env_level = env::var(EnvFilter::DEFAULT_ENV).ok();
    let level = opts
        .level
        .as_deref()
        .or(env_level.as_deref())
        .unwrap_or(DEFAULT_LOG_TARGETS);
    let targets = level
        .parse::<filter::Targets>()
        .context(InvalidFilterSnafu { filter: level })?;
    let (dyn_filter, reload_handle) = reload::Layer::new(targets);

    let mut guards = Vec::new();
    let mut layers: Vec<BoxedLayer> = Vec::new();

    if opts.append_stdout {
        let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
        guards.push(guard);
        layers.push(fmt_layer(writer, opts.log_format, std::io::stdout().is_terminal()));
    }

    if !opts.dir.is_empty() {
        let (writer, guard) = tracing_appender::non_blocking(rolling_appender(opts, app_name)?);
        guards.push(guard);
        layers.push(fmt_layer(writer, opts.log_format, false));

        let (writer, guard) =
            tracing_appender::non_blocking(rolling_appender(opts, &format!("{app_name}-err"))?);
        guards.push(guard);
        layers.push(fmt_layer(writer, opts.log_format, false).with_filter(filter::LevelFilter::ERROR).boxed());
    }

    // A logger installed by someone else is not fatal.
    let _ = LogTracer::init();
    let subscriber = Registry::default().with(dyn_filter).with(layers);
    tracing::subscriber::set_global_default(subscriber).context(SetGlobalDefaultSnafu)?;
    let _ = RELOAD_HANDLE.set(reload_handle);

    tracing::info!(app = app_name, level, dir = %opts.dir, "Logging initialized");
    Ok(guards)
}

/// Log to files under `UNITTEST_LOG_DIR` (default `/tmp/__unittest_logs`).
/// Safe to call from every test.
pub fn init_default_ut_logging() {
    static START: Once = Once::new();

    START.call_once(|| {
        let dir = env::var("UNITTEST_LOG_DIR").unwrap_or_else(|_| "/tmp/__unittest_logs".to_string());
        let level = env::var("UNITTEST_LOG_LEVEL").unwrap_or_else(|_| DEFAULT_UT_LOG_TARGETS.to_string());
        let opts = LoggingOptions::builder().dir(dir).level(level).build();

        match init_global_logging("unittest", &opts) {
            Ok(guards) => *GLOBAL_UT_LOG_GUARD.lock() = Some(guards),
            Err(e) => eprintln!("unit test logging disabled: {e}"),
        }
    });
}
