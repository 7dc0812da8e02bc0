// Copyright 2023 Greptime Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! logging stuffs, inspired by databend

use std::env;
use std::sync::{Arc, Mutex, Once};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

pub const DEFAULT_LOG_TARGETS: &str = "info";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingOptions {
    /// The directory to store log files. Empty means logging to stdout only.
    pub dir: String,
    /// The log level, e.g. "debug,hyper=warn".
    pub level: Option<String>,
    /// Whether to append logs to stdout.
    pub append_stdout: bool,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            dir: String::new(),
            level: None,
            append_stdout: true,
        }
    }
}

static GLOBAL_UT_LOG_GUARD: Lazy<Arc<Mutex<Option<Vec<WorkerGuard>>>>> =
    Lazy::new(|| Arc::new(Mutex::new(None)));

/// Init tracing for unittest. Write logs to file `unittest`.
pub fn init_default_ut_logging() {
    static START: Once = Once::new();

    START.call_once(|| {
        let mut g = GLOBAL_UT_LOG_GUARD.as_ref().lock().unwrap();

        // When running in Github's actions, env "UNITTEST_LOG_DIR" is set to a directory
        // other than "/tmp" to avoid exhausting the runner's small disk.
        let dir =
            env::var("UNITTEST_LOG_DIR").unwrap_or_else(|_| "/tmp/__unittest_logs".to_string());

        let level = env::var("UNITTEST_LOG_LEVEL")
            .unwrap_or_else(|_| "debug,hyper=warn,tower=warn,h2=info".to_string());
        let opts = LoggingOptions {
            dir: dir.clone(),
            level: Some(level),
            ..Default::default()
        };
        *g = Some(init_global_logging("unittest", &opts));

        crate::info!("logs dir = {}", dir);
    });
}

/// Init the global tracing subscriber. Returns the file appender guards which
/// must be kept alive for the lifetime of the process.
pub fn init_global_logging(app_name: &str, opts: &LoggingOptions) -> Vec<WorkerGuard> {
    let mut guards = vec![];

    let filter = opts
        .level
        .as_deref()
        .unwrap_or(DEFAULT_LOG_TARGETS)
        .parse::<EnvFilter>()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_TARGETS));

    let stdout_layer = if opts.append_stdout {
        let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
        guards.push(guard);
        Some(Layer::new().with_writer(writer).with_ansi(true))
    } else {
        None
    };

    let file_layer = if !opts.dir.is_empty() {
        let appender = RollingFileAppender::new(Rotation::HOURLY, &opts.dir, app_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        guards.push(guard);
        Some(Layer::new().with_writer(writer).with_ansi(false))
    } else {
        None
    };

    // `try_init` so that a second call (e.g. from parallel unit tests in one
    // binary) does not panic.
    let _ = Registry::default()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init();

    guards
}
