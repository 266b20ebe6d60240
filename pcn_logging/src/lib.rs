// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Logging for the payment channel node, built on `tracing-subscriber`.
//!
//! Lines go to stdout or to a rotated file in a directory, in plain text or json.

mod appender;
mod error;
mod layers;

pub use error::Error;

use crate::error::Result;
use std::path::{Path, PathBuf};
use tracing::{info, subscriber::DefaultGuard, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Overrides the default logging targets, e.g. `PCN_LOG=all` or `PCN_LOG=pcn_transfers=DEBUG`.
pub const LOG_ENV_VAR: &str = "PCN_LOG";

const DEFAULT_MAX_LOG_FILES: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutputDest {
    Stdout,
    /// A directory, the log file is created inside it
    Path(PathBuf),
}

impl LogOutputDest {
    /// `data_dir/logs`, next to the node's WAL.
    pub fn in_data_dir(data_dir: &Path) -> Self {
        Self::Path(data_dir.join("logs"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Default,
    Json,
}

pub struct LogBuilder {
    default_logging_targets: Vec<(String, Level)>,
    output_dest: LogOutputDest,
    format: LogFormat,
    max_log_files: usize,
}

impl LogBuilder {
    /// `default_logging_targets` apply unless `PCN_LOG` is set.
    /// Logs to stdout in the default format until told otherwise.
    pub fn new(default_logging_targets: Vec<(String, Level)>) -> Self {
        Self {
            default_logging_targets,
            output_dest: LogOutputDest::Stdout,
            format: LogFormat::Default,
            max_log_files: DEFAULT_MAX_LOG_FILES,
        }
    }

    pub fn output_dest(&mut self, output_dest: LogOutputDest) {
        self.output_dest = output_dest;
    }

    pub fn format(&mut self, format: LogFormat) {
        self.format = format
    }

    /// Rotated log files kept in a `Path` destination
    pub fn max_log_files(&mut self, files: usize) {
        self.max_log_files = files;
    }

    /// Sets the global subscriber. The returned guard flushes file output when dropped and
    /// must be held for the life of the program.
    ///
    /// # Errors
    ///
    /// Fails if `PCN_LOG` cannot be parsed, the log directory cannot be created or a
    /// global subscriber is already set.
    pub fn initialize(self) -> Result<Option<WorkerGuard>> {
        let (layer, guard) = layers::fmt_layer(
            self.default_logging_targets,
            &self.output_dest,
            self.format,
            self.max_log_files,
        )?;
        tracing_subscriber::registry()
            .with(layer)
            .try_init()
            .map_err(|err| Error::LoggingConfiguration(err.to_string()))?;
        Ok(guard)
    }

    /// Logs everything, `test_file_name` included, to a fresh directory under the user's data
    /// dir. The subscriber is the default of the current thread only, so the test must run on a
    /// single threaded runtime.
    pub fn init_single_threaded_tokio_test(
        test_file_name: &str,
    ) -> Result<(Option<WorkerGuard>, DefaultGuard)> {
        std::env::set_var(LOG_ENV_VAR, format!("{test_file_name}=TRACE,all"));
        let output_dest = match dirs_next::data_dir() {
            Some(dir) => {
                let timestamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
                LogOutputDest::Path(
                    dir.join("pcn")
                        .join("test_logs")
                        .join(format!("log_{timestamp}")),
                )
            }
            None => LogOutputDest::Stdout,
        };

        let (layer, guard) =
            layers::fmt_layer(vec![], &output_dest, LogFormat::Default, DEFAULT_MAX_LOG_FILES)?;
        let default_guard = tracing_subscriber::registry().with(layer).set_default();
        if let Some(test_name) = std::thread::current().name() {
            info!("Running test: {test_name}");
        }
        Ok((guard, default_guard))
    }
}
