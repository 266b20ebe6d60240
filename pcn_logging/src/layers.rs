// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::{
    appender,
    error::{Error, Result},
    LogFormat, LogOutputDest, LOG_ENV_VAR,
};
use std::collections::BTreeMap;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    filter::Targets,
    fmt::{self, writer::BoxMakeWriter},
    Layer, Registry,
};

/// Keyword turning on TRACE for every crate of the node
const ALL_PCN_LOGS: &str = "all";
const PCN_CRATES: [&str; 3] = ["pcn_logging", "pcn_node", "pcn_transfers"];

pub(crate) type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Formats events to `dest`, keeping the targets of `PCN_LOG` when it is set and
/// `default_targets` otherwise. The guard flushes the file writer on drop.
pub(crate) fn fmt_layer(
    default_targets: Vec<(String, Level)>,
    dest: &LogOutputDest,
    format: LogFormat,
    max_log_files: usize,
) -> Result<(BoxedLayer, Option<WorkerGuard>)> {
    let targets = match std::env::var(LOG_ENV_VAR) {
        Ok(value) => parse_targets(&value)?,
        Err(_) => default_targets,
    };
    let filter = Targets::new().with_targets(targets);

    let (writer, guard) = match dest {
        LogOutputDest::Stdout => (BoxMakeWriter::new(std::io::stdout), None),
        LogOutputDest::Path(dir) => {
            std::fs::create_dir_all(dir)?;
            println!("Logging to directory: {dir:?}");
            let (writer, guard) = appender::file_rotater(dir, max_log_files);
            (BoxMakeWriter::new(writer), Some(guard))
        }
    };

    let layer = match format {
        LogFormat::Json => fmt::layer()
            .json()
            .flatten_event(true)
            .with_writer(writer)
            .with_filter(filter)
            .boxed(),
        LogFormat::Default => fmt::layer()
            .with_ansi(false)
            .with_writer(writer)
            .with_filter(filter)
            .boxed(),
    };
    Ok((layer, guard))
}

/// Parses `PCN_LOG`, e.g. `all,tokio=INFO,pcn_node=ERROR`.
///
/// A target without a level logs at TRACE. A level given for a target wins over `all`.
pub(crate) fn parse_targets(value: &str) -> Result<Vec<(String, Level)>> {
    let mut targets = BTreeMap::new();
    let mut explicit = BTreeMap::new();

    for entry in value.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
        if entry == ALL_PCN_LOGS {
            targets.extend(PCN_CRATES.map(|name| (name.to_string(), Level::TRACE)));
            continue;
        }
        let (name, level) = entry.split_once('=').unwrap_or((entry, "trace"));
        if name.is_empty() {
            return Err(Error::LoggingConfiguration(format!(
                "missing target name in {entry:?}"
            )));
        }
        let level = level.parse::<Level>().map_err(|_| {
            Error::LoggingConfiguration(format!("unknown log level {level:?} for {name}"))
        })?;
        let _ = explicit.insert(name.to_string(), level);
    }

    targets.extend(explicit);
    Ok(targets.into_iter().collect())
}
