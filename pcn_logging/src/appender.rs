// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use file_rotate::{
    compression::Compression,
    suffix::{AppendTimestamp, FileLimit},
    ContentLimit, FileRotate,
};
use std::{env, path::Path};
use tracing_appender::non_blocking::{NonBlocking, NonBlockingBuilder, WorkerGuard};

const MAX_LOG_SIZE: usize = 20 * 1024 * 1024;
const DEFAULT_LOG_NAME: &str = "pcn_node";

/// Non-blocking writer to `dir/<binary>.log`. The file is rotated past `MAX_LOG_SIZE`,
/// rotated files get a timestamp suffix and only the newest `max_files` are kept.
pub(crate) fn file_rotater(dir: &Path, max_files: usize) -> (NonBlocking, WorkerGuard) {
    let binary_name = env::current_exe()
        .ok()
        .and_then(|path| path.file_stem().map(|stem| stem.to_string_lossy().into_owned()))
        .unwrap_or_else(|| DEFAULT_LOG_NAME.to_string());

    let writer = FileRotate::new(
        dir.join(format!("{binary_name}.log")),
        AppendTimestamp::default(FileLimit::MaxFiles(max_files)),
        ContentLimit::BytesSurpassed(MAX_LOG_SIZE),
        Compression::None,
        #[cfg(unix)]
        None,
    );

    // blocks the caller rather than dropping lines
    NonBlockingBuilder::default().lossy(false).finish(writer)
}
