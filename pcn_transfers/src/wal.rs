// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::{Error, Event, StateChange};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

const WAL_DIR_NAME: &str = "wal";
const WAL_FILE_NAME: &str = "state_changes.log";
const FRAME_HEADER_LEN: usize = 4;

/// One entry of the write-ahead log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalRecord {
    StateChange {
        id: u64,
        state_change: StateChange,
    },
    Events {
        state_change_id: u64,
        events: Vec<Event>,
    },
    /// The effect at `index` in the events of `state_change_id` was carried out.
    EffectExecuted {
        state_change_id: u64,
        index: u64,
    },
}

/// A logged `Send*` or `ContractSend*` event with no `EffectExecuted` record yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEffect {
    pub state_change_id: u64,
    pub index: u64,
    pub event: Event,
}

/// Durable, append-only storage of `WalRecord`s.
pub trait WalStorage: Send {
    /// Returns once the record is durable.
    fn append(&mut self, record: &WalRecord) -> Result<(), Error>;

    /// All records, in append order.
    fn records(&self) -> Result<Vec<WalRecord>, Error>;
}

/// Keeps the log in memory, for tests and throwaway nodes.
#[derive(Debug, Default, Clone)]
pub struct InMemoryWal {
    records: Vec<WalRecord>,
}

impl InMemoryWal {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WalStorage for InMemoryWal {
    fn append(&mut self, record: &WalRecord) -> Result<(), Error> {
        self.records.push(record.clone());
        Ok(())
    }

    fn records(&self) -> Result<Vec<WalRecord>, Error> {
        Ok(self.records.clone())
    }
}

/// Configuration of the file backed log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalConfig {
    pub path: PathBuf,
    /// fsync every appended record.
    pub sync_on_write: bool,
}

impl WalConfig {
    /// The log file under a node's data dir.
    pub fn in_dir(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(WAL_DIR_NAME).join(WAL_FILE_NAME),
            ..Default::default()
        }
    }
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(WAL_DIR_NAME).join(WAL_FILE_NAME),
            sync_on_write: true,
        }
    }
}

/// The log as a single append-only file of `u32` big-endian length prefixed
/// MessagePack frames.
///
/// The file stays exclusively locked while open, a second process gets `WalLocked`.
#[derive(Debug)]
pub struct FileWal {
    file: File,
    config: WalConfig,
}

impl FileWal {
    /// Opens or creates the log, dropping a frame left torn by a crash mid-append.
    pub fn open(config: WalConfig) -> Result<Self, Error> {
        if let Some(dir) = config.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&config.path)?;
        file.try_lock_exclusive().map_err(|_| Error::WalLocked)?;

        let bytes = read_all(&mut file)?;
        let (records, valid_len) = decode_frames(&bytes)?;
        if valid_len < bytes.len() {
            warn!(
                "Dropping {} bytes of torn record at the end of {:?}",
                bytes.len() - valid_len,
                config.path
            );
            file.set_len(valid_len as u64)?;
            file.sync_all()?;
        }
        info!(
            "Opened WAL at {:?} with {} records",
            config.path,
            records.len()
        );

        Ok(Self { file, config })
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }
}

impl WalStorage for FileWal {
    fn append(&mut self, record: &WalRecord) -> Result<(), Error> {
        let body = rmp_serde::to_vec(record)?;
        let len = u32::try_from(body.len()).map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "WAL record too large")
        })?;

        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
        frame.extend(len.to_be_bytes());
        frame.extend(body);
        self.file.write_all(&frame)?;
        if self.config.sync_on_write {
            self.file.sync_data()?;
        }
        Ok(())
    }

    fn records(&self) -> Result<Vec<WalRecord>, Error> {
        let mut file = self.file.try_clone()?;
        let bytes = read_all(&mut file)?;
        let (records, _) = decode_frames(&bytes)?;
        Ok(records)
    }
}

impl Drop for FileWal {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            warn!("Failed to unlock WAL at {:?}: {err}", self.config.path);
        }
    }
}

fn read_all(file: &mut File) -> Result<Vec<u8>, Error> {
    let _ = file.seek(SeekFrom::Start(0))?;
    let mut bytes = vec![];
    let _ = file.read_to_end(&mut bytes)?;
    Ok(bytes)
}

/// Decodes every complete frame. Returns the records and the length of the valid prefix.
///
/// An incomplete trailing frame ends the valid prefix. A complete frame that does not
/// decode is `MalformedRecord`.
fn decode_frames(bytes: &[u8]) -> Result<(Vec<WalRecord>, usize), Error> {
    let mut records = vec![];
    let mut offset = 0;
    while offset < bytes.len() {
        let Some(header) = bytes.get(offset..offset + FRAME_HEADER_LEN) else {
            break;
        };
        let mut len = [0u8; FRAME_HEADER_LEN];
        len.copy_from_slice(header);
        let body_start = offset + FRAME_HEADER_LEN;
        let body_end = body_start + u32::from_be_bytes(len) as usize;
        let Some(body) = bytes.get(body_start..body_end) else {
            break;
        };
        let record = rmp_serde::from_slice(body).map_err(|err| {
            error!("Malformed WAL record at offset {offset}: {err}");
            Error::MalformedRecord(offset as u64)
        })?;
        records.push(record);
        offset = body_end;
    }
    Ok((records, offset))
}
