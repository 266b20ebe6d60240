// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::{Address, ChannelId, Hashlock, Nonce, TokenAmount};
use thiserror::Error;

/// Specialisation of `std::Result` for channel ledger operations.
pub type Result<T, E = ChannelError> = std::result::Result<T, E>;

/// Channel ledger errors.
///
/// All of these are protocol violations or exhaustion conditions: the reducers log them
/// and discard the offending input, they never stop the dispatcher.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ChannelError {
    #[error("Balance proof signature does not verify against {0:?}")]
    InvalidSignature(Address),
    #[error("Stale balance proof nonce: last accepted {last}, got {got}")]
    StaleNonce { last: Nonce, got: Nonce },
    #[error("Balance proof would commit more than the channel deposits: {committed} > {deposits}")]
    OverspendDeposit {
        committed: TokenAmount,
        deposits: TokenAmount,
    },
    #[error("Balance proof decreases the transferred amount from {previous} to {got}")]
    TransferredAmountDecreased {
        previous: TokenAmount,
        got: TokenAmount,
    },
    #[error("Balance proof locksroot does not match the pending locks")]
    LocksrootMismatch,
    #[error("Balance proof is for channel {got}, expected {expected}")]
    ChannelMismatch { expected: ChannelId, got: ChannelId },
    #[error("A lock with hashlock {0} is already pending")]
    DuplicateHashlock(Hashlock),
    #[error("Not enough balance, {available} available, {required} required")]
    InsufficientBalance {
        available: TokenAmount,
        required: TokenAmount,
    },
    #[error("No pending lock with hashlock {0}")]
    UnknownHashlock(Hashlock),
    #[error("{0:?} is not a participant of this channel")]
    UnknownParticipant(Address),
    #[error("Channel {0} is not open")]
    ChannelNotOpen(ChannelId),
    #[error("Channel {0} is settled and can no longer change")]
    ChannelSettled(ChannelId),
    #[error("Channel {0} is unknown")]
    UnknownChannel(ChannelId),
    #[error("Lock does not match the transfer it is attached to")]
    LockMismatch,
    #[error("Unlock must raise the transferred amount to {expected}, got {got}")]
    UnlockAmountMismatch {
        expected: TokenAmount,
        got: TokenAmount,
    },
    #[error("Lock with hashlock {0} already expired")]
    LockExpired(Hashlock),
    #[error("Secret does not open hashlock {0}")]
    InvalidSecret(Hashlock),
    #[error("Overflow occurred while adding values")]
    NumericOverflow,
    #[error("Could not deserialize hex string: {0}")]
    HexDeserializationFailed(String),
}

/// Dispatcher and write-ahead log errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The state change was rejected at ingestion and was neither logged nor applied.
    #[error("Invalid state change: {0}")]
    InvalidStateChange(String),
    /// A WAL record could not be decoded.
    #[error("Malformed WAL record at offset {0}")]
    MalformedRecord(u64),
    /// Another process holds the WAL.
    #[error("The write-ahead log is locked by another process")]
    WalLocked,
    /// Channel ledger error.
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
    /// MsgPack serialisation error
    #[error("MsgPack serialisation error:: {0}")]
    Serialisation(#[from] rmp_serde::encode::Error),
    /// MsgPack deserialisation error
    #[error("MsgPack deserialisation error:: {0}")]
    Deserialisation(#[from] rmp_serde::decode::Error),
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
