// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The runtime around a payment channel node's state machine.
//!
//! State changes from the transport, the chain watcher and the user are queued and applied
//! one at a time by a single dispatch task, which owns the node's `StateManager` and its
//! WAL. Each resulting `Send*` or `ContractSend*` event is handed to an [`EffectExecutor`],
//! user-visible outcomes are broadcast as [`NodeEvent`]s.

#![warn(unused_qualifications, unused_results, clippy::unwrap_used)]

#[macro_use]
extern crate tracing;

mod error;
mod event;
mod executor;
mod log_markers;
mod node;

pub use self::{
    error::Error,
    event::{NodeEvent, NodeEventsChannel, NodeEventsReceiver},
    executor::{EffectExecutor, NoopExecutor},
    log_markers::Marker,
    node::{NodeBuilder, NodeConfig, RunningNode},
};
