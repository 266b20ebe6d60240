// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::error::Result;
use async_trait::async_trait;
use pcn_transfers::{Event, StateChange};

/// Carries out the effect of a `Send*` or `ContractSend*` event: the peer transport
/// and the chain client live behind this seam.
///
/// Any state changes returned (e.g. the confirmation of a chain call) are fed back
/// into the node's ingest queue. An `Err` is logged to the WAL and the event is handed
/// over again on the next start, as is any event whose execution was cut short by a
/// crash, so the same event may be executed more than once.
#[async_trait]
pub trait EffectExecutor: Send + Sync + 'static {
    async fn execute(&self, event: Event) -> Result<Vec<StateChange>>;
}

/// Drops every effect, recording it as executed. Useful for a node that only replays and
/// audits its WAL.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopExecutor;

#[async_trait]
impl EffectExecutor for NoopExecutor {
    async fn execute(&self, event: Event) -> Result<Vec<StateChange>> {
        trace!("Not executing {event:?}");
        Ok(vec![])
    }
}
