// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::error::{Error, Result};
use pcn_transfers::Event;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub(crate) const NODE_EVENT_CHANNEL_SIZE: usize = 500;

/// Channel where users of the public API can listen to events broadcasted by the node.
#[derive(Clone)]
pub struct NodeEventsChannel(broadcast::Sender<NodeEvent>);

/// Type of channel receiver where events are broadcasted to by the node.
pub type NodeEventsReceiver = broadcast::Receiver<NodeEvent>;

impl Default for NodeEventsChannel {
    fn default() -> Self {
        Self::new(NODE_EVENT_CHANNEL_SIZE)
    }
}

impl NodeEventsChannel {
    pub(crate) fn new(capacity: usize) -> Self {
        Self(broadcast::channel(capacity.max(1)).0)
    }

    /// Returns a new receiver to listen to the channel.
    /// Multiple receivers can be actively listening.
    pub fn subscribe(&self) -> NodeEventsReceiver {
        self.0.subscribe()
    }

    // Broadcast a new event, meant to be a helper only used by the pcn_node's internals.
    pub(crate) fn broadcast(&self, event: NodeEvent) {
        let event_string = format!("{event:?}");
        if let Err(err) = self.0.send(event) {
            trace!("Error occurred when trying to broadcast a node event ({event_string:?}): {err}");
        }
    }

    /// Returns the number of active receivers
    pub fn receiver_count(&self) -> usize {
        self.0.receiver_count()
    }
}

/// Type of events broadcasted by the node to the public API.
#[derive(Clone, Serialize, custom_debug::Debug, Deserialize, PartialEq, Eq)]
pub enum NodeEvent {
    /// The WAL has been replayed and the node accepts state changes
    Started {
        /// Number of state changes replayed from the WAL
        replayed: usize,
    },
    /// A user-visible outcome of a transfer, e.g. `EventTransferSentSuccess`
    Transfer(Event),
    /// An effect could not be carried out. The failure is in the WAL and the effect is
    /// delivered again on the next start.
    EffectFailed {
        event: Event,
        reason: String,
    },
    /// The node stopped applying state changes after failing to persist one
    Halted {
        /// The persistence error
        reason: String,
    },
}

impl NodeEvent {
    /// Convert NodeEvent to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        rmp_serde::to_vec(&self).map_err(|_| Error::NodeEventParsingFailed)
    }

    /// Get NodeEvent from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        rmp_serde::from_slice(bytes).map_err(|_| Error::NodeEventParsingFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::Result;

    #[tokio::test]
    async fn subscribers_receive_broadcasts() -> Result<()> {
        let channel = NodeEventsChannel::new(4);
        let mut first = channel.subscribe();
        let mut second = channel.subscribe();
        assert_eq!(channel.receiver_count(), 2);

        let event = NodeEvent::Transfer(Event::EventTransferSentFailed {
            identifier: 3,
            reason: "no route available".to_string(),
        });
        channel.broadcast(event.clone());

        assert_eq!(first.recv().await?, event);
        assert_eq!(second.recv().await?, event);
        assert_eq!(NodeEvent::from_bytes(&event.to_bytes()?)?, event);
        Ok(())
    }

    #[test]
    fn broadcasting_without_receivers_is_harmless() {
        NodeEventsChannel::default().broadcast(NodeEvent::Started { replayed: 0 });
    }
}
