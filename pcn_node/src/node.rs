// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::{
    error::{Error, Result},
    event::{NodeEvent, NodeEventsChannel, NodeEventsReceiver, NODE_EVENT_CHANNEL_SIZE},
    executor::{EffectExecutor, NoopExecutor},
    Marker,
};
use pcn_transfers::{
    Address, BlockNumber, ChainState, ChannelId, Event, FileWal, NodeKey, PendingEffect,
    StateChange, StateManager, TokenAddress, WalConfig,
};
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    spawn,
    sync::{mpsc, oneshot},
};

/// Reveal timeout for channels whose chain fact does not carry one
const DEFAULT_REVEAL_TIMEOUT: BlockNumber = 10;
const INGEST_QUEUE_SIZE: usize = 1024;

/// Configuration of a node's runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// The WAL lives at `data_dir/wal/state_changes.log`
    pub data_dir: PathBuf,
    pub default_reveal_timeout: BlockNumber,
    /// Capacity of the queue of state changes waiting to be dispatched
    pub ingest_queue_size: usize,
    /// Capacity of the `NodeEvent` broadcast channel
    pub event_channel_size: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let data_dir = dirs_next::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("pcn")
            .join("node");
        Self {
            data_dir,
            default_reveal_timeout: DEFAULT_REVEAL_TIMEOUT,
            ingest_queue_size: INGEST_QUEUE_SIZE,
            event_channel_size: NODE_EVENT_CHANNEL_SIZE,
        }
    }
}

impl NodeConfig {
    pub fn wal_config(&self) -> WalConfig {
        WalConfig::in_dir(&self.data_dir)
    }
}

/// Helper to build and run a Node
pub struct NodeBuilder {
    key: NodeKey,
    config: NodeConfig,
    executor: Arc<dyn EffectExecutor>,
}

impl NodeBuilder {
    /// Instantiate the builder. Effects are dropped until an executor is set.
    pub fn new(key: NodeKey, config: NodeConfig) -> Self {
        Self {
            key,
            config,
            executor: Arc::new(NoopExecutor),
        }
    }

    /// Set the collaborator that carries out `Send*` and `ContractSend*` events
    pub fn executor(&mut self, executor: Arc<dyn EffectExecutor>) {
        self.executor = executor;
    }

    /// Restores the node from the WAL in its data dir and spawns its dispatch task.
    /// Must be called from within a tokio runtime.
    ///
    /// Effects logged before a crash but never recorded as executed are handed to the
    /// executor again before any new state change is taken.
    ///
    /// Returns the handle to the running node and a receiver subscribed before the
    /// `NodeEvent::Started` broadcast.
    ///
    /// # Errors
    ///
    /// Returns an error if the WAL cannot be opened (e.g. it is locked by another
    /// process) or cannot be replayed.
    pub fn build(self) -> Result<(RunningNode, NodeEventsReceiver)> {
        let wal = FileWal::open(self.config.wal_config())?;
        let manager = StateManager::restore(self.key, wal)?;
        let replayed = manager.state_changes()?.len();
        let pending = manager.pending_effects()?;
        Marker::WalReplayed {
            state_changes: replayed,
            pending_effects: pending.len(),
        }
        .log();

        let events_channel = NodeEventsChannel::new(self.config.event_channel_size);
        let events_receiver = events_channel.subscribe();
        let (cmds, cmds_receiver) = mpsc::channel(self.config.ingest_queue_size.max(1));

        let address = manager.address();
        let node = Node {
            manager,
            events_channel: events_channel.clone(),
            executor: self.executor,
            cmds: cmds.downgrade(),
        };
        events_channel.broadcast(NodeEvent::Started { replayed });
        let _handle = spawn(node.run(cmds_receiver, pending));

        let running_node = RunningNode {
            address,
            config: Arc::new(self.config),
            cmds,
            events_channel,
        };
        Ok((running_node, events_receiver))
    }
}

/// Commands queued for the dispatch task.
#[derive(Debug)]
pub(crate) enum NodeCmd {
    Dispatch(StateChange),
    EffectExecuted {
        state_change_id: u64,
        index: u64,
    },
    ChainState(oneshot::Sender<ChainState>),
    Stop(oneshot::Sender<()>),
}

/// Once a node is started and running, the user obtains
/// a `RunningNode` object which can be used to interact with it.
///
/// The node stops once every clone of it is dropped, or on `stop`.
#[derive(Clone)]
pub struct RunningNode {
    address: Address,
    config: Arc<NodeConfig>,
    cmds: mpsc::Sender<NodeCmd>,
    events_channel: NodeEventsChannel,
}

impl RunningNode {
    pub fn address(&self) -> Address {
        self.address
    }

    /// Returns the root directory path for the node.
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Returns the node events channel where to subscribe to receive `NodeEvent`s
    pub fn node_events_channel(&self) -> &NodeEventsChannel {
        &self.events_channel
    }

    /// Queues a state change. State changes are applied one at a time, in queue order.
    ///
    /// Waits while the queue is full.
    pub async fn enqueue(&self, state_change: StateChange) -> Result<()> {
        send_cmd(&self.cmds, NodeCmd::Dispatch(state_change)).await
    }

    /// Builds the state change for a chain `ChannelOpened` fact, using the configured
    /// reveal timeout.
    pub fn channel_opened(
        &self,
        channel_identifier: ChannelId,
        token_address: TokenAddress,
        participants: (Address, Address),
        settle_timeout: BlockNumber,
        block_number: BlockNumber,
    ) -> StateChange {
        StateChange::ContractReceiveChannelOpened {
            channel_identifier,
            token_address,
            participants,
            settle_timeout,
            reveal_timeout: self.config.default_reveal_timeout,
            block_number,
        }
    }

    /// A snapshot of the state, after every state change queued before this call.
    pub async fn chain_state(&self) -> Result<ChainState> {
        let (sender, receiver) = oneshot::channel();
        send_cmd(&self.cmds, NodeCmd::ChainState(sender)).await?;
        receiver
            .await
            .map_err(|err| Error::NodeCmdFailed(err.to_string()))
    }

    /// Stops the dispatch task once the state changes queued so far are applied.
    /// The WAL is unlocked when this returns.
    pub async fn stop(&self) -> Result<()> {
        let (sender, receiver) = oneshot::channel();
        send_cmd(&self.cmds, NodeCmd::Stop(sender)).await?;
        receiver
            .await
            .map_err(|err| Error::NodeCmdFailed(err.to_string()))
    }
}

async fn send_cmd(cmds: &mpsc::Sender<NodeCmd>, cmd: NodeCmd) -> Result<()> {
    cmds.send(cmd)
        .await
        .map_err(|err| Error::NodeCmdFailed(err.to_string()))
}

/// The dispatch task. The only place state changes are applied.
struct Node {
    manager: StateManager<FileWal>,
    events_channel: NodeEventsChannel,
    executor: Arc<dyn EffectExecutor>,
    // weak, so the task ends once every `RunningNode` is dropped
    cmds: mpsc::WeakSender<NodeCmd>,
}

impl Node {
    async fn run(
        mut self,
        mut cmds_receiver: mpsc::Receiver<NodeCmd>,
        pending: Vec<PendingEffect>,
    ) {
        for effect in pending {
            debug!("Redelivering {:?}", effect.event);
            self.execute(effect);
        }

        let mut stop_ack = None;
        while let Some(cmd) = cmds_receiver.recv().await {
            let result = match cmd {
                NodeCmd::Dispatch(state_change) => self.handle_state_change(state_change),
                NodeCmd::EffectExecuted {
                    state_change_id,
                    index,
                } => self
                    .manager
                    .record_executed(state_change_id, index)
                    .map_err(Error::from),
                NodeCmd::ChainState(sender) => {
                    let _ = sender.send(self.manager.current_state().clone());
                    Ok(())
                }
                NodeCmd::Stop(ack) => {
                    stop_ack = Some(ack);
                    break;
                }
            };
            if let Err(err) = result {
                error!("Halting, the WAL could not be written: {err}");
                self.events_channel.broadcast(NodeEvent::Halted {
                    reason: err.to_string(),
                });
                break;
            }
        }

        cmds_receiver.close();
        info!("Node {:?} stopped", self.manager.address());
        // unlocks the WAL
        drop(self.manager);
        if let Some(ack) = stop_ack {
            let _ = ack.send(());
        }
    }

    /// Only a persistence failure is an `Err`, a rejected state change is logged and dropped.
    fn handle_state_change(&mut self, state_change: StateChange) -> Result<()> {
        let failure = match &state_change {
            StateChange::EffectFailed { event, reason } => Some(NodeEvent::EffectFailed {
                event: event.clone(),
                reason: reason.clone(),
            }),
            _ => None,
        };
        let events = match self.manager.dispatch(state_change) {
            Ok(events) => events,
            Err(pcn_transfers::Error::InvalidStateChange(reason)) => {
                Marker::StateChangeRejected(&reason).log();
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        Marker::StateChangeDispatched {
            events: events.len(),
        }
        .log();

        if let Some(failure) = failure {
            self.events_channel.broadcast(failure);
        }

        let Some(state_change_id) = self.manager.last_state_change_id() else {
            return Ok(());
        };
        for (index, event) in (0u64..).zip(events) {
            if event.is_effect() {
                self.execute(PendingEffect {
                    state_change_id,
                    index,
                    event,
                });
            } else {
                self.report(event);
            }
        }
        Ok(())
    }

    fn report(&self, event: Event) {
        match &event {
            Event::EventTransferSentSuccess { identifier, .. }
            | Event::EventTransferReceivedSuccess { identifier, .. } => {
                Marker::TransferCompleted(*identifier).log()
            }
            Event::EventTransferSentFailed { identifier, .. }
            | Event::EventTransferReceivedFailed { identifier, .. } => {
                Marker::TransferFailed(*identifier).log()
            }
            _ => {}
        }
        self.events_channel.broadcast(NodeEvent::Transfer(event));
    }

    /// Runs the effect off the dispatch task. Its completion, or its failure, is queued
    /// back so it lands in the WAL.
    fn execute(&self, effect: PendingEffect) {
        let PendingEffect {
            state_change_id,
            index,
            event,
        } = effect;
        let executor = Arc::clone(&self.executor);
        let cmds = self.cmds.clone();
        let _handle = spawn(async move {
            let event_string = format!("{event:?}");
            let outcome = executor.execute(event.clone()).await;
            let Some(cmds) = cmds.upgrade() else {
                debug!("Node stopped, dropping the outcome of {event_string}");
                return;
            };
            let follow_ups = match outcome {
                Ok(state_changes) => {
                    let executed = NodeCmd::EffectExecuted {
                        state_change_id,
                        index,
                    };
                    std::iter::once(executed)
                        .chain(state_changes.into_iter().map(NodeCmd::Dispatch))
                        .collect::<Vec<_>>()
                }
                Err(err) => {
                    Marker::EffectFailed(&format!("{event_string}: {err}")).log();
                    vec![NodeCmd::Dispatch(StateChange::EffectFailed {
                        event,
                        reason: err.to_string(),
                    })]
                }
            };
            for cmd in follow_ups {
                if let Err(err) = send_cmd(&cmds, cmd).await {
                    debug!("Dropping the outcome of {event_string}: {err}");
                    break;
                }
            }
        });
    }
}
