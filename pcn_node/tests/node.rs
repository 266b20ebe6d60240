// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use assert_fs::TempDir;
use async_trait::async_trait;
use eyre::{eyre, Result};
use pcn_logging::LogBuilder;
use pcn_node::{EffectExecutor, NodeBuilder, NodeConfig, NodeEvent, NodeEventsReceiver, RunningNode};
use pcn_transfers::{
    rng, views, Address, ChannelStatus, Event, FileWal, NodeKey, Secret, StateChange,
    StateManager, TransferDescription, XorName,
};
use std::{sync::Arc, time::Duration};
use tokio::{sync::mpsc, time::timeout};

const TOKEN: XorName = XorName([7; 32]);
const SETTLE_TIMEOUT: u64 = 50;
const WAIT: Duration = Duration::from_secs(5);

/// Hands every effect to the test, and answers a channel close with the chain's confirmation.
struct RecordingExecutor {
    effects: mpsc::UnboundedSender<Event>,
    closing_address: Address,
}

#[async_trait]
impl EffectExecutor for RecordingExecutor {
    async fn execute(&self, event: Event) -> Result<Vec<StateChange>, pcn_node::Error> {
        let feedback = match &event {
            Event::ContractSendChannelClose {
                channel_identifier,
                ..
            } => vec![StateChange::ContractReceiveChannelClosed {
                channel_identifier: *channel_identifier,
                closing_address: self.closing_address,
                block_number: 2,
            }],
            _ => vec![],
        };
        let _ = self.effects.send(event);
        Ok(feedback)
    }
}

/// Fails every effect, as an unreachable chain client would.
struct FailingExecutor;

#[async_trait]
impl EffectExecutor for FailingExecutor {
    async fn execute(&self, _event: Event) -> Result<Vec<StateChange>, pcn_node::Error> {
        Err(pcn_node::Error::EffectFailed(
            "chain client unreachable".to_string(),
        ))
    }
}

fn config(dir: &TempDir) -> NodeConfig {
    NodeConfig {
        data_dir: dir.path().to_path_buf(),
        ..Default::default()
    }
}

fn recording_node(
    key: &NodeKey,
    dir: &TempDir,
) -> Result<(RunningNode, NodeEventsReceiver, mpsc::UnboundedReceiver<Event>)> {
    let (effects, effects_receiver) = mpsc::unbounded_channel();
    let mut builder = NodeBuilder::new(key.clone(), config(dir));
    builder.executor(Arc::new(RecordingExecutor {
        effects,
        closing_address: key.address(),
    }));
    let (node, events) = builder.build()?;
    Ok((node, events, effects_receiver))
}

/// Block 1, then channel 1 between the node and `partner` with `deposit` on our side.
async fn open_channel(node: &RunningNode, partner: Address, deposit: u64) -> Result<()> {
    node.enqueue(StateChange::Block { block_number: 1 }).await?;
    node.enqueue(node.channel_opened(1, TOKEN, (node.address(), partner), SETTLE_TIMEOUT, 1))
        .await?;
    node.enqueue(StateChange::ContractReceiveChannelNewDeposit {
        channel_identifier: 1,
        participant: node.address(),
        total_deposit: deposit,
    })
    .await?;
    Ok(())
}

async fn next_effect(effects: &mut mpsc::UnboundedReceiver<Event>) -> Result<Event> {
    timeout(WAIT, effects.recv())
        .await?
        .ok_or_else(|| eyre!("effects channel closed"))
}

async fn wait_for_closed(node: &RunningNode) -> Result<()> {
    timeout(WAIT, async {
        loop {
            let state = node.chain_state().await?;
            if state.channels.get(&1).map(|channel| channel.status) == Some(ChannelStatus::Closed)
            {
                return Ok::<_, eyre::Report>(());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?
}

async fn next_transfer_event(events: &mut NodeEventsReceiver) -> Result<Event> {
    loop {
        if let NodeEvent::Transfer(event) = timeout(WAIT, events.recv()).await?? {
            return Ok(event);
        }
    }
}

#[tokio::test]
async fn node_restores_its_state_from_the_wal() -> Result<()> {
    let _log_guards = LogBuilder::init_single_threaded_tokio_test("node")?;
    let dir = TempDir::new()?;
    let key = NodeKey::random();
    let partner = NodeKey::random().address();

    let (node, mut events) = NodeBuilder::new(key.clone(), config(&dir)).build()?;
    assert_eq!(events.recv().await?, NodeEvent::Started { replayed: 0 });
    open_channel(&node, partner, 10).await?;
    let before = node.chain_state().await?;
    assert_eq!(before.channels.len(), 1);
    node.stop().await?;
    assert!(node.enqueue(StateChange::Block { block_number: 2 }).await.is_err());

    let (node, mut events) = NodeBuilder::new(key, config(&dir)).build()?;
    assert_eq!(events.recv().await?, NodeEvent::Started { replayed: 3 });
    assert_eq!(node.chain_state().await?, before);
    Ok(())
}

#[tokio::test]
async fn a_locked_wal_fails_the_build() -> Result<()> {
    let dir = TempDir::new()?;
    let (_node, _events) = NodeBuilder::new(NodeKey::random(), config(&dir)).build()?;
    assert!(NodeBuilder::new(NodeKey::random(), config(&dir))
        .build()
        .is_err());
    Ok(())
}

#[tokio::test]
async fn rejected_state_changes_are_dropped_and_the_node_keeps_running() -> Result<()> {
    let dir = TempDir::new()?;
    let (node, _events) = NodeBuilder::new(NodeKey::random(), config(&dir)).build()?;

    node.enqueue(StateChange::Block { block_number: 5 }).await?;
    node.enqueue(StateChange::Block { block_number: 3 }).await?;
    node.enqueue(node.channel_opened(1, TOKEN, (node.address(), node.address()), 50, 5))
        .await?;

    let state = node.chain_state().await?;
    assert_eq!(state.block_number, 5);
    assert!(state.channels.is_empty());
    Ok(())
}

#[tokio::test]
async fn direct_transfer_is_executed_and_reported() -> Result<()> {
    let dir = TempDir::new()?;
    let key = NodeKey::random();
    let target = NodeKey::random().address();
    let (node, mut events, mut effects) = recording_node(&key, &dir)?;
    open_channel(&node, target, 10).await?;

    let secret = Secret::random(&mut rng::thread_rng());
    let transfer = TransferDescription {
        identifier: 1,
        token: TOKEN,
        amount: 3,
        initiator: node.address(),
        target,
        hashlock: secret.hashlock(),
        secret: Some(secret),
        expiration: None,
    };
    let routes = views::routes_for_token(&node.chain_state().await?, &TOKEN);
    node.enqueue(StateChange::ActionInitInitiator { transfer, routes })
        .await?;

    let effect = next_effect(&mut effects).await?;
    assert!(matches!(
        effect,
        Event::SendMediatedTransfer { recipient, .. } if recipient == target
    ));

    node.enqueue(StateChange::ReceiveSecretRequest {
        identifier: 1,
        hashlock: secret.hashlock(),
        amount: 3,
        sender: target,
    })
    .await?;
    assert_eq!(
        next_effect(&mut effects).await?,
        Event::SendRevealSecret {
            recipient: target,
            secret
        }
    );

    node.enqueue(StateChange::ReceiveSecretReveal {
        secret,
        sender: target,
    })
    .await?;
    assert!(matches!(
        next_effect(&mut effects).await?,
        Event::SendBalanceProof { recipient, .. } if recipient == target
    ));

    let mut reported = vec![];
    for _ in 0..2 {
        reported.push(next_transfer_event(&mut events).await?);
    }
    assert!(reported.contains(&Event::EventTransferSentSuccess {
        identifier: 1,
        amount: 3,
        target
    }));

    let state = node.chain_state().await?;
    assert!(state.payments.is_empty());
    assert_eq!(views::distributable(&state, 1), Some(7));
    Ok(())
}

#[tokio::test]
async fn effect_outcomes_are_fed_back_into_the_queue() -> Result<()> {
    let dir = TempDir::new()?;
    let key = NodeKey::random();
    let (node, _events, mut effects) = recording_node(&key, &dir)?;
    open_channel(&node, NodeKey::random().address(), 10).await?;

    node.enqueue(StateChange::ActionChannelClose {
        channel_identifier: 1,
    })
    .await?;
    assert!(matches!(
        next_effect(&mut effects).await?,
        Event::ContractSendChannelClose {
            channel_identifier: 1,
            balance_proof: None
        }
    ));

    wait_for_closed(&node).await
}

#[tokio::test]
async fn unexecuted_effects_are_delivered_after_a_restart() -> Result<()> {
    let dir = TempDir::new()?;
    let key = NodeKey::random();
    let partner = NodeKey::random();

    // the close is logged, then the process dies before executing it
    let wal = FileWal::open(config(&dir).wal_config())?;
    let mut manager = StateManager::new(key.clone(), wal);
    let _ = manager.dispatch(StateChange::Block { block_number: 1 })?;
    let _ = manager.dispatch(StateChange::ContractReceiveChannelOpened {
        channel_identifier: 1,
        token_address: TOKEN,
        participants: (key.address(), partner.address()),
        settle_timeout: SETTLE_TIMEOUT,
        reveal_timeout: 10,
        block_number: 1,
    })?;
    let close = manager.dispatch(StateChange::ActionChannelClose {
        channel_identifier: 1,
    })?;
    assert_eq!(close.len(), 1);
    drop(manager);

    let (node, mut events, mut effects) = recording_node(&key, &dir)?;
    assert_eq!(events.recv().await?, NodeEvent::Started { replayed: 3 });
    assert_eq!(next_effect(&mut effects).await?, close[0]);
    wait_for_closed(&node).await?;
    node.stop().await?;

    // executed once, so not delivered again
    let (_node, _events, mut effects) = recording_node(&key, &dir)?;
    assert!(timeout(Duration::from_millis(200), effects.recv())
        .await
        .is_err());
    Ok(())
}

#[tokio::test]
async fn failed_effects_are_logged_and_retried_on_restart() -> Result<()> {
    let dir = TempDir::new()?;
    let key = NodeKey::random();
    let mut builder = NodeBuilder::new(key.clone(), config(&dir));
    builder.executor(Arc::new(FailingExecutor));
    let (node, mut events) = builder.build()?;
    open_channel(&node, NodeKey::random().address(), 10).await?;
    node.enqueue(StateChange::ActionChannelClose {
        channel_identifier: 1,
    })
    .await?;

    let failure = loop {
        if let NodeEvent::EffectFailed { event, reason } = timeout(WAIT, events.recv()).await?? {
            break (event, reason);
        }
    };
    assert!(matches!(
        failure.0,
        Event::ContractSendChannelClose {
            channel_identifier: 1,
            ..
        }
    ));
    assert!(failure.1.contains("chain client unreachable"));
    node.stop().await?;

    let manager = StateManager::restore(key.clone(), FileWal::open(config(&dir).wal_config())?)?;
    assert!(matches!(
        manager.state_changes()?.last(),
        Some((_, StateChange::EffectFailed { .. }))
    ));
    assert_eq!(manager.pending_effects()?.len(), 1);
    drop(manager);

    let (node, _events, mut effects) = recording_node(&key, &dir)?;
    assert!(matches!(
        next_effect(&mut effects).await?,
        Event::ContractSendChannelClose {
            channel_identifier: 1,
            ..
        }
    ));
    wait_for_closed(&node).await
}
