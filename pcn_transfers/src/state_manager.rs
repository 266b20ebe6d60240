// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::{
    mediated_transfer::{initiator, mediator, target, TransitionContext},
    state::lift,
    Address, BlockNumber, ChainState, ChannelId, ChannelState, Error, Event, Hashlock, NodeKey,
    PendingEffect, StateChange, TokenAddress, TransferTask, WalRecord, WalStorage,
};

use std::collections::BTreeMap;

/// Applies one state change to the aggregate state and returns the resulting events.
///
/// Deterministic: the same state, state change and key always produce the same new state
/// and events. Protocol violations are logged and leave the state as it was.
pub fn state_transition(
    chain_state: &mut ChainState,
    state_change: &StateChange,
    key: &NodeKey,
) -> Vec<Event> {
    trace!("Applying {state_change:?}");
    match state_change {
        StateChange::Block { block_number } => handle_block(chain_state, *block_number, key),
        StateChange::ActionInitInitiator { .. }
        | StateChange::ActionInitMediator { .. }
        | StateChange::ActionInitTarget { .. } => handle_init(chain_state, state_change, key),
        StateChange::ActionChannelClose { channel_identifier } => {
            handle_channel_close(chain_state, *channel_identifier)
        }
        StateChange::ContractReceiveChannelOpened {
            channel_identifier,
            token_address,
            participants,
            settle_timeout,
            reveal_timeout,
            block_number,
        } => {
            handle_channel_opened(
                chain_state,
                *channel_identifier,
                *token_address,
                *participants,
                (*settle_timeout, *reveal_timeout),
                *block_number,
            );
            vec![]
        }
        StateChange::ContractReceiveChannelNewDeposit {
            channel_identifier,
            participant,
            total_deposit,
        } => {
            if let Some(channel) = chain_state.channels.get_mut(channel_identifier) {
                if let Err(err) = channel.set_total_deposit(participant, *total_deposit) {
                    warn!("Discarding deposit on channel {channel_identifier}: {err}");
                }
            }
            vec![]
        }
        StateChange::ContractReceiveChannelClosed {
            channel_identifier,
            closing_address,
            block_number,
        } => {
            let mut events = handle_channel_closed(
                chain_state,
                *channel_identifier,
                closing_address,
                *block_number,
            );
            events.extend(dispatch_to_all_tasks(chain_state, state_change, key));
            events
        }
        StateChange::ContractReceiveChannelSettled {
            channel_identifier,
            block_number,
        } => {
            if let Some(channel) = chain_state.channels.get_mut(channel_identifier) {
                if let Err(err) = channel.settle(*block_number) {
                    debug!("Ignoring settlement of channel {channel_identifier}: {err}");
                }
            }
            dispatch_to_all_tasks(chain_state, state_change, key)
        }
        StateChange::EffectFailed { event, reason } => {
            warn!("Effect {event:?} failed: {reason}");
            vec![]
        }
        StateChange::ContractReceiveSecretReveal { .. }
        | StateChange::ReceiveSecretRequest { .. }
        | StateChange::ReceiveSecretReveal { .. }
        | StateChange::ReceiveBalanceProof { .. }
        | StateChange::ReceiveTransferRefund { .. } => match state_change.hashlock() {
            Some(hashlock) => dispatch_to_task(chain_state, hashlock, state_change, key),
            None => vec![],
        },
    }
}

/// Channels first, so every task sees settled timeouts at the new height.
fn handle_block(
    chain_state: &mut ChainState,
    block_number: BlockNumber,
    key: &NodeKey,
) -> Vec<Event> {
    if block_number <= chain_state.block_number {
        debug!(
            "Ignoring block {block_number}, already at {}",
            chain_state.block_number
        );
        return vec![];
    }
    chain_state.block_number = block_number;

    let mut events = vec![];
    for channel in chain_state.channels.values_mut() {
        if channel.is_settleable(block_number) && !channel.settle_requested {
            channel.settle_requested = true;
            events.push(Event::ContractSendChannelSettle {
                channel_identifier: channel.channel_identifier,
            });
        }
    }
    events.extend(dispatch_to_all_tasks(
        chain_state,
        &StateChange::Block { block_number },
        key,
    ));
    events
}

fn handle_init(chain_state: &mut ChainState, state_change: &StateChange, key: &NodeKey) -> Vec<Event> {
    let Some(hashlock) = state_change.hashlock() else {
        return vec![];
    };
    if chain_state.payments.contains_key(&hashlock) {
        debug!("Ignoring duplicate transfer for hashlock {hashlock}");
        return vec![];
    }

    let mut ctx = TransitionContext {
        channels: &mut chain_state.channels,
        block_number: chain_state.block_number,
        key,
    };
    let transition = match state_change {
        StateChange::ActionInitInitiator { transfer, routes } => lift(
            initiator::init(transfer.clone(), routes.clone(), &mut ctx),
            TransferTask::Initiator,
        ),
        StateChange::ActionInitMediator {
            from_route,
            from_transfer,
            routes,
        } => lift(
            mediator::init(
                from_route.clone(),
                from_transfer.clone(),
                routes.clone(),
                &mut ctx,
            ),
            TransferTask::Mediator,
        ),
        StateChange::ActionInitTarget {
            from_route,
            from_transfer,
        } => lift(
            target::init(from_route.clone(), from_transfer.clone(), &mut ctx),
            TransferTask::Target,
        ),
        _ => return vec![],
    };

    store_task(chain_state, hashlock, transition.new_state);
    transition.events
}

fn dispatch_to_task(
    chain_state: &mut ChainState,
    hashlock: Hashlock,
    state_change: &StateChange,
    key: &NodeKey,
) -> Vec<Event> {
    let Some(task) = chain_state.payments.remove(&hashlock) else {
        debug!("No transfer for hashlock {hashlock}, ignoring state change");
        return vec![];
    };

    let mut ctx = TransitionContext {
        channels: &mut chain_state.channels,
        block_number: chain_state.block_number,
        key,
    };
    let transition = task.state_transition(state_change, &mut ctx);
    store_task(chain_state, hashlock, transition.new_state);
    transition.events
}

fn dispatch_to_all_tasks(
    chain_state: &mut ChainState,
    state_change: &StateChange,
    key: &NodeKey,
) -> Vec<Event> {
    let hashlocks: Vec<Hashlock> = chain_state.payments.keys().copied().collect();
    hashlocks
        .into_iter()
        .flat_map(|hashlock| dispatch_to_task(chain_state, hashlock, state_change, key))
        .collect()
}

fn store_task(chain_state: &mut ChainState, hashlock: Hashlock, task: Option<TransferTask>) {
    match task {
        Some(task) if task.is_terminal() => {
            trace!("Transfer for hashlock {hashlock} finished");
        }
        Some(task) => {
            let _ = chain_state.payments.insert(hashlock, task);
        }
        None => {}
    }
}

fn handle_channel_close(chain_state: &ChainState, channel_identifier: ChannelId) -> Vec<Event> {
    match chain_state.channels.get(&channel_identifier) {
        Some(channel) if channel.is_open() => vec![Event::ContractSendChannelClose {
            channel_identifier,
            balance_proof: channel.partner_state.balance_proof.clone(),
        }],
        _ => {
            debug!("Channel {channel_identifier} is not open, nothing to close");
            vec![]
        }
    }
}

fn handle_channel_opened(
    chain_state: &mut ChainState,
    channel_identifier: ChannelId,
    token_address: TokenAddress,
    (first, second): (Address, Address),
    (settle_timeout, reveal_timeout): (BlockNumber, BlockNumber),
    block_number: BlockNumber,
) {
    let partner = if first == chain_state.our_address {
        second
    } else if second == chain_state.our_address {
        first
    } else {
        debug!("Channel {channel_identifier} opened between other nodes");
        return;
    };
    if chain_state.channels.contains_key(&channel_identifier) {
        debug!("Channel {channel_identifier} already known");
        return;
    }

    let mut channel = ChannelState::new(
        channel_identifier,
        token_address,
        chain_state.our_address,
        partner,
        settle_timeout,
        reveal_timeout,
    );
    channel.open(block_number);
    info!("Channel {channel_identifier} opened with {partner:?}");
    let _ = chain_state.channels.insert(channel_identifier, channel);
}

fn handle_channel_closed(
    chain_state: &mut ChainState,
    channel_identifier: ChannelId,
    closing_address: &Address,
    block_number: BlockNumber,
) -> Vec<Event> {
    let our_address = chain_state.our_address;
    let Some(channel) = chain_state.channels.get_mut(&channel_identifier) else {
        return vec![];
    };
    if let Err(err) = channel.close(block_number) {
        debug!("Ignoring close of channel {channel_identifier}: {err}");
        return vec![];
    }

    match &channel.partner_state.balance_proof {
        Some(balance_proof) if *closing_address != our_address => {
            vec![Event::ContractSendChannelUpdateTransfer {
                channel_identifier,
                balance_proof: balance_proof.clone(),
            }]
        }
        _ => vec![],
    }
}

/// Ties the dispatcher to a write-ahead log.
///
/// Every state change is durable before its events are handed out, and replaying the log
/// from an empty state reproduces the exact state it left.
#[derive(Debug)]
pub struct StateManager<W: WalStorage> {
    key: NodeKey,
    storage: W,
    chain_state: ChainState,
    next_id: u64,
}

impl<W: WalStorage> StateManager<W> {
    /// Starts from an empty state. `storage` is expected to be empty, use `restore` otherwise.
    pub fn new(key: NodeKey, storage: W) -> Self {
        let chain_state = ChainState::new(key.address());
        Self {
            key,
            storage,
            chain_state,
            next_id: 0,
        }
    }

    /// Rebuilds the state by replaying every logged state change.
    pub fn restore(key: NodeKey, storage: W) -> Result<Self, Error> {
        let mut manager = Self::new(key, storage);
        let mut replayed = 0;
        for record in manager.storage.records()? {
            if let WalRecord::StateChange { id, state_change } = record {
                let _ = state_transition(&mut manager.chain_state, &state_change, &manager.key);
                manager.next_id = id + 1;
                replayed += 1;
            }
        }
        info!("Replayed {replayed} state changes from the WAL");
        Ok(manager)
    }

    /// Validates, logs and applies `state_change`, then logs and returns its events.
    ///
    /// A rejected state change is neither logged nor applied. A storage error must stop
    /// the caller: no event of an unlogged state change may be executed.
    pub fn dispatch(&mut self, state_change: StateChange) -> Result<Vec<Event>, Error> {
        state_change.validate()?;
        if let StateChange::Block { block_number } = state_change {
            if block_number <= self.chain_state.block_number {
                return Err(Error::InvalidStateChange(format!(
                    "block {block_number} does not advance past {}",
                    self.chain_state.block_number
                )));
            }
        }

        let id = self.next_id;
        self.storage.append(&WalRecord::StateChange {
            id,
            state_change: state_change.clone(),
        })?;
        self.next_id += 1;

        let events = state_transition(&mut self.chain_state, &state_change, &self.key);
        self.storage.append(&WalRecord::Events {
            state_change_id: id,
            events: events.clone(),
        })?;
        Ok(events)
    }

    /// Id of the last logged state change.
    pub fn last_state_change_id(&self) -> Option<u64> {
        self.next_id.checked_sub(1)
    }

    /// Logs that an effect was carried out, so it is not delivered again after a restart.
    pub fn record_executed(&mut self, state_change_id: u64, index: u64) -> Result<(), Error> {
        self.storage.append(&WalRecord::EffectExecuted {
            state_change_id,
            index,
        })
    }

    /// Effects logged but never recorded as executed, in log order.
    ///
    /// A crash between logging and executing leaves them here, so every effect is delivered
    /// at least once. Executors must tolerate a repeated delivery.
    pub fn pending_effects(&self) -> Result<Vec<PendingEffect>, Error> {
        let mut pending = BTreeMap::new();
        for record in self.storage.records()? {
            match record {
                WalRecord::Events {
                    state_change_id,
                    events,
                } => {
                    for (index, event) in (0u64..).zip(events) {
                        if event.is_effect() {
                            let _ = pending.insert((state_change_id, index), event);
                        }
                    }
                }
                WalRecord::EffectExecuted {
                    state_change_id,
                    index,
                } => {
                    let _ = pending.remove(&(state_change_id, index));
                }
                WalRecord::StateChange { .. } => {}
            }
        }
        Ok(pending
            .into_iter()
            .map(|((state_change_id, index), event)| PendingEffect {
                state_change_id,
                index,
                event,
            })
            .collect())
    }

    pub fn current_state(&self) -> &ChainState {
        &self.chain_state
    }

    pub fn address(&self) -> Address {
        self.chain_state.our_address
    }

    pub fn storage(&self) -> &W {
        &self.storage
    }

    /// Logged state changes with their ids.
    pub fn state_changes(&self) -> Result<Vec<(u64, StateChange)>, Error> {
        Ok(self
            .storage
            .records()?
            .into_iter()
            .filter_map(|record| match record {
                WalRecord::StateChange { id, state_change } => Some((id, state_change)),
                WalRecord::Events { .. } | WalRecord::EffectExecuted { .. } => None,
            })
            .collect())
    }

    /// Logged events with the id of the state change that produced them.
    pub fn events(&self) -> Result<Vec<(u64, Event)>, Error> {
        Ok(self
            .storage
            .records()?
            .into_iter()
            .filter_map(|record| match record {
                WalRecord::Events {
                    state_change_id,
                    events,
                } => Some((state_change_id, events)),
                WalRecord::StateChange { .. } | WalRecord::EffectExecuted { .. } => None,
            })
            .flat_map(|(id, events)| events.into_iter().map(move |event| (id, event)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{rng, InMemoryWal, Secret, TransferDescription};
    use eyre::Result;
    use tracing_test::traced_test;

    struct FailingWal;

    impl WalStorage for FailingWal {
        fn append(&mut self, _record: &WalRecord) -> Result<(), Error> {
            Err(std::io::Error::other("disk full").into())
        }

        fn records(&self) -> Result<Vec<WalRecord>, Error> {
            Ok(vec![])
        }
    }

    fn opened(us: &NodeKey, partner: &NodeKey, channel_identifier: ChannelId) -> StateChange {
        StateChange::ContractReceiveChannelOpened {
            channel_identifier,
            token_address: xor_name::XorName([7; 32]),
            participants: (us.address(), partner.address()),
            settle_timeout: 50,
            reveal_timeout: 10,
            block_number: 1,
        }
    }

    fn deposit(us: &NodeKey, channel_identifier: ChannelId, total_deposit: u64) -> StateChange {
        StateChange::ContractReceiveChannelNewDeposit {
            channel_identifier,
            participant: us.address(),
            total_deposit,
        }
    }

    #[test]
    fn chain_facts_build_the_ledger() -> Result<()> {
        let us = NodeKey::random();
        let partner = NodeKey::random();
        let mut manager = StateManager::new(us.clone(), InMemoryWal::new());

        let _ = manager.dispatch(opened(&us, &partner, 1))?;
        let _ = manager.dispatch(deposit(&us, 1, 10))?;
        let _ = manager.dispatch(deposit(&us, 1, 4))?;

        let channel = &manager.current_state().channels[&1];
        assert!(channel.is_open());
        assert_eq!(channel.partner(), partner.address());
        assert_eq!(channel.our_state.deposit, 10);

        let events = manager.dispatch(StateChange::ActionChannelClose {
            channel_identifier: 1,
        })?;
        assert_eq!(
            events,
            vec![Event::ContractSendChannelClose {
                channel_identifier: 1,
                balance_proof: None
            }]
        );
        Ok(())
    }

    #[test]
    fn settle_is_requested_once_after_the_settle_window() -> Result<()> {
        let us = NodeKey::random();
        let partner = NodeKey::random();
        let mut manager = StateManager::new(us.clone(), InMemoryWal::new());
        let _ = manager.dispatch(opened(&us, &partner, 1))?;
        let _ = manager.dispatch(StateChange::ContractReceiveChannelClosed {
            channel_identifier: 1,
            closing_address: partner.address(),
            block_number: 5,
        })?;

        assert!(manager
            .dispatch(StateChange::Block { block_number: 55 })?
            .is_empty());
        assert_eq!(
            manager.dispatch(StateChange::Block { block_number: 56 })?,
            vec![Event::ContractSendChannelSettle {
                channel_identifier: 1
            }]
        );
        assert!(manager
            .dispatch(StateChange::Block { block_number: 57 })?
            .is_empty());
        Ok(())
    }

    #[test]
    fn rejected_state_changes_are_not_logged() -> Result<()> {
        let us = NodeKey::random();
        let mut manager = StateManager::new(us.clone(), InMemoryWal::new());
        let _ = manager.dispatch(StateChange::Block { block_number: 3 })?;

        assert!(matches!(
            manager.dispatch(StateChange::Block { block_number: 3 }),
            Err(Error::InvalidStateChange(_))
        ));
        assert!(matches!(
            manager.dispatch(opened(&us, &us, 1)),
            Err(Error::InvalidStateChange(_))
        ));
        assert_eq!(manager.state_changes()?.len(), 1);
        Ok(())
    }

    #[test]
    fn storage_failure_stops_before_applying() {
        let us = NodeKey::random();
        let partner = NodeKey::random();
        let mut manager = StateManager::new(us.clone(), FailingWal);

        assert!(matches!(
            manager.dispatch(opened(&us, &partner, 1)),
            Err(Error::Io(_))
        ));
        assert!(manager.current_state().channels.is_empty());
    }

    #[test]
    #[traced_test]
    fn unknown_transfer_is_ignored_and_logged() -> Result<()> {
        let us = NodeKey::random();
        let mut manager = StateManager::new(us.clone(), InMemoryWal::new());
        let secret = Secret::random(&mut rng::thread_rng());

        let events = manager.dispatch(StateChange::ReceiveSecretReveal {
            secret,
            sender: NodeKey::random().address(),
        })?;
        assert!(events.is_empty());
        assert!(logs_contain("No transfer for hashlock"));
        Ok(())
    }

    #[test]
    fn restore_replays_to_the_same_state() -> Result<()> {
        let us = NodeKey::random();
        let partner = NodeKey::random();
        let mut manager = StateManager::new(us.clone(), InMemoryWal::new());
        let _ = manager.dispatch(opened(&us, &partner, 1))?;
        let _ = manager.dispatch(deposit(&us, 1, 10))?;

        let secret = Secret::random(&mut rng::thread_rng());
        let transfer = TransferDescription {
            identifier: 9,
            token: xor_name::XorName([7; 32]),
            amount: 4,
            initiator: us.address(),
            target: partner.address(),
            hashlock: secret.hashlock(),
            secret: Some(secret),
            expiration: None,
        };
        let routes = crate::views::routes_for_token(manager.current_state(), &transfer.token);
        let events = manager.dispatch(StateChange::ActionInitInitiator { transfer, routes })?;
        assert!(matches!(&events[..], [Event::SendMediatedTransfer { .. }]));
        let _ = manager.dispatch(StateChange::Block { block_number: 2 })?;

        let storage = manager.storage.clone();
        let restored = StateManager::restore(us.clone(), storage.clone())?;
        let restored_again = StateManager::restore(us, storage)?;
        assert_eq!(
            restored.current_state().to_bytes()?,
            manager.current_state().to_bytes()?
        );
        assert_eq!(
            restored.current_state().to_bytes()?,
            restored_again.current_state().to_bytes()?
        );
        assert_eq!(restored.next_id, manager.next_id);
        assert_eq!(manager.events()?.len(), 1);
        Ok(())
    }

    #[test]
    fn unexecuted_effects_survive_a_restore() -> Result<()> {
        let us = NodeKey::random();
        let partner = NodeKey::random();
        let mut manager = StateManager::new(us.clone(), InMemoryWal::new());
        let _ = manager.dispatch(opened(&us, &partner, 1))?;
        let _ = manager.dispatch(deposit(&us, 1, 10))?;
        let _ = manager.dispatch(StateChange::ActionChannelClose {
            channel_identifier: 1,
        })?;
        let close_id = manager.last_state_change_id();
        assert_eq!(close_id, Some(2));

        let restored = StateManager::restore(us.clone(), manager.storage.clone())?;
        let pending = restored.pending_effects()?;
        assert_eq!(
            pending,
            vec![PendingEffect {
                state_change_id: 2,
                index: 0,
                event: Event::ContractSendChannelClose {
                    channel_identifier: 1,
                    balance_proof: None
                }
            }]
        );

        manager.record_executed(2, 0)?;
        let restored = StateManager::restore(us, manager.storage.clone())?;
        assert!(restored.pending_effects()?.is_empty());
        assert_eq!(restored.state_changes()?.len(), 3);
        Ok(())
    }

    #[test]
    fn failed_effects_are_logged_and_stay_pending() -> Result<()> {
        let us = NodeKey::random();
        let partner = NodeKey::random();
        let mut manager = StateManager::new(us.clone(), InMemoryWal::new());
        let _ = manager.dispatch(opened(&us, &partner, 1))?;
        let close = manager.dispatch(StateChange::ActionChannelClose {
            channel_identifier: 1,
        })?;
        let before = manager.current_state().to_bytes()?;

        let events = manager.dispatch(StateChange::EffectFailed {
            event: close[0].clone(),
            reason: "chain client unreachable".to_string(),
        })?;
        assert!(events.is_empty());
        assert_eq!(manager.current_state().to_bytes()?, before);
        assert!(matches!(
            manager.state_changes()?.last(),
            Some((2, StateChange::EffectFailed { .. }))
        ));
        assert_eq!(manager.pending_effects()?.len(), 1);
        Ok(())
    }
}
