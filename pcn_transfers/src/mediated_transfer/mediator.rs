// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use super::{Transition, TransitionContext};
use crate::{
    Address, BalanceProof, BlockNumber, ChannelId, Event, Lock, LockedTransfer, PaymentId,
    RouteState, RoutesState, Secret, StateChange,
};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediatorStatus {
    Init,
    /// Forwarded downstream, waiting for the secret.
    Forwarded,
    /// Paid downstream and revealed upstream, waiting for the payer's unlock.
    Revealing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediatorState {
    pub from_route: RouteState,
    pub from_transfer: LockedTransfer,
    pub routes: RoutesState,
    pub route: Option<RouteState>,
    pub outgoing: Option<LockedTransfer>,
    pub secret: Option<Secret>,
    pub status: MediatorStatus,
    /// The on-chain close and secret reveal were requested for the payer channel.
    pub dispute_started: bool,
}

impl MediatorState {
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, MediatorStatus::Completed | MediatorStatus::Failed)
    }

    fn identifier(&self) -> PaymentId {
        self.from_transfer.transfer.identifier
    }
}

/// Registers the payer's lock, then forwards the transfer over the first usable route.
///
/// An incoming transfer the ledger rejects is discarded and no mediator is created.
pub fn init(
    from_route: RouteState,
    from_transfer: LockedTransfer,
    routes: Vec<RouteState>,
    ctx: &mut TransitionContext,
) -> Transition<MediatorState> {
    if let Err(err) = ctx.register_received(&from_route, &from_transfer) {
        warn!(
            "Discarding mediated transfer {} from {:?}: {err}",
            from_transfer.transfer.identifier, from_route.node_address
        );
        return Transition::discarded();
    }

    let state = MediatorState {
        from_route,
        from_transfer,
        routes: RoutesState::new(routes),
        route: None,
        outgoing: None,
        secret: None,
        status: MediatorStatus::Init,
        dispute_started: false,
    };
    try_new_route(state, ctx)
}

fn try_new_route(
    mut state: MediatorState,
    ctx: &mut TransitionContext,
) -> Transition<MediatorState> {
    let amount = state.from_transfer.lock.amount;
    let exclude = BTreeSet::from([state.from_route.channel_identifier]);
    loop {
        state.routes.refresh(ctx.channels);
        let Some(route) = state.routes.next_route(&exclude, amount) else {
            return refund_and_fail(state, ctx);
        };

        // each hop must keep `reveal_timeout` blocks to learn and reveal the secret
        let expiration = state
            .from_transfer
            .expiration()
            .saturating_sub(route.reveal_timeout);
        if expiration <= ctx.block_number.saturating_add(route.reveal_timeout) {
            debug!(
                "Ignoring route over channel {}: lock would expire too soon",
                route.channel_identifier
            );
            state.routes.mark_ignored(route.channel_identifier);
            continue;
        }

        let lock = Lock::new(amount, expiration, state.from_transfer.hashlock());
        let key = ctx.key;
        let sent = ctx
            .channel_mut(route.channel_identifier)
            .and_then(|channel| channel.send_locked_transfer(lock, key));
        match sent {
            Ok(balance_proof) => {
                let transfer = LockedTransfer {
                    transfer: state.from_transfer.transfer.with_expiration(expiration),
                    lock,
                    balance_proof,
                };
                trace!(
                    "Transfer {} forwarded over channel {}",
                    state.identifier(),
                    route.channel_identifier
                );
                let event = Event::SendMediatedTransfer {
                    recipient: route.node_address,
                    transfer: transfer.clone(),
                };
                state.route = Some(route);
                state.outgoing = Some(transfer);
                state.status = MediatorStatus::Forwarded;
                return Transition::new(state, vec![event]);
            }
            Err(err) => {
                debug!(
                    "Ignoring route over channel {}: {err}",
                    route.channel_identifier
                );
                state.routes.mark_ignored(route.channel_identifier);
            }
        }
    }
}

/// Sends the payer a reverse lock for the same hashlock and expiration, when the payer
/// channel still allows it, and gives up.
fn refund_and_fail(mut state: MediatorState, ctx: &mut TransitionContext) -> Transition<MediatorState> {
    state.status = MediatorStatus::Failed;
    state.route = None;

    let incoming = &state.from_transfer;
    if incoming.lock.is_expired(ctx.block_number) {
        debug!(
            "Transfer {} failed, incoming lock already expired",
            state.identifier()
        );
        return Transition::unchanged(state);
    }

    let lock = incoming.lock;
    let key = ctx.key;
    let refunded = ctx
        .channel_mut(state.from_route.channel_identifier)
        .and_then(|channel| channel.send_locked_transfer(lock, key));
    match refunded {
        Ok(balance_proof) => {
            debug!("Transfer {} refunded to the payer", state.identifier());
            let event = Event::SendTransferRefund {
                recipient: state.from_route.node_address,
                transfer: LockedTransfer {
                    transfer: incoming.transfer.clone(),
                    lock,
                    balance_proof,
                },
            };
            Transition::new(state, vec![event])
        }
        Err(err) => {
            debug!(
                "Transfer {} failed without refund, the incoming lock will expire: {err}",
                state.identifier()
            );
            Transition::unchanged(state)
        }
    }
}

pub fn state_transition(
    state: MediatorState,
    state_change: &StateChange,
    ctx: &mut TransitionContext,
) -> Transition<MediatorState> {
    match (state.status, state_change) {
        (MediatorStatus::Forwarded, StateChange::Block { block_number }) => {
            handle_forwarded_block(state, *block_number, ctx)
        }
        (MediatorStatus::Forwarded, StateChange::ReceiveSecretReveal { secret, sender }) => {
            handle_secret_reveal(state, secret, sender, ctx)
        }
        (MediatorStatus::Forwarded, StateChange::ReceiveTransferRefund { sender, transfer }) => {
            handle_refund(state, sender, transfer, ctx)
        }
        (MediatorStatus::Forwarded, StateChange::ContractReceiveSecretReveal { secret, .. }) => {
            if !secret.opens(&state.from_transfer.hashlock()) {
                return Transition::unchanged(state);
            }
            // the downstream lock is claimable on-chain from now on
            reveal_upstream(state, *secret, vec![])
        }
        (
            MediatorStatus::Forwarded,
            StateChange::ContractReceiveChannelClosed {
                channel_identifier, ..
            },
        ) => {
            let mut state = state;
            state.routes.mark_canceled(*channel_identifier);
            Transition::unchanged(state)
        }
        (
            MediatorStatus::Revealing,
            StateChange::ReceiveBalanceProof {
                sender,
                secret,
                balance_proof,
            },
        ) => handle_unlock(state, sender, secret, balance_proof, ctx),
        (MediatorStatus::Revealing, StateChange::Block { block_number }) => {
            handle_revealing_block(state, *block_number, ctx)
        }
        (
            MediatorStatus::Revealing,
            StateChange::ContractReceiveChannelSettled {
                channel_identifier, ..
            },
        ) if *channel_identifier == state.from_route.channel_identifier => {
            let mut state = state;
            debug!(
                "Transfer {} completed by settling channel {channel_identifier}",
                state.identifier()
            );
            state.status = MediatorStatus::Completed;
            Transition::unchanged(state)
        }
        _ => Transition::unchanged(state),
    }
}

fn handle_forwarded_block(
    mut state: MediatorState,
    block_number: BlockNumber,
    ctx: &mut TransitionContext,
) -> Transition<MediatorState> {
    let expired = state
        .outgoing
        .as_ref()
        .is_some_and(|transfer| transfer.lock.is_expired(block_number));
    if !expired {
        return Transition::unchanged(state);
    }

    if let Some(route) = state.route.take() {
        debug!(
            "Transfer {} outgoing lock expired on channel {}",
            state.identifier(),
            route.channel_identifier
        );
        state.routes.mark_canceled(route.channel_identifier);
    }
    state.outgoing = None;
    try_new_route(state, ctx)
}

/// Pays downstream first, only then reveals upstream.
fn handle_secret_reveal(
    mut state: MediatorState,
    secret: &Secret,
    sender: &Address,
    ctx: &mut TransitionContext,
) -> Transition<MediatorState> {
    let Some(route) = state.route.clone() else {
        return Transition::unchanged(state);
    };
    if *sender != route.node_address {
        debug!(
            "Ignoring secret reveal for transfer {} from {sender:?}, not downstream",
            state.identifier()
        );
        return Transition::unchanged(state);
    }
    let hashlock = state.from_transfer.hashlock();
    if !secret.opens(&hashlock) {
        warn!("Discarding secret reveal from {sender:?}: secret does not open {hashlock}");
        return Transition::unchanged(state);
    }

    let key = ctx.key;
    let unlocked = ctx
        .channel_mut(route.channel_identifier)
        .and_then(|channel| channel.send_unlock(&hashlock, key));
    let mut events = vec![];
    match unlocked {
        Ok((_, balance_proof)) => {
            events.push(Event::SendBalanceProof {
                recipient: route.node_address,
                channel_identifier: route.channel_identifier,
                secret: *secret,
                balance_proof,
            });
            events.push(Event::EventUnlockSuccess {
                identifier: state.identifier(),
                hashlock,
            });
        }
        Err(err) => {
            // downstream can still claim the lock on-chain with the secret it revealed
            warn!(
                "Could not unlock transfer {} on channel {}: {err}",
                state.identifier(),
                route.channel_identifier
            );
        }
    }
    state.outgoing = None;
    reveal_upstream(state, *secret, events)
}

fn reveal_upstream(
    mut state: MediatorState,
    secret: Secret,
    mut events: Vec<Event>,
) -> Transition<MediatorState> {
    state.secret = Some(secret);
    state.status = MediatorStatus::Revealing;
    events.push(Event::SendRevealSecret {
        recipient: state.from_route.node_address,
        secret,
    });
    Transition::new(state, events)
}

fn handle_refund(
    mut state: MediatorState,
    sender: &Address,
    refund: &LockedTransfer,
    ctx: &mut TransitionContext,
) -> Transition<MediatorState> {
    let Some(route) = state.route.clone() else {
        return Transition::unchanged(state);
    };
    if *sender != route.node_address || refund.lock.amount != state.from_transfer.lock.amount {
        debug!(
            "Ignoring refund for transfer {} from {sender:?}",
            state.identifier()
        );
        return Transition::unchanged(state);
    }
    if let Err(err) = ctx.register_received(&route, refund) {
        warn!(
            "Discarding refund for transfer {} from {sender:?}: {err}",
            state.identifier()
        );
        return Transition::unchanged(state);
    }

    state.routes.mark_refunded(route.channel_identifier);
    state.route = None;
    state.outgoing = None;
    try_new_route(state, ctx)
}

fn handle_unlock(
    mut state: MediatorState,
    sender: &Address,
    secret: &Secret,
    balance_proof: &BalanceProof,
    ctx: &mut TransitionContext,
) -> Transition<MediatorState> {
    if *sender != state.from_route.node_address {
        debug!(
            "Ignoring unlock for transfer {} from {sender:?}, not the payer",
            state.identifier()
        );
        return Transition::unchanged(state);
    }
    let hashlock = state.from_transfer.hashlock();
    if !secret.opens(&hashlock) {
        return Transition::unchanged(state);
    }

    match ctx
        .channel_mut(state.from_route.channel_identifier)
        .and_then(|channel| channel.receive_unlock(sender, &hashlock, balance_proof))
    {
        Ok(_) => {
            trace!("Transfer {} mediated", state.identifier());
            state.status = MediatorStatus::Completed;
        }
        Err(err) => warn!(
            "Discarding unlock for transfer {} from {sender:?}: {err}",
            state.identifier()
        ),
    }
    Transition::unchanged(state)
}

/// Once the payer's lock gets close to expiring without an unlock, claim it on-chain.
fn handle_revealing_block(
    mut state: MediatorState,
    block_number: BlockNumber,
    ctx: &mut TransitionContext,
) -> Transition<MediatorState> {
    let deadline = state
        .from_transfer
        .expiration()
        .saturating_sub(state.from_route.reveal_timeout);
    if state.dispute_started || block_number < deadline {
        return Transition::unchanged(state);
    }
    let Some(secret) = state.secret else {
        return Transition::unchanged(state);
    };

    let channel_identifier = state.from_route.channel_identifier;
    let events = close_and_reveal(ctx, channel_identifier, secret);
    state.dispute_started = true;
    Transition::new(state, events)
}

pub(super) fn close_and_reveal(
    ctx: &mut TransitionContext,
    channel_identifier: ChannelId,
    secret: Secret,
) -> Vec<Event> {
    let balance_proof = ctx
        .channels
        .get(&channel_identifier)
        .and_then(|channel| channel.partner_state.balance_proof.clone());
    warn!("Unlock for {} missing, closing channel {channel_identifier}", secret.hashlock());
    vec![
        Event::ContractSendChannelClose {
            channel_identifier,
            balance_proof,
        },
        Event::ContractSendSecretReveal { secret },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        mediated_transfer::tests_utils::{
            channel_and_route, received_transfer, transfer_description,
        },
        rng, ChannelState, NodeKey,
    };
    use std::collections::BTreeMap;
    use tracing_test::traced_test;

    struct Setup {
        us: NodeKey,
        payer: NodeKey,
        payees: Vec<NodeKey>,
        secret: Secret,
        channels: BTreeMap<ChannelId, ChannelState>,
        from_route: RouteState,
        routes: Vec<RouteState>,
    }

    /// Channel 1 to the payer, then one channel per outgoing deposit.
    fn setup(outgoing_deposits: &[u64]) -> Setup {
        let us = NodeKey::random();
        let payer = NodeKey::random();
        let (from_channel, from_route) = channel_and_route(1, &us, &payer, 10, 10);
        let mut channels = BTreeMap::from([(1, from_channel)]);
        let mut payees = vec![];
        let mut routes = vec![];
        for (index, deposit) in outgoing_deposits.iter().enumerate() {
            let payee = NodeKey::random();
            let channel_identifier = index as u64 + 2;
            let (channel, route) = channel_and_route(channel_identifier, &us, &payee, *deposit, 10);
            let _ = channels.insert(channel_identifier, channel);
            routes.push(route);
            payees.push(payee);
        }
        Setup {
            us,
            payer,
            payees,
            secret: Secret::random(&mut rng::thread_rng()),
            channels,
            from_route,
            routes,
        }
    }

    fn incoming(setup: &Setup, amount: u64, expiration: u64) -> LockedTransfer {
        let description =
            transfer_description(setup.payer.address(), NodeKey::random().address(), amount, &setup.secret);
        received_transfer(1, &setup.payer, &description, expiration)
    }

    fn started(setup: &mut Setup, from_transfer: LockedTransfer, block_number: u64) -> Transition<MediatorState> {
        let mut ctx = TransitionContext {
            channels: &mut setup.channels,
            block_number,
            key: &setup.us,
        };
        init(setup.from_route.clone(), from_transfer, setup.routes.clone(), &mut ctx)
    }

    fn step(
        setup: &mut Setup,
        state: MediatorState,
        state_change: StateChange,
        block_number: u64,
    ) -> Transition<MediatorState> {
        let mut ctx = TransitionContext {
            channels: &mut setup.channels,
            block_number,
            key: &setup.us,
        };
        state_transition(state, &state_change, &mut ctx)
    }

    #[test]
    fn forwards_with_a_shorter_expiration() {
        let mut setup = setup(&[10]);
        let from_transfer = incoming(&setup, 5, 40);
        let Transition { new_state, events } = started(&mut setup, from_transfer, 1);

        let state = new_state.expect("mediator state");
        assert_eq!(state.status, MediatorStatus::Forwarded);
        match &events[..] {
            [Event::SendMediatedTransfer { recipient, transfer }] => {
                assert_eq!(*recipient, setup.payees[0].address());
                assert_eq!(transfer.lock.expiration, 30);
                assert_eq!(transfer.lock.amount, 5);
            }
            other => panic!("unexpected events {other:?}"),
        }
        assert_eq!(setup.channels[&1].partner_state.locked_amount(), 5);
        assert_eq!(setup.channels[&2].our_state.locked_amount(), 5);
    }

    #[test]
    #[traced_test]
    fn invalid_incoming_transfer_creates_no_mediator() {
        let mut setup = setup(&[10]);
        let mut from_transfer = incoming(&setup, 5, 40);
        from_transfer.balance_proof.nonce = 2;

        let Transition { new_state, events } = started(&mut setup, from_transfer, 1);
        assert!(new_state.is_none());
        assert!(events.is_empty());
        assert!(logs_contain("Discarding mediated transfer"));
        assert_eq!(setup.channels[&1].partner_state.locked_amount(), 0);
    }

    #[test]
    fn no_route_refunds_the_payer() {
        let mut setup = setup(&[2]);
        let from_transfer = incoming(&setup, 5, 40);
        let Transition { new_state, events } = started(&mut setup, from_transfer, 1);

        assert_eq!(new_state.map(|s| s.status), Some(MediatorStatus::Failed));
        match &events[..] {
            [Event::SendTransferRefund { recipient, transfer }] => {
                assert_eq!(*recipient, setup.payer.address());
                assert_eq!(transfer.lock.expiration, 40);
                assert_eq!(transfer.lock.hashlock, setup.secret.hashlock());
            }
            other => panic!("unexpected events {other:?}"),
        }
    }

    #[test]
    fn route_too_close_to_expiry_is_ignored() {
        let mut setup = setup(&[10]);
        // outgoing expiration would be 20, not beyond block 12 + reveal timeout 10
        let from_transfer = incoming(&setup, 5, 30);
        let Transition { new_state, .. } = started(&mut setup, from_transfer, 12);

        let state = new_state.expect("state");
        assert_eq!(state.status, MediatorStatus::Failed);
        assert_eq!(state.routes.ignored.len(), 1);
    }

    #[test]
    fn pays_downstream_before_revealing_upstream() {
        let mut setup = setup(&[10]);
        let from_transfer = incoming(&setup, 5, 40);
        let state = started(&mut setup, from_transfer, 1).new_state.expect("state");

        let reveal = StateChange::ReceiveSecretReveal {
            secret: setup.secret,
            sender: setup.payees[0].address(),
        };
        let Transition { new_state, events } = step(&mut setup, state, reveal, 5);
        let state = new_state.expect("state");
        assert_eq!(state.status, MediatorStatus::Revealing);

        let unlock_position = events
            .iter()
            .position(|event| matches!(event, Event::SendBalanceProof { .. }));
        let reveal_position = events
            .iter()
            .position(|event| matches!(event, Event::SendRevealSecret { .. }));
        assert!(unlock_position < reveal_position);
        assert!(unlock_position.is_some());
        assert_eq!(setup.channels[&2].our_state.transferred_amount(), 5);
        assert_eq!(setup.channels[&2].our_state.locked_amount(), 0);

        // the payer unlocks
        let lock = state.from_transfer.lock;
        let balance_proof = BalanceProof::sign(1, 2, 5, crate::Hash::default(), &setup.payer);
        let unlock = StateChange::ReceiveBalanceProof {
            sender: setup.payer.address(),
            secret: setup.secret,
            balance_proof,
        };
        let Transition { new_state, events } = step(&mut setup, state, unlock, 6);
        assert_eq!(new_state.map(|s| s.status), Some(MediatorStatus::Completed));
        assert!(events.is_empty());
        assert_eq!(setup.channels[&1].partner_state.transferred_amount(), lock.amount);
    }

    #[test]
    fn missing_unlock_goes_on_chain_once() {
        let mut setup = setup(&[10]);
        let from_transfer = incoming(&setup, 5, 40);
        let state = started(&mut setup, from_transfer, 1).new_state.expect("state");
        let reveal = StateChange::ReceiveSecretReveal {
            secret: setup.secret,
            sender: setup.payees[0].address(),
        };
        let state = step(&mut setup, state, reveal, 5).new_state.expect("state");

        let state = step(&mut setup, state, StateChange::Block { block_number: 29 }, 29)
            .new_state
            .expect("state");
        let Transition { new_state, events } =
            step(&mut setup, state, StateChange::Block { block_number: 30 }, 30);
        let state = new_state.expect("state");
        assert!(matches!(
            &events[..],
            [
                Event::ContractSendChannelClose {
                    channel_identifier: 1,
                    balance_proof: Some(_)
                },
                Event::ContractSendSecretReveal { .. }
            ]
        ));

        let Transition { new_state, events } =
            step(&mut setup, state, StateChange::Block { block_number: 31 }, 31);
        assert!(events.is_empty());

        let settled = StateChange::ContractReceiveChannelSettled {
            channel_identifier: 1,
            block_number: 90,
        };
        let Transition { new_state, .. } =
            step(&mut setup, new_state.expect("state"), settled, 90);
        assert_eq!(new_state.map(|s| s.status), Some(MediatorStatus::Completed));
    }

    #[test]
    fn expired_outgoing_lock_retries_next_route() {
        let mut setup = setup(&[10, 10]);
        let from_transfer = incoming(&setup, 5, 60);
        let state = started(&mut setup, from_transfer, 1).new_state.expect("state");
        assert_eq!(state.route.as_ref().map(|r| r.channel_identifier), Some(2));

        // first outgoing lock expires at 50, the retry gets 50 again and must exceed 51 + 10
        let Transition { new_state, events } =
            step(&mut setup, state, StateChange::Block { block_number: 51 }, 51);
        let state = new_state.expect("state");
        assert_eq!(state.routes.canceled.len(), 1);
        assert_eq!(state.routes.ignored.len(), 1);
        assert_eq!(state.status, MediatorStatus::Failed);
        assert!(matches!(&events[..], [Event::SendTransferRefund { .. }]));
    }

    #[test]
    fn refund_from_downstream_retries_next_route() {
        let mut setup = setup(&[10, 10]);
        let from_transfer = incoming(&setup, 5, 60);
        let state = started(&mut setup, from_transfer, 1).new_state.expect("state");

        let outgoing = state.outgoing.clone().expect("outgoing");
        let refund = received_transfer(2, &setup.payees[0], &outgoing.transfer, 50);
        let sender = setup.payees[0].address();
        let Transition { new_state, events } = step(
            &mut setup,
            state,
            StateChange::ReceiveTransferRefund {
                sender,
                transfer: refund,
            },
            2,
        );
        let state = new_state.expect("state");
        assert_eq!(state.routes.refunded.len(), 1);
        assert_eq!(state.route.map(|r| r.channel_identifier), Some(3));
        assert!(matches!(&events[..], [Event::SendMediatedTransfer { .. }]));
    }
}
