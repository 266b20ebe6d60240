// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use super::{Transition, TransitionContext};
use crate::{
    Address, BlockNumber, ChannelId, Event, Lock, LockedTransfer, RouteState, RoutesState, Secret, StateChange,
    TransferDescription,
};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InitiatorStatus {
    Init,
    /// Waiting for the target's secret request.
    RouteSelected,
    /// Waiting for the next hop to reveal the secret back.
    RevealedSecret,
    Completed,
    Failed,
}

/// The payer's side of a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiatorState {
    /// Holds the secret.
    pub transfer: TransferDescription,
    pub routes: RoutesState,
    pub route: Option<RouteState>,
    /// What was sent over `route`.
    pub outgoing: Option<LockedTransfer>,
    pub status: InitiatorStatus,
}

impl InitiatorState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            InitiatorStatus::Completed | InitiatorStatus::Failed
        )
    }

    fn secret(&self) -> Option<Secret> {
        self.transfer.secret
    }
}

/// Starts a transfer: picks the first usable route and sends the locked transfer over it.
pub fn init(
    transfer: TransferDescription,
    routes: Vec<RouteState>,
    ctx: &mut TransitionContext,
) -> Transition<InitiatorState> {
    let state = InitiatorState {
        transfer,
        routes: RoutesState::new(routes),
        route: None,
        outgoing: None,
        status: InitiatorStatus::Init,
    };
    try_new_route(state, ctx)
}

fn try_new_route(
    mut state: InitiatorState,
    ctx: &mut TransitionContext,
) -> Transition<InitiatorState> {
    let amount = state.transfer.amount;
    loop {
        state.routes.refresh(ctx.channels);
        let Some(route) = state.routes.next_route(&BTreeSet::new(), amount) else {
            return fail(state, "no route available");
        };

        let expiration = ctx
            .block_number
            .saturating_add(route.settle_timeout)
            .saturating_sub(route.reveal_timeout);
        let lock = Lock::new(amount, expiration, state.transfer.hashlock);

        let key = ctx.key;
        let sent = ctx
            .channel_mut(route.channel_identifier)
            .and_then(|channel| channel.send_locked_transfer(lock, key));
        match sent {
            Ok(balance_proof) => {
                state.transfer.expiration = Some(expiration);
                let transfer = LockedTransfer {
                    transfer: state.transfer.without_secret(),
                    lock,
                    balance_proof,
                };
                trace!(
                    "Transfer {} sent over channel {} to {:?}",
                    state.transfer.identifier,
                    route.channel_identifier,
                    route.node_address
                );
                let event = Event::SendMediatedTransfer {
                    recipient: route.node_address,
                    transfer: transfer.clone(),
                };
                state.route = Some(route);
                state.outgoing = Some(transfer);
                state.status = InitiatorStatus::RouteSelected;
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

fn fail(mut state: InitiatorState, reason: &str) -> Transition<InitiatorState> {
    debug!("Transfer {} failed: {reason}", state.transfer.identifier);
    state.status = InitiatorStatus::Failed;
    state.route = None;
    let event = Event::EventTransferSentFailed {
        identifier: state.transfer.identifier,
        reason: reason.to_string(),
    };
    Transition::new(state, vec![event])
}

pub fn state_transition(
    state: InitiatorState,
    state_change: &StateChange,
    ctx: &mut TransitionContext,
) -> Transition<InitiatorState> {
    match (state.status, state_change) {
        (InitiatorStatus::RouteSelected, StateChange::Block { block_number }) => {
            handle_block(state, *block_number, ctx)
        }
        (InitiatorStatus::RevealedSecret, StateChange::Block { block_number }) => {
            if state
                .transfer
                .expiration
                .is_some_and(|expiration| *block_number > expiration)
            {
                fail(state, "lock expired before the secret was revealed back")
            } else {
                Transition::unchanged(state)
            }
        }
        (
            InitiatorStatus::RouteSelected,
            StateChange::ReceiveSecretRequest {
                identifier,
                hashlock,
                amount,
                sender,
            },
        ) => {
            let transfer = &state.transfer;
            if *sender != transfer.target
                || *amount != transfer.amount
                || *identifier != transfer.identifier
                || *hashlock != transfer.hashlock
            {
                debug!(
                    "Ignoring secret request for transfer {} from {sender:?}",
                    transfer.identifier
                );
                return Transition::unchanged(state);
            }
            handle_secret_request(state)
        }
        (
            InitiatorStatus::RouteSelected | InitiatorStatus::RevealedSecret,
            StateChange::ReceiveSecretReveal { secret, sender },
        ) => handle_secret_reveal(state, secret, sender, ctx),
        (
            InitiatorStatus::RouteSelected | InitiatorStatus::RevealedSecret,
            StateChange::ContractReceiveSecretReveal { secret, .. },
        ) => handle_onchain_reveal(state, secret),
        (
            InitiatorStatus::RouteSelected,
            StateChange::ReceiveTransferRefund { sender, transfer },
        ) => handle_refund(state, sender, transfer, ctx),
        (
            InitiatorStatus::RouteSelected | InitiatorStatus::RevealedSecret,
            StateChange::ContractReceiveChannelClosed {
                channel_identifier, ..
            },
        ) => {
            // the pending lock can still be claimed on-chain, keep waiting on it
            cancel_route(state, *channel_identifier)
        }
        _ => Transition::unchanged(state),
    }
}

fn cancel_route(
    mut state: InitiatorState,
    channel_identifier: ChannelId,
) -> Transition<InitiatorState> {
    state.routes.mark_canceled(channel_identifier);
    Transition::unchanged(state)
}

fn handle_block(
    mut state: InitiatorState,
    block_number: BlockNumber,
    ctx: &mut TransitionContext,
) -> Transition<InitiatorState> {
    let expired = state
        .outgoing
        .as_ref()
        .is_some_and(|transfer| transfer.lock.is_expired(block_number));
    if !expired {
        return Transition::unchanged(state);
    }

    if let Some(route) = state.route.take() {
        debug!(
            "Transfer {} lock expired on channel {}, trying the next route",
            state.transfer.identifier, route.channel_identifier
        );
        state.routes.mark_canceled(route.channel_identifier);
    }
    state.outgoing = None;
    try_new_route(state, ctx)
}

fn handle_secret_request(mut state: InitiatorState) -> Transition<InitiatorState> {
    let Some(secret) = state.secret() else {
        warn!(
            "Initiator of transfer {} does not hold its secret",
            state.transfer.identifier
        );
        return Transition::unchanged(state);
    };
    state.status = InitiatorStatus::RevealedSecret;
    let event = Event::SendRevealSecret {
        recipient: state.transfer.target,
        secret,
    };
    Transition::new(state, vec![event])
}

fn handle_secret_reveal(
    mut state: InitiatorState,
    secret: &Secret,
    sender: &Address,
    ctx: &mut TransitionContext,
) -> Transition<InitiatorState> {
    let Some(route) = state.route.clone() else {
        return Transition::unchanged(state);
    };
    if *sender != route.node_address {
        debug!(
            "Ignoring secret reveal for transfer {} from {sender:?}, not the next hop",
            state.transfer.identifier
        );
        return Transition::unchanged(state);
    }
    if !secret.opens(&state.transfer.hashlock) {
        warn!(
            "Discarding secret reveal from {sender:?}: secret does not open {}",
            state.transfer.hashlock
        );
        return Transition::unchanged(state);
    }

    let hashlock = state.transfer.hashlock;
    let key = ctx.key;
    let unlocked = ctx
        .channel_mut(route.channel_identifier)
        .and_then(|channel| channel.send_unlock(&hashlock, key));
    match unlocked {
        Ok((_, balance_proof)) => {
            state.status = InitiatorStatus::Completed;
            let transfer = &state.transfer;
            let events = vec![
                Event::SendBalanceProof {
                    recipient: route.node_address,
                    channel_identifier: route.channel_identifier,
                    secret: *secret,
                    balance_proof,
                },
                Event::EventUnlockSuccess {
                    identifier: transfer.identifier,
                    hashlock,
                },
                Event::EventTransferSentSuccess {
                    identifier: transfer.identifier,
                    amount: transfer.amount,
                    target: transfer.target,
                },
            ];
            Transition::new(state, events)
        }
        Err(err) => {
            warn!(
                "Could not unlock transfer {} on channel {}: {err}",
                state.transfer.identifier, route.channel_identifier
            );
            Transition::unchanged(state)
        }
    }
}

/// The secret is public on-chain, so the lock we sent is claimable and the payment is made.
fn handle_onchain_reveal(mut state: InitiatorState, secret: &Secret) -> Transition<InitiatorState> {
    if !secret.opens(&state.transfer.hashlock) {
        return Transition::unchanged(state);
    }
    debug!(
        "Transfer {} claimable on-chain, secret revealed",
        state.transfer.identifier
    );
    state.status = InitiatorStatus::Completed;
    let transfer = &state.transfer;
    let events = vec![
        Event::EventUnlockSuccess {
            identifier: transfer.identifier,
            hashlock: transfer.hashlock,
        },
        Event::EventTransferSentSuccess {
            identifier: transfer.identifier,
            amount: transfer.amount,
            target: transfer.target,
        },
    ];
    Transition::new(state, events)
}

fn handle_refund(
    mut state: InitiatorState,
    sender: &Address,
    refund: &LockedTransfer,
    ctx: &mut TransitionContext,
) -> Transition<InitiatorState> {
    let Some(route) = state.route.clone() else {
        return Transition::unchanged(state);
    };
    let transfer = &state.transfer;
    if *sender != route.node_address
        || refund.transfer.amount != transfer.amount
        || refund.transfer.identifier != transfer.identifier
    {
        debug!(
            "Ignoring refund for transfer {} from {sender:?}",
            transfer.identifier
        );
        return Transition::unchanged(state);
    }
    if let Err(err) = ctx.register_received(&route, refund) {
        warn!(
            "Discarding refund for transfer {} from {sender:?}: {err}",
            transfer.identifier
        );
        return Transition::unchanged(state);
    }

    debug!(
        "Transfer {} refunded over channel {}",
        transfer.identifier, route.channel_identifier
    );
    state.routes.mark_refunded(route.channel_identifier);
    state.route = None;
    state.outgoing = None;
    try_new_route(state, ctx)
}
