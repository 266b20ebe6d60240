// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use super::{mediator::close_and_reveal, Transition, TransitionContext};
use crate::{
    Address, BalanceProof, BlockNumber, Event, LockedTransfer, RouteState, Secret, StateChange,
};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetStatus {
    Init,
    SecretRequested,
    /// Knows the secret and revealed it to the payer, waiting for the unlock.
    SecretRevealed,
    Completed,
    Failed,
}

/// The payee's side of a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetState {
    pub from_route: RouteState,
    pub from_transfer: LockedTransfer,
    pub secret: Option<Secret>,
    pub status: TargetStatus,
    pub dispute_started: bool,
}

impl TargetState {
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, TargetStatus::Completed | TargetStatus::Failed)
    }
}

pub fn init(
    from_route: RouteState,
    from_transfer: LockedTransfer,
    ctx: &mut TransitionContext,
) -> Transition<TargetState> {
    if let Err(err) = ctx.register_received(&from_route, &from_transfer) {
        warn!(
            "Discarding transfer {} from {:?}: {err}",
            from_transfer.transfer.identifier, from_route.node_address
        );
        return Transition::discarded();
    }

    let mut state = TargetState {
        from_route,
        from_transfer,
        secret: None,
        status: TargetStatus::Init,
        dispute_started: false,
    };

    let margin = ctx.block_number.saturating_add(state.from_route.reveal_timeout);
    if state.from_transfer.expiration() <= margin {
        return fail(state, "lock expires too soon to reveal the secret");
    }

    state.status = TargetStatus::SecretRequested;
    let transfer = &state.from_transfer.transfer;
    let event = Event::SendSecretRequest {
        recipient: transfer.initiator,
        identifier: transfer.identifier,
        hashlock: transfer.hashlock,
        amount: transfer.amount,
    };
    Transition::new(state, vec![event])
}

fn fail(mut state: TargetState, reason: &str) -> Transition<TargetState> {
    let identifier = state.from_transfer.transfer.identifier;
    debug!("Receiving transfer {identifier} failed: {reason}");
    state.status = TargetStatus::Failed;
    let event = Event::EventTransferReceivedFailed {
        identifier,
        reason: reason.to_string(),
    };
    Transition::new(state, vec![event])
}

fn succeed(mut state: TargetState) -> Transition<TargetState> {
    state.status = TargetStatus::Completed;
    let transfer = &state.from_transfer.transfer;
    let event = Event::EventTransferReceivedSuccess {
        identifier: transfer.identifier,
        amount: transfer.amount,
        initiator: transfer.initiator,
    };
    Transition::new(state, vec![event])
}

pub fn state_transition(
    state: TargetState,
    state_change: &StateChange,
    ctx: &mut TransitionContext,
) -> Transition<TargetState> {
    match (state.status, state_change) {
        (TargetStatus::SecretRequested, StateChange::Block { block_number }) => {
            if state.from_transfer.lock.is_expired(*block_number) {
                fail(state, "lock expired before the secret was revealed")
            } else {
                Transition::unchanged(state)
            }
        }
        (TargetStatus::SecretRequested, StateChange::ReceiveSecretReveal { secret, sender }) => {
            handle_secret_reveal(state, secret, sender)
        }
        (
            TargetStatus::SecretRequested | TargetStatus::SecretRevealed,
            StateChange::ReceiveBalanceProof {
                sender,
                secret,
                balance_proof,
            },
        ) => handle_unlock(state, sender, secret, balance_proof, ctx),
        (TargetStatus::SecretRevealed, StateChange::Block { block_number }) => {
            handle_revealed_block(state, *block_number, ctx)
        }
        (
            TargetStatus::SecretRevealed,
            StateChange::ContractReceiveChannelSettled {
                channel_identifier, ..
            },
        ) if *channel_identifier == state.from_route.channel_identifier => {
            if state.dispute_started {
                debug!("Transfer settled on-chain over channel {channel_identifier}");
                succeed(state)
            } else {
                // the secret was never registered on-chain, the lock cannot be claimed
                fail(state, "channel settled before the unlock arrived")
            }
        }
        _ => Transition::unchanged(state),
    }
}

fn handle_secret_reveal(
    mut state: TargetState,
    secret: &Secret,
    sender: &Address,
) -> Transition<TargetState> {
    if !secret.opens(&state.from_transfer.hashlock()) {
        warn!("Discarding secret reveal from {sender:?}: secret does not open the transfer hashlock");
        return Transition::unchanged(state);
    }
    state.secret = Some(*secret);
    state.status = TargetStatus::SecretRevealed;
    let event = Event::SendRevealSecret {
        recipient: state.from_route.node_address,
        secret: *secret,
    };
    Transition::new(state, vec![event])
}

/// Success is only reported once the payer's unlock is applied to the ledger.
fn handle_unlock(
    mut state: TargetState,
    sender: &Address,
    secret: &Secret,
    balance_proof: &BalanceProof,
    ctx: &mut TransitionContext,
) -> Transition<TargetState> {
    let hashlock = state.from_transfer.hashlock();
    if *sender != state.from_route.node_address || !secret.opens(&hashlock) {
        debug!("Ignoring unlock of {hashlock} from {sender:?}");
        return Transition::unchanged(state);
    }

    match ctx
        .channel_mut(state.from_route.channel_identifier)
        .and_then(|channel| channel.receive_unlock(sender, &hashlock, balance_proof))
    {
        Ok(_) => {
            state.secret = Some(*secret);
            succeed(state)
        }
        Err(err) => {
            warn!("Discarding unlock of {hashlock} from {sender:?}: {err}");
            Transition::unchanged(state)
        }
    }
}

fn handle_revealed_block(
    mut state: TargetState,
    block_number: BlockNumber,
    ctx: &mut TransitionContext,
) -> Transition<TargetState> {
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

    let events = close_and_reveal(ctx, state.from_route.channel_identifier, secret);
    state.dispute_started = true;
    Transition::new(state, events)
}
