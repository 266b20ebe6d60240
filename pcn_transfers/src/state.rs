// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::{
    mediated_transfer::{
        initiator::{self, InitiatorState},
        mediator::{self, MediatorState},
        target::{self, TargetState},
        Transition, TransitionContext,
    },
    Address, BlockNumber, ChannelId, ChannelState, Error, Hashlock, StateChange,
};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One in-flight transfer, in whichever role this node plays in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferTask {
    Initiator(InitiatorState),
    Mediator(MediatorState),
    Target(TargetState),
}

impl TransferTask {
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Initiator(state) => state.is_terminal(),
            Self::Mediator(state) => state.is_terminal(),
            Self::Target(state) => state.is_terminal(),
        }
    }

    pub(crate) fn state_transition(
        self,
        state_change: &StateChange,
        ctx: &mut TransitionContext,
    ) -> Transition<TransferTask> {
        match self {
            Self::Initiator(state) => lift(
                initiator::state_transition(state, state_change, ctx),
                Self::Initiator,
            ),
            Self::Mediator(state) => lift(
                mediator::state_transition(state, state_change, ctx),
                Self::Mediator,
            ),
            Self::Target(state) => lift(
                target::state_transition(state, state_change, ctx),
                Self::Target,
            ),
        }
    }
}

pub(crate) fn lift<S>(
    transition: Transition<S>,
    wrap: impl FnOnce(S) -> TransferTask,
) -> Transition<TransferTask> {
    Transition {
        new_state: transition.new_state.map(wrap),
        events: transition.events,
    }
}

/// Everything the node knows: all channels and all live transfers.
///
/// Terminal transfers are dropped from `payments`, their history stays in the WAL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainState {
    pub block_number: BlockNumber,
    pub our_address: Address,
    pub channels: BTreeMap<ChannelId, ChannelState>,
    pub payments: BTreeMap<Hashlock, TransferTask>,
}

impl ChainState {
    pub fn new(our_address: Address) -> Self {
        Self {
            block_number: 0,
            our_address,
            channels: BTreeMap::new(),
            payments: BTreeMap::new(),
        }
    }

    /// Canonical byte image of the state.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        Ok(rmp_serde::to_vec(self)?)
    }
}
