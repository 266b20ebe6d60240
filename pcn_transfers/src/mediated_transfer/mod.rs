// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The three roles a node can play in a mediated transfer.
//!
//! Each role is a reducer over its own state plus the channels it touches. Channels are
//! only reached through [`TransitionContext`], by identifier, and only mutated through the
//! all-or-nothing ledger operations, so a rejected input never leaves a half-applied change.

pub mod initiator;
pub mod mediator;
pub mod target;

use crate::{
    BlockNumber, ChannelError, ChannelId, ChannelState, Event, LockedTransfer, NodeKey,
    RouteState,
};

use std::collections::BTreeMap;

/// What a reducer may see and touch while handling one state change.
pub struct TransitionContext<'a> {
    pub channels: &'a mut BTreeMap<ChannelId, ChannelState>,
    pub block_number: BlockNumber,
    pub key: &'a NodeKey,
}

impl TransitionContext<'_> {
    pub(crate) fn channel_mut(
        &mut self,
        channel_identifier: ChannelId,
    ) -> Result<&mut ChannelState, ChannelError> {
        self.channels
            .get_mut(&channel_identifier)
            .ok_or(ChannelError::UnknownChannel(channel_identifier))
    }

    /// Registers a locked transfer received over `from_route`.
    pub(crate) fn register_received(
        &mut self,
        from_route: &RouteState,
        transfer: &LockedTransfer,
    ) -> Result<(), ChannelError> {
        let block_number = self.block_number;
        if transfer.channel_identifier() != from_route.channel_identifier {
            return Err(ChannelError::ChannelMismatch {
                expected: from_route.channel_identifier,
                got: transfer.channel_identifier(),
            });
        }
        transfer.check_lock()?;
        self.channel_mut(from_route.channel_identifier)?
            .receive_locked_transfer(
                &from_route.node_address,
                &transfer.lock,
                &transfer.balance_proof,
                block_number,
            )
    }
}

/// Result of feeding one state change to a role.
///
/// `new_state` is `None` only when an init was discarded and no task exists.
#[derive(Debug)]
pub struct Transition<S> {
    pub new_state: Option<S>,
    pub events: Vec<Event>,
}

impl<S> Transition<S> {
    pub fn new(state: S, events: Vec<Event>) -> Self {
        Self {
            new_state: Some(state),
            events,
        }
    }

    pub fn unchanged(state: S) -> Self {
        Self::new(state, vec![])
    }

    pub fn discarded() -> Self {
        Self {
            new_state: None,
            events: vec![],
        }
    }
}
