// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Read-only queries over a [`ChainState`].

use crate::{
    Address, ChainState, ChannelId, ChannelState, RouteState, TokenAddress, TokenAmount,
};

use std::collections::BTreeSet;

pub fn channels(state: &ChainState) -> impl Iterator<Item = &ChannelState> {
    state.channels.values()
}

pub fn token_addresses(state: &ChainState) -> BTreeSet<TokenAddress> {
    channels(state)
        .map(|channel| channel.token_address)
        .collect()
}

pub fn partners_for_token(state: &ChainState, token: &TokenAddress) -> BTreeSet<Address> {
    channels(state)
        .filter(|channel| &channel.token_address == token)
        .map(ChannelState::partner)
        .collect()
}

/// The open channel with `partner` for `token`, if any.
pub fn channel_by_partner<'a>(
    state: &'a ChainState,
    token: &TokenAddress,
    partner: &Address,
) -> Option<&'a ChannelState> {
    channels(state).find(|channel| {
        &channel.token_address == token && &channel.partner() == partner && channel.is_open()
    })
}

pub fn distributable(state: &ChainState, channel_identifier: ChannelId) -> Option<TokenAmount> {
    state
        .channels
        .get(&channel_identifier)
        .map(ChannelState::our_distributable)
}

/// Candidate routes over every open channel for `token`, by channel identifier.
pub fn routes_for_token(state: &ChainState, token: &TokenAddress) -> Vec<RouteState> {
    channels(state)
        .filter(|channel| &channel.token_address == token && channel.is_open())
        .map(RouteState::from_channel)
        .collect()
}
