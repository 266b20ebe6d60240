// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::{Address, BlockNumber, ChannelId, ChannelState, TokenAmount};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A snapshot of one candidate outgoing channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteState {
    /// The partner at the other end of the channel, i.e. the next hop.
    pub node_address: Address,
    pub channel_identifier: ChannelId,
    pub available_balance: TokenAmount,
    pub settle_timeout: BlockNumber,
    pub reveal_timeout: BlockNumber,
    pub closed_block: Option<BlockNumber>,
}

impl RouteState {
    pub fn from_channel(channel: &ChannelState) -> Self {
        Self {
            node_address: channel.partner(),
            channel_identifier: channel.channel_identifier,
            available_balance: channel.our_distributable(),
            settle_timeout: channel.settle_timeout,
            reveal_timeout: channel.reveal_timeout,
            closed_block: channel.closed_block,
        }
    }
}

/// Candidate routes of one transfer, in the order the router ranked them.
///
/// A route leaves `available` at most once, into exactly one of the other buckets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutesState {
    pub available: Vec<RouteState>,
    pub ignored: Vec<RouteState>,
    pub refunded: Vec<RouteState>,
    pub canceled: Vec<RouteState>,
}

impl RoutesState {
    /// Routes repeating an already listed channel are dropped.
    pub fn new(routes: Vec<RouteState>) -> Self {
        let mut seen = BTreeSet::new();
        let available = routes
            .into_iter()
            .filter(|route| seen.insert(route.channel_identifier))
            .collect();
        Self {
            available,
            ..Default::default()
        }
    }

    /// First available route, in router order, that is not excluded and can carry
    /// `required_balance`.
    pub fn next_route(
        &self,
        exclude: &BTreeSet<ChannelId>,
        required_balance: TokenAmount,
    ) -> Option<RouteState> {
        self.available
            .iter()
            .find(|route| {
                !exclude.contains(&route.channel_identifier)
                    && route.available_balance >= required_balance
            })
            .cloned()
    }

    pub fn mark_refunded(&mut self, channel_identifier: ChannelId) {
        if let Some(route) = self.take_available(channel_identifier) {
            self.refunded.push(route);
        }
    }

    pub fn mark_ignored(&mut self, channel_identifier: ChannelId) {
        if let Some(route) = self.take_available(channel_identifier) {
            self.ignored.push(route);
        }
    }

    pub fn mark_canceled(&mut self, channel_identifier: ChannelId) {
        if let Some(route) = self.take_available(channel_identifier) {
            self.canceled.push(route);
        }
    }

    fn take_available(&mut self, channel_identifier: ChannelId) -> Option<RouteState> {
        let position = self
            .available
            .iter()
            .position(|route| route.channel_identifier == channel_identifier)?;
        Some(self.available.remove(position))
    }

    /// Re-derives the available routes from the ledger. Routes over unknown channels
    /// carry no balance.
    pub fn refresh(&mut self, channels: &BTreeMap<ChannelId, ChannelState>) {
        for route in self.available.iter_mut() {
            match channels.get(&route.channel_identifier) {
                Some(channel) => {
                    route.available_balance = channel.our_distributable();
                    route.closed_block = channel.closed_block;
                }
                None => route.available_balance = 0,
            }
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.available.is_empty()
    }
}
