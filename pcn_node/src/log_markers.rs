// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use pcn_transfers::PaymentId;
// this gets us to_string easily enough
use strum::Display;

/// Public Markers for generating log output,
/// These generate appropriate log level output and consistent strings.
/// Changing these log markers is a breaking change.
#[derive(Debug, Clone, Display)]
pub enum Marker<'a> {
    /// The WAL has been replayed on start
    WalReplayed {
        /// Number of state changes replayed
        state_changes: usize,
        /// Number of logged effects never recorded as executed, delivered again
        pending_effects: usize,
    },

    /// A state change was logged and applied
    StateChangeDispatched {
        /// Number of events it produced
        events: usize,
    },

    /// A state change failed ingestion validation and was dropped
    StateChangeRejected(&'a str),

    /// An effect executor failed to carry out an event
    EffectFailed(&'a str),

    /// A transfer we initiated or received completed
    TransferCompleted(PaymentId),

    /// A transfer we initiated or received failed
    TransferFailed(PaymentId),
}

impl<'a> Marker<'a> {
    /// Returns the string representation of the LogMarker.
    pub fn log(&self) {
        match self {
            Marker::StateChangeRejected(_) | Marker::EffectFailed(_) => warn!("{self:?}"),
            _ => info!("{self:?}"),
        }
    }
}
