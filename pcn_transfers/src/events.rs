// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::{
    Address, BalanceProof, ChannelId, Hashlock, LockedTransfer, PaymentId, Secret, TokenAmount,
};

use serde::{Deserialize, Serialize};

/// Effects computed by the state machines.
///
/// `Send*` go to the transport, `ContractSend*` to the chain proxy and `Event*` to the user.
/// Each carries everything needed to perform it without reading the state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SendMediatedTransfer {
        recipient: Address,
        transfer: LockedTransfer,
    },
    SendSecretRequest {
        recipient: Address,
        identifier: PaymentId,
        hashlock: Hashlock,
        amount: TokenAmount,
    },
    SendRevealSecret {
        recipient: Address,
        secret: Secret,
    },
    /// The unlock: a balance proof with the lock removed and its amount transferred.
    SendBalanceProof {
        recipient: Address,
        channel_identifier: ChannelId,
        secret: Secret,
        balance_proof: BalanceProof,
    },
    SendTransferRefund {
        recipient: Address,
        transfer: LockedTransfer,
    },
    ContractSendChannelClose {
        channel_identifier: ChannelId,
        /// The partner's latest proof, if we ever received one.
        balance_proof: Option<BalanceProof>,
    },
    ContractSendChannelUpdateTransfer {
        channel_identifier: ChannelId,
        balance_proof: BalanceProof,
    },
    ContractSendChannelSettle {
        channel_identifier: ChannelId,
    },
    ContractSendSecretReveal {
        secret: Secret,
    },
    EventTransferSentSuccess {
        identifier: PaymentId,
        amount: TokenAmount,
        target: Address,
    },
    EventTransferSentFailed {
        identifier: PaymentId,
        reason: String,
    },
    EventUnlockSuccess {
        identifier: PaymentId,
        hashlock: Hashlock,
    },
    EventTransferReceivedSuccess {
        identifier: PaymentId,
        amount: TokenAmount,
        initiator: Address,
    },
    EventTransferReceivedFailed {
        identifier: PaymentId,
        reason: String,
    },
}

impl Event {
    /// The peer a `Send*` event is addressed to.
    pub fn recipient(&self) -> Option<Address> {
        match self {
            Self::SendMediatedTransfer { recipient, .. }
            | Self::SendSecretRequest { recipient, .. }
            | Self::SendRevealSecret { recipient, .. }
            | Self::SendBalanceProof { recipient, .. }
            | Self::SendTransferRefund { recipient, .. } => Some(*recipient),
            _ => None,
        }
    }

    pub fn is_contract_call(&self) -> bool {
        matches!(
            self,
            Self::ContractSendChannelClose { .. }
                | Self::ContractSendChannelUpdateTransfer { .. }
                | Self::ContractSendChannelSettle { .. }
                | Self::ContractSendSecretReveal { .. }
        )
    }

    /// Whether the event asks a collaborator to act: a message to a peer or a chain call.
    pub fn is_effect(&self) -> bool {
        self.recipient().is_some() || self.is_contract_call()
    }

    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            Self::EventTransferSentSuccess { .. }
                | Self::EventTransferSentFailed { .. }
                | Self::EventUnlockSuccess { .. }
                | Self::EventTransferReceivedSuccess { .. }
                | Self::EventTransferReceivedFailed { .. }
        )
    }
}
