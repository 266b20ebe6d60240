// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::{
    Address, BalanceProof, BlockNumber, ChannelError, ChannelId, Hashlock, Lock, PaymentId,
    Result, Secret, TokenAddress, TokenAmount,
};

use serde::{Deserialize, Serialize};

/// What is being paid, by whom, to whom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferDescription {
    pub identifier: PaymentId,
    pub token: TokenAddress,
    pub amount: TokenAmount,
    pub initiator: Address,
    pub target: Address,
    pub hashlock: Hashlock,
    /// Only ever set at the node that knows it; stripped from anything sent out.
    pub secret: Option<Secret>,
    /// Set once a route has been chosen.
    pub expiration: Option<BlockNumber>,
}

impl TransferDescription {
    /// The copy that may leave this node.
    pub fn without_secret(&self) -> Self {
        Self {
            secret: None,
            ..self.clone()
        }
    }

    pub fn with_expiration(&self, expiration: BlockNumber) -> Self {
        Self {
            expiration: Some(expiration),
            ..self.clone()
        }
    }
}

/// A transfer as it travels over one channel: the description, the lock it adds
/// and the sender's balance proof committing to that lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedTransfer {
    pub transfer: TransferDescription,
    pub lock: Lock,
    pub balance_proof: BalanceProof,
}

impl LockedTransfer {
    pub fn channel_identifier(&self) -> ChannelId {
        self.balance_proof.channel_identifier
    }

    pub fn hashlock(&self) -> Hashlock {
        self.lock.hashlock
    }

    pub fn expiration(&self) -> BlockNumber {
        self.lock.expiration
    }

    /// The lock must describe the transfer it travels with.
    pub fn check_lock(&self) -> Result<()> {
        let transfer = &self.transfer;
        if self.lock.hashlock != transfer.hashlock
            || self.lock.amount != transfer.amount
            || transfer.expiration != Some(self.lock.expiration)
        {
            return Err(ChannelError::LockMismatch);
        }
        Ok(())
    }
}
