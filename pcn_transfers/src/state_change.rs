// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::{
    Address, BalanceProof, BlockNumber, ChannelId, Error, Event, Hashlock, LockedTransfer,
    PaymentId,
    RouteState, Secret, TokenAddress, TokenAmount, TransferDescription,
};

use serde::{Deserialize, Serialize};

/// Every input the node reacts to: user actions, chain facts and received messages.
///
/// Messages are assumed authenticated by the transport, `sender` is who sent them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateChange {
    Block {
        block_number: BlockNumber,
    },
    ActionInitInitiator {
        transfer: TransferDescription,
        routes: Vec<RouteState>,
    },
    ActionInitMediator {
        from_route: RouteState,
        from_transfer: LockedTransfer,
        routes: Vec<RouteState>,
    },
    ActionInitTarget {
        from_route: RouteState,
        from_transfer: LockedTransfer,
    },
    ActionChannelClose {
        channel_identifier: ChannelId,
    },
    ContractReceiveChannelOpened {
        channel_identifier: ChannelId,
        token_address: TokenAddress,
        participants: (Address, Address),
        settle_timeout: BlockNumber,
        reveal_timeout: BlockNumber,
        block_number: BlockNumber,
    },
    ContractReceiveChannelNewDeposit {
        channel_identifier: ChannelId,
        participant: Address,
        total_deposit: TokenAmount,
    },
    ContractReceiveChannelClosed {
        channel_identifier: ChannelId,
        closing_address: Address,
        block_number: BlockNumber,
    },
    ContractReceiveChannelSettled {
        channel_identifier: ChannelId,
        block_number: BlockNumber,
    },
    ContractReceiveSecretReveal {
        channel_identifier: ChannelId,
        secret: Secret,
    },
    ReceiveSecretRequest {
        identifier: PaymentId,
        hashlock: Hashlock,
        amount: TokenAmount,
        sender: Address,
    },
    ReceiveSecretReveal {
        secret: Secret,
        sender: Address,
    },
    /// The partner's unlock of the lock opened by `secret`.
    ReceiveBalanceProof {
        sender: Address,
        secret: Secret,
        balance_proof: BalanceProof,
    },
    ReceiveTransferRefund {
        sender: Address,
        transfer: LockedTransfer,
    },
    /// The transport or chain client could not carry out `event`. It stays pending and is
    /// delivered again on restart.
    EffectFailed {
        event: Event,
        reason: String,
    },
}

impl StateChange {
    /// The transfer this state change is addressed to, if it is addressed to one.
    pub fn hashlock(&self) -> Option<Hashlock> {
        match self {
            Self::ActionInitInitiator { transfer, .. } => Some(transfer.hashlock),
            Self::ActionInitMediator { from_transfer, .. }
            | Self::ActionInitTarget { from_transfer, .. } => Some(from_transfer.hashlock()),
            Self::ReceiveSecretRequest { hashlock, .. } => Some(*hashlock),
            Self::ReceiveSecretReveal { secret, .. }
            | Self::ReceiveBalanceProof { secret, .. }
            | Self::ContractReceiveSecretReveal { secret, .. } => Some(secret.hashlock()),
            Self::ReceiveTransferRefund { transfer, .. } => Some(transfer.hashlock()),
            Self::Block { .. }
            | Self::ActionChannelClose { .. }
            | Self::ContractReceiveChannelOpened { .. }
            | Self::ContractReceiveChannelNewDeposit { .. }
            | Self::ContractReceiveChannelClosed { .. }
            | Self::ContractReceiveChannelSettled { .. }
            | Self::EffectFailed { .. } => None,
        }
    }

    /// Stateless ingestion checks. A state change failing them is never logged nor applied.
    pub fn validate(&self) -> Result<(), Error> {
        match self {
            Self::ActionInitInitiator { transfer, .. } => {
                if transfer.amount == 0 {
                    return Err(invalid("transfer amount is zero"));
                }
                if transfer.initiator == transfer.target {
                    return Err(invalid("initiator and target are the same node"));
                }
                match transfer.secret {
                    Some(secret) if secret.opens(&transfer.hashlock) => Ok(()),
                    Some(_) => Err(invalid("secret does not open the hashlock")),
                    None => Err(invalid("initiator must know the secret")),
                }
            }
            Self::ActionInitMediator {
                from_route,
                from_transfer,
                ..
            }
            | Self::ActionInitTarget {
                from_route,
                from_transfer,
            } => {
                if from_transfer.transfer.amount == 0 {
                    return Err(invalid("transfer amount is zero"));
                }
                if from_transfer.transfer.secret.is_some() {
                    return Err(invalid("received transfer carries its secret"));
                }
                if from_route.channel_identifier != from_transfer.channel_identifier() {
                    return Err(invalid("transfer did not arrive over its route"));
                }
                from_transfer
                    .check_lock()
                    .map_err(|err| invalid(&err.to_string()))
            }
            Self::ContractReceiveChannelOpened {
                participants: (first, second),
                settle_timeout,
                reveal_timeout,
                ..
            } => {
                if first == second {
                    return Err(invalid("channel participants are the same node"));
                }
                if *reveal_timeout == 0 || reveal_timeout >= settle_timeout {
                    return Err(invalid("reveal timeout must be within (0, settle timeout)"));
                }
                Ok(())
            }
            Self::ReceiveSecretRequest { amount, .. } if *amount == 0 => {
                Err(invalid("secret request for a zero amount"))
            }
            Self::ReceiveTransferRefund { transfer, .. } => transfer
                .check_lock()
                .map_err(|err| invalid(&err.to_string())),
            _ => Ok(()),
        }
    }

    /// Decodes a state change received from outside the node.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        rmp_serde::from_slice(bytes).map_err(|err| invalid(&err.to_string()))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        Ok(rmp_serde::to_vec(self)?)
    }
}

fn invalid(reason: &str) -> Error {
    Error::InvalidStateChange(reason.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{rng, NodeKey};

    fn transfer(secret: Option<Secret>, hashlock: Hashlock) -> TransferDescription {
        TransferDescription {
            identifier: 1,
            token: xor_name::XorName([1; 32]),
            amount: 3,
            initiator: NodeKey::random().address(),
            target: NodeKey::random().address(),
            hashlock,
            secret,
            expiration: None,
        }
    }

    #[test]
    fn initiator_must_hold_the_matching_secret() {
        let mut rng = rng::thread_rng();
        let secret = Secret::random(&mut rng);
        let other = Secret::random(&mut rng);

        let valid = StateChange::ActionInitInitiator {
            transfer: transfer(Some(secret), secret.hashlock()),
            routes: vec![],
        };
        assert!(valid.validate().is_ok());
        assert_eq!(valid.hashlock(), Some(secret.hashlock()));

        for transfer in [
            transfer(Some(other), secret.hashlock()),
            transfer(None, secret.hashlock()),
        ] {
            let state_change = StateChange::ActionInitInitiator {
                transfer,
                routes: vec![],
            };
            assert!(matches!(
                state_change.validate(),
                Err(Error::InvalidStateChange(_))
            ));
        }
    }

    #[test]
    fn channel_opened_timeouts_are_checked() {
        let opened = |settle_timeout, reveal_timeout| StateChange::ContractReceiveChannelOpened {
            channel_identifier: 1,
            token_address: xor_name::XorName([1; 32]),
            participants: (NodeKey::random().address(), NodeKey::random().address()),
            settle_timeout,
            reveal_timeout,
            block_number: 1,
        };
        assert!(opened(50, 10).validate().is_ok());
        assert!(opened(10, 10).validate().is_err());
        assert!(opened(10, 0).validate().is_err());
    }

    #[test]
    fn malformed_bytes_are_rejected() -> eyre::Result<()> {
        let block = StateChange::Block { block_number: 7 };
        assert_eq!(StateChange::from_bytes(&block.to_bytes()?)?, block);
        assert!(matches!(
            StateChange::from_bytes(&[0xc1, 0x00]),
            Err(Error::InvalidStateChange(_))
        ));
        Ok(())
    }
}
