// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::{
    balance_proof::compute_locksroot, Address, BalanceProof, BlockNumber, ChannelError, ChannelId,
    Hash, Hashlock, Lock, NodeKey, Nonce, Result, TokenAddress, TokenAmount,
};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lifecycle of a channel as observed on-chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelStatus {
    Unopened,
    Opened,
    Closed,
    Settled,
}

/// One participant's side of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelEndState {
    pub address: Address,
    /// Total deposit made on-chain by this participant.
    pub deposit: TokenAmount,
    /// Latest valid balance proof signed by this participant.
    pub balance_proof: Option<BalanceProof>,
    /// Locks this participant has sent and that are neither unlocked nor removed.
    pub pending_locks: BTreeMap<Hashlock, Lock>,
}

impl ChannelEndState {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            deposit: 0,
            balance_proof: None,
            pending_locks: BTreeMap::new(),
        }
    }

    pub fn nonce(&self) -> Nonce {
        self.balance_proof.as_ref().map_or(0, |proof| proof.nonce)
    }

    pub fn transferred_amount(&self) -> TokenAmount {
        self.balance_proof
            .as_ref()
            .map_or(0, |proof| proof.transferred_amount)
    }

    pub fn locked_amount(&self) -> TokenAmount {
        self.pending_locks.values().map(|lock| lock.amount).sum()
    }

    pub fn locksroot(&self) -> Hash {
        compute_locksroot(self.pending_locks.values())
    }

    pub fn lock(&self, hashlock: &Hashlock) -> Option<&Lock> {
        self.pending_locks.get(hashlock)
    }
}

/// The bilateral ledger of one channel.
///
/// Channels live in the aggregate state keyed by `channel_identifier`; role state
/// machines refer to them by identifier only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelState {
    pub channel_identifier: ChannelId,
    pub token_address: TokenAddress,
    pub our_state: ChannelEndState,
    pub partner_state: ChannelEndState,
    pub settle_timeout: BlockNumber,
    pub reveal_timeout: BlockNumber,
    pub status: ChannelStatus,
    pub opened_block: Option<BlockNumber>,
    pub closed_block: Option<BlockNumber>,
    pub settled_block: Option<BlockNumber>,
    /// Set once the settle transaction has been requested.
    pub settle_requested: bool,
}

impl ChannelState {
    pub fn new(
        channel_identifier: ChannelId,
        token_address: TokenAddress,
        our_address: Address,
        partner_address: Address,
        settle_timeout: BlockNumber,
        reveal_timeout: BlockNumber,
    ) -> Self {
        Self {
            channel_identifier,
            token_address,
            our_state: ChannelEndState::new(our_address),
            partner_state: ChannelEndState::new(partner_address),
            settle_timeout,
            reveal_timeout,
            status: ChannelStatus::Unopened,
            opened_block: None,
            closed_block: None,
            settled_block: None,
            settle_requested: false,
        }
    }

    pub fn partner(&self) -> Address {
        self.partner_state.address
    }

    pub fn is_open(&self) -> bool {
        self.status == ChannelStatus::Opened
    }

    pub fn end(&self, participant: &Address) -> Result<&ChannelEndState> {
        if participant == &self.our_state.address {
            Ok(&self.our_state)
        } else if participant == &self.partner_state.address {
            Ok(&self.partner_state)
        } else {
            Err(ChannelError::UnknownParticipant(*participant))
        }
    }

    fn end_mut(&mut self, participant: &Address) -> Result<&mut ChannelEndState> {
        if participant == &self.our_state.address {
            Ok(&mut self.our_state)
        } else if participant == &self.partner_state.address {
            Ok(&mut self.partner_state)
        } else {
            Err(ChannelError::UnknownParticipant(*participant))
        }
    }

    /// The side that receives what `participant` sends.
    fn counterpart(&self, participant: &Address) -> Result<&ChannelEndState> {
        if participant == &self.our_state.address {
            Ok(&self.partner_state)
        } else if participant == &self.partner_state.address {
            Ok(&self.our_state)
        } else {
            Err(ChannelError::UnknownParticipant(*participant))
        }
    }

    pub fn total_deposit(&self) -> Result<TokenAmount> {
        self.our_state
            .deposit
            .checked_add(self.partner_state.deposit)
            .ok_or(ChannelError::NumericOverflow)
    }

    /// What `sender` can still lock or transfer:
    /// `deposit + received - transferred - locked`.
    pub fn distributable(&self, sender: &Address) -> Result<TokenAmount> {
        let end = self.end(sender)?;
        let received = self.counterpart(sender)?.transferred_amount();
        let owned = end
            .deposit
            .checked_add(received)
            .ok_or(ChannelError::NumericOverflow)?;
        let spent = end
            .transferred_amount()
            .checked_add(end.locked_amount())
            .ok_or(ChannelError::NumericOverflow)?;
        Ok(owned.saturating_sub(spent))
    }

    /// Our distributable balance, zero unless the channel is open.
    pub fn our_distributable(&self) -> TokenAmount {
        if !self.is_open() {
            return 0;
        }
        let us = self.our_state.address;
        self.distributable(&us).unwrap_or(0)
    }

    fn ensure_mutable(&self) -> Result<()> {
        if self.status == ChannelStatus::Settled {
            return Err(ChannelError::ChannelSettled(self.channel_identifier));
        }
        Ok(())
    }

    /// Validates `proof` as the next balance proof of `sender` and records it.
    ///
    /// Returns how much the proof raised `sender`'s transferred amount.
    pub fn apply_balance_proof(
        &mut self,
        proof: &BalanceProof,
        sender: &Address,
    ) -> Result<TokenAmount> {
        self.ensure_mutable()?;
        if proof.channel_identifier != self.channel_identifier {
            return Err(ChannelError::ChannelMismatch {
                expected: self.channel_identifier,
                got: proof.channel_identifier,
            });
        }

        let total_deposit = self.total_deposit()?;
        let end = self.end(sender)?;
        proof.verify(sender)?;

        if proof.nonce <= end.nonce() {
            return Err(ChannelError::StaleNonce {
                last: end.nonce(),
                got: proof.nonce,
            });
        }
        let previous = end.transferred_amount();
        if proof.transferred_amount < previous {
            return Err(ChannelError::TransferredAmountDecreased {
                previous,
                got: proof.transferred_amount,
            });
        }
        if proof.locksroot != end.locksroot() {
            return Err(ChannelError::LocksrootMismatch);
        }
        let committed = proof
            .transferred_amount
            .checked_add(end.locked_amount())
            .ok_or(ChannelError::NumericOverflow)?;
        if committed > total_deposit {
            return Err(ChannelError::OverspendDeposit {
                committed,
                deposits: total_deposit,
            });
        }

        self.end_mut(sender)?.balance_proof = Some(proof.clone());
        Ok(proof.transferred_amount - previous)
    }

    /// Adds a lock sent by `sender`.
    pub fn add_lock(&mut self, sender: &Address, lock: Lock) -> Result<()> {
        self.ensure_mutable()?;
        if !self.is_open() {
            return Err(ChannelError::ChannelNotOpen(self.channel_identifier));
        }

        let end = self.end(sender)?;
        if end.pending_locks.contains_key(&lock.hashlock) {
            return Err(ChannelError::DuplicateHashlock(lock.hashlock));
        }

        let available = self.distributable(sender)?;
        let escrow_left = self.total_deposit()?.saturating_sub(
            end.transferred_amount()
                .checked_add(end.locked_amount())
                .ok_or(ChannelError::NumericOverflow)?,
        );
        let available = available.min(escrow_left);
        if lock.amount > available {
            return Err(ChannelError::InsufficientBalance {
                available,
                required: lock.amount,
            });
        }

        let _ = self
            .end_mut(sender)?
            .pending_locks
            .insert(lock.hashlock, lock);
        Ok(())
    }

    /// Removes a pending lock sent by `sender`.
    pub fn remove_lock(&mut self, sender: &Address, hashlock: &Hashlock) -> Result<Lock> {
        self.ensure_mutable()?;
        self.end_mut(sender)?
            .pending_locks
            .remove(hashlock)
            .ok_or(ChannelError::UnknownHashlock(*hashlock))
    }

    /// The locksroot of `participant`'s pending locks.
    pub fn compute_locksroot(&self, participant: &Address) -> Result<Hash> {
        Ok(self.end(participant)?.locksroot())
    }

    fn next_nonce(&self) -> Result<Nonce> {
        self.our_state
            .nonce()
            .checked_add(1)
            .ok_or(ChannelError::NumericOverflow)
    }

    /// Locks `lock.amount` of our balance and signs the matching balance proof.
    ///
    /// Nothing changes unless both the lock and the proof are accepted.
    pub fn send_locked_transfer(&mut self, lock: Lock, key: &NodeKey) -> Result<BalanceProof> {
        let us = self.our_state.address;
        let mut candidate = self.clone();
        candidate.add_lock(&us, lock)?;

        let proof = BalanceProof::sign(
            self.channel_identifier,
            candidate.next_nonce()?,
            candidate.our_state.transferred_amount(),
            candidate.our_state.locksroot(),
            key,
        );
        let _ = candidate.apply_balance_proof(&proof, &us)?;

        *self = candidate;
        Ok(proof)
    }

    /// Removes our lock for `hashlock`, adding its amount to what we transferred.
    pub fn send_unlock(&mut self, hashlock: &Hashlock, key: &NodeKey) -> Result<(Lock, BalanceProof)> {
        let us = self.our_state.address;
        let mut candidate = self.clone();
        let lock = candidate.remove_lock(&us, hashlock)?;

        let transferred_amount = candidate
            .our_state
            .transferred_amount()
            .checked_add(lock.amount)
            .ok_or(ChannelError::NumericOverflow)?;
        let proof = BalanceProof::sign(
            self.channel_identifier,
            candidate.next_nonce()?,
            transferred_amount,
            candidate.our_state.locksroot(),
            key,
        );
        let _ = candidate.apply_balance_proof(&proof, &us)?;

        *self = candidate;
        Ok((lock, proof))
    }

    /// Registers a lock sent to us by our partner together with their balance proof.
    pub fn receive_locked_transfer(
        &mut self,
        sender: &Address,
        lock: &Lock,
        proof: &BalanceProof,
        block_number: BlockNumber,
    ) -> Result<()> {
        if sender != &self.partner_state.address {
            return Err(ChannelError::UnknownParticipant(*sender));
        }
        if lock.is_expired(block_number) {
            return Err(ChannelError::LockExpired(lock.hashlock));
        }

        let mut candidate = self.clone();
        candidate.add_lock(sender, *lock)?;
        let _ = candidate.apply_balance_proof(proof, sender)?;

        *self = candidate;
        Ok(())
    }

    /// Applies our partner's unlock of `hashlock`: the lock is removed and its amount
    /// must be added to their transferred amount.
    pub fn receive_unlock(
        &mut self,
        sender: &Address,
        hashlock: &Hashlock,
        proof: &BalanceProof,
    ) -> Result<Lock> {
        if sender != &self.partner_state.address {
            return Err(ChannelError::UnknownParticipant(*sender));
        }

        let mut candidate = self.clone();
        let lock = candidate.remove_lock(sender, hashlock)?;
        let expected = candidate
            .partner_state
            .transferred_amount()
            .checked_add(lock.amount)
            .ok_or(ChannelError::NumericOverflow)?;
        if proof.transferred_amount != expected {
            return Err(ChannelError::UnlockAmountMismatch {
                expected,
                got: proof.transferred_amount,
            });
        }
        let _ = candidate.apply_balance_proof(proof, sender)?;

        *self = candidate;
        Ok(lock)
    }

    pub fn open(&mut self, block_number: BlockNumber) {
        if self.status == ChannelStatus::Unopened {
            self.status = ChannelStatus::Opened;
            self.opened_block = Some(block_number);
        }
    }

    /// Records a new on-chain total deposit. Total deposits never decrease.
    pub fn set_total_deposit(&mut self, participant: &Address, total_deposit: TokenAmount) -> Result<()> {
        self.ensure_mutable()?;
        let channel_identifier = self.channel_identifier;
        let end = self.end_mut(participant)?;
        if total_deposit > end.deposit {
            end.deposit = total_deposit;
        } else {
            debug!(
                "Ignoring non-increasing deposit {total_deposit} for {participant:?} on channel {channel_identifier}"
            );
        }
        Ok(())
    }

    pub fn close(&mut self, block_number: BlockNumber) -> Result<()> {
        self.ensure_mutable()?;
        if self.closed_block.is_none() {
            self.status = ChannelStatus::Closed;
            self.closed_block = Some(block_number);
        }
        Ok(())
    }

    pub fn settle(&mut self, block_number: BlockNumber) -> Result<()> {
        self.ensure_mutable()?;
        self.status = ChannelStatus::Settled;
        self.settled_block = Some(block_number);
        Ok(())
    }

    /// True once the settlement window of a closed channel has passed.
    pub fn is_settleable(&self, block_number: BlockNumber) -> bool {
        match (self.status, self.closed_block) {
            (ChannelStatus::Closed, Some(closed)) => {
                block_number > closed.saturating_add(self.settle_timeout)
            }
            _ => false,
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils {
    use super::*;

    /// An open channel between `us` and `partner` with the given deposits.
    pub fn open_channel(
        channel_identifier: ChannelId,
        us: &NodeKey,
        partner: &NodeKey,
        our_deposit: TokenAmount,
        partner_deposit: TokenAmount,
    ) -> ChannelState {
        let mut channel = ChannelState::new(
            channel_identifier,
            xor_name::XorName([7; 32]),
            us.address(),
            partner.address(),
            50,
            10,
        );
        channel.open(1);
        channel.our_state.deposit = our_deposit;
        channel.partner_state.deposit = partner_deposit;
        channel
    }
}
