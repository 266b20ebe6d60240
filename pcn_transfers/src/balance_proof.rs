// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::{
    hash::sha3_256, Address, BlockNumber, ChannelError, ChannelId, Hash, Hashlock, NodeKey, Nonce,
    Result, TokenAmount,
};

use bls::Signature;
use custom_debug::Debug;
use serde::{Deserialize, Serialize};

/// A hash-time lock: `amount` is claimable by whoever reveals the pre-image of `hashlock`
/// before block `expiration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Lock {
    pub amount: TokenAmount,
    pub expiration: BlockNumber,
    pub hashlock: Hashlock,
}

impl Lock {
    pub fn new(amount: TokenAmount, expiration: BlockNumber, hashlock: Hashlock) -> Self {
        Self {
            amount,
            expiration,
            hashlock,
        }
    }

    /// The leaf committed to in the locksroot.
    pub fn leaf_hash(&self) -> Hash {
        let mut bytes = Vec::with_capacity(48);
        bytes.extend(self.expiration.to_be_bytes());
        bytes.extend(self.amount.to_be_bytes());
        bytes.extend(self.hashlock.slice());
        Hash::hash(&bytes)
    }

    pub fn is_expired(&self, block_number: BlockNumber) -> bool {
        block_number > self.expiration
    }
}

/// Computes the commitment to a set of pending locks.
///
/// Leaves are sorted by hashlock so any party holding the same set gets the same root,
/// whatever order the locks were added in. Pairs are hashed level by level and an odd
/// leaf is carried up unchanged. The empty set commits to the all-zero hash.
pub fn compute_locksroot<'a, I>(locks: I) -> Hash
where
    I: IntoIterator<Item = &'a Lock>,
{
    let mut sorted: Vec<&Lock> = locks.into_iter().collect();
    sorted.sort_by_key(|lock| lock.hashlock);

    let mut layer: Vec<Hash> = sorted.into_iter().map(Lock::leaf_hash).collect();
    if layer.is_empty() {
        return Hash::default();
    }

    while layer.len() > 1 {
        layer = layer
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => {
                    let mut bytes = [0u8; 64];
                    bytes[..32].copy_from_slice(left.slice());
                    bytes[32..].copy_from_slice(right.slice());
                    Hash::from(sha3_256(&bytes))
                }
                _ => pair[0],
            })
            .collect();
    }

    layer[0]
}

/// A signed attestation of how much one side of a channel has sent to the other,
/// and of the locks it currently has pending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceProof {
    pub channel_identifier: ChannelId,
    /// Strictly increasing per channel per sender.
    pub nonce: Nonce,
    /// Cumulative, never decreases.
    pub transferred_amount: TokenAmount,
    pub locksroot: Hash,
    #[debug(skip)]
    pub signature: Signature,
}

impl BalanceProof {
    /// Creates and signs a new balance proof.
    pub fn sign(
        channel_identifier: ChannelId,
        nonce: Nonce,
        transferred_amount: TokenAmount,
        locksroot: Hash,
        key: &NodeKey,
    ) -> Self {
        let bytes =
            Self::bytes_for_signing(channel_identifier, nonce, transferred_amount, &locksroot);
        Self {
            channel_identifier,
            nonce,
            transferred_amount,
            locksroot,
            signature: key.sign(&bytes),
        }
    }

    /// The bytes the signature is over.
    pub fn bytes_for_signing(
        channel_identifier: ChannelId,
        nonce: Nonce,
        transferred_amount: TokenAmount,
        locksroot: &Hash,
    ) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(56);
        bytes.extend(channel_identifier.to_be_bytes());
        bytes.extend(nonce.to_be_bytes());
        bytes.extend(transferred_amount.to_be_bytes());
        bytes.extend(locksroot.slice());
        bytes
    }

    /// Checks the signature was made by `sender`.
    ///
    /// It does NOT check nonce ordering, amounts or locksroot, those depend on the
    /// channel the proof is applied to.
    pub fn verify(&self, sender: &Address) -> Result<()> {
        let bytes = Self::bytes_for_signing(
            self.channel_identifier,
            self.nonce,
            self.transferred_amount,
            &self.locksroot,
        );
        if sender.verify(&self.signature, bytes) {
            Ok(())
        } else {
            Err(ChannelError::InvalidSignature(*sender))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lock(amount: TokenAmount, seed: u8) -> Lock {
        Lock::new(amount, 100, Hash::hash(&[seed]))
    }

    #[test]
    fn locksroot_is_independent_of_insertion_order() {
        let locks = [lock(1, 1), lock(2, 2), lock(3, 3), lock(4, 4), lock(5, 5)];
        let mut reversed = locks;
        reversed.reverse();

        assert_eq!(compute_locksroot(&locks), compute_locksroot(&reversed));
    }

    #[test]
    fn locksroot_commits_to_every_lock_field() {
        let base = lock(10, 1);
        let root = compute_locksroot([&base]);

        let mut other_amount = base;
        other_amount.amount = 11;
        let mut other_expiration = base;
        other_expiration.expiration = 101;

        assert_ne!(root, compute_locksroot([&other_amount]));
        assert_ne!(root, compute_locksroot([&other_expiration]));
        assert_ne!(root, compute_locksroot([&lock(10, 2)]));
    }

    #[test]
    fn empty_locksroot_is_zero() {
        assert!(compute_locksroot(std::iter::empty()).is_zero());
        assert_eq!(compute_locksroot([&lock(1, 1)]), lock(1, 1).leaf_hash());
    }

    #[test]
    fn balance_proof_signature_covers_all_fields() {
        let key = NodeKey::random();
        let proof = BalanceProof::sign(7, 1, 30, Hash::hash(b"root"), &key);
        assert!(proof.verify(&key.address()).is_ok());

        let mut tampered = proof.clone();
        tampered.transferred_amount = 31;
        assert_eq!(
            tampered.verify(&key.address()),
            Err(ChannelError::InvalidSignature(key.address()))
        );

        let mut tampered = proof.clone();
        tampered.nonce = 2;
        assert!(tampered.verify(&key.address()).is_err());

        let mut tampered = proof;
        tampered.channel_identifier = 8;
        assert!(tampered.verify(&key.address()).is_err());
    }

    #[test]
    fn balance_proof_from_another_key_is_rejected() {
        let key = NodeKey::random();
        let impostor = NodeKey::random();
        let proof = BalanceProof::sign(1, 1, 0, Hash::default(), &impostor);
        assert!(proof.verify(&key.address()).is_err());
    }
}
