// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use bls::{PublicKey, SecretKey, Signature};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The address of a node in the network. It is the node's BLS public key, so any
/// message claiming to come from an `Address` can be checked against it.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize, Hash)]
pub struct Address(PublicKey);

impl Address {
    pub fn new<G: Into<PublicKey>>(public_key: G) -> Self {
        Self(public_key.into())
    }

    pub fn public_key(&self) -> PublicKey {
        self.0
    }

    pub fn to_bytes(&self) -> [u8; bls::PK_SIZE] {
        self.0.to_bytes()
    }

    /// Returns `true` if the signature matches the message.
    pub fn verify<M: AsRef<[u8]>>(&self, sig: &Signature, msg: M) -> bool {
        self.0.verify(sig, msg)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0.to_bytes())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        let bytes = self.0.to_bytes();
        write!(
            formatter,
            "Address({:02x}{:02x}{:02x}..)",
            bytes[0], bytes[1], bytes[2]
        )
    }
}

/// The signing key of this node. It never enters the aggregate state nor the WAL.
///
/// BLS signatures are deterministic, so replaying the same state changes with the same
/// key reproduces the exact same signed balance proofs.
#[derive(Clone)]
pub struct NodeKey(SecretKey);

impl NodeKey {
    pub fn new(secret_key: SecretKey) -> Self {
        Self(secret_key)
    }

    pub fn random() -> Self {
        Self(SecretKey::random())
    }

    pub fn address(&self) -> Address {
        Address(self.0.public_key())
    }

    pub(crate) fn sign(&self, msg: &[u8]) -> Signature {
        self.0.sign(msg)
    }
}

impl fmt::Debug for NodeKey {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "NodeKey({:?})", self.address())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_verifies_only_against_signer() {
        let alice = NodeKey::random();
        let bob = NodeKey::random();
        let msg = b"balance proof bytes";

        let sig = alice.sign(msg);
        assert!(alice.address().verify(&sig, msg));
        assert!(!bob.address().verify(&sig, msg));
        assert!(!alice.address().verify(&sig, b"tampered"));
    }

    #[test]
    fn signing_is_deterministic() {
        let key = NodeKey::random();
        assert_eq!(key.sign(b"same"), key.sign(b"same"));
    }
}
