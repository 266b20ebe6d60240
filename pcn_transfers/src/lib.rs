// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

#[macro_use]
extern crate tracing;

mod balance_proof;
mod channel;
mod error;
mod events;
mod hash;
mod keys;
pub mod mediated_transfer;
mod routes;
mod state;
mod state_change;
mod state_manager;
mod transfer;
pub mod views;
mod wal;

/// Types used in the public API
pub use crate::{
    balance_proof::{compute_locksroot, BalanceProof, Lock},
    channel::{ChannelEndState, ChannelState, ChannelStatus},
    error::{ChannelError, Error, Result},
    events::Event,
    hash::{Hash, Hashlock, Secret},
    keys::{Address, NodeKey},
    routes::{RouteState, RoutesState},
    state::{ChainState, TransferTask},
    state_change::StateChange,
    state_manager::{state_transition, StateManager},
    transfer::{LockedTransfer, TransferDescription},
    wal::{FileWal, InMemoryWal, PendingEffect, WalConfig, WalRecord, WalStorage},
};

#[cfg(any(test, feature = "test-utils"))]
pub use crate::channel::test_utils;

// re-export crates used in our public API
pub use bls::{self, rand};
pub use xor_name::XorName;

/// Token amounts, in the token's smallest unit.
pub type TokenAmount = u64;
/// Block height, the only clock the state machines know about.
pub type BlockNumber = u64;
pub type ChannelId = u64;
pub type Nonce = u64;
/// User supplied payment identifier.
pub type PaymentId = u64;
/// On-chain address of the token a channel holds.
pub type TokenAddress = XorName;

/// This is a helper module to make it a bit easier
/// and regular for API callers to instantiate
/// an Rng when generating payment secrets.
pub mod rng {
    use crate::rand::{
        rngs::{StdRng, ThreadRng},
        SeedableRng,
    };

    pub fn thread_rng() -> ThreadRng {
        crate::rand::thread_rng()
    }

    pub fn from_seed(seed: <StdRng as SeedableRng>::Seed) -> StdRng {
        StdRng::from_seed(seed)
    }
}
