// src/owner.rs
use ethers::signers::{LocalWallet, Signer, WalletError};
use ethers::types::{Address, H256};
use ethers::utils::keccak256;

/// Deterministic account owners for reproducible test identities.
///
/// Owner `n` has private key `keccak256(decimal(n))`; the sequence starts at 1.
#[derive(Debug, Clone, Default)]
pub struct OwnerSequence {
    counter: u64,
}

impl OwnerSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continues a sequence after `counter` owners have been handed out.
    pub fn starting_after(counter: u64) -> Self {
        Self { counter }
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn next_owner(&mut self) -> Result<LocalWallet, WalletError> {
        self.counter += 1;
        let key = keccak256(self.counter.to_string().as_bytes());
        LocalWallet::from_bytes(&key)
    }

    pub fn create_address(&mut self) -> Result<Address, WalletError> {
        Ok(self.next_owner()?.address())
    }
}

/// CREATE2 salt of an owner's account: `keccak256(abi.encodePacked(owner))`.
pub fn compute_salt(owner: Address) -> H256 {
    keccak256(owner.as_bytes()).into()
}
