// src/lib.rs
//! Encoding, hashing, signing and revert decoding for ERC-4337 v0.7 user operations.

pub mod codec;
pub mod digest;
pub mod error;
pub mod fill;
pub mod owner;
pub mod packing;
pub mod paymaster;
pub mod provider;
pub mod revert;
pub mod simulation;
pub mod types;

pub use digest::{encode_user_op, user_op_hash, EncodeMode};
pub use error::{EncodingError, RevertError, UserOpError};
pub use fill::{fill_user_op, fill_user_op_defaults, UserOpSigner};
pub use packing::{pack_fees, pack_gas_limits, pack_paymaster_data, pack_user_op};
pub use revert::{decode_revert_reason, ErrorRegistry};
pub use types::{
    FillAndSignResult, FillSignPackResult, PackedUserOperation, PartialUserOperation,
    UserOperation, ValidityWindow,
};
