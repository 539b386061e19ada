// src/error.rs
use ethers::types::U256;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("value {value} does not fit in {width} bytes")]
    Overflow { width: usize, value: U256 },

    #[error("malformed hex: {0}")]
    InvalidHex(String),

    #[error("hex string has odd length: {0}")]
    OddLength(String),

    #[error("init code is {0} bytes, shorter than a factory address")]
    InitCodeTooShort(usize),

    #[error("timestamp {0} does not fit in 48 bits")]
    TimestampOverflow(u64),

    #[error("malformed error signature: {0}")]
    InvalidSignature(String),
}

#[derive(Error, Debug)]
pub enum UserOpError {
    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error("missing dependency: {0}")]
    Dependency(&'static str),

    #[error("{context}")]
    Signing {
        context: String,
        #[source]
        source: BoxError,
    },

    #[error("provider error: {0}")]
    Provider(String),

    #[error("simulation reverted: {0}")]
    Simulation(String),
}

impl UserOpError {
    pub fn signing(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Signing {
            context: context.into(),
            source: source.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RevertError {
    #[error("error carries no revert data")]
    NoRevertData,
}
