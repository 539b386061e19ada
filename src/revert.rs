// src/revert.rs
//! Human-readable decoding of revert payloads.
//!
//! `Error(string)` and `Panic(uint256)` are recognised directly. Any other selector is looked up
//! in an [`ErrorRegistry`]; `bytes` arguments of a matched error are decoded again as nested
//! revert payloads, down to [`MAX_NESTING_DEPTH`].

use std::collections::HashMap;

use ethers::abi::param_type::Reader;
use ethers::abi::{decode, ParamType, Token};
use ethers::providers::RpcError;
use ethers::types::{I256, U256};
use ethers::utils::id;
use serde_json::Value;

use crate::codec::{parse_hex, to_hex};
use crate::error::{EncodingError, RevertError};

pub const ERROR_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];
pub const PANIC_SELECTOR: [u8; 4] = [0x4e, 0x48, 0x7b, 0x71];
pub const MAX_NESTING_DEPTH: usize = 8;

/// Errors raised by the v0.7 entry point and the signature library it uses.
pub const ENTRY_POINT_ERRORS: &[&str] = &[
    "FailedOp(uint256,string)",
    "FailedOpWithRevert(uint256,string,bytes)",
    "PostOpReverted(bytes)",
    "SignatureValidationFailed(address)",
    "SenderAddressResult(address)",
    "DelegateAndRevert(bool,bytes)",
    "ECDSAInvalidSignature()",
];

/// Reason for a Solidity `Panic(uint256)` code.
pub fn panic_reason(code: U256) -> Option<&'static str> {
    if code > U256::from(u8::MAX) {
        return None;
    }
    let reason = match code.low_u32() {
        0x01 => "assert(false)",
        0x11 => "arithmetic overflow/underflow",
        0x12 => "divide by zero",
        0x21 => "invalid enum value",
        0x22 => "storage byte array that is incorrectly encoded",
        0x31 => ".pop() on an empty array",
        0x32 => "array out-of-bounds or negative index",
        0x41 => "memory overflow",
        0x51 => "zero-initialized variable of internal function type",
        _ => return None,
    };
    Some(reason)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorSignature {
    pub name: String,
    pub params: Vec<ParamType>,
    pub selector: [u8; 4],
}

impl ErrorSignature {
    /// Parses `Name(type,...)`. A leading `error` keyword and parameter names are accepted.
    pub fn parse(signature: &str) -> Result<Self, EncodingError> {
        let malformed = || EncodingError::InvalidSignature(signature.to_string());

        let signature = signature.trim();
        let signature = signature.strip_prefix("error ").unwrap_or(signature).trim();
        let open = signature.find('(').ok_or_else(malformed)?;
        let inner = signature[open + 1..]
            .strip_suffix(')')
            .ok_or_else(malformed)?;
        let name = signature[..open].trim();
        if name.is_empty() {
            return Err(malformed());
        }

        let params = split_top_level(inner)
            .into_iter()
            .map(|param| {
                let ty = param.split_whitespace().next().ok_or_else(malformed)?;
                let parsed = Reader::read(ty).map_err(|_| malformed())?;
                // the reader accepts unknown names and odd widths
                if !is_valid_param(&parsed) || parsed.to_string() != canonical_type(ty) {
                    return Err(malformed());
                }
                Ok(parsed)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let canonical = format!(
            "{name}({})",
            params
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(",")
        );

        Ok(Self {
            name: name.to_string(),
            selector: id(canonical),
            params,
        })
    }
}

fn is_valid_param(param: &ParamType) -> bool {
    match param {
        ParamType::Uint(bits) | ParamType::Int(bits) => *bits % 8 == 0 && (8..=256).contains(bits),
        ParamType::FixedBytes(len) => (1..=32).contains(len),
        ParamType::Array(inner) | ParamType::FixedArray(inner, _) => is_valid_param(inner),
        ParamType::Tuple(items) => items.iter().all(is_valid_param),
        ParamType::Address | ParamType::Bytes | ParamType::Bool | ParamType::String => true,
    }
}

/// Expands the `uint` and `int` aliases to their 256-bit names.
fn canonical_type(ty: &str) -> String {
    let mut out = String::with_capacity(ty.len());
    let mut word = String::new();
    for c in ty.chars().chain(std::iter::once(' ')) {
        if c.is_ascii_alphanumeric() {
            word.push(c);
            continue;
        }
        match word.as_str() {
            "uint" | "int" => {
                out.push_str(&word);
                out.push_str("256");
            }
            _ => out.push_str(&word),
        }
        word.clear();
        if c != ' ' {
            out.push(c);
        }
    }
    out
}

fn split_top_level(params: &str) -> Vec<&str> {
    if params.trim().is_empty() {
        return Vec::new();
    }
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in params.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(params[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(params[start..].trim());
    parts
}

/// Known custom errors keyed by selector.
#[derive(Debug, Clone, Default)]
pub struct ErrorRegistry {
    errors: HashMap<[u8; 4], ErrorSignature>,
}

impl ErrorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry_point() -> Self {
        let mut registry = Self::new();
        for signature in ENTRY_POINT_ERRORS {
            if let Ok(signature) = ErrorSignature::parse(signature) {
                registry.insert(signature);
            }
        }
        registry
    }

    pub fn insert(&mut self, signature: ErrorSignature) {
        self.errors.insert(signature.selector, signature);
    }

    pub fn with_signature(mut self, signature: &str) -> Result<Self, EncodingError> {
        self.insert(ErrorSignature::parse(signature)?);
        Ok(self)
    }

    pub fn get(&self, selector: &[u8]) -> Option<&ErrorSignature> {
        let selector: [u8; 4] = selector.try_into().ok()?;
        self.errors.get(&selector)
    }

    /// Decodes `data` into a readable reason.
    ///
    /// Without a match this returns `None`, or the raw payload as hex when `null_if_no_match`
    /// is false.
    pub fn decode_revert_reason(&self, data: &[u8], null_if_no_match: bool) -> Option<String> {
        match self.decode_at_depth(data, 0) {
            Some(reason) => Some(reason),
            None if null_if_no_match => None,
            None => Some(to_hex(data)),
        }
    }

    fn decode_at_depth(&self, data: &[u8], depth: usize) -> Option<String> {
        if data.len() < 4 {
            return None;
        }
        let (selector, params) = data.split_at(4);

        if selector == ERROR_SELECTOR {
            let message = match decode(&[ParamType::String], params).ok()?.pop()? {
                Token::String(message) => message,
                _ => return None,
            };
            return Some(format!("Error({message})"));
        }

        if selector == PANIC_SELECTOR {
            let code = match decode(&[ParamType::Uint(256)], params).ok()?.pop()? {
                Token::Uint(code) => code,
                _ => return None,
            };
            let reason = panic_reason(code)
                .map(str::to_string)
                .unwrap_or_else(|| code.to_string());
            return Some(format!("Panic({reason})"));
        }

        let signature = self.get(selector)?;
        let args = decode(&signature.params, params).ok()?;
        let rendered = args
            .into_iter()
            .map(|arg| match arg {
                Token::Bytes(nested) => self.render_nested(&nested, depth),
                Token::String(s) => format!("\"{s}\""),
                other => render_token(other),
            })
            .collect::<Vec<_>>()
            .join(",");
        Some(format!("{}({})", signature.name, rendered))
    }

    fn render_nested(&self, data: &[u8], depth: usize) -> String {
        if depth + 1 >= MAX_NESTING_DEPTH {
            return to_hex(data);
        }
        self.decode_at_depth(data, depth + 1)
            .unwrap_or_else(|| to_hex(data))
    }

    /// Decodes the revert data carried by a JSON-RPC error.
    pub fn decode_rpc_error<E: RpcError>(
        &self,
        error: &E,
        null_if_no_match: bool,
    ) -> Result<Option<String>, RevertError> {
        let data = RpcError::as_error_response(error)
            .and_then(|response| response.as_revert_data())
            .ok_or(RevertError::NoRevertData)?;
        Ok(self.decode_revert_reason(&data, null_if_no_match))
    }

    /// Decodes a hex string payload, or an error object exposing `data` or `error.data`.
    pub fn decode_json(
        &self,
        value: &Value,
        null_if_no_match: bool,
    ) -> Result<Option<String>, RevertError> {
        let payload = revert_payload_from_json(value)?;
        match parse_hex(payload) {
            Ok(data) => Ok(self.decode_revert_reason(&data, null_if_no_match)),
            Err(_) if null_if_no_match => Ok(None),
            Err(_) => Ok(Some(payload.to_string())),
        }
    }
}

fn render_token(token: Token) -> String {
    match token {
        Token::Address(address) => format!("{address:?}"),
        Token::Uint(value) => value.to_string(),
        Token::Int(value) => I256::from_raw(value).to_string(),
        Token::Bool(value) => value.to_string(),
        Token::String(value) => value,
        Token::Bytes(value) | Token::FixedBytes(value) => to_hex(value),
        Token::Array(items) | Token::FixedArray(items) => format!(
            "[{}]",
            items.into_iter().map(render_token).collect::<Vec<_>>().join(",")
        ),
        Token::Tuple(items) => format!(
            "({})",
            items.into_iter().map(render_token).collect::<Vec<_>>().join(",")
        ),
    }
}

/// The revert payload of a JSON value: the string itself, or the `data` or `error.data` field.
pub fn revert_payload_from_json(value: &Value) -> Result<&str, RevertError> {
    let data = match value {
        Value::String(data) => Some(data.as_str()),
        Value::Object(_) => value
            .get("data")
            .and_then(Value::as_str)
            .or_else(|| value.pointer("/error/data").and_then(Value::as_str)),
        _ => None,
    };
    data.ok_or(RevertError::NoRevertData)
}

/// Decodes against the entry point error set.
pub fn decode_revert_reason(data: &[u8], null_if_no_match: bool) -> Option<String> {
    ErrorRegistry::entry_point().decode_revert_reason(data, null_if_no_match)
}
