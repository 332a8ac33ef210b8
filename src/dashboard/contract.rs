use alloy::dyn_abi::{DynSolValue, FunctionExt, JsonAbiExt};
use alloy::json_abi::{Function, JsonAbi, StateMutability};
use alloy::primitives::{hex, Address};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::client::ChainReader;
use crate::config::parse_abi;
use crate::error::{DashboardError, Result};

/// Rendered results of a contract's argument-less getters, keyed by name.
pub type ContractMetadata = BTreeMap<String, String>;

/// A contract ABI bound to an on-chain address.
///
/// Construction is pure; reads go through a [`ChainReader`].
#[derive(Debug, Clone, PartialEq)]
pub struct ContractHandle {
    abi: JsonAbi,
    address: Address,
}

impl ContractHandle {
    pub fn new(abi: JsonAbi, address: &str) -> Result<Self> {
        let address = parse_address(address)?;
        Ok(Self { abi, address })
    }

    /// Like [`ContractHandle::new`] but starting from the raw ABI json.
    pub fn from_abi_json(abi: &str, address: &str) -> Result<Self> {
        Self::new(parse_abi(abi)?, address)
    }

    pub const fn address(&self) -> Address {
        self.address
    }

    pub const fn abi(&self) -> &JsonAbi {
        &self.abi
    }

    /// Calls a read-only function and decodes its outputs.
    pub async fn call<R>(
        &self,
        reader: &R,
        name: &str,
        args: &[DynSolValue],
    ) -> Result<Vec<DynSolValue>>
    where
        R: ChainReader + ?Sized,
    {
        let function = self.function(name, args.len())?;
        self.call_function(reader, function, args).await
    }

    /// Reads every argument-less `view`/`pure` function.
    ///
    /// A getter that fails is logged and skipped.
    pub async fn metadata<R>(&self, reader: &R) -> ContractMetadata
    where
        R: ChainReader + ?Sized,
    {
        let mut metadata = ContractMetadata::new();
        let getters = self.abi.functions().filter(|f| {
            f.inputs.is_empty()
                && matches!(f.state_mutability, StateMutability::View | StateMutability::Pure)
        });
        for function in getters {
            match self.call_function(reader, function, &[]).await {
                Ok(values) => {
                    let rendered = render_values(&values);
                    debug!(function = %function.name, value = %rendered, "read contract getter");
                    metadata.insert(function.name.clone(), rendered);
                }
                Err(err) => {
                    warn!(function = %function.name, %err, "skipping contract getter");
                }
            }
        }
        metadata
    }

    fn function(&self, name: &str, arity: usize) -> Result<&Function> {
        self.abi
            .function(name)
            .and_then(|overloads| overloads.iter().find(|f| f.inputs.len() == arity))
            .ok_or_else(|| {
                DashboardError::config(format!(
                    "abi has no function `{name}` taking {arity} arguments"
                ))
            })
    }

    async fn call_function<R>(
        &self,
        reader: &R,
        function: &Function,
        args: &[DynSolValue],
    ) -> Result<Vec<DynSolValue>>
    where
        R: ChainReader + ?Sized,
    {
        let input = function.abi_encode_input(args).map_err(|e| {
            DashboardError::config(format!("invalid arguments for `{}`: {e}", function.name))
        })?;
        let output = reader.call(self.address, input.into()).await?;
        function.abi_decode_output(&output, true).map_err(|e| {
            DashboardError::parse(format!("undecodable output from `{}`: {e}", function.name))
        })
    }
}

fn parse_address(address: &str) -> Result<Address> {
    let invalid = |reason: &str| {
        DashboardError::config(format!("invalid contract address `{address}`: {reason}"))
    };

    let digits = address
        .strip_prefix("0x")
        .ok_or_else(|| invalid("missing 0x prefix"))?;
    if digits.len() != 40 {
        return Err(invalid("expected 20 bytes"));
    }
    let mixed_case = digits.chars().any(|c| c.is_ascii_uppercase())
        && digits.chars().any(|c| c.is_ascii_lowercase());
    if mixed_case {
        Address::parse_checksummed(address, None).map_err(|e| invalid(&e.to_string()))
    } else {
        address.parse::<Address>().map_err(|e| invalid(&e.to_string()))
    }
}

fn render_values(values: &[DynSolValue]) -> String {
    match values {
        [single] => render_value(single),
        many => format!("({})", many.iter().map(render_value).collect::<Vec<_>>().join(", ")),
    }
}

fn render_value(value: &DynSolValue) -> String {
    match value {
        DynSolValue::Bool(b) => b.to_string(),
        DynSolValue::Int(i, _) => i.to_string(),
        DynSolValue::Uint(u, _) => u.to_string(),
        DynSolValue::Address(a) => a.to_checksum(None),
        DynSolValue::String(s) => s.clone(),
        DynSolValue::Bytes(b) => hex::encode_prefixed(b),
        DynSolValue::FixedBytes(word, size) => hex::encode_prefixed(&word[..*size]),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) => {
            format!("[{}]", items.iter().map(render_value).collect::<Vec<_>>().join(", "))
        }
        DynSolValue::Tuple(items) => render_values(items),
        other => format!("{other:?}"),
    }
}
