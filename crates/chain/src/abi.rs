//! ERC20 metadata getters and their return decoding.

use alloy::primitives::{Bytes, B256};
use alloy::sol_types::SolCall;

alloy::sol! {
    interface Erc20Metadata {
        function name() external view returns (string);
        function symbol() external view returns (string);
        function decimals() external view returns (uint8);
    }

    /// Early tokens return fixed `bytes32` names and symbols.
    interface LegacyErc20Metadata {
        function name() external view returns (bytes32);
        function symbol() external view returns (bytes32);
    }
}

use Erc20Metadata::{decimalsCall, nameCall, symbolCall};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringGetter {
    Name,
    Symbol,
}

impl StringGetter {
    pub fn calldata(self) -> Bytes {
        match self {
            Self::Name => nameCall {}.abi_encode().into(),
            Self::Symbol => symbolCall {}.abi_encode().into(),
        }
    }

    pub fn decode(self, data: &[u8]) -> Option<String> {
        // A dynamic string encodes to at least two words.
        if data.len() == 32 {
            return self.decode_legacy(data);
        }
        match self {
            Self::Name => nameCall::abi_decode_returns(data, true).ok().map(|ret| ret._0),
            Self::Symbol => symbolCall::abi_decode_returns(data, true).ok().map(|ret| ret._0),
        }
    }

    fn decode_legacy(self, data: &[u8]) -> Option<String> {
        let word = match self {
            Self::Name => LegacyErc20Metadata::nameCall::abi_decode_returns(data, true).ok()?._0,
            Self::Symbol => {
                LegacyErc20Metadata::symbolCall::abi_decode_returns(data, true).ok()?._0
            }
        };
        bytes32_string(word)
    }
}

pub fn decimals_calldata() -> Bytes {
    decimalsCall {}.abi_encode().into()
}

pub fn decode_decimals(data: &[u8]) -> Option<u8> {
    decimalsCall::abi_decode_returns(data, true)
        .ok()
        .map(|ret| ret._0)
}

fn bytes32_string(word: B256) -> Option<String> {
    let end = word.iter().position(|byte| *byte == 0).unwrap_or(word.len());
    if end == 0 {
        return None;
    }
    String::from_utf8(word[..end].to_vec()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_string(getter: StringGetter, value: &str) -> Vec<u8> {
        match getter {
            StringGetter::Name => nameCall::abi_encode_returns(&(value.to_string(),)),
            StringGetter::Symbol => symbolCall::abi_encode_returns(&(value.to_string(),)),
        }
    }

    #[test]
    fn selectors_match_erc20_getters() {
        assert_eq!(StringGetter::Name.calldata().as_ref(), &[0x06, 0xfd, 0xde, 0x03]);
        assert_eq!(StringGetter::Symbol.calldata().as_ref(), &[0x95, 0xd8, 0x9b, 0x41]);
        assert_eq!(decimals_calldata().as_ref(), &[0x31, 0x3c, 0xe5, 0x67]);
    }

    #[test]
    fn decodes_dynamic_string() {
        let data = encode_string(StringGetter::Name, "Foo Token");
        assert_eq!(StringGetter::Name.decode(&data).as_deref(), Some("Foo Token"));
        let data = encode_string(StringGetter::Symbol, "");
        assert_eq!(StringGetter::Symbol.decode(&data).as_deref(), Some(""));
    }

    #[test]
    fn decodes_legacy_bytes32_string() {
        let mut data = b"MKR".to_vec();
        data.resize(32, 0);
        assert_eq!(StringGetter::Symbol.decode(&data).as_deref(), Some("MKR"));
        assert_eq!(StringGetter::Symbol.decode(&[0u8; 32]), None);
    }

    #[test]
    fn rejects_truncated_strings() {
        assert_eq!(StringGetter::Name.decode(&[]), None);
        let mut data = encode_string(StringGetter::Name, "Foo Token");
        data.truncate(32 + 10);
        assert_eq!(StringGetter::Name.decode(&data), None);
    }

    #[test]
    fn decodes_uint8_word() {
        assert_eq!(decode_decimals(&decimalsCall::abi_encode_returns(&(18u8,))), Some(18));
        assert_eq!(decode_decimals(&[0u8; 8]), None);
    }
}
