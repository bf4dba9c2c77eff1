//! # Contract ABI Codec
//!
//! Just enough of the Solidity ABI for the IAM contract: `address`, `bool`,
//! `uintN` and `string` values, function selectors, call data, return data
//! and event logs.
//!
//! Signatures are written in their human-readable form:
//!
//! ```text
//! checkAccess(address) returns (bool)
//! AccessLogged(address indexed device,bool success,string reason,uint256 timestamp)
//! ```

use shared::{
    error::{IamError, IamResult},
    utils::{keccak256, to_checksum_address},
};

const WORD: usize = 32;

// =============================================================================
// TYPES AND VALUES
// =============================================================================

/// Supported ABI parameter kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbiType {
    Address,
    Bool,
    /// Any `uintN`; values are carried as `u128`
    Uint,
    String,
}

impl AbiType {
    fn is_dynamic(&self) -> bool {
        matches!(self, AbiType::String)
    }
}

/// A decoded or to-be-encoded ABI value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiValue {
    /// Checksummed `0x` address
    Address(String),
    Bool(bool),
    Uint(u128),
    String(String),
}

impl AbiValue {
    pub fn kind(&self) -> AbiType {
        match self {
            AbiValue::Address(_) => AbiType::Address,
            AbiValue::Bool(_) => AbiType::Bool,
            AbiValue::Uint(_) => AbiType::Uint,
            AbiValue::String(_) => AbiType::String,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AbiValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<u128> {
        match self {
            AbiValue::Uint(v) => Some(*v),
            _ => None,
        }
    }

    /// Text form of string and address values
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AbiValue::String(s) | AbiValue::Address(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// One declared parameter of a function or event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbiParam {
    /// Type exactly as it appears in the canonical signature
    pub canonical: String,
    pub kind: AbiType,
    pub name: Option<String>,
    pub indexed: bool,
}

// =============================================================================
// SIGNATURE PARSING
// =============================================================================

/// A resolved contract function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionEntry {
    pub name: String,
    pub inputs: Vec<AbiParam>,
    pub outputs: Vec<AbiParam>,
    /// First four bytes of the Keccak-256 of the canonical signature
    pub selector: [u8; 4],
}

impl FunctionEntry {
    /// Parse `name(types...)` with an optional ` returns (types...)` suffix
    pub fn parse(signature: &str) -> IamResult<Self> {
        let (head, returns) = match signature.split_once(" returns") {
            Some((head, rest)) => (head.trim(), Some(rest.trim())),
            None => (signature.trim(), None),
        };

        let (name, inputs) = split_call(head)?;
        let inputs = parse_params(inputs, false)?;
        let outputs = match returns {
            Some(rest) => {
                let inner = rest
                    .strip_prefix('(')
                    .and_then(|r| r.strip_suffix(')'))
                    .ok_or_else(|| IamError::Abi(format!("malformed returns clause in '{signature}'")))?;
                parse_params(inner, false)?
            }
            None => Vec::new(),
        };

        let canonical = canonical_signature(name, &inputs);
        let hash = keccak256(canonical.as_bytes());
        let mut selector = [0u8; 4];
        selector.copy_from_slice(&hash[..4]);

        Ok(Self {
            name: name.to_string(),
            inputs,
            outputs,
            selector,
        })
    }

    pub fn canonical_signature(&self) -> String {
        canonical_signature(&self.name, &self.inputs)
    }

    pub fn input_kinds(&self) -> Vec<AbiType> {
        self.inputs.iter().map(|p| p.kind).collect()
    }

    /// Selector followed by the encoded arguments
    pub fn encode_call(&self, args: &[AbiValue]) -> IamResult<Vec<u8>> {
        let mut data = self.selector.to_vec();
        data.extend(encode(&self.inputs, args)?);
        Ok(data)
    }

    /// Decode return data according to the declared outputs
    pub fn decode_output(&self, data: &[u8]) -> IamResult<Vec<AbiValue>> {
        let kinds: Vec<AbiType> = self.outputs.iter().map(|p| p.kind).collect();
        decode(&kinds, data)
    }
}

/// A resolved contract event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventEntry {
    pub name: String,
    pub params: Vec<AbiParam>,
    /// Keccak-256 of the canonical signature (`topics[0]`)
    pub topic: [u8; 32],
}

impl EventEntry {
    /// Parse `Name(type [indexed] [name],...)`
    pub fn parse(signature: &str) -> IamResult<Self> {
        let (name, params) = split_call(signature.trim())?;
        let params = parse_params(params, true)?;
        let topic = keccak256(canonical_signature(name, &params).as_bytes());
        Ok(Self {
            name: name.to_string(),
            params,
            topic,
        })
    }

    pub fn canonical_signature(&self) -> String {
        canonical_signature(&self.name, &self.params)
    }

    pub fn topic_hex(&self) -> String {
        format!("0x{}", hex::encode(self.topic))
    }

    /// Decode one log into values ordered like the declared parameters
    ///
    /// Indexed parameters come from `topics[1..]`, the rest from `data`.
    /// Indexed strings are stored on-chain as hashes and decode to the
    /// hex topic.
    pub fn decode_log(&self, topics: &[[u8; 32]], data: &[u8]) -> IamResult<Vec<AbiValue>> {
        match topics.first() {
            Some(t0) if *t0 == self.topic => {}
            _ => return Err(IamError::Abi(format!("log is not a {} event", self.name))),
        }

        let data_kinds: Vec<AbiType> = self
            .params
            .iter()
            .filter(|p| !p.indexed)
            .map(|p| p.kind)
            .collect();
        let mut data_values = decode(&data_kinds, data)?.into_iter();
        let mut indexed_topics = topics[1..].iter();

        self.params
            .iter()
            .map(|param| {
                if param.indexed {
                    let topic = indexed_topics.next().ok_or_else(|| {
                        IamError::Abi(format!("{} log is missing an indexed topic", self.name))
                    })?;
                    if param.kind.is_dynamic() {
                        Ok(AbiValue::String(format!("0x{}", hex::encode(topic))))
                    } else {
                        decode_static(param.kind, topic)
                    }
                } else {
                    data_values
                        .next()
                        .ok_or_else(|| IamError::Abi(format!("{} log data is too short", self.name)))
                }
            })
            .collect()
    }
}

fn split_call(signature: &str) -> IamResult<(&str, &str)> {
    let open = signature
        .find('(')
        .ok_or_else(|| IamError::Abi(format!("missing '(' in '{signature}'")))?;
    let inner = signature[open + 1..]
        .strip_suffix(')')
        .ok_or_else(|| IamError::Abi(format!("missing ')' in '{signature}'")))?;
    let name = signature[..open].trim();
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(IamError::Abi(format!("invalid name in '{signature}'")));
    }
    Ok((name, inner))
}

fn parse_params(list: &str, allow_indexed: bool) -> IamResult<Vec<AbiParam>> {
    if list.trim().is_empty() {
        return Ok(Vec::new());
    }

    list.split(',')
        .map(|raw| {
            let mut tokens = raw.split_whitespace();
            let ty = tokens
                .next()
                .ok_or_else(|| IamError::Abi(format!("empty parameter in '({list})'")))?;
            let (canonical, kind) = parse_type(ty)?;

            let mut indexed = false;
            let mut name = None;
            for token in tokens {
                match token {
                    "indexed" if allow_indexed => indexed = true,
                    "memory" | "calldata" => {}
                    other if name.is_none() => name = Some(other.to_string()),
                    other => {
                        return Err(IamError::Abi(format!("unexpected token '{other}' in '{raw}'")))
                    }
                }
            }

            Ok(AbiParam {
                canonical,
                kind,
                name,
                indexed,
            })
        })
        .collect()
}

fn parse_type(ty: &str) -> IamResult<(String, AbiType)> {
    match ty {
        "address" => Ok((ty.into(), AbiType::Address)),
        "bool" => Ok((ty.into(), AbiType::Bool)),
        "string" => Ok((ty.into(), AbiType::String)),
        "uint" => Ok(("uint256".into(), AbiType::Uint)),
        _ => {
            let bits = ty
                .strip_prefix("uint")
                .and_then(|b| b.parse::<u32>().ok())
                .filter(|b| *b > 0 && *b <= 256 && b % 8 == 0)
                .ok_or_else(|| IamError::Abi(format!("unsupported type '{ty}'")))?;
            Ok((format!("uint{bits}"), AbiType::Uint))
        }
    }
}

fn canonical_signature(name: &str, params: &[AbiParam]) -> String {
    let types: Vec<&str> = params.iter().map(|p| p.canonical.as_str()).collect();
    format!("{}({})", name, types.join(","))
}

// =============================================================================
// ENCODING
// =============================================================================

/// Head/tail encode `values` against the declared parameters
pub fn encode(params: &[AbiParam], values: &[AbiValue]) -> IamResult<Vec<u8>> {
    if params.len() != values.len() {
        return Err(IamError::Abi(format!(
            "expected {} arguments, got {}",
            params.len(),
            values.len()
        )));
    }

    let head_len = params.len() * WORD;
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for (param, value) in params.iter().zip(values) {
        if param.kind != value.kind() {
            return Err(IamError::Abi(format!(
                "argument type mismatch: expected {}, got {:?}",
                param.canonical,
                value.kind()
            )));
        }

        match value {
            AbiValue::String(s) => {
                head.extend(uint_word((head_len + tail.len()) as u128));
                tail.extend(uint_word(s.len() as u128));
                tail.extend(s.as_bytes());
                let pad = (WORD - s.len() % WORD) % WORD;
                tail.extend(std::iter::repeat(0u8).take(pad));
            }
            AbiValue::Address(a) => head.extend(address_word(a)?),
            AbiValue::Bool(b) => head.extend(uint_word(u128::from(*b))),
            AbiValue::Uint(v) => head.extend(uint_word(*v)),
        }
    }

    head.extend(tail);
    Ok(head)
}

fn uint_word(value: u128) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

fn address_word(address: &str) -> IamResult<[u8; WORD]> {
    let canonical = to_checksum_address(address)?;
    let bytes = hex::decode(&canonical[2..])?;
    let mut word = [0u8; WORD];
    word[12..].copy_from_slice(&bytes);
    Ok(word)
}

// =============================================================================
// DECODING
// =============================================================================

/// Decode a tuple of `kinds` from ABI-encoded `data`
pub fn decode(kinds: &[AbiType], data: &[u8]) -> IamResult<Vec<AbiValue>> {
    kinds
        .iter()
        .enumerate()
        .map(|(i, kind)| {
            let word = read_word(data, i * WORD)?;
            if kind.is_dynamic() {
                let offset = word_to_usize(word)?;
                let len = word_to_usize(read_word(data, offset)?)?;
                let start = offset + WORD;
                let bytes = start
                    .checked_add(len)
                    .and_then(|end| data.get(start..end))
                    .ok_or_else(|| IamError::Abi("string runs past end of data".into()))?;
                let text = String::from_utf8(bytes.to_vec())
                    .map_err(|e| IamError::Abi(format!("string is not UTF-8: {e}")))?;
                Ok(AbiValue::String(text))
            } else {
                decode_static(*kind, word)
            }
        })
        .collect()
}

fn decode_static(kind: AbiType, word: &[u8; WORD]) -> IamResult<AbiValue> {
    match kind {
        AbiType::Address => {
            if word[..12].iter().any(|b| *b != 0) {
                return Err(IamError::Abi("address word has dirty high bytes".into()));
            }
            let address = to_checksum_address(&format!("0x{}", hex::encode(&word[12..])))?;
            Ok(AbiValue::Address(address))
        }
        AbiType::Bool => match word_to_u128(word)? {
            0 => Ok(AbiValue::Bool(false)),
            1 => Ok(AbiValue::Bool(true)),
            other => Err(IamError::Abi(format!("invalid bool word {other}"))),
        },
        AbiType::Uint => Ok(AbiValue::Uint(word_to_u128(word)?)),
        AbiType::String => Err(IamError::Abi("string is not a static type".into())),
    }
}

fn read_word(data: &[u8], offset: usize) -> IamResult<&[u8; WORD]> {
    offset
        .checked_add(WORD)
        .and_then(|end| data.get(offset..end))
        .and_then(|slice| slice.try_into().ok())
        .ok_or_else(|| IamError::Abi(format!("data too short for word at offset {offset}")))
}

fn word_to_u128(word: &[u8; WORD]) -> IamResult<u128> {
    if word[..16].iter().any(|b| *b != 0) {
        return Err(IamError::Abi("uint value exceeds 128 bits".into()));
    }
    let mut low = [0u8; 16];
    low.copy_from_slice(&word[16..]);
    Ok(u128::from_be_bytes(low))
}

fn word_to_usize(word: &[u8; WORD]) -> IamResult<usize> {
    usize::try_from(word_to_u128(word)?).map_err(|_| IamError::Abi("offset out of range".into()))
}

/// Parse `0x`-prefixed hex into bytes
pub fn decode_hex(data: &str) -> IamResult<Vec<u8>> {
    let stripped = data.strip_prefix("0x").unwrap_or(data);
    Ok(hex::decode(stripped)?)
}

/// Parse a `0x`-prefixed 32-byte hex topic
pub fn decode_topic(topic: &str) -> IamResult<[u8; 32]> {
    decode_hex(topic)?
        .try_into()
        .map_err(|_| IamError::Abi(format!("topic '{topic}' is not 32 bytes")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

    #[test]
    fn test_known_selector() {
        // transfer(address,uint256) -> a9059cbb
        let f = FunctionEntry::parse("transfer(address,uint256)").unwrap();
        assert_eq!(hex::encode(f.selector), "a9059cbb");
    }

    #[test]
    fn test_known_event_topic() {
        let e = EventEntry::parse("Transfer(address indexed from,address indexed to,uint256 value)")
            .unwrap();
        assert_eq!(e.canonical_signature(), "Transfer(address,address,uint256)");
        assert_eq!(
            e.topic_hex(),
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
    }

    #[test]
    fn test_parse_returns_clause() {
        let f = FunctionEntry::parse("getDevice(address) returns (string,string,string,uint256,bool)")
            .unwrap();
        assert_eq!(f.name, "getDevice");
        assert_eq!(f.input_kinds(), vec![AbiType::Address]);
        assert_eq!(f.outputs.len(), 5);
        assert_eq!(f.canonical_signature(), "getDevice(address)");
    }

    #[test]
    fn test_parse_rejects_unsupported_types() {
        assert!(FunctionEntry::parse("foo(bytes32)").is_err());
        assert!(FunctionEntry::parse("foo(address").is_err());
        assert!(FunctionEntry::parse("(address)").is_err());
    }

    #[test]
    fn test_encode_static_and_dynamic() {
        let f = FunctionEntry::parse("assignRole(address,string)").unwrap();
        let data = f
            .encode_call(&[AbiValue::Address(ALICE.into()), AbiValue::String("gateway".into())])
            .unwrap();

        // selector + 2 head words + length word + one padded data word
        assert_eq!(data.len(), 4 + 4 * WORD);
        let body = &data[4..];
        assert_eq!(&body[12..32], &hex::decode(&ALICE[2..].to_lowercase()).unwrap()[..]);
        assert_eq!(body[63], 0x40);
        assert_eq!(body[95], 7);
        assert_eq!(&body[96..103], b"gateway");
        assert!(body[103..128].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_encode_rejects_wrong_arguments() {
        let f = FunctionEntry::parse("revokeAccess(address)").unwrap();
        assert!(f.encode_call(&[]).is_err());
        assert!(f.encode_call(&[AbiValue::Bool(true)]).is_err());
        assert!(f.encode_call(&[AbiValue::Address("0x12".into())]).is_err());
    }

    #[test]
    fn test_decode_device_tuple() {
        let params: Vec<AbiParam> = parse_params("string,string,string,uint256,bool", false).unwrap();
        let values = vec![
            AbiValue::String("thermo".into()),
            AbiValue::String("sensor".into()),
            AbiValue::String(String::new()),
            AbiValue::Uint(1_700_000_000),
            AbiValue::Bool(true),
        ];
        let encoded = encode(&params, &values).unwrap();
        let kinds: Vec<AbiType> = params.iter().map(|p| p.kind).collect();
        assert_eq!(decode(&kinds, &encoded).unwrap(), values);
    }

    #[test]
    fn test_decode_truncated_data_fails() {
        assert!(decode(&[AbiType::Bool], &[0u8; 16]).is_err());
        let mut bad_offset = [0u8; WORD];
        bad_offset[31] = 0xff;
        assert!(decode(&[AbiType::String], &bad_offset).is_err());
    }

    #[test]
    fn test_decode_log_with_indexed_address() {
        let event = EventEntry::parse(
            "AccessLogged(address indexed device,bool success,string reason,uint256 timestamp)",
        )
        .unwrap();

        let non_indexed: Vec<AbiParam> = event.params.iter().filter(|p| !p.indexed).cloned().collect();
        let data = encode(
            &non_indexed,
            &[
                AbiValue::Bool(true),
                AbiValue::String("door".into()),
                AbiValue::Uint(42),
            ],
        )
        .unwrap();
        let topics = [event.topic, address_word(ALICE).unwrap()];

        let values = event.decode_log(&topics, &data).unwrap();
        assert_eq!(values[0], AbiValue::Address(ALICE.into()));
        assert_eq!(values[1], AbiValue::Bool(true));
        assert_eq!(values[2], AbiValue::String("door".into()));
        assert_eq!(values[3], AbiValue::Uint(42));
    }

    #[test]
    fn test_decode_log_rejects_other_event() {
        let event = EventEntry::parse("AccessLogged(address,bool,string,uint256)").unwrap();
        assert!(event.decode_log(&[[0u8; 32]], &[]).is_err());
        assert!(event.decode_log(&[], &[]).is_err());
    }
}
