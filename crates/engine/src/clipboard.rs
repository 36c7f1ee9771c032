//! Paste instruction codec.
//!
//! A clipboard tells the remote interpreter to copy a 32-byte word out of an
//! earlier call's return data and paste it into the arguments of the current
//! call before executing it. The layout is fixed by the interpreter:
//!
//! ```text
//! header  = [kind: 0 | 1 | 2, has_value: 0 | 1]
//! static  = (bytes2 header)                           [, uint256 value]
//! single  = (bytes32 header ‖ source ‖ copy ‖ paste)  [, uint256 value]
//! multi   = (bytes2 header, bytes32[] 0x0000 ‖ ...)   [, uint256 value]
//! ```
//!
//! The three instruction fields are 80-bit unsigned integers. Every shape is
//! ABI encoded as a parameter list, so the header is always the first two
//! bytes of the encoding.

use alloy_primitives::{Bytes, FixedBytes, U256};
use alloy_sol_types::SolValue;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Largest value an instruction field can hold.
pub const MAX_U80: u128 = (1u128 << 80) - 1;

/// Bytes occupied by one instruction field inside a packed word.
const FIELD_WIDTH: usize = 10;

/// Return data is a tuple whose first word is a length prefix.
const RETURN_DATA_OFFSET: u128 = 32;

/// Arguments are preceded by a selector and a length prefix.
const ARGUMENTS_OFFSET: u128 = 4 + 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClipboardError {
    #[error("{field} {value} does not fit in 80 bits")]
    OffsetOverflow { field: &'static str, value: u128 },

    #[error("unsupported paste instruction shape: {0}")]
    UnsupportedShape(String),

    #[error("malformed clipboard: {0}")]
    Malformed(String),
}

/// Which of the three layouts a clipboard uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ClipboardKind {
    Static = 0,
    Single = 1,
    Multi = 2,
}

impl TryFrom<u8> for ClipboardKind {
    type Error = ClipboardError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Static),
            1 => Ok(Self::Single),
            2 => Ok(Self::Multi),
            other => Err(ClipboardError::Malformed(format!("unknown clipboard type {other}"))),
        }
    }
}

/// Copy one word of a previous call's return data into the current call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PasteInstruction {
    /// Position of the source call in the emitted sequence.
    pub source_call_index: u128,
    /// Byte offset into the source call's return data.
    pub copy_byte_offset: u128,
    /// Byte offset into the current call's argument buffer.
    pub paste_byte_offset: u128,
}

impl PasteInstruction {
    pub const fn new(source_call_index: u128, copy_byte_offset: u128, paste_byte_offset: u128) -> Self {
        Self {
            source_call_index,
            copy_byte_offset,
            paste_byte_offset,
        }
    }

    /// Builds an instruction from word indices instead of raw byte offsets.
    ///
    /// `copy_word` counts 32-byte words after the return data length prefix.
    /// `paste_word` counts words after the selector and the argument length
    /// prefix.
    pub fn slot(source_call_index: u128, copy_word: u128, paste_word: u128) -> Result<Self, ClipboardError> {
        let to_offset = |field: &'static str, base: u128, word: u128| {
            word.checked_mul(32)
                .and_then(|bytes| bytes.checked_add(base))
                .ok_or(ClipboardError::OffsetOverflow { field, value: word })
        };
        let instruction = Self::new(
            source_call_index,
            to_offset("copy word", RETURN_DATA_OFFSET, copy_word)?,
            to_offset("paste word", ARGUMENTS_OFFSET, paste_word)?,
        );
        instruction.validate()?;
        Ok(instruction)
    }

    fn fields(&self) -> [(&'static str, u128); 3] {
        [
            ("source call index", self.source_call_index),
            ("copy byte offset", self.copy_byte_offset),
            ("paste byte offset", self.paste_byte_offset),
        ]
    }

    pub fn validate(&self) -> Result<(), ClipboardError> {
        for (field, value) in self.fields() {
            if value > MAX_U80 {
                return Err(ClipboardError::OffsetOverflow { field, value });
            }
        }
        Ok(())
    }

    /// Packs the instruction behind a two-byte prefix into one 32-byte word.
    pub fn pack(&self, prefix: [u8; 2]) -> Result<FixedBytes<32>, ClipboardError> {
        self.validate()?;
        Ok(self.pack_validated(prefix))
    }

    /// Packs an instruction already known to fit in 80-bit fields.
    fn pack_validated(&self, prefix: [u8; 2]) -> FixedBytes<32> {
        let mut word = [0u8; 32];
        word[..2].copy_from_slice(&prefix);
        for (position, (_, value)) in self.fields().into_iter().enumerate() {
            let start = 2 + position * FIELD_WIDTH;
            word[start..start + FIELD_WIDTH].copy_from_slice(&value.to_be_bytes()[16 - FIELD_WIDTH..]);
        }
        FixedBytes::from(word)
    }

    /// Splits a packed word back into its prefix and instruction.
    pub fn unpack(word: &FixedBytes<32>) -> ([u8; 2], Self) {
        let field = |position: usize| {
            let start = 2 + position * FIELD_WIDTH;
            let mut buffer = [0u8; 16];
            buffer[16 - FIELD_WIDTH..].copy_from_slice(&word[start..start + FIELD_WIDTH]);
            u128::from_be_bytes(buffer)
        };
        ([word[0], word[1]], Self::new(field(0), field(1), field(2)))
    }
}

impl From<[u128; 3]> for PasteInstruction {
    fn from([source, copy, paste]: [u128; 3]) -> Self {
        Self::new(source, copy, paste)
    }
}

/// The instruction list a caller hands to the codec.
///
/// The clipboard kind is derived from this shape: no instructions is static,
/// one flat instruction is single, and a nested list is multi.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PasteParams {
    #[default]
    Empty,
    Flat(PasteInstruction),
    Nested(Vec<PasteInstruction>),
}

impl PasteParams {
    pub fn kind(&self) -> ClipboardKind {
        match self {
            Self::Empty => ClipboardKind::Static,
            Self::Nested(list) if list.is_empty() => ClipboardKind::Static,
            Self::Flat(_) => ClipboardKind::Single,
            Self::Nested(_) => ClipboardKind::Multi,
        }
    }

    /// Reads the JSON forms `[]`, `[a, b, c]` and `[[a, b, c], ...]`.
    ///
    /// Fields may be JSON numbers or decimal / `0x` hex strings.
    pub fn from_json(value: &Value) -> Result<Self, ClipboardError> {
        let unsupported = || ClipboardError::UnsupportedShape(value.to_string());
        let items = value.as_array().ok_or_else(unsupported)?;
        match items.first() {
            None => Ok(Self::Empty),
            Some(Value::Array(_)) => items
                .iter()
                .map(|item| instruction_from_json(item).ok_or_else(unsupported))
                .collect::<Result<Vec<_>, _>>()
                .map(Self::Nested),
            Some(_) => instruction_from_json(value).map(Self::Flat).ok_or_else(unsupported),
        }
    }
}

fn instruction_from_json(value: &Value) -> Option<PasteInstruction> {
    let fields = value.as_array()?;
    if fields.len() != 3 {
        return None;
    }
    let field = |value: &Value| match value {
        Value::Number(number) => number.as_u64().map(u128::from),
        Value::String(text) => match text.strip_prefix("0x") {
            Some(hex) => u128::from_str_radix(hex, 16).ok(),
            None => text.parse().ok(),
        },
        _ => None,
    };
    Some(PasteInstruction::new(field(&fields[0])?, field(&fields[1])?, field(&fields[2])?))
}

impl From<PasteInstruction> for PasteParams {
    fn from(instruction: PasteInstruction) -> Self {
        Self::Flat(instruction)
    }
}

impl From<[u128; 3]> for PasteParams {
    fn from(fields: [u128; 3]) -> Self {
        Self::Flat(fields.into())
    }
}

impl From<Vec<PasteInstruction>> for PasteParams {
    fn from(list: Vec<PasteInstruction>) -> Self {
        Self::Nested(list)
    }
}

impl From<Vec<[u128; 3]>> for PasteParams {
    fn from(list: Vec<[u128; 3]>) -> Self {
        Self::Nested(list.into_iter().map(PasteInstruction::from).collect())
    }
}

/// Instructions in the layout they are encoded with.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Layout {
    Static,
    Single(PasteInstruction),
    Multi(Vec<PasteInstruction>),
}

/// A validated clipboard, ready to be encoded.
///
/// The kind always follows from the instruction shape and every field fits
/// in 80 bits, including for clipboards read back through serde.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "ClipboardFields", try_from = "ClipboardFields")]
pub struct Clipboard {
    layout: Layout,
    value: U256,
}

/// Serialized form of a [`Clipboard`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ClipboardFields {
    kind: ClipboardKind,
    instructions: Vec<PasteInstruction>,
    #[serde(default)]
    value: U256,
}

impl From<Clipboard> for ClipboardFields {
    fn from(clipboard: Clipboard) -> Self {
        Self {
            kind: clipboard.kind(),
            instructions: clipboard.instructions().to_vec(),
            value: clipboard.value,
        }
    }
}

impl TryFrom<ClipboardFields> for Clipboard {
    type Error = ClipboardError;

    fn try_from(fields: ClipboardFields) -> Result<Self, Self::Error> {
        let ClipboardFields {
            kind,
            mut instructions,
            value,
        } = fields;
        let params = match (kind, instructions.len()) {
            (ClipboardKind::Static, 0) => PasteParams::Empty,
            (ClipboardKind::Single, 1) => PasteParams::Flat(instructions.remove(0)),
            (ClipboardKind::Multi, count) if count > 0 => PasteParams::Nested(instructions),
            (kind, count) => {
                return Err(ClipboardError::Malformed(format!(
                    "a {kind:?} clipboard cannot hold {count} instructions"
                )));
            }
        };
        Self::new(params, value)
    }
}

impl Clipboard {
    pub fn new(params: impl Into<PasteParams>, value: U256) -> Result<Self, ClipboardError> {
        let layout = match params.into() {
            PasteParams::Empty => Layout::Static,
            PasteParams::Nested(list) if list.is_empty() => Layout::Static,
            PasteParams::Flat(instruction) => {
                instruction.validate()?;
                Layout::Single(instruction)
            }
            PasteParams::Nested(list) => {
                for instruction in &list {
                    instruction.validate()?;
                }
                Layout::Multi(list)
            }
        };
        Ok(Self { layout, value })
    }

    /// Encodes `params` with an optional value forwarded alongside the call.
    pub fn encode(params: impl Into<PasteParams>, value: U256) -> Result<Bytes, ClipboardError> {
        Ok(Self::new(params, value)?.to_bytes())
    }

    /// Encodes a single instruction addressed by word indices.
    pub fn encode_slot(source_call_index: u128, copy_word: u128, paste_word: u128, value: U256) -> Result<Bytes, ClipboardError> {
        Self::encode(PasteInstruction::slot(source_call_index, copy_word, paste_word)?, value)
    }

    /// The static clipboard with no value: "execute this call as is".
    pub fn empty() -> Bytes {
        Self {
            layout: Layout::Static,
            value: U256::ZERO,
        }
        .to_bytes()
    }

    pub fn kind(&self) -> ClipboardKind {
        match self.layout {
            Layout::Static => ClipboardKind::Static,
            Layout::Single(_) => ClipboardKind::Single,
            Layout::Multi(_) => ClipboardKind::Multi,
        }
    }

    pub fn instructions(&self) -> &[PasteInstruction] {
        match &self.layout {
            Layout::Static => &[],
            Layout::Single(instruction) => std::slice::from_ref(instruction),
            Layout::Multi(list) => list,
        }
    }

    pub fn value(&self) -> U256 {
        self.value
    }

    pub fn header(&self) -> [u8; 2] {
        [self.kind() as u8, u8::from(!self.value.is_zero())]
    }

    pub fn to_bytes(&self) -> Bytes {
        let header = self.header();
        let header_field = FixedBytes::<2>::from(header);
        let with_value = !self.value.is_zero();

        let encoded = match &self.layout {
            Layout::Static if with_value => (header_field, self.value).abi_encode_params(),
            Layout::Static => (header_field,).abi_encode_params(),
            Layout::Single(instruction) => {
                let packed = instruction.pack_validated(header);
                if with_value {
                    (packed, self.value).abi_encode_params()
                } else {
                    (packed,).abi_encode_params()
                }
            }
            Layout::Multi(list) => {
                let packed: Vec<FixedBytes<32>> = list.iter().map(|instruction| instruction.pack_validated([0, 0])).collect();
                if with_value {
                    (header_field, packed, self.value).abi_encode_params()
                } else {
                    (header_field, packed).abi_encode_params()
                }
            }
        };
        Bytes::from(encoded)
    }

    /// Reads `(kind, has_value)` from the first two bytes of an encoding.
    pub fn decode_header(data: &[u8]) -> Result<(ClipboardKind, bool), ClipboardError> {
        if data.len() < 32 {
            return Err(ClipboardError::Malformed(format!("expected at least 32 bytes, got {}", data.len())));
        }
        let kind = ClipboardKind::try_from(data[0])?;
        let has_value = match data[1] {
            0 => false,
            1 => true,
            other => return Err(ClipboardError::Malformed(format!("invalid value flag {other}"))),
        };
        Ok((kind, has_value))
    }

    pub fn decode(data: &[u8]) -> Result<Self, ClipboardError> {
        let (kind, has_value) = Self::decode_header(data)?;
        let malformed = |error: alloy_sol_types::Error| ClipboardError::Malformed(error.to_string());

        let (layout, value) = match (kind, has_value) {
            (ClipboardKind::Static, false) => {
                <(FixedBytes<2>,)>::abi_decode_params(data).map_err(malformed)?;
                (Layout::Static, U256::ZERO)
            }
            (ClipboardKind::Static, true) => {
                let (_, value) = <(FixedBytes<2>, U256)>::abi_decode_params(data).map_err(malformed)?;
                (Layout::Static, value)
            }
            (ClipboardKind::Single, false) => {
                let (word,) = <(FixedBytes<32>,)>::abi_decode_params(data).map_err(malformed)?;
                (Layout::Single(PasteInstruction::unpack(&word).1), U256::ZERO)
            }
            (ClipboardKind::Single, true) => {
                let (word, value) = <(FixedBytes<32>, U256)>::abi_decode_params(data).map_err(malformed)?;
                (Layout::Single(PasteInstruction::unpack(&word).1), value)
            }
            (ClipboardKind::Multi, false) => {
                let (_, words) = <(FixedBytes<2>, Vec<FixedBytes<32>>)>::abi_decode_params(data).map_err(malformed)?;
                (Layout::Multi(unpack_all(&words)?), U256::ZERO)
            }
            (ClipboardKind::Multi, true) => {
                let (_, words, value) = <(FixedBytes<2>, Vec<FixedBytes<32>>, U256)>::abi_decode_params(data).map_err(malformed)?;
                (Layout::Multi(unpack_all(&words)?), value)
            }
        };

        if has_value && value.is_zero() {
            return Err(ClipboardError::Malformed("value flag set but value is zero".into()));
        }
        if matches!(&layout, Layout::Multi(list) if list.is_empty()) {
            return Err(ClipboardError::Malformed("multi clipboard without instructions".into()));
        }
        Ok(Self { layout, value })
    }
}

fn unpack_all(words: &[FixedBytes<32>]) -> Result<Vec<PasteInstruction>, ClipboardError> {
    words
        .iter()
        .map(|word| match PasteInstruction::unpack(word) {
            ([0, 0], instruction) => Ok(instruction),
            (prefix, _) => Err(ClipboardError::Malformed(format!(
                "multi instruction carries prefix 0x{:02x}{:02x}",
                prefix[0], prefix[1]
            ))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::hex;
    use serde_json::json;

    const PACKED_4_32_100: &str = "0000000000000000000000040000000000000000002000000000000000000064";

    fn word(data: &[u8], index: usize) -> &[u8] {
        &data[index * 32..(index + 1) * 32]
    }

    #[test]
    fn static_without_value_is_one_header_word() {
        let encoded = Clipboard::encode(PasteParams::Empty, U256::ZERO).expect("encode");
        assert_eq!(encoded.len(), 32);
        assert!(encoded.iter().all(|byte| *byte == 0));
        assert_eq!(encoded, Clipboard::empty());
    }

    #[test]
    fn static_with_value_appends_uint256() {
        let encoded = Clipboard::encode(PasteParams::Empty, U256::from(10)).expect("encode");
        assert_eq!(encoded.len(), 64);
        assert_eq!(&encoded[..2], &[0x00, 0x01]);
        assert_eq!(U256::from_be_slice(word(&encoded, 1)), U256::from(10));
    }

    #[test]
    fn single_packs_header_into_the_word() {
        let encoded = Clipboard::encode([4, 32, 100], U256::ZERO).expect("encode");
        let expected = PasteInstruction::new(4, 32, 100).pack([0x01, 0x00]).expect("pack");
        assert_eq!(encoded.as_ref(), expected.as_slice());
        assert_eq!(hex::encode(&encoded[2..]), &PACKED_4_32_100[4..]);

        let with_value = Clipboard::encode([4, 32, 100], U256::from(10)).expect("encode");
        assert_eq!(&with_value[..2], &[0x01, 0x01]);
        assert_eq!(&with_value[2..32], &encoded[2..32]);
        assert_eq!(U256::from_be_slice(word(&with_value, 1)), U256::from(10));
    }

    #[test]
    fn multi_keeps_header_out_of_elements() {
        let encoded = Clipboard::encode(vec![[4, 32, 100]], U256::ZERO).expect("encode");
        assert_eq!(encoded.len(), 4 * 32);
        assert_eq!(&encoded[..2], &[0x02, 0x00]);
        assert_eq!(U256::from_be_slice(word(&encoded, 1)), U256::from(64));
        assert_eq!(U256::from_be_slice(word(&encoded, 2)), U256::from(1));
        assert_eq!(hex::encode(word(&encoded, 3)), PACKED_4_32_100);
    }

    #[test]
    fn multi_with_value_puts_value_last() {
        let encoded = Clipboard::encode(vec![[4, 32, 100], [5, 64, 132]], U256::from(7)).expect("encode");
        assert_eq!(&encoded[..2], &[0x02, 0x01]);
        // header, array offset, value, then the array itself
        assert_eq!(U256::from_be_slice(word(&encoded, 2)), U256::from(7));
        assert_eq!(U256::from_be_slice(word(&encoded, 3)), U256::from(2));
    }

    #[test]
    fn slot_translates_words_to_byte_offsets() {
        assert_eq!(
            Clipboard::encode([4, 32, 100], U256::ZERO).expect("encode"),
            Clipboard::encode_slot(4, 0, 2, U256::ZERO).expect("encode slot")
        );
        assert_eq!(PasteInstruction::slot(3, 0, 1).expect("slot"), PasteInstruction::new(3, 32, 68));
    }

    #[test]
    fn header_survives_every_shape() {
        let cases: Vec<(PasteParams, U256, ClipboardKind)> = vec![
            (PasteParams::Empty, U256::ZERO, ClipboardKind::Static),
            (PasteParams::Empty, U256::from(1), ClipboardKind::Static),
            ([1, 2, 3].into(), U256::ZERO, ClipboardKind::Single),
            ([1, 2, 3].into(), U256::from(99), ClipboardKind::Single),
            (vec![[1, 2, 3], [4, 5, 6]].into(), U256::ZERO, ClipboardKind::Multi),
            (vec![[1, 2, 3]].into(), U256::MAX, ClipboardKind::Multi),
        ];
        for (params, value, kind) in cases {
            let encoded = Clipboard::encode(params, value).expect("encode");
            assert_eq!(Clipboard::decode_header(&encoded).expect("header"), (kind, !value.is_zero()));
        }
    }

    #[test]
    fn decode_recovers_instructions_and_value() {
        let clipboard = Clipboard::new(vec![[0, 32, 36], [MAX_U80, 0, 1]], U256::from(5)).expect("clipboard");
        assert_eq!(Clipboard::decode(&clipboard.to_bytes()).expect("decode"), clipboard);

        let single = Clipboard::new([2, 64, 100], U256::ZERO).expect("clipboard");
        assert_eq!(Clipboard::decode(&single.to_bytes()).expect("decode"), single);
    }

    #[test]
    fn empty_nested_list_is_static() {
        let params = PasteParams::Nested(Vec::new());
        assert_eq!(params.kind(), ClipboardKind::Static);
        assert_eq!(Clipboard::encode(params, U256::ZERO).expect("encode"), Clipboard::empty());
    }

    #[test]
    fn rejects_fields_wider_than_80_bits() {
        let err = Clipboard::encode([MAX_U80 + 1, 0, 0], U256::ZERO).expect_err("overflow");
        assert!(matches!(err, ClipboardError::OffsetOverflow { field: "source call index", .. }));
        assert!(PasteInstruction::slot(0, u128::MAX, 0).is_err());
    }

    #[test]
    fn json_shape_selects_kind() {
        assert_eq!(PasteParams::from_json(&json!([])).expect("empty"), PasteParams::Empty);
        assert_eq!(
            PasteParams::from_json(&json!([4, "32", "0x64"])).expect("flat"),
            PasteParams::Flat(PasteInstruction::new(4, 32, 100))
        );
        assert_eq!(
            PasteParams::from_json(&json!([[4, 32, 100], [1, 2, 3]])).expect("nested").kind(),
            ClipboardKind::Multi
        );
    }

    #[test]
    fn json_rejects_other_shapes() {
        for value in [json!({"a": 1}), json!([1, 2]), json!([[1, 2, 3], 4]), json!([1, [2], 3]), json!("0x00")] {
            assert!(
                matches!(PasteParams::from_json(&value), Err(ClipboardError::UnsupportedShape(_))),
                "{value} should be rejected"
            );
        }
    }

    #[test]
    fn deserialize_validates_kind_and_fields() {
        let clipboard = Clipboard::new(vec![[0, 32, 36], [1, 64, 68]], U256::from(3)).expect("clipboard");
        let json = serde_json::to_value(&clipboard).expect("serialize");
        assert_eq!(json["kind"], "multi");
        assert_eq!(serde_json::from_value::<Clipboard>(json).expect("deserialize"), clipboard);

        let instruction = r#"{ "source_call_index": 0, "copy_byte_offset": 32, "paste_byte_offset": 36 }"#;
        let too_wide = r#"{ "source_call_index": 1208925819614629174706176, "copy_byte_offset": 32, "paste_byte_offset": 36 }"#;
        for invalid in [
            r#"{ "kind": "single", "instructions": [] }"#.to_string(),
            format!(r#"{{ "kind": "single", "instructions": [{instruction}, {instruction}] }}"#),
            format!(r#"{{ "kind": "static", "instructions": [{instruction}] }}"#),
            r#"{ "kind": "multi", "instructions": [] }"#.to_string(),
            format!(r#"{{ "kind": "single", "instructions": [{too_wide}] }}"#),
        ] {
            assert!(serde_json::from_str::<Clipboard>(&invalid).is_err(), "{invalid} should be rejected");
        }
    }

    #[test]
    fn decode_rejects_multi_without_instructions() {
        let encoded = (FixedBytes::<2>::from([0x02, 0x00]), Vec::<FixedBytes<32>>::new()).abi_encode_params();
        assert!(matches!(Clipboard::decode(&encoded), Err(ClipboardError::Malformed(_))));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(Clipboard::decode(&[0x01]).is_err());
        let mut bad = Clipboard::empty().to_vec();
        bad[0] = 9;
        assert!(matches!(Clipboard::decode(&bad), Err(ClipboardError::Malformed(_))));
    }
}
