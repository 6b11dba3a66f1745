//! Resource schemas
//!
//! A `ResourceSchema` is loaded once from a resource description and never
//! changes afterwards. All optional fields are resolved and validated here so the
//! codec never has to guess at decode time.
//!
//! Several vocabularies are in circulation for the same concepts (`bdo:`, `bt:`,
//! `bir:`, `sbo:` and unprefixed keys, `bytelength` vs `fixedByteLength`,
//! `offset` vs `valueAdd`). They are all folded into one internal vocabulary on
//! load.

use crate::codec::template::{BoundTemplate, PatternTemplate};
use crate::error::{CodecError, CodecResult};
use serde_json::{Map, Value as Json};
use std::collections::{BTreeMap, HashMap};

/// Widest integer the codec will decode, in bytes.
pub const MAX_INTEGER_BYTES: usize = 6;
pub const MAX_INTEGER_BITS: usize = MAX_INTEGER_BYTES * 8;

const VOCABULARY_PREFIXES: &[&str] = &["bdo:", "bt:", "bir:", "sbo:", "wbt:"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    /// GATT values are little-endian unless the description says otherwise.
    #[default]
    Little,
    Big,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StringFormat {
    #[default]
    Utf8,
    Hex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitFragment {
    pub offset: usize,
    pub length: usize,
}

/// Where a numeric field lives inside the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Addressing {
    Bytes { offset: usize, length: usize },
    /// One or more fragments, most significant first.
    Bits(Vec<BitFragment>),
    /// No width declared: the whole payload is one value.
    Payload,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NumericSchema {
    pub addressing: Addressing,
    pub byte_order: ByteOrder,
    pub signed: bool,
    pub scale: f64,
    pub add: f64,
    pub repeated: bool,
    pub frame: Option<NumericFrame>,
}

impl Default for NumericSchema {
    fn default() -> Self {
        Self {
            addressing: Addressing::Payload,
            byte_order: ByteOrder::default(),
            signed: false,
            scale: 1.0,
            add: 0.0,
            repeated: false,
            frame: None,
        }
    }
}

impl NumericSchema {
    pub fn bytes(length: usize) -> Self {
        Self {
            addressing: Addressing::Bytes { offset: 0, length },
            ..Default::default()
        }
    }

    pub fn bits(fragments: Vec<BitFragment>) -> Self {
        Self {
            addressing: Addressing::Bits(fragments),
            ..Default::default()
        }
    }

    pub fn with_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    pub fn with_signed(mut self, signed: bool) -> Self {
        self.signed = signed;
        self
    }

    pub fn with_scale(mut self, scale: f64, add: f64) -> Self {
        self.scale = scale;
        self.add = add;
        self
    }

    pub fn is_unscaled(&self) -> bool {
        self.scale == 1.0 && self.add.fract() == 0.0
    }

    /// Byte width of the value slot, when it is known before any data arrives.
    pub fn fixed_width(&self) -> Option<usize> {
        match &self.addressing {
            Addressing::Bytes { length, .. } => Some(*length),
            Addressing::Bits(fragments) => Some(bit_extent(fragments)),
            Addressing::Payload => None,
        }
    }

    /// Bytes of payload covered from the start of the frame.
    pub fn extent(&self) -> Option<usize> {
        match &self.addressing {
            Addressing::Bytes { offset, length } => Some(offset + length),
            Addressing::Bits(fragments) => Some(bit_extent(fragments)),
            Addressing::Payload => None,
        }
    }
}

fn bit_extent(fragments: &[BitFragment]) -> usize {
    fragments
        .iter()
        .map(|f| f.offset + f.length)
        .max()
        .unwrap_or(0)
        .div_ceil(8)
}

/// Numeric value carried inside a single-placeholder template.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericFrame {
    pub template: BoundTemplate,
    pub name: String,
    pub field: Box<NumericSchema>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StringSchema {
    pub format: StringFormat,
    pub byte_offset: usize,
    pub byte_length: Option<usize>,
    pub frame: Option<Frame>,
}

/// Multi-field template with one schema per placeholder.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub template: BoundTemplate,
    pub variables: BTreeMap<String, ResourceSchema>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObjectSchema {
    Frame(Frame),
    /// Named sub-fields addressed into the same payload.
    Fields(BTreeMap<String, ResourceSchema>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArraySchema {
    Frame(Frame),
    Items(Box<ResourceSchema>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResourceSchema {
    Integer(NumericSchema),
    Number(NumericSchema),
    String(StringSchema),
    Object(ObjectSchema),
    Array(ArraySchema),
}

impl ResourceSchema {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Integer(_) => "integer",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Object(_) => "object",
            Self::Array(_) => "array",
        }
    }

    /// Byte width of the encoded value, when statically known.
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            Self::Integer(n) | Self::Number(n) => match &n.frame {
                Some(frame) => Some(frame.template.frame_len()),
                None => n.fixed_width(),
            },
            Self::String(s) => match &s.frame {
                Some(frame) => Some(frame.template.frame_len()),
                None => s.byte_length,
            },
            Self::Object(ObjectSchema::Frame(frame)) | Self::Array(ArraySchema::Frame(frame)) => {
                Some(frame.template.frame_len())
            }
            Self::Object(ObjectSchema::Fields(_)) | Self::Array(ArraySchema::Items(_)) => None,
        }
    }

    /// Bytes covered from the start of the payload by a sub-field.
    pub(crate) fn extent(&self) -> Option<usize> {
        match self {
            Self::Integer(n) | Self::Number(n) if n.frame.is_none() => n.extent(),
            Self::String(s) if s.frame.is_none() => s.byte_length.map(|l| s.byte_offset + l),
            other => other.fixed_width(),
        }
    }

    /// Load a schema from its JSON description.
    pub fn from_json(json: &Json) -> CodecResult<Self> {
        let obj = json
            .as_object()
            .ok_or_else(|| CodecError::InvalidSchema("schema must be a JSON object".into()))?;
        SchemaReader::new(obj).read()
    }
}

/// Strip a known vocabulary prefix and fold the key to the internal spelling.
fn canonical_key(key: &str) -> String {
    let bare = VOCABULARY_PREFIXES
        .iter()
        .find_map(|p| key.strip_prefix(p))
        .unwrap_or(key)
        .to_ascii_lowercase();

    match bare.as_str() {
        "fixedbytelength" | "bytelength" => "bytelength".into(),
        "valueadd" => "valueadd".into(),
        "receiveddataformat" | "expecteddataformat" | "dataformat" => "dataformat".into(),
        _ => bare,
    }
}

struct SchemaReader<'a> {
    keys: HashMap<String, &'a Json>,
}

impl<'a> SchemaReader<'a> {
    fn new(obj: &'a Map<String, Json>) -> Self {
        let mut keys = HashMap::new();
        for (key, value) in obj {
            let canonical = canonical_key(key);
            // `dataformat` can appear twice (received/expected); keep the first usable one.
            if canonical == "dataformat" && keys.contains_key("dataformat") {
                continue;
            }
            if canonical == "dataformat" && value.as_str().is_some_and(|s| s.eq_ignore_ascii_case("none")) {
                continue;
            }
            keys.insert(canonical, value);
        }
        Self { keys }
    }

    fn get(&self, key: &str) -> Option<&'a Json> {
        self.keys.get(key).copied()
    }

    fn usize_field(&self, key: &str) -> CodecResult<Option<usize>> {
        match self.get(key) {
            None | Some(Json::Null) => Ok(None),
            Some(v) => v
                .as_u64()
                .map(|n| Some(n as usize))
                .ok_or_else(|| CodecError::InvalidSchema(format!("'{key}' must be a non-negative integer"))),
        }
    }

    fn f64_field(&self, key: &str) -> CodecResult<Option<f64>> {
        match self.get(key) {
            None | Some(Json::Null) => Ok(None),
            Some(v) => v
                .as_f64()
                .map(Some)
                .ok_or_else(|| CodecError::InvalidSchema(format!("'{key}' must be a number"))),
        }
    }

    fn bool_field(&self, key: &str) -> CodecResult<Option<bool>> {
        match self.get(key) {
            None | Some(Json::Null) => Ok(None),
            Some(Json::Bool(b)) => Ok(Some(*b)),
            Some(_) => Err(CodecError::InvalidSchema(format!("'{key}' must be a boolean"))),
        }
    }

    fn usize_list(&self, key: &str) -> CodecResult<Option<Vec<usize>>> {
        match self.get(key) {
            None | Some(Json::Null) => Ok(None),
            Some(Json::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_u64().map(|n| n as usize).ok_or_else(|| {
                        CodecError::InvalidSchema(format!("'{key}' entries must be non-negative integers"))
                    })
                })
                .collect::<CodecResult<Vec<_>>>()
                .map(Some),
            Some(v) => v
                .as_u64()
                .map(|n| Some(vec![n as usize]))
                .ok_or_else(|| CodecError::InvalidSchema(format!("'{key}' must be an integer or array"))),
        }
    }

    fn byte_order(&self) -> CodecResult<ByteOrder> {
        match self.get("byteorder").and_then(Json::as_str) {
            None => Ok(ByteOrder::default()),
            Some(s) => match s.to_ascii_lowercase().as_str() {
                "little" | "littleendian" | "little-endian" | "le" => Ok(ByteOrder::Little),
                "big" | "bigendian" | "big-endian" | "be" => Ok(ByteOrder::Big),
                other => Err(CodecError::InvalidSchema(format!(
                    "byte order '{other}' is not 'big' or 'little'"
                ))),
            },
        }
    }

    /// `int16`, `uint8`, `stringUTF8`, ... as (logical type, width, signed).
    fn data_format(&self) -> CodecResult<Option<(&'static str, Option<usize>, bool)>> {
        let Some(format) = self.get("dataformat").and_then(Json::as_str) else {
            return Ok(None);
        };
        let lower = format.to_ascii_lowercase();
        if lower == "stringutf8" {
            return Ok(Some(("string", None, false)));
        }
        let (signed, bits) = if let Some(bits) = lower.strip_prefix("uint") {
            (false, bits)
        } else if let Some(bits) = lower.strip_prefix("int") {
            (true, bits)
        } else {
            return Err(CodecError::UnsupportedType(format.to_string()));
        };
        let bits: usize = bits
            .parse()
            .map_err(|_| CodecError::UnsupportedType(format.to_string()))?;
        if bits > MAX_INTEGER_BITS {
            return Err(CodecError::IntegerTooWide {
                bits,
                max: MAX_INTEGER_BITS,
            });
        }
        if bits % 8 != 0 {
            return Err(CodecError::UnsupportedType(format.to_string()));
        }
        Ok(Some(("integer", Some(bits / 8), signed)))
    }

    fn logical_type(&self) -> CodecResult<String> {
        if let Some(t) = self.get("type") {
            return t
                .as_str()
                .map(str::to_ascii_lowercase)
                .ok_or_else(|| CodecError::InvalidSchema("'type' must be a string".into()));
        }
        if let Some((t, _, _)) = self.data_format()? {
            return Ok(t.to_string());
        }
        if self.get("pattern").is_some() && self.get("variables").is_some() {
            return Ok("object".to_string());
        }
        Err(CodecError::UnsupportedType("<missing>".into()))
    }

    fn read(&self) -> CodecResult<ResourceSchema> {
        match self.logical_type()?.as_str() {
            "integer" => Ok(ResourceSchema::Integer(self.numeric()?)),
            "number" => Ok(ResourceSchema::Number(self.numeric()?)),
            "string" => Ok(ResourceSchema::String(self.string(StringFormat::Utf8)?)),
            "hexstring" => Ok(ResourceSchema::String(self.string(StringFormat::Hex)?)),
            "object" => self.object(),
            "array" => self.array(),
            other => Err(CodecError::UnsupportedType(other.to_string())),
        }
    }

    fn addressing(&self) -> CodecResult<Addressing> {
        let format = self.data_format()?;
        let byte_length = self
            .usize_field("bytelength")?
            .or_else(|| format.and_then(|(_, width, _)| width));
        let byte_offset = self.usize_field("byteoffset")?;
        let bit_offsets = self.usize_list("bitoffset")?;
        let bit_lengths = self.usize_list("bitlength")?;

        let has_bits = bit_offsets.is_some() || bit_lengths.is_some();
        if has_bits && (byte_length.is_some() || byte_offset.is_some()) {
            return Err(CodecError::InvalidSchema(
                "byte-length and bit-offset/bit-length addressing are mutually exclusive".into(),
            ));
        }

        if has_bits {
            let (Some(offsets), Some(lengths)) = (bit_offsets, bit_lengths) else {
                return Err(CodecError::InvalidSchema(
                    "bitOffset and bitLength must be declared together".into(),
                ));
            };
            if offsets.len() != lengths.len() || offsets.is_empty() {
                return Err(CodecError::InvalidSchema(
                    "bitOffset and bitLength must have the same number of fragments".into(),
                ));
            }
            if lengths.contains(&0) {
                return Err(CodecError::InvalidSchema("bitLength must be at least 1".into()));
            }
            let bits: usize = lengths.iter().sum();
            if bits > MAX_INTEGER_BITS {
                return Err(CodecError::IntegerTooWide {
                    bits,
                    max: MAX_INTEGER_BITS,
                });
            }
            return Ok(Addressing::Bits(
                offsets
                    .into_iter()
                    .zip(lengths)
                    .map(|(offset, length)| BitFragment { offset, length })
                    .collect(),
            ));
        }

        match byte_length {
            Some(0) => Err(CodecError::InvalidSchema("bytelength must be at least 1".into())),
            Some(length) if length > MAX_INTEGER_BYTES => Err(CodecError::IntegerTooWide {
                bits: length * 8,
                max: MAX_INTEGER_BITS,
            }),
            Some(length) => Ok(Addressing::Bytes {
                offset: byte_offset.unwrap_or(0),
                length,
            }),
            None if byte_offset.is_some() => Err(CodecError::InvalidSchema(
                "byteOffset requires a bytelength".into(),
            )),
            None => Ok(Addressing::Payload),
        }
    }

    fn numeric(&self) -> CodecResult<NumericSchema> {
        let signed = match self.bool_field("signed")? {
            Some(s) => s,
            None => self.data_format()?.map(|(_, _, s)| s).unwrap_or(false),
        };
        let scale = self.f64_field("scale")?.unwrap_or(1.0);
        if scale == 0.0 || !scale.is_finite() {
            return Err(CodecError::InvalidSchema("scale must be a non-zero number".into()));
        }
        let add = match self.f64_field("valueadd")? {
            Some(v) => v,
            None => self.f64_field("offset")?.unwrap_or(0.0),
        };

        let mut schema = NumericSchema {
            addressing: self.addressing()?,
            byte_order: self.byte_order()?,
            signed,
            scale,
            add,
            repeated: self.bool_field("repeated")?.unwrap_or(false),
            frame: None,
        };

        if let Some(pattern) = self.pattern()? {
            schema.frame = Some(self.numeric_frame(&pattern)?);
        }
        Ok(schema)
    }

    fn numeric_frame(&self, pattern: &PatternTemplate) -> CodecResult<NumericFrame> {
        let names: Vec<&str> = pattern.placeholders().collect();
        let [name] = names.as_slice() else {
            return Err(CodecError::MalformedPattern {
                pattern: pattern.source().to_string(),
                reason: format!(
                    "a numeric schema takes exactly one placeholder, found {}; use an object schema",
                    names.len()
                ),
            });
        };

        let field = match self.variables()?.remove(*name) {
            Some(ResourceSchema::Integer(n)) | Some(ResourceSchema::Number(n)) => n,
            Some(other) => {
                return Err(CodecError::InvalidSchema(format!(
                    "placeholder '{name}' of a numeric schema must be numeric, not {}",
                    other.type_name()
                )))
            }
            None => {
                return Err(CodecError::UnresolvedPlaceholder {
                    name: name.to_string(),
                })
            }
        };
        if field.frame.is_some() {
            return Err(CodecError::InvalidSchema(format!(
                "placeholder '{name}' cannot carry its own pattern"
            )));
        }

        let width = field.fixed_width();
        let template = pattern.bind_widths(|_| width)?;
        Ok(NumericFrame {
            template,
            name: name.to_string(),
            field: Box::new(field),
        })
    }

    fn string(&self, default_format: StringFormat) -> CodecResult<StringSchema> {
        let format = match self.get("format").and_then(Json::as_str) {
            Some(f) if f.eq_ignore_ascii_case("hex") => StringFormat::Hex,
            Some(f) if f.eq_ignore_ascii_case("utf8") || f.eq_ignore_ascii_case("utf-8") => {
                StringFormat::Utf8
            }
            _ => default_format,
        };
        let byte_length = self.usize_field("bytelength")?;
        let frame = match self.pattern()? {
            Some(pattern) => Some(self.frame(&pattern)?),
            None => None,
        };
        Ok(StringSchema {
            format,
            byte_offset: self.usize_field("byteoffset")?.unwrap_or(0),
            byte_length,
            frame,
        })
    }

    fn object(&self) -> CodecResult<ResourceSchema> {
        if let Some(pattern) = self.pattern()? {
            return Ok(ResourceSchema::Object(ObjectSchema::Frame(self.frame(&pattern)?)));
        }
        let Some(properties) = self.get("properties").and_then(Json::as_object) else {
            return Err(CodecError::InvalidSchema(
                "object schema needs a pattern or a properties map".into(),
            ));
        };

        let mut fields = BTreeMap::new();
        for (name, json) in properties {
            let schema = ResourceSchema::from_json(json)?;
            if schema.extent().is_none() {
                return Err(CodecError::InvalidSchema(format!(
                    "field '{name}' needs a fixed byte or bit position"
                )));
            }
            fields.insert(name.clone(), schema);
        }
        Ok(ResourceSchema::Object(ObjectSchema::Fields(fields)))
    }

    fn array(&self) -> CodecResult<ResourceSchema> {
        if let Some(pattern) = self.pattern()? {
            return Ok(ResourceSchema::Array(ArraySchema::Frame(self.frame(&pattern)?)));
        }
        let Some(items) = self.get("items") else {
            return Err(CodecError::InvalidSchema(
                "array schema needs a pattern or an items schema".into(),
            ));
        };
        let item = ResourceSchema::from_json(items)?;
        match &item {
            ResourceSchema::Integer(n) | ResourceSchema::Number(n)
                if n.frame.is_none() && matches!(n.addressing, Addressing::Bytes { offset: 0, .. }) => {}
            _ => {
                return Err(CodecError::InvalidSchema(
                    "array items must be numeric fields with a bytelength".into(),
                ))
            }
        }
        Ok(ResourceSchema::Array(ArraySchema::Items(Box::new(item))))
    }

    fn pattern(&self) -> CodecResult<Option<PatternTemplate>> {
        match self.get("pattern") {
            None | Some(Json::Null) => Ok(None),
            Some(Json::String(s)) => PatternTemplate::parse(s).map(Some),
            Some(_) => Err(CodecError::InvalidSchema("'pattern' must be a string".into())),
        }
    }

    fn variables(&self) -> CodecResult<BTreeMap<String, ResourceSchema>> {
        let Some(vars) = self.get("variables") else {
            return Ok(BTreeMap::new());
        };
        let vars = vars
            .as_object()
            .ok_or_else(|| CodecError::InvalidSchema("'variables' must be an object".into()))?;
        vars.iter()
            .map(|(name, json)| Ok((name.clone(), ResourceSchema::from_json(json)?)))
            .collect()
    }

    fn frame(&self, pattern: &PatternTemplate) -> CodecResult<Frame> {
        let mut variables = self.variables()?;
        let template = pattern.bind_widths(|name| variables.get(name).and_then(|s| s.fixed_width()))?;
        // Only placeholders take part in the frame.
        let used: Vec<String> = pattern.placeholders().map(str::to_string).collect();
        variables.retain(|name, _| used.contains(name));
        Ok(Frame { template, variables })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_vocabularies_translate_to_same_schema() {
        let bdo = ResourceSchema::from_json(&json!({
            "type": "integer", "bdo:bytelength": 2, "bdo:byteOrder": "big", "bdo:signed": true
        }))
        .unwrap();
        let bt = ResourceSchema::from_json(&json!({
            "type": "integer", "bt:fixedByteLength": 2, "bt:byteOrder": "big", "bt:signed": true
        }))
        .unwrap();
        let bare = ResourceSchema::from_json(&json!({
            "type": "integer", "bytelength": 2, "byteOrder": "big", "signed": true
        }))
        .unwrap();
        assert_eq!(bdo, bt);
        assert_eq!(bt, bare);
    }

    #[test]
    fn test_data_format_vocabulary() {
        let schema = ResourceSchema::from_json(&json!({
            "type": "integer", "bir:receivedDataformat": "int16", "bir:expectedDataformat": "None"
        }))
        .unwrap();
        let ResourceSchema::Integer(n) = schema else {
            panic!("expected integer schema");
        };
        assert_eq!(n.addressing, Addressing::Bytes { offset: 0, length: 2 });
        assert!(n.signed);
    }

    #[test]
    fn test_value_add_takes_precedence_over_offset() {
        let schema = ResourceSchema::from_json(&json!({
            "type": "integer", "bdo:bytelength": 2, "bdo:offset": 0, "bdo:valueAdd": 50000
        }))
        .unwrap();
        let ResourceSchema::Integer(n) = schema else {
            panic!("expected integer schema");
        };
        assert_eq!(n.add, 50000.0);
    }

    #[test]
    fn test_byte_and_bit_addressing_are_exclusive() {
        let err = ResourceSchema::from_json(&json!({
            "type": "integer", "bytelength": 1, "bitOffset": 0, "bitLength": 4
        }))
        .unwrap_err();
        assert!(matches!(err, CodecError::InvalidSchema(_)));
    }

    #[test]
    fn test_bit_fragments() {
        let schema = ResourceSchema::from_json(&json!({
            "type": "integer", "bitOffset": [0, 12], "bitLength": [4, 4]
        }))
        .unwrap();
        let ResourceSchema::Integer(n) = schema else {
            panic!("expected integer schema");
        };
        assert_eq!(
            n.addressing,
            Addressing::Bits(vec![
                BitFragment { offset: 0, length: 4 },
                BitFragment { offset: 12, length: 4 }
            ])
        );
        assert_eq!(n.fixed_width(), Some(2));

        assert!(ResourceSchema::from_json(&json!({
            "type": "integer", "bitOffset": [0, 4], "bitLength": [4]
        }))
        .is_err());
    }

    #[test]
    fn test_excessive_width() {
        assert_eq!(
            ResourceSchema::from_json(&json!({"type": "integer", "bytelength": 8})).unwrap_err(),
            CodecError::IntegerTooWide { bits: 64, max: 48 }
        );
        assert!(matches!(
            ResourceSchema::from_json(&json!({"type": "integer", "dataFormat": "uint64"})),
            Err(CodecError::IntegerTooWide { .. })
        ));
    }

    #[test]
    fn test_unsupported_type() {
        assert_eq!(
            ResourceSchema::from_json(&json!({"type": "boolean"})).unwrap_err(),
            CodecError::UnsupportedType("boolean".into())
        );
        assert!(matches!(
            ResourceSchema::from_json(&json!({"dataFormat": "float32"})),
            Err(CodecError::UnsupportedType(_))
        ));
    }

    #[test]
    fn test_numeric_pattern_allows_one_placeholder() {
        let schema = ResourceSchema::from_json(&json!({
            "type": "integer",
            "bdo:pattern": "7e0004{value}00000000ef",
            "bdo:variables": {"value": {"type": "integer", "bdo:bytelength": 1}}
        }))
        .unwrap();
        assert_eq!(schema.fixed_width(), Some(9));

        let err = ResourceSchema::from_json(&json!({
            "type": "integer",
            "pattern": "{a}{b}",
            "variables": {
                "a": {"type": "integer", "bytelength": 1},
                "b": {"type": "integer", "bytelength": 1}
            }
        }))
        .unwrap_err();
        assert!(matches!(err, CodecError::MalformedPattern { .. }));

        let err = ResourceSchema::from_json(&json!({
            "type": "integer",
            "bytelength": 1,
            "pattern": "7e{v}ef"
        }))
        .unwrap_err();
        assert_eq!(err, CodecError::UnresolvedPlaceholder { name: "v".into() });
        assert!(err.is_configuration());
    }

    #[test]
    fn test_frame_requires_every_placeholder_schema() {
        let err = ResourceSchema::from_json(&json!({
            "type": "string",
            "format": "hex",
            "bdo:pattern": "7e000503{R}{G}{B}00ef",
            "bdo:variables": {
                "R": {"type": "integer", "bdo:bytelength": 1},
                "G": {"type": "integer", "bdo:bytelength": 1}
            }
        }))
        .unwrap_err();
        assert_eq!(err, CodecError::UnresolvedPlaceholder { name: "B".into() });
    }

    #[test]
    fn test_hexstring_type() {
        let schema = ResourceSchema::from_json(&json!({
            "type": "hexstring",
            "bt:pattern": "7e0004{is_on}00000000ef",
            "bt:variables": {"is_on": {"type": "integer", "bt:bytelength": 1}}
        }))
        .unwrap();
        let ResourceSchema::String(s) = schema else {
            panic!("expected string schema");
        };
        assert_eq!(s.format, StringFormat::Hex);
        assert!(s.frame.is_some());
    }

    #[test]
    fn test_pattern_without_type_is_object() {
        let schema = ResourceSchema::from_json(&json!({
            "pattern": "{a}",
            "variables": {"a": {"type": "integer", "bytelength": 1}}
        }))
        .unwrap();
        assert_eq!(schema.type_name(), "object");
    }

    #[test]
    fn test_field_map_requires_fixed_positions() {
        let err = ResourceSchema::from_json(&json!({
            "type": "object",
            "properties": {"raw": {"type": "integer"}}
        }))
        .unwrap_err();
        assert!(matches!(err, CodecError::InvalidSchema(_)));
    }
}
