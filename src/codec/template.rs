//! Pattern Template Engine
//!
//! A pattern is literal hex text interleaved with `{name}` placeholders, e.g.
//! `7e000503{R}{G}{B}00ef`. Once every placeholder is bound to a byte width the
//! byte span of each field is fixed, so the same template both composes
//! outgoing frames and slices incoming ones.

use crate::error::{CodecError, CodecResult};
use std::collections::HashMap;
use std::ops::Range;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    /// Literal hex digits, always an even count.
    Literal(String),
    Placeholder(String),
}

/// A parsed but not yet width-bound template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl PatternTemplate {
    /// Scan left to right collecting literal runs and ordered placeholders.
    pub fn parse(source: &str) -> CodecResult<Self> {
        let malformed = |reason: String| CodecError::MalformedPattern {
            pattern: source.to_string(),
            reason,
        };

        let opens = source.matches('{').count();
        let closes = source.matches('}').count();
        if opens != closes {
            return Err(malformed(format!(
                "{opens} opening and {closes} closing braces"
            )));
        }

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars();

        while let Some(c) = chars.next() {
            match c {
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some('{') => return Err(malformed("nested placeholder".into())),
                            Some(ch) => name.push(ch),
                            None => return Err(malformed("unterminated placeholder".into())),
                        }
                    }
                    let name = name.trim().to_string();
                    if name.is_empty() {
                        return Err(malformed("empty placeholder name".into()));
                    }
                    Self::flush_literal(&mut literal, &mut segments, source)?;
                    segments.push(Segment::Placeholder(name));
                }
                '}' => return Err(malformed("closing brace without placeholder".into())),
                c if c.is_whitespace() => {}
                c if c.is_ascii_hexdigit() => literal.push(c.to_ascii_lowercase()),
                other => return Err(malformed(format!("unexpected character '{other}'"))),
            }
        }
        Self::flush_literal(&mut literal, &mut segments, source)?;

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    fn flush_literal(
        literal: &mut String,
        segments: &mut Vec<Segment>,
        source: &str,
    ) -> CodecResult<()> {
        if literal.is_empty() {
            return Ok(());
        }
        if literal.len() % 2 != 0 {
            return Err(CodecError::MalformedPattern {
                pattern: source.to_string(),
                reason: format!("literal '{literal}' is not byte aligned"),
            });
        }
        segments.push(Segment::Literal(std::mem::take(literal)));
        Ok(())
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Placeholder names in template order.
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Placeholder(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    pub fn placeholder_count(&self) -> usize {
        self.placeholders().count()
    }

    /// Fix the byte width of every placeholder.
    ///
    /// Fails with `UnresolvedPlaceholder` when `width_of` has no width for a name.
    pub fn bind_widths<F>(&self, mut width_of: F) -> CodecResult<BoundTemplate>
    where
        F: FnMut(&str) -> Option<usize>,
    {
        let mut parts = Vec::with_capacity(self.segments.len());
        // Offsets are tracked in hex characters so template and payload stay
        // positionally aligned, then halved into byte offsets.
        let mut cursor = 0usize;

        for segment in &self.segments {
            match segment {
                Segment::Literal(hex_text) => {
                    let bytes = hex::decode(hex_text)?;
                    let span = cursor / 2..(cursor + hex_text.len()) / 2;
                    cursor += hex_text.len();
                    parts.push(BoundPart::Literal { bytes, span });
                }
                Segment::Placeholder(name) => {
                    let width = width_of(name)
                        .filter(|w| *w > 0)
                        .ok_or_else(|| CodecError::UnresolvedPlaceholder { name: name.clone() })?;
                    let span = cursor / 2..(cursor + 2 * width) / 2;
                    cursor += 2 * width;
                    parts.push(BoundPart::Field {
                        name: name.clone(),
                        span,
                    });
                }
            }
        }

        Ok(BoundTemplate {
            source: self.source.clone(),
            parts,
            total_len: cursor / 2,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum BoundPart {
    Literal { bytes: Vec<u8>, span: Range<usize> },
    Field { name: String, span: Range<usize> },
}

/// A template whose placeholder spans are fixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundTemplate {
    source: String,
    parts: Vec<BoundPart>,
    total_len: usize,
}

impl BoundTemplate {
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Length in bytes of a complete frame.
    pub fn frame_len(&self) -> usize {
        self.total_len
    }

    /// Ordered (name, byte span) pairs for every placeholder.
    pub fn locate(&self) -> Vec<(&str, Range<usize>)> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                BoundPart::Field { name, span } => Some((name.as_str(), span.clone())),
                BoundPart::Literal { .. } => None,
            })
            .collect()
    }

    /// Slice each placeholder's bytes out of a received frame.
    pub fn slice<'a>(&self, payload: &'a [u8]) -> CodecResult<Vec<(&str, &'a [u8])>> {
        if payload.len() < self.total_len {
            return Err(CodecError::PayloadTooShort {
                needed: self.total_len,
                actual: payload.len(),
            });
        }

        for part in &self.parts {
            if let BoundPart::Literal { bytes, span } = part {
                if payload[span.clone()] != bytes[..] {
                    tracing::trace!(
                        pattern = %self.source,
                        "literal bytes at {:?} differ from template: {:02X?}",
                        span,
                        &payload[span.clone()]
                    );
                }
            }
        }

        Ok(self
            .locate()
            .into_iter()
            .map(|(name, span)| (name, &payload[span]))
            .collect())
    }

    /// Substitute each placeholder with its hex rendering.
    ///
    /// Every rendering must be exactly `2 × width` hex characters.
    pub fn expand(&self, values: &HashMap<&str, String>) -> CodecResult<String> {
        let mut out = String::with_capacity(self.total_len * 2);
        for part in &self.parts {
            match part {
                BoundPart::Literal { bytes, .. } => out.push_str(&hex::encode(bytes)),
                BoundPart::Field { name, span } => {
                    let rendered = values.get(name.as_str()).ok_or_else(|| {
                        CodecError::ValueMismatch(format!("no value for placeholder '{name}'"))
                    })?;
                    if rendered.len() != span.len() * 2 {
                        return Err(CodecError::ValueMismatch(format!(
                            "placeholder '{name}' needs {} hex digits, got '{rendered}'",
                            span.len() * 2
                        )));
                    }
                    out.push_str(rendered);
                }
            }
        }
        Ok(out)
    }

    /// Literal bytes before the first placeholder.
    pub fn literal_prefix(&self) -> &[u8] {
        match self.parts.first() {
            Some(BoundPart::Literal { bytes, .. }) => bytes,
            _ => &[],
        }
    }

    /// Literal bytes after the last placeholder.
    pub fn literal_suffix(&self) -> &[u8] {
        if self.parts.len() < 2 {
            return &[];
        }
        match self.parts.last() {
            Some(BoundPart::Literal { bytes, .. }) => bytes,
            _ => &[],
        }
    }
}
