//! Binary transcoding between characteristic payloads and typed values.

pub mod bits;
pub mod template;
pub mod transcoder;

pub use template::{BoundTemplate, PatternTemplate};
pub use transcoder::{decode, encode};
