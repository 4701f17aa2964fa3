//! Fingerprint generation for memoized calls
//!
//! A fingerprint is content-addressed and derived from:
//! - Function name
//! - Function logic (normalized source text or explicit version tag)
//! - Positional arguments (canonical JSON)
//! - Keyword arguments (canonical JSON, sorted by name)

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{EncoreError, Result};

/// Identity of a cached function: its name plus a hash of its logic
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionIdentity {
    name: String,
    logic_hash: String,
}

impl FunctionIdentity {
    /// Build an identity from the function's source text
    ///
    /// Formatting-only edits (indentation, blank lines, `//` comments) keep the
    /// same identity; any change to the logic itself produces a new one.
    pub fn from_source(name: impl Into<String>, source: &str) -> Self {
        let normalized = normalize_source(source);
        Self {
            name: name.into(),
            logic_hash: hex::encode(Sha256::digest(normalized.as_bytes())),
        }
    }

    /// Build an identity from an explicit version tag
    pub fn versioned(name: impl Into<String>, version: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"version:");
        hasher.update(version.as_bytes());
        Self {
            name: name.into(),
            logic_hash: hex::encode(hasher.finalize()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn logic_hash(&self) -> &str {
        &self.logic_hash
    }
}

/// Capture a function's logic for fingerprinting
///
/// ```
/// let id = encore::function_identity!("square", |x: u64| x * x);
/// assert_eq!(id.name(), "square");
/// ```
#[macro_export]
macro_rules! function_identity {
    ($name:expr, $($logic:tt)+) => {
        $crate::fingerprint::FunctionIdentity::from_source($name, stringify!($($logic)+))
    };
}

/// Canonically serialized call arguments
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    positional: Vec<serde_json::Value>,
    keyword: BTreeMap<String, serde_json::Value>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument
    pub fn arg<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self> {
        let label = format!("#{}", self.positional.len());
        self.positional.push(to_canonical(&label, value)?);
        Ok(self)
    }

    /// Set a keyword argument (order of calls does not matter)
    pub fn kwarg<T: Serialize + ?Sized>(mut self, name: &str, value: &T) -> Result<Self> {
        let canonical = to_canonical(name, value)?;
        self.keyword.insert(name.to_string(), canonical);
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keyword.is_empty()
    }
}

fn to_canonical<T: Serialize + ?Sized>(label: &str, value: &T) -> Result<serde_json::Value> {
    let unhashable = |reason: String| EncoreError::UnhashableArgument {
        argument: label.to_string(),
        reason,
    };

    // JSON has no NaN or infinity; serde_json would silently write them as null.
    value
        .serialize(finite::FiniteCheck)
        .map_err(|e| unhashable(e.to_string()))?;

    // serde_json::Value keeps object keys in a BTreeMap, so maps come out sorted.
    serde_json::to_value(value).map_err(|e| unhashable(e.to_string()))
}

/// Deterministic identity of one call: function logic + arguments
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    function: String,
    logic_hash: String,
    digest: String,
}

impl Fingerprint {
    /// Compute the fingerprint of calling `function` with `args`
    pub fn compute(function: &FunctionIdentity, args: &Args) -> Result<Self> {
        let positional = serde_json::to_vec(&args.positional).map_err(|e| {
            EncoreError::UnhashableArgument {
                argument: "positional".to_string(),
                reason: e.to_string(),
            }
        })?;
        let keyword =
            serde_json::to_vec(&args.keyword).map_err(|e| EncoreError::UnhashableArgument {
                argument: "keyword".to_string(),
                reason: e.to_string(),
            })?;

        let mut hasher = Sha256::new();

        // Length-prefix each component so boundaries can't be shifted between them
        for part in [
            function.name.as_bytes(),
            function.logic_hash.as_bytes(),
            positional.as_slice(),
            keyword.as_slice(),
        ] {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part);
        }

        Ok(Self {
            function: function.name.clone(),
            logic_hash: function.logic_hash.clone(),
            digest: hex::encode(hasher.finalize()),
        })
    }

    /// Name of the function this fingerprint belongs to
    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn logic_hash(&self) -> &str {
        &self.logic_hash
    }

    /// Hex-encoded SHA-256 digest
    pub fn as_str(&self) -> &str {
        &self.digest
    }

    /// Shortened digest for log lines
    pub fn short(&self) -> &str {
        &self.digest[..16]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.function, self.short())
    }
}

/// Normalize source text so formatting changes don't alter the logic hash
fn normalize_source(source: &str) -> String {
    let mut normalized_lines = Vec::new();

    for line in source.lines() {
        let trimmed = line.trim();

        if trimmed.is_empty() || trimmed.starts_with("//") {
            continue;
        }

        normalized_lines.push(trimmed);
    }

    normalized_lines.join("\n")
}

/// Serializer that only walks a value, failing on non-finite floats
mod finite {
    use serde::ser::{self, Serialize};
    use std::fmt;

    #[derive(Debug)]
    pub(super) struct NonFinite(String);

    impl fmt::Display for NonFinite {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(&self.0)
        }
    }

    impl std::error::Error for NonFinite {}

    impl ser::Error for NonFinite {
        fn custom<T: fmt::Display>(msg: T) -> Self {
            Self(msg.to_string())
        }
    }

    type Checked = Result<(), NonFinite>;

    fn check_float(value: f64) -> Checked {
        if value.is_finite() {
            Ok(())
        } else {
            Err(NonFinite(format!(
                "non-finite float `{}` has no canonical encoding",
                value
            )))
        }
    }

    pub(super) struct FiniteCheck;

    impl ser::Serializer for FiniteCheck {
        type Ok = ();
        type Error = NonFinite;
        type SerializeSeq = Self;
        type SerializeTuple = Self;
        type SerializeTupleStruct = Self;
        type SerializeTupleVariant = Self;
        type SerializeMap = Self;
        type SerializeStruct = Self;
        type SerializeStructVariant = Self;

        fn serialize_bool(self, _: bool) -> Checked {
            Ok(())
        }
        fn serialize_i8(self, _: i8) -> Checked {
            Ok(())
        }
        fn serialize_i16(self, _: i16) -> Checked {
            Ok(())
        }
        fn serialize_i32(self, _: i32) -> Checked {
            Ok(())
        }
        fn serialize_i64(self, _: i64) -> Checked {
            Ok(())
        }
        fn serialize_i128(self, _: i128) -> Checked {
            Ok(())
        }
        fn serialize_u8(self, _: u8) -> Checked {
            Ok(())
        }
        fn serialize_u16(self, _: u16) -> Checked {
            Ok(())
        }
        fn serialize_u32(self, _: u32) -> Checked {
            Ok(())
        }
        fn serialize_u64(self, _: u64) -> Checked {
            Ok(())
        }
        fn serialize_u128(self, _: u128) -> Checked {
            Ok(())
        }
        fn serialize_f32(self, value: f32) -> Checked {
            check_float(f64::from(value))
        }
        fn serialize_f64(self, value: f64) -> Checked {
            check_float(value)
        }
        fn serialize_char(self, _: char) -> Checked {
            Ok(())
        }
        fn serialize_str(self, _: &str) -> Checked {
            Ok(())
        }
        fn serialize_bytes(self, _: &[u8]) -> Checked {
            Ok(())
        }
        fn serialize_none(self) -> Checked {
            Ok(())
        }
        fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Checked {
            value.serialize(self)
        }
        fn serialize_unit(self) -> Checked {
            Ok(())
        }
        fn serialize_unit_struct(self, _: &'static str) -> Checked {
            Ok(())
        }
        fn serialize_unit_variant(self, _: &'static str, _: u32, _: &'static str) -> Checked {
            Ok(())
        }
        fn serialize_newtype_struct<T: Serialize + ?Sized>(
            self,
            _: &'static str,
            value: &T,
        ) -> Checked {
            value.serialize(self)
        }
        fn serialize_newtype_variant<T: Serialize + ?Sized>(
            self,
            _: &'static str,
            _: u32,
            _: &'static str,
            value: &T,
        ) -> Checked {
            value.serialize(self)
        }
        fn serialize_seq(self, _: Option<usize>) -> Result<Self, NonFinite> {
            Ok(self)
        }
        fn serialize_tuple(self, _: usize) -> Result<Self, NonFinite> {
            Ok(self)
        }
        fn serialize_tuple_struct(self, _: &'static str, _: usize) -> Result<Self, NonFinite> {
            Ok(self)
        }
        fn serialize_tuple_variant(
            self,
            _: &'static str,
            _: u32,
            _: &'static str,
            _: usize,
        ) -> Result<Self, NonFinite> {
            Ok(self)
        }
        fn serialize_map(self, _: Option<usize>) -> Result<Self, NonFinite> {
            Ok(self)
        }
        fn serialize_struct(self, _: &'static str, _: usize) -> Result<Self, NonFinite> {
            Ok(self)
        }
        fn serialize_struct_variant(
            self,
            _: &'static str,
            _: u32,
            _: &'static str,
            _: usize,
        ) -> Result<Self, NonFinite> {
            Ok(self)
        }
    }

    impl ser::SerializeSeq for FiniteCheck {
        type Ok = ();
        type Error = NonFinite;

        fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Checked {
            value.serialize(FiniteCheck)
        }
        fn end(self) -> Checked {
            Ok(())
        }
    }

    impl ser::SerializeTuple for FiniteCheck {
        type Ok = ();
        type Error = NonFinite;

        fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Checked {
            value.serialize(FiniteCheck)
        }
        fn end(self) -> Checked {
            Ok(())
        }
    }

    impl ser::SerializeTupleStruct for FiniteCheck {
        type Ok = ();
        type Error = NonFinite;

        fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Checked {
            value.serialize(FiniteCheck)
        }
        fn end(self) -> Checked {
            Ok(())
        }
    }

    impl ser::SerializeTupleVariant for FiniteCheck {
        type Ok = ();
        type Error = NonFinite;

        fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Checked {
            value.serialize(FiniteCheck)
        }
        fn end(self) -> Checked {
            Ok(())
        }
    }

    impl ser::SerializeMap for FiniteCheck {
        type Ok = ();
        type Error = NonFinite;

        fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> Checked {
            key.serialize(FiniteCheck)
        }
        fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Checked {
            value.serialize(FiniteCheck)
        }
        fn end(self) -> Checked {
            Ok(())
        }
    }

    impl ser::SerializeStruct for FiniteCheck {
        type Ok = ();
        type Error = NonFinite;

        fn serialize_field<T: Serialize + ?Sized>(&mut self, _: &'static str, value: &T) -> Checked {
            value.serialize(FiniteCheck)
        }
        fn end(self) -> Checked {
            Ok(())
        }
    }

    impl ser::SerializeStructVariant for FiniteCheck {
        type Ok = ();
        type Error = NonFinite;

        fn serialize_field<T: Serialize + ?Sized>(&mut self, _: &'static str, value: &T) -> Checked {
            value.serialize(FiniteCheck)
        }
        fn end(self) -> Checked {
            Ok(())
        }
    }
}
