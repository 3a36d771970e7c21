//! Box/unbox strategies between the caller-facing and the stored
//! representation of keys and values.
//!
//! Every converter must satisfy `unbox_key(box_key(k)) == k` and
//! `unbox_value(box_value(v)) == v` for each input it accepts. Inputs it
//! cannot represent are reported as `CacheError::Conversion`.

use crate::command::{Flag, Flags, Value};
use crate::error::{CacheError, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub trait TypeConverter: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn box_key(&self, key: Value) -> Result<Value>;

    fn unbox_key(&self, key: Value) -> Result<Value>;

    fn box_value(&self, value: Value) -> Result<Value>;

    fn unbox_value(&self, value: Value) -> Result<Value>;
}

/// Stores exactly what the caller hands in
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityConverter;

impl TypeConverter for IdentityConverter {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn box_key(&self, key: Value) -> Result<Value> {
        Ok(key)
    }

    fn unbox_key(&self, key: Value) -> Result<Value> {
        Ok(key)
    }

    fn box_value(&self, value: Value) -> Result<Value> {
        Ok(value)
    }

    fn unbox_value(&self, value: Value) -> Result<Value> {
        Ok(value)
    }
}

/// Caller strings stored as their UTF-8 bytes
#[derive(Debug, Default, Clone, Copy)]
pub struct Utf8Converter;

impl Utf8Converter {
    fn encode(value: Value) -> Result<Value> {
        match value {
            Value::Str(s) => Ok(Value::Bytes(Bytes::from(s.into_bytes()))),
            other => Err(CacheError::Conversion(format!(
                "utf8 converter cannot store a {} value",
                other.type_name()
            ))),
        }
    }

    fn decode(value: Value) -> Result<Value> {
        match value {
            Value::Bytes(b) => String::from_utf8(b.to_vec())
                .map(Value::Str)
                .map_err(|e| CacheError::Conversion(format!("stored bytes are not UTF-8: {}", e))),
            other => Err(CacheError::Conversion(format!(
                "utf8 converter expected stored bytes, found {}",
                other.type_name()
            ))),
        }
    }
}

impl TypeConverter for Utf8Converter {
    fn name(&self) -> &'static str {
        "utf8"
    }

    fn box_key(&self, key: Value) -> Result<Value> {
        Self::encode(key)
    }

    fn unbox_key(&self, key: Value) -> Result<Value> {
        Self::decode(key)
    }

    fn box_value(&self, value: Value) -> Result<Value> {
        Self::encode(value)
    }

    fn unbox_value(&self, value: Value) -> Result<Value> {
        Self::decode(value)
    }
}

/// Any value stored as its JSON encoding
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonConverter;

impl JsonConverter {
    fn encode(value: Value) -> Result<Value> {
        let json = serde_json::to_vec(&value)?;
        Ok(Value::Bytes(Bytes::from(json)))
    }

    fn decode(value: Value) -> Result<Value> {
        match value {
            Value::Bytes(b) => serde_json::from_slice(&b)
                .map_err(|e| CacheError::Conversion(format!("stored bytes are not JSON: {}", e))),
            other => Err(CacheError::Conversion(format!(
                "json converter expected stored bytes, found {}",
                other.type_name()
            ))),
        }
    }
}

impl TypeConverter for JsonConverter {
    fn name(&self) -> &'static str {
        "json"
    }

    fn box_key(&self, key: Value) -> Result<Value> {
        Self::encode(key)
    }

    fn unbox_key(&self, key: Value) -> Result<Value> {
        Self::decode(key)
    }

    fn box_value(&self, value: Value) -> Result<Value> {
        Self::encode(value)
    }

    fn unbox_value(&self, value: Value) -> Result<Value> {
        Self::decode(value)
    }
}

/// Converter names accepted in configuration files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConverterKind {
    #[default]
    Identity,
    Utf8,
    Json,
}

impl ConverterKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "identity" | "none" => Some(Self::Identity),
            "utf8" | "utf-8" | "string" => Some(Self::Utf8),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    pub fn build(self) -> Arc<dyn TypeConverter> {
        match self {
            ConverterKind::Identity => Arc::new(IdentityConverter),
            ConverterKind::Utf8 => Arc::new(Utf8Converter),
            ConverterKind::Json => Arc::new(JsonConverter),
        }
    }
}

/// Picks the converter for an invocation from its flag set.
///
/// The first flag (in `Flag` order) with a registered converter wins;
/// otherwise the default converter applies.
#[derive(Clone, Debug)]
pub struct ConverterRegistry {
    default: Arc<dyn TypeConverter>,
    by_flag: BTreeMap<Flag, Arc<dyn TypeConverter>>,
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        Self::new(Arc::new(IdentityConverter))
    }
}

impl ConverterRegistry {
    pub fn new(default: Arc<dyn TypeConverter>) -> Self {
        Self {
            default,
            by_flag: BTreeMap::new(),
        }
    }

    pub fn with_flag_converter(mut self, flag: Flag, converter: Arc<dyn TypeConverter>) -> Self {
        self.by_flag.insert(flag, converter);
        self
    }

    pub fn select(&self, flags: &Flags) -> Arc<dyn TypeConverter> {
        flags
            .iter()
            .find_map(|flag| self.by_flag.get(flag))
            .unwrap_or(&self.default)
            .clone()
    }
}
