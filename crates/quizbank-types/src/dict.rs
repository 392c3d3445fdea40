//! Plain keyed-mapping representation shared by every record type.
//!
//! `to_dict` output is the storage format: the key-value backend stores it
//! as JSON verbatim and the SQL backends spread it over table columns.
//! `from_dict(x.to_dict()) == x` must hold for every valid record.

use crate::error::{RecordError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

/// A record rendered as a JSON object.
pub type Dict = Map<String, Value>;

/// Conversion to and from [`Dict`].
pub trait DictConvertible: Sized {
    /// Name used for key-value namespacing and error messages.
    const TYPE_NAME: &'static str;

    fn to_dict(&self) -> Dict;

    fn from_dict(dict: &Dict) -> Result<Self>;
}

/// Serialize any record into a [`Dict`].
///
/// # Panics
///
/// If the value does not serialize to a JSON object. Every implementor is a
/// struct with named fields, so this is a bug in the record type.
pub(crate) fn serialize_to_dict<T: Serialize>(value: &T) -> Dict {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map,
        Ok(other) => panic!("record serialized to {}, not an object", type_name_of(&other)),
        Err(e) => panic!("record failed to serialize: {}", e),
    }
}

pub(crate) fn deserialize_from_dict<T: DeserializeOwned>(
    record: &'static str,
    dict: &Dict,
) -> Result<T> {
    serde_json::from_value(Value::Object(dict.clone()))
        .map_err(|e| RecordError::format(record, e))
}

/// Parse a JSON string (as stored by the backends) into a record.
pub fn from_json_str<T: DictConvertible>(text: &str) -> Result<T> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| RecordError::format(T::TYPE_NAME, e))?;
    match value {
        Value::Object(map) => T::from_dict(&map),
        other => Err(RecordError::format(
            T::TYPE_NAME,
            format!("expected a JSON object, got {}", type_name_of(&other)),
        )),
    }
}

/// Render a record as the JSON string stored by the backends.
pub fn to_json_string<T: DictConvertible>(record: &T) -> String {
    Value::Object(record.to_dict()).to_string()
}

fn type_name_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Implements [`DictConvertible`] through the record's serde derive.
macro_rules! serde_dict {
    ($ty:ty, $name:literal) => {
        impl $crate::dict::DictConvertible for $ty {
            const TYPE_NAME: &'static str = $name;

            fn to_dict(&self) -> $crate::dict::Dict {
                $crate::dict::serialize_to_dict(self)
            }

            fn from_dict(dict: &$crate::dict::Dict) -> $crate::error::Result<Self> {
                $crate::dict::deserialize_from_dict($name, dict)
            }
        }
    };
}

pub(crate) use serde_dict;
