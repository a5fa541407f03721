// Copyright 2020 Alex Dukhno
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Bijective encoding of scalar values, rows and composite keys.
//!
//! Runtime cell representation, following the shape of the teacher's
//! `representation::Datum`, but packed with the separator scheme this
//! system's index range-scans depend on rather than a tag+length binary
//! format.

use pshard_kernel::{Error, Result};

/// The separator forbidden inside stored values (§4.1, Design Notes §9).
pub const SEP: u8 = 0x1E;
const QUOTE: u8 = b'"';
const NULL_LITERAL: &[u8] = b"NULL";

/// The four scalar types this system supports (spec §1 Non-goals).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ColumnType {
    SignedInt,
    UnsignedInt,
    Text,
    DateTime,
}

/// A runtime value. `Null` is representable for every column type.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Value {
    SignedInt(i64),
    UnsignedInt(u64),
    Text(String),
    DateTime(String),
    Null,
}

impl Value {
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Value::SignedInt(_) => Some(ColumnType::SignedInt),
            Value::UnsignedInt(_) => Some(ColumnType::UnsignedInt),
            Value::Text(_) => Some(ColumnType::Text),
            Value::DateTime(_) => Some(ColumnType::DateTime),
            Value::Null => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_signed_int(&self) -> Option<i64> {
        match self {
            Value::SignedInt(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_unsigned_int(&self) -> Option<u64> {
        match self {
            Value::UnsignedInt(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(v) | Value::DateTime(v) => Some(v.as_str()),
            _ => None,
        }
    }
}

fn reject_separator(bytes: &[u8]) -> Result<()> {
    if bytes.contains(&SEP) {
        Err(Error::invalid_argument(
            "stored values may not contain the field separator byte (0x1E)",
        ))
    } else {
        Ok(())
    }
}

/// Encodes a single value's bytes (without any trailing separator).
pub fn encode_value(value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::Null => Ok(NULL_LITERAL.to_vec()),
        Value::SignedInt(v) => Ok(v.to_string().into_bytes()),
        Value::UnsignedInt(v) => Ok(v.to_string().into_bytes()),
        Value::Text(s) | Value::DateTime(s) => {
            reject_separator(s.as_bytes())?;
            let mut bytes = Vec::with_capacity(s.len() + 1);
            bytes.push(QUOTE);
            bytes.extend_from_slice(s.as_bytes());
            Ok(bytes)
        }
    }
}

/// Decodes a single field's bytes back into a `Value`, using `ty` to
/// disambiguate signed/unsigned and text/datetime (the wire shape of both
/// pairs is otherwise identical).
pub fn decode_value(bytes: &[u8], ty: ColumnType) -> Result<Value> {
    if bytes == NULL_LITERAL {
        return Ok(Value::Null);
    }
    match ty {
        ColumnType::SignedInt => std::str::from_utf8(bytes)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .map(Value::SignedInt)
            .ok_or_else(|| Error::internal("corrupt signed int encoding")),
        ColumnType::UnsignedInt => std::str::from_utf8(bytes)
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Value::UnsignedInt)
            .ok_or_else(|| Error::internal("corrupt unsigned int encoding")),
        ColumnType::Text | ColumnType::DateTime => {
            if bytes.first() != Some(&QUOTE) {
                return Err(Error::internal("corrupt text encoding: missing quote sentinel"));
            }
            let s = std::str::from_utf8(&bytes[1..])
                .map_err(|_| Error::internal("corrupt text encoding: invalid utf8"))?
                .to_owned();
            Ok(if ty == ColumnType::Text {
                Value::Text(s)
            } else {
                Value::DateTime(s)
            })
        }
    }
}

/// Encodes a full row: each column's bytes followed by the separator
/// (§4.1: "the concatenation of per-column encodings followed by the
/// separator").
pub fn encode_row(values: &[Value]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for value in values {
        out.extend_from_slice(&encode_value(value)?);
        out.push(SEP);
    }
    Ok(out)
}

/// Splits an encoded row into its raw per-column byte slices, without
/// decoding any of them — used for residual WHERE evaluation and index
/// maintenance so a full decode is never required just to filter.
pub fn split_fields(row: &[u8]) -> Vec<&[u8]> {
    let mut fields = Vec::new();
    let mut start = 0;
    for (i, &b) in row.iter().enumerate() {
        if b == SEP {
            fields.push(&row[start..i]);
            start = i + 1;
        }
    }
    fields
}

/// Extracts the n-th field's raw bytes without decoding the rest of the row.
pub fn extract_field(row: &[u8], column_index: usize) -> Result<&[u8]> {
    split_fields(row)
        .get(column_index)
        .copied()
        .ok_or_else(|| Error::internal("column index out of bounds for encoded row"))
}

/// Decodes an entire row given the column types in order.
pub fn decode_row(row: &[u8], column_types: &[ColumnType]) -> Result<Vec<Value>> {
    let fields = split_fields(row);
    if fields.len() != column_types.len() {
        return Err(Error::internal(format!(
            "encoded row has {} fields, schema expects {}",
            fields.len(),
            column_types.len()
        )));
    }
    fields
        .into_iter()
        .zip(column_types.iter())
        .map(|(bytes, ty)| decode_value(bytes, *ty))
        .collect()
}

/// Replaces the n-th field of an encoded row with a new value, reassembling
/// the row without touching the other fields' bytes.
pub fn replace_field(row: &[u8], column_index: usize, new_value: &Value) -> Result<Vec<u8>> {
    let mut fields: Vec<&[u8]> = split_fields(row);
    if column_index >= fields.len() {
        return Err(Error::internal("column index out of bounds for encoded row"));
    }
    let encoded = encode_value(new_value)?;
    fields[column_index] = &encoded;
    let mut out = Vec::new();
    for field in fields {
        out.extend_from_slice(field);
        out.push(SEP);
    }
    Ok(out)
}

/// Builds a shard key `kind ‖ SEP ‖ subject_id ‖ SEP` (§4.1, §6). Dropping
/// the trailing separator would make this a prefix of a different subject
/// whose id happens to start with this one's bytes, so it is always kept.
pub fn shard_key(kind: &str, subject_id: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    reject_separator(kind.as_bytes())?;
    out.extend_from_slice(kind.as_bytes());
    out.push(SEP);
    out.extend_from_slice(&encode_value(subject_id)?);
    out.push(SEP);
    Ok(out)
}

/// The well-known shard key for the default (unattributed) partition.
pub fn default_shard_key() -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"default");
    out.push(SEP);
    out.push(SEP);
    out
}

/// Builds a row key: `shard_key ‖ pk_bytes`.
pub fn row_key(shard_key: &[u8], pk: &Value) -> Result<Vec<u8>> {
    let mut out = shard_key.to_vec();
    out.extend_from_slice(&encode_value(pk)?);
    Ok(out)
}

/// Builds an index key: `shard_key ‖ indexed_value ‖ SEP ‖ pk ‖ SEP`.
pub fn index_key(shard_key: &[u8], indexed_value: &Value, pk: &Value) -> Result<Vec<u8>> {
    let mut out = shard_key.to_vec();
    out.extend_from_slice(&encode_value(indexed_value)?);
    out.push(SEP);
    out.extend_from_slice(&encode_value(pk)?);
    out.push(SEP);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(test)]
    mod value_round_trip {
        use super::*;

        #[test]
        fn signed_int() {
            let v = Value::SignedInt(-42);
            let bytes = encode_value(&v).unwrap();
            assert_eq!(bytes, b"-42");
            assert_eq!(decode_value(&bytes, ColumnType::SignedInt).unwrap(), v);
        }

        #[test]
        fn unsigned_int() {
            let v = Value::UnsignedInt(42);
            let bytes = encode_value(&v).unwrap();
            assert_eq!(bytes, b"42");
            assert_eq!(decode_value(&bytes, ColumnType::UnsignedInt).unwrap(), v);
        }

        #[test]
        fn text() {
            let v = Value::Text("hello".to_owned());
            let bytes = encode_value(&v).unwrap();
            assert_eq!(bytes, b"\"hello");
            assert_eq!(decode_value(&bytes, ColumnType::Text).unwrap(), v);
        }

        #[test]
        fn datetime() {
            let v = Value::DateTime("2020-01-01".to_owned());
            let bytes = encode_value(&v).unwrap();
            assert_eq!(decode_value(&bytes, ColumnType::DateTime).unwrap(), v);
        }

        #[test]
        fn null_is_distinguishable_from_the_string_null() {
            let null_value = Value::Null;
            let string_null = Value::Text("NULL".to_owned());

            let null_bytes = encode_value(&null_value).unwrap();
            let string_null_bytes = encode_value(&string_null).unwrap();

            assert_ne!(null_bytes, string_null_bytes);
            assert_eq!(decode_value(&null_bytes, ColumnType::Text).unwrap(), Value::Null);
            assert_eq!(
                decode_value(&string_null_bytes, ColumnType::Text).unwrap(),
                Value::Text("NULL".to_owned())
            );
        }

        #[test]
        fn rejects_separator_byte_in_text() {
            let v = Value::Text(String::from_utf8(vec![SEP]).unwrap());
            assert!(encode_value(&v).is_err());
        }
    }

    #[test]
    fn row_round_trip_over_all_types_including_null() {
        let schema = vec![
            ColumnType::SignedInt,
            ColumnType::UnsignedInt,
            ColumnType::Text,
            ColumnType::DateTime,
            ColumnType::Text,
        ];
        let row = vec![
            Value::SignedInt(-7),
            Value::UnsignedInt(7),
            Value::Text("x".to_owned()),
            Value::DateTime("2021-02-03".to_owned()),
            Value::Null,
        ];
        let encoded = encode_row(&row).unwrap();
        assert_eq!(decode_row(&encoded, &schema).unwrap(), row);
    }

    #[test]
    fn extract_field_does_not_require_decoding_other_fields() {
        let row = encode_row(&[Value::SignedInt(1), Value::Text("corrupt-me".to_owned())]).unwrap();
        assert_eq!(extract_field(&row, 0).unwrap(), b"1");
        assert_eq!(extract_field(&row, 1).unwrap(), b"\"corrupt-me");
    }

    #[test]
    fn replace_field_rewrites_only_the_target_column() {
        let row = encode_row(&[Value::SignedInt(1), Value::Text("a".to_owned())]).unwrap();
        let updated = replace_field(&row, 1, &Value::Text("b".to_owned())).unwrap();
        let schema = vec![ColumnType::SignedInt, ColumnType::Text];
        assert_eq!(
            decode_row(&updated, &schema).unwrap(),
            vec![Value::SignedInt(1), Value::Text("b".to_owned())]
        );
    }

    #[test]
    fn shard_key_is_prefixed_by_kind_and_subject() {
        let key = shard_key("user", &Value::UnsignedInt(1)).unwrap();
        assert_eq!(key, b"user\x1E1\x1E");
    }

    #[test]
    fn row_key_extends_the_shard_key_with_the_pk() {
        let shard = shard_key("user", &Value::UnsignedInt(1)).unwrap();
        let key = row_key(&shard, &Value::UnsignedInt(10)).unwrap();
        assert!(key.starts_with(&shard));
        assert_eq!(&key[shard.len()..], b"10");
    }

    #[test]
    fn index_key_orders_value_then_pk_each_terminated() {
        let shard = shard_key("user", &Value::UnsignedInt(1)).unwrap();
        let key = index_key(&shard, &Value::UnsignedInt(10), &Value::UnsignedInt(100)).unwrap();
        assert_eq!(key, [shard.as_slice(), b"10\x1E100\x1E"].concat());
    }
}
