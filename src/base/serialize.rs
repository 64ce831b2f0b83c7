// This file is part of SENSA.
//
// Copyright (C) 2023 Affidaty Spa.
//
// SENSA is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the
// Free Software Foundation, either version 3 of the License, or (at your
// option) any later version.
//
// SENSA is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License
// for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with SENSA. If not, see <https://www.gnu.org/licenses/>.

//! JSON serialization helpers.
//!
//! The wire contract carries every payload as JSON text, and the block hash
//! recipe is defined over that very text, so JSON is also what the store
//! persists. Anything fancier would be a breaking change.

use crate::{Error, ErrorKind, Result};
use serde::{Deserialize, Serialize};

/// Serialize to JSON bytes.
///
/// # Error
///
/// If the data cannot be serialized a `MalformedData` error kind is returned.
pub fn json_serialize<T>(val: &T) -> Result<Vec<u8>>
where
    T: Serialize,
{
    serde_json::to_vec(val).map_err(|err| Error::new_ext(ErrorKind::MalformedData, err))
}

/// Serialize to a JSON string.
pub fn json_serialize_string<T>(val: &T) -> Result<String>
where
    T: Serialize,
{
    serde_json::to_string(val).map_err(|err| Error::new_ext(ErrorKind::MalformedData, err))
}

/// Deserialize from JSON bytes.
///
/// # Error
///
/// If the data cannot be deserialized a `MalformedData` error kind is returned.
pub fn json_deserialize<'a, T>(buf: &'a [u8]) -> Result<T>
where
    T: Deserialize<'a>,
{
    serde_json::from_slice(buf).map_err(|err| Error::new_ext(ErrorKind::MalformedData, err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Default)]
    struct MyStruct<'a> {
        name: &'a str,
        surname: String,
        values: Vec<u16>,
    }

    fn my_struct() -> MyStruct<'static> {
        MyStruct {
            name: "Davide",
            surname: "Galassi".to_string(),
            values: vec![1, 255, 384],
        }
    }

    const MY_STRUCT_JSON: &str =
        r#"{"name":"Davide","surname":"Galassi","values":[1,255,384]}"#;

    #[test]
    fn struct_serialize() {
        let buf = json_serialize(&my_struct()).unwrap();

        assert_eq!(String::from_utf8_lossy(&buf), MY_STRUCT_JSON);
    }

    #[test]
    fn struct_deserialize() {
        let val: MyStruct = json_deserialize(MY_STRUCT_JSON.as_bytes()).unwrap();

        assert_eq!(val, my_struct());
    }

    #[test]
    fn struct_deserialize_garbage() {
        let err = json_deserialize::<MyStruct>(b"not json").unwrap_err();

        assert_eq!(err.kind, ErrorKind::MalformedData);
    }
}
