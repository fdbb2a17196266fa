//! Command-argument encoding.
//!
//! `original_source/include/redis/stream.hpp`'s `write_to` overload set
//! accepts `std::string`, `double`, any integral type, or a pre-built
//! `redis::types::string`/`vector`, and serializes each the same way: as a
//! RESP bulk string, except a pre-built value is serialized using its own
//! `serialize()`. `Arg` is the Rust equivalent of that overload set — a
//! closed sum type with `From` impls standing in for the C++ template
//! overloads.

use crate::resp::Value;
use bytes::Bytes;

/// One command argument. Strings, integers, and floats are always sent as
/// RESP bulk strings (§4.4's resolution of the Integer-argument bug in
/// spec.md §9): RESP servers expect arrays of bulk strings, never a mix of
/// bulk strings and `Integer` frames, as command arguments.
#[derive(Debug, Clone)]
pub enum Arg {
    Bulk(Bytes),
    /// A fully-formed RESP value, embedded as-is rather than re-wrapped in
    /// a bulk string.
    Value(Value),
}

impl Arg {
    pub fn serialize_into(&self, array: &mut Vec<Value>) {
        match self {
            Arg::Bulk(bytes) => array.push(Value::BulkString(bytes.clone())),
            Arg::Value(value) => array.push(value.clone()),
        }
    }
}

impl From<&str> for Arg {
    fn from(s: &str) -> Self {
        Arg::Bulk(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for Arg {
    fn from(s: String) -> Self {
        Arg::Bulk(Bytes::from(s.into_bytes()))
    }
}

impl From<&[u8]> for Arg {
    fn from(s: &[u8]) -> Self {
        Arg::Bulk(Bytes::copy_from_slice(s))
    }
}

impl From<Bytes> for Arg {
    fn from(b: Bytes) -> Self {
        Arg::Bulk(b)
    }
}

impl From<f64> for Arg {
    fn from(d: f64) -> Self {
        Arg::Bulk(Bytes::from(d.to_string().into_bytes()))
    }
}

impl From<Value> for Arg {
    fn from(v: Value) -> Self {
        Arg::Value(v)
    }
}

macro_rules! impl_arg_from_integer {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Arg {
                fn from(n: $t) -> Self {
                    Arg::Bulk(Bytes::from(n.to_string().into_bytes()))
                }
            }
        )*
    };
}

impl_arg_from_integer!(i8, i16, i32, i64, u8, u16, u32, u64, usize, isize);

/// Encodes a command as a RESP Array of bulk strings (§6: "Every command is
/// a RESP Array of BulkStrings"), e.g. `SET my_key my_value` becomes
/// `*3\r\n$3\r\nSET\r\n$6\r\nmy_key\r\n$8\r\nmy_value\r\n`.
pub fn encode_command(args: &[Arg]) -> Value {
    let mut items = Vec::with_capacity(args.len());
    for arg in args {
        arg.serialize_into(&mut items);
    }
    Value::Array(items)
}
