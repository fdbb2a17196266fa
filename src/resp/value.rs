use bytes::{BufMut, Bytes, BytesMut};

/// A single RESP v2 value.
///
/// `BulkString` and `Array` carry an explicit null variant rather than
/// folding it into `Option` at every call site, since RESP null is a wire
/// concept distinct from "empty" (`$0\r\n\r\n` is an empty bulk string,
/// `$-1\r\n` is null).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    SimpleString(Bytes),
    Error(Bytes),
    Integer(i64),
    BulkString(Bytes),
    NullBulkString,
    Array(Vec<Value>),
    NullArray,
}

const CRLF: &[u8] = b"\r\n";

impl Value {
    /// True once a value has a concrete payload (or is an explicit null).
    /// Every variant constructed by the parser already satisfies this; the
    /// predicate exists for callers that build `Value`s incrementally, as
    /// `Array` does internally while collecting child values.
    pub fn is_complete(&self) -> bool {
        true
    }

    pub fn ok() -> Value {
        Value::SimpleString(Bytes::from_static(b"OK"))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    pub fn bulk(bytes: impl Into<Bytes>) -> Value {
        Value::BulkString(bytes.into())
    }

    /// Serializes `self` onto `buf`, matching the wire grammar of §6.
    pub fn serialize(&self, buf: &mut BytesMut) {
        match self {
            Value::SimpleString(s) => {
                buf.put_u8(b'+');
                buf.put_slice(s);
                buf.put_slice(CRLF);
            }
            Value::Error(e) => {
                buf.put_u8(b'-');
                buf.put_slice(e);
                buf.put_slice(CRLF);
            }
            Value::Integer(n) => {
                buf.put_u8(b':');
                buf.put_slice(n.to_string().as_bytes());
                buf.put_slice(CRLF);
            }
            Value::BulkString(s) => {
                buf.put_u8(b'$');
                buf.put_slice(s.len().to_string().as_bytes());
                buf.put_slice(CRLF);
                buf.put_slice(s);
                buf.put_slice(CRLF);
            }
            Value::NullBulkString => buf.put_slice(b"$-1\r\n"),
            Value::Array(items) => {
                buf.put_u8(b'*');
                buf.put_slice(items.len().to_string().as_bytes());
                buf.put_slice(CRLF);
                for item in items {
                    item.serialize(buf);
                }
            }
            Value::NullArray => buf.put_slice(b"*-1\r\n"),
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.serialize(&mut buf);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_simple_string() {
        let mut buf = BytesMut::new();
        Value::SimpleString(Bytes::from_static(b"OK")).serialize(&mut buf);
        assert_eq!(&buf[..], b"+OK\r\n");
    }

    #[test]
    fn serialize_error() {
        let mut buf = BytesMut::new();
        Value::Error(Bytes::from_static(b"ERR bad")).serialize(&mut buf);
        assert_eq!(&buf[..], b"-ERR bad\r\n");
    }

    #[test]
    fn serialize_integer() {
        let mut buf = BytesMut::new();
        Value::Integer(-299).serialize(&mut buf);
        assert_eq!(&buf[..], b":-299\r\n");
    }

    #[test]
    fn serialize_bulk_string() {
        let mut buf = BytesMut::new();
        Value::bulk(&b"foobar"[..]).serialize(&mut buf);
        assert_eq!(&buf[..], b"$6\r\nfoobar\r\n");
    }

    #[test]
    fn serialize_null_bulk_string() {
        let mut buf = BytesMut::new();
        Value::NullBulkString.serialize(&mut buf);
        assert_eq!(&buf[..], b"$-1\r\n");
    }

    #[test]
    fn serialize_array() {
        let mut buf = BytesMut::new();
        Value::Array(vec![Value::bulk(&b"foo"[..]), Value::bulk(&b"bar"[..])]).serialize(&mut buf);
        assert_eq!(&buf[..], b"*2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n");
    }

    #[test]
    fn serialize_null_array() {
        let mut buf = BytesMut::new();
        Value::NullArray.serialize(&mut buf);
        assert_eq!(&buf[..], b"*-1\r\n");
    }

    #[test]
    fn serialize_bulk_string_with_embedded_crlf() {
        let mut buf = BytesMut::new();
        Value::bulk(&b"foo\r\nbar"[..]).serialize(&mut buf);
        assert_eq!(&buf[..], b"$8\r\nfoo\r\nbar\r\n");
    }
}
