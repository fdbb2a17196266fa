//! RESP v2 parsing.
//!
//! Grounded on `entangled90-rdis`'s `rdis::parser` (same `nom` combinator
//! style, same lead-byte dispatch), but built on `nom::*::streaming`
//! combinators rather than `::complete` ones. The teacher's parser matched on
//! `nom::Err::Incomplete` to detect a truncated frame, but `complete`
//! combinators never produce that variant on short input — they report a
//! plain `Error` instead, so `need_more` could never legitimately trigger.
//! `streaming` combinators restore the contract the spec actually asks for
//! (§4.2: "the caller invokes `parse` repeatedly ... until `need_more ==
//! true`").

use super::value::Value;
use bytes::Bytes;
use nom::{
    branch::alt,
    bytes::streaming::take,
    character::streaming::{char, crlf, digit1},
    combinator::{map_res, opt, recognize},
    multi::count,
    sequence::{preceded, terminated, tuple},
    IResult,
};

fn decimal(input: &[u8]) -> IResult<&[u8], i64> {
    map_res(recognize(tuple((opt(char('-')), digit1))), |bytes: &[u8]| {
        // digit1/opt(char('-')) only admit ASCII digits and '-', so the
        // from_utf8 always succeeds; the i64 parse itself can still fail on
        // a length/count field that overflows, which map_res turns into an
        // ordinary recoverable parse error instead of a panic.
        std::str::from_utf8(bytes).unwrap().parse::<i64>()
    })(input)
}

fn simple_string(input: &[u8]) -> IResult<&[u8], Value> {
    let (rest, payload) = preceded(char('+'), terminated(line_body, crlf))(input)?;
    Ok((rest, Value::SimpleString(Bytes::copy_from_slice(payload))))
}

fn error(input: &[u8]) -> IResult<&[u8], Value> {
    let (rest, payload) = preceded(char('-'), terminated(line_body, crlf))(input)?;
    Ok((rest, Value::Error(Bytes::copy_from_slice(payload))))
}

fn integer(input: &[u8]) -> IResult<&[u8], Value> {
    let (rest, n) = preceded(char(':'), terminated(decimal, crlf))(input)?;
    Ok((rest, Value::Integer(n)))
}

// A SimpleString/Error payload has no interior CR (§4.1), so reading up to
// the next CRLF is a correct, restartable parse of the payload bytes.
fn line_body(input: &[u8]) -> IResult<&[u8], &[u8]> {
    use nom::bytes::streaming::take_until;
    take_until("\r\n")(input)
}

fn bulk_string(input: &[u8]) -> IResult<&[u8], Value> {
    let (rest, len) = preceded(char('$'), terminated(decimal, crlf))(input)?;
    if len < 0 {
        return Ok((rest, Value::NullBulkString));
    }
    let (rest, payload) = terminated(take(len as usize), crlf)(rest)?;
    Ok((rest, Value::BulkString(Bytes::copy_from_slice(payload))))
}

fn array(input: &[u8]) -> IResult<&[u8], Value> {
    let (rest, len) = preceded(char('*'), terminated(decimal, crlf))(input)?;
    if len < 0 {
        return Ok((rest, Value::NullArray));
    }
    let (rest, items) = count(value, len as usize)(rest)?;
    Ok((rest, Value::Array(items)))
}

fn value(input: &[u8]) -> IResult<&[u8], Value> {
    alt((simple_string, error, integer, bulk_string, array))(input)
}

/// Outcome of a single call to [`parse`].
#[derive(Debug)]
pub enum Parsed {
    /// A complete value was parsed; `consumed` bytes should be dropped from
    /// the caller's buffer.
    Complete { value: Value, consumed: usize },
    /// Not enough bytes were buffered to complete a frame. The caller should
    /// append more bytes and retry; none of the input was consumed.
    Incomplete,
    /// The buffered bytes do not form a valid RESP frame at all.
    Invalid,
}

/// Attempts to parse exactly one RESP value from the front of `input`.
///
/// Mirrors `redis::parser::parse` from `original_source/src/parser.cc`: scan
/// for one of `+ - : $ *` (tolerating leading noise, a defensive allowance
/// the original also makes) and delegate to the matching combinator.
pub fn parse(input: &[u8]) -> Parsed {
    let mut skip = 0;
    while skip < input.len() && !matches!(input[skip], b'+' | b'-' | b':' | b'$' | b'*') {
        skip += 1;
    }
    if skip == input.len() {
        return Parsed::Incomplete;
    }

    match value(&input[skip..]) {
        Ok((rest, v)) => Parsed::Complete {
            value: v,
            consumed: skip + (input.len() - skip - rest.len()),
        },
        Err(nom::Err::Incomplete(_)) => Parsed::Incomplete,
        Err(_) => Parsed::Invalid,
    }
}

/// Incremental wrapper around [`parse`] that tracks `need_more` as its own
/// field, matching `redis::parser`'s public shape (`parse`, `need_more`)
/// from `include/redis/parser.hpp`.
#[derive(Debug, Default)]
pub struct IncrementalParser {
    need_more: bool,
}

impl IncrementalParser {
    pub fn new() -> Self {
        IncrementalParser { need_more: false }
    }

    pub fn need_more(&self) -> bool {
        self.need_more
    }

    /// Parses a single frame out of `input`. Returns `(consumed, value)`;
    /// `value` is `None` exactly when `need_more()` is now true.
    pub fn parse(&mut self, input: &[u8]) -> Result<(usize, Option<Value>), ()> {
        match parse(input) {
            Parsed::Complete { value, consumed } => {
                self.need_more = false;
                Ok((consumed, Some(value)))
            }
            Parsed::Incomplete => {
                self.need_more = true;
                Ok((0, None))
            }
            Parsed::Invalid => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn parse_simple_string() {
        match parse(b"+OK\r\n") {
            Parsed::Complete { value, consumed } => {
                assert_eq!(value, Value::SimpleString(Bytes::from_static(b"OK")));
                assert_eq!(consumed, 5);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn parse_null_bulk_string() {
        match parse(b"$-1\r\n") {
            Parsed::Complete { value, consumed } => {
                assert_eq!(value, Value::NullBulkString);
                assert_eq!(consumed, 5);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn parse_array_of_bulk_and_integer() {
        match parse(b"*2\r\n$3\r\nfoo\r\n:42\r\n") {
            Parsed::Complete { value, consumed } => {
                assert_eq!(
                    value,
                    Value::Array(vec![
                        Value::BulkString(Bytes::from_static(b"foo")),
                        Value::Integer(42),
                    ])
                );
                assert_eq!(consumed, 18);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn parse_negative_integer() {
        match parse(b":-299\r\n") {
            Parsed::Complete { value, .. } => assert_eq!(value, Value::Integer(-299)),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn invalid_on_length_field_overflowing_i64() {
        match parse(b"$99999999999999999999\r\nhel\r\n") {
            Parsed::Invalid => {}
            other => panic!("expected invalid, got {:?}", other),
        }
    }

    #[test]
    fn incomplete_on_truncated_bulk_string() {
        match parse(b"$5\r\nhel") {
            Parsed::Incomplete => {}
            other => panic!("expected incomplete, got {:?}", other),
        }
    }

    #[test]
    fn incomplete_on_truncated_array() {
        match parse(b"*2\r\n$3\r\nfoo\r\n") {
            Parsed::Incomplete => {}
            other => panic!("expected incomplete, got {:?}", other),
        }
    }

    #[test]
    fn leaves_trailing_bytes_untouched() {
        match parse(b":299\r\nbdc") {
            Parsed::Complete { value, consumed } => {
                assert_eq!(value, Value::Integer(299));
                assert_eq!(consumed, 6);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn incremental_parser_retains_need_more_until_satisfied() {
        let mut parser = IncrementalParser::new();
        let (consumed, value) = parser.parse(b"$5\r\nhel").unwrap();
        assert_eq!(consumed, 0);
        assert!(value.is_none());
        assert!(parser.need_more());

        let (consumed, value) = parser.parse(b"$5\r\nhello\r\n").unwrap();
        assert_eq!(consumed, 11);
        assert_eq!(value, Some(Value::BulkString(Bytes::from_static(b"hello"))));
        assert!(!parser.need_more());
    }

    #[test]
    fn feeding_in_chunks_reassembles_the_same_value() {
        let whole = b"*2\r\n$5\r\nhello\r\n$5\r\nworld\r\n";
        for split in 0..whole.len() {
            let mut buf = Vec::new();
            buf.extend_from_slice(&whole[..split]);
            let mut parser = IncrementalParser::new();
            let (consumed, value) = parser.parse(&buf).unwrap();
            if value.is_some() {
                // Already complete with a short split; only possible once
                // split covers the whole frame.
                assert_eq!(split, whole.len());
                assert_eq!(consumed, whole.len());
                continue;
            }
            buf.extend_from_slice(&whole[split..]);
            let (consumed, value) = parser.parse(&buf).unwrap();
            assert_eq!(consumed, whole.len());
            assert_eq!(
                value,
                Some(Value::Array(vec![
                    Value::BulkString(Bytes::from_static(b"hello")),
                    Value::BulkString(Bytes::from_static(b"world")),
                ]))
            );
        }
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use crate::resp::value::Value;
    use bytes::BytesMut;
    use proptest::prelude::*;

    fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            any::<Vec<u8>>().prop_filter_map("no CRLF in simple strings", |bytes| {
                if bytes.windows(2).any(|w| w == b"\r\n") {
                    None
                } else {
                    Some(Value::SimpleString(Bytes::from(bytes)))
                }
            }),
            any::<i64>().prop_map(Value::Integer),
            any::<Vec<u8>>().prop_map(|b| Value::BulkString(Bytes::from(b))),
            Just(Value::NullBulkString),
            Just(Value::NullArray),
        ];
        leaf.prop_recursive(3, 16, 4, |inner| {
            prop::collection::vec(inner, 0..4).prop_map(Value::Array)
        })
    }

    proptest! {
        /// Every value this parser can produce round-trips through
        /// serialize -> parse back to the same value (§8's round-trip
        /// property, generalized across the whole grammar instead of a
        /// fixed example table).
        #[test]
        fn serialize_then_parse_round_trips(value in arb_value()) {
            let mut buf = BytesMut::new();
            value.serialize(&mut buf);
            match parse(&buf) {
                Parsed::Complete { value: parsed, consumed } => {
                    prop_assert_eq!(parsed, value);
                    prop_assert_eq!(consumed, buf.len());
                }
                other => prop_assert!(false, "expected Complete, got {:?}", other),
            }
        }

        /// Splitting a serialized value at any byte boundary and feeding it
        /// to the parser in two pieces never loses bytes and always
        /// reassembles the original value (§4.2's incremental contract).
        #[test]
        fn arbitrary_split_feeding_reassembles(value in arb_value(), split_ratio in 0.0f64..1.0) {
            let mut whole = BytesMut::new();
            value.serialize(&mut whole);
            let split = ((whole.len() as f64) * split_ratio) as usize;

            let mut parser = IncrementalParser::new();
            let mut buf = BytesMut::new();
            buf.extend_from_slice(&whole[..split]);
            let (consumed, maybe_value) = parser.parse(&buf).unwrap();

            let (consumed, maybe_value) = if maybe_value.is_some() {
                (consumed, maybe_value)
            } else {
                let _ = buf.split_to(consumed);
                buf.extend_from_slice(&whole[split..]);
                parser.parse(&buf).unwrap()
            };

            prop_assert_eq!(consumed, whole.len());
            prop_assert_eq!(maybe_value, Some(value));
        }
    }
}
