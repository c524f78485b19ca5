//! Byte codecs for dictionary values.
//!
//! Every codec produces an *order-preserving* encoding: comparing two encodings
//! as unsigned bytes gives the same answer as comparing the values natively
//! (numerically for numbers, by code point for strings). Run files, merges and
//! section searches can therefore all use plain byte comparison.
//!
//! Fixed-width codecs always produce 8 big-endian bytes, which doubles as the
//! "sortable u64" used by bitmap dictionaries.

pub mod term;
pub mod varint;

use std::cmp::Ordering;

use crate::error::{Error, Result};

pub use term::{Kind, LiteralGroup, Term, XsdDatatype};

const SIGN_BIT: u64 = 1 << 63;

/// How the values of one dictionary are turned into bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ValueCodec {
    /// Raw UTF-8: IRIs, blank nodes, strings, language strings, dates, custom types.
    Utf8 = 1,
    Boolean = 2,
    Int8 = 3,
    Int16 = 4,
    Int32 = 5,
    Int64 = 6,
    Double = 7,
    Float = 8,
    Decimal = 9,
    /// Four (or more) digit years, possibly negative.
    Year = 10,
}

impl ValueCodec {
    pub fn tag(self) -> u16 {
        self as u16
    }

    pub fn from_tag(v: u16) -> Option<Self> {
        use ValueCodec::*;
        Some(match v {
            1 => Utf8,
            2 => Boolean,
            3 => Int8,
            4 => Int16,
            5 => Int32,
            6 => Int64,
            7 => Double,
            8 => Float,
            9 => Decimal,
            10 => Year,
            _ => return None,
        })
    }

    /// True when every value fits in 64 bits; such dictionaries are stored as a bitmap.
    pub fn is_fixed_width(self) -> bool {
        !matches!(self, ValueCodec::Utf8 | ValueCodec::Decimal)
    }

    /// Encode a lexical form. `None` means the lexical form is outside the
    /// value space of this codec.
    pub fn encode(self, lex: &str) -> Option<Vec<u8>> {
        let sortable = match self {
            ValueCodec::Utf8 => return Some(lex.as_bytes().to_vec()),
            ValueCodec::Decimal => return encode_decimal(lex),
            ValueCodec::Boolean => match lex.trim() {
                "true" | "1" => 1,
                "false" | "0" => 0,
                _ => return None,
            },
            ValueCodec::Int8 => sortable_i64(parse_int(lex, i8::MIN as i64, i8::MAX as i64)?),
            ValueCodec::Int16 => {
                sortable_i64(parse_int(lex, i16::MIN as i64, i16::MAX as i64)?)
            }
            ValueCodec::Int32 => {
                sortable_i64(parse_int(lex, i32::MIN as i64, i32::MAX as i64)?)
            }
            ValueCodec::Int64 => sortable_i64(parse_int(lex, i64::MIN, i64::MAX)?),
            ValueCodec::Year => sortable_i64(parse_year(lex)?),
            ValueCodec::Double => sortable_f64(parse_double(lex)?),
            ValueCodec::Float => sortable_f64(parse_double(lex)? as f32 as f64),
        };
        Some(sortable.to_be_bytes().to_vec())
    }

    /// Decode bytes back to the canonical lexical form.
    pub fn decode(self, bytes: &[u8]) -> Result<String> {
        match self {
            ValueCodec::Utf8 => std::str::from_utf8(bytes)
                .map(String::from)
                .map_err(|_| Error::corrupt("utf8")),
            ValueCodec::Decimal => {
                decode_decimal(bytes).ok_or_else(|| Error::corrupt("decimal encoding"))
            }
            _ => {
                let v = self
                    .to_sortable_u64(bytes)
                    .ok_or_else(|| Error::corrupt("fixed-width value must be 8 bytes"))?;
                Ok(self.lexical_of_sortable(v))
            }
        }
    }

    /// Byte-order comparator, consistent with the native value order.
    pub fn compare(self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    /// Read the 8-byte sortable form of a fixed-width value.
    pub fn to_sortable_u64(self, bytes: &[u8]) -> Option<u64> {
        if !self.is_fixed_width() {
            return None;
        }
        let arr: [u8; 8] = bytes.try_into().ok()?;
        Some(u64::from_be_bytes(arr))
    }

    pub fn from_sortable_u64(self, v: u64) -> Vec<u8> {
        v.to_be_bytes().to_vec()
    }

    fn lexical_of_sortable(self, v: u64) -> String {
        match self {
            ValueCodec::Boolean => {
                if v == 0 {
                    "false".to_string()
                } else {
                    "true".to_string()
                }
            }
            ValueCodec::Int8 | ValueCodec::Int16 | ValueCodec::Int32 | ValueCodec::Int64 => {
                unsortable_i64(v).to_string()
            }
            ValueCodec::Year => {
                let y = unsortable_i64(v);
                if y < 0 {
                    format!("-{:04}", -(y as i128))
                } else {
                    format!("{:04}", y)
                }
            }
            ValueCodec::Double => format_double(unsortable_f64(v)),
            ValueCodec::Float => format_float(unsortable_f64(v) as f32),
            ValueCodec::Utf8 | ValueCodec::Decimal => unreachable!("not fixed width"),
        }
    }
}

fn sortable_i64(v: i64) -> u64 {
    (v as u64) ^ SIGN_BIT
}

fn unsortable_i64(v: u64) -> i64 {
    (v ^ SIGN_BIT) as i64
}

fn sortable_f64(v: f64) -> u64 {
    let v = if v.is_nan() { f64::NAN } else { v };
    let b = v.to_bits();
    if b & SIGN_BIT != 0 {
        !b
    } else {
        b | SIGN_BIT
    }
}

fn unsortable_f64(v: u64) -> f64 {
    let b = if v & SIGN_BIT != 0 { v & !SIGN_BIT } else { !v };
    f64::from_bits(b)
}

fn parse_int(lex: &str, min: i64, max: i64) -> Option<i64> {
    let s = lex.trim();
    let s = s.strip_prefix('+').unwrap_or(s);
    if s.is_empty() || s.starts_with('+') {
        return None;
    }
    let v: i64 = s.parse().ok()?;
    (min..=max).contains(&v).then_some(v)
}

fn parse_year(lex: &str) -> Option<i64> {
    let s = lex.trim();
    let s = s.strip_suffix('Z').unwrap_or(s);
    let (neg, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    if digits.len() < 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let y: i64 = digits.parse().ok()?;
    Some(if neg { -y } else { y })
}

fn parse_double(lex: &str) -> Option<f64> {
    match lex.trim() {
        "INF" | "+INF" => Some(f64::INFINITY),
        "-INF" => Some(f64::NEG_INFINITY),
        "NaN" => Some(f64::NAN),
        s => {
            // Rust also accepts "inf"/"infinity", which XSD does not.
            if s.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') {
                return None;
            }
            s.parse().ok()
        }
    }
}

fn format_double(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v.is_infinite() {
        if v > 0.0 { "INF" } else { "-INF" }.to_string()
    } else {
        format!("{}", v)
    }
}

fn format_float(v: f32) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v.is_infinite() {
        if v > 0.0 { "INF" } else { "-INF" }.to_string()
    } else {
        format!("{}", v)
    }
}

// Decimal layout: zero is [0x80]. Positive values are [0xC0][exp][digits],
// negative values [0x40][!exp][!digits][0xFF], where the value is
// 0.d1d2d3... x 10^exp with d1 != 0 and no trailing zero digits.
const DEC_NEG: u8 = 0x40;
const DEC_ZERO: u8 = 0x80;
const DEC_POS: u8 = 0xC0;

fn encode_decimal(lex: &str) -> Option<Vec<u8>> {
    let s = lex.trim();
    let (neg, body) = match s.as_bytes().first()? {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };
    let (int_part, frac_part) = match body.split_once('.') {
        Some((i, f)) => (i, f),
        None => (body, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }
    let int_part = int_part.trim_start_matches('0');
    let frac_part = frac_part.trim_end_matches('0');
    let (exp, digits) = if !int_part.is_empty() {
        let mut d = String::with_capacity(int_part.len() + frac_part.len());
        d.push_str(int_part);
        d.push_str(frac_part);
        (int_part.len() as i64, d.trim_end_matches('0').to_string())
    } else {
        let lead = frac_part.len() - frac_part.trim_start_matches('0').len();
        (-(lead as i64), frac_part[lead..].to_string())
    };
    if digits.is_empty() {
        return Some(vec![DEC_ZERO]);
    }
    let exp = i16::try_from(exp).ok()?;
    let exp_bytes = ((exp as u16) ^ 0x8000).to_be_bytes();
    let mut out = Vec::with_capacity(digits.len() + 4);
    if neg {
        out.push(DEC_NEG);
        out.extend(exp_bytes.iter().map(|b| !b));
        out.extend(digits.bytes().map(|b| !b));
        out.push(0xFF);
    } else {
        out.push(DEC_POS);
        out.extend_from_slice(&exp_bytes);
        out.extend_from_slice(digits.as_bytes());
    }
    Some(out)
}

fn decode_decimal(bytes: &[u8]) -> Option<String> {
    let (&tag, rest) = bytes.split_first()?;
    let (neg, exp_bytes, digits): (bool, [u8; 2], Vec<u8>) = match tag {
        DEC_ZERO => return Some("0.0".to_string()),
        DEC_POS if rest.len() >= 3 => (false, [rest[0], rest[1]], rest[2..].to_vec()),
        DEC_NEG if rest.len() >= 4 && rest[rest.len() - 1] == 0xFF => (
            true,
            [!rest[0], !rest[1]],
            rest[2..rest.len() - 1].iter().map(|b| !b).collect(),
        ),
        _ => return None,
    };
    if !digits.iter().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let exp = (u16::from_be_bytes(exp_bytes) ^ 0x8000) as i16 as i64;
    let digits = String::from_utf8(digits).ok()?;
    let n = digits.len() as i64;
    let mut out = String::new();
    if neg {
        out.push('-');
    }
    if exp <= 0 {
        out.push_str("0.");
        out.extend(std::iter::repeat('0').take((-exp) as usize));
        out.push_str(&digits);
    } else if exp >= n {
        out.push_str(&digits);
        out.extend(std::iter::repeat('0').take((exp - n) as usize));
        out.push_str(".0");
    } else {
        out.push_str(&digits[..exp as usize]);
        out.push('.');
        out.push_str(&digits[exp as usize..]);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enc(c: ValueCodec, s: &str) -> Vec<u8> {
        c.encode(s).unwrap_or_else(|| panic!("{s} should encode"))
    }

    #[test]
    fn integer_encoding_orders_like_numbers() {
        let vals = ["-9000", "-1", "0", "+7", "42", "9223372036854775807"];
        let encoded: Vec<_> = vals.iter().map(|v| enc(ValueCodec::Int64, v)).collect();
        for w in encoded.windows(2) {
            assert!(w[0] < w[1]);
        }
        assert_eq!(ValueCodec::Int64.decode(&encoded[3]).unwrap(), "7");
        assert!(ValueCodec::Int8.encode("300").is_none());
        assert!(ValueCodec::Int32.encode("abc").is_none());
    }

    #[test]
    fn double_encoding_orders_like_numbers() {
        let vals = ["-INF", "-1e10", "-0.5", "0", "1.5E-3", "2", "INF", "NaN"];
        let encoded: Vec<_> = vals.iter().map(|v| enc(ValueCodec::Double, v)).collect();
        for w in encoded.windows(2) {
            assert!(w[0] < w[1], "{:?}", w);
        }
        assert_eq!(ValueCodec::Double.decode(&encoded[4]).unwrap(), "0.0015");
        assert_eq!(ValueCodec::Double.decode(&encoded[0]).unwrap(), "-INF");
        assert!(ValueCodec::Double.encode("infinity").is_none());
    }

    #[test]
    fn decimal_canonical_and_ordered() {
        assert_eq!(
            enc(ValueCodec::Decimal, "1.0"),
            enc(ValueCodec::Decimal, "01.000")
        );
        let vals = ["-12.3", "-5", "-0.05", "0", "0.05", "0.5", "5", "12.3", "120"];
        let encoded: Vec<_> = vals.iter().map(|v| enc(ValueCodec::Decimal, v)).collect();
        for w in encoded.windows(2) {
            assert!(w[0] < w[1], "{:?}", w);
        }
        let back: Vec<_> = encoded
            .iter()
            .map(|e| ValueCodec::Decimal.decode(e).unwrap())
            .collect();
        assert_eq!(
            back,
            ["-12.3", "-5.0", "-0.05", "0.0", "0.05", "0.5", "5.0", "12.3", "120.0"]
        );
        assert!(ValueCodec::Decimal.encode("1.2.3").is_none());
        assert!(ValueCodec::Decimal.encode(".").is_none());
    }

    #[test]
    fn year_and_boolean() {
        assert!(enc(ValueCodec::Year, "-0044") < enc(ValueCodec::Year, "2021"));
        assert_eq!(
            ValueCodec::Year.decode(&enc(ValueCodec::Year, "-0044")).unwrap(),
            "-0044"
        );
        assert!(ValueCodec::Year.encode("21").is_none());
        assert_eq!(enc(ValueCodec::Boolean, "1"), enc(ValueCodec::Boolean, "true"));
        assert_eq!(
            ValueCodec::Boolean
                .decode(&enc(ValueCodec::Boolean, "false"))
                .unwrap(),
            "false"
        );
    }

    #[test]
    fn tags_roundtrip() {
        for tag in 1..=10u16 {
            assert_eq!(ValueCodec::from_tag(tag).unwrap().tag(), tag);
        }
        assert!(ValueCodec::from_tag(0).is_none());
        assert!(!ValueCodec::Utf8.is_fixed_width());
        assert!(ValueCodec::Double.is_fixed_width());
    }
}
