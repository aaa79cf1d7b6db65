//! URL-encoded query string and form body parsing.
//!
//! Implements `application/x-www-form-urlencoded` decoding per the WHATWG URL
//! living standard: parameters split on `&`, names and values split on the
//! first `=`, `+` decoded to space, percent-escapes resolved in the charset
//! of the enclosing document (UTF-8 unless a form declares otherwise).

use crate::http::types::Charset;
use memchr::memchr;

/// Decodes percent-escapes in `raw`, optionally treating `+` as space.
///
/// Invalid escape sequences are kept literally, per the WHATWG standard.
///
/// # Examples
/// ```
/// use hearth_web::query::percent_decode;
///
/// assert_eq!(percent_decode(b"foo%20bar", false), b"foo bar");
/// assert_eq!(percent_decode(b"a+b", true), b"a b");
/// assert_eq!(percent_decode(b"a+b", false), b"a+b");
/// assert_eq!(percent_decode(b"100%", false), b"100%");
/// ```
pub fn percent_decode(raw: &[u8], plus_as_space: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;

    while i < raw.len() {
        match raw[i] {
            b'%' => match (raw.get(i + 1), raw.get(i + 2)) {
                (Some(&hi), Some(&lo)) if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit() => {
                    out.push(hex_value(hi) << 4 | hex_value(lo));
                    i += 3;
                }
                _ => {
                    out.push(b'%');
                    i += 1;
                }
            },
            b'+' if plus_as_space => {
                out.push(b' ');
                i += 1;
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }

    out
}

#[inline(always)]
fn hex_value(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        _ => digit - b'A' + 10,
    }
}

/// Ordered multi-valued parameter map.
///
/// Parameter names keep their first-arrival order; repeated names accumulate
/// values in arrival order.
///
/// # Examples
/// ```
/// use hearth_web::Params;
///
/// let mut params = Params::new();
/// params.add("a".into(), "1".into());
/// params.add("b".into(), "2".into());
/// params.add("a".into(), "3".into());
///
/// assert_eq!(params.get("a"), Some("1"));
/// assert_eq!(params.get_all("a"), Some(&["1".to_string(), "3".to_string()][..]));
/// assert_eq!(params.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    entries: Vec<(String, Vec<String>)>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a value for `name`, creating the entry on first use.
    pub fn add(&mut self, name: String, value: String) {
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, values)) => values.push(value),
            None => self.entries.push((name, vec![value])),
        }
    }

    /// First value for `name`. Case-sensitive, like form field names.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, values)| values[0].as_str())
    }

    /// Every value for `name` in arrival order.
    pub fn get_all(&self, name: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, values)| values.as_slice())
    }

    /// `(name, values)` pairs in first-arrival order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_slice()))
    }

    /// Number of distinct parameter names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends every entry of `other` after the entries of `self`.
    pub(crate) fn extend_from(&mut self, other: &Params) {
        for (name, values) in &other.entries {
            for value in values {
                self.add(name.clone(), value.clone());
            }
        }
    }
}

/// Parses URL-encoded `name=value` pairs into `into`.
///
/// Empty segments (`a&&b`) are skipped; a segment without `=` becomes a
/// parameter with an empty value.
pub(crate) fn parse_encoded(data: &[u8], charset: Charset, into: &mut Params) {
    let mut start = 0;

    while start < data.len() {
        let end = memchr(b'&', &data[start..])
            .map(|pos| start + pos)
            .unwrap_or(data.len());
        let segment = &data[start..end];
        start = end + 1;

        if segment.is_empty() {
            continue;
        }

        let (name, value) = match memchr(b'=', segment) {
            Some(split) => (&segment[..split], &segment[split + 1..]),
            None => (segment, &b""[..]),
        };

        into.add(
            charset.decode(&percent_decode(name, true)),
            charset.decode(&percent_decode(value, true)),
        );
    }
}
