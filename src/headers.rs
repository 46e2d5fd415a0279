use crate::error::{Error, Result};
use crate::frame::Protocol;

// Header keys recognized by the client.
pub const HDR_ACCEPT_VERSION: &str = "accept-version";
pub const HDR_ACK: &str = "ack";
pub const HDR_CONTENT_LENGTH: &str = "content-length";
pub const HDR_CONTENT_TYPE: &str = "content-type";
pub const HDR_DESTINATION: &str = "destination";
pub const HDR_HEART_BEAT: &str = "heart-beat";
pub const HDR_HOST: &str = "host";
pub const HDR_ID: &str = "id";
pub const HDR_LOGIN: &str = "login";
pub const HDR_MESSAGE_ID: &str = "message-id";
pub const HDR_PASSCODE: &str = "passcode";
pub const HDR_RECEIPT: &str = "receipt";
pub const HDR_RECEIPT_ID: &str = "receipt-id";
pub const HDR_SESSION: &str = "session";
pub const HDR_SUBSCRIPTION: &str = "subscription";
pub const HDR_TRANSACTION: &str = "transaction";
pub const HDR_VERSION: &str = "version";

/// Pseudo-header: suppress automatic `content-type` insertion. Consumed by
/// the serializer, never transmitted.
pub const HDR_SUPPRESS_CT: &str = "suppress-content-type";
/// Pseudo-header: suppress automatic `content-length` insertion. Consumed by
/// the serializer, never transmitted.
pub const HDR_SUPPRESS_CL: &str = "suppress-content-length";

/// Ordered STOMP headers: a sequence of (key, value) pairs.
///
/// Order is preserved on the wire and duplicate keys are allowed; when a
/// header is looked up by key the first occurrence wins, per STOMP 1.1+
/// semantics. This is deliberately not a map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn with_capacity(n: usize) -> Self {
        Self(Vec::with_capacity(n))
    }

    /// Append a header pair (builder style).
    pub fn add(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.push((key.into(), value.into()));
        self
    }

    /// Append a header pair in place.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push((key.into(), value.into()));
    }

    /// Value of the first header matching `key`, if any.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.iter().any(|(k, _)| k == key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, String)> {
        self.0.iter()
    }

    /// Remove every header matching `key`, returning true if any was present.
    pub(crate) fn remove_all(&mut self, key: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|(k, _)| k != key);
        self.0.len() != before
    }

    /// Check that every key and value is legal for the given protocol level.
    ///
    /// NUL is never allowed. Under STOMP 1.0 there is no escape mechanism,
    /// so raw LF and CR are rejected as well; 1.1+ escapes them on the wire.
    pub fn validate(&self, protocol: Protocol) -> Result<()> {
        for (k, v) in &self.0 {
            for s in [k.as_str(), v.as_str()] {
                if s.contains('\0') {
                    return Err(Error::InvalidHeaderValue);
                }
                if protocol == Protocol::V10 && (s.contains('\n') || s.contains('\r')) {
                    return Err(Error::InvalidHeaderValue);
                }
            }
        }
        Ok(())
    }
}

impl From<Vec<(String, String)>> for Headers {
    fn from(pairs: Vec<(String, String)>) -> Self {
        Self(pairs)
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = &'a (String, String);
    type IntoIter = std::slice::Iter<'a, (String, String)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Escape a header key or value for wire transmission under STOMP 1.1+.
///
/// The four canonical pairs: `\` → `\\`, LF → `\n`, CR → `\r`, `:` → `\c`.
pub fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            _ => out.push(ch),
        }
    }
    out
}

/// Reverse [`escape`]. Decoding is strict: a backslash followed by anything
/// other than `\`, `n`, `r` or `c` (or a trailing backslash) is an error.
pub fn unescape(input: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(input.len());
    let mut iter = input.iter();
    while let Some(&b) = iter.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }
        match iter.next() {
            Some(b'\\') => out.push(b'\\'),
            Some(b'n') => out.push(b'\n'),
            Some(b'r') => out.push(b'\r'),
            Some(b'c') => out.push(b':'),
            _ => return Err(Error::MalformedFrame),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_occurrence_wins() {
        let h = Headers::new().add("k", "first").add("k", "second");
        assert_eq!(h.value("k"), Some("first"));
        assert_eq!(h.len(), 2);
    }

    #[test]
    fn escape_round_trip() {
        let original = "a:b\\c\nd\re";
        let wire = escape(original);
        assert_eq!(wire, "a\\cb\\\\c\\nd\\re");
        let back = unescape(wire.as_bytes()).unwrap();
        assert_eq!(String::from_utf8(back).unwrap(), original);
    }

    #[test]
    fn unescape_rejects_unknown_sequence() {
        assert_eq!(unescape(b"bad\\t"), Err(Error::MalformedFrame));
        assert_eq!(unescape(b"trailing\\"), Err(Error::MalformedFrame));
    }

    #[test]
    fn validate_rejects_nul_always() {
        let h = Headers::new().add("k", "a\0b");
        assert!(h.validate(Protocol::V12).is_err());
        assert!(h.validate(Protocol::V10).is_err());
    }

    #[test]
    fn validate_lf_only_rejected_on_10() {
        let h = Headers::new().add("k", "a\nb");
        assert!(h.validate(Protocol::V10).is_err());
        assert!(h.validate(Protocol::V11).is_ok());
    }
}
