//! Ordered request/response option maps.
//!
//! Header names compare case-insensitively but keep their original case
//! for emission, and insertion order is observable: the map is a plain
//! vector of `(name, value)` pairs, not a hash map. Pseudo-options
//! (request method, target, version, status code) live in the same map
//! under reserved `_`-prefixed keys and are never emitted by
//! [`OptionMap::header_string`].

use bytes::Bytes;

/// Reserved pseudo-option keys.
pub mod keys {
    /// Request method, default `GET`.
    pub const REQUEST_METHOD: &str = "_request_method";
    /// Request target (origin-form path, or absolute URL through an HTTP
    /// pass-through proxy).
    pub const URL: &str = "_url";
    /// Request HTTP version, default `HTTP/1.1`.
    pub const HTTP_VERSION: &str = "_http_version";
    /// Response status code, set by the header parser.
    pub const STATUS_CODE: &str = "_status_code";
}

/// An ordered, case-insensitive multimap of option names to values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionMap {
    entries: Vec<(String, String)>,
}

impl OptionMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. Duplicate names are allowed and preserved.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Replace the first entry with this name, or append if absent.
    pub fn replace(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(&name))
        {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Find the first value for a name, case-insensitively.
    pub fn find(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Remove every entry with this name. Returns whether any matched.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.entries.len() != before
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of entries, pseudo-options included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Join the non-pseudo entries as `Name: value\r\n` lines with a
    /// trailing CRLF, in insertion order.
    pub fn header_string(&self) -> String {
        let mut out = String::new();
        for (name, value) in &self.entries {
            if name.starts_with('_') {
                continue;
            }
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        out
    }
}

/// Options describing the request to send.
///
/// Beyond ordinary headers the map carries the method, target, and
/// version pseudo-options; the inline request body is binary and held
/// separately as [`Bytes`].
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    map: OptionMap,
    body: Option<Bytes>,
}

impl RequestOptions {
    /// Create empty request options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. Duplicate names are allowed and preserved.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.map.insert(name, value);
        self
    }

    /// Replace the first entry with this name, or append if absent.
    pub fn replace(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.map.replace(name, value);
        self
    }

    /// Find the first value for a name, case-insensitively.
    pub fn find(&self, name: &str) -> Option<&str> {
        self.map.find(name)
    }

    /// Remove every entry with this name.
    pub fn remove(&mut self, name: &str) -> bool {
        self.map.remove(name)
    }

    /// The request method, default `GET`.
    pub fn method(&self) -> &str {
        self.map.find(keys::REQUEST_METHOD).unwrap_or("GET")
    }

    /// The request HTTP version, default `HTTP/1.1`.
    pub fn http_version(&self) -> &str {
        self.map.find(keys::HTTP_VERSION).unwrap_or("HTTP/1.1")
    }

    /// Set the inline request body.
    pub fn set_body(&mut self, body: impl Into<Bytes>) -> &mut Self {
        self.body = Some(body.into());
        self
    }

    /// The inline request body, if any.
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Take the inline request body out of the options.
    pub fn take_body(&mut self) -> Option<Bytes> {
        self.body.take()
    }

    /// Whether the caller asked for the `Expect: 100-continue`
    /// subprotocol.
    pub fn expects_continue(&self) -> bool {
        self.find("Expect")
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("100-continue"))
    }

    /// Access the underlying map.
    pub fn as_map(&self) -> &OptionMap {
        &self.map
    }

    /// Drop all entries and the body.
    pub fn clear(&mut self) {
        self.map.clear();
        self.body = None;
    }
}

/// The parsed response head: status code plus returned headers.
#[derive(Debug, Clone, Default)]
pub struct ResponseOptions {
    map: OptionMap,
}

impl ResponseOptions {
    /// Create empty response options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.map.insert(name, value);
    }

    /// Replace the first entry with this name, or append if absent.
    /// Keeps the status code current across interim responses.
    pub fn replace(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.map.replace(name, value);
    }

    /// Find the first value for a name, case-insensitively.
    pub fn find(&self, name: &str) -> Option<&str> {
        self.map.find(name)
    }

    /// The response status code, if a status line has been parsed.
    pub fn status_code(&self) -> Option<u16> {
        self.map.find(keys::STATUS_CODE)?.parse().ok()
    }

    /// Iterate entries in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter()
    }

    /// Drop all entries. Done at the start of every request.
    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// Access the underlying map.
    pub fn as_map(&self) -> &OptionMap {
        &self.map
    }
}
