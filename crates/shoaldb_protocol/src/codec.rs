//! Request text assembly.
//!
//! Callers at the C boundary hand over documents, queries and updates as
//! JSON text. The builder splices those fragments into the request object
//! verbatim; it never parses or re-serializes them, so a malformed fragment
//! reaches the engine unchanged and is reported there as a `parse` error.

use crate::verb::Verb;

/// Incremental builder for `{"op": .., ..}` request text.
///
/// # Example
///
/// ```
/// use shoaldb_protocol::{CommandBuilder, Verb};
///
/// let text = CommandBuilder::new(Verb::Insert)
///     .str_field("collection", "users")
///     .raw_field("doc", r#"{"name":"Ada"}"#)
///     .finish();
/// assert_eq!(text, r#"{"op":"insert","collection":"users","doc":{"name":"Ada"}}"#);
/// ```
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    buf: String,
}

impl CommandBuilder {
    /// Starts a request for `verb`.
    pub fn new(verb: Verb) -> Self {
        let mut buf = String::with_capacity(64);
        buf.push_str("{\"op\":");
        push_json_string(&mut buf, verb.name());
        Self { buf }
    }

    /// Adds a string argument, JSON-escaped.
    #[must_use]
    pub fn str_field(mut self, name: &str, value: &str) -> Self {
        self.push_key(name);
        push_json_string(&mut self.buf, value);
        self
    }

    /// Adds a string argument when present.
    #[must_use]
    pub fn opt_str_field(self, name: &str, value: Option<&str>) -> Self {
        match value {
            Some(value) => self.str_field(name, value),
            None => self,
        }
    }

    /// Adds a JSON fragment exactly as given.
    ///
    /// An empty fragment is emitted as `null` so the request object stays
    /// delimited; the engine then rejects it by shape.
    #[must_use]
    pub fn raw_field(mut self, name: &str, json: &str) -> Self {
        self.push_key(name);
        let trimmed = json.trim();
        if trimmed.is_empty() {
            self.buf.push_str("null");
        } else {
            self.buf.push_str(trimmed);
        }
        self
    }

    /// Adds an integer argument.
    #[must_use]
    pub fn int_field(mut self, name: &str, value: i64) -> Self {
        self.push_key(name);
        self.buf.push_str(&value.to_string());
        self
    }

    /// Closes the object and returns the request text.
    pub fn finish(mut self) -> String {
        self.buf.push('}');
        self.buf
    }

    fn push_key(&mut self, name: &str) {
        self.buf.push(',');
        push_json_string(&mut self.buf, name);
        self.buf.push(':');
    }
}

fn push_json_string(buf: &mut String, value: &str) {
    buf.push('"');
    for ch in value.chars() {
        match ch {
            '"' => buf.push_str("\\\""),
            '\\' => buf.push_str("\\\\"),
            '\n' => buf.push_str("\\n"),
            '\r' => buf.push_str("\\r"),
            '\t' => buf.push_str("\\t"),
            c if (c as u32) < 0x20 => buf.push_str(&format!("\\u{:04x}", c as u32)),
            c => buf.push(c),
        }
    }
    buf.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn unit_verb() {
        assert_eq!(CommandBuilder::new(Verb::Ping).finish(), r#"{"op":"ping"}"#);
    }

    #[test]
    fn strings_are_escaped() {
        let text = CommandBuilder::new(Verb::CreateCollection)
            .str_field("collection", "we\"ird\\na\nme\u{1}")
            .finish();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["collection"], json!("we\"ird\\na\nme\u{1}"));
    }

    #[test]
    fn raw_fragments_are_spliced_verbatim() {
        let text = CommandBuilder::new(Verb::Find)
            .str_field("collection", "c")
            .raw_field("query", r#"{"a": 1.50}"#)
            .finish();
        assert_eq!(text, r#"{"op":"find","collection":"c","query":{"a": 1.50}}"#);
    }

    #[test]
    fn malformed_fragment_passes_through() {
        let text = CommandBuilder::new(Verb::Insert)
            .str_field("collection", "c")
            .raw_field("doc", "{not json")
            .finish();
        assert!(text.contains("{not json"));
        assert!(serde_json::from_str::<Value>(&text).is_err());
    }

    #[test]
    fn optional_and_integer_fields() {
        let text = CommandBuilder::new(Verb::Search)
            .str_field("query", "fox")
            .opt_str_field("bucket", None)
            .int_field("limit", -1)
            .finish();
        assert_eq!(text, r#"{"op":"search","query":"fox","limit":-1}"#);
    }

    #[test]
    fn empty_fragment_becomes_null() {
        let text = CommandBuilder::new(Verb::Insert).raw_field("doc", "  ").finish();
        assert_eq!(text, r#"{"op":"insert","doc":null}"#);
    }
}
