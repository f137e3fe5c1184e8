//! Best-effort decoding of collection-typed fields.
//!
//! Exports disagree on how collections are encoded: Parquet gives native
//! lists and structs, some dumps carry the string form of a NumPy array
//! (`"array(['a', 'b'], dtype=object)"`), others Python literals with single
//! quotes and `None`. The chain below tries, in order:
//!
//! 1. the value as-is when it is already an array or mapping,
//! 2. wrapper stripping plus quote substitution, then strict JSON,
//! 3. a permissive literal parser,
//! 4. giving up, which reads as "absent".
//!
//! Nothing here returns an error; callers only see a possibly empty result.

use serde_json::{Map, Number, Value};

/// Nesting limit of the literal parser, the same bound serde_json applies.
const MAX_DEPTH: usize = 128;

/// String forms that mean "no value".
const NULL_TOKENS: &[&str] = &["", "none", "null", "nan", "[]", "{}", "()"];

pub fn is_null_token(s: &str) -> bool {
    let t = s.trim();
    NULL_TOKENS.iter().any(|tok| t.eq_ignore_ascii_case(tok))
}

/// Decode a field expected to hold a sequence.
///
/// A single mapping becomes a one-element sequence; so does a plain scalar
/// (a bare URL string, a phone number stored as a number). Null elements and
/// null-token strings are dropped.
pub fn decode_collection(value: Option<&Value>) -> Vec<Value> {
    let items = match value {
        None | Some(Value::Null) => return Vec::new(),
        Some(Value::Array(items)) => items.clone(),
        Some(Value::Object(map)) => vec![Value::Object(map.clone())],
        Some(Value::String(s)) => {
            if is_null_token(s) {
                return Vec::new();
            }
            if !looks_structured(s) {
                return vec![Value::String(s.trim().to_string())];
            }
            match decode_str(s) {
                Some(Value::Array(items)) => items,
                Some(Value::Object(map)) => vec![Value::Object(map)],
                _ => return Vec::new(),
            }
        }
        Some(scalar) => vec![scalar.clone()],
    };

    items
        .into_iter()
        .filter(|item| match item {
            Value::Null => false,
            Value::String(s) => !is_null_token(s),
            _ => true,
        })
        .collect()
}

/// Decode a field expected to hold a single mapping (`names`, `categories`).
pub fn decode_mapping(value: Option<&Value>) -> Option<Map<String, Value>> {
    match value? {
        Value::Object(map) => Some(map.clone()),
        Value::String(s) if looks_structured(s) => match decode_str(s)? {
            Value::Object(map) => Some(map),
            _ => None,
        },
        _ => None,
    }
}

/// Render a collection element as the string stored on the canonical place.
pub fn element_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn looks_structured(s: &str) -> bool {
    let t = s.trim_start();
    t.starts_with('[') || t.starts_with('{') || t.starts_with('(') || t.contains("array(")
}

/// Steps 2-4 of the chain for a string that looks like a serialized collection.
fn decode_str(s: &str) -> Option<Value> {
    let stripped = strip_array_wrapper(s.trim());

    let substituted = stripped
        .replace('\'', "\"")
        .replace("None", "null")
        .replace("True", "true")
        .replace("False", "false");
    if let Ok(v @ (Value::Array(_) | Value::Object(_))) =
        serde_json::from_str::<Value>(&substituted)
    {
        return Some(v);
    }

    match parse_literal(&stripped)? {
        v @ (Value::Array(_) | Value::Object(_)) => Some(v),
        _ => None,
    }
}

/// Remove NumPy `array(..., dtype=object)` wrappers.
fn strip_array_wrapper(s: &str) -> String {
    if !s.contains("array(") {
        return s.to_string();
    }
    s.replace("array(", "")
        .replace(", dtype=object)", "")
        .replace(')', "")
}

/// Parse a Python-style literal: lists, tuples, dicts, single- or
/// double-quoted strings, numbers, `None`, `True`, `False`.
///
/// Input nested deeper than [`MAX_DEPTH`] is rejected.
pub fn parse_literal(s: &str) -> Option<Value> {
    let mut parser = LiteralParser {
        chars: s.chars().collect(),
        pos: 0,
        depth: 0,
    };
    let value = parser.value()?;
    parser.skip_ws();
    if parser.pos == parser.chars.len() {
        Some(value)
    } else {
        None
    }
}

struct LiteralParser {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl LiteralParser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn value(&mut self) -> Option<Value> {
        self.skip_ws();
        match self.peek()? {
            '[' => self.nested(|p| p.sequence(']')),
            '(' => self.nested(|p| p.sequence(')')),
            '{' => self.nested(Self::dict),
            '\'' | '"' => self.string().map(Value::String),
            c if c == '-' || c == '+' || c == '.' || c.is_ascii_digit() => self.number(),
            c if c.is_alphabetic() || c == '_' => self.word(),
            _ => None,
        }
    }

    fn nested(&mut self, parse: impl FnOnce(&mut Self) -> Option<Value>) -> Option<Value> {
        if self.depth >= MAX_DEPTH {
            return None;
        }
        self.depth += 1;
        let value = parse(self);
        self.depth -= 1;
        value
    }

    fn sequence(&mut self, close: char) -> Option<Value> {
        self.bump();
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.peek()? == close {
                self.bump();
                return Some(Value::Array(items));
            }
            items.push(self.value()?);
            self.skip_ws();
            match self.bump()? {
                ',' => continue,
                c if c == close => return Some(Value::Array(items)),
                _ => return None,
            }
        }
    }

    fn dict(&mut self) -> Option<Value> {
        self.bump();
        let mut map = Map::new();
        loop {
            self.skip_ws();
            if self.peek()? == '}' {
                self.bump();
                return Some(Value::Object(map));
            }
            let key = match self.value()? {
                Value::String(s) => s,
                Value::Null => "None".to_string(),
                other => other.to_string(),
            };
            self.skip_ws();
            if self.bump()? != ':' {
                return None;
            }
            let value = self.value()?;
            map.insert(key, value);
            self.skip_ws();
            match self.bump()? {
                ',' => continue,
                '}' => return Some(Value::Object(map)),
                _ => return None,
            }
        }
    }

    fn string(&mut self) -> Option<String> {
        let quote = self.bump()?;
        let mut out = String::new();
        loop {
            match self.bump()? {
                '\\' => match self.bump()? {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    other => out.push(other),
                },
                c if c == quote => return Some(out),
                c => out.push(c),
            }
        }
    }

    fn number(&mut self) -> Option<Value> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'))
        {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        if let Ok(i) = text.parse::<i64>() {
            return Some(Value::Number(i.into()));
        }
        let f = text.parse::<f64>().ok()?;
        Some(Number::from_f64(f).map_or(Value::Null, Value::Number))
    }

    fn word(&mut self) -> Option<Value> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        let word: String = self.chars[start..self.pos].iter().collect();
        // String prefixes: u'..', b'..', r'..'
        if matches!(word.as_str(), "u" | "b" | "r") && matches!(self.peek(), Some('\'' | '"')) {
            return self.string().map(Value::String);
        }
        match word.as_str() {
            "None" | "null" | "nan" | "NaN" | "inf" => Some(Value::Null),
            "True" | "true" => Some(Value::Bool(true)),
            "False" | "false" => Some(Value::Bool(false)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn native_array_used_directly() {
        let v = json!(["https://a.example", "https://b.example"]);
        assert_eq!(decode_collection(Some(&v)).len(), 2);
    }

    #[test]
    fn absent_and_null_are_empty() {
        assert!(decode_collection(None).is_empty());
        assert!(decode_collection(Some(&Value::Null)).is_empty());
        assert!(decode_collection(Some(&json!("None"))).is_empty());
        assert!(decode_collection(Some(&json!("[]"))).is_empty());
    }

    #[test]
    fn single_mapping_wrapped() {
        let v = json!({"dataset": "meta", "record_id": "1"});
        let items = decode_collection(Some(&v));
        assert_eq!(items.len(), 1);
        assert!(items[0].is_object());
    }

    #[test]
    fn numpy_array_string_decoded() {
        let v = json!("array(['https://a.example', 'https://b.example'], dtype=object)");
        let items = decode_collection(Some(&v));
        assert_eq!(items, vec![json!("https://a.example"), json!("https://b.example")]);
    }

    #[test]
    fn python_list_of_dicts_decoded() {
        let v = json!("[{'dataset': 'meta', 'confidence': 0.8, 'update_time': None}]");
        let items = decode_collection(Some(&v));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["dataset"], "meta");
        assert!(items[0]["update_time"].is_null());
    }

    #[test]
    fn apostrophe_inside_string_falls_back_to_literal_parser() {
        // Quote substitution breaks on the embedded apostrophe; the literal
        // parser handles the double-quoted element.
        let v = json!(r#"["Joe's Diner", 'fb.com/joes']"#);
        let items = decode_collection(Some(&v));
        assert_eq!(items, vec![json!("Joe's Diner"), json!("fb.com/joes")]);
    }

    #[test]
    fn tuple_literal_decoded() {
        let items = decode_collection(Some(&json!("('555-1111', '555-2222')")));
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn unparseable_collection_gives_up() {
        assert!(decode_collection(Some(&json!("[unterminated, 'x'"))).is_empty());
    }

    #[test]
    fn plain_string_is_single_element() {
        let items = decode_collection(Some(&json!("https://joes.example")));
        assert_eq!(items, vec![json!("https://joes.example")]);
    }

    #[test]
    fn null_elements_dropped() {
        let items = decode_collection(Some(&json!([null, "", "555-1111"])));
        assert_eq!(items, vec![json!("555-1111")]);
    }

    #[test]
    fn mapping_decoded_from_string() {
        let m = decode_mapping(Some(&json!("{'primary': 'cafe', 'alternate': None}"))).unwrap();
        assert_eq!(m["primary"], "cafe");
        assert!(decode_mapping(Some(&json!("cafe"))).is_none());
        assert!(decode_mapping(Some(&json!(["cafe"]))).is_none());
    }

    #[test]
    fn literal_parser_handles_scalars_and_nesting() {
        let v = parse_literal("{'a': [1, 2.5, -3], 'b': (True, False), 'c': u'x',}").unwrap();
        assert_eq!(v["a"], json!([1, 2.5, -3]));
        assert_eq!(v["b"], json!([true, false]));
        assert_eq!(v["c"], "x");
        assert!(parse_literal("[1, 2] trailing").is_none());
        assert!(parse_literal("os.system('x')").is_none());
    }

    #[test]
    fn deep_nesting_is_rejected_without_overflow() {
        let deep = "[".repeat(200_000);
        assert!(parse_literal(&deep).is_none());
        assert!(decode_collection(Some(&Value::String(deep))).is_empty());

        let closed = format!("{}{}", "[".repeat(MAX_DEPTH + 1), "]".repeat(MAX_DEPTH + 1));
        assert!(parse_literal(&closed).is_none());
        let within = format!("{}{}", "[".repeat(MAX_DEPTH), "]".repeat(MAX_DEPTH));
        assert!(parse_literal(&within).is_some());
    }

    #[test]
    fn element_strings() {
        assert_eq!(element_to_string(&json!("a")), "a");
        assert_eq!(element_to_string(&json!(5551111)), "5551111");
    }
}
