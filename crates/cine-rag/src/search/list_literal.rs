//! Adapter for structured values that arrive as text.
//!
//! Models and agent action groups sometimes send `"['Kate', 'Leonardo']"` or
//! `"[{'director': 'Michael Mann'}]"` instead of real JSON. This is the only
//! place such text is parsed.
//!
//! Grammar:
//!
//! ```text
//! value  := list | object | quoted | bare
//! list   := '[' (value? (',' value?)*)? ']'        empty elements are skipped
//! object := '{' (key ':' value (',' key ':' value)*)? ','? '}'
//! quoted := '...' | "..."                          '\' escapes the next char
//! bare   := text up to the next structural char, trimmed
//! ```
//!
//! A single quote only closes a string when the next non-blank char is one
//! of `, ] } :` or the end of input, so `'Conan O'Brien'` reads as one string.
//! Bare `None`/`null`, `True`/`False` and numbers become JSON null, booleans
//! and numbers; other bare text stays a string.

use serde_json::{Map, Value};

use crate::error::{RagError, RagResult};

const STRUCTURAL: [char; 4] = [',', ']', '}', ':'];

/// Parse a bracketed list of scalars into strings.
pub fn parse(text: &str) -> RagResult<Vec<String>> {
    if !text.trim_start().starts_with('[') {
        return Err(invalid(text, "expected a bracket-delimited list"));
    }
    let Value::Array(items) = parse_value(text)? else {
        return Err(invalid(text, "expected a bracket-delimited list"));
    };

    let mut values = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::String(s) => values.push(s),
            Value::Number(n) => values.push(n.to_string()),
            Value::Bool(b) => values.push(b.to_string()),
            Value::Null => {}
            _ => return Err(invalid(text, "nested values are not allowed in a list of values")),
        }
    }
    Ok(values)
}

/// Parse a Python-style literal (lists, dicts, quoted strings) into JSON.
pub fn parse_value(text: &str) -> RagResult<Value> {
    let mut parser = Parser {
        text,
        chars: text.chars().collect(),
        pos: 0,
    };
    let value = parser.value(&[])?.unwrap_or(Value::Null);
    parser.skip_whitespace();
    if parser.peek().is_some() {
        return Err(invalid(text, "unexpected text after value"));
    }
    Ok(value)
}

struct Parser<'a> {
    text: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    /// `None` is an empty element.
    fn value(&mut self, terminators: &[char]) -> RagResult<Option<Value>> {
        self.skip_whitespace();
        match self.peek() {
            None => Ok(None),
            Some('[') => self.list().map(Some),
            Some('{') => self.object().map(Some),
            Some(quote @ ('\'' | '"')) => self.quoted(quote).map(|s| Some(Value::String(s))),
            Some(c) if terminators.contains(&c) => Ok(None),
            Some(_) => Ok(self.bare(terminators)),
        }
    }

    fn list(&mut self) -> RagResult<Value> {
        self.next();
        let mut items = Vec::new();
        loop {
            self.skip_whitespace();
            if self.peek() == Some(']') {
                self.next();
                break;
            }
            if let Some(item) = self.value(&[',', ']'])? {
                items.push(item);
            }
            self.skip_whitespace();
            match self.next() {
                Some(',') => {}
                Some(']') => break,
                None => return Err(self.error("unterminated list")),
                Some(_) => return Err(self.error("expected ','")),
            }
        }
        Ok(Value::Array(items))
    }

    fn object(&mut self) -> RagResult<Value> {
        self.next();
        let mut map = Map::new();
        loop {
            self.skip_whitespace();
            if self.peek() == Some('}') {
                self.next();
                break;
            }
            let key = match self.value(&[':'])? {
                Some(Value::String(key)) => key,
                Some(Value::Number(n)) => n.to_string(),
                _ => return Err(self.error("expected a key")),
            };
            self.skip_whitespace();
            if self.next() != Some(':') {
                return Err(self.error("expected ':' after key"));
            }
            let value = self.value(&[',', '}'])?.unwrap_or(Value::Null);
            map.insert(key, value);

            self.skip_whitespace();
            match self.next() {
                Some(',') => {}
                Some('}') => break,
                None => return Err(self.error("unterminated object")),
                Some(_) => return Err(self.error("expected ','")),
            }
        }
        Ok(Value::Object(map))
    }

    fn quoted(&mut self, quote: char) -> RagResult<String> {
        self.next();
        let mut value = String::new();
        while let Some(c) = self.next() {
            match c {
                '\\' => {
                    if let Some(escaped) = self.next() {
                        value.push(escaped);
                    }
                }
                c if c == quote => {
                    if quote == '"' || self.closes_here() {
                        return Ok(value);
                    }
                    value.push(c);
                }
                c => value.push(c),
            }
        }
        Err(self.error("unterminated quoted element"))
    }

    /// Whether the quote just consumed ends the string.
    fn closes_here(&self) -> bool {
        self.chars[self.pos..]
            .iter()
            .find(|c| !c.is_whitespace())
            .map_or(true, |c| STRUCTURAL.contains(c))
    }

    fn bare(&mut self, terminators: &[char]) -> Option<Value> {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if terminators.contains(&c) {
                break;
            }
            text.push(c);
            self.pos += 1;
        }
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        Some(match text {
            "None" | "null" => Value::Null,
            "True" | "true" => Value::Bool(true),
            "False" | "false" => Value::Bool(false),
            _ => text
                .parse::<i64>()
                .map(Value::from)
                .or_else(|_| text.parse::<f64>().map(Value::from))
                .unwrap_or_else(|_| Value::String(text.to_string())),
        })
    }

    fn error(&self, reason: &str) -> RagError {
        invalid(self.text, reason)
    }
}

fn invalid(text: &str, reason: &str) -> RagError {
    RagError::Validation(format!("cannot parse list value {:?}: {}", text, reason))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_single_quoted() {
        assert_eq!(parse("['Kate', 'Leonardo']").unwrap(), vec!["Kate", "Leonardo"]);
    }

    #[test]
    fn test_double_quoted_with_comma_inside() {
        let items = parse(r#"["Crouching Tiger, Hidden Dragon", "Hero"]"#).unwrap();
        assert_eq!(items, vec!["Crouching Tiger, Hidden Dragon", "Hero"]);
    }

    #[test]
    fn test_unquoted_and_mixed() {
        assert_eq!(parse("[Action, 'Thriller' ,Crime]").unwrap(), vec!["Action", "Thriller", "Crime"]);
    }

    #[test]
    fn test_escaped_quote() {
        assert_eq!(parse(r"['Schindler\'s List']").unwrap(), vec!["Schindler's List"]);
    }

    #[test]
    fn test_bare_apostrophe_inside_single_quotes() {
        assert_eq!(
            parse("['Schindler's List', 'Conan O'Brien']").unwrap(),
            vec!["Schindler's List", "Conan O'Brien"]
        );
    }

    #[test]
    fn test_empty_list_and_empty_elements() {
        assert!(parse("[]").unwrap().is_empty());
        assert_eq!(parse("['a', , 'b',]").unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(parse("'Kate', 'Leo'").is_err());
        assert!(parse("['Kate").is_err());
        assert!(parse("['Kate' x]").is_err());
        assert!(parse("[['nested']]").is_err());
    }

    #[test]
    fn test_list_of_objects() {
        let value = parse_value("[{'actors': 'Conan O'Brien'}, {'year': 2014, 'genres': ['Action', 'Crime']}]").unwrap();
        assert_eq!(
            value,
            json!([{"actors": "Conan O'Brien"}, {"year": 2014, "genres": ["Action", "Crime"]}])
        );
    }

    #[test]
    fn test_bare_keywords() {
        assert_eq!(parse_value("{'a': None, 'b': True, 'c': 7.5}").unwrap(), json!({"a": null, "b": true, "c": 7.5}));
    }

    #[test]
    fn test_rejects_malformed_objects() {
        assert!(parse_value("[{'director' 'Mann'}]").is_err());
        assert!(parse_value("[{'director': 'Mann'}").is_err());
        assert!(parse_value("{'a': 1} trailing").is_err());
    }
}
