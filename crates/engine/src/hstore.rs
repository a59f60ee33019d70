//! Text codec for key-value map literals in PostgreSQL's `hstore` syntax.
//!
//! `"a"=>"b", "c"=>NULL` is tokenized into ordered pairs. Duplicate keys are
//! not expected from the source; when they occur the JSON rendering keeps the
//! first key's position with the last value.

use serde_json::{Map, Value};

pub type Pairs = Vec<(String, Option<String>)>;

/// Tokenizes a map literal into pairs in source order.
pub fn parse(input: &str) -> Result<Pairs, String> {
    let mut parser = Parser {
        chars: input.char_indices().peekable(),
        input,
    };
    parser.pairs()
}

/// Renders pairs the way the source prints a map value.
pub fn render(pairs: &[(String, Option<String>)]) -> String {
    let mut out = String::new();
    for (i, (key, value)) in pairs.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        push_quoted(&mut out, key);
        out.push_str("=>");
        match value {
            Some(value) => push_quoted(&mut out, value),
            None => out.push_str("NULL"),
        }
    }
    out
}

/// Serializes pairs as a JSON object, keys in source order.
pub fn to_json(pairs: &[(String, Option<String>)]) -> String {
    let mut object = Map::with_capacity(pairs.len());
    for (key, value) in pairs {
        let value = match value {
            Some(value) => Value::String(value.clone()),
            None => Value::Null,
        };
        object.insert(key.clone(), value);
    }
    Value::Object(object).to_string()
}

fn push_quoted(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
}

struct Parser<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    input: &'a str,
}

impl Parser<'_> {
    fn pairs(&mut self) -> Result<Pairs, String> {
        let mut pairs = Vec::new();
        self.skip_whitespace();
        if self.chars.peek().is_none() {
            return Ok(pairs);
        }
        loop {
            let (key, _) = self.token("key")?;
            self.skip_whitespace();
            self.arrow()?;
            self.skip_whitespace();
            let (value, quoted) = self.token("value")?;
            let value = if !quoted && value.eq_ignore_ascii_case("NULL") {
                None
            } else {
                Some(value)
            };
            pairs.push((key, value));

            self.skip_whitespace();
            match self.chars.next() {
                None => return Ok(pairs),
                Some((_, ',')) => {
                    // the server's input function accepts a trailing comma
                    self.skip_whitespace();
                    if self.chars.peek().is_none() {
                        return Ok(pairs);
                    }
                }
                Some((pos, c)) => {
                    return Err(format!("expected ',' at offset {}, found '{}'", pos, c));
                }
            }
        }
    }

    fn token(&mut self, what: &str) -> Result<(String, bool), String> {
        match self.chars.peek() {
            None => Err(format!("unexpected end of input, expected {}", what)),
            Some((_, '"')) => {
                self.chars.next();
                self.quoted().map(|s| (s, true))
            }
            Some(_) => self.unquoted(what).map(|s| (s, false)),
        }
    }

    fn quoted(&mut self) -> Result<String, String> {
        let mut out = String::new();
        loop {
            match self.chars.next() {
                None => return Err("unterminated quoted string".to_string()),
                Some((_, '"')) => return Ok(out),
                Some((_, '\\')) => match self.chars.next() {
                    Some((_, c)) => out.push(c),
                    None => return Err("unterminated escape".to_string()),
                },
                Some((_, c)) => out.push(c),
            }
        }
    }

    fn unquoted(&mut self, what: &str) -> Result<String, String> {
        let mut out = String::new();
        while let Some(&(pos, c)) = self.chars.peek() {
            if c.is_whitespace() || c == ',' || self.input[pos..].starts_with("=>") {
                break;
            }
            self.chars.next();
            if c == '\\' {
                match self.chars.next() {
                    Some((_, escaped)) => out.push(escaped),
                    None => return Err("unterminated escape".to_string()),
                }
            } else {
                out.push(c);
            }
        }
        if out.is_empty() {
            let found = self
                .chars
                .peek()
                .map(|&(pos, c)| format!("'{}' at offset {}", c, pos))
                .unwrap_or_else(|| "end of input".to_string());
            return Err(format!("expected {}, found {}", what, found));
        }
        Ok(out)
    }

    fn arrow(&mut self) -> Result<(), String> {
        match (self.chars.next(), self.chars.next()) {
            (Some((_, '=')), Some((_, '>'))) => Ok(()),
            (Some((pos, _)), _) => Err(format!("expected '=>' at offset {}", pos)),
            (None, _) => Err("unexpected end of input, expected '=>'".to_string()),
        }
    }

    fn skip_whitespace(&mut self) {
        while self.chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
    }
}
