// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Textual bottles.
//!
//! A bottle is a list of values (strings, integers, nested lists) with a
//! plain-text rendering used on the name server wire:
//!
//! ```text
//! register /camera tcp ... 0
//! old (registration name /camera ip 10.0.0.4 port 10002 type tcp)
//! port (name /camera) (ip 10.0.0.4) (port_number 10002) (carrier tcp)
//! ```
//!
//! Strings that would not survive a round trip as bare tokens (empty,
//! containing whitespace, quotes or parentheses, or looking like integers)
//! are rendered quoted.

use std::fmt;
use thiserror::Error;

/// Bottle parse errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BottleError {
    #[error("unbalanced parentheses at offset {0}")]
    Unbalanced(usize),

    #[error("unterminated string starting at offset {0}")]
    UnterminatedString(usize),
}

/// A single bottle element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Str(String),
    List(Bottle),
}

impl Value {
    /// String content, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Integer content, if this is an integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Nested list, if this is a list.
    pub fn as_list(&self) -> Option<&Bottle> {
        match self {
            Self::List(b) => Some(b),
            _ => None,
        }
    }

    /// Unquoted textual form: raw string, decimal integer, or rendered list.
    pub fn text(&self) -> String {
        match self {
            Self::Str(s) => s.clone(),
            Self::Int(i) => i.to_string(),
            Self::List(b) => b.to_string(),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<Bottle> for Value {
    fn from(b: Bottle) -> Self {
        Self::List(b)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{}", i),
            Self::Str(s) if is_bare(s) => f.write_str(s),
            Self::Str(s) => {
                f.write_str("\"")?;
                for c in s.chars() {
                    match c {
                        '"' => f.write_str("\\\"")?,
                        '\\' => f.write_str("\\\\")?,
                        '\n' => f.write_str("\\n")?,
                        c => write!(f, "{}", c)?,
                    }
                }
                f.write_str("\"")
            }
            Self::List(b) => write!(f, "({})", b),
        }
    }
}

fn is_bare(s: &str) -> bool {
    !s.is_empty()
        && s.parse::<i64>().is_err()
        && !s
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '(' | ')' | '\\'))
}

/// Ordered list of values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bottle {
    items: Vec<Value>,
}

impl Bottle {
    /// Create an empty bottle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the textual form.
    pub fn from_text(text: &str) -> Result<Self, BottleError> {
        let mut stack: Vec<Bottle> = vec![Bottle::new()];
        let mut chars = text.char_indices().peekable();

        while let Some(&(at, c)) = chars.peek() {
            if c.is_whitespace() {
                chars.next();
                continue;
            }
            match c {
                '(' => {
                    chars.next();
                    stack.push(Bottle::new());
                }
                ')' => {
                    chars.next();
                    if stack.len() < 2 {
                        return Err(BottleError::Unbalanced(at));
                    }
                    let done = stack.pop().unwrap_or_default();
                    if let Some(parent) = stack.last_mut() {
                        parent.push(Value::List(done));
                    }
                }
                '"' => {
                    chars.next();
                    let mut s = String::new();
                    let mut closed = false;
                    while let Some((_, c)) = chars.next() {
                        match c {
                            '"' => {
                                closed = true;
                                break;
                            }
                            '\\' => match chars.next() {
                                Some((_, 'n')) => s.push('\n'),
                                Some((_, other)) => s.push(other),
                                None => break,
                            },
                            c => s.push(c),
                        }
                    }
                    if !closed {
                        return Err(BottleError::UnterminatedString(at));
                    }
                    if let Some(top) = stack.last_mut() {
                        top.push(Value::Str(s));
                    }
                }
                _ => {
                    let mut token = String::new();
                    while let Some(&(_, c)) = chars.peek() {
                        if c.is_whitespace() || c == '(' || c == ')' {
                            break;
                        }
                        token.push(c);
                        chars.next();
                    }
                    let value = match token.parse::<i64>() {
                        Ok(i) => Value::Int(i),
                        Err(_) => Value::Str(token),
                    };
                    if let Some(top) = stack.last_mut() {
                        top.push(value);
                    }
                }
            }
        }

        if stack.len() != 1 {
            return Err(BottleError::Unbalanced(text.len()));
        }
        Ok(stack.pop().unwrap_or_default())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.items.get(index)
    }

    /// Textual form of element `index`, or an empty string when absent.
    pub fn text_at(&self, index: usize) -> String {
        self.items.get(index).map(Value::text).unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.items.iter()
    }

    pub fn push(&mut self, value: Value) -> &mut Self {
        self.items.push(value);
        self
    }

    pub fn add_str(&mut self, s: impl Into<String>) -> &mut Self {
        self.push(Value::Str(s.into()))
    }

    pub fn add_int(&mut self, i: i64) -> &mut Self {
        self.push(Value::Int(i))
    }

    pub fn add_list(&mut self, b: Bottle) -> &mut Self {
        self.push(Value::List(b))
    }

    /// Two-element `(key value)` list.
    pub fn pair(key: &str, value: impl Into<Value>) -> Self {
        let mut b = Self::new();
        b.add_str(key);
        b.push(value.into());
        b
    }

    /// Everything but the first element.
    pub fn tail(&self) -> Self {
        Self {
            items: self.items.iter().skip(1).cloned().collect(),
        }
    }

    /// Look up `key` among nested `(key value)` lists.
    pub fn find(&self, key: &str) -> Option<&Value> {
        self.items.iter().find_map(|v| {
            let list = v.as_list()?;
            match list.get(0) {
                Some(Value::Str(k)) if k == key => list.get(1),
                _ => None,
            }
        })
    }

    /// Remove every element matching `pred`.
    pub fn retain(&mut self, pred: impl FnMut(&Value) -> bool) {
        self.items.retain(pred);
    }
}

impl fmt::Display for Bottle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, v) in self.items.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", v)?;
        }
        Ok(())
    }
}

impl FromIterator<Value> for Bottle {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}
