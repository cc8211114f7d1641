// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Incoming command decoding.

use crate::bottle::{Bottle, BottleError, Value};
use crate::reply::ReplyFormat;

const FORMAT_TOKEN: &str = "format=json";

/// A decoded command: verb, positional arguments and requested encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub verb: String,
    pub args: Bottle,
    pub format: ReplyFormat,
}

impl Request {
    /// Decode a command bottle.
    ///
    /// Strips the `NAME_SERVER` and `bot` prefixes and any `format=json`
    /// token or `(format json)` option; the latter two select the
    /// structured encoding.
    pub fn parse(cmd: &Bottle) -> Self {
        let mut cmd = cmd.clone();
        let mut format = ReplyFormat::Legacy;

        if cmd.find("format").map(Value::text).as_deref() == Some("json") {
            format = ReplyFormat::Structured;
        }
        let before = cmd.len();
        cmd.retain(|v| !is_format_option(v));
        if cmd.len() != before {
            format = ReplyFormat::Structured;
        }

        loop {
            match cmd.get(0).and_then(Value::as_str) {
                Some("NAME_SERVER") => cmd = cmd.tail(),
                Some("bot") => {
                    format = ReplyFormat::Structured;
                    cmd = cmd.tail();
                }
                _ => break,
            }
        }

        Self {
            verb: cmd.text_at(0),
            args: cmd.tail(),
            format,
        }
    }

    /// Decode one line of command text.
    pub fn from_text(line: &str) -> Result<Self, BottleError> {
        Ok(Self::parse(&Bottle::from_text(line)?))
    }

    /// Positional argument `index` as text, empty when missing.
    pub fn arg(&self, index: usize) -> String {
        self.args.text_at(index)
    }

    /// Build a request directly (used for internal re-dispatch and tests).
    pub fn new(verb: &str, args: &[&str]) -> Self {
        let mut b = Bottle::new();
        for a in args {
            b.add_str(*a);
        }
        Self {
            verb: verb.to_string(),
            args: b,
            format: ReplyFormat::Legacy,
        }
    }

    pub fn structured(mut self) -> Self {
        self.format = ReplyFormat::Structured;
        self
    }
}

fn is_format_option(v: &Value) -> bool {
    match v {
        Value::Str(s) => s == FORMAT_TOKEN,
        Value::List(b) => b.get(0).and_then(Value::as_str) == Some("format"),
        Value::Int(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_command() {
        let r = Request::from_text("query /cam").unwrap();
        assert_eq!(r.verb, "query");
        assert_eq!(r.arg(0), "/cam");
        assert_eq!(r.format, ReplyFormat::Legacy);
    }

    #[test]
    fn test_prefixes() {
        let r = Request::from_text("NAME_SERVER bot list /a").unwrap();
        assert_eq!(r.verb, "list");
        assert_eq!(r.arg(0), "/a");
        assert_eq!(r.format, ReplyFormat::Structured);
    }

    #[test]
    fn test_format_options() {
        let r = Request::from_text("list /a format=json").unwrap();
        assert_eq!(r.format, ReplyFormat::Structured);
        assert_eq!(r.args.len(), 1);

        let r = Request::from_text("query /x (format json)").unwrap();
        assert_eq!(r.format, ReplyFormat::Structured);
        assert_eq!(r.args.len(), 1);
    }

    #[test]
    fn test_numeric_args_as_text() {
        let r = Request::from_text("register /p tcp 10.0.0.1 10005").unwrap();
        assert_eq!(r.arg(3), "10005");
        assert_eq!(r.args.get(3).and_then(Value::as_int), Some(10005));
    }
}
