// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Label selectors.
//!
//! The orchestrator query names its peers with a label selector string in the
//! Kubernetes selector syntax. The string is parsed up front so that a
//! malformed selector is reported as a [`SelectorError`] rather than as an
//! opaque failure from the API server, and so that a canonical form can be
//! sent with the query.

use std::fmt;
use std::str::FromStr;

const MAX_NAME_LEN: usize = 63;
const MAX_PREFIX_LEN: usize = 253;

/// An error produced while parsing a label selector.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectorError {
    /// The selector contained a token that does not fit the grammar.
    #[error("unexpected {found} at position {position}, expected {expected}")]
    Unexpected {
        found: String,
        position: usize,
        expected: &'static str,
    },
    /// A label key is not a valid qualified name.
    #[error("invalid label key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },
    /// A label value is not a valid label value.
    #[error("invalid label value {value:?}: {reason}")]
    InvalidValue { value: String, reason: &'static str },
    /// An `in` or `notin` requirement was given an empty set.
    #[error("invalid selector logic for {key}: empty `{operator}` set")]
    EmptySet { key: String, operator: &'static str },
    /// A `>` or `<` requirement was given a non-integer operand.
    #[error("invalid selector logic for {key}: {value:?} is not an integer")]
    NotAnInteger { key: String, value: String },
}

/// How a single label is matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelSelectionLogic {
    /// The label is set to exactly this value.
    Eq { value: String },
    /// The label is unset or set to some other value.
    NotEq { value: String },
    /// The label is set, to anything.
    Exists,
    /// The label is unset.
    NotExists,
    /// The label is set to one of these values.
    InSet { values: Vec<String> },
    /// The label is unset or set to none of these values.
    NotInSet { values: Vec<String> },
    /// The label is set to an integer greater than this one.
    GreaterThan { value: i64 },
    /// The label is set to an integer less than this one.
    LessThan { value: i64 },
}

/// A requirement on one label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelRequirement {
    pub label_name: String,
    pub logic: LabelSelectionLogic,
}

impl fmt::Display for LabelRequirement {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let key = &self.label_name;
        match &self.logic {
            LabelSelectionLogic::Eq { value } => write!(f, "{key}={value}"),
            LabelSelectionLogic::NotEq { value } => write!(f, "{key}!={value}"),
            LabelSelectionLogic::Exists => write!(f, "{key}"),
            LabelSelectionLogic::NotExists => write!(f, "!{key}"),
            LabelSelectionLogic::InSet { values } => write!(f, "{key} in ({})", values.join(",")),
            LabelSelectionLogic::NotInSet { values } => {
                write!(f, "{key} notin ({})", values.join(","))
            }
            LabelSelectionLogic::GreaterThan { value } => write!(f, "{key}>{value}"),
            LabelSelectionLogic::LessThan { value } => write!(f, "{key}<{value}"),
        }
    }
}

/// A conjunction of label requirements.
///
/// An empty selector selects every pod in the namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<LabelRequirement>,
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, requirement) in self.requirements.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{requirement}")?;
        }
        Ok(())
    }
}

impl FromStr for LabelSelector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<LabelSelector, SelectorError> {
        let tokens = lex(s);
        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            end: s.len(),
        };
        let mut requirements = vec![];
        if parser.peek().is_none() {
            return Ok(LabelSelector { requirements });
        }
        loop {
            requirements.push(parser.requirement()?);
            match parser.next() {
                None => break,
                Some((_, Token::Comma)) => continue,
                Some((position, token)) => {
                    return Err(SelectorError::Unexpected {
                        found: token.to_string(),
                        position: *position,
                        expected: "`,` or end of selector",
                    });
                }
            }
        }
        Ok(LabelSelector { requirements })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Identifier(String),
    Not,
    Eq,
    DoubleEq,
    NotEq,
    In,
    NotIn,
    Gt,
    Lt,
    OpenParen,
    CloseParen,
    Comma,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Token::Identifier(s) => write!(f, "{s:?}"),
            Token::Not => f.write_str("`!`"),
            Token::Eq => f.write_str("`=`"),
            Token::DoubleEq => f.write_str("`==`"),
            Token::NotEq => f.write_str("`!=`"),
            Token::In => f.write_str("`in`"),
            Token::NotIn => f.write_str("`notin`"),
            Token::Gt => f.write_str("`>`"),
            Token::Lt => f.write_str("`<`"),
            Token::OpenParen => f.write_str("`(`"),
            Token::CloseParen => f.write_str("`)`"),
            Token::Comma => f.write_str("`,`"),
        }
    }
}

fn is_special(c: char) -> bool {
    matches!(c, '!' | '=' | '(' | ')' | ',' | '>' | '<') || c.is_whitespace()
}

/// Splits a selector into tokens, each tagged with its byte offset.
fn lex(s: &str) -> Vec<(usize, Token)> {
    let mut tokens = vec![];
    let mut chars = s.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        let token = match c {
            c if c.is_whitespace() => continue,
            '!' if chars.next_if(|(_, c)| *c == '=').is_some() => Token::NotEq,
            '!' => Token::Not,
            '=' if chars.next_if(|(_, c)| *c == '=').is_some() => Token::DoubleEq,
            '=' => Token::Eq,
            '(' => Token::OpenParen,
            ')' => Token::CloseParen,
            ',' => Token::Comma,
            '>' => Token::Gt,
            '<' => Token::Lt,
            _ => {
                let mut end = i + c.len_utf8();
                while let Some((j, c)) = chars.next_if(|(_, c)| !is_special(*c)) {
                    end = j + c.len_utf8();
                }
                match &s[i..end] {
                    "in" => Token::In,
                    "notin" => Token::NotIn,
                    ident => Token::Identifier(ident.to_string()),
                }
            }
        };
        tokens.push((i, token));
    }
    tokens
}

struct Parser<'a> {
    tokens: &'a [(usize, Token)],
    pos: usize,
    end: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn next(&mut self) -> Option<&'a (usize, Token)> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn unexpected(&self, expected: &'static str) -> SelectorError {
        match self.tokens.get(self.pos) {
            Some((position, token)) => SelectorError::Unexpected {
                found: token.to_string(),
                position: *position,
                expected,
            },
            None => SelectorError::Unexpected {
                found: "end of selector".into(),
                position: self.end,
                expected,
            },
        }
    }

    fn identifier(&mut self, expected: &'static str) -> Result<String, SelectorError> {
        match self.peek() {
            Some(Token::Identifier(ident)) => {
                self.pos += 1;
                Ok(ident.clone())
            }
            _ => Err(self.unexpected(expected)),
        }
    }

    fn requirement(&mut self) -> Result<LabelRequirement, SelectorError> {
        let negated = if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            true
        } else {
            false
        };
        let label_name = self.identifier("a label key")?;
        validate_key(&label_name)?;
        if negated {
            return Ok(LabelRequirement {
                label_name,
                logic: LabelSelectionLogic::NotExists,
            });
        }
        let logic = match self.peek() {
            None | Some(Token::Comma) => LabelSelectionLogic::Exists,
            Some(Token::Eq | Token::DoubleEq) => {
                self.pos += 1;
                LabelSelectionLogic::Eq {
                    value: self.single_value()?,
                }
            }
            Some(Token::NotEq) => {
                self.pos += 1;
                LabelSelectionLogic::NotEq {
                    value: self.single_value()?,
                }
            }
            Some(op @ (Token::In | Token::NotIn)) => {
                self.pos += 1;
                let values = self.value_set()?;
                match (op, values.is_empty()) {
                    (Token::In, true) => {
                        return Err(SelectorError::EmptySet {
                            key: label_name,
                            operator: "in",
                        });
                    }
                    (_, true) => {
                        return Err(SelectorError::EmptySet {
                            key: label_name,
                            operator: "notin",
                        });
                    }
                    (Token::In, false) => LabelSelectionLogic::InSet { values },
                    (_, false) => LabelSelectionLogic::NotInSet { values },
                }
            }
            Some(op @ (Token::Gt | Token::Lt)) => {
                self.pos += 1;
                let operand = self.identifier("an integer")?;
                let Ok(value) = operand.parse::<i64>() else {
                    return Err(SelectorError::NotAnInteger {
                        key: label_name,
                        value: operand,
                    });
                };
                if *op == Token::Gt {
                    LabelSelectionLogic::GreaterThan { value }
                } else {
                    LabelSelectionLogic::LessThan { value }
                }
            }
            Some(_) => return Err(self.unexpected("an operator")),
        };
        Ok(LabelRequirement { label_name, logic })
    }

    /// Parses the right-hand side of `=`, `==` or `!=`, which may be empty.
    fn single_value(&mut self) -> Result<String, SelectorError> {
        let value = match self.peek() {
            None | Some(Token::Comma) => String::new(),
            Some(Token::Identifier(_)) => self.identifier("a label value")?,
            Some(_) => return Err(self.unexpected("a label value")),
        };
        validate_value(&value)?;
        Ok(value)
    }

    /// Parses a parenthesized, comma-separated list of values.
    fn value_set(&mut self) -> Result<Vec<String>, SelectorError> {
        if self.peek() != Some(&Token::OpenParen) {
            return Err(self.unexpected("`(`"));
        }
        self.pos += 1;
        let mut values = vec![];
        if self.peek() == Some(&Token::CloseParen) {
            self.pos += 1;
            return Ok(values);
        }
        loop {
            let value = match self.peek() {
                Some(Token::Identifier(_)) => self.identifier("a label value")?,
                Some(Token::Comma | Token::CloseParen) => String::new(),
                _ => return Err(self.unexpected("a label value")),
            };
            validate_value(&value)?;
            values.push(value);
            match self.peek() {
                Some(Token::Comma) => self.pos += 1,
                Some(Token::CloseParen) => {
                    self.pos += 1;
                    return Ok(values);
                }
                _ => return Err(self.unexpected("`,` or `)`")),
            }
        }
    }
}

/// Checks the `name` half of a qualified name, and label values.
fn check_name(s: &str) -> Result<(), &'static str> {
    if s.len() > MAX_NAME_LEN {
        return Err("must be no more than 63 characters");
    }
    let bytes = s.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(first), Some(last))
            if first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric() => {}
        (None, _) | (_, None) => return Err("must not be empty"),
        _ => return Err("must begin and end with an alphanumeric character"),
    }
    if !bytes
        .iter()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
    {
        return Err("may only contain alphanumerics, `-`, `_` and `.`");
    }
    Ok(())
}

/// Checks a DNS-1123 subdomain, the optional prefix of a qualified name.
fn check_prefix(s: &str) -> Result<(), &'static str> {
    if s.is_empty() {
        return Err("prefix must not be empty");
    }
    if s.len() > MAX_PREFIX_LEN {
        return Err("prefix must be no more than 253 characters");
    }
    for part in s.split('.') {
        let bytes = part.as_bytes();
        let alnum = |b: &u8| b.is_ascii_lowercase() || b.is_ascii_digit();
        let ok = match (bytes.first(), bytes.last()) {
            (Some(first), Some(last)) => {
                alnum(first) && alnum(last) && bytes.iter().all(|b| alnum(b) || *b == b'-')
            }
            _ => false,
        };
        if !ok {
            return Err("prefix must be a lowercase DNS subdomain");
        }
    }
    Ok(())
}

fn validate_key(key: &str) -> Result<(), SelectorError> {
    let invalid = |reason| SelectorError::InvalidKey {
        key: key.to_string(),
        reason,
    };
    let mut parts = key.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(name), None, None) => check_name(name).map_err(invalid),
        (Some(prefix), Some(name), None) => {
            check_prefix(prefix).map_err(invalid)?;
            check_name(name).map_err(invalid)
        }
        _ => Err(invalid("must contain at most one `/`")),
    }
}

fn validate_value(value: &str) -> Result<(), SelectorError> {
    if value.is_empty() {
        return Ok(());
    }
    check_name(value).map_err(|reason| SelectorError::InvalidValue {
        value: value.to_string(),
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> LabelSelector {
        s.parse().unwrap()
    }

    #[test]
    fn parses_each_operator() {
        let selector = parse(
            "app=influxdb, tier==data,env!=dev,zone in (a, b),!legacy,canary,\
             role notin (broker),gen>2,shard<10",
        );
        let logic: Vec<_> = selector
            .requirements
            .iter()
            .map(|r| (r.label_name.as_str(), r.logic.clone()))
            .collect();
        assert_eq!(
            logic,
            vec![
                ("app", LabelSelectionLogic::Eq { value: "influxdb".into() }),
                ("tier", LabelSelectionLogic::Eq { value: "data".into() }),
                ("env", LabelSelectionLogic::NotEq { value: "dev".into() }),
                (
                    "zone",
                    LabelSelectionLogic::InSet {
                        values: vec!["a".into(), "b".into()]
                    }
                ),
                ("legacy", LabelSelectionLogic::NotExists),
                ("canary", LabelSelectionLogic::Exists),
                (
                    "role",
                    LabelSelectionLogic::NotInSet {
                        values: vec!["broker".into()]
                    }
                ),
                ("gen", LabelSelectionLogic::GreaterThan { value: 2 }),
                ("shard", LabelSelectionLogic::LessThan { value: 10 }),
            ]
        );
    }

    #[test]
    fn canonical_form() {
        assert_eq!(
            parse(" app = influxdb ,zone in (a,b), !legacy ").to_string(),
            "app=influxdb,zone in (a,b),!legacy"
        );
        assert_eq!(parse("example.com/app==x").to_string(), "example.com/app=x");
        assert_eq!(parse("app=").to_string(), "app=");
        assert_eq!(parse("").to_string(), "");
    }

    #[test]
    fn rejects_malformed_selectors() {
        let cases = [
            ("app=influxdb,", "a label key"),
            ("app influxdb", "an operator"),
            ("app=x y", "`,` or end of selector"),
            ("=influxdb", "a label key"),
            ("app in a", "`(`"),
            ("app in (a", "`,` or `)`"),
            ("app==(", "a label value"),
        ];
        for (input, expected) in cases {
            match input.parse::<LabelSelector>() {
                Err(SelectorError::Unexpected { expected: e, .. }) => {
                    assert_eq!(e, expected, "input: {input}")
                }
                other => panic!("input {input}: unexpected result {other:?}"),
            }
        }
    }

    #[test]
    fn rejects_invalid_names_and_sets() {
        assert!(matches!(
            "-app=x".parse::<LabelSelector>(),
            Err(SelectorError::InvalidKey { .. })
        ));
        assert!(matches!(
            "a/b/c=x".parse::<LabelSelector>(),
            Err(SelectorError::InvalidKey { .. })
        ));
        assert!(matches!(
            "Example.com/app=x".parse::<LabelSelector>(),
            Err(SelectorError::InvalidKey { .. })
        ));
        assert!(matches!(
            "app=bad_value_".parse::<LabelSelector>(),
            Err(SelectorError::InvalidValue { .. })
        ));
        let long = "x".repeat(64);
        assert!(matches!(
            format!("app={long}").parse::<LabelSelector>(),
            Err(SelectorError::InvalidValue { .. })
        ));
        assert_eq!(
            "app in ()".parse::<LabelSelector>(),
            Err(SelectorError::EmptySet {
                key: "app".into(),
                operator: "in"
            })
        );
        assert_eq!(
            "gen>two".parse::<LabelSelector>(),
            Err(SelectorError::NotAnInteger {
                key: "gen".into(),
                value: "two".into()
            })
        );
    }

    #[test]
    fn error_positions() {
        let err = "app=x,,".parse::<LabelSelector>().unwrap_err();
        assert_eq!(
            err.to_string(),
            "unexpected `,` at position 6, expected a label key"
        );
        let err = "app in (a".parse::<LabelSelector>().unwrap_err();
        assert_eq!(
            err.to_string(),
            "unexpected end of selector at position 9, expected `,` or `)`"
        );
    }
}
