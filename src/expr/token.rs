// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Expression tokenizer.
//!
//! Converts the body of a `(( ... ))` expression into a token stream.
//! Classification priority for bare words: boolean and null literals first,
//! then registered operator names, then reference paths. Tokenization never
//! fails; anything unrecognizable becomes an [`TokenKind::Unknown`] token
//! that the parser rejects with a positioned syntax error.

use crate::document::{Path, Value};

/// Minimal view of the operator registry the tokenizer and parser need.
/// Keeps the expression layer free of a dependency on operator behavior.
pub trait OperatorCatalog {
    fn is_operator(&self, name: &str) -> bool;

    /// (min, max) argument counts; -1 means unbounded.
    fn arity(&self, name: &str) -> Option<(i32, i32)>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// A registered operator name, possibly with `:modifier` suffixes.
    OpName {
        name: String,
        modifiers: Vec<String>,
    },
    Literal(Value),
    Reference(Path),
    EnvVar(String),
    Comma,
    LParen,
    RParen,
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Question,
    Colon,
    Bang,
    Unknown(char),
    Eof,
}

/// A token with its source position for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
}

pub fn tokenize(input: &str, catalog: &dyn OperatorCatalog) -> Vec<Token> {
    Lexer::new(input, catalog).run()
}

struct Lexer<'a> {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    catalog: &'a dyn OperatorCatalog,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str, catalog: &'a dyn OperatorCatalog) -> Self {
        Lexer {
            chars: input.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            catalog,
        }
    }

    fn run(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace();
            let (line, column) = (self.line, self.column);
            let kind = match self.peek() {
                None => TokenKind::Eof,
                Some(c) => self.next_kind(c),
            };
            let done = kind == TokenKind::Eof;
            tokens.push(Token { kind, line, column });
            if done {
                return tokens;
            }
        }
    }

    fn next_kind(&mut self, c: char) -> TokenKind {
        match c {
            '"' => self.string_literal(),
            '$' => self.env_var(),
            '~' => {
                self.bump();
                TokenKind::Literal(Value::Null)
            }
            ',' => self.single(TokenKind::Comma),
            '(' => self.single(TokenKind::LParen),
            ')' => self.single(TokenKind::RParen),
            '+' => self.single(TokenKind::Plus),
            '*' => self.single(TokenKind::Star),
            '/' => self.single(TokenKind::Slash),
            '%' => self.single(TokenKind::Percent),
            '?' => self.single(TokenKind::Question),
            ':' => self.single(TokenKind::Colon),
            '|' => self.pair('|', TokenKind::Or),
            '&' => self.pair('&', TokenKind::And),
            '=' => self.pair('=', TokenKind::Eq),
            '!' => {
                self.bump();
                if self.peek() == Some('=') {
                    self.bump();
                    TokenKind::Ne
                } else {
                    TokenKind::Bang
                }
            }
            '<' => {
                self.bump();
                if self.peek() == Some('=') {
                    self.bump();
                    TokenKind::Le
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                self.bump();
                if self.peek() == Some('=') {
                    self.bump();
                    TokenKind::Ge
                } else {
                    TokenKind::Gt
                }
            }
            '-' => {
                // a '-' at an operand position directly followed by a digit
                // is a signed literal; everything else is subtraction (the
                // parser's unary form covers `- x`)
                let prev = if self.pos == 0 {
                    None
                } else {
                    Some(self.chars[self.pos - 1])
                };
                let operand_position = match prev {
                    None => true,
                    Some(c) => c.is_whitespace() || c == '(' || c == ',',
                };
                if operand_position
                    && self.peek_at(1).map_or(false, |c| c.is_ascii_digit())
                {
                    self.bump();
                    match self.number() {
                        TokenKind::Literal(Value::Int(i)) => {
                            TokenKind::Literal(Value::Int(-i))
                        }
                        TokenKind::Literal(Value::Float(f)) => {
                            TokenKind::Literal(Value::Float(-f))
                        }
                        other => other,
                    }
                } else {
                    self.single(TokenKind::Minus)
                }
            }
            c if c.is_ascii_digit() => self.number(),
            c if c.is_alphabetic() || c == '_' => self.word(),
            other => {
                self.bump();
                TokenKind::Unknown(other)
            }
        }
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.bump();
        kind
    }

    fn pair(&mut self, second: char, kind: TokenKind) -> TokenKind {
        let first = self.peek().unwrap_or(second);
        self.bump();
        if self.peek() == Some(second) {
            self.bump();
            kind
        } else {
            TokenKind::Unknown(first)
        }
    }

    fn string_literal(&mut self) -> TokenKind {
        self.bump(); // opening quote
        let mut out = String::new();
        while let Some(c) = self.peek() {
            match c {
                '"' => {
                    self.bump();
                    return TokenKind::Literal(Value::String(out));
                }
                '\\' => {
                    self.bump();
                    match self.peek() {
                        Some('n') => out.push('\n'),
                        Some('r') => out.push('\r'),
                        Some('t') => out.push('\t'),
                        Some('"') => out.push('"'),
                        Some('\\') => out.push('\\'),
                        Some(other) => {
                            out.push('\\');
                            out.push(other);
                        }
                        None => break,
                    }
                    self.bump();
                }
                other => {
                    out.push(other);
                    self.bump();
                }
            }
        }
        // unterminated string: hand the parser what we have, it reports
        TokenKind::Literal(Value::String(out))
    }

    fn env_var(&mut self) -> TokenKind {
        self.bump(); // '$'
        match self.peek() {
            Some(c) if c.is_alphabetic() || c == '_' => {
                let mut name = String::new();
                while let Some(c) = self.peek() {
                    if c.is_alphanumeric() || c == '_' {
                        name.push(c);
                        self.bump();
                    } else {
                        break;
                    }
                }
                TokenKind::EnvVar(name)
            }
            _ => TokenKind::Unknown('$'),
        }
    }

    fn number(&mut self) -> TokenKind {
        let mut text = String::new();
        let mut is_float = false;
        while let Some(c) = self.peek() {
            match c {
                c if c.is_ascii_digit() => {
                    text.push(c);
                    self.bump();
                }
                '.' if !is_float && self.peek_at(1).map_or(false, |n| n.is_ascii_digit()) => {
                    is_float = true;
                    text.push('.');
                    self.bump();
                }
                'e' | 'E' if !text.is_empty() => {
                    let next = self.peek_at(1);
                    let after = self.peek_at(2);
                    let exponent_follows = next.map_or(false, |n| n.is_ascii_digit())
                        || (matches!(next, Some('+') | Some('-'))
                            && after.map_or(false, |n| n.is_ascii_digit()));
                    if !exponent_follows {
                        break;
                    }
                    is_float = true;
                    text.push(c);
                    self.bump();
                    if matches!(self.peek(), Some('+') | Some('-')) {
                        text.push(self.peek().unwrap());
                        self.bump();
                    }
                }
                _ => break,
            }
        }
        if is_float {
            text.parse::<f64>()
                .map(|f| TokenKind::Literal(Value::Float(f)))
                .unwrap_or(TokenKind::Unknown('0'))
        } else {
            text.parse::<i64>()
                .map(|i| TokenKind::Literal(Value::Int(i)))
                .unwrap_or(TokenKind::Unknown('0'))
        }
    }

    /// Lex a bare word and classify it: boolean/null literal first, then
    /// registered operator (consuming any `:modifier` suffixes), otherwise
    /// a reference path. A `-` stays inside the word only when an
    /// identifier character follows, so `vault-try` is one name while
    /// `a - b` is a subtraction.
    fn word(&mut self) -> TokenKind {
        let mut word = String::new();
        while let Some(c) = self.peek() {
            match c {
                c if c.is_alphanumeric() || c == '_' || c == '.' || c == '[' || c == ']' => {
                    word.push(c);
                    self.bump();
                }
                '-' if self
                    .peek_at(1)
                    .map_or(false, |n| n.is_alphanumeric() || n == '_') =>
                {
                    word.push('-');
                    self.bump();
                }
                _ => break,
            }
        }

        let lowered = word.to_ascii_lowercase();
        match lowered.as_str() {
            "true" => return TokenKind::Literal(Value::Bool(true)),
            "false" => return TokenKind::Literal(Value::Bool(false)),
            "nil" | "null" => return TokenKind::Literal(Value::Null),
            _ => {}
        }

        if self.catalog.is_operator(&word) {
            let mut modifiers = Vec::new();
            // ':' directly after an operator name introduces a modifier; a
            // ':' after whitespace is always the ternary separator
            while self.peek() == Some(':')
                && self
                    .peek_at(1)
                    .map_or(false, |n| n.is_alphabetic() || n == '_')
            {
                self.bump(); // ':'
                let mut modifier = String::new();
                while let Some(c) = self.peek() {
                    if c.is_alphanumeric() || c == '_' || c == '-' {
                        modifier.push(c);
                        self.bump();
                    } else {
                        break;
                    }
                }
                modifiers.push(modifier);
            }
            TokenKind::OpName {
                name: word,
                modifiers,
            }
        } else {
            TokenKind::Reference(Path::parse(&word))
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) {
        if let Some(c) = self.peek() {
            self.pos += 1;
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeCatalog(Vec<&'static str>);

    impl OperatorCatalog for FakeCatalog {
        fn is_operator(&self, name: &str) -> bool {
            self.0.contains(&name)
        }

        fn arity(&self, _name: &str) -> Option<(i32, i32)> {
            Some((0, -1))
        }
    }

    fn kinds(input: &str, ops: Vec<&'static str>) -> Vec<TokenKind> {
        tokenize(input, &FakeCatalog(ops))
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_operator_vs_reference_classification() {
        let tokens = kinds("grab meta.name", vec!["grab"]);
        assert_eq!(
            tokens,
            vec![
                TokenKind::OpName {
                    name: "grab".into(),
                    modifiers: vec![]
                },
                TokenKind::Reference(Path::parse("meta.name")),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_literals_have_priority() {
        let tokens = kinds("true FALSE nil NULL ~ 42 4.5", vec![]);
        assert_eq!(
            tokens,
            vec![
                TokenKind::Literal(Value::Bool(true)),
                TokenKind::Literal(Value::Bool(false)),
                TokenKind::Literal(Value::Null),
                TokenKind::Literal(Value::Null),
                TokenKind::Literal(Value::Null),
                TokenKind::Literal(Value::Int(42)),
                TokenKind::Literal(Value::Float(4.5)),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        let tokens = kinds(r#""a\nb\t\"c\"""#, vec![]);
        assert_eq!(
            tokens[0],
            TokenKind::Literal(Value::String("a\nb\t\"c\"".into()))
        );
    }

    #[test]
    fn test_modifiers_attach_to_operator() {
        let tokens = kinds("vault:nocache \"secret/a:b\"", vec!["vault"]);
        assert_eq!(
            tokens[0],
            TokenKind::OpName {
                name: "vault".into(),
                modifiers: vec!["nocache".into()]
            }
        );
    }

    #[test]
    fn test_colon_after_whitespace_is_ternary() {
        let tokens = kinds("a ? b : c", vec![]);
        assert!(tokens.iter().any(|k| *k == TokenKind::Question));
        assert!(tokens.iter().any(|k| *k == TokenKind::Colon));
    }

    #[test]
    fn test_signed_literals_at_operand_positions() {
        let tokens = kinds("ips \"10.0.0.0/24\" -1", vec!["ips"]);
        assert_eq!(tokens[2], TokenKind::Literal(Value::Int(-1)));

        // '-' between operands with space on both sides is subtraction
        let tokens = kinds("a - 1", vec![]);
        assert_eq!(tokens[1], TokenKind::Minus);

        // '-' right after a value is subtraction even without spaces
        let tokens = kinds("5 - 3", vec![]);
        assert_eq!(
            tokens,
            vec![
                TokenKind::Literal(Value::Int(5)),
                TokenKind::Minus,
                TokenKind::Literal(Value::Int(3)),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_hyphen_in_name_vs_subtraction() {
        let tokens = kinds("vault-try x", vec!["vault-try"]);
        assert_eq!(
            tokens[0],
            TokenKind::OpName {
                name: "vault-try".into(),
                modifiers: vec![]
            }
        );

        let tokens = kinds("a - b", vec![]);
        assert_eq!(tokens[1], TokenKind::Minus);
    }

    #[test]
    fn test_env_var_token() {
        let tokens = kinds("$HOME_DIR", vec![]);
        assert_eq!(tokens[0], TokenKind::EnvVar("HOME_DIR".into()));
    }

    #[test]
    fn test_comparison_operators() {
        let tokens = kinds("a >= 18 && b != c || d < 2", vec![]);
        assert!(tokens.contains(&TokenKind::Ge));
        assert!(tokens.contains(&TokenKind::And));
        assert!(tokens.contains(&TokenKind::Ne));
        assert!(tokens.contains(&TokenKind::Or));
        assert!(tokens.contains(&TokenKind::Lt));
    }

    #[test]
    fn test_tokenization_never_fails() {
        let tokens = kinds("@ # grab", vec!["grab"]);
        assert_eq!(tokens[0], TokenKind::Unknown('@'));
        assert_eq!(tokens[1], TokenKind::Unknown('#'));
    }

    #[test]
    fn test_positions_are_tracked() {
        let tokens = tokenize("a\n  b", &FakeCatalog(vec![]));
        assert_eq!((tokens[0].line, tokens[0].column), (1, 1));
        assert_eq!((tokens[1].line, tokens[1].column), (2, 3));
    }
}
