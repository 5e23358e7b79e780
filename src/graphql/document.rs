//! A minimal parser for executable GraphQL documents.
//!
//! Only the structure needed to check a saved query against the root fields
//! of the schema is kept: operations, their top-level selections, fragment
//! definitions and fragment spreads. Arguments, variables and directives are
//! parsed and discarded.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// Error produced while parsing a document.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message} at offset {offset}")]
pub struct DocumentError {
    pub message: String,
    pub offset: usize,
}

pub type DocumentResult<T> = Result<T, DocumentError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Query => f.write_str("query"),
            OperationKind::Mutation => f.write_str("mutation"),
            OperationKind::Subscription => f.write_str("subscription"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Field {
        alias: Option<String>,
        name: String,
        selection_set: Vec<Selection>,
    },
    FragmentSpread {
        name: String,
    },
    InlineFragment {
        type_condition: Option<String>,
        selection_set: Vec<Selection>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub kind: OperationKind,
    pub name: Option<String>,
    pub selection_set: Vec<Selection>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub name: String,
    pub type_condition: String,
    pub selection_set: Vec<Selection>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    pub operations: Vec<Operation>,
    /// Fragments in definition order; duplicates are kept for the analyser to report.
    pub fragments: Vec<Fragment>,
}

impl Document {
    pub fn fragment_map(&self) -> BTreeMap<&str, &Fragment> {
        self.fragments.iter().map(|f| (f.name.as_str(), f)).collect()
    }
}

// ============================================================================
// Lexer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Punct(char),
    Spread,
    Name(String),
    Number,
    Str,
}

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn error<T>(&self, message: impl Into<String>) -> DocumentResult<T> {
        Err(DocumentError {
            message: message.into(),
            offset: self.pos,
        })
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek_char(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ignored(&mut self) {
        while let Some(c) = self.peek_char() {
            match c {
                ' ' | '\t' | '\n' | '\r' | ',' | '\u{feff}' => {
                    self.bump();
                }
                '#' => {
                    while let Some(c) = self.bump() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                _ => break,
            }
        }
    }

    fn tokenize(mut self) -> DocumentResult<Vec<(usize, Token)>> {
        let mut tokens = Vec::new();
        loop {
            self.skip_ignored();
            let start = self.pos;
            let Some(c) = self.peek_char() else {
                break;
            };
            let token = match c {
                '{' | '}' | '(' | ')' | '[' | ']' | ':' | '!' | '$' | '@' | '=' | '|' | '&' => {
                    self.bump();
                    Token::Punct(c)
                }
                '.' => {
                    if self.rest().starts_with("...") {
                        self.pos += 3;
                        Token::Spread
                    } else {
                        return self.error("unexpected '.'");
                    }
                }
                '"' => {
                    self.string()?;
                    Token::Str
                }
                c if c == '-' || c.is_ascii_digit() => {
                    self.number()?;
                    Token::Number
                }
                c if c == '_' || c.is_ascii_alphabetic() => Token::Name(self.name()),
                other => return self.error(format!("unexpected character '{}'", other)),
            };
            tokens.push((start, token));
        }
        Ok(tokens)
    }

    fn name(&mut self) -> String {
        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if c == '_' || c.is_ascii_alphanumeric() {
                self.bump();
            } else {
                break;
            }
        }
        self.src[start..self.pos].to_string()
    }

    fn number(&mut self) -> DocumentResult<()> {
        if self.peek_char() == Some('-') {
            self.bump();
        }
        let mut digits = 0;
        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-') {
                digits += 1;
                self.bump();
            } else {
                break;
            }
        }
        if digits == 0 {
            return self.error("invalid number");
        }
        Ok(())
    }

    fn string(&mut self) -> DocumentResult<()> {
        if self.rest().starts_with("\"\"\"") {
            self.pos += 3;
            return match self.rest().find("\"\"\"") {
                Some(end) => {
                    self.pos += end + 3;
                    Ok(())
                }
                None => self.error("unterminated block string"),
            };
        }

        self.bump();
        while let Some(c) = self.bump() {
            match c {
                '"' => return Ok(()),
                '\\' => {
                    self.bump();
                }
                '\n' => return self.error("unterminated string"),
                _ => {}
            }
        }
        self.error("unterminated string")
    }
}

// ============================================================================
// Parser
// ============================================================================

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    len: usize,
}

impl Parser {
    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(offset, _)| *offset)
            .unwrap_or(self.len)
    }

    fn error<T>(&self, message: impl Into<String>) -> DocumentResult<T> {
        Err(DocumentError {
            message: message.into(),
            offset: self.offset(),
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn at_punct(&self, c: char) -> bool {
        self.peek() == Some(&Token::Punct(c))
    }

    fn at_name(&self, name: &str) -> bool {
        matches!(self.peek(), Some(Token::Name(n)) if n == name)
    }

    fn expect_punct(&mut self, c: char) -> DocumentResult<()> {
        if self.at_punct(c) {
            self.pos += 1;
            Ok(())
        } else {
            self.error(format!("expected '{}'", c))
        }
    }

    fn expect_name(&mut self) -> DocumentResult<String> {
        match self.peek() {
            Some(Token::Name(n)) => {
                let n = n.clone();
                self.pos += 1;
                Ok(n)
            }
            _ => self.error("expected a name"),
        }
    }

    fn document(&mut self) -> DocumentResult<Document> {
        let mut doc = Document::default();
        if self.peek().is_none() {
            return self.error("the document contains no definitions");
        }
        while self.peek().is_some() {
            if self.at_punct('{') {
                let selection_set = self.selection_set()?;
                doc.operations.push(Operation {
                    kind: OperationKind::Query,
                    name: None,
                    selection_set,
                });
                continue;
            }

            let keyword = self.expect_name()?;
            match keyword.as_str() {
                "query" | "mutation" | "subscription" => {
                    let kind = match keyword.as_str() {
                        "query" => OperationKind::Query,
                        "mutation" => OperationKind::Mutation,
                        _ => OperationKind::Subscription,
                    };
                    let name = match self.peek() {
                        Some(Token::Name(_)) => Some(self.expect_name()?),
                        _ => None,
                    };
                    if self.at_punct('(') {
                        self.variable_definitions()?;
                    }
                    self.directives()?;
                    let selection_set = self.selection_set()?;
                    doc.operations.push(Operation {
                        kind,
                        name,
                        selection_set,
                    });
                }
                "fragment" => {
                    let name = self.expect_name()?;
                    if name == "on" {
                        return self.error("a fragment cannot be named 'on'");
                    }
                    if !self.at_name("on") {
                        return self.error("expected 'on'");
                    }
                    self.pos += 1;
                    let type_condition = self.expect_name()?;
                    self.directives()?;
                    let selection_set = self.selection_set()?;
                    doc.fragments.push(Fragment {
                        name,
                        type_condition,
                        selection_set,
                    });
                }
                other => return self.error(format!("unexpected '{}'", other)),
            }
        }
        Ok(doc)
    }

    fn selection_set(&mut self) -> DocumentResult<Vec<Selection>> {
        self.expect_punct('{')?;
        let mut selections = Vec::new();
        while !self.at_punct('}') {
            if self.peek().is_none() {
                return self.error("unterminated selection set");
            }
            selections.push(self.selection()?);
        }
        self.pos += 1;
        if selections.is_empty() {
            return self.error("a selection set cannot be empty");
        }
        Ok(selections)
    }

    fn selection(&mut self) -> DocumentResult<Selection> {
        if self.peek() == Some(&Token::Spread) {
            self.pos += 1;
            if self.at_name("on") {
                self.pos += 1;
                let type_condition = Some(self.expect_name()?);
                self.directives()?;
                let selection_set = self.selection_set()?;
                return Ok(Selection::InlineFragment {
                    type_condition,
                    selection_set,
                });
            }
            if let Some(Token::Name(_)) = self.peek() {
                let name = self.expect_name()?;
                self.directives()?;
                return Ok(Selection::FragmentSpread { name });
            }
            self.directives()?;
            let selection_set = self.selection_set()?;
            return Ok(Selection::InlineFragment {
                type_condition: None,
                selection_set,
            });
        }

        let first = self.expect_name()?;
        let (alias, name) = if self.at_punct(':') {
            self.pos += 1;
            (Some(first), self.expect_name()?)
        } else {
            (None, first)
        };
        if self.at_punct('(') {
            self.arguments()?;
        }
        self.directives()?;
        let selection_set = if self.at_punct('{') {
            self.selection_set()?
        } else {
            Vec::new()
        };
        Ok(Selection::Field {
            alias,
            name,
            selection_set,
        })
    }

    fn arguments(&mut self) -> DocumentResult<()> {
        self.expect_punct('(')?;
        while !self.at_punct(')') {
            self.expect_name()?;
            self.expect_punct(':')?;
            self.value()?;
        }
        self.pos += 1;
        Ok(())
    }

    fn directives(&mut self) -> DocumentResult<()> {
        while self.at_punct('@') {
            self.pos += 1;
            self.expect_name()?;
            if self.at_punct('(') {
                self.arguments()?;
            }
        }
        Ok(())
    }

    fn variable_definitions(&mut self) -> DocumentResult<()> {
        self.expect_punct('(')?;
        while !self.at_punct(')') {
            self.expect_punct('$')?;
            self.expect_name()?;
            self.expect_punct(':')?;
            self.type_ref()?;
            if self.at_punct('=') {
                self.pos += 1;
                self.value()?;
            }
            self.directives()?;
        }
        self.pos += 1;
        Ok(())
    }

    fn type_ref(&mut self) -> DocumentResult<()> {
        if self.at_punct('[') {
            self.pos += 1;
            self.type_ref()?;
            self.expect_punct(']')?;
        } else {
            self.expect_name()?;
        }
        if self.at_punct('!') {
            self.pos += 1;
        }
        Ok(())
    }

    fn value(&mut self) -> DocumentResult<()> {
        match self.next() {
            Some(Token::Punct('$')) => {
                self.expect_name()?;
            }
            Some(Token::Number) | Some(Token::Str) | Some(Token::Name(_)) => {}
            Some(Token::Punct('[')) => {
                while !self.at_punct(']') {
                    if self.peek().is_none() {
                        return self.error("unterminated list");
                    }
                    self.value()?;
                }
                self.pos += 1;
            }
            Some(Token::Punct('{')) => {
                while !self.at_punct('}') {
                    self.expect_name()?;
                    self.expect_punct(':')?;
                    self.value()?;
                }
                self.pos += 1;
            }
            _ => {
                self.pos = self.pos.saturating_sub(1);
                return self.error("expected a value");
            }
        }
        Ok(())
    }
}

/// Parse an executable GraphQL document.
pub fn parse_document(src: &str) -> DocumentResult<Document> {
    let tokens = Lexer::new(src).tokenize()?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        len: src.len(),
    };
    parser.document()
}
