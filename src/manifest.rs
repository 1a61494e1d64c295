//! Hierarchical key-path manifest reader
//!
//! Manifests are nested `Name { ... }` blocks holding `Name = value` leaves.
//! Array elements written as `Name[@]` are numbered per parent block in
//! declaration order, so the third `Slice[@]` under `/TimeSlice` is reachable as
//! `/TimeSlice/Slice[2]`. Paths are case-insensitive.
//!
//! ```text
//! FileInfo {
//!   Prefix     = "vel"
//!   GuideCell  = 2
//! }
//! Domain {
//!   GlobalVoxel = (64, 64, 32)
//! }
//! ```

use crate::error::{ConcatError, Result};
use logos::Logos;
use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::path::Path;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"//[^\n]*")]
#[logos(skip r"/\*([^*]|\*[^/])*\*/")]
enum Token {
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(",")]
    Comma,
    #[token("=")]
    Equals,
    #[token("@")]
    At,

    #[regex(r"[+-]?[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Integer(i64),

    #[regex(r"[+-]?[0-9]+\.[0-9]*([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    #[regex(r"[+-]?\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    #[regex(r"[+-]?[0-9]+[eE][+-]?[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),

    #[regex(r#""[^"]*""#, |lex| {
        let s = lex.slice();
        s[1..s.len() - 1].to_string()
    })]
    Str(String),

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),
}

/// A leaf value of a manifest
#[derive(Debug, Clone, PartialEq)]
pub enum ManifestValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Vector(Vec<ManifestValue>),
}

impl ManifestValue {
    fn as_i64(&self) -> Option<i64> {
        match self {
            ManifestValue::Integer(v) => Some(*v),
            ManifestValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            ManifestValue::Integer(v) => Some(*v as f64),
            ManifestValue::Float(v) => Some(*v),
            ManifestValue::Text(s) => s.trim().parse().ok(),
            ManifestValue::Vector(_) => None,
        }
    }

    fn as_vec3<T>(&self, convert: impl Fn(&ManifestValue) -> Option<T>) -> Option<[T; 3]> {
        match self {
            ManifestValue::Vector(items) if items.len() >= 3 => {
                Some([convert(&items[0])?, convert(&items[1])?, convert(&items[2])?])
            }
            _ => None,
        }
    }
}

/// Read access to a parsed manifest by key path
///
/// Typed lookups return `Ok(None)` for an absent key and an error for a key
/// whose value has the wrong type.
pub trait ManifestReader {
    /// Every leaf key path, in sorted order
    fn keys(&self) -> Vec<String>;

    /// Raw value at `path`
    fn value(&self, path: &str) -> Option<&ManifestValue>;

    /// Number of distinct blocks directly below `path`
    fn count_children(&self, path: &str) -> usize;

    fn contains(&self, path: &str) -> bool {
        self.value(path).is_some()
    }

    /// First key of `candidates` present in the manifest
    fn first_present<'k>(&self, candidates: &[&'k str]) -> Option<&'k str> {
        candidates.iter().copied().find(|key| self.contains(key))
    }

    fn get_str(&self, path: &str) -> Result<Option<String>> {
        match self.value(path) {
            None => Ok(None),
            Some(ManifestValue::Text(s)) => Ok(Some(s.clone())),
            Some(_) => Err(ConcatError::invalid(path, "expected a string")),
        }
    }

    fn get_i64(&self, path: &str) -> Result<Option<i64>> {
        self.value(path)
            .map(|v| {
                v.as_i64()
                    .ok_or_else(|| ConcatError::invalid(path, "expected an integer"))
            })
            .transpose()
    }

    fn get_f64(&self, path: &str) -> Result<Option<f64>> {
        self.value(path)
            .map(|v| {
                v.as_f64()
                    .ok_or_else(|| ConcatError::invalid(path, "expected a number"))
            })
            .transpose()
    }

    fn get_vec3_i64(&self, path: &str) -> Result<Option<[i64; 3]>> {
        self.value(path)
            .map(|v| {
                v.as_vec3(ManifestValue::as_i64)
                    .ok_or_else(|| ConcatError::invalid(path, "expected three integers"))
            })
            .transpose()
    }

    fn get_vec3_f64(&self, path: &str) -> Result<Option<[f64; 3]>> {
        self.value(path)
            .map(|v| {
                v.as_vec3(ManifestValue::as_f64)
                    .ok_or_else(|| ConcatError::invalid(path, "expected three numbers"))
            })
            .transpose()
    }
}

/// Turn an absent key into [`ConcatError::ManifestKeyMissing`]
pub fn required<T>(path: &str, value: Option<T>) -> Result<T> {
    value.ok_or_else(|| ConcatError::ManifestKeyMissing(path.to_string()))
}

/// In-memory manifest parsed from text
#[derive(Debug, Clone, Default)]
pub struct TextManifest {
    values: BTreeMap<String, ManifestValue>,
    children: HashMap<String, Vec<String>>,
}

impl TextManifest {
    /// Read and parse a manifest file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| ConcatError::FileUnreadable {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&source)
    }

    /// Parse manifest text
    pub fn parse(source: &str) -> Result<Self> {
        let mut tokens = Vec::new();
        let mut lexer = Token::lexer(source);
        while let Some(token) = lexer.next() {
            match token {
                Ok(token) => tokens.push((token, lexer.span())),
                Err(()) => {
                    return Err(syntax_error(
                        source,
                        lexer.span().start,
                        format!("unexpected input '{}'", lexer.slice()),
                    ))
                }
            }
        }

        let mut parser = Parser {
            source,
            tokens,
            pos: 0,
            auto_index: HashMap::new(),
            manifest: TextManifest::default(),
        };
        parser.parse_block("", false)?;
        Ok(parser.manifest)
    }
}

impl ManifestReader for TextManifest {
    fn keys(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }

    fn value(&self, path: &str) -> Option<&ManifestValue> {
        self.values.get(&normalize(path))
    }

    fn count_children(&self, path: &str) -> usize {
        self.children.get(&normalize(path)).map_or(0, Vec::len)
    }
}

fn normalize(path: &str) -> String {
    path.trim_end_matches('/').to_ascii_lowercase()
}

fn syntax_error(source: &str, offset: usize, message: impl Into<String>) -> ConcatError {
    ConcatError::ManifestSyntax {
        line: source[..offset.min(source.len())].matches('\n').count() + 1,
        message: message.into(),
    }
}

struct Parser<'s> {
    source: &'s str,
    tokens: Vec<(Token, Range<usize>)>,
    pos: usize,
    auto_index: HashMap<String, usize>,
    manifest: TextManifest,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        self.pos += 1;
        token
    }

    fn error(&self, message: impl Into<String>) -> ConcatError {
        let offset = self
            .tokens
            .get(self.pos.min(self.tokens.len().saturating_sub(1)))
            .map_or(self.source.len(), |(_, span)| span.start);
        syntax_error(self.source, offset, message)
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<()> {
        if self.peek() == Some(&expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(format!("expected {}", what)))
        }
    }

    fn parse_block(&mut self, parent: &str, nested: bool) -> Result<()> {
        loop {
            match self.peek() {
                None if nested => return Err(self.error("unterminated block")),
                None => return Ok(()),
                Some(Token::RBrace) if nested => {
                    self.pos += 1;
                    return Ok(());
                }
                _ => self.parse_item(parent)?,
            }
        }
    }

    fn parse_item(&mut self, parent: &str) -> Result<()> {
        let name = match self.next() {
            Some(Token::Ident(name)) => name.to_ascii_lowercase(),
            _ => {
                self.pos -= 1;
                return Err(self.error("expected a key name"));
            }
        };

        let label = if self.peek() == Some(&Token::LBracket) {
            self.pos += 1;
            let index = match self.next() {
                Some(Token::At) => {
                    let counter = self
                        .auto_index
                        .entry(format!("{}/{}", parent, name))
                        .or_insert(0);
                    *counter += 1;
                    *counter - 1
                }
                Some(Token::Integer(i)) if i >= 0 => i as usize,
                _ => {
                    self.pos -= 1;
                    return Err(self.error("expected '@' or an index"));
                }
            };
            self.expect(Token::RBracket, "']'")?;
            format!("{}[{}]", name, index)
        } else {
            name
        };
        let path = format!("{}/{}", parent, label);

        match self.next() {
            Some(Token::Equals) => {
                let value = self.parse_value()?;
                if self.manifest.values.insert(path.clone(), value).is_some() {
                    self.pos -= 1;
                    return Err(self.error(format!("duplicate key {}", path)));
                }
                Ok(())
            }
            Some(Token::LBrace) => {
                let siblings = self
                    .manifest
                    .children
                    .entry(parent.to_string())
                    .or_default();
                if !siblings.contains(&label) {
                    siblings.push(label);
                }
                self.parse_block(&path, true)
            }
            _ => {
                self.pos -= 1;
                Err(self.error(format!("expected '=' or '{{' after {}", path)))
            }
        }
    }

    fn parse_value(&mut self) -> Result<ManifestValue> {
        match self.next() {
            Some(Token::Str(s)) | Some(Token::Ident(s)) => Ok(ManifestValue::Text(s)),
            Some(Token::Integer(i)) => Ok(ManifestValue::Integer(i)),
            Some(Token::Float(f)) => Ok(ManifestValue::Float(f)),
            Some(Token::LParen) => {
                let mut items = Vec::new();
                loop {
                    if self.peek() == Some(&Token::LParen) {
                        return Err(self.error("nested vectors are not supported"));
                    }
                    items.push(self.parse_value()?);
                    match self.next() {
                        Some(Token::Comma) => continue,
                        Some(Token::RParen) => break,
                        _ => {
                            self.pos -= 1;
                            return Err(self.error("expected ',' or ')'"));
                        }
                    }
                }
                Ok(ManifestValue::Vector(items))
            }
            _ => {
                self.pos -= 1;
                Err(self.error("expected a value"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        // index file
        FileInfo {
          FileFormat   = "sph"
          Prefix       = vel
          GuideCell    = 2
          Origin       = (-1.5, 0, 2e3)
        }
        /* time slices */
        TimeSlice {
          Slice[@] { Step = 0  Time = 0.0 }
          Slice[@] { Step = 10 Time = 0.25 }
        }
    "#;

    #[test]
    fn test_parse_leaves() {
        let m = TextManifest::parse(SAMPLE).unwrap();
        assert_eq!(m.get_str("/FileInfo/FileFormat").unwrap().as_deref(), Some("sph"));
        assert_eq!(m.get_str("/fileinfo/prefix").unwrap().as_deref(), Some("vel"));
        assert_eq!(m.get_i64("/FileInfo/GuideCell").unwrap(), Some(2));
        assert_eq!(
            m.get_vec3_f64("/FileInfo/Origin").unwrap(),
            Some([-1.5, 0.0, 2000.0])
        );
        assert_eq!(m.get_i64("/FileInfo/Missing").unwrap(), None);
    }

    #[test]
    fn test_auto_indexed_blocks() {
        let m = TextManifest::parse(SAMPLE).unwrap();
        assert_eq!(m.count_children("/TimeSlice"), 2);
        assert_eq!(m.get_i64("/TimeSlice/slice[1]/Step").unwrap(), Some(10));
        assert_eq!(m.get_f64("/TimeSlice/Slice[1]/Time").unwrap(), Some(0.25));
        assert!(m.keys().contains(&"/timeslice/slice[0]/step".to_string()));
    }

    #[test]
    fn test_type_mismatch_is_error() {
        let m = TextManifest::parse(SAMPLE).unwrap();
        assert!(matches!(
            m.get_i64("/FileInfo/FileFormat"),
            Err(ConcatError::ManifestValueInvalid { .. })
        ));
        assert!(m.get_vec3_i64("/FileInfo/GuideCell").is_err());
    }

    #[test]
    fn test_first_present() {
        let m = TextManifest::parse("FileInfo { NumVariables = 3 }").unwrap();
        let key = m.first_present(&["/FileInfo/Component", "/FileInfo/NumVariables"]);
        assert_eq!(key, Some("/FileInfo/NumVariables"));
        assert_eq!(m.first_present(&["/FileInfo/Component"]), None);
    }

    #[test]
    fn test_syntax_errors_report_line() {
        let err = TextManifest::parse("A {\n  B = \n}").unwrap_err();
        assert!(matches!(err, ConcatError::ManifestSyntax { line: 3, .. }));

        let err = TextManifest::parse("A { B = 1").unwrap_err();
        assert!(matches!(err, ConcatError::ManifestSyntax { .. }));

        let err = TextManifest::parse("A = 1\nA = 2").unwrap_err();
        assert!(matches!(err, ConcatError::ManifestSyntax { line: 2, .. }));
    }

    #[test]
    fn test_required() {
        assert_eq!(required("/a", Some(1)).unwrap(), 1);
        assert!(matches!(
            required::<i64>("/a", None),
            Err(ConcatError::ManifestKeyMissing(k)) if k == "/a"
        ));
    }
}
