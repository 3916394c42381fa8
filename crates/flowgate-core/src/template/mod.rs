//! Template language for request materialization and output wiring
//!
//! A template string is a concatenation of literal text and `{{expr}}`
//! placeholders. Inside the braces: `root ('.' segment)*` where the root is
//! `input`, `env`, or `tasks` and a segment is an identifier or a
//! non-negative `[index]`. `\{{` escapes a literal `{{`.
//!
//! A template that is a single placeholder ("pure interpolation")
//! preserves the referenced value's type; any mix of text and placeholders
//! produces a string.

mod resolve;

pub use resolve::{canonical_string, resolve, ResolveContext, ResolveError};

use serde_json::Value;
use thiserror::Error;

/// Where a path expression starts resolving
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Root {
    Input,
    Env,
    Tasks,
}

impl Root {
    pub fn as_str(&self) -> &'static str {
        match self {
            Root::Input => "input",
            Root::Env => "env",
            Root::Tasks => "tasks",
        }
    }
}

/// One step of a path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Field(String),
    Index(usize),
}

/// A parsed `root.seg.seg[0]...` reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpr {
    pub root: Root,
    pub segments: Vec<Segment>,
}

impl PathExpr {
    /// For `tasks.<id>...` paths, the referenced invocation id
    pub fn task_id(&self) -> Option<&str> {
        if self.root != Root::Tasks {
            return None;
        }
        match self.segments.first() {
            Some(Segment::Field(id)) => Some(id),
            _ => None,
        }
    }
}

impl std::fmt::Display for PathExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.root.as_str())?;
        for segment in &self.segments {
            match segment {
                Segment::Field(name) => write!(f, ".{name}")?,
                Segment::Index(i) => write!(f, "[{i}]")?,
            }
        }
        Ok(())
    }
}

/// A run of literal text or one placeholder within a mixed template
#[derive(Debug, Clone, PartialEq)]
pub enum Piece {
    Text(String),
    Path(PathExpr),
}

/// A parsed binding expression
#[derive(Debug, Clone, PartialEq)]
pub enum Template {
    /// A plain JSON value with no placeholders
    Literal(Value),
    /// Exactly one placeholder and nothing else; resolves to the
    /// referenced value with its type preserved
    Path(PathExpr),
    /// Text mixed with placeholders; always resolves to a string
    Interpolated(Vec<Piece>),
}

/// Parse failure with the byte offset of the offending construct
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("at byte {position} of '{template}': {reason}")]
pub struct TemplateParseError {
    pub template: String,
    pub position: usize,
    pub reason: String,
}

impl Template {
    /// Parse a template string.
    pub fn parse_str(input: &str) -> Result<Template, TemplateParseError> {
        let err = |position: usize, reason: &str| TemplateParseError {
            template: input.to_string(),
            position,
            reason: reason.to_string(),
        };

        let mut pieces: Vec<Piece> = Vec::new();
        let mut text = String::new();
        let mut i = 0;

        while i < input.len() {
            let rest = &input[i..];
            if rest.starts_with("\\{{") {
                text.push_str("{{");
                i += 3;
            } else if rest.starts_with("{{") {
                let close = rest[2..]
                    .find("}}")
                    .ok_or_else(|| err(i, "unterminated '{{'"))?;
                let expr = &rest[2..2 + close];
                let path = parse_path(expr, i + 2, input)?;
                if !text.is_empty() {
                    pieces.push(Piece::Text(std::mem::take(&mut text)));
                }
                pieces.push(Piece::Path(path));
                i += 2 + close + 2;
            } else if rest.starts_with("}}") {
                return Err(err(i, "unmatched '}}'"));
            } else {
                let ch = rest.chars().next().expect("non-empty rest");
                text.push(ch);
                i += ch.len_utf8();
            }
        }

        if pieces.is_empty() {
            return Ok(Template::Literal(Value::String(text)));
        }
        if !text.is_empty() {
            pieces.push(Piece::Text(text));
        }
        if pieces.len() == 1 {
            if let Piece::Path(path) = &pieces[0] {
                return Ok(Template::Path(path.clone()));
            }
        }
        Ok(Template::Interpolated(pieces))
    }

    /// Parse a binding value: strings are parsed as template strings,
    /// every other JSON value is a literal.
    pub fn parse_value(value: &Value) -> Result<Template, TemplateParseError> {
        match value {
            Value::String(s) => Self::parse_str(s),
            other => Ok(Template::Literal(other.clone())),
        }
    }

    /// True when resolution preserves the referenced value's type
    pub fn is_pure_path(&self) -> bool {
        matches!(self, Template::Path(_))
    }

    /// Every placeholder in source order
    pub fn paths(&self) -> Vec<&PathExpr> {
        match self {
            Template::Literal(_) => Vec::new(),
            Template::Path(path) => vec![path],
            Template::Interpolated(pieces) => pieces
                .iter()
                .filter_map(|piece| match piece {
                    Piece::Path(path) => Some(path),
                    Piece::Text(_) => None,
                })
                .collect(),
        }
    }

    /// Ids of sibling invocations this template reads from
    pub fn task_dependencies(&self) -> Vec<&str> {
        self.paths()
            .into_iter()
            .filter_map(PathExpr::task_id)
            .collect()
    }
}

impl std::fmt::Display for Template {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Template::Literal(Value::String(s)) => write!(f, "{}", escape_text(s)),
            Template::Literal(value) => write!(f, "{value}"),
            Template::Path(path) => write!(f, "{{{{{path}}}}}"),
            Template::Interpolated(pieces) => {
                for piece in pieces {
                    match piece {
                        Piece::Text(text) => write!(f, "{}", escape_text(text))?,
                        Piece::Path(path) => write!(f, "{{{{{path}}}}}")?,
                    }
                }
                Ok(())
            }
        }
    }
}

fn escape_text(text: &str) -> String {
    text.replace("{{", "\\{{")
}

fn parse_path(
    expr: &str,
    offset: usize,
    template: &str,
) -> Result<PathExpr, TemplateParseError> {
    let err = |reason: String| TemplateParseError {
        template: template.to_string(),
        position: offset,
        reason,
    };

    let expr = expr.trim();
    if expr.is_empty() {
        return Err(err("empty placeholder".to_string()));
    }

    let root_end = expr
        .find(|c| c == '.' || c == '[')
        .unwrap_or(expr.len());
    let root = match &expr[..root_end] {
        "input" => Root::Input,
        "env" => Root::Env,
        "tasks" => Root::Tasks,
        other => return Err(err(format!("unknown root '{other}' (expected input, env, or tasks)"))),
    };

    let mut segments = Vec::new();
    let mut rest = &expr[root_end..];
    while !rest.is_empty() {
        if let Some(after_dot) = rest.strip_prefix('.') {
            let end = after_dot
                .find(|c| c == '.' || c == '[')
                .unwrap_or(after_dot.len());
            let name = &after_dot[..end];
            if !is_identifier(name) {
                return Err(err(if name.is_empty() {
                    "empty segment".to_string()
                } else {
                    format!("invalid segment '{name}'")
                }));
            }
            segments.push(Segment::Field(name.to_string()));
            rest = &after_dot[end..];
        } else if let Some(after_bracket) = rest.strip_prefix('[') {
            let end = after_bracket
                .find(']')
                .ok_or_else(|| err("unterminated '['".to_string()))?;
            let digits = &after_bracket[..end];
            let index: usize = digits
                .parse()
                .map_err(|_| err(format!("invalid index '{digits}'")))?;
            segments.push(Segment::Index(index));
            rest = &after_bracket[end + 1..];
        } else {
            return Err(err(format!("unexpected '{rest}' in path")));
        }
    }

    Ok(PathExpr { root, segments })
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
