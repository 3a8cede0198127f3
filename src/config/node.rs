//! Typed option trees
//!
//! Option values are parsed once, at load time, into [`OptionNode`] trees.
//! Strings containing `<%= ... %>` become [`Template`]s made of literal text
//! and expressions, so resolution never has to re-scan raw strings.

use crate::error::{ConfigError, ConfigResult};
use indexmap::IndexMap;
use regex::Regex;
use serde_yaml::{Number, Value};
use std::fmt;
use std::sync::OnceLock;

const OPEN: &str = "<%=";

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<%=\s*(.*?)\s*%>").expect("valid placeholder pattern"))
}

/// A configuration value with placeholders already parsed
#[derive(Debug, Clone, PartialEq)]
pub enum OptionNode {
    Null,
    Bool(bool),
    Number(Number),
    Text(String),
    Template(Template),
    List(Vec<OptionNode>),
    Map(IndexMap<String, OptionNode>),
}

impl OptionNode {
    /// Parse a YAML value; `location` is used in error messages
    pub fn from_yaml(value: &Value, location: &str) -> ConfigResult<Self> {
        Ok(match value {
            Value::Null => OptionNode::Null,
            Value::Bool(b) => OptionNode::Bool(*b),
            Value::Number(n) => OptionNode::Number(n.clone()),
            Value::String(s) => OptionNode::from_text(s, location)?,
            Value::Sequence(items) => OptionNode::List(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| OptionNode::from_yaml(item, &format!("{}[{}]", location, i)))
                    .collect::<ConfigResult<Vec<_>>>()?,
            ),
            Value::Mapping(mapping) => {
                let mut map = IndexMap::new();
                for (key, item) in mapping {
                    let key = yaml_key(key, location)?;
                    let child = format!("{}.{}", location, key);
                    map.insert(key, OptionNode::from_yaml(item, &child)?);
                }
                OptionNode::Map(map)
            }
            Value::Tagged(tagged) => OptionNode::from_yaml(&tagged.value, location)?,
        })
    }

    /// Parse a string, producing a template when it holds placeholders
    pub fn from_text(text: &str, location: &str) -> ConfigResult<Self> {
        if !text.contains(OPEN) {
            return Ok(OptionNode::Text(text.to_string()));
        }
        Template::parse(text)
            .map(OptionNode::Template)
            .map_err(|message| ConfigError::Template {
                location: location.to_string(),
                message,
            })
    }

    /// Build a map node from parsed entries
    pub fn map_from(entries: &IndexMap<String, Value>, location: &str) -> ConfigResult<IndexMap<String, OptionNode>> {
        entries
            .iter()
            .map(|(key, value)| {
                let node = OptionNode::from_yaml(value, &format!("{}.{}", location, key))?;
                Ok((key.clone(), node))
            })
            .collect()
    }

    /// Child node for a single path segment
    pub fn child(&self, segment: &str) -> Option<&OptionNode> {
        match self {
            OptionNode::Map(map) => map.get(segment),
            OptionNode::List(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
    }

    /// True if this node or any descendant holds a placeholder
    pub fn has_placeholders(&self) -> bool {
        match self {
            OptionNode::Template(_) => true,
            OptionNode::List(items) => items.iter().any(OptionNode::has_placeholders),
            OptionNode::Map(map) => map.values().any(OptionNode::has_placeholders),
            _ => false,
        }
    }
}

fn yaml_key(key: &Value, location: &str) -> ConfigResult<String> {
    match key {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(ConfigError::Invalid(format!(
            "unsupported mapping key in '{}'",
            location
        ))),
    }
}

/// A string with one or more placeholders
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    /// The original text
    pub source: String,
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(String),
    Expr(Expr),
}

/// The inside of a `<%= ... %>` placeholder
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A dotted lookup such as `env.options.production.assets`
    Path(KeyPath),
    /// A helper call such as `today("%Y-%m-%d")`
    Call { helper: String, args: Vec<Arg> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Str(String),
    Number(String),
    Path(KeyPath),
}

impl Template {
    /// Split text into literal parts and parsed expressions
    pub fn parse(text: &str) -> Result<Self, String> {
        let mut parts = Vec::new();
        let mut last = 0;

        for caps in placeholder_regex().captures_iter(text) {
            let whole = caps.get(0).expect("capture 0 always present");
            push_text(&mut parts, &text[last..whole.start()])?;
            parts.push(Part::Expr(parse_expr(&caps[1])?));
            last = whole.end();
        }
        push_text(&mut parts, &text[last..])?;

        Ok(Template {
            source: text.to_string(),
            parts,
        })
    }

    /// The single path this template consists of, if it is exactly `<%= path %>`
    pub fn sole_path(&self) -> Option<&KeyPath> {
        match self.parts.as_slice() {
            [Part::Expr(Expr::Path(path))] => Some(path),
            _ => None,
        }
    }
}

fn push_text(parts: &mut Vec<Part>, text: &str) -> Result<(), String> {
    if text.contains(OPEN) {
        return Err("unterminated placeholder".to_string());
    }
    if !text.is_empty() {
        parts.push(Part::Text(text.to_string()));
    }
    Ok(())
}

/// A dotted key sequence
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyPath(Vec<String>);

impl KeyPath {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        KeyPath(segments.into_iter().map(Into::into).collect())
    }

    /// Parse `a.b.c`; empty segments are rejected
    pub fn parse(dotted: &str) -> Result<Self, String> {
        let segments: Vec<String> = dotted.split('.').map(|s| s.trim().to_string()).collect();
        if segments.iter().any(|s| s.is_empty() || !s.chars().all(is_ident_char)) {
            return Err(format!("invalid key path '{}'", dotted));
        }
        Ok(KeyPath(segments))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-' || c == '$'
}

/// Parse a placeholder body: either `dotted.path` or `helper(arg, ...)`
fn parse_expr(body: &str) -> Result<Expr, String> {
    let body = body.trim();
    if body.is_empty() {
        return Err("empty placeholder".to_string());
    }

    let Some(open) = body.find('(') else {
        return KeyPath::parse(body).map(Expr::Path);
    };

    if !body.ends_with(')') {
        return Err(format!("expected ')' at the end of '{}'", body));
    }

    let helper = body[..open].trim();
    KeyPath::parse(helper)?;
    let args = parse_args(&body[open + 1..body.len() - 1])?;

    Ok(Expr::Call {
        helper: helper.to_string(),
        args,
    })
}

fn parse_args(input: &str) -> Result<Vec<Arg>, String> {
    let mut args = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        let Some(&first) = chars.peek() else {
            break;
        };

        let arg = if first == '"' || first == '\'' {
            chars.next();
            let mut value = String::new();
            loop {
                match chars.next() {
                    Some('\\') => match chars.next() {
                        Some(escaped) => value.push(escaped),
                        None => return Err("unterminated string argument".to_string()),
                    },
                    Some(c) if c == first => break,
                    Some(c) => value.push(c),
                    None => return Err("unterminated string argument".to_string()),
                }
            }
            Arg::Str(value)
        } else {
            let mut token = String::new();
            while let Some(&c) = chars.peek() {
                if c == ',' || c.is_whitespace() {
                    break;
                }
                token.push(c);
                chars.next();
            }
            if is_number(&token) {
                Arg::Number(token)
            } else {
                Arg::Path(KeyPath::parse(&token)?)
            }
        };
        args.push(arg);

        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        match chars.next() {
            Some(',') => continue,
            None => break,
            Some(c) => return Err(format!("unexpected '{}' in helper arguments", c)),
        }
    }

    Ok(args)
}

/// Numeric literal; `inf` and `nan` stay paths
fn is_number(token: &str) -> bool {
    token
        .starts_with(|c: char| c.is_ascii_digit() || matches!(c, '-' | '+' | '.'))
        && token.parse::<f64>().is_ok()
}
