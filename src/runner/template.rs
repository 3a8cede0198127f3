//! Placeholder resolution
//!
//! Expands `<%= dotted.path %>` and `<%= helper(args) %>` placeholders
//! against a [`ConfigStore`]. Referenced values are resolved recursively and
//! the chain of paths being resolved is tracked, so a value that depends on
//! itself fails instead of recursing forever.

use crate::config::{Arg, ConfigStore, Expr, KeyPath, OptionNode, Part, Template};
use crate::error::{ResolveError, ResolveResult};
use indexmap::IndexMap;
use serde_yaml::Value;
use std::collections::HashMap;
use std::env;

/// A helper callable from a placeholder
pub type Helper = fn(&[String]) -> Result<String, String>;

/// Resolves option trees into plain YAML values
#[derive(Clone)]
pub struct Resolver {
    helpers: HashMap<String, Helper>,
}

impl Resolver {
    /// Resolver with the built-in helpers
    pub fn new() -> Self {
        let mut helpers: HashMap<String, Helper> = HashMap::new();
        helpers.insert("today".to_string(), helper_today);
        helpers.insert("template.today".to_string(), helper_today);
        helpers.insert("upper".to_string(), helper_upper);
        helpers.insert("lower".to_string(), helper_lower);
        helpers.insert("getenv".to_string(), helper_getenv);
        Resolver { helpers }
    }

    /// Resolve a single node
    pub fn resolve(&self, node: &OptionNode, store: &ConfigStore) -> ResolveResult<Value> {
        self.resolve_node(node, store, &mut Vec::new())
    }

    /// Resolve an options map, keeping key order
    pub fn resolve_map(
        &self,
        map: &IndexMap<String, OptionNode>,
        store: &ConfigStore,
    ) -> ResolveResult<IndexMap<String, Value>> {
        map.iter()
            .map(|(key, node)| Ok((key.clone(), self.resolve(node, store)?)))
            .collect()
    }

    /// Resolve a node that must produce a string
    pub fn resolve_string(&self, node: &OptionNode, store: &ConfigStore) -> ResolveResult<String> {
        let value = self.resolve(node, store)?;
        stringify(&value).ok_or_else(|| ResolveError::NotScalar(describe(node)))
    }

    /// Resolve the value at a dotted path
    pub fn resolve_path(&self, path: &KeyPath, store: &ConfigStore) -> ResolveResult<Value> {
        self.lookup(path, store, &mut Vec::new())
    }

    fn resolve_node(
        &self,
        node: &OptionNode,
        store: &ConfigStore,
        stack: &mut Vec<String>,
    ) -> ResolveResult<Value> {
        Ok(match node {
            OptionNode::Null => Value::Null,
            OptionNode::Bool(b) => Value::Bool(*b),
            OptionNode::Number(n) => Value::Number(n.clone()),
            OptionNode::Text(s) => Value::String(s.clone()),
            OptionNode::Template(template) => self.resolve_template(template, store, stack)?,
            OptionNode::List(items) => Value::Sequence(
                items
                    .iter()
                    .map(|item| self.resolve_node(item, store, stack))
                    .collect::<ResolveResult<Vec<_>>>()?,
            ),
            OptionNode::Map(map) => {
                let mut mapping = serde_yaml::Mapping::new();
                for (key, item) in map {
                    mapping.insert(
                        Value::String(key.clone()),
                        self.resolve_node(item, store, stack)?,
                    );
                }
                Value::Mapping(mapping)
            }
        })
    }

    fn resolve_template(
        &self,
        template: &Template,
        store: &ConfigStore,
        stack: &mut Vec<String>,
    ) -> ResolveResult<Value> {
        // `<%= path %>` on its own keeps the referenced value's type
        if let Some(path) = template.sole_path() {
            return self.lookup(path, store, stack);
        }

        let mut output = String::new();
        for part in &template.parts {
            match part {
                Part::Text(text) => output.push_str(text),
                Part::Expr(Expr::Path(path)) => {
                    let value = self.lookup(path, store, stack)?;
                    let text = stringify(&value)
                        .ok_or_else(|| ResolveError::NotScalar(path.to_string()))?;
                    output.push_str(&text);
                }
                Part::Expr(Expr::Call { helper, args }) => {
                    output.push_str(&self.call(helper, args, store, stack)?);
                }
            }
        }
        Ok(Value::String(output))
    }

    fn lookup(
        &self,
        path: &KeyPath,
        store: &ConfigStore,
        stack: &mut Vec<String>,
    ) -> ResolveResult<Value> {
        let key = path.to_string();
        if stack.contains(&key) {
            stack.push(key);
            let chain = stack.join(" -> ");
            return Err(ResolveError::CyclicReference(chain));
        }

        let node = store.get(path)?;
        stack.push(key);
        let result = self.resolve_node(node, store, stack);
        stack.pop();
        result
    }

    fn call(
        &self,
        helper: &str,
        args: &[Arg],
        store: &ConfigStore,
        stack: &mut Vec<String>,
    ) -> ResolveResult<String> {
        let function = self
            .helpers
            .get(helper)
            .ok_or_else(|| ResolveError::UnknownHelper(helper.to_string()))?;

        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(match arg {
                Arg::Str(s) | Arg::Number(s) => s.clone(),
                Arg::Path(path) => {
                    let value = self.lookup(path, store, stack)?;
                    stringify(&value).ok_or_else(|| ResolveError::NotScalar(path.to_string()))?
                }
            });
        }

        function(&values).map_err(|message| ResolveError::Helper {
            name: helper.to_string(),
            message,
        })
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Render a resolved value as text; lists join with commas, maps have no
/// text form
pub fn stringify(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some(String::new()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Sequence(items) => items
            .iter()
            .map(stringify)
            .collect::<Option<Vec<_>>>()
            .map(|parts| parts.join(",")),
        Value::Mapping(_) => None,
        Value::Tagged(tagged) => stringify(&tagged.value),
    }
}

fn describe(node: &OptionNode) -> String {
    match node {
        OptionNode::Template(template) => template.source.clone(),
        other => format!("{:?}", other),
    }
}

fn helper_today(args: &[String]) -> Result<String, String> {
    let format = args.first().map(String::as_str).unwrap_or("%Y-%m-%d");
    let mut output = String::new();
    use std::fmt::Write;
    write!(output, "{}", chrono::Local::now().format(format))
        .map_err(|_| format!("invalid date format '{}'", format))?;
    Ok(output)
}

fn helper_upper(args: &[String]) -> Result<String, String> {
    single_arg(args).map(str::to_uppercase)
}

fn helper_lower(args: &[String]) -> Result<String, String> {
    single_arg(args).map(str::to_lowercase)
}

fn helper_getenv(args: &[String]) -> Result<String, String> {
    let name = single_arg(args)?;
    env::var(name).map_err(|_| format!("environment variable '{}' is not set", name))
}

fn single_arg(args: &[String]) -> Result<&str, String> {
    match args {
        [only] => Ok(only.as_str()),
        _ => Err(format!("expected 1 argument, got {}", args.len())),
    }
}
