//! Decoded document tree
//!
//! Provides:
//! - `Value`: the uniform tree every decoder produces (fields, nested objects, collections)
//! - `Document`: an immutable snapshot of one decoded input
//! - `DocumentVisitor`: schema-driven walk over (path, field name, value, type tag)
//! - `Decoder`: the injected collaborator turning raw bytes into a `Document`

use chrono::{DateTime, FixedOffset};
use std::fmt;
use std::sync::Arc;

pub mod json;

pub use json::JsonDecoder;

/// Runtime type of a tree node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTag {
    Null,
    Bool,
    Integer,
    Float,
    Text,
    DateTime,
    Object,
    Collection,
}

impl TypeTag {
    pub fn is_numeric(self) -> bool {
        matches!(self, TypeTag::Integer | TypeTag::Float)
    }

    pub fn is_container(self) -> bool {
        matches!(self, TypeTag::Object | TypeTag::Collection)
    }
}

/// A named field of an object node
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub value: Value,
}

impl Field {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// A node of a decoded document
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    DateTime(DateTime<FixedOffset>),
    /// Fields in decode order
    Object(Vec<Field>),
    Collection(Vec<Value>),
}

impl Value {
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Value::Null => TypeTag::Null,
            Value::Bool(_) => TypeTag::Bool,
            Value::Integer(_) => TypeTag::Integer,
            Value::Float(_) => TypeTag::Float,
            Value::Text(_) => TypeTag::Text,
            Value::DateTime(_) => TypeTag::DateTime,
            Value::Object(_) => TypeTag::Object,
            Value::Collection(_) => TypeTag::Collection,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view used when comparing integers against floats
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Look up a field of an object node by name
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Object(fields) => fields.iter().find(|f| f.name == name).map(|f| &f.value),
            _ => None,
        }
    }

    /// Rendering used for difference values; `None` for null
    pub fn render(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(b.to_string()),
            Value::Integer(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::Text(s) => Some(s.clone()),
            Value::DateTime(dt) => Some(dt.to_rfc3339()),
            Value::Object(fields) => Some(format!("{{{} fields}}", fields.len())),
            Value::Collection(items) => Some(format!("[{} items]", items.len())),
        }
    }

    fn approx_size(&self) -> usize {
        let own = std::mem::size_of::<Value>();
        match self {
            Value::Text(s) => own + s.len(),
            Value::Object(fields) => {
                own + fields
                    .iter()
                    .map(|f| f.name.len() + f.value.approx_size())
                    .sum::<usize>()
            }
            Value::Collection(items) => own + items.iter().map(Value::approx_size).sum::<usize>(),
            _ => own,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.render() {
            Some(s) => write!(f, "{}", s),
            None => write!(f, "null"),
        }
    }
}

/// Callback interface for the schema-driven tree walk
pub trait DocumentVisitor {
    /// Called once per node; return `false` to skip the node's children
    fn visit(&mut self, path: &str, name: &str, value: &Value, tag: TypeTag) -> bool;
}

/// An immutable decoded snapshot of one input
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    model: String,
    root: Arc<Value>,
}

impl Document {
    pub fn new(model: impl Into<String>, root: Value) -> Self {
        Self {
            model: model.into(),
            root: Arc::new(root),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Walk every node depth-first, building dotted property paths
    pub fn walk<V: DocumentVisitor>(&self, visitor: &mut V) {
        walk_value(&self.root, "", "", visitor);
    }

    /// Number of scalar leaves in the tree
    pub fn leaf_count(&self) -> usize {
        struct Leaves(usize);
        impl DocumentVisitor for Leaves {
            fn visit(&mut self, _: &str, _: &str, _: &Value, tag: TypeTag) -> bool {
                if !tag.is_container() {
                    self.0 += 1;
                }
                true
            }
        }
        let mut leaves = Leaves(0);
        self.walk(&mut leaves);
        leaves.0
    }

    /// Rough in-memory footprint, used by cache pressure accounting
    pub fn approx_size_bytes(&self) -> usize {
        std::mem::size_of::<Self>() + self.model.len() + self.root.approx_size()
    }
}

fn walk_value<V: DocumentVisitor>(value: &Value, path: &str, name: &str, visitor: &mut V) {
    if !visitor.visit(path, name, value, value.type_tag()) {
        return;
    }
    match value {
        Value::Object(fields) => {
            for field in fields {
                let child = join_field(path, &field.name);
                walk_value(&field.value, &child, &field.name, visitor);
            }
        }
        Value::Collection(items) => {
            for (index, item) in items.iter().enumerate() {
                let child = join_index(path, index);
                walk_value(item, &child, name, visitor);
            }
        }
        _ => {}
    }
}

/// `Parent.Child`, or `Child` at the root
pub fn join_field(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", parent, name)
    }
}

/// `Parent[3]`
pub fn join_index(parent: &str, index: usize) -> String {
    format!("{}[{}]", parent, index)
}

/// Errors a decoder may report; opaque to the comparison core
#[derive(Debug, Clone, thiserror::Error)]
pub enum DecodeError {
    #[error("unsupported model '{0}'")]
    UnsupportedModel(String),
    #[error("input is empty")]
    Empty,
    #[error("malformed input: {0}")]
    Malformed(String),
}

/// Injected collaborator that turns raw bytes into a document tree
pub trait Decoder: Send + Sync {
    fn decode(&self, model: &str, raw: &[u8]) -> Result<Document, DecodeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Document {
        Document::new(
            "json",
            Value::Object(vec![
                Field::new("Status", Value::Text("Processing".into())),
                Field::new(
                    "Items",
                    Value::Collection(vec![Value::Integer(1), Value::Integer(2)]),
                ),
                Field::new(
                    "Customer",
                    Value::Object(vec![Field::new("Name", Value::Text("Ada".into()))]),
                ),
            ]),
        )
    }

    #[test]
    fn test_walk_builds_paths() {
        struct Paths(Vec<String>);
        impl DocumentVisitor for Paths {
            fn visit(&mut self, path: &str, _: &str, _: &Value, _: TypeTag) -> bool {
                self.0.push(path.to_string());
                true
            }
        }

        let mut paths = Paths(Vec::new());
        sample().walk(&mut paths);
        assert_eq!(
            paths.0,
            vec!["", "Status", "Items", "Items[0]", "Items[1]", "Customer", "Customer.Name"]
        );
    }

    #[test]
    fn test_leaf_count() {
        assert_eq!(sample().leaf_count(), 4);
    }

    #[test]
    fn test_visitor_can_skip_children() {
        struct TopOnly(usize);
        impl DocumentVisitor for TopOnly {
            fn visit(&mut self, path: &str, _: &str, _: &Value, _: TypeTag) -> bool {
                self.0 += 1;
                path.is_empty()
            }
        }
        let mut visitor = TopOnly(0);
        sample().walk(&mut visitor);
        assert_eq!(visitor.0, 4);
    }

    #[test]
    fn test_render_and_numeric_view() {
        assert_eq!(Value::Null.render(), None);
        assert_eq!(Value::Bool(true).render().as_deref(), Some("true"));
        assert_eq!(Value::Integer(3).as_f64(), Some(3.0));
        assert_eq!(Value::Text("x".into()).as_f64(), None);
        assert!(TypeTag::Float.is_numeric());
        assert!(TypeTag::Collection.is_container());
    }

    #[test]
    fn test_approx_size_grows_with_content() {
        let small = Document::new("json", Value::Text("a".into()));
        let large = Document::new("json", Value::Text("a".repeat(1000)));
        assert!(large.approx_size_bytes() > small.approx_size_bytes());
    }
}
