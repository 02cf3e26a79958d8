use std::{collections::BTreeMap, fmt};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::function::NameAttrList;
use crate::literal::Literal;
use crate::types::{DataType, TensorShape};

/// Typed node attribute.
///
/// `Placeholder("T")` only appears inside function bodies (written `$T` in
/// debug output) and is substituted when the function is instantiated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttrValue {
  Type(DataType),
  Int(i64),
  Float(f64),
  Bool(bool),
  Str(String),
  Shape(TensorShape),
  Tensor(Literal),
  List(Vec<AttrValue>),
  Func(NameAttrList),
  Placeholder(String),
}

impl fmt::Display for AttrValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      AttrValue::Type(t) => write!(f, "{}", t),
      AttrValue::Int(i) => write!(f, "{}", i),
      AttrValue::Float(x) => write!(f, "{}", x),
      AttrValue::Bool(b) => write!(f, "{}", b),
      AttrValue::Str(s) => write!(f, "\"{}\"", s),
      AttrValue::Shape(s) => write!(f, "{}", s),
      AttrValue::Tensor(t) => write!(f, "Tensor<{}>", t),
      AttrValue::List(l) => write!(f, "[{}]", l.iter().join(", ")),
      AttrValue::Func(func) => write!(f, "{}", func.name),
      AttrValue::Placeholder(p) => write!(f, "${}", p),
    }
  }
}

pub type AttrMap = BTreeMap<String, AttrValue>;

/// Operation name plus attributes. Inputs live on the graph's edges.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
  pub name: String,
  pub op: String,
  pub attrs: AttrMap,
}

impl Node {
  pub fn new(name: impl Into<String>, op: impl Into<String>) -> Self {
    Node {
      name: name.into(),
      op: op.into(),
      attrs: AttrMap::new(),
    }
  }

  pub fn with_attr(mut self, key: impl Into<String>, value: AttrValue) -> Self {
    self.attrs.insert(key.into(), value);
    self
  }

  pub fn attr(&self, key: &str) -> Option<&AttrValue> {
    self.attrs.get(key)
  }

  pub fn attrs_string(&self) -> String {
    self
      .attrs
      .iter()
      .filter(|(k, _)| !k.starts_with('_'))
      .map(|(k, v)| format!("{}={}", k, v))
      .join(", ")
  }
}

impl fmt::Display for Node {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} = {}", self.name, self.op)
  }
}

/// Data edges carry the producer's output slot and the consumer's input slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Edge {
  Data { src_output: usize, dst_input: usize },
  Control,
}

impl Edge {
  pub fn as_data(&self) -> Option<(usize, usize)> {
    match self {
      Edge::Data {
        src_output,
        dst_input,
      } => Some((*src_output, *dst_input)),
      Edge::Control => None,
    }
  }

  pub fn is_control(&self) -> bool {
    matches!(self, Edge::Control)
  }
}

impl fmt::Display for Edge {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Edge::Data {
        src_output,
        dst_input,
      } => write!(f, "{}->{}", src_output, dst_input),
      Edge::Control => write!(f, "^"),
    }
  }
}
