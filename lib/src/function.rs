//! Function definitions, the tables holding them, and instantiation of a
//! (possibly type-polymorphic) definition into a concrete body graph.

use std::collections::{BTreeMap, HashMap};

use itertools::Itertools;
use petgraph::stable_graph::NodeIndex;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::graph::{
  def::{parse_input, InputRef},
  fixup_source_and_sink_edges, AttrMap, AttrValue, Graph, Node, NodeDef,
};
use crate::types::DataType;

/// Either a concrete type or the name of a type attribute (`T`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TypeSpec {
  Fixed(DataType),
  Attr(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgDef {
  pub name: String,
  #[serde(rename = "type")]
  pub ty: TypeSpec,
}

/// `source` names the body output feeding this result, e.g. `"y"` or `"split:1"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetDef {
  pub name: String,
  #[serde(rename = "type")]
  pub ty: TypeSpec,
  pub source: String,
}

/// A type attribute. `allowed` restricts the types it may be instantiated with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttrDef {
  pub name: String,
  #[serde(default)]
  pub allowed: Option<Vec<DataType>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
  pub name: String,
  #[serde(default)]
  pub args: Vec<ArgDef>,
  #[serde(default)]
  pub rets: Vec<RetDef>,
  #[serde(default)]
  pub attrs: Vec<AttrDef>,
  #[serde(default)]
  pub nodes: Vec<NodeDef>,
}

/// Function name plus attribute bindings; what a call site refers to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NameAttrList {
  pub name: String,
  #[serde(default)]
  pub attrs: AttrMap,
}

impl NameAttrList {
  pub fn new(name: impl Into<String>) -> Self {
    NameAttrList {
      name: name.into(),
      attrs: AttrMap::new(),
    }
  }

  pub fn with_attr(mut self, key: impl Into<String>, value: AttrValue) -> Self {
    self.attrs.insert(key.into(), value);
    self
  }
}

/// Result of instantiation: a graph with `_Arg`/`_Retval` nodes plus signature types.
#[derive(Debug, Clone)]
pub struct FunctionBody {
  pub graph: Graph,
  pub arg_types: Vec<DataType>,
  pub ret_types: Vec<DataType>,
}

fn attrs_debug(attrs: &AttrMap) -> String {
  format!(
    "{{{}}}",
    attrs.iter().map(|(k, v)| format!("{}={}", k, v)).join(", ")
  )
}

impl FunctionDef {
  fn resolve_type(&self, spec: &TypeSpec, bound: &HashMap<&str, DataType>) -> Result<DataType> {
    match spec {
      TypeSpec::Fixed(t) => Ok(*t),
      TypeSpec::Attr(a) => bound.get(a.as_str()).copied().ok_or_else(|| {
        Error::InvalidAttribute(format!(
          "Function {} refers to undeclared type attr {}",
          self.name, a
        ))
      }),
    }
  }

  /// Binds type attributes from `attrs` and expands the body into a graph.
  #[instrument(level = "debug", skip(self, attrs), fields(function = %self.name))]
  pub fn instantiate(&self, attrs: &AttrMap) -> Result<FunctionBody> {
    let mut bound: HashMap<&str, DataType> = HashMap::new();
    for attr in self.attrs.iter() {
      let value = attrs.get(&attr.name).ok_or_else(|| {
        Error::InvalidAttribute(format!(
          "Attr {} is not found from {}",
          attr.name,
          attrs_debug(attrs)
        ))
      })?;
      let dtype = match value {
        AttrValue::Type(t) => *t,
        other => {
          return Err(Error::InvalidAttribute(format!(
            "Attr {} must be a type, got {}",
            attr.name, other
          )))
        }
      };
      if let Some(allowed) = &attr.allowed {
        if !allowed.contains(&dtype) {
          return Err(Error::InvalidAttribute(format!(
            "Value for attr '{}' of {} is not in the list of allowed values: {}",
            attr.name,
            dtype,
            allowed.iter().join(", ")
          )));
        }
      }
      bound.insert(attr.name.as_str(), dtype);
    }

    let substitute = |value: &AttrValue| -> Result<AttrValue> {
      match value {
        AttrValue::Placeholder(p) => match bound.get(p.as_str()) {
          Some(t) => Ok(AttrValue::Type(*t)),
          None => attrs.get(p).cloned().ok_or_else(|| {
            Error::InvalidAttribute(format!(
              "Attr {} is not found from {}",
              p,
              attrs_debug(attrs)
            ))
          }),
        },
        other => Ok(other.clone()),
      }
    };

    let mut graph = Graph::new();
    let mut by_name: HashMap<String, NodeIndex> = HashMap::new();
    let mut arg_types = vec![];
    for (i, arg) in self.args.iter().enumerate() {
      let dtype = self.resolve_type(&arg.ty, &bound)?;
      arg_types.push(dtype);
      let node = Node::new(arg.name.clone(), "_Arg")
        .with_attr("T", AttrValue::Type(dtype))
        .with_attr("index", AttrValue::Int(i as i64));
      by_name.insert(arg.name.clone(), graph.add_node(node));
    }
    for nd in self.nodes.iter() {
      if by_name.contains_key(&nd.name) {
        return Err(Error::InvalidGraph(format!(
          "Function {} defines {} twice",
          self.name, nd.name
        )));
      }
      let mut node = Node::new(nd.name.clone(), nd.op.clone());
      for (k, v) in nd.attrs.iter() {
        node.attrs.insert(k.clone(), substitute(v)?);
      }
      by_name.insert(nd.name.clone(), graph.add_node(node));
    }

    let lookup = |name: &str| {
      by_name.get(name).copied().ok_or_else(|| {
        Error::InvalidGraph(format!(
          "Function {} refers to unknown node {}",
          self.name, name
        ))
      })
    };
    for nd in self.nodes.iter() {
      let dst = lookup(&nd.name)?;
      let mut slot = 0;
      for input in nd.inputs.iter() {
        match parse_input(input)? {
          InputRef::Data { node, output } => {
            graph.add_edge(lookup(node)?, output, dst, slot);
            slot += 1;
          }
          InputRef::Control { node } => graph.add_control_edge(lookup(node)?, dst),
        }
      }
    }

    let mut ret_sources = vec![];
    for ret in self.rets.iter() {
      match parse_input(&ret.source)? {
        InputRef::Data { node, output } => ret_sources.push((lookup(node)?, output)),
        InputRef::Control { .. } => {
          return Err(Error::InvalidGraph(format!(
            "Function {} returns control input {}",
            self.name, ret.source
          )))
        }
      }
    }

    let mut ret_types = vec![];
    for (i, (ret, (src, output))) in self.rets.iter().zip(ret_sources).enumerate() {
      let dtype = self.resolve_type(&ret.ty, &bound)?;
      ret_types.push(dtype);
      let name = format!("{}_RetVal", ret.name);
      if by_name.contains_key(&name) {
        return Err(Error::InvalidGraph(format!(
          "Function {} defines {} twice",
          self.name, name
        )));
      }
      let node = Node::new(name.clone(), "_Retval")
        .with_attr("T", AttrValue::Type(dtype))
        .with_attr("index", AttrValue::Int(i as i64));
      let idx = graph.add_node(node);
      graph.add_edge(src, output, idx, 0);
      by_name.insert(name, idx);
    }

    fixup_source_and_sink_edges(&mut graph);
    debug!("instantiated {} with {} nodes", self.name, graph.num_op_nodes());
    Ok(FunctionBody {
      graph,
      arg_types,
      ret_types,
    })
  }
}

/// Name-keyed table of function definitions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionLibrary {
  functions: BTreeMap<String, FunctionDef>,
}

impl FunctionLibrary {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn from_defs(defs: impl IntoIterator<Item = FunctionDef>) -> Result<Self> {
    let mut lib = Self::new();
    for def in defs {
      lib.add_function(def)?;
    }
    Ok(lib)
  }

  /// Re-adding an identical definition is a no-op; a different one under the same name fails.
  pub fn add_function(&mut self, def: FunctionDef) -> Result<()> {
    match self.functions.get(&def.name) {
      Some(existing) if *existing == def => Ok(()),
      Some(_) => Err(Error::AlreadyExists(format!(
        "Function {} is already defined with a different body",
        def.name
      ))),
      None => {
        self.functions.insert(def.name.clone(), def);
        Ok(())
      }
    }
  }

  pub fn find(&self, name: &str) -> Option<&FunctionDef> {
    self.functions.get(name)
  }

  pub fn contains(&self, name: &str) -> bool {
    self.functions.contains_key(name)
  }

  pub fn len(&self) -> usize {
    self.functions.len()
  }

  pub fn is_empty(&self) -> bool {
    self.functions.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &FunctionDef> {
    self.functions.values()
  }

  pub fn instantiate(&self, name: &str, attrs: &AttrMap) -> Result<FunctionBody> {
    match self.find(name) {
      Some(def) => def.instantiate(attrs),
      None => Err(Error::FunctionNotFound(format!(
        "Function {} is not defined.",
        name
      ))),
    }
  }
}

/// Two-level lookup: the compiler's local table first, then the global one.
#[derive(Debug, Clone, Copy)]
pub struct FunctionResolver<'a> {
  local: &'a FunctionLibrary,
  global: &'a FunctionLibrary,
}

impl<'a> FunctionResolver<'a> {
  pub fn new(local: &'a FunctionLibrary, global: &'a FunctionLibrary) -> Self {
    FunctionResolver { local, global }
  }

  pub fn is_function(&self, name: &str) -> bool {
    self.local.contains(name) || self.global.contains(name)
  }

  /// If both tables fail and their reasons differ, the error carries both.
  pub fn instantiate(&self, name: &str, attrs: &AttrMap) -> Result<FunctionBody> {
    let local_err = match self.local.instantiate(name, attrs) {
      Ok(body) => return Ok(body),
      Err(e) => e,
    };
    let global_err = match self.global.instantiate(name, attrs) {
      Ok(body) => return Ok(body),
      Err(e) => e,
    };
    let (local_msg, global_msg) = (local_err.to_string(), global_err.to_string());
    if local_msg == global_msg {
      return Err(Error::FunctionNotFound(global_msg));
    }
    Err(Error::FunctionNotFound(format!(
      "Cannot instantiate function {}: local function library lookup failed with: {}; \
       global function library lookup failed with: {}",
      name, local_msg, global_msg
    )))
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use crate::error::ErrorKind;

  /// `XTimesTwo(x: T) -> y: T`, computed as `x * 2` with `two` cast to `T`.
  pub(crate) fn x_times_two() -> FunctionDef {
    let json = r#"{
      "name": "XTimesTwo",
      "args": [{"name": "x", "type": "T"}],
      "rets": [{"name": "y", "type": "T", "source": "y"}],
      "attrs": [{"name": "T", "allowed": ["float32", "float64", "int32", "int64"]}],
      "nodes": [
        {"name": "two", "op": "Const", "attrs": {
          "dtype": {"type": "int64"},
          "value": {"tensor": {"array": {"shape": [], "data": {"dtype": "int64", "values": [2]}}}}}},
        {"name": "scale", "op": "Cast", "inputs": ["two"], "attrs": {"DstT": {"placeholder": "T"}}},
        {"name": "y", "op": "Mul", "inputs": ["x", "scale"], "attrs": {"T": {"placeholder": "T"}}}
      ]
    }"#;
    serde_json::from_str(json).unwrap()
  }

  fn type_attr(t: DataType) -> AttrMap {
    let mut attrs = AttrMap::new();
    attrs.insert("T".to_string(), AttrValue::Type(t));
    attrs
  }

  #[test]
  fn instantiate_substitutes_placeholders() {
    let body = x_times_two().instantiate(&type_attr(DataType::Int32)).unwrap();
    assert_eq!(body.arg_types, vec![DataType::Int32]);
    assert_eq!(body.ret_types, vec![DataType::Int32]);
    let y = body.graph.find_node("y").unwrap();
    assert_eq!(
      body.graph.node(y).attr("T"),
      Some(&AttrValue::Type(DataType::Int32))
    );
    assert!(body.graph.find_node("y_RetVal").is_some());
    assert!(crate::graph::algorithm::validate_reachability(&body.graph).is_ok());
  }

  #[test]
  fn missing_attr_is_reported() {
    let err = x_times_two().instantiate(&AttrMap::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidAttribute);
    assert!(err.to_string().contains("Attr T is not found from {}"));
  }

  #[test]
  fn disallowed_type_is_rejected() {
    let err = x_times_two()
      .instantiate(&type_attr(DataType::Bool))
      .unwrap_err();
    assert!(err.to_string().contains("is not in the list of allowed values"));
  }

  #[test]
  fn resolver_combines_distinct_failures() {
    let mut local = FunctionLibrary::new();
    local.add_function(x_times_two()).unwrap();
    let global = FunctionLibrary::new();
    let resolver = FunctionResolver::new(&local, &global);
    let err = resolver.instantiate("XTimesTwo", &AttrMap::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FunctionNotFound);
    let msg = err.to_string();
    assert!(msg.contains("Attr T is not found from {}"));
    assert!(msg.contains("Function XTimesTwo is not defined."));
  }

  #[test]
  fn resolver_reports_single_reason_once() {
    let lib = FunctionLibrary::new();
    let err = FunctionResolver::new(&lib, &lib)
      .instantiate("Function_NotDefined_", &AttrMap::new())
      .unwrap_err();
    assert_eq!(err.to_string(), "Function Function_NotDefined_ is not defined.");
  }

  #[test]
  fn result_node_name_clash_is_rejected() {
    let mut def = x_times_two();
    def.nodes.push(NodeDef {
      name: "y_RetVal".to_string(),
      op: "Identity".to_string(),
      inputs: vec!["y".to_string()],
      attrs: Default::default(),
    });
    let err = def.instantiate(&type_attr(DataType::Int32)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidGraph);
    assert!(err.to_string().contains("defines y_RetVal twice"), "{}", err);
  }

  #[test]
  fn redefinition_with_other_body_fails() {
    let mut lib = FunctionLibrary::new();
    lib.add_function(x_times_two()).unwrap();
    lib.add_function(x_times_two()).unwrap();
    let mut other = x_times_two();
    other.nodes.pop();
    other.rets[0].source = "scale".to_string();
    assert_eq!(
      lib.add_function(other).unwrap_err().kind(),
      ErrorKind::AlreadyExists
    );
  }
}
