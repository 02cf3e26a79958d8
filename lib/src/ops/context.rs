use std::collections::BTreeMap;

use petgraph::stable_graph::NodeIndex;

use super::registry::OpDef;
use crate::argument::ResourceKind;
use crate::error::{Error, Result};
use crate::graph::{AttrValue, Graph, Node};
use crate::ir::{IrBuilder, IrOp};
use crate::literal::Literal;
use crate::resource::{ResourceHandle, ResourceTracker};
use crate::resource_store::ResourceStore;
use crate::types::{DataType, TensorShape};

/// What flows along a data edge during lowering.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
  Tensor(IrOp),
  Resource(ResourceHandle),
}

pub(crate) fn constant_expected(input: usize, name: &str, op: &str) -> Error {
  Error::ConstantExpected(format!(
    "Input {} to node `{}` with op {} must be a compile-time constant.\n\n\
     The operation needs this value while the graph is being compiled, but it depends on a \
     parameter to the computation, on a resource whose value is unknown at compile time, \
     or on some other data-dependent value.",
    input, name, op
  ))
}

/// Everything a lowering routine may touch while lowering one node.
pub struct LoweringContext<'a> {
  graph: &'a Graph,
  node: NodeIndex,
  def: &'a OpDef,
  inputs: Vec<Value>,
  outputs: Vec<Option<Value>>,
  excess_outputs: Vec<usize>,
  builder: &'a mut IrBuilder,
  resources: &'a mut ResourceTracker,
  store: &'a ResourceStore,
  arguments: &'a [Value],
  retvals: &'a mut BTreeMap<usize, Value>,
}

impl<'a> LoweringContext<'a> {
  #[allow(clippy::too_many_arguments)]
  pub(crate) fn new(
    graph: &'a Graph,
    node: NodeIndex,
    def: &'a OpDef,
    inputs: Vec<Value>,
    builder: &'a mut IrBuilder,
    resources: &'a mut ResourceTracker,
    store: &'a ResourceStore,
    arguments: &'a [Value],
    retvals: &'a mut BTreeMap<usize, Value>,
  ) -> Self {
    LoweringContext {
      graph,
      node,
      def,
      inputs,
      outputs: vec![None; def.num_outputs],
      excess_outputs: vec![],
      builder,
      resources,
      store,
      arguments,
      retvals,
    }
  }

  pub fn node(&self) -> &Node {
    self.graph.node(self.node)
  }

  pub fn name(&self) -> &str {
    &self.node().name
  }

  pub fn op(&self) -> &str {
    &self.node().op
  }

  pub fn num_inputs(&self) -> usize {
    self.inputs.len()
  }

  pub fn input_value(&self, i: usize) -> Result<&Value> {
    self.inputs.get(i).ok_or_else(|| {
      Error::InvalidArgument(format!(
        "node {} has {} inputs, requested input {}",
        self.name(),
        self.inputs.len(),
        i
      ))
    })
  }

  pub fn input(&self, i: usize) -> Result<IrOp> {
    match self.input_value(i)? {
      Value::Tensor(op) => Ok(*op),
      Value::Resource(_) => Err(Error::InvalidArgument(format!(
        "input {} to node {} is a resource, expected a tensor",
        i,
        self.name()
      ))),
    }
  }

  pub fn resource_input(&self, i: usize) -> Result<ResourceHandle> {
    match self.input_value(i)? {
      Value::Resource(handle) => Ok(handle.clone()),
      Value::Tensor(_) => Err(Error::InvalidArgument(format!(
        "input {} to node {} is a tensor, expected a resource",
        i,
        self.name()
      ))),
    }
  }

  pub fn input_type(&self, i: usize) -> Result<DataType> {
    Ok(self.builder.array_shape(self.input(i)?)?.0)
  }

  pub fn input_shape(&self, i: usize) -> Result<TensorShape> {
    Ok(self.builder.array_shape(self.input(i)?)?.1)
  }

  /// Evaluates input `i`, failing with `ConstantExpected` if it depends on a parameter.
  pub fn constant_input(&mut self, i: usize) -> Result<Literal> {
    let op = self.input(i)?;
    if !self.builder.is_constant(op)? {
      let node = self.graph.node(self.node);
      return Err(constant_expected(i, &node.name, &node.op));
    }
    self.builder.compute_constant(op)
  }

  /// A constant rank-0 or rank-1 integer input read as dimension sizes.
  pub fn constant_input_as_shape(&mut self, i: usize) -> Result<TensorShape> {
    let literal = self.constant_input(i)?;
    if literal.shape()?.rank() > 1 {
      return Err(Error::InvalidArgument(format!(
        "input {} to node {} must be a vector, got {}",
        i,
        self.name(),
        literal.shape()?
      )));
    }
    Ok(TensorShape::new(literal.to_i64_vec()?))
  }

  pub fn attr(&self, name: &str) -> Result<&AttrValue> {
    self.node().attr(name).ok_or_else(|| {
      Error::InvalidAttribute(format!("node {} has no attr '{}'", self.name(), name))
    })
  }

  pub fn attr_type(&self, name: &str) -> Result<DataType> {
    match self.attr(name)? {
      AttrValue::Type(t) => Ok(*t),
      other => Err(Error::InvalidAttribute(format!(
        "attr '{}' of node {} must be a type, got {}",
        name,
        self.name(),
        other
      ))),
    }
  }

  pub fn attr_type_or(&self, name: &str, default: DataType) -> Result<DataType> {
    if self.node().attr(name).is_none() {
      return Ok(default);
    }
    self.attr_type(name)
  }

  pub fn attr_int(&self, name: &str) -> Result<i64> {
    match self.attr(name)? {
      AttrValue::Int(i) => Ok(*i),
      other => Err(Error::InvalidAttribute(format!(
        "attr '{}' of node {} must be an int, got {}",
        name,
        self.name(),
        other
      ))),
    }
  }

  pub fn attr_str(&self, name: &str) -> Result<&str> {
    match self.attr(name)? {
      AttrValue::Str(s) => Ok(s),
      other => Err(Error::InvalidAttribute(format!(
        "attr '{}' of node {} must be a string, got {}",
        name,
        self.name(),
        other
      ))),
    }
  }

  pub fn attr_tensor(&self, name: &str) -> Result<&Literal> {
    match self.attr(name)? {
      AttrValue::Tensor(t) => Ok(t),
      other => Err(Error::InvalidAttribute(format!(
        "attr '{}' of node {} must be a tensor, got {}",
        name,
        self.name(),
        other
      ))),
    }
  }

  pub fn builder(&mut self) -> &mut IrBuilder {
    &mut *self.builder
  }

  pub fn resources(&mut self) -> &mut ResourceTracker {
    &mut *self.resources
  }

  pub fn builder_and_resources(&mut self) -> (&mut IrBuilder, &mut ResourceTracker) {
    (&mut *self.builder, &mut *self.resources)
  }

  pub fn resource_store(&self) -> &ResourceStore {
    self.store
  }

  pub fn argument(&self, index: usize) -> Result<Value> {
    self.arguments.get(index).cloned().ok_or_else(|| {
      Error::InvalidArgument(format!(
        "node {} refers to argument {}, but only {} were supplied",
        self.name(),
        index,
        self.arguments.len()
      ))
    })
  }

  pub fn set_retval(&mut self, index: usize, value: Value) -> Result<()> {
    if self.retvals.insert(index, value).is_some() {
      return Err(Error::InvalidGraph(format!(
        "return value {} is produced twice (second time by {})",
        index,
        self.graph.node(self.node).name
      )));
    }
    Ok(())
  }

  pub fn set_output_value(&mut self, i: usize, value: Value) {
    match self.outputs.get_mut(i) {
      Some(slot) => *slot = Some(value),
      None => self.excess_outputs.push(i),
    }
  }

  pub fn set_output(&mut self, i: usize, op: IrOp) {
    self.set_output_value(i, Value::Tensor(op));
  }

  pub fn set_resource_output(&mut self, i: usize, handle: ResourceHandle) {
    self.set_output_value(i, Value::Resource(handle));
  }

  fn check_variable(&self, handle: &ResourceHandle, dtype: DataType) -> Result<()> {
    let resource = self.resources.resource(handle)?;
    if resource.kind != ResourceKind::Variable {
      return Err(Error::InvalidArgument(format!(
        "{} is a {}, expected a variable",
        resource.name, resource.kind
      )));
    }
    if resource.dtype != dtype {
      return Err(Error::InvalidArgument(format!(
        "Trying to access variable {} of type {} as {}",
        resource.name, resource.dtype, dtype
      )));
    }
    Ok(())
  }

  pub fn read_variable(&mut self, handle: &ResourceHandle, dtype: DataType) -> Result<IrOp> {
    self.check_variable(handle, dtype)?;
    self.resources.read(handle)
  }

  pub fn assign_variable(&mut self, handle: &ResourceHandle, dtype: DataType, value: IrOp) -> Result<()> {
    self.check_variable(handle, dtype)?;
    self.resources.write(handle, value, &*self.builder)
  }

  /// Checks the routine set exactly the declared outputs.
  pub(crate) fn finish(self) -> Result<Vec<Value>> {
    let node = self.graph.node(self.node);
    if let Some(i) = self.excess_outputs.first() {
      return Err(Error::InternalError(format!(
        "node {} (op {}) set output {} but declares {} outputs",
        node.name, node.op, i, self.def.num_outputs
      )));
    }
    self
      .outputs
      .into_iter()
      .enumerate()
      .map(|(i, v)| {
        v.ok_or_else(|| {
          Error::InternalError(format!(
            "node {} (op {}) did not set output {}",
            node.name, node.op, i
          ))
        })
      })
      .collect()
  }
}
