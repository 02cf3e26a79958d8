use std::{
  collections::{BTreeMap, BTreeSet},
  fmt,
  sync::{Arc, OnceLock},
};

use itertools::Itertools;

use super::context::LoweringContext;
use super::kernels;
use crate::error::{Error, Result};
use crate::graph::{AttrValue, Node};
use crate::types::DataType;

pub const DEVICE_CPU_JIT: &str = "CPU_JIT";
pub const DEVICE_GPU_JIT: &str = "GPU_JIT";

/// Lowers one node into IR through its context.
pub type LoweringFn = Arc<dyn Fn(&mut LoweringContext<'_>) -> Result<()> + Send + Sync>;

/// Static signature of an operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpDef {
  pub name: String,
  /// `None` accepts any number of data inputs.
  pub num_inputs: Option<usize>,
  pub num_outputs: usize,
  /// Type attributes and the values they may take. Validated only when present on the node.
  pub type_attrs: Vec<(String, Vec<DataType>)>,
  pub required_attrs: Vec<String>,
  /// Inputs that must be known at compile time.
  pub compile_time_constant_inputs: Vec<usize>,
  /// Output depends on input shapes only, never on input values.
  pub metadata_only: bool,
}

impl OpDef {
  pub fn new(name: &str) -> Self {
    OpDef {
      name: name.to_string(),
      num_inputs: Some(0),
      num_outputs: 0,
      ..Default::default()
    }
  }

  pub fn inputs(mut self, n: usize) -> Self {
    self.num_inputs = Some(n);
    self
  }

  pub fn variadic_inputs(mut self) -> Self {
    self.num_inputs = None;
    self
  }

  pub fn outputs(mut self, n: usize) -> Self {
    self.num_outputs = n;
    self
  }

  pub fn type_attr(mut self, name: &str, allowed: &[DataType]) -> Self {
    self.type_attrs.push((name.to_string(), allowed.to_vec()));
    self
  }

  pub fn required_attr(mut self, name: &str) -> Self {
    self.required_attrs.push(name.to_string());
    self
  }

  pub fn const_input(mut self, index: usize) -> Self {
    self.compile_time_constant_inputs.push(index);
    self
  }

  pub fn metadata_only(mut self) -> Self {
    self.metadata_only = true;
    self
  }

  /// Checks required attributes and the allowed values of type attributes.
  pub fn validate_attrs(&self, node: &Node) -> Result<()> {
    for name in self.required_attrs.iter() {
      if !node.attrs.contains_key(name) {
        return Err(Error::InvalidAttribute(format!(
          "NodeDef missing attr '{}' from Op<name={}>",
          name, self.name
        )));
      }
    }
    for (name, value) in node.attrs.iter() {
      if let AttrValue::Placeholder(p) = value {
        return Err(Error::InvalidAttribute(format!(
          "attr '{}' still refers to unbound placeholder ${}",
          name, p
        )));
      }
    }
    for (name, allowed) in self.type_attrs.iter() {
      match node.attrs.get(name) {
        None => {}
        Some(AttrValue::Type(t)) if allowed.contains(t) => {}
        Some(AttrValue::Type(t)) => {
          return Err(Error::InvalidAttribute(format!(
            "Value for attr '{}' of {} is not in the list of allowed values: {}",
            name,
            t,
            allowed.iter().join(", ")
          )))
        }
        Some(other) => {
          return Err(Error::InvalidAttribute(format!(
            "attr '{}' must be a type, got {}",
            name, other
          )))
        }
      }
    }
    Ok(())
  }
}

#[derive(Clone)]
pub struct OpRegistration {
  pub def: OpDef,
  /// `None` registers for every backend.
  pub backends: Option<BTreeSet<String>>,
  pub lower: LoweringFn,
}

impl OpRegistration {
  pub fn new<F>(def: OpDef, lower: F) -> Self
  where
    F: Fn(&mut LoweringContext<'_>) -> Result<()> + Send + Sync + 'static,
  {
    OpRegistration {
      def,
      backends: None,
      lower: Arc::new(lower),
    }
  }

  pub fn backend(mut self, backend: &str) -> Self {
    self
      .backends
      .get_or_insert_with(BTreeSet::new)
      .insert(backend.to_string());
    self
  }

  pub fn applies_to(&self, backend: &str) -> bool {
    match &self.backends {
      None => true,
      Some(backends) => backends.contains(backend),
    }
  }
}

impl fmt::Debug for OpRegistration {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("OpRegistration")
      .field("def", &self.def)
      .field("backends", &self.backends)
      .finish()
  }
}

/// Operation name to lowering routine, optionally scoped per backend.
///
/// [Note: registration order]
///   Registrations for one name accumulate. Lookup walks them newest first and returns the first
///   one that applies to the requested backend, so the last registration for a backend wins and
///   registrations for other backends are ignored.
#[derive(Debug, Default, Clone)]
pub struct OpRegistry {
  ops: BTreeMap<String, Vec<OpRegistration>>,
}

static DEFAULT_REGISTRY: OnceLock<Arc<OpRegistry>> = OnceLock::new();

impl OpRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_builtin_kernels() -> Self {
    let mut registry = Self::new();
    kernels::register_builtin_kernels(&mut registry);
    registry
  }

  /// Process-wide registry holding the builtin kernels, built on first use and never mutated.
  pub fn global() -> Arc<OpRegistry> {
    DEFAULT_REGISTRY
      .get_or_init(|| Arc::new(Self::with_builtin_kernels()))
      .clone()
  }

  pub fn register(&mut self, registration: OpRegistration) {
    self
      .ops
      .entry(registration.def.name.clone())
      .or_default()
      .push(registration);
  }

  pub fn lookup(&self, op: &str, backend: &str) -> Option<&OpRegistration> {
    self
      .ops
      .get(op)?
      .iter()
      .rev()
      .find(|r| r.applies_to(backend))
  }

  pub fn is_registered(&self, op: &str) -> bool {
    self.ops.contains_key(op)
  }

  /// Sorted names of the operations available on `backend`.
  pub fn op_names(&self, backend: &str) -> Vec<String> {
    self
      .ops
      .iter()
      .filter(|(_, regs)| regs.iter().any(|r| r.applies_to(backend)))
      .map(|(name, _)| name.clone())
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn marker(def: OpDef, outputs: usize) -> OpRegistration {
    OpRegistration::new(def.outputs(outputs), |_: &mut LoweringContext<'_>| Ok(()))
  }

  #[test]
  fn last_registration_for_backend_wins() {
    let mut registry = OpRegistry::new();
    registry.register(marker(OpDef::new("Dup").inputs(1), 1).backend(DEVICE_CPU_JIT));
    registry.register(marker(OpDef::new("Dup").inputs(1), 2).backend(DEVICE_CPU_JIT));
    registry.register(marker(OpDef::new("Dup").inputs(1), 3).backend(DEVICE_GPU_JIT));
    assert_eq!(registry.lookup("Dup", DEVICE_CPU_JIT).unwrap().def.num_outputs, 2);
    assert_eq!(registry.lookup("Dup", DEVICE_GPU_JIT).unwrap().def.num_outputs, 3);
    assert!(registry.lookup("Dup", "TPU_JIT").is_none());
    assert!(registry.lookup("Missing", DEVICE_CPU_JIT).is_none());
  }

  #[test]
  fn allowed_values_are_enforced() {
    let def = OpDef::new("Shape")
      .inputs(1)
      .outputs(1)
      .type_attr("out_type", DataType::INDEX);
    let node = Node::new("Shape", "Shape").with_attr("out_type", AttrValue::Type(DataType::Bool));
    let err = def.validate_attrs(&node).unwrap_err();
    assert!(err.to_string().contains("is not in the list of allowed values"));
  }

  #[test]
  fn global_registry_has_builtins() {
    let registry = OpRegistry::global();
    let names = registry.op_names(DEVICE_CPU_JIT);
    for op in ["_Arg", "_Retval", "Add", "Reshape", "TensorArrayGradV3"] {
      assert!(names.contains(&op.to_string()), "missing {}", op);
    }
    assert!(registry.lookup("Switch", DEVICE_CPU_JIT).is_none());
  }
}
