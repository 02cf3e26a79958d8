//! Per-compilation state of resource arguments.
//!
//! [Note: resource updates]
//!   Every resource starts with an entry value: the IR parameter when the caller supplied one, or
//!   zeros. Reads return the current value handle; writes replace it. A resource is reported as
//!   updated when its value handle differs from the entry handle, when any gradient's value differs
//!   from its entry handle, or when a gradient was created during lowering. A gradient that already
//!   existed at entry and is only read is not an update.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::argument::ResourceKind;
use crate::error::{Error, Result};
use crate::ir::{IrBuilder, IrOp};
use crate::types::{DataType, TensorShape};

/// What a resource-typed edge carries: the resource, optionally narrowed to one gradient.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceHandle {
  pub resource: usize,
  pub gradient: Option<String>,
}

#[derive(Debug, Clone)]
struct Gradient {
  initial: Option<IrOp>,
  value: IrOp,
}

#[derive(Debug, Clone)]
pub struct Resource {
  pub arg_index: usize,
  pub kind: ResourceKind,
  pub name: String,
  pub dtype: DataType,
  /// Logical shape of the stored value; `[size] + element_shape` for tensor arrays.
  pub shape: TensorShape,
  pub tensor_array_size: Option<i64>,
  pub initialized: bool,
  initial_value: IrOp,
  value: IrOp,
  gradients: BTreeMap<String, Gradient>,
}

impl Resource {
  pub fn variable(
    arg_index: usize,
    name: &str,
    dtype: DataType,
    shape: TensorShape,
    initialized: bool,
    initial_value: IrOp,
  ) -> Self {
    Resource {
      arg_index,
      kind: ResourceKind::Variable,
      name: name.to_string(),
      dtype,
      shape,
      tensor_array_size: None,
      initialized,
      initial_value,
      value: initial_value,
      gradients: BTreeMap::new(),
    }
  }

  /// `gradients` holds the entry value of every gradient declared by the caller.
  pub fn tensor_array(
    arg_index: usize,
    name: &str,
    dtype: DataType,
    shape: TensorShape,
    initialized: bool,
    initial_value: IrOp,
    gradients: BTreeMap<String, IrOp>,
  ) -> Self {
    let size = shape.dims().first().copied();
    Resource {
      arg_index,
      kind: ResourceKind::TensorArray,
      name: name.to_string(),
      dtype,
      shape,
      tensor_array_size: size,
      initialized,
      initial_value,
      value: initial_value,
      gradients: gradients
        .into_iter()
        .map(|(name, op)| {
          (
            name,
            Gradient {
              initial: Some(op),
              value: op,
            },
          )
        })
        .collect(),
    }
  }

  pub fn value(&self) -> IrOp {
    self.value
  }

  pub fn initial_value(&self) -> IrOp {
    self.initial_value
  }

  pub fn element_shape(&self) -> TensorShape {
    match self.kind {
      ResourceKind::TensorArray => TensorShape::new(self.shape.dims()[1..].to_vec()),
      ResourceKind::Variable => self.shape.clone(),
    }
  }

  pub fn gradient_names(&self) -> BTreeSet<String> {
    self.gradients.keys().cloned().collect()
  }

  /// Current gradient values in name order.
  pub fn gradient_values(&self) -> Vec<IrOp> {
    self.gradients.values().map(|g| g.value).collect()
  }

  pub fn is_modified(&self) -> bool {
    self.value != self.initial_value
      || self
        .gradients
        .values()
        .any(|g| g.initial != Some(g.value))
  }
}

#[derive(Debug, Default)]
pub struct ResourceTracker {
  resources: Vec<Resource>,
}

impl ResourceTracker {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add(&mut self, resource: Resource) -> ResourceHandle {
    self.resources.push(resource);
    ResourceHandle {
      resource: self.resources.len() - 1,
      gradient: None,
    }
  }

  /// In argument order.
  pub fn resources(&self) -> &[Resource] {
    &self.resources
  }

  pub fn resource(&self, handle: &ResourceHandle) -> Result<&Resource> {
    self.resources.get(handle.resource).ok_or_else(|| {
      Error::InternalError(format!("unknown resource handle {}", handle.resource))
    })
  }

  fn resource_mut(&mut self, handle: &ResourceHandle) -> Result<&mut Resource> {
    self.resources.get_mut(handle.resource).ok_or_else(|| {
      Error::InternalError(format!("unknown resource handle {}", handle.resource))
    })
  }

  pub fn read(&self, handle: &ResourceHandle) -> Result<IrOp> {
    let resource = self.resource(handle)?;
    match &handle.gradient {
      None => Ok(resource.value),
      Some(name) => resource
        .gradients
        .get(name)
        .map(|g| g.value)
        .ok_or_else(|| Error::InternalError(format!("{} has no gradient {}", resource.name, name))),
    }
  }

  /// The new value must keep the resource's type and logical shape.
  pub fn write(&mut self, handle: &ResourceHandle, value: IrOp, builder: &IrBuilder) -> Result<()> {
    let (dtype, shape) = builder.array_shape(value)?;
    let resource = self.resource_mut(handle)?;
    if dtype != resource.dtype || shape != resource.shape {
      return Err(Error::InvalidArgument(format!(
        "Trying to assign {}{} to {} {} of type {}{}",
        dtype, shape, resource.kind, resource.name, resource.dtype, resource.shape
      )));
    }
    match &handle.gradient {
      None => resource.value = value,
      Some(name) => {
        let gradient = resource.gradients.get_mut(name).ok_or_else(|| {
          Error::InternalError(format!("{} has no gradient {}", resource.name, name))
        })?;
        gradient.value = value;
      }
    }
    debug!("wrote {} (arg {})", resource.name, resource.arg_index);
    Ok(())
  }

  /// Returns a handle to the named gradient of a tensor array, creating it
  /// zero-filled if it does not exist yet.
  pub fn gradient(&mut self, handle: &ResourceHandle, source: &str, builder: &mut IrBuilder) -> Result<ResourceHandle> {
    let resource = self.resource_mut(handle)?;
    if resource.kind != ResourceKind::TensorArray {
      return Err(Error::InvalidArgument(format!(
        "{} is a {}, gradients exist only for tensor arrays",
        resource.name, resource.kind
      )));
    }
    if !resource.gradients.contains_key(source) {
      let zeros = builder.zeros(resource.dtype, &resource.shape)?;
      debug!("created gradient {} of {}", source, resource.name);
      resource.gradients.insert(
        source.to_string(),
        Gradient {
          initial: None,
          value: zeros,
        },
      );
    }
    Ok(ResourceHandle {
      resource: handle.resource,
      gradient: Some(source.to_string()),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::literal::Literal;

  fn tensor_array(builder: &mut IrBuilder, declared: &[&str]) -> Resource {
    let shape = TensorShape::new(vec![2]);
    let base = builder.zeros(DataType::Int32, &shape).unwrap();
    let gradients = declared
      .iter()
      .map(|g| (g.to_string(), builder.zeros(DataType::Int32, &shape).unwrap()))
      .collect();
    Resource::tensor_array(0, "ta", DataType::Int32, shape, true, base, gradients)
  }

  #[test]
  fn write_marks_variable_modified() {
    let mut builder = IrBuilder::new("t");
    let init = builder.constant(Literal::r1(&[1i32, 2]));
    let mut tracker = ResourceTracker::new();
    let h = tracker.add(Resource::variable(
      0,
      "v",
      DataType::Int32,
      TensorShape::new(vec![2]),
      true,
      init,
    ));
    assert!(!tracker.resources()[0].is_modified());
    let one = builder.constant(Literal::r1(&[1i32, 1]));
    let sum = builder.add(tracker.read(&h).unwrap(), one).unwrap();
    tracker.write(&h, sum, &builder).unwrap();
    assert!(tracker.resources()[0].is_modified());
    assert_eq!(tracker.read(&h).unwrap(), sum);

    let wrong = builder.constant(Literal::r1(&[1i32, 2, 3]));
    assert!(tracker.write(&h, wrong, &builder).is_err());
  }

  #[test]
  fn accessing_declared_gradient_is_not_an_update() {
    let mut builder = IrBuilder::new("t");
    let mut tracker = ResourceTracker::new();
    let h = tracker.add(tensor_array(&mut builder, &["grad1"]));
    let g = tracker.gradient(&h, "grad1", &mut builder).unwrap();
    tracker.read(&g).unwrap();
    assert!(!tracker.resources()[0].is_modified());
  }

  #[test]
  fn creating_gradient_is_an_update() {
    let mut builder = IrBuilder::new("t");
    let mut tracker = ResourceTracker::new();
    let h = tracker.add(tensor_array(&mut builder, &["grad1"]));
    tracker.gradient(&h, "grad2", &mut builder).unwrap();
    let resource = &tracker.resources()[0];
    assert!(resource.is_modified());
    assert_eq!(
      resource.gradient_names().into_iter().collect::<Vec<_>>(),
      vec!["grad1".to_string(), "grad2".to_string()]
    );
  }
}
