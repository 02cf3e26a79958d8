use std::{collections::BTreeSet, fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::literal::Literal;
use crate::types::{DataType, TensorShape};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgumentKind {
  Parameter,
  Constant,
  Resource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
  Variable,
  TensorArray,
}

impl fmt::Display for ResourceKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ResourceKind::Variable => write!(f, "variable"),
      ResourceKind::TensorArray => write!(f, "tensor array"),
    }
  }
}

/// One entry value of the computation.
///
/// For a variable `shape` is the value's shape. For a tensor array it is the
/// element shape; the stored value has shape `[tensor_array_size] + shape`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Argument {
  pub kind: ArgumentKind,
  pub dtype: DataType,
  #[serde(default)]
  pub shape: TensorShape,
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub resource_kind: Option<ResourceKind>,
  #[serde(default)]
  pub initialized: bool,
  #[serde(default)]
  pub tensor_array_size: Option<i64>,
  #[serde(default)]
  pub tensor_array_gradients: BTreeSet<String>,
  #[serde(default)]
  pub constant_value: Option<Literal>,
}

impl Argument {
  fn base(kind: ArgumentKind, dtype: DataType, shape: TensorShape) -> Self {
    Argument {
      kind,
      dtype,
      shape,
      name: String::new(),
      resource_kind: None,
      initialized: false,
      tensor_array_size: None,
      tensor_array_gradients: BTreeSet::new(),
      constant_value: None,
    }
  }

  pub fn parameter(dtype: DataType, shape: TensorShape) -> Self {
    Self::base(ArgumentKind::Parameter, dtype, shape)
  }

  /// Type and shape are taken from the value. Fails on a tuple literal.
  pub fn constant(value: Literal) -> Result<Self> {
    let mut arg = Self::base(ArgumentKind::Constant, value.dtype()?, value.shape()?.clone());
    arg.constant_value = Some(value);
    Ok(arg)
  }

  pub fn variable(dtype: DataType, shape: TensorShape, initialized: bool) -> Self {
    let mut arg = Self::base(ArgumentKind::Resource, dtype, shape);
    arg.resource_kind = Some(ResourceKind::Variable);
    arg.initialized = initialized;
    arg
  }

  pub fn tensor_array(
    dtype: DataType,
    element_shape: TensorShape,
    size: i64,
    initialized: bool,
    gradients: impl IntoIterator<Item = impl Into<String>>,
  ) -> Self {
    let mut arg = Self::base(ArgumentKind::Resource, dtype, element_shape);
    arg.resource_kind = Some(ResourceKind::TensorArray);
    arg.initialized = initialized;
    arg.tensor_array_size = Some(size);
    arg.tensor_array_gradients = gradients.into_iter().map(Into::into).collect();
    arg
  }

  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  pub fn is_resource(&self) -> bool {
    self.kind == ArgumentKind::Resource
  }

  /// Shape of the value a resource holds: the variable's shape, or the
  /// element shape prefixed with the array size.
  pub fn value_shape(&self) -> TensorShape {
    match (self.resource_kind, self.tensor_array_size) {
      (Some(ResourceKind::TensorArray), Some(size)) => self.shape.prepend(size),
      _ => self.shape.clone(),
    }
  }

  pub fn validate(&self, index: usize) -> Result<()> {
    let fail = |why: &str| {
      Err(Error::InvalidArgument(format!(
        "argument {} ({:?}): {}",
        index, self.kind, why
      )))
    };
    if !self.shape.is_valid() {
      return fail("shape has negative dimensions");
    }
    match self.kind {
      ArgumentKind::Parameter => {
        if self.dtype == DataType::Resource {
          return fail("parameters cannot have resource type");
        }
      }
      ArgumentKind::Constant => {
        let Some(value) = &self.constant_value else {
          return fail("constant argument without a value");
        };
        if value.is_tuple() || value.dtype()? != self.dtype || *value.shape()? != self.shape {
          return fail("constant value does not match the declared type and shape");
        }
      }
      ArgumentKind::Resource => match self.resource_kind {
        None => return fail("resource argument without a resource kind"),
        Some(ResourceKind::Variable) => {
          if !self.tensor_array_gradients.is_empty() {
            return fail("variables have no gradients");
          }
        }
        Some(ResourceKind::TensorArray) => match self.tensor_array_size {
          Some(size) if size >= 0 => {}
          _ => return fail("tensor array without a valid size"),
        },
      },
    }
    if self.kind != ArgumentKind::Resource && self.resource_kind.is_some() {
      return fail("resource kind set on a non-resource argument");
    }
    Ok(())
  }
}

/// Maps a logical `(shape, dtype)` to the physical shape used inside the IR.
pub type ShapeRepresentationFn = Arc<dyn Fn(&TensorShape, DataType) -> TensorShape + Send + Sync>;

pub fn identity_shape_representation() -> ShapeRepresentationFn {
  Arc::new(|shape: &TensorShape, _: DataType| shape.clone())
}

/// Flattens every shape to `[num_elements]`.
pub fn flattening_shape_representation() -> ShapeRepresentationFn {
  Arc::new(|shape: &TensorShape, _: DataType| TensorShape::new(vec![shape.num_elements()]))
}

/// Applies the hook, rejecting results that do not preserve the element count.
pub fn physical_shape(
  hook: &ShapeRepresentationFn,
  logical: &TensorShape,
  dtype: DataType,
) -> Result<TensorShape> {
  let physical = hook(logical, dtype);
  if !physical.is_valid() || physical.num_elements() != logical.num_elements() {
    return Err(Error::InvalidArgument(format!(
      "shape representation maps {} ({} elements) to {} ({} elements)",
      logical,
      logical.num_elements(),
      physical,
      physical.num_elements()
    )));
  }
  Ok(physical)
}
