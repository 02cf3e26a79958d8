use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::argument::{physical_shape, ResourceKind, ShapeRepresentationFn};
use crate::error::{Error, Result};
use crate::ir::{Computation, IrBuilder, IrOp, Shape, MAX_FOLDED_ELEMENTS};
use crate::literal::Literal;
use crate::ops::Value;
use crate::resource::{Resource, ResourceTracker};
use crate::types::{DataType, TensorShape};

use super::{CompileOptions, Parameters};

/// One return value of the compiled graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputDescription {
  pub is_constant: bool,
  /// Set exactly when `is_constant`.
  pub constant_value: Option<Literal>,
  pub dtype: DataType,
  /// Logical shape, before any shape representation is applied.
  pub shape: TensorShape,
}

/// A resource argument whose value must be written back after execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceUpdate {
  pub input_index: usize,
  pub dtype: DataType,
  /// Logical shape of the stored value, `[size] + element_shape` for tensor arrays.
  pub shape: TensorShape,
  /// False only when the update was forced by `return_updated_values_for_all_resources`.
  pub modified: bool,
  pub tensor_array_gradients_accessed: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompilationResult {
  pub computation: Computation,
  /// One per return value, in return value order.
  pub outputs: Vec<OutputDescription>,
  /// In argument order.
  pub resource_updates: Vec<ResourceUpdate>,
  /// IR parameter number to argument index.
  pub input_mapping: Vec<usize>,
  /// Physical shape of each IR parameter.
  pub input_shapes: Vec<Shape>,
  /// Physical shape of the IR result tuple.
  pub output_shape: Shape,
}

impl CompilationResult {
  pub fn num_constant_outputs(&self) -> usize {
    self.outputs.iter().filter(|o| o.is_constant).count()
  }
}

/// Reshapes a resource's value (and gradients) to the physical layout the IR returns.
fn resource_result(
  builder: &mut IrBuilder,
  resource: &Resource,
  hook: &ShapeRepresentationFn,
) -> Result<IrOp> {
  let physical = physical_shape(hook, &resource.shape, resource.dtype)?;
  let base = builder.reshape(resource.value(), &physical)?;
  if resource.kind == ResourceKind::Variable || resource.gradient_names().is_empty() {
    return Ok(base);
  }
  let mut elements = vec![base];
  for gradient in resource.gradient_values() {
    elements.push(builder.reshape(gradient, &physical)?);
  }
  builder.tuple(elements)
}

/// Builds the result tuple: non-constant outputs in order, then one element per resource update.
#[instrument(level = "debug", skip_all)]
pub(crate) fn assemble(
  mut builder: IrBuilder,
  resources: &ResourceTracker,
  retvals: BTreeMap<usize, Value>,
  num_retvals: usize,
  options: &CompileOptions,
  hook: &ShapeRepresentationFn,
  parameters: Parameters,
) -> Result<CompilationResult> {
  let mut elements = vec![];
  let mut outputs = vec![];
  for index in 0..num_retvals {
    let value = retvals.get(&index).ok_or_else(|| {
      Error::InternalError(format!("return value {} was never produced", index))
    })?;
    let op = match value {
      Value::Tensor(op) => *op,
      Value::Resource(_) => {
        return Err(Error::InvalidArgument(format!(
          "return value {} is a resource handle; resources are returned as resource updates",
          index
        )))
      }
    };
    let (dtype, shape) = builder.array_shape(op)?;
    // constants too large to materialize stay in the computation
    if options.resolve_compile_time_constants
      && shape.num_elements() <= MAX_FOLDED_ELEMENTS
      && builder.is_constant(op)?
    {
      let value = builder.compute_constant(op)?;
      debug!("return value {} folded to {}", index, value);
      outputs.push(OutputDescription {
        is_constant: true,
        constant_value: Some(value),
        dtype,
        shape,
      });
      continue;
    }
    let physical = if options.is_entry_computation {
      physical_shape(hook, &shape, dtype)?
    } else {
      shape.clone()
    };
    elements.push(builder.reshape(op, &physical)?);
    outputs.push(OutputDescription {
      is_constant: false,
      constant_value: None,
      dtype,
      shape,
    });
  }

  let mut resource_updates = vec![];
  for resource in resources.resources() {
    let modified = resource.is_modified();
    if !modified && !options.return_updated_values_for_all_resources {
      continue;
    }
    elements.push(resource_result(&mut builder, resource, hook)?);
    let gradients = match resource.kind {
      ResourceKind::TensorArray => resource.gradient_names(),
      ResourceKind::Variable => BTreeSet::new(),
    };
    info!(
      "resource update for argument {} ({}, modified: {})",
      resource.arg_index, resource.name, modified
    );
    resource_updates.push(ResourceUpdate {
      input_index: resource.arg_index,
      dtype: resource.dtype,
      shape: resource.shape.clone(),
      modified,
      tensor_array_gradients_accessed: gradients,
    });
  }

  let root = builder.tuple(elements)?;
  let output_shape = builder.shape(root)?.clone();
  let computation = builder.build(root)?;
  Ok(CompilationResult {
    computation,
    outputs,
    resource_updates,
    input_mapping: parameters.input_mapping,
    input_shapes: parameters.input_shapes,
    output_shape,
  })
}
