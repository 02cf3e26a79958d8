//! Tensor arrays are stored as one dense `[size] + element_shape` value per resource and per gradient.

use std::iter;

use crate::argument::ResourceKind;
use crate::error::{Error, Result};
use crate::ir::IrOp;
use crate::literal::Literal;
use crate::ops::context::LoweringContext;
use crate::ops::registry::{OpDef, OpRegistration, OpRegistry};
use crate::resource::ResourceHandle;
use crate::types::{DataType, TensorShape};

struct ArrayInfo {
  name: String,
  dtype: DataType,
  size: i64,
  element_shape: TensorShape,
}

fn array_info(ctx: &mut LoweringContext<'_>, handle: &ResourceHandle) -> Result<ArrayInfo> {
  let resource = ctx.resources().resource(handle)?;
  if resource.kind != ResourceKind::TensorArray {
    return Err(Error::InvalidArgument(format!(
      "{} is a {}, expected a tensor array",
      resource.name, resource.kind
    )));
  }
  Ok(ArrayInfo {
    name: resource.name.clone(),
    dtype: resource.dtype,
    size: resource.tensor_array_size.unwrap_or(0),
    element_shape: resource.element_shape(),
  })
}

/// Start indices addressing one element: the (clamped) index then zeros.
fn element_starts(ctx: &mut LoweringContext<'_>, info: &ArrayInfo, index: IrOp) -> Result<Vec<IrOp>> {
  let builder = ctx.builder();
  let (index_type, index_shape) = builder.array_shape(index)?;
  if !index_type.is_integer() || index_shape.rank() != 0 {
    return Err(Error::InvalidArgument(format!(
      "tensor array index must be an integer scalar, got {}{}",
      index_type, index_shape
    )));
  }
  if builder.is_constant(index)? {
    let i = builder.compute_constant(index)?.to_i64_vec()?[0];
    if i < 0 || i >= info.size {
      return Err(Error::InvalidArgument(format!(
        "index {} is out of range for tensor array {} of size {}",
        i, info.name, info.size
      )));
    }
  }
  let zero = builder.zeros(index_type, &TensorShape::scalar())?;
  Ok(
    iter::once(index)
      .chain(iter::repeat(zero).take(info.element_shape.rank()))
      .collect(),
  )
}

fn lower_grad(ctx: &mut LoweringContext<'_>) -> Result<()> {
  let handle = ctx.resource_input(0)?;
  let flow = ctx.input_value(1)?.clone();
  let source = ctx.attr_str("source")?.to_string();
  let (builder, resources) = ctx.builder_and_resources();
  let gradient = resources.gradient(&handle, &source, builder)?;
  ctx.set_resource_output(0, gradient);
  ctx.set_output_value(1, flow);
  Ok(())
}

fn lower_write(ctx: &mut LoweringContext<'_>) -> Result<()> {
  let handle = ctx.resource_input(0)?;
  let index = ctx.input(1)?;
  let value = ctx.input(2)?;
  let flow = ctx.input_value(3)?.clone();
  let info = array_info(ctx, &handle)?;
  let (dtype, shape) = ctx.builder().array_shape(value)?;
  if dtype != info.dtype || shape != info.element_shape {
    return Err(Error::InvalidArgument(format!(
      "Trying to write {}{} into tensor array {} of {}{} elements",
      dtype, shape, info.name, info.dtype, info.element_shape
    )));
  }
  let starts = element_starts(ctx, &info, index)?;
  let current = ctx.resources().read(&handle)?;
  let builder = ctx.builder();
  let update = builder.reshape(value, &info.element_shape.prepend(1))?;
  let written = builder.dynamic_update_slice(current, update, &starts)?;
  let (builder, resources) = ctx.builder_and_resources();
  resources.write(&handle, written, builder)?;
  ctx.set_output_value(0, flow);
  Ok(())
}

fn lower_read(ctx: &mut LoweringContext<'_>) -> Result<()> {
  let handle = ctx.resource_input(0)?;
  let index = ctx.input(1)?;
  let info = array_info(ctx, &handle)?;
  let dtype = ctx.attr_type_or("dtype", info.dtype)?;
  if dtype != info.dtype {
    return Err(Error::InvalidArgument(format!(
      "Trying to read {} from tensor array {} of type {}",
      dtype, info.name, info.dtype
    )));
  }
  let starts = element_starts(ctx, &info, index)?;
  let current = ctx.resources().read(&handle)?;
  let sizes = info.element_shape.prepend(1);
  let builder = ctx.builder();
  let slice = builder.dynamic_slice(current, &starts, sizes.dims())?;
  let element = builder.reshape(slice, &info.element_shape)?;
  ctx.set_output(0, element);
  Ok(())
}

fn lower_size(ctx: &mut LoweringContext<'_>) -> Result<()> {
  let handle = ctx.resource_input(0)?;
  let info = array_info(ctx, &handle)?;
  let size = i32::try_from(info.size).map_err(|_| {
    Error::InvalidArgument(format!(
      "tensor array {} has {} elements, which does not fit in int32",
      info.name, info.size
    ))
  })?;
  let size = ctx.builder().constant(Literal::r0(size));
  ctx.set_output(0, size);
  Ok(())
}

pub(super) fn register(registry: &mut OpRegistry) {
  registry.register(OpRegistration::new(
    OpDef::new("TensorArrayGradV3")
      .inputs(2)
      .outputs(2)
      .required_attr("source"),
    lower_grad,
  ));
  registry.register(OpRegistration::new(
    OpDef::new("TensorArrayWriteV3")
      .inputs(4)
      .outputs(1)
      .type_attr("T", DataType::NUMERIC),
    lower_write,
  ));
  registry.register(OpRegistration::new(
    OpDef::new("TensorArrayReadV3")
      .inputs(3)
      .outputs(1)
      .type_attr("dtype", DataType::NUMERIC),
    lower_read,
  ));
  registry.register(OpRegistration::new(
    OpDef::new("TensorArraySizeV3").inputs(2).outputs(1),
    lower_size,
  ));
}
