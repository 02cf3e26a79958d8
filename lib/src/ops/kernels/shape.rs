use itertools::Itertools;

use crate::error::{Error, Result};
use crate::literal::Literal;
use crate::ops::context::LoweringContext;
use crate::ops::registry::{OpDef, OpRegistration, OpRegistry};
use crate::types::{DataType, TensorShape};

/// Resolves a single `-1` in a requested shape against the input's element count.
fn infer_reshape(requested: &TensorShape, input: &TensorShape) -> Result<TensorShape> {
  let unknown = requested.dims().iter().positions(|&d| d == -1).collect_vec();
  if unknown.len() > 1 {
    return Err(Error::InvalidArgument(format!(
      "Reshape can only infer one dimension, got {}",
      requested
    )));
  }
  if requested.dims().iter().any(|&d| d < -1) {
    return Err(Error::InvalidArgument(format!("Reshape got a negative dimension in {}", requested)));
  }
  let Some(&position) = unknown.first() else {
    if requested.checked_num_elements().is_none() {
      return Err(Error::InvalidArgument(format!("Reshape shape {} has too many elements", requested)));
    }
    return Ok(requested.clone());
  };
  let known = requested
    .dims()
    .iter()
    .filter(|&&d| d != -1)
    .try_fold(1i64, |acc, &d| acc.checked_mul(d))
    .ok_or_else(|| Error::InvalidArgument(format!("Reshape shape {} has too many elements", requested)))?;
  let total = input
    .checked_num_elements()
    .ok_or_else(|| Error::InvalidArgument(format!("Reshape input {} has too many elements", input)))?;
  if known == 0 || total % known != 0 {
    return Err(Error::InvalidArgument(format!(
      "Input to reshape is a tensor with {} values, but the requested shape {} cannot hold them",
      total, requested
    )));
  }
  let mut dims = requested.dims().to_vec();
  dims[position] = total / known;
  Ok(TensorShape::new(dims))
}

fn lower_reshape(ctx: &mut LoweringContext<'_>) -> Result<()> {
  let x = ctx.input(0)?;
  let input_shape = ctx.input_shape(0)?;
  let requested = ctx.constant_input_as_shape(1)?;
  let dims = infer_reshape(&requested, &input_shape)?;
  let result = ctx.builder().reshape(x, &dims)?;
  ctx.set_output(0, result);
  Ok(())
}

fn lower_fill(ctx: &mut LoweringContext<'_>) -> Result<()> {
  let dims = ctx.constant_input_as_shape(0)?;
  if !dims.is_valid() {
    return Err(Error::InvalidArgument(format!("Fill dimensions must be non-negative, got {}", dims)));
  }
  if dims.checked_num_elements().is_none() {
    return Err(Error::InvalidArgument(format!("Fill dimensions {} have too many elements", dims)));
  }
  let value = ctx.input(1)?;
  let value_shape = ctx.input_shape(1)?;
  if value_shape.rank() != 0 {
    return Err(Error::InvalidArgument(format!(
      "Fill value must be a scalar, got shape {}",
      value_shape
    )));
  }
  let result = ctx.builder().broadcast(value, &dims, vec![])?;
  ctx.set_output(0, result);
  Ok(())
}

fn lower_shape(ctx: &mut LoweringContext<'_>) -> Result<()> {
  let out_type = ctx.attr_type_or("out_type", DataType::Int32)?;
  let shape = ctx.input_shape(0)?;
  let literal = Literal::r1(shape.dims()).convert(out_type)?;
  let result = ctx.builder().constant(literal);
  ctx.set_output(0, result);
  Ok(())
}

fn lower_zeros_like(ctx: &mut LoweringContext<'_>) -> Result<()> {
  let dtype = ctx.input_type(0)?;
  let shape = ctx.input_shape(0)?;
  let result = ctx.builder().zeros(dtype, &shape)?;
  ctx.set_output(0, result);
  Ok(())
}

pub(super) fn register(registry: &mut OpRegistry) {
  registry.register(OpRegistration::new(
    OpDef::new("Reshape")
      .inputs(2)
      .outputs(1)
      .type_attr("Tshape", DataType::INDEX)
      .const_input(1),
    lower_reshape,
  ));
  registry.register(OpRegistration::new(
    OpDef::new("Fill")
      .inputs(2)
      .outputs(1)
      .type_attr("index_type", DataType::INDEX)
      .const_input(0),
    lower_fill,
  ));
  registry.register(OpRegistration::new(
    OpDef::new("Shape")
      .inputs(1)
      .outputs(1)
      .type_attr("out_type", DataType::INDEX)
      .metadata_only(),
    lower_shape,
  ));
  registry.register(OpRegistration::new(
    OpDef::new("ZerosLike").inputs(1).outputs(1).metadata_only(),
    lower_zeros_like,
  ));
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn reshape_infers_one_dimension() {
    let input = TensorShape::new(vec![2, 6]);
    assert_eq!(
      infer_reshape(&TensorShape::new(vec![3, -1]), &input).unwrap(),
      TensorShape::new(vec![3, 4])
    );
    assert_eq!(
      infer_reshape(&TensorShape::new(vec![12]), &input).unwrap(),
      TensorShape::new(vec![12])
    );
    assert!(infer_reshape(&TensorShape::new(vec![-1, -1]), &input).is_err());
    assert!(infer_reshape(&TensorShape::new(vec![5, -1]), &input).is_err());
  }

  #[test]
  fn reshape_rejects_overflowing_shapes() {
    let input = TensorShape::new(vec![4]);
    for dims in [vec![-1, 1 << 62, 4], vec![1 << 62, 1 << 62]] {
      let err = infer_reshape(&TensorShape::new(dims), &input).unwrap_err();
      assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
      assert!(err.to_string().contains("too many elements"), "{}", err);
    }
  }
}
