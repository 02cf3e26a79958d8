use crate::error::{Error, Result};
use crate::ir::{IrBuilder, IrOp};
use crate::ops::context::LoweringContext;
use crate::ops::registry::{OpDef, OpRegistration, OpRegistry};
use crate::types::{DataType, TensorShape};

type BinaryFn = fn(&mut IrBuilder, IrOp, IrOp) -> Result<IrOp>;

/// Elementwise op with NumPy broadcasting made explicit in the IR.
fn lower_binary(ctx: &mut LoweringContext<'_>, emit: BinaryFn) -> Result<()> {
  let (a, b) = (ctx.input(0)?, ctx.input(1)?);
  let (ta, sa) = ctx.builder().array_shape(a)?;
  let (tb, sb) = ctx.builder().array_shape(b)?;
  if ta != tb {
    return Err(Error::InvalidArgument(format!(
      "{} expects operands of one type, got {} and {}",
      ctx.op(),
      ta,
      tb
    )));
  }
  let out = TensorShape::broadcast(&sa, &sb)
    .ok_or_else(|| Error::InvalidArgument(format!("Incompatible shapes: {} vs. {}", sa, sb)))?;
  let builder = ctx.builder();
  let a = builder.broadcast_to(a, &out)?;
  let b = builder.broadcast_to(b, &out)?;
  let result = emit(builder, a, b)?;
  ctx.set_output(0, result);
  Ok(())
}

fn lower_neg(ctx: &mut LoweringContext<'_>) -> Result<()> {
  let x = ctx.input(0)?;
  let result = ctx.builder().neg(x)?;
  ctx.set_output(0, result);
  Ok(())
}

fn lower_cast(ctx: &mut LoweringContext<'_>) -> Result<()> {
  let x = ctx.input(0)?;
  let to = ctx.attr_type("DstT")?;
  let result = ctx.builder().convert(x, to)?;
  ctx.set_output(0, result);
  Ok(())
}

pub(super) fn register(registry: &mut OpRegistry) {
  let binary = |name: &str, emit: BinaryFn| {
    OpRegistration::new(
      OpDef::new(name)
        .inputs(2)
        .outputs(1)
        .type_attr("T", DataType::NUMERIC),
      move |ctx: &mut LoweringContext<'_>| lower_binary(ctx, emit),
    )
  };
  registry.register(binary("Add", IrBuilder::add));
  registry.register(binary("Sub", IrBuilder::sub));
  registry.register(binary("Mul", IrBuilder::mul));
  registry.register(OpRegistration::new(
    OpDef::new("Neg")
      .inputs(1)
      .outputs(1)
      .type_attr("T", DataType::NUMERIC),
    lower_neg,
  ));
  registry.register(OpRegistration::new(
    OpDef::new("Cast")
      .inputs(1)
      .outputs(1)
      .required_attr("DstT")
      .type_attr("DstT", &[DataType::Int32, DataType::Int64, DataType::Float32, DataType::Float64, DataType::Bool]),
    lower_cast,
  ));
}
