use crate::error::{Error, Result};
use crate::ops::context::LoweringContext;
use crate::ops::registry::{OpDef, OpRegistration, OpRegistry};

fn lower_arg(ctx: &mut LoweringContext<'_>) -> Result<()> {
  let index = ctx.attr_int("index")?;
  let value = ctx.argument(index as usize)?;
  ctx.set_output_value(0, value);
  Ok(())
}

fn lower_retval(ctx: &mut LoweringContext<'_>) -> Result<()> {
  let index = ctx.attr_int("index")?;
  let value = ctx.input_value(0)?.clone();
  ctx.set_retval(index as usize, value)
}

fn lower_const(ctx: &mut LoweringContext<'_>) -> Result<()> {
  let value = ctx.attr_tensor("value")?.clone();
  let actual = value.dtype()?;
  let declared = ctx.attr_type_or("dtype", actual)?;
  if declared != actual {
    return Err(Error::InvalidAttribute(format!(
      "Const {} declares dtype {} but holds {}",
      ctx.name(),
      declared,
      actual
    )));
  }
  let op = ctx.builder().constant(value);
  ctx.set_output(0, op);
  Ok(())
}

fn lower_identity(ctx: &mut LoweringContext<'_>) -> Result<()> {
  let value = ctx.input_value(0)?.clone();
  ctx.set_output_value(0, value);
  Ok(())
}

pub(super) fn register(registry: &mut OpRegistry) {
  registry.register(OpRegistration::new(
    OpDef::new("_Arg").outputs(1).required_attr("index"),
    lower_arg,
  ));
  registry.register(OpRegistration::new(
    OpDef::new("_Retval").inputs(1).required_attr("index"),
    lower_retval,
  ));
  registry.register(OpRegistration::new(
    OpDef::new("Const").outputs(1).required_attr("value"),
    lower_const,
  ));
  registry.register(OpRegistration::new(OpDef::new("NoOp"), |_: &mut LoweringContext<'_>| Ok(())));
  registry.register(OpRegistration::new(
    OpDef::new("Identity").inputs(1).outputs(1),
    lower_identity,
  ));
}
