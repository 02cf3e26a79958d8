use crate::error::Result;
use crate::ir::{IrBuilder, IrOp};
use crate::ops::context::LoweringContext;
use crate::ops::registry::{OpDef, OpRegistration, OpRegistry};

fn lower_read(ctx: &mut LoweringContext<'_>) -> Result<()> {
  let handle = ctx.resource_input(0)?;
  let dtype = ctx.attr_type("dtype")?;
  let value = ctx.read_variable(&handle, dtype)?;
  ctx.set_output(0, value);
  Ok(())
}

fn lower_assign(ctx: &mut LoweringContext<'_>) -> Result<()> {
  let handle = ctx.resource_input(0)?;
  let value = ctx.input(1)?;
  let dtype = ctx.attr_type_or("dtype", ctx.input_type(1)?)?;
  ctx.assign_variable(&handle, dtype, value)
}

/// Read-modify-write with `combine(current, value)`.
fn lower_update(ctx: &mut LoweringContext<'_>, combine: fn(&mut IrBuilder, IrOp, IrOp) -> Result<IrOp>) -> Result<()> {
  let handle = ctx.resource_input(0)?;
  let value = ctx.input(1)?;
  let dtype = ctx.attr_type_or("dtype", ctx.input_type(1)?)?;
  let current = ctx.read_variable(&handle, dtype)?;
  let updated = combine(ctx.builder(), current, value)?;
  ctx.assign_variable(&handle, dtype, updated)
}

pub(super) fn register(registry: &mut OpRegistry) {
  registry.register(OpRegistration::new(
    OpDef::new("ReadVariableOp")
      .inputs(1)
      .outputs(1)
      .required_attr("dtype"),
    lower_read,
  ));
  registry.register(OpRegistration::new(OpDef::new("AssignVariableOp").inputs(2), lower_assign));
  registry.register(OpRegistration::new(
    OpDef::new("AssignAddVariableOp").inputs(2),
    |ctx: &mut LoweringContext<'_>| lower_update(ctx, IrBuilder::add),
  ));
  registry.register(OpRegistration::new(
    OpDef::new("AssignSubVariableOp").inputs(2),
    |ctx: &mut LoweringContext<'_>| lower_update(ctx, IrBuilder::sub),
  ));
}
