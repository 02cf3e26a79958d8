//! Builtin lowering routines.

mod args;
mod math;
mod shape;
mod tensor_array;
mod variables;

use super::registry::OpRegistry;

pub(crate) fn register_builtin_kernels(registry: &mut OpRegistry) {
  args::register(registry);
  math::register(registry);
  shape::register(registry);
  variables::register(registry);
  tensor_array::register(registry);
}
