//! Operation registry, the context lowering routines run against, and the builtin kernels.

pub mod context;
pub mod kernels;
pub mod registry;

pub use context::{LoweringContext, Value};
pub use registry::{LoweringFn, OpDef, OpRegistration, OpRegistry, DEVICE_CPU_JIT, DEVICE_GPU_JIT};

/// Control-flow primitives. Never lowered; functions using them are rejected.
pub const CONTROL_FLOW_OPS: &[&str] = &["Switch", "Merge", "Enter", "Exit", "NextIteration", "LoopCond"];

pub fn is_control_flow_op(op: &str) -> bool {
  CONTROL_FLOW_OPS.contains(&op)
}
