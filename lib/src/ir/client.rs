use tracing::{info, instrument};

use super::{eval, Computation, ProgramShape, Shape};
use crate::error::{Error, Result};
use crate::literal::Literal;

/// Executes computations on the host with the reference interpreter.
#[derive(Debug, Default, Clone)]
pub struct LocalClient;

impl LocalClient {
  pub fn new() -> Self {
    LocalClient
  }

  pub fn program_shape(&self, computation: &Computation) -> ProgramShape {
    computation.program_shape.clone()
  }

  #[instrument(level = "debug", skip_all, fields(computation = %computation.name))]
  pub fn execute(&self, computation: &Computation, args: &[Literal]) -> Result<Literal> {
    let expected = &computation.program_shape.parameters;
    if args.len() != expected.len() {
      return Err(Error::Execution(format!(
        "{} expects {} arguments, got {}",
        computation.name,
        expected.len(),
        args.len()
      )));
    }
    for (i, (arg, shape)) in args.iter().zip(expected).enumerate() {
      let actual = Shape::of_literal(arg);
      if actual != *shape {
        return Err(Error::Execution(format!(
          "argument {} has shape {}, expected {}",
          i, actual, shape
        )));
      }
    }
    let result = eval::evaluate(&computation.instructions, computation.root, args)?;
    info!("executed {}", computation.name);
    Ok(result)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ir::IrBuilder;
  use crate::types::{DataType, TensorShape};

  #[test]
  fn executes_with_checked_arguments() {
    let mut b = IrBuilder::new("double");
    let shape = Shape::array(DataType::Float32, TensorShape::new(vec![2]));
    let p = b.parameter(0, shape).unwrap();
    let sum = b.add(p, p).unwrap();
    let root = b.tuple(vec![sum]).unwrap();
    let computation = b.build(root).unwrap();

    let client = LocalClient::new();
    let out = client
      .execute(&computation, &[Literal::r1(&[1.5f32, -2.0])])
      .unwrap();
    assert_eq!(out, Literal::tuple(vec![Literal::r1(&[3.0f32, -4.0])]));

    let err = client.execute(&computation, &[Literal::r1(&[1i32, 2])]);
    assert!(err.is_err());
    assert!(client.execute(&computation, &[]).is_err());
  }
}
