//! Reference interpreter for the IR. Used for constant folding during
//! compilation and by [`super::LocalClient`].

use std::collections::BTreeSet;

use super::{IrOp, Instruction, Opcode, Shape};
use crate::error::{Error, Result};
use crate::literal::{ArrayData, Literal};
use crate::types::TensorShape;

fn strides(dims: &[i64]) -> Vec<usize> {
  let mut strides = vec![1usize; dims.len()];
  for i in (0..dims.len().saturating_sub(1)).rev() {
    strides[i] = strides[i + 1] * dims[i + 1] as usize;
  }
  strides
}

fn unravel(mut flat: usize, dims: &[i64]) -> Vec<usize> {
  let mut index = vec![0usize; dims.len()];
  for i in (0..dims.len()).rev() {
    let d = dims[i] as usize;
    index[i] = flat % d;
    flat /= d;
  }
  index
}

/// Instructions the root depends on, in definition order.
pub(crate) fn cone(instructions: &[Instruction], root: IrOp) -> BTreeSet<usize> {
  let mut seen = BTreeSet::new();
  let mut stack = vec![root.0];
  while let Some(i) = stack.pop() {
    if seen.insert(i) {
      stack.extend(instructions[i].operands.iter().map(|o| o.0));
    }
  }
  seen
}

/// Evaluates `root`, touching only the instructions it depends on.
pub fn evaluate(instructions: &[Instruction], root: IrOp, params: &[Literal]) -> Result<Literal> {
  let mut values: Vec<Option<Literal>> = vec![None; root.0 + 1];
  for i in cone(instructions, root) {
    let inst = &instructions[i];
    let operands = inst
      .operands
      .iter()
      .map(|o| {
        values[o.0]
          .as_ref()
          .ok_or_else(|| Error::Execution(format!("{} used before definition", inst.name)))
      })
      .collect::<Result<Vec<&Literal>>>()?;
    let value = evaluate_instruction(inst, &operands, params)?;
    values[i] = Some(value);
  }
  values[root.0]
    .take()
    .ok_or_else(|| Error::Execution("root was not evaluated".to_string()))
}

fn scalar_index(literal: &Literal) -> Result<i64> {
  let v = literal.to_i64_vec()?;
  match v.as_slice() {
    [x] => Ok(*x),
    _ => Err(Error::Execution(format!("expected a scalar index, got {}", literal))),
  }
}

fn arithmetic(opcode: &Opcode, a: &ArrayData, b: &ArrayData) -> Result<ArrayData> {
  macro_rules! apply {
    ($x:expr, $y:expr, $ctor:path, $t:ty, $add:expr, $sub:expr, $mul:expr) => {{
      let f: fn($t, $t) -> $t = match opcode {
        Opcode::Add => $add,
        Opcode::Subtract => $sub,
        _ => $mul,
      };
      $ctor($x.iter().zip($y.iter()).map(|(p, q)| f(*p, *q)).collect())
    }};
  }
  Ok(match (a, b) {
    (ArrayData::Int32(x), ArrayData::Int32(y)) => apply!(
      x, y, ArrayData::Int32, i32, i32::wrapping_add, i32::wrapping_sub, i32::wrapping_mul
    ),
    (ArrayData::Int64(x), ArrayData::Int64(y)) => apply!(
      x, y, ArrayData::Int64, i64, i64::wrapping_add, i64::wrapping_sub, i64::wrapping_mul
    ),
    (ArrayData::Float32(x), ArrayData::Float32(y)) => apply!(
      x,
      y,
      ArrayData::Float32,
      f32,
      <f32 as std::ops::Add>::add,
      <f32 as std::ops::Sub>::sub,
      <f32 as std::ops::Mul>::mul
    ),
    (ArrayData::Float64(x), ArrayData::Float64(y)) => apply!(
      x,
      y,
      ArrayData::Float64,
      f64,
      <f64 as std::ops::Add>::add,
      <f64 as std::ops::Sub>::sub,
      <f64 as std::ops::Mul>::mul
    ),
    (x, y) => {
      return Err(Error::Execution(format!(
        "{} is not defined for {} and {}",
        opcode.mnemonic(),
        x.dtype(),
        y.dtype()
      )))
    }
  })
}

fn negate(a: &ArrayData) -> Result<ArrayData> {
  Ok(match a {
    ArrayData::Int32(x) => ArrayData::Int32(x.iter().map(|v| v.wrapping_neg()).collect()),
    ArrayData::Int64(x) => ArrayData::Int64(x.iter().map(|v| v.wrapping_neg()).collect()),
    ArrayData::Float32(x) => ArrayData::Float32(x.iter().map(|v| -v).collect()),
    ArrayData::Float64(x) => ArrayData::Float64(x.iter().map(|v| -v).collect()),
    ArrayData::Bool(_) => return Err(Error::Execution("negate is not defined for bool".to_string())),
  })
}

fn out_dims(shape: &Shape) -> Result<&TensorShape> {
  shape
    .as_array()
    .map(|(_, dims)| dims)
    .map_err(|e| Error::Execution(e.to_string()))
}

fn evaluate_instruction(inst: &Instruction, operands: &[&Literal], params: &[Literal]) -> Result<Literal> {
  match &inst.opcode {
    Opcode::Parameter(n) => {
      let value = params.get(*n).ok_or_else(|| {
        Error::Execution(format!("parameter {} was not supplied", n))
      })?;
      if Shape::of_literal(value) != inst.shape {
        return Err(Error::Execution(format!(
          "parameter {} expects {}, got {}",
          n,
          inst.shape,
          Shape::of_literal(value)
        )));
      }
      Ok(value.clone())
    }
    Opcode::Constant(lit) => Ok(lit.clone()),
    Opcode::Add | Opcode::Subtract | Opcode::Multiply => {
      let data = arithmetic(&inst.opcode, operands[0].data()?, operands[1].data()?)?;
      Literal::new(out_dims(&inst.shape)?.clone(), data)
    }
    Opcode::Negate => Literal::new(out_dims(&inst.shape)?.clone(), negate(operands[0].data()?)?),
    Opcode::Convert => {
      let (dtype, _) = inst.shape.as_array()?;
      operands[0].convert(dtype)
    }
    Opcode::Reshape => operands[0].reshape(out_dims(&inst.shape)?),
    Opcode::Broadcast { dimensions } => {
      let dims = out_dims(&inst.shape)?;
      let operand = operands[0];
      let operand_dims = operand.shape()?.dims();
      let operand_strides = strides(operand_dims);
      let indices: Vec<usize> = (0..dims.num_elements() as usize)
        .map(|flat| {
          let out_index = unravel(flat, dims.dims());
          dimensions
            .iter()
            .enumerate()
            .map(|(i, d)| {
              if operand_dims[i] == 1 {
                0
              } else {
                out_index[*d] * operand_strides[i]
              }
            })
            .sum()
        })
        .collect();
      Literal::new(dims.clone(), operand.data()?.gather(&indices))
    }
    Opcode::Tuple => Ok(Literal::tuple(operands.iter().map(|o| (*o).clone()).collect())),
    Opcode::GetTupleElement(i) => operands[0]
      .elements()?
      .get(*i)
      .cloned()
      .ok_or_else(|| Error::Execution(format!("tuple has no element {}", i))),
    Opcode::DynamicSlice { sizes } => {
      let operand = operands[0];
      let dims = operand.shape()?.dims();
      let starts: Vec<usize> = operands[1..]
        .iter()
        .zip(dims.iter().zip(sizes.iter()))
        .map(|(s, (d, size))| -> Result<usize> { Ok(scalar_index(s)?.clamp(0, d - size) as usize) })
        .collect::<Result<_>>()?;
      let op_strides = strides(dims);
      let indices: Vec<usize> = (0..sizes.iter().product::<i64>() as usize)
        .map(|flat| {
          unravel(flat, sizes)
            .iter()
            .enumerate()
            .map(|(i, m)| (starts[i] + m) * op_strides[i])
            .sum()
        })
        .collect();
      Literal::new(TensorShape::new(sizes.clone()), operand.data()?.gather(&indices))
    }
    Opcode::DynamicUpdateSlice => {
      let (operand, update) = (operands[0], operands[1]);
      let dims = operand.shape()?.dims();
      let update_dims = update.shape()?.dims();
      let starts: Vec<usize> = operands[2..]
        .iter()
        .zip(dims.iter().zip(update_dims.iter()))
        .map(|(s, (d, u))| -> Result<usize> { Ok(scalar_index(s)?.clamp(0, d - u) as usize) })
        .collect::<Result<_>>()?;
      let op_strides = strides(dims);
      let positions: Vec<usize> = (0..update.data()?.len())
        .map(|flat| {
          unravel(flat, update_dims)
            .iter()
            .enumerate()
            .map(|(i, m)| (starts[i] + m) * op_strides[i])
            .sum()
        })
        .collect();
      let mut data = operand.data()?.clone();
      data.scatter(&positions, update.data()?)?;
      Literal::new(operand.shape()?.clone(), data)
    }
  }
}
