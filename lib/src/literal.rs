use std::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{DataType, TensorShape};

/// Dense element storage, row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dtype", content = "values", rename_all = "lowercase")]
pub enum ArrayData {
  Int32(Vec<i32>),
  Int64(Vec<i64>),
  Float32(Vec<f32>),
  Float64(Vec<f64>),
  Bool(Vec<bool>),
}

impl ArrayData {
  pub fn dtype(&self) -> DataType {
    match self {
      ArrayData::Int32(_) => DataType::Int32,
      ArrayData::Int64(_) => DataType::Int64,
      ArrayData::Float32(_) => DataType::Float32,
      ArrayData::Float64(_) => DataType::Float64,
      ArrayData::Bool(_) => DataType::Bool,
    }
  }

  pub fn len(&self) -> usize {
    match self {
      ArrayData::Int32(v) => v.len(),
      ArrayData::Int64(v) => v.len(),
      ArrayData::Float32(v) => v.len(),
      ArrayData::Float64(v) => v.len(),
      ArrayData::Bool(v) => v.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn zeros(dtype: DataType, n: usize) -> Result<Self> {
    Ok(match dtype {
      DataType::Int32 => ArrayData::Int32(vec![0; n]),
      DataType::Int64 => ArrayData::Int64(vec![0; n]),
      DataType::Float32 => ArrayData::Float32(vec![0.0; n]),
      DataType::Float64 => ArrayData::Float64(vec![0.0; n]),
      DataType::Bool => ArrayData::Bool(vec![false; n]),
      DataType::Resource => {
        return Err(Error::InvalidArgument(
          "cannot materialize a resource as a literal".to_string(),
        ))
      }
    })
  }

  /// Widens every element to i64. Floats are truncated, bools map to 0/1.
  pub fn to_i64_vec(&self) -> Vec<i64> {
    match self {
      ArrayData::Int32(v) => v.iter().map(|x| *x as i64).collect(),
      ArrayData::Int64(v) => v.clone(),
      ArrayData::Float32(v) => v.iter().map(|x| *x as i64).collect(),
      ArrayData::Float64(v) => v.iter().map(|x| *x as i64).collect(),
      ArrayData::Bool(v) => v.iter().map(|x| *x as i64).collect(),
    }
  }

  pub fn convert(&self, dtype: DataType) -> Result<ArrayData> {
    macro_rules! cast_all {
      ($v:expr) => {
        match dtype {
          DataType::Int32 => ArrayData::Int32($v.iter().map(|x| *x as i32).collect()),
          DataType::Int64 => ArrayData::Int64($v.iter().map(|x| *x as i64).collect()),
          DataType::Float32 => ArrayData::Float32($v.iter().map(|x| *x as f32).collect()),
          DataType::Float64 => ArrayData::Float64($v.iter().map(|x| *x as f64).collect()),
          DataType::Bool => ArrayData::Bool($v.iter().map(|x| (*x as f64) != 0.0).collect()),
          DataType::Resource => {
            return Err(Error::InvalidArgument(
              "cannot convert to resource".to_string(),
            ))
          }
        }
      };
    }
    Ok(match self {
      ArrayData::Int32(v) => cast_all!(v),
      ArrayData::Int64(v) => cast_all!(v),
      ArrayData::Float32(v) => cast_all!(v),
      ArrayData::Float64(v) => cast_all!(v),
      ArrayData::Bool(v) => {
        let as_int: Vec<i32> = v.iter().map(|b| *b as i32).collect();
        ArrayData::Int32(as_int).convert(dtype)?
      }
    })
  }

  /// Gathers elements by flat index.
  pub fn gather(&self, indices: &[usize]) -> ArrayData {
    macro_rules! pick {
      ($v:expr, $ctor:path) => {
        $ctor(indices.iter().map(|i| $v[*i].clone()).collect())
      };
    }
    match self {
      ArrayData::Int32(v) => pick!(v, ArrayData::Int32),
      ArrayData::Int64(v) => pick!(v, ArrayData::Int64),
      ArrayData::Float32(v) => pick!(v, ArrayData::Float32),
      ArrayData::Float64(v) => pick!(v, ArrayData::Float64),
      ArrayData::Bool(v) => pick!(v, ArrayData::Bool),
    }
  }

  /// Overwrites `self[positions[i]] = other[i]`. Types must match.
  pub fn scatter(&mut self, positions: &[usize], other: &ArrayData) -> Result<()> {
    macro_rules! put {
      ($dst:expr, $src:expr) => {{
        for (i, p) in positions.iter().enumerate() {
          $dst[*p] = $src[i].clone();
        }
      }};
    }
    match (self, other) {
      (ArrayData::Int32(d), ArrayData::Int32(s)) => put!(d, s),
      (ArrayData::Int64(d), ArrayData::Int64(s)) => put!(d, s),
      (ArrayData::Float32(d), ArrayData::Float32(s)) => put!(d, s),
      (ArrayData::Float64(d), ArrayData::Float64(s)) => put!(d, s),
      (ArrayData::Bool(d), ArrayData::Bool(s)) => put!(d, s),
      (d, s) => {
        return Err(Error::InvalidArgument(format!(
          "cannot scatter {} into {}",
          s.dtype(),
          d.dtype()
        )))
      }
    }
    Ok(())
  }

  fn display_values(&self) -> String {
    match self {
      ArrayData::Int32(v) => v.iter().join(", "),
      ArrayData::Int64(v) => v.iter().join(", "),
      ArrayData::Float32(v) => v.iter().join(", "),
      ArrayData::Float64(v) => v.iter().join(", "),
      ArrayData::Bool(v) => v.iter().join(", "),
    }
  }
}

/// Host-side Rust types that map onto an element type.
pub trait NativeType: Copy + 'static {
  const DTYPE: DataType;
  fn wrap(values: Vec<Self>) -> ArrayData;
  fn unwrap(data: &ArrayData) -> Option<&[Self]>;
}

macro_rules! native_type {
  ($t:ty, $dtype:expr, $variant:ident) => {
    impl NativeType for $t {
      const DTYPE: DataType = $dtype;
      fn wrap(values: Vec<Self>) -> ArrayData {
        ArrayData::$variant(values)
      }
      fn unwrap(data: &ArrayData) -> Option<&[Self]> {
        match data {
          ArrayData::$variant(v) => Some(v),
          _ => None,
        }
      }
    }
  };
}

native_type!(i32, DataType::Int32, Int32);
native_type!(i64, DataType::Int64, Int64);
native_type!(f32, DataType::Float32, Float32);
native_type!(f64, DataType::Float64, Float64);
native_type!(bool, DataType::Bool, Bool);

/// A concrete value: a dense array or a tuple of literals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Literal {
  Array { shape: TensorShape, data: ArrayData },
  Tuple(Vec<Literal>),
}

impl Literal {
  pub fn new(shape: TensorShape, data: ArrayData) -> Result<Self> {
    if !shape.is_valid() || shape.num_elements() as usize != data.len() {
      return Err(Error::InvalidArgument(format!(
        "shape {} requires {} elements, got {}",
        shape,
        shape.num_elements(),
        data.len()
      )));
    }
    Ok(Literal::Array { shape, data })
  }

  pub fn from_vec<T: NativeType>(shape: TensorShape, values: Vec<T>) -> Result<Self> {
    Literal::new(shape, T::wrap(values))
  }

  pub fn r0<T: NativeType>(value: T) -> Self {
    Literal::Array {
      shape: TensorShape::scalar(),
      data: T::wrap(vec![value]),
    }
  }

  pub fn r1<T: NativeType>(values: &[T]) -> Self {
    Literal::Array {
      shape: TensorShape::new(vec![values.len() as i64]),
      data: T::wrap(values.to_vec()),
    }
  }

  /// Rows must all have the same length.
  pub fn r2<T: NativeType>(rows: &[&[T]]) -> Self {
    let cols = rows.first().map(|r| r.len()).unwrap_or(0);
    let values: Vec<T> = rows.iter().flat_map(|r| r.iter().copied()).collect();
    Literal::Array {
      shape: TensorShape::new(vec![rows.len() as i64, cols as i64]),
      data: T::wrap(values),
    }
  }

  pub fn tuple(elements: Vec<Literal>) -> Self {
    Literal::Tuple(elements)
  }

  pub fn zeros(dtype: DataType, shape: &TensorShape) -> Result<Self> {
    let data = ArrayData::zeros(dtype, shape.num_elements() as usize)?;
    Literal::new(shape.clone(), data)
  }

  pub fn is_tuple(&self) -> bool {
    matches!(self, Literal::Tuple(_))
  }

  pub fn shape(&self) -> Result<&TensorShape> {
    match self {
      Literal::Array { shape, .. } => Ok(shape),
      Literal::Tuple(_) => Err(Error::InvalidArgument(
        "expected an array literal, got a tuple".to_string(),
      )),
    }
  }

  pub fn data(&self) -> Result<&ArrayData> {
    match self {
      Literal::Array { data, .. } => Ok(data),
      Literal::Tuple(_) => Err(Error::InvalidArgument(
        "expected an array literal, got a tuple".to_string(),
      )),
    }
  }

  pub fn dtype(&self) -> Result<DataType> {
    Ok(self.data()?.dtype())
  }

  pub fn elements(&self) -> Result<&[Literal]> {
    match self {
      Literal::Tuple(elements) => Ok(elements),
      Literal::Array { .. } => Err(Error::InvalidArgument(
        "expected a tuple literal, got an array".to_string(),
      )),
    }
  }

  pub fn to_vec<T: NativeType>(&self) -> Result<Vec<T>> {
    let data = self.data()?;
    T::unwrap(data).map(|v| v.to_vec()).ok_or_else(|| {
      Error::InvalidArgument(format!(
        "literal holds {}, requested {}",
        data.dtype(),
        T::DTYPE
      ))
    })
  }

  /// Integer contents widened to i64, for shape and index operands.
  pub fn to_i64_vec(&self) -> Result<Vec<i64>> {
    let data = self.data()?;
    if !data.dtype().is_integer() {
      return Err(Error::InvalidArgument(format!(
        "expected an integer literal, got {}",
        data.dtype()
      )));
    }
    Ok(data.to_i64_vec())
  }

  pub fn reshape(&self, shape: &TensorShape) -> Result<Literal> {
    Literal::new(shape.clone(), self.data()?.clone())
  }

  pub fn convert(&self, dtype: DataType) -> Result<Literal> {
    Literal::new(self.shape()?.clone(), self.data()?.convert(dtype)?)
  }
}

impl fmt::Display for Literal {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Literal::Array { shape, data } => {
        write!(f, "{}{} {{{}}}", data.dtype(), shape, data.display_values())
      }
      Literal::Tuple(elements) => write!(f, "({})", elements.iter().join(", ")),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn construction_checks_element_count() {
    let ok = Literal::from_vec(TensorShape::new(vec![2, 2]), vec![1i32, 2, 3, 4]);
    assert!(ok.is_ok());
    let bad = Literal::from_vec(TensorShape::new(vec![3]), vec![1i32, 2]);
    assert!(bad.is_err());
  }

  #[test]
  fn r2_is_row_major() {
    let lit = Literal::r2::<i32>(&[&[4, 55], &[1, -3]]);
    assert_eq!(lit.shape().unwrap(), &TensorShape::new(vec![2, 2]));
    assert_eq!(lit.to_vec::<i32>().unwrap(), vec![4, 55, 1, -3]);
  }

  #[test]
  fn display_is_readable() {
    let lit = Literal::tuple(vec![Literal::r0(7i32), Literal::r1(&[-7i32, -42])]);
    assert_eq!(lit.to_string(), "(int32[] {7}, int32[2] {-7, -42})");
  }

  #[test]
  fn convert_between_types() {
    let lit = Literal::r1(&[1.9f32, -2.5]);
    assert_eq!(
      lit.convert(DataType::Int32).unwrap().to_vec::<i32>().unwrap(),
      vec![1, -2]
    );
  }
}
