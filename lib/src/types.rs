use std::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// Element types understood by the graph and the IR.
///
/// `Resource` only ever appears on graph edges carrying resource handles; the IR
/// has no resource type, resources are threaded as plain values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
  Int32,
  Int64,
  Float32,
  Float64,
  Bool,
  Resource,
}

impl DataType {
  pub const NUMERIC: &'static [DataType] = &[
    DataType::Int32,
    DataType::Int64,
    DataType::Float32,
    DataType::Float64,
  ];

  pub const INDEX: &'static [DataType] = &[DataType::Int32, DataType::Int64];

  pub fn name(self) -> &'static str {
    match self {
      DataType::Int32 => "int32",
      DataType::Int64 => "int64",
      DataType::Float32 => "float",
      DataType::Float64 => "double",
      DataType::Bool => "bool",
      DataType::Resource => "resource",
    }
  }

  pub fn is_numeric(self) -> bool {
    Self::NUMERIC.contains(&self)
  }

  pub fn is_integer(self) -> bool {
    matches!(self, DataType::Int32 | DataType::Int64)
  }
}

impl fmt::Display for DataType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

/// Fully static logical shape. Rank 0 is a scalar.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TensorShape(pub Vec<i64>);

impl TensorShape {
  pub fn scalar() -> Self {
    TensorShape(vec![])
  }

  pub fn new(dims: impl Into<Vec<i64>>) -> Self {
    TensorShape(dims.into())
  }

  pub fn dims(&self) -> &[i64] {
    &self.0
  }

  pub fn rank(&self) -> usize {
    self.0.len()
  }

  /// Saturates at `i64::MAX`; use [`TensorShape::checked_num_elements`] where overflow must be reported.
  pub fn num_elements(&self) -> i64 {
    self.checked_num_elements().unwrap_or(i64::MAX)
  }

  /// `None` when the element count does not fit in an `i64`.
  pub fn checked_num_elements(&self) -> Option<i64> {
    self.0.iter().try_fold(1i64, |acc, &d| acc.checked_mul(d))
  }

  pub fn is_valid(&self) -> bool {
    self.0.iter().all(|d| *d >= 0)
  }

  /// Prepends a leading dimension, e.g. the size of an ordered container.
  pub fn prepend(&self, dim: i64) -> Self {
    let mut dims = Vec::with_capacity(self.rank() + 1);
    dims.push(dim);
    dims.extend_from_slice(&self.0);
    TensorShape(dims)
  }

  /// NumPy-style broadcast of two shapes, `None` if incompatible.
  pub fn broadcast(a: &TensorShape, b: &TensorShape) -> Option<TensorShape> {
    let rank = a.rank().max(b.rank());
    let mut dims = vec![0; rank];
    for i in 0..rank {
      let da = if i < rank - a.rank() { 1 } else { a.0[i - (rank - a.rank())] };
      let db = if i < rank - b.rank() { 1 } else { b.0[i - (rank - b.rank())] };
      dims[i] = match (da, db) {
        (x, y) if x == y => x,
        (1, y) => y,
        (x, 1) => x,
        _ => return None,
      };
    }
    Some(TensorShape(dims))
  }
}

impl From<Vec<i64>> for TensorShape {
  fn from(dims: Vec<i64>) -> Self {
    TensorShape(dims)
  }
}

impl fmt::Display for TensorShape {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[{}]", self.0.iter().join(","))
  }
}
