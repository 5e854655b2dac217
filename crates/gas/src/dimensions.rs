//! Complexity dimensions.
//!
//! A transaction's complexity is a 4-vector; weights collapse it into a
//! single gas value. All arithmetic is checked: overflow is an error, never
//! a wrap.

use crate::Gas;
use serde::{Deserialize, Serialize};

/// Number of complexity dimensions.
pub const NUM_DIMENSIONS: usize = 4;

/// Index into a [`Dimensions`] vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum Dimension {
    /// Bytes moved over the network.
    Bandwidth = 0,
    /// Database reads.
    DbRead = 1,
    /// Database writes (includes deletes).
    DbWrite = 2,
    /// Compute time.
    Compute = 3,
}

/// Arithmetic failure combining dimension vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DimensionsError {
    #[error("dimension overflow")]
    Overflow,
    #[error("dimension underflow")]
    Underflow,
}

/// A complexity vector, one entry per [`Dimension`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
pub struct Dimensions(pub [u64; NUM_DIMENSIONS]);

impl Dimensions {
    /// Element-wise checked addition.
    pub fn add(mut self, other: &Dimensions) -> Result<Dimensions, DimensionsError> {
        for (d, o) in self.0.iter_mut().zip(other.0.iter()) {
            *d = d.checked_add(*o).ok_or(DimensionsError::Overflow)?;
        }
        Ok(self)
    }

    /// Element-wise checked subtraction.
    pub fn sub(mut self, other: &Dimensions) -> Result<Dimensions, DimensionsError> {
        for (d, o) in self.0.iter_mut().zip(other.0.iter()) {
            *d = d.checked_sub(*o).ok_or(DimensionsError::Underflow)?;
        }
        Ok(self)
    }

    /// Collapse into a single gas value: `Σ dims[i] · weights[i]`.
    pub fn to_gas(&self, weights: &Dimensions) -> Result<Gas, DimensionsError> {
        let mut res: u64 = 0;
        for (d, w) in self.0.iter().zip(weights.0.iter()) {
            let v = d.checked_mul(*w).ok_or(DimensionsError::Overflow)?;
            res = res.checked_add(v).ok_or(DimensionsError::Overflow)?;
        }
        Ok(res)
    }

    /// Read a single dimension.
    pub fn get(&self, dim: Dimension) -> u64 {
        self.0[dim as usize]
    }
}

impl std::ops::Index<Dimension> for Dimensions {
    type Output = u64;

    fn index(&self, dim: Dimension) -> &u64 {
        &self.0[dim as usize]
    }
}

impl std::ops::IndexMut<Dimension> for Dimensions {
    fn index_mut(&mut self, dim: Dimension) -> &mut u64 {
        &mut self.0[dim as usize]
    }
}
