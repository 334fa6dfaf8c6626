//! Aligning raw arrays onto declared dimensions.
//!
//! Alignment is by index, never by coordinate value. Raw axes are matched to
//! target dimensions by name when every raw dimension name is a target
//! dimension, and by position otherwise. Missing dimensions are broadcast.

use std::collections::BTreeMap;

use ndarray::{ArrayD, IxDyn};

use crate::error::StandardizationError;

/// Reshapes `data` so its axes are exactly `target_dims`.
pub fn align(
    variable: &str,
    data: ArrayD<f64>,
    raw_dims: &[String],
    target_dims: &[String],
    sizes: &BTreeMap<String, usize>,
) -> Result<ArrayD<f64>, StandardizationError> {
    let target_shape: Vec<usize> = target_dims
        .iter()
        .map(|d| sizes.get(d).copied().unwrap_or(0))
        .collect();
    let shape_error = |found: &[usize]| StandardizationError::ShapeMismatch {
        variable: variable.to_string(),
        dims: target_dims.to_vec(),
        found: found.to_vec(),
    };

    let (data, raw_dims) = squeeze_extra_axes(data, raw_dims, target_dims);
    if data.ndim() > target_dims.len() {
        return Err(shape_error(data.shape()));
    }

    // Target axis for each raw axis.
    let by_name = raw_dims.len() == data.ndim()
        && raw_dims.iter().all(|d| target_dims.contains(d));
    let positions: Vec<usize> = if by_name {
        raw_dims
            .iter()
            .filter_map(|d| target_dims.iter().position(|t| t == d))
            .collect()
    } else {
        (0..data.ndim()).collect()
    };
    let mut unique = positions.clone();
    unique.sort_unstable();
    unique.dedup();
    if unique.len() != positions.len() {
        return Err(shape_error(data.shape()));
    }

    // Put raw axes in target order.
    let mut order: Vec<usize> = (0..positions.len()).collect();
    order.sort_by_key(|&axis| positions[axis]);
    let data = data
        .permuted_axes(IxDyn(&order))
        .as_standard_layout()
        .into_owned();
    let sorted_positions: Vec<usize> = order.iter().map(|&axis| positions[axis]).collect();

    for (axis, &target_axis) in sorted_positions.iter().enumerate() {
        let found = data.shape()[axis];
        let expected = target_shape[target_axis];
        if found != expected {
            return Err(StandardizationError::LengthMismatch {
                variable: variable.to_string(),
                dim: target_dims[target_axis].clone(),
                expected,
                found,
            });
        }
    }

    if data.ndim() == target_dims.len() {
        return Ok(data);
    }

    let expanded_shape: Vec<usize> = (0..target_dims.len())
        .map(|i| {
            if sorted_positions.contains(&i) {
                target_shape[i]
            } else {
                1
            }
        })
        .collect();
    let found = data.shape().to_vec();
    let expanded = data
        .into_shape_with_order(IxDyn(&expanded_shape))
        .map_err(|_| shape_error(&found))?;
    expanded
        .broadcast(IxDyn(&target_shape))
        .map(|view| view.to_owned())
        .ok_or_else(|| shape_error(&found))
}

/// Drops length-1 axes whose names are not target dimensions.
fn squeeze_extra_axes(
    data: ArrayD<f64>,
    raw_dims: &[String],
    target_dims: &[String],
) -> (ArrayD<f64>, Vec<String>) {
    if data.ndim() <= target_dims.len() || raw_dims.len() != data.ndim() {
        return (data, raw_dims.to_vec());
    }
    let keep: Vec<usize> = (0..data.ndim())
        .filter(|&axis| data.shape()[axis] != 1 || target_dims.contains(&raw_dims[axis]))
        .collect();
    let shape: Vec<usize> = keep.iter().map(|&axis| data.shape()[axis]).collect();
    let dims: Vec<String> = keep.iter().map(|&axis| raw_dims[axis].clone()).collect();
    let data = data.as_standard_layout().into_owned();
    match data.clone().into_shape_with_order(IxDyn(&shape)) {
        Ok(squeezed) => (squeezed, dims),
        Err(_) => (data, raw_dims.to_vec()),
    }
}
