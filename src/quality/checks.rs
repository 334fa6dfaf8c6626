//! Detection predicates.
//!
//! Each check turns the current state of a variable into a boolean mask of
//! violating positions. Only `missing` looks at missing positions; every
//! other check skips NaN and fill values.

use ndarray::{ArrayD, ArrayView1, ArrayViewMut1, Axis, Zip};
use tracing::warn;

use crate::config::{CheckKind, Direction};
use crate::dataset::Variable;

/// Violation mask of `check` on `variable`. `axis` is the axis that ordered
/// checks (monotonic, delta) walk along.
pub fn evaluate(check: &CheckKind, variable: &Variable, axis: usize) -> ArrayD<bool> {
    match check {
        CheckKind::Range { min, max } => range_mask(variable, *min, *max),
        CheckKind::ValidRange => {
            let (min, max) = valid_bounds(variable);
            if min.is_none() && max.is_none() {
                warn!(
                    variable = %variable.name,
                    "valid_range check found no valid_min/valid_max attributes"
                );
            }
            range_mask(variable, min, max)
        }
        CheckKind::Missing => variable.data.mapv(|v| variable.is_missing(v)),
        CheckKind::Monotonic {
            direction, strict, ..
        } => {
            let (direction, strict) = (*direction, *strict);
            lane_mask(variable, axis, |previous, value| {
                match (direction, strict) {
                    (Direction::Increasing, true) => value > previous,
                    (Direction::Increasing, false) => value >= previous,
                    (Direction::Decreasing, true) => value < previous,
                    (Direction::Decreasing, false) => value <= previous,
                }
            })
        }
        CheckKind::Delta { max_delta, .. } => {
            let max_delta = *max_delta;
            lane_mask(variable, axis, |previous, value| {
                (value - previous).abs() <= max_delta
            })
        }
    }
}

fn range_mask(variable: &Variable, min: Option<f64>, max: Option<f64>) -> ArrayD<bool> {
    variable.data.mapv(|v| {
        !variable.is_missing(v)
            && (min.is_some_and(|lo| v < lo) || max.is_some_and(|hi| v > hi))
    })
}

/// Bounds from `valid_min`/`valid_max`, falling back to a two-element
/// `valid_range` attribute.
fn valid_bounds(variable: &Variable) -> (Option<f64>, Option<f64>) {
    let mut min = variable.numeric_attr("valid_min");
    let mut max = variable.numeric_attr("valid_max");
    if let Some(range) = variable.attrs.get("valid_range").and_then(|v| v.as_array()) {
        if range.len() == 2 {
            min = min.or_else(|| range[0].as_f64());
            max = max.or_else(|| range[1].as_f64());
        }
    }
    (min, max)
}

/// Walks every lane along `axis`, comparing each valid value with the
/// previous valid one. `ok(previous, value)` false marks a violation.
fn lane_mask(variable: &Variable, axis: usize, ok: impl Fn(f64, f64) -> bool) -> ArrayD<bool> {
    let mut mask = ArrayD::from_elem(variable.data.raw_dim(), false);
    if variable.data.ndim() == 0 {
        return mask;
    }
    Zip::from(variable.data.lanes(Axis(axis)))
        .and(mask.lanes_mut(Axis(axis)))
        .for_each(|data: ArrayView1<f64>, mut lane: ArrayViewMut1<bool>| {
            let mut previous: Option<f64> = None;
            for (i, &value) in data.iter().enumerate() {
                if variable.is_missing(value) {
                    continue;
                }
                if let Some(p) = previous {
                    if !ok(p, value) {
                        lane[i] = true;
                    }
                }
                previous = Some(value);
            }
        });
    mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::DataType;
    use ndarray::{arr1, arr2};
    use serde_json::json;

    fn var(values: &[f64]) -> Variable {
        Variable::new(
            "x",
            vec!["time".to_string()],
            DataType::Float64,
            arr1(values).into_dyn(),
        )
        .with_fill_value(-9999.0)
    }

    fn mask(values: &[bool]) -> ArrayD<bool> {
        arr1(values).into_dyn()
    }

    #[test]
    fn test_range_skips_missing() {
        let check = CheckKind::Range {
            min: Some(0.0),
            max: Some(20.0),
        };
        let out = evaluate(&check, &var(&[25.0, -9999.0, 12.0, f64::NAN, -1.0]), 0);
        assert_eq!(out, mask(&[true, false, false, false, true]));
    }

    #[test]
    fn test_missing() {
        let out = evaluate(&CheckKind::Missing, &var(&[1.0, -9999.0, f64::NAN]), 0);
        assert_eq!(out, mask(&[false, true, true]));
    }

    #[test]
    fn test_valid_range_from_attrs() {
        let v = var(&[-5.0, 5.0, 50.0])
            .with_attr("valid_min", 0.0)
            .with_attr("valid_max", json!("40"));
        assert_eq!(evaluate(&CheckKind::ValidRange, &v, 0), mask(&[true, false, true]));

        let v = var(&[-5.0, 5.0]).with_attr("valid_range", json!([0, 10]));
        assert_eq!(evaluate(&CheckKind::ValidRange, &v, 0), mask(&[true, false]));

        assert_eq!(evaluate(&CheckKind::ValidRange, &var(&[1e9]), 0), mask(&[false]));
    }

    #[test]
    fn test_monotonic() {
        let strict = CheckKind::Monotonic {
            direction: Direction::Increasing,
            strict: true,
            dim: None,
        };
        let out = evaluate(&strict, &var(&[1.0, 2.0, 2.0, -9999.0, 1.5, 3.0]), 0);
        assert_eq!(out, mask(&[false, false, true, false, true, false]));

        let loose_down = CheckKind::Monotonic {
            direction: Direction::Decreasing,
            strict: false,
            dim: None,
        };
        let out = evaluate(&loose_down, &var(&[3.0, 3.0, 4.0, 1.0]), 0);
        assert_eq!(out, mask(&[false, false, true, false]));
    }

    #[test]
    fn test_delta_along_axis() {
        let mut v = var(&[]);
        v.dims = vec!["time".to_string(), "height".to_string()];
        v.data = arr2(&[[0.0, 0.0], [1.0, 10.0], [2.0, 11.0]]).into_dyn();
        let check = CheckKind::Delta {
            max_delta: 5.0,
            dim: None,
        };
        let out = evaluate(&check, &v, 0);
        assert_eq!(
            out,
            arr2(&[[false, false], [false, true], [false, false]]).into_dyn()
        );

        let out = evaluate(&check, &v, 1);
        assert_eq!(
            out,
            arr2(&[[false, false], [false, true], [false, true]]).into_dyn()
        );
    }
}
