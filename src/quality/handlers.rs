//! Corrective actions applied to violating positions.

use ndarray::{ArrayD, ArrayView1, ArrayViewMut1, Axis, Zip};

use crate::config::HandlerKind;
use crate::dataset::flags::CORRECTED_FLAG;
use crate::dataset::Variable;

/// Applies one handler to every position set in `mask`.
///
/// Every handler except `fail_pipeline` ors `flag` into the violating
/// positions. Handlers that change a value also add [`CORRECTED_FLAG`].
/// `fail_pipeline` leaves the variable alone; the engine decides whether to
/// stop once every target of the test has been evaluated.
pub fn apply(handler: HandlerKind, variable: &mut Variable, mask: &ArrayD<bool>, flag: u32, axis: usize) {
    match handler {
        HandlerKind::Flag => {
            Zip::from(&mut variable.flags)
                .and(mask)
                .for_each(|f, &violates| {
                    if violates {
                        *f |= flag;
                    }
                });
        }
        HandlerKind::ReplaceWithFill => {
            let fill = variable.fill_or_nan();
            Zip::from(&mut variable.data)
                .and(&mut variable.flags)
                .and(mask)
                .for_each(|value, f, &violates| {
                    if violates {
                        *f |= flag;
                        if changed(*value, fill) {
                            *value = fill;
                            *f |= CORRECTED_FLAG;
                        }
                    }
                });
        }
        HandlerKind::Interpolate => interpolate(variable, mask, flag, axis),
        HandlerKind::FailPipeline => {}
    }
}

fn changed(old: f64, new: f64) -> bool {
    !(old == new || (old.is_nan() && new.is_nan()))
}

/// Replaces violating positions with a linear interpolation between the
/// nearest valid neighbours along `axis`. Positions without a neighbour on
/// both sides get the fill value instead.
fn interpolate(variable: &mut Variable, mask: &ArrayD<bool>, flag: u32, axis: usize) {
    if variable.data.ndim() == 0 {
        if mask.iter().any(|v| *v) {
            let fill = variable.fill_or_nan();
            let value = variable.data.iter_mut().next();
            let f = variable.flags.iter_mut().next();
            if let (Some(value), Some(f)) = (value, f) {
                *f |= flag;
                if changed(*value, fill) {
                    *value = fill;
                    *f |= CORRECTED_FLAG;
                }
            }
        }
        return;
    }

    let fill = variable.fill_value;
    let fill_or_nan = fill.unwrap_or(f64::NAN);
    let is_missing = |v: f64| v.is_nan() || fill == Some(v);

    Zip::from(variable.data.lanes_mut(Axis(axis)))
        .and(variable.flags.lanes_mut(Axis(axis)))
        .and(mask.lanes(Axis(axis)))
        .for_each(
            |mut data: ArrayViewMut1<f64>, mut flags: ArrayViewMut1<u32>, mask: ArrayView1<bool>| {
                let original = data.to_vec();
                let valid: Vec<bool> = original
                    .iter()
                    .zip(mask.iter())
                    .map(|(v, m)| !m && !is_missing(*v))
                    .collect();

                for i in 0..original.len() {
                    if !mask[i] {
                        continue;
                    }
                    let before = (0..i).rev().find(|&j| valid[j]);
                    let after = (i + 1..original.len()).find(|&j| valid[j]);
                    let replacement = match (before, after) {
                        (Some(a), Some(b)) => {
                            let t = (i - a) as f64 / (b - a) as f64;
                            original[a] + t * (original[b] - original[a])
                        }
                        _ => fill_or_nan,
                    };
                    flags[i] |= flag;
                    if changed(original[i], replacement) {
                        data[i] = replacement;
                        flags[i] |= CORRECTED_FLAG;
                    }
                }
            },
        );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::flags::{MISSING_FLAG, RANGE_FLAG};
    use crate::dataset::DataType;
    use ndarray::arr1;

    fn var(values: &[f64]) -> Variable {
        Variable::new(
            "temperature",
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
    fn test_flag_leaves_data() {
        let mut v = var(&[25.0, 1.0]);
        apply(HandlerKind::Flag, &mut v, &mask(&[true, false]), RANGE_FLAG, 0);
        assert_eq!(v.data, arr1(&[25.0, 1.0]).into_dyn());
        assert_eq!(v.flags, arr1(&[RANGE_FLAG, 0]).into_dyn());
    }

    #[test]
    fn test_replace_with_fill_marks_corrected_only_on_change() {
        let mut v = var(&[25.0, -9999.0, 3.0]);
        apply(
            HandlerKind::ReplaceWithFill,
            &mut v,
            &mask(&[true, true, false]),
            MISSING_FLAG,
            0,
        );
        assert_eq!(v.data, arr1(&[-9999.0, -9999.0, 3.0]).into_dyn());
        assert_eq!(
            v.flags,
            arr1(&[MISSING_FLAG | CORRECTED_FLAG, MISSING_FLAG, 0]).into_dyn()
        );
    }

    #[test]
    fn test_interpolate_between_neighbours() {
        let mut v = var(&[1.0, 100.0, -9999.0, 4.0, 50.0]);
        apply(
            HandlerKind::Interpolate,
            &mut v,
            &mask(&[false, true, false, false, true]),
            RANGE_FLAG,
            0,
        );
        // position 1 sits between 1.0 (index 0) and 4.0 (index 3); index 2 is missing
        assert_eq!(v.data[[1]], 2.0);
        // no valid neighbour after the last position
        assert_eq!(v.data[[4]], -9999.0);
        assert_eq!(v.flags[[1]], RANGE_FLAG | CORRECTED_FLAG);
        assert_eq!(v.flags[[2]], 0);
        assert_eq!(v.flags[[4]], RANGE_FLAG | CORRECTED_FLAG);
    }

    #[test]
    fn test_fail_pipeline_leaves_variable() {
        let mut v = var(&[1.0, 2.0]);
        apply(HandlerKind::FailPipeline, &mut v, &mask(&[true, true]), RANGE_FLAG, 0);
        assert_eq!(v.data, arr1(&[1.0, 2.0]).into_dyn());
        assert_eq!(v.flags, arr1(&[0u32, 0]).into_dyn());
    }
}
