//! Quality control engine.
//!
//! Tests run in declared order. Each test evaluates its check against the
//! current state of every target variable, then runs its handlers over the
//! resulting violation mask. The dataset is threaded through the tests in
//! order; flags only ever gain bits. A `fail_pipeline` handler stops the run
//! after its test has evaluated every target.

pub mod checks;
pub mod handlers;
mod outcome;

pub use outcome::TestOutcome;

use ndarray::Dimension;
use tracing::{debug, info};

use crate::config::{CheckKind, HandlerKind, QualityConfig, QualityTest};
use crate::dataset::flags::{self, FlagMeaning, CORRECTED_FLAG};
use crate::dataset::{Dataset, Variable};
use crate::error::{QualityAbort, QualityFailure};

/// Runs every test of `config` against `dataset`.
///
/// Returns the mutated dataset and one outcome per test. On failure the
/// outcomes of the tests that already ran are returned with the error.
pub fn run_checks(
    config: &QualityConfig,
    mut dataset: Dataset,
) -> Result<(Dataset, Vec<TestOutcome>), QualityAbort> {
    let mut outcomes = Vec::with_capacity(config.tests.len());
    for test in &config.tests {
        match run_test(test, dataset) {
            Ok((next, outcome)) => {
                dataset = next;
                outcomes.push(outcome);
            }
            Err((failure, outcome)) => {
                outcomes.extend(outcome);
                return Err(QualityAbort {
                    failure,
                    completed: outcomes,
                });
            }
        }
    }
    Ok((dataset, outcomes))
}

/// A failed test, with its own outcome when every target was evaluated.
type TestFailure = (QualityFailure, Option<TestOutcome>);

fn run_test(test: &QualityTest, mut dataset: Dataset) -> Result<(Dataset, TestOutcome), TestFailure> {
    let mut outcome = TestOutcome::new(&test.name, test.check.name());
    let flag = test.flag();
    let fails = test.handlers.contains(&HandlerKind::FailPipeline);

    for name in targets(test, &dataset).map_err(|e| (e, None))? {
        let variable = dataset.get_mut(&name).ok_or_else(|| {
            let failure = QualityFailure::MissingVariable {
                test: test.name.clone(),
                variable: name.clone(),
            };
            (failure, None)
        })?;
        let axis = check_axis(test, variable).map_err(|e| (e, None))?;
        let mask = checks::evaluate(&test.check, variable, axis);

        for handler in &test.handlers {
            handlers::apply(*handler, variable, &mask, flag, axis);
        }
        describe_flags(test, variable, flag);

        let positions: Vec<Vec<usize>> = mask
            .indexed_iter()
            .filter(|(_, violates)| **violates)
            .map(|(index, _)| index.slice().to_vec())
            .collect();
        if !positions.is_empty() {
            debug!(
                test = %test.name,
                variable = %name,
                violations = positions.len(),
                "Quality test flagged positions"
            );
        }
        outcome.record(&name, positions);
    }

    if !outcome.passed() {
        info!(test = %test.name, violations = outcome.violations, "Quality test found violations");
        if fails {
            let failure = QualityFailure::HandlerTriggered {
                test: test.name.clone(),
                variables: outcome
                    .affected
                    .iter()
                    .filter(|(_, positions)| !positions.is_empty())
                    .map(|(name, _)| name.clone())
                    .collect(),
                violations: outcome.violations,
            };
            return Err((failure, Some(outcome)));
        }
    }
    Ok((dataset, outcome))
}

/// Records which bits `test` may have written on `variable`.
fn describe_flags(test: &QualityTest, variable: &mut Variable, flag: u32) {
    let mut writes_flag = false;
    let mut corrects = false;
    for handler in &test.handlers {
        match handler {
            HandlerKind::FailPipeline => {}
            HandlerKind::Flag => writes_flag = true,
            HandlerKind::ReplaceWithFill | HandlerKind::Interpolate => {
                writes_flag = true;
                corrects = true;
            }
        }
    }
    if writes_flag {
        flags::annotate(
            variable,
            FlagMeaning {
                mask: flag,
                meaning: test.name.clone(),
                description: test.description.clone(),
                assessment: test.assessment.clone(),
            },
        );
    }
    if corrects {
        let mut corrected = FlagMeaning::new(CORRECTED_FLAG, "corrected");
        corrected.description = Some("Value replaced by a quality handler".to_string());
        flags::annotate(variable, corrected);
    }
}

/// Target variables of `test`, with `ALL` expanded to every data variable
/// not excluded.
fn targets(test: &QualityTest, dataset: &Dataset) -> Result<Vec<String>, QualityFailure> {
    if test.targets_all() {
        return Ok(dataset
            .data_vars
            .keys()
            .filter(|name| !test.exclude.contains(name))
            .cloned()
            .collect());
    }
    for name in &test.variables {
        if !dataset.contains(name) {
            return Err(QualityFailure::MissingVariable {
                test: test.name.clone(),
                variable: name.clone(),
            });
        }
    }
    Ok(test.variables.clone())
}

/// Axis that ordered checks walk along: the named `dim`, else the first.
fn check_axis(test: &QualityTest, variable: &Variable) -> Result<usize, QualityFailure> {
    let dim = match &test.check {
        CheckKind::Monotonic { dim, .. } | CheckKind::Delta { dim, .. } => dim.as_ref(),
        _ => None,
    };
    match dim {
        None => Ok(0),
        Some(dim) => variable
            .dims
            .iter()
            .position(|d| d == dim)
            .ok_or_else(|| QualityFailure::UnknownDimension {
                test: test.name.clone(),
                variable: variable.name.clone(),
                dim: dim.clone(),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::flags::{CORRECTED_FLAG, MISSING_FLAG, RANGE_FLAG};
    use crate::dataset::DataType;
    use ndarray::{arr1, arr2};

    fn quality(yaml: &str) -> QualityConfig {
        serde_yaml::from_str(yaml).expect("quality config")
    }

    fn dataset(temperature: &[f64]) -> Dataset {
        let n = temperature.len();
        let mut ds = Dataset::new();
        ds.coords.insert(
            "time".to_string(),
            Variable::new(
                "time",
                vec!["time".to_string()],
                DataType::Float64,
                ndarray::Array1::range(0.0, n as f64, 1.0).into_dyn(),
            ),
        );
        ds.data_vars.insert(
            "temperature".to_string(),
            Variable::new(
                "temperature",
                vec!["time".to_string()],
                DataType::Float32,
                arr1(temperature).into_dyn(),
            )
            .with_fill_value(-9999.0),
        );
        ds
    }

    #[test]
    fn test_range_then_missing_scenario() {
        let config = quality(
            r#"
tests:
  - name: temperature_range
    variables: [temperature]
    check: { type: range, min: 0, max: 20 }
    handlers: [ { type: flag } ]
  - name: missing
    variables: [temperature]
    check: { type: missing }
    handlers: [ { type: replace_with_fill } ]
"#,
        );
        let (ds, outcomes) = run_checks(&config, dataset(&[25.0, -9999.0, 12.0])).expect("checks");
        let t = &ds.data_vars["temperature"];
        assert_eq!(t.data, arr1(&[25.0, -9999.0, 12.0]).into_dyn());
        assert_eq!(t.flags, arr1(&[RANGE_FLAG, MISSING_FLAG, 0]).into_dyn());

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].violations, 1);
        assert_eq!(outcomes[0].affected["temperature"], vec![vec![0]]);
        assert_eq!(outcomes[1].violations, 1);
        assert_eq!(outcomes[1].affected["temperature"], vec![vec![1]]);
    }

    #[test]
    fn test_flags_accumulate_across_tests() {
        let config = quality(
            r#"
tests:
  - name: high
    variables: [temperature]
    check: { type: range, max: 20 }
    handlers: [ { type: flag } ]
  - name: very_high
    variables: [temperature]
    check: { type: range, max: 30 }
    handlers: [ { type: flag } ]
    bit: 6
  - name: clamp
    variables: [temperature]
    check: { type: range, max: 30 }
    handlers: [ { type: replace_with_fill } ]
    bit: 7
"#,
        );
        let (ds, _) = run_checks(&config, dataset(&[25.0, 35.0, 5.0])).expect("checks");
        let t = &ds.data_vars["temperature"];
        assert_eq!(t.flags[[0]], RANGE_FLAG);
        assert_eq!(
            t.flags[[1]],
            RANGE_FLAG | (1 << 5) | (1 << 6) | CORRECTED_FLAG
        );
        assert_eq!(t.flags[[2]], 0);
        assert_eq!(t.data[[1]], -9999.0);
    }

    #[test]
    fn test_fail_pipeline_names_test() {
        let config = quality(
            r#"
tests:
  - name: ok
    variables: [temperature]
    check: { type: missing }
    handlers: [ { type: flag } ]
  - name: hard_limit
    variables: [temperature]
    check: { type: range, max: 20 }
    handlers: [ { type: flag }, { type: fail_pipeline } ]
"#,
        );
        let err = run_checks(&config, dataset(&[25.0, 30.0, 1.0])).expect_err("fails");
        assert_eq!(err.failure.test(), "hard_limit");
        assert!(matches!(
            err.failure,
            QualityFailure::HandlerTriggered { violations: 2, .. }
        ));
        // the passing test before it and the failing test itself
        let names: Vec<&str> = err.completed.iter().map(|o| o.test.as_str()).collect();
        assert_eq!(names, vec!["ok", "hard_limit"]);
        assert_eq!(err.completed[1].violations, 2);
    }

    #[test]
    fn test_fail_pipeline_counts_every_target() {
        let mut ds = dataset(&[25.0, 30.0, 1.0]);
        ds.data_vars.insert(
            "dew_point".to_string(),
            Variable::new(
                "dew_point",
                vec!["time".to_string()],
                DataType::Float64,
                arr1(&[21.0, 1.0, 40.0]).into_dyn(),
            ),
        );
        let config = quality(
            r#"
tests:
  - name: early_missing
    variables: [temperature]
    check: { type: missing }
    handlers: [ { type: flag } ]
  - name: hard_limit
    variables: [temperature, dew_point]
    check: { type: range, max: 20 }
    handlers: [ { type: fail_pipeline } ]
  - name: never_runs
    variables: [temperature]
    check: { type: missing }
    handlers: [ { type: flag } ]
"#,
        );
        let err = run_checks(&config, ds).expect_err("fails");
        match &err.failure {
            QualityFailure::HandlerTriggered {
                test,
                variables,
                violations,
            } => {
                assert_eq!(test, "hard_limit");
                assert_eq!(*violations, 4);
                assert_eq!(variables, &vec!["dew_point".to_string(), "temperature".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(err.to_string().contains("4 violation"));
        assert_eq!(err.completed.len(), 2);
        assert_eq!(err.completed[0].test, "early_missing");
        assert_eq!(err.completed[1].violations, 4);
    }

    #[test]
    fn test_flag_meanings_recorded_on_targets() {
        let config = quality(
            r#"
tests:
  - name: high
    variables: [temperature]
    check: { type: range, max: 20 }
    handlers: [ { type: flag } ]
  - name: sensor_limit
    description: Above the sensor's rated maximum
    assessment: bad
    variables: [temperature]
    check: { type: range, max: 30 }
    handlers: [ { type: replace_with_fill } ]
    bit: 6
  - name: guard
    variables: [temperature]
    check: { type: range, max: 100 }
    handlers: [ { type: fail_pipeline } ]
"#,
        );
        let (ds, _) = run_checks(&config, dataset(&[25.0, 35.0, 5.0])).expect("checks");
        let t = &ds.data_vars["temperature"];
        let recorded = flags::meanings(t);
        let summary: Vec<(u32, &str)> = recorded.iter().map(|m| (m.mask, m.meaning.as_str())).collect();
        // fail_pipeline writes no bits, so `guard` is absent
        assert_eq!(
            summary,
            vec![(RANGE_FLAG, "high"), (1 << 5, "sensor_limit"), (CORRECTED_FLAG, "corrected")]
        );
        assert_eq!(recorded[0].description, None);
        assert_eq!(recorded[1].description.as_deref(), Some("Above the sensor's rated maximum"));
        assert_eq!(recorded[1].assessment.as_deref(), Some("bad"));
        // coordinates are never targeted
        assert!(flags::meanings(&ds.coords["time"]).is_empty());
    }

    #[test]
    fn test_missing_target_variable() {
        let config = quality(
            r#"
tests:
  - name: rh_range
    variables: [relative_humidity]
    check: { type: range, min: 0, max: 100 }
    handlers: [ { type: flag } ]
"#,
        );
        let err = run_checks(&config, dataset(&[1.0])).expect_err("missing");
        assert!(err.completed.is_empty());
        assert!(matches!(err.failure, QualityFailure::MissingVariable { ref variable, .. } if variable == "relative_humidity"));
    }

    #[test]
    fn test_all_with_exclude() {
        let mut ds = dataset(&[-9999.0, 1.0]);
        ds.data_vars.insert(
            "pressure".to_string(),
            Variable::new(
                "pressure",
                vec!["time".to_string()],
                DataType::Float64,
                arr1(&[f64::NAN, 1000.0]).into_dyn(),
            ),
        );
        let config = quality(
            r#"
tests:
  - name: missing
    variables: [ALL]
    exclude: [pressure]
    check: { type: missing }
    handlers: [ { type: flag } ]
"#,
        );
        let (ds, outcomes) = run_checks(&config, ds).expect("checks");
        assert_eq!(ds.data_vars["temperature"].flags[[0]], MISSING_FLAG);
        assert_eq!(ds.data_vars["pressure"].flags[[0]], 0);
        assert!(!outcomes[0].affected.contains_key("pressure"));
        // coordinates are not part of ALL
        assert!(!outcomes[0].affected.contains_key("time"));
    }

    #[test]
    fn test_interpolate_along_named_dim() {
        let mut ds = Dataset::new();
        ds.data_vars.insert(
            "wind".to_string(),
            Variable::new(
                "wind",
                vec!["height".to_string(), "time".to_string()],
                DataType::Float64,
                arr2(&[[1.0, 50.0, 3.0, 4.0], [2.0, 2.0, 2.0, 2.0]]).into_dyn(),
            ),
        );
        let config = quality(
            r#"
tests:
  - name: spikes
    variables: [wind]
    check: { type: delta, max_delta: 10, dim: time }
    handlers: [ { type: interpolate } ]
"#,
        );
        let (ds, outcomes) = run_checks(&config, ds).expect("checks");
        let wind = &ds.data_vars["wind"];
        // 50 jumps from 1; 3 then jumps back down from 50
        assert_eq!(outcomes[0].violations, 2);
        assert!((wind.data[[0, 1]] - 2.0).abs() < 1e-9);
        assert!((wind.data[[0, 2]] - 3.0).abs() < 1e-9);
        assert_eq!(wind.data.index_axis(ndarray::Axis(0), 1).iter().copied().collect::<Vec<f64>>(), vec![2.0; 4]);

        let config = quality(
            r#"
tests:
  - name: spikes
    variables: [wind]
    check: { type: delta, max_delta: 10, dim: level }
    handlers: [ { type: flag } ]
"#,
        );
        let err = run_checks(&config, ds).expect_err("unknown dim");
        assert!(matches!(err.failure, QualityFailure::UnknownDimension { .. }));
    }
}
