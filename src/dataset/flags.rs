//! Quality flag bits.
//!
//! Flags are per-point `u32` bitmasks. They accumulate with bitwise-or and
//! are never cleared once set.
//!
//! The meaning of each bit a quality test wrote is recorded on the variable
//! itself as parallel `flag_masks`, `flag_meanings`, `flag_descriptions` and
//! `flag_assessments` attributes, so stored output stays self-describing
//! when tests use custom bits.

use serde_json::Value;

use super::Variable;

/// Position was missing, non-finite or outside its source's valid range.
pub const MISSING_FLAG: u32 = 1 << 0;
/// Value failed a range check.
pub const RANGE_FLAG: u32 = 1 << 1;
/// Value broke the expected monotonic ordering.
pub const MONOTONIC_FLAG: u32 = 1 << 2;
/// Step from the previous value exceeded the allowed delta.
pub const DELTA_FLAG: u32 = 1 << 3;
/// A handler changed the stored value.
pub const CORRECTED_FLAG: u32 = 1 << 4;

/// Converts a 1-based bit number into its mask.
pub fn bit_mask(bit: u8) -> u32 {
    debug_assert!((1..=32).contains(&bit));
    1u32 << (u32::from(bit).saturating_sub(1).min(31))
}

/// Names of the well-known bits set in `flags`, for summaries and `inspect`.
pub fn describe(flags: u32) -> Vec<&'static str> {
    let mut names = Vec::new();
    for (mask, name) in [
        (MISSING_FLAG, "missing"),
        (RANGE_FLAG, "range"),
        (MONOTONIC_FLAG, "monotonic"),
        (DELTA_FLAG, "delta"),
        (CORRECTED_FLAG, "corrected"),
    ] {
        if flags & mask != 0 {
            names.push(name);
        }
    }
    names
}

pub const FLAG_MASKS_ATTR: &str = "flag_masks";
pub const FLAG_MEANINGS_ATTR: &str = "flag_meanings";
pub const FLAG_DESCRIPTIONS_ATTR: &str = "flag_descriptions";
pub const FLAG_ASSESSMENTS_ATTR: &str = "flag_assessments";

/// What one flag bit of a variable stands for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagMeaning {
    pub mask: u32,
    /// Name of the test (or `corrected`) that sets the bit.
    pub meaning: String,
    pub description: Option<String>,
    pub assessment: Option<String>,
}

impl FlagMeaning {
    pub fn new(mask: u32, meaning: impl Into<String>) -> Self {
        Self {
            mask,
            meaning: meaning.into(),
            description: None,
            assessment: None,
        }
    }
}

/// Flag meanings recorded on `variable`, in the order they were added.
pub fn meanings(variable: &Variable) -> Vec<FlagMeaning> {
    let column = |key: &str| -> Vec<Value> {
        match variable.attrs.get(key) {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        }
    };
    let text = |value: Option<&Value>| value.and_then(Value::as_str).map(str::to_string);

    let masks = column(FLAG_MASKS_ATTR);
    let names = column(FLAG_MEANINGS_ATTR);
    let descriptions = column(FLAG_DESCRIPTIONS_ATTR);
    let assessments = column(FLAG_ASSESSMENTS_ATTR);
    masks
        .iter()
        .zip(&names)
        .enumerate()
        .filter_map(|(i, (mask, name))| {
            Some(FlagMeaning {
                mask: u32::try_from(mask.as_u64()?).ok()?,
                meaning: name.as_str()?.to_string(),
                description: text(descriptions.get(i)),
                assessment: text(assessments.get(i)),
            })
        })
        .collect()
}

/// Adds `entry` to the flag meanings of `variable`. An entry with the same
/// mask and meaning is only recorded once.
pub fn annotate(variable: &mut Variable, entry: FlagMeaning) {
    let mut entries = meanings(variable);
    if entries
        .iter()
        .any(|e| e.mask == entry.mask && e.meaning == entry.meaning)
    {
        return;
    }
    entries.push(entry);

    let optional = |value: &Option<String>| value.clone().map_or(Value::Null, Value::String);
    let attrs = &mut variable.attrs;
    attrs.insert(
        FLAG_MASKS_ATTR.to_string(),
        entries.iter().map(|e| Value::from(e.mask)).collect(),
    );
    attrs.insert(
        FLAG_MEANINGS_ATTR.to_string(),
        entries.iter().map(|e| Value::from(e.meaning.clone())).collect(),
    );
    attrs.insert(
        FLAG_DESCRIPTIONS_ATTR.to_string(),
        entries.iter().map(|e| optional(&e.description)).collect(),
    );
    attrs.insert(
        FLAG_ASSESSMENTS_ATTR.to_string(),
        entries.iter().map(|e| optional(&e.assessment)).collect(),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::DataType;

    #[test]
    fn test_bit_mask() {
        assert_eq!(bit_mask(1), MISSING_FLAG);
        assert_eq!(bit_mask(2), RANGE_FLAG);
        assert_eq!(bit_mask(32), 1 << 31);
    }

    #[test]
    fn test_describe() {
        assert_eq!(describe(0), Vec::<&str>::new());
        assert_eq!(
            describe(RANGE_FLAG | CORRECTED_FLAG),
            vec!["range", "corrected"]
        );
    }

    #[test]
    fn test_annotate_records_each_meaning_once() {
        let mut v = Variable::new(
            "temperature",
            vec!["time".to_string()],
            DataType::Float64,
            ndarray::arr1(&[1.0]).into_dyn(),
        );
        let mut custom = FlagMeaning::new(bit_mask(6), "very_high");
        custom.description = Some("Above the sensor limit".to_string());
        custom.assessment = Some("bad".to_string());

        annotate(&mut v, FlagMeaning::new(RANGE_FLAG, "high"));
        annotate(&mut v, custom.clone());
        annotate(&mut v, FlagMeaning::new(RANGE_FLAG, "high"));

        assert_eq!(v.attrs[FLAG_MASKS_ATTR], serde_json::json!([2, 32]));
        assert_eq!(v.attrs[FLAG_MEANINGS_ATTR], serde_json::json!(["high", "very_high"]));
        assert_eq!(
            v.attrs[FLAG_DESCRIPTIONS_ATTR],
            serde_json::json!([null, "Above the sensor limit"])
        );
        assert_eq!(meanings(&v), vec![FlagMeaning::new(RANGE_FLAG, "high"), custom]);
    }
}
