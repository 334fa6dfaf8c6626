//! Unit conversion rules.

use crate::config::{ConversionConfig, ConversionRule};

/// A resolved conversion from one unit to another.
#[derive(Debug, Clone, PartialEq)]
pub enum Converter {
    Identity,
    Linear { scale: f64, offset: f64 },
    /// Points sorted by source value.
    Table(Vec<[f64; 2]>),
}

impl Converter {
    /// Converts one value. Table lookups outside the table yield NaN.
    pub fn apply(&self, value: f64) -> f64 {
        match self {
            Converter::Identity => value,
            Converter::Linear { scale, offset } => value * scale + offset,
            Converter::Table(points) => interpolate_table(points, value),
        }
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, Converter::Identity)
    }
}

fn interpolate_table(points: &[[f64; 2]], value: f64) -> f64 {
    if !value.is_finite() {
        return f64::NAN;
    }
    let idx = points.partition_point(|p| p[0] < value);
    match idx {
        0 => match points.first() {
            Some(p) if p[0] == value => p[1],
            _ => f64::NAN,
        },
        i if i == points.len() => f64::NAN,
        i => {
            let [x0, y0] = points[i - 1];
            let [x1, y1] = points[i];
            if x1 == value {
                y1
            } else {
                y0 + (value - x0) * (y1 - y0) / (x1 - x0)
            }
        }
    }
}

fn normalize(unit: &str) -> String {
    unit.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Finds the conversion from `from` to `to`.
///
/// Equal units (ignoring whitespace) need no rule. A linear rule declared in
/// the opposite direction is inverted; table rules are one-way.
pub fn resolve_converter(
    conversions: &[ConversionConfig],
    from: &str,
    to: &str,
) -> Option<Converter> {
    let (from, to) = (normalize(from), normalize(to));
    if from == to {
        return Some(Converter::Identity);
    }

    let forward = conversions
        .iter()
        .find(|c| normalize(&c.from) == from && normalize(&c.to) == to);
    if let Some(conversion) = forward {
        return Some(match &conversion.rule {
            ConversionRule::Linear { scale, offset } => Converter::Linear {
                scale: *scale,
                offset: *offset,
            },
            ConversionRule::Table { points } => Converter::Table(points.clone()),
        });
    }

    conversions
        .iter()
        .find(|c| normalize(&c.from) == to && normalize(&c.to) == from)
        .and_then(|c| match c.rule {
            ConversionRule::Linear { scale, offset } if scale != 0.0 => Some(Converter::Linear {
                scale: 1.0 / scale,
                offset: -offset / scale,
            }),
            _ => None,
        })
}
