//! Feature declarations and normalization into estimator inputs

use crate::core::error::{EnsembleError, Result};
use serde::{Deserialize, Serialize};

/// How a raw input value is normalized
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Feature {
    /// Linear scaling of `[min, max]` onto `[0, 1]` (not clamped)
    Numeric { min: f64, max: f64 },
    /// One-hot encoding over a fixed category list
    Categorical { categories: Vec<String> },
    /// 0.0 or 1.0
    Binary,
}

/// Raw value produced by an input function
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureValue {
    Number(f64),
    Category(String),
    Flag(bool),
}

impl From<f64> for FeatureValue {
    fn from(v: f64) -> Self {
        FeatureValue::Number(v)
    }
}

impl From<bool> for FeatureValue {
    fn from(v: bool) -> Self {
        FeatureValue::Flag(v)
    }
}

impl From<&str> for FeatureValue {
    fn from(v: &str) -> Self {
        FeatureValue::Category(v.to_string())
    }
}

impl Feature {
    pub fn numeric(min: f64, max: f64) -> Self {
        Feature::Numeric { min, max }
    }

    pub fn categorical<I, S>(categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Feature::Categorical {
            categories: categories.into_iter().map(Into::into).collect(),
        }
    }

    /// Number of encoded columns
    pub fn width(&self) -> usize {
        match self {
            Feature::Numeric { .. } | Feature::Binary => 1,
            Feature::Categorical { categories } => categories.len(),
        }
    }

    /// Append the encoding of `value` to `out`
    pub fn encode(&self, name: &str, value: &FeatureValue, out: &mut Vec<f64>) -> Result<()> {
        match (self, value) {
            (Feature::Numeric { min, max }, FeatureValue::Number(v)) => {
                let span = max - min;
                out.push(if span.abs() < f64::EPSILON { 0.0 } else { (v - min) / span });
                Ok(())
            }
            (Feature::Categorical { categories }, FeatureValue::Category(c)) => {
                let hot = categories.iter().position(|known| known == c).ok_or_else(|| {
                    EnsembleError::FeatureEncoding {
                        feature: name.to_string(),
                        detail: format!("unknown category '{}'", c),
                    }
                })?;
                out.extend((0..categories.len()).map(|i| if i == hot { 1.0 } else { 0.0 }));
                Ok(())
            }
            (Feature::Binary, FeatureValue::Flag(b)) => {
                out.push(if *b { 1.0 } else { 0.0 });
                Ok(())
            }
            (feature, value) => Err(EnsembleError::FeatureEncoding {
                feature: name.to_string(),
                detail: format!("{:?} cannot encode {:?}", feature, value),
            }),
        }
    }
}

/// Ordered, named feature list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureSchema {
    fields: Vec<(String, Feature)>,
}

impl FeatureSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, feature: Feature) {
        self.fields.push((name.into(), feature));
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Total encoded width
    pub fn width(&self) -> usize {
        self.fields.iter().map(|(_, f)| f.width()).sum()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    /// Encode one raw value per declared field into a flat vector
    pub fn encode(&self, values: &[FeatureValue]) -> Result<Vec<f64>> {
        if values.len() != self.fields.len() {
            return Err(EnsembleError::FeatureEncoding {
                feature: "<schema>".into(),
                detail: format!("expected {} values, got {}", self.fields.len(), values.len()),
            });
        }

        let mut out = Vec::with_capacity(self.width());
        for ((name, feature), value) in self.fields.iter().zip(values) {
            feature.encode(name, value, &mut out)?;
        }
        Ok(out)
    }
}
