//! Canonical data model: prediction/reference records, raw input instances,
//! and metric results.
//!
//! A [`Record`] is the typed atom a model produces or a dataset provides. An
//! [`Instance`] is whatever shape a caller hands to a metric: a bare string,
//! a `{"value": .., "score": ..}` mapping, a record, or a (nested) sequence
//! of those. The normalizer reduces every instance to canonical strings.

use crate::error::{EvalError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Marker for records whose role is not fixed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct AnyRole;

/// Marker for records produced by a model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PredictionRole;

/// Marker for ground-truth records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ReferenceRole;

/// Immutable prediction or reference atom: a value plus optional confidence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Record<K = AnyRole> {
    value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    score: Option<f64>,
    #[serde(skip)]
    role: PhantomData<K>,
}

/// Record emitted by a model wrapper
pub type PredictionRecord = Record<PredictionRole>;

/// Record holding ground truth
pub type ReferenceRecord = Record<ReferenceRole>;

impl<K> Record<K> {
    /// Create a record without a confidence score
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            score: None,
            role: PhantomData,
        }
    }

    /// Attach a confidence score
    #[must_use]
    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    /// Build a record from a `{"value": .., "score": ..}` mapping.
    ///
    /// The legacy `text` key is accepted when `value` is absent.
    ///
    /// # Errors
    ///
    /// Returns a shape error if neither key is present or the score is not numeric.
    pub fn from_mapping(mapping: &Map<String, Value>) -> Result<Self> {
        let value = mapping
            .get("value")
            .or_else(|| mapping.get("text"))
            .cloned()
            .ok_or_else(|| {
                EvalError::shape(format!(
                    "mapping atom has no `value` key: {}",
                    Value::Object(mapping.clone())
                ))
            })?;

        let score = match mapping.get("score") {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => n.as_f64(),
            Some(other) => {
                return Err(EvalError::shape(format!(
                    "mapping atom score must be numeric, got {other}"
                )))
            }
        };

        Ok(Self {
            value,
            score,
            role: PhantomData,
        })
    }

    /// Atomic content
    #[must_use]
    pub const fn value(&self) -> &Value {
        &self.value
    }

    /// Model confidence, if any
    #[must_use]
    pub const fn score(&self) -> Option<f64> {
        self.score
    }

    /// String form consumed by scoring backends
    #[must_use]
    pub fn canonical_value(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    /// Reinterpret the record under another role
    #[must_use]
    pub fn cast<R>(self) -> Record<R> {
        Record {
            value: self.value,
            score: self.score,
            role: PhantomData,
        }
    }

    /// Mapping form, the inverse of [`Record::from_mapping`]
    #[must_use]
    pub fn to_mapping(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("value".to_string(), self.value.clone());
        map.insert(
            "score".to_string(),
            self.score.map_or(Value::Null, Value::from),
        );
        map
    }
}

impl<K> PartialEq for Record<K> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value && self.score.map(f64::to_bits) == other.score.map(f64::to_bits)
    }
}

impl<K> Eq for Record<K> {}

impl<K> Hash for Record<K> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.to_string().hash(state);
        self.score.map(f64::to_bits).hash(state);
    }
}

/// Raw prediction/reference input of any supported shape
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "Value")]
pub enum Instance {
    /// Bare string atom
    Text(String),
    /// Bare integer atom (class labels)
    Integer(i64),
    /// `{"value": .., "score": ..}` atom
    Mapping(Map<String, Value>),
    /// Already-typed record
    Record(Record),
    /// Batch of items, or the candidates of one multi-valued item
    Sequence(Vec<Instance>),
}

impl Instance {
    /// Empty batch
    #[must_use]
    pub const fn empty() -> Self {
        Self::Sequence(Vec::new())
    }

    /// Whether the instance carries nothing to score
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Sequence(items) => items.is_empty(),
            Self::Text(text) => text.is_empty(),
            Self::Mapping(map) => map.is_empty(),
            Self::Integer(_) | Self::Record(_) => false,
        }
    }

    /// Short description of the variant, used in error messages
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Integer(_) => "integer",
            Self::Mapping(_) => "mapping",
            Self::Record(_) => "record",
            Self::Sequence(_) => "sequence",
        }
    }
}

impl TryFrom<Value> for Instance {
    type Error = EvalError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::String(s) => Ok(Self::Text(s)),
            Value::Object(map) => Ok(Self::Mapping(map)),
            Value::Array(items) => items
                .into_iter()
                .map(Self::try_from)
                .collect::<Result<Vec<_>>>()
                .map(Self::Sequence),
            Value::Number(n) => n.as_i64().map(Self::Integer).ok_or_else(|| {
                EvalError::shape(format!("unsupported numeric atom {n}; wrap it in a mapping"))
            }),
            other => Err(EvalError::shape(format!("unsupported atom {other}"))),
        }
    }
}

impl From<&str> for Instance {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for Instance {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<i64> for Instance {
    fn from(label: i64) -> Self {
        Self::Integer(label)
    }
}

impl From<Map<String, Value>> for Instance {
    fn from(map: Map<String, Value>) -> Self {
        Self::Mapping(map)
    }
}

impl<K> From<Record<K>> for Instance {
    fn from(record: Record<K>) -> Self {
        Self::Record(record.cast())
    }
}

impl<T: Into<Self>> From<Vec<T>> for Instance {
    fn from(items: Vec<T>) -> Self {
        Self::Sequence(items.into_iter().map(Into::into).collect())
    }
}

/// Scored outcome of one metric over one batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricResult {
    metric_name: String,
    #[serde(with = "nullable_f64")]
    score: f64,
    total_items: usize,
    #[serde(default)]
    empty_items: usize,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    extra: Map<String, Value>,
}

impl MetricResult {
    /// Create a result with no skipped items
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `metric_name` is empty.
    pub fn new(metric_name: impl Into<String>, score: f64, total_items: usize) -> Result<Self> {
        Self::with_empty_items(metric_name, score, total_items, 0)
    }

    /// Create a result that records skipped items
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `metric_name` is empty or
    /// `empty_items` exceeds `total_items`.
    pub fn with_empty_items(
        metric_name: impl Into<String>,
        score: f64,
        total_items: usize,
        empty_items: usize,
    ) -> Result<Self> {
        let metric_name = metric_name.into();
        if metric_name.trim().is_empty() {
            return Err(EvalError::configuration("metric result needs a non-empty name"));
        }
        if empty_items > total_items {
            return Err(EvalError::configuration(format!(
                "{metric_name}: empty_items ({empty_items}) exceeds total_items ({total_items})"
            )));
        }
        Ok(Self {
            metric_name,
            score,
            total_items,
            empty_items,
            extra: Map::new(),
        })
    }

    /// Zero-item result for an empty batch
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `metric_name` is empty.
    pub fn empty(metric_name: impl Into<String>) -> Result<Self> {
        Self::new(metric_name, f64::NAN, 0)
    }

    /// Attach one auxiliary value
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Attach a whole mapping of auxiliary values
    #[must_use]
    pub fn with_extras(mut self, extras: Map<String, Value>) -> Self {
        self.extra.extend(extras);
        self
    }

    #[must_use]
    pub fn metric_name(&self) -> &str {
        &self.metric_name
    }

    /// Primary scalar; NaN when the metric has none
    #[must_use]
    pub const fn score(&self) -> f64 {
        self.score
    }

    #[must_use]
    pub const fn total_items(&self) -> usize {
        self.total_items
    }

    #[must_use]
    pub const fn empty_items(&self) -> usize {
        self.empty_items
    }

    /// Metric-specific auxiliary data
    #[must_use]
    pub const fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }

    /// Score at 3 decimals; `None` when non-finite
    #[allow(clippy::cast_possible_truncation)]
    fn rounded_score(&self) -> Option<i64> {
        self.score
            .is_finite()
            .then(|| (self.score * 1000.0).round() as i64)
    }
}

impl PartialEq for MetricResult {
    fn eq(&self, other: &Self) -> bool {
        self.metric_name == other.metric_name
            && self.rounded_score() == other.rounded_score()
            && self.total_items == other.total_items
            && self.empty_items == other.empty_items
    }
}

impl Eq for MetricResult {}

impl Hash for MetricResult {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.metric_name.hash(state);
        self.rounded_score().hash(state);
        self.total_items.hash(state);
        self.empty_items.hash(state);
    }
}

impl fmt::Display for MetricResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {:.4} ({} items",
            self.metric_name, self.score, self.total_items
        )?;
        if self.empty_items > 0 {
            write!(f, ", {} empty", self.empty_items)?;
        }
        write!(f, ")")
    }
}

/// JSON has no NaN: write non-finite scores as `null` and read `null` back as NaN
mod nullable_f64 {
    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
    }
}
