//! Shape normalization: any supported [`Instance`] becomes a batch of
//! canonical strings.
//!
//! Every item of the batch is either [`Canonical::Single`] (one atom) or
//! [`Canonical::Multiple`] (several candidate atoms, e.g. alternative
//! reference answers). Nesting is allowed exactly one level deep.

use crate::error::{EvalError, Result};
use crate::structures::{Instance, Record};
use serde::{Deserialize, Serialize};

/// One normalized prediction or reference item
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Canonical {
    Single(String),
    Multiple(Vec<String>),
}

impl Canonical {
    /// The atom of a single item
    #[must_use]
    pub fn as_single(&self) -> Option<&str> {
        match self {
            Self::Single(value) => Some(value),
            Self::Multiple(_) => None,
        }
    }

    /// All candidate atoms of the item (one for a single item)
    #[must_use]
    pub fn candidates(&self) -> &[String] {
        match self {
            Self::Single(value) => std::slice::from_ref(value),
            Self::Multiple(values) => values,
        }
    }

    #[must_use]
    pub const fn is_multiple(&self) -> bool {
        matches!(self, Self::Multiple(_))
    }

    /// Back to an input instance that normalizes to `self`
    #[must_use]
    pub fn into_instance(self) -> Instance {
        match self {
            Self::Single(value) => Instance::Text(value),
            Self::Multiple(values) => Instance::from(values),
        }
    }
}

impl From<Canonical> for Instance {
    fn from(item: Canonical) -> Self {
        item.into_instance()
    }
}

/// Rebuild an input instance from an already-normalized batch
#[must_use]
pub fn to_instance(batch: &[Canonical]) -> Instance {
    Instance::Sequence(batch.iter().cloned().map(Canonical::into_instance).collect())
}

/// Flat string list when every item of the batch is single
#[must_use]
pub fn canonical_strings(batch: &[Canonical]) -> Option<Vec<String>> {
    batch
        .iter()
        .map(|item| item.as_single().map(str::to_string))
        .collect()
}

/// Converts raw instances to canonical form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Normalizer {
    stringify: bool,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Normalizer {
    /// Normalizer that coerces bare integers to strings
    #[must_use]
    pub const fn new() -> Self {
        Self { stringify: true }
    }

    /// Enable or disable integer coercion
    #[must_use]
    pub const fn stringify(mut self, stringify: bool) -> Self {
        self.stringify = stringify;
        self
    }

    /// Normalize a batch.
    ///
    /// Empty input yields an empty batch and a bare atom is treated as a
    /// batch of one.
    ///
    /// # Errors
    ///
    /// Returns a shape error for sequences nested deeper than one level,
    /// items with an empty candidate list, malformed mapping atoms, or
    /// integers when `stringify` is disabled.
    pub fn normalize(&self, instances: &Instance) -> Result<Vec<Canonical>> {
        if instances.is_empty() {
            return Ok(Vec::new());
        }

        match instances {
            Instance::Sequence(items) => items
                .iter()
                .enumerate()
                .map(|(index, item)| self.normalize_item(index, item))
                .collect(),
            atom => Ok(vec![Canonical::Single(self.atom_value(0, atom)?)]),
        }
    }

    fn normalize_item(&self, index: usize, item: &Instance) -> Result<Canonical> {
        match item {
            Instance::Sequence(candidates) if candidates.is_empty() => Err(EvalError::shape(
                format!("item {index}: candidate list is empty"),
            )),
            Instance::Sequence(candidates) => candidates
                .iter()
                .map(|candidate| self.atom_value(index, candidate))
                .collect::<Result<Vec<_>>>()
                .map(Canonical::Multiple),
            atom => self.atom_value(index, atom).map(Canonical::Single),
        }
    }

    fn atom_value(&self, index: usize, atom: &Instance) -> Result<String> {
        self.to_record(index, atom).map(|record| record.canonical_value())
    }

    fn to_record(&self, index: usize, atom: &Instance) -> Result<Record> {
        match atom {
            Instance::Record(record) => Ok(record.clone()),
            Instance::Text(text) => Ok(Record::new(text.as_str())),
            Instance::Mapping(mapping) => Record::from_mapping(mapping),
            Instance::Integer(label) if self.stringify => Ok(Record::new(label.to_string())),
            Instance::Integer(label) => Err(EvalError::shape(format!(
                "item {index}: integer atom {label} needs stringify enabled"
            ))),
            Instance::Sequence(_) => Err(EvalError::shape(format!(
                "item {index}: sequences may nest only one level deep"
            ))),
        }
    }
}

/// Normalize with default options
///
/// # Errors
///
/// See [`Normalizer::normalize`].
pub fn normalize(instances: &Instance) -> Result<Vec<Canonical>> {
    Normalizer::new().normalize(instances)
}
