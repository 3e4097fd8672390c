//! # Genes
//!
//! A gene is a single tunable configuration value. Its kind (numeric,
//! boolean, categorical) is resolved once at construction time and carried
//! as an explicit tag, so the genetic operators dispatch on the tag instead
//! of re-inspecting raw values at every generation.

use serde::{Deserialize, Serialize};

// ─── Gene ────────────────────────────────────────────────────────────────────

/// A single tunable configuration value.
///
/// Numeric genes may declare inclusive bounds; mutation resamples bounded
/// genes within `[min, max]` and perturbs unbounded ones relative to their
/// current magnitude. Categorical genes carry their full choice set so
/// mutation can pick an alternative without external schema lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Gene {
    /// A floating-point parameter, optionally bounded.
    Numeric {
        /// Current value.
        value: f64,
        /// Inclusive `(min, max)` bounds, if declared.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bounds: Option<(f64, f64)>,
    },
    /// An on/off switch.
    Boolean {
        /// Current value.
        value: bool,
    },
    /// A choice from a fixed set of alternatives.
    Categorical {
        /// Current value. Always a member of `choices`.
        value: String,
        /// All admissible values, including the current one.
        choices: Vec<String>,
    },
}

impl Gene {
    /// Create an unbounded numeric gene.
    pub fn numeric(value: f64) -> Self {
        Gene::Numeric {
            value,
            bounds: None,
        }
    }

    /// Create a bounded numeric gene.
    ///
    /// Reversed bounds are reordered and the value is clamped into them, so
    /// the invariant `min <= value <= max` holds from construction onward.
    pub fn numeric_bounded(value: f64, min: f64, max: f64) -> Self {
        let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
        Gene::Numeric {
            value: value.clamp(lo, hi),
            bounds: Some((lo, hi)),
        }
    }

    /// Create a boolean gene.
    pub fn boolean(value: bool) -> Self {
        Gene::Boolean { value }
    }

    /// Create a categorical gene.
    ///
    /// If the current value is missing from `choices` it is appended, so the
    /// invariant "the value is always admissible" holds from construction.
    pub fn categorical(value: impl Into<String>, choices: Vec<String>) -> Self {
        let value = value.into();
        let mut choices = choices;
        if !choices.contains(&value) {
            choices.push(value.clone());
        }
        Gene::Categorical { value, choices }
    }

    /// The kind tag this gene was resolved to at construction.
    pub fn kind(&self) -> GeneKind {
        match self {
            Gene::Numeric { .. } => GeneKind::Numeric,
            Gene::Boolean { .. } => GeneKind::Boolean,
            Gene::Categorical { .. } => GeneKind::Categorical,
        }
    }

    /// The numeric value, if this is a numeric gene.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Gene::Numeric { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// The boolean value, if this is a boolean gene.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Gene::Boolean { value } => Some(*value),
            _ => None,
        }
    }

    /// The categorical value, if this is a categorical gene.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Gene::Categorical { value, .. } => Some(value.as_str()),
            _ => None,
        }
    }

    /// Canonical encoding of this gene's value for digest computation.
    ///
    /// Numeric values are encoded by IEEE-754 bit pattern so equal values
    /// encode identically regardless of display formatting. The kind prefix
    /// keeps `Boolean(true)` distinct from `Categorical("1")`. Bounds and
    /// choice sets are deliberately excluded: the digest covers names and
    /// values only.
    pub(crate) fn hash_fragment(&self) -> String {
        match self {
            Gene::Numeric { value, .. } => format!("n:{:016x}", value.to_bits()),
            Gene::Boolean { value } => format!("b:{}", u8::from(*value)),
            Gene::Categorical { value, .. } => format!("c:{value}"),
        }
    }
}

// ─── GeneKind ────────────────────────────────────────────────────────────────

/// The resolved kind of a [`Gene`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeneKind {
    /// Floating-point parameter.
    Numeric,
    /// On/off switch.
    Boolean,
    /// Choice from a fixed set.
    Categorical,
}

impl GeneKind {
    /// Lowercase tag name, matching the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            GeneKind::Numeric => "numeric",
            GeneKind::Boolean => "boolean",
            GeneKind::Categorical => "categorical",
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
