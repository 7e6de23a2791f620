//! Units, fields and batches.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Tags that exclude a field from SQL validation.
const IGNORE_TAGS: [&str; 2] = ["spectacles: ignore", "looker-validator: ignore"];

static IGNORE_SQL_COMMENT: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"--\s*(spectacles|looker-validator):\s*ignore")
        .expect("Hard-coded regex pattern should be valid")
});

/// Identity of a validatable unit: a model/explore pair.
///
/// Units order by namespace first, then by unit name, which is the order
/// used for every deterministic listing in this crate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitId {
    /// The namespace (LookML model) the unit belongs to
    pub namespace: String,
    /// The unit name (LookML explore)
    pub unit: String,
}

impl UnitId {
    /// Creates a new unit identity.
    pub fn new(namespace: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            unit: unit.into(),
        }
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.unit)
    }
}

/// A leaf item of a unit (a LookML dimension).
///
/// The pair `(unit, id)` is the stable identity used to compare runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// Field name, e.g. `orders.created_date`
    pub id: String,
    /// The unit this field belongs to
    pub unit: UnitId,
    /// Whether the field is hidden from end users
    #[serde(default)]
    pub hidden: bool,
    /// Tags declared on the field
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// The field's SQL expression, when the inventory exposes it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
}

impl Field {
    /// Creates a visible field with no metadata.
    pub fn new(unit: UnitId, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            unit,
            hidden: false,
            tags: Vec::new(),
            sql: None,
        }
    }

    /// Sets the hidden flag.
    pub fn with_hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    /// Sets the field's tags.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the field's SQL expression.
    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }

    /// Returns true if the field opted out of SQL validation through an
    /// ignore tag or an ignore comment in its SQL.
    pub fn is_ignored(&self) -> bool {
        let tagged = self
            .tags
            .iter()
            .any(|tag| IGNORE_TAGS.contains(&tag.trim().to_lowercase().as_str()));
        tagged
            || self
                .sql
                .as_deref()
                .is_some_and(|sql| IGNORE_SQL_COMMENT.is_match(sql))
    }
}

/// A validatable unit with its ordered field list.
///
/// Units are resolved once per run and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    /// The unit's identity
    pub id: UnitId,
    /// Fields in inventory order
    pub fields: Vec<Field>,
}

impl Unit {
    /// Creates a unit from its identity and fields.
    pub fn new(id: UnitId, fields: Vec<Field>) -> Self {
        Self { id, fields }
    }
}

/// Correlation id of a batch, used in logs.
///
/// Ids are derived from the batch's lineage so that they are stable across
/// runs: `sales/orders#2` is the third top-level batch, `~0` marks the first
/// chunk of an adaptive re-split and `.1` the second half of a bisection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchId(String);

impl BatchId {
    /// Id of the `index`-th top-level batch of a unit.
    pub fn top_level(unit: &UnitId, index: usize) -> Self {
        Self(format!("{unit}#{index}"))
    }

    /// Id of the `index`-th chunk produced by re-splitting this batch.
    pub fn chunk(&self, index: usize) -> Self {
        Self(format!("{}~{index}", self.0))
    }

    /// Id of one bisection half (0 = left, 1 = right) of this batch.
    pub fn half(&self, side: usize) -> Self {
        Self(format!("{}.{side}", self.0))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A non-empty, ordered subset of one unit's fields validated in one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    id: BatchId,
    unit: UnitId,
    fields: Vec<Field>,
    tier: usize,
}

impl Batch {
    /// Creates a batch. Returns `None` if `fields` is empty.
    pub fn new(id: BatchId, unit: UnitId, fields: Vec<Field>, tier: usize) -> Option<Self> {
        if fields.is_empty() {
            return None;
        }
        Some(Self {
            id,
            unit,
            fields,
            tier: tier.max(1),
        })
    }

    /// The batch's correlation id.
    pub fn id(&self) -> &BatchId {
        &self.id
    }

    /// The unit all fields belong to.
    pub fn unit(&self) -> &UnitId {
        &self.unit
    }

    /// The fields in submission order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// The size tier the batch was cut at.
    pub fn tier(&self) -> usize {
        self.tier
    }

    /// Number of fields in the batch.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Always false; batches are non-empty by construction.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Ids of the batch's fields, in order.
    pub fn field_ids(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.id.as_str()).collect()
    }

    /// Id of the first field.
    pub fn first_field(&self) -> &str {
        &self.fields[0].id
    }

    /// Id of the last field.
    pub fn last_field(&self) -> &str {
        &self.fields[self.fields.len() - 1].id
    }

    /// Splits the batch into two halves whose sizes differ by at most one.
    ///
    /// The left half takes the extra field when the size is odd. Returns
    /// `None` for single-field batches.
    pub fn split_halves(&self) -> Option<(Batch, Batch)> {
        if self.fields.len() < 2 {
            return None;
        }
        let midpoint = self.fields.len().div_ceil(2);
        let tier = self.tier.div_ceil(2);
        let (left, right) = self.fields.split_at(midpoint);
        Some((
            Batch {
                id: self.id.half(0),
                unit: self.unit.clone(),
                fields: left.to_vec(),
                tier,
            },
            Batch {
                id: self.id.half(1),
                unit: self.unit.clone(),
                fields: right.to_vec(),
                tier,
            },
        ))
    }
}
