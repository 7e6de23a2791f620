//! Selector patterns over `namespace/unit` pairs.
//!
//! A selector is either an include (`sales/orders`, `sales/*`, `*/orders`,
//! `sales`) or an exclude, written with a leading `-`. Resolution takes the
//! units matching any include (every unit when there are no includes) and
//! drops those matching any exclude. Excludes win no matter where they appear
//! in the list.
//!
//! ```rust
//! use lookml_guard::core::UnitId;
//! use lookml_guard::selector::SelectorResolver;
//!
//! let inventory = vec![
//!     UnitId::new("sales", "orders"),
//!     UnitId::new("sales", "returns"),
//!     UnitId::new("finance", "ledger"),
//! ];
//! let resolver = SelectorResolver::new(["-sales/returns", "sales/*"])?;
//! let units = resolver.resolve(&inventory)?;
//! assert_eq!(units, vec![UnitId::new("sales", "orders")]);
//! # Ok::<(), lookml_guard::error::GuardError>(())
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use glob::{MatchOptions, Pattern};
use tracing::debug;

use crate::core::UnitId;
use crate::error::{GuardError, Result};

const GLOB_METACHARACTERS: [char; 3] = ['*', '?', '['];

const SEGMENT_MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// One side of a selector: a namespace or a unit name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// A literal name
    Exact(String),
    /// A wildcard pattern confined to one segment
    Glob(Pattern),
}

impl Segment {
    fn parse(raw: &str) -> std::result::Result<Self, String> {
        if raw.is_empty() {
            return Err("empty segment".to_string());
        }
        if raw.contains(GLOB_METACHARACTERS) {
            Pattern::new(raw)
                .map(Self::Glob)
                .map_err(|e| format!("invalid wildcard '{raw}': {}", e.msg))
        } else {
            Ok(Self::Exact(raw.to_string()))
        }
    }

    /// Returns true if `value` matches this segment.
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Self::Exact(name) => name == value,
            Self::Glob(pattern) => pattern.matches_with(value, SEGMENT_MATCH),
        }
    }

    /// Returns true for literal segments.
    pub fn is_exact(&self) -> bool {
        matches!(self, Self::Exact(_))
    }
}

/// Whether a pattern adds or removes units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    /// Units matching the pattern are selected
    Include,
    /// Units matching the pattern are never selected
    Exclude,
}

/// A parsed selector pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorPattern {
    raw: String,
    polarity: Polarity,
    namespace: Segment,
    unit: Segment,
}

impl SelectorPattern {
    /// Parses a single pattern.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::Selector`] for empty patterns, patterns with more
    /// than two segments and malformed wildcards.
    pub fn parse(raw: &str) -> Result<Self> {
        Self::parse_inner(raw).map_err(|message| GuardError::selector(message, [raw]))
    }

    fn parse_inner(raw: &str) -> std::result::Result<Self, String> {
        let trimmed = raw.trim();
        let (polarity, body) = match trimmed.strip_prefix('-') {
            Some(rest) => (Polarity::Exclude, rest.trim()),
            None => (Polarity::Include, trimmed),
        };
        if body.is_empty() {
            return Err("empty selector".to_string());
        }
        let segments: Vec<&str> = body.split('/').collect();
        let (namespace, unit) = match segments.as_slice() {
            ["*"] => ("*", "*"),
            [namespace] => (*namespace, "*"),
            [namespace, unit] => (*namespace, *unit),
            _ => return Err("expected 'namespace/unit'".to_string()),
        };
        Ok(Self {
            raw: trimmed.to_string(),
            polarity,
            namespace: Segment::parse(namespace)?,
            unit: Segment::parse(unit)?,
        })
    }

    /// The pattern as written, trimmed.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Include or exclude.
    pub fn polarity(&self) -> Polarity {
        self.polarity
    }

    /// Returns true for exclude patterns.
    pub fn is_exclude(&self) -> bool {
        self.polarity == Polarity::Exclude
    }

    /// Returns true if either segment is a literal name. Such patterns must
    /// match at least one unit.
    pub fn is_explicit(&self) -> bool {
        self.namespace.is_exact() || self.unit.is_exact()
    }

    /// Returns true if the pattern matches `unit`.
    pub fn matches(&self, unit: &UnitId) -> bool {
        self.namespace.matches(&unit.namespace) && self.unit.matches(&unit.unit)
    }
}

impl FromStr for SelectorPattern {
    type Err = GuardError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for SelectorPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Resolves an ordered list of selector patterns against an inventory.
#[derive(Debug, Clone, Default)]
pub struct SelectorResolver {
    patterns: Vec<SelectorPattern>,
}

impl SelectorResolver {
    /// Parses every pattern.
    ///
    /// # Errors
    ///
    /// Returns a single [`GuardError::Selector`] naming every pattern that
    /// failed to parse.
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parsed = Vec::new();
        let mut invalid = Vec::new();
        let mut reasons = Vec::new();
        for raw in patterns {
            let raw = raw.as_ref();
            match SelectorPattern::parse_inner(raw) {
                Ok(pattern) => parsed.push(pattern),
                Err(reason) => {
                    reasons.push(format!("'{raw}': {reason}"));
                    invalid.push(raw.to_string());
                }
            }
        }
        if !invalid.is_empty() {
            return Err(GuardError::selector(
                format!("invalid selector patterns: {}", reasons.join("; ")),
                invalid,
            ));
        }
        Ok(Self { patterns: parsed })
    }

    /// The parsed patterns, in input order.
    pub fn patterns(&self) -> &[SelectorPattern] {
        &self.patterns
    }

    /// Computes the selected units, deduplicated and ordered by namespace
    /// then unit name.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::Selector`] if any explicit pattern matches no
    /// unit in `inventory`.
    pub fn resolve(&self, inventory: &[UnitId]) -> Result<Vec<UnitId>> {
        let unmatched = self.unmatched(inventory);
        if !unmatched.is_empty() {
            return Err(GuardError::selector(
                "selector patterns matched no unit",
                unmatched,
            ));
        }
        Ok(self.select(inventory))
    }

    /// Resolves against an inventory that may lack units the patterns name
    /// explicitly, such as the baseline branch of an incremental run.
    /// Explicit patterns that match nothing select nothing.
    pub fn resolve_available(&self, inventory: &[UnitId]) -> Vec<UnitId> {
        let unmatched = self.unmatched(inventory);
        if !unmatched.is_empty() {
            debug!(patterns = ?unmatched, "Selector patterns absent from inventory");
        }
        self.select(inventory)
    }

    fn unmatched(&self, inventory: &[UnitId]) -> Vec<&str> {
        self.patterns
            .iter()
            .filter(|p| p.is_explicit() && !inventory.iter().any(|unit| p.matches(unit)))
            .map(SelectorPattern::as_str)
            .collect()
    }

    fn select(&self, inventory: &[UnitId]) -> Vec<UnitId> {
        let (excludes, includes): (Vec<&SelectorPattern>, Vec<&SelectorPattern>) =
            self.patterns.iter().partition(|p| p.is_exclude());

        let selected: BTreeSet<&UnitId> = inventory
            .iter()
            .filter(|unit| includes.is_empty() || includes.iter().any(|p| p.matches(unit)))
            .filter(|unit| !excludes.iter().any(|p| p.matches(unit)))
            .collect();

        debug!(
            patterns = self.patterns.len(),
            inventory = inventory.len(),
            selected = selected.len(),
            "Resolved selectors"
        );
        selected.into_iter().cloned().collect()
    }
}
