//! Stream filter descriptions
//!
//! Only the data shape lives here so a subscriber can send its filter inside
//! a subscribe envelope. Evaluation is done by the stream registry.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Comparison applied by a threshold filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    Equal,
    NotEqual,
}

impl Comparison {
    pub fn holds(&self, left: f64, right: f64) -> bool {
        match self {
            Comparison::GreaterThan => left > right,
            Comparison::GreaterOrEqual => left >= right,
            Comparison::LessThan => left < right,
            Comparison::LessOrEqual => left <= right,
            Comparison::Equal => left == right,
            Comparison::NotEqual => left != right,
        }
    }

    /// Parse the short operator names used in configuration (`gt`, `le`, ...)
    pub fn parse(op: &str) -> Option<Self> {
        match op {
            "gt" | ">" => Some(Comparison::GreaterThan),
            "ge" | "gte" | ">=" => Some(Comparison::GreaterOrEqual),
            "lt" | "<" => Some(Comparison::LessThan),
            "le" | "lte" | "<=" => Some(Comparison::LessOrEqual),
            "eq" | "==" => Some(Comparison::Equal),
            "ne" | "!=" => Some(Comparison::NotEqual),
            _ => None,
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            Comparison::GreaterThan => "gt",
            Comparison::GreaterOrEqual => "ge",
            Comparison::LessThan => "lt",
            Comparison::LessOrEqual => "le",
            Comparison::Equal => "eq",
            Comparison::NotEqual => "ne",
        };
        f.write_str(op)
    }
}

/// Predicate deciding whether an update reaches a subscriber
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum StreamFilter {
    #[default]
    PassThrough,
    /// Drop updates whose encoding equals the previously delivered one
    Changed,
    /// Drop updates whose value has zero size
    NonEmpty,
    /// Deliver only when `field` compared against `value` holds
    Threshold {
        field: String,
        comparison: Comparison,
        value: f64,
    },
}

impl StreamFilter {
    pub fn threshold(field: impl Into<String>, comparison: Comparison, value: f64) -> Self {
        Self::Threshold {
            field: field.into(),
            comparison,
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comparison_semantics() {
        assert!(Comparison::GreaterThan.holds(101.0, 100.0));
        assert!(!Comparison::GreaterThan.holds(100.0, 100.0));
        assert!(Comparison::GreaterOrEqual.holds(100.0, 100.0));
        assert!(Comparison::LessThan.holds(99.0, 100.0));
        assert!(Comparison::LessOrEqual.holds(100.0, 100.0));
        assert!(Comparison::Equal.holds(3.0, 3.0));
        assert!(Comparison::NotEqual.holds(3.0, 4.0));
    }

    #[test]
    fn test_comparison_parse_roundtrip() {
        for op in ["gt", "ge", "lt", "le", "eq", "ne"] {
            let parsed = Comparison::parse(op).unwrap();
            assert_eq!(parsed.to_string(), op);
        }
        assert_eq!(Comparison::parse("between"), None);
    }
}
