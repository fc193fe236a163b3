//! Shared value types for ApproxQL

use serde::{Deserialize, Serialize};

/// Aggregate function of a SELECT statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFn {
    /// Row count over the range.
    Count,
    /// Sum of the target column over the range.
    Sum,
    /// Mean of the target column over the range.
    Avg,
}

impl std::str::FromStr for AggregateFn {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "count" => Ok(AggregateFn::Count),
            "sum" => Ok(AggregateFn::Sum),
            "avg" => Ok(AggregateFn::Avg),
            other => Err(crate::Error::UnsupportedQuery(format!(
                "aggregate function '{other}' (expected count, sum, or avg)"
            ))),
        }
    }
}

impl std::fmt::Display for AggregateFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregateFn::Count => write!(f, "count"),
            AggregateFn::Sum => write!(f, "sum"),
            AggregateFn::Avg => write!(f, "avg"),
        }
    }
}

/// Sampling method requested by a CREATE statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplingMethod {
    /// Uniform random sampling over the source rows.
    Uniform,
}

impl std::str::FromStr for SamplingMethod {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "uniform" => Ok(SamplingMethod::Uniform),
            other => Err(crate::Error::Validation(format!(
                "unknown sampling method '{other}' (expected uniform)"
            ))),
        }
    }
}

/// Range predicate of a SELECT statement: `x BETWEEN lower AND upper`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangePredicate {
    /// Predicate column (the model's independent variable).
    pub column: String,
    /// Inclusive lower bound.
    pub lower: f64,
    /// Inclusive upper bound.
    pub upper: f64,
}

/// A parsed query, ready for orchestration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryDescriptor {
    /// Train a new model over a source table.
    CreateModel {
        /// Model name (also the warehouse key stem).
        name: String,
        /// Source data locator: absolute path used verbatim, otherwise
        /// resolved relative to the warehouse root.
        source: String,
        /// Independent-variable header.
        x_header: String,
        /// Dependent-variable header.
        y_header: String,
        /// Sampling ratio: a row fraction when ≤ 1, an absolute sample
        /// size when > 1.
        ratio: f64,
        /// Sampling method.
        method: SamplingMethod,
        /// Group-by attribute, when training one surface per group.
        group_by: Option<String>,
    },
    /// Estimate an aggregate from a trained model.
    SelectAggregate {
        /// Target model name.
        model: String,
        /// Aggregate function.
        agg: AggregateFn,
        /// Dependent-variable header named in the aggregate.
        y_header: String,
        /// Range predicate; required for estimation.
        range: Option<RangePredicate>,
        /// Group-by attribute of the query.
        group_by: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_aggregate_fn_parse() {
        assert_eq!(AggregateFn::from_str("COUNT").unwrap(), AggregateFn::Count);
        assert_eq!(AggregateFn::from_str("Sum").unwrap(), AggregateFn::Sum);
        assert_eq!(AggregateFn::from_str("avg").unwrap(), AggregateFn::Avg);
        assert!(AggregateFn::from_str("median").is_err());
    }

    #[test]
    fn test_descriptor_serde_roundtrip() {
        let q = QueryDescriptor::SelectAggregate {
            model: "sales".to_string(),
            agg: AggregateFn::Avg,
            y_header: "price".to_string(),
            range: Some(RangePredicate {
                column: "cost".to_string(),
                lower: 1.0,
                upper: 10.0,
            }),
            group_by: None,
        };
        let json = serde_json::to_string(&q).unwrap();
        let q2: QueryDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(q, q2);
    }
}
