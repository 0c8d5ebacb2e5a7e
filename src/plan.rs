//! Query plan records extracted from PostgreSQL duration/auto_explain output.
//!
//! A `Plan` is one logged statement: its total duration, the statement text
//! and the plan nodes that followed it. Serialized field names are the ones
//! downstream tooling reads (`query`, `operation`, `rows`), not the Rust names.

use serde::{Deserialize, Serialize};

/// One parsed query execution event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub duration_ms: f64,
    #[serde(rename = "query")]
    pub query_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_hash: Option<String>,
    pub operations: Vec<Operation>,
}

impl Plan {
    /// Start an empty plan for a freshly seen duration line.
    pub fn new(duration_ms: f64) -> Self {
        Self {
            duration_ms,
            query_text: None,
            query_hash: None,
            operations: Vec::new(),
        }
    }
}

/// One row of an execution plan.
///
/// `actual` is only set when the log line carried `EXPLAIN ANALYZE` timing,
/// so the four actual-execution values are always present or absent together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "OperationRecord", try_from = "OperationRecord")]
pub struct Operation {
    pub operation_name: String,
    pub cost_start: f64,
    pub cost_end: f64,
    pub estimated_rows: u64,
    pub width: u64,
    pub actual: Option<ActualStats>,
}

impl Operation {
    pub fn actual_time_start(&self) -> Option<f64> {
        self.actual.map(|a| a.time_start)
    }

    pub fn actual_time_end(&self) -> Option<f64> {
        self.actual.map(|a| a.time_end)
    }

    pub fn actual_rows(&self) -> Option<u64> {
        self.actual.map(|a| a.rows)
    }

    pub fn loops(&self) -> Option<u64> {
        self.actual.map(|a| a.loops)
    }
}

/// Measured execution statistics from an `(actual time=.. rows=.. loops=..)` group.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActualStats {
    pub time_start: f64,
    pub time_end: f64,
    pub rows: u64,
    pub loops: u64,
}

/// Flat wire form of an `Operation`; the actual-execution columns are nullable.
#[derive(Debug, Serialize, Deserialize)]
struct OperationRecord {
    operation: String,
    cost_start: f64,
    cost_end: f64,
    rows: u64,
    width: u64,
    actual_time_start: Option<f64>,
    actual_time_end: Option<f64>,
    actual_rows: Option<u64>,
    loops: Option<u64>,
}

impl From<Operation> for OperationRecord {
    fn from(op: Operation) -> Self {
        OperationRecord {
            actual_time_start: op.actual_time_start(),
            actual_time_end: op.actual_time_end(),
            actual_rows: op.actual_rows(),
            loops: op.loops(),
            operation: op.operation_name,
            cost_start: op.cost_start,
            cost_end: op.cost_end,
            rows: op.estimated_rows,
            width: op.width,
        }
    }
}

impl TryFrom<OperationRecord> for Operation {
    type Error = PartialActualStats;

    fn try_from(r: OperationRecord) -> Result<Self, Self::Error> {
        let actual = match (r.actual_time_start, r.actual_time_end, r.actual_rows, r.loops) {
            (Some(time_start), Some(time_end), Some(rows), Some(loops)) => Some(ActualStats {
                time_start,
                time_end,
                rows,
                loops,
            }),
            (None, None, None, None) => None,
            _ => {
                return Err(PartialActualStats {
                    operation: r.operation,
                })
            }
        };
        Ok(Operation {
            operation_name: r.operation,
            cost_start: r.cost_start,
            cost_end: r.cost_end,
            estimated_rows: r.rows,
            width: r.width,
            actual,
        })
    }
}

/// A serialized operation carried only some of the actual-execution fields.
#[derive(Debug)]
pub struct PartialActualStats {
    pub operation: String,
}

impl std::fmt::Display for PartialActualStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "operation {:?}: actual_time_start, actual_time_end, actual_rows and loops must all be set or all be null",
            self.operation
        )
    }
}

impl std::error::Error for PartialActualStats {}
