//! Plan log scanner: turn PostgreSQL duration/auto_explain log lines into `Plan`s.
//!
//! Three line shapes are recognized, first match wins:
//!
//! - `LOG:  duration: 12.345 ms` starts a new plan (finalizing the previous one)
//! - `Query Text: SELECT ...` attaches statement text and opens the operation block
//! - `<name>  (cost=a..b rows=n width=w) [(actual time=a..b rows=n loops=l)]`
//!   appends an operation while the block is open; a blank line closes it
//!
//! Everything else is ignored. A line whose captured numbers fail to convert
//! is logged and skipped with the scanner state untouched.

use crate::hashing;
use crate::plan::{ActualStats, Operation, Plan};
use regex::{Captures, Regex};
use std::io::BufRead;
use std::num::{ParseFloatError, ParseIntError};
use std::sync::LazyLock;

static DURATION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"LOG:\s+duration:\s+([\d\.]+)\s+ms").unwrap());

static QUERY_TEXT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Query Text:\s*(.*)").unwrap());

static OPERATION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(\w+)\s+\(cost=([\d\.]+)\.\.([\d\.]+)\s+rows=(\d+)\s+width=(\d+)\)",
        r"(?:\s+\(actual time=([\d\.]+)\.\.([\d\.]+)\s+rows=(\d+)\s+loops=(\d+)\))?",
    ))
    .unwrap()
});

/// Knobs for a single scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanOptions {
    /// Fingerprint each query text into `Plan::query_hash`.
    pub hash_queries: bool,
}

/// Single-use scanner state. Feed lines in file order, then call `finish`.
#[derive(Debug)]
pub struct PlanScanner {
    options: ScanOptions,
    current_plan: Option<Plan>,
    expecting_operations: bool,
    results: Vec<Plan>,
    line_number: u64,
    faults: u64,
}

impl PlanScanner {
    pub fn new(options: ScanOptions) -> Self {
        Self {
            options,
            current_plan: None,
            expecting_operations: false,
            results: Vec::new(),
            line_number: 0,
            faults: 0,
        }
    }

    /// Process the next line, logging and skipping it on a conversion fault.
    pub fn feed(&mut self, line: &str) {
        self.line_number += 1;
        if let Err(e) = self.scan_line(line) {
            self.record_fault(line, &e);
        }
    }

    /// Count a line that could not be processed and emit a diagnostic for it.
    pub fn record_fault(&mut self, line: &str, fault: &LineFault) {
        self.faults += 1;
        tracing::warn!(
            line_number = self.line_number,
            line = line.trim(),
            error = %fault,
            "error processing line, skipping"
        );
    }

    /// Process one line. On `Err` no state has been modified.
    pub fn scan_line(&mut self, line: &str) -> Result<(), LineFault> {
        if let Some(caps) = DURATION_PATTERN.captures(line) {
            let duration_ms = parse_float("duration", &caps[1])?;
            if let Some(plan) = self.current_plan.take() {
                self.results.push(plan);
            }
            self.current_plan = Some(Plan::new(duration_ms));
            self.expecting_operations = false;
            return Ok(());
        }

        let Some(plan) = self.current_plan.as_mut() else {
            return Ok(());
        };

        if let Some(caps) = QUERY_TEXT_PATTERN.captures(line) {
            let text = caps[1].to_string();
            if self.options.hash_queries {
                plan.query_hash = Some(hashing::query_hash(&text));
            }
            plan.query_text = Some(text);
            self.expecting_operations = true;
            return Ok(());
        }

        if !self.expecting_operations {
            return Ok(());
        }

        if let Some(caps) = OPERATION_PATTERN.captures(line) {
            plan.operations.push(parse_operation(&caps)?);
        } else if line.trim().is_empty() {
            self.expecting_operations = false;
        }
        Ok(())
    }

    /// Lines fed so far.
    pub fn lines_seen(&self) -> u64 {
        self.line_number
    }

    /// Lines skipped because of a fault.
    pub fn faults(&self) -> u64 {
        self.faults
    }

    /// Finalize any in-progress plan and return all plans in encounter order.
    pub fn finish(mut self) -> Vec<Plan> {
        if let Some(plan) = self.current_plan.take() {
            self.results.push(plan);
        }
        tracing::debug!(
            lines = self.lines_seen(),
            plans = self.results.len(),
            faults = self.faults(),
            "scan finished"
        );
        self.results
    }
}

fn parse_operation(caps: &Captures<'_>) -> Result<Operation, LineFault> {
    let actual = match (caps.get(6), caps.get(7), caps.get(8), caps.get(9)) {
        (Some(start), Some(end), Some(rows), Some(loops)) => Some(ActualStats {
            time_start: parse_float("actual_time_start", start.as_str())?,
            time_end: parse_float("actual_time_end", end.as_str())?,
            rows: parse_int("actual_rows", rows.as_str())?,
            loops: parse_int("loops", loops.as_str())?,
        }),
        _ => None,
    };

    Ok(Operation {
        operation_name: caps[1].to_string(),
        cost_start: parse_float("cost_start", &caps[2])?,
        cost_end: parse_float("cost_end", &caps[3])?,
        estimated_rows: parse_int("rows", &caps[4])?,
        width: parse_int("width", &caps[5])?,
        actual,
    })
}

fn parse_float(field: &'static str, value: &str) -> Result<f64, LineFault> {
    let parsed: f64 = value.parse().map_err(|source| LineFault::InvalidFloat {
        field,
        value: value.to_string(),
        source,
    })?;
    // Overlong digit runs parse to infinity, which JSON cannot carry.
    if !parsed.is_finite() {
        return Err(LineFault::NonFinite {
            field,
            value: value.to_string(),
        });
    }
    Ok(parsed)
}

fn parse_int(field: &'static str, value: &str) -> Result<u64, LineFault> {
    value.parse().map_err(|source| LineFault::InvalidInteger {
        field,
        value: value.to_string(),
        source,
    })
}

/// Scan an in-memory sequence of lines.
pub fn scan_lines<I, S>(lines: I, options: ScanOptions) -> Vec<Plan>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut scanner = PlanScanner::new(options);
    for line in lines {
        scanner.feed(line.as_ref());
    }
    scanner.finish()
}

/// Scan every line of a buffered reader.
///
/// Lines that are not valid UTF-8 are logged and skipped like any other
/// per-line fault. Only a failure of the reader itself is returned.
pub fn scan_reader<R: BufRead>(reader: R, options: ScanOptions) -> std::io::Result<Vec<Plan>> {
    let mut scanner = PlanScanner::new(options);
    for raw in reader.split(b'\n') {
        let mut raw = raw?;
        if raw.last() == Some(&b'\r') {
            raw.pop();
        }
        match String::from_utf8(raw) {
            Ok(line) => scanner.feed(&line),
            Err(e) => {
                scanner.line_number += 1;
                let lossy = String::from_utf8_lossy(e.as_bytes()).into_owned();
                scanner.record_fault(&lossy, &LineFault::Encoding { source: e.utf8_error() });
            }
        }
    }
    Ok(scanner.finish())
}

/// A line that matched a pattern but could not be turned into values.
#[derive(Debug)]
pub enum LineFault {
    InvalidFloat {
        field: &'static str,
        value: String,
        source: ParseFloatError,
    },
    InvalidInteger {
        field: &'static str,
        value: String,
        source: ParseIntError,
    },
    NonFinite {
        field: &'static str,
        value: String,
    },
    Encoding {
        source: std::str::Utf8Error,
    },
}

impl std::fmt::Display for LineFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LineFault::InvalidFloat {
                field,
                value,
                source,
            } => write!(f, "invalid {field} value {value:?}: {source}"),
            LineFault::InvalidInteger {
                field,
                value,
                source,
            } => write!(f, "invalid {field} value {value:?}: {source}"),
            LineFault::NonFinite { field, value } => {
                write!(f, "{field} value {value:?} is out of range for a float")
            }
            LineFault::Encoding { source } => write!(f, "line is not valid UTF-8: {source}"),
        }
    }
}

impl std::error::Error for LineFault {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LineFault::InvalidFloat { source, .. } => Some(source),
            LineFault::InvalidInteger { source, .. } => Some(source),
            LineFault::NonFinite { .. } => None,
            LineFault::Encoding { source } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(lines: &[&str]) -> Vec<Plan> {
        scan_lines(lines.iter().copied(), ScanOptions::default())
    }

    fn scan_hashed(lines: &[&str]) -> Vec<Plan> {
        scan_lines(
            lines.iter().copied(),
            ScanOptions { hash_queries: true },
        )
    }

    #[test]
    fn example_log_produces_two_plans() {
        let plans = scan(&[
            "LOG:  duration: 12.345 ms",
            "Query Text: SELECT 1",
            "Seq Scan on foo  (cost=0.00..1.05 rows=5 width=4) (actual time=0.01..0.02 rows=5 loops=1)",
            "",
            "LOG:  duration: 0.500 ms",
        ]);
        assert_eq!(plans.len(), 2);

        let first = &plans[0];
        assert_eq!(first.duration_ms, 12.345);
        assert_eq!(first.query_text.as_deref(), Some("SELECT 1"));
        assert_eq!(first.query_hash, None);
        assert_eq!(first.operations.len(), 1);
        let op = &first.operations[0];
        assert_eq!(op.cost_start, 0.0);
        assert_eq!(op.cost_end, 1.05);
        assert_eq!(op.estimated_rows, 5);
        assert_eq!(op.width, 4);
        assert_eq!(
            op.actual,
            Some(ActualStats {
                time_start: 0.01,
                time_end: 0.02,
                rows: 5,
                loops: 1,
            })
        );

        let second = &plans[1];
        assert_eq!(second.duration_ms, 0.5);
        assert_eq!(second.query_text, None);
        assert!(second.operations.is_empty());
    }

    #[test]
    fn operation_name_is_word_right_before_cost_group() {
        // The name capture is a single word token: the leftmost word that is
        // directly followed by whitespace and "(cost=". For "Seq Scan on foo"
        // that is the relation name, for "Hash Join" the second word.
        let plans = scan(&[
            "LOG:  duration: 1.0 ms",
            "Query Text: SELECT * FROM foo JOIN bar USING (id)",
            "Hash Join  (cost=1.11..2.22 rows=10 width=8)",
            "  ->  Seq Scan on foo  (cost=0.00..1.05 rows=5 width=4)",
            "  ->  Index Only Scan using bar_pkey on bar  (cost=0.15..0.30 rows=1 width=4)",
            "Sort  (cost=3.00..3.10 rows=2 width=8)",
        ]);
        let names: Vec<&str> = plans[0]
            .operations
            .iter()
            .map(|op| op.operation_name.as_str())
            .collect();
        assert_eq!(names, vec!["Join", "foo", "bar", "Sort"]);
    }

    #[test]
    fn operation_without_actual_stats() {
        let plans = scan(&[
            "LOG:  duration: 3.0 ms",
            "Query Text: SELECT 1",
            "Result  (cost=0.00..0.01 rows=1 width=4)",
        ]);
        let op = &plans[0].operations[0];
        assert_eq!(op.operation_name, "Result");
        assert_eq!(op.actual, None);
        assert_eq!(op.actual_time_start(), None);
        assert_eq!(op.actual_time_end(), None);
        assert_eq!(op.actual_rows(), None);
        assert_eq!(op.loops(), None);
    }

    #[test]
    fn duration_line_with_log_prefix() {
        let plans = scan(&[
            "2024-01-15 10:23:45.123 UTC [12345] LOG:  duration: 250.125 ms  plan:",
            "\tQuery Text: select count(*) from orders",
            "\tAggregate  (cost=10.00..10.01 rows=1 width=8) (actual time=0.100..0.101 rows=1 loops=1)",
        ]);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].duration_ms, 250.125);
        assert_eq!(
            plans[0].query_text.as_deref(),
            Some("select count(*) from orders")
        );
        assert_eq!(plans[0].operations[0].operation_name, "Aggregate");
    }

    #[test]
    fn query_text_keeps_trailing_content_verbatim() {
        let plans = scan(&["LOG:  duration: 1 ms", "Query Text:   SELECT  2  "]);
        assert_eq!(plans[0].query_text.as_deref(), Some("SELECT  2  "));
    }

    #[test]
    fn plan_count_matches_duration_lines() {
        let plans = scan(&[
            "LOG:  duration: 1 ms",
            "LOG:  duration: 2 ms",
            "Query Text: SELECT 2",
            "LOG:  duration: 3 ms",
            "unrelated server message",
            "LOG:  duration: 4 ms",
        ]);
        let durations: Vec<f64> = plans.iter().map(|p| p.duration_ms).collect();
        assert_eq!(durations, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(plans[1].query_text.as_deref(), Some("SELECT 2"));
        assert_eq!(plans[2].query_text, None);
    }

    #[test]
    fn duration_line_finalizes_open_operation_block() {
        let plans = scan(&[
            "LOG:  duration: 1 ms",
            "Query Text: SELECT 1",
            "Result  (cost=0.00..0.01 rows=1 width=4)",
            "LOG:  duration: 2 ms",
            "Result  (cost=0.00..0.01 rows=1 width=4)",
        ]);
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].operations.len(), 1);
        // New plan has not seen its query text, so the block is closed.
        assert!(plans[1].operations.is_empty());
    }

    #[test]
    fn operations_before_query_text_are_not_captured() {
        let plans = scan(&[
            "LOG:  duration: 1 ms",
            "Result  (cost=0.00..0.01 rows=1 width=4)",
            "Query Text: SELECT 1",
            "Result  (cost=0.00..0.02 rows=1 width=4)",
        ]);
        assert_eq!(plans[0].operations.len(), 1);
        assert_eq!(plans[0].operations[0].cost_end, 0.02);
    }

    #[test]
    fn blank_line_closes_operation_block() {
        let plans = scan(&[
            "LOG:  duration: 1 ms",
            "Query Text: SELECT 1",
            "Result  (cost=0.00..0.01 rows=1 width=4)",
            "   \t",
            "Result  (cost=0.00..0.02 rows=1 width=4)",
        ]);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].operations.len(), 1);
        assert_eq!(plans[0].query_text.as_deref(), Some("SELECT 1"));
    }

    #[test]
    fn non_matching_lines_inside_block_are_ignored() {
        let plans = scan(&[
            "LOG:  duration: 1 ms",
            "Query Text: SELECT * FROM t WHERE id = 1",
            "Index Scan using t_pkey on t  (cost=0.29..8.30 rows=1 width=40)",
            "  Index Cond: (id = 1)",
            "  Filter: (flag IS TRUE)",
            "Limit  (cost=0.29..8.30 rows=1 width=40)",
        ]);
        let names: Vec<&str> = plans[0]
            .operations
            .iter()
            .map(|op| op.operation_name.as_str())
            .collect();
        assert_eq!(names, vec!["t", "Limit"]);
    }

    #[test]
    fn lines_before_first_duration_are_ignored() {
        let plans = scan(&[
            "Query Text: SELECT 0",
            "Result  (cost=0.00..0.01 rows=1 width=4)",
            "LOG:  duration: 1 ms",
        ]);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].query_text, None);
        assert!(plans[0].operations.is_empty());
    }

    #[test]
    fn empty_input_yields_no_plans() {
        assert!(scan(&[]).is_empty());
        assert!(scan(&["", "some noise", ""]).is_empty());
    }

    #[test]
    fn unterminated_plan_is_finalized() {
        let plans = scan(&[
            "LOG:  duration: 9.5 ms",
            "Query Text: SELECT 1",
            "Result  (cost=0.00..0.01 rows=1 width=4)",
        ]);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].operations.len(), 1);
    }

    #[test]
    fn malformed_duration_is_skipped_without_state_change() {
        let mut scanner = PlanScanner::new(ScanOptions::default());
        scanner.feed("LOG:  duration: 1 ms");
        scanner.feed("Query Text: SELECT 1");
        scanner.feed("LOG:  duration: 1.2.3 ms");
        // Still inside the first plan's operation block.
        scanner.feed("Result  (cost=0.00..0.01 rows=1 width=4)");
        assert_eq!(scanner.faults(), 1);
        assert_eq!(scanner.lines_seen(), 4);

        let plans = scanner.finish();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].operations.len(), 1);
    }

    #[test]
    fn malformed_operation_is_skipped() {
        let mut scanner = PlanScanner::new(ScanOptions::default());
        scanner.feed("LOG:  duration: 1 ms");
        scanner.feed("Query Text: SELECT 1");
        scanner.feed("Result  (cost=0.0.0..0.01 rows=1 width=4)");
        scanner.feed("Result  (cost=0.00..0.01 rows=99999999999999999999999 width=4)");
        scanner.feed("Result  (cost=0.00..0.01 rows=1 width=4) (actual time=1..2.2.2 rows=1 loops=1)");
        scanner.feed("Result  (cost=0.00..0.01 rows=1 width=4)");
        assert_eq!(scanner.faults(), 3);
        let plans = scanner.finish();
        assert_eq!(plans[0].operations.len(), 1);
    }

    #[test]
    fn scan_line_reports_fault_detail() {
        let mut scanner = PlanScanner::new(ScanOptions::default());
        let err = scanner.scan_line("LOG:  duration: .. ms").unwrap_err();
        assert!(matches!(
            err,
            LineFault::InvalidFloat {
                field: "duration",
                ..
            }
        ));
        assert!(err.to_string().contains("\"..\""));
        assert!(scanner.finish().is_empty());
    }

    #[test]
    fn overlong_duration_is_skipped_and_output_stays_readable() {
        let huge = format!("LOG:  duration: 1{} ms", "0".repeat(400));
        let mut scanner = PlanScanner::new(ScanOptions::default());
        scanner.feed("LOG:  duration: 1 ms");
        scanner.feed("Query Text: SELECT 1");

        let err = scanner.scan_line(&huge).unwrap_err();
        assert!(matches!(
            err,
            LineFault::NonFinite {
                field: "duration",
                ..
            }
        ));
        assert!(err.to_string().contains("out of range"));

        scanner.feed(&huge);
        scanner.feed(&format!(
            "Result  (cost=0.00..9{}.0 rows=1 width=4)",
            "9".repeat(400)
        ));
        scanner.feed("Result  (cost=0.00..0.01 rows=1 width=4)");
        assert_eq!(scanner.faults(), 2);

        let plans = scanner.finish();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].operations.len(), 1);
        assert!(plans[0].duration_ms.is_finite());

        let json = serde_json::to_string(&plans).unwrap();
        let back: Vec<Plan> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, plans);
    }

    #[test]
    fn non_ascii_digits_match_but_are_skipped() {
        // `\d` is Unicode-aware, so Arabic-Indic digits satisfy the pattern,
        // but they are not valid float syntax.
        let mut scanner = PlanScanner::new(ScanOptions::default());
        scanner.feed("LOG:  duration: 1 ms");
        scanner.feed("LOG:  duration: \u{0661}\u{0662} ms");
        assert_eq!(scanner.faults(), 1);

        let plans = scanner.finish();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].duration_ms, 1.0);
    }

    #[test]
    fn hashing_variant_sets_query_hash() {
        let plans = scan_hashed(&[
            "LOG:  duration: 1 ms",
            "Query Text: SELECT * FROM foo",
            "LOG:  duration: 2 ms",
            "Query Text: select *   FROM FOO",
            "LOG:  duration: 3 ms",
            "Query Text: SELECT * FROM bar",
            "LOG:  duration: 4 ms",
        ]);
        let h0 = plans[0].query_hash.as_deref().unwrap();
        let h1 = plans[1].query_hash.as_deref().unwrap();
        let h2 = plans[2].query_hash.as_deref().unwrap();
        assert_eq!(h0, h1);
        assert_ne!(h0, h2);
        assert_eq!(h0, hashing::query_hash("SELECT * FROM foo"));
        assert_eq!(plans[3].query_hash, None);
    }

    #[test]
    fn query_hash_not_set_without_hashing() {
        let plans = scan(&["LOG:  duration: 1 ms", "Query Text: SELECT 1"]);
        assert_eq!(plans[0].query_hash, None);
    }

    #[test]
    fn scan_reader_handles_crlf_and_invalid_utf8() {
        let mut input = Vec::new();
        input.extend_from_slice(b"LOG:  duration: 5 ms\r\n");
        input.extend_from_slice(b"Query Text: SELECT 1\r\n");
        input.extend_from_slice(b"Result  (cost=0.00..0.01 rows=1 width=4)\r\n");
        input.extend_from_slice(b"\xff\xfe garbage\n");
        input.extend_from_slice(b"Result  (cost=0.00..0.02 rows=1 width=4)\n");
        input.extend_from_slice(b"\r\n");
        input.extend_from_slice(b"Result  (cost=0.00..0.03 rows=1 width=4)\n");

        let plans = scan_reader(input.as_slice(), ScanOptions::default()).unwrap();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].query_text.as_deref(), Some("SELECT 1"));
        assert_eq!(plans[0].operations.len(), 2);
    }

    #[test]
    fn actual_fields_present_together() {
        let plans = scan(&[
            "LOG:  duration: 1 ms",
            "Query Text: SELECT 1",
            "Nested Loop  (cost=0.00..5.00 rows=10 width=8) (actual time=0.010..0.500 rows=12 loops=3)",
            "Materialize  (cost=0.00..1.00 rows=1 width=4)",
        ]);
        for op in &plans[0].operations {
            let present = [
                op.actual_time_start().is_some(),
                op.actual_time_end().is_some(),
                op.actual_rows().is_some(),
                op.loops().is_some(),
            ];
            assert!(present.iter().all(|p| *p) || present.iter().all(|p| !*p));
        }
        assert_eq!(plans[0].operations[0].loops(), Some(3));
        assert_eq!(plans[0].operations[0].actual_rows(), Some(12));
    }
}
