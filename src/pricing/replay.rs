//! Replay diffing
//!
//! A replay re-executes a stored run's request and compares the fresh
//! response to the stored one, field by field. Volatile fields (run ids,
//! timestamps, latencies) are excluded; every other number, string, and
//! boolean must match exactly. A passing replay is the definition of
//! deterministic pricing.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fields expected to differ between a run and its replay.
const VOLATILE_KEYS: &[&str] = &[
    "run_id",
    "started_at",
    "duration_ms",
    "latency_ms",
    "resolved_at",
];

/// One field that differed between the original response and the replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayDiff {
    /// JSON pointer-style path, e.g. `/line_items/0/allowed_cents`
    pub path: String,
    pub original: serde_json::Value,
    pub replayed: serde_json::Value,
}

/// Outcome of replaying a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayReport {
    pub run_id: Uuid,
    pub endpoint: String,
    pub equal: bool,
    pub diffs: Vec<ReplayDiff>,

    /// Dataset digests the original run observed
    pub datasets_used: Vec<String>,
}

pub(super) fn build_report(
    run_id: Uuid,
    endpoint: &str,
    original: &serde_json::Value,
    replayed: &serde_json::Value,
    datasets_used: Vec<String>,
) -> ReplayReport {
    let mut diffs = Vec::new();
    diff_values("", original, replayed, &mut diffs);
    ReplayReport {
        run_id,
        endpoint: endpoint.to_string(),
        equal: diffs.is_empty(),
        diffs,
        datasets_used,
    }
}

fn diff_values(
    path: &str,
    original: &serde_json::Value,
    replayed: &serde_json::Value,
    diffs: &mut Vec<ReplayDiff>,
) {
    use serde_json::Value;

    match (original, replayed) {
        (Value::Object(a), Value::Object(b)) => {
            let keys: std::collections::BTreeSet<&String> = a.keys().chain(b.keys()).collect();
            for key in keys {
                if VOLATILE_KEYS.contains(&key.as_str()) {
                    continue;
                }
                let child = format!("{}/{}", path, key);
                match (a.get(key), b.get(key)) {
                    (Some(av), Some(bv)) => diff_values(&child, av, bv, diffs),
                    (av, bv) => diffs.push(ReplayDiff {
                        path: child,
                        original: av.cloned().unwrap_or(Value::Null),
                        replayed: bv.cloned().unwrap_or(Value::Null),
                    }),
                }
            }
        }
        (Value::Array(a), Value::Array(b)) => {
            if a.len() != b.len() {
                diffs.push(ReplayDiff {
                    path: format!("{}/length", path),
                    original: Value::from(a.len()),
                    replayed: Value::from(b.len()),
                });
                return;
            }
            for (idx, (av, bv)) in a.iter().zip(b.iter()).enumerate() {
                diff_values(&format!("{}/{}", path, idx), av, bv, diffs);
            }
        }
        (a, b) => {
            if a != b {
                diffs.push(ReplayDiff {
                    path: path.to_string(),
                    original: a.clone(),
                    replayed: b.clone(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identical_values_produce_no_diffs() {
        let value = json!({"totals": {"allowed_cents": 8859}, "line_items": [{"code": "99213"}]});
        let report = build_report(Uuid::new_v4(), "/pricing/price", &value, &value, vec![]);
        assert!(report.equal);
        assert!(report.diffs.is_empty());
    }

    #[test]
    fn test_numeric_difference_is_reported_with_path() {
        let a = json!({"line_items": [{"allowed_cents": 8859}]});
        let b = json!({"line_items": [{"allowed_cents": 8860}]});
        let report = build_report(Uuid::new_v4(), "/pricing/price", &a, &b, vec![]);
        assert!(!report.equal);
        assert_eq!(report.diffs.len(), 1);
        assert_eq!(report.diffs[0].path, "/line_items/0/allowed_cents");
    }

    #[test]
    fn test_volatile_keys_are_ignored() {
        let a = json!({"run_id": "one", "duration_ms": 5, "totals": 1});
        let b = json!({"run_id": "two", "duration_ms": 9, "totals": 1});
        let report = build_report(Uuid::new_v4(), "/pricing/price", &a, &b, vec![]);
        assert!(report.equal);
    }

    #[test]
    fn test_array_length_mismatch() {
        let a = json!({"line_items": [1, 2]});
        let b = json!({"line_items": [1]});
        let report = build_report(Uuid::new_v4(), "/pricing/price", &a, &b, vec![]);
        assert_eq!(report.diffs[0].path, "/line_items/length");
    }

    #[test]
    fn test_missing_key_is_a_diff() {
        let a = json!({"warnings": []});
        let b = json!({});
        let report = build_report(Uuid::new_v4(), "/pricing/price", &a, &b, vec![]);
        assert!(!report.equal);
    }
}
