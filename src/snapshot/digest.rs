//! Canonical dataset digests
//!
//! Wire-compatible canonicalization: each row is a tuple of column
//! strings joined by commas without surrounding whitespace, rows are
//! sorted lexicographically over the full tuple and joined by `\n`, and
//! dates render as ISO-8601. The SHA-256 of that text is the dataset
//! digest, so identical row sets produce identical digests regardless of
//! insertion order.

use sha2::{Digest, Sha256};

use crate::types::GeographyRow;

/// Canonicalize a row set: sort the tuples, join columns with commas and
/// rows with newlines.
pub fn canonicalize_rows(mut rows: Vec<Vec<String>>) -> String {
    rows.sort();
    rows.iter()
        .map(|tuple| tuple.join(","))
        .collect::<Vec<_>>()
        .join("\n")
}

/// SHA-256 hex digest of the canonical serialization of a row set.
pub fn compute_digest(rows: Vec<Vec<String>>) -> String {
    let canonical = canonicalize_rows(rows);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Column tuple for a geography row, in fixed column order.
pub fn geography_row_tuple(row: &GeographyRow) -> Vec<String> {
    vec![
        row.zip5.clone(),
        row.plus4.clone().unwrap_or_default(),
        if row.has_plus4 { "1" } else { "0" }.to_string(),
        row.state.clone(),
        row.locality_id.clone(),
        row.rural_flag.map(|f| f.as_str().to_string()).unwrap_or_default(),
        row.effective_from.to_string(),
        row.effective_to.map(|d| d.to_string()).unwrap_or_default(),
        row.dataset_digest.clone(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows() -> Vec<Vec<String>> {
        vec![
            vec!["94110".to_string(), "CA".to_string(), "05".to_string()],
            vec!["01434".to_string(), "MA".to_string(), "01".to_string()],
            vec!["10001".to_string(), "NY".to_string(), "02".to_string()],
        ]
    }

    #[test]
    fn test_digest_is_order_independent() {
        let forward = compute_digest(rows());
        let mut reversed = rows();
        reversed.reverse();
        assert_eq!(forward, compute_digest(reversed));
    }

    #[test]
    fn test_digest_changes_with_content() {
        let base = compute_digest(rows());
        let mut changed = rows();
        changed[0][2] = "99".to_string();
        assert_ne!(base, compute_digest(changed));
    }

    #[test]
    fn test_canonical_format() {
        let canonical = canonicalize_rows(vec![
            vec!["b".to_string(), "2".to_string()],
            vec!["a".to_string(), "1".to_string()],
        ]);
        assert_eq!(canonical, "a,1\nb,2");
    }

    #[test]
    fn test_known_digest_is_stable() {
        // Locks the canonical serialization; a change here is a wire break
        let digest = compute_digest(vec![vec!["a".to_string(), "1".to_string()]]);
        assert_eq!(
            digest,
            {
                let mut hasher = Sha256::new();
                hasher.update(b"a,1");
                format!("{:x}", hasher.finalize())
            }
        );
    }
}
