use serde::Serialize;

/// Similarity scores for a (prediction, reference) pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricReport {
    pub edit_distance: usize,
    pub cer: f64,
    pub exact_match: bool,
}

/// Levenshtein distance over Unicode code points.
pub fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];

    for (i, &ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            current[j + 1] = if ca == cb {
                previous[j]
            } else {
                1 + previous[j].min(previous[j + 1]).min(current[j])
            };
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b.len()]
}

/// Character error rate: edit distance normalized by the reference length.
///
/// An empty reference scores 0.0 against an empty prediction and 1.0 against
/// anything else. Values above 1.0 are possible for over-long predictions
/// and are reported as-is.
pub fn cer(prediction: &str, reference: &str) -> f64 {
    let reference_len = reference.chars().count();
    if reference_len == 0 {
        return if prediction.is_empty() { 0.0 } else { 1.0 };
    }

    edit_distance(prediction, reference) as f64 / reference_len as f64
}

/// All metrics for a prediction against its ground truth. `exact_match` is
/// plain code-point equality, with no normalization or trimming.
pub fn score(prediction: &str, reference: &str) -> MetricReport {
    MetricReport {
        edit_distance: edit_distance(prediction, reference),
        cer: cer(prediction, reference),
        exact_match: prediction == reference,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CORPUS: &[&str] = &["", "x", "x^2+1", "\\frac{a}{b}", "kitten", "sitting", "π²+1"];

    #[test]
    fn distance_to_self_is_zero() {
        for s in CORPUS {
            assert_eq!(edit_distance(s, s), 0, "{s:?}");
        }
    }

    #[test]
    fn distance_is_symmetric() {
        for a in CORPUS {
            for b in CORPUS {
                assert_eq!(edit_distance(a, b), edit_distance(b, a), "{a:?} {b:?}");
            }
        }
    }

    #[test]
    fn triangle_inequality_holds() {
        for a in CORPUS {
            for b in CORPUS {
                for c in CORPUS {
                    assert!(
                        edit_distance(a, c) <= edit_distance(a, b) + edit_distance(b, c),
                        "{a:?} {b:?} {c:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn known_distances() {
        assert_eq!(edit_distance("", "abc"), 3);
        assert_eq!(edit_distance("kitten", "sitting"), 3);
        assert_eq!(edit_distance("x^2+1", "x^2+2"), 1);
    }

    #[test]
    fn distance_counts_code_points_not_bytes() {
        // Each of these is several bytes but a single code point.
        assert_eq!(edit_distance("π", "σ"), 1);
        assert_eq!(edit_distance("", "π²"), 2);
    }

    #[test]
    fn cer_edge_cases() {
        assert_eq!(cer("", ""), 0.0);
        assert_eq!(cer("x", ""), 1.0);
        assert_eq!(cer("abc", "abc"), 0.0);
    }

    #[test]
    fn cer_is_not_clamped() {
        // Prediction far longer than the reference pushes CER past 1.
        assert!(cer("aaaaaaaaaa", "b") > 1.0);
    }

    #[test]
    fn score_of_identical_strings() {
        let report = score("x^2+1", "x^2+1");
        assert_eq!(report.edit_distance, 0);
        assert_eq!(report.cer, 0.0);
        assert!(report.exact_match);
    }

    #[test]
    fn exact_match_does_not_trim() {
        let report = score("x^2+1 ", "x^2+1");
        assert!(!report.exact_match);
        assert_eq!(report.edit_distance, 1);
    }
}
