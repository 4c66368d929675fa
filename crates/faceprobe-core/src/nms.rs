//! Greedy single-class non-maximum suppression.

use crate::types::BoundingBox;

/// IoU above which a lower-scored candidate is treated as a duplicate.
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.5;

/// A scored detector output before suppression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub bbox: BoundingBox,
    pub score: f32,
}

/// Return the indices of candidates that survive suppression, highest score first.
///
/// Repeatedly keeps the best remaining candidate and drops every other
/// remaining candidate whose IoU with it exceeds `iou_threshold`. Candidates
/// with equal scores keep their input order.
pub fn suppress(candidates: &[Candidate], iou_threshold: f32) -> Vec<usize> {
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|&a, &b| {
        candidates[b]
            .score
            .partial_cmp(&candidates[a].score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    while let Some((&best, rest)) = order.split_first() {
        keep.push(best);
        let best_box = &candidates[best].bbox;
        order = rest
            .iter()
            .copied()
            .filter(|&k| best_box.iou(&candidates[k].bbox) <= iou_threshold)
            .collect();
    }

    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_candidate(left: f32, top: f32, size: f32, score: f32) -> Candidate {
        Candidate {
            bbox: BoundingBox::new(left, left + size, top, top + size),
            score,
        }
    }

    #[test]
    fn test_suppress_overlapping() {
        let candidates = vec![
            make_candidate(0.0, 0.0, 100.0, 0.8),
            make_candidate(5.0, 5.0, 100.0, 0.9),
            make_candidate(200.0, 200.0, 50.0, 0.7),
        ];
        assert_eq!(suppress(&candidates, 0.5), vec![1, 2]);
    }

    #[test]
    fn test_identical_boxes_keep_exactly_one() {
        let a = make_candidate(10.0, 10.0, 40.0, 0.6);
        let b = make_candidate(300.0, 300.0, 20.0, 0.95);
        assert_eq!(suppress(&[a, a], 0.5), vec![0]);
        assert_eq!(suppress(&[a, b, a], 0.5), vec![1, 0]);
        assert_eq!(suppress(&[b, a, a], 0.5), vec![0, 1]);
    }

    #[test]
    fn test_low_overlap_never_suppressed() {
        // IoU of these neighbours is ~0.33, under the threshold.
        let candidates = vec![
            make_candidate(0.0, 0.0, 10.0, 0.9),
            make_candidate(5.0, 0.0, 10.0, 0.8),
            make_candidate(100.0, 100.0, 10.0, 0.7),
        ];
        assert_eq!(suppress(&candidates, 0.5), vec![0, 1, 2]);
    }

    #[test]
    fn test_single_candidate_is_kept() {
        let candidates = vec![make_candidate(0.0, 0.0, 10.0, 0.9)];
        assert_eq!(suppress(&candidates, 0.5), vec![0]);
    }

    #[test]
    fn test_last_survivor_is_kept() {
        let candidates = vec![
            make_candidate(0.0, 0.0, 10.0, 0.9),
            make_candidate(1.0, 1.0, 10.0, 0.8),
            make_candidate(50.0, 50.0, 10.0, 0.1),
        ];
        assert_eq!(suppress(&candidates, 0.5), vec![0, 2]);
    }

    #[test]
    fn test_suppress_empty() {
        assert!(suppress(&[], 0.5).is_empty());
    }
}
