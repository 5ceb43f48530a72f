//! Recognition decision engine.
//!
//! Pure functions over matcher output: no camera, no model, no clock.

use crate::types::{MatchCandidate, MatcherError, RecognitionResult};
use std::cmp::Ordering;

/// Decide what a frame's candidate list means under `threshold`.
///
/// The closest candidate is selected explicitly rather than trusting the
/// matcher's ordering. Equal distances fall back to the smaller identity so
/// the result never depends on input order. Recognition requires a strict
/// `distance < threshold`.
pub fn decide(candidates: &[MatchCandidate], threshold: f32) -> RecognitionResult {
    if candidates.is_empty() {
        return RecognitionResult::NoFace;
    }

    let best = candidates
        .iter()
        .filter(|c| !c.distance.is_nan())
        .min_by(|a, b| compare(a, b));

    match best {
        Some(best) if best.distance < threshold => {
            tracing::trace!(identity = %best.identity, distance = best.distance, "candidate accepted");
            RecognitionResult::Recognized(best.identity.clone())
        }
        Some(best) => {
            tracing::trace!(identity = %best.identity, distance = best.distance, threshold, "candidate rejected");
            RecognitionResult::Unknown
        }
        // A face was reported but none of the scores are usable.
        None => RecognitionResult::Unknown,
    }
}

/// Like [`decide`], but folds a failed matcher call into
/// [`RecognitionResult::MatcherError`] instead of a non-match.
pub fn recognize(
    outcome: Result<Vec<MatchCandidate>, MatcherError>,
    threshold: f32,
) -> RecognitionResult {
    match outcome {
        Ok(candidates) => decide(&candidates, threshold),
        Err(e) => RecognitionResult::MatcherError(e),
    }
}

fn compare(a: &MatchCandidate, b: &MatchCandidate) -> Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then_with(|| a.identity.cmp(&b.identity))
}
