use siteqa_core::types::{RankedCandidate, Verdict};

/// Keep the longest prefix of `ranked` scoring at least `threshold`.
///
/// `ranked` must already be in rank order, so the prefix is exactly the set of
/// candidates at or above the threshold.
pub fn accept(mut ranked: Vec<RankedCandidate>, threshold: f32) -> (Vec<RankedCandidate>, Verdict) {
    let keep = ranked.iter().take_while(|rc| rc.rerank_score >= threshold).count();
    ranked.truncate(keep);
    let verdict = if ranked.is_empty() { Verdict::InsufficientContext } else { Verdict::Ok };
    (ranked, verdict)
}
