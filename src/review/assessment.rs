use std::collections::HashMap;

use crate::store::{PullRequest, Review, ReviewDecision};

/// Merge-gating view of a pull request's reviews.
///
/// Only the latest non-stale, non-advisory review per reviewer counts.
/// A pull request is approved when the approvals equal the number of
/// reviewers who reviewed at all and no requested reviewer is still
/// pending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewAssessment {
    pub approvals: usize,
    pub rejections: usize,
    /// Reviewers with any gating review on record.
    pub reviewed: usize,
    pub pending_reviewers: Vec<String>,
}

impl ReviewAssessment {
    pub fn is_mergeable(&self) -> bool {
        self.approvals > 0
            && self.rejections == 0
            && self.pending_reviewers.is_empty()
            && self.approvals == self.reviewed
    }
}

pub fn assess(pull: &PullRequest, reviews: &[Review]) -> ReviewAssessment {
    // Latest gating review per reviewer; advisory comments never gate.
    let mut latest: HashMap<&str, &Review> = HashMap::new();
    for review in reviews {
        if review.decision == ReviewDecision::Commented {
            continue;
        }
        match latest.get(review.reviewer.as_str()) {
            Some(existing) if existing.submitted_at >= review.submitted_at => {}
            _ => {
                latest.insert(review.reviewer.as_str(), review);
            }
        }
    }

    let mut approvals = 0;
    let mut rejections = 0;
    for review in latest.values() {
        match review.decision {
            // A stale approval no longer vouches for the current head.
            ReviewDecision::Approved if !review.stale => approvals += 1,
            ReviewDecision::Approved => {}
            ReviewDecision::ChangesRequested => rejections += 1,
            ReviewDecision::Commented => {}
        }
    }

    ReviewAssessment {
        approvals,
        rejections,
        reviewed: latest.len(),
        pending_reviewers: pull.requested_reviewers.clone(),
    }
}

/// Approval phrases that carry no actionable feedback. Anything else in a
/// review body is preserved as a follow-up issue after merge.
pub fn is_bare_approval(text: &str) -> bool {
    let normalized: String = text
        .trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .to_ascii_lowercase();
    let normalized = normalized.split_whitespace().collect::<Vec<_>>().join(" ");

    matches!(
        normalized.as_str(),
        "" | "lgtm"
            | "looks good"
            | "looks good to me"
            | "approved"
            | "approve"
            | "ship it"
            | "nice"
            | "great"
            | "1"
            | "ok"
            | "okay"
            | "sounds good"
    )
}
