//! Local/cloud routing policy.
//!
//! Local inference always runs first. Whether a window escalates to the
//! cloud tier is a pure function of the local outcome, the threshold and
//! the consent flag sampled just before dispatch.

pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.35;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    /// Local output is confident enough.
    AcceptLocal,
    /// Escalate to the cloud collaborator.
    EscalateCloud,
    /// Escalation wanted but the case has no cloud consent. Local output
    /// is used and the finding is flagged `reduced_confidence`.
    ConsentRequired,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoutingPolicy {
    pub confidence_threshold: f64,
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }
}

impl RoutingPolicy {
    /// `local_confidence` is `None` when local inference was unavailable.
    pub fn decide(&self, local_confidence: Option<f64>, cloud_consent: bool) -> RouteDecision {
        let wants_cloud = match local_confidence {
            Some(c) => c < self.confidence_threshold,
            None => true,
        };
        match (wants_cloud, cloud_consent) {
            (false, _) => RouteDecision::AcceptLocal,
            (true, true) => RouteDecision::EscalateCloud,
            (true, false) => RouteDecision::ConsentRequired,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confident_local_output_is_accepted() {
        let p = RoutingPolicy::default();
        assert_eq!(p.decide(Some(0.9), false), RouteDecision::AcceptLocal);
        assert_eq!(p.decide(Some(0.35), true), RouteDecision::AcceptLocal);
    }

    #[test]
    fn low_confidence_escalates_only_with_consent() {
        let p = RoutingPolicy::default();
        assert_eq!(p.decide(Some(0.2), true), RouteDecision::EscalateCloud);
        assert_eq!(p.decide(Some(0.2), false), RouteDecision::ConsentRequired);
    }

    #[test]
    fn unavailable_local_is_treated_as_low_confidence() {
        let p = RoutingPolicy {
            confidence_threshold: 0.5,
        };
        assert_eq!(p.decide(None, true), RouteDecision::EscalateCloud);
        assert_eq!(p.decide(None, false), RouteDecision::ConsentRequired);
    }
}
