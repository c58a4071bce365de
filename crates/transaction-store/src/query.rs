use chrono::{DateTime, Utc};

use crate::WorkflowId;

/// Builder for filtering stored transaction checkpoints.
///
/// Used by background sweeps (timeouts of waiting steps, retention purges)
/// and by operators listing in-flight transactions.
#[derive(Debug, Clone, Default)]
pub struct TransactionQuery {
    /// Filter by workflow ID.
    pub workflow_id: Option<WorkflowId>,

    /// Filter by flow state names (any of these states).
    pub flow_states: Option<Vec<String>>,

    /// Only checkpoints whose `next_deadline` is at or before this time.
    pub deadline_before: Option<DateTime<Utc>>,

    /// Only checkpoints whose `expires_at` is at or before this time.
    pub expired_before: Option<DateTime<Utc>>,

    /// Maximum number of checkpoints to return.
    pub limit: Option<usize>,

    /// Number of checkpoints to skip.
    pub offset: Option<usize>,
}

impl TransactionQuery {
    /// Creates a new empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query for all transactions of a workflow.
    pub fn for_workflow(workflow_id: impl Into<WorkflowId>) -> Self {
        Self {
            workflow_id: Some(workflow_id.into()),
            ..Default::default()
        }
    }

    /// Filters by workflow ID.
    pub fn workflow_id(mut self, workflow_id: impl Into<WorkflowId>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    /// Filters by flow states.
    pub fn flow_states<I, S>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.flow_states = Some(states.into_iter().map(Into::into).collect());
        self
    }

    /// Filters to checkpoints with a deadline or due retry at or before `at`.
    pub fn deadline_before(mut self, at: DateTime<Utc>) -> Self {
        self.deadline_before = Some(at);
        self
    }

    /// Filters to checkpoints whose retention expired at or before `at`.
    pub fn expired_before(mut self, at: DateTime<Utc>) -> Self {
        self.expired_before = Some(at);
        self
    }

    /// Limits the number of results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skips the first `offset` results.
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Returns true if the checkpoint matches every filter set on this query.
    ///
    /// Pagination (`limit`/`offset`) is not considered here.
    pub fn matches(&self, checkpoint: &crate::TransactionCheckpoint) -> bool {
        if let Some(ref id) = self.workflow_id
            && &checkpoint.workflow_id != id
        {
            return false;
        }
        if let Some(ref states) = self.flow_states
            && !states.contains(&checkpoint.flow_state)
        {
            return false;
        }
        if let Some(at) = self.deadline_before {
            match checkpoint.next_deadline {
                Some(deadline) if deadline <= at => {}
                _ => return false,
            }
        }
        if let Some(at) = self.expired_before {
            match checkpoint.expires_at {
                Some(expires_at) if expires_at <= at => {}
                _ => return false,
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{TransactionCheckpoint, Version};

    fn checkpoint(flow_state: &str) -> TransactionCheckpoint {
        TransactionCheckpoint::builder()
            .workflow_id("wf")
            .transaction_id("tx")
            .version(Version::first())
            .flow_state(flow_state)
            .state_raw(serde_json::json!({}))
            .build()
    }

    #[test]
    fn empty_query_matches_everything() {
        assert!(TransactionQuery::new().matches(&checkpoint("Invoking")));
    }

    #[test]
    fn flow_state_filter() {
        let query = TransactionQuery::new().flow_states(["Invoking", "Compensating"]);
        assert!(query.matches(&checkpoint("Invoking")));
        assert!(!query.matches(&checkpoint("Done")));
    }

    #[test]
    fn deadline_filter_requires_a_deadline() {
        let now = Utc::now();
        let query = TransactionQuery::new().deadline_before(now);

        let mut cp = checkpoint("Invoking");
        assert!(!query.matches(&cp));

        cp.next_deadline = Some(now - chrono::Duration::seconds(5));
        assert!(query.matches(&cp));

        cp.next_deadline = Some(now + chrono::Duration::seconds(5));
        assert!(!query.matches(&cp));
    }

    #[test]
    fn workflow_filter() {
        let query = TransactionQuery::for_workflow("other");
        assert!(!query.matches(&checkpoint("Done")));
    }
}
