use crate::{SagaInstance, SagaStatus};

/// Builder for filtering stored sagas.
#[derive(Debug, Clone, Default)]
pub struct SagaQuery {
    /// Filter by status (any of these).
    pub statuses: Option<Vec<SagaStatus>>,

    /// Filter by the flow the saga is currently on.
    pub flow_name: Option<String>,

    /// Maximum number of sagas to return.
    pub limit: Option<usize>,

    /// Number of sagas to skip.
    pub offset: Option<usize>,
}

impl SagaQuery {
    /// Creates a new empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query for sagas in a specific status.
    pub fn for_status(status: SagaStatus) -> Self {
        Self {
            statuses: Some(vec![status]),
            ..Default::default()
        }
    }

    /// Creates a query for sagas that can still receive events.
    pub fn active() -> Self {
        Self {
            statuses: Some(SagaStatus::ACTIVE.to_vec()),
            ..Default::default()
        }
    }

    /// Filters by multiple statuses (any of these).
    pub fn statuses(mut self, statuses: Vec<SagaStatus>) -> Self {
        self.statuses = Some(statuses);
        self
    }

    /// Filters by flow name.
    pub fn flow_name(mut self, flow_name: impl Into<String>) -> Self {
        self.flow_name = Some(flow_name.into());
        self
    }

    /// Limits the number of results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skips a number of results.
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Returns true if `saga` passes the status and flow filters.
    pub fn matches(&self, saga: &SagaInstance) -> bool {
        if let Some(ref statuses) = self.statuses
            && !statuses.contains(&saga.status())
        {
            return false;
        }
        if let Some(ref flow_name) = self.flow_name
            && saga.flow_name() != flow_name
        {
            return false;
        }
        true
    }

    pub(crate) fn status_names(&self) -> Option<Vec<String>> {
        self.statuses
            .as_ref()
            .map(|s| s.iter().map(|status| status.as_str().to_string()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Data, SagaId};

    #[test]
    fn active_query_excludes_terminal_sagas() {
        let query = SagaQuery::active();
        let mut saga = SagaInstance::new(SagaId::new(), "order-processing", Data::new());
        assert!(query.matches(&saga));

        saga.begin_rollback();
        assert!(query.matches(&saga));

        saga.finish_rollback();
        assert!(!query.matches(&saga));
    }

    #[test]
    fn flow_filter() {
        let saga = SagaInstance::new(SagaId::new(), "order-processing", Data::new());
        assert!(SagaQuery::new().flow_name("order-processing").matches(&saga));
        assert!(!SagaQuery::new().flow_name("refunds").matches(&saga));
    }
}
