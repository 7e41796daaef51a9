use crate::domain::process::{ProcessType, TransferProcessState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
    #[default]
    StateTimestamp,
    CreatedAt,
    Id,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// Filter, ordering and pagination for `find_all`.
///
/// An empty `states` list matches every state. Results are ordered by
/// `sort_field` with the process id as tiebreaker so that pages are stable.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QuerySpec {
    pub states: Vec<TransferProcessState>,
    pub process_type: Option<ProcessType>,
    pub correlation_id: Option<String>,
    pub sort_field: SortField,
    pub sort_order: SortOrder,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl QuerySpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(mut self, state: TransferProcessState) -> Self {
        self.states.push(state);
        self
    }

    pub fn with_process_type(mut self, process_type: ProcessType) -> Self {
        self.process_type = Some(process_type);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn sorted_by(mut self, field: SortField, order: SortOrder) -> Self {
        self.sort_field = field;
        self.sort_order = order;
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}
