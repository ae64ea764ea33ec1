use async_trait::async_trait;

use crate::domain::ticket::{Ticket, TicketChanges, TicketNumber};
use crate::error::AppResult;

#[async_trait]
pub trait IssueTrackerService: Send + Sync {
    async fn get_ticket(&self, number: TicketNumber) -> AppResult<Ticket>;

    /// The ticket whose "Branch:" field is exactly `branch`, if any.
    async fn find_ticket_by_branch(&self, branch: &str) -> AppResult<Option<TicketNumber>>;

    /// Fails with `ConcurrentModification` when `expected_timestamp` is stale.
    async fn update_ticket(
        &self,
        number: TicketNumber,
        expected_timestamp: &str,
        changes: TicketChanges,
    ) -> AppResult<()>;

    async fn create_ticket(&self, summary: &str, description: &str) -> AppResult<TicketNumber>;

    async fn query_tickets(&self, query: &str) -> AppResult<Vec<TicketNumber>>;
}
