//! Login-confirmation ticket state machine (spec.md §4.3). One instance
//! per gated connection; grounded in this codebase's `auth_state_store`
//! for the timeout/cleanup idiom, though the actual wait here is a fresh
//! 5-second poll against the Catalog rather than a broadcast channel — the
//! specification calls for the reviewer to act through the Catalog, which
//! this process does not otherwise observe.

use std::time::Duration;

use bastion_common::model::{LoginTicket, TicketState};
use tracing::{info, warn};
use uuid::Uuid;

use crate::catalog::Catalog;

const POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub enum WaitOutcome {
    Approve { approver: String },
    Reject { approver: String },
    Cancel,
}

pub struct TicketMachine<'a> {
    catalog: &'a dyn Catalog,
}

impl<'a> TicketMachine<'a> {
    pub fn new(catalog: &'a dyn Catalog) -> Self {
        Self { catalog }
    }

    /// Consults `NeedsLoginConfirm`; if required, creates a fresh `pending`
    /// ticket and returns its id and the reviewer list.
    pub async fn check_is_needed(
        &self,
        user_id: Uuid,
        asset_id: Uuid,
        username: &str,
        asset_name: &str,
        sys_username: &str,
    ) -> anyhow::Result<Option<(Uuid, Vec<String>)>> {
        if !self.catalog.needs_login_confirm(user_id, asset_id).await? {
            return Ok(None);
        }

        let ticket = LoginTicket::new(username.to_string(), asset_name.to_string(), sys_username.to_string());
        let ticket_id = ticket.ticket_id;
        self.catalog.create_ticket(ticket).await?;
        let reviewers = self.catalog.get_reviewers().await?;
        Ok(Some((ticket_id, reviewers)))
    }

    /// Polls every 5s until the ticket resolves, or returns `Cancel` (and
    /// closes the ticket) when `cancel` fires first.
    pub async fn wait(
        &self,
        ticket_id: Uuid,
        cancel: impl std::future::Future<Output = ()>,
    ) -> WaitOutcome {
        tokio::pin!(cancel);
        let mut interval = tokio::time::interval(POLL_INTERVAL);
        interval.tick().await; // first tick fires immediately

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.catalog.get_ticket_state(ticket_id).await {
                        Ok((TicketState::Approved, approver)) => return WaitOutcome::Approve { approver },
                        Ok((TicketState::Rejected, approver)) | Ok((TicketState::Closed, approver)) => {
                            return WaitOutcome::Reject { approver };
                        }
                        Ok((TicketState::Pending, _)) => continue,
                        Err(err) => {
                            warn!(%err, "ticket poll failed, retrying");
                        }
                    }
                }
                _ = &mut cancel => {
                    if let Err(err) = self
                        .catalog
                        .update_ticket_state(ticket_id, TicketState::Closed, "")
                        .await
                    {
                        info!(%err, "ticket already resolved by the time cancel was observed");
                    }
                    return WaitOutcome::Cancel;
                }
            }
        }
    }
}
