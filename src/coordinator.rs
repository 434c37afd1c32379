//! Background driver: a poll loop that re-evaluates every active ticket
//! and nudges it forward.
//!
//! Progress is driven two ways — this loop, and inbound completion
//! calls (todo resolution) that advance tickets directly. Either path
//! alone keeps tickets moving; together they bound the latency.

use std::sync::Arc;

use anyhow::Result;
use rand::Rng;
use tokio::sync::watch;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use crate::manager::TicketFlowManager;
use crate::services::Services;
use crate::store::TicketStore;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub poll_interval_secs: u64,
    /// Random extra delay per tick so restarted fleets do not align
    pub jitter_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            jitter_ms: 500,
        }
    }
}

pub struct FlowCoordinator {
    services: Services,
    manager: Arc<TicketFlowManager>,
    config: CoordinatorConfig,
    shutdown_tx: watch::Sender<bool>,
}

impl FlowCoordinator {
    pub fn new(services: Services, config: CoordinatorConfig) -> Self {
        let manager = Arc::new(TicketFlowManager::new(services.clone()));
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            services,
            manager,
            config,
            shutdown_tx,
        }
    }

    pub fn manager(&self) -> Arc<TicketFlowManager> {
        Arc::clone(&self.manager)
    }

    /// Ask the run loop to stop after the current tick.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// One evaluation pass over every active ticket. A stuck ticket
    /// only costs its own slot: errors are logged and the pass moves on.
    pub async fn tick(&self) {
        let tickets = match self.services.store.active_tickets().await {
            Ok(tickets) => tickets,
            Err(err) => {
                warn!(error = %err, "could not list active tickets");
                return;
            }
        };
        debug!(count = tickets.len(), "coordinator tick");

        for ticket in tickets {
            if let Err(err) = self.manager.update_ticket_status(ticket.id).await {
                warn!(ticket_id = %ticket.id, error = %err, "status update failed");
                continue;
            }
            if let Err(err) = self.manager.run_next_flow(ticket.id).await {
                warn!(ticket_id = %ticket.id, error = %err, "flow advance failed");
            }
        }
    }

    /// Poll until shutdown.
    pub async fn run(&self) -> Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        info!(
            poll_interval_secs = self.config.poll_interval_secs,
            "flow coordinator started"
        );

        loop {
            let jitter = if self.config.jitter_ms > 0 {
                rand::rng().random_range(0..self.config.jitter_ms)
            } else {
                0
            };
            let delay = Duration::from_secs(self.config.poll_interval_secs)
                + Duration::from_millis(jitter);

            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = sleep(delay) => {
                    self.tick().await;
                }
            }
        }

        info!("flow coordinator stopped");
        Ok(())
    }
}
