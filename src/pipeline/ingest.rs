//! Update ingestion.
//!
//! The ingestor owns the cursor. A poll that succeeds persists the next
//! cursor *before* its events are handed out, so a crash can at worst replay
//! a batch. Replays are absorbed by [`ProcessedEventSet`]. A poll that fails
//! leaves the cursor untouched.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::models::{Cursor, InboundEvent, IngestConfig};
use crate::services::ChatTransport;
use crate::storage::CursorStore;

/// Event identifiers already handled during this process lifetime.
#[derive(Debug, Default)]
pub struct ProcessedEventSet {
    seen: HashSet<String>,
}

impl ProcessedEventSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `id`; returns `false` when it had been recorded before.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        self.seen.insert(id.to_string())
    }

}

/// Pulls batches of events from the chat transport.
pub struct UpdateIngestor {
    transport: Arc<dyn ChatTransport>,
    store: Arc<dyn CursorStore>,
    cursor: Option<Cursor>,
    poll_timeout: Duration,
    cold_start_grace: Duration,
}

impl UpdateIngestor {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        store: Arc<dyn CursorStore>,
        config: &IngestConfig,
    ) -> Self {
        Self {
            transport,
            store,
            cursor: None,
            poll_timeout: config.poll_timeout(),
            cold_start_grace: Duration::from_secs(config.cold_start_grace_secs),
        }
    }

    pub fn cursor(&self) -> Option<Cursor> {
        self.cursor
    }

    /// Load the persisted cursor, or start from "now minus grace" when
    /// nothing was persisted.
    pub async fn resume(&mut self) -> Result<Cursor> {
        let cursor = match self.store.load().await? {
            Some(cursor) => {
                log::info!("Resuming from persisted cursor {}", cursor.value());
                cursor
            }
            None => {
                let cursor = Cursor::cold_start(self.cold_start_grace);
                log::info!(
                    "No persisted cursor; cold start at {} ({}s grace)",
                    cursor.value(),
                    self.cold_start_grace.as_secs()
                );
                cursor
            }
        };
        self.cursor = Some(cursor);
        Ok(cursor)
    }

    /// One long-poll round trip.
    ///
    /// On success the next cursor (if any) is persisted, then adopted, and
    /// the events are returned. On error nothing changes.
    pub async fn poll(&mut self) -> Result<Vec<InboundEvent>> {
        let batch = self.transport.poll(self.cursor, self.poll_timeout).await?;

        if let Some(next) = batch.next_cursor.filter(|next| Some(*next) != self.cursor) {
            self.store.save(next).await?;
            self.cursor = Some(next);
        }

        if !batch.events.is_empty() {
            log::debug!("Polled {} event(s)", batch.events.len());
        }
        Ok(batch.events)
    }
}
