//! Lifecycle of backend cursors: scroll contexts and points in time.
//!
//! Every cursor is bound to a query id; a query id holds at most one live
//! cursor. Cursors left behind by a crashed process are reclaimed by the
//! backend keep-alive only.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use uniquery_api::view::DeletePitsResponse;

use crate::error::{QuerierError, codes};
use crate::gateway::SearchGateway;

type LiveSet = Arc<Mutex<HashSet<String>>>;

fn lock(live: &LiveSet) -> std::sync::MutexGuard<'_, HashSet<String>> {
    live.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Registry of query ids with a live cursor.
#[derive(Debug, Clone, Default)]
pub struct PaginationManager {
    live: LiveSet,
}

impl PaginationManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, query_id: &str) -> Result<CursorLease, QuerierError> {
        if !lock(&self.live).insert(query_id.to_string()) {
            return Err(QuerierError::validation(
                codes::CURSOR_ALREADY_OPEN,
                format!("query '{query_id}' already holds a live cursor"),
            ));
        }
        Ok(CursorLease {
            query_id: query_id.to_string(),
            live: self.live.clone(),
        })
    }

    pub fn is_live(&self, query_id: &str) -> bool {
        lock(&self.live).contains(query_id)
    }

    pub fn live_count(&self) -> usize {
        lock(&self.live).len()
    }

    pub fn open_scroll(
        &self,
        query_id: &str,
        gateway: Arc<dyn SearchGateway>,
    ) -> Result<ScrollSession, QuerierError> {
        Ok(ScrollSession {
            gateway,
            scroll_ids: Vec::new(),
            closed: false,
            _lease: self.acquire(query_id)?,
        })
    }

    pub fn open_pit(
        &self,
        query_id: &str,
        gateway: Arc<dyn SearchGateway>,
        pit_id: String,
    ) -> Result<PitSession, QuerierError> {
        Ok(PitSession {
            gateway,
            pit_id,
            released: false,
            _lease: self.acquire(query_id)?,
        })
    }
}

/// Holds a query id in the registry until dropped.
#[derive(Debug)]
pub struct CursorLease {
    query_id: String,
    live: LiveSet,
}

impl CursorLease {
    pub fn query_id(&self) -> &str {
        &self.query_id
    }
}

impl Drop for CursorLease {
    fn drop(&mut self) {
        lock(&self.live).remove(&self.query_id);
    }
}

/// Scroll ids seen while paging one query.
///
/// Closing or dropping the session issues one fire-and-forget deletion of
/// every recorded id, whatever the outcome of the paging was.
pub struct ScrollSession {
    gateway: Arc<dyn SearchGateway>,
    scroll_ids: Vec<String>,
    closed: bool,
    _lease: CursorLease,
}

impl ScrollSession {
    pub fn record(&mut self, scroll_id: &str) {
        if !scroll_id.is_empty() && !self.scroll_ids.iter().any(|id| id == scroll_id) {
            self.scroll_ids.push(scroll_id.to_string());
        }
    }

    pub fn scroll_ids(&self) -> &[String] {
        &self.scroll_ids
    }

    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if self.scroll_ids.is_empty() {
            return;
        }

        let ids = std::mem::take(&mut self.scroll_ids);
        let gateway = self.gateway.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = gateway.delete_scroll(&ids).await {
                        log::warn!("Failed to delete {} scroll ids: {e}", ids.len());
                    }
                });
            }
            Err(_) => log::warn!(
                "No async runtime to delete {} scroll ids, leaving them to expire",
                ids.len()
            ),
        }
    }
}

impl Drop for ScrollSession {
    fn drop(&mut self) {
        self.release();
    }
}

/// A point in time owned by one in-process iteration.
pub struct PitSession {
    gateway: Arc<dyn SearchGateway>,
    pit_id: String,
    released: bool,
    _lease: CursorLease,
}

impl PitSession {
    pub fn pit_id(&self) -> &str {
        &self.pit_id
    }

    /// The backend may hand out a new id on every page.
    pub fn update(&mut self, pit_id: &str) {
        if !pit_id.is_empty() {
            self.pit_id = pit_id.to_string();
        }
    }

    /// Hand the point in time over to the caller, who releases it later.
    pub fn detach(mut self) -> String {
        self.released = true;
        std::mem::take(&mut self.pit_id)
    }

    pub async fn release(mut self) -> Result<DeletePitsResponse, QuerierError> {
        self.released = true;
        self.gateway
            .delete_point_in_time(std::slice::from_ref(&self.pit_id))
            .await
            .map_err(|e| {
                log::error!("Failed to delete point in time: {e}");
                QuerierError::backend(codes::DELETE_PIT_FAILED, &e)
            })
    }
}

impl Drop for PitSession {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let ids = vec![std::mem::take(&mut self.pit_id)];
        let gateway = self.gateway.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = gateway.delete_point_in_time(&ids).await {
                        log::warn!("Failed to delete point in time: {e}");
                    }
                });
            }
            Err(_) => log::warn!("No async runtime to delete point in time, leaving it to expire"),
        }
    }
}
