use crate::error::{Error, Result};
use crate::search::ResultRecord;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::time::{Duration, Instant};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Default)]
struct CacheState {
    last_query: Option<String>,
    results: Vec<ResultRecord>,
    result_count: usize,
    query_id: Option<Uuid>,
    timestamp: Option<OffsetDateTime>,
    is_processing: bool,
}

/// What a consumer such as a summarizer sees once a query has finished.
#[derive(Debug, Clone, Serialize)]
pub struct CacheSnapshot {
    pub query: String,
    pub query_id: Uuid,
    pub results: Vec<ResultRecord>,
    /// RFC 3339 completion time.
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    pub has_query: bool,
    pub query: Option<String>,
    pub query_id: Option<Uuid>,
    pub result_count: usize,
    pub is_processing: bool,
}

/// Last query and its best results, shared by all requests.
#[derive(Debug)]
pub struct QueryCache {
    state: Mutex<CacheState>,
    finished: Condvar,
    keep: usize,
}

impl QueryCache {
    pub fn new(keep: usize) -> Self {
        Self { state: Mutex::new(CacheState::default()), finished: Condvar::new(), keep }
    }

    /// Marks `query` as in flight and returns the id its snapshot will carry.
    pub fn set_processing(&self, query: &str) -> Uuid {
        let query_id = Uuid::new_v4();
        let mut state = self.state.lock();
        state.is_processing = true;
        state.last_query = Some(query.to_string());
        state.query_id = Some(query_id);
        query_id
    }

    /// Stores the finished query, keeping only its first results, and wakes waiters.
    pub fn update(&self, query_id: Uuid, query: &str, results: &[ResultRecord]) {
        let mut state = self.state.lock();
        state.last_query = Some(query.to_string());
        state.results = results.iter().take(self.keep).cloned().collect();
        state.result_count = results.len();
        state.query_id = Some(query_id);
        state.timestamp = Some(OffsetDateTime::now_utc());
        state.is_processing = false;
        drop(state);
        self.finished.notify_all();
        tracing::debug!(query, results = results.len(), "query cache updated");
    }

    pub fn clear(&self) {
        *self.state.lock() = CacheState::default();
        self.finished.notify_all();
    }

    pub fn status(&self) -> CacheStatus {
        let state = self.state.lock();
        CacheStatus {
            has_query: state.last_query.is_some(),
            query: state.last_query.clone(),
            query_id: state.query_id,
            result_count: state.result_count,
            is_processing: state.is_processing,
        }
    }

    /// Waits until no query is in flight, up to `timeout`. Fails with
    /// `NotFound` when nothing has been searched yet.
    pub fn wait_for_results(&self, timeout: Duration) -> Result<CacheSnapshot> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.is_processing {
            if self.finished.wait_until(&mut state, deadline).timed_out() && state.is_processing {
                return Err(Error::Timeout { waited: timeout, what: "in-flight query" });
            }
        }
        match (&state.last_query, state.query_id) {
            (Some(query), Some(query_id)) => Ok(CacheSnapshot {
                query: query.clone(),
                query_id,
                results: state.results.clone(),
                timestamp: state.timestamp.and_then(|t| t.format(&Rfc3339).ok()),
            }),
            _ => Err(Error::NotFound("no cached query".into())),
        }
    }
}
