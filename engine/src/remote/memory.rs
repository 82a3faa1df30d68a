//! In-process remote service with fault injection.

use super::{RecordDraft, RecordPatch, RemoteClient, RemoteRecord};
use crate::clock::SharedClock;
use crate::error::RemoteError;
use crate::RemoteId;
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Remote calls that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOp {
    Create,
    Update,
    Delete,
    Get,
    List,
}

type PayloadFilter = Arc<dyn Fn(&serde_json::Value) -> bool + Send + Sync>;

#[derive(Default)]
struct State {
    records: BTreeMap<RemoteId, RemoteRecord>,
    next_id: u64,
    scripted_failures: VecDeque<(RemoteOp, RemoteError)>,
    reject_payload: Option<PayloadFilter>,
    calls: Vec<RemoteOp>,
}

/// A remote service kept in memory.
///
/// Ids are `r-1`, `r-2`, ...; `updated_at` comes from the shared clock.
pub struct InMemoryRemote {
    state: Mutex<State>,
    clock: SharedClock,
    offline: AtomicBool,
    call_count: AtomicUsize,
}

impl std::fmt::Debug for InMemoryRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRemote")
            .field("records", &self.lock().records.len())
            .field("calls", &self.calls())
            .finish()
    }
}

impl InMemoryRemote {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            state: Mutex::new(State::default()),
            clock,
            offline: AtomicBool::new(false),
            call_count: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed a record directly, bypassing the call log.
    pub fn insert(&self, record: RemoteRecord) {
        self.lock().records.insert(record.id.clone(), record);
    }

    /// Current remote copy of a record.
    pub fn record(&self, id: &str) -> Option<RemoteRecord> {
        self.lock().records.get(id).cloned()
    }

    /// Every stored record.
    pub fn records(&self) -> Vec<RemoteRecord> {
        self.lock().records.values().cloned().collect()
    }

    /// Make the next call of `op` fail with `error`.
    pub fn fail_next(&self, op: RemoteOp, error: RemoteError) {
        self.lock().scripted_failures.push_back((op, error));
    }

    /// Fail creates and updates whose payload matches `filter`.
    pub fn reject_payloads<F>(&self, filter: F)
    where
        F: Fn(&serde_json::Value) -> bool + Send + Sync + 'static,
    {
        self.lock().reject_payload = Some(Arc::new(filter));
    }

    pub fn clear_rejections(&self) {
        self.lock().reject_payload = None;
    }

    /// Fail every call with a transport error until switched back.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.offline.store(unreachable, Ordering::SeqCst);
    }

    /// Total calls made through [`RemoteClient`].
    pub fn calls(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Calls made, in order.
    pub fn call_log(&self) -> Vec<RemoteOp> {
        self.lock().calls.clone()
    }

    fn begin(&self, op: RemoteOp) -> Result<MutexGuard<'_, State>, RemoteError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();
        state.calls.push(op);

        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Other("connection refused".into()));
        }
        if let Some(pos) = state.scripted_failures.iter().position(|(o, _)| *o == op) {
            if let Some((_, err)) = state.scripted_failures.remove(pos) {
                return Err(err);
            }
        }
        Ok(state)
    }

    fn check_payload(state: &State, payload: &serde_json::Value) -> Result<(), RemoteError> {
        match &state.reject_payload {
            Some(filter) if filter(payload) => {
                Err(RemoteError::Other("payload rejected by remote".into()))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteClient for InMemoryRemote {
    async fn create(&self, draft: &RecordDraft) -> Result<RemoteRecord, RemoteError> {
        let mut state = self.begin(RemoteOp::Create)?;
        Self::check_payload(&state, &draft.payload)?;

        state.next_id += 1;
        let record = RemoteRecord {
            id: format!("r-{}", state.next_id),
            owner_id: draft.owner_id.clone(),
            payload: draft.payload.clone(),
            created_at: draft.created_at,
            updated_at: self.clock.now_ms(),
        };
        state.records.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn update(&self, id: &str, patch: &RecordPatch) -> Result<RemoteRecord, RemoteError> {
        let mut state = self.begin(RemoteOp::Update)?;
        Self::check_payload(&state, &patch.payload)?;

        let now = self.clock.now_ms();
        let record = state
            .records
            .get_mut(id)
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))?;
        record.payload = patch.payload.clone();
        record.updated_at = now;
        Ok(record.clone())
    }

    async fn delete(&self, id: &str) -> Result<(), RemoteError> {
        let mut state = self.begin(RemoteOp::Delete)?;
        state
            .records
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))
    }

    async fn get(&self, id: &str) -> Result<RemoteRecord, RemoteError> {
        let state = self.begin(RemoteOp::Get)?;
        state
            .records
            .get(id)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))
    }

    async fn list(&self, owner: &str) -> Result<Vec<RemoteRecord>, RemoteError> {
        let state = self.begin(RemoteOp::List)?;
        let mut records: Vec<_> = state
            .records
            .values()
            .filter(|r| r.owner_id == owner)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }
}
