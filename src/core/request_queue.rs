//! Prioritized status request scheduler
//!
//! Requests wait in one of two tiers, each ordered by enqueue sequence. Every
//! tick drains the high tier, then the low tier, applying in order:
//!
//! 1. duplicate check against in-flight work for the same (repository, path);
//!    a low duplicate is dropped, a high duplicate waits for a later tick
//! 2. per-repository capacity check
//! 3. freshness check against the stored record's `last_modified`
//! 4. dispatch onto the blocking pool
//!
//! One mutex guards both tiers and the in-flight table. It is only held for
//! check-and-mark / check-and-clear; never across a store read or a
//! computation.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::status_computer::{ComputeOutcome, StatusComputer};
use crate::data::{StatusStore, WatchedRepository};
use crate::util::repo_path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    /// User-initiated refreshes
    High,
    /// Background rescans; directories always land here
    Low,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRequest {
    pub path: String,
    pub repo: WatchedRepository,
    pub priority: Priority,
    /// A stored record younger than this satisfies the request
    pub staleness_budget: Duration,
    pub include_files: bool,
    pub include_dirs: bool,
    pub sequence: u64,
}

#[derive(Default)]
struct QueueState {
    next_sequence: u64,
    high: BTreeMap<u64, StatusRequest>,
    low: BTreeMap<u64, StatusRequest>,
    in_flight: HashMap<Uuid, HashSet<String>>,
}

impl QueueState {
    fn tier_mut(&mut self, priority: Priority) -> &mut BTreeMap<u64, StatusRequest> {
        match priority {
            Priority::High => &mut self.high,
            Priority::Low => &mut self.low,
        }
    }

    fn tier(&self, priority: Priority) -> &BTreeMap<u64, StatusRequest> {
        match priority {
            Priority::High => &self.high,
            Priority::Low => &self.low,
        }
    }

    fn is_in_flight(&self, repo: Uuid, path: &str) -> bool {
        self.in_flight
            .get(&repo)
            .is_some_and(|paths| paths.contains(path))
    }

    fn in_flight_count(&self, repo: Uuid) -> usize {
        self.in_flight.get(&repo).map_or(0, HashSet::len)
    }
}

/// Clears the in-flight marker when dropped, including on panic
struct InFlightGuard {
    state: Arc<Mutex<QueueState>>,
    repo: Uuid,
    path: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if let Some(paths) = state.in_flight.get_mut(&self.repo) {
            paths.remove(&self.path);
            if paths.is_empty() {
                state.in_flight.remove(&self.repo);
            }
        }
    }
}

enum Verdict {
    Gone,
    DropDuplicate,
    Wait,
    Proceed,
}

pub struct StatusRequestQueue {
    state: Arc<Mutex<QueueState>>,
    computer: Arc<StatusComputer>,
    store: Arc<dyn StatusStore>,
    high_cap: usize,
    low_cap: usize,
}

impl StatusRequestQueue {
    pub fn new(
        computer: Arc<StatusComputer>,
        store: Arc<dyn StatusStore>,
        high_cap: usize,
        low_cap: usize,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            computer,
            store,
            high_cap,
            low_cap,
        }
    }

    /// Queue a status request; directories are always queued low.
    /// Returns the request's sequence number.
    pub fn enqueue(
        &self,
        path: &str,
        repo: &WatchedRepository,
        staleness_budget: Duration,
        include_files: bool,
        include_dirs: bool,
        priority: Priority,
    ) -> u64 {
        let is_dir = repo_path::absolute_path(&repo.path, path).is_dir();
        let priority = if is_dir { Priority::Low } else { priority };

        let mut state = self.state.lock();
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.tier_mut(priority).insert(
            sequence,
            StatusRequest {
                path: path.to_string(),
                repo: repo.clone(),
                priority,
                staleness_budget,
                include_files,
                include_dirs,
                sequence,
            },
        );
        sequence
    }

    /// Run one scheduling pass over both tiers.
    ///
    /// Returns the handles of the computations dispatched by this pass.
    pub fn process_tick(&self) -> Vec<JoinHandle<()>> {
        let mut dispatched = self.process_tier(Priority::High, self.high_cap);
        dispatched.extend(self.process_tier(Priority::Low, self.low_cap));
        dispatched
    }

    fn process_tier(&self, priority: Priority, cap: usize) -> Vec<JoinHandle<()>> {
        let candidates: Vec<StatusRequest> =
            { self.state.lock().tier(priority).values().cloned().collect() };

        let mut dispatched = Vec::new();
        for request in candidates {
            match self.check(&request, cap) {
                Verdict::Proceed => {}
                Verdict::DropDuplicate => {
                    self.state
                        .lock()
                        .tier_mut(priority)
                        .remove(&request.sequence);
                    continue;
                }
                Verdict::Gone | Verdict::Wait => continue,
            }

            if self.is_fresh(&request) {
                self.state
                    .lock()
                    .tier_mut(priority)
                    .remove(&request.sequence);
                continue;
            }

            // re-check: in-flight work may have changed while the store was read
            let guard = {
                let mut state = self.state.lock();
                match Self::verdict(&state, &request, cap) {
                    Verdict::Proceed => {}
                    Verdict::DropDuplicate => {
                        state.tier_mut(priority).remove(&request.sequence);
                        continue;
                    }
                    Verdict::Gone | Verdict::Wait => continue,
                }
                state.tier_mut(priority).remove(&request.sequence);
                state
                    .in_flight
                    .entry(request.repo.uuid)
                    .or_default()
                    .insert(request.path.clone());
                InFlightGuard {
                    state: self.state.clone(),
                    repo: request.repo.uuid,
                    path: request.path.clone(),
                }
            };

            dispatched.push(self.dispatch(request, guard));
        }
        dispatched
    }

    fn check(&self, request: &StatusRequest, cap: usize) -> Verdict {
        let state = self.state.lock();
        Self::verdict(&state, request, cap)
    }

    fn verdict(state: &QueueState, request: &StatusRequest, cap: usize) -> Verdict {
        if !state.tier(request.priority).contains_key(&request.sequence) {
            return Verdict::Gone;
        }
        if state.is_in_flight(request.repo.uuid, &request.path) {
            return match request.priority {
                Priority::Low => Verdict::DropDuplicate,
                Priority::High => Verdict::Wait,
            };
        }
        if state.in_flight_count(request.repo.uuid) >= cap {
            return Verdict::Wait;
        }
        Verdict::Proceed
    }

    fn is_fresh(&self, request: &StatusRequest) -> bool {
        let Ok(budget) = chrono::Duration::from_std(request.staleness_budget) else {
            return false;
        };
        match self.store.get(request.repo.uuid, &request.path) {
            Ok(Some(record)) => Utc::now()
                .checked_sub_signed(budget)
                .map_or(true, |cutoff| record.last_modified > cutoff),
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(
                    repo = %request.repo.uuid,
                    path = %request.path,
                    error = %e,
                    "Failed to read status for freshness check"
                );
                false
            }
        }
    }

    fn dispatch(&self, request: StatusRequest, guard: InFlightGuard) -> JoinHandle<()> {
        let computer = self.computer.clone();
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            match computer.compute(
                &request.repo,
                &request.path,
                request.include_files,
                request.include_dirs,
            ) {
                Ok(ComputeOutcome::Written(_)) | Ok(ComputeOutcome::Removed) => {}
                Ok(ComputeOutcome::Skipped {
                    placeholder_written,
                }) => {
                    tracing::trace!(
                        repo = %request.repo.uuid,
                        path = %request.path,
                        placeholder_written,
                        "Skipped status computation"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        repo = %request.repo.uuid,
                        path = %request.path,
                        error = %e,
                        "Status computation failed"
                    );
                }
            }
        })
    }

    /// Whether a request for this path is pending in either tier or in flight
    pub fn is_queued(&self, repo: Uuid, path: &str) -> bool {
        let state = self.state.lock();
        state.is_in_flight(repo, path)
            || state
                .high
                .values()
                .chain(state.low.values())
                .any(|r| r.repo.uuid == repo && r.path == path)
    }

    pub fn pending(&self, priority: Priority) -> usize {
        self.state.lock().tier(priority).len()
    }

    pub fn in_flight_count(&self, repo: Uuid) -> usize {
        self.state.lock().in_flight_count(repo)
    }

    /// Nothing pending and nothing running
    pub fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.high.is_empty() && state.low.is_empty() && state.in_flight.is_empty()
    }

    /// Drop pending requests for a repository that is no longer watched
    pub fn discard_repository(&self, repo: Uuid) -> usize {
        let mut state = self.state.lock();
        let before = state.high.len() + state.low.len();
        state.high.retain(|_, r| r.repo.uuid != repo);
        state.low.retain(|_, r| r.repo.uuid != repo);
        before - (state.high.len() + state.low.len())
    }
}
