//! Convergence waiting.
//!
//! [`await_batch`] polls a fixed set of handles at a fixed interval until
//! all of them report a ready status. The first handle seen in a status
//! outside the vocabulary aborts the wait; handles not yet refreshed in
//! that round are left alone.
//!
//! There is no deadline unless [`WaitOptions::max_wait`] is set.

use crate::backend::ResourceControl;
use crate::error::{Error, Result};
use crate::types::{ResourceHandle, StatusClass, StatusVocabulary};
use std::cell::Cell;
use std::collections::HashSet;
use std::thread;
use std::time::Duration;

/// Default pause between polling rounds.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Source of the pause between polling rounds.
pub trait Clock {
    fn sleep(&self, duration: Duration);
}

/// Blocks the current thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadClock;

impl Clock for ThreadClock {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Records requested sleeps without blocking.
#[derive(Debug, Default)]
pub struct ManualClock {
    elapsed: Cell<Duration>,
    sleeps: Cell<u32>,
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total time slept so far.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.elapsed.get()
    }

    /// Number of sleeps so far.
    #[must_use]
    pub fn sleeps(&self) -> u32 {
        self.sleeps.get()
    }
}

impl Clock for ManualClock {
    fn sleep(&self, duration: Duration) {
        self.elapsed.set(self.elapsed.get() + duration);
        self.sleeps.set(self.sleeps.get() + 1);
    }
}

/// Progress notifications from a wait.
///
/// All methods default to doing nothing.
pub trait WaitObserver {
    /// A polling round is starting with `pending` handles not yet ready.
    fn on_round(&self, _round: u32, _pending: usize) {}

    /// A handle was refreshed and is still converging.
    fn on_building(&self, _handle: &ResourceHandle) {}

    /// A handle reached a ready status.
    fn on_ready(&self, _handle: &ResourceHandle) {}

    /// Every handle in the batch is ready.
    fn on_complete(&self, _rounds: u32) {}
}

/// Observer that ignores every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoObserver;

impl WaitObserver for NoObserver {}

/// Polling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    pub interval: Duration,
    /// Give up after this much polling. `None` waits indefinitely.
    pub max_wait: Option<Duration>,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            max_wait: None,
        }
    }
}

impl WaitOptions {
    #[must_use]
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }
}

/// Handles created together and awaited together.
///
/// Membership is fixed when the batch is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    handles: Vec<ResourceHandle>,
    rounds: u32,
}

impl Batch {
    #[must_use]
    pub fn new(handles: Vec<ResourceHandle>) -> Self {
        Self { handles, rounds: 0 }
    }

    #[must_use]
    pub fn single(handle: ResourceHandle) -> Self {
        Self::new(vec![handle])
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Polling rounds spent by the wait that produced this batch.
    #[must_use]
    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceHandle> {
        self.handles.iter()
    }

    #[must_use]
    pub fn handles(&self) -> &[ResourceHandle] {
        &self.handles
    }

    /// Look up a member by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ResourceHandle> {
        self.handles.iter().find(|h| h.id == id)
    }

    #[must_use]
    pub fn into_handles(self) -> Vec<ResourceHandle> {
        self.handles
    }
}

/// Poll every member of `batch` until all are ready under `vocabulary`.
///
/// Each round sleeps for the interval, then refreshes each member that is
/// not yet ready, in batch order. Readiness is tracked by resource id.
///
/// # Errors
///
/// [`Error::UnexpectedState`] for the first member whose status is neither
/// transient nor ready, [`Error::Timeout`] if `max_wait` elapses, and any
/// error from the refresh itself.
pub fn await_batch<C: ResourceControl + ?Sized>(
    control: &C,
    mut batch: Batch,
    options: &WaitOptions,
    vocabulary: &StatusVocabulary,
    clock: &dyn Clock,
    observer: &dyn WaitObserver,
) -> Result<Batch> {
    let mut ready: HashSet<String> = HashSet::new();
    let mut waited = Duration::ZERO;

    while let Some(pending) = batch.handles.iter().find(|h| !ready.contains(&h.id)) {
        if options.max_wait.is_some_and(|max_wait| waited >= max_wait) {
            return Err(timeout(pending, waited));
        }
        let pending_count = batch.handles.iter().filter(|h| !ready.contains(&h.id)).count();

        clock.sleep(options.interval);
        waited += options.interval;
        batch.rounds += 1;
        observer.on_round(batch.rounds, pending_count);

        for handle in &mut batch.handles {
            if ready.contains(&handle.id) {
                continue;
            }
            control.refresh(handle)?;
            log::debug!(
                "Round {}: {} {} is {}",
                batch.rounds,
                handle.kind,
                handle.name,
                handle.status
            );
            match vocabulary.classify(&handle.status) {
                StatusClass::Transient => observer.on_building(handle),
                StatusClass::Ready => {
                    ready.insert(handle.id.clone());
                    observer.on_ready(handle);
                }
                StatusClass::Failed => return Err(unexpected(handle)),
            }
        }
    }

    observer.on_complete(batch.rounds);
    Ok(batch)
}

/// Refresh `handle` until `predicate` holds.
///
/// Used for attributes that appear after a resource is already ready, such
/// as a server's public address. The predicate is checked before the first
/// sleep. Returns the number of rounds spent.
pub fn poll_until<C, P>(
    control: &C,
    handle: &mut ResourceHandle,
    options: &WaitOptions,
    clock: &dyn Clock,
    predicate: P,
) -> Result<u32>
where
    C: ResourceControl + ?Sized,
    P: Fn(&ResourceHandle) -> bool,
{
    let mut rounds = 0;
    let mut waited = Duration::ZERO;

    while !predicate(handle) {
        if options.max_wait.is_some_and(|max_wait| waited >= max_wait) {
            return Err(timeout(handle, waited));
        }
        clock.sleep(options.interval);
        waited += options.interval;
        rounds += 1;
        control.refresh(handle)?;
        if handle.classify() == StatusClass::Failed {
            return Err(unexpected(handle));
        }
    }

    Ok(rounds)
}

fn unexpected(handle: &ResourceHandle) -> Error {
    Error::UnexpectedState {
        kind: handle.kind,
        id: handle.id.clone(),
        name: handle.name.clone(),
        status: handle.status.clone(),
    }
}

fn timeout(handle: &ResourceHandle, waited: Duration) -> Error {
    Error::Timeout {
        kind: handle.kind,
        id: handle.id.clone(),
        name: handle.name.clone(),
        waited,
    }
}
