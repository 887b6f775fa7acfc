//! Reference counting and merge checkouts for table ids.
//!
//! A table id's count is the number of holders keeping it alive: the last
//! advanced commit, each in-flight merge using it as a source, and each
//! in-flight merge using it as back set. Ids are plain integers because
//! they outlive the process through commit records.
//!
//! All state sits behind one mutex, so checking out and advancing the
//! commit happen as a single step. Lifecycle callbacks run after the mutex
//! is released.

use log::{error, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::{RegistryError, Result};

/// Observer for table ids gaining their first reference or losing their
/// last one.
pub trait TableLifecycle: Send + Sync {
    fn table_inited(&self, _id: u64) {}

    /// The table's file is no longer needed by anyone in this process.
    fn table_released(&self, _id: u64) {}
}

/// A commit: the table stack it names, oldest first, and its position in
/// the commit sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub id: u64,
    pub table_ids: Vec<u64>,
}

impl Commit {
    #[must_use]
    pub fn new(id: u64, table_ids: Vec<u64>) -> Self {
        Self { id, table_ids }
    }
}

enum Event {
    Inited(u64),
    Released(u64),
}

#[derive(Default)]
struct State {
    refs: HashMap<u64, u32>,
    checked_out: HashSet<u64>,
    last_commit: Option<Commit>,
}

impl State {
    fn add(&mut self, id: u64, events: &mut Vec<Event>) {
        let count = self.refs.entry(id).or_insert(0);
        *count += 1;
        if *count == 1 {
            events.push(Event::Inited(id));
        }
    }

    /// Drops one reference for every entry of `ids`. A strict registry
    /// checks all of them before changing anything.
    fn release(&mut self, ids: &[u64], strict: bool, events: &mut Vec<Event>) -> Result<()> {
        if strict {
            let mut wanted: HashMap<u64, u32> = HashMap::new();
            for &id in ids {
                *wanted.entry(id).or_insert(0) += 1;
            }
            for (&id, &n) in &wanted {
                if self.refs.get(&id).copied().unwrap_or(0) < n {
                    return Err(RegistryError::Underflow { id });
                }
            }
        }
        for &id in ids {
            match self.refs.get_mut(&id) {
                Some(count) => {
                    *count -= 1;
                    if *count == 0 {
                        self.refs.remove(&id);
                        events.push(Event::Released(id));
                    }
                }
                None => error!("release of table {} which holds no reference", id),
            }
        }
        Ok(())
    }

    /// `Ok(false)` for a stale commit; advancing to the current commit
    /// again changes nothing.
    fn advance(&mut self, commit: &Commit, strict: bool, events: &mut Vec<Event>) -> Result<bool> {
        let previous: HashSet<u64> = match &self.last_commit {
            Some(last) if commit.id < last.id => return Ok(false),
            Some(last) if commit.id == last.id => return Ok(true),
            Some(last) => last.table_ids.iter().copied().collect(),
            None => HashSet::new(),
        };
        let current: HashSet<u64> = commit.table_ids.iter().copied().collect();

        let dropped: Vec<u64> = previous.difference(&current).copied().collect();
        self.release(&dropped, strict, events)?;
        for &id in current.difference(&previous) {
            self.add(id, events);
        }
        self.last_commit = Some(commit.clone());
        Ok(true)
    }
}

struct Shared {
    state: Mutex<State>,
    listener: Option<Arc<dyn TableLifecycle>>,
    strict: bool,
}

/// Process-wide table reference registry. Clones share state.
#[derive(Clone)]
pub struct TableRegistry {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for TableRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableRegistry")
            .field("strict", &self.shared.strict)
            .field("listener", &self.shared.listener.is_some())
            .finish()
    }
}

impl TableRegistry {
    /// `strict` turns releases of missing references into errors instead
    /// of logged no-ops.
    #[must_use]
    pub fn new(strict: bool, listener: Option<Arc<dyn TableLifecycle>>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                listener,
                strict,
            }),
        }
    }

    #[must_use]
    pub fn from_config(
        config: &config::Config,
        listener: Option<Arc<dyn TableLifecycle>>,
    ) -> Self {
        Self::new(config.strict_refs, listener)
    }

    #[must_use]
    pub fn is_strict(&self) -> bool {
        self.shared.strict
    }

    /// Moves the registry to `commit`: ids new in it gain a reference, ids
    /// only in the previous commit lose one. Returns `false` if `commit`
    /// is older than the last one seen.
    pub fn advance_commit(&self, commit: &Commit) -> Result<bool> {
        let mut events = Vec::new();
        let advanced = {
            let mut state = self.lock()?;
            state.advance(commit, self.shared.strict, &mut events)?
        };
        if !advanced {
            warn!("ignoring stale commit {}", commit.id);
        }
        self.fire(events);
        Ok(advanced)
    }

    /// Reserves `sources` for one merge, with `back_set` as read-only
    /// context, after advancing to `commit`.
    ///
    /// Returns `None`, leaving the registry untouched, when `commit` is
    /// stale or any source is already checked out.
    pub fn check_out(
        &self,
        sources: &[u64],
        back_set: &[u64],
        commit: &Commit,
    ) -> Result<Option<CheckoutGuard>> {
        let mut events = Vec::new();
        let granted = {
            let mut state = self.lock()?;
            let busy = sources.iter().any(|id| state.checked_out.contains(id));
            let stale = state.last_commit.as_ref().is_some_and(|c| commit.id < c.id);
            if busy || stale {
                false
            } else {
                state.advance(commit, self.shared.strict, &mut events)?;
                for &id in sources.iter().chain(back_set) {
                    state.add(id, &mut events);
                }
                state.checked_out.extend(sources.iter().copied());
                true
            }
        };
        self.fire(events);
        if !granted {
            return Ok(None);
        }
        info!(
            "checked out tables {:?} (back set {:?}) at commit {}",
            sources, back_set, commit.id
        );
        Ok(Some(CheckoutGuard {
            registry: self.clone(),
            sources: sources.to_vec(),
            back_set: back_set.to_vec(),
            released: false,
        }))
    }

    /// Adds one reference per entry of `ids`, for replaying holders during
    /// recovery.
    pub fn add_refs(&self, ids: &[u64]) -> Result<()> {
        let mut events = Vec::new();
        {
            let mut state = self.lock()?;
            for &id in ids {
                state.add(id, &mut events);
            }
        }
        self.fire(events);
        Ok(())
    }

    /// Drops one reference per entry of `ids`.
    pub fn release_refs(&self, ids: &[u64]) -> Result<()> {
        let mut events = Vec::new();
        let result = self
            .lock()
            .and_then(|mut state| state.release(ids, self.shared.strict, &mut events));
        self.fire(events);
        result
    }

    pub fn ref_count(&self, id: u64) -> Result<u32> {
        Ok(self.lock()?.refs.get(&id).copied().unwrap_or(0))
    }

    pub fn is_checked_out(&self, id: u64) -> Result<bool> {
        Ok(self.lock()?.checked_out.contains(&id))
    }

    pub fn last_commit_id(&self) -> Result<Option<u64>> {
        Ok(self.lock()?.last_commit.as_ref().map(|c| c.id))
    }

    /// Ids currently holding at least one reference, ascending.
    pub fn live_ids(&self) -> Result<Vec<u64>> {
        let mut ids: Vec<u64> = self.lock()?.refs.keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    fn check_in(&self, sources: &[u64], back_set: &[u64]) -> Result<()> {
        let mut events = Vec::new();
        let result = self.lock().and_then(|mut state| {
            for id in sources {
                state.checked_out.remove(id);
            }
            let held: Vec<u64> = sources.iter().chain(back_set).copied().collect();
            state.release(&held, self.shared.strict, &mut events)
        });
        self.fire(events);
        result
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.shared
            .state
            .lock()
            .map_err(|_| RegistryError::Poisoned)
    }

    fn fire(&self, events: Vec<Event>) {
        for event in events {
            match event {
                Event::Inited(id) => {
                    info!("table {} inited", id);
                    if let Some(l) = &self.shared.listener {
                        l.table_inited(id);
                    }
                }
                Event::Released(id) => {
                    info!("table {} released", id);
                    if let Some(l) = &self.shared.listener {
                        l.table_released(id);
                    }
                }
            }
        }
    }
}

/// Exclusive hold on a merge's source tables.
///
/// Dropping the guard releases it; [`CheckoutGuard::release`] does the same
/// and reports failures.
#[derive(Debug)]
#[must_use = "dropping the guard releases the checkout"]
pub struct CheckoutGuard {
    registry: TableRegistry,
    sources: Vec<u64>,
    back_set: Vec<u64>,
    released: bool,
}

impl CheckoutGuard {
    #[must_use]
    pub fn sources(&self) -> &[u64] {
        &self.sources
    }

    #[must_use]
    pub fn back_set(&self) -> &[u64] {
        &self.back_set
    }

    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.registry.check_in(&self.sources, &self.back_set)
    }
}

impl Drop for CheckoutGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.registry.check_in(&self.sources, &self.back_set) {
            error!("releasing checkout of {:?} failed: {}", self.sources, e);
        }
    }
}
