use std::collections::BTreeSet;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Upper bound on the recent-draw ledger. The history view is a "recent
/// winners" display, not an audit log; older entries are evicted.
pub const HISTORY_CAPACITY: usize = 5;

/// Logical ticks between `start_spin` and the earliest permitted settlement,
/// mirroring the reveal animation the rendering surface schedules.
pub const SETTLE_DELAY_TICKS: u64 = 5;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum WheelError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Why an add was declined. Callers that follow the silent-no-op policy can
/// discard this; the CLI reports it for operator feedback.
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum AddRejection {
    #[error("item name is empty after trimming")]
    EmptyName,
    #[error("an item named `{0}` is already on the wheel")]
    DuplicateName(String),
}

/// Canonical identity form of an item name: trimmed and case-folded.
/// The stored name keeps its original casing; only comparisons use this.
#[must_use]
pub fn normalize_name(raw: &str) -> String {
    raw.trim().to_lowercase()
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Item {
    pub name: String,
    pub prompt: String,
    #[serde(default)]
    pub answer: Option<String>,
}

impl Item {
    #[must_use]
    pub fn new(name: &str, prompt: &str, answer: Option<&str>) -> Self {
        Self {
            name: name.trim().to_string(),
            prompt: prompt.to_string(),
            answer: answer.map(str::to_string),
        }
    }

    #[must_use]
    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }
}

/// Active wheel items plus the set of permanently retired names.
///
/// Invariants: no two active items share a normalized name, and no active
/// item has an empty normalized name. Retired names never re-enter the
/// active list through `reset_to_defaults`; only an explicit re-add via
/// [`ItemStore::add`] clears a retirement.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ItemStore {
    active: Vec<Item>,
    retired: BTreeSet<String>,
}

impl ItemStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from persisted collections, re-enforcing the
    /// uniqueness and non-empty-name invariants (first occurrence wins).
    #[must_use]
    pub fn from_parts(active: Vec<Item>, retired: BTreeSet<String>) -> Self {
        let mut store = Self { active: Vec::new(), retired };
        for item in active {
            let normalized = item.normalized_name();
            if normalized.is_empty() || store.contains(&normalized) {
                continue;
            }
            store.active.push(item);
        }
        store
    }

    #[must_use]
    pub fn active(&self) -> &[Item] {
        &self.active
    }

    #[must_use]
    pub fn retired(&self) -> &BTreeSet<String> {
        &self.retired
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.active.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        let normalized = normalize_name(name);
        self.active.iter().any(|item| item.normalized_name() == normalized)
    }

    /// Append a new item to the end of the active list.
    ///
    /// An add of a currently retired name is the explicit override that
    /// clears the retirement.
    ///
    /// # Errors
    /// Returns [`AddRejection`] when the normalized name is empty or already
    /// present (case-insensitive) in the active list; the store is unchanged.
    pub fn add(
        &mut self,
        name: &str,
        prompt: &str,
        answer: Option<&str>,
    ) -> Result<Item, AddRejection> {
        let normalized = normalize_name(name);
        if normalized.is_empty() {
            return Err(AddRejection::EmptyName);
        }
        if self.contains(&normalized) {
            return Err(AddRejection::DuplicateName(normalized));
        }

        self.retired.remove(&normalized);
        let item = Item::new(name, prompt, answer);
        self.active.push(item.clone());
        Ok(item)
    }

    /// Permanently remove the item at `position` and retire its name.
    /// Out-of-range positions are a no-op.
    pub fn remove_at(&mut self, position: usize) -> Option<Item> {
        if position >= self.active.len() {
            return None;
        }
        let removed = self.active.remove(position);
        self.retired.insert(removed.normalized_name());
        Some(removed)
    }

    /// Remove the item matching `name` after a draw. Retirement is not
    /// touched; a consumed item may come back via repopulation or re-add.
    pub fn consume(&mut self, name: &str) -> Option<Item> {
        let normalized = normalize_name(name);
        let position = self.active.iter().position(|item| item.normalized_name() == normalized)?;
        Some(self.active.remove(position))
    }

    /// Replace the active list with `(defaults ++ extra)`, dropping any name
    /// in the retired set. The retired set itself is untouched.
    pub fn reset_to_defaults(&mut self, defaults: &[Item], extra: &[Item]) {
        let mut rebuilt: Vec<Item> = Vec::new();
        for item in defaults.iter().chain(extra) {
            let normalized = item.normalized_name();
            if normalized.is_empty() || self.retired.contains(&normalized) {
                continue;
            }
            if rebuilt.iter().any(|existing| existing.normalized_name() == normalized) {
                continue;
            }
            rebuilt.push(item.clone());
        }
        self.active = rebuilt;
    }

    /// Replace prompt and answer of the item at `position`, preserving its
    /// name and position. Out-of-range positions are a no-op.
    pub fn edit(&mut self, position: usize, prompt: &str, answer: Option<&str>) -> Option<Item> {
        let item = self.active.get_mut(position)?;
        item.prompt = prompt.to_string();
        item.answer = answer.map(str::to_string);
        Some(item.clone())
    }
}

/// Bounded recency log of drawn items, most recent first.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct HistoryLedger {
    entries: Vec<Item>,
}

impl HistoryLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from a persisted snapshot, truncating anything beyond the
    /// capacity bound.
    #[must_use]
    pub fn from_entries(mut entries: Vec<Item>) -> Self {
        entries.truncate(HISTORY_CAPACITY);
        Self { entries }
    }

    #[must_use]
    pub fn entries(&self) -> &[Item] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Prepend a drawn item, evicting the oldest entry past the bound.
    /// Duplicate prompts are allowed; the same prompt drawn twice appears
    /// twice.
    pub fn record(&mut self, item: Item) {
        self.entries.insert(0, item);
        self.entries.truncate(HISTORY_CAPACITY);
    }

    /// Take the unique-by-prompt subset of the ledger (first occurrence in
    /// ledger order wins, so the most recent instance of a duplicated prompt
    /// is kept) and clear the ledger.
    pub fn drain_for_repopulation(&mut self) -> Vec<Item> {
        let mut seen_prompts: BTreeSet<String> = BTreeSet::new();
        let mut unique: Vec<Item> = Vec::new();
        for item in self.entries.drain(..) {
            if seen_prompts.insert(item.prompt.clone()) {
                unique.push(item);
            }
        }
        unique
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Draw one index from a discrete uniform distribution over `0..len`.
/// Each spin is an independent trial: no weighting by history, no memory of
/// past draws.
///
/// # Errors
/// Returns [`WheelError::Validation`] when `len` is zero; callers are
/// expected to guard (the embedding surface disables spins on an empty
/// wheel).
pub fn select_index<R: Rng + ?Sized>(rng: &mut R, len: usize) -> Result<usize, WheelError> {
    if len == 0 {
        return Err(WheelError::Validation(
            "cannot select from an empty item list".to_string(),
        ));
    }
    Ok(rng.gen_range(0..len))
}

/// The four persisted collections, as read back from a snapshot store.
/// `active` distinguishes "never saved" (`None`, first load) from "saved
/// empty" (`Some(vec![])`).
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct PersistedState {
    pub active: Option<Vec<Item>>,
    pub retired: BTreeSet<String>,
    pub history: Vec<Item>,
    pub user_added: Vec<Item>,
}

/// Durable key-value snapshot storage, one entry per collection. Writes are
/// synchronous and best-effort; they are not transactional across
/// collections.
pub trait SnapshotStore {
    /// Read all persisted collections. Implementations fall back to the
    /// default for any malformed or absent snapshot rather than failing.
    ///
    /// # Errors
    /// Returns [`WheelError::Storage`] only for operational failures
    /// (e.g. the backing database cannot be read at all).
    fn load(&mut self) -> Result<PersistedState, WheelError>;

    /// # Errors
    /// Returns [`WheelError::Storage`] when the snapshot cannot be written.
    fn save_active(&mut self, items: &[Item]) -> Result<(), WheelError>;

    /// # Errors
    /// Returns [`WheelError::Storage`] when the snapshot cannot be written.
    fn save_retired(&mut self, names: &BTreeSet<String>) -> Result<(), WheelError>;

    /// # Errors
    /// Returns [`WheelError::Storage`] when the snapshot cannot be written.
    fn save_history(&mut self, items: &[Item]) -> Result<(), WheelError>;

    /// # Errors
    /// Returns [`WheelError::Storage`] when the snapshot cannot be written.
    fn save_user_added(&mut self, items: &[Item]) -> Result<(), WheelError>;
}

/// In-process snapshot store for tests and ephemeral embeddings.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct MemorySnapshotStore {
    pub state: PersistedState,
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&mut self) -> Result<PersistedState, WheelError> {
        Ok(self.state.clone())
    }

    fn save_active(&mut self, items: &[Item]) -> Result<(), WheelError> {
        self.state.active = Some(items.to_vec());
        Ok(())
    }

    fn save_retired(&mut self, names: &BTreeSet<String>) -> Result<(), WheelError> {
        self.state.retired = names.clone();
        Ok(())
    }

    fn save_history(&mut self, items: &[Item]) -> Result<(), WheelError> {
        self.state.history = items.to_vec();
        Ok(())
    }

    fn save_user_added(&mut self, items: &[Item]) -> Result<(), WheelError> {
        self.state.user_added = items.to_vec();
        Ok(())
    }
}

/// One scheduled settlement. The winning index is drawn at spin start over a
/// snapshot of the active list, so mutations during the spin cannot shift
/// which item was hit; the reveal waits for the settlement tick.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PendingSpin {
    snapshot: Vec<Item>,
    winning_index: usize,
    settles_at: u64,
}

impl PendingSpin {
    #[must_use]
    pub fn settles_at(&self) -> u64 {
        self.settles_at
    }

    #[must_use]
    pub fn snapshot(&self) -> &[Item] {
        &self.snapshot
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
enum SpinState {
    Idle,
    Spinning(PendingSpin),
}

/// Orchestrates user actions over the item store, the history ledger, and
/// the selection engine, persisting after every mutation.
///
/// Single-threaded by construction: the embedding surface drives it from one
/// event loop and supplies the logical clock for spin settlement. At most one
/// spin is pending at a time; `start_spin` while Spinning is ignored, while
/// add/remove/edit/clear remain permitted mid-spin.
#[derive(Debug)]
pub struct WheelCoordinator<S: SnapshotStore> {
    store: S,
    items: ItemStore,
    history: HistoryLedger,
    user_added: Vec<Item>,
    defaults: Vec<Item>,
    spin: SpinState,
}

impl<S: SnapshotStore> WheelCoordinator<S> {
    /// Read persisted snapshots and build the coordinator. A present active
    /// snapshot wins; on first load the active list is reconstructed as
    /// `defaults ++ user-added`, minus retired names.
    ///
    /// # Errors
    /// Returns [`WheelError::Storage`] when the store cannot be read.
    pub fn load(mut store: S, defaults: Vec<Item>) -> Result<Self, WheelError> {
        let persisted = store.load()?;
        let items = match persisted.active {
            Some(active) => ItemStore::from_parts(active, persisted.retired),
            None => {
                let mut rebuilt = ItemStore::from_parts(Vec::new(), persisted.retired);
                rebuilt.reset_to_defaults(&defaults, &persisted.user_added);
                rebuilt
            }
        };

        Ok(Self {
            store,
            items,
            history: HistoryLedger::from_entries(persisted.history),
            user_added: persisted.user_added,
            defaults,
            spin: SpinState::Idle,
        })
    }

    #[must_use]
    pub fn active_items(&self) -> &[Item] {
        self.items.active()
    }

    #[must_use]
    pub fn retired_names(&self) -> &BTreeSet<String> {
        self.items.retired()
    }

    #[must_use]
    pub fn history(&self) -> &[Item] {
        self.history.entries()
    }

    #[must_use]
    pub fn is_spinning(&self) -> bool {
        matches!(self.spin, SpinState::Spinning(_))
    }

    #[must_use]
    pub fn pending_spin(&self) -> Option<&PendingSpin> {
        match &self.spin {
            SpinState::Spinning(pending) => Some(pending),
            SpinState::Idle => None,
        }
    }

    /// Add an item; duplicate or empty names are a silent no-op (`Ok(None)`).
    ///
    /// # Errors
    /// Returns [`WheelError::Storage`] when persisting the updated
    /// collections fails; the in-memory add stays applied.
    pub fn add_item(
        &mut self,
        name: &str,
        prompt: &str,
        answer: Option<&str>,
    ) -> Result<Option<Item>, WheelError> {
        let added = match self.items.add(name, prompt, answer) {
            Ok(item) => item,
            Err(_) => return Ok(None),
        };
        self.user_added.push(added.clone());
        self.persist_items()?;
        Ok(Some(added))
    }

    /// Permanently remove the item at `position`, retiring its name.
    ///
    /// # Errors
    /// Returns [`WheelError::Storage`] when persisting fails.
    pub fn remove_item(&mut self, position: usize) -> Result<Option<Item>, WheelError> {
        let Some(removed) = self.items.remove_at(position) else {
            return Ok(None);
        };
        let normalized = removed.normalized_name();
        self.user_added.retain(|item| item.normalized_name() != normalized);
        self.persist_items()?;
        Ok(Some(removed))
    }

    /// Replace prompt/answer at `position`, keeping name and position.
    ///
    /// # Errors
    /// Returns [`WheelError::Storage`] when persisting fails.
    pub fn edit_item(
        &mut self,
        position: usize,
        prompt: &str,
        answer: Option<&str>,
    ) -> Result<Option<Item>, WheelError> {
        let Some(updated) = self.items.edit(position, prompt, answer) else {
            return Ok(None);
        };
        let normalized = updated.normalized_name();
        for entry in &mut self.user_added {
            if entry.normalized_name() == normalized {
                entry.prompt = updated.prompt.clone();
                entry.answer = updated.answer.clone();
            }
        }
        self.store.save_active(self.items.active())?;
        self.store.save_user_added(&self.user_added)?;
        Ok(Some(updated))
    }

    /// Reset the wheel to its configured defaults (minus retired names) and
    /// clear the history ledger and the user-added subset. Retirements
    /// survive: a removed name stays absent until explicitly re-added.
    ///
    /// # Errors
    /// Returns [`WheelError::Storage`] when persisting fails.
    pub fn clear_all(&mut self) -> Result<(), WheelError> {
        self.items.reset_to_defaults(&self.defaults, &[]);
        self.history.clear();
        self.user_added.clear();
        self.persist_items()?;
        self.store.save_history(self.history.entries())?;
        Ok(())
    }

    /// Empty the history ledger without touching the wheel.
    ///
    /// # Errors
    /// Returns [`WheelError::Storage`] when persisting fails.
    pub fn clear_history(&mut self) -> Result<(), WheelError> {
        self.history.clear();
        self.store.save_history(self.history.entries())?;
        Ok(())
    }

    /// Move the unique-by-prompt history entries back onto the end of the
    /// wheel, names preserved as originally assigned, then clear the
    /// history. Items whose name meanwhile re-entered the active list are
    /// dropped by the standard uniqueness check.
    ///
    /// # Errors
    /// Returns [`WheelError::Storage`] when persisting fails.
    pub fn repopulate(&mut self) -> Result<Vec<Item>, WheelError> {
        let drained = self.history.drain_for_repopulation();
        let mut restored = Vec::new();
        for item in drained {
            if let Ok(added) = self.items.add(&item.name, &item.prompt, item.answer.as_deref()) {
                let normalized = added.normalized_name();
                if !self.user_added.iter().any(|entry| entry.normalized_name() == normalized) {
                    self.user_added.push(added.clone());
                }
                restored.push(added);
            }
        }
        // The add path can lift a retirement and it re-registers restored
        // items, so all three item collections need a fresh save.
        self.persist_items()?;
        self.store.save_history(self.history.entries())?;
        Ok(restored)
    }

    /// Begin a spin: snapshot the active list, draw the winning index, and
    /// schedule settlement `SETTLE_DELAY_TICKS` after `now`. Returns `None`
    /// (ignored) when the wheel is empty or a spin is already pending.
    pub fn start_spin<R: Rng + ?Sized>(&mut self, rng: &mut R, now: u64) -> Option<u64> {
        if self.is_spinning() || self.items.is_empty() {
            return None;
        }

        let snapshot = self.items.active().to_vec();
        let winning_index = select_index(rng, snapshot.len()).ok()?;
        let settles_at = now + SETTLE_DELAY_TICKS;
        self.spin = SpinState::Spinning(PendingSpin { snapshot, winning_index, settles_at });
        Some(settles_at)
    }

    /// Fire the pending settlement when due: record the winner in history,
    /// consume it from the active list (a benign no-op if it was removed
    /// mid-spin) and from the user-added subset, persist, and report the
    /// winner for display. Returns `None` while Idle or before the
    /// settlement tick.
    ///
    /// # Errors
    /// Returns [`WheelError::Storage`] when persisting fails; the draw
    /// itself stays applied.
    pub fn settle(&mut self, now: u64) -> Result<Option<Item>, WheelError> {
        let SpinState::Spinning(pending) = &self.spin else {
            return Ok(None);
        };
        if now < pending.settles_at {
            return Ok(None);
        }

        let Some(winner) = pending.snapshot.get(pending.winning_index).cloned() else {
            self.spin = SpinState::Idle;
            return Ok(None);
        };
        self.spin = SpinState::Idle;

        self.history.record(winner.clone());
        let _ = self.items.consume(&winner.name);
        let normalized = winner.normalized_name();
        self.user_added.retain(|item| item.normalized_name() != normalized);
        self.store.save_history(self.history.entries())?;
        self.store.save_active(self.items.active())?;
        self.store.save_user_added(&self.user_added)?;
        Ok(Some(winner))
    }

    fn persist_items(&mut self) -> Result<(), WheelError> {
        self.store.save_active(self.items.active())?;
        self.store.save_retired(self.items.retired())?;
        self.store.save_user_added(&self.user_added)?;
        Ok(())
    }
}
