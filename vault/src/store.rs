//! The in-memory ordered vault.
//!
//! Pinned records always form a contiguous prefix of the sequence. Every
//! mutating operation keeps that property, and loading refuses snapshots that
//! break it. Mutations are reported to subscribed observers after they have
//! been applied.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::{VaultError, VaultResult};
use crate::model::{AccountRecord, AuthenticatorPayload, ProfileUpdate};
use crate::search;

pub type SubscriptionId = u64;

/// Change notifications emitted by [`VaultStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultEvent {
    Added { index: usize },
    Removed { index: usize },
    Moved { from: usize, to: usize },
    Updated { index: usize },
    PinChanged { index: usize, pinned: bool },
    Sorted,
    Reset { len: usize },
}

pub trait VaultObserver: Send + Sync {
    fn on_event(&self, event: &VaultEvent);
}

impl<F> VaultObserver for F
where
    F: Fn(&VaultEvent) + Send + Sync,
{
    fn on_event(&self, event: &VaultEvent) {
        self(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    ProfileId,
    AddedAt,
    UpdatedAt,
    Level,
}

impl SortField {
    fn compare(self, a: &AccountRecord, b: &AccountRecord) -> Ordering {
        match self {
            SortField::ProfileId => a.profile_id.cmp(&b.profile_id),
            SortField::AddedAt => a.added_at.cmp(&b.added_at),
            SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            SortField::Level => a.profile.level.cmp(&b.profile.level),
        }
    }
}

impl FromStr for SortField {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "id" | "profile-id" => Ok(SortField::ProfileId),
            "added" => Ok(SortField::AddedAt),
            "updated" => Ok(SortField::UpdatedAt),
            "level" => Ok(SortField::Level),
            other => Err(format!("unknown sort field '{other}' (expected id, added, updated or level)")),
        }
    }
}

/// Returns `true` when no unpinned record precedes a pinned one.
pub fn is_pinned_prefix(records: &[AccountRecord]) -> bool {
    let pinned = records.iter().take_while(|r| r.pinned).count();
    records[pinned..].iter().all(|r| !r.pinned)
}

#[derive(Default)]
pub struct VaultStore {
    records: Vec<AccountRecord>,
    observers: Vec<(SubscriptionId, Box<dyn VaultObserver>)>,
    next_subscription: SubscriptionId,
}

impl fmt::Debug for VaultStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultStore")
            .field("len", &self.records.len())
            .field("pinned", &self.pinned_count())
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl VaultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from existing records, failing closed on malformed input.
    pub fn from_records(records: Vec<AccountRecord>) -> VaultResult<Self> {
        let mut store = Self::new();
        store.replace_all(records)?;
        Ok(store)
    }

    /// Swaps the whole content, e.g. after a load. Observers stay subscribed.
    pub fn replace_all(&mut self, records: Vec<AccountRecord>) -> VaultResult<()> {
        for record in &records {
            record.validate()?;
        }
        if !is_pinned_prefix(&records) {
            return Err(VaultError::CorruptData("pinned records are not a contiguous prefix".to_string()));
        }
        self.records = records;
        self.emit(VaultEvent::Reset { len: self.records.len() });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[AccountRecord] {
        &self.records
    }

    pub fn get(&self, index: usize) -> Option<&AccountRecord> {
        self.records.get(index)
    }

    pub fn pinned_count(&self) -> usize {
        self.records.iter().take_while(|r| r.pinned).count()
    }

    /// Owned copy of the records for persistence.
    pub fn snapshot(&self) -> Vec<AccountRecord> {
        self.records.clone()
    }

    pub fn subscribe(&mut self, observer: impl VaultObserver + 'static) -> SubscriptionId {
        let id = self.next_subscription;
        self.next_subscription += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(existing, _)| *existing != id);
        self.observers.len() != before
    }

    /// Appends at the end of the unpinned region and returns the new index.
    pub fn add(&mut self, mut record: AccountRecord) -> VaultResult<usize> {
        record.validate()?;
        record.pinned = false;
        record.unpin_index = 0;
        self.records.push(record);
        let index = self.records.len() - 1;
        log::debug!("added account at index {index}");
        self.emit(VaultEvent::Added { index });
        Ok(index)
    }

    /// Removes a record. Records carrying an authenticator are protected.
    pub fn remove(&mut self, index: usize) -> VaultResult<AccountRecord> {
        self.check_index(index)?;
        if self.records[index].has_authenticator() {
            return Err(VaultError::RemovalBlocked { index });
        }
        let record = self.records.remove(index);
        log::debug!("removed account at index {index}");
        self.emit(VaultEvent::Removed { index });
        Ok(record)
    }

    /// Detaches the authenticator so the record can be removed afterwards.
    pub fn take_authenticator(&mut self, index: usize) -> VaultResult<Option<AuthenticatorPayload>> {
        self.check_index(index)?;
        let taken = self.records[index].authenticator.take();
        if taken.is_some() {
            self.emit(VaultEvent::Updated { index });
        }
        Ok(taken)
    }

    pub fn find<P>(&self, predicate: P) -> Option<usize>
    where
        P: FnMut(&AccountRecord) -> bool,
    {
        self.records.iter().position(predicate)
    }

    /// Replaces the record in place. Pin state and position are kept.
    pub fn update(&mut self, index: usize, mut record: AccountRecord) -> VaultResult<()> {
        self.check_index(index)?;
        record.validate()?;
        let current = &self.records[index];
        record.pinned = current.pinned;
        record.unpin_index = current.unpin_index;
        self.records[index] = record;
        self.emit(VaultEvent::Updated { index });
        Ok(())
    }

    /// Applies an enrichment result to the record at `index`.
    pub fn apply_profile(&mut self, index: usize, update: ProfileUpdate) -> VaultResult<()> {
        self.check_index(index)?;
        self.records[index].apply_profile(update);
        self.emit(VaultEvent::Updated { index });
        Ok(())
    }

    /// Pins the record and returns its new index.
    pub fn pin(&mut self, index: usize) -> VaultResult<usize> {
        self.check_index(index)?;
        if self.records[index].pinned {
            return Ok(index);
        }

        let pinned = self.pinned_count();
        if index == pinned {
            self.records[index].unpin_index = 0;
        } else {
            self.records[index].unpin_index = index_u32(index - pinned);
            let record = self.records.remove(index);
            self.records.insert(pinned, record);
            self.emit(VaultEvent::Moved { from: index, to: pinned });
        }

        self.records[pinned].pinned = true;
        log::debug!("pinned account {index} -> {pinned}");
        self.emit(VaultEvent::PinChanged {
            index: pinned,
            pinned: true,
        });
        Ok(pinned)
    }

    /// Unpins the record and moves it to the slot remembered at pin time. A
    /// slot inside the pinned block becomes the first unpinned slot; a slot
    /// past the end becomes the last one. Returns its new index.
    pub fn unpin(&mut self, index: usize) -> VaultResult<usize> {
        self.check_index(index)?;
        if !self.records[index].pinned {
            return Ok(index);
        }

        let len = self.records.len();
        let mut record = self.records.remove(index);
        let first_unpinned = self.pinned_count();
        let remembered = record.unpin_index as usize;
        let target = if remembered >= len {
            len - 1
        } else {
            remembered.max(first_unpinned)
        };

        record.pinned = false;
        record.unpin_index = 0;
        self.records.insert(target, record);

        if target != index {
            self.emit(VaultEvent::Moved { from: index, to: target });
        }
        log::debug!("unpinned account {index} -> {target}");
        self.emit(VaultEvent::PinChanged {
            index: target,
            pinned: false,
        });
        Ok(target)
    }

    /// Stable sort of the unpinned suffix; the pinned prefix is left alone.
    pub fn sort_unpinned(&mut self, field: SortField, descending: bool) {
        let start = self.pinned_count();
        self.records[start..].sort_by(|a, b| {
            let ordering = field.compare(a, b);
            if descending {
                ordering.reverse()
            } else {
                ordering
            }
        });
        self.emit(VaultEvent::Sorted);
    }

    /// Indices of records whose nickname matches `query`, in vault order.
    pub fn search(&self, query: &str) -> Vec<usize> {
        search::search(&self.records, query)
    }

    fn check_index(&self, index: usize) -> VaultResult<()> {
        if index >= self.records.len() {
            return Err(VaultError::IndexOutOfRange {
                index,
                len: self.records.len(),
            });
        }
        Ok(())
    }

    fn emit(&self, event: VaultEvent) {
        for (_, observer) in &self.observers {
            observer.on_event(&event);
        }
    }
}

fn index_u32(index: usize) -> u32 {
    u32::try_from(index).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::{is_pinned_prefix, SortField, VaultEvent, VaultStore};
    use crate::error::VaultError;
    use crate::model::{AccountRecord, AuthenticatorPayload};
    use chrono::{Duration, Utc};
    use proptest::prelude::*;
    use std::sync::{Arc, Mutex};

    fn record(login: &str) -> AccountRecord {
        AccountRecord::new(login, "pw").expect("valid record")
    }

    fn store_of(logins: &[&str]) -> VaultStore {
        let mut store = VaultStore::new();
        for login in logins {
            store.add(record(login)).expect("add");
        }
        store
    }

    fn logins(store: &VaultStore) -> Vec<&str> {
        store.records().iter().map(|r| r.login.as_str()).collect()
    }

    #[test]
    fn pin_then_unpin_restores_position() {
        let mut store = store_of(&["A", "B", "C"]);
        assert_eq!(store.pin(1).expect("pin"), 0);
        assert_eq!(logins(&store), ["B", "A", "C"]);
        assert_eq!(store.records()[0].unpin_index, 1);
        assert!(store.records()[0].pinned);

        assert_eq!(store.unpin(0).expect("unpin"), 1);
        assert_eq!(logins(&store), ["A", "B", "C"]);
        assert!(!store.records()[1].pinned);
        assert_eq!(store.records()[1].unpin_index, 0);
    }

    #[test]
    fn pin_next_to_pinned_block_only_flips_flag() {
        let mut store = store_of(&["A", "B", "C"]);
        store.pin(0).expect("pin");
        assert_eq!(store.pin(1).expect("pin"), 1);
        assert_eq!(logins(&store), ["A", "B", "C"]);
        assert_eq!(store.pinned_count(), 2);
        assert_eq!(store.records()[1].unpin_index, 0);

        // Already pinned is a no-op.
        assert_eq!(store.pin(0).expect("pin"), 0);
        assert_eq!(store.pinned_count(), 2);
    }

    #[test]
    fn unpin_index_is_a_slot_behind_other_pins() {
        let mut store = store_of(&["P", "A", "B", "C"]);
        store.pin(0).expect("pin");
        store.pin(3).expect("pin");
        assert_eq!(logins(&store), ["P", "C", "A", "B"]);
        assert_eq!(store.records()[1].unpin_index, 2);

        assert_eq!(store.unpin(1).expect("unpin"), 2);
        assert_eq!(logins(&store), ["P", "A", "C", "B"]);
        assert!(is_pinned_prefix(store.records()));
    }

    #[test]
    fn unpin_clamps_to_end_after_shrink() {
        let mut store = store_of(&["A", "B", "C", "D"]);
        store.pin(3).expect("pin");
        assert_eq!(store.records()[0].unpin_index, 3);
        store.remove(1).expect("remove");
        store.remove(1).expect("remove");
        assert_eq!(logins(&store), ["D", "C"]);

        assert_eq!(store.unpin(0).expect("unpin"), 1);
        assert_eq!(logins(&store), ["C", "D"]);
    }

    #[test]
    fn unpin_inside_pinned_block_takes_first_unpinned_slot() {
        let mut store = store_of(&["A", "B", "C", "D"]);
        store.pin(0).expect("pin");
        store.pin(1).expect("pin");
        store.pin(3).expect("pin");
        assert_eq!(logins(&store), ["A", "B", "D", "C"]);
        assert_eq!(store.records()[0].unpin_index, 0);

        assert_eq!(store.unpin(0).expect("unpin"), 2);
        assert_eq!(logins(&store), ["B", "D", "A", "C"]);
        assert!(is_pinned_prefix(store.records()));
    }

    #[test]
    fn unpin_degenerate_cases() {
        let mut single = store_of(&["A"]);
        single.pin(0).expect("pin");
        assert_eq!(single.unpin(0).expect("unpin"), 0);
        assert!(!single.records()[0].pinned);

        let mut all = store_of(&["A", "B", "C"]);
        all.pin(0).expect("pin");
        all.pin(1).expect("pin");
        all.pin(2).expect("pin");
        assert_eq!(all.unpin(0).expect("unpin"), 2);
        assert_eq!(logins(&all), ["B", "C", "A"]);
        assert!(is_pinned_prefix(all.records()));
    }

    #[test]
    fn add_lands_after_pinned_block() {
        let mut store = store_of(&["A", "B"]);
        store.pin(1).expect("pin");
        let mut pinned_input = record("C");
        pinned_input.pinned = true;
        assert_eq!(store.add(pinned_input).expect("add"), 2);
        assert!(!store.records()[2].pinned);
        assert_eq!(logins(&store), ["B", "A", "C"]);
    }

    #[test]
    fn remove_is_blocked_by_authenticator() {
        let mut store = store_of(&["A", "B", "C"]);
        let protected = record("X").with_authenticator(AuthenticatorPayload::new("secret").expect("valid"));
        store.add(protected).expect("add");
        let before = store.snapshot();

        let err = store.remove(3).unwrap_err();
        assert!(matches!(err, VaultError::RemovalBlocked { index: 3 }));
        assert_eq!(store.snapshot(), before);

        let taken = store.take_authenticator(3).expect("take");
        assert_eq!(taken.map(|a| a.shared_secret), Some("secret".to_string()));
        assert_eq!(store.remove(3).expect("remove").login, "X");
    }

    #[test]
    fn remove_preserves_order() {
        let mut store = store_of(&["A", "B", "C", "D"]);
        store.remove(1).expect("remove");
        assert_eq!(logins(&store), ["A", "C", "D"]);
        assert!(matches!(store.remove(9), Err(VaultError::IndexOutOfRange { index: 9, len: 3 })));
    }

    #[test]
    fn find_and_update_keep_pin_state() {
        let mut store = store_of(&["A", "B", "C"]);
        store.pin(2).expect("pin");
        let index = store.find(|r| r.login == "C").expect("found");
        assert_eq!(index, 0);

        let replacement = record("C2").with_note("rotated");
        store.update(index, replacement).expect("update");
        let updated = &store.records()[0];
        assert_eq!(updated.login, "C2");
        assert!(updated.pinned);
        assert_eq!(updated.unpin_index, 2);
        assert!(store.find(|r| r.login == "nope").is_none());
    }

    #[test]
    fn sort_touches_only_unpinned_suffix() {
        let now = Utc::now();
        let mut store = VaultStore::new();
        for (login, level, age) in [("A", 5, 3), ("B", 1, 2), ("C", 9, 1), ("D", 1, 0)] {
            let mut r = record(login);
            r.profile.level = Some(level);
            r.added_at = now - Duration::days(age);
            store.add(r).expect("add");
        }
        store.pin(2).expect("pin");
        assert_eq!(logins(&store), ["C", "A", "B", "D"]);

        store.sort_unpinned(SortField::Level, false);
        assert_eq!(logins(&store), ["C", "B", "D", "A"]);

        store.sort_unpinned(SortField::Level, true);
        assert_eq!(logins(&store), ["C", "A", "B", "D"]);

        store.sort_unpinned(SortField::AddedAt, true);
        assert_eq!(logins(&store), ["C", "D", "B", "A"]);
    }

    #[test]
    fn missing_values_sort_first_ascending() {
        let mut store = store_of(&["A", "B", "C"]);
        store.records[0].profile_id = Some(20);
        store.records[2].profile_id = Some(10);
        store.sort_unpinned(SortField::ProfileId, false);
        assert_eq!(logins(&store), ["B", "C", "A"]);
    }

    #[test]
    fn parses_sort_fields() {
        assert_eq!("level".parse::<SortField>(), Ok(SortField::Level));
        assert_eq!("id".parse::<SortField>(), Ok(SortField::ProfileId));
        assert!("nickname".parse::<SortField>().is_err());
    }

    #[test]
    fn observers_see_mutations() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut store = store_of(&["A", "B"]);
        let id = store.subscribe(move |event: &VaultEvent| sink.lock().expect("lock").push(event.clone()));

        store.pin(1).expect("pin");
        store.unpin(0).expect("unpin");
        assert!(store.unsubscribe(id));
        store.add(record("C")).expect("add");

        let events = seen.lock().expect("lock").clone();
        assert_eq!(
            events,
            vec![
                VaultEvent::Moved { from: 1, to: 0 },
                VaultEvent::PinChanged { index: 0, pinned: true },
                VaultEvent::Moved { from: 0, to: 1 },
                VaultEvent::PinChanged { index: 1, pinned: false },
            ]
        );
        assert!(!store.unsubscribe(id));
    }

    #[test]
    fn from_records_fails_closed() {
        let mut bad = vec![record("A"), record("B")];
        bad[1].pinned = true;
        assert!(matches!(VaultStore::from_records(bad), Err(VaultError::CorruptData(_))));

        let mut good = vec![record("A"), record("B")];
        good[0].pinned = true;
        assert_eq!(VaultStore::from_records(good).expect("valid").pinned_count(), 1);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(bool),
        Remove(usize),
        Pin(usize),
        Unpin(usize),
        Sort(bool),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            any::<bool>().prop_map(Op::Add),
            (0usize..12).prop_map(Op::Remove),
            (0usize..12).prop_map(Op::Pin),
            (0usize..12).prop_map(Op::Unpin),
            any::<bool>().prop_map(Op::Sort),
        ]
    }

    proptest! {
        #[test]
        fn pinned_records_stay_a_prefix(ops in prop::collection::vec(op(), 1..60)) {
            let mut store = VaultStore::new();
            for (step, op) in ops.into_iter().enumerate() {
                let before = store.len();
                match op {
                    Op::Add(protected) => {
                        let mut r = record(&format!("acc{step}"));
                        if protected {
                            r = r.with_authenticator(AuthenticatorPayload::new("s").expect("valid"));
                        }
                        store.add(r).expect("add");
                        prop_assert_eq!(store.len(), before + 1);
                    }
                    Op::Remove(i) => {
                        if store.remove(i).is_ok() {
                            prop_assert_eq!(store.len(), before - 1);
                        } else {
                            prop_assert_eq!(store.len(), before);
                        }
                    }
                    Op::Pin(i) => {
                        if let Ok(at) = store.pin(i) {
                            prop_assert!(store.records()[at].pinned);
                        }
                    }
                    Op::Unpin(i) => {
                        if let Ok(at) = store.unpin(i) {
                            prop_assert!(!store.records()[at].pinned);
                        }
                    }
                    Op::Sort(descending) => store.sort_unpinned(SortField::AddedAt, descending),
                }
                prop_assert!(is_pinned_prefix(store.records()));
            }
        }
    }
}
