use crate::epoch::{Generation, GenerationCounter};
use std::collections::{BTreeSet, HashMap};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Read side shared by every in-memory model a plugin derives from its source.
pub trait Projection: Send + Sync + 'static {
    type Id: Clone + Eq + Hash + Ord + Debug + Send + Sync;
    type Record;

    fn lookup(&self, id: &Self::Id) -> Option<&Self::Record>;

    /// Ids in display order.
    fn order(&self) -> &[Self::Id];

    fn index_of(&self, id: &Self::Id) -> Option<usize>;

    fn len(&self) -> usize {
        self.order().len()
    }

    fn is_empty(&self) -> bool {
        self.order().is_empty()
    }

    fn contains(&self, id: &Self::Id) -> bool {
        self.lookup(id).is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Delta<Id> {
    pub added: Vec<Id>,
    pub removed: Vec<Id>,
    /// Ids present in both whose relative order changed.
    pub moved: Vec<Id>,
}

impl<Id> Delta<Id> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.moved.is_empty()
    }
}

pub fn delta<P: Projection>(previous: &P, current: &P) -> Delta<P::Id> {
    let added: Vec<P::Id> = current
        .order()
        .iter()
        .filter(|id| !previous.contains(id))
        .cloned()
        .collect();
    let removed: Vec<P::Id> = previous
        .order()
        .iter()
        .filter(|id| !current.contains(id))
        .cloned()
        .collect();

    let common_prev: Vec<&P::Id> = previous
        .order()
        .iter()
        .filter(|id| current.contains(id))
        .collect();
    let common_cur: Vec<&P::Id> = current
        .order()
        .iter()
        .filter(|id| previous.contains(id))
        .collect();
    let moved = common_cur
        .iter()
        .zip(common_prev.iter())
        .filter(|(cur, prev)| cur != prev)
        .map(|(cur, _)| (*cur).clone())
        .collect();

    Delta {
        added,
        removed,
        moved,
    }
}

/// Publish-once holder: readers clone an `Arc` and never observe a partially
/// built projection.
pub struct ProjectionStore<P> {
    current: RwLock<Arc<P>>,
    version: AtomicU64,
    generations: Mutex<GenerationCounter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildTicket {
    pub generation: Generation,
}

impl<P: Projection> ProjectionStore<P> {
    pub fn new(initial: P) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
            version: AtomicU64::new(0),
            generations: Mutex::new(GenerationCounter::default()),
        }
    }

    pub fn snapshot(&self) -> Arc<P> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn install(&self, next: P) -> u64 {
        self.install_arc(Arc::new(next))
    }

    pub fn install_arc(&self, next: Arc<P>) -> u64 {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *guard = next;
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Builds from the current snapshot; on error the previous projection stays.
    pub fn rebuild<E, F>(&self, build: F) -> Result<u64, E>
    where
        F: FnOnce(&P) -> Result<P, E>,
    {
        let previous = self.snapshot();
        let next = build(&previous)?;
        Ok(self.install(next))
    }

    pub fn begin_rebuild(&self) -> RebuildTicket {
        let mut generations = self
            .generations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        RebuildTicket {
            generation: generations.begin(),
        }
    }

    pub fn is_current(&self, ticket: RebuildTicket) -> bool {
        self.generations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_current(ticket.generation)
    }

    /// Installs only if no newer rebuild was requested since `ticket`.
    pub fn install_if_current(&self, ticket: RebuildTicket, next: Arc<P>) -> Option<u64> {
        let generations = self
            .generations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !generations.is_current(ticket.generation) {
            return None;
        }
        drop(generations);
        Some(self.install_arc(next))
    }
}

pub trait Record {
    fn record_id(&self) -> &str;
}

/// Ordered list with an id index; the order is fixed at construction.
#[derive(Debug, Clone)]
pub struct ListProjection<R> {
    records: Vec<R>,
    order: Vec<String>,
    index: HashMap<String, usize>,
}

impl<R> Default for ListProjection<R> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            order: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<R: Record> ListProjection<R> {
    /// Keeps the first record for a duplicated id.
    pub fn new(records: Vec<R>) -> Self {
        let mut kept = Vec::with_capacity(records.len());
        let mut order = Vec::with_capacity(records.len());
        let mut index = HashMap::with_capacity(records.len());
        for record in records {
            let id = record.record_id().to_string();
            if index.contains_key(&id) {
                continue;
            }
            index.insert(id.clone(), kept.len());
            order.push(id);
            kept.push(record);
        }
        Self {
            records: kept,
            order,
            index,
        }
    }

    pub fn sorted_by<F>(mut records: Vec<R>, compare: F) -> Self
    where
        F: FnMut(&R, &R) -> std::cmp::Ordering,
    {
        records.sort_by(compare);
        Self::new(records)
    }

    pub fn records(&self) -> &[R] {
        &self.records
    }

    pub fn get(&self, index: usize) -> Option<&R> {
        self.records.get(index)
    }
}

impl<R: Record + Send + Sync + 'static> Projection for ListProjection<R> {
    type Id = String;
    type Record = R;

    fn lookup(&self, id: &String) -> Option<&R> {
        self.index.get(id).and_then(|idx| self.records.get(*idx))
    }

    fn order(&self) -> &[String] {
        &self.order
    }

    fn index_of(&self, id: &String) -> Option<usize> {
        self.index.get(id).copied()
    }
}

/// UI bits that must survive a rebuild; ids missing from the new projection
/// are dropped on `reapply`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreservedState<Id: Ord + Hash> {
    pub selected: Option<Id>,
    pub selected_index: usize,
    pub scroll: usize,
    pub expanded: BTreeSet<Id>,
    pub tab_scroll: HashMap<Id, usize>,
    pub clipboard: Option<Id>,
}

impl<Id: Ord + Hash> Default for PreservedState<Id> {
    fn default() -> Self {
        Self {
            selected: None,
            selected_index: 0,
            scroll: 0,
            expanded: BTreeSet::new(),
            tab_scroll: HashMap::new(),
            clipboard: None,
        }
    }
}

impl<Id: Clone + Eq + Hash + Ord + Debug + Send + Sync> PreservedState<Id> {
    pub fn reapply<P: Projection<Id = Id>>(&mut self, projection: &P) {
        self.expanded.retain(|id| projection.contains(id));
        self.tab_scroll.retain(|id, _| projection.contains(id));
        if self
            .clipboard
            .as_ref()
            .is_some_and(|id| !projection.contains(id))
        {
            self.clipboard = None;
        }

        let order = projection.order();
        match self.selected.as_ref().and_then(|id| projection.index_of(id)) {
            Some(index) => self.selected_index = index,
            None => {
                if order.is_empty() {
                    self.selected = None;
                    self.selected_index = 0;
                } else {
                    self.selected_index = self.selected_index.min(order.len() - 1);
                    self.selected = order.get(self.selected_index).cloned();
                }
            }
        }
        if self.scroll > self.selected_index {
            self.scroll = self.selected_index;
        }
    }

    pub fn select_index<P: Projection<Id = Id>>(&mut self, projection: &P, index: usize) {
        let order = projection.order();
        if order.is_empty() {
            self.selected = None;
            self.selected_index = 0;
            return;
        }
        let index = index.min(order.len() - 1);
        self.selected_index = index;
        self.selected = order.get(index).cloned();
    }

    pub fn move_selection<P: Projection<Id = Id>>(&mut self, projection: &P, delta: isize) {
        let len = projection.len();
        if len == 0 {
            return;
        }
        let next = (self.selected_index as isize + delta).clamp(0, len as isize - 1);
        self.select_index(projection, next as usize);
    }

    /// Keeps the selection inside a viewport of `height` rows.
    pub fn follow_selection(&mut self, height: usize) {
        if height == 0 {
            return;
        }
        if self.selected_index < self.scroll {
            self.scroll = self.selected_index;
        } else if self.selected_index >= self.scroll + height {
            self.scroll = self.selected_index + 1 - height;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[derive(Debug, Clone, PartialEq)]
    struct Row {
        id: String,
        rank: u32,
    }

    impl Record for Row {
        fn record_id(&self) -> &str {
            &self.id
        }
    }

    fn rows(ids: &[&str]) -> Vec<Row> {
        ids.iter()
            .enumerate()
            .map(|(rank, id)| Row {
                id: id.to_string(),
                rank: rank as u32,
            })
            .collect()
    }

    #[test]
    fn index_and_order_agree() {
        let projection = ListProjection::new(rows(&["a", "b", "a", "c"]));
        assert_eq!(projection.len(), 3);
        for (position, id) in projection.order().iter().enumerate() {
            assert_eq!(projection.lookup(id).map(|r| r.id.as_str()), Some(id.as_str()));
            assert_eq!(projection.index_of(id), Some(position));
        }
        assert_eq!(projection.lookup(&"a".to_string()).map(|r| r.rank), Some(0));
    }

    #[test]
    fn delta_reports_added_removed_and_moved() {
        let before = ListProjection::new(rows(&["a", "b", "c", "d"]));
        let after = ListProjection::new(rows(&["b", "a", "c", "e"]));
        let diff = delta(&before, &after);
        assert_eq!(diff.added, vec!["e".to_string()]);
        assert_eq!(diff.removed, vec!["d".to_string()]);
        assert_eq!(diff.moved, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn insertion_alone_is_not_a_move() {
        let before = ListProjection::new(rows(&["a", "b"]));
        let after = ListProjection::new(rows(&["new", "a", "b"]));
        let diff = delta(&before, &after);
        assert!(diff.moved.is_empty());
        assert_eq!(diff.added, vec!["new".to_string()]);
    }

    #[test]
    fn failed_rebuild_keeps_previous_projection() {
        let store = ProjectionStore::new(ListProjection::new(rows(&["a"])));
        let result: Result<u64, &str> = store.rebuild(|_| Err("source unreadable"));
        assert!(result.is_err());
        assert_eq!(store.version(), 0);
        assert_eq!(store.snapshot().order(), &["a".to_string()]);
    }

    #[test]
    fn superseded_rebuild_is_not_installed() {
        let store = ProjectionStore::new(ListProjection::<Row>::default());
        let older = store.begin_rebuild();
        let newer = store.begin_rebuild();
        assert!(!store.is_current(older));
        assert!(store.is_current(newer));

        assert!(store
            .install_if_current(older, Arc::new(ListProjection::new(rows(&["old"]))))
            .is_none());
        assert_eq!(
            store.install_if_current(newer, Arc::new(ListProjection::new(rows(&["new"])))),
            Some(1)
        );
        assert_eq!(store.snapshot().order(), &["new".to_string()]);
    }

    #[test]
    fn readers_see_whole_projections_during_rebuilds() {
        let full: Vec<String> = (0..200).map(|i| format!("id-{i}")).collect();
        let ids: Vec<&str> = full.iter().map(String::as_str).collect();
        let store = Arc::new(ProjectionStore::new(ListProjection::new(rows(&ids))));

        let reader_store = Arc::clone(&store);
        let reader = thread::spawn(move || {
            for _ in 0..2_000 {
                let snapshot = reader_store.snapshot();
                let len = snapshot.len();
                assert!(len == 200 || len == 100, "observed partial projection of {len}");
            }
        });

        for round in 0..200 {
            let size = if round % 2 == 0 { 100 } else { 200 };
            let next: Vec<&str> = ids.iter().take(size).copied().collect();
            store.install(ListProjection::new(rows(&next)));
        }
        reader.join().expect("reader thread");
    }

    #[test]
    fn preserved_state_drops_missing_ids_and_clamps_selection() {
        let before = ListProjection::new(rows(&["a", "b", "c"]));
        let mut state = PreservedState::<String>::default();
        state.select_index(&before, 2);
        state.expanded.insert("a".to_string());
        state.expanded.insert("c".to_string());
        state.tab_scroll.insert("c".to_string(), 14);

        let after = ListProjection::new(rows(&["a", "b"]));
        state.reapply(&after);

        assert_eq!(state.selected.as_deref(), Some("b"));
        assert_eq!(state.selected_index, 1);
        assert_eq!(state.expanded.iter().cloned().collect::<Vec<_>>(), vec!["a"]);
        assert!(state.tab_scroll.is_empty());
    }

    #[test]
    fn follow_selection_scrolls_viewport() {
        let projection = ListProjection::new(rows(&["a", "b", "c", "d", "e"]));
        let mut state = PreservedState::<String>::default();
        state.select_index(&projection, 4);
        state.follow_selection(2);
        assert_eq!(state.scroll, 3);
        state.move_selection(&projection, -4);
        state.follow_selection(2);
        assert_eq!(state.scroll, 0);
    }
}
