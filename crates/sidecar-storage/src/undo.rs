use crate::{Note, NoteStore, StorageError};
use std::collections::VecDeque;

pub const UNDO_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoAction {
    Delete,
    /// Archive state before the toggle.
    Archive { was_archived: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoEntry {
    pub note_id: String,
    pub title: String,
    pub action: UndoAction,
}

impl UndoEntry {
    pub fn deleted(note: &Note) -> Self {
        Self {
            note_id: note.id.clone(),
            title: note.title.clone(),
            action: UndoAction::Delete,
        }
    }

    pub fn archived(note_before: &Note) -> Self {
        Self {
            note_id: note_before.id.clone(),
            title: note_before.title.clone(),
            action: UndoAction::Archive {
                was_archived: note_before.archived,
            },
        }
    }

    pub fn describe(&self) -> String {
        match self.action {
            UndoAction::Delete => format!("restored \"{}\"", self.title),
            UndoAction::Archive { was_archived: true } => format!("re-archived \"{}\"", self.title),
            UndoAction::Archive { was_archived: false } => {
                format!("unarchived \"{}\"", self.title)
            }
        }
    }

    /// Issues the inverse mutation, which is logged like any other write.
    pub fn apply(&self, store: &mut NoteStore) -> Result<Note, StorageError> {
        match self.action {
            UndoAction::Delete => store.restore(&self.note_id),
            UndoAction::Archive { was_archived } => store.set_archived(&self.note_id, was_archived),
        }
    }
}

/// Most recent entry last; the oldest is evicted past `UNDO_LIMIT`.
#[derive(Debug, Clone, Default)]
pub struct UndoStack {
    entries: VecDeque<UndoEntry>,
}

impl UndoStack {
    pub fn push(&mut self, entry: UndoEntry) {
        if self.entries.len() == UNDO_LIMIT {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn pop(&mut self) -> Option<UndoEntry> {
        self.entries.pop_back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NoteView;

    #[derive(Debug, PartialEq)]
    struct Shape {
        id: String,
        title: String,
        content: String,
        pinned: bool,
        archived: bool,
        deleted: bool,
    }

    fn shapes(store: &NoteStore, view: NoteView) -> Vec<Shape> {
        store
            .list(view)
            .expect("list")
            .notes
            .into_iter()
            .map(|note| Shape {
                deleted: note.is_deleted(),
                id: note.id,
                title: note.title,
                content: note.content,
                pinned: note.pinned,
                archived: note.archived,
            })
            .collect()
    }

    fn seeded() -> (NoteStore, Note) {
        let mut store = NoteStore::open_in_memory().expect("open");
        store.create("first", "one").expect("create");
        let target = store.create("second", "two").expect("create");
        store.toggle_pin(&target.id).expect("pin");
        let target = store.get(&target.id).expect("get").expect("note");
        (store, target)
    }

    #[test]
    fn delete_then_undo_restores_projection() {
        let (mut store, target) = seeded();
        let before = shapes(&store, NoteView::Active);
        let log_before = store.action_log_count().expect("count");

        let mut undo = UndoStack::default();
        store.delete(&target.id).expect("delete");
        undo.push(UndoEntry::deleted(&target));
        assert_eq!(shapes(&store, NoteView::Active).len(), 1);

        let entry = undo.pop().expect("entry");
        entry.apply(&mut store).expect("undo");

        assert_eq!(shapes(&store, NoteView::Active), before);
        assert_eq!(store.action_log_count().expect("count"), log_before + 2);
        assert!(shapes(&store, NoteView::Deleted).is_empty());
    }

    #[test]
    fn archive_then_undo_restores_projection() {
        let (mut store, target) = seeded();
        let before = shapes(&store, NoteView::Active);
        let log_before = store.action_log_count().expect("count");

        let mut undo = UndoStack::default();
        undo.push(UndoEntry::archived(&target));
        store.toggle_archive(&target.id).expect("archive");
        assert_eq!(shapes(&store, NoteView::Archived).len(), 1);

        undo.pop().expect("entry").apply(&mut store).expect("undo");

        assert_eq!(shapes(&store, NoteView::Active), before);
        assert!(shapes(&store, NoteView::Archived).is_empty());
        assert_eq!(store.action_log_count().expect("count"), log_before + 2);
    }

    #[test]
    fn stack_is_bounded() {
        let mut undo = UndoStack::default();
        for index in 0..(UNDO_LIMIT + 5) {
            undo.push(UndoEntry {
                note_id: format!("nt-{index:08x}"),
                title: String::new(),
                action: UndoAction::Delete,
            });
        }
        assert_eq!(undo.len(), UNDO_LIMIT);
        assert_eq!(
            undo.pop().map(|entry| entry.note_id),
            Some(format!("nt-{:08x}", UNDO_LIMIT + 4))
        );
    }
}
