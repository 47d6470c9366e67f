#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabMode {
    /// Replaced by the next selection.
    Preview,
    /// Survives selection changes until closed.
    Pinned,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tab<Id, C = ()> {
    pub target: Id,
    pub mode: TabMode,
    pub scroll: usize,
    pub h_scroll: usize,
    pub cache: Option<C>,
    /// Supervisor session name while the target is being edited inline.
    pub edit_session: Option<String>,
}

impl<Id, C> Tab<Id, C> {
    fn new(target: Id, mode: TabMode) -> Self {
        Self {
            target,
            mode,
            scroll: 0,
            h_scroll: 0,
            cache: None,
            edit_session: None,
        }
    }

    pub fn is_pinned(&self) -> bool {
        self.mode == TabMode::Pinned
    }
}

#[derive(Debug, Clone)]
pub struct TabSet<Id, C = ()> {
    tabs: Vec<Tab<Id, C>>,
    active: usize,
}

impl<Id, C> Default for TabSet<Id, C> {
    fn default() -> Self {
        Self {
            tabs: Vec::new(),
            active: 0,
        }
    }
}

impl<Id: Clone + PartialEq, C> TabSet<Id, C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }

    pub fn tabs(&self) -> &[Tab<Id, C>] {
        &self.tabs
    }

    pub fn active_index(&self) -> Option<usize> {
        if self.tabs.is_empty() {
            None
        } else {
            Some(self.active)
        }
    }

    pub fn active(&self) -> Option<&Tab<Id, C>> {
        self.tabs.get(self.active)
    }

    pub fn active_mut(&mut self) -> Option<&mut Tab<Id, C>> {
        self.tabs.get_mut(self.active)
    }

    pub fn find(&self, target: &Id) -> Option<usize> {
        self.tabs.iter().position(|tab| &tab.target == target)
    }

    pub fn get_mut(&mut self, target: &Id) -> Option<&mut Tab<Id, C>> {
        self.tabs.iter_mut().find(|tab| &tab.target == target)
    }

    pub fn set_active(&mut self, index: usize) -> bool {
        if index < self.tabs.len() {
            self.active = index;
            true
        } else {
            false
        }
    }

    /// Selection changed: show `target` in the preview slot. Existing tabs for
    /// the target are activated instead.
    pub fn preview(&mut self, target: Id) -> usize {
        if let Some(index) = self.find(&target) {
            self.active = index;
            return index;
        }
        match self.tabs.iter().position(|tab| tab.mode == TabMode::Preview) {
            Some(index) => {
                self.tabs[index] = Tab::new(target, TabMode::Preview);
                self.active = index;
                index
            }
            None => {
                self.tabs.push(Tab::new(target, TabMode::Preview));
                self.active = self.tabs.len() - 1;
                self.active
            }
        }
    }

    /// Explicit open: promotes a previewed target, otherwise adds a pinned tab.
    pub fn open(&mut self, target: Id) -> usize {
        if let Some(index) = self.find(&target) {
            self.tabs[index].mode = TabMode::Pinned;
            self.active = index;
            return index;
        }
        self.tabs.push(Tab::new(target, TabMode::Pinned));
        self.active = self.tabs.len() - 1;
        self.active
    }

    pub fn close(&mut self, index: usize) -> Option<Tab<Id, C>> {
        if index >= self.tabs.len() {
            return None;
        }
        let removed = self.tabs.remove(index);
        if index < self.active || self.active >= self.tabs.len() {
            self.active = self.active.saturating_sub(1);
        }
        Some(removed)
    }

    pub fn close_active(&mut self) -> Option<Tab<Id, C>> {
        if self.tabs.is_empty() {
            return None;
        }
        self.close(self.active)
    }

    pub fn next(&mut self) {
        if !self.tabs.is_empty() {
            self.active = (self.active + 1) % self.tabs.len();
        }
    }

    pub fn prev(&mut self) {
        if !self.tabs.is_empty() {
            self.active = (self.active + self.tabs.len() - 1) % self.tabs.len();
        }
    }

    /// Drops tabs whose target no longer resolves and returns them so owned
    /// edit sessions can be released. The active tab stays on the same target
    /// when it survives.
    pub fn retain_targets<F>(&mut self, mut exists: F) -> Vec<Tab<Id, C>>
    where
        F: FnMut(&Id) -> bool,
    {
        let active_target = self.active().map(|tab| tab.target.clone());
        let mut removed = Vec::new();
        let mut kept = Vec::with_capacity(self.tabs.len());
        let mut removed_before_active = 0;
        for (index, tab) in self.tabs.drain(..).enumerate() {
            if exists(&tab.target) {
                kept.push(tab);
            } else {
                if index < self.active {
                    removed_before_active += 1;
                }
                removed.push(tab);
            }
        }
        self.tabs = kept;

        if self.tabs.is_empty() {
            self.active = 0;
            return removed;
        }
        self.active = match active_target.and_then(|target| self.find(&target)) {
            Some(index) => index,
            None => self
                .active
                .saturating_sub(removed_before_active)
                .min(self.tabs.len() - 1),
        };
        removed
    }

    /// Points a tab at a renamed target, keeping its scroll and session.
    pub fn retarget(&mut self, from: &Id, to: Id) -> bool {
        match self.get_mut(from) {
            Some(tab) => {
                tab.target = to;
                tab.cache = None;
                true
            }
            None => false,
        }
    }

    pub fn clear_caches(&mut self) {
        for tab in &mut self.tabs {
            tab.cache = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn targets(set: &TabSet<&'static str>) -> Vec<&'static str> {
        set.tabs().iter().map(|tab| tab.target).collect()
    }

    #[test]
    fn preview_replaces_previous_preview_tab() {
        let mut set = TabSet::<&str>::new();
        set.preview("a.txt");
        set.preview("b.txt");
        assert_eq!(targets(&set), vec!["b.txt"]);
        assert_eq!(set.active().map(|tab| tab.mode), Some(TabMode::Preview));
    }

    #[test]
    fn opening_previewed_target_pins_it() {
        let mut set = TabSet::<&str>::new();
        set.preview("a.txt");
        set.open("a.txt");
        assert_eq!(set.len(), 1);
        assert!(set.active().is_some_and(|tab| tab.is_pinned()));

        set.preview("b.txt");
        assert_eq!(targets(&set), vec!["a.txt", "b.txt"]);
        assert_eq!(set.active_index(), Some(1));
    }

    #[test]
    fn surviving_tabs_keep_scroll_and_session() {
        let mut set = TabSet::<&str>::new();
        set.open("keep.rs");
        set.open("gone.rs");
        set.open("also.rs");
        if let Some(tab) = set.get_mut(&"keep.rs") {
            tab.scroll = 42;
            tab.edit_session = Some("sidecar-edit-1".to_string());
        }
        set.set_active(2);

        let removed = set.retain_targets(|target| *target != "gone.rs");

        assert_eq!(removed.len(), 1);
        assert_eq!(targets(&set), vec!["keep.rs", "also.rs"]);
        assert_eq!(set.active().map(|tab| tab.target), Some("also.rs"));
        let kept = &set.tabs()[0];
        assert_eq!(kept.scroll, 42);
        assert_eq!(kept.edit_session.as_deref(), Some("sidecar-edit-1"));
    }

    #[test]
    fn active_index_stays_in_bounds_when_active_tab_vanishes() {
        let mut set = TabSet::<&str>::new();
        set.open("a");
        set.open("b");
        set.open("c");
        set.set_active(2);
        set.retain_targets(|target| *target == "a");
        assert_eq!(set.active_index(), Some(0));

        set.retain_targets(|_| false);
        assert!(set.is_empty());
        assert_eq!(set.active_index(), None);
    }

    #[test]
    fn close_before_active_shifts_active() {
        let mut set = TabSet::<&str>::new();
        set.open("a");
        set.open("b");
        set.open("c");
        set.close(0);
        assert_eq!(set.active().map(|tab| tab.target), Some("c"));
        set.close_active();
        assert_eq!(set.active().map(|tab| tab.target), Some("b"));
    }

    #[test]
    fn tab_cycling_wraps() {
        let mut set = TabSet::<&str>::new();
        set.open("a");
        set.open("b");
        set.next();
        assert_eq!(set.active_index(), Some(0));
        set.prev();
        assert_eq!(set.active_index(), Some(1));
    }
}
