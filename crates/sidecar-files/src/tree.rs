use crate::filter::{is_system_file, IgnoreRules};
use crate::ScanError;
use sidecar_core::projection::Projection;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Dir,
    File,
    Symlink,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Relative to the tree root; the root itself is the empty path.
    pub path: PathBuf,
    pub name: String,
    pub kind: NodeKind,
    pub size: u64,
    pub modified: Option<SystemTime>,
    pub ignored: bool,
    pub depth: usize,
    parent: Option<usize>,
    children: Option<Vec<usize>>,
}

impl Node {
    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Dir
    }

    pub fn children_loaded(&self) -> bool {
        self.children.is_some()
    }

    fn extension(&self) -> String {
        Path::new(&self.name)
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortMode {
    #[default]
    Name,
    Modified,
    Size,
    Kind,
}

impl SortMode {
    pub fn next(self) -> Self {
        match self {
            SortMode::Name => SortMode::Modified,
            SortMode::Modified => SortMode::Size,
            SortMode::Size => SortMode::Kind,
            SortMode::Kind => SortMode::Name,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SortMode::Name => "name",
            SortMode::Modified => "modified",
            SortMode::Size => "size",
            SortMode::Kind => "kind",
        }
    }

    fn compare(self, a: &Node, b: &Node) -> Ordering {
        let by_name = || {
            a.name
                .to_lowercase()
                .cmp(&b.name.to_lowercase())
                .then_with(|| a.name.cmp(&b.name))
        };
        b.is_dir().cmp(&a.is_dir()).then_with(|| match self {
            SortMode::Name => by_name(),
            SortMode::Modified => b.modified.cmp(&a.modified).then_with(by_name),
            SortMode::Size => b.size.cmp(&a.size).then_with(by_name),
            SortMode::Kind => a.extension().cmp(&b.extension()).then_with(by_name),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeOptions {
    pub sort: SortMode,
    pub show_ignored: bool,
}

/// Directory tree stored as an arena. Children are loaded for expanded
/// directories only; parents are indices, never owners.
#[derive(Debug, Clone)]
pub struct FileTree {
    root: PathBuf,
    options: TreeOptions,
    nodes: Vec<Node>,
    by_path: HashMap<PathBuf, usize>,
    expanded: BTreeSet<PathBuf>,
    order: Vec<PathBuf>,
    index: HashMap<PathBuf, usize>,
    skipped: usize,
}

impl FileTree {
    pub fn empty(root: &Path, options: TreeOptions) -> Self {
        Self {
            root: root.to_path_buf(),
            options,
            nodes: Vec::new(),
            by_path: HashMap::new(),
            expanded: BTreeSet::new(),
            order: Vec::new(),
            index: HashMap::new(),
            skipped: 0,
        }
    }

    /// Reads the root listing plus every directory in `expanded` that still
    /// exists. The resulting expansion set is `expanded` minus vanished paths.
    pub fn build(
        root: &Path,
        options: TreeOptions,
        expanded: &BTreeSet<PathBuf>,
        rules: &IgnoreRules,
    ) -> Result<Self, ScanError> {
        if !root.is_dir() {
            return Err(ScanError::MissingRoot(root.to_path_buf()));
        }
        let mut tree = Self::empty(root, options);
        tree.nodes.push(Node {
            path: PathBuf::new(),
            name: root
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            kind: NodeKind::Dir,
            size: 0,
            modified: None,
            ignored: false,
            depth: 0,
            parent: None,
            children: None,
        });
        tree.by_path.insert(PathBuf::new(), 0);
        tree.load_children(0, rules)
            .map_err(|source| ScanError::Io {
                path: root.to_path_buf(),
                source,
            })?;

        for path in expanded {
            if let Some(idx) = tree.resolve(path, rules) {
                if tree.nodes[idx].is_dir() {
                    tree.ensure_loaded(idx, rules);
                    tree.expanded.insert(path.clone());
                }
            }
        }
        tree.rebuild_order();
        debug!(
            root = %root.display(),
            nodes = tree.nodes.len(),
            visible = tree.order.len(),
            expanded = tree.expanded.len(),
            "tree built"
        );
        Ok(tree)
    }

    /// Finds the node for `path`, loading ancestor listings on the way.
    fn resolve(&mut self, path: &Path, rules: &IgnoreRules) -> Option<usize> {
        let mut current = 0;
        let mut prefix = PathBuf::new();
        for component in path.components() {
            self.ensure_loaded(current, rules);
            prefix.push(component);
            current = *self.by_path.get(&prefix)?;
        }
        Some(current)
    }

    fn ensure_loaded(&mut self, idx: usize, rules: &IgnoreRules) {
        if self.nodes[idx].children.is_some() || !self.nodes[idx].is_dir() {
            return;
        }
        if let Err(err) = self.load_children(idx, rules) {
            warn!(path = %self.nodes[idx].path.display(), error = %err, "cannot list directory");
            self.skipped += 1;
            self.nodes[idx].children = Some(Vec::new());
        }
    }

    fn load_children(&mut self, idx: usize, rules: &IgnoreRules) -> std::io::Result<()> {
        let rel = self.nodes[idx].path.clone();
        let depth = self.nodes[idx].depth + 1;
        let mut children = Vec::new();
        for entry in fs::read_dir(self.root.join(&rel))? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    debug!(error = %err, "skipping unreadable entry");
                    self.skipped += 1;
                    continue;
                }
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_system_file(&name) {
                continue;
            }
            let Ok(file_type) = entry.file_type() else {
                self.skipped += 1;
                continue;
            };
            let kind = if file_type.is_symlink() {
                NodeKind::Symlink
            } else if file_type.is_dir() {
                NodeKind::Dir
            } else {
                NodeKind::File
            };
            let child_rel = rel.join(&name);
            let ignored = rules.is_ignored(&child_rel, kind == NodeKind::Dir);
            if ignored && !self.options.show_ignored {
                continue;
            }
            let (size, modified) = match entry.metadata() {
                Ok(meta) => (meta.len(), meta.modified().ok()),
                Err(_) => (0, None),
            };
            children.push(Node {
                path: child_rel,
                name,
                kind,
                size,
                modified,
                ignored,
                depth,
                parent: Some(idx),
                children: None,
            });
        }
        let sort = self.options.sort;
        children.sort_by(|a, b| sort.compare(a, b));

        let mut ids = Vec::with_capacity(children.len());
        for child in children {
            let id = self.nodes.len();
            self.by_path.insert(child.path.clone(), id);
            self.nodes.push(child);
            ids.push(id);
        }
        self.nodes[idx].children = Some(ids);
        Ok(())
    }

    fn rebuild_order(&mut self) {
        self.order.clear();
        self.index.clear();
        if self.nodes.is_empty() {
            return;
        }
        let mut stack: Vec<usize> = self.child_ids(0).iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id];
            self.index.insert(node.path.clone(), self.order.len());
            self.order.push(node.path.clone());
            if node.is_dir() && self.expanded.contains(&node.path) {
                stack.extend(self.child_ids(id).iter().rev().copied());
            }
        }
    }

    fn child_ids(&self, id: usize) -> &[usize] {
        self.nodes[id].children.as_deref().unwrap_or(&[])
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn options(&self) -> TreeOptions {
        self.options
    }

    /// Effective expansion set: requested paths that still exist.
    pub fn expanded(&self) -> &BTreeSet<PathBuf> {
        &self.expanded
    }

    pub fn is_expanded(&self, path: &Path) -> bool {
        self.expanded.contains(path)
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn get(&self, path: &Path) -> Option<&Node> {
        self.by_path.get(path).map(|id| &self.nodes[*id])
    }

    pub fn parent_of(&self, path: &Path) -> Option<&Node> {
        let node = self.get(path)?;
        node.parent.map(|id| &self.nodes[id])
    }

    pub fn children(&self, path: &Path) -> Vec<&Node> {
        self.by_path
            .get(path)
            .map(|id| self.child_ids(*id).iter().map(|c| &self.nodes[*c]).collect())
            .unwrap_or_default()
    }

    /// Visible rows in display order.
    pub fn rows(&self) -> impl Iterator<Item = &Node> {
        self.order.iter().filter_map(|path| self.get(path))
    }

    pub fn row(&self, index: usize) -> Option<&Node> {
        self.order.get(index).and_then(|path| self.get(path))
    }

    pub fn absolute(&self, rel: &Path) -> PathBuf {
        self.root.join(rel)
    }
}

/// Adds every ancestor of `path` so it becomes visible after the next build.
pub fn reveal(expanded: &mut BTreeSet<PathBuf>, path: &Path) {
    let mut current = path.parent();
    while let Some(dir) = current {
        if dir.as_os_str().is_empty() {
            break;
        }
        expanded.insert(dir.to_path_buf());
        current = dir.parent();
    }
}

impl Projection for FileTree {
    type Id = PathBuf;
    type Record = Node;

    fn lookup(&self, id: &PathBuf) -> Option<&Node> {
        self.get(id)
    }

    fn order(&self) -> &[PathBuf] {
        &self.order
    }

    fn index_of(&self, id: &PathBuf) -> Option<usize> {
        self.index.get(id).copied()
    }
}
