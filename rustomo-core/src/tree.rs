//! Arena-indexed source tree.
//!
//! A [`SourceTree`] mirrors the group/array hierarchy of a scan file without
//! holding any sample data. Nodes live in a flat arena and refer to each
//! other through [`NodeId`] handles, so traversal never needs recursion.

use crate::{Error, Result};
use std::path::{Path, PathBuf};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Handle of a node inside a [`SourceTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// Handle of the root group of every tree.
    pub const ROOT: Self = Self(0);

    /// Returns the arena index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Element type of an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ElementType {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    Bool,
    Text,
    /// Compound, enum or otherwise unsupported element types.
    Other,
}

/// Small value loaded eagerly for scalar and label arrays.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Value {
    Text(String),
    Float(f64),
    Int(i64),
    Bool(bool),
}

impl Value {
    /// Returns the text content, if this is a text value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Returns the value as a float when it is numeric.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::Text(_) | Self::Bool(_) => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(v) => write!(f, "{v:?}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
        }
    }
}

/// One entry of a composed array's virtual-source manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct VirtualSource {
    /// File name as recorded in the manifest (often relative).
    pub file_path: String,
    /// Dataset path inside that file.
    pub internal_path: String,
}

impl VirtualSource {
    pub fn new(file_path: impl Into<String>, internal_path: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            internal_path: internal_path.into(),
        }
    }
}

/// Array metadata. Sample data is never loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayNode {
    pub shape: Vec<usize>,
    pub dtype: ElementType,
    /// Eagerly loaded value for scalars and labels.
    pub value: Option<Value>,
    /// Backing files when the array is itself a virtual view.
    pub virtual_sources: Vec<VirtualSource>,
}

impl ArrayNode {
    /// Creates an array without value or virtual sources.
    #[must_use]
    pub fn new(shape: Vec<usize>, dtype: ElementType) -> Self {
        Self {
            shape,
            dtype,
            value: None,
            virtual_sources: Vec::new(),
        }
    }

    /// Creates a rank-0 text array.
    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        Self::new(Vec::new(), ElementType::Text).with_value(Value::Text(value.into()))
    }

    /// Creates a rank-0 float array.
    #[must_use]
    pub fn float(value: f64) -> Self {
        Self::new(Vec::new(), ElementType::Float64).with_value(Value::Float(value))
    }

    /// Creates a rank-0 integer array.
    #[must_use]
    pub fn int(value: i64) -> Self {
        Self::new(Vec::new(), ElementType::Int64).with_value(Value::Int(value))
    }

    /// Creates a rank-0 boolean array.
    #[must_use]
    pub fn boolean(value: bool) -> Self {
        Self::new(Vec::new(), ElementType::Bool).with_value(Value::Bool(value))
    }

    /// Attaches an eagerly loaded value.
    #[must_use]
    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    /// Attaches a virtual-source manifest.
    #[must_use]
    pub fn with_virtual_sources(mut self, sources: Vec<VirtualSource>) -> Self {
        self.virtual_sources = sources;
        self
    }

    /// Number of dimensions.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Returns true when the array is backed by linked physical files.
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        !self.virtual_sources.is_empty()
    }
}

/// Node payload.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Children in insertion order.
    Group(Vec<NodeId>),
    Array(ArrayNode),
}

#[derive(Debug, Clone)]
struct NodeEntry {
    name: String,
    parent: Option<NodeId>,
    depth: usize,
    kind: NodeKind,
}

/// Hierarchy of named groups and arrays read from one scan file.
#[derive(Debug, Clone)]
pub struct SourceTree {
    file_path: PathBuf,
    nodes: Vec<NodeEntry>,
}

impl SourceTree {
    /// Creates a tree holding only the root group.
    pub fn new<P: AsRef<Path>>(file_path: P) -> Self {
        Self {
            file_path: file_path.as_ref().to_path_buf(),
            nodes: vec![NodeEntry {
                name: String::new(),
                parent: None,
                depth: 0,
                kind: NodeKind::Group(Vec::new()),
            }],
        }
    }

    /// Path of the file this tree was read from.
    #[must_use]
    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Root group handle.
    #[must_use]
    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    /// Total number of nodes including the root.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true when the tree holds only the root.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    /// Adds a child group.
    ///
    /// # Errors
    /// Returns an error if `parent` is not a group of this tree or the name is taken.
    pub fn add_group(&mut self, parent: NodeId, name: &str) -> Result<NodeId> {
        self.insert(parent, name, NodeKind::Group(Vec::new()))
    }

    /// Adds a child array.
    ///
    /// # Errors
    /// Returns an error if `parent` is not a group of this tree or the name is taken.
    pub fn add_array(&mut self, parent: NodeId, name: &str, array: ArrayNode) -> Result<NodeId> {
        self.insert(parent, name, NodeKind::Array(array))
    }

    /// Adds every missing group along `path` and returns the last one.
    ///
    /// # Errors
    /// Returns an error if a component of `path` names an existing array.
    pub fn ensure_groups(&mut self, path: &str) -> Result<NodeId> {
        let mut current = NodeId::ROOT;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            current = match self.child(current, component) {
                Some(id) if self.is_group(id) => id,
                Some(_) => {
                    return Err(Error::MalformedMetadata {
                        path: self.join(current, component),
                        reason: "expected a group, found an array".to_string(),
                    })
                }
                None => self.add_group(current, component)?,
            };
        }
        Ok(current)
    }

    fn insert(&mut self, parent: NodeId, name: &str, kind: NodeKind) -> Result<NodeId> {
        if name.is_empty() || name.contains('/') {
            return Err(Error::Config(format!("invalid node name {name:?}")));
        }
        if self.child(parent, name).is_some() {
            return Err(Error::DuplicateChild {
                parent: self.path(parent),
                name: name.to_string(),
            });
        }
        let depth = self.entry(parent)?.depth + 1;
        if !self.is_group(parent) {
            return Err(Error::MalformedMetadata {
                path: self.path(parent),
                reason: "arrays cannot have children".to_string(),
            });
        }
        let id = NodeId(self.nodes.len());
        if let NodeKind::Group(children) = &mut self.entry_mut(parent)?.kind {
            children.push(id);
        }
        self.nodes.push(NodeEntry {
            name: name.to_string(),
            parent: Some(parent),
            depth,
            kind,
        });
        Ok(id)
    }

    fn entry(&self, id: NodeId) -> Result<&NodeEntry> {
        self.nodes.get(id.0).ok_or(Error::InvalidNode(id.0))
    }

    fn entry_mut(&mut self, id: NodeId) -> Result<&mut NodeEntry> {
        self.nodes.get_mut(id.0).ok_or(Error::InvalidNode(id.0))
    }

    /// Name of a node; empty for the root.
    ///
    /// # Panics
    /// Panics if `id` does not belong to this tree.
    #[must_use]
    pub fn name(&self, id: NodeId) -> &str {
        &self.nodes[id.0].name
    }

    /// Parent group, `None` for the root.
    #[must_use]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id.0).and_then(|n| n.parent)
    }

    /// Distance from the root (root is 0, its children are 1).
    ///
    /// # Panics
    /// Panics if `id` does not belong to this tree.
    #[must_use]
    pub fn depth(&self, id: NodeId) -> usize {
        self.nodes[id.0].depth
    }

    /// Node payload.
    ///
    /// # Panics
    /// Panics if `id` does not belong to this tree.
    #[must_use]
    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.0].kind
    }

    /// Returns the array payload when `id` is an array.
    #[must_use]
    pub fn array(&self, id: NodeId) -> Option<&ArrayNode> {
        match self.nodes.get(id.0).map(|n| &n.kind) {
            Some(NodeKind::Array(array)) => Some(array),
            _ => None,
        }
    }

    /// Returns true when `id` is a group.
    #[must_use]
    pub fn is_group(&self, id: NodeId) -> bool {
        matches!(self.nodes.get(id.0).map(|n| &n.kind), Some(NodeKind::Group(_)))
    }

    /// Children of a group in iteration order; empty for arrays.
    #[must_use]
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        match self.nodes.get(id.0).map(|n| &n.kind) {
            Some(NodeKind::Group(children)) => children,
            _ => &[],
        }
    }

    /// Looks up a direct child by name.
    #[must_use]
    pub fn child(&self, id: NodeId, name: &str) -> Option<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .find(|&c| self.nodes[c.0].name == name)
    }

    /// Absolute path of a node (`/` for the root).
    #[must_use]
    pub fn path(&self, id: NodeId) -> String {
        let mut components = Vec::new();
        let mut current = Some(id);
        while let Some(node) = current {
            let Some(entry) = self.nodes.get(node.0) else {
                break;
            };
            if entry.parent.is_some() {
                components.push(entry.name.as_str());
            }
            current = entry.parent;
        }
        components.reverse();
        format!("/{}", components.join("/"))
    }

    fn join(&self, parent: NodeId, name: &str) -> String {
        let base = self.path(parent);
        if base == "/" {
            format!("/{name}")
        } else {
            format!("{base}/{name}")
        }
    }

    /// Resolves an absolute or root-relative path.
    #[must_use]
    pub fn lookup(&self, path: &str) -> Option<NodeId> {
        path.split('/')
            .filter(|c| !c.is_empty())
            .try_fold(NodeId::ROOT, |current, component| {
                self.child(current, component)
            })
    }

    /// Ancestor at depth 1 enclosing `id`.
    ///
    /// Returns the root for the root itself and for its direct array children.
    #[must_use]
    pub fn top_level_ancestor(&self, id: NodeId) -> NodeId {
        let mut current = id;
        while let Some(parent) = self.parent(current) {
            if parent == NodeId::ROOT {
                return if self.is_group(current) {
                    current
                } else {
                    NodeId::ROOT
                };
            }
            current = parent;
        }
        NodeId::ROOT
    }

    /// Path components of `id` below its top-level ancestor.
    ///
    /// For `/1.1/measurement/pco` this yields `["measurement", "pco"]`.
    #[must_use]
    pub fn path_below_top(&self, id: NodeId) -> Vec<String> {
        self.path(id)
            .split('/')
            .filter(|c| !c.is_empty())
            .skip(1)
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> SourceTree {
        let mut tree = SourceTree::new("/data/scan.h5");
        let scan = tree.add_group(NodeId::ROOT, "1.1").unwrap();
        tree.add_array(scan, "title", ArrayNode::text("tomo:projections"))
            .unwrap();
        let measurement = tree.add_group(scan, "measurement").unwrap();
        tree.add_array(
            measurement,
            "image",
            ArrayNode::new(vec![10, 4, 4], ElementType::UInt16),
        )
        .unwrap();
        tree
    }

    #[test]
    fn test_paths_and_lookup() {
        let tree = sample_tree();
        let image = tree.lookup("/1.1/measurement/image").unwrap();
        assert_eq!(tree.path(image), "/1.1/measurement/image");
        assert_eq!(tree.depth(image), 3);
        assert_eq!(tree.path(NodeId::ROOT), "/");
        assert_eq!(tree.lookup("1.1/title"), tree.lookup("/1.1/title"));
        assert!(tree.lookup("/1.1/missing").is_none());
    }

    #[test]
    fn test_top_level_ancestor() {
        let mut tree = sample_tree();
        let image = tree.lookup("/1.1/measurement/image").unwrap();
        let scan = tree.lookup("/1.1").unwrap();
        assert_eq!(tree.top_level_ancestor(image), scan);
        assert_eq!(tree.top_level_ancestor(scan), scan);

        let loose = tree
            .add_array(NodeId::ROOT, "loose", ArrayNode::float(1.0))
            .unwrap();
        assert_eq!(tree.top_level_ancestor(loose), NodeId::ROOT);
    }

    #[test]
    fn test_path_below_top() {
        let tree = sample_tree();
        let measurement = tree.lookup("/1.1/measurement").unwrap();
        assert_eq!(tree.path_below_top(measurement), vec!["measurement"]);
        let scan = tree.lookup("/1.1").unwrap();
        assert!(tree.path_below_top(scan).is_empty());
    }

    #[test]
    fn test_duplicate_child_rejected() {
        let mut tree = sample_tree();
        let scan = tree.lookup("/1.1").unwrap();
        let err = tree.add_group(scan, "measurement").unwrap_err();
        assert!(matches!(err, Error::DuplicateChild { .. }));
    }

    #[test]
    fn test_array_cannot_have_children() {
        let mut tree = sample_tree();
        let title = tree.lookup("/1.1/title").unwrap();
        assert!(tree.add_group(title, "nested").is_err());
        assert!(tree.ensure_groups("/1.1/title/nested").is_err());
    }

    #[test]
    fn test_ensure_groups_reuses_existing() {
        let mut tree = sample_tree();
        let before = tree.len();
        let measurement = tree.ensure_groups("/1.1/measurement").unwrap();
        assert_eq!(tree.len(), before);
        assert_eq!(tree.path(measurement), "/1.1/measurement");
        let created = tree.ensure_groups("/2.1/instrument").unwrap();
        assert_eq!(tree.path(created), "/2.1/instrument");
        assert_eq!(tree.len(), before + 2);
    }

    #[test]
    fn test_children_keep_insertion_order() {
        let mut tree = SourceTree::new("scan.h5");
        for name in ["zeta", "alpha", "mid"] {
            tree.add_group(NodeId::ROOT, name).unwrap();
        }
        let names: Vec<&str> = tree
            .children(NodeId::ROOT)
            .iter()
            .map(|&c| tree.name(c))
            .collect();
        assert_eq!(names, ["zeta", "alpha", "mid"]);
    }
}
