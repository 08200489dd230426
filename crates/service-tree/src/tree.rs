use std::collections::HashMap;
use std::iter::FusedIterator;

use tracing::debug;

use crate::errors::TreeError;
use crate::model::{ServiceId, ServiceNode};

/// Arena holding every registered service.
///
/// The tree is built once at startup and treated as read-only afterwards, so it
/// is usually shared behind an `Arc` without any locking. Node handles are
/// plain indices into the arena; parent links are assigned at registration
/// time and can never form a cycle.
#[derive(Clone, Debug)]
pub struct ServiceTree {
    nodes: Vec<ServiceNode>,
    by_qualified_name: HashMap<String, ServiceId>,
}

impl ServiceTree {
    /// Creates a tree that only contains its root service.
    pub fn new(root_name: impl Into<String>) -> Result<Self, TreeError> {
        let name = root_name.into();
        validate_name(&name)?;
        let root = ServiceNode {
            id: ServiceId(0),
            qualified_name: name.clone(),
            name,
            parent: None,
            children: Vec::new(),
        };
        let mut by_qualified_name = HashMap::new();
        by_qualified_name.insert(root.qualified_name.clone(), root.id);
        Ok(Self {
            nodes: vec![root],
            by_qualified_name,
        })
    }

    pub fn root(&self) -> ServiceId {
        ServiceId(0)
    }

    /// Registers `name` below `parent` and returns the new handle.
    ///
    /// Direct children of the root are qualified by their own name; deeper
    /// services are qualified as `parent.qualified_name + "." + name`.
    pub fn add_child(
        &mut self,
        parent: ServiceId,
        name: impl Into<String>,
    ) -> Result<ServiceId, TreeError> {
        let name = name.into();
        validate_name(&name)?;
        let parent_node = self
            .nodes
            .get(parent.0)
            .ok_or(TreeError::UnknownParent(parent.0))?;

        if parent_node
            .children
            .iter()
            .any(|child| self.nodes[child.0].name == name)
        {
            return Err(TreeError::DuplicateSibling {
                parent: parent_node.qualified_name.clone(),
                name,
            });
        }

        let qualified_name = if parent_node.is_root() {
            name.clone()
        } else {
            format!("{}.{}", parent_node.qualified_name, name)
        };
        if self.by_qualified_name.contains_key(&qualified_name) {
            return Err(TreeError::DuplicateQualifiedName(qualified_name));
        }

        let id = ServiceId(self.nodes.len());
        debug!(service = %qualified_name, parent = %parent_node.qualified_name, "registered service");
        self.nodes.push(ServiceNode {
            id,
            name,
            qualified_name: qualified_name.clone(),
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent.0].children.push(id);
        self.by_qualified_name.insert(qualified_name, id);
        Ok(id)
    }

    /// Returns the node for a handle issued by this tree.
    ///
    /// # Panics
    ///
    /// Panics if `id` was issued by a different tree.
    pub fn node(&self, id: ServiceId) -> &ServiceNode {
        &self.nodes[id.0]
    }

    pub fn get(&self, id: ServiceId) -> Option<&ServiceNode> {
        self.nodes.get(id.0)
    }

    pub fn by_qualified_name(&self, qualified_name: &str) -> Option<ServiceId> {
        self.by_qualified_name.get(qualified_name).copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Walks from `id` up to and including the root.
    pub fn trace(&self, id: ServiceId) -> Trace<'_> {
        Trace {
            tree: self,
            next: self.get(id).map(|node| node.id),
        }
    }

    /// Pre-order walk over `id` and all of its transitive descendants.
    pub fn travel(&self, id: ServiceId) -> Travel<'_> {
        let stack = match self.get(id) {
            Some(node) => vec![node.id],
            None => Vec::new(),
        };
        Travel { tree: self, stack }
    }

    /// First service in `travel(from)` whose local name equals `name`.
    pub fn find(&self, from: ServiceId, name: &str) -> Option<ServiceId> {
        self.travel(from)
            .find(|node| node.name == name)
            .map(|node| node.id)
    }
}

fn validate_name(name: &str) -> Result<(), TreeError> {
    if name.trim().is_empty() {
        return Err(TreeError::EmptyName);
    }
    if name.contains('.') {
        return Err(TreeError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Iterator returned by [`ServiceTree::trace`].
#[derive(Clone, Debug)]
pub struct Trace<'a> {
    tree: &'a ServiceTree,
    next: Option<ServiceId>,
}

impl<'a> Iterator for Trace<'a> {
    type Item = &'a ServiceNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.tree.nodes.get(self.next?.0)?;
        self.next = node.parent;
        Some(node)
    }
}

impl FusedIterator for Trace<'_> {}

/// Iterator returned by [`ServiceTree::travel`].
#[derive(Clone, Debug)]
pub struct Travel<'a> {
    tree: &'a ServiceTree,
    stack: Vec<ServiceId>,
}

impl<'a> Iterator for Travel<'a> {
    type Item = &'a ServiceNode;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        let node = &self.tree.nodes[id.0];
        // reversed so the first child is visited first
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

impl FusedIterator for Travel<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (ServiceTree, ServiceId, ServiceId, ServiceId) {
        let mut tree = ServiceTree::new("nonebot").unwrap();
        let plugin = tree.add_child(tree.root(), "weather").unwrap();
        let sub = tree.add_child(plugin, "forecast").unwrap();
        let leaf = tree.add_child(sub, "hourly").unwrap();
        (tree, plugin, sub, leaf)
    }

    #[test]
    fn qualified_names_skip_the_root() {
        let (tree, plugin, sub, leaf) = sample();
        assert_eq!(tree.node(tree.root()).qualified_name(), "nonebot");
        assert_eq!(tree.node(plugin).qualified_name(), "weather");
        assert_eq!(tree.node(sub).qualified_name(), "weather.forecast");
        assert_eq!(tree.node(leaf).qualified_name(), "weather.forecast.hourly");
        assert_eq!(tree.by_qualified_name("weather.forecast"), Some(sub));
    }

    #[test]
    fn trace_visits_each_ancestor_once() {
        let (tree, plugin, sub, leaf) = sample();
        let ids: Vec<_> = tree.trace(leaf).map(|node| node.id()).collect();
        assert_eq!(ids, vec![leaf, sub, plugin, tree.root()]);

        // restartable
        assert_eq!(tree.trace(leaf).count(), 4);
        assert_eq!(tree.trace(tree.root()).count(), 1);
    }

    #[test]
    fn travel_is_pre_order() {
        let mut tree = ServiceTree::new("root").unwrap();
        let a = tree.add_child(tree.root(), "a").unwrap();
        let b = tree.add_child(tree.root(), "b").unwrap();
        let a1 = tree.add_child(a, "a1").unwrap();
        let a2 = tree.add_child(a, "a2").unwrap();
        let b1 = tree.add_child(b, "b1").unwrap();

        let ids: Vec<_> = tree.travel(tree.root()).map(|node| node.id()).collect();
        assert_eq!(ids, vec![tree.root(), a, a1, a2, b, b1]);
        let ids: Vec<_> = tree.travel(b).map(|node| node.id()).collect();
        assert_eq!(ids, vec![b, b1]);
    }

    #[test]
    fn find_matches_local_name() {
        let (tree, _, sub, leaf) = sample();
        assert_eq!(tree.find(tree.root(), "forecast"), Some(sub));
        assert_eq!(tree.find(sub, "hourly"), Some(leaf));
        assert_eq!(tree.find(leaf, "forecast"), None);
        assert_eq!(tree.find(tree.root(), "missing"), None);
    }

    #[test]
    fn registration_rejects_duplicates() {
        let (mut tree, plugin, _, _) = sample();
        assert_eq!(
            tree.add_child(plugin, "forecast"),
            Err(TreeError::DuplicateSibling {
                parent: "weather".into(),
                name: "forecast".into()
            })
        );
        assert_eq!(
            tree.add_child(plugin, "a.b"),
            Err(TreeError::InvalidName("a.b".into()))
        );
        assert_eq!(tree.add_child(plugin, " "), Err(TreeError::EmptyName));
        assert_eq!(
            tree.add_child(ServiceId(99), "x"),
            Err(TreeError::UnknownParent(99))
        );
    }

    #[test]
    fn child_named_like_root_collides() {
        let mut tree = ServiceTree::new("nonebot").unwrap();
        let root = tree.root();
        assert_eq!(
            tree.add_child(root, "nonebot"),
            Err(TreeError::DuplicateQualifiedName("nonebot".into()))
        );
    }

    #[test]
    fn children_point_back_to_parent() {
        let (tree, _, _, _) = sample();
        for node in tree.travel(tree.root()) {
            for child in node.children() {
                assert_eq!(tree.node(*child).parent(), Some(node.id()));
            }
        }
    }
}
