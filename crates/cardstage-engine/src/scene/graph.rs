use super::node::{Node, NodeId, NodeKind};

/// Errors from structural scene edits.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SceneError {
    #[error("node {0:?} does not exist")]
    UnknownNode(NodeId),
    #[error("node {0:?} is not a container")]
    NotAContainer(NodeId),
    #[error("the root node cannot be removed")]
    RootRemoval,
    #[error("child index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("new container nodes must start without children")]
    PrepopulatedContainer,
}

#[derive(Debug)]
struct Entry {
    generation: u32,
    node: Option<Node>,
}

/// Arena of nodes forming one tree under a root container.
///
/// Ids are generational: an id of a removed node never resolves again, even
/// after its storage is reused.
#[derive(Debug)]
pub struct Scene {
    entries: Vec<Entry>,
    free: Vec<u32>,
    root: NodeId,
    live: usize,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    pub fn new() -> Self {
        let root = NodeId { index: 0, generation: 0 };
        Self {
            entries: vec![Entry { generation: 0, node: Some(Node::container()) }],
            free: Vec::new(),
            root,
            live: 1,
        }
    }

    #[inline]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Number of live nodes, root included.
    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    #[inline]
    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        let e = self.entries.get(id.index as usize)?;
        if e.generation != id.generation {
            return None;
        }
        e.node.as_ref()
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        let e = self.entries.get_mut(id.index as usize)?;
        if e.generation != id.generation {
            return None;
        }
        e.node.as_mut()
    }

    /// Children of a container; empty for leaves and unknown ids.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        match self.node(id).map(|n| &n.kind) {
            Some(NodeKind::Container(children)) => children,
            _ => &[],
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id)?.parent
    }

    /// Appends `node` as the topmost child of `parent`.
    pub fn add_child(&mut self, parent: NodeId, node: Node) -> Result<NodeId, SceneError> {
        let len = self.children(parent).len();
        self.insert_child(parent, len, node)
    }

    /// Inserts `node` at `index` among the children of `parent` (0 = bottom).
    pub fn insert_child(&mut self, parent: NodeId, index: usize, mut node: Node) -> Result<NodeId, SceneError> {
        if matches!(&node.kind, NodeKind::Container(children) if !children.is_empty()) {
            return Err(SceneError::PrepopulatedContainer);
        }

        match self.node(parent).map(|n| &n.kind) {
            None => return Err(SceneError::UnknownNode(parent)),
            Some(NodeKind::Container(children)) if index > children.len() => {
                return Err(SceneError::IndexOutOfRange { index, len: children.len() });
            }
            Some(NodeKind::Container(_)) => {}
            Some(_) => return Err(SceneError::NotAContainer(parent)),
        }

        node.parent = Some(parent);
        let id = self.alloc(node);

        if let Some(Node { kind: NodeKind::Container(children), .. }) = self.node_mut(parent) {
            children.insert(index, id);
        }
        Ok(id)
    }

    /// Detaches `id` and its descendants from the tree and frees them.
    ///
    /// Returns the removed ids in pre-order. GPU resources of removed nodes
    /// are not touched; use `Stage::remove_node` to release them as well.
    pub fn remove(&mut self, id: NodeId) -> Result<Vec<NodeId>, SceneError> {
        if id == self.root {
            return Err(SceneError::RootRemoval);
        }
        let parent = self.node(id).ok_or(SceneError::UnknownNode(id))?.parent;

        if let Some(Node { kind: NodeKind::Container(children), .. }) =
            parent.and_then(|p| self.node_mut(p))
        {
            children.retain(|c| *c != id);
        }

        let removed = self.descendants(id);
        for r in &removed {
            self.free_entry(*r);
        }
        Ok(removed)
    }

    /// `id` followed by all of its descendants, pre-order.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        if !self.contains(id) {
            return out;
        }
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            out.push(n);
            stack.extend(self.children(n).iter().rev().copied());
        }
        out
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let e = &mut self.entries[index as usize];
            e.node = Some(node);
            return NodeId { index, generation: e.generation };
        }
        let index = self.entries.len() as u32;
        self.entries.push(Entry { generation: 0, node: Some(node) });
        NodeId { index, generation: 0 }
    }

    fn free_entry(&mut self, id: NodeId) {
        let Some(e) = self.entries.get_mut(id.index as usize) else { return };
        if e.generation != id.generation || e.node.is_none() {
            return;
        }
        e.node = None;
        e.generation = e.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn children_keep_insertion_order() {
        let mut scene = Scene::new();
        let root = scene.root();
        let a = scene.add_child(root, Node::container()).unwrap();
        let b = scene.add_child(root, Node::container()).unwrap();
        let c = scene.insert_child(root, 0, Node::container()).unwrap();
        assert_eq!(scene.children(root), &[c, a, b]);
        assert_eq!(scene.parent(a), Some(root));
    }

    #[test]
    fn remove_frees_subtree_and_invalidates_ids() {
        let mut scene = Scene::new();
        let root = scene.root();
        let group = scene.add_child(root, Node::container()).unwrap();
        let leaf = scene.add_child(group, Node::container()).unwrap();

        let removed = scene.remove(group).unwrap();
        assert_eq!(removed, vec![group, leaf]);
        assert!(!scene.contains(leaf));
        assert!(scene.children(root).is_empty());
        assert_eq!(scene.len(), 1);

        // Reused storage must not resurrect the old id.
        let fresh = scene.add_child(root, Node::container()).unwrap();
        assert_ne!(fresh, group);
        assert!(scene.node(group).is_none() && scene.node(leaf).is_none());
    }

    #[test]
    fn structural_errors() {
        let mut scene = Scene::new();
        let root = scene.root();
        assert_eq!(scene.remove(root), Err(SceneError::RootRemoval));

        let leaf = scene.add_child(root, Node::new(NodeKind::Empty)).unwrap();
        assert_eq!(scene.add_child(leaf, Node::container()), Err(SceneError::NotAContainer(leaf)));
        assert_eq!(
            scene.insert_child(root, 5, Node::container()),
            Err(SceneError::IndexOutOfRange { index: 5, len: 1 })
        );
    }
}
