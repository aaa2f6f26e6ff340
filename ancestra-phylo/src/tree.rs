//! Rooted phylogenetic tree for progressive reconstruction.
//!
//! Uses arena-style storage: nodes live in a flat `Vec<Node>` and are
//! referenced by `NodeId` (a `usize` index). Node ids double as alignment
//! row indices throughout the reconstruction engine, so they are stable for
//! the lifetime of a tree.

use ancestra_core::{AncestraError, Result};

/// Index into the tree's node arena. Also the alignment row index of the
/// node's sequence in every profile and alignment path.
pub type NodeId = usize;

/// A single node in a phylogenetic tree.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Node {
    /// Index of this node in the arena.
    pub id: NodeId,
    /// Parent node (None for root).
    pub parent: Option<NodeId>,
    /// Child nodes.
    pub children: Vec<NodeId>,
    /// Branch length from this node to its parent.
    pub branch_length: Option<f64>,
    /// Taxon label (required for leaves that carry sequences).
    pub name: Option<String>,
}

impl Node {
    /// True if this node has no children.
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// True if this node has no parent.
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// A rooted phylogenetic tree stored as an arena of nodes.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PhyloTree {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Default for PhyloTree {
    fn default() -> Self {
        Self::new()
    }
}

impl PhyloTree {
    /// Create a new tree with a single unnamed root node.
    pub fn new() -> Self {
        let root = Node {
            id: 0,
            parent: None,
            children: Vec::new(),
            branch_length: None,
            name: None,
        };
        Self {
            nodes: vec![root],
            root: 0,
        }
    }

    /// Add a child to `parent` and return its `NodeId`.
    pub fn add_child(
        &mut self,
        parent: NodeId,
        name: Option<String>,
        branch_length: Option<f64>,
    ) -> Result<NodeId> {
        if parent >= self.nodes.len() {
            return Err(AncestraError::InvalidInput(format!(
                "parent index {} out of range ({})",
                parent,
                self.nodes.len()
            )));
        }
        let id = self.nodes.len();
        self.nodes.push(Node {
            id,
            parent: Some(parent),
            children: Vec::new(),
            branch_length,
            name,
        });
        self.nodes[parent].children.push(id);
        Ok(id)
    }

    /// Access a node by id.
    pub fn get_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// The root node id.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Read-only access to the full node arena.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Total number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of leaf nodes.
    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    /// All leaf node ids.
    pub fn leaves(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| n.is_leaf())
            .map(|n| n.id)
            .collect()
    }

    /// Branch length from `id` to its parent, or 0.0 when absent (root).
    pub fn branch_length(&self, id: NodeId) -> f64 {
        self.nodes
            .get(id)
            .and_then(|n| n.branch_length)
            .unwrap_or(0.0)
    }

    /// Post-order (children before parent) traversal yielding node ids.
    pub fn iter_postorder(&self) -> impl Iterator<Item = NodeId> {
        let mut result = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            result.push(id);
            for &child in &self.nodes[id].children {
                stack.push(child);
            }
        }
        result.reverse();
        result.into_iter()
    }

    /// Check that every internal node has exactly two children.
    ///
    /// The progressive aligner consumes child profiles pairwise, so the tree
    /// must be strictly binary below the root.
    pub fn assert_binary(&self) -> Result<()> {
        for node in &self.nodes {
            if !node.is_leaf() && node.children.len() != 2 {
                return Err(AncestraError::InvalidInput(format!(
                    "node {} has {} children; the tree must be binary",
                    node.id,
                    node.children.len()
                )));
            }
        }
        Ok(())
    }

    /// Check that every non-root node has a finite, non-negative branch
    /// length.
    pub fn validate_branch_lengths(&self) -> Result<()> {
        for node in &self.nodes {
            if node.is_root() {
                continue;
            }
            match node.branch_length {
                Some(t) if t.is_finite() && t >= 0.0 => {}
                other => {
                    return Err(AncestraError::InvalidInput(format!(
                        "node {} has invalid branch length {:?}",
                        node.id, other
                    )))
                }
            }
        }
        Ok(())
    }

    /// For every node, the closest leaf in its subtree and the branch-length
    /// distance to it.
    ///
    /// The closest leaf's row is the reference row for the diagonal envelope
    /// when a node's profile is aligned. Ties are broken in favour of the
    /// earlier child, so results are deterministic.
    pub fn closest_leaves(&self) -> (Vec<NodeId>, Vec<f64>) {
        let n = self.nodes.len();
        let mut leaf = vec![0; n];
        let mut dist = vec![0.0; n];
        for id in self.iter_postorder() {
            let node = &self.nodes[id];
            if node.is_leaf() {
                leaf[id] = id;
                dist[id] = 0.0;
            } else {
                let mut best: Option<(NodeId, f64)> = None;
                for &c in &node.children {
                    let d = dist[c] + self.branch_length(c);
                    if best.map_or(true, |(_, bd)| d < bd) {
                        best = Some((leaf[c], d));
                    }
                }
                let (bl, bd) = best.expect("internal node has children");
                leaf[id] = bl;
                dist[id] = bd;
            }
        }
        (leaf, dist)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// ((A:0.1,B:0.2):0.3,(C:0.4,D:0.5):0.6); built by hand.
    fn four_leaf_tree() -> PhyloTree {
        let mut t = PhyloTree::new();
        let root = t.root();
        let ab = t.add_child(root, None, Some(0.3)).unwrap();
        let cd = t.add_child(root, None, Some(0.6)).unwrap();
        t.add_child(ab, Some("A".into()), Some(0.1)).unwrap();
        t.add_child(ab, Some("B".into()), Some(0.2)).unwrap();
        t.add_child(cd, Some("C".into()), Some(0.4)).unwrap();
        t.add_child(cd, Some("D".into()), Some(0.5)).unwrap();
        t
    }

    #[test]
    fn leaf_and_node_counts() {
        let t = four_leaf_tree();
        assert_eq!(t.node_count(), 7);
        assert_eq!(t.leaf_count(), 4);
    }

    #[test]
    fn postorder_visits_children_first() {
        let t = four_leaf_tree();
        let order: Vec<NodeId> = t.iter_postorder().collect();
        assert_eq!(order.len(), 7);
        assert_eq!(*order.last().unwrap(), t.root());
        for (pos, &id) in order.iter().enumerate() {
            for &c in &t.get_node(id).unwrap().children {
                let cpos = order.iter().position(|&x| x == c).unwrap();
                assert!(cpos < pos, "child {} after parent {}", c, id);
            }
        }
    }

    #[test]
    fn binary_check() {
        let t = four_leaf_tree();
        assert!(t.assert_binary().is_ok());

        let mut bad = PhyloTree::new();
        let root = bad.root();
        bad.add_child(root, Some("A".into()), Some(0.1)).unwrap();
        assert!(bad.assert_binary().is_err());
    }

    #[test]
    fn branch_length_validation() {
        let t = four_leaf_tree();
        assert!(t.validate_branch_lengths().is_ok());

        let mut bad = PhyloTree::new();
        let root = bad.root();
        bad.add_child(root, Some("A".into()), None).unwrap();
        bad.add_child(root, Some("B".into()), Some(0.1)).unwrap();
        assert!(bad.validate_branch_lengths().is_err());
    }

    #[test]
    fn closest_leaf_picks_minimum_distance() {
        let t = four_leaf_tree();
        let (leaf, dist) = t.closest_leaves();
        // Node 1 = (A,B): closest is A at 0.1.
        assert_eq!(t.get_node(leaf[1]).unwrap().name.as_deref(), Some("A"));
        assert!((dist[1] - 0.1).abs() < 1e-12);
        // Root: A at 0.1 + 0.3 = 0.4 beats C at 0.4 + 0.6 = 1.0.
        assert_eq!(t.get_node(leaf[0]).unwrap().name.as_deref(), Some("A"));
        assert!((dist[0] - 0.4).abs() < 1e-12);
        // Leaves are their own closest leaf.
        for &l in &t.leaves() {
            assert_eq!(leaf[l], l);
            assert_eq!(dist[l], 0.0);
        }
    }

    #[test]
    fn add_child_rejects_bad_parent() {
        let mut t = PhyloTree::new();
        assert!(t.add_child(99, None, None).is_err());
    }
}
