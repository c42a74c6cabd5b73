//! Rooted binary phylogenetic trees.
//!
//! Uses arena-style storage: nodes live in a flat `Vec<Node>` and are
//! referenced by `NodeId` (a `usize` index). Every internal node has exactly
//! two children; the substitution-count dynamic program depends on that
//! shape, so it is validated at construction.

use velella_core::{Result, VelellaError};

/// Index into the tree's node arena.
pub type NodeId = usize;

/// A single node in a binary phylogenetic tree.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Node {
    /// Index of this node in the arena.
    pub id: NodeId,
    /// Parent node (None for root).
    pub parent: Option<NodeId>,
    /// Left child (None for leaves).
    pub lchild: Option<NodeId>,
    /// Right child (None for leaves).
    pub rchild: Option<NodeId>,
    /// Branch length from this node to its parent (None at the root).
    pub dparent: Option<f64>,
    /// Taxon label; meaningful at leaves.
    pub name: Option<String>,
}

impl Node {
    /// True if this node has no children.
    pub fn is_leaf(&self) -> bool {
        self.lchild.is_none()
    }

    /// True if this node has no parent.
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// A rooted binary phylogenetic tree stored as an arena of nodes.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PhyloTree {
    nodes: Vec<Node>,
    root: NodeId,
}

impl PhyloTree {
    /// Create a tree from pre-built nodes and a root index.
    ///
    /// Validates the binary invariant (each node has both children or
    /// neither), parent/child link consistency, and non-negative branch
    /// lengths. Used by the Newick parser.
    pub fn from_nodes(nodes: Vec<Node>, root: NodeId) -> Result<Self> {
        if nodes.is_empty() {
            return Err(VelellaError::InvalidInput("empty node list".into()));
        }
        if root >= nodes.len() {
            return Err(VelellaError::InvalidInput(format!(
                "root index {} out of range ({})",
                root,
                nodes.len()
            )));
        }
        for node in &nodes {
            if node.lchild.is_some() != node.rchild.is_some() {
                return Err(VelellaError::InvalidInput(format!(
                    "node {} has exactly one child; binary tree required",
                    node.id
                )));
            }
            for child in [node.lchild, node.rchild].into_iter().flatten() {
                if child >= nodes.len() || nodes[child].parent != Some(node.id) {
                    return Err(VelellaError::InvalidInput(format!(
                        "inconsistent parent link at node {}",
                        node.id
                    )));
                }
            }
            if let Some(d) = node.dparent {
                if d < 0.0 || !d.is_finite() {
                    return Err(VelellaError::InvalidInput(format!(
                        "negative branch length {} at node {}",
                        d, node.id
                    )));
                }
            }
        }
        let tree = Self { nodes, root };
        let nleaves = tree.leaves().len();
        if nleaves != (tree.nodes.len() + 1) / 2 {
            return Err(VelellaError::InvalidInput(format!(
                "{} leaves inconsistent with {} nodes",
                nleaves,
                tree.nodes.len()
            )));
        }
        Ok(tree)
    }

    /// Access a node by id.
    pub fn get_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Unchecked node access for the crate's own algorithms, which only
    /// hold ids produced by this tree.
    pub(crate) fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
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

    /// All leaf node ids, in arena order.
    pub fn leaves(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| n.is_leaf())
            .map(|n| n.id)
            .collect()
    }

    /// Branch length above `id`, treating an absent length as zero.
    pub fn branch_length(&self, id: NodeId) -> f64 {
        self.nodes[id].dparent.unwrap_or(0.0)
    }

    /// Sum of all branch lengths in the tree.
    pub fn total_branch_length(&self) -> f64 {
        self.nodes.iter().filter_map(|n| n.dparent).sum()
    }

    /// Pre-order (parent before children) traversal yielding node ids.
    pub fn iter_preorder(&self) -> impl Iterator<Item = NodeId> + '_ {
        PreorderIter {
            tree: self,
            stack: vec![self.root],
        }
    }

    /// Post-order (children before parent) traversal yielding node ids.
    pub fn iter_postorder(&self) -> impl Iterator<Item = NodeId> {
        // Reverse of a right-first preorder.
        let mut sequence = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            sequence.push(id);
            let node = &self.nodes[id];
            if let Some(l) = node.lchild {
                stack.push(l);
            }
            if let Some(r) = node.rchild {
                stack.push(r);
            }
        }
        sequence.reverse();
        sequence.into_iter()
    }

    /// Parse a Newick format string into a tree.
    pub fn from_newick(input: &str) -> Result<Self> {
        crate::newick::parse(input)
    }

    /// Serialize the tree to a Newick format string.
    pub fn to_newick(&self) -> String {
        crate::newick::write(self)
    }
}

/// Pre-order iterator over node ids.
struct PreorderIter<'a> {
    tree: &'a PhyloTree,
    stack: Vec<NodeId>,
}

impl Iterator for PreorderIter<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        let node = &self.tree.nodes[id];
        // Push right first so the left child is visited first.
        if let Some(r) = node.rchild {
            self.stack.push(r);
        }
        if let Some(l) = node.lchild {
            self.stack.push(l);
        }
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> PhyloTree {
        PhyloTree::from_newick("((A:0.1,B:0.2):0.3,(C:0.4,D:0.5):0.6);").unwrap()
    }

    #[test]
    fn leaf_count_invariant() {
        let tree = sample_tree();
        assert_eq!(tree.node_count(), 7);
        assert_eq!(tree.leaf_count(), 4);
        assert_eq!(tree.leaf_count(), (tree.node_count() + 1) / 2);
    }

    #[test]
    fn get_node_is_checked() {
        let tree = sample_tree();
        assert!(tree.get_node(tree.root()).is_some());
        assert!(tree.get_node(99).is_none());
    }

    #[test]
    fn single_leaf_tree_is_valid() {
        let tree = PhyloTree::from_newick("A;").unwrap();
        assert_eq!(tree.node_count(), 1);
        assert!(tree.node(tree.root()).is_leaf());
    }

    #[test]
    fn postorder_visits_children_first() {
        let tree = sample_tree();
        let order: Vec<NodeId> = tree.iter_postorder().collect();
        assert_eq!(order.len(), 7);
        assert_eq!(*order.last().unwrap(), tree.root());
        let mut seen = vec![false; tree.node_count()];
        for id in order {
            let node = tree.node(id);
            if let (Some(l), Some(r)) = (node.lchild, node.rchild) {
                assert!(seen[l] && seen[r], "children of {} not yet visited", id);
            }
            seen[id] = true;
        }
    }

    #[test]
    fn preorder_visits_parent_first() {
        let tree = sample_tree();
        let order: Vec<NodeId> = tree.iter_preorder().collect();
        assert_eq!(order[0], tree.root());
        let mut seen = vec![false; tree.node_count()];
        for id in order {
            if let Some(p) = tree.node(id).parent {
                assert!(seen[p], "parent of {} not yet visited", id);
            }
            seen[id] = true;
        }
    }

    #[test]
    fn total_branch_length_sums_all_edges() {
        let tree = sample_tree();
        assert!((tree.total_branch_length() - 2.1).abs() < 1e-12);
    }

    #[test]
    fn negative_branch_length_rejected() {
        assert!(PhyloTree::from_newick("(A:0.1,B:-0.2);").is_err());
    }

    #[test]
    fn unary_node_rejected() {
        let nodes = vec![
            Node {
                id: 0,
                parent: None,
                lchild: Some(1),
                rchild: None,
                dparent: None,
                name: None,
            },
            Node {
                id: 1,
                parent: Some(0),
                lchild: None,
                rchild: None,
                dparent: Some(0.1),
                name: Some("A".into()),
            },
        ];
        assert!(PhyloTree::from_nodes(nodes, 0).is_err());
    }
}
