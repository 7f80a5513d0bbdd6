use std::path::Path;

use ahash::AHashSet;
use anyhow::Result;
use located_error::LocatedError;
use log::warn;

mod error;
pub use error::TreeError;

/// An undirected link towards a neighboring node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edge {
    pub target: usize,
    pub length: f64,
}

/// A single tree node. Topology is an undirected graph; traversal
/// disambiguates the parent by passing `(node, dad)` explicitly.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: usize,
    pub name: Option<String>,
    pub edges: Vec<Edge>,
}

impl Node {
    fn new(id: usize, name: Option<String>) -> Self {
        Self { id, name, edges: Vec::new() }
    }

    pub fn degree(&self) -> usize { self.edges.len() }

    /// Terminal nodes have a single neighbor.
    pub fn is_leaf(&self) -> bool { self.edges.len() <= 1 }

    /// Neighbors of this node, excluding `dad`.
    pub fn children<'a>(&'a self, dad: Option<usize>) -> impl DoubleEndedIterator<Item = &'a Edge> {
        self.edges.iter().filter(move |e| Some(e.target) != dad)
    }
}

/// An arena-allocated phylogenetic tree. Nodes are addressed by index;
/// `taxa` lists the named tips in newick order.
#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<Node>,
    root: usize,
    taxa: Vec<usize>,
}

impl Tree {
    /// Parse a tree from a newick-formatted file. Only the first tree of the
    /// file is read.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_loc(|| format!("While reading tree file '{}'", path.display()))?;
        Self::from_newick(&contents)
            .with_loc(|| format!("While parsing tree file '{}'", path.display()))
    }

    /// Parse a newick string, e.g. `"((A:0.1,B:0.2):0.05,C:0.3);"`.
    ///
    /// Missing branch lengths default to zero (counted and warned once).
    pub fn from_newick(newick: &str) -> Result<Self> {
        use TreeError::*;
        let mut nodes: Vec<Node> = Vec::new();
        let mut taxa: Vec<usize> = Vec::new();
        let mut seen = AHashSet::new();

        // Stack of open '(' groups; each holds completed child subtrees.
        let mut stack: Vec<Vec<(usize, f64)>> = Vec::new();
        let mut last: Option<(usize, f64)> = None;
        let mut missing_lengths = 0usize;
        let mut terminated = false;

        let bytes = newick.as_bytes();
        let mut pos = 0usize;
        while pos < bytes.len() {
            let c = bytes[pos] as char;
            match c {
                c if c.is_whitespace() => pos += 1,
                '(' => {
                    stack.push(Vec::new());
                    last = None;
                    pos += 1;
                },
                ',' => {
                    let child = last.take().ok_or(UnexpectedToken(',', pos))?;
                    stack.last_mut().ok_or(UnbalancedParentheses)?.push(child);
                    pos += 1;
                },
                ')' => {
                    let child = last.take().ok_or(UnexpectedToken(')', pos))?;
                    let mut children = stack.pop().ok_or(UnbalancedParentheses)?;
                    children.push(child);
                    pos += 1;
                    let (name, length) = Self::read_label(bytes, &mut pos, &mut missing_lengths)?;
                    let id = nodes.len();
                    let mut node = Node::new(id, name);
                    for (child_id, child_len) in children {
                        node.edges.push(Edge { target: child_id, length: child_len });
                        nodes[child_id].edges.push(Edge { target: id, length: child_len });
                    }
                    nodes.push(node);
                    last = Some((id, length));
                },
                ';' => { terminated = true; break },
                _ => {
                    let (name, length) = Self::read_label(bytes, &mut pos, &mut missing_lengths)?;
                    let name = name.ok_or(UnexpectedToken(c, pos))?;
                    if !seen.insert(name.clone()) {
                        return Err(DuplicateTaxon(name)).loc("While registering taxa")
                    }
                    let id = nodes.len();
                    nodes.push(Node::new(id, Some(name)));
                    taxa.push(id);
                    last = Some((id, length));
                },
            }
        }

        if !terminated           { return Err(MissingTerminator).loc("While parsing newick string") }
        if !stack.is_empty()     { return Err(UnbalancedParentheses).loc("While parsing newick string") }
        let (root, _) = last.ok_or(EmptyTree).loc("While parsing newick string")?;
        if missing_lengths > 0 {
            warn!("{missing_lengths} branch(es) without a length within the input tree. Defaulting these to 0");
        }
        Ok(Self { nodes, root, taxa })
    }

    /// Read an optional `name[:length]` label at `pos`.
    fn read_label(
        bytes: &[u8],
        pos: &mut usize,
        missing_lengths: &mut usize,
    ) -> Result<(Option<String>, f64), TreeError> {
        let is_delim = |c: char| matches!(c, '(' | ')' | ',' | ':' | ';');
        let start = *pos;
        while *pos < bytes.len() && !is_delim(bytes[*pos] as char) {
            *pos += 1;
        }
        let name = match start == *pos {
            true  => None,
            false => Some(String::from_utf8_lossy(&bytes[start..*pos]).trim().to_string()),
        };
        let name = name.filter(|n| !n.is_empty());

        let mut length = 0.0;
        if *pos < bytes.len() && bytes[*pos] == b':' {
            *pos += 1;
            let start = *pos;
            while *pos < bytes.len() && !is_delim(bytes[*pos] as char) {
                *pos += 1;
            }
            let raw = String::from_utf8_lossy(&bytes[start..*pos]).trim().to_string();
            length = raw.parse::<f64>().map_err(|_| TreeError::InvalidBranchLength(raw))?;
        } else {
            *missing_lengths += 1;
        }
        Ok((name, length))
    }

    pub fn node(&self, id: usize) -> &Node { &self.nodes[id] }

    pub fn num_nodes(&self) -> usize { self.nodes.len() }

    pub fn root(&self) -> usize { self.root }

    /// Named tips, in newick order.
    pub fn taxa(&self) -> &[usize] { &self.taxa }

    pub fn num_leaves(&self) -> usize { self.taxa.len() }

    /// A tree is rooted when its root has at most two neighbors.
    pub fn is_rooted(&self) -> bool { self.nodes[self.root].degree() <= 2 }

    /// Longest taxon name, used for PHYLIP column padding.
    pub fn max_name_len(&self) -> usize {
        self.taxa.iter()
            .filter_map(|&id| self.nodes[id].name.as_deref())
            .map(str::len)
            .max()
            .unwrap_or(0)
    }

    pub fn taxon_id(&self, name: &str) -> Result<usize, TreeError> {
        self.taxa.iter()
            .find(|&&id| self.nodes[id].name.as_deref() == Some(name))
            .copied()
            .ok_or_else(|| TreeError::UnknownTaxon(name.to_string()))
    }

    /// Root an unrooted tree by grafting a fresh degree-one root onto the
    /// first neighbor of the current root, with a zero-length branch.
    /// No-op when the tree is already rooted.
    pub fn graft_root(&mut self) {
        if self.is_rooted() {
            return
        }
        let anchor = self.nodes[self.root].edges[0].target;
        let new_root = self.nodes.len();
        let mut node = Node::new(new_root, None);
        node.edges.push(Edge { target: anchor, length: 0.0 });
        self.nodes.push(node);
        self.nodes[anchor].edges.push(Edge { target: new_root, length: 0.0 });
        self.root = new_root;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_taxon_tree() {
        let tree = Tree::from_newick("(A:0.1,B:0.1);").unwrap();
        assert_eq!(tree.num_leaves(), 2);
        assert_eq!(tree.num_nodes(), 3);
        assert!(tree.is_rooted());

        let root = tree.node(tree.root());
        assert_eq!(root.degree(), 2);
        let lengths: Vec<f64> = root.children(None).map(|e| e.length).collect();
        assert_eq!(lengths, vec![0.1, 0.1]);
    }

    #[test]
    fn nested_tree_with_internal_lengths() {
        let tree = Tree::from_newick("((A:0.1,B:0.2):0.05,C:0.3);").unwrap();
        assert_eq!(tree.num_leaves(), 3);
        assert_eq!(tree.num_nodes(), 5);
        assert_eq!(tree.max_name_len(), 1);

        let a = tree.taxon_id("A").unwrap();
        assert_eq!(tree.node(a).name.as_deref(), Some("A"));
        assert!(tree.taxon_id("Z").is_err());
    }

    #[test]
    fn unrooted_tree_is_grafted() {
        let mut tree = Tree::from_newick("(A:0.1,B:0.2,C:0.3);").unwrap();
        assert!(!tree.is_rooted());

        let before = tree.num_nodes();
        tree.graft_root();
        assert!(tree.is_rooted());
        assert_eq!(tree.num_nodes(), before + 1);
        assert_eq!(tree.node(tree.root()).degree(), 1);
        assert_eq!(tree.node(tree.root()).edges[0].length, 0.0);
        // Taxa are untouched by the graft.
        assert_eq!(tree.num_leaves(), 3);

        // Grafting twice is a no-op.
        tree.graft_root();
        assert_eq!(tree.num_nodes(), before + 1);
    }

    #[test]
    fn children_excludes_dad() {
        let tree = Tree::from_newick("((A:0.1,B:0.2):0.05,C:0.3);").unwrap();
        let root = tree.root();
        let internal = tree.node(root).edges[0].target;
        let children: Vec<usize> = tree.node(internal)
            .children(Some(root))
            .map(|e| e.target)
            .collect();
        assert_eq!(children.len(), 2);
        assert!(!children.contains(&root));
    }

    #[test]
    fn missing_lengths_default_to_zero() {
        let tree = Tree::from_newick("(A,B);").unwrap();
        let root = tree.node(tree.root());
        assert!(root.children(None).all(|e| e.length == 0.0));
    }

    #[test]
    fn malformed_newick_is_rejected() {
        assert!(Tree::from_newick("((A:0.1,B:0.2);").is_err());      // unbalanced
        assert!(Tree::from_newick("(A:0.1,B:0.2)").is_err());        // missing ';'
        assert!(Tree::from_newick("(A:0.1,A:0.2);").is_err());       // duplicate
        assert!(Tree::from_newick("(A:zero,B:0.2);").is_err());      // bad length
        assert!(Tree::from_newick(";").is_err());                    // empty
        assert!(Tree::from_newick("(,A:0.1);").is_err());            // dangling comma
    }
}
