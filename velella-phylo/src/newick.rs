//! Newick format parser and writer for rooted binary trees.
//!
//! Supports the standard grammar:
//! ```text
//! tree     = subtree ';'
//! subtree  = '(' subtree ',' subtree ')' label | label
//! label    = name? (':' length)?
//! ```
//!
//! Internal nodes with more or fewer than two children are rejected: the
//! substitution-count machinery is defined only on binary trees.

use crate::tree::{Node, NodeId, PhyloTree};
use velella_core::{Result, VelellaError};

/// Parse a Newick format string into a `PhyloTree`.
pub fn parse(input: &str) -> Result<PhyloTree> {
    let mut parser = Parser {
        input: input.as_bytes(),
        pos: 0,
        nodes: Vec::new(),
    };
    let root = parser.parse_subtree(None)?;
    parser.skip_whitespace();
    if parser.peek() != Some(b';') {
        return Err(VelellaError::Parse(
            "expected ';' at end of Newick string".into(),
        ));
    }
    PhyloTree::from_nodes(parser.nodes, root)
}

/// Serialize a `PhyloTree` to a Newick format string.
pub fn write(tree: &PhyloTree) -> String {
    let mut buf = String::new();
    write_subtree(tree, tree.root(), &mut buf);
    buf.push(';');
    buf
}

fn write_subtree(tree: &PhyloTree, id: NodeId, buf: &mut String) {
    let node = tree.node(id);
    if let (Some(l), Some(r)) = (node.lchild, node.rchild) {
        buf.push('(');
        write_subtree(tree, l, buf);
        buf.push(',');
        write_subtree(tree, r, buf);
        buf.push(')');
    }
    if let Some(ref name) = node.name {
        buf.push_str(name);
    }
    if let Some(len) = node.dparent {
        buf.push(':');
        // Enough precision, trailing zeros stripped.
        let s = format!("{:.10}", len);
        let s = s.trim_end_matches('0').trim_end_matches('.');
        buf.push_str(s);
    }
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
    nodes: Vec<Node>,
}

impl Parser<'_> {
    fn parse_subtree(&mut self, parent: Option<NodeId>) -> Result<NodeId> {
        self.skip_whitespace();
        let id = self.alloc_node(parent);

        if self.peek() == Some(b'(') {
            self.pos += 1;
            let left = self.parse_subtree(Some(id))?;
            self.skip_whitespace();
            if self.peek() != Some(b',') {
                return Err(VelellaError::Parse(
                    "internal node needs two children; expected ','".into(),
                ));
            }
            self.pos += 1;
            let right = self.parse_subtree(Some(id))?;
            self.skip_whitespace();
            match self.peek() {
                Some(b')') => self.pos += 1,
                Some(b',') => {
                    return Err(VelellaError::Parse(
                        "more than two children; binary tree required".into(),
                    ))
                }
                _ => return Err(VelellaError::Parse("expected ')'".into())),
            }
            self.nodes[id].lchild = Some(left);
            self.nodes[id].rchild = Some(right);
        }

        self.parse_label(id)?;
        Ok(id)
    }

    fn parse_label(&mut self, id: NodeId) -> Result<()> {
        self.skip_whitespace();
        let name = self.parse_name();
        if !name.is_empty() {
            self.nodes[id].name = Some(name);
        }
        self.skip_whitespace();
        if self.peek() == Some(b':') {
            self.pos += 1;
            self.skip_whitespace();
            let len_str = self.parse_float_str();
            let len: f64 = len_str.parse().map_err(|_| {
                VelellaError::Parse(format!("invalid branch length: '{}'", len_str))
            })?;
            self.nodes[id].dparent = Some(len);
        }
        Ok(())
    }

    fn parse_name(&mut self) -> String {
        let start = self.pos;
        while self.pos < self.input.len() {
            match self.input[self.pos] {
                b':' | b',' | b')' | b'(' | b';' => break,
                b' ' | b'\t' | b'\n' | b'\r' => break,
                _ => self.pos += 1,
            }
        }
        String::from_utf8_lossy(&self.input[start..self.pos]).into_owned()
    }

    fn parse_float_str(&mut self) -> String {
        let start = self.pos;
        while self.pos < self.input.len() {
            match self.input[self.pos] {
                b'0'..=b'9' | b'.' | b'-' | b'+' | b'e' | b'E' => self.pos += 1,
                _ => break,
            }
        }
        String::from_utf8_lossy(&self.input[start..self.pos]).into_owned()
    }

    fn alloc_node(&mut self, parent: Option<NodeId>) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            id,
            parent,
            lchild: None,
            rchild: None,
            dparent: None,
            name: None,
        });
        id
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.pos < self.input.len() {
            match self.input[self.pos] {
                b' ' | b'\t' | b'\n' | b'\r' => self.pos += 1,
                _ => break,
            }
        }
    }
}
