//! Fragment tree for the live text surface.
//!
//! Nodes live in a generational arena so ids held by the render layer go
//! stale instead of dangling once the node they named is removed. Every
//! structural or textual mutation bumps [`FragmentTree::version`], which
//! offset indexes use to detect that they need rebuilding.

use std::fmt::Write;
use std::ops::Range;

use smol_str::SmolStr;

use crate::span::{Category, SpanKey};

/// Handle to a node in a [`FragmentTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

/// Payload of an annotation wrapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    pub key: SpanKey,
    pub category: Category,
    /// Which segment of a multi-segment wrap this wrapper covers.
    pub part: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Root,
    Text(String),
    /// Highlight wrapper created by the range wrapper.
    Annotation(Annotation),
    /// Foreign inline container (emphasis, links, ...).
    Inline { tag: SmolStr },
    /// Foreign leaf that carries no text (line breaks, images, ...).
    Opaque { tag: SmolStr },
}

impl NodeKind {
    pub fn is_text(&self) -> bool {
        matches!(self, NodeKind::Text(_))
    }

    fn is_container(&self) -> bool {
        matches!(
            self,
            NodeKind::Root | NodeKind::Annotation(_) | NodeKind::Inline { .. }
        )
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl Node {
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Arena-backed tree of text, annotation and foreign fragments.
#[derive(Debug, Clone)]
pub struct FragmentTree {
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: NodeId,
    version: u64,
}

impl Default for FragmentTree {
    fn default() -> Self {
        Self::new()
    }
}

impl FragmentTree {
    /// Empty tree with only a root.
    pub fn new() -> Self {
        let mut tree = Self {
            slots: Vec::new(),
            free: Vec::new(),
            root: NodeId {
                index: 0,
                generation: 0,
            },
            version: 0,
        };
        tree.root = tree.alloc(Node {
            kind: NodeKind::Root,
            parent: None,
            children: Vec::new(),
        });
        tree
    }

    /// Tree holding `text` as a single fragment.
    pub fn from_text(text: &str) -> Self {
        let mut tree = Self::new();
        if !text.is_empty() {
            let root = tree.root;
            tree.append_text(root, text);
        }
        tree
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Mutation counter; changes whenever text or structure changes.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_ref()
    }

    fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_mut()
    }

    pub fn kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.get(id).map(|n| &n.kind)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id)?.parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.get(id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    /// Text of a text fragment.
    pub fn text(&self, id: NodeId) -> Option<&str> {
        match self.kind(id)? {
            NodeKind::Text(t) => Some(t),
            _ => None,
        }
    }

    /// Length in chars of a text fragment.
    pub fn text_len(&self, id: NodeId) -> Option<usize> {
        self.text(id).map(|t| t.chars().count())
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.node = Some(node);
                NodeId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                NodeId {
                    index,
                    generation: 0,
                }
            }
        }
    }

    fn release(&mut self, id: NodeId) {
        if let Some(slot) = self.slots.get_mut(id.index as usize) {
            if slot.generation == id.generation && slot.node.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(id.index);
            }
        }
    }

    fn touch(&mut self) {
        self.version = self.version.wrapping_add(1);
    }

    fn insert_child(&mut self, parent: NodeId, at: usize, kind: NodeKind) -> Option<NodeId> {
        if !self.get(parent)?.kind.is_container() {
            return None;
        }
        let id = self.alloc(Node {
            kind,
            parent: Some(parent),
            children: Vec::new(),
        });
        let children = &mut self.get_mut(parent)?.children;
        let at = at.min(children.len());
        children.insert(at, id);
        self.touch();
        Some(id)
    }

    /// Append a text fragment under `parent`.
    pub fn append_text(&mut self, parent: NodeId, text: &str) -> Option<NodeId> {
        let at = self.children(parent).len();
        self.insert_child(parent, at, NodeKind::Text(text.to_owned()))
    }

    /// Append a non-text node under `parent`. Returns `None` when `parent`
    /// cannot hold children.
    pub fn append_element(&mut self, parent: NodeId, kind: NodeKind) -> Option<NodeId> {
        if kind.is_text() {
            return None;
        }
        let at = self.children(parent).len();
        self.insert_child(parent, at, kind)
    }

    fn position_in_parent(&self, id: NodeId) -> Option<(NodeId, usize)> {
        let parent = self.parent(id)?;
        let at = self.children(parent).iter().position(|c| *c == id)?;
        Some((parent, at))
    }

    /// Text fragments in document order.
    pub fn text_nodes(&self) -> Vec<NodeId> {
        self.text_nodes_under(self.root)
    }

    /// Text fragments under `from`, in document order.
    pub fn text_nodes_under(&self, from: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            let Some(node) = self.get(id) else { continue };
            if node.kind.is_text() {
                out.push(id);
            }
            stack.extend(node.children.iter().rev().copied());
        }
        out
    }

    /// Concatenated text of the whole tree.
    pub fn document_text(&self) -> String {
        self.subtree_text(self.root)
    }

    /// Concatenated text under `id`.
    pub fn subtree_text(&self, id: NodeId) -> String {
        self.text_nodes_under(id)
            .into_iter()
            .filter_map(|n| self.text(n))
            .collect()
    }

    /// Split a text fragment at a char offset. The original keeps the head;
    /// the returned sibling holds the tail. Splitting at either end is a no-op
    /// that returns `None`.
    pub fn split_text(&mut self, id: NodeId, at: usize) -> Option<NodeId> {
        let text = self.text(id)?;
        let byte = byte_offset(text, at)?;
        if byte == 0 || byte == text.len() {
            return None;
        }
        let (parent, pos) = self.position_in_parent(id)?;
        let tail = text[byte..].to_owned();
        if let Some(NodeKind::Text(t)) = self.get_mut(id).map(|n| &mut n.kind) {
            t.truncate(byte);
        }
        self.insert_child(parent, pos + 1, NodeKind::Text(tail))
    }

    /// Put `id` inside a new container node of `kind` at its current position.
    pub fn wrap_node(&mut self, id: NodeId, kind: NodeKind) -> Option<NodeId> {
        if !kind.is_container() || matches!(kind, NodeKind::Root) {
            return None;
        }
        let (parent, pos) = self.position_in_parent(id)?;
        let wrapper = self.alloc(Node {
            kind,
            parent: Some(parent),
            children: vec![id],
        });
        if let Some(p) = self.get_mut(parent) {
            p.children[pos] = wrapper;
        }
        if let Some(n) = self.get_mut(id) {
            n.parent = Some(wrapper);
        }
        self.touch();
        Some(wrapper)
    }

    /// Replace a container with its children, then merge the text fragments
    /// that the removal made adjacent.
    pub fn unwrap_node(&mut self, id: NodeId) -> bool {
        if id == self.root {
            return false;
        }
        let Some((parent, pos)) = self.position_in_parent(id) else {
            return false;
        };
        let Some(node) = self.get_mut(id) else {
            return false;
        };
        let children = std::mem::take(&mut node.children);
        let count = children.len();
        for child in &children {
            if let Some(c) = self.get_mut(*child) {
                c.parent = Some(parent);
            }
        }
        if let Some(p) = self.get_mut(parent) {
            p.children.splice(pos..pos + 1, children);
        }
        self.release(id);
        self.touch();

        // Only the seams at either edge of the spliced run can have become
        // adjacent text.
        let lo = pos.saturating_sub(1);
        let hi = pos + count;
        self.merge_text_run(parent, lo, hi);
        true
    }

    /// Merge adjacent text children of `parent` in `lo..=hi`.
    fn merge_text_run(&mut self, parent: NodeId, lo: usize, hi: usize) {
        let mut i = lo;
        let mut hi = hi;
        loop {
            let children = self.children(parent);
            if i + 1 >= children.len() || i >= hi {
                break;
            }
            let (a, b) = (children[i], children[i + 1]);
            let tail = match (self.text(a), self.text(b)) {
                (Some(_), Some(tb)) => tb.to_owned(),
                _ => {
                    i += 1;
                    continue;
                }
            };
            if let Some(NodeKind::Text(ta)) = self.get_mut(a).map(|n| &mut n.kind) {
                ta.push_str(&tail);
            }
            if let Some(p) = self.get_mut(parent) {
                p.children.remove(i + 1);
            }
            self.release(b);
            hi = hi.saturating_sub(1);
        }
    }

    /// Insert `text` into a text fragment at a local char offset.
    pub fn insert_in_text(&mut self, id: NodeId, at: usize, text: &str) -> bool {
        let Some(current) = self.text(id) else {
            return false;
        };
        let Some(byte) = byte_offset(current, at) else {
            return false;
        };
        if let Some(NodeKind::Text(t)) = self.get_mut(id).map(|n| &mut n.kind) {
            t.insert_str(byte, text);
        }
        self.touch();
        true
    }

    /// Delete a local char range from a text fragment.
    pub fn delete_in_text(&mut self, id: NodeId, range: Range<usize>) -> bool {
        let Some(current) = self.text(id) else {
            return false;
        };
        let (Some(from), Some(to)) = (
            byte_offset(current, range.start),
            byte_offset(current, range.end),
        ) else {
            return false;
        };
        if from > to {
            return false;
        }
        if let Some(NodeKind::Text(t)) = self.get_mut(id).map(|n| &mut n.kind) {
            t.replace_range(from..to, "");
        }
        self.touch();
        true
    }

    /// Annotation wrappers in document order.
    pub fn annotations(&self) -> Vec<(NodeId, &Annotation)> {
        let mut out = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            let Some(node) = self.get(id) else { continue };
            if let NodeKind::Annotation(a) = &node.kind {
                out.push((id, a));
            }
            stack.extend(node.children.iter().rev().copied());
        }
        out
    }

    /// Render the tree as HTML.
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        self.write_html(self.root, &mut out);
        out
    }

    fn write_html(&self, id: NodeId, out: &mut String) {
        let Some(node) = self.get(id) else { return };
        match &node.kind {
            NodeKind::Root => {
                for child in &node.children {
                    self.write_html(*child, out);
                }
            }
            NodeKind::Text(t) => escape_html(t, out),
            NodeKind::Annotation(a) => {
                let _ = write!(
                    out,
                    "<span class=\"hl hl-{cat}\" data-category=\"{cat}\" data-span-key=\"",
                    cat = a.category
                );
                escape_html(a.key.as_str(), out);
                out.push_str("\">");
                for child in &node.children {
                    self.write_html(*child, out);
                }
                out.push_str("</span>");
            }
            NodeKind::Inline { tag } => {
                let _ = write!(out, "<{tag}>");
                for child in &node.children {
                    self.write_html(*child, out);
                }
                let _ = write!(out, "</{tag}>");
            }
            NodeKind::Opaque { tag } => {
                let _ = write!(out, "<{tag}>");
            }
        }
    }
}

fn byte_offset(text: &str, chars: usize) -> Option<usize> {
    if chars == 0 {
        return Some(0);
    }
    match text.char_indices().nth(chars) {
        Some((b, _)) => Some(b),
        None if text.chars().count() == chars => Some(text.len()),
        None => None,
    }
}

fn escape_html(s: &str, out: &mut String) {
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
}
