//! Host rendering capabilities.
//!
//! The generated program talks to its environment only through this set of
//! operations. [`MemoryHost`] is an in-memory tree used by the runtime
//! reference models and their tests.

use std::collections::BTreeMap;
use std::fmt::Debug;

pub trait Host {
    type Node: Clone + PartialEq + Debug;
    type Subscription;

    fn create_element(&mut self, name: &str) -> Self::Node;
    fn create_text(&mut self, data: &str) -> Self::Node;
    /// Empty placeholder used to position blocks.
    fn create_anchor(&mut self) -> Self::Node;
    /// Insert `node` into `parent` before `anchor` (at the end when `None`).
    /// Inserting an attached node moves it.
    fn insert(&mut self, parent: &Self::Node, node: &Self::Node, anchor: Option<&Self::Node>);
    fn detach(&mut self, node: &Self::Node);
    fn set_attribute(&mut self, node: &Self::Node, name: &str, value: Option<&str>);
    fn set_text(&mut self, node: &Self::Node, data: &str);
    fn listen(&mut self, node: &Self::Node, event: &str, handler: Box<dyn FnMut()>) -> Self::Subscription;
    fn unsubscribe(&mut self, subscription: Self::Subscription);
    /// Request a flush at the end of the current synchronous turn.
    fn schedule_flush(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeRef(pub usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryKind {
    Element(String),
    Text(String),
    Anchor,
}

#[derive(Debug, Clone)]
pub struct MemoryNode {
    pub kind: MemoryKind,
    pub attributes: BTreeMap<String, String>,
    pub children: Vec<NodeRef>,
    pub parent: Option<NodeRef>,
}

struct Listener {
    node: NodeRef,
    event: String,
    handler: Box<dyn FnMut()>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(usize);

/// In-memory host tree.
#[derive(Default)]
pub struct MemoryHost {
    nodes: Vec<MemoryNode>,
    listeners: Vec<Option<Listener>>,
    /// Number of inserts that moved an already attached node.
    pub moves: usize,
    pub flush_requests: usize,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc(&mut self, kind: MemoryKind) -> NodeRef {
        self.nodes.push(MemoryNode {
            kind,
            attributes: BTreeMap::new(),
            children: Vec::new(),
            parent: None,
        });
        NodeRef(self.nodes.len() - 1)
    }

    pub fn node(&self, node: NodeRef) -> &MemoryNode {
        &self.nodes[node.0]
    }

    pub fn children(&self, node: NodeRef) -> &[NodeRef] {
        &self.nodes[node.0].children
    }

    pub fn is_attached(&self, node: NodeRef) -> bool {
        self.nodes[node.0].parent.is_some()
    }

    /// Concatenated text of a subtree.
    pub fn text_content(&self, node: NodeRef) -> String {
        match &self.nodes[node.0].kind {
            MemoryKind::Text(data) => data.clone(),
            MemoryKind::Anchor => String::new(),
            MemoryKind::Element(_) => self.nodes[node.0]
                .children
                .iter()
                .map(|c| self.text_content(*c))
                .collect(),
        }
    }

    /// Run the handlers subscribed to `event` on `node`; returns how many ran.
    pub fn dispatch(&mut self, node: NodeRef, event: &str) -> usize {
        let mut count = 0;
        for listener in self.listeners.iter_mut().flatten() {
            if listener.node == node && listener.event == event {
                (listener.handler)();
                count += 1;
            }
        }
        count
    }
}

impl Host for MemoryHost {
    type Node = NodeRef;
    type Subscription = ListenerId;

    fn create_element(&mut self, name: &str) -> NodeRef {
        self.alloc(MemoryKind::Element(name.to_string()))
    }

    fn create_text(&mut self, data: &str) -> NodeRef {
        self.alloc(MemoryKind::Text(data.to_string()))
    }

    fn create_anchor(&mut self) -> NodeRef {
        self.alloc(MemoryKind::Anchor)
    }

    fn insert(&mut self, parent: &NodeRef, node: &NodeRef, anchor: Option<&NodeRef>) {
        if self.nodes[node.0].parent.is_some() {
            self.moves += 1;
            self.detach(node);
        }
        let children = &mut self.nodes[parent.0].children;
        let position = anchor
            .and_then(|a| children.iter().position(|c| c == a))
            .unwrap_or(children.len());
        children.insert(position, *node);
        self.nodes[node.0].parent = Some(*parent);
    }

    fn detach(&mut self, node: &NodeRef) {
        if let Some(parent) = self.nodes[node.0].parent.take() {
            self.nodes[parent.0].children.retain(|c| c != node);
        }
    }

    fn set_attribute(&mut self, node: &NodeRef, name: &str, value: Option<&str>) {
        let attributes = &mut self.nodes[node.0].attributes;
        match value {
            Some(value) => {
                attributes.insert(name.to_string(), value.to_string());
            }
            None => {
                attributes.remove(name);
            }
        }
    }

    fn set_text(&mut self, node: &NodeRef, data: &str) {
        if let MemoryKind::Text(text) = &mut self.nodes[node.0].kind {
            *text = data.to_string();
        }
    }

    fn listen(&mut self, node: &NodeRef, event: &str, handler: Box<dyn FnMut()>) -> ListenerId {
        self.listeners.push(Some(Listener {
            node: *node,
            event: event.to_string(),
            handler,
        }));
        ListenerId(self.listeners.len() - 1)
    }

    fn unsubscribe(&mut self, subscription: ListenerId) {
        if let Some(slot) = self.listeners.get_mut(subscription.0) {
            *slot = None;
        }
    }

    fn schedule_flush(&mut self) {
        self.flush_requests += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_insert_before_anchor_and_move() {
        let mut host = MemoryHost::new();
        let ul = host.create_element("ul");
        let anchor = host.create_anchor();
        let a = host.create_text("a");
        let b = host.create_text("b");
        host.insert(&ul, &anchor, None);
        host.insert(&ul, &a, Some(&anchor));
        host.insert(&ul, &b, Some(&anchor));
        assert_eq!(host.text_content(ul), "ab");
        assert_eq!(host.moves, 0);

        host.insert(&ul, &b, Some(&a));
        assert_eq!(host.text_content(ul), "ba");
        assert_eq!(host.moves, 1);

        host.detach(&a);
        assert!(!host.is_attached(a));
        assert_eq!(host.children(ul), &[b, anchor]);
    }

    #[test]
    fn test_listen_and_unsubscribe() {
        let mut host = MemoryHost::new();
        let button = host.create_element("button");
        let clicks = Rc::new(Cell::new(0));
        let counter = clicks.clone();
        let sub = host.listen(&button, "click", Box::new(move || counter.set(counter.get() + 1)));
        assert_eq!(host.dispatch(button, "click"), 1);
        host.unsubscribe(sub);
        assert_eq!(host.dispatch(button, "click"), 0);
        assert_eq!(clicks.get(), 1);
    }

    #[test]
    fn test_attributes() {
        let mut host = MemoryHost::new();
        let input = host.create_element("input");
        host.set_attribute(&input, "disabled", Some(""));
        assert!(host.node(input).attributes.contains_key("disabled"));
        host.set_attribute(&input, "disabled", None);
        assert!(host.node(input).attributes.is_empty());
    }
}
