//! Structural syntax tree.
//!
//! Nodes live in an arena owned by [`Ast`] and are addressed by [`NodeId`].
//! Parent links are plain ids resolved by lookup. The tree is built once by
//! the parser and is read-only afterwards; later stages keep their results in
//! side tables keyed by `NodeId` / `ExprId`.

use serde::{Deserialize, Serialize};

use crate::expression::ExprInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, other: Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExprId(pub u32);

impl ExprId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// NODES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize)]
pub struct Node {
    pub kind: NodeKind,
    pub span: Span,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum NodeKind {
    Fragment,
    Element(Element),
    Component(Element),
    Slot(Element),
    Text(Text),
    Comment(Comment),
    MustacheTag(ExprId),
    RawMustacheTag(ExprId),
    DebugTag(DebugTag),
    IfBlock(IfBlock),
    ElseBlock,
    EachBlock(EachBlock),
    AwaitBlock(AwaitBlock),
    PendingBlock,
    ThenBlock,
    CatchBlock,
    Script(Script),
    Style(StyleBlock),
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Fragment => "Fragment",
            NodeKind::Element(_) => "Element",
            NodeKind::Component(_) => "Component",
            NodeKind::Slot(_) => "Slot",
            NodeKind::Text(_) => "Text",
            NodeKind::Comment(_) => "Comment",
            NodeKind::MustacheTag(_) => "MustacheTag",
            NodeKind::RawMustacheTag(_) => "RawMustacheTag",
            NodeKind::DebugTag(_) => "DebugTag",
            NodeKind::IfBlock(_) => "IfBlock",
            NodeKind::ElseBlock => "ElseBlock",
            NodeKind::EachBlock(_) => "EachBlock",
            NodeKind::AwaitBlock(_) => "AwaitBlock",
            NodeKind::PendingBlock => "PendingBlock",
            NodeKind::ThenBlock => "ThenBlock",
            NodeKind::CatchBlock => "CatchBlock",
            NodeKind::Script(_) => "Script",
            NodeKind::Style(_) => "Style",
        }
    }

    /// Element-like nodes: plain elements, components and slots.
    pub fn as_element(&self) -> Option<&Element> {
        match self {
            NodeKind::Element(el) | NodeKind::Component(el) | NodeKind::Slot(el) => Some(el),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Element {
    pub name: String,
    pub attributes: Vec<Attribute>,
    pub directives: Vec<Directive>,
    pub self_closing: bool,
}

impl Element {
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn static_attribute(&self, name: &str) -> Option<&str> {
        match self.attribute(name).map(|a| &a.value) {
            Some(AttributeValue::Static(value)) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn directives_of(&self, kind: DirectiveKind) -> impl Iterator<Item = &Directive> {
        self.directives.iter().filter(move |d| d.kind == kind)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Attribute {
    pub name: String,
    pub span: Span,
    pub value: AttributeValue,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "kebab-case")]
pub enum AttributeValue {
    /// Bare boolean attribute: `disabled`.
    True,
    Static(String),
    /// Expression or text/expression concatenation. `{name}` shorthand is a
    /// single expression chunk.
    Dynamic(Vec<AttributeChunk>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "kebab-case")]
pub enum AttributeChunk {
    Text(String),
    Expression(ExprId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DirectiveKind {
    On,
    Bind,
    Class,
    Use,
    Transition,
    In,
    Out,
    Let,
}

impl DirectiveKind {
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        Some(match prefix {
            "on" => DirectiveKind::On,
            "bind" => DirectiveKind::Bind,
            "class" => DirectiveKind::Class,
            "use" => DirectiveKind::Use,
            "transition" => DirectiveKind::Transition,
            "in" => DirectiveKind::In,
            "out" => DirectiveKind::Out,
            "let" => DirectiveKind::Let,
            _ => return None,
        })
    }

    pub fn is_intro(self) -> bool {
        matches!(self, DirectiveKind::Transition | DirectiveKind::In)
    }

    pub fn is_outro(self) -> bool {
        matches!(self, DirectiveKind::Transition | DirectiveKind::Out)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Directive {
    pub kind: DirectiveKind,
    pub name: String,
    pub modifiers: Vec<String>,
    pub expression: Option<ExprId>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize)]
pub struct Text {
    pub raw: String,
    /// Entity-decoded text.
    pub data: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Comment {
    pub data: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DebugTag {
    pub identifiers: Vec<ExprId>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IfBlock {
    pub test: ExprId,
    /// `{:else if}` continuation nested inside an ElseBlock.
    pub else_if: bool,
    pub consequent: Vec<NodeId>,
    pub alternate: Option<NodeId>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EachContext {
    /// Pattern text as written (`item`, `{ id, name }`, `[a, b]`).
    pub source: String,
    pub span: Span,
    pub names: Vec<String>,
    pub destructured: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EachBlock {
    pub expression: ExprId,
    pub context: EachContext,
    pub index: Option<String>,
    pub key: Option<ExprId>,
    pub body: Vec<NodeId>,
    pub fallback: Option<NodeId>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AwaitBlock {
    pub expression: ExprId,
    pub value: Option<String>,
    pub error: Option<String>,
    pub pending: Option<NodeId>,
    pub then: Option<NodeId>,
    pub catch: Option<NodeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptContext {
    Instance,
    Module,
}

#[derive(Debug, Clone, Serialize)]
pub struct Script {
    pub context: ScriptContext,
    /// Span of the script body between the tags.
    pub content: Span,
}

#[derive(Debug, Clone, Serialize)]
pub struct StyleBlock {
    pub content: Span,
    pub stylesheet: crate::style::Stylesheet,
}

// ═══════════════════════════════════════════════════════════════════════════════
// EXPRESSIONS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize)]
pub struct Expr {
    pub id: ExprId,
    pub span: Span,
    pub source: String,
    pub info: ExprInfo,
    /// Owning node.
    pub node: NodeId,
}

// ═══════════════════════════════════════════════════════════════════════════════
// ARENA
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize)]
pub struct Ast {
    pub source: String,
    pub root: NodeId,
    nodes: Vec<Node>,
    expressions: Vec<Expr>,
    pub instance: Option<NodeId>,
    pub module: Option<NodeId>,
    pub style: Option<NodeId>,
}

impl Ast {
    pub fn new(source: &str) -> Self {
        let root = Node {
            kind: NodeKind::Fragment,
            span: Span::new(0, source.len()),
            parent: None,
            children: vec![],
        };
        Ast {
            source: source.to_string(),
            root: NodeId(0),
            nodes: vec![root],
            expressions: vec![],
            instance: None,
            module: None,
            style: None,
        }
    }

    pub fn alloc(&mut self, kind: NodeKind, span: Span, parent: NodeId) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            kind,
            span,
            parent: Some(parent),
            children: vec![],
        });
        self.nodes[parent.index()].children.push(id);
        id
    }

    /// Id the next allocated node will receive.
    pub fn next_id(&self) -> NodeId {
        NodeId(self.nodes.len() as u32)
    }

    pub fn add_expr(&mut self, span: Span, source: String, info: ExprInfo, node: NodeId) -> ExprId {
        let id = ExprId(self.expressions.len() as u32);
        self.expressions.push(Expr {
            id,
            span,
            source,
            info,
            node,
        });
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.index()].kind
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.index()].children
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.index()].parent
    }

    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.expressions[id.index()]
    }

    pub fn expressions(&self) -> &[Expr] {
        &self.expressions
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    pub fn slice(&self, span: Span) -> &str {
        &self.source[span.start..span.end]
    }

    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(id), move |p| self.parent(*p))
    }

    /// Template children of the root, skipping script and style nodes.
    pub fn template_children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.children(id)
            .iter()
            .copied()
            .filter(move |c| !matches!(self.kind(*c), NodeKind::Script(_) | NodeKind::Style(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_links_parent_and_child() {
        let mut ast = Ast::new("<p>hi</p>");
        let root = ast.root;
        let p = ast.alloc(
            NodeKind::Element(Element {
                name: "p".to_string(),
                attributes: vec![],
                directives: vec![],
                self_closing: false,
            }),
            Span::new(0, 9),
            root,
        );
        let text = ast.alloc(
            NodeKind::Text(Text {
                raw: "hi".to_string(),
                data: "hi".to_string(),
            }),
            Span::new(3, 5),
            p,
        );
        assert_eq!(ast.children(root), &[p]);
        assert_eq!(ast.parent(text), Some(p));
        assert_eq!(ast.ancestors(text).collect::<Vec<_>>(), vec![p, root]);
        assert_eq!(ast.slice(ast.node(text).span), "hi");
    }

    #[test]
    fn test_directive_prefixes() {
        assert_eq!(DirectiveKind::from_prefix("on"), Some(DirectiveKind::On));
        assert_eq!(DirectiveKind::from_prefix("ref"), None);
        assert!(DirectiveKind::Transition.is_intro() && DirectiveKind::Transition.is_outro());
        assert!(!DirectiveKind::In.is_outro());
    }
}
