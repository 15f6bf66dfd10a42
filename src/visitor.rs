use crate::ast::{
    Ast, AttributeChunk, AttributeValue, AwaitBlock, EachBlock, Element, Expr, ExprId, IfBlock,
    NodeId, NodeKind,
};

/// The NodeVisitor trait is the single traversal mechanism over the template arena.
///
/// Rules:
/// 1. Traversal order is source order.
/// 2. Implementers override `visit_*` methods to add behavior.
/// 3. Implementers call the matching `walk_*` function to continue traversal
///    unless pruning is intended.
/// 4. Script and style nodes are never visited.
pub trait NodeVisitor {
    fn visit_node(&mut self, ast: &Ast, id: NodeId) {
        walk_node(self, ast, id);
    }

    fn visit_element(&mut self, ast: &Ast, id: NodeId, element: &Element) {
        walk_element(self, ast, id, element);
    }

    fn visit_component(&mut self, ast: &Ast, id: NodeId, component: &Element) {
        walk_element(self, ast, id, component);
    }

    fn visit_slot(&mut self, ast: &Ast, id: NodeId, slot: &Element) {
        walk_element(self, ast, id, slot);
    }

    fn visit_if_block(&mut self, ast: &Ast, id: NodeId, block: &IfBlock) {
        walk_if_block(self, ast, id, block);
    }

    fn visit_each_block(&mut self, ast: &Ast, id: NodeId, block: &EachBlock) {
        walk_each_block(self, ast, id, block);
    }

    fn visit_await_block(&mut self, ast: &Ast, id: NodeId, block: &AwaitBlock) {
        walk_await_block(self, ast, id, block);
    }

    /// Leaf: every template expression owned by a visited node.
    fn visit_expression(&mut self, _ast: &Ast, _owner: NodeId, _expr: &Expr) {}
}

pub fn walk_root<V: NodeVisitor + ?Sized>(visitor: &mut V, ast: &Ast) {
    for child in ast.template_children(ast.root) {
        visitor.visit_node(ast, child);
    }
}

pub fn walk_children<V: NodeVisitor + ?Sized>(visitor: &mut V, ast: &Ast, id: NodeId) {
    for &child in ast.children(id) {
        visitor.visit_node(ast, child);
    }
}

pub fn walk_node<V: NodeVisitor + ?Sized>(visitor: &mut V, ast: &Ast, id: NodeId) {
    match ast.kind(id) {
        NodeKind::Element(el) => visitor.visit_element(ast, id, el),
        NodeKind::Component(el) => visitor.visit_component(ast, id, el),
        NodeKind::Slot(el) => visitor.visit_slot(ast, id, el),
        NodeKind::IfBlock(block) => visitor.visit_if_block(ast, id, block),
        NodeKind::EachBlock(block) => visitor.visit_each_block(ast, id, block),
        NodeKind::AwaitBlock(block) => visitor.visit_await_block(ast, id, block),
        NodeKind::MustacheTag(expr) | NodeKind::RawMustacheTag(expr) => {
            visit_expr(visitor, ast, id, *expr)
        }
        NodeKind::DebugTag(tag) => {
            for expr in &tag.identifiers {
                visit_expr(visitor, ast, id, *expr);
            }
        }
        NodeKind::Fragment
        | NodeKind::ElseBlock
        | NodeKind::PendingBlock
        | NodeKind::ThenBlock
        | NodeKind::CatchBlock => walk_children(visitor, ast, id),
        NodeKind::Text(_) | NodeKind::Comment(_) | NodeKind::Script(_) | NodeKind::Style(_) => {}
    }
}

fn visit_expr<V: NodeVisitor + ?Sized>(visitor: &mut V, ast: &Ast, owner: NodeId, expr: ExprId) {
    visitor.visit_expression(ast, owner, ast.expr(expr));
}

/// Attribute and directive expressions, then children.
pub fn walk_element<V: NodeVisitor + ?Sized>(visitor: &mut V, ast: &Ast, id: NodeId, element: &Element) {
    for expr in element_expressions(element) {
        visit_expr(visitor, ast, id, expr);
    }
    walk_children(visitor, ast, id);
}

pub fn walk_if_block<V: NodeVisitor + ?Sized>(visitor: &mut V, ast: &Ast, id: NodeId, block: &IfBlock) {
    visit_expr(visitor, ast, id, block.test);
    walk_children(visitor, ast, id);
}

pub fn walk_each_block<V: NodeVisitor + ?Sized>(visitor: &mut V, ast: &Ast, id: NodeId, block: &EachBlock) {
    visit_expr(visitor, ast, id, block.expression);
    if let Some(key) = block.key {
        visit_expr(visitor, ast, id, key);
    }
    walk_children(visitor, ast, id);
}

pub fn walk_await_block<V: NodeVisitor + ?Sized>(visitor: &mut V, ast: &Ast, id: NodeId, block: &AwaitBlock) {
    visit_expr(visitor, ast, id, block.expression);
    walk_children(visitor, ast, id);
}

/// Expressions held by an element's attributes and directives, in source order.
pub fn element_expressions(element: &Element) -> Vec<ExprId> {
    let mut exprs = Vec::new();
    for attr in &element.attributes {
        if let AttributeValue::Dynamic(chunks) = &attr.value {
            for chunk in chunks {
                if let AttributeChunk::Expression(expr) = chunk {
                    exprs.push(*expr);
                }
            }
        }
    }
    for directive in &element.directives {
        if let Some(expr) = directive.expression {
            exprs.push(expr);
        }
    }
    exprs.sort_by_key(|e| e.0);
    exprs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse;

    #[derive(Default)]
    struct Collect {
        expressions: Vec<String>,
        components: Vec<String>,
    }

    impl NodeVisitor for Collect {
        fn visit_component(&mut self, ast: &Ast, id: NodeId, component: &Element) {
            self.components.push(component.name.clone());
            walk_element(self, ast, id, component);
        }

        fn visit_expression(&mut self, _ast: &Ast, _owner: NodeId, expr: &Expr) {
            self.expressions.push(expr.source.clone());
        }
    }

    #[test]
    fn test_visits_expressions_in_source_order() {
        let ast = parse(
            "<script>let a, b, c, items = [];</script>\n<p class={a}>{b}</p>{#each items as item (item)}<Row value={c} />{/each}",
        )
        .unwrap();
        let mut collect = Collect::default();
        walk_root(&mut collect, &ast);
        assert_eq!(collect.expressions, vec!["a", "b", "items", "item", "c"]);
        assert_eq!(collect.components, vec!["Row"]);
    }
}
