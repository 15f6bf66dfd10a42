#[cfg(test)]
mod tests {
    use crate::ast::{Ast, NodeId};
    use crate::diagnostic::{
        ERR_CSS_EMPTY_DECLARATION, ERR_CSS_REF_SELECTOR, ERR_INVALID_EVENT_HANDLER, ERR_SCRIPT_SYNTAX,
        ERR_UNCLOSED_BLOCK, ERR_UNCLOSED_ELEMENT, ERR_VOID_CLOSING_TAG,
    };
    use crate::parse::parse;

    const SAMPLES: &[&str] = &[
        "<p>Hello {name}!</p>",
        r#"<script>
    import Row from './Row.weave';
    export let rows = [];
    let filter = '';
    $: visible = rows.filter((r) => r.label.includes(filter));
</script>

<!-- list -->
<input bind:value={filter} placeholder="filter &amp; sort">
{#each visible as { id, label }, i (id)}
    <Row {id} label="{i}: {label}" on:select={pick(id)} />
{:else}
    <p class:empty={true}>nothing</p>
{/each}

<style>
    p { color: red; }
</style>
"#,
        "{#if a}<b>a</b>{:else if b}<i>b</i>{:else}c{/if}",
        "{#await load()}<p>...</p>{:then value}<p>{value}</p>{:catch error}<p>{error.message}</p>{/await}",
        "<div>{@html raw} text {@debug a}</div>\n<br>\n<slot name=\"x\" item={a}>fallback</slot>",
    ];

    fn check_nesting(ast: &Ast, id: NodeId) {
        let node = ast.node(id);
        let mut cursor = node.span.start;
        for &child in &node.children {
            let span = ast.node(child).span;
            assert!(span.start >= cursor, "children overlap or go backwards at {}", span.start);
            assert!(span.end <= node.span.end, "child escapes its parent at {}", span.end);
            assert!(span.start <= span.end);
            cursor = span.end;
            check_nesting(ast, child);
        }
    }

    #[test]
    fn test_span_round_trip() {
        for source in SAMPLES {
            let ast = parse(source).unwrap();
            let rebuilt: String = ast
                .node(ast.root)
                .children
                .iter()
                .map(|c| ast.slice(ast.node(*c).span))
                .collect();
            assert_eq!(&rebuilt, source);
            check_nesting(&ast, ast.root);
        }
    }

    #[test]
    fn test_expression_spans_slice_to_source() {
        for source in SAMPLES {
            let ast = parse(source).unwrap();
            for expr in ast.expressions() {
                assert_eq!(ast.slice(expr.span), expr.source);
            }
        }
    }

    #[test]
    fn test_void_closing_tag_offset() {
        let source = "<div><input></input></div>";
        let errors = parse(source).unwrap_err();
        assert_eq!(errors[0].code, ERR_VOID_CLOSING_TAG);
        assert_eq!(errors[0].offset, source.find("</input>").unwrap());
    }

    #[test]
    fn test_unclosed_element_points_at_open_tag() {
        let source = "<div><span></div>";
        let errors = parse(source).unwrap_err();
        assert_eq!(errors[0].code, ERR_UNCLOSED_ELEMENT);
        assert_eq!(errors[0].offset, source.find("<span>").unwrap());
    }

    #[test]
    fn test_event_handler_must_be_a_call() {
        let source = "<button on:click={count}>+</button>";
        let errors = parse(source).unwrap_err();
        assert_eq!(errors[0].code, ERR_INVALID_EVENT_HANDLER);
        assert_eq!(errors[0].offset, source.find("count").unwrap());
    }

    #[test]
    fn test_unclosed_block() {
        let errors = parse("{#if a}<p>a</p>").unwrap_err();
        assert_eq!(errors[0].code, ERR_UNCLOSED_BLOCK);
    }

    #[test]
    fn test_script_and_template_errors_are_batched() {
        let source = "<script>let = ;</script>\n<div>";
        let errors = parse(source).unwrap_err();
        let codes: Vec<&str> = errors.iter().map(|e| e.code.as_str()).collect();
        assert_eq!(codes, vec![ERR_SCRIPT_SYNTAX, ERR_UNCLOSED_ELEMENT]);
        assert!(errors[0].offset < errors[1].offset);
    }

    #[test]
    fn test_style_errors() {
        let errors = parse("<style>p { color: ; }</style>").unwrap_err();
        assert_eq!(errors[0].code, ERR_CSS_EMPTY_DECLARATION);

        let errors = parse("<style>ref:thing { color: red; }</style>").unwrap_err();
        assert_eq!(errors[0].code, ERR_CSS_REF_SELECTOR);
    }

    #[test]
    fn test_errors_carry_line_and_column() {
        let source = "<div>\n  <input></input>\n</div>";
        let diagnostics = crate::compile(source, &Default::default()).unwrap_err();
        let err = &diagnostics.errors[0];
        assert_eq!(err.code, ERR_VOID_CLOSING_TAG);
        assert_eq!((err.line, err.column), (2, 10));
        assert!(err.frame.as_deref().unwrap_or("").contains("</input>"));
    }
}
