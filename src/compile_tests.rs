#[cfg(test)]
mod tests {
    use crate::diagnostic::{
        ERR_DEPENDENCY_CYCLE, ERR_ILLEGAL_REDECLARATION, ERR_INVALID_BINDING, ERR_UNRESOLVED_IDENTIFIER,
        WARN_CSS_UNUSED_SELECTOR,
    };
    use crate::{compile, compile_many, BindingKind, CompileOptions, Generate};

    const COUNTER: &str = r#"<script>
    export let step = 1;
    let count = 0;
    $: doubled = count * 2;
    function increment() {
        count += step;
    }
</script>

<button on:click={increment()}>{count} / {doubled}</button>
"#;

    /// Statements at the top level of every `patch` body.
    fn patch_statements(js: &str) -> Vec<&str> {
        let mut out = Vec::new();
        let mut inside = false;
        for line in js.lines() {
            if line.trim_start().starts_with("patch(changed, new_ctx) {") {
                inside = true;
            } else if inside && line == "    }," {
                inside = false;
            } else if inside && line.starts_with("      ") && !line.starts_with("       ") {
                out.push(line.trim());
            }
        }
        out
    }

    fn runtime_imports(js: &str) -> Vec<&str> {
        let line = js.lines().find(|l| l.starts_with("import {") && l.contains("weave/internal")).unwrap();
        let start = line.find('{').unwrap() + 1;
        let end = line.find('}').unwrap();
        line[start..end].split(',').map(str::trim).collect()
    }

    fn options(filename: &str) -> CompileOptions {
        CompileOptions {
            filename: Some(filename.to_string()),
            ..CompileOptions::default()
        }
    }

    #[test]
    fn test_counter_program_shape() {
        let output = compile(COUNTER, &options("Counter.weave")).unwrap();
        let js = &output.js;

        assert!(js.contains("function create_fragment(ctx)"));
        assert!(js.contains("function instance($$self, $$props, $$invalidate)"));
        assert!(js.contains("class Counter extends Component"));
        assert!(js.trim_end().ends_with("export default Counter;"));
        assert!(js.contains("$$invalidate(\"count\", "));
        assert!(js.contains("\"step\" in $$props ? $$props[\"step\"] : (1)"));
        assert!(js.contains("changed.has(\"$$initial\") || changed.has(\"count\")"));
        assert!(js.contains("if (changed.has(\"count\")) set_data("));
        // `doubled` is guarded by its own name and by its root.
        assert!(js.contains("changed.has(\"count\") || changed.has(\"doubled\")"));
        assert!(js.contains("listen("));
        assert!(!js.contains("dispatch_dev"));
        assert_eq!(output.props, vec!["step"]);
        assert!(output.stats.blocks >= 1);
    }

    #[test]
    fn test_dev_mode_markers() {
        let options = options("Counter.weave").dev(true);
        let js = compile(COUNTER, &options).unwrap().js;
        assert!(js.contains("const file = \"Counter.weave\";"));
        assert!(js.contains("dispatch_dev(\"WeaveStateChange\""));
        assert!(js.contains("$$self.$capture_state"));
        assert!(js.contains("add_location("));
    }

    #[test]
    fn test_keyed_each_with_transitions() {
        let source = r#"<script>
    import { fade } from 'weave/transition';
    export let items = [];
</script>

<ul>
    {#each items as item (item.id)}
        <li transition:fade>{item.name}</li>
    {/each}
</ul>
"#;
        let js = compile(source, &CompileOptions::default()).unwrap().js;
        assert!(js.contains("update_keyed_each("));
        assert!(js.contains("outro_and_destroy_block"));
        assert!(js.contains("group_outros();"));
        assert!(js.contains("check_outros();"));
        assert!(js.contains("create_bidirectional_transition("));
        assert!(js.contains("import { fade } from \"weave/transition\";"));
    }

    #[test]
    fn test_if_block_switches_branches() {
        let source = "<script>export let ok = false;</script>{#if ok}<p>yes</p>{:else}<p>no</p>{/if}";
        let js = compile(source, &CompileOptions::default()).unwrap().js;
        assert!(js.contains("function create_if_block(ctx)"));
        assert!(js.contains("function create_else_block(ctx)"));
        assert!(js.contains("changed.has(\"ok\")"));
    }

    #[test]
    fn test_control_flow_patches_are_guarded() {
        let source = r#"<script>
    import { fade } from 'weave/transition';
    export let items = [];
    export let ok = false;
    export let load = null;
</script>
{#if ok}<p>yes</p>{:else}<p>no</p>{/if}
{#each items as item}<li transition:fade>{item}</li>{/each}
{#await load}<p>wait</p>{:then value}<p>{value}</p>{/await}
"#;
        let js = compile(source, &CompileOptions::default()).unwrap().js;
        let statements = patch_statements(&js);
        assert!(statements.iter().any(|s| s.contains("changed.has(\"ok\")")));
        assert!(statements.iter().any(|s| s.contains("changed.has(\"items\")")));
        assert!(statements.iter().any(|s| s.contains("changed.has(\"load\")")));
        for statement in statements {
            if statement == "ctx = new_ctx;" || statement.starts_with('}') {
                continue;
            }
            assert!(statement.starts_with("if (changed.has("), "unguarded patch: {}", statement);
        }
    }

    #[test]
    fn test_static_condition_has_no_patch() {
        let js = compile("{#if true}<p>yes</p>{/if}", &CompileOptions::default()).unwrap().js;
        assert!(!js.contains("const previous_if_block_index"));
        assert!(js.contains("let if_block_index = select_if_block_type(ctx);"));
    }

    #[test]
    fn test_unkeyed_outro_keeps_outgoing_items() {
        let source = r#"<script>
    import { fade } from 'weave/transition';
    export let items = [];
</script>
<ul>{#each items as item}<li transition:fade>{item}</li>{/each}</ul>"#;
        let js = compile(source, &CompileOptions::default()).unwrap().js;
        // Outgoing blocks stay in place until their outro callback runs.
        assert!(!js.contains(".slice(0, "));
        assert!(!js.contains("each_blocks.length = each_value.length"));
        assert!(js.contains("if (each_blocks[slot] === outgoing) each_blocks[slot] = null;"));
        // A returning item is patched and re-entered instead of recreated.
        assert!(js.contains("if (each_blocks[i]) {\n"));
        assert!(js.contains("transition_in(each_blocks[i], 1);"));
        assert!(js.contains("if (each_blocks[i]) each_blocks[i].destroy("));
        assert!(js.contains("if (each_blocks[i]) transition_out(each_blocks[i], local);"));
        assert!(!js.contains("filter(Boolean)"));
    }

    #[test]
    fn test_only_emitted_helpers_are_imported() {
        let source = "<script>export let ok = false;</script>{#if ok}<p>yes</p>{/if}";
        let js = compile(source, &CompileOptions::default()).unwrap().js;
        let imports = runtime_imports(&js);
        for unused in ["attr", "transition_in", "transition_out", "add_render_callback", "set_data"] {
            assert!(!imports.contains(&unused), "{} imported but never called", unused);
        }
        let body: Vec<&str> = js.lines().filter(|l| !l.starts_with("import {")).collect();
        let body = body.join("\n");
        for helper in imports {
            assert!(body.contains(helper), "{} imported but never used", helper);
        }
    }

    #[test]
    fn test_unresolved_identifier_strict_and_lenient() {
        let source = "<p>{missing}</p>";
        let lenient = compile(source, &CompileOptions::default()).unwrap();
        assert_eq!(lenient.warnings[0].code, ERR_UNRESOLVED_IDENTIFIER);

        let strict = compile(source, &CompileOptions::default().strict(true)).unwrap_err();
        assert_eq!(strict.codes(), vec![ERR_UNRESOLVED_IDENTIFIER]);
        assert_eq!(strict.errors[0].offset, 4);
    }

    #[test]
    fn test_scoped_css_and_unused_selector() {
        let source = "<p>hi</p>\n<style>\n  p { color: red; }\n  .gone { color: blue; }\n</style>";
        let output = compile(source, &CompileOptions::default()).unwrap();
        let css = output.css.unwrap();
        assert!(css.contains("p.weave-"));
        assert!(!css.contains(".gone"));
        assert_eq!(output.warnings[0].code, WARN_CSS_UNUSED_SELECTOR);
        assert!(output.js.contains("function add_css(target)"));
        assert!(output.js.contains("\"class\", \"weave-"));
    }

    #[test]
    fn test_dependency_cycle_fails_compile() {
        let source = "<script>$: a = b + 1; $: b = a + 1;</script>{a}";
        let diagnostics = compile(source, &CompileOptions::default()).unwrap_err();
        assert_eq!(diagnostics.codes(), vec![ERR_DEPENDENCY_CYCLE]);
        let message = &diagnostics.errors[0].message;
        assert!(message.contains('a') && message.contains('b'));
        assert_eq!(diagnostics.errors[0].line, 1);
    }

    #[test]
    fn test_redeclaration_fails_compile() {
        let source = "<script>let a = 1; let a = 2;</script>{a}";
        let diagnostics = compile(source, &CompileOptions::default()).unwrap_err();
        assert_eq!(diagnostics.errors[0].code, ERR_ILLEGAL_REDECLARATION);
    }

    #[test]
    fn test_binding_to_non_state_is_rejected() {
        let source = "<script>const limit = 3;</script><input bind:value={limit}>";
        let diagnostics = compile(source, &CompileOptions::default().strict(true)).unwrap_err();
        assert_eq!(diagnostics.errors[0].code, ERR_INVALID_BINDING);
    }

    #[test]
    fn test_vars_report() {
        let output = compile(COUNTER, &CompileOptions::default()).unwrap();
        let var = |name: &str| output.vars.iter().find(|v| v.name == name).unwrap();
        assert_eq!(var("step").kind, BindingKind::Prop);
        assert!(var("step").exported);
        assert_eq!(var("count").kind, BindingKind::State);
        assert!(var("count").mutated);
        assert_eq!(var("doubled").kind, BindingKind::Derived);
        assert!(var("doubled").referenced_in_template);
        assert_eq!(var("increment").kind, BindingKind::Local);
    }

    #[test]
    fn test_ssr_target() {
        let options = CompileOptions::default().generate(Generate::Ssr);
        let js = compile(COUNTER, &options).unwrap().js;
        assert!(js.contains("export function render($$props = {}, $$slots = {})"));
        assert!(js.contains("escape(count)"));
        assert!(!js.contains("$$invalidate"));
    }

    #[test]
    fn test_compile_many_keeps_order() {
        let sources = vec![
            ("A.weave".to_string(), "<p>a</p>".to_string()),
            ("B.weave".to_string(), "<div>".to_string()),
            ("C.weave".to_string(), COUNTER.to_string()),
        ];
        let results = compile_many(&sources, &CompileOptions::default());
        let names: Vec<&str> = results.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["A.weave", "B.weave", "C.weave"]);

        assert!(results[0].1.as_ref().unwrap().js.contains("class A extends Component"));
        let failed = results[1].1.as_ref().unwrap_err();
        assert_eq!(failed.errors[0].file, "B.weave");
        assert!(results[2].1.is_ok());
    }

    #[test]
    fn test_output_serializes_camel_case() {
        let output = compile(COUNTER, &CompileOptions::default()).unwrap();
        let value = serde_json::to_value(&output).unwrap();
        assert!(value["js"].as_str().unwrap().contains("create_fragment"));
        assert_eq!(value["props"], serde_json::json!(["step"]));
        let doubled = value["vars"]
            .as_array()
            .unwrap()
            .iter()
            .find(|v| v["name"] == "doubled")
            .unwrap();
        assert_eq!(doubled["referencedInTemplate"], true);
        assert_eq!(value["stats"]["reactiveStatements"], 1);
    }

    #[test]
    fn test_local_transition_waits_for_its_block() {
        let source = r#"<script>
    import { fly } from 'weave/transition';
    export let open = false;
</script>
{#if open}<div in:fly|local={{ y: 20 }}>menu</div>{/if}"#;
        let js = compile(source, &CompileOptions::default()).unwrap().js;
        assert!(js.contains("if (local) {"));
        assert!(js.contains("create_in_transition(div, fly, { y: 20 })"));
    }

    #[test]
    fn test_output_is_deterministic() {
        let first = compile(COUNTER, &CompileOptions::default()).unwrap().js;
        let second = compile(COUNTER, &CompileOptions::default()).unwrap().js;
        assert_eq!(first, second);
    }
}
