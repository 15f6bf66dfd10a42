#[cfg(test)]
mod tests {
    use crate::ast::{Ast, NodeKind};
    use crate::binder::{self, BindingKind, Bindings};
    use crate::deps::{self, DependencyInfo};
    use crate::diagnostic::{CompilerError, ERR_DEPENDENCY_CYCLE};
    use crate::options::CompileOptions;
    use crate::parse::parse;
    use crate::scope::ScopeTree;
    use crate::script::{analyze_script, ScriptAnalysis};
    use crate::session::CompileSession;

    struct Analysed {
        ast: Ast,
        instance: ScriptAnalysis,
        bindings: Bindings,
        deps: Result<DependencyInfo, Vec<CompilerError>>,
    }

    impl Analysed {
        fn order(&self) -> Vec<String> {
            let info = self.deps.as_ref().unwrap();
            info.order
                .iter()
                .filter_map(|&i| self.instance.reactive[i].target.clone())
                .collect()
        }

        fn reads_of(&self, target: &str) -> Vec<String> {
            let info = self.deps.as_ref().unwrap();
            let i = self
                .instance
                .reactive
                .iter()
                .position(|r| r.target.as_deref() == Some(target))
                .unwrap();
            info.reactive_reads[i].iter().cloned().collect()
        }
    }

    fn analyse(source: &str) -> Analysed {
        let ast = parse(source).unwrap();
        let NodeKind::Script(script) = ast.kind(ast.instance.unwrap()) else {
            panic!("component has no instance script");
        };
        let instance = analyze_script(&ast.source, script.content, script.context).unwrap();
        let scopes = ScopeTree::build(&ast);
        let options = CompileOptions::default();
        let mut session = CompileSession::new(source, &options);
        let bindings = binder::bind(&ast, Some(&instance), None, &scopes, &mut session).unwrap();
        let deps = deps::analyze(&ast, Some(&instance), &bindings, &scopes);
        Analysed {
            ast,
            instance,
            bindings,
            deps,
        }
    }

    #[test]
    fn test_read_set_follows_initializer_reads() {
        let a = analyse(
            "<script>
                export let flag = false;
                export let left = 1;
                export let right = 2;
                export let later = 3;
                $: picked = flag ? left : right;
                $: callback = () => later;
            </script>
            {picked} {callback}",
        );
        assert_eq!(a.reads_of("picked"), vec!["flag", "left", "right"]);
        assert!(a.reads_of("callback").is_empty());
    }

    #[test]
    fn test_assignee_is_not_a_read() {
        let a = analyse(
            "<script>
                export let step = 1;
                let total = 0;
                $: total = total + step;
            </script>
            {total}",
        );
        assert_eq!(a.reads_of("total"), vec!["step"]);
    }

    #[test]
    fn test_kinds() {
        let a = analyse(
            "<script>
                import Row from './Row.weave';
                export let title;
                let clicks = 0;
                const label = 'x';
                $: doubled = clicks * 2;
                function click() { clicks += 1; }
            </script>
            <Row {title} /> {doubled} {label}
            <button on:click={click()}>+</button>",
        );
        let kind = |name: &str| a.bindings.kind_of(name);
        assert_eq!(kind("Row"), Some(BindingKind::Import));
        assert_eq!(kind("title"), Some(BindingKind::Prop));
        assert_eq!(kind("clicks"), Some(BindingKind::State));
        assert_eq!(kind("doubled"), Some(BindingKind::Derived));
        assert_eq!(kind("label"), Some(BindingKind::Hoistable));
        assert_eq!(kind("click"), Some(BindingKind::Local));
    }

    #[test]
    fn test_order_is_stable_under_unrelated_reordering() {
        let chained = "
            export let x;
            export let p;
            $: c = b + 1;
            $: b = x * 2;
            $: q = p;";
        let moved = "
            export let x;
            export let p;
            $: q = p;
            $: c = b + 1;
            $: b = x * 2;";
        let first = analyse(&format!("<script>{}</script>{{c}} {{q}}", chained));
        let second = analyse(&format!("<script>{}</script>{{c}} {{q}}", moved));

        assert_eq!(first.order(), vec!["b", "c", "q"]);
        assert_eq!(second.order(), vec!["q", "b", "c"]);

        let chain = |order: Vec<String>| order.into_iter().filter(|n| n != "q").collect::<Vec<_>>();
        assert_eq!(chain(first.order()), chain(second.order()));
        assert_eq!(first.order(), analyse(&format!("<script>{}</script>{{c}} {{q}}", chained)).order());
    }

    #[test]
    fn test_cycle_is_one_error_naming_both() {
        let a = analyse(
            "<script>
                export let seed = 0;
                $: a = b + seed;
                $: b = a + 1;
            </script>
            {a}",
        );
        let errors = a.deps.unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, ERR_DEPENDENCY_CYCLE);
        assert!(errors[0].message.contains('a') && errors[0].message.contains('b'));
    }

    #[test]
    fn test_handler_write_is_not_a_cycle() {
        let a = analyse(
            "<script>
                let count = 0;
                $: doubled = count * 2;
                function reset() { count = doubled - doubled; }
            </script>
            <button on:click={reset()}>{doubled}</button>",
        );
        assert!(a.deps.is_ok());
        assert_eq!(a.order(), vec!["doubled"]);
    }

    #[test]
    fn test_expression_deps_close_over_derived() {
        let a = analyse(
            "<script>
                export let x;
                $: d = x * 2;
                $: e = d + 1;
            </script>
            <p>{e}</p>",
        );
        let info = a.deps.as_ref().unwrap();
        let expr = a.ast.expressions().iter().find(|e| e.source == "e").unwrap();
        let deps: Vec<&str> = info.expr_deps(expr.id).iter().map(String::as_str).collect();
        assert_eq!(deps, vec!["d", "e", "x"]);
    }

    #[test]
    fn test_each_locals_inherit_list_deps() {
        let a = analyse(
            "<script>
                export let rows = [];
            </script>
            {#each rows as row}<p>{row.name}</p>{/each}",
        );
        let info = a.deps.as_ref().unwrap();
        let expr = a.ast.expressions().iter().find(|e| e.source == "row.name").unwrap();
        let deps: Vec<&str> = info.expr_deps(expr.id).iter().map(String::as_str).collect();
        assert_eq!(deps, vec!["row", "rows"]);
    }
}
