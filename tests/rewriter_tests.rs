#[cfg(test)]
mod tests {
    use unstack::ast::Module;
    use unstack::formatter::format_module;
    use unstack::lexer::Lexer;
    use unstack::parser;
    use unstack::rewrite::{rewrite_module, RewriteError, RewriteOptions};

    fn parse_source(source: &str) -> Module {
        let mut lexer = Lexer::new(source);
        let tokens = lexer.tokenize();
        assert!(
            lexer.get_errors().is_empty(),
            "lexer errors: {:?}",
            lexer.get_errors()
        );
        parser::parse(tokens).expect("test source must parse")
    }

    fn transform(source: &str) -> Result<String, RewriteError> {
        let module = parse_source(source);
        rewrite_module(&module, &RewriteOptions::default()).map(|m| format_module(&m))
    }

    const FIB_SOURCE: &str = "\
@unstack
def fib(n):
    if n <= 1:
        return n
    return fib(n - 1) + fib(n - 2)

print(fib(10))
";

    const FIB_TRANSFORMED: &str = "\
def _unstack_drive(step, key, cache):
    frontier = [key]
    while len(frontier) > 0:
        current = frontier.pop()
        if current in cache:
            continue
        outcome = step(current)
        if outcome[0] == \"need\":
            frontier.append(current)
            frontier.append(outcome[1])
        else:
            cache[current] = outcome[1]
    return cache[key]


_fib_cache = {}

def _fib_step(_fib_key):
    n = _fib_key[0]
    if n <= 1:
        return (\"done\", n)
    _fib_k0 = ((n - 1),)
    if _fib_k0 not in _fib_cache:
        return (\"need\", _fib_k0)
    _fib_v0 = _fib_cache[_fib_k0]
    _fib_k1 = ((n - 2),)
    if _fib_k1 not in _fib_cache:
        return (\"need\", _fib_k1)
    _fib_v1 = _fib_cache[_fib_k1]
    return (\"done\", (_fib_v0 + _fib_v1))


def fib(n):
    _fib_key = (n,)
    if _fib_key in _fib_cache:
        return _fib_cache[_fib_key]
    return _unstack_drive(_fib_step, _fib_key, _fib_cache)


print(fib(10))
";

    #[test]
    fn fib_transform_golden_output() {
        assert_eq!(transform(FIB_SOURCE).unwrap(), FIB_TRANSFORMED);
    }

    #[test]
    fn transformed_output_reparses_and_is_stable() {
        let first = transform(FIB_SOURCE).unwrap();
        let reparsed = parse_source(&first);
        let second = format_module(&reparsed);
        assert_eq!(first, second);
    }

    #[test]
    fn unmarked_program_is_left_alone() {
        let source = "\
def fib(n):
    if n <= 1:
        return n
    return fib(n - 1) + fib(n - 2)

print(fib(10))
";
        let transformed = transform(source).unwrap();
        assert!(!transformed.contains("_unstack_drive"));
        assert!(!transformed.contains("_fib_cache"));
        assert!(transformed.contains("return (fib((n - 1)) + fib((n - 2)))"));
    }

    #[test]
    fn nested_marked_function_is_expanded_in_place() {
        let source = "\
def solve(values):
    @unstack
    def best(n):
        if n == 0:
            return values[0]
        return min(values[n], best(n - 1))
    return best(len(values) - 1)

print(solve((3, 1, 2)))
";
        let transformed = transform(source).unwrap();
        // cache, step, and wrapper live inside solve's body
        assert!(transformed.contains("    _best_cache = {}"));
        assert!(transformed.contains("    def _best_step(_best_key):"));
        assert!(transformed.contains("    def best(n):"));
        // the shared driver is at module scope, once
        assert_eq!(transformed.matches("def _unstack_drive(").count(), 1);
        assert!(transformed.starts_with("def _unstack_drive("));
    }

    #[test]
    fn call_site_nested_inside_another_call_is_guarded_before_the_anchor() {
        let source = "\
@unstack
def depth(n):
    if n == 0:
        return 0
    d = max(depth(n - 1), 0)
    return d + 1
";
        let transformed = transform(source).unwrap();
        let guard = transformed.find("_depth_k0 = ((n - 1),)").expect("guard");
        let anchor = transformed.find("d = max(_depth_v0, 0)").expect("anchor");
        assert!(guard < anchor);
    }

    #[test]
    fn nested_self_call_in_argument_position_orders_guards_innermost_first() {
        let source = "\
@unstack
def collatz(n):
    if n == 0:
        return 0
    return collatz(collatz(n - 1))
";
        let transformed = transform(source).unwrap();
        let inner = transformed.find("_collatz_k0 = ((n - 1),)").expect("inner");
        let outer = transformed
            .find("_collatz_k1 = (_collatz_v0,)")
            .expect("outer");
        assert!(inner < outer);
    }

    #[test]
    fn two_marked_functions_share_one_driver() {
        let source = "\
@unstack
def f(n):
    if n == 0:
        return 0
    return f(n - 1)

@unstack
def g(n):
    if n == 0:
        return 1
    return g(n - 1)
";
        let transformed = transform(source).unwrap();
        assert_eq!(transformed.matches("def _unstack_drive(").count(), 1);
        assert!(transformed.contains("_f_cache"));
        assert!(transformed.contains("_g_cache"));
    }

    #[test]
    fn collision_with_generated_cache_name_is_refused() {
        let source = "\
_f_cache = 0

@unstack
def f(n):
    return 0
";
        let module = parse_source(source);
        let err = rewrite_module(&module, &RewriteOptions::default()).unwrap_err();
        assert!(matches!(err, RewriteError::ReservedNameClash { .. }));
    }

    #[test]
    fn collision_with_placeholder_name_is_refused() {
        let source = "\
@unstack
def f(n):
    _f_v0 = 1
    if n == 0:
        return _f_v0
    return f(n - 1)
";
        let module = parse_source(source);
        let err = rewrite_module(&module, &RewriteOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            RewriteError::ReservedNameClash { name, .. } if name == "_f_v0"
        ));
    }

    #[test]
    fn self_call_inside_nested_function_is_refused() {
        let source = "\
@unstack
def f(n):
    def helper(m):
        return f(m)
    return helper(n)
";
        let module = parse_source(source);
        let err = rewrite_module(&module, &RewriteOptions::default()).unwrap_err();
        assert!(matches!(err, RewriteError::UnsupportedCallSite { .. }));
    }

    #[test]
    fn bare_return_is_tagged_with_none() {
        let source = "\
@unstack
def f(n):
    if n == 0:
        return
    return f(n - 1)
";
        let transformed = transform(source).unwrap();
        assert!(transformed.contains("return (\"done\", None)"));
    }

    #[test]
    fn fall_through_gains_a_tagged_return() {
        let source = "\
@unstack
def f(n):
    x = n + 1
";
        let transformed = transform(source).unwrap();
        assert!(transformed.contains("    x = (n + 1)\n    return (\"done\", None)"));
    }

    #[test]
    fn guard_inside_loop_body_anchors_at_the_inner_statement() {
        let source = "\
@unstack
def f(n):
    if n == 0:
        return 0
    total = 0
    for i in [1, 2]:
        total = total + f(n - i)
    return total
";
        let transformed = transform(source).unwrap();
        // the guard sits inside the loop body, before the assignment
        let loop_pos = transformed.find("for i in [1, 2]:").expect("loop");
        let guard_pos = transformed.find("_f_k0 = ((n - i),)").expect("guard");
        assert!(guard_pos > loop_pos);
    }
}
