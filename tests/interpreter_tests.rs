#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::io::Write;
    use std::rc::Rc;

    use test_case::test_case;
    use unstack::ast::Module;
    use unstack::interpreter::{Interpreter, RuntimeError};
    use unstack::lexer::Lexer;
    use unstack::parser;
    use unstack::rewrite::{rewrite_module, RewriteOptions};

    #[derive(Clone, Default)]
    struct SharedBuf(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8(self.0.borrow().clone()).expect("output must be UTF-8")
        }
    }

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

    /// Interprets a plain program (no rewriting) and returns what it printed.
    fn run_plain(source: &str) -> Result<String, RuntimeError> {
        let module = parse_source(source);
        let buf = SharedBuf::default();
        let mut interpreter = Interpreter::with_output(Box::new(buf.clone()));
        interpreter.interpret(&module)?;
        Ok(buf.contents())
    }

    /// Rewrites marked functions (native-driver mode) and interprets.
    fn run_rewritten(source: &str) -> Result<String, RuntimeError> {
        let module = parse_source(source);
        let rewritten = rewrite_module(&module, &RewriteOptions { emit_driver: false })
            .expect("rewrite must succeed");
        let buf = SharedBuf::default();
        let mut interpreter = Interpreter::with_output(Box::new(buf.clone()));
        interpreter.interpret(&rewritten)?;
        Ok(buf.contents())
    }

    #[test]
    fn arithmetic_and_printing() {
        let out = run_plain("print(1 + 2 * 3, 7 // 2, 7 % 3, 2 ** 10)\n").unwrap();
        assert_eq!(out, "7 3 1 1024\n");
    }

    #[test]
    fn true_division_produces_floats() {
        let out = run_plain("print(7 / 2)\n").unwrap();
        assert_eq!(out, "3.5\n");
    }

    #[test]
    fn functions_close_over_their_defining_scope() {
        let out = run_plain(
            "def outer(base):\n    def inner(x):\n        return base + x\n    return inner(10)\n\nprint(outer(5))\n",
        )
        .unwrap();
        assert_eq!(out, "15\n");
    }

    #[test]
    fn global_declarations_write_to_module_scope() {
        let out = run_plain(
            "count = 0\n\ndef bump():\n    global count\n    count = count + 1\n\nbump()\nbump()\nprint(count)\n",
        )
        .unwrap();
        assert_eq!(out, "2\n");
    }

    #[test]
    fn while_loops_with_break_and_continue() {
        let out = run_plain(
            "total = 0\ni = 0\nwhile True:\n    i += 1\n    if i > 10:\n        break\n    if i % 2 == 0:\n        continue\n    total += i\nprint(total)\n",
        )
        .unwrap();
        assert_eq!(out, "25\n");
    }

    #[test]
    fn for_loops_over_lists_and_ranges() {
        let out = run_plain(
            "total = 0\nfor i in range(1, 5):\n    total += i\nfor x in [10, 20]:\n    total += x\nprint(total)\n",
        )
        .unwrap();
        assert_eq!(out, "40\n");
    }

    #[test]
    fn list_methods_and_len() {
        let out = run_plain(
            "l = [1]\nl.append(2)\nl.append(3)\nx = l.pop()\nprint(x, len(l))\n",
        )
        .unwrap();
        assert_eq!(out, "3 2\n");
    }

    #[test]
    fn dicts_with_tuple_keys() {
        let out = run_plain(
            "d = {}\nd[(1, 2)] = \"a\"\nprint((1, 2) in d, (2, 1) in d, d[(1, 2)])\n",
        )
        .unwrap();
        assert_eq!(out, "True False a\n");
    }

    #[test]
    fn builtin_min_max_abs() {
        let out = run_plain("print(min(3, 1), max(3, 1), abs(0 - 5), min([4, 2, 9]))\n").unwrap();
        assert_eq!(out, "1 3 5 2\n");
    }

    #[test]
    fn decorators_apply_at_definition_time() {
        let out = run_plain(
            "def twice(f):\n    def wrapped(x):\n        return f(f(x))\n    return wrapped\n\n@twice\ndef inc(x):\n    return x + 1\n\nprint(inc(3))\n",
        )
        .unwrap();
        assert_eq!(out, "5\n");
    }

    #[test]
    fn undefined_name_is_a_runtime_error() {
        let err = run_plain("print(missing)\n").unwrap_err();
        assert!(matches!(err, RuntimeError::UndefinedName(name) if name == "missing"));
    }

    #[test]
    fn integer_overflow_is_a_runtime_error() {
        let err = run_plain("x = 9_223_372_036_854_775_807\nprint(x + 1)\n").unwrap_err();
        assert!(matches!(err, RuntimeError::IntegerOverflow(_)));
    }

    #[test]
    fn unhashable_dict_key_is_a_runtime_error() {
        let err = run_plain("d = {}\nd[[1]] = 2\n").unwrap_err();
        assert!(matches!(err, RuntimeError::Key(_)));
    }

    // ---- the rewritten pipeline -----------------------------------------

    #[test_case(0, 0 ; "fib 0")]
    #[test_case(1, 1 ; "fib 1")]
    #[test_case(5, 5 ; "fib 5")]
    #[test_case(10, 55 ; "fib 10")]
    fn fib_values_through_the_native_driver(n: u32, expected: u64) {
        let source = format!(
            "@unstack\ndef fib(n):\n    if n <= 1:\n        return n\n    return fib(n - 1) + fib(n - 2)\n\nprint(fib({}))\n",
            n
        );
        assert_eq!(run_rewritten(&source).unwrap(), format!("{}\n", expected));
    }

    #[test]
    fn deep_linear_recursion_completes_without_native_stack_growth() {
        let source = "\
@unstack
def fib(n):
    if n <= 1:
        return n
    return (fib(n - 1) + fib(n - 2)) % 1000

print(fib(100_000))
";
        let mut a: u64 = 0;
        let mut b: u64 = 1;
        for _ in 0..100_000 {
            let next = (a + b) % 1000;
            a = b;
            b = next;
        }
        assert_eq!(run_rewritten(source).unwrap(), format!("{}\n", a));
    }

    #[test]
    fn repeat_calls_hit_the_cache() {
        let source = "\
calls = 0

@unstack
def double(n):
    global calls
    calls = calls + 1
    return n * 2

print(double(21))
print(double(21))
print(calls)
";
        // one step invocation for the first call, none for the second
        assert_eq!(run_rewritten(source).unwrap(), "42\n42\n1\n");
    }

    #[test]
    fn keyword_and_positional_calls_share_cache_entries() {
        let source = "\
calls = 0

@unstack
def power(base, exp):
    global calls
    calls = calls + 1
    if exp == 0:
        return 1
    return base * power(base, exp - 1)

print(power(2, 10))
print(power(exp=10, base=2))
print(calls)
";
        // 11 distinct keys; every non-base key is stepped twice (one miss,
        // one resolve), the base key once, and the keyword-argument call
        // adds nothing because it canonicalizes onto the same cache entries
        assert_eq!(run_rewritten(source).unwrap(), "1024\n1024\n21\n");
    }

    #[test]
    fn tree_recursion_over_an_array() {
        // minimum-of-neighbours chain in both directions, as in the scale
        // descent problem
        let source = "\
A = (3, 1, 4, 1, 5, 9, 2, 6)

@unstack
def min_left(n):
    from_ground = A[n]
    if n == 0:
        return from_ground
    dist = abs(A[n] - A[n - 1])
    from_left = max(min_left(n - 1), dist)
    return min(from_ground, from_left)

best = 0
for i in range(len(A)):
    best = max(best, min_left(i))
print(best)
";
        // reference computed by hand over the tuple above
        let out = run_rewritten(source).unwrap();
        let expected = {
            let a: [i64; 8] = [3, 1, 4, 1, 5, 9, 2, 6];
            let mut min_left = vec![0i64; a.len()];
            for n in 0..a.len() {
                min_left[n] = if n == 0 {
                    a[0]
                } else {
                    let dist = (a[n] - a[n - 1]).abs();
                    a[n].min(min_left[n - 1].max(dist))
                };
            }
            min_left.iter().copied().max().unwrap()
        };
        assert_eq!(out, format!("{}\n", expected));
    }

    #[test]
    fn two_sibling_call_sites_resolve_independently() {
        let source = "\
@unstack
def steps(n):
    if n <= 1:
        return n
    return steps(n - 1) + steps(n - 2)

print(steps(30))
";
        // naive recursion would take ~1.6M calls; memoized completes fast
        assert_eq!(run_rewritten(source).unwrap(), "832040\n");
    }

    #[test]
    fn non_recursive_marked_function_is_plain_memoization() {
        let source = "\
@unstack
def square(n):
    return n * n

print(square(12))
print(square(12))
";
        assert_eq!(run_rewritten(source).unwrap(), "144\n144\n");
    }

    #[test]
    fn unhashable_wrapper_argument_fails_fast() {
        let source = "\
@unstack
def f(x):
    return x

print(f([1, 2]))
";
        let err = run_rewritten(source).unwrap_err();
        assert!(matches!(err, RuntimeError::Key(_)));
    }

    #[test]
    fn nested_marked_function_gets_a_fresh_cache_per_entry() {
        let source = "\
def solve(offset):
    @unstack
    def shifted(n):
        if n == 0:
            return offset
        return shifted(n - 1) + 1
    return shifted(3)

print(solve(100))
print(solve(200))
";
        // a shared cache would make the second call return 103
        assert_eq!(run_rewritten(source).unwrap(), "103\n203\n");
    }
}
