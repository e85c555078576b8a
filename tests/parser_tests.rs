#[cfg(test)]
mod tests {
    use unstack::ast::{CmpOperator, Expr, Module, Number, Stmt};
    use unstack::lexer::Lexer;
    use unstack::parser::{self, ParseError};

    fn parse_code(source: &str) -> Result<Module, Vec<ParseError>> {
        let mut lexer = Lexer::new(source);
        let tokens = lexer.tokenize();

        if !lexer.get_errors().is_empty() {
            let parse_errors: Vec<ParseError> = lexer
                .get_errors()
                .iter()
                .map(|e| ParseError::InvalidSyntax {
                    message: e.message.clone(),
                    line: e.line,
                    column: e.column,
                })
                .collect();
            return Err(parse_errors);
        }

        parser::parse(tokens)
    }

    fn assert_parses(source: &str) -> Module {
        match parse_code(source) {
            Ok(module) => module,
            Err(errors) => {
                for error in &errors {
                    println!("Error: {:?}", error);
                }
                panic!("Parsing failed with {} errors", errors.len());
            }
        }
    }

    fn assert_parse_fails(source: &str) {
        if parse_code(source).is_ok() {
            panic!("Expected parsing to fail, but it succeeded");
        }
    }

    #[test]
    fn simple_expression_statement() {
        let module = assert_parses("42\n");
        assert_eq!(module.body.len(), 1);
        match module.body[0].as_ref() {
            Stmt::Expr { value, .. } => match value.as_ref() {
                Expr::Num { value, .. } => assert_eq!(*value, Number::Integer(42)),
                other => panic!("expected number, got {}", other),
            },
            other => panic!("expected expression statement, got {}", other),
        }
    }

    #[test]
    fn decorated_function_definition() {
        let module = assert_parses("@unstack\ndef fib(n):\n    return n\n");
        match module.body[0].as_ref() {
            Stmt::FunctionDef {
                name,
                params,
                decorator_list,
                ..
            } => {
                assert_eq!(name, "fib");
                assert_eq!(params.len(), 1);
                assert_eq!(decorator_list, &vec!["unstack".to_string()]);
            }
            other => panic!("expected function definition, got {}", other),
        }
    }

    #[test]
    fn parameter_defaults() {
        let module = assert_parses("def f(a, b=2):\n    return a\n");
        match module.body[0].as_ref() {
            Stmt::FunctionDef { params, .. } => {
                assert!(params[0].default.is_none());
                assert!(params[1].default.is_some());
            }
            other => panic!("expected function definition, got {}", other),
        }
    }

    #[test]
    fn elif_chains_nest_into_orelse() {
        let module = assert_parses(
            "if a:\n    x = 1\nelif b:\n    x = 2\nelse:\n    x = 3\n",
        );
        match module.body[0].as_ref() {
            Stmt::If { orelse, .. } => {
                assert_eq!(orelse.len(), 1);
                match orelse[0].as_ref() {
                    Stmt::If { orelse, .. } => assert_eq!(orelse.len(), 1),
                    other => panic!("expected nested if, got {}", other),
                }
            }
            other => panic!("expected if statement, got {}", other),
        }
    }

    #[test]
    fn comparison_chains() {
        let module = assert_parses("a <= b < c\n");
        match module.body[0].as_ref() {
            Stmt::Expr { value, .. } => match value.as_ref() {
                Expr::Compare { ops, .. } => {
                    assert_eq!(ops, &vec![CmpOperator::LtE, CmpOperator::Lt]);
                }
                other => panic!("expected comparison, got {}", other),
            },
            other => panic!("expected expression statement, got {}", other),
        }
    }

    #[test]
    fn not_in_is_one_comparison() {
        let module = assert_parses("key not in cache\n");
        match module.body[0].as_ref() {
            Stmt::Expr { value, .. } => match value.as_ref() {
                Expr::Compare { ops, .. } => assert_eq!(ops, &vec![CmpOperator::NotIn]),
                other => panic!("expected comparison, got {}", other),
            },
            other => panic!("expected expression statement, got {}", other),
        }
    }

    #[test]
    fn keyword_arguments() {
        let module = assert_parses("f(1, b=2)\n");
        match module.body[0].as_ref() {
            Stmt::Expr { value, .. } => match value.as_ref() {
                Expr::Call { args, keywords, .. } => {
                    assert_eq!(args.len(), 1);
                    assert_eq!(keywords.len(), 1);
                    assert_eq!(keywords[0].0, "b");
                }
                other => panic!("expected call, got {}", other),
            },
            other => panic!("expected expression statement, got {}", other),
        }
    }

    #[test]
    fn tuple_displays() {
        let module = assert_parses("x = (1,)\ny = (1, 2)\nz = ()\n");
        for (index, expected_len) in [(0, 1), (1, 2), (2, 0)] {
            match module.body[index].as_ref() {
                Stmt::Assign { value, .. } => match value.as_ref() {
                    Expr::Tuple { elts, .. } => assert_eq!(elts.len(), expected_len),
                    other => panic!("expected tuple, got {}", other),
                },
                other => panic!("expected assignment, got {}", other),
            }
        }
    }

    #[test]
    fn parenthesised_expression_is_not_a_tuple() {
        let module = assert_parses("x = (1 + 2)\n");
        match module.body[0].as_ref() {
            Stmt::Assign { value, .. } => {
                assert!(matches!(value.as_ref(), Expr::BinOp { .. }));
            }
            other => panic!("expected assignment, got {}", other),
        }
    }

    #[test]
    fn subscript_assignment_target() {
        assert_parses("cache[key] = value\n");
        assert_parses("x[0] = x[1]\n");
    }

    #[test]
    fn method_calls_parse_as_attribute_calls() {
        let module = assert_parses("frontier.append(key)\n");
        match module.body[0].as_ref() {
            Stmt::Expr { value, .. } => match value.as_ref() {
                Expr::Call { func, .. } => {
                    assert!(matches!(func.as_ref(), Expr::Attribute { attr, .. } if attr == "append"));
                }
                other => panic!("expected call, got {}", other),
            },
            other => panic!("expected expression statement, got {}", other),
        }
    }

    #[test]
    fn conditional_expression() {
        let module = assert_parses("x = a if c else b\n");
        match module.body[0].as_ref() {
            Stmt::Assign { value, .. } => {
                assert!(matches!(value.as_ref(), Expr::IfExp { .. }));
            }
            other => panic!("expected assignment, got {}", other),
        }
    }

    #[test]
    fn inline_suite_on_one_line() {
        let module = assert_parses("if x: pass\n");
        match module.body[0].as_ref() {
            Stmt::If { body, .. } => assert_eq!(body.len(), 1),
            other => panic!("expected if statement, got {}", other),
        }
    }

    #[test]
    fn while_for_break_continue_global() {
        assert_parses(
            "while x > 0:\n    x -= 1\n    if x == 2:\n        break\n    continue\n",
        );
        assert_parses("for i in range(10):\n    total += i\n");
        assert_parses("def f():\n    global total\n    total = 1\n");
    }

    #[test]
    fn augmented_assignments() {
        assert_parses("x += 1\nx -= 1\nx *= 2\nx /= 2\nx //= 2\nx %= 2\n");
    }

    #[test]
    fn dict_and_list_displays() {
        assert_parses("d = {}\nd = {1: 2, \"a\": (3,)}\nl = [1, 2, 3]\nl = []\n");
    }

    #[test]
    fn error_cases() {
        assert_parse_fails("1 + 2 = x\n");
        assert_parse_fails("x = (1 + 2\n");
        assert_parse_fails("def f(x y): pass\n");
        assert_parse_fails("for in range(10): pass\n");
        assert_parse_fails("if : pass\n");
        assert_parse_fails("x = 1 +\n");
        assert_parse_fails("f(a=1, 2)\n");
        assert_parse_fails("def f(a=1, b): pass\n");
    }

    #[test]
    fn several_errors_are_collected() {
        let errors = parse_code("x = \ny = (\nz = 1 +\n").unwrap_err();
        assert!(errors.len() >= 2, "expected multiple errors, got {:?}", errors);
    }
}
