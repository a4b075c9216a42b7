//! End-to-end tests running whole scripts through the interpreter.

use std::sync::{Arc, Mutex};

use ebs_ast::{
    BinaryOp, BlockStatement, DataType, ErrorCategory, ExceptionHandler, Expression, Parameter,
    Statement, VarStatement,
};
use ebs_interpreter::{
    ErrorKind, Interpreter, MemoryAdapter, OutputSink, RuntimeContext, Value,
};

#[derive(Default)]
struct CaptureSink(Mutex<Vec<String>>);

impl OutputSink for CaptureSink {
    fn print(&self, text: &str) {
        self.0.lock().unwrap().push(text.to_string());
    }
}

impl CaptureSink {
    fn lines(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

fn harness(context: RuntimeContext) -> (Interpreter, Arc<CaptureSink>) {
    let sink = Arc::new(CaptureSink::default());
    let interp = Interpreter::new(context).with_output(sink.clone());
    (interp, sink)
}

fn run(statements: Vec<Statement>) -> Vec<String> {
    let (interp, sink) = harness(RuntimeContext::new("test", statements));
    interp.interpret().unwrap();
    sink.lines()
}

fn run_err(statements: Vec<Statement>) -> ebs_interpreter::RuntimeError {
    let (interp, _) = harness(RuntimeContext::new("test", statements));
    interp.interpret().unwrap_err()
}

fn var(name: &str, init: Expression, line: u32) -> Statement {
    Statement::Var(VarStatement {
        name: name.into(),
        var_type: None,
        initializer: Some(init),
        is_const: false,
        line,
    })
}

fn typed_var(name: &str, ty: DataType, init: Expression, line: u32) -> Statement {
    Statement::Var(VarStatement {
        name: name.into(),
        var_type: Some(ty),
        initializer: Some(init),
        is_const: false,
        line,
    })
}

fn const_var(name: &str, init: Expression, line: u32) -> Statement {
    Statement::Var(VarStatement {
        name: name.into(),
        var_type: None,
        initializer: Some(init),
        is_const: true,
        line,
    })
}

fn print(value: Expression, line: u32) -> Statement {
    Statement::Print { value, line }
}

fn assign(name: &str, value: Expression, line: u32) -> Statement {
    Statement::Assign {
        name: name.into(),
        value,
        line,
    }
}

fn print_var(name: &str, line: u32) -> Statement {
    print(Expression::variable(name, line), line)
}

mod scopes {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn branch_locals_shadow_and_vanish() {
        let lines = run(vec![
            var("x", Expression::int(1, 1), 1),
            Statement::If {
                condition: Expression::boolean(true, 2),
                then_branch: vec![var("x", Expression::int(2, 3), 3), print_var("x", 4)],
                else_branch: None,
                line: 2,
            },
            print_var("x", 5),
        ]);
        assert_eq!(lines, vec!["2", "1"]);
    }

    #[test]
    fn assignment_inside_branch_reaches_outer_binding() {
        let lines = run(vec![
            var("x", Expression::int(1, 1), 1),
            Statement::If {
                condition: Expression::boolean(true, 2),
                then_branch: vec![assign("x", Expression::int(9, 3), 3)],
                else_branch: None,
                line: 2,
            },
            print_var("x", 4),
        ]);
        assert_eq!(lines, vec!["9"]);
    }

    #[test]
    fn assignment_never_creates_a_binding() {
        let err = run_err(vec![assign("missing", Expression::int(1, 1), 1)]);
        assert_eq!(err.kind, ErrorKind::UndefinedVariable);
        assert_eq!(err.line, 1);
        assert_eq!(err.message, "Undefined variable 'missing'.");
    }

    #[test]
    fn constants_cannot_be_reassigned() {
        let err = run_err(vec![
            const_var("pi", Expression::double(3.14, 1), 1),
            assign("pi", Expression::int(3, 2), 2),
        ]);
        assert_eq!(err.kind, ErrorKind::TypeMismatch);
        assert_eq!(err.message, "Cannot reassign constant 'pi'.");
    }

    #[test]
    fn loop_variable_is_fresh_per_iteration_and_gone_after() {
        let err = run_err(vec![
            Statement::ForEach {
                variable: "c".into(),
                iterable: Expression::string("ab", 1),
                body: vec![print_var("c", 2)],
                line: 1,
            },
            print_var("c", 3),
        ]);
        assert_eq!(err.kind, ErrorKind::UndefinedVariable);
    }
}

mod typing {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn typed_declaration_converts_the_initializer() {
        let lines = run(vec![
            typed_var("n", DataType::Integer, Expression::string("42", 1), 1),
            print_var("n", 2),
        ]);
        assert_eq!(lines, vec!["42"]);
    }

    #[test]
    fn typed_declaration_rejects_unconvertible_text() {
        let err = run_err(vec![typed_var(
            "n",
            DataType::Integer,
            Expression::string("forty", 1),
            1,
        )]);
        assert_eq!(err.kind, ErrorKind::TypeMismatch);
    }

    #[test]
    fn condition_must_be_boolean() {
        let err = run_err(vec![Statement::If {
            condition: Expression::int(1, 1),
            then_branch: vec![],
            else_branch: None,
            line: 1,
        }]);
        assert_eq!(err.kind, ErrorKind::ConditionType);
    }
}

mod operators {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn promotion_shows_through_print() {
        let lines = run(vec![
            print(
                Expression::binary(Expression::int(1, 1), BinaryOp::Plus, Expression::int(2, 1), 1),
                1,
            ),
            print(
                Expression::binary(
                    Expression::int(1, 2),
                    BinaryOp::Plus,
                    Expression::double(0.5, 2),
                    2,
                ),
                2,
            ),
            print(
                Expression::binary(
                    Expression::string("a", 3),
                    BinaryOp::Plus,
                    Expression::int(1, 3),
                    3,
                ),
                3,
            ),
        ]);
        assert_eq!(lines, vec!["3", "1.5", "a1"]);
    }

    #[test]
    fn division_by_zero_carries_its_line() {
        let err = run_err(vec![print(
            Expression::binary(Expression::int(1, 4), BinaryOp::Slash, Expression::int(0, 4), 4),
            4,
        )]);
        assert_eq!(err.kind, ErrorKind::DivisionByZero);
        assert_eq!(err.line, 4);
    }

    #[test]
    fn chained_comparison_is_transitive_left_to_right() {
        let chain = |a: i32, b: i32, c: i32| {
            Expression::ChainComparison {
                operands: vec![
                    Expression::int(a, 1),
                    Expression::int(b, 1),
                    Expression::int(c, 1),
                ],
                ops: vec![BinaryOp::Lt, BinaryOp::Lt],
                line: 1,
            }
        };
        let lines = run(vec![
            print(chain(1, 2, 3), 1),
            print(chain(1, 3, 2), 1),
            print(chain(3, 1, 2), 1),
        ]);
        assert_eq!(lines, vec!["true", "false", "false"]);
    }

    #[test]
    fn chain_carries_the_raw_right_operand() {
        // 1 < "2" < 3: the middle link is compared as text against 1,
        // but the next link sees the raw string again.
        let expr = Expression::ChainComparison {
            operands: vec![
                Expression::int(1, 1),
                Expression::string("2", 1),
                Expression::string("3", 1),
            ],
            ops: vec![BinaryOp::Lt, BinaryOp::Lt],
            line: 1,
        };
        let lines = run(vec![print(expr, 1)]);
        assert_eq!(lines, vec!["true"]);
    }
}

mod loops {
    use super::*;
    use pretty_assertions::assert_eq;

    fn counting_while(limit: i32, body_tail: Vec<Statement>) -> Vec<Statement> {
        let mut body = vec![assign(
            "i",
            Expression::binary(
                Expression::variable("i", 3),
                BinaryOp::Plus,
                Expression::int(1, 3),
                3,
            ),
            3,
        )];
        body.extend(body_tail);
        vec![
            var("i", Expression::int(0, 1), 1),
            Statement::While {
                condition: Expression::binary(
                    Expression::variable("i", 2),
                    BinaryOp::Lt,
                    Expression::int(limit, 2),
                    2,
                ),
                body,
                line: 2,
            },
            print_var("i", 9),
        ]
    }

    #[test]
    fn while_counts_to_its_limit() {
        assert_eq!(run(counting_while(5, vec![])), vec!["5"]);
    }

    #[test]
    fn break_leaves_only_the_innermost_loop() {
        // Outer runs i = 0..3; inner breaks immediately every time.
        let lines = run(vec![
            var("i", Expression::int(0, 1), 1),
            var("hits", Expression::int(0, 1), 1),
            Statement::While {
                condition: Expression::binary(
                    Expression::variable("i", 2),
                    BinaryOp::Lt,
                    Expression::int(3, 2),
                    2,
                ),
                body: vec![
                    Statement::While {
                        condition: Expression::boolean(true, 3),
                        body: vec![
                            assign(
                                "hits",
                                Expression::binary(
                                    Expression::variable("hits", 4),
                                    BinaryOp::Plus,
                                    Expression::int(1, 4),
                                    4,
                                ),
                                4,
                            ),
                            Statement::Break { line: 5 },
                        ],
                        line: 3,
                    },
                    assign(
                        "i",
                        Expression::binary(
                            Expression::variable("i", 6),
                            BinaryOp::Plus,
                            Expression::int(1, 6),
                            6,
                        ),
                        6,
                    ),
                ],
                line: 2,
            },
            print_var("hits", 7),
            print_var("i", 8),
        ]);
        assert_eq!(lines, vec!["3", "3"]);
    }

    #[test]
    fn continue_skips_the_rest_of_the_iteration() {
        // Sum only odd digits of "12345".
        let lines = run(vec![
            var("total", Expression::int(0, 1), 1),
            Statement::ForEach {
                variable: "d".into(),
                iterable: Expression::string("12345", 2),
                body: vec![
                    typed_var("n", DataType::Integer, Expression::variable("d", 3), 3),
                    Statement::If {
                        condition: Expression::binary(
                            Expression::binary(
                                Expression::variable("n", 4),
                                BinaryOp::Percent,
                                Expression::int(2, 4),
                                4,
                            ),
                            BinaryOp::Eq,
                            Expression::int(0, 4),
                            4,
                        ),
                        then_branch: vec![Statement::Continue { line: 5 }],
                        else_branch: None,
                        line: 4,
                    },
                    assign(
                        "total",
                        Expression::binary(
                            Expression::variable("total", 6),
                            BinaryOp::Plus,
                            Expression::variable("n", 6),
                            6,
                        ),
                        6,
                    ),
                ],
                line: 2,
            },
            print_var("total", 7),
        ]);
        assert_eq!(lines, vec!["9"]);
    }

    #[test]
    fn for_statement_runs_init_condition_increment() {
        let lines = run(vec![
            var("sum", Expression::int(0, 1), 1),
            Statement::For {
                init: Some(Box::new(var("i", Expression::int(1, 2), 2))),
                condition: Some(Expression::binary(
                    Expression::variable("i", 2),
                    BinaryOp::Lte,
                    Expression::int(4, 2),
                    2,
                )),
                increment: Some(Box::new(assign(
                    "i",
                    Expression::binary(
                        Expression::variable("i", 2),
                        BinaryOp::Plus,
                        Expression::int(1, 2),
                        2,
                    ),
                    2,
                ))),
                body: vec![assign(
                    "sum",
                    Expression::binary(
                        Expression::variable("sum", 3),
                        BinaryOp::Plus,
                        Expression::variable("i", 3),
                        3,
                    ),
                    3,
                )],
                line: 2,
            },
            print_var("sum", 4),
        ]);
        assert_eq!(lines, vec!["10"]);
    }

    #[test]
    fn do_while_runs_at_least_once() {
        let lines = run(vec![
            var("ran", Expression::boolean(false, 1), 1),
            Statement::DoWhile {
                body: vec![assign("ran", Expression::boolean(true, 3), 3)],
                condition: Expression::boolean(false, 4),
                line: 2,
            },
            print_var("ran", 5),
        ]);
        assert_eq!(lines, vec!["true"]);
    }

    #[test]
    fn iterating_a_number_is_an_error() {
        let err = run_err(vec![Statement::ForEach {
            variable: "x".into(),
            iterable: Expression::int(5, 1),
            body: vec![],
            line: 1,
        }]);
        assert_eq!(err.kind, ErrorKind::Iteration);
        assert_eq!(err.message, "Cannot iterate over type 'integer'.");
    }
}

mod arrays {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fixed_init(name: &str, ty: DataType, size: i32, line: u32) -> Statement {
        var(
            name,
            Expression::ArrayInit {
                element_type: ty,
                dims: vec![Some(Expression::int(size, line))],
                line,
            },
            line,
        )
    }

    fn index_assign(name: &str, index: i32, value: Expression, line: u32) -> Statement {
        Statement::IndexAssign {
            target: Expression::Index {
                target: Box::new(Expression::variable(name, line)),
                index: Box::new(Expression::int(index, line)),
                line,
            },
            value,
            line,
        }
    }

    fn index_expr(name: &str, index: i32, line: u32) -> Expression {
        Expression::Index {
            target: Box::new(Expression::variable(name, line)),
            index: Box::new(Expression::int(index, line)),
            line,
        }
    }

    #[test]
    fn fixed_arrays_are_prefilled_with_zero_values() {
        let lines = run(vec![
            fixed_init("a", DataType::Integer, 3, 1),
            print(index_expr("a", 2, 2), 2),
            print(
                Expression::Length {
                    target: Box::new(Expression::variable("a", 3)),
                    line: 3,
                },
                3,
            ),
        ]);
        assert_eq!(lines, vec!["0", "3"]);
    }

    #[test]
    fn non_numeric_index_names_its_position() {
        let err = run_err(vec![
            var(
                "grid",
                Expression::ArrayInit {
                    element_type: DataType::Integer,
                    dims: vec![Some(Expression::int(2, 1)), Some(Expression::int(2, 1))],
                    line: 1,
                },
                1,
            ),
            print(
                Expression::Index {
                    target: Box::new(index_expr("grid", 0, 2)),
                    index: Box::new(Expression::string("x", 2)),
                    line: 2,
                },
                2,
            ),
        ]);
        assert_eq!(err.kind, ErrorKind::TypeMismatch);
        assert_eq!(err.message, "Index 2 must be a number.");
    }

    #[test]
    fn fixed_arrays_never_grow() {
        let err = run_err(vec![
            fixed_init("a", DataType::Integer, 2, 1),
            index_assign("a", 2, Expression::int(9, 2), 2),
        ]);
        assert_eq!(err.kind, ErrorKind::ArrayCapacityExceeded);
    }

    #[test]
    fn dynamic_arrays_append_at_the_end() {
        let lines = run(vec![
            var(
                "a",
                Expression::ArrayInit {
                    element_type: DataType::String,
                    dims: vec![None],
                    line: 1,
                },
                1,
            ),
            index_assign("a", 0, Expression::string("x", 2), 2),
            index_assign("a", 1, Expression::string("y", 3), 3),
            print_var("a", 4),
        ]);
        assert_eq!(lines, vec!["[\"x\", \"y\"]"]);
    }

    #[test]
    fn gap_writes_are_out_of_bounds() {
        let err = run_err(vec![
            var(
                "a",
                Expression::ArrayInit {
                    element_type: DataType::Integer,
                    dims: vec![None],
                    line: 1,
                },
                1,
            ),
            index_assign("a", 3, Expression::int(1, 2), 2),
        ]);
        assert_eq!(err.kind, ErrorKind::IndexOutOfRange);
        assert_eq!(err.message, "Index out of bounds: 3 (size 0).");
    }

    #[test]
    fn elements_coerce_to_the_element_type() {
        let lines = run(vec![
            fixed_init("a", DataType::Integer, 1, 1),
            index_assign("a", 0, Expression::string("7", 2), 2),
            print(index_expr("a", 0, 3), 3),
        ]);
        assert_eq!(lines, vec!["7"]);
    }

    #[test]
    fn oversized_literal_rejected_by_fixed_array() {
        let err = run_err(vec![
            fixed_init("a", DataType::Integer, 2, 1),
            print(
                Expression::ArrayLiteral {
                    target: Some(Box::new(Expression::variable("a", 2))),
                    elements: vec![
                        Expression::int(1, 2),
                        Expression::int(2, 2),
                        Expression::int(3, 2),
                    ],
                    line: 2,
                },
                2,
            ),
        ]);
        assert_eq!(err.kind, ErrorKind::ArrayCapacityExceeded);
        assert_eq!(
            err.message,
            "Array literal length (3) exceeds fixed array length (2)."
        );
    }

    #[test]
    fn untargeted_literal_infers_its_element_type() {
        let lines = run(vec![
            var(
                "a",
                Expression::ArrayLiteral {
                    target: None,
                    elements: vec![Expression::int(1, 1), Expression::int(2, 1)],
                    line: 1,
                },
                1,
            ),
            print(index_expr("a", 1, 2), 2),
        ]);
        assert_eq!(lines, vec!["2"]);
    }

    #[test]
    fn two_dimensional_init_builds_nested_arrays() {
        let lines = run(vec![
            var(
                "grid",
                Expression::ArrayInit {
                    element_type: DataType::Integer,
                    dims: vec![Some(Expression::int(2, 1)), Some(Expression::int(2, 1))],
                    line: 1,
                },
                1,
            ),
            print(
                Expression::Index {
                    target: Box::new(index_expr("grid", 1, 2)),
                    index: Box::new(Expression::int(0, 2)),
                    line: 2,
                },
                2,
            ),
        ]);
        assert_eq!(lines, vec!["0"]);
    }

    #[test]
    fn negative_dimension_is_an_error() {
        let err = run_err(vec![var(
            "a",
            Expression::ArrayInit {
                element_type: DataType::Integer,
                dims: vec![Some(Expression::int(-1, 1))],
                line: 1,
            },
            1,
        )]);
        assert_eq!(err.message, "Array dimension -1 must be non-negative.");
    }
}

mod blocks {
    use super::*;
    use pretty_assertions::assert_eq;

    fn add_block() -> BlockStatement {
        BlockStatement {
            name: Some("add".into()),
            parameters: vec![
                Parameter {
                    name: "a".into(),
                    data_type: DataType::Integer,
                },
                Parameter {
                    name: "b".into(),
                    data_type: DataType::Integer,
                },
            ],
            return_type: Some(DataType::Integer),
            statements: vec![Statement::Return {
                value: Some(Expression::binary(
                    Expression::variable("a", 2),
                    BinaryOp::Plus,
                    Expression::variable("b", 2),
                    2,
                )),
                function: Some("add".into()),
                line: 2,
            }],
            line: 1,
        }
    }

    #[test]
    fn calls_bind_parameters_and_return_a_value() {
        let context = RuntimeContext::new(
            "test",
            vec![print(
                Expression::Call {
                    name: "add".into(),
                    args: vec![Expression::int(2, 3), Expression::int(3, 3)],
                    line: 3,
                },
                3,
            )],
        )
        .add_block(add_block());
        let (interp, sink) = harness(context);
        interp.interpret().unwrap();
        assert_eq!(sink.lines(), vec!["5"]);
    }

    #[test]
    fn arguments_coerce_to_parameter_types() {
        let context = RuntimeContext::new(
            "test",
            vec![print(
                Expression::Call {
                    name: "add".into(),
                    args: vec![Expression::string("2", 3), Expression::string("3", 3)],
                    line: 3,
                },
                3,
            )],
        )
        .add_block(add_block());
        let (interp, sink) = harness(context);
        interp.interpret().unwrap();
        assert_eq!(sink.lines(), vec!["5"]);
    }

    #[test]
    fn wrong_arity_is_an_unresolved_call() {
        let context = RuntimeContext::new(
            "test",
            vec![Statement::Call {
                name: "add".into(),
                args: vec![Expression::int(1, 1)],
                line: 1,
            }],
        )
        .add_block(add_block());
        let (interp, _) = harness(context);
        let err = interp.interpret().unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnresolvedCall);
    }

    #[test]
    fn unknown_calls_are_reported_by_name() {
        let err = run_err(vec![Statement::Call {
            name: "nowhere".into(),
            args: vec![],
            line: 1,
        }]);
        assert_eq!(err.kind, ErrorKind::UnresolvedCall);
        assert_eq!(err.message, "Call cannot find 'nowhere'.");
    }

    #[test]
    fn declared_return_type_is_enforced() {
        let block = BlockStatement {
            name: Some("bad".into()),
            parameters: vec![],
            return_type: Some(DataType::Integer),
            statements: vec![Statement::Return {
                value: Some(Expression::string("nope", 2)),
                function: Some("bad".into()),
                line: 2,
            }],
            line: 1,
        };
        let context = RuntimeContext::new(
            "test",
            vec![Statement::Call {
                name: "bad".into(),
                args: vec![],
                line: 3,
            }],
        )
        .add_block(block);
        let (interp, _) = harness(context);
        let err = interp.interpret().unwrap_err();
        assert_eq!(err.kind, ErrorKind::ReturnTypeMismatch);
    }

    #[test]
    fn return_unwinds_through_nested_loops() {
        let block = BlockStatement {
            name: Some("first_even".into()),
            parameters: vec![],
            return_type: Some(DataType::Integer),
            statements: vec![
                var("i", Expression::int(1, 2), 2),
                Statement::While {
                    condition: Expression::boolean(true, 3),
                    body: vec![
                        Statement::If {
                            condition: Expression::binary(
                                Expression::binary(
                                    Expression::variable("i", 4),
                                    BinaryOp::Percent,
                                    Expression::int(2, 4),
                                    4,
                                ),
                                BinaryOp::Eq,
                                Expression::int(0, 4),
                                4,
                            ),
                            then_branch: vec![Statement::Return {
                                value: Some(Expression::variable("i", 5)),
                                function: Some("first_even".into()),
                                line: 5,
                            }],
                            else_branch: None,
                            line: 4,
                        },
                        assign(
                            "i",
                            Expression::binary(
                                Expression::variable("i", 6),
                                BinaryOp::Plus,
                                Expression::int(1, 6),
                                6,
                            ),
                            6,
                        ),
                    ],
                    line: 3,
                },
            ],
            line: 1,
        };
        let context = RuntimeContext::new(
            "test",
            vec![print(
                Expression::Call {
                    name: "first_even".into(),
                    args: vec![],
                    line: 8,
                },
                8,
            )],
        )
        .add_block(block);
        let (interp, sink) = harness(context);
        interp.interpret().unwrap();
        assert_eq!(sink.lines(), vec!["2"]);
    }
}

mod builtins {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn builtin_calls_resolve_case_insensitively() {
        let lines = run(vec![print(
            Expression::Call {
                name: "Str.Upper".into(),
                args: vec![Expression::string("abc", 1)],
                line: 1,
            },
            1,
        )]);
        assert_eq!(lines, vec!["ABC"]);
    }

    #[test]
    fn builtin_arguments_coerce_to_declared_types() {
        let lines = run(vec![print(
            Expression::Call {
                name: "math.abs".into(),
                args: vec![Expression::string("-3", 1)],
                line: 1,
            },
            1,
        )]);
        assert_eq!(lines, vec!["3.0"]);
    }

    #[test]
    fn builtin_failures_surface_as_runtime_errors() {
        let err = run_err(vec![Statement::Call {
            name: "math.sqrt".into(),
            args: vec![Expression::int(-1, 1)],
            line: 1,
        }]);
        assert_eq!(err.kind, ErrorKind::Runtime);
        assert!(err.message.starts_with("Call Builtin ->"));
    }
}

mod exceptions {
    use super::*;
    use pretty_assertions::assert_eq;

    fn try_with(
        body: Vec<Statement>,
        category: ErrorCategory,
        handler_body: Vec<Statement>,
    ) -> Statement {
        Statement::Try {
            body,
            handlers: vec![ExceptionHandler {
                category,
                variable: Some("e".into()),
                body: handler_body,
            }],
            line: 1,
        }
    }

    #[test]
    fn raised_errors_match_their_category() {
        let lines = run(vec![try_with(
            vec![Statement::Raise {
                category: ErrorCategory::DbError,
                message: Expression::string("db down", 2),
                line: 2,
            }],
            ErrorCategory::DbError,
            vec![print_var("e", 3)],
        )]);
        assert_eq!(lines, vec!["db down"]);
    }

    #[test]
    fn mismatched_handler_lets_the_error_escape() {
        let err = run_err(vec![try_with(
            vec![Statement::Raise {
                category: ErrorCategory::DbError,
                message: Expression::string("db down", 2),
                line: 2,
            }],
            ErrorCategory::IoError,
            vec![],
        )]);
        assert_eq!(err.kind, ErrorKind::Raised(ErrorCategory::DbError));
    }

    #[test]
    fn any_error_catches_everything() {
        let lines = run(vec![try_with(
            vec![print(
                Expression::binary(
                    Expression::int(1, 2),
                    BinaryOp::Slash,
                    Expression::int(0, 2),
                    2,
                ),
                2,
            )],
            ErrorCategory::AnyError,
            vec![print_var("e", 3)],
        )]);
        assert_eq!(lines, vec!["Division by zero."]);
    }

    #[test]
    fn math_errors_match_the_math_handler() {
        let lines = run(vec![try_with(
            vec![print(
                Expression::binary(
                    Expression::int(1, 2),
                    BinaryOp::Percent,
                    Expression::int(0, 2),
                    2,
                ),
                2,
            )],
            ErrorCategory::MathError,
            vec![print(Expression::string("caught", 3), 3)],
        )]);
        assert_eq!(lines, vec!["caught"]);
    }

    #[test]
    fn first_matching_handler_wins() {
        let lines = run(vec![Statement::Try {
            body: vec![Statement::Raise {
                category: ErrorCategory::IoError,
                message: Expression::string("disk", 2),
                line: 2,
            }],
            handlers: vec![
                ExceptionHandler {
                    category: ErrorCategory::DbError,
                    variable: None,
                    body: vec![print(Expression::string("db", 3), 3)],
                },
                ExceptionHandler {
                    category: ErrorCategory::IoError,
                    variable: None,
                    body: vec![print(Expression::string("io", 4), 4)],
                },
                ExceptionHandler {
                    category: ErrorCategory::AnyError,
                    variable: None,
                    body: vec![print(Expression::string("any", 5), 5)],
                },
            ],
            line: 1,
        }]);
        assert_eq!(lines, vec!["io"]);
    }

    #[test]
    fn errors_carry_a_call_stack() {
        let err = run_err(vec![Statement::While {
            condition: Expression::boolean(true, 1),
            body: vec![assign("missing", Expression::int(1, 2), 2)],
            line: 1,
        }]);
        assert_eq!(err.kind, ErrorKind::UndefinedVariable);
        let rendered = err.render_stack();
        assert!(rendered.contains("SCRIPT : script test"));
        assert!(rendered.contains("LOOP : while"));
    }

    #[test]
    fn nested_constructs_each_contribute_a_frame() {
        let err = run_err(vec![
            var("k", Expression::int(0, 1), 1),
            Statement::While {
                condition: Expression::binary(
                    Expression::variable("k", 2),
                    BinaryOp::Lt,
                    Expression::int(1, 2),
                    2,
                ),
                body: vec![Statement::If {
                    condition: Expression::boolean(true, 3),
                    then_branch: vec![print(
                        Expression::binary(
                            Expression::int(1, 4),
                            BinaryOp::Slash,
                            Expression::int(0, 4),
                            4,
                        ),
                        4,
                    )],
                    else_branch: None,
                    line: 3,
                }],
                line: 2,
            },
        ]);
        assert_eq!(err.kind, ErrorKind::DivisionByZero);
        let rendered = err.render_stack();
        assert!(rendered.contains("SCRIPT : script test"));
        assert!(rendered.contains("line 2 LOOP : while"));
        assert!(rendered.contains("line 3 CONDITION : if"));
        assert!(rendered.contains("line 4 STATEMENT : print"));
    }
}

mod records {
    use super::*;
    use pretty_assertions::assert_eq;

    fn with_record(statements: Vec<Statement>) -> (Interpreter, Arc<CaptureSink>) {
        let mut row = indexmap::IndexMap::new();
        row.insert("Name".into(), Value::Str("ada".into()));
        row.insert("Age".into(), Value::Int(36));
        let context =
            RuntimeContext::new("test", statements).seed_global("rec", Value::map(row));
        harness(context)
    }

    #[test]
    fn property_reads_fall_back_case_insensitively() {
        let (interp, sink) = with_record(vec![
            print(
                Expression::Property {
                    target: Box::new(Expression::variable("rec", 1)),
                    name: "Name".into(),
                    line: 1,
                },
                1,
            ),
            print(
                Expression::Property {
                    target: Box::new(Expression::variable("rec", 2)),
                    name: "age".into(),
                    line: 2,
                },
                2,
            ),
        ]);
        interp.interpret().unwrap();
        assert_eq!(sink.lines(), vec!["ada", "36"]);
    }

    #[test]
    fn missing_properties_read_as_null() {
        let (interp, sink) = with_record(vec![print(
            Expression::Property {
                target: Box::new(Expression::variable("rec", 1)),
                name: "email".into(),
                line: 1,
            },
            1,
        )]);
        interp.interpret().unwrap();
        assert_eq!(sink.lines(), vec!["null"]);
    }

    #[test]
    fn property_writes_require_an_existing_field() {
        let (interp, _) = with_record(vec![Statement::IndexAssign {
            target: Expression::Property {
                target: Box::new(Expression::variable("rec", 1)),
                name: "email".into(),
                line: 1,
            },
            value: Expression::string("a@b", 1),
            line: 1,
        }]);
        let err = interp.interpret().unwrap_err();
        assert_eq!(err.message, "Property 'email' does not exist in record.");
    }

    #[test]
    fn property_writes_update_through_the_case_fallback() {
        let (interp, sink) = with_record(vec![
            Statement::IndexAssign {
                target: Expression::Property {
                    target: Box::new(Expression::variable("rec", 1)),
                    name: "age".into(),
                    line: 1,
                },
                value: Expression::int(37, 1),
                line: 1,
            },
            print(
                Expression::Property {
                    target: Box::new(Expression::variable("rec", 2)),
                    name: "Age".into(),
                    line: 2,
                },
                2,
            ),
        ]);
        interp.interpret().unwrap();
        assert_eq!(sink.lines(), vec!["37"]);
    }
}

mod cursors {
    use super::*;
    use pretty_assertions::assert_eq;

    fn people_adapter() -> MemoryAdapter {
        let mut first = indexmap::IndexMap::new();
        first.insert("name".into(), Value::Str("ada".into()));
        let mut second = indexmap::IndexMap::new();
        second.insert("name".into(), Value::Str("grace".into()));
        MemoryAdapter::with_rows(vec![first, second])
    }

    fn cursor_script() -> Vec<Statement> {
        vec![
            Statement::Connect {
                name: "db".into(),
                spec: Expression::string("memory:", 1),
                line: 1,
            },
            Statement::OpenCursor {
                name: "people".into(),
                connection: "db".into(),
                sql: Expression::string("select name from people", 2),
                args: vec![],
                line: 2,
            },
            Statement::While {
                condition: Expression::CursorHasNext {
                    cursor: "people".into(),
                    line: 3,
                },
                body: vec![
                    var(
                        "row",
                        Expression::CursorNext {
                            cursor: "people".into(),
                            line: 4,
                        },
                        4,
                    ),
                    print(
                        Expression::Property {
                            target: Box::new(Expression::variable("row", 5)),
                            name: "name".into(),
                            line: 5,
                        },
                        5,
                    ),
                ],
                line: 3,
            },
            Statement::CloseCursor {
                name: "people".into(),
                line: 6,
            },
            Statement::CloseConnection {
                name: "db".into(),
                line: 7,
            },
        ]
    }

    #[test]
    fn cursor_rows_stream_through_a_while_loop() {
        let sink = Arc::new(CaptureSink::default());
        let interp = Interpreter::new(RuntimeContext::new("test", cursor_script()))
            .with_db(Arc::new(people_adapter()))
            .with_output(sink.clone());
        interp.interpret().unwrap();
        assert_eq!(sink.lines(), vec!["ada", "grace"]);
    }

    #[test]
    fn open_cursor_requires_an_open_connection() {
        let err = run_err(vec![Statement::OpenCursor {
            name: "c".into(),
            connection: "nope".into(),
            sql: Expression::string("select 1", 1),
            args: vec![],
            line: 1,
        }]);
        assert_eq!(err.kind, ErrorKind::Db);
        assert_eq!(err.message, "Connection 'nope' is not open.");
    }

    #[test]
    fn default_adapter_refuses_to_connect() {
        let err = run_err(vec![Statement::Connect {
            name: "db".into(),
            spec: Expression::string("anything", 1),
            line: 1,
        }]);
        assert_eq!(err.kind, ErrorKind::Db);
        assert!(err.message.contains("No database adapter configured."));
    }
}

mod artifacts {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_host_completes_creation_immediately() {
        let (interp, _) = harness(RuntimeContext::new(
            "test",
            vec![Statement::Artifact {
                name: "win".into(),
                spec: Expression::string("{\"kind\": \"window\"}", 1),
                line: 1,
            }],
        ));
        interp.interpret().unwrap();
    }

    #[test]
    fn property_writes_need_a_real_host() {
        let (interp, _) = harness(RuntimeContext::new(
            "test",
            vec![
                Statement::Artifact {
                    name: "win".into(),
                    spec: Expression::string("{}", 1),
                    line: 1,
                },
                Statement::ArtifactSet {
                    artifact: "win".into(),
                    property: "title".into(),
                    value: Expression::string("hello", 2),
                    line: 2,
                },
            ],
        ));
        let err = interp.interpret().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Ui);
    }

    #[test]
    fn unknown_artifact_handles_are_rejected() {
        let err = run_err(vec![Statement::ArtifactSet {
            artifact: "ghost".into(),
            property: "title".into(),
            value: Expression::string("x", 1),
            line: 1,
        }]);
        assert_eq!(err.kind, ErrorKind::Ui);
        assert_eq!(err.message, "Artifact 'ghost' not found.");
    }
}

mod concurrency {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::thread;

    #[test]
    fn threads_evaluate_against_isolated_scope_chains() {
        let context = RuntimeContext::new("test", vec![var("shared", Expression::int(7, 1), 1)]);
        let interp = Arc::new(harness(context).0);
        interp.interpret().unwrap();

        let mut handles = Vec::new();
        for i in 0..4 {
            let interp = interp.clone();
            handles.push(thread::spawn(move || {
                let env = interp.env();
                env.push_scope();
                env.values().define("mine".into(), Value::Int(i));
                // Every thread sees the shared base binding plus its own.
                assert_eq!(
                    interp.eval(&Expression::variable("shared", 1)).unwrap(),
                    Value::Int(7)
                );
                assert_eq!(
                    interp.eval(&Expression::variable("mine", 1)).unwrap(),
                    Value::Int(i)
                );
                env.pop_scope();
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        // The script thread never sees another thread's locals.
        assert!(interp.eval(&Expression::variable("mine", 1)).is_err());
    }

    #[test]
    fn shutdown_interrupts_a_running_loop() {
        let context = RuntimeContext::new(
            "test",
            vec![Statement::While {
                condition: Expression::boolean(true, 1),
                body: vec![],
                line: 1,
            }],
        );
        let interp = Arc::new(harness(context).0);
        let flag = interp.shutdown_flag();
        let runner = {
            let interp = interp.clone();
            thread::spawn(move || interp.interpret())
        };
        flag.store(true, std::sync::atomic::Ordering::Relaxed);
        let err = runner.join().unwrap().unwrap_err();
        assert_eq!(err.message, "Execution interrupted.");
    }
}

mod echo {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn echo_mode_traces_statements() {
        let context = RuntimeContext::new("test", vec![var("x", Expression::int(1, 1), 1)]);
        let (interp, sink) = harness(context);
        interp.env().set_echo(true);
        interp.interpret().unwrap();
        assert_eq!(sink.lines(), vec!["line 1 STATEMENT : var 'x'"]);
    }

    #[test]
    fn echo_mode_reaches_nested_statements() {
        let context = RuntimeContext::new(
            "test",
            vec![Statement::If {
                condition: Expression::boolean(true, 1),
                then_branch: vec![var("x", Expression::int(1, 2), 2)],
                else_branch: None,
                line: 1,
            }],
        );
        let (interp, sink) = harness(context);
        interp.env().set_echo(true);
        interp.interpret().unwrap();
        assert_eq!(
            sink.lines(),
            vec!["line 1 CONDITION : if", "line 2 STATEMENT : var 'x'"]
        );
    }
}
