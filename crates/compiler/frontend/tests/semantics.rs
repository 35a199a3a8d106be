//! End-to-end build checks: programs assembled as syntax trees, run
//! through a full build, with assertions on the produced IR and on the
//! reported diagnostics.

use sable_ast::{self as ast, BinOp, Expr, FileId, Span, Spanned};
use sable_compiler_frontend::diagnostic::Diagnostic;
use sable_compiler_frontend::ir;
use sable_compiler_frontend::{build_program, BuildOptions};

const SP: Span = Span::ZERO;

fn sp<A>(value: A) -> Spanned<A> {
    (value, SP)
}

fn build(items: Vec<ast::Item<'static>>) -> (ir::Module, Vec<Diagnostic>) {
    build_with(items, BuildOptions::default())
}

fn build_with(
    items: Vec<ast::Item<'static>>,
    options: BuildOptions,
) -> (ir::Module, Vec<Diagnostic>) {
    let nodes = vec![ast::SourceNode::new(
        FileId(0),
        vec![],
        ast::Module::new(items),
    )];
    let graph = ast::SourceGraph::new(nodes);
    build_program(&graph, options)
}

fn build_graph(
    files: Vec<(Vec<usize>, Vec<ast::Item<'static>>)>,
) -> (ir::Module, Vec<Diagnostic>) {
    let nodes: Vec<ast::SourceNode<'static>> = files
        .into_iter()
        .enumerate()
        .map(|(index, (imports, items))| {
            ast::SourceNode::new(FileId(index as u32), imports, ast::Module::new(items))
        })
        .collect();
    let graph = ast::SourceGraph::new(nodes);
    build_program(&graph, BuildOptions::default())
}

fn codes(diagnostics: &[Diagnostic]) -> Vec<&'static str> {
    diagnostics.iter().map(|d| d.code()).collect()
}

fn assert_clean(diagnostics: &[Diagnostic]) {
    assert!(
        diagnostics.is_empty(),
        "unexpected diagnostics: {diagnostics:?}"
    );
}

fn call_targets(function: &ir::Function) -> Vec<&str> {
    function
        .blocks
        .iter()
        .flat_map(|block| &block.instrs)
        .filter_map(|instr| match instr {
            ir::Instr::Call { function, .. } => Some(function.as_str()),
            _ => None,
        })
        .collect()
}

// ----------------------------------------------------------------------
// Syntax tree construction
// ----------------------------------------------------------------------

fn ty(name: &'static str) -> ast::TypeName<'static> {
    ast::TypeName::ident(name, SP)
}

fn function(
    name: &'static str,
    params: Vec<ast::Param<'static>>,
    return_type: Option<ast::TypeName<'static>>,
    stmts: Vec<ast::Stmt<'static>>,
) -> ast::FnDecl<'static> {
    ast::FnDecl {
        name: ast::FnName::Named(name),
        this_param: None,
        params: params.into(),
        return_type,
        return_value: ast::ValueModifier::Value,
        references_pollution: Box::new([]),
        return_references: Box::new([]),
        is_unsafe: false,
        is_constexpr: false,
        is_generator: false,
        no_mangle: false,
        calling_convention: None,
        virtual_spec: ast::VirtualSpec::None,
        body: Some(ast::FnBody::Regular {
            constructor_initializers: None,
            block: ast::Block::new(stmts, SP),
        }),
        span: SP,
    }
}

/// A global function kept under its plain name, so tests can find it in
/// the produced module.
fn exported(
    name: &'static str,
    params: Vec<ast::Param<'static>>,
    stmts: Vec<ast::Stmt<'static>>,
) -> ast::Item<'static> {
    let mut decl = function(name, params, None, stmts);
    decl.no_mangle = true;
    ast::Item::Function(decl)
}

fn param(name: &'static str, type_name: &'static str) -> ast::Param<'static> {
    ast::Param {
        name,
        ty: ty(type_name),
        value: ast::ValueModifier::Value,
        span: SP,
    }
}

fn ref_param(name: &'static str, type_name: &'static str) -> ast::Param<'static> {
    ast::Param {
        name,
        ty: ty(type_name),
        value: ast::ValueModifier::RefImut,
        span: SP,
    }
}

fn method(
    name: &'static str,
    params: Vec<ast::Param<'static>>,
    return_type: Option<ast::TypeName<'static>>,
    stmts: Vec<ast::Stmt<'static>>,
) -> ast::ClassMember<'static> {
    let mut decl = function(name, params, return_type, stmts);
    decl.this_param = Some(ast::ThisParam {
        mutability: ast::Mutability::Imut,
        by_value: false,
        span: SP,
    });
    ast::ClassMember::Function(decl)
}

/// A bodiless pure virtual method, as interfaces declare them.
fn pure_method(
    name: &'static str,
    return_type: ast::TypeName<'static>,
) -> ast::ClassMember<'static> {
    let mut decl = function(name, vec![], Some(return_type), vec![]);
    decl.body = None;
    decl.virtual_spec = ast::VirtualSpec::Pure;
    decl.this_param = Some(ast::ThisParam {
        mutability: ast::Mutability::Imut,
        by_value: false,
        span: SP,
    });
    ast::ClassMember::Function(decl)
}

fn class_decl(
    name: &'static str,
    kind: ast::ClassKindAttr,
    parents: Vec<&'static str>,
    members: Vec<ast::ClassMember<'static>>,
) -> ast::ClassDecl<'static> {
    ast::ClassDecl {
        name,
        kind,
        parents: parents
            .into_iter()
            .map(|parent| sp(ast::Path::ident(parent)))
            .collect::<Vec<_>>()
            .into(),
        keep_fields_order: false,
        non_sync: ast::NonSyncTag::None,
        members: members.into(),
        span: SP,
    }
}

fn struct_item(
    name: &'static str,
    members: Vec<ast::ClassMember<'static>>,
) -> ast::Item<'static> {
    ast::Item::Class(class_decl(name, ast::ClassKindAttr::Struct, vec![], members))
}

fn field(type_name: &'static str, name: &'static str) -> ast::ClassMember<'static> {
    ast::ClassMember::Field(ast::FieldDecl {
        name,
        ty: ty(type_name),
        mutability: ast::Mutability::Imut,
        is_reference: false,
        reference_tag: None,
        initializer: None,
        span: SP,
    })
}

fn var_decl(
    type_name: ast::TypeName<'static>,
    name: &'static str,
    mutability: ast::Mutability,
    is_reference: bool,
    initializer: Option<ast::Initializer<'static>>,
) -> ast::Stmt<'static> {
    ast::Stmt::Variables(ast::VarsDecl {
        ty: type_name,
        vars: Box::new([ast::VarEntry {
            name,
            mutability,
            is_reference,
            initializer,
            span: SP,
        }]),
        span: SP,
    })
}

fn init(expr: Expr<'static>) -> Option<ast::Initializer<'static>> {
    Some(ast::Initializer::Expression(sp(expr)))
}

fn auto_stmt(name: &'static str, value: Expr<'static>) -> ast::Stmt<'static> {
    ast::Stmt::Auto {
        name,
        mutability: ast::Mutability::Imut,
        is_reference: false,
        init: sp(value),
        span: SP,
    }
}

fn if_stmt(cond: Expr<'static>, then_stmts: Vec<ast::Stmt<'static>>) -> ast::Stmt<'static> {
    ast::Stmt::If(ast::IfStmt {
        branches: Box::new([ast::CondBlock {
            cond: sp(cond),
            block: ast::Block::new(then_stmts, SP),
        }]),
        else_block: None,
        span: SP,
    })
}

fn static_assert(expr: Expr<'static>) -> ast::Item<'static> {
    ast::Item::StaticAssert(ast::StaticAssert {
        expr: sp(expr),
        span: SP,
    })
}

// ----------------------------------------------------------------------
// Destructor placement
// ----------------------------------------------------------------------

#[test]
fn locals_are_destroyed_in_reverse_order_across_blocks() {
    let local = |name| var_decl(ty("S"), name, ast::Mutability::Imut, false, None);
    let (module, diagnostics) = build(vec![
        struct_item("S", vec![]),
        exported(
            "Run",
            vec![],
            vec![
                local("a"),
                ast::Stmt::Block(ast::Block::new(vec![local("b"), local("c")], SP)),
                local("d"),
            ],
        ),
    ]);
    assert_clean(&diagnostics);
    let run = module.function("Run").expect("Run should be lowered");
    assert_eq!(run.destructor_call_order(), vec!["c", "b", "d", "a"]);
}

#[test]
fn generated_destructor_destroys_fields_in_reverse_declaration_order() {
    let (module, diagnostics) = build(vec![
        struct_item("S", vec![]),
        struct_item("T", vec![field("S", "a"), field("S", "b"), field("S", "c")]),
        exported(
            "Run",
            vec![],
            vec![var_decl(ty("T"), "t", ast::Mutability::Imut, false, None)],
        ),
    ]);
    assert_clean(&diagnostics);
    let orders: Vec<Vec<&str>> = module
        .functions
        .iter()
        .map(|f| f.destructor_call_order())
        .collect();
    assert!(
        orders.contains(&vec!["c", "b", "a"]),
        "no generated destructor with reverse field order: {orders:?}"
    );
    let run = module.function("Run").expect("Run should be lowered");
    assert_eq!(run.destructor_call_order(), vec!["t"]);
}

#[test]
fn early_return_destroys_live_locals() {
    let local = |name| var_decl(ty("S"), name, ast::Mutability::Imut, false, None);
    let (module, diagnostics) = build(vec![
        struct_item("S", vec![]),
        exported(
            "Run",
            vec![param("c", "bool")],
            vec![
                local("a"),
                if_stmt(Expr::ident("c"), vec![ast::Stmt::Return(None, SP)]),
                local("b"),
            ],
        ),
    ]);
    assert_clean(&diagnostics);
    // One destruction of `a` on the early return, then `b`, `a` on the
    // fall-through path.
    let run = module.function("Run").expect("Run should be lowered");
    assert_eq!(run.destructor_call_order(), vec!["a", "b", "a"]);
}

// ----------------------------------------------------------------------
// Compile-time evaluation
// ----------------------------------------------------------------------

#[test]
fn constexpr_function_evaluates_recursively_in_static_assert() {
    let mut factorial = function(
        "Factorial",
        vec![param("x", "u32")],
        Some(ty("u32")),
        vec![
            if_stmt(
                Expr::binary(sp(Expr::ident("x")), BinOp::Le, sp(Expr::int(1, "u32"))),
                vec![ast::Stmt::Return(Some(sp(Expr::int(1, "u32"))), SP)],
            ),
            ast::Stmt::Return(
                Some(sp(Expr::binary(
                    sp(Expr::ident("x")),
                    BinOp::Mul,
                    sp(Expr::call(
                        sp(Expr::ident("Factorial")),
                        vec![sp(Expr::binary(
                            sp(Expr::ident("x")),
                            BinOp::Sub,
                            sp(Expr::int(1, "u32")),
                        ))],
                    )),
                ))),
                SP,
            ),
        ],
    );
    factorial.is_constexpr = true;
    let (_, diagnostics) = build(vec![
        ast::Item::Function(factorial),
        static_assert(Expr::binary(
            sp(Expr::call(
                sp(Expr::ident("Factorial")),
                vec![sp(Expr::int(9, "u32"))],
            )),
            BinOp::Eq,
            sp(Expr::int(362880, "u32")),
        )),
    ]);
    assert_clean(&diagnostics);
}

#[test]
fn integer_division_by_zero_is_rejected_in_constants() {
    let (_, diagnostics) = build(vec![static_assert(Expr::binary(
        sp(Expr::binary(
            sp(Expr::int(1, "")),
            BinOp::Div,
            sp(Expr::int(0, "")),
        )),
        BinOp::Eq,
        sp(Expr::int(1, "")),
    ))]);
    assert_eq!(codes(&diagnostics), ["ConstantExpressionResultIsUndefined"]);
}

#[test]
fn float_division_by_zero_is_well_defined_in_constants() {
    let (_, diagnostics) = build(vec![static_assert(Expr::binary(
        sp(Expr::binary(
            sp(Expr::float(1.0, "")),
            BinOp::Div,
            sp(Expr::float(0.0, "")),
        )),
        BinOp::Gt,
        sp(Expr::float(100.0, "")),
    ))]);
    assert_clean(&diagnostics);
}

#[test]
fn failed_static_assert_is_reported() {
    let (_, diagnostics) = build(vec![static_assert(Expr::binary(
        sp(Expr::int(2, "")),
        BinOp::Eq,
        sp(Expr::int(3, "")),
    ))]);
    assert_eq!(codes(&diagnostics), ["StaticAssertionFailed"]);
}

// ----------------------------------------------------------------------
// Overload resolution
// ----------------------------------------------------------------------

#[test]
fn overload_choice_does_not_depend_on_declaration_order() {
    let foo_i32 = || ast::Item::Function(function("Foo", vec![param("value", "i32")], None, vec![]));
    let foo_u32 = || ast::Item::Function(function("Foo", vec![param("value", "u32")], None, vec![]));
    let run = || {
        exported(
            "Run",
            vec![],
            vec![ast::Stmt::Expr(sp(Expr::call(
                sp(Expr::ident("Foo")),
                vec![sp(Expr::int(1, ""))],
            )))],
        )
    };

    let (first, diagnostics) = build(vec![foo_i32(), foo_u32(), run()]);
    assert_clean(&diagnostics);
    let (second, diagnostics) = build(vec![foo_u32(), foo_i32(), run()]);
    assert_clean(&diagnostics);

    let first_targets: Vec<String> = call_targets(first.function("Run").expect("Run"))
        .into_iter()
        .map(str::to_owned)
        .collect();
    let second_targets: Vec<String> = call_targets(second.function("Run").expect("Run"))
        .into_iter()
        .map(str::to_owned)
        .collect();
    assert_eq!(first_targets.len(), 1);
    assert!(first_targets[0].contains("Foo"));
    assert_eq!(first_targets, second_targets);
}

#[test]
fn nearest_class_overload_set_shadows_ancestors() {
    let base = ast::Item::Class(class_decl(
        "Base",
        ast::ClassKindAttr::Polymorph,
        vec![],
        vec![method(
            "Get",
            vec![],
            Some(ty("i32")),
            vec![ast::Stmt::Return(Some(sp(Expr::int(1, ""))), SP)],
        )],
    ));
    let derived = ast::Item::Class(class_decl(
        "Derived",
        ast::ClassKindAttr::Polymorph,
        vec!["Base"],
        vec![method(
            "Get",
            vec![param("x", "i32")],
            Some(ty("i32")),
            vec![ast::Stmt::Return(Some(sp(Expr::ident("x"))), SP)],
        )],
    ));
    let run = exported(
        "Run",
        vec![],
        vec![
            var_decl(ty("Derived"), "d", ast::Mutability::Imut, false, None),
            auto_stmt(
                "r",
                Expr::call(
                    sp(Expr::Member {
                        base: Box::new(sp(Expr::ident("d"))),
                        name: "Get",
                    }),
                    vec![sp(Expr::int(5, ""))],
                ),
            ),
        ],
    );

    let (module, diagnostics) = build(vec![base, derived, run]);
    assert_clean(&diagnostics);
    let targets = call_targets(module.function("Run").expect("Run"));
    assert!(
        targets
            .iter()
            .any(|t| t.contains("Derived") && t.contains("Get")),
        "expected a call into Derived::Get, got {targets:?}"
    );
    assert!(
        !targets.iter().any(|t| t.contains("Base")),
        "the hidden Base overload was called: {targets:?}"
    );
}

#[test]
fn first_declared_parent_provides_the_method_set() {
    let getter = |interface: &'static str| {
        ast::Item::Class(class_decl(
            interface,
            ast::ClassKindAttr::Interface,
            vec![],
            vec![pure_method("Get", ty("i32"))],
        ))
    };
    let targets_for = |parents: Vec<&'static str>| {
        let (module, diagnostics) = build(vec![
            getter("First"),
            getter("Second"),
            ast::Item::Class(class_decl(
                "Holder",
                ast::ClassKindAttr::Abstract,
                parents,
                vec![],
            )),
            exported(
                "Run",
                vec![ref_param("d", "Holder")],
                vec![auto_stmt(
                    "r",
                    Expr::call(
                        sp(Expr::Member {
                            base: Box::new(sp(Expr::ident("d"))),
                            name: "Get",
                        }),
                        vec![],
                    ),
                )],
            ),
        ]);
        assert_clean(&diagnostics);
        call_targets(module.function("Run").expect("Run"))
            .into_iter()
            .map(str::to_owned)
            .collect::<Vec<_>>()
    };

    // Two unrelated parents both declare `Get`; the lookup walks
    // parents in declaration order and the first set found wins.
    let forward = targets_for(vec!["First", "Second"]);
    assert!(
        forward.iter().any(|t| t.contains("First")),
        "expected First::Get, got {forward:?}"
    );
    let backward = targets_for(vec!["Second", "First"]);
    assert!(
        backward.iter().any(|t| t.contains("Second")),
        "expected Second::Get, got {backward:?}"
    );
}

// ----------------------------------------------------------------------
// Templates
// ----------------------------------------------------------------------

#[test]
fn type_template_instantiates_once_per_argument_list() {
    let boxed = ast::Item::ClassTemplate(ast::TemplateDecl {
        params: Box::new([ast::TemplateParam {
            name: "T",
            kind: ast::TemplateParamKind::Type,
            span: SP,
        }]),
        signature: None,
        decl: class_decl(
            "Box",
            ast::ClassKindAttr::Struct,
            vec![],
            vec![ast::ClassMember::Field(ast::FieldDecl {
                name: "value",
                ty: ty("T"),
                mutability: ast::Mutability::Imut,
                is_reference: false,
                reference_tag: None,
                initializer: Some(ast::Initializer::Expression(sp(Expr::int(0, "")))),
                span: SP,
            })],
        ),
        span: SP,
    });
    let box_i32 = || {
        ast::TypeName::Path((
            ast::Path::new([ast::PathComponent::with_args(
                "Box",
                vec![ast::TemplateArg::Type(ty("i32"))],
            )]),
            SP,
        ))
    };

    let (module, diagnostics) = build(vec![
        boxed,
        exported(
            "RunA",
            vec![],
            vec![var_decl(box_i32(), "a", ast::Mutability::Imut, false, None)],
        ),
        exported(
            "RunB",
            vec![],
            vec![var_decl(box_i32(), "b", ast::Mutability::Imut, false, None)],
        ),
    ]);
    assert_clean(&diagnostics);
    let instances = module
        .structs
        .iter()
        .filter(|s| s.name.contains("Box"))
        .count();
    assert_eq!(instances, 1, "equal template arguments must share one instance");
}

// ----------------------------------------------------------------------
// Imports
// ----------------------------------------------------------------------

#[test]
fn diamond_imports_merge_without_redefinition() {
    let (module, diagnostics) = build_graph(vec![
        (
            vec![],
            vec![struct_item("S", vec![]), exported("Helper", vec![], vec![])],
        ),
        (vec![0], vec![]),
        (vec![0], vec![]),
        (
            vec![1, 2],
            vec![exported(
                "Run",
                vec![],
                vec![
                    var_decl(ty("S"), "s", ast::Mutability::Imut, false, None),
                    ast::Stmt::Expr(sp(Expr::call(sp(Expr::ident("Helper")), Vec::new()))),
                ],
            )],
        ),
    ]);
    assert_clean(&diagnostics);
    let helpers = module.functions.iter().filter(|f| f.name == "Helper").count();
    assert_eq!(helpers, 1, "an imported function must keep its identity");
}

// ----------------------------------------------------------------------
// Incomplete types
// ----------------------------------------------------------------------

#[test]
fn self_referential_field_reports_incomplete_type() {
    let (_, diagnostics) = build(vec![struct_item("S", vec![field("S", "inner")])]);
    assert!(
        codes(&diagnostics).contains(&"UsingIncompleteType"),
        "got {:?}",
        codes(&diagnostics)
    );
}

// ----------------------------------------------------------------------
// Reference checking
// ----------------------------------------------------------------------

#[test]
fn shared_references_are_allowed() {
    let (_, diagnostics) = build(vec![exported(
        "Run",
        vec![],
        vec![
            var_decl(ty("i32"), "x", ast::Mutability::Mut, false, init(Expr::int(0, ""))),
            var_decl(ty("i32"), "r0", ast::Mutability::Imut, true, init(Expr::ident("x"))),
            var_decl(ty("i32"), "r1", ast::Mutability::Imut, true, init(Expr::ident("x"))),
        ],
    )]);
    assert_clean(&diagnostics);
}

#[test]
fn mutable_reference_requires_exclusive_access() {
    let (_, diagnostics) = build(vec![exported(
        "Run",
        vec![],
        vec![
            var_decl(ty("i32"), "x", ast::Mutability::Mut, false, init(Expr::int(0, ""))),
            var_decl(ty("i32"), "r", ast::Mutability::Imut, true, init(Expr::ident("x"))),
            var_decl(ty("i32"), "m", ast::Mutability::Mut, true, init(Expr::ident("x"))),
        ],
    )]);
    assert_eq!(codes(&diagnostics), ["ReferenceProtectionError"]);
}

#[test]
fn mutable_reference_to_immutable_variable_is_rejected() {
    let (_, diagnostics) = build(vec![exported(
        "Run",
        vec![],
        vec![
            var_decl(ty("i32"), "x", ast::Mutability::Imut, false, init(Expr::int(0, ""))),
            var_decl(ty("i32"), "m", ast::Mutability::Mut, true, init(Expr::ident("x"))),
        ],
    )]);
    assert_eq!(codes(&diagnostics), ["BindingConstReferenceToNonconstReference"]);
}

#[test]
fn moved_variable_cannot_be_read_again() {
    let (_, diagnostics) = build(vec![exported(
        "Run",
        vec![],
        vec![
            var_decl(ty("i32"), "x", ast::Mutability::Mut, false, init(Expr::int(0, ""))),
            auto_stmt("y", Expr::Move("x")),
            auto_stmt("z", Expr::ident("x")),
        ],
    )]);
    assert_eq!(codes(&diagnostics), ["AccessingMovedVariable"]);
}

#[test]
fn move_in_one_branch_only_is_a_conditional_move() {
    let (_, diagnostics) = build(vec![
        struct_item("S", vec![]),
        exported(
            "Run",
            vec![param("c", "bool")],
            vec![
                var_decl(ty("S"), "s", ast::Mutability::Imut, false, None),
                if_stmt(Expr::ident("c"), vec![auto_stmt("y", Expr::Move("s"))]),
            ],
        ),
    ]);
    assert_eq!(codes(&diagnostics), ["ConditionalMove"]);
}

#[test]
fn moving_an_outer_variable_inside_a_loop_is_rejected() {
    let (_, diagnostics) = build(vec![exported(
        "Run",
        vec![param("c", "bool")],
        vec![
            var_decl(ty("i32"), "x", ast::Mutability::Imut, false, init(Expr::int(0, ""))),
            ast::Stmt::While {
                cond: sp(Expr::ident("c")),
                body: ast::Block::new(vec![auto_stmt("y", Expr::Move("x"))], SP),
                span: SP,
            },
        ],
    )]);
    assert_eq!(codes(&diagnostics), ["OuterVariableMoveInsideLoop"]);
}

#[test]
fn returned_references_must_come_from_declared_parameters() {
    let picker = |ret_name: &'static str| {
        let mut decl = function(
            "Pick",
            vec![ref_param("a", "i32"), ref_param("b", "i32")],
            Some(ty("i32")),
            vec![ast::Stmt::Return(Some(sp(Expr::ident(ret_name))), SP)],
        );
        decl.return_value = ast::ValueModifier::RefImut;
        decl.return_references = Box::new([ast::ParamReference {
            param: 0,
            tag: None,
        }]);
        decl.no_mangle = true;
        ast::Item::Function(decl)
    };

    let (_, diagnostics) = build(vec![picker("a")]);
    assert_clean(&diagnostics);

    let (_, diagnostics) = build(vec![picker("b")]);
    assert_eq!(codes(&diagnostics), ["ReturningUnallowedReference"]);
}

// ----------------------------------------------------------------------
// Generators
// ----------------------------------------------------------------------

#[test]
fn generator_body_is_bracketed_by_suspend_points() {
    let mut gen = function(
        "Gen",
        vec![param("x", "i32")],
        None,
        vec![ast::Stmt::Yield(None, SP)],
    );
    gen.is_generator = true;
    gen.no_mangle = true;
    let (module, diagnostics) = build(vec![ast::Item::Function(gen)]);
    assert_clean(&diagnostics);

    let gen = module.function("Gen").expect("Gen should be lowered");
    // The argument is copied into a coroutine-frame slot before the
    // initial suspend.
    match gen.blocks[0].instrs.first() {
        Some(ir::Instr::Store {
            value: ir::Operand::Local(src),
            ..
        }) => assert_eq!(*src, gen.params[0]),
        other => panic!("expected an argument copy first, got {other:?}"),
    }
    let points: Vec<String> = gen
        .blocks
        .iter()
        .flat_map(|block| &block.instrs)
        .filter_map(|instr| match instr {
            ir::Instr::Suspend { point } => Some(format!("{point:?}")),
            ir::Instr::Yield { .. } => Some("Yield".into()),
            _ => None,
        })
        .collect();
    assert_eq!(points, ["Initial", "Yield", "Final"]);
}

// ----------------------------------------------------------------------
// Optional build metadata
// ----------------------------------------------------------------------

#[test]
fn optimization_metadata_is_emitted_only_on_request() {
    let items = || {
        vec![
            struct_item("S", vec![]),
            exported(
                "Run",
                vec![],
                vec![var_decl(ty("S"), "s", ast::Mutability::Imut, false, None)],
            ),
        ]
    };
    let has_markers = |function: &ir::Function| {
        function.blocks.iter().flat_map(|block| &block.instrs).any(|instr| {
            matches!(
                instr,
                ir::Instr::LifetimeStart { .. } | ir::Instr::LifetimeEnd { .. }
            )
        })
    };

    let (plain, diagnostics) = build(items());
    assert_clean(&diagnostics);
    assert!(plain.type_tags.is_empty());
    let run = plain.function("Run").expect("Run");
    assert!(run.source_span.is_none());
    assert!(!has_markers(run));

    let options = BuildOptions {
        debug_info: true,
        lifetime_markers: true,
        tbaa_metadata: true,
        ..BuildOptions::default()
    };
    let (module, diagnostics) = build_with(items(), options);
    assert_clean(&diagnostics);
    let run = module.function("Run").expect("Run");
    assert!(run.source_span.is_some());
    assert!(has_markers(run));
    assert_eq!(module.type_tags[0].parent, None);
    let tag = module.structs[0].tbaa_tag.expect("struct layouts are tagged");
    assert_eq!(module.type_tags[tag as usize].parent, Some(0));
}

// ----------------------------------------------------------------------
// Statement checking
// ----------------------------------------------------------------------

#[test]
fn initializer_type_mismatch_is_reported() {
    let (_, diagnostics) = build(vec![exported(
        "Run",
        vec![],
        vec![var_decl(
            ty("i32"),
            "x",
            ast::Mutability::Imut,
            false,
            init(Expr::Bool(true)),
        )],
    )]);
    assert_eq!(codes(&diagnostics), ["TypesMismatch"]);
}

#[test]
fn statements_after_a_terminator_are_unreachable() {
    let (_, diagnostics) = build(vec![exported(
        "Run",
        vec![],
        vec![
            ast::Stmt::Return(None, SP),
            var_decl(ty("i32"), "x", ast::Mutability::Imut, false, init(Expr::int(0, ""))),
        ],
    )]);
    assert_eq!(codes(&diagnostics), ["UnreachableCode"]);
}
