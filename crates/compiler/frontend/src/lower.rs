//! Lowering of function bodies. Statements and expressions become IR
//! instructions, destructor calls are placed at every scope exit, and
//! the reference analysis walks the body alongside code emission.

use std::rc::Rc;

use hashbrown::HashMap;
use itertools::Itertools;
use sable_ast as ast;
use sable_ast::Span;

use crate::classes;
use crate::cte;
use crate::diagnostic::Error;
use crate::ir;
use crate::overload::{self, ArgInfo, Candidate, CandidateParam, TypeRelations};
use crate::refs_graph::{NodeId, NodeKind, ReferencesGraph};
use crate::scopes::ScopeId;
use crate::templates::TemplateId;
use crate::types::{ClassId, Fundamental, FunctionType, Type, ValueType};
use crate::values::{ConstValue, FunctionId, FunctionSetId, Value, VariableId};
use crate::{Resolved, Session};

/// Lowers one declared function to its IR body. Returns `None` for
/// functions that have no body to lower (prototypes, deleted members).
pub(crate) fn lower_function<'src>(
    session: &mut Session<'src>,
    id: FunctionId,
) -> Option<ir::Function> {
    let function = &session.functions[id.index()];
    if function.is_deleted || (!function.has_body && !function.is_generated) {
        return None;
    }
    let owner = function.owner_class;
    match function.decl {
        None => Some(lower_generated(session, id, owner?)),
        Some(decl) => match &decl.body {
            Some(ast::FnBody::Regular {
                constructor_initializers,
                block,
            }) => Lowerer::new(session, id).lower_regular(
                decl,
                constructor_initializers.as_deref(),
                block,
            ),
            Some(ast::FnBody::Generated) => Some(lower_generated(session, id, owner?)),
            Some(ast::FnBody::Deleted) | None => None,
        },
    }
}

// ----------------------------------------------------------------------
// Generated special members
// ----------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GeneratedKind {
    DefaultConstructor,
    CopyConstructor,
    Destructor,
}

/// Bodies of compiler-generated constructors and destructors are
/// synthesized field-wise, without an AST to walk.
fn lower_generated(session: &mut Session<'_>, id: FunctionId, class: ClassId) -> ir::Function {
    let (name, param_count, is_destructor) = {
        let function = &session.functions[id.index()];
        (
            function
                .mangled_name
                .clone()
                .unwrap_or_else(|| function.name.clone()),
            function.ty.params.len(),
            function.is_destructor(),
        )
    };
    let kind = if is_destructor {
        GeneratedKind::Destructor
    } else if param_count == 2 {
        GeneratedKind::CopyConstructor
    } else {
        GeneratedKind::DefaultConstructor
    };

    let mut builder = ir::FunctionBuilder::new(name, Type::VOID);
    let this_local = builder.add_param("this", Type::Class(class), true);

    let fields: Vec<(u32, String, Type, bool)> = session.classes[class.index()]
        .fields
        .iter()
        .enumerate()
        .map(|(index, field)| {
            (
                index as u32,
                field.name.clone(),
                field.ty.clone(),
                field.is_reference,
            )
        })
        .collect();

    match kind {
        GeneratedKind::DefaultConstructor => {
            let decl = session.classes[class.index()].decl;
            let body_scope = session.classes[class.index()].scope;
            for (index, name, ty, is_reference) in fields {
                if is_reference {
                    continue;
                }
                // Field initializers in generated constructors are
                // evaluated at compile time.
                if let Some(ast::Initializer::Expression(expr)) = field_initializer(decl, &name) {
                    if let Ok(value) = session.eval_const(body_scope, expr) {
                        let alias = builder.add_local(name, ty, true);
                        builder.emit(ir::Instr::FieldPtr {
                            dst: alias,
                            base: this_local,
                            field: index,
                        });
                        builder.emit(ir::Instr::Store {
                            dst: alias,
                            value: ir::Operand::Const(value.value),
                        });
                        continue;
                    }
                }
                if let Some(zero) = classes::zero_value(&ty) {
                    let alias = builder.add_local(name, ty, true);
                    builder.emit(ir::Instr::FieldPtr {
                        dst: alias,
                        base: this_local,
                        field: index,
                    });
                    builder.emit(ir::Instr::Store {
                        dst: alias,
                        value: ir::Operand::Const(zero),
                    });
                } else if let Type::Class(field_class) = ty {
                    if let Some(ctor) = default_constructor(session, field_class) {
                        let alias = builder.add_local(name, Type::Class(field_class), true);
                        builder.emit(ir::Instr::FieldPtr {
                            dst: alias,
                            base: this_local,
                            field: index,
                        });
                        builder.emit(ir::Instr::Call {
                            dst: None,
                            function: ctor,
                            args: vec![ir::Operand::Local(alias)],
                            virtual_slot: None,
                        });
                    }
                }
            }
        }
        GeneratedKind::CopyConstructor => {
            let src_local = builder.add_param("src", Type::Class(class), true);
            for (index, name, ty, _) in fields {
                let src_alias = builder.add_local(format!("src.{name}"), ty.clone(), true);
                builder.emit(ir::Instr::FieldPtr {
                    dst: src_alias,
                    base: src_local,
                    field: index,
                });
                let dst_alias = builder.add_local(name, ty, true);
                builder.emit(ir::Instr::FieldPtr {
                    dst: dst_alias,
                    base: this_local,
                    field: index,
                });
                builder.emit(ir::Instr::Store {
                    dst: dst_alias,
                    value: ir::Operand::Local(src_alias),
                });
            }
        }
        GeneratedKind::Destructor => {
            for (index, name, ty, is_reference) in fields.into_iter().rev() {
                if is_reference || !session.type_needs_destructor(&ty) {
                    continue;
                }
                let alias = builder.add_local(name, ty, true);
                builder.emit(ir::Instr::FieldPtr {
                    dst: alias,
                    base: this_local,
                    field: index,
                });
                builder.emit(ir::Instr::CallDestructor { local: alias });
            }
            emit_base_destructor_call(session, class, &mut builder, this_local);
        }
    }
    builder.finish()
}

fn default_constructor(session: &Session<'_>, class: ClassId) -> Option<String> {
    let target = &session.classes[class.index()];
    for &ctor in &target.constructors {
        let function = &session.functions[ctor.index()];
        if function.ty.params.len() == 1 {
            return Some(
                function
                    .mangled_name
                    .clone()
                    .unwrap_or_else(|| function.name.clone()),
            );
        }
    }
    None
}

fn emit_base_destructor_call(
    session: &Session<'_>,
    class: ClassId,
    builder: &mut ir::FunctionBuilder,
    this_local: ir::LocalId,
) {
    let Some(base) = session.classes[class.index()].base else {
        return;
    };
    let Some(destructor) = session.classes[base.index()].destructor else {
        return;
    };
    let function = &session.functions[destructor.index()];
    builder.emit(ir::Instr::Call {
        dst: None,
        function: function
            .mangled_name
            .clone()
            .unwrap_or_else(|| function.name.clone()),
        args: vec![ir::Operand::Local(this_local)],
        virtual_slot: None,
    });
}

fn field_initializer<'src>(
    decl: Option<&'src ast::ClassDecl<'src>>,
    name: &str,
) -> Option<&'src ast::Initializer<'src>> {
    decl?.members.iter().find_map(|member| match member {
        ast::ClassMember::Field(field) if field.name == name => field.initializer.as_ref(),
        _ => None,
    })
}

// ----------------------------------------------------------------------
// Body lowering
// ----------------------------------------------------------------------

#[derive(Debug, Clone)]
struct LocalVar {
    name: String,
    ty: Type,
    value_type: ValueType,
    local: ir::LocalId,
    node: NodeId,
    is_mutable: bool,
    constexpr_value: Option<ConstValue>,
}

#[derive(Debug, Default)]
struct Frame {
    locals: Vec<LocalVar>,
}

#[derive(Debug, Clone, Copy)]
struct LoopFrame {
    break_block: ir::BlockId,
    continue_block: ir::BlockId,
    frame_depth: usize,
}

/// One lowered expression: its type, the operand holding it, and the
/// reference-graph node when the value is an lvalue.
#[derive(Debug, Clone)]
struct ExprValue {
    ty: Type,
    operand: ir::Operand,
    node: Option<NodeId>,
    is_mutable: bool,
}

struct Lowerer<'a, 'src> {
    session: &'a mut Session<'src>,
    builder: ir::FunctionBuilder,
    graph: ReferencesGraph,
    frames: Vec<Frame>,
    loops: Vec<LoopFrame>,
    /// Temporary reference nodes created while lowering the current
    /// statement, discarded when it ends.
    stmt_temps: Vec<NodeId>,
    scope: ScopeId,
    owner_class: Option<ClassId>,
    fn_type: Rc<FunctionType>,
    ret: Type,
    ret_value: ValueType,
    is_generator: bool,
    is_this_call: bool,
    unsafe_depth: u32,
    allowed_return_nodes: Vec<NodeId>,
    global_slots: HashMap<VariableId, ir::LocalId>,
}

impl<'a, 'src> Lowerer<'a, 'src> {
    fn new(session: &'a mut Session<'src>, id: FunctionId) -> Self {
        let (name, fn_type, scope, owner_class, is_generator, is_this_call, span) = {
            let function = &session.functions[id.index()];
            (
                function
                    .mangled_name
                    .clone()
                    .unwrap_or_else(|| function.name.clone()),
                function.ty.clone(),
                function.parent_scope,
                function.owner_class,
                function.is_generator,
                function.is_this_call,
                function.span,
            )
        };
        let ret = fn_type.ret.clone();
        let ret_value = fn_type.ret_value;
        let mut builder = ir::FunctionBuilder::new(name, ret.clone());
        builder.set_calling_convention(fn_type.calling_convention);
        if session.options.debug_info {
            builder.set_source_span(span);
        }
        builder.set_sret(
            ret_value == ValueType::Value
                && matches!(ret, Type::Class(_) | Type::Array(_) | Type::Tuple(_)),
        );
        Self {
            session,
            builder,
            graph: ReferencesGraph::default(),
            frames: Vec::new(),
            loops: Vec::new(),
            stmt_temps: Vec::new(),
            scope,
            owner_class,
            fn_type,
            ret,
            ret_value,
            is_generator,
            is_this_call,
            unsafe_depth: 0,
            allowed_return_nodes: Vec::new(),
            global_slots: HashMap::new(),
        }
    }

    fn lower_regular(
        mut self,
        decl: &'src ast::FnDecl<'src>,
        initializers: Option<&'src [(&'src str, ast::Initializer<'src>)]>,
        block: &'src ast::Block<'src>,
    ) -> Option<ir::Function> {
        let fn_type = self.fn_type.clone();
        self.frames.push(Frame::default());
        let mut param_index = 0usize;
        if self.is_this_call {
            if let Some(param) = fn_type.params.first() {
                self.declare_param("this", &param.ty, param.value_type, decl.span);
            }
            param_index = 1;
        }
        for (ast_param, param) in decl.params.iter().zip(fn_type.params[param_index..].iter()) {
            self.declare_param(ast_param.name, &param.ty, param.value_type, ast_param.span);
        }
        for reference in fn_type.return_references.iter() {
            if let Some(var) = self.frames[0].locals.get(reference.param as usize) {
                self.allowed_return_nodes.push(var.node);
            }
        }

        if self.is_generator {
            self.copy_generator_args();
            self.builder.emit(ir::Instr::Suspend {
                point: ir::SuspendPoint::Initial,
            });
        }

        let is_constructor = matches!(decl.name, ast::FnName::Constructor);
        let is_destructor = matches!(decl.name, ast::FnName::Destructor);
        if initializers.is_some() && !is_constructor {
            self.report(Error::InitializationListInNonConstructor(decl.span));
        }
        if is_constructor {
            self.lower_constructor_initializers(initializers.unwrap_or(&[]), decl.span);
        }

        self.lower_block(block);

        if is_destructor && !self.builder.is_terminated() {
            if let (Some(class), Some(this)) = (self.owner_class, self.find_local("this")) {
                self.emit_member_destruction(class, this.local);
            }
        }
        if !self.builder.is_terminated() {
            if self.ret.is_void() || self.ret.is_invalid() || self.is_generator {
                self.emit_destructors_from(0);
                if self.is_generator {
                    self.builder.emit(ir::Instr::Suspend {
                        point: ir::SuspendPoint::Final,
                    });
                    self.builder.terminate(ir::Terminator::Ret(None));
                }
            } else {
                self.report(Error::NoReturnInFunctionReturningNonVoid(decl.span));
            }
        }
        self.pop_frame(decl.span);
        Some(self.builder.finish())
    }

    /// By-value arguments must survive the first suspension, so each
    /// one is copied into a coroutine-frame slot before the initial
    /// suspend and the variable repointed at the copy.
    fn copy_generator_args(&mut self) {
        let count = self.frames[0].locals.len();
        for index in 0..count {
            let (name, ty, value_type, param) = {
                let var = &self.frames[0].locals[index];
                (var.name.clone(), var.ty.clone(), var.value_type, var.local)
            };
            if value_type != ValueType::Value {
                continue;
            }
            let copy = self.builder.add_local(name, ty, false);
            self.builder.emit(ir::Instr::Store {
                dst: copy,
                value: ir::Operand::Local(param),
            });
            self.frames[0].locals[index].local = copy;
        }
    }

    fn declare_param(&mut self, name: &str, ty: &Type, value_type: ValueType, span: Span) {
        let local = self
            .builder
            .add_param(name, ty.clone(), value_type.is_reference());
        let kind = match value_type {
            ValueType::Value => NodeKind::Variable,
            ValueType::ReferenceMut => NodeKind::ReferenceMut,
            ValueType::ReferenceImut => NodeKind::ReferenceImut,
        };
        let node = self.graph.add_node(name, kind, span);
        self.frames[0].locals.push(LocalVar {
            name: name.to_owned(),
            ty: ty.clone(),
            value_type,
            local,
            node,
            is_mutable: value_type.is_mutable_reference(),
            constexpr_value: None,
        });
    }

    fn report(&mut self, error: Error) {
        self.session.report(error);
    }

    fn error_value(&self) -> ExprValue {
        ExprValue {
            ty: Type::INVALID,
            operand: ir::Operand::Const(ConstValue::Bool(false)),
            node: None,
            is_mutable: false,
        }
    }

    fn find_local(&self, name: &str) -> Option<LocalVar> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.locals.iter().rev().find(|var| var.name == name))
            .cloned()
    }

    fn current_frame(&mut self) -> &mut Frame {
        if self.frames.is_empty() {
            self.frames.push(Frame::default());
        }
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    // ------------------------------------------------------------------
    // Scopes and destructors
    // ------------------------------------------------------------------

    fn lower_block(&mut self, block: &'src ast::Block<'src>) {
        if block.is_unsafe {
            self.unsafe_depth += 1;
        }
        self.frames.push(Frame::default());
        for stmt in block.stmts.iter() {
            if self.builder.is_terminated() {
                // One report per block; the rest of it is skipped.
                self.report(Error::UnreachableCode(stmt.span()));
                break;
            }
            self.lower_stmt(stmt);
        }
        self.pop_frame(block.span);
        if block.is_unsafe {
            self.unsafe_depth -= 1;
        }
    }

    /// Destroys the innermost frame's locals in reverse declaration
    /// order and retires their graph nodes.
    fn pop_frame(&mut self, span: Span) {
        let Some(frame) = self.frames.pop() else {
            return;
        };
        for var in frame.locals.iter().rev() {
            self.emit_destructor(var);
        }
        for var in frame.locals.iter().rev() {
            if self.graph.contains(var.node) {
                if let Err(error) = self.graph.remove_node(var.node, span) {
                    self.report(error);
                }
            }
        }
    }

    fn emit_destructor(&mut self, var: &LocalVar) {
        if var.value_type != ValueType::Value {
            return;
        }
        let moved = self.graph.contains(var.node) && self.graph.is_moved(var.node);
        if !moved && self.session.type_needs_destructor(&var.ty) {
            self.builder.emit(ir::Instr::CallDestructor { local: var.local });
        }
        // The slot dies here whether or not its value was moved out.
        if self.session.options.lifetime_markers {
            self.builder.emit(ir::Instr::LifetimeEnd { local: var.local });
        }
    }

    /// Emits destructor calls for every local in frames at `depth` and
    /// deeper, innermost first, without retiring graph nodes. Used for
    /// early exits; the frames stay live for the fall-through path.
    fn emit_destructors_from(&mut self, depth: usize) {
        let frames = std::mem::take(&mut self.frames);
        for frame in frames[depth.min(frames.len())..].iter().rev() {
            for var in frame.locals.iter().rev() {
                self.emit_destructor(var);
            }
        }
        self.frames = frames;
    }

    fn emit_member_destruction(&mut self, class: ClassId, this_local: ir::LocalId) {
        let fields: Vec<(u32, String, Type)> = self.session.classes[class.index()]
            .fields
            .iter()
            .enumerate()
            .filter(|(_, field)| !field.is_reference)
            .map(|(index, field)| (index as u32, field.name.clone(), field.ty.clone()))
            .collect();
        for (index, name, ty) in fields.into_iter().rev() {
            if !self.session.type_needs_destructor(&ty) {
                continue;
            }
            let alias = self.builder.add_local(name, ty, true);
            self.builder.emit(ir::Instr::FieldPtr {
                dst: alias,
                base: this_local,
                field: index,
            });
            self.builder.emit(ir::Instr::CallDestructor { local: alias });
        }
        emit_base_destructor_call(self.session, class, &mut self.builder, this_local);
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn lower_stmt(&mut self, stmt: &'src ast::Stmt<'src>) {
        let temp_mark = self.stmt_temps.len();
        match stmt {
            ast::Stmt::Expr(expr) => {
                self.lower_expr(expr);
            }
            ast::Stmt::Variables(decl) => {
                let ty = self.session.resolve_type_name(self.scope, &decl.ty);
                for entry in decl.vars.iter() {
                    self.declare_var(&ty, entry);
                }
            }
            ast::Stmt::Auto {
                name,
                mutability,
                is_reference,
                init,
                span,
            } => self.lower_auto(name, *mutability, *is_reference, init, *span),
            ast::Stmt::Assign {
                target,
                op,
                value,
                span,
            } => self.lower_assign(target, *op, value, *span),
            ast::Stmt::Return(value, span) => self.lower_return(value.as_ref(), *span),
            ast::Stmt::If(stmt) => self.lower_if(stmt),
            ast::Stmt::While { cond, body, span } => self.lower_while(cond, body, *span),
            ast::Stmt::Break(span) => {
                let Some(target) = self.loops.last().copied() else {
                    self.report(Error::BreakOutsideLoop(*span));
                    return;
                };
                self.emit_destructors_from(target.frame_depth);
                self.builder.terminate(ir::Terminator::Br(target.break_block));
            }
            ast::Stmt::Continue(span) => {
                let Some(target) = self.loops.last().copied() else {
                    self.report(Error::ContinueOutsideLoop(*span));
                    return;
                };
                self.emit_destructors_from(target.frame_depth);
                self.builder
                    .terminate(ir::Terminator::Br(target.continue_block));
            }
            ast::Stmt::Block(block) => self.lower_block(block),
            ast::Stmt::StaticAssert(assert) => {
                self.session.eval_static_assert(self.scope, assert);
            }
            ast::Stmt::Halt(_) => self.builder.terminate(ir::Terminator::Unreachable),
            ast::Stmt::Yield(value, span) => {
                if !self.is_generator {
                    self.report(Error::YieldOutsideCoroutine(*span));
                }
                let operand = value.as_ref().map(|expr| self.lower_expr(expr).operand);
                self.builder.emit(ir::Instr::Yield { value: operand });
            }
        }
        let span = stmt.span();
        for node in self.stmt_temps.split_off(temp_mark) {
            if self.graph.contains(node) {
                if let Err(error) = self.graph.remove_node(node, span) {
                    self.report(error);
                }
            }
        }
    }

    fn declare_var(&mut self, ty: &Type, entry: &'src ast::VarEntry<'src>) {
        if entry.is_reference {
            match &entry.initializer {
                Some(ast::Initializer::Expression(expr)) => {
                    let value = self.lower_expr(expr);
                    self.bind_reference(
                        entry.name,
                        ty,
                        matches!(entry.mutability, ast::Mutability::Mut),
                        value,
                        entry.span,
                    );
                }
                Some(other) => {
                    self.report(Error::UnsupportedInitializerForReference(other.span()));
                    self.declare_error_local(entry.name, ty, entry.span);
                }
                None => {
                    self.report(Error::ExpectedInitializer(
                        entry.name.to_owned(),
                        entry.span,
                    ));
                    self.declare_error_local(entry.name, ty, entry.span);
                }
            }
            return;
        }

        if let Type::Class(class) = ty {
            self.session.ensure_class_complete(*class, entry.span);
            if !self.session.classes[class.index()].is_complete() {
                let name = self.session.type_name(ty);
                self.report(Error::UsingIncompleteType(name, entry.span));
            }
        }

        let mutable = matches!(entry.mutability, ast::Mutability::Mut);
        let local = self.builder.add_local(entry.name, ty.clone(), false);
        if self.session.options.lifetime_markers {
            self.builder.emit(ir::Instr::LifetimeStart { local });
        }
        let node = self.graph.add_node(entry.name, NodeKind::Variable, entry.span);
        let mut constexpr_value = None;
        match &entry.initializer {
            Some(init) => {
                self.lower_initializer(local, ty, Some(node), init);
                if matches!(entry.mutability, ast::Mutability::Constexpr) {
                    constexpr_value = self.eval_constexpr_initializer(ty, init, entry.span);
                }
            }
            None => {
                if !self.init_default(local, ty) {
                    self.report(Error::ExpectedInitializer(
                        entry.name.to_owned(),
                        entry.span,
                    ));
                }
            }
        }
        self.current_frame().locals.push(LocalVar {
            name: entry.name.to_owned(),
            ty: ty.clone(),
            value_type: ValueType::Value,
            local,
            node,
            is_mutable: mutable,
            constexpr_value,
        });
    }

    fn eval_constexpr_initializer(
        &mut self,
        ty: &Type,
        init: &'src ast::Initializer<'src>,
        span: Span,
    ) -> Option<ConstValue> {
        let ast::Initializer::Expression(expr) = init else {
            self.report(Error::VariableInitializerIsNotConstantExpression(span));
            return None;
        };
        match self.session.eval_const(self.scope, expr) {
            Ok(value) if value.ty.matches(ty) => Some(value.value),
            Ok(value) => {
                let expected = self.session.type_name(ty);
                let got = self.session.type_name(&value.ty);
                self.report(Error::TypesMismatch {
                    expected,
                    got,
                    span,
                });
                None
            }
            Err(_) => {
                self.report(Error::VariableInitializerIsNotConstantExpression(span));
                None
            }
        }
    }

    /// Default-constructs the local when its type allows it.
    fn init_default(&mut self, local: ir::LocalId, ty: &Type) -> bool {
        if let Type::Class(class) = ty {
            if self.session.classes[class.index()].flags.default_constructible() {
                if let Some(ctor) = default_constructor(self.session, *class) {
                    self.builder.emit(ir::Instr::Call {
                        dst: None,
                        function: ctor,
                        args: vec![ir::Operand::Local(local)],
                        virtual_slot: None,
                    });
                    return true;
                }
            }
        }
        false
    }

    fn declare_error_local(&mut self, name: &str, ty: &Type, span: Span) {
        let local = self.builder.add_local(name, ty.clone(), false);
        let node = self.graph.add_node(name, NodeKind::Variable, span);
        self.current_frame().locals.push(LocalVar {
            name: name.to_owned(),
            ty: Type::INVALID,
            value_type: ValueType::Value,
            local,
            node,
            is_mutable: true,
            constexpr_value: None,
        });
    }

    fn lower_auto(
        &mut self,
        name: &'src str,
        mutability: ast::Mutability,
        is_reference: bool,
        init: &'src ast::Spanned<ast::Expr<'src>>,
        span: Span,
    ) {
        let value = self.lower_expr(init);
        if is_reference {
            let ty = value.ty.clone();
            self.bind_reference(
                name,
                &ty,
                matches!(mutability, ast::Mutability::Mut),
                value,
                span,
            );
            return;
        }
        let ty = value.ty.clone();
        self.check_copy(&ty, &value, span);
        let local = self.builder.add_local(name, ty.clone(), false);
        if self.session.options.lifetime_markers {
            self.builder.emit(ir::Instr::LifetimeStart { local });
        }
        self.builder.emit(ir::Instr::Store {
            dst: local,
            value: value.operand.clone(),
        });
        let node = self.graph.add_node(name, NodeKind::Variable, span);
        let constexpr_value = if matches!(mutability, ast::Mutability::Constexpr) {
            match &value.operand {
                ir::Operand::Const(constant) => Some(constant.clone()),
                _ => {
                    self.report(Error::VariableInitializerIsNotConstantExpression(span));
                    None
                }
            }
        } else {
            None
        };
        self.current_frame().locals.push(LocalVar {
            name: name.to_owned(),
            ty,
            value_type: ValueType::Value,
            local,
            node,
            is_mutable: matches!(mutability, ast::Mutability::Mut),
            constexpr_value,
        });
    }

    fn bind_reference(
        &mut self,
        name: &str,
        ty: &Type,
        mutable: bool,
        value: ExprValue,
        span: Span,
    ) {
        self.check_type(ty, &value.ty, span);
        let local = self.builder.add_local(name, ty.clone(), true);
        self.builder.emit(ir::Instr::Store {
            dst: local,
            value: value.operand.clone(),
        });
        let kind = if mutable {
            NodeKind::ReferenceMut
        } else {
            NodeKind::ReferenceImut
        };
        let node = self.graph.add_node(name, kind, span);
        match value.node {
            None => self.report(Error::ExpectedReferenceValue(span)),
            Some(value_node) => {
                if mutable && !value.is_mutable {
                    self.report(Error::BindingConstReferenceToNonconstReference(span));
                }
                for terminal in self.terminals(value_node) {
                    if let Err(error) = self.graph.try_add_link(terminal, node) {
                        self.report(error);
                    }
                }
            }
        }
        self.current_frame().locals.push(LocalVar {
            name: name.to_owned(),
            ty: ty.clone(),
            value_type: if mutable {
                ValueType::ReferenceMut
            } else {
                ValueType::ReferenceImut
            },
            local,
            node,
            is_mutable: mutable,
            constexpr_value: None,
        });
    }

    fn lower_assign(
        &mut self,
        target: &'src ast::Spanned<ast::Expr<'src>>,
        op: Option<ast::BinOp>,
        value: &'src ast::Spanned<ast::Expr<'src>>,
        span: Span,
    ) {
        let target_value = self.lower_expr(target);
        let value_value = self.lower_expr(value);
        if target_value.ty.is_invalid() || value_value.ty.is_invalid() {
            return;
        }
        let ir::Operand::Local(dst) = target_value.operand else {
            let name = self.session.type_name(&target_value.ty);
            self.report(Error::ExpectedVariable(name, span));
            return;
        };
        if !target_value.is_mutable {
            let name = self.session.type_name(&target_value.ty);
            self.report(Error::ExpectedVariable(name, span));
            return;
        }
        if !self.check_type(&target_value.ty, &value_value.ty, span) {
            return;
        }
        match op {
            None => {
                self.check_copy(&target_value.ty, &value_value, span);
                self.builder.emit(ir::Instr::Store {
                    dst,
                    value: value_value.operand,
                });
            }
            Some(op) => {
                if binary_result_type(op, &target_value.ty).is_none() {
                    let lhs = self.session.type_name(&target_value.ty);
                    let rhs = self.session.type_name(&value_value.ty);
                    self.report(Error::NoMatchBinaryOperatorForGivenTypes {
                        lhs,
                        rhs,
                        op: op.as_str(),
                        span,
                    });
                    return;
                }
                let tmp = self.builder.add_local("", target_value.ty.clone(), false);
                self.builder.emit(ir::Instr::BinOp {
                    dst: tmp,
                    op,
                    lhs: ir::Operand::Local(dst),
                    rhs: value_value.operand,
                });
                self.builder.emit(ir::Instr::Store {
                    dst,
                    value: ir::Operand::Local(tmp),
                });
            }
        }
    }

    fn lower_return(
        &mut self,
        value: Option<&'src ast::Spanned<ast::Expr<'src>>>,
        span: Span,
    ) {
        let operand = match value {
            None => {
                // A generator's bare `return` finishes the coroutine.
                if !self.ret.is_void() && !self.ret.is_invalid() && !self.is_generator {
                    let expected = self.session.type_name(&self.ret);
                    self.report(Error::TypesMismatch {
                        expected,
                        got: "void".into(),
                        span,
                    });
                }
                None
            }
            Some(expr) => {
                let value = self.lower_expr(expr);
                let ret = self.ret.clone();
                self.check_type(&ret, &value.ty, span);
                if self.ret_value.is_reference() {
                    match value.node {
                        None => self.report(Error::ReturningUnallowedReference(span)),
                        Some(node) => {
                            let terminals = self.terminals(node);
                            if !terminals
                                .iter()
                                .all(|t| self.allowed_return_nodes.contains(t))
                            {
                                self.report(Error::ReturningUnallowedReference(span));
                            }
                            if self.ret_value.is_mutable_reference() && !value.is_mutable {
                                self.report(Error::BindingConstReferenceToNonconstReference(span));
                            }
                        }
                    }
                }
                Some(value.operand)
            }
        };
        self.emit_destructors_from(0);
        if self.is_generator {
            self.builder.emit(ir::Instr::Suspend {
                point: ir::SuspendPoint::Final,
            });
        }
        self.builder.terminate(ir::Terminator::Ret(operand));
    }

    fn lower_if(&mut self, stmt: &'src ast::IfStmt<'src>) {
        let base = self.graph.clone();
        let mut branch_graphs: Vec<ReferencesGraph> = Vec::new();
        // Branch exits stay open until every branch block exists, so
        // the continuation block is created after all of them and block
        // order follows emission order.
        let mut pending_exits: Vec<ir::BlockId> = Vec::new();

        for branch in stmt.branches.iter() {
            let cond = self.lower_expr(&branch.cond);
            self.expect_bool(&cond, branch.cond.1);
            let then_block = self.builder.new_block();
            let next = self.builder.new_block();
            self.builder.terminate(ir::Terminator::CondBr {
                cond: cond.operand,
                then_block,
                else_block: next,
            });
            self.builder.switch_to(then_block);
            self.graph = base.clone();
            self.lower_block(&branch.block);
            if !self.builder.is_terminated() {
                pending_exits.push(self.builder.current_block());
                branch_graphs.push(self.graph.clone());
            }
            self.builder.switch_to(next);
            self.graph = base.clone();
        }
        match &stmt.else_block {
            Some(block) => {
                self.lower_block(block);
                if !self.builder.is_terminated() {
                    pending_exits.push(self.builder.current_block());
                    branch_graphs.push(self.graph.clone());
                }
            }
            None => {
                pending_exits.push(self.builder.current_block());
                branch_graphs.push(base.clone());
            }
        }

        let end = self.builder.new_block();
        for block in pending_exits {
            self.builder.switch_to(block);
            self.builder.terminate(ir::Terminator::Br(end));
        }

        if branch_graphs.is_empty() {
            // Every path terminated; the merge state is irrelevant.
            self.graph = base;
        } else {
            let (merged, errors) = base.merge_branches(&branch_graphs, stmt.span);
            self.graph = merged;
            for error in errors {
                self.report(error);
            }
        }
        self.builder.switch_to(end);
    }

    fn lower_while(
        &mut self,
        cond: &'src ast::Spanned<ast::Expr<'src>>,
        body: &'src ast::Block<'src>,
        span: Span,
    ) {
        let cond_block = self.builder.new_block();
        self.builder.terminate(ir::Terminator::Br(cond_block));
        self.builder.switch_to(cond_block);
        let cond_value = self.lower_expr(cond);
        self.expect_bool(&cond_value, cond.1);
        let body_block = self.builder.new_block();
        let end = self.builder.new_block();
        self.builder.terminate(ir::Terminator::CondBr {
            cond: cond_value.operand,
            then_block: body_block,
            else_block: end,
        });

        self.builder.switch_to(body_block);
        let entry = self.graph.clone();
        self.loops.push(LoopFrame {
            break_block: end,
            continue_block: cond_block,
            frame_depth: self.frames.len(),
        });
        self.lower_block(body);
        self.loops.pop();
        if !self.builder.is_terminated() {
            self.builder.terminate(ir::Terminator::Br(cond_block));
        }
        for error in entry.check_loop_body(&self.graph, span) {
            self.report(error);
        }
        self.graph = entry;
        self.builder.switch_to(end);
    }

    // ------------------------------------------------------------------
    // Initializers
    // ------------------------------------------------------------------

    fn lower_initializer(
        &mut self,
        local: ir::LocalId,
        ty: &Type,
        node: Option<NodeId>,
        init: &'src ast::Initializer<'src>,
    ) {
        match init {
            ast::Initializer::Expression(expr) => {
                let value = self.lower_expr(expr);
                self.check_type(ty, &value.ty, expr.1);
                self.check_copy(ty, &value, expr.1);
                self.builder.emit(ir::Instr::Store {
                    dst: local,
                    value: value.operand,
                });
            }
            ast::Initializer::Constructor(args, span) => {
                self.lower_constructor_initializer(local, ty, node, args, *span);
            }
            ast::Initializer::Sequence(items, span) => match ty {
                Type::Array(array) => {
                    if items.len() as u64 != array.size {
                        self.report(Error::ArrayInitializersCountMismatch {
                            expected: array.size as usize,
                            got: items.len(),
                            span: *span,
                        });
                        return;
                    }
                    for (index, item) in items.iter().enumerate() {
                        let alias = self.builder.add_local("", array.elem.clone(), true);
                        self.builder.emit(ir::Instr::IndexPtr {
                            dst: alias,
                            base: local,
                            index: ir::Operand::Const(ConstValue::UInt(index as u128)),
                        });
                        let elem = array.elem.clone();
                        self.lower_initializer(alias, &elem, node, item);
                    }
                }
                Type::Tuple(elems) => {
                    if items.len() != elems.len() {
                        self.report(Error::TupleInitializersCountMismatch {
                            expected: elems.len(),
                            got: items.len(),
                            span: *span,
                        });
                        return;
                    }
                    for (index, (item, elem)) in items.iter().zip(elems.iter()).enumerate() {
                        let alias = self.builder.add_local("", elem.clone(), true);
                        self.builder.emit(ir::Instr::FieldPtr {
                            dst: alias,
                            base: local,
                            field: index as u32,
                        });
                        let elem = elem.clone();
                        self.lower_initializer(alias, &elem, node, item);
                    }
                }
                _ => self.report(Error::ArrayInitializerForNonArray(*span)),
            },
            ast::Initializer::Struct(entries, span) => {
                self.lower_struct_initializer(local, ty, node, entries, *span);
            }
            ast::Initializer::Zero(span) => match classes::zero_value(ty) {
                Some(zero) => self.builder.emit(ir::Instr::Store {
                    dst: local,
                    value: ir::Operand::Const(zero),
                }),
                None => {
                    if matches!(ty, Type::Class(_)) {
                        self.report(Error::ZeroInitializerForClass(*span));
                    } else if !ty.is_invalid() {
                        let name = self.session.type_name(ty);
                        self.report(Error::OperationNotSupportedForThisType(name, *span));
                    }
                }
            },
            ast::Initializer::Uninitialized(span) => {
                if self.unsafe_depth == 0 {
                    self.report(Error::UninitializedInitializerOutsideUnsafeBlock(*span));
                }
            }
        }
    }

    fn lower_constructor_initializer(
        &mut self,
        local: ir::LocalId,
        ty: &Type,
        node: Option<NodeId>,
        args: &'src [ast::Spanned<ast::Expr<'src>>],
        span: Span,
    ) {
        match ty {
            Type::Class(class) => {
                let class = *class;
                self.session.ensure_class_complete(class, span);
                let (is_abstract, constructors, class_name) = {
                    let target = &self.session.classes[class.index()];
                    (
                        target.kind.is_abstract(),
                        target.constructors.clone(),
                        target.name.clone(),
                    )
                };
                if is_abstract {
                    self.report(Error::ConstructingAbstractClassOrInterface(class_name, span));
                    return;
                }
                if constructors.is_empty() {
                    self.report(Error::ClassHasNoConstructors(span));
                    return;
                }
                let this_value = ExprValue {
                    ty: Type::Class(class),
                    operand: ir::Operand::Local(local),
                    node,
                    is_mutable: true,
                };
                let mut all = vec![this_value];
                for arg in args {
                    all.push(self.lower_expr(arg));
                }
                if let Some(ctor) = self.select_overloaded(&constructors, &[], &all, span) {
                    self.emit_call(ctor, all, false, span);
                }
            }
            Type::Fundamental(_) | Type::Enum(_) => {
                if args.len() != 1 {
                    self.report(Error::FundamentalTypesHaveConstructorsWithExactlyOneParameter(
                        span,
                    ));
                    return;
                }
                let value = self.lower_expr(&args[0]);
                let compatible = match (ty.as_fundamental(), value.ty.as_fundamental()) {
                    // Explicit numeric conversions go through constructor
                    // notation.
                    (Some(to), Some(from)) => to.is_numeric() && from.is_numeric(),
                    _ => ty.matches(&value.ty),
                };
                if !compatible && !self.check_type(ty, &value.ty, span) {
                    return;
                }
                self.builder.emit(ir::Instr::Store {
                    dst: local,
                    value: value.operand,
                });
            }
            ty if ty.is_invalid() => {}
            _ => self.report(Error::ConstructorInitializerForUnsupportedType(span)),
        }
    }

    fn lower_struct_initializer(
        &mut self,
        local: ir::LocalId,
        ty: &Type,
        node: Option<NodeId>,
        entries: &'src [(&'src str, ast::Initializer<'src>)],
        span: Span,
    ) {
        let Type::Class(class) = ty else {
            if !ty.is_invalid() {
                self.report(Error::StructInitializerForNonStruct(span));
            }
            return;
        };
        let class = *class;
        self.session.ensure_class_complete(class, span);
        if self.session.classes[class.index()].kind != crate::classes::ClassKind::Struct {
            self.report(Error::StructInitializerForNonStruct(span));
            return;
        }
        if self.session.classes[class.index()]
            .flags
            .has_explicit_noncopy_constructors()
        {
            self.report(Error::InitializerDisabledBecauseClassHasExplicitNoncopyConstructors(
                span,
            ));
            return;
        }

        let mut covered: Vec<&str> = Vec::new();
        for (name, init) in entries {
            if covered.contains(name) {
                self.report(Error::DuplicatedStructMemberInitializer(
                    (*name).to_owned(),
                    span,
                ));
                continue;
            }
            covered.push(*name);
            let found = self.session.classes[class.index()]
                .field_by_name(name)
                .map(|(index, field)| (index, field.ty.clone(), field.is_reference));
            let Some((index, field_ty, is_reference)) = found else {
                self.report(Error::InitializerForNonfieldStructMember(
                    (*name).to_owned(),
                    span,
                ));
                continue;
            };
            if is_reference {
                if !matches!(init, ast::Initializer::Expression(_)) {
                    self.report(Error::UnsupportedInitializerForReference(init.span()));
                    continue;
                }
            }
            let alias = self.builder.add_local(*name, field_ty.clone(), true);
            self.builder.emit(ir::Instr::FieldPtr {
                dst: alias,
                base: local,
                field: index,
            });
            self.lower_initializer(alias, &field_ty, node, init);
        }

        // Fields without an explicit entry fall back to their own
        // initializer or to default construction.
        let remaining: Vec<(u32, String, Type)> = self.session.classes[class.index()]
            .fields
            .iter()
            .enumerate()
            .filter(|(_, field)| !covered.contains(&field.name.as_str()) && !field.is_reference)
            .map(|(index, field)| (index as u32, field.name.clone(), field.ty.clone()))
            .collect();
        let decl = self.session.classes[class.index()].decl;
        for (index, name, field_ty) in remaining {
            let alias = self.builder.add_local(name.clone(), field_ty.clone(), true);
            self.builder.emit(ir::Instr::FieldPtr {
                dst: alias,
                base: local,
                field: index,
            });
            if let Some(init) = field_initializer(decl, &name) {
                self.lower_initializer(alias, &field_ty, node, init);
            } else if !self.init_default(alias, &field_ty) {
                self.report(Error::ExpectedInitializer(name, span));
            }
        }
    }

    fn lower_constructor_initializers(
        &mut self,
        entries: &'src [(&'src str, ast::Initializer<'src>)],
        span: Span,
    ) {
        let Some(class) = self.owner_class else {
            return;
        };
        let Some(this) = self.find_local("this") else {
            return;
        };
        let mut covered: Vec<&str> = Vec::new();
        for (name, init) in entries {
            if covered.contains(name) {
                self.report(Error::DuplicatedStructMemberInitializer(
                    (*name).to_owned(),
                    init.span(),
                ));
                continue;
            }
            covered.push(*name);
            let found = self.session.classes[class.index()]
                .field_by_name(name)
                .map(|(index, field)| (index, field.ty.clone()));
            let Some((index, field_ty)) = found else {
                self.report(Error::InitializerForNonfieldStructMember(
                    (*name).to_owned(),
                    init.span(),
                ));
                continue;
            };
            let alias = self.builder.add_local(*name, field_ty.clone(), true);
            self.builder.emit(ir::Instr::FieldPtr {
                dst: alias,
                base: this.local,
                field: index,
            });
            self.lower_initializer(alias, &field_ty, Some(this.node), init);
        }

        let decl = self.session.classes[class.index()].decl;
        let remaining: Vec<(u32, String, Type)> = self.session.classes[class.index()]
            .fields
            .iter()
            .enumerate()
            .filter(|(_, field)| !covered.contains(&field.name.as_str()) && !field.is_reference)
            .map(|(index, field)| (index as u32, field.name.clone(), field.ty.clone()))
            .collect();
        for (index, name, field_ty) in remaining {
            if let Some(init) = field_initializer(decl, &name) {
                let alias = self.builder.add_local(name, field_ty.clone(), true);
                self.builder.emit(ir::Instr::FieldPtr {
                    dst: alias,
                    base: this.local,
                    field: index,
                });
                self.lower_initializer(alias, &field_ty, Some(this.node), init);
            } else if let Type::Class(field_class) = field_ty {
                if let Some(ctor) = default_constructor(self.session, field_class) {
                    let alias =
                        self.builder
                            .add_local(name, Type::Class(field_class), true);
                    self.builder.emit(ir::Instr::FieldPtr {
                        dst: alias,
                        base: this.local,
                        field: index,
                    });
                    self.builder.emit(ir::Instr::Call {
                        dst: None,
                        function: ctor,
                        args: vec![ir::Operand::Local(alias)],
                        virtual_slot: None,
                    });
                } else {
                    self.report(Error::FieldIsNotInitializedYet(name, span));
                }
            } else {
                self.report(Error::FieldIsNotInitializedYet(name, span));
            }
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn lower_expr(&mut self, expr: &'src ast::Spanned<ast::Expr<'src>>) -> ExprValue {
        let (expr, span) = expr;
        let span = *span;
        match expr {
            ast::Expr::Number(literal) => match cte::eval_number(literal, span) {
                Ok(value) => ExprValue {
                    ty: value.ty,
                    operand: ir::Operand::Const(value.value),
                    node: None,
                    is_mutable: false,
                },
                Err(error) => {
                    self.report(error);
                    self.error_value()
                }
            },
            ast::Expr::Bool(value) => ExprValue {
                ty: Type::BOOL,
                operand: ir::Operand::Const(ConstValue::Bool(*value)),
                node: None,
                is_mutable: false,
            },
            ast::Expr::Char(c, suffix) => {
                let fundamental = match *suffix {
                    "" | "char8" => Some(Fundamental::Char8),
                    "char16" => Some(Fundamental::Char16),
                    "char32" => Some(Fundamental::Char32),
                    _ => None,
                };
                match fundamental {
                    Some(fundamental) => ExprValue {
                        ty: Type::Fundamental(fundamental),
                        operand: ir::Operand::Const(ConstValue::Char(*c as u32)),
                        node: None,
                        is_mutable: false,
                    },
                    None => {
                        self.report(Error::UnknownNumericConstantType(
                            (*suffix).to_owned(),
                            span,
                        ));
                        self.error_value()
                    }
                }
            }
            ast::Expr::Path(path) => self.lower_path(path, span),
            ast::Expr::Member { base, name } => self.lower_member(base, name, span),
            ast::Expr::Call { callee, args } => self.lower_call(callee, args, span),
            ast::Expr::Index { base, index } => self.lower_index(base, index, span),
            ast::Expr::BinOp { lhs, op, rhs } => self.lower_binop(lhs, *op, rhs, span),
            ast::Expr::UnOp { op, expr } => self.lower_unop(*op, expr, span),
            ast::Expr::Move(name) => self.lower_move(name, span),
            ast::Expr::Unsafe(inner) => {
                self.unsafe_depth += 1;
                let value = self.lower_expr(inner);
                self.unsafe_depth -= 1;
                value
            }
        }
    }

    fn lower_path(&mut self, path: &'src ast::Path<'src>, span: Span) -> ExprValue {
        if let Some(name) = path.as_single_ident() {
            if name == "base" {
                return self.lower_base(span);
            }
            if let Some(var) = self.find_local(name) {
                return self.local_value(&var, span);
            }
            if name == "this" {
                self.report(Error::ThisUnavailable(span));
                return self.error_value();
            }
        }
        match self.session.resolve_path_value(self.scope, path, span) {
            Resolved::Variable(id) => self.global_value(id, span),
            Resolved::EnumMember(enum_id, ordinal) => ExprValue {
                ty: Type::Enum(enum_id),
                operand: ir::Operand::Const(ConstValue::EnumMember(ordinal)),
                node: None,
                is_mutable: false,
            },
            Resolved::Functions(set) => self.function_pointer_value(set, span),
            Resolved::Field(field) => self.implicit_field_access(field, span),
            Resolved::Type(_) => {
                self.report(Error::ExpectedVariable("type name".into(), span));
                self.error_value()
            }
            Resolved::Namespace(_) => {
                self.report(Error::ExpectedVariable("namespace".into(), span));
                self.error_value()
            }
            Resolved::Error => self.error_value(),
        }
    }

    fn local_value(&mut self, var: &LocalVar, span: Span) -> ExprValue {
        if self.graph.contains(var.node) && self.graph.is_moved(var.node) {
            self.report(Error::AccessingMovedVariable(var.name.clone(), span));
        }
        if let Some(constant) = &var.constexpr_value {
            return ExprValue {
                ty: var.ty.clone(),
                operand: ir::Operand::Const(constant.clone()),
                node: None,
                is_mutable: false,
            };
        }
        ExprValue {
            ty: var.ty.clone(),
            operand: ir::Operand::Local(var.local),
            node: Some(var.node),
            is_mutable: var.is_mutable,
        }
    }

    fn global_value(&mut self, id: VariableId, span: Span) -> ExprValue {
        let (ty, constant, is_mutable, name) = {
            let variable = &self.session.variables[id.index()];
            (
                variable.ty.clone(),
                variable.constexpr_value.clone(),
                variable
                    .decl
                    .is_some_and(|d| matches!(d.entry.mutability, ast::Mutability::Mut)),
                variable.name.clone(),
            )
        };
        if is_mutable {
            if self.unsafe_depth == 0 {
                self.report(Error::GlobalMutableVariableAccessOutsideUnsafeBlock(span));
            }
            let local = match self.global_slots.get(&id) {
                Some(&local) => local,
                None => {
                    let local = self.builder.add_local(name, ty.clone(), true);
                    self.global_slots.insert(id, local);
                    local
                }
            };
            return ExprValue {
                ty,
                operand: ir::Operand::Local(local),
                node: None,
                is_mutable: true,
            };
        }
        match constant {
            Some(constant) => ExprValue {
                ty,
                operand: ir::Operand::Const(constant),
                node: None,
                is_mutable: false,
            },
            None => self.error_value(),
        }
    }

    fn function_pointer_value(&mut self, set: FunctionSetId, span: Span) -> ExprValue {
        let functions = self.session.function_sets[set.index()].functions.clone();
        if functions.len() == 1 {
            let function = &self.session.functions[functions[0].index()];
            let ty = Type::FunctionPointer(function.ty.clone());
            let name = function
                .mangled_name
                .clone()
                .unwrap_or_else(|| function.name.clone());
            return ExprValue {
                ty,
                operand: ir::Operand::FunctionRef(name),
                node: None,
                is_mutable: false,
            };
        }
        self.report(Error::TooManySuitableOverloadedFunctions(String::new(), span));
        self.error_value()
    }

    fn implicit_field_access(
        &mut self,
        field: crate::values::FieldId,
        span: Span,
    ) -> ExprValue {
        let (name, ty, is_mutable) = {
            let target = &self.session.classes[field.class.index()].fields[field.index as usize];
            (target.name.clone(), target.ty.clone(), target.is_mutable)
        };
        let Some(this) = self.find_local("this") else {
            self.report(Error::ClassFieldAccessInStaticMethod(name, span));
            return self.error_value();
        };
        let alias = self.builder.add_local(name, ty.clone(), true);
        self.builder.emit(ir::Instr::FieldPtr {
            dst: alias,
            base: this.local,
            field: field.index,
        });
        ExprValue {
            ty,
            operand: ir::Operand::Local(alias),
            node: Some(this.node),
            is_mutable: this.is_mutable && is_mutable,
        }
    }

    fn lower_base(&mut self, span: Span) -> ExprValue {
        let Some(this) = self.find_local("this") else {
            self.report(Error::BaseUnavailable(span));
            return self.error_value();
        };
        let base = self
            .owner_class
            .and_then(|class| self.session.classes[class.index()].base);
        let Some(base) = base else {
            self.report(Error::BaseUnavailable(span));
            return self.error_value();
        };
        ExprValue {
            ty: Type::Class(base),
            operand: ir::Operand::Local(this.local),
            node: Some(this.node),
            is_mutable: this.is_mutable,
        }
    }

    fn lower_member(
        &mut self,
        base: &'src ast::Spanned<ast::Expr<'src>>,
        name: &'src str,
        span: Span,
    ) -> ExprValue {
        let base_value = self.lower_expr(base);
        if base_value.ty.is_invalid() {
            return self.error_value();
        }
        let Some(class) = base_value.ty.as_class() else {
            let type_name = self.session.type_name(&base_value.ty);
            self.report(Error::OperationNotSupportedForThisType(type_name, span));
            return self.error_value();
        };
        self.session.ensure_class_complete(class, span);
        let found = self.session.classes[class.index()]
            .field_by_name(name)
            .map(|(index, field)| {
                (
                    index,
                    field.ty.clone(),
                    field.is_mutable,
                    field.visibility,
                )
            });
        let Some((index, field_ty, is_mutable, visibility)) = found else {
            self.report(Error::NameNotFound(name.to_owned(), span));
            return self.error_value();
        };
        if !self.session.member_access_allowed(self.scope, class, visibility) {
            let class_name = self.session.type_name(&Type::Class(class));
            self.report(Error::AccessingNonpublicClassMember {
                name: name.to_owned(),
                class: class_name,
                span,
            });
        }
        let base_local = self.force_local(&base_value);
        let alias = self.builder.add_local(name, field_ty.clone(), true);
        self.builder.emit(ir::Instr::FieldPtr {
            dst: alias,
            base: base_local,
            field: index,
        });
        ExprValue {
            ty: field_ty,
            operand: ir::Operand::Local(alias),
            node: base_value.node,
            is_mutable: base_value.is_mutable && is_mutable,
        }
    }

    fn lower_index(
        &mut self,
        base: &'src ast::Spanned<ast::Expr<'src>>,
        index: &'src ast::Spanned<ast::Expr<'src>>,
        span: Span,
    ) -> ExprValue {
        let base_value = self.lower_expr(base);
        match base_value.ty.clone() {
            Type::Array(array) => {
                let index_value = self.lower_expr(index);
                if index_value
                    .ty
                    .as_fundamental()
                    .map_or(true, |f| !f.is_integer())
                    && !index_value.ty.is_invalid()
                {
                    let got = self.session.type_name(&index_value.ty);
                    self.report(Error::TypesMismatch {
                        expected: "any integer type".into(),
                        got,
                        span,
                    });
                }
                if let ir::Operand::Const(constant) = &index_value.operand {
                    if let Some(value) = constant.as_uint() {
                        if value >= array.size {
                            self.report(Error::ArrayIndexOutOfBounds {
                                index: value,
                                size: array.size,
                                span,
                            });
                        }
                    }
                }
                let base_local = self.force_local(&base_value);
                let alias = self.builder.add_local("", array.elem.clone(), true);
                self.builder.emit(ir::Instr::IndexPtr {
                    dst: alias,
                    base: base_local,
                    index: index_value.operand,
                });
                ExprValue {
                    ty: array.elem.clone(),
                    operand: ir::Operand::Local(alias),
                    node: base_value.node,
                    is_mutable: base_value.is_mutable,
                }
            }
            Type::Tuple(elems) => {
                let index_value = self.lower_expr(index);
                let ir::Operand::Const(constant) = &index_value.operand else {
                    self.report(Error::ExpectedConstantExpression(span));
                    return self.error_value();
                };
                let Some(position) = constant.as_uint() else {
                    self.report(Error::ExpectedConstantExpression(span));
                    return self.error_value();
                };
                if position as usize >= elems.len() {
                    self.report(Error::TupleIndexOutOfBounds {
                        index: position,
                        size: elems.len() as u64,
                        span,
                    });
                    return self.error_value();
                }
                let elem = elems[position as usize].clone();
                let base_local = self.force_local(&base_value);
                let alias = self.builder.add_local("", elem.clone(), true);
                self.builder.emit(ir::Instr::FieldPtr {
                    dst: alias,
                    base: base_local,
                    field: position as u32,
                });
                ExprValue {
                    ty: elem,
                    operand: ir::Operand::Local(alias),
                    node: base_value.node,
                    is_mutable: base_value.is_mutable,
                }
            }
            Type::Class(class) => {
                let Some(set) = self.method_set(class, "[]") else {
                    let type_name = self.session.type_name(&base_value.ty);
                    self.report(Error::OperationNotSupportedForThisType(type_name, span));
                    return self.error_value();
                };
                let index_value = self.lower_expr(index);
                let args = vec![base_value, index_value];
                match self.select_from_set(set, &args, span) {
                    Some(function) => self.emit_call(function, args, false, span),
                    None => self.error_value(),
                }
            }
            ty if ty.is_invalid() => self.error_value(),
            other => {
                let type_name = self.session.type_name(&other);
                self.report(Error::OperationNotSupportedForThisType(type_name, span));
                self.error_value()
            }
        }
    }

    fn lower_binop(
        &mut self,
        lhs: &'src ast::Spanned<ast::Expr<'src>>,
        op: ast::BinOp,
        rhs: &'src ast::Spanned<ast::Expr<'src>>,
        span: Span,
    ) -> ExprValue {
        if matches!(op, ast::BinOp::LazyAnd | ast::BinOp::LazyOr) {
            return self.lower_lazy(op, lhs, rhs, span);
        }
        let left = self.lower_expr(lhs);
        let right = self.lower_expr(rhs);
        if left.ty.is_invalid() || right.ty.is_invalid() {
            return self.error_value();
        }
        if let Some(class) = left.ty.as_class() {
            return self.lower_overloaded_binop(class, op, left, right, span);
        }
        if !left.ty.matches(&right.ty) {
            let lhs_name = self.session.type_name(&left.ty);
            let rhs_name = self.session.type_name(&right.ty);
            self.report(Error::NoMatchBinaryOperatorForGivenTypes {
                lhs: lhs_name,
                rhs: rhs_name,
                op: op.as_str(),
                span,
            });
            return self.error_value();
        }
        let Some(result_ty) = binary_result_type(op, &left.ty) else {
            let lhs_name = self.session.type_name(&left.ty);
            let rhs_name = self.session.type_name(&right.ty);
            self.report(Error::NoMatchBinaryOperatorForGivenTypes {
                lhs: lhs_name,
                rhs: rhs_name,
                op: op.as_str(),
                span,
            });
            return self.error_value();
        };
        let dst = self.builder.add_local("", result_ty.clone(), false);
        self.builder.emit(ir::Instr::BinOp {
            dst,
            op,
            lhs: left.operand,
            rhs: right.operand,
        });
        ExprValue {
            ty: result_ty,
            operand: ir::Operand::Local(dst),
            node: None,
            is_mutable: false,
        }
    }

    fn lower_overloaded_binop(
        &mut self,
        class: ClassId,
        op: ast::BinOp,
        left: ExprValue,
        right: ExprValue,
        span: Span,
    ) -> ExprValue {
        let (operator, negate) = match op {
            ast::BinOp::Eq => ("==", false),
            ast::BinOp::Ne => ("==", true),
            ast::BinOp::Add | ast::BinOp::Sub | ast::BinOp::Mul | ast::BinOp::Div
            | ast::BinOp::Rem => (op.as_str(), false),
            _ => {
                let lhs_name = self.session.type_name(&left.ty);
                let rhs_name = self.session.type_name(&right.ty);
                self.report(Error::NoMatchBinaryOperatorForGivenTypes {
                    lhs: lhs_name,
                    rhs: rhs_name,
                    op: op.as_str(),
                    span,
                });
                return self.error_value();
            }
        };
        let Some(set) = self.method_set(class, operator) else {
            let lhs_name = self.session.type_name(&left.ty);
            let rhs_name = self.session.type_name(&right.ty);
            self.report(Error::NoMatchBinaryOperatorForGivenTypes {
                lhs: lhs_name,
                rhs: rhs_name,
                op: op.as_str(),
                span,
            });
            return self.error_value();
        };
        let args = vec![left, right];
        let Some(function) = self.select_from_set(set, &args, span) else {
            return self.error_value();
        };
        let result = self.emit_call(function, args, false, span);
        if !negate {
            return result;
        }
        let dst = self.builder.add_local("", Type::BOOL, false);
        self.builder.emit(ir::Instr::Not {
            dst,
            value: result.operand,
        });
        ExprValue {
            ty: Type::BOOL,
            operand: ir::Operand::Local(dst),
            node: None,
            is_mutable: false,
        }
    }

    fn lower_lazy(
        &mut self,
        op: ast::BinOp,
        lhs: &'src ast::Spanned<ast::Expr<'src>>,
        rhs: &'src ast::Spanned<ast::Expr<'src>>,
        span: Span,
    ) -> ExprValue {
        let result = self.builder.add_local("", Type::BOOL, false);
        let left = self.lower_expr(lhs);
        self.expect_bool(&left, lhs.1);

        let rhs_block = self.builder.new_block();
        let short_block = self.builder.new_block();
        let end = self.builder.new_block();
        let (then_block, else_block) = if matches!(op, ast::BinOp::LazyAnd) {
            (rhs_block, short_block)
        } else {
            (short_block, rhs_block)
        };
        self.builder.terminate(ir::Terminator::CondBr {
            cond: left.operand,
            then_block,
            else_block,
        });

        self.builder.switch_to(short_block);
        self.builder.emit(ir::Instr::Store {
            dst: result,
            value: ir::Operand::Const(ConstValue::Bool(matches!(op, ast::BinOp::LazyOr))),
        });
        self.builder.terminate(ir::Terminator::Br(end));

        self.builder.switch_to(rhs_block);
        let before = self.graph.clone();
        let right = self.lower_expr(rhs);
        self.expect_bool(&right, rhs.1);
        self.builder.emit(ir::Instr::Store {
            dst: result,
            value: right.operand,
        });
        self.builder.terminate(ir::Terminator::Br(end));

        // The right side runs conditionally; its moves are conditional.
        let rhs_graph = std::mem::replace(&mut self.graph, before.clone());
        let (merged, errors) = before.merge_branches(&[rhs_graph, before.clone()], span);
        self.graph = merged;
        for error in errors {
            self.report(error);
        }

        self.builder.switch_to(end);
        ExprValue {
            ty: Type::BOOL,
            operand: ir::Operand::Local(result),
            node: None,
            is_mutable: false,
        }
    }

    fn lower_unop(
        &mut self,
        op: ast::UnOp,
        expr: &'src ast::Spanned<ast::Expr<'src>>,
        span: Span,
    ) -> ExprValue {
        let value = self.lower_expr(expr);
        if value.ty.is_invalid() {
            return self.error_value();
        }
        let supported = match op {
            ast::UnOp::Neg => value
                .ty
                .as_fundamental()
                .is_some_and(|f| f.is_signed_integer() || f.is_float()),
            ast::UnOp::Not => value.ty == Type::BOOL,
            ast::UnOp::BitNot => value.ty.as_fundamental().is_some_and(|f| f.is_integer()),
        };
        if !supported {
            let name = self.session.type_name(&value.ty);
            self.report(Error::OperationNotSupportedForThisType(name, span));
            return self.error_value();
        }
        let dst = self.builder.add_local("", value.ty.clone(), false);
        let instr = match op {
            ast::UnOp::Neg => ir::Instr::Neg {
                dst,
                value: value.operand,
            },
            ast::UnOp::Not => ir::Instr::Not {
                dst,
                value: value.operand,
            },
            ast::UnOp::BitNot => ir::Instr::BitNot {
                dst,
                value: value.operand,
            },
        };
        self.builder.emit(instr);
        ExprValue {
            ty: value.ty,
            operand: ir::Operand::Local(dst),
            node: None,
            is_mutable: false,
        }
    }

    fn lower_move(&mut self, name: &'src str, span: Span) -> ExprValue {
        let Some(var) = self.find_local(name) else {
            self.report(Error::NameNotFound(name.to_owned(), span));
            return self.error_value();
        };
        if var.value_type != ValueType::Value {
            self.report(Error::ExpectedVariable(name.to_owned(), span));
            return self.error_value();
        }
        if self.graph.contains(var.node) && self.graph.is_moved(var.node) {
            self.report(Error::AccessingMovedVariable(name.to_owned(), span));
            return self.error_value();
        }
        if let Err(error) = self.graph.move_node(var.node, span) {
            self.report(error);
        }
        ExprValue {
            ty: var.ty,
            operand: ir::Operand::Local(var.local),
            node: None,
            is_mutable: false,
        }
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    fn lower_call(
        &mut self,
        callee: &'src ast::Spanned<ast::Expr<'src>>,
        args: &'src [ast::Spanned<ast::Expr<'src>>],
        span: Span,
    ) -> ExprValue {
        match &callee.0 {
            ast::Expr::Member { base, name } => {
                let base_value = self.lower_expr(base);
                if base_value.ty.is_invalid() {
                    return self.error_value();
                }
                let Some(class) = base_value.ty.as_class() else {
                    let type_name = self.session.type_name(&base_value.ty);
                    self.report(Error::OperationNotSupportedForThisType(type_name, span));
                    return self.error_value();
                };
                self.session.ensure_class_complete(class, span);
                let Some(set) = self.method_set(class, name) else {
                    self.report(Error::NameNotFound((*name).to_owned(), span));
                    return self.error_value();
                };
                let mut all = vec![base_value];
                for arg in args {
                    all.push(self.lower_expr(arg));
                }
                match self.select_from_set(set, &all, span) {
                    Some(function) => self.emit_call(function, all, true, span),
                    None => self.error_value(),
                }
            }
            ast::Expr::Path(path) => self.lower_path_call(path, args, span),
            _ => {
                let value = self.lower_expr(callee);
                self.call_value(value, args, span)
            }
        }
    }

    fn lower_path_call(
        &mut self,
        path: &'src ast::Path<'src>,
        args: &'src [ast::Spanned<ast::Expr<'src>>],
        span: Span,
    ) -> ExprValue {
        if let Some(name) = path.as_single_ident() {
            if self.find_local(name).is_some() {
                let value = self.lower_path(path, span);
                return self.call_value(value, args, span);
            }
        }
        let qualified = path.components.len() > 1;
        match self.session.resolve_path_value(self.scope, path, span) {
            Resolved::Functions(set) => {
                let owner = self.session.function_sets[set.index()].class;
                let functions = self.session.function_sets[set.index()].functions.clone();
                let needs_this = owner.is_some()
                    && !functions.is_empty()
                    && functions
                        .iter()
                        .all(|id| self.session.functions[id.index()].is_this_call);
                let mut all = Vec::with_capacity(args.len() + 1);
                let mut implicit_this = false;
                if needs_this {
                    match self.find_local("this") {
                        Some(this) => {
                            all.push(self.local_value(&this, span));
                            implicit_this = true;
                        }
                        None => {
                            self.report(Error::ThisUnavailable(span));
                            return self.error_value();
                        }
                    }
                }
                for arg in args {
                    all.push(self.lower_expr(arg));
                }
                match self.select_from_set(set, &all, span) {
                    Some(function) => {
                        self.emit_call(function, all, implicit_this && !qualified, span)
                    }
                    None => self.error_value(),
                }
            }
            Resolved::Type(ty) => self.construct_value(&ty, args, span),
            Resolved::Variable(_) | Resolved::EnumMember(..) | Resolved::Field(_) => {
                let value = self.lower_path(path, span);
                self.call_value(value, args, span)
            }
            Resolved::Namespace(_) => {
                self.report(Error::ExpectedVariable("namespace".into(), span));
                self.error_value()
            }
            Resolved::Error => self.error_value(),
        }
    }

    /// `T(...)` notation: constructs a temporary of type `T`.
    fn construct_value(
        &mut self,
        ty: &Type,
        args: &'src [ast::Spanned<ast::Expr<'src>>],
        span: Span,
    ) -> ExprValue {
        match ty {
            Type::Class(class) => {
                let class = *class;
                self.session.ensure_class_complete(class, span);
                let (is_abstract, constructors, class_name) = {
                    let target = &self.session.classes[class.index()];
                    (
                        target.kind.is_abstract(),
                        target.constructors.clone(),
                        target.name.clone(),
                    )
                };
                if is_abstract {
                    self.report(Error::ConstructingAbstractClassOrInterface(class_name, span));
                    return self.error_value();
                }
                if constructors.is_empty() {
                    self.report(Error::ClassHasNoConstructors(span));
                    return self.error_value();
                }
                let tmp = self.builder.add_local("", Type::Class(class), false);
                let tmp_node = self.graph.add_node("temporary", NodeKind::Variable, span);
                self.stmt_temps.push(tmp_node);
                let this_value = ExprValue {
                    ty: Type::Class(class),
                    operand: ir::Operand::Local(tmp),
                    node: Some(tmp_node),
                    is_mutable: true,
                };
                let mut all = vec![this_value];
                for arg in args {
                    all.push(self.lower_expr(arg));
                }
                if let Some(ctor) = self.select_overloaded(&constructors, &[], &all, span) {
                    self.emit_call(ctor, all, false, span);
                }
                ExprValue {
                    ty: Type::Class(class),
                    operand: ir::Operand::Local(tmp),
                    node: None,
                    is_mutable: false,
                }
            }
            Type::Fundamental(_) | Type::Enum(_) => {
                if args.len() != 1 {
                    self.report(Error::FundamentalTypesHaveConstructorsWithExactlyOneParameter(
                        span,
                    ));
                    return self.error_value();
                }
                let value = self.lower_expr(&args[0]);
                let compatible = match (ty.as_fundamental(), value.ty.as_fundamental()) {
                    (Some(to), Some(from)) => to.is_numeric() && from.is_numeric(),
                    _ => ty.matches(&value.ty),
                };
                if !compatible {
                    self.check_type(ty, &value.ty, span);
                }
                let tmp = self.builder.add_local("", ty.clone(), false);
                self.builder.emit(ir::Instr::Store {
                    dst: tmp,
                    value: value.operand,
                });
                ExprValue {
                    ty: ty.clone(),
                    operand: ir::Operand::Local(tmp),
                    node: None,
                    is_mutable: false,
                }
            }
            ty if ty.is_invalid() => self.error_value(),
            _ => {
                self.report(Error::ConstructorInitializerForUnsupportedType(span));
                self.error_value()
            }
        }
    }

    /// Calls through a lowered callee value (function pointers, class
    /// values with a call operator).
    fn call_value(
        &mut self,
        value: ExprValue,
        args: &'src [ast::Spanned<ast::Expr<'src>>],
        span: Span,
    ) -> ExprValue {
        if value.ty.is_invalid() {
            return self.error_value();
        }
        if let Some(class) = value.ty.as_class() {
            let Some(set) = self.method_set(class, "()") else {
                let type_name = self.session.type_name(&value.ty);
                self.report(Error::OperationNotSupportedForThisType(type_name, span));
                return self.error_value();
            };
            let mut all = vec![value];
            for arg in args {
                all.push(self.lower_expr(arg));
            }
            return match self.select_from_set(set, &all, span) {
                Some(function) => self.emit_call(function, all, false, span),
                None => self.error_value(),
            };
        }
        let Type::FunctionPointer(fn_type) = value.ty.clone() else {
            let type_name = self.session.type_name(&value.ty);
            self.report(Error::OperationNotSupportedForThisType(type_name, span));
            return self.error_value();
        };
        let ir::Operand::FunctionRef(name) = value.operand else {
            let type_name = self.session.type_name(&value.ty);
            self.report(Error::OperationNotSupportedForThisType(type_name, span));
            return self.error_value();
        };
        if fn_type.params.len() != args.len() {
            self.report(Error::InvalidFunctionArgumentCount {
                expected: fn_type.params.len(),
                got: args.len(),
                span,
            });
            return self.error_value();
        }
        let mut operands = Vec::with_capacity(args.len());
        for (arg, param) in args.iter().zip(fn_type.params.iter()) {
            let arg_value = self.lower_expr(arg);
            self.check_type(&param.ty, &arg_value.ty, arg.1);
            operands.push(arg_value.operand);
        }
        if fn_type.is_unsafe && self.unsafe_depth == 0 {
            self.report(Error::UnsafeFunctionCallOutsideUnsafeBlock(span));
        }
        let dst = if fn_type.ret.is_void() {
            None
        } else {
            Some(
                self.builder
                    .add_local("", fn_type.ret.clone(), fn_type.ret_value.is_reference()),
            )
        };
        self.builder.emit(ir::Instr::Call {
            dst,
            function: name,
            args: operands,
            virtual_slot: None,
        });
        ExprValue {
            ty: fn_type.ret.clone(),
            operand: dst.map_or(
                ir::Operand::Const(ConstValue::Bool(false)),
                ir::Operand::Local,
            ),
            node: None,
            is_mutable: false,
        }
    }

    /// Finds the overload set for `name` in the class or its nearest
    /// ancestor that declares it.
    fn method_set(&mut self, class: ClassId, name: &str) -> Option<FunctionSetId> {
        for candidate in self.session.class_with_ancestors(class) {
            let scope = self.session.classes[candidate.index()].scope;
            if let Some(entry) = self.session.scopes.lookup_in(scope, name) {
                if let Value::Functions(set) = &entry.value {
                    return Some(*set);
                }
            }
        }
        None
    }

    fn select_from_set(
        &mut self,
        set: FunctionSetId,
        args: &[ExprValue],
        span: Span,
    ) -> Option<FunctionId> {
        let functions = self.session.function_sets[set.index()].functions.to_vec();
        let templates = self.session.function_sets[set.index()].templates.to_vec();
        self.select_overloaded(&functions, &templates, args, span)
    }

    fn select_overloaded(
        &mut self,
        functions: &[FunctionId],
        templates: &[TemplateId],
        args: &[ExprValue],
        span: Span,
    ) -> Option<FunctionId> {
        let mut candidates = Vec::new();
        let mut handles: Vec<FunctionId> = Vec::new();
        for &id in functions {
            let params = self.session.functions[id.index()]
                .ty
                .params
                .iter()
                .map(|p| CandidateParam {
                    ty: p.ty.clone(),
                    value_type: p.value_type,
                })
                .collect();
            candidates.push(Candidate {
                index: handles.len(),
                params,
                is_template: false,
            });
            handles.push(id);
        }

        let arg_types: Vec<Type> = args.iter().map(|a| a.ty.clone()).collect();
        for &template in templates {
            let Some(id) = self
                .session
                .deduce_function_template(template, &arg_types, span)
            else {
                continue;
            };
            if handles.contains(&id) {
                continue;
            }
            let params = self.session.functions[id.index()]
                .ty
                .params
                .iter()
                .map(|p| CandidateParam {
                    ty: p.ty.clone(),
                    value_type: p.value_type,
                })
                .collect();
            candidates.push(Candidate {
                index: handles.len(),
                params,
                is_template: true,
            });
            handles.push(id);
        }

        let infos: Vec<ArgInfo> = args
            .iter()
            .map(|a| ArgInfo {
                ty: a.ty.clone(),
                is_mutable_reference: a.node.is_some() && a.is_mutable,
            })
            .collect();
        let desc = arg_types
            .iter()
            .map(|ty| self.session.type_name(ty))
            .join(", ");
        match overload::select_overload(&candidates, &infos, &*self.session, move || desc, span) {
            Ok(index) => Some(handles[index]),
            Err(error) => {
                self.report(error);
                None
            }
        }
    }

    fn emit_call(
        &mut self,
        function: FunctionId,
        args: Vec<ExprValue>,
        virtual_dispatch: bool,
        span: Span,
    ) -> ExprValue {
        let (mangled, ty, is_deleted, virtual_slot) = {
            let target = &self.session.functions[function.index()];
            (
                target
                    .mangled_name
                    .clone()
                    .unwrap_or_else(|| target.name.clone()),
                target.ty.clone(),
                target.is_deleted,
                if virtual_dispatch
                    && target.virtual_kind.is_virtual()
                    && !target.virtual_kind.is_final()
                {
                    target.virtual_table_index
                } else {
                    None
                },
            )
        };
        if is_deleted {
            self.report(Error::AccessingDeletedMethod(span));
        }
        if ty.is_unsafe && self.unsafe_depth == 0 {
            self.report(Error::UnsafeFunctionCallOutsideUnsafeBlock(span));
        }

        let operands: Vec<ir::Operand> = args.iter().map(|a| a.operand.clone()).collect();
        let dst = if ty.ret.is_void() {
            None
        } else {
            Some(
                self.builder
                    .add_local("", ty.ret.clone(), ty.ret_value.is_reference()),
            )
        };
        self.builder.emit(ir::Instr::Call {
            dst,
            function: mangled,
            args: operands,
            virtual_slot,
        });

        // Declared pollution: the call may plant references to one
        // argument inside another.
        for pair in ty.references_pollution.iter() {
            let Some(dst_terminals) = self.arg_terminals(&args, pair.dst.param) else {
                continue;
            };
            let Some(src_terminals) = self.arg_terminals(&args, pair.src.param) else {
                continue;
            };
            let src_kind = if ty
                .params
                .get(pair.src.param as usize)
                .is_some_and(|p| p.value_type.is_mutable_reference())
            {
                NodeKind::ReferenceMut
            } else {
                NodeKind::ReferenceImut
            };
            for &dst_node in &dst_terminals {
                let inner = self.graph.inner_reference(dst_node, src_kind);
                for &src_node in &src_terminals {
                    if let Err(error) = self.graph.try_add_link(src_node, inner) {
                        self.report(error);
                    }
                }
            }
        }

        let node = if ty.ret_value.is_reference() {
            let kind = if ty.ret_value.is_mutable_reference() {
                NodeKind::ReferenceMut
            } else {
                NodeKind::ReferenceImut
            };
            let result = self.graph.add_node("call result", kind, span);
            for reference in ty.return_references.iter() {
                if let Some(terminals) = self.arg_terminals(&args, reference.param) {
                    for terminal in terminals {
                        self.graph.add_link(terminal, result);
                    }
                }
            }
            self.stmt_temps.push(result);
            Some(result)
        } else {
            None
        };

        ExprValue {
            ty: ty.ret.clone(),
            operand: dst.map_or(
                ir::Operand::Const(ConstValue::Bool(false)),
                ir::Operand::Local,
            ),
            node,
            is_mutable: ty.ret_value.is_mutable_reference(),
        }
    }

    fn arg_terminals(&self, args: &[ExprValue], param: u8) -> Option<Vec<NodeId>> {
        let node = args.get(param as usize)?.node?;
        Some(self.terminals(node))
    }

    /// The variables a node ultimately refers into. A node with no
    /// referents is its own terminal.
    fn terminals(&self, node: NodeId) -> Vec<NodeId> {
        let reachable = self.graph.reachable_referents(node);
        let terminal: Vec<NodeId> = reachable
            .iter()
            .copied()
            .filter(|&n| self.graph.referents(n).next().is_none())
            .collect();
        if terminal.is_empty() {
            vec![node]
        } else {
            terminal
        }
    }

    // ------------------------------------------------------------------
    // Checks
    // ------------------------------------------------------------------

    fn check_type(&mut self, expected: &Type, got: &Type, span: Span) -> bool {
        if expected.matches(got) {
            return true;
        }
        if self.session.inheritance_distance(got, expected).is_some() {
            return true;
        }
        let expected = self.session.type_name(expected);
        let got = self.session.type_name(got);
        self.report(Error::TypesMismatch {
            expected,
            got,
            span,
        });
        false
    }

    fn check_copy(&mut self, ty: &Type, value: &ExprValue, span: Span) {
        if value.node.is_none() {
            return;
        }
        if matches!(ty, Type::Class(_)) && !self.session.type_is_copyable(ty) {
            let name = self.session.type_name(ty);
            self.report(Error::CopyConstructValueOfNoncopyableType(name, span));
        }
    }

    fn expect_bool(&mut self, value: &ExprValue, span: Span) {
        if !value.ty.matches(&Type::BOOL) {
            let got = self.session.type_name(&value.ty);
            self.report(Error::TypesMismatch {
                expected: "bool".into(),
                got,
                span,
            });
        }
    }

    fn force_local(&mut self, value: &ExprValue) -> ir::LocalId {
        match value.operand {
            ir::Operand::Local(local) => local,
            _ => {
                let tmp = self.builder.add_local("", value.ty.clone(), false);
                self.builder.emit(ir::Instr::Store {
                    dst: tmp,
                    value: value.operand.clone(),
                });
                tmp
            }
        }
    }
}

/// Result type of a built-in binary operation on `operand`'s type, or
/// `None` when the operation does not apply.
fn binary_result_type(op: ast::BinOp, operand: &Type) -> Option<Type> {
    use ast::BinOp::*;
    let fundamental = operand.as_fundamental();
    match op {
        Add | Sub | Mul | Div | Rem => {
            fundamental.filter(|f| f.is_numeric()).map(|_| operand.clone())
        }
        BitAnd | BitOr | BitXor => fundamental
            .filter(|f| f.is_integer() || *f == Fundamental::Bool)
            .map(|_| operand.clone()),
        Shl | Shr => fundamental.filter(|f| f.is_integer()).map(|_| operand.clone()),
        Eq | Ne => match operand {
            Type::Fundamental(f) if !matches!(f, Fundamental::Void | Fundamental::Invalid) => {
                Some(Type::BOOL)
            }
            Type::Enum(_) => Some(Type::BOOL),
            _ => None,
        },
        Lt | Le | Gt | Ge => fundamental
            .filter(|f| f.is_numeric() || f.is_char())
            .map(|_| Type::BOOL),
        LazyAnd | LazyOr => (operand == &Type::BOOL).then_some(Type::BOOL),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_result_types() {
        let i32_ty = Type::Fundamental(Fundamental::I32);
        let f64_ty = Type::Fundamental(Fundamental::F64);
        assert_eq!(
            binary_result_type(ast::BinOp::Add, &i32_ty),
            Some(i32_ty.clone())
        );
        assert_eq!(binary_result_type(ast::BinOp::Lt, &i32_ty), Some(Type::BOOL));
        assert_eq!(binary_result_type(ast::BinOp::Shl, &f64_ty), None);
        assert_eq!(
            binary_result_type(ast::BinOp::BitAnd, &Type::BOOL),
            Some(Type::BOOL)
        );
        assert_eq!(binary_result_type(ast::BinOp::Add, &Type::BOOL), None);
        assert_eq!(
            binary_result_type(ast::BinOp::Eq, &Type::BOOL),
            Some(Type::BOOL)
        );
    }

    #[test]
    fn comparison_needs_ordered_operands() {
        let void = Type::VOID;
        assert_eq!(binary_result_type(ast::BinOp::Eq, &void), None);
        assert_eq!(binary_result_type(ast::BinOp::Lt, &Type::BOOL), None);
    }
}
