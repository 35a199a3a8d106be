//! Semantic core of the Sable compiler: name tables, type checking,
//! reference safety analysis, template instantiation and lowering of
//! function bodies to a small IR.
//!
//! The entry point is [`build_program`]: it consumes a parsed
//! [`SourceGraph`] and returns the IR module together with every
//! diagnostic produced, ordered and deduplicated. Errors never abort
//! the build; analysis continues with recovery values.

use std::collections::VecDeque;
use std::rc::Rc;

use hashbrown::{HashMap, HashSet};
use itertools::Itertools;
use log::debug;
use sable_ast as ast;
use sable_ast::{SourceGraph, Span, Visibility};
use slab::Slab;
use smallvec::SmallVec;

use crate::classes::{Class, ClassKind, Completeness, Field, NonSyncState, VirtualTableSlot};
use crate::cte::{ConstEntity, ConstEnv, CtValue, Interpreter};
use crate::diagnostic::{Diagnostic, Error, Reporter};
use crate::enums::Enum;
use crate::mangle::{MangledName, Mangler, ManglingScheme, NamePaths};
use crate::overload::TypeRelations;
use crate::scopes::{NameEntry, ScopeArena, ScopeId};
use crate::templates::{
    CacheKey, DeduceEnv, Signature, Template, TemplateArgKey, TemplateId, TemplateKind,
};
use crate::types::{
    CallingConvention, ClassId, EnumId, Fundamental, FunctionParam, FunctionType, Type, ValueType,
};
use crate::values::{
    ConstValue, Function, FunctionId, FunctionSet, FunctionSetId, GlobalState, GlobalVarDecl,
    Typedef, TypedefId, Value, Variable, VariableId, VirtualKind,
};

pub mod classes;
pub mod cte;
pub mod diagnostic;
pub mod enums;
pub mod imports;
pub mod ir;
pub mod lower;
pub mod mangle;
pub mod non_sync;
pub mod overload;
pub mod refs_graph;
pub mod scopes;
pub mod templates;
pub mod types;
pub mod values;

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub triple: String,
    pub pointer_size: u32,
    pub mangling: ManglingScheme,
    /// Record declaration positions on emitted functions.
    pub debug_info: bool,
    /// Emit stack slot liveness markers around local lifetimes.
    pub lifetime_markers: bool,
    /// Emit alias-analysis type tags for struct layouts.
    pub tbaa_metadata: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            triple: "x86_64-unknown-linux-gnu".into(),
            pointer_size: 8,
            mangling: ManglingScheme::ItaniumAbi,
            debug_info: false,
            lifetime_markers: false,
            tbaa_metadata: false,
        }
    }
}

/// Builds the whole program. Files are processed in dependency order;
/// all diagnostics come back sorted by position and deduplicated.
pub fn build_program<'src>(
    graph: &'src SourceGraph<'src>,
    options: BuildOptions,
) -> (ir::Module, Vec<Diagnostic>) {
    let mut session = Session::new(options);
    let mut file_scopes: Vec<ScopeId> = Vec::with_capacity(graph.nodes().len());

    for node in graph.nodes() {
        let scope = session.scopes.root();
        for &import in node.imports.iter() {
            let src = file_scopes[import];
            let mut ctx = imports::MergeCtx {
                scopes: &mut session.scopes,
                function_sets: &mut session.function_sets,
                functions: &session.functions,
                reporter: &mut session.reporter,
            };
            imports::merge_scope(&mut ctx, scope, src);
        }
        session.populate_items(scope, &node.module.items);
        session.declare_item_functions(scope, &node.module.items);
        session.complete_scope(scope);
        session.drain_queues();
        file_scopes.push(scope);
    }

    session.finish()
}

/// What a qualified name resolves to.
#[derive(Debug, Clone)]
pub(crate) enum Resolved {
    Type(Type),
    Functions(FunctionSetId),
    Variable(VariableId),
    EnumMember(EnumId, u64),
    Namespace(ScopeId),
    Field(crate::values::FieldId),
    Error,
}

/// Special members the class builder may generate itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyntheticMember {
    DefaultConstructor,
    CopyConstructor,
    Destructor,
}

/// One build's worth of state: every arena, the template caches and
/// queues, the error sink and the module under construction. Nothing
/// here is global; independent sessions never share state.
pub struct Session<'src> {
    pub(crate) options: BuildOptions,
    pub(crate) scopes: ScopeArena,
    pub(crate) classes: Slab<Class<'src>>,
    pub(crate) enums: Slab<Enum>,
    pub(crate) variables: Slab<Variable<'src>>,
    pub(crate) functions: Slab<Function<'src>>,
    pub(crate) function_sets: Slab<FunctionSet>,
    pub(crate) typedefs: Slab<Typedef<'src>>,
    pub(crate) templates: Slab<Template<'src>>,
    /// Memoized type template instantiations; equal keys yield the
    /// identical type.
    pub(crate) type_template_cache: HashMap<CacheKey, Type>,
    pub(crate) fn_template_cache: HashMap<CacheKey, FunctionId>,
    /// Active instantiation frames, attached as notes to diagnostics
    /// produced inside instantiated code.
    pub(crate) template_stack: Vec<(String, Span)>,
    /// FIFO completion queues: work discovered while building something
    /// else runs after the current item, never recursively inside it.
    pub(crate) pending_classes: VecDeque<ClassId>,
    pub(crate) pending_functions: VecDeque<FunctionId>,
    pub(crate) pending_asserts: Vec<(ScopeId, &'src ast::StaticAssert<'src>)>,
    pub(crate) lowered: HashSet<FunctionId>,
    pub(crate) emitted_globals: HashSet<VariableId>,
    pub(crate) reporter: Reporter,
    pub(crate) mangler: Box<dyn Mangler>,
    pub(crate) module: ir::Module,
}

impl NamePaths for Session<'_> {
    fn class_path(&self, id: ClassId) -> Vec<String> {
        self.scopes.path_components(self.classes[id.index()].scope)
    }

    fn enum_path(&self, id: EnumId) -> Vec<String> {
        self.enums[id.index()].path.clone()
    }
}

impl TypeRelations for Session<'_> {
    fn inheritance_distance(&self, from: &Type, to: &Type) -> Option<u32> {
        if from == to {
            return Some(0);
        }
        let (Type::Class(from), Type::Class(to)) = (from, to) else {
            return None;
        };
        self.class_distance(*from, *to)
    }
}

impl<'src> Session<'src> {
    fn new(options: BuildOptions) -> Self {
        let mangler = mangle::mangler_for(options.mangling);
        let module = ir::Module {
            triple: options.triple.clone(),
            data_layout: ir::DataLayout {
                pointer_size: options.pointer_size,
            },
            ..ir::Module::default()
        };
        Self {
            options,
            scopes: ScopeArena::default(),
            classes: Slab::new(),
            enums: Slab::new(),
            variables: Slab::new(),
            functions: Slab::new(),
            function_sets: Slab::new(),
            typedefs: Slab::new(),
            templates: Slab::new(),
            type_template_cache: HashMap::new(),
            fn_template_cache: HashMap::new(),
            template_stack: Vec::new(),
            pending_classes: VecDeque::new(),
            pending_functions: VecDeque::new(),
            pending_asserts: Vec::new(),
            lowered: HashSet::new(),
            emitted_globals: HashSet::new(),
            reporter: Reporter::default(),
            mangler,
            module,
        }
    }

    /// Reports an error, wrapping it in the template instantiation
    /// context if one is active.
    pub(crate) fn report(&mut self, error: Error) {
        if self.template_stack.is_empty() {
            self.reporter.report(error);
            return;
        }
        let mut notes = Vec::new();
        for (name, span) in self.template_stack.iter().rev() {
            notes.push(Diagnostic::new(Error::TemplateContext {
                template_name: name.clone(),
                declaration_span: *span,
                span: *span,
            }));
        }
        self.reporter.report(Diagnostic::with_notes(error, notes));
    }

    // ------------------------------------------------------------------
    // Display
    // ------------------------------------------------------------------

    pub(crate) fn type_name(&self, ty: &Type) -> String {
        match ty {
            Type::Fundamental(f) => f.name().to_owned(),
            Type::Array(array) => {
                format!("[ {}, {} ]", self.type_name(&array.elem), array.size)
            }
            Type::Tuple(elems) => {
                format!(
                    "tup[ {} ]",
                    elems.iter().map(|e| self.type_name(e)).join(", ")
                )
            }
            Type::RawPointer(pointee) => format!("$({})", self.type_name(pointee)),
            Type::FunctionPointer(fn_type) => {
                format!(
                    "fn({}) : {}",
                    fn_type
                        .params
                        .iter()
                        .map(|p| self.type_name(&p.ty))
                        .join(", "),
                    self.type_name(&fn_type.ret)
                )
            }
            Type::Class(id) => self.class_path(*id).join("::"),
            Type::Enum(id) => self.enums[id.index()].path.join("::"),
        }
    }

    // ------------------------------------------------------------------
    // Inheritance
    // ------------------------------------------------------------------

    fn class_distance(&self, from: ClassId, to: ClassId) -> Option<u32> {
        if from == to {
            return Some(0);
        }
        self.classes[from.index()]
            .parents
            .iter()
            .filter_map(|&parent| self.class_distance(parent, to))
            .min()
            .map(|d| d + 1)
    }

    /// All ancestors of a class, the class itself included.
    pub(crate) fn class_with_ancestors(&self, id: ClassId) -> Vec<ClassId> {
        let mut out = vec![id];
        let mut cursor = 0;
        while cursor < out.len() {
            let current = out[cursor];
            cursor += 1;
            for &parent in &self.classes[current.index()].parents {
                if !out.contains(&parent) {
                    out.push(parent);
                }
            }
        }
        out
    }

    // ------------------------------------------------------------------
    // Size and layout
    // ------------------------------------------------------------------

    pub(crate) fn type_size(&self, ty: &Type) -> u64 {
        let ptr = u64::from(self.options.pointer_size);
        match ty {
            Type::Fundamental(f) => u64::from(f.size_in_bytes(self.options.pointer_size)),
            Type::Array(array) => self.type_size(&array.elem) * array.size,
            Type::Tuple(elems) => elems.iter().map(|e| self.type_size(e)).sum(),
            Type::RawPointer(_) | Type::FunctionPointer(_) => ptr,
            Type::Enum(id) => u64::from(
                self.enums[id.index()]
                    .underlying
                    .size_in_bytes(self.options.pointer_size),
            ),
            Type::Class(id) => {
                let class = &self.classes[id.index()];
                class
                    .fields
                    .iter()
                    .map(|f| if f.is_reference { ptr } else { self.type_size(&f.ty) })
                    .sum()
            }
        }
    }

    /// Does the type (transitively) hold references, making reference
    /// notation and inner-reference nodes relevant for it?
    pub(crate) fn type_has_references_inside(&self, ty: &Type) -> bool {
        match ty {
            Type::Class(id) => self.classes[id.index()].flags.references_inside(),
            Type::Array(array) => self.type_has_references_inside(&array.elem),
            Type::Tuple(elems) => elems.iter().any(|e| self.type_has_references_inside(e)),
            _ => false,
        }
    }

    pub(crate) fn type_is_copyable(&self, ty: &Type) -> bool {
        match ty {
            Type::Fundamental(_) | Type::Enum(_) | Type::RawPointer(_) | Type::FunctionPointer(_) => {
                true
            }
            Type::Array(array) => self.type_is_copyable(&array.elem),
            Type::Tuple(elems) => elems.iter().all(|e| self.type_is_copyable(e)),
            Type::Class(id) => self.classes[id.index()].flags.copy_constructible(),
        }
    }

    /// True when destroying a value of this type runs any code.
    pub(crate) fn type_needs_destructor(&self, ty: &Type) -> bool {
        match ty {
            Type::Class(_) => true,
            Type::Array(array) => self.type_needs_destructor(&array.elem),
            Type::Tuple(elems) => elems.iter().any(|e| self.type_needs_destructor(e)),
            _ => false,
        }
    }

    // ------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------

    pub(crate) fn resolve_type_name(&mut self, scope: ScopeId, name: &ast::TypeName<'src>) -> Type {
        match name {
            ast::TypeName::Path((path, span)) => {
                if let Some(single) = path.as_single_ident() {
                    if let Some(fundamental) = Fundamental::from_name(single) {
                        return Type::Fundamental(fundamental);
                    }
                }
                match self.resolve_path_value(scope, path, *span) {
                    Resolved::Type(ty) => ty,
                    Resolved::Error => Type::INVALID,
                    _ => {
                        let shown = path
                            .components
                            .last()
                            .map_or_else(String::new, |c| c.name.to_owned());
                        self.report(Error::NameIsNotTypeName(shown, *span));
                        Type::INVALID
                    }
                }
            }
            ast::TypeName::Array { elem, size, span } => {
                let elem_ty = self.resolve_type_name(scope, elem);
                let len = match self.eval_const(scope, size) {
                    Ok(value) => match value.value {
                        ConstValue::UInt(v) => v.min(u128::from(u64::MAX)) as u64,
                        ConstValue::SInt(v) if v >= 0 => v as u64,
                        ConstValue::SInt(_) => {
                            self.report(Error::ArraySizeIsNegative(*span));
                            0
                        }
                        _ => {
                            self.report(Error::ArraySizeIsNotInteger(*span));
                            0
                        }
                    },
                    Err(err) => {
                        self.report(err);
                        0
                    }
                };
                Type::array(elem_ty, len)
            }
            ast::TypeName::Tuple(elems, _) => Type::tuple(
                elems
                    .iter()
                    .map(|e| self.resolve_type_name(scope, e))
                    .collect::<Vec<_>>(),
            ),
            ast::TypeName::RawPointer(pointee, _) => {
                Type::RawPointer(Rc::new(self.resolve_type_name(scope, pointee)))
            }
            ast::TypeName::FunctionPointer {
                params,
                ret,
                ret_value,
                is_unsafe,
                ..
            } => {
                let params = params
                    .iter()
                    .map(|(ty, modifier)| FunctionParam {
                        ty: self.resolve_type_name(scope, ty),
                        value_type: ValueType::from_modifier(*modifier),
                    })
                    .collect();
                let ret = match ret {
                    Some(ret) => self.resolve_type_name(scope, ret),
                    None => Type::VOID,
                };
                Type::FunctionPointer(Rc::new(FunctionType {
                    params,
                    ret,
                    ret_value: ValueType::from_modifier(*ret_value),
                    return_references: Box::new([]),
                    references_pollution: Box::new([]),
                    is_unsafe: *is_unsafe,
                    calling_convention: CallingConvention::Default,
                }))
            }
        }
    }

    pub(crate) fn resolve_path_value(
        &mut self,
        scope: ScopeId,
        path: &ast::Path<'src>,
        span: Span,
    ) -> Resolved {
        let mut components = path.components.iter();
        let Some(first) = components.next() else {
            return Resolved::Error;
        };
        let Some((_, entry)) = self.scopes.lookup_upward(scope, first.name) else {
            self.report(Error::NameNotFound(first.name.to_owned(), span));
            return Resolved::Error;
        };
        let value = entry.value.clone();
        let mut current = self.value_with_args(scope, value, first, span);

        for component in components {
            if matches!(current, Resolved::Error) {
                return Resolved::Error;
            }
            current = self.step_into(scope, current, component, span);
        }
        current
    }

    /// Applies the component's template argument list, if any, to the
    /// value just found for it. Arguments are evaluated in the use-site
    /// scope; the value itself was looked up in its containing scope.
    fn value_with_args(
        &mut self,
        scope: ScopeId,
        value: Value,
        component: &ast::PathComponent<'src>,
        span: Span,
    ) -> Resolved {
        let Some(args) = component.template_args.as_deref() else {
            return self.entry_to_resolved(value, component.name, span);
        };
        match value {
            Value::TypeTemplates(ids) => {
                match self.instantiate_type_template(scope, &ids, args, span) {
                    Some(ty) => Resolved::Type(ty),
                    None => Resolved::Error,
                }
            }
            Value::Functions(set) => {
                self.instantiate_function_template_explicit(scope, set, args, span)
            }
            Value::ErrorValue => Resolved::Error,
            _ => {
                self.report(Error::ValueIsNotTemplate(span));
                Resolved::Error
            }
        }
    }

    fn entry_to_resolved(&mut self, value: Value, name: &str, span: Span) -> Resolved {
        match value {
            Value::Namespace(id) => Resolved::Namespace(id),
            Value::Type(ty) => Resolved::Type(ty),
            Value::Variable(id) => {
                self.ensure_global(id, span);
                Resolved::Variable(id)
            }
            Value::Functions(id) => Resolved::Functions(id),
            Value::TypeTemplates(ids) => {
                // A bare template name without arguments is usable only
                // through an argument list.
                self.report(Error::TemplateInstantiationRequired(
                    self.templates[ids[0].index()].name.clone(),
                    span,
                ));
                Resolved::Error
            }
            Value::ClassField(id) => Resolved::Field(id),
            Value::Typedef(id) => match self.ensure_typedef(id, span) {
                Some(ty) => Resolved::Type(ty),
                None => Resolved::Error,
            },
            Value::YetNotDeducedTemplateArg => {
                self.report(Error::TemplateArgumentIsNotDeducedYet(
                    name.to_owned(),
                    span,
                ));
                Resolved::Error
            }
            Value::ErrorValue => Resolved::Error,
        }
    }

    fn step_into(
        &mut self,
        from: ScopeId,
        current: Resolved,
        component: &ast::PathComponent<'src>,
        span: Span,
    ) -> Resolved {
        let name = component.name;
        match current {
            Resolved::Namespace(ns) => match self.scopes.lookup_in(ns, name) {
                Some(entry) => {
                    let value = entry.value.clone();
                    self.value_with_args(from, value, component, span)
                }
                None => {
                    self.report(Error::NameNotFound(name.to_owned(), span));
                    Resolved::Error
                }
            },
            Resolved::Type(Type::Class(class)) => {
                self.ensure_class_complete(class, span);
                let class_scope = self.classes[class.index()].scope;
                match self.scopes.lookup_in(class_scope, name) {
                    Some(entry) => {
                        let value = entry.value.clone();
                        let visibility = entry.visibility;
                        if !self.member_access_allowed(from, class, visibility) {
                            self.report(Error::AccessingNonpublicClassMember {
                                name: name.to_owned(),
                                class: self.classes[class.index()].name.clone(),
                                span,
                            });
                        }
                        self.value_with_args(from, value, component, span)
                    }
                    None => {
                        self.report(Error::NameNotFound(name.to_owned(), span));
                        Resolved::Error
                    }
                }
            }
            Resolved::Type(Type::Enum(id)) => {
                if component.template_args.is_some() {
                    self.report(Error::ValueIsNotTemplate(span));
                    return Resolved::Error;
                }
                match self.enums[id.index()].member(name) {
                    Some(ordinal) => Resolved::EnumMember(id, ordinal),
                    None => {
                        self.report(Error::NameNotFound(name.to_owned(), span));
                        Resolved::Error
                    }
                }
            }
            Resolved::Error => Resolved::Error,
            _ => {
                self.report(Error::NameNotFound(name.to_owned(), span));
                Resolved::Error
            }
        }
    }

    pub(crate) fn member_access_allowed(
        &self,
        from: ScopeId,
        class: ClassId,
        visibility: Visibility,
    ) -> bool {
        let class_scope = self.classes[class.index()].scope;
        let accessible = self
            .scopes
            .enclosing_class(from)
            .map(|enclosing| self.class_with_ancestors(enclosing))
            .unwrap_or_default();
        scopes::member_access_allowed(&self.scopes, from, visibility, class_scope, &accessible, class)
    }

    // ------------------------------------------------------------------
    // Constant evaluation
    // ------------------------------------------------------------------

    pub(crate) fn eval_const(
        &mut self,
        scope: ScopeId,
        expr: &ast::Spanned<ast::Expr<'src>>,
    ) -> Result<CtValue, Error> {
        let mut env = SessionConstEnv {
            session: self,
            scope,
        };
        Interpreter::new(&mut env).eval(expr)
    }

    // ------------------------------------------------------------------
    // Population: phase A (names), phase B (function signatures)
    // ------------------------------------------------------------------

    fn populate_items(&mut self, scope: ScopeId, items: &'src [ast::Item<'src>]) {
        for item in items {
            match item {
                ast::Item::Namespace(ns) => {
                    let child = self.namespace_scope(scope, ns.name, ns.span);
                    self.populate_items(child, &ns.items);
                }
                ast::Item::Class(decl) => {
                    self.register_class(scope, decl);
                }
                ast::Item::Enum(decl) => self.register_enum(scope, decl),
                ast::Item::Function(_) => {}
                ast::Item::Variables(decl) => self.register_globals(scope, decl),
                ast::Item::TypeAlias(decl) => self.register_typedef(scope, decl),
                ast::Item::StaticAssert(assert) => self.pending_asserts.push((scope, assert)),
                ast::Item::ClassTemplate(decl) => {
                    self.register_type_template(scope, decl, Visibility::Public);
                }
                ast::Item::FunctionTemplate(decl) => {
                    self.register_function_template(scope, decl, Visibility::Public);
                }
            }
        }
    }

    fn declare_item_functions(&mut self, scope: ScopeId, items: &'src [ast::Item<'src>]) {
        for item in items {
            match item {
                ast::Item::Namespace(ns) => {
                    let child = self.namespace_scope(scope, ns.name, ns.span);
                    self.declare_item_functions(child, &ns.items);
                }
                ast::Item::Function(decl) => {
                    self.declare_function(scope, decl, None, Visibility::Public);
                }
                _ => {}
            }
        }
    }

    fn namespace_scope(&mut self, parent: ScopeId, name: &'src str, span: Span) -> ScopeId {
        if let Some(entry) = self.scopes.lookup_in(parent, name) {
            match entry.value {
                Value::Namespace(existing) => return existing,
                _ => {
                    self.report(Error::Redefinition(name.to_owned(), span));
                    return self.scopes.child(parent, name);
                }
            }
        }
        let child = self.scopes.child(parent, name);
        self.scopes.insert_or_replace(
            parent,
            name,
            NameEntry {
                value: Value::Namespace(child),
                visibility: Visibility::Public,
                span,
            },
        );
        child
    }

    fn register_class(&mut self, scope: ScopeId, decl: &'src ast::ClassDecl<'src>) -> ClassId {
        let body = self.scopes.class_body(scope, decl.name, ClassId(0));
        let id = ClassId(self.classes.insert(Class::new(
            decl.name.to_owned(),
            body,
            ClassKind::from_attr(decl.kind),
            decl.span,
        )) as u32);
        self.scopes.get_mut(body).class = Some(id);
        let class = &mut self.classes[id.index()];
        class.decl = Some(decl);
        class.flags.set_keep_fields_order(decl.keep_fields_order);
        match &decl.non_sync {
            ast::NonSyncTag::None => {}
            ast::NonSyncTag::Always => class.non_sync = NonSyncState::Declared,
            ast::NonSyncTag::Expr(expr) => class.non_sync_expr = Some(expr),
        }
        if let Err(err) = self.scopes.insert(
            scope,
            decl.name,
            NameEntry {
                value: Value::Type(Type::Class(id)),
                visibility: Visibility::Public,
                span: decl.span,
            },
        ) {
            self.report(err);
        }
        self.pending_classes.push_back(id);
        id
    }

    fn register_enum(&mut self, scope: ScopeId, decl: &'src ast::EnumDecl<'src>) {
        let underlying = decl.underlying.map(|name| {
            let fundamental = Fundamental::from_name(name).unwrap_or(Fundamental::Invalid);
            if fundamental == Fundamental::Invalid {
                self.report(Error::NameIsNotTypeName(name.to_owned(), decl.span));
            }
            (fundamental, decl.span)
        });
        let underlying = underlying.filter(|(f, _)| *f != Fundamental::Invalid);
        let mut built = enums::build_enum(
            decl,
            underlying,
            self.options.pointer_size,
            &mut self.reporter,
        );
        let mut path = self.scopes.path_components(scope);
        path.push(decl.name.to_owned());
        built.path = path;
        let id = EnumId(self.enums.insert(built) as u32);
        if let Err(err) = self.scopes.insert(
            scope,
            decl.name,
            NameEntry {
                value: Value::Type(Type::Enum(id)),
                visibility: Visibility::Public,
                span: decl.span,
            },
        ) {
            self.report(err);
        }
    }

    fn register_globals(&mut self, scope: ScopeId, decl: &'src ast::VarsDecl<'src>) {
        for entry in decl.vars.iter() {
            if entry.is_reference && matches!(entry.mutability, ast::Mutability::Mut) {
                self.report(Error::MutableGlobalReferencesAreNotAllowed(entry.span));
            }
            let id = VariableId(self.variables.insert(Variable {
                name: entry.name.to_owned(),
                ty: Type::INVALID,
                value_type: if entry.is_reference {
                    ValueType::ReferenceImut
                } else {
                    ValueType::Value
                },
                constexpr_value: None,
                state: GlobalState::Declared,
                decl: Some(GlobalVarDecl {
                    ty: &decl.ty,
                    entry,
                    scope,
                }),
                span: entry.span,
            }) as u32);
            if let Err(err) = self.scopes.insert(
                scope,
                entry.name,
                NameEntry {
                    value: Value::Variable(id),
                    visibility: Visibility::Public,
                    span: entry.span,
                },
            ) {
                self.report(err);
            }
        }
    }

    fn register_typedef(&mut self, scope: ScopeId, decl: &'src ast::TypeAliasDecl<'src>) {
        let id = TypedefId(self.typedefs.insert(Typedef {
            name: decl.name.to_owned(),
            decl,
            scope,
            state: GlobalState::Declared,
            resolved: None,
        }) as u32);
        if let Err(err) = self.scopes.insert(
            scope,
            decl.name,
            NameEntry {
                value: Value::Typedef(id),
                visibility: Visibility::Public,
                span: decl.span,
            },
        ) {
            self.report(err);
        }
    }

    fn register_type_template(
        &mut self,
        scope: ScopeId,
        decl: &'src ast::TemplateDecl<'src, ast::ClassDecl<'src>>,
        visibility: Visibility,
    ) {
        self.check_template_signature(decl.params.iter(), decl.signature.as_deref(), decl.span);
        let id = TemplateId(self.templates.insert(Template {
            name: decl.decl.name.to_owned(),
            scope,
            kind: TemplateKind::Class(decl),
            visibility,
            span: decl.span,
        }) as u32);
        match self.scopes.lookup_in(scope, decl.decl.name).cloned() {
            Some(entry) => match entry.value {
                Value::TypeTemplates(mut ids) => {
                    // Same-signature redefinition check is structural on
                    // the signature length here.
                    let same = ids.iter().any(|existing| {
                        self.templates[existing.index()].signature().len()
                            == self.templates[id.index()].signature().len()
                    });
                    if same {
                        self.report(Error::TypeTemplateRedefinition(
                            decl.decl.name.to_owned(),
                            decl.span,
                        ));
                    }
                    ids.push(id);
                    self.scopes.insert_or_replace(
                        scope,
                        decl.decl.name,
                        NameEntry {
                            value: Value::TypeTemplates(ids),
                            ..entry
                        },
                    );
                }
                _ => self.report(Error::Redefinition(decl.decl.name.to_owned(), decl.span)),
            },
            None => {
                self.scopes.insert_or_replace(
                    scope,
                    decl.decl.name,
                    NameEntry {
                        value: Value::TypeTemplates(SmallVec::from_iter([id])),
                        visibility,
                        span: decl.span,
                    },
                );
            }
        }
    }

    fn register_function_template(
        &mut self,
        scope: ScopeId,
        decl: &'src ast::TemplateDecl<'src, ast::FnDecl<'src>>,
        visibility: Visibility,
    ) {
        if !matches!(decl.decl.virtual_spec, ast::VirtualSpec::None) {
            self.report(Error::VirtualForFunctionTemplate(
                decl.decl.name.as_str().to_owned(),
                decl.span,
            ));
        }
        let id = TemplateId(self.templates.insert(Template {
            name: decl.decl.name.as_str().to_owned(),
            scope,
            kind: TemplateKind::Function(decl),
            visibility,
            span: decl.span,
        }) as u32);
        let set = self.function_set_for(scope, decl.decl.name.as_str(), visibility, decl.span);
        self.function_sets[set.index()].templates.push(id);
    }

    fn check_template_signature(
        &mut self,
        params: impl Iterator<Item = &'src ast::TemplateParam<'src>>,
        signature: Option<&'src [ast::SignatureParam<'src>]>,
        span: Span,
    ) {
        let Some(signature) = signature else {
            return;
        };
        let mut seen_default = false;
        for param in signature {
            match &param.default {
                Some(_) => seen_default = true,
                None if seen_default => {
                    self.report(Error::MandatoryTemplateSignatureArgumentAfterOptionalArgument(
                        span,
                    ));
                }
                None => {}
            }
        }
        for param in params {
            let used = signature
                .iter()
                .any(|sig| type_name_mentions(&sig.param, param.name));
            if !used {
                self.report(Error::TemplateArgumentNotUsedInSignature(
                    param.name.to_owned(),
                    param.span,
                ));
            }
        }
    }

    // ------------------------------------------------------------------
    // Function declaration
    // ------------------------------------------------------------------

    fn function_set_for(
        &mut self,
        scope: ScopeId,
        name: &str,
        visibility: Visibility,
        span: Span,
    ) -> FunctionSetId {
        if let Some(entry) = self.scopes.lookup_in(scope, name) {
            match entry.value {
                Value::Functions(set) => {
                    if entry.visibility != visibility {
                        self.report(Error::FunctionsVisibilityMismatch(name.to_owned(), span));
                    }
                    return set;
                }
                _ => {
                    self.report(Error::Redefinition(name.to_owned(), span));
                }
            }
        }
        let class = self.scopes.get(scope).class;
        let set = FunctionSetId(self.function_sets.insert(FunctionSet {
            functions: SmallVec::new(),
            templates: SmallVec::new(),
            class,
        }) as u32);
        self.scopes.insert_or_replace(
            scope,
            name,
            NameEntry {
                value: Value::Functions(set),
                visibility,
                span,
            },
        );
        set
    }

    pub(crate) fn declare_function(
        &mut self,
        scope: ScopeId,
        decl: &'src ast::FnDecl<'src>,
        owner: Option<ClassId>,
        visibility: Visibility,
    ) -> Option<FunctionId> {
        let name = decl.name.as_str().to_owned();
        let is_special = matches!(decl.name, ast::FnName::Constructor | ast::FnName::Destructor);
        let is_operator = matches!(decl.name, ast::FnName::Operator(_));

        if owner.is_none() && is_special {
            self.report(Error::ConstructorOrDestructorOutsideClass(decl.span));
            return None;
        }
        if owner.is_none() && is_operator {
            self.report(Error::OperatorDeclarationOutsideClass(decl.span));
            return None;
        }
        if is_special {
            if decl.return_type.is_some() {
                self.report(Error::ConstructorAndDestructorMustReturnVoid(decl.span));
            }
            if decl.this_param.is_some_and(|p| p.by_value) {
                self.report(Error::ByvalThisForConstructorOrDestructor(decl.span));
            }
            if decl.is_generator {
                self.report(Error::CoroutineSpecialMethod(decl.span));
            }
        }
        if matches!(decl.name, ast::FnName::Destructor) && !decl.params.is_empty() {
            self.report(Error::ExplicitArgumentsInDestructor(decl.span));
        }

        let calling_convention = match decl.calling_convention {
            None => CallingConvention::Default,
            Some(name) => match CallingConvention::from_name(name) {
                Some(cc) => cc,
                None => {
                    self.report(Error::UnknownCallingConvention(name.to_owned(), decl.span));
                    CallingConvention::Default
                }
            },
        };

        // Receiver handling: explicit `this` for methods, implicit for
        // constructors and destructors.
        let is_this_call = decl.this_param.is_some() || is_special;
        let mut params = Vec::new();
        let mut param_types = Vec::new();
        if is_this_call {
            let Some(owner) = owner else {
                self.report(Error::ThisInNonclassFunction(name.clone(), decl.span));
                return None;
            };
            let mutability = decl
                .this_param
                .map(|p| p.mutability)
                .unwrap_or(ast::Mutability::Mut);
            let by_value = decl.this_param.is_some_and(|p| p.by_value);
            let value_type = if by_value {
                ValueType::Value
            } else if matches!(mutability, ast::Mutability::Mut) {
                ValueType::ReferenceMut
            } else {
                ValueType::ReferenceImut
            };
            params.push(FunctionParam {
                ty: Type::Class(owner),
                value_type,
            });
            param_types.push(Type::Class(owner));
        }
        for param in decl.params.iter() {
            let ty = self.resolve_type_name(scope, &param.ty);
            params.push(FunctionParam {
                ty: ty.clone(),
                value_type: ValueType::from_modifier(param.value),
            });
            param_types.push(ty);
        }

        let ret = match &decl.return_type {
            Some(ty) => self.resolve_type_name(scope, ty),
            None => Type::VOID,
        };

        self.check_reference_notation(decl, params.len());
        if is_operator {
            self.check_operator_signature(decl, owner, &params, &ret);
        }

        if is_this_call && calling_convention != CallingConvention::Default {
            self.report(Error::NonDefaultCallingConventionForClassMethod(decl.span));
        }
        if decl.is_generator && calling_convention != CallingConvention::Default {
            self.report(Error::NonDefaultCallingConventionForCoroutine(decl.span));
        }
        if decl.is_constexpr {
            if decl.body.is_none() {
                self.report(Error::ConstexprFunctionsMustHaveBody(decl.span));
            }
            if !matches!(decl.virtual_spec, ast::VirtualSpec::None) {
                self.report(Error::ConstexprFunctionCanNotBeVirtual(decl.span));
            }
        }
        if decl.is_generator && !matches!(decl.virtual_spec, ast::VirtualSpec::None) {
            self.report(Error::VirtualCoroutine(decl.span));
        }
        if owner.is_none() && !matches!(decl.virtual_spec, ast::VirtualSpec::None) {
            self.report(Error::VirtualForNonclassFunction(name.clone(), decl.span));
        }
        if decl.no_mangle && !self.scopes.path_components(scope).is_empty() {
            self.report(Error::NoMangleForNonglobalFunction(name.clone(), decl.span));
        }

        let ty = Rc::new(FunctionType {
            params: params.into_boxed_slice(),
            ret,
            ret_value: ValueType::from_modifier(decl.return_value),
            return_references: decl.return_references.clone(),
            references_pollution: decl.references_pollution.clone(),
            is_unsafe: decl.is_unsafe,
            calling_convention,
        });

        let has_body = matches!(decl.body, Some(ast::FnBody::Regular { .. }));
        let is_generated = matches!(decl.body, Some(ast::FnBody::Generated));
        let is_deleted = matches!(decl.body, Some(ast::FnBody::Deleted));

        let set = self.function_set_for(scope, decl.name.as_str(), visibility, decl.span);

        // Same signature already present: prototype/body pairing.
        let existing = self.function_sets[set.index()]
            .functions
            .iter()
            .copied()
            .find(|id| self.functions[id.index()].ty.same_signature(&ty));
        if let Some(existing) = existing {
            let old = &self.functions[existing.index()];
            if old.has_body && has_body {
                self.report(Error::FunctionBodyDuplication(name, decl.span));
                return Some(existing);
            }
            if !old.has_body && has_body {
                let old = &mut self.functions[existing.index()];
                old.has_body = true;
                old.decl = Some(decl);
                old.span = decl.span;
                self.pending_functions.push_back(existing);
                return Some(existing);
            }
            self.report(Error::FunctionPrototypeDuplication(name, decl.span));
            return Some(existing);
        }

        let mangled_name = if decl.no_mangle {
            name.clone()
        } else {
            let path = self.scopes.path_components(scope);
            let mangled = match decl.name {
                ast::FnName::Named(plain) => MangledName::Plain(plain),
                ast::FnName::Constructor => MangledName::Constructor,
                ast::FnName::Destructor => MangledName::Destructor,
                ast::FnName::Operator(op) => MangledName::Operator(op),
            };
            self.mangler
                .mangle_function(self, &path, mangled, &ty, &param_types)
        };

        let id = FunctionId(self.functions.insert(Function {
            name,
            ty,
            params: param_types.into_boxed_slice(),
            owner_class: owner,
            visibility,
            is_this_call,
            is_constexpr: decl.is_constexpr,
            is_generator: decl.is_generator,
            no_mangle: decl.no_mangle,
            virtual_kind: VirtualKind::None,
            virtual_table_index: None,
            has_body,
            is_generated,
            is_deleted,
            decl: Some(decl),
            parent_scope: scope,
            mangled_name: Some(mangled_name),
            span: decl.span,
        }) as u32);
        self.function_sets[set.index()].functions.push(id);
        if has_body || is_generated {
            self.pending_functions.push_back(id);
        }
        Some(id)
    }

    fn check_reference_notation(&mut self, decl: &ast::FnDecl<'src>, param_count: usize) {
        let count = param_count as u32;
        for pollution in decl.references_pollution.iter() {
            for side in [pollution.dst, pollution.src] {
                if u32::from(side.param) >= count {
                    self.report(Error::ParamNumberOutOfRange {
                        param: u32::from(side.param),
                        count,
                        span: decl.span,
                    });
                }
            }
            if pollution.dst == pollution.src {
                self.report(Error::SelfReferencePollution(decl.span));
            }
            if matches!(decl.name, ast::FnName::Constructor)
                && pollution.dst.param == 0
                && pollution.dst.tag.is_none()
            {
                self.report(Error::ConstructorThisReferencePollution(decl.span));
            }
        }
        for reference in decl.return_references.iter() {
            if u32::from(reference.param) >= count {
                self.report(Error::ParamNumberOutOfRange {
                    param: u32::from(reference.param),
                    count,
                    span: decl.span,
                });
            }
        }
    }

    fn check_operator_signature(
        &mut self,
        decl: &ast::FnDecl<'src>,
        owner: Option<ClassId>,
        params: &[FunctionParam],
        ret: &Type,
    ) {
        use ast::OverloadedOperator as Op;
        let ast::FnName::Operator(op) = decl.name else {
            return;
        };
        let Some(owner) = owner else {
            return;
        };
        let owner_ty = Type::Class(owner);
        if !params.iter().any(|p| p.ty == owner_ty) {
            self.report(Error::OperatorDoesNotHaveParentClassArguments(decl.span));
        }
        let expected_arity = match op {
            Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Rem | Op::Equals | Op::Compare
            | Op::Assign | Op::Indexing => Some(2),
            Op::Call => None,
        };
        if let Some(expected) = expected_arity {
            if params.len() != expected {
                self.report(Error::InvalidArgumentCountForOperator(decl.span));
            }
        }
        match op {
            Op::Equals => {
                if *ret != Type::BOOL {
                    self.report(Error::InvalidReturnTypeForOperator("bool".into(), decl.span));
                }
            }
            Op::Assign => {
                if !ret.is_void() {
                    self.report(Error::InvalidReturnTypeForOperator("void".into(), decl.span));
                }
                if !params
                    .first()
                    .is_some_and(|p| p.value_type.is_mutable_reference())
                {
                    self.report(Error::InvalidFirstParamValueTypeForAssignmentLikeOperator(
                        decl.span,
                    ));
                }
            }
            _ => {}
        }
    }

    // ------------------------------------------------------------------
    // Globals and typedefs
    // ------------------------------------------------------------------

    pub(crate) fn ensure_typedef(&mut self, id: TypedefId, span: Span) -> Option<Type> {
        match self.typedefs[id.index()].state {
            GlobalState::Complete => return self.typedefs[id.index()].resolved.clone(),
            GlobalState::InProgress => {
                let name = self.typedefs[id.index()].name.clone();
                self.report(Error::GlobalsLoopDetected(name, span));
                return None;
            }
            GlobalState::Declared => {}
        }
        self.typedefs[id.index()].state = GlobalState::InProgress;
        let decl = self.typedefs[id.index()].decl;
        let scope = self.typedefs[id.index()].scope;
        let ty = self.resolve_type_name(scope, &decl.ty);
        let typedef = &mut self.typedefs[id.index()];
        typedef.resolved = Some(ty.clone());
        typedef.state = GlobalState::Complete;
        Some(ty)
    }

    pub(crate) fn ensure_global(&mut self, id: VariableId, span: Span) {
        match self.variables[id.index()].state {
            GlobalState::Complete => return,
            GlobalState::InProgress => {
                let name = self.variables[id.index()].name.clone();
                self.report(Error::GlobalsLoopDetected(name, span));
                return;
            }
            GlobalState::Declared => {}
        }
        self.variables[id.index()].state = GlobalState::InProgress;
        let Some(decl) = self.variables[id.index()].decl else {
            self.variables[id.index()].state = GlobalState::Complete;
            return;
        };
        let ty = self.resolve_type_name(decl.scope, decl.ty);
        let value = match &decl.entry.initializer {
            Some(ast::Initializer::Expression(expr)) => match self.eval_const(decl.scope, expr) {
                Ok(value) => {
                    if !ty.matches(&value.ty) {
                        self.report(Error::TypesMismatch {
                            expected: self.type_name(&ty),
                            got: self.type_name(&value.ty),
                            span: decl.entry.span,
                        });
                        None
                    } else {
                        Some(value.value)
                    }
                }
                Err(err) => {
                    self.report(Error::VariableInitializerIsNotConstantExpression(
                        err.span(),
                    ));
                    None
                }
            },
            Some(ast::Initializer::Zero(_)) => match classes::zero_value(&ty) {
                Some(value) => Some(value),
                None => {
                    self.report(Error::ZeroInitializerForClass(decl.entry.span));
                    None
                }
            },
            Some(other) => {
                self.report(Error::VariableInitializerIsNotConstantExpression(
                    other.span(),
                ));
                None
            }
            None => {
                self.report(Error::ExpectedInitializer(
                    decl.entry.name.to_owned(),
                    decl.entry.span,
                ));
                None
            }
        };
        let variable = &mut self.variables[id.index()];
        variable.ty = ty;
        variable.constexpr_value = value;
        variable.state = GlobalState::Complete;
        if matches!(decl.entry.mutability, ast::Mutability::Constexpr)
            && self.variables[id.index()].constexpr_value.is_none()
        {
            self.report(Error::InvalidTypeForConstantExpressionVariable(
                decl.entry.span,
            ));
        }
    }

    // ------------------------------------------------------------------
    // Scope completion
    // ------------------------------------------------------------------

    fn complete_scope(&mut self, scope: ScopeId) {
        let names: Vec<String> = self
            .scopes
            .get(scope)
            .entries()
            .map(|(name, _)| name.to_owned())
            .collect();
        for name in names {
            let Some(entry) = self.scopes.lookup_in(scope, &name) else {
                continue;
            };
            let span = entry.span;
            match entry.value.clone() {
                Value::Namespace(child) => self.complete_scope(child),
                Value::Type(Type::Class(id)) => self.ensure_class_complete(id, span),
                Value::Typedef(id) => {
                    self.ensure_typedef(id, span);
                }
                Value::Variable(id) => {
                    self.ensure_global(id, span);
                    self.emit_global(id);
                }
                _ => {}
            }
            self.drain_queues();
        }
        let asserts = std::mem::take(&mut self.pending_asserts);
        for (assert_scope, assert) in asserts {
            self.eval_static_assert(assert_scope, assert);
        }
    }

    pub(crate) fn eval_static_assert(&mut self, scope: ScopeId, assert: &'src ast::StaticAssert<'src>) {
        match self.eval_const(scope, &assert.expr) {
            Ok(value) => match value.value {
                ConstValue::Bool(true) => {}
                ConstValue::Bool(false) => self.report(Error::StaticAssertionFailed(assert.span)),
                _ => self.report(Error::StaticAssertExpressionMustHaveBoolType(assert.span)),
            },
            Err(Error::StaticAssertExpressionMustHaveBoolType(span)) => {
                self.report(Error::StaticAssertExpressionMustHaveBoolType(span));
            }
            // Evaluation errors with a meaning of their own keep their
            // code; only a genuinely non-constant expression collapses
            // into the generic one.
            Err(err @ Error::ConstantExpressionResultIsUndefined(_)) => self.report(err),
            Err(_) => self.report(Error::StaticAssertExpressionIsNotConstant(assert.span)),
        }
    }

    fn emit_global(&mut self, id: VariableId) {
        if !self.emitted_globals.insert(id) {
            return;
        }
        let variable = &self.variables[id.index()];
        let scope = variable.decl.map(|d| d.scope);
        let path = scope.map_or_else(Vec::new, |s| self.scopes.path_components(s));
        let name = self
            .mangler
            .mangle_global_variable(&path, &self.variables[id.index()].name);
        let variable = &self.variables[id.index()];
        self.module.globals.push(ir::Global {
            name,
            ty: variable.ty.clone(),
            init: variable.constexpr_value.clone(),
            is_mutable: variable
                .decl
                .is_some_and(|d| matches!(d.entry.mutability, ast::Mutability::Mut)),
        });
    }

    pub(crate) fn drain_queues(&mut self) {
        loop {
            if let Some(class) = self.pending_classes.pop_front() {
                let span = self.classes[class.index()].span;
                self.ensure_class_complete(class, span);
                continue;
            }
            if let Some(function) = self.pending_functions.pop_front() {
                self.lower_pending_function(function);
                continue;
            }
            break;
        }
    }

    fn lower_pending_function(&mut self, id: FunctionId) {
        if !self.lowered.insert(id) {
            return;
        }
        debug!("lowering function {}", self.functions[id.index()].name);
        if let Some(function) = lower::lower_function(self, id) {
            self.module.functions.push(function);
        }
    }

    // ------------------------------------------------------------------
    // Class completion
    // ------------------------------------------------------------------

    pub(crate) fn ensure_class_complete(&mut self, id: ClassId, span: Span) {
        match self.classes[id.index()].completeness {
            Completeness::Complete => return,
            Completeness::InProgress => {
                let name = self.classes[id.index()].name.clone();
                self.report(Error::GlobalsLoopDetected(name, span));
                return;
            }
            Completeness::Incomplete => {}
        }
        let Some(decl) = self.classes[id.index()].decl else {
            // Forward declaration that never received a body.
            self.report(Error::UsingIncompleteType(
                self.classes[id.index()].name.clone(),
                span,
            ));
            return;
        };
        self.classes[id.index()].completeness = Completeness::InProgress;
        let body_scope = self.classes[id.index()].scope;

        // Errors inside an instantiated template body carry the
        // instantiation as context.
        let in_template = self.classes[id.index()].template_args_text.is_some();
        if in_template {
            let name = self.classes[id.index()].name.clone();
            self.template_stack.push((name, self.classes[id.index()].span));
        }

        self.complete_class_parents(id, decl);
        self.complete_class_members(id, body_scope, decl);
        self.complete_class_non_sync(id, body_scope);
        self.synthesize_special_members(id, body_scope);
        self.build_virtual_table(id, body_scope);
        self.finish_class_layout(id);

        if in_template {
            self.template_stack.pop();
        }

        self.classes[id.index()].completeness = Completeness::Complete;
        self.emit_struct_layout(id);
    }

    fn complete_class_parents(&mut self, id: ClassId, decl: &'src ast::ClassDecl<'src>) {
        let own_kind = self.classes[id.index()].kind;
        let outer = self
            .scopes
            .get(self.classes[id.index()].scope)
            .parent
            .unwrap_or(self.classes[id.index()].scope);
        for (path, span) in decl.parents.iter() {
            let resolved = self.resolve_path_value(outer, path, *span);
            let parent = match resolved {
                Resolved::Type(Type::Class(parent)) => parent,
                Resolved::Error => continue,
                _ => {
                    self.report(Error::CanNotDeriveFromThisType(
                        path.components.last().map_or_else(String::new, |c| c.name.to_owned()),
                        *span,
                    ));
                    continue;
                }
            };
            self.ensure_class_complete(parent, *span);
            let parent_kind = self.classes[parent.index()].kind;
            if !parent_kind.is_inheritable() {
                self.report(Error::CanNotDeriveFromThisType(
                    self.classes[parent.index()].name.clone(),
                    *span,
                ));
                continue;
            }
            if own_kind == ClassKind::Interface && parent_kind != ClassKind::Interface {
                self.report(Error::BaseClassForInterface(*span));
                continue;
            }
            if self.classes[id.index()].parents.contains(&parent) {
                self.report(Error::DuplicatedParentClass(
                    self.classes[parent.index()].name.clone(),
                    *span,
                ));
                continue;
            }
            if parent_kind != ClassKind::Interface {
                if self.classes[id.index()].base.is_some() {
                    self.report(Error::DuplicatedBaseClass(
                        self.classes[parent.index()].name.clone(),
                        *span,
                    ));
                    continue;
                }
                self.classes[id.index()].base = Some(parent);
            }
            self.classes[id.index()].parents.push(parent);
        }
    }

    fn complete_class_members(
        &mut self,
        id: ClassId,
        body_scope: ScopeId,
        decl: &'src ast::ClassDecl<'src>,
    ) {
        let kind = self.classes[id.index()].kind;
        let mut visibility = Visibility::Public;
        for member in decl.members.iter() {
            match member {
                ast::ClassMember::VisibilityLabel(new_visibility, span) => {
                    if kind == ClassKind::Struct {
                        self.report(Error::VisibilityForStruct(
                            self.classes[id.index()].name.clone(),
                            *span,
                        ));
                    }
                    visibility = *new_visibility;
                }
                ast::ClassMember::Field(field) => {
                    self.complete_class_field(id, body_scope, field, visibility);
                }
                ast::ClassMember::Function(function) => {
                    self.declare_function(body_scope, function, Some(id), visibility);
                }
                ast::ClassMember::Class(nested) => {
                    self.register_class(body_scope, nested);
                }
                ast::ClassMember::Enum(nested) => self.register_enum(body_scope, nested),
                ast::ClassMember::Variables(vars) => self.register_globals(body_scope, vars),
                ast::ClassMember::TypeAlias(alias) => self.register_typedef(body_scope, alias),
                ast::ClassMember::StaticAssert(assert) => {
                    self.pending_asserts.push((body_scope, assert));
                }
                ast::ClassMember::ClassTemplate(template) => {
                    self.register_type_template(body_scope, template, visibility);
                }
                ast::ClassMember::FunctionTemplate(template) => {
                    self.register_function_template(body_scope, template, visibility);
                }
            }
        }
    }

    fn complete_class_field(
        &mut self,
        id: ClassId,
        body_scope: ScopeId,
        field: &'src ast::FieldDecl<'src>,
        visibility: Visibility,
    ) {
        if self.classes[id.index()].kind == ClassKind::Interface {
            self.report(Error::FieldsForInterfacesNotAllowed(field.span));
            return;
        }
        let mut ty = self.resolve_type_name(body_scope, &field.ty);
        ty.for_each_class(&mut |field_class| {
            self.pending_classes.push_back(field_class);
        });
        let field_class = match &ty {
            Type::Class(field_class) => Some(*field_class),
            _ => None,
        };
        if let Some(field_class) = field_class {
            self.ensure_class_complete(field_class, field.span);
            if !self.classes[field_class.index()].is_complete() && !field.is_reference {
                self.report(Error::UsingIncompleteType(
                    self.classes[field_class.index()].name.clone(),
                    field.span,
                ));
                // An incomplete field type has no layout; recording it
                // would make every later size walk recurse through the
                // class under completion.
                ty = Type::INVALID;
            }
        }
        if field.is_reference && self.type_has_references_inside(&ty) {
            self.report(Error::ReferenceFieldOfTypeWithReferencesInside(
                field.name.to_owned(),
                field.span,
            ));
        }
        let index = self.classes[id.index()].fields.len() as u32;
        let is_mutable = matches!(field.mutability, ast::Mutability::Mut);
        if field.is_reference {
            self.classes[id.index()].flags.set_references_inside(true);
            if is_mutable {
                self.classes[id.index()]
                    .flags
                    .set_mutable_references_inside(true);
            }
        } else if self.type_has_references_inside(&ty) {
            self.classes[id.index()].flags.set_references_inside(true);
        }
        self.classes[id.index()].fields.push(Field {
            name: field.name.to_owned(),
            ty,
            is_reference: field.is_reference,
            is_mutable,
            visibility,
            original_index: index,
            span: field.span,
        });
        if let Err(err) = self.scopes.insert(
            body_scope,
            field.name,
            NameEntry {
                value: Value::ClassField(crate::values::FieldId { class: id, index }),
                visibility,
                span: field.span,
            },
        ) {
            self.report(err);
        }
    }

    fn complete_class_non_sync(&mut self, id: ClassId, body_scope: ScopeId) {
        if let Some(expr) = self.classes[id.index()].non_sync_expr {
            match self.eval_const(body_scope, expr) {
                Ok(value) => {
                    if value.value == ConstValue::Bool(true) {
                        self.classes[id.index()].non_sync = NonSyncState::Declared;
                    }
                }
                Err(err) => self.report(err),
            }
        }
    }

    /// Gathers member functions of the class in declaration order.
    fn class_member_functions(&self, body_scope: ScopeId) -> Vec<FunctionId> {
        let mut out = Vec::new();
        for (_, entry) in self.scopes.get(body_scope).entries() {
            if let Value::Functions(set) = &entry.value {
                out.extend(self.function_sets[set.index()].functions.iter().copied());
            }
        }
        out
    }

    fn synthesize_special_members(&mut self, id: ClassId, body_scope: ScopeId) {
        let members = self.class_member_functions(body_scope);
        let mut user_constructors = Vec::new();
        let mut destructor = None;
        let mut has_noncopy_constructor = false;
        let mut has_copy_constructor = false;
        for &member in &members {
            let function = &self.functions[member.index()];
            if function.owner_class != Some(id) {
                continue;
            }
            if function.is_constructor() && !function.is_deleted {
                user_constructors.push(member);
                // A copy constructor takes exactly (this, imut ref to
                // the same class).
                let is_copy = function.ty.params.len() == 2
                    && function.ty.params[1].ty == Type::Class(id)
                    && function.ty.params[1].value_type == ValueType::ReferenceImut;
                if is_copy {
                    has_copy_constructor = true;
                } else if !function.is_generated {
                    has_noncopy_constructor = true;
                }
            }
            if function.is_destructor() {
                destructor = Some(member);
            }
        }
        if self.classes[id.index()].kind == ClassKind::Interface && !user_constructors.is_empty() {
            self.report(Error::ConstructorForInterface(self.classes[id.index()].span));
        }

        // A field can be defaulted either by its own initializer or by
        // the default constructor of its type. Reference fields cannot.
        let decl = self.classes[id.index()].decl;
        let all_fields_default_constructible =
            self.classes[id.index()].fields.iter().all(|field| {
                !field.is_reference
                    && (field_has_initializer(decl, &field.name)
                        || self.type_is_default_constructible(&field.ty))
            });

        if destructor.is_none() {
            let synthesized = self.synthesize_member(id, body_scope, SyntheticMember::Destructor);
            destructor = Some(synthesized);
        } else {
            self.classes[id.index()].flags.set_has_user_destructor(true);
        }
        if user_constructors.is_empty() && all_fields_default_constructible {
            let synthesized =
                self.synthesize_member(id, body_scope, SyntheticMember::DefaultConstructor);
            user_constructors.push(synthesized);
            self.classes[id.index()].flags.set_default_constructible(true);
        }

        // Structs get a field-wise copy constructor unless a field or an
        // explicit constructor forbids it.
        let fields_copyable = self.classes[id.index()]
            .fields
            .iter()
            .all(|f| !f.is_reference && self.type_is_copyable(&f.ty))
            || self.classes[id.index()].fields.iter().all(|f| f.is_reference);
        let copyable = match self.classes[id.index()].kind {
            ClassKind::Struct => fields_copyable && !has_noncopy_constructor,
            _ => has_copy_constructor,
        };
        self.classes[id.index()].flags.set_copy_constructible(copyable);
        self.classes[id.index()]
            .flags
            .set_has_explicit_noncopy_constructors(has_noncopy_constructor);
        if copyable && self.classes[id.index()].kind == ClassKind::Struct && !has_copy_constructor {
            let copy = self.synthesize_member(id, body_scope, SyntheticMember::CopyConstructor);
            user_constructors.push(copy);
        }

        self.classes[id.index()].constructors = user_constructors;
        self.classes[id.index()].destructor = destructor;
    }

    fn type_is_default_constructible(&self, ty: &Type) -> bool {
        match ty {
            Type::Class(id) => self.classes[id.index()].flags.default_constructible(),
            Type::Array(array) => {
                array.size == 0 || self.type_is_default_constructible(&array.elem)
            }
            Type::Tuple(elems) => elems.iter().all(|e| self.type_is_default_constructible(e)),
            _ => false,
        }
    }

    /// Declares a compiler-generated special member and queues its body
    /// for lowering.
    fn synthesize_member(&mut self, id: ClassId, body_scope: ScopeId, kind: SyntheticMember) -> FunctionId {
        let span = self.classes[id.index()].span;
        let name = match kind {
            SyntheticMember::Destructor => "destructor",
            SyntheticMember::DefaultConstructor | SyntheticMember::CopyConstructor => "constructor",
        };
        let mut params = vec![FunctionParam {
            ty: Type::Class(id),
            value_type: ValueType::ReferenceMut,
        }];
        if kind == SyntheticMember::CopyConstructor {
            params.push(FunctionParam {
                ty: Type::Class(id),
                value_type: ValueType::ReferenceImut,
            });
        }
        let param_types: Vec<Type> = params.iter().map(|p| p.ty.clone()).collect();
        let ty = Rc::new(FunctionType {
            params: params.into_boxed_slice(),
            ret: Type::VOID,
            ret_value: ValueType::Value,
            return_references: Box::new([]),
            references_pollution: Box::new([]),
            is_unsafe: false,
            calling_convention: CallingConvention::Default,
        });
        let path = self.scopes.path_components(body_scope);
        let mangled = self.mangler.mangle_function(
            self,
            &path,
            if kind == SyntheticMember::Destructor {
                MangledName::Destructor
            } else {
                MangledName::Constructor
            },
            &ty,
            &param_types,
        );
        let function = FunctionId(self.functions.insert(Function {
            name: name.to_owned(),
            ty,
            params: param_types.into_boxed_slice(),
            owner_class: Some(id),
            visibility: Visibility::Public,
            is_this_call: true,
            is_constexpr: false,
            is_generator: false,
            no_mangle: false,
            virtual_kind: VirtualKind::None,
            virtual_table_index: None,
            has_body: true,
            is_generated: true,
            is_deleted: false,
            decl: None,
            parent_scope: body_scope,
            mangled_name: Some(mangled),
            span,
        }) as u32);
        let set = self.function_set_for(body_scope, name, Visibility::Public, span);
        self.function_sets[set.index()].functions.push(function);
        self.pending_functions.push_back(function);
        function
    }

    fn build_virtual_table(&mut self, id: ClassId, body_scope: ScopeId) {
        let kind = self.classes[id.index()].kind;
        let mut table: Vec<VirtualTableSlot> = self.classes[id.index()]
            .base
            .map(|base| self.classes[base.index()].virtual_table.clone())
            .unwrap_or_default();
        // Interface parents contribute slots too.
        let parents = self.classes[id.index()].parents.clone();
        for parent in parents {
            if Some(parent) == self.classes[id.index()].base {
                continue;
            }
            for slot in self.classes[parent.index()].virtual_table.clone() {
                let exists = table
                    .iter()
                    .any(|s| s.name == slot.name && s.params == slot.params);
                if !exists {
                    table.push(slot);
                }
            }
        }

        let members = self.class_member_functions(body_scope);
        for member in members {
            let function = &self.functions[member.index()];
            if function.owner_class != Some(id) {
                continue;
            }
            let Some(decl) = function.decl else { continue };
            let spec = decl.virtual_spec;
            if matches!(spec, ast::VirtualSpec::None) && !kind.is_polymorph() {
                continue;
            }
            let name = function.name.clone();
            let fn_span = function.span;
            let visibility = function.visibility;
            let params: Box<[Type]> = function.params.iter().skip(1).cloned().collect();
            let is_this_call = function.is_this_call;
            let by_value_this = function
                .ty
                .params
                .first()
                .is_some_and(|p| p.value_type == ValueType::Value);
            let has_body = function.has_body;
            let is_destructor = function.is_destructor();
            let is_constructor = function.is_constructor();

            if !kind.is_polymorph() {
                self.report(Error::VirtualForNonpolymorphClass(name.clone(), fn_span));
                continue;
            }
            if !matches!(spec, ast::VirtualSpec::None) {
                if !is_this_call {
                    self.report(Error::VirtualForNonThisCallFunction(name.clone(), fn_span));
                    continue;
                }
                if by_value_this {
                    self.report(Error::VirtualForByvalThisFunction(name.clone(), fn_span));
                    continue;
                }
                if visibility == Visibility::Private {
                    self.report(Error::VirtualForPrivateFunction(name.clone(), fn_span));
                }
                if is_constructor {
                    self.report(Error::FunctionCanNotBeVirtual(name.clone(), fn_span));
                    continue;
                }
            }

            let existing = table
                .iter()
                .position(|slot| slot.name == name && *slot.params == *params);
            match (existing, spec) {
                (Some(index), ast::VirtualSpec::Override | ast::VirtualSpec::Final) => {
                    if table[index].is_final {
                        self.report(Error::OverrideFinalFunction(name.clone(), fn_span));
                        continue;
                    }
                    let slot = &mut table[index];
                    slot.function = member;
                    slot.is_pure = false;
                    slot.is_final = matches!(spec, ast::VirtualSpec::Final);
                    self.functions[member.index()].virtual_kind = VirtualKind::Override {
                        is_final: slot.is_final,
                    };
                    self.functions[member.index()].virtual_table_index = Some(index as u32);
                }
                (
                    Some(_),
                    ast::VirtualSpec::None | ast::VirtualSpec::Virtual | ast::VirtualSpec::Pure,
                ) => {
                    self.report(Error::OverrideRequired(name.clone(), fn_span));
                }
                (None, ast::VirtualSpec::None) => {}
                (None, ast::VirtualSpec::Override) => {
                    self.report(Error::FunctionDoesNotOverride(name.clone(), fn_span));
                }
                (None, ast::VirtualSpec::Final) => {
                    self.report(Error::FinalForFirstVirtualFunction(name.clone(), fn_span));
                }
                (None, ast::VirtualSpec::Virtual | ast::VirtualSpec::Pure) => {
                    let is_pure = matches!(spec, ast::VirtualSpec::Pure);
                    if is_pure && has_body {
                        self.report(Error::BodyForPureVirtualFunction(name.clone(), fn_span));
                    }
                    if is_pure && is_destructor {
                        self.report(Error::PureDestructor(
                            self.classes[id.index()].name.clone(),
                            fn_span,
                        ));
                    }
                    if kind == ClassKind::Interface && !is_pure {
                        self.report(Error::NonPureVirtualFunctionInInterface(
                            name.clone(),
                            fn_span,
                        ));
                    }
                    let index = table.len() as u32;
                    table.push(VirtualTableSlot {
                        name: name.clone(),
                        params,
                        function: member,
                        is_pure,
                        is_final: false,
                    });
                    self.functions[member.index()].virtual_kind = VirtualKind::New {
                        is_final: false,
                        is_pure,
                    };
                    self.functions[member.index()].virtual_table_index = Some(index);
                }
            }
        }

        if !kind.is_abstract() && table.iter().any(|slot| slot.is_pure) {
            self.report(Error::ClassContainsPureVirtualFunctions(
                self.classes[id.index()].name.clone(),
                self.classes[id.index()].span,
            ));
        }
        self.classes[id.index()].virtual_table = table;
    }

    fn finish_class_layout(&mut self, id: ClassId) {
        let keep = self.classes[id.index()].flags.keep_fields_order();
        let mut order: Vec<u32> = (0..self.classes[id.index()].fields.len() as u32).collect();
        if !keep {
            // Largest fields first; stable, so equal sizes keep their
            // declaration order.
            let sizes: Vec<u64> = self.classes[id.index()]
                .fields
                .iter()
                .map(|f| {
                    if f.is_reference {
                        u64::from(self.options.pointer_size)
                    } else {
                        self.type_size(&f.ty)
                    }
                })
                .collect();
            order.sort_by_key(|&i| std::cmp::Reverse(sizes[i as usize]));
        }
        self.classes[id.index()].field_order = order;
    }

    fn emit_struct_layout(&mut self, id: ClassId) {
        let class = &self.classes[id.index()];
        let fields = class
            .ordered_fields()
            .map(|f| ir::StructField {
                name: f.name.clone(),
                ty: f.ty.clone(),
                is_reference: f.is_reference,
            })
            .collect();
        let has_vtable_pointer = class.kind.is_polymorph();
        let name = self.scopes.qualified_name(
            self.scopes.get(class.scope).parent.unwrap_or(class.scope),
            &class.name,
        );
        self.module.structs.push(ir::StructLayout {
            class: id,
            name,
            fields,
            has_vtable_pointer,
            tbaa_tag: None,
        });
    }

    // ------------------------------------------------------------------
    // Template instantiation
    // ------------------------------------------------------------------

    fn eval_template_args(
        &mut self,
        scope: ScopeId,
        args: &[ast::TemplateArg<'src>],
        span: Span,
    ) -> Option<Vec<TemplateArgKey>> {
        let mut keys = Vec::with_capacity(args.len());
        for arg in args {
            match arg {
                ast::TemplateArg::Type(name) => {
                    let ty = self.resolve_type_name(scope, name);
                    if ty.is_invalid() {
                        return None;
                    }
                    keys.push(TemplateArgKey::Type(ty));
                }
                ast::TemplateArg::Expr(expr) => match self.eval_const(scope, expr) {
                    Ok(value) => {
                        if matches!(value.value, ConstValue::Float(_)) {
                            self.report(Error::InvalidTypeOfTemplateVariableArgument(
                                self.type_name(&value.ty),
                                span,
                            ));
                            return None;
                        }
                        keys.push(TemplateArgKey::Value {
                            ty: value.ty,
                            value: value.value,
                        });
                    }
                    Err(err) => {
                        self.report(err);
                        return None;
                    }
                },
            }
        }
        Some(keys)
    }

    fn instantiate_type_template(
        &mut self,
        scope: ScopeId,
        candidates: &[TemplateId],
        args: &[ast::TemplateArg<'src>],
        span: Span,
    ) -> Option<Type> {
        let keys = self.eval_template_args(scope, args, span)?;

        // Deduce against every candidate's signature; viable candidates
        // are ranked by specialization.
        let mut viable: Vec<(TemplateId, Vec<TemplateArgKey>)> = Vec::new();
        for &candidate in candidates {
            if let Some(deduced) = self.try_deduce_template(candidate, &keys) {
                viable.push((candidate, deduced));
            }
        }
        if viable.is_empty() {
            self.report(Error::TemplateParametersDeductionFailed(span));
            return None;
        }
        let selected = if viable.len() == 1 {
            0
        } else {
            match self.most_specialized(&viable) {
                Some(index) => index,
                None => {
                    self.report(Error::CouldNotSelectMoreSpecializedTypeTemplate(span));
                    return None;
                }
            }
        };
        let (template, deduced) = viable.swap_remove(selected);
        self.instantiate_class_template(template, deduced)
    }

    fn try_deduce_template(
        &mut self,
        template: TemplateId,
        keys: &[TemplateArgKey],
    ) -> Option<Vec<TemplateArgKey>> {
        let signature = self.templates[template.index()].signature();
        if keys.len() > signature.len() {
            return None;
        }
        let template_scope = self.templates[template.index()].scope;
        let mut deduced = templates::fresh_deduced(&self.templates[template.index()]);

        match signature {
            Signature::Short(params) => {
                if keys.len() != params.len() {
                    return None;
                }
                for (param, key) in params.iter().zip(keys) {
                    match (&param.kind, key) {
                        (ast::TemplateParamKind::Type, TemplateArgKey::Type(_)) => {
                            deduced.insert(param.name, Some(key.clone()));
                        }
                        (ast::TemplateParamKind::Variable(_), TemplateArgKey::Value { .. }) => {
                            deduced.insert(param.name, Some(key.clone()));
                        }
                        _ => return None,
                    }
                }
            }
            Signature::Explicit(params) => {
                for (index, sig_param) in params.iter().enumerate() {
                    let key = match keys.get(index) {
                        Some(key) => key.clone(),
                        None => match &sig_param.default {
                            Some(default) => {
                                let ty = self.resolve_type_name(template_scope, default);
                                TemplateArgKey::Type(ty)
                            }
                            None => return None,
                        },
                    };
                    match &key {
                        TemplateArgKey::Type(actual) => {
                            let mut env = SessionDeduceEnv { session: self };
                            let matched = templates::deduce_type(
                                &sig_param.param,
                                actual,
                                &mut deduced,
                                &mut env,
                                template_scope,
                            )
                            .unwrap_or(false);
                            if !matched {
                                return None;
                            }
                        }
                        TemplateArgKey::Value { .. } => {
                            // A value argument matches a bare parameter
                            // name pattern.
                            if let ast::TypeName::Path((path, _)) = &sig_param.param {
                                if let Some(name) = path.as_single_ident() {
                                    if deduced.contains_key(name) {
                                        deduced.insert(name, Some(key.clone()));
                                        continue;
                                    }
                                }
                            }
                            return None;
                        }
                    }
                }
            }
        }

        deduced.into_values().collect()
    }

    fn most_specialized(&self, viable: &[(TemplateId, Vec<TemplateArgKey>)]) -> Option<usize> {
        use crate::overload::ConversionsCompareResult::*;
        'outer: for (i, (left, _)) in viable.iter().enumerate() {
            for (j, (right, _)) in viable.iter().enumerate() {
                if i == j {
                    continue;
                }
                if self.compare_template_signatures(*left, *right) != LeftIsBetter {
                    continue 'outer;
                }
            }
            return Some(i);
        }
        None
    }

    fn compare_template_signatures(
        &self,
        left: TemplateId,
        right: TemplateId,
    ) -> crate::overload::ConversionsCompareResult {
        use crate::overload::ConversionsCompareResult::*;
        let left_template = &self.templates[left.index()];
        let right_template = &self.templates[right.index()];
        let left_params: Vec<&str> = left_template.param_names().collect();
        let right_params: Vec<&str> = right_template.param_names().collect();
        let (Signature::Explicit(left_sig), Signature::Explicit(right_sig)) =
            (left_template.signature(), right_template.signature())
        else {
            return Same;
        };
        if left_sig.len() != right_sig.len() {
            return Incomparable;
        }
        let mut result = Same;
        for (l, r) in left_sig.iter().zip(right_sig) {
            let step =
                templates::specialization_compare(&l.param, &left_params, &r.param, &right_params);
            result = match (result, step) {
                (Same, step) => step,
                (acc, Same) => acc,
                (LeftIsBetter, LeftIsBetter) => LeftIsBetter,
                (RightIsBetter, RightIsBetter) => RightIsBetter,
                _ => return Incomparable,
            };
        }
        result
    }

    fn instantiate_class_template(
        &mut self,
        template: TemplateId,
        keys: Vec<TemplateArgKey>,
    ) -> Option<Type> {
        let cache_key: CacheKey = (template, keys.clone().into_boxed_slice());
        if let Some(ty) = self.type_template_cache.get(&cache_key) {
            return Some(ty.clone());
        }

        let decl = match &self.templates[template.index()].kind {
            TemplateKind::Class(decl) => *decl,
            TemplateKind::Function(_) => return None,
        };
        let template_scope = self.templates[template.index()].scope;
        let base_name = self.templates[template.index()].name.clone();
        let args_text =
            templates::args_display(&keys, |ty| self.type_name(ty));
        let instance_name = format!("{base_name}{args_text}");

        // Bind the arguments in a scope between the declaration scope
        // and the instantiated class body.
        let args_scope = self.scopes.child(template_scope, instance_name.clone());
        self.bind_template_params(args_scope, template, &keys);

        let body = self.scopes.class_body(args_scope, decl.decl.name, ClassId(0));
        let id = ClassId(self.classes.insert(Class::new(
            instance_name.clone(),
            body,
            ClassKind::from_attr(decl.decl.kind),
            decl.decl.span,
        )) as u32);
        self.scopes.get_mut(body).class = Some(id);
        let class = &mut self.classes[id.index()];
        class.decl = Some(&decl.decl);
        class.template_args_text = Some(args_text);
        class.flags.set_keep_fields_order(decl.decl.keep_fields_order);
        match &decl.decl.non_sync {
            ast::NonSyncTag::None => {}
            ast::NonSyncTag::Always => class.non_sync = NonSyncState::Declared,
            ast::NonSyncTag::Expr(expr) => class.non_sync_expr = Some(expr),
        }

        let ty = Type::Class(id);
        // Memoize before completion so recursive uses inside the body
        // see the same identity.
        self.type_template_cache.insert(cache_key, ty.clone());
        self.pending_classes.push_back(id);
        Some(ty)
    }

    fn bind_template_params(
        &mut self,
        args_scope: ScopeId,
        template: TemplateId,
        keys: &[TemplateArgKey],
    ) {
        let params: Vec<(&'src str, Span)> = self.templates[template.index()]
            .params()
            .iter()
            .map(|p| (p.name, p.span))
            .collect();
        for ((name, span), key) in params.into_iter().zip(keys) {
            let value = match key {
                TemplateArgKey::Type(ty) => Value::Type(ty.clone()),
                TemplateArgKey::Value { ty, value } => {
                    let id = VariableId(self.variables.insert(Variable {
                        name: name.to_owned(),
                        ty: ty.clone(),
                        value_type: ValueType::Value,
                        constexpr_value: Some(value.clone()),
                        state: GlobalState::Complete,
                        decl: None,
                        span,
                    }) as u32);
                    Value::Variable(id)
                }
            };
            self.scopes.insert_or_replace(
                args_scope,
                name,
                NameEntry {
                    value,
                    visibility: Visibility::Public,
                    span,
                },
            );
        }
    }

    fn instantiate_function_template_explicit(
        &mut self,
        scope: ScopeId,
        set: FunctionSetId,
        args: &[ast::TemplateArg<'src>],
        span: Span,
    ) -> Resolved {
        let templates: Vec<TemplateId> = self.function_sets[set.index()].templates.to_vec();
        if templates.is_empty() {
            self.report(Error::ValueIsNotTemplate(span));
            return Resolved::Error;
        }
        let Some(keys) = self.eval_template_args(scope, args, span) else {
            return Resolved::Error;
        };
        for template in templates {
            let params = self.templates[template.index()].params();
            if params.len() != keys.len() {
                continue;
            }
            if let Some(function) = self.instantiate_function_template(template, keys.clone(), span)
            {
                let single = FunctionSetId(self.function_sets.insert(FunctionSet {
                    functions: SmallVec::from_iter([function]),
                    templates: SmallVec::new(),
                    class: None,
                }) as u32);
                return Resolved::Functions(single);
            }
        }
        let name = self.function_sets[set.index()]
            .templates
            .first()
            .map_or_else(String::new, |t| self.templates[t.index()].name.clone());
        self.report(Error::TemplateFunctionGenerationFailed(name, span));
        Resolved::Error
    }

    pub(crate) fn instantiate_function_template(
        &mut self,
        template: TemplateId,
        keys: Vec<TemplateArgKey>,
        span: Span,
    ) -> Option<FunctionId> {
        let cache_key: CacheKey = (template, keys.clone().into_boxed_slice());
        if let Some(&function) = self.fn_template_cache.get(&cache_key) {
            return Some(function);
        }
        let decl = match &self.templates[template.index()].kind {
            TemplateKind::Class(_) => return None,
            TemplateKind::Function(decl) => *decl,
        };
        let template_scope = self.templates[template.index()].scope;
        let name = self.templates[template.index()].name.clone();
        let args_text = templates::args_display(&keys, |ty| self.type_name(ty));
        let instance_name = format!("{name}{args_text}");
        let args_scope = self.scopes.child(template_scope, instance_name.clone());
        self.bind_template_params(args_scope, template, &keys);

        self.template_stack.push((instance_name, span));
        let function = self.declare_function(args_scope, &decl.decl, None, Visibility::Public);
        self.template_stack.pop();

        let function = function?;
        self.fn_template_cache.insert(cache_key, function);
        Some(function)
    }

    /// Call-site deduction for function templates: matches declared
    /// parameter types against the argument types.
    pub(crate) fn deduce_function_template(
        &mut self,
        template: TemplateId,
        arg_types: &[Type],
        span: Span,
    ) -> Option<FunctionId> {
        let decl = match &self.templates[template.index()].kind {
            TemplateKind::Class(_) => return None,
            TemplateKind::Function(decl) => *decl,
        };
        if decl.decl.params.len() != arg_types.len() {
            return None;
        }
        let template_scope = self.templates[template.index()].scope;
        let mut deduced = templates::fresh_deduced(&self.templates[template.index()]);
        for (param, actual) in decl.decl.params.iter().zip(arg_types) {
            let mut env = SessionDeduceEnv { session: self };
            let matched = templates::deduce_type(
                &param.ty,
                actual,
                &mut deduced,
                &mut env,
                template_scope,
            )
            .unwrap_or(false);
            if !matched {
                return None;
            }
        }
        let keys: Option<Vec<TemplateArgKey>> = deduced.into_values().collect();
        self.instantiate_function_template(template, keys?, span)
    }

    // ------------------------------------------------------------------
    // Finalization
    // ------------------------------------------------------------------

    fn finish(mut self) -> (ir::Module, Vec<Diagnostic>) {
        self.drain_queues();
        non_sync::propagate(&mut self.classes, &mut self.reporter);
        self.emit_vtables();
        if self.options.tbaa_metadata {
            self.emit_type_tags();
        }
        let module = self.module;
        let diagnostics = diagnostic::normalize(self.reporter.into_reported());
        (module, diagnostics)
    }

    /// One tag per struct layout under a common root; a backend turns
    /// these into alias-analysis metadata nodes.
    fn emit_type_tags(&mut self) {
        self.module.type_tags.push(ir::TypeTag {
            name: "sable type root".into(),
            parent: None,
        });
        for layout in &mut self.module.structs {
            let tag = self.module.type_tags.len() as u32;
            self.module.type_tags.push(ir::TypeTag {
                name: layout.name.clone(),
                parent: Some(0),
            });
            layout.tbaa_tag = Some(tag);
        }
    }

    /// One vtable constant per ancestor path of every polymorph class,
    /// entries resolved to the final overrides.
    fn emit_vtables(&mut self) {
        let ids: Vec<usize> = self.classes.iter().map(|(id, _)| id).collect();
        for id in ids {
            let class_id = ClassId(id as u32);
            if !self.classes[id].kind.is_polymorph() || !self.classes[id].is_complete() {
                continue;
            }
            for path in self.ancestor_paths(class_id) {
                let last = *path.last().unwrap_or(&class_id);
                let entries = self.classes[last.index()]
                    .virtual_table
                    .iter()
                    .map(|ancestor_slot| {
                        // The final override lives in the most derived
                        // class's own table.
                        let resolved = self.classes[class_id.index()]
                            .virtual_table
                            .iter()
                            .find(|slot| {
                                slot.name == ancestor_slot.name
                                    && slot.params == ancestor_slot.params
                            })
                            .unwrap_or(ancestor_slot);
                        ir::VTableEntry {
                            method_name: resolved.name.clone(),
                            function: self.functions[resolved.function.index()]
                                .mangled_name
                                .clone()
                                .unwrap_or_default(),
                            is_pure: resolved.is_pure,
                        }
                    })
                    .collect();
                // Base-adjusted copies get a private suffix naming the
                // ancestor they serve.
                let mut name = self.mangler.mangle_virtual_table(self, class_id);
                if path.len() > 1 {
                    name.push('.');
                    name.push_str(&self.mangler.mangle_virtual_table(self, last));
                }
                self.module.vtables.push(ir::VTable {
                    name,
                    class: class_id,
                    path,
                    entries,
                });
            }
        }
    }

    fn ancestor_paths(&self, id: ClassId) -> Vec<Vec<ClassId>> {
        let mut paths = vec![vec![id]];
        for &parent in &self.classes[id.index()].parents {
            for mut path in self.ancestor_paths(parent) {
                let mut full = vec![id];
                full.append(&mut path);
                paths.push(full);
            }
        }
        paths
    }
}

fn field_has_initializer(decl: Option<&ast::ClassDecl<'_>>, field_name: &str) -> bool {
    let Some(decl) = decl else {
        return false;
    };
    decl.members.iter().any(|member| {
        matches!(member, ast::ClassMember::Field(f) if f.name == field_name && f.initializer.is_some())
    })
}

fn type_name_mentions(name: &ast::TypeName<'_>, param: &str) -> bool {
    match name {
        ast::TypeName::Path((path, _)) => path.components.iter().any(|component| {
            component.name == param
                || component.template_args.as_deref().is_some_and(|args| {
                    args.iter().any(|arg| match arg {
                        ast::TemplateArg::Type(ty) => type_name_mentions(ty, param),
                        ast::TemplateArg::Expr((expr, _)) => {
                            matches!(expr, ast::Expr::Path(p) if p.as_single_ident() == Some(param))
                        }
                    })
                })
        }),
        ast::TypeName::Array { elem, size, .. } => {
            type_name_mentions(elem, param)
                || matches!(&size.0, ast::Expr::Path(p) if p.as_single_ident() == Some(param))
        }
        ast::TypeName::Tuple(elems, _) => elems.iter().any(|e| type_name_mentions(e, param)),
        ast::TypeName::RawPointer(pointee, _) => type_name_mentions(pointee, param),
        ast::TypeName::FunctionPointer { params, ret, .. } => {
            params.iter().any(|(ty, _)| type_name_mentions(ty, param))
                || ret.as_deref().is_some_and(|r| type_name_mentions(r, param))
        }
    }
}

// ----------------------------------------------------------------------
// Environment adapters
// ----------------------------------------------------------------------

struct SessionConstEnv<'a, 'src> {
    session: &'a mut Session<'src>,
    scope: ScopeId,
}

impl<'src> ConstEnv<'src> for SessionConstEnv<'_, 'src> {
    fn lookup(&mut self, path: &ast::Path<'src>, span: Span) -> Result<ConstEntity<'src>, Error> {
        match self.session.resolve_path_value(self.scope, path, span) {
            Resolved::Variable(id) => {
                self.session.ensure_global(id, span);
                let variable = &self.session.variables[id.index()];
                match &variable.constexpr_value {
                    Some(value) => Ok(ConstEntity::Value(CtValue {
                        ty: variable.ty.clone(),
                        value: value.clone(),
                    })),
                    None => Err(Error::ExpectedConstantExpression(span)),
                }
            }
            Resolved::EnumMember(id, ordinal) => Ok(ConstEntity::Value(CtValue {
                ty: Type::Enum(id),
                value: ConstValue::EnumMember(ordinal),
            })),
            Resolved::Functions(set) => {
                let candidates = &self.session.function_sets[set.index()].functions;
                let constexpr_fns: Vec<FunctionId> = candidates
                    .iter()
                    .copied()
                    .filter(|id| self.session.functions[id.index()].is_constexpr)
                    .collect();
                match constexpr_fns.as_slice() {
                    [single] => match self.session.functions[single.index()].decl {
                        Some(decl) => Ok(ConstEntity::Function(decl)),
                        None => Err(Error::ExpectedConstantExpression(span)),
                    },
                    _ => Err(Error::ExpectedConstantExpression(span)),
                }
            }
            Resolved::Error => Err(Error::ExpectedConstantExpression(span)),
            _ => Err(Error::ExpectedConstantExpression(span)),
        }
    }

    fn resolve_type(&mut self, name: &ast::TypeName<'src>) -> Result<Type, Error> {
        Ok(self.session.resolve_type_name(self.scope, name))
    }
}

struct SessionDeduceEnv<'a, 'src> {
    session: &'a mut Session<'src>,
}

impl<'src> DeduceEnv<'src> for SessionDeduceEnv<'_, 'src> {
    fn resolve_concrete(
        &mut self,
        name: &ast::TypeName<'src>,
        scope: ScopeId,
    ) -> Result<Type, Error> {
        Ok(self.session.resolve_type_name(scope, name))
    }

    fn eval_const(
        &mut self,
        expr: &ast::Spanned<ast::Expr<'src>>,
        scope: ScopeId,
    ) -> Result<ConstValue, Error> {
        self.session.eval_const(scope, expr).map(|v| v.value)
    }

    fn templates_of_path(&mut self, path: &ast::Path<'src>, scope: ScopeId) -> Vec<TemplateId> {
        let Some(component) = path.components.last() else {
            return Vec::new();
        };
        match self.session.scopes.lookup_upward(scope, component.name) {
            Some((_, entry)) => match &entry.value {
                Value::TypeTemplates(ids) => ids.to_vec(),
                _ => Vec::new(),
            },
            None => Vec::new(),
        }
    }

    fn class_origin(&self, class: ClassId) -> Option<(TemplateId, &[TemplateArgKey])> {
        self.session
            .type_template_cache
            .iter()
            .find(|(_, ty)| **ty == Type::Class(class))
            .map(|((template, keys), _)| (*template, keys.as_ref()))
    }
}
