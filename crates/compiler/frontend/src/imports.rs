//! Cross-file import merging. Each file's declarations live in the
//! file's own scope tree; importing a file merges that tree into the
//! importer's. Entities keep their arena identity across the merge, so
//! importing the same file through several paths is idempotent.

use slab::Slab;

use crate::diagnostic::{Error, Reporter};
use crate::scopes::{NameEntry, ScopeArena, ScopeId};
use crate::values::{Function, FunctionSet, FunctionSetId, Value};

pub struct MergeCtx<'a, 'src> {
    pub scopes: &'a mut ScopeArena,
    pub function_sets: &'a mut Slab<FunctionSet>,
    pub functions: &'a Slab<Function<'src>>,
    pub reporter: &'a mut Reporter,
}

pub fn merge_scope(ctx: &mut MergeCtx<'_, '_>, dst: ScopeId, src: ScopeId) {
    let entries: Vec<(String, NameEntry)> = ctx
        .scopes
        .get(src)
        .entries()
        .map(|(name, entry)| (name.to_owned(), entry.clone()))
        .collect();

    for (name, src_entry) in entries {
        let Some(dst_entry) = ctx.scopes.lookup_in(dst, &name).cloned() else {
            insert_fresh(ctx, dst, name, src_entry);
            continue;
        };
        merge_entry(ctx, dst, &name, dst_entry, src_entry);
    }
}

/// First sighting of a name in the destination. Namespaces and overload
/// sets get destination-local containers so later merges never mutate
/// the source file's own tables.
fn insert_fresh(ctx: &mut MergeCtx<'_, '_>, dst: ScopeId, name: String, src_entry: NameEntry) {
    match src_entry.value {
        Value::Namespace(src_scope) => {
            let fresh = ctx.scopes.child(dst, name.clone());
            ctx.scopes.insert_or_replace(
                dst,
                name,
                NameEntry {
                    value: Value::Namespace(fresh),
                    ..src_entry
                },
            );
            merge_scope(ctx, fresh, src_scope);
        }
        Value::Functions(src_set) => {
            let copy = FunctionSet {
                functions: ctx.function_sets[src_set.index()].functions.clone(),
                templates: ctx.function_sets[src_set.index()].templates.clone(),
                class: ctx.function_sets[src_set.index()].class,
            };
            let fresh = FunctionSetId(ctx.function_sets.insert(copy) as u32);
            ctx.scopes.insert_or_replace(
                dst,
                name,
                NameEntry {
                    value: Value::Functions(fresh),
                    ..src_entry
                },
            );
        }
        _ => {
            ctx.scopes.insert_or_replace(dst, name, src_entry);
        }
    }
}

fn merge_entry(
    ctx: &mut MergeCtx<'_, '_>,
    dst: ScopeId,
    name: &str,
    dst_entry: NameEntry,
    src_entry: NameEntry,
) {
    match (&dst_entry.value, &src_entry.value) {
        (Value::Namespace(dst_scope), Value::Namespace(src_scope)) => {
            merge_scope(ctx, *dst_scope, *src_scope);
        }
        (Value::Functions(dst_set), Value::Functions(src_set)) => {
            if dst_entry.visibility != src_entry.visibility {
                ctx.reporter.report(Error::FunctionsVisibilityMismatch(
                    name.to_owned(),
                    src_entry.span,
                ));
            }
            merge_function_sets(ctx, *dst_set, *src_set);
        }
        (Value::TypeTemplates(dst_templates), Value::TypeTemplates(src_templates)) => {
            let mut merged = dst_templates.clone();
            for id in src_templates {
                if !merged.contains(id) {
                    merged.push(*id);
                }
            }
            ctx.scopes.insert_or_replace(
                dst,
                name,
                NameEntry {
                    value: Value::TypeTemplates(merged),
                    ..dst_entry
                },
            );
        }
        (Value::Type(dst_ty), Value::Type(src_ty)) if dst_ty == src_ty => {}
        (Value::Variable(dst_var), Value::Variable(src_var)) if dst_var == src_var => {}
        (Value::Typedef(dst_td), Value::Typedef(src_td)) if dst_td == src_td => {}
        (Value::ErrorValue, _) | (_, Value::ErrorValue) => {}
        _ => {
            ctx.reporter
                .report(Error::Redefinition(name.to_owned(), src_entry.span));
        }
    }
}

fn merge_function_sets(ctx: &mut MergeCtx<'_, '_>, dst: FunctionSetId, src: FunctionSetId) {
    if dst == src {
        return;
    }
    let src_functions = ctx.function_sets[src.index()].functions.clone();
    let src_templates = ctx.function_sets[src.index()].templates.clone();

    'next_src: for src_id in src_functions {
        let dst_functions = ctx.function_sets[dst.index()].functions.clone();
        for dst_id in dst_functions {
            if dst_id == src_id {
                continue 'next_src;
            }
            let dst_fn = &ctx.functions[dst_id.index()];
            let src_fn = &ctx.functions[src_id.index()];
            if !dst_fn.ty.same_signature(&src_fn.ty) {
                continue;
            }
            // Same signature from two different files: at most one side
            // may carry the body; the prototype side merges into it.
            match (dst_fn.has_body, src_fn.has_body) {
                (true, true) => {
                    ctx.reporter.report(Error::FunctionBodyDuplication(
                        src_fn.name.clone(),
                        src_fn.span,
                    ));
                }
                (false, true) => {
                    let set = &mut ctx.function_sets[dst.index()];
                    if let Some(slot) = set.functions.iter_mut().find(|id| **id == dst_id) {
                        *slot = src_id;
                    }
                }
                (true, false) => {}
                (false, false) => {
                    ctx.reporter.report(Error::FunctionPrototypeDuplication(
                        src_fn.name.clone(),
                        src_fn.span,
                    ));
                }
            }
            continue 'next_src;
        }
        ctx.function_sets[dst.index()].functions.push(src_id);
    }

    for template in src_templates {
        let set = &mut ctx.function_sets[dst.index()];
        if !set.templates.contains(&template) {
            set.templates.push(template);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CallingConvention, FunctionType, Type, ValueType};
    use crate::values::FunctionId;
    use sable_ast::{Span, Visibility};
    use std::rc::Rc;

    fn entry(value: Value) -> NameEntry {
        NameEntry {
            value,
            visibility: Visibility::Public,
            span: Span::ZERO,
        }
    }

    fn empty_fn_type() -> Rc<FunctionType> {
        Rc::new(FunctionType {
            params: Box::new([]),
            ret: Type::VOID,
            ret_value: ValueType::Value,
            return_references: Box::new([]),
            references_pollution: Box::new([]),
            is_unsafe: false,
            calling_convention: CallingConvention::Default,
        })
    }

    fn test_fn(name: &str, has_body: bool) -> Function<'static> {
        Function {
            name: name.into(),
            ty: empty_fn_type(),
            params: Box::new([]),
            owner_class: None,
            visibility: Visibility::Public,
            is_this_call: false,
            is_constexpr: false,
            is_generator: false,
            no_mangle: false,
            virtual_kind: crate::values::VirtualKind::None,
            virtual_table_index: None,
            has_body,
            is_generated: false,
            is_deleted: false,
            decl: None,
            parent_scope: ScopeId(0),
            mangled_name: None,
            span: Span::ZERO,
        }
    }

    struct Fixture {
        scopes: ScopeArena,
        function_sets: Slab<FunctionSet>,
        functions: Slab<Function<'static>>,
        reporter: Reporter,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                scopes: ScopeArena::default(),
                function_sets: Slab::new(),
                functions: Slab::new(),
                reporter: Reporter::default(),
            }
        }

        fn ctx(&mut self) -> MergeCtx<'_, 'static> {
            MergeCtx {
                scopes: &mut self.scopes,
                function_sets: &mut self.function_sets,
                functions: &self.functions,
                reporter: &mut self.reporter,
            }
        }
    }

    #[test]
    fn double_import_is_idempotent() {
        let mut fx = Fixture::new();
        let dst = fx.scopes.root();
        let src = fx.scopes.root();
        let ns = fx.scopes.child(src, "NS");
        fx.scopes
            .insert(src, "NS", entry(Value::Namespace(ns)))
            .unwrap();
        fx.scopes
            .insert(ns, "T", entry(Value::Type(Type::BOOL)))
            .unwrap();

        merge_scope(&mut fx.ctx(), dst, src);
        merge_scope(&mut fx.ctx(), dst, src);
        assert!(fx.reporter.is_empty());

        let (_, merged_ns) = fx.scopes.lookup_upward(dst, "NS").unwrap();
        let Value::Namespace(merged_ns) = merged_ns.value else {
            panic!("expected namespace");
        };
        assert_eq!(fx.scopes.get(merged_ns).len(), 1);
    }

    #[test]
    fn same_name_different_entities_collide() {
        let mut fx = Fixture::new();
        let dst = fx.scopes.root();
        let src_a = fx.scopes.root();
        let src_b = fx.scopes.root();
        fx.scopes
            .insert(src_a, "T", entry(Value::Type(Type::BOOL)))
            .unwrap();
        fx.scopes
            .insert(src_b, "T", entry(Value::Type(Type::VOID)))
            .unwrap();

        merge_scope(&mut fx.ctx(), dst, src_a);
        merge_scope(&mut fx.ctx(), dst, src_b);
        assert!(matches!(
            fx.reporter.reported()[0].error,
            Error::Redefinition(ref name, _) if name == "T"
        ));
    }

    #[test]
    fn prototype_and_body_merge_into_body() {
        let mut fx = Fixture::new();
        let dst = fx.scopes.root();
        let src_proto = fx.scopes.root();
        let src_body = fx.scopes.root();

        let proto_id = FunctionId(fx.functions.insert(test_fn("f", false)) as u32);
        let body_id = FunctionId(fx.functions.insert(test_fn("f", true)) as u32);

        let proto_set = FunctionSetId(fx.function_sets.insert(FunctionSet {
            functions: [proto_id].into_iter().collect(),
            ..FunctionSet::default()
        }) as u32);
        let body_set = FunctionSetId(fx.function_sets.insert(FunctionSet {
            functions: [body_id].into_iter().collect(),
            ..FunctionSet::default()
        }) as u32);

        fx.scopes
            .insert(src_proto, "f", entry(Value::Functions(proto_set)))
            .unwrap();
        fx.scopes
            .insert(src_body, "f", entry(Value::Functions(body_set)))
            .unwrap();

        merge_scope(&mut fx.ctx(), dst, src_proto);
        merge_scope(&mut fx.ctx(), dst, src_body);
        assert!(fx.reporter.is_empty());

        let (_, merged) = fx.scopes.lookup_upward(dst, "f").unwrap();
        let Value::Functions(set) = merged.value else {
            panic!("expected functions");
        };
        assert_eq!(&fx.function_sets[set.index()].functions[..], &[body_id]);
    }

    #[test]
    fn two_bodies_for_one_signature_collide() {
        let mut fx = Fixture::new();
        let dst = fx.scopes.root();
        let src_a = fx.scopes.root();
        let src_b = fx.scopes.root();

        let a_id = FunctionId(fx.functions.insert(test_fn("f", true)) as u32);
        let b_id = FunctionId(fx.functions.insert(test_fn("f", true)) as u32);
        let a_set = FunctionSetId(fx.function_sets.insert(FunctionSet {
            functions: [a_id].into_iter().collect(),
            ..FunctionSet::default()
        }) as u32);
        let b_set = FunctionSetId(fx.function_sets.insert(FunctionSet {
            functions: [b_id].into_iter().collect(),
            ..FunctionSet::default()
        }) as u32);

        fx.scopes
            .insert(src_a, "f", entry(Value::Functions(a_set)))
            .unwrap();
        fx.scopes
            .insert(src_b, "f", entry(Value::Functions(b_set)))
            .unwrap();

        merge_scope(&mut fx.ctx(), dst, src_a);
        merge_scope(&mut fx.ctx(), dst, src_b);
        assert!(matches!(
            fx.reporter.reported()[0].error,
            Error::FunctionBodyDuplication(ref name, _) if name == "f"
        ));
    }
}
