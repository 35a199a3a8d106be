//! Post-hoc `non_sync` propagation. A class is non-sync if it says so,
//! if any field's type is non-sync, or if any parent is. Because class
//! completion order is demand-driven, the property is settled in a
//! fixpoint pass after all classes are complete rather than during
//! completion.

use slab::Slab;

use crate::classes::{Class, NonSyncState};
use crate::diagnostic::{Error, Reporter};
use crate::types::ClassId;

pub fn propagate(classes: &mut Slab<Class<'_>>, reporter: &mut Reporter) {
    loop {
        let mut changed = false;
        let ids: Vec<usize> = classes.iter().map(|(id, _)| id).collect();
        for id in &ids {
            let class = &classes[*id];
            if class.non_sync.is_non_sync() {
                continue;
            }
            let mut dependency_non_sync = false;
            for field in &class.fields {
                field.ty.for_each_class(&mut |field_class: ClassId| {
                    if let Some(field_class) = classes.get(field_class.index()) {
                        dependency_non_sync |= field_class.non_sync.is_non_sync();
                    }
                });
                if dependency_non_sync {
                    break;
                }
            }
            if !dependency_non_sync {
                dependency_non_sync = class.parents.iter().any(|parent| {
                    classes
                        .get(parent.index())
                        .is_some_and(|parent| parent.non_sync.is_non_sync())
                });
            }
            if dependency_non_sync {
                classes[*id].non_sync = NonSyncState::Inherited;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    // A non-sync class under a sync polymorph parent could be upcast
    // into losing the property.
    let ids: Vec<usize> = classes.iter().map(|(id, _)| id).collect();
    for id in ids {
        let class = &classes[id];
        if !class.non_sync.is_non_sync() {
            continue;
        }
        for parent in &class.parents {
            let Some(parent_class) = classes.get(parent.index()) else {
                continue;
            };
            if !parent_class.non_sync.is_non_sync() {
                reporter.report(Error::NonSyncTagAdditionInInheritance {
                    class: class.name.clone(),
                    parent: parent_class.name.clone(),
                    span: class.span,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classes::ClassKind;
    use crate::scopes::ScopeId;
    use crate::types::Type;
    use sable_ast::Span;

    fn class(name: &str) -> Class<'static> {
        Class::new(name.into(), ScopeId(0), ClassKind::Struct, Span::ZERO)
    }

    fn add_field(target: &mut Class<'_>, ty: Type) {
        target.fields.push(crate::classes::Field {
            name: format!("field{}", target.fields.len()),
            ty,
            is_reference: false,
            is_mutable: true,
            visibility: sable_ast::Visibility::Public,
            original_index: target.fields.len() as u32,
            span: Span::ZERO,
        });
    }

    #[test]
    fn non_sync_flows_through_field_chains() {
        let mut classes = Slab::new();
        let mut marked = class("Marked");
        marked.non_sync = NonSyncState::Declared;
        let marked_id = ClassId(classes.insert(marked) as u32);

        let mut middle = class("Middle");
        add_field(&mut middle, Type::Class(marked_id));
        let middle_id = ClassId(classes.insert(middle) as u32);

        let mut outer = class("Outer");
        add_field(&mut outer, Type::array(Type::Class(middle_id), 2));
        let outer_id = ClassId(classes.insert(outer) as u32);

        let clean_id = ClassId(classes.insert(class("Clean")) as u32);

        let mut reporter = Reporter::default();
        propagate(&mut classes, &mut reporter);
        assert!(reporter.is_empty());
        assert!(classes[middle_id.index()].non_sync.is_non_sync());
        assert!(classes[outer_id.index()].non_sync.is_non_sync());
        assert!(!classes[clean_id.index()].non_sync.is_non_sync());
    }

    #[test]
    fn adding_non_sync_over_sync_parent_is_reported() {
        let mut classes = Slab::new();
        let mut parent = class("Parent");
        parent.kind = ClassKind::PolymorphNonFinal;
        let parent_id = ClassId(classes.insert(parent) as u32);

        let mut child = class("Child");
        child.kind = ClassKind::PolymorphFinal;
        child.non_sync = NonSyncState::Declared;
        child.parents.push(parent_id);
        classes.insert(child);

        let mut reporter = Reporter::default();
        propagate(&mut classes, &mut reporter);
        assert!(matches!(
            reporter.reported()[0].error,
            Error::NonSyncTagAdditionInInheritance { ref class, ref parent, .. }
                if class == "Child" && parent == "Parent"
        ));
    }

    #[test]
    fn non_sync_parent_propagates_without_error() {
        let mut classes = Slab::new();
        let mut parent = class("Parent");
        parent.kind = ClassKind::PolymorphNonFinal;
        parent.non_sync = NonSyncState::Declared;
        let parent_id = ClassId(classes.insert(parent) as u32);

        let mut child = class("Child");
        child.kind = ClassKind::PolymorphFinal;
        child.parents.push(parent_id);
        let child_id = ClassId(classes.insert(child) as u32);

        let mut reporter = Reporter::default();
        propagate(&mut classes, &mut reporter);
        assert!(reporter.is_empty());
        assert!(classes[child_id.index()].non_sync.is_non_sync());
    }
}
