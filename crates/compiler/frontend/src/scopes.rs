use indexmap::IndexMap;
use sable_ast::{Span, Visibility};
use slab::Slab;

use crate::diagnostic::Error;
use crate::types::ClassId;
use crate::values::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub(crate) u32);

impl ScopeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
pub struct NameEntry {
    pub value: Value,
    pub visibility: Visibility,
    pub span: Span,
}

/// One namespace, class body, or template argument scope. Insertion
/// order of names is preserved; global build order follows it.
#[derive(Debug)]
pub struct Scope {
    pub name: String,
    pub parent: Option<ScopeId>,
    /// Set when this scope is a class body; member access checks walk
    /// this field.
    pub class: Option<ClassId>,
    names: IndexMap<String, NameEntry>,
}

impl Scope {
    #[inline]
    pub fn get(&self, name: &str) -> Option<&NameEntry> {
        self.names.get(name)
    }

    #[inline]
    pub fn get_mut(&mut self, name: &str) -> Option<&mut NameEntry> {
        self.names.get_mut(name)
    }

    #[inline]
    pub fn entries(&self) -> impl Iterator<Item = (&str, &NameEntry)> {
        self.names.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Arena of all scopes in a build session.
#[derive(Debug, Default)]
pub struct ScopeArena {
    scopes: Slab<Scope>,
}

impl ScopeArena {
    pub fn root(&mut self) -> ScopeId {
        self.add(Scope {
            name: String::new(),
            parent: None,
            class: None,
            names: IndexMap::new(),
        })
    }

    pub fn child(&mut self, parent: ScopeId, name: impl Into<String>) -> ScopeId {
        self.add(Scope {
            name: name.into(),
            parent: Some(parent),
            class: None,
            names: IndexMap::new(),
        })
    }

    pub fn class_body(&mut self, parent: ScopeId, name: impl Into<String>, class: ClassId) -> ScopeId {
        self.add(Scope {
            name: name.into(),
            parent: Some(parent),
            class: Some(class),
            names: IndexMap::new(),
        })
    }

    fn add(&mut self, scope: Scope) -> ScopeId {
        ScopeId(self.scopes.insert(scope) as u32)
    }

    #[inline]
    pub fn get(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.index()]
    }

    #[inline]
    pub fn get_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.index()]
    }

    /// Inserts a new name. On collision nothing is replaced and a
    /// redefinition error is returned for the caller to report.
    pub fn insert(
        &mut self,
        scope: ScopeId,
        name: impl Into<String>,
        entry: NameEntry,
    ) -> Result<(), Error> {
        let name = name.into();
        let span = entry.span;
        match self.get_mut(scope).names.entry(name) {
            indexmap::map::Entry::Vacant(vacant) => {
                vacant.insert(entry);
                Ok(())
            }
            indexmap::map::Entry::Occupied(occupied) => {
                Err(Error::Redefinition(occupied.key().clone(), span))
            }
        }
    }

    /// Replaces or inserts unconditionally. Used for import merging and
    /// for template parameter binding, where the caller has already
    /// decided the overwrite is legal.
    pub fn insert_or_replace(&mut self, scope: ScopeId, name: impl Into<String>, entry: NameEntry) {
        self.get_mut(scope).names.insert(name.into(), entry);
    }

    /// Looks the name up in this scope only.
    #[inline]
    pub fn lookup_in(&self, scope: ScopeId, name: &str) -> Option<&NameEntry> {
        self.get(scope).get(name)
    }

    /// Walks the parent chain until the name is found. This is the
    /// resolution rule for the first component of a path.
    pub fn lookup_upward(&self, mut scope: ScopeId, name: &str) -> Option<(ScopeId, &NameEntry)> {
        loop {
            if let Some(entry) = self.get(scope).get(name) {
                return Some((scope, entry));
            }
            scope = self.get(scope).parent?;
        }
    }

    /// Nearest enclosing class body, used for access checks and for
    /// `this` availability.
    pub fn enclosing_class(&self, mut scope: ScopeId) -> Option<ClassId> {
        loop {
            let s = self.get(scope);
            if let Some(class) = s.class {
                return Some(class);
            }
            scope = s.parent?;
        }
    }

    /// True if `scope` is `ancestor` or lexically inside it.
    pub fn is_inside(&self, mut scope: ScopeId, ancestor: ScopeId) -> bool {
        loop {
            if scope == ancestor {
                return true;
            }
            match self.get(scope).parent {
                Some(parent) => scope = parent,
                None => return false,
            }
        }
    }

    /// Fully qualified name, components joined with `::`. The root
    /// scope contributes nothing.
    pub fn qualified_name(&self, scope: ScopeId, name: &str) -> String {
        let mut components = vec![name];
        let mut current = Some(scope);
        while let Some(id) = current {
            let s = self.get(id);
            if !s.name.is_empty() {
                components.push(&s.name);
            }
            current = s.parent;
        }
        components.reverse();
        components.join("::")
    }

    /// Scope path components from the root down, excluding the unnamed
    /// root itself. Manglers consume this.
    pub fn path_components(&self, scope: ScopeId) -> Vec<String> {
        let mut components = Vec::new();
        let mut current = Some(scope);
        while let Some(id) = current {
            let s = self.get(id);
            if !s.name.is_empty() {
                components.push(s.name.clone());
            }
            current = s.parent;
        }
        components.reverse();
        components
    }
}

/// Checks whether a member with the given visibility may be accessed
/// from `from_scope`. Private members are visible inside the class
/// scope itself, protected ones additionally from derived class scopes;
/// the derived-class walk is resolved by the caller, which passes the
/// set of classes `from_scope` belongs to.
pub fn member_access_allowed(
    arena: &ScopeArena,
    from_scope: ScopeId,
    member_visibility: Visibility,
    class_scope: ScopeId,
    accessible_classes: &[ClassId],
    member_class: ClassId,
) -> bool {
    match member_visibility {
        Visibility::Public => true,
        Visibility::Private => arena.is_inside(from_scope, class_scope),
        Visibility::Protected => {
            arena.is_inside(from_scope, class_scope)
                || accessible_classes.contains(&member_class)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Type;
    use crate::values::Value;

    fn entry() -> NameEntry {
        NameEntry {
            value: Value::Type(Type::BOOL),
            visibility: Visibility::Public,
            span: Span::ZERO,
        }
    }

    #[test]
    fn redefinition_is_rejected() {
        let mut arena = ScopeArena::default();
        let root = arena.root();
        assert!(arena.insert(root, "A", entry()).is_ok());
        assert!(matches!(
            arena.insert(root, "A", entry()),
            Err(Error::Redefinition(name, _)) if name == "A"
        ));
    }

    #[test]
    fn upward_lookup_prefers_inner_scope() {
        let mut arena = ScopeArena::default();
        let root = arena.root();
        let ns = arena.child(root, "NS");
        let inner = arena.child(ns, "Inner");
        arena.insert(root, "X", entry()).unwrap();
        arena.insert(ns, "X", entry()).unwrap();

        let (found_in, _) = arena.lookup_upward(inner, "X").unwrap();
        assert_eq!(found_in, ns);
        assert!(arena.lookup_upward(inner, "Y").is_none());
    }

    #[test]
    fn member_access_matrix() {
        let mut arena = ScopeArena::default();
        let root = arena.root();
        let class_scope = arena.class_body(root, "C", ClassId(0));
        let method_scope = arena.child(class_scope, "m");
        let derived_scope = arena.class_body(root, "D", ClassId(1));
        let outside = arena.child(root, "free");

        let c = ClassId(0);
        assert!(member_access_allowed(&arena, outside, Visibility::Public, class_scope, &[], c));
        assert!(member_access_allowed(&arena, method_scope, Visibility::Private, class_scope, &[], c));
        assert!(!member_access_allowed(&arena, outside, Visibility::Private, class_scope, &[], c));
        // A derived class passes its own ancestor set.
        assert!(member_access_allowed(
            &arena,
            derived_scope,
            Visibility::Protected,
            class_scope,
            &[ClassId(1), c],
            c
        ));
        assert!(!member_access_allowed(&arena, outside, Visibility::Protected, class_scope, &[], c));
    }

    #[test]
    fn qualified_names() {
        let mut arena = ScopeArena::default();
        let root = arena.root();
        let ns = arena.child(root, "NS");
        let inner = arena.child(ns, "Inner");
        assert_eq!(arena.qualified_name(inner, "f"), "NS::Inner::f");
        assert_eq!(arena.qualified_name(root, "f"), "f");
        assert_eq!(arena.path_components(inner), vec!["NS", "Inner"]);
    }
}
