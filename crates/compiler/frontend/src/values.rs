use std::hash::{Hash, Hasher};
use std::rc::Rc;

use sable_ast as ast;
use sable_ast::Span;
use smallvec::SmallVec;

use crate::scopes::ScopeId;
use crate::templates::TemplateId;
use crate::types::{ClassId, FunctionType, Type, ValueType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VariableId(pub(crate) u32);

impl VariableId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionId(pub(crate) u32);

impl FunctionId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionSetId(pub(crate) u32);

impl FunctionSetId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypedefId(pub(crate) u32);

impl TypedefId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A field is addressed by its class and position inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldId {
    pub class: ClassId,
    pub index: u32,
}

/// What a name in a scope resolves to. The set is closed; every named
/// program entity is one of these.
#[derive(Debug, Clone)]
pub enum Value {
    Namespace(ScopeId),
    Type(Type),
    Variable(VariableId),
    Functions(FunctionSetId),
    TypeTemplates(SmallVec<[TemplateId; 1]>),
    ClassField(FieldId),
    Typedef(TypedefId),
    /// Placeholder installed for template parameters before deduction
    /// assigns them a concrete value.
    YetNotDeducedTemplateArg,
    /// Recovery value after a reported error.
    ErrorValue,
}

impl Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Namespace(_) => "namespace",
            Self::Type(_) => "type",
            Self::Variable(_) => "variable",
            Self::Functions(_) => "functions",
            Self::TypeTemplates(_) => "type templates",
            Self::ClassField(_) => "class field",
            Self::Typedef(_) => "type alias",
            Self::YetNotDeducedTemplateArg => "template parameter",
            Self::ErrorValue => "error value",
        }
    }
}

/// A compile-time constant. Floats participate in constant folding but
/// are rejected as template arguments before ever being used as hash
/// keys, so bit-exact hashing is sound here.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    Bool(bool),
    SInt(i128),
    UInt(u128),
    Char(u32),
    Float(f64),
    Aggregate(Rc<[ConstValue]>),
    EnumMember(u64),
}

impl Eq for ConstValue {}

impl Hash for ConstValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        core::mem::discriminant(self).hash(state);
        match self {
            Self::Bool(v) => v.hash(state),
            Self::SInt(v) => v.hash(state),
            Self::UInt(v) => v.hash(state),
            Self::Char(v) => v.hash(state),
            Self::Float(v) => v.to_bits().hash(state),
            Self::Aggregate(elems) => elems.hash(state),
            Self::EnumMember(v) => v.hash(state),
        }
    }
}

impl ConstValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Integer value widened to `i128`, for unsigned values that fit.
    pub fn as_int(&self) -> Option<i128> {
        match self {
            Self::SInt(v) => Some(*v),
            Self::UInt(v) => i128::try_from(*v).ok(),
            Self::Char(v) => Some(i128::from(*v)),
            Self::EnumMember(v) => Some(i128::from(*v)),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<u64> {
        match self {
            Self::UInt(v) => u64::try_from(*v).ok(),
            Self::SInt(v) => u64::try_from(*v).ok(),
            Self::EnumMember(v) => Some(*v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalState {
    Declared,
    InProgress,
    Complete,
}

/// A named variable or global constant. Globals start in `Declared`
/// state and are completed on demand; a cycle of completions is the
/// globals-loop error.
#[derive(Debug)]
pub struct Variable<'src> {
    pub name: String,
    pub ty: Type,
    pub value_type: ValueType,
    pub constexpr_value: Option<ConstValue>,
    pub state: GlobalState,
    pub decl: Option<GlobalVarDecl<'src>>,
    pub span: Span,
}

/// Pointers back into the syntax tree for deferred initialization of a
/// global variable.
#[derive(Debug, Clone, Copy)]
pub struct GlobalVarDecl<'src> {
    pub ty: &'src ast::TypeName<'src>,
    pub entry: &'src ast::VarEntry<'src>,
    pub scope: ScopeId,
}

/// All same-named functions visible through one scope entry, plus any
/// function templates that share the name.
#[derive(Debug, Default)]
pub struct FunctionSet {
    pub functions: SmallVec<[FunctionId; 2]>,
    pub templates: SmallVec<[TemplateId; 1]>,
    /// Class whose member set this is, if any.
    pub class: Option<ClassId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirtualKind {
    None,
    /// First declaration in the hierarchy; allocates a vtable slot.
    New { is_final: bool, is_pure: bool },
    Override { is_final: bool },
}

impl VirtualKind {
    #[inline]
    pub fn is_virtual(self) -> bool {
        !matches!(self, Self::None)
    }

    pub fn is_pure(self) -> bool {
        matches!(self, Self::New { is_pure: true, .. })
    }

    pub fn is_final(self) -> bool {
        matches!(
            self,
            Self::New { is_final: true, .. } | Self::Override { is_final: true }
        )
    }
}

/// One concrete function: a source declaration, a synthesized special
/// member, or a template instantiation result.
#[derive(Debug)]
pub struct Function<'src> {
    pub name: String,
    pub ty: Rc<FunctionType>,
    /// Parameter types in order, including `this`.
    pub params: Box<[Type]>,
    pub owner_class: Option<ClassId>,
    pub visibility: ast::Visibility,
    pub is_this_call: bool,
    pub is_constexpr: bool,
    pub is_generator: bool,
    pub no_mangle: bool,
    pub virtual_kind: VirtualKind,
    /// Slot in the owning class's vtable, assigned during class build.
    pub virtual_table_index: Option<u32>,
    pub has_body: bool,
    pub is_generated: bool,
    pub is_deleted: bool,
    pub decl: Option<&'src ast::FnDecl<'src>>,
    /// Scope the body must be lowered in (the scope the function was
    /// declared in, not the scope it was called from).
    pub parent_scope: ScopeId,
    pub mangled_name: Option<String>,
    pub span: Span,
}

impl Function<'_> {
    /// Special members follow fixed names rather than declaration syntax
    /// here, since synthesized ones have no syntax at all.
    #[inline]
    pub fn is_constructor(&self) -> bool {
        self.name == "constructor"
    }

    #[inline]
    pub fn is_destructor(&self) -> bool {
        self.name == "destructor"
    }
}

/// A lazily-resolved type alias. Resolution happens on first use and
/// detects cycles through the `InProgress` state.
#[derive(Debug)]
pub struct Typedef<'src> {
    pub name: String,
    pub decl: &'src ast::TypeAliasDecl<'src>,
    pub scope: ScopeId,
    pub state: GlobalState,
    pub resolved: Option<Type>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(value: &ConstValue) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn const_value_hash_is_bit_exact() {
        assert_eq!(
            hash_of(&ConstValue::Float(1.5)),
            hash_of(&ConstValue::Float(1.5))
        );
        assert_ne!(
            hash_of(&ConstValue::Float(0.0)),
            hash_of(&ConstValue::Float(-0.0))
        );
        assert_ne!(
            hash_of(&ConstValue::SInt(1)),
            hash_of(&ConstValue::UInt(1))
        );
    }

    #[test]
    fn const_value_conversions() {
        assert_eq!(ConstValue::SInt(-3).as_int(), Some(-3));
        assert_eq!(ConstValue::UInt(u128::MAX).as_int(), None);
        assert_eq!(ConstValue::UInt(7).as_uint(), Some(7));
        assert_eq!(ConstValue::SInt(-1).as_uint(), None);
        assert_eq!(ConstValue::Bool(true).as_bool(), Some(true));
    }
}
