use bitfield_struct::bitfield;
use sable_ast as ast;
use sable_ast::{Span, Visibility};

use crate::scopes::ScopeId;
use crate::types::{ClassId, Type};
use crate::values::{ConstValue, FunctionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassKind {
    Struct,
    NonPolymorph,
    PolymorphNonFinal,
    PolymorphFinal,
    Interface,
    Abstract,
}

impl ClassKind {
    pub fn from_attr(attr: ast::ClassKindAttr) -> Self {
        match attr {
            ast::ClassKindAttr::Struct => Self::Struct,
            ast::ClassKindAttr::Class => Self::NonPolymorph,
            ast::ClassKindAttr::Final => Self::PolymorphFinal,
            ast::ClassKindAttr::Polymorph => Self::PolymorphNonFinal,
            ast::ClassKindAttr::Interface => Self::Interface,
            ast::ClassKindAttr::Abstract => Self::Abstract,
        }
    }

    pub fn is_polymorph(self) -> bool {
        matches!(
            self,
            Self::PolymorphNonFinal | Self::PolymorphFinal | Self::Interface | Self::Abstract
        )
    }

    /// Can this kind appear in a parent list?
    pub fn is_inheritable(self) -> bool {
        matches!(
            self,
            Self::PolymorphNonFinal | Self::Interface | Self::Abstract
        )
    }

    pub fn is_abstract(self) -> bool {
        matches!(self, Self::Interface | Self::Abstract)
    }
}

/// Two-state completeness. A class becomes complete the first time
/// something requires it to be; a forward declaration that never gets a
/// body stays incomplete and any completeness requirement on it errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completeness {
    Incomplete,
    /// Member list is being built right now; a completeness requirement
    /// from inside this window is a dependency loop.
    InProgress,
    Complete,
}

#[bitfield(u16)]
#[derive(PartialEq, Eq)]
pub struct ClassFlags {
    pub default_constructible: bool,
    pub copy_constructible: bool,
    pub copy_assignable: bool,
    pub equality_comparable: bool,
    pub has_user_destructor: bool,
    pub has_explicit_noncopy_constructors: bool,
    pub references_inside: bool,
    pub mutable_references_inside: bool,
    pub non_sync: bool,
    pub keep_fields_order: bool,
    pub can_be_constexpr: bool,
    #[bits(5)]
    __: u8,
}

#[derive(Debug)]
pub struct Field {
    pub name: String,
    pub ty: Type,
    pub is_reference: bool,
    pub is_mutable: bool,
    pub visibility: Visibility,
    /// Declaration position; storage position may differ.
    pub original_index: u32,
    pub span: Span,
}

/// One slot in the class's own virtual table.
#[derive(Debug, Clone)]
pub struct VirtualTableSlot {
    pub name: String,
    /// Parameter types after `this`, for override matching.
    pub params: Box<[Type]>,
    pub function: FunctionId,
    pub is_pure: bool,
    pub is_final: bool,
}

/// Why a class is `non_sync`, kept for the inheritance check message
/// and for the post-hoc propagation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonSyncState {
    Sync,
    /// Declared `non_sync` directly or via a true tag expression.
    Declared,
    /// Became non-sync because a field or parent is.
    Inherited,
}

impl NonSyncState {
    #[inline]
    pub fn is_non_sync(self) -> bool {
        !matches!(self, Self::Sync)
    }
}

#[derive(Debug)]
pub struct Class<'src> {
    pub name: String,
    /// Scope of the class body; member lookup goes through it.
    pub scope: ScopeId,
    pub kind: ClassKind,
    pub completeness: Completeness,
    pub flags: ClassFlags,
    pub non_sync: NonSyncState,
    /// All direct parents in declaration order.
    pub parents: Vec<ClassId>,
    /// The unique non-interface parent, if any.
    pub base: Option<ClassId>,
    pub fields: Vec<Field>,
    /// Indices into `fields` in storage order.
    pub field_order: Vec<u32>,
    pub virtual_table: Vec<VirtualTableSlot>,
    pub constructors: Vec<FunctionId>,
    pub destructor: Option<FunctionId>,
    /// Body to process on completion; absent for template-generated
    /// classes whose members were instantiated directly.
    pub decl: Option<&'src ast::ClassDecl<'src>>,
    /// Deferred `non_sync` tag expression, evaluated during completion.
    pub non_sync_expr: Option<&'src ast::Spanned<ast::Expr<'src>>>,
    /// Set for template instantiation results; used in display names.
    pub template_args_text: Option<String>,
    pub span: Span,
}

impl<'src> Class<'src> {
    pub fn new(name: String, scope: ScopeId, kind: ClassKind, span: Span) -> Self {
        Self {
            name,
            scope,
            kind,
            completeness: Completeness::Incomplete,
            flags: ClassFlags::new(),
            non_sync: NonSyncState::Sync,
            parents: Vec::new(),
            base: None,
            fields: Vec::new(),
            field_order: Vec::new(),
            virtual_table: Vec::new(),
            constructors: Vec::new(),
            destructor: None,
            decl: None,
            non_sync_expr: None,
            template_args_text: None,
            span,
        }
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.completeness == Completeness::Complete
    }

    pub fn field_by_name(&self, name: &str) -> Option<(u32, &Field)> {
        self.fields
            .iter()
            .enumerate()
            .find(|(_, field)| field.name == name)
            .map(|(index, field)| (index as u32, field))
    }

    /// Fields in storage order.
    pub fn ordered_fields(&self) -> impl Iterator<Item = &Field> + '_ {
        let fields = &self.fields;
        self.field_order
            .iter()
            .map(move |&index| &fields[index as usize])
    }

    pub fn find_virtual_slot(&self, name: &str, params: &[Type]) -> Option<u32> {
        self.virtual_table
            .iter()
            .position(|slot| slot.name == name && *slot.params == *params)
            .map(|index| index as u32)
    }
}

/// A zeroed constant of the given type, used for `zero_init` and enum
/// storage defaults. Classes have no zero initializer.
pub fn zero_value(ty: &Type) -> Option<ConstValue> {
    use crate::types::Fundamental;
    Some(match ty {
        Type::Fundamental(f) => match f {
            Fundamental::Bool => ConstValue::Bool(false),
            f if f.is_signed_integer() => ConstValue::SInt(0),
            f if f.is_unsigned_integer() => ConstValue::UInt(0),
            f if f.is_float() => ConstValue::Float(0.0),
            f if f.is_char() => ConstValue::Char(0),
            _ => return None,
        },
        Type::Enum(_) => ConstValue::EnumMember(0),
        Type::Array(array) => {
            let elem = zero_value(&array.elem)?;
            ConstValue::Aggregate(std::iter::repeat(elem).take(array.size as usize).collect())
        }
        Type::Tuple(elems) => ConstValue::Aggregate(
            elems
                .iter()
                .map(zero_value)
                .collect::<Option<Vec<_>>>()?
                .into(),
        ),
        Type::RawPointer(_) => ConstValue::UInt(0),
        Type::Class(_) | Type::FunctionPointer(_) => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Fundamental;

    #[test]
    fn kind_predicates() {
        assert!(!ClassKind::Struct.is_polymorph());
        assert!(ClassKind::Interface.is_polymorph());
        assert!(ClassKind::Interface.is_abstract());
        assert!(!ClassKind::PolymorphFinal.is_inheritable());
        assert!(ClassKind::PolymorphNonFinal.is_inheritable());
    }

    #[test]
    fn zero_values() {
        assert_eq!(
            zero_value(&Type::Fundamental(Fundamental::U32)),
            Some(ConstValue::UInt(0))
        );
        let arr = Type::array(Type::BOOL, 3);
        match zero_value(&arr) {
            Some(ConstValue::Aggregate(elems)) => {
                assert_eq!(elems.len(), 3);
                assert_eq!(elems[0], ConstValue::Bool(false));
            }
            other => panic!("unexpected zero value: {other:?}"),
        }
        assert_eq!(zero_value(&Type::Class(ClassId(0))), None);
    }
}
