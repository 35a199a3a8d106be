use std::rc::Rc;

use sable_ast::ValueModifier;

/// Handle of a class in the session's class arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClassId(pub(crate) u32);

impl ClassId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Handle of an enum in the session's enum arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EnumId(pub(crate) u32);

impl EnumId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// The built-in scalar types. `Invalid` is the recovery type produced
/// after an error has already been reported; it silently unifies with
/// everything so one broken expression does not cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Fundamental {
    Invalid,
    Void,
    Bool,
    I8,
    I16,
    I32,
    I64,
    I128,
    U8,
    U16,
    U32,
    U64,
    U128,
    SSize,
    Size,
    F32,
    F64,
    Char8,
    Char16,
    Char32,
}

impl Fundamental {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "void" => Self::Void,
            "bool" => Self::Bool,
            "i8" => Self::I8,
            "i16" => Self::I16,
            "i32" => Self::I32,
            "i64" => Self::I64,
            "i128" => Self::I128,
            "u8" => Self::U8,
            "u16" => Self::U16,
            "u32" => Self::U32,
            "u64" => Self::U64,
            "u128" => Self::U128,
            "ssize_type" => Self::SSize,
            "size_type" => Self::Size,
            "f32" => Self::F32,
            "f64" => Self::F64,
            "char8" => Self::Char8,
            "char16" => Self::Char16,
            "char32" => Self::Char32,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Invalid => "invalid type",
            Self::Void => "void",
            Self::Bool => "bool",
            Self::I8 => "i8",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::I128 => "i128",
            Self::U8 => "u8",
            Self::U16 => "u16",
            Self::U32 => "u32",
            Self::U64 => "u64",
            Self::U128 => "u128",
            Self::SSize => "ssize_type",
            Self::Size => "size_type",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::Char8 => "char8",
            Self::Char16 => "char16",
            Self::Char32 => "char32",
        }
    }

    pub fn is_signed_integer(self) -> bool {
        matches!(
            self,
            Self::I8 | Self::I16 | Self::I32 | Self::I64 | Self::I128 | Self::SSize
        )
    }

    pub fn is_unsigned_integer(self) -> bool {
        matches!(
            self,
            Self::U8 | Self::U16 | Self::U32 | Self::U64 | Self::U128 | Self::Size
        )
    }

    #[inline]
    pub fn is_integer(self) -> bool {
        self.is_signed_integer() || self.is_unsigned_integer()
    }

    #[inline]
    pub fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    #[inline]
    pub fn is_char(self) -> bool {
        matches!(self, Self::Char8 | Self::Char16 | Self::Char32)
    }

    #[inline]
    pub fn is_numeric(self) -> bool {
        self.is_integer() || self.is_float()
    }

    /// Storage size given the target pointer size.
    pub fn size_in_bytes(self, pointer_size: u32) -> u32 {
        match self {
            Self::Invalid | Self::Void => 0,
            Self::Bool | Self::I8 | Self::U8 | Self::Char8 => 1,
            Self::I16 | Self::U16 | Self::Char16 => 2,
            Self::I32 | Self::U32 | Self::Char32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
            Self::I128 | Self::U128 => 16,
            Self::SSize | Self::Size => pointer_size,
        }
    }
}

/// A fully resolved type. Cheap to clone; composite payloads are
/// refcounted and classes/enums are arena handles, so equality and
/// hashing are structural and fast.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Fundamental(Fundamental),
    Array(Rc<ArrayType>),
    Tuple(Rc<[Type]>),
    RawPointer(Rc<Type>),
    FunctionPointer(Rc<FunctionType>),
    Class(ClassId),
    Enum(EnumId),
}

impl Type {
    pub const INVALID: Type = Type::Fundamental(Fundamental::Invalid);
    pub const VOID: Type = Type::Fundamental(Fundamental::Void);
    pub const BOOL: Type = Type::Fundamental(Fundamental::Bool);

    pub fn array(elem: Type, size: u64) -> Self {
        Self::Array(Rc::new(ArrayType { elem, size }))
    }

    pub fn tuple(elems: impl Into<Rc<[Type]>>) -> Self {
        Self::Tuple(elems.into())
    }

    #[inline]
    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::Fundamental(Fundamental::Invalid))
    }

    #[inline]
    pub fn is_void(&self) -> bool {
        matches!(self, Self::Fundamental(Fundamental::Void))
    }

    #[inline]
    pub fn as_fundamental(&self) -> Option<Fundamental> {
        match self {
            Self::Fundamental(fundamental) => Some(*fundamental),
            _ => None,
        }
    }

    #[inline]
    pub fn as_class(&self) -> Option<ClassId> {
        match self {
            Self::Class(id) => Some(*id),
            _ => None,
        }
    }

    #[inline]
    pub fn as_enum(&self) -> Option<EnumId> {
        match self {
            Self::Enum(id) => Some(*id),
            _ => None,
        }
    }

    /// Same-type check that treats the error recovery type as equal to
    /// anything, so follow-up errors are not produced for expressions
    /// that already failed.
    pub fn matches(&self, other: &Type) -> bool {
        self.is_invalid() || other.is_invalid() || self == other
    }

    /// Walks into arrays and tuples to find class handles; used for
    /// completeness requests on compound types.
    pub fn for_each_class(&self, f: &mut impl FnMut(ClassId)) {
        match self {
            Self::Class(id) => f(*id),
            Self::Array(array) => array.elem.for_each_class(f),
            Self::Tuple(elems) => {
                for elem in elems.iter() {
                    elem.for_each_class(f);
                }
            }
            Self::Fundamental(_) | Self::RawPointer(_) | Self::FunctionPointer(_) | Self::Enum(_) => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArrayType {
    pub elem: Type,
    pub size: u64,
}

/// How a parameter or return slot holds its payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ValueType {
    #[default]
    Value,
    ReferenceMut,
    ReferenceImut,
}

impl ValueType {
    pub fn from_modifier(modifier: ValueModifier) -> Self {
        match modifier {
            ValueModifier::Value => Self::Value,
            ValueModifier::RefMut => Self::ReferenceMut,
            ValueModifier::RefImut => Self::ReferenceImut,
        }
    }

    #[inline]
    pub fn is_reference(self) -> bool {
        !matches!(self, Self::Value)
    }

    #[inline]
    pub fn is_mutable_reference(self) -> bool {
        matches!(self, Self::ReferenceMut)
    }
}

/// Full signature of a function, including the reference notation that
/// the borrow analysis consumes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionType {
    pub params: Box<[FunctionParam]>,
    pub ret: Type,
    pub ret_value: ValueType,
    /// Which parameters (or their inner tags) the returned reference may
    /// point into.
    pub return_references: Box<[sable_ast::ParamReference]>,
    pub references_pollution: Box<[sable_ast::PollutionPair]>,
    pub is_unsafe: bool,
    pub calling_convention: CallingConvention,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionParam {
    pub ty: Type,
    pub value_type: ValueType,
}

impl FunctionType {
    /// Signatures are overload-distinct on parameter types and on the
    /// mutable/immutable reference split; return type never participates.
    pub fn same_signature(&self, other: &FunctionType) -> bool {
        self.params.len() == other.params.len()
            && self
                .params
                .iter()
                .zip(other.params.iter())
                .all(|(a, b)| a.ty == b.ty && reference_class(a.value_type) == reference_class(b.value_type))
    }
}

/// Overloading distinguishes only mutable references from everything
/// else: a by-value parameter and an immutable-reference parameter
/// accept the same argument set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgOverloadingClass {
    MutableReference,
    ImmutableReference,
}

pub fn reference_class(value_type: ValueType) -> ArgOverloadingClass {
    match value_type {
        ValueType::ReferenceMut => ArgOverloadingClass::MutableReference,
        ValueType::Value | ValueType::ReferenceImut => ArgOverloadingClass::ImmutableReference,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CallingConvention {
    #[default]
    Default,
    C,
    Fast,
    Cold,
}

impl CallingConvention {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "default" | "Ü" => Self::Default,
            "C" => Self::C,
            "fast" => Self::Fast,
            "cold" => Self::Cold,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fundamental_classification() {
        assert!(Fundamental::I32.is_signed_integer());
        assert!(Fundamental::Size.is_unsigned_integer());
        assert!(!Fundamental::F32.is_integer());
        assert!(Fundamental::Char16.is_char());
        assert_eq!(Fundamental::from_name("u64"), Some(Fundamental::U64));
        assert_eq!(Fundamental::from_name("int"), None);
    }

    #[test]
    fn structural_equality() {
        let a = Type::array(Type::Fundamental(Fundamental::I32), 4);
        let b = Type::array(Type::Fundamental(Fundamental::I32), 4);
        let c = Type::array(Type::Fundamental(Fundamental::I32), 5);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(Type::INVALID.matches(&a));
        assert!(!a.matches(&c));
    }

    #[test]
    fn overloading_reference_classes() {
        assert_eq!(
            reference_class(ValueType::Value),
            ArgOverloadingClass::ImmutableReference
        );
        assert_eq!(
            reference_class(ValueType::ReferenceImut),
            ArgOverloadingClass::ImmutableReference
        );
        assert_eq!(
            reference_class(ValueType::ReferenceMut),
            ArgOverloadingClass::MutableReference
        );
    }
}
