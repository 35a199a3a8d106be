//! Symbol name mangling. Two schemes are provided; which one is used
//! is a build option so that object files link against the platform
//! toolchain's expectations.

use std::fmt::Write;

use crate::types::{ClassId, EnumId, Fundamental, FunctionType, Type, ValueType};

/// Resolves arena handles to qualified name paths; implemented by the
/// build session.
pub trait NamePaths {
    fn class_path(&self, id: ClassId) -> Vec<String>;
    fn enum_path(&self, id: EnumId) -> Vec<String>;
}

/// Special function names get scheme-specific spellings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MangledName<'a> {
    Plain(&'a str),
    Constructor,
    Destructor,
    Operator(sable_ast::OverloadedOperator),
}

pub trait Mangler {
    fn mangle_function(
        &self,
        paths: &dyn NamePaths,
        scope_path: &[String],
        name: MangledName<'_>,
        ty: &FunctionType,
        param_types: &[Type],
    ) -> String;

    fn mangle_global_variable(&self, scope_path: &[String], name: &str) -> String;

    fn mangle_virtual_table(&self, paths: &dyn NamePaths, class: ClassId) -> String;

    /// Scheme-specific spelling of a single type, as it appears inside
    /// a mangled signature.
    fn mangle_type(&self, paths: &dyn NamePaths, ty: &Type) -> String;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ManglingScheme {
    #[default]
    ItaniumAbi,
    Msvc,
}

pub fn mangler_for(scheme: ManglingScheme) -> Box<dyn Mangler> {
    match scheme {
        ManglingScheme::ItaniumAbi => Box::new(ItaniumMangler),
        ManglingScheme::Msvc => Box::new(MsvcMangler),
    }
}

pub struct ItaniumMangler;

impl ItaniumMangler {
    fn fundamental_code(f: Fundamental) -> &'static str {
        match f {
            Fundamental::Invalid => "z",
            Fundamental::Void => "v",
            Fundamental::Bool => "b",
            Fundamental::I8 => "a",
            Fundamental::U8 => "h",
            Fundamental::I16 => "s",
            Fundamental::U16 => "t",
            Fundamental::I32 => "i",
            Fundamental::U32 => "j",
            Fundamental::I64 => "x",
            Fundamental::U64 => "y",
            Fundamental::I128 => "n",
            Fundamental::U128 => "o",
            Fundamental::SSize => "l",
            Fundamental::Size => "m",
            Fundamental::F32 => "f",
            Fundamental::F64 => "d",
            Fundamental::Char8 => "c",
            Fundamental::Char16 => "Ds",
            Fundamental::Char32 => "Di",
        }
    }

    fn operator_code(op: sable_ast::OverloadedOperator) -> &'static str {
        use sable_ast::OverloadedOperator as Op;
        match op {
            Op::Add => "pl",
            Op::Sub => "mi",
            Op::Mul => "ml",
            Op::Div => "dv",
            Op::Rem => "rm",
            Op::Equals => "eq",
            Op::Compare => "ss",
            Op::Assign => "aS",
            Op::Indexing => "ix",
            Op::Call => "cl",
        }
    }

    fn write_source_name(out: &mut String, name: &str) {
        let _ = write!(out, "{}{}", name.len(), name);
    }

    fn write_path_name(out: &mut String, path: &[String], last: &str) {
        if path.is_empty() {
            Self::write_source_name(out, last);
        } else {
            out.push('N');
            for component in path {
                Self::write_source_name(out, component);
            }
            Self::write_source_name(out, last);
            out.push('E');
        }
    }

    fn write_type(out: &mut String, paths: &dyn NamePaths, ty: &Type) {
        match ty {
            Type::Fundamental(f) => out.push_str(Self::fundamental_code(*f)),
            Type::Array(array) => {
                let _ = write!(out, "A{}_", array.size);
                Self::write_type(out, paths, &array.elem);
            }
            Type::Tuple(elems) => {
                let _ = write!(out, "T{}", elems.len());
                for elem in elems.iter() {
                    Self::write_type(out, paths, elem);
                }
                out.push('E');
            }
            Type::RawPointer(pointee) => {
                out.push('P');
                Self::write_type(out, paths, pointee);
            }
            Type::FunctionPointer(fn_type) => {
                out.push_str("PF");
                Self::write_type(out, paths, &fn_type.ret);
                if fn_type.params.is_empty() {
                    out.push('v');
                }
                for param in fn_type.params.iter() {
                    Self::write_param(out, paths, &param.ty, param.value_type);
                }
                out.push('E');
            }
            Type::Class(id) => {
                let path = paths.class_path(*id);
                let (last, init) = path.split_last().map_or(("", &[][..]), |(l, i)| (l, i));
                Self::write_path_name(out, init, last);
            }
            Type::Enum(id) => {
                let path = paths.enum_path(*id);
                let (last, init) = path.split_last().map_or(("", &[][..]), |(l, i)| (l, i));
                Self::write_path_name(out, init, last);
            }
        }
    }

    fn write_param(out: &mut String, paths: &dyn NamePaths, ty: &Type, value_type: ValueType) {
        match value_type {
            ValueType::Value => {}
            ValueType::ReferenceMut => out.push('R'),
            ValueType::ReferenceImut => out.push_str("RK"),
        }
        Self::write_type(out, paths, ty);
    }
}

impl Mangler for ItaniumMangler {
    fn mangle_function(
        &self,
        paths: &dyn NamePaths,
        scope_path: &[String],
        name: MangledName<'_>,
        ty: &FunctionType,
        param_types: &[Type],
    ) -> String {
        let mut out = String::from("_Z");
        let last;
        let last = match name {
            MangledName::Plain(name) => {
                last = format!("{}{}", name.len(), name);
                last.as_str()
            }
            MangledName::Constructor => "C1",
            MangledName::Destructor => "D0",
            MangledName::Operator(op) => Self::operator_code(op),
        };
        if scope_path.is_empty() {
            out.push_str(last);
        } else {
            out.push('N');
            for component in scope_path {
                Self::write_source_name(&mut out, component);
            }
            out.push_str(last);
            out.push('E');
        }
        if param_types.is_empty() {
            out.push('v');
        }
        for (param_ty, param) in param_types.iter().zip(ty.params.iter()) {
            Self::write_param(&mut out, paths, param_ty, param.value_type);
        }
        out
    }

    fn mangle_global_variable(&self, scope_path: &[String], name: &str) -> String {
        if scope_path.is_empty() {
            return name.to_owned();
        }
        let mut out = String::from("_ZN");
        for component in scope_path {
            Self::write_source_name(&mut out, component);
        }
        Self::write_source_name(&mut out, name);
        out.push('E');
        out
    }

    fn mangle_virtual_table(&self, paths: &dyn NamePaths, class: ClassId) -> String {
        let mut out = String::from("_ZTV");
        Self::write_type(&mut out, paths, &Type::Class(class));
        out
    }

    fn mangle_type(&self, paths: &dyn NamePaths, ty: &Type) -> String {
        let mut out = String::new();
        Self::write_type(&mut out, paths, ty);
        out
    }
}

pub struct MsvcMangler;

impl MsvcMangler {
    fn fundamental_code(f: Fundamental) -> &'static str {
        match f {
            Fundamental::Invalid => "Z",
            Fundamental::Void => "X",
            Fundamental::Bool => "_N",
            Fundamental::I8 => "C",
            Fundamental::U8 => "E",
            Fundamental::I16 => "F",
            Fundamental::U16 => "G",
            Fundamental::I32 => "H",
            Fundamental::U32 => "I",
            Fundamental::I64 => "_J",
            Fundamental::U64 => "_K",
            Fundamental::I128 => "_L",
            Fundamental::U128 => "_M",
            Fundamental::SSize => "_J",
            Fundamental::Size => "_K",
            Fundamental::F32 => "M",
            Fundamental::F64 => "N",
            Fundamental::Char8 => "D",
            Fundamental::Char16 => "_S",
            Fundamental::Char32 => "_U",
        }
    }

    fn write_qualified(out: &mut String, scope_path: &[String], name: &str) {
        let _ = write!(out, "{name}@");
        for component in scope_path.iter().rev() {
            let _ = write!(out, "{component}@");
        }
        out.push('@');
    }

    fn write_type(out: &mut String, paths: &dyn NamePaths, ty: &Type) {
        match ty {
            Type::Fundamental(f) => out.push_str(Self::fundamental_code(*f)),
            Type::Array(array) => {
                let _ = write!(out, "Y{}", array.size);
                Self::write_type(out, paths, &array.elem);
            }
            Type::Tuple(elems) => {
                let _ = write!(out, "U{}", elems.len());
                for elem in elems.iter() {
                    Self::write_type(out, paths, elem);
                }
                out.push('@');
            }
            Type::RawPointer(pointee) => {
                out.push_str("PEA");
                Self::write_type(out, paths, pointee);
            }
            Type::FunctionPointer(fn_type) => {
                out.push_str("P6A");
                Self::write_type(out, paths, &fn_type.ret);
                for param in fn_type.params.iter() {
                    Self::write_type(out, paths, &param.ty);
                }
                out.push('Z');
            }
            Type::Class(id) => {
                let path = paths.class_path(*id);
                out.push('V');
                let (last, init) = path.split_last().map_or(("", &[][..]), |(l, i)| (l, i));
                Self::write_qualified(out, init, last);
            }
            Type::Enum(id) => {
                let path = paths.enum_path(*id);
                out.push_str("W4");
                let (last, init) = path.split_last().map_or(("", &[][..]), |(l, i)| (l, i));
                Self::write_qualified(out, init, last);
            }
        }
    }
}

impl Mangler for MsvcMangler {
    fn mangle_function(
        &self,
        paths: &dyn NamePaths,
        scope_path: &[String],
        name: MangledName<'_>,
        ty: &FunctionType,
        param_types: &[Type],
    ) -> String {
        let mut out = String::from("?");
        let spelled;
        let spelled = match name {
            MangledName::Plain(name) => name,
            MangledName::Constructor => "?0",
            MangledName::Destructor => "?1",
            MangledName::Operator(op) => {
                use sable_ast::OverloadedOperator as Op;
                spelled = match op {
                    Op::Add => "??H",
                    Op::Sub => "??G",
                    Op::Mul => "??D",
                    Op::Div => "??K",
                    Op::Rem => "??L",
                    Op::Equals => "??8",
                    Op::Compare => "??__M",
                    Op::Assign => "??4",
                    Op::Indexing => "??A",
                    Op::Call => "??R",
                }
                .to_owned();
                spelled.as_str()
            }
        };
        Self::write_qualified(&mut out, scope_path, spelled);
        out.push_str("YA");
        Self::write_type(&mut out, paths, &ty.ret);
        if param_types.is_empty() {
            out.push('X');
        } else {
            for (param_ty, param) in param_types.iter().zip(ty.params.iter()) {
                if param.value_type.is_reference() {
                    out.push_str("AEA");
                }
                Self::write_type(&mut out, paths, param_ty);
            }
            out.push('@');
        }
        out.push('Z');
        out
    }

    fn mangle_global_variable(&self, scope_path: &[String], name: &str) -> String {
        let mut out = String::from("?");
        Self::write_qualified(&mut out, scope_path, name);
        out.push('3');
        out
    }

    fn mangle_virtual_table(&self, paths: &dyn NamePaths, class: ClassId) -> String {
        let mut out = String::from("??_7");
        Self::write_type(&mut out, paths, &Type::Class(class));
        out.push_str("6B@");
        out
    }

    fn mangle_type(&self, paths: &dyn NamePaths, ty: &Type) -> String {
        let mut out = String::new();
        Self::write_type(&mut out, paths, ty);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CallingConvention, FunctionParam, FunctionType};

    struct NoPaths;

    impl NamePaths for NoPaths {
        fn class_path(&self, _: ClassId) -> Vec<String> {
            vec!["C".into()]
        }

        fn enum_path(&self, _: EnumId) -> Vec<String> {
            vec!["E".into()]
        }
    }

    fn fn_type(params: Vec<(Type, ValueType)>, ret: Type) -> (FunctionType, Vec<Type>) {
        let param_types: Vec<Type> = params.iter().map(|(t, _)| t.clone()).collect();
        let ty = FunctionType {
            params: params
                .into_iter()
                .map(|(ty, value_type)| FunctionParam { ty, value_type })
                .collect(),
            ret,
            ret_value: ValueType::Value,
            return_references: Box::new([]),
            references_pollution: Box::new([]),
            is_unsafe: false,
            calling_convention: CallingConvention::Default,
        };
        (ty, param_types)
    }

    #[test]
    fn itanium_plain_function() {
        let (ty, params) = fn_type(
            vec![(Type::Fundamental(Fundamental::I32), ValueType::Value)],
            Type::VOID,
        );
        let mangled = ItaniumMangler.mangle_function(
            &NoPaths,
            &[],
            MangledName::Plain("Foo"),
            &ty,
            &params,
        );
        assert_eq!(mangled, "_Z3Fooi");
    }

    #[test]
    fn itanium_nested_with_references() {
        let (ty, params) = fn_type(
            vec![
                (Type::Fundamental(Fundamental::U64), ValueType::ReferenceImut),
                (Type::BOOL, ValueType::ReferenceMut),
            ],
            Type::VOID,
        );
        let mangled = ItaniumMangler.mangle_function(
            &NoPaths,
            &["NS".into()],
            MangledName::Plain("Bar"),
            &ty,
            &params,
        );
        assert_eq!(mangled, "_ZN2NS3BarERKyRb");
    }

    #[test]
    fn itanium_no_params_is_void() {
        let (ty, params) = fn_type(vec![], Type::VOID);
        let mangled = ItaniumMangler.mangle_function(
            &NoPaths,
            &[],
            MangledName::Plain("Main"),
            &ty,
            &params,
        );
        assert_eq!(mangled, "_Z4Mainv");
    }

    #[test]
    fn itanium_global_variable() {
        assert_eq!(
            ItaniumMangler.mangle_global_variable(&["A".into(), "B".into()], "x"),
            "_ZN1A1B1xE"
        );
        assert_eq!(ItaniumMangler.mangle_global_variable(&[], "x"), "x");
    }

    #[test]
    fn type_spellings_per_scheme() {
        let i32_ty = Type::Fundamental(Fundamental::I32);
        assert_eq!(ItaniumMangler.mangle_type(&NoPaths, &i32_ty), "i");
        assert_eq!(ItaniumMangler.mangle_type(&NoPaths, &Type::BOOL), "b");
        assert_eq!(
            ItaniumMangler.mangle_type(&NoPaths, &Type::Fundamental(Fundamental::F64)),
            "d"
        );
        assert_eq!(MsvcMangler.mangle_type(&NoPaths, &i32_ty), "H");
        assert_eq!(MsvcMangler.mangle_type(&NoPaths, &Type::BOOL), "_N");
        assert_eq!(
            MsvcMangler.mangle_type(&NoPaths, &Type::Fundamental(Fundamental::F64)),
            "N"
        );
        assert_eq!(ItaniumMangler.mangle_type(&NoPaths, &Type::Class(ClassId(0))), "1C");
    }

    #[test]
    fn schemes_differ() {
        let (ty, params) = fn_type(
            vec![(Type::Fundamental(Fundamental::I32), ValueType::Value)],
            Type::VOID,
        );
        let itanium =
            ItaniumMangler.mangle_function(&NoPaths, &[], MangledName::Plain("Foo"), &ty, &params);
        let msvc =
            MsvcMangler.mangle_function(&NoPaths, &[], MangledName::Plain("Foo"), &ty, &params);
        assert_ne!(itanium, msvc);
        assert!(msvc.starts_with("?Foo@"));
        assert!(msvc.ends_with('Z'));
    }
}
