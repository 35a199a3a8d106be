//! Template machinery: argument deduction against signature patterns,
//! specialization ordering, and the memoization key type. Instantiation
//! itself runs inside the build session, which owns the arenas and the
//! pending-instantiation queue.

use indexmap::IndexMap;
use sable_ast as ast;
use sable_ast::{Span, Visibility};

use crate::diagnostic::Error;
use crate::overload::ConversionsCompareResult;
use crate::scopes::ScopeId;
use crate::types::{ClassId, Type};
use crate::values::ConstValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TemplateId(pub(crate) u32);

impl TemplateId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug)]
pub enum TemplateKind<'src> {
    Class(&'src ast::TemplateDecl<'src, ast::ClassDecl<'src>>),
    Function(&'src ast::TemplateDecl<'src, ast::FnDecl<'src>>),
}

#[derive(Debug)]
pub struct Template<'src> {
    pub name: String,
    /// Scope the template was declared in; instantiated bodies resolve
    /// names from here, not from the use site.
    pub scope: ScopeId,
    pub kind: TemplateKind<'src>,
    pub visibility: Visibility,
    pub span: Span,
}

impl<'src> Template<'src> {
    pub fn params(&self) -> &'src [ast::TemplateParam<'src>] {
        match &self.kind {
            TemplateKind::Class(decl) => &decl.params,
            TemplateKind::Function(decl) => &decl.params,
        }
    }

    pub fn param_names(&self) -> impl Iterator<Item = &'src str> + '_ {
        self.params().iter().map(|param| param.name)
    }

    pub fn is_type_template(&self) -> bool {
        matches!(self.kind, TemplateKind::Class(_))
    }

    /// Signature patterns. The short form uses each declared parameter
    /// as its own signature argument.
    pub fn signature(&self) -> Signature<'src> {
        let (signature, params) = match &self.kind {
            TemplateKind::Class(decl) => (&decl.signature, &decl.params),
            TemplateKind::Function(decl) => (&decl.signature, &decl.params),
        };
        match signature {
            Some(explicit) => Signature::Explicit(explicit),
            None => Signature::Short(params),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Signature<'src> {
    Explicit(&'src [ast::SignatureParam<'src>]),
    Short(&'src [ast::TemplateParam<'src>]),
}

impl Signature<'_> {
    pub fn len(&self) -> usize {
        match self {
            Self::Explicit(params) => params.len(),
            Self::Short(params) => params.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One canonical template argument; the memoization key is the template
/// id plus the full argument list. Equal keys mean the instantiation is
/// reused, which makes repeated `Foo</Bar/>` the same type identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TemplateArgKey {
    Type(Type),
    Value { ty: Type, value: ConstValue },
}

pub type CacheKey = (TemplateId, Box<[TemplateArgKey]>);

/// Deduction state for one instantiation attempt, keyed by parameter
/// name in declaration order.
pub type DeducedArgs<'src> = IndexMap<&'src str, Option<TemplateArgKey>>;

pub fn fresh_deduced<'src>(template: &Template<'src>) -> DeducedArgs<'src> {
    template.param_names().map(|name| (name, None)).collect()
}

/// Queries deduction needs answered by the session.
pub trait DeduceEnv<'src> {
    /// Resolves a signature pattern leaf that names a concrete type.
    fn resolve_concrete(
        &mut self,
        name: &ast::TypeName<'src>,
        scope: ScopeId,
    ) -> Result<Type, Error>;

    /// Evaluates a non-parameter constant expression in a pattern.
    fn eval_const(
        &mut self,
        expr: &ast::Spanned<ast::Expr<'src>>,
        scope: ScopeId,
    ) -> Result<ConstValue, Error>;

    /// Template ids a path (without its final argument list) refers to.
    fn templates_of_path(&mut self, path: &ast::Path<'src>, scope: ScopeId) -> Vec<TemplateId>;

    /// Origin of a class produced by template instantiation.
    fn class_origin(&self, class: ClassId) -> Option<(TemplateId, &[TemplateArgKey])>;
}

fn bind<'src>(
    deduced: &mut DeducedArgs<'src>,
    name: &'src str,
    key: TemplateArgKey,
) -> bool {
    match deduced.get_mut(name) {
        Some(slot @ None) => {
            *slot = Some(key);
            true
        }
        Some(Some(existing)) => *existing == key,
        None => false,
    }
}

/// Matches one signature pattern against an actual type, binding
/// template parameters along the way. `Ok(false)` means a clean
/// mismatch; errors are reserved for ill-formed patterns.
pub fn deduce_type<'src>(
    pattern: &'src ast::TypeName<'src>,
    actual: &Type,
    deduced: &mut DeducedArgs<'src>,
    env: &mut dyn DeduceEnv<'src>,
    scope: ScopeId,
) -> Result<bool, Error> {
    match pattern {
        ast::TypeName::Path((path, span)) => {
            if let Some(name) = path.as_single_ident() {
                if deduced.contains_key(name) {
                    return Ok(bind(deduced, name, TemplateArgKey::Type(actual.clone())));
                }
            }
            let last = path
                .components
                .last()
                .ok_or(Error::TemplateParametersDeductionFailed(*span))?;
            if let Some(args) = &last.template_args {
                return deduce_specialization(path, args, actual, deduced, env, scope, *span);
            }
            let concrete = env.resolve_concrete(pattern, scope)?;
            Ok(concrete == *actual)
        }
        ast::TypeName::Array { elem, size, span } => {
            let Type::Array(actual_array) = actual else {
                return Ok(false);
            };
            if !deduce_type(elem, &actual_array.elem, deduced, env, scope)? {
                return Ok(false);
            }
            deduce_size(size, actual_array.size, deduced, env, scope, *span)
        }
        ast::TypeName::Tuple(elems, _) => {
            let Type::Tuple(actual_elems) = actual else {
                return Ok(false);
            };
            if elems.len() != actual_elems.len() {
                return Ok(false);
            }
            for (pattern, actual) in elems.iter().zip(actual_elems.iter()) {
                if !deduce_type(pattern, actual, deduced, env, scope)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        ast::TypeName::RawPointer(pointee, _) => {
            let Type::RawPointer(actual_pointee) = actual else {
                return Ok(false);
            };
            deduce_type(pointee, actual_pointee, deduced, env, scope)
        }
        ast::TypeName::FunctionPointer {
            params,
            ret,
            is_unsafe,
            ..
        } => {
            let Type::FunctionPointer(actual_fn) = actual else {
                return Ok(false);
            };
            if params.len() != actual_fn.params.len() || *is_unsafe != actual_fn.is_unsafe {
                return Ok(false);
            }
            for ((pattern, _), actual_param) in params.iter().zip(actual_fn.params.iter()) {
                if !deduce_type(pattern, &actual_param.ty, deduced, env, scope)? {
                    return Ok(false);
                }
            }
            match ret {
                Some(ret) => deduce_type(ret, &actual_fn.ret, deduced, env, scope),
                None => Ok(actual_fn.ret.is_void()),
            }
        }
    }
}

fn deduce_size<'src>(
    size: &'src ast::Spanned<ast::Expr<'src>>,
    actual: u64,
    deduced: &mut DeducedArgs<'src>,
    env: &mut dyn DeduceEnv<'src>,
    scope: ScopeId,
    _span: Span,
) -> Result<bool, Error> {
    if let ast::Expr::Path(path) = &size.0 {
        if let Some(name) = path.as_single_ident() {
            if deduced.contains_key(name) {
                let key = TemplateArgKey::Value {
                    ty: Type::Fundamental(crate::types::Fundamental::Size),
                    value: ConstValue::UInt(u128::from(actual)),
                };
                return Ok(bind(deduced, name, key));
            }
        }
    }
    let value = env.eval_const(size, scope)?;
    Ok(value.as_uint() == Some(actual))
}

#[allow(clippy::too_many_arguments)]
fn deduce_specialization<'src>(
    path: &'src ast::Path<'src>,
    args: &'src [ast::TemplateArg<'src>],
    actual: &Type,
    deduced: &mut DeducedArgs<'src>,
    env: &mut dyn DeduceEnv<'src>,
    scope: ScopeId,
    _span: Span,
) -> Result<bool, Error> {
    let Type::Class(class) = actual else {
        return Ok(false);
    };
    let Some((origin_template, origin_args)) = env.class_origin(*class) else {
        return Ok(false);
    };
    let origin_args: Vec<TemplateArgKey> = origin_args.to_vec();
    let candidates = env.templates_of_path(path, scope);
    if !candidates.contains(&origin_template) {
        return Ok(false);
    }
    if args.len() != origin_args.len() {
        return Ok(false);
    }
    for (pattern, actual_key) in args.iter().zip(origin_args.iter()) {
        let matched = match (pattern, actual_key) {
            (ast::TemplateArg::Type(pattern), TemplateArgKey::Type(actual)) => {
                deduce_type(pattern, actual, deduced, env, scope)?
            }
            (ast::TemplateArg::Expr(expr), TemplateArgKey::Value { ty, value }) => {
                match &expr.0 {
                    ast::Expr::Path(path) => match path.as_single_ident() {
                        Some(name) if deduced.contains_key(name) => bind(
                            deduced,
                            name,
                            TemplateArgKey::Value {
                                ty: ty.clone(),
                                value: value.clone(),
                            },
                        ),
                        _ => env.eval_const(expr, scope)? == *value,
                    },
                    _ => env.eval_const(expr, scope)? == *value,
                }
            }
            _ => false,
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Ranking of signature patterns for picking the more specialized type
/// template when several match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum PatternRank {
    Param,
    Structural,
    Concrete,
}

fn rank<'src>(pattern: &ast::TypeName<'src>, param_names: &[&'src str]) -> PatternRank {
    match pattern {
        ast::TypeName::Path((path, _)) => match path.as_single_ident() {
            Some(name) if param_names.contains(&name) => PatternRank::Param,
            _ => {
                let has_args = path
                    .components
                    .last()
                    .is_some_and(|c| c.template_args.is_some());
                if has_args {
                    PatternRank::Structural
                } else {
                    PatternRank::Concrete
                }
            }
        },
        _ => PatternRank::Structural,
    }
}

fn children<'a, 'src>(pattern: &'a ast::TypeName<'src>) -> Vec<&'a ast::TypeName<'src>> {
    match pattern {
        ast::TypeName::Path((path, _)) => path
            .components
            .last()
            .and_then(|c| c.template_args.as_deref())
            .map(|args| {
                args.iter()
                    .filter_map(|arg| match arg {
                        ast::TemplateArg::Type(ty) => Some(ty),
                        ast::TemplateArg::Expr(_) => None,
                    })
                    .collect()
            })
            .unwrap_or_default(),
        ast::TypeName::Array { elem, .. } => vec![elem],
        ast::TypeName::Tuple(elems, _) => elems.iter().collect(),
        ast::TypeName::RawPointer(pointee, _) => vec![pointee],
        ast::TypeName::FunctionPointer { params, ret, .. } => {
            let mut out: Vec<&ast::TypeName<'src>> = params.iter().map(|(ty, _)| ty).collect();
            if let Some(ret) = ret {
                out.push(ret);
            }
            out
        }
    }
}

/// Compares two signature patterns that both matched the same argument;
/// the more specialized one wins the instantiation.
pub fn specialization_compare<'src>(
    left: &ast::TypeName<'src>,
    left_params: &[&'src str],
    right: &ast::TypeName<'src>,
    right_params: &[&'src str],
) -> ConversionsCompareResult {
    use ConversionsCompareResult::*;
    let left_rank = rank(left, left_params);
    let right_rank = rank(right, right_params);
    match left_rank.cmp(&right_rank) {
        std::cmp::Ordering::Greater => return LeftIsBetter,
        std::cmp::Ordering::Less => return RightIsBetter,
        std::cmp::Ordering::Equal => {}
    }
    if left_rank != PatternRank::Structural {
        return Same;
    }
    let left_children = children(left);
    let right_children = children(right);
    if left_children.len() != right_children.len() {
        return Incomparable;
    }
    let mut result = Same;
    for (l, r) in left_children.iter().zip(&right_children) {
        let child = specialization_compare(l, left_params, r, right_params);
        result = match (result, child) {
            (Same, child) => child,
            (acc, Same) => acc,
            (LeftIsBetter, LeftIsBetter) => LeftIsBetter,
            (RightIsBetter, RightIsBetter) => RightIsBetter,
            _ => return Incomparable,
        };
    }
    result
}

/// Rendered argument list for instantiation result names, e.g.
/// `Box</i32, 4/>` becomes `Box</i32,4/>`.
pub fn args_display(args: &[TemplateArgKey], type_name: impl Fn(&Type) -> String) -> String {
    let rendered: Vec<String> = args
        .iter()
        .map(|arg| match arg {
            TemplateArgKey::Type(ty) => type_name(ty),
            TemplateArgKey::Value { value, .. } => match value {
                ConstValue::Bool(v) => v.to_string(),
                ConstValue::SInt(v) => v.to_string(),
                ConstValue::UInt(v) => v.to_string(),
                ConstValue::Char(v) => v.to_string(),
                ConstValue::EnumMember(v) => v.to_string(),
                ConstValue::Float(v) => v.to_string(),
                ConstValue::Aggregate(_) => "<aggregate>".into(),
            },
        })
        .collect();
    format!("</{}/>", rendered.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Fundamental;
    use sable_ast::{Path, TypeName};

    struct NoEnv;

    impl<'src> DeduceEnv<'src> for NoEnv {
        fn resolve_concrete(
            &mut self,
            name: &ast::TypeName<'src>,
            _scope: ScopeId,
        ) -> Result<Type, Error> {
            match name {
                TypeName::Path((path, span)) => path
                    .as_single_ident()
                    .and_then(Fundamental::from_name)
                    .map(Type::Fundamental)
                    .ok_or(Error::TemplateParametersDeductionFailed(*span)),
                other => Err(Error::TemplateParametersDeductionFailed(other.span())),
            }
        }

        fn eval_const(
            &mut self,
            expr: &ast::Spanned<ast::Expr<'src>>,
            _scope: ScopeId,
        ) -> Result<ConstValue, Error> {
            match expr.0 {
                ast::Expr::Number(literal) => match literal.value {
                    ast::NumberValue::Int(v) => Ok(ConstValue::UInt(u128::from(v))),
                    ast::NumberValue::Float(_) => Err(Error::ExpectedConstantExpression(expr.1)),
                },
                _ => Err(Error::ExpectedConstantExpression(expr.1)),
            }
        }

        fn templates_of_path(&mut self, _: &ast::Path<'src>, _: ScopeId) -> Vec<TemplateId> {
            Vec::new()
        }

        fn class_origin(&self, _: ClassId) -> Option<(TemplateId, &[TemplateArgKey])> {
            None
        }
    }

    fn deduced_for(names: &[&'static str]) -> DeducedArgs<'static> {
        names.iter().map(|&n| (n, None)).collect()
    }

    #[test]
    fn plain_parameter_binds_once() {
        let pattern = TypeName::ident("T", Span::ZERO);
        let mut deduced = deduced_for(&["T"]);
        let i32_ty = Type::Fundamental(Fundamental::I32);
        assert!(deduce_type(&pattern, &i32_ty, &mut deduced, &mut NoEnv, ScopeId(0)).unwrap());
        assert_eq!(deduced["T"], Some(TemplateArgKey::Type(i32_ty.clone())));

        // A second occurrence must agree.
        assert!(deduce_type(&pattern, &i32_ty, &mut deduced, &mut NoEnv, ScopeId(0)).unwrap());
        assert!(!deduce_type(&pattern, &Type::BOOL, &mut deduced, &mut NoEnv, ScopeId(0)).unwrap());
    }

    #[test]
    fn array_pattern_binds_element_and_size() {
        let pattern = TypeName::Array {
            elem: Box::new(TypeName::ident("T", Span::ZERO)),
            size: Box::new((ast::Expr::ident("N"), Span::ZERO)),
            span: Span::ZERO,
        };
        let mut deduced = deduced_for(&["T", "N"]);
        let actual = Type::array(Type::BOOL, 7);
        assert!(deduce_type(&pattern, &actual, &mut deduced, &mut NoEnv, ScopeId(0)).unwrap());
        assert_eq!(deduced["T"], Some(TemplateArgKey::Type(Type::BOOL)));
        assert!(matches!(
            deduced["N"],
            Some(TemplateArgKey::Value {
                value: ConstValue::UInt(7),
                ..
            })
        ));
    }

    #[test]
    fn concrete_pattern_requires_exact_type() {
        let pattern = TypeName::ident("u32", Span::ZERO);
        let mut deduced = deduced_for(&["T"]);
        let u32_ty = Type::Fundamental(Fundamental::U32);
        assert!(deduce_type(&pattern, &u32_ty, &mut deduced, &mut NoEnv, ScopeId(0)).unwrap());
        assert!(!deduce_type(
            &pattern,
            &Type::Fundamental(Fundamental::I32),
            &mut deduced,
            &mut NoEnv,
            ScopeId(0)
        )
        .unwrap());
    }

    #[test]
    fn concrete_beats_parameter_in_specialization_order() {
        let concrete = TypeName::ident("u32", Span::ZERO);
        let param = TypeName::ident("T", Span::ZERO);
        assert_eq!(
            specialization_compare(&concrete, &[], &param, &["T"]),
            ConversionsCompareResult::LeftIsBetter
        );
        assert_eq!(
            specialization_compare(&param, &["T"], &param, &["T"]),
            ConversionsCompareResult::Same
        );
    }

    #[test]
    fn structural_compare_recurses() {
        // [T, 4] vs [u32, 4]: the concrete element is more specialized.
        let size = || Box::new((ast::Expr::int(4, ""), Span::ZERO));
        let with_param = TypeName::Array {
            elem: Box::new(TypeName::ident("T", Span::ZERO)),
            size: size(),
            span: Span::ZERO,
        };
        let with_concrete = TypeName::Array {
            elem: Box::new(TypeName::ident("u32", Span::ZERO)),
            size: size(),
            span: Span::ZERO,
        };
        assert_eq!(
            specialization_compare(&with_concrete, &[], &with_param, &["T"]),
            ConversionsCompareResult::LeftIsBetter
        );
    }

    #[test]
    fn args_display_renders_values() {
        let args = [
            TemplateArgKey::Type(Type::BOOL),
            TemplateArgKey::Value {
                ty: Type::Fundamental(Fundamental::U32),
                value: ConstValue::UInt(4),
            },
        ];
        let text = args_display(&args, |_| "bool".into());
        assert_eq!(text, "</bool,4/>");
    }

    #[test]
    fn path_ident_helper() {
        let path = Path::ident("T");
        assert_eq!(path.as_single_ident(), Some("T"));
    }
}
