use indexmap::IndexMap;
use sable_ast as ast;
use sable_ast::Span;

use crate::diagnostic::{Error, Reporter};
use crate::types::Fundamental;

#[derive(Debug)]
pub struct Enum {
    pub name: String,
    /// Qualified name components, for display and mangling.
    pub path: Vec<String>,
    pub underlying: Fundamental,
    /// Member name to ordinal, in declaration order.
    pub members: IndexMap<String, u64>,
    pub span: Span,
}

impl Enum {
    pub fn member(&self, name: &str) -> Option<u64> {
        self.members.get(name).copied()
    }
}

/// Largest representable member ordinal for an integer underlying type.
fn max_ordinal(underlying: Fundamental, pointer_size: u32) -> u128 {
    let bits = underlying.size_in_bytes(pointer_size) * 8;
    let value_bits = bits - u32::from(underlying.is_signed_integer());
    if value_bits >= 128 {
        u128::MAX
    } else {
        (1u128 << value_bits) - 1
    }
}

/// Smallest unsigned type that fits the member count, when no explicit
/// underlying type is given.
fn default_underlying(member_count: usize) -> Fundamental {
    if member_count <= usize::from(u8::MAX) + 1 {
        Fundamental::U8
    } else if member_count <= usize::from(u16::MAX) + 1 {
        Fundamental::U16
    } else {
        Fundamental::U32
    }
}

/// Builds an enum from its declaration. `underlying` is the already
/// resolved explicit underlying type, if the declaration named one.
pub fn build_enum(
    decl: &ast::EnumDecl<'_>,
    underlying: Option<(Fundamental, Span)>,
    pointer_size: u32,
    reporter: &mut Reporter,
) -> Enum {
    let underlying = match underlying {
        None => default_underlying(decl.members.len()),
        Some((ty, span)) => {
            if ty.is_integer() {
                ty
            } else {
                reporter.report(Error::TypesMismatch {
                    expected: "any integer type".into(),
                    got: ty.name().into(),
                    span,
                });
                default_underlying(decl.members.len())
            }
        }
    };

    let mut members = IndexMap::with_capacity(decl.members.len());
    for (index, (name, span)) in decl.members.iter().enumerate() {
        if members.insert((*name).to_owned(), index as u64).is_some() {
            reporter.report(Error::Redefinition((*name).to_owned(), *span));
        }
    }

    if !members.is_empty() {
        let max_member = (members.len() - 1) as u128;
        let type_max = max_ordinal(underlying, pointer_size);
        if max_member > type_max {
            reporter.report(Error::UnderlyingTypeForEnumIsTooSmall {
                max_value: max_member as u64,
                type_max: type_max.min(u128::from(u64::MAX)) as u64,
                span: decl.span,
            });
        }
    }

    Enum {
        name: decl.name.to_owned(),
        path: vec![decl.name.to_owned()],
        underlying,
        members,
        span: decl.span,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decl<'a>(members: &'a [(&'a str, Span)]) -> ast::EnumDecl<'a> {
        ast::EnumDecl {
            name: "E",
            underlying: None,
            members: members.iter().map(|(n, s)| (*n, *s)).collect(),
            span: Span::ZERO,
        }
    }

    #[test]
    fn members_get_sequential_ordinals() {
        let members = [("A", Span::ZERO), ("B", Span::ZERO), ("C", Span::ZERO)];
        let mut reporter = Reporter::default();
        let e = build_enum(&decl(&members), None, 8, &mut reporter);
        assert!(reporter.is_empty());
        assert_eq!(e.underlying, Fundamental::U8);
        assert_eq!(e.member("B"), Some(1));
        assert_eq!(e.member("D"), None);
    }

    #[test]
    fn duplicate_member_is_reported() {
        let members = [("A", Span::ZERO), ("A", Span::ZERO)];
        let mut reporter = Reporter::default();
        build_enum(&decl(&members), None, 8, &mut reporter);
        assert!(matches!(
            reporter.reported()[0].error,
            Error::Redefinition(ref name, _) if name == "A"
        ));
    }

    #[test]
    fn too_small_underlying_type() {
        let names: Vec<String> = (0..300).map(|i| format!("M{i}")).collect();
        let members: Vec<(&str, Span)> = names.iter().map(|n| (n.as_str(), Span::ZERO)).collect();
        let decl = ast::EnumDecl {
            name: "E",
            underlying: Some("u8"),
            members: members.into(),
            span: Span::ZERO,
        };
        let mut reporter = Reporter::default();
        let e = build_enum(&decl, Some((Fundamental::U8, Span::ZERO)), 8, &mut reporter);
        assert!(matches!(
            reporter.reported()[0].error,
            Error::UnderlyingTypeForEnumIsTooSmall { max_value: 299, .. }
        ));
        // Without an explicit type the default simply grows.
        assert_eq!(e.underlying, Fundamental::U8);
        let mut reporter = Reporter::default();
        let decl2 = ast::EnumDecl { underlying: None, ..decl };
        let e2 = build_enum(&decl2, None, 8, &mut reporter);
        assert!(reporter.is_empty());
        assert_eq!(e2.underlying, Fundamental::U16);
    }

    #[test]
    fn signed_underlying_loses_one_bit() {
        assert_eq!(max_ordinal(Fundamental::I8, 8), 127);
        assert_eq!(max_ordinal(Fundamental::U8, 8), 255);
    }
}
