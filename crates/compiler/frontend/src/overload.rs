//! Overload resolution. Candidates are compared pairwise per argument;
//! a candidate wins only if it is at least as good everywhere and
//! strictly better somewhere. The result never depends on candidate
//! order.

use sable_ast::Span;

use crate::diagnostic::Error;
use crate::types::{Type, ValueType};

/// Inheritance queries needed to rank reference conversions; answered
/// by the build session.
pub trait TypeRelations {
    /// Number of derivation steps from `from` up to `to`; 0 for the
    /// same type, `None` when no upcast exists.
    fn inheritance_distance(&self, from: &Type, to: &Type) -> Option<u32>;
}

/// Relation of two candidates' implicit conversions for the same call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionsCompareResult {
    Same,
    LeftIsBetter,
    RightIsBetter,
    Incomparable,
}

impl ConversionsCompareResult {
    fn combine(self, other: Self) -> Self {
        use ConversionsCompareResult::*;
        match (self, other) {
            (Same, other) => other,
            (this, Same) => this,
            (LeftIsBetter, LeftIsBetter) => LeftIsBetter,
            (RightIsBetter, RightIsBetter) => RightIsBetter,
            _ => Incomparable,
        }
    }
}

/// What the call site passes at one argument position.
#[derive(Debug, Clone)]
pub struct ArgInfo {
    pub ty: Type,
    /// The argument is a mutable lvalue, so it may bind to a mutable
    /// reference parameter.
    pub is_mutable_reference: bool,
}

/// One viable-checkable candidate. `index` is the caller's handle to
/// whatever entity the candidate stands for.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub index: usize,
    pub params: Vec<CandidateParam>,
    /// Produced by function template deduction; loses ties against
    /// non-template candidates.
    pub is_template: bool,
}

#[derive(Debug, Clone)]
pub struct CandidateParam {
    pub ty: Type,
    pub value_type: ValueType,
}

fn conversion_distance(
    relations: &dyn TypeRelations,
    arg: &ArgInfo,
    param: &CandidateParam,
) -> Option<u32> {
    // Error recovery types match anything without preference.
    if arg.ty.is_invalid() || param.ty.is_invalid() {
        return Some(0);
    }
    if param.value_type.is_mutable_reference() && !arg.is_mutable_reference {
        return None;
    }
    relations.inheritance_distance(&arg.ty, &param.ty)
}

fn candidate_is_viable(
    relations: &dyn TypeRelations,
    candidate: &Candidate,
    args: &[ArgInfo],
) -> bool {
    candidate.params.len() == args.len()
        && candidate
            .params
            .iter()
            .zip(args)
            .all(|(param, arg)| conversion_distance(relations, arg, param).is_some())
}

fn compare_value_types(arg: &ArgInfo, left: ValueType, right: ValueType) -> ConversionsCompareResult {
    use ConversionsCompareResult::*;
    if !arg.is_mutable_reference {
        return Same;
    }
    // A mutable argument prefers the parameter that keeps it mutable.
    match (left.is_mutable_reference(), right.is_mutable_reference()) {
        (true, false) => LeftIsBetter,
        (false, true) => RightIsBetter,
        _ => Same,
    }
}

fn compare_candidates(
    relations: &dyn TypeRelations,
    left: &Candidate,
    right: &Candidate,
    args: &[ArgInfo],
) -> ConversionsCompareResult {
    use ConversionsCompareResult::*;
    let mut result = Same;
    for ((left_param, right_param), arg) in left.params.iter().zip(&right.params).zip(args) {
        let left_dist = conversion_distance(relations, arg, left_param);
        let right_dist = conversion_distance(relations, arg, right_param);
        let arg_result = match (left_dist, right_dist) {
            (Some(l), Some(r)) if l < r => LeftIsBetter,
            (Some(l), Some(r)) if l > r => RightIsBetter,
            (Some(_), Some(_)) => {
                compare_value_types(arg, left_param.value_type, right_param.value_type)
            }
            // Both are viable overall or they would not be compared;
            // per-argument failure still ranks.
            (Some(_), None) => LeftIsBetter,
            (None, Some(_)) => RightIsBetter,
            (None, None) => Same,
        };
        result = result.combine(arg_result);
        if result == Incomparable {
            return Incomparable;
        }
    }
    if result == Same {
        // Exact ties break in favor of the non-template candidate.
        result = match (left.is_template, right.is_template) {
            (false, true) => LeftIsBetter,
            (true, false) => RightIsBetter,
            _ => Same,
        };
    }
    result
}

/// Selects the unique best viable candidate. The returned value is the
/// winning candidate's `index`.
pub fn select_overload(
    candidates: &[Candidate],
    args: &[ArgInfo],
    relations: &dyn TypeRelations,
    args_desc: impl FnOnce() -> String,
    span: Span,
) -> Result<usize, Error> {
    let viable: Vec<&Candidate> = candidates
        .iter()
        .filter(|candidate| candidate_is_viable(relations, candidate, args))
        .collect();
    if viable.is_empty() {
        return Err(Error::CouldNotSelectOverloadedFunction(args_desc(), span));
    }

    // A winner must beat or tie every other viable candidate.
    let mut best: Option<&Candidate> = None;
    for &candidate in &viable {
        let beats_all = viable.iter().all(|&other| {
            std::ptr::eq(candidate, other)
                || matches!(
                    compare_candidates(relations, candidate, other, args),
                    ConversionsCompareResult::LeftIsBetter
                )
        });
        if beats_all {
            best = Some(candidate);
            break;
        }
    }
    match best {
        Some(candidate) => Ok(candidate.index),
        None => Err(Error::TooManySuitableOverloadedFunctions(args_desc(), span)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClassId, Fundamental};

    /// Class 1 derives from class 0.
    struct Hierarchy;

    impl TypeRelations for Hierarchy {
        fn inheritance_distance(&self, from: &Type, to: &Type) -> Option<u32> {
            if from == to {
                return Some(0);
            }
            match (from, to) {
                (Type::Class(d), Type::Class(b)) if d.index() == 1 && b.index() == 0 => Some(1),
                _ => None,
            }
        }
    }

    fn i32_ty() -> Type {
        Type::Fundamental(Fundamental::I32)
    }

    fn candidate(index: usize, params: Vec<(Type, ValueType)>) -> Candidate {
        Candidate {
            index,
            params: params
                .into_iter()
                .map(|(ty, value_type)| CandidateParam { ty, value_type })
                .collect(),
            is_template: false,
        }
    }

    fn arg(ty: Type) -> ArgInfo {
        ArgInfo {
            ty,
            is_mutable_reference: false,
        }
    }

    #[test]
    fn exact_type_beats_upcast() {
        let derived = Type::Class(ClassId(1));
        let base = Type::Class(ClassId(0));
        let candidates = vec![
            candidate(0, vec![(base, ValueType::ReferenceImut)]),
            candidate(1, vec![(derived.clone(), ValueType::ReferenceImut)]),
        ];
        let selected = select_overload(
            &candidates,
            &[arg(derived)],
            &Hierarchy,
            String::new,
            Span::ZERO,
        )
        .unwrap();
        assert_eq!(selected, 1);
    }

    #[test]
    fn mutable_argument_prefers_mutable_parameter() {
        let candidates = vec![
            candidate(7, vec![(i32_ty(), ValueType::ReferenceImut)]),
            candidate(8, vec![(i32_ty(), ValueType::ReferenceMut)]),
        ];
        let mut_arg = ArgInfo {
            ty: i32_ty(),
            is_mutable_reference: true,
        };
        let selected =
            select_overload(&candidates, &[mut_arg], &Hierarchy, String::new, Span::ZERO).unwrap();
        assert_eq!(selected, 8);

        // An immutable argument cannot bind the mutable overload at all.
        let selected = select_overload(
            &candidates,
            &[arg(i32_ty())],
            &Hierarchy,
            String::new,
            Span::ZERO,
        )
        .unwrap();
        assert_eq!(selected, 7);
    }

    #[test]
    fn result_does_not_depend_on_candidate_order() {
        let derived = Type::Class(ClassId(1));
        let base = Type::Class(ClassId(0));
        let mut candidates = vec![
            candidate(0, vec![(base, ValueType::ReferenceImut)]),
            candidate(1, vec![(derived.clone(), ValueType::ReferenceImut)]),
        ];
        let first = select_overload(
            &candidates,
            &[arg(derived.clone())],
            &Hierarchy,
            String::new,
            Span::ZERO,
        )
        .unwrap();
        candidates.reverse();
        let second = select_overload(
            &candidates,
            &[arg(derived)],
            &Hierarchy,
            String::new,
            Span::ZERO,
        )
        .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn ambiguous_and_empty_selections_fail() {
        let candidates = vec![
            candidate(0, vec![(i32_ty(), ValueType::Value), (Type::BOOL, ValueType::Value)]),
            candidate(1, vec![(Type::BOOL, ValueType::Value), (i32_ty(), ValueType::Value)]),
        ];
        // No candidate accepts (i32, i32).
        let err = select_overload(
            &candidates,
            &[arg(i32_ty()), arg(i32_ty())],
            &Hierarchy,
            String::new,
            Span::ZERO,
        )
        .unwrap_err();
        assert!(matches!(err, Error::CouldNotSelectOverloadedFunction(..)));

        // Each is better at one position: ambiguous.
        let invalid = Type::INVALID;
        let err = select_overload(
            &candidates,
            &[arg(invalid.clone()), arg(invalid)],
            &Hierarchy,
            String::new,
            Span::ZERO,
        )
        .unwrap_err();
        assert!(matches!(err, Error::TooManySuitableOverloadedFunctions(..)));
    }

    #[test]
    fn non_template_wins_exact_tie() {
        let mut template_candidate = candidate(3, vec![(i32_ty(), ValueType::Value)]);
        template_candidate.is_template = true;
        let candidates = vec![template_candidate, candidate(4, vec![(i32_ty(), ValueType::Value)])];
        let selected = select_overload(
            &candidates,
            &[arg(i32_ty())],
            &Hierarchy,
            String::new,
            Span::ZERO,
        )
        .unwrap();
        assert_eq!(selected, 4);
    }

    #[test]
    fn no_implicit_numeric_conversions() {
        let candidates = vec![candidate(0, vec![(i32_ty(), ValueType::Value)])];
        let err = select_overload(
            &candidates,
            &[arg(Type::BOOL)],
            &Hierarchy,
            String::new,
            Span::ZERO,
        )
        .unwrap_err();
        assert!(matches!(err, Error::CouldNotSelectOverloadedFunction(..)));
    }
}
