//! Compile-time evaluation. Interprets expressions and `constexpr`
//! function bodies over [`ConstValue`]s; used for array sizes,
//! `static_assert`, global initializers, enum checks and template
//! variable arguments.
//!
//! Undefined integer operations (division by zero, signed overflow of
//! division) are hard errors. Float division by zero is well-defined
//! under IEEE-754 and produces an infinity or NaN.

use hashbrown::HashMap;
use sable_ast as ast;
use sable_ast::{BinOp, Span, Spanned, UnOp};

use crate::diagnostic::Error;
use crate::types::{Fundamental, Type};
use crate::values::ConstValue;

const MAX_CALL_DEPTH: u32 = 512;
const MAX_LOOP_ITERATIONS: u64 = 1 << 22;

/// A typed compile-time value.
#[derive(Debug, Clone, PartialEq)]
pub struct CtValue {
    pub ty: Type,
    pub value: ConstValue,
}

impl CtValue {
    pub fn bool(value: bool) -> Self {
        Self {
            ty: Type::BOOL,
            value: ConstValue::Bool(value),
        }
    }
}

/// What a name resolves to during compile-time evaluation; answered by
/// the build session (or a test fixture).
pub enum ConstEntity<'src> {
    Value(CtValue),
    Function(&'src ast::FnDecl<'src>),
}

pub trait ConstEnv<'src> {
    fn lookup(&mut self, path: &ast::Path<'src>, span: Span) -> Result<ConstEntity<'src>, Error>;

    /// Resolves a parameter's declared type, for binding arguments.
    fn resolve_type(&mut self, name: &ast::TypeName<'src>) -> Result<Type, Error>;
}

enum Flow {
    Next,
    Break,
    Continue,
    Return(CtValue),
}

struct Local {
    value: CtValue,
    is_mutable: bool,
}

type Frame = indexmap::IndexMap<String, Local>;

pub struct Interpreter<'env, 'src> {
    env: &'env mut dyn ConstEnv<'src>,
    depth: u32,
}

impl<'env, 'src> Interpreter<'env, 'src> {
    pub fn new(env: &'env mut dyn ConstEnv<'src>) -> Self {
        Self { env, depth: 0 }
    }

    pub fn eval(&mut self, expr: &Spanned<ast::Expr<'src>>) -> Result<CtValue, Error> {
        let mut frames = Vec::new();
        self.eval_expr(&mut frames, expr)
    }

    /// Evaluates an expression that must come out as `bool`, the
    /// `static_assert` entry point.
    pub fn eval_bool(&mut self, expr: &Spanned<ast::Expr<'src>>) -> Result<bool, Error> {
        let result = self.eval(expr)?;
        match result.value {
            ConstValue::Bool(value) => Ok(value),
            _ => Err(Error::StaticAssertExpressionMustHaveBoolType(expr.1)),
        }
    }

    fn eval_expr(
        &mut self,
        frames: &mut Vec<Frame>,
        (expr, span): &Spanned<ast::Expr<'src>>,
    ) -> Result<CtValue, Error> {
        let span = *span;
        match expr {
            ast::Expr::Bool(value) => Ok(CtValue::bool(*value)),
            ast::Expr::Number(literal) => eval_number(literal, span),
            ast::Expr::Char(c, suffix) => {
                let ty = match *suffix {
                    "" | "char8" => Fundamental::Char8,
                    "char16" => Fundamental::Char16,
                    "char32" => Fundamental::Char32,
                    other => return Err(Error::UnknownNumericConstantType(other.into(), span)),
                };
                Ok(CtValue {
                    ty: Type::Fundamental(ty),
                    value: ConstValue::Char(*c as u32),
                })
            }
            ast::Expr::Path(path) => {
                if let Some(name) = path.as_single_ident() {
                    for frame in frames.iter().rev() {
                        if let Some(local) = frame.get(name) {
                            return Ok(local.value.clone());
                        }
                    }
                }
                match self.env.lookup(path, span)? {
                    ConstEntity::Value(value) => Ok(value),
                    ConstEntity::Function(_) => Err(Error::ExpectedConstantExpression(span)),
                }
            }
            ast::Expr::BinOp { lhs, op, rhs } => {
                if matches!(op, BinOp::LazyAnd | BinOp::LazyOr) {
                    return self.eval_lazy(frames, lhs, *op, rhs, span);
                }
                let lhs = self.eval_expr(frames, lhs)?;
                let rhs = self.eval_expr(frames, rhs)?;
                eval_binary(&lhs, *op, &rhs, span)
            }
            ast::Expr::UnOp { op, expr } => {
                let value = self.eval_expr(frames, expr)?;
                eval_unary(*op, &value, span)
            }
            ast::Expr::Call { callee, args } => {
                let (ast::Expr::Path(path), _) = &**callee else {
                    return Err(Error::ExpectedConstantExpression(span));
                };
                let entity = self.env.lookup(path, span)?;
                let decl = match entity {
                    ConstEntity::Function(decl) => decl,
                    ConstEntity::Value(_) => {
                        return Err(Error::ExpectedConstantExpression(span));
                    }
                };
                let mut arg_values = Vec::with_capacity(args.len());
                for arg in args.iter() {
                    arg_values.push(self.eval_expr(frames, arg)?);
                }
                self.call_function(decl, arg_values, span)
            }
            ast::Expr::Index { base, index } => {
                let base = self.eval_expr(frames, base)?;
                let index_value = self.eval_expr(frames, index)?;
                let Some(index_value) = index_value.value.as_uint() else {
                    return Err(Error::ExpectedConstantExpression(index.1));
                };
                match (&base.ty, &base.value) {
                    (Type::Array(array), ConstValue::Aggregate(elems)) => {
                        if index_value >= array.size {
                            return Err(Error::ArrayIndexOutOfBounds {
                                index: index_value,
                                size: array.size,
                                span,
                            });
                        }
                        Ok(CtValue {
                            ty: array.elem.clone(),
                            value: elems[index_value as usize].clone(),
                        })
                    }
                    _ => Err(Error::ExpectedConstantExpression(span)),
                }
            }
            ast::Expr::Unsafe(_) | ast::Expr::Move(_) | ast::Expr::Member { .. } => {
                Err(Error::ConstexprFunctionContainsUnallowedOperations(span))
            }
        }
    }

    fn eval_lazy(
        &mut self,
        frames: &mut Vec<Frame>,
        lhs: &Spanned<ast::Expr<'src>>,
        op: BinOp,
        rhs: &Spanned<ast::Expr<'src>>,
        span: Span,
    ) -> Result<CtValue, Error> {
        let lhs_value = self.eval_expr(frames, lhs)?;
        let ConstValue::Bool(lhs_bool) = lhs_value.value else {
            return Err(Error::TypesMismatch {
                expected: "bool".into(),
                got: "non-bool constant".into(),
                span,
            });
        };
        let short_circuit = match op {
            BinOp::LazyAnd => !lhs_bool,
            _ => lhs_bool,
        };
        if short_circuit {
            return Ok(CtValue::bool(lhs_bool));
        }
        let rhs_value = self.eval_expr(frames, rhs)?;
        match rhs_value.value {
            ConstValue::Bool(_) => Ok(rhs_value),
            _ => Err(Error::TypesMismatch {
                expected: "bool".into(),
                got: "non-bool constant".into(),
                span,
            }),
        }
    }

    fn call_function(
        &mut self,
        decl: &'src ast::FnDecl<'src>,
        args: Vec<CtValue>,
        span: Span,
    ) -> Result<CtValue, Error> {
        if !decl.is_constexpr {
            return Err(Error::ConstexprFunctionContainsUnallowedOperations(span));
        }
        let Some(block) = decl.block_body() else {
            return Err(Error::ConstexprFunctionsMustHaveBody(span));
        };
        if args.len() != decl.params.len() {
            return Err(Error::InvalidFunctionArgumentCount {
                expected: decl.params.len(),
                got: args.len(),
                span,
            });
        }
        if self.depth >= MAX_CALL_DEPTH {
            return Err(Error::ConstexprFunctionEvaluationError(
                "call depth limit reached".into(),
                span,
            ));
        }

        let mut frame = Frame::new();
        for (param, arg) in decl.params.iter().zip(args) {
            let declared = self.env.resolve_type(&param.ty)?;
            if !declared.matches(&arg.ty) {
                return Err(Error::TypesMismatch {
                    expected: format!("{:?}", declared),
                    got: format!("{:?}", arg.ty),
                    span,
                });
            }
            frame.insert(
                param.name.to_owned(),
                Local {
                    value: arg,
                    is_mutable: false,
                },
            );
        }

        self.depth += 1;
        let mut frames = vec![frame];
        let result = self.exec_block(&mut frames, block);
        self.depth -= 1;

        match result? {
            Flow::Return(value) => Ok(value),
            _ => Err(Error::ConstexprFunctionEvaluationError(
                "function did not return a value".into(),
                span,
            )),
        }
    }

    fn exec_block(
        &mut self,
        frames: &mut Vec<Frame>,
        block: &ast::Block<'src>,
    ) -> Result<Flow, Error> {
        frames.push(Frame::new());
        let result = self.exec_stmts(frames, &block.stmts);
        frames.pop();
        result
    }

    fn exec_stmts(
        &mut self,
        frames: &mut Vec<Frame>,
        stmts: &[ast::Stmt<'src>],
    ) -> Result<Flow, Error> {
        for stmt in stmts {
            match self.exec_stmt(frames, stmt)? {
                Flow::Next => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Next)
    }

    fn exec_stmt(&mut self, frames: &mut Vec<Frame>, stmt: &ast::Stmt<'src>) -> Result<Flow, Error> {
        match stmt {
            ast::Stmt::Expr(expr) => {
                self.eval_expr(frames, expr)?;
                Ok(Flow::Next)
            }
            ast::Stmt::Auto {
                name,
                mutability,
                is_reference,
                init,
                span,
            } => {
                if *is_reference {
                    return Err(Error::ConstexprFunctionContainsUnallowedOperations(*span));
                }
                let value = self.eval_expr(frames, init)?;
                self.declare(frames, name, value, *mutability)?;
                Ok(Flow::Next)
            }
            ast::Stmt::Variables(decl) => {
                let declared = self.env.resolve_type(&decl.ty)?;
                for var in decl.vars.iter() {
                    if var.is_reference {
                        return Err(Error::ConstexprFunctionContainsUnallowedOperations(var.span));
                    }
                    let value = match &var.initializer {
                        Some(ast::Initializer::Expression(expr)) => {
                            let value = self.eval_expr(frames, expr)?;
                            if !declared.matches(&value.ty) {
                                return Err(Error::TypesMismatch {
                                    expected: format!("{:?}", declared),
                                    got: format!("{:?}", value.ty),
                                    span: var.span,
                                });
                            }
                            value
                        }
                        Some(ast::Initializer::Zero(span)) => match crate::classes::zero_value(&declared) {
                            Some(value) => CtValue {
                                ty: declared.clone(),
                                value,
                            },
                            None => return Err(Error::ZeroInitializerForClass(*span)),
                        },
                        Some(other) => {
                            return Err(Error::ConstexprFunctionContainsUnallowedOperations(
                                other.span(),
                            ));
                        }
                        None => {
                            return Err(Error::ExpectedInitializer(var.name.to_owned(), var.span));
                        }
                    };
                    self.declare(frames, var.name, value, var.mutability)?;
                }
                Ok(Flow::Next)
            }
            ast::Stmt::Assign {
                target,
                op,
                value,
                span,
            } => {
                let (ast::Expr::Path(path), _) = target else {
                    return Err(Error::ConstexprFunctionContainsUnallowedOperations(*span));
                };
                let Some(name) = path.as_single_ident() else {
                    return Err(Error::ConstexprFunctionContainsUnallowedOperations(*span));
                };
                let mut new_value = self.eval_expr(frames, value)?;
                if let Some(op) = op {
                    let current = self.read_local(frames, name, *span)?;
                    new_value = eval_binary(&current, *op, &new_value, *span)?;
                }
                self.write_local(frames, name, new_value, *span)?;
                Ok(Flow::Next)
            }
            ast::Stmt::Return(expr, _) => {
                let value = match expr {
                    Some(expr) => self.eval_expr(frames, expr)?,
                    None => CtValue {
                        ty: Type::VOID,
                        value: ConstValue::Bool(false),
                    },
                };
                Ok(Flow::Return(value))
            }
            ast::Stmt::If(stmt) => {
                for branch in stmt.branches.iter() {
                    let cond = self.eval_expr(frames, &branch.cond)?;
                    let ConstValue::Bool(cond) = cond.value else {
                        return Err(Error::TypesMismatch {
                            expected: "bool".into(),
                            got: "non-bool constant".into(),
                            span: branch.cond.1,
                        });
                    };
                    if cond {
                        return self.exec_block(frames, &branch.block);
                    }
                }
                match &stmt.else_block {
                    Some(block) => self.exec_block(frames, block),
                    None => Ok(Flow::Next),
                }
            }
            ast::Stmt::While { cond, body, span } => {
                let mut iterations = 0u64;
                loop {
                    let cond_value = self.eval_expr(frames, cond)?;
                    let ConstValue::Bool(keep_going) = cond_value.value else {
                        return Err(Error::TypesMismatch {
                            expected: "bool".into(),
                            got: "non-bool constant".into(),
                            span: cond.1,
                        });
                    };
                    if !keep_going {
                        return Ok(Flow::Next);
                    }
                    iterations += 1;
                    if iterations > MAX_LOOP_ITERATIONS {
                        return Err(Error::ConstexprFunctionEvaluationError(
                            "loop iteration limit reached".into(),
                            *span,
                        ));
                    }
                    match self.exec_block(frames, body)? {
                        Flow::Next | Flow::Continue => {}
                        Flow::Break => return Ok(Flow::Next),
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
            }
            ast::Stmt::Break(_) => Ok(Flow::Break),
            ast::Stmt::Continue(_) => Ok(Flow::Continue),
            ast::Stmt::Block(block) => self.exec_block(frames, block),
            ast::Stmt::StaticAssert(assert) => {
                if self.eval_bool(&assert.expr)? {
                    Ok(Flow::Next)
                } else {
                    Err(Error::StaticAssertionFailed(assert.span))
                }
            }
            ast::Stmt::Halt(span) | ast::Stmt::Yield(_, span) => {
                Err(Error::ConstexprFunctionContainsUnallowedOperations(*span))
            }
        }
    }

    fn declare(
        &mut self,
        frames: &mut Vec<Frame>,
        name: &str,
        value: CtValue,
        mutability: ast::Mutability,
    ) -> Result<(), Error> {
        let frame = frames.last_mut().unwrap_or_else(|| unreachable!());
        frame.insert(
            name.to_owned(),
            Local {
                value,
                is_mutable: matches!(mutability, ast::Mutability::Mut),
            },
        );
        Ok(())
    }

    fn read_local(&self, frames: &[Frame], name: &str, span: Span) -> Result<CtValue, Error> {
        for frame in frames.iter().rev() {
            if let Some(local) = frame.get(name) {
                return Ok(local.value.clone());
            }
        }
        Err(Error::NameNotFound(name.to_owned(), span))
    }

    fn write_local(
        &mut self,
        frames: &mut [Frame],
        name: &str,
        value: CtValue,
        span: Span,
    ) -> Result<(), Error> {
        for frame in frames.iter_mut().rev() {
            if let Some(local) = frame.get_mut(name) {
                if !local.is_mutable {
                    return Err(Error::ExpectedVariable(name.to_owned(), span));
                }
                if !local.value.ty.matches(&value.ty) {
                    return Err(Error::TypesMismatch {
                        expected: format!("{:?}", local.value.ty),
                        got: format!("{:?}", value.ty),
                        span,
                    });
                }
                local.value = value;
                return Ok(());
            }
        }
        Err(Error::NameNotFound(name.to_owned(), span))
    }
}

pub(crate) fn eval_number(literal: &ast::NumberLiteral<'_>, span: Span) -> Result<CtValue, Error> {
    let suffix = if literal.suffix.is_empty() {
        match literal.value {
            ast::NumberValue::Int(_) => "i32",
            ast::NumberValue::Float(_) => "f64",
        }
    } else {
        literal.suffix
    };
    let Some(fundamental) = Fundamental::from_name(suffix) else {
        return Err(Error::UnknownNumericConstantType(suffix.into(), span));
    };
    let value = match literal.value {
        ast::NumberValue::Int(raw) => {
            if fundamental.is_signed_integer() {
                ConstValue::SInt(truncate_signed(raw as i128, int_bits(fundamental)))
            } else if fundamental.is_unsigned_integer() {
                ConstValue::UInt(truncate_unsigned(u128::from(raw), int_bits(fundamental)))
            } else if fundamental.is_float() {
                ConstValue::Float(raw as f64)
            } else if fundamental.is_char() {
                ConstValue::Char(raw as u32)
            } else {
                return Err(Error::UnknownNumericConstantType(suffix.into(), span));
            }
        }
        ast::NumberValue::Float(raw) => {
            if fundamental.is_float() {
                ConstValue::Float(raw)
            } else {
                return Err(Error::UnknownNumericConstantType(suffix.into(), span));
            }
        }
    };
    Ok(CtValue {
        ty: Type::Fundamental(fundamental),
        value,
    })
}

fn int_bits(fundamental: Fundamental) -> u32 {
    fundamental.size_in_bytes(8) * 8
}

fn truncate_signed(value: i128, bits: u32) -> i128 {
    if bits >= 128 {
        return value;
    }
    let shift = 128 - bits;
    (value << shift) >> shift
}

fn truncate_unsigned(value: u128, bits: u32) -> u128 {
    if bits >= 128 {
        return value;
    }
    value & ((1u128 << bits) - 1)
}

fn eval_binary(lhs: &CtValue, op: BinOp, rhs: &CtValue, span: Span) -> Result<CtValue, Error> {
    if lhs.ty != rhs.ty {
        return Err(Error::NoMatchBinaryOperatorForGivenTypes {
            lhs: format!("{:?}", lhs.ty),
            rhs: format!("{:?}", rhs.ty),
            op: op.as_str(),
            span,
        });
    }
    let fundamental = lhs.ty.as_fundamental();
    match (&lhs.value, &rhs.value) {
        (ConstValue::SInt(l), ConstValue::SInt(r)) => {
            let bits = int_bits(fundamental.unwrap_or(Fundamental::I32));
            eval_signed(*l, op, *r, bits, &lhs.ty, span)
        }
        (ConstValue::UInt(l), ConstValue::UInt(r)) => {
            let bits = int_bits(fundamental.unwrap_or(Fundamental::U32));
            eval_unsigned(*l, op, *r, bits, &lhs.ty, span)
        }
        (ConstValue::Float(l), ConstValue::Float(r)) => eval_float(*l, op, *r, &lhs.ty, span),
        (ConstValue::Bool(l), ConstValue::Bool(r)) => match op {
            BinOp::Eq => Ok(CtValue::bool(l == r)),
            BinOp::Ne => Ok(CtValue::bool(l != r)),
            BinOp::BitAnd => Ok(CtValue::bool(*l & *r)),
            BinOp::BitOr => Ok(CtValue::bool(*l | *r)),
            BinOp::BitXor => Ok(CtValue::bool(*l ^ *r)),
            _ => Err(Error::OperationNotSupportedForThisType("bool".into(), span)),
        },
        (ConstValue::Char(l), ConstValue::Char(r)) => compare_only(u64::from(*l), op, u64::from(*r), span),
        (ConstValue::EnumMember(l), ConstValue::EnumMember(r)) => compare_only(*l, op, *r, span),
        _ => Err(Error::ExpectedConstantExpression(span)),
    }
}

fn compare_only(l: u64, op: BinOp, r: u64, span: Span) -> Result<CtValue, Error> {
    match op {
        BinOp::Eq => Ok(CtValue::bool(l == r)),
        BinOp::Ne => Ok(CtValue::bool(l != r)),
        BinOp::Lt => Ok(CtValue::bool(l < r)),
        BinOp::Le => Ok(CtValue::bool(l <= r)),
        BinOp::Gt => Ok(CtValue::bool(l > r)),
        BinOp::Ge => Ok(CtValue::bool(l >= r)),
        _ => Err(Error::OperationNotSupportedForThisType(
            "this type".into(),
            span,
        )),
    }
}

fn eval_signed(
    l: i128,
    op: BinOp,
    r: i128,
    bits: u32,
    ty: &Type,
    span: Span,
) -> Result<CtValue, Error> {
    let min = truncate_signed(i128::MIN >> (128 - bits), bits);
    let wrap = |value: i128| CtValue {
        ty: ty.clone(),
        value: ConstValue::SInt(truncate_signed(value, bits)),
    };
    Ok(match op {
        BinOp::Add => wrap(l.wrapping_add(r)),
        BinOp::Sub => wrap(l.wrapping_sub(r)),
        BinOp::Mul => wrap(l.wrapping_mul(r)),
        BinOp::Div => {
            if r == 0 || (l == min && r == -1) {
                return Err(Error::ConstantExpressionResultIsUndefined(span));
            }
            wrap(l / r)
        }
        BinOp::Rem => {
            if r == 0 || (l == min && r == -1) {
                return Err(Error::ConstantExpressionResultIsUndefined(span));
            }
            wrap(l % r)
        }
        BinOp::BitAnd => wrap(l & r),
        BinOp::BitOr => wrap(l | r),
        BinOp::BitXor => wrap(l ^ r),
        BinOp::Shl => {
            if r < 0 || r as u32 >= bits {
                return Err(Error::ConstantExpressionResultIsUndefined(span));
            }
            wrap(l.wrapping_shl(r as u32))
        }
        BinOp::Shr => {
            if r < 0 || r as u32 >= bits {
                return Err(Error::ConstantExpressionResultIsUndefined(span));
            }
            wrap(l >> r)
        }
        BinOp::Eq => CtValue::bool(l == r),
        BinOp::Ne => CtValue::bool(l != r),
        BinOp::Lt => CtValue::bool(l < r),
        BinOp::Le => CtValue::bool(l <= r),
        BinOp::Gt => CtValue::bool(l > r),
        BinOp::Ge => CtValue::bool(l >= r),
        BinOp::LazyAnd | BinOp::LazyOr => {
            return Err(Error::OperationNotSupportedForThisType(
                "integer".into(),
                span,
            ));
        }
    })
}

fn eval_unsigned(
    l: u128,
    op: BinOp,
    r: u128,
    bits: u32,
    ty: &Type,
    span: Span,
) -> Result<CtValue, Error> {
    let wrap = |value: u128| CtValue {
        ty: ty.clone(),
        value: ConstValue::UInt(truncate_unsigned(value, bits)),
    };
    Ok(match op {
        BinOp::Add => wrap(l.wrapping_add(r)),
        BinOp::Sub => wrap(l.wrapping_sub(r)),
        BinOp::Mul => wrap(l.wrapping_mul(r)),
        BinOp::Div => {
            if r == 0 {
                return Err(Error::ConstantExpressionResultIsUndefined(span));
            }
            wrap(l / r)
        }
        BinOp::Rem => {
            if r == 0 {
                return Err(Error::ConstantExpressionResultIsUndefined(span));
            }
            wrap(l % r)
        }
        BinOp::BitAnd => wrap(l & r),
        BinOp::BitOr => wrap(l | r),
        BinOp::BitXor => wrap(l ^ r),
        BinOp::Shl => {
            if r >= u128::from(bits) {
                return Err(Error::ConstantExpressionResultIsUndefined(span));
            }
            wrap(l.wrapping_shl(r as u32))
        }
        BinOp::Shr => {
            if r >= u128::from(bits) {
                return Err(Error::ConstantExpressionResultIsUndefined(span));
            }
            wrap(l >> r)
        }
        BinOp::Eq => CtValue::bool(l == r),
        BinOp::Ne => CtValue::bool(l != r),
        BinOp::Lt => CtValue::bool(l < r),
        BinOp::Le => CtValue::bool(l <= r),
        BinOp::Gt => CtValue::bool(l > r),
        BinOp::Ge => CtValue::bool(l >= r),
        BinOp::LazyAnd | BinOp::LazyOr => {
            return Err(Error::OperationNotSupportedForThisType(
                "integer".into(),
                span,
            ));
        }
    })
}

fn eval_float(l: f64, op: BinOp, r: f64, ty: &Type, span: Span) -> Result<CtValue, Error> {
    let wrap = |value: f64| CtValue {
        ty: ty.clone(),
        value: ConstValue::Float(value),
    };
    Ok(match op {
        BinOp::Add => wrap(l + r),
        BinOp::Sub => wrap(l - r),
        BinOp::Mul => wrap(l * r),
        // IEEE-754 makes these well-defined even for a zero divisor.
        BinOp::Div => wrap(l / r),
        BinOp::Rem => wrap(l % r),
        BinOp::Eq => CtValue::bool(l == r),
        BinOp::Ne => CtValue::bool(l != r),
        BinOp::Lt => CtValue::bool(l < r),
        BinOp::Le => CtValue::bool(l <= r),
        BinOp::Gt => CtValue::bool(l > r),
        BinOp::Ge => CtValue::bool(l >= r),
        _ => {
            return Err(Error::OperationNotSupportedForThisType("float".into(), span));
        }
    })
}

fn eval_unary(op: UnOp, value: &CtValue, span: Span) -> Result<CtValue, Error> {
    match (op, &value.value) {
        (UnOp::Neg, ConstValue::SInt(v)) => {
            let bits = int_bits(value.ty.as_fundamental().unwrap_or(Fundamental::I32));
            Ok(CtValue {
                ty: value.ty.clone(),
                value: ConstValue::SInt(truncate_signed(v.wrapping_neg(), bits)),
            })
        }
        (UnOp::Neg, ConstValue::Float(v)) => Ok(CtValue {
            ty: value.ty.clone(),
            value: ConstValue::Float(-v),
        }),
        (UnOp::Not, ConstValue::Bool(v)) => Ok(CtValue::bool(!v)),
        (UnOp::BitNot, ConstValue::SInt(v)) => {
            let bits = int_bits(value.ty.as_fundamental().unwrap_or(Fundamental::I32));
            Ok(CtValue {
                ty: value.ty.clone(),
                value: ConstValue::SInt(truncate_signed(!v, bits)),
            })
        }
        (UnOp::BitNot, ConstValue::UInt(v)) => {
            let bits = int_bits(value.ty.as_fundamental().unwrap_or(Fundamental::U32));
            Ok(CtValue {
                ty: value.ty.clone(),
                value: ConstValue::UInt(truncate_unsigned(!v, bits)),
            })
        }
        _ => Err(Error::OperationNotSupportedForThisType(
            "this type".into(),
            span,
        )),
    }
}

/// A fixed environment over named constants and functions, enough for
/// evaluation detached from a full session.
#[derive(Default)]
pub struct SimpleEnv<'src> {
    pub values: HashMap<&'src str, CtValue>,
    pub functions: HashMap<&'src str, &'src ast::FnDecl<'src>>,
}

impl<'src> ConstEnv<'src> for SimpleEnv<'src> {
    fn lookup(&mut self, path: &ast::Path<'src>, span: Span) -> Result<ConstEntity<'src>, Error> {
        let Some(name) = path.as_single_ident() else {
            return Err(Error::NameNotFound("<qualified name>".into(), span));
        };
        if let Some(value) = self.values.get(name) {
            return Ok(ConstEntity::Value(value.clone()));
        }
        if let Some(decl) = self.functions.get(name) {
            return Ok(ConstEntity::Function(decl));
        }
        Err(Error::NameNotFound(name.to_owned(), span))
    }

    fn resolve_type(&mut self, name: &ast::TypeName<'src>) -> Result<Type, Error> {
        match name {
            ast::TypeName::Path((path, span)) => {
                let single = path
                    .as_single_ident()
                    .and_then(Fundamental::from_name)
                    .ok_or_else(|| Error::NameNotFound("<type>".into(), *span))?;
                Ok(Type::Fundamental(single))
            }
            other => Err(Error::NameNotFound("<type>".into(), other.span())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sable_ast::{Expr, Span};

    fn spanned(expr: Expr<'_>) -> Spanned<Expr<'_>> {
        (expr, Span::ZERO)
    }

    fn eval_with<'a>(env: &mut SimpleEnv<'a>, expr: Spanned<Expr<'a>>) -> Result<CtValue, Error> {
        Interpreter::new(env).eval(&expr)
    }

    #[test]
    fn integer_division_by_zero_is_undefined() {
        let mut env = SimpleEnv::default();
        let expr = spanned(Expr::binary(
            spanned(Expr::int(1, "i32")),
            BinOp::Div,
            spanned(Expr::int(0, "i32")),
        ));
        assert!(matches!(
            eval_with(&mut env, expr),
            Err(Error::ConstantExpressionResultIsUndefined(_))
        ));
    }

    #[test]
    fn signed_min_by_minus_one_is_undefined() {
        let mut env = SimpleEnv::default();
        let min = spanned(Expr::UnOp {
            op: UnOp::Neg,
            expr: Box::new(spanned(Expr::int(1 << 31, "i32"))),
        });
        // -(1<<31) wraps back to i32::MIN.
        let expr = spanned(Expr::binary(
            min,
            BinOp::Div,
            spanned(Expr::UnOp {
                op: UnOp::Neg,
                expr: Box::new(spanned(Expr::int(1, "i32"))),
            }),
        ));
        assert!(matches!(
            eval_with(&mut env, expr),
            Err(Error::ConstantExpressionResultIsUndefined(_))
        ));
    }

    #[test]
    fn float_division_by_zero_is_defined() {
        let mut env = SimpleEnv::default();
        let expr = spanned(Expr::binary(
            spanned(Expr::float(1.0, "f64")),
            BinOp::Div,
            spanned(Expr::float(0.0, "f64")),
        ));
        let result = eval_with(&mut env, expr).unwrap();
        assert_eq!(result.value, ConstValue::Float(f64::INFINITY));
    }

    #[test]
    fn wrapping_follows_type_width() {
        let mut env = SimpleEnv::default();
        let expr = spanned(Expr::binary(
            spanned(Expr::int(255, "u8")),
            BinOp::Add,
            spanned(Expr::int(1, "u8")),
        ));
        let result = eval_with(&mut env, expr).unwrap();
        assert_eq!(result.value, ConstValue::UInt(0));
    }

    #[test]
    fn mixed_types_are_rejected() {
        let mut env = SimpleEnv::default();
        let expr = spanned(Expr::binary(
            spanned(Expr::int(1, "i32")),
            BinOp::Add,
            spanned(Expr::int(1, "u32")),
        ));
        assert!(matches!(
            eval_with(&mut env, expr),
            Err(Error::NoMatchBinaryOperatorForGivenTypes { .. })
        ));
    }

    #[test]
    fn lazy_operators_short_circuit() {
        let mut env = SimpleEnv::default();
        // `false && (1/0 == 0)` never evaluates the division.
        let division = spanned(Expr::binary(
            spanned(Expr::binary(
                spanned(Expr::int(1, "i32")),
                BinOp::Div,
                spanned(Expr::int(0, "i32")),
            )),
            BinOp::Eq,
            spanned(Expr::int(0, "i32")),
        ));
        let expr = spanned(Expr::binary(
            spanned(Expr::Bool(false)),
            BinOp::LazyAnd,
            division,
        ));
        let result = eval_with(&mut env, expr).unwrap();
        assert_eq!(result.value, ConstValue::Bool(false));
    }
}
