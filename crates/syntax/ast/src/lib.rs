//! Syntax tree consumed by the semantic core.
//!
//! An external front-end lexes and parses source files into these nodes.
//! Everything here is plain data borrowed from the source text; all
//! checking happens in the compiler frontend crate.

use std::fmt;

pub use crate::span::{FileId, Span, Spanned};

mod span;

/// A dependency-ordered list of parsed files. Dependencies always come
/// before their dependents, so a plain forward iteration processes every
/// import before the file that needs it.
#[derive(Debug, Default)]
pub struct SourceGraph<'src> {
    nodes: Vec<SourceNode<'src>>,
}

impl<'src> SourceGraph<'src> {
    pub fn new(nodes: impl Into<Vec<SourceNode<'src>>>) -> Self {
        Self {
            nodes: nodes.into(),
        }
    }

    #[inline]
    pub fn nodes(&self) -> &[SourceNode<'src>] {
        &self.nodes
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&SourceNode<'src>> {
        self.nodes.get(index)
    }
}

#[derive(Debug)]
pub struct SourceNode<'src> {
    pub file: FileId,
    /// Indices of directly imported nodes, which are always lower than
    /// this node's own index.
    pub imports: Box<[usize]>,
    pub module: Module<'src>,
}

impl<'src> SourceNode<'src> {
    pub fn new(file: FileId, imports: impl Into<Box<[usize]>>, module: Module<'src>) -> Self {
        Self {
            file,
            imports: imports.into(),
            module,
        }
    }
}

/// The program elements of one parsed file.
#[derive(Debug, Default)]
pub struct Module<'src> {
    pub items: Box<[Item<'src>]>,
}

impl<'src> Module<'src> {
    pub fn new(items: impl Into<Box<[Item<'src>]>>) -> Self {
        Self {
            items: items.into(),
        }
    }
}

#[derive(Debug)]
pub enum Item<'src> {
    Namespace(NamespaceDecl<'src>),
    Class(ClassDecl<'src>),
    Enum(EnumDecl<'src>),
    Function(FnDecl<'src>),
    Variables(VarsDecl<'src>),
    TypeAlias(TypeAliasDecl<'src>),
    StaticAssert(StaticAssert<'src>),
    ClassTemplate(TemplateDecl<'src, ClassDecl<'src>>),
    FunctionTemplate(TemplateDecl<'src, FnDecl<'src>>),
}

#[derive(Debug)]
pub struct NamespaceDecl<'src> {
    pub name: &'src str,
    pub items: Box<[Item<'src>]>,
    pub span: Span,
}

#[derive(Debug)]
pub struct TemplateDecl<'src, D> {
    pub params: Box<[TemplateParam<'src>]>,
    /// Explicit signature parameter list. `None` means the short form
    /// where the signature is the declared parameters in order.
    pub signature: Option<Box<[SignatureParam<'src>]>>,
    pub decl: D,
    pub span: Span,
}

#[derive(Debug)]
pub struct TemplateParam<'src> {
    pub name: &'src str,
    pub kind: TemplateParamKind<'src>,
    pub span: Span,
}

#[derive(Debug)]
pub enum TemplateParamKind<'src> {
    Type,
    /// A value parameter with a declared type.
    Variable(TypeName<'src>),
}

#[derive(Debug)]
pub struct SignatureParam<'src> {
    pub param: TypeName<'src>,
    pub default: Option<TypeName<'src>>,
}

#[derive(Debug)]
pub struct ClassDecl<'src> {
    pub name: &'src str,
    pub kind: ClassKindAttr,
    pub parents: Box<[Spanned<Path<'src>>]>,
    pub keep_fields_order: bool,
    pub non_sync: NonSyncTag<'src>,
    pub members: Box<[ClassMember<'src>]>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ClassKindAttr {
    #[default]
    Struct,
    Class,
    Final,
    Polymorph,
    Interface,
    Abstract,
}

#[derive(Debug, Default)]
pub enum NonSyncTag<'src> {
    #[default]
    None,
    Always,
    Expr(Spanned<Expr<'src>>),
}

#[derive(Debug)]
pub enum ClassMember<'src> {
    Field(FieldDecl<'src>),
    Function(FnDecl<'src>),
    VisibilityLabel(Visibility, Span),
    Class(ClassDecl<'src>),
    Enum(EnumDecl<'src>),
    Variables(VarsDecl<'src>),
    TypeAlias(TypeAliasDecl<'src>),
    StaticAssert(StaticAssert<'src>),
    ClassTemplate(TemplateDecl<'src, ClassDecl<'src>>),
    FunctionTemplate(TemplateDecl<'src, FnDecl<'src>>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Visibility {
    #[default]
    Public,
    Protected,
    Private,
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Public => f.write_str("public"),
            Self::Protected => f.write_str("protected"),
            Self::Private => f.write_str("private"),
        }
    }
}

#[derive(Debug)]
pub struct FieldDecl<'src> {
    pub name: &'src str,
    pub ty: TypeName<'src>,
    pub mutability: Mutability,
    pub is_reference: bool,
    /// Lifetime tag letter for reference fields, `b'a'..=b'z'` mapped
    /// to `0..26`.
    pub reference_tag: Option<u8>,
    pub initializer: Option<Initializer<'src>>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mutability {
    Mut,
    #[default]
    Imut,
    Constexpr,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ValueModifier {
    #[default]
    Value,
    RefMut,
    RefImut,
}

#[derive(Debug)]
pub struct FnDecl<'src> {
    pub name: FnName<'src>,
    pub this_param: Option<ThisParam>,
    pub params: Box<[Param<'src>]>,
    /// `None` means void.
    pub return_type: Option<TypeName<'src>>,
    pub return_value: ValueModifier,
    pub references_pollution: Box<[PollutionPair]>,
    pub return_references: Box<[ParamReference]>,
    pub is_unsafe: bool,
    pub is_constexpr: bool,
    pub is_generator: bool,
    pub no_mangle: bool,
    pub calling_convention: Option<&'src str>,
    pub virtual_spec: VirtualSpec,
    pub body: Option<FnBody<'src>>,
    pub span: Span,
}

impl<'src> FnDecl<'src> {
    pub fn block_body(&self) -> Option<&Block<'src>> {
        match &self.body {
            Some(FnBody::Regular { block, .. }) => Some(block),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum FnBody<'src> {
    Regular {
        constructor_initializers: Option<Box<[(&'src str, Initializer<'src>)]>>,
        block: Block<'src>,
    },
    /// `= default`
    Generated,
    /// `= delete`
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FnName<'src> {
    Named(&'src str),
    Constructor,
    Destructor,
    Operator(OverloadedOperator),
}

impl<'src> FnName<'src> {
    pub fn as_str(&self) -> &'src str {
        match self {
            Self::Named(name) => name,
            Self::Constructor => "constructor",
            Self::Destructor => "destructor",
            Self::Operator(op) => op.as_str(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverloadedOperator {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Equals,
    Compare,
    Assign,
    Indexing,
    Call,
}

impl OverloadedOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Equals => "==",
            Self::Compare => "<=>",
            Self::Assign => "=",
            Self::Indexing => "[]",
            Self::Call => "()",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ThisParam {
    pub mutability: Mutability,
    /// `byval this` takes the receiver by value instead of by reference.
    pub by_value: bool,
    pub span: Span,
}

#[derive(Debug)]
pub struct Param<'src> {
    pub name: &'src str,
    pub ty: TypeName<'src>,
    pub value: ValueModifier,
    pub span: Span,
}

/// Reference to a parameter or to one of its inner reference tags,
/// written `0`, `1a` etc. in reference notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamReference {
    pub param: u8,
    pub tag: Option<u8>,
}

/// Declares that calling the function may make `dst` refer to `src`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PollutionPair {
    pub dst: ParamReference,
    pub src: ParamReference,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VirtualSpec {
    #[default]
    None,
    Virtual,
    Override,
    Final,
    Pure,
}

#[derive(Debug)]
pub struct VarsDecl<'src> {
    pub ty: TypeName<'src>,
    pub vars: Box<[VarEntry<'src>]>,
    pub span: Span,
}

#[derive(Debug)]
pub struct VarEntry<'src> {
    pub name: &'src str,
    pub mutability: Mutability,
    pub is_reference: bool,
    pub initializer: Option<Initializer<'src>>,
    pub span: Span,
}

#[derive(Debug)]
pub struct TypeAliasDecl<'src> {
    pub name: &'src str,
    pub ty: TypeName<'src>,
    pub span: Span,
}

#[derive(Debug)]
pub struct StaticAssert<'src> {
    pub expr: Spanned<Expr<'src>>,
    pub span: Span,
}

#[derive(Debug)]
pub struct EnumDecl<'src> {
    pub name: &'src str,
    /// Explicit underlying fundamental type name, e.g. `u8`.
    pub underlying: Option<&'src str>,
    pub members: Box<[Spanned<&'src str>]>,
    pub span: Span,
}

#[derive(Debug)]
pub struct Block<'src> {
    pub stmts: Box<[Stmt<'src>]>,
    pub is_unsafe: bool,
    pub span: Span,
}

impl<'src> Block<'src> {
    pub fn new(stmts: impl Into<Box<[Stmt<'src>]>>, span: Span) -> Self {
        Self {
            stmts: stmts.into(),
            is_unsafe: false,
            span,
        }
    }
}

#[derive(Debug)]
pub enum Stmt<'src> {
    Expr(Spanned<Expr<'src>>),
    Variables(VarsDecl<'src>),
    Auto {
        name: &'src str,
        mutability: Mutability,
        is_reference: bool,
        init: Spanned<Expr<'src>>,
        span: Span,
    },
    Assign {
        target: Spanned<Expr<'src>>,
        op: Option<BinOp>,
        value: Spanned<Expr<'src>>,
        span: Span,
    },
    Return(Option<Spanned<Expr<'src>>>, Span),
    If(IfStmt<'src>),
    While {
        cond: Spanned<Expr<'src>>,
        body: Block<'src>,
        span: Span,
    },
    Break(Span),
    Continue(Span),
    Block(Block<'src>),
    StaticAssert(StaticAssert<'src>),
    Halt(Span),
    Yield(Option<Spanned<Expr<'src>>>, Span),
}

impl Stmt<'_> {
    pub fn span(&self) -> Span {
        match self {
            Self::Expr((_, span)) => *span,
            Self::Variables(decl) => decl.span,
            Self::Auto { span, .. } | Self::Assign { span, .. } => *span,
            Self::Return(_, span) => *span,
            Self::If(stmt) => stmt.span,
            Self::While { span, .. } => *span,
            Self::Break(span) | Self::Continue(span) => *span,
            Self::Block(block) => block.span,
            Self::StaticAssert(assert) => assert.span,
            Self::Halt(span) => *span,
            Self::Yield(_, span) => *span,
        }
    }
}

#[derive(Debug)]
pub struct IfStmt<'src> {
    pub branches: Box<[CondBlock<'src>]>,
    pub else_block: Option<Block<'src>>,
    pub span: Span,
}

#[derive(Debug)]
pub struct CondBlock<'src> {
    pub cond: Spanned<Expr<'src>>,
    pub block: Block<'src>,
}

#[derive(Debug)]
pub enum Initializer<'src> {
    Expression(Spanned<Expr<'src>>),
    Constructor(Box<[Spanned<Expr<'src>>]>, Span),
    Sequence(Box<[Initializer<'src>]>, Span),
    Struct(Box<[(&'src str, Initializer<'src>)]>, Span),
    Zero(Span),
    Uninitialized(Span),
}

impl Initializer<'_> {
    pub fn span(&self) -> Span {
        match self {
            Self::Expression((_, span))
            | Self::Constructor(_, span)
            | Self::Sequence(_, span)
            | Self::Struct(_, span)
            | Self::Zero(span)
            | Self::Uninitialized(span) => *span,
        }
    }
}

#[derive(Debug)]
pub enum Expr<'src> {
    Number(NumberLiteral<'src>),
    Bool(bool),
    Char(char, &'src str),
    Path(Path<'src>),
    Member {
        base: Box<Spanned<Expr<'src>>>,
        name: &'src str,
    },
    Call {
        callee: Box<Spanned<Expr<'src>>>,
        args: Box<[Spanned<Expr<'src>>]>,
    },
    Index {
        base: Box<Spanned<Expr<'src>>>,
        index: Box<Spanned<Expr<'src>>>,
    },
    BinOp {
        lhs: Box<Spanned<Expr<'src>>>,
        op: BinOp,
        rhs: Box<Spanned<Expr<'src>>>,
    },
    UnOp {
        op: UnOp,
        expr: Box<Spanned<Expr<'src>>>,
    },
    /// `move(name)`
    Move(&'src str),
    Unsafe(Box<Spanned<Expr<'src>>>),
}

impl<'src> Expr<'src> {
    pub fn ident(name: &'src str) -> Self {
        Self::Path(Path::ident(name))
    }

    pub fn int(value: u64, suffix: &'src str) -> Self {
        Self::Number(NumberLiteral {
            value: NumberValue::Int(value),
            suffix,
        })
    }

    pub fn float(value: f64, suffix: &'src str) -> Self {
        Self::Number(NumberLiteral {
            value: NumberValue::Float(value),
            suffix,
        })
    }

    pub fn binary(
        lhs: Spanned<Expr<'src>>,
        op: BinOp,
        rhs: Spanned<Expr<'src>>,
    ) -> Self {
        Self::BinOp {
            lhs: Box::new(lhs),
            op,
            rhs: Box::new(rhs),
        }
    }

    pub fn call(
        callee: Spanned<Expr<'src>>,
        args: impl Into<Box<[Spanned<Expr<'src>>]>>,
    ) -> Self {
        Self::Call {
            callee: Box::new(callee),
            args: args.into(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NumberLiteral<'src> {
    pub value: NumberValue,
    pub suffix: &'src str,
}

#[derive(Debug, Clone, Copy)]
pub enum NumberValue {
    Int(u64),
    Float(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LazyAnd,
    LazyOr,
}

impl BinOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Eq | Self::Ne | Self::Lt | Self::Le | Self::Gt | Self::Ge
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::BitAnd => "&",
            Self::BitOr => "|",
            Self::BitXor => "^",
            Self::Shl => "<<",
            Self::Shr => ">>",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::LazyAnd => "&&",
            Self::LazyOr => "||",
        }
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
    BitNot,
}

/// A possibly qualified name, each component optionally carrying
/// template arguments.
#[derive(Debug)]
pub struct Path<'src> {
    pub components: Box<[PathComponent<'src>]>,
}

impl<'src> Path<'src> {
    pub fn ident(name: &'src str) -> Self {
        Self {
            components: Box::new([PathComponent {
                name,
                template_args: None,
            }]),
        }
    }

    pub fn new(components: impl IntoIterator<Item = PathComponent<'src>>) -> Self {
        Self {
            components: components.into_iter().collect(),
        }
    }

    pub fn as_single_ident(&self) -> Option<&'src str> {
        match &self.components[..] {
            [PathComponent {
                name,
                template_args: None,
            }] => Some(name),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct PathComponent<'src> {
    pub name: &'src str,
    pub template_args: Option<Box<[TemplateArg<'src>]>>,
}

impl<'src> PathComponent<'src> {
    pub fn plain(name: &'src str) -> Self {
        Self {
            name,
            template_args: None,
        }
    }

    pub fn with_args(name: &'src str, args: impl Into<Box<[TemplateArg<'src>]>>) -> Self {
        Self {
            name,
            template_args: Some(args.into()),
        }
    }
}

#[derive(Debug)]
pub enum TemplateArg<'src> {
    Type(TypeName<'src>),
    Expr(Spanned<Expr<'src>>),
}

#[derive(Debug)]
pub enum TypeName<'src> {
    Path(Spanned<Path<'src>>),
    Array {
        elem: Box<TypeName<'src>>,
        size: Box<Spanned<Expr<'src>>>,
        span: Span,
    },
    Tuple(Box<[TypeName<'src>]>, Span),
    RawPointer(Box<TypeName<'src>>, Span),
    FunctionPointer {
        params: Box<[(TypeName<'src>, ValueModifier)]>,
        ret: Option<Box<TypeName<'src>>>,
        ret_value: ValueModifier,
        is_unsafe: bool,
        span: Span,
    },
}

impl<'src> TypeName<'src> {
    pub fn ident(name: &'src str, span: Span) -> Self {
        Self::Path((Path::ident(name), span))
    }

    pub fn span(&self) -> Span {
        match self {
            Self::Path((_, span)) => *span,
            Self::Array { span, .. }
            | Self::Tuple(_, span)
            | Self::RawPointer(_, span)
            | Self::FunctionPointer { span, .. } => *span,
        }
    }
}
