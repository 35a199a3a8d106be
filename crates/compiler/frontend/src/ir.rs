//! The intermediate representation produced by a build. Deliberately
//! small: enough structure for a backend to emit real code from, and
//! for tests to assert on control flow and destructor placement.

use sable_ast::{BinOp, Span};

use crate::types::{CallingConvention, ClassId, Type};
use crate::values::ConstValue;

#[derive(Debug, Default)]
pub struct Module {
    pub triple: String,
    pub data_layout: DataLayout,
    pub structs: Vec<StructLayout>,
    pub globals: Vec<Global>,
    pub functions: Vec<Function>,
    pub vtables: Vec<VTable>,
    /// Alias-analysis type tags, filled only when the build asks for
    /// them. `parent` indexes another tag in this table.
    pub type_tags: Vec<TypeTag>,
}

#[derive(Debug)]
pub struct TypeTag {
    pub name: String,
    pub parent: Option<u32>,
}

impl Module {
    pub fn function(&self, mangled_name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == mangled_name)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DataLayout {
    pub pointer_size: u32,
}

impl Default for DataLayout {
    fn default() -> Self {
        Self { pointer_size: 8 }
    }
}

/// Field order here is storage order; it may differ from declaration
/// order when the class allows field reordering.
#[derive(Debug)]
pub struct StructLayout {
    pub class: ClassId,
    pub name: String,
    pub fields: Vec<StructField>,
    pub has_vtable_pointer: bool,
    /// Index into [`Module::type_tags`] when alias tags are enabled.
    pub tbaa_tag: Option<u32>,
}

#[derive(Debug)]
pub struct StructField {
    pub name: String,
    pub ty: Type,
    pub is_reference: bool,
}

#[derive(Debug)]
pub struct Global {
    pub name: String,
    pub ty: Type,
    pub init: Option<ConstValue>,
    pub is_mutable: bool,
}

/// One virtual table constant. Polymorph classes get one table per
/// ancestor path so that a pointer adjusted to any base still
/// dispatches correctly.
#[derive(Debug)]
pub struct VTable {
    /// Mangled symbol name of the table constant.
    pub name: String,
    pub class: ClassId,
    /// Ancestor chain from the class itself down to the base this table
    /// serves; a single element for the class's own table.
    pub path: Vec<ClassId>,
    pub entries: Vec<VTableEntry>,
}

#[derive(Debug)]
pub struct VTableEntry {
    pub method_name: String,
    pub function: String,
    pub is_pure: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalId(u32);

impl LocalId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(u32);

impl BlockId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug)]
pub struct Function {
    /// Mangled (or `nomangle`) symbol name.
    pub name: String,
    pub params: Vec<LocalId>,
    pub ret: Type,
    /// Return via hidden pointer argument.
    pub sret: bool,
    pub calling_convention: CallingConvention,
    pub locals: Vec<LocalDecl>,
    pub blocks: Vec<BasicBlock>,
    pub is_external: bool,
    /// Declaration position, recorded only for debug-info builds.
    pub source_span: Option<Span>,
}

impl Function {
    pub fn local(&self, id: LocalId) -> &LocalDecl {
        &self.locals[id.index()]
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    /// Local names passed to destructor calls, in emission order across
    /// all blocks.
    pub fn destructor_call_order(&self) -> Vec<&str> {
        self.blocks
            .iter()
            .flat_map(|block| &block.instrs)
            .filter_map(|instr| match instr {
                Instr::CallDestructor { local } => Some(self.local(*local).name.as_str()),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug)]
pub struct LocalDecl {
    pub name: String,
    pub ty: Type,
    pub is_reference: bool,
}

#[derive(Debug)]
pub struct BasicBlock {
    pub instrs: Vec<Instr>,
    pub terminator: Terminator,
}

#[derive(Debug, Clone)]
pub enum Operand {
    Local(LocalId),
    Const(ConstValue),
    FunctionRef(String),
}

#[derive(Debug)]
pub enum Instr {
    /// Copy or store a computed value into a local slot.
    Store { dst: LocalId, value: Operand },
    BinOp {
        dst: LocalId,
        op: BinOp,
        lhs: Operand,
        rhs: Operand,
    },
    Neg { dst: LocalId, value: Operand },
    Not { dst: LocalId, value: Operand },
    BitNot { dst: LocalId, value: Operand },
    Call {
        dst: Option<LocalId>,
        function: String,
        args: Vec<Operand>,
        /// Dispatched through the vtable slot instead of directly.
        virtual_slot: Option<u32>,
    },
    CallDestructor { local: LocalId },
    /// Generator suspension point carrying a produced value.
    Yield { value: Option<Operand> },
    /// Suspension points bracketing a generator body.
    Suspend { point: SuspendPoint },
    /// Stack slot liveness markers, emitted only on request.
    LifetimeStart { local: LocalId },
    LifetimeEnd { local: LocalId },
    FieldPtr {
        dst: LocalId,
        base: LocalId,
        field: u32,
    },
    IndexPtr {
        dst: LocalId,
        base: LocalId,
        index: Operand,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendPoint {
    Initial,
    Final,
}

#[derive(Debug)]
pub enum Terminator {
    Ret(Option<Operand>),
    Br(BlockId),
    CondBr {
        cond: Operand,
        then_block: BlockId,
        else_block: BlockId,
    },
    /// `halt` and other provably-untaken edges.
    Unreachable,
    /// Set while the block is still being filled.
    Incomplete,
}

/// Incremental builder for one IR function, in emission order.
#[derive(Debug)]
pub struct FunctionBuilder {
    name: String,
    ret: Type,
    sret: bool,
    calling_convention: CallingConvention,
    params: Vec<LocalId>,
    locals: Vec<LocalDecl>,
    blocks: Vec<BasicBlock>,
    current: BlockId,
    source_span: Option<Span>,
}

impl FunctionBuilder {
    pub fn new(name: impl Into<String>, ret: Type) -> Self {
        Self {
            name: name.into(),
            ret,
            sret: false,
            calling_convention: CallingConvention::Default,
            params: Vec::new(),
            locals: Vec::new(),
            blocks: vec![BasicBlock {
                instrs: Vec::new(),
                terminator: Terminator::Incomplete,
            }],
            current: BlockId(0),
            source_span: None,
        }
    }

    pub fn set_sret(&mut self, sret: bool) {
        self.sret = sret;
    }

    pub fn set_source_span(&mut self, span: Span) {
        self.source_span = Some(span);
    }

    pub fn set_calling_convention(&mut self, cc: CallingConvention) {
        self.calling_convention = cc;
    }

    pub fn add_param(&mut self, name: impl Into<String>, ty: Type, is_reference: bool) -> LocalId {
        let id = self.add_local(name, ty, is_reference);
        self.params.push(id);
        id
    }

    pub fn add_local(&mut self, name: impl Into<String>, ty: Type, is_reference: bool) -> LocalId {
        let id = LocalId(self.locals.len() as u32);
        self.locals.push(LocalDecl {
            name: name.into(),
            ty,
            is_reference,
        });
        id
    }

    pub fn new_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BasicBlock {
            instrs: Vec::new(),
            terminator: Terminator::Incomplete,
        });
        id
    }

    #[inline]
    pub fn current_block(&self) -> BlockId {
        self.current
    }

    pub fn switch_to(&mut self, block: BlockId) {
        self.current = block;
    }

    /// True once the current block has a terminator; further emission
    /// in it would be unreachable.
    pub fn is_terminated(&self) -> bool {
        !matches!(
            self.blocks[self.current.index()].terminator,
            Terminator::Incomplete
        )
    }

    pub fn emit(&mut self, instr: Instr) {
        if !self.is_terminated() {
            self.blocks[self.current.index()].instrs.push(instr);
        }
    }

    pub fn terminate(&mut self, terminator: Terminator) {
        let block = &mut self.blocks[self.current.index()];
        if matches!(block.terminator, Terminator::Incomplete) {
            block.terminator = terminator;
        }
    }

    pub fn finish(mut self) -> Function {
        // A fallen-off end of a void function returns implicitly.
        for block in &mut self.blocks {
            if matches!(block.terminator, Terminator::Incomplete) {
                block.terminator = if self.ret.is_void() {
                    Terminator::Ret(None)
                } else {
                    Terminator::Unreachable
                };
            }
        }
        Function {
            name: self.name,
            params: self.params,
            ret: self.ret,
            sret: self.sret,
            calling_convention: self.calling_convention,
            locals: self.locals,
            blocks: self.blocks,
            is_external: false,
            source_span: self.source_span,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_terminates_open_blocks() {
        let mut builder = FunctionBuilder::new("f", Type::VOID);
        let a = builder.add_local("a", Type::BOOL, false);
        builder.emit(Instr::Store {
            dst: a,
            value: Operand::Const(ConstValue::Bool(true)),
        });
        let function = builder.finish();
        assert!(matches!(
            function.blocks[0].terminator,
            Terminator::Ret(None)
        ));
    }

    #[test]
    fn no_emission_after_terminator() {
        let mut builder = FunctionBuilder::new("f", Type::VOID);
        let a = builder.add_local("a", Type::BOOL, false);
        builder.terminate(Terminator::Ret(None));
        builder.emit(Instr::CallDestructor { local: a });
        let function = builder.finish();
        assert!(function.blocks[0].instrs.is_empty());
    }

    #[test]
    fn destructor_call_order_is_reported_in_emission_order() {
        let mut builder = FunctionBuilder::new("f", Type::VOID);
        let a = builder.add_local("a", Type::BOOL, false);
        let b = builder.add_local("b", Type::BOOL, false);
        builder.emit(Instr::CallDestructor { local: b });
        builder.emit(Instr::CallDestructor { local: a });
        let function = builder.finish();
        assert_eq!(function.destructor_call_order(), vec!["b", "a"]);
    }
}
