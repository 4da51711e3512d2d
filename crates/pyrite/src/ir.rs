//! The SSA intermediate representation and its verifier.
//!
//! Lowering produces one [`IrModule`] per source module: a set of extern
//! declarations for the runtime ABI, global object cells, constructor
//! entries, and functions made of basic blocks. Values are immutable and
//! numbered per function; join points are explicit phi nodes at block
//! heads. The only memory the IR touches are function-local stack slots
//! and module-level global cells, both holding boxed object pointers.
//!
//! A module must pass [`IrModule::verify`] before anything executes; the
//! verifier checks block termination, phi/predecessor agreement, operand
//! definition, and call-site arity against declarations.

use std::collections::{HashMap, HashSet};
use std::fmt;

/// A per-function SSA value index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueId(pub u32);

/// A basic-block index within a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub u32);

/// A function index within a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncId(pub u32);

/// A module-level global cell index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalId(pub u32);

/// A function-local stack slot index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(pub u32);

/// Machine-level value categories flowing through the IR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrType {
    Void,
    /// Machine boolean (branch conditions).
    I1,
    /// 32-bit integer (type IDs, counts, exit codes).
    I32,
    /// C-string constant (literal text, names, error keys).
    CStr,
    /// Boxed object pointer.
    Obj,
}

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IrType::Void => "void",
            IrType::I1 => "i1",
            IrType::I32 => "i32",
            IrType::CStr => "cstr",
            IrType::Obj => "obj",
        };
        f.write_str(s)
    }
}

/// Call target: a declared runtime ABI symbol or a module function.
#[derive(Debug, Clone)]
pub enum Callee {
    Extern(String),
    Function(FuncId),
}

/// Instruction payloads. Value-producing kinds pair with a `dest` in
/// [`Inst`].
#[derive(Debug, Clone)]
pub enum InstKind {
    ConstI32(i32),
    ConstBool(bool),
    ConstStr(String),
    /// The null object sentinel.
    ConstNullObj,
    LoadSlot(SlotId),
    StoreSlot(SlotId, ValueId),
    LoadGlobal(GlobalId),
    StoreGlobal(GlobalId, ValueId),
    /// Null test on an object value (true when null).
    IsNull(ValueId),
    Call { callee: Callee, args: Vec<ValueId> },
}

/// One instruction with its optional result and source line.
#[derive(Debug, Clone)]
pub struct Inst {
    pub dest: Option<ValueId>,
    pub kind: InstKind,
    pub line: u32,
}

/// A join-point value at a block head.
#[derive(Debug, Clone)]
pub struct Phi {
    pub dest: ValueId,
    /// The variable the join merges, for readable dumps.
    pub name: String,
    pub incomings: Vec<(BlockId, ValueId)>,
}

/// Block terminators.
#[derive(Debug, Clone)]
pub enum Terminator {
    Br(BlockId),
    CondBr {
        cond: ValueId,
        then_block: BlockId,
        else_block: BlockId,
    },
    Ret(Option<ValueId>),
    Unreachable,
}

/// A basic block: phis at the head, a straight run of instructions, one
/// terminator.
#[derive(Debug, Clone)]
pub struct IrBlock {
    pub label: String,
    pub phis: Vec<Phi>,
    pub insts: Vec<Inst>,
    pub terminator: Option<Terminator>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linkage {
    /// Exported from the module (the program entry).
    Public,
    /// Module-internal.
    Internal,
}

/// A function under construction or finished.
#[derive(Debug, Clone)]
pub struct IrFunction {
    pub name: String,
    pub linkage: Linkage,
    /// Parameter names and types; parameters take value IDs `0..len`.
    pub params: Vec<(String, IrType)>,
    pub ret: IrType,
    /// Type of every value, indexed by [`ValueId`].
    pub value_types: Vec<IrType>,
    /// Stack-slot names (each slot holds one boxed object pointer).
    pub slots: Vec<String>,
    pub blocks: Vec<IrBlock>,
    pub entry: BlockId,
}

/// A forward declaration of a runtime ABI symbol.
#[derive(Debug, Clone)]
pub struct ExternDecl {
    pub name: String,
    pub params: Vec<IrType>,
    pub ret: IrType,
    /// Trailing arguments beyond `params` are allowed (`py_call_function`).
    pub variadic: bool,
}

/// A module-level cell holding one boxed object pointer.
#[derive(Debug, Clone)]
pub struct IrGlobal {
    pub name: String,
}

/// A global-constructor entry; higher priorities run later.
#[derive(Debug, Clone)]
pub struct CtorEntry {
    pub priority: u16,
    pub func: FuncId,
}

/// One lowered module.
#[derive(Debug, Clone)]
pub struct IrModule {
    pub name: String,
    pub externs: Vec<ExternDecl>,
    pub globals: Vec<IrGlobal>,
    pub ctors: Vec<CtorEntry>,
    pub functions: Vec<IrFunction>,
}

impl IrModule {
    pub fn function(&self, id: FuncId) -> &IrFunction {
        &self.functions[id.0 as usize]
    }

    pub fn find_function(&self, name: &str) -> Option<FuncId> {
        self.functions
            .iter()
            .position(|f| f.name == name)
            .map(|i| FuncId(i as u32))
    }

    pub fn find_extern(&self, name: &str) -> Option<&ExternDecl> {
        self.externs.iter().find(|e| e.name == name)
    }

    /// Full module verification. Returns every failure found.
    pub fn verify(&self) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();
        for ctor in &self.ctors {
            if ctor.func.0 as usize >= self.functions.len() {
                problems.push(format!("ctor references unknown function #{}", ctor.func.0));
            }
        }
        for function in &self.functions {
            verify_function(self, function, &mut problems);
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}

fn verify_function(module: &IrModule, function: &IrFunction, problems: &mut Vec<String>) {
    let ctx = |msg: String| format!("function '{}': {}", function.name, msg);
    let block_count = function.blocks.len();
    if function.entry.0 as usize >= block_count {
        problems.push(ctx(format!("entry block #{} out of range", function.entry.0)));
        return;
    }

    // Collect definitions: params, phis, instruction dests.
    let mut defined: HashSet<ValueId> = HashSet::new();
    for i in 0..function.params.len() {
        defined.insert(ValueId(i as u32));
    }
    for block in &function.blocks {
        for phi in &block.phis {
            if !defined.insert(phi.dest) {
                problems.push(ctx(format!("value v{} defined more than once", phi.dest.0)));
            }
        }
        for inst in &block.insts {
            if let Some(dest) = inst.dest {
                if !defined.insert(dest) {
                    problems.push(ctx(format!("value v{} defined more than once", dest.0)));
                }
            }
        }
    }

    let check_value = |v: ValueId, what: &str, problems: &mut Vec<String>| {
        if v.0 as usize >= function.value_types.len() {
            problems.push(ctx(format!("{} uses out-of-range value v{}", what, v.0)));
        } else if !defined.contains(&v) {
            problems.push(ctx(format!("{} uses undefined value v{}", what, v.0)));
        }
    };
    let check_block = |b: BlockId, what: &str, problems: &mut Vec<String>| {
        if b.0 as usize >= block_count {
            problems.push(ctx(format!("{} targets unknown block #{}", what, b.0)));
        }
    };

    // Predecessor sets for phi agreement.
    let mut preds: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
    for (i, block) in function.blocks.iter().enumerate() {
        let id = BlockId(i as u32);
        match &block.terminator {
            None => problems.push(ctx(format!("block '{}' has no terminator", block.label))),
            Some(Terminator::Br(target)) => {
                check_block(*target, "br", problems);
                preds.entry(*target).or_default().push(id);
            }
            Some(Terminator::CondBr {
                cond,
                then_block,
                else_block,
            }) => {
                check_value(*cond, "cond_br", problems);
                if let Some(ty) = function.value_types.get(cond.0 as usize) {
                    if *ty != IrType::I1 {
                        problems.push(ctx(format!(
                            "cond_br in '{}' on non-i1 value v{}",
                            block.label, cond.0
                        )));
                    }
                }
                check_block(*then_block, "cond_br", problems);
                check_block(*else_block, "cond_br", problems);
                preds.entry(*then_block).or_default().push(id);
                preds.entry(*else_block).or_default().push(id);
            }
            Some(Terminator::Ret(value)) => {
                match (value, function.ret) {
                    (None, IrType::Void) => {}
                    (None, ty) => {
                        problems.push(ctx(format!("ret without a value in a {} function", ty)))
                    }
                    (Some(v), IrType::Void) => {
                        problems.push(ctx(format!("ret v{} in a void function", v.0)))
                    }
                    (Some(v), _) => check_value(*v, "ret", problems),
                }
            }
            Some(Terminator::Unreachable) => {}
        }
    }

    for (i, block) in function.blocks.iter().enumerate() {
        let id = BlockId(i as u32);
        for phi in &block.phis {
            let mut seen: HashSet<BlockId> = HashSet::new();
            for (pred, value) in &phi.incomings {
                check_block(*pred, "phi incoming", problems);
                check_value(*value, "phi incoming", problems);
                if !seen.insert(*pred) {
                    problems.push(ctx(format!(
                        "phi '{}' in '{}' has duplicate incoming for block #{}",
                        phi.name, block.label, pred.0
                    )));
                }
            }
            let expected: HashSet<BlockId> =
                preds.get(&id).map(|v| v.iter().copied().collect()).unwrap_or_default();
            if seen != expected {
                problems.push(ctx(format!(
                    "phi '{}' in '{}' incomings do not match predecessors",
                    phi.name, block.label
                )));
            }
        }
        for inst in &block.insts {
            match &inst.kind {
                InstKind::ConstI32(_)
                | InstKind::ConstBool(_)
                | InstKind::ConstStr(_)
                | InstKind::ConstNullObj => {}
                InstKind::LoadSlot(slot) => {
                    if slot.0 as usize >= function.slots.len() {
                        problems.push(ctx(format!("unknown slot #{}", slot.0)));
                    }
                }
                InstKind::StoreSlot(slot, value) => {
                    if slot.0 as usize >= function.slots.len() {
                        problems.push(ctx(format!("unknown slot #{}", slot.0)));
                    }
                    check_value(*value, "store_slot", problems);
                }
                InstKind::LoadGlobal(global) => {
                    if global.0 as usize >= module.globals.len() {
                        problems.push(ctx(format!("unknown global #{}", global.0)));
                    }
                }
                InstKind::StoreGlobal(global, value) => {
                    if global.0 as usize >= module.globals.len() {
                        problems.push(ctx(format!("unknown global #{}", global.0)));
                    }
                    check_value(*value, "store_global", problems);
                }
                InstKind::IsNull(v) => check_value(*v, "is_null", problems),
                InstKind::Call { callee, args } => {
                    for arg in args {
                        check_value(*arg, "call", problems);
                    }
                    match callee {
                        Callee::Function(id) => {
                            match self_function(module, *id) {
                                Some(target) => {
                                    if target.params.len() != args.len() {
                                        problems.push(ctx(format!(
                                            "call to '{}' passes {} args, expects {}",
                                            target.name,
                                            args.len(),
                                            target.params.len()
                                        )));
                                    }
                                }
                                None => problems
                                    .push(ctx(format!("call to unknown function #{}", id.0))),
                            }
                        }
                        Callee::Extern(name) => match module.find_extern(name) {
                            Some(decl) => {
                                let ok = if decl.variadic {
                                    args.len() >= decl.params.len()
                                } else {
                                    args.len() == decl.params.len()
                                };
                                if !ok {
                                    problems.push(ctx(format!(
                                        "call to '{}' passes {} args, declared with {}",
                                        name,
                                        args.len(),
                                        decl.params.len()
                                    )));
                                }
                            }
                            None => {
                                problems.push(ctx(format!("call to undeclared extern '{}'", name)))
                            }
                        },
                    }
                }
            }
        }
    }
}

fn self_function(module: &IrModule, id: FuncId) -> Option<&IrFunction> {
    module.functions.get(id.0 as usize)
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Incremental constructor for one [`IrFunction`].
///
/// The builder tracks a current insertion block; emitting with no active
/// block (after the enclosing construct proved every path terminated) is
/// a silent no-op, matching how lowering skips dead statements.
pub struct FunctionBuilder {
    function: IrFunction,
    current: Option<BlockId>,
}

impl FunctionBuilder {
    pub fn new(name: &str, linkage: Linkage, params: Vec<(String, IrType)>, ret: IrType) -> Self {
        let value_types = params.iter().map(|(_, ty)| *ty).collect();
        let mut function = IrFunction {
            name: name.to_string(),
            linkage,
            params,
            ret,
            value_types,
            slots: Vec::new(),
            blocks: Vec::new(),
            entry: BlockId(0),
        };
        function.blocks.push(IrBlock {
            label: "entry".to_string(),
            phis: Vec::new(),
            insts: Vec::new(),
            terminator: None,
        });
        Self {
            function,
            current: Some(BlockId(0)),
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }

    pub fn param_value(&self, index: usize) -> ValueId {
        ValueId(index as u32)
    }

    fn new_value(&mut self, ty: IrType) -> ValueId {
        let id = ValueId(self.function.value_types.len() as u32);
        self.function.value_types.push(ty);
        id
    }

    pub fn add_slot(&mut self, name: &str) -> SlotId {
        let id = SlotId(self.function.slots.len() as u32);
        self.function.slots.push(name.to_string());
        id
    }

    pub fn create_block(&mut self, label: &str) -> BlockId {
        let id = BlockId(self.function.blocks.len() as u32);
        self.function.blocks.push(IrBlock {
            label: label.to_string(),
            phis: Vec::new(),
            insts: Vec::new(),
            terminator: None,
        });
        id
    }

    pub fn switch_to(&mut self, block: BlockId) {
        self.current = Some(block);
    }

    pub fn current_block(&self) -> Option<BlockId> {
        self.current
    }

    /// True when there is no active insertion point (every path out of the
    /// code lowered so far is terminated).
    pub fn is_dead(&self) -> bool {
        match self.current {
            Some(block) => self.function.blocks[block.0 as usize].terminator.is_some(),
            None => true,
        }
    }

    /// Deactivate the insertion point.
    pub fn clear_insertion(&mut self) {
        self.current = None;
    }

    /// Emit a value-producing instruction into the current block.
    pub fn emit(&mut self, kind: InstKind, ty: IrType, line: u32) -> ValueId {
        let dest = self.new_value(ty);
        self.push(Inst {
            dest: Some(dest),
            kind,
            line,
        });
        dest
    }

    /// Emit an instruction whose result (if any) is discarded.
    pub fn emit_void(&mut self, kind: InstKind, line: u32) {
        self.push(Inst {
            dest: None,
            kind,
            line,
        });
    }

    fn push(&mut self, inst: Inst) {
        let Some(block) = self.current else { return };
        let block = &mut self.function.blocks[block.0 as usize];
        if block.terminator.is_none() {
            block.insts.push(inst);
        }
    }

    /// Add a phi at the head of `block` and return its value.
    pub fn add_phi(&mut self, block: BlockId, name: &str, ty: IrType) -> ValueId {
        let dest = self.new_value(ty);
        self.function.blocks[block.0 as usize].phis.push(Phi {
            dest,
            name: name.to_string(),
            incomings: Vec::new(),
        });
        dest
    }

    /// Record an incoming `(pred, value)` edge on an existing phi.
    pub fn add_phi_incoming(&mut self, block: BlockId, phi: ValueId, pred: BlockId, value: ValueId) {
        let phis = &mut self.function.blocks[block.0 as usize].phis;
        if let Some(node) = phis.iter_mut().find(|p| p.dest == phi) {
            node.incomings.push((pred, value));
        }
    }

    /// Terminate the current block if it is still open.
    pub fn terminate(&mut self, terminator: Terminator) {
        let Some(block) = self.current else { return };
        let block = &mut self.function.blocks[block.0 as usize];
        if block.terminator.is_none() {
            block.terminator = Some(terminator);
        }
    }

    /// Number of predecessors already branching to `block`.
    pub fn pred_count(&self, target: BlockId) -> usize {
        self.function
            .blocks
            .iter()
            .filter(|b| match &b.terminator {
                Some(Terminator::Br(t)) => *t == target,
                Some(Terminator::CondBr {
                    then_block,
                    else_block,
                    ..
                }) => *then_block == target || *else_block == target,
                _ => false,
            })
            .count()
    }

    pub fn finish(mut self) -> IrFunction {
        // Any block left open becomes unreachable; the verifier would
        // reject an open block, and lowering only leaves one open when it
        // proved the block has no predecessors.
        for block in &mut self.function.blocks {
            if block.terminator.is_none() {
                block.terminator = Some(Terminator::Unreachable);
            }
        }
        self.function
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trivial_module(function: IrFunction) -> IrModule {
        IrModule {
            name: "m".to_string(),
            externs: Vec::new(),
            globals: Vec::new(),
            ctors: Vec::new(),
            functions: vec![function],
        }
    }

    #[test]
    fn straight_line_function_verifies() {
        let mut b = FunctionBuilder::new("f", Linkage::Internal, Vec::new(), IrType::I32);
        let v = b.emit(InstKind::ConstI32(0), IrType::I32, 1);
        b.terminate(Terminator::Ret(Some(v)));
        let module = trivial_module(b.finish());
        assert!(module.verify().is_ok());
    }

    #[test]
    fn missing_terminator_is_reported() {
        let b = FunctionBuilder::new("f", Linkage::Internal, Vec::new(), IrType::Void);
        let mut function = b.function;
        function.blocks[0].terminator = None;
        let module = trivial_module(function);
        let problems = module.verify().unwrap_err();
        assert!(problems.iter().any(|p| p.contains("no terminator")));
    }

    #[test]
    fn phi_incomings_must_match_predecessors() {
        let mut b = FunctionBuilder::new("f", Linkage::Internal, Vec::new(), IrType::I32);
        let header = b.create_block("header");
        let v = b.emit(InstKind::ConstI32(1), IrType::I32, 1);
        b.terminate(Terminator::Br(header));
        b.switch_to(header);
        let phi = b.add_phi(header, "x", IrType::I32);
        // Deliberately omit the entry incoming.
        b.terminate(Terminator::Ret(Some(phi)));
        let _ = v;
        let module = trivial_module(b.finish());
        let problems = module.verify().unwrap_err();
        assert!(problems.iter().any(|p| p.contains("do not match predecessors")));
    }

    #[test]
    fn undeclared_extern_is_reported() {
        let mut b = FunctionBuilder::new("f", Linkage::Internal, Vec::new(), IrType::Void);
        b.emit_void(
            InstKind::Call {
                callee: Callee::Extern("py_mystery".to_string()),
                args: Vec::new(),
            },
            1,
        );
        b.terminate(Terminator::Ret(None));
        let module = trivial_module(b.finish());
        let problems = module.verify().unwrap_err();
        assert!(problems.iter().any(|p| p.contains("undeclared extern")));
    }

    #[test]
    fn conditional_diamond_with_phi_verifies() {
        let mut b = FunctionBuilder::new("f", Linkage::Internal, Vec::new(), IrType::I32);
        let then_b = b.create_block("then");
        let else_b = b.create_block("else");
        let merge = b.create_block("merge");
        let cond = b.emit(InstKind::ConstBool(true), IrType::I1, 1);
        b.terminate(Terminator::CondBr {
            cond,
            then_block: then_b,
            else_block: else_b,
        });
        b.switch_to(then_b);
        let a = b.emit(InstKind::ConstI32(1), IrType::I32, 2);
        b.terminate(Terminator::Br(merge));
        b.switch_to(else_b);
        let c = b.emit(InstKind::ConstI32(2), IrType::I32, 3);
        b.terminate(Terminator::Br(merge));
        b.switch_to(merge);
        let phi = b.add_phi(merge, "x", IrType::I32);
        b.add_phi_incoming(merge, phi, then_b, a);
        b.add_phi_incoming(merge, phi, else_b, c);
        b.terminate(Terminator::Ret(Some(phi)));
        let module = trivial_module(b.finish());
        assert!(module.verify().is_ok(), "{:?}", module.verify());
    }
}
