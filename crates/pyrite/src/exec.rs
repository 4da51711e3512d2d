//! IR evaluation driver.
//!
//! Executes a verified [`IrModule`] the way a linked native binary would:
//! constructors first (by priority, then emission order), then the
//! public `__program_entry__`. ABI calls dispatch straight into
//! `pyrite-runtime`; direct calls push a fresh frame and interpret the
//! callee's blocks, resolving join points from the predecessor edge on
//! every block entry.
//!
//! `py_call_function` lives here rather than in the runtime because
//! dispatching a boxed `Function` object means re-entering interpreted
//! code: the object's `code_ptr` indexes this module's function table.
//! Calling a `Class` object allocates an instance and runs `__init__`
//! from the class chain when one exists.
//!
//! Program output is captured through the runtime's output sink, so a
//! driver gets `{ exit_code, stdout, stderr }` back without touching the
//! real process streams.

use std::rc::Rc;

use pyrite_runtime::{self as rt, PyObjectPtr};

use crate::error::{Error, Result};
use crate::ir::{
    BlockId, Callee, FuncId, InstKind, IrModule, Terminator, ValueId,
};
use crate::lower::module::PROGRAM_ENTRY;

/// Everything a finished program run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Call-stack depth bound; recursion beyond this is a fault rather than
/// a host stack overflow.
const RECURSION_LIMIT: usize = 4000;

/// Run a verified module and capture its output.
pub fn run_module(module: &IrModule) -> Result<ExecOutcome> {
    rt::io::capture_start();
    let mut machine = Machine {
        module,
        globals: vec![std::ptr::null_mut(); module.globals.len()],
        depth: 0,
    };
    let run = machine.run();
    let (stdout, stderr) = rt::io::capture_take();
    let exit_code = run?;
    Ok(ExecOutcome {
        exit_code,
        stdout,
        stderr,
    })
}

/// A machine-level value flowing through the interpreter.
#[derive(Debug, Clone)]
enum RtValue {
    Void,
    I1(bool),
    I32(i32),
    Str(Rc<str>),
    Obj(PyObjectPtr),
}

impl RtValue {
    fn as_obj(&self) -> Result<PyObjectPtr> {
        match self {
            RtValue::Obj(ptr) => Ok(*ptr),
            other => Err(Error::Execution(format!("expected object, got {:?}", other))),
        }
    }

    fn as_i32(&self) -> Result<i32> {
        match self {
            RtValue::I32(v) => Ok(*v),
            other => Err(Error::Execution(format!("expected i32, got {:?}", other))),
        }
    }

    fn as_i1(&self) -> Result<bool> {
        match self {
            RtValue::I1(v) => Ok(*v),
            other => Err(Error::Execution(format!("expected i1, got {:?}", other))),
        }
    }

    fn as_str(&self) -> Result<&str> {
        match self {
            RtValue::Str(s) => Ok(s),
            other => Err(Error::Execution(format!("expected cstr, got {:?}", other))),
        }
    }
}

struct Machine<'m> {
    module: &'m IrModule,
    globals: Vec<PyObjectPtr>,
    depth: usize,
}

impl<'m> Machine<'m> {
    fn run(&mut self) -> Result<i32> {
        let mut ctors = self.module.ctors.clone();
        ctors.sort_by_key(|c| c.priority);
        for ctor in ctors {
            self.call(ctor.func, Vec::new())?;
        }

        let entry = self
            .module
            .find_function(PROGRAM_ENTRY)
            .ok_or_else(|| Error::Execution("module has no program entry".to_string()))?;
        match self.call(entry, Vec::new())? {
            RtValue::I32(code) => Ok(code),
            other => Err(Error::Execution(format!(
                "program entry returned {:?}",
                other
            ))),
        }
    }

    /// Interpret one function call.
    fn call(&mut self, func_id: FuncId, args: Vec<RtValue>) -> Result<RtValue> {
        self.depth += 1;
        if self.depth > RECURSION_LIMIT {
            self.depth -= 1;
            return Err(Error::Execution("recursion limit exceeded".to_string()));
        }
        let result = self.call_inner(func_id, args);
        self.depth -= 1;
        result
    }

    fn call_inner(&mut self, func_id: FuncId, args: Vec<RtValue>) -> Result<RtValue> {
        let module: &'m IrModule = self.module;
        let function = module.function(func_id);
        let mut values: Vec<Option<RtValue>> = vec![None; function.value_types.len()];
        for (i, arg) in args.into_iter().enumerate() {
            values[i] = Some(arg);
        }
        let mut slots: Vec<PyObjectPtr> = vec![std::ptr::null_mut(); function.slots.len()];

        let mut block_id = function.entry;
        let mut prev: Option<BlockId> = None;
        loop {
            let block = &function.blocks[block_id.0 as usize];

            // Join points resolve in parallel from the incoming edge.
            if let Some(pred) = prev {
                let mut staged = Vec::with_capacity(block.phis.len());
                for phi in &block.phis {
                    let incoming = phi
                        .incomings
                        .iter()
                        .find(|(from, _)| *from == pred)
                        .map(|(_, value)| *value)
                        .ok_or_else(|| {
                            Error::Execution(format!(
                                "phi '{}' in '{}' has no incoming for the taken edge",
                                phi.name, block.label
                            ))
                        })?;
                    staged.push((phi.dest, read_value(&values, incoming)?));
                }
                for (dest, value) in staged {
                    values[dest.0 as usize] = Some(value);
                }
            }

            for inst in &block.insts {
                let produced = self.exec_inst(&inst.kind, &values, &mut slots)?;
                if let Some(dest) = inst.dest {
                    values[dest.0 as usize] = Some(produced);
                }
            }

            match block.terminator.as_ref().expect("verified module") {
                Terminator::Br(target) => {
                    prev = Some(block_id);
                    block_id = *target;
                }
                Terminator::CondBr {
                    cond,
                    then_block,
                    else_block,
                } => {
                    let taken = read_value(&values, *cond)?.as_i1()?;
                    prev = Some(block_id);
                    block_id = if taken { *then_block } else { *else_block };
                }
                Terminator::Ret(Some(value)) => {
                    return read_value(&values, *value);
                }
                Terminator::Ret(None) => {
                    return Ok(RtValue::Void);
                }
                Terminator::Unreachable => {
                    return Err(Error::Execution(format!(
                        "reached unreachable block '{}'",
                        block.label
                    )));
                }
            }
        }
    }

    fn exec_inst(
        &mut self,
        kind: &InstKind,
        values: &[Option<RtValue>],
        slots: &mut [PyObjectPtr],
    ) -> Result<RtValue> {
        match kind {
            InstKind::ConstI32(v) => Ok(RtValue::I32(*v)),
            InstKind::ConstBool(v) => Ok(RtValue::I1(*v)),
            InstKind::ConstStr(s) => Ok(RtValue::Str(Rc::from(s.as_str()))),
            InstKind::ConstNullObj => Ok(RtValue::Obj(std::ptr::null_mut())),
            InstKind::LoadSlot(slot) => Ok(RtValue::Obj(slots[slot.0 as usize])),
            InstKind::StoreSlot(slot, value) => {
                slots[slot.0 as usize] = read_value(values, *value)?.as_obj()?;
                Ok(RtValue::Void)
            }
            InstKind::LoadGlobal(global) => Ok(RtValue::Obj(self.globals[global.0 as usize])),
            InstKind::StoreGlobal(global, value) => {
                self.globals[global.0 as usize] = read_value(values, *value)?.as_obj()?;
                Ok(RtValue::Void)
            }
            InstKind::IsNull(value) => {
                Ok(RtValue::I1(read_value(values, *value)?.as_obj()?.is_null()))
            }
            InstKind::Call { callee, args } => {
                let mut resolved = Vec::with_capacity(args.len());
                for arg in args {
                    resolved.push(read_value(values, *arg)?);
                }
                match callee {
                    Callee::Function(id) => self.call(*id, resolved),
                    Callee::Extern(name) => self.abi_dispatch(name, resolved),
                }
            }
        }
    }

    /// Route an ABI call to the runtime.
    fn abi_dispatch(&mut self, name: &str, args: Vec<RtValue>) -> Result<RtValue> {
        let obj = |i: usize| -> Result<PyObjectPtr> { args[i].as_obj() };
        let int = |i: usize| -> Result<i32> { args[i].as_i32() };
        let flag = |i: usize| -> Result<bool> { args[i].as_i1() };
        let text = |i: usize| -> Result<&str> { args[i].as_str() };

        let result = match name {
            "py_initialize_builtin_type_methods" => {
                rt::py_initialize_builtin_type_methods();
                RtValue::Void
            }
            "py_create_int_from_string" => {
                RtValue::Obj(rt::py_create_int_from_string(text(0)?, int(1)? as u32))
            }
            "py_create_double_from_string" => RtValue::Obj(rt::py_create_double_from_string(
                text(0)?,
                int(1)? as u32,
                int(2)? as u32,
            )),
            "py_create_int" => RtValue::Obj(rt::py_create_int(int(0)? as i64)),
            "py_create_bool" => RtValue::Obj(rt::py_create_bool(flag(0)?)),
            "py_create_string" => RtValue::Obj(rt::py_create_string(text(0)?)),
            "py_create_list" => RtValue::Obj(rt::py_create_list(int(0)?, int(1)?)),
            "py_create_dict" => RtValue::Obj(rt::py_create_dict(int(0)?, int(1)?)),
            "py_get_none" => RtValue::Obj(rt::py_get_none()),
            "py_create_function" => {
                RtValue::Obj(rt::py_create_function(int(0)? as usize, int(1)?))
            }
            "py_create_class" => RtValue::Obj(rt::py_create_class(text(0)?, obj(1)?, obj(2)?)),
            "py_incref" => {
                rt::py_incref(obj(0)?);
                RtValue::Void
            }
            "py_decref" => {
                rt::py_decref(obj(0)?);
                RtValue::Void
            }
            "py_object_add" => RtValue::Obj(rt::py_object_add(obj(0)?, obj(1)?)),
            "py_object_subtract" => RtValue::Obj(rt::py_object_subtract(obj(0)?, obj(1)?)),
            "py_object_multiply" => RtValue::Obj(rt::py_object_multiply(obj(0)?, obj(1)?)),
            "py_object_divide" => RtValue::Obj(rt::py_object_divide(obj(0)?, obj(1)?)),
            "py_object_floor_divide" => {
                RtValue::Obj(rt::py_object_floor_divide(obj(0)?, obj(1)?))
            }
            "py_object_modulo" => RtValue::Obj(rt::py_object_modulo(obj(0)?, obj(1)?)),
            "py_object_power" => RtValue::Obj(rt::py_object_power(obj(0)?, obj(1)?)),
            "py_object_and" => RtValue::Obj(rt::py_object_and(obj(0)?, obj(1)?)),
            "py_object_or" => RtValue::Obj(rt::py_object_or(obj(0)?, obj(1)?)),
            "py_object_xor" => RtValue::Obj(rt::py_object_xor(obj(0)?, obj(1)?)),
            "py_object_lshift" => RtValue::Obj(rt::py_object_lshift(obj(0)?, obj(1)?)),
            "py_object_rshift" => RtValue::Obj(rt::py_object_rshift(obj(0)?, obj(1)?)),
            "py_object_negate" => RtValue::Obj(rt::py_object_negate(obj(0)?)),
            "py_object_not" => RtValue::Obj(rt::py_object_not(obj(0)?)),
            "py_object_bitnot" => RtValue::Obj(rt::py_object_bitnot(obj(0)?)),
            "py_object_compare" => {
                RtValue::Obj(rt::py_object_compare(obj(0)?, obj(1)?, int(2)?))
            }
            "py_object_to_bool" => RtValue::I1(rt::py_object_to_bool(obj(0)?)),
            "py_object_index" => RtValue::Obj(rt::py_object_index(obj(0)?, obj(1)?)),
            "py_object_set_index" => {
                RtValue::I1(rt::py_object_set_index(obj(0)?, obj(1)?, obj(2)?))
            }
            "py_object_len" => RtValue::I32(rt::py_object_len(obj(0)?)),
            "py_object_getattr" => RtValue::Obj(rt::py_object_getattr(obj(0)?, text(1)?)),
            "py_object_setattr" => {
                RtValue::I1(rt::py_object_setattr(obj(0)?, text(1)?, obj(2)?))
            }
            "py_object_copy" => RtValue::Obj(rt::py_object_copy(obj(0)?, int(1)?)),
            "py_smart_convert" => RtValue::Obj(rt::py_smart_convert(obj(0)?, int(1)?)),
            "py_call_function" => {
                let callable = obj(0)?;
                let argc = int(1)? as usize;
                let mut call_args = Vec::with_capacity(argc);
                for i in 0..argc {
                    call_args.push(obj(2 + i)?);
                }
                RtValue::Obj(self.call_callable(callable, call_args)?)
            }
            "py_call_function_noargs" => {
                RtValue::Obj(self.call_callable(obj(0)?, Vec::new())?)
            }
            "py_object_to_exit_code" => RtValue::I32(rt::py_object_to_exit_code(obj(0)?)),
            "py_print_object" => {
                rt::py_print_object(obj(0)?);
                RtValue::Void
            }
            "py_runtime_error" => {
                rt::py_runtime_error(text(0)?, int(1)?);
                RtValue::Void
            }
            "py_list_append" => RtValue::Obj(rt::py_list_append(obj(0)?, obj(1)?)),
            "py_dict_set_item" => {
                RtValue::I1(rt::py_dict_set_item(obj(0)?, obj(1)?, obj(2)?))
            }
            "py_object_get_iter" => RtValue::Obj(rt::py_object_get_iter(obj(0)?)),
            "py_iter_next" => RtValue::Obj(rt::py_iter_next(obj(0)?)),
            other => {
                return Err(Error::Execution(format!(
                    "call to unknown ABI symbol '{}'",
                    other
                )))
            }
        };
        Ok(result)
    }

    /// Runtime call dispatch for boxed callables: `Function` objects
    /// re-enter the interpreter, `Class` objects construct instances.
    fn call_callable(
        &mut self,
        callable: PyObjectPtr,
        args: Vec<PyObjectPtr>,
    ) -> Result<PyObjectPtr> {
        if callable.is_null() {
            rt::py_runtime_error("TypeError", 0);
            return Ok(std::ptr::null_mut());
        }
        let r = unsafe { rt::object::obj_ref(callable) };

        if let Some(function) = r.as_function() {
            let index = function.code_ptr;
            if index >= self.module.functions.len() {
                rt::py_runtime_error("TypeError", 0);
                return Ok(std::ptr::null_mut());
            }
            let func_id = FuncId(index as u32);
            if self.module.function(func_id).params.len() != args.len() {
                rt::py_runtime_error("TypeError", 0);
                return Ok(std::ptr::null_mut());
            }
            let call_args = args.into_iter().map(RtValue::Obj).collect();
            return self.call(func_id, call_args)?.as_obj();
        }

        if r.as_class().is_some() {
            let instance = rt::py_create_instance(callable);
            if instance.is_null() {
                return Ok(instance);
            }
            let init = rt::class_chain_lookup(callable, "__init__");
            if !init.is_null() {
                let mut full_args = Vec::with_capacity(args.len() + 1);
                full_args.push(instance);
                full_args.extend(args);
                let result = self.call_callable(init, full_args)?;
                rt::py_decref(result);
                rt::py_decref(init);
            } else if !args.is_empty() {
                rt::py_runtime_error("TypeError", 0);
            }
            return Ok(instance);
        }

        rt::py_runtime_error("TypeError", 0);
        Ok(std::ptr::null_mut())
    }
}

fn read_value(values: &[Option<RtValue>], id: ValueId) -> Result<RtValue> {
    values
        .get(id.0 as usize)
        .and_then(|v| v.clone())
        .ok_or_else(|| Error::Execution(format!("read of unset value v{}", id.0)))
}
