//! Statement lowering.
//!
//! Statements run under a deferred-release frame: the dispatcher pushes
//! one, the handler lowers, and every owned temporary the statement
//! produced is released at the statement boundary. Conditions release
//! their temporaries immediately after normalization to a machine
//! boolean, before any branch.
//!
//! Loop-carried variables follow the join-point protocol: names assigned
//! in a loop body that already have a value get a phi in the condition
//! block, assignments inside the loop write the latch side through the
//! loop update strategy, and when the loop closes the name rebinds to the
//! join value (stored back to its slot when it had one).

use std::collections::BTreeSet;

use rustpython_parser::ast::{self, Expr, Stmt};

use pyrite_runtime::type_ids::{self, ANY, CLASS, NONE, STRING};

use crate::diagnostic::Span;
use crate::infer::common_super_type;
use crate::ir::{FuncId, FunctionBuilder, InstKind, IrType, Linkage, Terminator};
use crate::lower::{ExprValue, LoopContext, LoopVar, LowerCtx, ObjectSource};
use crate::registry::TypeOperationRegistry;
use crate::symbols::{FunctionInfo, ScopeKind, Storage, VariableInfo};

impl<'src> LowerCtx<'src> {
    /// Lower one statement under its own deferred-release frame.
    pub fn lower_stmt(&mut self, stmt: &Stmt) {
        if self.is_dead() {
            return;
        }
        let span = self.span_of(stmt);
        let line = self.line(span);
        self.push_temp_frame();
        self.handle_stmt(stmt, span, line);
        self.cleanup_temps(line);
        self.pop_temp_frame();
    }

    /// Lower a statement list under a fresh block scope, stopping after a
    /// terminator.
    pub fn lower_block(&mut self, stmts: &[Stmt]) {
        self.symbols.push_scope(ScopeKind::Block);
        for stmt in stmts {
            if self.is_dead() {
                break;
            }
            self.lower_stmt(stmt);
        }
        self.symbols.pop_scope();
    }

    fn handle_stmt(&mut self, stmt: &Stmt, span: Span, line: u32) {
        match stmt {
            Stmt::Expr(expr_stmt) => {
                self.lower_expr(&expr_stmt.value);
            }
            Stmt::Assign(assign) => self.handle_assign(assign, span, line),
            Stmt::AugAssign(aug) => self.handle_aug_assign(aug, span, line),
            Stmt::AnnAssign(ann) => self.handle_ann_assign(ann, span, line),
            Stmt::If(if_stmt) => self.handle_if(if_stmt, line),
            Stmt::While(while_stmt) => self.handle_while(while_stmt, span, line),
            Stmt::For(for_stmt) => self.handle_for(for_stmt, span, line),
            Stmt::Return(ret) => self.handle_return(ret, span, line),
            Stmt::Break(_) => self.handle_break(span, line),
            Stmt::Continue(_) => self.handle_continue(span, line),
            Stmt::Pass(_) => {}
            Stmt::FunctionDef(def) => {
                self.lower_function_def(def, None);
            }
            Stmt::ClassDef(def) => self.handle_class_def(def, span, line),
            other => {
                let span = self.span_of(other);
                self.error_type(span, "unsupported statement kind");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Assignment
    // -----------------------------------------------------------------------

    fn handle_assign(&mut self, assign: &ast::StmtAssign, span: Span, line: u32) {
        let value_type = self.infer_expr_type(&assign.value);
        let value = self.lower_expr(&assign.value);
        let value = ExprValue {
            type_id: value_type,
            ..value
        };
        for target in &assign.targets {
            self.store_target(target, value, span, line);
        }
    }

    fn store_target(&mut self, target: &Expr, value: ExprValue, span: Span, line: u32) {
        match target {
            Expr::Name(name) => self.assign_name(name.id.as_str(), value, span, line),
            Expr::Subscript(subscript) => self.assign_subscript(subscript, value, line),
            Expr::Attribute(attribute) => {
                let object = self.lower_expr(&attribute.value);
                let name_value = self.const_str(attribute.attr.as_str(), line);
                self.abi_call(
                    "py_object_setattr",
                    vec![object.value, name_value, value.value],
                    line,
                );
            }
            other => {
                let span = self.span_of(other);
                self.error_invalid_assignment(span, "unsupported assignment target");
            }
        }
    }

    /// Indexed assignment always dispatches through the runtime; dict
    /// keys convert to the recorded key type first.
    fn assign_subscript(&mut self, subscript: &ast::ExprSubscript, value: ExprValue, line: u32) {
        let container_type = self.infer_expr_type(&subscript.value);
        let container = self.lower_expr(&subscript.value);
        let index_type = self.infer_expr_type(&subscript.slice);
        let mut index = self.lower_expr(&subscript.slice);
        if type_ids::base_of(container_type) == type_ids::DICT {
            let key_type = type_ids::dict_key_of(container_type);
            if key_type != ANY && type_ids::base_of(index_type) != type_ids::base_of(key_type) {
                index = self.convert_value(index, key_type, line);
            }
        }
        self.abi_call(
            "py_object_set_index",
            vec![container.value, index.value, value.value],
            line,
        );
    }

    /// Name assignment with compatibility validation and the update
    /// strategy seam: loop-carried names write their join point's latch
    /// side, everything else rebinds its storage directly.
    pub(crate) fn assign_name(&mut self, name: &str, value: ExprValue, span: Span, line: u32) {
        if let Some(info) = self.symbols.lookup(name).copied() {
            if !self.validate_assignment(name, info.type_id, value.type_id, span) {
                return;
            }
            let merged_type = common_super_type(info.type_id, value.type_id);
            if self.loop_var_context(name).is_some() {
                // Loop strategy: retain the new value as the variable's
                // reference and rebind; the superseded value stays alive
                // because the join point may still observe it on the
                // break path.
                self.emit_incref(value.value, line);
                self.symbols.update(name, Storage::Value(value.value), merged_type);
                return;
            }
            match info.storage {
                Storage::Slot(slot) => {
                    let old = self.builder().emit(InstKind::LoadSlot(slot), IrType::Obj, line);
                    self.emit_decref(old, line);
                    self.emit_incref(value.value, line);
                    self.builder().emit_void(InstKind::StoreSlot(slot, value.value), line);
                    self.symbols.update(name, Storage::Slot(slot), merged_type);
                }
                Storage::Global(global) => {
                    let old = self
                        .builder()
                        .emit(InstKind::LoadGlobal(global), IrType::Obj, line);
                    self.emit_decref(old, line);
                    self.emit_incref(value.value, line);
                    self.builder()
                        .emit_void(InstKind::StoreGlobal(global, value.value), line);
                    self.symbols.update(name, Storage::Global(global), merged_type);
                }
                Storage::Value(old) => {
                    self.emit_decref(old, line);
                    self.emit_incref(value.value, line);
                    self.symbols.update(name, Storage::Value(value.value), merged_type);
                }
            }
            return;
        }

        // Fresh definition: global cell at module level, slot otherwise.
        let storage = self.fresh_storage(name);
        self.emit_incref(value.value, line);
        match storage {
            Storage::Slot(slot) => {
                self.builder().emit_void(InstKind::StoreSlot(slot, value.value), line);
            }
            Storage::Global(global) => {
                self.builder()
                    .emit_void(InstKind::StoreGlobal(global, value.value), line);
            }
            Storage::Value(_) => unreachable!("fresh storage is never a direct value"),
        }
        self.symbols.define(
            name,
            VariableInfo {
                storage,
                type_id: value.type_id,
            },
        );
    }

    fn validate_assignment(&mut self, name: &str, existing: i32, incoming: i32, span: Span) -> bool {
        if type_ids::are_compatible(existing, incoming) {
            return true;
        }
        self.error_invalid_assignment(
            span,
            format!(
                "cannot assign '{}' to '{}' of type '{}'",
                type_ids::name_of(incoming),
                name,
                type_ids::name_of(existing)
            ),
        );
        false
    }

    fn handle_aug_assign(&mut self, aug: &ast::StmtAugAssign, span: Span, line: u32) {
        let Expr::Name(name) = aug.target.as_ref() else {
            self.error_invalid_assignment(span, "augmented assignment needs a plain name target");
            return;
        };
        let Some(token) = super::expr::bin_op_token(&aug.op) else {
            self.error_type(span, "operator has no registered operations");
            return;
        };
        let target_type = self
            .symbols
            .lookup(name.id.as_str())
            .map(|info| info.type_id)
            .unwrap_or(ANY);
        let value_type = self.infer_expr_type(&aug.value);
        let result_type = self.binop_static_result(token, target_type, value_type);

        let current = self.lower_expr(aug.target.as_ref());
        let operand = self.lower_expr(&aug.value);
        let result = self.emit_operator(
            token,
            current,
            operand,
            target_type,
            value_type,
            result_type,
            span,
            line,
        );
        self.assign_name(name.id.as_str(), result, span, line);
    }

    fn handle_ann_assign(&mut self, ann: &ast::StmtAnnAssign, span: Span, line: u32) {
        let Expr::Name(name) = ann.target.as_ref() else {
            self.error_invalid_assignment(span, "annotated assignment needs a plain name target");
            return;
        };
        let declared = self.annotation_type(&ann.annotation);
        let Some(value_expr) = &ann.value else {
            // Bare declaration; the first assignment defines storage.
            return;
        };
        let value_type = self.infer_expr_type(value_expr);
        let value = self.lower_expr(value_expr);
        if !type_ids::are_compatible(declared, value_type) {
            self.error_invalid_assignment(
                span,
                format!(
                    "annotated type '{}' does not accept '{}'",
                    type_ids::name_of(declared),
                    type_ids::name_of(value_type)
                ),
            );
            return;
        }
        let value = ExprValue {
            type_id: declared,
            ..value
        };
        self.assign_name(name.id.as_str(), value, span, line);
    }

    /// Registry result type without literal refinement, for augmented
    /// assignments.
    fn binop_static_result(
        &mut self,
        token: crate::registry::BinOpToken,
        left: i32,
        right: i32,
    ) -> i32 {
        let registry = TypeOperationRegistry::instance();
        registry
            .binary_op(token, left, right)
            .map(|d| d.result_type_id)
            .or_else(|| {
                registry
                    .find_operable_path(token, left, right)
                    .and_then(|path| registry.binary_op(token, path.left, path.right))
                    .map(|d| d.result_type_id)
            })
            .unwrap_or(ANY)
    }

    // -----------------------------------------------------------------------
    // Control flow
    // -----------------------------------------------------------------------

    fn handle_if(&mut self, if_stmt: &ast::StmtIf, line: u32) {
        self.push_temp_frame();
        let cond = self.lower_expr(&if_stmt.test);
        let flag = self.to_machine_bool(cond, line);
        self.cleanup_temps(line);
        self.pop_temp_frame();

        // Names held as direct SSA values (parameters, loop join points)
        // that either arm assigns need a merge join; slot- and
        // global-backed names merge through memory on their own.
        let mut branch_assigned = BTreeSet::new();
        assigned_names(&if_stmt.body, &mut branch_assigned);
        assigned_names(&if_stmt.orelse, &mut branch_assigned);
        let tracked: Vec<(String, crate::ir::ValueId, i32)> = branch_assigned
            .iter()
            .filter_map(|name| {
                self.symbols.lookup(name).and_then(|info| match info.storage {
                    Storage::Value(value) => Some((name.clone(), value, info.type_id)),
                    _ => None,
                })
            })
            .collect();

        let then_block = self.builder().create_block("then");
        let else_block = self.builder().create_block("else");
        let merge_block = self.builder().create_block("ifcont");
        self.builder().terminate(Terminator::CondBr {
            cond: flag,
            then_block,
            else_block,
        });

        self.builder().switch_to(then_block);
        self.lower_block(&if_stmt.body);
        let then_dead = self.is_dead();
        let then_pred = self.builder_ref().current_block();
        let then_state = self.branch_value_state(&tracked);
        if !then_dead {
            self.builder().terminate(Terminator::Br(merge_block));
        }

        // The else arm starts from the pre-branch values. `elif` arrives
        // as a single nested `if` here and re-enters this handler.
        for (name, pre, type_id) in &tracked {
            self.symbols.update(name, Storage::Value(*pre), *type_id);
        }
        self.builder().switch_to(else_block);
        self.lower_block(&if_stmt.orelse);
        let else_dead = self.is_dead();
        let else_pred = self.builder_ref().current_block();
        let else_state = self.branch_value_state(&tracked);
        if !else_dead {
            self.builder().terminate(Terminator::Br(merge_block));
        }

        if self.builder_ref().pred_count(merge_block) == 0 {
            // Neither arm falls through; the merge is unreachable.
            self.builder().switch_to(merge_block);
            self.builder().terminate(Terminator::Unreachable);
            self.builder().clear_insertion();
            return;
        }
        self.builder().switch_to(merge_block);

        for (index, (name, _, _)) in tracked.iter().enumerate() {
            let (then_value, then_type) = then_state[index];
            let (else_value, else_type) = else_state[index];
            match (then_dead, else_dead) {
                (false, false) => {
                    let merged_type = common_super_type(then_type, else_type);
                    if then_value == else_value {
                        self.symbols.update(name, Storage::Value(then_value), merged_type);
                    } else {
                        let phi = self.builder().add_phi(merge_block, name, IrType::Obj);
                        let then_pred = then_pred.expect("live arm has a block");
                        let else_pred = else_pred.expect("live arm has a block");
                        self.builder()
                            .add_phi_incoming(merge_block, phi, then_pred, then_value);
                        self.builder()
                            .add_phi_incoming(merge_block, phi, else_pred, else_value);
                        self.symbols.update(name, Storage::Value(phi), merged_type);
                    }
                }
                (false, true) => {
                    self.symbols.update(name, Storage::Value(then_value), then_type);
                }
                (true, false) => {
                    self.symbols.update(name, Storage::Value(else_value), else_type);
                }
                (true, true) => {}
            }
        }
    }

    /// The current SSA value of each tracked name at the end of a branch
    /// arm (falling back to the pre-branch value when the arm never
    /// rebound it).
    fn branch_value_state(
        &self,
        tracked: &[(String, crate::ir::ValueId, i32)],
    ) -> Vec<(crate::ir::ValueId, i32)> {
        tracked
            .iter()
            .map(|(name, pre, pre_type)| {
                match self.symbols.lookup(name).map(|info| (info.storage, info.type_id)) {
                    Some((Storage::Value(value), type_id)) => (value, type_id),
                    _ => (*pre, *pre_type),
                }
            })
            .collect()
    }

    /// Load the pre-loop value of every loop-assigned name that already
    /// has a (non-global) value. Must run in the preheader, before the
    /// branch to the condition block.
    fn collect_loop_prevalues(
        &mut self,
        names: &BTreeSet<String>,
        line: u32,
    ) -> Vec<(String, crate::ir::ValueId, VariableInfo)> {
        let mut pre_values = Vec::new();
        for name in names {
            let Some(info) = self.symbols.lookup(name).copied() else {
                continue;
            };
            if matches!(info.storage, Storage::Global(_)) {
                // Globals are memory cells; loads and stores already
                // merge across iterations.
                continue;
            }
            let pre = self.read_storage(info.storage, line);
            pre_values.push((name.clone(), pre, info));
        }
        pre_values
    }

    /// Materialize the join-point phis in the condition block and rebind
    /// each name to its phi for the duration of the loop.
    fn install_loop_phis(
        &mut self,
        pre_values: Vec<(String, crate::ir::ValueId, VariableInfo)>,
        preheader: crate::ir::BlockId,
        cond_block: crate::ir::BlockId,
    ) -> std::collections::HashMap<String, LoopVar> {
        let mut vars = std::collections::HashMap::new();
        for (name, pre, info) in pre_values {
            let phi = self.builder().add_phi(cond_block, &name, IrType::Obj);
            self.builder().add_phi_incoming(cond_block, phi, preheader, pre);
            self.symbols.update(&name, Storage::Value(phi), info.type_id);
            vars.insert(
                name,
                LoopVar {
                    phi,
                    original: info.storage,
                    type_id: info.type_id,
                },
            );
        }
        vars
    }

    /// Add the back-edge (or `continue`-edge) incoming for every join
    /// point of the innermost loop, using each name's current value.
    fn add_backedge_incomings(&mut self, ctx_index: usize, line: u32) {
        let Some(block) = self.builder_ref().current_block() else { return };
        let names: Vec<String> = self.loop_stack[ctx_index].vars.keys().cloned().collect();
        for name in names {
            let current = self
                .symbols
                .lookup(&name)
                .map(|info| info.storage)
                .expect("loop variable stays visible");
            let value = self.read_storage(current, line);
            let (cond_block, phi) = {
                let ctx = &self.loop_stack[ctx_index];
                (ctx.cond_block, ctx.vars[&name].phi)
            };
            self.builder().add_phi_incoming(cond_block, phi, block, value);
        }
    }

    /// Close a loop: rebind every join-point name to its phi and store
    /// the merged value back into slot-backed storage.
    fn close_loop_vars(&mut self, ctx: &LoopContext, line: u32) {
        for (name, var) in &ctx.vars {
            self.symbols.update(name, Storage::Value(var.phi), var.type_id);
            if let Storage::Slot(slot) = var.original {
                self.builder().emit_void(InstKind::StoreSlot(slot, var.phi), line);
                self.symbols.update(name, Storage::Slot(slot), var.type_id);
            }
        }
    }

    fn handle_while(&mut self, while_stmt: &ast::StmtWhile, span: Span, line: u32) {
        if !while_stmt.orelse.is_empty() {
            self.error_type(span, "while-else is not supported");
            return;
        }
        let mut assigned = BTreeSet::new();
        assigned_names(&while_stmt.body, &mut assigned);

        let preheader = self.builder_ref().current_block().expect("active block");
        let pre_values = self.collect_loop_prevalues(&assigned, line);
        let cond_block = self.builder().create_block("while.cond");
        let body_block = self.builder().create_block("while.body");
        let end_block = self.builder().create_block("while.end");

        self.builder().terminate(Terminator::Br(cond_block));
        self.builder().switch_to(cond_block);
        let vars = self.install_loop_phis(pre_values, preheader, cond_block);
        self.loop_stack.push(LoopContext {
            cond_block,
            end_block,
            vars,
            depth: self.builders.len(),
        });

        self.push_temp_frame();
        let cond = self.lower_expr(&while_stmt.test);
        let flag = self.to_machine_bool(cond, line);
        self.cleanup_temps(line);
        self.pop_temp_frame();
        self.builder().terminate(Terminator::CondBr {
            cond: flag,
            then_block: body_block,
            else_block: end_block,
        });

        self.builder().switch_to(body_block);
        self.lower_block(&while_stmt.body);
        if !self.is_dead() {
            let ctx_index = self.loop_stack.len() - 1;
            self.add_backedge_incomings(ctx_index, line);
            self.builder().terminate(Terminator::Br(cond_block));
        }

        let ctx = self.loop_stack.pop().expect("loop context pushed above");
        self.builder().switch_to(end_block);
        self.close_loop_vars(&ctx, line);
    }

    fn handle_for(&mut self, for_stmt: &ast::StmtFor, span: Span, line: u32) {
        if !for_stmt.orelse.is_empty() {
            self.error_type(span, "for-else is not supported");
            return;
        }
        let Expr::Name(target) = for_stmt.target.as_ref() else {
            self.error_invalid_assignment(span, "for target must be a plain name");
            return;
        };
        let target_name = target.id.as_str().to_string();

        let iterable_type = self.infer_expr_type(&for_stmt.iter);
        let element_type = match type_ids::base_of(iterable_type) {
            type_ids::LIST => type_ids::list_elem_of(iterable_type),
            type_ids::STRING => STRING,
            _ => ANY,
        };
        let iterable = self.lower_expr(&for_stmt.iter);
        let iterator = self
            .abi_call("py_object_get_iter", vec![iterable.value], line)
            .expect("object result");
        // Released at the loop end via the statement frame.
        self.track_temp(iterator, ObjectSource::FunctionReturn);

        // Pre-bind a fresh target so the body's assignment machinery has
        // storage (and a join point) to work with.
        if self.symbols.lookup(&target_name).is_none() {
            let none = self.abi_call("py_get_none", vec![], line).expect("object result");
            let fresh = ExprValue {
                value: none,
                type_id: element_type,
                owned: false,
            };
            self.assign_name(&target_name, fresh, span, line);
        }

        let mut assigned = BTreeSet::new();
        assigned.insert(target_name.clone());
        assigned_names(&for_stmt.body, &mut assigned);

        let preheader = self.builder_ref().current_block().expect("active block");
        let pre_values = self.collect_loop_prevalues(&assigned, line);
        let cond_block = self.builder().create_block("for.cond");
        let body_block = self.builder().create_block("for.body");
        let end_block = self.builder().create_block("for.end");

        self.builder().terminate(Terminator::Br(cond_block));
        self.builder().switch_to(cond_block);
        let vars = self.install_loop_phis(pre_values, preheader, cond_block);
        self.loop_stack.push(LoopContext {
            cond_block,
            end_block,
            vars,
            depth: self.builders.len(),
        });

        let element = self
            .abi_call("py_iter_next", vec![iterator], line)
            .expect("object result");
        let exhausted = self.is_null(element, line);
        self.builder().terminate(Terminator::CondBr {
            cond: exhausted,
            then_block: end_block,
            else_block: body_block,
        });

        self.builder().switch_to(body_block);
        let element_value = ExprValue {
            value: element,
            type_id: element_type,
            owned: false,
        };
        self.assign_name(&target_name, element_value, span, line);
        self.lower_block(&for_stmt.body);
        if !self.is_dead() {
            // Latch: release this iteration's element before looping.
            self.emit_decref(element, line);
            let ctx_index = self.loop_stack.len() - 1;
            self.add_backedge_incomings(ctx_index, line);
            self.builder().terminate(Terminator::Br(cond_block));
        }

        let ctx = self.loop_stack.pop().expect("loop context pushed above");
        self.builder().switch_to(end_block);
        // Null on exhaustion, the current element when a break jumped
        // here; both forms release correctly.
        self.emit_decref(element, line);
        self.close_loop_vars(&ctx, line);
    }

    fn handle_break(&mut self, span: Span, line: u32) {
        let depth = self.builders.len();
        let Some(ctx) = self.loop_stack.iter().rev().find(|c| c.depth == depth) else {
            self.error_type(span, "'break' outside loop");
            return;
        };
        let end_block = ctx.end_block;
        self.cleanup_temps(line);
        self.builder().terminate(Terminator::Br(end_block));
    }

    fn handle_continue(&mut self, span: Span, line: u32) {
        let depth = self.builders.len();
        let Some(index) = self
            .loop_stack
            .iter()
            .rposition(|c| c.depth == depth)
        else {
            self.error_type(span, "'continue' outside loop");
            return;
        };
        self.cleanup_temps(line);
        let cond_block = self.loop_stack[index].cond_block;
        self.add_backedge_incomings(index, line);
        self.builder().terminate(Terminator::Br(cond_block));
    }

    // -----------------------------------------------------------------------
    // Return
    // -----------------------------------------------------------------------

    fn handle_return(&mut self, ret: &ast::StmtReturn, span: Span, line: u32) {
        let Some(&declared) = self.function_return_types.last() else {
            self.error_type(span, "'return' outside function");
            return;
        };
        let value = match &ret.value {
            Some(expr) => {
                let ty = self.infer_expr_type(expr);
                let v = self.lower_expr(expr);
                ExprValue { type_id: ty, ..v }
            }
            None => {
                let none = self.abi_call("py_get_none", vec![], line).expect("object result");
                ExprValue {
                    value: none,
                    type_id: NONE,
                    owned: false,
                }
            }
        };
        let prepared = self.prepare_return_value(value, declared, span, line);
        self.emit_incref(prepared.value, line);
        self.release_frames_for_exit(line);
        self.builder().terminate(Terminator::Ret(Some(prepared.value)));
    }

    /// Coerce a return value to the declared return type.
    fn prepare_return_value(
        &mut self,
        value: ExprValue,
        declared: i32,
        span: Span,
        line: u32,
    ) -> ExprValue {
        if declared == ANY
            || declared == NONE
            || type_ids::base_of(value.type_id) == type_ids::base_of(declared)
        {
            return value;
        }
        if !type_ids::are_compatible(value.type_id, declared) {
            self.error_type(
                span,
                format!(
                    "cannot return '{}' from a function declared to return '{}'",
                    type_ids::name_of(value.type_id),
                    type_ids::name_of(declared)
                ),
            );
            return value;
        }
        self.convert_value(value, declared, line)
    }

    // -----------------------------------------------------------------------
    // Definitions
    // -----------------------------------------------------------------------

    /// Lower a function definition. For plain functions this also emits
    /// the module-level cell holding the boxed `Function` object at the
    /// definition site; methods hand the object to their class dict
    /// instead. Returns the IR function together with its signature ID.
    pub(crate) fn lower_function_def(
        &mut self,
        def: &ast::StmtFunctionDef,
        method_of: Option<&str>,
    ) -> Option<(FuncId, i32)> {
        let span = self.span_of(def);
        let line = self.line(span);
        let name = def.name.as_str().to_string();

        if !def.decorator_list.is_empty() {
            self.error_type(span, "decorators are not supported");
            return None;
        }
        let args = &def.args;
        if args.vararg.is_some() || args.kwarg.is_some() || !args.kwonlyargs.is_empty() {
            self.error_type(span, "starred and keyword-only parameters are not supported");
            return None;
        }

        let mut param_names = Vec::new();
        let mut param_types = Vec::new();
        for arg in &args.args {
            if arg.default.is_some() {
                self.error_type(span, "parameter defaults are not supported");
                return None;
            }
            param_names.push(arg.def.arg.as_str().to_string());
            param_types.push(
                arg.def
                    .annotation
                    .as_ref()
                    .map(|a| self.annotation_type(a))
                    .unwrap_or(ANY),
            );
        }

        let annotated_return = def.returns.as_ref().map(|r| self.annotation_type(r));
        let func_id = self.module.reserve_function();
        let symbol = match method_of {
            Some(class_name) => format!("{}.{}", class_name, name),
            None => name.clone(),
        };

        // Pre-register so recursive calls in the body resolve directly.
        let cell = if method_of.is_none() {
            let storage = self.fresh_storage(&name);
            self.symbols.define_function(
                &name,
                FunctionInfo {
                    func_id,
                    cell: storage,
                    param_names: param_names.clone(),
                    param_types: param_types.clone(),
                    return_type_id: annotated_return.unwrap_or(ANY),
                },
            );
            Some(storage)
        } else {
            None
        };

        // Return type: the annotation, or a best-effort scan of the
        // body's returns with only the parameters in scope.
        let return_type = match annotated_return {
            Some(ty) => ty,
            None => {
                self.symbols.push_scope(ScopeKind::Function);
                for (i, (pname, pty)) in param_names.iter().zip(&param_types).enumerate() {
                    self.symbols.define(
                        pname,
                        VariableInfo {
                            storage: Storage::Value(crate::ir::ValueId(i as u32)),
                            type_id: *pty,
                        },
                    );
                }
                let ty = self.analyze_return_type(&def.body);
                self.symbols.pop_scope();
                // Literal-range cache entries computed against parameter
                // placeholders would go stale; drop them.
                self.type_cache.clear();
                if method_of.is_none() {
                    self.symbols.set_function_return_type(&name, ty);
                }
                ty
            }
        };

        tracing::debug!(function = %symbol, return_type, "lowering function body");

        // Build the body in its own builder; loop contexts do not cross
        // function boundaries.
        let saved_loops = std::mem::take(&mut self.loop_stack);
        let ir_params = param_names
            .iter()
            .map(|p| (p.clone(), IrType::Obj))
            .collect();
        self.builders
            .push(FunctionBuilder::new(&symbol, Linkage::Internal, ir_params, IrType::Obj));
        self.function_return_types.push(return_type);
        self.push_frame_base();
        self.symbols.push_scope(ScopeKind::Function);
        for (i, (pname, pty)) in param_names.iter().zip(&param_types).enumerate() {
            let param = self.builder_ref().param_value(i);
            self.symbols.define(
                pname,
                VariableInfo {
                    storage: Storage::Value(param),
                    type_id: *pty,
                },
            );
            // The body owns its parameters for the duration of the call.
            self.emit_incref(param, line);
        }

        for stmt in &def.body {
            if self.is_dead() {
                break;
            }
            self.lower_stmt(stmt);
        }
        if !self.is_dead() {
            let none = self.abi_call("py_get_none", vec![], line).expect("object result");
            self.builder().terminate(Terminator::Ret(Some(none)));
        }

        self.symbols.pop_scope();
        self.pop_frame_base();
        self.function_return_types.pop();
        let finished = self.builders.pop().expect("builder pushed above").finish();
        self.module.set_function(func_id, finished);
        self.loop_stack = saved_loops;
        self.type_cache.clear();

        let signature_type_id = type_ids::FUNC_BASE + return_type;

        // The module-level cell gets its Function object at the
        // definition site.
        if let Some(cell) = cell {
            let code = self.const_i32(func_id.0 as i32, line);
            let signature = self.const_i32(signature_type_id, line);
            let function_object = self
                .abi_call("py_create_function", vec![code, signature], line)
                .expect("object result");
            match cell {
                Storage::Global(global) => {
                    self.builder()
                        .emit_void(InstKind::StoreGlobal(global, function_object), line);
                }
                Storage::Slot(slot) => {
                    self.builder()
                        .emit_void(InstKind::StoreSlot(slot, function_object), line);
                }
                Storage::Value(_) => unreachable!("function cells are slots or globals"),
            }
        }

        Some((func_id, signature_type_id))
    }

    fn handle_class_def(&mut self, def: &ast::StmtClassDef, span: Span, line: u32) {
        if !self.symbols.at_module_level() {
            self.error_type(span, "class definitions are only supported at module level");
            return;
        }
        if !def.keywords.is_empty() || !def.decorator_list.is_empty() {
            self.error_type(span, "class keywords and decorators are not supported");
            return;
        }
        let class_name = def.name.as_str().to_string();

        // Base class: a single name naming an existing class, or nothing.
        let base_value = match def.bases.as_slice() {
            [] => self.const_null_obj(line),
            [Expr::Name(base)] => match self.symbols.lookup(base.id.as_str()) {
                Some(info) => {
                    let storage = info.storage;
                    self.read_storage(storage, line)
                }
                None => {
                    self.error_unknown_name(self.span_of(base), base.id.as_str());
                    return;
                }
            },
            _ => {
                self.error_type(span, "multiple inheritance is not supported");
                return;
            }
        };

        let capacity = self.const_i32(8, line);
        let key_type = self.const_i32(STRING, line);
        let class_dict = self
            .abi_call("py_create_dict", vec![capacity, key_type], line)
            .expect("object result");
        self.track_temp(class_dict, ObjectSource::Container);

        for stmt in &def.body {
            match stmt {
                Stmt::FunctionDef(method) => {
                    let Some((func_id, signature_type_id)) =
                        self.lower_function_def(method, Some(&class_name))
                    else {
                        continue;
                    };
                    let key = self.const_str(method.name.as_str(), line);
                    let key_object = self
                        .abi_call("py_create_string", vec![key], line)
                        .expect("object result");
                    self.track_temp(key_object, ObjectSource::Literal);
                    let code = self.const_i32(func_id.0 as i32, line);
                    let signature = self.const_i32(signature_type_id, line);
                    let method_object = self
                        .abi_call("py_create_function", vec![code, signature], line)
                        .expect("object result");
                    self.track_temp(method_object, ObjectSource::Literal);
                    self.abi_call(
                        "py_dict_set_item",
                        vec![class_dict, key_object, method_object],
                        line,
                    );
                }
                Stmt::Assign(assign) => {
                    // Class variables: evaluate and store in the class dict.
                    let value = self.lower_expr(&assign.value);
                    for target in &assign.targets {
                        let Expr::Name(attr) = target else {
                            self.error_invalid_assignment(
                                span,
                                "unsupported class attribute target",
                            );
                            continue;
                        };
                        let key = self.const_str(attr.id.as_str(), line);
                        let key_object = self
                            .abi_call("py_create_string", vec![key], line)
                            .expect("object result");
                        self.track_temp(key_object, ObjectSource::Literal);
                        self.abi_call(
                            "py_dict_set_item",
                            vec![class_dict, key_object, value.value],
                            line,
                        );
                    }
                }
                Stmt::Pass(_) => {}
                Stmt::Expr(expr_stmt)
                    if matches!(
                        expr_stmt.value.as_ref(),
                        Expr::Constant(c) if matches!(c.value, ast::Constant::Str(_))
                    ) => {}
                other => {
                    let span = self.span_of(other);
                    self.error_type(span, "unsupported statement in class body");
                }
            }
        }

        let name_value = self.const_str(&class_name, line);
        let class_object = self
            .abi_call(
                "py_create_class",
                vec![name_value, base_value, class_dict],
                line,
            )
            .expect("object result");
        let global = self.module.add_global(&class_name);
        self.builder()
            .emit_void(InstKind::StoreGlobal(global, class_object), line);
        self.symbols.define(
            &class_name,
            VariableInfo {
                storage: Storage::Global(global),
                type_id: CLASS,
            },
        );
    }

    /// Map a type annotation to a type ID; anything unrecognized is `ANY`.
    pub(crate) fn annotation_type(&mut self, annotation: &Expr) -> i32 {
        match annotation {
            Expr::Name(name) => match name.id.as_str() {
                "int" => type_ids::INT,
                "float" => type_ids::FLOAT,
                "bool" => type_ids::BOOL,
                "str" => STRING,
                "list" => type_ids::LIST,
                "dict" => type_ids::DICT,
                "None" => NONE,
                _ => ANY,
            },
            Expr::Constant(c) if matches!(c.value, ast::Constant::None) => NONE,
            Expr::Subscript(subscript) => {
                let base = self.annotation_type(&subscript.value);
                match type_ids::base_of(base) {
                    type_ids::LIST => {
                        let elem = self.annotation_type(&subscript.slice);
                        type_ids::list_of(elem)
                    }
                    type_ids::DICT => {
                        // dict[K, V] arrives as a tuple slice; only the key
                        // type is recorded.
                        match subscript.slice.as_ref() {
                            Expr::Tuple(tuple) => {
                                let key = tuple
                                    .elts
                                    .first()
                                    .map(|k| self.annotation_type(k))
                                    .unwrap_or(ANY);
                                type_ids::dict_of(key)
                            }
                            single => type_ids::dict_of(self.annotation_type(single)),
                        }
                    }
                    _ => ANY,
                }
            }
            _ => ANY,
        }
    }
}

/// Names assigned anywhere in a statement list (loop-carried candidates).
pub(crate) fn assigned_names(stmts: &[Stmt], out: &mut BTreeSet<String>) {
    for stmt in stmts {
        match stmt {
            Stmt::Assign(assign) => {
                for target in &assign.targets {
                    if let Expr::Name(name) = target {
                        out.insert(name.id.as_str().to_string());
                    }
                }
            }
            Stmt::AugAssign(aug) => {
                if let Expr::Name(name) = aug.target.as_ref() {
                    out.insert(name.id.as_str().to_string());
                }
            }
            Stmt::AnnAssign(ann) => {
                if let Expr::Name(name) = ann.target.as_ref() {
                    out.insert(name.id.as_str().to_string());
                }
            }
            Stmt::If(if_stmt) => {
                assigned_names(&if_stmt.body, out);
                assigned_names(&if_stmt.orelse, out);
            }
            Stmt::While(while_stmt) => {
                assigned_names(&while_stmt.body, out);
            }
            Stmt::For(for_stmt) => {
                if let Expr::Name(name) = for_stmt.target.as_ref() {
                    out.insert(name.id.as_str().to_string());
                }
                assigned_names(&for_stmt.body, out);
            }
            _ => {}
        }
    }
}
