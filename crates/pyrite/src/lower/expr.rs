//! Expression lowering.
//!
//! Every handler returns an [`ExprValue`]: the SSA value, the inferred
//! type, and whether the reference is owned. Owned results are registered
//! with the deferred-release tracker under a source tag; borrowed results
//! (variable loads, the `None` singleton) are not. Runtime kernels are
//! null-tolerant, so a failed operation's null sentinel flows through the
//! rest of the statement and surfaces as a non-zero exit.

use rustpython_parser::ast::{self, Constant, Expr};

use pyrite_runtime::type_ids::{self, ANY, BOOL, FLOAT, FUNC, INT, NONE, STRING};

use crate::diagnostic::Span;
use crate::ir::{InstKind, IrType, Terminator, ValueId};
use crate::lower::{ExprValue, LowerCtx, ObjectSource};
use crate::registry::{BinOpToken, TypeOperationRegistry, UnaryOpToken};
use crate::symbols::Storage;

/// Map a parser binary operator to a registry token (`@` has no
/// registered operations).
pub fn bin_op_token(op: &ast::Operator) -> Option<BinOpToken> {
    Some(match op {
        ast::Operator::Add => BinOpToken::Add,
        ast::Operator::Sub => BinOpToken::Sub,
        ast::Operator::Mult => BinOpToken::Mult,
        ast::Operator::Div => BinOpToken::Div,
        ast::Operator::FloorDiv => BinOpToken::FloorDiv,
        ast::Operator::Mod => BinOpToken::Mod,
        ast::Operator::Pow => BinOpToken::Pow,
        ast::Operator::LShift => BinOpToken::LShift,
        ast::Operator::RShift => BinOpToken::RShift,
        ast::Operator::BitAnd => BinOpToken::BitAnd,
        ast::Operator::BitOr => BinOpToken::BitOr,
        ast::Operator::BitXor => BinOpToken::BitXor,
        ast::Operator::MatMult => return None,
    })
}

/// Map a parser comparison to a registry token. `is`/`is not` fold to
/// equality (the only identity the surface can observe is `None`'s);
/// membership tests have no registered operations.
pub fn cmp_op_token(op: &ast::CmpOp) -> Option<BinOpToken> {
    Some(match op {
        ast::CmpOp::Eq | ast::CmpOp::Is => BinOpToken::Eq,
        ast::CmpOp::NotEq | ast::CmpOp::IsNot => BinOpToken::NotEq,
        ast::CmpOp::Lt => BinOpToken::Lt,
        ast::CmpOp::LtE => BinOpToken::LtE,
        ast::CmpOp::Gt => BinOpToken::Gt,
        ast::CmpOp::GtE => BinOpToken::GtE,
        ast::CmpOp::In | ast::CmpOp::NotIn => return None,
    })
}

pub fn unary_op_token(op: &ast::UnaryOp) -> UnaryOpToken {
    match op {
        ast::UnaryOp::USub => UnaryOpToken::Neg,
        ast::UnaryOp::UAdd => UnaryOpToken::Pos,
        ast::UnaryOp::Not => UnaryOpToken::Not,
        ast::UnaryOp::Invert => UnaryOpToken::Invert,
    }
}

impl<'src> LowerCtx<'src> {
    /// Lower one expression to an SSA value.
    pub fn lower_expr(&mut self, expr: &Expr) -> ExprValue {
        match expr {
            Expr::Constant(constant) => self.lower_constant(constant),
            Expr::Name(name) => self.lower_name(name),
            Expr::BinOp(binop) => self.lower_binop(expr, binop),
            Expr::Compare(compare) => self.lower_compare(compare),
            Expr::BoolOp(boolop) => self.lower_boolop(boolop),
            Expr::UnaryOp(unary) => self.lower_unary(unary),
            Expr::Call(call) => self.lower_call(call),
            Expr::List(list) => self.lower_list(expr, list),
            Expr::Dict(dict) => self.lower_dict(expr, dict),
            Expr::Subscript(subscript) => self.lower_subscript(expr, subscript),
            Expr::Attribute(attribute) => self.lower_attribute(attribute),
            other => {
                let span = self.span_of(other);
                self.error_type(span, "unsupported expression kind");
                self.null_result(span)
            }
        }
    }

    /// A null object standing in for an expression that failed to lower;
    /// keeps the walk going so further errors still surface.
    fn null_result(&mut self, span: Span) -> ExprValue {
        let line = self.line(span);
        ExprValue {
            value: self.const_null_obj(line),
            type_id: ANY,
            owned: false,
        }
    }

    // -----------------------------------------------------------------------
    // Literals and names
    // -----------------------------------------------------------------------

    /// Numeric literals carry their original textual form to the runtime
    /// constructors, so host float width never truncates them.
    fn lower_constant(&mut self, constant: &ast::ExprConstant) -> ExprValue {
        let span = self.span_of(constant);
        let line = self.line(span);
        match &constant.value {
            Constant::Int(value) => {
                let text = value.to_string();
                let text_value = self.const_str(&text, line);
                let base = self.const_i32(10, line);
                let result = self
                    .abi_call("py_create_int_from_string", vec![text_value, base], line)
                    .expect("object result");
                self.track_temp(result, ObjectSource::Literal);
                ExprValue {
                    value: result,
                    type_id: INT,
                    owned: true,
                }
            }
            Constant::Float(fallback) => {
                let text = {
                    let slice = self.source_text(span).trim();
                    if slice.is_empty() {
                        format!("{:?}", fallback)
                    } else {
                        slice.to_string()
                    }
                };
                let text_value = self.const_str(&text, line);
                let base = self.const_i32(10, line);
                let precision =
                    self.const_i32(pyrite_runtime::DEFAULT_PRECISION_BITS as i32, line);
                let result = self
                    .abi_call(
                        "py_create_double_from_string",
                        vec![text_value, base, precision],
                        line,
                    )
                    .expect("object result");
                self.track_temp(result, ObjectSource::Literal);
                ExprValue {
                    value: result,
                    type_id: FLOAT,
                    owned: true,
                }
            }
            Constant::Bool(value) => {
                let flag = self.const_bool(*value, line);
                let result = self
                    .abi_call("py_create_bool", vec![flag], line)
                    .expect("object result");
                self.track_temp(result, ObjectSource::Literal);
                ExprValue {
                    value: result,
                    type_id: BOOL,
                    owned: true,
                }
            }
            Constant::Str(text) => {
                let text_value = self.const_str(text, line);
                let result = self
                    .abi_call("py_create_string", vec![text_value], line)
                    .expect("object result");
                self.track_temp(result, ObjectSource::Literal);
                ExprValue {
                    value: result,
                    type_id: STRING,
                    owned: true,
                }
            }
            Constant::None => {
                let result = self.abi_call("py_get_none", vec![], line).expect("object result");
                ExprValue {
                    value: result,
                    type_id: NONE,
                    owned: false,
                }
            }
            _ => {
                self.error_type(span, "unsupported literal kind");
                self.null_result(span)
            }
        }
    }

    fn lower_name(&mut self, name: &ast::ExprName) -> ExprValue {
        let span = self.span_of(name);
        let line = self.line(span);
        let ident = name.id.as_str();
        if let Some(info) = self.symbols.lookup(ident) {
            let (storage, type_id) = (info.storage, info.type_id);
            let value = self.read_storage(storage, line);
            return ExprValue {
                value,
                type_id,
                owned: false,
            };
        }
        // Reading a function name binds to its module-level object cell.
        if let Some(info) = self.symbols.find_function(ident) {
            let cell = info.cell;
            let value = self.read_storage(cell, line);
            return ExprValue {
                value,
                type_id: FUNC,
                owned: false,
            };
        }
        self.error_unknown_name(span, ident);
        self.null_result(span)
    }

    // -----------------------------------------------------------------------
    // Operators
    // -----------------------------------------------------------------------

    fn lower_binop(&mut self, whole: &Expr, binop: &ast::ExprBinOp) -> ExprValue {
        let span = self.span_of(binop);
        let line = self.line(span);
        let result_type = self.infer_expr_type(whole);

        let Some(token) = bin_op_token(&binop.op) else {
            self.error_type(span, "operator has no registered operations");
            return self.null_result(span);
        };
        let left_type = self.infer_expr_type(&binop.left);
        let right_type = self.infer_expr_type(&binop.right);
        let left = self.lower_expr(&binop.left);
        let right = self.lower_expr(&binop.right);

        self.emit_operator(token, left, right, left_type, right_type, result_type, span, line)
    }

    fn lower_compare(&mut self, compare: &ast::ExprCompare) -> ExprValue {
        let span = self.span_of(compare);
        let line = self.line(span);
        if compare.ops.len() != 1 || compare.comparators.len() != 1 {
            self.error_type(span, "chained comparisons are not supported");
            return self.null_result(span);
        }
        let Some(token) = cmp_op_token(&compare.ops[0]) else {
            self.error_type(span, "membership tests are not supported");
            return self.null_result(span);
        };
        let left_type = self.infer_expr_type(&compare.left);
        let right_type = self.infer_expr_type(&compare.comparators[0]);
        let left = self.lower_expr(&compare.left);
        let right = self.lower_expr(&compare.comparators[0]);

        self.emit_operator(token, left, right, left_type, right_type, BOOL, span, line)
    }

    /// Shared binary-operator emission: resolve the descriptor (walking
    /// the operable path when there is no direct hit), emit the
    /// conversions the path requires, then the runtime call.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn emit_operator(
        &mut self,
        token: BinOpToken,
        left: ExprValue,
        right: ExprValue,
        left_type: i32,
        right_type: i32,
        result_type: i32,
        span: Span,
        line: u32,
    ) -> ExprValue {
        let registry = TypeOperationRegistry::instance();
        let (descriptor, targets) = match registry.binary_op(token, left_type, right_type) {
            Some(desc) => (Some(desc.clone()), None),
            None => match registry.find_operable_path(token, left_type, right_type) {
                Some(path) => (
                    registry.binary_op(token, path.left, path.right).cloned(),
                    Some(path),
                ),
                None => (None, None),
            },
        };
        let Some(descriptor) = descriptor else {
            self.error_type(
                span,
                format!(
                    "unsupported operand type(s) for {}: '{}' and '{}'",
                    token.symbol(),
                    type_ids::name_of(left_type),
                    type_ids::name_of(right_type)
                ),
            );
            let key = self.const_str("TypeError", line);
            let line_value = self.const_i32(line as i32, line);
            self.abi_call("py_runtime_error", vec![key, line_value], line);
            return self.null_result(span);
        };

        let (left, right) = match targets {
            Some(path) => (
                self.convert_value(left, path.left, line),
                self.convert_value(right, path.right, line),
            ),
            None => (left, right),
        };

        let mut args = vec![left.value, right.value];
        if let Some(code) = descriptor.compare_code {
            args.push(self.const_i32(code, line));
        }
        let result = self
            .abi_call(descriptor.runtime_function, args, line)
            .expect("object result");
        self.track_temp(result, ObjectSource::BinaryOp);
        ExprValue {
            value: result,
            type_id: result_type,
            owned: true,
        }
    }

    fn lower_unary(&mut self, unary: &ast::ExprUnaryOp) -> ExprValue {
        let span = self.span_of(unary);
        let line = self.line(span);
        let token = unary_op_token(&unary.op);
        let operand_type = self.infer_expr_type(&unary.operand);
        let operand = self.lower_expr(&unary.operand);

        let Some(descriptor) = TypeOperationRegistry::instance()
            .unary_op(token, operand_type)
            .cloned()
        else {
            self.error_type(
                span,
                format!(
                    "bad operand type for unary {}: '{}'",
                    token.symbol(),
                    type_ids::name_of(operand_type)
                ),
            );
            let key = self.const_str("TypeError", line);
            let line_value = self.const_i32(line as i32, line);
            self.abi_call("py_runtime_error", vec![key, line_value], line);
            return self.null_result(span);
        };

        match descriptor.runtime_function {
            Some(symbol) => {
                let result = self
                    .abi_call(symbol, vec![operand.value], line)
                    .expect("object result");
                self.track_temp(result, ObjectSource::UnaryOp);
                ExprValue {
                    value: result,
                    type_id: descriptor.result_type_id,
                    owned: true,
                }
            }
            // `+x` passes the operand through.
            None => ExprValue {
                value: operand.value,
                type_id: descriptor.result_type_id,
                owned: operand.owned,
            },
        }
    }

    /// Short-circuit `and`/`or`, folded left to right. Each operand's
    /// temporaries are released in its own block right after the
    /// truthiness test, because later operands may never execute.
    fn lower_boolop(&mut self, boolop: &ast::ExprBoolOp) -> ExprValue {
        let line = self.line(self.span_of(boolop));
        let is_and = matches!(boolop.op, ast::BoolOp::And);
        let merge = self.builder().create_block("bool.merge");
        let mut incomings: Vec<(crate::ir::BlockId, ValueId)> = Vec::new();

        let last = boolop.values.len().saturating_sub(1);
        for (i, operand) in boolop.values.iter().enumerate() {
            self.push_temp_frame();
            let value = self.lower_expr(operand);
            let flag = self.to_machine_bool(value, line);
            self.cleanup_temps(line);
            self.pop_temp_frame();

            let current = self.builder_ref().current_block().expect("active block");
            if i == last {
                incomings.push((current, flag));
                self.builder().terminate(Terminator::Br(merge));
            } else {
                let next = self.builder().create_block("bool.next");
                incomings.push((current, flag));
                let (then_block, else_block) = if is_and { (next, merge) } else { (merge, next) };
                self.builder().terminate(Terminator::CondBr {
                    cond: flag,
                    then_block,
                    else_block,
                });
                self.builder().switch_to(next);
            }
        }

        self.builder().switch_to(merge);
        let phi = self.builder().add_phi(merge, "bool", IrType::I1);
        for (block, value) in incomings {
            self.builder().add_phi_incoming(merge, phi, block, value);
        }
        let result = self
            .abi_call("py_create_bool", vec![phi], line)
            .expect("object result");
        self.track_temp(result, ObjectSource::BinaryOp);
        ExprValue {
            value: result,
            type_id: BOOL,
            owned: true,
        }
    }

    // -----------------------------------------------------------------------
    // Calls
    // -----------------------------------------------------------------------

    fn lower_call(&mut self, call: &ast::ExprCall) -> ExprValue {
        let span = self.span_of(call);
        let line = self.line(span);
        if !call.keywords.is_empty() {
            self.error_type(span, "keyword arguments are not supported");
            return self.null_result(span);
        }

        if let Expr::Name(name) = call.func.as_ref() {
            let ident = name.id.as_str().to_string();
            // Known function ASTs get direct native calls.
            if let Some(info) = self.symbols.find_function(&ident).cloned() {
                return self.lower_direct_call(call, &info, span, line);
            }
            if self.symbols.lookup(&ident).is_none() {
                return self.lower_builtin_call(call, &ident, span, line);
            }
        }

        // Anything else goes through the runtime dispatcher.
        self.lower_indirect_call(call, line)
    }

    fn lower_direct_call(
        &mut self,
        call: &ast::ExprCall,
        info: &crate::symbols::FunctionInfo,
        span: Span,
        line: u32,
    ) -> ExprValue {
        if call.args.len() != info.param_types.len() {
            self.error_type(
                span,
                format!(
                    "function takes {} argument(s), {} given",
                    info.param_types.len(),
                    call.args.len()
                ),
            );
            return self.null_result(span);
        }
        let mut args = Vec::with_capacity(call.args.len());
        for (arg, &expected) in call.args.iter().zip(&info.param_types) {
            let actual = self.infer_expr_type(arg);
            let value = self.lower_expr(arg);
            let prepared = self.prepare_argument(value, actual, expected, line);
            args.push(prepared.value);
        }
        let result = self.direct_call(info.func_id, args, line);
        self.track_temp(result, ObjectSource::FunctionReturn);
        ExprValue {
            value: result,
            type_id: info.return_type_id,
            owned: true,
        }
    }

    fn lower_builtin_call(
        &mut self,
        call: &ast::ExprCall,
        name: &str,
        span: Span,
        line: u32,
    ) -> ExprValue {
        let conversion_target = match name {
            "int" => Some(INT),
            "float" => Some(FLOAT),
            "bool" => Some(BOOL),
            "str" => Some(STRING),
            _ => None,
        };
        if let Some(target) = conversion_target {
            if call.args.len() != 1 {
                self.error_type(span, format!("{}() takes exactly one argument", name));
                return self.null_result(span);
            }
            let value = self.lower_expr(&call.args[0]);
            let target_value = self.const_i32(target, line);
            let result = self
                .abi_call("py_smart_convert", vec![value.value, target_value], line)
                .expect("object result");
            self.track_temp(result, ObjectSource::Conversion);
            return ExprValue {
                value: result,
                type_id: target,
                owned: true,
            };
        }
        match name {
            "print" => {
                if call.args.len() != 1 {
                    self.error_type(span, "print() takes exactly one argument");
                    return self.null_result(span);
                }
                let value = self.lower_expr(&call.args[0]);
                self.abi_call("py_print_object", vec![value.value], line);
                let none = self.abi_call("py_get_none", vec![], line).expect("object result");
                ExprValue {
                    value: none,
                    type_id: NONE,
                    owned: false,
                }
            }
            "len" => {
                if call.args.len() != 1 {
                    self.error_type(span, "len() takes exactly one argument");
                    return self.null_result(span);
                }
                let value = self.lower_expr(&call.args[0]);
                let machine = self
                    .abi_call("py_object_len", vec![value.value], line)
                    .expect("i32 result");
                let result = self
                    .abi_call("py_create_int", vec![machine], line)
                    .expect("object result");
                self.track_temp(result, ObjectSource::FunctionReturn);
                ExprValue {
                    value: result,
                    type_id: INT,
                    owned: true,
                }
            }
            _ => {
                self.error_unknown_name(span, name);
                self.null_result(span)
            }
        }
    }

    fn lower_indirect_call(&mut self, call: &ast::ExprCall, line: u32) -> ExprValue {
        // Method call: the receiver becomes the first argument.
        let (callable, receiver) = match call.func.as_ref() {
            Expr::Attribute(attribute) => {
                let object = self.lower_expr(&attribute.value);
                let name_value = self.const_str(attribute.attr.as_str(), line);
                let bound = self
                    .abi_call("py_object_getattr", vec![object.value, name_value], line)
                    .expect("object result");
                self.track_temp(bound, ObjectSource::Attribute);
                (
                    ExprValue {
                        value: bound,
                        type_id: ANY,
                        owned: true,
                    },
                    Some(object),
                )
            }
            other => (self.lower_expr(other), None),
        };

        let argc = call.args.len() + usize::from(receiver.is_some());
        let argc_value = self.const_i32(argc as i32, line);
        let mut args = vec![callable.value, argc_value];
        if let Some(receiver) = receiver {
            args.push(receiver.value);
        }
        for arg in &call.args {
            let value = self.lower_expr(arg);
            args.push(value.value);
        }
        let result = self
            .abi_call("py_call_function", args, line)
            .expect("object result");
        self.track_temp(result, ObjectSource::FunctionReturn);
        ExprValue {
            value: result,
            type_id: ANY,
            owned: true,
        }
    }

    // -----------------------------------------------------------------------
    // Containers and attributes
    // -----------------------------------------------------------------------

    fn lower_list(&mut self, whole: &Expr, list: &ast::ExprList) -> ExprValue {
        let span = self.span_of(list);
        let line = self.line(span);
        let list_type = self.infer_expr_type(whole);
        let elem_type = type_ids::list_elem_of(list_type);

        let capacity = self.const_i32(list.elts.len() as i32, line);
        let elem_type_value = self.const_i32(elem_type, line);
        let result = self
            .abi_call("py_create_list", vec![capacity, elem_type_value], line)
            .expect("object result");
        self.track_temp(result, ObjectSource::Container);

        for element in &list.elts {
            let value = self.lower_expr(element);
            self.abi_call("py_list_append", vec![result, value.value], line);
        }
        ExprValue {
            value: result,
            type_id: list_type,
            owned: true,
        }
    }

    fn lower_dict(&mut self, whole: &Expr, dict: &ast::ExprDict) -> ExprValue {
        let span = self.span_of(dict);
        let line = self.line(span);
        let dict_type = self.infer_expr_type(whole);
        let key_type = type_ids::dict_key_of(dict_type);

        let capacity = self.const_i32(dict.keys.len().max(8) as i32, line);
        let key_type_value = self.const_i32(key_type, line);
        let result = self
            .abi_call("py_create_dict", vec![capacity, key_type_value], line)
            .expect("object result");
        self.track_temp(result, ObjectSource::Container);

        for (key, value) in dict.keys.iter().zip(&dict.values) {
            let Some(key) = key else {
                self.error_type(span, "dict unpacking is not supported");
                continue;
            };
            let key_value = self.lower_expr(key);
            let value_value = self.lower_expr(value);
            self.abi_call(
                "py_dict_set_item",
                vec![result, key_value.value, value_value.value],
                line,
            );
        }
        ExprValue {
            value: result,
            type_id: dict_type,
            owned: true,
        }
    }

    fn lower_subscript(&mut self, whole: &Expr, subscript: &ast::ExprSubscript) -> ExprValue {
        let span = self.span_of(subscript);
        let line = self.line(span);
        let result_type = self.infer_expr_type(whole);
        let container_type = self.infer_expr_type(&subscript.value);
        let container = self.lower_expr(&subscript.value);

        let index_type = self.infer_expr_type(&subscript.slice);
        let index = self.lower_expr(&subscript.slice);
        let index = self.prepare_index(index, index_type, container_type, line);

        let result = self
            .abi_call("py_object_index", vec![container.value, index.value], line)
            .expect("object result");
        self.track_temp(result, ObjectSource::IndexAccess);
        ExprValue {
            value: result,
            type_id: result_type,
            owned: true,
        }
    }

    fn lower_attribute(&mut self, attribute: &ast::ExprAttribute) -> ExprValue {
        let line = self.line(self.span_of(attribute));
        let object = self.lower_expr(&attribute.value);
        let name_value = self.const_str(attribute.attr.as_str(), line);
        let result = self
            .abi_call("py_object_getattr", vec![object.value, name_value], line)
            .expect("object result");
        self.track_temp(result, ObjectSource::Attribute);
        ExprValue {
            value: result,
            type_id: ANY,
            owned: true,
        }
    }

    // -----------------------------------------------------------------------
    // Preparation helpers
    // -----------------------------------------------------------------------

    /// Normalize an object value to a machine boolean.
    pub fn to_machine_bool(&mut self, value: ExprValue, line: u32) -> ValueId {
        self.abi_call("py_object_to_bool", vec![value.value], line)
            .expect("i1 result")
    }

    /// Insert a `py_smart_convert` when a value's category differs from
    /// the target category. Same-base and `ANY` targets pass through.
    pub fn convert_value(&mut self, value: ExprValue, target: i32, line: u32) -> ExprValue {
        let target_base = type_ids::base_of(target);
        if target_base == ANY || type_ids::base_of(value.type_id) == target_base {
            return value;
        }
        let target_value = self.const_i32(target, line);
        let converted = self
            .abi_call("py_smart_convert", vec![value.value, target_value], line)
            .expect("object result");
        self.track_temp(converted, ObjectSource::Conversion);
        ExprValue {
            value: converted,
            type_id: target,
            owned: true,
        }
    }

    /// Argument preparation for calls: convert when the declared type is
    /// concrete and the actual type differs.
    pub fn prepare_argument(
        &mut self,
        value: ExprValue,
        actual: i32,
        expected: i32,
        line: u32,
    ) -> ExprValue {
        if expected == ANY || type_ids::base_of(actual) == type_ids::base_of(expected) {
            return value;
        }
        self.convert_value(value, expected, line)
    }

    /// Dict subscripts convert the key to the recorded key type; list and
    /// string subscripts pass the index through untouched.
    fn prepare_index(
        &mut self,
        index: ExprValue,
        index_type: i32,
        container_type: i32,
        line: u32,
    ) -> ExprValue {
        if type_ids::base_of(container_type) == type_ids::DICT {
            let key_type = type_ids::dict_key_of(container_type);
            if key_type != ANY && type_ids::base_of(index_type) != type_ids::base_of(key_type) {
                return self.convert_value(index, key_type, line);
            }
        }
        index
    }

    /// Null test yielding an i1 (used by `for` loops on the iterator
    /// protocol).
    pub fn is_null(&mut self, value: ValueId, line: u32) -> ValueId {
        self.builder().emit(InstKind::IsNull(value), IrType::I1, line)
    }

    /// The storage-kind a fresh definition should take here: global cells
    /// at module level, stack slots inside functions.
    pub fn fresh_storage(&mut self, name: &str) -> Storage {
        if self.symbols.at_module_level() {
            Storage::Global(self.module.add_global(name))
        } else {
            Storage::Slot(self.builder().add_slot(name))
        }
    }
}
