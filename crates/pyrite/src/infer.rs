//! Per-expression type derivation.
//!
//! Every expression gets a type ID before it is lowered; results are
//! cached by source byte range so repeated walks (assignment validation,
//! operand preparation, the lowering itself) stay cheap. Inference never
//! fails — anything it cannot pin down is `ANY`, and the registry-driven
//! lowering decides later whether an operation actually applies.

use num_traits::Zero;
use rustpython_parser::ast::{self, Constant, Expr};

use pyrite_runtime::type_ids::{self, ANY, BOOL, FLOAT, FUNC, INT, NONE, STRING};

use crate::lower::LowerCtx;
use crate::registry::TypeOperationRegistry;

/// The common super type used by list literals and branch merges:
/// equal types stay, `ANY` absorbs into the other side, numerics widen
/// `Int→Float`, containers recurse element-wise, everything else is
/// `ANY`.
pub fn common_super_type(a: i32, b: i32) -> i32 {
    if a == b {
        return a;
    }
    if a == ANY {
        return b;
    }
    if b == ANY {
        return a;
    }
    let (base_a, base_b) = (type_ids::base_of(a), type_ids::base_of(b));
    if type_ids::is_numeric(a) && type_ids::is_numeric(b) {
        return if base_a == FLOAT || base_b == FLOAT { FLOAT } else { INT };
    }
    if base_a == type_ids::LIST && base_b == type_ids::LIST {
        let elem = common_super_type(type_ids::list_elem_of(a), type_ids::list_elem_of(b));
        return type_ids::list_of(elem);
    }
    if base_a == type_ids::DICT && base_b == type_ids::DICT {
        let key = common_super_type(type_ids::dict_key_of(a), type_ids::dict_key_of(b));
        return type_ids::dict_of(key);
    }
    ANY
}

impl<'src> LowerCtx<'src> {
    /// The type of an expression, cached by byte range.
    pub fn infer_expr_type(&mut self, expr: &Expr) -> i32 {
        let span = self.span_of(expr);
        let key = (span.start, span.end);
        if let Some(cached) = self.type_cache.get(&key) {
            return *cached;
        }
        let inferred = self.infer_uncached(expr);
        self.type_cache.insert(key, inferred);
        inferred
    }

    fn infer_uncached(&mut self, expr: &Expr) -> i32 {
        match expr {
            Expr::Constant(constant) => match &constant.value {
                Constant::Int(_) => INT,
                Constant::Float(_) => FLOAT,
                Constant::Bool(_) => BOOL,
                Constant::Str(_) => STRING,
                Constant::None => NONE,
                _ => ANY,
            },

            Expr::Name(name) => {
                if let Some(info) = self.symbols.lookup(name.id.as_str()) {
                    info.type_id
                } else if self.symbols.find_function(name.id.as_str()).is_some() {
                    FUNC
                } else {
                    ANY
                }
            }

            Expr::BinOp(binop) => {
                let left = self.infer_expr_type(&binop.left);
                let right = self.infer_expr_type(&binop.right);
                let Some(token) = crate::lower::expr::bin_op_token(&binop.op) else {
                    return ANY;
                };
                let registry = TypeOperationRegistry::instance();
                let resolved = registry
                    .binary_op(token, left, right)
                    .map(|d| d.result_type_id)
                    .or_else(|| {
                        registry
                            .find_operable_path(token, left, right)
                            .and_then(|path| registry.binary_op(token, path.left, path.right))
                            .map(|d| d.result_type_id)
                    });
                match resolved {
                    Some(result) => {
                        self.refine_binop_result(token, left, right, result, &binop.right)
                    }
                    None => ANY,
                }
            }

            Expr::UnaryOp(unary) => {
                let operand = self.infer_expr_type(&unary.operand);
                let token = crate::lower::expr::unary_op_token(&unary.op);
                TypeOperationRegistry::instance()
                    .unary_op(token, operand)
                    .map(|d| d.result_type_id)
                    .unwrap_or(ANY)
            }

            Expr::BoolOp(_) | Expr::Compare(_) => BOOL,

            Expr::Subscript(subscript) => {
                let container = self.infer_expr_type(&subscript.value);
                match type_ids::base_of(container) {
                    type_ids::LIST => type_ids::list_elem_of(container),
                    // Dict values are untracked; only the key type is recorded.
                    type_ids::DICT => ANY,
                    type_ids::STRING => STRING,
                    _ => ANY,
                }
            }

            Expr::Call(call) => self.infer_call_type(call),

            Expr::List(list) => {
                let mut elem = ANY;
                let mut first = true;
                for item in &list.elts {
                    let ty = self.infer_expr_type(item);
                    elem = if first { ty } else { common_super_type(elem, ty) };
                    first = false;
                }
                type_ids::list_of(elem)
            }

            Expr::Dict(dict) => {
                let mut key = ANY;
                let mut first = true;
                for k in dict.keys.iter().flatten() {
                    let ty = self.infer_expr_type(k);
                    key = if first { ty } else { common_super_type(key, ty) };
                    first = false;
                }
                type_ids::dict_of(key)
            }

            Expr::Attribute(_) => ANY,

            _ => ANY,
        }
    }

    fn infer_call_type(&mut self, call: &ast::ExprCall) -> i32 {
        if let Expr::Name(name) = call.func.as_ref() {
            let name = name.id.as_str();
            if let Some(info) = self.symbols.find_function(name) {
                return info.return_type_id;
            }
            return match name {
                "int" | "len" => INT,
                "float" => FLOAT,
                "bool" => BOOL,
                "str" => STRING,
                "print" => NONE,
                _ => ANY,
            };
        }
        ANY
    }

    /// Registry results refined with context the tables cannot express.
    fn refine_binop_result(
        &mut self,
        token: crate::registry::BinOpToken,
        left: i32,
        right: i32,
        registry_result: i32,
        right_expr: &Expr,
    ) -> i32 {
        use crate::registry::BinOpToken::*;
        match token {
            // List concatenation keeps a precise element type when the
            // operands agree, widening to any otherwise.
            Add if type_ids::base_of(left) == type_ids::LIST
                && type_ids::base_of(right) == type_ids::LIST =>
            {
                let elem = if type_ids::list_elem_of(left) == type_ids::list_elem_of(right) {
                    type_ids::list_elem_of(left)
                } else {
                    ANY
                };
                type_ids::list_of(elem)
            }
            // int ** negative-literal-int is a float at runtime.
            Pow if registry_result == INT && negative_int_literal(right_expr) => FLOAT,
            _ => registry_result,
        }
    }

    /// Best-effort return-type analysis for an unannotated function:
    /// infer every `return` expression against a scope holding only the
    /// parameters, then merge. Anything unresolvable stays `ANY`.
    pub fn analyze_return_type(&mut self, body: &[ast::Stmt]) -> i32 {
        let mut result: Option<i32> = None;
        let mut saw_value = false;
        collect_return_types(self, body, &mut result, &mut saw_value);
        match result {
            Some(ty) => ty,
            None if saw_value => ANY,
            None => NONE,
        }
    }
}

fn collect_return_types(
    ctx: &mut LowerCtx<'_>,
    body: &[ast::Stmt],
    result: &mut Option<i32>,
    saw_value: &mut bool,
) {
    for stmt in body {
        match stmt {
            ast::Stmt::Return(ret) => match &ret.value {
                Some(value) => {
                    *saw_value = true;
                    let ty = ctx.infer_expr_type(value);
                    *result = Some(match *result {
                        Some(existing) => common_super_type(existing, ty),
                        None => ty,
                    });
                }
                None => {
                    *result = Some(match *result {
                        Some(existing) => common_super_type(existing, NONE),
                        None => NONE,
                    });
                }
            },
            ast::Stmt::If(if_stmt) => {
                collect_return_types(ctx, &if_stmt.body, result, saw_value);
                collect_return_types(ctx, &if_stmt.orelse, result, saw_value);
            }
            ast::Stmt::While(while_stmt) => {
                collect_return_types(ctx, &while_stmt.body, result, saw_value);
            }
            ast::Stmt::For(for_stmt) => {
                collect_return_types(ctx, &for_stmt.body, result, saw_value);
            }
            _ => {}
        }
    }
}

/// True for `-<int literal>` and negative int constants.
fn negative_int_literal(expr: &Expr) -> bool {
    match expr {
        Expr::UnaryOp(unary) => {
            matches!(unary.op, ast::UnaryOp::USub)
                && matches!(
                    unary.operand.as_ref(),
                    Expr::Constant(c) if matches!(c.value, Constant::Int(_))
                )
        }
        Expr::Constant(c) => match &c.value {
            Constant::Int(v) => v < &num_bigint::BigInt::zero(),
            _ => false,
        },
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyrite_runtime::type_ids::{DICT, LIST};

    #[test]
    fn common_super_type_rules() {
        assert_eq!(common_super_type(INT, INT), INT);
        assert_eq!(common_super_type(INT, FLOAT), FLOAT);
        assert_eq!(common_super_type(BOOL, INT), INT);
        assert_eq!(common_super_type(ANY, STRING), STRING);
        assert_eq!(common_super_type(STRING, ANY), STRING);
        assert_eq!(common_super_type(STRING, INT), ANY);
        assert_eq!(
            common_super_type(type_ids::list_of(INT), type_ids::list_of(FLOAT)),
            type_ids::list_of(FLOAT)
        );
        assert_eq!(
            common_super_type(type_ids::list_of(INT), LIST),
            type_ids::list_of(INT)
        );
        assert_eq!(common_super_type(LIST, DICT), ANY);
    }
}
