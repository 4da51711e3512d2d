//! The type-operation registry: binary/unary operation descriptors,
//! implicit conversion descriptors, and the operable-path search.
//!
//! The registry is the single source of truth for "does this operator
//! apply to these operand categories, what does it return, and which
//! runtime symbol implements it". The inferencer reads `result_type_id`
//! off the resolved descriptor; the lowerer reads `runtime_function` and
//! emits the conversions the path search picked.
//!
//! Tables are keyed by *base* type IDs; parameterized operands fold to
//! their base before lookup. The registry is immutable after
//! construction and process-wide.

use std::collections::HashMap;
use std::sync::OnceLock;

use pyrite_runtime::type_ids::{self, ANY, BOOL, DICT, FLOAT, FUNC, INT, LIST, NONE, STRING};

/// Binary operator tokens as the parser produces them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOpToken {
    Add,
    Sub,
    Mult,
    Div,
    FloorDiv,
    Mod,
    Pow,
    LShift,
    RShift,
    BitAnd,
    BitOr,
    BitXor,
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
}

impl BinOpToken {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOpToken::Eq
                | BinOpToken::NotEq
                | BinOpToken::Lt
                | BinOpToken::LtE
                | BinOpToken::Gt
                | BinOpToken::GtE
        )
    }

    /// The comparison encoding shared with `py_object_compare`.
    pub fn compare_code(self) -> Option<i32> {
        Some(match self {
            BinOpToken::Eq => pyrite_runtime::CMP_EQ,
            BinOpToken::NotEq => pyrite_runtime::CMP_NE,
            BinOpToken::Lt => pyrite_runtime::CMP_LT,
            BinOpToken::LtE => pyrite_runtime::CMP_LE,
            BinOpToken::Gt => pyrite_runtime::CMP_GT,
            BinOpToken::GtE => pyrite_runtime::CMP_GE,
            _ => return None,
        })
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinOpToken::Add => "+",
            BinOpToken::Sub => "-",
            BinOpToken::Mult => "*",
            BinOpToken::Div => "/",
            BinOpToken::FloorDiv => "//",
            BinOpToken::Mod => "%",
            BinOpToken::Pow => "**",
            BinOpToken::LShift => "<<",
            BinOpToken::RShift => ">>",
            BinOpToken::BitAnd => "&",
            BinOpToken::BitOr => "|",
            BinOpToken::BitXor => "^",
            BinOpToken::Eq => "==",
            BinOpToken::NotEq => "!=",
            BinOpToken::Lt => "<",
            BinOpToken::LtE => "<=",
            BinOpToken::Gt => ">",
            BinOpToken::GtE => ">=",
        }
    }
}

/// Unary operator tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOpToken {
    /// `-x`
    Neg,
    /// `+x`
    Pos,
    /// `not x`
    Not,
    /// `~x`
    Invert,
}

impl UnaryOpToken {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOpToken::Neg => "-",
            UnaryOpToken::Pos => "+",
            UnaryOpToken::Not => "not",
            UnaryOpToken::Invert => "~",
        }
    }
}

/// A registered binary operation.
#[derive(Debug, Clone)]
pub struct BinaryOpDescriptor {
    pub result_type_id: i32,
    /// Runtime ABI symbol implementing the operation.
    pub runtime_function: &'static str,
    /// For comparisons, the operator code passed as the third argument.
    pub compare_code: Option<i32>,
}

/// A registered unary operation.
#[derive(Debug, Clone)]
pub struct UnaryOpDescriptor {
    pub result_type_id: i32,
    /// Runtime ABI symbol, or `None` for identity (`+x` on numerics).
    pub runtime_function: Option<&'static str>,
}

/// An implicit conversion edge in the operable-path graph.
#[derive(Debug, Clone)]
pub struct ConversionDescriptor {
    pub cost: u32,
    /// All implicit conversions funnel through `py_smart_convert`.
    pub runtime_function: &'static str,
}

/// The pair of operand targets the path search settled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperablePath {
    pub left: i32,
    pub right: i32,
}

pub struct TypeOperationRegistry {
    binary: HashMap<(BinOpToken, i32, i32), BinaryOpDescriptor>,
    unary: HashMap<(UnaryOpToken, i32), UnaryOpDescriptor>,
    conversions: HashMap<(i32, i32), ConversionDescriptor>,
}

static REGISTRY: OnceLock<TypeOperationRegistry> = OnceLock::new();

impl TypeOperationRegistry {
    /// The process-wide registry instance.
    pub fn instance() -> &'static TypeOperationRegistry {
        REGISTRY.get_or_init(TypeOperationRegistry::build)
    }

    /// Direct descriptor lookup (operands folded to their bases).
    pub fn binary_op(&self, op: BinOpToken, left: i32, right: i32) -> Option<&BinaryOpDescriptor> {
        self.binary
            .get(&(op, type_ids::base_of(left), type_ids::base_of(right)))
    }

    pub fn unary_op(&self, op: UnaryOpToken, operand: i32) -> Option<&UnaryOpDescriptor> {
        self.unary.get(&(op, type_ids::base_of(operand)))
    }

    pub fn conversion(&self, from: i32, to: i32) -> Option<&ConversionDescriptor> {
        self.conversions
            .get(&(type_ids::base_of(from), type_ids::base_of(to)))
    }

    /// Minimum-cost pair `(left', right')` reachable through conversion
    /// edges such that `op` is registered on it.
    ///
    /// Cost is the number of edges; ties prefer paths built from
    /// `Bool→Int`, then `Int→Float`, then `→Any` edges. Returns `None`
    /// when no registered combination is reachable.
    pub fn find_operable_path(&self, op: BinOpToken, left: i32, right: i32) -> Option<OperablePath> {
        let start = (type_ids::base_of(left), type_ids::base_of(right));
        // Dijkstra over (edge_count, preference_sum); the state space is
        // the handful of base IDs squared.
        let mut best: HashMap<(i32, i32), (u32, u32)> = HashMap::new();
        let mut queue: Vec<((u32, u32), (i32, i32))> = vec![((0, 0), start)];
        best.insert(start, (0, 0));
        let mut found: Option<((u32, u32), (i32, i32))> = None;

        while let Some(idx) = queue
            .iter()
            .enumerate()
            .min_by_key(|(_, (cost, state))| (*cost, *state))
            .map(|(i, _)| i)
        {
            let (cost, state) = queue.swap_remove(idx);
            if best.get(&state).map(|c| *c < cost).unwrap_or(false) {
                continue;
            }
            if self.binary.contains_key(&(op, state.0, state.1)) {
                match found {
                    Some((found_cost, _)) if found_cost <= cost => {}
                    _ => found = Some((cost, state)),
                }
                // The first settled registered state is optimal.
                break;
            }
            for (&(from, to), conv) in &self.conversions {
                let pref = edge_preference(from, to);
                if state.0 == from {
                    let next = (to, state.1);
                    let next_cost = (cost.0 + conv.cost, cost.1 + pref);
                    if best.get(&next).map(|c| next_cost < *c).unwrap_or(true) {
                        best.insert(next, next_cost);
                        queue.push((next_cost, next));
                    }
                }
                if state.1 == from {
                    let next = (state.0, to);
                    let next_cost = (cost.0 + conv.cost, cost.1 + pref);
                    if best.get(&next).map(|c| next_cost < *c).unwrap_or(true) {
                        best.insert(next, next_cost);
                        queue.push((next_cost, next));
                    }
                }
            }
        }

        found.map(|(_, (l, r))| OperablePath { left: l, right: r })
    }

    // -----------------------------------------------------------------------
    // Table construction
    // -----------------------------------------------------------------------

    fn build() -> TypeOperationRegistry {
        let mut registry = TypeOperationRegistry {
            binary: HashMap::new(),
            unary: HashMap::new(),
            conversions: HashMap::new(),
        };
        registry.register_numeric_ops();
        registry.register_string_ops();
        registry.register_container_ops();
        registry.register_equality_fallbacks();
        registry.register_unary_ops();
        registry.register_conversions();
        tracing::debug!(
            binary = registry.binary.len(),
            unary = registry.unary.len(),
            conversions = registry.conversions.len(),
            "operation registry built"
        );
        registry
    }

    fn add_binary(&mut self, op: BinOpToken, left: i32, right: i32, result: i32, symbol: &'static str) {
        self.binary.insert(
            (op, left, right),
            BinaryOpDescriptor {
                result_type_id: result,
                runtime_function: symbol,
                compare_code: op.compare_code(),
            },
        );
    }

    fn add_comparisons(&mut self, left: i32, right: i32) {
        for op in [
            BinOpToken::Eq,
            BinOpToken::NotEq,
            BinOpToken::Lt,
            BinOpToken::LtE,
            BinOpToken::Gt,
            BinOpToken::GtE,
        ] {
            self.add_binary(op, left, right, BOOL, "py_object_compare");
        }
    }

    fn register_numeric_ops(&mut self) {
        let numeric = [INT, FLOAT, BOOL];
        for &l in &numeric {
            for &r in &numeric {
                let widened = if l == FLOAT || r == FLOAT { FLOAT } else { INT };
                self.add_binary(BinOpToken::Add, l, r, widened, "py_object_add");
                self.add_binary(BinOpToken::Sub, l, r, widened, "py_object_subtract");
                self.add_binary(BinOpToken::Mult, l, r, widened, "py_object_multiply");
                self.add_binary(BinOpToken::Div, l, r, FLOAT, "py_object_divide");
                self.add_binary(BinOpToken::FloorDiv, l, r, widened, "py_object_floor_divide");
                self.add_binary(BinOpToken::Mod, l, r, widened, "py_object_modulo");
                self.add_binary(BinOpToken::Pow, l, r, widened, "py_object_power");
                self.add_comparisons(l, r);
            }
        }
        // Bitwise family stays integral.
        let integral = [INT, BOOL];
        for &l in &integral {
            for &r in &integral {
                self.add_binary(BinOpToken::BitAnd, l, r, INT, "py_object_and");
                self.add_binary(BinOpToken::BitOr, l, r, INT, "py_object_or");
                self.add_binary(BinOpToken::BitXor, l, r, INT, "py_object_xor");
                self.add_binary(BinOpToken::LShift, l, r, INT, "py_object_lshift");
                self.add_binary(BinOpToken::RShift, l, r, INT, "py_object_rshift");
            }
        }
    }

    fn register_string_ops(&mut self) {
        self.add_binary(BinOpToken::Add, STRING, STRING, STRING, "py_object_add");
        self.add_binary(BinOpToken::Mult, STRING, INT, STRING, "py_object_multiply");
        self.add_binary(BinOpToken::Mult, INT, STRING, STRING, "py_object_multiply");
        self.add_comparisons(STRING, STRING);
    }

    fn register_container_ops(&mut self) {
        self.add_binary(BinOpToken::Add, LIST, LIST, LIST, "py_object_add");
        self.add_binary(BinOpToken::Mult, LIST, INT, LIST, "py_object_multiply");
        self.add_binary(BinOpToken::Mult, INT, LIST, LIST, "py_object_multiply");
        for op in [BinOpToken::Eq, BinOpToken::NotEq] {
            self.add_binary(op, LIST, LIST, BOOL, "py_object_compare");
            self.add_binary(op, DICT, DICT, BOOL, "py_object_compare");
        }
    }

    fn register_equality_fallbacks(&mut self) {
        for op in [BinOpToken::Eq, BinOpToken::NotEq] {
            self.add_binary(op, NONE, NONE, BOOL, "py_object_compare");
            self.add_binary(op, ANY, ANY, BOOL, "py_object_compare");
        }
    }

    fn register_unary_ops(&mut self) {
        for (operand, result) in [(INT, INT), (FLOAT, FLOAT), (BOOL, INT), (ANY, ANY)] {
            self.unary.insert(
                (UnaryOpToken::Neg, operand),
                UnaryOpDescriptor {
                    result_type_id: result,
                    runtime_function: Some("py_object_negate"),
                },
            );
            self.unary.insert(
                (UnaryOpToken::Pos, operand),
                UnaryOpDescriptor {
                    result_type_id: result,
                    runtime_function: None,
                },
            );
        }
        for operand in [NONE, INT, FLOAT, BOOL, STRING, LIST, DICT, FUNC, ANY] {
            self.unary.insert(
                (UnaryOpToken::Not, operand),
                UnaryOpDescriptor {
                    result_type_id: BOOL,
                    runtime_function: Some("py_object_not"),
                },
            );
        }
        for operand in [INT, BOOL, ANY] {
            self.unary.insert(
                (UnaryOpToken::Invert, operand),
                UnaryOpDescriptor {
                    result_type_id: INT,
                    runtime_function: Some("py_object_bitnot"),
                },
            );
        }
    }

    fn register_conversions(&mut self) {
        let mut add = |from: i32, to: i32| {
            self.conversions.insert(
                (from, to),
                ConversionDescriptor {
                    cost: 1,
                    runtime_function: "py_smart_convert",
                },
            );
        };
        add(BOOL, INT);
        add(INT, FLOAT);
        add(INT, BOOL);
        add(FLOAT, INT);
        for t in [NONE, INT, FLOAT, BOOL, STRING, LIST, DICT, FUNC] {
            add(t, ANY);
        }
        for t in [INT, FLOAT, BOOL, STRING, LIST, DICT] {
            add(ANY, t);
        }
    }
}

/// Tie-break ranking: promoting `Bool→Int` beats `Int→Float` beats
/// widening to `Any`; narrowing from `Any` prefers the numeric ladder,
/// and everything else comes last.
fn edge_preference(from: i32, to: i32) -> u32 {
    match (from, to) {
        (BOOL, INT) => 0,
        (INT, FLOAT) => 1,
        (_, ANY) => 2,
        (ANY, INT) => 3,
        (ANY, FLOAT) => 4,
        (ANY, BOOL) => 5,
        _ => 6,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn registry() -> &'static TypeOperationRegistry {
        TypeOperationRegistry::instance()
    }

    #[test]
    fn numeric_closure_for_add_sub_mult() {
        for op in [BinOpToken::Add, BinOpToken::Sub, BinOpToken::Mult] {
            for l in [INT, FLOAT, BOOL] {
                for r in [INT, FLOAT, BOOL] {
                    let desc = registry().binary_op(op, l, r).unwrap_or_else(|| {
                        panic!("{:?} missing for ({}, {})", op, l, r)
                    });
                    let expected = if l == FLOAT || r == FLOAT { FLOAT } else { INT };
                    assert_eq!(desc.result_type_id, expected);
                }
            }
        }
    }

    #[test]
    fn true_division_always_yields_float() {
        for l in [INT, FLOAT, BOOL] {
            for r in [INT, FLOAT, BOOL] {
                let desc = registry().binary_op(BinOpToken::Div, l, r).unwrap();
                assert_eq!(desc.result_type_id, FLOAT);
            }
        }
    }

    #[test]
    fn comparisons_yield_bool() {
        for op in [BinOpToken::Lt, BinOpToken::Eq, BinOpToken::GtE] {
            let desc = registry().binary_op(op, INT, FLOAT).unwrap();
            assert_eq!(desc.result_type_id, BOOL);
            assert!(desc.compare_code.is_some());
        }
    }

    #[test]
    fn parameterized_lists_fold_to_base() {
        let desc = registry()
            .binary_op(
                BinOpToken::Add,
                type_ids::list_of(INT),
                type_ids::list_of(FLOAT),
            )
            .unwrap();
        assert_eq!(desc.result_type_id, LIST);
    }

    #[test]
    fn direct_descriptor_needs_no_path() {
        let path = registry().find_operable_path(BinOpToken::Add, INT, INT).unwrap();
        assert_eq!(path, OperablePath { left: INT, right: INT });
    }

    #[test]
    fn bool_promotes_to_int_for_bitwise() {
        // bool << bool is registered directly.
        assert!(registry().binary_op(BinOpToken::LShift, BOOL, BOOL).is_some());
        // string << int has no direct descriptor; the only path runs
        // through the dynamic category, so the failure defers to runtime.
        assert!(registry().binary_op(BinOpToken::LShift, STRING, INT).is_none());
        let path = registry()
            .find_operable_path(BinOpToken::LShift, STRING, INT)
            .unwrap();
        assert_eq!(path, OperablePath { left: INT, right: INT });
    }

    #[test]
    fn any_operands_find_a_numeric_path() {
        let path = registry().find_operable_path(BinOpToken::Mult, ANY, ANY).unwrap();
        assert_eq!(path, OperablePath { left: INT, right: INT });

        let path = registry().find_operable_path(BinOpToken::Sub, ANY, INT).unwrap();
        assert_eq!(path, OperablePath { left: INT, right: INT });
    }

    #[test]
    fn none_compares_equal_via_any() {
        let path = registry().find_operable_path(BinOpToken::Eq, NONE, INT).unwrap();
        assert_eq!(path, OperablePath { left: ANY, right: ANY });
    }

    #[test]
    fn list_subtraction_defers_to_the_dynamic_path() {
        // Subtraction is never registered on lists; the search can only
        // widen through the dynamic category and let the runtime reject.
        let path = registry().find_operable_path(BinOpToken::Sub, LIST, INT).unwrap();
        assert_eq!(path, OperablePath { left: INT, right: INT });
    }

    #[test]
    fn unary_descriptors() {
        assert_eq!(
            registry().unary_op(UnaryOpToken::Not, STRING).unwrap().result_type_id,
            BOOL
        );
        assert_eq!(
            registry().unary_op(UnaryOpToken::Neg, BOOL).unwrap().result_type_id,
            INT
        );
        assert_eq!(
            registry().unary_op(UnaryOpToken::Invert, INT).unwrap().result_type_id,
            INT
        );
        assert!(registry().unary_op(UnaryOpToken::Invert, FLOAT).is_none());
    }
}
