//! Comparison operations.
//!
//! Equality dispatches through the per-type `equals` slot, so it works for
//! every registered type. Ordering is defined only for numeric↔numeric and
//! string↔string pairs; any other combination reports `TypeError` for the
//! ordering operators while `==`/`!=` simply answer `False`/`True`.

use std::cmp::Ordering;

use bigdecimal::BigDecimal;

use crate::dispatch;
use crate::error::{self, PyErrorKind};
use crate::object::{self, py_create_bool, try_ref, PyObjectPtr};
use crate::type_ids;

/// Comparison operator encoding shared with generated code.
pub const CMP_EQ: i32 = 0;
pub const CMP_NE: i32 = 1;
pub const CMP_LT: i32 = 2;
pub const CMP_LE: i32 = 3;
pub const CMP_GT: i32 = 4;
pub const CMP_GE: i32 = 5;

/// Printable operator name for diagnostics.
pub fn py_compare_op_name(op: i32) -> &'static str {
    match op {
        CMP_EQ => "==",
        CMP_NE => "!=",
        CMP_LT => "<",
        CMP_LE => "<=",
        CMP_GT => ">",
        CMP_GE => ">=",
        _ => "?",
    }
}

/// `a <op> b` as a fresh `Bool` object, or null on an unordered pair.
pub fn py_object_compare(a: PyObjectPtr, b: PyObjectPtr, op: i32) -> PyObjectPtr {
    match op {
        CMP_EQ => return py_create_bool(py_compare_eq(a, b)),
        CMP_NE => return py_create_bool(!py_compare_eq(a, b)),
        _ => {}
    }
    let Some(ordering) = ordering_of(a, b) else {
        error::raise(
            PyErrorKind::Type,
            format_args!(
                "'{}' not supported between instances of '{}' and '{}'",
                py_compare_op_name(op),
                type_ids::name_of(object::py_get_object_type_id(a)),
                type_ids::name_of(object::py_get_object_type_id(b)),
            ),
        );
        return std::ptr::null_mut();
    };
    let result = match op {
        CMP_LT => ordering == Ordering::Less,
        CMP_LE => ordering != Ordering::Greater,
        CMP_GT => ordering == Ordering::Greater,
        CMP_GE => ordering != Ordering::Less,
        _ => false,
    };
    py_create_bool(result)
}

/// Machine-boolean equality.
pub fn py_compare_eq(a: PyObjectPtr, b: PyObjectPtr) -> bool {
    dispatch::objects_equal(a, b)
}

/// Machine-boolean inequality.
pub fn py_compare_ne(a: PyObjectPtr, b: PyObjectPtr) -> bool {
    !dispatch::objects_equal(a, b)
}

/// Total order for comparable pairs: exact numeric promotion for
/// numeric↔numeric, lexicographic for string↔string. `None` otherwise.
fn ordering_of(a: PyObjectPtr, b: PyObjectPtr) -> Option<Ordering> {
    let (left, right) = (try_ref(a)?, try_ref(b)?);
    if let (Some(x), Some(y)) = (left.as_str(), right.as_str()) {
        return Some(x.cmp(y));
    }
    let lift = |r: &object::PyObject| -> Option<BigDecimal> {
        if let Some(v) = r.as_int() {
            return Some(BigDecimal::from(v.clone()));
        }
        if let Some(v) = r.as_bool() {
            return Some(BigDecimal::from(v as i64));
        }
        r.as_float().cloned()
    };
    match (lift(left), lift(right)) {
        (Some(x), Some(y)) => x.partial_cmp(&y),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::py_initialize_builtin_type_methods;
    use crate::object::{
        obj_ref, py_create_double_from_string, py_create_int, py_create_string, py_decref,
        py_get_none, DEFAULT_PRECISION_BITS,
    };

    fn bool_of(result: PyObjectPtr) -> bool {
        let v = unsafe { obj_ref(result) }.as_bool().unwrap();
        py_decref(result);
        v
    }

    #[test]
    fn numeric_ordering_bridges_int_and_float() {
        py_initialize_builtin_type_methods();
        let two = py_create_int(2);
        let two_and_half = py_create_double_from_string("2.5", 10, DEFAULT_PRECISION_BITS);
        assert!(bool_of(py_object_compare(two, two_and_half, CMP_LT)));
        assert!(bool_of(py_object_compare(two_and_half, two, CMP_GE)));
        py_decref(two);
        py_decref(two_and_half);
    }

    #[test]
    fn string_ordering_is_lexicographic() {
        py_initialize_builtin_type_methods();
        let a = py_create_string("apple");
        let b = py_create_string("banana");
        assert!(bool_of(py_object_compare(a, b, CMP_LT)));
        assert!(bool_of(py_object_compare(b, a, CMP_GT)));
        py_decref(a);
        py_decref(b);
    }

    #[test]
    fn unordered_pairs_report_for_ordering_but_answer_equality() {
        py_initialize_builtin_type_methods();
        crate::io::capture_start();
        let s = py_create_string("x");
        let none = py_get_none();
        assert!(py_object_compare(s, none, CMP_LT).is_null());
        let (_, err) = crate::io::capture_take();
        assert!(err.contains("TypeError"));

        assert!(!bool_of(py_object_compare(s, none, CMP_EQ)));
        assert!(bool_of(py_object_compare(s, none, CMP_NE)));
        py_decref(s);
    }
}
