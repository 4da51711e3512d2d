//! Conversions between object categories.
//!
//! `py_smart_convert` is the single conversion entry point generated code
//! uses: it returns an owned object of the target category (possibly the
//! same object with an extra reference) or null on failure. The specific
//! `py_convert_*` helpers mirror the conversion-descriptor graph the
//! compiler's registry walks: `Bool→Int→Float`, the truncating
//! `Float→Int`, truthiness to `Bool`, rendering to `Str`, and the
//! string-to-number parses reserved for the explicit built-ins.

use std::str::FromStr;

use bigdecimal::{BigDecimal, RoundingMode};
use num_bigint::BigInt;
use num_traits::ToPrimitive;

use crate::error::{self, PyErrorKind};
use crate::io;
use crate::object::{
    self, create_float, create_int, py_create_bool, py_create_string, py_incref, try_ref,
    PyObjectPtr,
};
use crate::type_ids;

/// Machine-boolean truthiness: `None`, numeric zero, and empty
/// strings/lists/dicts are false; everything else is true.
pub fn py_object_to_bool(obj: PyObjectPtr) -> bool {
    let Some(r) = try_ref(obj) else { return false };
    match r.type_id_base() {
        type_ids::NONE => false,
        type_ids::INT | type_ids::FLOAT | type_ids::BOOL => !object::numeric_is_zero(r),
        type_ids::STRING => r.as_str().map(|s| !s.is_empty()).unwrap_or(false),
        type_ids::LIST => r
            .as_list()
            .map(|l| !l.borrow().items.is_empty())
            .unwrap_or(false),
        type_ids::DICT => r.as_dict().map(|d| d.borrow().size > 0).unwrap_or(false),
        _ => true,
    }
}

/// Convert to the target category.
///
/// Same-base (or `ANY`) targets hand back the same object with a fresh
/// reference. Returns null and reports on an impossible conversion.
pub fn py_smart_convert(obj: PyObjectPtr, target_type_id: i32) -> PyObjectPtr {
    let Some(r) = try_ref(obj) else {
        return std::ptr::null_mut();
    };
    let source_base = r.type_id_base();
    let target_base = type_ids::base_of(target_type_id);
    if target_base == type_ids::ANY || source_base == target_base {
        py_incref(obj);
        return obj;
    }
    match target_base {
        type_ids::INT => py_convert_to_int(obj),
        type_ids::FLOAT => py_convert_to_float(obj),
        type_ids::BOOL => py_create_bool(py_object_to_bool(obj)),
        type_ids::STRING => py_convert_to_string(obj),
        _ => {
            error::raise(
                PyErrorKind::Type,
                format_args!(
                    "cannot convert '{}' to '{}'",
                    type_ids::name_of(r.type_id()),
                    type_ids::name_of(target_type_id)
                ),
            );
            std::ptr::null_mut()
        }
    }
}

/// `int(x)`: identity for ints, truncation for floats, 0/1 for bools,
/// and a base-10 parse for strings.
pub fn py_convert_to_int(obj: PyObjectPtr) -> PyObjectPtr {
    let Some(r) = try_ref(obj) else {
        return std::ptr::null_mut();
    };
    if let Some(v) = r.as_int() {
        return create_int(v.clone());
    }
    if let Some(v) = r.as_bool() {
        return create_int(BigInt::from(v as i64));
    }
    if let Some(v) = r.as_float() {
        let truncated = v.with_scale_round(0, RoundingMode::Down);
        let (digits, _) = truncated.into_bigint_and_exponent();
        return create_int(digits);
    }
    if let Some(s) = r.as_str() {
        return match BigInt::parse_bytes(s.trim().as_bytes(), 10) {
            Some(v) => create_int(v),
            None => {
                error::raise(
                    PyErrorKind::Value,
                    format_args!("invalid literal for int() with base 10: '{}'", s),
                );
                std::ptr::null_mut()
            }
        };
    }
    error::raise(
        PyErrorKind::Type,
        format_args!("int() argument must be numeric or str, not '{}'", type_ids::name_of(r.type_id())),
    );
    std::ptr::null_mut()
}

/// `float(x)`: exact widening for ints and bools, parse for strings.
pub fn py_convert_to_float(obj: PyObjectPtr) -> PyObjectPtr {
    let Some(r) = try_ref(obj) else {
        return std::ptr::null_mut();
    };
    if let Some(v) = r.as_float() {
        return create_float(v.clone());
    }
    if let Some(v) = r.as_int() {
        return create_float(BigDecimal::from(v.clone()));
    }
    if let Some(v) = r.as_bool() {
        return create_float(BigDecimal::from(v as i64));
    }
    if let Some(s) = r.as_str() {
        return match BigDecimal::from_str(s.trim()) {
            Ok(v) => create_float(v),
            Err(_) => {
                error::raise(
                    PyErrorKind::Value,
                    format_args!("could not convert string to float: '{}'", s),
                );
                std::ptr::null_mut()
            }
        };
    }
    error::raise(
        PyErrorKind::Type,
        format_args!(
            "float() argument must be numeric or str, not '{}'",
            type_ids::name_of(r.type_id())
        ),
    );
    std::ptr::null_mut()
}

/// `str(x)`: the print rendering as a fresh string object.
pub fn py_convert_to_string(obj: PyObjectPtr) -> PyObjectPtr {
    py_create_string(&io::py_object_str(obj))
}

/// Exit-code conversion for the program entry: `None` maps to 0, a
/// word-sized int to its value, everything else (including errors) to 1.
pub fn py_object_to_exit_code(obj: PyObjectPtr) -> i32 {
    let Some(r) = try_ref(obj) else { return 1 };
    if r.is_none() {
        return 0;
    }
    if let Some(v) = r.as_int() {
        return match v.to_i64() {
            Some(x) => x as i32,
            None => 1,
        };
    }
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{
        obj_ref, py_create_bool, py_create_double_from_string, py_create_int, py_create_list,
        py_create_string, py_decref, py_get_none, DEFAULT_PRECISION_BITS,
    };

    #[test]
    fn truthiness() {
        let zero = py_create_int(0);
        let one = py_create_int(1);
        let empty = py_create_string("");
        let full = py_create_string("x");
        let list = py_create_list(0, type_ids::INT);
        assert!(!py_object_to_bool(py_get_none()));
        assert!(!py_object_to_bool(zero));
        assert!(py_object_to_bool(one));
        assert!(!py_object_to_bool(empty));
        assert!(py_object_to_bool(full));
        assert!(!py_object_to_bool(list));
        py_decref(zero);
        py_decref(one);
        py_decref(empty);
        py_decref(full);
        py_decref(list);
    }

    #[test]
    fn float_to_int_truncates_toward_zero() {
        for (text, expected) in [("2.9", "2"), ("-2.9", "-2"), ("5.0", "5")] {
            let f = py_create_double_from_string(text, 10, DEFAULT_PRECISION_BITS);
            let n = py_convert_to_int(f);
            assert_eq!(unsafe { obj_ref(n) }.as_int().unwrap().to_string(), expected);
            py_decref(n);
            py_decref(f);
        }
    }

    #[test]
    fn smart_convert_same_base_is_identity_with_a_new_reference() {
        let n = py_create_int(3);
        let same = py_smart_convert(n, type_ids::INT);
        assert_eq!(same, n);
        assert_eq!(unsafe { obj_ref(n) }.ref_count(), 2);
        py_decref(same);
        py_decref(n);
    }

    #[test]
    fn smart_convert_string_paths() {
        let s = py_create_string("42");
        let n = py_smart_convert(s, type_ids::INT);
        assert_eq!(unsafe { obj_ref(n) }.as_int().unwrap().to_string(), "42");
        py_decref(n);
        py_decref(s);

        let bad = py_create_string("4x");
        crate::io::capture_start();
        assert!(py_smart_convert(bad, type_ids::INT).is_null());
        let (_, err) = crate::io::capture_take();
        assert!(err.contains("ValueError"));
        py_decref(bad);
    }

    #[test]
    fn exit_codes() {
        assert_eq!(py_object_to_exit_code(py_get_none()), 0);
        let three = py_create_int(3);
        assert_eq!(py_object_to_exit_code(three), 3);
        py_decref(three);
        let s = py_create_string("oops");
        assert_eq!(py_object_to_exit_code(s), 1);
        py_decref(s);
        assert_eq!(py_object_to_exit_code(std::ptr::null_mut()), 1);

        let b = py_create_bool(true);
        assert_eq!(py_object_to_exit_code(b), 1);
        py_decref(b);
    }
}
