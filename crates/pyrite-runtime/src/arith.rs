//! Arithmetic, bitwise, and logical operation kernels.
//!
//! All kernels take borrowed object references and return a fresh owned
//! result, or null after reporting the error. Numeric policy:
//!
//! - `int op int` stays integral for `+ - * // % ** << >> & | ^`
//!   (arbitrary precision, overflow impossible);
//! - mixed numeric promotes exactly to float at the working precision;
//! - `/` always produces a float;
//! - `//` floors and `%` takes the divisor's sign (Python semantics);
//! - booleans participate as the integers 0 and 1.

use bigdecimal::{BigDecimal, RoundingMode};
use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{One, Signed, ToPrimitive, Zero};

use crate::container;
use crate::convert;
use crate::error::{self, PyErrorKind};
use crate::object::{self, create_float, create_int, py_create_bool, try_ref, PyObjectPtr};
use crate::type_ids;

/// A numeric operand lifted out of its box. Bools lift to integers.
enum Numeric {
    Int(BigInt),
    Float(BigDecimal),
}

fn numeric_value(obj: PyObjectPtr) -> Option<Numeric> {
    let r = try_ref(obj)?;
    if let Some(v) = r.as_int() {
        return Some(Numeric::Int(v.clone()));
    }
    if let Some(v) = r.as_bool() {
        return Some(Numeric::Int(BigInt::from(v as i64)));
    }
    r.as_float().cloned().map(Numeric::Float)
}

fn integer_value(obj: PyObjectPtr) -> Option<BigInt> {
    match numeric_value(obj)? {
        Numeric::Int(v) => Some(v),
        Numeric::Float(_) => None,
    }
}

fn to_decimal(value: Numeric) -> BigDecimal {
    match value {
        Numeric::Int(v) => BigDecimal::from(v),
        Numeric::Float(v) => v,
    }
}

fn type_error(op: &str, a: PyObjectPtr, b: PyObjectPtr) -> PyObjectPtr {
    error::raise(
        PyErrorKind::Type,
        format_args!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op,
            type_ids::name_of(object::py_get_object_type_id(a)),
            type_ids::name_of(object::py_get_object_type_id(b)),
        ),
    );
    std::ptr::null_mut()
}

/// `a + b`: numeric addition, string concatenation, or list concatenation.
pub fn py_object_add(a: PyObjectPtr, b: PyObjectPtr) -> PyObjectPtr {
    let (base_a, base_b) = (
        type_ids::base_of(object::py_get_object_type_id(a)),
        type_ids::base_of(object::py_get_object_type_id(b)),
    );
    if base_a == type_ids::STRING && base_b == type_ids::STRING {
        return container::string_concat(a, b);
    }
    if base_a == type_ids::LIST && base_b == type_ids::LIST {
        return container::list_concat(a, b);
    }
    match (numeric_value(a), numeric_value(b)) {
        (Some(Numeric::Int(x)), Some(Numeric::Int(y))) => create_int(x + y),
        (Some(x), Some(y)) => create_float(to_decimal(x) + to_decimal(y)),
        _ => type_error("+", a, b),
    }
}

/// `a - b` on numerics.
pub fn py_object_subtract(a: PyObjectPtr, b: PyObjectPtr) -> PyObjectPtr {
    match (numeric_value(a), numeric_value(b)) {
        (Some(Numeric::Int(x)), Some(Numeric::Int(y))) => create_int(x - y),
        (Some(x), Some(y)) => create_float(to_decimal(x) - to_decimal(y)),
        _ => type_error("-", a, b),
    }
}

/// `a * b`: numeric product, or string/list repetition with an integer.
pub fn py_object_multiply(a: PyObjectPtr, b: PyObjectPtr) -> PyObjectPtr {
    let (base_a, base_b) = (
        type_ids::base_of(object::py_get_object_type_id(a)),
        type_ids::base_of(object::py_get_object_type_id(b)),
    );
    if base_a == type_ids::STRING {
        if let Some(n) = integer_value(b).and_then(|v| v.to_i64()) {
            return container::string_repeat(a, n);
        }
    }
    if base_b == type_ids::STRING {
        if let Some(n) = integer_value(a).and_then(|v| v.to_i64()) {
            return container::string_repeat(b, n);
        }
    }
    if base_a == type_ids::LIST {
        if let Some(n) = integer_value(b).and_then(|v| v.to_i64()) {
            return container::list_repeat(a, n);
        }
    }
    if base_b == type_ids::LIST {
        if let Some(n) = integer_value(a).and_then(|v| v.to_i64()) {
            return container::list_repeat(b, n);
        }
    }
    match (numeric_value(a), numeric_value(b)) {
        (Some(Numeric::Int(x)), Some(Numeric::Int(y))) => create_int(x * y),
        (Some(x), Some(y)) => create_float(to_decimal(x) * to_decimal(y)),
        _ => type_error("*", a, b),
    }
}

/// True division: always a float; division by zero reports
/// `ZeroDivisionError`.
pub fn py_object_divide(a: PyObjectPtr, b: PyObjectPtr) -> PyObjectPtr {
    let (Some(x), Some(y)) = (numeric_value(a), numeric_value(b)) else {
        return type_error("/", a, b);
    };
    let denom = to_decimal(y);
    if denom.is_zero() {
        error::raise(PyErrorKind::ZeroDivision, "division by zero");
        return std::ptr::null_mut();
    }
    create_float(to_decimal(x) / denom)
}

/// Floor division; the result kind follows the promoted operands.
pub fn py_object_floor_divide(a: PyObjectPtr, b: PyObjectPtr) -> PyObjectPtr {
    match (numeric_value(a), numeric_value(b)) {
        (Some(Numeric::Int(x)), Some(Numeric::Int(y))) => {
            if y.is_zero() {
                error::raise(PyErrorKind::ZeroDivision, "integer division or modulo by zero");
                return std::ptr::null_mut();
            }
            create_int(x.div_floor(&y))
        }
        (Some(x), Some(y)) => {
            let denom = to_decimal(y);
            if denom.is_zero() {
                error::raise(PyErrorKind::ZeroDivision, "float floor division by zero");
                return std::ptr::null_mut();
            }
            let quotient = to_decimal(x) / denom;
            create_float(quotient.with_scale_round(0, RoundingMode::Floor))
        }
        _ => type_error("//", a, b),
    }
}

/// Modulo with the divisor's sign; float modulo is `a - floor(a/b)*b`.
pub fn py_object_modulo(a: PyObjectPtr, b: PyObjectPtr) -> PyObjectPtr {
    match (numeric_value(a), numeric_value(b)) {
        (Some(Numeric::Int(x)), Some(Numeric::Int(y))) => {
            if y.is_zero() {
                error::raise(PyErrorKind::ZeroDivision, "integer division or modulo by zero");
                return std::ptr::null_mut();
            }
            create_int(x.mod_floor(&y))
        }
        (Some(x), Some(y)) => {
            let lhs = to_decimal(x);
            let rhs = to_decimal(y);
            if rhs.is_zero() {
                error::raise(PyErrorKind::ZeroDivision, "float modulo");
                return std::ptr::null_mut();
            }
            let floored = (&lhs / &rhs).with_scale_round(0, RoundingMode::Floor);
            create_float(lhs - floored * rhs)
        }
        _ => type_error("%", a, b),
    }
}

/// Exponentiation.
///
/// Fast paths: integer base with a non-negative word-sized exponent uses
/// squaring; a negative integer exponent produces the float reciprocal;
/// a float base with an integral exponent uses integer powering on the
/// decimal. Fractional exponents go through the host transcendental pow.
pub fn py_object_power(a: PyObjectPtr, b: PyObjectPtr) -> PyObjectPtr {
    let (Some(x), Some(y)) = (numeric_value(a), numeric_value(b)) else {
        return type_error("**", a, b);
    };
    match (x, y) {
        (Numeric::Int(base), Numeric::Int(exp)) => int_pow(&base, &exp),
        (Numeric::Float(base), Numeric::Int(exp)) => float_int_pow(base, &exp),
        (base, Numeric::Float(exp)) => {
            if exp.is_integer() {
                if let Some(int_exp) = exp_as_bigint(&exp) {
                    return float_int_pow(to_decimal(base), &int_exp);
                }
            }
            transcendental_pow(to_decimal(base), exp)
        }
    }
}

fn exp_as_bigint(exp: &BigDecimal) -> Option<BigInt> {
    if !exp.is_integer() {
        return None;
    }
    let (digits, _) = exp.with_scale(0).into_bigint_and_exponent();
    Some(digits)
}

fn int_pow(base: &BigInt, exp: &BigInt) -> PyObjectPtr {
    if exp.is_negative() {
        if base.is_zero() {
            error::raise(PyErrorKind::ZeroDivision, "0 cannot be raised to a negative power");
            return std::ptr::null_mut();
        }
        let Some(magnitude) = (-exp).to_u64() else {
            error::raise(PyErrorKind::Overflow, "exponent too large");
            return std::ptr::null_mut();
        };
        let denom = pow_by_squaring(base, magnitude);
        return create_float(BigDecimal::one() / BigDecimal::from(denom));
    }
    match exp.to_u64() {
        Some(e) => create_int(pow_by_squaring(base, e)),
        None => {
            error::raise(PyErrorKind::Overflow, "exponent too large");
            std::ptr::null_mut()
        }
    }
}

fn float_int_pow(base: BigDecimal, exp: &BigInt) -> PyObjectPtr {
    if exp.is_negative() {
        if base.is_zero() {
            error::raise(PyErrorKind::ZeroDivision, "0.0 cannot be raised to a negative power");
            return std::ptr::null_mut();
        }
        let Some(magnitude) = (-exp).to_u64() else {
            error::raise(PyErrorKind::Overflow, "exponent too large");
            return std::ptr::null_mut();
        };
        let denom = decimal_pow(&base, magnitude);
        return create_float(BigDecimal::one() / denom);
    }
    match exp.to_u64() {
        Some(e) => create_float(decimal_pow(&base, e)),
        None => {
            error::raise(PyErrorKind::Overflow, "exponent too large");
            std::ptr::null_mut()
        }
    }
}

fn transcendental_pow(base: BigDecimal, exp: BigDecimal) -> PyObjectPtr {
    let (Some(b), Some(e)) = (base.to_f64(), exp.to_f64()) else {
        error::raise(PyErrorKind::Overflow, "operands too large for pow");
        return std::ptr::null_mut();
    };
    let result = b.powf(e);
    if result.is_nan() {
        error::raise(
            PyErrorKind::Value,
            "negative number cannot be raised to a fractional power",
        );
        return std::ptr::null_mut();
    }
    match BigDecimal::try_from(result) {
        Ok(value) => create_float(value),
        Err(_) => {
            error::raise(PyErrorKind::Overflow, "pow result out of range");
            std::ptr::null_mut()
        }
    }
}

/// Square-and-multiply on integers; `exp == 0` yields 1 for any base.
fn pow_by_squaring(base: &BigInt, mut exp: u64) -> BigInt {
    let mut result = BigInt::one();
    let mut acc = base.clone();
    while exp > 0 {
        if exp & 1 == 1 {
            result = &result * &acc;
        }
        exp >>= 1;
        if exp > 0 {
            acc = &acc * &acc;
        }
    }
    result
}

/// Square-and-multiply on decimals, rounding to the working precision
/// after every multiplication.
fn decimal_pow(base: &BigDecimal, mut exp: u64) -> BigDecimal {
    let mut result = BigDecimal::one();
    let mut acc = object::round_working(base.clone());
    while exp > 0 {
        if exp & 1 == 1 {
            result = object::round_working(&result * &acc);
        }
        exp >>= 1;
        if exp > 0 {
            acc = object::round_working(&acc * &acc);
        }
    }
    result
}

/// Unary minus.
pub fn py_object_negate(a: PyObjectPtr) -> PyObjectPtr {
    match numeric_value(a) {
        Some(Numeric::Int(v)) => create_int(-v),
        Some(Numeric::Float(v)) => create_float(-v),
        None => {
            error::raise(
                PyErrorKind::Type,
                format_args!(
                    "bad operand type for unary -: '{}'",
                    type_ids::name_of(object::py_get_object_type_id(a))
                ),
            );
            std::ptr::null_mut()
        }
    }
}

/// Logical `not`: a fresh `Bool` of the negated truthiness.
pub fn py_object_not(a: PyObjectPtr) -> PyObjectPtr {
    py_create_bool(!convert::py_object_to_bool(a))
}

fn bitwise_pair(op: &str, a: PyObjectPtr, b: PyObjectPtr) -> Option<(BigInt, BigInt)> {
    match (integer_value(a), integer_value(b)) {
        (Some(x), Some(y)) => Some((x, y)),
        _ => {
            type_error(op, a, b);
            None
        }
    }
}

/// Bitwise `a & b` (integers only).
pub fn py_object_and(a: PyObjectPtr, b: PyObjectPtr) -> PyObjectPtr {
    match bitwise_pair("&", a, b) {
        Some((x, y)) => create_int(x & y),
        None => std::ptr::null_mut(),
    }
}

/// Bitwise `a | b` (integers only).
pub fn py_object_or(a: PyObjectPtr, b: PyObjectPtr) -> PyObjectPtr {
    match bitwise_pair("|", a, b) {
        Some((x, y)) => create_int(x | y),
        None => std::ptr::null_mut(),
    }
}

/// Bitwise `a ^ b` (integers only).
pub fn py_object_xor(a: PyObjectPtr, b: PyObjectPtr) -> PyObjectPtr {
    match bitwise_pair("^", a, b) {
        Some((x, y)) => create_int(x ^ y),
        None => std::ptr::null_mut(),
    }
}

/// `a << b`. Negative counts report `ValueError`; a count beyond the
/// platform word is an `OverflowError` unless the operand is zero.
pub fn py_object_lshift(a: PyObjectPtr, b: PyObjectPtr) -> PyObjectPtr {
    let Some((x, count)) = bitwise_pair("<<", a, b) else {
        return std::ptr::null_mut();
    };
    if count.is_negative() {
        error::raise(PyErrorKind::Value, "negative shift count");
        return std::ptr::null_mut();
    }
    match count.to_usize() {
        Some(n) => create_int(x << n),
        None => {
            if x.is_zero() {
                create_int(BigInt::zero())
            } else {
                error::raise(PyErrorKind::Overflow, "shift count too large");
                std::ptr::null_mut()
            }
        }
    }
}

/// `a >> b`. Negative counts report `ValueError`; a count beyond the
/// platform word saturates to `0` (or `-1` for negative operands),
/// matching arbitrary-precision arithmetic shift.
pub fn py_object_rshift(a: PyObjectPtr, b: PyObjectPtr) -> PyObjectPtr {
    let Some((x, count)) = bitwise_pair(">>", a, b) else {
        return std::ptr::null_mut();
    };
    if count.is_negative() {
        error::raise(PyErrorKind::Value, "negative shift count");
        return std::ptr::null_mut();
    }
    match count.to_usize() {
        Some(n) => create_int(x >> n),
        None => {
            if x.is_negative() {
                create_int(BigInt::from(-1))
            } else {
                create_int(BigInt::zero())
            }
        }
    }
}

/// Bitwise NOT: `~x == -(x + 1)`.
pub fn py_object_bitnot(a: PyObjectPtr) -> PyObjectPtr {
    match integer_value(a) {
        Some(x) => create_int(-(x + BigInt::one())),
        None => {
            error::raise(
                PyErrorKind::Type,
                format_args!(
                    "bad operand type for unary ~: '{}'",
                    type_ids::name_of(object::py_get_object_type_id(a))
                ),
            );
            std::ptr::null_mut()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{
        obj_ref, py_create_double_from_string, py_create_int, py_create_int_from_string,
        py_create_string, py_decref, DEFAULT_PRECISION_BITS,
    };

    fn int(v: i64) -> PyObjectPtr {
        py_create_int(v)
    }

    fn float_obj(text: &str) -> PyObjectPtr {
        py_create_double_from_string(text, 10, DEFAULT_PRECISION_BITS)
    }

    fn int_result(obj: PyObjectPtr) -> String {
        let s = unsafe { obj_ref(obj) }.as_int().unwrap().to_string();
        py_decref(obj);
        s
    }

    fn float_result(obj: PyObjectPtr) -> String {
        let s = crate::object::format_float(unsafe { obj_ref(obj) }.as_float().unwrap());
        py_decref(obj);
        s
    }

    #[test]
    fn int_addition_is_exact_at_any_width() {
        let a = py_create_int_from_string("9223372036854775807", 10);
        let b = int(1);
        let sum = py_object_add(a, b);
        assert_eq!(int_result(sum), "9223372036854775808");
        py_decref(a);
        py_decref(b);
    }

    #[test]
    fn mixed_addition_promotes_to_float() {
        let a = int(1);
        let b = float_obj("2.5");
        let sum = py_object_add(a, b);
        assert_eq!(float_result(sum), "3.5");
        py_decref(a);
        py_decref(b);
    }

    #[test]
    fn true_division_of_ints_is_float() {
        let a = int(10);
        let b = int(4);
        let q = py_object_divide(a, b);
        assert_eq!(float_result(q), "2.5");
        py_decref(a);
        py_decref(b);
    }

    #[test]
    fn division_by_zero_reports() {
        crate::io::capture_start();
        let a = int(1);
        let b = int(0);
        assert!(py_object_divide(a, b).is_null());
        assert!(py_object_floor_divide(a, b).is_null());
        assert!(py_object_modulo(a, b).is_null());
        let (_, err) = crate::io::capture_take();
        assert_eq!(err.matches("ZeroDivisionError").count(), 3);
        py_decref(a);
        py_decref(b);
    }

    #[test]
    fn floor_div_and_modulo_follow_python_signs() {
        let cases = [
            (7i64, 3i64, "2", "1"),
            (-7, 3, "-3", "2"),
            (7, -3, "-3", "-2"),
            (-7, -3, "2", "-1"),
        ];
        for (x, y, quot, rem) in cases {
            let a = int(x);
            let b = int(y);
            assert_eq!(int_result(py_object_floor_divide(a, b)), quot);
            assert_eq!(int_result(py_object_modulo(a, b)), rem);
            py_decref(a);
            py_decref(b);
        }
    }

    #[test]
    fn divmod_identity_holds() {
        for x in [-17i64, -5, 0, 4, 23] {
            for y in [-7i64, -2, 3, 9] {
                let a = int(x);
                let b = int(y);
                let q = py_object_floor_divide(a, b);
                let r = py_object_modulo(a, b);
                let qy = py_object_multiply(q, b);
                let back = py_object_add(qy, r);
                assert_eq!(int_result(back), x.to_string());
                py_decref(a);
                py_decref(b);
                py_decref(q);
                py_decref(r);
                py_decref(qy);
            }
        }
    }

    #[test]
    fn power_fast_paths() {
        let a = int(2);
        let b = int(62);
        assert_eq!(int_result(py_object_power(a, b)), "4611686018427387904");
        py_decref(b);

        let zero = int(0);
        assert_eq!(int_result(py_object_power(a, zero)), "1");
        assert_eq!(int_result(py_object_power(zero, zero)), "1");
        py_decref(zero);

        let neg = int(-2);
        let quarter = py_object_power(a, neg);
        assert_eq!(float_result(quarter), "0.25");
        py_decref(neg);
        py_decref(a);
    }

    #[test]
    fn zero_to_negative_power_reports() {
        crate::io::capture_start();
        let zero = int(0);
        let neg = int(-1);
        assert!(py_object_power(zero, neg).is_null());
        let (_, err) = crate::io::capture_take();
        assert!(err.contains("ZeroDivisionError"));
        py_decref(zero);
        py_decref(neg);
    }

    #[test]
    fn bitnot_matches_identity() {
        for v in [-5i64, -1, 0, 1, 41] {
            let a = int(v);
            assert_eq!(int_result(py_object_bitnot(a)), (-(v + 1)).to_string());
            py_decref(a);
        }
    }

    #[test]
    fn shifts() {
        let a = int(5);
        let two = int(2);
        assert_eq!(int_result(py_object_lshift(a, two)), "20");
        assert_eq!(int_result(py_object_rshift(a, two)), "1");
        py_decref(two);

        crate::io::capture_start();
        let neg = int(-1);
        assert!(py_object_lshift(a, neg).is_null());
        let (_, err) = crate::io::capture_take();
        assert!(err.contains("ValueError"));
        py_decref(neg);
        py_decref(a);
    }

    #[test]
    fn huge_right_shift_saturates_by_sign() {
        let count = py_create_int_from_string("170141183460469231731687303715884105728", 10);
        let pos = int(12);
        let neg = int(-12);
        assert_eq!(int_result(py_object_rshift(pos, count)), "0");
        assert_eq!(int_result(py_object_rshift(neg, count)), "-1");
        py_decref(pos);
        py_decref(neg);
        py_decref(count);
    }

    #[test]
    fn string_and_list_operands_reject_arithmetic() {
        crate::io::capture_start();
        let s = py_create_string("x");
        let n = int(3);
        assert!(py_object_subtract(s, n).is_null());
        let (_, err) = crate::io::capture_take();
        assert!(err.contains("TypeError"));
        py_decref(s);
        py_decref(n);
    }

    #[test]
    fn string_repeat_via_multiply() {
        let s = py_create_string("ab");
        let n = int(3);
        let out = py_object_multiply(s, n);
        assert_eq!(unsafe { obj_ref(out) }.as_str().unwrap(), "ababab");
        py_decref(out);

        let neg = int(-2);
        let empty = py_object_multiply(s, neg);
        assert_eq!(unsafe { obj_ref(empty) }.as_str().unwrap(), "");
        py_decref(empty);
        py_decref(neg);
        py_decref(n);
        py_decref(s);
    }
}
