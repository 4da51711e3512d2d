//! Per-type method tables and the generic object operations that route
//! through them.
//!
//! Each type ID maps to a static [`PyTypeMethods`] record of nullable
//! function pointers. `py_object_index`, `py_object_len`, attribute
//! access, hashing, and equality all dispatch through the registered
//! record; a lookup for an unregistered ID falls back to the ID's base
//! type, so parameterized `list[int]` objects find the plain list
//! handlers. A null slot means "not supported here" and produces the
//! appropriate error at dispatch time.
//!
//! The registry is process-wide (thread-local in this single-threaded
//! runtime) and populated exactly once per thread by
//! [`py_initialize_builtin_type_methods`], which the module's global
//! constructor calls before user code runs.

use std::cell::RefCell;
use std::collections::HashMap;

use num_bigint::{BigInt, Sign};

use crate::container;
use crate::error::{self, PyErrorKind};
use crate::object::{self, py_create_bool, py_decref, try_ref, PyObjectPtr};
use crate::type_ids;

/// Handler signatures for the dispatch slots.
pub type IndexGetFn = fn(PyObjectPtr, PyObjectPtr) -> PyObjectPtr;
pub type IndexSetFn = fn(PyObjectPtr, PyObjectPtr, PyObjectPtr) -> bool;
pub type LenFn = fn(PyObjectPtr) -> i32;
pub type GetAttrFn = fn(PyObjectPtr, &str) -> PyObjectPtr;
pub type SetAttrFn = fn(PyObjectPtr, &str, PyObjectPtr) -> bool;
pub type HashFn = fn(PyObjectPtr) -> Option<u64>;
pub type EqualsFn = fn(PyObjectPtr, PyObjectPtr) -> PyObjectPtr;

/// The per-type record of optional method implementations.
pub struct PyTypeMethods {
    pub index_get: Option<IndexGetFn>,
    pub index_set: Option<IndexSetFn>,
    pub len: Option<LenFn>,
    pub getattr: Option<GetAttrFn>,
    pub setattr: Option<SetAttrFn>,
    pub hash: Option<HashFn>,
    pub equals: Option<EqualsFn>,
}

static INT_METHODS: PyTypeMethods = PyTypeMethods {
    index_get: None,
    index_set: None,
    len: None,
    getattr: None,
    setattr: None,
    hash: Some(numeric_hash),
    equals: Some(numeric_equals),
};

static FLOAT_METHODS: PyTypeMethods = PyTypeMethods {
    index_get: None,
    index_set: None,
    len: None,
    getattr: None,
    setattr: None,
    hash: Some(numeric_hash),
    equals: Some(numeric_equals),
};

static BOOL_METHODS: PyTypeMethods = PyTypeMethods {
    index_get: None,
    index_set: None,
    len: None,
    getattr: None,
    setattr: None,
    hash: Some(numeric_hash),
    equals: Some(numeric_equals),
};

static STRING_METHODS: PyTypeMethods = PyTypeMethods {
    index_get: Some(container::string_index_get_handler),
    index_set: None,
    len: Some(container::string_len_handler),
    getattr: None,
    setattr: None,
    hash: Some(string_hash),
    equals: Some(string_equals),
};

static NONE_METHODS: PyTypeMethods = PyTypeMethods {
    index_get: None,
    index_set: None,
    len: None,
    getattr: None,
    setattr: None,
    hash: Some(none_hash),
    equals: Some(none_equals),
};

static LIST_METHODS: PyTypeMethods = PyTypeMethods {
    index_get: Some(container::list_index_get_handler),
    index_set: Some(container::list_index_set_handler),
    len: Some(container::list_len_handler),
    getattr: None,
    setattr: None,
    hash: None,
    equals: Some(container::list_equals_handler),
};

static DICT_METHODS: PyTypeMethods = PyTypeMethods {
    index_get: Some(container::dict_index_get_handler),
    index_set: Some(container::dict_index_set_handler),
    len: Some(container::dict_len_handler),
    getattr: None,
    setattr: None,
    hash: None,
    equals: Some(container::dict_equals_handler),
};

static CLASS_METHODS: PyTypeMethods = PyTypeMethods {
    index_get: None,
    index_set: None,
    len: None,
    getattr: Some(class_getattr_handler),
    setattr: Some(class_setattr_handler),
    hash: None,
    equals: Some(identity_equals),
};

static INSTANCE_METHODS: PyTypeMethods = PyTypeMethods {
    index_get: None,
    index_set: None,
    len: None,
    getattr: Some(instance_getattr_handler),
    setattr: Some(instance_setattr_handler),
    hash: None,
    equals: Some(identity_equals),
};

thread_local! {
    static TYPE_REGISTRY: RefCell<HashMap<i32, &'static PyTypeMethods>> =
        RefCell::new(HashMap::new());
}

/// Register (or replace) the method table for a type ID.
pub fn py_register_type_methods(type_id: i32, methods: &'static PyTypeMethods) {
    TYPE_REGISTRY.with(|r| {
        r.borrow_mut().insert(type_id, methods);
    });
}

/// Look up the method table for a type ID, falling back to its base type.
pub fn py_get_type_methods(type_id: i32) -> Option<&'static PyTypeMethods> {
    TYPE_REGISTRY.with(|r| {
        let registry = r.borrow();
        registry
            .get(&type_id)
            .or_else(|| registry.get(&type_ids::base_of(type_id)))
            .copied()
    })
}

/// Install the built-in method tables. Idempotent; runs from the module's
/// global constructor before any user code.
pub fn py_initialize_builtin_type_methods() {
    tracing::debug!("registering builtin type method tables");
    py_register_type_methods(type_ids::INT, &INT_METHODS);
    py_register_type_methods(type_ids::FLOAT, &FLOAT_METHODS);
    py_register_type_methods(type_ids::BOOL, &BOOL_METHODS);
    py_register_type_methods(type_ids::STRING, &STRING_METHODS);
    py_register_type_methods(type_ids::NONE, &NONE_METHODS);
    py_register_type_methods(type_ids::LIST, &LIST_METHODS);
    py_register_type_methods(type_ids::DICT, &DICT_METHODS);
    py_register_type_methods(type_ids::CLASS, &CLASS_METHODS);
    py_register_type_methods(type_ids::INSTANCE, &INSTANCE_METHODS);
}

// ---------------------------------------------------------------------------
// Generic operations routed through the tables
// ---------------------------------------------------------------------------

/// `container[key]`: returns a fresh owned reference or null with the
/// container's error reported.
pub fn py_object_index(container: PyObjectPtr, key: PyObjectPtr) -> PyObjectPtr {
    let type_id = object::py_get_object_type_id(container);
    match py_get_type_methods(type_id).and_then(|m| m.index_get) {
        Some(handler) => handler(container, key),
        None => {
            error::raise(
                PyErrorKind::Type,
                format_args!("'{}' object is not subscriptable", type_ids::name_of(type_id)),
            );
            std::ptr::null_mut()
        }
    }
}

/// `container[key] = value`: the handler adjusts refcounts of the old and
/// new values.
pub fn py_object_set_index(container: PyObjectPtr, key: PyObjectPtr, value: PyObjectPtr) -> bool {
    let type_id = object::py_get_object_type_id(container);
    match py_get_type_methods(type_id).and_then(|m| m.index_set) {
        Some(handler) => handler(container, key, value),
        None => {
            error::raise(
                PyErrorKind::Type,
                format_args!(
                    "'{}' object does not support item assignment",
                    type_ids::name_of(type_id)
                ),
            );
            false
        }
    }
}

/// `len(obj)`, or -1 with `TypeError` reported when the type has no
/// length.
pub fn py_object_len(obj: PyObjectPtr) -> i32 {
    let type_id = object::py_get_object_type_id(obj);
    match py_get_type_methods(type_id).and_then(|m| m.len) {
        Some(handler) => handler(obj),
        None => {
            error::raise(
                PyErrorKind::Type,
                format_args!("object of type '{}' has no len()", type_ids::name_of(type_id)),
            );
            -1
        }
    }
}

/// Attribute read; null with `AttributeError` when absent or unsupported.
pub fn py_object_getattr(obj: PyObjectPtr, name: &str) -> PyObjectPtr {
    let type_id = object::py_get_object_type_id(obj);
    match py_get_type_methods(type_id).and_then(|m| m.getattr) {
        Some(handler) => handler(obj, name),
        None => {
            error::raise(
                PyErrorKind::Attribute,
                format_args!("'{}' object has no attribute '{}'", type_ids::name_of(type_id), name),
            );
            std::ptr::null_mut()
        }
    }
}

/// Attribute write; false with `AttributeError` when unsupported.
pub fn py_object_setattr(obj: PyObjectPtr, name: &str, value: PyObjectPtr) -> bool {
    let type_id = object::py_get_object_type_id(obj);
    match py_get_type_methods(type_id).and_then(|m| m.setattr) {
        Some(handler) => handler(obj, name, value),
        None => {
            error::raise(
                PyErrorKind::Attribute,
                format_args!(
                    "'{}' object does not support attribute assignment",
                    type_ids::name_of(type_id)
                ),
            );
            false
        }
    }
}

/// Hash through the dispatch table. `None` for unhashable types.
pub fn hash_value(obj: PyObjectPtr) -> Option<u64> {
    let type_id = object::py_get_object_type_id(obj);
    py_get_type_methods(type_id)
        .and_then(|m| m.hash)
        .and_then(|handler| handler(obj))
}

/// ABI form of [`hash_value`]: reports `TypeError` for unhashable types
/// and returns 0.
pub fn py_hash_object(obj: PyObjectPtr) -> u64 {
    match hash_value(obj) {
        Some(h) => h,
        None => {
            let type_id = object::py_get_object_type_id(obj);
            error::raise(
                PyErrorKind::Type,
                format_args!("unhashable type: '{}'", type_ids::name_of(type_id)),
            );
            0
        }
    }
}

/// Equality through the dispatch table, as a machine boolean.
///
/// Falls back to pointer identity when neither side has an `equals` slot.
pub fn objects_equal(a: PyObjectPtr, b: PyObjectPtr) -> bool {
    if a == b {
        return true;
    }
    let result = py_object_equals(a, b);
    if result.is_null() {
        return false;
    }
    let equal = unsafe { object::obj_ref(result) }.as_bool().unwrap_or(false);
    py_decref(result);
    equal
}

/// `a == b` as a fresh `Bool` object.
pub fn py_object_equals(a: PyObjectPtr, b: PyObjectPtr) -> PyObjectPtr {
    let type_id = object::py_get_object_type_id(a);
    match py_get_type_methods(type_id).and_then(|m| m.equals) {
        Some(handler) => handler(a, b),
        None => py_create_bool(a == b),
    }
}

// ---------------------------------------------------------------------------
// Hash handlers
// ---------------------------------------------------------------------------

/// Fold an arbitrary-precision integer into a platform hash. The same
/// value always folds the same way, so int/float/bool agreement reduces
/// to agreeing on the folded integer.
pub(crate) fn hash_bigint(value: &BigInt) -> u64 {
    let (sign, digits) = value.to_u64_digits();
    let mut hash: u64 = 0;
    for digit in digits.iter().rev() {
        hash = hash.wrapping_mul(0x9E37_79B9_7F4A_7C15).wrapping_add(*digit);
    }
    if sign == Sign::Minus {
        hash = hash.wrapping_neg();
    }
    hash
}

/// djb2 over the bytes, the classic string fold.
pub(crate) fn hash_str(text: &str) -> u64 {
    let mut hash: u64 = 5381;
    for byte in text.bytes() {
        hash = (hash << 5).wrapping_add(hash).wrapping_add(byte as u64);
    }
    hash
}

/// Shared hash for int, float, and bool.
///
/// Integral values of any numeric type fold their integer value, which
/// keeps `hash(2) == hash(2.0) == hash(True+True)` consistent with
/// cross-type equality. Non-integral floats fold their canonical decimal
/// rendering.
fn numeric_hash(obj: PyObjectPtr) -> Option<u64> {
    let r = try_ref(obj)?;
    if let Some(v) = r.as_int() {
        return Some(hash_bigint(v));
    }
    if let Some(b) = r.as_bool() {
        return Some(hash_bigint(&BigInt::from(b as i64)));
    }
    if let Some(f) = r.as_float() {
        if f.is_integer() {
            let (int_part, _) = f.with_scale(0).into_bigint_and_exponent();
            return Some(hash_bigint(&int_part));
        }
        return Some(hash_str(&f.clone().normalized().to_string()));
    }
    None
}

fn string_hash(obj: PyObjectPtr) -> Option<u64> {
    try_ref(obj).and_then(|r| r.as_str()).map(hash_str)
}

fn none_hash(_obj: PyObjectPtr) -> Option<u64> {
    Some(0)
}

// ---------------------------------------------------------------------------
// Equals handlers
// ---------------------------------------------------------------------------

/// Numeric equality bridging int, float, and bool by exact promotion.
fn numeric_equals(a: PyObjectPtr, b: PyObjectPtr) -> PyObjectPtr {
    use bigdecimal::BigDecimal;
    let (Some(left), Some(right)) = (try_ref(a), try_ref(b)) else {
        return py_create_bool(false);
    };
    let as_decimal = |r: &object::PyObject| -> Option<BigDecimal> {
        if let Some(v) = r.as_int() {
            return Some(BigDecimal::from(v.clone()));
        }
        if let Some(v) = r.as_bool() {
            return Some(BigDecimal::from(v as i64));
        }
        r.as_float().cloned()
    };
    match (as_decimal(left), as_decimal(right)) {
        (Some(x), Some(y)) => py_create_bool(x == y),
        _ => py_create_bool(false),
    }
}

fn string_equals(a: PyObjectPtr, b: PyObjectPtr) -> PyObjectPtr {
    let left = try_ref(a).and_then(|r| r.as_str());
    let right = try_ref(b).and_then(|r| r.as_str());
    match (left, right) {
        (Some(x), Some(y)) => py_create_bool(x == y),
        _ => py_create_bool(false),
    }
}

/// `None` equals only itself.
fn none_equals(a: PyObjectPtr, b: PyObjectPtr) -> PyObjectPtr {
    let both_none = try_ref(a).map(|r| r.is_none()).unwrap_or(false)
        && try_ref(b).map(|r| r.is_none()).unwrap_or(false);
    py_create_bool(both_none)
}

fn identity_equals(a: PyObjectPtr, b: PyObjectPtr) -> PyObjectPtr {
    py_create_bool(a == b)
}

// ---------------------------------------------------------------------------
// Attribute handlers
// ---------------------------------------------------------------------------

/// Instance attribute read: instance dict first, then the class chain.
fn instance_getattr_handler(obj: PyObjectPtr, name: &str) -> PyObjectPtr {
    let Some(instance) = try_ref(obj).and_then(|r| r.as_instance()) else {
        error::raise(PyErrorKind::Type, "getattr on a non-instance");
        return std::ptr::null_mut();
    };
    let from_instance = container::dict_get_str(instance.instance_dict, name);
    if !from_instance.is_null() {
        return from_instance;
    }
    let from_class = class_chain_lookup(instance.class, name);
    if !from_class.is_null() {
        return from_class;
    }
    error::raise(
        PyErrorKind::Attribute,
        format_args!("instance has no attribute '{}'", name),
    );
    std::ptr::null_mut()
}

/// Instance attribute write: always lands in the instance dict.
fn instance_setattr_handler(obj: PyObjectPtr, name: &str, value: PyObjectPtr) -> bool {
    let Some(instance) = try_ref(obj).and_then(|r| r.as_instance()) else {
        error::raise(PyErrorKind::Type, "setattr on a non-instance");
        return false;
    };
    container::dict_set_str(instance.instance_dict, name, value)
}

/// Class attribute read: own dict, then the base chain.
fn class_getattr_handler(obj: PyObjectPtr, name: &str) -> PyObjectPtr {
    let found = class_chain_lookup(obj, name);
    if found.is_null() {
        let class_name = try_ref(obj)
            .and_then(|r| r.as_class())
            .map(|c| c.name.clone())
            .unwrap_or_default();
        error::raise(
            PyErrorKind::Attribute,
            format_args!("type object '{}' has no attribute '{}'", class_name, name),
        );
    }
    found
}

/// Class attribute write: always lands in the class's own dict.
fn class_setattr_handler(obj: PyObjectPtr, name: &str, value: PyObjectPtr) -> bool {
    let Some(class) = try_ref(obj).and_then(|r| r.as_class()) else {
        error::raise(PyErrorKind::Type, "setattr on a non-class");
        return false;
    };
    container::dict_set_str(class.class_dict, name, value)
}

/// Walk a class and its bases looking for `name`. Returns an owned
/// reference or null without reporting.
pub fn class_chain_lookup(class: PyObjectPtr, name: &str) -> PyObjectPtr {
    let mut current = class;
    while let Some(c) = try_ref(current).and_then(|r| r.as_class()) {
        let found = container::dict_get_str(c.class_dict, name);
        if !found.is_null() {
            return found;
        }
        current = c.base;
    }
    std::ptr::null_mut()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{
        obj_ref, py_create_dict, py_create_double_from_string, py_create_int,
        py_create_int_from_string, py_create_list, py_create_string, py_get_none,
        DEFAULT_PRECISION_BITS,
    };

    fn init() {
        py_initialize_builtin_type_methods();
    }

    #[test]
    fn equal_numerics_hash_alike() {
        init();
        let two_int = py_create_int(2);
        let two_float = py_create_double_from_string("2.0", 10, DEFAULT_PRECISION_BITS);
        let one_int = py_create_int(1);
        let true_bool = crate::object::py_create_bool(true);

        assert!(objects_equal(two_int, two_float));
        assert_eq!(hash_value(two_int), hash_value(two_float));
        assert!(objects_equal(one_int, true_bool));
        assert_eq!(hash_value(one_int), hash_value(true_bool));

        py_decref(two_int);
        py_decref(two_float);
        py_decref(one_int);
        py_decref(true_bool);
    }

    #[test]
    fn string_hash_agrees_with_equality() {
        init();
        let a = py_create_string("hello");
        let b = py_create_string("hello");
        let c = py_create_string("world");
        assert!(objects_equal(a, b));
        assert_eq!(hash_value(a), hash_value(b));
        assert!(!objects_equal(a, c));
        py_decref(a);
        py_decref(b);
        py_decref(c);
    }

    #[test]
    fn none_equals_only_none() {
        init();
        let none = py_get_none();
        let zero = py_create_int(0);
        assert!(objects_equal(none, py_get_none()));
        assert!(!objects_equal(none, zero));
        assert!(!objects_equal(zero, none));
        assert_eq!(hash_value(none), Some(0));
        py_decref(zero);
    }

    #[test]
    fn lists_and_dicts_are_unhashable() {
        init();
        let list = py_create_list(0, type_ids::INT);
        let dict = py_create_dict(8, type_ids::STRING);
        assert_eq!(hash_value(list), None);
        assert_eq!(hash_value(dict), None);
        py_decref(list);
        py_decref(dict);
    }

    #[test]
    fn huge_equal_ints_hash_alike() {
        init();
        let a = py_create_int_from_string("340282366920938463463374607431768211456", 10);
        let b = py_create_int_from_string("340282366920938463463374607431768211456", 10);
        assert!(objects_equal(a, b));
        assert_eq!(hash_value(a), hash_value(b));
        py_decref(a);
        py_decref(b);
    }

    #[test]
    fn parameterized_ids_fall_back_to_base_tables() {
        init();
        let methods = py_get_type_methods(type_ids::list_of(type_ids::INT));
        assert!(methods.is_some());
        assert!(methods.unwrap().index_get.is_some());
    }

    #[test]
    fn unsupported_index_reports_type_error() {
        init();
        crate::io::capture_start();
        let n = py_create_int(3);
        let k = py_create_int(0);
        assert!(py_object_index(n, k).is_null());
        let (_, err) = crate::io::capture_take();
        assert!(err.contains("TypeError"));
        py_decref(n);
        py_decref(k);
    }

    #[test]
    fn len_dispatches_by_type() {
        init();
        let s = py_create_string("abcd");
        assert_eq!(py_object_len(s), 4);
        py_decref(s);

        let list = py_create_list(0, type_ids::INT);
        assert_eq!(py_object_len(list), 0);
        py_decref(list);
    }

    #[test]
    fn obj_ref_reads_equals_result() {
        init();
        let a = py_create_int(5);
        let b = py_create_int(5);
        let result = py_object_equals(a, b);
        assert_eq!(unsafe { obj_ref(result) }.as_bool(), Some(true));
        py_decref(result);
        py_decref(a);
        py_decref(b);
    }
}
