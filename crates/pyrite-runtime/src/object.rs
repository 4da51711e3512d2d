//! The boxed object model.
//!
//! Every runtime value is a heap cell with a `{ ref_count, type_id }`
//! header and a type-specific payload. Cells are handed around as raw
//! [`PyObjectPtr`] pointers exactly the way generated code sees them:
//! constructors return a fresh owned reference (count 1), `py_incref` /
//! `py_decref` move ownership, and the finalizer that runs when the count
//! reaches zero releases the payload's child references before freeing the
//! cell. Mutation goes through interior-mutable payloads so that every
//! borrow of a cell stays shared.
//!
//! The runtime is single-threaded; all process-wide state (the `None`
//! singleton, the live-object counter) is thread-local.

use std::cell::{Cell, RefCell};
use std::str::FromStr;

use bigdecimal::BigDecimal;
use num_bigint::BigInt;
use num_traits::Zero;

use crate::error::{self, PyErrorKind};
use crate::type_ids;

/// Raw handle to a boxed object. Null is the universal error sentinel.
pub type PyObjectPtr = *mut PyObject;

/// Refcount value that disables counting; used by the `None` singleton.
const SATURATED: i32 = i32::MAX;

/// Working precision for float payloads, in bits of mantissa.
pub const DEFAULT_PRECISION_BITS: u32 = 128;

/// Decimal digits corresponding to a binary precision.
pub(crate) fn bits_to_digits(bits: u32) -> u64 {
    ((bits as f64) * 0.30103).ceil().max(1.0) as u64
}

/// Round a float payload to the fixed working precision.
pub(crate) fn round_working(value: BigDecimal) -> BigDecimal {
    value.with_prec(bits_to_digits(DEFAULT_PRECISION_BITS))
}

/// Render a float the way `print` shows it: integral values as `x.0`,
/// everything else in normalized decimal form.
pub fn format_float(value: &BigDecimal) -> String {
    if value.is_integer() {
        format!("{}.0", value.with_scale(0))
    } else {
        value.clone().normalized().to_string()
    }
}

// ---------------------------------------------------------------------------
// Layouts
// ---------------------------------------------------------------------------

/// A list payload: recorded element type plus owned element references.
pub struct PyList {
    pub elem_type_id: i32,
    pub items: Vec<PyObjectPtr>,
}

/// One slot of the open-addressed dict table.
pub struct PyDictEntry {
    pub key: PyObjectPtr,
    pub value: PyObjectPtr,
    pub hash: u64,
    pub used: bool,
}

/// A dict payload. `entries.len()` is the capacity and stays a power of
/// two; `size` counts used slots and is kept below two thirds of capacity.
pub struct PyDict {
    pub key_type_id: i32,
    pub size: usize,
    pub entries: Vec<PyDictEntry>,
}

/// A function payload: the module-level code index plus its signature ID.
pub struct PyFunction {
    pub code_ptr: usize,
    pub signature_type_id: i32,
}

/// A class payload. `base` and `class_dict` are owned references
/// (`base` may be null).
pub struct PyClass {
    pub name: String,
    pub base: PyObjectPtr,
    pub class_dict: PyObjectPtr,
}

/// An instance payload. Both fields are owned references.
pub struct PyInstance {
    pub class: PyObjectPtr,
    pub instance_dict: PyObjectPtr,
}

/// Iterator over a list; holds an owned reference to the iterable.
pub struct PyListIterator {
    pub iterable: PyObjectPtr,
    pub index: Cell<usize>,
}

/// Iterator over a string; `index` counts characters.
pub struct PyStringIterator {
    pub iterable: PyObjectPtr,
    pub index: Cell<usize>,
}

/// The type-specific payload of a heap cell.
pub enum PyPayload {
    None,
    Int(BigInt),
    Float(BigDecimal),
    Bool(bool),
    Str(String),
    List(RefCell<PyList>),
    Dict(RefCell<PyDict>),
    Function(PyFunction),
    Class(PyClass),
    Instance(PyInstance),
    ListIter(PyListIterator),
    StrIter(PyStringIterator),
}

/// A heap cell: common header plus payload. The `type_id` never changes
/// after construction.
pub struct PyObject {
    ref_count: Cell<i32>,
    type_id: i32,
    payload: PyPayload,
}

impl PyObject {
    pub fn type_id(&self) -> i32 {
        self.type_id
    }

    pub fn type_id_base(&self) -> i32 {
        type_ids::base_of(self.type_id)
    }

    pub fn ref_count(&self) -> i32 {
        self.ref_count.get()
    }

    pub fn as_int(&self) -> Option<&BigInt> {
        match &self.payload {
            PyPayload::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<&BigDecimal> {
        match &self.payload {
            PyPayload::Float(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match &self.payload {
            PyPayload::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.payload {
            PyPayload::Str(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&RefCell<PyList>> {
        match &self.payload {
            PyPayload::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&RefCell<PyDict>> {
        match &self.payload {
            PyPayload::Dict(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&PyFunction> {
        match &self.payload {
            PyPayload::Function(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_class(&self) -> Option<&PyClass> {
        match &self.payload {
            PyPayload::Class(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&PyInstance> {
        match &self.payload {
            PyPayload::Instance(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list_iter(&self) -> Option<&PyListIterator> {
        match &self.payload {
            PyPayload::ListIter(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str_iter(&self) -> Option<&PyStringIterator> {
        match &self.payload {
            PyPayload::StrIter(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self.payload, PyPayload::None)
    }
}

/// Borrow the cell behind a raw handle.
///
/// # Safety
/// `ptr` must point at a live object allocated by this module.
pub unsafe fn obj_ref<'a>(ptr: PyObjectPtr) -> &'a PyObject {
    unsafe { &*ptr }
}

/// Checked borrow: null maps to `None`.
pub fn try_ref<'a>(ptr: PyObjectPtr) -> Option<&'a PyObject> {
    if ptr.is_null() {
        None
    } else {
        Some(unsafe { obj_ref(ptr) })
    }
}

/// The type ID of an object, treating null as `None`.
pub fn py_get_object_type_id(obj: PyObjectPtr) -> i32 {
    try_ref(obj).map(|o| o.type_id()).unwrap_or(type_ids::NONE)
}

// ---------------------------------------------------------------------------
// Allocation and reference counting
// ---------------------------------------------------------------------------

thread_local! {
    static LIVE_OBJECTS: Cell<usize> = const { Cell::new(0) };
    static NONE_SINGLETON: Cell<PyObjectPtr> = const { Cell::new(std::ptr::null_mut()) };
}

/// Number of live counted heap cells on this thread. The `None` singleton
/// is excluded. Test harnesses use this to assert that dropped references
/// actually freed their objects.
pub fn live_object_count() -> usize {
    LIVE_OBJECTS.with(|c| c.get())
}

fn alloc(type_id: i32, payload: PyPayload) -> PyObjectPtr {
    LIVE_OBJECTS.with(|c| c.set(c.get() + 1));
    Box::into_raw(Box::new(PyObject {
        ref_count: Cell::new(1),
        type_id,
        payload,
    }))
}

/// Increment an object's reference count. Saturated counts stay put.
pub fn py_incref(obj: PyObjectPtr) {
    let Some(r) = try_ref(obj) else { return };
    let count = r.ref_count.get();
    if count != SATURATED {
        r.ref_count.set(count + 1);
    }
}

/// Release one owned reference; frees the object when the count reaches
/// zero. Container destruction recursively releases children.
pub fn py_decref(obj: PyObjectPtr) {
    let Some(r) = try_ref(obj) else { return };
    let count = r.ref_count.get();
    if count == SATURATED {
        return;
    }
    if count <= 1 {
        finalize(obj);
    } else {
        r.ref_count.set(count - 1);
    }
}

fn finalize(obj: PyObjectPtr) {
    // Take the box back first so a buggy re-entrant decref on the same
    // pointer cannot double-free.
    let boxed = unsafe { Box::from_raw(obj) };
    LIVE_OBJECTS.with(|c| c.set(c.get().saturating_sub(1)));
    match boxed.payload {
        PyPayload::List(cell) => {
            for item in cell.into_inner().items {
                py_decref(item);
            }
        }
        PyPayload::Dict(cell) => {
            for entry in cell.into_inner().entries {
                if entry.used {
                    py_decref(entry.key);
                    py_decref(entry.value);
                }
            }
        }
        PyPayload::Class(class) => {
            py_decref(class.base);
            py_decref(class.class_dict);
        }
        PyPayload::Instance(inst) => {
            py_decref(inst.class);
            py_decref(inst.instance_dict);
        }
        PyPayload::ListIter(iter) => py_decref(iter.iterable),
        PyPayload::StrIter(iter) => py_decref(iter.iterable),
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Constructors
// ---------------------------------------------------------------------------

/// Box a machine integer.
pub fn py_create_int(value: i64) -> PyObjectPtr {
    alloc(type_ids::INT, PyPayload::Int(BigInt::from(value)))
}

/// Box an arbitrary-precision integer (runtime-internal).
pub(crate) fn create_int(value: BigInt) -> PyObjectPtr {
    alloc(type_ids::INT, PyPayload::Int(value))
}

/// Box a float, rounding to the working precision (runtime-internal).
pub(crate) fn create_float(value: BigDecimal) -> PyObjectPtr {
    alloc(type_ids::FLOAT, PyPayload::Float(round_working(value)))
}

/// Parse an integer literal conveyed in its textual form.
///
/// The text travels verbatim from the source program so no host-width
/// truncation can occur. Returns null and reports `ValueError` on
/// malformed input.
pub fn py_create_int_from_string(text: &str, base: u32) -> PyObjectPtr {
    match BigInt::parse_bytes(text.trim().as_bytes(), base) {
        Some(value) => create_int(value),
        None => {
            error::raise(
                PyErrorKind::Value,
                format_args!("invalid literal for int with base {}: '{}'", base, text),
            );
            std::ptr::null_mut()
        }
    }
}

/// Parse a float literal conveyed in its textual form at the given
/// precision. Only base 10 is supported; the working precision is fixed,
/// so `precision_bits` beyond it round down.
pub fn py_create_double_from_string(text: &str, base: u32, precision_bits: u32) -> PyObjectPtr {
    if base != 10 {
        error::raise(
            PyErrorKind::Value,
            format_args!("float parsing supports base 10, got {}", base),
        );
        return std::ptr::null_mut();
    }
    match BigDecimal::from_str(text.trim()) {
        Ok(value) => {
            let digits = bits_to_digits(precision_bits.min(DEFAULT_PRECISION_BITS));
            alloc(type_ids::FLOAT, PyPayload::Float(value.with_prec(digits)))
        }
        Err(_) => {
            error::raise(
                PyErrorKind::Value,
                format_args!("could not convert string to float: '{}'", text),
            );
            std::ptr::null_mut()
        }
    }
}

/// Box a boolean.
pub fn py_create_bool(value: bool) -> PyObjectPtr {
    alloc(type_ids::BOOL, PyPayload::Bool(value))
}

/// Box a string. Strings are immutable after creation.
pub fn py_create_string(text: &str) -> PyObjectPtr {
    alloc(type_ids::STRING, PyPayload::Str(text.to_string()))
}

/// Create an empty list with reserved capacity and a recorded element type.
pub fn py_create_list(capacity: i32, elem_type_id: i32) -> PyObjectPtr {
    let reserve = capacity.max(0) as usize;
    alloc(
        type_ids::LIST,
        PyPayload::List(RefCell::new(PyList {
            elem_type_id,
            items: Vec::with_capacity(reserve),
        })),
    )
}

/// Create an empty dict with at least the requested capacity (rounded up
/// to a power of two, minimum 8) and a recorded key type.
pub fn py_create_dict(capacity: i32, key_type_id: i32) -> PyObjectPtr {
    let requested = capacity.max(0) as usize;
    let cap = requested.next_power_of_two().max(8);
    let entries = (0..cap)
        .map(|_| PyDictEntry {
            key: std::ptr::null_mut(),
            value: std::ptr::null_mut(),
            hash: 0,
            used: false,
        })
        .collect();
    alloc(
        type_ids::DICT,
        PyPayload::Dict(RefCell::new(PyDict {
            key_type_id,
            size: 0,
            entries,
        })),
    )
}

/// The process-wide `None` singleton. Its reference count is saturated so
/// it survives any number of `py_decref` calls.
pub fn py_get_none() -> PyObjectPtr {
    NONE_SINGLETON.with(|cell| {
        let existing = cell.get();
        if !existing.is_null() {
            return existing;
        }
        let ptr = Box::into_raw(Box::new(PyObject {
            ref_count: Cell::new(SATURATED),
            type_id: type_ids::NONE,
            payload: PyPayload::None,
        }));
        cell.set(ptr);
        ptr
    })
}

/// Create a function object wrapping a compiled code index.
pub fn py_create_function(code_ptr: usize, signature_type_id: i32) -> PyObjectPtr {
    alloc(
        type_ids::FUNC,
        PyPayload::Function(PyFunction {
            code_ptr,
            signature_type_id,
        }),
    )
}

/// Create a class object. Takes its own references on `base` (nullable)
/// and `class_dict`.
pub fn py_create_class(name: &str, base: PyObjectPtr, class_dict: PyObjectPtr) -> PyObjectPtr {
    if class_dict.is_null() {
        error::raise(PyErrorKind::Type, "class requires a dict object");
        return std::ptr::null_mut();
    }
    py_incref(base);
    py_incref(class_dict);
    alloc(
        type_ids::CLASS,
        PyPayload::Class(PyClass {
            name: name.to_string(),
            base,
            class_dict,
        }),
    )
}

/// Allocate a fresh instance of a class with an empty instance dict.
pub fn py_create_instance(cls: PyObjectPtr) -> PyObjectPtr {
    let Some(r) = try_ref(cls) else {
        error::raise(PyErrorKind::Type, "cannot instantiate a null class");
        return std::ptr::null_mut();
    };
    if r.as_class().is_none() {
        error::raise(
            PyErrorKind::Type,
            format_args!("'{}' object is not a class", type_ids::name_of(r.type_id())),
        );
        return std::ptr::null_mut();
    }
    let instance_dict = py_create_dict(8, type_ids::STRING);
    py_incref(cls);
    alloc(
        type_ids::INSTANCE,
        PyPayload::Instance(PyInstance {
            class: cls,
            instance_dict,
        }),
    )
}

/// Create a list iterator. Takes its own reference on the list.
pub(crate) fn create_list_iterator(list: PyObjectPtr) -> PyObjectPtr {
    py_incref(list);
    alloc(
        type_ids::LIST_ITERATOR,
        PyPayload::ListIter(PyListIterator {
            iterable: list,
            index: Cell::new(0),
        }),
    )
}

/// Create a string iterator. Takes its own reference on the string.
pub(crate) fn create_string_iterator(string: PyObjectPtr) -> PyObjectPtr {
    py_incref(string);
    alloc(
        type_ids::STRING_ITERATOR,
        PyPayload::StrIter(PyStringIterator {
            iterable: string,
            index: Cell::new(0),
        }),
    )
}

/// Shallow copy used by `py_object_copy`: primitives clone their payload,
/// lists clone the spine (bumping each child), everything else hands back
/// the same object with an extra reference.
pub fn py_object_copy(obj: PyObjectPtr, type_id: i32) -> PyObjectPtr {
    let Some(r) = try_ref(obj) else {
        return std::ptr::null_mut();
    };
    let _ = type_id;
    match &r.payload {
        PyPayload::Int(v) => create_int(v.clone()),
        PyPayload::Float(v) => alloc(type_ids::FLOAT, PyPayload::Float(v.clone())),
        PyPayload::Bool(v) => py_create_bool(*v),
        PyPayload::Str(v) => py_create_string(v),
        PyPayload::List(cell) => {
            let src = cell.borrow();
            let copy = py_create_list(src.items.len() as i32, src.elem_type_id);
            let copy_ref = unsafe { obj_ref(copy) };
            let mut dst = copy_ref.as_list().expect("fresh list").borrow_mut();
            for &item in &src.items {
                py_incref(item);
                dst.items.push(item);
            }
            drop(dst);
            copy
        }
        _ => {
            py_incref(obj);
            obj
        }
    }
}

/// True when the payload is numerically zero (used by truthiness).
pub(crate) fn numeric_is_zero(r: &PyObject) -> bool {
    match &r.payload {
        PyPayload::Int(v) => v.is_zero(),
        PyPayload::Float(v) => v.is_zero(),
        PyPayload::Bool(v) => !*v,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_objects_start_with_one_reference() {
        let n = py_create_int(7);
        assert_eq!(unsafe { obj_ref(n) }.ref_count(), 1);
        py_decref(n);
    }

    #[test]
    fn decref_to_zero_frees() {
        let before = live_object_count();
        let n = py_create_int(7);
        assert_eq!(live_object_count(), before + 1);
        py_incref(n);
        py_decref(n);
        assert_eq!(live_object_count(), before + 1);
        py_decref(n);
        assert_eq!(live_object_count(), before);
    }

    #[test]
    fn none_is_a_saturated_singleton() {
        let a = py_get_none();
        let b = py_get_none();
        assert_eq!(a, b);
        py_decref(a);
        py_decref(a);
        assert!(unsafe { obj_ref(a) }.is_none());
    }

    #[test]
    fn list_destruction_releases_elements() {
        let before = live_object_count();
        let item = py_create_int(1);
        let list = py_create_list(4, type_ids::INT);
        {
            let r = unsafe { obj_ref(list) };
            py_incref(item);
            r.as_list().unwrap().borrow_mut().items.push(item);
        }
        py_decref(item);
        assert_eq!(live_object_count(), before + 2);
        py_decref(list);
        assert_eq!(live_object_count(), before);
    }

    #[test]
    fn int_from_string_round_trips_text() {
        let n = py_create_int_from_string("2432902008176640000", 10);
        let r = unsafe { obj_ref(n) };
        assert_eq!(r.as_int().unwrap().to_string(), "2432902008176640000");
        py_decref(n);

        let big = py_create_int_from_string("123456789012345678901234567890", 10);
        let r = unsafe { obj_ref(big) };
        assert_eq!(
            r.as_int().unwrap().to_string(),
            "123456789012345678901234567890"
        );
        py_decref(big);
    }

    #[test]
    fn malformed_int_text_is_a_value_error() {
        crate::io::capture_start();
        let n = py_create_int_from_string("12x", 10);
        let (_, err) = crate::io::capture_take();
        assert!(n.is_null());
        assert!(err.contains("ValueError"));
    }

    #[test]
    fn float_round_trip_is_idempotent() {
        let f = py_create_double_from_string("3.140625", 10, DEFAULT_PRECISION_BITS);
        let first = format_float(unsafe { obj_ref(f) }.as_float().unwrap());
        let g = py_create_double_from_string(&first, 10, DEFAULT_PRECISION_BITS);
        let second = format_float(unsafe { obj_ref(g) }.as_float().unwrap());
        assert_eq!(first, second);
        py_decref(f);
        py_decref(g);
    }

    #[test]
    fn integral_floats_format_with_trailing_zero() {
        let f = py_create_double_from_string("4", 10, DEFAULT_PRECISION_BITS);
        assert_eq!(format_float(unsafe { obj_ref(f) }.as_float().unwrap()), "4.0");
        py_decref(f);
    }

    #[test]
    fn dict_capacity_is_a_power_of_two() {
        let d = py_create_dict(5, type_ids::STRING);
        let r = unsafe { obj_ref(d) };
        let cap = r.as_dict().unwrap().borrow().entries.len();
        assert!(cap.is_power_of_two());
        assert!(cap >= 8);
        py_decref(d);
    }
}
