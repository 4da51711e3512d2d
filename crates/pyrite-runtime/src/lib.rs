//! pyrite-runtime — the object model and operation kernels that compiled
//! pyrite programs link against.
//!
//! Every value a compiled program touches is a reference-counted heap cell
//! (see [`object`]); generated code manipulates cells exclusively through
//! the flat ABI re-exported from this crate root (`py_create_*`,
//! `py_object_*`, `py_incref`/`py_decref`, ...). Dispatchable behavior —
//! indexing, length, attributes, hashing, equality — routes through the
//! per-type method tables in [`dispatch`], installed once per program by
//! `py_initialize_builtin_type_methods` from the module's global
//! constructor.
//!
//! The numeric kernels use arbitrary-precision integers and fixed-working-
//! precision decimals, so literal text of any width survives compilation
//! untouched.
//!
//! The runtime is single-threaded by design: nothing here is `Sync`, and
//! process-wide state (the `None` singleton, the dispatch registry, the
//! output sink) is thread-local.

pub mod arith;
pub mod compare;
pub mod container;
pub mod convert;
pub mod dispatch;
pub mod error;
pub mod io;
pub mod object;
pub mod type_ids;

pub use arith::{
    py_object_add, py_object_and, py_object_bitnot, py_object_divide, py_object_floor_divide,
    py_object_lshift, py_object_modulo, py_object_multiply, py_object_negate, py_object_not,
    py_object_or, py_object_power, py_object_rshift, py_object_subtract, py_object_xor,
};
pub use compare::{
    py_compare_eq, py_compare_ne, py_compare_op_name, py_object_compare, CMP_EQ, CMP_GE, CMP_GT,
    CMP_LE, CMP_LT, CMP_NE,
};
pub use container::{
    py_dict_get_item, py_dict_keys, py_dict_len, py_dict_set_item, py_get_list_element_type_id,
    py_iter_next, py_list_append, py_list_get_item, py_list_len, py_list_set_item,
    py_object_get_iter, py_string_get_char, py_string_len,
};
pub use convert::{
    py_convert_to_float, py_convert_to_int, py_convert_to_string, py_object_to_bool,
    py_object_to_exit_code, py_smart_convert,
};
pub use dispatch::{
    class_chain_lookup, py_get_type_methods, py_hash_object, py_initialize_builtin_type_methods, py_object_equals,
    py_object_getattr, py_object_index, py_object_len, py_object_set_index, py_object_setattr,
    py_register_type_methods, PyTypeMethods,
};
pub use error::{py_runtime_error, PyErrorKind};
pub use io::{py_object_repr, py_object_str, py_print_object};
pub use object::{
    live_object_count, py_create_bool, py_create_class, py_create_dict,
    py_create_double_from_string, py_create_function, py_create_instance, py_create_int,
    py_create_int_from_string, py_create_list, py_create_string, py_decref, py_get_none,
    py_get_object_type_id, py_incref, py_object_copy, PyObject, PyObjectPtr,
    DEFAULT_PRECISION_BITS,
};
