//! The type-ID space shared by the compiler and the runtime.
//!
//! Every value in a compiled program carries a non-negative `i32` type ID in
//! its object header. IDs below [`LIST_BASE`] name a concrete category
//! directly; IDs at or above it encode a parameterized container as
//! `base_offset + element_id` (`list[int]` is `LIST_BASE + INT`). The
//! compiler's registry, the inferencer, and the runtime dispatch tables all
//! key off these values, so they are fixed for the lifetime of a program.

/// The `None` singleton.
pub const NONE: i32 = 0;
/// Arbitrary-precision integer.
pub const INT: i32 = 1;
/// Arbitrary-precision float at the working precision.
pub const FLOAT: i32 = 2;
/// Boolean.
pub const BOOL: i32 = 3;
/// Immutable string.
pub const STRING: i32 = 4;
/// List with unparameterized element type.
pub const LIST: i32 = 5;
/// Dict with unparameterized key type.
pub const DICT: i32 = 6;
/// Function object.
pub const FUNC: i32 = 7;
/// Tuple (reserved; no surface syntax constructs one yet).
pub const TUPLE: i32 = 8;
/// The dynamic "any" category.
pub const ANY: i32 = 9;
/// Class object.
pub const CLASS: i32 = 10;
/// Class instance.
pub const INSTANCE: i32 = 11;
/// Module object (reserved).
pub const MODULE: i32 = 12;
/// Bound method (reserved).
pub const METHOD: i32 = 13;
/// Iterator over a list.
pub const LIST_ITERATOR: i32 = 14;
/// Iterator over a string.
pub const STRING_ITERATOR: i32 = 15;

/// First parameterized `list[T]` ID; `LIST_BASE + id(T)`.
pub const LIST_BASE: i32 = 100;
/// First parameterized `dict[K]` ID; `DICT_BASE + id(K)`.
pub const DICT_BASE: i32 = 200;
/// First parameterized function-signature ID.
pub const FUNC_BASE: i32 = 300;
/// First parameterized instance ID.
pub const INSTANCE_BASE: i32 = 400;
/// IDs at or above this value are pointer-forwarding cells.
pub const PTR: i32 = 500;

/// Strip container/iterator parameterization from a type ID.
///
/// Non-parameterized IDs map to themselves, so `base_of(base_of(id))`
/// is always `base_of(id)`.
pub fn base_of(type_id: i32) -> i32 {
    match type_id {
        id if id >= PTR => PTR,
        id if id >= INSTANCE_BASE => INSTANCE,
        id if id >= FUNC_BASE => FUNC,
        id if id >= DICT_BASE => DICT,
        id if id >= LIST_BASE => LIST,
        id => id,
    }
}

/// The parameterized ID for `list[elem]`.
pub fn list_of(elem_type_id: i32) -> i32 {
    LIST_BASE + elem_type_id
}

/// The parameterized ID for `dict[key]` (dicts are keyed on the key type;
/// value types flow through inference as `ANY`).
pub fn dict_of(key_type_id: i32) -> i32 {
    DICT_BASE + key_type_id
}

/// Extract the element ID from a `list[T]` ID; plain `LIST` yields `ANY`.
pub fn list_elem_of(type_id: i32) -> i32 {
    if (LIST_BASE..DICT_BASE).contains(&type_id) {
        type_id - LIST_BASE
    } else {
        ANY
    }
}

/// Extract the key ID from a `dict[K]` ID; plain `DICT` yields `ANY`.
pub fn dict_key_of(type_id: i32) -> i32 {
    if (DICT_BASE..FUNC_BASE).contains(&type_id) {
        type_id - DICT_BASE
    } else {
        ANY
    }
}

/// True for `INT`, `FLOAT`, and `BOOL` bases.
pub fn is_numeric(type_id: i32) -> bool {
    matches!(base_of(type_id), INT | FLOAT | BOOL)
}

/// True for bases whose payload owns further object references.
pub fn is_container(type_id: i32) -> bool {
    matches!(base_of(type_id), LIST | DICT | TUPLE)
}

/// True for bases a `for` loop can iterate.
pub fn is_sequence(type_id: i32) -> bool {
    matches!(base_of(type_id), LIST | TUPLE | STRING)
}

/// The printable name of a type ID, with `list[T]`/`dict[K]` display for
/// parameterized IDs.
pub fn name_of(type_id: i32) -> String {
    match base_of(type_id) {
        NONE => "None".to_string(),
        INT => "int".to_string(),
        FLOAT => "float".to_string(),
        BOOL => "bool".to_string(),
        STRING => "str".to_string(),
        LIST => {
            if type_id == LIST {
                "list".to_string()
            } else {
                format!("list[{}]", name_of(list_elem_of(type_id)))
            }
        }
        DICT => {
            if type_id == DICT {
                "dict".to_string()
            } else {
                format!("dict[{}]", name_of(dict_key_of(type_id)))
            }
        }
        FUNC => "function".to_string(),
        TUPLE => "tuple".to_string(),
        ANY => "any".to_string(),
        CLASS => "class".to_string(),
        INSTANCE => "instance".to_string(),
        MODULE => "module".to_string(),
        METHOD => "method".to_string(),
        LIST_ITERATOR => "list_iterator".to_string(),
        STRING_ITERATOR => "str_iterator".to_string(),
        other => format!("unknown_type({})", other),
    }
}

/// Compatibility check used by assignment validation and argument passing.
///
/// Two IDs are compatible when their bases are identical, when either side
/// is `ANY`, when both are numeric, or when both share the `LIST` (resp.
/// `DICT`) container base. Reflexive and symmetric by construction.
pub fn are_compatible(a: i32, b: i32) -> bool {
    if a == ANY || b == ANY {
        return true;
    }
    let (base_a, base_b) = (base_of(a), base_of(b));
    if base_a == base_b {
        return true;
    }
    is_numeric(a) && is_numeric(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_of_is_idempotent() {
        for id in [NONE, INT, FLOAT, BOOL, STRING, LIST, DICT, FUNC, ANY, CLASS] {
            assert_eq!(base_of(base_of(id)), base_of(id));
        }
        for id in [list_of(INT), dict_of(STRING), FUNC_BASE + 3, INSTANCE_BASE + 1, PTR + 7] {
            assert_eq!(base_of(base_of(id)), base_of(id));
        }
    }

    #[test]
    fn parameterized_ids_round_trip() {
        assert_eq!(base_of(list_of(INT)), LIST);
        assert_eq!(list_elem_of(list_of(INT)), INT);
        assert_eq!(list_elem_of(list_of(FLOAT)), FLOAT);
        assert_eq!(base_of(dict_of(STRING)), DICT);
        assert_eq!(dict_key_of(dict_of(STRING)), STRING);
        assert_eq!(list_elem_of(LIST), ANY);
        assert_eq!(dict_key_of(DICT), ANY);
    }

    #[test]
    fn compatibility_is_reflexive_and_symmetric() {
        let ids = [NONE, INT, FLOAT, BOOL, STRING, LIST, DICT, FUNC, ANY, list_of(INT), dict_of(STRING)];
        for &a in &ids {
            assert!(are_compatible(a, a), "{} not self-compatible", a);
            for &b in &ids {
                assert_eq!(are_compatible(a, b), are_compatible(b, a));
            }
        }
    }

    #[test]
    fn numeric_ids_are_mutually_compatible() {
        for &a in &[INT, FLOAT, BOOL] {
            for &b in &[INT, FLOAT, BOOL] {
                assert!(are_compatible(a, b));
            }
        }
        assert!(!are_compatible(INT, STRING));
        assert!(!are_compatible(LIST, DICT));
    }

    #[test]
    fn any_is_compatible_with_everything() {
        for id in [NONE, INT, FLOAT, BOOL, STRING, LIST, DICT, FUNC, CLASS, INSTANCE] {
            assert!(are_compatible(ANY, id));
            assert!(are_compatible(id, ANY));
        }
    }

    #[test]
    fn display_names() {
        assert_eq!(name_of(INT), "int");
        assert_eq!(name_of(list_of(INT)), "list[int]");
        assert_eq!(name_of(dict_of(STRING)), "dict[str]");
        assert_eq!(name_of(list_of(list_of(FLOAT))), "list[list[float]]");
    }
}
