//! Cross-cutting object-model invariants exercised through the public
//! ABI surface, the way generated code drives it.

use pyrite_runtime::{
    live_object_count, py_compare_eq, py_create_bool, py_create_dict,
    py_create_double_from_string, py_create_int, py_create_int_from_string, py_create_list,
    py_create_string, py_decref, py_dict_get_item, py_dict_set_item, py_get_none, py_hash_object,
    py_incref, py_initialize_builtin_type_methods, py_list_append, py_list_get_item, py_list_len,
    py_object_add, py_object_compare, py_object_floor_divide, py_object_modulo,
    py_object_multiply, py_object_to_bool, py_smart_convert, type_ids, PyObjectPtr,
    DEFAULT_PRECISION_BITS,
};

fn int(v: i64) -> PyObjectPtr {
    py_create_int(v)
}

fn as_int_string(obj: PyObjectPtr) -> String {
    let r = unsafe { pyrite_runtime::object::obj_ref(obj) };
    r.as_int().unwrap().to_string()
}

#[test]
fn dropping_the_last_reference_frees_the_object() {
    py_initialize_builtin_type_methods();
    let before = live_object_count();

    let list = py_create_list(0, type_ids::INT);
    let item = int(1);
    py_list_append(list, item);
    py_incref(item);
    assert!(live_object_count() > before);

    py_decref(item); // the extra reference
    py_decref(item); // the creation reference; the list still owns one
    let fetched = py_list_get_item(list, 0);
    assert_eq!(as_int_string(fetched), "1");
    py_decref(fetched);

    py_decref(list);
    assert_eq!(live_object_count(), before);
}

#[test]
fn hash_agrees_with_equality_across_numeric_types() {
    py_initialize_builtin_type_methods();
    let two = int(2);
    let two_float = py_create_double_from_string("2.0", 10, DEFAULT_PRECISION_BITS);
    let one = int(1);
    let yes = py_create_bool(true);
    let zero = int(0);
    let no = py_create_bool(false);

    for (a, b) in [(two, two_float), (one, yes), (zero, no)] {
        assert!(py_compare_eq(a, b));
        assert_eq!(py_hash_object(a), py_hash_object(b));
    }

    for obj in [two, two_float, one, yes, zero, no] {
        py_decref(obj);
    }
}

#[test]
fn int_round_trips_its_decimal_text() {
    for text in ["0", "7", "-13", "123456789012345678901234567890"] {
        let n = py_create_int_from_string(text, 10);
        assert_eq!(as_int_string(n), text);
        py_decref(n);
    }
}

#[test]
fn float_text_round_trip_is_idempotent() {
    for text in ["1.5", "0.125", "-42.0", "2.718281828459045"] {
        let a = py_create_double_from_string(text, 10, DEFAULT_PRECISION_BITS);
        let first = {
            let r = unsafe { pyrite_runtime::object::obj_ref(a) };
            pyrite_runtime::object::format_float(r.as_float().unwrap())
        };
        let b = py_create_double_from_string(&first, 10, DEFAULT_PRECISION_BITS);
        let second = {
            let r = unsafe { pyrite_runtime::object::obj_ref(b) };
            pyrite_runtime::object::format_float(r.as_float().unwrap())
        };
        assert_eq!(first, second);
        py_decref(a);
        py_decref(b);
    }
}

#[test]
fn concatenated_lists_preserve_length_and_order() {
    let a = py_create_list(0, type_ids::INT);
    let b = py_create_list(0, type_ids::INT);
    for v in 0..4 {
        let item = int(v);
        py_list_append(a, item);
        py_decref(item);
    }
    for v in 4..7 {
        let item = int(v);
        py_list_append(b, item);
        py_decref(item);
    }
    let joined = py_object_add(a, b);
    assert_eq!(py_list_len(joined), 7);
    for i in 0..7 {
        let item = py_list_get_item(joined, i);
        assert_eq!(as_int_string(item), i.to_string());
        py_decref(item);
    }
    py_decref(a);
    py_decref(b);
    py_decref(joined);
}

#[test]
fn floor_division_identity_over_a_grid() {
    for x in [-25i64, -9, -1, 0, 3, 14, 100] {
        for y in [-7i64, -3, 2, 5] {
            let a = int(x);
            let b = int(y);
            let quotient = py_object_floor_divide(a, b);
            let remainder = py_object_modulo(a, b);
            let product = py_object_multiply(quotient, b);
            let back = py_object_add(product, remainder);
            assert_eq!(as_int_string(back), x.to_string(), "x={} y={}", x, y);
            for obj in [a, b, quotient, remainder, product, back] {
                py_decref(obj);
            }
        }
    }
}

#[test]
fn dict_holds_many_keys_through_resizes() {
    py_initialize_builtin_type_methods();
    let dict = py_create_dict(8, type_ids::STRING);
    for i in 0..200 {
        let key = py_create_string(&format!("key-{}", i));
        let value = int(i);
        assert!(py_dict_set_item(dict, key, value));
        py_decref(key);
        py_decref(value);
    }
    for i in 0..200 {
        let key = py_create_string(&format!("key-{}", i));
        let value = py_dict_get_item(dict, key);
        assert_eq!(as_int_string(value), i.to_string());
        py_decref(value);
        py_decref(key);
    }
    py_decref(dict);
}

#[test]
fn comparisons_and_truthiness() {
    py_initialize_builtin_type_methods();
    let three = int(3);
    let five = int(5);
    let verdict = py_object_compare(three, five, pyrite_runtime::CMP_LT);
    assert!(py_object_to_bool(verdict));
    py_decref(verdict);

    assert!(!py_object_to_bool(py_get_none()));
    let empty = py_create_string("");
    assert!(!py_object_to_bool(empty));
    py_decref(empty);
    py_decref(three);
    py_decref(five);
}

#[test]
fn smart_convert_bridges_the_numeric_ladder() {
    py_initialize_builtin_type_methods();
    let yes = py_create_bool(true);
    let as_int = py_smart_convert(yes, type_ids::INT);
    assert_eq!(as_int_string(as_int), "1");

    let as_float = py_smart_convert(as_int, type_ids::FLOAT);
    let text = {
        let r = unsafe { pyrite_runtime::object::obj_ref(as_float) };
        pyrite_runtime::object::format_float(r.as_float().unwrap())
    };
    assert_eq!(text, "1.0");

    py_decref(yes);
    py_decref(as_int);
    py_decref(as_float);
}
