//! List, dict, string, and iterator operations.
//!
//! These are the kernels behind the generic `py_object_index` /
//! `py_object_set_index` / `py_object_len` dispatch slots as well as the
//! list/dict literal helpers the compiler emits directly
//! (`py_list_append`, `py_dict_set_item`).
//!
//! Ownership rules: getters return a fresh owned reference; setters take
//! their own references on stored keys/values and release whatever they
//! replace. Failures report through the error sink and return null (or
//! `false` for setters).

use crate::dispatch;
use crate::error::{self, PyErrorKind};
use crate::object::{
    self, create_list_iterator, create_string_iterator, obj_ref, py_create_bool, py_create_string,
    py_decref, py_incref, try_ref, PyDict, PyObjectPtr,
};
use crate::type_ids;

// ---------------------------------------------------------------------------
// Lists
// ---------------------------------------------------------------------------

/// Length of a list, or -1 for a non-list.
pub fn py_list_len(obj: PyObjectPtr) -> i32 {
    match try_ref(obj).and_then(|r| r.as_list()) {
        Some(list) => list.borrow().items.len() as i32,
        None => -1,
    }
}

/// Read `list[index]` with Python negative-index wrapping.
///
/// Returns a fresh owned reference, or null with `IndexError` /
/// `TypeError` reported.
pub fn py_list_get_item(obj: PyObjectPtr, index: i32) -> PyObjectPtr {
    let Some(list) = try_ref(obj).and_then(|r| r.as_list()) else {
        error::raise(PyErrorKind::Type, "object is not a list");
        return std::ptr::null_mut();
    };
    let items = &list.borrow().items;
    match resolve_index(index, items.len()) {
        Some(i) => {
            let item = items[i];
            py_incref(item);
            item
        }
        None => {
            error::raise(PyErrorKind::Index, "list index out of range");
            std::ptr::null_mut()
        }
    }
}

/// Write `list[index] = item`, releasing the old element and retaining the
/// new one. Out-of-range indices report `IndexError`.
pub fn py_list_set_item(obj: PyObjectPtr, index: i32, item: PyObjectPtr) -> bool {
    let Some(list) = try_ref(obj).and_then(|r| r.as_list()) else {
        error::raise(PyErrorKind::Type, "object is not a list");
        return false;
    };
    let mut borrowed = list.borrow_mut();
    let len = borrowed.items.len();
    match resolve_index(index, len) {
        Some(i) => {
            let old = borrowed.items[i];
            py_incref(item);
            borrowed.items[i] = item;
            drop(borrowed);
            py_decref(old);
            true
        }
        None => {
            error::raise(PyErrorKind::Index, "list assignment index out of range");
            false
        }
    }
}

/// Append an item, retaining it. Capacity grows geometrically with the
/// backing vector. Returns the list for the caller's convenience.
pub fn py_list_append(obj: PyObjectPtr, item: PyObjectPtr) -> PyObjectPtr {
    let Some(list) = try_ref(obj).and_then(|r| r.as_list()) else {
        error::raise(PyErrorKind::Type, "object is not a list");
        return std::ptr::null_mut();
    };
    py_incref(item);
    list.borrow_mut().items.push(item);
    obj
}

/// Concatenate two lists into a fresh list.
///
/// The element type widens to `any` when the inputs disagree on a
/// specific element type.
pub fn list_concat(a: PyObjectPtr, b: PyObjectPtr) -> PyObjectPtr {
    let (Some(left), Some(right)) = (
        try_ref(a).and_then(|r| r.as_list()),
        try_ref(b).and_then(|r| r.as_list()),
    ) else {
        error::raise(PyErrorKind::Type, "can only concatenate list to list");
        return std::ptr::null_mut();
    };
    let left = left.borrow();
    let right = right.borrow();
    let elem_type = if left.elem_type_id == right.elem_type_id {
        left.elem_type_id
    } else {
        type_ids::ANY
    };
    let out = object::py_create_list((left.items.len() + right.items.len()) as i32, elem_type);
    let out_list = unsafe { obj_ref(out) }.as_list().expect("fresh list");
    let mut dst = out_list.borrow_mut();
    for &item in left.items.iter().chain(right.items.iter()) {
        py_incref(item);
        dst.items.push(item);
    }
    drop(dst);
    out
}

/// Repeat a list `count` times (`count <= 0` yields an empty list), bumping
/// each child reference once per copy.
pub fn list_repeat(obj: PyObjectPtr, count: i64) -> PyObjectPtr {
    let Some(list) = try_ref(obj).and_then(|r| r.as_list()) else {
        error::raise(PyErrorKind::Type, "object is not a list");
        return std::ptr::null_mut();
    };
    let src = list.borrow();
    let times = count.max(0) as usize;
    let out = object::py_create_list((src.items.len() * times) as i32, src.elem_type_id);
    let out_list = unsafe { obj_ref(out) }.as_list().expect("fresh list");
    let mut dst = out_list.borrow_mut();
    for _ in 0..times {
        for &item in src.items.iter() {
            py_incref(item);
            dst.items.push(item);
        }
    }
    drop(dst);
    out
}

/// The recorded element type of a list, `ANY` for non-lists.
pub fn py_get_list_element_type_id(obj: PyObjectPtr) -> i32 {
    try_ref(obj)
        .and_then(|r| r.as_list())
        .map(|l| l.borrow().elem_type_id)
        .unwrap_or(type_ids::ANY)
}

fn resolve_index(index: i32, len: usize) -> Option<usize> {
    let len = len as i64;
    let idx = index as i64;
    let resolved = if idx < 0 { len + idx } else { idx };
    if (0..len).contains(&resolved) {
        Some(resolved as usize)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Dicts
// ---------------------------------------------------------------------------

/// Number of entries in a dict, or -1 for a non-dict.
pub fn py_dict_len(obj: PyObjectPtr) -> i32 {
    match try_ref(obj).and_then(|r| r.as_dict()) {
        Some(dict) => dict.borrow().size as i32,
        None => -1,
    }
}

/// Look up `dict[key]`. Returns a fresh owned reference, or null with
/// `KeyError` reported (or `TypeError` for an unhashable key).
pub fn py_dict_get_item(obj: PyObjectPtr, key: PyObjectPtr) -> PyObjectPtr {
    let Some(dict) = try_ref(obj).and_then(|r| r.as_dict()) else {
        error::raise(PyErrorKind::Type, "object is not a dict");
        return std::ptr::null_mut();
    };
    let Some(hash) = dispatch::hash_value(key) else {
        error::raise(PyErrorKind::Type, "unhashable key");
        return std::ptr::null_mut();
    };
    let table = dict.borrow();
    match find_entry(&table, key, hash) {
        Some(slot) if table.entries[slot].used => {
            let value = table.entries[slot].value;
            py_incref(value);
            value
        }
        _ => {
            error::raise(
                PyErrorKind::Key,
                crate::io::py_object_repr(key),
            );
            std::ptr::null_mut()
        }
    }
}

/// Insert or replace `dict[key] = value`.
///
/// Probing walks from `hash & (cap - 1)`: a slot holding an equal key has
/// its value replaced (old released, new retained); the first empty slot
/// takes the new pair (both retained). When the load factor reaches 2/3
/// the table rehashes into `max(cap * 2, 8)` slots.
pub fn py_dict_set_item(obj: PyObjectPtr, key: PyObjectPtr, value: PyObjectPtr) -> bool {
    let Some(dict) = try_ref(obj).and_then(|r| r.as_dict()) else {
        error::raise(PyErrorKind::Type, "object is not a dict");
        return false;
    };
    let Some(hash) = dispatch::hash_value(key) else {
        error::raise(PyErrorKind::Type, "unhashable key");
        return false;
    };
    let mut table = dict.borrow_mut();
    let slot = match find_entry(&table, key, hash) {
        Some(slot) => slot,
        None => {
            // Table somehow full; force a resize and retry.
            resize(&mut table);
            find_entry(&table, key, hash).expect("resized table has a free slot")
        }
    };
    if table.entries[slot].used {
        let old = table.entries[slot].value;
        py_incref(value);
        table.entries[slot].value = value;
        drop(table);
        py_decref(old);
        return true;
    }
    py_incref(key);
    py_incref(value);
    let entry = &mut table.entries[slot];
    entry.key = key;
    entry.value = value;
    entry.hash = hash;
    entry.used = true;
    table.size += 1;
    if table.size * 3 >= table.entries.len() * 2 {
        resize(&mut table);
    }
    true
}

/// Build a list of the dict's keys in probe order.
pub fn py_dict_keys(obj: PyObjectPtr) -> PyObjectPtr {
    let Some(dict) = try_ref(obj).and_then(|r| r.as_dict()) else {
        error::raise(PyErrorKind::Type, "object is not a dict");
        return std::ptr::null_mut();
    };
    let table = dict.borrow();
    let out = object::py_create_list(table.size as i32, table.key_type_id);
    let out_list = unsafe { obj_ref(out) }.as_list().expect("fresh list");
    let mut dst = out_list.borrow_mut();
    for entry in table.entries.iter().filter(|e| e.used) {
        py_incref(entry.key);
        dst.items.push(entry.key);
    }
    drop(dst);
    out
}

/// Find the slot for `key`: either the used slot whose key equals it or
/// the first free slot of its probe sequence. `None` only for a full table.
fn find_entry(table: &PyDict, key: PyObjectPtr, hash: u64) -> Option<usize> {
    let cap = table.entries.len();
    if cap == 0 {
        return None;
    }
    let mask = cap - 1;
    let mut slot = (hash as usize) & mask;
    for _ in 0..cap {
        let entry = &table.entries[slot];
        if !entry.used {
            return Some(slot);
        }
        if entry.hash == hash && dispatch::objects_equal(entry.key, key) {
            return Some(slot);
        }
        slot = (slot + 1) & mask;
    }
    None
}

fn resize(table: &mut PyDict) {
    let new_cap = (table.entries.len() * 2).max(8);
    let old: Vec<_> = std::mem::take(&mut table.entries);
    table.entries = (0..new_cap)
        .map(|_| crate::object::PyDictEntry {
            key: std::ptr::null_mut(),
            value: std::ptr::null_mut(),
            hash: 0,
            used: false,
        })
        .collect();
    let mask = new_cap - 1;
    for entry in old.into_iter().filter(|e| e.used) {
        let mut slot = (entry.hash as usize) & mask;
        while table.entries[slot].used {
            slot = (slot + 1) & mask;
        }
        table.entries[slot] = entry;
    }
}

/// String-keyed lookup used by attribute access; avoids allocating a key
/// object. Returns a fresh owned reference or null (no error reported).
pub(crate) fn dict_get_str(obj: PyObjectPtr, key: &str) -> PyObjectPtr {
    let Some(dict) = try_ref(obj).and_then(|r| r.as_dict()) else {
        return std::ptr::null_mut();
    };
    let hash = dispatch::hash_str(key);
    let table = dict.borrow();
    let cap = table.entries.len();
    let mask = cap - 1;
    let mut slot = (hash as usize) & mask;
    for _ in 0..cap {
        let entry = &table.entries[slot];
        if !entry.used {
            return std::ptr::null_mut();
        }
        if entry.hash == hash {
            if let Some(existing) = try_ref(entry.key).and_then(|r| r.as_str()) {
                if existing == key {
                    py_incref(entry.value);
                    return entry.value;
                }
            }
        }
        slot = (slot + 1) & mask;
    }
    std::ptr::null_mut()
}

/// String-keyed insert used by attribute assignment.
pub(crate) fn dict_set_str(obj: PyObjectPtr, key: &str, value: PyObjectPtr) -> bool {
    let key_obj = py_create_string(key);
    let ok = py_dict_set_item(obj, key_obj, value);
    py_decref(key_obj);
    ok
}

// ---------------------------------------------------------------------------
// Strings
// ---------------------------------------------------------------------------

/// Character count of a string, or -1 for a non-string.
pub fn py_string_len(obj: PyObjectPtr) -> i32 {
    match try_ref(obj).and_then(|r| r.as_str()) {
        Some(s) => s.chars().count() as i32,
        None => -1,
    }
}

/// Read a one-character string at `index` (negative indices wrap).
pub fn py_string_get_char(obj: PyObjectPtr, index: i32) -> PyObjectPtr {
    let Some(s) = try_ref(obj).and_then(|r| r.as_str()) else {
        error::raise(PyErrorKind::Type, "object is not a string");
        return std::ptr::null_mut();
    };
    let len = s.chars().count();
    match resolve_index(index, len) {
        Some(i) => {
            let ch = s.chars().nth(i).expect("index checked");
            py_create_string(&ch.to_string())
        }
        None => {
            error::raise(PyErrorKind::Index, "string index out of range");
            std::ptr::null_mut()
        }
    }
}

/// String concatenation.
pub fn string_concat(a: PyObjectPtr, b: PyObjectPtr) -> PyObjectPtr {
    let (Some(left), Some(right)) = (
        try_ref(a).and_then(|r| r.as_str()),
        try_ref(b).and_then(|r| r.as_str()),
    ) else {
        error::raise(PyErrorKind::Type, "can only concatenate str to str");
        return std::ptr::null_mut();
    };
    py_create_string(&format!("{}{}", left, right))
}

/// String repetition; `count <= 0` yields the empty string.
pub fn string_repeat(obj: PyObjectPtr, count: i64) -> PyObjectPtr {
    let Some(s) = try_ref(obj).and_then(|r| r.as_str()) else {
        error::raise(PyErrorKind::Type, "object is not a string");
        return std::ptr::null_mut();
    };
    if count <= 0 {
        py_create_string("")
    } else {
        py_create_string(&s.repeat(count as usize))
    }
}

// ---------------------------------------------------------------------------
// Iteration protocol
// ---------------------------------------------------------------------------

/// Create an iterator over a list or string. Other types report
/// `TypeError` and yield null.
pub fn py_object_get_iter(obj: PyObjectPtr) -> PyObjectPtr {
    let Some(r) = try_ref(obj) else {
        error::raise(PyErrorKind::Type, "object is not iterable");
        return std::ptr::null_mut();
    };
    match r.type_id_base() {
        type_ids::LIST => create_list_iterator(obj),
        type_ids::STRING => create_string_iterator(obj),
        other => {
            error::raise(
                PyErrorKind::Type,
                format_args!("'{}' object is not iterable", type_ids::name_of(other)),
            );
            std::ptr::null_mut()
        }
    }
}

/// Advance an iterator. Returns the next element as a fresh owned
/// reference, or null on exhaustion (the `StopIteration` signal).
pub fn py_iter_next(iter: PyObjectPtr) -> PyObjectPtr {
    let Some(r) = try_ref(iter) else {
        return std::ptr::null_mut();
    };
    if let Some(list_iter) = r.as_list_iter() {
        let Some(list) = try_ref(list_iter.iterable).and_then(|l| l.as_list()) else {
            return std::ptr::null_mut();
        };
        let items = list.borrow();
        let index = list_iter.index.get();
        if index >= items.items.len() {
            return std::ptr::null_mut();
        }
        list_iter.index.set(index + 1);
        let item = items.items[index];
        py_incref(item);
        return item;
    }
    if let Some(str_iter) = r.as_str_iter() {
        let Some(s) = try_ref(str_iter.iterable).and_then(|o| o.as_str()) else {
            return std::ptr::null_mut();
        };
        let index = str_iter.index.get();
        match s.chars().nth(index) {
            Some(ch) => {
                str_iter.index.set(index + 1);
                return py_create_string(&ch.to_string());
            }
            None => return std::ptr::null_mut(),
        }
    }
    error::raise(PyErrorKind::Type, "object is not an iterator");
    std::ptr::null_mut()
}

// ---------------------------------------------------------------------------
// Dispatch-slot handlers
// ---------------------------------------------------------------------------

pub(crate) fn list_index_get_handler(container: PyObjectPtr, key: PyObjectPtr) -> PyObjectPtr {
    match index_as_i32(key) {
        Some(i) => py_list_get_item(container, i),
        None => {
            error::raise(PyErrorKind::Type, "list indices must be integers");
            std::ptr::null_mut()
        }
    }
}

pub(crate) fn list_index_set_handler(
    container: PyObjectPtr,
    key: PyObjectPtr,
    value: PyObjectPtr,
) -> bool {
    match index_as_i32(key) {
        Some(i) => py_list_set_item(container, i, value),
        None => {
            error::raise(PyErrorKind::Type, "list indices must be integers");
            false
        }
    }
}

pub(crate) fn dict_index_get_handler(container: PyObjectPtr, key: PyObjectPtr) -> PyObjectPtr {
    py_dict_get_item(container, key)
}

pub(crate) fn dict_index_set_handler(
    container: PyObjectPtr,
    key: PyObjectPtr,
    value: PyObjectPtr,
) -> bool {
    py_dict_set_item(container, key, value)
}

pub(crate) fn string_index_get_handler(container: PyObjectPtr, key: PyObjectPtr) -> PyObjectPtr {
    match index_as_i32(key) {
        Some(i) => py_string_get_char(container, i),
        None => {
            error::raise(PyErrorKind::Type, "string indices must be integers");
            std::ptr::null_mut()
        }
    }
}

pub(crate) fn list_len_handler(obj: PyObjectPtr) -> i32 {
    py_list_len(obj)
}

pub(crate) fn dict_len_handler(obj: PyObjectPtr) -> i32 {
    py_dict_len(obj)
}

pub(crate) fn string_len_handler(obj: PyObjectPtr) -> i32 {
    py_string_len(obj)
}

/// Interpret an index object as a machine integer (bools count as 0/1).
fn index_as_i32(key: PyObjectPtr) -> Option<i32> {
    use num_traits::ToPrimitive;
    let r = try_ref(key)?;
    if let Some(v) = r.as_int() {
        return v.to_i32();
    }
    r.as_bool().map(|b| b as i32)
}

/// Element-wise list equality (used by the `equals` dispatch slot).
pub(crate) fn list_equals_handler(a: PyObjectPtr, b: PyObjectPtr) -> PyObjectPtr {
    let (Some(left), Some(right)) = (
        try_ref(a).and_then(|r| r.as_list()),
        try_ref(b).and_then(|r| r.as_list()),
    ) else {
        return py_create_bool(false);
    };
    let left = left.borrow();
    let right = right.borrow();
    if left.items.len() != right.items.len() {
        return py_create_bool(false);
    }
    for (&x, &y) in left.items.iter().zip(right.items.iter()) {
        if !dispatch::objects_equal(x, y) {
            return py_create_bool(false);
        }
    }
    py_create_bool(true)
}

/// Key-wise dict equality.
pub(crate) fn dict_equals_handler(a: PyObjectPtr, b: PyObjectPtr) -> PyObjectPtr {
    let (Some(left), Some(right)) = (
        try_ref(a).and_then(|r| r.as_dict()),
        try_ref(b).and_then(|r| r.as_dict()),
    ) else {
        return py_create_bool(false);
    };
    if left.borrow().size != right.borrow().size {
        return py_create_bool(false);
    }
    let table = left.borrow();
    for entry in table.entries.iter().filter(|e| e.used) {
        let other = py_dict_get_item_quiet(b, entry.key);
        if other.is_null() {
            return py_create_bool(false);
        }
        let equal = dispatch::objects_equal(entry.value, other);
        py_decref(other);
        if !equal {
            return py_create_bool(false);
        }
    }
    py_create_bool(true)
}

/// Lookup without a `KeyError` report, for equality checks.
fn py_dict_get_item_quiet(obj: PyObjectPtr, key: PyObjectPtr) -> PyObjectPtr {
    let Some(dict) = try_ref(obj).and_then(|r| r.as_dict()) else {
        return std::ptr::null_mut();
    };
    let Some(hash) = dispatch::hash_value(key) else {
        return std::ptr::null_mut();
    };
    let table = dict.borrow();
    match find_entry(&table, key, hash) {
        Some(slot) if table.entries[slot].used => {
            let value = table.entries[slot].value;
            py_incref(value);
            value
        }
        _ => std::ptr::null_mut(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{live_object_count, py_create_int, py_create_list, py_create_dict};

    fn int(v: i64) -> PyObjectPtr {
        py_create_int(v)
    }

    #[test]
    fn list_append_and_index() {
        let list = py_create_list(0, type_ids::INT);
        for v in [10, 20, 30] {
            let item = int(v);
            py_list_append(list, item);
            py_decref(item);
        }
        assert_eq!(py_list_len(list), 3);

        let second = py_list_get_item(list, 1);
        assert_eq!(unsafe { obj_ref(second) }.as_int().unwrap().to_string(), "20");
        py_decref(second);

        let last = py_list_get_item(list, -1);
        assert_eq!(unsafe { obj_ref(last) }.as_int().unwrap().to_string(), "30");
        py_decref(last);

        py_decref(list);
    }

    #[test]
    fn list_negative_index_out_of_range() {
        crate::io::capture_start();
        let list = py_create_list(0, type_ids::INT);
        let item = int(1);
        py_list_append(list, item);
        py_decref(item);
        assert!(py_list_get_item(list, -2).is_null());
        assert!(py_list_get_item(list, 1).is_null());
        let (_, err) = crate::io::capture_take();
        assert!(err.contains("IndexError"));
        py_decref(list);
    }

    #[test]
    fn list_set_item_swaps_references() {
        let before = live_object_count();
        let list = py_create_list(0, type_ids::INT);
        let a = int(1);
        py_list_append(list, a);
        py_decref(a);

        let b = int(2);
        assert!(py_list_set_item(list, 0, b));
        py_decref(b);

        let got = py_list_get_item(list, 0);
        assert_eq!(unsafe { obj_ref(got) }.as_int().unwrap().to_string(), "2");
        py_decref(got);
        py_decref(list);
        assert_eq!(live_object_count(), before);
    }

    #[test]
    fn empty_concat_widens_to_any() {
        let a = py_create_list(0, type_ids::INT);
        let b = py_create_list(0, type_ids::STRING);
        let c = list_concat(a, b);
        assert_eq!(py_list_len(c), 0);
        assert_eq!(py_get_list_element_type_id(c), type_ids::ANY);
        py_decref(a);
        py_decref(b);
        py_decref(c);
    }

    #[test]
    fn concat_preserves_order_and_length() {
        let a = py_create_list(0, type_ids::INT);
        let b = py_create_list(0, type_ids::INT);
        for v in [1, 2] {
            let item = int(v);
            py_list_append(a, item);
            py_decref(item);
        }
        for v in [3, 4, 5] {
            let item = int(v);
            py_list_append(b, item);
            py_decref(item);
        }
        let c = list_concat(a, b);
        assert_eq!(py_list_len(c), 5);
        for (i, expected) in [1, 2, 3, 4, 5].iter().enumerate() {
            let item = py_list_get_item(c, i as i32);
            assert_eq!(
                unsafe { obj_ref(item) }.as_int().unwrap().to_string(),
                expected.to_string()
            );
            py_decref(item);
        }
        py_decref(a);
        py_decref(b);
        py_decref(c);
    }

    #[test]
    fn repeat_zero_and_negative_are_empty() {
        let a = py_create_list(0, type_ids::INT);
        let item = int(1);
        py_list_append(a, item);
        py_decref(item);

        let zero = list_repeat(a, 0);
        let neg = list_repeat(a, -3);
        assert_eq!(py_list_len(zero), 0);
        assert_eq!(py_list_len(neg), 0);
        py_decref(zero);
        py_decref(neg);
        py_decref(a);
    }

    #[test]
    fn dict_insert_replace_and_load_factor() {
        crate::dispatch::py_initialize_builtin_type_methods();
        let dict = py_create_dict(8, type_ids::STRING);
        for i in 0..40 {
            let key = py_create_string(&format!("k{}", i));
            let value = int(i);
            assert!(py_dict_set_item(dict, key, value));
            py_decref(key);
            py_decref(value);
        }
        {
            let r = unsafe { obj_ref(dict) };
            let table = r.as_dict().unwrap().borrow();
            assert_eq!(table.size, 40);
            assert!(table.entries.len().is_power_of_two());
            assert!(table.size * 3 < table.entries.len() * 2);
            assert_eq!(table.size, table.entries.iter().filter(|e| e.used).count());
        }

        // Replacement keeps size constant.
        let key = py_create_string("k7");
        let value = int(700);
        assert!(py_dict_set_item(dict, key, value));
        py_decref(value);
        let got = py_dict_get_item(dict, key);
        assert_eq!(unsafe { obj_ref(got) }.as_int().unwrap().to_string(), "700");
        py_decref(got);
        py_decref(key);
        assert_eq!(py_dict_len(dict), 40);
        py_decref(dict);
    }

    #[test]
    fn missing_key_reports_key_error() {
        crate::dispatch::py_initialize_builtin_type_methods();
        crate::io::capture_start();
        let dict = py_create_dict(8, type_ids::STRING);
        let key = py_create_string("absent");
        assert!(py_dict_get_item(dict, key).is_null());
        let (_, err) = crate::io::capture_take();
        assert!(err.contains("KeyError"));
        py_decref(key);
        py_decref(dict);
    }

    #[test]
    fn string_indexing_yields_single_characters() {
        let s = py_create_string("abc");
        let first = py_string_get_char(s, 0);
        let last = py_string_get_char(s, -1);
        assert_eq!(unsafe { obj_ref(first) }.as_str().unwrap(), "a");
        assert_eq!(unsafe { obj_ref(last) }.as_str().unwrap(), "c");
        py_decref(first);
        py_decref(last);
        py_decref(s);
    }

    #[test]
    fn iterators_walk_and_release() {
        let before = live_object_count();
        let list = py_create_list(0, type_ids::INT);
        for v in [1, 2] {
            let item = int(v);
            py_list_append(list, item);
            py_decref(item);
        }
        let iter = py_object_get_iter(list);
        let mut seen = Vec::new();
        loop {
            let next = py_iter_next(iter);
            if next.is_null() {
                break;
            }
            seen.push(unsafe { obj_ref(next) }.as_int().unwrap().to_string());
            py_decref(next);
        }
        assert_eq!(seen, ["1", "2"]);
        py_decref(iter);
        py_decref(list);
        assert_eq!(live_object_count(), before);
    }
}
