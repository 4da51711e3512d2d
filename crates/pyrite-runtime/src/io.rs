//! Printing and output-sink plumbing.
//!
//! `py_print_object` implements the `print` statement: the top-level form
//! prints strings unquoted, while elements nested inside containers print
//! in repr form (strings single-quoted). Output flows through a
//! thread-local sink so an embedding driver can capture what a program
//! writes instead of letting it hit the process streams.

use std::cell::RefCell;
use std::io::Write;

use crate::object::{self, PyObjectPtr};
use crate::type_ids;

thread_local! {
    static CAPTURE_OUT: RefCell<Option<String>> = const { RefCell::new(None) };
    static CAPTURE_ERR: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Begin capturing stdout/stderr writes for the current thread.
///
/// Any previously captured text is discarded.
pub fn capture_start() {
    CAPTURE_OUT.with(|c| *c.borrow_mut() = Some(String::new()));
    CAPTURE_ERR.with(|c| *c.borrow_mut() = Some(String::new()));
}

/// Stop capturing and return the accumulated (stdout, stderr) text.
pub fn capture_take() -> (String, String) {
    let out = CAPTURE_OUT.with(|c| c.borrow_mut().take()).unwrap_or_default();
    let err = CAPTURE_ERR.with(|c| c.borrow_mut().take()).unwrap_or_default();
    (out, err)
}

/// Write to the captured stdout stream, or the real one when not capturing.
pub fn write_out(text: &str) {
    let captured = CAPTURE_OUT.with(|c| {
        if let Some(buf) = c.borrow_mut().as_mut() {
            buf.push_str(text);
            true
        } else {
            false
        }
    });
    if !captured {
        let mut stdout = std::io::stdout();
        let _ = stdout.write_all(text.as_bytes());
    }
}

/// Write to the captured stderr stream, or the real one when not capturing.
pub fn write_err(text: &str) {
    let captured = CAPTURE_ERR.with(|c| {
        if let Some(buf) = c.borrow_mut().as_mut() {
            buf.push_str(text);
            true
        } else {
            false
        }
    });
    if !captured {
        let mut stderr = std::io::stderr();
        let _ = stderr.write_all(text.as_bytes());
    }
}

/// Print an object followed by a newline, Python `print` style.
pub fn py_print_object(obj: PyObjectPtr) {
    let mut text = format_object(obj, false);
    text.push('\n');
    write_out(&text);
}

/// Render an object in its top-level print form.
pub fn py_object_str(obj: PyObjectPtr) -> String {
    format_object(obj, false)
}

/// Render an object in repr form (strings quoted).
pub fn py_object_repr(obj: PyObjectPtr) -> String {
    format_object(obj, true)
}

fn format_object(obj: PyObjectPtr, repr: bool) -> String {
    if obj.is_null() {
        return "None".to_string();
    }
    let r = unsafe { object::obj_ref(obj) };
    match r.type_id_base() {
        type_ids::NONE => "None".to_string(),
        type_ids::INT => r.as_int().map(|v| v.to_string()).unwrap_or_default(),
        type_ids::FLOAT => r.as_float().map(object::format_float).unwrap_or_default(),
        type_ids::BOOL => {
            if r.as_bool().unwrap_or(false) {
                "True".to_string()
            } else {
                "False".to_string()
            }
        }
        type_ids::STRING => {
            let s = r.as_str().unwrap_or_default();
            if repr {
                format!("'{}'", s)
            } else {
                s.to_string()
            }
        }
        type_ids::LIST => {
            let list = match r.as_list() {
                Some(l) => l,
                None => return String::new(),
            };
            let items = list.borrow();
            let mut out = String::from("[");
            for (i, &item) in items.items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&format_object(item, true));
            }
            out.push(']');
            out
        }
        type_ids::DICT => {
            let dict = match r.as_dict() {
                Some(d) => d,
                None => return String::new(),
            };
            let table = dict.borrow();
            let mut out = String::from("{");
            let mut first = true;
            for entry in table.entries.iter().filter(|e| e.used) {
                if !first {
                    out.push_str(", ");
                }
                first = false;
                out.push_str(&format_object(entry.key, true));
                out.push_str(": ");
                out.push_str(&format_object(entry.value, true));
            }
            out.push('}');
            out
        }
        type_ids::FUNC => format!("<function object at {:p}>", obj),
        type_ids::CLASS => {
            let name = r.as_class().map(|c| c.name.clone()).unwrap_or_default();
            format!("<class '{}'>", name)
        }
        type_ids::INSTANCE => {
            let class_name = r
                .as_instance()
                .map(|inst| unsafe { object::obj_ref(inst.class) })
                .and_then(|c| c.as_class().map(|c| c.name.clone()))
                .unwrap_or_default();
            format!("<{} instance at {:p}>", class_name, obj)
        }
        other => format!("<object type {} at {:p}>", type_ids::name_of(other), obj),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{
        py_create_bool, py_create_int_from_string, py_create_list, py_create_string, py_decref,
        py_get_none,
    };
    use crate::container::py_list_append;

    #[test]
    fn capture_collects_prints() {
        capture_start();
        let n = py_create_int_from_string("42", 10);
        py_print_object(n);
        py_decref(n);
        let (out, err) = capture_take();
        assert_eq!(out, "42\n");
        assert_eq!(err, "");
    }

    #[test]
    fn top_level_strings_are_unquoted_but_nested_are_quoted() {
        let s = py_create_string("hi");
        assert_eq!(py_object_str(s), "hi");

        let list = py_create_list(2, crate::type_ids::STRING);
        py_list_append(list, s);
        assert_eq!(py_object_str(list), "['hi']");
        py_decref(list);
        py_decref(s);
    }

    #[test]
    fn bool_and_none_forms() {
        let t = py_create_bool(true);
        let f = py_create_bool(false);
        assert_eq!(py_object_str(t), "True");
        assert_eq!(py_object_str(f), "False");
        assert_eq!(py_object_str(py_get_none()), "None");
        py_decref(t);
        py_decref(f);
    }
}
