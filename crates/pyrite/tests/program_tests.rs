//! End-to-end programs: compile, verify, execute, and check the exit
//! code plus captured stdout.

use pretty_assertions::assert_eq;
use pyrite::{run_source, Compiler, Error};

fn run_ok(source: &str) -> (i32, String) {
    let outcome = run_source(source).unwrap_or_else(|e| panic!("{}:\n{}", e, e.render()));
    (outcome.exit_code, outcome.stdout)
}

#[test]
fn trivial_main_exits_zero() {
    let (code, out) = run_ok("def main():\n    return 0\n");
    assert_eq!(code, 0);
    assert_eq!(out, "");
}

#[test]
fn arithmetic_precedence() {
    let (code, out) = run_ok(
        "def main():\n    print(1 + 2 * 3)\n    return 0\n",
    );
    assert_eq!(code, 0);
    assert_eq!(out, "7\n");
}

#[test]
fn list_literal_and_indexed_assignment() {
    let source = "\
def main():
    a = [1, 2, 3]
    a[1] = 20
    print(a)
    return 0
";
    let (code, out) = run_ok(source);
    assert_eq!(code, 0);
    assert_eq!(out, "[1, 20, 3]\n");
}

#[test]
fn recursive_factorial_is_exact_past_machine_width() {
    let source = "\
def fact(n):
    if n <= 1:
        return 1
    return n * fact(n - 1)

def main():
    print(fact(20))
    return 0
";
    let (code, out) = run_ok(source);
    assert_eq!(code, 0);
    assert_eq!(out, "2432902008176640000\n");
}

#[test]
fn factorial_beyond_sixty_four_bits() {
    let source = "\
def fact(n):
    if n <= 1:
        return 1
    return n * fact(n - 1)

def main():
    print(fact(30))
    return 0
";
    let (code, out) = run_ok(source);
    assert_eq!(code, 0);
    assert_eq!(out, "265252859812191058636308480000000\n");
}

#[test]
fn dict_insert_and_lookup() {
    let source = "\
def main():
    d = {\"a\": 1}
    d[\"b\"] = 2
    print(d[\"a\"] + d[\"b\"])
    return 0
";
    let (code, out) = run_ok(source);
    assert_eq!(code, 0);
    assert_eq!(out, "3\n");
}

#[test]
fn while_loop_accumulates() {
    let source = "\
def main():
    i = 0
    s = 0
    while i < 10:
        s = s + i
        i = i + 1
    print(s)
    return 0
";
    let (code, out) = run_ok(source);
    assert_eq!(code, 0);
    assert_eq!(out, "45\n");
}

#[test]
fn while_with_conditional_update() {
    let source = "\
def main():
    i = 0
    evens = 0
    while i < 10:
        if i % 2 == 0:
            evens = evens + 1
        i = i + 1
    print(evens)
    return 0
";
    let (code, out) = run_ok(source);
    assert_eq!(code, 0);
    assert_eq!(out, "5\n");
}

#[test]
fn while_with_break_and_continue() {
    let source = "\
def main():
    i = 0
    total = 0
    while True:
        i = i + 1
        if i > 100:
            break
        if i % 2 == 0:
            continue
        if i > 9:
            break
        total = total + i
    print(total)
    return 0
";
    let (code, out) = run_ok(source);
    assert_eq!(code, 0);
    assert_eq!(out, "25\n");
}

#[test]
fn for_loop_over_list() {
    let source = "\
def main():
    total = 0
    for x in [1, 2, 3, 4]:
        total = total + x
    print(total)
    return 0
";
    let (code, out) = run_ok(source);
    assert_eq!(code, 0);
    assert_eq!(out, "10\n");
}

#[test]
fn for_loop_over_string() {
    let source = "\
def main():
    count = 0
    for ch in \"hello\":
        count = count + 1
    print(count)
    return 0
";
    let (code, out) = run_ok(source);
    assert_eq!(code, 0);
    assert_eq!(out, "5\n");
}

#[test]
fn elif_chain_converges() {
    let source = "\
def classify(n):
    if n < 0:
        return -1
    elif n == 0:
        return 0
    else:
        return 1

def main():
    print(classify(-5))
    print(classify(0))
    print(classify(17))
    return 0
";
    let (code, out) = run_ok(source);
    assert_eq!(code, 0);
    assert_eq!(out, "-1\n0\n1\n");
}

#[test]
fn true_division_prints_float() {
    let (code, out) = run_ok("def main():\n    print(10 / 4)\n    return 0\n");
    assert_eq!(code, 0);
    assert_eq!(out, "2.5\n");
}

#[test]
fn integral_float_prints_with_suffix() {
    let (code, out) = run_ok("def main():\n    print(8 / 4)\n    return 0\n");
    assert_eq!(code, 0);
    assert_eq!(out, "2.0\n");
}

#[test]
fn float_literals_survive_verbatim() {
    let (code, out) = run_ok("def main():\n    print(0.1 + 0.2)\n    return 0\n");
    assert_eq!(code, 0);
    assert_eq!(out, "0.3\n");
}

#[test]
fn floor_division_and_modulo() {
    let source = "\
def main():
    print(7 // 2)
    print(-7 // 2)
    print(7 % 3)
    print(-7 % 3)
    return 0
";
    let (code, out) = run_ok(source);
    assert_eq!(code, 0);
    assert_eq!(out, "3\n-4\n1\n2\n");
}

#[test]
fn comparison_prints_bool() {
    let source = "\
def main():
    print(1 < 2)
    print(2 < 1)
    print(\"apple\" < \"banana\")
    return 0
";
    let (code, out) = run_ok(source);
    assert_eq!(code, 0);
    assert_eq!(out, "True\nFalse\nTrue\n");
}

#[test]
fn boolean_operators_short_circuit() {
    let source = "\
def main():
    print(True and False)
    print(False or True)
    print(not 0)
    return 0
";
    let (code, out) = run_ok(source);
    assert_eq!(code, 0);
    assert_eq!(out, "False\nTrue\nTrue\n");
}

#[test]
fn conversion_builtins() {
    let source = "\
def main():
    print(int(\"42\") + 1)
    print(float(3))
    print(str(12) + \"!\")
    print(bool(0))
    return 0
";
    let (code, out) = run_ok(source);
    assert_eq!(code, 0);
    assert_eq!(out, "43\n3.0\n12!\nFalse\n");
}

#[test]
fn len_builtin() {
    let source = "\
def main():
    print(len(\"hello\"))
    print(len([1, 2, 3]))
    return 0
";
    let (code, out) = run_ok(source);
    assert_eq!(code, 0);
    assert_eq!(out, "5\n3\n");
}

#[test]
fn string_concat_and_repeat() {
    let source = "\
def main():
    print(\"ab\" + \"cd\")
    print(\"ab\" * 3)
    print(\"hello\"[1])
    print(\"hello\"[-1])
    return 0
";
    let (code, out) = run_ok(source);
    assert_eq!(code, 0);
    assert_eq!(out, "abcd\nababab\ne\no\n");
}

#[test]
fn list_concat_repeat_and_negative_index() {
    let source = "\
def main():
    a = [1, 2] + [3]
    print(a)
    print(a[-1])
    print([7] * 3)
    print([1] * 0)
    return 0
";
    let (code, out) = run_ok(source);
    assert_eq!(code, 0);
    assert_eq!(out, "[1, 2, 3]\n3\n[7, 7, 7]\n[]\n");
}

#[test]
fn nested_containers_print_in_repr_form() {
    let source = "\
def main():
    print([\"a\", \"b\"])
    print([[1, 2], [3]])
    return 0
";
    let (code, out) = run_ok(source);
    assert_eq!(code, 0);
    assert_eq!(out, "['a', 'b']\n[[1, 2], [3]]\n");
}

#[test]
fn module_globals_are_visible_in_functions() {
    let source = "\
base = 40

def add_base(n):
    return base + n

def main():
    print(add_base(2))
    return 0
";
    let (code, out) = run_ok(source);
    assert_eq!(code, 0);
    assert_eq!(out, "42\n");
}

#[test]
fn annotated_signatures_stay_typed() {
    let source = "\
def scale(n: int, factor: int) -> int:
    return n * factor

def main():
    print(scale(6, 7))
    return 0
";
    let (code, out) = run_ok(source);
    assert_eq!(code, 0);
    assert_eq!(out, "42\n");
}

#[test]
fn augmented_assignment() {
    let source = "\
def main():
    x = 10
    x += 5
    x *= 2
    print(x)
    return 0
";
    let (code, out) = run_ok(source);
    assert_eq!(code, 0);
    assert_eq!(out, "30\n");
}

#[test]
fn classes_with_methods_and_attributes() {
    let source = "\
class Point:
    def __init__(self, x, y):
        self.x = x
        self.y = y

    def total(self):
        return self.x + self.y

def main():
    p = Point(3, 4)
    print(p.total())
    p.x = 30
    print(p.total())
    return 0
";
    let (code, out) = run_ok(source);
    assert_eq!(code, 0);
    assert_eq!(out, "7\n34\n");
}

#[test]
fn single_inheritance_finds_base_methods() {
    let source = "\
class Animal:
    def legs(self):
        return 4

class Dog(Animal):
    def sound(self):
        return \"woof\"

def main():
    d = Dog()
    print(d.legs())
    print(d.sound())
    return 0
";
    let (code, out) = run_ok(source);
    assert_eq!(code, 0);
    assert_eq!(out, "4\nwoof\n");
}

#[test]
fn exit_code_comes_from_main() {
    let (code, out) = run_ok("def main():\n    return 3\n");
    assert_eq!(code, 3);
    assert_eq!(out, "");
}

#[test]
fn none_return_exits_zero() {
    let (code, _) = run_ok("def main():\n    return None\n");
    assert_eq!(code, 0);

    let (code, _) = run_ok("def main():\n    x = 1\n");
    assert_eq!(code, 0);
}

#[test]
fn missing_main_exits_one() {
    let (code, out) = run_ok("x = 5\n");
    assert_eq!(code, 1);
    assert_eq!(out, "");
}

#[test]
fn division_by_zero_reports_and_exits_nonzero() {
    let outcome = run_source("def main():\n    return 1 / 0\n").unwrap();
    assert_eq!(outcome.exit_code, 1);
    assert!(outcome.stderr.contains("ZeroDivisionError"));
}

#[test]
fn out_of_range_index_reports() {
    let source = "\
def main():
    a = [1]
    return a[5]
";
    let outcome = run_source(source).unwrap();
    assert_eq!(outcome.exit_code, 1);
    assert!(outcome.stderr.contains("IndexError"));
}

#[test]
fn power_semantics() {
    let source = "\
def main():
    print(2 ** 10)
    print(2 ** 0)
    print(0 ** 0)
    print(2 ** -2)
    return 0
";
    let (code, out) = run_ok(source);
    assert_eq!(code, 0);
    assert_eq!(out, "1024\n1\n1\n0.25\n");
}

#[test]
fn bitwise_operators() {
    let source = "\
def main():
    print(12 & 10)
    print(12 | 3)
    print(12 ^ 10)
    print(1 << 6)
    print(64 >> 3)
    print(~5)
    return 0
";
    let (code, out) = run_ok(source);
    assert_eq!(code, 0);
    assert_eq!(out, "8\n15\n6\n64\n8\n-6\n");
}

#[test]
fn equality_with_none() {
    let source = "\
def main():
    x = None
    print(x == None)
    print(x is None)
    print(1 == None)
    return 0
";
    let (code, out) = run_ok(source);
    assert_eq!(code, 0);
    assert_eq!(out, "True\nTrue\nFalse\n");
}

#[test]
fn unknown_name_fails_the_build() {
    let err = Compiler::compile("def main():\n    return zzz\n").unwrap_err();
    match err {
        Error::Build(errors) => {
            assert!(errors
                .iter()
                .any(|e| matches!(e, Error::UnknownName { name, .. } if name == "zzz")));
        }
        other => panic!("expected a build failure, got {}", other),
    }
}

#[test]
fn incompatible_reassignment_fails_the_build() {
    let source = "\
def main():
    x = 1
    x = \"oops\"
    return 0
";
    let err = Compiler::compile(source).unwrap_err();
    match err {
        Error::Build(errors) => {
            assert!(errors
                .iter()
                .any(|e| matches!(e, Error::InvalidAssignment { .. })));
        }
        other => panic!("expected a build failure, got {}", other),
    }
}

#[test]
fn syntax_errors_surface_from_the_parser() {
    let err = Compiler::compile("def main(:\n").unwrap_err();
    match err {
        Error::Build(errors) => {
            assert!(errors.iter().any(|e| matches!(e, Error::Syntax(_))));
        }
        other => panic!("expected a build failure, got {}", other),
    }
}

#[test]
fn compiled_modules_verify() {
    let module = Compiler::compile("def main():\n    return 0\n").unwrap();
    assert!(module.ir.verify().is_ok());
    assert!(module.ir.find_function("__program_entry__").is_some());
    assert!(module.ir.find_function("__runtime_init__").is_some());
    assert_eq!(module.ir.ctors.len(), 1);
    assert_eq!(module.ir.ctors[0].priority, 65535);
}
