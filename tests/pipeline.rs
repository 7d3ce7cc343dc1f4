// Integration tests driving the whole pipeline: parse → expand → generate →
// isolated execution → result collection.

use jitest::module::value::CValue;
use jitest::module::{CType, Module, ModuleBuilder};
use jitest::{run_source, Outcome, RunConfig};
use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;
use std::sync::{Mutex, MutexGuard, OnceLock};
use tempfile::NamedTempFile;

// Runs redirect the process-wide stdout/stderr descriptors while capturing;
// they must not overlap across test threads.
static LOCK: OnceLock<Mutex<()>> = OnceLock::new();

fn serial() -> MutexGuard<'static, ()> {
    match LOCK.get_or_init(|| Mutex::new(())).lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn in_process() -> RunConfig {
    RunConfig { isolate: false }
}

/// A stand-in for a compiled C translation unit:
///
/// ```c
/// int gint = 1;
/// int sum(int a, int b) { return a + b; }
/// int sum_with_global(void) { return gint + 5; }
/// int perform_operation(int a, int b) { return sum(a, b); }
/// void print_str(char *s) { printf("%s", s); }
/// void crash(void) { abort(); }
/// ```
fn sample_module() -> Module {
    ModuleBuilder::new("sample")
        .function(
            "sum",
            &[CType::int(), CType::int()],
            CType::int(),
            |_, args| CValue::Int(args[0].as_int().unwrap() + args[1].as_int().unwrap()),
        )
        .function("sum_with_global", &[], CType::int(), |rt, _| {
            let gint = rt.memory().global("gint").and_then(CValue::as_int).unwrap();
            CValue::Int(gint + 5)
        })
        .function(
            "perform_operation",
            &[CType::int(), CType::int()],
            CType::int(),
            |rt, args| rt.invoke("sum", args).unwrap(),
        )
        .function(
            "print_str",
            &[CType::ptr(CType::char_())],
            CType::void(),
            |rt, args| {
                let addr = args[0].as_pointer().unwrap();
                let text = rt.memory().read_c_string(addr).unwrap();
                let mut out = std::io::stdout();
                let _ = out.write_all(text.as_bytes());
                let _ = out.flush();
                CValue::Unit
            },
        )
        .function("crash", &[], CType::void(), |_, _| std::process::abort())
        .global("gint", CType::int(), CValue::Int(1))
        .build()
}

#[test]
fn test_simple_pass() {
    let _guard = serial();
    let module = sample_module();

    let summary = run_source("sum(2, 3) == 5;", &module, &RunConfig::default()).unwrap();

    assert_eq!(summary.len(), 1);
    let result = &summary.results[0];
    assert_eq!(result.outcome, Outcome::Passed);
    assert_eq!(result.name, "test_sum_0");
    assert_eq!(result.group, "group_0");
    assert_eq!(result.signature, "int sum(int, int)");
    assert_eq!(result.actual, "5");
    assert_eq!(result.expected, "== 5");
    assert_eq!(summary.exit_code(), 0);
}

#[test]
fn test_failed_comparison_counts_in_exit_code() {
    let _guard = serial();
    let module = sample_module();

    let summary = run_source(
        "sum(2, 3) == 6;\nsum(1, 1) == 2;",
        &module,
        &RunConfig::default(),
    )
    .unwrap();

    assert_eq!(summary.results[0].outcome, Outcome::Failed);
    assert_eq!(summary.results[0].actual, "5");
    assert_eq!(summary.results[1].outcome, Outcome::Passed);
    assert_eq!(summary.exit_code(), 1);
}

#[test]
fn test_global_restored_between_tests() {
    let _guard = serial();
    let module = sample_module();

    // The second test only sees 6 if the first test's mutation was rolled
    // back when its scope exited.
    let source = r#"
        before { gint = 10; }
        sum_with_global() == 15;
        sum_with_global() == 6;
    "#;
    let summary = run_source(source, &module, &in_process()).unwrap();

    assert_eq!(summary.len(), 2);
    assert!(summary.results.iter().all(|r| r.outcome == Outcome::Passed));
}

#[test]
fn test_after_block_runs_before_restore() {
    let _guard = serial();
    let module = sample_module();

    let source = r#"
        before { gint = 10; }
        sum_with_global() == 15;
        after { gint == 10; }
    "#;
    let summary = run_source(source, &module, &RunConfig::default()).unwrap();

    let result = &summary.results[0];
    assert_eq!(result.outcome, Outcome::Passed);
    assert!(result.failed_expressions.is_empty());
}

#[test]
fn test_group_scope_restored_on_exit() {
    let _guard = serial();
    let module = sample_module();

    let source = r#"
        group mutating {
            before_all { gint = 20; }
            sum_with_global() == 25;
        }
        sum_with_global() == 6;
    "#;
    let summary = run_source(source, &module, &in_process()).unwrap();

    assert_eq!(summary.len(), 2);
    assert!(summary.results.iter().all(|r| r.outcome == Outcome::Passed));
    assert_eq!(summary.results[0].group, "group_0:mutating");
    assert_eq!(summary.results[1].group, "group_0");
}

#[test]
fn test_teardown_order_is_innermost_first() {
    let _guard = serial();

    let log: Rc<RefCell<Vec<i64>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&log);
    let module = ModuleBuilder::new("trace")
        .function("record", &[CType::int()], CType::void(), move |_, args| {
            sink.borrow_mut().push(args[0].as_int().unwrap());
            CValue::Unit
        })
        .function("noop", &[], CType::void(), |_, _| CValue::Unit)
        .build();

    let source = r#"
        group a {
            before_all { record(1); }
            group b {
                before_all { record(2); }
                group c {
                    before_all { record(3); }
                    noop();
                    after_all { record(-3); }
                }
                after_all { record(-2); }
            }
            after_all { record(-1); }
        }
    "#;
    let summary = run_source(source, &module, &in_process()).unwrap();

    assert_eq!(summary.len(), 1);
    assert_eq!(*log.borrow(), vec![1, 2, 3, -3, -2, -1]);
}

#[test]
fn test_data_rows_expand_to_instances() {
    let _guard = serial();
    let module = sample_module();

    let mut table = NamedTempFile::new().unwrap();
    writeln!(table, "a,b,expected").unwrap();
    writeln!(table, "1,2,3").unwrap();
    writeln!(table, "2,3,5").unwrap();
    writeln!(table, "10,20,30").unwrap();

    let source = format!(
        "sum(0, 0) == 0;\ndata \"{}\"\nsum(@, @) == @;",
        table.path().display()
    );
    let summary = run_source(&source, &module, &RunConfig::default()).unwrap();

    // One instance per row, after the unparameterized neighbor
    assert_eq!(summary.len(), 4);
    assert!(summary.results.iter().all(|r| r.outcome == Outcome::Passed));
    assert_eq!(summary.results[1].actual, "3");
    assert_eq!(summary.results[2].actual, "5");
    assert_eq!(summary.results[3].actual, "30");
    assert_eq!(summary.results[3].expected, "== 30");
}

#[test]
fn test_mockup_scoped_to_one_test() {
    let _guard = serial();
    let module = sample_module();

    // perform_operation reaches sum through module dispatch, so the mockup
    // redirects it; the next test sees the original again.
    let source = r#"
        mockup { sum(0, 0) = 42; }
        perform_operation(1, 2) == 42;
        perform_operation(1, 2) == 3;
    "#;
    let summary = run_source(source, &module, &RunConfig::default()).unwrap();

    assert_eq!(summary.len(), 2);
    assert!(summary.results.iter().all(|r| r.outcome == Outcome::Passed));
}

#[test]
fn test_group_mockup_reactivated_after_test_mockup() {
    let _guard = serial();
    let module = sample_module();

    let source = r#"
        group mocked {
            mockup_all { sum(0, 0) = 10; }
            mockup { sum(0, 0) = 20; }
            perform_operation(0, 0) == 20;
            perform_operation(0, 0) == 10;
        }
        perform_operation(1, 2) == 3;
    "#;
    let summary = run_source(source, &module, &RunConfig::default()).unwrap();

    assert_eq!(summary.len(), 3);
    assert!(summary.results.iter().all(|r| r.outcome == Outcome::Passed));
}

#[cfg(unix)]
#[test]
fn test_crash_is_contained_and_distinct() {
    let _guard = serial();
    let module = sample_module();

    let source = "crash();\nsum(2, 3) == 5;";
    let summary = run_source(source, &module, &RunConfig::default()).unwrap();

    assert_eq!(summary.results[0].outcome, Outcome::Crashed);
    assert_eq!(summary.results[1].outcome, Outcome::Passed);
    assert_eq!(summary.crashed(), 1);
    assert_eq!(summary.failed(), 0);
    assert_eq!(summary.exit_code(), 1);
}

#[test]
fn test_output_crosses_the_isolation_boundary() {
    let _guard = serial();
    let module = sample_module();

    let summary = run_source(
        "print_str(\"hello world\");",
        &module,
        &RunConfig::default(),
    )
    .unwrap();

    let result = &summary.results[0];
    assert_eq!(result.outcome, Outcome::Passed);
    assert_eq!(result.output, "hello world");
    assert_eq!(result.actual, "");
}

#[test]
fn test_float_truncation_surfaces_a_warning() {
    let _guard = serial();
    let module = sample_module();

    let summary = run_source("sum(2.5, 3) == 5;", &module, &RunConfig::default()).unwrap();

    let result = &summary.results[0];
    assert_eq!(result.outcome, Outcome::Passed);
    assert_eq!(result.warnings.len(), 1);
    assert!(result.warnings[0].contains("Casting floating point value"));
}

#[test]
fn test_failed_expected_expressions_are_reported() {
    let _guard = serial();
    let module = sample_module();

    let source = "before { gint = 3; gint == 4; } sum(1, 1) == 2;";
    let summary = run_source(source, &module, &RunConfig::default()).unwrap();

    let result = &summary.results[0];
    assert_eq!(result.outcome, Outcome::Failed);
    assert_eq!(result.failed_expressions, vec!["gint == 4".to_string()]);
}

#[test]
fn test_syntax_error_aborts_the_file() {
    let module = sample_module();
    let err = run_source("sum(2,;", &module, &RunConfig::default()).unwrap_err();
    assert!(matches!(err, jitest::Error::Parse(_)));
}

#[test]
fn test_generation_error_aborts_before_execution() {
    let module = sample_module();
    let err = run_source("no_such_function(1);", &module, &RunConfig::default()).unwrap_err();
    assert!(matches!(
        err,
        jitest::Error::Gen(jitest::codegen::GenError::FunctionNotFound(_))
    ));
}
