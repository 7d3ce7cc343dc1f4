//! Execution engine: runs generated routines against the module
//!
//! The engine owns the module's runtime state — globals, the buffer heap,
//! the routine table and the active mockup bindings — and executes the
//! straight-line steps the code-generation pass emitted. Symbol dispatch
//! goes through the binding map first, so a mocked-up callee is observed by
//! every caller, including compiled functions invoking their siblings.
//!
//! [`Engine::run`] wraps every invocation in an [`capture::OutputCapture`]
//! guard: file descriptors 1 and 2 point at a pipe for the call's duration
//! and are restored on every exit path.

pub mod capture;

use crate::codegen::{CompareClass, OperandSpec, Plan, Routine, Step, ValueSpec};
use crate::module::memory::Memory;
use crate::module::value::CValue;
use crate::module::{CType, Module, Runtime};
use crate::parser::ast::CompareOp;
use capture::{CaptureError, OutputCapture};
use rustc_hash::FxHashMap;
use std::fmt;

/// Faults the execution model itself can detect. Real crashes in compiled
/// code are the isolation layer's concern, not the engine's.
#[derive(Debug)]
pub enum ExecError {
    UnknownRoutine(String),
    UnknownSymbol(String),
    UnknownGlobal(String),
    Capture(CaptureError),
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecError::UnknownRoutine(name) => write!(f, "No generated routine named {}", name),
            ExecError::UnknownSymbol(name) => write!(f, "Unknown symbol: {}", name),
            ExecError::UnknownGlobal(name) => write!(f, "Unknown global variable: {}", name),
            ExecError::Capture(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for ExecError {}

impl From<CaptureError> for ExecError {
    fn from(err: CaptureError) -> Self {
        ExecError::Capture(err)
    }
}

/// What one routine invocation produced
#[derive(Debug, Clone, PartialEq)]
pub struct RoutineOutcome {
    /// The routine's running value: the result of its last call or return
    pub value: CValue,
    /// Starts true; comparison steps AND their results in
    pub passed: bool,
    /// Source renderings of the expected expressions that came out false
    pub failed: Vec<String>,
    /// Captured stdout/stderr (empty for uncaptured runs)
    pub output: String,
}

/// Per-invocation accumulator threaded through step execution
struct Frame {
    value: CValue,
    passed: bool,
    failed: Vec<String>,
}

impl Frame {
    fn new() -> Self {
        Frame {
            value: CValue::Unit,
            passed: true,
            failed: Vec::new(),
        }
    }
}

/// Executes routines of one generated plan against one module instance
pub struct Engine<'m> {
    module: &'m Module,
    routines: FxHashMap<String, Routine>,
    memory: Memory,
    /// Active replacement routine per mocked-up symbol
    bindings: FxHashMap<String, String>,
}

impl<'m> Engine<'m> {
    pub fn new(module: &'m Module, plan: &Plan) -> Self {
        Engine {
            module,
            routines: plan.routines.clone(),
            memory: module.initial_memory(),
            bindings: FxHashMap::default(),
        }
    }

    /// Current module memory (globals and buffers).
    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Run a routine with process-level output capture. The capture guard
    /// restores the real streams even when execution errors mid-routine.
    pub fn run(&mut self, name: &str) -> Result<RoutineOutcome, ExecError> {
        let capture = OutputCapture::begin()?;
        let result = self.run_uncaptured(name);
        let output = capture.finish();
        let mut outcome = result?;
        outcome.output = output;
        Ok(outcome)
    }

    /// Run a routine without redirecting the process streams. Mockup swap
    /// routines and restore-only cleanups produce no output worth capturing.
    pub fn run_uncaptured(&mut self, name: &str) -> Result<RoutineOutcome, ExecError> {
        let routine = match self.routines.get(name) {
            Some(routine) => routine.clone(),
            None => return Err(ExecError::UnknownRoutine(name.to_string())),
        };
        let mut frame = Frame::new();
        self.exec(&routine, &mut frame)?;
        Ok(RoutineOutcome {
            value: frame.value,
            passed: frame.passed,
            failed: frame.failed,
            output: String::new(),
        })
    }

    fn exec(&mut self, routine: &Routine, frame: &mut Frame) -> Result<(), ExecError> {
        for step in &routine.steps {
            match step {
                Step::StoreGlobal { name, value, .. } => {
                    let value = self.resolve_value(value);
                    self.memory.set_global(name, value);
                }
                Step::BackupGlobal { original, shadow } => {
                    let value = self
                        .memory
                        .global(original)
                        .cloned()
                        .ok_or_else(|| ExecError::UnknownGlobal(original.clone()))?;
                    self.memory.set_global(shadow, value);
                }
                Step::RestoreGlobal { shadow, original } => {
                    let value = self
                        .memory
                        .remove_global(shadow)
                        .ok_or_else(|| ExecError::UnknownGlobal(shadow.clone()))?;
                    self.memory.set_global(original, value);
                }
                Step::Call { symbol, args, .. } => {
                    let args: Vec<CValue> =
                        args.iter().map(|spec| self.resolve_value(spec)).collect();
                    frame.value = self.dispatch(symbol, &args)?;
                }
                Step::CompareReturn {
                    class,
                    op,
                    expected,
                } => {
                    if !compare(*class, *op, &frame.value, expected) {
                        frame.passed = false;
                    }
                }
                Step::CompareOperands {
                    class,
                    op,
                    lhs,
                    rhs,
                    rendered,
                } => {
                    let lhs = self.resolve_operand(lhs)?;
                    let rhs = self.resolve_operand(rhs)?;
                    if !compare(*class, *op, &lhs, &rhs) {
                        frame.passed = false;
                        frame.failed.push(rendered.clone());
                    }
                }
                Step::BindMockup { target, routine } => match routine {
                    Some(routine) => {
                        self.bindings.insert(target.clone(), routine.clone());
                    }
                    None => {
                        self.bindings.remove(target);
                    }
                },
                Step::ReturnValue(value) => frame.value = value.clone(),
            }
        }
        Ok(())
    }

    /// Invoke a module symbol: active mockup binding first, then the host
    /// implementation, then generated routines.
    fn dispatch(&mut self, symbol: &str, args: &[CValue]) -> Result<CValue, ExecError> {
        if let Some(bound) = self.bindings.get(symbol).cloned() {
            let routine = match self.routines.get(&bound) {
                Some(routine) => routine.clone(),
                None => return Err(ExecError::UnknownRoutine(bound)),
            };
            let mut frame = Frame::new();
            self.exec(&routine, &mut frame)?;
            return Ok(frame.value);
        }
        if let Some(host) = self.module.host_impl(symbol) {
            return Ok(host(self, args));
        }
        if let Some(routine) = self.routines.get(symbol).cloned() {
            let mut frame = Frame::new();
            self.exec(&routine, &mut frame)?;
            return Ok(frame.value);
        }
        Err(ExecError::UnknownSymbol(symbol.to_string()))
    }

    /// Materialize an argument/assignment payload. Buffer and string specs
    /// allocate here, inside the routine that uses them.
    fn resolve_value(&mut self, spec: &ValueSpec) -> CValue {
        match spec {
            ValueSpec::Const(value) => value.clone(),
            ValueSpec::Buffer { elem, count, fill } => {
                let data = vec![fill.clone(); *count];
                CValue::Pointer(self.memory.alloc(elem.clone(), data))
            }
            ValueSpec::CString(text) => {
                let mut data: Vec<CValue> =
                    text.bytes().map(|b| CValue::Int(b as i64)).collect();
                data.push(CValue::Int(0));
                CValue::Pointer(self.memory.alloc(CType::char_(), data))
            }
        }
    }

    fn resolve_operand(&mut self, operand: &OperandSpec) -> Result<CValue, ExecError> {
        match operand {
            OperandSpec::Const(value) => Ok(value.clone()),
            OperandSpec::Global(name) => self
                .memory
                .global(name)
                .cloned()
                .ok_or_else(|| ExecError::UnknownGlobal(name.clone())),
        }
    }
}

impl Runtime for Engine<'_> {
    fn memory(&mut self) -> &mut Memory {
        &mut self.memory
    }

    fn invoke(&mut self, symbol: &str, args: &[CValue]) -> Option<CValue> {
        self.dispatch(symbol, args).ok()
    }
}

fn compare(class: CompareClass, op: CompareOp, lhs: &CValue, rhs: &CValue) -> bool {
    match class {
        CompareClass::Int => match (int_of(lhs), int_of(rhs)) {
            (Some(a), Some(b)) => apply_int(op, a, b),
            _ => false,
        },
        // Ordered float comparison: anything involving NaN comes out false
        CompareClass::Float => match (lhs.as_float(), rhs.as_float()) {
            (Some(a), Some(b)) => apply_float(op, a, b),
            _ => false,
        },
    }
}

/// Integer view of a value; pointers compare as addresses
fn int_of(value: &CValue) -> Option<i64> {
    match value {
        CValue::Int(n) => Some(*n),
        CValue::Pointer(addr) => Some(*addr as i64),
        CValue::Null => Some(0),
        _ => None,
    }
}

fn apply_int(op: CompareOp, a: i64, b: i64) -> bool {
    match op {
        CompareOp::Eq => a == b,
        CompareOp::Ne => a != b,
        CompareOp::Ge => a >= b,
        CompareOp::Le => a <= b,
        CompareOp::Gt => a > b,
        CompareOp::Lt => a < b,
    }
}

fn apply_float(op: CompareOp, a: f64, b: f64) -> bool {
    match op {
        CompareOp::Eq => a == b,
        CompareOp::Ne => a != b,
        CompareOp::Ge => a >= b,
        CompareOp::Le => a <= b,
        CompareOp::Gt => a > b,
        CompareOp::Lt => a < b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::{generate, CompiledItem, CompiledTest};
    use crate::module::ModuleBuilder;
    use crate::parser::parser::Parser;
    use crate::test_sync::serial;
    use std::io::Write;

    fn toy_module() -> Module {
        ModuleBuilder::new("toy")
            .function(
                "sum",
                &[CType::int(), CType::int()],
                CType::int(),
                |_, args| {
                    CValue::Int(args[0].as_int().unwrap() + args[1].as_int().unwrap())
                },
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
            .function("print_hello", &[], CType::void(), |_, _| {
                let mut out = std::io::stdout();
                let _ = out.write_all(b"hello");
                let _ = out.flush();
                CValue::Unit
            })
            .global("gint", CType::int(), CValue::Int(10))
            .build()
    }

    fn compiled<'m>(source: &str, module: &'m Module) -> (Engine<'m>, CompiledTest) {
        let file = Parser::new(source).parse_test_file().expect("parse failed");
        let plan = generate(&file, module).expect("generation failed");
        let test = match &plan.root.items[0] {
            CompiledItem::Test(test) => test.clone(),
            _ => panic!("Expected a test"),
        };
        (Engine::new(module, &plan), test)
    }

    #[test]
    fn test_body_runs_and_compares() {
        let module = toy_module();
        let (mut engine, test) = compiled("sum(2, 3) == 5;", &module);

        let outcome = engine.run_uncaptured(&test.body).unwrap();
        assert_eq!(outcome.value, CValue::Int(5));
        assert!(outcome.passed);
        assert!(outcome.failed.is_empty());
    }

    #[test]
    fn test_failed_comparison_clears_pass_flag() {
        let module = toy_module();
        let (mut engine, test) = compiled("sum(2, 3) == 6;", &module);
        let outcome = engine.run_uncaptured(&test.body).unwrap();
        assert!(!outcome.passed);
    }

    #[test]
    fn test_setup_mutates_and_cleanup_restores() {
        let module = toy_module();
        let (mut engine, test) = compiled(
            "before { gint = 40; } sum_with_global() == 45; after { gint == 40; }",
            &module,
        );

        engine.run_uncaptured(test.setup.as_ref().unwrap()).unwrap();
        assert_eq!(engine.memory().global("gint"), Some(&CValue::Int(40)));

        let body = engine.run_uncaptured(&test.body).unwrap();
        assert_eq!(body.value, CValue::Int(45));
        assert!(body.passed);

        let teardown = engine
            .run_uncaptured(test.teardown.as_ref().unwrap())
            .unwrap();
        assert!(teardown.passed);
        assert!(teardown.failed.is_empty());

        engine
            .run_uncaptured(test.cleanup.as_ref().unwrap())
            .unwrap();
        assert_eq!(engine.memory().global("gint"), Some(&CValue::Int(10)));
        assert_eq!(engine.memory().global("backup_gint"), None);
    }

    #[test]
    fn test_failed_expected_expression_is_recorded() {
        let module = toy_module();
        let (mut engine, test) = compiled("before { gint == 99; } sum(1, 1) == 2;", &module);
        let outcome = engine
            .run_uncaptured(test.setup.as_ref().unwrap())
            .unwrap();
        assert!(!outcome.passed);
        assert_eq!(outcome.failed, vec!["gint == 99".to_string()]);
    }

    #[test]
    fn test_mockup_binding_redirects_sibling_calls() {
        let module = toy_module();
        let (mut engine, test) = compiled(
            "mockup { sum(0, 0) = 42; } perform_operation(1, 2) == 42;",
            &module,
        );
        let mockups = test.mockups.as_ref().unwrap();

        engine
            .run_uncaptured(&mockups.bind_functions[0])
            .unwrap();
        let outcome = engine.run_uncaptured(&test.body).unwrap();
        assert_eq!(outcome.value, CValue::Int(42));
        assert!(outcome.passed);

        // Unbinding restores the original behavior for everyone
        engine
            .run_uncaptured(&mockups.unbind_functions[0])
            .unwrap();
        let outcome = engine.run_uncaptured(&test.body).unwrap();
        assert_eq!(outcome.value, CValue::Int(3));
        assert!(!outcome.passed);
    }

    #[test]
    fn test_run_captures_process_output() {
        let _guard = serial();
        let module = toy_module();
        let (mut engine, test) = compiled("print_hello();", &module);

        let outcome = engine.run(&test.body).unwrap();
        assert_eq!(outcome.output, "hello");
        assert!(outcome.passed);
    }

    #[test]
    fn test_unknown_routine_is_an_error() {
        let module = toy_module();
        let (mut engine, _) = compiled("sum(1, 1) == 2;", &module);
        assert!(matches!(
            engine.run_uncaptured("no_such_routine"),
            Err(ExecError::UnknownRoutine(_))
        ));
    }

    #[test]
    fn test_float_comparison_is_ordered() {
        assert!(compare(
            CompareClass::Float,
            CompareOp::Lt,
            &CValue::Float(1.5),
            &CValue::Float(2.0),
        ));
        assert!(!compare(
            CompareClass::Float,
            CompareOp::Eq,
            &CValue::Float(f64::NAN),
            &CValue::Float(f64::NAN),
        ));
        assert!(!compare(
            CompareClass::Float,
            CompareOp::Le,
            &CValue::Float(f64::NAN),
            &CValue::Float(0.0),
        ));
    }

    #[test]
    fn test_pointers_compare_as_addresses() {
        assert!(compare(
            CompareClass::Int,
            CompareOp::Eq,
            &CValue::Null,
            &CValue::Int(0),
        ));
        assert!(compare(
            CompareClass::Int,
            CompareOp::Gt,
            &CValue::Pointer(0x2000),
            &CValue::Pointer(0x1000),
        ));
    }
}
