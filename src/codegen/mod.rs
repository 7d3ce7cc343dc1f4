//! Code generation: AST → executable routines
//!
//! Walks a parsed (and data-expanded) test file and emits one routine per
//! executable unit — test setup, the function call under test, teardown,
//! group setup/teardown, cleanups and mockup swaps — against the compiled
//! module's symbol table. Routines are straight-line step lists installed
//! under generated, collision-checked names; every routine is independently
//! invocable and never depends on another routine's transient state
//! (pointer-producing allocations replay inside the routine that uses them).
//!
//! Global-variable mutation is paired with rollback: before a setup or
//! mockup overwrites a global, its current value is snapshotted into a fresh
//! shadow global; an explicit stack of scope-entry markers holds the
//! (original, shadow) pairs, and scope exit emits the restores in reverse
//! order, so nesting unwinds LIFO.

mod values;

use crate::module::value::CValue;
use crate::module::{CType, FunctionDecl, Module};
use crate::parser::ast::{
    AssignValue, CompareOp, Constant, ExpectedConstant, ExpectedExpression, FixtureStatement,
    FunctionArgument, FunctionCall, GroupItem, MockupFixture, Operand, TestDefinition, TestFile,
    TestFixture, TestFunction, TestGroup,
};
use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt;

/// Fatal code-generation errors; any of these aborts the file before
/// execution starts.
#[derive(Debug, Clone, PartialEq)]
pub enum GenError {
    FunctionNotFound(String),
    GlobalNotFound(String),
    StructNotFound(String),
    ArgumentCountMismatch {
        function: String,
        expected: usize,
        found: usize,
    },
    /// Only buffer-allocation syntax may produce a non-null pointer
    PointerLiteral { value: String },
    BufferForValueParameter { function: String, index: usize },
    DesignatedInitializer,
    InitializerArity {
        struct_name: String,
        fields: usize,
        values: usize,
    },
    TypeMismatch { expected: String, found: String },
    UnsupportedComparison { type_name: String },
}

impl fmt::Display for GenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenError::FunctionNotFound(name) => write!(f, "Function not found: {}", name),
            GenError::GlobalNotFound(name) => write!(f, "Global variable not found: {}", name),
            GenError::StructNotFound(name) => write!(f, "Struct type not found: {}", name),
            GenError::ArgumentCountMismatch {
                function,
                expected,
                found,
            } => write!(
                f,
                "Function {} takes {} argument(s), {} given",
                function, expected, found
            ),
            GenError::PointerLiteral { value } => write!(
                f,
                "Cannot pass literal {} as a pointer; use a buffer allocation or 0",
                value
            ),
            GenError::BufferForValueParameter { function, index } => write!(
                f,
                "Argument {} of {} is not a pointer; a buffer cannot be bound to it",
                index + 1,
                function
            ),
            GenError::DesignatedInitializer => write!(
                f,
                "Designated initializers are not supported: struct field names \
                 are not available in the symbol table"
            ),
            GenError::InitializerArity {
                struct_name,
                fields,
                values,
            } => write!(
                f,
                "Initializer for struct {} has {} value(s) but the struct has {} field(s)",
                struct_name, values, fields
            ),
            GenError::TypeMismatch { expected, found } => {
                write!(f, "Cannot build a {} from {}", expected, found)
            }
            GenError::UnsupportedComparison { type_name } => {
                write!(f, "Unsupported type for comparison: {}", type_name)
            }
        }
    }
}

impl std::error::Error for GenError {}

/// How a comparison step interprets its operands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareClass {
    Int,
    Float,
}

/// Argument/assignment payload, resolved to a value when the owning routine
/// runs
#[derive(Debug, Clone, PartialEq)]
pub enum ValueSpec {
    Const(CValue),
    /// Allocate `count` elements of `elem`, each set to `fill`
    Buffer {
        elem: CType,
        count: usize,
        fill: CValue,
    },
    /// Allocate a NUL-terminated char buffer
    CString(String),
}

/// Operand of an expected-expression comparison
#[derive(Debug, Clone, PartialEq)]
pub enum OperandSpec {
    Global(String),
    Const(CValue),
}

/// One straight-line instruction of a generated routine
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Overwrite a global variable
    StoreGlobal {
        name: String,
        ty: CType,
        value: ValueSpec,
    },
    /// Snapshot a global's current value into its shadow global
    BackupGlobal { original: String, shadow: String },
    /// Write a shadow's value back to its original and discard the shadow
    RestoreGlobal { shadow: String, original: String },
    /// Invoke a module symbol; the routine's running value becomes the result
    Call {
        symbol: String,
        args: Vec<ValueSpec>,
        ret: CType,
    },
    /// Fold the last call's result into the routine's pass flag
    CompareReturn {
        class: CompareClass,
        op: CompareOp,
        expected: CValue,
    },
    /// Standalone check; failures are recorded with their source rendering
    CompareOperands {
        class: CompareClass,
        op: CompareOp,
        lhs: OperandSpec,
        rhs: OperandSpec,
        rendered: String,
    },
    /// Swap the active implementation of a symbol (None restores the
    /// original)
    BindMockup {
        target: String,
        routine: Option<String>,
    },
    /// Fixed routine result (mockup bodies)
    ReturnValue(CValue),
}

/// An independently invocable generated routine
#[derive(Debug, Clone, PartialEq)]
pub struct Routine {
    pub name: String,
    pub steps: Vec<Step>,
}

/// Generated swap routines for one mockup fixture
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledMockups {
    /// Bind routines in declaration order; re-invoked when a nested scope
    /// exits
    pub bind_functions: Vec<String>,
    /// Unbind routines in reverse declaration order
    pub unbind_functions: Vec<String>,
    pub bind_variables: Option<String>,
    pub unbind_variables: Option<String>,
}

/// A fully generated test definition
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledTest {
    pub name: String,
    pub group_name: String,
    pub signature: String,
    pub ret: CType,
    /// Rendered expected result, e.g. `== 5` (empty when none)
    pub expected: String,
    pub warnings: Vec<String>,
    pub mockups: Option<CompiledMockups>,
    pub setup: Option<String>,
    pub body: String,
    pub teardown: Option<String>,
    /// Restores this test's global snapshots; runs after teardown
    pub cleanup: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompiledItem {
    Test(CompiledTest),
    Group(CompiledGroup),
}

/// A generated group: fixtures plus children in source order
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledGroup {
    pub name: String,
    pub mockups: Option<CompiledMockups>,
    pub setup: Option<String>,
    pub items: Vec<CompiledItem>,
    /// Fixture statements plus this scope's global restores; synthesized
    /// when a setup exists without a declared teardown
    pub teardown: Option<String>,
    pub warnings: Vec<String>,
}

impl CompiledGroup {
    pub fn test_count(&self) -> usize {
        self.items
            .iter()
            .map(|item| match item {
                CompiledItem::Test(_) => 1,
                CompiledItem::Group(group) => group.test_count(),
            })
            .sum()
    }
}

/// Output of the generation pass: the routine table plus the compiled tree
#[derive(Debug, Clone)]
pub struct Plan {
    pub routines: FxHashMap<String, Routine>,
    pub root: CompiledGroup,
}

impl Plan {
    pub fn routine(&self, name: &str) -> Option<&Routine> {
        self.routines.get(name)
    }

    pub fn test_count(&self) -> usize {
        self.root.test_count()
    }
}

/// Explicit scope stack of (original, shadow) global snapshot pairs
#[derive(Debug, Default)]
struct BackupStack {
    scopes: Vec<Vec<(String, String)>>,
}

impl BackupStack {
    fn push_scope(&mut self) {
        self.scopes.push(Vec::new());
    }

    fn record(&mut self, original: String, shadow: String) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.push((original, shadow));
        }
    }

    /// Pairs of the exiting scope in recorded order; the caller emits the
    /// restores reversed.
    fn pop_scope(&mut self) -> Vec<(String, String)> {
        self.scopes.pop().unwrap_or_default()
    }
}

/// Generate the execution plan for a parsed, expanded test file.
pub fn generate(file: &TestFile, module: &Module) -> Result<Plan, GenError> {
    let mut generator = Generator::new(module);
    let root = generator.gen_group(&file.group)?;
    Ok(Plan {
        routines: generator.routines,
        root,
    })
}

/// The generation pass itself
pub(crate) struct Generator<'m> {
    pub(crate) module: &'m Module,
    routines: FxHashMap<String, Routine>,
    used_names: FxHashSet<String>,
    mockup_counter: usize,
    backups: BackupStack,
    pub(crate) warnings: Vec<String>,
}

impl<'m> Generator<'m> {
    pub(crate) fn new(module: &'m Module) -> Self {
        Generator {
            module,
            routines: FxHashMap::default(),
            used_names: FxHashSet::default(),
            mockup_counter: 0,
            backups: BackupStack::default(),
            warnings: Vec::new(),
        }
    }

    pub(crate) fn warn(&mut self, message: String) {
        self.warnings.push(message);
    }

    fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }

    fn gen_group(&mut self, group: &TestGroup) -> Result<CompiledGroup, GenError> {
        let scope_id = sanitize(&group.name);

        let mockups = match &group.mockup {
            Some(fixture) => Some(self.gen_mockups(fixture, &scope_id)?),
            None => None,
        };

        self.backups.push_scope();

        let setup = match &group.setup {
            Some(fixture) => Some(self.gen_fixture_routine(&format!("setup_{}", scope_id), fixture)?),
            None => None,
        };
        let mut warnings = self.take_warnings();

        let mut items = Vec::with_capacity(group.items.len());
        for item in &group.items {
            match item {
                GroupItem::Test(test) => items.push(CompiledItem::Test(self.gen_test(test)?)),
                GroupItem::Group(nested) => {
                    items.push(CompiledItem::Group(self.gen_group(nested)?));
                }
            }
        }

        let teardown = self.gen_scope_teardown(
            &format!("teardown_{}", scope_id),
            group.teardown.as_ref(),
        )?;
        warnings.extend(self.take_warnings());

        Ok(CompiledGroup {
            name: group.name.clone(),
            mockups,
            setup,
            items,
            teardown,
            warnings,
        })
    }

    fn gen_test(&mut self, test: &TestDefinition) -> Result<CompiledTest, GenError> {
        // Expansion replaces every placeholder before generation runs.
        if test.placeholder_count() > 0 {
            panic!("unresolved data placeholder reached code generation");
        }

        let decl = self
            .module
            .function(&test.function.call.name)
            .ok_or_else(|| GenError::FunctionNotFound(test.function.call.name.clone()))?
            .clone();

        let name = self.fresh_test_name(&decl.name);

        let mockups = match &test.mockup {
            Some(fixture) => Some(self.gen_mockups(fixture, &name)?),
            None => None,
        };

        self.backups.push_scope();

        let setup = match &test.setup {
            Some(fixture) => Some(self.gen_fixture_routine(&format!("setup_{}", name), fixture)?),
            None => None,
        };

        let body = self.gen_test_body(&name, &decl, &test.function)?;

        let teardown = match &test.teardown {
            Some(fixture) => {
                Some(self.gen_fixture_routine(&format!("teardown_{}", name), fixture)?)
            }
            None => None,
        };

        let cleanup = self.gen_scope_teardown(&format!("cleanup_{}", name), None)?;

        let expected = match &test.function.expected {
            Some(expected) if !decl.ret.is_void() => expected.render(),
            _ => String::new(),
        };

        Ok(CompiledTest {
            name,
            group_name: test.group_name.clone(),
            signature: decl.signature(),
            ret: decl.ret,
            expected,
            warnings: self.take_warnings(),
            mockups,
            setup,
            body,
            teardown,
            cleanup,
        })
    }

    /// Routine invoking the function under test and folding in its expected
    /// result.
    fn gen_test_body(
        &mut self,
        name: &str,
        decl: &FunctionDecl,
        function: &TestFunction,
    ) -> Result<String, GenError> {
        let args = self.gen_call_args(decl, &function.call)?;
        let mut steps = vec![Step::Call {
            symbol: decl.name.clone(),
            args,
            ret: decl.ret.clone(),
        }];

        if let Some(expected) = &function.expected {
            if decl.ret.is_void() {
                self.warn(
                    "Trying to compare a value against a function with no return value"
                        .to_string(),
                );
            } else {
                let constant = match &expected.value {
                    ExpectedConstant::Constant(constant) => constant,
                    ExpectedConstant::Placeholder => {
                        panic!("unresolved data placeholder reached code generation")
                    }
                };
                let class = self.compare_class_for(&decl.ret)?;
                let expected_value = match class {
                    CompareClass::Float => self.materialize_constant(&CType::Double, constant)?,
                    CompareClass::Int => self.materialize_constant(&decl.ret, constant)?,
                };
                steps.push(Step::CompareReturn {
                    class,
                    op: expected.op,
                    expected: expected_value,
                });
            }
        }

        let routine_name = self.unique_routine_name(name);
        self.install(Routine {
            name: routine_name.clone(),
            steps,
        });
        Ok(routine_name)
    }

    /// Fixture routine: assignments (with backups), calls and expected
    /// expressions in source order.
    fn gen_fixture_routine(
        &mut self,
        base_name: &str,
        fixture: &TestFixture,
    ) -> Result<String, GenError> {
        let mut steps = Vec::new();
        for statement in &fixture.statements {
            match statement {
                FixtureStatement::Assign(assignment) => {
                    self.gen_assignment(assignment, &mut steps)?;
                }
                FixtureStatement::Call(call) => {
                    steps.push(self.gen_plain_call(call)?);
                }
                FixtureStatement::Expect(expression) => {
                    steps.push(self.gen_expected_expression(expression)?);
                }
            }
        }

        let name = self.unique_routine_name(base_name);
        self.install(Routine {
            name: name.clone(),
            steps,
        });
        Ok(name)
    }

    /// Teardown/cleanup of the current backup scope: optional fixture
    /// statements, then the scope's restores in reverse order. Synthesized
    /// even without a declared fixture when the scope snapshot anything.
    fn gen_scope_teardown(
        &mut self,
        base_name: &str,
        fixture: Option<&TestFixture>,
    ) -> Result<Option<String>, GenError> {
        let mut steps = Vec::new();
        if let Some(fixture) = fixture {
            for statement in &fixture.statements {
                match statement {
                    FixtureStatement::Assign(assignment) => {
                        self.gen_assignment(assignment, &mut steps)?;
                    }
                    FixtureStatement::Call(call) => {
                        steps.push(self.gen_plain_call(call)?);
                    }
                    FixtureStatement::Expect(expression) => {
                        steps.push(self.gen_expected_expression(expression)?);
                    }
                }
            }
        }

        for (original, shadow) in self.backups.pop_scope().into_iter().rev() {
            steps.push(Step::RestoreGlobal { shadow, original });
        }

        if steps.is_empty() && fixture.is_none() {
            return Ok(None);
        }

        let name = self.unique_routine_name(base_name);
        self.install(Routine {
            name: name.clone(),
            steps,
        });
        Ok(Some(name))
    }

    /// Backup + store for one global assignment.
    fn gen_assignment(
        &mut self,
        assignment: &crate::parser::ast::VariableAssignment,
        steps: &mut Vec<Step>,
    ) -> Result<(), GenError> {
        let decl = self
            .module
            .global(&assignment.name)
            .ok_or_else(|| GenError::GlobalNotFound(assignment.name.clone()))?
            .clone();

        let shadow = self.fresh_shadow_name(&decl.name);
        steps.push(Step::BackupGlobal {
            original: decl.name.clone(),
            shadow: shadow.clone(),
        });
        self.backups.record(decl.name.clone(), shadow);

        let value = self.gen_assign_value(&decl.ty, &assignment.value)?;
        steps.push(Step::StoreGlobal {
            name: decl.name,
            ty: decl.ty,
            value,
        });
        Ok(())
    }

    fn gen_assign_value(
        &mut self,
        ty: &CType,
        value: &AssignValue,
    ) -> Result<ValueSpec, GenError> {
        match value {
            AssignValue::Constant(constant) => match (ty, constant) {
                (CType::Pointer(pointee), Constant::Str(s))
                    if matches!(**pointee, CType::Char { .. }) =>
                {
                    Ok(ValueSpec::CString(s.clone()))
                }
                _ => Ok(ValueSpec::Const(self.materialize_constant(ty, constant)?)),
            },
            AssignValue::Buffer(buffer) => {
                let pointee = ty.pointee().ok_or_else(|| GenError::TypeMismatch {
                    expected: ty.to_string(),
                    found: "a buffer allocation".to_string(),
                })?;
                let elem = Self::buffer_elem_type(pointee);
                let fill = self.materialize_buffer_fill(&elem, &buffer.init)?;
                Ok(ValueSpec::Buffer {
                    elem,
                    count: buffer.count as usize,
                    fill,
                })
            }
            AssignValue::Struct(init) => match ty {
                CType::Struct(name) => {
                    let name = name.clone();
                    Ok(ValueSpec::Const(self.materialize_struct(&name, init)?))
                }
                other => Err(GenError::TypeMismatch {
                    expected: other.to_string(),
                    found: "a struct initializer".to_string(),
                }),
            },
        }
    }

    /// A fixture-level call: same argument binding as the function under
    /// test.
    fn gen_plain_call(&mut self, call: &FunctionCall) -> Result<Step, GenError> {
        let decl = self
            .module
            .function(&call.name)
            .ok_or_else(|| GenError::FunctionNotFound(call.name.clone()))?
            .clone();
        let args = self.gen_call_args(&decl, call)?;
        Ok(Step::Call {
            symbol: decl.name,
            args,
            ret: decl.ret,
        })
    }

    /// Bind call arguments positionally to the declared parameter types.
    fn gen_call_args(
        &mut self,
        decl: &FunctionDecl,
        call: &FunctionCall,
    ) -> Result<Vec<ValueSpec>, GenError> {
        if decl.params.len() != call.args.len() {
            return Err(GenError::ArgumentCountMismatch {
                function: decl.name.clone(),
                expected: decl.params.len(),
                found: call.args.len(),
            });
        }

        let mut specs = Vec::with_capacity(call.args.len());
        for (index, (param, arg)) in decl.params.iter().zip(&call.args).enumerate() {
            let spec = match arg {
                FunctionArgument::Placeholder => {
                    panic!("unresolved data placeholder reached code generation")
                }
                FunctionArgument::Buffer(buffer) => {
                    let pointee =
                        param
                            .pointee()
                            .ok_or_else(|| GenError::BufferForValueParameter {
                                function: decl.name.clone(),
                                index,
                            })?;
                    let elem = Self::buffer_elem_type(pointee);
                    let fill = self.materialize_buffer_fill(&elem, &buffer.init)?;
                    ValueSpec::Buffer {
                        elem,
                        count: buffer.count as usize,
                        fill,
                    }
                }
                FunctionArgument::Constant(constant) => match (param, constant) {
                    (CType::Pointer(pointee), Constant::Str(s))
                        if matches!(**pointee, CType::Char { .. }) =>
                    {
                        ValueSpec::CString(s.clone())
                    }
                    _ => ValueSpec::Const(self.materialize_constant(param, constant)?),
                },
            };
            specs.push(spec);
        }
        Ok(specs)
    }

    /// Typed comparison between two identifier-or-constant operands.
    fn gen_expected_expression(
        &mut self,
        expression: &ExpectedExpression,
    ) -> Result<Step, GenError> {
        let lhs_ty = self.operand_type(&expression.lhs)?;
        let rhs_ty = self.operand_type(&expression.rhs)?;

        let class = match (&lhs_ty, &rhs_ty) {
            (Some(ty), _) | (_, Some(ty)) if ty.is_float() => CompareClass::Float,
            (Some(ty), _) => self.compare_class_for(ty)?,
            (None, Some(ty)) => self.compare_class_for(ty)?,
            (None, None) => {
                // Two bare constants: float if either literal is one
                if operand_is_float_literal(&expression.lhs)
                    || operand_is_float_literal(&expression.rhs)
                {
                    CompareClass::Float
                } else {
                    CompareClass::Int
                }
            }
        };

        let lhs = self.gen_operand(&expression.lhs, class, lhs_ty.as_ref())?;
        let rhs = self.gen_operand(&expression.rhs, class, rhs_ty.as_ref())?;

        Ok(Step::CompareOperands {
            class,
            op: expression.op,
            lhs,
            rhs,
            rendered: expression.render(),
        })
    }

    fn gen_operand(
        &mut self,
        operand: &Operand,
        class: CompareClass,
        ty: Option<&CType>,
    ) -> Result<OperandSpec, GenError> {
        match operand {
            Operand::Ident(name) => Ok(OperandSpec::Global(name.clone())),
            Operand::Constant(constant) => {
                let target = match (class, ty) {
                    (CompareClass::Float, _) => CType::Double,
                    (CompareClass::Int, Some(ty)) => ty.clone(),
                    (CompareClass::Int, None) => CType::long(),
                };
                Ok(OperandSpec::Const(
                    self.materialize_constant(&target, constant)?,
                ))
            }
        }
    }

    /// Declared type behind an operand; None for constants.
    fn operand_type(&self, operand: &Operand) -> Result<Option<CType>, GenError> {
        match operand {
            Operand::Ident(name) => {
                let decl = self
                    .module
                    .global(name)
                    .ok_or_else(|| GenError::GlobalNotFound(name.clone()))?;
                Ok(Some(decl.ty.clone()))
            }
            Operand::Constant(_) => Ok(None),
        }
    }

    fn compare_class_for(&self, ty: &CType) -> Result<CompareClass, GenError> {
        if ty.is_float() {
            Ok(CompareClass::Float)
        } else if ty.is_integer() || ty.is_pointer() {
            Ok(CompareClass::Int)
        } else {
            Err(GenError::UnsupportedComparison {
                type_name: ty.to_string(),
            })
        }
    }

    /// Synthesize replacement routines plus bind/unbind swap routines for a
    /// mockup fixture.
    fn gen_mockups(
        &mut self,
        fixture: &MockupFixture,
        scope_id: &str,
    ) -> Result<CompiledMockups, GenError> {
        let mut bind_functions = Vec::new();
        let mut unbind_functions = Vec::new();

        for mockup in &fixture.functions {
            let decl = self
                .module
                .function(&mockup.call.name)
                .ok_or_else(|| GenError::FunctionNotFound(mockup.call.name.clone()))?
                .clone();

            // Same-signature replacement that immediately returns the fixed
            // value; for void targets it just returns.
            let steps = if decl.ret.is_void() {
                Vec::new()
            } else {
                let value = self.materialize_constant(&decl.ret, &mockup.result)?;
                vec![Step::ReturnValue(value)]
            };

            let mockup_name =
                self.unique_routine_name(&format!("mockup_{}_{}", self.mockup_counter, decl.name));
            self.mockup_counter += 1;
            self.install(Routine {
                name: mockup_name.clone(),
                steps,
            });

            let bind = self.unique_routine_name(&format!("bind_{}", mockup_name));
            self.install(Routine {
                name: bind.clone(),
                steps: vec![Step::BindMockup {
                    target: decl.name.clone(),
                    routine: Some(mockup_name),
                }],
            });
            bind_functions.push(bind);

            let unbind = self.unique_routine_name(&format!("unbind_{}", decl.name));
            self.install(Routine {
                name: unbind.clone(),
                steps: vec![Step::BindMockup {
                    target: decl.name.clone(),
                    routine: None,
                }],
            });
            unbind_functions.push(unbind);
        }
        unbind_functions.reverse();

        let (bind_variables, unbind_variables) = if fixture.variables.is_empty() {
            (None, None)
        } else {
            let mut bind_steps = Vec::new();
            let mut restore_steps = Vec::new();
            for variable in &fixture.variables {
                let decl = self
                    .module
                    .global(&variable.assignment.name)
                    .ok_or_else(|| GenError::GlobalNotFound(variable.assignment.name.clone()))?
                    .clone();
                let shadow = self.fresh_shadow_name(&decl.name);
                bind_steps.push(Step::BackupGlobal {
                    original: decl.name.clone(),
                    shadow: shadow.clone(),
                });
                let value = self.gen_assign_value(&decl.ty, &variable.assignment.value)?;
                bind_steps.push(Step::StoreGlobal {
                    name: decl.name.clone(),
                    ty: decl.ty,
                    value,
                });
                restore_steps.push(Step::RestoreGlobal {
                    shadow,
                    original: decl.name,
                });
            }
            restore_steps.reverse();

            let bind = self.unique_routine_name(&format!("mockup_vars_{}", scope_id));
            self.install(Routine {
                name: bind.clone(),
                steps: bind_steps,
            });
            let unbind = self.unique_routine_name(&format!("restore_mockup_vars_{}", scope_id));
            self.install(Routine {
                name: unbind.clone(),
                steps: restore_steps,
            });
            (Some(bind), Some(unbind))
        };

        Ok(CompiledMockups {
            bind_functions,
            unbind_functions,
            bind_variables,
            unbind_variables,
        })
    }

    /// `test_<function>_<n>`, first n that collides with nothing.
    fn fresh_test_name(&mut self, function: &str) -> String {
        let mut n = 0;
        loop {
            let candidate = format!("test_{}_{}", function, n);
            if !self.used_names.contains(&candidate) && !self.module.contains_symbol(&candidate) {
                self.used_names.insert(candidate.clone());
                return candidate;
            }
            n += 1;
        }
    }

    /// `backup_<global>` with a numeric suffix when taken.
    fn fresh_shadow_name(&mut self, global: &str) -> String {
        let base = format!("backup_{}", global);
        if !self.used_names.contains(&base) && !self.module.contains_symbol(&base) {
            self.used_names.insert(base.clone());
            return base;
        }
        let mut n = 1;
        loop {
            let candidate = format!("{}_{}", base, n);
            if !self.used_names.contains(&candidate) && !self.module.contains_symbol(&candidate) {
                self.used_names.insert(candidate.clone());
                return candidate;
            }
            n += 1;
        }
    }

    fn unique_routine_name(&mut self, base: &str) -> String {
        if !self.used_names.contains(base) && !self.module.contains_symbol(base) {
            self.used_names.insert(base.to_string());
            return base.to_string();
        }
        let mut n = 1;
        loop {
            let candidate = format!("{}_{}", base, n);
            if !self.used_names.contains(&candidate) && !self.module.contains_symbol(&candidate) {
                self.used_names.insert(candidate.clone());
                return candidate;
            }
            n += 1;
        }
    }

    fn install(&mut self, routine: Routine) {
        self.routines.insert(routine.name.clone(), routine);
    }
}

fn sanitize(group_path: &str) -> String {
    group_path.replace(':', "_")
}

fn operand_is_float_literal(operand: &Operand) -> bool {
    matches!(operand, Operand::Constant(Constant::Float(_)))
}
