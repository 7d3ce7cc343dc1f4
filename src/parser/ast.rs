//! AST node model for the test-description language
//!
//! Every construct of the language is a tagged enum or a plain struct; the
//! passes downstream (placeholder expansion, code generation) dispatch with
//! `match`, so adding a node kind is a compile-time checked change.
//!
//! Ownership is strictly tree-shaped: a parse failure drops the partially
//! built subtree when its owning handle goes out of scope.

use std::fmt;

/// Source location information for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
}

impl SourceLocation {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

/// Comparison operators usable in expected results and expected expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Ge,
    Le,
    Gt,
    Lt,
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Ge => ">=",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Lt => "<",
        };
        write!(f, "{}", s)
    }
}

/// A literal constant as written in the test file.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Int(i64),
    Float(f64),
    Char(i8),
    Str(String),
}

impl Constant {
    /// Render the constant the way it appeared in source.
    pub fn render(&self) -> String {
        match self {
            Constant::Int(n) => n.to_string(),
            Constant::Float(x) => x.to_string(),
            Constant::Char(c) => {
                let byte = *c as u8;
                if byte.is_ascii_graphic() || byte == b' ' {
                    format!("'{}'", byte as char)
                } else {
                    format!("'\\x{:02x}'", byte)
                }
            }
            Constant::Str(s) => format!("\"{}\"", s),
        }
    }
}

/// Buffer element initialization
#[derive(Debug, Clone, PartialEq)]
pub enum BufferInitExpr {
    /// No explicit value: every element is zeroed
    Zero,
    /// Scalar fill value broadcast across every element
    Fill(Constant),
    /// Struct initializer replicated across every element
    Struct(StructInitializer),
}

/// `[count]`, `[count:fill]` or `[count:{...}]` — allocation semantics for
/// pointer arguments and pointer globals
#[derive(Debug, Clone, PartialEq)]
pub struct BufferAlloc {
    pub count: u64,
    pub init: BufferInitExpr,
}

/// One element of a positional initializer list
#[derive(Debug, Clone, PartialEq)]
pub enum InitValue {
    Scalar(Constant),
    Nested(StructInitializer),
}

/// `{...}` struct initializer.
///
/// Designated (field-name based) initializers parse but are rejected during
/// code generation: struct layouts expose field count and types, not names.
#[derive(Debug, Clone, PartialEq)]
pub enum StructInitializer {
    List(Vec<InitValue>),
    Designated(Vec<(String, InitValue)>),
}

/// One positional argument of a function call
#[derive(Debug, Clone, PartialEq)]
pub enum FunctionArgument {
    Constant(Constant),
    Buffer(BufferAlloc),
    /// `@` — resolved from a test-data row before code generation
    Placeholder,
}

/// Call to a function of the compiled translation unit
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub args: Vec<FunctionArgument>,
    pub location: SourceLocation,
}

/// Right-hand side of a test function's expected result
#[derive(Debug, Clone, PartialEq)]
pub enum ExpectedConstant {
    Constant(Constant),
    /// `@` — resolved from a test-data row before code generation
    Placeholder,
}

/// `<op> <constant>` following the function under test
#[derive(Debug, Clone, PartialEq)]
pub struct ExpectedResult {
    pub op: CompareOp,
    pub value: ExpectedConstant,
}

impl ExpectedResult {
    /// Rendering used for the "expected value" result column, e.g. `== 5`.
    pub fn render(&self) -> String {
        match &self.value {
            ExpectedConstant::Constant(c) => format!("{} {}", self.op, c.render()),
            ExpectedConstant::Placeholder => format!("{} @", self.op),
        }
    }
}

/// The function under test plus its optional expected result
#[derive(Debug, Clone, PartialEq)]
pub struct TestFunction {
    pub call: FunctionCall,
    pub expected: Option<ExpectedResult>,
}

/// Identifier-or-constant operand of an expected expression
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Ident(String),
    Constant(Constant),
}

impl Operand {
    pub fn render(&self) -> String {
        match self {
            Operand::Ident(name) => name.clone(),
            Operand::Constant(c) => c.render(),
        }
    }
}

/// Standalone boolean check, independent of the function's return value
#[derive(Debug, Clone, PartialEq)]
pub struct ExpectedExpression {
    pub lhs: Operand,
    pub op: CompareOp,
    pub rhs: Operand,
    pub location: SourceLocation,
}

impl ExpectedExpression {
    /// Source-shaped rendering used when reporting a failed check.
    pub fn render(&self) -> String {
        format!("{} {} {}", self.lhs.render(), self.op, self.rhs.render())
    }
}

/// Value assigned to a global variable
#[derive(Debug, Clone, PartialEq)]
pub enum AssignValue {
    Constant(Constant),
    Buffer(BufferAlloc),
    Struct(StructInitializer),
}

/// `name = value;` targeting a global of the translation unit
#[derive(Debug, Clone, PartialEq)]
pub struct VariableAssignment {
    pub name: String,
    pub value: AssignValue,
    pub location: SourceLocation,
}

/// One statement of a `before`/`after` fixture, in source order
#[derive(Debug, Clone, PartialEq)]
pub enum FixtureStatement {
    Call(FunctionCall),
    Assign(VariableAssignment),
    Expect(ExpectedExpression),
}

/// Body of a `before`/`after`/`before_all`/`after_all` block
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestFixture {
    pub statements: Vec<FixtureStatement>,
}

impl TestFixture {
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

/// `f(args) = constant;` — temporary replacement body for a function
#[derive(Debug, Clone, PartialEq)]
pub struct MockupFunction {
    pub call: FunctionCall,
    pub result: Constant,
}

/// Temporary replacement value for a global, scoped like a function mockup
#[derive(Debug, Clone, PartialEq)]
pub struct MockupVariable {
    pub assignment: VariableAssignment,
}

/// Body of a `mockup`/`mockup_all` block, in source order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MockupFixture {
    pub functions: Vec<MockupFunction>,
    pub variables: Vec<MockupVariable>,
}

impl MockupFixture {
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty() && self.variables.is_empty()
    }
}

/// `data "path"` — reference to an external tabular data source
#[derive(Debug, Clone, PartialEq)]
pub struct TestData {
    pub path: String,
    pub location: SourceLocation,
}

/// One test case: optional data reference, fixtures, and the function under
/// test. `group_name` is assigned by the enclosing group during resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct TestDefinition {
    pub data: Option<TestData>,
    pub mockup: Option<MockupFixture>,
    pub setup: Option<TestFixture>,
    pub function: TestFunction,
    pub teardown: Option<TestFixture>,
    pub group_name: String,
}

impl TestDefinition {
    /// Number of placeholders across the call arguments and expected result.
    pub fn placeholder_count(&self) -> usize {
        let in_args = self
            .function
            .call
            .args
            .iter()
            .filter(|a| matches!(a, FunctionArgument::Placeholder))
            .count();
        let in_expected = match &self.function.expected {
            Some(ExpectedResult {
                value: ExpectedConstant::Placeholder,
                ..
            }) => 1,
            _ => 0,
        };
        in_args + in_expected
    }
}

/// A test or a nested group, kept in encountered order
#[derive(Debug, Clone, PartialEq)]
pub enum GroupItem {
    Test(TestDefinition),
    Group(TestGroup),
}

/// Named, nestable collection of tests sharing setup/teardown/mockup scope
#[derive(Debug, Clone, PartialEq)]
pub struct TestGroup {
    pub name: String,
    pub mockup: Option<MockupFixture>,
    pub setup: Option<TestFixture>,
    pub items: Vec<GroupItem>,
    pub teardown: Option<TestFixture>,
}

impl TestGroup {
    /// Resolve hierarchical group paths (`parent:child`) and stamp every
    /// test definition with the path of its owning group.
    pub fn resolve_names(&mut self, parent: Option<&str>) {
        if let Some(parent) = parent {
            self.name = format!("{}:{}", parent, self.name);
        }
        let path = self.name.clone();
        for item in &mut self.items {
            match item {
                GroupItem::Test(test) => test.group_name = path.clone(),
                GroupItem::Group(group) => group.resolve_names(Some(&path)),
            }
        }
    }

    /// All test definitions in this group and its subgroups, in order.
    pub fn tests(&self) -> Vec<&TestDefinition> {
        let mut out = Vec::new();
        for item in &self.items {
            match item {
                GroupItem::Test(test) => out.push(test),
                GroupItem::Group(group) => out.extend(group.tests()),
            }
        }
        out
    }
}

/// Root of a parsed test file: exactly one root group
#[derive(Debug, Clone, PartialEq)]
pub struct TestFile {
    pub group: TestGroup,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: Vec<FunctionArgument>) -> FunctionCall {
        FunctionCall {
            name: name.to_string(),
            args,
            location: SourceLocation::new(1, 1),
        }
    }

    fn test_of(call: FunctionCall) -> TestDefinition {
        TestDefinition {
            data: None,
            mockup: None,
            setup: None,
            function: TestFunction {
                call,
                expected: None,
            },
            teardown: None,
            group_name: "default".to_string(),
        }
    }

    #[test]
    fn test_placeholder_count() {
        let mut def = test_of(call(
            "sum",
            vec![
                FunctionArgument::Placeholder,
                FunctionArgument::Constant(Constant::Int(3)),
                FunctionArgument::Placeholder,
            ],
        ));
        def.function.expected = Some(ExpectedResult {
            op: CompareOp::Eq,
            value: ExpectedConstant::Placeholder,
        });
        assert_eq!(def.placeholder_count(), 3);
    }

    #[test]
    fn test_group_path_resolution() {
        let inner = TestGroup {
            name: "child".to_string(),
            mockup: None,
            setup: None,
            items: vec![GroupItem::Test(test_of(call("f", Vec::new())))],
            teardown: None,
        };
        let mut root = TestGroup {
            name: "root".to_string(),
            mockup: None,
            setup: None,
            items: vec![GroupItem::Group(inner)],
            teardown: None,
        };
        root.resolve_names(None);

        match &root.items[0] {
            GroupItem::Group(g) => {
                assert_eq!(g.name, "root:child");
                match &g.items[0] {
                    GroupItem::Test(t) => assert_eq!(t.group_name, "root:child"),
                    _ => panic!("Expected test"),
                }
            }
            _ => panic!("Expected group"),
        }
    }

    #[test]
    fn test_expected_expression_render() {
        let ee = ExpectedExpression {
            lhs: Operand::Ident("gint".to_string()),
            op: CompareOp::Eq,
            rhs: Operand::Constant(Constant::Int(10)),
            location: SourceLocation::new(3, 5),
        };
        assert_eq!(ee.render(), "gint == 10");
    }
}
