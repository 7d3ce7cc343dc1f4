//! # Introduction
//!
//! jitest runs unit tests written in a small test-description language
//! against an already-compiled C translation unit. A test file is parsed
//! into an AST, parameterized tests are expanded against tabular data,
//! executable routines are generated against the module's symbol table, and
//! each test runs in a forked child process so a crash in compiled code
//! cannot take the orchestrator down.
//!
//! ## Execution pipeline
//!
//! ```text
//! Source → Lexer → Parser → AST → Data expansion → Codegen → Isolated execution → Results
//! ```
//!
//! 1. [`parser`] — tokenises the source and builds an AST of groups, test
//!    definitions, fixtures, mockups and expected expressions.
//! 2. [`data`] — replaces `@` placeholders with concrete values from an
//!    external table, one test instance per row.
//! 3. [`module`] — the compiled-translation-unit seam: symbol table, typed
//!    values, globals and the buffer heap.
//! 4. [`codegen`] — emits one independently invocable routine per
//!    executable unit, with global backup/restore and mockup synthesis.
//! 5. [`engine`] — executes routines with scoped stdout/stderr capture.
//! 6. [`runner`] — fork-per-test isolation, the child→parent result
//!    protocol, and group-scope orchestration.
//! 7. [`results`] — PASSED/FAILED/CRASHED outcomes and the run summary.
//!
//! ## Test language
//!
//! ```text
//! mockup_all { external_read() = 7; }
//! before_all { gint = 10; }
//!
//! sum(2, 3) == 5;
//!
//! group edge_cases {
//!     before { gshort = -1; }
//!     sum_with_global() == 15;
//!     after { gshort == -1; }
//! }
//!
//! data "rows.csv"
//! sum(@, @) == @;
//!
//! after_all { gint == 10; }
//! ```
//!
//! The C front end producing the module, and any interactive shell around
//! this library, are external collaborators; [`Summary::exit_code`]
//! preserves the convention that a driver exits with the number of tests
//! that did not pass.

pub mod codegen;
pub mod data;
pub mod engine;
pub mod module;
pub mod parser;
pub mod results;
pub mod runner;

use parser::parser::Parser;
use std::fmt;
use std::io;
use std::path::Path;

pub use results::{Outcome, Summary, TestResult};
pub use runner::RunConfig;

/// Any failure of the pipeline, from tokenization through execution
#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    Parse(parser::parser::ParseError),
    Data(data::DataError),
    Gen(codegen::GenError),
    Run(runner::RunError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "{}", err),
            Error::Parse(err) => write!(f, "{}", err),
            Error::Data(err) => write!(f, "{}", err),
            Error::Gen(err) => write!(f, "{}", err),
            Error::Run(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Parse(err) => Some(err),
            Error::Data(err) => Some(err),
            Error::Gen(err) => Some(err),
            Error::Run(err) => Some(err),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<parser::parser::ParseError> for Error {
    fn from(err: parser::parser::ParseError) -> Self {
        Error::Parse(err)
    }
}

impl From<data::DataError> for Error {
    fn from(err: data::DataError) -> Self {
        Error::Data(err)
    }
}

impl From<codegen::GenError> for Error {
    fn from(err: codegen::GenError) -> Self {
        Error::Gen(err)
    }
}

impl From<runner::RunError> for Error {
    fn from(err: runner::RunError) -> Self {
        Error::Run(err)
    }
}

/// Run the tests of an in-memory source buffer against a module. Relative
/// `data` paths resolve against the current directory.
pub fn run_source(
    source: &str,
    module: &module::Module,
    config: &RunConfig,
) -> Result<Summary, Error> {
    run_parsed(Parser::new(source), Path::new("."), module, config)
}

/// Run a test file against a module. Relative `data` paths resolve against
/// the file's directory.
pub fn run_file(
    path: &Path,
    module: &module::Module,
    config: &RunConfig,
) -> Result<Summary, Error> {
    let parser = Parser::from_file(path)?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    run_parsed(parser, base, module, config)
}

fn run_parsed(
    mut parser: Parser,
    base: &Path,
    module: &module::Module,
    config: &RunConfig,
) -> Result<Summary, Error> {
    let mut file = parser.parse_test_file()?;
    data::expand(&mut file, base)?;
    let plan = codegen::generate(&file, module)?;
    Ok(runner::run_plan(&plan, module, config)?)
}

#[cfg(test)]
pub(crate) mod test_sync {
    //! Tests that redirect the process-wide stdout/stderr descriptors must
    //! not overlap; this lock serializes them across the test binary.

    use std::sync::{Mutex, MutexGuard, OnceLock};

    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    pub fn serial() -> MutexGuard<'static, ()> {
        match LOCK.get_or_init(|| Mutex::new(())).lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
