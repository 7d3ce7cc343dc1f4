//! Isolation and orchestration: runs a generated plan, one test at a time
//!
//! Each test definition executes in a forked child process so that a crash
//! in compiled code (segmentation fault, abort) cannot take the orchestrator
//! down: the parent reads the child's result record from a pipe, reaps it,
//! and reports a CRASHED outcome on abnormal termination. Group fixtures
//! (`before_all`/`after_all`/`mockup_all`) run in the parent, so their
//! effects reach every test of the group through the forked memory image and
//! are unwound on group exit, innermost scope first.
//!
//! Mockup scoping is a stack of bind-routine frames: entering a scope pushes
//! a frame and invokes its bind routines, leaving it invokes the unbinds and
//! then re-invokes every enclosing frame's binds, so the nearest enclosing
//! replacement of a symbol wins again. Activation is always expressed as
//! routine invocation.
//!
//! Scheduling is strictly sequential: one child at a time, the parent blocks
//! on each before starting the next, and no timeout is enforced.

pub mod protocol;

use crate::codegen::{CompiledGroup, CompiledItem, CompiledTest, Plan};
use crate::engine::{Engine, ExecError};
use crate::module::Module;
use crate::results::{Outcome, Summary, TestResult};
use errno::Errno;
use std::fmt;
use std::io;

#[cfg(unix)]
use errno::errno;
#[cfg(unix)]
use std::fs::File;
#[cfg(unix)]
use std::io::Read;
#[cfg(unix)]
use std::os::unix::io::FromRawFd;

/// Failures of the orchestration itself, as opposed to failures of a test
#[derive(Debug)]
pub enum RunError {
    Exec(ExecError),
    Syscall { op: &'static str, errno: Errno },
    Io(io::Error),
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunError::Exec(err) => write!(f, "{}", err),
            RunError::Syscall { op, errno } => write!(f, "{} failed: {}", op, errno),
            RunError::Io(err) => write!(f, "result transport failed: {}", err),
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RunError::Exec(err) => Some(err),
            RunError::Io(err) => Some(err),
            RunError::Syscall { .. } => None,
        }
    }
}

impl From<ExecError> for RunError {
    fn from(err: ExecError) -> Self {
        RunError::Exec(err)
    }
}

impl From<io::Error> for RunError {
    fn from(err: io::Error) -> Self {
        RunError::Io(err)
    }
}

/// Run-wide switches
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Fork one child per test. Off (or on a target without `fork`), the
    /// whole sequence runs in-process and a crash aborts the entire run.
    pub isolate: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            isolate: cfg!(unix),
        }
    }
}

/// Execute every test of a generated plan, in order, and collect results.
pub fn run_plan(plan: &Plan, module: &Module, config: &RunConfig) -> Result<Summary, RunError> {
    let mut runner = Runner {
        engine: Engine::new(module, plan),
        config,
        summary: Summary::default(),
        mockup_frames: Vec::new(),
    };
    runner.run_group(&plan.root)?;
    Ok(runner.summary)
}

struct Runner<'m, 'c> {
    engine: Engine<'m>,
    config: &'c RunConfig,
    summary: Summary,
    /// One frame per open scope: the bind-routine names to re-invoke when a
    /// nested scope exits
    mockup_frames: Vec<Vec<String>>,
}

impl Runner<'_, '_> {
    fn run_group(&mut self, group: &CompiledGroup) -> Result<(), RunError> {
        for warning in &group.warnings {
            eprintln!("warning [{}]: {}", group.name, warning);
        }

        self.enter_scope(group)?;

        if let Some(setup) = &group.setup {
            self.engine.run(setup)?;
        }

        for item in &group.items {
            match item {
                CompiledItem::Test(test) => self.run_test(test)?,
                CompiledItem::Group(nested) => self.run_group(nested)?,
            }
        }

        if let Some(teardown) = &group.teardown {
            self.engine.run(teardown)?;
        }

        self.exit_scope(group)?;
        Ok(())
    }

    /// Push a scope frame and activate the group's mockups.
    fn enter_scope(&mut self, group: &CompiledGroup) -> Result<(), RunError> {
        let mut frame = Vec::new();
        if let Some(mockups) = &group.mockups {
            for bind in &mockups.bind_functions {
                self.engine.run_uncaptured(bind)?;
                frame.push(bind.clone());
            }
            if let Some(bind) = &mockups.bind_variables {
                self.engine.run_uncaptured(bind)?;
            }
        }
        self.mockup_frames.push(frame);
        Ok(())
    }

    /// Deactivate the group's mockups, pop its frame, and re-activate the
    /// enclosing scopes' replacements.
    fn exit_scope(&mut self, group: &CompiledGroup) -> Result<(), RunError> {
        if let Some(mockups) = &group.mockups {
            for unbind in &mockups.unbind_functions {
                self.engine.run_uncaptured(unbind)?;
            }
            if let Some(unbind) = &mockups.unbind_variables {
                self.engine.run_uncaptured(unbind)?;
            }
        }
        self.mockup_frames.pop();
        self.rebind_enclosing()?;
        Ok(())
    }

    /// Re-invoke every open frame's bind routines, outermost first, so the
    /// innermost enclosing replacement of each symbol ends up active.
    fn rebind_enclosing(&mut self) -> Result<(), ExecError> {
        let binds: Vec<String> = self.mockup_frames.iter().flatten().cloned().collect();
        for bind in binds {
            self.engine.run_uncaptured(&bind)?;
        }
        Ok(())
    }

    fn run_test(&mut self, test: &CompiledTest) -> Result<(), RunError> {
        let result = if self.config.isolate {
            self.run_isolated(test)?
        } else {
            match self.execute_sequence(test) {
                Ok(result) => result,
                // A model-level fault (unknown symbol at run time) fails the
                // test; the run continues.
                Err(err) => aborted(test, err.to_string()),
            }
        };
        self.summary.push(result);
        Ok(())
    }

    /// The full per-test sequence, in the calling process: setup, mockup
    /// activation, the function under test, mockup deactivation, teardown,
    /// then the scope cleanup restoring this test's global snapshots.
    fn execute_sequence(&mut self, test: &CompiledTest) -> Result<TestResult, ExecError> {
        let mut passed = true;
        let mut failed = Vec::new();
        let mut output = String::new();

        if let Some(setup) = &test.setup {
            let outcome = self.engine.run(setup)?;
            passed &= outcome.passed;
            failed.extend(outcome.failed);
            output.push_str(&outcome.output);
        }

        if let Some(mockups) = &test.mockups {
            for bind in &mockups.bind_functions {
                self.engine.run_uncaptured(bind)?;
            }
            if let Some(bind) = &mockups.bind_variables {
                self.engine.run_uncaptured(bind)?;
            }
        }

        let body = self.engine.run(&test.body)?;
        passed &= body.passed;
        failed.extend(body.failed);
        output.push_str(&body.output);
        let actual = if test.ret.is_void() {
            String::new()
        } else {
            body.value.format_as(&test.ret)
        };

        if let Some(mockups) = &test.mockups {
            for unbind in &mockups.unbind_functions {
                self.engine.run_uncaptured(unbind)?;
            }
            if let Some(unbind) = &mockups.unbind_variables {
                self.engine.run_uncaptured(unbind)?;
            }
        }
        self.rebind_enclosing()?;

        if let Some(teardown) = &test.teardown {
            let outcome = self.engine.run(teardown)?;
            passed &= outcome.passed;
            failed.extend(outcome.failed);
            output.push_str(&outcome.output);
        }

        if let Some(cleanup) = &test.cleanup {
            let outcome = self.engine.run_uncaptured(cleanup)?;
            passed &= outcome.passed;
            failed.extend(outcome.failed);
        }

        Ok(TestResult {
            group: test.group_name.clone(),
            name: test.name.clone(),
            signature: test.signature.clone(),
            outcome: if passed { Outcome::Passed } else { Outcome::Failed },
            actual,
            expected: test.expected.clone(),
            warnings: test.warnings.clone(),
            output,
            failed_expressions: failed,
        })
    }

    /// Fork, run the sequence in the child, and read its record back. The
    /// parent never observes the child's global mutations directly; the one
    /// pipe record is the only channel.
    #[cfg(unix)]
    fn run_isolated(&mut self, test: &CompiledTest) -> Result<TestResult, RunError> {
        let mut fds = [0 as libc::c_int; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } == -1 {
            return Err(RunError::Syscall {
                op: "pipe",
                errno: errno(),
            });
        }
        let [read_fd, write_fd] = fds;

        match unsafe { libc::fork() } {
            -1 => {
                unsafe {
                    libc::close(read_fd);
                    libc::close(write_fd);
                }
                Err(RunError::Syscall {
                    op: "fork",
                    errno: errno(),
                })
            }
            0 => {
                unsafe { libc::close(read_fd) };
                let status = self.child_main(test, write_fd);
                unsafe { libc::_exit(status) }
            }
            child => {
                unsafe { libc::close(write_fd) };
                self.collect_child(read_fd, child, test)
            }
        }
    }

    #[cfg(not(unix))]
    fn run_isolated(&mut self, test: &CompiledTest) -> Result<TestResult, RunError> {
        // No fork on this target: run in-process with no crash containment.
        match self.execute_sequence(test) {
            Ok(result) => Ok(result),
            Err(err) => Ok(aborted(test, err.to_string())),
        }
    }

    /// Child side: run the sequence, serialize one record, report the write
    /// status as the exit code. Never returns to the orchestration loop.
    #[cfg(unix)]
    fn child_main(&mut self, test: &CompiledTest, write_fd: libc::c_int) -> i32 {
        let record = match self.execute_sequence(test) {
            Ok(record) => record,
            Err(err) => aborted(test, err.to_string()),
        };
        let mut writer = unsafe { File::from_raw_fd(write_fd) };
        match protocol::write_record(&mut writer, &record) {
            Ok(()) => 0,
            Err(_) => 1,
        }
    }

    /// Parent side: drain the pipe, reap the child, then decide. Draining
    /// before the wait keeps a record larger than the pipe buffer from
    /// deadlocking child against parent.
    #[cfg(unix)]
    fn collect_child(
        &mut self,
        read_fd: libc::c_int,
        child: libc::pid_t,
        test: &CompiledTest,
    ) -> Result<TestResult, RunError> {
        let mut reader = unsafe { File::from_raw_fd(read_fd) };
        let mut bytes = Vec::new();
        let drained = reader.read_to_end(&mut bytes);

        let mut status: libc::c_int = 0;
        loop {
            if unsafe { libc::waitpid(child, &mut status, 0) } != -1 {
                break;
            }
            let err = errno();
            if err.0 != libc::EINTR {
                return Err(RunError::Syscall {
                    op: "waitpid",
                    errno: err,
                });
            }
        }

        // Signal or non-zero exit: report CRASHED and discard whatever
        // partial bytes made it into the pipe.
        let exited_cleanly = libc::WIFEXITED(status) && libc::WEXITSTATUS(status) == 0;
        if !exited_cleanly {
            return Ok(TestResult::crashed(
                &test.group_name,
                &test.name,
                &test.signature,
            ));
        }

        drained?;
        protocol::read_record(&mut bytes.as_slice()).map_err(RunError::Io)
    }
}

/// Failed record for a test whose sequence hit a model-level fault
fn aborted(test: &CompiledTest, reason: String) -> TestResult {
    TestResult {
        group: test.group_name.clone(),
        name: test.name.clone(),
        signature: test.signature.clone(),
        outcome: Outcome::Failed,
        actual: String::new(),
        expected: test.expected.clone(),
        warnings: test.warnings.clone(),
        output: String::new(),
        failed_expressions: vec![reason],
    }
}
