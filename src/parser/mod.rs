//! Test-description language front end
//!
//! This module transforms test-file text into an abstract syntax tree:
//! - [`lexer`]: tokenization (source text → tokens)
//! - [`parser`]: parsing (tokens → AST)
//! - [`ast`]: AST node definitions
//!
//! # Language
//!
//! A test file is a root group of test definitions and nested `group` blocks.
//! Tests call functions of an already-compiled C translation unit and check
//! their results; `before`/`after` fixtures mutate and verify globals around
//! a test, `before_all`/`after_all` around a group, and `mockup`/`mockup_all`
//! blocks temporarily replace functions or globals for a scope. `data` binds
//! a test's `@` placeholders to rows of an external table.
//!
//! # Parser Implementation
//!
//! Hand-written recursive descent with one token of lookahead. Invalid
//! lexemes survive tokenization as error tokens and are reported by the
//! parser as syntax errors with line/column context.

pub mod ast;
pub mod lexer;
pub mod parser;
