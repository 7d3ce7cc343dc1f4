//! Recursive-descent parser for the test-description language
//!
//! Grammar (informal):
//!
//! ```text
//! TestFile      := TestGroup
//! TestGroup     := [GroupMockup] [GroupSetup]
//!                  (TestDefinition | "group" [ID] "{" TestGroup "}")*
//!                  [GroupTeardown]
//! TestDefinition:= [TestData] [TestMockup] [TestSetup] TestFunction [TestTeardown]
//! TestFunction  := FunctionCall [CompareOp ExpectedConstant] ";"
//! FunctionCall  := ID "(" (FunctionArgument ("," FunctionArgument)*)? ")"
//! FunctionArgument := BufferAlloc | "@" | Constant
//! TestFixture   := ((FunctionCall | ExpectedExpression | VariableAssignment) ";")*
//! ExpectedExpression := Operand CompareOp Operand
//! VariableAssignment := ID "=" (StructInitializer | BufferAlloc | Constant)
//! BufferAlloc   := "[" IntConst [":" (StructInitializer | Constant)] "]"
//! StructInitializer := "{" (DesignatedInitializer | InitializerList) "}"
//! ```
//!
//! One token of lookahead ([`Parser::peek_next`]) on top of the current
//! token is enough to disambiguate every production. Nodes own their
//! children, so a failed production simply drops whatever it had built.

use super::ast::*;
use super::lexer::{Token, Tokenizer};
use std::fmt;
use std::path::Path;

/// Parse error: the offending lexeme plus a description of what the parser
/// was looking for at that point.
#[derive(Debug, Clone)]
pub struct ParseError {
    pub expected: String,
    pub found: String,
    pub location: SourceLocation,
}

impl ParseError {
    fn new(expected: &str, found: &Token) -> Self {
        ParseError {
            expected: expected.to_string(),
            found: found.to_string(),
            location: found.location(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Syntax error at line {}, column {}: expected {}, found {}",
            self.location.line, self.location.column, self.expected, self.found
        )
    }
}

impl std::error::Error for ParseError {}

/// Recursive descent parser over a token stream
pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
    group_count: usize,
}

impl Parser {
    /// Parser over an in-memory source buffer.
    pub fn new(source: &str) -> Self {
        let tokens = Tokenizer::new(source).tokenize();
        Self {
            tokens,
            position: 0,
            group_count: 0,
        }
    }

    /// Parser over the contents of a test file.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let mut tokenizer = Tokenizer::from_file(path)?;
        Ok(Self {
            tokens: tokenizer.tokenize(),
            position: 0,
            group_count: 0,
        })
    }

    /// Parse a whole test file: one root group holding every top-level test
    /// and subgroup, with group paths and test group names resolved.
    pub fn parse_test_file(&mut self) -> Result<TestFile, ParseError> {
        let mut group = self.parse_group_body(None)?;
        match self.current() {
            Token::Eof(_) => {}
            other => {
                return Err(ParseError::new("a test definition or 'group'", &other));
            }
        }
        group.resolve_names(None);
        Ok(TestFile { group })
    }

    /// Parse a single function argument from an isolated buffer (used by the
    /// test-data expansion pass on row cells).
    pub fn parse_argument_str(cell: &str) -> Result<FunctionArgument, ParseError> {
        let mut parser = Parser::new(cell);
        let arg = parser.parse_function_argument()?;
        match parser.current() {
            Token::Eof(_) => Ok(arg),
            other => Err(ParseError::new("end of data cell", &other)),
        }
    }

    /// Group body: fixtures, then tests/subgroups in order, then teardown.
    /// `name` is `None` for anonymous groups (auto-named `group_<n>`).
    fn parse_group_body(&mut self, name: Option<String>) -> Result<TestGroup, ParseError> {
        let name = name.unwrap_or_else(|| {
            let name = format!("group_{}", self.group_count);
            self.group_count += 1;
            name
        });

        let mockup = if matches!(self.current(), Token::MockupAll(_)) {
            self.advance();
            Some(self.parse_mockup_block()?)
        } else {
            None
        };

        let setup = if matches!(self.current(), Token::BeforeAll(_)) {
            self.advance();
            Some(self.parse_fixture_block()?)
        } else {
            None
        };

        let mut items = Vec::new();
        loop {
            match self.current() {
                Token::Group(_) => {
                    self.advance();
                    items.push(GroupItem::Group(self.parse_subgroup()?));
                }
                Token::AfterAll(_) | Token::RBrace(_) | Token::Eof(_) => break,
                _ => items.push(GroupItem::Test(self.parse_test_definition()?)),
            }
        }

        let teardown = if matches!(self.current(), Token::AfterAll(_)) {
            self.advance();
            Some(self.parse_fixture_block()?)
        } else {
            None
        };

        Ok(TestGroup {
            name,
            mockup,
            setup,
            items,
            teardown,
        })
    }

    /// `group [ID] "{" TestGroup "}"` (the keyword is already consumed)
    fn parse_subgroup(&mut self) -> Result<TestGroup, ParseError> {
        let name = match self.current() {
            Token::Ident(name, _) => {
                self.advance();
                Some(name)
            }
            _ => None,
        };

        self.expect_lbrace("'{' after 'group'")?;
        let group = self.parse_group_body(name)?;
        self.expect_rbrace("'}' closing the group")?;
        Ok(group)
    }

    fn parse_test_definition(&mut self) -> Result<TestDefinition, ParseError> {
        let data = if matches!(self.current(), Token::Data(_)) {
            let location = self.current().location();
            self.advance();
            let path = match self.current() {
                Token::StringLiteral(path, _) => {
                    self.advance();
                    path
                }
                other => {
                    return Err(ParseError::new("a data file path string", &other));
                }
            };
            Some(TestData { path, location })
        } else {
            None
        };

        let mockup = if matches!(self.current(), Token::Mockup(_)) {
            self.advance();
            Some(self.parse_mockup_block()?)
        } else {
            None
        };

        let setup = if matches!(self.current(), Token::Before(_)) {
            self.advance();
            Some(self.parse_fixture_block()?)
        } else {
            None
        };

        let function = self.parse_test_function()?;

        let teardown = if matches!(self.current(), Token::After(_)) {
            self.advance();
            Some(self.parse_fixture_block()?)
        } else {
            None
        };

        Ok(TestDefinition {
            data,
            mockup,
            setup,
            function,
            teardown,
            group_name: "default".to_string(),
        })
    }

    /// `FunctionCall [CompareOp ExpectedConstant] ";"`
    fn parse_test_function(&mut self) -> Result<TestFunction, ParseError> {
        let call = self.parse_function_call()?;

        let expected = if self.current().is_comparison() {
            let op = self.parse_compare_op()?;
            let value = match self.current() {
                Token::At(_) => {
                    self.advance();
                    ExpectedConstant::Placeholder
                }
                _ => ExpectedConstant::Constant(self.parse_constant("an expected constant")?),
            };
            Some(ExpectedResult { op, value })
        } else {
            None
        };

        self.expect_semicolon("';' after the test function")?;
        Ok(TestFunction { call, expected })
    }

    /// `ID "(" (FunctionArgument ("," FunctionArgument)*)? ")"`
    fn parse_function_call(&mut self) -> Result<FunctionCall, ParseError> {
        let (name, location) = match self.current() {
            Token::Ident(name, loc) => {
                self.advance();
                (name, loc)
            }
            other => return Err(ParseError::new("a function name", &other)),
        };

        match self.current() {
            Token::LParen(_) => self.advance(),
            other => return Err(ParseError::new("'(' after the function name", &other)),
        }

        let mut args = Vec::new();
        if !matches!(self.current(), Token::RParen(_)) {
            loop {
                args.push(self.parse_function_argument()?);
                match self.current() {
                    Token::Comma(_) => self.advance(),
                    Token::RParen(_) => break,
                    other => {
                        return Err(ParseError::new("',' or ')' in the argument list", &other));
                    }
                }
            }
        }
        self.advance(); // consume ')'

        Ok(FunctionCall {
            name,
            args,
            location,
        })
    }

    fn parse_function_argument(&mut self) -> Result<FunctionArgument, ParseError> {
        match self.current() {
            Token::LBracket(_) => Ok(FunctionArgument::Buffer(self.parse_buffer_alloc()?)),
            Token::At(_) => {
                self.advance();
                Ok(FunctionArgument::Placeholder)
            }
            _ => Ok(FunctionArgument::Constant(
                self.parse_constant("a function argument")?,
            )),
        }
    }

    /// `"[" IntConst [":" (StructInitializer | Constant)] "]"`
    fn parse_buffer_alloc(&mut self) -> Result<BufferAlloc, ParseError> {
        match self.current() {
            Token::LBracket(_) => self.advance(),
            other => return Err(ParseError::new("'[' starting a buffer allocation", &other)),
        }

        let count = match self.current() {
            Token::IntLiteral(n, _) if n > 0 => {
                self.advance();
                n as u64
            }
            other => {
                return Err(ParseError::new("a positive buffer size", &other));
            }
        };

        let init = if matches!(self.current(), Token::Colon(_)) {
            self.advance();
            match self.current() {
                Token::LBrace(_) => BufferInitExpr::Struct(self.parse_struct_initializer()?),
                _ => BufferInitExpr::Fill(self.parse_constant("a buffer fill value")?),
            }
        } else {
            BufferInitExpr::Zero
        };

        match self.current() {
            Token::RBracket(_) => self.advance(),
            other => return Err(ParseError::new("']' closing the buffer allocation", &other)),
        }

        Ok(BufferAlloc { count, init })
    }

    /// `"{" (ID "=" InitValue ("," ...)* | InitValue ("," ...)*) "}"`
    fn parse_struct_initializer(&mut self) -> Result<StructInitializer, ParseError> {
        self.expect_lbrace("'{' starting a struct initializer")?;

        // Empty initializer list is legal: all fields stay zeroed.
        if matches!(self.current(), Token::RBrace(_)) {
            self.advance();
            return Ok(StructInitializer::List(Vec::new()));
        }

        let designated =
            matches!(self.current(), Token::Ident(_, _)) && matches!(self.peek_next(), Token::Eq(_));

        if designated {
            let mut fields = Vec::new();
            loop {
                let name = match self.current() {
                    Token::Ident(name, _) => {
                        self.advance();
                        name
                    }
                    other => return Err(ParseError::new("a field name", &other)),
                };
                match self.current() {
                    Token::Eq(_) => self.advance(),
                    other => return Err(ParseError::new("'=' after the field name", &other)),
                }
                fields.push((name, self.parse_init_value()?));
                match self.current() {
                    Token::Comma(_) => self.advance(),
                    Token::RBrace(_) => break,
                    other => {
                        return Err(ParseError::new("',' or '}' in the initializer", &other));
                    }
                }
            }
            self.advance(); // consume '}'
            Ok(StructInitializer::Designated(fields))
        } else {
            let mut values = Vec::new();
            loop {
                values.push(self.parse_init_value()?);
                match self.current() {
                    Token::Comma(_) => self.advance(),
                    Token::RBrace(_) => break,
                    other => {
                        return Err(ParseError::new("',' or '}' in the initializer", &other));
                    }
                }
            }
            self.advance(); // consume '}'
            Ok(StructInitializer::List(values))
        }
    }

    fn parse_init_value(&mut self) -> Result<InitValue, ParseError> {
        match self.current() {
            Token::LBrace(_) => Ok(InitValue::Nested(self.parse_struct_initializer()?)),
            _ => Ok(InitValue::Scalar(
                self.parse_constant("an initializer value")?,
            )),
        }
    }

    /// Fixture block: `"{" ((Call | Assignment | ExpectedExpression) ";")* "}"`
    fn parse_fixture_block(&mut self) -> Result<TestFixture, ParseError> {
        self.expect_lbrace("'{' opening the fixture block")?;

        let mut statements = Vec::new();
        while !matches!(self.current(), Token::RBrace(_)) {
            statements.push(self.parse_fixture_statement()?);
            self.expect_semicolon("';' after the fixture statement")?;
        }
        self.advance(); // consume '}'

        Ok(TestFixture { statements })
    }

    fn parse_fixture_statement(&mut self) -> Result<FixtureStatement, ParseError> {
        match self.current() {
            Token::Ident(_, _) => match self.peek_next() {
                Token::LParen(_) => Ok(FixtureStatement::Call(self.parse_function_call()?)),
                Token::Eq(_) => Ok(FixtureStatement::Assign(self.parse_variable_assignment()?)),
                t if t.is_comparison() => {
                    Ok(FixtureStatement::Expect(self.parse_expected_expression()?))
                }
                other => Err(ParseError::new(
                    "'(', '=' or a comparison operator after the identifier",
                    &other,
                )),
            },
            Token::IntLiteral(_, _)
            | Token::FloatLiteral(_, _)
            | Token::CharLiteral(_, _)
            | Token::StringLiteral(_, _) => {
                Ok(FixtureStatement::Expect(self.parse_expected_expression()?))
            }
            other => Err(ParseError::new(
                "a function call, assignment or expected expression",
                &other,
            )),
        }
    }

    /// `ID "=" (StructInitializer | BufferAlloc | Constant)`
    fn parse_variable_assignment(&mut self) -> Result<VariableAssignment, ParseError> {
        let (name, location) = match self.current() {
            Token::Ident(name, loc) => {
                self.advance();
                (name, loc)
            }
            other => return Err(ParseError::new("a global variable name", &other)),
        };

        match self.current() {
            Token::Eq(_) => self.advance(),
            other => return Err(ParseError::new("'=' after the variable name", &other)),
        }

        let value = match self.current() {
            Token::LBrace(_) => AssignValue::Struct(self.parse_struct_initializer()?),
            Token::LBracket(_) => AssignValue::Buffer(self.parse_buffer_alloc()?),
            _ => AssignValue::Constant(self.parse_constant("an assignment value")?),
        };

        Ok(VariableAssignment {
            name,
            value,
            location,
        })
    }

    /// `Operand CompareOp Operand`
    fn parse_expected_expression(&mut self) -> Result<ExpectedExpression, ParseError> {
        let location = self.current().location();
        let lhs = self.parse_operand()?;
        let op = self.parse_compare_op()?;
        let rhs = self.parse_operand()?;
        Ok(ExpectedExpression {
            lhs,
            op,
            rhs,
            location,
        })
    }

    fn parse_operand(&mut self) -> Result<Operand, ParseError> {
        match self.current() {
            Token::Ident(name, _) => {
                self.advance();
                Ok(Operand::Ident(name))
            }
            _ => Ok(Operand::Constant(
                self.parse_constant("an identifier or constant operand")?,
            )),
        }
    }

    fn parse_compare_op(&mut self) -> Result<CompareOp, ParseError> {
        let op = match self.current() {
            Token::EqEq(_) => CompareOp::Eq,
            Token::NotEq(_) => CompareOp::Ne,
            Token::Ge(_) => CompareOp::Ge,
            Token::Le(_) => CompareOp::Le,
            Token::Gt(_) => CompareOp::Gt,
            Token::Lt(_) => CompareOp::Lt,
            other => return Err(ParseError::new("a comparison operator", &other)),
        };
        self.advance();
        Ok(op)
    }

    fn parse_constant(&mut self, expected: &str) -> Result<Constant, ParseError> {
        let constant = match self.current() {
            Token::IntLiteral(n, _) => Constant::Int(n),
            Token::FloatLiteral(x, _) => Constant::Float(x),
            Token::CharLiteral(c, _) => Constant::Char(c),
            Token::StringLiteral(s, _) => Constant::Str(s),
            other => return Err(ParseError::new(expected, &other)),
        };
        self.advance();
        Ok(constant)
    }

    /// Mockup block: `"{" ((FunctionCall "=" Constant | Assignment) ";")* "}"`
    fn parse_mockup_block(&mut self) -> Result<MockupFixture, ParseError> {
        self.expect_lbrace("'{' opening the mockup block")?;

        let mut fixture = MockupFixture::default();
        while !matches!(self.current(), Token::RBrace(_)) {
            match self.current() {
                Token::Ident(_, _) => match self.peek_next() {
                    Token::LParen(_) => {
                        let call = self.parse_function_call()?;
                        match self.current() {
                            Token::Eq(_) => self.advance(),
                            other => {
                                return Err(ParseError::new(
                                    "'=' after the mocked-up function",
                                    &other,
                                ));
                            }
                        }
                        let result = self.parse_constant("the mockup return value")?;
                        fixture.functions.push(MockupFunction { call, result });
                    }
                    Token::Eq(_) => {
                        let assignment = self.parse_variable_assignment()?;
                        fixture.variables.push(MockupVariable { assignment });
                    }
                    other => {
                        return Err(ParseError::new(
                            "'(' or '=' after the mockup identifier",
                            &other,
                        ));
                    }
                },
                other => {
                    return Err(ParseError::new(
                        "a function or variable mockup declaration",
                        &other,
                    ));
                }
            }
            self.expect_semicolon("';' after the mockup declaration")?;
        }
        self.advance(); // consume '}'

        Ok(fixture)
    }

    fn expect_lbrace(&mut self, expected: &str) -> Result<(), ParseError> {
        match self.current() {
            Token::LBrace(_) => {
                self.advance();
                Ok(())
            }
            other => Err(ParseError::new(expected, &other)),
        }
    }

    fn expect_rbrace(&mut self, expected: &str) -> Result<(), ParseError> {
        match self.current() {
            Token::RBrace(_) => {
                self.advance();
                Ok(())
            }
            other => Err(ParseError::new(expected, &other)),
        }
    }

    fn expect_semicolon(&mut self, expected: &str) -> Result<(), ParseError> {
        match self.current() {
            Token::Semicolon(_) => {
                self.advance();
                Ok(())
            }
            other => Err(ParseError::new(expected, &other)),
        }
    }

    fn current(&self) -> Token {
        self.tokens
            .get(self.position)
            .cloned()
            .unwrap_or_else(|| Token::Eof(SourceLocation::new(0, 0)))
    }

    fn peek_next(&self) -> Token {
        self.tokens
            .get(self.position + 1)
            .cloned()
            .unwrap_or_else(|| Token::Eof(SourceLocation::new(0, 0)))
    }

    fn advance(&mut self) {
        if self.position < self.tokens.len() {
            self.position += 1;
        }
    }
}
