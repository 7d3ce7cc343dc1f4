//! Child→parent result record framing
//!
//! One record per test crosses the isolation pipe as length-prefixed named
//! columns: a `u32` column count, then per column a `u32` name length, the
//! name bytes, a `u32` value length and the value bytes, all little-endian.
//! Length prefixes carry embedded newlines in captured output byte-for-byte;
//! the list-shaped columns (warnings, failed expressions) hold one entry per
//! line.

use crate::results::{Outcome, TestResult};
use std::io::{self, Read, Write};

const COL_GROUP: &str = "GROUP";
const COL_TEST: &str = "TEST";
const COL_FUNCTION: &str = "FUNCTION";
const COL_RESULT: &str = "RESULT";
const COL_ACTUAL: &str = "ACTUAL";
const COL_EXPECTED: &str = "EXPECTED";
const COL_WARNINGS: &str = "WARNINGS";
const COL_OUTPUT: &str = "OUTPUT";
const COL_FAILED: &str = "FAILED EXPRESSIONS";

/// Upper bound on any single field, so a garbled length prefix cannot drive
/// an absurd allocation
const MAX_FIELD_LEN: usize = 1 << 24;

pub fn write_record<W: Write>(writer: &mut W, result: &TestResult) -> io::Result<()> {
    let columns = [
        (COL_GROUP, result.group.clone()),
        (COL_TEST, result.name.clone()),
        (COL_FUNCTION, result.signature.clone()),
        (COL_RESULT, result.outcome.to_string()),
        (COL_ACTUAL, result.actual.clone()),
        (COL_EXPECTED, result.expected.clone()),
        (COL_WARNINGS, result.warnings.join("\n")),
        (COL_OUTPUT, result.output.clone()),
        (COL_FAILED, result.failed_expressions.join("\n")),
    ];

    writer.write_all(&(columns.len() as u32).to_le_bytes())?;
    for (name, value) in &columns {
        write_field(writer, name.as_bytes())?;
        write_field(writer, value.as_bytes())?;
    }
    writer.flush()
}

pub fn read_record<R: Read>(reader: &mut R) -> io::Result<TestResult> {
    let count = read_u32(reader)? as usize;
    if count > 64 {
        return Err(invalid("result record column count out of range"));
    }

    let mut result = TestResult {
        group: String::new(),
        name: String::new(),
        signature: String::new(),
        outcome: Outcome::Failed,
        actual: String::new(),
        expected: String::new(),
        warnings: Vec::new(),
        output: String::new(),
        failed_expressions: Vec::new(),
    };
    let mut saw_result = false;

    for _ in 0..count {
        let name = read_field(reader)?;
        let value = read_field(reader)?;
        match name.as_str() {
            COL_GROUP => result.group = value,
            COL_TEST => result.name = value,
            COL_FUNCTION => result.signature = value,
            COL_RESULT => {
                result.outcome = Outcome::parse(&value)
                    .ok_or_else(|| invalid("unrecognized outcome in result record"))?;
                saw_result = true;
            }
            COL_ACTUAL => result.actual = value,
            COL_EXPECTED => result.expected = value,
            COL_WARNINGS => result.warnings = split_lines(&value),
            COL_OUTPUT => result.output = value,
            COL_FAILED => result.failed_expressions = split_lines(&value),
            // Columns from a newer writer are skipped, not an error
            _ => {}
        }
    }

    if !saw_result {
        return Err(invalid("result record carries no RESULT column"));
    }
    Ok(result)
}

fn write_field<W: Write>(writer: &mut W, bytes: &[u8]) -> io::Result<()> {
    writer.write_all(&(bytes.len() as u32).to_le_bytes())?;
    writer.write_all(bytes)
}

fn read_field<R: Read>(reader: &mut R) -> io::Result<String> {
    let len = read_u32(reader)? as usize;
    if len > MAX_FIELD_LEN {
        return Err(invalid("result field length out of range"));
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|_| invalid("result field is not UTF-8"))
}

fn read_u32<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn split_lines(value: &str) -> Vec<String> {
    if value.is_empty() {
        return Vec::new();
    }
    value.lines().map(str::to_string).collect()
}

fn invalid(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TestResult {
        TestResult {
            group: "math:basics".to_string(),
            name: "test_sum_0".to_string(),
            signature: "int sum(int, int)".to_string(),
            outcome: Outcome::Passed,
            actual: "5".to_string(),
            expected: "== 5".to_string(),
            warnings: vec!["Casting floating point value 2.5 to 2".to_string()],
            output: "line one\nline two\n".to_string(),
            failed_expressions: Vec::new(),
        }
    }

    #[test]
    fn test_record_roundtrip() {
        let original = sample();
        let mut bytes = Vec::new();
        write_record(&mut bytes, &original).unwrap();

        let decoded = read_record(&mut bytes.as_slice()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_embedded_newlines_survive() {
        let mut original = sample();
        original.output = "a\nb\n\nc".to_string();
        let mut bytes = Vec::new();
        write_record(&mut bytes, &original).unwrap();

        let decoded = read_record(&mut bytes.as_slice()).unwrap();
        assert_eq!(decoded.output, "a\nb\n\nc");
    }

    #[test]
    fn test_list_columns_roundtrip() {
        let mut original = sample();
        original.outcome = Outcome::Failed;
        original.failed_expressions =
            vec!["gint == 10".to_string(), "gshort != 0".to_string()];
        let mut bytes = Vec::new();
        write_record(&mut bytes, &original).unwrap();

        let decoded = read_record(&mut bytes.as_slice()).unwrap();
        assert_eq!(decoded.failed_expressions, original.failed_expressions);
        assert!(decoded.warnings.len() == 1);
    }

    #[test]
    fn test_truncated_record_is_an_error() {
        let mut bytes = Vec::new();
        write_record(&mut bytes, &sample()).unwrap();
        bytes.truncate(bytes.len() / 2);
        assert!(read_record(&mut bytes.as_slice()).is_err());
    }

    #[test]
    fn test_empty_input_is_an_error() {
        let mut empty: &[u8] = &[];
        assert!(read_record(&mut empty).is_err());
    }
}
