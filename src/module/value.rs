//! Runtime value representation for the compiled module
//!
//! [`CValue`] is the typed, tagged currency of the whole pipeline: function
//! arguments, return values, global variables and buffer elements are all
//! `CValue`s. Integers are carried as `i64` and truncated to their declared
//! C type's width on store; formatting follows the declared type, so an
//! `unsigned char` holding `-1` renders as `255`.

use super::CType;

/// Memory address type (64-bit)
pub type Address = u64;

/// Runtime values flowing through generated routines and host functions
#[derive(Debug, Clone, PartialEq)]
pub enum CValue {
    Int(i64),
    Float(f64),
    Pointer(Address),
    Null,
    Struct(Vec<CValue>),
    /// Result of a void function
    Unit,
}

impl CValue {
    /// Get the integer value, returns None for non-integers
    pub fn as_int(&self) -> Option<i64> {
        match self {
            CValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Get the float value, widening integers, returns None otherwise
    pub fn as_float(&self) -> Option<f64> {
        match self {
            CValue::Float(x) => Some(*x),
            CValue::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    /// Get the pointer value; null is address 0
    pub fn as_pointer(&self) -> Option<Address> {
        match self {
            CValue::Pointer(addr) => Some(*addr),
            CValue::Null => Some(0),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CValue::Null)
    }

    /// Type-agnostic rendering, used for struct fields where only the value
    /// is at hand.
    pub fn render(&self) -> String {
        match self {
            CValue::Int(n) => n.to_string(),
            CValue::Float(x) => x.to_string(),
            CValue::Pointer(addr) => format!("0x{:x}", addr),
            CValue::Null => "0x0".to_string(),
            CValue::Struct(fields) => {
                let rendered: Vec<String> = fields.iter().map(CValue::render).collect();
                format!("{{{}}}", rendered.join(", "))
            }
            CValue::Unit => String::new(),
        }
    }

    /// Render the value the way its declared C type prints it.
    pub fn format_as(&self, ty: &CType) -> String {
        match self {
            CValue::Int(n) => {
                if ty.is_signed_integer() {
                    ty.wrap(*n).to_string()
                } else {
                    // Unsigned rendering of the type-masked bits
                    let masked = (*n as u64) & ty.unsigned_mask();
                    masked.to_string()
                }
            }
            CValue::Float(x) => match ty {
                CType::Float => format!("{}", *x as f32),
                _ => format!("{}", x),
            },
            CValue::Pointer(addr) => format!("0x{:x}", addr),
            CValue::Null => "0x0".to_string(),
            CValue::Struct(fields) => {
                let rendered: Vec<String> = fields.iter().map(CValue::render).collect();
                format!("{{{}}}", rendered.join(", "))
            }
            CValue::Unit => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_formatting_follows_signedness() {
        let v = CValue::Int(-1);
        assert_eq!(v.format_as(&CType::int()), "-1");
        assert_eq!(v.format_as(&CType::uchar()), "255");
        assert_eq!(v.format_as(&CType::ushort()), "65535");
    }

    #[test]
    fn test_float_formatting() {
        let v = CValue::Float(2.5);
        assert_eq!(v.format_as(&CType::Double), "2.5");
        assert_eq!(v.format_as(&CType::Float), "2.5");
    }

    #[test]
    fn test_pointer_accessors() {
        assert_eq!(CValue::Null.as_pointer(), Some(0));
        assert_eq!(CValue::Pointer(0x40).as_pointer(), Some(0x40));
        assert_eq!(CValue::Int(3).as_pointer(), None);
    }
}
