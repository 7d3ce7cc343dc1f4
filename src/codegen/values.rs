//! Type-directed value materialization
//!
//! Turns literal constants, struct initializers and buffer fills from the
//! AST into typed [`CValue`]s for a target [`CType`]. The rules mirror what
//! a C compiler would accept from an initializer:
//!
//! - float literal into an integer slot truncates, with a warning
//! - a non-zero literal never materializes into a pointer; `0` is null
//! - positional initializer lists map index-wise onto struct fields and
//!   recurse into nested structs; unnamed fields stay zeroed
//! - designated initializers are rejected outright: the symbol table knows
//!   field count and types, not names

use super::GenError;
use crate::module::value::CValue;
use crate::module::{CType, Module};
use crate::parser::ast::{BufferInitExpr, Constant, InitValue, StructInitializer};

impl<'m> super::Generator<'m> {
    /// Materialize a literal for a target type. Pushes warnings onto the
    /// generator's current accumulation list.
    pub(super) fn materialize_constant(
        &mut self,
        ty: &CType,
        constant: &Constant,
    ) -> Result<CValue, GenError> {
        match ty {
            _ if ty.is_integer() => match constant {
                Constant::Int(n) => Ok(CValue::Int(ty.wrap(*n))),
                Constant::Char(c) => Ok(CValue::Int(ty.wrap(*c as i64))),
                Constant::Float(x) => {
                    let truncated = *x as i64;
                    self.warn(format!(
                        "Casting floating point value {} to {}",
                        x, truncated
                    ));
                    Ok(CValue::Int(ty.wrap(truncated)))
                }
                Constant::Str(_) => Err(GenError::TypeMismatch {
                    expected: ty.to_string(),
                    found: constant.render(),
                }),
            },
            CType::Float | CType::Double => match constant {
                Constant::Int(n) => Ok(CValue::Float(*n as f64)),
                Constant::Float(x) => {
                    if matches!(ty, CType::Float) {
                        Ok(CValue::Float(*x as f32 as f64))
                    } else {
                        Ok(CValue::Float(*x))
                    }
                }
                Constant::Char(c) => Ok(CValue::Float(*c as f64)),
                Constant::Str(_) => Err(GenError::TypeMismatch {
                    expected: ty.to_string(),
                    found: constant.render(),
                }),
            },
            CType::Pointer(_) => match constant {
                // Only buffer-allocation syntax may produce a non-null
                // pointer; an explicit 0 is an explicit null.
                Constant::Int(0) => Ok(CValue::Null),
                other => Err(GenError::PointerLiteral {
                    value: other.render(),
                }),
            },
            _ => Err(GenError::TypeMismatch {
                expected: ty.to_string(),
                found: constant.render(),
            }),
        }
    }

    /// Build a full struct value from a positional initializer, recursing
    /// into nested struct fields; unspecified trailing fields are zeroed.
    pub(super) fn materialize_struct(
        &mut self,
        struct_name: &str,
        init: &StructInitializer,
    ) -> Result<CValue, GenError> {
        let layout = self
            .module
            .struct_layout(struct_name)
            .ok_or_else(|| GenError::StructNotFound(struct_name.to_string()))?
            .clone();

        let values = match init {
            StructInitializer::Designated(_) => return Err(GenError::DesignatedInitializer),
            StructInitializer::List(values) => values,
        };

        if values.len() > layout.fields.len() {
            return Err(GenError::InitializerArity {
                struct_name: struct_name.to_string(),
                fields: layout.fields.len(),
                values: values.len(),
            });
        }

        let mut fields = Vec::with_capacity(layout.fields.len());
        for (index, field_ty) in layout.fields.iter().enumerate() {
            let field = match values.get(index) {
                None => self.module.zero_value(field_ty),
                Some(InitValue::Scalar(constant)) => self.materialize_constant(field_ty, constant)?,
                Some(InitValue::Nested(nested)) => match field_ty {
                    CType::Struct(nested_name) => self.materialize_struct(nested_name, nested)?,
                    other => {
                        return Err(GenError::TypeMismatch {
                            expected: other.to_string(),
                            found: "a struct initializer".to_string(),
                        });
                    }
                },
            };
            fields.push(field);
        }

        Ok(CValue::Struct(fields))
    }

    /// Element value replicated across a buffer. Struct-typed elements are
    /// zero-initialized and then overwritten by the initializer (when one is
    /// given); scalar elements broadcast the fill value.
    pub(super) fn materialize_buffer_fill(
        &mut self,
        elem: &CType,
        init: &BufferInitExpr,
    ) -> Result<CValue, GenError> {
        match init {
            BufferInitExpr::Zero => Ok(self.module.zero_value(elem)),
            BufferInitExpr::Fill(constant) => match elem {
                CType::Struct(_) => Err(GenError::TypeMismatch {
                    expected: elem.to_string(),
                    found: constant.render(),
                }),
                _ => self.materialize_constant(elem, constant),
            },
            BufferInitExpr::Struct(init) => match elem {
                CType::Struct(name) => self.materialize_struct(name, init),
                other => Err(GenError::TypeMismatch {
                    expected: other.to_string(),
                    found: "a struct initializer".to_string(),
                }),
            },
        }
    }

    /// Element type of a buffer bound to a pointer parameter. `void*`
    /// buffers degrade to raw bytes.
    pub(super) fn buffer_elem_type(pointee: &CType) -> CType {
        match pointee {
            CType::Void => CType::uchar(),
            other => other.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::Generator;
    use super::*;
    use crate::module::ModuleBuilder;

    fn module() -> Module {
        ModuleBuilder::new("m")
            .struct_layout("Pixel", vec![CType::int(), CType::int()])
            .struct_layout(
                "SuperPixel",
                vec![CType::int(), CType::int(), CType::strct("Pixel")],
            )
            .build()
    }

    #[test]
    fn test_float_truncation_warns() {
        let module = module();
        let mut generator = Generator::new(&module);
        let value = generator
            .materialize_constant(&CType::int(), &Constant::Float(3.9))
            .unwrap();
        assert_eq!(value, CValue::Int(3));
        assert_eq!(generator.warnings.len(), 1);
        assert!(generator.warnings[0].contains("Casting floating point value"));
    }

    #[test]
    fn test_pointer_literal_rules() {
        let module = module();
        let mut generator = Generator::new(&module);
        let ptr = CType::ptr(CType::int());

        assert_eq!(
            generator.materialize_constant(&ptr, &Constant::Int(0)).unwrap(),
            CValue::Null
        );
        assert!(matches!(
            generator.materialize_constant(&ptr, &Constant::Int(7)),
            Err(GenError::PointerLiteral { .. })
        ));
    }

    #[test]
    fn test_nested_struct_initializer() {
        let module = module();
        let mut generator = Generator::new(&module);
        let init = StructInitializer::List(vec![
            InitValue::Scalar(Constant::Int(1)),
            InitValue::Scalar(Constant::Int(2)),
            InitValue::Nested(StructInitializer::List(vec![InitValue::Scalar(
                Constant::Int(3),
            )])),
        ]);

        let value = generator.materialize_struct("SuperPixel", &init).unwrap();
        assert_eq!(
            value,
            CValue::Struct(vec![
                CValue::Int(1),
                CValue::Int(2),
                CValue::Struct(vec![CValue::Int(3), CValue::Int(0)]),
            ])
        );
    }

    #[test]
    fn test_designated_initializer_is_fatal() {
        let module = module();
        let mut generator = Generator::new(&module);
        let init = StructInitializer::Designated(vec![(
            "x".to_string(),
            InitValue::Scalar(Constant::Int(1)),
        )]);
        assert!(matches!(
            generator.materialize_struct("Pixel", &init),
            Err(GenError::DesignatedInitializer)
        ));
    }

    #[test]
    fn test_initializer_arity_overflow() {
        let module = module();
        let mut generator = Generator::new(&module);
        let init = StructInitializer::List(vec![
            InitValue::Scalar(Constant::Int(1)),
            InitValue::Scalar(Constant::Int(2)),
            InitValue::Scalar(Constant::Int(3)),
        ]);
        assert!(matches!(
            generator.materialize_struct("Pixel", &init),
            Err(GenError::InitializerArity { .. })
        ));
    }

    #[test]
    fn test_void_buffer_elements_are_bytes() {
        assert_eq!(Generator::buffer_elem_type(&CType::Void), CType::uchar());
        assert_eq!(Generator::buffer_elem_type(&CType::int()), CType::int());
    }
}
