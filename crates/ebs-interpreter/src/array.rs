//! Typed array storage for the EBS interpreter.
//!
//! Arrays carry the declared type of their immediate elements and are
//! either fixed (capacity decided at creation, never grows) or dynamic
//! (grows on demand). Nested arrays are ordinary `Value::Array` elements
//! whose level stores `DataType::Array`.

use ebs_ast::DataType;

use crate::value::{convert_value, default_value};
use crate::Value;

#[derive(Debug, Clone)]
pub struct EbsArray {
    element_type: DataType,
    fixed: bool,
    values: Vec<Value>,
}

impl EbsArray {
    /// Fixed array pre-filled with the zero value of the element type.
    pub fn fixed(element_type: DataType, capacity: usize) -> Self {
        EbsArray {
            element_type,
            fixed: true,
            values: vec![default_value(element_type); capacity],
        }
    }

    /// Empty dynamic array.
    pub fn dynamic(element_type: DataType) -> Self {
        EbsArray {
            element_type,
            fixed: false,
            values: Vec::new(),
        }
    }

    pub fn element_type(&self) -> DataType {
        self.element_type
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.values.get(index).cloned()
    }

    /// Write an element. `index == len()` appends; a fixed array never
    /// grows past its creation capacity. The value is converted to the
    /// element type unless it is a nested array or the element type does
    /// not constrain it.
    pub fn set(&mut self, index: usize, value: Value) -> Result<(), String> {
        let value = self.coerce(value)?;
        if index < self.values.len() {
            self.values[index] = value;
            Ok(())
        } else if index == self.values.len() {
            if self.fixed {
                return Err(format!(
                    "Fixed array capacity {} exceeded.",
                    self.values.len()
                ));
            }
            self.values.push(value);
            Ok(())
        } else {
            Err(format!(
                "Index out of bounds: {} (size {}).",
                index,
                self.values.len()
            ))
        }
    }

    /// Grow a dynamic array to at least `len` elements, filling new slots
    /// with the element type's zero value.
    pub fn expand_to(&mut self, len: usize) -> Result<(), String> {
        if self.fixed {
            return Err(format!(
                "Fixed array capacity {} exceeded.",
                self.values.len()
            ));
        }
        while self.values.len() < len {
            self.values.push(default_value(self.element_type));
        }
        Ok(())
    }

    /// Replace a pre-filled slot with a synthesized nested array.
    pub fn place_child(&mut self, index: usize, child: Value) {
        if index < self.values.len() {
            self.values[index] = child;
        } else {
            self.values.push(child);
        }
    }

    fn coerce(&self, value: Value) -> Result<Value, String> {
        match (&value, self.element_type) {
            (Value::Array(_), _) => Ok(value),
            (_, DataType::Any | DataType::Json | DataType::Array) => Ok(value),
            _ => convert_value(self.element_type, value),
        }
    }
}
