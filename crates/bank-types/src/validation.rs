//! Schema validation for implementation-specific configuration tables.
//!
//! Each pluggable implementation declares a [`Schema`] for its
//! `implementations.<name>` table; the table is checked before the factory
//! runs, so factories can assume the shape is right.

use alloy_primitives::Address;
use thiserror::Error;

/// Errors that can occur during configuration validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
	#[error("Missing required field: {0}")]
	MissingField(String),
	#[error("Invalid value for field '{field}': {message}")]
	InvalidValue { field: String, message: String },
	#[error("Type mismatch for field '{field}': expected {expected}, got {actual}")]
	TypeMismatch {
		field: String,
		expected: String,
		actual: String,
	},
	#[error("Failed to deserialize config: {0}")]
	DeserializationError(String),
}

impl ValidationError {
	/// Qualifies the offending field with the path of its parent table.
	fn within(self, parent: &str) -> Self {
		match self {
			ValidationError::MissingField(f) => {
				ValidationError::MissingField(format!("{}.{}", parent, f))
			},
			ValidationError::InvalidValue { field, message } => ValidationError::InvalidValue {
				field: format!("{}.{}", parent, field),
				message,
			},
			ValidationError::TypeMismatch {
				field,
				expected,
				actual,
			} => ValidationError::TypeMismatch {
				field: format!("{}.{}", parent, field),
				expected,
				actual,
			},
			other => other,
		}
	}

	fn mismatch(field: &str, expected: &str, value: &toml::Value) -> Self {
		ValidationError::TypeMismatch {
			field: field.to_string(),
			expected: expected.to_string(),
			actual: value.type_str().to_string(),
		}
	}
}

/// Expected type of a configuration field.
#[derive(Debug)]
pub enum FieldType {
	String,
	/// Integer with inclusive bounds.
	Integer { min: Option<i64>, max: Option<i64> },
	Boolean,
	/// 0x-prefixed 20-byte hex address.
	Address,
	Array(Box<FieldType>),
	Table(Schema),
}

/// Custom check run after the type check passes.
pub type FieldValidator = Box<dyn Fn(&toml::Value) -> Result<(), String> + Send + Sync>;

/// A named field with its type and an optional custom check.
pub struct Field {
	pub name: String,
	pub field_type: FieldType,
	pub validator: Option<FieldValidator>,
}

impl std::fmt::Debug for Field {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Field")
			.field("name", &self.name)
			.field("field_type", &self.field_type)
			.field("validator", &self.validator.is_some())
			.finish()
	}
}

impl Field {
	pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
		Self {
			name: name.into(),
			field_type,
			validator: None,
		}
	}

	pub fn with_validator<F>(mut self, validator: F) -> Self
	where
		F: Fn(&toml::Value) -> Result<(), String> + Send + Sync + 'static,
	{
		self.validator = Some(Box::new(validator));
		self
	}

	fn check(&self, value: &toml::Value) -> Result<(), ValidationError> {
		check_type(&self.name, value, &self.field_type)?;
		if let Some(validator) = &self.validator {
			validator(value).map_err(|message| ValidationError::InvalidValue {
				field: self.name.clone(),
				message,
			})?;
		}
		Ok(())
	}
}

/// Required and optional fields of a TOML table.
#[derive(Debug)]
pub struct Schema {
	pub required: Vec<Field>,
	pub optional: Vec<Field>,
}

impl Schema {
	pub fn new(required: Vec<Field>, optional: Vec<Field>) -> Self {
		Self { required, optional }
	}

	/// Checks that every required field is present and every present field
	/// has the declared type and passes its validator.
	pub fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let table = config
			.as_table()
			.ok_or_else(|| ValidationError::mismatch("root", "table", config))?;

		for field in &self.required {
			let value = table
				.get(&field.name)
				.ok_or_else(|| ValidationError::MissingField(field.name.clone()))?;
			field.check(value)?;
		}

		for field in &self.optional {
			if let Some(value) = table.get(&field.name) {
				field.check(value)?;
			}
		}

		Ok(())
	}
}

fn check_type(name: &str, value: &toml::Value, expected: &FieldType) -> Result<(), ValidationError> {
	match expected {
		FieldType::String => {
			value
				.as_str()
				.ok_or_else(|| ValidationError::mismatch(name, "string", value))?;
		},
		FieldType::Integer { min, max } => {
			let n = value
				.as_integer()
				.ok_or_else(|| ValidationError::mismatch(name, "integer", value))?;
			if let Some(min) = min.filter(|min| n < *min) {
				return Err(ValidationError::InvalidValue {
					field: name.to_string(),
					message: format!("Value {} is less than minimum {}", n, min),
				});
			}
			if let Some(max) = max.filter(|max| n > *max) {
				return Err(ValidationError::InvalidValue {
					field: name.to_string(),
					message: format!("Value {} is greater than maximum {}", n, max),
				});
			}
		},
		FieldType::Boolean => {
			value
				.as_bool()
				.ok_or_else(|| ValidationError::mismatch(name, "boolean", value))?;
		},
		FieldType::Address => {
			let s = value
				.as_str()
				.ok_or_else(|| ValidationError::mismatch(name, "address", value))?;
			s.parse::<Address>()
				.map_err(|e| ValidationError::InvalidValue {
					field: name.to_string(),
					message: format!("Invalid address '{}': {}", s, e),
				})?;
		},
		FieldType::Array(inner) => {
			let items = value
				.as_array()
				.ok_or_else(|| ValidationError::mismatch(name, "array", value))?;
			for (i, item) in items.iter().enumerate() {
				check_type(&format!("{}[{}]", name, i), item, inner)?;
			}
		},
		FieldType::Table(schema) => {
			schema.validate(value).map_err(|e| e.within(name))?;
		},
	}

	Ok(())
}

/// Configuration schema of a pluggable implementation.
pub trait ConfigSchema: Send + Sync {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError>;
}

#[cfg(test)]
mod tests {
	use super::*;

	fn schema() -> Schema {
		Schema::new(
			vec![
				Field::new("network_ids", FieldType::Array(Box::new(FieldType::Integer {
					min: Some(1),
					max: None,
				}))),
			],
			vec![
				Field::new("relayer", FieldType::Address),
				Field::new(
					"limits",
					FieldType::Table(Schema::new(
						vec![Field::new("max", FieldType::Integer {
							min: Some(1),
							max: Some(100),
						})],
						vec![],
					)),
				),
				Field::new("label", FieldType::String).with_validator(|v| {
					match v.as_str() {
						Some("") => Err("must not be empty".to_string()),
						_ => Ok(()),
					}
				}),
			],
		)
	}

	fn parse(s: &str) -> toml::Value {
		toml::from_str(s).unwrap()
	}

	#[test]
	fn test_valid_table() {
		let config = parse(
			r#"
network_ids = [1, 11155111]
relayer = "0x685ae42b1f178b6235053233182e75bd4d85e402"
limits = { max = 5 }
"#,
		);
		assert!(schema().validate(&config).is_ok());
	}

	#[test]
	fn test_missing_required_field() {
		assert_eq!(
			schema().validate(&parse("label = \"x\"")),
			Err(ValidationError::MissingField("network_ids".into()))
		);
	}

	#[test]
	fn test_array_element_bounds() {
		let err = schema().validate(&parse("network_ids = [0]")).unwrap_err();
		assert!(matches!(err, ValidationError::InvalidValue { field, .. } if field == "network_ids[0]"));
	}

	#[test]
	fn test_invalid_address() {
		let err = schema()
			.validate(&parse("network_ids = [1]\nrelayer = \"0x1234\""))
			.unwrap_err();
		assert!(matches!(err, ValidationError::InvalidValue { field, .. } if field == "relayer"));
	}

	#[test]
	fn test_nested_errors_are_qualified() {
		let err = schema()
			.validate(&parse("network_ids = [1]\nlimits = { max = 500 }"))
			.unwrap_err();
		assert!(matches!(err, ValidationError::InvalidValue { field, .. } if field == "limits.max"));
	}

	#[test]
	fn test_custom_validator() {
		let err = schema()
			.validate(&parse("network_ids = [1]\nlabel = \"\""))
			.unwrap_err();
		assert_eq!(
			err,
			ValidationError::InvalidValue {
				field: "label".into(),
				message: "must not be empty".into()
			}
		);
	}
}
