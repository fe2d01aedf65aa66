//! Sweep dimensions: operators, values and their application.
//!
//! A dimension names one field and one operator with several values; the
//! sweep matrix is the product of all dimensions. Applying an operation
//! reads the current value (staged writes included, so stacked operations
//! on one field compose) and stages the transformed result.

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, TreeError};
use crate::mapping::{wildcard_count, IdsMapping};
use crate::tree::Value;

/// Elementwise arithmetic applied to a stored field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Power,
    FloorDivide,
    /// Floored remainder. The result takes the divisor's sign.
    #[serde(alias = "mod")]
    Remainder,
}

impl Operator {
    pub fn apply(self, lhs: f64, rhs: f64) -> f64 {
        match self {
            Operator::Add => lhs + rhs,
            Operator::Subtract => lhs - rhs,
            Operator::Multiply => lhs * rhs,
            Operator::Divide => lhs / rhs,
            Operator::Power => lhs.powf(rhs),
            Operator::FloorDivide => (lhs / rhs).floor(),
            Operator::Remainder => lhs - (lhs / rhs).floor() * rhs,
        }
    }
}

/// One concrete operation on one field of one IDS.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub ids: String,
    pub variable: String,
    pub operator: Operator,
    pub value: f64,
}

impl Operation {
    /// Stage `variable <- variable (operator) value` on the mapping.
    pub fn apply_to(&self, mapping: &mut IdsMapping) -> Result<(), TreeError> {
        let updated = match mapping.get(&self.variable)? {
            Value::Scalar(v) => Value::Scalar(self.operator.apply(*v, self.value)),
            Value::Array(a) => Value::Array(a.mapv(|v| self.operator.apply(v, self.value))),
        };
        mapping.stage(self.variable.clone(), updated);
        Ok(())
    }
}

fn default_ids() -> String {
    "core_profiles".to_string()
}

/// One sweep dimension from the config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperationDim {
    #[serde(default = "default_ids")]
    pub ids: String,
    pub variable: String,
    pub operator: Operator,
    pub values: Vec<f64>,
}

impl OperationDim {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.variable.is_empty() {
            return Err(ConfigError::Validation(
                "dimension with an empty variable path".into(),
            ));
        }
        if wildcard_count(&self.variable) != 0 {
            return Err(ConfigError::Validation(format!(
                "dimension path {:?} must be concrete, wildcards are not allowed",
                self.variable
            )));
        }
        if self.values.is_empty() {
            return Err(ConfigError::Validation(format!(
                "dimension {:?} has no values",
                self.variable
            )));
        }
        Ok(())
    }

    /// One operation per value, in listed order.
    pub fn expand(&self) -> Vec<Operation> {
        self.values
            .iter()
            .map(|&value| Operation {
                ids: self.ids.clone(),
                variable: self.variable.clone(),
                operator: self.operator,
                value,
            })
            .collect()
    }
}
