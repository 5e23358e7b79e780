//! Logical models and native queries.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::names::*;
use super::source::{BoolExp, PermColumns, PermDef};

/// A user-declared row shape, independent of any table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalModelMetadata {
    pub name: LogicalModelName,
    pub fields: Vec<LogicalModelField>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub select_permissions: Vec<PermDef<LogicalModelSelectPermission>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl LogicalModelMetadata {
    pub fn field(&self, name: &ColumnName) -> Option<&LogicalModelField> {
        self.fields.iter().find(|f| &f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalModelField {
    pub name: ColumnName,
    #[serde(rename = "type")]
    pub field_type: LogicalModelType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Type of a logical model field.
///
/// `{"scalar": "int"}`, `{"logical_model": "address"}` or `{"array": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LogicalModelType {
    Scalar {
        scalar: ScalarType,
        #[serde(default)]
        nullable: bool,
    },
    Object {
        logical_model: LogicalModelName,
        #[serde(default)]
        nullable: bool,
    },
    Array {
        array: Box<LogicalModelType>,
        #[serde(default)]
        nullable: bool,
    },
}

impl LogicalModelType {
    pub fn scalar(name: impl Into<ScalarType>) -> Self {
        LogicalModelType::Scalar {
            scalar: name.into(),
            nullable: false,
        }
    }

    /// Every logical model this type refers to, through arrays.
    pub fn referenced_model(&self) -> Option<&LogicalModelName> {
        match self {
            LogicalModelType::Scalar { .. } => None,
            LogicalModelType::Object { logical_model, .. } => Some(logical_model),
            LogicalModelType::Array { array, .. } => array.referenced_model(),
        }
    }

    pub fn scalar_type(&self) -> Option<&ScalarType> {
        match self {
            LogicalModelType::Scalar { scalar, .. } => Some(scalar),
            LogicalModelType::Object { .. } => None,
            LogicalModelType::Array { array, .. } => array.scalar_type(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalModelSelectPermission {
    pub columns: PermColumns,
    #[serde(default = "BoolExp::true_")]
    pub filter: BoolExp,
}

/// A parameterised SQL statement exposed as a root field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeQueryMetadata {
    pub root_field_name: NativeQueryName,
    /// SQL text; arguments are referenced as `{{name}}`.
    pub code: String,
    pub returns: LogicalModelName,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub arguments: BTreeMap<String, NativeQueryArgument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeQueryArgument {
    #[serde(rename = "type")]
    pub arg_type: ScalarType,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}
