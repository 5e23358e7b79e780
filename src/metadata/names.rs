//! Name newtypes used throughout the metadata document.
//!
//! Every name is a thin wrapper over `String` that serialises transparently, so
//! `"author"` in JSON becomes `TableName { schema: None, name: "author" }` and so on.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static GRAPHQL_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[_A-Za-z][_0-9A-Za-z]*$").expect("static GraphQL name pattern")
});

/// Check whether a string is a valid GraphQL identifier.
pub fn is_graphql_name(s: &str) -> bool {
    GRAPHQL_NAME.is_match(s)
}

macro_rules! string_name {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(name: impl Into<String>) -> Self {
                Self(name.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_name!(
    /// Name of a configured database source.
    SourceName
);
string_name!(
    /// Column of a table, view or logical model.
    ColumnName
);
string_name!(
    /// Relationship name, unique among the fields of a table.
    RelName
);
string_name!(
    /// Role that permissions are granted to.
    RoleName
);
string_name!(ComputedFieldName);
string_name!(TriggerName);
string_name!(LogicalModelName);
string_name!(NativeQueryName);
string_name!(RemoteSchemaName);
string_name!(CollectionName);
string_name!(
    /// Name of a saved query inside a query collection.
    QueryName
);
string_name!(EndpointName);
string_name!(
    /// Name of a data connector agent configured under `backend_configs`.
    DataConnectorName
);
string_name!(
    /// Foreign key / unique constraint name as reported by the database.
    ConstraintName
);
string_name!(
    /// Scalar type name as understood by the backend (`integer`, `text`, ...).
    ScalarType
);

impl RoleName {
    /// The built-in role that bypasses all permission checks.
    pub fn admin() -> Self {
        Self("admin".to_string())
    }

    pub fn is_admin(&self) -> bool {
        self.0 == "admin"
    }
}

/// Schema-qualified object name.
///
/// Deserialises from either `"author"` or `{"schema": "public", "name": "author"}`.
/// A missing schema means "the backend's default schema".
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct QualifiedName {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub name: String,
}

/// A table or view.
pub type TableName = QualifiedName;

/// A database function.
pub type FunctionName = QualifiedName;

impl QualifiedName {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
        }
    }

    pub fn qualified(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: Some(schema.into()),
            name: name.into(),
        }
    }

    /// Default GraphQL name: `name` for unqualified objects, `schema_name` otherwise.
    pub fn graphql_name(&self) -> String {
        match &self.schema {
            Some(schema) if schema != "public" && schema != "dbo" => {
                format!("{}_{}", schema, self.name)
            }
            _ => self.name.clone(),
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl From<&str> for QualifiedName {
    fn from(s: &str) -> Self {
        match s.split_once('.') {
            Some((schema, name)) => Self::qualified(schema, name),
            None => Self::new(s),
        }
    }
}

impl<'de> Deserialize<'de> for QualifiedName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Plain(String),
            Object {
                #[serde(default)]
                schema: Option<String>,
                name: String,
            },
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Plain(name) => QualifiedName::new(name),
            Repr::Object { schema, name } => QualifiedName { schema, name },
        })
    }
}
