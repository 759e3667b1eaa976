
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::record::{FieldValue, FlatRecord, RecordField};
use crate::{IndexError, Result};

/// Metadata predicate evaluated before ranking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    /// Field equals the value; for `tags`, the list contains it
    Equals { field: RecordField, value: String },
    /// For `tags`, any listed value is present; for text fields, the field
    /// equals one of the values
    ContainsAny {
        field: RecordField,
        values: Vec<String>,
    },
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    #[inline]
    pub fn equals(field: RecordField, value: impl Into<String>) -> Self {
        Self::Equals {
            field,
            value: value.into(),
        }
    }

    #[inline]
    pub fn contains_any<I, S>(field: RecordField, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::ContainsAny {
            field,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Combine clauses with `And`, collapsing the trivial cases
    #[inline]
    pub fn all(mut clauses: Vec<Self>) -> Option<Self> {
        match clauses.len() {
            0 => None,
            1 => clauses.pop(),
            _ => Some(Self::And(clauses)),
        }
    }

    /// Parse a `field=value` expression
    #[inline]
    pub fn parse_assignment(expression: &str) -> Result<Self> {
        let (field, value) = expression.split_once('=').ok_or_else(|| {
            IndexError::Config(format!(
                "filter '{}' must look like field=value",
                expression
            ))
        })?;
        let field: RecordField = field.trim().parse().map_err(IndexError::Config)?;
        Ok(Self::equals(field, value.trim()))
    }

    /// Reject empty clause lists and empty value lists, at any depth
    #[inline]
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Equals { .. } => Ok(()),
            Self::ContainsAny { field, values } => {
                if values.is_empty() {
                    Err(IndexError::Config(format!(
                        "filter on '{}' lists no values",
                        field.name()
                    )))
                } else {
                    Ok(())
                }
            }
            Self::And(clauses) | Self::Or(clauses) => {
                if clauses.is_empty() {
                    return Err(IndexError::Config("filter combines no clauses".to_string()));
                }
                clauses.iter().try_for_each(Self::validate)
            }
        }
    }

    #[inline]
    pub fn matches(&self, record: &FlatRecord) -> bool {
        match self {
            Self::Equals { field, value } => match record.get(*field) {
                Some(FieldValue::Text(text)) => text == value,
                Some(FieldValue::List(items)) => items.iter().any(|item| item == value),
                None => false,
            },
            Self::ContainsAny { field, values } => match record.get(*field) {
                Some(FieldValue::Text(text)) => values.iter().any(|v| v == text),
                Some(FieldValue::List(items)) => items.iter().any(|item| values.contains(item)),
                None => false,
            },
            Self::And(clauses) => clauses.iter().all(|clause| clause.matches(record)),
            Self::Or(clauses) => clauses.iter().any(|clause| clause.matches(record)),
        }
    }

    /// Render as a GraphQL `where` argument value
    #[inline]
    pub fn to_graphql(&self) -> String {
        match self {
            Self::Equals { field, value } => {
                let operator = if field.is_list() { "ContainsAny" } else { "Equal" };
                let value = if field.is_list() {
                    format!("[{}]", graphql_string(value))
                } else {
                    graphql_string(value)
                };
                format!(
                    "{{operator: {}, path: [{}], valueText: {}}}",
                    operator,
                    graphql_string(field.name()),
                    value
                )
            }
            Self::ContainsAny { field, values } => {
                let list = values.iter().map(|v| graphql_string(v)).join(", ");
                if field.is_list() {
                    format!(
                        "{{operator: ContainsAny, path: [{}], valueText: [{}]}}",
                        graphql_string(field.name()),
                        list
                    )
                } else {
                    let operands = values
                        .iter()
                        .map(|v| Self::equals(*field, v.clone()).to_graphql())
                        .join(", ");
                    format!("{{operator: Or, operands: [{}]}}", operands)
                }
            }
            Self::And(clauses) => Self::combine_graphql("And", clauses),
            Self::Or(clauses) => Self::combine_graphql("Or", clauses),
        }
    }

    fn combine_graphql(operator: &str, clauses: &[Self]) -> String {
        format!(
            "{{operator: {}, operands: [{}]}}",
            operator,
            clauses.iter().map(Self::to_graphql).join(", ")
        )
    }
}

/// Quote a string literal; JSON string escaping is valid GraphQL
pub(crate) fn graphql_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}
