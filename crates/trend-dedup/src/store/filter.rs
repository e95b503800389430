//! Metadata filters for vector queries

use super::HistoryMetadata;

/// A scalar metadata value
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
  Text(String),
  Integer(i64),
}

impl From<&str> for FieldValue {
  fn from(value: &str) -> Self {
    FieldValue::Text(value.to_string())
  }
}

impl From<String> for FieldValue {
  fn from(value: String) -> Self {
    FieldValue::Text(value)
  }
}

impl From<i64> for FieldValue {
  fn from(value: i64) -> Self {
    FieldValue::Integer(value)
  }
}

/// A single predicate on one metadata field
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
  Equals { field: String, value: FieldValue },
  GreaterThan { field: String, value: i64 },
}

impl Condition {
  fn matches(&self, metadata: &HistoryMetadata) -> bool {
    match self {
      Condition::Equals { field, value } => metadata.value(field).as_ref() == Some(value),
      Condition::GreaterThan { field, value } => {
        matches!(metadata.value(field), Some(FieldValue::Integer(actual)) if actual > *value)
      }
    }
  }

  fn to_sql(&self) -> String {
    match self {
      Condition::Equals { field, value: FieldValue::Text(text) } => {
        format!("{field} = '{}'", text.replace('\'', "''"))
      }
      Condition::Equals { field, value: FieldValue::Integer(number) } => {
        format!("{field} = {number}")
      }
      Condition::GreaterThan { field, value } => format!("{field} > {value}"),
    }
  }
}

/// Conjunction of conditions; an empty filter matches everything
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreFilter {
  conditions: Vec<Condition>,
}

impl StoreFilter {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn equals(mut self, field: &str, value: impl Into<FieldValue>) -> Self {
    self.conditions.push(Condition::Equals { field: field.to_string(), value: value.into() });
    self
  }

  pub fn greater_than(mut self, field: &str, value: i64) -> Self {
    self.conditions.push(Condition::GreaterThan { field: field.to_string(), value });
    self
  }

  pub fn is_empty(&self) -> bool {
    self.conditions.is_empty()
  }

  pub fn matches(&self, metadata: &HistoryMetadata) -> bool {
    self.conditions.iter().all(|condition| condition.matches(metadata))
  }

  /// SQL predicate for backends that filter with SQL, `None` when empty
  pub fn to_sql(&self) -> Option<String> {
    if self.conditions.is_empty() {
      return None;
    }
    Some(self.conditions.iter().map(Condition::to_sql).collect::<Vec<_>>().join(" AND "))
  }
}
