//! Named collections of the remote data service.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A collection on the remote data service.
///
/// The known collections are closed variants; anything else travels as
/// `Other` with its raw name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
  Students,
  Teachers,
  Classes,
  Payments,
  Attendance,
  Grades,
  Other(String),
}

impl Collection {
  /// Wire and storage name, e.g. `"students"`.
  pub fn as_str(&self) -> &str {
    match self {
      Self::Students => "students",
      Self::Teachers => "teachers",
      Self::Classes => "classes",
      Self::Payments => "payments",
      Self::Attendance => "attendance",
      Self::Grades => "grades",
      Self::Other(name) => name,
    }
  }

  pub fn from_name(name: &str) -> Self {
    match name.trim().to_lowercase().as_str() {
      "students" => Self::Students,
      "teachers" => Self::Teachers,
      "classes" => Self::Classes,
      "payments" => Self::Payments,
      "attendance" => Self::Attendance,
      "grades" => Self::Grades,
      _ => Self::Other(name.trim().to_string()),
    }
  }
}

impl fmt::Display for Collection {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Collection {
  type Err = std::convert::Infallible;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Ok(Self::from_name(s))
  }
}

impl Serialize for Collection {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(self.as_str())
  }
}

impl<'de> Deserialize<'de> for Collection {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let name = String::deserialize(deserializer)?;
    Ok(Self::from_name(&name))
  }
}

#[cfg(test)]
#[path = "collection_tests.rs"]
mod tests;
