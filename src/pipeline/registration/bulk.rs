//! Parallel delimiter-separated field lists.

use std::collections::HashSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::RegistrationError;
use crate::models::FieldGeometry;

pub const DEFAULT_DELIMITER: &str = ",";

/// Five parallel lists describing a batch of fields, entry `i` of each list
/// belonging to field `i`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkFieldLists {
    pub names: String,
    pub x: String,
    pub y: String,
    pub height: String,
    pub width: String,
    pub delimiter: String,
}

impl BulkFieldLists {
    pub fn new(
        names: impl Into<String>,
        x: impl Into<String>,
        y: impl Into<String>,
        height: impl Into<String>,
        width: impl Into<String>,
    ) -> Self {
        Self {
            names: names.into(),
            x: x.into(),
            y: y.into(),
            height: height.into(),
            width: width.into(),
            delimiter: DEFAULT_DELIMITER.to_string(),
        }
    }

    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    /// Split and validate every list. Nothing is returned unless all entries are usable.
    pub fn parse(&self) -> Result<Vec<(String, FieldGeometry)>, RegistrationError> {
        if self.delimiter.is_empty() {
            return Err(RegistrationError::Validation("delimiter must not be empty".into()));
        }

        let names = self.split(&self.names);
        let xs = self.split(&self.x);
        let ys = self.split(&self.y);
        let heights = self.split(&self.height);
        let widths = self.split(&self.width);

        let expected = names.len();
        for (dimension, list) in [("x", &xs), ("y", &ys), ("height", &heights), ("width", &widths)] {
            if list.len() != expected {
                return Err(RegistrationError::CountMismatch {
                    dimension,
                    expected,
                    actual: list.len(),
                });
            }
        }

        let mut seen = HashSet::new();
        let mut fields = Vec::with_capacity(expected);
        for i in 0..expected {
            let name = names[i];
            if name.is_empty() {
                return Err(RegistrationError::Validation(format!("names[{i}] is empty")));
            }
            if !seen.insert(name) {
                return Err(RegistrationError::Validation(format!("field {name} listed twice")));
            }

            let x: i32 = parse_entry("x", i, xs[i])?;
            let y: i32 = parse_entry("y", i, ys[i])?;
            let height: u32 = parse_entry("height", i, heights[i])?;
            let width: u32 = parse_entry("width", i, widths[i])?;
            if width == 0 || height == 0 {
                return Err(RegistrationError::Validation(format!(
                    "field {name} must have positive width and height"
                )));
            }

            fields.push((name.to_string(), FieldGeometry::new(x, y, width, height)));
        }
        Ok(fields)
    }

    // An all-blank list is empty rather than one blank entry.
    fn split<'a>(&self, list: &'a str) -> Vec<&'a str> {
        if list.trim().is_empty() {
            return Vec::new();
        }
        list.split(self.delimiter.as_str()).map(str::trim).collect()
    }
}

fn parse_entry<T: FromStr>(dimension: &str, index: usize, raw: &str) -> Result<T, RegistrationError> {
    raw.parse().map_err(|_| {
        RegistrationError::Validation(format!("{dimension}[{index}] = {raw:?} is not a valid number"))
    })
}
