use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered scan. `location` is a local path to the source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub name: String,
    pub location: String,
    pub height: u32,
    pub width: u32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Image {
    pub fn new(name: impl Into<String>, location: impl Into<String>, height: u32, width: u32) -> Self {
        let now = Utc::now().naive_utc();
        Self {
            name: name.into(),
            location: location.into(),
            height,
            width,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ImageUpdate {
    Location(String),
    Height(u32),
    Width(u32),
}
