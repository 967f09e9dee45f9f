use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named canvas that template fields are laid out against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    pub height: u32,
    pub width: u32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Template {
    pub fn new(name: impl Into<String>, height: u32, width: u32) -> Self {
        let now = Utc::now().naive_utc();
        Self {
            name: name.into(),
            height,
            width,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TemplateUpdate {
    Height(u32),
    Width(u32),
}
