use chrono::{NaiveDateTime, Utc};
use rusqlite::{params, Connection};

use crate::db::DatabaseError;
use crate::models::*;

pub fn upsert_template(conn: &Connection, template: &Template) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO templates (name, height, width, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(name) DO UPDATE SET
            height = excluded.height,
            width = excluded.width,
            updated_at = excluded.updated_at",
        params![
            template.name,
            template.height,
            template.width,
            template.created_at,
            template.updated_at,
        ],
    )?;
    Ok(())
}

pub fn get_template(conn: &Connection, name: &str) -> Result<Option<Template>, DatabaseError> {
    let result = conn.query_row(
        "SELECT name, height, width, created_at, updated_at FROM templates WHERE name = ?1",
        params![name],
        |row| {
            Ok(Template {
                name: row.get(0)?,
                height: row.get(1)?,
                width: row.get(2)?,
                created_at: row.get::<_, NaiveDateTime>(3)?,
                updated_at: row.get::<_, NaiveDateTime>(4)?,
            })
        },
    );

    match result {
        Ok(template) => Ok(Some(template)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn update_template(
    conn: &Connection,
    name: &str,
    update: &TemplateUpdate,
) -> Result<bool, DatabaseError> {
    let now = Utc::now().naive_utc();
    let changed = match update {
        TemplateUpdate::Height(height) => conn.execute(
            "UPDATE templates SET height = ?2, updated_at = ?3 WHERE name = ?1",
            params![name, height, now],
        )?,
        TemplateUpdate::Width(width) => conn.execute(
            "UPDATE templates SET width = ?2, updated_at = ?3 WHERE name = ?1",
            params![name, width, now],
        )?,
    };
    Ok(changed > 0)
}

/// Remove the template row only. Its template fields stay in place.
pub fn delete_template(conn: &Connection, name: &str) -> Result<bool, DatabaseError> {
    let changed = conn.execute("DELETE FROM templates WHERE name = ?1", params![name])?;
    Ok(changed > 0)
}
