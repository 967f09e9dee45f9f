use chrono::{NaiveDateTime, Utc};
use rusqlite::{params, Connection};

use crate::db::DatabaseError;
use crate::models::*;

/// Insert or replace an image row keyed by name.
pub fn upsert_image(conn: &Connection, image: &Image) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO images (name, location, height, width, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(name) DO UPDATE SET
            location = excluded.location,
            height = excluded.height,
            width = excluded.width,
            updated_at = excluded.updated_at",
        params![
            image.name,
            image.location,
            image.height,
            image.width,
            image.created_at,
            image.updated_at,
        ],
    )?;
    Ok(())
}

pub fn get_image(conn: &Connection, name: &str) -> Result<Option<Image>, DatabaseError> {
    let result = conn.query_row(
        "SELECT name, location, height, width, created_at, updated_at
         FROM images WHERE name = ?1",
        params![name],
        |row| {
            Ok(Image {
                name: row.get(0)?,
                location: row.get(1)?,
                height: row.get(2)?,
                width: row.get(3)?,
                created_at: row.get::<_, NaiveDateTime>(4)?,
                updated_at: row.get::<_, NaiveDateTime>(5)?,
            })
        },
    );

    match result {
        Ok(image) => Ok(Some(image)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Apply a single-attribute update. Returns false when no image has that name.
pub fn update_image(conn: &Connection, name: &str, update: &ImageUpdate) -> Result<bool, DatabaseError> {
    let now = Utc::now().naive_utc();
    let changed = match update {
        ImageUpdate::Location(location) => conn.execute(
            "UPDATE images SET location = ?2, updated_at = ?3 WHERE name = ?1",
            params![name, location, now],
        )?,
        ImageUpdate::Height(height) => conn.execute(
            "UPDATE images SET height = ?2, updated_at = ?3 WHERE name = ?1",
            params![name, height, now],
        )?,
        ImageUpdate::Width(width) => conn.execute(
            "UPDATE images SET width = ?2, updated_at = ?3 WHERE name = ?1",
            params![name, width, now],
        )?,
    };
    Ok(changed > 0)
}

/// Remove the image row only. Fields on the image are left in place.
pub fn delete_image(conn: &Connection, name: &str) -> Result<bool, DatabaseError> {
    let changed = conn.execute("DELETE FROM images WHERE name = ?1", params![name])?;
    Ok(changed > 0)
}
