use std::str::FromStr;

use chrono::{NaiveDateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::db::DatabaseError;
use crate::models::*;

const IMAGE_FIELD_COLUMNS: &str = "image, field, x, y, width, height, high_thresh, low_thresh,
    char_set, ocr_val, final_val, confidence, status, last_error, template, recognized_at, updated_at";

/// Insert or fully replace an image field keyed by `(image, field)`.
pub fn upsert_image_field(conn: &Connection, field: &ImageField) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR REPLACE INTO image_fields (image, field, x, y, width, height, high_thresh,
         low_thresh, char_set, ocr_val, final_val, confidence, status, last_error, template,
         recognized_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        params![
            field.key.parent,
            field.key.field,
            field.geometry.x,
            field.geometry.y,
            field.geometry.width,
            field.geometry.height,
            field.thresholds.high,
            field.thresholds.low,
            field.char_set,
            field.ocr_val,
            field.final_val,
            field.confidence,
            field.status.as_str(),
            field.last_error,
            field.template,
            field.recognized_at,
            field.updated_at,
        ],
    )?;
    Ok(())
}

/// Upsert several fields in one transaction. Nothing is written if any row fails.
pub fn upsert_image_fields(conn: &Connection, fields: &[ImageField]) -> Result<(), DatabaseError> {
    let tx = conn.unchecked_transaction()?;
    for field in fields {
        upsert_image_field(&tx, field)?;
    }
    tx.commit()?;
    Ok(())
}

pub fn get_image_field(conn: &Connection, key: &FieldKey) -> Result<Option<ImageField>, DatabaseError> {
    let sql = format!("SELECT {IMAGE_FIELD_COLUMNS} FROM image_fields WHERE image = ?1 AND field = ?2");
    let result = conn.query_row(&sql, params![key.parent, key.field], read_row);

    match result {
        Ok(row) => Ok(Some(image_field_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// All fields registered on an image, ordered by field name.
pub fn list_image_fields(conn: &Connection, image: &str) -> Result<Vec<ImageField>, DatabaseError> {
    let sql = format!("SELECT {IMAGE_FIELD_COLUMNS} FROM image_fields WHERE image = ?1 ORDER BY field");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![image], read_row)?;

    let mut fields = Vec::new();
    for row in rows {
        fields.push(image_field_from_row(row?)?);
    }
    Ok(fields)
}

/// Fields on `image` that were copied from `template`, ordered by field name.
pub fn list_template_derived_fields(
    conn: &Connection,
    image: &str,
    template: &str,
) -> Result<Vec<ImageField>, DatabaseError> {
    let sql = format!(
        "SELECT {IMAGE_FIELD_COLUMNS} FROM image_fields
         WHERE image = ?1 AND template = ?2 ORDER BY field"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![image, template], read_row)?;

    let mut fields = Vec::new();
    for row in rows {
        fields.push(image_field_from_row(row?)?);
    }
    Ok(fields)
}

pub fn count_image_fields(
    conn: &Connection,
    image: &str,
    filter: FieldFilter,
) -> Result<u32, DatabaseError> {
    let sql = match filter {
        FieldFilter::All => "SELECT COUNT(*) FROM image_fields WHERE image = ?1",
        FieldFilter::Outstanding => {
            "SELECT COUNT(*) FROM image_fields
             WHERE image = ?1 AND (ocr_val IS NULL OR ocr_val = '')"
        }
        FieldFilter::Pending => {
            "SELECT COUNT(*) FROM image_fields WHERE image = ?1 AND status = 'pending'"
        }
        FieldFilter::Failed => {
            "SELECT COUNT(*) FROM image_fields WHERE image = ?1 AND status = 'failed'"
        }
    };
    let count: u32 = conn.query_row(sql, params![image], |row| row.get(0))?;
    Ok(count)
}

/// Apply a single-attribute update. Returns false when the key does not exist.
pub fn update_image_field(
    conn: &Connection,
    key: &FieldKey,
    update: &ImageFieldUpdate,
) -> Result<bool, DatabaseError> {
    let now = Utc::now().naive_utc();
    let (column, value): (&str, rusqlite::types::Value) = match update {
        ImageFieldUpdate::X(x) => ("x", (*x).into()),
        ImageFieldUpdate::Y(y) => ("y", (*y).into()),
        ImageFieldUpdate::Height(h) => ("height", (*h).into()),
        ImageFieldUpdate::Width(w) => ("width", (*w).into()),
        ImageFieldUpdate::CharSet(c) => ("char_set", c.clone().into()),
        ImageFieldUpdate::HighThresh(t) => ("high_thresh", (*t).into()),
        ImageFieldUpdate::LowThresh(t) => ("low_thresh", (*t).into()),
        ImageFieldUpdate::FinalVal(v) => ("final_val", v.clone().into()),
    };

    let sql = format!(
        "UPDATE image_fields SET {column} = ?3, updated_at = ?4 WHERE image = ?1 AND field = ?2"
    );
    let changed = conn.execute(&sql, params![key.parent, key.field, value, now])?;
    Ok(changed > 0)
}

/// Store a recognition result, but only while the stored rectangle still matches
/// the one that was cropped. Returns false if the field moved or vanished meanwhile.
pub fn record_recognition(
    conn: &Connection,
    key: &FieldKey,
    geometry: &FieldGeometry,
    text: &str,
    confidence: i32,
) -> Result<bool, DatabaseError> {
    let now = Utc::now().naive_utc();
    let changed = conn.execute(
        "UPDATE image_fields
         SET ocr_val = ?7, confidence = ?8, status = 'complete', last_error = NULL,
             recognized_at = ?9, updated_at = ?9
         WHERE image = ?1 AND field = ?2 AND x = ?3 AND y = ?4 AND width = ?5 AND height = ?6",
        params![
            key.parent,
            key.field,
            geometry.x,
            geometry.y,
            geometry.width,
            geometry.height,
            text,
            confidence,
            now,
        ],
    )?;
    Ok(changed > 0)
}

/// Mark a recognition attempt as failed. Text and confidence are cleared.
pub fn record_recognition_failure(
    conn: &Connection,
    key: &FieldKey,
    geometry: &FieldGeometry,
    error: &str,
) -> Result<bool, DatabaseError> {
    let now = Utc::now().naive_utc();
    let changed = conn.execute(
        "UPDATE image_fields
         SET ocr_val = NULL, confidence = NULL, status = 'failed', last_error = ?7, updated_at = ?8
         WHERE image = ?1 AND field = ?2 AND x = ?3 AND y = ?4 AND width = ?5 AND height = ?6",
        params![
            key.parent,
            key.field,
            geometry.x,
            geometry.y,
            geometry.width,
            geometry.height,
            error,
            now,
        ],
    )?;
    Ok(changed > 0)
}

pub fn delete_image_field(conn: &Connection, key: &FieldKey) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "DELETE FROM image_fields WHERE image = ?1 AND field = ?2",
        params![key.parent, key.field],
    )?;
    Ok(changed > 0)
}

// Internal row type for ImageField mapping
struct ImageFieldRow {
    image: String,
    field: String,
    x: i32,
    y: i32,
    width: u32,
    height: u32,
    high_thresh: i32,
    low_thresh: i32,
    char_set: Option<String>,
    ocr_val: Option<String>,
    final_val: Option<String>,
    confidence: Option<i32>,
    status: String,
    last_error: Option<String>,
    template: Option<String>,
    recognized_at: Option<NaiveDateTime>,
    updated_at: NaiveDateTime,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<ImageFieldRow> {
    Ok(ImageFieldRow {
        image: row.get(0)?,
        field: row.get(1)?,
        x: row.get(2)?,
        y: row.get(3)?,
        width: row.get(4)?,
        height: row.get(5)?,
        high_thresh: row.get(6)?,
        low_thresh: row.get(7)?,
        char_set: row.get(8)?,
        ocr_val: row.get(9)?,
        final_val: row.get(10)?,
        confidence: row.get(11)?,
        status: row.get(12)?,
        last_error: row.get(13)?,
        template: row.get(14)?,
        recognized_at: row.get(15)?,
        updated_at: row.get(16)?,
    })
}

fn image_field_from_row(row: ImageFieldRow) -> Result<ImageField, DatabaseError> {
    Ok(ImageField {
        key: FieldKey::new(row.image, row.field),
        geometry: FieldGeometry::new(row.x, row.y, row.width, row.height),
        thresholds: Thresholds::new(row.high_thresh, row.low_thresh),
        char_set: row.char_set,
        ocr_val: row.ocr_val,
        final_val: row.final_val,
        confidence: row.confidence,
        status: RecognitionStatus::from_str(&row.status)?,
        last_error: row.last_error,
        template: row.template,
        recognized_at: row.recognized_at,
        updated_at: row.updated_at,
    })
}
