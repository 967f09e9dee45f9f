use chrono::{NaiveDateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::db::DatabaseError;
use crate::models::*;

pub fn upsert_template_field(conn: &Connection, field: &TemplateField) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR REPLACE INTO template_fields (template, field, x, y, width, height,
         high_thresh, low_thresh, char_set, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
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
            field.updated_at,
        ],
    )?;
    Ok(())
}

pub fn upsert_template_fields(
    conn: &Connection,
    fields: &[TemplateField],
) -> Result<(), DatabaseError> {
    let tx = conn.unchecked_transaction()?;
    for field in fields {
        upsert_template_field(&tx, field)?;
    }
    tx.commit()?;
    Ok(())
}

pub fn get_template_field(
    conn: &Connection,
    key: &FieldKey,
) -> Result<Option<TemplateField>, DatabaseError> {
    let result = conn.query_row(
        "SELECT template, field, x, y, width, height, high_thresh, low_thresh, char_set, updated_at
         FROM template_fields WHERE template = ?1 AND field = ?2",
        params![key.parent, key.field],
        template_field_from_row,
    );

    match result {
        Ok(field) => Ok(Some(field)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Template fields ordered by field name, the order they are applied in.
pub fn list_template_fields(
    conn: &Connection,
    template: &str,
) -> Result<Vec<TemplateField>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT template, field, x, y, width, height, high_thresh, low_thresh, char_set, updated_at
         FROM template_fields WHERE template = ?1 ORDER BY field",
    )?;
    let rows = stmt.query_map(params![template], template_field_from_row)?;

    let mut fields = Vec::new();
    for row in rows {
        fields.push(row?);
    }
    Ok(fields)
}

pub fn update_template_field(
    conn: &Connection,
    key: &FieldKey,
    update: &TemplateFieldUpdate,
) -> Result<bool, DatabaseError> {
    let now = Utc::now().naive_utc();
    let (column, value): (&str, rusqlite::types::Value) = match update {
        TemplateFieldUpdate::X(x) => ("x", (*x).into()),
        TemplateFieldUpdate::Y(y) => ("y", (*y).into()),
        TemplateFieldUpdate::Height(h) => ("height", (*h).into()),
        TemplateFieldUpdate::Width(w) => ("width", (*w).into()),
        TemplateFieldUpdate::CharSet(c) => ("char_set", c.clone().into()),
        TemplateFieldUpdate::HighThresh(t) => ("high_thresh", (*t).into()),
        TemplateFieldUpdate::LowThresh(t) => ("low_thresh", (*t).into()),
    };

    let sql = format!(
        "UPDATE template_fields SET {column} = ?3, updated_at = ?4 WHERE template = ?1 AND field = ?2"
    );
    let changed = conn.execute(&sql, params![key.parent, key.field, value, now])?;
    Ok(changed > 0)
}

pub fn delete_template_field(conn: &Connection, key: &FieldKey) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "DELETE FROM template_fields WHERE template = ?1 AND field = ?2",
        params![key.parent, key.field],
    )?;
    Ok(changed > 0)
}

fn template_field_from_row(row: &Row<'_>) -> rusqlite::Result<TemplateField> {
    Ok(TemplateField {
        key: FieldKey::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?),
        geometry: FieldGeometry::new(row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?),
        thresholds: Thresholds::new(row.get(6)?, row.get(7)?),
        char_set: row.get(8)?,
        updated_at: row.get::<_, NaiveDateTime>(9)?,
    })
}
