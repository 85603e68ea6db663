use std::str::FromStr;

use rusqlite::{params, Connection};
use uuid::Uuid;

use super::SqlFilter;
use crate::db::{decode_json, decode_json_as, decode_timestamp, decode_uuid, DatabaseError};
use crate::models::*;

// ═══════════════════════════════════════════════════════════
// OASIS form templates
// ═══════════════════════════════════════════════════════════

const OASIS_TEMPLATE_COLUMNS: &str =
    "id, name, assessment_type, discipline, template_structure, version, is_active, created_at";

/// Active OASIS templates, optionally narrowed by type and discipline.
pub fn list_oasis_templates(
    conn: &Connection,
    filter: &OasisTemplateFilter,
) -> Result<Vec<OasisTemplate>, DatabaseError> {
    let mut f = SqlFilter::new();
    f.and_raw("is_active = 1");
    if let Some(kind) = filter.assessment_type {
        f.and_eq("assessment_type", kind.as_str());
    }
    if let Some(discipline) = filter.discipline {
        f.and_eq("discipline", discipline.as_str());
    }
    let sql = format!(
        "SELECT {OASIS_TEMPLATE_COLUMNS} FROM oasis_templates{} ORDER BY assessment_type, discipline",
        f.sql()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(f.params().as_slice(), oasis_template_tuple)?;
    let mut templates = Vec::new();
    for row in rows {
        templates.push(oasis_template_from_tuple(row?)?);
    }
    Ok(templates)
}

pub fn get_oasis_template(conn: &Connection, id: &Uuid) -> Result<Option<OasisTemplate>, DatabaseError> {
    let sql = format!("SELECT {OASIS_TEMPLATE_COLUMNS} FROM oasis_templates WHERE id = ?1");
    let result = conn.query_row(&sql, params![id.to_string()], oasis_template_tuple);
    match result {
        Ok(tuple) => Ok(Some(oasis_template_from_tuple(tuple)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

type OasisTemplateTuple = (String, String, String, String, String, String, i32, String);

fn oasis_template_tuple(row: &rusqlite::Row<'_>) -> Result<OasisTemplateTuple, rusqlite::Error> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn oasis_template_from_tuple(t: OasisTemplateTuple) -> Result<OasisTemplate, DatabaseError> {
    let (id, name, kind, discipline, structure, version, is_active, created_at) = t;
    Ok(OasisTemplate {
        id: decode_uuid("oasis_templates.id", &id)?,
        name,
        assessment_type: AssessmentType::from_str(&kind)?,
        discipline: Discipline::from_str(&discipline)?,
        template_structure: decode_json("oasis_templates.template_structure", &structure)?,
        version,
        is_active: is_active != 0,
        created_at: decode_timestamp("oasis_templates.created_at", &created_at)?,
    })
}

// ═══════════════════════════════════════════════════════════
// Message templates
// ═══════════════════════════════════════════════════════════

const MESSAGE_TEMPLATE_COLUMNS: &str =
    "id, name, message_type, template_content, variables, is_active, created_at";

pub fn list_message_templates(
    conn: &Connection,
    message_type: Option<MessageType>,
) -> Result<Vec<MessageTemplate>, DatabaseError> {
    let mut f = SqlFilter::new();
    f.and_raw("is_active = 1");
    if let Some(kind) = message_type {
        f.and_eq("message_type", kind.as_str());
    }
    let sql = format!(
        "SELECT {MESSAGE_TEMPLATE_COLUMNS} FROM message_templates{} ORDER BY name",
        f.sql()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(f.params().as_slice(), message_template_tuple)?;
    let mut templates = Vec::new();
    for row in rows {
        templates.push(message_template_from_tuple(row?)?);
    }
    Ok(templates)
}

pub fn get_message_template(
    conn: &Connection,
    id: &Uuid,
) -> Result<Option<MessageTemplate>, DatabaseError> {
    let sql = format!("SELECT {MESSAGE_TEMPLATE_COLUMNS} FROM message_templates WHERE id = ?1");
    let result = conn.query_row(&sql, params![id.to_string()], message_template_tuple);
    match result {
        Ok(tuple) => Ok(Some(message_template_from_tuple(tuple)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

type MessageTemplateTuple = (String, String, String, String, String, i32, String);

fn message_template_tuple(row: &rusqlite::Row<'_>) -> Result<MessageTemplateTuple, rusqlite::Error> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn message_template_from_tuple(t: MessageTemplateTuple) -> Result<MessageTemplate, DatabaseError> {
    let (id, name, kind, content, variables, is_active, created_at) = t;
    Ok(MessageTemplate {
        id: decode_uuid("message_templates.id", &id)?,
        name,
        message_type: MessageType::from_str(&kind)?,
        template_content: content,
        variables: decode_json_as("message_templates.variables", &variables)?,
        is_active: is_active != 0,
        created_at: decode_timestamp("message_templates.created_at", &created_at)?,
    })
}

// ═══════════════════════════════════════════════════════════
// Visit documentation templates
// ═══════════════════════════════════════════════════════════

pub fn list_documentation_templates(
    conn: &Connection,
    discipline: Option<Discipline>,
) -> Result<Vec<DocumentationTemplate>, DatabaseError> {
    let mut f = SqlFilter::new();
    f.and_raw("is_active = 1");
    if let Some(discipline) = discipline {
        f.and_eq("discipline", discipline.as_str());
    }
    let sql = format!(
        "SELECT id, name, discipline, template_data, is_active, created_at
         FROM documentation_templates{} ORDER BY discipline, name",
        f.sql()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(f.params().as_slice(), documentation_template_tuple)?;
    let mut templates = Vec::new();
    for row in rows {
        templates.push(documentation_template_from_tuple(row?)?);
    }
    Ok(templates)
}

pub fn get_documentation_template(
    conn: &Connection,
    id: &Uuid,
) -> Result<Option<DocumentationTemplate>, DatabaseError> {
    let result = conn.query_row(
        "SELECT id, name, discipline, template_data, is_active, created_at
         FROM documentation_templates WHERE id = ?1",
        params![id.to_string()],
        documentation_template_tuple,
    );
    match result {
        Ok(tuple) => Ok(Some(documentation_template_from_tuple(tuple)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

type DocumentationTemplateTuple = (String, String, String, String, i32, String);

fn documentation_template_tuple(
    row: &rusqlite::Row<'_>,
) -> Result<DocumentationTemplateTuple, rusqlite::Error> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn documentation_template_from_tuple(
    t: DocumentationTemplateTuple,
) -> Result<DocumentationTemplate, DatabaseError> {
    let (id, name, discipline, data, is_active, created_at) = t;
    Ok(DocumentationTemplate {
        id: decode_uuid("documentation_templates.id", &id)?,
        name,
        discipline: Discipline::from_str(&discipline)?,
        template_data: decode_json("documentation_templates.template_data", &data)?,
        is_active: is_active != 0,
        created_at: decode_timestamp("documentation_templates.created_at", &created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;

    #[test]
    fn seeded_oasis_templates_filter_by_discipline() {
        let conn = open_memory_database().unwrap();
        let all = list_oasis_templates(&conn, &OasisTemplateFilter::default()).unwrap();
        assert_eq!(all.len(), 4);

        let pt = list_oasis_templates(
            &conn,
            &OasisTemplateFilter {
                discipline: Some(Discipline::PhysicalTherapy),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(pt.len(), 1);
        assert!(pt[0].template_structure.get("sections").is_some());

        let fetched = get_oasis_template(&conn, &pt[0].id).unwrap().unwrap();
        assert_eq!(fetched.name, pt[0].name);
    }

    #[test]
    fn seeded_message_templates_carry_variables() {
        let conn = open_memory_database().unwrap();
        let templates = list_message_templates(&conn, Some(MessageType::PhysicianUpdate)).unwrap();
        assert_eq!(templates.len(), 1);
        assert!(templates[0].variables.contains(&"patient_name".to_string()));
    }

    #[test]
    fn documentation_templates_by_discipline() {
        let conn = open_memory_database().unwrap();
        let sn = list_documentation_templates(&conn, Some(Discipline::SkilledNursing)).unwrap();
        assert_eq!(sn.len(), 1);
        assert!(get_documentation_template(&conn, &Uuid::new_v4()).unwrap().is_none());
    }
}
