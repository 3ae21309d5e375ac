use crate::calc::CalcError;
use crate::report_card::{
    GradeInput, ReportCardInput, StudentInput, SubjectGroupInput, SubjectInput,
};
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};

/// Grading period a report card is computed for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Period {
    Term(String),
    Sequence(String),
}

fn db_err(e: rusqlite::Error) -> CalcError {
    CalcError::new("db_query_failed", e.to_string())
}

fn resolve_period(conn: &Connection, period: &Period) -> Result<(String, Vec<String>), CalcError> {
    match period {
        Period::Term(term_id) => {
            let exists: Option<i64> = conn
                .query_row("SELECT 1 FROM terms WHERE id = ?", [term_id], |r| r.get(0))
                .optional()
                .map_err(db_err)?;
            if exists.is_none() {
                return Err(CalcError::new("not_found", "term not found"));
            }
            let mut stmt = conn
                .prepare("SELECT id FROM sequences WHERE term_id = ? ORDER BY sort_order")
                .map_err(db_err)?;
            let ids = stmt
                .query_map([term_id], |r| r.get::<_, String>(0))
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
                .map_err(db_err)?;
            Ok((term_id.clone(), ids))
        }
        Period::Sequence(sequence_id) => {
            let term_id: Option<String> = conn
                .query_row(
                    "SELECT term_id FROM sequences WHERE id = ?",
                    [sequence_id],
                    |r| r.get(0),
                )
                .optional()
                .map_err(db_err)?;
            let Some(term_id) = term_id else {
                return Err(CalcError::new("not_found", "sequence not found"));
            };
            Ok((term_id, vec![sequence_id.clone()]))
        }
    }
}

/// Reads one consistent snapshot of a classroom for `period`. Only active
/// students are part of the roster.
pub fn load_report_card_input(
    conn: &Connection,
    classroom_id: &str,
    period: &Period,
) -> Result<ReportCardInput, CalcError> {
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM classrooms WHERE id = ?", [classroom_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_err)?;
    if exists.is_none() {
        return Err(CalcError::new("not_found", "classroom not found"));
    }

    let (term_id, sequence_ids) = resolve_period(conn, period)?;

    let mut stmt = conn
        .prepare(
            "SELECT id, last_name, first_name, sort_order
             FROM students
             WHERE classroom_id = ? AND active = 1
             ORDER BY sort_order",
        )
        .map_err(db_err)?;
    let students: Vec<StudentInput> = stmt
        .query_map([classroom_id], |r| {
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            Ok(StudentInput {
                id: r.get(0)?,
                display_name: format!("{}, {}", last, first),
                order: r.get(3)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let mut stmt = conn
        .prepare(
            "SELECT id, name, sort_order
             FROM subject_groups
             WHERE classroom_id = ?
             ORDER BY sort_order",
        )
        .map_err(db_err)?;
    let subject_groups: Vec<SubjectGroupInput> = stmt
        .query_map([classroom_id], |r| {
            Ok(SubjectGroupInput {
                id: r.get(0)?,
                name: r.get(1)?,
                order: r.get(2)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let mut stmt = conn
        .prepare(
            "SELECT id, course_name, coefficient, group_id, sort_order
             FROM subjects
             WHERE classroom_id = ?
             ORDER BY sort_order",
        )
        .map_err(db_err)?;
    let subjects: Vec<SubjectInput> = stmt
        .query_map([classroom_id], |r| {
            Ok(SubjectInput {
                id: r.get(0)?,
                name: r.get(1)?,
                coefficient: r.get(2)?,
                group_id: r.get(3)?,
                order: r.get(4)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let mut grades: Vec<GradeInput> = Vec::new();
    if !students.is_empty() && !subjects.is_empty() && !sequence_ids.is_empty() {
        let placeholders = std::iter::repeat("?")
            .take(sequence_ids.len())
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!(
            "SELECT g.student_id, g.subject_id, g.sequence_id, g.score, g.is_absent
             FROM grades g
             JOIN subjects su ON su.id = g.subject_id
             JOIN students st ON st.id = g.student_id
             WHERE su.classroom_id = ? AND st.active = 1 AND g.sequence_id IN ({})
             ORDER BY g.rowid",
            placeholders
        );
        let mut bind_values: Vec<Value> = Vec::with_capacity(sequence_ids.len() + 1);
        bind_values.push(Value::Text(classroom_id.to_string()));
        for id in &sequence_ids {
            bind_values.push(Value::Text(id.clone()));
        }
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        grades = stmt
            .query_map(params_from_iter(bind_values), |r| {
                Ok(GradeInput {
                    student_id: r.get(0)?,
                    subject_id: r.get(1)?,
                    sequence_id: r.get(2)?,
                    score: r.get(3)?,
                    is_absent: r.get::<_, i64>(4)? != 0,
                })
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(db_err)?;
    }

    Ok(ReportCardInput {
        classroom_id: classroom_id.to_string(),
        term_id,
        sequence_ids,
        subject_groups,
        subjects,
        students,
        grades,
    })
}
