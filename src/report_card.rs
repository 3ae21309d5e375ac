use crate::calc::{self, CalcError, GradeState, RankEntry, SubjectStats};
use crate::config::GradingSettings;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectGroupInput {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub order: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectInput {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub coefficient: f64,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub order: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentInput {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub order: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeInput {
    pub student_id: String,
    pub subject_id: String,
    pub sequence_id: String,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub is_absent: bool,
}

/// A consistent read of one classroom's roster, subjects and grades for a
/// grading period. `sequence_ids` is ordered: index 0 feeds `grade1`, index 1
/// feeds `grade2`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportCardInput {
    pub classroom_id: String,
    pub term_id: String,
    pub sequence_ids: Vec<String>,
    #[serde(default)]
    pub subject_groups: Vec<SubjectGroupInput>,
    #[serde(default)]
    pub subjects: Vec<SubjectInput>,
    #[serde(default)]
    pub students: Vec<StudentInput>,
    #[serde(default)]
    pub grades: Vec<GradeInput>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentCourse {
    pub subject_id: String,
    pub group_id: Option<String>,
    pub grade1: Option<f64>,
    pub grade2: Option<f64>,
    pub grades: Vec<Option<f64>>,
    pub absences: Vec<bool>,
    pub average: Option<f64>,
    pub rank: Option<usize>,
    pub coeff: f64,
    pub total: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentGlobal {
    pub grade1_average: Option<f64>,
    pub grade2_average: Option<f64>,
    pub sequence_averages: Vec<Option<f64>>,
    pub average: Option<f64>,
    pub coeff_total: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSubtotal {
    pub group_id: Option<String>,
    pub name: String,
    pub coeff_total: f64,
    pub total: f64,
    pub average: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentReport {
    pub display_name: String,
    pub student_courses: Vec<StudentCourse>,
    pub global: StudentGlobal,
    pub groups: Vec<GroupSubtotal>,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassStats {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub average: Option<f64>,
    pub ranked_count: usize,
    pub passed_count: usize,
    pub success_rate: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedGrade {
    pub student_id: String,
    pub subject_id: String,
    pub sequence_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportCard {
    pub classroom_id: String,
    pub term_id: String,
    pub sequence_ids: Vec<String>,
    pub students_report: BTreeMap<String, StudentReport>,
    pub summary: BTreeMap<String, SubjectStats>,
    pub global_ranks: BTreeMap<String, RankEntry>,
    pub class_stats: ClassStats,
    pub skipped_grades: Vec<SkippedGrade>,
}

fn ensure_unique<'a, I>(kind: &str, ids: I) -> Result<(), CalcError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen: HashSet<&str> = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(
                CalcError::new("bad_params", format!("duplicate {} id", kind))
                    .with_details(json!({ "kind": kind, "id": id })),
            );
        }
    }
    Ok(())
}

/// Rejects snapshots that cannot be aggregated at all. Per-grade problems are
/// not errors; they are skipped during [`compute_report_card`].
pub fn validate_input(input: &ReportCardInput) -> Result<(), CalcError> {
    if input.sequence_ids.is_empty() {
        return Err(CalcError::new(
            "bad_params",
            "sequenceIds must name at least one sequence",
        ));
    }
    ensure_unique("sequence", input.sequence_ids.iter().map(|s| s.as_str()))?;
    ensure_unique("subject", input.subjects.iter().map(|s| s.id.as_str()))?;
    ensure_unique("student", input.students.iter().map(|s| s.id.as_str()))?;
    ensure_unique(
        "subjectGroup",
        input.subject_groups.iter().map(|g| g.id.as_str()),
    )?;
    for s in &input.subjects {
        if !s.coefficient.is_finite() || s.coefficient < 0.0 {
            return Err(CalcError::new(
                "bad_params",
                "subject coefficient must be a non-negative number",
            )
            .with_details(json!({ "subjectId": s.id, "coefficient": s.coefficient.to_string() })));
        }
    }
    Ok(())
}

struct OrderedSubject<'a> {
    subject: &'a SubjectInput,
    group: Option<&'a SubjectGroupInput>,
}

fn order_subjects<'a>(input: &'a ReportCardInput) -> Vec<OrderedSubject<'a>> {
    let groups: HashMap<&str, &SubjectGroupInput> = input
        .subject_groups
        .iter()
        .map(|g| (g.id.as_str(), g))
        .collect();
    let mut out: Vec<OrderedSubject<'a>> = input
        .subjects
        .iter()
        .map(|s| {
            let group = s.group_id.as_deref().and_then(|gid| {
                let found = groups.get(gid).copied();
                if found.is_none() {
                    warn!(subject_id = %s.id, group_id = %gid, "subject references unknown group; treating as ungrouped");
                }
                found
            });
            OrderedSubject { subject: s, group }
        })
        .collect();
    // Ungrouped subjects sort after every group.
    out.sort_by(|a, b| {
        let ak = (
            a.group.map(|g| g.order).unwrap_or(i64::MAX),
            a.group.map(|g| g.id.as_str()).unwrap_or(""),
            a.subject.order,
            a.subject.id.as_str(),
        );
        let bk = (
            b.group.map(|g| g.order).unwrap_or(i64::MAX),
            b.group.map(|g| g.id.as_str()).unwrap_or(""),
            b.subject.order,
            b.subject.id.as_str(),
        );
        ak.cmp(&bk)
    });
    out
}

fn skip(skipped: &mut Vec<SkippedGrade>, g: &GradeInput, reason: &str) {
    warn!(
        student_id = %g.student_id,
        subject_id = %g.subject_id,
        sequence_id = %g.sequence_id,
        reason,
        "skipping grade"
    );
    skipped.push(SkippedGrade {
        student_id: g.student_id.clone(),
        subject_id: g.subject_id.clone(),
        sequence_id: g.sequence_id.clone(),
        reason: reason.to_string(),
    });
}

fn scored_value(cell: Option<GradeState>) -> Option<f64> {
    match cell {
        Some(GradeState::Scored(v)) => Some(v),
        _ => None,
    }
}

/// Aggregates a snapshot into a report card.
///
/// Pure: the result depends only on `input` and `settings`. Grades that do not
/// fit the roster are reported in `skipped_grades` instead of failing the
/// whole computation.
pub fn compute_report_card(
    input: &ReportCardInput,
    settings: &GradingSettings,
) -> Result<ReportCard, CalcError> {
    validate_input(input)?;

    let subjects = order_subjects(input);
    let mut students: Vec<&StudentInput> = input.students.iter().collect();
    students.sort_by(|a, b| (a.order, a.id.as_str()).cmp(&(b.order, b.id.as_str())));

    let student_idx: HashMap<&str, usize> = students
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.as_str(), i))
        .collect();
    let subject_idx: HashMap<&str, usize> = subjects
        .iter()
        .enumerate()
        .map(|(i, s)| (s.subject.id.as_str(), i))
        .collect();
    let seq_idx: HashMap<&str, usize> = input
        .sequence_ids
        .iter()
        .enumerate()
        .map(|(i, s)| (s.as_str(), i))
        .collect();
    let n_seq = input.sequence_ids.len();

    // cells[student][subject][sequence]
    let mut cells: Vec<Vec<Vec<Option<GradeState>>>> =
        vec![vec![vec![None; n_seq]; subjects.len()]; students.len()];
    let mut skipped: Vec<SkippedGrade> = Vec::new();
    for g in &input.grades {
        let Some(&st) = student_idx.get(g.student_id.as_str()) else {
            skip(&mut skipped, g, "unknown_student");
            continue;
        };
        let Some(&su) = subject_idx.get(g.subject_id.as_str()) else {
            skip(&mut skipped, g, "unknown_subject");
            continue;
        };
        let Some(&sq) = seq_idx.get(g.sequence_id.as_str()) else {
            skip(&mut skipped, g, "unknown_sequence");
            continue;
        };
        let state = if g.is_absent {
            GradeState::Absent
        } else {
            match g.score {
                None => {
                    skip(&mut skipped, g, "missing_score");
                    continue;
                }
                Some(v) if !v.is_finite() || v < 0.0 || v > settings.scale_max => {
                    skip(&mut skipped, g, "score_out_of_range");
                    continue;
                }
                Some(v) => GradeState::Scored(v),
            }
        };
        let slot = &mut cells[st][su][sq];
        if slot.is_some() {
            skip(&mut skipped, g, "duplicate_grade");
            continue;
        }
        *slot = Some(state);
    }

    let subject_avgs: Vec<Vec<Option<f64>>> = cells
        .iter()
        .map(|per_subject| {
            per_subject
                .iter()
                .map(|seqs| calc::subject_average(seqs.iter().flatten().copied()))
                .collect()
        })
        .collect();

    let mut summary: BTreeMap<String, SubjectStats> = BTreeMap::new();
    let mut subject_ranks: Vec<HashMap<usize, usize>> = Vec::with_capacity(subjects.len());
    for (su, s) in subjects.iter().enumerate() {
        let column = subject_avgs.iter().map(|row| row[su]);
        summary.insert(s.subject.id.clone(), calc::subject_stats(column.clone()));
        subject_ranks.push(
            calc::competition_ranks(column.enumerate())
                .into_iter()
                .map(|(st, e)| (st, e.rank))
                .collect(),
        );
    }

    let coeffs: Vec<f64> = subjects.iter().map(|s| s.subject.coefficient).collect();
    let overall: Vec<Option<f64>> = subject_avgs
        .iter()
        .map(|row| calc::weighted_average(row.iter().copied().zip(coeffs.iter().copied())))
        .collect();

    let ranked = calc::competition_ranks(overall.iter().copied().enumerate());
    let ranked_avgs: Vec<f64> = ranked.iter().map(|(_, e)| e.average).collect();
    let spread = calc::subject_stats(ranked_avgs.iter().copied().map(Some));
    let class_stats = ClassStats {
        min: spread.min,
        max: spread.max,
        average: spread.average,
        ranked_count: ranked_avgs.len(),
        passed_count: ranked_avgs
            .iter()
            .filter(|a| **a >= settings.pass_mark)
            .count(),
        success_rate: calc::success_rate(&ranked_avgs, settings.pass_mark),
    };
    let global_ranks: BTreeMap<String, RankEntry> = ranked
        .into_iter()
        .map(|(st, e)| (students[st].id.clone(), e))
        .collect();

    let mut students_report: BTreeMap<String, StudentReport> = BTreeMap::new();
    for (st, student) in students.iter().enumerate() {
        let mut courses: Vec<StudentCourse> = Vec::with_capacity(subjects.len());
        let mut groups: Vec<GroupSubtotal> = Vec::new();
        let mut coeff_total = 0.0_f64;
        let mut total = 0.0_f64;
        for (su, s) in subjects.iter().enumerate() {
            let seqs = &cells[st][su];
            let grades: Vec<Option<f64>> = seqs.iter().map(|c| scored_value(*c)).collect();
            let average = subject_avgs[st][su];
            let coeff = s.subject.coefficient;
            let course_total = average.map(|a| a * coeff);
            if let Some(t) = course_total {
                total += t;
                coeff_total += coeff;
            }

            let group_id = s.group.map(|g| g.id.clone());
            let needs_new_group = groups
                .last()
                .map(|g| g.group_id != group_id)
                .unwrap_or(true);
            if needs_new_group {
                groups.push(GroupSubtotal {
                    group_id: group_id.clone(),
                    name: s.group.map(|g| g.name.clone()).unwrap_or_default(),
                    coeff_total: 0.0,
                    total: 0.0,
                    average: None,
                });
            }
            if let (Some(t), Some(current)) = (course_total, groups.last_mut()) {
                current.total += t;
                current.coeff_total += coeff;
            }

            courses.push(StudentCourse {
                subject_id: s.subject.id.clone(),
                group_id,
                grade1: grades.first().copied().flatten(),
                grade2: grades.get(1).copied().flatten(),
                absences: seqs
                    .iter()
                    .map(|c| matches!(c, Some(GradeState::Absent)))
                    .collect(),
                grades,
                average,
                rank: subject_ranks[su].get(&st).copied(),
                coeff,
                total: course_total,
            });
        }
        for g in &mut groups {
            g.average = if g.coeff_total > 0.0 {
                Some(g.total / g.coeff_total)
            } else {
                None
            };
        }

        let sequence_averages: Vec<Option<f64>> = (0..n_seq)
            .map(|sq| {
                calc::weighted_average(
                    (0..subjects.len()).map(|su| (scored_value(cells[st][su][sq]), coeffs[su])),
                )
            })
            .collect();

        students_report.insert(
            student.id.clone(),
            StudentReport {
                display_name: student.display_name.clone(),
                student_courses: courses,
                global: StudentGlobal {
                    grade1_average: sequence_averages.first().copied().flatten(),
                    grade2_average: sequence_averages.get(1).copied().flatten(),
                    sequence_averages,
                    average: overall[st],
                    coeff_total,
                    total,
                },
                groups,
            },
        );
    }

    debug!(
        classroom_id = %input.classroom_id,
        term_id = %input.term_id,
        students = students.len(),
        subjects = subjects.len(),
        ranked = class_stats.ranked_count,
        skipped = skipped.len(),
        "report card computed"
    );

    Ok(ReportCard {
        classroom_id: input.classroom_id.clone(),
        term_id: input.term_id.clone(),
        sequence_ids: input.sequence_ids.clone(),
        students_report,
        summary,
        global_ranks,
        class_stats,
        skipped_grades: skipped,
    })
}
