use crate::model::{AttendanceRecord, AttendanceStatus, Student, Subject, SubjectId};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn invalid_filter(message: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            details: Some(details),
            ..Self::new("invalid_filter", message)
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }
}

/// Two-decimal rounding applied to every emitted percentage.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn percent_of(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    round2(100.0 * part as f64 / whole as f64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AttendanceBand {
    Good,
    Warning,
    Critical,
}

/// Severity band for an attendance percentage. Lower bounds are inclusive.
pub fn classify(percentage: f64) -> AttendanceBand {
    if percentage >= 75.0 {
        AttendanceBand::Good
    } else if percentage >= 50.0 {
        AttendanceBand::Warning
    } else {
        AttendanceBand::Critical
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tally {
    pub total: usize,
    pub present: usize,
    pub absent: usize,
    pub on_duty: usize,
    pub percentage: f64,
}

impl Tally {
    pub fn band(&self) -> AttendanceBand {
        classify(self.percentage)
    }
}

pub fn tally<'a, I>(records: I) -> Tally
where
    I: IntoIterator<Item = &'a AttendanceRecord>,
{
    let mut t = Tally::default();
    for r in records {
        t.total += 1;
        match r.status {
            AttendanceStatus::Present => t.present += 1,
            AttendanceStatus::Absent => t.absent += 1,
            AttendanceStatus::OnDuty => t.on_duty += 1,
        }
    }
    t.percentage = percent_of(t.present, t.total);
    t
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectSummary {
    pub student: Student,
    #[serde(flatten)]
    pub tally: Tally,
}

/// Per-student tallies for one subject, optionally restricted to one date.
/// Output order follows `students`.
pub fn summarize_by_subject(
    students: &[Student],
    records: &[AttendanceRecord],
    subject_id: &SubjectId,
    date: Option<NaiveDate>,
) -> Vec<SubjectSummary> {
    students
        .iter()
        .map(|s| SubjectSummary {
            student: s.clone(),
            tally: tally(records.iter().filter(|r| {
                r.student_id == s.id
                    && r.subject_id == *subject_id
                    && date.map_or(true, |d| r.date == d)
            })),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectTally {
    pub subject: Subject,
    #[serde(flatten)]
    pub tally: Tally,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentSummary {
    pub student: Student,
    pub subjects: Vec<SubjectTally>,
    /// Records of subjects outside `subjects`.
    pub other_subjects: Tally,
    pub overall: Tally,
}

/// One tally per listed subject plus an overall tally over every record of
/// the student, whichever subject it belongs to. Records of unlisted
/// subjects land in `other_subjects`, so the subject totals plus that tally
/// add up to `overall.total`.
pub fn summarize_by_student(
    student: &Student,
    subjects: &[Subject],
    records: &[AttendanceRecord],
) -> StudentSummary {
    let own: Vec<&AttendanceRecord> = records
        .iter()
        .filter(|r| r.student_id == student.id)
        .collect();
    let per_subject = subjects
        .iter()
        .map(|sub| SubjectTally {
            subject: sub.clone(),
            tally: tally(own.iter().copied().filter(|r| r.subject_id == sub.id)),
        })
        .collect();
    let listed: HashSet<&SubjectId> = subjects.iter().map(|s| &s.id).collect();
    StudentSummary {
        student: student.clone(),
        subjects: per_subject,
        other_subjects: tally(
            own.iter()
                .copied()
                .filter(|r| !listed.contains(&r.subject_id)),
        ),
        overall: tally(own.iter().copied()),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodRollup {
    pub total_periods: usize,
    pub present_periods: usize,
    pub absent_periods: usize,
    pub on_duty_periods: usize,
    pub unmarked_periods: usize,
    pub present_percent: f64,
    pub absent_percent: f64,
}

/// Period counts against the planned capacity, not the number marked so far.
pub fn overall_by_period(records: &[AttendanceRecord], total_periods: usize) -> PeriodRollup {
    let t = tally(records);
    PeriodRollup {
        total_periods,
        present_periods: t.present,
        absent_periods: t.absent,
        on_duty_periods: t.on_duty,
        unmarked_periods: total_periods.saturating_sub(t.total),
        present_percent: percent_of(t.present, total_periods),
        absent_percent: percent_of(t.absent, total_periods),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayRollup {
    pub total_working_days: usize,
    pub present_days: usize,
    pub absent_days: usize,
    pub unmarked_days: usize,
    pub present_percent_day: f64,
    pub absent_percent_day: f64,
}

/// Day-level rollup. A date is a present day when any record on it is
/// Present, and an absent day only when every record on it is Absent, so
/// mixed days never count as absent.
pub fn overall_by_day(records: &[AttendanceRecord], total_working_days: usize) -> DayRollup {
    // date -> (any present, all absent)
    let mut days: BTreeMap<NaiveDate, (bool, bool)> = BTreeMap::new();
    for r in records {
        let entry = days.entry(r.date).or_insert((false, true));
        entry.0 |= r.status == AttendanceStatus::Present;
        entry.1 &= r.status == AttendanceStatus::Absent;
    }
    let present_days = days.values().filter(|(any_present, _)| *any_present).count();
    let absent_days = days.values().filter(|(_, all_absent)| *all_absent).count();
    DayRollup {
        total_working_days,
        present_days,
        absent_days,
        unmarked_days: total_working_days.saturating_sub(present_days + absent_days),
        present_percent_day: percent_of(present_days, total_working_days),
        absent_percent_day: percent_of(absent_days, total_working_days),
    }
}

/// Resolves a counsellor search to at most one student: case-insensitive
/// substring on name or registration number, first match wins.
pub fn find_student<'a>(students: &'a [Student], query: &str) -> Option<&'a Student> {
    let q = query.trim().to_lowercase();
    if q.is_empty() {
        return None;
    }
    students
        .iter()
        .find(|s| s.name.to_lowercase().contains(&q) || s.reg_no.to_lowercase().contains(&q))
}
