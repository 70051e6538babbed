use crate::db;
use crate::model::{
    AttendanceFilter, AttendanceRecord, AttendanceStatus, RecordId, RecordKey, SectionScope,
    Student, StudentId, Subject, SubjectId,
};
use crate::plan::DATE_FORMAT;
use crate::upsert::{apply_mark, MarkOutcome};
use anyhow::Context;
use chrono::NaiveDate;
use log::{info, warn};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::Hash;
use std::path::Path;

const DEMO_SNAPSHOT: &str = include_str!("../fixtures/demo_snapshot.json");

/// Query surface the aggregation handlers read from. Implementations may be
/// live (SQLite) or in-memory; callers cannot tell them apart.
pub trait RecordStore {
    fn list_students(&self, scope: &SectionScope) -> anyhow::Result<Vec<Student>>;
    fn list_subjects(&self, scope: &SectionScope) -> anyhow::Result<Vec<Subject>>;
    fn list_attendance(&self, filter: &AttendanceFilter) -> anyhow::Result<Vec<AttendanceRecord>>;
    fn upsert_attendance(
        &mut self,
        key: &RecordKey,
        status: AttendanceStatus,
    ) -> anyhow::Result<MarkOutcome>;

    fn mark_many(
        &mut self,
        keys: &[RecordKey],
        status: AttendanceStatus,
    ) -> anyhow::Result<Vec<MarkOutcome>> {
        keys.iter()
            .map(|k| self.upsert_attendance(k, status))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// In-memory snapshot

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub students: Vec<Student>,
    #[serde(default)]
    pub subjects: Vec<Subject>,
    #[serde(default)]
    pub attendance: Vec<AttendanceRecord>,
}

impl Snapshot {
    /// Built-in demo roster served when the fixture strategy has no file.
    pub fn demo() -> anyhow::Result<Self> {
        serde_json::from_str(DEMO_SNAPSHOT).context("parse built-in demo snapshot")
    }

    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read snapshot {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parse snapshot {}", path.display()))
    }
}

impl RecordStore for Snapshot {
    fn list_students(&self, scope: &SectionScope) -> anyhow::Result<Vec<Student>> {
        Ok(self
            .students
            .iter()
            .filter(|s| scope.matches(&s.department, &s.section))
            .cloned()
            .collect())
    }

    fn list_subjects(&self, scope: &SectionScope) -> anyhow::Result<Vec<Subject>> {
        Ok(self
            .subjects
            .iter()
            .filter(|s| scope.matches(&s.department, &s.section))
            .cloned()
            .collect())
    }

    fn list_attendance(&self, filter: &AttendanceFilter) -> anyhow::Result<Vec<AttendanceRecord>> {
        Ok(self
            .attendance
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    fn upsert_attendance(
        &mut self,
        key: &RecordKey,
        status: AttendanceStatus,
    ) -> anyhow::Result<MarkOutcome> {
        Ok(apply_mark(&mut self.attendance, key, status, RecordId::generate))
    }
}

// ---------------------------------------------------------------------------
// SQLite workspace store

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewStudent {
    pub name: String,
    pub reg_no: String,
    pub department: String,
    pub section: String,
    #[serde(default)]
    pub semester: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSubject {
    pub name: String,
    pub department: String,
    pub section: String,
}

pub struct SqliteStore {
    conn: Connection,
}

type RawRecord = (String, String, String, String, i64, String);

fn decode_record(raw: RawRecord) -> anyhow::Result<AttendanceRecord> {
    let (id, student_id, subject_id, date, period, status) = raw;
    let date = NaiveDate::parse_from_str(&date, DATE_FORMAT)
        .with_context(|| format!("attendance {} has bad date {:?}", id, date))?;
    let status = AttendanceStatus::parse(&status)
        .with_context(|| format!("attendance {} has bad status {:?}", id, status))?;
    let period = u32::try_from(period)
        .with_context(|| format!("attendance {} has bad period {}", id, period))?;
    Ok(AttendanceRecord {
        id: RecordId::new(id),
        student_id: StudentId::new(student_id),
        subject_id: SubjectId::new(subject_id),
        date,
        period,
        status,
    })
}

fn scope_where(scope: &SectionScope) -> (String, Vec<Value>) {
    let mut clauses: Vec<&str> = Vec::new();
    let mut binds: Vec<Value> = Vec::new();
    if let Some(d) = &scope.department {
        clauses.push("department = ?");
        binds.push(Value::Text(d.clone()));
    }
    if let Some(s) = &scope.section {
        clauses.push("section = ?");
        binds.push(Value::Text(s.clone()));
    }
    let sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    (sql, binds)
}

fn find_by_key(conn: &Connection, key: &RecordKey) -> anyhow::Result<Option<AttendanceRecord>> {
    let raw: Option<RawRecord> = conn
        .query_row(
            "SELECT id, student_id, subject_id, date, period, status
             FROM attendance
             WHERE student_id = ? AND subject_id = ? AND date = ? AND period = ?",
            (
                key.student_id.as_str(),
                key.subject_id.as_str(),
                key.date.format(DATE_FORMAT).to_string(),
                i64::from(key.period),
            ),
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?)),
        )
        .optional()?;
    raw.map(decode_record).transpose()
}

/// Read-then-write inside the caller's transaction, which must already hold
/// the write lock so the read cannot go stale before the write.
fn upsert_on(
    conn: &Connection,
    key: &RecordKey,
    status: AttendanceStatus,
) -> anyhow::Result<MarkOutcome> {
    let before = find_by_key(conn, key)?;
    if let Some(existing) = &before {
        if existing.status == status {
            return Ok(MarkOutcome::Unchanged {
                record: existing.clone(),
            });
        }
    }

    conn.execute(
        "INSERT INTO attendance(id, student_id, subject_id, date, period, status, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, subject_id, date, period) DO UPDATE SET
           status = excluded.status,
           updated_at = excluded.updated_at",
        (
            RecordId::generate().as_str(),
            key.student_id.as_str(),
            key.subject_id.as_str(),
            key.date.format(DATE_FORMAT).to_string(),
            i64::from(key.period),
            status.as_str(),
            chrono::Utc::now().to_rfc3339(),
        ),
    )?;

    let record = find_by_key(conn, key)?
        .with_context(|| format!("attendance row missing after upsert for {:?}", key))?;
    Ok(match before {
        Some(prev) => MarkOutcome::Updated {
            record,
            previous_status: prev.status,
        },
        None => MarkOutcome::Created { record },
    })
}

impl SqliteStore {
    pub fn open(workspace: &Path) -> anyhow::Result<Self> {
        let conn = db::open_db(workspace)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn enroll_student(&self, new: &NewStudent) -> anyhow::Result<Student> {
        let student = Student {
            id: StudentId::generate(),
            name: new.name.trim().to_string(),
            reg_no: new.reg_no.trim().to_string(),
            department: new.department.trim().to_string(),
            section: new.section.trim().to_string(),
            semester: new.semester,
        };
        let sort_order = db::next_sort_order(&self.conn, "students")?;
        self.conn.execute(
            "INSERT INTO students(id, name, reg_no, department, section, semester, sort_order)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (
                student.id.as_str(),
                &student.name,
                &student.reg_no,
                &student.department,
                &student.section,
                i64::from(student.semester),
                sort_order,
            ),
        )?;
        info!(
            "event=student_enrolled module=store status=ok student_id={} department={} section={}",
            student.id, student.department, student.section
        );
        Ok(student)
    }

    pub fn add_subject(&self, new: &NewSubject) -> anyhow::Result<Subject> {
        let subject = Subject {
            id: SubjectId::generate(),
            name: new.name.trim().to_string(),
            department: new.department.trim().to_string(),
            section: new.section.trim().to_string(),
        };
        let sort_order = db::next_sort_order(&self.conn, "subjects")?;
        self.conn.execute(
            "INSERT INTO subjects(id, name, department, section, sort_order)
             VALUES(?, ?, ?, ?, ?)",
            (
                subject.id.as_str(),
                &subject.name,
                &subject.department,
                &subject.section,
                sort_order,
            ),
        )?;
        info!(
            "event=subject_added module=store status=ok subject_id={}",
            subject.id
        );
        Ok(subject)
    }

    pub fn student(&self, id: &StudentId) -> anyhow::Result<Option<Student>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, name, reg_no, department, section, semester FROM students WHERE id = ?",
                [id.as_str()],
                |r| {
                    Ok(Student {
                        id: StudentId::new(r.get::<_, String>(0)?),
                        name: r.get(1)?,
                        reg_no: r.get(2)?,
                        department: r.get(3)?,
                        section: r.get(4)?,
                        semester: r.get::<_, i64>(5)?.max(0) as u32,
                    })
                },
            )
            .optional()?)
    }

    pub fn subject(&self, id: &SubjectId) -> anyhow::Result<Option<Subject>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, name, department, section FROM subjects WHERE id = ?",
                [id.as_str()],
                |r| {
                    Ok(Subject {
                        id: SubjectId::new(r.get::<_, String>(0)?),
                        name: r.get(1)?,
                        department: r.get(2)?,
                        section: r.get(3)?,
                    })
                },
            )
            .optional()?)
    }
}

impl RecordStore for SqliteStore {
    fn list_students(&self, scope: &SectionScope) -> anyhow::Result<Vec<Student>> {
        let (where_sql, binds) = scope_where(scope);
        let sql = format!(
            "SELECT id, name, reg_no, department, section, semester
             FROM students{}
             ORDER BY sort_order",
            where_sql
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(binds), |r| {
                Ok(Student {
                    id: StudentId::new(r.get::<_, String>(0)?),
                    name: r.get(1)?,
                    reg_no: r.get(2)?,
                    department: r.get(3)?,
                    section: r.get(4)?,
                    semester: r.get::<_, i64>(5)?.max(0) as u32,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn list_subjects(&self, scope: &SectionScope) -> anyhow::Result<Vec<Subject>> {
        let (where_sql, binds) = scope_where(scope);
        let sql = format!(
            "SELECT id, name, department, section
             FROM subjects{}
             ORDER BY sort_order",
            where_sql
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(binds), |r| {
                Ok(Subject {
                    id: SubjectId::new(r.get::<_, String>(0)?),
                    name: r.get(1)?,
                    department: r.get(2)?,
                    section: r.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn list_attendance(&self, filter: &AttendanceFilter) -> anyhow::Result<Vec<AttendanceRecord>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut binds: Vec<Value> = Vec::new();
        if let Some(id) = &filter.student_id {
            clauses.push("student_id = ?");
            binds.push(Value::Text(id.as_str().to_string()));
        }
        if let Some(id) = &filter.subject_id {
            clauses.push("subject_id = ?");
            binds.push(Value::Text(id.as_str().to_string()));
        }
        if let Some(d) = filter.date {
            clauses.push("date = ?");
            binds.push(Value::Text(d.format(DATE_FORMAT).to_string()));
        }
        if let Some(p) = filter.period {
            clauses.push("period = ?");
            binds.push(Value::Integer(i64::from(p)));
        }
        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT id, student_id, subject_id, date, period, status
             FROM attendance{}
             ORDER BY date, period, student_id, subject_id",
            where_sql
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let raw: Vec<RawRecord> = stmt
            .query_map(params_from_iter(binds), |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter().map(decode_record).collect()
    }

    fn upsert_attendance(
        &mut self,
        key: &RecordKey,
        status: AttendanceStatus,
    ) -> anyhow::Result<MarkOutcome> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let outcome = upsert_on(&tx, key, status)?;
        tx.commit()?;
        Ok(outcome)
    }

    fn mark_many(
        &mut self,
        keys: &[RecordKey],
        status: AttendanceStatus,
    ) -> anyhow::Result<Vec<MarkOutcome>> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            out.push(upsert_on(&tx, key, status)?);
        }
        tx.commit()?;
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Offline fallback

#[derive(Debug, Clone, PartialEq)]
pub enum FallbackStrategy {
    /// Store failures surface to the caller.
    None,
    /// Failed reads are answered from everything read successfully so far.
    LastGood,
    /// Failed reads are answered from a fixed snapshot.
    Fixture(Snapshot),
}

impl FallbackStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            FallbackStrategy::None => "none",
            FallbackStrategy::LastGood => "lastGood",
            FallbackStrategy::Fixture(_) => "fixture",
        }
    }
}

/// Rows seen by successful reads and writes, indexed for replacement.
#[derive(Debug, Default)]
struct ReadCache {
    snapshot: Snapshot,
    students: HashMap<StudentId, usize>,
    subjects: HashMap<SubjectId, usize>,
    records: HashMap<RecordKey, usize>,
}

/// Replaces rows already indexed under the same key, appends the rest.
fn absorb<T, K, F>(rows: &mut Vec<T>, index: &mut HashMap<K, usize>, incoming: &[T], key_of: F)
where
    T: Clone,
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    for row in incoming {
        match index.entry(key_of(row)) {
            Entry::Occupied(slot) => rows[*slot.get()] = row.clone(),
            Entry::Vacant(slot) => {
                slot.insert(rows.len());
                rows.push(row.clone());
            }
        }
    }
}

impl ReadCache {
    fn absorb_students(&mut self, rows: &[Student]) {
        absorb(&mut self.snapshot.students, &mut self.students, rows, |s| s.id.clone());
    }

    fn absorb_subjects(&mut self, rows: &[Subject]) {
        absorb(&mut self.snapshot.subjects, &mut self.subjects, rows, |s| s.id.clone());
    }

    fn absorb_records(&mut self, rows: &[AttendanceRecord]) {
        absorb(&mut self.snapshot.attendance, &mut self.records, rows, AttendanceRecord::key);
    }
}

pub struct FallbackStore<S> {
    inner: S,
    strategy: FallbackStrategy,
    cache: RefCell<ReadCache>,
}

impl<S: RecordStore> FallbackStore<S> {
    pub fn new(inner: S, strategy: FallbackStrategy) -> Self {
        Self {
            inner,
            strategy,
            cache: RefCell::new(ReadCache::default()),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn strategy(&self) -> &FallbackStrategy {
        &self.strategy
    }

    pub fn set_strategy(&mut self, strategy: FallbackStrategy) {
        info!(
            "event=fallback_strategy module=store status=ok strategy={}",
            strategy.name()
        );
        self.strategy = strategy;
    }

    fn remember<F>(&self, f: F)
    where
        F: FnOnce(&mut ReadCache),
    {
        if matches!(self.strategy, FallbackStrategy::LastGood) {
            f(&mut *self.cache.borrow_mut());
        }
    }

    fn recover<T, F>(&self, op: &str, error: anyhow::Error, read: F) -> anyhow::Result<T>
    where
        F: FnOnce(&Snapshot) -> anyhow::Result<T>,
    {
        match &self.strategy {
            FallbackStrategy::None => Err(error.context(format!("{} failed", op))),
            FallbackStrategy::LastGood => {
                warn!(
                    "event=store_read module=store status=fallback op={} source=last_good error={}",
                    op, error
                );
                read(&self.cache.borrow().snapshot)
            }
            FallbackStrategy::Fixture(snapshot) => {
                warn!(
                    "event=store_read module=store status=fallback op={} source=fixture error={}",
                    op, error
                );
                read(snapshot)
            }
        }
    }
}

impl<S: RecordStore> RecordStore for FallbackStore<S> {
    fn list_students(&self, scope: &SectionScope) -> anyhow::Result<Vec<Student>> {
        match self.inner.list_students(scope) {
            Ok(rows) => {
                self.remember(|c| c.absorb_students(&rows));
                Ok(rows)
            }
            Err(e) => self.recover("list_students", e, |snap| snap.list_students(scope)),
        }
    }

    fn list_subjects(&self, scope: &SectionScope) -> anyhow::Result<Vec<Subject>> {
        match self.inner.list_subjects(scope) {
            Ok(rows) => {
                self.remember(|c| c.absorb_subjects(&rows));
                Ok(rows)
            }
            Err(e) => self.recover("list_subjects", e, |snap| snap.list_subjects(scope)),
        }
    }

    fn list_attendance(&self, filter: &AttendanceFilter) -> anyhow::Result<Vec<AttendanceRecord>> {
        match self.inner.list_attendance(filter) {
            Ok(rows) => {
                self.remember(|c| c.absorb_records(&rows));
                Ok(rows)
            }
            Err(e) => self.recover("list_attendance", e, |snap| snap.list_attendance(filter)),
        }
    }

    fn upsert_attendance(
        &mut self,
        key: &RecordKey,
        status: AttendanceStatus,
    ) -> anyhow::Result<MarkOutcome> {
        let outcome = self.inner.upsert_attendance(key, status)?;
        self.remember(|c| c.absorb_records(std::slice::from_ref(outcome.record())));
        Ok(outcome)
    }

    fn mark_many(
        &mut self,
        keys: &[RecordKey],
        status: AttendanceStatus,
    ) -> anyhow::Result<Vec<MarkOutcome>> {
        let outcomes = self.inner.mark_many(keys, status)?;
        self.remember(|c| {
            let records: Vec<AttendanceRecord> =
                outcomes.iter().map(|o| o.record().clone()).collect();
            c.absorb_records(&records);
        });
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    /// Snapshot-backed store whose reads can be switched off.
    struct FlakyStore {
        data: Snapshot,
        down: Cell<bool>,
    }

    impl FlakyStore {
        fn check(&self) -> anyhow::Result<()> {
            if self.down.get() {
                anyhow::bail!("connection refused");
            }
            Ok(())
        }
    }

    impl RecordStore for FlakyStore {
        fn list_students(&self, scope: &SectionScope) -> anyhow::Result<Vec<Student>> {
            self.check()?;
            self.data.list_students(scope)
        }
        fn list_subjects(&self, scope: &SectionScope) -> anyhow::Result<Vec<Subject>> {
            self.check()?;
            self.data.list_subjects(scope)
        }
        fn list_attendance(
            &self,
            filter: &AttendanceFilter,
        ) -> anyhow::Result<Vec<AttendanceRecord>> {
            self.check()?;
            self.data.list_attendance(filter)
        }
        fn upsert_attendance(
            &mut self,
            key: &RecordKey,
            status: AttendanceStatus,
        ) -> anyhow::Result<MarkOutcome> {
            self.check()?;
            self.data.upsert_attendance(key, status)
        }
    }

    fn flaky(data: Snapshot) -> FlakyStore {
        FlakyStore {
            data,
            down: Cell::new(false),
        }
    }

    fn key(student: &str, subject: &str, day: u32, period: u32) -> RecordKey {
        RecordKey {
            student_id: StudentId::new(student),
            subject_id: SubjectId::new(subject),
            date: NaiveDate::from_ymd_opt(2025, 9, day).expect("date"),
            period,
        }
    }

    fn seeded_workspace() -> (tempfile::TempDir, SqliteStore, Student, Subject) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SqliteStore::open(dir.path()).expect("open store");
        let student = store
            .enroll_student(&NewStudent {
                name: "Saravana".into(),
                reg_no: "CSE1001".into(),
                department: "CSE".into(),
                section: "A".into(),
                semester: 5,
            })
            .expect("enroll");
        let subject = store
            .add_subject(&NewSubject {
                name: "Data Structures".into(),
                department: "CSE".into(),
                section: "A".into(),
            })
            .expect("subject");
        (dir, store, student, subject)
    }

    #[test]
    fn demo_snapshot_normalizes_numeric_ids() {
        let demo = Snapshot::demo().expect("demo");
        assert_eq!(demo.students.len(), 4);
        assert_eq!(demo.subjects.len(), 4);
        let for_one = demo
            .list_attendance(&AttendanceFilter::for_student(StudentId::new("1")))
            .expect("list");
        assert_eq!(for_one.len(), 2);
        let cse_a = demo
            .list_students(&SectionScope::new(Some("CSE".into()), Some("A".into())))
            .expect("list");
        assert_eq!(cse_a.len(), 2);
    }

    #[test]
    fn sqlite_upsert_keeps_one_row_per_key() {
        let (_dir, mut store, student, subject) = seeded_workspace();
        let k = RecordKey {
            student_id: student.id.clone(),
            subject_id: subject.id.clone(),
            date: NaiveDate::from_ymd_opt(2025, 1, 1).expect("date"),
            period: 1,
        };
        let first = store
            .upsert_attendance(&k, AttendanceStatus::Present)
            .expect("first mark");
        assert_eq!(first.kind(), "created");
        let second = store
            .upsert_attendance(&k, AttendanceStatus::Absent)
            .expect("second mark");
        assert_eq!(second.kind(), "updated");
        assert_eq!(second.record().id, first.record().id);
        let third = store
            .upsert_attendance(&k, AttendanceStatus::Absent)
            .expect("third mark");
        assert_eq!(third.kind(), "unchanged");

        let rows = store
            .list_attendance(&AttendanceFilter::default())
            .expect("list");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, AttendanceStatus::Absent);
    }

    #[test]
    fn sqlite_mark_many_is_one_transaction_per_batch() {
        let (_dir, mut store, student, subject) = seeded_workspace();
        let keys: Vec<RecordKey> = (1..=3)
            .map(|p| RecordKey {
                student_id: student.id.clone(),
                subject_id: subject.id.clone(),
                date: NaiveDate::from_ymd_opt(2025, 9, 1).expect("date"),
                period: p,
            })
            .collect();
        let out = store
            .mark_many(&keys, AttendanceStatus::OnDuty)
            .expect("bulk");
        assert!(out.iter().all(|o| o.kind() == "created"));
        let filter = AttendanceFilter {
            period: Some(2),
            ..AttendanceFilter::for_subject(subject.id.clone())
        };
        assert_eq!(store.list_attendance(&filter).expect("list").len(), 1);
    }

    #[test]
    fn sqlite_lists_follow_enrollment_order_and_scope() {
        let (_dir, store, first, _subject) = seeded_workspace();
        let second = store
            .enroll_student(&NewStudent {
                name: "Arun Kumar".into(),
                reg_no: "CSE1002".into(),
                department: "CSE".into(),
                section: "A".into(),
                semester: 5,
            })
            .expect("enroll");
        store
            .enroll_student(&NewStudent {
                name: "Alice Johnson".into(),
                reg_no: "ECE1001".into(),
                department: "ECE".into(),
                section: "B".into(),
                semester: 3,
            })
            .expect("enroll");
        let cse = store
            .list_students(&SectionScope::new(Some("CSE".into()), Some("A".into())))
            .expect("list");
        let ids: Vec<&StudentId> = cse.iter().map(|s| &s.id).collect();
        assert_eq!(ids, vec![&first.id, &second.id]);
        assert_eq!(
            store.list_students(&SectionScope::default()).expect("all").len(),
            3
        );
    }

    #[test]
    fn duplicate_reg_no_is_rejected() {
        let (_dir, store, _student, _subject) = seeded_workspace();
        let dup = store.enroll_student(&NewStudent {
            name: "Someone Else".into(),
            reg_no: "CSE1001".into(),
            department: "CSE".into(),
            section: "A".into(),
            semester: 5,
        });
        assert!(dup.is_err());
    }

    #[test]
    fn no_fallback_surfaces_the_error() {
        let store = FallbackStore::new(flaky(Snapshot::default()), FallbackStrategy::None);
        store.inner().down.set(true);
        assert!(store.list_students(&SectionScope::default()).is_err());
    }

    #[test]
    fn fixture_fallback_serves_fixed_snapshot() {
        let demo = Snapshot::demo().expect("demo");
        let store = FallbackStore::new(flaky(Snapshot::default()), FallbackStrategy::Fixture(demo));
        assert!(store
            .list_students(&SectionScope::default())
            .expect("live")
            .is_empty());
        store.inner().down.set(true);
        let offline = store
            .list_subjects(&SectionScope::new(Some("CSE".into()), None))
            .expect("fixture");
        assert_eq!(offline.len(), 2);
    }

    #[test]
    fn last_good_fallback_replays_cached_reads_with_filters() {
        let mut live = Snapshot::default();
        live.upsert_attendance(&key("1", "1", 1, 1), AttendanceStatus::Present)
            .expect("seed");
        live.upsert_attendance(&key("1", "2", 1, 2), AttendanceStatus::Absent)
            .expect("seed");
        live.upsert_attendance(&key("2", "1", 1, 1), AttendanceStatus::Absent)
            .expect("seed");
        let mut store = FallbackStore::new(flaky(live), FallbackStrategy::LastGood);

        let all = store
            .list_attendance(&AttendanceFilter::default())
            .expect("live read");
        assert_eq!(all.len(), 3);
        store
            .upsert_attendance(&key("1", "1", 1, 1), AttendanceStatus::OnDuty)
            .expect("live write");

        store.inner.down.set(true);
        let cached = store
            .list_attendance(&AttendanceFilter::for_student(StudentId::new("1")))
            .expect("cached read");
        assert_eq!(cached.len(), 2);
        let first = cached
            .iter()
            .find(|r| r.has_key(&key("1", "1", 1, 1)))
            .expect("cached row");
        assert_eq!(first.status, AttendanceStatus::OnDuty);

        // Writes never fall back.
        assert!(store
            .upsert_attendance(&key("1", "1", 2, 1), AttendanceStatus::Present)
            .is_err());
    }

    #[test]
    fn read_cache_replaces_rows_in_place() {
        let demo = Snapshot::demo().expect("demo");
        let mut cache = ReadCache::default();
        cache.absorb_students(&demo.students);
        cache.absorb_students(&demo.students);
        cache.absorb_subjects(&demo.subjects);
        cache.absorb_subjects(&demo.subjects[..1]);
        assert_eq!(cache.snapshot.students, demo.students);
        assert_eq!(cache.snapshot.subjects, demo.subjects);

        let mut live = Snapshot::default();
        live.upsert_attendance(&key("1", "1", 1, 1), AttendanceStatus::Present)
            .expect("seed");
        live.upsert_attendance(&key("1", "1", 1, 2), AttendanceStatus::Present)
            .expect("seed");
        cache.absorb_records(&live.attendance);
        live.upsert_attendance(&key("1", "1", 1, 1), AttendanceStatus::Absent)
            .expect("remark");
        cache.absorb_records(&live.attendance[..1]);

        assert_eq!(cache.snapshot.attendance.len(), 2);
        assert_eq!(cache.snapshot.attendance[0].status, AttendanceStatus::Absent);
        assert!(cache.snapshot.attendance[1].has_key(&key("1", "1", 1, 2)));
        assert_eq!(cache.records.len(), 2);
    }

    #[test]
    fn sqlite_upsert_waits_for_the_write_lock_before_reading() {
        let (dir, mut store, student, subject) = seeded_workspace();
        let k = RecordKey {
            student_id: student.id.clone(),
            subject_id: subject.id.clone(),
            date: NaiveDate::from_ymd_opt(2025, 9, 1).expect("date"),
            period: 1,
        };
        store
            .upsert_attendance(&k, AttendanceStatus::Present)
            .expect("seed");

        let other = Connection::open(dir.path().join(db::DB_FILE_NAME)).expect("second connection");
        other.execute_batch("BEGIN IMMEDIATE").expect("hold write lock");
        store
            .conn()
            .busy_timeout(std::time::Duration::ZERO)
            .expect("busy timeout");

        // Even an unchanged mark must not read while another writer holds the lock.
        assert!(store
            .upsert_attendance(&k, AttendanceStatus::Present)
            .is_err());
        assert!(store
            .mark_many(std::slice::from_ref(&k), AttendanceStatus::Present)
            .is_err());

        other.execute_batch("ROLLBACK").expect("release write lock");
        let outcome = store
            .upsert_attendance(&k, AttendanceStatus::Present)
            .expect("mark after release");
        assert_eq!(outcome.kind(), "unchanged");
    }
}
