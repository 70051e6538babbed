use crate::model::{AttendanceRecord, AttendanceStatus, RecordId, RecordKey};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum MarkOutcome {
    Created {
        record: AttendanceRecord,
    },
    #[serde(rename_all = "camelCase")]
    Updated {
        record: AttendanceRecord,
        previous_status: AttendanceStatus,
    },
    Unchanged {
        record: AttendanceRecord,
    },
}

impl MarkOutcome {
    pub fn record(&self) -> &AttendanceRecord {
        match self {
            MarkOutcome::Created { record }
            | MarkOutcome::Updated { record, .. }
            | MarkOutcome::Unchanged { record } => record,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            MarkOutcome::Created { .. } => "created",
            MarkOutcome::Updated { .. } => "updated",
            MarkOutcome::Unchanged { .. } => "unchanged",
        }
    }
}

/// Resolves a mark against the record set. An existing record for the key
/// keeps its id and takes the new status; otherwise a record is appended
/// with an id from `next_id`.
pub fn apply_mark<F>(
    records: &mut Vec<AttendanceRecord>,
    key: &RecordKey,
    status: AttendanceStatus,
    next_id: F,
) -> MarkOutcome
where
    F: FnOnce() -> RecordId,
{
    if let Some(existing) = records.iter_mut().find(|r| r.has_key(key)) {
        if existing.status == status {
            return MarkOutcome::Unchanged {
                record: existing.clone(),
            };
        }
        let previous_status = existing.status;
        existing.status = status;
        return MarkOutcome::Updated {
            record: existing.clone(),
            previous_status,
        };
    }

    let record = AttendanceRecord {
        id: next_id(),
        student_id: key.student_id.clone(),
        subject_id: key.subject_id.clone(),
        date: key.date,
        period: key.period,
        status,
    };
    records.push(record.clone());
    MarkOutcome::Created { record }
}
