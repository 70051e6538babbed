use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Identifier as it arrives on the wire. Older front-ends send numeric ids,
/// newer ones send strings; both collapse to one canonical string here.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Int(i64),
    Text(String),
}

impl RawId {
    fn into_canonical(self) -> String {
        match self {
            RawId::Int(n) => n.to_string(),
            RawId::Text(s) => s.trim().to_string(),
        }
    }
}

macro_rules! canonical_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into().trim().to_string())
            }

            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            /// Reads an id from a request param. Blank strings and other JSON
            /// types are treated as absent.
            #[allow(dead_code)]
            pub fn from_param(v: Option<&serde_json::Value>) -> Option<Self> {
                let raw = serde_json::from_value::<RawId>(v?.clone()).ok()?;
                let id = raw.into_canonical();
                if id.is_empty() {
                    None
                } else {
                    Some(Self(id))
                }
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                RawId::deserialize(deserializer).map(|raw| Self(raw.into_canonical()))
            }
        }
    };
}

canonical_id!(StudentId);
canonical_id!(SubjectId);
canonical_id!(RecordId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    OnDuty,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::OnDuty => "onDuty",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "present" => Some(AttendanceStatus::Present),
            "absent" => Some(AttendanceStatus::Absent),
            "onduty" | "on_duty" | "od" => Some(AttendanceStatus::OnDuty),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: StudentId,
    pub name: String,
    pub reg_no: String,
    pub department: String,
    pub section: String,
    #[serde(default)]
    pub semester: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: SubjectId,
    pub name: String,
    pub department: String,
    pub section: String,
}

/// Natural key of an attendance mark. At most one record exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordKey {
    pub student_id: StudentId,
    pub subject_id: SubjectId,
    pub date: NaiveDate,
    pub period: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: RecordId,
    pub student_id: StudentId,
    pub subject_id: SubjectId,
    pub date: NaiveDate,
    pub period: u32,
    pub status: AttendanceStatus,
}

impl AttendanceRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            student_id: self.student_id.clone(),
            subject_id: self.subject_id.clone(),
            date: self.date,
            period: self.period,
        }
    }

    pub fn has_key(&self, key: &RecordKey) -> bool {
        self.student_id == key.student_id
            && self.subject_id == key.subject_id
            && self.date == key.date
            && self.period == key.period
    }
}

/// Department/section scope for roster queries. `None` matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionScope {
    pub department: Option<String>,
    pub section: Option<String>,
}

impl SectionScope {
    pub fn new(department: Option<String>, section: Option<String>) -> Self {
        let clean = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        Self {
            department: clean(department),
            section: clean(section),
        }
    }

    pub fn matches(&self, department: &str, section: &str) -> bool {
        self.department.as_deref().map_or(true, |d| d == department)
            && self.section.as_deref().map_or(true, |s| s == section)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttendanceFilter {
    pub student_id: Option<StudentId>,
    pub subject_id: Option<SubjectId>,
    pub date: Option<NaiveDate>,
    pub period: Option<u32>,
}

impl AttendanceFilter {
    pub fn for_student(student_id: StudentId) -> Self {
        Self {
            student_id: Some(student_id),
            ..Self::default()
        }
    }

    pub fn for_subject(subject_id: SubjectId) -> Self {
        Self {
            subject_id: Some(subject_id),
            ..Self::default()
        }
    }

    pub fn matches(&self, r: &AttendanceRecord) -> bool {
        self.student_id.as_ref().map_or(true, |id| *id == r.student_id)
            && self.subject_id.as_ref().map_or(true, |id| *id == r.subject_id)
            && self.date.map_or(true, |d| d == r.date)
            && self.period.map_or(true, |p| p == r.period)
    }
}
