use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Excused,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Excused => "excused",
        }
    }

    /// Present and late both mean the student was in the room.
    pub fn attended(&self) -> bool {
        matches!(self, AttendanceStatus::Present | AttendanceStatus::Late)
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown attendance status '{}'", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for AttendanceStatus {
    type Err = UnknownStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "present" => Ok(AttendanceStatus::Present),
            "absent" => Ok(AttendanceStatus::Absent),
            "late" => Ok(AttendanceStatus::Late),
            "excused" => Ok(AttendanceStatus::Excused),
            _ => Err(UnknownStatus(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceTime {
    pub id: Uuid,
    pub label: String,
    pub starts_at: NaiveTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleInfo {
    pub date: NaiveDate,
    pub is_cancelled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StudentInfo {
    pub full_name: String,
    pub is_visitor: bool,
}

/// One student's status for one (date, service time) lesson.
///
/// The relations are optional because callers do not always join them.
/// Grouping needs `schedule`, visitor counting needs `student`, and service
/// ordering needs `service_time`; a missing relation degrades to "no date",
/// "not a visitor" and "default service" respectively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceRecord {
    pub id: Uuid,
    pub student_id: Uuid,
    pub schedule_id: Uuid,
    pub status: AttendanceStatus,
    pub notes: Option<String>,
    pub service_time: Option<ServiceTime>,
    pub schedule: Option<ScheduleInfo>,
    pub student: Option<StudentInfo>,
}

impl AttendanceRecord {
    pub fn date(&self) -> Option<NaiveDate> {
        self.schedule.as_ref().map(|schedule| schedule.date)
    }

    pub fn is_visitor(&self) -> bool {
        self.student
            .as_ref()
            .map(|student| student.is_visitor)
            .unwrap_or(false)
    }

    pub fn service_starts_at(&self) -> Option<NaiveTime> {
        self.service_time.as_ref().map(|service| service.starts_at)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SundayAttendanceRecord {
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub service_times_attended: Vec<Uuid>,
    pub notes: Option<String>,
    pub source_records: Vec<AttendanceRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AttendanceStats {
    pub present: usize,
    pub absent: usize,
    pub late: usize,
    pub excused: usize,
    pub visitors: usize,
    pub total: usize,
    pub total_present: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SundayStats {
    pub total: usize,
    pub present: usize,
    pub absent: usize,
    pub excused: usize,
    pub attendance_rate: u32,
}

/// A lesson instance as seen by the roster-wide alert scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleSlot {
    pub id: Uuid,
    pub date: NaiveDate,
    pub starts_at: Option<NaiveTime>,
    pub is_cancelled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AbsenceAlert {
    pub student_id: Uuid,
    pub student_name: String,
    pub consecutive_absences: usize,
    pub last_attended: Option<NaiveDate>,
}
