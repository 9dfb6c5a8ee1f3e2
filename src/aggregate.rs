use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use uuid::Uuid;

use crate::config::AggregatorConfig;
use crate::models::{
    AbsenceAlert, AttendanceRecord, AttendanceStats, AttendanceStatus, ScheduleSlot,
    SundayAttendanceRecord, SundayStats,
};

/// Collapses one student's records for a single date into one status.
///
/// Any attended service wins. Without attendance, excused beats absent. An
/// empty slice is treated as absent; `late` is never returned.
pub fn merge_status(records: &[AttendanceRecord]) -> AttendanceStatus {
    if records.is_empty() {
        return AttendanceStatus::Absent;
    }

    if records.iter().any(|record| record.status.attended()) {
        return AttendanceStatus::Present;
    }

    if records
        .iter()
        .all(|record| record.status == AttendanceStatus::Absent)
    {
        return AttendanceStatus::Absent;
    }

    AttendanceStatus::Excused
}

fn by_service_time(a: &AttendanceRecord, b: &AttendanceRecord) -> Ordering {
    a.service_starts_at().cmp(&b.service_starts_at())
}

/// Ids of the services actually attended (present or late), earliest first.
/// Records without a service time fall back to the configured default
/// service and contribute nothing when there is none.
pub fn attended_service_times(
    records: &[AttendanceRecord],
    config: &AggregatorConfig,
) -> Vec<Uuid> {
    let mut ordered: Vec<&AttendanceRecord> = records.iter().collect();
    ordered.sort_by(|a, b| by_service_time(a, b));

    let mut ids = Vec::new();
    for record in ordered {
        if !record.status.attended() {
            continue;
        }

        let id = record
            .service_time
            .as_ref()
            .map(|service| service.id)
            .or(config.default_service_time_id);

        if let Some(id) = id {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }

    ids
}

fn partition_by_date(records: &[AttendanceRecord]) -> BTreeMap<NaiveDate, Vec<AttendanceRecord>> {
    let mut buckets: BTreeMap<NaiveDate, Vec<AttendanceRecord>> = BTreeMap::new();

    for record in records {
        // Records whose schedule did not come back with a date are skipped.
        let Some(date) = record.date() else {
            continue;
        };
        buckets.entry(date).or_default().push(record.clone());
    }

    buckets
}

fn build_sunday(
    date: NaiveDate,
    mut records: Vec<AttendanceRecord>,
    config: &AggregatorConfig,
) -> SundayAttendanceRecord {
    records.sort_by(by_service_time);

    let notes = records
        .iter()
        .filter_map(|record| record.notes.as_ref())
        .find(|note| !note.trim().is_empty())
        .cloned();

    SundayAttendanceRecord {
        date,
        status: merge_status(&records),
        service_times_attended: attended_service_times(&records, config),
        notes,
        source_records: records,
    }
}

/// One merged record per distinct date, most recent first.
pub fn group_by_date(
    records: &[AttendanceRecord],
    config: &AggregatorConfig,
) -> Vec<SundayAttendanceRecord> {
    partition_by_date(records)
        .into_iter()
        .rev()
        .map(|(date, bucket)| build_sunday(date, bucket, config))
        .collect()
}

/// Same as [`group_by_date`] in chronological order.
pub fn group_by_date_ascending(
    records: &[AttendanceRecord],
    config: &AggregatorConfig,
) -> Vec<SundayAttendanceRecord> {
    partition_by_date(records)
        .into_iter()
        .map(|(date, bucket)| build_sunday(date, bucket, config))
        .collect()
}

/// Per-service counts over raw records. Visitor records only feed
/// `visitors`, whatever their status.
pub fn compute_stats(records: &[AttendanceRecord]) -> AttendanceStats {
    let mut stats = AttendanceStats {
        total: records.len(),
        ..AttendanceStats::default()
    };

    for record in records {
        if record.is_visitor() {
            stats.visitors += 1;
            continue;
        }

        match record.status {
            AttendanceStatus::Present => stats.present += 1,
            AttendanceStatus::Absent => stats.absent += 1,
            AttendanceStatus::Late => stats.late += 1,
            AttendanceStatus::Excused => stats.excused += 1,
        }
    }

    stats.total_present = stats.present + stats.late + stats.excused + stats.visitors;
    stats
}

/// Counts over merged Sunday records with an attendance rate in percent.
pub fn compute_sunday_stats(records: &[SundayAttendanceRecord]) -> SundayStats {
    let mut stats = SundayStats {
        total: records.len(),
        ..SundayStats::default()
    };

    for record in records {
        match record.status {
            AttendanceStatus::Present | AttendanceStatus::Late => stats.present += 1,
            AttendanceStatus::Absent => stats.absent += 1,
            AttendanceStatus::Excused => stats.excused += 1,
        }
    }

    stats.attendance_rate = if stats.total == 0 {
        0
    } else {
        ((stats.present + stats.excused) as f64 * 100.0 / stats.total as f64).round() as u32
    };

    stats
}

/// Leading merged absences of a newest-first timeline. The ordering is the
/// caller's responsibility and is not checked.
pub fn consecutive_absences(records_newest_first: &[SundayAttendanceRecord]) -> usize {
    records_newest_first
        .iter()
        .take_while(|record| record.status == AttendanceStatus::Absent)
        .count()
}

pub fn has_absence_alert(consecutive: usize, config: &AggregatorConfig) -> bool {
    consecutive >= config.absence_threshold
}

fn window_order(schedules: &[ScheduleSlot], window: usize) -> HashMap<Uuid, usize> {
    let mut active: Vec<&ScheduleSlot> = schedules
        .iter()
        .filter(|schedule| !schedule.is_cancelled)
        .collect();
    active.sort_by(|a, b| (b.date, b.starts_at).cmp(&(a.date, a.starts_at)));
    active.truncate(window);

    // Position 0 is the oldest schedule in the window.
    active
        .iter()
        .rev()
        .enumerate()
        .map(|(position, schedule)| (schedule.id, position))
        .collect()
}

/// Roster-wide streaks over raw per-service records.
///
/// Only the `alert_window` most recent non-cancelled schedules are scanned.
/// Each student's records are walked oldest to newest: an absence extends
/// the streak and any other status resets it. Visitors are not reported and
/// schedules a student has no record for are skipped.
pub fn roster_absence_alerts(
    records: &[AttendanceRecord],
    schedules: &[ScheduleSlot],
    config: &AggregatorConfig,
) -> Vec<AbsenceAlert> {
    let order = window_order(schedules, config.alert_window);
    let dates: HashMap<Uuid, NaiveDate> = schedules
        .iter()
        .map(|schedule| (schedule.id, schedule.date))
        .collect();

    let mut by_student: HashMap<Uuid, Vec<(usize, &AttendanceRecord)>> = HashMap::new();
    for record in records {
        if record.is_visitor() {
            continue;
        }
        let Some(position) = order.get(&record.schedule_id) else {
            continue;
        };
        by_student
            .entry(record.student_id)
            .or_default()
            .push((*position, record));
    }

    let mut alerts = Vec::new();
    for (student_id, mut entries) in by_student {
        entries.sort_by_key(|(position, _)| *position);

        let mut streak = 0usize;
        let mut last_attended = None;
        for (_, record) in entries.iter() {
            if record.status == AttendanceStatus::Absent {
                streak += 1;
                continue;
            }

            streak = 0;
            if record.status.attended() {
                last_attended = dates.get(&record.schedule_id).copied();
            }
        }

        if !has_absence_alert(streak, config) {
            continue;
        }

        let student_name = entries
            .iter()
            .find_map(|(_, record)| record.student.as_ref())
            .map(|student| student.full_name.clone())
            .unwrap_or_else(|| student_id.to_string());

        alerts.push(AbsenceAlert {
            student_id,
            student_name,
            consecutive_absences: streak,
            last_attended,
        });
    }

    alerts.sort_by(|a, b| {
        b.consecutive_absences
            .cmp(&a.consecutive_absences)
            .then_with(|| a.student_name.cmp(&b.student_name))
    });
    alerts
}
