use std::fmt::Write;

use uuid::Uuid;

use crate::aggregate;
use crate::config::AggregatorConfig;
use crate::models::{AbsenceAlert, AttendanceRecord, SundayAttendanceRecord};

fn service_labels(sunday: &SundayAttendanceRecord, config: &AggregatorConfig) -> String {
    let labels: Vec<String> = sunday
        .service_times_attended
        .iter()
        .map(|id| label_for(*id, &sunday.source_records, config))
        .collect();

    if labels.is_empty() {
        "-".to_string()
    } else {
        labels.join(", ")
    }
}

fn label_for(id: Uuid, records: &[AttendanceRecord], config: &AggregatorConfig) -> String {
    records
        .iter()
        .filter_map(|record| record.service_time.as_ref())
        .find(|service| service.id == id)
        .map(|service| service.label.clone())
        .unwrap_or_else(|| {
            if config.default_service_time_id == Some(id) {
                "default service".to_string()
            } else {
                id.to_string()
            }
        })
}

pub fn build_student_report(
    student_name: &str,
    records: &[AttendanceRecord],
    config: &AggregatorConfig,
) -> String {
    let timeline = aggregate::group_by_date(records, config);
    let sunday_stats = aggregate::compute_sunday_stats(&timeline);
    let raw_stats = aggregate::compute_stats(records);
    let streak = aggregate::consecutive_absences(&timeline);

    let mut output = String::new();

    let _ = writeln!(output, "# Attendance Report: {}", student_name);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Summary");
    let _ = writeln!(
        output,
        "- Sundays: {} ({} present, {} excused, {} absent)",
        sunday_stats.total, sunday_stats.present, sunday_stats.excused, sunday_stats.absent
    );
    let _ = writeln!(output, "- Attendance rate: {}%", sunday_stats.attendance_rate);
    let _ = writeln!(
        output,
        "- Service records: {} ({} present, {} late, {} excused, {} absent)",
        raw_stats.total, raw_stats.present, raw_stats.late, raw_stats.excused, raw_stats.absent
    );

    if aggregate::has_absence_alert(streak, config) {
        let _ = writeln!(
            output,
            "- **Absence alert:** {} consecutive Sundays missed",
            streak
        );
    } else {
        let _ = writeln!(output, "- Consecutive absences: {}", streak);
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Sundays");

    if timeline.is_empty() {
        let _ = writeln!(output, "No attendance recorded.");
    } else {
        for sunday in timeline.iter() {
            let _ = write!(
                output,
                "- {}: {} (services: {})",
                sunday.date,
                sunday.status,
                service_labels(sunday, config)
            );
            match sunday.notes.as_deref() {
                Some(note) => {
                    let _ = writeln!(output, " - {}", note);
                }
                None => {
                    let _ = writeln!(output);
                }
            }
        }
    }

    output
}

pub fn build_roster_report(alerts: &[AbsenceAlert], config: &AggregatorConfig) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Absence Alerts");
    let _ = writeln!(
        output,
        "Students with {} or more consecutive absences in the last {} lessons",
        config.absence_threshold, config.alert_window
    );
    let _ = writeln!(output);

    if alerts.is_empty() {
        let _ = writeln!(output, "No students above the threshold.");
        return output;
    }

    for alert in alerts {
        let last_seen = alert
            .last_attended
            .map(|date| date.to_string())
            .unwrap_or_else(|| "not in window".to_string());
        let _ = writeln!(
            output,
            "- {}: {} absences (last attended {})",
            alert.student_name, alert.consecutive_absences, last_seen
        );
    }

    output
}
