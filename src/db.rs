use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DataAccessError, StoreResult};
use crate::models::{
    AttendanceRecord, AttendanceStatus, ScheduleInfo, ScheduleSlot, ServiceTime, StudentInfo,
};
use crate::store::AttendanceStore;

// A status-only re-mark keeps the note already on the record.
const UPSERT_RECORD: &str = r#"
    INSERT INTO sunday_attendance.attendance_records
    (id, student_id, schedule_id, status, notes)
    VALUES ($1, $2, $3, $4, $5)
    ON CONFLICT (student_id, schedule_id) DO UPDATE
    SET status = EXCLUDED.status,
        notes = COALESCE(EXCLUDED.notes, attendance_records.notes),
        updated_at = now()
    RETURNING id
    "#;

// An unknown visitor flag leaves an existing student's flag alone.
const UPSERT_STUDENT: &str = r#"
    INSERT INTO sunday_attendance.students (id, full_name, is_visitor)
    VALUES ($1, $2, COALESCE($3, FALSE))
    ON CONFLICT (full_name) DO UPDATE
    SET is_visitor = COALESCE($3, students.is_visitor)
    RETURNING id
    "#;

const RECORD_SELECT: &str = "SELECT ar.id, ar.student_id, ar.schedule_id, ar.status, ar.notes, \
     sc.lesson_date, sc.is_cancelled, st.full_name, st.is_visitor, \
     sv.id AS service_time_id, sv.label AS service_label, sv.starts_at \
     FROM sunday_attendance.attendance_records ar \
     LEFT JOIN sunday_attendance.schedules sc ON sc.id = ar.schedule_id \
     LEFT JOIN sunday_attendance.students st ON st.id = ar.student_id \
     LEFT JOIN sunday_attendance.service_times sv ON sv.id = sc.service_time_id";

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn record_from_row(row: &PgRow) -> StoreResult<AttendanceRecord> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<AttendanceStatus>()
        .map_err(|err| DataAccessError::Corrupt(err.to_string()))?;

    let schedule = match row.try_get::<Option<NaiveDate>, _>("lesson_date")? {
        Some(date) => Some(ScheduleInfo {
            date,
            is_cancelled: row
                .try_get::<Option<bool>, _>("is_cancelled")?
                .unwrap_or(false),
        }),
        None => None,
    };

    let student = match row.try_get::<Option<String>, _>("full_name")? {
        Some(full_name) => Some(StudentInfo {
            full_name,
            is_visitor: row.try_get::<Option<bool>, _>("is_visitor")?.unwrap_or(false),
        }),
        None => None,
    };

    let service_time = match (
        row.try_get::<Option<Uuid>, _>("service_time_id")?,
        row.try_get::<Option<String>, _>("service_label")?,
        row.try_get::<Option<NaiveTime>, _>("starts_at")?,
    ) {
        (Some(id), Some(label), Some(starts_at)) => Some(ServiceTime {
            id,
            label,
            starts_at,
        }),
        _ => None,
    };

    Ok(AttendanceRecord {
        id: row.try_get("id")?,
        student_id: row.try_get("student_id")?,
        schedule_id: row.try_get("schedule_id")?,
        status,
        notes: row.try_get("notes")?,
        service_time,
        schedule,
        student,
    })
}

#[derive(Clone)]
pub struct PgAttendanceStore {
    pool: PgPool,
}

impl PgAttendanceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_where(&self, clause: &str, id: Uuid) -> StoreResult<Vec<AttendanceRecord>> {
        let query = format!("{RECORD_SELECT} WHERE {clause} = $1");
        let rows = sqlx::query(&query).bind(id).fetch_all(&self.pool).await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn fetch_record(&self, record_id: Uuid) -> StoreResult<AttendanceRecord> {
        self.fetch_where("ar.id", record_id)
            .await?
            .into_iter()
            .next()
            .ok_or(DataAccessError::NotFound(record_id))
    }

    /// Every record belonging to one of `schedule_ids`.
    pub async fn fetch_records_for_schedules(
        &self,
        schedule_ids: &[Uuid],
    ) -> StoreResult<Vec<AttendanceRecord>> {
        let query = format!("{RECORD_SELECT} WHERE ar.schedule_id = ANY($1)");
        let rows = sqlx::query(&query)
            .bind(schedule_ids)
            .fetch_all(&self.pool)
            .await?;
        debug!(schedules = schedule_ids.len(), rows = rows.len(), "fetched roster records");
        rows.iter().map(record_from_row).collect()
    }

    /// Most recent non-cancelled schedules, newest first.
    pub async fn fetch_recent_schedules(&self, limit: usize) -> StoreResult<Vec<ScheduleSlot>> {
        let rows = sqlx::query(
            r#"
            SELECT sc.id, sc.lesson_date, sc.is_cancelled, sv.starts_at
            FROM sunday_attendance.schedules sc
            LEFT JOIN sunday_attendance.service_times sv ON sv.id = sc.service_time_id
            WHERE NOT sc.is_cancelled
            ORDER BY sc.lesson_date DESC, sv.starts_at DESC NULLS LAST
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut schedules = Vec::with_capacity(rows.len());
        for row in rows {
            schedules.push(ScheduleSlot {
                id: row.try_get("id")?,
                date: row.try_get("lesson_date")?,
                starts_at: row.try_get("starts_at")?,
                is_cancelled: row.try_get("is_cancelled")?,
            });
        }

        Ok(schedules)
    }

    pub async fn fetch_student_name(&self, student_id: Uuid) -> StoreResult<Option<String>> {
        let row = sqlx::query("SELECT full_name FROM sunday_attendance.students WHERE id = $1")
            .bind(student_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(row) => Some(row.try_get("full_name")?),
            None => None,
        })
    }
}

#[async_trait]
impl AttendanceStore for PgAttendanceStore {
    async fn fetch_records_for_student(
        &self,
        student_id: Uuid,
    ) -> StoreResult<Vec<AttendanceRecord>> {
        let records = self.fetch_where("ar.student_id", student_id).await?;
        debug!(%student_id, count = records.len(), "fetched student records");
        Ok(records)
    }

    async fn fetch_records_for_schedule(
        &self,
        schedule_id: Uuid,
    ) -> StoreResult<Vec<AttendanceRecord>> {
        let records = self.fetch_where("ar.schedule_id", schedule_id).await?;
        debug!(%schedule_id, count = records.len(), "fetched schedule records");
        Ok(records)
    }

    async fn upsert_record(
        &self,
        student_id: Uuid,
        schedule_id: Uuid,
        status: AttendanceStatus,
        notes: Option<&str>,
    ) -> StoreResult<AttendanceRecord> {
        let record_id: Uuid = sqlx::query(UPSERT_RECORD)
            .bind(Uuid::new_v4())
            .bind(student_id)
            .bind(schedule_id)
            .bind(status.as_str())
            .bind(notes)
            .fetch_one(&self.pool)
            .await?
            .try_get("id")?;

        info!(%record_id, %student_id, %schedule_id, %status, "attendance recorded");
        self.fetch_record(record_id).await
    }

    async fn delete_record(&self, record_id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM sunday_attendance.attendance_records WHERE id = $1")
            .bind(record_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DataAccessError::NotFound(record_id));
        }

        info!(%record_id, "attendance record deleted");
        Ok(())
    }
}

async fn upsert_service_time(
    pool: &PgPool,
    label: &str,
    starts_at: NaiveTime,
) -> anyhow::Result<Uuid> {
    let id = sqlx::query(
        r#"
        INSERT INTO sunday_attendance.service_times (id, label, starts_at)
        VALUES ($1, $2, $3)
        ON CONFLICT (label) DO UPDATE SET starts_at = EXCLUDED.starts_at
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(label)
    .bind(starts_at)
    .fetch_one(pool)
    .await?
    .get("id");
    Ok(id)
}

async fn upsert_student(
    pool: &PgPool,
    full_name: &str,
    is_visitor: Option<bool>,
) -> anyhow::Result<Uuid> {
    let id: Uuid = sqlx::query(UPSERT_STUDENT)
        .bind(Uuid::new_v4())
        .bind(full_name)
        .bind(is_visitor)
        .fetch_one(pool)
        .await?
        .try_get("id")?;
    Ok(id)
}

async fn upsert_schedule(
    pool: &PgPool,
    lesson_date: NaiveDate,
    service_time_id: Option<Uuid>,
) -> anyhow::Result<Uuid> {
    let existing = sqlx::query(
        r#"
        SELECT id FROM sunday_attendance.schedules
        WHERE lesson_date = $1 AND service_time_id IS NOT DISTINCT FROM $2
        "#,
    )
    .bind(lesson_date)
    .bind(service_time_id)
    .fetch_optional(pool)
    .await?;

    if let Some(row) = existing {
        return Ok(row.get("id"));
    }

    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO sunday_attendance.schedules (id, lesson_date, service_time_id)
        VALUES ($1, $2, $3)
        "#,
    )
    .bind(id)
    .bind(lesson_date)
    .bind(service_time_id)
    .execute(pool)
    .await?;
    Ok(id)
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    use crate::models::AttendanceStatus::{Absent, Excused, Late, Present};

    let nine = upsert_service_time(
        pool,
        "9h",
        NaiveTime::from_hms_opt(9, 0, 0).context("invalid time")?,
    )
    .await?;
    let eleven = upsert_service_time(
        pool,
        "11h",
        NaiveTime::from_hms_opt(11, 0, 0).context("invalid time")?,
    )
    .await?;

    let ana = upsert_student(pool, "Ana Souza", Some(false)).await?;
    let bruno = upsert_student(pool, "Bruno Lima", Some(false)).await?;
    let carla = upsert_student(pool, "Carla Mendes", Some(false)).await?;
    let rafael = upsert_student(pool, "Rafael Costa", Some(true)).await?;

    let sundays = [
        NaiveDate::from_ymd_opt(2026, 2, 1).context("invalid date")?,
        NaiveDate::from_ymd_opt(2026, 2, 8).context("invalid date")?,
        NaiveDate::from_ymd_opt(2026, 2, 15).context("invalid date")?,
        NaiveDate::from_ymd_opt(2026, 2, 22).context("invalid date")?,
    ];

    let marks: Vec<(Uuid, usize, Uuid, AttendanceStatus, Option<&str>)> = vec![
        (ana, 0, nine, Present, None),
        (ana, 1, nine, Present, None),
        (ana, 1, eleven, Late, Some("Helped with the younger class")),
        (ana, 2, nine, Excused, Some("Family trip")),
        (ana, 3, eleven, Present, None),
        (bruno, 0, nine, Present, None),
        (bruno, 1, nine, Absent, None),
        (bruno, 2, nine, Absent, None),
        (bruno, 3, nine, Absent, None),
        (carla, 0, eleven, Absent, None),
        (carla, 1, eleven, Excused, Some("Sick")),
        (carla, 2, eleven, Present, None),
        (carla, 3, eleven, Absent, None),
        (rafael, 3, nine, Present, Some("Came with Ana")),
    ];

    let store = PgAttendanceStore::new(pool.clone());
    for (student_id, sunday, service_time_id, status, notes) in marks {
        let schedule_id = upsert_schedule(pool, sundays[sunday], Some(service_time_id)).await?;
        store
            .upsert_record(student_id, schedule_id, status, notes)
            .await?;
    }

    Ok(())
}

#[derive(Debug, serde::Deserialize)]
struct CsvRow {
    full_name: String,
    /// Blank means "keep whatever the roster already says".
    is_visitor: Option<bool>,
    lesson_date: NaiveDate,
    service_time: Option<String>,
    status: String,
    notes: Option<String>,
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    let store = PgAttendanceStore::new(pool.clone());
    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut written = 0usize;

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result?;
        let status: AttendanceStatus = row
            .status
            .parse()
            .with_context(|| format!("row {}", line + 1))?;

        let service_time_id = match row.service_time.as_deref().map(str::trim) {
            Some(label) if !label.is_empty() => {
                let found = sqlx::query(
                    "SELECT id FROM sunday_attendance.service_times WHERE label = $1",
                )
                .bind(label)
                .fetch_optional(pool)
                .await?
                .ok_or_else(|| anyhow!("row {}: unknown service time '{}'", line + 1, label))?;
                let id: Uuid = found.try_get("id")?;
                Some(id)
            }
            _ => None,
        };

        let student_id = upsert_student(pool, &row.full_name, row.is_visitor).await?;
        let schedule_id = upsert_schedule(pool, row.lesson_date, service_time_id).await?;
        let notes = row.notes.as_deref().filter(|note| !note.trim().is_empty());

        store
            .upsert_record(student_id, schedule_id, status, notes)
            .await?;
        written += 1;
    }

    Ok(written)
}
