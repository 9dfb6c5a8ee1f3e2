use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::models::{AttendanceRecord, AttendanceStatus};

/// CRUD surface the aggregator is fed from.
///
/// Records come back with their `schedule`, `student` and `service_time`
/// relations populated when the backend has them.
#[async_trait]
pub trait AttendanceStore: Send + Sync {
    async fn fetch_records_for_student(&self, student_id: Uuid)
        -> StoreResult<Vec<AttendanceRecord>>;

    async fn fetch_records_for_schedule(
        &self,
        schedule_id: Uuid,
    ) -> StoreResult<Vec<AttendanceRecord>>;

    /// Insert or update the record keyed on `(student_id, schedule_id)`.
    async fn upsert_record(
        &self,
        student_id: Uuid,
        schedule_id: Uuid,
        status: AttendanceStatus,
        notes: Option<&str>,
    ) -> StoreResult<AttendanceRecord>;

    async fn delete_record(&self, record_id: Uuid) -> StoreResult<()>;
}

#[cfg(test)]
pub mod memory {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use super::*;

    use crate::error::DataAccessError;
    use crate::models::{ScheduleInfo, ServiceTime, StudentInfo};

    /// In-process store used by tests. `fail_writes` and `fail_fetches` make
    /// the matching calls fail with distinct backend errors.
    #[derive(Default)]
    pub struct MemoryStore {
        records: Mutex<Vec<AttendanceRecord>>,
        schedules: Mutex<Vec<(Uuid, ScheduleInfo, Option<ServiceTime>)>>,
        students: Mutex<Vec<(Uuid, StudentInfo)>>,
        fail_writes: AtomicBool,
        fail_fetches: AtomicBool,
    }

    impl MemoryStore {
        pub fn add_schedule(&self, id: Uuid, info: ScheduleInfo, service: Option<ServiceTime>) {
            self.schedules.lock().unwrap().push((id, info, service));
        }

        pub fn add_student(&self, id: Uuid, info: StudentInfo) {
            self.students.lock().unwrap().push((id, info));
        }

        pub fn set_fail_writes(&self, fail: bool) {
            self.fail_writes.store(fail, Ordering::SeqCst);
        }

        pub fn set_fail_fetches(&self, fail: bool) {
            self.fail_fetches.store(fail, Ordering::SeqCst);
        }

        pub fn len(&self) -> usize {
            self.records.lock().unwrap().len()
        }

        fn check_writable(&self) -> StoreResult<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(DataAccessError::Backend(sqlx::Error::PoolTimedOut));
            }
            Ok(())
        }

        fn check_readable(&self) -> StoreResult<()> {
            if self.fail_fetches.load(Ordering::SeqCst) {
                return Err(DataAccessError::Backend(sqlx::Error::PoolClosed));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl AttendanceStore for MemoryStore {
        async fn fetch_records_for_student(
            &self,
            student_id: Uuid,
        ) -> StoreResult<Vec<AttendanceRecord>> {
            self.check_readable()?;
            Ok(self
                .records
                .lock()
                .unwrap()
                .iter()
                .filter(|record| record.student_id == student_id)
                .cloned()
                .collect())
        }

        async fn fetch_records_for_schedule(
            &self,
            schedule_id: Uuid,
        ) -> StoreResult<Vec<AttendanceRecord>> {
            self.check_readable()?;
            Ok(self
                .records
                .lock()
                .unwrap()
                .iter()
                .filter(|record| record.schedule_id == schedule_id)
                .cloned()
                .collect())
        }

        async fn upsert_record(
            &self,
            student_id: Uuid,
            schedule_id: Uuid,
            status: AttendanceStatus,
            notes: Option<&str>,
        ) -> StoreResult<AttendanceRecord> {
            self.check_writable()?;

            let mut records = self.records.lock().unwrap();
            if let Some(existing) = records
                .iter_mut()
                .find(|record| record.student_id == student_id && record.schedule_id == schedule_id)
            {
                existing.status = status;
                if let Some(notes) = notes {
                    existing.notes = Some(notes.to_string());
                }
                return Ok(existing.clone());
            }

            let schedule = self
                .schedules
                .lock()
                .unwrap()
                .iter()
                .find(|(id, _, _)| *id == schedule_id)
                .cloned();
            let student = self
                .students
                .lock()
                .unwrap()
                .iter()
                .find(|(id, _)| *id == student_id)
                .map(|(_, info)| info.clone());

            let record = AttendanceRecord {
                id: Uuid::new_v4(),
                student_id,
                schedule_id,
                status,
                notes: notes.map(str::to_string),
                service_time: schedule.as_ref().and_then(|(_, _, service)| service.clone()),
                schedule: schedule.map(|(_, info, _)| info),
                student,
            };
            records.push(record.clone());
            Ok(record)
        }

        async fn delete_record(&self, record_id: Uuid) -> StoreResult<()> {
            self.check_writable()?;

            let mut records = self.records.lock().unwrap();
            let before = records.len();
            records.retain(|record| record.id != record_id);
            if records.len() == before {
                return Err(DataAccessError::NotFound(record_id));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent_on_student_and_schedule() {
        let store = MemoryStore::default();
        let student = Uuid::new_v4();
        let schedule = Uuid::new_v4();

        let first = store
            .upsert_record(student, schedule, AttendanceStatus::Absent, None)
            .await
            .unwrap();
        let second = store
            .upsert_record(student, schedule, AttendanceStatus::Late, Some("traffic"))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.status, AttendanceStatus::Late);
        assert_eq!(store.len(), 1);

        let third = store
            .upsert_record(student, schedule, AttendanceStatus::Present, None)
            .await
            .unwrap();
        assert_eq!(third.status, AttendanceStatus::Present);
        assert_eq!(third.notes.as_deref(), Some("traffic"));
    }

    #[tokio::test]
    async fn deleting_missing_record_is_not_found() {
        let store = MemoryStore::default();
        let missing = Uuid::new_v4();
        let err = store.delete_record(missing).await.unwrap_err();
        assert!(matches!(err, DataAccessError::NotFound(id) if id == missing));
    }
}
