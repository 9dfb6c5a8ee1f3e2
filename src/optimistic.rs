//! Optimistic writes against a locally held record list.
//!
//! A write is applied to the cache first and the pre-write [`Snapshot`] is
//! kept. If the store rejects the write the snapshot is restored. Either
//! way the cache is refetched from the store once the write settles.

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::StoreResult;
use crate::models::{AttendanceRecord, AttendanceStatus};
use crate::store::AttendanceStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheScope {
    Student(Uuid),
    Schedule(Uuid),
}

impl CacheScope {
    fn covers(&self, student_id: Uuid, schedule_id: Uuid) -> bool {
        match self {
            CacheScope::Student(id) => *id == student_id,
            CacheScope::Schedule(id) => *id == schedule_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteIntent {
    Upsert {
        student_id: Uuid,
        schedule_id: Uuid,
        status: AttendanceStatus,
        notes: Option<String>,
    },
    Delete {
        record_id: Uuid,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Upserted(AttendanceRecord),
    Deleted(Uuid),
}

/// Cache contents before a write was applied.
#[derive(Debug, Clone)]
pub struct Snapshot {
    records: Vec<AttendanceRecord>,
}

#[derive(Debug, Clone)]
pub struct RecordCache {
    scope: CacheScope,
    records: Vec<AttendanceRecord>,
}

impl RecordCache {
    pub fn new(scope: CacheScope, records: Vec<AttendanceRecord>) -> Self {
        Self { scope, records }
    }

    pub async fn load<S>(store: &S, scope: CacheScope) -> StoreResult<Self>
    where
        S: AttendanceStore + ?Sized,
    {
        let mut cache = Self::new(scope, Vec::new());
        cache.refetch(store).await?;
        Ok(cache)
    }

    pub fn records(&self) -> &[AttendanceRecord] {
        &self.records
    }

    /// Mutates the cache as if the write had succeeded.
    pub fn apply(&mut self, intent: &WriteIntent) -> Snapshot {
        let snapshot = Snapshot {
            records: self.records.clone(),
        };

        match intent {
            WriteIntent::Upsert {
                student_id,
                schedule_id,
                status,
                notes,
            } => {
                let existing = self.records.iter().position(|record| {
                    record.student_id == *student_id && record.schedule_id == *schedule_id
                });

                match existing {
                    Some(index) => {
                        let record = &mut self.records[index];
                        record.status = *status;
                        if notes.is_some() {
                            record.notes = notes.clone();
                        }
                    }
                    None if self.scope.covers(*student_id, *schedule_id) => {
                        let placeholder =
                            self.placeholder(*student_id, *schedule_id, *status, notes);
                        self.records.push(placeholder);
                    }
                    None => {}
                }
            }
            WriteIntent::Delete { record_id } => {
                self.records.retain(|record| record.id != *record_id);
            }
        }

        snapshot
    }

    pub fn compensate(&mut self, snapshot: Snapshot) {
        self.records = snapshot.records;
    }

    // Relations for a record that does not exist yet are borrowed from
    // siblings already in the cache.
    fn placeholder(
        &self,
        student_id: Uuid,
        schedule_id: Uuid,
        status: AttendanceStatus,
        notes: &Option<String>,
    ) -> AttendanceRecord {
        let same_schedule = self
            .records
            .iter()
            .find(|record| record.schedule_id == schedule_id);
        let same_student = self
            .records
            .iter()
            .find(|record| record.student_id == student_id);

        AttendanceRecord {
            id: Uuid::new_v4(),
            student_id,
            schedule_id,
            status,
            notes: notes.clone(),
            service_time: same_schedule.and_then(|record| record.service_time.clone()),
            schedule: same_schedule.and_then(|record| record.schedule.clone()),
            student: same_student.and_then(|record| record.student.clone()),
        }
    }

    async fn refetch<S>(&mut self, store: &S) -> StoreResult<()>
    where
        S: AttendanceStore + ?Sized,
    {
        self.records = match self.scope {
            CacheScope::Student(id) => store.fetch_records_for_student(id).await?,
            CacheScope::Schedule(id) => store.fetch_records_for_schedule(id).await?,
        };
        debug!(scope = ?self.scope, count = self.records.len(), "cache refreshed");
        Ok(())
    }
}

/// Applies `intent` locally, sends it to the store and reconciles.
///
/// On failure the cache is rolled back and the store error is returned.
pub async fn commit<S>(
    cache: &mut RecordCache,
    store: &S,
    intent: WriteIntent,
) -> StoreResult<WriteOutcome>
where
    S: AttendanceStore + ?Sized,
{
    let snapshot = cache.apply(&intent);

    let result = match &intent {
        WriteIntent::Upsert {
            student_id,
            schedule_id,
            status,
            notes,
        } => store
            .upsert_record(*student_id, *schedule_id, *status, notes.as_deref())
            .await
            .map(WriteOutcome::Upserted),
        WriteIntent::Delete { record_id } => store
            .delete_record(*record_id)
            .await
            .map(|()| WriteOutcome::Deleted(*record_id)),
    };

    match result {
        Ok(outcome) => {
            cache.refetch(store).await?;
            Ok(outcome)
        }
        Err(err) => {
            warn!(scope = ?cache.scope, error = %err, "write rejected, rolling back");
            cache.compensate(snapshot);
            if let Err(refetch_err) = cache.refetch(store).await {
                warn!(error = %refetch_err, "refetch after rollback failed");
            }
            Err(err)
        }
    }
}
