//! A `mongodb`-backed implementation of the worker core's [`QueueStore`]/[`LockStore`]/
//! [`JournalStore`] traits.
//!
//! Grounded on the store contract in the spec's external-interfaces section and on the `mongodb`
//! usage shape in `plykit-jobs-rust-tokio`'s manifest (which also grounds the driver version
//! pinned in the workspace root). Typed collections (`Collection<JobDocument>`, etc.) are used
//! directly rather than hand-rolled `bson::Document` plumbing, since the core's model types are
//! already `serde`-derived for exactly this purpose.

use async_trait::async_trait;
use bson::{doc, Bson};
use chrono::{DateTime, Utc};
use mongodb::options::{FindOneOptions, IndexOptions};
use mongodb::{Collection, Database, IndexModel};
use queue_worker_core::error::{StoreError, WorkerError, WorkerResult};
use queue_worker_core::model::{JobDocument, JobId, JobState, JournalDocument, LockDocument};
use queue_worker_core::store::{JournalStore, LockStore, NextJobQuery, QueueStore};
use serde::Deserialize;
use tracing::{debug, info};

const WAITING_STATES: [&str; 3] = ["pending", "failed", "deferred"];

fn store_err(err: mongodb::error::Error) -> StoreError {
    StoreError::new(err)
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        mongodb::error::ErrorKind::Write(mongodb::error::WriteFailure::WriteError(we)) if we.code == 11000
    )
}

fn to_bson_date(at: DateTime<Utc>) -> Bson {
    Bson::DateTime(bson::DateTime::from_chrono(at))
}

/// Handle onto the three collections backing the worker core's store traits.
#[derive(Clone)]
pub struct MongoStore {
    queue: Collection<JobDocument>,
    lock: Collection<LockDocument>,
    journal: Collection<JournalDocument>,
}

impl MongoStore {
    pub fn new(database: &Database) -> Self {
        Self {
            queue: database.collection("queue"),
            lock: database.collection("lock"),
            journal: database.collection("journal"),
        }
    }

    /// Create the uniqueness constraints the store's atomicity guarantees rely on: `queue.id`,
    /// `lock.job_id`, and `journal.job.id`. Safe to call repeatedly (index creation is
    /// idempotent).
    pub async fn ensure_indexes(&self) -> Result<(), StoreError> {
        let unique = IndexOptions::builder().unique(true).build();
        self.queue
            .create_index(IndexModel::builder().keys(doc! {"id": 1}).options(unique.clone()).build(), None)
            .await
            .map_err(store_err)?;
        self.lock
            .create_index(IndexModel::builder().keys(doc! {"job_id": 1}).options(unique.clone()).build(), None)
            .await
            .map_err(store_err)?;
        self.journal
            .create_index(IndexModel::builder().keys(doc! {"job.id": 1}).options(unique).build(), None)
            .await
            .map_err(store_err)?;
        info!("ensured queue/lock/journal uniqueness indexes");
        Ok(())
    }
}

fn eligibility_filter(query: &NextJobQuery) -> bson::Document {
    let mut filter = doc! {
        "state": { "$in": WAITING_STATES },
        "removed_at": Bson::Null,
        "killed_at": Bson::Null,
        "attempts_left": { "$gt": 0 },
        "$and": [
            { "$or": [ { "query_at": Bson::Null }, { "query_at": { "$lte": to_bson_date(query.at) } } ] },
            { "$or": [ { "worker": Bson::Null }, { "worker": &query.worker } ] },
        ],
    };
    if let Some(gt) = query.id_gt {
        filter.insert("id", doc! { "$gt": gt });
    }
    if let Some(lt) = query.id_lt {
        filter.insert("id", doc! { "$lt": lt });
    }
    filter
}

#[async_trait]
impl QueueStore for MongoStore {
    async fn find_next(&self, query: &NextJobQuery) -> Result<Option<JobDocument>, StoreError> {
        let filter = eligibility_filter(query);
        let options = FindOneOptions::builder().sort(doc! {"force": -1, "priority": -1, "id": 1}).build();
        self.queue.find_one(filter, options).await.map_err(store_err)
    }

    async fn find_by_id(&self, id: JobId) -> Result<Option<JobDocument>, StoreError> {
        self.queue.find_one(doc! {"id": id}, None).await.map_err(store_err)
    }

    async fn count_running_by_name(&self, name: &str, worker: &str) -> Result<u64, StoreError> {
        self.queue
            .count_documents(doc! {"name": name, "state": "running", "locked.worker": worker}, None)
            .await
            .map_err(store_err)
    }

    async fn reserve_running(&self, id: JobId, at: DateTime<Utc>, hostname: &str, worker: &str) -> WorkerResult<()> {
        let filter = doc! {"id": id, "state": { "$in": WAITING_STATES }};
        let update = doc! {
            "$set": {
                "state": "running",
                "started_at": to_bson_date(at),
                "query_at": Bson::Null,
                "locked": {
                    "at": to_bson_date(at),
                    "heartbeat": to_bson_date(at),
                    "hostname": hostname,
                    "pid": Bson::Null,
                    "worker": worker,
                },
            },
            "$inc": { "trial": 1 },
        };
        let result = self.queue.update_one(filter, update, None).await.map_err(store_err)?;
        if result.matched_count != 1 {
            return Err(WorkerError::Invariant { context: "reserve_running", job_id: Some(id), matched: result.matched_count });
        }
        Ok(())
    }

    async fn set_inactive(&self, id: JobId) -> WorkerResult<()> {
        let filter = doc! {"id": id, "state": "deferred"};
        let update = doc! {"$set": {"state": "inactive"}};
        let result = self.queue.update_one(filter, update, None).await.map_err(store_err)?;
        if result.matched_count != 1 {
            return Err(WorkerError::Invariant { context: "set_inactive", job_id: Some(id), matched: result.matched_count });
        }
        Ok(())
    }

    async fn find_removed(&self) -> Result<Vec<JobDocument>, StoreError> {
        collect(self.queue.find(doc! {"removed_at": {"$ne": Bson::Null}}, None).await.map_err(store_err)?).await
    }

    async fn find_running_locked_by(&self, worker: &str) -> Result<Vec<JobDocument>, StoreError> {
        collect(
            self.queue
                .find(doc! {"state": "running", "locked.worker": worker}, None)
                .await
                .map_err(store_err)?,
        )
        .await
    }

    async fn find_waiting_killed(&self) -> Result<Vec<JobDocument>, StoreError> {
        let filter = doc! {"state": { "$in": WAITING_STATES }, "killed_at": {"$ne": Bson::Null}};
        collect(self.queue.find(filter, None).await.map_err(store_err)?).await
    }

    async fn set_wall_at(&self, id: JobId, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let filter = doc! {"id": id, "wall_at": Bson::Null};
        let update = doc! {"$set": {"wall_at": to_bson_date(at)}};
        let result = self.queue.update_one(filter, update, None).await.map_err(store_err)?;
        Ok(result.matched_count > 0)
    }

    async fn set_zombie_at(&self, id: JobId, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let filter = doc! {"id": id, "zombie_at": Bson::Null};
        let update = doc! {"$set": {"zombie_at": to_bson_date(at)}};
        let result = self.queue.update_one(filter, update, None).await.map_err(store_err)?;
        Ok(result.matched_count > 0)
    }

    async fn set_pid(&self, id: JobId, pid: u32) -> Result<bool, StoreError> {
        let filter = doc! {"id": id, "state": "running"};
        let update = doc! {"$set": {"locked.pid": pid as i64}};
        let result = self.queue.update_one(filter, update, None).await.map_err(store_err)?;
        Ok(result.matched_count > 0)
    }

    async fn exec_kill(&self, id: JobId) -> Result<bool, StoreError> {
        let update = doc! {"$set": {"state": "killed", "locked": Bson::Null}};
        let result = self.queue.update_one(doc! {"id": id}, update, None).await.map_err(store_err)?;
        Ok(result.matched_count > 0)
    }

    async fn finish_running(&self, id: JobId, state: JobState, _at: DateTime<Utc>) -> Result<bool, StoreError> {
        let update = doc! {"$set": {"state": state.as_str(), "locked": Bson::Null}};
        let result = self.queue.update_one(doc! {"id": id}, update, None).await.map_err(store_err)?;
        Ok(result.matched_count > 0)
    }

    async fn delete(&self, id: JobId) -> Result<u64, StoreError> {
        let result = self.queue.delete_one(doc! {"id": id}, None).await.map_err(store_err)?;
        Ok(result.deleted_count)
    }

    async fn all_ids(&self) -> Result<Vec<JobId>, StoreError> {
        #[derive(Deserialize)]
        struct IdOnly {
            id: JobId,
        }
        let options = mongodb::options::FindOptions::builder().projection(doc! {"id": 1, "_id": 0}).build();
        let typed: Collection<IdOnly> = self.queue.clone_with_type();
        let mut cursor = typed.find(doc! {}, options).await.map_err(store_err)?;
        let mut ids = Vec::new();
        while cursor.advance().await.map_err(store_err)? {
            ids.push(cursor.deserialize_current().map_err(store_err)?.id);
        }
        Ok(ids)
    }
}

async fn collect(mut cursor: mongodb::Cursor<JobDocument>) -> Result<Vec<JobDocument>, StoreError> {
    use futures::stream::TryStreamExt;
    cursor.try_collect().await.map_err(store_err)
}

#[async_trait]
impl LockStore for MongoStore {
    async fn lock(&self, owner: &str, job_id: JobId) -> Result<bool, StoreError> {
        let doc = LockDocument { job_id, owner: owner.to_string() };
        match self.lock.insert_one(doc, None).await {
            Ok(_) => Ok(true),
            Err(err) if is_duplicate_key(&err) => {
                debug!(job_id, "lock insert hit an existing lock");
                Ok(false)
            }
            Err(err) => Err(store_err(err)),
        }
    }

    async fn unlock(&self, job_id: JobId) -> Result<(), StoreError> {
        self.lock.delete_one(doc! {"job_id": job_id}, None).await.map_err(store_err)?;
        Ok(())
    }

    async fn is_locked(&self, job_id: JobId) -> Result<bool, StoreError> {
        Ok(self.lock.find_one(doc! {"job_id": job_id}, None).await.map_err(store_err)?.is_some())
    }

    async fn cleanup(&self, owner: &str) -> Result<u64, StoreError> {
        let result = self.lock.delete_many(doc! {"owner": owner}, None).await.map_err(store_err)?;
        Ok(result.deleted_count)
    }

    async fn cleanup_orphaned(&self, existing_ids: &[JobId]) -> Result<u64, StoreError> {
        let result = self
            .lock
            .delete_many(doc! {"job_id": { "$nin": existing_ids.to_vec() }}, None)
            .await
            .map_err(store_err)?;
        Ok(result.deleted_count)
    }
}

#[async_trait]
impl JournalStore for MongoStore {
    async fn insert(&self, doc: &JobDocument, journaled_at: DateTime<Utc>) -> Result<(), StoreError> {
        let entry = JournalDocument { job: doc.clone(), journaled_at };
        self.journal.insert_one(entry, None).await.map(|_| ()).map_err(store_err)
    }
}
