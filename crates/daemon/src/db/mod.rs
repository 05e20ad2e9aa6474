use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use engine::{GenerationStatus, VideoGenerationPlan, VideoJobStatus};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::error::PipelineError;

pub struct Database {
    pub(crate) conn: Mutex<Connection>,
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub price: Option<String>,
    pub description: Option<String>,
    pub hooks: Vec<String>,
    pub images: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Avatar {
    pub id: i64,
    pub name: String,
    pub image_url: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Demo {
    pub id: String,
    pub product_id: i64,
    pub description: String,
    pub video_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExistingClip {
    pub id: String,
    pub product_id: i64,
    pub description: String,
    pub duration: f64,
    pub clip_type: String,
    pub video_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Generation {
    pub id: i64,
    pub status: GenerationStatus,
    pub prompt: Value,
    pub trigger_job_id: Option<String>,
    pub video_job_id: Option<i64>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoJob {
    pub id: i64,
    pub product_id: i64,
    pub avatar_id: i64,
    pub demo_ids: Vec<String>,
    pub tone: Option<String>,
    pub target_duration: Option<u32>,
    pub director_plan: Value,
    pub status: VideoJobStatus,
    /// Row ids of persisted composite images.
    pub composite_image_ids: Vec<i64>,
    /// Plan `compositeId`s whose image is persisted.
    pub completed_composite_ids: Vec<String>,
    pub trigger_job_id: Option<String>,
    pub final_video_url: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VideoJob {
    pub fn plan(&self) -> Result<VideoGenerationPlan> {
        serde_json::from_value(self.director_plan.clone())
            .with_context(|| format!("video job {} has an unreadable director plan", self.id))
    }
}

pub struct NewVideoJob<'a> {
    pub product_id: i64,
    pub avatar_id: i64,
    pub demo_ids: &'a [String],
    pub tone: Option<&'a str>,
    pub target_duration: Option<u32>,
    pub plan: &'a VideoGenerationPlan,
    /// Generation that planned this job; linked in the same transaction.
    pub generation_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeImage {
    pub id: i64,
    pub job_id: i64,
    pub composite_id: String,
    pub avatar_id: i64,
    pub product_id: i64,
    pub product_image_indices: Vec<u32>,
    pub prompt: String,
    pub description: String,
    pub image_url: String,
}

pub struct NewCompositeImage<'a> {
    pub job_id: i64,
    pub composite_id: &'a str,
    pub avatar_id: i64,
    pub product_id: i64,
    pub product_image_indices: &'a [u32],
    pub prompt: &'a str,
    pub description: &'a str,
    pub image_url: &'a str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VeoClip {
    pub id: i64,
    pub job_id: i64,
    pub call_id: String,
    pub source_image_url: String,
    pub prompt: String,
    /// Set once the clip is uploaded; a row without it is unfinished work.
    pub video_url: Option<String>,
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

fn json_column<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn time_column(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parsed_column<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

const VIDEO_JOB_COLUMNS: &str = "id, product_id, avatar_id, demo_ids_json, tone, target_duration, \
     director_plan_json, status, composite_image_ids_json, completed_composite_ids_json, \
     trigger_job_id, final_video_url, error, created_at, updated_at";

fn video_job_from_row(row: &Row) -> rusqlite::Result<VideoJob> {
    Ok(VideoJob {
        id: row.get(0)?,
        product_id: row.get(1)?,
        avatar_id: row.get(2)?,
        demo_ids: json_column(row, 3)?,
        tone: row.get(4)?,
        target_duration: row.get(5)?,
        director_plan: json_column(row, 6)?,
        status: parsed_column(row, 7)?,
        composite_image_ids: json_column(row, 8)?,
        completed_composite_ids: json_column(row, 9)?,
        trigger_job_id: row.get(10)?,
        final_video_url: row.get(11)?,
        error: row.get(12)?,
        created_at: time_column(row, 13)?,
        updated_at: time_column(row, 14)?,
    })
}

const GENERATION_COLUMNS: &str =
    "id, status, prompt_json, trigger_job_id, video_job_id, error, created_at, updated_at";

fn generation_from_row(row: &Row) -> rusqlite::Result<Generation> {
    Ok(Generation {
        id: row.get(0)?,
        status: parsed_column(row, 1)?,
        prompt: json_column(row, 2)?,
        trigger_job_id: row.get(3)?,
        video_job_id: row.get(4)?,
        error: row.get(5)?,
        created_at: time_column(row, 6)?,
        updated_at: time_column(row, 7)?,
    })
}

fn composite_from_row(row: &Row) -> rusqlite::Result<CompositeImage> {
    Ok(CompositeImage {
        id: row.get(0)?,
        job_id: row.get(1)?,
        composite_id: row.get(2)?,
        avatar_id: row.get(3)?,
        product_id: row.get(4)?,
        product_image_indices: json_column(row, 5)?,
        prompt: row.get(6)?,
        description: row.get(7)?,
        image_url: row.get(8)?,
    })
}

fn veo_clip_from_row(row: &Row) -> rusqlite::Result<VeoClip> {
    Ok(VeoClip {
        id: row.get(0)?,
        job_id: row.get(1)?,
        call_id: row.get(2)?,
        source_image_url: row.get(3)?,
        prompt: row.get(4)?,
        video_url: row.get(5)?,
    })
}

impl Database {
    pub fn new(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db = Database {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Locks the connection. Never hold the guard across an `.await`.
    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("database connection mutex poisoned"))
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS products (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                price TEXT,
                description TEXT,
                hooks_json TEXT NOT NULL DEFAULT '[]',
                images_json TEXT NOT NULL DEFAULT '[]'
            );

            CREATE TABLE IF NOT EXISTS avatars (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                image_url TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS demos (
                id TEXT PRIMARY KEY,
                product_id INTEGER NOT NULL,
                description TEXT NOT NULL,
                video_url TEXT,
                FOREIGN KEY (product_id) REFERENCES products(id)
            );

            CREATE TABLE IF NOT EXISTS existing_clips (
                id TEXT PRIMARY KEY,
                product_id INTEGER NOT NULL,
                description TEXT NOT NULL,
                duration REAL NOT NULL,
                clip_type TEXT NOT NULL,
                video_url TEXT,
                FOREIGN KEY (product_id) REFERENCES products(id)
            );

            CREATE TABLE IF NOT EXISTS video_jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                product_id INTEGER NOT NULL,
                avatar_id INTEGER NOT NULL,
                demo_ids_json TEXT NOT NULL DEFAULT '[]',
                tone TEXT,
                target_duration INTEGER,
                director_plan_json TEXT NOT NULL,
                status TEXT NOT NULL,
                composite_image_ids_json TEXT NOT NULL DEFAULT '[]',
                completed_composite_ids_json TEXT NOT NULL DEFAULT '[]',
                trigger_job_id TEXT,
                final_video_url TEXT,
                error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS generations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                status TEXT NOT NULL,
                prompt_json TEXT NOT NULL,
                trigger_job_id TEXT,
                video_job_id INTEGER,
                error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (video_job_id) REFERENCES video_jobs(id)
            );

            CREATE TABLE IF NOT EXISTS composite_images (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id INTEGER NOT NULL,
                composite_id TEXT NOT NULL,
                avatar_id INTEGER NOT NULL,
                product_id INTEGER NOT NULL,
                product_image_indices_json TEXT NOT NULL DEFAULT '[]',
                prompt TEXT NOT NULL,
                description TEXT NOT NULL,
                image_url TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (job_id) REFERENCES video_jobs(id),
                UNIQUE(job_id, composite_id)
            );

            CREATE TABLE IF NOT EXISTS veo_clips (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id INTEGER NOT NULL,
                call_id TEXT NOT NULL,
                source_image_url TEXT NOT NULL,
                prompt TEXT NOT NULL,
                video_url TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (job_id) REFERENCES video_jobs(id),
                UNIQUE(job_id, call_id)
            );

            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                status TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL,
                run_after TEXT NOT NULL,
                last_error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_due ON tasks(status, run_after);",
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Catalog
    // -----------------------------------------------------------------------

    pub fn create_product(
        &self,
        name: &str,
        price: Option<&str>,
        description: Option<&str>,
        hooks: &[String],
        images: &[String],
    ) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO products (name, price, description, hooks_json, images_json) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                name,
                price,
                description,
                serde_json::to_string(hooks)?,
                serde_json::to_string(images)?
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_product(&self, id: i64) -> Result<Option<Product>> {
        let conn = self.conn()?;
        let product = conn
            .query_row(
                "SELECT id, name, price, description, hooks_json, images_json FROM products WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Product {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        price: row.get(2)?,
                        description: row.get(3)?,
                        hooks: json_column(row, 4)?,
                        images: json_column(row, 5)?,
                    })
                },
            )
            .optional()?;
        Ok(product)
    }

    pub fn create_avatar(&self, name: &str, image_url: &str) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO avatars (name, image_url) VALUES (?1, ?2)",
            params![name, image_url],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_avatar(&self, id: i64) -> Result<Option<Avatar>> {
        let conn = self.conn()?;
        let avatar = conn
            .query_row(
                "SELECT id, name, image_url FROM avatars WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Avatar {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        image_url: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(avatar)
    }

    pub fn create_demo(
        &self,
        id: &str,
        product_id: i64,
        description: &str,
        video_url: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO demos (id, product_id, description, video_url) VALUES (?1, ?2, ?3, ?4)",
            params![id, product_id, description, video_url],
        )?;
        Ok(())
    }

    pub fn get_demo(&self, id: &str) -> Result<Option<Demo>> {
        let conn = self.conn()?;
        let demo = conn
            .query_row(
                "SELECT id, product_id, description, video_url FROM demos WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Demo {
                        id: row.get(0)?,
                        product_id: row.get(1)?,
                        description: row.get(2)?,
                        video_url: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(demo)
    }

    pub fn list_demos_for_product(&self, product_id: i64) -> Result<Vec<Demo>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, product_id, description, video_url FROM demos WHERE product_id = ?1 ORDER BY id ASC",
        )?;
        let demos = stmt
            .query_map(params![product_id], |row| {
                Ok(Demo {
                    id: row.get(0)?,
                    product_id: row.get(1)?,
                    description: row.get(2)?,
                    video_url: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(demos)
    }

    pub fn create_existing_clip(
        &self,
        id: &str,
        product_id: i64,
        description: &str,
        duration: f64,
        clip_type: &str,
        video_url: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO existing_clips (id, product_id, description, duration, clip_type, video_url)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, product_id, description, duration, clip_type, video_url],
        )?;
        Ok(())
    }

    pub fn get_existing_clip(&self, id: &str) -> Result<Option<ExistingClip>> {
        let conn = self.conn()?;
        let clip = conn
            .query_row(
                "SELECT id, product_id, description, duration, clip_type, video_url FROM existing_clips WHERE id = ?1",
                params![id],
                |row| {
                    Ok(ExistingClip {
                        id: row.get(0)?,
                        product_id: row.get(1)?,
                        description: row.get(2)?,
                        duration: row.get(3)?,
                        clip_type: row.get(4)?,
                        video_url: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(clip)
    }

    pub fn list_existing_clips_for_product(&self, product_id: i64) -> Result<Vec<ExistingClip>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, product_id, description, duration, clip_type, video_url
             FROM existing_clips WHERE product_id = ?1 ORDER BY id ASC",
        )?;
        let clips = stmt
            .query_map(params![product_id], |row| {
                Ok(ExistingClip {
                    id: row.get(0)?,
                    product_id: row.get(1)?,
                    description: row.get(2)?,
                    duration: row.get(3)?,
                    clip_type: row.get(4)?,
                    video_url: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(clips)
    }

    // -----------------------------------------------------------------------
    // Generations
    // -----------------------------------------------------------------------

    pub fn create_generation(&self, prompt: &Value) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO generations (status, prompt_json, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                GenerationStatus::Pending.as_str(),
                serde_json::to_string(prompt)?,
                now,
                now
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_generation(&self, id: i64) -> Result<Option<Generation>> {
        let conn = self.conn()?;
        let generation = conn
            .query_row(
                &format!("SELECT {} FROM generations WHERE id = ?1", GENERATION_COLUMNS),
                params![id],
                generation_from_row,
            )
            .optional()?;
        Ok(generation)
    }

    pub fn set_generation_trigger(&self, id: i64, trigger_job_id: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE generations SET trigger_job_id = ?1, updated_at = ?2 WHERE id = ?3",
            params![trigger_job_id, Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    /// Conditional status write for a generation. `error` is stored on the
    /// row, and cleared when `None`.
    pub fn transition_generation(
        &self,
        id: i64,
        expected: GenerationStatus,
        next: GenerationStatus,
        error: Option<&str>,
    ) -> Result<()> {
        expected.transition(next)?;
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE generations SET status = ?1, error = ?2, updated_at = ?3 WHERE id = ?4 AND status = ?5",
            params![next.as_str(), error, Utc::now().to_rfc3339(), id, expected.as_str()],
        )?;
        if changed == 0 {
            let found: Option<String> = conn
                .query_row(
                    "SELECT status FROM generations WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            return Err(match found {
                None => PipelineError::not_found("generation", id),
                Some(found) => PipelineError::StatusConflict {
                    job_id: id,
                    expected: expected.to_string(),
                    found,
                },
            }
            .into());
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Video jobs
    // -----------------------------------------------------------------------

    /// Inserts a pending job and, when it came from a generation, links it
    /// to that generation. Both writes commit or neither does.
    pub fn create_video_job(&self, job: &NewVideoJob) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO video_jobs (product_id, avatar_id, demo_ids_json, tone, target_duration,
                director_plan_json, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                job.product_id,
                job.avatar_id,
                serde_json::to_string(job.demo_ids)?,
                job.tone,
                job.target_duration,
                serde_json::to_string(job.plan)?,
                VideoJobStatus::Pending.as_str(),
                now,
                now
            ],
        )?;
        let job_id = tx.last_insert_rowid();

        if let Some(generation_id) = job.generation_id {
            let linked = tx.execute(
                "UPDATE generations SET video_job_id = ?1, updated_at = ?2
                 WHERE id = ?3 AND video_job_id IS NULL",
                params![job_id, now, generation_id],
            )?;
            if linked == 0 {
                // Dropping the transaction rolls the insert back.
                anyhow::bail!(
                    "generation {} is missing or already has a video job",
                    generation_id
                );
            }
        }

        tx.commit()?;
        Ok(job_id)
    }

    pub fn get_video_job(&self, id: i64) -> Result<Option<VideoJob>> {
        let conn = self.conn()?;
        let job = conn
            .query_row(
                &format!("SELECT {} FROM video_jobs WHERE id = ?1", VIDEO_JOB_COLUMNS),
                params![id],
                video_job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    /// Jobs parked between stages, oldest first.
    pub fn list_video_jobs_with_status(&self, status: VideoJobStatus) -> Result<Vec<VideoJob>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM video_jobs WHERE status = ?1 ORDER BY id ASC",
            VIDEO_JOB_COLUMNS
        ))?;
        let jobs = stmt
            .query_map(params![status.as_str()], video_job_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    pub fn set_video_job_trigger(&self, id: i64, trigger_job_id: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE video_jobs SET trigger_job_id = ?1, updated_at = ?2 WHERE id = ?3",
            params![trigger_job_id, Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    pub fn set_final_video_url(&self, id: i64, url: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE video_jobs SET final_video_url = ?1, updated_at = ?2 WHERE id = ?3",
            params![url, Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    /// Moves a job from `expected` to `next` with a single conditional write.
    /// Losing a race to another writer is reported as `StatusConflict`.
    pub fn transition_video_job(
        &self,
        id: i64,
        expected: VideoJobStatus,
        next: VideoJobStatus,
    ) -> Result<()> {
        expected.transition(next)?;
        self.write_video_job_status(id, expected, next, None)
    }

    /// Marks a job failed from `expected`, recording the error message.
    pub fn fail_video_job(&self, id: i64, expected: VideoJobStatus, error: &str) -> Result<()> {
        expected.transition(VideoJobStatus::Failed)?;
        self.write_video_job_status(id, expected, VideoJobStatus::Failed, Some(error))
    }

    fn write_video_job_status(
        &self,
        id: i64,
        expected: VideoJobStatus,
        next: VideoJobStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE video_jobs SET status = ?1, error = ?2, updated_at = ?3 WHERE id = ?4 AND status = ?5",
            params![next.as_str(), error, Utc::now().to_rfc3339(), id, expected.as_str()],
        )?;
        if changed == 0 {
            let found: Option<String> = conn
                .query_row(
                    "SELECT status FROM video_jobs WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            return Err(match found {
                None => PipelineError::not_found("video job", id),
                Some(found) => PipelineError::conflict(id, expected, &found),
            }
            .into());
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Composites
    // -----------------------------------------------------------------------

    pub fn create_composite_image(&self, image: &NewCompositeImage) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO composite_images (job_id, composite_id, avatar_id, product_id,
                product_image_indices_json, prompt, description, image_url, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                image.job_id,
                image.composite_id,
                image.avatar_id,
                image.product_id,
                serde_json::to_string(image.product_image_indices)?,
                image.prompt,
                image.description,
                image.image_url,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_composite_for_job(&self, job_id: i64, composite_id: &str) -> Result<Option<CompositeImage>> {
        let conn = self.conn()?;
        let image = conn
            .query_row(
                "SELECT id, job_id, composite_id, avatar_id, product_id, product_image_indices_json,
                        prompt, description, image_url
                 FROM composite_images WHERE job_id = ?1 AND composite_id = ?2",
                params![job_id, composite_id],
                composite_from_row,
            )
            .optional()?;
        Ok(image)
    }

    pub fn list_composites_for_job(&self, job_id: i64) -> Result<Vec<CompositeImage>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, job_id, composite_id, avatar_id, product_id, product_image_indices_json,
                    prompt, description, image_url
             FROM composite_images WHERE job_id = ?1 ORDER BY id ASC",
        )?;
        let images = stmt
            .query_map(params![job_id], composite_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(images)
    }

    /// Appends a persisted composite to both id lists of the job row in one
    /// statement. A composite already recorded is left alone.
    pub fn record_completed_composite(
        &self,
        job_id: i64,
        composite_image_id: i64,
        composite_id: &str,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE video_jobs
             SET composite_image_ids_json = json_insert(composite_image_ids_json, '$[#]', ?1),
                 completed_composite_ids_json = json_insert(completed_composite_ids_json, '$[#]', ?2),
                 updated_at = ?3
             WHERE id = ?4
               AND NOT EXISTS (
                   SELECT 1 FROM json_each((SELECT completed_composite_ids_json FROM video_jobs WHERE id = ?4))
                   WHERE value = ?2
               )",
            params![composite_image_id, composite_id, Utc::now().to_rfc3339(), job_id],
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Veo clips
    // -----------------------------------------------------------------------

    /// Records the clip request before generation so an interrupted run leaves
    /// a row without a `video_url`.
    pub fn upsert_veo_clip(
        &self,
        job_id: i64,
        call_id: &str,
        source_image_url: &str,
        prompt: &str,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO veo_clips (job_id, call_id, source_image_url, prompt, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(job_id, call_id) DO UPDATE SET
                source_image_url = excluded.source_image_url,
                prompt = excluded.prompt",
            params![job_id, call_id, source_image_url, prompt, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn set_veo_clip_url(&self, job_id: i64, call_id: &str, video_url: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE veo_clips SET video_url = ?1 WHERE job_id = ?2 AND call_id = ?3",
            params![video_url, job_id, call_id],
        )?;
        Ok(())
    }

    pub fn get_veo_clip(&self, job_id: i64, call_id: &str) -> Result<Option<VeoClip>> {
        let conn = self.conn()?;
        let clip = conn
            .query_row(
                "SELECT id, job_id, call_id, source_image_url, prompt, video_url
                 FROM veo_clips WHERE job_id = ?1 AND call_id = ?2",
                params![job_id, call_id],
                veo_clip_from_row,
            )
            .optional()?;
        Ok(clip)
    }

    pub fn list_veo_clips_for_job(&self, job_id: i64) -> Result<Vec<VeoClip>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, job_id, call_id, source_image_url, prompt, video_url
             FROM veo_clips WHERE job_id = ?1 ORDER BY id ASC",
        )?;
        let clips = stmt
            .query_map(params![job_id], veo_clip_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(clips)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use engine::{
        ProductInteraction, SegmentKind, TotalDuration, VeoCall, VideoClip, VideoSegment,
        SourceImageType,
    };

    /// Minimal valid 16s plan: one talking-head call split into two clips.
    pub(crate) fn sample_plan() -> VideoGenerationPlan {
        VideoGenerationPlan {
            product_interaction: ProductInteraction::NonHandheld,
            interaction_reasoning: "The product is a large appliance that sits on a counter.".to_string(),
            total_duration: TotalDuration::try_from(16).unwrap(),
            image_generation: vec![],
            segments: vec![
                VideoSegment {
                    segment_index: 0,
                    veo_call_id: Some("call_1".to_string()),
                    start_time: 0.0,
                    end_time: 8.0,
                    kind: SegmentKind::TalkingHead {
                        script: Some("This blender crushes ice in seconds and cleans itself when you are done".to_string()),
                        setting: None,
                        action: None,
                    },
                },
                VideoSegment {
                    segment_index: 1,
                    veo_call_id: Some("call_2".to_string()),
                    start_time: 0.0,
                    end_time: 8.0,
                    kind: SegmentKind::TalkingHead {
                        script: Some("Grab yours today and make smoothies every morning without the mess at all".to_string()),
                        setting: None,
                        action: None,
                    },
                },
            ],
            veo_calls: vec![
                VeoCall {
                    call_id: "call_1".to_string(),
                    source_image_type: SourceImageType::Avatar,
                    source_image_ref: "AVATAR".to_string(),
                    prompt: "Presenter talks to camera".to_string(),
                },
                VeoCall {
                    call_id: "call_2".to_string(),
                    source_image_type: SourceImageType::Avatar,
                    source_image_ref: "AVATAR".to_string(),
                    prompt: "Presenter closes with a smile".to_string(),
                },
            ],
            clips: vec![
                VideoClip {
                    clip_id: "clip_1".to_string(),
                    veo_call_id: "call_1".to_string(),
                    start_time: 0.0,
                    end_time: 8.0,
                    order: 0,
                },
                VideoClip {
                    clip_id: "clip_2".to_string(),
                    veo_call_id: "call_2".to_string(),
                    start_time: 0.0,
                    end_time: 8.0,
                    order: 1,
                },
            ],
        }
    }

    fn job_fixture(db: &Database) -> i64 {
        let product = db
            .create_product("Blender", Some("$49"), None, &[], &["https://cdn/p0.png".to_string()])
            .unwrap();
        let avatar = db.create_avatar("Ava", "https://cdn/ava.png").unwrap();
        let plan = sample_plan();
        db.create_video_job(&NewVideoJob {
            product_id: product,
            avatar_id: avatar,
            demo_ids: &[],
            tone: Some("upbeat"),
            target_duration: Some(16),
            plan: &plan,
            generation_id: None,
        })
        .unwrap()
    }

    #[test]
    fn video_job_round_trips_plan_and_status() {
        let db = Database::open_in_memory().unwrap();
        let id = job_fixture(&db);
        let job = db.get_video_job(id).unwrap().unwrap();
        assert_eq!(job.status, VideoJobStatus::Pending);
        assert_eq!(job.plan().unwrap(), sample_plan());
        assert_eq!(job.tone.as_deref(), Some("upbeat"));
        assert!(job.composite_image_ids.is_empty());
    }

    #[test]
    fn conditional_transition_rejects_stale_expectation() {
        let db = Database::open_in_memory().unwrap();
        let id = job_fixture(&db);
        db.transition_video_job(id, VideoJobStatus::Pending, VideoJobStatus::GeneratingComposites)
            .unwrap();

        let err = db
            .transition_video_job(id, VideoJobStatus::Pending, VideoJobStatus::GeneratingComposites)
            .unwrap_err();
        match err.downcast_ref::<PipelineError>() {
            Some(PipelineError::StatusConflict { found, .. }) => {
                assert_eq!(found, "generating_composites")
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(
            db.get_video_job(id).unwrap().unwrap().status,
            VideoJobStatus::GeneratingComposites
        );
    }

    #[test]
    fn illegal_transition_never_reaches_the_row() {
        let db = Database::open_in_memory().unwrap();
        let id = job_fixture(&db);
        let err = db
            .transition_video_job(id, VideoJobStatus::Pending, VideoJobStatus::Assembling)
            .unwrap_err();
        assert!(err.downcast_ref::<PipelineError>().is_none());
        assert_eq!(db.get_video_job(id).unwrap().unwrap().status, VideoJobStatus::Pending);
    }

    #[test]
    fn failing_records_the_error_and_retry_clears_it() {
        let db = Database::open_in_memory().unwrap();
        let id = job_fixture(&db);
        db.transition_video_job(id, VideoJobStatus::Pending, VideoJobStatus::GeneratingComposites)
            .unwrap();
        db.fail_video_job(id, VideoJobStatus::GeneratingComposites, "image service down")
            .unwrap();
        let job = db.get_video_job(id).unwrap().unwrap();
        assert_eq!(job.status, VideoJobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("image service down"));

        db.transition_video_job(id, VideoJobStatus::Failed, VideoJobStatus::GeneratingComposites)
            .unwrap();
        assert!(db.get_video_job(id).unwrap().unwrap().error.is_none());
    }

    #[test]
    fn completed_composites_are_recorded_once() {
        let db = Database::open_in_memory().unwrap();
        let id = job_fixture(&db);
        let image = db
            .create_composite_image(&NewCompositeImage {
                job_id: id,
                composite_id: "composite_1",
                avatar_id: 1,
                product_id: 1,
                product_image_indices: &[0],
                prompt: "hold the blender",
                description: "avatar with blender",
                image_url: "http://local/images/c1.png",
            })
            .unwrap();
        db.record_completed_composite(id, image, "composite_1").unwrap();
        db.record_completed_composite(id, image, "composite_1").unwrap();

        let job = db.get_video_job(id).unwrap().unwrap();
        assert_eq!(job.composite_image_ids, vec![image]);
        assert_eq!(job.completed_composite_ids, vec!["composite_1".to_string()]);
        assert!(db.get_composite_for_job(id, "composite_1").unwrap().is_some());
        assert!(db.get_composite_for_job(id, "composite_2").unwrap().is_none());
    }

    #[test]
    fn veo_clip_upsert_keeps_one_row_per_call() {
        let db = Database::open_in_memory().unwrap();
        let id = job_fixture(&db);
        db.upsert_veo_clip(id, "call_1", "https://cdn/ava.png", "talk").unwrap();
        db.upsert_veo_clip(id, "call_1", "https://cdn/ava.png", "talk again").unwrap();
        assert!(db.get_veo_clip(id, "call_1").unwrap().unwrap().video_url.is_none());

        db.set_veo_clip_url(id, "call_1", "http://local/videos/call_1.mp4").unwrap();
        let clips = db.list_veo_clips_for_job(id).unwrap();
        assert_eq!(clips.len(), 1);
        assert_eq!(clips[0].prompt, "talk again");
        assert_eq!(clips[0].video_url.as_deref(), Some("http://local/videos/call_1.mp4"));
    }

    #[test]
    fn generation_lifecycle_is_conditional() {
        let db = Database::open_in_memory().unwrap();
        let id = db.create_generation(&serde_json::json!({"productId": 1})).unwrap();
        db.transition_generation(id, GenerationStatus::Pending, GenerationStatus::Processing, None)
            .unwrap();
        assert!(db
            .transition_generation(id, GenerationStatus::Pending, GenerationStatus::Processing, None)
            .is_err());
        db.transition_generation(id, GenerationStatus::Processing, GenerationStatus::Failed, Some("boom"))
            .unwrap();
        let generation = db.get_generation(id).unwrap().unwrap();
        assert_eq!(generation.status, GenerationStatus::Failed);
        assert_eq!(generation.error.as_deref(), Some("boom"));
    }

    #[test]
    fn job_insert_and_generation_link_commit_together() {
        let db = Database::open_in_memory().unwrap();
        let product = db
            .create_product("Blender", None, None, &[], &["https://cdn/p0.png".to_string()])
            .unwrap();
        let avatar = db.create_avatar("Ava", "https://cdn/ava.png").unwrap();
        let generation = db.create_generation(&serde_json::json!({"productId": product})).unwrap();
        let plan = sample_plan();
        let new_job = |generation_id| NewVideoJob {
            product_id: product,
            avatar_id: avatar,
            demo_ids: &[],
            tone: None,
            target_duration: None,
            plan: &plan,
            generation_id,
        };

        let job_id = db.create_video_job(&new_job(Some(generation))).unwrap();
        assert_eq!(db.get_generation(generation).unwrap().unwrap().video_job_id, Some(job_id));

        // A second link for the same generation fails and leaves no orphan job.
        assert!(db.create_video_job(&new_job(Some(generation))).is_err());
        assert!(db.get_video_job(job_id + 1).unwrap().is_none());
        assert_eq!(db.get_generation(generation).unwrap().unwrap().video_job_id, Some(job_id));

        // Unknown generation: same rollback.
        assert!(db.create_video_job(&new_job(Some(999))).is_err());
        assert!(db.get_video_job(job_id + 1).unwrap().is_none());
    }

    #[test]
    fn schema_init_is_repeatable_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("videogen.db");
        let id = {
            let db = Database::new(&path).unwrap();
            job_fixture(&db)
        };
        let reopened = Database::new(&path).unwrap();
        assert!(reopened.get_video_job(id).unwrap().is_some());
    }
}
