#[cfg(test)]
use std::collections::HashMap;
use std::marker::PhantomData;
use std::str::FromStr;
#[cfg(test)]
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use crate::error::StoreError;
use crate::models::{
    AttendanceRecord, CaptchaSession, Credentials, ExamSlot, Handout, Maddy, SeatingEntry,
    SubjectMappings, TimetableEntry,
};

// bump when a stored value's shape changes; older entries then read as absent
pub const SCHEMA_VERSION: i64 = 1;

pub struct StoreKey<T> {
    pub name: &'static str,
    _value: PhantomData<fn() -> T>,
}

impl<T> StoreKey<T> {
    pub const fn new(name: &'static str) -> Self {
        StoreKey {
            name,
            _value: PhantomData,
        }
    }
}

pub const TIMETABLE: StoreKey<Vec<TimetableEntry>> = StoreKey::new("timetable");
pub const SUBJECT_MAPPINGS: StoreKey<SubjectMappings> = StoreKey::new("subjectMappings");
pub const ATTENDANCE: StoreKey<Vec<AttendanceRecord>> = StoreKey::new("attendance");
pub const ATTENDANCE_TARGET: StoreKey<f64> = StoreKey::new("attendanceTargetPercentage");
pub const SEATING_PLAN: StoreKey<Vec<SeatingEntry>> = StoreKey::new("seatingPlan");
pub const EXAM_SLOTS: StoreKey<Vec<ExamSlot>> = StoreKey::new("examSlotDetails");
pub const HANDOUTS: StoreKey<Vec<Handout>> = StoreKey::new("handouts");
pub const MADDYS: StoreKey<Vec<Maddy>> = StoreKey::new("maddys");
pub const CREDENTIALS: StoreKey<Credentials> = StoreKey::new("credentials");
pub const CAPTCHA_SESSION: StoreKey<CaptchaSession> = StoreKey::new("captchaSession");
pub const CAPTCHA_REQUEST: StoreKey<u64> = StoreKey::new("captchaRequest");
pub const SYNC_REQUEST: StoreKey<u64> = StoreKey::new("syncRequest");

#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
    pub schema_version: i64,
    pub value: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cached<T> {
    pub value: T,
    pub updated_at: DateTime<Utc>,
    pub stale: bool,
}

pub trait KeyValueStore {
    async fn load(&self, key: &str) -> Result<Option<StoredEntry>, StoreError>;
    async fn save(&self, key: &str, entry: &StoredEntry) -> Result<(), StoreError>;
    async fn remove(&self, key: &str) -> Result<bool, StoreError>;
    // atomic; a missing counter starts from zero
    async fn increment(&self, key: &str) -> Result<u64, StoreError>;
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        let store = SqliteStore::from_pool(pool);
        store.init().await?;
        Ok(store)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        SqliteStore { pool }
    }

    pub async fn init(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

impl KeyValueStore for SqliteStore {
    async fn load(&self, key: &str) -> Result<Option<StoredEntry>, StoreError> {
        let row = sqlx::query(
            "SELECT schema_version, value, updated_at FROM kv_store WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let raw: String = row.get("value");
        let value = serde_json::from_str(&raw).map_err(|source| StoreError::Decode {
            key: key.to_string(),
            source,
        })?;

        Ok(Some(StoredEntry {
            schema_version: row.get("schema_version"),
            value,
            updated_at: row.get("updated_at"),
        }))
    }

    async fn save(&self, key: &str, entry: &StoredEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO kv_store (key, schema_version, value, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (key) DO UPDATE
            SET schema_version = excluded.schema_version,
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(entry.schema_version)
        .bind(entry.value.to_string())
        .bind(entry.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM kv_store WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn increment(&self, key: &str) -> Result<u64, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO kv_store (key, schema_version, value, updated_at)
            VALUES (?, ?, '1', ?)
            ON CONFLICT (key) DO UPDATE
            SET value = CAST(CAST(kv_store.value AS INTEGER) + 1 AS TEXT),
                schema_version = excluded.schema_version,
                updated_at = excluded.updated_at
            RETURNING value
            "#,
        )
        .bind(key)
        .bind(SCHEMA_VERSION)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        let raw: String = row.get("value");
        serde_json::from_str(&raw).map_err(|source| StoreError::Decode {
            key: key.to_string(),
            source,
        })
    }
}

#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, StoredEntry>>,
}

#[cfg(test)]
impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, StoredEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
impl KeyValueStore for MemoryStore {
    async fn load(&self, key: &str) -> Result<Option<StoredEntry>, StoreError> {
        Ok(self.entries().get(key).cloned())
    }

    async fn save(&self, key: &str, entry: &StoredEntry) -> Result<(), StoreError> {
        self.entries().insert(key.to_string(), entry.clone());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.entries().remove(key).is_some())
    }

    async fn increment(&self, key: &str) -> Result<u64, StoreError> {
        let mut entries = self.entries();
        let next = entries
            .get(key)
            .and_then(|entry| entry.value.as_u64())
            .unwrap_or(0)
            + 1;
        entries.insert(
            key.to_string(),
            StoredEntry {
                schema_version: SCHEMA_VERSION,
                value: serde_json::Value::from(next),
                updated_at: Utc::now(),
            },
        );
        Ok(next)
    }
}

pub struct Cache<S> {
    store: S,
}

impl<S: KeyValueStore> Cache<S> {
    pub fn new(store: S) -> Self {
        Cache { store }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &StoreKey<T>) -> Result<Option<T>, StoreError> {
        Ok(self.get_entry(key).await?.map(|(value, _)| value))
    }

    /// Entries older than `ttl` are still returned, marked stale.
    pub async fn get_cached<T: DeserializeOwned>(
        &self,
        key: &StoreKey<T>,
        ttl: chrono::Duration,
    ) -> Result<Option<Cached<T>>, StoreError> {
        let Some((value, updated_at)) = self.get_entry(key).await? else {
            return Ok(None);
        };

        let age = Utc::now() - updated_at;
        let stale = age > ttl;
        if stale {
            tracing::info!(key = key.name, age_minutes = age.num_minutes(), "cached value expired");
        }
        Ok(Some(Cached {
            value,
            updated_at,
            stale,
        }))
    }

    pub async fn set<T: Serialize>(&self, key: &StoreKey<T>, value: &T) -> Result<(), StoreError> {
        let value = serde_json::to_value(value).map_err(|source| StoreError::Encode {
            key: key.name.to_string(),
            source,
        })?;
        let entry = StoredEntry {
            schema_version: SCHEMA_VERSION,
            value,
            updated_at: Utc::now(),
        };
        self.store.save(key.name, &entry).await?;
        tracing::debug!(key = key.name, "stored value");
        Ok(())
    }

    pub async fn remove<T>(&self, key: &StoreKey<T>) -> Result<bool, StoreError> {
        self.store.remove(key.name).await
    }

    pub async fn increment(&self, key: &StoreKey<u64>) -> Result<u64, StoreError> {
        self.store.increment(key.name).await
    }

    async fn get_entry<T: DeserializeOwned>(
        &self,
        key: &StoreKey<T>,
    ) -> Result<Option<(T, DateTime<Utc>)>, StoreError> {
        let Some(entry) = self.store.load(key.name).await? else {
            return Ok(None);
        };

        if entry.schema_version != SCHEMA_VERSION {
            tracing::warn!(
                key = key.name,
                found = entry.schema_version,
                expected = SCHEMA_VERSION,
                "ignoring value stored under another schema version"
            );
            return Ok(None);
        }

        let value = serde_json::from_value(entry.value).map_err(|source| StoreError::Decode {
            key: key.name.to_string(),
            source,
        })?;
        Ok(Some((value, entry.updated_at)))
    }

    #[cfg(test)]
    pub fn inner(&self) -> &S {
        &self.store
    }
}
