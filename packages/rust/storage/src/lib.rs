//! libSQL storage layer.
//!
//! The [`Storage`] struct wraps a local libSQL database holding enriched
//! entities and the history of scrape runs.
//!
//! **Access rules:**
//! - `htc scrape`, `htc meals --refresh`: read-write via [`Storage::open`]
//! - `htc list`, `htc meals`: read-only via [`Storage::open_readonly`]

mod migrations;

use std::path::Path;

use chrono::{NaiveDate, Utc};
use htc_shared::{Coordinates, Entity, HtcError, Meal, Result};
use libsql::{Connection, Database, params};
use uuid::Uuid;

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

/// Outcome of [`Storage::save_entities`].
#[derive(Debug, Clone, Default)]
pub struct SaveReport {
    /// Entities written.
    pub persisted: usize,
    /// Entities deleted beforehand (replace mode only).
    pub removed: u64,
    /// Entities that could not be written (URL, error message).
    pub errors: Vec<(String, String)>,
}

/// A recorded scrape run.
#[derive(Debug, Clone)]
pub struct ScrapeRun {
    pub id: String,
    pub listing_url: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub stats_json: Option<String>,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| HtcError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| HtcError::Storage(e.to_string()))?;

        let conn = db.connect().map_err(|e| HtcError::Storage(e.to_string()))?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(HtcError::Storage(format!(
                "database not found at {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| HtcError::Storage(e.to_string()))?;

        let conn = db.connect().map_err(|e| HtcError::Storage(e.to_string()))?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        HtcError::Storage(format!("migration v{} failed: {e}", migration.version))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(HtcError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Entity operations
    // -----------------------------------------------------------------------

    /// Insert an entity or replace the stored one with the same URL.
    pub async fn upsert_entity(&self, entity: &Entity) -> Result<()> {
        self.check_writable()?;
        upsert_entity_on(&self.conn, entity).await
    }

    /// Get an entity by URL.
    pub async fn get_entity(&self, url: &str) -> Result<Option<Entity>> {
        let mut rows = self
            .conn
            .query(
                "SELECT url, name, label, latitude, longitude, opening_hours, enriched
                 FROM entities WHERE url = ?1",
                params![url],
            )
            .await
            .map_err(|e| HtcError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_entity(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(HtcError::Storage(e.to_string())),
        }
    }

    /// List all stored entities, ordered by name.
    pub async fn list_entities(&self) -> Result<Vec<Entity>> {
        let mut rows = self
            .conn
            .query(
                "SELECT url, name, label, latitude, longitude, opening_hours, enriched
                 FROM entities ORDER BY name",
                params![],
            )
            .await
            .map_err(|e| HtcError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| HtcError::Storage(e.to_string()))?
        {
            results.push(row_to_entity(&row)?);
        }
        Ok(results)
    }

    /// Delete every stored entity and its meals. Returns the number of entities removed.
    pub async fn clear_entities(&self) -> Result<u64> {
        self.check_writable()?;
        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| HtcError::Storage(e.to_string()))?;
        let removed = clear_on(&tx).await?;
        tx.commit()
            .await
            .map_err(|e| HtcError::Storage(e.to_string()))?;
        Ok(removed)
    }

    /// Save a batch of entities with their meals in one transaction.
    ///
    /// Each entity's stored meals are replaced by the ones it carries.
    /// Without `replace`, entities that fail to save are reported in
    /// [`SaveReport::errors`] and the rest are committed. With `replace`, the
    /// store is cleared first and any failure rolls the whole batch back, so
    /// the previous contents survive.
    pub async fn save_entities(&self, entities: &[Entity], replace: bool) -> Result<SaveReport> {
        self.check_writable()?;
        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| HtcError::Storage(e.to_string()))?;

        let mut report = SaveReport::default();
        if replace {
            report.removed = clear_on(&tx).await?;
        }

        for entity in entities {
            let saved = async {
                upsert_entity_on(&tx, entity).await?;
                replace_meals_on(&tx, &entity.url, &entity.meals).await
            }
            .await;

            match saved {
                Ok(()) => report.persisted += 1,
                Err(e) => {
                    tracing::warn!(url = %entity.url, error = %e, "failed to store entity");
                    report.errors.push((entity.url.clone(), e.to_string()));
                }
            }
        }

        if replace && !report.errors.is_empty() {
            tx.rollback()
                .await
                .map_err(|e| HtcError::Storage(e.to_string()))?;
            return Err(HtcError::Storage(format!(
                "{} of {} entities failed to save, replace rolled back; first error: {}",
                report.errors.len(),
                entities.len(),
                report.errors[0].1
            )));
        }

        tx.commit()
            .await
            .map_err(|e| HtcError::Storage(e.to_string()))?;
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Meal operations
    // -----------------------------------------------------------------------

    /// Replace the stored meals of one restaurant.
    pub async fn replace_meals(&self, restaurant_url: &str, meals: &[Meal]) -> Result<()> {
        self.check_writable()?;
        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| HtcError::Storage(e.to_string()))?;
        replace_meals_on(&tx, restaurant_url, meals).await?;
        tx.commit()
            .await
            .map_err(|e| HtcError::Storage(e.to_string()))
    }

    /// List stored meals, optionally for one restaurant, by restaurant then day.
    pub async fn list_meals(&self, restaurant_url: Option<&str>) -> Result<Vec<Meal>> {
        let sql = "SELECT restaurant_url, day, title, courses_json FROM meals
                   WHERE ?1 IS NULL OR restaurant_url = ?1
                   ORDER BY restaurant_url, day, id";
        let mut rows = self
            .conn
            .query(sql, params![restaurant_url])
            .await
            .map_err(|e| HtcError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| HtcError::Storage(e.to_string()))?
        {
            results.push(row_to_meal(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Scrape run operations
    // -----------------------------------------------------------------------

    /// Record the start of a scrape run. Returns the generated run ID.
    pub async fn insert_scrape_run(&self, listing_url: &str) -> Result<String> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO scrape_runs (id, listing_url, started_at) VALUES (?1, ?2, ?3)",
                params![id.as_str(), listing_url, now.as_str()],
            )
            .await
            .map_err(|e| HtcError::Storage(e.to_string()))?;
        Ok(id)
    }

    /// Mark a scrape run as finished with its stats.
    pub async fn finish_scrape_run(&self, run_id: &str, stats_json: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE scrape_runs SET finished_at = ?1, stats_json = ?2 WHERE id = ?3",
                params![now.as_str(), stats_json, run_id],
            )
            .await
            .map_err(|e| HtcError::Storage(e.to_string()))?;
        Ok(())
    }

    /// List scrape runs, most recent first.
    pub async fn list_scrape_runs(&self) -> Result<Vec<ScrapeRun>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, listing_url, started_at, finished_at, stats_json
                 FROM scrape_runs ORDER BY started_at DESC",
                params![],
            )
            .await
            .map_err(|e| HtcError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| HtcError::Storage(e.to_string()))?
        {
            results.push(ScrapeRun {
                id: row
                    .get::<String>(0)
                    .map_err(|e| HtcError::Storage(e.to_string()))?,
                listing_url: row
                    .get::<String>(1)
                    .map_err(|e| HtcError::Storage(e.to_string()))?,
                started_at: row
                    .get::<String>(2)
                    .map_err(|e| HtcError::Storage(e.to_string()))?,
                finished_at: row.get::<String>(3).ok(),
                stats_json: row.get::<String>(4).ok(),
            });
        }
        Ok(results)
    }
}

// ---------------------------------------------------------------------------
// Statements shared by the handle and its transactions
// ---------------------------------------------------------------------------

async fn upsert_entity_on(conn: &Connection, entity: &Entity) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO entities (url, name, label, latitude, longitude, opening_hours, enriched, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(url) DO UPDATE SET
           name = excluded.name,
           label = excluded.label,
           latitude = excluded.latitude,
           longitude = excluded.longitude,
           opening_hours = excluded.opening_hours,
           enriched = excluded.enriched,
           updated_at = excluded.updated_at",
        params![
            entity.url.as_str(),
            entity.name.as_str(),
            entity.label.as_str(),
            entity.coordinates.latitude,
            entity.coordinates.longitude,
            entity.opening_hours.as_deref(),
            i64::from(entity.enriched),
            now.as_str(),
        ],
    )
    .await
    .map_err(|e| HtcError::Storage(e.to_string()))?;
    Ok(())
}

async fn replace_meals_on(conn: &Connection, restaurant_url: &str, meals: &[Meal]) -> Result<()> {
    conn.execute(
        "DELETE FROM meals WHERE restaurant_url = ?1",
        params![restaurant_url],
    )
    .await
    .map_err(|e| HtcError::Storage(e.to_string()))?;

    let now = Utc::now().to_rfc3339();
    for meal in meals {
        let day = meal.day.map(|d| d.format("%Y-%m-%d").to_string());
        let courses = serde_json::to_string(&meal.courses)
            .map_err(|e| HtcError::Storage(format!("failed to encode courses: {e}")))?;
        conn.execute(
            "INSERT INTO meals (restaurant_url, day, title, courses_json, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                restaurant_url,
                day.as_deref(),
                meal.title.as_str(),
                courses.as_str(),
                now.as_str(),
            ],
        )
        .await
        .map_err(|e| HtcError::Storage(e.to_string()))?;
    }
    Ok(())
}

async fn clear_on(conn: &Connection) -> Result<u64> {
    conn.execute("DELETE FROM meals", params![])
        .await
        .map_err(|e| HtcError::Storage(e.to_string()))?;
    conn.execute("DELETE FROM entities", params![])
        .await
        .map_err(|e| HtcError::Storage(e.to_string()))
}

/// Convert a database row to a [`Meal`].
fn row_to_meal(row: &libsql::Row) -> Result<Meal> {
    let day = match row.get::<String>(1) {
        Ok(raw) => Some(
            NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
                .map_err(|e| HtcError::Storage(format!("invalid meal day '{raw}': {e}")))?,
        ),
        Err(_) => None,
    };
    let courses_json = row
        .get::<String>(3)
        .map_err(|e| HtcError::Storage(e.to_string()))?;

    Ok(Meal {
        restaurant_url: row
            .get::<String>(0)
            .map_err(|e| HtcError::Storage(e.to_string()))?,
        day,
        title: row
            .get::<String>(2)
            .map_err(|e| HtcError::Storage(e.to_string()))?,
        courses: serde_json::from_str(&courses_json)
            .map_err(|e| HtcError::Storage(format!("invalid courses_json: {e}")))?,
    })
}

/// Convert a database row to an [`Entity`].
fn row_to_entity(row: &libsql::Row) -> Result<Entity> {
    Ok(Entity {
        url: row
            .get::<String>(0)
            .map_err(|e| HtcError::Storage(e.to_string()))?,
        name: row
            .get::<String>(1)
            .map_err(|e| HtcError::Storage(e.to_string()))?,
        label: row
            .get::<String>(2)
            .map_err(|e| HtcError::Storage(e.to_string()))?,
        coordinates: Coordinates::new(
            row.get::<f64>(3)
                .map_err(|e| HtcError::Storage(e.to_string()))?,
            row.get::<f64>(4)
                .map_err(|e| HtcError::Storage(e.to_string()))?,
        ),
        opening_hours: row.get::<String>(5).ok(),
        enriched: row.get::<i64>(6).map(|v| v != 0).unwrap_or(false),
        meals: Vec::new(),
    })
}
