//! SQL migration definitions for the htc database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: entities, scrape_runs",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Enriched restaurants, keyed by detail-page URL
CREATE TABLE IF NOT EXISTS entities (
    url           TEXT PRIMARY KEY,
    name          TEXT NOT NULL,
    label         TEXT NOT NULL,
    latitude      REAL NOT NULL DEFAULT 0,
    longitude     REAL NOT NULL DEFAULT 0,
    opening_hours TEXT,
    enriched      INTEGER NOT NULL DEFAULT 0,
    updated_at    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_entities_label ON entities(label);

-- Scrape run history
CREATE TABLE IF NOT EXISTS scrape_runs (
    id          TEXT PRIMARY KEY,
    listing_url TEXT NOT NULL,
    started_at  TEXT NOT NULL,
    finished_at TEXT,
    stats_json  TEXT
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Daily menus per restaurant",
            sql: r#"
CREATE TABLE IF NOT EXISTS meals (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    restaurant_url TEXT NOT NULL,
    day            TEXT,
    title          TEXT NOT NULL,
    courses_json   TEXT NOT NULL DEFAULT '[]',
    updated_at     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_meals_restaurant ON meals(restaurant_url, day);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
