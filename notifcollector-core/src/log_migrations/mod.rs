//! Log database migrations - embedded SQL files
//!
//! Kept separate from the collector schema so logs.duckdb can be cleared
//! without touching the event queue.

/// All log migrations, embedded at compile time.
/// Format: (filename, sql_content)
pub const LOG_MIGRATIONS: &[(&str, &str)] = &[
    ("000_migrations.sql", include_str!("000_migrations.sql")),
    (
        "001_logs_schema.sql",
        include_str!("001_logs_schema.sql"),
    ),
];
