use anyhow::Result;
use sqlx::SqlitePool;

/// Create the collection and entry tables. Safe to run on every startup.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS collections (
            name TEXT PRIMARY KEY,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per document record. Embedding is a little-endian f32 blob,
    // NULL when the collection was built without vectors.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entries (
            id TEXT NOT NULL,
            collection TEXT NOT NULL,
            position INTEGER NOT NULL,
            content TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            embedding BLOB,
            dims INTEGER,
            PRIMARY KEY (collection, id),
            FOREIGN KEY (collection) REFERENCES collections(name) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_entries_collection_position ON entries(collection, position)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
