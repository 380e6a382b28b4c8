// Importe le pool de connexions SQLite de SQLx et le logger `info` de `tracing`.
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::info;

// Une migration versionnée, intégrée au binaire.
struct Migration {
    // Le numéro de version, utilisé pour l'ordre d'application.
    version: i32,
    name: &'static str,
    // `include_str!` intègre le fichier SQL au moment de la compilation.
    sql: &'static str,
}

// L'ordre est important.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_drugs",
        sql: include_str!("../migrations/001_create_drugs.sql"),
    },
    Migration {
        version: 2,
        name: "create_cache",
        sql: include_str!("../migrations/002_create_cache.sql"),
    },
];

// Ouvre (ou crée) la base et applique les migrations manquantes.
pub async fn init_database(db_file: &str) -> Result<SqlitePool, sqlx::Error> {
    let url = format!("sqlite:{}?mode=rwc", db_file);

    // Une base en mémoire disparaît avec sa dernière connexion :
    // on garde une seule connexion, jamais recyclée.
    let pool = if db_file == ":memory:" {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect(&url)
            .await?
    } else {
        SqlitePoolOptions::new()
            .max_connections(10)
            .connect(&url)
            .await?
    };

    // --- Configuration SQLite ---
    // `journal_mode = WAL` : les lecteurs (sessions de calcul) ne sont pas bloqués par les écritures du workflow.
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;
    // `synchronous = NORMAL` : moins de `fsync`, risque minime en cas de crash système.
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&pool)
        .await?;
    // 32MB de cache de pages.
    sqlx::query("PRAGMA cache_size = -32000")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA temp_store = MEMORY")
        .execute(&pool)
        .await?;
    // Attend 5s si la base est verrouillée avant de retourner une erreur.
    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;

    // Table de suivi des migrations déjà appliquées.
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at REAL NOT NULL
        )",
    )
    .execute(&pool)
    .await?;

    for migration in MIGRATIONS {
        let applied =
            sqlx::query_as::<_, (i32,)>("SELECT version FROM schema_migrations WHERE version = ?")
                .bind(migration.version)
                .fetch_optional(&pool)
                .await?
                .is_some();

        if !applied {
            info!(
                "Running migration {}: {}",
                migration.version, migration.name
            );

            // Chaque migration s'exécute dans sa propre transaction : tout ou rien.
            let mut tx = pool.begin().await?;
            sqlx::raw_sql(migration.sql).execute(&mut *tx).await?;

            sqlx::query(
                "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?, ?, ?)",
            )
            .bind(migration.version)
            .bind(migration.name)
            .bind(current_timestamp())
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;

            info!("Migration {} applied successfully", migration.version);
        } else {
            info!("Migration {} already applied, skipping", migration.version);
        }
    }

    info!("Database initialization complete");

    Ok(pool)
}

// Timestamp actuel en secondes (f64). Une horloge antérieure à l'epoch donne 0.
pub fn current_timestamp() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}
