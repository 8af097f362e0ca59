use std::{fs, path::Path, str::FromStr};

use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};

use crate::{
    auth::hash_password,
    config::AppConfig,
    models::{LookupKind, NewUser},
    store::AgendaStore,
};

const DEFAULT_GENDERS: [&str; 5] = [
    "Masculino",
    "Feminino",
    "Prefiro não responder",
    "Não-binário",
    "Outro",
];

const DEFAULT_AGE_BRACKETS: [&str; 4] = [
    "Criança (0-12)",
    "Adolescente (13-17)",
    "Adulto (18-59)",
    "Idoso (60+)",
];

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

pub async fn connect(config: &AppConfig) -> Result<SqlitePool, Box<dyn std::error::Error>> {
    ensure_sqlite_dir(&config.database_url)?;

    let connect_options = SqliteConnectOptions::from_str(&config.database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(connect_options)
        .await?;
    Ok(pool)
}

pub fn ensure_sqlite_dir(db_url: &str) -> std::io::Result<()> {
    let path = db_url
        .strip_prefix("sqlite://")
        .or_else(|| db_url.strip_prefix("sqlite:"));

    let Some(path) = path else {
        return Ok(());
    };

    let path = path.split('?').next().unwrap_or(path);
    if path == ":memory:" || path.is_empty() {
        return Ok(());
    }

    let path = path.strip_prefix("file:").unwrap_or(path);
    if let Some(parent) = Path::new(path).parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

pub async fn seed_defaults(store: &dyn AgendaStore, config: &AppConfig) -> Result<(), sqlx::Error> {
    seed_admin(store, config).await?;
    if config.seed_lookups {
        seed_lookup(store, LookupKind::Gender, &DEFAULT_GENDERS).await?;
        seed_lookup(store, LookupKind::AgeBracket, &DEFAULT_AGE_BRACKETS).await?;
    }
    Ok(())
}

async fn seed_admin(store: &dyn AgendaStore, config: &AppConfig) -> Result<(), sqlx::Error> {
    let admin = &config.admin;
    if store.username_taken(&admin.username).await? {
        return Ok(());
    }

    if admin.uses_default_password() {
        log::warn!("ADMIN_PASSWORD not set. Using default password 'admin'. Set ADMIN_PASSWORD in production.");
    }

    let password_hash = hash_password(&admin.password)
        .map_err(|_| sqlx::Error::Protocol("password hash failed".into()))?;

    store
        .insert_user(&NewUser {
            username: admin.username.clone(),
            password_hash,
            email: admin.email.clone(),
            first_name: String::new(),
            last_name: String::new(),
            is_staff: true,
            is_superuser: true,
        })
        .await?;
    log::info!("Created superuser '{}'", admin.username);
    Ok(())
}

/// Fills a lookup table only while it is still empty, so admin edits survive restarts.
async fn seed_lookup(
    store: &dyn AgendaStore,
    kind: LookupKind,
    names: &[&str],
) -> Result<(), sqlx::Error> {
    if !store.list_lookups(kind).await?.is_empty() {
        return Ok(());
    }
    for name in names {
        store.insert_lookup(kind, name).await?;
    }
    log::info!("Seeded {} {}", names.len(), kind.table());
    Ok(())
}
