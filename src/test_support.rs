use std::{path::PathBuf, sync::Arc};

use actix_web::http::header;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::NaiveDate;
use rand_core::{OsRng, RngCore};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::{
    auth::hash_password,
    db,
    models::{NewAppointment, NewUser},
    state::AppState,
    store::{AgendaStore, SqliteStore},
};

pub const STAFF_USER: &str = "admin";
pub const STAFF_PASSWORD: &str = "admin-secret";

/// Signature plus IHDR start of a PNG file.
pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n\x00\x00\x00\x0dIHDR\x00\x00\x00\x01\x00\x00\x00\x01";

const MULTIPART_BOUNDARY: &str = "agenda-test-boundary";

/// A migrated private in-memory database. One connection keeps every
/// query on the same database.
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    db::run_migrations(&pool).await.expect("migrations");
    pool
}

pub async fn test_store() -> SqliteStore {
    SqliteStore::new(test_pool().await)
}

pub async fn test_state() -> (AppState, SqliteStore) {
    let store = test_store().await;
    let state = AppState::new(Arc::new(store.clone()), temp_media_root());
    (state, store)
}

/// A fresh, empty media directory under the system temp dir.
pub fn temp_media_root() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("agenda-media-{:016x}", OsRng.next_u64()));
    std::fs::create_dir_all(&dir).expect("media dir");
    dir
}

/// A `multipart/form-data` body as a browser would post the appointment form.
pub fn multipart_form(
    fields: &[(&str, &str)],
    image: Option<(&str, &[u8])>,
) -> ((header::HeaderName, String), Vec<u8>) {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{MULTIPART_BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((file_name, bytes)) = image {
        body.extend_from_slice(
            format!(
                "--{MULTIPART_BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{MULTIPART_BOUNDARY}--\r\n").as_bytes());
    (
        (
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={MULTIPART_BOUNDARY}"),
        ),
        body,
    )
}

pub fn sample_appointment(name: &str, surname: &str) -> NewAppointment {
    NewAppointment {
        name: name.to_string(),
        surname: surname.to_string(),
        tax_id: "123.456.789-00".to_string(),
        email: String::new(),
        contact: "(11) 98765-4321".to_string(),
        service_description: "Corte de cabelo".to_string(),
        scheduled_for: NaiveDate::from_ymd_opt(2025, 4, 6)
            .and_then(|day| day.and_hms_opt(20, 0, 0))
            .expect("valid date"),
        price: "50,00".to_string(),
        visible: true,
        image: String::new(),
        gender_id: None,
        age_bracket_id: None,
    }
}

pub async fn create_user(store: &SqliteStore, username: &str, password: &str, is_staff: bool) -> i64 {
    store
        .insert_user(&NewUser {
            username: username.to_string(),
            password_hash: hash_password(password).expect("hash"),
            email: format!("{username}@example.com"),
            first_name: username.to_string(),
            last_name: "Teste".to_string(),
            is_staff,
            is_superuser: is_staff,
        })
        .await
        .expect("insert user")
}

pub fn basic_auth(username: &str, password: &str) -> (header::HeaderName, String) {
    let token = STANDARD.encode(format!("{username}:{password}"));
    (header::AUTHORIZATION, format!("Basic {token}"))
}

pub async fn body_string(resp: actix_web::dev::ServiceResponse<impl actix_web::body::MessageBody>) -> String {
    let bytes = actix_web::test::read_body(resp).await;
    String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}
