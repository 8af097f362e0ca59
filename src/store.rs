use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::models::{
    AdminLogRow, AppointmentOrder, AppointmentQuery, AppointmentRow, LookupKind, LookupRow,
    NewAppointment, NewLogEntry, NewUser, SiteCounts, UserRow, DATETIME_FORMAT,
};

pub type StoreResult<T> = Result<T, sqlx::Error>;

/// Every read and write the application performs goes through this trait.
/// Handlers receive it from `AppState` and never assemble SQL themselves.
#[async_trait]
pub trait AgendaStore: Send + Sync {
    async fn count_appointments(&self, query: &AppointmentQuery) -> StoreResult<i64>;
    async fn list_appointments(
        &self,
        query: &AppointmentQuery,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<AppointmentRow>>;
    async fn find_appointment(&self, id: i64) -> StoreResult<Option<AppointmentRow>>;
    async fn insert_appointment(&self, appointment: &NewAppointment) -> StoreResult<i64>;
    async fn update_appointment(&self, id: i64, appointment: &NewAppointment) -> StoreResult<bool>;
    async fn delete_appointment(&self, id: i64) -> StoreResult<bool>;

    async fn list_lookups(&self, kind: LookupKind) -> StoreResult<Vec<LookupRow>>;
    async fn find_lookup(&self, kind: LookupKind, id: i64) -> StoreResult<Option<LookupRow>>;
    async fn insert_lookup(&self, kind: LookupKind, name: &str) -> StoreResult<i64>;
    async fn rename_lookup(&self, kind: LookupKind, id: i64, name: &str) -> StoreResult<bool>;
    /// Deleting a lookup row clears the reference on every appointment using it.
    async fn delete_lookup(&self, kind: LookupKind, id: i64) -> StoreResult<bool>;

    async fn find_user(&self, id: i64) -> StoreResult<Option<UserRow>>;
    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<UserRow>>;
    async fn email_in_use(&self, email: &str) -> StoreResult<bool>;
    async fn username_taken(&self, username: &str) -> StoreResult<bool>;
    async fn insert_user(&self, user: &NewUser) -> StoreResult<i64>;
    async fn record_login(&self, id: i64, at: DateTime<Utc>) -> StoreResult<()>;
    async fn list_users(&self) -> StoreResult<Vec<UserRow>>;
    async fn set_user_flags(&self, id: i64, is_active: bool, is_staff: bool) -> StoreResult<bool>;

    async fn site_counts(&self) -> StoreResult<SiteCounts>;
    async fn log_action(&self, entry: &NewLogEntry) -> StoreResult<()>;
    async fn recent_actions(&self, user_id: i64, limit: i64) -> StoreResult<Vec<AdminLogRow>>;
}

const APPOINTMENT_SELECT: &str = r#"SELECT a.id, a.name, a.surname, a.tax_id, a.email, a.contact,
       a.service_description, a.scheduled_for, a.price, a.visible, a.image,
       a.gender_id, a.age_bracket_id,
       g.name AS gender_name, f.name AS age_bracket_name
FROM appointments a
LEFT JOIN genders g ON a.gender_id = g.id
LEFT JOIN age_brackets f ON a.age_bracket_id = f.id"#;

const USER_COLUMNS: &str = "id, username, password_hash, email, first_name, last_name, \
     is_staff, is_superuser, is_active, last_login, date_joined";

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// True when the database refused a row because a UNIQUE column already holds its value.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

/// Escapes LIKE wildcards so the term only ever matches as a literal substring.
fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for ch in term.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

fn push_appointment_filters(builder: &mut QueryBuilder<'_, Sqlite>, query: &AppointmentQuery) {
    builder.push(" WHERE 1 = 1");
    if query.visible_only {
        builder.push(" AND a.visible = 1");
    }
    if let Some(term) = query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|term| !term.is_empty())
    {
        let pattern = like_pattern(term);
        builder
            .push(" AND (a.name LIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\' OR a.surname LIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\' OR a.scheduled_for LIKE ")
            .push_bind(pattern)
            .push(" ESCAPE '\\')");
    }
    if let Some(day) = query.scheduled_on {
        builder
            .push(" AND substr(a.scheduled_for, 1, 10) = ")
            .push_bind(day.format("%Y-%m-%d").to_string());
    }
}

#[async_trait]
impl AgendaStore for SqliteStore {
    async fn count_appointments(&self, query: &AppointmentQuery) -> StoreResult<i64> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM appointments a");
        push_appointment_filters(&mut builder, query);
        builder
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
    }

    async fn list_appointments(
        &self,
        query: &AppointmentQuery,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<AppointmentRow>> {
        let mut builder = QueryBuilder::<Sqlite>::new(APPOINTMENT_SELECT);
        push_appointment_filters(&mut builder, query);
        builder.push(match query.order {
            AppointmentOrder::Newest => " ORDER BY a.id DESC",
            AppointmentOrder::Scheduled => " ORDER BY a.scheduled_for ASC, a.id ASC",
        });
        builder
            .push(" LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);
        builder
            .build_query_as::<AppointmentRow>()
            .fetch_all(&self.pool)
            .await
    }

    async fn find_appointment(&self, id: i64) -> StoreResult<Option<AppointmentRow>> {
        sqlx::query_as::<_, AppointmentRow>(&format!("{APPOINTMENT_SELECT} WHERE a.id = ? LIMIT 1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn insert_appointment(&self, appointment: &NewAppointment) -> StoreResult<i64> {
        let result = sqlx::query(
            r#"INSERT INTO appointments
               (name, surname, tax_id, email, contact, service_description, scheduled_for,
                price, visible, image, gender_id, age_bracket_id)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&appointment.name)
        .bind(&appointment.surname)
        .bind(&appointment.tax_id)
        .bind(&appointment.email)
        .bind(&appointment.contact)
        .bind(&appointment.service_description)
        .bind(appointment.scheduled_for.format(DATETIME_FORMAT).to_string())
        .bind(&appointment.price)
        .bind(appointment.visible)
        .bind(&appointment.image)
        .bind(appointment.gender_id)
        .bind(appointment.age_bracket_id)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn update_appointment(&self, id: i64, appointment: &NewAppointment) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"UPDATE appointments
               SET name = ?, surname = ?, tax_id = ?, email = ?, contact = ?,
                   service_description = ?, scheduled_for = ?, price = ?, visible = ?,
                   image = ?, gender_id = ?, age_bracket_id = ?
               WHERE id = ?"#,
        )
        .bind(&appointment.name)
        .bind(&appointment.surname)
        .bind(&appointment.tax_id)
        .bind(&appointment.email)
        .bind(&appointment.contact)
        .bind(&appointment.service_description)
        .bind(appointment.scheduled_for.format(DATETIME_FORMAT).to_string())
        .bind(&appointment.price)
        .bind(appointment.visible)
        .bind(&appointment.image)
        .bind(appointment.gender_id)
        .bind(appointment.age_bracket_id)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_appointment(&self, id: i64) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM appointments WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_lookups(&self, kind: LookupKind) -> StoreResult<Vec<LookupRow>> {
        sqlx::query_as::<_, LookupRow>(&format!(
            "SELECT id, name FROM {} ORDER BY name, id",
            kind.table()
        ))
        .fetch_all(&self.pool)
        .await
    }

    async fn find_lookup(&self, kind: LookupKind, id: i64) -> StoreResult<Option<LookupRow>> {
        sqlx::query_as::<_, LookupRow>(&format!(
            "SELECT id, name FROM {} WHERE id = ? LIMIT 1",
            kind.table()
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn insert_lookup(&self, kind: LookupKind, name: &str) -> StoreResult<i64> {
        let result = sqlx::query(&format!("INSERT INTO {} (name) VALUES (?)", kind.table()))
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    async fn rename_lookup(&self, kind: LookupKind, id: i64, name: &str) -> StoreResult<bool> {
        let result = sqlx::query(&format!("UPDATE {} SET name = ? WHERE id = ?", kind.table()))
            .bind(name)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_lookup(&self, kind: LookupKind, id: i64) -> StoreResult<bool> {
        // The foreign key already nullifies references; this keeps the behaviour
        // when a connection runs with foreign keys disabled.
        sqlx::query(&format!(
            "UPDATE appointments SET {column} = NULL WHERE {column} = ?",
            column = kind.reference_column()
        ))
        .bind(id)
        .execute(&self.pool)
        .await?;
        let result = sqlx::query(&format!("DELETE FROM {} WHERE id = ?", kind.table()))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_user(&self, id: i64) -> StoreResult<Option<UserRow>> {
        sqlx::query_as::<_, UserRow>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ? LIMIT 1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<UserRow>> {
        sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = ? LIMIT 1"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await
    }

    async fn email_in_use(&self, email: &str) -> StoreResult<bool> {
        let existing = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM users WHERE email = ? COLLATE NOCASE LIMIT 1",
        )
        .bind(email.trim())
        .fetch_optional(&self.pool)
        .await?;
        Ok(existing.is_some())
    }

    async fn username_taken(&self, username: &str) -> StoreResult<bool> {
        let existing = sqlx::query_scalar::<_, i64>("SELECT id FROM users WHERE username = ? LIMIT 1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(existing.is_some())
    }

    async fn insert_user(&self, user: &NewUser) -> StoreResult<i64> {
        let result = sqlx::query(
            r#"INSERT INTO users
               (username, password_hash, email, first_name, last_name, is_staff, is_superuser,
                is_active, last_login, date_joined)
               VALUES (?, ?, ?, ?, ?, ?, ?, 1, NULL, ?)"#,
        )
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(&user.email)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.is_staff)
        .bind(user.is_superuser)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn record_login(&self, id: i64, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query("UPDATE users SET last_login = ? WHERE id = ?")
            .bind(at.to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_users(&self) -> StoreResult<Vec<UserRow>> {
        sqlx::query_as::<_, UserRow>(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY username"))
            .fetch_all(&self.pool)
            .await
    }

    async fn set_user_flags(&self, id: i64, is_active: bool, is_staff: bool) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE users SET is_active = ?, is_staff = ? WHERE id = ?")
            .bind(is_active)
            .bind(is_staff)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn site_counts(&self) -> StoreResult<SiteCounts> {
        let (appointments, genders, age_brackets, users) = sqlx::query_as::<_, (i64, i64, i64, i64)>(
            r#"SELECT (SELECT COUNT(*) FROM appointments),
                      (SELECT COUNT(*) FROM genders),
                      (SELECT COUNT(*) FROM age_brackets),
                      (SELECT COUNT(*) FROM users)"#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(SiteCounts {
            appointments,
            genders,
            age_brackets,
            users,
        })
    }

    async fn log_action(&self, entry: &NewLogEntry) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO admin_log
               (action_time, user_id, object_type, object_id, object_repr, action_flag, change_message)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(entry.user_id)
        .bind(&entry.object_type)
        .bind(&entry.object_id)
        .bind(&entry.object_repr)
        .bind(entry.action_flag.code())
        .bind(&entry.change_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_actions(&self, user_id: i64, limit: i64) -> StoreResult<Vec<AdminLogRow>> {
        sqlx::query_as::<_, AdminLogRow>(
            r#"SELECT action_time, object_type, object_id, object_repr, action_flag, change_message
               FROM admin_log
               WHERE user_id = ?
               ORDER BY action_time DESC, id DESC
               LIMIT ?"#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }
}
