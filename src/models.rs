use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

pub const LIST_PAGE_SIZE: i64 = 8;
pub const SEARCH_PAGE_SIZE: i64 = 4;
pub const ADMIN_PAGE_SIZE: i64 = 10;

/// Storage format of `appointments.scheduled_for`. Search matches against this text.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AppointmentRow {
    pub id: i64,
    pub name: String,
    pub surname: String,
    pub tax_id: String,
    pub email: String,
    pub contact: String,
    pub service_description: String,
    pub scheduled_for: String,
    pub price: String,
    pub visible: bool,
    pub image: String,
    pub gender_id: Option<i64>,
    pub age_bracket_id: Option<i64>,
    pub gender_name: Option<String>,
    pub age_bracket_name: Option<String>,
}

impl AppointmentRow {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.name, self.surname).trim().to_string()
    }
}

/// Validated appointment fields, ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAppointment {
    pub name: String,
    pub surname: String,
    pub tax_id: String,
    pub email: String,
    pub contact: String,
    pub service_description: String,
    pub scheduled_for: NaiveDateTime,
    pub price: String,
    pub visible: bool,
    pub image: String,
    pub gender_id: Option<i64>,
    pub age_bracket_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppointmentOrder {
    /// Insertion order, newest first.
    Newest,
    /// Scheduled date-time, earliest first.
    Scheduled,
}

#[derive(Debug, Clone)]
pub struct AppointmentQuery {
    pub search: Option<String>,
    pub visible_only: bool,
    pub scheduled_on: Option<NaiveDate>,
    pub order: AppointmentOrder,
}

impl AppointmentQuery {
    pub fn visible() -> Self {
        Self {
            search: None,
            visible_only: true,
            scheduled_on: None,
            order: AppointmentOrder::Newest,
        }
    }

    pub fn search(term: &str) -> Self {
        Self {
            search: Some(term.to_string()),
            ..Self::visible()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupKind {
    Gender,
    AgeBracket,
}

impl LookupKind {
    pub const ALL: [LookupKind; 2] = [LookupKind::Gender, LookupKind::AgeBracket];

    pub fn table(self) -> &'static str {
        match self {
            LookupKind::Gender => "genders",
            LookupKind::AgeBracket => "age_brackets",
        }
    }

    /// Column on `appointments` that references this lookup.
    pub fn reference_column(self) -> &'static str {
        match self {
            LookupKind::Gender => "gender_id",
            LookupKind::AgeBracket => "age_bracket_id",
        }
    }

    pub fn slug(self) -> &'static str {
        match self {
            LookupKind::Gender => "generos",
            LookupKind::AgeBracket => "faixas-etarias",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.slug() == slug)
    }

    pub fn label(self) -> &'static str {
        match self {
            LookupKind::Gender => "Gênero",
            LookupKind::AgeBracket => "Faixa etária",
        }
    }

    pub fn label_plural(self) -> &'static str {
        match self {
            LookupKind::Gender => "Gêneros",
            LookupKind::AgeBracket => "Faixas etárias",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize)]
pub struct LookupRow {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub is_active: bool,
    pub last_login: Option<String>,
    pub date_joined: String,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub is_staff: bool,
    pub is_superuser: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionFlag {
    Addition = 1,
    Change = 2,
    Deletion = 3,
}

impl ActionFlag {
    pub fn code(self) -> i64 {
        self as i64
    }
}

#[derive(Debug, Clone)]
pub struct NewLogEntry {
    pub user_id: i64,
    pub object_type: String,
    pub object_id: String,
    pub object_repr: String,
    pub action_flag: ActionFlag,
    pub change_message: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AdminLogRow {
    pub action_time: String,
    pub object_type: String,
    pub object_id: String,
    pub object_repr: String,
    pub action_flag: i64,
    pub change_message: String,
}

impl AdminLogRow {
    pub fn is_addition(&self) -> bool {
        self.action_flag == ActionFlag::Addition.code()
    }

    pub fn is_change(&self) -> bool {
        self.action_flag == ActionFlag::Change.code()
    }

    pub fn is_deletion(&self) -> bool {
        self.action_flag == ActionFlag::Deletion.code()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SiteCounts {
    pub appointments: i64,
    pub genders: i64,
    pub age_brackets: i64,
    pub users: i64,
}
