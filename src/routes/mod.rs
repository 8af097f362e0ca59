use actix_web::web;
use chrono::Utc;

use crate::{
    error::AppResult,
    forms::{AppointmentInput, FormErrors, LookupChoices},
    models::{AppointmentQuery, AppointmentRow, LookupKind, LookupRow, NewAppointment},
    pagination::Page,
    state::AppState,
    uploads::{self, ImageUpload},
};

const INVALID_IMAGE: &str = "Envie uma imagem válida (JPEG, PNG, GIF ou WebP).";

pub mod admin;
pub mod public;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.configure(public::configure).configure(admin::configure);
}

#[derive(Clone, Debug)]
pub struct AppointmentView {
    pub id: i64,
    pub full_name: String,
    pub tax_id: String,
    pub email: String,
    pub contact: String,
    pub service_description: String,
    pub scheduled_for: String,
    pub price: String,
    pub image: String,
    pub has_image: bool,
    pub gender: String,
    pub age_bracket: String,
    pub visible: bool,
}

pub fn to_view(row: AppointmentRow) -> AppointmentView {
    let scheduled_for = crate::forms::parse_datetime(&row.scheduled_for)
        .map(|value| value.format("%d/%m/%Y %H:%M").to_string())
        .unwrap_or_else(|| row.scheduled_for.clone());
    AppointmentView {
        id: row.id,
        full_name: row.full_name(),
        has_image: !row.image.trim().is_empty(),
        tax_id: row.tax_id,
        email: row.email,
        contact: row.contact,
        service_description: row.service_description,
        scheduled_for,
        price: row.price,
        image: row.image,
        gender: row.gender_name.unwrap_or_default(),
        age_bracket: row.age_bracket_name.unwrap_or_default(),
        visible: row.visible,
    }
}

#[derive(Clone, Debug)]
pub struct ChoiceView {
    pub id: i64,
    pub name: String,
    pub selected: bool,
}

pub fn choice_views(rows: &[LookupRow], selected: &str) -> Vec<ChoiceView> {
    let selected = selected.trim().parse::<i64>().ok();
    rows.iter()
        .map(|row| ChoiceView {
            id: row.id,
            name: row.name.clone(),
            selected: selected == Some(row.id),
        })
        .collect()
}

pub async fn load_choices(state: &AppState) -> AppResult<LookupChoices> {
    Ok(LookupChoices {
        genders: state.store.list_lookups(LookupKind::Gender).await?,
        age_brackets: state.store.list_lookups(LookupKind::AgeBracket).await?,
    })
}

/// Reads one page of appointments. Storage failures are logged and render as
/// an empty page rather than an error.
pub async fn load_page(
    state: &AppState,
    query: &AppointmentQuery,
    requested: Option<&str>,
    per_page: i64,
) -> (Vec<AppointmentView>, Page) {
    let total = state.store.count_appointments(query).await.unwrap_or_else(|err| {
        log::error!("Counting appointments failed: {err}");
        0
    });
    let page = Page::resolve(requested, total, per_page);
    let rows = state
        .store
        .list_appointments(query, page.per_page, page.offset())
        .await
        .unwrap_or_else(|err| {
            log::error!("Listing appointments failed: {err}");
            Vec::new()
        });
    (rows.into_iter().map(to_view).collect(), page)
}

/// Validates an appointment form and stores its uploaded image. The media
/// directory is only written once every field is valid.
pub async fn accept_submission(
    state: &AppState,
    input: &AppointmentInput,
    image: Option<ImageUpload>,
    clear_image: bool,
    choices: &LookupChoices,
) -> AppResult<Result<NewAppointment, FormErrors>> {
    let validated = input.validate(choices);
    let extension = match &image {
        Some(upload) => match upload.extension {
            Some(extension) => Some(extension),
            None => {
                let mut errors = validated.err().unwrap_or_default();
                errors.add("image", INVALID_IMAGE);
                return Ok(Err(errors));
            }
        },
        None => None,
    };

    let mut appointment = match validated {
        Ok(appointment) => appointment,
        Err(errors) => return Ok(Err(errors)),
    };
    if clear_image {
        appointment.image.clear();
    }
    if let (Some(upload), Some(extension)) = (image, extension) {
        appointment.image =
            uploads::save_image(&state.media_root, upload.bytes, extension, Utc::now()).await?;
        log::info!("Stored uploaded image {}", appointment.image);
    }
    Ok(Ok(appointment))
}
