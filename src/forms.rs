use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use email_address::{EmailAddress, Options};
use serde::Deserialize;

use crate::models::{AppointmentRow, LookupRow, NewAppointment, DATETIME_FORMAT};

const REQUIRED: &str = "Este campo é obrigatório.";
const INVALID_CHOICE: &str = "Selecione uma opção válida.";
const INVALID_EMAIL: &str = "Informe um endereço de email válido.";

/// Field name to first error message.
#[derive(Debug, Default, Clone)]
pub struct FormErrors {
    fields: BTreeMap<&'static str, String>,
}

impl FormErrors {
    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.fields.entry(field).or_insert_with(|| message.into());
    }

    pub fn has(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn get(&self, field: &str) -> &str {
        self.fields.get(field).map(String::as_str).unwrap_or("")
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }
}

/// Only a bare `local@domain.tld` address is accepted. Display text such as
/// `Name <addr>` and single-label domains are rejected so the stored value is
/// exactly the address that uniqueness checks compare.
pub fn is_plain_email(value: &str) -> bool {
    let options = Options::default()
        .without_display_text()
        .without_domain_literal()
        .with_required_tld();
    EmailAddress::parse_with_options(value, options)
        .map(|address| address.email() == value)
        .unwrap_or(false)
}

fn too_long(max: usize) -> String {
    format!("Certifique-se de que o valor tenha no máximo {max} caracteres.")
}

fn text(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("")
}

fn check_text(
    errors: &mut FormErrors,
    field: &'static str,
    value: &Option<String>,
    required: bool,
    max: usize,
) -> String {
    let value = text(value).trim();
    if required && value.is_empty() {
        errors.add(field, REQUIRED);
    } else if value.chars().count() > max {
        errors.add(field, too_long(max));
    }
    value.to_string()
}

fn check_choice(
    errors: &mut FormErrors,
    field: &'static str,
    value: &Option<String>,
    choices: &[LookupRow],
) -> Option<i64> {
    let value = text(value).trim();
    if value.is_empty() {
        return None;
    }
    match value.parse::<i64>() {
        Ok(id) if choices.iter().any(|choice| choice.id == id) => Some(id),
        _ => {
            errors.add(field, INVALID_CHOICE);
            None
        }
    }
}

/// Accepts what `datetime-local` inputs send as well as the storage format.
pub fn parse_datetime(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    const FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M",
        DATETIME_FORMAT,
    ];
    FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|day| day.and_hms_opt(0, 0, 0))
        })
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "on" | "true" => Some(true),
        "0" | "off" | "false" => Some(false),
        _ => None,
    }
}

/// Lookup rows offered as choices on the appointment form.
#[derive(Debug, Clone, Default)]
pub struct LookupChoices {
    pub genders: Vec<LookupRow>,
    pub age_brackets: Vec<LookupRow>,
}

/// Raw appointment submission. A field is `None` when the browser did not send it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppointmentInput {
    pub name: Option<String>,
    pub surname: Option<String>,
    pub tax_id: Option<String>,
    pub email: Option<String>,
    pub contact: Option<String>,
    pub service_description: Option<String>,
    pub scheduled_for: Option<String>,
    pub price: Option<String>,
    pub image: Option<String>,
    pub gender_id: Option<String>,
    pub age_bracket_id: Option<String>,
    pub visible: Option<String>,
}

impl AppointmentInput {
    pub fn from_row(row: &AppointmentRow) -> Self {
        let scheduled_for = parse_datetime(&row.scheduled_for)
            .map(|value| {
                if value.second() == 0 {
                    value.format("%Y-%m-%dT%H:%M").to_string()
                } else {
                    value.format("%Y-%m-%dT%H:%M:%S").to_string()
                }
            })
            .unwrap_or_else(|| row.scheduled_for.clone());
        Self {
            name: Some(row.name.clone()),
            surname: Some(row.surname.clone()),
            tax_id: Some(row.tax_id.clone()),
            email: Some(row.email.clone()),
            contact: Some(row.contact.clone()),
            service_description: Some(row.service_description.clone()),
            scheduled_for: Some(scheduled_for),
            price: Some(row.price.clone()),
            image: Some(row.image.clone()),
            gender_id: row.gender_id.map(|id| id.to_string()),
            age_bracket_id: row.age_bracket_id.map(|id| id.to_string()),
            visible: Some(if row.visible { "1" } else { "0" }.to_string()),
        }
    }

    /// Submitted fields replace stored ones; fields the browser left out keep
    /// their stored value.
    pub fn overlay(self, submitted: AppointmentInput) -> Self {
        Self {
            name: submitted.name.or(self.name),
            surname: submitted.surname.or(self.surname),
            tax_id: submitted.tax_id.or(self.tax_id),
            email: submitted.email.or(self.email),
            contact: submitted.contact.or(self.contact),
            service_description: submitted.service_description.or(self.service_description),
            scheduled_for: submitted.scheduled_for.or(self.scheduled_for),
            price: submitted.price.or(self.price),
            image: submitted.image.or(self.image),
            gender_id: submitted.gender_id.or(self.gender_id),
            age_bracket_id: submitted.age_bracket_id.or(self.age_bracket_id),
            visible: submitted.visible.or(self.visible),
        }
    }

    /// Assigns a field by its form name. Unknown names are ignored.
    pub fn set_field(&mut self, name: &str, value: String) {
        let slot = match name {
            "name" => &mut self.name,
            "surname" => &mut self.surname,
            "tax_id" => &mut self.tax_id,
            "email" => &mut self.email,
            "contact" => &mut self.contact,
            "service_description" => &mut self.service_description,
            "scheduled_for" => &mut self.scheduled_for,
            "price" => &mut self.price,
            "image" => &mut self.image,
            "gender_id" => &mut self.gender_id,
            "age_bracket_id" => &mut self.age_bracket_id,
            "visible" => &mut self.visible,
            _ => return,
        };
        *slot = Some(value);
    }

    /// Current value of a field for re-rendering the form.
    pub fn field(&self, name: &str) -> &str {
        match name {
            "name" => text(&self.name),
            "surname" => text(&self.surname),
            "tax_id" => text(&self.tax_id),
            "email" => text(&self.email),
            "contact" => text(&self.contact),
            "service_description" => text(&self.service_description),
            "scheduled_for" => text(&self.scheduled_for),
            "price" => text(&self.price),
            "image" => text(&self.image),
            "gender_id" => text(&self.gender_id),
            "age_bracket_id" => text(&self.age_bracket_id),
            "visible" => text(&self.visible),
            _ => "",
        }
    }

    pub fn is_visible(&self) -> bool {
        self.visible
            .as_deref()
            .and_then(parse_flag)
            .unwrap_or(true)
    }

    pub fn validate(&self, choices: &LookupChoices) -> Result<NewAppointment, FormErrors> {
        let mut errors = FormErrors::default();

        let name = check_text(&mut errors, "name", &self.name, true, 100);
        let surname = check_text(&mut errors, "surname", &self.surname, true, 100);
        let tax_id = check_text(&mut errors, "tax_id", &self.tax_id, false, 50);
        let email = check_text(&mut errors, "email", &self.email, false, 50);
        if !email.is_empty() && !errors.has("email") && !is_plain_email(&email) {
            errors.add("email", INVALID_EMAIL);
        }
        let contact = check_text(&mut errors, "contact", &self.contact, true, 50);
        let service_description = check_text(
            &mut errors,
            "service_description",
            &self.service_description,
            true,
            500,
        );
        let price = check_text(&mut errors, "price", &self.price, true, 50);
        let image = check_text(&mut errors, "image", &self.image, false, 100);
        if !image.is_empty() && (image.starts_with('/') || image.split('/').any(|part| part == "..")) {
            errors.add("image", "Informe um caminho relativo dentro da pasta de mídia.");
        }

        let scheduled_raw = text(&self.scheduled_for).trim();
        let scheduled_for = if scheduled_raw.is_empty() {
            errors.add("scheduled_for", REQUIRED);
            None
        } else {
            let parsed = parse_datetime(scheduled_raw);
            if parsed.is_none() {
                errors.add("scheduled_for", "Informe uma data e hora válidas.");
            }
            parsed
        };

        let gender_id = check_choice(&mut errors, "gender_id", &self.gender_id, &choices.genders);
        let age_bracket_id = check_choice(
            &mut errors,
            "age_bracket_id",
            &self.age_bracket_id,
            &choices.age_brackets,
        );

        if let Some(raw) = self.visible.as_deref() {
            if parse_flag(raw).is_none() {
                errors.add("visible", INVALID_CHOICE);
            }
        }

        match scheduled_for {
            Some(scheduled_for) if errors.is_empty() => Ok(NewAppointment {
                name,
                surname,
                tax_id,
                email,
                contact,
                service_description,
                scheduled_for,
                price,
                visible: self.is_visible(),
                image,
                gender_id,
                age_bracket_id,
            }),
            _ => Err(errors),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RegistrationInput {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub username: String,
    pub password1: String,
    pub password2: String,
}

impl RegistrationInput {
    /// Checks that need no database access. Email and username uniqueness
    /// are checked by the handler against the store.
    pub fn validate(&self) -> FormErrors {
        let mut errors = FormErrors::default();

        for (field, value) in [("first_name", &self.first_name), ("last_name", &self.last_name)] {
            let value = value.trim();
            if value.is_empty() {
                errors.add(field, REQUIRED);
            } else if value.chars().count() < 3 {
                errors.add(field, "Certifique-se de que o valor tenha no mínimo 3 caracteres.");
            } else if value.chars().count() > 150 {
                errors.add(field, too_long(150));
            }
        }

        let email = self.email.trim();
        if email.is_empty() {
            errors.add("email", "Email inválido");
        } else if email.chars().count() > 254 || !is_plain_email(email) {
            errors.add("email", INVALID_EMAIL);
        }

        let username = self.username.trim();
        if username.is_empty() {
            errors.add("username", REQUIRED);
        } else if username.chars().count() > 150 {
            errors.add("username", too_long(150));
        } else if !username
            .chars()
            .all(|ch| ch.is_alphanumeric() || matches!(ch, '@' | '.' | '+' | '-' | '_'))
        {
            errors.add(
                "username",
                "Informe um nome de usuário válido. Use apenas letras, números e @/./+/-/_.",
            );
        }

        if self.password1.is_empty() {
            errors.add("password1", REQUIRED);
        }
        if self.password2.is_empty() {
            errors.add("password2", REQUIRED);
        } else if self.password1 != self.password2 {
            errors.add("password2", "Os dois campos de senha não correspondem.");
        } else if self.password2.chars().count() < 8 {
            errors.add(
                "password2",
                "Esta senha é muito curta. Ela precisa conter pelo menos 8 caracteres.",
            );
        } else if self.password2.chars().all(|ch| ch.is_ascii_digit()) {
            errors.add("password2", "Esta senha é inteiramente numérica.");
        }

        errors
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LookupInput {
    pub name: String,
}

impl LookupInput {
    pub fn validate(&self) -> Result<String, FormErrors> {
        let mut errors = FormErrors::default();
        let name = check_text(&mut errors, "name", &Some(self.name.clone()), true, 100);
        if errors.is_empty() {
            Ok(name)
        } else {
            Err(errors)
        }
    }
}
