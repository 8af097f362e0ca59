use actix_web::{
    cookie::{time::Duration, Cookie, SameSite},
    HttpRequest, HttpResponse,
};

const FLASH_COOKIE: &str = "agenda_flash";

/// One-shot notices shown on the page a form redirects to. The cookie only
/// ever carries the variant code, never free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flash {
    AppointmentCreated,
    AppointmentUpdated,
    AppointmentDeleted,
    UserRegistered,
    Saved,
    Deleted,
}

impl Flash {
    const ALL: [Flash; 6] = [
        Flash::AppointmentCreated,
        Flash::AppointmentUpdated,
        Flash::AppointmentDeleted,
        Flash::UserRegistered,
        Flash::Saved,
        Flash::Deleted,
    ];

    fn code(self) -> &'static str {
        match self {
            Flash::AppointmentCreated => "appointment_created",
            Flash::AppointmentUpdated => "appointment_updated",
            Flash::AppointmentDeleted => "appointment_deleted",
            Flash::UserRegistered => "user_registered",
            Flash::Saved => "saved",
            Flash::Deleted => "deleted",
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|flash| flash.code() == code)
    }

    pub fn level(self) -> &'static str {
        match self {
            Flash::AppointmentDeleted | Flash::Deleted => "warning",
            _ => "success",
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Flash::AppointmentCreated => "Agendamento cadastrado com sucesso!",
            Flash::AppointmentUpdated => "Cadastro atualizado com sucesso!",
            Flash::AppointmentDeleted => "Cadastro excluído com sucesso!",
            Flash::UserRegistered => "Usuário cadastrado com sucesso!",
            Flash::Saved => "Alterações salvas com sucesso.",
            Flash::Deleted => "Registro excluído.",
        }
    }
}

fn build(value: &str, max_age: Duration) -> Cookie<'static> {
    Cookie::build(FLASH_COOKIE, value.to_string())
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(max_age)
        .finish()
}

/// 303 redirect carrying a notice for the next page.
pub fn redirect_with(location: &str, flash: Flash) -> HttpResponse {
    HttpResponse::SeeOther()
        .append_header((actix_web::http::header::LOCATION, location.to_string()))
        .cookie(build(flash.code(), Duration::minutes(5)))
        .finish()
}

pub fn take(req: &HttpRequest) -> Option<Flash> {
    req.cookie(FLASH_COOKIE)
        .and_then(|cookie| Flash::from_code(cookie.value()))
}

/// Clears a consumed notice on the response that displayed it.
pub fn consume(response: &mut HttpResponse, flash: Option<Flash>) {
    if flash.is_none() {
        return;
    }
    if let Err(err) = response.add_cookie(&build("", Duration::seconds(0))) {
        log::warn!("Could not clear flash cookie: {err}");
    }
}
