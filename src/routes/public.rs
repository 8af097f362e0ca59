use actix_web::http::header::Header;
use actix_web::{http::header, web, HttpRequest, HttpResponse};
use actix_web_httpauth::headers::authorization::{Authorization, Basic};
use askama::Template;
use serde::Deserialize;

use crate::{
    auth::{authenticate_credentials, clear_logout_cookie, hash_password, logout_cookie, AUTH_REALM},
    error::{AppError, AppResult},
    flash::{self, Flash},
    forms::{AppointmentInput, FormErrors, LookupChoices, RegistrationInput},
    models::{AppointmentQuery, AppointmentRow, NewUser, LIST_PAGE_SIZE, SEARCH_PAGE_SIZE},
    pagination::{Page, PageQuery},
    routes::{
        accept_submission, choice_views, load_choices, load_page, to_view, AppointmentView,
        ChoiceView,
    },
    state::AppState,
    store::is_unique_violation,
    templates::render,
    uploads::read_submission,
};

const USERNAME_TAKEN: &str = "Já existe um usuário com este nome de usuário.";

#[derive(Template)]
#[template(path = "index.html")]
struct ListTemplate {
    site_title: &'static str,
    appointments: Vec<AppointmentView>,
    page: Page,
    query: String,
    flash: Option<Flash>,
}

#[derive(Template)]
#[template(path = "detail.html")]
struct DetailTemplate {
    appointment: AppointmentView,
}

#[derive(Template)]
#[template(path = "appointment_form.html")]
struct AppointmentFormTemplate {
    site_title: &'static str,
    form_action: String,
    delete_action: String,
    form: AppointmentInput,
    errors: FormErrors,
    genders: Vec<ChoiceView>,
    age_brackets: Vec<ChoiceView>,
}

#[derive(Template)]
#[template(path = "register.html")]
struct RegisterTemplate {
    form: RegistrationInput,
    errors: FormErrors,
}

#[derive(Deserialize)]
struct SearchQuery {
    q: Option<String>,
    page: Option<String>,
}

#[derive(Deserialize)]
struct LoginQuery {
    next: Option<String>,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/").route(web::get().to(index)))
        .service(web::resource("/pesquisa/").route(web::get().to(search)))
        .service(
            web::resource("/agendamento/inserir_cadastro/")
                .route(web::get().to(show_create))
                .route(web::post().to(create)),
        )
        .service(
            web::resource("/agendamento/{id}/atualiza/")
                .route(web::get().to(show_update))
                .route(web::post().to(update)),
        )
        .service(web::resource("/agendamento/{id}/excluir/").route(web::post().to(delete)))
        .service(web::resource("/agendamento/{id}/detail/").route(web::get().to(detail)))
        .service(
            web::resource("/usuario/criar/")
                .route(web::get().to(show_register))
                .route(web::post().to(register)),
        )
        .service(web::resource("/login").route(web::get().to(login)))
        .service(web::resource("/logout").route(web::get().to(logout)))
        .service(web::resource("/health").route(web::get().to(health)));
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().body("ok")
}

async fn index(
    state: web::Data<AppState>,
    req: HttpRequest,
    query: web::Query<PageQuery>,
) -> HttpResponse {
    let (appointments, page) = load_page(
        &state,
        &AppointmentQuery::visible(),
        query.page.as_deref(),
        LIST_PAGE_SIZE,
    )
    .await;

    let flash = flash::take(&req);
    let mut response = render(ListTemplate {
        site_title: "Área do Profissional",
        appointments,
        page,
        query: String::new(),
        flash,
    });
    flash::consume(&mut response, flash);
    response
}

async fn search(state: web::Data<AppState>, query: web::Query<SearchQuery>) -> HttpResponse {
    let term = query.q.as_deref().unwrap_or("").trim().to_string();
    if term.is_empty() {
        return HttpResponse::Found()
            .append_header((header::LOCATION, "/"))
            .finish();
    }

    let (appointments, page) = load_page(
        &state,
        &AppointmentQuery::search(&term),
        query.page.as_deref(),
        SEARCH_PAGE_SIZE,
    )
    .await;

    render(ListTemplate {
        site_title: "Pesquisa",
        appointments,
        page,
        query: term,
        flash: None,
    })
}

async fn detail(state: web::Data<AppState>, path: web::Path<i64>) -> AppResult<HttpResponse> {
    let row = find_visible(&state, path.into_inner()).await?;
    Ok(render(DetailTemplate {
        appointment: to_view(row),
    }))
}

async fn show_create(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let choices = load_choices(&state).await?;
    Ok(render_form(
        "Novo agendamento",
        "/agendamento/inserir_cadastro/".to_string(),
        String::new(),
        AppointmentInput::default(),
        FormErrors::default(),
        &choices,
    ))
}

async fn create(
    state: web::Data<AppState>,
    req: HttpRequest,
    payload: web::Payload,
) -> AppResult<HttpResponse> {
    let submission = read_submission(&req, payload).await?;
    let mut input = submission.input;
    input.visible = None;
    input.image = None;
    let choices = load_choices(&state).await?;

    match accept_submission(&state, &input, submission.image, false, &choices).await? {
        Ok(appointment) => {
            let id = state.store.insert_appointment(&appointment).await?;
            log::info!("Appointment {id} created for {} {}", appointment.name, appointment.surname);
            Ok(flash::redirect_with("/", Flash::AppointmentCreated))
        }
        Err(errors) => Ok(render_form(
            "Novo agendamento",
            "/agendamento/inserir_cadastro/".to_string(),
            String::new(),
            input,
            errors,
            &choices,
        )),
    }
}

async fn show_update(state: web::Data<AppState>, path: web::Path<i64>) -> AppResult<HttpResponse> {
    let id = path.into_inner();
    let row = find_visible(&state, id).await?;
    let choices = load_choices(&state).await?;
    Ok(render_form(
        "Atualizar cadastro",
        format!("/agendamento/{id}/atualiza/"),
        format!("/agendamento/{id}/excluir/"),
        AppointmentInput::from_row(&row),
        FormErrors::default(),
        &choices,
    ))
}

async fn update(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<i64>,
    payload: web::Payload,
) -> AppResult<HttpResponse> {
    let id = path.into_inner();
    let row = find_visible(&state, id).await?;
    let submission = read_submission(&req, payload).await?;
    let mut submitted = submission.input;
    submitted.visible = None;
    submitted.image = None;
    let input = AppointmentInput::from_row(&row).overlay(submitted);
    let choices = load_choices(&state).await?;

    match accept_submission(
        &state,
        &input,
        submission.image,
        submission.clear_image,
        &choices,
    )
    .await?
    {
        Ok(appointment) => {
            if !state.store.update_appointment(id, &appointment).await? {
                return Err(AppError::NotFound("Agendamento"));
            }
            log::info!("Appointment {id} updated");
            Ok(flash::redirect_with("/", Flash::AppointmentUpdated))
        }
        Err(errors) => Ok(render_form(
            "Atualizar cadastro",
            format!("/agendamento/{id}/atualiza/"),
            format!("/agendamento/{id}/excluir/"),
            input,
            errors,
            &choices,
        )),
    }
}

async fn delete(state: web::Data<AppState>, path: web::Path<i64>) -> AppResult<HttpResponse> {
    let id = path.into_inner();
    find_visible(&state, id).await?;
    if !state.store.delete_appointment(id).await? {
        return Err(AppError::NotFound("Agendamento"));
    }
    log::info!("Appointment {id} deleted");
    Ok(flash::redirect_with("/", Flash::AppointmentDeleted))
}

async fn show_register() -> HttpResponse {
    render(RegisterTemplate {
        form: RegistrationInput::default(),
        errors: FormErrors::default(),
    })
}

async fn register(
    state: web::Data<AppState>,
    form: web::Form<RegistrationInput>,
) -> AppResult<HttpResponse> {
    let mut input = form.into_inner();
    let mut errors = input.validate();

    if !errors.has("email") && state.store.email_in_use(&input.email).await? {
        errors.add("email", "Email já existe, por favor insira outro email!");
    }
    if !errors.has("username") && state.store.username_taken(input.username.trim()).await? {
        errors.add("username", USERNAME_TAKEN);
    }

    if !errors.is_empty() {
        log::info!("Registration rejected for {}: {} field error(s)", input.username, errors.len());
        input.password1.clear();
        input.password2.clear();
        return Ok(render(RegisterTemplate {
            form: input,
            errors,
        }));
    }

    let password_hash =
        hash_password(&input.password1).map_err(|err| AppError::Hashing(err.to_string()))?;
    let inserted = state
        .store
        .insert_user(&NewUser {
            username: input.username.trim().to_string(),
            password_hash,
            email: input.email.trim().to_string(),
            first_name: input.first_name.trim().to_string(),
            last_name: input.last_name.trim().to_string(),
            is_staff: false,
            is_superuser: false,
        })
        .await;
    let id = match inserted {
        Ok(id) => id,
        // Another request took the username between the check and the insert.
        Err(err) if is_unique_violation(&err) => {
            log::info!("Registration for {} lost a username race", input.username.trim());
            errors.add("username", USERNAME_TAKEN);
            input.password1.clear();
            input.password2.clear();
            return Ok(render(RegisterTemplate {
                form: input,
                errors,
            }));
        }
        Err(err) => return Err(err.into()),
    };
    log::info!("User {id} registered as {}", input.username.trim());

    Ok(flash::redirect_with("/", Flash::UserRegistered))
}

async fn logout(req: HttpRequest) -> HttpResponse {
    HttpResponse::SeeOther()
        .append_header((header::LOCATION, "/"))
        .cookie(logout_cookie(&req))
        .insert_header((header::CACHE_CONTROL, "no-store"))
        .finish()
}

async fn login(
    state: web::Data<AppState>,
    req: HttpRequest,
    query: web::Query<LoginQuery>,
) -> HttpResponse {
    let auth = match Authorization::<Basic>::parse(&req) {
        Ok(auth) => auth,
        Err(_) => return auth_challenge(),
    };
    let credentials = auth.into_scheme();
    let username = credentials.user_id();
    let password = credentials.password().unwrap_or_default();

    let user = match authenticate_credentials(&state, username, password).await {
        Some(user) => user,
        None => return auth_challenge(),
    };
    log::info!("{} logged in", user.username);

    let requested = query.next.as_deref().unwrap_or("");
    let requested = if requested.starts_with('/') && !requested.starts_with("//") {
        requested
    } else {
        ""
    };

    let redirect = if user.is_staff {
        if requested.starts_with("/admin") {
            requested
        } else {
            "/admin/dashboard"
        }
    } else if !requested.is_empty() && !requested.starts_with("/admin") {
        requested
    } else {
        "/"
    };

    HttpResponse::SeeOther()
        .append_header((header::LOCATION, redirect.to_string()))
        .cookie(clear_logout_cookie(&req))
        .insert_header((header::CACHE_CONTROL, "no-store"))
        .finish()
}

fn auth_challenge() -> HttpResponse {
    HttpResponse::Unauthorized()
        .insert_header((header::WWW_AUTHENTICATE, format!("Basic realm=\"{}\"", AUTH_REALM)))
        .insert_header((header::CACHE_CONTROL, "no-store"))
        .finish()
}

/// Hidden appointments behave as missing on the public side.
async fn find_visible(state: &AppState, id: i64) -> AppResult<AppointmentRow> {
    match state.store.find_appointment(id).await? {
        Some(row) if row.visible => Ok(row),
        _ => Err(AppError::NotFound("Agendamento")),
    }
}

fn render_form(
    site_title: &'static str,
    form_action: String,
    delete_action: String,
    form: AppointmentInput,
    errors: FormErrors,
    choices: &LookupChoices,
) -> HttpResponse {
    let genders = choice_views(&choices.genders, form.field("gender_id"));
    let age_brackets = choice_views(&choices.age_brackets, form.field("age_bracket_id"));
    render(AppointmentFormTemplate {
        site_title,
        form_action,
        delete_action,
        form,
        errors,
        genders,
        age_brackets,
    })
}
