use actix_web::{
    http::{header, StatusCode},
    middleware::from_fn,
    web, HttpRequest, HttpResponse,
};
use actix_web_httpauth::middleware::HttpAuthentication;
use askama::Template;
use chrono::{DateTime, NaiveDate};
use serde::Deserialize;

use crate::{
    auth::{logout_guard, staff_validator, AuthUser},
    error::{AppError, AppResult},
    flash::{self, Flash},
    forms::{AppointmentInput, FormErrors, LookupChoices, LookupInput},
    models::{
        ActionFlag, AdminLogRow, AppointmentOrder, AppointmentQuery, AppointmentRow, LookupKind,
        LookupRow, NewAppointment, NewLogEntry, UserRow, ADMIN_PAGE_SIZE, DATETIME_FORMAT,
    },
    pagination::Page,
    routes::{
        accept_submission, choice_views, load_choices, load_page, AppointmentView, ChoiceView,
    },
    state::AppState,
    templates::{render, render_with_status},
    uploads::read_submission,
};

#[derive(Clone, Debug)]
struct StatCard {
    label: &'static str,
    value: i64,
    link: String,
}

#[derive(Clone, Debug)]
struct ActionView {
    object_type: String,
    object_repr: String,
    /// Empty once the object is gone.
    link: String,
    detail: String,
    action_time: String,
    label: &'static str,
    css_class: &'static str,
}

#[derive(Clone, Debug)]
struct UserView {
    id: i64,
    username: String,
    full_name: String,
    email: String,
    is_active: bool,
    is_staff: bool,
    is_superuser: bool,
    last_login: String,
    date_joined: String,
    is_current: bool,
}

#[derive(Template)]
#[template(path = "admin_dashboard.html")]
struct AdminDashboardTemplate {
    admin_name: String,
    stats: Vec<StatCard>,
    actions: Vec<ActionView>,
}

#[derive(Template)]
#[template(path = "admin_appointments.html")]
struct AdminAppointmentsTemplate {
    admin_name: String,
    appointments: Vec<AppointmentView>,
    page: Page,
    query: String,
    day: String,
    flash: Option<Flash>,
}

#[derive(Template)]
#[template(path = "admin_appointment_form.html")]
struct AdminAppointmentFormTemplate {
    admin_name: String,
    appointment_id: i64,
    title: String,
    form: AppointmentInput,
    errors: FormErrors,
    genders: Vec<ChoiceView>,
    age_brackets: Vec<ChoiceView>,
    visible: bool,
}

#[derive(Template)]
#[template(path = "admin_lookups.html")]
struct AdminLookupsTemplate {
    admin_name: String,
    slug: &'static str,
    label: &'static str,
    label_plural: &'static str,
    rows: Vec<LookupRow>,
    name: String,
    errors: FormErrors,
    flash: Option<Flash>,
}

#[derive(Template)]
#[template(path = "admin_users.html")]
struct AdminUsersTemplate {
    admin_name: String,
    users: Vec<UserView>,
    error: String,
    flash: Option<Flash>,
}

#[derive(Deserialize)]
struct AppointmentFilter {
    q: Option<String>,
    data: Option<String>,
    page: Option<String>,
}

/// Unchecked checkboxes are simply absent from the body.
#[derive(Deserialize)]
struct UserFlagsForm {
    is_active: Option<String>,
    is_staff: Option<String>,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/admin")
            .wrap(HttpAuthentication::basic(staff_validator))
            .wrap(from_fn(logout_guard))
            .service(web::resource("").route(web::get().to(index)))
            .service(web::resource("/").route(web::get().to(index)))
            .service(web::resource("/dashboard").route(web::get().to(dashboard)))
            .service(web::resource("/agendamentos").route(web::get().to(list_appointments)))
            .service(
                web::resource("/agendamentos/{id}")
                    .route(web::get().to(edit_appointment))
                    .route(web::post().to(update_appointment)),
            )
            .service(
                web::resource("/agendamentos/{id}/excluir")
                    .route(web::post().to(delete_appointment)),
            )
            .service(
                web::resource("/lookups/{kind}")
                    .route(web::get().to(list_lookups))
                    .route(web::post().to(create_lookup)),
            )
            .service(web::resource("/lookups/{kind}/{id}").route(web::post().to(rename_lookup)))
            .service(
                web::resource("/lookups/{kind}/{id}/excluir").route(web::post().to(delete_lookup)),
            )
            .service(web::resource("/usuarios").route(web::get().to(list_users)))
            .service(web::resource("/usuarios/{id}").route(web::post().to(update_user))),
    );
}

async fn index() -> HttpResponse {
    HttpResponse::Found()
        .append_header((header::LOCATION, "/admin/dashboard"))
        .finish()
}

async fn dashboard(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
) -> AppResult<HttpResponse> {
    let counts = state.store.site_counts().await?;
    let stats = vec![
        StatCard {
            label: "Agendamentos",
            value: counts.appointments,
            link: "/admin/agendamentos".to_string(),
        },
        StatCard {
            label: LookupKind::Gender.label_plural(),
            value: counts.genders,
            link: format!("/admin/lookups/{}", LookupKind::Gender.slug()),
        },
        StatCard {
            label: LookupKind::AgeBracket.label_plural(),
            value: counts.age_brackets,
            link: format!("/admin/lookups/{}", LookupKind::AgeBracket.slug()),
        },
        StatCard {
            label: "Usuários",
            value: counts.users,
            link: "/admin/usuarios".to_string(),
        },
    ];

    let actions = state
        .store
        .recent_actions(auth.id, 10)
        .await
        .unwrap_or_else(|err| {
            log::error!("Loading admin log failed: {err}");
            Vec::new()
        })
        .into_iter()
        .map(to_action_view)
        .collect();

    Ok(render(AdminDashboardTemplate {
        admin_name: auth.display_name.clone(),
        stats,
        actions,
    }))
}

async fn list_appointments(
    state: web::Data<AppState>,
    req: HttpRequest,
    auth: web::ReqData<AuthUser>,
    filter: web::Query<AppointmentFilter>,
) -> HttpResponse {
    let term = filter.q.as_deref().unwrap_or("").trim().to_string();
    let scheduled_on = filter
        .data
        .as_deref()
        .and_then(|value| NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok());
    let query = AppointmentQuery {
        search: (!term.is_empty()).then(|| term.clone()),
        visible_only: false,
        scheduled_on,
        order: AppointmentOrder::Scheduled,
    };

    let (appointments, page) =
        load_page(&state, &query, filter.page.as_deref(), ADMIN_PAGE_SIZE).await;

    let flash = flash::take(&req);
    let mut response = render(AdminAppointmentsTemplate {
        admin_name: auth.display_name.clone(),
        appointments,
        page,
        query: term,
        day: scheduled_on
            .map(|day| day.format("%Y-%m-%d").to_string())
            .unwrap_or_default(),
        flash,
    });
    flash::consume(&mut response, flash);
    response
}

async fn edit_appointment(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<i64>,
) -> AppResult<HttpResponse> {
    let row = find_appointment(&state, path.into_inner()).await?;
    let choices = load_choices(&state).await?;
    let form = AppointmentInput::from_row(&row);
    Ok(render_appointment_form(
        &auth,
        row.id,
        row.full_name(),
        form,
        FormErrors::default(),
        &choices,
    ))
}

async fn update_appointment(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    req: HttpRequest,
    path: web::Path<i64>,
    payload: web::Payload,
) -> AppResult<HttpResponse> {
    let row = find_appointment(&state, path.into_inner()).await?;
    let submission = read_submission(&req, payload).await?;
    let mut submitted = submission.input;
    if submitted.visible.is_none() {
        submitted.visible = Some("0".to_string());
    }
    submitted.image = None;
    let input = AppointmentInput::from_row(&row).overlay(submitted);
    let choices = load_choices(&state).await?;

    let appointment = match accept_submission(
        &state,
        &input,
        submission.image,
        submission.clear_image,
        &choices,
    )
    .await?
    {
        Ok(appointment) => appointment,
        Err(errors) => {
            return Ok(render_appointment_form(
                &auth,
                row.id,
                row.full_name(),
                input,
                errors,
                &choices,
            ))
        }
    };

    let changed = changed_fields(&row, &appointment);
    if !state.store.update_appointment(row.id, &appointment).await? {
        return Err(AppError::NotFound("Agendamento"));
    }
    if !changed.is_empty() {
        record_action(
            &state,
            &auth,
            "agendamento",
            row.id,
            &format!("{} {}", appointment.name, appointment.surname),
            ActionFlag::Change,
            &changed,
        )
        .await;
    }
    log::info!("{} updated appointment {}", auth.username, row.id);

    Ok(flash::redirect_with("/admin/agendamentos", Flash::Saved))
}

async fn delete_appointment(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<i64>,
) -> AppResult<HttpResponse> {
    let row = find_appointment(&state, path.into_inner()).await?;
    if !state.store.delete_appointment(row.id).await? {
        return Err(AppError::NotFound("Agendamento"));
    }
    record_action(
        &state,
        &auth,
        "agendamento",
        row.id,
        &row.full_name(),
        ActionFlag::Deletion,
        &[],
    )
    .await;
    log::info!("{} deleted appointment {}", auth.username, row.id);

    Ok(flash::redirect_with("/admin/agendamentos", Flash::Deleted))
}

async fn list_lookups(
    state: web::Data<AppState>,
    req: HttpRequest,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let kind = lookup_kind(&path)?;
    let flash = flash::take(&req);
    let mut response =
        render_lookups(&state, &auth, kind, String::new(), FormErrors::default(), flash).await?;
    flash::consume(&mut response, flash);
    Ok(response)
}

async fn create_lookup(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
    form: web::Form<LookupInput>,
) -> AppResult<HttpResponse> {
    let kind = lookup_kind(&path)?;
    let input = form.into_inner();
    let name = match input.validate() {
        Ok(name) => name,
        Err(errors) => return render_lookups(&state, &auth, kind, input.name, errors, None).await,
    };

    let id = state.store.insert_lookup(kind, &name).await?;
    record_action(&state, &auth, kind.table(), id, &name, ActionFlag::Addition, &[]).await;
    log::info!("{} added {} {id}", auth.username, kind.table());

    Ok(flash::redirect_with(&lookup_url(kind), Flash::Saved))
}

async fn rename_lookup(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<(String, i64)>,
    form: web::Form<LookupInput>,
) -> AppResult<HttpResponse> {
    let (slug, id) = path.into_inner();
    let kind = lookup_kind(&slug)?;
    let row = find_lookup(&state, kind, id).await?;
    let input = form.into_inner();
    let name = match input.validate() {
        Ok(name) => name,
        Err(errors) => return render_lookups(&state, &auth, kind, input.name, errors, None).await,
    };

    if name != row.name {
        if !state.store.rename_lookup(kind, id, &name).await? {
            return Err(AppError::NotFound(kind.label()));
        }
        record_action(&state, &auth, kind.table(), id, &name, ActionFlag::Change, &["name"]).await;
        log::info!("{} renamed {} {id}", auth.username, kind.table());
    }

    Ok(flash::redirect_with(&lookup_url(kind), Flash::Saved))
}

async fn delete_lookup(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<(String, i64)>,
) -> AppResult<HttpResponse> {
    let (slug, id) = path.into_inner();
    let kind = lookup_kind(&slug)?;
    let row = find_lookup(&state, kind, id).await?;
    if !state.store.delete_lookup(kind, id).await? {
        return Err(AppError::NotFound(kind.label()));
    }
    record_action(&state, &auth, kind.table(), id, &row.name, ActionFlag::Deletion, &[]).await;
    log::info!("{} deleted {} {id}", auth.username, kind.table());

    Ok(flash::redirect_with(&lookup_url(kind), Flash::Deleted))
}

async fn list_users(
    state: web::Data<AppState>,
    req: HttpRequest,
    auth: web::ReqData<AuthUser>,
) -> AppResult<HttpResponse> {
    let flash = flash::take(&req);
    let mut response = render_users(&state, &auth, StatusCode::OK, String::new(), flash).await?;
    flash::consume(&mut response, flash);
    Ok(response)
}

async fn update_user(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<i64>,
    form: web::Form<UserFlagsForm>,
) -> AppResult<HttpResponse> {
    let user = state
        .store
        .find_user(path.into_inner())
        .await?
        .ok_or(AppError::NotFound("Usuário"))?;
    let is_active = form.is_active.is_some();
    let is_staff = form.is_staff.is_some();

    if user.id == auth.id && !(is_active && is_staff) {
        log::warn!("{} tried to lock themselves out of the admin", auth.username);
        return render_users(
            &state,
            &auth,
            StatusCode::BAD_REQUEST,
            "Você não pode desativar nem remover o acesso de equipe da sua própria conta."
                .to_string(),
            None,
        )
        .await;
    }

    let mut changed = Vec::new();
    if user.is_active != is_active {
        changed.push("is_active");
    }
    if user.is_staff != is_staff {
        changed.push("is_staff");
    }

    if !changed.is_empty() {
        if !state.store.set_user_flags(user.id, is_active, is_staff).await? {
            return Err(AppError::NotFound("Usuário"));
        }
        record_action(
            &state,
            &auth,
            "usuario",
            user.id,
            &user.username,
            ActionFlag::Change,
            &changed,
        )
        .await;
        log::info!(
            "{} set flags on {}: active={is_active} staff={is_staff}",
            auth.username,
            user.username
        );
    }

    Ok(flash::redirect_with("/admin/usuarios", Flash::Saved))
}

async fn find_appointment(state: &AppState, id: i64) -> AppResult<AppointmentRow> {
    state
        .store
        .find_appointment(id)
        .await?
        .ok_or(AppError::NotFound("Agendamento"))
}

async fn find_lookup(state: &AppState, kind: LookupKind, id: i64) -> AppResult<LookupRow> {
    state
        .store
        .find_lookup(kind, id)
        .await?
        .ok_or(AppError::NotFound(kind.label()))
}

fn lookup_kind(slug: &str) -> AppResult<LookupKind> {
    LookupKind::from_slug(slug).ok_or(AppError::NotFound("Tabela"))
}

fn lookup_url(kind: LookupKind) -> String {
    format!("/admin/lookups/{}", kind.slug())
}

fn render_appointment_form(
    auth: &AuthUser,
    appointment_id: i64,
    title: String,
    form: AppointmentInput,
    errors: FormErrors,
    choices: &LookupChoices,
) -> HttpResponse {
    let genders = choice_views(&choices.genders, form.field("gender_id"));
    let age_brackets = choice_views(&choices.age_brackets, form.field("age_bracket_id"));
    let visible = form.is_visible();
    render(AdminAppointmentFormTemplate {
        admin_name: auth.display_name.clone(),
        appointment_id,
        title,
        form,
        errors,
        genders,
        age_brackets,
        visible,
    })
}

async fn render_lookups(
    state: &AppState,
    auth: &AuthUser,
    kind: LookupKind,
    name: String,
    errors: FormErrors,
    flash: Option<Flash>,
) -> AppResult<HttpResponse> {
    let rows = state.store.list_lookups(kind).await?;
    Ok(render(AdminLookupsTemplate {
        admin_name: auth.display_name.clone(),
        slug: kind.slug(),
        label: kind.label(),
        label_plural: kind.label_plural(),
        rows,
        name,
        errors,
        flash,
    }))
}

async fn render_users(
    state: &AppState,
    auth: &AuthUser,
    status: StatusCode,
    error: String,
    flash: Option<Flash>,
) -> AppResult<HttpResponse> {
    let users = state
        .store
        .list_users()
        .await?
        .into_iter()
        .map(|user| to_user_view(user, auth.id))
        .collect();
    Ok(render_with_status(
        status,
        AdminUsersTemplate {
            admin_name: auth.display_name.clone(),
            users,
            error,
            flash,
        },
    ))
}

/// Audit failures never undo the change they describe.
async fn record_action(
    state: &AppState,
    auth: &AuthUser,
    object_type: &str,
    object_id: i64,
    object_repr: &str,
    action_flag: ActionFlag,
    changed: &[&str],
) {
    let change_message = match action_flag {
        ActionFlag::Addition => serde_json::json!([{ "added": {} }]).to_string(),
        ActionFlag::Change => serde_json::json!([{ "changed": { "fields": changed } }]).to_string(),
        ActionFlag::Deletion => String::new(),
    };
    let entry = NewLogEntry {
        user_id: auth.id,
        object_type: object_type.to_string(),
        object_id: object_id.to_string(),
        object_repr: object_repr.chars().take(200).collect(),
        action_flag,
        change_message,
    };
    if let Err(err) = state.store.log_action(&entry).await {
        log::error!("Writing admin log failed: {err}");
    }
}

fn changed_fields(row: &AppointmentRow, new: &NewAppointment) -> Vec<&'static str> {
    let scheduled_for = new.scheduled_for.format(DATETIME_FORMAT).to_string();
    [
        ("name", row.name == new.name),
        ("surname", row.surname == new.surname),
        ("tax_id", row.tax_id == new.tax_id),
        ("email", row.email == new.email),
        ("contact", row.contact == new.contact),
        ("service_description", row.service_description == new.service_description),
        ("scheduled_for", row.scheduled_for == scheduled_for),
        ("price", row.price == new.price),
        ("visible", row.visible == new.visible),
        ("image", row.image == new.image),
        ("gender_id", row.gender_id == new.gender_id),
        ("age_bracket_id", row.age_bracket_id == new.age_bracket_id),
    ]
    .into_iter()
    .filter(|(_, same)| !same)
    .map(|(field, _)| field)
    .collect()
}

fn display_timestamp(value: &str) -> String {
    DateTime::parse_from_rfc3339(value)
        .map(|value| value.format("%d/%m/%Y %H:%M").to_string())
        .unwrap_or_else(|_| value.to_string())
}

fn to_action_view(row: AdminLogRow) -> ActionView {
    let (label, css_class) = if row.is_addition() {
        ("Adicionado", "addlink")
    } else if row.is_deletion() {
        ("Excluído", "deletelink")
    } else {
        ("Alterado", "changelink")
    };
    let link = if row.is_deletion() {
        String::new()
    } else {
        object_link(&row.object_type, &row.object_id)
    };
    let detail = if row.is_change() {
        changed_summary(&row.change_message)
    } else {
        String::new()
    };
    ActionView {
        object_type: row.object_type,
        object_repr: row.object_repr,
        link,
        detail,
        action_time: display_timestamp(&row.action_time),
        label,
        css_class,
    }
}

fn object_link(object_type: &str, object_id: &str) -> String {
    match object_type {
        "agendamento" => format!("/admin/agendamentos/{object_id}"),
        "usuario" => "/admin/usuarios".to_string(),
        table => LookupKind::ALL
            .into_iter()
            .find(|kind| kind.table() == table)
            .map(lookup_url)
            .unwrap_or_default(),
    }
}

/// Lists the fields named in a `[{"changed": {"fields": [...]}}]` message.
fn changed_summary(change_message: &str) -> String {
    let Ok(entries) = serde_json::from_str::<Vec<serde_json::Value>>(change_message) else {
        return String::new();
    };
    let fields: Vec<&str> = entries
        .iter()
        .filter_map(|entry| entry.pointer("/changed/fields")?.as_array())
        .flatten()
        .filter_map(serde_json::Value::as_str)
        .collect();
    if fields.is_empty() {
        String::new()
    } else {
        format!("Campos: {}", fields.join(", "))
    }
}

fn to_user_view(user: UserRow, current_id: i64) -> UserView {
    UserView {
        id: user.id,
        full_name: format!("{} {}", user.first_name, user.last_name).trim().to_string(),
        is_current: user.id == current_id,
        username: user.username,
        email: user.email,
        is_active: user.is_active,
        is_staff: user.is_staff,
        is_superuser: user.is_superuser,
        last_login: user
            .last_login
            .as_deref()
            .map(display_timestamp)
            .unwrap_or_else(|| "Nunca".to_string()),
        date_joined: display_timestamp(&user.date_joined),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        routes,
        store::AgendaStore,
        test_support::{
            basic_auth, body_string, create_user, multipart_form, sample_appointment, test_state,
            PNG_BYTES, STAFF_PASSWORD, STAFF_USER,
        },
    };
    use actix_web::{cookie::Cookie, test, App};

    #[actix_web::test]
    async fn anonymous_and_non_staff_are_rejected() {
        let (state, store) = test_state().await;
        create_user(&store, "cliente", "cliente-password", false).await;
        create_user(&store, STAFF_USER, STAFF_PASSWORD, true).await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(routes::configure),
        )
        .await;

        let resp = test::call_service(
            &app,
            test::TestRequest::get().uri("/admin/dashboard").to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/admin/dashboard")
                .insert_header(basic_auth("cliente", "cliente-password"))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/admin/dashboard")
                .insert_header(basic_auth(STAFF_USER, "wrong"))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/admin/dashboard")
                .insert_header(basic_auth(STAFF_USER, STAFF_PASSWORD))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn logged_out_marker_closes_the_admin() {
        let (state, store) = test_state().await;
        create_user(&store, STAFF_USER, STAFF_PASSWORD, true).await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(routes::configure),
        )
        .await;

        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/admin/dashboard")
                .insert_header(basic_auth(STAFF_USER, STAFF_PASSWORD))
                .cookie(Cookie::new("agenda_logged_out", "1"))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(body_string(resp).await.contains("/login?next=/admin/dashboard"));
    }

    #[actix_web::test]
    async fn listing_includes_hidden_and_filters_by_day() {
        let (state, store) = test_state().await;
        create_user(&store, STAFF_USER, STAFF_PASSWORD, true).await;
        let mut hidden = sample_appointment("Oculta", "Pessoa");
        hidden.visible = false;
        store.insert_appointment(&hidden).await.unwrap();
        let mut later = sample_appointment("Depois", "Cliente");
        later.scheduled_for = NaiveDate::from_ymd_opt(2025, 4, 7)
            .and_then(|day| day.and_hms_opt(9, 30, 0))
            .unwrap();
        store.insert_appointment(&later).await.unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(routes::configure),
        )
        .await;

        let body = body_string(
            test::call_service(
                &app,
                test::TestRequest::get()
                    .uri("/admin/agendamentos")
                    .insert_header(basic_auth(STAFF_USER, STAFF_PASSWORD))
                    .to_request(),
            )
            .await,
        )
        .await;
        let first = body.find("Oculta Pessoa").expect("hidden appointment listed");
        let second = body.find("Depois Cliente").expect("later appointment listed");
        assert!(first < second);

        let body = body_string(
            test::call_service(
                &app,
                test::TestRequest::get()
                    .uri("/admin/agendamentos?data=2025-04-07")
                    .insert_header(basic_auth(STAFF_USER, STAFF_PASSWORD))
                    .to_request(),
            )
            .await,
        )
        .await;
        assert!(body.contains("Depois Cliente"));
        assert!(!body.contains("Oculta Pessoa"));

        let body = body_string(
            test::call_service(
                &app,
                test::TestRequest::get()
                    .uri("/admin/agendamentos?q=oculta")
                    .insert_header(basic_auth(STAFF_USER, STAFF_PASSWORD))
                    .to_request(),
            )
            .await,
        )
        .await;
        assert!(body.contains("Oculta Pessoa"));
        assert!(!body.contains("Depois Cliente"));
    }

    #[actix_web::test]
    async fn editing_sets_visibility_and_logs_the_change() {
        let (state, store) = test_state().await;
        let staff_id = create_user(&store, STAFF_USER, STAFF_PASSWORD, true).await;
        let id = store.insert_appointment(&sample_appointment("Maria", "Silva")).await.unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(routes::configure),
        )
        .await;

        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri(&format!("/admin/agendamentos/{id}"))
                .insert_header(basic_auth(STAFF_USER, STAFF_PASSWORD))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri(&format!("/admin/agendamentos/{id}"))
                .insert_header(basic_auth(STAFF_USER, STAFF_PASSWORD))
                .set_form(vec![
                    ("name", "Maria"),
                    ("surname", "Souza"),
                    ("contact", "(11) 98765-4321"),
                    ("service_description", "Corte de cabelo"),
                    ("scheduled_for", "2025-04-06T20:00"),
                    ("price", "50,00"),
                ])
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);

        let row = store.find_appointment(id).await.unwrap().unwrap();
        assert_eq!(row.surname, "Souza");
        assert!(!row.visible);

        let actions = store.recent_actions(staff_id, 10).await.unwrap();
        assert_eq!(actions.len(), 1);
        assert!(actions[0].is_change());
        assert_eq!(actions[0].object_id, id.to_string());
        assert!(actions[0].change_message.contains("surname"));
        assert!(actions[0].change_message.contains("visible"));
        assert!(!actions[0].change_message.contains("price"));

        let body = body_string(
            test::call_service(
                &app,
                test::TestRequest::get()
                    .uri("/admin/dashboard")
                    .insert_header(basic_auth(STAFF_USER, STAFF_PASSWORD))
                    .to_request(),
            )
            .await,
        )
        .await;
        assert!(body.contains(&format!("<a href=\"/admin/agendamentos/{id}\">Maria Souza</a>")));
        assert!(body.contains("Campos: surname, visible"));
    }

    #[actix_web::test]
    async fn untouched_edit_keeps_seconds_and_logs_nothing() {
        let (state, store) = test_state().await;
        let staff_id = create_user(&store, STAFF_USER, STAFF_PASSWORD, true).await;
        let mut stored = sample_appointment("Maria", "Silva");
        stored.scheduled_for = NaiveDate::from_ymd_opt(2025, 4, 6)
            .and_then(|day| day.and_hms_opt(20, 13, 45))
            .unwrap();
        let id = store.insert_appointment(&stored).await.unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(routes::configure),
        )
        .await;

        let body = body_string(
            test::call_service(
                &app,
                test::TestRequest::get()
                    .uri(&format!("/admin/agendamentos/{id}"))
                    .insert_header(basic_auth(STAFF_USER, STAFF_PASSWORD))
                    .to_request(),
            )
            .await,
        )
        .await;
        assert!(body.contains("value=\"2025-04-06T20:13:45\""));

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri(&format!("/admin/agendamentos/{id}"))
                .insert_header(basic_auth(STAFF_USER, STAFF_PASSWORD))
                .set_form(vec![
                    ("name", "Maria"),
                    ("surname", "Silva"),
                    ("scheduled_for", "2025-04-06T20:13:45"),
                    ("visible", "1"),
                ])
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        let row = store.find_appointment(id).await.unwrap().unwrap();
        assert_eq!(row.scheduled_for, "2025-04-06 20:13:45");
        assert!(store.recent_actions(staff_id, 10).await.unwrap().is_empty());
    }

    #[actix_web::test]
    async fn staff_can_upload_an_image() {
        let (state, store) = test_state().await;
        let staff_id = create_user(&store, STAFF_USER, STAFF_PASSWORD, true).await;
        let media_root = state.media_root.clone();
        let id = store.insert_appointment(&sample_appointment("Maria", "Silva")).await.unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(routes::configure),
        )
        .await;

        let (content_type, body) =
            multipart_form(&[("visible", "1")], Some(("retrato.gif", b"GIF89a\x01\x00".as_slice())));
        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri(&format!("/admin/agendamentos/{id}"))
                .insert_header(basic_auth(STAFF_USER, STAFF_PASSWORD))
                .insert_header(content_type)
                .set_payload(body)
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);

        let row = store.find_appointment(id).await.unwrap().unwrap();
        assert!(row.visible);
        assert!(row.image.starts_with("imagens/") && row.image.ends_with(".gif"), "{}", row.image);
        assert_eq!(std::fs::read(media_root.join(&row.image)).unwrap(), b"GIF89a\x01\x00");
        let actions = store.recent_actions(staff_id, 10).await.unwrap();
        assert_eq!(actions[0].change_message, r#"[{"changed":{"fields":["image"]}}]"#);
    }

    #[actix_web::test]
    async fn deleting_an_appointment_is_logged() {
        let (state, store) = test_state().await;
        let staff_id = create_user(&store, STAFF_USER, STAFF_PASSWORD, true).await;
        let id = store.insert_appointment(&sample_appointment("Maria", "Silva")).await.unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(routes::configure),
        )
        .await;

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri(&format!("/admin/agendamentos/{id}/excluir"))
                .insert_header(basic_auth(STAFF_USER, STAFF_PASSWORD))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert!(store.find_appointment(id).await.unwrap().is_none());
        let actions = store.recent_actions(staff_id, 10).await.unwrap();
        assert!(actions[0].is_deletion());
        assert_eq!(actions[0].object_repr, "Maria Silva");

        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri(&format!("/admin/agendamentos/{id}"))
                .insert_header(basic_auth(STAFF_USER, STAFF_PASSWORD))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn lookup_crud_nullifies_references() {
        let (state, store) = test_state().await;
        create_user(&store, STAFF_USER, STAFF_PASSWORD, true).await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(routes::configure),
        )
        .await;

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/admin/lookups/generos")
                .insert_header(basic_auth(STAFF_USER, STAFF_PASSWORD))
                .set_form(vec![("name", "Feminino")])
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        let rows = store.list_lookups(LookupKind::Gender).await.unwrap();
        assert_eq!(rows.len(), 1);
        let gender = rows[0].id;

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri(&format!("/admin/lookups/generos/{gender}"))
                .insert_header(basic_auth(STAFF_USER, STAFF_PASSWORD))
                .set_form(vec![("name", "Mulher")])
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            store.find_lookup(LookupKind::Gender, gender).await.unwrap().unwrap().name,
            "Mulher"
        );

        let mut appointment = sample_appointment("Maria", "Silva");
        appointment.gender_id = Some(gender);
        let id = store.insert_appointment(&appointment).await.unwrap();

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri(&format!("/admin/lookups/generos/{gender}/excluir"))
                .insert_header(basic_auth(STAFF_USER, STAFF_PASSWORD))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        let row = store.find_appointment(id).await.unwrap().unwrap();
        assert_eq!(row.gender_id, None);

        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/admin/lookups/desconhecido")
                .insert_header(basic_auth(STAFF_USER, STAFF_PASSWORD))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn blank_lookup_name_is_rejected() {
        let (state, store) = test_state().await;
        create_user(&store, STAFF_USER, STAFF_PASSWORD, true).await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(routes::configure),
        )
        .await;

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/admin/lookups/faixas-etarias")
                .insert_header(basic_auth(STAFF_USER, STAFF_PASSWORD))
                .set_form(vec![("name", "   ")])
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body_string(resp).await.contains("Este campo é obrigatório."));
        assert!(store.list_lookups(LookupKind::AgeBracket).await.unwrap().is_empty());
    }

    #[actix_web::test]
    async fn user_flags_toggle_but_not_for_self() {
        let (state, store) = test_state().await;
        let staff_id = create_user(&store, STAFF_USER, STAFF_PASSWORD, true).await;
        let other = create_user(&store, "cliente", "cliente-password", false).await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(routes::configure),
        )
        .await;

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri(&format!("/admin/usuarios/{other}"))
                .insert_header(basic_auth(STAFF_USER, STAFF_PASSWORD))
                .set_form(vec![("is_active", "on"), ("is_staff", "on")])
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert!(store.find_user(other).await.unwrap().unwrap().is_staff);

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri(&format!("/admin/usuarios/{staff_id}"))
                .insert_header(basic_auth(STAFF_USER, STAFF_PASSWORD))
                .set_form(vec![("is_active", "on")])
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(store.find_user(staff_id).await.unwrap().unwrap().is_staff);

        let body = body_string(
            test::call_service(
                &app,
                test::TestRequest::get()
                    .uri("/admin/usuarios")
                    .insert_header(basic_auth(STAFF_USER, STAFF_PASSWORD))
                    .to_request(),
            )
            .await,
        )
        .await;
        assert!(body.contains("cliente"));
        assert!(body.contains(STAFF_USER));
    }
}
