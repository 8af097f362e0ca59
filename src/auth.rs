use actix_web::{
    body::BoxBody,
    cookie::{time::Duration, Cookie, SameSite},
    dev::{ServiceRequest, ServiceResponse},
    error::ErrorUnauthorized,
    http::{header, StatusCode},
    middleware::Next,
    web, Error, HttpMessage, HttpRequest,
};
use actix_web_httpauth::extractors::basic::BasicAuth;
use argon2::{
    password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use askama::Template;
use chrono::Utc;
use rand_core::OsRng;

use crate::{state::AppState, templates::render_with_status};

pub const AUTH_REALM: &str = "Agenda";
const LOGOUT_COOKIE: &str = "agenda_logged_out";

#[derive(Clone, Debug)]
pub struct AuthUser {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub is_staff: bool,
}

pub fn hash_password(password: &str) -> Result<String, password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, password_hash: &str) -> bool {
    match PasswordHash::new(password_hash) {
        Ok(hash) => Argon2::default()
            .verify_password(password.as_bytes(), &hash)
            .is_ok(),
        Err(_) => false,
    }
}

/// Checks credentials against an active account and stamps `last_login` on success.
pub async fn authenticate_credentials(
    state: &AppState,
    username: &str,
    password: &str,
) -> Option<AuthUser> {
    let user = match state.store.find_user_by_username(username).await {
        Ok(Some(user)) => user,
        Ok(None) => return None,
        Err(err) => {
            log::error!("User lookup failed for {username}: {err}");
            return None;
        }
    };

    if !user.is_active || !verify_password(password, &user.password_hash) {
        return None;
    }

    if let Err(err) = state.store.record_login(user.id, Utc::now()).await {
        log::warn!("Could not record login for {}: {err}", user.username);
    }

    let display_name = format!("{} {}", user.first_name, user.last_name)
        .trim()
        .to_string();
    Some(AuthUser {
        id: user.id,
        display_name: if display_name.is_empty() {
            user.username.clone()
        } else {
            display_name
        },
        username: user.username,
        is_staff: user.is_staff,
    })
}

async fn authenticate(req: &ServiceRequest, credentials: &BasicAuth) -> Result<AuthUser, Error> {
    let state = req
        .app_data::<web::Data<AppState>>()
        .ok_or_else(|| ErrorUnauthorized("Unauthorized"))?;
    let username = credentials.user_id();
    let password = credentials.password().unwrap_or_default();
    authenticate_credentials(state, username, password)
        .await
        .ok_or_else(|| ErrorUnauthorized("Unauthorized"))
}

pub async fn staff_validator(
    req: ServiceRequest,
    credentials: BasicAuth,
) -> Result<ServiceRequest, (Error, ServiceRequest)> {
    match authenticate(&req, &credentials).await {
        Ok(user) => {
            if !user.is_staff {
                log::warn!("Non-staff user {} tried to open the admin", user.username);
                return Err((ErrorUnauthorized("Staff access required"), req));
            }
            req.extensions_mut().insert(user);
            Ok(req)
        }
        Err(err) => Err((err, req)),
    }
}

fn logout_marker(req: &HttpRequest, value: &str, max_age: Duration) -> Cookie<'static> {
    let mut builder = Cookie::build(LOGOUT_COOKIE, value.to_string())
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(max_age);
    if req.connection_info().scheme() == "https" {
        builder = builder.secure(true);
    }
    builder.finish()
}

pub fn logout_cookie(req: &HttpRequest) -> Cookie<'static> {
    logout_marker(req, "1", Duration::days(365))
}

pub fn clear_logout_cookie(req: &HttpRequest) -> Cookie<'static> {
    logout_marker(req, "", Duration::seconds(0))
}

pub fn is_logged_out(req: &HttpRequest) -> bool {
    req.cookie(LOGOUT_COOKIE).is_some()
}

#[derive(Template)]
#[template(path = "logged_out.html")]
struct LoggedOutTemplate {
    login_url: String,
}

/// Browsers keep replaying Basic credentials, so a logged-out marker cookie
/// is what actually closes the admin until the next `/login`.
pub async fn logout_guard<B>(
    req: ServiceRequest,
    next: Next<B>,
) -> Result<ServiceResponse<BoxBody>, Error>
where
    B: actix_web::body::MessageBody + 'static,
{
    if is_logged_out(req.request()) {
        let mut response = render_with_status(
            StatusCode::UNAUTHORIZED,
            LoggedOutTemplate {
                login_url: "/login?next=/admin/dashboard".to_string(),
            },
        );
        response.headers_mut().insert(
            header::CACHE_CONTROL,
            header::HeaderValue::from_static("no-store"),
        );
        return Ok(req.into_response(response));
    }

    let res = next.call(req).await?;
    Ok(res.map_into_boxed_body())
}
