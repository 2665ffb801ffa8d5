//! Login, logout and home pages
//!
//! Server-rendered HTML with two ways in: username/password (login or
//! register) and GitHub. The GitHub button starts the connect flow, which
//! comes back to `/login?access_token=...`.

use std::collections::{BTreeMap, HashMap};

use axum::{
    Form, Router,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use html_escape::{encode_double_quoted_attribute as attr, encode_text as text};

use super::users::{
    Credentials, login, login_github_user, register, validate_password, validate_username,
};
use crate::AppState;
use crate::data::User;
use crate::error::{AppError, FormError};
use crate::metrics::LOGINS_TOTAL;

const INVALID_LOGIN: &str = "Invalid Login!";

/// Create authentication router
///
/// Routes:
/// - GET / - Home page (signed-in users only)
/// - GET /login - Login page, also finishes GitHub logins
/// - POST /login - Password login or registration
/// - POST /login/github - Login with a GitHub access token
/// - POST /logout - Logout
pub fn auth_router() -> Router<AppState> {
    Router::new()
        .route("/", get(home))
        .route("/login", get(login_page).post(password_login))
        .route("/login/github", post(github_login))
        .route("/logout", post(logout))
}

// =============================================================================
// Home
// =============================================================================

/// GET /
async fn home(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, AppError> {
    match state.user_sessions.get_user(&state.db, &headers).await {
        Ok(user) => Ok(Html(render_home(&user)).into_response()),
        Err(AppError::InvalidUser(_) | AppError::UserNotFound(_)) => {
            Ok(Redirect::to("/login").into_response())
        }
        Err(error) => Err(error),
    }
}

// =============================================================================
// Login page
// =============================================================================

/// GET /login
///
/// # Query
/// - `access_token`: finish a GitHub login server-side
/// - `error`, `error_description`, `error_uri`: OAuth flow failure to show
/// - `redirectTo`: where to go after signing in
async fn login_page(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, AppError> {
    let redirect_to = safe_redirect(query.get("redirectTo").map(String::as_str));

    if let Some(access_token) = query.get("access_token") {
        return match finish_github_login(&state, access_token).await {
            Ok(set_cookie) => Ok(signed_in(set_cookie, redirect_to)),
            Err(AppError::FormValidation(form)) => Ok(render_login_response(
                StatusCode::BAD_REQUEST,
                &LoginView {
                    github_error: Some(form.message.as_str()),
                    redirect_to,
                    connect_prefix: &state.config.oauth.mount_prefix,
                    ..LoginView::default()
                },
            )),
            Err(error) => Err(error),
        };
    }

    match state.user_sessions.get_user(&state.db, &headers).await {
        Ok(_) => return Ok(Redirect::to("/").into_response()),
        Err(AppError::InvalidUser(_) | AppError::UserNotFound(_)) => {}
        Err(error) => return Err(error),
    }

    let grant_error = query.get("error").map(|message| GrantError {
        message: message.as_str(),
        description: query.get("error_description").map(String::as_str),
        uri: query.get("error_uri").map(String::as_str),
    });

    Ok(render_login_response(
        StatusCode::OK,
        &LoginView {
            grant_error,
            redirect_to,
            connect_prefix: &state.config.oauth.mount_prefix,
            ..LoginView::default()
        },
    ))
}

// =============================================================================
// Password login
// =============================================================================

/// POST /login
///
/// Form fields: `loginType` ("login" or "register"), `username`,
/// `password`, `redirectTo`.
async fn password_login(
    State(state): State<AppState>,
    Form(form): Form<HashMap<String, String>>,
) -> Result<Response, AppError> {
    let redirect_to = safe_redirect(form.get("redirectTo").map(String::as_str));

    match process_password_login(&state, &form).await {
        Ok(set_cookie) => Ok(signed_in(set_cookie, redirect_to)),
        Err(AppError::FormValidation(error)) => Ok(render_login_response(
            StatusCode::BAD_REQUEST,
            &LoginView {
                form_error: Some(&error),
                redirect_to,
                connect_prefix: &state.config.oauth.mount_prefix,
                ..LoginView::default()
            },
        )),
        Err(error) => Err(error),
    }
}

async fn process_password_login(
    state: &AppState,
    form: &HashMap<String, String>,
) -> Result<String, AppError> {
    let (Some(login_type), Some(username), Some(password)) = (
        form.get("loginType"),
        form.get("username"),
        form.get("password"),
    ) else {
        return Err(FormError::new("Form not submitted correctly.").into());
    };

    let fields = BTreeMap::from([
        ("loginType".to_string(), login_type.clone()),
        ("username".to_string(), username.clone()),
    ]);

    let field_errors: BTreeMap<String, String> = [
        ("username", validate_username(username)),
        ("password", validate_password(password)),
    ]
    .into_iter()
    .filter_map(|(field, error)| error.map(|error| (field.to_string(), error)))
    .collect();
    if !field_errors.is_empty() {
        return Err(FormError::new("Fields invalid")
            .with_field_errors(field_errors)
            .with_fields(fields)
            .into());
    }

    let credentials = Credentials {
        username: username.clone(),
        password: password.clone(),
    };

    let user = match login_type.as_str() {
        "login" => {
            let Some(user) = login(&state.db, &credentials).await? else {
                LOGINS_TOTAL.with_label_values(&["password", "failure"]).inc();
                return Err(FormError::new("Username/Password combination is incorrect")
                    .with_fields(fields)
                    .into());
            };
            LOGINS_TOTAL.with_label_values(&["password", "success"]).inc();
            user
        }
        "register" => {
            let user = register(&state.db, credentials, None)
                .await
                .map_err(|error| match error {
                    AppError::FormValidation(form) => {
                        AppError::FormValidation(form.with_fields(fields.clone()))
                    }
                    other => other,
                })?;
            LOGINS_TOTAL.with_label_values(&["register", "success"]).inc();
            user
        }
        _ => return Err(FormError::new("Login type invalid").with_fields(fields).into()),
    };

    tracing::info!(user_id = %user.id, username = %user.username, "User signed in");
    state.user_sessions.create_user_session(&user.id)
}

// =============================================================================
// GitHub login
// =============================================================================

/// POST /login/github
///
/// Form fields: `ghat` (GitHub access token), `redirectTo`.
async fn github_login(
    State(state): State<AppState>,
    Form(form): Form<HashMap<String, String>>,
) -> Result<Response, AppError> {
    let redirect_to = safe_redirect(form.get("redirectTo").map(String::as_str));

    let result = match form.get("ghat") {
        Some(access_token) => finish_github_login(&state, access_token).await,
        None => Err(FormError::new(INVALID_LOGIN).into()),
    };

    match result {
        Ok(set_cookie) => Ok(signed_in(set_cookie, redirect_to)),
        Err(AppError::FormValidation(error)) => Ok(render_login_response(
            StatusCode::BAD_REQUEST,
            &LoginView {
                github_error: Some(error.message.as_str()),
                redirect_to,
                connect_prefix: &state.config.oauth.mount_prefix,
                ..LoginView::default()
            },
        )),
        Err(error) => Err(error),
    }
}

async fn finish_github_login(state: &AppState, access_token: &str) -> Result<String, AppError> {
    let Some((profile, metadata)) = state.github.fetch_user(access_token).await? else {
        LOGINS_TOTAL.with_label_values(&["github", "failure"]).inc();
        return Err(FormError::new(INVALID_LOGIN).into());
    };

    let user = login_github_user(&state.db, &profile, metadata).await?;
    LOGINS_TOTAL.with_label_values(&["github", "success"]).inc();
    tracing::info!(user_id = %user.id, login = %profile.login, "GitHub user signed in");

    state.user_sessions.create_user_session(&user.id)
}

// =============================================================================
// Logout
// =============================================================================

/// POST /logout
///
/// Clears the session cookie and redirects to login.
async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let set_cookie = state.user_sessions.logout(&headers);
    ([(header::SET_COOKIE, set_cookie)], Redirect::to("/login")).into_response()
}

// =============================================================================
// Helpers
// =============================================================================

fn signed_in(set_cookie: String, redirect_to: &str) -> Response {
    ([(header::SET_COOKIE, set_cookie)], Redirect::to(redirect_to)).into_response()
}

/// Only same-site paths are followed after login.
fn safe_redirect(target: Option<&str>) -> &str {
    match target {
        Some(target) if is_local_path(target) => target,
        _ => "/",
    }
}

/// Browsers treat `\` as `/` and drop tabs and newlines, so the target must
/// still resolve against a placeholder origin without leaving it.
fn is_local_path(target: &str) -> bool {
    const PLACEHOLDER_ORIGIN: &str = "http://local.invalid/";

    if !target.starts_with('/') || target.contains('\\') {
        return false;
    }
    let Ok(base) = url::Url::parse(PLACEHOLDER_ORIGIN) else {
        return false;
    };
    base.join(target)
        .is_ok_and(|resolved| resolved.origin() == base.origin())
}

struct GrantError<'a> {
    message: &'a str,
    description: Option<&'a str>,
    uri: Option<&'a str>,
}

#[derive(Default)]
struct LoginView<'a> {
    grant_error: Option<GrantError<'a>>,
    form_error: Option<&'a FormError>,
    github_error: Option<&'a str>,
    redirect_to: &'a str,
    /// Mount point of the connect routes
    connect_prefix: &'a str,
}

fn render_login_response(status: StatusCode, view: &LoginView<'_>) -> Response {
    (status, Html(render_login(view))).into_response()
}

fn layout(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>{title}</title></head>
<body>
{body}
</body>
</html>
"#,
        title = text(title),
    )
}

fn alert(message: &str) -> String {
    format!(r#"<p class="error" role="alert">{}</p>"#, text(message))
}

fn render_login(view: &LoginView<'_>) -> String {
    let mut body = String::new();

    if let Some(error) = &view.grant_error {
        body.push_str(r#"<div class="grant-error">"#);
        body.push_str(&format!("<strong>{}</strong>", text(error.message)));
        if let Some(description) = error.description {
            body.push_str(&format!("<div>{}</div>", text(description)));
        }
        if let Some(uri) = error.uri {
            body.push_str(&format!(
                r#"<div><a target="_blank" href="{}">click for more details...</a></div>"#,
                attr(uri)
            ));
        }
        body.push_str("</div>\n");
    }

    body.push_str("<h1>Login</h1>\n");

    // GitHub
    body.push_str(r#"<section id="github"><h2>GitHub</h2>"#);
    body.push_str(&format!(
        r#"<a href="{}/github">Sign in with GitHub</a>"#,
        attr(view.connect_prefix)
    ));
    if let Some(message) = view.github_error {
        body.push_str(&alert(message));
    }
    body.push_str("</section>\n");

    // Password
    let field = |name: &str| {
        view.form_error
            .and_then(|form| form.fields.get(name))
            .map(String::as_str)
            .unwrap_or_default()
    };
    let field_error = |name: &str| {
        view.form_error
            .and_then(|form| form.field_errors.get(name))
            .map(|message| alert(message))
            .unwrap_or_default()
    };
    let register_checked = field("loginType") == "register";

    body.push_str(&format!(
        r#"<section id="password"><h2>Password</h2>
<form method="post" action="/login">
<input type="hidden" name="redirectTo" value="{redirect_to}">
<fieldset>
<legend>Login or Register?</legend>
<label><input type="radio" name="loginType" value="login"{login_checked}> Login</label>
<label><input type="radio" name="loginType" value="register"{register_checked}> Register</label>
</fieldset>
<div><label for="username-input">Username</label>
<input id="username-input" name="username" placeholder="kody" value="{username}">{username_error}</div>
<div><label for="password-input">Password</label>
<input id="password-input" name="password" type="password" placeholder="twixrox">{password_error}</div>
{form_error}<button type="submit">Login</button>
</form>
</section>"#,
        redirect_to = attr(view.redirect_to),
        login_checked = if register_checked { "" } else { " checked" },
        register_checked = if register_checked { " checked" } else { "" },
        username = attr(field("username")),
        username_error = field_error("username"),
        password_error = field_error("password"),
        form_error = view
            .form_error
            .map(|form| alert(&form.message))
            .unwrap_or_default(),
    ));

    layout("Login", &body)
}

fn render_home(user: &User) -> String {
    let avatar = user
        .metadata
        .as_ref()
        .and_then(|metadata| metadata.get("avatar_url"))
        .and_then(serde_json::Value::as_str)
        .map(|url| {
            format!(
                r#"<img class="avatar" src="{}" alt="{}">"#,
                attr(url),
                attr(&user.username)
            )
        })
        .unwrap_or_default();

    let body = format!(
        r#"<main>
<div>{avatar}<h1>Hello {username}</h1></div>
<h3>Message board</h3>
<form method="post" action="/logout"><button name="logout" type="submit">Logout</button></form>
</main>"#,
        username = text(&user.username),
    );

    layout("Home", &body)
}
