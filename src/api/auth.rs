/// Auth endpoints: /login, /signup, /refresh, /logout and /me
use crate::{
    account::{LoginRequest, LogoutResponse, MeResponse, RefreshRequest, SignupRequest, TokenResponse},
    api::middleware::{cookie_value, extract_access_token, ClientInfo, ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE},
    auth::AuthContext,
    context::AppContext,
    error::{GuardError, GuardResult},
    flows::IssuedSession,
};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};

/// Build auth routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/login", post(login))
        .route("/signup", post(signup))
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
        .route("/me", get(me))
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> GuardResult<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| GuardError::Validation(rejection.body_text()))
}

fn auth_cookie(name: &'static str, value: String, max_age: time::Duration, secure: bool) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .same_site(SameSite::Strict)
        .path("/")
        .secure(secure)
        .max_age(max_age)
        .build()
}

fn with_session_cookies(jar: CookieJar, issued: &IssuedSession, secure: bool) -> CookieJar {
    let max_age = time::Duration::seconds(issued.cookie_max_age().num_seconds());

    jar.add(auth_cookie(ACCESS_TOKEN_COOKIE, issued.body.access_token.clone(), max_age, secure))
        .add(auth_cookie(REFRESH_TOKEN_COOKIE, issued.body.refresh_token.clone(), max_age, secure))
}

fn cleared_cookies(jar: CookieJar, secure: bool) -> CookieJar {
    jar.add(auth_cookie(ACCESS_TOKEN_COOKIE, String::new(), time::Duration::ZERO, secure))
        .add(auth_cookie(REFRESH_TOKEN_COOKIE, String::new(), time::Duration::ZERO, secure))
}

/// Login endpoint
async fn login(
    State(ctx): State<AppContext>,
    client: ClientInfo,
    jar: CookieJar,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> GuardResult<(CookieJar, Json<TokenResponse>)> {
    let request = json_body(payload)?;
    tracing::debug!(ip = %client.ip, "login: attempt received");

    let issued = ctx.auth.login(request, &client).await?;
    let jar = with_session_cookies(jar, &issued, ctx.config.authentication.secure_cookies);

    Ok((jar, Json(issued.body)))
}

/// Signup endpoint
async fn signup(
    State(ctx): State<AppContext>,
    client: ClientInfo,
    jar: CookieJar,
    payload: Result<Json<SignupRequest>, JsonRejection>,
) -> GuardResult<(StatusCode, CookieJar, Json<TokenResponse>)> {
    let request = json_body(payload)?;
    tracing::debug!(ip = %client.ip, "signup: attempt received");

    let issued = ctx.auth.signup(request, &client).await?;
    let jar = with_session_cookies(jar, &issued, ctx.config.authentication.secure_cookies);

    Ok((StatusCode::CREATED, jar, Json(issued.body)))
}

/// Refresh endpoint; any failure also clears the auth cookies
async fn refresh(
    State(ctx): State<AppContext>,
    client: ClientInfo,
    jar: CookieJar,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Response {
    let secure = ctx.config.authentication.secure_cookies;
    let token = payload
        .ok()
        .and_then(|Json(request)| request.refresh_token)
        .filter(|token| !token.is_empty())
        .or_else(|| cookie_value(&jar, REFRESH_TOKEN_COOKIE));

    match ctx.auth.refresh(token, &client).await {
        Ok(issued) => {
            let jar = with_session_cookies(jar, &issued, secure);
            (jar, Json(issued.body)).into_response()
        }
        Err(e) => (cleared_cookies(jar, secure), e).into_response(),
    }
}

/// Logout endpoint; always 200
async fn logout(
    State(ctx): State<AppContext>,
    client: ClientInfo,
    headers: HeaderMap,
    jar: CookieJar,
) -> (CookieJar, Json<LogoutResponse>) {
    let access_token = extract_access_token(&headers, &jar);
    let refresh_token = cookie_value(&jar, REFRESH_TOKEN_COOKIE);

    let response = ctx.auth.logout(access_token, refresh_token, &client).await;

    (
        cleared_cookies(jar, ctx.config.authentication.secure_cookies),
        Json(response),
    )
}

/// Current account endpoint
async fn me(State(ctx): State<AppContext>, auth: AuthContext) -> GuardResult<Json<MeResponse>> {
    tracing::debug!(account_id = %auth.account_id(), "me: profile requested");
    let profile = ctx.auth.me(&auth.claims).await?;
    Ok(Json(profile))
}
