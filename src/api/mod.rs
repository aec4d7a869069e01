//! Transport-neutral request dispatch for the `/auth` routes.
//!
//! `AuthApi::handle` takes a method, a path and a raw JSON body and returns a
//! status code plus the `{success, message, data?, errors?}` envelope, so any
//! HTTP server (or the CLI) can sit in front of it.

use log::{debug, error};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::{AuthError, AuthResult};
use crate::security::rate_limit::{RateLimiter, RouteClass};
use crate::security::session::SessionManager;
use crate::user::{PasswordResetManager, RegistrationManager, RegistrationRequest, VerificationManager};

pub mod types;

pub use types::{ApiResponse, Envelope, RequestContext, UserView};
use types::{EmailBody, LoginBody, LogoutBody, RefreshBody, ResetPasswordBody, TokenBody};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Register,
    VerifyEmail,
    ResendVerification,
    Login,
    Refresh,
    Logout,
    ForgotPassword,
    ResetPassword,
    Me,
    Sessions,
}

impl Route {
    fn resolve(path: &str) -> Option<(Route, &'static str)> {
        let path = path.split('?').next().unwrap_or(path).trim_end_matches('/');
        let route = match path {
            "/auth/register" => (Route::Register, "POST"),
            "/auth/verify-email" => (Route::VerifyEmail, "POST"),
            "/auth/resend-verification" => (Route::ResendVerification, "POST"),
            "/auth/login" => (Route::Login, "POST"),
            "/auth/refresh" => (Route::Refresh, "POST"),
            "/auth/logout" => (Route::Logout, "POST"),
            "/auth/forgot-password" => (Route::ForgotPassword, "POST"),
            "/auth/reset-password" => (Route::ResetPassword, "POST"),
            "/auth/me" => (Route::Me, "GET"),
            "/auth/sessions" => (Route::Sessions, "GET"),
            _ => return None,
        };
        Some(route)
    }

    fn rate_class(&self) -> RouteClass {
        match self {
            Route::Register => RouteClass::Register,
            Route::VerifyEmail => RouteClass::VerifyEmail,
            Route::ResendVerification => RouteClass::ResendVerification,
            Route::Login => RouteClass::Login,
            Route::Refresh => RouteClass::Refresh,
            Route::ForgotPassword | Route::ResetPassword => RouteClass::PasswordReset,
            Route::Logout | Route::Me | Route::Sessions => RouteClass::Global,
        }
    }
}

pub struct AuthApi {
    registration: Arc<RegistrationManager>,
    verification: Arc<VerificationManager>,
    sessions: Arc<SessionManager>,
    password_reset: Arc<PasswordResetManager>,
    rate_limiter: Arc<RateLimiter>,
}

impl AuthApi {
    pub fn new(
        registration: Arc<RegistrationManager>,
        verification: Arc<VerificationManager>,
        sessions: Arc<SessionManager>,
        password_reset: Arc<PasswordResetManager>,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            registration,
            verification,
            sessions,
            password_reset,
            rate_limiter,
        }
    }

    /// Dispatch one request
    pub fn handle(&self, method: &str, path: &str, body: &str, ctx: &RequestContext) -> ApiResponse {
        let (route, expected_method) = match Route::resolve(path) {
            Some(found) => found,
            None => return ApiResponse::failure(404, "Route not found"),
        };
        if !method.eq_ignore_ascii_case(expected_method) {
            return ApiResponse::failure(405, "Method not allowed");
        }

        let meta = ctx.meta();
        if let Err(e) = self.rate_limiter.check(route.rate_class(), meta.client_key()) {
            return e.into();
        }

        debug!("{} {}", expected_method, path);
        match self.dispatch(route, body, ctx) {
            Ok(response) => response,
            Err(ApiFailure::BadRequest(message)) => ApiResponse::failure(400, message),
            Err(ApiFailure::Auth(e)) => {
                if e.status_code() == 500 {
                    error!("{} {} failed: {}", expected_method, path, e);
                }
                e.into()
            }
        }
    }

    fn dispatch(&self, route: Route, body: &str, ctx: &RequestContext) -> Result<ApiResponse, ApiFailure> {
        let meta = ctx.meta();

        let response = match route {
            Route::Register => {
                let request: RegistrationRequest = parse(body)?;
                let outcome = self.registration.register(&request, &meta)?;
                ApiResponse::ok(
                    201,
                    "Registration successful. Please check your email to verify your account.",
                    Some(json!({
                        "user": UserView::from(&outcome.user),
                        "emailSent": outcome.email_sent,
                    })),
                )
            }
            Route::VerifyEmail => {
                let request: TokenBody = parse(body)?;
                let user = self.verification.verify_email(&request.token, &meta)?;
                ApiResponse::ok(200, "Email verified successfully", Some(json!({ "user": UserView::from(&user) })))
            }
            Route::ResendVerification => {
                let request: EmailBody = parse(body)?;
                self.verification.resend_verification(&request.email, &meta)?;
                ApiResponse::ok(
                    200,
                    "If the address belongs to an unverified account, a new verification email has been sent.",
                    None,
                )
            }
            Route::Login => {
                let request: LoginBody = parse(body)?;
                let mut meta = meta;
                if request.device_info.is_some() {
                    meta.device_info = request.device_info.clone();
                }
                let tokens = self.sessions.login(&request.email, &request.password, &meta)?;
                ApiResponse::ok(200, "Login successful", Some(to_value(&tokens)?))
            }
            Route::Refresh => {
                let request: RefreshBody = parse(body)?;
                let tokens = self.sessions.refresh(&request.refresh_token, &meta)?;
                ApiResponse::ok(200, "Token refreshed", Some(to_value(&tokens)?))
            }
            Route::Logout => {
                let context = self.sessions.require_auth(ctx.authorization.as_deref())?;
                let request: LogoutBody = if body.trim().is_empty() { LogoutBody::default() } else { parse(body)? };
                let outcome = self.sessions.logout(&context.session_id, request.all_devices, &meta)?;
                ApiResponse::ok(200, "Logged out successfully", Some(to_value(&outcome)?))
            }
            Route::ForgotPassword => {
                let request: EmailBody = parse(body)?;
                self.password_reset.request_password_reset(&request.email, &meta)?;
                ApiResponse::ok(
                    200,
                    "If the address belongs to an account, a password reset email has been sent.",
                    None,
                )
            }
            Route::ResetPassword => {
                let request: ResetPasswordBody = parse(body)?;
                self.password_reset.reset_password(&request.token, &request.password, &request.confirm_password, &meta)?;
                ApiResponse::ok(200, "Password has been reset. Please log in again.", None)
            }
            Route::Me => {
                let context = self.sessions.require_auth(ctx.authorization.as_deref())?;
                let user = self.sessions.current_user(&context)?;
                ApiResponse::ok(200, "OK", Some(json!({ "user": UserView::from(&user) })))
            }
            Route::Sessions => {
                let context = self.sessions.require_auth(ctx.authorization.as_deref())?;
                let sessions = self.sessions.list_sessions(&context.user_id, Some(&context.session_id))?;
                ApiResponse::ok(200, "OK", Some(json!({ "sessions": sessions })))
            }
        };

        Ok(response)
    }
}

enum ApiFailure {
    BadRequest(String),
    Auth(AuthError),
}

impl From<AuthError> for ApiFailure {
    fn from(err: AuthError) -> Self {
        ApiFailure::Auth(err)
    }
}

fn parse<T: DeserializeOwned>(body: &str) -> Result<T, ApiFailure> {
    serde_json::from_str(body).map_err(|e| {
        debug!("Rejected request body: {}", e);
        ApiFailure::BadRequest("Invalid request body".to_string())
    })
}

fn to_value<T: serde::Serialize>(value: &T) -> AuthResult<Value> {
    serde_json::to_value(value).map_err(|e| AuthError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::email::{DeliveryOutcome, EmailMessage, MockEmailSender};
    use crate::security::rate_limit::InMemoryRateLimitStore;
    use crate::test_util::Harness;
    use std::sync::Mutex;

    struct Fixture {
        h: Harness,
        api: AuthApi,
        outbox: Arc<Mutex<Vec<EmailMessage>>>,
    }

    fn fixture() -> Fixture {
        let h = Harness::new();
        let outbox = Arc::new(Mutex::new(Vec::new()));

        let mut mailer = MockEmailSender::new();
        let sent = outbox.clone();
        mailer.expect_send().returning(move |m| {
            sent.lock().unwrap().push(m.clone());
            DeliveryOutcome::Accepted
        });
        let mailer: Arc<MockEmailSender> = Arc::new(mailer);

        let sessions = Arc::new(SessionManager::new(
            h.store.clone(), h.hasher(), h.audit.clone(), h.clock.clone(), &h.config.security));
        let api = AuthApi::new(
            Arc::new(RegistrationManager::new(
                h.store.clone(), h.hasher(), mailer.clone(), h.audit.clone(), h.clock.clone(), &h.config)),
            Arc::new(VerificationManager::new(
                h.store.clone(), mailer.clone(), h.audit.clone(), h.clock.clone(), &h.config)),
            sessions.clone(),
            Arc::new(PasswordResetManager::new(
                h.store.clone(), h.hasher(), mailer, h.audit.clone(), h.clock.clone(), sessions, &h.config)),
            Arc::new(RateLimiter::new(
                Arc::new(InMemoryRateLimitStore::new()),
                h.config.rate_limits.clone(),
                h.audit.clone(),
                h.clock.clone(),
            )),
        );

        Fixture { h, api, outbox }
    }

    fn ctx() -> RequestContext {
        RequestContext::new(Some("198.51.100.20"), Some("api-test"))
    }

    const REGISTER: &str = r#"{"email":"alice@example.com","password":"Str0ng!Pass","confirmPassword":"Str0ng!Pass","firstName":"Alice","lastName":"Smith"}"#;

    #[test]
    fn test_register_returns_created() {
        let f = fixture();
        let response = f.api.handle("POST", "/auth/register", REGISTER, &ctx());

        assert_eq!(response.status, 201);
        assert!(response.is_success());
        let user = response.data_field("user").unwrap();
        assert_eq!(user["email"], "alice@example.com");
        assert_eq!(user["emailVerified"], false);
        assert!(user.get("passwordHash").is_none());
        assert_eq!(f.outbox.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_duplicate_registration_conflicts() {
        let f = fixture();
        f.api.handle("POST", "/auth/register", REGISTER, &ctx());
        let response = f.api.handle("POST", "/auth/register", &REGISTER.replace("alice@", "ALICE@"), &ctx());

        assert_eq!(response.status, 409);
        assert!(!response.is_success());
    }

    #[test]
    fn test_validation_errors_listed() {
        let f = fixture();
        let body = r#"{"email":"bad","password":"weak","confirmPassword":"weak","firstName":"A","lastName":"B"}"#;
        let response = f.api.handle("POST", "/auth/register", body, &ctx());

        assert_eq!(response.status, 400);
        let errors = response.body.errors.unwrap();
        assert!(errors.iter().any(|e| e.field == "email"));
        assert!(errors.iter().any(|e| e.field == "password"));
    }

    #[test]
    fn test_routing_errors() {
        let f = fixture();
        assert_eq!(f.api.handle("POST", "/auth/nope", "{}", &ctx()).status, 404);
        assert_eq!(f.api.handle("GET", "/auth/login", "", &ctx()).status, 405);
        assert_eq!(f.api.handle("POST", "/auth/login", "{not json", &ctx()).status, 400);
    }

    #[test]
    fn test_login_me_and_logout() {
        let f = fixture();
        f.api.handle("POST", "/auth/register", REGISTER, &ctx());

        let login = f.api.handle("POST", "/auth/login",
            r#"{"email":"alice@example.com","password":"Str0ng!Pass","deviceInfo":"laptop"}"#, &ctx());
        assert_eq!(login.status, 200);
        let access = login.data_field("accessToken").unwrap().as_str().unwrap().to_string();

        let authed = ctx().with_bearer(&access);
        let me = f.api.handle("GET", "/auth/me", "", &authed);
        assert_eq!(me.status, 200);
        assert_eq!(me.data_field("user").unwrap()["firstName"], "Alice");

        let sessions = f.api.handle("GET", "/auth/sessions", "", &authed);
        let listed = sessions.data_field("sessions").unwrap().as_array().unwrap().clone();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0]["deviceInfo"], "laptop");
        assert_eq!(listed[0]["current"], true);

        let logout = f.api.handle("POST", "/auth/logout", "", &authed);
        assert_eq!(logout.status, 200);
        assert_eq!(logout.data_field("sessionsRevoked").unwrap(), 1);

        assert_eq!(f.api.handle("GET", "/auth/me", "", &authed).status, 401);
    }

    #[test]
    fn test_bearer_routes_require_token() {
        let f = fixture();
        assert_eq!(f.api.handle("GET", "/auth/me", "", &ctx()).status, 401);
        assert_eq!(f.api.handle("POST", "/auth/logout", "{}", &ctx()).status, 401);
    }

    #[test]
    fn test_login_rate_limit() {
        let f = fixture();
        let body = r#"{"email":"nobody@example.com","password":"Wr0ng!Pass"}"#;
        for _ in 0..f.h.config.rate_limits.login.max_requests {
            assert_eq!(f.api.handle("POST", "/auth/login", body, &ctx()).status, 401);
        }

        let limited = f.api.handle("POST", "/auth/login", body, &ctx());
        assert_eq!(limited.status, 429);
        assert!(limited.retry_after.unwrap() > 0);

        // Other clients are unaffected
        let other = RequestContext::new(Some("198.51.100.99"), None);
        assert_eq!(f.api.handle("POST", "/auth/login", body, &other).status, 401);
    }

    #[test]
    fn test_server_errors_are_generic() {
        let err: ApiResponse = AuthError::Internal("disk on fire".into()).into();
        assert_eq!(err.status, 500);
        assert_eq!(err.body.message, "An unexpected error occurred");
    }
}
