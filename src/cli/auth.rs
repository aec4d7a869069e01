//! Account and session commands. Each one goes through the same request
//! facade an HTTP front end would use and prints its envelope.

use anyhow::Result;
use log::debug;
use serde_json::json;

use crate::api::ApiResponse;
use crate::cli::utils::{local_context, print_response, read_line, secret_or_prompt};
use crate::App;

fn post(app: &App, path: &str, body: serde_json::Value, token: Option<&str>) -> ApiResponse {
    debug!("CLI request POST {}", path);
    app.api.handle("POST", path, &body.to_string(), &local_context(token))
}

fn get(app: &App, path: &str, token: &str) -> ApiResponse {
    debug!("CLI request GET {}", path);
    app.api.handle("GET", path, "", &local_context(Some(token)))
}

pub fn register(
    app: &App,
    email: &str,
    first_name: &str,
    last_name: &str,
    password: Option<&str>,
) -> Result<bool> {
    let (password, confirm) = password_with_confirmation(password, "Password: ")?;

    let response = post(app, "/auth/register", json!({
        "email": email,
        "password": password,
        "confirmPassword": confirm,
        "firstName": first_name,
        "lastName": last_name,
    }), None);
    print_response(&response)
}

// A password given as an argument is its own confirmation
fn password_with_confirmation(password: Option<&str>, prompt: &str) -> Result<(String, String)> {
    match password {
        Some(p) => Ok((p.to_string(), p.to_string())),
        None => {
            let first = read_line(prompt)?;
            let second = read_line("Confirm password: ")?;
            Ok((first, second))
        }
    }
}

pub fn verify_email(app: &App, token: &str) -> Result<bool> {
    print_response(&post(app, "/auth/verify-email", json!({ "token": token }), None))
}

pub fn resend_verification(app: &App, email: &str) -> Result<bool> {
    print_response(&post(app, "/auth/resend-verification", json!({ "email": email }), None))
}

pub fn login(app: &App, email: &str, password: Option<&str>, device: Option<&str>) -> Result<bool> {
    let password = secret_or_prompt(password, "Password: ")?;
    let response = post(app, "/auth/login", json!({
        "email": email,
        "password": password,
        "deviceInfo": device,
    }), None);
    print_response(&response)
}

pub fn refresh(app: &App, refresh_token: &str) -> Result<bool> {
    print_response(&post(app, "/auth/refresh", json!({ "refreshToken": refresh_token }), None))
}

pub fn logout(app: &App, access_token: &str, all_devices: bool) -> Result<bool> {
    print_response(&post(app, "/auth/logout", json!({ "allDevices": all_devices }), Some(access_token)))
}

pub fn whoami(app: &App, access_token: &str) -> Result<bool> {
    print_response(&get(app, "/auth/me", access_token))
}

pub fn sessions(app: &App, access_token: &str) -> Result<bool> {
    print_response(&get(app, "/auth/sessions", access_token))
}

pub fn forgot_password(app: &App, email: &str) -> Result<bool> {
    print_response(&post(app, "/auth/forgot-password", json!({ "email": email }), None))
}

pub fn reset_password(app: &App, token: &str, password: Option<&str>) -> Result<bool> {
    let (password, confirm) = password_with_confirmation(password, "New password: ")?;
    print_response(&post(app, "/auth/reset-password", json!({
        "token": token,
        "password": password,
        "confirmPassword": confirm,
    }), None))
}
