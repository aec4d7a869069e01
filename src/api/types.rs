use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::database::models::{ClientMeta, User};
use crate::error::{AuthError, FieldError};

/// Transport-level facts about one request
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub device_info: Option<String>,
    /// Raw `Authorization` header value
    pub authorization: Option<String>,
}

impl RequestContext {
    pub fn new(ip_address: Option<&str>, user_agent: Option<&str>) -> Self {
        Self {
            ip_address: ip_address.map(str::to_string),
            user_agent: user_agent.map(str::to_string),
            ..Default::default()
        }
    }

    pub fn with_bearer(mut self, token: &str) -> Self {
        self.authorization = Some(format!("Bearer {}", token));
        self
    }

    pub fn meta(&self) -> ClientMeta {
        ClientMeta {
            ip_address: self.ip_address.clone(),
            user_agent: self.user_agent.clone(),
            device_info: self.device_info.clone(),
        }
    }
}

/// Response body shared by every route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<FieldError>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse {
    pub status: u16,
    /// Seconds a rate-limited client should wait
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    pub body: Envelope,
}

impl ApiResponse {
    pub fn ok(status: u16, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            status,
            retry_after: None,
            body: Envelope {
                success: true,
                message: message.into(),
                data,
                errors: None,
            },
        }
    }

    pub fn failure(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            retry_after: None,
            body: Envelope {
                success: false,
                message: message.into(),
                data: None,
                errors: None,
            },
        }
    }

    pub fn is_success(&self) -> bool {
        self.body.success
    }

    /// Field of `data`, for callers that only need one value
    pub fn data_field(&self, name: &str) -> Option<&Value> {
        self.body.data.as_ref().and_then(|d| d.get(name))
    }
}

impl From<AuthError> for ApiResponse {
    fn from(err: AuthError) -> Self {
        let mut response = ApiResponse::failure(err.status_code(), err.public_message());
        if let Some(errors) = err.field_errors() {
            response.body.errors = Some(errors.to_vec());
        }
        if let AuthError::RateLimited { retry_after_secs } = err {
            response.retry_after = Some(retry_after_secs);
        }
        response
    }
}

/// Public projection of a user; never carries hashes or tokens
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub email_verified: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            email_verified: user.email_verified,
            last_login_at: user.last_login_at,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TokenBody {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct EmailBody {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginBody {
    pub email: String,
    pub password: String,
    #[serde(default, rename = "deviceInfo")]
    pub device_info: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshBody {
    pub refresh_token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutBody {
    #[serde(default)]
    pub all_devices: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordBody {
    pub token: String,
    pub password: String,
    pub confirm_password: String,
}
