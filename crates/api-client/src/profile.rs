//! Account and credential types exchanged with the backend

use serde::{Deserialize, Deserializer, Serialize};

/// Role of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    /// Regular customer
    #[default]
    User,
    /// Support staff
    Operator,
    /// Full administrator
    Admin,
}

impl UserRole {
    /// Whether the role may see staff-only sections
    pub fn is_staff(&self) -> bool {
        matches!(self, UserRole::Operator | UserRole::Admin)
    }
}

/// Account status as reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    /// Account in good standing
    #[default]
    Active,
    /// Temporarily disabled
    Suspended,
    /// Banned, see `ban_reason` / `ban_until`
    Banned,
}

/// Profile of the signed-in account
///
/// Only `id`, `email` and `balance` are required; everything else falls back
/// to a default so older or trimmed responses still decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Account id
    pub id: i64,
    /// Login email
    pub email: String,
    /// Given name
    #[serde(default)]
    pub first_name: Option<String>,
    /// Family name
    #[serde(default)]
    pub last_name: Option<String>,
    /// Company name
    #[serde(default)]
    pub company: Option<String>,
    /// Account role
    #[serde(default)]
    pub role: UserRole,
    /// Credit balance as a decimal string, e.g. `"10.00"`
    #[serde(deserialize_with = "decimal_string")]
    pub balance: String,
    /// Account status
    #[serde(default)]
    pub status: UserStatus,
    /// Reason given for a ban
    #[serde(default)]
    pub ban_reason: Option<String>,
    /// End of a temporary ban, as sent by the server
    #[serde(default)]
    pub ban_until: Option<String>,
    /// Creation timestamp, as sent by the server
    #[serde(default)]
    pub created_at: Option<String>,
    /// Last login timestamp, as sent by the server
    #[serde(default)]
    pub last_login: Option<String>,
}

impl UserProfile {
    /// First and last name joined, if either is set
    pub fn full_name(&self) -> Option<String> {
        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|p| !p.is_empty())
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }

    /// Name used in greetings: first name, else full name, else email
    pub fn display_name(&self) -> String {
        self.first_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .or_else(|| self.full_name())
            .unwrap_or_else(|| self.email.clone())
    }

    /// Uppercase initials of the first and last name, for avatar badges
    pub fn initials(&self) -> String {
        [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter_map(|name| name.chars().next())
            .flat_map(char::to_uppercase)
            .collect()
    }

    /// Whether the account is an administrator
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    /// Whether the account may see staff-only sections
    pub fn is_staff(&self) -> bool {
        self.role.is_staff()
    }

    /// Whether the account is in good standing
    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }
}

/// Accept the balance as either a JSON string or a JSON number
fn decimal_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected decimal balance, found {}",
            other
        ))),
    }
}

/// Access/refresh token pair issued by login, registration and refresh
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    /// Short-lived bearer token
    pub access_token: String,
    /// Long-lived token used to obtain a new pair
    pub refresh_token: String,
    /// Token scheme, always "bearer"
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl TokenPair {
    /// Create a bearer token pair
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            token_type: default_token_type(),
        }
    }
}

/// Login request body
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest<'a> {
    /// Login email
    pub email: &'a str,
    /// Password
    pub password: &'a str,
}

/// Registration request body
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewAccount {
    /// Login email
    pub email: String,
    /// Password
    pub password: String,
    /// Given name
    pub first_name: String,
    /// Family name
    pub last_name: String,
    /// Company name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
}

impl NewAccount {
    /// Create a registration request without a company
    pub fn new(
        email: impl Into<String>,
        password: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            company: None,
        }
    }

    /// Attach a company name
    pub fn with_company(mut self, company: impl Into<String>) -> Self {
        self.company = Some(company.into());
        self
    }
}

/// Refresh request body
#[derive(Debug, Clone, Serialize)]
pub struct RefreshRequest<'a> {
    /// Current refresh token
    pub refresh_token: &'a str,
}
