use serde::{Deserialize, Serialize};

/// Default dialling prefix offered by the phone login method.
pub const DEFAULT_COUNTRY_CODE: &str = "+1264";

/// Which identity input the login form is showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginMethod {
    /// Single free-text field accepting an email address or a username.
    #[default]
    Email,
    Phone,
}

impl std::fmt::Display for LoginMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Email => write!(f, "email"),
            Self::Phone => write!(f, "phone"),
        }
    }
}

impl std::str::FromStr for LoginMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" | "username" => Ok(Self::Email),
            "phone" => Ok(Self::Phone),
            _ => Err(format!("Unknown login method: {}", s)),
        }
    }
}

/// The single identity channel a record is created with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Identity {
    Email(String),
    Username(String),
    /// Full number including the country code prefix.
    Phone(String),
}

impl Identity {
    /// Classify the free-text field of the email login method: anything
    /// containing `@` is an email address, everything else a username.
    pub fn email_or_username(value: &str) -> Self {
        if value.contains('@') {
            Self::Email(value.to_string())
        } else {
            Self::Username(value.to_string())
        }
    }

    /// Phone identity with the country code prepended verbatim.
    pub fn phone(country_code: &str, number: &str) -> Self {
        Self::Phone(format!("{}{}", country_code, number))
    }

    pub fn value(&self) -> &str {
        match self {
            Self::Email(v) | Self::Username(v) | Self::Phone(v) => v,
        }
    }

    pub fn method(&self) -> LoginMethod {
        match self {
            Self::Email(_) | Self::Username(_) => LoginMethod::Email,
            Self::Phone(_) => LoginMethod::Phone,
        }
    }

    pub(crate) fn kind_label(&self) -> &'static str {
        match self {
            Self::Email(_) => "Email",
            Self::Username(_) => "Username",
            Self::Phone(_) => "Phone number",
        }
    }

    /// Split into the `(email, username, phone)` column triple.
    pub fn columns(&self) -> (Option<String>, Option<String>, Option<String>) {
        match self {
            Self::Email(v) => (Some(v.clone()), None, None),
            Self::Username(v) => (None, Some(v.clone()), None),
            Self::Phone(v) => (None, None, Some(v.clone())),
        }
    }

    /// Inverse of [`Identity::columns`]. `None` unless exactly one column is set.
    pub fn from_columns(
        email: Option<&str>,
        username: Option<&str>,
        phone: Option<&str>,
    ) -> Option<Self> {
        match (email, username, phone) {
            (Some(e), None, None) => Some(Self::Email(e.to_string())),
            (None, Some(u), None) => Some(Self::Username(u.to_string())),
            (None, None, Some(p)) => Some(Self::Phone(p.to_string())),
            _ => None,
        }
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.value())
    }
}
