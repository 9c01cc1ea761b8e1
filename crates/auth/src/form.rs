use crate::error::{GateError, Result};
use otpgate_models::{Identity, LoginMethod, NewApprovalRecord};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Contents of the login form as last submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub method: LoginMethod,

    /// Email address or username, used by [`LoginMethod::Email`].
    #[serde(default)]
    pub email_or_username: String,

    pub country_code: String,

    /// Local number without the country code, used by [`LoginMethod::Phone`].
    #[serde(default)]
    pub phone: String,

    #[serde(default)]
    pub password: String,
}

impl LoginForm {
    pub fn new(default_country_code: &str) -> Self {
        Self {
            method: LoginMethod::Email,
            email_or_username: String::new(),
            country_code: default_country_code.to_string(),
            phone: String::new(),
            password: String::new(),
        }
    }

    /// The identity the selected method produces.
    pub fn identity(&self) -> Identity {
        match self.method {
            LoginMethod::Email => Identity::email_or_username(self.email_or_username.trim()),
            LoginMethod::Phone => Identity::phone(self.country_code.trim(), self.phone.trim()),
        }
    }

    /// Shape-check the form and build the row to insert.
    pub fn to_new_record(&self) -> Result<NewApprovalRecord> {
        // The country code alone does not count as a phone number
        let raw = match self.method {
            LoginMethod::Email => &self.email_or_username,
            LoginMethod::Phone => &self.phone,
        };
        if raw.trim().is_empty() {
            return Err(GateError::Validation(match self.method {
                LoginMethod::Email => "Please enter your email or username".to_string(),
                LoginMethod::Phone => "Please enter your phone number".to_string(),
            }));
        }

        let new = NewApprovalRecord::new(self.identity(), self.password.clone());
        new.validate()?;
        Ok(new)
    }
}
