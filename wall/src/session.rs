use anyhow::{Context, Result};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use uuid::Uuid;

use crate::i18n::Locale;

/// The signed-in member on whose behalf wall operations run.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub name: Option<String>,
    pub access_token: String,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("email", &self.email)
            .field("name", &self.name)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// Claims carried by a backend access token.
#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user_metadata: UserMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct UserMetadata {
    #[serde(default)]
    name: Option<String>,
}

impl Session {
    pub fn new(user_id: Uuid, access_token: impl Into<String>) -> Self {
        Self {
            user_id,
            email: None,
            name: None,
            access_token: access_token.into(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Build a session from the claims of an access token. The signature is
    /// checked by the backend on every request, not here.
    pub fn from_access_token(token: &str) -> Result<Self> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();
        let data = decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)
            .context("invalid access token")?;
        let user_id = Uuid::parse_str(&data.claims.sub).context("access token subject is not a user id")?;
        Ok(Self {
            user_id,
            email: data.claims.email,
            name: data.claims.user_metadata.name,
            access_token: token.to_string(),
        })
    }

    /// Name stored on the posts this member writes: the profile name, else
    /// the local part of the email, else the anonymous label.
    pub fn display_name(&self, locale: Locale) -> String {
        if let Some(name) = self.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        if let Some(local) = self
            .email
            .as_deref()
            .and_then(|e| e.split('@').next())
            .filter(|l| !l.is_empty())
        {
            return local.to_string();
        }
        locale.messages().anonymous.to_string()
    }
}
