// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Callback credential normalization.
//!
//! Web platforms hand the callback a URL (tokens in the query string or the
//! `#fragment`); mobile platforms hand over parameters that are already
//! parsed. Both shapes are reduced here to one [`Credentials`] triple, and
//! nothing else in the crate looks at raw callback input.

use std::collections::HashMap;

use url::Url;

use crate::backend::Credential;
use crate::error::AppError;

/// Raw callback input as delivered by the platform.
#[derive(Debug, Clone)]
pub enum CallbackInput {
    Url(String),
    Params(HashMap<String, String>),
    /// Both shapes present; parameters win field by field.
    Both {
        url: String,
        params: HashMap<String, String>,
    },
}

/// Canonical credential triple.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub code: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &self.access_token.is_some())
            .field("refresh_token", &self.refresh_token.is_some())
            .field("code", &self.code.is_some())
            .finish()
    }
}

impl Credentials {
    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none() && self.code.is_none()
    }

    /// The credential to resolve a session with: an exchange code first,
    /// then a full token pair, then a bare refresh token.
    pub fn credential(&self) -> Option<Credential> {
        if let Some(code) = &self.code {
            return Some(Credential::Code(code.clone()));
        }
        match (&self.access_token, &self.refresh_token) {
            (Some(access), Some(refresh)) => Some(Credential::Tokens {
                access_token: access.clone(),
                refresh_token: refresh.clone(),
            }),
            (_, Some(refresh)) => Some(Credential::RefreshToken(refresh.clone())),
            _ => None,
        }
    }

    /// Fill fields that are still empty from `other`.
    fn or(self, other: Credentials) -> Credentials {
        Credentials {
            access_token: self.access_token.or(other.access_token),
            refresh_token: self.refresh_token.or(other.refresh_token),
            code: self.code.or(other.code),
        }
    }
}

/// Key-value view over one representation of the callback.
struct Fields(Vec<(String, String)>);

impl Fields {
    fn from_map(params: &HashMap<String, String>) -> Self {
        Self(params.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    /// Query pairs first, then fragment pairs, so the fragment wins lookups.
    fn from_url(raw: &str) -> Result<Self, AppError> {
        let url = Url::parse(raw.trim())
            .map_err(|e| AppError::BadRequest(format!("Malformed callback URL: {}", e)))?;

        let mut pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        if let Some(fragment) = url.fragment() {
            pairs.extend(url::form_urlencoded::parse(fragment.as_bytes()).into_owned());
        }
        Ok(Self(pairs))
    }

    /// Last non-blank value for the first of `keys` that has one.
    fn get(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|key| {
            self.0
                .iter()
                .rev()
                .find(|(k, v)| k == key && !v.trim().is_empty())
                .map(|(_, v)| v.trim().to_string())
        })
    }

    fn credentials(&self) -> Credentials {
        Credentials {
            access_token: self.get(&["access_token", "accessToken"]),
            refresh_token: self.get(&["refresh_token", "refreshToken"]),
            code: self.get(&["code"]),
        }
    }

    /// Provider-reported failure (`error` / `error_description`).
    fn provider_error(&self) -> Option<AppError> {
        let error = self.get(&["error", "error_code"])?;
        let reason = self.get(&["error_description"]).unwrap_or(error);
        Some(AppError::AuthRejected(reason))
    }
}

/// Reduce any callback shape to one credential triple.
///
/// # Errors
///
/// [`AppError::AuthRejected`] if the provider reported an error instead of
/// credentials, [`AppError::BadRequest`] if a URL-only input does not parse.
pub fn normalize(input: &CallbackInput) -> Result<Credentials, AppError> {
    match input {
        CallbackInput::Params(params) => from_fields(&Fields::from_map(params)),
        CallbackInput::Url(url) => from_fields(&Fields::from_url(url)?),
        CallbackInput::Both { url, params } => {
            let structured = Fields::from_map(params);
            if let Some(err) = structured.provider_error() {
                return Err(err);
            }

            let url_fields = match Fields::from_url(url) {
                Ok(fields) => Some(fields),
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring unparseable callback URL");
                    None
                }
            };
            let from_url = url_fields
                .as_ref()
                .map(Fields::credentials)
                .unwrap_or_default();
            let merged = structured.credentials().or(from_url);

            // An error in the URL only counts when nothing usable was delivered
            if merged.credential().is_none() {
                if let Some(err) = url_fields.as_ref().and_then(Fields::provider_error) {
                    return Err(err);
                }
            }
            Ok(merged)
        }
    }
}

fn from_fields(fields: &Fields) -> Result<Credentials, AppError> {
    if let Some(err) = fields.provider_error() {
        return Err(err);
    }
    Ok(fields.credentials())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_code_from_query() {
        let input = CallbackInput::Url("chatapp://auth/callback?code=abc123".to_string());
        let creds = normalize(&input).unwrap();
        assert_eq!(creds.code.as_deref(), Some("abc123"));
        assert_eq!(creds.credential(), Some(Credential::Code("abc123".to_string())));
    }

    #[test]
    fn test_tokens_from_fragment() {
        let input = CallbackInput::Url(
            "https://app.example.com/auth/callback#access_token=at&refresh_token=rt&type=magiclink"
                .to_string(),
        );
        let creds = normalize(&input).unwrap();
        assert_eq!(
            creds.credential(),
            Some(Credential::Tokens {
                access_token: "at".to_string(),
                refresh_token: "rt".to_string(),
            })
        );
    }

    #[test]
    fn test_params_win_over_url() {
        let input = CallbackInput::Both {
            url: "chatapp://cb?code=from-url&refresh_token=url-rt".to_string(),
            params: params(&[("code", "from-params")]),
        };
        let creds = normalize(&input).unwrap();
        assert_eq!(creds.code.as_deref(), Some("from-params"));
        // Fields the params lack still come from the URL
        assert_eq!(creds.refresh_token.as_deref(), Some("url-rt"));
    }

    #[test]
    fn test_camel_case_params() {
        let input = CallbackInput::Params(params(&[
            ("accessToken", "at"),
            ("refreshToken", "rt"),
        ]));
        let creds = normalize(&input).unwrap();
        assert_eq!(creds.access_token.as_deref(), Some("at"));
        assert_eq!(creds.refresh_token.as_deref(), Some("rt"));
    }

    #[test]
    fn test_snake_case_wins_over_camel_case() {
        for _ in 0..16 {
            let input = CallbackInput::Params(params(&[
                ("accessToken", "camel-at"),
                ("access_token", "snake-at"),
                ("refreshToken", "camel-rt"),
                ("refresh_token", "snake-rt"),
            ]));
            let creds = normalize(&input).unwrap();
            assert_eq!(creds.access_token.as_deref(), Some("snake-at"));
            assert_eq!(creds.refresh_token.as_deref(), Some("snake-rt"));
        }

        // Blank snake_case falls through to camelCase
        let input = CallbackInput::Params(params(&[("refresh_token", " "), ("refreshToken", "rt")]));
        assert_eq!(normalize(&input).unwrap().refresh_token.as_deref(), Some("rt"));
    }

    #[test]
    fn test_url_error_yields_to_param_code() {
        let input = CallbackInput::Both {
            url: "chatapp://cb#error=access_denied&error_description=expired".to_string(),
            params: params(&[("code", "abc")]),
        };
        assert_eq!(normalize(&input).unwrap().code.as_deref(), Some("abc"));

        // Without a usable credential the URL's error still surfaces
        let input = CallbackInput::Both {
            url: "chatapp://cb#error=access_denied&error_description=expired".to_string(),
            params: params(&[("access_token", "at")]),
        };
        assert!(matches!(normalize(&input), Err(AppError::AuthRejected(_))));

        // An error in the params wins regardless
        let input = CallbackInput::Both {
            url: "chatapp://cb?code=abc".to_string(),
            params: params(&[("error", "access_denied")]),
        };
        assert!(matches!(normalize(&input), Err(AppError::AuthRejected(_))));
    }

    #[test]
    fn test_blank_values_are_absent() {
        let input = CallbackInput::Params(params(&[("code", "  "), ("access_token", "")]));
        let creds = normalize(&input).unwrap();
        assert!(creds.is_empty());
        assert_eq!(creds.credential(), None);
    }

    #[test]
    fn test_refresh_token_alone() {
        let input = CallbackInput::Params(params(&[("refresh_token", "rt")]));
        assert_eq!(
            normalize(&input).unwrap().credential(),
            Some(Credential::RefreshToken("rt".to_string()))
        );
    }

    #[test]
    fn test_access_token_alone_is_not_enough() {
        let input = CallbackInput::Params(params(&[("access_token", "at")]));
        assert_eq!(normalize(&input).unwrap().credential(), None);
    }

    #[test]
    fn test_provider_error_is_rejected() {
        let input = CallbackInput::Url(
            "chatapp://cb#error=access_denied&error_description=Email+link+is+invalid+or+has+expired"
                .to_string(),
        );
        match normalize(&input) {
            Err(AppError::AuthRejected(reason)) => {
                assert_eq!(reason, "Email link is invalid or has expired")
            }
            other => panic!("expected AuthRejected, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_url() {
        let input = CallbackInput::Url("not a url".to_string());
        assert!(matches!(normalize(&input), Err(AppError::BadRequest(_))));

        // Ignored when params carry the credential
        let input = CallbackInput::Both {
            url: "not a url".to_string(),
            params: params(&[("code", "abc")]),
        };
        assert_eq!(normalize(&input).unwrap().code.as_deref(), Some("abc"));
    }
}
