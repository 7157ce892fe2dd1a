//! Federated identity assertion verification
//!
//! Login hands a browser-issued assertion to a remote verifier, which answers
//! with the verified email address.

use std::time::Duration;

use serde::Deserialize;

use crate::{Error, Result};

/// Verifier response body
#[derive(Debug, Deserialize)]
struct VerifierResponse {
    status: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

/// Client for a remote identity assertion verifier
#[derive(Debug, Clone)]
pub struct IdentityVerifier {
    client: reqwest::Client,
    verifier_url: String,
    audience: String,
}

impl IdentityVerifier {
    /// Create a verifier client for the given endpoint and audience
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(verifier_url: String, audience: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            verifier_url,
            audience,
        })
    }

    /// Verify an assertion and return the email it vouches for
    ///
    /// # Errors
    ///
    /// Returns `Auth` if the verifier rejects the assertion, `Http` on
    /// transport failure
    pub async fn verify(&self, assertion: &str) -> Result<String> {
        if assertion.is_empty() {
            return Err(Error::Auth("assertion not provided".to_string()));
        }

        let response = self
            .client
            .post(&self.verifier_url)
            .form(&[("assertion", assertion), ("audience", self.audience.as_str())])
            .send()
            .await?
            .error_for_status()?;

        let body: VerifierResponse = response.json().await?;
        email_from_response(body)
    }
}

fn email_from_response(body: VerifierResponse) -> Result<String> {
    if body.status != "okay" {
        let reason = body.reason.unwrap_or_else(|| "no reason given".to_string());
        tracing::info!(%reason, "identity assertion rejected");
        return Err(Error::Auth(format!("assertion rejected: {reason}")));
    }

    body.email
        .filter(|email| !email.is_empty())
        .ok_or_else(|| Error::Auth("verifier returned no email".to_string()))
}
