//! Mail.tm provider — talks to the public HTTP API.

use std::time::Duration;

use tracing::debug;

use crate::error::ProviderError;
use crate::provider::{AccountId, MailboxProvider};

/// Mail.tm API adapter.
pub struct MailTmProvider {
    base_url: String,
    client: reqwest::Client,
}

impl MailTmProvider {
    /// Build a provider against `base_url` with a bounded request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::RequestFailed {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }
}

#[async_trait::async_trait]
impl MailboxProvider for MailTmProvider {
    async fn list_domains(&self) -> Result<Vec<String>, ProviderError> {
        let resp = self
            .client
            .get(self.endpoint("domains"))
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed {
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            return Err(ProviderError::UnexpectedStatus {
                status: resp.status().as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        parse_domains(&body)
    }

    async fn create_account(
        &self,
        address: &str,
        secret: &str,
    ) -> Result<AccountId, ProviderError> {
        let resp = self
            .client
            .post(self.endpoint("accounts"))
            .json(&serde_json::json!({
                "address": address,
                "password": secret,
            }))
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed {
                reason: e.to_string(),
            })?;

        if resp.status() != reqwest::StatusCode::CREATED {
            return Err(ProviderError::UnexpectedStatus {
                status: resp.status().as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        let id = parse_account_id(&body)?;
        debug!(address, account = %id, "Provider account created");
        Ok(id)
    }

    async fn delete_account(&self, id: &AccountId) -> Result<(), ProviderError> {
        let resp = self
            .client
            .delete(self.endpoint(&format!("accounts/{id}")))
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed {
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            return Err(ProviderError::UnexpectedStatus {
                status: resp.status().as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }

        debug!(account = %id, "Provider account deleted");
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Extract domain names from a `hydra:member` collection.
fn parse_domains(body: &serde_json::Value) -> Result<Vec<String>, ProviderError> {
    let members = body
        .get("hydra:member")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| {
            ProviderError::InvalidResponse("missing hydra:member collection".to_string())
        })?;

    let domains: Vec<String> = members
        .iter()
        .filter_map(|m| m.get("domain").and_then(serde_json::Value::as_str))
        .map(String::from)
        .collect();

    if domains.is_empty() {
        return Err(ProviderError::NoDomains);
    }
    Ok(domains)
}

/// Extract the account id from a creation response.
fn parse_account_id(body: &serde_json::Value) -> Result<AccountId, ProviderError> {
    match body.get("id") {
        Some(serde_json::Value::String(s)) => Ok(AccountId(s.clone())),
        Some(serde_json::Value::Number(n)) => Ok(AccountId(n.to_string())),
        _ => Err(ProviderError::InvalidResponse(
            "missing account id".to_string(),
        )),
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_join() {
        let p = MailTmProvider::new("https://api.mail.tm", Duration::from_secs(5)).unwrap();
        assert_eq!(p.endpoint("domains"), "https://api.mail.tm/domains");

        let p = MailTmProvider::new("https://api.mail.tm/", Duration::from_secs(5)).unwrap();
        assert_eq!(p.endpoint("accounts"), "https://api.mail.tm/accounts");
    }

    #[test]
    fn parse_domains_from_hydra_collection() {
        let body = serde_json::json!({
            "hydra:member": [
                {"id": "1", "domain": "example.com", "isActive": true},
                {"id": "2", "domain": "example.org", "isActive": true},
            ],
            "hydra:totalItems": 2,
        });
        let domains = parse_domains(&body).unwrap();
        assert_eq!(domains, vec!["example.com", "example.org"]);
    }

    #[test]
    fn parse_domains_empty_collection() {
        let body = serde_json::json!({"hydra:member": [], "hydra:totalItems": 0});
        assert!(matches!(parse_domains(&body), Err(ProviderError::NoDomains)));
    }

    #[test]
    fn parse_domains_missing_collection() {
        let body = serde_json::json!({"unexpected": true});
        assert!(matches!(
            parse_domains(&body),
            Err(ProviderError::InvalidResponse(_))
        ));
    }

    #[test]
    fn parse_account_id_string_and_number() {
        let body = serde_json::json!({"id": "abc123", "address": "x@example.com"});
        assert_eq!(parse_account_id(&body).unwrap(), AccountId("abc123".into()));

        let body = serde_json::json!({"id": 42});
        assert_eq!(parse_account_id(&body).unwrap(), AccountId("42".into()));
    }

    #[test]
    fn parse_account_id_missing() {
        let body = serde_json::json!({"address": "x@example.com"});
        assert!(parse_account_id(&body).is_err());
    }

    // ── Network error tests (no server listening) ───────────────────

    #[tokio::test]
    async fn list_domains_unreachable_host() {
        let p = MailTmProvider::new("http://127.0.0.1:1", Duration::from_secs(1)).unwrap();
        let err = p.list_domains().await.unwrap_err();
        assert!(matches!(err, ProviderError::RequestFailed { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn create_account_unreachable_host() {
        let p = MailTmProvider::new("http://127.0.0.1:1", Duration::from_secs(1)).unwrap();
        let err = p
            .create_account("someone@example.com", "supersecretpass0")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::RequestFailed { .. }));
    }

    #[tokio::test]
    async fn delete_account_unreachable_host() {
        let p = MailTmProvider::new("http://127.0.0.1:1", Duration::from_secs(1)).unwrap();
        let err = p.delete_account(&AccountId("42".into())).await.unwrap_err();
        assert!(matches!(err, ProviderError::RequestFailed { .. }));
    }
}
