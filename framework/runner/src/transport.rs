use async_trait::async_trait;
use gust_core::prelude::RuntimeError;

/// A fully resolved transaction descriptor, ready for the wire. Every `${}` placeholder has
/// been substituted and the correlation-id header (when present) filled with a fresh value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRequest {
    pub transaction: String,
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl ResolvedRequest {
    /// Renders a standalone curl command that re-issues this exact request, for reproducing
    /// failures outside the load run.
    pub fn replay_command(&self) -> String {
        let mut parts = vec![format!(
            "curl --location --request {} '{}'",
            self.method, self.url
        )];
        for (key, value) in &self.headers {
            parts.push(format!("--header '{key}: {value}'"));
        }
        if let Some(body) = &self.body {
            parts.push(format!("--data-raw '{body}'"));
        }
        parts.join(" \\\n")
    }
}

/// What came back from the wire.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

/// The seam to the HTTP layer, which lives outside this crate. The runtime hands over a
/// resolved descriptor and gets a response or a transport-level failure
/// ([`RuntimeError::TransportFailure`]); everything else about connections is the
/// implementation's business.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ResolvedRequest) -> Result<TransportResponse, RuntimeError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn replay_command_reproduces_the_request() {
        let request = ResolvedRequest {
            transaction: "Address CRUD - CREATE".to_string(),
            method: "POST".to_string(),
            url: "http://localhost:8088/api/address".to_string(),
            headers: vec![
                ("Content-Type".to_string(), "application/json".to_string()),
                ("clientId".to_string(), "AddressCreate".to_string()),
            ],
            body: Some(r#"{"city":"Houston"}"#.to_string()),
        };

        let expected = concat!(
            "curl --location --request POST 'http://localhost:8088/api/address' \\\n",
            "--header 'Content-Type: application/json' \\\n",
            "--header 'clientId: AddressCreate' \\\n",
            "--data-raw '{\"city\":\"Houston\"}'",
        );
        assert_eq!(request.replay_command(), expected);
    }

    #[test]
    fn replay_command_without_body_has_no_data_flag() {
        let request = ResolvedRequest {
            transaction: "read".to_string(),
            method: "GET".to_string(),
            url: "http://localhost:8088/api/address?orderId=1".to_string(),
            headers: vec![],
            body: None,
        };
        assert!(!request.replay_command().contains("--data-raw"));
    }
}
