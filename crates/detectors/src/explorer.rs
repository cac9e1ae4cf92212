use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tokenwatch_core_types::Chain;
use tracing::{debug, warn};

use crate::http_utils::{classify_request_error, redacted_endpoint_label, trim_base_url};
use crate::SourceCodeProvider;

#[derive(Debug, Clone)]
struct ExplorerEndpoint {
    api_url: String,
    api_key: String,
}

/// Block-explorer `getsourcecode` client, one endpoint per chain.
#[derive(Debug, Clone)]
pub struct ExplorerSourceClient {
    client: Client,
    eth: ExplorerEndpoint,
    base: ExplorerEndpoint,
}

impl ExplorerSourceClient {
    pub fn new(
        client: Client,
        etherscan_api_url: &str,
        etherscan_api_key: &str,
        basescan_api_url: &str,
        basescan_api_key: &str,
    ) -> Self {
        Self {
            client,
            eth: ExplorerEndpoint {
                api_url: trim_base_url(etherscan_api_url),
                api_key: etherscan_api_key.trim().to_string(),
            },
            base: ExplorerEndpoint {
                api_url: trim_base_url(basescan_api_url),
                api_key: basescan_api_key.trim().to_string(),
            },
        }
    }

    fn endpoint(&self, chain: Chain) -> &ExplorerEndpoint {
        match chain {
            Chain::Eth => &self.eth,
            Chain::Base => &self.base,
        }
    }
}

#[async_trait]
impl SourceCodeProvider for ExplorerSourceClient {
    async fn fetch_source(&self, chain: Chain, address: &str) -> Option<String> {
        let endpoint = self.endpoint(chain);
        let response = match self
            .client
            .get(&endpoint.api_url)
            .query(&[
                ("module", "contract"),
                ("action", "getsourcecode"),
                ("address", address),
                ("apikey", endpoint.api_key.as_str()),
            ])
            .send()
            .await
        {
            Ok(response) => response,
            Err(error) => {
                warn!(
                    chain = %chain,
                    address,
                    endpoint = %redacted_endpoint_label(&endpoint.api_url),
                    class = classify_request_error(&error),
                    "source code request failed"
                );
                return None;
            }
        };
        if !response.status().is_success() {
            warn!(
                chain = %chain,
                address,
                status = response.status().as_u16(),
                "source code lookup returned non-success status"
            );
            return None;
        }
        let payload = match response.json::<Value>().await {
            Ok(payload) => payload,
            Err(error) => {
                warn!(
                    chain = %chain,
                    address,
                    class = classify_request_error(&error),
                    "source code payload is not json"
                );
                return None;
            }
        };
        let source = parse_source_code_response(&payload);
        if source.is_none() {
            debug!(chain = %chain, address, "no verified source published yet");
        }
        source
    }
}

/// Source text of the first result, present only for `status == "1"` and a
/// non-empty `SourceCode`.
pub fn parse_source_code_response(payload: &Value) -> Option<String> {
    if payload["status"].as_str() != Some("1") {
        return None;
    }
    let source = payload["result"]
        .as_array()
        .and_then(|results| results.first())
        .and_then(|entry| entry["SourceCode"].as_str())?;
    if source.trim().is_empty() {
        return None;
    }
    Some(source.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{spawn_scripted_upstream, ScriptedResponse};
    use serde_json::json;

    #[test]
    fn verified_contract_yields_source() {
        let payload = json!({
            "status": "1",
            "message": "OK",
            "result": [{"SourceCode": "contract Foo {}", "ContractName": "Foo"}]
        });
        assert_eq!(
            parse_source_code_response(&payload).as_deref(),
            Some("contract Foo {}")
        );
    }

    #[test]
    fn unverified_contract_yields_none() {
        let empty_source = json!({
            "status": "1",
            "result": [{"SourceCode": "", "ABI": "Contract source code not verified"}]
        });
        assert!(parse_source_code_response(&empty_source).is_none());

        let rate_limited = json!({"status": "0", "message": "NOTOK", "result": "Max rate limit reached"});
        assert!(parse_source_code_response(&rate_limited).is_none());
        assert!(parse_source_code_response(&json!({"status": "1", "result": []})).is_none());
    }

    #[tokio::test]
    async fn client_routes_base_lookups_to_basescan() {
        let body = json!({"status": "1", "result": [{"SourceCode": "contract Bar {}"}]}).to_string();
        let Some(upstream) = spawn_scripted_upstream(vec![ScriptedResponse::new(
            200,
            "application/json",
            &body,
        )]) else {
            return;
        };
        let client = ExplorerSourceClient::new(
            Client::new(),
            "http://127.0.0.1:1/unused",
            "eth-key",
            &upstream.base_url,
            "base-key",
        );
        let source = client.fetch_source(Chain::Base, "0xbb").await;
        assert_eq!(source.as_deref(), Some("contract Bar {}"));
        let requests = upstream.finish();
        assert!(
            requests[0].starts_with(
                "GET /upstream?module=contract&action=getsourcecode&address=0xbb&apikey=base-key "
            ),
            "{requests:?}"
        );
    }
}
