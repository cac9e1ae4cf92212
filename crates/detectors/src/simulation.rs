use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tokenwatch_core_types::{
    Chain, ContractCodeFlags, SimulatedPair, SimulatedToken, SimulatedTrade, SimulationReport,
};
use tracing::warn;

use crate::http_utils::{classify_request_error, redacted_endpoint_label, trim_base_url};
use crate::SimulationDetector;

/// Calls the trade-simulation API (`?address=..&chainID=..`).
#[derive(Debug, Clone)]
pub struct TradeSimulationDetector {
    client: Client,
    base_url: String,
}

impl TradeSimulationDetector {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: trim_base_url(base_url),
        }
    }
}

#[async_trait]
impl SimulationDetector for TradeSimulationDetector {
    async fn simulate(&self, chain: Chain, address: &str) -> Option<SimulationReport> {
        let chain_id = chain.chain_id().to_string();
        let response = match self
            .client
            .get(&self.base_url)
            .query(&[("address", address), ("chainID", chain_id.as_str())])
            .send()
            .await
        {
            Ok(response) => response,
            Err(error) => {
                warn!(
                    chain = %chain,
                    address,
                    endpoint = %redacted_endpoint_label(&self.base_url),
                    class = classify_request_error(&error),
                    "simulation request failed"
                );
                return None;
            }
        };
        if !response.status().is_success() {
            warn!(
                chain = %chain,
                address,
                status = response.status().as_u16(),
                "simulation returned non-success status"
            );
            return None;
        }
        match response.json::<Value>().await {
            Ok(payload) => parse_simulation_payload(&payload),
            Err(error) => {
                warn!(
                    chain = %chain,
                    address,
                    class = classify_request_error(&error),
                    "simulation payload is not json"
                );
                None
            }
        }
    }
}

/// Maps the simulation payload. A missing `honeypotResult.isHoneypot` reads
/// as a honeypot. Non-object payloads yield `None`.
pub fn parse_simulation_payload(payload: &Value) -> Option<SimulationReport> {
    if !payload.is_object() {
        return None;
    }
    let simulation = &payload["simulationResult"];
    let contract_code = &payload["contractCode"];
    let pair = &payload["pair"];
    Some(SimulationReport {
        token: parse_token(&payload["token"]),
        with_token: parse_token(&payload["withToken"]),
        risk: string_field(&payload["summary"]["risk"]),
        risk_level: payload["summary"]["riskLevel"].as_i64(),
        simulation: SimulatedTrade {
            buy_tax: simulation["buyTax"].as_f64(),
            sell_tax: simulation["sellTax"].as_f64(),
            transfer_tax: simulation["transferTax"].as_f64(),
            buy_gas: string_field(&simulation["buyGas"]),
            sell_gas: string_field(&simulation["sellGas"]),
        },
        is_honeypot: payload["honeypotResult"]["isHoneypot"]
            .as_bool()
            .unwrap_or(true),
        contract_code: ContractCodeFlags {
            open_source: contract_code["openSource"].as_bool().unwrap_or(false),
            root_open_source: contract_code["rootOpenSource"].as_bool().unwrap_or(false),
            is_proxy: contract_code["isProxy"].as_bool().unwrap_or(false),
            has_proxy_calls: contract_code["hasProxyCalls"].as_bool().unwrap_or(false),
        },
        pair: SimulatedPair {
            name: string_field(&pair["pair"]["name"]),
            address: string_field(&pair["pair"]["address"]),
            pair_type: string_field(&pair["pair"]["type"]),
            liquidity: pair["liquidity"].as_f64(),
        },
    })
}

fn parse_token(value: &Value) -> SimulatedToken {
    SimulatedToken {
        name: string_field(&value["name"]),
        symbol: string_field(&value["symbol"]),
        decimals: value["decimals"].as_u64(),
        address: string_field(&value["address"]),
        total_holders: value["totalHolders"].as_u64(),
    }
}

// Gas figures arrive as either strings or numbers.
fn string_field(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{spawn_scripted_upstream, ScriptedResponse};
    use serde_json::json;

    fn sample_payload() -> Value {
        json!({
            "token": {"name": "Foo", "symbol": "FOO", "decimals": 18, "address": "0xaa", "totalHolders": 42},
            "withToken": {"name": "Wrapped Ether", "symbol": "WETH", "decimals": 18, "address": "0xc02a"},
            "summary": {"risk": "low", "riskLevel": 1},
            "simulationResult": {"buyTax": 0.0, "sellTax": 1.5, "transferTax": 0, "buyGas": "140000", "sellGas": 110000},
            "honeypotResult": {"isHoneypot": false},
            "contractCode": {"openSource": true, "rootOpenSource": true, "isProxy": false, "hasProxyCalls": false},
            "pair": {"pair": {"name": "Uniswap V2: FOO-WETH", "address": "0xpair", "type": "UniswapV2"}, "liquidity": 15234.5}
        })
    }

    #[test]
    fn maps_full_payload() {
        let report = parse_simulation_payload(&sample_payload()).expect("object payload");
        assert!(!report.is_honeypot);
        assert_eq!(report.token.symbol.as_deref(), Some("FOO"));
        assert_eq!(report.token.total_holders, Some(42));
        assert_eq!(report.with_token.symbol.as_deref(), Some("WETH"));
        assert_eq!(report.risk.as_deref(), Some("low"));
        assert_eq!(report.risk_level, Some(1));
        assert_eq!(report.simulation.sell_tax, Some(1.5));
        assert_eq!(report.simulation.buy_gas.as_deref(), Some("140000"));
        assert_eq!(report.simulation.sell_gas.as_deref(), Some("110000"));
        assert!(report.contract_code.open_source);
        assert_eq!(report.pair.pair_type.as_deref(), Some("UniswapV2"));
        assert_eq!(report.pair.liquidity, Some(15234.5));
    }

    #[test]
    fn missing_honeypot_flag_reads_as_honeypot() {
        let mut payload = sample_payload();
        payload
            .as_object_mut()
            .expect("object")
            .remove("honeypotResult");
        let report = parse_simulation_payload(&payload).expect("object payload");
        assert!(report.is_honeypot);

        let report = parse_simulation_payload(&json!({})).expect("empty object");
        assert!(report.is_honeypot);
        assert_eq!(report.token, SimulatedToken::default());
    }

    #[test]
    fn non_object_payload_yields_no_data() {
        assert!(parse_simulation_payload(&json!("error")).is_none());
        assert!(parse_simulation_payload(&Value::Null).is_none());
    }

    #[tokio::test]
    async fn detector_sends_address_and_chain_id() {
        let body = sample_payload().to_string();
        let Some(upstream) = spawn_scripted_upstream(vec![ScriptedResponse::new(
            200,
            "application/json",
            &body,
        )]) else {
            return;
        };
        let detector = TradeSimulationDetector::new(Client::new(), &upstream.base_url);
        let report = detector
            .simulate(Chain::Base, "0xaa")
            .await
            .expect("simulation data");
        assert!(!report.is_honeypot);
        let requests = upstream.finish();
        assert!(
            requests[0].starts_with("GET /upstream?address=0xaa&chainID=8453 "),
            "{requests:?}"
        );
    }

    #[tokio::test]
    async fn detector_swallows_bad_json() {
        let Some(upstream) = spawn_scripted_upstream(vec![ScriptedResponse::new(
            200,
            "application/json",
            "{not json",
        )]) else {
            return;
        };
        let detector = TradeSimulationDetector::new(Client::new(), &upstream.base_url);
        assert!(detector.simulate(Chain::Eth, "0xaa").await.is_none());
        upstream.finish();
    }
}
