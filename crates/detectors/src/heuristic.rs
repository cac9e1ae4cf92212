use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use tokenwatch_core_types::{Chain, HeuristicReport, LIQUIDITY_UNAVAILABLE};
use tracing::{debug, warn};

use crate::http_utils::{classify_request_error, redacted_endpoint_label, trim_base_url};
use crate::HeuristicDetector;

const SAFE_VERDICT_TEXT: &str = "Looks safe for now";
const POSITIVE_ACTION_STYLE: &str = "border-inline-start-color:#86efac";
const NEGATIVE_ACTION_STYLE: &str = "border-inline-start-color:#fca5a5";

/// Scrapes the rendered honeypot report page for an address.
#[derive(Debug, Clone)]
pub struct HoneypotPageDetector {
    client: Client,
    base_url: String,
}

impl HoneypotPageDetector {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: trim_base_url(base_url),
        }
    }

    fn report_url(&self, chain: Chain, address: &str) -> String {
        format!("{}/{}/{}", self.base_url, chain.network_slug(), address)
    }
}

#[async_trait]
impl HeuristicDetector for HoneypotPageDetector {
    async fn inspect(&self, chain: Chain, address: &str) -> Option<HeuristicReport> {
        let url = self.report_url(chain, address);
        let endpoint = redacted_endpoint_label(&url);
        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(error) => {
                warn!(
                    chain = %chain,
                    address,
                    endpoint = %endpoint,
                    class = classify_request_error(&error),
                    "heuristic page request failed"
                );
                return None;
            }
        };
        if !response.status().is_success() {
            warn!(
                chain = %chain,
                address,
                status = response.status().as_u16(),
                "heuristic page returned non-success status"
            );
            return None;
        }
        let html = match response.text().await {
            Ok(html) => html,
            Err(error) => {
                warn!(
                    chain = %chain,
                    address,
                    class = classify_request_error(&error),
                    "heuristic page body read failed"
                );
                return None;
            }
        };
        let report = parse_heuristic_page(&html);
        if report.is_none() {
            debug!(chain = %chain, address, "heuristic page carried no recognizable signals");
        }
        report
    }
}

/// Returns `None` when the markup carries none of the expected signals.
pub fn parse_heuristic_page(html: &str) -> Option<HeuristicReport> {
    let document = Html::parse_document(html);
    let paragraph = Selector::parse("p").ok()?;
    let styled_div = Selector::parse("div[style]").ok()?;
    let span = Selector::parse("span").ok()?;

    let mut report = HeuristicReport {
        liquidity: LIQUIDITY_UNAVAILABLE.to_string(),
        pair: LIQUIDITY_UNAVAILABLE.to_string(),
        ..HeuristicReport::default()
    };
    let mut recognized = false;
    let mut liquidity_seen = false;
    let mut pair_seen = false;

    for p in document.select(&paragraph) {
        let text = element_text(&p);
        if text == SAFE_VERDICT_TEXT {
            report.is_safe = true;
            recognized = true;
        }
        if !pair_seen && text.to_ascii_lowercase().contains("pair on") {
            report.pair = text.clone();
            pair_seen = true;
            recognized = true;
        }
        // The site has shipped both spellings.
        if !liquidity_seen && (text.contains("Liquidity:") || text.contains("Liqudity:")) {
            liquidity_seen = true;
            recognized = true;
            if let Some(value) = p.select(&span).next().map(|node| element_text(&node)) {
                if !value.is_empty() {
                    report.liquidity = value;
                }
            }
        }
    }

    // Positive flags first so a negative flag for the same action wins.
    for style_marker in [POSITIVE_ACTION_STYLE, NEGATIVE_ACTION_STYLE] {
        for div in document.select(&styled_div) {
            let style: String = div
                .value()
                .attr("style")
                .unwrap_or_default()
                .chars()
                .filter(|ch| !ch.is_whitespace())
                .collect::<String>()
                .to_ascii_lowercase();
            if !style.contains(style_marker) {
                continue;
            }
            let Some(action_text) = div.select(&span).next().map(|node| element_text(&node))
            else {
                continue;
            };
            if action_text.contains("Can buy") {
                report.can_buy = Some(action_text);
            } else if action_text.contains("Can sell") {
                report.can_sell = Some(action_text);
            } else if action_text.contains("Can transfer") {
                report.can_transfer = Some(action_text);
            } else {
                continue;
            }
            recognized = true;
        }
    }

    recognized.then_some(report)
}

fn element_text(element: &ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{spawn_scripted_upstream, ScriptedResponse};

    const SAFE_PAGE: &str = r#"
        <html><body>
          <p>Looks safe for now</p>
          <p>WETH pair on Uniswap V2</p>
          <p>Liquidity: <span> 12 ETH </span></p>
          <div style="border-inline-start-color: #86efac"><span>Can buy</span></div>
          <div style="border-inline-start-color:#86efac"><span>Can sell</span></div>
          <div style="border-inline-start-color:#86efac"><span>Can transfer</span></div>
        </body></html>
    "#;

    const UNSAFE_PAGE: &str = r#"
        <html><body>
          <p>Honeypot detected</p>
          <p>Liqudity: <span>4.2 ETH</span></p>
          <div style="border-inline-start-color:#86efac"><span>Can buy</span></div>
          <div style="border-inline-start-color:#fca5a5"><span>Can sell: NO</span></div>
        </body></html>
    "#;

    #[test]
    fn parses_safe_page_signals() {
        let report = parse_heuristic_page(SAFE_PAGE).expect("safe page should parse");
        assert!(report.is_safe);
        assert_eq!(report.pair, "WETH pair on Uniswap V2");
        assert_eq!(report.liquidity, "12 ETH");
        assert_eq!(report.can_buy.as_deref(), Some("Can buy"));
        assert_eq!(report.can_sell.as_deref(), Some("Can sell"));
        assert_eq!(report.can_transfer.as_deref(), Some("Can transfer"));
        assert!(!report.is_definitive_unsafe());
    }

    #[test]
    fn parses_unsafe_page_with_misspelt_liquidity_label() {
        let report = parse_heuristic_page(UNSAFE_PAGE).expect("unsafe page should parse");
        assert!(!report.is_safe);
        assert_eq!(report.liquidity, "4.2 ETH");
        assert_eq!(report.pair, LIQUIDITY_UNAVAILABLE);
        assert_eq!(report.can_sell.as_deref(), Some("Can sell: NO"));
        assert!(report.is_definitive_unsafe());
    }

    #[test]
    fn liquidity_without_span_is_unavailable() {
        let report = parse_heuristic_page("<p>Liquidity: unknown</p>").expect("label recognized");
        assert!(!report.is_safe);
        assert_eq!(report.liquidity, LIQUIDITY_UNAVAILABLE);
        assert!(!report.is_definitive_unsafe());
    }

    #[test]
    fn unexpected_markup_yields_no_data() {
        assert!(parse_heuristic_page("<html><body><h1>502 Bad Gateway</h1></body></html>").is_none());
    }

    #[tokio::test]
    async fn detector_requests_chain_slug_path() {
        let Some(upstream) = spawn_scripted_upstream(vec![ScriptedResponse::new(
            200,
            "text/html",
            SAFE_PAGE,
        )]) else {
            return;
        };
        let detector = HoneypotPageDetector::new(Client::new(), &upstream.base_url);
        let report = detector
            .inspect(Chain::Base, "0xabc")
            .await
            .expect("page should parse");
        assert!(report.is_safe);
        let requests = upstream.finish();
        assert!(requests[0].starts_with("GET /upstream/base/0xabc "), "{requests:?}");
    }

    #[tokio::test]
    async fn detector_swallows_server_errors() {
        let Some(upstream) = spawn_scripted_upstream(vec![ScriptedResponse::new(
            503,
            "text/plain",
            "maintenance",
        )]) else {
            return;
        };
        let detector = HoneypotPageDetector::new(Client::new(), &upstream.base_url);
        assert!(detector.inspect(Chain::Eth, "0xabc").await.is_none());
        upstream.finish();
    }

    #[tokio::test]
    async fn detector_swallows_connect_errors() {
        let detector = HoneypotPageDetector::new(Client::new(), "http://127.0.0.1:1/upstream");
        assert!(detector.inspect(Chain::Eth, "0xabc").await.is_none());
    }
}
