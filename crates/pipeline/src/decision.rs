use tokenwatch_core_types::{Chain, RiskReport, TokenDetails, LIQUIDITY_UNAVAILABLE};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    NoScore,
    ScoreBelowMinimum { score: i64, minimum: i64 },
    TooManySimilar { similar: usize, maximum: u64 },
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoScore => "no_score",
            Self::ScoreBelowMinimum { .. } => "score_below_minimum",
            Self::TooManySimilar { .. } => "too_many_similar",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Alert(String),
    Rejected(RejectReason),
}

/// Identity of the contract an alert is about.
#[derive(Debug, Clone, Copy)]
pub struct AlertSubject<'a> {
    pub chain: Chain,
    pub address: &'a str,
    pub deployer: &'a str,
    pub token: Option<&'a TokenDetails>,
}

/// Applies the score and similarity thresholds. Returns `(score, similar)` for
/// reports that pass.
pub fn evaluate(
    report: &RiskReport,
    minimum_score: i64,
    maximum_similar: u64,
) -> Result<(i64, usize), RejectReason> {
    let Some(scoring) = report.scoring.as_ref() else {
        return Err(RejectReason::NoScore);
    };
    let score = scoring.score();
    if score < minimum_score {
        return Err(RejectReason::ScoreBelowMinimum {
            score,
            minimum: minimum_score,
        });
    }
    let similar = scoring.similar_count();
    if u64::try_from(similar).unwrap_or(u64::MAX) > maximum_similar {
        return Err(RejectReason::TooManySimilar {
            similar,
            maximum: maximum_similar,
        });
    }
    Ok((score, similar))
}

pub fn decide(
    subject: &AlertSubject<'_>,
    report: &RiskReport,
    minimum_score: i64,
    maximum_similar: u64,
) -> Decision {
    match evaluate(report, minimum_score, maximum_similar) {
        Ok((score, similar)) => Decision::Alert(render_alert(subject, report, score, similar)),
        Err(reason) => Decision::Rejected(reason),
    }
}

pub fn render_alert(
    subject: &AlertSubject<'_>,
    report: &RiskReport,
    score: i64,
    similar: usize,
) -> String {
    let (name, symbol) = subject
        .token
        .map(|token| (token.name.as_str(), token.symbol.as_str()))
        .unwrap_or(("unknown", "?"));
    let mut lines = vec![
        format!(
            "*{}* ({}) on {}",
            escape_markdown(symbol),
            escape_markdown(name),
            subject.chain
        ),
        format!("Address: `{}`", subject.address),
        format!("Deployer: `{}`", subject.deployer),
        format!("Score: {score} | Similar tokens: {similar}"),
    ];
    if let Some(simulation) = report.simulation.as_ref() {
        lines.push(format!(
            "Buy tax: {} | Sell tax: {} | Transfer tax: {}",
            format_tax(simulation.simulation.buy_tax),
            format_tax(simulation.simulation.sell_tax),
            format_tax(simulation.simulation.transfer_tax)
        ));
        if let Some(risk) = simulation.risk.as_deref() {
            lines.push(format!("Simulation risk: {}", escape_markdown(risk)));
        }
    }
    let liquidity = report
        .heuristic
        .as_ref()
        .map(|heuristic| heuristic.liquidity.as_str())
        .unwrap_or(LIQUIDITY_UNAVAILABLE);
    lines.push(format!("Liquidity: {}", escape_markdown(liquidity)));
    lines.push(format!(
        "[Explorer]({})",
        subject.chain.explorer_token_url(subject.address)
    ));
    lines.join("\n")
}

fn format_tax(tax: Option<f64>) -> String {
    match tax {
        Some(value) => format!("{value}%"),
        None => LIQUIDITY_UNAVAILABLE.to_string(),
    }
}

/// Escapes the legacy Telegram Markdown control characters.
pub fn escape_markdown(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '_' | '*' | '`' | '[') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
