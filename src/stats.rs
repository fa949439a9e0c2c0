//! Usage statistics and the HTML dashboard.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::responder::Usage;

/// Write-only accumulators persisted with the dispatcher state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageStats {
    pub total_actions: u64,
    pub actions_by_stream: BTreeMap<String, u64>,
    pub failures: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_cost: Decimal,
    pub runs: u64,
    pub last_run: Option<DateTime<Utc>>,
}

impl UsageStats {
    pub fn record_action(&mut self, stream: &str, usage: &Usage) {
        self.total_actions += 1;
        *self.actions_by_stream.entry(stream.to_string()).or_default() += 1;
        self.input_tokens += usage.input_tokens;
        self.output_tokens += usage.output_tokens;
        self.total_cost += usage.cost;
    }

    pub fn record_failure(&mut self) {
        self.failures += 1;
    }

    pub fn record_run(&mut self, at: DateTime<Utc>) {
        self.runs += 1;
        self.last_run = Some(at);
    }

    /// Mean cost per action, zero before the first action.
    pub fn cost_per_action(&self) -> Decimal {
        if self.total_actions == 0 {
            Decimal::ZERO
        } else {
            (self.total_cost / Decimal::from(self.total_actions)).round_dp(6)
        }
    }
}

/// Render a standalone HTML page summarising the statistics.
pub fn render_dashboard(stats: &UsageStats, generated_at: DateTime<Utc>) -> String {
    let mut rows = String::new();
    for (stream, count) in &stats.actions_by_stream {
        let _ = writeln!(
            rows,
            "      <tr><td>{}</td><td>{count}</td></tr>",
            escape_html(stream)
        );
    }
    if rows.is_empty() {
        rows.push_str("      <tr><td colspan=\"2\">No actions yet</td></tr>\n");
    }

    let last_run = stats
        .last_run
        .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "never".to_string());

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>Dispatcher usage</title>
  <style>
    body {{ font-family: system-ui, sans-serif; margin: 2rem; color: #222; }}
    .cards {{ display: flex; gap: 1rem; flex-wrap: wrap; }}
    .card {{ border: 1px solid #ddd; border-radius: 8px; padding: 1rem 1.5rem; min-width: 10rem; }}
    .card .value {{ font-size: 1.6rem; font-weight: 600; }}
    table {{ border-collapse: collapse; margin-top: 2rem; }}
    td, th {{ border-bottom: 1px solid #eee; padding: 0.4rem 1rem; text-align: left; }}
  </style>
</head>
<body>
  <h1>Dispatcher usage</h1>
  <div class="cards">
    <div class="card"><div>Actions</div><div class="value">{actions}</div></div>
    <div class="card"><div>Failures</div><div class="value">{failures}</div></div>
    <div class="card"><div>Runs</div><div class="value">{runs}</div></div>
    <div class="card"><div>Input tokens</div><div class="value">{input}</div></div>
    <div class="card"><div>Output tokens</div><div class="value">{output}</div></div>
    <div class="card"><div>Total cost (USD)</div><div class="value">${cost}</div></div>
    <div class="card"><div>Cost per action</div><div class="value">${per_action}</div></div>
  </div>
  <table>
    <thead><tr><th>Stream</th><th>Actions</th></tr></thead>
    <tbody>
{rows}    </tbody>
  </table>
  <p>Last run: {last_run}. Generated {generated}.</p>
</body>
</html>
"#,
        actions = stats.total_actions,
        failures = stats.failures,
        runs = stats.runs,
        input = stats.input_tokens,
        output = stats.output_tokens,
        cost = stats.total_cost.round_dp(4),
        per_action = stats.cost_per_action(),
        generated = generated_at.format("%Y-%m-%d %H:%M UTC"),
    )
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
