// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! In-memory usage aggregation for the current session.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};

use super::event::TokenEvent;

/// Input/output/total rollup used by every aggregate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenTotals {
    pub input: u64,
    pub output: u64,
    pub total: u64,
}

impl TokenTotals {
    fn add(&mut self, event: &TokenEvent) {
        self.input += event.input_tokens as u64;
        self.output += event.output_tokens as u64;
        self.total += event.total_tokens();
    }
}

/// Raw events plus the four aggregates: totals, by-provider, by-model,
/// by-date.
#[derive(Debug, Default)]
pub struct Odometer {
    events: Vec<TokenEvent>,
    totals: TokenTotals,
    provider_totals: BTreeMap<String, TokenTotals>,
    model_totals: BTreeMap<String, TokenTotals>,
    daily_totals: BTreeMap<String, TokenTotals>,
    hosts: HashSet<String>,
    session_start: Option<DateTime<Utc>>,
}

impl Odometer {
    pub fn new() -> Self {
        Self { session_start: Some(Utc::now()), ..Self::default() }
    }

    /// Fold an event into every aggregate.
    pub fn record(&mut self, event: TokenEvent) {
        self.totals.add(&event);
        self.provider_totals
            .entry(event.provider.clone())
            .or_default()
            .add(&event);
        self.model_totals
            .entry(event.model.clone())
            .or_default()
            .add(&event);
        self.daily_totals
            .entry(event.date_string())
            .or_default()
            .add(&event);
        self.hosts.insert(event.host.clone());
        self.events.push(event);
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn totals(&self) -> TokenTotals {
        self.totals
    }

    pub fn get_provider_breakdown(&self) -> &BTreeMap<String, TokenTotals> {
        &self.provider_totals
    }

    pub fn get_model_breakdown(&self) -> &BTreeMap<String, TokenTotals> {
        &self.model_totals
    }

    /// Usage for one calendar date (`YYYY-MM-DD`).
    pub fn get_daily_usage(&self, date: &str) -> TokenTotals {
        self.daily_totals.get(date).copied().unwrap_or_default()
    }

    /// Events recorded within the trailing `hours`.
    pub fn get_recent_activity(&self, hours: u32) -> Vec<&TokenEvent> {
        let cutoff = Utc::now().timestamp() - (hours as i64) * 3600;
        self.events.iter().filter(|e| e.timestamp_s >= cutoff).collect()
    }

    /// Drain the raw event list (the durable layer flushes these); the
    /// aggregates keep their values.
    pub fn take_events(&mut self) -> Vec<TokenEvent> {
        std::mem::take(&mut self.events)
    }

    /// Plain-text table for human display.
    pub fn stats(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "{:<32} {:>12} {:>12} {:>12}\n",
            "category", "input", "output", "total"
        ));
        out.push_str(&format!(
            "{:<32} {:>12} {:>12} {:>12}\n",
            "total", self.totals.input, self.totals.output, self.totals.total
        ));
        for (provider, t) in &self.provider_totals {
            out.push_str(&format!(
                "{:<32} {:>12} {:>12} {:>12}\n",
                format!("provider/{provider}"),
                t.input,
                t.output,
                t.total
            ));
        }
        for (model, t) in &self.model_totals {
            out.push_str(&format!(
                "{:<32} {:>12} {:>12} {:>12}\n",
                format!("model/{model}"),
                t.input,
                t.output,
                t.total
            ));
        }
        for (date, t) in &self.daily_totals {
            out.push_str(&format!(
                "{:<32} {:>12} {:>12} {:>12}\n",
                format!("date/{date}"),
                t.input,
                t.output,
                t.total
            ));
        }
        out
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn event(provider: &str, model: &str, input: u32, output: u32) -> TokenEvent {
        TokenEvent::new(provider, model, input, output)
    }

    #[test]
    fn record_updates_all_aggregates() {
        let mut odo = Odometer::new();
        odo.record(event("openai", "gpt-4o-mini", 100, 40));
        odo.record(event("openai", "gpt-4o", 50, 10));
        odo.record(event("anthropic", "claude-3-5-haiku-20241022", 30, 5));

        assert_eq!(odo.event_count(), 3);
        assert_eq!(odo.totals(), TokenTotals { input: 180, output: 55, total: 235 });

        let providers = odo.get_provider_breakdown();
        assert_eq!(providers["openai"].total, 200);
        assert_eq!(providers["anthropic"].total, 35);

        let models = odo.get_model_breakdown();
        assert_eq!(models["gpt-4o-mini"].input, 100);
        assert_eq!(models["gpt-4o"].output, 10);
    }

    #[test]
    fn daily_usage_groups_by_event_date() {
        let mut odo = Odometer::new();
        let e = event("openai", "gpt-4o-mini", 10, 5);
        let date = e.date_string();
        odo.record(e);
        assert_eq!(odo.get_daily_usage(&date).total, 15);
        assert_eq!(odo.get_daily_usage("1999-01-01"), TokenTotals::default());
    }

    #[test]
    fn recent_activity_filters_by_age() {
        let mut odo = Odometer::new();
        let mut old = event("openai", "gpt-4o-mini", 1, 1);
        old.timestamp_s -= 48 * 3600;
        odo.record(old);
        odo.record(event("openai", "gpt-4o-mini", 2, 2));
        assert_eq!(odo.get_recent_activity(24).len(), 1);
        assert_eq!(odo.get_recent_activity(72).len(), 2);
    }

    #[test]
    fn take_events_drains_but_keeps_aggregates() {
        let mut odo = Odometer::new();
        odo.record(event("openai", "gpt-4o-mini", 10, 5));
        let drained = odo.take_events();
        assert_eq!(drained.len(), 1);
        assert_eq!(odo.event_count(), 0);
        assert_eq!(odo.totals().total, 15);
    }

    #[test]
    fn stats_renders_all_sections() {
        let mut odo = Odometer::new();
        odo.record(event("openai", "gpt-4o-mini", 10, 5));
        let table = odo.stats();
        assert!(table.contains("total"));
        assert!(table.contains("provider/openai"));
        assert!(table.contains("model/gpt-4o-mini"));
        assert!(table.contains("date/"));
    }
}
