// crates/weft-server/src/gateway/matcher.rs
// Request -> rule matching against a table snapshot

use std::collections::HashMap;

use weft_types::CompiledBackend;

use super::table::{LoadedRule, LoadedTable};

/// Synthetic rule name used when the defaults backend serves a request.
pub const DEFAULT_RULE: &str = "_default";

/// The request attributes matching operates on.
#[derive(Debug, Default)]
pub struct MatchRequest<'a> {
    pub agent: &'a str,
    pub intent: &'a str,
    pub tenant_id: &'a str,
    pub headers: HashMap<String, String>,
}

/// A successful match: the rule name and its ready backends.
pub struct Matched<'a> {
    pub rule: &'a str,
    pub backends: Vec<&'a CompiledBackend>,
}

pub enum MatchOutcome<'a> {
    Matched(Matched<'a>),
    /// No rule or default applied. `reject` mirrors `defaults.rejectUnmatched`.
    NoMatch { reject: bool },
}

fn ready_backends<'a>(backends: &'a [CompiledBackend]) -> Vec<&'a CompiledBackend> {
    backends.iter().filter(|b| b.ready).collect()
}

/// Every non-empty criterion of the rule must hold.
fn criteria_hold(rule: &LoadedRule, request: &MatchRequest<'_>) -> bool {
    let m = &rule.rule.r#match;
    if let Some(agent) = m.agent.as_deref() {
        if agent != request.agent {
            return false;
        }
    }
    if let Some(regex) = &rule.intent_regex {
        if !regex.is_match(request.intent) {
            return false;
        }
    }
    if let Some(tenant) = m.tenant_id.as_deref() {
        if tenant != request.tenant_id {
            return false;
        }
    }
    for (name, expected) in &m.headers {
        if request.headers.get(&name.to_ascii_lowercase()).map(String::as_str) != Some(expected) {
            return false;
        }
    }
    true
}

/// Match a request against the snapshot. Read-only; the caller holds the
/// snapshot Arc, so no lock spans the match.
pub fn match_request<'a>(table: &'a LoadedTable, request: &MatchRequest<'_>) -> MatchOutcome<'a> {
    // Explicit agent selection first: agent equality only.
    if !request.agent.is_empty() {
        for rule in &table.rules {
            if rule.rule.r#match.agent.as_deref() == Some(request.agent) {
                let backends = ready_backends(&rule.rule.backends);
                if !backends.is_empty() {
                    return MatchOutcome::Matched(Matched {
                        rule: &rule.rule.name,
                        backends,
                    });
                }
            }
        }
    }

    // Priority order: rules are stored pre-sorted.
    for rule in &table.rules {
        if !criteria_hold(rule, request) {
            continue;
        }
        let backends = ready_backends(&rule.rule.backends);
        if !backends.is_empty() {
            return MatchOutcome::Matched(Matched {
                rule: &rule.rule.name,
                backends,
            });
        }
    }

    // Defaults backend as a last resort.
    if let Some(backend) = &table.defaults.backend {
        if backend.ready {
            return MatchOutcome::Matched(Matched {
                rule: DEFAULT_RULE,
                backends: vec![backend],
            });
        }
    }

    MatchOutcome::NoMatch {
        reject: table.defaults.reject_unmatched.unwrap_or(false),
    }
}
