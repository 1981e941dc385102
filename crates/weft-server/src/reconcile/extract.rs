// crates/weft-server/src/reconcile/extract.rs
// Structured result extraction from orchestrator Job logs
//
// The orchestrator's output contract is a single marker line; everything
// after it may be arbitrary log noise, so the last match wins.

use once_cell::sync::Lazy;
use regex::Regex;

use weft_types::OrchestratorResult;

/// Marker prefix the orchestrator prints before its JSON result.
pub const RESULT_MARKER: &str = "ORCHESTRATOR_RESULT:";

static RESULT_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^.*ORCHESTRATOR_RESULT:(\{.*\})\s*$").expect("result marker pattern compiles")
});

/// Scan log text for the last marker line and parse its payload. Returns
/// None when no line carries a parseable result.
pub fn extract_result(logs: &str) -> Option<OrchestratorResult> {
    let payload = logs
        .lines()
        .filter_map(|line| RESULT_LINE.captures(line))
        .last()
        .map(|captures| captures[1].to_string())?;

    match serde_json::from_str(&payload) {
        Ok(result) => Some(result),
        Err(e) => {
            tracing::warn!("orchestrator result payload did not parse: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_simple_result() {
        let logs = "starting\nORCHESTRATOR_RESULT:{\"passed\":true,\"completedTasks\":2,\"totalTasks\":2}\n";
        let result = extract_result(logs).unwrap();
        assert!(result.passed);
        assert_eq!(result.completed_tasks, 2);
    }

    #[test]
    fn test_last_match_wins() {
        let logs = "\
ORCHESTRATOR_RESULT:{\"passed\":false}
some more output
ORCHESTRATOR_RESULT:{\"passed\":true,\"iterations\":4}
trailing noise after the marker
";
        let result = extract_result(logs).unwrap();
        assert!(result.passed);
        assert_eq!(result.iterations, 4);
    }

    #[test]
    fn test_marker_with_log_prefix() {
        let logs = "2026-07-30T12:00:00Z INFO ORCHESTRATOR_RESULT:{\"passed\":true}";
        assert!(extract_result(logs).unwrap().passed);
    }

    #[test]
    fn test_missing_marker_is_none() {
        assert!(extract_result("no results here\njust logs\n").is_none());
    }

    #[test]
    fn test_malformed_payload_is_none() {
        let logs = "ORCHESTRATOR_RESULT:{not json}";
        assert!(extract_result(logs).is_none());
    }

    #[test]
    fn test_full_payload_roundtrip() {
        let logs = concat!(
            "ORCHESTRATOR_RESULT:{\"passed\":true,\"completedTasks\":3,\"totalTasks\":3,",
            "\"iterations\":5,\"learnings\":[\"cache the schema\"],\"commitSha\":\"deadbeef\",",
            "\"pullRequestUrl\":\"https://github.com/acme/repo/pull/7\",\"pushed\":true}"
        );
        let result = extract_result(logs).unwrap();
        assert_eq!(result.commit_sha.as_deref(), Some("deadbeef"));
        assert_eq!(
            result.pull_request_url.as_deref(),
            Some("https://github.com/acme/repo/pull/7")
        );
        assert!(result.pushed);
        assert_eq!(result.learnings, vec!["cache the schema"]);
    }
}
