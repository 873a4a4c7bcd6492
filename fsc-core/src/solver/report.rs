//! Parsing of the agent's `finalReport.json` artifact.
//!
//! Agents are told to write a single JSON object, but in practice the file
//! can arrive wrapped in prose (markdown fences, trailing chatter). Parsing
//! therefore extracts the substring between the first `{` and the last `}`
//! before handing it to serde.

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::task::TaskStatus;

/// The agent's structured verdict on one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentReport {
    pub task_id: String,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub report: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReport {
    task_id: String,
    title: String,
    description: String,
    status: String,
    report: String,
}

/// Parse `finalReport.json` content, tolerating surrounding non-JSON text.
pub fn parse_final_report(raw: &str) -> Result<AgentReport> {
    let json = extract_object(raw)
        .ok_or_else(|| Error::task("parse error: no JSON object in finalReport.json"))?;
    let parsed: RawReport = serde_json::from_str(json)
        .map_err(|e| Error::task(format!("parse error in finalReport.json: {e}")))?;
    let status = match parsed.status.as_str() {
        "success" => TaskStatus::Success,
        "skipped" => TaskStatus::Skipped,
        "failed" => TaskStatus::Failure,
        other => {
            return Err(Error::task(format!(
                "parse error: unknown report status '{other}'"
            )))
        }
    };
    Ok(AgentReport {
        task_id: parsed.task_id,
        title: parsed.title,
        description: parsed.description,
        status,
        report: parsed.report,
    })
}

/// Substring between the first `{` and the last `}`, inclusive.
fn extract_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&raw[start..=end])
}
