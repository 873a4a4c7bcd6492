//! Agent command sequences.
//!
//! `agent_commands` is a deterministic function of (agent kind, config,
//! task, repo URL) producing the shell commands run inside the container:
//! clone into `/app`, invoke the agent with the task prompt, then the helper
//! commands that leave `/app/finalReport.json` and `/app/git_diff.txt`
//! behind. Every piece of interpolated text is shell-quoted: task titles
//! and descriptions come from an external analyzer and must not be able to
//! break out of the command line.

use std::borrow::Cow;

use crate::config::{AgentKind, Config};
use crate::task::Task;

/// Quote a string for a POSIX shell.
fn sh(text: &str) -> String {
    shell_escape::unix::escape(Cow::from(text)).into_owned()
}

/// Clone URL, rewritten for SSH access when the config asks for it.
fn clone_url(config: &Config, repo_url: &str) -> String {
    if config.use_github_ssh {
        if let Some(path) = repo_url.strip_prefix("https://github.com/") {
            let path = path.strip_suffix(".git").unwrap_or(path);
            return format!("git@github.com:{path}.git");
        }
    }
    repo_url.to_string()
}

fn coding_style_line(config: &Config) -> Option<String> {
    let base = match config.coding_style_level {
        0 => None,
        1 => Some("Loosely follow the repository's existing coding style."),
        2 => Some("Follow the repository's existing coding style."),
        3 => Some("Follow the repository's existing coding style closely."),
        4 => Some("Match the repository's existing coding style in every detail."),
        _ => Some(
            "Match the repository's existing coding style exactly; your changes must be \
             indistinguishable from the surrounding code.",
        ),
    };
    match (base, config.customized_coding_style.as_deref()) {
        (None, None) => None,
        (Some(b), None) => Some(b.to_string()),
        (None, Some(c)) => Some(c.to_string()),
        (Some(b), Some(c)) => Some(format!("{b} {c}")),
    }
}

/// The prompt handed to the agent for one task.
pub fn build_prompt(config: &Config, task: &Task) -> String {
    let mut prompt = String::new();
    prompt.push_str("You are working on the repository at /app.\n");
    prompt.push_str("\nYour task:\n");
    prompt.push_str(&task.title);
    prompt.push('\n');
    if !task.description.is_empty() {
        prompt.push_str(&task.description);
        prompt.push('\n');
    }
    if let Some(style) = config.work_style_text() {
        prompt.push('\n');
        prompt.push_str(&style);
        prompt.push('\n');
    }
    if let Some(line) = coding_style_line(config) {
        prompt.push('\n');
        prompt.push_str(&line);
        prompt.push('\n');
    }
    prompt.push_str("\nInstructions:\n");
    prompt.push_str("- Make your changes directly in the working tree at /app\n");
    prompt.push_str("- Do NOT create branches and do NOT commit; leave the tree modified\n");
    prompt.push_str("- Run any existing tests you can and make sure they pass\n");
    prompt.push_str(
        "- When finished, write /app/finalReport.json containing exactly one JSON object:\n",
    );
    prompt.push_str(&format!(
        "  {{\"taskId\": \"{}\", \"title\": ..., \"description\": ..., \
         \"status\": \"success\"|\"skipped\"|\"failed\", \"report\": ...}}\n",
        task.id
    ));
    prompt.push_str("- Set status to \"skipped\" if the task needs no change, \"failed\" if you could not complete it\n");
    prompt
}

/// The agent CLI invocation for a quoted prompt.
fn agent_invocation(agent: AgentKind, quoted_prompt: &str) -> String {
    match agent {
        AgentKind::ClaudeCode => {
            format!("claude --print --dangerously-skip-permissions -p {quoted_prompt}")
        }
        AgentKind::GeminiCli => format!("gemini --yolo -p {quoted_prompt}"),
        AgentKind::Codex => format!("codex exec --full-auto {quoted_prompt}"),
    }
}

/// JSON written by the helper when the agent left no report behind.
fn fallback_report(task: &Task) -> String {
    serde_json::json!({
        "taskId": task.id,
        "title": task.title,
        "description": task.description,
        "status": "failed",
        "report": "agent did not produce a final report",
    })
    .to_string()
}

/// Full command sequence for one task's container.
///
/// Each entry is an independent shell invocation (`docker exec` does not
/// preserve state between commands), so every command that touches the repo
/// starts with `cd /app`.
pub fn agent_commands(config: &Config, task: &Task, repo_url: &str) -> Vec<String> {
    let mut commands = Vec::new();

    commands.push(format!(
        "git clone --depth 1 {} /app",
        sh(&clone_url(config, repo_url))
    ));
    commands.push(
        "cd /app && git config user.name fsc && git config user.email fsc@localhost".to_string(),
    );

    let mut agent_cmd = String::from("cd /app");
    if let Some(cred) = config.credentials.for_agent(config.agent) {
        if cred.export_needed {
            agent_cmd.push_str(&format!(
                " && export {}={}",
                config.agent.api_key_env(),
                sh(&cred.key)
            ));
        }
    }
    let prompt = build_prompt(config, task);
    agent_cmd.push_str(&format!(" && {}", agent_invocation(config.agent, &sh(&prompt))));
    commands.push(agent_cmd);

    // Capture new files too: intent-to-add makes them visible to `git diff`.
    commands.push(
        "cd /app && git add -N . && git diff > /app/git_diff.txt".to_string(),
    );
    commands.push(format!(
        "test -f /app/finalReport.json || printf %s {} > /app/finalReport.json",
        sh(&fallback_report(task))
    ));

    commands
}
