//! Runtime configuration for jobs.
//!
//! Resolution order: **env var > `<storage_root>/config` file > hardcoded
//! default**. Environment variables use the `FSC_` prefix plus the
//! UPPER_SNAKE form of the config key (`max_docker_containers` →
//! `FSC_MAX_DOCKER_CONTAINERS`). Invalid values are ignored silently and the
//! default (or earlier override) is retained; cross-field constraints are
//! checked once by [`Config::validate`].
//!
//! A `Config` is built once per job (per-job overrides from the job input go
//! through the same [`Config::apply_entry`] path) and is immutable after
//! validation.

use std::path::Path;
use std::{env, fs};

use crate::error::{Error, Result};

/// Default container image for agent runs.
pub const DEFAULT_IMAGE: &str = "fsc-agent:latest";

const MAX_CONTAINERS_LIMIT: usize = 100;
const CODING_STYLE_LEVEL_MAX: u8 = 5;

/// Which external coding agent runs inside the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentKind {
    ClaudeCode,
    GeminiCli,
    Codex,
}

impl AgentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClaudeCode => "claude-code",
            Self::GeminiCli => "gemini-cli",
            Self::Codex => "codex",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "claude-code" => Some(Self::ClaudeCode),
            "gemini-cli" => Some(Self::GeminiCli),
            "codex" => Some(Self::Codex),
            _ => None,
        }
    }

    /// Environment variable the agent's CLI reads its API key from.
    pub fn api_key_env(self) -> &'static str {
        match self {
            Self::ClaudeCode => "ANTHROPIC_API_KEY",
            Self::GeminiCli => "GEMINI_API_KEY",
            Self::Codex => "OPENAI_API_KEY",
        }
    }
}

/// Named working styles injected into the agent prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkStyleKind {
    Default,
    QaTester,
    BoldGenius,
    CarefulDocumentWriter,
    InstructiveDocumentWriter,
    BugFixer,
    Custom,
    FromUrl,
}

impl WorkStyleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::QaTester => "qa_tester",
            Self::BoldGenius => "bold_genius",
            Self::CarefulDocumentWriter => "careful_document_writer",
            Self::InstructiveDocumentWriter => "instructive_document_writer",
            Self::BugFixer => "bug_fixer",
            Self::Custom => "custom",
            Self::FromUrl => "from_url",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "default" => Some(Self::Default),
            "qa_tester" => Some(Self::QaTester),
            "bold_genius" => Some(Self::BoldGenius),
            "careful_document_writer" => Some(Self::CarefulDocumentWriter),
            "instructive_document_writer" => Some(Self::InstructiveDocumentWriter),
            "bug_fixer" => Some(Self::BugFixer),
            "custom" => Some(Self::Custom),
            "from_url" => Some(Self::FromUrl),
            _ => None,
        }
    }
}

/// An API key plus whether it must be exported into the container shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiCredential {
    pub key: String,
    pub export_needed: bool,
}

/// Per-provider credentials for the coding agents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub anthropic: Option<ApiCredential>,
    pub google_gemini: Option<ApiCredential>,
    pub openai_codex: Option<ApiCredential>,
}

impl Credentials {
    /// The credential for a given agent kind, if configured.
    pub fn for_agent(&self, agent: AgentKind) -> Option<&ApiCredential> {
        match agent {
            AgentKind::ClaudeCode => self.anthropic.as_ref(),
            AgentKind::GeminiCli => self.google_gemini.as_ref(),
            AgentKind::Codex => self.openai_codex.as_ref(),
        }
    }
}

/// Immutable per-job configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Which coding agent to run (`agent_type`).
    pub agent: AgentKind,
    /// Container image for agent runs (`docker_image`).
    pub docker_image: String,
    /// Per-command timeout inside the container, seconds; 0 disables
    /// (`docker_timeout_seconds`).
    pub docker_timeout_seconds: u64,
    /// Container memory limit in MB (`docker_memory_mb`).
    pub docker_memory_mb: u64,
    /// Container CPU limit in cores (`docker_cpu_cores`).
    pub docker_cpu_cores: f64,
    /// Absolute cap on containers for the process (`max_docker_containers`,
    /// 1–100).
    pub max_docker_containers: usize,
    /// Concurrent containers per pool (`max_parallel_docker_containers`,
    /// 1–max).
    pub max_parallel_docker_containers: usize,
    /// Minimum number of tasks analysis must return (`min_tasks`).
    pub min_tasks: usize,
    /// Tasks beyond this are dropped, lowest priority first (`max_tasks`).
    pub max_tasks: usize,
    /// Named working style for the agent prompt (`work_style`).
    pub work_style: WorkStyleKind,
    /// Label for the `custom` work style (`custom_label`).
    pub custom_label: String,
    /// Description/body for the `custom` work style, or the fetched text for
    /// `from_url` (`custom_description`).
    pub custom_description: String,
    /// Source URL for the `from_url` work style (`work_style_url`).
    pub work_style_url: String,
    /// Clone over SSH instead of HTTPS (`use_github_ssh`).
    pub use_github_ssh: bool,
    /// Agent API credentials.
    pub credentials: Credentials,
    /// How strongly the agent is held to the repo's coding style, 0–5
    /// (`coding_style_level`).
    pub coding_style_level: u8,
    /// Free-form coding-style instructions (`customized_coding_style`).
    pub customized_coding_style: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            agent: AgentKind::ClaudeCode,
            docker_image: DEFAULT_IMAGE.to_string(),
            docker_timeout_seconds: 3600,
            docker_memory_mb: 4096,
            docker_cpu_cores: 2.0,
            max_docker_containers: 5,
            max_parallel_docker_containers: 3,
            min_tasks: 1,
            max_tasks: 10,
            work_style: WorkStyleKind::Default,
            custom_label: String::new(),
            custom_description: String::new(),
            work_style_url: String::new(),
            use_github_ssh: false,
            credentials: Credentials::default(),
            coding_style_level: 2,
            customized_coding_style: None,
        }
    }
}

/// Config keys recognized in the config file and (upper-snaked, `FSC_`
/// prefixed) in the environment.
const CONFIG_KEYS: &[&str] = &[
    "agent_type",
    "docker_image",
    "docker_timeout_seconds",
    "docker_memory_mb",
    "docker_cpu_cores",
    "max_docker_containers",
    "max_parallel_docker_containers",
    "min_tasks",
    "max_tasks",
    "work_style",
    "custom_label",
    "custom_description",
    "work_style_url",
    "use_github_ssh",
    "anthropic_api_key",
    "anthropic_export_needed",
    "gemini_api_key",
    "gemini_export_needed",
    "codex_api_key",
    "codex_export_needed",
    "coding_style_level",
    "customized_coding_style",
];

impl Config {
    /// Load config from `<storage_root>/config` and `FSC_*` env vars.
    pub fn load(storage_root: &Path) -> Result<Self> {
        Self::load_with_env(storage_root, |k| env::var(k).ok())
    }

    /// Like [`Config::load`] with an injectable environment, for tests.
    pub fn load_with_env(
        storage_root: &Path,
        get_env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut cfg = Self::default();

        let config_file = storage_root.join("config");
        if config_file.exists() {
            parse_config_file(&config_file, |key, value| {
                cfg.apply_entry(key, value);
            })?;
        }

        for key in CONFIG_KEYS {
            let env_key = format!("FSC_{}", key.to_ascii_uppercase());
            if let Some(value) = get_env(&env_key) {
                cfg.apply_entry(key, &value);
            }
        }

        cfg.fill_credentials_from_files(storage_root);
        cfg.validate()?;
        Ok(cfg)
    }

    /// Fill credentials still missing after file and env resolution from
    /// `<storage_root>/credentials/{anthropic,gemini,codex}`.
    fn fill_credentials_from_files(&mut self, storage_root: &Path) {
        let dir = storage_root.join("credentials");
        let read = |name: &str| {
            fs::read_to_string(dir.join(name))
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        for (slot, file_name) in [
            (&mut self.credentials.anthropic, "anthropic"),
            (&mut self.credentials.google_gemini, "gemini"),
            (&mut self.credentials.openai_codex, "codex"),
        ] {
            if slot.is_none() {
                if let Some(key) = read(file_name) {
                    *slot = Some(ApiCredential {
                        key,
                        export_needed: false,
                    });
                }
            }
        }
    }

    /// Apply a single `key=value` override. Unknown keys and unparseable or
    /// out-of-range values are ignored; the previous value is retained.
    pub fn apply_entry(&mut self, key: &str, value: &str) {
        match key {
            "agent_type" => {
                if let Some(agent) = AgentKind::parse(value) {
                    self.agent = agent;
                }
            }
            "docker_image" => {
                if !value.is_empty() {
                    self.docker_image = value.to_string();
                }
            }
            "docker_timeout_seconds" => {
                if let Ok(n) = value.parse::<u64>() {
                    self.docker_timeout_seconds = n;
                }
            }
            "docker_memory_mb" => {
                if let Ok(n) = value.parse::<u64>() {
                    if n > 0 {
                        self.docker_memory_mb = n;
                    }
                }
            }
            "docker_cpu_cores" => {
                if let Ok(n) = value.parse::<f64>() {
                    if n > 0.0 {
                        self.docker_cpu_cores = n;
                    }
                }
            }
            "max_docker_containers" => {
                if let Ok(n) = value.parse::<usize>() {
                    if (1..=MAX_CONTAINERS_LIMIT).contains(&n) {
                        self.max_docker_containers = n;
                    }
                }
            }
            "max_parallel_docker_containers" => {
                if let Ok(n) = value.parse::<usize>() {
                    if n >= 1 {
                        self.max_parallel_docker_containers = n;
                    }
                }
            }
            "min_tasks" => {
                if let Ok(n) = value.parse::<usize>() {
                    if n >= 1 {
                        self.min_tasks = n;
                    }
                }
            }
            "max_tasks" => {
                if let Ok(n) = value.parse::<usize>() {
                    if n >= 1 {
                        self.max_tasks = n;
                    }
                }
            }
            "work_style" => {
                if let Some(style) = WorkStyleKind::parse(value) {
                    self.work_style = style;
                }
            }
            "custom_label" => self.custom_label = value.to_string(),
            "custom_description" => self.custom_description = value.to_string(),
            "work_style_url" => self.work_style_url = value.to_string(),
            "use_github_ssh" => self.use_github_ssh = value == "true",
            "anthropic_api_key" => {
                set_credential_key(&mut self.credentials.anthropic, value);
            }
            "anthropic_export_needed" => {
                set_credential_export(&mut self.credentials.anthropic, value);
            }
            "gemini_api_key" => {
                set_credential_key(&mut self.credentials.google_gemini, value);
            }
            "gemini_export_needed" => {
                set_credential_export(&mut self.credentials.google_gemini, value);
            }
            "codex_api_key" => {
                set_credential_key(&mut self.credentials.openai_codex, value);
            }
            "codex_export_needed" => {
                set_credential_export(&mut self.credentials.openai_codex, value);
            }
            "coding_style_level" => {
                if let Ok(n) = value.parse::<u8>() {
                    if n <= CODING_STYLE_LEVEL_MAX {
                        self.coding_style_level = n;
                    }
                }
            }
            "customized_coding_style" => {
                self.customized_coding_style = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            _ => {}
        }
    }

    /// Check cross-field constraints. Per-field range errors cannot occur
    /// (`apply_entry` refuses out-of-range values), so only relations
    /// between fields are verified here.
    pub fn validate(&self) -> Result<()> {
        if self.max_parallel_docker_containers > self.max_docker_containers {
            return Err(Error::config(format!(
                "max_parallel_docker_containers ({}) exceeds max_docker_containers ({})",
                self.max_parallel_docker_containers, self.max_docker_containers
            )));
        }
        if self.max_tasks < self.min_tasks {
            return Err(Error::config(format!(
                "max_tasks ({}) is below min_tasks ({})",
                self.max_tasks, self.min_tasks
            )));
        }
        if self.work_style == WorkStyleKind::Custom
            && (self.custom_label.is_empty() || self.custom_description.is_empty())
        {
            return Err(Error::config(
                "work_style=custom requires custom_label and custom_description",
            ));
        }
        if self.work_style == WorkStyleKind::FromUrl && self.work_style_url.is_empty() {
            return Err(Error::config("work_style=from_url requires work_style_url"));
        }
        Ok(())
    }

    /// The work-style paragraph injected into agent prompts, when one exists.
    ///
    /// For `from_url` the caller fetches the URL and stores the body in
    /// `custom_description` before the job runs; an unfetched style yields
    /// `None` and the prompt falls back to the default.
    pub fn work_style_text(&self) -> Option<String> {
        let text = match self.work_style {
            WorkStyleKind::Default => return None,
            WorkStyleKind::QaTester => {
                "Work like a meticulous QA tester: probe edge cases, add or extend tests \
                 for every change, and prefer small verifiable steps."
            }
            WorkStyleKind::BoldGenius => {
                "Work boldly: prefer the simplest sweeping change that solves the problem \
                 properly over minimal patches, but keep the build green."
            }
            WorkStyleKind::CarefulDocumentWriter => {
                "Work like a careful technical writer: favor documentation, comments, and \
                 naming improvements, and keep behavioral changes minimal."
            }
            WorkStyleKind::InstructiveDocumentWriter => {
                "Work like an instructive technical writer: produce documentation that \
                 teaches, with worked examples for every concept you touch."
            }
            WorkStyleKind::BugFixer => {
                "Work like a bug fixer: reproduce first, fix the root cause with the \
                 smallest correct change, and add a regression test."
            }
            WorkStyleKind::Custom | WorkStyleKind::FromUrl => {
                if self.custom_description.is_empty() {
                    return None;
                }
                return Some(self.custom_description.clone());
            }
        };
        Some(text.to_string())
    }
}

fn set_credential_key(slot: &mut Option<ApiCredential>, value: &str) {
    if value.is_empty() {
        return;
    }
    match slot {
        Some(cred) => cred.key = value.to_string(),
        None => {
            *slot = Some(ApiCredential {
                key: value.to_string(),
                export_needed: false,
            })
        }
    }
}

fn set_credential_export(slot: &mut Option<ApiCredential>, value: &str) {
    if let Some(cred) = slot {
        cred.export_needed = value == "true";
    }
}

/// Parse a `key=value` config file, calling `f` for each entry.
///
/// Lines starting with `#` and empty lines are skipped.
fn parse_config_file(path: &Path, mut f: impl FnMut(&str, &str)) -> Result<()> {
    let content = fs::read_to_string(path)
        .map_err(|e| Error::config(format!("{}: {e}", path.display())))?;
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            f(k.trim(), v.trim());
        }
    }
    Ok(())
}
