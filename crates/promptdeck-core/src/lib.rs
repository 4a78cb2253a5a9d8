use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub type Result<T> = anyhow::Result<T>;

pub fn runtime_dir(workspace: &Path) -> PathBuf {
    workspace.join(".promptdeck")
}

/// Canonical console operations. Control flow only ever compares against
/// these identifiers; the user-typeable spellings live in [`CommandTokens`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConsoleOp {
    CreateCategory,
    Help,
    NewTemplate,
    DeleteTemplate,
    DeleteCategory,
    Cancel,
}

/// Surface-token table for the hash-command console.
///
/// Each canonical operation accepts one or more spellings; the defaults keep
/// the legacy Chinese keywords working alongside English ones, and a
/// deployment can re-tokenize the console entirely from settings. Matching is
/// whole-token and case-insensitive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandTokens {
    pub create_category: Vec<String>,
    pub help: Vec<String>,
    pub new_template: Vec<String>,
    pub delete_template: Vec<String>,
    pub delete_category: Vec<String>,
    pub cancel: Vec<String>,
    /// Accepted title-label prefixes on wizard answers; the first entry is
    /// what the wizard pre-fills into the input box.
    pub title_labels: Vec<String>,
    /// Accepted content-label prefixes on wizard answers.
    pub content_labels: Vec<String>,
}

impl Default for CommandTokens {
    fn default() -> Self {
        let list = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            create_category: list(&["new-category", "create-category", "新建分类", "创建分类"]),
            help: list(&["help", "帮助"]),
            new_template: list(&["new", "add", "新建", "添加"]),
            delete_template: list(&["delete", "删除"]),
            delete_category: list(&["delete-category", "删除分类"]),
            cancel: list(&["cancel", "取消"]),
            title_labels: list(&["Title:", "提示词标题："]),
            content_labels: list(&["Content:", "提示词内容："]),
        }
    }
}

impl CommandTokens {
    /// Resolve a single input token to its canonical operation.
    pub fn resolve(&self, token: &str) -> Option<ConsoleOp> {
        let needle = token.to_lowercase();
        let hit = |candidates: &[String]| candidates.iter().any(|t| t.to_lowercase() == needle);
        if hit(&self.create_category) {
            return Some(ConsoleOp::CreateCategory);
        }
        if hit(&self.help) {
            return Some(ConsoleOp::Help);
        }
        if hit(&self.new_template) {
            return Some(ConsoleOp::NewTemplate);
        }
        if hit(&self.delete_category) {
            return Some(ConsoleOp::DeleteCategory);
        }
        if hit(&self.delete_template) {
            return Some(ConsoleOp::DeleteTemplate);
        }
        if hit(&self.cancel) {
            return Some(ConsoleOp::Cancel);
        }
        None
    }

    pub fn is_cancel(&self, input: &str) -> bool {
        self.resolve(input) == Some(ConsoleOp::Cancel)
    }

    /// Preferred spelling for an operation, used when rendering hints.
    pub fn surface(&self, op: ConsoleOp) -> &str {
        let candidates = match op {
            ConsoleOp::CreateCategory => &self.create_category,
            ConsoleOp::Help => &self.help,
            ConsoleOp::NewTemplate => &self.new_template,
            ConsoleOp::DeleteTemplate => &self.delete_template,
            ConsoleOp::DeleteCategory => &self.delete_category,
            ConsoleOp::Cancel => &self.cancel,
        };
        candidates.first().map(String::as_str).unwrap_or("")
    }

    pub fn title_prefill(&self) -> String {
        self.title_labels.first().cloned().unwrap_or_default()
    }

    pub fn content_prefill(&self) -> String {
        self.content_labels.first().cloned().unwrap_or_default()
    }

    /// Strip one configured title label (if present) and trim the remainder.
    pub fn strip_title_label<'a>(&self, input: &'a str) -> &'a str {
        strip_label(&self.title_labels, input)
    }

    pub fn strip_content_label<'a>(&self, input: &'a str) -> &'a str {
        strip_label(&self.content_labels, input)
    }
}

fn strip_label<'a>(labels: &[String], input: &'a str) -> &'a str {
    for label in labels {
        if let Some(rest) = input.strip_prefix(label.as_str()) {
            return rest.trim();
        }
    }
    input.trim()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub console: ConsoleConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ConsoleConfig {
    pub tokens: CommandTokens,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub endpoint: Option<String>,
}

impl AppConfig {
    pub fn user_settings_path() -> Option<PathBuf> {
        let home = std::env::var("HOME")
            .ok()
            .or_else(|| std::env::var("USERPROFILE").ok())?;
        Some(Path::new(&home).join(".promptdeck/settings.json"))
    }

    pub fn project_settings_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("settings.json")
    }

    pub fn project_local_settings_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("settings.local.json")
    }

    /// Defaults merged with the user, project, and project-local settings
    /// layers, in that order (later layers win).
    pub fn load(workspace: &Path) -> Result<Self> {
        let mut merged = serde_json::to_value(Self::default())?;

        let mut paths = Vec::new();
        if let Some(user) = Self::user_settings_path() {
            paths.push(user);
        }
        paths.push(Self::project_settings_path(workspace));
        paths.push(Self::project_local_settings_path(workspace));

        for path in paths {
            if !path.exists() {
                continue;
            }
            let raw = fs::read_to_string(path)?;
            let value: serde_json::Value = serde_json::from_str(&raw)?;
            merge_json_value(&mut merged, &value);
        }

        Ok(serde_json::from_value(merged)?)
    }

    pub fn ensure(workspace: &Path) -> Result<Self> {
        let path = Self::project_settings_path(workspace);
        if path.exists()
            || Self::project_local_settings_path(workspace).exists()
            || Self::user_settings_path().is_some_and(|p| p.exists())
        {
            return Self::load(workspace);
        }
        fs::create_dir_all(
            path.parent()
                .ok_or_else(|| anyhow::anyhow!("invalid settings path"))?,
        )?;
        let cfg = Self::default();
        cfg.save(workspace)?;
        Ok(cfg)
    }

    pub fn save(&self, workspace: &Path) -> Result<()> {
        let path = Self::project_settings_path(workspace);
        fs::create_dir_all(
            path.parent()
                .ok_or_else(|| anyhow::anyhow!("invalid settings path"))?,
        )?;
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }
}

fn merge_json_value(base: &mut serde_json::Value, overlay: &serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base_obj), serde_json::Value::Object(overlay_obj)) => {
            for (key, overlay_value) in overlay_obj {
                if let Some(base_value) = base_obj.get_mut(key) {
                    merge_json_value(base_value, overlay_value);
                } else {
                    base_obj.insert(key.clone(), overlay_value.clone());
                }
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value.clone();
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub seq_no: u64,
    pub at: DateTime<Utc>,
    pub session_id: Uuid,
    pub kind: EventKind,
}

/// Versioned event payloads appended to `observe.log`.
///
/// Wizard answer text is user content and is deliberately absent from this
/// set; only command lines and store mutations are recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum EventKind {
    ConsoleCommandV1 { input: String },
    StoreSeededV1 { categories: usize },
    CategoryCreatedV1 { name: String },
    CategoryDeletedV1 { name: String, templates: usize },
    TemplateCreatedV1 { category: String, title: String },
    TemplateDeletedV1 { category: String, title: String },
    TemplateUsedV1 { category: String, title: String },
    WizardStartedV1 { category: String, flow: WizardFlow },
    WizardCancelledV1 { step: String },
    WizardResetV1 { step: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WizardFlow {
    Create,
    Delete,
}
