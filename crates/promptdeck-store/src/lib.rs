use anyhow::bail;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use promptdeck_core::{Result, runtime_dir};
use promptdeck_observe::warn_stderr;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};

pub const TEMPLATES_DIR: &str = "prompt-templates";
const INIT_MARKER: &str = ".initialized";

/// On-disk category record. Field names match the persisted JSON contract
/// (`categoryName`, `metadata.lastModified`); template iteration order is
/// insertion order, exactly as listed to the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub category_name: String,
    pub templates: IndexMap<String, String>,
    pub metadata: CategoryMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryMetadata {
    pub created: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

/// One row of the category listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryInfo {
    pub name: String,
    pub template_count: usize,
    pub last_modified: DateTime<Utc>,
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("category record is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

struct SeedCategory {
    category: &'static str,
    templates: &'static [(&'static str, &'static str)],
}

const DEFAULT_SEED: &[SeedCategory] = &[
    SeedCategory {
        category: "默认分类1",
        templates: &[
            ("代码解释", "请解释这段代码的功能和工作原理"),
            ("代码优化", "请帮我优化这段代码，提高性能和可读性"),
            ("错误分析", "请分析这个错误的原因并提供解决方案"),
        ],
    },
    SeedCategory {
        category: "默认分类2",
        templates: &[
            ("文档生成", "请为这段代码生成详细的文档说明"),
            ("测试用例", "请为这个函数生成全面的测试用例"),
            ("代码review", "请review这段代码，指出潜在问题和改进建议"),
        ],
    },
];

/// Replace the filesystem-unsafe characters `< > : " / \ | ? *` with `_`.
///
/// The original name is preserved inside the payload, so two names that
/// sanitize to the same string share one storage file (known limitation; the
/// second `create_category` fails against the first's file).
pub fn sanitize_category_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            other => other,
        })
        .collect()
}

/// Durable mapping from category name to a named-template collection, one
/// JSON file per category under `.promptdeck/prompt-templates/`.
///
/// Mutations return booleans: failure is reported to the caller as `false`
/// (with a stderr warning), never as a panic or error value. Single-threaded
/// cooperative callers only; same-category writes from truly parallel
/// callers are last-write-wins.
pub struct TemplateStore {
    dir: PathBuf,
}

impl TemplateStore {
    pub fn new(workspace: &Path) -> Result<Self> {
        let dir = runtime_dir(workspace).join(TEMPLATES_DIR);
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.dir
    }

    /// All categories sorted by name. Unreadable or malformed records are
    /// skipped with a warning so one bad file cannot take down the listing.
    pub fn list_categories(&self) -> Vec<CategoryInfo> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut infos = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match self.read_category(&path) {
                Ok(category) => infos.push(CategoryInfo {
                    name: category.category_name,
                    template_count: category.templates.len(),
                    last_modified: category.metadata.last_modified,
                }),
                Err(err) => {
                    warn_stderr(&format!("skipping category file {}: {err}", path.display()));
                }
            }
        }
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Full record for one category. Absence is a normal outcome.
    pub fn category(&self, name: &str) -> Option<Category> {
        let path = self.category_path(name);
        if !path.exists() {
            return None;
        }
        match self.read_category(&path) {
            Ok(category) => Some(category),
            Err(err) => {
                warn_stderr(&format!("failed to read category \"{name}\": {err}"));
                None
            }
        }
    }

    /// False when a category with the same sanitized key already exists or
    /// the write fails.
    pub fn create_category(&self, name: &str) -> bool {
        let path = self.category_path(name);
        if path.exists() {
            return false;
        }
        let now = Utc::now();
        let category = Category {
            category_name: name.to_string(),
            templates: IndexMap::new(),
            metadata: CategoryMetadata {
                created: now,
                last_modified: now,
            },
        };
        match self.write_category(&path, &category) {
            Ok(()) => true,
            Err(err) => {
                warn_stderr(&format!("failed to create category \"{name}\": {err}"));
                false
            }
        }
    }

    /// Removes the whole record; cascades to every contained template.
    pub fn delete_category(&self, name: &str) -> bool {
        let path = self.category_path(name);
        if !path.exists() {
            return false;
        }
        match fs::remove_file(&path) {
            Ok(()) => true,
            Err(err) => {
                warn_stderr(&format!("failed to delete category \"{name}\": {err}"));
                false
            }
        }
    }

    /// Upsert: an existing title is silently overwritten, not rejected.
    /// Callers that need duplicate rejection (the creation wizard does) must
    /// pre-check with [`TemplateStore::template`]. False when the category
    /// does not exist or the write fails.
    pub fn add_template(&self, category: &str, title: &str, content: &str) -> bool {
        let path = self.category_path(category);
        if !path.exists() {
            return false;
        }
        let mut record = match self.read_category(&path) {
            Ok(record) => record,
            Err(err) => {
                warn_stderr(&format!("failed to read category \"{category}\": {err}"));
                return false;
            }
        };
        record
            .templates
            .insert(title.to_string(), content.to_string());
        record.metadata.last_modified = Utc::now();
        match self.write_category(&path, &record) {
            Ok(()) => true,
            Err(err) => {
                warn_stderr(&format!("failed to write category \"{category}\": {err}"));
                false
            }
        }
    }

    /// Exact-title removal; case folding at lookup time is the console's
    /// concern, not the store's.
    pub fn delete_template(&self, category: &str, title: &str) -> bool {
        let path = self.category_path(category);
        if !path.exists() {
            return false;
        }
        let mut record = match self.read_category(&path) {
            Ok(record) => record,
            Err(err) => {
                warn_stderr(&format!("failed to read category \"{category}\": {err}"));
                return false;
            }
        };
        if record.templates.shift_remove(title).is_none() {
            return false;
        }
        record.metadata.last_modified = Utc::now();
        match self.write_category(&path, &record) {
            Ok(()) => true,
            Err(err) => {
                warn_stderr(&format!("failed to write category \"{category}\": {err}"));
                false
            }
        }
    }

    pub fn template(&self, category: &str, title: &str) -> Option<String> {
        self.category(category)?.templates.get(title).cloned()
    }

    pub fn category_names(&self) -> Vec<String> {
        self.list_categories()
            .into_iter()
            .map(|info| info.name)
            .collect()
    }

    /// Titles in insertion order; empty when the category is absent.
    pub fn template_titles(&self, category: &str) -> Vec<String> {
        self.category(category)
            .map(|record| record.templates.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_initialized(&self) -> bool {
        self.marker_path().exists()
    }

    /// First-run seeding. When the marker is absent, writes the default
    /// categories and then the marker; returns whether seeding ran. Only the
    /// marker decides: deleting every category later never reseeds. The
    /// marker is written after a fully successful pass, so a partial seed is
    /// retried (and converges, since adds are upserts) on the next call.
    pub fn ensure_initialized(&self) -> Result<bool> {
        if self.is_initialized() {
            return Ok(false);
        }
        for seed in DEFAULT_SEED {
            if self.category(seed.category).is_none() && !self.create_category(seed.category) {
                bail!("failed to seed category \"{}\"", seed.category);
            }
            for &(title, content) in seed.templates {
                if !self.add_template(seed.category, title, content) {
                    bail!("failed to seed template \"{title}\"");
                }
            }
        }
        let marker = json!({
            "initialized": true,
            "timestamp": Utc::now().to_rfc3339(),
        });
        fs::write(self.marker_path(), serde_json::to_vec_pretty(&marker)?)?;
        Ok(true)
    }

    fn category_path(&self, name: &str) -> PathBuf {
        self.dir
            .join(format!("{}.json", sanitize_category_file_name(name)))
    }

    fn marker_path(&self) -> PathBuf {
        self.dir.join(INIT_MARKER)
    }

    fn read_category(&self, path: &Path) -> std::result::Result<Category, StoreError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn write_category(
        &self,
        path: &Path,
        category: &Category,
    ) -> std::result::Result<(), StoreError> {
        fs::write(path, serde_json::to_vec_pretty(category)?)?;
        Ok(())
    }
}
