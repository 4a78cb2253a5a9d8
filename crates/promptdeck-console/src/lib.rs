use anyhow::anyhow;
use chrono::Utc;
use promptdeck_core::{
    AppConfig, CommandTokens, ConsoleOp, EventEnvelope, EventKind, Result, WizardFlow,
};
use promptdeck_observe::{Observer, warn_stderr};
use promptdeck_store::TemplateStore;
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

/// Whether an input line is addressed to the template console at all.
pub fn is_hash_command(input: &str) -> bool {
    input.trim_start().starts_with('#')
}

/// Everything the console can hand back to its host. One variant per action
/// kind, each carrying exactly the fields that kind needs; the serialized
/// form is internally tagged for hosts that consume JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConsoleAction {
    /// Informational heading plus ordered menu lines; display only.
    ShowMenu { heading: String, entries: Vec<String> },
    /// Informational text plus a prompt describing what to type next;
    /// does not alter the input box.
    InputRequest { message: String, prompt: String },
    /// Literal text the host must place into the user's input box (an empty
    /// string clears it), with an optional notice to display alongside.
    SetInputText { notice: Option<String>, text: String },
    /// Single informational or error string, terminal for the interaction.
    Message { text: String },
    /// Stored template body; hosts treat it like [`ConsoleAction::SetInputText`] text.
    TemplateContent { content: String },
}

/// Multi-turn wizard position. One variant per step, each carrying exactly
/// the context that step needs; at most one flow is in progress per console.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum WizardState {
    #[default]
    Idle,
    AwaitingTitle {
        category: String,
    },
    AwaitingContent {
        category: String,
        title: String,
    },
    AwaitingDeleteSelection {
        category: String,
    },
}

impl WizardState {
    pub fn is_active(&self) -> bool {
        !matches!(self, WizardState::Idle)
    }

    /// Stable step name for events and logs.
    pub fn step_name(&self) -> &'static str {
        match self {
            WizardState::Idle => "idle",
            WizardState::AwaitingTitle { .. } => "awaiting_title",
            WizardState::AwaitingContent { .. } => "awaiting_content",
            WizardState::AwaitingDeleteSelection { .. } => "awaiting_delete_selection",
        }
    }
}

/// Classified hash command. This stage is pure tokenization plus reserved-
/// keyword recognition; category existence and template titles are resolved
/// against the store by [`TemplateConsole`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedCommand {
    MainMenu,
    Help,
    CreateCategory {
        name: Option<String>,
    },
    CategoryCommand {
        category: String,
        action: Option<CategoryAction>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategoryAction {
    DeleteCategory,
    BeginCreate,
    DeleteTemplate {
        title: Option<String>,
    },
    /// Unreserved operation token: a candidate template title to inject.
    Freeform {
        token: String,
    },
}

/// Tokenize one hash-prefixed line. `None` when the line does not start with
/// the sentinel (after trimming) and therefore belongs to the chat pipeline.
pub fn parse_hash_command(input: &str, tokens: &CommandTokens) -> Option<ParsedCommand> {
    let rest = input.trim().strip_prefix('#')?;
    let mut parts = rest.split_whitespace();
    let Some(category_token) = parts.next() else {
        return Some(ParsedCommand::MainMenu);
    };
    let operation_token = parts.next();
    let template_name = parts.collect::<Vec<_>>().join(" ");

    // Only create-category and help are reserved in the first position; any
    // other token is a category name, even when it spells an operation.
    match tokens.resolve(category_token) {
        Some(ConsoleOp::CreateCategory) => {
            return Some(ParsedCommand::CreateCategory {
                // The name is a single token, as the console has always
                // parsed it; anything after it is ignored.
                name: operation_token.map(|name| name.to_string()),
            });
        }
        Some(ConsoleOp::Help) => return Some(ParsedCommand::Help),
        _ => {}
    }

    let action = operation_token.map(|op| match tokens.resolve(op) {
        Some(ConsoleOp::DeleteCategory) => CategoryAction::DeleteCategory,
        Some(ConsoleOp::NewTemplate) => CategoryAction::BeginCreate,
        Some(ConsoleOp::DeleteTemplate) => CategoryAction::DeleteTemplate {
            title: (!template_name.is_empty()).then(|| template_name.clone()),
        },
        _ => CategoryAction::Freeform {
            token: op.to_string(),
        },
    });
    Some(ParsedCommand::CategoryCommand {
        category: category_token.to_string(),
        action,
    })
}

/// One console session: the template store, the surface-token table, and the
/// wizard state, owned together. The host constructs it, holds it, and feeds
/// it every input line; `handle_input` returning `None` means the line is not
/// ours and should go to the chat pipeline.
pub struct TemplateConsole {
    store: TemplateStore,
    tokens: CommandTokens,
    wizard: WizardState,
    observer: Option<Observer>,
    session_id: Uuid,
    seq_no: u64,
}

impl TemplateConsole {
    /// Build a console for `workspace`: settings ensured, observer wired,
    /// default categories seeded on first run.
    pub fn new(workspace: &Path) -> Result<Self> {
        let cfg = AppConfig::ensure(workspace)?;
        let observer = Observer::new(workspace, &cfg.telemetry)?;
        Self::with_config(workspace, &cfg, Some(observer))
    }

    pub fn with_config(
        workspace: &Path,
        cfg: &AppConfig,
        observer: Option<Observer>,
    ) -> Result<Self> {
        let store = TemplateStore::new(workspace)?;
        let mut console = Self {
            store,
            tokens: cfg.console.tokens.clone(),
            wizard: WizardState::Idle,
            observer,
            session_id: Uuid::now_v7(),
            seq_no: 0,
        };
        console.seed_defaults();
        Ok(console)
    }

    pub fn store(&self) -> &TemplateStore {
        &self.store
    }

    pub fn wizard_active(&self) -> bool {
        self.wizard.is_active()
    }

    pub fn wizard_state(&self) -> &WizardState {
        &self.wizard
    }

    /// Abandon any in-progress flow without persisting anything.
    pub fn reset_wizard(&mut self) {
        if self.wizard.is_active() {
            let step = self.wizard.step_name().to_string();
            self.wizard = WizardState::Idle;
            self.record(EventKind::WizardResetV1 {
                step,
                reason: "external reset".to_string(),
            });
        }
    }

    /// Process one input line. `None` = declined (not hash-prefixed while no
    /// wizard is active). Every handled line yields a displayable action;
    /// internal failures reset the wizard instead of propagating, so the
    /// session can never stick in a broken step.
    pub fn handle_input(&mut self, raw: &str) -> Option<ConsoleAction> {
        let trimmed = raw.trim();
        if !is_hash_command(trimmed) && !self.wizard_active() {
            return None;
        }
        let action = match self.dispatch(trimmed) {
            Ok(action) => action,
            Err(err) => {
                let step = self.wizard.step_name().to_string();
                self.wizard = WizardState::Idle;
                self.record(EventKind::WizardResetV1 {
                    step,
                    reason: err.to_string(),
                });
                self.warn(&format!("console dispatch failed: {err}"));
                ConsoleAction::Message {
                    text: "⚠️ Something went wrong; the wizard was reset".to_string(),
                }
            }
        };
        Some(action)
    }

    fn dispatch(&mut self, input: &str) -> Result<ConsoleAction> {
        // An active wizard consumes everything, hash-prefixed or not.
        if self.wizard_active() {
            return self.continue_wizard(input);
        }
        self.record(EventKind::ConsoleCommandV1 {
            input: input.to_string(),
        });
        let parsed = parse_hash_command(input, &self.tokens)
            .ok_or_else(|| anyhow!("input is not a hash command"))?;
        match parsed {
            ParsedCommand::MainMenu => Ok(self.main_menu()),
            ParsedCommand::Help => Ok(self.help_menu()),
            ParsedCommand::CreateCategory { name: Some(name) } => Ok(self.create_category(&name)),
            ParsedCommand::CreateCategory { name: None } => Ok(ConsoleAction::InputRequest {
                message: "Create a new category".to_string(),
                prompt: "Enter a name for the new category:".to_string(),
            }),
            ParsedCommand::CategoryCommand { category, action } => {
                self.category_command(category, action)
            }
        }
    }

    fn category_command(
        &mut self,
        category: String,
        action: Option<CategoryAction>,
    ) -> Result<ConsoleAction> {
        // Exact-name resolution against the listing, so a name that only
        // aliases an existing file through sanitization is still unknown.
        let known = self.store.category_names();
        if !known.iter().any(|name| name == &category) {
            let listing = if known.is_empty() {
                "(none)".to_string()
            } else {
                known.join(", ")
            };
            return Ok(ConsoleAction::Message {
                text: format!(
                    "Category \"{category}\" does not exist.\nAvailable categories: {listing}\nUse: #{create} <name> to create one",
                    create = self.tokens.surface(ConsoleOp::CreateCategory)
                ),
            });
        }
        let action = match action {
            None => self.category_menu(&category),
            Some(CategoryAction::DeleteCategory) => self.delete_category(&category),
            Some(CategoryAction::BeginCreate) => self.begin_create_wizard(category),
            Some(CategoryAction::DeleteTemplate { title: Some(title) }) => {
                self.delete_template_by_name(&category, &title)
            }
            Some(CategoryAction::DeleteTemplate { title: None }) => {
                self.begin_delete_selection(category)
            }
            Some(CategoryAction::Freeform { token }) => self.use_or_reject(&category, &token),
        };
        Ok(action)
    }

    // ── Wizard ──────────────────────────────────────────────────────────

    fn continue_wizard(&mut self, raw: &str) -> Result<ConsoleAction> {
        // A leading '#' is unwrapped first so the echoed prompt text can be
        // re-submitted unchanged; cancel is checked before label stripping.
        let answer = raw.strip_prefix('#').unwrap_or(raw).trim();

        if self.tokens.is_cancel(answer) {
            let step = self.wizard.step_name().to_string();
            self.wizard = WizardState::Idle;
            self.record(EventKind::WizardCancelledV1 { step });
            return Ok(ConsoleAction::Message {
                text: "Template wizard cancelled".to_string(),
            });
        }

        let state = std::mem::take(&mut self.wizard);
        match state {
            WizardState::Idle => Err(anyhow!("wizard continuation without an active step")),
            WizardState::AwaitingTitle { category } => Ok(self.wizard_title_step(category, answer)),
            WizardState::AwaitingContent { category, title } => {
                Ok(self.wizard_content_step(category, title, answer))
            }
            WizardState::AwaitingDeleteSelection { category } => {
                Ok(self.wizard_delete_step(category, answer))
            }
        }
    }

    fn wizard_title_step(&mut self, category: String, answer: &str) -> ConsoleAction {
        let title = self.tokens.strip_title_label(answer);
        if title.is_empty() {
            self.wizard = WizardState::AwaitingTitle { category };
            return ConsoleAction::SetInputText {
                notice: Some("❌ The title cannot be empty; enter a template title".to_string()),
                text: self.tokens.title_prefill(),
            };
        }
        // Exact-case duplicate check, deliberately stricter than the
        // case-insensitive lookups used for delete and use.
        if self.store.template(&category, title).is_some() {
            let notice = format!("❌ Title \"{title}\" already exists; enter a different title");
            self.wizard = WizardState::AwaitingTitle { category };
            return ConsoleAction::SetInputText {
                notice: Some(notice),
                text: self.tokens.title_prefill(),
            };
        }
        let notice = format!("✅ Title set: {title}\n📝 Step 2: enter the template content");
        self.wizard = WizardState::AwaitingContent {
            category,
            title: title.to_string(),
        };
        ConsoleAction::SetInputText {
            notice: Some(notice),
            text: self.tokens.content_prefill(),
        }
    }

    fn wizard_content_step(
        &mut self,
        category: String,
        title: String,
        answer: &str,
    ) -> ConsoleAction {
        let content = self.tokens.strip_content_label(answer);
        if content.is_empty() {
            self.wizard = WizardState::AwaitingContent { category, title };
            return ConsoleAction::SetInputText {
                notice: Some(
                    "❌ The content cannot be empty; enter the template content".to_string(),
                ),
                text: self.tokens.content_prefill(),
            };
        }
        // The session ends here whatever the store says: a failed write is
        // reported, not retried, and the wizard never sticks.
        let saved = self.store.add_template(&category, &title, content);
        if saved {
            self.record(EventKind::TemplateCreatedV1 {
                category: category.clone(),
                title: title.clone(),
            });
            ConsoleAction::Message {
                text: format!(
                    "🎉 Template created!\n📂 Category: {category}\n📝 Title: {title}\n\n💡 Use it with: #{category} {title}\n📋 Browse the category: #{category}"
                ),
            }
        } else {
            ConsoleAction::Message {
                text: "❌ Failed to create the template; try again later".to_string(),
            }
        }
    }

    fn wizard_delete_step(&mut self, category: String, answer: &str) -> ConsoleAction {
        let titles = self.store.template_titles(&category);
        let matched = titles
            .iter()
            .find(|t| t.to_lowercase() == answer.to_lowercase())
            .cloned();
        let Some(title) = matched else {
            let cancel = self.tokens.surface(ConsoleOp::Cancel).to_string();
            let text = format!(
                "❌ Template \"{answer}\" does not exist\n📝 Available templates: {}\n💡 Enter an exact template name, or \"{cancel}\"",
                titles.join(", ")
            );
            // A miss keeps the step alive so the user can retry.
            self.wizard = WizardState::AwaitingDeleteSelection { category };
            return ConsoleAction::Message { text };
        };
        if self.store.delete_template(&category, &title) {
            self.record(EventKind::TemplateDeletedV1 {
                category: category.clone(),
                title: title.clone(),
            });
            ConsoleAction::SetInputText {
                notice: Some(format!(
                    "✅ Template \"{title}\" deleted from category \"{category}\""
                )),
                text: String::new(),
            }
        } else {
            ConsoleAction::Message {
                text: "❌ Failed to delete template".to_string(),
            }
        }
    }

    fn begin_create_wizard(&mut self, category: String) -> ConsoleAction {
        self.record(EventKind::WizardStartedV1 {
            category: category.clone(),
            flow: WizardFlow::Create,
        });
        let notice = format!(
            "✨ Template wizard started - category: {category}\n📝 Step 1: enter a template title"
        );
        self.wizard = WizardState::AwaitingTitle { category };
        ConsoleAction::SetInputText {
            notice: Some(notice),
            text: self.tokens.title_prefill(),
        }
    }

    fn begin_delete_selection(&mut self, category: String) -> ConsoleAction {
        let titles = self.store.template_titles(&category);
        if titles.is_empty() {
            return ConsoleAction::Message {
                text: format!("Category \"{category}\" has no templates yet"),
            };
        }
        self.record(EventKind::WizardStartedV1 {
            category: category.clone(),
            flow: WizardFlow::Delete,
        });
        let mut entries = vec!["📝 Pick the template to delete:".to_string(), String::new()];
        entries.extend(titles.iter().map(|title| format!("  📄 {title}")));
        entries.push(String::new());
        entries.push(format!(
            "💡 Type a template name to delete it, or \"{}\" to exit",
            self.tokens.surface(ConsoleOp::Cancel)
        ));
        let heading = format!("🗑️ Delete template - {category}");
        self.wizard = WizardState::AwaitingDeleteSelection { category };
        ConsoleAction::ShowMenu { heading, entries }
    }

    /// Delete by 1-based position in the insertion-ordered title list; for
    /// hosts that render numbered pickers instead of the selection wizard.
    pub fn delete_template_at(&mut self, category: &str, index: usize) -> ConsoleAction {
        let titles = self.store.template_titles(category);
        if index < 1 || index > titles.len() {
            return ConsoleAction::Message {
                text: format!("Invalid number; pick a value between 1-{}", titles.len()),
            };
        }
        let title = titles[index - 1].clone();
        if self.store.delete_template(category, &title) {
            self.record(EventKind::TemplateDeletedV1 {
                category: category.to_string(),
                title: title.clone(),
            });
            ConsoleAction::Message {
                text: format!("✅ Template \"{title}\" deleted from category \"{category}\""),
            }
        } else {
            ConsoleAction::Message {
                text: "❌ Failed to delete template".to_string(),
            }
        }
    }

    // ── Store-backed commands ───────────────────────────────────────────

    fn create_category(&mut self, name: &str) -> ConsoleAction {
        if name.is_empty() {
            return ConsoleAction::Message {
                text: "Category name cannot be empty".to_string(),
            };
        }
        if self.store.create_category(name) {
            self.record(EventKind::CategoryCreatedV1 {
                name: name.to_string(),
            });
            ConsoleAction::Message {
                text: format!(
                    "✅ Category \"{name}\" created!\n\nUse #{name} to manage it\nUse #{name} {new} to create the first template",
                    new = self.tokens.surface(ConsoleOp::NewTemplate)
                ),
            }
        } else {
            ConsoleAction::Message {
                text: format!("❌ Failed to create category: \"{name}\" may already exist"),
            }
        }
    }

    fn delete_category(&mut self, name: &str) -> ConsoleAction {
        let Some(category) = self.store.category(name) else {
            return ConsoleAction::Message {
                text: format!("Category \"{name}\" does not exist"),
            };
        };
        let template_count = category.templates.len();
        if self.store.delete_category(name) {
            self.record(EventKind::CategoryDeletedV1 {
                name: name.to_string(),
                templates: template_count,
            });
            ConsoleAction::Message {
                text: format!(
                    "✅ Category \"{name}\" and its {template_count} templates deleted"
                ),
            }
        } else {
            ConsoleAction::Message {
                text: format!("❌ Failed to delete category \"{name}\""),
            }
        }
    }

    fn delete_template_by_name(&mut self, category: &str, requested: &str) -> ConsoleAction {
        let titles = self.store.template_titles(category);
        let found = titles
            .iter()
            .find(|t| t.to_lowercase() == requested.to_lowercase())
            .cloned();
        let Some(title) = found else {
            return ConsoleAction::Message {
                text: format!(
                    "❌ Template \"{requested}\" does not exist\n📝 Available templates: {}",
                    titles.join(", ")
                ),
            };
        };
        if self.store.delete_template(category, &title) {
            self.record(EventKind::TemplateDeletedV1 {
                category: category.to_string(),
                title: title.clone(),
            });
            ConsoleAction::SetInputText {
                notice: Some(format!(
                    "✅ Template \"{title}\" deleted from category \"{category}\""
                )),
                text: String::new(),
            }
        } else {
            ConsoleAction::Message {
                text: "❌ Failed to delete template".to_string(),
            }
        }
    }

    fn use_or_reject(&mut self, category: &str, token: &str) -> ConsoleAction {
        let titles = self.store.template_titles(category);
        let matched = titles
            .iter()
            .find(|t| t.to_lowercase() == token.to_lowercase())
            .cloned();
        match matched {
            Some(title) => self.use_template(category, &title),
            None => ConsoleAction::Message {
                text: format!(
                    "❌ Unknown operation \"{token}\"\n📝 Valid operations: {delete}, {new}\n📝 Available templates: {titles}",
                    delete = self.tokens.surface(ConsoleOp::DeleteTemplate),
                    new = self.tokens.surface(ConsoleOp::NewTemplate),
                    titles = titles.join(", ")
                ),
            },
        }
    }

    fn use_template(&mut self, category: &str, title: &str) -> ConsoleAction {
        match self.store.template(category, title) {
            Some(content) => {
                self.record(EventKind::TemplateUsedV1 {
                    category: category.to_string(),
                    title: title.to_string(),
                });
                ConsoleAction::TemplateContent { content }
            }
            None => {
                let titles = self.store.template_titles(category);
                if titles.is_empty() {
                    ConsoleAction::Message {
                        text: format!(
                            "Category \"{category}\" has no templates yet. Use #{category} {new} to create one",
                            new = self.tokens.surface(ConsoleOp::NewTemplate)
                        ),
                    }
                } else {
                    let list = titles
                        .iter()
                        .map(|t| format!("  #{category} {t}"))
                        .collect::<Vec<_>>()
                        .join("\n");
                    ConsoleAction::Message {
                        text: format!(
                            "Template \"{title}\" does not exist.\n\nAvailable templates:\n{list}"
                        ),
                    }
                }
            }
        }
    }

    // ── Menus ───────────────────────────────────────────────────────────

    fn main_menu(&self) -> ConsoleAction {
        let categories = self.store.list_categories();
        let create = self.tokens.surface(ConsoleOp::CreateCategory);
        let help = self.tokens.surface(ConsoleOp::Help);
        let mut entries = vec![
            "🎯 Prompt template manager".to_string(),
            String::new(),
            "📝 Quick operations:".to_string(),
            format!("  #{create} <name>  - create a category"),
            "  #<category>           - open category management".to_string(),
            format!("  #{help}                 - detailed help"),
            String::new(),
            "📁 Categories:".to_string(),
        ];
        if categories.is_empty() {
            entries.push(format!("  (none yet; use #{create} to add the first one)"));
        } else {
            for info in &categories {
                entries.push(format!(
                    "  📂 {} ({} templates)",
                    info.name, info.template_count
                ));
            }
        }
        ConsoleAction::ShowMenu {
            heading: "Prompt template console".to_string(),
            entries,
        }
    }

    fn category_menu(&self, name: &str) -> ConsoleAction {
        let Some(category) = self.store.category(name) else {
            return ConsoleAction::Message {
                text: format!("Category \"{name}\" does not exist"),
            };
        };
        let new = self.tokens.surface(ConsoleOp::NewTemplate);
        let delete = self.tokens.surface(ConsoleOp::DeleteTemplate);
        let delete_category = self.tokens.surface(ConsoleOp::DeleteCategory);
        let mut entries = vec![
            format!("📂 Category: {name}"),
            String::new(),
            "🛠️ Management:".to_string(),
            format!("  #{name} {new}              - create a template"),
            format!("  #{name} {delete}           - delete a template"),
            format!("  #{name} {delete_category}  - delete the whole category"),
            String::new(),
            "📋 Templates:".to_string(),
        ];
        if category.templates.is_empty() {
            entries.push(format!("  (none yet; use {new} to add the first one)"));
        } else {
            for title in category.templates.keys() {
                entries.push(format!("  📄 {title}"));
            }
            entries.push(String::new());
            entries.push("💡 Usage: #<category> <title>".to_string());
        }
        entries.push(String::new());
        entries.push("🔙 Main menu: #".to_string());
        ConsoleAction::ShowMenu {
            heading: "Category management".to_string(),
            entries,
        }
    }

    fn help_menu(&self) -> ConsoleAction {
        let create = self.tokens.surface(ConsoleOp::CreateCategory);
        let new = self.tokens.surface(ConsoleOp::NewTemplate);
        let delete = self.tokens.surface(ConsoleOp::DeleteTemplate);
        let delete_category = self.tokens.surface(ConsoleOp::DeleteCategory);
        let cancel = self.tokens.surface(ConsoleOp::Cancel);
        let entries = vec![
            "🔧 Hash command help".to_string(),
            String::new(),
            "📁 Category management:".to_string(),
            format!("  #{create} <name>        - create a category"),
            "  #<category>                 - category details".to_string(),
            format!("  #<category> {delete_category} - delete the whole category"),
            String::new(),
            "📝 Template management (step by step):".to_string(),
            format!("  #<category> {new}           - start the template wizard"),
            "    → enter a title → enter the content → done".to_string(),
            format!("  #<category> {delete}        - list deletable templates"),
            "  #<category> <title>         - use a template".to_string(),
            String::new(),
            "📖 Example:".to_string(),
            format!("  1. #{create} my-prompts"),
            "  2. #my-prompts".to_string(),
            format!("  3. #my-prompts {new}"),
            "  4. enter a title: refactor".to_string(),
            "  5. enter the content: please refactor this code".to_string(),
            "  6. #my-prompts refactor".to_string(),
            String::new(),
            "💡 Tips:".to_string(),
            format!("  • type \"{cancel}\" during a wizard to abort"),
            "  • # returns to the main menu".to_string(),
            String::new(),
            "🔙 Main menu: #".to_string(),
        ];
        ConsoleAction::ShowMenu {
            heading: "Help".to_string(),
            entries,
        }
    }

    // ── Plumbing ────────────────────────────────────────────────────────

    fn seed_defaults(&mut self) {
        match self.store.ensure_initialized() {
            Ok(true) => {
                let categories = self.store.list_categories().len();
                self.record(EventKind::StoreSeededV1 { categories });
            }
            Ok(false) => {}
            // Seeding trouble is reported, not fatal: the console still works
            // against whatever records exist, and the next run retries.
            Err(err) => self.warn(&format!("default template seeding failed: {err}")),
        }
    }

    fn warn(&self, message: &str) {
        match &self.observer {
            Some(observer) => observer.warn_log(message),
            None => warn_stderr(message),
        }
    }

    fn record(&mut self, kind: EventKind) {
        if self.observer.is_none() {
            return;
        }
        self.seq_no += 1;
        let envelope = EventEnvelope {
            seq_no: self.seq_no,
            at: Utc::now(),
            session_id: self.session_id,
            kind,
        };
        if let Some(observer) = &self.observer {
            match observer.record_event(&envelope) {
                Ok(()) => observer.verbose_log(&format!(
                    "console: event {} recorded for session {}",
                    envelope.seq_no, envelope.session_id
                )),
                Err(err) => observer.warn_log(&format!("failed to record event: {err}")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn temp_console() -> (PathBuf, TemplateConsole) {
        let workspace =
            std::env::temp_dir().join(format!("promptdeck-console-test-{}", Uuid::now_v7()));
        fs::create_dir_all(&workspace).expect("workspace");
        let console =
            TemplateConsole::with_config(&workspace, &AppConfig::default(), None).expect("console");
        (workspace, console)
    }

    fn cleanup(workspace: &PathBuf) {
        fs::remove_dir_all(workspace).expect("cleanup");
    }

    fn text_of(action: &ConsoleAction) -> String {
        match action {
            ConsoleAction::ShowMenu { heading, entries } => {
                format!("{heading}\n{}", entries.join("\n"))
            }
            ConsoleAction::InputRequest { message, prompt } => format!("{message}\n{prompt}"),
            ConsoleAction::SetInputText { notice, text } => {
                format!("{}\n{text}", notice.clone().unwrap_or_default())
            }
            ConsoleAction::Message { text } => text.clone(),
            ConsoleAction::TemplateContent { content } => content.clone(),
        }
    }

    // ── Parser ──────────────────────────────────────────────────────────

    #[test]
    fn parser_classifies_the_command_surface() {
        let tokens = CommandTokens::default();
        assert_eq!(parse_hash_command("hello", &tokens), None);
        assert_eq!(
            parse_hash_command("  #  ", &tokens),
            Some(ParsedCommand::MainMenu)
        );
        assert_eq!(parse_hash_command("#帮助", &tokens), Some(ParsedCommand::Help));
        assert_eq!(
            parse_hash_command("#new-category scratch extra", &tokens),
            Some(ParsedCommand::CreateCategory {
                name: Some("scratch".to_string())
            })
        );
        assert_eq!(
            parse_hash_command("#创建分类", &tokens),
            Some(ParsedCommand::CreateCategory { name: None })
        );
        assert_eq!(
            parse_hash_command("#notes", &tokens),
            Some(ParsedCommand::CategoryCommand {
                category: "notes".to_string(),
                action: None
            })
        );
        assert_eq!(
            parse_hash_command("#notes 删除分类", &tokens),
            Some(ParsedCommand::CategoryCommand {
                category: "notes".to_string(),
                action: Some(CategoryAction::DeleteCategory)
            })
        );
        assert_eq!(
            parse_hash_command("#notes 添加", &tokens),
            Some(ParsedCommand::CategoryCommand {
                category: "notes".to_string(),
                action: Some(CategoryAction::BeginCreate)
            })
        );
        assert_eq!(
            parse_hash_command("#notes delete my long title", &tokens),
            Some(ParsedCommand::CategoryCommand {
                category: "notes".to_string(),
                action: Some(CategoryAction::DeleteTemplate {
                    title: Some("my long title".to_string())
                })
            })
        );
        assert_eq!(
            parse_hash_command("#notes 删除", &tokens),
            Some(ParsedCommand::CategoryCommand {
                category: "notes".to_string(),
                action: Some(CategoryAction::DeleteTemplate { title: None })
            })
        );
        assert_eq!(
            parse_hash_command("#notes refactor", &tokens),
            Some(ParsedCommand::CategoryCommand {
                category: "notes".to_string(),
                action: Some(CategoryAction::Freeform {
                    token: "refactor".to_string()
                })
            })
        );
    }

    #[test]
    fn operation_words_are_not_reserved_in_category_position() {
        let tokens = CommandTokens::default();
        // "#删除" is a lookup of a category literally named 删除, not an op.
        assert_eq!(
            parse_hash_command("#删除", &tokens),
            Some(ParsedCommand::CategoryCommand {
                category: "删除".to_string(),
                action: None
            })
        );
    }

    #[test]
    fn console_actions_serialize_with_stable_tags() {
        let action = ConsoleAction::SetInputText {
            notice: Some("note".to_string()),
            text: "Title:".to_string(),
        };
        let value = serde_json::to_value(&action).expect("serialize");
        assert_eq!(value["type"], "set_input_text");
        assert_eq!(value["text"], "Title:");

        for action in [
            ConsoleAction::ShowMenu {
                heading: "h".to_string(),
                entries: vec!["e".to_string()],
            },
            ConsoleAction::InputRequest {
                message: "m".to_string(),
                prompt: "p".to_string(),
            },
            ConsoleAction::SetInputText {
                notice: None,
                text: String::new(),
            },
            ConsoleAction::Message {
                text: "t".to_string(),
            },
            ConsoleAction::TemplateContent {
                content: "c".to_string(),
            },
        ] {
            let raw = serde_json::to_string(&action).expect("serialize");
            let back: ConsoleAction = serde_json::from_str(&raw).expect("deserialize");
            assert_eq!(back, action);
        }
    }

    // ── Dispatch ────────────────────────────────────────────────────────

    #[test]
    fn non_hash_input_is_declined_while_idle() {
        let (workspace, mut console) = temp_console();
        assert_eq!(console.handle_input("how do I sort a vec?"), None);
        assert!(!console.wizard_active());
        cleanup(&workspace);
    }

    #[test]
    fn main_menu_lists_seeded_categories() {
        let (workspace, mut console) = temp_console();
        let action = console.handle_input("#").expect("handled");
        let text = text_of(&action);
        assert!(matches!(action, ConsoleAction::ShowMenu { .. }));
        assert!(text.contains("默认分类1 (3 templates)"));
        assert!(text.contains("默认分类2 (3 templates)"));
        cleanup(&workspace);
    }

    #[test]
    fn help_menu_renders_for_every_alias() {
        let (workspace, mut console) = temp_console();
        for input in ["#help", "#帮助", "#HELP"] {
            let action = console.handle_input(input).expect("handled");
            match action {
                ConsoleAction::ShowMenu { heading, .. } => assert_eq!(heading, "Help"),
                other => panic!("expected menu, got {other:?}"),
            }
        }
        cleanup(&workspace);
    }

    #[test]
    fn create_category_round_trip() {
        let (workspace, mut console) = temp_console();
        let action = console.handle_input("#new-category scratch").expect("handled");
        assert!(text_of(&action).contains("created"));
        assert!(console.store().category("scratch").is_some());

        // Asking again fails politely.
        let again = console.handle_input("#新建分类 scratch").expect("handled");
        assert!(text_of(&again).contains("may already exist"));
        cleanup(&workspace);
    }

    #[test]
    fn create_category_without_name_requests_input() {
        let (workspace, mut console) = temp_console();
        let action = console.handle_input("#new-category").expect("handled");
        assert!(matches!(action, ConsoleAction::InputRequest { .. }));
        cleanup(&workspace);
    }

    #[test]
    fn unknown_category_lists_names_and_mutates_nothing() {
        let (workspace, mut console) = temp_console();
        let action = console.handle_input("#Nonexistent").expect("handled");
        let text = text_of(&action);
        assert!(text.contains("does not exist"));
        assert!(text.contains("默认分类1"));
        assert!(text.contains("默认分类2"));
        assert!(!console.wizard_active());
        assert_eq!(console.store().list_categories().len(), 2);
        cleanup(&workspace);
    }

    #[test]
    fn category_menu_shows_templates_in_order() {
        let (workspace, mut console) = temp_console();
        let action = console.handle_input("#默认分类1").expect("handled");
        let text = text_of(&action);
        assert!(text.contains("📄 代码解释"));
        assert!(text.contains("📄 错误分析"));
        cleanup(&workspace);
    }

    #[test]
    fn use_template_injects_stored_content() {
        let (workspace, mut console) = temp_console();
        let action = console.handle_input("#默认分类1 代码解释").expect("handled");
        assert_eq!(
            action,
            ConsoleAction::TemplateContent {
                content: "请解释这段代码的功能和工作原理".to_string()
            }
        );
        cleanup(&workspace);
    }

    #[test]
    fn use_lookup_is_case_insensitive() {
        let (workspace, mut console) = temp_console();
        let action = console.handle_input("#默认分类2 代码REVIEW").expect("handled");
        assert_eq!(
            action,
            ConsoleAction::TemplateContent {
                content: "请review这段代码，指出潜在问题和改进建议".to_string()
            }
        );
        cleanup(&workspace);
    }

    #[test]
    fn unknown_operation_lists_operations_and_titles() {
        let (workspace, mut console) = temp_console();
        let action = console.handle_input("#默认分类1 explode").expect("handled");
        let text = text_of(&action);
        assert!(text.contains("Unknown operation \"explode\""));
        assert!(text.contains("代码解释"));
        cleanup(&workspace);
    }

    // ── Wizard flows ────────────────────────────────────────────────────

    #[test]
    fn create_wizard_walks_title_then_content_then_idle() {
        let (workspace, mut console) = temp_console();
        let begin = console.handle_input("#默认分类1 new").expect("handled");
        match &begin {
            ConsoleAction::SetInputText { notice, text } => {
                assert!(notice.as_deref().unwrap_or_default().contains("Step 1"));
                assert_eq!(text, "Title:");
            }
            other => panic!("expected input preset, got {other:?}"),
        }
        assert!(console.wizard_active());

        let step2 = console.handle_input("Hello").expect("consumed");
        match &step2 {
            ConsoleAction::SetInputText { notice, text } => {
                assert!(notice.as_deref().unwrap_or_default().contains("Step 2"));
                assert_eq!(text, "Content:");
            }
            other => panic!("expected input preset, got {other:?}"),
        }

        let done = console.handle_input("World").expect("consumed");
        assert!(text_of(&done).contains("🎉"));
        assert!(!console.wizard_active());
        assert_eq!(
            console.store().template("默认分类1", "Hello").as_deref(),
            Some("World")
        );
        cleanup(&workspace);
    }

    #[test]
    fn wizard_answers_unwrap_hash_and_labels() {
        let (workspace, mut console) = temp_console();
        console.handle_input("#默认分类1 add").expect("handled");
        console.handle_input("#Title: Greeting").expect("consumed");
        console.handle_input("#Content: say hi politely").expect("consumed");
        assert_eq!(
            console.store().template("默认分类1", "Greeting").as_deref(),
            Some("say hi politely")
        );
        cleanup(&workspace);
    }

    #[test]
    fn cancel_resets_every_step_without_persisting() {
        let (workspace, mut console) = temp_console();

        console.handle_input("#默认分类1 new").expect("handled");
        let cancelled = console.handle_input("取消").expect("consumed");
        assert!(text_of(&cancelled).contains("cancelled"));
        assert!(!console.wizard_active());

        console.handle_input("#默认分类1 new").expect("handled");
        console.handle_input("Drafty").expect("consumed");
        console.handle_input("CANCEL").expect("consumed");
        assert!(!console.wizard_active());
        assert!(console.store().template("默认分类1", "Drafty").is_none());

        console.handle_input("#默认分类1 delete").expect("handled");
        assert!(console.wizard_active());
        console.handle_input("cancel").expect("consumed");
        assert!(!console.wizard_active());
        assert_eq!(console.store().template_titles("默认分类1").len(), 3);
        cleanup(&workspace);
    }

    #[test]
    fn empty_title_reprompts_in_place() {
        let (workspace, mut console) = temp_console();
        console.handle_input("#默认分类1 new").expect("handled");
        let action = console.handle_input("   ").expect("consumed");
        assert!(text_of(&action).contains("cannot be empty"));
        assert_eq!(console.wizard_state().step_name(), "awaiting_title");

        // The bare label round-tripped back is an empty answer too.
        let echoed = console.handle_input("Title:").expect("consumed");
        assert!(text_of(&echoed).contains("cannot be empty"));
        assert_eq!(console.wizard_state().step_name(), "awaiting_title");
        cleanup(&workspace);
    }

    #[test]
    fn duplicate_title_keeps_wizard_on_title_step() {
        let (workspace, mut console) = temp_console();
        console.handle_input("#默认分类1 new").expect("handled");
        let action = console.handle_input("代码解释").expect("consumed");
        assert!(text_of(&action).contains("already exists"));
        assert_eq!(console.wizard_state().step_name(), "awaiting_title");
        assert_eq!(
            console.store().template("默认分类1", "代码解释").as_deref(),
            Some("请解释这段代码的功能和工作原理")
        );

        // A fresh title still advances normally afterwards.
        console.handle_input("代码解释2").expect("consumed");
        assert_eq!(console.wizard_state().step_name(), "awaiting_content");
        cleanup(&workspace);
    }

    #[test]
    fn titles_differing_only_by_case_are_distinct_entries() {
        let (workspace, mut console) = temp_console();
        // The duplicate check is exact-case, so this title is accepted even
        // though 代码review exists.
        console.handle_input("#默认分类2 new").expect("handled");
        console.handle_input("代码REVIEW").expect("consumed");
        console.handle_input("uppercase twin").expect("consumed");

        let titles = console.store().template_titles("默认分类2");
        assert!(titles.contains(&"代码review".to_string()));
        assert!(titles.contains(&"代码REVIEW".to_string()));

        // Case-insensitive use resolves to the first stored match.
        let action = console.handle_input("#默认分类2 代码review").expect("handled");
        assert_eq!(
            action,
            ConsoleAction::TemplateContent {
                content: "请review这段代码，指出潜在问题和改进建议".to_string()
            }
        );
        cleanup(&workspace);
    }

    #[test]
    fn empty_content_reprompts_then_save_resets() {
        let (workspace, mut console) = temp_console();
        console.handle_input("#默认分类1 new").expect("handled");
        console.handle_input("Outline").expect("consumed");
        let reprompt = console.handle_input("Content:").expect("consumed");
        assert!(text_of(&reprompt).contains("cannot be empty"));
        assert_eq!(console.wizard_state().step_name(), "awaiting_content");

        console.handle_input("please outline this module").expect("consumed");
        assert!(!console.wizard_active());
        assert_eq!(
            console.store().template("默认分类1", "Outline").as_deref(),
            Some("please outline this module")
        );
        cleanup(&workspace);
    }

    #[test]
    fn delete_selection_retries_until_match() {
        let (workspace, mut console) = temp_console();
        let menu = console.handle_input("#默认分类2 删除").expect("handled");
        assert!(matches!(menu, ConsoleAction::ShowMenu { .. }));
        assert_eq!(
            console.wizard_state().step_name(),
            "awaiting_delete_selection"
        );

        let miss = console.handle_input("nonsense").expect("consumed");
        assert!(text_of(&miss).contains("does not exist"));
        assert_eq!(
            console.wizard_state().step_name(),
            "awaiting_delete_selection"
        );

        // Selection matching ignores case.
        let hit = console.handle_input("代码REVIEW").expect("consumed");
        match hit {
            ConsoleAction::SetInputText { notice, text } => {
                assert!(notice.unwrap_or_default().contains("deleted"));
                assert!(text.is_empty());
            }
            other => panic!("expected cleared input, got {other:?}"),
        }
        assert!(!console.wizard_active());
        assert!(console.store().template("默认分类2", "代码review").is_none());
        cleanup(&workspace);
    }

    #[test]
    fn delete_selection_needs_existing_templates() {
        let (workspace, mut console) = temp_console();
        console.handle_input("#new-category scratch").expect("handled");
        let action = console.handle_input("#scratch delete").expect("handled");
        assert!(text_of(&action).contains("no templates yet"));
        assert!(!console.wizard_active());
        cleanup(&workspace);
    }

    #[test]
    fn direct_delete_by_name_ignores_case() {
        let (workspace, mut console) = temp_console();
        let action = console
            .handle_input("#默认分类2 delete 代码REVIEW")
            .expect("handled");
        assert!(matches!(action, ConsoleAction::SetInputText { .. }));
        assert!(console.store().template("默认分类2", "代码review").is_none());

        let miss = console
            .handle_input("#默认分类2 delete nothere")
            .expect("handled");
        assert!(text_of(&miss).contains("does not exist"));
        cleanup(&workspace);
    }

    #[test]
    fn direct_delete_accepts_multi_word_titles() {
        let (workspace, mut console) = temp_console();
        console.handle_input("#默认分类1 new").expect("handled");
        console.handle_input("daily standup notes").expect("consumed");
        console
            .handle_input("summarize yesterday and today")
            .expect("consumed");

        let action = console
            .handle_input("#默认分类1 delete Daily Standup Notes")
            .expect("handled");
        assert!(matches!(action, ConsoleAction::SetInputText { .. }));
        assert!(
            console
                .store()
                .template("默认分类1", "daily standup notes")
                .is_none()
        );
        cleanup(&workspace);
    }

    // The store re-reads its files on every call, so a title that matched the
    // listing can be gone by the content read; the fallback reports it.
    #[test]
    fn stale_title_matches_fall_back_to_a_listing() {
        let (workspace, mut console) = temp_console();
        let action = console.use_template("默认分类1", "ghost");
        let text = text_of(&action);
        assert!(text.contains("does not exist"));
        assert!(text.contains("#默认分类1 代码解释"));

        console.handle_input("#new-category scratch").expect("handled");
        let empty = console.use_template("scratch", "anything");
        assert!(text_of(&empty).contains("no templates yet"));
        cleanup(&workspace);
    }

    #[test]
    fn delete_category_cascades_and_reports_count() {
        let (workspace, mut console) = temp_console();
        let action = console
            .handle_input("#默认分类2 delete-category")
            .expect("handled");
        assert!(text_of(&action).contains("its 3 templates"));
        assert!(console.store().category("默认分类2").is_none());
        cleanup(&workspace);
    }

    #[test]
    fn delete_by_index_is_one_based_and_bounded() {
        let (workspace, mut console) = temp_console();
        let too_low = console.delete_template_at("默认分类1", 0);
        assert!(text_of(&too_low).contains("between 1-3"));
        let too_high = console.delete_template_at("默认分类1", 4);
        assert!(text_of(&too_high).contains("between 1-3"));

        let deleted = console.delete_template_at("默认分类1", 2);
        assert!(text_of(&deleted).contains("代码优化"));
        assert_eq!(
            console.store().template_titles("默认分类1"),
            vec!["代码解释", "错误分析"]
        );
        cleanup(&workspace);
    }

    #[test]
    fn reset_wizard_returns_routing_to_chat() {
        let (workspace, mut console) = temp_console();
        console.handle_input("#默认分类1 new").expect("handled");
        assert!(console.wizard_active());
        console.reset_wizard();
        assert!(!console.wizard_active());
        assert_eq!(console.handle_input("back to normal chat"), None);
        cleanup(&workspace);
    }

    #[test]
    fn hash_while_wizard_active_is_an_answer_not_a_command() {
        let (workspace, mut console) = temp_console();
        console.handle_input("#默认分类1 new").expect("handled");
        // "#" alone would normally open the main menu; inside a wizard it is
        // an empty answer.
        let action = console.handle_input("#").expect("consumed");
        assert!(text_of(&action).contains("cannot be empty"));
        assert!(console.wizard_active());
        cleanup(&workspace);
    }
}
