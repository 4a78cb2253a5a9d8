use anyhow::{Result, anyhow};
use promptdeck_observe::warn_stderr;
use promptdeck_store::TemplateStore;
use serde_json::json;
use std::path::Path;

use crate::output::print_json;
use crate::{Cli, TemplatesCmd};

pub(crate) fn run_categories(cwd: &Path, json_mode: bool) -> Result<()> {
    let store = open_store(cwd)?;
    let categories = store.list_categories();
    if json_mode {
        print_json(&categories)?;
    } else if categories.is_empty() {
        println!("no categories yet");
    } else {
        for info in &categories {
            println!("{} ({} templates)", info.name, info.template_count);
        }
    }
    Ok(())
}

pub(crate) fn run_templates(cwd: &Path, cmd: TemplatesCmd, cli: &Cli) -> Result<()> {
    let store = open_store(cwd)?;
    match cmd {
        TemplatesCmd::List(args) => {
            let category = store
                .category(&args.category)
                .ok_or_else(|| missing_category(&store, &args.category))?;
            if cli.json {
                print_json(&json!({
                    "category": category.category_name,
                    "templates": category.templates.keys().collect::<Vec<_>>(),
                }))?;
            } else {
                for title in category.templates.keys() {
                    println!("{title}");
                }
            }
        }
        TemplatesCmd::Show(args) => {
            let (title, content) = lookup(&store, &args.category, &args.title)
                .ok_or_else(|| {
                    anyhow!(
                        "template '{}' not found in category '{}'",
                        args.title,
                        args.category
                    )
                })?;
            if cli.json {
                print_json(&json!({
                    "category": args.category,
                    "title": title,
                    "content": content,
                }))?;
            } else {
                println!("{content}");
            }
        }
        TemplatesCmd::Add(args) => {
            if store.category(&args.category).is_none() {
                if !args.create_category {
                    return Err(anyhow!(
                        "category '{}' does not exist (pass --create-category to add it)",
                        args.category
                    ));
                }
                if !store.create_category(&args.category) {
                    return Err(anyhow!("failed to create category '{}'", args.category));
                }
            }
            if !store.add_template(&args.category, &args.title, &args.content) {
                return Err(anyhow!("failed to save template '{}'", args.title));
            }
            if cli.json {
                print_json(&json!({
                    "category": args.category,
                    "title": args.title,
                    "saved": true,
                }))?;
            } else {
                println!("saved '{}' in '{}'", args.title, args.category);
            }
        }
        TemplatesCmd::Delete(args) => {
            if store.category(&args.category).is_none() {
                return Err(missing_category(&store, &args.category));
            }
            let titles = store.template_titles(&args.category);
            let title = match (&args.title, args.index) {
                (Some(requested), None) => titles
                    .iter()
                    .find(|t| t.to_lowercase() == requested.to_lowercase())
                    .cloned()
                    .ok_or_else(|| {
                        anyhow!(
                            "template '{}' not found in category '{}'",
                            requested,
                            args.category
                        )
                    })?,
                (None, Some(index)) => {
                    if index < 1 || index > titles.len() {
                        return Err(anyhow!(
                            "index out of range; pick a value between 1-{}",
                            titles.len()
                        ));
                    }
                    titles[index - 1].clone()
                }
                (Some(_), Some(_)) => return Err(anyhow!("pass a title or --index, not both")),
                (None, None) => return Err(anyhow!("pass a template title or --index")),
            };
            if !store.delete_template(&args.category, &title) {
                return Err(anyhow!("failed to delete template '{title}'"));
            }
            if cli.json {
                print_json(&json!({
                    "category": args.category,
                    "title": title,
                    "deleted": true,
                }))?;
            } else {
                println!("deleted '{}' from '{}'", title, args.category);
            }
        }
    }
    Ok(())
}

fn open_store(cwd: &Path) -> Result<TemplateStore> {
    let store = TemplateStore::new(cwd)?;
    if let Err(err) = store.ensure_initialized() {
        warn_stderr(&format!("default template seeding failed: {err}"));
    }
    Ok(store)
}

fn missing_category(store: &TemplateStore, name: &str) -> anyhow::Error {
    let known = store.category_names();
    if known.is_empty() {
        anyhow!("category '{name}' does not exist (no categories yet)")
    } else {
        anyhow!(
            "category '{name}' does not exist; available: {}",
            known.join(", ")
        )
    }
}

fn lookup(store: &TemplateStore, category: &str, requested: &str) -> Option<(String, String)> {
    if let Some(content) = store.template(category, requested) {
        return Some((requested.to_string(), content));
    }
    let title = store
        .template_titles(category)
        .into_iter()
        .find(|t| t.to_lowercase() == requested.to_lowercase())?;
    let content = store.template(category, &title)?;
    Some((title, content))
}
