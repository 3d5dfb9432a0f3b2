//! CLI commands on top of the sync orchestrator
//!
//! Each command runs against a fresh set of stores, so it first loads what it
//! needs from the gateway. Store events are drained after the command: error
//! notices are dropped (the command's own error carries them), everything
//! else is logged or printed.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};
use tokio::sync::mpsc;

use crate::config::Config;
use crate::core::{ChatSession, Delivery, Message, MessageRole, SessionId, SortKey};
use crate::gateway::Gateway;
use crate::sync::{ConfirmDelete, EventSink, NoticeLevel, SyncError, SyncEvent, SyncOrchestrator};

/// Stores plus the receiving end of their event channel
pub struct CliContext {
    pub app: SyncOrchestrator,
    events: mpsc::UnboundedReceiver<SyncEvent>,
    config: Config,
    config_path: Option<PathBuf>,
}

impl CliContext {
    pub fn new(gateway: Arc<dyn Gateway>, config: Config, config_path: Option<PathBuf>) -> Self {
        let (sink, events) = EventSink::channel();
        let app = SyncOrchestrator::new(gateway, sink, &config);
        Self {
            app,
            events,
            config,
            config_path,
        }
    }

    /// Print pending notices and log the rest
    pub fn flush_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                SyncEvent::Notice(notice) => match notice.level {
                    NoticeLevel::Error => tracing::debug!("notice: {}", notice.message),
                    NoticeLevel::Warning => eprintln!("{} {}", "warning:".yellow(), notice.message),
                    NoticeLevel::Info => eprintln!("{}", notice.message.dimmed()),
                },
                other => tracing::debug!("event: {:?}", other),
            }
        }
    }

    fn save_config(&self) -> Result<()> {
        match &self.config_path {
            Some(path) => self.config.save_to(path),
            None => self.config.save(),
        }
    }
}

fn fail(e: SyncError) -> anyhow::Error {
    anyhow::anyhow!(e.user_message())
}

/// Human readable byte count
pub fn format_size(bytes: u64) -> String {
    const KB: f64 = 1_000.0;
    const MB: f64 = KB * 1_000.0;
    const GB: f64 = MB * 1_000.0;
    let b = bytes as f64;
    if b >= GB {
        format!("{:.1} GB", b / GB)
    } else if b >= MB {
        format!("{:.0} MB", b / MB)
    } else if b >= KB {
        format!("{:.0} KB", b / KB)
    } else {
        format!("{} B", bytes)
    }
}

/// Load catalog pages until `name` is held or the catalog runs out
async fn find_model(ctx: &CliContext, name: &str) -> Result<()> {
    if ctx.app.catalog().is_empty() {
        ctx.app.refresh_catalog().await.map_err(fail)?;
    }
    while ctx.app.catalog().get(name).is_none() {
        if ctx.app.on_scroll_near_end().await.map_err(fail)?.is_none() {
            anyhow::bail!("Model '{}' not found in the catalog", name);
        }
    }
    Ok(())
}

/// Catalog plus the preferred model from the config, if it is usable
async fn prepare_model(ctx: &CliContext) -> Result<()> {
    ctx.app.refresh_catalog().await.map_err(fail)?;
    if let Some(preferred) = ctx.config.catalog.preferred_model.as_deref() {
        let selected = match find_model(ctx, preferred).await {
            Ok(()) => ctx.app.select_model(preferred).await.map_err(fail),
            Err(e) => Err(e),
        };
        if let Err(e) = selected {
            tracing::warn!("Preferred model {} unavailable: {}", preferred, e);
        }
    }
    Ok(())
}

// ========== Chats ==========

/// List chats
pub async fn run_chats(ctx: &mut CliContext) -> Result<()> {
    ctx.app.directory().list().await.map_err(fail)?;

    #[derive(Tabled)]
    struct ChatRow {
        #[tabled(rename = "")]
        marker: String,
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "Title")]
        title: String,
        #[tabled(rename = "Model")]
        model: String,
        #[tabled(rename = "Modified")]
        modified: String,
    }

    let active = ctx.app.directory().active();
    let rows: Vec<ChatRow> = ctx
        .app
        .directory()
        .sessions()
        .into_iter()
        .map(|s| ChatRow {
            marker: if Some(&s.id) == active.as_ref() {
                "*".green().to_string()
            } else {
                String::new()
            },
            id: s.id.to_string(),
            title: s.title,
            model: s.model_used.unwrap_or_else(|| "-".to_string()),
            modified: s.last_modified.format("%Y-%m-%d %H:%M").to_string(),
        })
        .collect();

    if rows.is_empty() {
        println!("No chats yet.");
        println!();
        println!("Start one with:");
        println!("  lmdesk new [title]");
    } else {
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{}", table);
    }
    ctx.flush_events();
    Ok(())
}

/// Create a chat
pub async fn run_new(ctx: &mut CliContext, title: Option<&str>) -> Result<()> {
    let session = ctx.app.new_chat(title).await.map_err(fail)?;
    println!(
        "✅ Created chat {} ({})",
        session.title.green(),
        session.id.to_string().dimmed()
    );
    ctx.flush_events();
    Ok(())
}

/// Asks on stdin
struct PromptConfirm;

impl ConfirmDelete for PromptConfirm {
    fn confirm_delete(&self, session: &ChatSession) -> bool {
        print!("Delete chat '{}'? [y/N] ", session.title);
        if io::stdout().flush().is_err() {
            return false;
        }
        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(_) => matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"),
            Err(_) => false,
        }
    }
}

/// Delete a chat, asking first unless `yes`
pub async fn run_delete(ctx: &mut CliContext, id: &str, yes: bool) -> Result<()> {
    let id = SessionId::from(id);
    ctx.app.directory().list().await.map_err(fail)?;

    let result = if yes {
        ctx.app.delete_chat(&id, &|_: &ChatSession| true).await
    } else {
        ctx.app.delete_chat(&id, &PromptConfirm).await
    };
    match result {
        Ok(()) => println!("🗑  Deleted chat {}", id.to_string().dimmed()),
        Err(SyncError::NotConfirmed(_)) => println!("Cancelled."),
        Err(e) => return Err(fail(e)),
    }
    ctx.flush_events();
    Ok(())
}

fn print_message(message: &Message) {
    let label = match message.role {
        MessageRole::User => message.role.label().cyan().bold(),
        MessageRole::Assistant => message.role.label().green().bold(),
    };
    let body = match message.delivery {
        Delivery::Failed => message.content.red().to_string(),
        Delivery::Provisional => message.content.dimmed().to_string(),
        Delivery::Confirmed => message.content.clone(),
    };
    println!("{}> {}", label, body);
    if let Some(tokens) = message.tokens_used {
        println!("{}", format!("  ({} tokens)", tokens).dimmed());
    }
}

/// Print a chat's messages
pub async fn run_history(ctx: &mut CliContext, id: &str) -> Result<()> {
    let id = SessionId::from(id);
    ctx.app.directory().list().await.map_err(fail)?;
    ctx.app.switch_chat(&id).await.map_err(fail)?;

    let messages = ctx.app.thread().messages();
    if messages.is_empty() {
        println!("No messages in this chat.");
    }
    for message in &messages {
        print_message(message);
    }
    ctx.flush_events();
    Ok(())
}

/// Send one message and print the reply
pub async fn run_ask(
    ctx: &mut CliContext,
    chat: Option<&str>,
    text: &str,
    internet: bool,
) -> Result<()> {
    ctx.app.directory().list().await.map_err(fail)?;
    match chat {
        Some(id) => ctx.app.switch_chat(&SessionId::from(id)).await.map_err(fail)?,
        None => match ctx.app.directory().active() {
            Some(id) => ctx.app.switch_chat(&id).await.map_err(fail)?,
            None => {
                ctx.app.new_chat(None).await.map_err(fail)?;
            }
        },
    }
    ctx.app.settings().load().await.map_err(fail)?;
    prepare_model(ctx).await?;
    ctx.app.set_use_internet(internet);

    println!("{}> {}", MessageRole::User.label().cyan().bold(), text.trim());
    let result = ctx.app.send(text).await;
    if let Some(last) = ctx.app.thread().messages().last() {
        if last.role == MessageRole::Assistant {
            print_message(last);
        }
    }
    ctx.flush_events();
    result.map(|_| ()).map_err(fail)
}

// ========== Models ==========

/// Show the catalog
pub async fn run_models(ctx: &mut CliContext, pages: usize, sort: SortKey) -> Result<()> {
    prepare_model(ctx).await?;
    for _ in 1..pages.max(1) {
        if ctx.app.on_scroll_near_end().await.map_err(fail)?.is_none() {
            break;
        }
    }

    #[derive(Tabled)]
    struct ModelRow {
        #[tabled(rename = "")]
        marker: String,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Status")]
        status: String,
        #[tabled(rename = "Size")]
        size: String,
        #[tabled(rename = "Params")]
        parameters: String,
        #[tabled(rename = "Family")]
        family: String,
    }

    let catalog = ctx.app.catalog();
    let selected = catalog.selected();
    let rows: Vec<ModelRow> = catalog
        .sorted(sort)
        .into_iter()
        .map(|m| ModelRow {
            marker: if selected.as_deref() == Some(m.name.as_str()) {
                "*".green().to_string()
            } else {
                String::new()
            },
            status: if m.installed {
                "✓ installed".green().to_string()
            } else {
                "available".to_string()
            },
            size: m.size.map(format_size).unwrap_or_else(|| "-".to_string()),
            parameters: m.parameters.unwrap_or_else(|| "-".to_string()),
            family: m.family.unwrap_or_else(|| "-".to_string()),
            name: m.name,
        })
        .collect();

    if rows.is_empty() {
        println!("The catalog is empty.");
    } else {
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{}", table);
    }
    if !catalog.is_exhausted() {
        println!();
        println!(
            "{}",
            format!(
                "Showing {} models; use --pages to load more",
                catalog.len()
            )
            .dimmed()
        );
    }
    ctx.flush_events();
    Ok(())
}

/// Install a model
pub async fn run_install(ctx: &mut CliContext, name: &str) -> Result<()> {
    find_model(ctx, name).await?;
    println!("Installing {}...", name);
    ctx.app.install(name).await.map_err(fail)?;
    println!("✅ Installed {}", name.green());
    ctx.flush_events();
    Ok(())
}

/// Select a model and remember it for later commands
pub async fn run_select(ctx: &mut CliContext, name: &str) -> Result<()> {
    find_model(ctx, name).await?;
    ctx.app.select_model(name).await.map_err(fail)?;
    ctx.config.catalog.preferred_model = Some(name.to_string());
    ctx.save_config().context("Failed to save selection")?;
    println!("Selected {}", name.green());
    ctx.flush_events();
    Ok(())
}

/// Store the catalog credential
pub async fn run_token(ctx: &mut CliContext, value: &str) -> Result<()> {
    let loaded = ctx.app.set_credential(value).await.map_err(fail)?;
    println!("✅ Token saved; {} models available", loaded);
    ctx.flush_events();
    Ok(())
}

/// Reset the backend's dialog context
pub async fn run_clear_history(ctx: &mut CliContext) -> Result<()> {
    ctx.app.clear_history().await.map_err(fail)?;
    ctx.flush_events();
    Ok(())
}

/// Show which model the backend has loaded
pub async fn run_status(ctx: &mut CliContext) -> Result<()> {
    let status = ctx.app.model_status().await.map_err(fail)?;
    let state = if status.is_loaded() {
        status.status.green()
    } else {
        status.status.yellow()
    };
    println!("{}:  {}", "Status".bold(), state);
    println!(
        "{}:   {}",
        "Model".bold(),
        status.model_name.as_deref().unwrap_or("-")
    );
    if let Some(context) = status.context_size {
        println!("{}: {}", "Context".bold(), context);
    }
    ctx.flush_events();
    Ok(())
}

// ========== Settings ==========

fn print_settings(settings: &crate::core::GenerationSettings) {
    println!("{}:  {}", "max_tokens".bold(), settings.max_tokens);
    println!("{}: {}", "temperature".bold(), settings.temperature);
    println!("{}:       {}", "top_p".bold(), settings.top_p);
}

pub async fn run_settings_show(ctx: &mut CliContext) -> Result<()> {
    let settings = ctx.app.settings().load().await.map_err(fail)?;
    print_settings(&settings);
    ctx.flush_events();
    Ok(())
}

/// Edit and commit settings; values are clamped to their ranges
pub async fn run_settings_set(
    ctx: &mut CliContext,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    top_p: Option<f32>,
) -> Result<()> {
    let store = ctx.app.settings();
    store.load().await.map_err(fail)?;
    store.open();

    let edited = (|| {
        if let Some(v) = max_tokens {
            store.set_max_tokens(v)?;
        }
        if let Some(v) = temperature {
            store.set_temperature(v)?;
        }
        if let Some(v) = top_p {
            store.set_top_p(v)?;
        }
        Ok::<_, SyncError>(())
    })();
    if let Err(e) = edited {
        store.cancel();
        return Err(fail(e));
    }

    let stored = store.commit().await.map_err(fail)?;
    println!("✅ Settings saved");
    print_settings(&stored);
    ctx.flush_events();
    Ok(())
}
