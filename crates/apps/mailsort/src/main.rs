//! mailsort - sync, categorize and clean up a Gmail mailbox from the terminal

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::Local;
use log::{error, info, warn};
use mail::{
    AppConfig, CategoryId, CredentialProvider, EmailId, GeminiClient, GmailAuth, GmailClient,
    GmailCredentials, HttpPageDriver, MailService, MailStore, OAuthCredential, SqliteMailStore,
    StoredCredential, Unsubscriber,
};

const USAGE: &str = "\
Usage: mailsort <command> [args]

Commands:
  init-config
  add-account <email> <access-token> [refresh-token]
  accounts
  refresh <account-id>
  emails <account-id> [page] [page-size]
  category-emails <account-id> <category-id> [page] [page-size]
  categories <account-id>
  add-category <account-id> <name> [description]
  delete-category <account-id> <category-id>
  summarize <email-id>
  categorize <email-id>
  archive <email-id>
  unsubscribe <email-id>...
  delete-account <account-id>";

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    if let Err(e) = config::init() {
        error!("Failed to initialize config directory: {}", e);
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() || args[0] == "help" || args[0] == "--help" {
        println!("{}", USAGE);
        return;
    }

    if let Err(e) = run(&args) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(args: &[String]) -> Result<()> {
    if args[0] == "init-config" {
        match AppConfig::write_default()? {
            Some(path) => println!("wrote {}", path.display()),
            None => println!("mailsort.json already exists"),
        }
        return Ok(());
    }

    let settings = AppConfig::load().context("Failed to load mailsort.json")?;
    let service = build_service(&settings)?;

    let command = args[0].as_str();
    let rest = &args[1..];

    match command {
        "add-account" => {
            let email = arg(rest, 0, "email")?;
            let mut credential = OAuthCredential::new(arg(rest, 1, "access-token")?);
            if let Some(refresh_token) = rest.get(2) {
                credential = credential.with_refresh_token(refresh_token.as_str());
            }
            let account = service.add_account(email, credential)?;
            println!("{}\t{}", account.id, account.email);
        }
        "accounts" => {
            for account in service.list_accounts()? {
                let checkpoint = account
                    .last_sync_checkpoint
                    .as_ref()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "never synced".to_string());
                println!("{}\t{}\t{}", account.id, account.email, checkpoint);
            }
        }
        "refresh" => {
            let account_id = id_arg(rest, 0, "account-id")?;
            let stats = match service.refresh(account_id) {
                Err(mail::MailError::CheckpointExpired) => {
                    warn!("Checkpoint expired, running a full sync");
                    service.refresh(account_id)?
                }
                other => other?,
            };
            println!(
                "{:?} sync: {} fetched, {} new, {} recategorized, {} uncategorized, {} errors ({} ms)",
                stats.mode,
                stats.messages_fetched,
                stats.inserted,
                stats.updated,
                stats.uncategorized,
                stats.errors,
                stats.duration_ms
            );
        }
        "emails" => {
            let account_id = id_arg(rest, 0, "account-id")?;
            let (page, size) = page_args(rest, 1)?;
            print_page(service.get_paginated_emails(account_id, page, size)?);
        }
        "category-emails" => {
            let account_id = id_arg(rest, 0, "account-id")?;
            let category_id = CategoryId(id_arg(rest, 1, "category-id")?);
            let (page, size) = page_args(rest, 2)?;
            print_page(service.get_paginated_emails_by_category(account_id, category_id, page, size)?);
        }
        "categories" => {
            let account_id = id_arg(rest, 0, "account-id")?;
            for category in service.list_categories(account_id)? {
                println!(
                    "{}\t{}\t{}",
                    category.id,
                    category.name,
                    category.description.unwrap_or_default()
                );
            }
        }
        "add-category" => {
            let account_id = id_arg(rest, 0, "account-id")?;
            let name = arg(rest, 1, "name")?;
            let description = rest.get(2).map(String::as_str);
            let category = service.create_category(account_id, name, description)?;
            println!("{}\t{}", category.id, category.name);
        }
        "delete-category" => {
            let account_id = id_arg(rest, 0, "account-id")?;
            let category_id = CategoryId(id_arg(rest, 1, "category-id")?);
            service.delete_category(account_id, category_id)?;
            info!("Deleted category {}", category_id);
        }
        "summarize" => {
            let email_id = EmailId(id_arg(rest, 0, "email-id")?);
            println!("{}", service.summarize_email(email_id)?);
        }
        "categorize" => {
            let email_id = EmailId(id_arg(rest, 0, "email-id")?);
            match service.categorize_email(email_id)? {
                Some(id) => println!("category {}", id),
                None => println!("no matching category"),
            }
        }
        "archive" => {
            let email_id = EmailId(id_arg(rest, 0, "email-id")?);
            service.archive_email(email_id)?;
            info!("Archived email {}", email_id);
        }
        "unsubscribe" => {
            if rest.is_empty() {
                bail!("missing <email-id>\n\n{}", USAGE);
            }
            let ids = rest
                .iter()
                .map(|raw| raw.parse().map(EmailId).with_context(|| format!("invalid email id '{}'", raw)))
                .collect::<Result<Vec<_>>>()?;
            let results = service.bulk_unsubscribe(&ids);
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        "delete-account" => {
            let account_id = id_arg(rest, 0, "account-id")?;
            service.delete_account(account_id)?;
        }
        other => bail!("unknown command '{}'\n\n{}", other, USAGE),
    }

    Ok(())
}

/// Wire the SQLite store, Gmail and (when configured) Gemini together
fn build_service(settings: &AppConfig) -> Result<MailService> {
    let db_path = settings.database_path()?;
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let store: Arc<dyn MailStore> = Arc::new(SqliteMailStore::new(&db_path)?);

    let gmail = Arc::new(
        GmailClient::new()
            .with_page_size(settings.sync.page_size)
            .with_fetch_retries(settings.sync.fetch_retries),
    );

    let credentials: Arc<dyn CredentialProvider> = match GmailCredentials::load() {
        Ok(creds) => Arc::new(GmailAuth::new(creds, store.clone())),
        Err(e) => {
            warn!("Gmail OAuth client not configured, tokens will not be refreshed: {:#}", e);
            Arc::new(StoredCredential)
        }
    };

    let mut service = MailService::new(store, gmail.clone(), credentials)
        .with_label_manager(gmail)
        .with_label_table(settings.label_table());

    if let Some(key) = &settings.gemini_api_key {
        let gemini = Arc::new(GeminiClient::new(key.as_str(), settings.gemini_model.as_str()));
        let unsubscriber = Unsubscriber::new(Arc::new(HttpPageDriver::new()), gemini.clone())
            .with_config(settings.unsubscribe.clone());
        service = service
            .with_language_model(gemini)
            .with_unsubscriber(unsubscriber);
    } else {
        info!("GEMINI_API_KEY not set; summaries, categorization and unsubscribe are disabled");
    }

    Ok(service)
}

fn arg<'a>(args: &'a [String], index: usize, name: &str) -> Result<&'a str> {
    match args.get(index) {
        Some(value) => Ok(value.as_str()),
        None => bail!("missing <{}>\n\n{}", name, USAGE),
    }
}

fn id_arg(args: &[String], index: usize, name: &str) -> Result<i64> {
    let raw = arg(args, index, name)?;
    raw.parse()
        .with_context(|| format!("invalid <{}> '{}'", name, raw))
}

/// Optional page and page size starting at `index`
fn page_args(args: &[String], index: usize) -> Result<(u32, u32)> {
    let parse = |i: usize, default: u32| -> Result<u32> {
        match args.get(i) {
            Some(raw) => raw.parse().with_context(|| format!("invalid number '{}'", raw)),
            None => Ok(default),
        }
    };
    Ok((parse(index, 1)?, parse(index + 1, 20)?))
}

fn print_page(page: mail::PaginatedResult<mail::Email>) {
    for email in &page.items {
        let category = email
            .category_id
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}\t{}\t{}\t{}\t{}",
            email.id,
            email.received_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
            category,
            email.sender,
            email.subject
        );
    }
    println!(
        "page {}/{} ({} emails)",
        page.page,
        page.total_pages.max(1),
        page.total_count
    );
}
