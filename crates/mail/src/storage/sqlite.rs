//! SQLite-based mail storage with zstd-compressed email bodies

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};
use rusqlite_migration::{M, Migrations};

use super::{AccountStore, CategoryStore, EmailStore};
use crate::error::{DuplicateCategoryError, NotFoundError};
use crate::models::{
    Account, Category, CategoryId, Checkpoint, Email, EmailId, MessageId, OAuthCredential,
    PageRequest,
};

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            CREATE TABLE accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL UNIQUE,
                display_name TEXT,
                access_token TEXT NOT NULL,
                refresh_token TEXT,
                token_expires_at INTEGER,
                last_sync_checkpoint TEXT,
                added_at TEXT NOT NULL
            );

            CREATE TABLE categories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                description TEXT,
                created_at TEXT NOT NULL,
                UNIQUE (account_id, name),
                FOREIGN KEY (account_id) REFERENCES accounts(id) ON DELETE CASCADE
            );

            -- received_at is unix milliseconds so ordering is numeric
            CREATE TABLE emails (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL,
                category_id INTEGER,
                remote_id TEXT NOT NULL,
                sender TEXT NOT NULL,
                subject TEXT NOT NULL,
                body BLOB,  -- zstd compressed
                ai_summary TEXT,
                received_at INTEGER NOT NULL,
                is_archived INTEGER NOT NULL DEFAULT 0,
                unsubscribe_link TEXT,
                UNIQUE (account_id, remote_id),
                FOREIGN KEY (account_id) REFERENCES accounts(id) ON DELETE CASCADE,
                FOREIGN KEY (category_id) REFERENCES categories(id) ON DELETE SET NULL
            );

            CREATE INDEX idx_emails_account_received
                ON emails(account_id, received_at DESC);
            CREATE INDEX idx_emails_category_received
                ON emails(category_id, received_at DESC);
            "#,
        ),
    ])
}

const EMAIL_COLUMNS: &str = "id, account_id, category_id, remote_id, sender, subject, body,
     ai_summary, received_at, is_archived, unsubscribe_link";

const ACCOUNT_COLUMNS: &str = "id, email, display_name, access_token, refresh_token,
     token_expires_at, last_sync_checkpoint, added_at";

const CATEGORY_COLUMNS: &str = "id, account_id, name, description, created_at";

/// Raw email row before body decompression
struct EmailRow {
    id: i64,
    account_id: i64,
    category_id: Option<i64>,
    remote_id: String,
    sender: String,
    subject: String,
    body: Option<Vec<u8>>,
    ai_summary: Option<String>,
    received_at: i64,
    is_archived: bool,
    unsubscribe_link: Option<String>,
}

impl EmailRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            account_id: row.get(1)?,
            category_id: row.get(2)?,
            remote_id: row.get(3)?,
            sender: row.get(4)?,
            subject: row.get(5)?,
            body: row.get(6)?,
            ai_summary: row.get(7)?,
            received_at: row.get(8)?,
            is_archived: row.get(9)?,
            unsubscribe_link: row.get(10)?,
        })
    }

    fn into_email(self) -> Result<Email> {
        let body = match self.body {
            Some(compressed) => {
                let bytes =
                    zstd::decode_all(compressed.as_slice()).context("Failed to decompress body")?;
                String::from_utf8(bytes).context("Email body is not valid UTF-8")?
            }
            None => String::new(),
        };

        Ok(Email {
            id: EmailId(self.id),
            account_id: self.account_id,
            category_id: self.category_id.map(CategoryId),
            remote_id: MessageId::new(self.remote_id),
            sender: self.sender,
            subject: self.subject,
            body,
            ai_summary: self.ai_summary,
            received_at: from_millis(self.received_at),
            is_archived: self.is_archived,
            unsubscribe_link: self.unsubscribe_link,
        })
    }
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(Utc::now)
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    let checkpoint: Option<String> = row.get(6)?;
    let added_at: String = row.get(7)?;
    Ok(Account {
        id: row.get(0)?,
        email: row.get(1)?,
        display_name: row.get(2)?,
        credential: OAuthCredential {
            access_token: row.get(3)?,
            refresh_token: row.get(4)?,
            expires_at: row.get(5)?,
        },
        last_sync_checkpoint: checkpoint.map(Checkpoint),
        added_at: parse_timestamp(&added_at),
    })
}

fn category_from_row(row: &Row<'_>) -> rusqlite::Result<Category> {
    let created_at: String = row.get(4)?;
    Ok(Category {
        id: CategoryId(row.get(0)?),
        account_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        created_at: parse_timestamp(&created_at),
    })
}

fn compress_body(body: &str) -> Result<Option<Vec<u8>>> {
    if body.is_empty() {
        return Ok(None);
    }
    // zstd level 3 = good balance of speed vs compression
    let compressed = zstd::encode_all(body.as_bytes(), 3).context("Failed to compress body")?;
    Ok(Some(compressed))
}

/// SQLite-based mail storage
///
/// Uniqueness of (account_id, name) for categories and (account_id,
/// remote_id) for emails is enforced by the schema, so concurrent writers
/// cannot produce duplicates.
pub struct SqliteMailStore {
    conn: Mutex<Connection>,
}

impl SqliteMailStore {
    /// Open (or create) a database file and bring its schema up to date
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;
        Self::from_connection(conn)
    }

    /// Open a private in-memory database
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        // WAL lets readers run during writes; foreign_keys is required for
        // the cascade and set-null rules in the schema.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            "#,
        )?;

        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn update_account_column(
        &self,
        id: i64,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(sql, params)?;
        if changed == 0 {
            return Err(NotFoundError(format!("account {}", id)).into());
        }
        Ok(())
    }

    fn update_email_column(&self, id: EmailId, sql: &str, params: impl rusqlite::Params) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(sql, params)?;
        if changed == 0 {
            return Err(NotFoundError(format!("email {}", id)).into());
        }
        Ok(())
    }

    fn query_page(
        &self,
        where_clause: &str,
        params: &[&dyn rusqlite::ToSql],
        page: PageRequest,
    ) -> Result<(Vec<Email>, usize)> {
        let conn = self.conn.lock().unwrap();

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM emails WHERE {}", where_clause),
            params,
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM emails WHERE {}
             ORDER BY received_at DESC, id DESC
             LIMIT {} OFFSET {}",
            EMAIL_COLUMNS,
            where_clause,
            page.limit(),
            page.offset()
        ))?;

        let rows = stmt
            .query_map(params, EmailRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let emails = rows
            .into_iter()
            .map(EmailRow::into_email)
            .collect::<Result<Vec<_>>>()?;

        Ok((emails, total as usize))
    }
}

impl AccountStore for SqliteMailStore {
    fn create_account(&self, mut account: Account) -> Result<Account> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO accounts
             (email, display_name, access_token, refresh_token, token_expires_at,
              last_sync_checkpoint, added_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                account.email,
                account.display_name,
                account.credential.access_token,
                account.credential.refresh_token,
                account.credential.expires_at,
                account.last_sync_checkpoint.as_ref().map(Checkpoint::as_str),
                account.added_at.to_rfc3339(),
            ],
        )
        .with_context(|| format!("Failed to create account {}", account.email))?;
        account.id = conn.last_insert_rowid();
        Ok(account)
    }

    fn get_account(&self, id: i64) -> Result<Option<Account>> {
        let conn = self.conn.lock().unwrap();
        let account = conn
            .query_row(
                &format!("SELECT {} FROM accounts WHERE id = ?", ACCOUNT_COLUMNS),
                [id],
                account_from_row,
            )
            .optional()?;
        Ok(account)
    }

    fn get_account_by_email(&self, email: &str) -> Result<Option<Account>> {
        let conn = self.conn.lock().unwrap();
        let account = conn
            .query_row(
                &format!("SELECT {} FROM accounts WHERE email = ?", ACCOUNT_COLUMNS),
                [email],
                account_from_row,
            )
            .optional()?;
        Ok(account)
    }

    fn list_accounts(&self) -> Result<Vec<Account>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM accounts ORDER BY id",
            ACCOUNT_COLUMNS
        ))?;
        let accounts = stmt
            .query_map([], account_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(accounts)
    }

    fn update_credential(&self, id: i64, credential: &OAuthCredential) -> Result<()> {
        self.update_account_column(
            id,
            "UPDATE accounts
             SET access_token = ?, refresh_token = ?, token_expires_at = ?
             WHERE id = ?",
            params![
                credential.access_token,
                credential.refresh_token,
                credential.expires_at,
                id
            ],
        )
    }

    fn update_checkpoint(&self, id: i64, checkpoint: &Checkpoint) -> Result<()> {
        self.update_account_column(
            id,
            "UPDATE accounts SET last_sync_checkpoint = ? WHERE id = ?",
            params![checkpoint.as_str(), id],
        )
    }

    fn clear_checkpoint(&self, id: i64) -> Result<()> {
        self.update_account_column(
            id,
            "UPDATE accounts SET last_sync_checkpoint = NULL WHERE id = ?",
            params![id],
        )
    }

    fn delete_account(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        // Categories and emails go with it via ON DELETE CASCADE
        conn.execute("DELETE FROM accounts WHERE id = ?", [id])?;
        Ok(())
    }
}

impl CategoryStore for SqliteMailStore {
    fn find_category_by_name(&self, account_id: i64, name: &str) -> Result<Option<Category>> {
        let conn = self.conn.lock().unwrap();
        let category = conn
            .query_row(
                &format!(
                    "SELECT {} FROM categories WHERE account_id = ? AND name = ?",
                    CATEGORY_COLUMNS
                ),
                params![account_id, name],
                category_from_row,
            )
            .optional()?;
        Ok(category)
    }

    fn get_category(&self, id: CategoryId) -> Result<Option<Category>> {
        let conn = self.conn.lock().unwrap();
        let category = conn
            .query_row(
                &format!("SELECT {} FROM categories WHERE id = ?", CATEGORY_COLUMNS),
                [id.get()],
                category_from_row,
            )
            .optional()?;
        Ok(category)
    }

    fn list_categories(&self, account_id: i64) -> Result<Vec<Category>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM categories WHERE account_id = ? ORDER BY name",
            CATEGORY_COLUMNS
        ))?;
        let categories = stmt
            .query_map([account_id], category_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(categories)
    }

    fn create_category(&self, mut category: Category) -> Result<Category> {
        let conn = self.conn.lock().unwrap();
        let result = conn.execute(
            "INSERT INTO categories (account_id, name, description, created_at)
             VALUES (?, ?, ?, ?)",
            params![
                category.account_id,
                category.name,
                category.description,
                category.created_at.to_rfc3339(),
            ],
        );

        match result {
            Ok(_) => {
                category.id = CategoryId(conn.last_insert_rowid());
                Ok(category)
            }
            Err(e) if e.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) => {
                Err(DuplicateCategoryError {
                    account_id: category.account_id,
                    name: category.name,
                }
                .into())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn delete_category(&self, id: CategoryId) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        // Emails referencing it are uncategorized via ON DELETE SET NULL
        conn.execute("DELETE FROM categories WHERE id = ?", [id.get()])?;
        Ok(())
    }
}

impl EmailStore for SqliteMailStore {
    fn exists_by_remote_id(&self, account_id: i64, remote_id: &MessageId) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM emails WHERE account_id = ? AND remote_id = ?)",
            params![account_id, remote_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn bulk_insert(&self, emails: Vec<Email>) -> Result<usize> {
        // Compress outside the lock
        let rows = emails
            .into_iter()
            .map(|email| compress_body(&email.body).map(|body| (email, body)))
            .collect::<Result<Vec<_>>>()?;

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let mut inserted = 0;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO emails
                 (account_id, category_id, remote_id, sender, subject, body,
                  ai_summary, received_at, is_archived, unsubscribe_link)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(account_id, remote_id) DO NOTHING",
            )?;

            for (email, body) in &rows {
                inserted += stmt.execute(params![
                    email.account_id,
                    email.category_id.map(|c| c.get()),
                    email.remote_id.as_str(),
                    email.sender,
                    email.subject,
                    body,
                    email.ai_summary,
                    email.received_at.timestamp_millis(),
                    email.is_archived,
                    email.unsubscribe_link,
                ])?;
            }
        }

        tx.commit()?;
        Ok(inserted)
    }

    fn update_category_by_remote_id(
        &self,
        account_id: i64,
        remote_id: &MessageId,
        category_id: Option<CategoryId>,
    ) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE emails SET category_id = ? WHERE account_id = ? AND remote_id = ?",
            params![category_id.map(|c| c.get()), account_id, remote_id.as_str()],
        )?;
        Ok(changed > 0)
    }

    fn delete_all_for_account(&self, account_id: i64) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute("DELETE FROM emails WHERE account_id = ?", [account_id])?;
        Ok(deleted)
    }

    fn get_email(&self, id: EmailId) -> Result<Option<Email>> {
        let row = {
            let conn = self.conn.lock().unwrap();
            conn.query_row(
                &format!("SELECT {} FROM emails WHERE id = ?", EMAIL_COLUMNS),
                [id.0],
                EmailRow::from_row,
            )
            .optional()?
        };
        row.map(EmailRow::into_email).transpose()
    }

    fn get_page(&self, account_id: i64, page: PageRequest) -> Result<(Vec<Email>, usize)> {
        self.query_page("account_id = ?", &[&account_id], page)
    }

    fn get_page_by_category(
        &self,
        account_id: i64,
        category_id: CategoryId,
        page: PageRequest,
    ) -> Result<(Vec<Email>, usize)> {
        let category = category_id.get();
        self.query_page(
            "account_id = ? AND category_id = ?",
            &[&account_id, &category],
            page,
        )
    }

    fn update_summary(&self, id: EmailId, summary: &str) -> Result<()> {
        self.update_email_column(
            id,
            "UPDATE emails SET ai_summary = ? WHERE id = ?",
            params![summary, id.0],
        )
    }

    fn set_archived(&self, id: EmailId, archived: bool) -> Result<()> {
        self.update_email_column(
            id,
            "UPDATE emails SET is_archived = ? WHERE id = ?",
            params![archived, id.0],
        )
    }
}
