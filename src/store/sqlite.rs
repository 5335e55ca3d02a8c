//! `sqlite` backend — durable contact table.
//!
//! ```text
//! {data_dir}/
//! └── contacts.db      (table `contacts`, schema tracked by PRAGMA user_version)
//! ```
//!
//! A fresh connection is opened per call; `busy_timeout` bounds how long a
//! call waits on a concurrent writer. Merges run inside an `IMMEDIATE`
//! transaction so demote + relink commit together.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use tracing::debug;

use crate::contact::{Contact, ContactId, LinkPrecedence};
use crate::error::StoreError;

use super::ContactStore;

const SCHEMA_VERSION: i64 = 1;

const COLUMNS: &str =
    "id, email, phone_number, linked_id, link_precedence, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct SqliteContactStore {
    db_path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteContactStore {
    /// Open (creating if needed) the database at `db_path`.
    pub fn open(db_path: &Path, busy_timeout: Duration) -> Result<Self, StoreError> {
        let store = Self {
            db_path: db_path.to_path_buf(),
            busy_timeout,
        };
        store.init_db()?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn open_conn(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.db_path).map_err(|e| {
            StoreError::Backend(format!("open {}: {e}", self.db_path.display()))
        })?;
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }

    fn init_db(&self) -> Result<(), StoreError> {
        let conn = self.open_conn()?;
        let version: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;

        if version == 0 {
            conn.execute_batch(
                "
                CREATE TABLE IF NOT EXISTS contacts (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    email TEXT,
                    phone_number TEXT,
                    linked_id INTEGER REFERENCES contacts(id),
                    link_precedence TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_contacts_email ON contacts(email);
                CREATE INDEX IF NOT EXISTS idx_contacts_phone ON contacts(phone_number);
                CREATE INDEX IF NOT EXISTS idx_contacts_linked ON contacts(linked_id);

                PRAGMA user_version = 1;
                ",
            )?;
            debug!(db = %self.db_path.display(), "contacts schema created");
            return Ok(());
        }

        if version != SCHEMA_VERSION {
            return Err(StoreError::Backend(format!(
                "unsupported contacts schema version {version}"
            )));
        }
        Ok(())
    }

    fn query_contacts(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Contact>, StoreError> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, contact_from_row)?;
        let mut contacts = Vec::new();
        for row in rows {
            contacts.push(row?);
        }
        Ok(contacts)
    }

    fn insert(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
        linked_id: Option<ContactId>,
        precedence: LinkPrecedence,
    ) -> Result<Contact, StoreError> {
        let conn = self.open_conn()?;
        let now = Utc::now();
        let ts = format_ts(&now);
        conn.execute(
            "INSERT INTO contacts (email, phone_number, linked_id, link_precedence, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![email, phone, linked_id, precedence.as_str(), ts],
        )?;
        Ok(Contact {
            id: conn.last_insert_rowid(),
            email: email.map(str::to_string),
            phone_number: phone.map(str::to_string),
            linked_id,
            link_precedence: precedence,
            // Round-trip through the stored precision so callers see what a re-read would.
            created_at: parse_ts(&ts).unwrap_or(now),
            updated_at: parse_ts(&ts).unwrap_or(now),
        })
    }
}

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|t| t.with_timezone(&Utc))
}

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

fn contact_from_row(row: &Row<'_>) -> rusqlite::Result<Contact> {
    let precedence: String = row.get(4)?;
    let created_at: String = row.get(5)?;
    let updated_at: String = row.get(6)?;
    Ok(Contact {
        id: row.get(0)?,
        email: row.get(1)?,
        phone_number: row.get(2)?,
        linked_id: row.get(3)?,
        link_precedence: precedence.parse().map_err(|e| conversion_error(4, e))?,
        created_at: parse_ts(&created_at).map_err(|e| conversion_error(5, e.to_string()))?,
        updated_at: parse_ts(&updated_at).map_err(|e| conversion_error(6, e.to_string()))?,
    })
}

fn demote(conn: &Connection, contact_id: ContactId, new_primary_id: ContactId) -> Result<(), StoreError> {
    let changed = conn.execute(
        "UPDATE contacts SET link_precedence = ?1, linked_id = ?2, updated_at = ?3 WHERE id = ?4",
        params![
            LinkPrecedence::Secondary.as_str(),
            new_primary_id,
            format_ts(&Utc::now()),
            contact_id
        ],
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound(contact_id));
    }
    Ok(())
}

fn relink(conn: &Connection, old_primary_id: ContactId, new_primary_id: ContactId) -> Result<usize, StoreError> {
    let moved = conn.execute(
        "UPDATE contacts SET linked_id = ?1, updated_at = ?2 WHERE linked_id = ?3",
        params![new_primary_id, format_ts(&Utc::now()), old_primary_id],
    )?;
    Ok(moved)
}

impl ContactStore for SqliteContactStore {
    fn backend(&self) -> &str {
        "sqlite"
    }

    fn find_exact_matches(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Vec<Contact>, StoreError> {
        let conn = self.open_conn()?;
        // NULL parameters never compare equal, so an absent key matches nothing.
        let sql = format!(
            "SELECT {COLUMNS} FROM contacts
             WHERE email = ?1 OR phone_number = ?2
             ORDER BY created_at ASC, id ASC"
        );
        Self::query_contacts(&conn, &sql, params![email, phone])
    }

    fn find_by_id(&self, id: ContactId) -> Result<Option<Contact>, StoreError> {
        let conn = self.open_conn()?;
        let sql = format!("SELECT {COLUMNS} FROM contacts WHERE id = ?1");
        Ok(conn
            .query_row(&sql, params![id], contact_from_row)
            .optional()?)
    }

    fn find_secondaries_of(&self, primary_id: ContactId) -> Result<Vec<Contact>, StoreError> {
        let conn = self.open_conn()?;
        let sql = format!(
            "SELECT {COLUMNS} FROM contacts WHERE linked_id = ?1 ORDER BY created_at ASC, id ASC"
        );
        Self::query_contacts(&conn, &sql, params![primary_id])
    }

    fn find_group(&self, primary_id: ContactId) -> Result<Vec<Contact>, StoreError> {
        let conn = self.open_conn()?;
        let sql = format!("SELECT {COLUMNS} FROM contacts WHERE id = ?1 OR linked_id = ?1");
        Self::query_contacts(&conn, &sql, params![primary_id])
    }

    fn create_primary(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Contact, StoreError> {
        self.insert(email, phone, None, LinkPrecedence::Primary)
    }

    fn create_secondary(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
        primary_id: ContactId,
    ) -> Result<Contact, StoreError> {
        self.insert(email, phone, Some(primary_id), LinkPrecedence::Secondary)
    }

    fn demote_to_secondary(
        &self,
        contact_id: ContactId,
        new_primary_id: ContactId,
    ) -> Result<(), StoreError> {
        let conn = self.open_conn()?;
        demote(&conn, contact_id, new_primary_id)
    }

    fn relink_children(
        &self,
        old_primary_id: ContactId,
        new_primary_id: ContactId,
    ) -> Result<usize, StoreError> {
        let conn = self.open_conn()?;
        relink(&conn, old_primary_id, new_primary_id)
    }

    fn merge_groups(
        &self,
        survivor_id: ContactId,
        absorbed: &[ContactId],
    ) -> Result<(), StoreError> {
        let mut conn = self.open_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        for &id in absorbed {
            demote(&tx, id, survivor_id)?;
            let moved = relink(&tx, id, survivor_id)?;
            debug!(absorbed = id, survivor = survivor_id, moved, "group folded");
        }
        // Dropping `tx` on an early return above rolls the whole merge back.
        tx.commit()?;
        Ok(())
    }

    fn count(&self) -> Result<usize, StoreError> {
        let conn = self.open_conn()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM contacts", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_tmp() -> (TempDir, SqliteContactStore) {
        let tmp = TempDir::new().unwrap();
        let store =
            SqliteContactStore::open(&tmp.path().join("contacts.db"), Duration::from_secs(1))
                .unwrap();
        (tmp, store)
    }

    #[test]
    fn open_creates_db_file() {
        let (tmp, _store) = open_tmp();
        assert!(tmp.path().join("contacts.db").exists());
    }

    #[test]
    fn reopen_keeps_rows() {
        let (tmp, store) = open_tmp();
        store.create_primary(Some("a@x.com"), Some("1")).unwrap();
        let again =
            SqliteContactStore::open(&tmp.path().join("contacts.db"), Duration::from_secs(1))
                .unwrap();
        assert_eq!(again.count().unwrap(), 1);
    }

    #[test]
    fn created_row_reads_back_identically() {
        let (_tmp, store) = open_tmp();
        let c = store.create_primary(Some("a@x.com"), None).unwrap();
        let fetched = store.find_by_id(c.id).unwrap().unwrap();
        assert_eq!(fetched, c);
        assert!(fetched.is_primary());
        assert_eq!(fetched.phone_number, None);
    }

    #[test]
    fn exact_matches_ignore_null_keys() {
        let (_tmp, store) = open_tmp();
        let a = store.create_primary(Some("a@x.com"), None).unwrap();
        let b = store.create_primary(None, Some("2")).unwrap();

        let hits = store.find_exact_matches(Some("a@x.com"), None).unwrap();
        assert_eq!(hits.iter().map(|c| c.id).collect::<Vec<_>>(), vec![a.id]);

        let hits = store.find_exact_matches(Some("a@x.com"), Some("2")).unwrap();
        assert_eq!(hits.iter().map(|c| c.id).collect::<Vec<_>>(), vec![a.id, b.id]);
    }

    #[test]
    fn merge_is_atomic_on_missing_contact() {
        let (_tmp, store) = open_tmp();
        let p1 = store.create_primary(Some("a"), Some("1")).unwrap();
        let p2 = store.create_primary(Some("b"), Some("2")).unwrap();

        let err = store.merge_groups(p1.id, &[p2.id, 4242]).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(4242)));
        // p2's demotion was rolled back with the rest of the transaction.
        assert!(store.find_by_id(p2.id).unwrap().unwrap().is_primary());
    }

    #[test]
    fn merge_relinks_children() {
        let (_tmp, store) = open_tmp();
        let p1 = store.create_primary(Some("a"), Some("1")).unwrap();
        let p2 = store.create_primary(Some("b"), Some("2")).unwrap();
        let s = store.create_secondary(Some("c"), Some("2"), p2.id).unwrap();

        store.merge_groups(p1.id, &[p2.id]).unwrap();

        let group = store.find_group(p1.id).unwrap();
        assert_eq!(group.len(), 3);
        assert_eq!(store.find_by_id(s.id).unwrap().unwrap().linked_id, Some(p1.id));
        let secs: Vec<_> = store
            .find_secondaries_of(p1.id)
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(secs, vec![p2.id, s.id]);
    }

    #[test]
    fn standalone_demote_and_relink() {
        let (_tmp, store) = open_tmp();
        let p1 = store.create_primary(Some("a"), None).unwrap();
        let p2 = store.create_primary(Some("b"), None).unwrap();
        store.create_secondary(Some("b"), Some("3"), p2.id).unwrap();

        assert_eq!(store.relink_children(p2.id, p1.id).unwrap(), 1);
        store.demote_to_secondary(p2.id, p1.id).unwrap();
        assert_eq!(store.find_secondaries_of(p1.id).unwrap().len(), 2);
        assert!(matches!(
            store.demote_to_secondary(999, p1.id),
            Err(StoreError::NotFound(999))
        ));
    }
}
