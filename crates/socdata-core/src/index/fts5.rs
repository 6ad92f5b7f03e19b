//! FTS5 virtual table management.
//!
//! The search table is an external-content FTS5 table over `datasets`, kept
//! in sync by triggers. Rows written while full text was disabled are picked
//! up by the `rebuild` command the first time the table is created.

use rusqlite::Connection;
use tracing::debug;

use crate::error::Result;

/// Name of the FTS5 virtual table.
pub(crate) const SEARCH_TABLE: &str = "dataset_search";

/// Tokenizer applied to indexed text.
const TOKENIZER: &str = "unicode61 remove_diacritics 1";

/// `datasets` columns mirrored into the search table.
const INDEXED_COLUMNS: [&str; 6] = [
    "id",
    "source",
    "title",
    "variable_names",
    "variable_labels",
    "value_labels",
];

/// Whether this SQLite build ships the FTS5 module, probed with a throwaway
/// temp table. The bundled build does; system libraries may not.
pub(crate) fn fts5_available(conn: &Connection) -> bool {
    conn.execute_batch(
        "CREATE VIRTUAL TABLE temp.fts5_probe USING fts5(probe);
         DROP TABLE temp.fts5_probe;",
    )
    .is_ok()
}

/// Create the search table and its sync triggers if missing.
pub(crate) fn ensure_setup(conn: &Connection) -> Result<()> {
    if table_exists(conn)? {
        create_triggers(conn)?;
        return Ok(());
    }

    create_table(conn)?;
    create_triggers(conn)?;
    // Index any rows written while full text was unavailable.
    conn.execute(
        &format!("INSERT INTO {SEARCH_TABLE}({SEARCH_TABLE}) VALUES('rebuild')"),
        [],
    )?;
    debug!("created FTS5 search table");
    Ok(())
}

pub(crate) fn table_exists(conn: &Connection) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
        [SEARCH_TABLE],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn create_table(conn: &Connection) -> Result<()> {
    conn.execute(
        &format!(
            "CREATE VIRTUAL TABLE {SEARCH_TABLE} USING fts5(
                {columns},
                content='datasets',
                content_rowid='rowid',
                tokenize='{TOKENIZER}'
            )",
            columns = INDEXED_COLUMNS.join(", "),
        ),
        [],
    )?;
    Ok(())
}

fn create_triggers(conn: &Connection) -> Result<()> {
    let columns = INDEXED_COLUMNS.join(", ");
    let new_values = INDEXED_COLUMNS
        .iter()
        .map(|c| format!("NEW.{c}"))
        .collect::<Vec<_>>()
        .join(", ");
    let old_values = INDEXED_COLUMNS
        .iter()
        .map(|c| format!("OLD.{c}"))
        .collect::<Vec<_>>()
        .join(", ");

    conn.execute(
        &format!(
            "CREATE TRIGGER IF NOT EXISTS {SEARCH_TABLE}_ai AFTER INSERT ON datasets BEGIN
                INSERT INTO {SEARCH_TABLE}(rowid, {columns})
                VALUES (NEW.rowid, {new_values});
            END"
        ),
        [],
    )?;
    conn.execute(
        &format!(
            "CREATE TRIGGER IF NOT EXISTS {SEARCH_TABLE}_ad AFTER DELETE ON datasets BEGIN
                INSERT INTO {SEARCH_TABLE}({SEARCH_TABLE}, rowid, {columns})
                VALUES ('delete', OLD.rowid, {old_values});
            END"
        ),
        [],
    )?;
    conn.execute(
        &format!(
            "CREATE TRIGGER IF NOT EXISTS {SEARCH_TABLE}_au AFTER UPDATE ON datasets BEGIN
                INSERT INTO {SEARCH_TABLE}({SEARCH_TABLE}, rowid, {columns})
                VALUES ('delete', OLD.rowid, {old_values});
                INSERT INTO {SEARCH_TABLE}(rowid, {columns})
                VALUES (NEW.rowid, {new_values});
            END"
        ),
        [],
    )?;
    Ok(())
}
