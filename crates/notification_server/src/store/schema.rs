//! Database schema, its version history and the checks run on every open.

use rusqlite::Connection;

pub const CURRENT_VERSION: u32 = 3;

pub struct Table {
    pub name: &'static str,
    pub columns: &'static [&'static str],
    pub create: &'static str,
}

pub const NOTIFICATIONS: Table = Table {
    name: "notifications",
    columns: &[
        "id",
        "app_name",
        "app_icon",
        "summary",
        "body",
        "expire_timeout",
        "disambiguated_app_name",
        "explicit_app_name",
    ],
    create: "CREATE TABLE notifications (id INTEGER PRIMARY KEY, app_name TEXT, app_icon TEXT, summary TEXT, body TEXT, \
             expire_timeout INTEGER, disambiguated_app_name TEXT, explicit_app_name TEXT)",
};

pub const ACTIONS: Table = Table {
    name: "actions",
    columns: &["id", "action", "display_name"],
    create: "CREATE TABLE actions (id INTEGER, action TEXT, display_name TEXT)",
};

pub const HINTS: Table = Table {
    name: "hints",
    columns: &["id", "hint", "value"],
    create: "CREATE TABLE hints (id INTEGER, hint TEXT, value TEXT, PRIMARY KEY(id, hint))",
};

pub const INTERNAL_HINTS: Table = Table {
    name: "internal_hints",
    columns: &["id", "hint", "value"],
    create: "CREATE TABLE internal_hints (id INTEGER, hint TEXT, value TEXT, PRIMARY KEY(id, hint))",
};

pub const EXPIRATION: Table = Table {
    name: "expiration",
    columns: &["id", "expire_at"],
    create: "CREATE TABLE expiration (id INTEGER PRIMARY KEY, expire_at INTEGER)",
};

pub const TABLES: [&Table; 5] = [&NOTIFICATIONS, &ACTIONS, &HINTS, &INTERNAL_HINTS, &EXPIRATION];

pub enum Migration {
    Sql(&'static str),
    /// Drop and recreate the named tables with their current definition, losing their rows.
    Rebuild(&'static [&'static str]),
}

/// Forward migrations, applied in order to bring a database at an older version up to [`CURRENT_VERSION`].
pub const MIGRATIONS: &[(u32, Migration)] = &[
    (
        1,
        Migration::Sql(
            "CREATE TABLE IF NOT EXISTS notifications (id INTEGER PRIMARY KEY, app_name TEXT, app_icon TEXT, summary TEXT, \
             body TEXT, expire_timeout INTEGER);
             CREATE TABLE IF NOT EXISTS actions (id INTEGER, action TEXT, display_name TEXT);
             CREATE TABLE IF NOT EXISTS hints (id INTEGER, hint TEXT, value TEXT, PRIMARY KEY(id, hint));
             CREATE TABLE IF NOT EXISTS expiration (id INTEGER PRIMARY KEY, expire_at TEXT);",
        ),
    ),
    (
        2,
        Migration::Sql(
            "ALTER TABLE notifications ADD COLUMN disambiguated_app_name TEXT;
             ALTER TABLE notifications ADD COLUMN explicit_app_name TEXT;
             CREATE TABLE IF NOT EXISTS internal_hints (id INTEGER, hint TEXT, value TEXT, PRIMARY KEY(id, hint));",
        ),
    ),
    // deadlines changed from text timestamps to epoch milliseconds
    (3, Migration::Rebuild(&["expiration"])),
];

pub fn user_version(conn: &Connection) -> rusqlite::Result<u32> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
}

fn set_user_version(conn: &Connection, version: u32) -> rusqlite::Result<()> {
    conn.execute_batch(&format!("PRAGMA user_version = {}", version))
}

fn table(name: &str) -> Option<&'static Table> {
    TABLES.into_iter().find(|table| table.name == name)
}

fn rebuild(conn: &Connection, table: &Table) -> rusqlite::Result<()> {
    log::info!("Recreating notification table {}", table.name);
    conn.execute_batch(&format!("DROP TABLE IF EXISTS {}; {};", table.name, table.create))
}

pub fn column_names(conn: &Connection, table: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?.collect();
    names
}

/// Bring the schema to [`CURRENT_VERSION`] and make sure every table has exactly the expected columns.
///
/// A database from a newer version, or one where a migration fails, gets all of its tables rebuilt.
pub fn prepare(conn: &Connection) -> rusqlite::Result<()> {
    let version = user_version(conn)?;
    if version > CURRENT_VERSION {
        log::warn!("Notification database has unknown schema version {}, rebuilding", version);
        rebuild_all(conn)?;
    } else if let Err(e) = migrate(conn, version) {
        log::warn!("Migrating notification database from version {} failed: {}, rebuilding", version, e);
        rebuild_all(conn)?;
    }

    for table in TABLES {
        let columns = column_names(conn, table.name)?;
        if columns.iter().map(String::as_str).ne(table.columns.iter().copied()) {
            if !columns.is_empty() {
                log::warn!("Unexpected columns in {}: {:?}", table.name, columns);
            }
            rebuild(conn, table)?;
        }
    }
    set_user_version(conn, CURRENT_VERSION)
}

fn migrate(conn: &Connection, from: u32) -> rusqlite::Result<()> {
    for (version, migration) in MIGRATIONS.iter().filter(|(version, _)| *version > from) {
        log::debug!("Migrating notification database to version {}", version);
        match migration {
            Migration::Sql(sql) => conn.execute_batch(sql)?,
            Migration::Rebuild(names) => {
                for table in names.iter().filter_map(|name| table(name)) {
                    rebuild(conn, table)?;
                }
            }
        }
        set_user_version(conn, *version)?;
    }
    Ok(())
}

fn rebuild_all(conn: &Connection) -> rusqlite::Result<()> {
    for table in TABLES {
        rebuild(conn, table)?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_fresh_database_gets_current_schema() {
        let conn = Connection::open_in_memory().unwrap();
        prepare(&conn).unwrap();
        assert_eq!(user_version(&conn).unwrap(), CURRENT_VERSION);
        for table in TABLES {
            assert_eq!(column_names(&conn, table.name).unwrap(), table.columns);
        }
    }

    #[test]
    fn test_version_one_database_is_migrated_keeping_rows() {
        let conn = Connection::open_in_memory().unwrap();
        if let (1, Migration::Sql(sql)) = &MIGRATIONS[0] {
            conn.execute_batch(sql).unwrap();
        }
        conn.execute_batch("PRAGMA user_version = 1; INSERT INTO notifications VALUES (4, 'app', '', 's', 'b', -1);").unwrap();
        prepare(&conn).unwrap();
        let summary: String = conn.query_row("SELECT summary FROM notifications WHERE id = 4", [], |row| row.get(0)).unwrap();
        assert_eq!(summary, "s");
        assert_eq!(column_names(&conn, "notifications").unwrap(), NOTIFICATIONS.columns);
    }

    #[test]
    fn test_mismatching_table_is_recreated() {
        let conn = Connection::open_in_memory().unwrap();
        prepare(&conn).unwrap();
        conn.execute_batch("DROP TABLE hints; CREATE TABLE hints (id INTEGER, value TEXT);").unwrap();
        prepare(&conn).unwrap();
        assert_eq!(column_names(&conn, "hints").unwrap(), HINTS.columns);
    }

    #[test]
    fn test_newer_version_is_rebuilt() {
        let conn = Connection::open_in_memory().unwrap();
        prepare(&conn).unwrap();
        conn.execute_batch("INSERT INTO expiration VALUES (1, 5); PRAGMA user_version = 99;").unwrap();
        prepare(&conn).unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM expiration", [], |row| row.get(0)).unwrap();
        assert_eq!(count, 0);
        assert_eq!(user_version(&conn).unwrap(), CURRENT_VERSION);
    }
}
