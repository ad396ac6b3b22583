//! Persistent catalog of packages, links, and shared libraries.
//!
//! SQLite-backed. The catalog owns package identity: once a row is written,
//! its `install_name` never changes and the install directory is addressed
//! by `(name, revision)`. Rows are append-only; obsolete installs are
//! detected by checking `install_path` existence, never by mutating rows.
//!
//! Concurrent invocations against the same home are tolerated: WAL mode
//! plus a busy timeout for writers, and each insert happens inside its own
//! transaction.

use crate::error::CatalogError;
use log::debug;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};

/// Bump when changing table schemas. An on-disk version newer than this is
/// refused rather than migrated.
const SCHEMA_VERSION: i32 = 1;

/// Open handle on the catalog database.
pub struct Catalog {
    conn: Connection,
}

/// Identity fields used to locate an existing install.
///
/// `url` is always known; the rest are matched only when set, so the WHERE
/// clause is built from whichever fields the pipeline has assigned so far.
#[derive(Debug, Default, Clone)]
pub struct IdentityQuery<'a> {
    pub url: &'a str,
    pub name: Option<&'a str>,
    pub revision: Option<&'a str>,
    pub etag: Option<&'a str>,
    pub package_name: Option<&'a str>,
    pub build_name: Option<&'a str>,
    pub install_name: Option<&'a str>,
}

/// A package row to be committed after a successful install.
#[derive(Debug, Clone)]
pub struct NewPackageRow<'a> {
    pub abstract_requirement: &'a str,
    pub concrete_requirement: &'a str,
    pub package_type: &'a str,
    pub build_type: &'a str,
    pub url: &'a str,
    pub name: Option<&'a str>,
    pub revision: Option<&'a str>,
    pub etag: Option<&'a str>,
    pub package_name: Option<&'a str>,
    pub build_name: Option<&'a str>,
    pub install_name: Option<&'a str>,
    pub package_path: Option<&'a str>,
    pub build_path: Option<&'a str>,
    pub install_path: Option<&'a str>,
}

/// A matching install found by [`Catalog::find_existing`].
#[derive(Debug, Clone)]
pub struct ExistingInstall {
    pub id: i64,
    /// Link row id when the query was scoped to an environment.
    pub link_id: Option<i64>,
    pub name: Option<String>,
    pub revision: Option<String>,
    pub package_name: Option<String>,
    pub build_name: Option<String>,
    pub install_name: Option<String>,
    pub package_path: Option<PathBuf>,
    pub build_path: Option<PathBuf>,
    pub install_path: PathBuf,
}

/// A shared-library record produced by the relocation pass.
#[derive(Debug, Clone)]
pub struct SharedLibraryRow {
    pub package_id: i64,
    pub path: String,
    pub soname: Option<String>,
    /// Dependency install names, as recorded (JSON array).
    pub deps: Vec<String>,
}

impl Catalog {
    /// Open (creating if needed) the catalog at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, crate::error::VeeError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).map_err(CatalogError::Sqlite)?;

        // WAL allows concurrent readers while a writer holds the insert
        // transaction; the busy timeout covers writer contention.
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(CatalogError::Sqlite)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(CatalogError::Sqlite)?;

        let found: i32 = conn
            .pragma_query_value(None, "user_version", |r| r.get(0))
            .map_err(CatalogError::Sqlite)?;
        if found > SCHEMA_VERSION {
            return Err(CatalogError::SchemaVersion {
                found,
                expected: SCHEMA_VERSION,
            }
            .into());
        }

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS packages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                abstract_requirement TEXT,
                concrete_requirement TEXT,
                package_type TEXT NOT NULL,
                build_type TEXT NOT NULL,
                url TEXT,
                name TEXT,
                revision TEXT,
                etag TEXT,
                package_name TEXT,
                build_name TEXT,
                install_name TEXT,
                package_path TEXT,
                build_path TEXT,
                install_path TEXT,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE TABLE IF NOT EXISTS environments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                path TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE TABLE IF NOT EXISTS links (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                package_id INTEGER NOT NULL REFERENCES packages(id),
                environment_id INTEGER NOT NULL REFERENCES environments(id),
                abstract_requirement TEXT,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE TABLE IF NOT EXISTS shared_libraries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                package_id INTEGER NOT NULL REFERENCES packages(id),
                path TEXT NOT NULL,
                soname TEXT,
                deps TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );",
        )
        .map_err(CatalogError::Sqlite)?;

        conn.pragma_update(None, "user_version", SCHEMA_VERSION)
            .map_err(CatalogError::Sqlite)?;

        Ok(Self { conn })
    }

    /// Commit a package row; returns its id.
    pub fn insert_package(&mut self, row: &NewPackageRow<'_>) -> Result<i64, CatalogError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO packages (abstract_requirement, concrete_requirement,
                package_type, build_type, url, name, revision, etag,
                package_name, build_name, install_name,
                package_path, build_path, install_path)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                row.abstract_requirement,
                row.concrete_requirement,
                row.package_type,
                row.build_type,
                row.url,
                row.name,
                row.revision,
                row.etag,
                row.package_name,
                row.build_name,
                row.install_name,
                row.package_path,
                row.build_path,
                row.install_path,
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        debug!("package committed as catalog id {id}");
        Ok(id)
    }

    /// Find rows whose identity fields match the query, newest first.
    ///
    /// When `environment_id` is given, only rows already linked into that
    /// environment are returned, ordered by link creation then package
    /// creation (both descending). The caller filters by `install_path`
    /// existence on disk.
    pub fn find_existing(
        &self,
        query: &IdentityQuery<'_>,
        environment_id: Option<i64>,
    ) -> Result<Vec<ExistingInstall>, CatalogError> {
        let mut clauses = vec![
            "packages.install_path IS NOT NULL".to_string(),
            "packages.url = ?".to_string(),
        ];
        let mut values: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(query.url.to_string())];

        for (column, value) in [
            ("name", query.name),
            ("revision", query.revision),
            ("etag", query.etag),
            ("package_name", query.package_name),
            ("build_name", query.build_name),
            ("install_name", query.install_name),
        ] {
            if let Some(v) = value {
                clauses.push(format!("packages.{column} = ?"));
                values.push(Box::new(v.to_string()));
            }
        }

        let clause = clauses.join(" AND ");
        let sql = if let Some(env_id) = environment_id {
            values.push(Box::new(env_id));
            format!(
                "SELECT packages.id, links.id, packages.name, packages.revision,
                        packages.package_name, packages.build_name, packages.install_name,
                        packages.package_path, packages.build_path, packages.install_path
                 FROM packages
                 LEFT OUTER JOIN links ON packages.id = links.package_id
                 WHERE {clause} AND links.environment_id = ?
                 ORDER BY links.created_at DESC, packages.created_at DESC, packages.id DESC"
            )
        } else {
            format!(
                "SELECT packages.id, NULL, packages.name, packages.revision,
                        packages.package_name, packages.build_name, packages.install_name,
                        packages.package_path, packages.build_path, packages.install_path
                 FROM packages
                 WHERE {clause}
                 ORDER BY packages.created_at DESC, packages.id DESC"
            )
        };

        // prepare_cached keys on the SQL text, which varies with the set of
        // bound predicates.
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let params = values.iter().map(|v| v.as_ref());
        let rows = stmt.query_map(rusqlite::params_from_iter(params), |row| {
            Ok(ExistingInstall {
                id: row.get(0)?,
                link_id: row.get(1)?,
                name: row.get(2)?,
                revision: row.get(3)?,
                package_name: row.get(4)?,
                build_name: row.get(5)?,
                install_name: row.get(6)?,
                package_path: row.get::<_, Option<String>>(7)?.map(PathBuf::from),
                build_path: row.get::<_, Option<String>>(8)?.map(PathBuf::from),
                install_path: PathBuf::from(row.get::<_, String>(9)?),
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Id of the named environment, creating its row on first use.
    pub fn environment_id(&mut self, name: &str, path: &Path) -> Result<i64, CatalogError> {
        if let Some(id) = self
            .conn
            .query_row(
                "SELECT id FROM environments WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?
        {
            return Ok(id);
        }

        self.conn.execute(
            "INSERT INTO environments (name, path) VALUES (?1, ?2)",
            params![name, path.display().to_string()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Link row id for `(package, environment)` when one exists.
    pub fn find_link(
        &self,
        package_id: i64,
        environment_id: i64,
    ) -> Result<Option<i64>, CatalogError> {
        self.conn
            .query_row(
                "SELECT id FROM links WHERE package_id = ?1 AND environment_id = ?2",
                params![package_id, environment_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    /// Record a link; returns the link row id.
    pub fn insert_link(
        &mut self,
        package_id: i64,
        environment_id: i64,
        abstract_requirement: &str,
    ) -> Result<i64, CatalogError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO links (package_id, environment_id, abstract_requirement)
             VALUES (?1, ?2, ?3)",
            params![package_id, environment_id, abstract_requirement],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(id)
    }

    /// Record one shared library found under an install.
    pub fn insert_shared_library(&mut self, row: &SharedLibraryRow) -> Result<(), CatalogError> {
        let deps = serde_json::to_string(&row.deps).unwrap_or_else(|_| "[]".to_string());
        self.conn.execute(
            "INSERT INTO shared_libraries (package_id, path, soname, deps)
             VALUES (?1, ?2, ?3, ?4)",
            params![row.package_id, row.path, row.soname, deps],
        )?;
        Ok(())
    }

    /// Shared libraries recorded for a package.
    pub fn shared_libraries(&self, package_id: i64) -> Result<Vec<SharedLibraryRow>, CatalogError> {
        let mut stmt = self.conn.prepare(
            "SELECT path, soname, deps FROM shared_libraries WHERE package_id = ?1 ORDER BY path",
        )?;
        let rows = stmt.query_map(params![package_id], |row| {
            let deps: String = row.get(2)?;
            Ok(SharedLibraryRow {
                package_id,
                path: row.get(0)?,
                soname: row.get(1)?,
                deps: serde_json::from_str(&deps).unwrap_or_default(),
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Number of package rows (diagnostics).
    pub fn package_count(&self) -> Result<i64, CatalogError> {
        self.conn
            .query_row("SELECT COUNT(*) FROM packages", [], |row| row.get(0))
            .map_err(Into::into)
    }

    /// All package rows, oldest first, for listing.
    pub fn list_packages(&self) -> Result<Vec<PackageListing>, CatalogError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, revision, url, install_path, created_at
             FROM packages ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(PackageListing {
                id: row.get(0)?,
                name: row.get(1)?,
                revision: row.get(2)?,
                url: row.get(3)?,
                install_path: row.get::<_, Option<String>>(4)?.map(PathBuf::from),
                created_at: row.get(5)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

/// One row of `vee list` output.
#[derive(Debug, Clone)]
pub struct PackageListing {
    pub id: i64,
    pub name: Option<String>,
    pub revision: Option<String>,
    pub url: Option<String>,
    pub install_path: Option<PathBuf>,
    pub created_at: String,
}
