//! Migration Source - Discovery of migration definitions
//!
//! Loads migration files either from an override directory or from the set bundled
//! into the binary, and parses them into [`MigrationDefinition`]s.
//!
//! File names must look like `YYYYMMDDHHMM_Description.sql`. The content is split on the
//! first case-insensitive `-- DOWN` marker into up and down scripts.

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use super::bundled;
use super::definitions::{MigrationDefinition, MigrationOrigin};
use crate::backends::BackendType;
use crate::error::{MigrateResult, MigrationError};

/// Marker separating up and down scripts
pub const DOWN_MARKER: &str = "-- DOWN";

static FILE_NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-9]{12})_(.+)$").expect("valid migration file name pattern"));

/// Strategy producing the ordered definition set
pub trait MigrationSource: Send + Sync {
    /// Load every valid definition, sorted by version
    fn load(&self) -> MigrateResult<Vec<MigrationDefinition>>;

    /// Where definitions come from, for logging
    fn location(&self) -> String;
}

/// Choose the source for a run: an existing override directory wins over the bundled set
pub fn select_source(backend: BackendType, migrations_dir: Option<&Path>) -> Box<dyn MigrationSource> {
    match migrations_dir {
        Some(dir) if dir.is_dir() => {
            tracing::info!("Loading migrations from file system: {}", dir.display());
            Box::new(DirectorySource::new(dir))
        }
        Some(dir) => {
            tracing::warn!(
                "Migrations directory {} does not exist, falling back to bundled migrations",
                dir.display()
            );
            Box::new(BundledSource::new(backend))
        }
        None => {
            tracing::info!("Loading bundled migrations for provider {}", backend);
            Box::new(BundledSource::new(backend))
        }
    }
}

/// Top-level `*.sql` files of a directory
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl MigrationSource for DirectorySource {
    fn load(&self) -> MigrateResult<Vec<MigrationDefinition>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.dir).map_err(|e| {
            MigrationError::Discovery(format!(
                "Failed to read migrations directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry.path()),
                Err(e) => {
                    tracing::warn!("Skipping unreadable directory entry: {}", e);
                    None
                }
            })
            .filter(|path| path.is_file() && has_sql_extension(path))
            .collect();
        paths.sort();

        let mut definitions = Vec::new();
        for path in paths {
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                tracing::warn!("Skipping migration file with non UTF-8 name: {}", path.display());
                continue;
            };

            let content = match fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) => {
                    tracing::warn!("Could not read migration file {}: {}", path.display(), e);
                    continue;
                }
            };

            if let Some(definition) =
                parse_definition(stem, &content, MigrationOrigin::Filesystem(path.clone()))
            {
                definitions.push(definition);
            }
        }

        Ok(finalize(definitions))
    }

    fn location(&self) -> String {
        self.dir.display().to_string()
    }
}

/// Migrations compiled into the binary for one backend
#[derive(Debug, Clone, Copy)]
pub struct BundledSource {
    backend: BackendType,
}

impl BundledSource {
    pub fn new(backend: BackendType) -> Self {
        Self { backend }
    }
}

impl MigrationSource for BundledSource {
    fn load(&self) -> MigrateResult<Vec<MigrationDefinition>> {
        let resources = bundled::resources(self.backend);
        if resources.is_empty() {
            tracing::warn!("No bundled migration resources found for provider {}", self.backend);
            return Ok(Vec::new());
        }

        let definitions = resources
            .iter()
            .filter_map(|(file_name, content)| {
                let stem = strip_sql_extension(file_name);
                parse_definition(
                    stem,
                    content,
                    MigrationOrigin::Bundled(format!("{}/{}", self.backend.folder_name(), file_name)),
                )
            })
            .collect();

        Ok(finalize(definitions))
    }

    fn location(&self) -> String {
        format!("bundled:{}", self.backend.folder_name())
    }
}

/// Parse one migration from its base file name (no extension) and content.
///
/// Returns `None` and logs a warning when the name does not follow the version pattern.
pub fn parse_definition(
    file_stem: &str,
    content: &str,
    origin: MigrationOrigin,
) -> Option<MigrationDefinition> {
    let Some(captures) = FILE_NAME_PATTERN.captures(file_stem) else {
        tracing::warn!("Invalid migration file name format: {}", file_stem);
        return None;
    };

    let version = captures[1].to_string();
    let description = captures[2].replace('_', " ");
    let (up_script, down_script) = split_content(content);

    Some(MigrationDefinition {
        version,
        description,
        up_script,
        down_script,
        origin,
    })
}

/// Split content into `(up, down)` on the first case-insensitive `-- DOWN`
pub fn split_content(content: &str) -> (String, String) {
    // ASCII lowercasing keeps byte offsets aligned with `content`
    let lowered = content.to_ascii_lowercase();
    let marker = DOWN_MARKER.to_ascii_lowercase();

    match lowered.find(&marker) {
        Some(index) => (
            content[..index].trim().to_string(),
            content[index + DOWN_MARKER.len()..].trim().to_string(),
        ),
        None => (content.trim().to_string(), String::new()),
    }
}

/// Create a new migration file in `dir` and return its file name
pub fn create_migration(dir: &Path, name: &str) -> MigrateResult<String> {
    fs::create_dir_all(dir)?;

    let version = Utc::now().format("%Y%m%d%H%M").to_string();
    let slug: String = name
        .trim()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_");
    if slug.is_empty() {
        return Err(MigrationError::configuration("Migration name must not be empty"));
    }

    let file_name = format!("{}_{}.sql", version, slug);
    let path = dir.join(&file_name);
    if path.exists() {
        return Err(MigrationError::configuration(format!(
            "Migration file {} already exists",
            path.display()
        )));
    }

    let template = format!(
        "-- Migration: {}\n\
         -- Created: {}\n\n\
         -- Add your schema changes here\n\n\n\
         {}\n\
         -- Add rollback statements here\n",
        name.trim(),
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
        DOWN_MARKER
    );
    fs::write(&path, template)?;

    Ok(file_name)
}

pub(crate) fn has_sql_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| ext.eq_ignore_ascii_case("sql"))
}

fn strip_sql_extension(file_name: &str) -> &str {
    match file_name.len().checked_sub(4) {
        Some(cut) if file_name.is_char_boundary(cut) && file_name[cut..].eq_ignore_ascii_case(".sql") => {
            &file_name[..cut]
        }
        _ => file_name,
    }
}

/// Sort by version and drop duplicate versions, keeping the first seen
fn finalize(definitions: Vec<MigrationDefinition>) -> Vec<MigrationDefinition> {
    let mut seen = HashSet::new();
    let mut unique: Vec<MigrationDefinition> = definitions
        .into_iter()
        .filter(|definition| {
            let fresh = seen.insert(definition.version.clone());
            if !fresh {
                tracing::warn!(
                    "Duplicate migration version {} in {}, ignoring it",
                    definition.version,
                    definition.origin
                );
            }
            fresh
        })
        .collect();
    unique.sort_by(|a, b| a.version.cmp(&b.version));
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn origin() -> MigrationOrigin {
        MigrationOrigin::Bundled("test.sql".to_string())
    }

    #[test]
    fn test_parse_file_name() {
        let definition =
            parse_definition("202401010000_Create_feature_flags", "CREATE TABLE x;", origin()).unwrap();
        assert_eq!(definition.version, "202401010000");
        assert_eq!(definition.description, "Create feature flags");
        assert_eq!(definition.up_script, "CREATE TABLE x;");
        assert!(definition.down_script.is_empty());
    }

    #[test]
    fn test_rejects_malformed_names() {
        assert!(parse_definition("abc_test", "SELECT 1;", origin()).is_none());
        assert!(parse_definition("20240101000_short", "SELECT 1;", origin()).is_none());
        assert!(parse_definition("202401010000", "SELECT 1;", origin()).is_none());
        assert!(parse_definition("202401010000_", "SELECT 1;", origin()).is_none());
        assert!(parse_definition("2024010100001_long", "SELECT 1;", origin()).is_none());
    }

    #[test]
    fn test_split_on_down_marker() {
        let content = "\nCREATE TABLE a (id INT);\n\n-- DOWN\nDROP TABLE a;\n";
        let (up, down) = split_content(content);
        assert_eq!(up, "CREATE TABLE a (id INT);");
        assert_eq!(down, "DROP TABLE a;");
    }

    #[test]
    fn test_split_is_case_insensitive_and_uses_first_marker() {
        let content = "CREATE TABLE a (id INT);\n-- down\nDROP TABLE a;\n-- DOWN\nSELECT 1;";
        let (up, down) = split_content(content);
        assert_eq!(up, "CREATE TABLE a (id INT);");
        assert_eq!(down, "DROP TABLE a;\n-- DOWN\nSELECT 1;");
    }

    #[test]
    fn test_split_without_marker() {
        let (up, down) = split_content("  CREATE TABLE a (id INT);  ");
        assert_eq!(up, "CREATE TABLE a (id INT);");
        assert_eq!(down, "");
    }

    #[test]
    fn test_split_with_non_ascii_prefix() {
        let content = "-- Überschrift ÄÖÜ\nCREATE TABLE ä (id INT);\n-- Down\nDROP TABLE ä;";
        let (up, down) = split_content(content);
        assert_eq!(up, "-- Überschrift ÄÖÜ\nCREATE TABLE ä (id INT);");
        assert_eq!(down, "DROP TABLE ä;");
    }

    #[test]
    fn test_directory_source_filters_and_sorts() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        fs::write(dir.join("202401020000_addcol.sql"), "ALTER TABLE t ADD c INT;\n-- DOWN\nALTER TABLE t DROP COLUMN c;").unwrap();
        fs::write(dir.join("202401010000_init.sql"), "CREATE TABLE t (id INT);").unwrap();
        fs::write(dir.join("abc_test.sql"), "SELECT 1;").unwrap();
        fs::write(dir.join("202401030000_notes.txt"), "not sql").unwrap();
        fs::create_dir(dir.join("nested")).unwrap();
        fs::write(dir.join("nested").join("202401040000_deep.sql"), "SELECT 1;").unwrap();

        let definitions = DirectorySource::new(dir).load().unwrap();
        let versions: Vec<_> = definitions.iter().map(|d| d.version.as_str()).collect();
        assert_eq!(versions, vec!["202401010000", "202401020000"]);
        assert_eq!(definitions[1].description, "addcol");
        assert_eq!(definitions[1].down_script, "ALTER TABLE t DROP COLUMN c;");
        assert!(matches!(definitions[0].origin, MigrationOrigin::Filesystem(_)));
    }

    #[test]
    fn test_directory_source_drops_duplicate_versions() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        fs::write(dir.join("202401010000_a.sql"), "SELECT 1;").unwrap();
        fs::write(dir.join("202401010000_b.sql"), "SELECT 2;").unwrap();

        let definitions = DirectorySource::new(dir).load().unwrap();
        assert_eq!(definitions.len(), 1);
        assert_eq!(definitions[0].description, "a");
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing");
        assert!(DirectorySource::new(missing).load().unwrap().is_empty());
    }

    #[test]
    fn test_select_source_prefers_existing_directory() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("202401010000_only.sql"), "SELECT 1;").unwrap();

        let source = select_source(BackendType::PostgreSQL, Some(temp_dir.path()));
        let definitions = source.load().unwrap();
        assert_eq!(definitions.len(), 1);
        assert_eq!(definitions[0].description, "only");

        let fallback = select_source(BackendType::PostgreSQL, Some(&temp_dir.path().join("nope")));
        assert_eq!(fallback.location(), "bundled:postgresql");
    }

    #[test]
    fn test_bundled_sources_parse() {
        for backend in [BackendType::PostgreSQL, BackendType::SqlServer] {
            let definitions = BundledSource::new(backend).load().unwrap();
            assert!(!definitions.is_empty());
            assert!(definitions.windows(2).all(|w| w[0].version < w[1].version));
            assert!(definitions.iter().all(|d| !d.up_script.is_empty()));
        }
    }

    #[test]
    fn test_strip_sql_extension() {
        assert_eq!(strip_sql_extension("202401010000_init.sql"), "202401010000_init");
        assert_eq!(strip_sql_extension("202401010000_init.SQL"), "202401010000_init");
        assert_eq!(strip_sql_extension("sql"), "sql");
    }

    #[test]
    fn test_create_migration_template_round_trips() {
        let temp_dir = TempDir::new().unwrap();
        let file_name = create_migration(temp_dir.path(), "add audit table").unwrap();
        assert!(file_name.ends_with("_add_audit_table.sql"));

        let definitions = DirectorySource::new(temp_dir.path()).load().unwrap();
        assert_eq!(definitions.len(), 1);
        assert_eq!(definitions[0].description, "add audit table");
        assert!(definitions[0].up_script.contains("Add your schema changes here"));
        assert!(definitions[0].down_script.contains("Add rollback statements here"));
    }

    #[test]
    fn test_create_migration_rejects_blank_name() {
        let temp_dir = TempDir::new().unwrap();
        let err = create_migration(temp_dir.path(), "   ").unwrap_err();
        assert!(err.is_configuration());
    }
}
