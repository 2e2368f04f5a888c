use rusqlite::{Connection, params};
use shardsync_core::{FileContent, FileInfoMap, FileMetaData, Result};
use std::path::{Path, PathBuf};

/// SQLite copy of the authority's file index, written through on every
/// accepted update and read back on startup.
pub struct MetaSnapshot {
    db_path: PathBuf,
}

impl MetaSnapshot {
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let snapshot = Self { db_path };
        snapshot.init_schema()?;
        Ok(snapshot)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn get_conn(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        Ok(conn)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS files (
                filename TEXT PRIMARY KEY,
                version INTEGER NOT NULL,
                block_hashes TEXT NOT NULL
            )",
            [],
        )?;

        Ok(())
    }

    pub fn load(&self) -> Result<FileInfoMap> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare("SELECT filename, version, block_hashes FROM files")?;

        let rows = stmt.query_map([], |row| {
            let filename: String = row.get(0)?;
            let version: i64 = row.get(1)?;
            let block_hashes: String = row.get(2)?;
            Ok((filename, version, block_hashes))
        })?;

        let mut files = FileInfoMap::new();
        for row in rows {
            let (filename, version, block_hashes) = row?;
            let hashes: Vec<String> = serde_json::from_str(&block_hashes)?;
            let content = FileContent::from_hash_list(hashes)?;
            files.insert(
                filename.clone(),
                FileMetaData::new(filename, version, content),
            );
        }

        Ok(files)
    }

    pub fn upsert(&self, meta: &FileMetaData) -> Result<()> {
        let conn = self.get_conn()?;
        let block_hashes = serde_json::to_string(&meta.content.to_hash_list())?;

        conn.execute(
            "INSERT INTO files (filename, version, block_hashes)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(filename) DO UPDATE SET
                version = excluded.version,
                block_hashes = excluded.block_hashes",
            params![meta.filename, meta.version, block_hashes],
        )?;

        Ok(())
    }
}
