use crate::error::Result;
use crate::types::{FileContent, FileInfoMap, FileMetaData};
use rusqlite::{Connection, params};
use std::path::{Path, PathBuf};

/// File name of the client index inside a synced directory.
pub const DEFAULT_META_FILENAME: &str = "index.db";

/// The client's record of the last state it agreed on with the authority.
/// One row per (file, block position); sentinel rows encode tombstones and
/// empty files so every known file has at least one row.
pub struct LocalIndex {
    db_path: PathBuf,
}

impl LocalIndex {
    pub fn open(base_dir: &Path) -> Result<Self> {
        let index = Self {
            db_path: base_dir.join(DEFAULT_META_FILENAME),
        };
        index.init_schema()?;
        Ok(index)
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
            "CREATE TABLE IF NOT EXISTS indexes (
                fileName TEXT NOT NULL,
                version INTEGER NOT NULL,
                hashIndex INTEGER NOT NULL,
                hashValue TEXT NOT NULL,
                PRIMARY KEY (fileName, hashIndex)
            )",
            [],
        )?;

        Ok(())
    }

    pub fn load(&self) -> Result<FileInfoMap> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(
            "SELECT fileName, version, hashValue FROM indexes ORDER BY fileName, hashIndex",
        )?;

        let rows = stmt.query_map([], |row| {
            let filename: String = row.get(0)?;
            let version: i64 = row.get(1)?;
            let hash: String = row.get(2)?;
            Ok((filename, version, hash))
        })?;

        let mut grouped: Vec<(String, i64, Vec<String>)> = Vec::new();
        for row in rows {
            let (filename, version, hash) = row?;
            match grouped.last_mut() {
                Some((last, last_version, hashes)) if *last == filename => {
                    *last_version = version;
                    hashes.push(hash);
                }
                _ => grouped.push((filename, version, vec![hash])),
            }
        }

        let mut files = FileInfoMap::new();
        for (filename, version, hashes) in grouped {
            let content = FileContent::from_hash_list(hashes)?;
            files.insert(
                filename.clone(),
                FileMetaData::new(filename, version, content),
            );
        }

        Ok(files)
    }

    /// Atomically replace the whole table with `files`.
    pub fn replace_all(&self, files: &FileInfoMap) -> Result<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM indexes", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO indexes (fileName, version, hashIndex, hashValue)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for meta in files.values() {
                for (position, hash) in meta.content.to_hash_list().iter().enumerate() {
                    stmt.execute(params![meta.filename, meta.version, position as i64, hash])?;
                }
            }
        }
        tx.commit()?;

        tracing::debug!("Wrote {} entries to {:?}", files.len(), self.db_path);
        Ok(())
    }
}
