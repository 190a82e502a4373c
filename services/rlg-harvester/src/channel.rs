//! Output channel - newline-delimited JSON hand-off between a crawl worker
//! and its parent.
//!
//! The worker writes and flushes one record per line while crawling; the
//! parent reads the whole file once the worker has exited.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tracing::{debug, info};

use crate::error::{HarvestError, Result};

/// Append-only writer for a crawl's output channel
pub struct ChannelWriter {
    path: PathBuf,
    out: BufWriter<File>,
    written: usize,
}

impl ChannelWriter {
    /// Create (or truncate) the channel file, creating parent directories.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(&path)?;
        debug!("Opened output channel {}", path.display());

        Ok(Self {
            path,
            out: BufWriter::new(file),
            written: 0,
        })
    }

    /// Write one record and flush it, so a crash never loses accepted records
    /// or leaves half a line behind.
    pub fn write<T: Serialize>(&mut self, record: &T) -> Result<()> {
        let mut line = serde_json::to_vec(record).map_err(|source| HarvestError::Encode {
            what: "record",
            source,
        })?;
        line.push(b'\n');
        self.out.write_all(&line)?;
        self.out.flush()?;
        self.written += 1;
        Ok(())
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and sync to disk.
    pub fn finish(mut self) -> Result<usize> {
        self.out.flush()?;
        self.out.get_ref().sync_all()?;
        Ok(self.written)
    }
}

/// Read every record from the channel at `path`, in emission order.
///
/// Empty lines are skipped. Any malformed line fails the whole read. With
/// `reclaim` the file is deleted after a successful read and kept otherwise.
pub async fn collect<T: DeserializeOwned>(path: &Path, reclaim: bool) -> Result<Vec<T>> {
    info!("Getting results from {}", path.display());

    let text = match fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(HarvestError::NoData {
                path: path.to_path_buf(),
            });
        }
        Err(e) => return Err(e.into()),
    };

    let records = parse_lines(path, &text)?;

    if reclaim {
        info!("Removing output channel {}", path.display());
        fs::remove_file(path).await?;
    }

    debug!("{} records retrieved from {}", records.len(), path.display());
    Ok(records)
}

fn parse_lines<T: DeserializeOwned>(path: &Path, text: &str) -> Result<Vec<T>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line).map_err(|source| HarvestError::ChannelParse {
                path: path.to_path_buf(),
                line: idx + 1,
                source,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::Achievement;
    use serde_json::Value;
    use tempfile::tempdir;

    fn achievement(name: &str) -> Achievement {
        Achievement {
            name: name.to_string(),
            img_url: format!("/trophies/{}.png", name),
            gamerscore: 10,
            trophy_type: "BRONZE".to_string(),
            description: String::new(),
        }
    }

    #[tokio::test]
    async fn test_write_then_collect_preserves_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("achievement_data.jl");

        let mut writer = ChannelWriter::create(&path).unwrap();
        for name in ["Friendly", "Stay Fresh", "Rocket Scientist"] {
            writer.write(&achievement(name)).unwrap();
        }
        assert_eq!(writer.finish().unwrap(), 3);

        let records: Vec<Achievement> = collect(&path, false).await.unwrap();
        let names: Vec<&str> = records.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["Friendly", "Stay Fresh", "Rocket Scientist"]);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_collect_reclaims_channel() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("items.jl");
        std::fs::write(&path, "{\"a\":1}\n{\"a\":2}\n").unwrap();

        let records: Vec<Value> = collect(&path, true).await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_malformed_line_fails_whole_collection() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("items.jl");
        std::fs::write(&path, "{\"a\":1}\n{\"a\":2}\n{not json\n{\"a\":3}\n").unwrap();

        let result = collect::<Value>(&path, true).await;
        match result {
            Err(HarvestError::ChannelParse { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected ChannelParse, got {:?}", other),
        }
        // Storage left alone after a failed read
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_missing_channel_is_no_data() {
        let dir = tempdir().unwrap();
        let result = collect::<Value>(&dir.path().join("never.jl"), true).await;
        assert!(matches!(result, Err(HarvestError::NoData { .. })));
    }

    #[tokio::test]
    async fn test_empty_channel_yields_no_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.jl");
        ChannelWriter::create(&path).unwrap().finish().unwrap();

        let records: Vec<Value> = collect(&path, false).await.unwrap();
        assert!(records.is_empty());
    }
}
