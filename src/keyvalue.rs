//! Reader for `key=value` text files such as `wpa_supplicant.conf`,
//! `hostapd.conf` and `VERSION.txt`.

use std::io;
use std::path::Path;

/// The `key=value` lines of a file, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyValueFile {
    entries: Vec<(String, String)>,
}

impl KeyValueFile {
    /// Parse text. Lines without `=` are skipped. Keys are trimmed; values are
    /// trimmed and then stripped of surrounding double quotes.
    pub fn parse(text: &str) -> Self {
        let entries = text
            .lines()
            .filter_map(|line| {
                let (key, value) = line.split_once('=')?;
                let value = value.trim().trim_matches('"');
                Some((key.trim().to_string(), value.to_string()))
            })
            .collect();
        Self { entries }
    }

    /// Read and parse a file.
    pub async fn load(path: &Path) -> io::Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        tracing::debug!(path = %path.display(), lines = text.lines().count(), "read key-value file");
        Ok(Self::parse(&text))
    }

    /// Like [`KeyValueFile::load`], but a missing file reads as empty.
    pub async fn load_or_empty(path: &Path) -> io::Result<Self> {
        match Self::load(path).await {
            Ok(file) => Ok(file),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "key-value file does not exist");
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Value of the first line whose key matches.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}
