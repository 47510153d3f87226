/// The durable config store: a single read/write handle on `config.json`.
///
/// The file is always rewritten in full. Nothing else in the process opens the
/// file for writing while a `DurableStore` exists.
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::info;

use crate::config::{encode_config, parse_config, ConfigData};
use crate::error::StoreError;

#[derive(Debug)]
pub struct DurableStore {
    path: PathBuf,
    file: File,
}

impl DurableStore {
    /// Opens the config file at `path`, creating it from `defaults` if it does
    /// not exist yet, and returns the store together with the parsed contents.
    ///
    /// An existing file must pass schema validation; a corrupt file is never
    /// silently replaced.
    pub async fn open(path: &Path, defaults: &ConfigData) -> Result<(Self, ConfigData), StoreError> {
        if !tokio::fs::try_exists(path)
            .await
            .map_err(|e| StoreError::io(path, e))?
        {
            Self::create(path, defaults).await?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .await
            .map_err(|e| StoreError::io(path, e))?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)
            .await
            .map_err(|e| StoreError::io(path, e))?;
        let data = parse_config(&bytes)?;

        info!(
            path = %path.display(),
            monitor_targets = data.monitor_targets.len(),
            chat_ids = data.notification_target.chat_ids().len(),
            "Config loaded"
        );

        Ok((
            Self {
                path: path.to_path_buf(),
                file,
            },
            data,
        ))
    }

    async fn create(path: &Path, defaults: &ConfigData) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent, e))?;
        }
        let bytes = encode_config(defaults)?;
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await
            .map_err(|e| StoreError::io(path, e))?;
        file.write_all(&bytes)
            .await
            .map_err(|e| StoreError::io(path, e))?;
        file.flush().await.map_err(|e| StoreError::io(path, e))?;
        file.sync_all().await.map_err(|e| StoreError::io(path, e))?;
        info!(path = %path.display(), "Created default config file");
        Ok(())
    }

    /// Truncates the file and rewrites it with `data`, then flushes it to disk.
    pub async fn write(&mut self, data: &ConfigData) -> Result<(), StoreError> {
        let bytes = encode_config(data)?;
        let path = &self.path;
        self.file
            .set_len(0)
            .await
            .map_err(|e| StoreError::io(path, e))?;
        self.file
            .seek(SeekFrom::Start(0))
            .await
            .map_err(|e| StoreError::io(path, e))?;
        self.file
            .write_all(&bytes)
            .await
            .map_err(|e| StoreError::io(path, e))?;
        self.file
            .flush()
            .await
            .map_err(|e| StoreError::io(path, e))?;
        self.file
            .sync_all()
            .await
            .map_err(|e| StoreError::io(path, e))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
impl DurableStore {
    /// A store whose every write fails.
    pub(crate) async fn open_read_only(path: &Path) -> Self {
        let file = OpenOptions::new().read(true).open(path).await.unwrap();
        Self {
            path: path.to_path_buf(),
            file,
        }
    }
}
