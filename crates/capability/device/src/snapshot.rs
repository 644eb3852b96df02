//! 快照本地归档。

use crate::DeviceError;
use chrono::NaiveDateTime;
use std::path::{Path, PathBuf};
use tracing::debug;

/// 快照以 `YYYYMMDDHHMMSS.png` 命名保存在归档目录下。
#[derive(Debug, Clone)]
pub struct SnapshotArchive {
    dir: PathBuf,
}

impl SnapshotArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_name(at: NaiveDateTime) -> String {
        format!("{}.png", at.format("%Y%m%d%H%M%S"))
    }

    /// 写入快照，目录不存在时自动创建。同一秒内的快照会覆盖前一张。
    pub async fn save(&self, bytes: &[u8], at: NaiveDateTime) -> Result<PathBuf, DeviceError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|err| DeviceError::Io(err.to_string()))?;
        let path = self.dir.join(Self::file_name(at));
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|err| DeviceError::Io(err.to_string()))?;
        debug!(
            target: "bridge.device",
            path = %path.display(),
            size = bytes.len(),
            "snapshot_saved"
        );
        Ok(path)
    }
}
