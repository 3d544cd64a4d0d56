use std::path::Path;

use crate::TransferError;

/// Checks that `path` names an existing regular file and returns its size.
pub async fn validate_source(path: &Path) -> Result<u64, TransferError> {
    let meta = match tokio::fs::metadata(path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(TransferError::InvalidPath(format!(
                "source not found: {}",
                path.display()
            )));
        }
        Err(e) => return Err(e.into()),
    };

    if !meta.is_file() {
        return Err(TransferError::InvalidPath(format!(
            "source is not a regular file: {}",
            path.display()
        )));
    }

    Ok(meta.len())
}

/// Returns the final path component as an upload file name.
pub fn source_file_name(path: &Path) -> Result<String, TransferError> {
    path.file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| TransferError::InvalidPath(format!("no file name: {}", path.display())))
}
