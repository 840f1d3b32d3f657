//! Writes received files into the download directory.

use std::path::{Path, PathBuf};

use anyhow::Context;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use fshare_transfer::{ReceivedFile, validate_file_name};

/// Gives up after this many ` (n)` variants of one name.
const MAX_SUFFIX: u32 = 1000;

/// Saves `file` under `dir` without overwriting anything already there.
///
/// The peer-announced name is validated first. If it is taken, ` (1)`,
/// ` (2)`, ... is inserted before the extension. Returns the written path.
pub async fn save_download(dir: &Path, file: &ReceivedFile) -> anyhow::Result<PathBuf> {
    validate_file_name(&file.name)?;
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;

    for n in 0..=MAX_SUFFIX {
        let path = dir.join(candidate_name(&file.name, n));
        let opened = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await;
        let out = match opened {
            Ok(out) => out,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e).with_context(|| format!("creating {}", path.display())),
        };
        write_or_remove(out, &path, &file.bytes).await?;
        tracing::debug!(path = %path.display(), bytes = file.bytes.len(), "download written");
        return Ok(path);
    }

    anyhow::bail!("no free name for {} in {}", file.name, dir.display())
}

/// Writes `bytes` to the freshly created `path`, deleting it on failure so
/// no truncated download is left behind.
async fn write_or_remove<W>(mut out: W, path: &Path, bytes: &[u8]) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let written = match out.write_all(bytes).await {
        Ok(()) => out.flush().await,
        Err(e) => Err(e),
    };
    drop(out);
    if let Err(e) = written {
        if let Err(remove) = tokio::fs::remove_file(path).await {
            tracing::warn!(path = %path.display(), "could not remove partial download: {remove}");
        }
        return Err(e).with_context(|| format!("writing {}", path.display()));
    }
    Ok(())
}

/// `name` for `n == 0`, otherwise `stem (n).ext`.
fn candidate_name(name: &str, n: u32) -> String {
    if n == 0 {
        return name.to_string();
    }
    match name.rfind('.') {
        Some(dot) if dot > 0 => format!("{} ({n}){}", &name[..dot], &name[dot..]),
        _ => format!("{name} ({n})"),
    }
}
