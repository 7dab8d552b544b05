//! Per-cell working directories
//!
//! Every matrix cell runs in its own copy of the workspace, so sibling cells
//! never see each other's files or cache directories.

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Directory under the workspace reserved for gatekeep's own state
pub const STATE_DIR: &str = ".gatekeep";

/// Working directory of cell `index` of `job_id`
pub fn cell_workdir(workspace: &Path, job_id: &str, index: usize) -> PathBuf {
    workspace
        .join(STATE_DIR)
        .join("cells")
        .join(format!("{}-{}", job_id, index))
}

/// Recreate `workdir` as a fresh copy of `workspace`
///
/// Leftovers from an earlier run are removed first. The state directory
/// itself is never copied.
pub async fn prepare(workspace: &Path, workdir: &Path) -> io::Result<usize> {
    match fs::remove_dir_all(workdir).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    fs::create_dir_all(workdir).await?;
    copy_contents(workspace, workdir, true).await
}

async fn copy_contents(src: &Path, dst: &Path, top_level: bool) -> io::Result<usize> {
    fs::create_dir_all(dst).await?;

    let mut count = 0;
    let mut entries = fs::read_dir(src).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if top_level && name == STATE_DIR {
            continue;
        }
        let src_path = entry.path();
        let dst_path = dst.join(&name);

        let file_type = entry.file_type().await?;
        if file_type.is_dir() {
            count += Box::pin(copy_contents(&src_path, &dst_path, false)).await?;
        } else if file_type.is_file() {
            fs::copy(&src_path, &dst_path).await?;
            count += 1;
        } else if file_type.is_symlink() {
            #[cfg(unix)]
            {
                let target = fs::read_link(&src_path).await?;
                fs::symlink(&target, &dst_path).await?;
                count += 1;
            }
        }
    }

    Ok(count)
}
