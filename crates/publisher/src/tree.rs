use std::path::{Path, PathBuf};
use tokio::fs;

/// 目录树下全部文件，返回相对 `root` 的路径，按字典序
pub async fn list_files(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                pending.push(path);
            } else if let Ok(relative) = path.strip_prefix(root) {
                files.push(relative.to_path_buf());
            }
        }
    }

    files.sort();
    Ok(files)
}

pub async fn copy_tree(from: &Path, to: &Path) -> std::io::Result<usize> {
    let files = list_files(from).await?;
    for relative in &files {
        let target = to.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(from.join(relative), target).await?;
    }
    Ok(files.len())
}

/// 目录不存在时视为成功
pub async fn remove_tree(path: &Path) -> std::io::Result<()> {
    match fs::remove_dir_all(path).await {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_copy_tree_keeps_layout() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("page")).await.unwrap();
        fs::write(src.join("llms.txt"), "root").await.unwrap();
        fs::write(src.join("page/page-segment-1.md"), "seg").await.unwrap();

        let dst = dir.path().join("dst");
        let copied = copy_tree(&src, &dst).await.unwrap();

        assert_eq!(copied, 2);
        assert_eq!(
            list_files(&dst).await.unwrap(),
            vec![
                PathBuf::from("llms.txt"),
                PathBuf::from("page/page-segment-1.md")
            ]
        );
    }

    #[tokio::test]
    async fn test_remove_missing_tree_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        assert!(remove_tree(&dir.path().join("nope")).await.is_ok());
    }
}
