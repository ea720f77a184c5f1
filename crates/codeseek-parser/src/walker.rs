use std::path::{Path, PathBuf};

use codeseek_core::{CodeseekError, Result, ScanConfig};

/// Maximum file size to index (1 MiB).
const MAX_FILE_SIZE: u64 = 1_048_576;

/// Walk a repository and return the source files to index, sorted.
///
/// Respects `.gitignore`, prunes any directory whose name is listed in
/// `scan.exclude_dirs`, and keeps files whose extension is in
/// `scan.extensions` and whose size is at most 1 MiB. Returned paths include
/// `root` as a prefix.
///
/// # Errors
///
/// Returns [`CodeseekError::Config`] if `root` does not exist or is not a
/// directory.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use codeseek_core::ScanConfig;
/// use codeseek_parser::walker::scan_repository;
///
/// let files = scan_repository(Path::new("."), &ScanConfig::default()).unwrap();
/// for f in &files {
///     println!("{}", f.display());
/// }
/// ```
pub fn scan_repository(root: &Path, scan: &ScanConfig) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(CodeseekError::Config(format!(
            "repository root {} does not exist or is not a directory",
            root.display()
        )));
    }

    let excluded = scan.exclude_dirs.clone();
    let walker = ignore::WalkBuilder::new(root)
        .filter_entry(move |entry| {
            let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
            !(is_dir && entry.depth() > 0 && excluded.iter().any(|d| entry.file_name() == d.as_str()))
        })
        .build();

    let mut files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                tracing::debug!("skipping walk entry: {err}");
                continue;
            }
        };

        let Some(file_type) = entry.file_type() else {
            continue;
        };
        if !file_type.is_file() {
            continue;
        }

        let path = entry.path();
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if !scan.extensions.iter().any(|allowed| allowed == ext) {
            continue;
        }

        match entry.metadata() {
            Ok(m) if m.len() <= MAX_FILE_SIZE => {}
            Ok(m) => {
                tracing::debug!(path = %path.display(), bytes = m.len(), "skipping large file");
                continue;
            }
            Err(_) => continue,
        }

        files.push(path.to_path_buf());
    }

    files.sort();
    tracing::info!(root = %root.display(), files = files.len(), "scanned repository");
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn make_temp_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        fs::create_dir_all(root.join("app/models")).unwrap();
        fs::write(root.join("app/main.py"), "def main(): pass").unwrap();
        fs::write(root.join("app/models/user.py"), "class User: pass").unwrap();
        fs::write(root.join("setup.py"), "setup()").unwrap();

        fs::write(root.join("README.md"), "# Hello").unwrap();
        fs::write(root.join("app/schema.json"), "{}").unwrap();

        dir
    }

    fn relative(root: &Path, files: &[PathBuf]) -> Vec<String> {
        files
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect()
    }

    #[test]
    fn scan_finds_python_files_sorted() {
        let dir = make_temp_repo();
        let files = scan_repository(dir.path(), &ScanConfig::default()).unwrap();

        assert_eq!(
            relative(dir.path(), &files),
            vec!["app/main.py", "app/models/user.py", "setup.py"]
        );
    }

    #[test]
    fn scan_prunes_excluded_dirs() {
        let dir = make_temp_repo();
        let root = dir.path();
        for excluded in ["venv/lib", "__pycache__", "build", "node_modules/pkg"] {
            fs::create_dir_all(root.join(excluded)).unwrap();
            fs::write(root.join(excluded).join("junk.py"), "x = 1").unwrap();
        }

        let files = scan_repository(root, &ScanConfig::default()).unwrap();
        assert_eq!(files.len(), 3, "{files:?}");
    }

    #[test]
    fn scan_respects_gitignore() {
        let dir = make_temp_repo();
        let root = dir.path();

        // The ignore crate needs a .git dir to recognize .gitignore files
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::create_dir_all(root.join("generated")).unwrap();
        fs::write(root.join("generated/stubs.py"), "def stub(): pass").unwrap();
        fs::write(root.join(".gitignore"), "generated/\n").unwrap();

        let files = scan_repository(root, &ScanConfig::default()).unwrap();
        for p in &files {
            assert!(
                !p.starts_with(root.join("generated")),
                "gitignored file should be skipped: {}",
                p.display()
            );
        }
        assert_eq!(files.len(), 3);
    }

    #[test]
    fn scan_skips_large_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("huge.py"), "x".repeat(1_048_577)).unwrap();
        fs::write(root.join("ok.py"), "def ok(): pass").unwrap();

        let files = scan_repository(root, &ScanConfig::default()).unwrap();
        assert_eq!(files, vec![root.join("ok.py")]);
    }

    #[test]
    fn scan_honors_extension_list() {
        let dir = make_temp_repo();
        fs::write(dir.path().join("app/types.pyi"), "def f() -> int: ...").unwrap();
        let scan = ScanConfig {
            extensions: vec!["pyi".into()],
            ..ScanConfig::default()
        };

        let files = scan_repository(dir.path(), &scan).unwrap();
        assert_eq!(relative(dir.path(), &files), vec!["app/types.pyi"]);
    }

    #[test]
    fn missing_root_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = scan_repository(&dir.path().join("absent"), &ScanConfig::default());
        assert!(matches!(result, Err(CodeseekError::Config(_))));

        let file = dir.path().join("file.py");
        fs::write(&file, "").unwrap();
        let result = scan_repository(&file, &ScanConfig::default());
        assert!(matches!(result, Err(CodeseekError::Config(_))));
    }
}
