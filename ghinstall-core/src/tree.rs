// ghinstall-core/src/tree.rs

//! Text rendering of a checkout's layout plus the files an installer usually needs to read.

use crate::errors::Result;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;

pub const DEFAULT_TREE_DEPTH: usize = 3;

/// Entries starting with any of these prefixes are left out of the tree.
const SKIPPED_PREFIXES: &[&str] = &[".git", "__pycache__", "node_modules", "venv"];

/// Files that usually describe how to install a project, checked at the repository root.
pub const KEY_FILES: &[&str] = &[
    "README.md",
    "readme.md",
    "README.rst",
    "requirements.txt",
    "environment.yml",
    "environment.yaml",
    "setup.py",
    "pyproject.toml",
    "package.json",
    "Dockerfile",
];

/// Renders `path` as an indented tree, descending at most `max_depth` levels below it.
/// Directories past the limit are shown as `...`.
pub fn directory_tree(path: &Path, max_depth: usize) -> Result<String> {
    let mut output = String::new();
    render_level(path, "", max_depth, 0, &mut output)?;
    Ok(output)
}

fn render_level(path: &Path, prefix: &str, max_depth: usize, depth: usize, output: &mut String) -> Result<()> {
    if depth > max_depth {
        output.push_str(prefix);
        output.push_str("...\n");
        return Ok(());
    }

    let mut entries: Vec<String> = fs::read_dir(path)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| !SKIPPED_PREFIXES.iter().any(|p| name.starts_with(p)))
        .collect();
    entries.sort();

    let count = entries.len();
    for (i, name) in entries.into_iter().enumerate() {
        let is_last = i + 1 == count;
        let (connector, indent) = if is_last {
            ("└── ", "    ")
        } else {
            ("├── ", "│   ")
        };
        output.push_str(prefix);
        output.push_str(connector);
        output.push_str(&name);
        output.push('\n');

        let entry_path = path.join(&name);
        if entry_path.is_dir() {
            render_level(&entry_path, &format!("{}{}", prefix, indent), max_depth, depth + 1, output)?;
        }
    }
    Ok(())
}

/// Reads whichever [`KEY_FILES`] exist under `repo_path`. A file that exists but cannot be
/// read is reported by its error message rather than dropped.
pub fn collect_key_files(repo_path: &Path) -> BTreeMap<String, String> {
    let mut key_files = BTreeMap::new();
    for name in KEY_FILES {
        let full_path = repo_path.join(name);
        if !full_path.is_file() {
            continue;
        }
        let content = match fs::read_to_string(&full_path) {
            Ok(content) => content,
            Err(e) => {
                debug!(path = %full_path.display(), error = %e, "Failed to read key file");
                format!("Error reading file: {}", e)
            }
        };
        key_files.insert(name.to_string(), content);
    }
    key_files
}
