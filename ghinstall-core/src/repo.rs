// ghinstall-core/src/repo.rs

//! Cloning and refreshing the repository an agent is installing.

use crate::errors::{InstallError, Result};
use crate::tree::{collect_key_files, directory_tree};
use git2::build::CheckoutBuilder;
use git2::Repository;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const CLONE_DIR_PREFIX: &str = "github_install_";

/// What an agent needs to plan an installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepoAnalysis {
    pub repo_url: String,
    pub repo_path: PathBuf,
    pub structure: String,
    pub key_files: BTreeMap<String, String>,
}

/// `<root>/github_install_<first 12 hex chars of sha256(url)>`, with `root` defaulting
/// to the OS temp directory.
pub fn default_clone_dir(repo_url: &str, clone_root: Option<&Path>) -> PathBuf {
    let encoded = hex::encode(Sha256::digest(repo_url.as_bytes()));
    let short = &encoded[..12];
    let root = clone_root.map(Path::to_path_buf).unwrap_or_else(env::temp_dir);
    root.join(format!("{}{}", CLONE_DIR_PREFIX, short))
}

/// Clones `repo_url`, or refreshes an existing checkout of it, and returns the checkout path.
///
/// When `local_dir` is given it is used as is, and an existing non-empty directory that is
/// not a checkout of `repo_url` is refused rather than replaced. Without `local_dir` the
/// checkout lives in a directory derived from the URL, which is ours to recreate.
pub fn clone_or_update(repo_url: &str, local_dir: Option<&Path>, clone_root: Option<&Path>) -> Result<PathBuf> {
    let owned = local_dir.is_none();
    let target = match local_dir {
        Some(dir) => dir.to_path_buf(),
        None => default_clone_dir(repo_url, clone_root),
    };
    // A caller's existing (empty) directory is left in place if the clone fails.
    let remove_on_failure = owned || !target.exists();

    if target.exists() {
        match open_matching(&target, repo_url) {
            Ok(repo) => {
                info!(path = %target.display(), "Reusing existing checkout");
                pull(&repo)?;
                return Ok(target);
            }
            Err(reason) if owned => {
                warn!(path = %target.display(), %reason, "Discarding unusable checkout");
                fs::remove_dir_all(&target)?;
            }
            Err(reason) => {
                if !is_empty_dir(&target)? {
                    debug!(path = %target.display(), %reason, "Refusing to clone into occupied directory");
                    return Err(InstallError::DirectoryOccupied(target));
                }
            }
        }
    }

    fs::create_dir_all(&target)?;
    info!(url = repo_url, path = %target.display(), "Cloning repository");
    match Repository::clone(repo_url, &target) {
        Ok(_) => Ok(target),
        Err(e) => {
            warn!(url = repo_url, error = %e, "Clone failed");
            if remove_on_failure {
                if let Err(cleanup) = fs::remove_dir_all(&target) {
                    debug!(path = %target.display(), error = %cleanup, "Failed to remove partial checkout");
                }
            }
            Err(e.into())
        }
    }
}

/// Clones (or refreshes) the repository and gathers its layout and key files.
pub fn analyze_repository(
    repo_url: &str,
    local_dir: Option<&Path>,
    clone_root: Option<&Path>,
    tree_depth: usize,
) -> Result<RepoAnalysis> {
    let repo_path = clone_or_update(repo_url, local_dir, clone_root)?;
    let structure = directory_tree(&repo_path, tree_depth)?;
    let key_files = collect_key_files(&repo_path);
    Ok(RepoAnalysis {
        repo_url: repo_url.to_string(),
        repo_path,
        structure,
        key_files,
    })
}

fn open_matching(path: &Path, repo_url: &str) -> std::result::Result<Repository, String> {
    let repo = Repository::open(path).map_err(|e| e.message().to_string())?;
    if repo.is_bare() {
        return Err("repository is bare".to_string());
    }
    let origin_url = repo
        .find_remote("origin")
        .map_err(|e| e.message().to_string())?
        .url()
        .map(str::to_owned);
    match origin_url {
        Some(url) if url == repo_url => Ok(repo),
        Some(url) => Err(format!("origin points at {}", url)),
        None => Err("origin has no URL".to_string()),
    }
}

/// Fetches the current branch from `origin` and fast-forwards to it. Diverged history is
/// left untouched.
fn pull(repo: &Repository) -> Result<()> {
    let head = repo.head()?;
    let Some(branch) = head.shorthand().map(str::to_owned) else {
        return Ok(());
    };
    if !head.is_branch() {
        debug!("HEAD is detached, skipping pull");
        return Ok(());
    }

    let mut remote = repo.find_remote("origin")?;
    remote.fetch(&[branch.as_str()], None, None)?;

    let fetch_head = repo.find_reference("FETCH_HEAD")?;
    let fetched = repo.reference_to_annotated_commit(&fetch_head)?;
    let (analysis, _) = repo.merge_analysis(&[&fetched])?;

    if analysis.is_up_to_date() {
        debug!(branch = %branch, "Checkout already up to date");
        return Ok(());
    }
    if !analysis.is_fast_forward() {
        warn!(branch = %branch, "Local branch has diverged from origin, leaving checkout as is");
        return Ok(());
    }

    let refname = format!("refs/heads/{}", branch);
    let mut reference = repo.find_reference(&refname)?;
    reference.set_target(fetched.id(), "ghinstall: fast-forward")?;
    repo.set_head(&refname)?;
    repo.checkout_head(Some(CheckoutBuilder::default().force()))?;
    info!(branch = %branch, commit = %fetched.id(), "Fast-forwarded checkout");
    Ok(())
}

fn is_empty_dir(path: &Path) -> Result<bool> {
    if !path.is_dir() {
        return Ok(false);
    }
    Ok(fs::read_dir(path)?.next().is_none())
}
