//! Local repository mirrors for repository-backed template sources.
//!
//! One mirror per repository identity lives under `<root>/<identity key>`, so
//! every contract that references the same repository shares a checkout.
//! Mirrors are refreshed by returning to the default branch, pulling, and
//! then checking out the requested ref.
use crate::error::{Error, Result};
use crate::integrity::identity_key;
use crate::location::LocationUrl;
use crate::process::ToolCommand;
use crate::template::read_template_file;
use crate::template::web::{extension_from_path, FetchedDocument};
use std::fs;
use std::path::{Component, Path, PathBuf};

const FALLBACK_BRANCH: &str = "master";

pub struct RepositoryFetcher {
    git: ToolCommand,
    mirrors_root: PathBuf,
}

impl RepositoryFetcher {
    pub fn new(git: ToolCommand, mirrors_root: impl Into<PathBuf>) -> Self {
        Self {
            git,
            mirrors_root: mirrors_root.into(),
        }
    }

    pub fn mirror_path(&self, location: &LocationUrl) -> PathBuf {
        self.mirrors_root
            .join(identity_key(&location.repository_identity()))
    }

    /// Bring the mirror for `location`'s repository up to date and check out
    /// its ref. Returns the mirror directory.
    pub fn ensure_local_mirror(&self, location: &LocationUrl) -> Result<PathBuf> {
        let local = self.mirror_path(location);
        tracing::info!(
            repository = %location.repository_identity(),
            mirror = %local.display(),
            reference = location.reference(),
            "syncing repository mirror"
        );
        self.sync(&location.clone_url(), &local, location.reference())?;
        Ok(local)
    }

    /// Clone or update `local` from `clone_url`, then check out `reference`
    /// (the default branch when empty).
    pub fn sync(&self, clone_url: &str, local: &Path, reference: &str) -> Result<()> {
        self.git.ensure_available()?;
        if local.join(".git").exists() {
            let default_branch = self.default_branch(local)?;
            self.git_in(local, &["checkout", &default_branch])?;
            self.git_in(local, &["pull", "--all"])?;
        } else {
            self.clone_into(clone_url, local)?;
        }
        let target = if reference.is_empty() {
            self.default_branch(local)?
        } else {
            reference.to_string()
        };
        self.git_in(local, &["checkout", &target])?;
        Ok(())
    }

    /// Read the file addressed by the location's inner path from a freshly
    /// synced mirror.
    pub fn fetch_file(&self, location: &LocationUrl) -> Result<FetchedDocument> {
        let inner = location.inner_path();
        if inner.is_empty() {
            return Err(Error::MalformedLocation {
                location: location.to_string(),
                reason: "location names a repository but no file inside it".to_string(),
            });
        }
        if Path::new(inner)
            .components()
            .any(|component| !matches!(component, Component::Normal(_)))
        {
            return Err(Error::MalformedLocation {
                location: location.to_string(),
                reason: format!("inner path {inner:?} must stay inside the repository"),
            });
        }
        let local = self.ensure_local_mirror(location)?;
        let path = local.join(inner);
        let content = read_template_file(&location.to_string(), &path)?;
        Ok(FetchedDocument {
            content,
            extension: extension_from_path(&path),
        })
    }

    /// Clone into a scratch directory beside the mirror and move it into place
    /// only on success; a failed clone leaves nothing behind.
    fn clone_into(&self, clone_url: &str, local: &Path) -> Result<()> {
        let parent = local.parent().unwrap_or(self.mirrors_root.as_path());
        fs::create_dir_all(parent).map_err(|err| Error::io("create mirror root", parent, err))?;
        let scratch = tempfile::Builder::new()
            .prefix(".clone-")
            .tempdir_in(parent)
            .map_err(|err| Error::io("create clone dir in", parent, err))?;
        let staged = scratch.path().join("checkout");
        let staged_arg = staged.to_string_lossy();
        self.git_checked(&["clone", clone_url, staged_arg.as_ref()], None)?;
        if local.exists() {
            fs::remove_dir_all(local).map_err(|err| Error::io("remove stale mirror", local, err))?;
        }
        fs::rename(&staged, local).map_err(|err| Error::io("publish mirror", local, err))?;
        Ok(())
    }

    fn default_branch(&self, local: &Path) -> Result<String> {
        let output = self.git.run(
            &["symbolic-ref", "--short", "refs/remotes/origin/HEAD"],
            Some(local),
        )?;
        let branch = output.stdout.trim();
        if output.success() && !branch.is_empty() {
            return Ok(branch.strip_prefix("origin/").unwrap_or(branch).to_string());
        }
        tracing::debug!(
            mirror = %local.display(),
            "remote HEAD unknown, assuming {FALLBACK_BRANCH}"
        );
        Ok(FALLBACK_BRANCH.to_string())
    }

    fn git_in(&self, local: &Path, args: &[&str]) -> Result<()> {
        self.git_checked(args, Some(local))
    }

    fn git_checked(&self, args: &[&str], cwd: Option<&Path>) -> Result<()> {
        let output = self.git.run(args, cwd)?;
        if output.success() {
            return Ok(());
        }
        Err(Error::RepositoryOperation {
            operation: self.git.describe(args),
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    fn git_available() -> bool {
        which::which("git").is_ok()
    }

    fn git(cwd: &Path, args: &[&str]) {
        let status = Command::new("git")
            .args(["-c", "user.name=Themis", "-c", "user.email=themis@example.com"])
            .args(args)
            .current_dir(cwd)
            .status()
            .expect("run git");
        assert!(status.success(), "git {args:?} failed");
    }

    fn upstream(dir: &Path) -> PathBuf {
        let upstream = dir.join("upstream");
        fs::create_dir_all(upstream.join("templates")).expect("mkdir");
        git(&upstream, &["init", "-q", "-b", "main"]);
        fs::write(upstream.join("templates/nda.html"), "v1 {{client}}\n").expect("write");
        git(&upstream, &["add", "."]);
        git(&upstream, &["commit", "-q", "-m", "v1"]);
        git(&upstream, &["tag", "v1"]);
        fs::write(upstream.join("templates/nda.html"), "v2 {{client}}\n").expect("write");
        git(&upstream, &["commit", "-q", "-am", "v2"]);
        upstream
    }

    fn fetcher(dir: &Path) -> RepositoryFetcher {
        RepositoryFetcher::new(
            ToolCommand::parse("git").expect("git command"),
            dir.join("repos"),
        )
    }

    #[test]
    fn sync_clones_then_checks_out_refs() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().expect("tempdir");
        let upstream = upstream(dir.path());
        let fetcher = fetcher(dir.path());
        let local = dir.path().join("repos").join("mirror");
        let url = upstream.to_string_lossy().into_owned();

        fetcher.sync(&url, &local, "v1").expect("sync v1");
        let content = fs::read_to_string(local.join("templates/nda.html")).expect("read");
        assert_eq!(content, "v1 {{client}}\n");

        fetcher.sync(&url, &local, "").expect("sync default");
        let content = fs::read_to_string(local.join("templates/nda.html")).expect("read");
        assert_eq!(content, "v2 {{client}}\n");
    }

    #[test]
    fn sync_pulls_new_commits_into_existing_mirror() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().expect("tempdir");
        let upstream = upstream(dir.path());
        let fetcher = fetcher(dir.path());
        let local = dir.path().join("repos").join("mirror");
        let url = upstream.to_string_lossy().into_owned();

        fetcher.sync(&url, &local, "v1").expect("first sync");
        fs::write(upstream.join("templates/nda.html"), "v3 {{client}}\n").expect("write");
        git(&upstream, &["commit", "-q", "-am", "v3"]);

        fetcher.sync(&url, &local, "main").expect("second sync");
        let content = fs::read_to_string(local.join("templates/nda.html")).expect("read");
        assert_eq!(content, "v3 {{client}}\n");
    }

    #[test]
    fn failed_clone_reports_output_and_leaves_no_mirror() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().expect("tempdir");
        let fetcher = fetcher(dir.path());
        let local = dir.path().join("repos").join("mirror");
        let missing = dir.path().join("no-such-repo");

        let err = fetcher
            .sync(&missing.to_string_lossy(), &local, "")
            .expect_err("clone fails");
        match err {
            Error::RepositoryOperation {
                operation,
                exit_code,
                stderr,
                ..
            } => {
                assert!(operation.starts_with("git clone"));
                assert_ne!(exit_code, Some(0));
                assert!(!stderr.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!local.exists());
        let leftovers = fs::read_dir(dir.path().join("repos")).expect("read dir").count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn unknown_ref_is_a_repository_error() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().expect("tempdir");
        let upstream = upstream(dir.path());
        let fetcher = fetcher(dir.path());
        let local = dir.path().join("repos").join("mirror");
        let err = fetcher
            .sync(&upstream.to_string_lossy(), &local, "no-such-tag")
            .expect_err("bad ref");
        assert!(matches!(err, Error::RepositoryOperation { .. }));
    }

    #[test]
    fn mirrors_are_shared_per_repository() {
        let fetcher = fetcher(Path::new("/profile"));
        let a = LocationUrl::parse("git://github.com:company/repo.git/nda.html#v1").expect("parse");
        let b = LocationUrl::parse("git://github.com:company/repo.git/msa/terms.md").expect("parse");
        let c = LocationUrl::parse("git://github.com:company/other.git/nda.html").expect("parse");
        assert_eq!(fetcher.mirror_path(&a), fetcher.mirror_path(&b));
        assert_ne!(fetcher.mirror_path(&a), fetcher.mirror_path(&c));
        assert!(fetcher.mirror_path(&a).starts_with("/profile/repos"));
    }

    #[test]
    fn inner_path_may_not_escape_the_mirror() {
        let fetcher = fetcher(Path::new("/profile"));
        let location =
            LocationUrl::parse("git://github.com:company/repo.git/../../etc/passwd").expect("parse");
        let err = fetcher.fetch_file(&location).expect_err("escape");
        assert!(matches!(err, Error::MalformedLocation { .. }));
    }
}
