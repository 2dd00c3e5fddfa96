//! Commits refreshed artifacts to the git repository that hosts them.

use crate::error::{PipelineError, Result};
use chrono::Local;
use git2::{Cred, IndexAddOption, Oid, PushOptions, RemoteCallbacks, Repository, Signature};
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

pub fn commit_message(date: chrono::NaiveDate) -> String {
    format!("Data updated as at {}", date.format("%d-%m-%Y"))
}

/// Stage `paths` (or everything when empty), commit, and optionally push to `origin`.
///
/// Returns `None` when the staged tree matches `HEAD` and there is nothing to commit.
#[instrument(skip(paths), fields(repo = %repo_dir.display()))]
pub fn commit_artifacts(repo_dir: &Path, paths: &[PathBuf], push: bool) -> Result<Option<Oid>> {
    let repo = Repository::discover(repo_dir)?;
    let workdir = repo
        .workdir()
        .ok_or_else(|| PipelineError::Config("cannot commit in a bare repository".to_string()))?
        .canonicalize()?;

    let mut index = repo.index()?;
    if paths.is_empty() {
        index.add_all(["*"], IndexAddOption::DEFAULT, None)?;
    } else {
        for path in paths {
            let absolute = path.canonicalize()?;
            let relative = absolute.strip_prefix(&workdir).map_err(|_| {
                PipelineError::Config(format!(
                    "'{}' is outside the repository at '{}'",
                    path.display(),
                    workdir.display()
                ))
            })?;
            index.add_path(relative)?;
        }
    }
    index.write()?;
    let tree = repo.find_tree(index.write_tree()?)?;

    let parent = match repo.head() {
        Ok(head) => Some(head.peel_to_commit()?),
        Err(_) => None,
    };
    if parent.as_ref().map(|p| p.tree_id()) == Some(tree.id()) {
        info!("No artifact changes to commit");
        return Ok(None);
    }

    let signature = repo
        .signature()
        .or_else(|_| Signature::now("msa_pipeline", "msa_pipeline@localhost"))?;
    let message = commit_message(Local::now().date_naive());
    let parents: Vec<_> = parent.iter().collect();
    let oid = repo.commit(Some("HEAD"), &signature, &signature, &message, &tree, &parents)?;
    info!("📝 Committed {} ({})", oid, message);

    if push {
        push_head(&repo)?;
    }
    Ok(Some(oid))
}

fn push_head(repo: &Repository) -> Result<()> {
    let head = repo.head()?;
    let branch = head
        .shorthand()
        .ok_or_else(|| PipelineError::Config("HEAD is not a named branch".to_string()))?;
    let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");

    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(|_url, username, _allowed| {
        Cred::ssh_key_from_agent(username.unwrap_or("git"))
    });
    let mut options = PushOptions::new();
    options.remote_callbacks(callbacks);

    let mut remote = repo.find_remote("origin")?;
    remote.push(&[refspec.as_str()], Some(&mut options))?;
    info!("⬆️  Pushed {} to origin", branch);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn init_repo(dir: &Path) -> Repository {
        let repo = Repository::init(dir).unwrap();
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "Test").unwrap();
        config.set_str("user.email", "test@example.com").unwrap();
        repo
    }

    #[test]
    fn message_uses_day_month_year() {
        let date = chrono::NaiveDate::from_ymd_opt(2020, 7, 4).unwrap();
        assert_eq!(commit_message(date), "Data updated as at 04-07-2020");
    }

    #[test]
    fn commits_artifacts_once() {
        let dir = tempdir().unwrap();
        let repo = init_repo(dir.path());
        let artifact = dir.path().join("all_msas_cases.csv");
        std::fs::write(&artifact, "msas,2020-03-01\nFoo,1\n").unwrap();

        let first = commit_artifacts(dir.path(), &[artifact.clone()], false).unwrap();
        let oid = first.expect("first commit");
        let commit = repo.find_commit(oid).unwrap();
        assert!(commit.message().unwrap().starts_with("Data updated as at "));
        assert!(commit.tree().unwrap().get_name("all_msas_cases.csv").is_some());

        let second = commit_artifacts(dir.path(), &[artifact], false).unwrap();
        assert!(second.is_none());
    }
}
