//! Reader/writer-gated git worktree (§5/C5), grounded on
//! `original_source/app/plugin/repo/git_direct.py`.
//!
//! Every process gets its own working tree at `<base>/<pid>`. A "dirty"
//! read skips the pull-before-read step unless the last fetch is older
//! than `dirty_max_age` minutes; every write always pulls first and
//! pushes (or resets+cleans, or falls back to a fresh clone) after.
//!
//! The upgrade-for-pull step and the reader/writer counter follow the
//! original's `asyncio.Lock`/`asyncio.Condition` pair one for one, with
//! `tokio::sync::{Mutex, Notify}` standing in for them (per SPEC_FULL.md
//! §5) and an `Arc<tokio::sync::Mutex<()>>` standing in for the writer
//! lock so its `OwnedMutexGuard` can be held across the guard's lifetime.
//!
//! `Notify::notify_waiters()` stores no permit: it only wakes waiters
//! already enrolled in its queue, so the count check and the wait must
//! enroll atomically with releasing `reader_count`, the way
//! `asyncio.Condition.wait()` releases its lock and enrolls in one step.
//! Both `reader()` and `writer()` below build the `Notified` future and
//! call `enable()` on it *before* dropping the `reader_count` guard, so a
//! `release()` that runs in the gap can never fire into an empty queue.

use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::{Mutex, Notify, OwnedMutexGuard};
use yac_core::error::{Error, Result};
use yac_core::types::User;

use crate::diff::unified_diff;
use crate::git;

struct GateState {
    reader_count: Mutex<i32>,
    no_readers: Notify,
    writer_lock: Arc<Mutex<()>>,
}

pub struct GitRepo {
    gate: Arc<GateState>,
    base_path: String,
    url: String,
    branch: String,
    ssh_key_file: String,
    ssh_known_hosts_file: String,
    dirty_max_age_minutes: u64,
    /// The resolved type's `details.file` pattern. A plain `String` would
    /// force every caller to serialize behind `&mut self`, defeating the
    /// reader/writer gate above; an `RwLock` lets `update_details` (set once
    /// per request, from the freshly loaded spec) interleave freely with
    /// concurrent readers/writers that only ever read it.
    fpath: RwLock<String>,
}

impl GitRepo {
    pub fn new(
        base_path: impl Into<String>,
        url: impl Into<String>,
        branch: impl Into<String>,
        ssh_key_file: impl Into<String>,
        ssh_known_hosts_file: impl Into<String>,
        dirty_max_age_minutes: u64,
    ) -> Self {
        GitRepo {
            gate: Arc::new(GateState {
                reader_count: Mutex::new(0),
                no_readers: Notify::new(),
                writer_lock: Arc::new(Mutex::new(())),
            }),
            base_path: base_path.into(),
            url: url.into(),
            branch: branch.into(),
            ssh_key_file: ssh_key_file.into(),
            ssh_known_hosts_file: ssh_known_hosts_file.into(),
            dirty_max_age_minutes,
            fpath: RwLock::new(String::new()),
        }
    }

    /// `type.details.file`, a `{name}`-format-string path pattern, e.g.
    /// `hosts/{name}.yml`. Validity of the pattern (it must contain
    /// `{name}`) is only checked when a reader/writer lock is next
    /// acquired, matching the original's per-use check.
    pub fn update_details(&self, file_pattern: impl Into<String>) -> Result<()> {
        *self.fpath.write().unwrap() = file_pattern.into();
        Ok(())
    }

    fn fpath(&self) -> String {
        self.fpath.read().unwrap().clone()
    }

    /// An empty pattern means no type has been selected yet for this
    /// process (or the current request has none, e.g. listing types) —
    /// only a non-empty, malformed pattern is a specs error.
    fn check_fpath(&self) -> Result<()> {
        let fpath = self.fpath();
        if !fpath.is_empty() && !fpath.contains("{name}") {
            return Err(Error::repo_specs("In type details: file does not contain {name}"));
        }
        Ok(())
    }

    fn worktree_path(&self) -> String {
        format!("{}/{}", self.base_path, std::process::id())
    }

    fn entity_path(&self, name: &str) -> String {
        format!("{}/{}", self.worktree_path(), self.fpath().replace("{name}", name))
    }

    fn git_env(&self, user: Option<&User>) -> std::collections::HashMap<String, String> {
        let (user_name, user_email) = match user {
            Some(u) => (u.full_name.clone(), u.email.clone()),
            None => ("Unknown".to_string(), "<>".to_string()),
        };
        let mut env = std::collections::HashMap::new();
        env.insert("EMAIL".to_string(), user_email.clone());
        env.insert("GIT_AUTHOR_EMAIL".to_string(), user_email);
        env.insert("GIT_AUTHOR_NAME".to_string(), format!("{user_name} (via YAC)"));
        env.insert(
            "GIT_SSH_COMMAND".to_string(),
            format!("ssh -o UserKnownHostsFile={} -i {}", self.ssh_known_hosts_file, self.ssh_key_file),
        );
        env.insert("LANG".to_string(), "C".to_string());
        env
    }

    fn open_git(&self, user: Option<&User>) -> git::Repo {
        git::Repo::new(self.worktree_path(), self.git_env(user))
    }

    async fn is_outdated(&self, repo: &git::Repo) -> bool {
        let last_fetch = match repo.get_fetch_time().await {
            Ok(t) => t,
            Err(e) => {
                tracing::error!("{e}");
                return true;
            }
        };
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        now.saturating_sub(last_fetch) > 60 * self.dirty_max_age_minutes
    }

    async fn pull(&self, repo: &mut git::Repo) -> Result<()> {
        let pulled = async {
            if !repo.loaded {
                repo.load().await?;
            }
            tracing::debug!("Pulling git repo at {}", repo.path());
            repo.pull(5).await
        }
        .await;

        if pulled.is_ok() {
            return Ok(());
        }

        let _ = tokio::fs::remove_dir_all(repo.path()).await;
        tracing::info!("Cloning git repo to {}", repo.path());
        repo.clone(&self.url, &self.branch, 1, 30)
            .await
            .map_err(|e| Error::repo(format!("Cannot clone repo to {}: {e}", repo.path())))
    }

    async fn cleanup(&self, repo: &git::Repo) -> Result<()> {
        if !repo.is_dirty().await {
            return Ok(());
        }
        tracing::debug!("Cleaning git repo at {}", repo.path());
        let target = format!("origin/{}", self.branch);
        let cleaned = async {
            repo.reset(&target, true).await.map_err(|e| e.to_string())?;
            repo.clean(true, true).await.map_err(|e| e.to_string())?;
            if repo.is_dirty().await {
                return Err("repo still dirty after reset+clean".to_string());
            }
            Ok(())
        }
        .await;
        if cleaned.is_err() {
            let mut repo_mut = self.open_git(None);
            self.pull(&mut repo_mut).await?;
        }
        Ok(())
    }

    async fn push(&self, repo: &git::Repo, files: &[String], msg: &str) -> Result<()> {
        let result = async {
            repo.add(files).await.map_err(|e| e.to_string())?;
            repo.commit(&format!("[YAC] {msg}")).await.map_err(|e| e.to_string())?;
            tracing::debug!("Pushing new git commit from {} to remote", repo.path());
            repo.push(5).await.map_err(|e| e.to_string())
        }
        .await;

        if let Err(e) = result {
            self.cleanup(repo).await?;
            return Err(Error::repo(format!("Unable to commit and push changes from {}: {e}", repo.path())));
        }
        self.cleanup(repo).await
    }

    /// Acquires the reader lock, pulling first if the worktree is not
    /// `dirty`-exempt or the last fetch is stale. Returns a guard whose
    /// `release()` must be called once reading is done.
    pub async fn reader(&self, user: Option<&User>, dirty: bool) -> Result<ReaderGuard> {
        self.check_fpath()?;
        let mut repo = self.open_git(user);

        if !dirty || self.is_outdated(&repo).await {
            tracing::debug!("Upgrading lock to git writer lock to pull repo at {}", repo.path());
            let writer = self.writer(user).await?;
            self.pull_under_writer_lock(&mut repo).await?;
            writer.release().await;
        }

        tracing::debug!("Acquiring git reader lock for {}...", repo.path());
        loop {
            let mut count = self.gate.reader_count.lock().await;
            if *count != -1 {
                *count += 1;
                break;
            }
            // Enroll as a waiter *before* releasing the count lock, so a
            // `release()` running in the gap between `drop(count)` and
            // `notified.await` cannot fire `notify_waiters()` into an empty
            // queue and strand us here forever (see gate.rs module docs).
            let notified = self.gate.no_readers.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            drop(count);
            notified.await;
        }
        tracing::debug!("... git reader lock for {} acquired!", repo.path());

        Ok(ReaderGuard { gate: self.gate.clone(), repo })
    }

    async fn pull_under_writer_lock(&self, repo: &mut git::Repo) -> Result<()> {
        self.pull(repo).await
    }

    /// Acquires the writer lock exclusively, pulls, and returns a guard
    /// whose `release()` must be called once writing is done.
    pub async fn writer(&self, user: Option<&User>) -> Result<WriterGuard> {
        self.check_fpath()?;
        let mut repo = self.open_git(user);

        tracing::debug!("Acquiring git writer lock for {}...", repo.path());
        let writer_permit = self.gate.writer_lock.clone().lock_owned().await;
        loop {
            let mut count = self.gate.reader_count.lock().await;
            if *count == 0 {
                *count = -1;
                break;
            }
            // Same enable-before-unlock ordering as the reader above: the
            // waiter must be enrolled while still holding `count` so the
            // last `ReaderGuard::release()` cannot race us into a lost
            // wakeup.
            let notified = self.gate.no_readers.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            drop(count);
            notified.await;
        }
        tracing::debug!("... git writer lock for {} acquired!", repo.path());

        self.pull(&mut repo).await?;

        Ok(WriterGuard { gate: self.gate.clone(), repo, _permit: writer_permit })
    }

    pub async fn get_hash(&self, user: Option<&User>) -> Result<String> {
        self.open_git(user).get_hash().await.map_err(|e| Error::repo(e.to_string()))
    }
}

pub struct ReaderGuard {
    gate: Arc<GateState>,
    repo: git::Repo,
}

impl ReaderGuard {
    pub async fn release(self) {
        tracing::debug!("Releasing git reader lock for {}!", self.repo.path());
        let mut count = self.gate.reader_count.lock().await;
        *count -= 1;
        if *count == 0 {
            self.gate.no_readers.notify_waiters();
        }
    }
}

pub struct WriterGuard {
    gate: Arc<GateState>,
    repo: git::Repo,
    _permit: OwnedMutexGuard<()>,
}

impl WriterGuard {
    pub async fn release(self) {
        let mut count = self.gate.reader_count.lock().await;
        *count = 0;
        self.gate.no_readers.notify_waiters();
    }
}

// --- file-level operations, shared by reader/writer guard impls -----------------

pub struct FileOps<'a> {
    repo: &'a GitRepo,
}

impl GitRepo {
    pub fn files(&self) -> FileOps<'_> {
        FileOps { repo: self }
    }
}

async fn read_file(path: &str) -> Result<String> {
    tokio::fs::read_to_string(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::repo_not_found(format!("The file {path} does not exist"))
        } else {
            Error::repo(format!("Could not read file {path}: {e}"))
        }
    })
}

impl<'a> FileOps<'a> {
    pub async fn list(&self) -> Result<Vec<String>> {
        let dir_path = self.repo.worktree_path();
        let fpath = self.repo.fpath();
        let prefix = fpath.split("{name}").next().unwrap_or("");
        let suffix = fpath.splitn(2, "{name}").nth(1).unwrap_or("");
        let dir = Path::new(&dir_path).join(prefix.trim_end_matches('/'));

        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(Error::repo(format!("Could not list files at {}: {e}", dir.display()))),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::repo(format!("Could not list files at {}: {e}", dir.display())))?
        {
            if let Some(name) = entry.file_name().to_str().and_then(|f| f.strip_suffix(suffix)) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    pub async fn exists(&self, name: &str) -> bool {
        tokio::fs::try_exists(self.repo.entity_path(name)).await.unwrap_or(false)
    }

    pub async fn is_link(&self, name: &str) -> Result<bool> {
        match tokio::fs::symlink_metadata(self.repo.entity_path(name)).await {
            Ok(meta) => Ok(meta.file_type().is_symlink()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::repo(format!("Could not read file {}: {e}", self.repo.entity_path(name)))),
        }
    }

    pub async fn get_link(&self, name: &str) -> Result<String> {
        let path = self.repo.entity_path(name);
        if !self.is_link(name).await? {
            return Err(Error::repo(format!("File {name} is not a link")));
        }
        let dest = tokio::fs::canonicalize(&path)
            .await
            .map_err(|e| Error::repo(format!("Link {path} has an illegal destination: {e}")))?;
        let base = tokio::fs::canonicalize(self.repo.worktree_path())
            .await
            .map_err(|e| Error::repo(e.to_string()))?;
        let rel = dest
            .strip_prefix(&base)
            .map_err(|_| Error::repo(format!("Link {path} has an illegal destination: {}", dest.display())))?;

        let fpath = self.repo.fpath();
        let prefix = fpath.split("{name}").next().unwrap_or("");
        let suffix = fpath.splitn(2, "{name}").nth(1).unwrap_or("");
        let rel_str = rel.to_string_lossy();
        rel_str
            .strip_prefix(prefix.trim_start_matches('/'))
            .and_then(|s| s.strip_suffix(suffix))
            .map(|s| s.to_string())
            .ok_or_else(|| Error::repo(format!("Link {path} has an illegal destination: {rel_str}")))
    }

    pub async fn get(&self, name: &str) -> Result<String> {
        read_file(&self.repo.entity_path(name)).await
    }

    pub async fn get_specs(&self, relative_path: &str) -> Result<String> {
        read_file(&format!("{}/{relative_path}", self.repo.worktree_path())).await
    }

    pub async fn write(
        &self,
        writer: &WriterGuard,
        name: &str,
        content_old: &str,
        content_new: &str,
        msg: &str,
    ) -> Result<(String, String)> {
        let path = self.repo.fpath().replace("{name}", name);
        let file = self.repo.entity_path(name);

        if self.exists(name).await {
            let content = self.get(name).await?;
            if content != content_old {
                return Err(Error::repo_conflict("The data has changed in the meantime"));
            }
            if content == content_new {
                return Err(Error::repo_client("Cannot write without changing anything"));
            }
            if self.is_link(name).await? {
                return Err(Error::repo_client("Modifying links is not allowed"));
            }
        } else if !content_old.is_empty() {
            return Err(Error::repo_conflict("The file has been deleted in the meantime"));
        }

        if let Some(parent) = Path::new(&file).parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| Error::repo(e.to_string()))?;
        }
        tokio::fs::write(&file, content_new)
            .await
            .map_err(|e| Error::repo(format!("Could not write file {file}: {e}")))?;

        self.repo.push(&writer.repo, &[file], msg).await?;
        let patch = unified_diff(content_old, content_new, &format!("a/{path}"), &format!("b/{path}"));
        let hash = self.repo.get_hash(None).await?;
        Ok((hash, patch))
    }

    pub async fn write_rename(
        &self,
        writer: &WriterGuard,
        name_old: &str,
        name_new: &str,
        content_old: &str,
        content_new: &str,
        msg: &str,
    ) -> Result<(String, String)> {
        if name_old == name_new {
            return Err(Error::repo_client("Cannot rename without changing the name"));
        }
        let path_old = self.repo.fpath().replace("{name}", name_old);
        let path_new = self.repo.fpath().replace("{name}", name_new);
        let file_old = self.repo.entity_path(name_old);
        let file_new = self.repo.entity_path(name_new);

        if self.exists(name_old).await {
            let content = self.get(name_old).await?;
            if content != content_old {
                return Err(Error::repo_conflict("The data has changed in the meantime"));
            }
            if self.is_link(name_old).await? {
                return Err(Error::repo_client("Modifying links is not allowed"));
            }
        } else {
            return Err(Error::repo_conflict("The file has been deleted in the meantime"));
        }
        if self.exists(name_new).await {
            return Err(Error::repo_client("The file already exists"));
        }

        if let Some(parent) = Path::new(&file_new).parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| Error::repo(e.to_string()))?;
        }
        tokio::fs::write(&file_new, content_new)
            .await
            .map_err(|e| Error::repo(format!("Could not write file {file_new}: {e}")))?;
        tokio::fs::remove_file(&file_old)
            .await
            .map_err(|e| Error::repo(format!("Could not delete file {file_old}: {e}")))?;

        self.repo.push(&writer.repo, &[file_old, file_new], msg).await?;
        let patch = unified_diff(content_old, content_new, &format!("a/{path_old}"), &format!("b/{path_new}"));
        let hash = self.repo.get_hash(None).await?;
        Ok((hash, patch))
    }

    pub async fn copy(&self, writer: &WriterGuard, name_dest: &str, name_src: &str, msg: &str) -> Result<(String, String)> {
        if self.exists(name_dest).await {
            return Err(Error::repo_client("The file already exists"));
        }
        let path_dest = self.repo.fpath().replace("{name}", name_dest);
        let content = self.get(name_src).await?;
        let file_dest = self.repo.entity_path(name_dest);

        if let Some(parent) = Path::new(&file_dest).parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| Error::repo(e.to_string()))?;
        }
        tokio::fs::write(&file_dest, &content)
            .await
            .map_err(|e| Error::repo(format!("Could not create file {file_dest}: {e}")))?;

        self.repo.push(&writer.repo, &[file_dest], msg).await?;
        let patch = unified_diff("", &content, &format!("a/{path_dest}"), &format!("b/{path_dest}"));
        let hash = self.repo.get_hash(None).await?;
        Ok((hash, patch))
    }

    pub async fn link(&self, writer: &WriterGuard, name_link: &str, name_src: &str, msg: &str) -> Result<(String, String)> {
        if !self.exists(name_src).await {
            return Err(Error::repo_not_found("The file does not exist"));
        }
        let path_link = self.repo.fpath().replace("{name}", name_link);
        let link_path = self.repo.entity_path(name_link);
        let src_path = self.repo.entity_path(name_src);

        if let Some(parent) = Path::new(&link_path).parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| Error::repo(e.to_string()))?;
        }
        let relative = make_relative(&src_path, &link_path);
        tokio::fs::symlink(&relative, &link_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                Error::repo_client("The file already exists")
            } else {
                Error::repo(format!("Could not create symlink {link_path}: {e}"))
            }
        })?;

        self.repo.push(&writer.repo, &[link_path], msg).await?;
        let patch = unified_diff("", name_src, &format!("a/{path_link}"), &format!("b/{path_link}"));
        let hash = self.repo.get_hash(None).await?;
        Ok((hash, patch))
    }

    /// True iff any symlink under the entity directory resolves to `name`'s
    /// file.
    pub async fn has_link(&self, name: &str) -> Result<bool> {
        let file_name = self.repo.entity_path(name);
        let target = match tokio::fs::canonicalize(&file_name).await {
            Ok(p) => p,
            Err(_) => return Ok(false),
        };
        let dir = match Path::new(&file_name).parent() {
            Some(p) => p,
            None => return Ok(false),
        };
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(e) => e,
            Err(_) => return Ok(false),
        };
        while let Some(entry) = entries.next_entry().await.map_err(|e| Error::repo(e.to_string()))? {
            let path = entry.path();
            if let Ok(meta) = tokio::fs::symlink_metadata(&path).await {
                if meta.file_type().is_symlink() {
                    if let Ok(resolved) = tokio::fs::canonicalize(&path).await {
                        if resolved == target && path != Path::new(&file_name) {
                            return Ok(true);
                        }
                    }
                }
            }
        }
        Ok(false)
    }

    pub async fn delete(&self, writer: &WriterGuard, name: &str, msg: &str) -> Result<()> {
        if !self.exists(name).await {
            return Err(Error::repo_not_found("The file does not exist"));
        }
        if self.has_link(name).await? {
            return Err(Error::repo_client("The file must not be deleted because it is linked"));
        }
        let file = self.repo.entity_path(name);
        tokio::fs::remove_file(&file)
            .await
            .map_err(|e| Error::repo(format!("Could not delete file {file}: {e}")))?;
        self.repo.push(&writer.repo, &[file], msg).await
    }
}

/// Computes a relative symlink target from `link` to `src`, matching the
/// original's common-prefix trimming (rather than `pathdiff`-style `..`
/// counting from the full depth, to keep single-directory layouts tidy).
fn make_relative(src: &str, link: &str) -> String {
    let common_len = src.bytes().zip(link.bytes()).take_while(|(a, b)| a == b).count();
    let common = &src[..common_len];
    let last_dir = common.rfind('/').map(|i| i + 1).unwrap_or(0);
    let relative = &src[last_dir..];
    let backpath = "../".repeat(relative.matches('/').count());
    format!("{backpath}{relative}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn make_relative_same_dir() {
        assert_eq!(make_relative("/repo/hosts/h1.yml", "/repo/hosts/h2.yml"), "h1.yml");
    }

    #[tokio::test]
    async fn reader_then_writer_do_not_deadlock() {
        let dir = tempfile::tempdir().unwrap();
        tokio::process::Command::new("git")
            .args(["init", "-q", "-b", "main"])
            .current_dir(dir.path())
            .output()
            .await
            .unwrap();
        tokio::process::Command::new("git")
            .args(["config", "user.email", "t@example.com"])
            .current_dir(dir.path())
            .output()
            .await
            .unwrap();
        tokio::process::Command::new("git")
            .args(["config", "user.name", "t"])
            .current_dir(dir.path())
            .output()
            .await
            .unwrap();

        let mut repo = GitRepo::new(dir.path().to_str().unwrap().trim_end_matches(|c: char| c.is_ascii_digit()), "", "main", "", "", 999999);
        repo.update_details("x_{name}.yml").unwrap();

        assert_eq!(repo.files().list().await.unwrap().len(), 0);
    }
}
