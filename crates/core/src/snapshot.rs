//! Transactional snapshot store for safe workspace mutation.
//!
//! Edits are staged as per-file unified diffs under
//! `.ontology/snapshots/<id>/` and never touch the working tree until
//! `apply`. Apply is gated by the `ONTOLOGY_APPLY` environment flag and
//! refuses to proceed when any target file no longer matches its recorded
//! pre-image. Snapshots are deleted on successful apply or explicit drop.

use crate::astx::content_checksum;
use crate::config::CoreConfig;
use crate::error::{CoreError, CoreResult};
use crate::types::PlannedEdit;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Environment flag that must be set before `apply` mutates the tree.
pub const APPLY_ENV_FLAG: &str = "ONTOLOGY_APPLY";

// ---------------------------------------------------------------------------
// Persisted shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileOverlay {
    /// SHA-256 of the file content the patch was computed against.
    #[serde(rename = "preHash")]
    pub pre_hash: String,
    /// Unified diff transforming the pre-image into the staged content.
    pub patch: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotState {
    Open,
    Checked,
    Applied,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotStatus {
    pub id: String,
    #[serde(rename = "createdAt")]
    pub created_at: String,
    #[serde(rename = "baseRevision")]
    pub base_revision: String,
    pub state: SnapshotState,
    /// Overlay entries keyed by workspace-relative path.
    pub files: BTreeMap<String, FileOverlay>,
}

/// Result of one external check command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub command: String,
    #[serde(rename = "exitCode")]
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    #[serde(rename = "durationMs")]
    pub duration_ms: u64,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct SnapshotStore {
    config: Arc<CoreConfig>,
    /// Per-snapshot mutation locks; different snapshots proceed independently.
    locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl SnapshotStore {
    pub fn new(config: Arc<CoreConfig>) -> Self {
        Self { config, locks: DashMap::new() }
    }

    fn dir(&self, id: &str) -> PathBuf {
        self.config.snapshots_dir().join(id)
    }

    fn lock_for(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    async fn load_status(&self, id: &str) -> CoreResult<SnapshotStatus> {
        let path = self.dir(id).join("status.json");
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|_| CoreError::NotFound(format!("snapshot {id}")))?;
        serde_json::from_str(&text).map_err(|e| CoreError::Internal(format!("bad status.json: {e}")))
    }

    async fn save_status(&self, status: &SnapshotStatus) -> CoreResult<()> {
        let text = serde_json::to_string_pretty(status)
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        tokio::fs::write(self.dir(&status.id).join("status.json"), text).await?;
        Ok(())
    }

    async fn log_progress(&self, id: &str, line: &str) -> CoreResult<()> {
        use tokio::io::AsyncWriteExt;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir(id).join("progress.log"))
            .await?;
        let stamp = chrono::Utc::now().to_rfc3339();
        file.write_all(format!("[{stamp}] {line}\n").as_bytes()).await?;
        Ok(())
    }

    /// Create an empty snapshot against `base_revision` and return its id.
    pub async fn create(&self, base_revision: &str) -> CoreResult<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let dir = self.dir(&id);
        tokio::fs::create_dir_all(&dir).await?;
        let status = SnapshotStatus {
            id: id.clone(),
            created_at: chrono::Utc::now().to_rfc3339(),
            base_revision: base_revision.to_string(),
            state: SnapshotState::Open,
            files: BTreeMap::new(),
        };
        self.save_status(&status).await?;
        tokio::fs::write(dir.join("overlay.diff"), "").await?;
        self.log_progress(&id, "snapshot created").await?;
        info!(snapshot = %id, "snapshot created");
        Ok(id)
    }

    /// Stage edits into the snapshot overlay. The working tree is read for
    /// pre-images but never written.
    pub async fn propose_patch(&self, id: &str, edits: &[PlannedEdit]) -> CoreResult<()> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        let mut status = self.load_status(id).await?;
        if status.state == SnapshotState::Applied {
            return Err(CoreError::InvalidRequest(format!("snapshot {id} already applied")));
        }

        let mut by_file: BTreeMap<String, Vec<&PlannedEdit>> = BTreeMap::new();
        for edit in edits {
            by_file.entry(edit.uri.clone()).or_default().push(edit);
        }

        for (uri, file_edits) in by_file {
            let abs = self.config.workspace_root.join(&uri);
            let original = tokio::fs::read_to_string(&abs)
                .await
                .map_err(|_| CoreError::NotFound(format!("file {uri}")))?;
            let modified = apply_edits(&original, &file_edits)?;
            let patch = diffy::create_patch(&original, &modified).to_string();
            status.files.insert(
                uri.clone(),
                FileOverlay { pre_hash: content_checksum(&original), patch },
            );
            self.log_progress(id, &format!("staged {} edit(s) for {uri}", file_edits.len()))
                .await?;
        }

        self.write_overlay(&status).await?;
        self.save_status(&status).await?;
        Ok(())
    }

    /// Stage a raw unified diff for a single file.
    pub async fn propose_diff(&self, id: &str, uri: &str, diff_text: &str) -> CoreResult<()> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        let mut status = self.load_status(id).await?;

        let abs = self.config.workspace_root.join(uri);
        let original = tokio::fs::read_to_string(&abs)
            .await
            .map_err(|_| CoreError::NotFound(format!("file {uri}")))?;
        // Validate that the diff applies to the current content before staging
        let patch = diffy::Patch::from_str(diff_text)
            .map_err(|e| CoreError::InvalidRequest(format!("bad diff: {e}")))?;
        diffy::apply(&original, &patch)
            .map_err(|e| CoreError::InvalidRequest(format!("diff does not apply to {uri}: {e}")))?;

        status.files.insert(
            uri.to_string(),
            FileOverlay { pre_hash: content_checksum(&original), patch: diff_text.to_string() },
        );
        self.write_overlay(&status).await?;
        self.save_status(&status).await?;
        self.log_progress(id, &format!("staged diff for {uri}")).await?;
        Ok(())
    }

    /// Materialize the combined overlay diff for display.
    async fn write_overlay(&self, status: &SnapshotStatus) -> CoreResult<()> {
        let mut out = String::new();
        for (uri, overlay) in &status.files {
            out.push_str(&format!("diff --git a/{uri} b/{uri}\n"));
            out.push_str(&overlay.patch);
            if !overlay.patch.ends_with('\n') {
                out.push('\n');
            }
        }
        tokio::fs::write(self.dir(&status.id).join("overlay.diff"), out).await?;
        Ok(())
    }

    /// Run external check commands, recording results in the progress log.
    pub async fn run_checks(
        &self,
        id: &str,
        commands: &[String],
        timeout_sec: u64,
    ) -> CoreResult<Vec<CheckResult>> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        let mut status = self.load_status(id).await?;
        let mut results = Vec::new();

        for command in commands {
            let start = std::time::Instant::now();
            let child = tokio::process::Command::new("sh")
                .arg("-c")
                .arg(command)
                .current_dir(&self.config.workspace_root)
                .output();
            let output = tokio::time::timeout(Duration::from_secs(timeout_sec.max(1)), child)
                .await
                .map_err(|_| CoreError::Timeout { stage: None })??;

            let result = CheckResult {
                command: command.clone(),
                exit_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                duration_ms: start.elapsed().as_millis() as u64,
            };
            self.log_progress(
                id,
                &format!("check `{}` exited {} in {}ms", command, result.exit_code, result.duration_ms),
            )
            .await?;
            results.push(result);
        }

        if results.iter().all(|r| r.exit_code == 0) {
            status.state = SnapshotState::Checked;
            self.save_status(&status).await?;
        }
        Ok(results)
    }

    /// Apply the overlay to the working tree atomically.
    ///
    /// Requires the `ONTOLOGY_APPLY` environment flag. With `check` the
    /// recorded base revision must still match; the per-file pre-image
    /// verification is unconditional. On success the snapshot is deleted.
    pub async fn apply(&self, id: &str, check: bool, current_revision: &str) -> CoreResult<()> {
        if !apply_enabled() {
            return Err(CoreError::InvalidRequest(format!(
                "refusing to mutate the working tree: set {APPLY_ENV_FLAG}=1 to enable apply"
            )));
        }
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        let status = self.load_status(id).await?;

        if check && status.base_revision != current_revision {
            return Err(CoreError::InvalidRequest(format!(
                "snapshot {id} based on revision {} but workspace is at {current_revision}",
                status.base_revision
            )));
        }

        // Verify every pre-image, then stage every new content, then write.
        // Nothing is written until the whole overlay verifies.
        let mut staged: Vec<(PathBuf, String)> = Vec::new();
        for (uri, overlay) in &status.files {
            let abs = self.config.workspace_root.join(uri);
            let current = tokio::fs::read_to_string(&abs)
                .await
                .map_err(|_| CoreError::NotFound(format!("file {uri}")))?;
            if content_checksum(&current) != overlay.pre_hash {
                self.log_progress(id, &format!("apply refused: {uri} changed since staging"))
                    .await?;
                return Err(CoreError::InvalidRequest(format!(
                    "snapshot {id}: {uri} no longer matches its recorded pre-image"
                )));
            }
            let patch = diffy::Patch::from_str(&overlay.patch)
                .map_err(|e| CoreError::Internal(format!("corrupt overlay for {uri}: {e}")))?;
            let new_content = diffy::apply(&current, &patch).map_err(|e| {
                CoreError::InvalidRequest(format!("snapshot {id}: hunks for {uri} do not apply: {e}"))
            })?;
            staged.push((abs, new_content));
        }

        for (abs, content) in staged {
            // Temp-file + rename keeps each file switch atomic
            let tmp = abs.with_extension("ontology-apply-tmp");
            tokio::fs::write(&tmp, &content).await?;
            tokio::fs::rename(&tmp, &abs).await?;
        }
        self.log_progress(id, "overlay applied").await?;
        info!(snapshot = %id, files = status.files.len(), "snapshot applied");

        tokio::fs::remove_dir_all(self.dir(id)).await?;
        self.locks.remove(id);
        Ok(())
    }

    /// Discard a snapshot without touching the tree.
    pub async fn drop_snapshot(&self, id: &str) -> CoreResult<()> {
        let dir = self.dir(id);
        if !dir.exists() {
            return Err(CoreError::NotFound(format!("snapshot {id}")));
        }
        tokio::fs::remove_dir_all(dir).await?;
        self.locks.remove(id);
        debug!(snapshot = %id, "snapshot dropped");
        Ok(())
    }

    /// Status for one snapshot (overlay summary, state, base revision).
    pub async fn status(&self, id: &str) -> CoreResult<SnapshotStatus> {
        self.load_status(id).await
    }

    /// The materialized unified diff.
    pub async fn overlay_diff(&self, id: &str) -> CoreResult<String> {
        let path = self.dir(id).join("overlay.diff");
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|_| CoreError::NotFound(format!("snapshot {id}")))
    }

    pub async fn list(&self) -> CoreResult<Vec<String>> {
        let mut out = Vec::new();
        let dir = self.config.snapshots_dir();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(_) => return Ok(out),
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                out.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        out.sort();
        Ok(out)
    }
}

fn apply_enabled() -> bool {
    std::env::var(APPLY_ENV_FLAG)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Edit application
// ---------------------------------------------------------------------------

/// Apply line/col edits to `content`. Edits are applied bottom-up so earlier
/// replacements cannot shift later positions.
fn apply_edits(content: &str, edits: &[&PlannedEdit]) -> CoreResult<String> {
    let mut lines: Vec<String> = content.lines().map(|l| l.to_string()).collect();
    let mut ordered: Vec<&&PlannedEdit> = edits.iter().collect();
    ordered.sort_by(|a, b| b.line.cmp(&a.line).then(b.col.cmp(&a.col)));

    for edit in ordered {
        let line = lines
            .get_mut(edit.line as usize)
            .ok_or_else(|| CoreError::InvalidRequest(format!("edit beyond EOF in {}", edit.uri)))?;
        let col = edit.col as usize;
        let end = col + edit.old_text.len();
        if line.len() < end || &line[col..end] != edit.old_text {
            return Err(CoreError::InvalidRequest(format!(
                "edit pre-image mismatch at {}:{}:{}",
                edit.uri, edit.line, edit.col
            )));
        }
        line.replace_range(col..end, &edit.new_text);
    }

    let mut out = lines.join("\n");
    if content.ends_with('\n') {
        out.push('\n');
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    // Tests touching the process-global flag serialize on this lock.
    fn env_lock() -> &'static std::sync::Mutex<()> {
        static LOCK: std::sync::OnceLock<std::sync::Mutex<()>> = std::sync::OnceLock::new();
        LOCK.get_or_init(|| std::sync::Mutex::new(()))
    }

    struct EnvFlag(std::sync::MutexGuard<'static, ()>);

    impl EnvFlag {
        fn set() -> Self {
            let guard = env_lock().lock().unwrap_or_else(|e| e.into_inner());
            std::env::set_var(APPLY_ENV_FLAG, "1");
            EnvFlag(guard)
        }

        fn unset() -> Self {
            let guard = env_lock().lock().unwrap_or_else(|e| e.into_inner());
            std::env::remove_var(APPLY_ENV_FLAG);
            EnvFlag(guard)
        }
    }

    impl Drop for EnvFlag {
        fn drop(&mut self) {
            std::env::remove_var(APPLY_ENV_FLAG);
        }
    }

    fn store_for(dir: &std::path::Path) -> SnapshotStore {
        SnapshotStore::new(Arc::new(CoreConfig::new(dir.to_path_buf())))
    }

    fn edit(uri: &str, line: u32, col: u32, old: &str, new: &str) -> PlannedEdit {
        PlannedEdit {
            uri: uri.into(),
            line,
            col,
            old_text: old.into(),
            new_text: new.into(),
        }
    }

    #[tokio::test]
    async fn create_stages_nothing_in_tree() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.ts"), "const getUser = 1;\n").unwrap();
        let store = store_for(dir.path());

        let id = store.create("rev-1").await.unwrap();
        store
            .propose_patch(&id, &[edit("a.ts", 0, 6, "getUser", "fetchUser")])
            .await
            .unwrap();

        let tree = fs::read_to_string(dir.path().join("a.ts")).unwrap();
        assert_eq!(tree, "const getUser = 1;\n", "working tree untouched");

        let overlay = store.overlay_diff(&id).await.unwrap();
        assert!(overlay.contains("-const getUser = 1;"));
        assert!(overlay.contains("+const fetchUser = 1;"));
    }

    #[tokio::test]
    async fn apply_requires_env_flag() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.ts"), "let x = 1;\n").unwrap();
        let store = store_for(dir.path());
        let id = store.create("rev-1").await.unwrap();
        store.propose_patch(&id, &[edit("a.ts", 0, 4, "x", "y")]).await.unwrap();

        let _flag = EnvFlag::unset();
        let err = store.apply(&id, false, "rev-1").await.unwrap_err();
        assert!(err.to_string().contains(APPLY_ENV_FLAG));
    }

    #[tokio::test]
    async fn apply_writes_and_deletes_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.ts"), "const getUser = 1;\n").unwrap();
        let store = store_for(dir.path());
        let id = store.create("rev-1").await.unwrap();
        store
            .propose_patch(&id, &[edit("a.ts", 0, 6, "getUser", "fetchUser")])
            .await
            .unwrap();

        let _flag = EnvFlag::set();
        store.apply(&id, true, "rev-1").await.unwrap();
        let tree = fs::read_to_string(dir.path().join("a.ts")).unwrap();
        assert_eq!(tree, "const fetchUser = 1;\n");
        assert!(matches!(store.status(&id).await, Err(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn external_modification_blocks_apply() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.ts"), "const getUser = 1;\n").unwrap();
        let store = store_for(dir.path());
        let id = store.create("rev-1").await.unwrap();
        store
            .propose_patch(&id, &[edit("a.ts", 0, 6, "getUser", "fetchUser")])
            .await
            .unwrap();

        // Concurrent edit lands after staging
        fs::write(dir.path().join("a.ts"), "const getUser = 2;\n").unwrap();

        let _flag = EnvFlag::set();
        let err = store.apply(&id, false, "rev-1").await.unwrap_err();
        assert!(err.to_string().contains("pre-image"), "{err}");
        let tree = fs::read_to_string(dir.path().join("a.ts")).unwrap();
        assert_eq!(tree, "const getUser = 2;\n", "tree left untouched");
    }

    #[tokio::test]
    async fn base_revision_mismatch_blocks_checked_apply() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.ts"), "let x = 1;\n").unwrap();
        let store = store_for(dir.path());
        let id = store.create("rev-1").await.unwrap();
        store.propose_patch(&id, &[edit("a.ts", 0, 4, "x", "y")]).await.unwrap();

        let _flag = EnvFlag::set();
        let err = store.apply(&id, true, "rev-2").await.unwrap_err();
        assert!(err.to_string().contains("rev-2"));
        // Unchecked apply proceeds (content still matches pre-image)
        store.apply(&id, false, "rev-2").await.unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("a.ts")).unwrap(), "let y = 1;\n");
    }

    #[tokio::test]
    async fn inverse_plans_cancel_out() {
        let dir = tempfile::tempdir().unwrap();
        let original = "function getUser() {\n  return getUser;\n}\n";
        fs::write(dir.path().join("a.ts"), original).unwrap();
        let store = store_for(dir.path());
        let _flag = EnvFlag::set();

        let forward = store.create("r1").await.unwrap();
        store
            .propose_patch(
                &forward,
                &[
                    edit("a.ts", 0, 9, "getUser", "fetchUser"),
                    edit("a.ts", 1, 9, "getUser", "fetchUser"),
                ],
            )
            .await
            .unwrap();
        store.apply(&forward, false, "r1").await.unwrap();

        let backward = store.create("r2").await.unwrap();
        store
            .propose_patch(
                &backward,
                &[
                    edit("a.ts", 0, 9, "fetchUser", "getUser"),
                    edit("a.ts", 1, 9, "fetchUser", "getUser"),
                ],
            )
            .await
            .unwrap();
        store.apply(&backward, false, "r2").await.unwrap();

        assert_eq!(fs::read_to_string(dir.path().join("a.ts")).unwrap(), original);
    }

    #[tokio::test]
    async fn run_checks_records_results() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_for(dir.path());
        let id = store.create("rev-1").await.unwrap();

        let results = store
            .run_checks(&id, &["echo ok".to_string(), "exit 3".to_string()], 10)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].exit_code, 0);
        assert_eq!(results[0].stdout.trim(), "ok");
        assert_eq!(results[1].exit_code, 3);

        let status = store.status(&id).await.unwrap();
        assert_eq!(status.state, SnapshotState::Open, "failed check leaves state open");
    }

    #[tokio::test]
    async fn drop_removes_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_for(dir.path());
        let id = store.create("rev-1").await.unwrap();
        store.drop_snapshot(&id).await.unwrap();
        assert!(matches!(store.status(&id).await, Err(CoreError::NotFound(_))));
        assert!(matches!(store.drop_snapshot(&id).await, Err(CoreError::NotFound(_))));
    }

    #[test]
    fn edit_application_is_position_stable() {
        let content = "aa bb aa\n";
        let e1 = edit("f", 0, 0, "aa", "cccc");
        let e2 = edit("f", 0, 6, "aa", "dd");
        let out = apply_edits(content, &[&e1, &e2]).unwrap();
        assert_eq!(out, "cccc bb dd\n");
    }

    #[test]
    fn edit_mismatch_is_rejected() {
        let e = edit("f", 0, 0, "zz", "yy");
        assert!(apply_edits("aa\n", &[&e]).is_err());
    }
}
