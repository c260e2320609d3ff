//! File watcher feeding typed change events into the invalidation path.
//!
//! Watches the workspace root, debounces bursts, and translates OS
//! notifications into [`FileEvent`]s handed to the orchestrator. Dropping
//! the returned watcher stops it.

use crate::orchestrator::Orchestrator;
use crate::types::FileEvent;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Debounce window: wait this long after the last event before processing.
const DEBOUNCE_MS: u64 = 500;

/// Start watching the workspace root. Returns the watcher handle (must be
/// kept alive) or `None` when the platform watcher cannot be created.
pub fn start_watcher(orchestrator: Arc<Orchestrator>) -> Option<RecommendedWatcher> {
    let (tx, rx) = mpsc::channel::<Event>();

    let mut watcher = match RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        },
        notify::Config::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            warn!(error = %e, "failed to create file watcher");
            return None;
        }
    };

    let root = orchestrator.config().workspace_root.clone();
    if let Err(e) = watcher.watch(&root, RecursiveMode::Recursive) {
        warn!(root = %root.display(), error = %e, "failed to watch workspace");
        return None;
    }
    debug!(root = %root.display(), "watching workspace");

    std::thread::spawn(move || debounce_loop(rx, orchestrator));
    Some(watcher)
}

/// Collect raw events and hand them over after a quiet period.
fn debounce_loop(rx: mpsc::Receiver<Event>, orchestrator: Arc<Orchestrator>) {
    let mut pending: HashMap<PathBuf, (EventKind, Instant)> = HashMap::new();

    loop {
        match rx.recv_timeout(Duration::from_millis(DEBOUNCE_MS)) {
            Ok(event) => {
                if matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                ) {
                    let now = Instant::now();
                    for path in event.paths {
                        pending.insert(path, (event.kind, now));
                    }
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if pending.is_empty() {
                    continue;
                }
                let cutoff = Instant::now() - Duration::from_millis(DEBOUNCE_MS);
                let ready: Vec<(PathBuf, EventKind)> = pending
                    .iter()
                    .filter(|(_, (_, t))| *t <= cutoff)
                    .map(|(p, (k, _))| (p.clone(), *k))
                    .collect();
                for (path, kind) in ready {
                    pending.remove(&path);
                    if let Some(event) = translate(&orchestrator, &path, kind) {
                        orchestrator.handle_file_event(&event);
                    }
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn translate(orchestrator: &Orchestrator, path: &std::path::Path, kind: EventKind) -> Option<FileEvent> {
    let rel = path
        .strip_prefix(&orchestrator.config().workspace_root)
        .ok()?
        .to_string_lossy()
        .replace('\\', "/");
    if rel.is_empty() || rel.starts_with(crate::types::STATE_DIR) {
        return None;
    }
    let skip = orchestrator
        .config()
        .layers
        .l1
        .skip_dirs
        .iter()
        .any(|d| rel.split('/').any(|part| part == d));
    if skip {
        return None;
    }
    Some(match kind {
        EventKind::Create(_) => FileEvent::Created { path: rel },
        EventKind::Remove(_) => FileEvent::Deleted { path: rel },
        _ => FileEvent::Modified { path: rel },
    })
}
