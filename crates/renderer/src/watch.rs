//! Polls shader sources for modification-time changes on a helper thread.
//!
//! The watcher never touches GPU state; it only posts [`LoopEvent`]s that the
//! render thread drains between frames.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};

use crate::window::LoopEvent;

pub(crate) struct SourceWatcher {
    stop: Option<Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
}

impl SourceWatcher {
    pub(crate) fn spawn(
        paths: Vec<PathBuf>,
        interval: Duration,
        events: Sender<LoopEvent>,
    ) -> Result<Self> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("livesh-watch".into())
            .spawn(move || {
                let mut stamps: Vec<Option<SystemTime>> =
                    paths.iter().map(|path| modified(path)).collect();
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        _ => break,
                    }
                    for (path, stamp) in paths.iter().zip(stamps.iter_mut()) {
                        let current = modified(path);
                        // Editors that save by rename leave a short window with no file.
                        if current.is_none() || current == *stamp {
                            continue;
                        }
                        *stamp = current;
                        tracing::debug!(path = %path.display(), "shader source changed");
                        if events
                            .send(LoopEvent::SourceChanged(path.clone()))
                            .is_err()
                        {
                            return;
                        }
                    }
                }
            })
            .map_err(|err| anyhow!("failed to spawn watcher thread: {err}"))?;

        Ok(Self {
            stop: Some(stop_tx),
            join_handle: Some(handle),
        })
    }
}

impl Drop for SourceWatcher {
    fn drop(&mut self) {
        // Dropping the sender wakes the thread out of its timed wait.
        self.stop.take();
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.join();
        }
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::Write;

    use crossbeam_channel::unbounded;

    use super::*;

    #[test]
    fn reports_modified_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plasma.frag");
        fs::write(&path, "void main() {}").unwrap();

        let (tx, rx) = unbounded();
        let watcher =
            SourceWatcher::spawn(vec![path.clone()], Duration::from_millis(10), tx).unwrap();

        let mut file = File::options().write(true).open(&path).unwrap();
        file.write_all(b"void main() { }").unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(5))
            .unwrap();
        drop(file);

        match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            LoopEvent::SourceChanged(changed) => assert_eq!(changed, path),
            other => panic!("unexpected event {other:?}"),
        }
        drop(watcher);
    }

    #[test]
    fn unchanged_file_stays_quiet_and_drop_joins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("still.frag");
        fs::write(&path, "void main() {}").unwrap();

        let (tx, rx) = unbounded();
        let watcher = SourceWatcher::spawn(vec![path], Duration::from_millis(5), tx).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(60)).is_err());
        drop(watcher);
        assert!(rx.recv().is_err(), "sender should be gone after drop");
    }
}
