//! Directory monitor.
//!
//! Watches the characters directory and pushes every created or modified
//! card through the translation pipeline. At most one task runs per path;
//! events arriving while a path is in flight coalesce into a single rerun
//! once the current one finishes. A semaphore caps how many files
//! translate at once.

use crate::codec::{self, CodecError};
use crate::config::TranslatorConfig;
use crate::orchestrator::{Orchestrator, TranslationReport};
use crate::providers::Provider;
use crate::state::{StateError, StateStore};
use log::{debug, info, warn};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

const EVENT_QUEUE_CAPACITY: usize = 256;
const IO_RETRY_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("file watcher failed: {0}")]
    Watch(#[from] notify::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A running watch over one characters directory. Dropping the value does
/// not stop the background task; call [`stop`](Self::stop).
pub struct DirectoryMonitor {
    // Held so the notify backend keeps delivering events.
    _watcher: RecommendedWatcher,
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl DirectoryMonitor {
    /// Starts watching. Cards already present in the directory are queued
    /// immediately, so a restart picks up whatever it missed.
    pub fn start(
        config: Arc<TranslatorConfig>,
        provider: Provider,
        state: Arc<StateStore>,
    ) -> Result<Self, MonitorError> {
        fs::create_dir_all(&config.characters_dir)?;

        let (event_tx, event_rx) = mpsc::channel::<PathBuf>(EVENT_QUEUE_CAPACITY);

        let mut seed: Vec<PathBuf> = fs::read_dir(&config.characters_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| is_card_path(path))
            .collect();
        seed.sort();

        let watcher_tx = event_tx;
        let mut watcher =
            notify::recommended_watcher(move |result: Result<Event, notify::Error>| {
                match result {
                    Ok(event)
                        if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) =>
                    {
                        for path in event.paths {
                            if is_card_path(&path) {
                                let _ = watcher_tx.blocking_send(path);
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(err) => warn!("watch error: {err}"),
                }
            })?;
        watcher.watch(&config.characters_dir, RecursiveMode::NonRecursive)?;
        info!("watching {}", config.characters_dir.display());

        let cancel = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn(dispatch_loop(
            config,
            provider,
            state,
            event_rx,
            seed,
            Arc::clone(&cancel),
        ));

        Ok(Self {
            _watcher: watcher,
            cancel,
            handle,
        })
    }

    /// Shared flag that in-flight translations check between segments.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Signals cancellation and waits for the dispatcher and every
    /// outstanding worker to finish. Writes never happen after this
    /// returns.
    pub async fn stop(self) {
        self.cancel.store(true, Ordering::SeqCst);
        drop(self._watcher);
        let _ = self.handle.await;
    }
}

async fn dispatch_loop(
    config: Arc<TranslatorConfig>,
    provider: Provider,
    state: Arc<StateStore>,
    mut events: mpsc::Receiver<PathBuf>,
    seed: Vec<PathBuf>,
    cancel: Arc<AtomicBool>,
) {
    let semaphore = Arc::new(Semaphore::new(config.max_concurrent_files.max(1)));
    let (done_tx, mut done_rx) = mpsc::channel::<PathBuf>(EVENT_QUEUE_CAPACITY);
    let mut in_flight: HashSet<PathBuf> = HashSet::new();
    let mut pending: HashSet<PathBuf> = HashSet::new();

    for path in seed {
        schedule(
            path, &mut in_flight, &mut pending, &config, &provider, &state, &semaphore, &done_tx,
            &cancel,
        );
    }

    loop {
        tokio::select! {
            maybe_path = events.recv() => {
                let Some(path) = maybe_path else { break };
                if cancel.load(Ordering::SeqCst) {
                    break;
                }
                schedule(
                    path, &mut in_flight, &mut pending, &config, &provider, &state,
                    &semaphore, &done_tx, &cancel,
                );
            }
            maybe_done = done_rx.recv() => {
                let Some(path) = maybe_done else { break };
                in_flight.remove(&path);
                if pending.remove(&path) && !cancel.load(Ordering::SeqCst) {
                    schedule(
                        path, &mut in_flight, &mut pending, &config, &provider, &state,
                        &semaphore, &done_tx, &cancel,
                    );
                }
            }
        }
    }

    // Workers are detached tasks; join them through the done channel so
    // nothing is still encoding once the dispatcher returns.
    while !in_flight.is_empty() {
        let Some(path) = done_rx.recv().await else { break };
        in_flight.remove(&path);
    }
    debug!("dispatch loop stopped");
}

#[allow(clippy::too_many_arguments)]
fn schedule(
    path: PathBuf,
    in_flight: &mut HashSet<PathBuf>,
    pending: &mut HashSet<PathBuf>,
    config: &Arc<TranslatorConfig>,
    provider: &Provider,
    state: &Arc<StateStore>,
    semaphore: &Arc<Semaphore>,
    done_tx: &mpsc::Sender<PathBuf>,
    cancel: &Arc<AtomicBool>,
) {
    if in_flight.contains(&path) {
        // Only the latest version of the file matters; one rerun covers
        // any number of events that arrive meanwhile.
        pending.insert(path);
        return;
    }
    in_flight.insert(path.clone());

    let config = Arc::clone(config);
    let provider = provider.clone();
    let state = Arc::clone(state);
    let semaphore = Arc::clone(semaphore);
    let done_tx = done_tx.clone();
    let cancel = Arc::clone(cancel);
    tokio::spawn(async move {
        if let Ok(_permit) = semaphore.acquire().await {
            if !cancel.load(Ordering::SeqCst) {
                match process_card(&config, &provider, &state, &path, &cancel).await {
                    Ok(_) => {}
                    Err(err) => warn!("processing {} failed: {err}", path.display()),
                }
            }
        }
        let _ = done_tx.send(path).await;
    });
}

/// Runs one card through the pipeline: record the change, decode,
/// translate, write the result back atomically, and mark the file
/// translated. Failed segments keep their original text inside the
/// otherwise translated card; a cancelled run writes nothing.
pub async fn process_card(
    config: &TranslatorConfig,
    provider: &Provider,
    state: &StateStore,
    path: &Path,
    cancel: &AtomicBool,
) -> Result<Option<TranslationReport>, MonitorError> {
    let file_state = with_io_retries(config.io_retry_limit, || state.note_change(path)).await?;
    if file_state.translated {
        debug!("{} already translated, skipping", path.display());
        return Ok(None);
    }

    // Creation events can land before the writer finishes; retry the
    // decode instead of giving up on a half-written PNG.
    let mut record = with_io_retries(config.io_retry_limit, || codec::decode(path)).await?;

    let orchestrator = Orchestrator::new(
        provider.clone(),
        config.segment_options(),
        config.name_options(),
        config.translate_options(),
    );
    let report = orchestrator
        .translate_record_cancelable(&mut record, cancel)
        .await;

    if report.cancelled {
        info!("translation of {} cancelled, file untouched", path.display());
        return Ok(Some(report));
    }
    if report.failed() > 0 {
        warn!(
            "{}: {} of {} segments kept their original text",
            path.display(),
            report.failed(),
            report.statuses.len()
        );
    }

    codec::encode(&record, path)?;
    state.mark_translated(path)?;
    info!(
        "{} translated ({} segments, {} skipped, {} failed)",
        path.display(),
        report.translated(),
        report.skipped(),
        report.failed()
    );
    Ok(Some(report))
}

async fn with_io_retries<T, E: fmt::Display>(
    attempts: u32,
    mut op: impl FnMut() -> Result<T, E>,
) -> Result<T, E> {
    let attempts = attempts.max(1);
    let mut tries = 0u32;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if tries + 1 < attempts => {
                tries += 1;
                debug!("transient read failure, attempt {tries}: {err}");
                tokio::time::sleep(IO_RETRY_DELAY).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Cards are direct PNG children of the watched directory. Our own
/// temporary files are excluded so atomic writes do not echo back.
fn is_card_path(path: &Path) -> bool {
    let is_png = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("png"))
        .unwrap_or(false);
    let is_temp = path
        .file_name()
        .map(|name| name.to_string_lossy().contains("__tmp__"))
        .unwrap_or(true);
    is_png && !is_temp
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::BackupStore;
    use crate::chunk::testutil::tiny_png;
    use crate::codec::CardRecord;
    use crate::providers::{FixedTranslator, ProviderKind};
    use serde_json::json;
    use tempfile::tempdir;

    fn write_card(path: &Path, value: serde_json::Value) {
        fs::write(path, tiny_png()).unwrap();
        let record: CardRecord = serde_json::from_value(value).unwrap();
        codec::encode(&record, path).unwrap();
    }

    fn test_config(dir: &Path) -> TranslatorConfig {
        TranslatorConfig {
            characters_dir: dir.to_path_buf(),
            backup_dir: dir.join("Original"),
            state_db_path: dir.join("translation_db.json"),
            provider: ProviderKind::Fixed,
            ..TranslatorConfig::default()
        }
    }

    fn test_state(config: &TranslatorConfig) -> StateStore {
        StateStore::open(
            config.state_db_path.clone(),
            BackupStore::new(config.backup_dir.clone()),
        )
        .unwrap()
    }

    fn fixed(prefix: &str, fail_contains: Option<&str>) -> Provider {
        Provider::Fixed(FixedTranslator {
            prefix: prefix.to_string(),
            fail_contains: fail_contains.map(str::to_string),
        })
    }

    #[test]
    fn card_paths_are_filtered() {
        assert!(is_card_path(Path::new("/cards/mira.png")));
        assert!(is_card_path(Path::new("/cards/MIRA.PNG")));
        assert!(!is_card_path(Path::new("/cards/notes.txt")));
        assert!(!is_card_path(Path::new("/cards/mira.png__tmp__pid_42")));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stop_waits_for_outstanding_workers() {
        let dir = tempdir().unwrap();
        let config = Arc::new(test_config(dir.path()));
        let state = Arc::new(test_state(&config));
        let card = dir.path().join("mira.png");
        write_card(&card, json!({"description": "Text."}));

        let monitor =
            DirectoryMonitor::start(Arc::clone(&config), fixed("[pt] ", None), state).unwrap();
        monitor.stop().await;

        // Whatever the seeded worker managed before the cancel flag, no
        // write may land after stop() has returned.
        let after_stop = fs::read(&card).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(fs::read(&card).unwrap(), after_stop);
    }

    #[tokio::test]
    async fn processes_backs_up_and_marks_translated() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let state = test_state(&config);
        let card = dir.path().join("mira.png");
        write_card(&card, json!({"description": "A quiet scholar."}));

        let cancel = AtomicBool::new(false);
        let report = process_card(&config, &fixed("[pt] ", None), &state, &card, &cancel)
            .await
            .unwrap()
            .unwrap();
        assert!(report.fully_translated());

        let record = codec::decode(&card).unwrap();
        assert_eq!(record.description.as_deref(), Some("[pt] A quiet scholar."));
        assert!(state.is_translated(&card));
        assert!(state.backups().has_backup("mira.png"));
    }

    #[tokio::test]
    async fn second_pass_on_own_output_is_a_no_op() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let state = test_state(&config);
        let card = dir.path().join("mira.png");
        write_card(&card, json!({"description": "Text."}));

        let cancel = AtomicBool::new(false);
        let provider = fixed("[pt] ", None);
        process_card(&config, &provider, &state, &card, &cancel)
            .await
            .unwrap();
        let after_first = fs::read(&card).unwrap();

        // The watcher would fire on the write above; replay it.
        let second = process_card(&config, &provider, &state, &card, &cancel)
            .await
            .unwrap();
        assert!(second.is_none());
        assert_eq!(fs::read(&card).unwrap(), after_first);
    }

    #[tokio::test]
    async fn failed_segments_keep_original_text_but_file_completes() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let state = test_state(&config);
        let card = dir.path().join("mira.png");
        write_card(
            &card,
            json!({"description": "Fine.", "personality": "poison"}),
        );

        let cancel = AtomicBool::new(false);
        let report = process_card(
            &config,
            &fixed("[pt] ", Some("poison")),
            &state,
            &card,
            &cancel,
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(report.failed(), 1);
        assert_eq!(report.translated(), 1);
        let record = codec::decode(&card).unwrap();
        assert_eq!(record.description.as_deref(), Some("[pt] Fine."));
        assert_eq!(record.personality.as_deref(), Some("poison"));
        // Partial failures still finish the file; a clear re-enables it.
        assert!(state.is_translated(&card));
        assert!(state.backups().has_backup("mira.png"));
    }

    #[tokio::test]
    async fn cancelled_run_writes_nothing() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let state = test_state(&config);
        let card = dir.path().join("mira.png");
        write_card(&card, json!({"description": "Text."}));
        let before = fs::read(&card).unwrap();

        let cancel = AtomicBool::new(true);
        let report = process_card(&config, &fixed("[pt] ", None), &state, &card, &cancel)
            .await
            .unwrap()
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(fs::read(&card).unwrap(), before);
        assert!(!state.is_translated(&card));
    }

    #[tokio::test]
    async fn external_edit_is_translated_again() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let state = test_state(&config);
        let card = dir.path().join("mira.png");
        write_card(&card, json!({"description": "First text."}));

        let cancel = AtomicBool::new(false);
        let provider = fixed("[pt] ", None);
        process_card(&config, &provider, &state, &card, &cancel)
            .await
            .unwrap();

        write_card(&card, json!({"description": "Second text."}));
        let report = process_card(&config, &provider, &state, &card, &cancel)
            .await
            .unwrap()
            .unwrap();
        assert!(report.fully_translated());
        let record = codec::decode(&card).unwrap();
        assert_eq!(record.description.as_deref(), Some("[pt] Second text."));
    }
}
