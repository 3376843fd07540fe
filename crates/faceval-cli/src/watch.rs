//! Checkpoint directory watching.
//!
//! Each new `*.onnx` file is treated as one training checkpoint: it is
//! swapped into the engine, validated, and recorded in the monitor. The
//! best result so far is written to `best.json` in the same directory.

use anyhow::{Context, Result};
use faceval_core::preprocess::ImageTensor;
use faceval_core::{BatchEmbedder, OperatingPoint, PairDataset, Scorer, ValidationMonitor, ValidationOutcome};
use faceval_engine::{spawn_engine, EngineError, EngineHandle};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const BEST_FILE: &str = "best.json";

/// Polls a checkpoint may fail to load (e.g. while still being exported)
/// before it is skipped for good.
pub const MAX_LOAD_ATTEMPTS: u32 = 3;

/// Contents of `best.json`.
#[derive(Debug, Serialize)]
pub struct BestCheckpoint {
    pub checkpoint: PathBuf,
    /// Training step parsed from the file name, if it carries one.
    pub step: Option<u64>,
    /// Position of this checkpoint in evaluation order, starting at 1.
    pub evaluation: u64,
    pub accuracy: f32,
    pub threshold: f32,
}

pub struct WatchOptions {
    pub dir: PathBuf,
    pub poll: Duration,
    pub once: bool,
    pub batch_size: usize,
}

/// Training step encoded in a checkpoint name: the last run of digits in
/// the file stem (`RES_NET50_iter_4000.onnx` -> 4000).
pub fn checkpoint_step(path: &Path) -> Option<u64> {
    let stem = path.file_stem()?.to_str()?;
    let end = stem.rfind(|c: char| c.is_ascii_digit())? + 1;
    let start = stem[..end]
        .rfind(|c: char| !c.is_ascii_digit())
        .map(|i| i + 1)
        .unwrap_or(0);
    stem[start..end].parse().ok()
}

/// New `*.onnx` files in `dir`, ordered by step then name.
pub fn pending_checkpoints(dir: &Path, seen: &HashSet<PathBuf>) -> Result<Vec<PathBuf>> {
    let mut found: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("reading checkpoint directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "onnx"))
        .filter(|p| !seen.contains(p))
        .collect();
    found.sort_by(|a, b| {
        checkpoint_step(a)
            .cmp(&checkpoint_step(b))
            .then_with(|| a.cmp(b))
    });
    Ok(found)
}

/// Validates checkpoints through one engine thread.
///
/// `load` turns a checkpoint path into an embedder. A checkpoint that fails
/// to load stays pending and is retried on later polls, up to
/// [`MAX_LOAD_ATTEMPTS`].
pub struct Watcher<E, L> {
    opts: WatchOptions,
    load: L,
    scorer: Scorer,
    monitor: ValidationMonitor,
    dataset: Option<PairDataset<ImageTensor>>,
    engine: Option<EngineHandle<E>>,
    seen: HashSet<PathBuf>,
    load_failures: HashMap<PathBuf, u32>,
    evaluated: u64,
}

impl<E, L> Watcher<E, L>
where
    E: BatchEmbedder<ImageTensor> + Send + 'static,
    L: FnMut(&Path) -> Result<E>,
{
    pub fn new(
        opts: WatchOptions,
        dataset: PairDataset<ImageTensor>,
        scorer: Scorer,
        monitor: ValidationMonitor,
        load: L,
    ) -> Self {
        Self {
            opts,
            load,
            scorer,
            monitor,
            dataset: Some(dataset),
            engine: None,
            seen: HashSet::new(),
            load_failures: HashMap::new(),
            evaluated: 0,
        }
    }

    pub fn monitor(&self) -> &ValidationMonitor {
        &self.monitor
    }

    /// Poll until interrupted, or once when `opts.once` is set.
    pub async fn run(mut self) -> Result<ValidationMonitor> {
        loop {
            self.poll().await?;
            if self.opts.once {
                break;
            }
            tokio::time::sleep(self.opts.poll).await;
        }

        match self.monitor.best() {
            Some(best) => tracing::info!(
                evaluation = best.step,
                accuracy = best.point.accuracy,
                threshold = best.point.threshold,
                "best checkpoint"
            ),
            None => tracing::info!(
                floor = self.monitor.accuracy_floor(),
                "no checkpoint beat the accuracy floor"
            ),
        }
        Ok(self.monitor)
    }

    /// Validate every checkpoint that appeared since the last poll.
    pub async fn poll(&mut self) -> Result<()> {
        for path in pending_checkpoints(&self.opts.dir, &self.seen)? {
            let embedder = match (self.load)(&path) {
                Ok(e) => e,
                Err(err) => {
                    self.record_load_failure(path, &err);
                    continue;
                }
            };
            self.load_failures.remove(&path);
            self.seen.insert(path.clone());
            self.validate(&path, embedder).await?;
        }
        Ok(())
    }

    fn record_load_failure(&mut self, path: PathBuf, err: &anyhow::Error) {
        let attempts = {
            let count = self.load_failures.entry(path.clone()).or_insert(0);
            *count += 1;
            *count
        };
        if attempts >= MAX_LOAD_ATTEMPTS {
            tracing::warn!(checkpoint = %path.display(), attempts, error = %err, "giving up on checkpoint");
            self.load_failures.remove(&path);
            self.seen.insert(path);
        } else {
            tracing::warn!(checkpoint = %path.display(), attempts, error = %err, "checkpoint not loadable yet; will retry");
        }
    }

    async fn validate(&mut self, path: &Path, embedder: E) -> Result<()> {
        let handle = match &self.engine {
            Some(handle) => {
                handle.swap_embedder(embedder).await?;
                handle.clone()
            }
            None => {
                let ds = self.dataset.take().context("pair dataset already consumed")?;
                let handle = spawn_engine(embedder, ds, self.scorer.clone(), self.opts.batch_size)?;
                self.engine = Some(handle.clone());
                handle
            }
        };

        let result = match handle.evaluate().await {
            Ok(eval) => Ok(eval),
            Err(EngineError::Scorer(err)) => Err(err),
            Err(err) => return Err(err.into()),
        };

        self.evaluated += 1;
        let step = checkpoint_step(path);
        tracing::info!(checkpoint = %path.display(), step, evaluation = self.evaluated, "validated checkpoint");

        if let ValidationOutcome::NewBest(point) = self.monitor.record(self.evaluated, result) {
            write_best(&self.opts.dir, path, step, self.evaluated, point)?;
        }
        Ok(())
    }
}

/// Replace `best.json` atomically so readers never see a partial file.
fn write_best(
    dir: &Path,
    checkpoint: &Path,
    step: Option<u64>,
    evaluation: u64,
    point: OperatingPoint,
) -> Result<()> {
    let best = BestCheckpoint {
        checkpoint: checkpoint.to_path_buf(),
        step,
        evaluation,
        accuracy: point.accuracy,
        threshold: point.threshold,
    };
    let path = dir.join(BEST_FILE);
    let tmp = dir.join(format!("{BEST_FILE}.tmp"));
    std::fs::write(&tmp, serde_json::to_string_pretty(&best)?)
        .with_context(|| format!("writing {}", tmp.display()))?;
    std::fs::rename(&tmp, &path).with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use faceval_core::{BatchFn, VerificationPair};
    use std::convert::Infallible;

    type EmbedFn = fn(&[&ImageTensor]) -> Result<Vec<Vec<f32>>, Infallible>;
    type TestEmbedder = BatchFn<EmbedFn>;

    fn identity(images: &[&ImageTensor]) -> Result<Vec<Vec<f32>>, Infallible> {
        Ok(images.iter().map(|t| t.iter().copied().collect()).collect())
    }

    fn constant(images: &[&ImageTensor]) -> Result<Vec<Vec<f32>>, Infallible> {
        Ok(images.iter().map(|_| vec![1.0, 0.0]).collect())
    }

    /// Checkpoint files name the embedder they stand for; an empty file is
    /// one still being exported.
    fn load_test_checkpoint(path: &Path) -> Result<TestEmbedder> {
        let kind = std::fs::read_to_string(path)?;
        match kind.trim() {
            "identity" => Ok(BatchFn(identity as EmbedFn)),
            "constant" => Ok(BatchFn(constant as EmbedFn)),
            other => anyhow::bail!("unreadable checkpoint {other:?}"),
        }
    }

    fn tensor(a: f32, b: f32) -> ImageTensor {
        let mut t = ImageTensor::zeros((1, 1, 2));
        t[[0, 0, 0]] = a;
        t[[0, 0, 1]] = b;
        t
    }

    fn dataset() -> PairDataset<ImageTensor> {
        PairDataset::new(vec![
            VerificationPair::new(tensor(1.0, 0.0), tensor(1.0, 0.1), true),
            VerificationPair::new(tensor(1.0, 0.0), tensor(0.0, 1.0), false),
        ])
    }

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("faceval-{tag}-{}", std::process::id()));
        std::fs::remove_dir_all(&dir).ok();
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn read_best(dir: &Path) -> serde_json::Value {
        serde_json::from_str(&std::fs::read_to_string(dir.join(BEST_FILE)).unwrap()).unwrap()
    }

    #[test]
    fn test_checkpoint_step() {
        assert_eq!(checkpoint_step(Path::new("RES_NET50_iter_4000.onnx")), Some(4000));
        assert_eq!(checkpoint_step(Path::new("out/RES_NET50_best0.93100_12000.onnx")), Some(12000));
        assert_eq!(checkpoint_step(Path::new("7.onnx")), Some(7));
        assert_eq!(checkpoint_step(Path::new("ckpt-200-final.onnx")), Some(200));
        assert_eq!(checkpoint_step(Path::new("latest.onnx")), None);
    }

    #[test]
    fn test_pending_checkpoints_ordered_and_filtered() {
        let dir = temp_dir("watch");
        for name in ["m_iter_10000.onnx", "m_iter_2000.onnx", "notes.txt", "m_iter_4000.onnx"] {
            std::fs::write(dir.join(name), b"").unwrap();
        }

        let mut seen = HashSet::new();
        let names: Vec<String> = pending_checkpoints(&dir, &seen)
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["m_iter_2000.onnx", "m_iter_4000.onnx", "m_iter_10000.onnx"]);

        seen.insert(dir.join("m_iter_2000.onnx"));
        assert_eq!(pending_checkpoints(&dir, &seen).unwrap().len(), 2);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_write_best_replaces_file() {
        let dir = temp_dir("best");
        let point = OperatingPoint { threshold: 1.2, accuracy: 0.9 };
        write_best(&dir, &dir.join("m_iter_4000.onnx"), Some(4000), 1, point).unwrap();
        write_best(&dir, &dir.join("latest.onnx"), None, 2, point).unwrap();

        let v = read_best(&dir);
        assert!(v["step"].is_null());
        assert_eq!(v["evaluation"], 2);
        assert!(v["checkpoint"].as_str().unwrap().ends_with("latest.onnx"));
        assert!(!dir.join(format!("{BEST_FILE}.tmp")).exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_watcher_tracks_best_and_retries_incomplete_checkpoints() {
        let dir = temp_dir("watcher");
        std::fs::write(dir.join("m_iter_1000.onnx"), "constant").unwrap();
        std::fs::write(dir.join("m_iter_2000.onnx"), "constant").unwrap();
        std::fs::write(dir.join("m_iter_3000.onnx"), "").unwrap();

        let opts = WatchOptions {
            dir: dir.clone(),
            poll: Duration::from_millis(10),
            once: true,
            batch_size: 2,
        };
        let mut watcher: Watcher<TestEmbedder, _> = Watcher::new(
            opts,
            dataset(),
            Scorer::default(),
            ValidationMonitor::new(0, 0.4),
            load_test_checkpoint,
        );

        // Constant embeddings predict "same" for both pairs: 0.5 accuracy.
        // The second checkpoint ties and does not replace the first.
        watcher.poll().await.unwrap();
        assert_eq!(watcher.monitor().best().unwrap().step, 1);
        assert_eq!(watcher.monitor().last().unwrap().accuracy, 0.5);
        let best = read_best(&dir);
        assert_eq!(best["step"], 1000);
        assert_eq!(best["accuracy"], 0.5);

        // The half-written checkpoint is picked up once it is complete.
        std::fs::write(dir.join("m_iter_3000.onnx"), "identity").unwrap();
        watcher.poll().await.unwrap();
        let best = read_best(&dir);
        assert_eq!(best["step"], 3000);
        assert_eq!(best["accuracy"], 1.0);
        assert_eq!(watcher.monitor().best().unwrap().step, 3);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_watcher_gives_up_on_broken_checkpoint() {
        let dir = temp_dir("giveup");
        std::fs::write(dir.join("broken.onnx"), "garbage").unwrap();

        let opts = WatchOptions {
            dir: dir.clone(),
            poll: Duration::from_millis(10),
            once: true,
            batch_size: 1,
        };
        let mut watcher: Watcher<TestEmbedder, _> = Watcher::new(
            opts,
            dataset(),
            Scorer::default(),
            ValidationMonitor::new(0, 0.0),
            load_test_checkpoint,
        );

        for _ in 0..MAX_LOAD_ATTEMPTS - 1 {
            watcher.poll().await.unwrap();
            assert_eq!(pending_checkpoints(&dir, &watcher.seen).unwrap().len(), 1);
        }
        watcher.poll().await.unwrap();
        assert!(pending_checkpoints(&dir, &watcher.seen).unwrap().is_empty());
        assert!(watcher.monitor().best().is_none());
        assert!(!dir.join(BEST_FILE).exists());

        std::fs::remove_dir_all(&dir).ok();
    }
}
