//! Per-series classification, ordering and decoding on a bounded worker pool.

use crate::classifier::ModalityClassifier;
use crate::config::AssemblyConfig;
use crate::ordering::order_slices;
use crate::series::SeriesGroup;
use crate::volume::ClassifiedVolume;
use crate::volume_loader::VolumeLoader;

use rayon::ThreadPoolBuilder;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use web_time::Instant;

/// Result of processing one series.
#[derive(Debug)]
pub enum SeriesOutcome {
    Found(ClassifiedVolume),
    Unclassified {
        series_uid: String,
    },
    DecodeFailed {
        series_uid: String,
        label: String,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Failed to start series worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error("Series processing did not finish within {0:?}")]
    Timeout(Duration),
}

/// Classified volumes grouped by acquisition-type label.
#[derive(Debug, Default)]
pub struct FoundModalities {
    volumes: HashMap<String, Vec<ClassifiedVolume>>,
}

impl FoundModalities {
    pub fn insert(&mut self, volume: ClassifiedVolume) {
        self.volumes
            .entry(volume.label.clone())
            .or_default()
            .push(volume);
    }

    /// Volume under `label` with the most slices. Ties go to the smallest
    /// series UID, so the choice never depends on completion order.
    pub fn largest(&self, label: &str) -> Option<&ClassifiedVolume> {
        self.volumes.get(label)?.iter().max_by(|a, b| {
            a.slice_count()
                .cmp(&b.slice_count())
                .then_with(|| b.series_uid.cmp(&a.series_uid))
        })
    }

    pub fn contains(&self, label: &str) -> bool {
        self.volumes.get(label).is_some_and(|volumes| !volumes.is_empty())
    }

    pub fn count(&self, label: &str) -> usize {
        self.volumes.get(label).map_or(0, Vec::len)
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.volumes.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.values().all(Vec::is_empty)
    }
}

impl FromIterator<ClassifiedVolume> for FoundModalities {
    fn from_iter<I: IntoIterator<Item = ClassifiedVolume>>(iter: I) -> Self {
        let mut found = Self::default();
        for volume in iter {
            found.insert(volume);
        }
        found
    }
}

/// Classify, order and decode one series.
pub fn process_series(group: SeriesGroup, config: &AssemblyConfig) -> SeriesOutcome {
    let classifier = ModalityClassifier::new(&config.modalities);
    let Some(label) = group
        .representative()
        .and_then(|slice| classifier.classify(slice))
    else {
        return SeriesOutcome::Unclassified {
            series_uid: group.series_uid,
        };
    };
    let label = label.to_string();

    let slices = order_slices(group.slices);
    match VolumeLoader::load_series(&slices) {
        Ok(volume) => SeriesOutcome::Found(ClassifiedVolume {
            label,
            series_uid: group.series_uid,
            volume,
        }),
        Err(err) => SeriesOutcome::DecodeFailed {
            series_uid: group.series_uid,
            label,
            reason: err.to_string(),
        },
    }
}

/// Runs one task per series group on a bounded pool and collects the results.
pub struct SeriesProcessor {
    config: Arc<AssemblyConfig>,
}

impl SeriesProcessor {
    pub fn new(config: Arc<AssemblyConfig>) -> Self {
        Self { config }
    }

    /// Process every group and gather the usable volumes by label.
    ///
    /// Blocks until every task has reported, or until the configured deadline.
    /// A failing or panicking series is logged and left out; it never affects
    /// its siblings.
    pub fn process_all(&self, groups: Vec<SeriesGroup>) -> Result<FoundModalities, ProcessError> {
        let config = Arc::clone(&self.config);
        self.run(groups, self.config.deadline(), move |group| {
            process_series(group, &config)
        })
    }

    pub(crate) fn run<F>(
        &self,
        groups: Vec<SeriesGroup>,
        deadline: Option<Duration>,
        task: F,
    ) -> Result<FoundModalities, ProcessError>
    where
        F: Fn(SeriesGroup) -> SeriesOutcome + Send + Sync + 'static,
    {
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.config.workers.unwrap_or(0))
            .thread_name(|index| format!("series-worker-{index}"))
            .build()?;

        let started = Instant::now();
        let total = groups.len();
        let task = Arc::new(task);
        let (sender, receiver) = mpsc::channel();
        for group in groups {
            let sender = sender.clone();
            let task = Arc::clone(&task);
            pool.spawn(move || {
                let series_uid = group.series_uid.clone();
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| task(group)))
                    .unwrap_or_else(|_| SeriesOutcome::DecodeFailed {
                        series_uid,
                        label: String::from("unknown"),
                        reason: String::from("series task panicked"),
                    });
                // the collector may have given up at its deadline
                let _ = sender.send(outcome);
            });
        }
        drop(sender);

        let mut found = FoundModalities::default();
        let deadline = deadline.map(|limit| (limit, started + limit));
        loop {
            let outcome = match deadline {
                Some((limit, at)) => {
                    let remaining = at.saturating_duration_since(Instant::now());
                    match receiver.recv_timeout(remaining) {
                        Ok(outcome) => outcome,
                        Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {
                            warn!("Series processing exceeded {:?}; abandoning the run", limit);
                            return Err(ProcessError::Timeout(limit));
                        }
                    }
                }
                None => match receiver.recv() {
                    Ok(outcome) => outcome,
                    Err(_) => break,
                },
            };
            Self::record(&mut found, outcome);
        }

        info!(
            "Processed {} series in {:.2} s",
            total,
            started.elapsed().as_secs_f64()
        );
        Ok(found)
    }

    fn record(found: &mut FoundModalities, outcome: SeriesOutcome) {
        match outcome {
            SeriesOutcome::Found(volume) => {
                info!(
                    "Series {} classified as '{}' with {} slices",
                    volume.series_uid,
                    volume.label,
                    volume.slice_count()
                );
                found.insert(volume);
            }
            SeriesOutcome::Unclassified { series_uid } => {
                debug!("Series {} matched no acquisition type", series_uid);
            }
            SeriesOutcome::DecodeFailed {
                series_uid,
                label,
                reason,
            } => {
                warn!("Could not load series {} ('{}'): {}", series_uid, label, reason);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Grid;
    use crate::header::RawSlice;
    use crate::volume::Volume;
    use std::sync::Mutex;

    fn classified(label: &str, uid: &str, slices: usize) -> ClassifiedVolume {
        ClassifiedVolume {
            label: label.to_string(),
            series_uid: uid.to_string(),
            volume: Volume::zeros(Grid::identity([2, 2, slices])),
        }
    }

    #[test]
    fn largest_prefers_slice_count_then_smallest_uid() {
        let found: FoundModalities = [
            classified("t1", "a", 10),
            classified("t1", "c", 30),
            classified("t1", "b", 30),
            classified("t2", "d", 5),
        ]
        .into_iter()
        .collect();
        assert_eq!(found.largest("t1").unwrap().series_uid, "b");

        let reversed: FoundModalities = [
            classified("t1", "b", 30),
            classified("t1", "c", 30),
        ]
        .into_iter()
        .collect();
        assert_eq!(reversed.largest("t1").unwrap().series_uid, "b");
        assert_eq!(found.count("t1"), 3);
        assert!(found.largest("flair").is_none());
        assert!(!found.contains("flair"));
    }

    #[test]
    fn unclassified_series_is_reported() {
        let config = AssemblyConfig::default();
        let group = SeriesGroup {
            series_uid: "9".into(),
            slices: vec![RawSlice {
                series_description: vec!["localizer".into()],
                ..RawSlice::bare("x.dcm", "9")
            }],
        };
        assert!(matches!(
            process_series(group, &config),
            SeriesOutcome::Unclassified { series_uid } if series_uid == "9"
        ));
    }

    #[test]
    fn decode_failure_keeps_label() {
        let config = AssemblyConfig::default();
        let group = SeriesGroup {
            series_uid: "7".into(),
            slices: vec![RawSlice {
                series_description: vec!["AX FLAIR".into()],
                ..RawSlice::bare("/nonexistent/slice.dcm", "7")
            }],
        };
        match process_series(group, &config) {
            SeriesOutcome::DecodeFailed { label, .. } => assert_eq!(label, "flair"),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn failing_series_do_not_stop_the_run() {
        let processor = SeriesProcessor::new(Arc::new(AssemblyConfig {
            workers: Some(2),
            ..AssemblyConfig::default()
        }));
        let groups = (0..4)
            .map(|i| SeriesGroup {
                series_uid: i.to_string(),
                slices: vec![RawSlice {
                    series_description: vec!["t2".into()],
                    ..RawSlice::bare("/nonexistent/slice.dcm", &i.to_string())
                }],
            })
            .collect();
        let found = processor.process_all(groups).unwrap();
        assert!(found.is_empty());
    }

    fn unclassified(group: SeriesGroup) -> SeriesOutcome {
        SeriesOutcome::Unclassified {
            series_uid: group.series_uid,
        }
    }

    fn groups(uids: &[&str]) -> Vec<SeriesGroup> {
        uids.iter()
            .map(|uid| SeriesGroup {
                series_uid: uid.to_string(),
                slices: Vec::new(),
            })
            .collect()
    }

    #[test]
    fn deadline_abandons_slow_series() {
        let processor = SeriesProcessor::new(Arc::new(AssemblyConfig {
            workers: Some(2),
            ..AssemblyConfig::default()
        }));
        let (release, blocked) = mpsc::channel::<()>();
        let blocked = Mutex::new(blocked);
        let limit = Duration::from_millis(50);

        let result = processor.run(groups(&["fast", "slow"]), Some(limit), move |group| {
            if group.series_uid == "slow" {
                let _ = blocked.lock().unwrap().recv();
            }
            unclassified(group)
        });
        assert!(matches!(result, Err(ProcessError::Timeout(found)) if found == limit));
        release.send(()).unwrap();
    }

    #[test]
    fn deadline_is_not_hit_by_quick_series() {
        let processor = SeriesProcessor::new(Arc::new(AssemblyConfig::default()));
        let deadline = Some(Duration::from_secs(30));
        let result = processor.run(groups(&["1", "2", "3"]), deadline, unclassified);
        assert!(result.unwrap().is_empty());
    }

    #[test]
    fn panicking_series_is_isolated() {
        let processor = SeriesProcessor::new(Arc::new(AssemblyConfig::default()));
        let result = processor.run(groups(&["1", "2"]), None, |group| {
            if group.series_uid == "2" {
                panic!("corrupt series");
            }
            unclassified(group)
        });
        assert!(result.unwrap().is_empty());
    }
}
