//! Integration tests for flurry

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use flurry::error::TransformError;
use flurry::pipeline::tasks::ProcessingStage;
use flurry::{Batch, ClosableQueue, ErrorSink, FailureKind, FailureRecord, Slot, Transform};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

/// Succeeds unless the batch id starts with "bad".
#[derive(Default)]
struct IdTransform {
    calls: Mutex<Vec<PathBuf>>,
}

#[async_trait]
impl Transform for IdTransform {
    async fn run(&self, working_dir: &Path) -> Result<(), TransformError> {
        self.calls.lock().unwrap().push(working_dir.to_path_buf());
        let id = std::fs::read_to_string(working_dir.join("id")).unwrap();
        if id.starts_with("bad") {
            return Err(TransformError::Failed {
                message: format!("cannot transform {id}"),
            });
        }
        std::fs::write(working_dir.join("result"), id.to_uppercase()).unwrap();
        Ok(())
    }
}

struct Fixture {
    source: TempDir,
    input: Arc<ClosableQueue<Slot>>,
    output: Arc<ClosableQueue<Slot>>,
    errors: Option<ErrorSink>,
    error_rx: UnboundedReceiver<FailureRecord>,
    transform: Arc<IdTransform>,
}

impl Fixture {
    fn new() -> Self {
        let (errors, error_rx) = ErrorSink::channel();
        Self {
            source: TempDir::new().unwrap(),
            input: Arc::new(ClosableQueue::new()),
            output: Arc::new(ClosableQueue::new()),
            errors: Some(errors),
            error_rx,
            transform: Arc::new(IdTransform::default()),
        }
    }

    fn batch(&self, id: &str) -> Batch {
        let input = self.source.path().join(id);
        std::fs::create_dir(&input).unwrap();
        std::fs::write(input.join("payload"), id).unwrap();

        let working_dir = TempDir::new().unwrap();
        std::fs::write(working_dir.path().join("id"), id).unwrap();
        Batch::new(id, input, working_dir)
    }

    /// Run the stage to completion and collect everything it produced.
    async fn run(&mut self) -> (Vec<Slot>, Vec<FailureRecord>) {
        let errors = self.errors.take().expect("fixture runs once");
        ProcessingStage::new(
            self.input.clone(),
            self.output.clone(),
            errors,
            self.transform.clone(),
            "it",
        )
        .spawn()
        .finish()
        .await
        .unwrap();

        assert!(self.output.is_closed());
        let mut slots = Vec::new();
        while let Ok(slot) = self.output.get().await {
            slots.push(slot);
        }
        let mut records = Vec::new();
        while let Some(record) = self.error_rx.recv().await {
            records.push(record);
        }
        (slots, records)
    }
}

fn ids(slots: &[Slot]) -> Vec<Option<&str>> {
    slots.iter().map(|s| s.batch().map(Batch::id)).collect()
}

mod processing_stage_tests {
    use super::*;

    #[tokio::test]
    async fn test_successful_batch_is_forwarded_and_purged() {
        let mut f = Fixture::new();
        f.input.put(Slot::Batch(f.batch("b1")));
        f.input.close();

        let (slots, records) = f.run().await;

        assert_eq!(ids(&slots), vec![Some("b1")]);
        let result = slots[0].batch().unwrap().working_dir().join("result");
        assert_eq!(std::fs::read_to_string(result).unwrap(), "B1");
        assert!(records.is_empty());
        assert!(!f.source.path().join("b1").exists());
    }

    #[tokio::test]
    async fn test_failed_batch_becomes_skip_and_record() {
        let mut f = Fixture::new();
        f.input.put(Slot::Batch(f.batch("bad2")));
        f.input.close();

        let (slots, records) = f.run().await;

        assert_eq!(ids(&slots), vec![None]);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind(), FailureKind::ProcessingFailed);
        assert_eq!(records[0].batch().map(Batch::id), Some("bad2"));
        assert!(f.source.path().join("bad2/payload").exists());
    }

    #[tokio::test]
    async fn test_skip_passes_through_untouched() {
        let mut f = Fixture::new();
        f.input.put(Slot::Skip);
        f.input.close();

        let (slots, records) = f.run().await;

        assert_eq!(ids(&slots), vec![None]);
        assert!(records.is_empty());
        assert!(f.transform.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_closed_empty_input_yields_closed_empty_output() {
        let mut f = Fixture::new();
        f.input.close();

        let (slots, records) = f.run().await;

        assert!(slots.is_empty());
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_mixed_batches_keep_order() {
        let mut f = Fixture::new();
        f.input.put(Slot::Batch(f.batch("b1")));
        f.input.put(Slot::Batch(f.batch("bad2")));
        f.input.put(Slot::Batch(f.batch("b3")));
        f.input.close();

        let (slots, records) = f.run().await;

        assert_eq!(ids(&slots), vec![Some("b1"), None, Some("b3")]);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].subject().id(), "bad2");
        assert!(!f.source.path().join("b1").exists());
        assert!(f.source.path().join("bad2").exists());
        assert!(!f.source.path().join("b3").exists());
    }

    #[tokio::test]
    async fn test_one_output_per_input_while_producer_is_live() {
        let mut f = Fixture::new();
        let mut expected = Vec::new();
        let producer = {
            let input = f.input.clone();
            let batches: Vec<_> = (0..20)
                .map(|i| {
                    if i % 7 == 3 {
                        expected.push(None);
                        Slot::Skip
                    } else if i % 5 == 2 {
                        expected.push(None);
                        Slot::Batch(f.batch(&format!("bad{i:02}")))
                    } else {
                        let id = format!("b{i:02}");
                        expected.push(Some(id.clone()));
                        Slot::Batch(f.batch(&id))
                    }
                })
                .collect();
            tokio::spawn(async move {
                for slot in batches {
                    input.put(slot);
                    tokio::task::yield_now().await;
                }
                input.close();
            })
        };

        let (slots, _) = f.run().await;
        producer.await.unwrap();

        let got: Vec<_> = slots
            .iter()
            .map(|s| s.batch().map(|b| b.id().to_string()))
            .collect();
        assert_eq!(got, expected);
    }
}

#[cfg(unix)]
mod pipeline_tests {
    use super::*;
    use flurry::Config;
    use flurry::Pipeline;
    use tokio_util::sync::CancellationToken;

    fn config(source: &Path, sink: &Path, dlq: &Path) -> Config {
        let yaml = format!(
            r#"
name: it
source:
  path: {}
sink:
  path: {}
script:
  command:
    - sh
    - -c
    - 'if [ -f "$1/poison" ]; then echo poisoned >&2; exit 3; fi; cat "$1/in.txt" | tr a-z A-Z > "$1/out.txt"; rm "$1/in.txt"'
    - transform
error_handling:
  dlq_path: {}
"#,
            source.display(),
            sink.display(),
            dlq.display()
        );
        Config::from_yaml(&yaml, false).unwrap()
    }

    #[tokio::test]
    async fn test_script_pipeline_end_to_end() {
        let source = TempDir::new().unwrap();
        let sink = TempDir::new().unwrap();
        let dlq = TempDir::new().unwrap();

        for (id, poison) in [("2024-01-01", false), ("2024-01-02", true), ("2024-01-03", false)] {
            let dir = source.path().join(id);
            std::fs::create_dir(&dir).unwrap();
            std::fs::write(dir.join("in.txt"), format!("batch {id}")).unwrap();
            if poison {
                std::fs::write(dir.join("poison"), "").unwrap();
            }
        }

        let stats = Pipeline::from_config(config(source.path(), sink.path(), dlq.path()))
            .run(CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(stats.download.staged, 3);
        assert_eq!(stats.process.processed, 2);
        assert_eq!(stats.process.failed, 1);
        assert_eq!(stats.upload.uploaded, 2);
        assert_eq!(stats.failures.total(), 1);

        let out = std::fs::read_to_string(sink.path().join("2024-01-03/out.txt")).unwrap();
        assert_eq!(out.trim(), "BATCH 2024-01-03");
        assert!(!sink.path().join("2024-01-03/in.txt").exists());
        assert!(!sink.path().join("2024-01-02").exists());

        let remaining: Vec<_> = std::fs::read_dir(source.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(remaining, vec!["2024-01-02"]);

        let dlq_file = std::fs::read_dir(dlq.path()).unwrap().next().unwrap().unwrap();
        let line = std::fs::read_to_string(dlq_file.path()).unwrap();
        let record: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(record["batch"], "2024-01-02");
        assert_eq!(record["kind"], "processing_failed");
        assert!(record["error"].as_str().unwrap().contains("poisoned"));
    }
}
