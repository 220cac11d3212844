#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::anyhow;
use taskgraph::dag::TaskProcess;

/// One runner invocation as observed by a [`RunRecorder`].
#[derive(Debug, Clone)]
pub struct RunSpan {
    pub task: String,
    pub start: Instant,
    pub end: Option<Instant>,
}

/// Records when instrumented runners start and finish.
///
/// Cloning shares the underlying log, so the same recorder can be moved into
/// many processes and inspected afterwards.
#[derive(Debug, Clone, Default)]
pub struct RunRecorder {
    spans: Arc<Mutex<Vec<RunSpan>>>,
}

impl RunRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process that sleeps for `delay` and returns its own name.
    pub fn process(&self, name: &str, delay: Duration) -> TaskProcess {
        let recorder = self.clone();
        let name = name.to_string();
        TaskProcess::new(move || async move {
            let slot = recorder.begin(&name);
            tokio::time::sleep(delay).await;
            recorder.end(slot);
            Ok(name)
        })
    }

    /// Process that sleeps for `delay` and then fails.
    pub fn failing_process(&self, name: &str, delay: Duration) -> TaskProcess {
        let recorder = self.clone();
        let name = name.to_string();
        TaskProcess::new(move || async move {
            let slot = recorder.begin(&name);
            tokio::time::sleep(delay).await;
            recorder.end(slot);
            Err::<String, _>(anyhow!("{name} failed on purpose"))
        })
    }

    fn begin(&self, task: &str) -> usize {
        let mut spans = self.spans.lock().unwrap();
        spans.push(RunSpan {
            task: task.to_string(),
            start: Instant::now(),
            end: None,
        });
        spans.len() - 1
    }

    fn end(&self, slot: usize) {
        let mut spans = self.spans.lock().unwrap();
        spans[slot].end = Some(Instant::now());
    }

    pub fn spans(&self) -> Vec<RunSpan> {
        self.spans.lock().unwrap().clone()
    }

    /// Task names in the order their runners started.
    pub fn started(&self) -> Vec<String> {
        self.spans().into_iter().map(|span| span.task).collect()
    }

    /// How many times `task`'s runner was invoked.
    pub fn runs(&self, task: &str) -> usize {
        self.spans().iter().filter(|span| span.task == task).count()
    }

    /// Largest number of runners that were in flight at the same instant.
    ///
    /// Ends sort before starts at equal timestamps, so back-to-back runs do
    /// not count as overlapping.
    pub fn max_overlap(&self) -> usize {
        let mut edges: Vec<(Instant, i64)> = Vec::new();
        for span in self.spans() {
            edges.push((span.start, 1));
            if let Some(end) = span.end {
                edges.push((end, -1));
            }
        }
        edges.sort();

        let mut current = 0_i64;
        let mut max = 0_i64;
        for (_, delta) in edges {
            current += delta;
            max = max.max(current);
        }
        max as usize
    }
}
