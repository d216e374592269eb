//! Batch scheduler: fan page images out to the page processor.
//!
//! Pages are split into consecutive batches of `concurrency` pages. Every page
//! in a batch is in flight at once; the next batch starts only after the
//! current one has fully settled. This caps simultaneous model calls at
//! `concurrency`, which is what provider rate limits are expressed in.
//!
//! `join_all` yields results in input order, so the output always follows
//! page order no matter which call finishes first.

use crate::output::PageResult;
use crate::pipeline::model::VisionModel;
use crate::pipeline::page::{process_page, process_page_chained, PriorContext, RetryPolicy};
use crate::pipeline::render::PageImage;
use crate::progress::ProgressCallback;
use futures::future::join_all;
use std::num::NonZeroUsize;
use tracing::{debug, info};

/// Process `images` in sequential batches of at most `concurrency` pages.
pub async fn run_batches(
    images: &[PageImage],
    concurrency: NonZeroUsize,
    model: &dyn VisionModel,
    policy: &RetryPolicy,
    progress: Option<&ProgressCallback>,
) -> Vec<PageResult> {
    let total = images.len();
    let batches = total.div_ceil(concurrency.get());
    let mut results = Vec::with_capacity(total);

    for (batch_idx, batch) in images.chunks(concurrency.get()).enumerate() {
        info!(
            "Batch {}/{}: {} pages",
            batch_idx + 1,
            batches,
            batch.len()
        );
        if let Some(cb) = progress {
            cb.on_batch_start(batch_idx + 1, batches, batch.len());
        }

        let settled = join_all(batch.iter().map(|image| async move {
            if let Some(cb) = progress {
                cb.on_page_start(image.page, total);
            }
            let result = process_page(model, image, policy).await;
            report(progress, &result, total);
            result
        }))
        .await;

        debug!("Batch {}/{} settled", batch_idx + 1, batches);
        results.extend(settled);
    }

    results
}

/// Process `images` one at a time, feeding each page's Markdown into the next
/// page's prompt.
pub async fn run_sequential(
    images: &[PageImage],
    model: &dyn VisionModel,
    policy: &RetryPolicy,
    progress: Option<&ProgressCallback>,
) -> Vec<PageResult> {
    let total = images.len();
    let mut results = Vec::with_capacity(total);
    let mut prior = PriorContext::default();

    for image in images {
        if let Some(cb) = progress {
            cb.on_page_start(image.page, total);
        }
        let (result, next) = process_page_chained(model, image, prior, policy).await;
        report(progress, &result, total);
        prior = next;
        results.push(result);
    }

    results
}

fn report(progress: Option<&ProgressCallback>, result: &PageResult, total: usize) {
    let Some(cb) = progress else { return };
    match result.error() {
        None => cb.on_page_complete(result.page(), total, result.content_length()),
        Some(e) => cb.on_page_error(result.page(), total, &e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use crate::pipeline::model::Completion;
    use crate::progress::ConversionProgressCallback;
    use async_trait::async_trait;
    use edgequake_llm::ImageData;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Answers with the call's sequence number after a delay that shrinks
    /// with each call, so later calls in a batch finish first.
    struct Countdown {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        fail_on_call: Option<usize>,
    }

    impl Countdown {
        fn new(fail_on_call: Option<usize>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                fail_on_call,
            }
        }
    }

    #[async_trait]
    impl VisionModel for Countdown {
        fn system_prompt(&self) -> &str {
            "test"
        }

        async fn complete(
            &self,
            _image: ImageData,
            prior_page: Option<&str>,
        ) -> Result<Completion, ModelError> {
            assert!(prior_page.is_none(), "batched pages never see prior context");
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(40u64.saturating_sub(n as u64 * 10))).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if Some(n) == self.fail_on_call {
                return Err(ModelError::Provider("nope".into()));
            }
            Ok(Completion {
                content: format!("call {n}"),
                input_tokens: 1,
                output_tokens: 1,
            })
        }
    }

    #[derive(Default)]
    struct Batches(Mutex<Vec<usize>>);

    impl ConversionProgressCallback for Batches {
        fn on_batch_start(&self, _batch: usize, _batches: usize, batch_size: usize) {
            self.0.lock().unwrap().push(batch_size);
        }
    }

    fn images(dir: &std::path::Path, n: usize) -> Vec<PageImage> {
        (1..=n)
            .map(|page| {
                let path = dir.join(format!("page-{page:04}.png"));
                std::fs::write(&path, b"png").unwrap();
                PageImage { page, path }
            })
            .collect()
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 0,
            backoff_ms: 1,
            timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn batches_are_sized_by_concurrency() {
        let dir = tempfile::tempdir().unwrap();
        let model = Countdown::new(None);
        let recorder = Arc::new(Batches::default());
        let cb: ProgressCallback = recorder.clone();

        let results = run_batches(
            &images(dir.path(), 3),
            NonZeroUsize::new(2).unwrap(),
            &model,
            &policy(),
            Some(&cb),
        )
        .await;

        assert_eq!(results.len(), 3);
        assert_eq!(*recorder.0.lock().unwrap(), vec![2, 1]);
        assert!(model.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn output_follows_page_order_not_completion_order() {
        let dir = tempfile::tempdir().unwrap();
        let model = Countdown::new(None);
        let results = run_batches(
            &images(dir.path(), 4),
            NonZeroUsize::new(4).unwrap(),
            &model,
            &policy(),
            None,
        )
        .await;
        let pages: Vec<usize> = results.iter().map(|r| r.page()).collect();
        assert_eq!(pages, [1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn failing_page_does_not_cancel_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let model = Countdown::new(Some(1));
        let results = run_batches(
            &images(dir.path(), 3),
            NonZeroUsize::new(3).unwrap(),
            &model,
            &policy(),
            None,
        )
        .await;
        assert_eq!(results.iter().filter(|r| r.is_success()).count(), 2);
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn sequential_runs_one_page_at_a_time() {
        struct Echo(Mutex<Vec<Option<String>>>);

        #[async_trait]
        impl VisionModel for Echo {
            fn system_prompt(&self) -> &str {
                "test"
            }

            async fn complete(
                &self,
                _image: ImageData,
                prior_page: Option<&str>,
            ) -> Result<Completion, ModelError> {
                let mut seen = self.0.lock().unwrap();
                seen.push(prior_page.map(str::to_string));
                Ok(Completion {
                    content: format!("page {}", seen.len()),
                    input_tokens: 0,
                    output_tokens: 0,
                })
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let model = Echo(Mutex::new(Vec::new()));
        let results = run_sequential(&images(dir.path(), 3), &model, &policy(), None).await;

        assert_eq!(results.len(), 3);
        assert_eq!(
            *model.0.lock().unwrap(),
            vec![None, Some("page 1".to_string()), Some("page 2".to_string())]
        );
    }

    #[tokio::test]
    async fn empty_input_runs_no_batches() {
        let model = Countdown::new(None);
        let results = run_batches(&[], NonZeroUsize::new(5).unwrap(), &model, &policy(), None).await;
        assert!(results.is_empty());
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }
}
