//! Page processor: one page image in, one [`PageResult`] out.
//!
//! ## Retry Strategy
//!
//! Failed or timed-out model calls are retried with exponential backoff
//! (`retry_backoff_ms * 2^(attempt-1)`): with 500 ms base and 3 retries the
//! waits are 500 ms → 1 s → 2 s. When every attempt fails the page becomes a
//! failed [`PageResult`]; the error never propagates, so one bad page cannot
//! abort its siblings.

use crate::config::ConversionConfig;
use crate::error::{ModelError, PageError};
use crate::output::PageResult;
use crate::pipeline::encode::encode_page_file;
use crate::pipeline::model::VisionModel;
use crate::pipeline::postprocess::clean_markdown;
use crate::pipeline::render::PageImage;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Retry and timeout settings for model calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub timeout_secs: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &ConversionConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_ms: config.retry_backoff_ms,
            timeout_secs: config.api_timeout_secs,
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(1u64 << (attempt - 1).min(16)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ConversionConfig::default())
    }
}

/// Markdown of the most recently transcribed page, threaded through the
/// maintain-format chain by value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PriorContext(Option<String>);

impl PriorContext {
    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }

    /// The context the next page sees after `result`: the page's Markdown on
    /// success, otherwise the context it was given.
    fn advance(self, result: &PageResult) -> Self {
        if result.is_success() && !result.content().is_empty() {
            PriorContext(Some(result.content().to_string()))
        } else {
            self
        }
    }
}

/// Transcribe one page with no prior context.
pub async fn process_page(
    model: &dyn VisionModel,
    image: &PageImage,
    policy: &RetryPolicy,
) -> PageResult {
    run_page(model, image, None, policy).await
}

/// Transcribe one page in a maintain-format chain and return the context for
/// the next page.
pub async fn process_page_chained(
    model: &dyn VisionModel,
    image: &PageImage,
    prior: PriorContext,
    policy: &RetryPolicy,
) -> (PageResult, PriorContext) {
    let result = run_page(model, image, prior.as_deref(), policy).await;
    let next = prior.advance(&result);
    (result, next)
}

async fn run_page(
    model: &dyn VisionModel,
    image: &PageImage,
    prior_page: Option<&str>,
    policy: &RetryPolicy,
) -> PageResult {
    let page_num = image.page;
    let start = Instant::now();

    let image_data = match encode_page_file(&image.path, model.image_detail()).await {
        Ok(data) => data,
        Err(e) => {
            warn!("Page {}: could not read image: {}", page_num, e);
            return PageResult::failure(
                page_num,
                PageError::EncodeFailed {
                    page: page_num,
                    detail: e.to_string(),
                },
                0,
                0,
            );
        }
    };

    let mut last_err: Option<ModelError> = None;

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let backoff = policy.backoff(attempt);
            warn!(
                "Page {}: retry {}/{} after {:?}",
                page_num, attempt, policy.max_retries, backoff
            );
            sleep(backoff).await;
        }

        let call = model.complete(image_data.clone(), prior_page);
        let outcome = match timeout(Duration::from_secs(policy.timeout_secs), call).await {
            Ok(res) => res,
            Err(_) => Err(ModelError::Timeout {
                secs: policy.timeout_secs,
            }),
        };

        match outcome {
            Ok(completion) => {
                debug!(
                    "Page {}: {} input tokens, {} output tokens, {:?}",
                    page_num,
                    completion.input_tokens,
                    completion.output_tokens,
                    start.elapsed()
                );
                return PageResult::success(
                    page_num,
                    clean_markdown(&completion.content),
                    completion.input_tokens,
                    completion.output_tokens,
                );
            }
            Err(e) => {
                warn!("Page {}: attempt {} failed: {}", page_num, attempt + 1, e);
                last_err = Some(e);
            }
        }
    }

    let error = match last_err {
        Some(ModelError::Timeout { secs }) => PageError::Timeout {
            page: page_num,
            secs,
        },
        Some(e) => PageError::LlmFailed {
            page: page_num,
            retries: policy.max_retries,
            detail: e.to_string(),
        },
        None => PageError::LlmFailed {
            page: page_num,
            retries: policy.max_retries,
            detail: "Unknown error".to_string(),
        },
    };
    PageResult::failure(page_num, error, 0, 0)
}
