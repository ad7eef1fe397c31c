//! Image resolver: pull every image once and pin steps to digests.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::sync::{Mutex, OnceCell};
use tokio_util::sync::CancellationToken;

use fleet_core::Step;

use crate::error::ExecError;
use crate::runtime::ContainerRuntime;

/// Concurrent pulls in flight while resolving a pipeline's images.
const PULL_CONCURRENCY: usize = 4;

/// Shared, deduplicating front for [`ContainerRuntime::ensure_image`].
///
/// Concurrent requests for the same reference wait on one pull.
pub struct ImageCache {
    runtime: Arc<dyn ContainerRuntime>,
    images: Mutex<HashMap<String, Arc<OnceCell<String>>>>,
}

impl ImageCache {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            runtime,
            images: Mutex::new(HashMap::new()),
        }
    }

    /// Digest of `image`, pulling it on first request.
    pub async fn ensure(&self, image: &str) -> Result<String, ExecError> {
        let cell = {
            let mut images = self.images.lock().await;
            images.entry(image.to_string()).or_default().clone()
        };
        cell.get_or_try_init(|| async {
            tracing::debug!(image, "pulling image");
            self.runtime.ensure_image(image).await
        })
        .await
        .cloned()
        .map_err(|source| ExecError::PullImage {
            image: image.to_string(),
            source,
        })
    }
}

/// Pull every distinct image `steps` reference plus `utility_images`, then
/// write the resolved digests back into the steps.
///
/// `progress` receives a fraction in `[0, 1]`: `0` first, `1` last, never
/// decreasing.
pub async fn resolve_images(
    images: &ImageCache,
    steps: &mut [Step],
    utility_images: &[&str],
    cancel: &CancellationToken,
    mut progress: impl FnMut(f64),
) -> Result<(), ExecError> {
    let mut distinct: Vec<String> = Vec::new();
    let references = steps
        .iter()
        .map(|s| s.container.as_str())
        .chain(utility_images.iter().copied());
    for image in references {
        if !distinct.iter().any(|i| i == image) {
            distinct.push(image.to_string());
        }
    }

    let total = distinct.len();
    progress(0.0);

    let mut pulls = stream::iter(distinct.into_iter().map(|image| async move {
        let digest = images.ensure(&image).await;
        (image, digest)
    }))
    .buffer_unordered(PULL_CONCURRENCY);

    let mut digests: HashMap<String, String> = HashMap::new();
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ExecError::Cancelled),
            next = pulls.next() => next,
        };
        let Some((image, digest)) = next else { break };
        digests.insert(image, digest?);
        progress(digests.len() as f64 / total as f64);
    }

    for step in steps.iter_mut() {
        step.image_digest = digests.get(&step.container).cloned();
    }
    tracing::info!(images = total, "container images resolved");
    progress(1.0);
    Ok(())
}
