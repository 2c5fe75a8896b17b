// src/pipeline/process.rs

//! Per-link orchestration.
//!
//! ```text
//! RECEIVED -> EXTRACTING -> CLASSIFYING -> ACQUIRING -> DELIVERING
//!          -> DESCRIBING -> FINALIZING -> DONE
//! ```
//!
//! Any state may end in ERRORED. The link's scratch directory is removed
//! before [`LinkProcessor::process`] returns, whatever the final state.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::models::{
    ChatId, Config, DeliveryOutcome, MediaDescriptor, MediaKind, Messages, OutboundMessage,
    TextFormat,
};
use crate::pipeline::acquire::AcquisitionEngine;
use crate::pipeline::classify::classify;
use crate::pipeline::deliver::DeliveryEngine;
use crate::services::{ChatTransport, MediaExtractor};
use crate::utils::{ScratchDir, truncate_chars};

/// Stages of link processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Received,
    Extracting,
    Classifying,
    Acquiring,
    Delivering,
    Describing,
    Finalizing,
    Done,
    Errored,
}

/// What happened to one link.
#[derive(Debug, Clone)]
pub struct LinkReport {
    /// Every state entered, in order
    pub trace: Vec<LinkState>,
    pub kind: Option<MediaKind>,
    pub outcomes: Vec<DeliveryOutcome>,
}

impl LinkReport {
    fn new() -> Self {
        Self {
            trace: vec![LinkState::Received],
            kind: None,
            outcomes: Vec::new(),
        }
    }

    pub fn state(&self) -> LinkState {
        self.trace.last().copied().unwrap_or(LinkState::Received)
    }

    fn enter(&mut self, state: LinkState) {
        log::debug!("link: {:?} -> {:?}", self.state(), state);
        self.trace.push(state);
    }
}

/// Orchestration settings.
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    pub description_limit: usize,
    /// Pause after each successful primary delivery
    pub inter_artifact_delay: Duration,
    /// Parent of the per-link scratch directories
    pub work_dir: Option<PathBuf>,
}

impl ProcessOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            description_limit: config.delivery.description_limit,
            inter_artifact_delay: Duration::from_millis(config.delivery.inter_artifact_delay_ms),
            work_dir: config.acquisition.work_dir.as_ref().map(PathBuf::from),
        }
    }
}

/// Drives a link from extraction to the completion notice.
#[derive(Clone)]
pub struct LinkProcessor {
    chat: Arc<dyn ChatTransport>,
    extractor: Arc<dyn MediaExtractor>,
    acquisition: AcquisitionEngine,
    delivery: DeliveryEngine,
    messages: Arc<Messages>,
    options: ProcessOptions,
}

impl LinkProcessor {
    pub fn new(
        chat: Arc<dyn ChatTransport>,
        extractor: Arc<dyn MediaExtractor>,
        acquisition: AcquisitionEngine,
        delivery: DeliveryEngine,
        messages: Arc<Messages>,
        options: ProcessOptions,
    ) -> Self {
        Self {
            chat,
            extractor,
            acquisition,
            delivery,
            messages,
            options,
        }
    }

    /// Process `url` on behalf of `chat`.
    pub async fn process(&self, chat: Option<ChatId>, url: &str) -> LinkReport {
        let mut report = LinkReport::new();

        let Some(chat) = chat else {
            log::warn!("Dropping {}: no chat to answer in", url);
            report.enter(LinkState::Errored);
            return report;
        };

        let mut scratch = match ScratchDir::new(self.options.work_dir.as_deref()) {
            Ok(scratch) => scratch,
            Err(e) => {
                log::error!("Cannot create scratch dir for {}: {}", url, e);
                self.notify(chat, &self.messages.processing_failed).await;
                report.enter(LinkState::Errored);
                return report;
            }
        };

        self.run(chat, url, &scratch, &mut report).await;

        if let Err(e) = scratch.cleanup() {
            log::error!("Failed to remove {}: {}", scratch.path().display(), e);
        }
        report
    }

    async fn run(&self, chat: ChatId, url: &str, scratch: &ScratchDir, report: &mut LinkReport) {
        log::info!("Processing {} for chat {}", url, chat);
        if let Err(e) = self.chat.set_typing(chat).await {
            log::debug!("typing indicator failed for chat {}: {}", chat, e);
        }

        report.enter(LinkState::Extracting);
        let raw = match self.extractor.extract(url).await {
            Ok(raw) => raw,
            Err(e) => {
                log::error!("{}", e);
                self.notify(chat, &self.messages.processing_failed).await;
                report.enter(LinkState::Errored);
                return;
            }
        };

        report.enter(LinkState::Classifying);
        let descriptor = classify(&raw, url);
        report.kind = Some(descriptor.kind);
        log::info!(
            "{} classified as {:?} ({} sub-item(s))",
            url,
            descriptor.kind,
            descriptor.items.len()
        );

        report.enter(LinkState::Acquiring);
        let acquired = self.acquisition.acquire(&descriptor, scratch.path()).await;
        let description = description_of(&descriptor);

        if acquired.artifacts.is_empty() && description.is_none() {
            self.notify(chat, &self.messages.no_media).await;
            report.enter(LinkState::Done);
            return;
        }

        report.enter(LinkState::Delivering);
        for artifact in &acquired.artifacts {
            let outcome = self.delivery.deliver(chat, artifact).await;
            if matches!(outcome, DeliveryOutcome::Delivered(_)) {
                tokio::time::sleep(self.options.inter_artifact_delay).await;
            }
            report.outcomes.push(outcome);
        }

        report.enter(LinkState::Describing);
        if let Some(description) = description {
            let text = truncate_chars(description, self.options.description_limit);
            let message = OutboundMessage::text(text).with_format(TextFormat::Html);
            if let Err(e) = self.chat.post(chat, &message).await {
                log::warn!("Failed to post description to chat {}: {}", chat, e);
                self.notify(chat, &self.messages.description_failed).await;
            }
        }

        report.enter(LinkState::Finalizing);
        self.notify(chat, &self.messages.done()).await;
        report.enter(LinkState::Done);
    }

    async fn notify(&self, chat: ChatId, text: &str) {
        if let Err(e) = self.chat.post(chat, &OutboundMessage::text(text)).await {
            log::error!("Failed to post to chat {}: {}", chat, e);
        }
    }
}

fn description_of(descriptor: &MediaDescriptor) -> Option<&str> {
    descriptor
        .description
        .as_deref()
        .filter(|d| !d.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeliveryConfig;
    use crate::storage::FallbackStorage;
    use crate::testing::{MockChat, MockExtractor, MockFallback, MockUploader};
    use tempfile::TempDir;

    const LINK: &str = "https://example.com/p/1";

    struct Fixture {
        chat: Arc<MockChat>,
        processor: LinkProcessor,
        work: TempDir,
    }

    fn fixture(extractor: MockExtractor, uploader: MockUploader) -> Fixture {
        fixture_with(extractor, uploader, None)
    }

    fn fixture_with(
        extractor: MockExtractor,
        uploader: MockUploader,
        fallback: Option<Arc<MockFallback>>,
    ) -> Fixture {
        let chat = Arc::new(MockChat::new());
        let extractor = Arc::new(extractor);
        let messages = Arc::new(Messages {
            donate_url: Some("https://donate.example".into()),
            ..Messages::default()
        });
        let acquisition = AcquisitionEngine::with_client(extractor.clone(), reqwest::Client::new(), 2);
        let delivery = DeliveryEngine::new(
            chat.clone(),
            Arc::new(uploader),
            fallback.map(|f| f as Arc<dyn FallbackStorage>),
            messages.clone(),
            &DeliveryConfig::default(),
        );
        let work = TempDir::new().unwrap();
        let options = ProcessOptions {
            description_limit: 4000,
            inter_artifact_delay: Duration::from_secs(1),
            work_dir: Some(work.path().to_path_buf()),
        };
        let processor = LinkProcessor::new(chat.clone(), extractor, acquisition, delivery, messages, options);
        Fixture {
            chat,
            processor,
            work,
        }
    }

    fn work_dir_is_empty(f: &Fixture) -> bool {
        std::fs::read_dir(f.work.path()).unwrap().count() == 0
    }

    #[tokio::test(start_paused = true)]
    async fn test_video_link_full_flow() {
        let f = fixture(
            MockExtractor::with(LINK, serde_json::json!({"id": "v1", "duration": 9, "title": "Clip"})),
            MockUploader::ok("tok"),
        );

        let report = f.processor.process(Some(5), LINK).await;

        assert_eq!(
            report.trace,
            vec![
                LinkState::Received,
                LinkState::Extracting,
                LinkState::Classifying,
                LinkState::Acquiring,
                LinkState::Delivering,
                LinkState::Describing,
                LinkState::Finalizing,
                LinkState::Done,
            ]
        );
        assert_eq!(report.outcomes, vec![DeliveryOutcome::Delivered("tok".into())]);

        let messages = f.chat.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].attachments.len(), 1);
        assert_eq!(messages[1].text, "Clip");
        assert_eq!(messages[1].format, Some(TextFormat::Html));
        assert!(messages[2].text.contains("https://donate.example"));
        assert_eq!(*f.chat.typing.lock().unwrap(), vec![5]);
        assert!(work_dir_is_empty(&f));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_media_and_no_description() {
        let f = fixture(MockExtractor::with(LINK, serde_json::json!({})), MockUploader::ok("tok"));

        let report = f.processor.process(Some(5), LINK).await;

        assert_eq!(report.state(), LinkState::Done);
        assert!(!report.trace.contains(&LinkState::Delivering));
        assert_eq!(f.chat.texts(), vec![Messages::default().no_media]);
        assert!(work_dir_is_empty(&f));
    }

    #[tokio::test(start_paused = true)]
    async fn test_description_only_is_still_delivered() {
        let f = fixture(
            MockExtractor::with(LINK, serde_json::json!({"title": "Just text"})),
            MockUploader::ok("tok"),
        );

        let report = f.processor.process(Some(5), LINK).await;

        assert_eq!(report.state(), LinkState::Done);
        let texts = f.chat.texts();
        assert_eq!(texts.len(), 2);
        assert_eq!(texts[0], "Just text");
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_description_truncated() {
        let long = "x".repeat(5000);
        let f = fixture(
            MockExtractor::with(LINK, serde_json::json!({"description": long})),
            MockUploader::ok("tok"),
        );

        f.processor.process(Some(5), LINK).await;

        let description = &f.chat.messages()[0];
        assert_eq!(description.text.chars().count(), 4003);
        assert!(description.text.ends_with("..."));
        assert_eq!(description.format, Some(TextFormat::Html));
    }

    #[tokio::test(start_paused = true)]
    async fn test_extraction_failure_errors_and_cleans_up() {
        let f = fixture(MockExtractor::default(), MockUploader::ok("tok"));

        let report = f.processor.process(Some(5), LINK).await;

        assert_eq!(report.state(), LinkState::Errored);
        assert_eq!(f.chat.texts(), vec![Messages::default().processing_failed]);
        assert!(work_dir_is_empty(&f));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_chat_errors_without_messages() {
        let f = fixture(MockExtractor::with(LINK, serde_json::json!({"duration": 1})), MockUploader::ok("tok"));

        let report = f.processor.process(None, LINK).await;

        assert_eq!(report.trace, vec![LinkState::Received, LinkState::Errored]);
        assert!(f.chat.messages().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_delivery_does_not_stop_the_link() {
        let f = fixture(
            MockExtractor::with(LINK, serde_json::json!({"id": "v1", "duration": 9})),
            MockUploader::failing(),
        );

        let report = f.processor.process(Some(5), LINK).await;

        assert_eq!(report.state(), LinkState::Done);
        assert!(matches!(report.outcomes[..], [DeliveryOutcome::Failed(_)]));
        let texts = f.chat.texts();
        assert_eq!(texts[0], Messages::default().fallback_unavailable);
        assert!(texts[1].starts_with("✅"));
        assert!(work_dir_is_empty(&f));
    }

    fn two_video_gallery() -> serde_json::Value {
        serde_json::json!({
            "_type": "playlist",
            "title": "Album",
            "entries": [{"id": "a", "duration": 5}, {"id": "b", "duration": 5}]
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_item_does_not_stop_later_items() {
        let fallback = Arc::new(MockFallback::ok("https://disk/a"));
        let f = fixture_with(
            MockExtractor::with(LINK, two_video_gallery()),
            MockUploader::scripted(vec![
                Err("connection reset".into()),
                Err("connection reset".into()),
                Ok(serde_json::json!({"token": "tok"})),
            ]),
            Some(fallback.clone()),
        );

        let report = f.processor.process(Some(5), LINK).await;

        assert_eq!(report.state(), LinkState::Done);
        assert_eq!(
            report.outcomes,
            vec![
                DeliveryOutcome::FallbackDelivered("https://disk/a".into()),
                DeliveryOutcome::Delivered("tok".into()),
            ]
        );
        let stored = fallback.stored();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].file_name().unwrap(), "a_1.mp4");

        let messages = f.chat.messages();
        assert_eq!(messages[0].text, Messages::default().fallback_link("https://disk/a"));
        assert_eq!(messages[1].attachments.len(), 1);
        assert_eq!(messages[2].text, "Album");
        assert!(messages[3].text.starts_with("✅"));
        assert!(work_dir_is_empty(&f));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_between_delivered_artifacts() {
        let f = fixture(MockExtractor::with(LINK, two_video_gallery()), MockUploader::ok("tok"));

        let report = f.processor.process(Some(5), LINK).await;

        assert_eq!(report.outcomes.len(), 2);
        let attempts = f.chat.attachment_attempts.lock().unwrap().clone();
        assert_eq!(attempts.len(), 2);
        // first announce wait (2s) plus the 1s pause after the first delivery
        assert_eq!(attempts[1] - attempts[0], Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_description_is_reported() {
        let f = fixture(
            MockExtractor::with(LINK, serde_json::json!({"title": "<b>broken"})),
            MockUploader::ok("tok"),
        );
        *f.chat.formatted_failures.lock().unwrap() = 1;

        let report = f.processor.process(Some(5), LINK).await;

        assert_eq!(report.state(), LinkState::Done);
        let texts = f.chat.texts();
        assert_eq!(texts.len(), 2);
        assert_eq!(texts[0], Messages::default().description_failed);
        assert!(texts[1].starts_with("✅"));
    }

    #[test]
    fn test_link_processing_can_be_spawned() {
        fn assert_spawnable<F: std::future::Future + Send + 'static>(_: F) {}

        let f = fixture(MockExtractor::with(LINK, two_video_gallery()), MockUploader::ok("tok"));
        let processor = f.processor.clone();
        assert_spawnable(async move {
            processor.process(Some(5), LINK).await;
        });
    }
}
