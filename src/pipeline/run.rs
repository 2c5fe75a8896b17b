// src/pipeline/run.rs

//! The polling loop and event dispatch.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio::task::JoinSet;

use crate::models::{ChatId, EventKind, InboundEvent, Messages, OutboundMessage, UserId};
use crate::pipeline::ingest::{ProcessedEventSet, UpdateIngestor};
use crate::pipeline::process::{LinkProcessor, LinkReport};
use crate::services::ChatTransport;
use crate::utils::is_link;

/// How an inbound event was handled.
#[derive(Debug, Clone)]
pub enum Disposition {
    /// Seen before in this process
    Duplicate,
    /// Not for us: no chat, or authored by a bot
    Ignored,
    Welcomed,
    Hinted,
    Processed(LinkReport),
}

/// Shared state of a running relay.
pub struct RelayContext {
    chat: Arc<dyn ChatTransport>,
    processor: LinkProcessor,
    messages: Arc<Messages>,
    bot_id: Option<UserId>,
    processed: Mutex<ProcessedEventSet>,
}

impl RelayContext {
    pub fn new(
        chat: Arc<dyn ChatTransport>,
        processor: LinkProcessor,
        messages: Arc<Messages>,
        bot_id: Option<UserId>,
    ) -> Self {
        Self {
            chat,
            processor,
            messages,
            bot_id,
            processed: Mutex::new(ProcessedEventSet::new()),
        }
    }

    /// Record the event id; `false` when it was already handled.
    fn first_sighting(&self, id: &str) -> bool {
        match self.processed.lock() {
            Ok(mut set) => set.insert(id),
            Err(poisoned) => poisoned.into_inner().insert(id),
        }
    }

    /// Handle one inbound event to completion.
    pub async fn handle_event(&self, event: InboundEvent) -> Disposition {
        if !self.first_sighting(&event.id) {
            log::debug!("Skipping duplicate event {}", event.id);
            return Disposition::Duplicate;
        }
        let Some(chat) = event.chat_id else {
            log::warn!("Event {} names no chat", event.id);
            return Disposition::Ignored;
        };
        if event.is_from_bot(self.bot_id) {
            log::debug!("Ignoring event {} from a bot", event.id);
            return Disposition::Ignored;
        }

        if event.kind == EventKind::SessionStarted || event.text == "/start" {
            self.say(chat, &self.messages.welcome).await;
            return Disposition::Welcomed;
        }
        if !is_link(&event.text) {
            self.say(chat, &self.messages.usage_hint).await;
            return Disposition::Hinted;
        }

        let report = self.processor.process(Some(chat), event.text.trim()).await;
        log::info!(
            "Event {} finished in {:?} with {} delivery outcome(s)",
            event.id,
            report.state(),
            report.outcomes.len()
        );
        Disposition::Processed(report)
    }

    async fn say(&self, chat: ChatId, text: &str) {
        if let Err(e) = self.chat.post(chat, &OutboundMessage::text(text)).await {
            log::error!("Failed to post to chat {}: {}", chat, e);
        }
    }
}

/// Arrival-order queues for concurrent dispatch.
///
/// Each dispatched event of a chat holds a completion sender; the next event
/// of that chat waits on the matching receiver before it starts. Only the
/// newest receiver per chat is kept, and chats whose last event finished are
/// pruned.
#[derive(Default)]
struct ChatQueues {
    tails: HashMap<ChatId, oneshot::Receiver<()>>,
}

impl ChatQueues {
    /// Queue the next event of `chat`. Returns the signal of the event ahead
    /// of it, if any, and the sender to drop once this event is handled.
    fn enqueue(&mut self, chat: ChatId) -> (Option<oneshot::Receiver<()>>, oneshot::Sender<()>) {
        let (done, tail) = oneshot::channel();
        (self.tails.insert(chat, tail), done)
    }

    fn prune(&mut self) {
        self.tails
            .retain(|_, tail| matches!(tail.try_recv(), Err(TryRecvError::Empty)));
    }
}

/// Loop settings.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Pause after a failed poll
    pub error_backoff: Duration,
    /// Process different chats in parallel
    pub concurrent_chats: bool,
}

/// Poll and dispatch until `shutdown` resolves.
///
/// Poll failures back off for `error_backoff` and retry with the same
/// cursor. In sequential mode each event finishes before the next poll; in
/// concurrent mode events run on tasks, and the events of one chat are
/// handled one at a time in arrival order.
pub async fn run<S>(
    ctx: Arc<RelayContext>,
    mut ingestor: UpdateIngestor,
    options: RunOptions,
    shutdown: S,
) -> crate::error::Result<()>
where
    S: Future<Output = ()>,
{
    ingestor.resume().await?;
    log::info!(
        "Relay loop started ({} mode)",
        if options.concurrent_chats { "concurrent" } else { "sequential" }
    );

    tokio::pin!(shutdown);
    let mut tasks = JoinSet::new();
    let mut queues = ChatQueues::default();

    loop {
        let polled = tokio::select! {
            _ = &mut shutdown => break,
            polled = ingestor.poll() => polled,
        };

        let events = match polled {
            Ok(events) => events,
            Err(e) => {
                log::error!("Update loop error: {}", e);
                tokio::select! {
                    _ = &mut shutdown => break,
                    _ = tokio::time::sleep(options.error_backoff) => continue,
                }
            }
        };

        for event in events {
            if options.concurrent_chats {
                let ctx = Arc::clone(&ctx);
                let turn = event.chat_id.map(|chat| queues.enqueue(chat));
                tasks.spawn(async move {
                    // `_done` is dropped once the event is handled
                    let (ahead, _done) = turn.unzip();
                    if let Some(ahead) = ahead.flatten() {
                        let _ = ahead.await;
                    }
                    ctx.handle_event(event).await;
                });
            } else {
                ctx.handle_event(event).await;
            }
        }

        while let Some(joined) = tasks.try_join_next() {
            if let Err(e) = joined {
                log::error!("Link task failed: {}", e);
            }
        }
        queues.prune();
    }

    if !tasks.is_empty() {
        log::info!("Waiting for {} in-flight link task(s)", tasks.len());
    }
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            log::error!("Link task failed: {}", e);
        }
    }
    log::info!("Relay loop stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Cursor, DeliveryConfig, IngestConfig, PollBatch, Sender};
    use crate::pipeline::acquire::AcquisitionEngine;
    use crate::pipeline::deliver::DeliveryEngine;
    use crate::pipeline::process::{LinkState, ProcessOptions};
    use crate::testing::{MemoryCursorStore, MockChat, MockExtractor, MockUploader};

    const LINK: &str = "https://example.com/p/1";

    fn context(chat: &Arc<MockChat>) -> Arc<RelayContext> {
        context_with(chat, MockExtractor::with(LINK, serde_json::json!({"title": "Post"})))
    }

    fn context_with(chat: &Arc<MockChat>, extractor: MockExtractor) -> Arc<RelayContext> {
        let extractor = Arc::new(extractor);
        let messages = Arc::new(Messages::default());
        let acquisition = AcquisitionEngine::with_client(extractor.clone(), reqwest::Client::new(), 1);
        let delivery = DeliveryEngine::new(
            chat.clone(),
            Arc::new(MockUploader::ok("tok")),
            None,
            messages.clone(),
            &DeliveryConfig::default(),
        );
        let processor = LinkProcessor::new(
            chat.clone(),
            extractor,
            acquisition,
            delivery,
            messages.clone(),
            ProcessOptions {
                description_limit: 4000,
                inter_artifact_delay: Duration::ZERO,
                work_dir: None,
            },
        );
        Arc::new(RelayContext::new(chat.clone(), processor, messages, Some(chat.bot_id)))
    }

    fn message(id: &str, text: &str) -> InboundEvent {
        InboundEvent {
            id: id.into(),
            kind: EventKind::MessageReceived,
            chat_id: Some(9),
            sender: Some(Sender {
                user_id: 100,
                is_bot: false,
            }),
            text: text.into(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_event_is_silent() {
        let chat = Arc::new(MockChat::new());
        let ctx = context(&chat);

        let first = ctx.handle_event(message("m1", LINK)).await;
        assert!(matches!(first, Disposition::Processed(ref r) if r.state() == LinkState::Done));
        let sent = chat.messages().len();

        let second = ctx.handle_event(message("m1", LINK)).await;
        assert!(matches!(second, Disposition::Duplicate));
        assert_eq!(chat.messages().len(), sent);
    }

    #[tokio::test]
    async fn test_start_and_session_started_welcome() {
        let chat = Arc::new(MockChat::new());
        let ctx = context(&chat);

        assert!(matches!(ctx.handle_event(message("m1", "/start")).await, Disposition::Welcomed));
        let started = InboundEvent {
            kind: EventKind::SessionStarted,
            text: String::new(),
            ..message("s1", "")
        };
        assert!(matches!(ctx.handle_event(started).await, Disposition::Welcomed));

        let welcome = Messages::default().welcome;
        assert_eq!(chat.texts(), vec![welcome.clone(), welcome]);
    }

    #[tokio::test]
    async fn test_plain_text_gets_hint() {
        let chat = Arc::new(MockChat::new());
        let ctx = context(&chat);

        assert!(matches!(ctx.handle_event(message("m1", "hello")).await, Disposition::Hinted));
        assert_eq!(chat.texts(), vec![Messages::default().usage_hint]);
    }

    #[tokio::test]
    async fn test_bot_and_chatless_events_ignored() {
        let chat = Arc::new(MockChat::new());
        let ctx = context(&chat);

        let from_self = InboundEvent {
            sender: Some(Sender {
                user_id: chat.bot_id,
                is_bot: false,
            }),
            ..message("m1", LINK)
        };
        let from_bot = InboundEvent {
            sender: Some(Sender {
                user_id: 55,
                is_bot: true,
            }),
            ..message("m2", LINK)
        };
        let chatless = InboundEvent {
            chat_id: None,
            ..message("m3", LINK)
        };

        for event in [from_self, from_bot, chatless] {
            assert!(matches!(ctx.handle_event(event).await, Disposition::Ignored));
        }
        assert!(chat.messages().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_backs_off_and_keeps_cursor() {
        let chat = Arc::new(MockChat::new());
        chat.push_poll(Err("boom".into()));
        chat.push_poll(Ok(PollBatch {
            events: vec![message("m1", "hello")],
            next_cursor: Some(Cursor(21)),
        }));
        let store = Arc::new(MemoryCursorStore::with(Cursor(20)));
        let ingestor = UpdateIngestor::new(chat.clone(), store.clone(), &IngestConfig::default());
        let options = RunOptions {
            error_backoff: Duration::from_secs(5),
            concurrent_chats: false,
        };

        let start = tokio::time::Instant::now();
        let probe = chat.clone();
        let shutdown = async move {
            while probe.messages().is_empty() {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        };
        run(context(&chat), ingestor, options, shutdown).await.unwrap();

        assert!(tokio::time::Instant::now() - start >= Duration::from_secs(5));
        assert_eq!(
            chat.poll_cursors.lock().unwrap()[..2],
            [Some(Cursor(20)), Some(Cursor(20))]
        );
        assert_eq!(*store.saves.lock().unwrap(), vec![Cursor(21)]);
        assert_eq!(chat.texts(), vec![Messages::default().usage_hint]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_mode_processes_events() {
        let chat = Arc::new(MockChat::new());
        let mut other_chat = message("m2", "/start");
        other_chat.chat_id = Some(10);
        chat.push_poll(Ok(PollBatch {
            events: vec![message("m1", LINK), other_chat],
            next_cursor: Some(Cursor(2)),
        }));
        let store = Arc::new(MemoryCursorStore::with(Cursor(1)));
        let ingestor = UpdateIngestor::new(chat.clone(), store, &IngestConfig::default());
        let options = RunOptions {
            error_backoff: Duration::from_secs(5),
            concurrent_chats: true,
        };

        let probe = chat.clone();
        let shutdown = async move {
            while probe.messages().len() < 3 {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        };
        run(context(&chat), ingestor, options, shutdown).await.unwrap();

        let posted = chat.posted.lock().unwrap();
        let to_nine: Vec<_> = posted.iter().filter(|(c, _)| *c == 9).map(|(_, m)| m.text.clone()).collect();
        assert_eq!(to_nine[0], "Post");
        assert!(posted.iter().any(|(c, _)| *c == 10));
    }

    fn assert_spawnable<F: Future + Send + 'static>(_: F) {}

    #[test]
    fn test_event_handling_can_be_spawned() {
        let chat = Arc::new(MockChat::new());
        let ctx = context(&chat);
        assert_spawnable(async move {
            ctx.handle_event(message("m1", LINK)).await;
        });
    }

    #[tokio::test]
    async fn test_chat_queue_waits_for_event_ahead() {
        let mut queues = ChatQueues::default();

        let (ahead, first_done) = queues.enqueue(9);
        assert!(ahead.is_none());
        let (ahead, second_done) = queues.enqueue(9);
        let (other_ahead, _other_done) = queues.enqueue(10);
        assert!(other_ahead.is_none());

        let mut ahead = ahead.unwrap();
        assert!(matches!(ahead.try_recv(), Err(TryRecvError::Empty)));
        drop(first_done);
        assert!(ahead.await.is_err());

        queues.prune();
        assert_eq!(queues.tails.len(), 2);
        drop(second_done);
        queues.prune();
        assert_eq!(queues.tails.keys().copied().collect::<Vec<_>>(), vec![10]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_mode_keeps_chat_order() {
        const SLOW: &str = "https://example.com/v/slow";
        const FAST: &str = "https://example.com/p/fast";
        let mut extractor = MockExtractor::with(
            SLOW,
            serde_json::json!({"id": "slow", "duration": 5, "title": "first"}),
        );
        extractor.add(FAST, serde_json::json!({"title": "second"}));

        let chat = Arc::new(MockChat::new());
        chat.push_poll(Ok(PollBatch {
            events: vec![message("m1", SLOW), message("m2", FAST)],
            next_cursor: Some(Cursor(2)),
        }));
        let store = Arc::new(MemoryCursorStore::with(Cursor(1)));
        let ingestor = UpdateIngestor::new(chat.clone(), store, &IngestConfig::default());
        let options = RunOptions {
            error_backoff: Duration::from_secs(5),
            concurrent_chats: true,
        };

        let probe = chat.clone();
        let shutdown = async move {
            while probe.messages().len() < 5 {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        };
        run(context_with(&chat, extractor), ingestor, options, shutdown)
            .await
            .unwrap();

        let messages = chat.messages();
        let done = Messages::default().done();
        assert_eq!(messages[0].attachments.len(), 1);
        let texts: Vec<_> = messages[1..].iter().map(|m| m.text.clone()).collect();
        assert_eq!(texts, vec!["first".to_string(), done.clone(), "second".to_string(), done]);
    }
}
