//! Broker-backed bus variant. Since the concrete broker driver is out of
//! scope, this drives an in-process bounded channel per topic with a
//! dedicated consumer thread, rather than a real network client — the
//! number of topics is small and fixed, so a thread-per-topic consumer is
//! cheap here even though it would not be in the GIL-bound source.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use async_trait::async_trait;

use crate::EventBus;
use crate::EventEnvelope;
use crate::TopicHandler;
use crate::invoke_handlers;

const POLL_TIMEOUT: Duration = Duration::from_millis(200);

struct TopicWorker {
    sender: mpsc::Sender<(EventEnvelope, Option<String>)>,
    stop: Arc<AtomicBool>,
    join_handle: Mutex<Option<JoinHandle<()>>>,
    handlers: Arc<Mutex<Vec<TopicHandler>>>,
}

impl TopicWorker {
    fn spawn(topic: String) -> Self {
        let (sender, receiver) = mpsc::channel::<(EventEnvelope, Option<String>)>();
        let stop = Arc::new(AtomicBool::new(false));
        let handlers: Arc<Mutex<Vec<TopicHandler>>> = Arc::new(Mutex::new(Vec::new()));

        let worker_stop = stop.clone();
        let worker_handlers = handlers.clone();
        let worker_topic = topic.clone();
        let join_handle = thread::spawn(move || {
            loop {
                match receiver.recv_timeout(POLL_TIMEOUT) {
                    Ok((envelope, _key)) => {
                        let handlers = worker_handlers
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .clone();
                        invoke_handlers(&worker_topic, &envelope, &handlers);
                    }
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        if worker_stop.load(Ordering::SeqCst) {
                            break;
                        }
                    }
                    Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
            }
        });

        Self {
            sender,
            stop,
            join_handle: Mutex::new(Some(join_handle)),
            handlers,
        }
    }
}

#[derive(Default)]
struct BrokerState {
    workers: HashMap<String, TopicWorker>,
}

impl BrokerState {
    fn worker(&mut self, topic: &str) -> &TopicWorker {
        self.workers
            .entry(topic.to_string())
            .or_insert_with(|| TopicWorker::spawn(topic.to_string()))
    }
}

/// One consumer thread per subscribed topic; `stop` signals every worker's
/// poll loop to exit on its next timeout and joins each thread.
pub struct BrokerBackedEventBus {
    state: Mutex<BrokerState>,
    running: AtomicBool,
}

impl Default for BrokerBackedEventBus {
    fn default() -> Self {
        Self {
            state: Mutex::new(BrokerState::default()),
            running: AtomicBool::new(false),
        }
    }
}

impl BrokerBackedEventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventBus for BrokerBackedEventBus {
    async fn publish(&self, topic: &str, envelope: EventEnvelope, key: Option<String>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let worker = state.worker(topic);
        if worker.sender.send((envelope, key)).is_err() {
            tracing::error!(topic, "broker-backed publish failed: consumer thread gone");
        }
    }

    async fn publish_batch(
        &self,
        topic: &str,
        envelopes: Vec<EventEnvelope>,
        keys: Option<Vec<Option<String>>>,
    ) {
        let mut keys = keys.unwrap_or_default();
        keys.resize(envelopes.len(), None);
        for (envelope, key) in envelopes.into_iter().zip(keys) {
            self.publish(topic, envelope, key).await;
        }
    }

    async fn subscribe(&self, topic: &str, handler: TopicHandler) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let worker = state.worker(topic);
        worker
            .handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handler);
    }

    async fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        for worker in state.workers.values_mut() {
            worker.stop.store(true, Ordering::SeqCst);
        }
        for worker in state.workers.values() {
            if let Some(handle) = worker
                .join_handle
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take()
            {
                let _ = handle.join();
            }
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
