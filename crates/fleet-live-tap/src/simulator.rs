//! Tap simulator driver task.

use std::time::{SystemTime, UNIX_EPOCH};

use fleet_live_core::{ConnectionState, ResetTimer, TapConfig};
use fleet_live_pubsub::{PubSubClient, Qos, Subscription};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_stream::wrappers::WatchStream;

use crate::{
    machine::{Effect, TapEvent, TapMachine, TapState},
    protocol::{FareDetails, HistoryEntry, TapResponse},
    tone::ToneSink,
};

/// Snapshot of everything a tap screen shows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TapView {
    pub state: TapState,
    pub current: Option<TapResponse>,
    /// Newest first.
    pub history: Vec<HistoryEntry>,
    pub connection: ConnectionState,
}

impl TapView {
    /// Headline for the reader screen.
    #[must_use]
    pub const fn title(&self) -> &'static str {
        match self.state {
            TapState::Ready => "Tap Below",
            TapState::Go => "GO",
            TapState::Denied => "DENIED",
        }
    }

    /// Line under the headline: the validator's message when it sent one.
    #[must_use]
    pub fn subtitle(&self) -> &str {
        let message = self
            .current
            .as_ref()
            .and_then(|r| r.message.as_deref())
            .filter(|m| !m.is_empty());
        match self.state {
            TapState::Ready => "Tap your card on reader",
            TapState::Go => message.unwrap_or("Amount detected"),
            TapState::Denied => message.unwrap_or("Denied"),
        }
    }

    /// Fare panel for the current response.
    #[must_use]
    pub fn fare_details(&self, selected_uid: &str) -> FareDetails {
        FareDetails::project(self.current.as_ref(), selected_uid)
    }
}

enum Command {
    Tap(String),
    Shutdown,
}

/// Publishes taps and tracks validator responses.
///
/// All state lives in one driver task; this handle only sends it commands
/// and reads its published `TapView`. Dropping the handle stops the driver
/// the same way `shutdown` does.
pub struct TapSimulator {
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<TapView>,
    task: Option<JoinHandle<()>>,
}

impl TapSimulator {
    /// Subscribe to the response topic on `client` and start the driver.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start<T: ToneSink>(client: PubSubClient, config: &TapConfig, tones: T) -> Self {
        let subscription = client.subscribe(config.response_topic.clone(), Qos::AtLeastOnce);
        let initial = TapView {
            connection: client.state(),
            ..TapView::default()
        };
        let (view_tx, view) = watch::channel(initial);
        let (commands, commands_rx) = mpsc::unbounded_channel();

        let driver = Driver {
            machine: TapMachine::new(config),
            request_topic: config.request_topic.clone(),
            response_topic: config.response_topic.clone(),
            connection: client.watch_state(),
            client,
            subscription,
            timer: ResetTimer::new(),
            tones,
            view: view_tx,
        };
        let task = tokio::spawn(driver.run(commands_rx));

        Self {
            commands,
            view,
            task: Some(task),
        }
    }

    /// Connect to the broker over MQTT and start the simulator.
    #[cfg(feature = "mqtt")]
    pub fn connect_mqtt<T: ToneSink>(config: &fleet_live_core::LiveViewConfig, tones: T) -> Self {
        Self::start(PubSubClient::connect_mqtt(&config.broker), &config.tap, tones)
    }

    /// Publish a tap for card `uid`, stamped with the current time.
    ///
    /// Dropped while the broker is disconnected.
    pub fn publish(&self, uid: impl Into<String>) {
        let _ = self.commands.send(Command::Tap(uid.into()));
    }

    /// Current snapshot.
    #[must_use]
    pub fn view(&self) -> TapView {
        self.view.borrow().clone()
    }

    /// Receiver that observes every snapshot change.
    #[must_use]
    pub fn watch_view(&self) -> watch::Receiver<TapView> {
        self.view.clone()
    }

    /// Stream of snapshots, starting with the current one.
    #[must_use]
    pub fn updates(&self) -> WatchStream<TapView> {
        WatchStream::new(self.view.clone())
    }

    /// Cancel the reset timer, unsubscribe and close the broker connection.
    pub async fn shutdown(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("Tap driver ended abnormally: {e}");
            }
        }
    }
}

struct Driver<T> {
    machine: TapMachine,
    request_topic: String,
    response_topic: String,
    client: PubSubClient,
    connection: watch::Receiver<ConnectionState>,
    subscription: Subscription,
    timer: ResetTimer,
    tones: T,
    view: watch::Sender<TapView>,
}

impl<T: ToneSink> Driver<T> {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let (reset_tx, mut reset_rx) = mpsc::unbounded_channel();

        loop {
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(Command::Tap(uid)) => {
                        self.apply(TapEvent::Tapped { uid, now: unix_now() }, &reset_tx);
                    }
                    Some(Command::Shutdown) | None => break,
                },

                Some(generation) = reset_rx.recv() => {
                    self.apply(TapEvent::ResetElapsed { generation }, &reset_tx);
                }

                delivery = self.subscription.recv() => match delivery {
                    Some(delivery) if delivery.topic == self.response_topic => {
                        self.apply(TapEvent::Response(delivery.payload), &reset_tx);
                    }
                    Some(_) => {}
                    None => break,
                },

                changed = self.connection.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *self.connection.borrow_and_update();
                    self.view.send_modify(|view| view.connection = state);
                }
            }
        }

        self.timer.cancel();
        self.client.unsubscribe(&self.response_topic);
        self.client.close().await;
        self.view.send_modify(|view| view.connection = ConnectionState::Disconnected);
        tracing::debug!("Tap simulator stopped");
    }

    fn apply(&mut self, event: TapEvent, reset_tx: &mpsc::UnboundedSender<u64>) {
        for effect in self.machine.handle(event) {
            match effect {
                Effect::Publish(request) => {
                    if let Err(e) = self.client.publish(&self.request_topic, &request, Qos::AtLeastOnce) {
                        tracing::warn!("Failed to publish tap: {e}");
                    }
                }
                Effect::PlayTone(tone) => self.tones.play(&tone),
                Effect::ArmReset { after, generation } => {
                    let reset_tx = reset_tx.clone();
                    self.timer.arm(after, move || {
                        let _ = reset_tx.send(generation);
                    });
                }
            }
        }

        let machine = &self.machine;
        self.view.send_if_modified(|view| {
            let next_current = machine.current();
            // A duplicate at capacity keeps length and head but evicts the tail.
            let modified = view.state != machine.state()
                || view.current.as_ref() != next_current
                || !view.history.iter().eq(machine.history().iter());
            if modified {
                view.state = machine.state();
                view.current = next_current.cloned();
                view.history = machine.history().to_vec();
            }
            modified
        });
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}
