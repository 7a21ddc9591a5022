use std::time::Duration;

use safehome_shared::{
    HISTORY_WINDOW_CAP, HistoryRange, HistoryResponse, LocationSample, SubjectId,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};

use crate::channel::{self, ChannelHandle, ChannelState, ReconnectPolicy, Transport};
use crate::config::ClientConfig;
use crate::gateway::{Gateway, RequestError};
use crate::projector::{Projection, project};
use crate::reconciler::{HistoryReconciler, PushOutcome};

const MIN_REFRESH_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub range: HistoryRange,
    pub refresh_interval: Duration,
    pub reconnect: ReconnectPolicy,
}

impl SessionOptions {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            range: HistoryRange::default(),
            refresh_interval: config.history_refresh,
            reconnect: ReconnectPolicy::default(),
        }
    }

    pub fn with_range(mut self, range: HistoryRange) -> Self {
        self.range = range;
        self
    }
}

/// What an observer of one subject sees after every change.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub subject: SubjectId,
    pub range: HistoryRange,
    pub projection: Projection,
    /// Newest sample in the window, bulk or pushed.
    pub head: Option<LocationSample>,
    pub window_len: usize,
    pub channel: ChannelState,
    /// A history fetch is in flight.
    pub loading: bool,
    pub last_error: Option<String>,
}

impl SessionView {
    fn initial(subject: SubjectId, range: HistoryRange) -> Self {
        Self {
            subject,
            range,
            projection: Projection::default(),
            head: None,
            window_len: 0,
            channel: ChannelState::Disconnected,
            loading: false,
            last_error: None,
        }
    }
}

enum Command {
    SetRange(HistoryRange),
    Refresh,
}

enum Event {
    Fetched {
        nonce: u64,
        result: Result<HistoryResponse, RequestError>,
    },
    Pushed(LocationSample),
}

/// Live view of one subject: bulk history plus the push channel, folded
/// through a single task. Dropping the session aborts it.
pub struct LocationSession {
    subject: SubjectId,
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<SessionView>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl LocationSession {
    pub fn start<T: Transport>(
        gateway: Gateway,
        transport: T,
        subject: SubjectId,
        options: SessionOptions,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) =
            watch::channel(SessionView::initial(subject.clone(), options.range));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let pushes = events_tx.clone();
        let channel =
            channel::open_with(transport, subject.clone(), options.reconnect, move |sample| {
                // The receiver only goes away when the session task has stopped.
                let _ = pushes.send(Event::Pushed(sample));
            });

        let actor = Actor {
            gateway,
            subject: subject.clone(),
            range: options.range,
            reconciler: HistoryReconciler::new(),
            unloaded_pushes: Vec::new(),
            nonce: 0,
            in_flight: None,
            events: events_tx,
            view: view_tx,
            channel_state: channel.status(),
            loading: false,
            last_error: None,
        };
        info!(%subject, range = %options.range, "starting location session");
        let task = tokio::spawn(actor.run(
            channel,
            events_rx,
            commands_rx,
            shutdown_rx,
            options.refresh_interval,
        ));

        Self {
            subject,
            commands: commands_tx,
            view: view_rx,
            shutdown: shutdown_tx,
            task: Some(task),
        }
    }

    pub fn subject(&self) -> &SubjectId {
        &self.subject
    }

    /// Switch the history horizon and refetch immediately.
    pub fn set_range(&self, range: HistoryRange) {
        self.send(Command::SetRange(range));
    }

    /// Refetch history now, e.g. after `last_error` was reported.
    pub fn refresh(&self) {
        self.send(Command::Refresh);
    }

    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    pub fn updates(&self) -> WatchStream<SessionView> {
        WatchStream::new(self.view.clone())
    }

    /// Close the channel, abort in-flight requests and wait for the task.
    pub async fn shutdown(mut self) {
        self.shutdown.send_replace(true);
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
            && e.is_panic()
        {
            warn!(subject = %self.subject, "location session task panicked");
        }
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!(subject = %self.subject, "location session is no longer running");
        }
    }
}

impl Drop for LocationSession {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// History request that is cancelled when superseded or dropped.
struct InFlight(JoinHandle<()>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct Actor {
    gateway: Gateway,
    subject: SubjectId,
    range: HistoryRange,
    reconciler: HistoryReconciler,
    /// Pushes applied since the last successful load, oldest first.
    unloaded_pushes: Vec<LocationSample>,
    nonce: u64,
    in_flight: Option<InFlight>,
    events: mpsc::UnboundedSender<Event>,
    view: watch::Sender<SessionView>,
    channel_state: ChannelState,
    loading: bool,
    last_error: Option<String>,
}

impl Actor {
    async fn run(
        mut self,
        mut channel: ChannelHandle,
        mut events: mpsc::UnboundedReceiver<Event>,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut shutdown: watch::Receiver<bool>,
        refresh_interval: Duration,
    ) {
        let mut status = channel.watch_status();
        let mut watching_status = true;
        let refresh_interval = refresh_interval.max(MIN_REFRESH_INTERVAL);
        let mut ticker =
            tokio::time::interval_at(Instant::now() + refresh_interval, refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.start_fetch();

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                command = commands.recv() => match command {
                    Some(Command::SetRange(range)) => {
                        info!(subject = %self.subject, %range, "history range changed");
                        self.range = range;
                        self.start_fetch();
                    }
                    Some(Command::Refresh) => self.start_fetch(),
                    None => break,
                },
                Some(event) = events.recv() => self.handle(event),
                changed = status.changed(), if watching_status => match changed {
                    Ok(()) => {
                        self.channel_state = *status.borrow_and_update();
                        self.publish();
                    }
                    Err(_) => watching_status = false,
                },
                _ = ticker.tick() => {
                    debug!(subject = %self.subject, "periodic history refresh");
                    self.start_fetch();
                }
            }
        }

        self.in_flight = None;
        channel.close().await;
        self.channel_state = ChannelState::Disconnected;
        self.loading = false;
        self.publish();
        info!(subject = %self.subject, "location session stopped");
    }

    fn start_fetch(&mut self) {
        self.nonce = self.nonce.wrapping_add(1);
        let nonce = self.nonce;
        let gateway = self.gateway.clone();
        let subject = self.subject.clone();
        let range = self.range;
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            let result = gateway.history(&subject, range).await;
            let _ = events.send(Event::Fetched { nonce, result });
        });
        // Replacing the guard aborts a superseded request.
        self.in_flight = Some(InFlight(task));
        self.loading = true;
        self.publish();
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::Fetched { nonce, .. } if nonce != self.nonce => {
                debug!(
                    subject = %self.subject,
                    nonce,
                    current = self.nonce,
                    "ignoring superseded history fetch"
                );
            }
            Event::Fetched { result, .. } => {
                self.in_flight = None;
                self.loading = false;
                match result {
                    Ok(response) => self.apply_history(response),
                    Err(e) => {
                        warn!(subject = %self.subject, error = %e, "history fetch failed");
                        self.last_error = Some(e.to_string());
                    }
                }
                self.publish();
            }
            Event::Pushed(sample) => match self.reconciler.push(sample.clone()) {
                Ok(PushOutcome::Inserted) => {
                    self.remember_push(sample);
                    self.publish();
                }
                Ok(outcome) => {
                    debug!(subject = %self.subject, ?outcome, ts = %sample.ts, "push not applied");
                }
                Err(e) => warn!(subject = %self.subject, error = %e, "rejecting pushed sample"),
            },
        }
    }

    fn apply_history(&mut self, response: HistoryResponse) {
        if response.samples.is_empty()
            && let Some(diag) = &response.debug
        {
            info!(
                subject = %self.subject,
                total = ?diag.total_pings,
                consent = ?diag.child_consent_given,
                link_status = ?diag.link_status,
                "history is empty"
            );
        }

        let summary = self.reconciler.load(response.samples);
        // Pushes the backend may not have stored yet when it answered.
        for sample in std::mem::take(&mut self.unloaded_pushes) {
            if let Err(e) = self.reconciler.push(sample) {
                debug!(subject = %self.subject, error = %e, "could not refold pushed sample");
            }
        }
        self.last_error = None;
        info!(
            subject = %self.subject,
            range = %self.range,
            kept = summary.kept,
            rejected = summary.rejected,
            duplicates = summary.duplicates,
            "history window refreshed"
        );
    }

    fn remember_push(&mut self, sample: LocationSample) {
        if self.unloaded_pushes.len() == HISTORY_WINDOW_CAP {
            self.unloaded_pushes.remove(0);
        }
        self.unloaded_pushes.push(sample);
    }

    fn publish(&self) {
        let next = SessionView {
            subject: self.subject.clone(),
            range: self.range,
            projection: project(self.reconciler.samples(), self.reconciler.head()),
            head: self.reconciler.head().cloned(),
            window_len: self.reconciler.len(),
            channel: self.channel_state,
            loading: self.loading,
            last_error: self.last_error.clone(),
        };
        self.view.send_if_modified(|view| {
            if *view == next {
                false
            } else {
                *view = next;
                true
            }
        });
    }
}
