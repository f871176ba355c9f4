//! Sensor bridge: owns one sensor source on a dedicated thread, polls it on
//! a fixed cadence, and keeps it alive across crashes, stalls and
//! sleep/wake cycles.
//!
//! The bridge is the only writer of the sensor registry. Its connection
//! state is published through a [`StatusCell`]. Requests to the source run
//! on a session thread; restarting abandons the session instead of waiting
//! for whatever request it is stuck in.

use crossbeam::channel::{bounded, select, tick, unbounded, Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thermal_engine_core::{
    Backoff, BackoffPolicy, BoxedSensorSource, InterruptHandle, OpenError, PollError,
    RegistryWriter, ResumeDetector, SourceFactory, SourceReady, StatusCell,
    DEFAULT_POLL_INTERVAL, MAX_CONSECUTIVE_FAILURES, RESUME_GAP_THRESHOLD,
};
use thermal_engine_types::{ConnectionState, Fault, FaultKind, MetricKey, SensorSnapshot};

use crate::host::HostMetrics;

/// Bridge timing and recovery settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Time without a successful poll before values are dropped; defaults
    /// to twice the poll interval
    #[serde(default)]
    pub staleness_ms: Option<u64>,
    #[serde(default)]
    pub backoff: BackoffPolicy,
    #[serde(default = "default_max_failures")]
    pub max_consecutive_failures: u32,
    #[serde(default = "default_resume_gap_ms")]
    pub resume_gap_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

fn default_max_failures() -> u32 {
    MAX_CONSECUTIVE_FAILURES
}

fn default_resume_gap_ms() -> u64 {
    RESUME_GAP_THRESHOLD.as_millis() as u64
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            staleness_ms: None,
            backoff: BackoffPolicy::default(),
            max_consecutive_failures: default_max_failures(),
            resume_gap_ms: default_resume_gap_ms(),
        }
    }
}

impl BridgeConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn staleness(&self) -> Duration {
        self.staleness_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.poll_interval() * 2)
    }
}

#[derive(Debug)]
enum Command {
    Reconnect,
    Resume,
    Diagnostics(Sender<Result<String, PollError>>),
    Shutdown,
}

/// Handle to the running bridge thread
pub struct SensorBridge {
    commands: Sender<Command>,
    status: Arc<StatusCell>,
    handle: Option<JoinHandle<()>>,
}

impl SensorBridge {
    /// Spawn the bridge thread. Sources come from `factory` and are opened
    /// from the thread.
    pub fn start(
        mut factory: SourceFactory,
        writer: RegistryWriter,
        host: Option<HostMetrics>,
        config: BridgeConfig,
    ) -> std::io::Result<Self> {
        let status = Arc::new(StatusCell::new("sensor source"));
        let (commands, command_rx) = bounded(16);
        let (events, event_rx) = unbounded();
        let first = factory();

        let worker = BridgeWorker {
            backoff: Backoff::new(config.backoff),
            resume: ResumeDetector::new(Duration::from_millis(config.resume_gap_ms)),
            source_name: first.name().to_string(),
            spare: Some(first),
            factory,
            session: None,
            retired: Vec::new(),
            generation: 0,
            in_flight: false,
            events,
            writer,
            host,
            status: Arc::clone(&status),
            next_restart: Some(Instant::now()),
            halted: false,
            failures: 0,
            last_success: Instant::now(),
            stale_marked: false,
            config,
        };

        let handle = thread::Builder::new()
            .name("sensor-bridge".into())
            .spawn(move || worker.run(command_rx, event_rx))?;

        Ok(Self {
            commands,
            status,
            handle: Some(handle),
        })
    }

    pub fn status(&self) -> Arc<StatusCell> {
        Arc::clone(&self.status)
    }

    /// Retry now, including after a missing source stopped retries
    pub fn reconnect(&self) {
        let _ = self.commands.try_send(Command::Reconnect);
    }

    /// The system just woke from sleep; restart the source right away
    pub fn notify_resume(&self) {
        let _ = self.commands.try_send(Command::Resume);
    }

    /// Ask the connected source for its diagnostic dump
    pub fn diagnostics(&self, timeout: Duration) -> Result<String, PollError> {
        let (reply, response) = bounded(1);
        self.commands
            .send(Command::Diagnostics(reply))
            .map_err(|_| PollError::NotOpen)?;
        match response.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(PollError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(PollError::NotOpen),
        }
    }

    /// Stop the thread and close the source. Blocks until done.
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            log::info!("Stopping sensor bridge");
            let _ = self.commands.send(Command::Shutdown);
            if handle.join().is_err() {
                log::error!("Sensor bridge thread panicked");
            }
        }
    }
}

impl Drop for SensorBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Work handed to a session thread, handled in order
enum SourceRequest {
    Open,
    Poll,
    Diagnostics(Sender<Result<String, PollError>>),
}

enum SourceEvent {
    Opened(Result<SourceReady, OpenError>),
    Polled(Result<SensorSnapshot, PollError>),
}

/// One source instance driven on its own thread, so a request that hangs
/// never holds up the bridge's command loop.
struct Session {
    requests: Sender<SourceRequest>,
    interrupt: Option<InterruptHandle>,
    handle: JoinHandle<()>,
}

impl Session {
    fn spawn(
        mut source: BoxedSensorSource,
        generation: u64,
        events: Sender<(u64, SourceEvent)>,
    ) -> std::io::Result<Self> {
        let interrupt = source.interrupt_handle();
        let (requests, request_rx) = unbounded::<SourceRequest>();
        let handle = thread::Builder::new()
            .name(format!("sensor-session-{}", generation))
            .spawn(move || {
                for request in request_rx {
                    let event = match request {
                        SourceRequest::Open => SourceEvent::Opened(source.open()),
                        SourceRequest::Poll => SourceEvent::Polled(source.poll()),
                        SourceRequest::Diagnostics(reply) => {
                            let _ = reply.send(source.diagnostics());
                            continue;
                        }
                    };
                    if events.send((generation, event)).is_err() {
                        break;
                    }
                }
                source.close();
                log::debug!("Sensor session {} closed", generation);
            })?;
        Ok(Self {
            requests,
            interrupt,
            handle,
        })
    }

    /// Stop using the source without waiting for the current request. The
    /// thread closes the source once that request returns.
    fn abandon(self) -> JoinHandle<()> {
        if let Some(interrupt) = &self.interrupt {
            interrupt.interrupt();
        }
        drop(self.requests);
        self.handle
    }
}

struct BridgeWorker {
    factory: SourceFactory,
    /// Built at start for its name; used by the first session
    spare: Option<BoxedSensorSource>,
    source_name: String,
    session: Option<Session>,
    /// Abandoned sessions still finishing a request
    retired: Vec<JoinHandle<()>>,
    /// Tags results so ones from abandoned sessions are ignored
    generation: u64,
    /// An open or poll is outstanding on the current session
    in_flight: bool,
    events: Sender<(u64, SourceEvent)>,
    writer: RegistryWriter,
    host: Option<HostMetrics>,
    config: BridgeConfig,
    status: Arc<StatusCell>,
    backoff: Backoff,
    resume: ResumeDetector,
    /// When the next open attempt is due; `None` while connected
    next_restart: Option<Instant>,
    /// The source is not installed; wait for an explicit reconnect
    halted: bool,
    failures: u32,
    last_success: Instant,
    stale_marked: bool,
}

impl BridgeWorker {
    fn run(mut self, commands: Receiver<Command>, events: Receiver<(u64, SourceEvent)>) {
        log::warn!(
            "=== Sensor bridge started ({}, every {:?}) ===",
            self.source_name,
            self.config.poll_interval()
        );
        let ticker = tick(self.config.poll_interval());
        self.tick();

        loop {
            select! {
                recv(commands) -> cmd => match cmd {
                    Ok(Command::Reconnect) => {
                        log::info!("Sensor source reconnect requested");
                        self.halted = false;
                        self.force_restart();
                        self.tick();
                    }
                    Ok(Command::Resume) => {
                        log::warn!("=== Resume from sleep, restarting sensor source ===");
                        self.force_restart();
                        self.tick();
                    }
                    Ok(Command::Diagnostics(reply)) => self.request_diagnostics(reply),
                    Ok(Command::Shutdown) | Err(_) => break,
                },
                recv(events) -> event => {
                    if let Ok((generation, event)) = event {
                        self.handle_event(generation, event);
                    }
                }
                recv(ticker) -> _ => self.tick(),
            }
        }

        self.end_session();
        for handle in self.retired.drain(..) {
            if handle.join().is_err() {
                log::error!("Sensor session thread panicked");
            }
        }
        let _ = self.status.transition(ConnectionState::Disconnected);
        log::info!("Sensor bridge stopped");
    }

    fn tick(&mut self) {
        if self.resume.check() {
            log::warn!("=== Clock jump detected, assuming resume from sleep ===");
            self.halted = false;
            self.force_restart();
        }

        if let Some(host) = self.host.as_mut() {
            let sample = host.sample();
            self.writer.publish(&sample, &MetricKey::HOST_KEYS);
        }
        self.reap_retired();

        match self.status.state() {
            ConnectionState::Connected => {
                if !self.in_flight {
                    self.request_poll();
                }
            }
            ConnectionState::Disconnected | ConnectionState::Degraded => {
                let due = self
                    .next_restart
                    .map(|at| Instant::now() >= at)
                    .unwrap_or(false);
                if due && !self.halted && !self.in_flight {
                    self.start_open();
                }
            }
            ConnectionState::Connecting => {}
        }

        self.check_staleness();
    }

    fn handle_event(&mut self, generation: u64, event: SourceEvent) {
        if generation != self.generation || self.session.is_none() {
            log::debug!("Ignoring result from abandoned sensor session {}", generation);
            return;
        }
        self.in_flight = false;
        match event {
            SourceEvent::Opened(result) => self.opened(result),
            SourceEvent::Polled(result) => self.polled(result),
        }
    }

    /// Drop the current source and make the next tick open a new one
    fn force_restart(&mut self) {
        self.end_session();
        match self.status.state() {
            ConnectionState::Connected => {
                let _ = self.status.transition(ConnectionState::Degraded);
            }
            ConnectionState::Connecting => {
                let _ = self.status.transition(ConnectionState::Disconnected);
            }
            _ => {}
        }
        self.backoff.reset();
        self.failures = 0;
        self.next_restart = Some(Instant::now());
    }

    fn schedule_restart(&mut self) {
        let delay = self.backoff.next_delay();
        log::debug!("Next sensor source attempt in {:?}", delay);
        self.next_restart = Some(Instant::now() + delay);
    }

    fn end_session(&mut self) {
        if let Some(session) = self.session.take() {
            self.retired.push(session.abandon());
        }
        self.in_flight = false;
    }

    fn reap_retired(&mut self) {
        let (finished, running): (Vec<_>, Vec<_>) =
            self.retired.drain(..).partition(|handle| handle.is_finished());
        for handle in finished {
            let _ = handle.join();
        }
        self.retired = running;
    }

    fn start_open(&mut self) {
        self.end_session();
        if self.status.transition(ConnectionState::Connecting).is_err() {
            return;
        }

        let source = match self.spare.take() {
            Some(source) => source,
            None => (self.factory)(),
        };
        self.generation += 1;
        match Session::spawn(source, self.generation, self.events.clone()) {
            Ok(session) => {
                let _ = session.requests.send(SourceRequest::Open);
                self.session = Some(session);
                self.in_flight = true;
            }
            Err(e) => {
                let _ = self.status.fail(
                    ConnectionState::Disconnected,
                    Fault::new(FaultKind::SourceUnavailable, format!("spawning session: {}", e)),
                );
                self.schedule_restart();
            }
        }
    }

    fn opened(&mut self, result: Result<SourceReady, OpenError>) {
        match result {
            Ok(ready) => {
                log::warn!("=== Sensor source connected: {} ===", ready.detail);
                let _ = self.status.transition(ConnectionState::Connected);
                self.backoff.reset();
                self.failures = 0;
                self.next_restart = None;
                // the staleness window starts over with the new source
                self.last_success = Instant::now();
                self.stale_marked = false;
                self.request_poll();
            }
            Err(OpenError::NotInstalled {
                message,
                diagnostic,
            }) => {
                self.end_session();
                let _ = self.status.fail(
                    ConnectionState::Disconnected,
                    Fault::new(FaultKind::SourceStartupFailed, message),
                );
                self.status.set_diagnostic(diagnostic);
                log::error!("Sensor source is not installed; not retrying until reconnect");
                self.halted = true;
                self.next_restart = None;
            }
            Err(OpenError::StartupFailed {
                message,
                diagnostic,
            }) => {
                self.end_session();
                log::error!("Sensor source failed to start: {}", message);
                let _ = self.status.fail(
                    ConnectionState::Disconnected,
                    Fault::new(FaultKind::SourceStartupFailed, message),
                );
                self.status.set_diagnostic(diagnostic);
                self.schedule_restart();
            }
            Err(e) => {
                self.end_session();
                let _ = self.status.fail(
                    ConnectionState::Disconnected,
                    Fault::new(FaultKind::SourceUnavailable, e.to_string()),
                );
                self.schedule_restart();
            }
        }
    }

    fn request_poll(&mut self) {
        let sent = self
            .session
            .as_ref()
            .map(|session| session.requests.send(SourceRequest::Poll).is_ok())
            .unwrap_or(false);
        if sent {
            self.in_flight = true;
        } else {
            self.degrade(FaultKind::SourceCrashed, "sensor session ended".into());
        }
    }

    fn request_diagnostics(&mut self, reply: Sender<Result<String, PollError>>) {
        let session = match &self.session {
            Some(session) if self.status.state() == ConnectionState::Connected => session,
            _ => {
                let _ = reply.send(Err(PollError::NotOpen));
                return;
            }
        };
        if let Err(e) = session.requests.send(SourceRequest::Diagnostics(reply)) {
            if let SourceRequest::Diagnostics(reply) = e.into_inner() {
                let _ = reply.send(Err(PollError::NotOpen));
            }
        }
    }

    fn polled(&mut self, result: Result<SensorSnapshot, PollError>) {
        match result {
            Ok(snapshot) => {
                self.writer.publish(&snapshot, &MetricKey::SOURCE_KEYS);
                self.failures = 0;
                self.last_success = Instant::now();
                self.stale_marked = false;
            }
            Err(e) if e.is_soft() => {
                self.failures += 1;
                log::warn!(
                    "Bad sensor response ({}/{}): {}",
                    self.failures,
                    self.config.max_consecutive_failures,
                    e
                );
                if self.failures >= self.config.max_consecutive_failures {
                    self.degrade(
                        FaultKind::SourceCrashed,
                        format!("{} consecutive bad responses: {}", self.failures, e),
                    );
                }
            }
            Err(PollError::Stale) => {
                self.writer.mark_stale(&MetricKey::SOURCE_KEYS);
                self.stale_marked = true;
                self.degrade(FaultKind::SensorStale, PollError::Stale.to_string());
            }
            Err(e) => self.degrade(FaultKind::SourceCrashed, e.to_string()),
        }
    }

    fn degrade(&mut self, kind: FaultKind, message: String) {
        self.end_session();
        let _ = self
            .status
            .fail(ConnectionState::Degraded, Fault::new(kind, message));
        self.failures = 0;
        self.schedule_restart();
    }

    fn check_staleness(&mut self) {
        if self.stale_marked || self.last_success.elapsed() <= self.config.staleness() {
            return;
        }
        log::warn!(
            "No sensor data for {:?}, marking values unavailable",
            self.last_success.elapsed()
        );
        self.writer.mark_stale(&MetricKey::SOURCE_KEYS);
        self.stale_marked = true;
        if self.status.state() == ConnectionState::Connected {
            self.degrade(
                FaultKind::SensorStale,
                format!("no successful poll within {:?}", self.config.staleness()),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use thermal_engine_core::{RegistryReader, SensorRegistry, SensorSource, SourceReady};
    use thermal_engine_types::{SensorSnapshot, SensorValue};
    use ConnectionState::*;

    #[derive(Debug, Clone, Copy)]
    enum Step {
        Value(f64),
        Crash,
        Malformed,
        Hang(Duration),
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum OpenFailure {
        Missing,
        ErrorLine,
    }

    #[derive(Default)]
    struct Script {
        polls: VecDeque<Step>,
        /// Used once the queue is empty
        fallback: Option<Step>,
        open_failure: Option<OpenFailure>,
    }

    #[derive(Clone, Default)]
    struct Counters {
        opens: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
    }

    struct FakeSource {
        script: Arc<Mutex<Script>>,
        counters: Counters,
        last: f64,
    }

    impl SensorSource for FakeSource {
        fn name(&self) -> &str {
            "fake"
        }

        fn open(&mut self) -> Result<SourceReady, OpenError> {
            self.counters.opens.fetch_add(1, Ordering::SeqCst);
            match self.script.lock().unwrap().open_failure {
                Some(OpenFailure::Missing) => {
                    return Err(OpenError::NotInstalled {
                        message: "helper not found".into(),
                        diagnostic: Some("searched /opt".into()),
                    })
                }
                Some(OpenFailure::ErrorLine) => {
                    return Err(OpenError::StartupFailed {
                        message: "needs admin".into(),
                        diagnostic: None,
                    })
                }
                None => {}
            }
            Ok(SourceReady {
                detail: "fake".into(),
            })
        }

        fn poll(&mut self) -> Result<SensorSnapshot, PollError> {
            let step = {
                let mut script = self.script.lock().unwrap();
                let fallback = script.fallback.unwrap_or(Step::Value(self.last));
                script.polls.pop_front().unwrap_or(fallback)
            };
            match step {
                Step::Value(v) => {
                    self.last = v;
                    let mut snap = SensorSnapshot::empty();
                    snap.set(MetricKey::CpuTemp, v, Utc::now());
                    Ok(snap)
                }
                Step::Crash => Err(PollError::Crashed("eof".into())),
                Step::Malformed => Err(PollError::Malformed("junk".into())),
                Step::Hang(duration) => {
                    thread::sleep(duration);
                    Err(PollError::Timeout(duration))
                }
            }
        }

        fn diagnostics(&mut self) -> Result<String, PollError> {
            Ok("fake dump".into())
        }

        fn close(&mut self) {
            self.counters.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fast_config() -> BridgeConfig {
        BridgeConfig {
            poll_interval_ms: 10,
            staleness_ms: Some(5_000),
            backoff: BackoffPolicy {
                initial_ms: 10,
                max_ms: 50,
                multiplier: 2.0,
                jitter: 0.0,
            },
            max_consecutive_failures: 3,
            resume_gap_ms: 60_000,
        }
    }

    fn fake_factory(script: &Arc<Mutex<Script>>, counters: &Counters) -> SourceFactory {
        let script = Arc::clone(script);
        let counters = counters.clone();
        Box::new(move || -> BoxedSensorSource {
            Box::new(FakeSource {
                script: Arc::clone(&script),
                counters: counters.clone(),
                last: 50.0,
            })
        })
    }

    fn start(script: Script, config: BridgeConfig) -> (SensorBridge, RegistryReader, Counters, Arc<Mutex<Script>>) {
        let script = Arc::new(Mutex::new(script));
        let counters = Counters::default();
        let (writer, reader) = SensorRegistry::with_window(1);
        let bridge =
            SensorBridge::start(fake_factory(&script, &counters), writer, None, config).unwrap();
        (bridge, reader, counters, script)
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_connects_and_publishes() {
        let script = Script {
            polls: VecDeque::from(vec![Step::Value(61.0)]),
            ..Script::default()
        };
        let (mut bridge, reader, _, _) = start(script, fast_config());
        assert!(wait_for(|| reader.get_raw(MetricKey::CpuTemp) == SensorValue::Value(61.0)));
        assert_eq!(bridge.status().state(), Connected);
        bridge.shutdown();
    }

    #[test]
    fn test_recovers_from_crash() {
        let script = Script {
            polls: VecDeque::from(vec![Step::Value(60.0), Step::Crash, Step::Value(70.0)]),
            ..Script::default()
        };
        let script = Arc::new(Mutex::new(script));
        let counters = Counters::default();
        let (writer, reader) = SensorRegistry::with_window(1);
        let bridge =
            SensorBridge::start(fake_factory(&script, &counters), writer, None, fast_config()).unwrap();
        let events = bridge.status().subscribe();

        assert!(wait_for(|| reader.get_raw(MetricKey::CpuTemp) == SensorValue::Value(70.0)));
        assert!(counters.opens.load(Ordering::SeqCst) >= 2);

        let states: Vec<ConnectionState> = events.try_iter().map(|s| s.state).collect();
        // the subscription may start after the first connect
        let tail: Vec<ConnectionState> = states
            .iter()
            .copied()
            .skip_while(|s| *s != Degraded)
            .collect();
        assert_eq!(tail, vec![Degraded, Connecting, Connected]);
        assert_eq!(
            bridge.status().status().last_fault.as_ref().map(|f| f.kind),
            Some(FaultKind::SourceCrashed)
        );
    }

    #[test]
    fn test_malformed_response_keeps_values() {
        let script = Script {
            polls: VecDeque::from(vec![Step::Value(60.0)]),
            fallback: Some(Step::Malformed),
            ..Script::default()
        };
        let config = BridgeConfig {
            max_consecutive_failures: 1_000,
            ..fast_config()
        };
        let (bridge, reader, counters, _) = start(script, config);
        assert!(wait_for(|| reader.get_raw(MetricKey::CpuTemp) == SensorValue::Value(60.0)));
        thread::sleep(Duration::from_millis(100));
        assert_eq!(reader.get_raw(MetricKey::CpuTemp), SensorValue::Value(60.0));
        assert_eq!(bridge.status().state(), Connected);
        assert_eq!(counters.opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_repeated_malformed_responses_restart_source() {
        let script = Script {
            polls: VecDeque::from(vec![Step::Value(60.0)]),
            fallback: Some(Step::Malformed),
            ..Script::default()
        };
        let (_bridge, _reader, counters, _) = start(script, fast_config());
        assert!(wait_for(|| counters.opens.load(Ordering::SeqCst) >= 2));
    }

    #[test]
    fn test_missing_source_waits_for_reconnect() {
        let script = Script {
            open_failure: Some(OpenFailure::Missing),
            ..Script::default()
        };
        let (bridge, reader, counters, script) = start(script, fast_config());
        let status = bridge.status();
        assert!(wait_for(|| status.status().last_fault.is_some()));
        thread::sleep(Duration::from_millis(100));

        let snapshot = status.status();
        assert_eq!(snapshot.state, Disconnected);
        assert_eq!(
            snapshot.last_fault.as_ref().map(|f| f.kind),
            Some(FaultKind::SourceStartupFailed)
        );
        assert_eq!(snapshot.diagnostic.as_deref(), Some("searched /opt"));
        assert_eq!(counters.opens.load(Ordering::SeqCst), 1);

        script.lock().unwrap().open_failure = None;
        bridge.reconnect();
        assert!(wait_for(|| status.state() == Connected));
        assert!(wait_for(|| !reader.get_raw(MetricKey::CpuTemp).is_no_data()));
    }

    #[test]
    fn test_startup_error_keeps_retrying() {
        let script = Script {
            open_failure: Some(OpenFailure::ErrorLine),
            ..Script::default()
        };
        let (bridge, reader, counters, script) = start(script, fast_config());
        let status = bridge.status();
        assert!(wait_for(|| counters.opens.load(Ordering::SeqCst) >= 3));
        assert_eq!(
            status.status().last_fault.as_ref().map(|f| f.kind),
            Some(FaultKind::SourceStartupFailed)
        );

        // recovers on its own once the helper starts cleanly
        script.lock().unwrap().open_failure = None;
        assert!(wait_for(|| status.state() == Connected));
        assert!(wait_for(|| !reader.get_raw(MetricKey::CpuTemp).is_no_data()));
    }

    #[test]
    fn test_resume_abandons_hung_poll() {
        let script = Script {
            polls: VecDeque::from(vec![Step::Value(60.0), Step::Hang(Duration::from_secs(2))]),
            ..Script::default()
        };
        let config = BridgeConfig {
            max_consecutive_failures: 1_000,
            ..fast_config()
        };
        let (bridge, reader, counters, _) = start(script, config);
        assert!(wait_for(|| reader.get_raw(MetricKey::CpuTemp) == SensorValue::Value(60.0)));
        // let the second poll start hanging
        thread::sleep(Duration::from_millis(100));

        let resumed = Instant::now();
        bridge.notify_resume();
        assert!(wait_for(|| counters.opens.load(Ordering::SeqCst) == 2));
        assert!(resumed.elapsed() < Duration::from_secs(1));
        assert!(wait_for(|| bridge.status().state() == Connected));
        // the new source keeps publishing while the old poll is still stuck
        assert!(wait_for(|| reader.get_raw(MetricKey::CpuTemp) == SensorValue::Value(50.0)));
        assert!(resumed.elapsed() < Duration::from_millis(1_500));
    }

    #[test]
    fn test_diagnostics_through_bridge() {
        let (bridge, _reader, _, _) = start(Script::default(), fast_config());
        assert!(wait_for(|| bridge.status().state() == Connected));
        assert_eq!(
            bridge.diagnostics(Duration::from_secs(1)).unwrap(),
            "fake dump"
        );
    }

    #[test]
    fn test_diagnostics_without_source() {
        let script = Script {
            open_failure: Some(OpenFailure::Missing),
            ..Script::default()
        };
        let (mut bridge, _reader, _, _) = start(script, fast_config());
        assert!(wait_for(|| bridge.status().status().last_fault.is_some()));
        assert!(matches!(
            bridge.diagnostics(Duration::from_secs(1)),
            Err(PollError::NotOpen)
        ));
        bridge.shutdown();
        assert!(matches!(
            bridge.diagnostics(Duration::from_secs(1)),
            Err(PollError::NotOpen)
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_helper_diagnostics_through_bridge() {
        use crate::helper::{HelperConfig, HelperProcessSource};
        use std::io::Write;
        use std::path::PathBuf;

        let body = r#"echo '{"status":"ready"}'
while read cmd; do
  case "$cmd" in
    read) echo '{"cpu_temp":62}' ;;
    diag) echo 'CPU Package 62'; echo 'GPU Core 55'; echo 'END' ;;
    quit) exit 0 ;;
  esac
done
"#;
        let mut script = tempfile::NamedTempFile::new().unwrap();
        script.write_all(body.as_bytes()).unwrap();
        script.flush().unwrap();
        let config = HelperConfig {
            executable: Some(PathBuf::from("/bin/sh")),
            args: vec![script.path().display().to_string()],
            startup_timeout_ms: 2_000,
            response_timeout_ms: 1_000,
            ..HelperConfig::default()
        };
        let factory: SourceFactory =
            Box::new(move || -> BoxedSensorSource { Box::new(HelperProcessSource::new(config.clone())) });

        let (writer, reader) = SensorRegistry::with_window(1);
        let mut bridge = SensorBridge::start(factory, writer, None, fast_config()).unwrap();
        assert!(wait_for(|| reader.get_raw(MetricKey::CpuTemp) == SensorValue::Value(62.0)));
        assert_eq!(
            bridge.diagnostics(Duration::from_secs(2)).unwrap(),
            "CPU Package 62\nGPU Core 55\n"
        );
        bridge.shutdown();
    }

    #[test]
    fn test_resume_forces_restart() {
        let (bridge, reader, counters, _) = start(Script::default(), fast_config());
        assert!(wait_for(|| !reader.get_raw(MetricKey::CpuTemp).is_no_data()));
        assert_eq!(counters.opens.load(Ordering::SeqCst), 1);

        bridge.notify_resume();
        assert!(wait_for(|| counters.opens.load(Ordering::SeqCst) == 2));
        assert!(wait_for(|| bridge.status().state() == Connected));
    }

    #[test]
    fn test_stale_source_drops_values() {
        let script = Script {
            polls: VecDeque::from(vec![Step::Value(60.0)]),
            fallback: Some(Step::Malformed),
            ..Script::default()
        };
        let config = BridgeConfig {
            staleness_ms: Some(50),
            max_consecutive_failures: 1_000,
            ..fast_config()
        };
        let (bridge, reader, _, _) = start(script, config);
        assert!(wait_for(|| reader.get_raw(MetricKey::CpuTemp) == SensorValue::Value(60.0)));
        assert!(wait_for(|| reader.get_raw(MetricKey::CpuTemp).is_no_data()));
        assert!(wait_for(|| bridge
            .status()
            .status()
            .last_fault
            .as_ref()
            .map(|f| f.kind == FaultKind::SensorStale)
            .unwrap_or(false)));
    }

    #[test]
    fn test_shutdown_closes_source() {
        let (mut bridge, reader, counters, _) = start(Script::default(), fast_config());
        assert!(wait_for(|| !reader.get_raw(MetricKey::CpuTemp).is_no_data()));
        let closes_before = counters.closes.load(Ordering::SeqCst);
        bridge.shutdown();
        assert!(counters.closes.load(Ordering::SeqCst) > closes_before);
        assert_eq!(bridge.status().state(), Disconnected);
    }
}
