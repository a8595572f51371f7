//! Service process lifecycle.

use crate::{
    CleanupOutcome, ExitInfo, HealthProbe, LineLevel, OutputStream, PortProbe, ProcessReaper,
    ReadinessMonitor, RetryOutcome, RetryPolicy, ServiceHandle, ServiceLauncher, ServiceState,
    ShutdownSignal, SupervisorError, SupervisorEvent, SupervisorNotice, SupervisorResult,
    SystemReaper, TerminationEscalator, classify_line, retry_until,
};

use std::collections::BTreeMap;
use std::panic::Location;
use std::sync::Arc;
use std::time::Duration;

use error_location::ErrorLocation;
use sidecar_config::Config;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{Mutex, broadcast, watch};
use tokio::time::sleep;
use tracing::{debug, info, warn};

const NOTICE_CAPACITY: usize = 64;

/// The one instance the supervisor is responsible for.
struct Instance {
    handle: Option<ServiceHandle>,
    /// Pid of the latest instance, kept after the handle is released
    pid: Option<u32>,
    port: u16,
    stop_requested: bool,
    last_exit: Option<ExitInfo>,
}

/// State shared between control operations and the event pump.
struct Shared {
    state_tx: watch::Sender<ServiceState>,
    ready_tx: watch::Sender<bool>,
    notices_tx: broadcast::Sender<SupervisorNotice>,
    instance: Mutex<Instance>,
}

impl Shared {
    fn state(&self) -> ServiceState {
        self.state_tx.borrow().clone()
    }

    fn transition(&self, next: ServiceState) {
        let previous = self.state_tx.send_replace(next.clone());
        if previous != next {
            info!("Service state: {previous} -> {next}");
        }
    }

    /// Returns whether the flag changed.
    fn set_ready(&self, ready: bool) -> bool {
        self.ready_tx.send_replace(ready) != ready
    }

    fn notify(&self, notice: SupervisorNotice) {
        // No subscribers is fine
        let _ = self.notices_tx.send(notice);
    }

    /// Only an instance that is starting or running can become ready.
    fn mark_ready(&self, pid: u32, port: u16) {
        if !matches!(
            self.state(),
            ServiceState::Starting | ServiceState::Running { .. }
        ) {
            debug!("Ignoring readiness of pid {pid} outside startup");
            return;
        }
        if self.set_ready(true) {
            info!("Service pid {pid} is ready on port {port}");
            self.notify(SupervisorNotice::InstanceReady { pid, port });
        }
    }

    async fn is_current(&self, pid: u32) -> bool {
        self.instance.lock().await.pid == Some(pid)
    }

    async fn apply(&self, event: SupervisorEvent) {
        match event {
            SupervisorEvent::LineReceived { pid, stream, line } => {
                match classify_line(stream, &line) {
                    LineLevel::Info => debug!("[service {pid} {stream}] {line}"),
                    LineLevel::Warning => {
                        warn!("[service {pid} {stream}] {line}");
                        self.notify(SupervisorNotice::OutputWarning { pid, stream, line });
                    }
                }
            }
            SupervisorEvent::MarkerSeen { pid } => {
                let port = {
                    let instance = self.instance.lock().await;
                    if instance.pid != Some(pid) {
                        return;
                    }
                    instance.port
                };
                debug!("Readiness marker seen from pid {pid}");
                self.mark_ready(pid, port);
            }
            SupervisorEvent::ProbeSucceeded { pid, port } => {
                if self.is_current(pid).await {
                    self.mark_ready(pid, port);
                }
            }
            SupervisorEvent::ProcessExited { pid, exit } => self.on_exit(pid, exit).await,
        }
    }

    async fn on_exit(&self, pid: u32, exit: ExitInfo) {
        let mut instance = self.instance.lock().await;
        if instance.pid != Some(pid) {
            debug!("Ignoring exit of replaced pid {pid}");
            return;
        }

        instance.last_exit = Some(exit);
        self.set_ready(false);

        if exit.is_clean(instance.stop_requested) {
            info!("Service pid {pid} exited ({exit})");
        } else {
            warn!("Service pid {pid} exited unexpectedly ({exit})");
            self.notify(SupervisorNotice::AnomalousExit { pid, exit });
        }

        // Starting and Stopping belong to the control operation in flight
        match self.state() {
            ServiceState::Running { .. } => {
                instance.handle = None;
                self.transition(ServiceState::Stopped);
            }
            ServiceState::Failed { .. } => instance.handle = None,
            _ => {}
        }
    }
}

/// Applies events from one instance's reader and exit tasks, in order.
async fn pump(shared: Arc<Shared>, mut events: UnboundedReceiver<SupervisorEvent>) {
    while let Some(event) = events.recv().await {
        shared.apply(event).await;
    }
}

/// Manages the lifecycle of one backend service process.
///
/// Control operations (start, stop, restart) are serialized; concurrent
/// callers queue behind the one in flight. Observers follow the state
/// through [`Supervisor::subscribe`] and [`Supervisor::notices`].
pub struct Supervisor {
    config: Config,
    launcher: ServiceLauncher,
    health: HealthProbe,
    reaper: Arc<dyn ProcessReaper>,
    shared: Arc<Shared>,
    control: Mutex<()>,
    shutdown: ShutdownSignal,
    extra_env: BTreeMap<String, String>,
}

impl Supervisor {
    /// Validates `config` and builds an idle supervisor.
    pub fn new(config: Config, reaper: Arc<dyn ProcessReaper>) -> SupervisorResult<Self> {
        config.validate()?;

        let (state_tx, _) = watch::channel(ServiceState::Idle);
        let (ready_tx, _) = watch::channel(false);
        let (notices_tx, _) = broadcast::channel(NOTICE_CAPACITY);

        let shared = Shared {
            state_tx,
            ready_tx,
            notices_tx,
            instance: Mutex::new(Instance {
                handle: None,
                pid: None,
                port: config.port.default,
                stop_requested: false,
                last_exit: None,
            }),
        };

        Ok(Self {
            launcher: ServiceLauncher::from_config(&config.service),
            health: HealthProbe::for_host(&config.port.host, &config.service.health_path)?,
            config,
            reaper,
            shared: Arc::new(shared),
            control: Mutex::new(()),
            shutdown: ShutdownSignal::new(),
            extra_env: BTreeMap::new(),
        })
    }

    pub fn with_system_reaper(config: Config) -> SupervisorResult<Self> {
        Self::new(config, Arc::new(SystemReaper::new()))
    }

    /// Share the host's shutdown signal instead of a private one.
    pub fn with_shutdown_signal(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Extra environment for every launch, applied over the configured one.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_env.insert(key.into(), value.into());
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // =========================================================================
    // Control operations
    // =========================================================================

    /// Start the service and wait for it to report ready.
    ///
    /// A no-op when an instance is already running. `preferred_port`
    /// overrides the configured default port; 0 means the default.
    pub async fn start(&self, preferred_port: Option<u16>) -> SupervisorResult<ServiceState> {
        let _control = self.control.lock().await;
        self.start_locked(preferred_port).await
    }

    /// Stop the running instance. Returns `false` when no termination
    /// request could be delivered.
    pub async fn stop(&self) -> SupervisorResult<bool> {
        let _control = self.control.lock().await;
        self.stop_locked().await
    }

    pub async fn restart(&self, preferred_port: Option<u16>) -> SupervisorResult<ServiceState> {
        let _control = self.control.lock().await;
        if !self.stop_locked().await? {
            warn!("Previous instance may still be running, starting a new one anyway");
        }
        self.start_locked(preferred_port).await
    }

    /// Force-kill leftovers from an earlier session, matched by process name.
    ///
    /// Refused while this supervisor has a live instance.
    pub async fn cleanup_stale_previous_instances(&self) -> SupervisorResult<CleanupOutcome> {
        let _control = self.control.lock().await;

        if self.instance_alive().await {
            return Ok(CleanupOutcome::failure(
                "an instance owned by this supervisor is running",
            ));
        }

        let Some(name) = self.process_name() else {
            return Ok(CleanupOutcome::failure("no process name is known"));
        };

        info!("Cleaning up stale instances of {name:?}");
        let outcome = self.reaper.kill_by_name(&name).await?;
        info!("Stale instance cleanup: {outcome}");
        Ok(outcome)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn state(&self) -> ServiceState {
        self.shared.state()
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<ServiceState> {
        self.shared.state_tx.subscribe()
    }

    pub fn notices(&self) -> broadcast::Receiver<SupervisorNotice> {
        self.shared.notices_tx.subscribe()
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Port of the latest instance, or the configured default before the
    /// first start.
    pub async fn current_port(&self) -> u16 {
        self.shared.instance.lock().await.port
    }

    pub async fn pid(&self) -> Option<u32> {
        self.shared
            .instance
            .lock()
            .await
            .handle
            .as_ref()
            .map(ServiceHandle::pid)
    }

    pub async fn last_exit(&self) -> Option<ExitInfo> {
        self.shared.instance.lock().await.last_exit
    }

    /// Whether the instance is known to be ready. When it is not yet,
    /// one health poll is made with the given timeout.
    pub async fn is_ready(&self, timeout: Duration) -> bool {
        if *self.shared.ready_tx.borrow() {
            return true;
        }

        let (pid, port) = {
            let instance = self.shared.instance.lock().await;
            match &instance.handle {
                Some(handle) => (handle.pid(), instance.port),
                None => return false,
            }
        };

        if self.health.poll_health(port, timeout).await {
            self.shared
                .apply(SupervisorEvent::ProbeSucceeded { pid, port })
                .await;
            return true;
        }
        false
    }

    /// Whether the instance's process still exists. A vanished process
    /// moves a Running or Failed supervisor to Stopped.
    pub async fn is_running(&self) -> bool {
        let mut instance = self.shared.instance.lock().await;
        let (alive, pid, exit) = match &instance.handle {
            Some(handle) => (handle.is_alive(), handle.pid(), handle.exit()),
            None => return false,
        };
        if alive {
            return true;
        }

        if exit.is_some() {
            instance.last_exit = exit;
        }
        if matches!(
            self.shared.state(),
            ServiceState::Running { .. } | ServiceState::Failed { .. }
        ) {
            info!("Service pid {pid} is gone");
            instance.handle = None;
            self.shared.set_ready(false);
            self.shared.transition(ServiceState::Stopped);
        }
        false
    }

    /// Name used for by-name reaping: the configured one, else the stem of
    /// the executable.
    pub fn process_name(&self) -> Option<String> {
        let service = &self.config.service;
        if let Some(name) = &service.process_name {
            return Some(name.clone());
        }
        let executable = self
            .launcher
            .resolve_executable()
            .ok()
            .or_else(|| service.executable_paths.first().cloned())?;
        service.process_name_for(&executable)
    }

    // =========================================================================
    // Start
    // =========================================================================

    async fn start_locked(&self, preferred_port: Option<u16>) -> SupervisorResult<ServiceState> {
        let state = self.shared.state();
        if matches!(state, ServiceState::Running { .. }) && self.instance_alive().await {
            info!("Service already {state}");
            return Ok(state);
        }

        self.reclaim_retained_instance().await?;

        if self.shutdown.is_triggered() {
            return Err(self.fail(SupervisorError::Cancelled {
                location: ErrorLocation::from(Location::caller()),
            }));
        }

        self.shared.set_ready(false);
        self.shared.transition(ServiceState::Starting);

        let preferred = match preferred_port {
            Some(port) if port != 0 => port,
            _ => self.config.port.default,
        };
        let port = self
            .resolve_port(preferred)
            .await
            .map_err(|e| self.fail(e))?;

        let mut handle = self
            .launcher
            .spawn(port, &self.extra_env)
            .map_err(|e| self.fail(e))?;
        let pid = handle.pid();
        let exit_rx = handle.exit_receiver();

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.wire_instance(&mut handle, events_tx);

        {
            let mut instance = self.shared.instance.lock().await;
            instance.handle = Some(handle);
            instance.pid = Some(pid);
            instance.port = port;
            instance.stop_requested = false;
        }

        // Started after the instance is registered so no event is dropped as stale
        tokio::spawn(pump(Arc::clone(&self.shared), events_rx));

        match self.await_readiness(pid, port, exit_rx).await {
            Ok(()) => {
                let running = ServiceState::Running { port };
                self.shared.transition(running.clone());
                Ok(running)
            }
            Err(e @ SupervisorError::EarlyExit { .. }) => {
                self.release_instance(pid).await;
                Err(self.fail(e))
            }
            Err(e) => {
                warn!("Retaining pid {pid} until the next stop or start");
                Err(self.fail(e))
            }
        }
    }

    /// Stop a handle left behind by a failed start, or a dead one left by
    /// an unnoticed exit.
    async fn reclaim_retained_instance(&self) -> SupervisorResult<()> {
        let retained = {
            let mut instance = self.shared.instance.lock().await;
            instance.stop_requested = true;
            instance.pid = None;
            instance.handle.take()
        };
        let Some(handle) = retained else {
            return Ok(());
        };

        info!("Stopping retained pid {} before starting", handle.pid());
        if !self.escalator().stop(&handle).await? {
            self.reap_by_name_best_effort().await;
        }
        if let Some(exit) = handle.exit() {
            self.shared.instance.lock().await.last_exit = Some(exit);
        }
        Ok(())
    }

    /// First port from `preferred` upward that is free or can be freed.
    async fn resolve_port(&self, preferred: u16) -> SupervisorResult<u16> {
        let span = u32::from(self.config.port.max_attempts)
            .min(u32::from(u16::MAX) - u32::from(preferred) + 1);
        let last = u16::try_from(u32::from(preferred) + span - 1).unwrap_or(u16::MAX);

        let policy = RetryPolicy::fixed(span, Duration::ZERO);
        let outcome = retry_until(
            &policy,
            "port resolution",
            Some(&self.shutdown),
            |attempt| async move {
                let port = u16::try_from(u32::from(preferred) + attempt - 1).ok()?;
                self.claim_port(port).await.then_some(port)
            },
        )
        .await;

        match outcome {
            RetryOutcome::Completed { value, .. } => {
                if value != preferred {
                    warn!("Port {preferred} unavailable, using {value}");
                }
                Ok(value)
            }
            RetryOutcome::Exhausted { .. } => Err(SupervisorError::PortConflictUnresolved {
                start: preferred,
                end: last,
                location: ErrorLocation::from(Location::caller()),
            }),
            RetryOutcome::Cancelled { .. } => Err(SupervisorError::Cancelled {
                location: ErrorLocation::from(Location::caller()),
            }),
        }
    }

    /// Free `port` if something holds it: by-port reap first, by-name reap
    /// second, re-probing after each.
    async fn claim_port(&self, port: u16) -> bool {
        let host = self.config.port.host.as_str();
        if !PortProbe::is_port_bound_on(host, port) {
            return true;
        }

        warn!("Port {port} is already bound, attempting to reclaim it");
        let settle = self.config.port.reap_settle();

        match self.reaper.kill_by_port(port).await {
            Ok(outcome) => info!("By-port reap of {port}: {outcome}"),
            Err(e) => warn!("By-port reap of {port} could not run: {e}"),
        }
        sleep(settle).await;
        if !PortProbe::is_port_bound_on(host, port) {
            info!("Reclaimed port {port}");
            return true;
        }

        if let Some(name) = self.process_name() {
            match self.reaper.kill_by_name(&name).await {
                Ok(outcome) => info!("By-name reap of {name:?}: {outcome}"),
                Err(e) => warn!("By-name reap of {name:?} could not run: {e}"),
            }
            sleep(settle).await;
            if !PortProbe::is_port_bound_on(host, port) {
                info!("Reclaimed port {port}");
                return true;
            }
        }

        warn!("Port {port} is still bound");
        false
    }

    fn wire_instance(&self, handle: &mut ServiceHandle, events: UnboundedSender<SupervisorEvent>) {
        let pid = handle.pid();
        let monitor = ReadinessMonitor::new(pid, &self.config.service.readiness_marker);

        if let Some(stdout) = handle.take_stdout() {
            let reader = monitor.attach(OutputStream::Stdout, stdout, events.clone());
            handle.attach_task(reader);
        }
        if let Some(stderr) = handle.take_stderr() {
            let reader = monitor.attach(OutputStream::Stderr, stderr, events.clone());
            handle.attach_task(reader);
        }

        let mut exit_rx = handle.exit_receiver();
        let forward_exit = tokio::spawn(async move {
            let exit = exit_rx
                .wait_for(Option::is_some)
                .await
                .ok()
                .and_then(|exit| *exit);
            if let Some(exit) = exit {
                let _ = events.send(SupervisorEvent::ProcessExited { pid, exit });
            }
        });
        handle.attach_task(forward_exit);
    }

    /// Each attempt waits up to one interval for the readiness marker, then
    /// polls the health endpoint once. Process exit ends the wait early.
    async fn await_readiness(
        &self,
        pid: u32,
        port: u16,
        exit_rx: watch::Receiver<Option<ExitInfo>>,
    ) -> SupervisorResult<()> {
        let readiness = &self.config.readiness;
        let interval = readiness.interval();
        let probe_timeout = readiness.probe_timeout();
        let ready_rx = self.shared.ready_tx.subscribe();

        let policy = RetryPolicy::fixed(readiness.max_attempts, Duration::ZERO);
        let outcome = retry_until(&policy, "readiness wait", Some(&self.shutdown), |_| {
            let mut ready_rx = ready_rx.clone();
            let mut exit_rx = exit_rx.clone();
            async move {
                tokio::select! {
                    biased;
                    exited = exit_rx.wait_for(Option::is_some) => {
                        let exit = exited.ok().and_then(|exit| *exit);
                        return Some(Err(exit.unwrap_or_else(ExitInfo::unknown)));
                    }
                    Ok(_) = ready_rx.wait_for(|ready| *ready) => return Some(Ok(())),
                    _ = sleep(interval) => {}
                }

                if self.health.poll_health(port, probe_timeout).await {
                    self.shared
                        .apply(SupervisorEvent::ProbeSucceeded { pid, port })
                        .await;
                    return Some(Ok(()));
                }
                None
            }
        })
        .await;

        match outcome {
            RetryOutcome::Completed {
                value: Ok(()),
                attempts,
            } => {
                info!("Service pid {pid} ready after {attempts} attempt(s)");
                Ok(())
            }
            RetryOutcome::Completed {
                value: Err(exit), ..
            } => Err(SupervisorError::EarlyExit {
                exit,
                location: ErrorLocation::from(Location::caller()),
            }),
            RetryOutcome::Exhausted { attempts } => Err(SupervisorError::ReadinessTimeout {
                port,
                attempts,
                location: ErrorLocation::from(Location::caller()),
            }),
            RetryOutcome::Cancelled { .. } => Err(SupervisorError::Cancelled {
                location: ErrorLocation::from(Location::caller()),
            }),
        }
    }

    // =========================================================================
    // Stop
    // =========================================================================

    async fn stop_locked(&self) -> SupervisorResult<bool> {
        let handle = {
            let mut instance = self.shared.instance.lock().await;
            instance.stop_requested = true;
            // Events still in flight from this pid are stale from here on
            instance.pid = None;
            instance.handle.take()
        };

        let Some(handle) = handle else {
            if !matches!(
                self.shared.state(),
                ServiceState::Idle | ServiceState::Stopped
            ) {
                self.shared.transition(ServiceState::Stopped);
            }
            return Ok(true);
        };

        let pid = handle.pid();
        self.shared.transition(ServiceState::Stopping);
        self.shared.set_ready(false);

        let result = self.escalator().stop(&handle).await;

        if let Some(exit) = handle.exit() {
            self.shared.instance.lock().await.last_exit = Some(exit);
        }

        match result {
            Ok(true) => {
                self.shared.transition(ServiceState::Stopped);
                Ok(true)
            }
            Ok(false) => {
                self.reap_by_name_best_effort().await;
                self.shared.transition(ServiceState::Failed {
                    error: format!("could not signal pid {pid}"),
                });
                Ok(false)
            }
            Err(e) => {
                self.shared.transition(ServiceState::Failed {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn escalator(&self) -> TerminationEscalator {
        TerminationEscalator::new(
            Arc::clone(&self.reaper),
            self.process_name(),
            &self.config.termination,
        )
    }

    async fn instance_alive(&self) -> bool {
        self.shared
            .instance
            .lock()
            .await
            .handle
            .as_ref()
            .is_some_and(ServiceHandle::is_alive)
    }

    /// Drop the handle of an instance that exited on its own.
    async fn release_instance(&self, pid: u32) {
        let mut instance = self.shared.instance.lock().await;
        if instance.pid == Some(pid) {
            if let Some(exit) = instance.handle.as_ref().and_then(ServiceHandle::exit) {
                instance.last_exit = Some(exit);
            }
            instance.handle = None;
        }
    }

    async fn reap_by_name_best_effort(&self) {
        let Some(name) = self.process_name() else {
            return;
        };
        match self.reaper.kill_by_name(&name).await {
            Ok(outcome) => info!("By-name reap of {name:?}: {outcome}"),
            Err(e) => warn!("By-name reap of {name:?} could not run: {e}"),
        }
    }

    /// Record a failed control operation and hand the error back.
    fn fail(&self, error: SupervisorError) -> SupervisorError {
        warn!("Service control failed: {error}");
        self.shared.set_ready(false);
        self.shared.transition(ServiceState::Failed {
            error: error.to_string(),
        });
        error
    }
}
