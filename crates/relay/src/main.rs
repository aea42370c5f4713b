use std::{sync::Arc, time::Duration};

use anyhow::Context;
use relay_bridge::{process::SidecarConfig, BridgeClient, BridgeConfig};
use relay_core::{
    admission::{AdmissionConfig, AdmissionWorkflow},
    config::Config,
    dispatcher::EventDispatcher,
    forwarding::{AllowList, ForwardingEngine},
    logging::{EventLog, LogBuffer},
    messaging::bounded::{BoundedSession, BoundsConfig},
    scheduler::TaskScheduler,
    session::AccountSession,
    status::SessionStatus,
};
use relay_status::StatusState;
use tokio_util::sync::CancellationToken;

const SCOPE: &str = "relay";

/// Extra time the bridge waits for a response beyond the per-operation bound,
/// so the bounded session is the layer that reports timeouts.
const BRIDGE_TIMEOUT_SLACK: Duration = Duration::from_secs(5);

fn bridge_config(cfg: &Config) -> BridgeConfig {
    let mut bridge_cfg = BridgeConfig::new(SidecarConfig {
        command: cfg.bridge_command.clone(),
        args: cfg.bridge_args.clone(),
    });
    bridge_cfg.request_timeout = cfg.op_timeout.saturating_add(BRIDGE_TIMEOUT_SLACK);
    bridge_cfg
}

/// Cancel pending timers, stop the account bridge, then drain handler tasks.
async fn shut_down(
    bridge: &BridgeClient,
    scheduler: &TaskScheduler,
    grace: Duration,
    log: &dyn EventLog,
) {
    // Timers go first so none fires against a bridge that is stopping.
    scheduler.cancel();

    if let Err(e) = bridge.stop(grace).await {
        log.warn(SCOPE, format!("bridge stop failed: {e}"));
    }

    let unfinished = scheduler.drain(grace).await;
    if unfinished > 0 {
        log.warn(
            SCOPE,
            format!("{unfinished} task(s) still running after the shutdown grace period"),
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    relay_core::logging::init("relay")?;

    let cfg = Config::load().context("loading configuration")?;

    let mut buffer = LogBuffer::new(cfg.log_capacity);
    if let Some(path) = &cfg.log_file {
        buffer = buffer
            .with_mirror(path, cfg.log_json)
            .with_context(|| format!("opening log file {}", path.display()))?;
    }
    let log = Arc::new(buffer);
    let event_log: Arc<dyn EventLog> = log.clone();

    let (bridge, events) =
        BridgeClient::spawn(bridge_config(&cfg)).context("starting account bridge")?;

    let session: Arc<dyn AccountSession> = Arc::new(BoundedSession::new(
        Arc::new(bridge.clone()),
        BoundsConfig {
            op_timeout: cfg.op_timeout,
            send_interval: cfg.send_interval,
        },
    ));

    let scheduler = TaskScheduler::new();
    let status = Arc::new(SessionStatus::new());

    let forwarding = Arc::new(ForwardingEngine::new(
        session.clone(),
        event_log.clone(),
        AllowList::new(cfg.allowed_senders.iter().cloned()),
        cfg.destinations.clone(),
    ));
    let admission = Arc::new(AdmissionWorkflow::new(
        session,
        event_log.clone(),
        scheduler.clone(),
        AdmissionConfig {
            target: cfg.enrollment_target.clone(),
            accept_delay: cfg.accept_delay,
            enroll_delay: cfg.enroll_delay,
        },
    ));
    let dispatcher = EventDispatcher::new(
        forwarding,
        admission,
        status.clone(),
        event_log.clone(),
        scheduler.clone(),
    );

    let http_shutdown = CancellationToken::new();
    let http = tokio::spawn(relay_status::serve(
        cfg.status_addr,
        StatusState {
            status,
            log: log.clone(),
        },
        http_shutdown.clone(),
    ));

    event_log.info(
        SCOPE,
        format!(
            "relay started: {} allowed sender(s), {} destination(s), enrolling into {}",
            cfg.allowed_senders.len(),
            cfg.destinations.len(),
            cfg.enrollment_target
        ),
    );

    if cfg.allowed_senders.is_empty() {
        event_log.warn(SCOPE, "no allowed senders configured, nothing will be forwarded".to_string());
    }
    if cfg.destinations.is_empty() {
        event_log.warn(SCOPE, "no destinations configured, nothing will be forwarded".to_string());
    }

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                event_log.error(SCOPE, format!("signal handler failed: {e}"));
            }
            event_log.info(SCOPE, "shutdown requested".to_string());
        }
        n = dispatcher.run(events) => {
            event_log.info(SCOPE, format!("event source ended after {n} event(s), shutting down"));
        }
    }

    shut_down(&bridge, &scheduler, cfg.shutdown_grace, &*event_log).await;

    http_shutdown.cancel();
    match http.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => event_log.error(SCOPE, format!("status server failed: {e}")),
        Err(e) => event_log.error(SCOPE, format!("status server task failed: {e}")),
    }

    event_log.info(SCOPE, "relay stopped".to_string());
    log.close();
    Ok(())
}
