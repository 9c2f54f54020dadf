//! StageTrack - production stage time capture
//!
//! CLI entry point. Each invocation opens the local TimerStore, applies one
//! command, and makes a best-effort sync round when sync is enabled.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{Local, NaiveDate, NaiveTime};
use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result, eyre};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use stagetrack::cli::{Cli, Command, Target};
use stagetrack::config::Config;
use stagetrack::report::{self, PeriodSummary, WorkOrderReport};
use stagetrack::{
    CaptureController, CaptureError, CaptureStatus, Clock, Detention, Folio, Operator, RemoteBackend, SyncCoordinator,
    SyncHandle, SyncReport, SystemClock, TimeCapture, TimerEvent, create_backend,
};

fn setup_logging(log_dir: &Path, filter: &str) -> Result<()> {
    fs::create_dir_all(log_dir).context("Failed to create log directory")?;

    // Write to a log file, never to stdout/stderr
    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("stagetrack.log"))
        .context("Failed to open log file")?;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(env_filter)
        .init();

    info!("Logging initialized (filter: {})", filter);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    let filter = cli
        .log_level
        .clone()
        .or_else(|| config.log_level.clone())
        .unwrap_or_else(|| "info".to_string());
    setup_logging(&config.store.dir.join("logs"), &filter).context("Failed to setup logging")?;
    config.validate()?;

    info!(
        store = %config.store.dir.display(),
        sync_enabled = config.sync.enabled,
        "StageTrack loaded config"
    );

    let operator = config.device.operator(cli.operator.as_deref(), cli.role);
    let mut runtime = Runtime::open(&config).await?;
    let output = Output { json: cli.json };

    let result = dispatch(&mut runtime, cli.command, operator, output).await;
    runtime.close().await;
    result
}

async fn dispatch(runtime: &mut Runtime, command: Command, operator: Option<Operator>, out: Output) -> Result<()> {
    match command {
        Command::Start { target } => cmd_start(runtime, target, &require(operator)?, out).await,
        Command::Pause { target, reason } => cmd_pause(runtime, target, &require(operator)?, &reason, out).await,
        Command::Resume { target } => cmd_resume(runtime, target, &require(operator)?, out).await,
        Command::Finish { target } => cmd_finish(runtime, target, &require(operator)?, out).await,
        Command::CloseDetention { target } => cmd_close_detention(runtime, target, &require(operator)?, out).await,
        Command::Available { folio } => cmd_available(runtime, Folio(folio), out).await,
        Command::Status { folio } => cmd_status(runtime, Folio(folio), out).await,
        Command::Report {
            folio,
            from,
            to,
            remote,
        } => match folio {
            Some(folio) => cmd_report_folio(runtime, Folio(folio), remote, out).await,
            None => cmd_report_period(runtime, from, to, remote, out).await,
        },
        Command::Sync => cmd_sync(runtime, out).await,
        Command::Pending => cmd_pending(runtime, out).await,
        Command::Conflicts => cmd_conflicts(runtime, out).await,
        Command::Watch { folio } => cmd_watch(runtime, folio.into_iter().map(Folio).collect()).await,
    }
}

fn require(operator: Option<Operator>) -> Result<Operator> {
    operator.ok_or_else(|| eyre!("No operator given. Pass --operator or set device.operator in the config"))
}

/// Turn a rejected transition into the message the operator sees
fn rejected(e: CaptureError) -> eyre::Report {
    debug!(kind = e.kind(), error = %e, "rejected: transition refused");
    eyre!(e.user_message())
}

/// Controller, clock and (when enabled) the sync side for one invocation
struct Runtime {
    controller: CaptureController,
    clock: Arc<dyn Clock>,
    backend: Option<Arc<dyn RemoteBackend>>,
    sync: Option<SyncHandle>,
    coordinator: Option<SyncCoordinator>,
    events: broadcast::Receiver<TimerEvent>,
}

impl Runtime {
    async fn open(config: &Config) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let backend = create_backend(&config.sync).context("Failed to create sync backend")?;

        let (sync, signals) = match &backend {
            Some(_) => {
                let (handle, signals) = SyncHandle::channel(config.sync.channel_buffer);
                (Some(handle), Some(signals))
            }
            None => (None, None),
        };

        let controller = CaptureController::spawn(&config.store.dir, clock.clone(), sync.clone())
            .context(format!("Failed to open store at {}", config.store.dir.display()))?;
        let events = controller.subscribe_events();

        let coordinator = match (&backend, signals) {
            (Some(backend), Some(signals)) => Some(SyncCoordinator::new(
                controller.clone(),
                backend.clone(),
                clock.clone(),
                config.sync.clone(),
                signals,
            )),
            _ => None,
        };

        Ok(Self {
            controller,
            clock,
            backend,
            sync,
            coordinator,
            events,
        })
    }

    fn now(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Pull a work order before acting on it; offline falls back to local state
    async fn refresh(&mut self, folio: Folio) {
        let Some(coordinator) = self.coordinator.as_mut() else {
            return;
        };
        match coordinator.refresh_folio(folio).await {
            Ok(report) => debug!(%folio, ?report, "refresh: pulled"),
            Err(e) => warn!(%folio, error = %e, "Authority unreachable, using local state"),
        }
    }

    /// Best-effort sync round after a local change
    async fn flush(&mut self) -> Option<SyncReport> {
        let coordinator = self.coordinator.as_mut()?;
        match coordinator.sync_once().await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(error = %e, "Sync round failed");
                None
            }
        }
    }

    /// Conflict notices raised since the last call
    fn drain_conflicts(&mut self) -> Vec<String> {
        let mut notices = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(TimerEvent::Conflict(notice)) => notices.push(format!(
                    "{} {}: {}",
                    notice.folio,
                    notice.stage,
                    notice.error.user_message()
                )),
                Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        notices
    }

    async fn close(self) {
        // Anything still pending stays in the outbox for the next run
        if let Err(e) = self.controller.shutdown().await {
            warn!(error = %e, "CaptureController shutdown failed");
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Output {
    json: bool,
}

impl Output {
    fn json<T: Serialize>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}

// === Transitions ===

async fn cmd_start(rt: &mut Runtime, target: Target, operator: &Operator, out: Output) -> Result<()> {
    rt.refresh(target.folio()).await;
    let capture = rt
        .controller
        .start(target.folio(), target.stage, operator)
        .await
        .map_err(rejected)?;
    after_transition(rt, &capture, out).await
}

async fn cmd_pause(rt: &mut Runtime, target: Target, operator: &Operator, reason: &str, out: Output) -> Result<()> {
    let capture = rt
        .controller
        .pause(target.folio(), target.stage, operator, reason)
        .await
        .map_err(rejected)?;
    after_transition(rt, &capture, out).await
}

async fn cmd_resume(rt: &mut Runtime, target: Target, operator: &Operator, out: Output) -> Result<()> {
    rt.refresh(target.folio()).await;
    let capture = rt
        .controller
        .resume(target.folio(), target.stage, operator)
        .await
        .map_err(rejected)?;
    after_transition(rt, &capture, out).await
}

async fn cmd_finish(rt: &mut Runtime, target: Target, operator: &Operator, out: Output) -> Result<()> {
    let capture = rt
        .controller
        .finish(target.folio(), target.stage, operator)
        .await
        .map_err(rejected)?;
    after_transition(rt, &capture, out).await
}

async fn cmd_close_detention(rt: &mut Runtime, target: Target, closer: &Operator, out: Output) -> Result<()> {
    rt.refresh(target.folio()).await;
    let detention = rt
        .controller
        .close_detention(target.folio(), target.stage, closer)
        .await
        .map_err(rejected)?;
    rt.flush().await;
    print_conflicts(rt);

    if out.json {
        return out.json(&detention);
    }
    println!("{}", format_detention(&detention, rt.now()));
    Ok(())
}

async fn after_transition(rt: &mut Runtime, capture: &TimeCapture, out: Output) -> Result<()> {
    let report = rt.flush().await;
    print_conflicts(rt);

    if out.json {
        return out.json(capture);
    }
    println!("{}", format_capture(capture, rt.now()));
    if capture.is_paused()
        && let Ok(Some(detention)) = rt.controller.active_detention(capture.folio, Some(capture.stage)).await
    {
        println!("  {}", format_detention(&detention, rt.now()));
    }
    match report {
        Some(r) if r.failed == 0 => println!("{}", "synced".dimmed()),
        Some(_) | None if rt.coordinator.is_some() => println!("{}", "saved locally, not yet synced".yellow()),
        _ => {}
    }
    Ok(())
}

fn print_conflicts(rt: &mut Runtime) {
    for notice in rt.drain_conflicts() {
        eprintln!("{} {}", "conflict:".red().bold(), notice);
    }
}

// === Queries ===

async fn cmd_available(rt: &mut Runtime, folio: Folio, out: Output) -> Result<()> {
    rt.refresh(folio).await;
    let stages = rt.controller.available_stages(folio).await?;
    if out.json {
        return out.json(&stages);
    }
    if stages.is_empty() {
        println!("{}", format!("No stages available for {}", folio).dimmed());
    }
    for stage in stages {
        println!("{}", stage);
    }
    Ok(())
}

#[derive(Serialize)]
struct StatusView {
    folio: Folio,
    captures: Vec<TimeCapture>,
    detentions: Vec<Detention>,
    available: Vec<stagetrack::Stage>,
}

async fn cmd_status(rt: &mut Runtime, folio: Folio, out: Output) -> Result<()> {
    rt.refresh(folio).await;
    let view = StatusView {
        folio,
        captures: rt.controller.list_captures(Some(folio)).await?,
        detentions: rt.controller.list_detentions(Some(folio)).await?,
        available: rt.controller.available_stages(folio).await?.into_iter().collect(),
    };
    if out.json {
        return out.json(&view);
    }

    let now = rt.now();
    println!("{} {}", "Work order".bold(), folio);
    if view.captures.is_empty() {
        println!("  {}", "No captures".dimmed());
    }
    for capture in &view.captures {
        println!("  {}", format_capture(capture, now));
    }
    for detention in &view.detentions {
        println!("  {}", format_detention(detention, now));
    }
    let available: Vec<String> = view.available.iter().map(|s| s.to_string()).collect();
    println!("  available: {}", available.join(", "));
    Ok(())
}

async fn cmd_report_folio(rt: &mut Runtime, folio: Folio, remote: bool, out: Output) -> Result<()> {
    let mut order = None;
    if remote {
        let coordinator = rt
            .coordinator
            .as_mut()
            .ok_or_else(|| eyre!("Sync is disabled; --remote needs sync.enabled"))?;
        coordinator
            .refresh_folio(folio)
            .await
            .context("Failed to pull work order")?;
        if let Some(backend) = &rt.backend {
            order = backend.get_work_order(folio).await.context("Failed to read work order")?;
        }
    }

    let captures = rt.controller.list_captures(Some(folio)).await?;
    let detentions = rt.controller.list_detentions(Some(folio)).await?;
    let report = report::work_order_report(folio, order, &captures, &detentions, rt.now());

    if out.json {
        return out.json(&report);
    }
    print_work_order_report(&report);
    Ok(())
}

async fn cmd_report_period(
    rt: &mut Runtime,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    remote: bool,
    out: Output,
) -> Result<()> {
    let from = from.unwrap_or_else(|| Local::now().date_naive());
    let to = to.unwrap_or(from);
    let from_ms = local_midnight_ms(from)?;
    let to_ms = local_midnight_ms(
        to.checked_add_days(chrono::Days::new(1))
            .ok_or_else(|| eyre!("Date out of range: {}", to))?,
    )?;
    debug!(%from, %to, from_ms, to_ms, remote, "cmd_report_period: called");

    let (captures, detentions) = if remote {
        let backend = rt
            .backend
            .as_ref()
            .ok_or_else(|| eyre!("Sync is disabled; --remote needs sync.enabled"))?;
        (
            backend.list_captures_between(from_ms, to_ms).await?,
            backend.list_detentions_between(from_ms, to_ms).await?,
        )
    } else {
        (
            rt.controller.list_captures(None).await?,
            rt.controller.list_detentions(None).await?,
        )
    };

    let summary = report::period_summary(from_ms, to_ms, &captures, &detentions, rt.now());
    if out.json {
        return out.json(&summary);
    }
    print_period_summary(&summary, from, to);
    Ok(())
}

fn local_midnight_ms(date: NaiveDate) -> Result<i64> {
    date.and_time(NaiveTime::MIN)
        .and_local_timezone(Local)
        .earliest()
        .map(|t| t.timestamp_millis())
        .ok_or_else(|| eyre!("No local midnight on {}", date))
}

// === Sync ===

async fn cmd_sync(rt: &mut Runtime, out: Output) -> Result<()> {
    let coordinator = rt
        .coordinator
        .as_mut()
        .ok_or_else(|| eyre!("Sync is disabled. Set sync.enabled in the config"))?;
    let report = coordinator.sync_once().await?;
    print_conflicts(rt);

    if out.json {
        return out.json(&report);
    }
    println!(
        "pushed {}  failed {}  conflicts {}  pulled {}  not yet synced {}",
        report.pushed, report.failed, report.conflicts, report.pulled, report.stale
    );
    Ok(())
}

async fn cmd_pending(rt: &mut Runtime, out: Output) -> Result<()> {
    let pending = rt.controller.pending_ops().await?;
    if out.json {
        return out.json(&pending);
    }
    if pending.is_empty() {
        println!("{}", "Everything is synced".green());
    }
    for entry in pending {
        let flag = if entry.stale {
            "not yet synced".red().to_string()
        } else {
            "pending".yellow().to_string()
        };
        println!(
            "{} {} {} attempts={} {}",
            entry.op_id.dimmed(),
            entry.kind.bold(),
            entry.record_id,
            entry.attempts,
            flag
        );
        if let Some(error) = entry.last_error {
            println!("    {}", error.dimmed());
        }
    }
    Ok(())
}

async fn cmd_conflicts(rt: &mut Runtime, out: Output) -> Result<()> {
    let conflicts = rt.controller.conflicts().await?;
    if out.json {
        return out.json(&conflicts);
    }
    if conflicts.is_empty() {
        println!("{}", "No conflicts recorded".green());
    }
    for c in conflicts {
        println!(
            "#{} {}/{} resolved by {} at {}",
            c.id,
            c.collection,
            c.record_id,
            c.strategy,
            format_time(c.resolved_at)
        );
    }
    Ok(())
}

async fn cmd_watch(rt: &mut Runtime, folios: Vec<Folio>) -> Result<()> {
    let coordinator = rt
        .coordinator
        .take()
        .ok_or_else(|| eyre!("Sync is disabled. Set sync.enabled in the config"))?;
    let sync = rt
        .sync
        .clone()
        .ok_or_else(|| eyre!("Sync is disabled. Set sync.enabled in the config"))?;

    let task = tokio::spawn(coordinator.run());
    for folio in folios {
        sync.pull_now(Some(folio)).await?;
    }
    println!("{}", "Watching for changes (Ctrl-C to stop)".dimmed());

    loop {
        tokio::select! {
            event = rt.events.recv() => match event {
                Ok(event) => println!("{}", format_event(&event)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping sync");
                break;
            }
        }
    }

    sync.shutdown().await?;
    task.await.context("Sync task panicked")??;
    Ok(())
}

// === Formatting ===

fn format_duration(secs: i64) -> String {
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h {:02}m {:02}s", h, m, s)
    } else if m > 0 {
        format!("{}m {:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}

fn format_time(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}

fn format_status(status: CaptureStatus) -> String {
    match status {
        CaptureStatus::Running => status.to_string().green().to_string(),
        CaptureStatus::Paused => status.to_string().yellow().to_string(),
        CaptureStatus::Finished => status.to_string().blue().to_string(),
    }
}

fn format_capture(capture: &TimeCapture, now: i64) -> String {
    let elapsed = report::capture_elapsed(capture, now);
    let suffix = if elapsed.is_finished() { "" } else { " so far" };
    format!(
        "{} {} {} by {} ({}{})",
        capture.folio,
        capture.stage.to_string().bold(),
        format_status(capture.status),
        capture.operator,
        format_duration(elapsed.seconds()),
        suffix
    )
}

fn format_detention(detention: &Detention, now: i64) -> String {
    let state = match &detention.closed_by {
        Some(by) if !detention.active => format!("closed by {}", by),
        _ => "active".red().to_string(),
    };
    format!(
        "detention {} {} \"{}\" {} ({})",
        detention.stage,
        format_time(detention.started_at),
        detention.reason,
        state,
        format_duration(detention.duration_ms(now) / 1000)
    )
}

fn format_event(event: &TimerEvent) -> String {
    match event {
        TimerEvent::Transitioned {
            folio,
            stage,
            operator,
            status,
        } => format!("{} {} {} by {}", folio, stage, format_status(*status), operator),
        TimerEvent::DetentionOpened { folio, stage, reason } => {
            format!("{} {} detention opened: {}", folio, stage, reason)
        }
        TimerEvent::DetentionClosed { folio, stage, closed_by } => {
            format!("{} {} detention closed by {}", folio, stage, closed_by)
        }
        TimerEvent::Synced { record_id, .. } => format!("{} {}", "synced".dimmed(), record_id),
        TimerEvent::NotYetSynced {
            record_id, attempts, ..
        } => format!("{} {} after {} attempts", "not yet synced".red(), record_id, attempts),
        TimerEvent::Conflict(notice) => format!(
            "{} {} {}: {}",
            "conflict".red().bold(),
            notice.folio,
            notice.stage,
            notice.error.user_message()
        ),
        TimerEvent::Reconciled { folio, adopted } => format!("{} reconciled ({} adopted)", folio, adopted),
    }
}

fn print_work_order_report(report: &WorkOrderReport) {
    println!("{} {}", "Work order".bold(), report.folio);
    if let Some(order) = &report.order {
        println!(
            "  type {}  opened {}  status {:?}",
            order.type_id, order.opened_date, order.status
        );
    }
    for line in &report.stages {
        let suffix = if line.elapsed.is_finished() { "" } else { " so far" };
        println!(
            "  {:<12} {:<12} {}{}  detentions {}",
            line.stage.to_string(),
            line.operator,
            format_duration(line.elapsed.seconds()),
            suffix,
            line.detentions
        );
    }
    println!(
        "  finished {}  in progress {}  detentions {} active / {} closed",
        format_duration(report.finished_seconds),
        format_duration(report.in_progress_seconds),
        report.detentions.active,
        report.detentions.inactive
    );
    if report.complete {
        println!("  {}", "complete".green());
    } else if !report.open {
        println!("  {}", "closed".dimmed());
    }
}

fn print_period_summary(summary: &PeriodSummary, from: NaiveDate, to: NaiveDate) {
    println!("{} {} .. {}", "Period".bold(), from, to);
    println!("  work orders {}", summary.work_orders);
    for total in &summary.totals {
        println!(
            "  {:<12} finished {} ({})  in progress {} ({})",
            total.stage.to_string(),
            format_duration(total.finished_seconds),
            total.finished_count,
            format_duration(total.in_progress_seconds),
            total.in_progress_count
        );
    }
    for average in &summary.averages {
        println!(
            "  {:<12} average {} over {}",
            average.stage.to_string(),
            format_duration(average.average_seconds.round() as i64),
            average.samples
        );
    }
    println!(
        "  detentions {} active / {} closed",
        summary.detentions.active, summary.detentions.inactive
    );
}
