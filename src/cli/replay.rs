use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use action_flow::{
    DefaultFlowExecutor, FailureStrategy, FlowExecutor, ReplayReport, StepResult, StepTree,
};
use action_locator::{ActionPerformer, HttpRecoveryService};
use anyhow::{bail, Context, Result};
use cdp_adapter::ChromiumPage;
use clap::Args;
use flowreplay_core_types::SessionId;
use flowreplay_event_bus::{EventBus, StatusDispatcher};
use flowreplay_cli::config::Config;
use tokio::fs;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::output::{print_json, OutputFormat};

const EVENT_BUFFER: usize = 256;

#[derive(Args, Clone, Debug)]
pub struct ReplayArgs {
    /// Recorded step file (flat JSON array)
    pub steps: PathBuf,

    /// DevTools websocket of a running browser; overrides the config
    #[arg(long)]
    pub ws_url: Option<String>,

    /// Session id carried by status events
    #[arg(long)]
    pub session: Option<String>,

    /// Delay before each UI action and after each navigation
    #[arg(long)]
    pub pacing_ms: Option<u64>,

    /// Record failed steps and keep going
    #[arg(long)]
    pub continue_on_error: bool,

    /// Print live replay events as JSON lines
    #[arg(long)]
    pub events: bool,

    /// Flow id reported to the recovery service
    #[arg(long)]
    pub flow_id: Option<String>,
}

pub async fn cmd_replay(args: ReplayArgs, config: &Config, output: OutputFormat) -> Result<()> {
    let raw = fs::read_to_string(&args.steps)
        .await
        .with_context(|| format!("Failed to read step file {}", args.steps.display()))?;
    let tree = StepTree::from_json(&raw).context("Invalid step file")?;

    let ws_url = args
        .ws_url
        .clone()
        .or_else(|| config.browser.ws_url.clone())
        .context("No browser to attach to: pass --ws-url or set browser.ws_url")?;

    let mut settings = config.replay_settings();
    if let Some(pacing_ms) = args.pacing_ms {
        settings = settings.with_pacing(Duration::from_millis(pacing_ms));
    }
    let strategy = if args.continue_on_error {
        FailureStrategy::Continue
    } else {
        config.replay.on_step_failure
    };

    let page = ChromiumPage::connect(&ws_url)
        .await
        .context("Failed to attach to browser")?;
    let mut performer = ActionPerformer::new(Arc::new(page), settings);
    if let Some(client) = config.recovery.client_config() {
        info!(base_url = %client.base_url, "remote selector recovery enabled");
        performer = performer.with_recovery(Arc::new(HttpRecoveryService::new(client)?));
    }

    let dispatcher = StatusDispatcher::new(EVENT_BUFFER);
    let printer = args.events.then(|| spawn_event_printer(&dispatcher));

    let mut executor = DefaultFlowExecutor::new(performer)
        .with_dispatcher(dispatcher)
        .with_strategy(strategy);
    if let Some(flow_id) = args.flow_id.clone() {
        executor = executor.with_flow_id(flow_id);
    }

    let session = args
        .session
        .as_deref()
        .map(SessionId::from)
        .unwrap_or_default();
    let cancel = CancellationToken::new();
    let interrupt = spawn_interrupt_watch(cancel.clone());

    let report = executor.execute(tree, session, cancel).await?;
    interrupt.abort();

    // The bus closes once the executor is gone; the printer drains and exits.
    drop(executor);
    if let Some(printer) = printer {
        if let Err(err) = printer.await {
            warn!(error = %err, "event printer stopped abnormally");
        }
    }

    match output {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Human => print_report(&report),
    }

    if !report.success {
        bail!(
            "replay did not succeed ({} failed step(s){})",
            report.failed_steps().count(),
            if report.cancelled { ", cancelled" } else { "" }
        );
    }
    Ok(())
}

fn spawn_event_printer(dispatcher: &Arc<StatusDispatcher>) -> JoinHandle<()> {
    let mut rx = dispatcher.bus().subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{}", line),
                    Err(err) => warn!(error = %err, "failed to render replay event"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event printer lagged behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn spawn_interrupt_watch(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling replay");
            cancel.cancel();
        }
    })
}

fn print_report(report: &ReplayReport) {
    println!("Session:  {}", report.session);
    if let Some(flow_id) = &report.flow_id {
        println!("Flow:     {}", flow_id);
    }
    for step in &report.steps {
        println!("  {}", describe_step(step));
    }
    println!(
        "Result:   {} ({} steps, {} recovered, {} failed, {} ms)",
        if report.success {
            "success"
        } else if report.cancelled {
            "cancelled"
        } else {
            "failed"
        },
        report.steps.len(),
        report.recovered_steps().count(),
        report.failed_steps().count(),
        report.latency_ms
    );
    if let Some(error) = &report.error {
        println!("Stopped:  {}", error);
    }
}

fn describe_step(step: &StepResult) -> String {
    let mut line = format!(
        "[{}] {} {}",
        if step.success { " ok " } else { "FAIL" },
        step.kind,
        step.step_id
    );
    if let Some(row) = step.row_index {
        line.push_str(&format!(" row={}", row));
    }
    if let Some(iterations) = step.iterations {
        line.push_str(&format!(" iterations={}", iterations));
    }
    if let Some(selector) = &step.selector {
        line.push_str(&format!(" selector={}", selector));
    }
    if let Some(stage) = step.stage.filter(|s| s.is_recovery()) {
        line.push_str(&format!(" recovered-by={}", stage.as_str()));
    }
    if let Some(error) = &step.error {
        line.push_str(&format!(" error=\"{}\"", error));
    }
    line
}
