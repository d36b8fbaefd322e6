mod cli;
mod ui;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Command};
use payclose::api::{ClosingApi, ClosingApiClient};
use payclose::config::PayCloseConfig;
use payclose::demo::{DEMO_CLOSING, DemoApi};
use payclose::incidence::{ConversationState, GroupOrder, ResolutionKind, Role};
use payclose::jobs::{JobKind, PollHandle};
use payclose::lifecycle::SectionId;
use payclose::{ClosingWorkflow, JobEvent};
use ui::JobProgress;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = PayCloseConfig::load(cli.config.as_deref())?;
    if let Some(interval) = cli.poll_interval_ms {
        config.poll_interval_ms = interval;
    }

    let default_filter = if cli.verbose {
        "payclose=debug".to_string()
    } else {
        config.log_filter.clone()
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;
    runtime.block_on(run(cli.command, config))
}

fn connect(config: &PayCloseConfig) -> Result<Arc<ClosingApiClient>> {
    if config.api_token.is_empty() {
        bail!(
            "no API token configured; set api_token in payclose.toml or {}",
            payclose::config::TOKEN_ENV
        );
    }
    let client = ClosingApiClient::new(config.api_base_url.clone(), config.api_token.clone())?;
    Ok(Arc::new(client))
}

async fn run(command: Command, config: PayCloseConfig) -> Result<()> {
    match command {
        Command::Demo => run_demo(&config).await?,
        Command::Status { closing } => {
            let wf = ClosingWorkflow::load(connect(&config)?, &closing, &config).await?;
            ui::print_closing(wf.closing(), wf.sections(), &wf.unlocked_sections());
        }
        Command::Incidences { closing, order } => {
            let mut wf = ClosingWorkflow::load(connect(&config)?, &closing, &config).await?;
            if wf.incidences().is_empty() {
                wf.refresh_incidences().await?;
            }
            ui::print_view(&wf.view()?, order.into());
        }
        Command::History { incidence } => {
            let resolutions = connect(&config)?.get_history(&incidence).await?;
            let state = ConversationState::derive(&resolutions);
            ui::print_history(&incidence, &resolutions, state);
        }
        Command::Job {
            closing,
            kind,
            subject,
            section,
        } => {
            let mut wf = ClosingWorkflow::load(connect(&config)?, &closing, &config).await?;
            let kind = JobKind::from(kind);
            let handle = match (kind, section, subject) {
                (JobKind::FileProcess, Some(section), Some(file_id)) => {
                    wf.upload_file(section.into(), &file_id).await?
                }
                (JobKind::FileProcess, _, _) => {
                    bail!("file-process jobs need --section and --subject")
                }
                (kind, _, subject) => wf.start_job(kind, subject).await?,
            };
            await_job(&mut wf, &handle).await?;
            ui::print_closing(wf.closing(), wf.sections(), &wf.unlocked_sections());
        }
    }
    Ok(())
}

/// Shows a spinner until the poll behind `handle` reports, then applies it.
async fn await_job<A: ClosingApi>(wf: &mut ClosingWorkflow<A>, handle: &PollHandle) -> Result<()> {
    let progress = JobProgress::start(handle.key());
    loop {
        let Some(JobEvent { job, outcome }) = wf.next_event().await else {
            bail!("job event channel closed");
        };
        if &job.operation() != handle.key() {
            continue;
        }
        progress.complete(&outcome);
        let fired = wf.handle_job_event(JobEvent { job, outcome }).await?;
        ui::print_triggers(&fired);
        return Ok(());
    }
}

async fn run_demo(config: &PayCloseConfig) -> Result<()> {
    // The in-memory backend answers instantly; keep the walk-through short.
    let config = PayCloseConfig {
        poll_interval_ms: config.poll_interval_ms.min(300),
        ..config.clone()
    };
    info!(interval_ms = config.poll_interval_ms, "running offline demo");
    let api = Arc::new(DemoApi::new(3));
    let mut wf = ClosingWorkflow::load(api, DEMO_CLOSING, &config).await?;

    println!("Uploading payroll files");
    for (section, file) in [
        (SectionId::UploadA, "libro-remuneraciones.xlsx"),
        (SectionId::UploadB, "movimientos-mes.xlsx"),
    ] {
        let handle = wf.upload_file(section, file).await?;
        await_job(&mut wf, &handle).await?;
    }

    println!("Continuing to verification");
    let handle = wf.continue_to_verification().await?;
    await_job(&mut wf, &handle).await?;

    for kind in [JobKind::Consolidate, JobKind::GenerateIncidences] {
        let handle = wf.start_job(kind, None).await?;
        await_job(&mut wf, &handle).await?;
    }
    ui::print_view(&wf.view()?, GroupOrder::PriorityDesc);

    println!("Negotiating inc-02");
    wf.submit_resolution(
        "inc-02",
        Role::Analyst,
        ResolutionKind::Justification,
        "annual bonus paid in September",
        None,
    )
    .await?;
    wf.reject("inc-02", Role::Supervisor, "missing receipt").await?;
    wf.submit_resolution(
        "inc-02",
        Role::Analyst,
        ResolutionKind::Justification,
        "receipt uploaded to the shared folder",
        None,
    )
    .await?;
    wf.approve("inc-02", Role::Supervisor).await?;
    if let Some(incidence) = wf.incidence("inc-02") {
        ui::print_history(&incidence.id, &incidence.resolutions, incidence.state());
    }

    let open: Vec<String> = wf
        .incidences()
        .iter()
        .filter(|i| !i.informational && !i.state().is_resolved())
        .map(|i| i.id.clone())
        .collect();
    for id in open {
        wf.submit_resolution(&id, Role::Analyst, ResolutionKind::Justification, "reviewed", None)
            .await?;
        wf.approve(&id, Role::Supervisor).await?;
    }

    println!("Finalizing");
    let handle = wf.start_job(JobKind::Finalize, None).await?;
    await_job(&mut wf, &handle).await?;
    ui::print_closing(wf.closing(), wf.sections(), &wf.unlocked_sections());
    wf.shutdown();
    Ok(())
}
