use anyhow::Context;
use clap::{Arg, ArgAction, ArgMatches, Command};
use indicatif::{ProgressBar, ProgressStyle};
use judgewatch::core::events::MonitorEvent;
use judgewatch::core::fetcher::fetch_job_counts;
use judgewatch::core::model::{JobCounts, MonitorSnapshot, MonitorState, QueueId, Settlement};
use judgewatch::core::monitor::{Monitor, MonitorConfig, MonitorError, DEFAULT_POLL_INTERVAL};
use judgewatch::i18n::{get_messages, Locale, Messages};
use judgewatch::plugins::registry::{ApiContext, EvaluationBackend, PluginRegistry, DEFAULT_BASE_URL};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const BASE_URL_ENV: &str = "JUDGEWATCH_API_BASE_URL";

fn queue_arg() -> Arg {
    Arg::new("queue_id")
        .help("Evaluation queue id")
        .required(true)
        .num_args(1)
}

fn monitor_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("poll_interval_ms")
            .long("poll-interval-ms")
            .help("Polling interval in milliseconds when the live stream is unavailable")
            .default_value("1500")
            .num_args(1),
    )
    .arg(
        Arg::new("max_poll_failures")
            .long("max-poll-failures")
            .help("Give up after this many consecutive failed status requests (default: never)")
            .num_args(1),
    )
}

fn build_cli(registry: &PluginRegistry) -> Command {
    let run = monitor_args(
        Command::new("run")
            .about("Trigger an evaluation run for a queue and follow its progress")
            .arg(queue_arg()),
    );
    let watch = monitor_args(
        Command::new("watch")
            .about("Follow the progress of a queue without triggering a run")
            .arg(queue_arg()),
    );
    let status = Command::new("status")
        .about("Print the current job counts of a queue once")
        .arg(queue_arg())
        .arg(
            Arg::new("json")
                .long("json")
                .help("Print the counts as JSON")
                .action(ArgAction::SetTrue),
        );

    Command::new("judgewatch")
        .about("Live progress monitor for evaluation queues")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("locale")
                .long("locale")
                .help("Output language (en, zh)")
                .default_value("en")
                .global(true)
                .num_args(1),
        )
        .subcommand(registry.augment_command(run))
        .subcommand(registry.augment_command(watch))
        .subcommand(registry.augment_command(status))
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "judgewatch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn monitor_config(m: &ArgMatches) -> anyhow::Result<MonitorConfig> {
    let poll_interval = match m.get_one::<String>("poll_interval_ms") {
        Some(ms) => Duration::from_millis(
            ms.parse()
                .with_context(|| format!("invalid --poll-interval-ms value {ms:?}"))?,
        ),
        None => DEFAULT_POLL_INTERVAL,
    };
    let max_poll_failures = m
        .get_one::<String>("max_poll_failures")
        .map(|s| s.parse::<u32>())
        .transpose()
        .context("invalid --max-poll-failures value")?;

    if poll_interval.is_zero() {
        anyhow::bail!("--poll-interval-ms must be greater than zero");
    }
    Ok(MonitorConfig { poll_interval, max_poll_failures, ..MonitorConfig::default() })
}

fn backend_from(registry: &PluginRegistry, m: &ArgMatches) -> anyhow::Result<Arc<dyn EvaluationBackend>> {
    let base_url = std::env::var(BASE_URL_ENV).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
    let base_url = ApiContext::parse_base_url(&base_url)
        .with_context(|| format!("invalid {BASE_URL_ENV}"))?;
    let mut ctx = ApiContext::new(base_url);
    registry
        .apply_matches(m, &mut ctx)
        .context("invalid HTTP options")?;
    registry
        .backend_for(&ctx)
        .with_context(|| format!("no backend for {}", ctx.base_url))
}

fn queue_from(m: &ArgMatches) -> anyhow::Result<QueueId> {
    let raw = m
        .get_one::<String>("queue_id")
        .ok_or_else(|| anyhow::anyhow!("missing queue id"))?;
    QueueId::new(raw.as_str()).context("invalid queue id")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let registry = PluginRegistry::with_defaults();
    let matches = build_cli(&registry).get_matches();
    let locale = matches
        .get_one::<String>("locale")
        .map(|s| Locale::parse(s))
        .unwrap_or_default();
    let msgs = get_messages(locale);

    match matches.subcommand() {
        Some(("run", m)) => {
            let backend = backend_from(&registry, m)?;
            let monitor = Monitor::new(backend, monitor_config(m)?);
            let queue_id = queue_from(m)?;

            let ui_task = spawn_ui(monitor.subscribe(), msgs)?;
            println!("{} {}", msgs.run_started, queue_id);

            let started = tokio::select! {
                res = monitor.run(queue_id) => Some(res),
                _ = tokio::signal::ctrl_c() => None,
            };
            let settled = match started {
                None => {
                    monitor.stop();
                    monitor.snapshot()
                }
                Some(Err(e)) => {
                    drop(monitor);
                    let _ = ui_task.await;
                    return Err(run_failed(e, msgs));
                }
                Some(Ok(result)) => {
                    if result.has_work() {
                        println!("{} {}", result.enqueued, msgs.enqueued);
                    } else {
                        println!("{}", msgs.nothing_to_evaluate);
                    }
                    follow(&monitor).await
                }
            };

            drop(monitor);
            let _ = ui_task.await;
            report(&settled, msgs)?;
        }
        Some(("watch", m)) => {
            let backend = backend_from(&registry, m)?;
            let monitor = Monitor::new(backend, monitor_config(m)?);
            let queue_id = queue_from(m)?;

            let ui_task = spawn_ui(monitor.subscribe(), msgs)?;
            println!("{} {}", msgs.watching, queue_id);
            monitor.watch(queue_id);
            let settled = follow(&monitor).await;

            drop(monitor);
            let _ = ui_task.await;
            report(&settled, msgs)?;
        }
        Some(("status", m)) => {
            let backend = backend_from(&registry, m)?;
            let queue_id = queue_from(m)?;
            let counts = fetch_job_counts(backend.as_ref(), &queue_id)
                .await
                .ok_or_else(|| anyhow::anyhow!("{}", msgs.status_unavailable))?;

            if m.get_flag("json") {
                let out = serde_json::json!({
                    "queue_id": queue_id,
                    "counts": counts,
                    "progress_percent": counts.progress_percent(),
                    "complete": counts.is_complete(),
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                print_counts(&queue_id, &counts, msgs);
            }
        }
        _ => {}
    }

    Ok(())
}

fn run_failed(e: MonitorError, msgs: &'static Messages) -> anyhow::Error {
    anyhow::Error::from(e).context(msgs.run_failed)
}

/// Waits for the session to settle, or stops it on Ctrl-C.
async fn follow(monitor: &Monitor) -> MonitorSnapshot {
    tokio::select! {
        snapshot = monitor.wait_settled() => snapshot,
        _ = tokio::signal::ctrl_c() => {
            monitor.stop();
            monitor.snapshot()
        }
    }
}

fn report(settled: &MonitorSnapshot, msgs: &Messages) -> anyhow::Result<()> {
    match &settled.state {
        MonitorState::Settled(Settlement::Complete) => {
            let summary = settled
                .counts
                .map(|c| format!(" ({}/{} {}, {}%)", c.finished(), c.total, msgs.finished_label, settled.progress_percent))
                .unwrap_or_default();
            println!("{}{}", msgs.processing_complete, summary);
            Ok(())
        }
        MonitorState::Settled(Settlement::Error { reason }) => {
            anyhow::bail!("{}: {}", msgs.monitoring_failed, reason)
        }
        _ => {
            println!("{}", msgs.stopped);
            Ok(())
        }
    }
}

fn print_counts(queue_id: &QueueId, c: &JobCounts, msgs: &Messages) {
    println!("{queue_id}");
    println!("  {:<10} {}", msgs.pending_label, c.pending);
    println!("  {:<10} {}", msgs.running_label, c.running);
    println!("  {:<10} {}", msgs.done_label, c.done);
    println!("  {:<10} {}", msgs.failed_label, c.failed);
    println!("  {:<10} {}", msgs.total_label, c.total);
    println!("  {:<10} {}%", msgs.progress_label, c.progress_percent());
    println!(
        "  {:<10} {}",
        msgs.complete_label,
        if c.is_complete() { msgs.yes } else { msgs.no }
    );
}

fn spawn_ui(
    mut rx: broadcast::Receiver<MonitorEvent>,
    msgs: &'static Messages,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let sty_bar = ProgressStyle::with_template("{prefix} {bar:40.cyan/blue} {pos:>3}% {wide_msg}")?;

    Ok(tokio::spawn(async move {
        let pb = ProgressBar::new(100);
        pb.set_style(sty_bar);

        loop {
            let evt = match rx.recv().await {
                Ok(e) => e,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            };

            match evt {
                MonitorEvent::StateChanged { queue_id, state, .. } => {
                    pb.set_prefix(format!("[{queue_id}]"));
                    match state {
                        MonitorState::Settled(Settlement::Complete) => {
                            pb.set_position(100);
                            pb.finish_with_message(msgs.processing_complete);
                            break;
                        }
                        MonitorState::Settled(Settlement::Error { reason }) => {
                            pb.abandon_with_message(format!("{}: {}", msgs.monitoring_failed, reason));
                            break;
                        }
                        MonitorState::Idle => {
                            pb.abandon_with_message(msgs.stopped);
                            break;
                        }
                        other => {
                            pb.println(format!("[{}] {:?}", msgs.state_prefix, other));
                        }
                    }
                }
                MonitorEvent::Progress(update) => {
                    let c = update.counts;
                    pb.set_position(u64::from(update.progress_percent));
                    pb.set_message(format!(
                        "{}/{} {} | {} {} | {} {} | {} {}",
                        c.finished(),
                        c.total,
                        msgs.finished_label,
                        c.pending,
                        msgs.pending_label,
                        c.running,
                        msgs.running_label,
                        c.failed,
                        msgs.failed_label,
                    ));
                }
                MonitorEvent::Error { scope, message } => {
                    pb.println(format!("[{}] {}: {}", msgs.error_prefix, scope, message));
                }
                MonitorEvent::Info { scope, message } => {
                    pb.println(format!("[{}] {}: {}", msgs.info_prefix, scope, message));
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use judgewatch::plugins::registry::ApiError;

    fn run_matches(args: &[&str]) -> ArgMatches {
        let registry = PluginRegistry::with_defaults();
        let matches = build_cli(&registry).try_get_matches_from(args).unwrap();
        let (_, m) = matches.subcommand().unwrap();
        m.clone()
    }

    #[test]
    fn trigger_failure_reads_as_one_message() {
        let err = MonitorError::Trigger {
            queue_id: QueueId::new("q1").unwrap(),
            source: ApiError::Status {
                status: reqwest::StatusCode::BAD_REQUEST,
                detail: Some("No assignments provided".into()),
            },
        };
        let msg = format!("{:#}", run_failed(err, get_messages(Locale::En)));
        assert_eq!(
            msg,
            "Run failed: failed to start evaluations for queue q1: http status 400 Bad Request: No assignments provided"
        );
        assert_eq!(msg.matches("No assignments provided").count(), 1);
    }

    #[test]
    fn bad_monitor_flags_name_the_flag() {
        let m = run_matches(&["judgewatch", "run", "q1", "--poll-interval-ms", "soon"]);
        let err = format!("{:#}", monitor_config(&m).unwrap_err());
        assert!(err.starts_with("invalid --poll-interval-ms value \"soon\""), "{err}");

        let m = run_matches(&["judgewatch", "watch", "q1", "--max-poll-failures", "many"]);
        let err = format!("{:#}", monitor_config(&m).unwrap_err());
        assert!(err.starts_with("invalid --max-poll-failures value"), "{err}");
    }

    #[test]
    fn blank_queue_id_is_rejected_with_context() {
        let m = run_matches(&["judgewatch", "status", " "]);
        let err = format!("{:#}", queue_from(&m).unwrap_err());
        assert_eq!(err, "invalid queue id: queue id must not be empty");
    }

    #[test]
    fn monitor_flags_default_to_library_defaults() {
        let m = run_matches(&["judgewatch", "run", "q1"]);
        let cfg = monitor_config(&m).unwrap();
        assert_eq!(cfg.poll_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(cfg.max_poll_failures, None);
    }
}
