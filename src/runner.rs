//! Run controller: resolve, enumerate and forward, once or on a loop

use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use crate::backend::{ChatService, ForwardService};
use crate::chat::{resolve_pair, ChatPair};
use crate::checkpoint::CheckpointStore;
use crate::config::{BotIdentity, Mode};
use crate::error::{Error, Result};
use crate::forward::{ForwardReport, Forwarder};
use crate::messages::{apply_limit, enumerate, resume_after, KindFilter};
use crate::metrics;

/// Options fixed for the duration of one run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub source: String,
    pub destination: Option<String>,
    pub mode: Mode,
    pub query: String,
    pub filter: Option<KindFilter>,
    /// Maximum number of messages to send; 0 means unlimited.
    pub limit: usize,
    pub resume: bool,
    pub delay: Duration,
    pub bot: Option<BotIdentity>,
}

/// State shared by the stages of a single run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub pair: ChatPair,
    pub checkpoint: PathBuf,
}

/// Errors that make retrying pointless until the operator changes input.
pub fn is_fatal(err: &Error) -> bool {
    matches!(
        err,
        Error::ChatNotFound { .. }
            | Error::InvalidArgument(_)
            | Error::Config(_)
            | Error::AuthorizationRequired(_)
            | Error::SessionNotFound(_)
            | Error::SessionLocked(_)
    )
}

/// Compute the ids still to send for this run.
pub fn pending_ids(
    ids: &[i32],
    store: &CheckpointStore,
    context: &RunContext,
    resume: bool,
    limit: usize,
) -> Vec<i32> {
    let mut pending = ids;
    if resume {
        match store.load(&context.checkpoint) {
            Some(last_id) => {
                pending = resume_after(ids, last_id);
                if pending.len() == ids.len() && !ids.is_empty() {
                    println!("Last ID {} not reached yet, starting from the beginning.", last_id);
                } else {
                    info!(last_id, remaining = pending.len(), "Resuming from checkpoint");
                }
            }
            None => info!("No checkpoint found, starting from the beginning"),
        }
    }
    apply_limit(pending, limit).to_vec()
}

/// Resolve both chats, enumerate, and forward once.
pub async fn run_once<C, F>(
    lookup: &C,
    sender: &F,
    store: &CheckpointStore,
    options: &RunOptions,
) -> Result<(RunContext, ForwardReport)>
where
    C: ChatService,
    F: ForwardService,
{
    let started = Instant::now();
    let result = match resolve_context(lookup, store, options).await {
        Ok(context) => forward_context(lookup, sender, store, options, &context)
            .await
            .map(|report| (context, report)),
        Err(e) => Err(e),
    };
    metrics::record_run(started.elapsed(), result.is_ok());
    result
}

/// Resolve the chat pair and locate its checkpoint.
async fn resolve_context<C: ChatService>(
    lookup: &C,
    store: &CheckpointStore,
    options: &RunOptions,
) -> Result<RunContext> {
    let pair = resolve_pair(
        lookup,
        &options.source,
        options.destination.as_deref(),
        options.mode,
        options.bot.as_ref(),
    )
    .await?;

    Ok(RunContext {
        checkpoint: store.path_for(pair.source.id, pair.destination.id),
        pair,
    })
}

/// Enumerate the source and forward whatever is pending.
async fn forward_context<C, F>(
    lookup: &C,
    sender: &F,
    store: &CheckpointStore,
    options: &RunOptions,
    context: &RunContext,
) -> Result<ForwardReport>
where
    C: ChatService,
    F: ForwardService,
{
    let ids = enumerate(
        lookup,
        &context.pair.source,
        &options.query,
        options.filter.as_ref(),
    )
    .await?;
    let pending = pending_ids(&ids, store, context, options.resume, options.limit);

    println!(
        "Forwarding {} messages from '{}' to '{}'",
        pending.len(),
        context.pair.source.title,
        context.pair.destination.title
    );

    let report = Forwarder::new(
        sender,
        store,
        &context.pair,
        &context.checkpoint,
        options.delay,
    )
    .run(&pending)
    .await?;

    println!(
        "\nTask completed! {} of {} messages forwarded, {} failed.\n",
        report.forwarded, report.total, report.failed
    );

    Ok(report)
}

/// Options for the iteration after `context` in restart mode.
///
/// A destination created on this iteration is reused, and resume is turned
/// on so only new messages are sent.
pub fn next_iteration(options: &RunOptions, context: &RunContext) -> RunOptions {
    let mut next = options.clone();
    if context.pair.created_destination && next.destination.is_none() {
        next.destination = Some(context.pair.destination.id.to_string());
    }
    next.resume = true;
    next
}

/// Repeat [`run_once`] forever with `wait` between iterations.
///
/// Fatal errors (see [`is_fatal`]) end the loop; anything else is logged and
/// retried on the next iteration. Once the chats have been resolved the next
/// iteration reuses them, even if this one failed later on.
pub async fn run_forever<C, F>(
    lookup: &C,
    sender: &F,
    store: &CheckpointStore,
    options: RunOptions,
    wait: Duration,
) -> Result<()>
where
    C: ChatService,
    F: ForwardService,
{
    let mut options = options;
    loop {
        let started = Instant::now();
        let result = match resolve_context(lookup, store, &options).await {
            Ok(context) => {
                let result = forward_context(lookup, sender, store, &options, &context).await;
                options = next_iteration(&options, &context);
                result.map(|_| ())
            }
            Err(e) => Err(e),
        };
        metrics::record_run(started.elapsed(), result.is_ok());

        match result {
            Ok(()) => {}
            Err(e) if is_fatal(&e) => return Err(e),
            Err(e) => error!("Run failed, will retry after the countdown: {}", e),
        }
        countdown(wait).await;
    }
}

/// `HH:MM:SS` for a number of seconds.
pub fn format_countdown(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let mins = (total_secs % 3600) / 60;
    let secs = total_secs % 60;
    format!("{:02}:{:02}:{:02}", hours, mins, secs)
}

/// Print a live `Restarting in: HH:MM:SS` line until `wait` has elapsed.
pub async fn countdown(wait: Duration) {
    let mut ticker = interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut remaining = wait.as_secs();
    while remaining > 0 {
        ticker.tick().await;
        print!("Restarting in: {}\r", format_countdown(remaining));
        let _ = std::io::stdout().flush();
        remaining -= 1;
    }
    ticker.tick().await;
    println!();
}
