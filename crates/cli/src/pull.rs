use anyhow::{Context, Result};
use ocisync_client::{BlobStore, CopyOptions, CopyReport, Copier};
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::{PullArgs, connect};

pub async fn pull(args: PullArgs) -> Result<()> {
    tracing::debug!("executing pull command");

    let (registry, repo) = connect(&args.remote)?;
    let store = BlobStore::open(&args.store)
        .await
        .with_context(|| format!("failed to open store at {}", args.store.display()))?;

    let copier = Copier::new(Arc::new(registry), store).with_options(CopyOptions {
        max_concurrency: args.concurrency,
    });

    let cancel = CancellationToken::new();
    let watcher = tokio::spawn(cancel_on_interrupt(
        cancel.clone(),
        args.timeout.map(Duration::from_secs),
    ));
    let result = copier.copy(&repo, &args.tag, &cancel).await;
    watcher.abort();
    let report = result?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&repo.with_tag(&args.tag), &report);
    }
    Ok(())
}

/// Cancel `cancel` on Ctrl-C or once `timeout` has elapsed.
async fn cancel_on_interrupt(cancel: CancellationToken, timeout: Option<Duration>) {
    let deadline = async {
        match timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => pending().await,
        }
    };
    tokio::pin!(deadline);

    tokio::select! {
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => tracing::warn!("interrupted, cancelling copy"),
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for Ctrl-C");
                (&mut deadline).await;
                tracing::warn!("timed out, cancelling copy");
            }
        },
        _ = &mut deadline => tracing::warn!("timed out, cancelling copy"),
    }
    cancel.cancel();
}

fn print_report(reference: &str, report: &CopyReport) {
    eprintln!("Pulled: {reference} ({})", report.root.digest);
    eprintln!(
        "Descriptors: {} total, {} fetched, {} already present",
        report.descriptors_total, report.descriptors_fetched, report.descriptors_skipped
    );
    eprintln!("Fetched: {} bytes", report.bytes_fetched);
}
