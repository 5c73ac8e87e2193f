use super::engine::LedgerEngine;
use super::tally::Tally;
use crate::domain::request::Request;
use crate::error::Result;
use tokio::task::JoinSet;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayReport {
    pub tally: Tally,
    /// Rows that could not be read and were skipped.
    pub skipped: usize,
}

/// Feeds a stream of requests to the engine with at most `concurrency`
/// requests in flight. With a limit of one, requests run in input order.
///
/// Unreadable rows are logged and skipped; they do not stop the replay.
pub async fn replay<I>(engine: &LedgerEngine, requests: I, concurrency: usize) -> Result<ReplayReport>
where
    I: IntoIterator<Item = Result<Request>>,
{
    let limit = concurrency.max(1);
    let mut tasks = JoinSet::new();
    let mut report = ReplayReport::default();

    for (index, request) in requests.into_iter().enumerate() {
        let request = match request {
            Ok(request) => request,
            Err(e) => {
                warn!(row = index + 1, error = %e, "skipping unreadable request");
                report.skipped += 1;
                continue;
            }
        };

        if tasks.len() >= limit
            && let Some(joined) = tasks.join_next().await
        {
            report.tally.record(&joined?);
        }
        let engine = engine.clone();
        tasks.spawn(async move { engine.process(request).await });
    }

    while let Some(joined) = tasks.join_next().await {
        report.tally.record(&joined?);
    }

    info!(
        processed = report.tally.total(),
        skipped = report.skipped,
        "replay finished"
    );
    Ok(report)
}
