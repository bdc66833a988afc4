//! The per-worker controller: one cooperative task looping
//! `batch -> sleep -> batch` over its assigned block range.

use {
    crate::{
        db::{to_i64, to_u64},
        families::{EventCounters, LogIndexer},
        runtime::IndexerRuntime,
        scanner, steal,
    },
    anyhow::{Context, Result, anyhow},
    database::checkpoints::IndexerStatus,
    ethrpc::block_range::RangeInclusive,
    std::sync::Arc,
};

#[derive(Debug)]
pub enum TickOutcome {
    /// Another tick for this worker is in flight.
    AlreadyRunning,
    /// Head tracker has caught up with the chain; nothing to scan.
    AlreadyAtTarget,
    /// The assigned range is exhausted. Contains the steal this worker
    /// pulled off before going to sleep, if any.
    Completed { stole: Option<steal::StealOutcome> },
    /// One batch was scanned.
    Scanned {
        from: u64,
        to: u64,
        events: EventCounters,
    },
}

pub struct Worker {
    runtime: Arc<IndexerRuntime>,
    indexer: Arc<dyn LogIndexer>,
    index: usize,
}

impl Worker {
    pub fn new(runtime: Arc<IndexerRuntime>, indexer: Arc<dyn LogIndexer>, index: usize) -> Self {
        Self {
            runtime,
            indexer,
            index,
        }
    }

    pub fn fleet_key(&self) -> String {
        format!("{}_{}", self.indexer.indexer_type(), self.indexer.scope())
    }

    /// Worker names encode family, scope and worker id, e.g.
    /// `unified_pool_3_w2`. The checkpoint row of that name belongs to this
    /// worker alone.
    pub fn name(&self) -> String {
        format!("{}_w{}", self.fleet_key(), self.index)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Creates the checkpoint row if missing and announces the worker to the
    /// live progress registry.
    pub async fn register(&self, range_start: u64, range_end: Option<u64>) -> Result<()> {
        let checkpoint = self
            .runtime
            .db
            .initialize_checkpoint(
                &self.name(),
                self.indexer.indexer_type(),
                &self.indexer.scope(),
                range_start,
                range_end,
            )
            .await?;
        self.runtime.progress.init_worker(
            &self.fleet_key(),
            self.index,
            to_u64(checkpoint.range_start)?,
            checkpoint.range_end.map(to_u64).transpose()?,
            to_u64(checkpoint.last_indexed_block)?,
        );
        Ok(())
    }

    /// One controller wake-up. Re-entrant safe: a concurrent call for the
    /// same worker name returns `AlreadyRunning` without side effects.
    pub async fn tick(&self) -> Result<TickOutcome> {
        let name = self.name();
        let Some(_lease) = self.runtime.leases.acquire(&name) else {
            return Ok(TickOutcome::AlreadyRunning);
        };

        match self.run_batch(&name).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                let message = format!("{err:#}");
                tracing::error!(worker = %name, error = %message, "batch failed");
                self.runtime
                    .progress
                    .mark_error(&self.fleet_key(), self.index, &message);
                // best effort; the original error is the interesting one
                if let Err(status_err) = self
                    .runtime
                    .db
                    .checkpoint_status(&name, IndexerStatus::Error, Some(&message))
                    .await
                {
                    tracing::warn!(worker = %name, ?status_err, "failed to persist batch error");
                }
                Err(err)
            }
        }
    }

    async fn run_batch(&self, name: &str) -> Result<TickOutcome> {
        let fleet = self.fleet_key();
        let checkpoint = self
            .runtime
            .db
            .checkpoint(name)
            .await?
            .ok_or_else(|| anyhow!("worker {name} has no checkpoint; launch the fleet first"))?;
        let head = self.runtime.rpc.current_block(self.indexer.chain_id()).await?;

        let range_end = checkpoint.range_end.map(to_u64).transpose()?;
        let target = range_end.unwrap_or(head).min(head);
        let last_indexed = to_u64(checkpoint.last_indexed_block)?;

        if last_indexed >= target {
            return self.finish_range(name, &fleet, range_end, last_indexed, head).await;
        }

        let from = last_indexed + 1;
        let to = (last_indexed + self.indexer.batch_size()).min(target);
        let range = RangeInclusive::try_new(from, to)
            .ok_or_else(|| anyhow!("invalid batch range [{from}, {to}]"))?;

        self.runtime
            .db
            .checkpoint_status(name, IndexerStatus::Running, None)
            .await?;
        self.runtime.progress.begin_batch(&fleet, self.index);

        let filter = self.indexer.filter().await?;
        let provider = self.runtime.rpc.provider(self.indexer.chain_id())?;
        let fetched =
            scanner::fetch_logs(&provider, &filter, range, &self.runtime.cancel).await;

        let events = self.indexer.process_logs(fetched.logs).await?;

        let Some(advance_to) = fetched.advance_to else {
            // the very first chunk failed; nothing moved
            self.runtime
                .db
                .checkpoint_status(name, IndexerStatus::Idle, None)
                .await?;
            self.runtime.progress.record_batch(
                &fleet,
                self.index,
                last_indexed,
                target,
                &events.0,
            );
            return Ok(TickOutcome::Scanned {
                from,
                to: last_indexed,
                events,
            });
        };

        let completed = range_end.is_some_and(|end| advance_to >= end);
        let status = if completed {
            IndexerStatus::Complete
        } else {
            IndexerStatus::Idle
        };
        {
            let mut ex = self.runtime.db.pool.acquire().await?;
            database::checkpoints::advance(
                &mut ex,
                name,
                to_i64(advance_to)?,
                to_i64(events.total())?,
                status,
            )
            .await
            .context("advance checkpoint")?;
        }
        self.runtime
            .progress
            .record_batch(&fleet, self.index, advance_to, target, &events.0);
        if completed {
            self.runtime.progress.mark_complete(&fleet, self.index);
        }

        tracing::debug!(
            worker = %name,
            from,
            to = advance_to,
            events = events.total(),
            failed_chunks = fetched.failed_chunks,
            "batch committed"
        );
        Ok(TickOutcome::Scanned {
            from,
            to: advance_to,
            events,
        })
    }

    /// The worker's own range is exhausted: persist the terminal status and
    /// try to take work off the busiest sibling.
    async fn finish_range(
        &self,
        name: &str,
        fleet: &str,
        range_end: Option<u64>,
        last_indexed: u64,
        head: u64,
    ) -> Result<TickOutcome> {
        let Some(end) = range_end else {
            // head tracker: caught up, but never "complete"
            return Ok(TickOutcome::AlreadyAtTarget);
        };
        if last_indexed < end {
            // bounded worker that merely caught up with a lagging chain head
            return Ok(TickOutcome::AlreadyAtTarget);
        }

        self.runtime
            .db
            .checkpoint_status(name, IndexerStatus::Complete, None)
            .await?;
        self.runtime.progress.mark_complete(fleet, self.index);

        let stole = steal::find_work_to_steal(
            &self.runtime,
            self.indexer.indexer_type(),
            &self.indexer.scope(),
            name,
            head,
        )
        .await?;
        if let Some(outcome) = &stole {
            self.runtime.progress.set_range(
                fleet,
                self.index,
                outcome.thief_range_start,
                Some(outcome.thief_range_end),
            );
            self.runtime.leases.release_reservation(&outcome.donor);
        }
        Ok(TickOutcome::Completed { stole })
    }
}
