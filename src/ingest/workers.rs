use anyhow::{Context, Result};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc;
use std::time::Instant;
use tracing::{debug, error};

use crate::flight_plans::{ParsedRow, RawRecord};
use crate::ingest::summary::ValidationStats;
use crate::message_parser::{RowRejection, parse_record};

/// Parse results for one chunk
#[derive(Debug, Default)]
pub struct ChunkOutcome {
    pub rows: Vec<ParsedRow>,
    pub rejections: Vec<(usize, RowRejection)>,
    pub stats: ValidationStats,
}

impl ChunkOutcome {
    fn absorb(&mut self, other: ChunkOutcome) {
        self.rows.extend(other.rows);
        self.rejections.extend(other.rejections);
        self.stats.merge(&other.stats);
    }
}

/// Validate and parse a chunk of rows. Pure CPU work, no I/O.
pub fn parse_chunk(records: Vec<RawRecord>, run_stamp: &str) -> ChunkOutcome {
    let mut outcome = ChunkOutcome::default();
    for raw in records {
        let row_number = raw.row_number;
        let audit = raw.clone();
        match parse_record(raw, run_stamp) {
            Ok(row) => {
                outcome.stats.record(&audit, Ok(row.actual.is_some()));
                outcome.rows.push(row);
            }
            Err(rejection) => {
                outcome.stats.record(&audit, Err(rejection));
                outcome.rejections.push((row_number, rejection));
            }
        }
    }
    outcome
}

/// Bounded pool of parsing threads.
///
/// Each chunk runs as its own task and is isolated from panics in its siblings: a
/// panicking chunk turns into one rejection per row it held.
pub struct ParserPool {
    pool: rayon::ThreadPool,
    chunk_size: usize,
}

impl ParserPool {
    pub fn new(workers: usize, chunk_size: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("ingest-parser-{}", i))
            .build()
            .context("Failed to build parser thread pool")?;
        Ok(Self {
            pool,
            chunk_size: chunk_size.max(1),
        })
    }

    /// Parse all records, blocking until every chunk has reported back.
    ///
    /// Chunks finish in any order; accepted rows are returned in sheet order.
    pub fn parse_all(&self, records: Vec<RawRecord>, run_stamp: &str) -> ChunkOutcome {
        let start = Instant::now();
        let total = records.len();
        let (tx, rx) = mpsc::channel();

        let mut chunks = 0usize;
        let mut records = records.into_iter().peekable();
        while records.peek().is_some() {
            let chunk: Vec<RawRecord> = records.by_ref().take(self.chunk_size).collect();
            let row_numbers: Vec<usize> = chunk.iter().map(|r| r.row_number).collect();
            let chunk_index = chunks;
            chunks += 1;

            let tx = tx.clone();
            let stamp = run_stamp.to_string();
            self.pool.spawn(move || {
                let result = catch_unwind(AssertUnwindSafe(|| parse_chunk(chunk, &stamp)));
                let outcome = match result {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        error!(
                            "Parser panicked in chunk {} ({} rows); rows rejected",
                            chunk_index,
                            row_numbers.len()
                        );
                        metrics::counter!("ingest.chunk_panics_total").increment(1);
                        let mut outcome = ChunkOutcome::default();
                        for row_number in row_numbers {
                            outcome.stats.total_rows += 1;
                            outcome.stats.parsing_errors += 1;
                            outcome
                                .rejections
                                .push((row_number, RowRejection::ChunkPanicked));
                        }
                        outcome
                    }
                };
                // Receiver only goes away if the coordinator gave up on the pass
                let _ = tx.send((chunk_index, outcome));
            });
        }
        drop(tx);

        let mut merged = ChunkOutcome::default();
        for (chunk_index, outcome) in rx {
            debug!(
                "Chunk {} done: {} parsed, {} rejected",
                chunk_index,
                outcome.rows.len(),
                outcome.rejections.len()
            );
            merged.absorb(outcome);
        }

        merged.rows.sort_by_key(|row| row.row_number());
        merged.rejections.sort_by_key(|(row_number, _)| *row_number);

        metrics::histogram!("ingest.parse_pass_ms").record(start.elapsed().as_millis() as f64);
        debug!(
            "Parsed {} rows in {} chunks in {:?}",
            total,
            chunks,
            start.elapsed()
        );
        merged
    }
}
