use tracing::{debug, error, warn};

use crate::error::{PipelineError, Rejection};
use crate::record::CourseRecord;
use crate::stages::{DuplicateFilter, LabelNormalizer, Outcome, Stage, YearFilter};
use crate::store::adapter::Persisted;
use crate::store::{DocumentStore, StoreAdapter};

/// Per-run tallies.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub received: usize,
    pub inserted: usize,
    pub merged: usize,
    pub duplicates: usize,
    pub below_year: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn print(&self) {
        println!(
            "Received {} courses: {} added, {} merged, {} duplicates, {} below year, {} failed.",
            self.received, self.inserted, self.merged, self.duplicates, self.below_year, self.failed,
        );
    }
}

/// Where a record ended up after a trip through the pipeline.
#[derive(Debug)]
pub enum Disposition {
    Stored(CourseRecord, Persisted),
    Dropped(Rejection),
}

/// Duplicate filter, year filter, the three label normalizers, then the store.
/// The order is fixed: deduplication keys on raw labels.
pub struct Pipeline<S: DocumentStore> {
    stages: Vec<Box<dyn Stage>>,
    store: StoreAdapter<S>,
}

impl<S: DocumentStore> Pipeline<S> {
    pub fn new(store: StoreAdapter<S>) -> Self {
        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(DuplicateFilter::new()),
            Box::new(YearFilter::new()),
            Box::new(LabelNormalizer::term()),
            Box::new(LabelNormalizer::school()),
            Box::new(LabelNormalizer::lang()),
        ];
        Pipeline { stages, store }
    }

    #[cfg(test)]
    pub fn store(&self) -> &StoreAdapter<S> {
        &self.store
    }

    pub fn process(&mut self, record: CourseRecord) -> Result<Disposition, PipelineError> {
        let mut record = record;
        for stage in self.stages.iter_mut() {
            match stage.process(record)? {
                Outcome::Pass(next) => record = next,
                Outcome::Rejected(reason) => {
                    warn!("[{}] {}", stage.name(), reason);
                    return Ok(Disposition::Dropped(reason));
                }
            }
        }
        let (record, persisted) = self.store.process(record)?;
        Ok(Disposition::Stored(record, persisted))
    }

    /// Push every record through, then close the store whatever happened.
    ///
    /// Record-local failures are logged and counted unless `strict` is set.
    /// Store and input stream failures end the run.
    pub fn run<I>(&mut self, records: I, strict: bool) -> Result<RunSummary, PipelineError>
    where
        I: IntoIterator<Item = Result<CourseRecord, PipelineError>>,
    {
        let mut summary = RunSummary::default();
        let processed = self.run_records(records, strict, &mut summary);
        let closed = self.store.close();
        match (processed, closed) {
            (Err(e), Err(close_err)) => {
                error!("Closing store after failed run: {}", close_err);
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Ok(()), closed) => {
                closed?;
                Ok(summary)
            }
        }
    }

    fn run_records<I>(
        &mut self,
        records: I,
        strict: bool,
        summary: &mut RunSummary,
    ) -> Result<(), PipelineError>
    where
        I: IntoIterator<Item = Result<CourseRecord, PipelineError>>,
    {
        for item in records {
            summary.received += 1;
            let outcome = item.and_then(|record| self.process(record));
            match outcome {
                Ok(Disposition::Stored(record, persisted)) => {
                    debug!("[{:?}] '{}' {:?}", record.id, record.title, persisted);
                    match persisted {
                        Persisted::Inserted => summary.inserted += 1,
                        Persisted::Merged { .. } => summary.merged += 1,
                    }
                }
                Ok(Disposition::Dropped(Rejection::Duplicate { .. })) => summary.duplicates += 1,
                Ok(Disposition::Dropped(Rejection::YearBelowThreshold { .. })) => {
                    summary.below_year += 1
                }
                Err(e) if e.is_record_local() && !strict => {
                    error!("Skipping course: {}", e);
                    summary.failed += 1;
                }
                Err(e) => {
                    summary.failed += 1;
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}
