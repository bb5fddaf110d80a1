use std::collections::HashSet;

use super::{Outcome, Stage};
use crate::error::{PipelineError, Rejection};
use crate::record::{CourseRecord, NaturalKey};

/// Drops a course whose title, instructor, school, term and first meeting slot
/// were already seen in this run. The first record for a key wins.
#[derive(Debug, Default)]
pub struct DuplicateFilter {
    seen: HashSet<NaturalKey>,
}

impl DuplicateFilter {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn seen(&self) -> usize {
        self.seen.len()
    }
}

impl Stage for DuplicateFilter {
    fn name(&self) -> &'static str {
        "duplicates"
    }

    fn process(&mut self, record: CourseRecord) -> Result<Outcome, PipelineError> {
        let key = record
            .natural_key()
            .ok_or_else(|| PipelineError::NoOccurrence {
                title: record.title.clone(),
            })?;
        if self.seen.insert(key) {
            Ok(Outcome::Pass(record))
        } else {
            Ok(Outcome::Rejected(Rejection::Duplicate {
                title: record.title,
                instructor: record.instructor,
            }))
        }
    }
}
