use super::{Outcome, Stage};
use crate::error::{PipelineError, Rejection};
use crate::record::CourseRecord;

/// Courses from this academic year or earlier are dropped.
pub const MIN_EXCLUSIVE_YEAR: i32 = 2017;

#[derive(Debug)]
pub struct YearFilter {
    lower_bound: i32,
}

impl Default for YearFilter {
    fn default() -> Self {
        YearFilter {
            lower_bound: MIN_EXCLUSIVE_YEAR,
        }
    }
}

impl YearFilter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Stage for YearFilter {
    fn name(&self) -> &'static str {
        "year"
    }

    fn process(&mut self, record: CourseRecord) -> Result<Outcome, PipelineError> {
        let year: i32 = record
            .year
            .trim()
            .parse()
            .map_err(|_| PipelineError::InvalidYear {
                raw: record.year.clone(),
                title: record.title.clone(),
            })?;
        if year <= self.lower_bound {
            return Ok(Outcome::Rejected(Rejection::YearBelowThreshold {
                year,
                title: record.title,
                instructor: record.instructor,
            }));
        }
        Ok(Outcome::Pass(record))
    }
}
