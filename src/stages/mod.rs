pub mod dedup;
pub mod normalize;
pub mod year;

use crate::error::{PipelineError, Rejection};
use crate::record::CourseRecord;

pub use dedup::DuplicateFilter;
pub use normalize::LabelNormalizer;
pub use year::YearFilter;

/// Result of a stage that did not fail.
#[derive(Debug)]
pub enum Outcome {
    Pass(CourseRecord),
    Rejected(Rejection),
}

/// One step of the item pipeline. A `Rejected` outcome stops the record.
pub trait Stage {
    fn name(&self) -> &'static str;
    fn process(&mut self, record: CourseRecord) -> Result<Outcome, PipelineError>;
}
