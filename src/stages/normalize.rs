use super::{Outcome, Stage};
use crate::error::{LabelField, PipelineError};
use crate::record::CourseRecord;

// Catalog label -> canonical label. Tables are exhaustive for valid catalog
// data; a miss means new source data or a scraping fault upstream.

pub const TERM_LABELS: &[(&str, &str)] = &[
    ("fall semester", "Fall"),
    ("spring semester", "Spring"),
    ("fall quarter", "Fall Quarter"),
    ("spring quarter", "Spring Quarter"),
    ("summer quarter", "Summer Quarter"),
    ("winter quarter", "Winter Quarter"),
    ("full year", "Full Year"),
    ("an intensive course(spring and fall)", "Intensive: Spring & Fall"),
    ("an intensive course(spring)", "Intensive: Spring"),
    ("an intensive course(fall)", "Intensive: Fall"),
    // SSS publishes its own spellings
    ("summer", "Summer"),
    ("spring", "Spring"),
    ("spring semester and summer", "Spring"),
];

pub const SCHOOL_LABELS: &[(&str, &str)] = &[
    ("Schl of Fund Sci/Eng", "FSE"),
    ("Schl Cre Sci/Eng", "CSE"),
    ("Schl Adv Sci/Eng", "ASE"),
    ("Schl Political Sci/Econo", "PSE"),
    ("SILS", "SILS"),
    ("Schl Social Sci", "SSS"),
    ("CJL", "CJL"),
];

pub const LANG_LABELS: &[(&str, &str)] = &[("en", "EN"), ("jp", "JP"), ("others", "others")];

fn lookup(table: &[(&str, &'static str)], raw: &str) -> Option<&'static str> {
    table.iter().find(|(k, _)| *k == raw).map(|(_, v)| *v)
}

/// Rewrites one free-text field to its canonical label.
#[derive(Debug, Clone, Copy)]
pub struct LabelNormalizer {
    field: LabelField,
    table: &'static [(&'static str, &'static str)],
}

impl LabelNormalizer {
    pub fn term() -> Self {
        LabelNormalizer { field: LabelField::Term, table: TERM_LABELS }
    }

    pub fn school() -> Self {
        LabelNormalizer { field: LabelField::School, table: SCHOOL_LABELS }
    }

    pub fn lang() -> Self {
        LabelNormalizer { field: LabelField::Lang, table: LANG_LABELS }
    }

    pub fn normalize(&self, mut record: CourseRecord) -> Result<CourseRecord, PipelineError> {
        let slot = match self.field {
            LabelField::Term => &mut record.term,
            LabelField::School => &mut record.school,
            LabelField::Lang => &mut record.lang,
        };
        let canonical = lookup(self.table, slot.as_str()).ok_or_else(|| PipelineError::UnmappedLabel {
            field: self.field,
            raw: slot.clone(),
        })?;
        *slot = canonical.to_string();
        Ok(record)
    }
}

impl Stage for LabelNormalizer {
    fn name(&self) -> &'static str {
        match self.field {
            LabelField::Term => "rename_term",
            LabelField::School => "rename_school",
            LabelField::Lang => "rename_lang",
        }
    }

    fn process(&mut self, record: CourseRecord) -> Result<Outcome, PipelineError> {
        self.normalize(record).map(Outcome::Pass)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::sample;

    #[test]
    fn rewrites_each_field() {
        let r = sample("Intro to CS", "2019");
        let r = LabelNormalizer::term().normalize(r).unwrap();
        let r = LabelNormalizer::school().normalize(r).unwrap();
        let r = LabelNormalizer::lang().normalize(r).unwrap();
        assert_eq!(r.term, "Fall");
        assert_eq!(r.school, "CSE");
        assert_eq!(r.lang, "EN");
        assert_eq!(r.title, "Intro to CS");
    }

    #[test]
    fn sss_spellings() {
        for (raw, want) in [
            ("summer", "Summer"),
            ("spring", "Spring"),
            ("spring semester and summer", "Spring"),
            ("an intensive course(spring and fall)", "Intensive: Spring & Fall"),
        ] {
            let mut r = sample("Intro to CS", "2019");
            r.term = raw.to_string();
            assert_eq!(LabelNormalizer::term().normalize(r).unwrap().term, want);
        }
    }

    #[test]
    fn unmapped_label_fails_record() {
        let mut r = sample("Intro to CS", "2019");
        r.school = "Schl Art Arch".to_string();
        let err = LabelNormalizer::school().normalize(r).unwrap_err();
        match err {
            PipelineError::UnmappedLabel { field, raw } => {
                assert_eq!(field, LabelField::School);
                assert_eq!(raw, "Schl Art Arch");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn lookup_is_case_sensitive() {
        let mut r = sample("Intro to CS", "2019");
        r.lang = "EN".to_string();
        assert!(LabelNormalizer::lang().normalize(r).is_err());
    }

    #[test]
    fn self_mapped_labels_are_idempotent() {
        let mut r = sample("Intro to CS", "2019");
        r.school = "SILS".to_string();
        r.lang = "others".to_string();
        let once = LabelNormalizer::school().normalize(r).unwrap();
        let twice = LabelNormalizer::school().normalize(once.clone()).unwrap();
        assert_eq!(once, twice);
        let lang = LabelNormalizer::lang().normalize(twice).unwrap();
        assert_eq!(lang.lang, "others");
    }
}
