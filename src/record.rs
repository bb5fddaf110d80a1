use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PipelineError;

/// Language label that carries no useful signal; never overwrites a stored one.
pub const LANG_OTHERS: &str = "others";

/// One scheduled meeting pattern of a course.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Occurrence {
    pub day: String,
    pub start_period: i64,
    pub end_period: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// A scraped course as it flows through the pipeline.
///
/// `school`, `term` and `lang` hold raw catalog text until the normalizers run.
/// Fields the crawler emits beyond the known ones are kept in `extra` and stored
/// with the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseRecord {
    #[serde(default, skip_serializing)]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course_key: Option<String>,
    pub title: String,
    pub instructor: String,
    pub school: String,
    pub term: String,
    pub lang: String,
    pub year: String,
    pub occurrences: Vec<Occurrence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// In-run deduplication key, built from raw (pre-normalization) values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NaturalKey {
    title: String,
    instructor: String,
    school: String,
    term: String,
    day: String,
    start_period: i64,
    end_period: i64,
}

impl CourseRecord {
    /// Parse one JSON Lines entry and check the input contract.
    pub fn from_json_line(line_no: usize, line: &str) -> Result<Self, PipelineError> {
        let record: CourseRecord =
            serde_json::from_str(line).map_err(|e| PipelineError::MalformedInput {
                line: line_no,
                reason: e.to_string(),
            })?;
        record.validate(line_no)?;
        Ok(record)
    }

    pub fn validate(&self, line_no: usize) -> Result<(), PipelineError> {
        let reason = if self.title.trim().is_empty() {
            "empty title"
        } else if self.occurrences.is_empty() {
            "no occurrences"
        } else {
            return Ok(());
        };
        Err(PipelineError::MalformedInput {
            line: line_no,
            reason: reason.to_string(),
        })
    }

    pub fn first_occurrence(&self) -> Option<&Occurrence> {
        self.occurrences.first()
    }

    pub fn natural_key(&self) -> Option<NaturalKey> {
        let occ = self.first_occurrence()?;
        Some(NaturalKey {
            title: self.title.clone(),
            instructor: self.instructor.clone(),
            school: self.school.clone(),
            term: self.term.clone(),
            day: occ.day.clone(),
            start_period: occ.start_period,
            end_period: occ.end_period,
        })
    }

    /// Unique key the store indexes on. Prefers the catalog's own course id.
    pub fn store_key(&self) -> String {
        if let Some(key) = self.course_key.as_deref().filter(|k| !k.trim().is_empty()) {
            return key.to_string();
        }
        let (day, start, end) = match self.first_occurrence() {
            Some(o) => (o.day.as_str(), o.start_period, o.end_period),
            None => ("", 0, 0),
        };
        format!(
            "{}|{}|{}|{}|{}|{}|{}|{}",
            self.title, self.instructor, self.school, self.term, self.year.trim(), day, start, end
        )
    }

    pub fn to_document(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

#[cfg(test)]
pub(crate) fn sample(title: &str, year: &str) -> CourseRecord {
    CourseRecord {
        id: None,
        course_key: None,
        title: title.to_string(),
        instructor: "Smith".to_string(),
        school: "Schl Cre Sci/Eng".to_string(),
        term: "fall semester".to_string(),
        lang: "en".to_string(),
        year: year.to_string(),
        occurrences: vec![Occurrence {
            day: "Mon".to_string(),
            start_period: 1,
            end_period: 2,
            location: None,
        }],
        keywords: None,
        extra: Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_line_and_keeps_extra_fields() {
        let line = r#"{"title":"Intro to CS","instructor":"Smith","school":"Schl Cre Sci/Eng",
            "term":"fall semester","lang":"en","year":"2019",
            "occurrences":[{"day":"Mon","start_period":1,"end_period":2,"location":"63-201"}],
            "keywords":["IPSE"],"code":"FSCE01"}"#;
        let r = CourseRecord::from_json_line(1, line).unwrap();
        assert_eq!(r.title, "Intro to CS");
        assert_eq!(r.keywords.as_deref(), Some(&["IPSE".to_string()][..]));
        assert_eq!(r.extra.get("code").and_then(|v| v.as_str()), Some("FSCE01"));
        assert_eq!(r.occurrences[0].location.as_deref(), Some("63-201"));

        let doc = r.to_document().unwrap();
        assert_eq!(doc["code"], "FSCE01");
        assert!(doc.get("id").is_none());
    }

    #[test]
    fn missing_field_is_malformed() {
        let line = r#"{"title":"Intro to CS","school":"SILS","term":"spring","lang":"en","year":"2019","occurrences":[]}"#;
        let err = CourseRecord::from_json_line(7, line).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedInput { line: 7, .. }));
    }

    #[test]
    fn empty_occurrences_is_malformed() {
        let mut r = sample("Intro to CS", "2019");
        r.occurrences.clear();
        assert!(matches!(
            r.validate(3),
            Err(PipelineError::MalformedInput { reason, .. }) if reason == "no occurrences"
        ));
    }

    #[test]
    fn natural_key_ignores_fields_outside_key() {
        let a = sample("Intro to CS", "2019");
        let mut b = sample("Intro to CS", "2020");
        b.lang = "jp".to_string();
        b.keywords = Some(vec!["IPSE".to_string()]);
        b.occurrences.push(Occurrence {
            day: "Fri".to_string(),
            start_period: 5,
            end_period: 5,
            location: None,
        });
        assert_eq!(a.natural_key(), b.natural_key());

        b.occurrences[0].end_period = 3;
        assert_ne!(a.natural_key(), b.natural_key());
    }

    #[test]
    fn store_key_prefers_course_key() {
        let mut r = sample("Intro to CS", "2019");
        assert_eq!(
            r.store_key(),
            "Intro to CS|Smith|Schl Cre Sci/Eng|fall semester|2019|Mon|1|2"
        );
        r.course_key = Some("26GF0110".to_string());
        assert_eq!(r.store_key(), "26GF0110");
        r.course_key = Some("  ".to_string());
        assert!(r.store_key().starts_with("Intro to CS|"));
    }
}
