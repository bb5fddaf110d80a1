use std::fs::File;
use std::io::{self, BufRead, BufReader, ErrorKind};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::record::CourseRecord;

/// Catalog search filters handed to the crawler as `-a key=value` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchParams {
    pub display_lang: Option<String>,
    pub schools: Option<String>,
    pub teaching_lang: Option<String>,
    pub keyword: Option<String>,
    pub database: Option<String>,
    pub collection: Option<String>,
}

impl SearchParams {
    /// Non-empty filters only, in a stable order.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        [
            ("display_lang", &self.display_lang),
            ("schools", &self.schools),
            ("teaching_lang", &self.teaching_lang),
            ("keyword", &self.keyword),
            ("mongo_db", &self.database),
            ("mongo_col", &self.collection),
        ]
        .into_iter()
        .filter_map(|(name, value)| {
            let v = value.as_deref()?.trim();
            (!v.is_empty()).then(|| (name, v.to_string()))
        })
        .collect()
    }

    pub fn to_crawler_args(&self) -> Vec<String> {
        self.to_pairs()
            .into_iter()
            .flat_map(|(k, v)| ["-a".to_string(), format!("{}={}", k, v)])
            .collect()
    }
}

/// Course records read one per line from a crawler's JSON Lines output.
///
/// A line that is not valid UTF-8 is a malformed record. Any other read error
/// ends the stream after it is yielded once.
pub struct JsonLines<R> {
    reader: R,
    line_no: usize,
    buf: String,
    done: bool,
}

impl<R: BufRead> JsonLines<R> {
    pub fn new(reader: R) -> Self {
        JsonLines {
            reader,
            line_no: 0,
            buf: String::new(),
            done: false,
        }
    }
}

impl<R: BufRead> Iterator for JsonLines<R> {
    type Item = Result<CourseRecord, PipelineError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            self.buf.clear();
            self.line_no += 1;
            match self.reader.read_line(&mut self.buf) {
                Ok(0) => {
                    self.done = true;
                    return None;
                }
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::InvalidData => {
                    return Some(Err(PipelineError::MalformedInput {
                        line: self.line_no,
                        reason: e.to_string(),
                    }))
                }
                Err(source) => {
                    self.done = true;
                    return Some(Err(PipelineError::Input {
                        line: self.line_no - 1,
                        source,
                    }));
                }
            }
            let line = self.buf.trim();
            if line.is_empty() {
                continue;
            }
            return Some(CourseRecord::from_json_line(self.line_no, line));
        }
    }
}

/// Open a JSON Lines file, or stdin for `-`.
pub fn open_file(path: &Path) -> Result<JsonLines<Box<dyn BufRead>>> {
    let reader: Box<dyn BufRead> = if path.as_os_str() == "-" {
        Box::new(BufReader::new(io::stdin()))
    } else {
        let f = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
        Box::new(BufReader::new(f))
    };
    info!("Reading courses from {:?}", path);
    Ok(JsonLines::new(reader))
}

/// A running crawler whose stdout is a stream of course records.
pub struct CrawlerCommand {
    child: Child,
    lines: JsonLines<BufReader<ChildStdout>>,
}

impl CrawlerCommand {
    /// `command` is split on whitespace; search params are appended as `-a k=v`.
    pub fn spawn(command: &str, params: &SearchParams) -> Result<Self> {
        let mut parts = command.split_whitespace();
        let Some(program) = parts.next() else {
            bail!("Empty crawler command");
        };
        let args: Vec<String> = parts
            .map(str::to_string)
            .chain(params.to_crawler_args())
            .collect();
        debug!("Spawning crawler: {} {:?}", program, args);

        let mut child = Command::new(program)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("Failed to start crawler '{}'", program))?;
        let stdout = child
            .stdout
            .take()
            .context("Crawler stdout was not captured")?;
        info!("Crawler started (pid {})", child.id());
        Ok(CrawlerCommand {
            child,
            lines: JsonLines::new(BufReader::new(stdout)),
        })
    }

    /// Wait for the crawler after its output is drained.
    pub fn finish(mut self) -> Result<()> {
        let status = self.child.wait().context("Failed to wait for crawler")?;
        if !status.success() {
            bail!("Crawler exited with {}", status);
        }
        Ok(())
    }
}

impl Iterator for CrawlerCommand {
    type Item = Result<CourseRecord, PipelineError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.lines.next()
    }
}

impl Drop for CrawlerCommand {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            warn!("Stopping crawler before it finished");
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_and_empty_flags_contribute_nothing() {
        let p = SearchParams {
            display_lang: Some("en".into()),
            schools: Some("sils,fund_sci_eng".into()),
            teaching_lang: Some("".into()),
            keyword: Some("IPSE".into()),
            database: None,
            collection: Some("ipse".into()),
        };
        assert_eq!(
            p.to_pairs(),
            vec![
                ("display_lang", "en".to_string()),
                ("schools", "sils,fund_sci_eng".to_string()),
                ("keyword", "IPSE".to_string()),
                ("mongo_col", "ipse".to_string()),
            ]
        );
        assert_eq!(
            &p.to_crawler_args()[..2],
            &["-a".to_string(), "display_lang=en".to_string()]
        );
        assert!(SearchParams::default().to_pairs().is_empty());
    }

    #[test]
    fn reads_fixture_with_blank_and_bad_lines() {
        let records: Vec<_> = open_file(Path::new("tests/fixtures/courses.jsonl"))
            .unwrap()
            .collect();
        assert_eq!(records.len(), 5);
        assert_eq!(records[0].as_ref().unwrap().title, "Intro to CS");
        assert!(matches!(
            records[3],
            Err(PipelineError::MalformedInput { line: 5, .. })
        ));
        assert_eq!(records[4].as_ref().unwrap().year, "2015");
    }

    struct Broken;

    impl io::Read for Broken {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(ErrorKind::Other, "device gone"))
        }
    }

    #[test]
    fn failing_reader_ends_stream() {
        let mut it = JsonLines::new(BufReader::new(Broken));
        let err = it.next().unwrap().unwrap_err();
        assert!(matches!(err, PipelineError::Input { line: 0, .. }));
        assert!(!err.is_record_local());
        assert!(it.next().is_none());
        assert!(it.next().is_none());
    }

    #[test]
    fn directory_input_ends_stream() {
        // Opening a directory succeeds on Linux; reading it fails.
        let Ok(it) = open_file(Path::new("tests")) else {
            return;
        };
        let items: Vec<_> = it.take(3).collect();
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(PipelineError::Input { .. })));
    }

    #[test]
    fn invalid_utf8_skips_only_that_line() {
        let mut input = b"\xff\xfe\n".to_vec();
        input.extend_from_slice(
            b"{\"title\":\"A\",\"instructor\":\"B\",\"school\":\"SILS\",\"term\":\"spring\",\"lang\":\"en\",\"year\":\"2020\",\"occurrences\":[{\"day\":\"Tue\",\"start_period\":3,\"end_period\":3}]}\n",
        );
        let items: Vec<_> = JsonLines::new(input.as_slice()).collect();
        assert_eq!(items.len(), 2);
        assert!(matches!(items[0], Err(PipelineError::MalformedInput { line: 1, .. })));
        assert_eq!(items[1].as_ref().unwrap().title, "A");
    }

    #[test]
    fn reads_from_any_reader() {
        let input = "\n{\"title\":\"A\",\"instructor\":\"B\",\"school\":\"SILS\",\"term\":\"spring\",\"lang\":\"en\",\"year\":\"2020\",\"occurrences\":[{\"day\":\"Tue\",\"start_period\":3,\"end_period\":3}]}\n";
        let mut it = JsonLines::new(input.as_bytes());
        let r = it.next().unwrap().unwrap();
        assert_eq!(r.school, "SILS");
        assert!(it.next().is_none());
    }
}
