/// JUnit XML rendering of a [`TestSuite`]
use crate::config::types::{HarnessError, Result};
use crate::report::sanitize::{clean_attr, clean_text};
use crate::verdict::suite::{Outcome, OutcomeCounts, TestCase, TestSuite};
use chrono::SecondsFormat;
use log::info;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Default per-field cap for text written into the report
pub const DEFAULT_TEXT_CAP: usize = 10_000;

/// Attribute values are capped harder than element text.
const ATTR_CAP: usize = 1_000;

pub struct JunitReport<'a> {
    suite: &'a TestSuite,
    nested: Vec<TestSuite>,
    text_cap: usize,
}

impl<'a> JunitReport<'a> {
    pub fn new(suite: &'a TestSuite) -> Self {
        JunitReport {
            suite,
            nested: Vec::new(),
            text_cap: DEFAULT_TEXT_CAP,
        }
    }

    /// Nest another suite inside the root element.
    pub fn with_suite(mut self, suite: TestSuite) -> Self {
        self.nested.push(suite);
        self
    }

    pub fn text_cap(mut self, cap: usize) -> Self {
        self.text_cap = cap;
        self
    }

    /// Counts over the root suite and every nested suite
    pub fn totals(&self) -> OutcomeCounts {
        let mut counts = self.suite.counts();
        for nested in &self.nested {
            counts.merge(nested.counts());
        }
        counts
    }

    fn total_duration(&self) -> Duration {
        self.suite.total_duration()
            + self
                .nested
                .iter()
                .map(TestSuite::total_duration)
                .sum::<Duration>()
    }

    pub fn to_xml(&self) -> String {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        out.push_str(&suite_open(
            self.suite,
            self.totals(),
            self.total_duration(),
            "",
        ));
        for case in self.suite.cases() {
            self.render_case(&mut out, self.suite.name(), case, "  ");
        }
        for nested in &self.nested {
            out.push_str(&suite_open(
                nested,
                nested.counts(),
                nested.total_duration(),
                "  ",
            ));
            for case in nested.cases() {
                self.render_case(&mut out, nested.name(), case, "    ");
            }
            out.push_str("  </testsuite>\n");
        }
        out.push_str("</testsuite>\n");
        out
    }

    fn render_case(&self, out: &mut String, class: &str, case: &TestCase, indent: &str) {
        out.push_str(&format!(
            "{}<testcase name=\"{}\" classname=\"{}\" time=\"{:.3}\"",
            indent,
            clean_attr(case.name(), ATTR_CAP),
            clean_attr(class, ATTR_CAP),
            case.duration().as_secs_f64()
        ));

        let has_output = !case.stdout().is_empty() || !case.stderr().is_empty();
        if case.outcome() == Outcome::Success && !has_output {
            out.push_str("/>\n");
            return;
        }
        out.push_str(">\n");

        let inner = format!("{}  ", indent);
        match case.outcome() {
            Outcome::Success => {}
            Outcome::Skipped => {
                out.push_str(&format!(
                    "{}<skipped message=\"{}\"/>\n",
                    inner,
                    clean_attr(case.message(), ATTR_CAP)
                ));
            }
            Outcome::Failure | Outcome::Error => {
                let tag = if case.outcome() == Outcome::Failure {
                    "failure"
                } else {
                    "error"
                };
                out.push_str(&format!(
                    "{}<{} message=\"{}\">{}</{}>\n",
                    inner,
                    tag,
                    clean_attr(case.message(), ATTR_CAP),
                    clean_text(&diagnostic(case), self.text_cap),
                    tag
                ));
            }
        }

        if !case.stdout().is_empty() {
            out.push_str(&format!(
                "{}<system-out>{}</system-out>\n",
                inner,
                clean_text(case.stdout(), self.text_cap)
            ));
        }
        if !case.stderr().is_empty() {
            out.push_str(&format!(
                "{}<system-err>{}</system-err>\n",
                inner,
                clean_text(case.stderr(), self.text_cap)
            ));
        }
        out.push_str(&format!("{}</testcase>\n", indent));
    }

    /// Render and write the report to `path`.
    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                HarnessError::Report(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }
        fs::write(path, self.to_xml())
            .map_err(|e| HarnessError::Report(format!("cannot write {}: {}", path.display(), e)))?;
        info!("wrote report for {} tests to {}", self.totals().total(), path.display());
        Ok(())
    }
}

fn suite_open(suite: &TestSuite, counts: OutcomeCounts, time: Duration, indent: &str) -> String {
    format!(
        "{}<testsuite name=\"{}\" tests=\"{}\" failures=\"{}\" errors=\"{}\" skipped=\"{}\" time=\"{:.3}\" timestamp=\"{}\">\n",
        indent,
        clean_attr(suite.name(), ATTR_CAP),
        counts.total(),
        counts.failure,
        counts.error,
        counts.skipped,
        time.as_secs_f64(),
        suite.timestamp().to_rfc3339_opts(SecondsFormat::Secs, true)
    )
}

/// Failure text: the message followed by the check's own log
fn diagnostic(case: &TestCase) -> String {
    if case.tester_output().is_empty() {
        case.message().to_string()
    } else {
        format!("{}\n\n{}", case.message(), case.tester_output())
    }
}
