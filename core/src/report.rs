//! A Markdown run notebook whose regions between `<!-- SECTION:name start/end -->` markers are
//! regenerated on every run while hand-written text outside them is preserved.

use std::{fs, path::Path};

use anyhow::{anyhow, Context, Result};

pub const DEFAULT_REPORT_TEMPLATE: &str = r"# MLP Classifier Run Notebook

<!-- SECTION:overview start -->
<!-- Describe the dataset and architecture being compared in this run directory. -->
<!-- SECTION:overview end -->

## Configuration

<!-- SECTION:configuration start -->
<!-- Populated automatically with the resolved command-line configuration. -->
<!-- SECTION:configuration end -->

## Metrics

<!-- SECTION:metrics start -->
<!-- Populated automatically with per-epoch train and validation metrics. -->
<!-- SECTION:metrics end -->

## Learning Curves

<!-- SECTION:learning-curves start -->
<!-- Accuracy and log-loss curves, when enabled. -->
<!-- SECTION:learning-curves end -->

## Confusion Matrix

<!-- SECTION:confusion-matrix start -->
<!-- Confusion matrix of the best checkpoint on the test split, when enabled. -->
<!-- SECTION:confusion-matrix end -->

## Weight Histograms

<!-- SECTION:weights start -->
<!-- Weight distributions of the best checkpoint, when enabled. -->
<!-- SECTION:weights end -->

## Sample Predictions

<!-- SECTION:samples start -->
<!-- A handful of test images with the best checkpoint's predictions. -->
<!-- SECTION:samples end -->

> Notes written outside the `<!-- SECTION:name start/end -->` markers survive reruns.
";

/// One regenerated region of the notebook.
#[derive(Clone, Debug)]
pub struct ReportSection {
    id: String,
    body: String,
}

impl ReportSection {
    pub fn new(id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            body: body.into(),
        }
    }

    fn markers(&self) -> (String, String) {
        (
            format!("<!-- SECTION:{} start -->", self.id),
            format!("<!-- SECTION:{} end -->", self.id),
        )
    }

    /// The body wrapped in its markers, with surrounding blank lines dropped.
    fn render(&self) -> String {
        let (start, end) = self.markers();
        match self.body.trim_matches('\n') {
            "" => format!("{start}\n{end}"),
            body => format!("{start}\n{body}\n{end}"),
        }
    }
}

/// Create the notebook from `template` if it does not exist yet. Returns whether it was created.
pub fn ensure_report_file(path: &Path, template: &str) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    fs::write(path, template)
        .with_context(|| format!("failed to write report template to {}", path.display()))?;
    Ok(true)
}

/// Rewrite each section of the notebook at `path` in place. A section whose markers are absent,
/// as in a notebook created from an older template, is appended under its own heading.
pub fn update_sections(path: &Path, sections: &[ReportSection]) -> Result<()> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read report at {}", path.display()))?;
    let text = sections.iter().try_fold(text, |text, section| splice_section(&text, section))?;
    fs::write(path, text)
        .with_context(|| format!("failed to write updated report to {}", path.display()))
}

fn splice_section(text: &str, section: &ReportSection) -> Result<String> {
    let (start, end) = section.markers();
    let Some((head, rest)) = text.split_once(&start) else {
        return Ok(format!(
            "{}\n\n## {}\n\n{}\n",
            text.trim_end(),
            section.id,
            section.render()
        ));
    };
    let (_, tail) = rest
        .split_once(&end)
        .ok_or_else(|| anyhow!("section `{}` has a start marker but no end marker", section.id))?;
    Ok(format!("{head}{}{tail}", section.render()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_only_the_named_region() {
        let content = "intro\n<!-- SECTION:a start -->\nold\n<!-- SECTION:a end -->\noutro\n";
        let updated = splice_section(content, &ReportSection::new("a", "\nnew\n")).unwrap();
        assert_eq!(
            updated,
            "intro\n<!-- SECTION:a start -->\nnew\n<!-- SECTION:a end -->\noutro\n"
        );
    }

    #[test]
    fn empty_content_clears_region() {
        let content = "<!-- SECTION:a start -->\nold\n<!-- SECTION:a end -->";
        let updated = splice_section(content, &ReportSection::new("a", "")).unwrap();
        assert_eq!(updated, "<!-- SECTION:a start -->\n<!-- SECTION:a end -->");
    }

    #[test]
    fn unterminated_section_is_an_error() {
        let content = "<!-- SECTION:metrics start -->\nold\n";
        let err = splice_section(content, &ReportSection::new("metrics", "x")).unwrap_err();
        assert!(err.to_string().contains("`metrics` has a start marker but no end marker"));
    }

    #[test]
    fn absent_section_is_appended_under_a_heading() {
        let updated =
            splice_section("# Notebook\n\nnotes\n\n", &ReportSection::new("samples", "img")).unwrap();
        assert_eq!(
            updated,
            "# Notebook\n\nnotes\n\n## samples\n\n<!-- SECTION:samples start -->\nimg\n<!-- SECTION:samples end -->\n"
        );

        let again = splice_section(&updated, &ReportSection::new("samples", "img2")).unwrap();
        assert!(again.contains("start -->\nimg2\n<!--"));
        assert_eq!(again.matches("## samples").count(), 1);
    }

    #[test]
    fn template_sections_update_in_place_and_keep_notes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run/report.md");
        assert!(ensure_report_file(&path, DEFAULT_REPORT_TEMPLATE).unwrap());

        let mut text = fs::read_to_string(&path).unwrap();
        text.push_str("\nmy own notes\n");
        fs::write(&path, text).unwrap();
        assert!(!ensure_report_file(&path, DEFAULT_REPORT_TEMPLATE).unwrap());

        update_sections(
            &path,
            &[
                ReportSection::new("configuration", "- Dataset: mnist"),
                ReportSection::new("confusion-matrix", "| a |"),
            ],
        )
        .unwrap();
        update_sections(&path, &[ReportSection::new("configuration", "- Dataset: fmnist")])
            .unwrap();

        let report = fs::read_to_string(&path).unwrap();
        assert!(report.contains("- Dataset: fmnist"));
        assert!(!report.contains("- Dataset: mnist"));
        assert!(report.contains("| a |"));
        assert!(report.contains("my own notes"));
    }
}
