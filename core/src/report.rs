//! Markdown run notebook with machine-updated regions.
//!
//! Regions are delimited by `<!-- SECTION:<id> start -->` and
//! `<!-- SECTION:<id> end -->`; only the text between a pair is rewritten, so
//! hand-written notes elsewhere in the file survive every run.

use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::error::{OcmlError, Result};

pub const DEFAULT_NOTEBOOK_TEMPLATE: &str = r"# One-Class Baselines

<!-- SECTION:overview start -->
<!-- What this comparison is meant to show. -->
<!-- SECTION:overview end -->

## Run

<!-- SECTION:run start -->
<!-- Populated automatically with the run configuration. -->
<!-- SECTION:run end -->

## Models

<!-- SECTION:models start -->
<!-- Populated automatically with each model's hyperparameters. -->
<!-- SECTION:models end -->

## Scores

<!-- SECTION:scores start -->
<!-- Populated automatically with score summaries and separation metrics. -->
<!-- SECTION:scores end -->

## Decision Boundaries

<!-- SECTION:figures start -->
<!-- Populated automatically when contour figures are rendered. -->
<!-- SECTION:figures end -->

> Keep the `<!-- SECTION:name start/end -->` markers around any region that should be regenerated.
";

#[derive(Clone, Debug)]
pub struct ReportSection {
    id: String,
    content: String,
}

impl ReportSection {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
        }
    }

    fn markers(&self) -> (String, String) {
        (
            format!("<!-- SECTION:{} start -->", self.id),
            format!("<!-- SECTION:{} end -->", self.id),
        )
    }
}

/// A notebook file on disk.
#[derive(Clone, Debug)]
pub struct Notebook {
    path: PathBuf,
}

impl Notebook {
    /// Open `path`, writing `template` first if the file does not exist yet.
    pub fn open_or_create(path: impl Into<PathBuf>, template: &str) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| OcmlError::io("failed to create notebook directory", parent, err))?;
        }
        if !path.exists() {
            fs::write(&path, template)
                .map_err(|err| OcmlError::io("failed to write notebook template", &path, err))?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrite each section in place. Nothing is written if any marker is missing.
    pub fn update(&self, sections: &[ReportSection]) -> Result<()> {
        let original = fs::read_to_string(&self.path)
            .map_err(|err| OcmlError::io("failed to read notebook", &self.path, err))?;
        let updated = sections
            .iter()
            .try_fold(original, |content, section| splice(&content, section))?;
        fs::write(&self.path, updated)
            .map_err(|err| OcmlError::io("failed to write notebook", &self.path, err))
    }
}

fn splice(content: &str, section: &ReportSection) -> Result<String> {
    let (start_marker, end_marker) = section.markers();
    let missing = |marker: &str| OcmlError::InvalidConfig(format!("missing notebook marker: {marker}"));

    let body_start = content
        .find(&start_marker)
        .map(|idx| idx + start_marker.len())
        .ok_or_else(|| missing(&start_marker))?;
    let body_end = content[body_start..]
        .find(&end_marker)
        .map(|idx| body_start + idx)
        .ok_or_else(|| missing(&end_marker))?;

    let body = section.content.trim_matches('\n');
    let mut spliced = String::with_capacity(content.len() + body.len());
    spliced.push_str(&content[..body_start]);
    spliced.push('\n');
    if !body.is_empty() {
        spliced.push_str(body);
        spliced.push('\n');
    }
    spliced.push_str(&content[body_end..]);
    Ok(spliced)
}
