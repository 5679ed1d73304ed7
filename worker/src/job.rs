/// Job files: what the worker does on each round of a session.
use anyhow::Context;
use pipeplot_core::{ErrorReport, ReceivedTable, SESSION_COMPLETE};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// CSV dump of the first table received
    #[serde(default)]
    pub output: Option<PathBuf>,

    /// JSON log of every table received, rewritten after each round
    #[serde(default)]
    pub record: Option<PathBuf>,

    /// When false the worker never connects and idles until killed
    #[serde(default = "default_true")]
    pub connect: bool,

    #[serde(default = "default_rounds")]
    pub rounds: Vec<Round>,
}

/// The reply for one exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    #[serde(default)]
    pub code: u32,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub remedy: String,
    #[serde(default)]
    pub context: String,

    /// When false the worker hangs up instead of replying
    #[serde(default = "default_true")]
    pub reply: bool,

    /// Pause before replying
    #[serde(default)]
    pub delay_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_rounds() -> Vec<Round> {
    vec![Round::with_code(0), Round::with_code(SESSION_COMPLETE)]
}

impl Default for Job {
    fn default() -> Self {
        Self {
            output: None,
            record: None,
            connect: true,
            rounds: default_rounds(),
        }
    }
}

impl Job {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading job file {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("parsing job file {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let job: Self = toml::from_str(content)?;
        if job.connect && job.rounds.is_empty() {
            anyhow::bail!("a connecting job needs at least one round");
        }
        Ok(job)
    }
}

impl Round {
    pub fn with_code(code: u32) -> Self {
        Self {
            code,
            message: String::new(),
            remedy: String::new(),
            context: String::new(),
            reply: true,
            delay_ms: 0,
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport::with_status(self.code, &self.message, &self.remedy, &self.context)
    }
}

/// What the worker saw, for whoever launched it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Record {
    pub pid: u32,
    pub tables: Vec<ReceivedTable>,
}

impl Record {
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            tables: Vec::new(),
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("writing record {}", path.display()))
    }
}

/// Writes `table` as CSV: one header row of labels, then one row per sample.
///
/// Labels are quoted per RFC 4180 when they contain a comma, quote or line break.
pub fn write_csv(table: &ReceivedTable, path: &Path) -> anyhow::Result<()> {
    let mut out = std::io::BufWriter::new(
        std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))?,
    );

    let header: Vec<Cow<'_, str>> = table.labels.iter().map(|l| csv_field(l)).collect();
    writeln!(out, "{}", header.join(","))?;
    let columns = table.columns();
    for row in 0..table.row_count as usize {
        let cells: Vec<String> = columns.iter().map(|c| c[row].to_string()).collect();
        writeln!(out, "{}", cells.join(","))?;
    }
    out.flush()?;
    Ok(())
}

fn csv_field(field: &str) -> Cow<'_, str> {
    if field.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}
