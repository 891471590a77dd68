use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One batch of progress from a solve.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolveStatus {
    pub vertexes: Vec<Vertex>,
    pub logs: Vec<VertexLog>,
    pub warnings: Vec<VertexWarning>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    pub digest: String,
    pub name: String,
    pub started: Option<DateTime<Utc>>,
    pub completed: Option<DateTime<Utc>>,
    pub cached: bool,
    #[serde(default)]
    pub error: String,
}

impl Vertex {
    fn state(&self) -> &'static str {
        if self.cached {
            "CACHED"
        } else if self.completed.is_some() {
            "DONE"
        } else if self.started.is_some() {
            "START"
        } else {
            "NEW"
        }
    }

    fn duration_secs(&self) -> f64 {
        match (self.started, self.completed) {
            (Some(started), Some(completed)) => {
                (completed - started).num_microseconds().unwrap_or(0) as f64 / 1_000_000.0
            }
            _ => 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VertexLog {
    pub vertex: String,
    /// 1 for stdout, 2 for stderr.
    pub stream: i32,
    pub data: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VertexWarning {
    pub vertex: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusLine {
    /// Progress or warning text generated from the status.
    Text(String),
    /// Raw output produced by a build step.
    Log(Vec<u8>),
}

impl StatusLine {
    pub fn text(&self) -> String {
        match self {
            StatusLine::Text(t) => t.clone(),
            StatusLine::Log(data) => String::from_utf8_lossy(data).to_string(),
        }
    }
}

/// Turns solve progress into numbered, human readable lines.
///
/// Vertices are numbered in the order they are first seen during one solve.
#[derive(Debug, Default)]
pub struct StatusRenderer {
    numbers: HashMap<String, usize>,
}

impl StatusRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render(&mut self, status: &SolveStatus) -> Vec<StatusLine> {
        let mut lines = Vec::new();

        for warning in &status.warnings {
            lines.push(StatusLine::Text(format!("Warning: {}", warning.message)));
        }

        for vertex in &status.vertexes {
            let next = self.numbers.len() + 1;
            let number = *self.numbers.entry(vertex.digest.clone()).or_insert(next);

            let duration = vertex.duration_secs();
            let line = if duration < 0.01 {
                format!("#{} {:>6} {}\n", number, vertex.state(), vertex.name)
            } else {
                format!(
                    "#{} {:>6} {:.2}s {}\n",
                    number,
                    vertex.state(),
                    duration,
                    vertex.name
                )
            };
            lines.push(StatusLine::Text(line));

            if !vertex.error.is_empty() {
                lines.push(StatusLine::Text(format!(
                    "#{}  ERROR {}\n",
                    number, vertex.error
                )));
            }
        }

        let mut previous: Option<&VertexLog> = None;
        for log in &status.logs {
            if let Some(prev) = previous {
                if prev.vertex == log.vertex && prev.timestamp == log.timestamp {
                    continue;
                }
            }
            previous = Some(log);
            lines.push(StatusLine::Log(log.data.clone()));
        }

        lines
    }
}
