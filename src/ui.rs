//! Interface de terminal do autoupload: spinners e saída colorida.
//!
//! Usa `indicatif` para o spinner enquanto o hospedeiro ou o orquestrador
//! trabalham e `console` para estilizar o resultado e o registro pendente.

use std::path::Path;
use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::error::UploadError;
use crate::orchestrator::RunReport;
use crate::state_machine::{ExecutionRecord, State};

/// Spinner de uma operação longa (sync, execução do hospedeiro, upload).
pub struct Progress {
    pb: ProgressBar,
    green: Style,
    red: Style,
}

impl Progress {
    pub fn start(message: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg} [{elapsed}]")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
        }
    }

    pub fn succeed(&self, message: &str) {
        self.pb.finish_and_clear();
        println!("  {} {message}", self.green.apply_to("✓"));
    }

    pub fn fail(&self, error: &UploadError) {
        self.pb.finish_and_clear();
        println!(
            "  {} {} ({})",
            self.red.apply_to("✗"),
            error,
            error.kind()
        );
    }

    /// Encerra conforme o relatório do orquestrador.
    pub fn finish(&self, report: &RunReport) {
        match (&report.error, report.final_state) {
            (Some(e), _) => self.fail(e),
            (None, State::Idle) => {
                self.pb.finish_and_clear();
                println!("  nothing to upload");
            }
            (None, state) => {
                let id = report.job.as_ref().map_or("", |j| j.content_id.as_str());
                let verb = if report.resumed { "resumed and" } else { "job" };
                self.succeed(&format!("{verb} {state}: {id}"));
            }
        }

        let dim = Style::new().dim();
        let path: Vec<String> = report
            .history
            .iter()
            .chain(std::iter::once(&report.final_state))
            .map(State::to_string)
            .collect();
        println!("    {}", dim.apply_to(path.join(" → ")));
    }
}

/// Pares rótulo/valor exibidos por `status`.
fn record_fields(record: &ExecutionRecord) -> Vec<(&'static str, String)> {
    let mut fields = vec![("written", record.written_at.to_rfc3339())];
    match record.job() {
        Ok(job) => {
            fields.push(("scene", job.scene));
            fields.push(("thumbnail", job.thumbnail));
            fields.push(("name", job.name));
            fields.push(("id", job.content_id));
            fields.push(("platform", job.platform.to_string()));
        }
        Err(e) => fields.push(("error", e.to_string())),
    }
    fields
}

/// Imprime o registro pendente (ou a ausência dele).
pub fn print_record(path: &Path, record: Option<&ExecutionRecord>) {
    let yellow = Style::new().yellow().bold();
    let green = Style::new().green();
    let dim = Style::new().dim();

    let Some(record) = record else {
        println!("{} {}", green.apply_to("no pending upload"), dim.apply_to(path.display()));
        return;
    };

    println!("{} {}", yellow.apply_to("pending upload"), dim.apply_to(path.display()));
    for (label, value) in record_fields(record) {
        println!("  {:<10} {value}", dim.apply_to(label));
    }
}

/// Registro ilegível: mostra o erro e como removê-lo.
pub fn print_corrupt_record(path: &Path, error: &UploadError) {
    let red = Style::new().red().bold();
    let dim = Style::new().dim();
    println!("{} {}", red.apply_to("corrupt pending upload"), dim.apply_to(path.display()));
    println!("  {error}");
    println!("  {}", dim.apply_to("run `autoupload clear` to discard it"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::{Job, Platform};

    #[test]
    fn record_fields_decode_job() {
        let job = Job {
            scene: "a.scene".into(),
            thumbnail: "a.png".into(),
            name: "N".into(),
            content_id: "wrld_1".into(),
            platform: Platform::Android,
            commit: None,
        };
        let fields = record_fields(&ExecutionRecord::pending(&job));
        let labels: Vec<&str> = fields.iter().map(|(l, _)| *l).collect();
        assert_eq!(labels, vec!["written", "scene", "thumbnail", "name", "id", "platform"]);
        assert_eq!(fields[4].1, "wrld_1");
        assert_eq!(fields[5].1, "android");
    }

    #[test]
    fn corrupt_record_shows_error() {
        let mut record = ExecutionRecord::pending(&Job {
            scene: "a".into(),
            thumbnail: "b".into(),
            name: "c".into(),
            content_id: "d".into(),
            platform: Platform::Pc,
            commit: None,
        });
        record.job = "only-one-field".into();
        let fields = record_fields(&record);
        assert_eq!(fields[1].0, "error");
    }
}
