// Terminal rendering of workflow views - human, plain or JSON
use crate::abshr::{AbshrView, BridgeView, VerdictTone};
use crate::analysis::{AnalysisView, ResultView};
use crate::error::AnalysisError;
use crate::maps::{MapKind, MapOutcome};
use crate::quota::QuotaStatus;
use crate::verdict::Verdict;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Table};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io::{self, IsTerminal};
use std::path::Path;
use std::time::Duration;

/// Output mode for CLI commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Colors and symbols
    Human,
    /// Machine-readable JSON, one object per line
    Json,
    /// Plain text without colors (for pipes/logs)
    Plain,
}

impl OutputMode {
    pub fn auto() -> Self {
        if std::env::var("SEDQ_JSON").is_ok() {
            Self::Json
        } else if !io::stdout().is_terminal() {
            Self::Plain
        } else {
            Self::Human
        }
    }
}

#[derive(Serialize)]
struct Event<'a, T: Serialize> {
    event: &'a str,
    #[serde(flatten)]
    data: T,
}

pub struct OutputWriter {
    mode: OutputMode,
}

impl OutputWriter {
    pub fn new(mode: OutputMode) -> Self {
        Self { mode }
    }

    /// Spinner shown while a request is pending; hidden outside human mode
    pub fn spinner(&self, message: &str) -> ProgressBar {
        if self.mode != OutputMode::Human {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("  {spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    fn emit<T: Serialize>(&self, event: &str, data: T) {
        if let Ok(json) = serde_json::to_string(&Event { event, data }) {
            println!("{}", json);
        }
    }

    pub fn section(&self, title: &str) {
        match self.mode {
            OutputMode::Human => {
                println!();
                println!("{}", title.cyan().bold());
                println!("{}", "═".repeat(title.chars().count()).cyan());
            }
            OutputMode::Plain => {
                println!();
                println!("{}", title);
                println!("{}", "=".repeat(title.chars().count()));
            }
            OutputMode::Json => {}
        }
    }

    pub fn success(&self, message: &str) {
        match self.mode {
            OutputMode::Human => println!("  {} {}", "✓".green(), message),
            OutputMode::Plain => println!("  [OK] {}", message),
            OutputMode::Json => self.emit("success", serde_json::json!({ "message": message })),
        }
    }

    pub fn warning(&self, message: &str) {
        match self.mode {
            OutputMode::Human => println!("  {} {}", "⚠".yellow(), message),
            OutputMode::Plain => println!("  [WARN] {}", message),
            OutputMode::Json => self.emit("warning", serde_json::json!({ "message": message })),
        }
    }

    pub fn error(&self, err: &AnalysisError) {
        match self.mode {
            OutputMode::Human => eprintln!("  {} {}", "✗".red(), err),
            OutputMode::Plain => eprintln!("  [ERROR] {}", err),
            OutputMode::Json => self.emit(
                "error",
                serde_json::json!({ "kind": err.kind(), "message": err.to_string() }),
            ),
        }
    }

    pub fn quota(&self, status: QuotaStatus) {
        match self.mode {
            OutputMode::Human => {
                let label = status.label();
                let label = match status {
                    QuotaStatus::Locked => label.red(),
                    QuotaStatus::Unlimited => label.green(),
                    QuotaStatus::Remaining(_) => label.yellow(),
                };
                println!("  {}", label);
            }
            OutputMode::Plain => println!("  {}", status.label()),
            OutputMode::Json => self.emit(
                "quota",
                serde_json::json!({
                    "status": status,
                    "label": status.label(),
                    "submission_enabled": status.submission_enabled(),
                }),
            ),
        }
    }

    pub fn analysis(&self, view: &AnalysisView) {
        if self.mode == OutputMode::Json {
            self.emit("analysis", view);
            return;
        }

        if let Some(result) = &view.result {
            self.result(result);
        } else if let Some(error) = &view.error {
            self.line(&format!("Analysis failed: {}", error));
        }
        self.line(&format!(
            "Next: {}{}",
            view.submit_label,
            if view.submit_enabled { "" } else { " (locked)" }
        ));
    }

    fn result(&self, result: &ResultView) {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(vec!["Signal", "Score", "Finding"]);
        table.add_row(vec![
            "ELA".to_string(),
            format!("{:.1}%", result.ela_score),
            result.ela_message.clone(),
        ]);
        table.add_row(vec![
            "PRNU".to_string(),
            format!("{:.1}%", result.prnu_score),
            result.prnu_message.clone(),
        ]);
        table.add_row(vec![
            "AI".to_string(),
            format!("{:.1}%", result.ai_score),
            result.ai_message.clone(),
        ]);
        println!("{}", table);

        let verdict = format!("{} ({:.1}%)", result.verdict.label(), result.final_score);
        match self.mode {
            OutputMode::Human => {
                let verdict = match result.verdict {
                    Verdict::Trusted => verdict.green().bold(),
                    Verdict::Caution => verdict.yellow().bold(),
                    Verdict::Forged => verdict.red().bold(),
                };
                println!("  Final verdict: {}", verdict);
            }
            _ => println!("  Final verdict: {} [{}]", verdict, result.verdict),
        }
        if !result.has_gradcam {
            self.line("Grad-CAM map was not generated.");
        }
    }

    pub fn bridge(&self, view: &BridgeView) {
        if self.mode == OutputMode::Json {
            self.emit("abshr", view);
            return;
        }

        self.line(&view.status_message);
        if let Some(result) = &view.result {
            self.abshr_result(result);
        }
    }

    fn abshr_result(&self, view: &AbshrView) {
        match self.mode {
            OutputMode::Human => {
                let message = match view.tone {
                    VerdictTone::Clean => view.message.green().bold(),
                    VerdictTone::Caution => view.message.yellow().bold(),
                    VerdictTone::Tainted => view.message.red().bold(),
                };
                println!("  {}", message);
            }
            _ => println!("  {}", view.message),
        }
        self.line(&format!("Confidence: {}", view.confidence_label));
        if view.show_download {
            self.line(&format!("Report: {}", view.report_url));
        }
        if view.show_file_report {
            self.line("A security report can be filed (--file-report).");
        }
    }

    pub fn saved(&self, what: &str, path: &Path) {
        match self.mode {
            OutputMode::Json => self.emit(
                "saved",
                serde_json::json!({ "what": what, "path": path.display().to_string() }),
            ),
            _ => self.success(&format!("{} saved to {}", what, path.display())),
        }
    }

    pub fn maps(&self, outcomes: &[(MapKind, MapOutcome)]) {
        if self.mode == OutputMode::Json {
            let entries: Vec<_> = outcomes
                .iter()
                .map(|(kind, outcome)| serde_json::json!({ "map": kind, "result": outcome }))
                .collect();
            self.emit("maps", serde_json::json!({ "maps": entries }));
            return;
        }

        for (kind, outcome) in outcomes {
            match outcome {
                MapOutcome::Saved { path } => self.saved(kind.title(), path),
                MapOutcome::Missing { note } => self.line(note),
                MapOutcome::Invalid { reason } => self.warning(reason),
            }
        }
    }

    pub fn line(&self, message: &str) {
        match self.mode {
            OutputMode::Json => self.emit("info", serde_json::json!({ "message": message })),
            _ => println!("  {}", message),
        }
    }
}
