use std::collections::HashMap;

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use super::format::format_duration;
use crate::pipeline::{PipelineEvent, StepState};

/// One progress bar per run, advanced as steps finish.
pub struct RunProgress {
    multi: MultiProgress,
    run_bars: HashMap<String, ProgressBar>,
}

impl RunProgress {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            run_bars: HashMap::new(),
        }
    }

    pub fn handle_event(&mut self, event: &PipelineEvent) {
        match event {
            PipelineEvent::RunStarted { run_id, pipeline, total_steps } => {
                let bar = self.multi.add(ProgressBar::new(*total_steps as u64));
                if let Ok(bar_style) =
                    ProgressStyle::default_bar().template("  {bar:30.cyan/dark_gray} {pos}/{len} steps | {msg}")
                {
                    bar.set_style(bar_style.progress_chars("█▓░"));
                }
                bar.set_message(format!("{} {}", style(pipeline).bold(), style(short_id(run_id)).dim()));
                self.run_bars.insert(run_id.clone(), bar);
            }
            PipelineEvent::SandboxReady { run_id, path } => {
                if let Some(bar) = self.run_bars.get(run_id) {
                    bar.set_message(format!("workspace {}", path.display()));
                }
            }
            PipelineEvent::StepStarted { run_id, step, .. } => {
                if let Some(bar) = self.run_bars.get(run_id) {
                    bar.set_message(step.clone());
                }
            }
            PipelineEvent::StepFinished { run_id, step, state, duration_ms, cached } => {
                if let Some(bar) = self.run_bars.get(run_id) {
                    bar.inc(1);
                    let marker = match state {
                        StepState::Completed => style("✓").green(),
                        StepState::Failed => style("✗").red(),
                        _ => style("-").dim(),
                    };
                    let suffix = if *cached { " (cached)" } else { "" };
                    let _ = self.multi.println(format!(
                        "  {} {} {}{}",
                        marker,
                        step,
                        style(format_duration(*duration_ms)).dim(),
                        suffix
                    ));
                }
            }
            PipelineEvent::RunStopped { run_id, after_step } => {
                if let Some(bar) = self.run_bars.get(run_id) {
                    bar.set_message(format!("stopped after {}", after_step));
                }
            }
            PipelineEvent::RunFinished { run_id, phase, duration_ms } => {
                if let Some(bar) = self.run_bars.remove(run_id) {
                    bar.finish_with_message(format!("{} in {}", phase, format_duration(*duration_ms)));
                }
            }
            PipelineEvent::RunFailed { run_id, error } => {
                if let Some(bar) = self.run_bars.remove(run_id) {
                    bar.abandon_with_message(format!("{} {}", style("failed:").red(), error));
                } else {
                    let _ = self.multi.println(format!("  {} {}", style("✗").red(), error));
                }
            }
        }
    }
}

fn short_id(run_id: &str) -> &str {
    run_id.get(..8).unwrap_or(run_id)
}
