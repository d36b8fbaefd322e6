//! Terminal output: a spinner while a job is polled and styled summaries of
//! closings, incidence groups and conversations.

use std::collections::BTreeSet;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use payclose::incidence::{
    AggregatedView, ConversationState, GroupOrder, Incidence, Priority, Resolution,
};
use payclose::jobs::{JobOutcome, OperationKey};
use payclose::lifecycle::{Closing, SectionId, SectionStates, Trigger};

/// Spinner shown while one backend job is polled.
pub struct JobProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl JobProgress {
    pub fn start(operation: &OperationKey) -> Self {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) =
            ProgressStyle::default_spinner().template("{spinner:.cyan} {msg} [{elapsed}]")
        {
            pb.set_style(style);
        }
        pb.set_message(format!("waiting for {operation}"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    pub fn complete(&self, outcome: &JobOutcome) {
        self.pb.finish_and_clear();
        match outcome {
            JobOutcome::Succeeded { .. } => {
                println!("  {} Job succeeded", self.green.apply_to("✓"));
            }
            JobOutcome::Failed { detail } => {
                println!(
                    "  {} Job failed: {}",
                    self.red.apply_to("✗"),
                    detail.as_deref().unwrap_or("no detail")
                );
            }
            JobOutcome::TimedOut { elapsed_ms } => {
                println!(
                    "  {} Job still pending after {elapsed_ms}ms, gave up",
                    self.yellow.apply_to("⏱")
                );
            }
        }
    }
}

fn priority_style(priority: Priority) -> Style {
    match priority {
        Priority::Critical => Style::new().red().bold(),
        Priority::High => Style::new().red(),
        Priority::Medium => Style::new().yellow(),
        Priority::Low => Style::new().green(),
    }
}

fn state_style(state: ConversationState) -> Style {
    match state {
        ConversationState::Resolved => Style::new().green(),
        ConversationState::PendingDisappearanceConfirmation => Style::new().magenta(),
        _ => Style::new().yellow(),
    }
}

pub fn print_closing(closing: &Closing, sections: &SectionStates, unlocked: &BTreeSet<SectionId>) {
    let bold = Style::new().bold();
    println!(
        "{} {} / {}  {}",
        bold.apply_to("Closing"),
        closing.id,
        closing.period,
        Style::new().cyan().apply_to(closing.status())
    );
    let unlocked: Vec<_> = unlocked.iter().map(ToString::to_string).collect();
    println!(
        "  unlocked: {}",
        if unlocked.is_empty() {
            "none".to_string()
        } else {
            unlocked.join(", ")
        }
    );
    for section in SectionId::UPLOADS {
        for (item, status) in sections.items(section) {
            println!("  {section}: {item} {status:?}");
        }
    }
    if let Some(tally) = sections.incidences {
        println!("  incidences: {}/{} resolved", tally.resolved, tally.actionable);
    }
    for record in closing.history() {
        println!(
            "  {} {} → {} ({})",
            Style::new().dim().apply_to(record.at.format("%Y-%m-%d %H:%M:%S")),
            record.from,
            record.to,
            record.trigger
        );
    }
}

pub fn print_triggers(triggers: &[Trigger]) {
    let yellow = Style::new().yellow();
    for trigger in triggers {
        println!("  {} {trigger}", yellow.apply_to("→"));
    }
}

pub fn print_view(view: &AggregatedView, order: GroupOrder) {
    let counts = &view.priority_counts;
    println!(
        "{} critical {}  high {}  medium {}  low {}",
        Style::new().bold().apply_to("Priorities:"),
        counts.critical,
        counts.high,
        counts.medium,
        counts.low
    );
    for group in view.sorted(order) {
        let style = priority_style(group.priority);
        println!(
            "  {} {}  {} → {} ({}%) {}/{} resolved",
            style.apply_to(format!("{:<8}", group.priority.to_string())),
            group.key,
            group.summary.prior,
            group.summary.current,
            group.summary.delta_pct.round_dp(2),
            group.resolved_children(),
            group.children.len()
        );
        if group.has_divergent_sources()
            && let Some(synth) = &group.synthesized
        {
            println!(
                "            {} individual records sum to {} → {}",
                Style::new().dim().apply_to("note:"),
                synth.prior,
                synth.current
            );
        }
        for child in &group.children {
            print_incidence_line(child);
        }
    }
    if !view.legacy.is_empty() {
        println!("{}", Style::new().bold().apply_to("Legacy:"));
        for incidence in &view.legacy {
            print_incidence_line(incidence);
        }
    }
    if !view.informational.is_empty() {
        println!("{}", Style::new().bold().apply_to("Informational:"));
        for incidence in &view.informational {
            println!("    {} {}", incidence.id, incidence.concept_label);
        }
    }
}

fn print_incidence_line(incidence: &Incidence) {
    let state = incidence.state();
    let variation = incidence
        .variation_pct()
        .map(|pct| format!("{}%", pct.round_dp(2)))
        .unwrap_or_else(|_| "out of range".to_string());
    println!(
        "    {} {} {} ({variation}) {}",
        incidence.id,
        incidence.employee_id.as_deref().unwrap_or("-"),
        incidence.current_amount,
        state_style(state).apply_to(state)
    );
}

pub fn print_history(incidence_id: &str, resolutions: &[Resolution], state: ConversationState) {
    println!(
        "{} {incidence_id}  {}",
        Style::new().bold().apply_to("Incidence"),
        state_style(state).apply_to(state)
    );
    for resolution in resolutions {
        let attachment = resolution
            .attachment
            .as_ref()
            .map(|a| format!(" [{}]", a.file_name))
            .unwrap_or_default();
        println!(
            "  {} {:<10} {:<13} {}{attachment}",
            Style::new().dim().apply_to(resolution.created_at.format("%Y-%m-%d %H:%M")),
            resolution.author.to_string(),
            resolution.kind.to_string(),
            resolution.comment
        );
    }
}
