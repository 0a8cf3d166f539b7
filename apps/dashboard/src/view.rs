//! Plain-text rendering of the console panels.

use shared::{
    domain::MotorId,
    recipe::{RecipeDraft, RecipeField},
    telemetry::{classify_log_line, LogTone, MachineSnapshot},
};

const BAR_WIDTH: usize = 20;

pub fn button_label(processing: bool) -> &'static str {
    if processing {
        "SYSTEM PROCESSING..."
    } else {
        "START PRODUCTION"
    }
}

pub fn progress_bar(percent: f64, width: usize) -> String {
    let filled = ((percent.clamp(0.0, 100.0) / 100.0) * width as f64).round() as usize;
    format!("[{}{}]", "#".repeat(filled), ".".repeat(width - filled))
}

pub fn render_log_line(line: &str) -> String {
    let marker = match classify_log_line(line) {
        LogTone::Section => "==",
        LogTone::Step => "->",
        LogTone::Info => "**",
        LogTone::Plain => "  ",
    };
    format!("{marker} {line}")
}

fn indicator(on: bool, on_label: &'static str, off_label: &'static str) -> &'static str {
    if on {
        on_label
    } else {
        off_label
    }
}

pub fn render_machine(snapshot: &MachineSnapshot, draft: &RecipeDraft) -> String {
    let percent = snapshot.progress_percent(draft.total_weight_grams);
    let hoppers = MotorId::HOPPERS
        .iter()
        .map(|hopper| {
            format!(
                "HOPPER {hopper} [{}]",
                indicator(snapshot.motor_active(*hopper), "OPEN", "CLOSED")
            )
        })
        .collect::<Vec<_>>()
        .join("  ");

    let mut out = String::new();
    out.push_str(&format!(
        "STATUS  {:<12} MOTOR {}\n",
        snapshot.status.as_str(),
        snapshot.active_motor
    ));
    out.push_str(&format!(
        "WEIGHT  {:.2} g / {} g  {} {:.0}%\n",
        snapshot.current_weight_grams,
        draft.total_weight_grams,
        progress_bar(percent, BAR_WIDTH),
        percent
    ));
    out.push_str(&hoppers);
    out.push('\n');
    out.push_str(&format!(
        "GRINDER [{}]  BLENDER [{}]\n",
        indicator(snapshot.motor_active(MotorId::Grinder), "ACTIVE", "IDLE"),
        indicator(snapshot.motor_active(MotorId::Blender), "SPINNING", "STOPPED"),
    ));
    out.push_str(&format!("[ {} ]", button_label(snapshot.is_processing())));
    out
}

pub fn render_recipe(draft: &RecipeDraft, locked: bool) -> String {
    let mut out = String::new();
    for field in RecipeField::ALL {
        out.push_str(&format!(
            "{:<16} {:>8}   ({})\n",
            field.label(),
            draft.display_value(field),
            field.wire_name()
        ));
    }
    out.push_str(&format!("ratio sum        {:>8}", draft.ratio_sum()));
    if locked {
        out.push_str("\n(read-only while the machine is processing)");
    }
    out
}
