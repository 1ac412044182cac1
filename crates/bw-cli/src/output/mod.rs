//! Output formatting utilities for the CLI
//!
//! Tables for templates and instances, the status block, one-line event
//! rendering for `burrow watch`, and colored status messages.

use tabled::{
    settings::{Style, Width},
    Table, Tabled,
};

use bw_core::time::{current_time_millis, format_age};

use crate::ipc::{GatewayStatus, InstanceInfo, IpcEvent, TemplateInfo};

const DESCRIPTION_WIDTH: usize = 40;
const DETAILED_TABLE_WIDTH: usize = 120;

/// Format templates as a table, or "No templates" when there are none
pub fn format_templates(templates: &[TemplateInfo]) -> String {
    if templates.is_empty() {
        return "No templates".to_string();
    }

    #[derive(Tabled)]
    struct TemplateRow {
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "KIND")]
        kind: String,
        #[tabled(rename = "IMAGE")]
        image: String,
        #[tabled(rename = "OWNER")]
        owner: String,
        #[tabled(rename = "IDLE TIMEOUT")]
        idle_timeout: String,
        #[tabled(rename = "DESCRIPTION")]
        description: String,
    }

    let rows: Vec<TemplateRow> = templates
        .iter()
        .map(|t| TemplateRow {
            name: t.name.clone(),
            kind: t.kind.to_string(),
            image: t.image.clone(),
            owner: t.owner.clone().unwrap_or_else(|| "(all)".to_string()),
            idle_timeout: t
                .idle_timeout_secs
                .map(format_duration)
                .unwrap_or_else(|| "-".to_string()),
            description: truncate(&t.description, DESCRIPTION_WIDTH),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Format instances as a table, or "No instances" when there are none
///
/// The detailed view adds pod, volume and the status message.
pub fn format_instances(instances: &[InstanceInfo], detailed: bool) -> String {
    if instances.is_empty() {
        return "No instances".to_string();
    }

    #[derive(Tabled)]
    struct InstanceRow {
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "OWNER")]
        owner: String,
        #[tabled(rename = "TEMPLATE")]
        template: String,
        #[tabled(rename = "KIND")]
        kind: String,
        #[tabled(rename = "PHASE")]
        phase: String,
        #[tabled(rename = "AGE")]
        age: String,
        #[tabled(rename = "IDLE")]
        idle: String,
    }

    #[derive(Tabled)]
    struct InstanceRowDetailed {
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "OWNER")]
        owner: String,
        #[tabled(rename = "KIND")]
        kind: String,
        #[tabled(rename = "PHASE")]
        phase: String,
        #[tabled(rename = "POD")]
        pod: String,
        #[tabled(rename = "VOLUME")]
        volume: String,
        #[tabled(rename = "MESSAGE")]
        message: String,
    }

    let now = current_time_millis();

    if detailed {
        let rows: Vec<InstanceRowDetailed> = instances
            .iter()
            .map(|i| InstanceRowDetailed {
                name: i.name.clone(),
                owner: i.owner.clone(),
                kind: i.kind.to_string(),
                phase: phase_label(i),
                pod: i.pod.clone().unwrap_or_else(|| "-".to_string()),
                volume: i.volume.clone().unwrap_or_else(|| "-".to_string()),
                message: i.message.clone().unwrap_or_default(),
            })
            .collect();
        Table::new(rows)
            .with(Style::rounded())
            .with(Width::wrap(DETAILED_TABLE_WIDTH))
            .to_string()
    } else {
        let rows: Vec<InstanceRow> = instances
            .iter()
            .map(|i| InstanceRow {
                name: i.name.clone(),
                owner: i.owner.clone(),
                template: i.template.clone().unwrap_or_else(|| "-".to_string()),
                kind: i.kind.to_string(),
                phase: phase_label(i),
                age: format_age(i.created_at, now),
                idle: format_age(i.last_active.unwrap_or(i.created_at), now),
            })
            .collect();
        Table::new(rows).with(Style::rounded()).to_string()
    }
}

fn phase_label(instance: &InstanceInfo) -> String {
    if instance.deleting {
        format!("{} (deleting)", instance.phase)
    } else {
        instance.phase.to_string()
    }
}

/// Format gateway status for display
pub fn format_status(status: &GatewayStatus) -> String {
    let mut output = String::new();

    output.push_str("Gateway Status: Running\n");
    output.push_str(&format!("Version: {}\n", status.version));
    output.push_str(&format!("Uptime: {}\n", format_duration(status.uptime_secs)));
    output.push_str(&format!("SSH Address: {}\n", status.bind_address));
    output.push_str(&format!("Connections: {}\n", status.connection_count));
    output.push_str(&format!("Active Sessions: {}\n", status.session_count));
    output.push_str(&format!("Templates: {}\n", status.template_count));
    output.push_str(&format!("Instances: {}\n", status.instance_count));

    output
}

/// One line per change, for `burrow watch`
pub fn format_event(event: &IpcEvent) -> String {
    match event {
        IpcEvent::Changed {
            event_type,
            kind,
            name,
            phase,
            resource_version,
        } => {
            let mut line = format!("[{}] {:?} {} {}", resource_version, event_type, kind, name);
            if let Some(phase) = phase {
                line.push_str(&format!(" ({})", phase));
            }
            line
        }
    }
}

/// Format duration in human-readable form
fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    }
}

/// Truncate a string with ellipsis if too long
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message in red to stderr
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning message in yellow to stderr
pub fn print_warning(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

pub fn print_info(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use bw_core::traits::EventType;
    use bw_core::{Kind, Phase, SessionKind};

    fn instance(name: &str, deleting: bool) -> InstanceInfo {
        InstanceInfo {
            name: name.to_string(),
            owner: "alice".to_string(),
            template: Some("web".to_string()),
            kind: SessionKind::Ephemeral,
            phase: Phase::Ready,
            pod: Some(format!("{}-pod", name)),
            volume: None,
            created_at: current_time_millis(),
            last_active: None,
            message: None,
            deleting,
        }
    }

    #[test]
    fn test_empty_lists() {
        assert_eq!(format_templates(&[]), "No templates");
        assert_eq!(format_instances(&[], false), "No instances");
    }

    #[test]
    fn test_instance_table() {
        let table = format_instances(&[instance("alice-web", false)], false);
        assert!(table.contains("alice-web"));
        assert!(table.contains("Ready"));
        assert!(table.contains("PHASE"));

        let detailed = format_instances(&[instance("alice-web", true)], true);
        assert!(detailed.contains("alice-web-pod"));
        assert!(detailed.contains("(deleting)"));
    }

    #[test]
    fn test_format_event() {
        let line = format_event(&IpcEvent::Changed {
            event_type: EventType::Modified,
            kind: Kind::Instance,
            name: "alice-web".to_string(),
            phase: Some(Phase::Provisioning),
            resource_version: 42,
        });
        assert!(line.starts_with("[42] Modified"));
        assert!(line.contains("alice-web"));
        assert!(line.ends_with("(Provisioning)"));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(42), "42s");
        assert_eq!(format_duration(125), "2m 5s");
        assert_eq!(format_duration(7260), "2h 1m");
        assert_eq!(format_duration(90000), "1d 1h");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a rather long description", 10), "a rathe...");
    }
}
