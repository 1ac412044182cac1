//! Admin session listing shown to bare-owner logins

use tabled::{settings::Style, Table, Tabled};

use bw_core::naming::instance_name;
use bw_core::time::format_age;
use bw_core::{Instance, Template};

#[derive(Tabled)]
struct TemplateRow {
    #[tabled(rename = "TEMPLATE")]
    name: String,
    #[tabled(rename = "KIND")]
    kind: String,
    #[tabled(rename = "IMAGE")]
    image: String,
    #[tabled(rename = "DESCRIPTION")]
    description: String,
    #[tabled(rename = "CONNECT AS")]
    login: String,
}

#[derive(Tabled)]
struct InstanceRow {
    #[tabled(rename = "INSTANCE")]
    name: String,
    #[tabled(rename = "TEMPLATE")]
    template: String,
    #[tabled(rename = "KIND")]
    kind: String,
    #[tabled(rename = "PHASE")]
    phase: String,
    #[tabled(rename = "IDLE")]
    idle: String,
    #[tabled(rename = "CONNECT AS")]
    login: String,
}

/// Templates visible to `owner` and the instances `owner` has
pub fn render_listing(owner: &str, templates: &[Template], instances: &[Instance], now: u64) -> String {
    let mut visible: Vec<&Template> = templates.iter().filter(|t| t.visible_to(owner)).collect();
    visible.sort_by(|a, b| a.name().cmp(b.name()));

    let mut owned: Vec<&Instance> = instances.iter().filter(|i| i.owner() == owner).collect();
    owned.sort_by(|a, b| a.name().cmp(b.name()));

    let mut out = format!("burrow sessions for {}\n\n", owner);

    if visible.is_empty() {
        out.push_str("No templates available\n");
    } else {
        let rows: Vec<TemplateRow> = visible
            .iter()
            .map(|t| TemplateRow {
                name: t.name().to_string(),
                kind: t.spec.default_kind.to_string(),
                image: t.spec.image.clone(),
                description: t.spec.description.clone(),
                login: if t.spec.default_kind.policy().auto_create_on_connect {
                    format!("{}-{}", owner, t.name())
                } else {
                    "(ask an administrator)".to_string()
                },
            })
            .collect();
        out.push_str(&Table::new(rows).with(Style::rounded()).to_string());
        out.push('\n');
    }
    out.push('\n');

    if owned.is_empty() {
        out.push_str("No instances\n");
    } else {
        let rows: Vec<InstanceRow> = owned
            .iter()
            .map(|i| InstanceRow {
                name: i.name().to_string(),
                template: i.spec.template.clone().unwrap_or_else(|| "-".to_string()),
                kind: i.spec.kind.to_string(),
                phase: if i.metadata.is_deleting() {
                    format!("{} (deleting)", i.phase())
                } else {
                    i.phase().to_string()
                },
                idle: format_age(i.last_active_or_created(), now),
                login: connect_login(i),
            })
            .collect();
        out.push_str(&Table::new(rows).with(Style::rounded()).to_string());
        out.push('\n');
    }

    out
}

/// SSH login that reaches `instance`. Template-created instances are
/// reached through the template login, everything else by instance name.
pub fn connect_login(instance: &Instance) -> String {
    let owner = instance.owner();
    match &instance.spec.template {
        Some(t) if instance_name(owner, t) == instance.name() => format!("{}-{}", owner, t),
        _ => format!("{}-{}", owner, instance.name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bw_core::{InstanceSpec, Phase, SessionKind, TemplateSpec};

    #[test]
    fn test_listing_is_scoped_to_owner() {
        let templates = vec![
            Template::new(
                "web",
                TemplateSpec {
                    image: "ubuntu:24.04".into(),
                    ..Default::default()
                },
            ),
            Template::new(
                "private",
                TemplateSpec {
                    image: "alpine".into(),
                    owner: Some("bob".into()),
                    ..Default::default()
                },
            ),
        ];
        let mut mine = Instance::new(
            "42",
            InstanceSpec {
                owner: "alice".into(),
                kind: SessionKind::Persistent,
                template: Some("web".into()),
                ..Default::default()
            },
        );
        mine.status.phase = Phase::Ready;
        let theirs = Instance::new(
            "bob-web",
            InstanceSpec {
                owner: "bob".into(),
                template: Some("web".into()),
                ..Default::default()
            },
        );

        let out = render_listing("alice", &templates, &[mine, theirs], 0);
        assert!(out.contains("alice-web"));
        assert!(out.contains("alice-42"));
        assert!(!out.contains("private"));
        assert!(!out.contains("bob-web"));
    }

    #[test]
    fn test_connect_login() {
        let from_template = Instance::new(
            "alice-db",
            InstanceSpec {
                owner: "alice".into(),
                template: Some("db".into()),
                ..Default::default()
            },
        );
        assert_eq!(connect_login(&from_template), "alice-db");

        let named = Instance::new(
            "scratch",
            InstanceSpec {
                owner: "alice".into(),
                template: Some("db".into()),
                ..Default::default()
            },
        );
        assert_eq!(connect_login(&named), "alice-scratch");
    }

    #[test]
    fn test_empty_listing() {
        let out = render_listing("alice", &[], &[], 0);
        assert!(out.contains("No templates available"));
        assert!(out.contains("No instances"));
    }
}
