//! Login resolution
//!
//! An SSH login has the form `owner[-selector]`. A bare owner opens the admin
//! session. Otherwise the selector names either a template the owner can see
//! (create a session from it) or an instance the owner already has (attach
//! to it). Resolution is pure: it only reads the snapshot it is given.

use crate::error::ResolveError;
use crate::model::{Instance, Template};

/// Read-only view of the objects a login is resolved against
#[derive(Debug, Clone, Copy)]
pub struct Catalog<'a> {
    pub templates: &'a [Template],
    pub instances: &'a [Instance],
}

/// What a connection asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    AdminSession,
    /// Create (or join) the owner's session from the named template
    CreateFromTemplate(String),
    /// Attach to the named instance
    AttachInstance(String),
}

/// A login split into owner and intent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLogin {
    pub owner: String,
    pub intent: Intent,
}

/// Split a login into owner and optional selector
pub fn parse_login(login: &str) -> Result<(&str, Option<&str>), ResolveError> {
    let malformed = || ResolveError::MalformedLogin(login.to_string());

    if login.is_empty() || !login.is_ascii() || login.contains('@') {
        return Err(malformed());
    }
    if login.chars().any(|c| c.is_ascii_control() || c.is_ascii_whitespace()) {
        return Err(malformed());
    }

    match login.split_once('-') {
        None => Ok((login, None)),
        Some((owner, selector)) if !owner.is_empty() && !selector.is_empty() => {
            Ok((owner, Some(selector)))
        }
        Some(_) => Err(malformed()),
    }
}

/// Resolve a login against a catalog snapshot
pub fn resolve(login: &str, catalog: Catalog<'_>) -> Result<ResolvedLogin, ResolveError> {
    let (owner, selector) = parse_login(login)?;
    let Some(selector) = selector else {
        return Ok(ResolvedLogin {
            owner: owner.to_string(),
            intent: Intent::AdminSession,
        });
    };

    let template = catalog
        .templates
        .iter()
        .find(|t| t.name() == selector && t.visible_to(owner));
    let instance = catalog.instances.iter().find(|i| i.name() == selector);

    let intent = match (template, instance) {
        (Some(_), Some(inst)) if inst.owner() == owner => {
            return Err(ResolveError::AmbiguousSelector {
                selector: selector.to_string(),
            })
        }
        (Some(t), _) => Intent::CreateFromTemplate(t.name().to_string()),
        (None, Some(inst)) if inst.owner() == owner => {
            Intent::AttachInstance(inst.name().to_string())
        }
        (None, Some(_)) => {
            return Err(ResolveError::NotOwner {
                selector: selector.to_string(),
            })
        }
        (None, None) => {
            return Err(ResolveError::UnknownSelector {
                selector: selector.to_string(),
            })
        }
    };

    Ok(ResolvedLogin {
        owner: owner.to_string(),
        intent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InstanceSpec, TemplateSpec};

    fn template(name: &str) -> Template {
        Template::new(
            name,
            TemplateSpec {
                image: "ubuntu:24.04".into(),
                ..Default::default()
            },
        )
    }

    fn instance(name: &str, owner: &str) -> Instance {
        Instance::new(
            name,
            InstanceSpec {
                owner: owner.into(),
                template: Some("web".into()),
                ..Default::default()
            },
        )
    }

    fn resolve_with(
        login: &str,
        templates: &[Template],
        instances: &[Instance],
    ) -> Result<ResolvedLogin, ResolveError> {
        resolve(
            login,
            Catalog {
                templates,
                instances,
            },
        )
    }

    #[test]
    fn test_bare_owner_is_admin_session() {
        let resolved = resolve_with("alice", &[template("web")], &[]).unwrap();
        assert_eq!(resolved.owner, "alice");
        assert_eq!(resolved.intent, Intent::AdminSession);
    }

    #[test]
    fn test_template_selector_creates() {
        let resolved = resolve_with("alice-web", &[template("web")], &[]).unwrap();
        assert_eq!(resolved.intent, Intent::CreateFromTemplate("web".into()));
    }

    #[test]
    fn test_own_instance_selector_attaches() {
        let resolved =
            resolve_with("alice-42", &[template("web")], &[instance("42", "alice")]).unwrap();
        assert_eq!(resolved.intent, Intent::AttachInstance("42".into()));
    }

    #[test]
    fn test_template_and_own_instance_is_ambiguous() {
        let err = resolve_with("alice-web", &[template("web")], &[instance("web", "alice")])
            .unwrap_err();
        assert_eq!(
            err,
            ResolveError::AmbiguousSelector {
                selector: "web".into()
            }
        );
    }

    #[test]
    fn test_other_users_instance_is_not_owner() {
        let err = resolve_with("alice-42", &[], &[instance("42", "bob")]).unwrap_err();
        assert_eq!(
            err,
            ResolveError::NotOwner {
                selector: "42".into()
            }
        );
    }

    #[test]
    fn test_unknown_selector() {
        let err = resolve_with("alice-nope", &[template("web")], &[]).unwrap_err();
        assert!(matches!(err, ResolveError::UnknownSelector { .. }));
    }

    #[test]
    fn test_private_template_hidden_from_others() {
        let mut lab = template("lab");
        lab.spec.owner = Some("bob".into());

        assert!(resolve_with("bob-lab", &[lab.clone()], &[]).is_ok());
        let err = resolve_with("alice-lab", &[lab], &[]).unwrap_err();
        assert!(matches!(err, ResolveError::UnknownSelector { .. }));
    }

    #[test]
    fn test_selector_keeps_later_dashes() {
        let resolved = resolve_with(
            "alice-alice-web",
            &[],
            &[instance("alice-web", "alice")],
        )
        .unwrap();
        assert_eq!(resolved.intent, Intent::AttachInstance("alice-web".into()));
    }

    #[test]
    fn test_malformed_logins() {
        for login in ["", "-web", "alice-", "al ice", "alice@host", "alicé"] {
            assert!(
                matches!(
                    resolve_with(login, &[], &[]),
                    Err(ResolveError::MalformedLogin(_))
                ),
                "{:?} should be malformed",
                login
            );
        }
    }
}
