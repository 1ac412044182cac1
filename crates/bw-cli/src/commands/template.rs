//! Template command implementations

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use bw_core::TemplateSpec;

use crate::ipc::GatewayClient;
use crate::output::{format_templates, print_error, print_success};

/// A template file as accepted by `burrow template apply`
///
/// ```toml
/// name = "web"
///
/// [spec]
/// image = "ubuntu:24.04"
/// default_kind = "ephemeral"
/// idle_timeout_secs = 1800
/// ```
#[derive(Debug, Deserialize)]
pub struct TemplateManifest {
    pub name: String,
    #[serde(default)]
    pub spec: TemplateSpec,
}

impl TemplateManifest {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read template file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse template file: {}", path.display()))
    }
}

pub async fn template_list(client: &mut GatewayClient) -> Result<()> {
    let templates = client.list_templates().await?;
    println!("{}", format_templates(&templates));
    Ok(())
}

/// Print one template as JSON
pub async fn template_show(client: &mut GatewayClient, name: &str) -> Result<()> {
    let template = client.get_template(name).await?;
    println!("{}", serde_json::to_string_pretty(&template)?);
    Ok(())
}

/// Create or update templates from files
pub async fn template_apply(client: &mut GatewayClient, files: &[impl AsRef<Path>]) -> Result<()> {
    let mut failed = 0;
    for file in files {
        let manifest = TemplateManifest::load(file.as_ref())?;
        match client.apply_template(&manifest.name, manifest.spec).await {
            Ok(template) => print_success(&format!(
                "Applied template {} ({}, {})",
                template.name(),
                template.spec.default_kind,
                template.spec.image
            )),
            Err(e) => {
                print_error(&format!("Failed to apply template {}: {}", manifest.name, e));
                failed += 1;
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("Failed to apply {} template(s)", failed);
    }
    Ok(())
}

pub async fn template_delete(client: &mut GatewayClient, names: &[String]) -> Result<()> {
    let mut failed = 0;
    for name in names {
        match client.delete_template(name).await {
            Ok(()) => print_success(&format!("Deleted template: {}", name)),
            Err(e) => {
                print_error(&format!("Failed to delete template {}: {}", name, e));
                failed += 1;
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("Failed to delete {} template(s)", failed);
    }
    Ok(())
}
