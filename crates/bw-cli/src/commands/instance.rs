//! Instance command implementations

use anyhow::Result;

use bw_gateway::admin::connect_login;

use crate::ipc::{CreateInstance, GatewayClient};
use crate::output::{format_instances, print_error, print_info, print_success, print_warning};

pub async fn instance_list(
    client: &mut GatewayClient,
    owner: Option<&str>,
    long: bool,
) -> Result<()> {
    let instances = client.list_instances(owner).await?;
    println!("{}", format_instances(&instances, long));
    Ok(())
}

/// Print one instance, status included, as JSON
pub async fn instance_show(client: &mut GatewayClient, name: &str) -> Result<()> {
    let instance = client.get_instance(name).await?;
    println!("{}", serde_json::to_string_pretty(&instance)?);
    Ok(())
}

/// Pre-provision an instance; persistent templates are only ever
/// created this way
pub async fn instance_create(client: &mut GatewayClient, create: CreateInstance) -> Result<()> {
    let instance = client.create_instance(create).await?;
    print_success(&format!(
        "Created {} instance {} for {}",
        instance.spec.kind,
        instance.name(),
        instance.owner()
    ));
    print_info(&format!(
        "Connect with: ssh {}@<gateway>",
        connect_login(&instance)
    ));
    Ok(())
}

/// Mark instances for deletion; the controller tears them down
pub async fn instance_delete(
    client: &mut GatewayClient,
    names: &[String],
    force: bool,
) -> Result<()> {
    if !force && names.len() > 1 {
        print_warning(&format!(
            "About to delete {} instances. Use --force to skip confirmation.",
            names.len()
        ));

        print!("Continue? [y/N] ");
        std::io::Write::flush(&mut std::io::stdout())?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            print_warning("Aborted");
            return Ok(());
        }
    }

    let mut failed = 0;
    for name in names {
        match client.delete_instance(name).await {
            Ok(()) => print_success(&format!("Deleting instance: {}", name)),
            Err(e) => {
                print_error(&format!("Failed to delete instance {}: {}", name, e));
                failed += 1;
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("Failed to delete {} instance(s)", failed);
    }
    Ok(())
}
