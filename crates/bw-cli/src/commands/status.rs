//! Status command implementation

use anyhow::Result;

use crate::ipc::GatewayClient;
use crate::output::{format_status, print_error};

pub async fn status_command(client: &mut GatewayClient) -> Result<()> {
    match client.ping().await {
        Ok(true) => {}
        Ok(false) => anyhow::bail!("Unexpected answer from {}", client.address()),
        Err(e) => {
            print_error(&format!("Failed to reach gateway: {}", e));
            print_error("Is the gateway running? Try: burrow serve");
            return Err(e);
        }
    }

    let status = client.status().await?;
    println!("{}", format_status(&status));

    Ok(())
}
