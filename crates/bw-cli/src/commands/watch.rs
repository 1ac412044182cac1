//! Watch command implementation

use anyhow::Result;

use bw_core::Kind;

use crate::ipc::GatewayClient;
use crate::output::{format_event, print_info, print_warning};

/// Print template and instance changes until Ctrl+C or the gateway goes away
pub async fn watch_command(client: &mut GatewayClient, kinds: Vec<Kind>) -> Result<()> {
    client.watch(kinds).await?;
    print_info(&format!("Watching {} (Ctrl+C to stop)", client.address()));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            event = client.next_event() => match event? {
                Some(event) => println!("{}", format_event(&event)),
                None => {
                    print_warning("Gateway closed the connection");
                    return Ok(());
                }
            },
        }
    }
}
