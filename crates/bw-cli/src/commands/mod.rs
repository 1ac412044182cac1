//! CLI command implementations

mod config;
mod instance;
mod serve;
mod status;
mod template;
mod watch;

pub use config::{
    config_init, config_path, config_show, load_effective_config, resolve_config_path,
};
pub use instance::{instance_create, instance_delete, instance_list, instance_show};
pub use serve::{serve_command, ServeOverrides};
pub use status::status_command;
pub use template::{
    template_apply, template_delete, template_list, template_show, TemplateManifest,
};
pub use watch::watch_command;
