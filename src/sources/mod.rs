pub mod command;
pub mod pip;
pub mod poetry;
pub mod uv;

use crate::capabilities::Capabilities;
use crate::traits::ConfigWriter;
use crate::types::ToolTarget;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    User,
    /// Machine-wide config (`--etc`).
    System,
}

#[derive(Debug, Clone)]
pub struct WriteOptions {
    pub scope: Scope,
    pub dry_run: bool,
    /// Interpreter download mirror for uv, when enabled.
    pub python_mirror: Option<String>,
}

pub fn get_writer(
    tool: ToolTarget,
    caps: &Capabilities,
    opts: &WriteOptions,
) -> Box<dyn ConfigWriter> {
    match tool {
        ToolTarget::Pip if caps.supports_direct_config_command => {
            Box::new(command::CommandWriter::pip(opts.scope, caps, opts.dry_run))
        }
        ToolTarget::Pip => Box::new(pip::PipIniWriter::new(
            opts.scope,
            caps.is_windows,
            opts.dry_run,
        )),
        ToolTarget::Pdm => Box::new(command::CommandWriter::pdm(opts.dry_run)),
        ToolTarget::Poetry => Box::new(poetry::PoetryPluginWriter::new(
            caps.poetry_dir,
            opts.dry_run,
        )),
        ToolTarget::Uv => Box::new(uv::UvIndexWriter::new(
            caps.is_windows,
            opts.python_mirror.clone(),
            opts.dry_run,
        )),
    }
}
