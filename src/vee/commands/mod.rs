//! CLI command implementations.

mod doctor;
mod install;
mod link;
mod list;
mod uninstall;

pub use doctor::doctor;
pub use install::install;
pub use link::link;
pub use list::list;
pub use uninstall::uninstall;
