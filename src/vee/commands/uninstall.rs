//! `vee uninstall` - remove an install directory.

use vee_lib::{home::Home, Package, Requirement, VeeError};

pub fn uninstall(home: &Home, line: &str) -> Result<(), VeeError> {
    let req = Requirement::parse(line)?;
    let mut pkg = Package::new(&req, home.clone());

    pkg.resolve_existing(None)?;
    pkg.uninstall()?;

    println!("Uninstalled {}", pkg.freeze().to_line());
    Ok(())
}
