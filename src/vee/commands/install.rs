//! `vee install` - run the pipeline for one requirement.

use log::info;
use vee_lib::{home::Home, Package, Requirement, VeeError};

pub fn install(home: &Home, line: &str, force: bool) -> Result<(), VeeError> {
    home.init()?;

    let req = Requirement::parse(line)?;
    let mut pkg = Package::new(&req, home.clone());

    if !force && pkg.resolve_existing(None)? {
        info!("found existing install");
    }

    pkg.install(force)?;

    if !pkg.dependencies.is_empty() {
        let deps: Vec<String> = pkg.dependencies.iter().map(|d| d.to_line()).collect();
        println!("Discovered dependencies (not installed automatically):");
        for dep in deps {
            println!("  {dep}");
        }
    }

    println!("Installed {}", pkg.freeze().to_line());
    Ok(())
}
