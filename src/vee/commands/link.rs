//! `vee link` - link an install into a named environment.

use vee_lib::{home::Home, Environment, Package, Requirement, VeeError};

pub fn link(home: &Home, environment: &str, line: &str, force: bool) -> Result<(), VeeError> {
    home.init()?;

    let req = Requirement::parse(line)?;
    let mut pkg = Package::new(&req, home.clone());
    let mut env = Environment::new(environment, home);

    // Prefer a row already linked into this environment, then any install.
    if !pkg.resolve_existing(Some(&mut env))? {
        pkg.resolve_existing(None)?;
    }
    pkg.link(&mut env, force)?;

    println!("Linked {} into {}", pkg.freeze().to_line(), environment);
    Ok(())
}
