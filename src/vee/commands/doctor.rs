//! `vee doctor` - self-check.

use std::process::Command;
use vee_lib::{home::Home, VeeError};

pub fn doctor(home: &Home, ping: bool) -> Result<(), VeeError> {
    if ping {
        println!("pong");
        return Ok(());
    }

    println!("Home: {}", home.root().display());

    match home.catalog() {
        Ok(catalog) => println!("Catalog: {} packages", catalog.package_count()?),
        Err(e) => println!("Catalog: unavailable ({e})"),
    }

    for tool in ["git", "python", "patchelf"] {
        let found = Command::new(tool)
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false);
        println!(
            "{}: {}",
            tool,
            if found { "ok" } else { "not found" }
        );
    }

    println!("OK");
    Ok(())
}
