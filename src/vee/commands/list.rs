//! `vee list` - list catalogued packages.

use vee_lib::{home::Home, VeeError};

pub fn list(home: &Home) -> Result<(), VeeError> {
    let catalog = home.catalog()?;
    let rows = catalog.list_packages()?;

    if rows.is_empty() {
        println!("No packages installed.");
        return Ok(());
    }

    for row in rows {
        let name = row.name.as_deref().unwrap_or("-");
        let revision = row.revision.as_deref().unwrap_or("-");
        let exists = row
            .install_path
            .as_deref()
            .map(|p| p.exists())
            .unwrap_or(false);
        let marker = if exists { " " } else { "!" };
        println!(
            "{marker} {:>4}  {:<24} {:<16} {}",
            row.id,
            name,
            revision,
            row.url.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}
