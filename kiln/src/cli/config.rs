use std::io::Write;

use crate::{
    config::{ConfigStore, FileConfigStore},
    Result,
};

/// Prints the stored config with the secret masked.
pub fn show(store: &FileConfigStore) -> Result<()> {
    let config = store.load().redacted();
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "# {}", store.path().display())?;
    stdout.write_all(serde_yaml::to_string(&config)?.as_bytes())?;
    Ok(())
}
