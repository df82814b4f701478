//! List container records in the repository

use std::path::Path;

use berthd::persist::{FileStore, Store};
use berthd::DaemonConfig;

pub async fn list(root: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = DaemonConfig {
        root: root.to_path_buf(),
        ..Default::default()
    };
    let store = FileStore::new(config.repository());

    let mut ids: Vec<String> = match std::fs::read_dir(store.repository()) {
        Ok(entries) => entries
            .flatten()
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .collect(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(e.into()),
    };
    ids.sort();

    println!("CONTAINER ID   NAME                 STATUS      RESTART         DRIVER");

    let mut count = 0;
    for id in &ids {
        let short: String = id.chars().take(12).collect();
        match store.load(id).await {
            Ok(rec) => {
                let policy = rec.host_config.restart_policy.name.as_str();
                println!(
                    "{:<14} {:<20} {:<11} {:<15} {}",
                    short,
                    rec.name,
                    rec.state.as_str(),
                    if policy.is_empty() { "-" } else { policy },
                    rec.driver
                );
                count += 1;
            }
            Err(e) => {
                println!("{:<14} (load error: {})", short, e);
            }
        }
    }

    println!();
    println!("{} containers listed", count);

    Ok(())
}
