use std::path::PathBuf;

use anyhow::{anyhow, Result};
use cert_renewal::storage::{Db, HistoryStore, SqliteHistoryStore};

const USAGE: &str = "usage: renewal-history <data-dir> [instance-id]";

fn main() {
    cert_renewal::init_logging();
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let data_dir = args.next().map(PathBuf::from).ok_or_else(|| anyhow!(USAGE))?;
    let instance_id = args.next();
    if args.next().is_some() {
        return Err(anyhow!(USAGE));
    }

    let store = SqliteHistoryStore::initialize(Db::initialize_with_path(&data_dir)?)?;
    match instance_id {
        Some(instance_id) => print_history(&store, &instance_id),
        None => list_instances(&store),
    }
}

fn list_instances(store: &SqliteHistoryStore) -> Result<()> {
    for record in store.list_instances()? {
        let detail = match (record.status.resume_at(), record.status.failure_reason()) {
            (Some(resume_at), _) => format!(" until {}", resume_at.to_rfc3339()),
            (_, Some(reason)) => format!(": {reason}"),
            _ => String::new(),
        };
        println!(
            "{}  {:<9} {}  [{}]{}",
            record.instance_id,
            record.status.as_str(),
            record.certificate_name,
            record.dns_names.join(", "),
            detail
        );
    }
    Ok(())
}

fn print_history(store: &SqliteHistoryStore, instance_id: &str) -> Result<()> {
    if store.get_instance(instance_id)?.is_none() {
        return Err(anyhow!("instance not found: {instance_id}"));
    }
    for event in store.load_history(instance_id)? {
        println!("{}", serde_json::to_string(&event)?);
    }
    Ok(())
}
