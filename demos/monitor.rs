use std::env;

use dab_pumps::{ClientRegistry, Coordinator, EntryConfig, UpdateError, discover_installations};
use secrecy::SecretString;
use tokio::time::MissedTickBehavior;

#[tokio::main]
async fn main() -> dab_pumps::Result<()> {
    tracing_subscriber::fmt::init();

    let username = env::var("DABPUMPS_USERNAME").expect("DABPUMPS_USERNAME not set");
    let password = SecretString::from(env::var("DABPUMPS_PASSWORD").expect("DABPUMPS_PASSWORD not set"));
    let registry = ClientRegistry::new();

    let install_id = match env::args().nth(1) {
        Some(id) => id,
        None => {
            let installs = discover_installations(&registry, &username, &password)
                .await
                .map_err(|e| match e {
                    UpdateError::AuthFailed(e) | UpdateError::UpdateFailed(e) => e,
                })?;
            for install in &installs {
                println!("{}  {} ({:?})", install.id, install.name, install.role);
            }
            let Some(first) = installs.first() else {
                println!("No installations on this account.");
                return Ok(());
            };
            first.id.clone()
        }
    };

    let config = EntryConfig {
        username,
        password,
        install_id,
        install_name: String::new(),
        polling_interval: dab_pumps::DEFAULT_POLLING_INTERVAL_SECS,
    };
    let coordinator = Coordinator::from_config(&registry, &config)?;

    let mut ticker = tokio::time::interval(config.polling_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => break,
        }

        match coordinator.refresh().await {
            Ok(snapshot) => {
                println!("--- {} @ {}", snapshot.install.name, snapshot.fetched_at);
                for point in &snapshot.points {
                    let Some(status) = snapshot.status(&point.object_id) else {
                        continue;
                    };
                    println!(
                        "[{}] {} = {} {}",
                        point.serial,
                        point.name,
                        point.display(status, snapshot.fetched_at),
                        point.unit.as_deref().unwrap_or(""),
                    );
                }
            }
            Err(UpdateError::AuthFailed(e)) => {
                eprintln!("Credentials rejected: {e}");
                break;
            }
            Err(UpdateError::UpdateFailed(e)) => eprintln!("Poll error: {e}"),
        }
    }

    registry.shutdown().await;
    Ok(())
}
