use mongodb::{Client, Database};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::errors::Result;

pub async fn connect(config: &AppConfig) -> Result<Database> {
    let client = Client::with_uri_str(&config.database_url).await?;
    let db = client.database(&config.database_name);

    // The driver connects lazily, so probe the deployment up front.
    match db.list_collection_names().await {
        Ok(collections) => {
            info!(
                "Connected to database '{}' ({} collections)",
                config.database_name,
                collections.len()
            );
        }
        Err(e) => {
            warn!(
                "Database '{}' is not reachable yet: {}",
                config.database_name, e
            );
        }
    }

    Ok(db)
}
