use std::sync::Arc;

use db::DBService;

use crate::config::Config;

/// Shared application state: the database pool plus the loaded configuration.
#[derive(Clone)]
pub struct DeploymentImpl {
    db: DBService,
    config: Arc<Config>,
}

impl DeploymentImpl {
    pub async fn new(config: Config) -> Result<Self, sqlx::Error> {
        let db = DBService::new(&config.database_url, config.db_max_connections).await?;
        Ok(Self::from_parts(db, config))
    }

    pub fn from_parts(db: DBService, config: Config) -> Self {
        Self {
            db,
            config: Arc::new(config),
        }
    }

    pub fn db(&self) -> &DBService {
        &self.db
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
