use std::sync::Arc;

use ark_service::ArkService;
use ark_storage::db::Db;

#[derive(Clone)]
pub struct AppState {
	pub service: Arc<ArkService>,
}
impl AppState {
	pub async fn new(config: ark_config::Config) -> color_eyre::Result<Self> {
		let db = Db::connect(&config.storage.postgres).await?;

		db.ensure_schema(config.storage.postgres.vector_dim).await?;

		Ok(Self::from_service(ArkService::new(config, db)))
	}

	pub fn from_service(service: ArkService) -> Self {
		Self { service: Arc::new(service) }
	}
}
