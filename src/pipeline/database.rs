//! Database instance scenario.

use super::{Pipeline, PipelineState};
use cloudkit::{
    CatalogKind, DatabaseInstanceSpec, DatabaseUser, Error, ResourceSpec, Result, StatusVocabulary,
};

#[derive(Debug, Clone)]
pub struct DatabaseRequest {
    pub instance: String,
    pub flavor: String,
    /// Volume size in GB.
    pub volume_gb: u32,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl Pipeline<'_> {
    /// Create an instance, then a database and a user granted on it.
    pub fn database(&self, request: &DatabaseRequest) -> Result<PipelineState> {
        if request.volume_gb == 0 {
            return Err(Error::InvalidInput("volume size must be at least 1 GB".to_string()));
        }
        let flavor = self.validator().resolve(CatalogKind::DatabaseFlavor, &request.flavor)?;

        log::info!("Creating database instance {}", request.instance);
        let instance = self.provider.create(&ResourceSpec::DatabaseInstance(DatabaseInstanceSpec {
            name: request.instance.clone(),
            flavor_id: flavor.id,
            volume_gb: request.volume_gb,
        }))?;
        let instance = self.converge_one(instance, &StatusVocabulary::BUILD)?;

        log::info!("Creating database {} on {}", request.database, instance.name);
        self.provider.create_database(&instance, &request.database)?;
        log::info!("Creating user {}", request.user);
        self.provider.create_database_user(
            &instance,
            &DatabaseUser {
                name: request.user.clone(),
                password: request.password.clone(),
                databases: vec![request.database.clone()],
            },
        )?;

        let mut state = PipelineState::default();
        state.databases.push(instance);
        Ok(state)
    }
}
