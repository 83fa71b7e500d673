use ulid::Ulid;

use crate::auth::{AuthError, hash_password};
use crate::config::Credentials;
use crate::engine::{Engine, EngineError};
use crate::model::{Role, VehicleSpec};

#[derive(Debug)]
pub enum SeedError {
    Engine(EngineError),
    Auth(AuthError),
}

impl std::fmt::Display for SeedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SeedError::Engine(e) => write!(f, "seed: {e}"),
            SeedError::Auth(e) => write!(f, "seed: {e}"),
        }
    }
}

impl std::error::Error for SeedError {}

impl From<EngineError> for SeedError {
    fn from(e: EngineError) -> Self {
        SeedError::Engine(e)
    }
}

impl From<AuthError> for SeedError {
    fn from(e: AuthError) -> Self {
        SeedError::Auth(e)
    }
}

const DEMO_FLEET: [(&str, &str, i32); 2] = [("Toyota", "Corolla", 2020), ("Ford", "Focus", 2019)];
const DEMO_ACCOUNTS: [(&str, Role); 2] = [("admin@rental.com", Role::Admin), ("user@rental.com", Role::User)];

/// Create the configured admin unless a user with that email exists.
/// Returns whether a user was created.
pub async fn ensure_admin(engine: &Engine, admin: &Credentials) -> Result<bool, SeedError> {
    if engine.find_user_by_email(&admin.email).await.is_some() {
        return Ok(false);
    }
    let hash = hash_password(admin.password.clone()).await?;
    match engine
        .create_user(Ulid::new(), &admin.email, Some(hash), Role::Admin)
        .await
    {
        Ok(info) => {
            tracing::info!(email = %info.email, "bootstrapped admin account");
            Ok(true)
        }
        // Lost a race with another writer; the account exists either way.
        Err(EngineError::DuplicateEmail(_)) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Populate an empty store with the demo fleet and the password-less demo
/// accounts. A store that already has vehicles is left alone.
pub async fn seed_demo(engine: &Engine) -> Result<bool, SeedError> {
    if !engine.list_vehicles().await.is_empty() {
        return Ok(false);
    }
    for (make, model, year) in DEMO_FLEET {
        let spec = VehicleSpec {
            make: make.into(),
            model: model.into(),
            year: Some(year),
            available: true,
        };
        engine.add_vehicle(Ulid::new(), spec).await?;
    }
    for (email, role) in DEMO_ACCOUNTS {
        match engine.create_user(Ulid::new(), email, None, role).await {
            Ok(_) | Err(EngineError::DuplicateEmail(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }
    tracing::info!(vehicles = DEMO_FLEET.len(), "seeded demo data");
    Ok(true)
}
