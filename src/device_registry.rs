//! Maps an opaque device api_key to its owning Device. Liveness is not
//! persisted here; it's delegated to the Connection Hub (§4.3/§4.4).

use sqlx::PgPool;

use crate::error::{GatewayError, GatewayResult};
use crate::model::Device;
use crate::store::devices;

pub struct DeviceRegistry {
    pool: PgPool,
}

impl DeviceRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn authenticate(&self, api_key: &str) -> GatewayResult<Device> {
        devices::get_by_api_key(&self.pool, api_key)
            .await
            .map_err(GatewayError::Internal)?
            .ok_or(GatewayError::Authn)
    }
}
