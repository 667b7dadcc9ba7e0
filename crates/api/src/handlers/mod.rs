pub mod health;
pub mod metrics;
pub mod test_runs;
pub mod work;
pub mod workers;

use crate::error::ApiError;

pub async fn not_found() -> ApiError {
    ApiError::NotFound
}
