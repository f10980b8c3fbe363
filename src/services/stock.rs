use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use crate::errors::CheckoutError;

/// Pushes the stock movements of a freshly validated order to the inventory
/// backend. The error/canceled state ids are passed so the backend can skip
/// or reverse movements for orders parked in those states.
///
/// Runs after the checkout transaction commits; failures are logged by the
/// caller and never undo the order.
#[async_trait]
pub trait StockSynchronizer: Send + Sync {
    async fn reconcile(
        &self,
        order_id: Uuid,
        error_state_id: Uuid,
        canceled_state_id: Uuid,
    ) -> Result<(), CheckoutError>;
}

/// Default synchronizer that only records the request.
#[derive(Debug, Clone, Default)]
pub struct LoggingStockSynchronizer;

#[async_trait]
impl StockSynchronizer for LoggingStockSynchronizer {
    async fn reconcile(
        &self,
        order_id: Uuid,
        error_state_id: Uuid,
        canceled_state_id: Uuid,
    ) -> Result<(), CheckoutError> {
        info!(%order_id, %error_state_id, %canceled_state_id, "stock synchronization requested");
        Ok(())
    }
}
