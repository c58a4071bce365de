//! External services the fulfillment steps call, with in-memory implementations.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{FulfillmentError, OrderLine};

/// Trait for inventory management operations.
#[async_trait]
pub trait InventoryService: Send + Sync {
    /// Reserves stock for the order lines and returns the reservation id.
    async fn reserve(&self, order_id: &str, lines: &[OrderLine])
    -> Result<String, FulfillmentError>;

    /// Releases a previously made reservation.
    async fn release(&self, reservation_id: &str) -> Result<(), FulfillmentError>;
}

/// Trait for payment processing operations.
#[async_trait]
pub trait PaymentService: Send + Sync {
    /// Charges a customer and returns the payment id.
    async fn charge(
        &self,
        order_id: &str,
        customer_id: &str,
        amount_cents: i64,
    ) -> Result<String, FulfillmentError>;

    /// Refunds a previously made payment.
    async fn refund(&self, payment_id: &str) -> Result<(), FulfillmentError>;
}

/// Trait for carrier operations.
///
/// Requesting a pickup only hands the order to the carrier; the shipment is
/// confirmed later, when the carrier reports a tracking number.
#[async_trait]
pub trait ShippingService: Send + Sync {
    /// Asks the carrier to pick up the order.
    async fn request_pickup(&self, order_id: &str) -> Result<String, FulfillmentError>;

    /// Cancels the pickup or shipment of an order.
    async fn cancel_shipment(&self, order_id: &str) -> Result<(), FulfillmentError>;
}

#[derive(Debug, Default)]
struct InventoryState {
    reservations: HashMap<String, (String, Vec<OrderLine>)>,
    next_id: u32,
    out_of_stock: bool,
}

/// In-memory inventory service.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryService {
    state: Arc<RwLock<InventoryState>>,
}

impl InMemoryInventoryService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following reservation fail with insufficient stock.
    pub async fn set_out_of_stock(&self, out_of_stock: bool) {
        self.state.write().await.out_of_stock = out_of_stock;
    }

    pub async fn reservation_count(&self) -> usize {
        self.state.read().await.reservations.len()
    }

    pub async fn has_reservation(&self, reservation_id: &str) -> bool {
        self.state
            .read()
            .await
            .reservations
            .contains_key(reservation_id)
    }
}

#[async_trait]
impl InventoryService for InMemoryInventoryService {
    async fn reserve(
        &self,
        order_id: &str,
        lines: &[OrderLine],
    ) -> Result<String, FulfillmentError> {
        let mut state = self.state.write().await;

        if state.out_of_stock {
            return Err(FulfillmentError::InsufficientStock(order_id.to_string()));
        }

        state.next_id += 1;
        let reservation_id = format!("RES-{:04}", state.next_id);
        state
            .reservations
            .insert(reservation_id.clone(), (order_id.to_string(), lines.to_vec()));

        Ok(reservation_id)
    }

    async fn release(&self, reservation_id: &str) -> Result<(), FulfillmentError> {
        self.state.write().await.reservations.remove(reservation_id);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct PaymentState {
    payments: HashMap<String, (String, i64)>,
    next_id: u32,
    decline: bool,
    unavailable_for: u32,
}

/// In-memory payment service.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentService {
    state: Arc<RwLock<PaymentState>>,
}

impl InMemoryPaymentService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following charge fail as declined.
    pub async fn set_decline(&self, decline: bool) {
        self.state.write().await.decline = decline;
    }

    /// Makes the next `calls` charges fail as unavailable.
    pub async fn set_unavailable_for(&self, calls: u32) {
        self.state.write().await.unavailable_for = calls;
    }

    pub async fn payment_count(&self) -> usize {
        self.state.read().await.payments.len()
    }

    pub async fn has_payment(&self, payment_id: &str) -> bool {
        self.state.read().await.payments.contains_key(payment_id)
    }
}

#[async_trait]
impl PaymentService for InMemoryPaymentService {
    async fn charge(
        &self,
        order_id: &str,
        _customer_id: &str,
        amount_cents: i64,
    ) -> Result<String, FulfillmentError> {
        let mut state = self.state.write().await;

        if state.unavailable_for > 0 {
            state.unavailable_for -= 1;
            return Err(FulfillmentError::Unavailable("payment gateway".to_string()));
        }
        if state.decline {
            return Err(FulfillmentError::PaymentDeclined(order_id.to_string()));
        }

        state.next_id += 1;
        let payment_id = format!("PAY-{:04}", state.next_id);
        state
            .payments
            .insert(payment_id.clone(), (order_id.to_string(), amount_cents));

        Ok(payment_id)
    }

    async fn refund(&self, payment_id: &str) -> Result<(), FulfillmentError> {
        self.state.write().await.payments.remove(payment_id);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ShippingState {
    pickups: HashMap<String, String>,
    next_id: u32,
}

/// In-memory carrier.
#[derive(Debug, Clone, Default)]
pub struct InMemoryShippingService {
    state: Arc<RwLock<ShippingState>>,
}

impl InMemoryShippingService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn pickup_count(&self) -> usize {
        self.state.read().await.pickups.len()
    }
}

#[async_trait]
impl ShippingService for InMemoryShippingService {
    async fn request_pickup(&self, order_id: &str) -> Result<String, FulfillmentError> {
        let mut state = self.state.write().await;
        state.next_id += 1;
        let pickup_id = format!("PICKUP-{:04}", state.next_id);
        state
            .pickups
            .insert(order_id.to_string(), pickup_id.clone());
        Ok(pickup_id)
    }

    async fn cancel_shipment(&self, order_id: &str) -> Result<(), FulfillmentError> {
        self.state.write().await.pickups.remove(order_id);
        Ok(())
    }
}
