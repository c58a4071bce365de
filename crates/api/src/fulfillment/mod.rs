//! Order fulfillment workflow served by the API.
//!
//! `reserve_inventory -> process_payment -> create_shipment`
//!
//! The shipment step hands the order to the carrier and suspends; the
//! carrier's confirmation arrives later as a step success signal carrying
//! the tracking number. A declined payment or a cancelled run releases the
//! reservation and refunds the charge.

pub mod services;

use std::sync::Arc;

use orchestrator::{
    FnValidator, OrchestratorError, Retention, StepError, StepResponse, ValidationIssue,
    WorkflowDefinition, WorkflowOptions, step_fn,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use workflow::{Backoff, StepDefinition, WorkflowBuilder};

pub use services::{
    InMemoryInventoryService, InMemoryPaymentService, InMemoryShippingService, InventoryService,
    PaymentService, ShippingService,
};

pub const WORKFLOW_ID: &str = "order-fulfillment";

pub const RESERVE_INVENTORY: &str = "reserve_inventory";
pub const PROCESS_PAYMENT: &str = "process_payment";
pub const CREATE_SHIPMENT: &str = "create_shipment";

/// How long the carrier has to confirm a pickup.
const SHIPMENT_TIMEOUT_SECONDS: u64 = 48 * 60 * 60;

/// Errors raised by the fulfillment services.
#[derive(Debug, Error)]
pub enum FulfillmentError {
    #[error("Insufficient stock for order {0}")]
    InsufficientStock(String),

    #[error("Payment declined for order {0}")]
    PaymentDeclined(String),

    #[error("Order total of {0} does not fit in i64 cents")]
    TotalOverflow(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Fulfillment services are not registered")]
    ServicesMissing,
}

impl From<FulfillmentError> for StepError {
    fn from(err: FulfillmentError) -> Self {
        match err {
            FulfillmentError::Unavailable(_) => StepError::new(err.to_string()),
            _ => StepError::permanent(err.to_string()),
        }
    }
}

/// The services the fulfillment steps resolve from the execution context.
#[derive(Clone)]
pub struct FulfillmentServices {
    pub inventory: Arc<dyn InventoryService>,
    pub payment: Arc<dyn PaymentService>,
    pub shipping: Arc<dyn ShippingService>,
}

impl FulfillmentServices {
    pub fn new(
        inventory: impl InventoryService + 'static,
        payment: impl PaymentService + 'static,
        shipping: impl ShippingService + 'static,
    ) -> Self {
        Self {
            inventory: Arc::new(inventory),
            payment: Arc::new(payment),
            shipping: Arc::new(shipping),
        }
    }
}

/// Workflow input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub order_id: String,
    pub customer_id: String,
    pub items: Vec<OrderLine>,
}

impl OrderRequest {
    /// Sum of all line totals, or `None` on overflow.
    pub fn total_cents(&self) -> Option<i64> {
        self.items
            .iter()
            .try_fold(0i64, |total, line| total.checked_add(line.total_cents()?))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

impl OrderLine {
    pub fn total_cents(&self) -> Option<i64> {
        i64::from(self.quantity).checked_mul(self.unit_price_cents)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub reservation_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub payment_id: String,
    pub amount_cents: i64,
}

fn validate_order(raw: Value) -> Result<Value, Vec<ValidationIssue>> {
    let order: OrderRequest = serde_json::from_value(raw.clone())
        .map_err(|e| vec![ValidationIssue::new("", e.to_string())])?;

    let mut issues = Vec::new();
    if order.order_id.is_empty() {
        issues.push(ValidationIssue::new("/order_id", "must not be empty"));
    }
    if order.items.is_empty() {
        issues.push(ValidationIssue::new("/items", "must contain at least one line"));
    }
    for (i, line) in order.items.iter().enumerate() {
        if line.quantity == 0 {
            issues.push(ValidationIssue::new(
                format!("/items/{i}/quantity"),
                "must be positive",
            ));
        }
        if line.unit_price_cents < 0 {
            issues.push(ValidationIssue::new(
                format!("/items/{i}/unit_price_cents"),
                "must not be negative",
            ));
        }
        if line.total_cents().is_none() {
            issues.push(ValidationIssue::new(format!("/items/{i}"), "line total overflows"));
        }
    }
    let lines_fit = order.items.iter().all(|line| line.total_cents().is_some());
    if lines_fit && order.total_cents().is_none() {
        issues.push(ValidationIssue::new("/items", "order total overflows"));
    }

    if issues.is_empty() { Ok(raw) } else { Err(issues) }
}

fn resolve_services(
    ctx: &orchestrator::ExecutionContext,
) -> Result<Arc<FulfillmentServices>, StepError> {
    ctx.resolve::<FulfillmentServices>()
        .ok_or_else(|| FulfillmentError::ServicesMissing.into())
}

/// Builds the order fulfillment workflow definition.
pub fn definition() -> Result<WorkflowDefinition, OrchestratorError> {
    let graph = WorkflowBuilder::new()
        .add_step(
            StepDefinition::new(RESERVE_INVENTORY)
                .max_retries(2)
                .retry_interval_seconds(1),
        )
        .then(
            StepDefinition::new(PROCESS_PAYMENT)
                .max_retries(3)
                .retry_interval_seconds(1)
                .backoff(Backoff::Exponential {
                    max_interval_seconds: Some(30),
                }),
        )
        .then(
            StepDefinition::new(CREATE_SHIPMENT)
                .async_step()
                .timeout_seconds(SHIPMENT_TIMEOUT_SECONDS),
        )
        .build()?;

    let reserve = step_fn(|input, ctx| async move {
        let order: OrderRequest = input.input()?;
        let reservation_id = resolve_services(&ctx)?
            .inventory
            .reserve(&order.order_id, &order.items)
            .await?;
        tracing::info!(order_id = %order.order_id, %reservation_id, "inventory reserved");
        StepResponse::completed(&Reservation { reservation_id })
    })
    .with_compensation(|_, output, ctx| async move {
        let reservation: Reservation = serde_json::from_value(output)?;
        resolve_services(&ctx)?
            .inventory
            .release(&reservation.reservation_id)
            .await?;
        tracing::info!(reservation_id = %reservation.reservation_id, "inventory released");
        Ok(())
    });

    let pay = step_fn(|input, ctx| async move {
        let order: OrderRequest = input.input()?;
        let amount_cents = order
            .total_cents()
            .ok_or_else(|| FulfillmentError::TotalOverflow(order.order_id.clone()))?;
        let payment_id = resolve_services(&ctx)?
            .payment
            .charge(&order.order_id, &order.customer_id, amount_cents)
            .await?;
        tracing::info!(order_id = %order.order_id, %payment_id, amount_cents, "payment charged");
        StepResponse::completed(&Payment {
            payment_id,
            amount_cents,
        })
    })
    .with_compensation(|_, output, ctx| async move {
        let payment: Payment = serde_json::from_value(output)?;
        resolve_services(&ctx)?.payment.refund(&payment.payment_id).await?;
        tracing::info!(payment_id = %payment.payment_id, "payment refunded");
        Ok(())
    });

    let ship = step_fn(|input, ctx| async move {
        let order: OrderRequest = input.input()?;
        let pickup_id = resolve_services(&ctx)?
            .shipping
            .request_pickup(&order.order_id)
            .await?;
        tracing::info!(order_id = %order.order_id, %pickup_id, "pickup requested");
        Ok(StepResponse::Suspended)
    })
    .with_compensation(|input, _, ctx| async move {
        let order: OrderRequest = input.input()?;
        resolve_services(&ctx)?
            .shipping
            .cancel_shipment(&order.order_id)
            .await?;
        Ok(())
    });

    Ok(WorkflowDefinition::new(WORKFLOW_ID, graph)
        .step(RESERVE_INVENTORY, reserve)
        .step(PROCESS_PAYMENT, pay)
        .step(CREATE_SHIPMENT, ship)
        .options(
            WorkflowOptions::new()
                .retention(Retention::Keep)
                .input_validator(Arc::new(FnValidator(validate_order))),
        ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_total_cents() {
        let order = OrderRequest {
            order_id: "order-1".to_string(),
            customer_id: "cust-1".to_string(),
            items: vec![
                OrderLine {
                    product_id: "SKU-001".to_string(),
                    quantity: 2,
                    unit_price_cents: 1500,
                },
                OrderLine {
                    product_id: "SKU-002".to_string(),
                    quantity: 1,
                    unit_price_cents: 999,
                },
            ],
        };
        assert_eq!(order.total_cents(), Some(3999));
    }

    #[test]
    fn test_total_cents_overflow() {
        let line = OrderLine {
            product_id: "SKU-001".to_string(),
            quantity: u32::MAX,
            unit_price_cents: i64::MAX,
        };
        assert_eq!(line.total_cents(), None);

        let order = OrderRequest {
            order_id: "order-1".to_string(),
            customer_id: "cust-1".to_string(),
            items: vec![line],
        };
        assert_eq!(order.total_cents(), None);
    }

    #[test]
    fn test_validate_order_rejects_overflowing_totals() {
        let issues = validate_order(json!({
            "order_id": "order-1",
            "customer_id": "cust-1",
            "items": [{"product_id": "SKU-001", "quantity": u32::MAX, "unit_price_cents": i64::MAX}]
        }))
        .unwrap_err();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, "/items/0");

        // Each line fits but the sum does not
        let issues = validate_order(json!({
            "order_id": "order-1",
            "customer_id": "cust-1",
            "items": [
                {"product_id": "SKU-001", "quantity": 1, "unit_price_cents": i64::MAX},
                {"product_id": "SKU-002", "quantity": 1, "unit_price_cents": 1}
            ]
        }))
        .unwrap_err();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, "/items");
    }

    #[test]
    fn test_validate_order_reports_every_issue() {
        let issues = validate_order(json!({
            "order_id": "",
            "customer_id": "cust-1",
            "items": [{"product_id": "SKU-001", "quantity": 0, "unit_price_cents": -1}]
        }))
        .unwrap_err();

        let paths: Vec<_> = issues.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "/order_id",
                "/items/0/quantity",
                "/items/0/unit_price_cents"
            ]
        );
    }

    #[test]
    fn test_validate_order_rejects_wrong_shape() {
        let issues = validate_order(json!({"order_id": 7})).unwrap_err();
        assert_eq!(issues.len(), 1);
    }

    #[test]
    fn test_error_permanence() {
        assert!(StepError::from(FulfillmentError::PaymentDeclined("o".into())).permanent);
        assert!(!StepError::from(FulfillmentError::Unavailable("gw".into())).permanent);
    }

    #[test]
    fn test_definition_builds() {
        let definition = definition().unwrap();
        assert_eq!(definition.id.as_str(), WORKFLOW_ID);
    }
}
