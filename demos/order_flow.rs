use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use taskflow::prelude::*;
use taskflow::TracingTracer;
use tracing::info;

// Data structures
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Order {
    id: String,
    items: Vec<OrderItem>,
    total_amount: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[allow(dead_code)]
struct OrderItem {
    product_id: String,
    quantity: u32,
}

#[derive(Debug, Default)]
struct Receipt {
    transaction_id: Option<String>,
    tracking_number: Option<String>,
    last_step: String,
}

#[derive(Default)]
struct OrderTask<'a> {
    order: Option<Order>,
    receipt: Option<&'a mut Receipt>,
    charge_attempts: u32,
    err: Option<StepError>,
}

// Step 1: validation, written as a standalone async step
define_step!(ValidateOrder);

#[async_trait]
impl<'a> Step<OrderTask<'a>> for ValidateOrder {
    async fn execute(&self, task: &mut OrderTask<'a>, ctx: &mut Context) -> StepResult {
        let order = task.order.as_ref().ok_or("order not loaded")?;
        info!(order = %order.id, "validating order");

        if order.items.is_empty() || order.total_amount <= 0.0 {
            return Err(StepFailure::with_code("INVALID", "order is empty"));
        }

        ctx.set_metadata("order_id", order.id.clone());
        Ok(StepCode::SUCCESS)
    }
}

// Remaining steps are plain methods of the task
impl<'a> OrderTask<'a> {
    fn reserve(&mut self, ctx: &mut Context) -> StepResult {
        let order = self.order.as_ref().ok_or("order not loaded")?;
        let units: u32 = order.items.iter().map(|i| i.quantity).sum();
        if units > 10 {
            return Ok(StepCode::new("OUT_OF_STOCK"));
        }

        ctx.insert("reserved_units", units);
        Ok(StepCode::SUCCESS)
    }

    fn charge(&mut self, _ctx: &mut Context) -> StepResult {
        self.charge_attempts += 1;
        if self.charge_attempts < 2 {
            // Gateway hiccup, retried by the runner
            return Err(StepFailure::retryable("payment gateway timeout"));
        }

        let receipt = self.receipt.as_deref_mut().ok_or("receipt not bound")?;
        receipt.transaction_id = Some(format!("TXN-{:04}", self.charge_attempts));
        Ok(StepCode::SUCCESS)
    }

    fn ship(&mut self, ctx: &mut Context) -> StepResult {
        let units = ctx.get::<u32>("reserved_units").copied().unwrap_or_default();
        let receipt = self.receipt.as_deref_mut().ok_or("receipt not bound")?;
        receipt.tracking_number = Some(format!("TRACK-{}-{}", order_id(ctx), units));
        Ok(StepCode::SUCCESS)
    }

    fn cancel(&mut self, _ctx: &mut Context) -> StepResult {
        info!("order cancelled");
        Ok(StepCode::SUCCESS)
    }

    fn charge_failed(&mut self, step_key: &StepKey, err: Option<&StepError>) {
        let details = err.map_or_else(|| "unknown".to_string(), ToString::to_string);
        self.err = Some(StepError::failed(format!("{}: {}", step_key, details)));
    }
}

impl<'a> Task for OrderTask<'a> {
    type Input = Order;
    type Output = &'a mut Receipt;
    type Context = Context;

    fn name(&self) -> &str {
        "order"
    }

    fn init(&mut self, input: Order, output: &'a mut Receipt) -> Result<(), StepError> {
        self.order = Some(input);
        self.receipt = Some(output);
        Ok(())
    }

    fn step_config_map(&self) -> StepConfigMap<Self> {
        let mut map = StepConfigMap::new();
        map.insert(
            ValidateOrder::NAME.into(),
            StepConfig::new(ValidateOrder)
                .route(StepCode::SUCCESS, "reserve")
                .finish_on("INVALID"),
        );
        map.insert(
            "reserve".into(),
            StepConfig::<Self>::from_fn(Self::reserve)
                .route(StepCode::SUCCESS, "charge")
                .route("OUT_OF_STOCK", "cancel")
                .route(StepCode::FAILURE, "cancel"),
        );
        map.insert(
            "charge".into(),
            StepConfig::<Self>::from_fn(Self::charge)
                .retry(RetryPolicy::exponential(3, Duration::from_millis(50)))
                .on_failed(Self::charge_failed)
                .route(StepCode::SUCCESS, "ship")
                .route(StepCode::FAILURE, "cancel"),
        );
        map.insert(
            "ship".into(),
            StepConfig::<Self>::from_fn(Self::ship).finish_on(StepCode::SUCCESS),
        );
        map.insert(
            "cancel".into(),
            StepConfig::<Self>::from_fn(Self::cancel).finish_on(StepCode::SUCCESS),
        );
        map
    }

    fn first_step_key(&self) -> StepKey {
        ValidateOrder::NAME.into()
    }

    fn before_step(&mut self, step_key: &StepKey) {
        if let Some(receipt) = self.receipt.as_deref_mut() {
            receipt.last_step = step_key.to_string();
        }
    }

    fn error(&self) -> Option<&StepError> {
        self.err.as_ref()
    }
}

fn order_id(ctx: &Context) -> &str {
    ctx.get_metadata("order_id").map_or("unknown", String::as_str)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let order = Order {
        id: "ORD-001".to_string(),
        items: vec![
            OrderItem {
                product_id: "PROD-1".to_string(),
                quantity: 2,
            },
            OrderItem {
                product_id: "PROD-2".to_string(),
                quantity: 1,
            },
        ],
        total_amount: 59.97,
    };

    let mut runner = Runner::new().with_tracer(TracingTracer);
    let mut ctx = Context::new();
    let mut receipt = Receipt::default();
    let mut task = OrderTask::default();

    runner
        .run_task(&mut ctx, &mut task, order, &mut receipt)
        .await?;

    if let Some(err) = task.error() {
        println!("order failed: {}", err);
    }
    println!("{}", runner.task_graph_run_steps(&task, runner.run_steps(), &[]));
    println!("run steps: {}", runner.run_steps_json()?);

    drop(task);
    println!("receipt: {:?}", receipt);
    Ok(())
}
