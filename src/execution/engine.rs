//! Execution Engine (spec.md §4.4): fans a `RoutingDecision` out across
//! priority groups, sequential between groups, bounded-parallel within a
//! group.

use crate::adapter::{publish_json, EventSink, ExchangeAdapter};
use crate::clock::Clock;
use crate::config::ExecutionConfig;
use crate::error::{classify_adapter_error, is_retryable, OmsError};
use crate::execution::report::{build_report, rollup_status};
use crate::ids::new_uuid;
use crate::models::execution::{ExecutedRoute, ExecutionContext, ExecutionReport, ExecutionStatus};
use crate::models::order::{Order, OrderType};
use crate::models::routing::{Route, RoutingDecision};
use crate::router::AccountRouter;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, Semaphore};
use tracing::{error, info, warn};

pub struct ExecutionEngine {
    adapters: HashMap<String, Arc<dyn ExchangeAdapter>>,
    router: Arc<AccountRouter>,
    config: ExecutionConfig,
    clock: Arc<dyn Clock>,
    event_sink: Arc<dyn EventSink>,
    worker_pool: Arc<Semaphore>,
    contexts: RwLock<HashMap<String, ExecutionContext>>,
}

impl ExecutionEngine {
    pub fn new(
        adapters: HashMap<String, Arc<dyn ExchangeAdapter>>,
        router: Arc<AccountRouter>,
        config: ExecutionConfig,
        clock: Arc<dyn Clock>,
        event_sink: Arc<dyn EventSink>,
    ) -> Self {
        let worker_pool = Arc::new(Semaphore::new(config.worker_pool_size));
        Self {
            adapters,
            router,
            config,
            clock,
            event_sink,
            worker_pool,
            contexts: RwLock::new(HashMap::new()),
        }
    }

    /// Execute a routing decision end to end, returning the assembled report.
    /// Bounded by `execution_timeout_secs` overall.
    pub async fn execute(&self, decision: RoutingDecision) -> Result<ExecutionReport, OmsError> {
        let id = new_uuid().to_string();
        let context = ExecutionContext {
            id: id.clone(),
            decision: decision.clone(),
            status: ExecutionStatus::Pending,
            start_time: self.clock.now(),
            route_results: HashMap::new(),
        };
        self.contexts.write().await.insert(id.clone(), context);
        publish_json(self.event_sink.as_ref(), "execution.started", &id).await;

        let timeout = std::time::Duration::from_secs(self.config.execution_timeout_secs);
        let outcome = tokio::time::timeout(timeout, self.run_groups(&id, &decision)).await;

        let mut guard = self.contexts.write().await;
        let context = guard.get_mut(&id).expect("context inserted above");

        match outcome {
            Ok(Ok(())) => {
                context.status = rollup_status(&context.route_results);
            }
            Ok(Err(e)) => {
                error!(execution_id = %id, error = %e, "execution run failed");
                context.status = ExecutionStatus::Failed;
            }
            Err(_) => {
                warn!(execution_id = %id, "execution timed out");
                context.status = ExecutionStatus::Failed;
            }
        }

        let report = build_report(context);
        publish_json(self.event_sink.as_ref(), "execution.completed", &report).await;
        Ok(report)
    }

    async fn run_groups(&self, id: &str, decision: &RoutingDecision) -> Result<(), OmsError> {
        for (priority, routes) in decision.priority_groups() {
            info!(execution_id = id, priority, count = routes.len(), "executing priority group");
            let group_limit = self.config.max_concurrent_orders.min(routes.len().max(1));
            let group_semaphore = Arc::new(Semaphore::new(group_limit));

            let mut handles = Vec::with_capacity(routes.len());
            for route in routes {
                let route = route.clone();
                let original_order = decision.original_order.clone();
                let group_permit = group_semaphore.clone();
                let worker_permit = self.worker_pool.clone();
                let this = self;
                handles.push(async move {
                    let _group = group_permit.acquire().await.expect("semaphore not closed");
                    let _worker = worker_permit.acquire().await.expect("semaphore not closed");
                    this.execute_route(&route, &original_order).await
                });
            }

            let results: Vec<(String, ExecutedRoute)> = futures_join_all(handles).await;
            let mut guard = self.contexts.write().await;
            let context = guard.get_mut(id).ok_or_else(|| OmsError::NotFound(id.to_string()))?;
            for (exchange, route) in results {
                context.route_results.insert(exchange, route);
            }
            let filled: rust_decimal::Decimal = context.route_results.values().map(|r| r.executed_qty).sum();
            let target = decision.original_order.quantity;
            drop(guard);
            if filled >= target {
                info!(execution_id = id, filled = %filled, target = %target, "fill target reached, skipping remaining priority groups");
                break;
            }
        }
        Ok(())
    }

    async fn execute_route(&self, route: &Route, original_order: &Order) -> (String, ExecutedRoute) {
        let start = self.clock.now();
        let mut order = original_order.clone();
        order.symbol = route.symbol.clone();
        order.quantity = route.quantity;
        if order.order_type != OrderType::Market {
            order.price = route.expected_price;
        }

        let mut last_error: Option<String> = None;
        for attempt in 0..self.config.max_retries.max(1) {
            match self.attempt_once(&route.exchange, &order).await {
                Ok(placed) => {
                    let status = route_status_for(placed.status);
                    return (
                        route.exchange.clone(),
                        ExecutedRoute {
                            order_id: Some(placed.exchange_order_id),
                            status,
                            executed_qty: placed.executed_qty,
                            avg_price: placed.avg_price,
                            fee: placed.fee,
                            start,
                            end: Some(self.clock.now()),
                            error: if status == ExecutionStatus::Failed {
                                Some("order rejected by venue".to_string())
                            } else {
                                None
                            },
                        },
                    );
                }
                Err(e) => {
                    warn!(exchange = %route.exchange, attempt, error = %e, "order attempt failed");
                    let retryable = is_retryable(&e);
                    last_error = Some(e.to_string());
                    if !retryable || attempt + 1 >= self.config.max_retries {
                        break;
                    }
                    tokio::time::sleep(std::time::Duration::from_millis(self.config.retry_delay_ms)).await;
                }
            }
        }

        (
            route.exchange.clone(),
            ExecutedRoute {
                order_id: None,
                status: ExecutionStatus::Failed,
                executed_qty: rust_decimal::Decimal::ZERO,
                avg_price: rust_decimal::Decimal::ZERO,
                fee: rust_decimal::Decimal::ZERO,
                start,
                end: Some(self.clock.now()),
                error: last_error,
            },
        )
    }

    async fn attempt_once(
        &self,
        exchange: &str,
        order: &Order,
    ) -> Result<crate::models::order::PlacedOrder, OmsError> {
        let adapter = self
            .adapters
            .get(exchange)
            .ok_or_else(|| OmsError::Unavailable(format!("no adapter configured for {exchange}")))?;

        let routed = self.router.route(exchange, order).await?;
        let place_timeout = std::time::Duration::from_secs(self.config.order_timeout_secs);

        let result = tokio::time::timeout(place_timeout, adapter.place_order(&routed.account.account_id, order))
            .await
            .map_err(|_| OmsError::Timeout(format!("place_order on {exchange} timed out")))?;

        match result {
            Ok(placed) => {
                self.router
                    .record_outcome(&routed.account.account_id, true, 0.0)
                    .await;
                Ok(placed)
            }
            Err(e) => {
                self.router
                    .record_outcome(&routed.account.account_id, false, 0.0)
                    .await;
                Err(classify_adapter_error(&e.to_string()))
            }
        }
    }

    pub async fn get_context(&self, id: &str) -> Option<ExecutionContext> {
        self.contexts.read().await.get(id).cloned()
    }
}

/// Map a venue's reported fill status onto the engine's per-route status
/// (spec.md §4.4 report contract: a route that only partially filled must
/// not count as `Completed` in the rollup).
fn route_status_for(placed: crate::models::order::PlacedOrderStatus) -> ExecutionStatus {
    use crate::models::order::PlacedOrderStatus::*;
    match placed {
        Filled => ExecutionStatus::Completed,
        PartiallyFilled => ExecutionStatus::Partial,
        New => ExecutionStatus::Pending,
        Cancelled => ExecutionStatus::Cancelled,
        Rejected => ExecutionStatus::Failed,
    }
}

/// Small local join-all so this module doesn't need the `futures` crate for
/// a single call site; `tokio::join!` can't take a runtime-sized `Vec`.
async fn futures_join_all<F, T>(futures: Vec<F>) -> Vec<T>
where
    F: std::future::Future<Output = T>,
{
    let mut out = Vec::with_capacity(futures.len());
    let mut handles = Vec::with_capacity(futures.len());
    for fut in futures {
        handles.push(Box::pin(fut));
    }
    for handle in handles {
        out.push(handle.await);
    }
    out
}
