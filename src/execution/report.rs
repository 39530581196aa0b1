//! Report assembly: `ExecutionContext` -> `ExecutionReport` (spec.md §4.4
//! "Report contract").

use crate::models::execution::{ExecutedRoute, ExecutionContext, ExecutionReport, ExecutionStatus, Fill};
use crate::models::order::Order;
use rust_decimal::Decimal;

pub fn build_report(context: &ExecutionContext) -> ExecutionReport {
    let mut fills = Vec::new();
    let mut executed_quantity = Decimal::ZERO;
    let mut total_fees = Decimal::ZERO;
    let mut notional = Decimal::ZERO;
    let mut errors = Vec::new();

    for (exchange, route) in &context.route_results {
        if route.executed_qty > Decimal::ZERO {
            executed_quantity += route.executed_qty;
            total_fees += route.fee;
            notional += route.executed_qty * route.avg_price;
            fills.push(Fill {
                exchange: exchange.clone(),
                order_id: route.order_id.clone().unwrap_or_default(),
                quantity: route.executed_qty,
                price: route.avg_price,
                fee: route.fee,
                timestamp: route.end.unwrap_or(route.start),
            });
        }
        if let Some(ref err) = route.error {
            errors.push(format!("{exchange}: {err}"));
        }
    }

    let average_price = if executed_quantity > Decimal::ZERO {
        Some(notional / executed_quantity)
    } else {
        None
    };

    let order = &context.decision.original_order;
    let slippage = ExecutionReport::compute_slippage(order, average_price);

    ExecutionReport {
        execution_id: context.id.clone(),
        original_order: order.clone(),
        status: context.status,
        fills,
        executed_quantity,
        total_fees,
        average_price,
        slippage,
        errors,
    }
}

/// Roll up per-route statuses into the overall `ExecutionContext` status
/// (spec.md §4.4): `Completed` only if every route completed, `Partial` if
/// some but not all routes executed quantity, `Failed` if none did.
pub fn rollup_status(route_results: &std::collections::HashMap<String, ExecutedRoute>) -> ExecutionStatus {
    if route_results.is_empty() {
        return ExecutionStatus::Failed;
    }
    let total = route_results.len();
    let completed = route_results
        .values()
        .filter(|r| r.status == ExecutionStatus::Completed)
        .count();
    let any_executed = route_results.iter().any(|(_, r)| r.executed_qty > Decimal::ZERO);

    if completed == total {
        ExecutionStatus::Completed
    } else if any_executed {
        ExecutionStatus::Partial
    } else {
        ExecutionStatus::Failed
    }
}

#[allow(dead_code)]
fn zero_fill_order_guard(order: &Order) -> bool {
    order.quantity > Decimal::ZERO
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::order::{OrderType, Side, TimeInForce};
    use crate::models::routing::RoutingDecision;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn order() -> Order {
        Order {
            symbol: "BTCUSDT".to_string(),
            side: Side::Buy,
            order_type: OrderType::Limit,
            quantity: dec!(1),
            price: dec!(50000),
            time_in_force: TimeInForce::GTC,
            position_side: None,
            reduce_only: false,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn report_averages_weighted_by_quantity() {
        let mut route_results = HashMap::new();
        route_results.insert(
            "binance".to_string(),
            ExecutedRoute {
                order_id: Some("1".to_string()),
                status: ExecutionStatus::Completed,
                executed_qty: dec!(0.6),
                avg_price: dec!(50000),
                fee: dec!(5),
                start: Utc::now(),
                end: Some(Utc::now()),
                error: None,
            },
        );
        route_results.insert(
            "okx".to_string(),
            ExecutedRoute {
                order_id: Some("2".to_string()),
                status: ExecutionStatus::Completed,
                executed_qty: dec!(0.4),
                avg_price: dec!(50100),
                fee: dec!(3),
                start: Utc::now(),
                end: Some(Utc::now()),
                error: None,
            },
        );

        let ctx = ExecutionContext {
            id: "exec-1".to_string(),
            decision: RoutingDecision {
                routes: vec![],
                original_order: order(),
            },
            status: rollup_status(&route_results),
            start_time: Utc::now(),
            route_results,
        };

        let report = build_report(&ctx);
        assert_eq!(report.status, ExecutionStatus::Completed);
        assert_eq!(report.executed_quantity, dec!(1.0));
        assert_eq!(report.total_fees, dec!(8));
        // weighted average = (0.6*50000 + 0.4*50100) / 1 = 50040
        assert_eq!(report.average_price, Some(dec!(50040)));
    }

    #[test]
    fn empty_routes_is_failed() {
        let route_results = HashMap::new();
        assert_eq!(rollup_status(&route_results), ExecutionStatus::Failed);
    }
}
