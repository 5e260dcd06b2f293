//! Greedy multi-warehouse allocation (pure decision logic).
//!
//! Given the positive stock rows of one SKU, deduct from the fullest warehouse
//! first so an order touches as few warehouses as possible. Ties break on the
//! lower warehouse id, which keeps the plan deterministic for a given snapshot.

use serde::{Deserialize, Serialize};

use omnistock_core::{DomainError, DomainResult, Sku, WarehouseId};

use crate::stock::WarehouseStock;

/// An order arriving from a sales channel. Never persisted itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub sku: Sku,
    pub channel: String,
    pub quantity: i64,
}

impl Order {
    pub fn new(sku: impl Into<Sku>, channel: impl Into<String>, quantity: i64) -> Self {
        Self {
            sku: sku.into(),
            channel: channel.into(),
            quantity,
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.sku.is_blank() {
            return Err(DomainError::validation("invalid SKU"));
        }
        if self.channel.trim().is_empty() {
            return Err(DomainError::validation("invalid channel"));
        }
        if self.quantity <= 0 {
            return Err(DomainError::validation("invalid quantity"));
        }
        Ok(())
    }
}

/// One warehouse's share of an order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationLeg {
    pub warehouse_id: WarehouseId,
    pub quantity: i64,
}

/// Ordered deductions that together satisfy an order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AllocationPlan {
    legs: Vec<AllocationLeg>,
}

impl AllocationPlan {
    pub fn legs(&self) -> &[AllocationLeg] {
        &self.legs
    }

    pub fn into_legs(self) -> Vec<AllocationLeg> {
        self.legs
    }

    pub fn total(&self) -> i64 {
        self.legs.iter().map(|l| l.quantity).sum()
    }

    pub fn warehouses_touched(&self) -> usize {
        self.legs.len()
    }
}

/// Not enough stock across all warehouses.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Shortfall {
    pub requested: i64,
    pub available: i64,
}

/// Sort rows into allocation order: quantity descending, then warehouse id ascending.
pub fn allocation_order(rows: &mut [WarehouseStock]) {
    rows.sort_by(|a, b| {
        b.quantity
            .cmp(&a.quantity)
            .then_with(|| a.warehouse_id.cmp(&b.warehouse_id))
    });
}

/// Plan the deductions for `quantity` units over `rows`.
///
/// Rows with non-positive quantity are ignored. Input order does not matter.
pub fn plan_allocation(rows: &[WarehouseStock], quantity: i64) -> Result<AllocationPlan, Shortfall> {
    let mut eligible: Vec<WarehouseStock> = rows.iter().copied().filter(|r| r.quantity > 0).collect();
    allocation_order(&mut eligible);

    let mut remaining = quantity.max(0);
    let mut legs = Vec::new();

    for row in &eligible {
        if remaining == 0 {
            break;
        }
        let to_deduct = remaining.min(row.quantity);
        if to_deduct > 0 {
            legs.push(AllocationLeg {
                warehouse_id: row.warehouse_id,
                quantity: to_deduct,
            });
            remaining -= to_deduct;
        }
    }

    if remaining > 0 {
        return Err(Shortfall {
            requested: quantity,
            available: eligible.iter().fold(0i64, |acc, r| acc.saturating_add(r.quantity)),
        });
    }

    Ok(AllocationPlan { legs })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn row(wh: i64, qty: i64) -> WarehouseStock {
        WarehouseStock::new(WarehouseId::new(wh), qty)
    }

    #[test]
    fn takes_from_fullest_warehouse_first() {
        // A=5, B=3, order 4 → all from A.
        let plan = plan_allocation(&[row(2, 3), row(1, 5)], 4).unwrap();
        assert_eq!(
            plan.legs(),
            &[AllocationLeg {
                warehouse_id: WarehouseId::new(1),
                quantity: 4
            }]
        );
        assert_eq!(plan.warehouses_touched(), 1);
    }

    #[test]
    fn spills_over_into_next_warehouse() {
        let plan = plan_allocation(&[row(1, 5), row(2, 3), row(3, 1)], 7).unwrap();
        let legs: Vec<_> = plan.legs().iter().map(|l| (l.warehouse_id.get(), l.quantity)).collect();
        assert_eq!(legs, vec![(1, 5), (2, 2)]);
        assert_eq!(plan.total(), 7);
    }

    #[test]
    fn ties_break_on_lower_warehouse_id() {
        let plan = plan_allocation(&[row(9, 4), row(3, 4), row(5, 4)], 6).unwrap();
        let order: Vec<_> = plan.legs().iter().map(|l| l.warehouse_id.get()).collect();
        assert_eq!(order, vec![3, 5]);
    }

    #[test]
    fn insufficient_stock_reports_shortfall() {
        let err = plan_allocation(&[row(1, 4), row(2, 2)], 10).unwrap_err();
        assert_eq!(
            err,
            Shortfall {
                requested: 10,
                available: 6
            }
        );
    }

    #[test]
    fn empty_rows_cannot_satisfy_anything() {
        assert!(plan_allocation(&[], 1).is_err());
    }

    #[test]
    fn zero_and_negative_rows_are_ignored() {
        let plan = plan_allocation(&[row(1, 0), row(2, -3), row(3, 2)], 2).unwrap();
        assert_eq!(plan.legs().len(), 1);
        assert_eq!(plan.legs()[0].warehouse_id, WarehouseId::new(3));
    }

    #[test]
    fn order_validation() {
        assert!(Order::new("X", "web", 1).validate().is_ok());
        assert_eq!(
            Order::new("X", "", 1).validate(),
            Err(DomainError::validation("invalid channel"))
        );
        assert_eq!(
            Order::new("X", "web", 0).validate(),
            Err(DomainError::validation("invalid quantity"))
        );
        assert_eq!(
            Order::new(" ", "web", 2).validate(),
            Err(DomainError::validation("invalid SKU"))
        );
    }

    fn rows_strategy() -> impl Strategy<Value = Vec<WarehouseStock>> {
        prop::collection::vec((1i64..20, 0i64..50), 0..8).prop_map(|pairs| {
            // One row per warehouse, as the ledger guarantees.
            let mut seen = std::collections::BTreeMap::new();
            for (wh, qty) in pairs {
                seen.insert(wh, qty);
            }
            seen.into_iter().map(|(wh, qty)| row(wh, qty)).collect()
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: a plan deducts exactly the order quantity, never more than a
        /// warehouse holds, and fails iff total stock is short.
        #[test]
        fn plan_is_exact_and_bounded(rows in rows_strategy(), qty in 1i64..200) {
            let available: i64 = rows.iter().map(|r| r.quantity).sum();
            match plan_allocation(&rows, qty) {
                Ok(plan) => {
                    prop_assert!(available >= qty);
                    prop_assert_eq!(plan.total(), qty);
                    for leg in plan.legs() {
                        let held = rows.iter().find(|r| r.warehouse_id == leg.warehouse_id).unwrap().quantity;
                        prop_assert!(leg.quantity > 0 && leg.quantity <= held);
                    }
                }
                Err(shortfall) => {
                    prop_assert!(available < qty);
                    prop_assert_eq!(shortfall.available, available);
                }
            }
        }

        /// Property: shuffling the input rows does not change the plan.
        #[test]
        fn plan_is_independent_of_row_order(rows in rows_strategy(), qty in 1i64..100) {
            let mut reversed = rows.clone();
            reversed.reverse();
            prop_assert_eq!(plan_allocation(&rows, qty), plan_allocation(&reversed, qty));
        }
    }
}
