use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use omnistock_core::{Sku, WarehouseId};

/// Raw field/value pairs of one log entry.
pub type LogFields = BTreeMap<String, String>;

pub const FIELD_SKU: &str = "sku";
pub const FIELD_WAREHOUSE_ID: &str = "warehouse_id";
pub const FIELD_CHANGE: &str = "change";
pub const FIELD_CHANNEL: &str = "channel";
pub const FIELD_REASON: &str = "reason";

/// Reason carried by events emitted for allocated orders.
pub const REASON_ORDER: &str = "order";
/// Reason carried by events emitted for manual stock updates.
pub const REASON_STOCK_UPDATE: &str = "stock_update";

/// A stock change for one (SKU, warehouse): positive = restock, negative = deduction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryEvent {
    pub sku: Sku,
    pub warehouse_id: WarehouseId,
    pub change: i64,
    pub channel: String,
    pub reason: String,
}

/// How numeric fields that fail to parse are treated.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum DecodePolicy {
    /// Missing or malformed integers become zero; the entry is still delivered.
    #[default]
    Lenient,
    /// Missing or malformed integers reject the entry.
    Strict,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("field {field} is not an integer: {value:?}")]
    InvalidInteger { field: &'static str, value: String },
}

impl InventoryEvent {
    pub fn new(
        sku: impl Into<Sku>,
        warehouse_id: WarehouseId,
        change: i64,
        channel: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            sku: sku.into(),
            warehouse_id,
            change,
            channel: channel.into(),
            reason: reason.into(),
        }
    }

    pub fn is_deduction(&self) -> bool {
        self.change < 0
    }

    /// Wire form: every value is a string, integers in base 10.
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            (FIELD_SKU, self.sku.to_string()),
            (FIELD_WAREHOUSE_ID, self.warehouse_id.to_string()),
            (FIELD_CHANGE, self.change.to_string()),
            (FIELD_CHANNEL, self.channel.clone()),
            (FIELD_REASON, self.reason.clone()),
        ]
    }

    /// Decode an entry under `policy`.
    ///
    /// Under [`DecodePolicy::Lenient`] this never fails; every coercion is logged.
    pub fn decode(fields: &LogFields, policy: DecodePolicy) -> Result<Self, DecodeError> {
        match policy {
            DecodePolicy::Strict => Self::decode_strict(fields),
            DecodePolicy::Lenient => {
                let (event, issues) = Self::decode_lenient(fields);
                for issue in &issues {
                    warn!(sku = %event.sku, error = %issue, "coerced malformed event field to zero");
                }
                Ok(event)
            }
        }
    }

    pub fn decode_strict(fields: &LogFields) -> Result<Self, DecodeError> {
        let text = |name: &'static str| {
            fields
                .get(name)
                .cloned()
                .ok_or(DecodeError::MissingField(name))
        };
        let int = |name: &'static str| -> Result<i64, DecodeError> {
            let raw = fields.get(name).ok_or(DecodeError::MissingField(name))?;
            raw.trim().parse::<i64>().map_err(|_| DecodeError::InvalidInteger {
                field: name,
                value: raw.clone(),
            })
        };

        Ok(Self {
            sku: Sku::new(text(FIELD_SKU)?),
            warehouse_id: WarehouseId::new(int(FIELD_WAREHOUSE_ID)?),
            change: int(FIELD_CHANGE)?,
            channel: text(FIELD_CHANNEL)?,
            reason: text(FIELD_REASON)?,
        })
    }

    /// Decode, coercing missing text to "" and unusable integers to 0.
    ///
    /// Returns the integer problems that were papered over so callers can report them.
    pub fn decode_lenient(fields: &LogFields) -> (Self, Vec<DecodeError>) {
        let mut issues = Vec::new();
        let text = |name: &'static str| fields.get(name).cloned().unwrap_or_default();
        let mut int = |name: &'static str| match fields.get(name) {
            None => {
                issues.push(DecodeError::MissingField(name));
                0
            }
            Some(raw) => match leading_integer(raw) {
                Some(v) => v,
                None => {
                    issues.push(DecodeError::InvalidInteger {
                        field: name,
                        value: raw.clone(),
                    });
                    0
                }
            },
        };

        let warehouse_id = WarehouseId::new(int(FIELD_WAREHOUSE_ID));
        let change = int(FIELD_CHANGE);

        let event = Self {
            sku: Sku::new(text(FIELD_SKU)),
            warehouse_id,
            change,
            channel: text(FIELD_CHANNEL),
            reason: text(FIELD_REASON),
        };
        (event, issues)
    }
}

/// Scan an optionally signed decimal prefix, skipping leading whitespace.
///
/// `"12abc"` yields 12; `"abc"` and out-of-range values yield `None`.
fn leading_integer(raw: &str) -> Option<i64> {
    let s = raw.trim_start();
    let sign_len = usize::from(s.starts_with(['-', '+']));
    let digits = s[sign_len..]
        .bytes()
        .take_while(|b| b.is_ascii_digit())
        .count();
    if digits == 0 {
        return None;
    }
    s[..sign_len + digits].parse::<i64>().ok()
}
