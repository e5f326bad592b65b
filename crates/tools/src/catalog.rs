//! Analytics Tool Catalog
//!
//! Each analytics pipe is exposed to the model as one `AnalyticsTool` with a
//! small set of typed, optional filters. Tools are grouped by `Domain`; a
//! domain manager only ever sees its own subset.
//!
//! The tenant filter (`company_url`) and the brand filter are injected from
//! the `ToolContext`. Values for either that appear in the model's arguments
//! are dropped before the query is built.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use dockside_core::{
    CoreResult, ToolContext, ToolDefinitionTrait, ToolExecutable, UnifiedToolRegistry,
};
use dockside_llm::{ParameterSchema, ToolDefinition};

use crate::analytics::{AnalyticsBackend, AnalyticsQuery, BRAND_PARAM, TENANT_PARAM};
use crate::error::ToolInvokeError;

/// Upper bound for the `limit` filter.
pub const MAX_LIMIT: i64 = 1000;

// ============================================================================
// Domain
// ============================================================================

/// Closed set of domain managers the router may select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    Orders,
    Inventory,
    Returns,
    Shipments,
    Billing,
}

/// The router named a manager that does not exist.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown domain manager: {0}")]
pub struct UnknownDomainError(pub String);

impl Domain {
    pub fn all() -> [Domain; 5] {
        [
            Domain::Orders,
            Domain::Inventory,
            Domain::Returns,
            Domain::Shipments,
            Domain::Billing,
        ]
    }

    /// Name of the manager tool the router calls for this domain.
    pub fn agent_name(&self) -> &'static str {
        match self {
            Domain::Orders => "orderAgent",
            Domain::Inventory => "inventoryAgent",
            Domain::Returns => "returnsAgent",
            Domain::Shipments => "shipmentAgent",
            Domain::Billing => "billingAgent",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Orders => "orders",
            Domain::Inventory => "inventory",
            Domain::Returns => "returns",
            Domain::Shipments => "shipments",
            Domain::Billing => "billing",
        }
    }

    /// Maximum number of tool-calling rounds for this domain's manager.
    ///
    /// Order and shipment questions often need a follow-up lookup (e.g. an
    /// order number found in the first round), so they get a second round.
    pub fn max_rounds(&self) -> usize {
        match self {
            Domain::Orders | Domain::Shipments => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = UnknownDomainError;

    /// Accepts both the manager tool name (`orderAgent`) and the plain
    /// domain name (`orders`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        Domain::all()
            .into_iter()
            .find(|d| {
                d.agent_name().eq_ignore_ascii_case(needle) || d.as_str().eq_ignore_ascii_case(needle)
            })
            .ok_or_else(|| UnknownDomainError(s.to_string()))
    }
}

// ============================================================================
// Filters
// ============================================================================

/// Optional filter a pipe accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    DateFrom,
    DateTo,
    Status,
    Sku,
    OrderNumber,
    Carrier,
    Warehouse,
    Limit,
}

impl Filter {
    pub fn key(&self) -> &'static str {
        match self {
            Filter::DateFrom => "date_from",
            Filter::DateTo => "date_to",
            Filter::Status => "status",
            Filter::Sku => "sku",
            Filter::OrderNumber => "order_number",
            Filter::Carrier => "carrier",
            Filter::Warehouse => "warehouse",
            Filter::Limit => "limit",
        }
    }

    fn schema(&self) -> ParameterSchema {
        match self {
            Filter::DateFrom => ParameterSchema::string(Some("Start date, inclusive (YYYY-MM-DD)")),
            Filter::DateTo => ParameterSchema::string(Some("End date, inclusive (YYYY-MM-DD)")),
            Filter::Status => ParameterSchema::string(Some("Status to filter on")),
            Filter::Sku => ParameterSchema::string(Some("Product SKU")),
            Filter::OrderNumber => ParameterSchema::string(Some("Order number")),
            Filter::Carrier => ParameterSchema::string(Some("Carrier name, e.g. UPS")),
            Filter::Warehouse => ParameterSchema::string(Some("Warehouse code")),
            Filter::Limit => ParameterSchema::integer(Some("Maximum number of rows (1-1000)")),
        }
    }

    /// Validate one argument value and render it as a query parameter.
    ///
    /// Returns `Ok(None)` for null or blank values.
    fn render(&self, value: &Value) -> Result<Option<String>, ToolInvokeError> {
        match self {
            Filter::Limit => {
                let limit = match value {
                    Value::Null => return Ok(None),
                    Value::Number(n) => n.as_i64(),
                    Value::String(s) if s.trim().is_empty() => return Ok(None),
                    Value::String(s) => s.trim().parse::<i64>().ok(),
                    _ => None,
                }
                .ok_or_else(|| {
                    ToolInvokeError::InvalidArguments(format!("limit must be an integer, got {}", value))
                })?;
                Ok(Some(limit.clamp(1, MAX_LIMIT).to_string()))
            }
            _ => {
                let text = match value {
                    Value::Null => return Ok(None),
                    Value::String(s) => s.trim().to_string(),
                    Value::Number(n) => n.to_string(),
                    other => {
                        return Err(ToolInvokeError::InvalidArguments(format!(
                            "{} must be a string, got {}",
                            self.key(),
                            other
                        )))
                    }
                };
                if text.is_empty() {
                    return Ok(None);
                }
                if matches!(self, Filter::DateFrom | Filter::DateTo) {
                    chrono::NaiveDate::parse_from_str(&text, "%Y-%m-%d").map_err(|_| {
                        ToolInvokeError::InvalidArguments(format!(
                            "{} must be a YYYY-MM-DD date, got {}",
                            self.key(),
                            text
                        ))
                    })?;
                }
                Ok(Some(text))
            }
        }
    }
}

// ============================================================================
// AnalyticsTool
// ============================================================================

/// Static description of one analytics pipe.
#[derive(Debug, Clone)]
pub struct PipeSpec {
    /// Tool name shown to the model
    pub name: &'static str,
    /// Remote pipe name
    pub pipe: &'static str,
    pub description: &'static str,
    pub filters: &'static [Filter],
    /// Columns the pipe returns, used for header-only empty results
    pub columns: &'static [&'static str],
}

/// One analytics pipe exposed as a tool.
pub struct AnalyticsTool {
    spec: PipeSpec,
    backend: Arc<dyn AnalyticsBackend>,
}

impl AnalyticsTool {
    pub fn new(spec: PipeSpec, backend: Arc<dyn AnalyticsBackend>) -> Self {
        Self { spec, backend }
    }

    pub fn spec(&self) -> &PipeSpec {
        &self.spec
    }

    /// Build the tenant-scoped query for `args`.
    pub fn build_query(&self, ctx: &ToolContext, args: &Value) -> CoreResult<AnalyticsQuery> {
        let tenant = ctx.tenant()?;
        let mut query = AnalyticsQuery::scoped(self.spec.pipe, tenant);
        if let Some(brand) = ctx.brand_id() {
            query = query.param(BRAND_PARAM, brand);
        }

        if let Some(map) = args.as_object() {
            for (key, _) in map.iter() {
                if key == TENANT_PARAM || key == BRAND_PARAM {
                    tracing::warn!(
                        tool = self.spec.name,
                        key = %key,
                        "dropping caller-supplied scope argument"
                    );
                }
            }
            for filter in self.spec.filters {
                if let Some(value) = map.get(filter.key()) {
                    if let Some(rendered) = filter.render(value)? {
                        query = query.param(filter.key(), rendered);
                    }
                }
            }
        }
        Ok(query)
    }
}

impl ToolDefinitionTrait for AnalyticsTool {
    fn name(&self) -> &str {
        self.spec.name
    }

    fn description(&self) -> &str {
        self.spec.description
    }

    fn parameters_schema(&self) -> Value {
        let properties: HashMap<String, ParameterSchema> = self
            .spec
            .filters
            .iter()
            .map(|f| (f.key().to_string(), f.schema()))
            .collect();
        ParameterSchema::object(None, properties, vec![]).to_value()
    }

    fn output_columns(&self) -> Vec<String> {
        self.spec.columns.iter().map(|c| c.to_string()).collect()
    }
}

#[async_trait]
impl ToolExecutable for AnalyticsTool {
    async fn execute(&self, ctx: &ToolContext, args: Value) -> CoreResult<Value> {
        let query = self.build_query(ctx, &args)?;
        let rows = self.backend.query(&query).await?;
        Ok(rows.into_value())
    }
}

// ============================================================================
// Catalog
// ============================================================================

const DATE_RANGE: [Filter; 2] = [Filter::DateFrom, Filter::DateTo];

fn pipes_for(domain: Domain) -> Vec<PipeSpec> {
    match domain {
        Domain::Orders => vec![
            PipeSpec {
                name: "order_details",
                pipe: "order_details",
                description: "Look up orders with their status, dates, line counts and destination.",
                filters: &[
                    Filter::OrderNumber,
                    Filter::Status,
                    Filter::Sku,
                    Filter::Warehouse,
                    Filter::DateFrom,
                    Filter::DateTo,
                    Filter::Limit,
                ],
                columns: &[
                    "order_number",
                    "status",
                    "order_date",
                    "ship_by_date",
                    "warehouse",
                    "line_count",
                    "destination_country",
                ],
            },
            PipeSpec {
                name: "orders_requiring_attention",
                pipe: "orders_requiring_attention",
                description: "Orders that are on hold, past their ship-by date or stuck in exception status.",
                filters: &[Filter::Warehouse, Filter::Limit],
                columns: &[
                    "order_number",
                    "status",
                    "issue",
                    "order_date",
                    "ship_by_date",
                    "warehouse",
                ],
            },
            PipeSpec {
                name: "order_volume_by_day",
                pipe: "order_volume_by_day",
                description: "Daily count of orders received and shipped.",
                filters: &[Filter::DateFrom, Filter::DateTo, Filter::Warehouse],
                columns: &["day", "orders_received", "orders_shipped"],
            },
        ],
        Domain::Inventory => vec![
            PipeSpec {
                name: "inventory_levels",
                pipe: "inventory_levels",
                description: "On-hand, allocated and available quantity per SKU and warehouse.",
                filters: &[Filter::Sku, Filter::Warehouse, Filter::Limit],
                columns: &["sku", "warehouse", "on_hand", "allocated", "available"],
            },
            PipeSpec {
                name: "low_stock_items",
                pipe: "low_stock_items",
                description: "SKUs whose available quantity is below their reorder point.",
                filters: &[Filter::Warehouse, Filter::Limit],
                columns: &["sku", "warehouse", "available", "reorder_point"],
            },
        ],
        Domain::Returns => vec![
            PipeSpec {
                name: "return_details",
                pipe: "return_details",
                description: "Return authorizations with status, reason and received date.",
                filters: &[
                    Filter::OrderNumber,
                    Filter::Sku,
                    Filter::Status,
                    Filter::DateFrom,
                    Filter::DateTo,
                    Filter::Limit,
                ],
                columns: &[
                    "rma_number",
                    "order_number",
                    "sku",
                    "status",
                    "reason",
                    "received_date",
                ],
            },
            PipeSpec {
                name: "return_reasons_summary",
                pipe: "return_reasons_summary",
                description: "Count of returns grouped by reason.",
                filters: &DATE_RANGE,
                columns: &["reason", "returns"],
            },
        ],
        Domain::Shipments => vec![
            PipeSpec {
                name: "shipment_tracking",
                pipe: "shipment_tracking",
                description: "Shipments with carrier, tracking number and delivery status.",
                filters: &[
                    Filter::OrderNumber,
                    Filter::Carrier,
                    Filter::Status,
                    Filter::DateFrom,
                    Filter::DateTo,
                    Filter::Limit,
                ],
                columns: &[
                    "order_number",
                    "carrier",
                    "tracking_number",
                    "status",
                    "shipped_date",
                    "delivered_date",
                ],
            },
            PipeSpec {
                name: "carrier_performance",
                pipe: "carrier_performance",
                description: "On-time delivery rate and average transit days per carrier.",
                filters: &[Filter::Carrier, Filter::DateFrom, Filter::DateTo],
                columns: &["carrier", "shipments", "on_time_rate", "avg_transit_days"],
            },
        ],
        Domain::Billing => vec![PipeSpec {
            name: "billing_charges",
            pipe: "billing_charges",
            description: "Fulfillment, storage and shipping charges by invoice period.",
            filters: &[Filter::DateFrom, Filter::DateTo, Filter::Warehouse, Filter::Limit],
            columns: &["invoice_period", "charge_type", "quantity", "amount"],
        }],
    }
}

/// All analytics tools, grouped by domain.
#[derive(Clone)]
pub struct ToolCatalog {
    registries: HashMap<Domain, UnifiedToolRegistry>,
}

impl ToolCatalog {
    pub fn new(backend: Arc<dyn AnalyticsBackend>) -> Self {
        let registries = Domain::all()
            .into_iter()
            .map(|domain| {
                let mut registry = UnifiedToolRegistry::new();
                for spec in pipes_for(domain) {
                    registry.register(Arc::new(AnalyticsTool::new(spec, backend.clone())));
                }
                (domain, registry)
            })
            .collect();
        Self { registries }
    }

    /// The tool subset a domain's manager may call.
    pub fn registry_for(&self, domain: Domain) -> UnifiedToolRegistry {
        self.registries.get(&domain).cloned().unwrap_or_default()
    }

    /// LLM-facing tool definitions for a domain.
    pub fn definitions_for(&self, domain: Domain) -> Vec<ToolDefinition> {
        self.registry_for(domain)
            .iter()
            .map(|tool| {
                ToolDefinition::new(tool.name(), tool.description(), tool.parameters_schema())
            })
            .collect()
    }

    /// Declared output columns of a tool, looked up across all domains.
    pub fn columns_of(&self, tool_name: &str) -> Vec<String> {
        self.registries
            .values()
            .find_map(|r| r.get(tool_name))
            .map(|tool| tool.output_columns())
            .unwrap_or_default()
    }
}
