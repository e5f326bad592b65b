//! Stage prompts
//!
//! Prompt text is kept here so stages only deal with control flow.

use dockside_core::RoutingContext;
use dockside_llm::{ParameterSchema, ToolDefinition};
use dockside_tools::Domain;

// ============================================================================
// Inquiry
// ============================================================================

const INQUIRY_SYSTEM_PROMPT: &str = r#"You route questions from a third-party logistics (3PL) operations team to specialist managers.

Call one or more manager tools. Give each manager precise, self-contained instructions in the `instructions` argument: what to look up, which identifiers, dates, SKUs, carriers or warehouses the user mentioned, and what the user wants to know. Do not answer the question yourself.

Managers:
- orderAgent: orders, order status, orders needing attention, order volume
- inventoryAgent: stock levels, low stock, SKUs by warehouse
- returnsAgent: returns, RMAs, return reasons
- shipmentAgent: shipments, tracking, carriers, delivery performance
- billingAgent: invoices, fees, storage and fulfillment charges"#;

pub fn inquiry_system_prompt(routing: &RoutingContext) -> String {
    format!(
        "{}\n\nThe user works for a {} organization. Today is {}.",
        INQUIRY_SYSTEM_PROMPT,
        if routing.org_type.is_empty() {
            "3PL"
        } else {
            routing.org_type.as_str()
        },
        chrono::Utc::now().format("%Y-%m-%d")
    )
}

fn manager_description(domain: Domain) -> &'static str {
    match domain {
        Domain::Orders => "Answers questions about orders: details, statuses, exceptions and daily volume.",
        Domain::Inventory => "Answers questions about inventory: on-hand, available and low-stock SKUs.",
        Domain::Returns => "Answers questions about returns: details, statuses and return reasons.",
        Domain::Shipments => "Answers questions about shipments: tracking, carriers and on-time performance.",
        Domain::Billing => "Answers questions about billing: charges by type, invoice and period.",
    }
}

/// The router's menu: one tool per domain manager.
pub fn manager_tools() -> Vec<ToolDefinition> {
    Domain::all()
        .into_iter()
        .map(|domain| {
            let schema = ParameterSchema::object(
                Some(manager_description(domain)),
                [(
                    "instructions".to_string(),
                    ParameterSchema::string(Some(
                        "Self-contained instructions for the manager",
                    )),
                )]
                .into_iter()
                .collect(),
                vec!["instructions".to_string()],
            );
            ToolDefinition::new(
                domain.agent_name(),
                manager_description(domain),
                schema.to_value(),
            )
        })
        .collect()
}

// ============================================================================
// Managers
// ============================================================================

const MANAGER_COMMON: &str = "Call the tools that answer the instructions. Use only filters the \
instructions justify; leave the rest out. Dates are YYYY-MM-DD. Never pass a company or brand \
identifier: results are already scoped to the user's company.";

pub fn manager_system_prompt(domain: Domain) -> String {
    let focus = match domain {
        Domain::Orders => {
            "You are the order manager. For \"what needs attention\" questions use \
             orders_requiring_attention. If a first lookup reveals order numbers that need \
             detail, look them up with order_details in a second round."
        }
        Domain::Inventory => {
            "You are the inventory manager. Use low_stock_items for reorder and stock-out \
             questions and inventory_levels for everything else."
        }
        Domain::Returns => {
            "You are the returns manager. Use return_reasons_summary for why-questions and \
             return_details for specific returns."
        }
        Domain::Shipments => {
            "You are the shipment manager. Use carrier_performance for carrier comparisons. \
             If tracking numbers surface in a first lookup, fetch their detail in a second round."
        }
        Domain::Billing => "You are the billing manager. Use billing_charges for all billing questions.",
    };
    format!("{}\n\n{}", focus, MANAGER_COMMON)
}

// ============================================================================
// Analysis
// ============================================================================

pub const ANALYSIS_INSTRUCTIONS: &str = "Each attached CSV file is the result of one data lookup. \
Answer the user's last question from these files. When you restructure, aggregate or join the \
data, save every resulting table as a CSV file with a descriptive name. Keep the written summary \
short and factual; do not invent numbers that are not in the files.";

pub fn analysis_request(question: &str, file_names: &[String]) -> String {
    format!(
        "Question: {}\n\nAttached files:\n{}",
        question,
        file_names
            .iter()
            .map(|n| format!("- {}", n))
            .collect::<Vec<_>>()
            .join("\n")
    )
}

// ============================================================================
// File check and file programmer
// ============================================================================

pub const FILE_CHECK_SYSTEM_PROMPT: &str = "Decide whether the user's request asks for a \
downloadable file (for example a CSV export, a spreadsheet or a report). If it does, set \
isFileDownloadRequired to true and describe in kindOfFile the expected format and content. \
Otherwise set isFileDownloadRequired to false and kindOfFile to an empty string.";

pub fn file_programmer_system_prompt(placeholder_path: &str, columns: &[String]) -> String {
    format!(
        r#"You write a single Python program that turns a dataset into the file the user asked for.

Rules:
- Read the dataset with pandas from exactly this path: {path}
- Dataset columns: {columns}
- Convert every date, datetime or period column to an ISO-8601 string before writing output.
- Build the file in memory, base64-encode it, and make the last expression of the program the string
  "data:<mime type>;base64,<payload>". Do not write anything else to stdout after it.
- List every third-party package the program imports in `packages` (pandas included).
- Put a short file base name without extension in `outputName`."#,
        path = placeholder_path,
        columns = if columns.is_empty() {
            "unknown".to_string()
        } else {
            columns.join(", ")
        }
    )
}

// ============================================================================
// Writer
// ============================================================================

pub const WRITER_SYSTEM_PROMPT: &str = r#"You are Dockside, an analytics assistant for third-party logistics teams.

Answer the user's last message using only the tool results in the conversation. When a lookup returned no rows, say so plainly (for example "no orders currently require attention"). When a file was created, include its link. Use short paragraphs and Markdown tables for tabular data. Never mention tools, managers or internal steps."#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manager_tools_cover_every_domain() {
        let tools = manager_tools();
        assert_eq!(tools.len(), Domain::all().len());
        assert!(tools.iter().any(|t| t.name == "orderAgent"));
        assert_eq!(
            tools[0].input_schema["required"],
            serde_json::json!(["instructions"])
        );
    }

    #[test]
    fn test_inquiry_prompt_mentions_org_type() {
        let routing = RoutingContext::new("acme_3pl", "brand", "c1", "u1");
        assert!(inquiry_system_prompt(&routing).contains("brand organization"));
    }
}
