use callbridge_realtime_types::tools::{FunctionTool, Tool};
use serde_json::json;

pub const QUESTION_AND_ANSWER: &str = "question_and_answer";
pub const BOOK_TOW: &str = "book_tow";
pub const STORE_COMPLAINT: &str = "store_complaint";

/// Functions offered to the model; `store_complaint` only when complaints
/// are enabled.
pub fn function_tools(complaints_enabled: bool) -> Vec<Tool> {
    let mut tools = vec![
        Tool::Function(FunctionTool::new(
            QUESTION_AND_ANSWER,
            "Get answers to customer questions about the business, its services and policies.",
            json!({
                "type": "object",
                "properties": {
                    "question": {
                        "type": "string",
                        "description": "The caller's question, in their own words."
                    }
                },
                "required": ["question"]
            }),
        )),
        Tool::Function(FunctionTool::new(
            BOOK_TOW,
            "Book a tow truck to the caller's location.",
            json!({
                "type": "object",
                "properties": {
                    "address": {
                        "type": "string",
                        "description": "Full address where the vehicle should be picked up."
                    }
                },
                "required": ["address"]
            }),
        )),
    ];
    if complaints_enabled {
        tools.push(Tool::Function(FunctionTool::new(
            STORE_COMPLAINT,
            "Record a complaint from the caller.",
            json!({
                "type": "object",
                "properties": {
                    "complaint": {
                        "type": "string",
                        "description": "Summary of the caller's complaint."
                    }
                },
                "required": ["complaint"]
            }),
        )));
    }
    tools
}
