use crate::backend::{Backend, BackendError};
use crate::session::{SessionStore, UNKNOWN_CALLER};
use crate::tools;
use serde::Deserialize;

pub const COMPLAINT_ACKNOWLEDGMENT: &str = "The complaint has been logged.";
pub const APOLOGY_INSTRUCTIONS: &str = "Apologize to the caller: something went wrong while \
handling that request. Ask if there is anything else you can help with.";

/// A completed function call taken from `response.function_call_arguments.done`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionCall {
    pub call_id: String,
    pub name: String,
    /// JSON-encoded arguments object.
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    QuestionAndAnswer { question: String },
    BookTow { address: String },
    StoreComplaint { complaint: String },
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("invalid arguments for '{name}': {source}")]
    InvalidArguments {
        name: String,
        source: serde_json::Error,
    },
    #[error(transparent)]
    Backend(#[from] BackendError),
}

#[derive(Deserialize)]
struct QuestionArgs {
    question: String,
}

#[derive(Deserialize)]
struct AddressArgs {
    address: String,
}

#[derive(Deserialize)]
struct ComplaintArgs {
    complaint: String,
}

fn arguments<T: for<'de> Deserialize<'de>>(call: &FunctionCall) -> Result<T, DispatchError> {
    serde_json::from_str(&call.arguments).map_err(|source| DispatchError::InvalidArguments {
        name: call.name.clone(),
        source,
    })
}

impl Action {
    pub fn parse(call: &FunctionCall, complaints_enabled: bool) -> Result<Self, DispatchError> {
        match call.name.as_str() {
            tools::QUESTION_AND_ANSWER => {
                let args: QuestionArgs = arguments(call)?;
                Ok(Action::QuestionAndAnswer {
                    question: args.question,
                })
            }
            tools::BOOK_TOW => {
                let args: AddressArgs = arguments(call)?;
                Ok(Action::BookTow {
                    address: args.address,
                })
            }
            tools::STORE_COMPLAINT if complaints_enabled => {
                let args: ComplaintArgs = arguments(call)?;
                Ok(Action::StoreComplaint {
                    complaint: args.complaint,
                })
            }
            other => Err(DispatchError::UnknownFunction(other.to_string())),
        }
    }
}

/// What to feed back to the model once a function call has been handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolReply {
    pub call_id: String,
    /// Sent as a `function_call_output` item when present.
    pub output: Option<String>,
    /// Instructions for a follow-up `response.create` when present.
    pub follow_up: Option<String>,
}

impl ToolReply {
    pub fn apology(call_id: &str) -> Self {
        Self {
            call_id: call_id.to_string(),
            output: None,
            follow_up: Some(APOLOGY_INSTRUCTIONS.to_string()),
        }
    }
}

/// Per-call inputs the actions need.
#[derive(Debug, Clone, Default)]
pub struct DispatchContext {
    pub caller: String,
    pub thread_id: Option<String>,
    pub complaints_enabled: bool,
}

/// Outcome of an action, including the conversation handle to keep for the
/// next question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub reply: ToolReply,
    pub thread_id: Option<String>,
}

pub async fn execute(
    backend: &dyn Backend,
    call: &FunctionCall,
    ctx: &DispatchContext,
) -> Result<Outcome, DispatchError> {
    let action = Action::parse(call, ctx.complaints_enabled)?;
    tracing::info!(function = %call.name, call_id = %call.call_id, "dispatching function call");
    match action {
        Action::QuestionAndAnswer { question } => {
            let answer = backend
                .answer_question(&question, ctx.thread_id.clone())
                .await?;
            Ok(Outcome {
                reply: ToolReply {
                    call_id: call.call_id.clone(),
                    follow_up: Some(format!(
                        "Relay this answer to the caller concisely: {}",
                        answer.answer
                    )),
                    output: Some(answer.answer),
                },
                thread_id: answer.thread_id,
            })
        }
        Action::BookTow { address } => {
            let status = backend.book_tow(&ctx.caller, &address).await?;
            Ok(Outcome {
                reply: ToolReply {
                    call_id: call.call_id.clone(),
                    follow_up: Some(format!(
                        "Inform the caller of the tow booking status: {status}"
                    )),
                    output: Some(status),
                },
                thread_id: None,
            })
        }
        Action::StoreComplaint { complaint } => {
            backend.log_complaint(&ctx.caller, &complaint).await?;
            Ok(Outcome {
                reply: ToolReply {
                    call_id: call.call_id.clone(),
                    output: Some(COMPLAINT_ACKNOWLEDGMENT.to_string()),
                    follow_up: None,
                },
                thread_id: None,
            })
        }
    }
}

/// Runs the call against the session of `call_id`, storing a new thread id on
/// success. Failures of any kind become an apology.
pub async fn run(
    backend: &dyn Backend,
    store: &SessionStore,
    call_id: &str,
    call: &FunctionCall,
    complaints_enabled: bool,
) -> ToolReply {
    let record = store.get(call_id).await;
    let ctx = DispatchContext {
        caller: record
            .as_ref()
            .map(|r| r.caller.clone())
            .unwrap_or_else(|| UNKNOWN_CALLER.to_string()),
        thread_id: record.and_then(|r| r.thread_id),
        complaints_enabled,
    };
    match execute(backend, call, &ctx).await {
        Ok(outcome) => {
            if let Some(thread_id) = &outcome.thread_id {
                store.set_thread_id(call_id, thread_id).await;
            }
            outcome.reply
        }
        Err(e) => {
            tracing::warn!(call_id, function = %call.name, "function call failed: {}", e);
            ToolReply::apology(&call.call_id)
        }
    }
}
