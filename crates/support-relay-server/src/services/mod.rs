pub mod conversation;
pub mod escalation;
pub mod llm_service;
pub mod ticket_service;

pub use conversation::ConversationManager;
pub use escalation::{EscalationExporter, EscalationQueue, TicketProvider};
pub use llm_service::LlmService;
pub use ticket_service::TicketService;
