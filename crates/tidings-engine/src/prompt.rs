use chrono::{DateTime, Utc};

use tidings_core::engine::ChatRequest;
use tidings_core::messages::Message;

/// System prompt for the assistant.
pub fn system_prompt(agent_name: &str, now: DateTime<Utc>) -> String {
    format!(
        "You are {agent_name}, an advanced AI assistant designed to be helpful and professional.\n\
         It is {} now.\n\n\
         Note: The output language must be consistent with the language of the user's question.",
        now.format("%Y-%m-%d %H:%M:%S")
    )
}

/// Messages sent to the model: system prompt, prior turns, then the input.
pub fn assemble(agent_name: &str, request: &ChatRequest, now: DateTime<Utc>) -> Vec<Message> {
    let mut messages = Vec::with_capacity(request.history.len() + 2);
    messages.push(Message::system(system_prompt(agent_name, now)));
    messages.extend(request.history.iter().cloned());
    messages.push(Message::user(request.input.clone()));
    messages
}
