//! Nutrition chat flow: a rolling history forwarded to the text generator.

use chowbot_core::models::{ChatMessage, FlowData, NutritionChat, Role, Session};
use chowbot_core::{ChowbotError, SessionPatch, Step};

use crate::context::{BotContext, TurnOutcome};

pub const MSG_APOLOGY: &str = "Sorry, I'm having trouble fetching advice right now.";
pub const MSG_GREETING: &str = "Great! Tell me about your dietary goals or preferences.";

const EXIT_WORDS: &[&str] = &["bye", "exit", "cancel"];

/// History for a fresh nutrition session: just the system turn.
pub fn seed_history(ctx: &BotContext) -> NutritionChat {
    NutritionChat {
        history: vec![ChatMessage::system(ctx.settings.nutrition.system_prompt.clone())],
    }
}

pub async fn handle(
    ctx: &BotContext,
    user_id: &str,
    text: &str,
    session: &Session,
) -> Result<TurnOutcome, ChowbotError> {
    let mut history = session.history().to_vec();
    if history.first().map(|m| m.role) != Some(Role::System) {
        history.insert(0, ChatMessage::system(ctx.settings.nutrition.system_prompt.clone()));
    }
    history.push(ChatMessage::user(text));

    let reply = match ctx
        .generator
        .generate(&history, ctx.settings.temperature_nutrition)
        .await
    {
        Ok(reply) => reply,
        Err(e) => {
            tracing::warn!(user_id = %user_id, error = %e, "Nutrition reply failed, sending apology");
            MSG_APOLOGY.to_string()
        }
    };
    history.push(ChatMessage::assistant(reply.clone()));
    cap_history(&mut history, ctx.settings.nutrition.max_history);

    ctx.reply(user_id, &reply).await?;

    let normalized = text.trim().to_lowercase();
    if EXIT_WORDS.contains(&normalized.as_str()) {
        ctx.sessions.delete(user_id).await?;
        tracing::info!(user_id = %user_id, "Nutrition chat ended by user");
        return Ok(TurnOutcome::Ended);
    }

    ctx.sessions
        .update(
            user_id,
            SessionPatch::new()
                .step(Step::Nutrition)
                .data(FlowData::Nutrition(NutritionChat { history })),
        )
        .await?;
    Ok(TurnOutcome::Sent)
}

/// Drop the oldest conversational turns beyond `max`, keeping a leading system turn.
pub fn cap_history(history: &mut Vec<ChatMessage>, max: usize) {
    let max = max.max(2);
    if history.len() <= max {
        return;
    }
    let keep_system = history.first().map(|m| m.role) == Some(Role::System);
    let excess = history.len() - max;
    let start = usize::from(keep_system);
    history.drain(start..start + excess);
}
