//! Conversation router: loads the stored session and dispatches the turn.
//!
//! Precedence is evaluated top to bottom on every message. `await_choice`
//! comes before service dispatch because a session there has no service yet.

use chowbot_core::models::{FlowData, OrderDraft};
use chowbot_core::{ChowbotError, ServiceKind, SessionPatch, Step};

use crate::context::{BotContext, TurnOutcome};
use crate::subsystems::{nutrition, order};

pub const MSG_WELCOME: &str =
    "Welcome! Please choose a service:\n1️⃣ Place a food order\n2️⃣ Chat with AI Nutritionist";
pub const MSG_CHOICE_REPROMPT: &str = "Please reply with 1 or 2.";
pub const MSG_SESSION_ENDED: &str = "Your session has ended. Send any message to start again.";

/// Handle one normalized inbound `(sender, text)` turn.
pub async fn handle_message(
    ctx: &BotContext,
    user_id: &str,
    text: &str,
) -> Result<TurnOutcome, ChowbotError> {
    let Some(session) = ctx.sessions.get(user_id).await? else {
        ctx.reply(user_id, MSG_WELCOME).await?;
        ctx.sessions.create(user_id, Step::AwaitChoice, None).await?;
        tracing::info!(user_id = %user_id, "New conversation");
        return Ok(TurnOutcome::New);
    };

    tracing::debug!(
        user_id = %user_id,
        service = session.service.as_str(),
        step = %session.step,
        "Routing message"
    );

    if session.step() == Some(Step::AwaitChoice) {
        return choose_service(ctx, user_id, text).await;
    }

    match session.service {
        ServiceKind::Order => order::handle(ctx, user_id, text, &session).await,
        ServiceKind::Nutrition => nutrition::handle(ctx, user_id, text, &session).await,
        ServiceKind::None => {
            tracing::warn!(user_id = %user_id, step = %session.step, "Session has no owner, ending it");
            ctx.sessions.delete(user_id).await?;
            ctx.reply(user_id, MSG_SESSION_ENDED).await?;
            Ok(TurnOutcome::Ended)
        }
    }
}

async fn choose_service(
    ctx: &BotContext,
    user_id: &str,
    text: &str,
) -> Result<TurnOutcome, ChowbotError> {
    let choice = text.trim();

    if choice.starts_with('1') {
        order::show_menu(ctx, user_id).await?;
        ctx.sessions
            .update(
                user_id,
                SessionPatch::new()
                    .service(ServiceKind::Order)
                    .step(Step::AwaitItems)
                    .data(FlowData::Order(OrderDraft::default())),
            )
            .await?;
    } else if choice.starts_with('2') {
        ctx.reply(user_id, nutrition::MSG_GREETING).await?;
        ctx.sessions
            .update(
                user_id,
                SessionPatch::new()
                    .service(ServiceKind::Nutrition)
                    .step(Step::Nutrition)
                    .data(FlowData::Nutrition(nutrition::seed_history(ctx))),
            )
            .await?;
    } else {
        ctx.reply(user_id, MSG_CHOICE_REPROMPT).await?;
    }

    Ok(TurnOutcome::Awaiting)
}
