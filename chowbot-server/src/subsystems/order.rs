//! Order flow engine
//!
//! await_items → await_confirm → await_address → confirm_address → commit
//!
//! `cancel` ends the flow from any step. The commit first claims the session
//! by moving it from confirm_address to committing, so a repeated "yes" from
//! the same user places at most one order. It then reserves stock item by
//! item with conditional decrements and releases its own reservations when
//! any item falls short, so racing commits can never oversell.

use chowbot_core::models::{items_total, FlowData, OrderDraft, OrderItem, Product, Session};
use chowbot_core::{ChowbotError, Order, SessionPatch, Step};

use crate::context::{BotContext, TurnOutcome};
use crate::subsystems::extract::menu_entries;

pub const MSG_NOT_UNDERSTOOD: &str = "Sorry, I couldn't understand your order. Please try again.";
pub const MSG_CONFIRM_REPROMPT: &str = "Please reply yes, no or edit.";
pub const MSG_ADDRESS_PROMPT: &str = "Please provide your delivery address.";
pub const MSG_RETYPE_ORDER: &str = "Okay, please retype your order message.";
pub const MSG_ADDRESS_REPROMPT: &str = "Please reply yes or no.";
pub const MSG_ADDRESS_REENTER: &str = "Please re-enter your delivery address.";
pub const MSG_CANCELLED: &str = "Your order has been cancelled.";
pub const MSG_SESSION_ERROR: &str = "Something went wrong with your session. Please start again.";
pub const MSG_EMPTY_MENU: &str = "No food items available right now.";
pub const MSG_COMMIT_IN_PROGRESS: &str = "Your order is already being placed, please wait.";

const AFFIRMATIVE: &[&str] = &["y", "yes", "sure", "ok"];
const NEGATIVE: &[&str] = &["n", "no", "nah"];
const EDIT: &[&str] = &["edit", "change"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Answer {
    Yes,
    No,
    Edit,
    Other,
}

fn classify(text: &str) -> Answer {
    let normalized = text.trim().to_lowercase();
    let word = normalized.as_str();
    if AFFIRMATIVE.contains(&word) {
        Answer::Yes
    } else if NEGATIVE.contains(&word) {
        Answer::No
    } else if EDIT.contains(&word) {
        Answer::Edit
    } else {
        Answer::Other
    }
}

fn money(ctx: &BotContext, amount: f64) -> String {
    format!("{}{:.2}", ctx.settings.order.currency_symbol, amount)
}

pub fn insufficient_stock_message(name: &str, stock: i32) -> String {
    format!(
        "❗ Requested quantity not available. Only {} unit(s) of {} in stock.",
        stock.max(0),
        name
    )
}

fn not_available_message(name: &str) -> String {
    format!("Sorry, {} is not available.", name)
}

// ============================================================================
// PUBLIC API
// ============================================================================

/// Send the numbered menu. Entry side effect of the order flow.
pub async fn show_menu(ctx: &BotContext, user_id: &str) -> Result<(), ChowbotError> {
    let products = ctx.catalog.list_products().await?;
    let text = format_menu(ctx, &products);
    ctx.reply(user_id, &text).await
}

pub fn format_menu(ctx: &BotContext, products: &[Product]) -> String {
    let entries = menu_entries(products);
    if entries.is_empty() {
        return MSG_EMPTY_MENU.to_string();
    }

    let mut text = String::from("🍽️ Here's our menu:\n");
    for (i, product) in entries.iter().enumerate() {
        text.push_str(&format!("{}. {} – {}\n", i + 1, product.name, money(ctx, product.price)));
    }
    text.push_str("\nType the item numbers and quantities, or type `cancel` anytime.");
    text
}

/// Handle one message for a session owned by the order flow.
pub async fn handle(
    ctx: &BotContext,
    user_id: &str,
    text: &str,
    session: &Session,
) -> Result<TurnOutcome, ChowbotError> {
    // A commit in flight owns the session until it deletes or reopens it
    if session.step() == Some(Step::Committing) {
        ctx.reply(user_id, MSG_COMMIT_IN_PROGRESS).await?;
        return Ok(TurnOutcome::Ignored);
    }

    if text.trim().eq_ignore_ascii_case("cancel") {
        ctx.reply(user_id, MSG_CANCELLED).await?;
        ctx.sessions.delete(user_id).await?;
        tracing::info!(user_id = %user_id, step = %session.step, "Order cancelled");
        return Ok(TurnOutcome::Cancelled);
    }

    let draft = session.data.order_draft();
    match (session.step(), draft) {
        (Some(Step::AwaitItems), _) => await_items(ctx, user_id, text).await,
        (Some(Step::AwaitConfirm), Some(draft)) if !draft.items.is_empty() => {
            await_confirm(ctx, user_id, text).await
        }
        (Some(Step::AwaitAddress), Some(draft)) if !draft.items.is_empty() => {
            await_address(ctx, user_id, text, draft).await
        }
        (Some(Step::ConfirmAddress), Some(draft)) if !draft.items.is_empty() => {
            match draft.address.as_deref() {
                Some(address) => confirm_address(ctx, user_id, text, draft, address).await,
                None => corrupted(ctx, user_id, session).await,
            }
        }
        _ => corrupted(ctx, user_id, session).await,
    }
}

// ============================================================================
// STEPS
// ============================================================================

async fn await_items(
    ctx: &BotContext,
    user_id: &str,
    text: &str,
) -> Result<TurnOutcome, ChowbotError> {
    let products = ctx.catalog.list_products().await?;
    let candidates = ctx.extractor.extract(text, &products).await;

    let mut lines: Vec<(Product, u32)> = Vec::new();
    for candidate in candidates {
        let name = candidate.product.trim();
        if candidate.quantity <= 0 || name.is_empty() {
            continue;
        }
        let quantity = u32::try_from(candidate.quantity).unwrap_or(u32::MAX);

        let product = match ctx.catalog.find_by_name(name).await? {
            Some(product) if product.is_available => product,
            _ => {
                ctx.reply(user_id, &not_available_message(name)).await?;
                return Ok(TurnOutcome::Awaiting);
            }
        };

        match lines.iter_mut().find(|(p, _)| p.id == product.id) {
            Some((_, existing)) => *existing = existing.saturating_add(quantity),
            None => lines.push((product, quantity)),
        }
    }

    if lines.is_empty() {
        ctx.reply(user_id, MSG_NOT_UNDERSTOOD).await?;
        return Ok(TurnOutcome::Awaiting);
    }

    let mut items = Vec::with_capacity(lines.len());
    for (product, quantity) in &lines {
        if i64::from(product.stock) < i64::from(*quantity) {
            ctx.reply(user_id, &insufficient_stock_message(&product.name, product.stock))
                .await?;
            return Ok(TurnOutcome::Awaiting);
        }
        match OrderItem::new(product.id, product.name.clone(), *quantity, product.price) {
            Ok(item) => items.push(item),
            Err(e) => {
                tracing::warn!(product = %product.name, error = %e, "Catalog entry cannot be ordered");
                ctx.reply(user_id, &not_available_message(&product.name)).await?;
                return Ok(TurnOutcome::Awaiting);
            }
        }
    }

    let draft = OrderDraft {
        total_price: items_total(&items),
        items,
        address: None,
    };

    ctx.reply(user_id, &format_summary(ctx, &draft)).await?;
    ctx.sessions
        .update(
            user_id,
            SessionPatch::new()
                .step(Step::AwaitConfirm)
                .data(FlowData::Order(draft)),
        )
        .await?;
    Ok(TurnOutcome::Awaiting)
}

pub fn format_summary(ctx: &BotContext, draft: &OrderDraft) -> String {
    let mut text = String::from("✅ Got your order:\n");
    for item in &draft.items {
        text.push_str(&format!(
            "- {}x {} @ {}\n",
            item.quantity,
            item.name,
            money(ctx, item.unit_price)
        ));
    }
    text.push_str(&format!("Total: {}\n", money(ctx, draft.total_price)));
    text.push_str("Please confirm (yes/no) or type `edit` to change it.");
    text
}

async fn await_confirm(
    ctx: &BotContext,
    user_id: &str,
    text: &str,
) -> Result<TurnOutcome, ChowbotError> {
    match classify(text) {
        Answer::Yes => {
            ctx.reply(user_id, MSG_ADDRESS_PROMPT).await?;
            ctx.sessions
                .update(user_id, SessionPatch::new().step(Step::AwaitAddress))
                .await?;
        }
        Answer::No | Answer::Edit => {
            ctx.reply(user_id, MSG_RETYPE_ORDER).await?;
            ctx.sessions
                .update(user_id, SessionPatch::new().step(Step::AwaitItems))
                .await?;
        }
        Answer::Other => {
            ctx.reply(user_id, MSG_CONFIRM_REPROMPT).await?;
        }
    }
    Ok(TurnOutcome::Awaiting)
}

async fn await_address(
    ctx: &BotContext,
    user_id: &str,
    text: &str,
    draft: &OrderDraft,
) -> Result<TurnOutcome, ChowbotError> {
    let draft = OrderDraft {
        address: Some(text.to_string()),
        ..draft.clone()
    };

    ctx.reply(
        user_id,
        &format!("You entered: {}\nIs this correct? (yes/no)", text),
    )
    .await?;
    ctx.sessions
        .update(
            user_id,
            SessionPatch::new()
                .step(Step::ConfirmAddress)
                .data(FlowData::Order(draft)),
        )
        .await?;
    Ok(TurnOutcome::Awaiting)
}

async fn confirm_address(
    ctx: &BotContext,
    user_id: &str,
    text: &str,
    draft: &OrderDraft,
    address: &str,
) -> Result<TurnOutcome, ChowbotError> {
    match classify(text) {
        Answer::Yes => {
            let claimed = ctx
                .sessions
                .claim_step(user_id, Step::ConfirmAddress, Step::Committing)
                .await?;
            if !claimed {
                tracing::info!(user_id = %user_id, "Duplicate confirmation, commit already claimed");
                ctx.reply(user_id, MSG_COMMIT_IN_PROGRESS).await?;
                return Ok(TurnOutcome::Ignored);
            }
            commit(ctx, user_id, draft, address).await
        }
        Answer::No => {
            ctx.reply(user_id, MSG_ADDRESS_REENTER).await?;
            ctx.sessions
                .update(user_id, SessionPatch::new().step(Step::AwaitAddress))
                .await?;
            Ok(TurnOutcome::Awaiting)
        }
        Answer::Edit | Answer::Other => {
            ctx.reply(user_id, MSG_ADDRESS_REPROMPT).await?;
            Ok(TurnOutcome::Awaiting)
        }
    }
}

async fn corrupted(
    ctx: &BotContext,
    user_id: &str,
    session: &Session,
) -> Result<TurnOutcome, ChowbotError> {
    tracing::warn!(
        user_id = %user_id,
        step = %session.step,
        "Order session is in an unrecognised state, discarding it"
    );
    ctx.sessions.delete(user_id).await?;
    ctx.reply(user_id, MSG_SESSION_ERROR).await?;
    Ok(TurnOutcome::Error)
}

// ============================================================================
// COMMIT
// ============================================================================

/// Reserve stock for every line, persist the order and end the session.
///
/// The caller holds the committing claim. A line that cannot be reserved
/// releases the lines reserved before it and moves the session back to
/// confirm_address so the user can retry.
async fn commit(
    ctx: &BotContext,
    user_id: &str,
    draft: &OrderDraft,
    address: &str,
) -> Result<TurnOutcome, ChowbotError> {
    let mut reserved: Vec<&OrderItem> = Vec::with_capacity(draft.items.len());

    for item in &draft.items {
        match ctx.catalog.try_reserve(item.product_id, item.quantity).await {
            Ok(true) => reserved.push(item),
            Ok(false) => {
                release_all(ctx, &reserved).await;
                reopen(ctx, user_id).await;
                let stock = ctx
                    .catalog
                    .get_product(item.product_id)
                    .await?
                    .map(|p| p.stock)
                    .unwrap_or(0);
                tracing::warn!(
                    user_id = %user_id,
                    product = %item.name,
                    requested = item.quantity,
                    stock,
                    "Commit lost the stock race, reservations released"
                );
                ctx.reply(user_id, &insufficient_stock_message(&item.name, stock))
                    .await?;
                return Ok(TurnOutcome::Awaiting);
            }
            Err(e) => {
                release_all(ctx, &reserved).await;
                reopen(ctx, user_id).await;
                return Err(e);
            }
        }
    }

    let order = match Order::place(user_id, draft.items.clone(), address) {
        Ok(order) => order,
        Err(e) => {
            release_all(ctx, &reserved).await;
            reopen(ctx, user_id).await;
            return Err(e);
        }
    };
    if let Err(e) = ctx.orders.insert_order(&order).await {
        release_all(ctx, &reserved).await;
        reopen(ctx, user_id).await;
        return Err(e);
    }

    tracing::info!(
        user_id = %user_id,
        order_id = %order.id,
        total = order.total_price,
        "Order placed"
    );

    // The session stays at committing if this fails, so it cannot commit again
    if let Err(e) = ctx.sessions.delete(user_id).await {
        tracing::error!(user_id = %user_id, error = %e, "Failed to delete session after order");
    }

    notify_operator(ctx, &order).await;

    ctx.reply(
        user_id,
        &format!(
            "✅ Your order has been placed! Total: {}",
            money(ctx, order.total_price)
        ),
    )
    .await?;
    if let Some(eta) = ctx.settings.order.eta_message.as_deref() {
        if !eta.trim().is_empty() {
            ctx.reply(user_id, eta).await?;
        }
    }

    Ok(TurnOutcome::Ordered)
}

/// Hand the session back to confirm_address after a commit that placed nothing.
async fn reopen(ctx: &BotContext, user_id: &str) {
    let patch = SessionPatch::new().step(Step::ConfirmAddress);
    if let Err(e) = ctx.sessions.update(user_id, patch).await {
        tracing::error!(user_id = %user_id, error = %e, "Failed to reopen session after commit");
    }
}

async fn release_all(ctx: &BotContext, reserved: &[&OrderItem]) {
    for item in reserved {
        if let Err(e) = ctx.catalog.release(item.product_id, item.quantity).await {
            tracing::error!(
                product = %item.name,
                quantity = item.quantity,
                error = %e,
                "Failed to release reserved stock"
            );
        }
    }
}

async fn notify_operator(ctx: &BotContext, order: &Order) {
    let Some(operator) = ctx.settings.order.delivery_operator.as_deref() else {
        return;
    };

    let mut text = format!(
        "🛵 New order {}\nCustomer: {}\nAddress: {}\n",
        order.id, order.user_id, order.delivery_address
    );
    for item in &order.items {
        text.push_str(&format!("- {}x {}\n", item.quantity, item.name));
    }
    text.push_str(&format!("Total: {}", money(ctx, order.total_price)));

    if let Err(e) = ctx.messenger.send_message(operator, &text).await {
        tracing::warn!(order_id = %order.id, error = %e, "Delivery operator notification failed");
    }
}
