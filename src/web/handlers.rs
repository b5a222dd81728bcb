use chrono::Utc;
use salvo::prelude::*;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::payments::VerificationError;
use crate::web::web_state;

fn render_error(res: &mut Response, status: StatusCode, message: &str) {
    res.status_code(status);
    res.render(Json(json!({ "error": message })));
}

#[handler]
pub async fn health_check(res: &mut Response) {
    res.render(Json(json!({ "status": "ok" })));
}

#[handler]
pub async fn get_status(res: &mut Response) {
    let state = web_state();
    res.render(Json(json!({
        "status": "running",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "users": state.ledger.user_count(),
        "active_rules": state.registry.count_active(),
        "transactions": state.payments.transaction_count(),
    })));
}

/// Browser landing after a hosted checkout. Settles the payment if the
/// gateway confirms it, then tells the payer to head back to the chat.
#[handler]
pub async fn payment_callback(req: &mut Request, res: &mut Response) {
    // Paystack appends both `reference` and `trxref` to the redirect.
    let reference = req
        .query::<String>("reference")
        .or_else(|| req.query::<String>("trxref"));
    let Some(reference) = reference.filter(|r| !r.is_empty()) else {
        render_error(res, StatusCode::BAD_REQUEST, "missing reference parameter");
        return;
    };

    match web_state()
        .payments
        .confirm_settled(&reference, Utc::now())
        .await
    {
        Ok(plan) => {
            res.render(Text::Plain(format!(
                "Payment confirmed, {} plan is active. You can return to the bot.",
                plan
            )));
        }
        Err(VerificationError::NotSettled) => {
            res.render(Text::Plain(
                "Payment is not confirmed yet. Run /verify in the bot once it settles."
                    .to_string(),
            ));
        }
        Err(VerificationError::UnknownReference) => {
            render_error(res, StatusCode::NOT_FOUND, "unknown payment reference");
        }
        Err(err) => {
            warn!("callback settlement failed for {}: {}", reference, err);
            render_error(
                res,
                StatusCode::BAD_GATEWAY,
                "could not confirm the payment right now",
            );
        }
    }
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    event: String,
    data: WebhookData,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    reference: String,
}

/// Gateway push notifications. Settlement is re-verified against the
/// gateway, so a forged body cannot activate anything.
#[handler]
pub async fn payment_webhook(req: &mut Request, res: &mut Response) {
    let event = match req.parse_json::<WebhookEvent>().await {
        Ok(event) => event,
        Err(_) => {
            render_error(res, StatusCode::BAD_REQUEST, "malformed webhook body");
            return;
        }
    };

    if event.event != "charge.success" {
        res.render(Json(json!({ "ignored": event.event })));
        return;
    }

    match web_state()
        .payments
        .confirm_settled(&event.data.reference, Utc::now())
        .await
    {
        Ok(plan) => {
            info!(
                "webhook settled reference={} plan={}",
                event.data.reference, plan
            );
            res.render(Json(json!({ "settled": true })));
        }
        Err(VerificationError::UnknownReference) => {
            render_error(res, StatusCode::NOT_FOUND, "unknown payment reference");
        }
        Err(err) => {
            warn!(
                "webhook settlement failed for {}: {}",
                event.data.reference, err
            );
            // 5xx makes the gateway retry later.
            render_error(
                res,
                StatusCode::INTERNAL_SERVER_ERROR,
                "could not confirm the payment",
            );
        }
    }
}
