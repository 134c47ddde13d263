//! Outbound email notifications. All sends are fire-and-forget: a failed
//! notification is logged and never fails the operation that triggered it.

use log::{error, info};
use std::sync::Arc;
use uuid::Uuid;

use crate::directory;
use crate::requests::ServiceRequest;
use crate::shared::enums::RequestStatus;
use crate::shared::state::AppState;

struct Notification {
    recipient_id: Uuid,
    subject: String,
    body: String,
}

/// Tell staff-facing contacts that a request entered the queue. The
/// recipient is the creator; staff discovers new work through the list
/// endpoints.
pub fn notify_submitted(state: Arc<AppState>, request: ServiceRequest) {
    dispatch(
        state,
        Notification {
            recipient_id: request.created_by,
            subject: format!("Request received: {}", request.title),
            body: format!(
                "Your service request \"{}\" ({}) has been submitted and is awaiting review.",
                request.title, request.id
            ),
        },
    );
}

pub fn notify_status_change(
    state: Arc<AppState>,
    request: ServiceRequest,
    old_status: RequestStatus,
    new_status: RequestStatus,
    notes: Option<String>,
) {
    let mut body = format!(
        "Your service request \"{}\" ({}) moved from {} to {}.",
        request.title, request.id, old_status, new_status
    );
    if let Some(notes) = notes.filter(|n| !n.trim().is_empty()) {
        body.push_str(&format!("\n\nNotes: {notes}"));
    }
    dispatch(
        state,
        Notification {
            recipient_id: request.created_by,
            subject: format!("Request update: {}", request.title),
            body,
        },
    );
}

pub fn notify_assigned(state: Arc<AppState>, request: ServiceRequest, assignee_id: Uuid) {
    dispatch(
        state,
        Notification {
            recipient_id: assignee_id,
            subject: format!("Request assigned to you: {}", request.title),
            body: format!(
                "Service request \"{}\" ({}, priority {}) has been assigned to you.",
                request.title, request.id, request.priority
            ),
        },
    );
}

fn dispatch(state: Arc<AppState>, notification: Notification) {
    tokio::spawn(async move {
        let email = {
            let mut conn = match state.conn.get() {
                Ok(conn) => conn,
                Err(e) => {
                    error!("notification skipped, no db connection: {e}");
                    return;
                }
            };
            match directory::load_user(&mut conn, notification.recipient_id) {
                Ok(user) if user.is_active => user.email,
                Ok(user) => {
                    info!("notification skipped, recipient {} inactive", user.id);
                    return;
                }
                Err(e) => {
                    error!(
                        "notification skipped, recipient {} not found: {e}",
                        notification.recipient_id
                    );
                    return;
                }
            }
        };

        send_email(&state, &email, &notification.subject, &notification.body).await;
    });
}

#[cfg(feature = "mail")]
async fn send_email(state: &AppState, to: &str, subject: &str, body: &str) {
    use lettre::message::header::ContentType;
    use lettre::transport::smtp::authentication::Credentials;
    use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

    let config = &state.config.email;
    let message = match Message::builder()
        .from(match config.from.parse() {
            Ok(from) => from,
            Err(e) => {
                error!("invalid sender address {}: {e}", config.from);
                return;
            }
        })
        .to(match to.parse() {
            Ok(to) => to,
            Err(e) => {
                error!("invalid recipient address {to}: {e}");
                return;
            }
        })
        .subject(subject)
        .header(ContentType::TEXT_PLAIN)
        .body(body.to_string())
    {
        Ok(message) => message,
        Err(e) => {
            error!("failed to build notification email: {e}");
            return;
        }
    };

    let mut builder =
        match AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host) {
            Ok(builder) => builder.port(config.smtp_port),
            Err(e) => {
                error!("invalid smtp relay {}: {e}", config.smtp_host);
                return;
            }
        };
    if let (Some(user), Some(pass)) = (&config.username, &config.password) {
        builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
    }
    let transport = builder.build();

    // Transient SMTP failures are common; retry a couple of times before
    // giving up.
    for attempt in 1..=3u32 {
        match transport.send(message.clone()).await {
            Ok(_) => {
                info!("notification sent to {to}: {subject}");
                return;
            }
            Err(e) if attempt < 3 => {
                error!("send to {to} failed (attempt {attempt}): {e}");
                tokio::time::sleep(std::time::Duration::from_secs(2 * attempt as u64)).await;
            }
            Err(e) => {
                error!("send to {to} failed permanently: {e}");
            }
        }
    }
}

#[cfg(not(feature = "mail"))]
async fn send_email(_state: &AppState, to: &str, subject: &str, _body: &str) {
    info!("notification (mail disabled) to {to}: {subject}");
}
