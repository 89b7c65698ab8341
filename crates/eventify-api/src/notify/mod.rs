//! Ticket confirmation emails, sent off the request path.
//!
//! Handlers enqueue a [`TicketNotice`] after the ticket is committed. A
//! single background worker renders the PDF, sends the mail and, for tickets
//! minted by the payment bridge, promotes them from `Pending` to `Active`.
//! A failed send is logged and never rolls the ticket back.

pub mod mailer;
pub mod pdf;
pub mod qr;

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use eventify_db::{Database, TicketRow};
use eventify_types::models::TicketStatus;

use self::mailer::{Mailer, TicketEmail};

#[derive(Debug, Clone)]
pub struct TicketNotice {
    pub ticket_id: Uuid,
    pub recipient: String,
    pub username: String,
    pub event_title: String,
    pub event_date: DateTime<Utc>,
    pub venue: String,
    pub quantity: i64,
    pub seat_number: String,
    pub scan_token: String,
    pub qr_code_data: String,
    /// Promote the ticket to `Active` once the mail is handed off.
    pub activate: bool,
}

impl TicketNotice {
    pub fn for_ticket(row: &TicketRow) -> Self {
        Self {
            ticket_id: row.id,
            recipient: row.user_email.clone(),
            username: row.user_username.clone(),
            event_title: row.event_title.clone(),
            event_date: row.event_date_time,
            venue: row.event_venue.clone(),
            quantity: row.quantity,
            seat_number: row.seat_number.clone(),
            scan_token: row.qr_code_string.clone(),
            qr_code_data: row.qr_code_data.clone(),
            activate: row.status == TicketStatus::Pending,
        }
    }

    pub fn venue_or_tba(&self) -> &str {
        if self.venue.trim().is_empty() { "TBA" } else { &self.venue }
    }
}

/// Handle to the notification queue. Cloning shares the same worker.
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<TicketNotice>,
}

impl Notifier {
    /// Start the worker on the current runtime.
    pub fn spawn(mailer: Arc<dyn Mailer>, db: Arc<Database>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(rx, mailer, db));
        Self { tx }
    }

    pub fn enqueue(&self, notice: TicketNotice) {
        let ticket_id = notice.ticket_id;
        if self.tx.send(notice).is_err() {
            warn!("Notification worker is gone; ticket {} will not be emailed", ticket_id);
        }
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<TicketNotice>,
    mailer: Arc<dyn Mailer>,
    db: Arc<Database>,
) {
    while let Some(notice) = rx.recv().await {
        deliver(mailer.as_ref(), &db, notice).await;
    }
    info!("Notification worker stopped");
}

pub(crate) async fn deliver(mailer: &dyn Mailer, db: &Arc<Database>, notice: TicketNotice) {
    let ticket_id = notice.ticket_id;

    if notice.recipient.is_empty() {
        warn!("Ticket {} has no recipient address, skipping email", ticket_id);
        return;
    }

    let email = match tokio::task::spawn_blocking({
        let notice = notice.clone();
        move || build_email(&notice)
    })
    .await
    {
        Ok(Ok(email)) => email,
        Ok(Err(e)) => {
            warn!("Failed to render ticket {} email: {:#}", ticket_id, e);
            return;
        }
        Err(e) => {
            warn!("Ticket {} rendering task failed: {}", ticket_id, e);
            return;
        }
    };

    if let Err(e) = mailer.send(email).await {
        warn!("Failed to send ticket {} to {}: {:#}", ticket_id, notice.recipient, e);
        return;
    }

    if notice.activate {
        let db = db.clone();
        match tokio::task::spawn_blocking(move || db.activate_ticket(ticket_id)).await {
            Ok(Ok(true)) => info!("Ticket {} activated", ticket_id),
            Ok(Ok(false)) => {}
            Ok(Err(e)) => warn!("Failed to activate ticket {}: {:#}", ticket_id, e),
            Err(e) => warn!("Ticket {} activation task failed: {}", ticket_id, e),
        }
    }
}

fn build_email(notice: &TicketNotice) -> Result<TicketEmail> {
    let qr_png = match qr::decode_data_url(&notice.qr_code_data) {
        Some(png) => png,
        None => qr::render_png(&notice.scan_token)?,
    };
    let pdf = pdf::render_ticket(notice)?;

    Ok(TicketEmail {
        to: notice.recipient.clone(),
        subject: format!("Your Ticket for \"{}\"", notice.event_title),
        html: render_html(notice),
        qr_png,
        pdf,
        pdf_filename: format!("{}-ticket.pdf", file_stem(&notice.event_title)),
    })
}

fn render_html(notice: &TicketNotice) -> String {
    format!(
        r#"<div style="font-family: Arial, sans-serif; color: #333; line-height: 1.5;">
  <h2 style="color: #4CAF50;">Ticket Confirmed!</h2>
  <p>Hi {username}, thank you for your purchase. Here are your ticket details:</p>
  <table style="border-collapse: collapse; width: 100%; margin: 20px 0;">
    <tr><td><strong>Event:</strong></td><td>{title}</td></tr>
    <tr><td><strong>Date &amp; Time:</strong></td><td>{date}</td></tr>
    <tr><td><strong>Venue:</strong></td><td>{venue}</td></tr>
    <tr><td><strong>Quantity:</strong></td><td>{quantity}</td></tr>
    <tr><td><strong>Seat:</strong></td><td>{seat}</td></tr>
  </table>
  <p>Scan the QR code below at the event entrance:</p>
  <div style="text-align: center; margin: 20px 0;">
    <img src="cid:{cid}" alt="Ticket QR Code" style="max-width: 200px;" />
  </div>
  <p>Your PDF ticket is also attached to this email.</p>
  <p>The Eventify Team</p>
</div>"#,
        username = escape_html(&notice.username),
        title = escape_html(&notice.event_title),
        date = notice.event_date.format("%d %b %Y, %H:%M UTC"),
        venue = escape_html(notice.venue_or_tba()),
        quantity = notice.quantity,
        seat = escape_html(&notice.seat_number),
        cid = mailer::QR_CONTENT_ID,
    )
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn file_stem(title: &str) -> String {
    let stem: String = title
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let stem = stem.trim_matches('-');
    if stem.is_empty() { "event".to_string() } else { stem.to_string() }
}

#[cfg(test)]
pub(crate) fn test_notice() -> TicketNotice {
    TicketNotice {
        ticket_id: Uuid::new_v4(),
        recipient: "fan@example.com".to_string(),
        username: "fan".to_string(),
        event_title: "Rust <Meetup>".to_string(),
        event_date: Utc::now(),
        venue: String::new(),
        quantity: 2,
        seat_number: "Seat-1-2".to_string(),
        scan_token: "TKT-test-token".to_string(),
        qr_code_data: String::new(),
        activate: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{self, RecordingMailer};

    #[test]
    fn email_embeds_escaped_details() {
        let email = build_email(&test_notice()).unwrap();
        assert_eq!(email.subject, "Your Ticket for \"Rust <Meetup>\"");
        assert!(email.html.contains("Rust &lt;Meetup&gt;"));
        assert!(email.html.contains("TBA"));
        assert!(email.html.contains("cid:qrcode"));
        assert_eq!(email.pdf_filename, "Rust--Meetup-ticket.pdf");
        assert!(email.pdf.starts_with(b"%PDF"));
    }

    #[tokio::test]
    async fn successful_send_activates_pending_ticket() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let row = test_support::pending_ticket(&db);
        let mailer = RecordingMailer::default();

        deliver(&mailer, &db, TicketNotice::for_ticket(&row)).await;

        assert_eq!(mailer.sent().len(), 1);
        assert_eq!(db.get_ticket(row.id).unwrap().unwrap().status, TicketStatus::Active);
    }

    #[tokio::test]
    async fn failed_send_leaves_ticket_pending() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let row = test_support::pending_ticket(&db);
        let mailer = RecordingMailer::failing();

        deliver(&mailer, &db, TicketNotice::for_ticket(&row)).await;

        assert!(mailer.sent().is_empty());
        assert_eq!(db.get_ticket(row.id).unwrap().unwrap().status, TicketStatus::Pending);
    }
}
