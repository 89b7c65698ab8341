use anyhow::{Result, anyhow};
use printpdf::{BuiltinFont, Color, Mm, PdfDocument, Rect, Rgb};
use qrcode::QrCode;

use super::TicketNotice;

const PAGE_WIDTH: f32 = 210.0;
const PAGE_HEIGHT: f32 = 297.0;
const QR_SIZE: f32 = 70.0;

/// Printable single-page ticket. The QR code is drawn as vector modules so
/// it stays sharp at any print size.
pub fn render_ticket(notice: &TicketNotice) -> Result<Vec<u8>> {
    let (doc, page, layer) =
        PdfDocument::new("Eventify Ticket", Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Ticket");
    let layer = doc.get_page(page).get_layer(layer);

    let bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(|e| anyhow!("PDF font error: {}", e))?;
    let regular = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|e| anyhow!("PDF font error: {}", e))?;

    layer.set_fill_color(Color::Rgb(Rgb::new(0.30, 0.69, 0.31, None)));
    layer.use_text("Eventify Ticket", 22.0, Mm(20.0), Mm(270.0), &bold);

    layer.set_fill_color(Color::Rgb(Rgb::new(0.0, 0.0, 0.0, None)));
    let lines = [
        format!("Event: {}", notice.event_title),
        format!("Date & Time: {}", notice.event_date.format("%d %b %Y, %H:%M UTC")),
        format!("Venue: {}", notice.venue_or_tba()),
        format!("Quantity: {}", notice.quantity),
        format!("Seat: {}", notice.seat_number),
        format!("Ticket: {}", notice.ticket_id),
    ];
    let mut y = 250.0;
    for line in &lines {
        layer.use_text(line.as_str(), 13.0, Mm(20.0), Mm(y), &regular);
        y -= 9.0;
    }

    let code = QrCode::new(notice.scan_token.as_bytes())?;
    let width = code.width();
    let module = QR_SIZE / width as f32;
    let left = (PAGE_WIDTH - QR_SIZE) / 2.0;
    let top = y - 10.0;

    for (i, color) in code.to_colors().iter().enumerate() {
        if *color != qrcode::Color::Dark {
            continue;
        }
        let col = (i % width) as f32;
        let row = (i / width) as f32;
        layer.add_rect(Rect::new(
            Mm(left + col * module),
            Mm(top - (row + 1.0) * module),
            Mm(left + (col + 1.0) * module),
            Mm(top - row * module),
        ));
    }

    layer.use_text(
        "Please present this ticket at the event entrance.",
        12.0,
        Mm(20.0),
        Mm(top - QR_SIZE - 15.0),
        &regular,
    );

    doc.save_to_bytes().map_err(|e| anyhow!("PDF save error: {}", e))
}
