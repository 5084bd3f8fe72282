//! Receipt PDF rendering.
//!
//! `render_receipt` is a pure function from `ReceiptData` to PDF bytes: no
//! database or network access, so the render worker can call it anywhere and
//! tests can assert on the output directly. All monetary values come from
//! the frozen order snapshot, never from the live order.

use chrono::{DateTime, Utc};
use printpdf::{BuiltinFont, IndirectFontRef, Mm, PdfDocument, PdfDocumentReference};

use crate::error::{AppError, Result};
use crate::models::{Order, Receipt};

const PAGE_WIDTH_MM: f32 = 210.0;
const PAGE_HEIGHT_MM: f32 = 297.0;
const MARGIN_MM: f32 = 20.0;
const LINE_HEIGHT_MM: f32 = 6.0;

/// Everything the PDF and email renders need, assembled from a receipt and
/// its frozen order snapshot.
#[derive(Debug, Clone)]
pub struct ReceiptData {
    pub receipt_number: String,
    pub store_name: String,
    pub order_number: String,
    pub transaction_id: String,
    pub paid_at: i64,
    pub currency: String,
    pub items: Vec<ReceiptLine>,
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub shipping_cents: i64,
    pub discount_cents: i64,
    pub total_cents: i64,
}

#[derive(Debug, Clone)]
pub struct ReceiptLine {
    pub name: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
}

impl ReceiptLine {
    pub fn line_total_cents(&self) -> i64 {
        self.quantity * self.unit_price_cents
    }
}

impl ReceiptData {
    /// Build render input from a receipt row. Reads only the frozen
    /// `order_snapshot`, so a subsequently mutated order cannot leak in.
    pub fn from_receipt(receipt: &Receipt, store_name: &str) -> Result<Self> {
        let snapshot: Order = serde_json::from_value(receipt.order_snapshot.clone())
            .map_err(|e| {
                AppError::Internal(format!(
                    "receipt {} has an unreadable order snapshot: {}",
                    receipt.id, e
                ))
            })?;

        Ok(Self {
            receipt_number: receipt.receipt_number.clone(),
            store_name: store_name.to_string(),
            order_number: snapshot.order_number,
            transaction_id: receipt.transaction_id.clone(),
            paid_at: receipt.paid_at,
            currency: receipt.currency.clone(),
            items: snapshot
                .items
                .into_iter()
                .map(|item| ReceiptLine {
                    name: item.name,
                    quantity: item.quantity,
                    unit_price_cents: item.unit_price_cents,
                })
                .collect(),
            subtotal_cents: snapshot.subtotal_cents,
            tax_cents: snapshot.tax_cents,
            shipping_cents: snapshot.shipping_cents,
            discount_cents: snapshot.discount_cents,
            total_cents: snapshot.total_cents,
        })
    }
}

/// Format cents as a human-readable amount, e.g. `500.00 USD`.
pub fn format_amount(cents: i64, currency: &str) -> String {
    format!(
        "{}.{:02} {}",
        cents / 100,
        (cents % 100).abs(),
        currency.to_uppercase()
    )
}

/// Format a Unix timestamp as a human-readable date (e.g., "Jan 15, 2026")
pub fn format_date(timestamp: i64) -> String {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%b %d, %Y").to_string())
        .unwrap_or_else(|| "Unknown date".to_string())
}

/// Cursor over pages of a document, breaking to a new page when the current
/// one runs out of vertical space.
struct PageWriter<'a> {
    doc: &'a PdfDocumentReference,
    layer: printpdf::PdfLayerReference,
    y_mm: f32,
}

impl<'a> PageWriter<'a> {
    fn new(doc: &'a PdfDocumentReference, layer: printpdf::PdfLayerReference) -> Self {
        Self {
            doc,
            layer,
            y_mm: PAGE_HEIGHT_MM - MARGIN_MM,
        }
    }

    fn advance(&mut self, by_mm: f32) {
        self.y_mm -= by_mm;
        if self.y_mm < MARGIN_MM {
            let (page, layer) =
                self.doc
                    .add_page(Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), "receipt");
            self.layer = self.doc.get_page(page).get_layer(layer);
            self.y_mm = PAGE_HEIGHT_MM - MARGIN_MM;
        }
    }

    fn text(&self, content: &str, size_pt: f32, x_mm: f32, font: &IndirectFontRef) {
        self.layer
            .use_text(content, size_pt, Mm(x_mm), Mm(self.y_mm), font);
    }
}

/// Render a receipt to PDF bytes.
pub fn render_receipt(data: &ReceiptData) -> Result<Vec<u8>> {
    let title = format!("Receipt {}", data.receipt_number);
    let (doc, page, layer) =
        PdfDocument::new(&title, Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), "receipt");
    let font = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|e| AppError::Internal(format!("PDF font error: {}", e)))?;
    let bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(|e| AppError::Internal(format!("PDF font error: {}", e)))?;

    let layer = doc.get_page(page).get_layer(layer);
    let mut writer = PageWriter::new(&doc, layer);

    writer.text(&data.store_name, 18.0, MARGIN_MM, &bold);
    writer.advance(LINE_HEIGHT_MM * 1.5);
    writer.text(&format!("Receipt {}", data.receipt_number), 12.0, MARGIN_MM, &bold);
    writer.advance(LINE_HEIGHT_MM);
    writer.text(
        &format!("Paid on {}", format_date(data.paid_at)),
        10.0,
        MARGIN_MM,
        &font,
    );
    writer.advance(LINE_HEIGHT_MM);
    writer.text(&format!("Order {}", data.order_number), 10.0, MARGIN_MM, &font);
    writer.advance(LINE_HEIGHT_MM);
    writer.text(
        &format!("Payment reference {}", data.transaction_id),
        10.0,
        MARGIN_MM,
        &font,
    );
    writer.advance(LINE_HEIGHT_MM * 2.0);

    writer.text("Item", 10.0, MARGIN_MM, &bold);
    writer.text("Qty", 10.0, 120.0, &bold);
    writer.text("Unit", 10.0, 140.0, &bold);
    writer.text("Total", 10.0, 170.0, &bold);
    writer.advance(LINE_HEIGHT_MM);

    for item in &data.items {
        writer.text(&item.name, 10.0, MARGIN_MM, &font);
        writer.text(&item.quantity.to_string(), 10.0, 120.0, &font);
        writer.text(
            &format_amount(item.unit_price_cents, &data.currency),
            10.0,
            140.0,
            &font,
        );
        writer.text(
            &format_amount(item.line_total_cents(), &data.currency),
            10.0,
            170.0,
            &font,
        );
        writer.advance(LINE_HEIGHT_MM);
    }

    writer.advance(LINE_HEIGHT_MM);
    let totals = [
        ("Subtotal", data.subtotal_cents),
        ("Tax", data.tax_cents),
        ("Shipping", data.shipping_cents),
        ("Discount", -data.discount_cents),
    ];
    for (label, cents) in totals {
        writer.text(label, 10.0, 140.0, &font);
        writer.text(&format_amount(cents, &data.currency), 10.0, 170.0, &font);
        writer.advance(LINE_HEIGHT_MM);
    }
    writer.text("Total", 12.0, 140.0, &bold);
    writer.text(
        &format_amount(data.total_cents, &data.currency),
        12.0,
        170.0,
        &bold,
    );

    doc.save_to_bytes()
        .map_err(|e| AppError::Internal(format!("PDF serialization error: {}", e)))
}
