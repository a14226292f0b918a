//! Invoice documents for download.

use printpdf::{BuiltinFont, Mm, PdfDocument};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::Span;

use crate::error::{PaymentError, PaymentResult};
use crate::models::Payment;
use crate::store::PaymentStore;

pub const DEFAULT_INVOICE_DIR: &str = "/invoices";

/// Renders one payment into a document at `path`. Called on a blocking
/// thread.
pub trait InvoiceRenderer: Send + Sync {
    fn render(&self, payment: &Payment, path: &Path) -> PaymentResult<()>;
}

/// A4 single-page PDF with the payment details in Helvetica.
#[derive(Debug, Default, Clone)]
pub struct PdfInvoiceRenderer;

impl InvoiceRenderer for PdfInvoiceRenderer {
    fn render(&self, payment: &Payment, path: &Path) -> PaymentResult<()> {
        let render_err = |e: printpdf::Error| PaymentError::Render(e.to_string());

        let title = format!("Invoice order {}", payment.order_id);
        let (doc, page, layer) = PdfDocument::new(&title, Mm(210.0), Mm(297.0), "Layer 1");
        let font = doc.add_builtin_font(BuiltinFont::Helvetica).map_err(render_err)?;
        let bold = doc
            .add_builtin_font(BuiltinFont::HelveticaBold)
            .map_err(render_err)?;
        let layer = doc.get_page(page).get_layer(layer);

        layer.use_text("INVOICE", 20.0, Mm(20.0), Mm(270.0), &bold);

        let lines = [
            format!("Order ID: {}", payment.order_id),
            format!("User ID: {}", payment.user_id),
            format!("External ID: {}", payment.external_id),
            format!("Amount: {:.2}", payment.amount),
            format!("Status: {}", payment.status),
            format!("Due: {}", payment.expired_time.format("%Y-%m-%d %H:%M UTC")),
            format!("Issued: {}", payment.create_time.format("%Y-%m-%d %H:%M UTC")),
        ];
        let mut y = 250.0;
        for line in lines {
            layer.use_text(line, 12.0, Mm(20.0), Mm(y), &font);
            y -= 8.0;
        }

        let file = File::create(path)
            .map_err(|e| PaymentError::Render(format!("{}: {}", path.display(), e)))?;
        doc.save(&mut BufWriter::new(file)).map_err(render_err)?;
        Ok(())
    }
}

/// Looks a payment up and produces its invoice file at
/// `<invoice_dir>/invoice_<order_id>.pdf`.
pub struct InvoiceService {
    store: Arc<dyn PaymentStore>,
    renderer: Arc<dyn InvoiceRenderer>,
    invoice_dir: PathBuf,
    span: Span,
}

impl InvoiceService {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        renderer: Arc<dyn InvoiceRenderer>,
        invoice_dir: impl Into<PathBuf>,
        span: Span,
    ) -> Self {
        Self {
            store,
            renderer,
            invoice_dir: invoice_dir.into(),
            span,
        }
    }

    pub fn invoice_path(&self, order_id: i64) -> PathBuf {
        self.invoice_dir.join(format!("invoice_{order_id}.pdf"))
    }

    /// Render the invoice for `order_id` and return the file path.
    pub async fn download_invoice(&self, order_id: i64) -> PaymentResult<PathBuf> {
        let payment = self
            .store
            .get_payment_by_order_id(order_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("payment for order {order_id}")))?;

        tokio::fs::create_dir_all(&self.invoice_dir)
            .await
            .map_err(|e| PaymentError::Render(format!("{}: {}", self.invoice_dir.display(), e)))?;

        let path = self.invoice_path(order_id);
        let renderer = self.renderer.clone();
        let target = path.clone();
        tokio::task::spawn_blocking(move || renderer.render(&payment, &target))
            .await
            .map_err(|e| PaymentError::Render(e.to_string()))??;

        tracing::info!(parent: &self.span, order_id, path = %path.display(), "Invoice rendered");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewPayment;
    use crate::store::InMemoryPaymentStore;
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    fn temp_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("order-payments-{}-{}", name, std::process::id()))
    }

    #[test]
    fn invoice_path_is_deterministic() {
        let service = InvoiceService::new(
            Arc::new(InMemoryPaymentStore::new()),
            Arc::new(PdfInvoiceRenderer),
            DEFAULT_INVOICE_DIR,
            Span::none(),
        );
        assert_eq!(
            service.invoice_path(42),
            PathBuf::from("/invoices/invoice_42.pdf")
        );
    }

    #[tokio::test]
    async fn renders_pdf_for_stored_payment() {
        let store = Arc::new(InMemoryPaymentStore::new());
        store
            .save_payment(NewPayment {
                order_id: 42,
                user_id: 7,
                external_id: "order-42".into(),
                amount: Decimal::new(1500050, 2),
                expired_time: Utc::now() + Duration::hours(24),
            })
            .await
            .unwrap();
        let dir = temp_dir("render");
        let service = InvoiceService::new(store, Arc::new(PdfInvoiceRenderer), &dir, Span::none());

        let path = service.download_invoice(42).await.unwrap();

        assert_eq!(path, dir.join("invoice_42.pdf"));
        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn unknown_order_is_not_found() {
        let service = InvoiceService::new(
            Arc::new(InMemoryPaymentStore::new()),
            Arc::new(PdfInvoiceRenderer),
            temp_dir("missing"),
            Span::none(),
        );
        assert!(matches!(
            service.download_invoice(1).await,
            Err(PaymentError::NotFound(_))
        ));
    }
}
