//! CSV rendering of decoded leads.
//!
//! Output is UTF-8, comma-delimited, LF-terminated, with a mandatory header
//! row equal to the schema titles and exactly one row per lead. Fields are
//! quoted only when they contain a delimiter, quote or line break.

use tracing::info;

use crate::error::DeliveryError;
use crate::payload::{ExportSchema, LeadRecord};

/// Render `leads` against `schema`. Identical input yields identical bytes.
pub fn render_csv(leads: &[LeadRecord], schema: &ExportSchema) -> Result<Vec<u8>, DeliveryError> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    writer
        .write_record(schema.headers())
        .map_err(render_error)?;

    for lead in leads {
        writer.write_record(schema.row(lead)).map_err(render_error)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| DeliveryError::Validation(format!("failed to flush csv: {e}")))?;

    info!(
        rows = leads.len(),
        columns = schema.len(),
        bytes = bytes.len(),
        "csv_rendered"
    );

    Ok(bytes)
}

fn render_error(e: csv::Error) -> DeliveryError {
    DeliveryError::Validation(format!("failed to render csv: {e}"))
}
