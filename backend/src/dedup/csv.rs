//! CSV artifact format.
//!
//! Header `Name,Address,Phone,Email,Website`, every value quoted with
//! doubled inner quotes, `\n` line endings, UTF-8, insertion order. The
//! reader must tolerate its own writer: embedded quotes, commas, and
//! newlines all round-trip.

use anyhow::{Context, Result, anyhow};
use providers::Lead;

pub const CSV_HEADER: &str = "Name,Address,Phone,Email,Website";

pub fn write_csv(leads: &[Lead]) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(64 + leads.len() * 64);
    buf.extend_from_slice(CSV_HEADER.as_bytes());
    buf.push(b'\n');

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .quote_style(csv::QuoteStyle::Always)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(buf);

    for lead in leads {
        writer
            .write_record([
                &lead.company,
                &lead.address,
                &lead.phone,
                &lead.email,
                &lead.website,
            ])
            .context("writing csv record")?;
    }

    writer
        .into_inner()
        .map_err(|e| anyhow!("flushing csv writer: {e}"))
}

pub fn read_csv(bytes: &[u8]) -> Result<Vec<Lead>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let mut out = Vec::new();
    for record in reader.records() {
        let record = record.context("reading csv record")?;

        let field = |i: usize| record.get(i).unwrap_or("").to_string();

        out.push(Lead {
            company: field(0),
            address: field(1),
            phone: field(2),
            email: field(3),
            website: field(4),
        });
    }

    Ok(out)
}
