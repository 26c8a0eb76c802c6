//! Prompts for VLM-based invoice line-item extraction.
//!
//! Callers can override the extraction prompt via
//! [`crate::config::ExtractionConfig::prompt`]; the constants here are used
//! only when no override is provided. Whatever prompt is used, the response
//! goes through the same tolerant parser, so a custom prompt only needs to
//! ask for one of the two accepted JSON shapes.

/// System instruction sent ahead of every extraction request.
pub const SYSTEM_INSTRUCTION: &str =
    "You extract structured data from invoices. Provide only the final extraction result as JSON, without reasoning or commentary.";

/// Default user prompt for extracting invoice line items.
pub const DEFAULT_EXTRACTION_PROMPT: &str = r#"You are a specialised invoice data extraction system. Extract every product line item from the attached invoice.

EXTRACTION GUIDELINES:

1. INVOICE DATE
   - Format: YYYY-MM-DD
   - Use the invoice date (labelled "Invoice Date" or "Date"), not order or shipping dates
   - Repeat it for every line item

2. PRODUCT
   - One entry per line item
   - Copy the COMPLETE product name exactly as written, including every prefix
     (e.g. "BD2", "BIA") and every detail (weight, size, origin)
   - Keep the original capitalisation and punctuation; do not fix typos

3. QUANTITY
   - A plain number without units
   - If no quantity is stated, use null (do NOT default to 1)

4. UNIT PRICE
   - Price per unit as a decimal number without currency symbols (10.50, not £10.50)

5. TOTAL PRICE
   - Line total as a decimal number without currency symbols

IGNORE subtotals, tax lines, delivery charges, discounts and payment summaries.

OUTPUT FORMAT:
Return ONE JSON object of parallel arrays, where position i of every array
describes the same line item:
{
  "date": ["2023-06-24", "2023-06-24"],
  "product": ["BD2 Coriander Eng", "BIA MINT Eng"],
  "quantity": [50, 10],
  "unit_price": [7.5, 7.0],
  "total_price": [375, 70]
}
Use null for any value you cannot read. Output only the JSON."#;
